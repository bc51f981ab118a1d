//! DSVT packet format
//!
//! A DSVT packet carries either a radio header (routing callsigns plus a
//! checksum) or one 20 ms compressed voice frame. Both share the same
//! 15-byte preamble.
//!
//! Wire format (56 bytes, stream id big-endian):
//! ```text
//! offset  size  field
//!      0     4  magic "DSVT"
//!      4     1  config (0x10 header, 0x20 voice)
//!      5     3  flag a
//!      8     1  id (0x20)
//!      9     3  flag b
//!     12     2  stream id
//!     14     1  control (0x80 on header, sequence tag on voice)
//!
//! header body                    voice body
//!     15     3  flags            15     9  compressed payload
//!     18     8  repeater 1       24     3  slow data filler
//!     26     8  repeater 2       27    29  zero
//!     34     8  destination
//!     42     8  source
//!     50     4  suffix
//!     54     2  checksum (LE, over bytes 15..54)
//! ```

use rand::RngExt;

use crate::crc::dstar_checksum;
use crate::error::{Result, WireError};
use crate::frame::{COMPRESSED_FRAME_SIZE, CompressedFrame, Sequence};

// =============================================================================
// Constants
// =============================================================================

/// Packet magic
pub const DSVT_MAGIC: &[u8; 4] = b"DSVT";

/// Size of a full DSVT packet
pub const WIRE_PACKET_SIZE: usize = 56;

/// Shortest datagram that still holds a complete voice body
pub const VOICE_PACKET_MIN_SIZE: usize = 27;

/// Config byte for header packets
pub const CONFIG_HEADER: u8 = 0x10;

/// Config byte for voice packets
pub const CONFIG_VOICE: u8 = 0x20;

/// Id byte used on every packet we emit
pub const PACKET_ID: u8 = 0x20;

/// Control byte on header packets
pub const HEADER_CTRL: u8 = 0x80;

/// Slow data bytes written on every voice packet
pub const VOICE_FILLER: [u8; 3] = [0x70, 0x4F, 0x93];

/// Width of each callsign field in the header
pub const HEADER_CALLSIGN_LEN: usize = 8;

const PREAMBLE_LEN: usize = 15;
const CHECKSUM_START: usize = 15;
const CHECKSUM_END: usize = 54;

// =============================================================================
// Radio Header
// =============================================================================

/// Routing information sent once at the start of a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioHeader {
    pub flags: [u8; 3],
    /// Local repeater: station callsign with the module in the last position
    pub rpt1: [u8; HEADER_CALLSIGN_LEN],
    /// Gateway: station callsign with `G` in the last position
    pub rpt2: [u8; HEADER_CALLSIGN_LEN],
    /// Destination callsign
    pub ur: [u8; HEADER_CALLSIGN_LEN],
    /// Operator callsign
    pub my: [u8; HEADER_CALLSIGN_LEN],
    pub suffix: [u8; 4],
}

impl RadioHeader {
    /// Build a header for a transmission from this station
    ///
    /// # Arguments
    ///
    /// * `station` - Station (repeater) callsign
    /// * `module` - Local module letter
    /// * `target` - Destination callsign (e.g. `CQCQCQ`)
    /// * `operator` - Operator callsign
    pub fn new(station: &str, module: char, target: &str, operator: &str) -> Self {
        let mut rpt1 = pad_field(station);
        let mut rpt2 = rpt1;
        rpt1[HEADER_CALLSIGN_LEN - 1] = ascii_or_space(module);
        rpt2[HEADER_CALLSIGN_LEN - 1] = b'G';

        Self {
            flags: [0; 3],
            rpt1,
            rpt2,
            ur: pad_field(target),
            my: pad_field(operator),
            suffix: [b' '; 4],
        }
    }

    /// Checksum stored in the header trailer
    pub fn checksum(&self) -> u16 {
        let mut span = [0u8; CHECKSUM_END - CHECKSUM_START];
        self.write_fields(&mut span);
        dstar_checksum(&span)
    }

    /// Destination as text with padding removed
    pub fn destination(&self) -> String {
        field_text(&self.ur)
    }

    /// Operator as text with padding removed
    pub fn source(&self) -> String {
        field_text(&self.my)
    }

    fn write_fields(&self, out: &mut [u8]) {
        out[0..3].copy_from_slice(&self.flags);
        out[3..11].copy_from_slice(&self.rpt1);
        out[11..19].copy_from_slice(&self.rpt2);
        out[19..27].copy_from_slice(&self.ur);
        out[27..35].copy_from_slice(&self.my);
        out[35..39].copy_from_slice(&self.suffix);
    }

    fn read_fields(span: &[u8]) -> Self {
        let mut header = Self {
            flags: [0; 3],
            rpt1: [0; HEADER_CALLSIGN_LEN],
            rpt2: [0; HEADER_CALLSIGN_LEN],
            ur: [0; HEADER_CALLSIGN_LEN],
            my: [0; HEADER_CALLSIGN_LEN],
            suffix: [0; 4],
        };
        header.flags.copy_from_slice(&span[0..3]);
        header.rpt1.copy_from_slice(&span[3..11]);
        header.rpt2.copy_from_slice(&span[11..19]);
        header.ur.copy_from_slice(&span[19..27]);
        header.my.copy_from_slice(&span[27..35]);
        header.suffix.copy_from_slice(&span[35..39]);
        header
    }
}

// =============================================================================
// Packet
// =============================================================================

/// Body of a DSVT packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketBody {
    Header(RadioHeader),
    Voice {
        payload: [u8; COMPRESSED_FRAME_SIZE],
        text: [u8; 3],
    },
}

/// A DSVT packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirePacket {
    pub flag_a: [u8; 3],
    pub id: u8,
    pub flag_b: [u8; 3],
    pub stream_id: u16,
    /// Control byte: [`HEADER_CTRL`] or the voice sequence tag
    pub ctrl: u8,
    pub body: PacketBody,
}

impl WirePacket {
    /// Create a header packet
    pub fn header(stream_id: u16, header: RadioHeader) -> Self {
        Self {
            flag_a: [0; 3],
            id: PACKET_ID,
            flag_b: [0, 0, 1],
            stream_id,
            ctrl: HEADER_CTRL,
            body: PacketBody::Header(header),
        }
    }

    /// Create a voice packet from a compressed frame
    ///
    /// The frame's sequence tag becomes the control byte unchanged, so the
    /// end marker crosses the network boundary intact.
    pub fn voice(stream_id: u16, frame: &CompressedFrame) -> Self {
        Self {
            flag_a: [0; 3],
            id: PACKET_ID,
            flag_b: [0, 0, 1],
            stream_id,
            ctrl: frame.seq.to_byte(),
            body: PacketBody::Voice {
                payload: frame.data,
                text: VOICE_FILLER,
            },
        }
    }

    /// Config byte implied by the body
    pub fn config(&self) -> u8 {
        match self.body {
            PacketBody::Header(_) => CONFIG_HEADER,
            PacketBody::Voice { .. } => CONFIG_VOICE,
        }
    }

    pub fn is_header(&self) -> bool {
        matches!(self.body, PacketBody::Header(_))
    }

    /// Sequence tag of a voice packet
    pub fn sequence(&self) -> Sequence {
        Sequence::from_byte(self.ctrl)
    }

    /// Whether this voice packet ends its stream
    pub fn is_last(&self) -> bool {
        !self.is_header() && self.sequence().is_end()
    }

    /// Compressed frame carried by a voice packet
    pub fn voice_frame(&self) -> Option<CompressedFrame> {
        match self.body {
            PacketBody::Voice { payload, .. } => Some(CompressedFrame::new(payload, self.sequence())),
            PacketBody::Header(_) => None,
        }
    }

    /// Serialize to the 56-byte wire form
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; WIRE_PACKET_SIZE];
        buf[0..4].copy_from_slice(DSVT_MAGIC);
        buf[4] = self.config();
        buf[5..8].copy_from_slice(&self.flag_a);
        buf[8] = self.id;
        buf[9..12].copy_from_slice(&self.flag_b);
        buf[12..14].copy_from_slice(&self.stream_id.to_be_bytes());
        buf[14] = self.ctrl;

        match &self.body {
            PacketBody::Header(header) => {
                header.write_fields(&mut buf[CHECKSUM_START..CHECKSUM_END]);
                let checksum = dstar_checksum(&buf[CHECKSUM_START..CHECKSUM_END]);
                buf[54..56].copy_from_slice(&checksum.to_le_bytes());
            }
            PacketBody::Voice { payload, text } => {
                buf[15..24].copy_from_slice(payload);
                buf[24..27].copy_from_slice(text);
            }
        }

        buf
    }

    /// Parse a DSVT packet
    ///
    /// Header packets need all 56 bytes; voice packets may be truncated after
    /// the slow data filler. The header checksum is not enforced here; use
    /// [`WirePacket::checksum_matches`] when the sender is untrusted.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PREAMBLE_LEN {
            return Err(WireError::Length {
                expected: WIRE_PACKET_SIZE,
                actual: bytes.len(),
            });
        }
        if &bytes[0..4] != DSVT_MAGIC {
            return Err(WireError::Magic([bytes[0], bytes[1], bytes[2], bytes[3]]));
        }

        let body = match bytes[4] {
            CONFIG_HEADER => {
                require_len(bytes, WIRE_PACKET_SIZE)?;
                PacketBody::Header(RadioHeader::read_fields(
                    &bytes[CHECKSUM_START..CHECKSUM_END],
                ))
            }
            CONFIG_VOICE => {
                require_len(bytes, VOICE_PACKET_MIN_SIZE)?;
                let mut payload = [0u8; COMPRESSED_FRAME_SIZE];
                payload.copy_from_slice(&bytes[15..24]);
                let mut text = [0u8; 3];
                text.copy_from_slice(&bytes[24..27]);
                PacketBody::Voice { payload, text }
            }
            other => return Err(WireError::UnknownType(vec![other])),
        };

        let mut flag_a = [0u8; 3];
        flag_a.copy_from_slice(&bytes[5..8]);
        let mut flag_b = [0u8; 3];
        flag_b.copy_from_slice(&bytes[9..12]);

        Ok(Self {
            flag_a,
            id: bytes[8],
            flag_b,
            stream_id: u16::from_be_bytes([bytes[12], bytes[13]]),
            ctrl: bytes[14],
            body,
        })
    }

    /// Check the trailer of a serialized header packet
    pub fn checksum_matches(bytes: &[u8]) -> bool {
        if bytes.len() < WIRE_PACKET_SIZE {
            return false;
        }
        let stored = u16::from_le_bytes([bytes[54], bytes[55]]);
        stored == dstar_checksum(&bytes[CHECKSUM_START..CHECKSUM_END])
    }
}

/// Random non-zero stream id
pub fn new_stream_id() -> u16 {
    let mut rng = rand::rng();
    loop {
        let bytes: [u8; 2] = rng.random();
        let id = u16::from_be_bytes(bytes);
        if id != 0 {
            return id;
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn pad_field(text: &str) -> [u8; HEADER_CALLSIGN_LEN] {
    let mut field = [b' '; HEADER_CALLSIGN_LEN];
    for (slot, ch) in field.iter_mut().zip(text.chars()) {
        *slot = ascii_or_space(ch);
    }
    field
}

fn ascii_or_space(ch: char) -> u8 {
    if ch.is_ascii_graphic() {
        ch.to_ascii_uppercase() as u8
    } else {
        b' '
    }
}

fn field_text(field: &[u8]) -> String {
    String::from_utf8_lossy(field).trim_end().to_string()
}

fn require_len(bytes: &[u8], expected: usize) -> Result<()> {
    if bytes.len() < expected {
        return Err(WireError::Length {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> RadioHeader {
        RadioHeader::new("W1AW", 'B', "CQCQCQ", "N0CALL")
    }

    #[test]
    fn test_header_fields() {
        let header = sample_header();
        assert_eq!(&header.rpt1, b"W1AW   B");
        assert_eq!(&header.rpt2, b"W1AW   G");
        assert_eq!(&header.ur, b"CQCQCQ  ");
        assert_eq!(&header.my, b"N0CALL  ");
        assert_eq!(&header.suffix, b"    ");
        assert_eq!(header.destination(), "CQCQCQ");
        assert_eq!(header.source(), "N0CALL");
    }

    #[test]
    fn test_header_layout() {
        let packet = WirePacket::header(0x1234, sample_header());
        let bytes = packet.to_bytes();

        assert_eq!(bytes.len(), WIRE_PACKET_SIZE);
        assert_eq!(&bytes[0..4], b"DSVT");
        assert_eq!(bytes[4], CONFIG_HEADER);
        assert_eq!(bytes[8], PACKET_ID);
        assert_eq!(&bytes[9..12], &[0, 0, 1]);
        assert_eq!(&bytes[12..14], &[0x12, 0x34]);
        assert_eq!(bytes[14], HEADER_CTRL);
        assert_eq!(&bytes[18..26], b"W1AW   B");
        assert_eq!(&bytes[26..34], b"W1AW   G");
        assert_eq!(&bytes[34..42], b"CQCQCQ  ");
        assert_eq!(&bytes[42..50], b"N0CALL  ");
    }

    #[test]
    fn test_header_checksum_trailer() {
        let header = sample_header();
        let bytes = WirePacket::header(1, header.clone()).to_bytes();

        let expected = dstar_checksum(&bytes[15..54]);
        assert_eq!(u16::from_le_bytes([bytes[54], bytes[55]]), expected);
        assert_eq!(header.checksum(), expected);
        assert!(WirePacket::checksum_matches(&bytes));
    }

    #[test]
    fn test_corrupted_header_detected() {
        let mut bytes = WirePacket::header(1, sample_header()).to_bytes();
        bytes[40] ^= 0x01;
        assert!(!WirePacket::checksum_matches(&bytes));
    }

    #[test]
    fn test_voice_layout() {
        let frame = CompressedFrame::new([1, 2, 3, 4, 5, 6, 7, 8, 9], Sequence::from_count(20).with_end());
        let bytes = WirePacket::voice(0xBEEF, &frame).to_bytes();

        assert_eq!(bytes[4], CONFIG_VOICE);
        assert_eq!(&bytes[12..14], &[0xBE, 0xEF]);
        assert_eq!(bytes[14], 0x54);
        assert_eq!(&bytes[15..24], &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(&bytes[24..27], &VOICE_FILLER);
        assert!(bytes[27..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_voice_decode() {
        let frame = CompressedFrame::new([9; 9], Sequence::from_count(3));
        let packet = WirePacket::voice(77, &frame);
        let decoded = WirePacket::from_bytes(&packet.to_bytes()).expect("should decode");

        assert_eq!(decoded, packet);
        assert!(!decoded.is_header());
        assert!(!decoded.is_last());
        assert_eq!(decoded.voice_frame(), Some(frame));
    }

    #[test]
    fn test_short_voice_accepted() {
        let frame = CompressedFrame::silence(Sequence::from_count(0).with_end());
        let bytes = WirePacket::voice(5, &frame).to_bytes();
        let decoded = WirePacket::from_bytes(&bytes[..VOICE_PACKET_MIN_SIZE]).expect("should decode");
        assert!(decoded.is_last());
    }

    #[test]
    fn test_short_header_rejected() {
        let bytes = WirePacket::header(5, sample_header()).to_bytes();
        assert_eq!(
            WirePacket::from_bytes(&bytes[..40]),
            Err(WireError::Length {
                expected: WIRE_PACKET_SIZE,
                actual: 40
            })
        );
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = WirePacket::header(5, sample_header()).to_bytes();
        bytes[0] = b'X';
        assert!(matches!(WirePacket::from_bytes(&bytes), Err(WireError::Magic(_))));
    }

    #[test]
    fn test_unknown_config_rejected() {
        let mut bytes = WirePacket::header(5, sample_header()).to_bytes();
        bytes[4] = 0x33;
        assert_eq!(
            WirePacket::from_bytes(&bytes),
            Err(WireError::UnknownType(vec![0x33]))
        );
    }

    #[test]
    fn test_stream_id_nonzero() {
        for _ in 0..1000 {
            assert_ne!(new_stream_id(), 0);
        }
    }
}
