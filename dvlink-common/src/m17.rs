//! M17 stream frame format
//!
//! Wire format (54 bytes, multi-byte integers big-endian):
//! ```text
//! offset  size  field
//!      0     4  magic "M17 "
//!      4     2  stream id
//!      6     6  destination callsign (base-40)
//!     12     6  source callsign (base-40)
//!     18     2  frame type
//!     20    14  nonce (opaque)
//!     34     2  frame number (bit 15 marks the last frame)
//!     36    16  payload
//!     52     2  CRC over bytes 0..52
//! ```

use crate::callsign::{CALLSIGN_CODE_LEN, Callsign};
use crate::crc::m17_crc;
use crate::error::{Result, WireError};

// =============================================================================
// Constants
// =============================================================================

/// Frame magic
pub const M17_MAGIC: &[u8; 4] = b"M17 ";

/// Size of an M17 stream frame
pub const M17_FRAME_SIZE: usize = 54;

/// Payload bytes per frame
pub const M17_PAYLOAD_SIZE: usize = 16;

/// Nonce bytes per frame
pub const M17_NONCE_SIZE: usize = 14;

/// Frame number bit marking the end of a stream
pub const LAST_FRAME_BIT: u16 = 0x8000;

/// Codec2 3200 bit/s silence (one 20 ms sub-frame)
pub const SILENCE_3200: [u8; 8] = [0x01, 0x00, 0x09, 0x43, 0x9C, 0xE4, 0x21, 0x08];

/// Codec2 1600 bit/s silence (one 40 ms frame)
pub const SILENCE_1600: [u8; 8] = [0x01, 0x00, 0x04, 0x00, 0x25, 0x75, 0xDD, 0xF2];

const CRC_OFFSET: usize = 52;

// =============================================================================
// Mode
// =============================================================================

/// Payload mode, taken from bits 1..=2 of the frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadMode {
    /// Two 3200 bit/s codec sub-frames
    Voice3200,
    /// One 1600 bit/s codec frame followed by data
    Voice1600,
    /// Anything else; payload is passed through untouched
    Other(u16),
}

impl PayloadMode {
    pub fn from_frame_type(frame_type: u16) -> Self {
        match frame_type & 0x6 {
            0x4 => PayloadMode::Voice3200,
            0x6 => PayloadMode::Voice1600,
            other => PayloadMode::Other(other),
        }
    }

    /// Overwrite the voice portion of `payload` with silence for this mode
    pub fn fill_silence(self, payload: &mut [u8; M17_PAYLOAD_SIZE]) {
        match self {
            PayloadMode::Voice3200 => {
                payload[..8].copy_from_slice(&SILENCE_3200);
                payload[8..].copy_from_slice(&SILENCE_3200);
            }
            PayloadMode::Voice1600 => {
                payload[..8].copy_from_slice(&SILENCE_1600);
            }
            PayloadMode::Other(_) => {}
        }
    }
}

// =============================================================================
// Frame
// =============================================================================

/// An M17 stream frame
///
/// Callsign fields are kept as raw codes so reserved values such as the
/// broadcast address survive relaying untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct M17Frame {
    pub stream_id: u16,
    pub dst: [u8; CALLSIGN_CODE_LEN],
    pub src: [u8; CALLSIGN_CODE_LEN],
    pub frame_type: u16,
    pub nonce: [u8; M17_NONCE_SIZE],
    pub frame_number: u16,
    pub payload: [u8; M17_PAYLOAD_SIZE],
}

impl M17Frame {
    /// Create a frame addressed from `src` to `dst`
    pub fn new(stream_id: u16, dst: &Callsign, src: &Callsign, frame_type: u16) -> Self {
        Self {
            stream_id,
            dst: dst.code(),
            src: src.code(),
            frame_type,
            nonce: [0; M17_NONCE_SIZE],
            frame_number: 0,
            payload: [0; M17_PAYLOAD_SIZE],
        }
    }

    /// Destination callsign, if the code is in range
    pub fn destination(&self) -> Option<Callsign> {
        Callsign::from_bytes(&self.dst).ok()
    }

    /// Source callsign, if the code is in range
    pub fn source(&self) -> Option<Callsign> {
        Callsign::from_bytes(&self.src).ok()
    }

    pub fn mode(&self) -> PayloadMode {
        PayloadMode::from_frame_type(self.frame_type)
    }

    /// Whether this frame ends its stream
    pub fn is_last(&self) -> bool {
        self.frame_number & LAST_FRAME_BIT != 0
    }

    /// Build the frame that closes this stream after a timeout
    ///
    /// The frame number advances by one (wrapping within 15 bits) with the
    /// last-frame bit set, and the voice portion of the payload is replaced
    /// with silence for the current mode.
    pub fn terminator(&self) -> Self {
        let mut frame = self.clone();
        let next = ((self.frame_number & !LAST_FRAME_BIT).wrapping_add(1)) % LAST_FRAME_BIT;
        frame.frame_number = next | LAST_FRAME_BIT;
        frame.mode().fill_silence(&mut frame.payload);
        frame
    }

    /// Serialize to the wire form, computing the CRC trailer
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; M17_FRAME_SIZE];
        buf[0..4].copy_from_slice(M17_MAGIC);
        buf[4..6].copy_from_slice(&self.stream_id.to_be_bytes());
        buf[6..12].copy_from_slice(&self.dst);
        buf[12..18].copy_from_slice(&self.src);
        buf[18..20].copy_from_slice(&self.frame_type.to_be_bytes());
        buf[20..34].copy_from_slice(&self.nonce);
        buf[34..36].copy_from_slice(&self.frame_number.to_be_bytes());
        buf[36..52].copy_from_slice(&self.payload);
        let crc = m17_crc(&buf[..CRC_OFFSET]);
        buf[CRC_OFFSET..].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    /// Parse a frame and verify its CRC
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let frame = Self::from_bytes_unverified(bytes)?;
        let received = u16::from_be_bytes([bytes[CRC_OFFSET], bytes[CRC_OFFSET + 1]]);
        let computed = m17_crc(&bytes[..CRC_OFFSET]);
        if received != computed {
            return Err(WireError::Checksum { received, computed });
        }
        Ok(frame)
    }

    /// Parse a frame without checking its CRC
    pub fn from_bytes_unverified(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != M17_FRAME_SIZE {
            return Err(WireError::Length {
                expected: M17_FRAME_SIZE,
                actual: bytes.len(),
            });
        }
        if &bytes[0..4] != M17_MAGIC {
            return Err(WireError::Magic([bytes[0], bytes[1], bytes[2], bytes[3]]));
        }

        let mut dst = [0u8; CALLSIGN_CODE_LEN];
        dst.copy_from_slice(&bytes[6..12]);
        let mut src = [0u8; CALLSIGN_CODE_LEN];
        src.copy_from_slice(&bytes[12..18]);
        let mut nonce = [0u8; M17_NONCE_SIZE];
        nonce.copy_from_slice(&bytes[20..34]);
        let mut payload = [0u8; M17_PAYLOAD_SIZE];
        payload.copy_from_slice(&bytes[36..52]);

        Ok(Self {
            stream_id: u16::from_be_bytes([bytes[4], bytes[5]]),
            dst,
            src,
            frame_type: u16::from_be_bytes([bytes[18], bytes[19]]),
            nonce,
            frame_number: u16::from_be_bytes([bytes[34], bytes[35]]),
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> M17Frame {
        let mut frame = M17Frame::new(
            0x4242,
            &Callsign::new("M17-USA C"),
            &Callsign::new("N0CALL  D"),
            0x0005,
        );
        frame.frame_number = 7;
        frame.payload = [0xAA; M17_PAYLOAD_SIZE];
        frame
    }

    #[test]
    fn test_layout() {
        let frame = sample_frame();
        let bytes = frame.to_bytes();

        assert_eq!(bytes.len(), M17_FRAME_SIZE);
        assert_eq!(&bytes[0..4], b"M17 ");
        assert_eq!(&bytes[4..6], &[0x42, 0x42]);
        assert_eq!(&bytes[6..12], &Callsign::new("M17-USA C").code());
        assert_eq!(&bytes[18..20], &[0x00, 0x05]);
        assert_eq!(&bytes[34..36], &[0x00, 0x07]);
        assert_eq!(
            u16::from_be_bytes([bytes[52], bytes[53]]),
            m17_crc(&bytes[..52])
        );
    }

    #[test]
    fn test_decode_verifies_crc() {
        let frame = sample_frame();
        let mut bytes = frame.to_bytes();
        assert_eq!(M17Frame::from_bytes(&bytes).expect("should decode"), frame);

        bytes[40] ^= 0x80;
        assert!(matches!(
            M17Frame::from_bytes(&bytes),
            Err(WireError::Checksum { .. })
        ));
        assert!(M17Frame::from_bytes_unverified(&bytes).is_ok());
    }

    #[test]
    fn test_wrong_length_rejected() {
        let bytes = sample_frame().to_bytes();
        assert!(matches!(
            M17Frame::from_bytes(&bytes[..53]),
            Err(WireError::Length { expected: 54, actual: 53 })
        ));
    }

    #[test]
    fn test_callsign_accessors() {
        let frame = sample_frame();
        assert_eq!(frame.destination(), Some(Callsign::new("M17-USA C")));
        assert_eq!(frame.source(), Some(Callsign::new("N0CALL  D")));

        let mut broadcast = frame.clone();
        broadcast.dst = [0xFF; 6];
        assert_eq!(broadcast.destination(), None);
    }

    #[test]
    fn test_modes() {
        assert_eq!(PayloadMode::from_frame_type(0x0005), PayloadMode::Voice3200);
        assert_eq!(PayloadMode::from_frame_type(0x0007), PayloadMode::Voice1600);
        assert_eq!(PayloadMode::from_frame_type(0x0003), PayloadMode::Other(0x2));
    }

    #[test]
    fn test_terminator_3200() {
        let frame = sample_frame();
        let last = frame.terminator();

        assert!(last.is_last());
        assert_eq!(last.frame_number, 0x8008);
        assert_eq!(&last.payload[..8], &SILENCE_3200);
        assert_eq!(&last.payload[8..], &SILENCE_3200);
        assert_eq!(last.stream_id, frame.stream_id);
    }

    #[test]
    fn test_terminator_1600_keeps_data_half() {
        let mut frame = sample_frame();
        frame.frame_type = 0x0007;
        let last = frame.terminator();

        assert_eq!(&last.payload[..8], &SILENCE_1600);
        assert_eq!(&last.payload[8..], &[0xAA; 8]);
    }

    #[test]
    fn test_terminator_wraps_frame_number() {
        let mut frame = sample_frame();
        frame.frame_number = 0x7FFF;
        assert_eq!(frame.terminator().frame_number, 0x8000);
    }

    #[test]
    fn test_terminator_other_mode_untouched() {
        let mut frame = sample_frame();
        frame.frame_type = 0x0001;
        let last = frame.terminator();
        assert_eq!(last.payload, frame.payload);
        assert!(last.is_last());
    }
}
