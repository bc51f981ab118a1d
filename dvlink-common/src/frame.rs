//! Audio and compressed voice frames
//!
//! Every frame covers 20 ms of speech and carries a one-byte sequence tag.
//! Tags cycle through 0..=20; the terminal frame of a stream additionally has
//! the end marker bit (0x40) set.

// =============================================================================
// Constants
// =============================================================================

/// PCM sample rate in Hz
pub const SAMPLE_RATE: u32 = 8000;

/// Frame duration in milliseconds
pub const FRAME_DURATION_MS: u64 = 20;

/// Samples in one PCM frame (8 kHz mono, 20 ms)
pub const SAMPLES_PER_FRAME: usize = 160;

/// Bytes in one compressed vocoder frame
pub const COMPRESSED_FRAME_SIZE: usize = 9;

/// Number of distinct sequence values before the tag wraps
pub const SEQUENCE_CYCLE: u8 = 21;

/// Sequence bit marking the final frame of a stream
pub const END_MARKER: u8 = 0x40;

/// Compressed frame that decodes to silence
pub const SILENT_COMPRESSED: [u8; COMPRESSED_FRAME_SIZE] =
    [0x9E, 0x8D, 0x32, 0x88, 0x26, 0x1A, 0x3F, 0x61, 0xE8];

// =============================================================================
// Sequence
// =============================================================================

/// Sequence tag carried by every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Sequence(u8);

impl Sequence {
    /// Tag for the `count`th frame of a stream
    pub fn from_count(count: u64) -> Self {
        Self((count % u64::from(SEQUENCE_CYCLE)) as u8)
    }

    /// Wrap a raw tag byte as received on the wire
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Raw tag byte, end marker included
    pub fn to_byte(self) -> u8 {
        self.0
    }

    /// Position within the cycle, without the end marker
    pub fn value(self) -> u8 {
        self.0 & 0x3F
    }

    /// Whether this tag ends the stream
    pub fn is_end(self) -> bool {
        self.0 & END_MARKER != 0
    }

    /// Same position with the end marker set
    pub fn with_end(self) -> Self {
        Self(self.0 | END_MARKER)
    }
}

// =============================================================================
// Frames
// =============================================================================

/// 20 ms of 16-bit mono PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: [i16; SAMPLES_PER_FRAME],
    pub seq: Sequence,
}

impl AudioFrame {
    pub fn new(samples: [i16; SAMPLES_PER_FRAME], seq: Sequence) -> Self {
        Self { samples, seq }
    }

    /// A frame of digital silence
    pub fn silence(seq: Sequence) -> Self {
        Self {
            samples: [0; SAMPLES_PER_FRAME],
            seq,
        }
    }
}

/// One opaque vocoder payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedFrame {
    pub data: [u8; COMPRESSED_FRAME_SIZE],
    pub seq: Sequence,
}

impl CompressedFrame {
    pub fn new(data: [u8; COMPRESSED_FRAME_SIZE], seq: Sequence) -> Self {
        Self { data, seq }
    }

    /// A compressed frame that decodes to silence
    pub fn silence(seq: Sequence) -> Self {
        Self {
            data: SILENT_COMPRESSED,
            seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_cycle() {
        let tags: Vec<u8> = (0..42).map(|n| Sequence::from_count(n).to_byte()).collect();
        assert_eq!(&tags[..21], (0..21).collect::<Vec<u8>>().as_slice());
        assert_eq!(&tags[21..], (0..21).collect::<Vec<u8>>().as_slice());
    }

    #[test]
    fn test_end_marker() {
        let seq = Sequence::from_count(7);
        assert!(!seq.is_end());

        let last = seq.with_end();
        assert!(last.is_end());
        assert_eq!(last.value(), 7);
        assert_eq!(last.to_byte(), 0x47);
        assert_eq!(last.with_end(), last);
    }

    #[test]
    fn test_from_byte_preserves_marker() {
        let seq = Sequence::from_byte(0x54);
        assert!(seq.is_end());
        assert_eq!(seq.value(), 20);
    }

    #[test]
    fn test_frame_sizes() {
        assert_eq!(SAMPLES_PER_FRAME as u64, u64::from(SAMPLE_RATE) * FRAME_DURATION_MS / 1000);
        assert_eq!(AudioFrame::silence(Sequence::default()).samples.len(), 160);
        assert_eq!(CompressedFrame::silence(Sequence::default()).data.len(), 9);
    }
}
