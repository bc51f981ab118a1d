//! Error types for wire decoding

use thiserror::Error;

/// Result type alias for wire operations.
pub type Result<T, E = WireError> = std::result::Result<T, E>;

/// Errors raised while decoding or encoding wire structures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WireError {
    /// Datagram had the wrong size for the structure being decoded
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    /// Leading magic bytes did not match
    #[error("bad magic: {0:02x?}")]
    Magic([u8; 4]),

    /// Trailer checksum did not match the computed one
    #[error("checksum mismatch: received {received:#06x}, computed {computed:#06x}")]
    Checksum { received: u16, computed: u16 },

    /// Encoded callsign exceeds the base-40 range
    #[error("callsign code {0:#014x} out of range")]
    CallsignRange(u64),

    /// Unrecognized control tag or config byte
    #[error("unknown packet type {0:02x?}")]
    UnknownType(Vec<u8>),

    /// Directive text does not fit in a local frame
    #[error("directive too long: {len} bytes (max {max})")]
    DirectiveTooLong { len: usize, max: usize },
}
