//! dvlink Common Library
//!
//! Shared types, wire formats and primitives for the dvlink digital-voice
//! gateway and its audio pipeline.

pub mod callsign;
pub mod control;
pub mod crc;
pub mod dsvt;
mod error;
pub mod frame;
pub mod local;
pub mod m17;

pub use callsign::Callsign;
pub use error::{Result, WireError};

/// UDP port used by M17 reflectors and gateways
pub const M17_PORT: u16 = 17000;

/// Default directory holding the local inter-process sockets
pub const DEFAULT_SOCKET_DIR: &str = "/tmp/dvlink";
