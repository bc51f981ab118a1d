//! dvlink Audio Library
//!
//! Moves 20 ms voice frames between the sound card, the vocoder and the
//! local channels to the gateway and link services. Each pipeline stage runs
//! on its own thread; stages are connected by polled FIFO queues.

pub mod channel;
pub mod config;
#[cfg(feature = "cpal")]
pub mod cpal_backend;
pub mod device;
pub mod error;
pub mod manager;
pub mod queue;
pub mod stages;
pub mod vocoder;

pub use channel::{PacketSink, UnixSink};
pub use config::{AudioConfig, Destination};
pub use device::{AudioBackend, Signal, SyntheticBackend};
pub use error::{AudioError, DeviceError, Result, VocoderError};
pub use manager::AudioManager;
pub use vocoder::{LoopbackVocoder, Vocoder};
