//! Error types for the audio pipeline

use std::io;
use std::path::PathBuf;

use dvlink_common::WireError;
use thiserror::Error;

use crate::config::Destination;

/// Audio hardware failures
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DeviceError {
    #[error("failed to open {direction} device: {reason}")]
    Open {
        direction: &'static str,
        reason: String,
    },

    #[error("capture overrun")]
    Overrun,

    #[error("playback underrun")]
    Underrun,

    #[error("short transfer: {actual} of {expected} samples")]
    Short { expected: usize, actual: usize },

    #[error("audio stream error: {0}")]
    Stream(String),
}

/// Vocoder device failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum VocoderError {
    #[error("vocoder device is not open")]
    NotOpen,

    #[error("vocoder device did not answer in time")]
    Timeout,
}

/// Errors surfaced by the audio manager
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AudioError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Vocoder(#[from] VocoderError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{0:?} does not take packets")]
    NotPacketDestination(Destination),

    #[error("no channel open for {0:?}")]
    NoChannel(Destination),

    #[error("a {0} session is still running")]
    Busy(&'static str),

    #[error("the {0} session was aborted")]
    Aborted(&'static str),

    #[error("no echo recording to play back")]
    NoRecording,

    #[error("{} holds no voice frames", .0.display())]
    EmptyVoiceFile(PathBuf),
}

pub type Result<T, E = AudioError> = std::result::Result<T, E>;
