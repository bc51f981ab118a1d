//! Audio manager configuration snapshot

use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use dvlink_common::DEFAULT_SOCKET_DIR;
use dvlink_common::dsvt::RadioHeader;
use dvlink_common::frame::FRAME_DURATION_MS;
use dvlink_common::local::{
    CHANNEL_AUDIO_TO_GATEWAY, CHANNEL_AUDIO_TO_LINK, CHANNEL_GATEWAY_TO_AUDIO,
    CHANNEL_LINK_TO_AUDIO,
};

// =============================================================================
// Constants
// =============================================================================

/// Poll interval for stages waiting on an empty queue
pub const CONSUMER_RETRY: Duration = Duration::from_millis(3);

/// Poll interval for the playback stage
pub const PLAYBACK_RETRY: Duration = Duration::from_millis(1);

/// Pause between the end of an echo recording and its replay
pub const ECHO_SETTLE: Duration = Duration::from_millis(200);

/// Audio buffered before the speaker is opened
pub const PLAYBACK_PREBUFFER: Duration = Duration::from_millis(300);

/// Quiet time after which an inbound stream is closed
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(2);

/// Silence frames in a quick-key transmission
pub const QUICK_KEY_FRAMES: usize = 10;

/// Destination used by quick-key when none is given
pub const QUICK_KEY_TARGET: &str = "CQCQCQ";

// =============================================================================
// Destination
// =============================================================================

/// Where a transmission goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Destination {
    /// Echo test: record, then play back locally
    Loopback,
    /// The sibling gateway
    Gateway,
    /// The link service
    Link,
}

// =============================================================================
// Audio Config
// =============================================================================

#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Station (repeater) callsign placed in the radio header
    pub station: String,
    /// Operator callsign placed in the radio header
    pub operator: String,
    /// Local module letter
    pub module: char,
    /// Directory holding the local channel sockets
    pub socket_dir: PathBuf,
    pub consumer_retry: Duration,
    pub playback_retry: Duration,
    pub echo_settle: Duration,
    pub playback_prebuffer: Duration,
    /// Quiet time after which an inbound stream is closed
    pub stream_timeout: Duration,
    /// Gap between packets of a quick-key transmission
    pub frame_pacing: Duration,
    /// Voice packets in a quick-key transmission (at least one is sent)
    pub quick_key_frames: usize,
}

impl AudioConfig {
    /// Create a config with default timings
    ///
    /// # Arguments
    ///
    /// * `station` - Station callsign
    /// * `operator` - Operator callsign
    /// * `module` - Local module letter
    pub fn new(station: &str, operator: &str, module: char) -> Self {
        Self {
            station: station.to_string(),
            operator: operator.to_string(),
            module,
            socket_dir: PathBuf::from(DEFAULT_SOCKET_DIR),
            consumer_retry: CONSUMER_RETRY,
            playback_retry: PLAYBACK_RETRY,
            echo_settle: ECHO_SETTLE,
            playback_prebuffer: PLAYBACK_PREBUFFER,
            stream_timeout: STREAM_TIMEOUT,
            frame_pacing: Duration::from_millis(FRAME_DURATION_MS),
            quick_key_frames: QUICK_KEY_FRAMES,
        }
    }

    /// Radio header for a transmission to `target`
    pub fn radio_header(&self, target: &str) -> RadioHeader {
        RadioHeader::new(&self.station, self.module, target, &self.operator)
    }

    /// Socket packets for `destination` are written to
    pub fn outbound_channel(&self, destination: Destination) -> Option<PathBuf> {
        match destination {
            Destination::Loopback => None,
            Destination::Gateway => Some(self.socket_dir.join(CHANNEL_AUDIO_TO_GATEWAY)),
            Destination::Link => Some(self.socket_dir.join(CHANNEL_AUDIO_TO_LINK)),
        }
    }

    /// Socket packets from `source` arrive on
    pub fn inbound_channel(&self, source: Destination) -> Option<PathBuf> {
        match source {
            Destination::Loopback => None,
            Destination::Gateway => Some(self.socket_dir.join(CHANNEL_GATEWAY_TO_AUDIO)),
            Destination::Link => Some(self.socket_dir.join(CHANNEL_LINK_TO_AUDIO)),
        }
    }
}
