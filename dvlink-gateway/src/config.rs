//! Gateway configuration snapshot
//!
//! Built once at startup and handed to the engine; nothing mutates it while
//! the gateway runs.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use dvlink_common::local::{CHANNEL_AUDIO_TO_M17, CHANNEL_M17_TO_AUDIO};
use dvlink_common::{Callsign, DEFAULT_SOCKET_DIR, M17_PORT};

// =============================================================================
// Constants
// =============================================================================

/// Keepalive silence after which a link is considered lost
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Time a reflector has to answer a link request
pub const LINK_TIMEOUT: Duration = Duration::from_secs(5);

/// Silence after which an inbound stream is closed by the gateway
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on the wait between timer checks
pub const TICK_INTERVAL: Duration = Duration::from_millis(40);

/// Width of the callsign part of the source code (the module follows)
const SOURCE_CALLSIGN_WIDTH: usize = 8;

// =============================================================================
// Network Mode
// =============================================================================

/// Address families the gateway listens on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum NetworkMode {
    /// IPv4 only
    Ipv4,
    /// IPv6 only
    Ipv6,
    /// Both families, each on its own socket
    #[default]
    Dual,
}

impl NetworkMode {
    pub fn uses_ipv4(self) -> bool {
        matches!(self, NetworkMode::Ipv4 | NetworkMode::Dual)
    }

    pub fn uses_ipv6(self) -> bool {
        matches!(self, NetworkMode::Ipv6 | NetworkMode::Dual)
    }
}

// =============================================================================
// Gateway Config
// =============================================================================

/// Everything the gateway engine needs to run
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Station callsign used in link requests and keepalive answers
    pub callsign: String,
    /// Local module letter
    pub module: char,
    /// Address families to listen on
    pub network: NetworkMode,
    /// IPv4 listen address
    pub bind_v4: Ipv4Addr,
    /// IPv6 listen address
    pub bind_v6: Ipv6Addr,
    /// UDP port for both families (0 picks an ephemeral port)
    pub port: u16,
    /// Reflector that link requests are sent to
    pub reflector: SocketAddr,
    /// Directory holding the local channel sockets
    pub socket_dir: PathBuf,
    /// Announcement request file polled while running
    pub voice_file: Option<PathBuf>,
    pub keepalive_timeout: Duration,
    pub link_timeout: Duration,
    pub stream_timeout: Duration,
    pub tick_interval: Duration,
}

impl GatewayConfig {
    /// Create a config with default addresses and timers
    ///
    /// # Arguments
    ///
    /// * `callsign` - Station callsign (at most 8 characters are used)
    /// * `module` - Local module letter
    /// * `reflector_ip` - Reflector address; the standard M17 port is assumed
    pub fn new(callsign: &str, module: char, reflector_ip: IpAddr) -> Self {
        Self {
            callsign: callsign.to_string(),
            module,
            network: NetworkMode::default(),
            bind_v4: Ipv4Addr::UNSPECIFIED,
            bind_v6: Ipv6Addr::UNSPECIFIED,
            port: M17_PORT,
            reflector: SocketAddr::new(reflector_ip, M17_PORT),
            socket_dir: PathBuf::from(DEFAULT_SOCKET_DIR),
            voice_file: None,
            keepalive_timeout: KEEPALIVE_TIMEOUT,
            link_timeout: LINK_TIMEOUT,
            stream_timeout: STREAM_TIMEOUT,
            tick_interval: TICK_INTERVAL,
        }
    }

    /// Callsign sent in CONN and PONG: station callsign in eight
    /// characters followed by the local module
    pub fn source_callsign(&self) -> Callsign {
        Callsign::new(&self.callsign).with_module(self.module)
    }

    /// Socket the gateway receives local frames on
    pub fn inbound_channel(&self) -> PathBuf {
        self.socket_dir.join(CHANNEL_AUDIO_TO_M17)
    }

    /// Socket the gateway delivers frames and directives to
    pub fn outbound_channel(&self) -> PathBuf {
        self.socket_dir.join(CHANNEL_M17_TO_AUDIO)
    }
}

/// Whether `callsign` fits in the eight characters preceding the module
pub fn callsign_fits(callsign: &str) -> bool {
    !callsign.is_empty() && callsign.trim_end().len() <= SOURCE_CALLSIGN_WIDTH
}
