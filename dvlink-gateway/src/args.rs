//! Command-line argument parsing

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use dvlink_common::{Callsign, DEFAULT_SOCKET_DIR, M17_PORT};
use dvlink_gateway::config::{GatewayConfig, NetworkMode, callsign_fits};
use dvlink_gateway::route::parse_route;

/// dvlink M17 gateway daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Station callsign (at most 8 characters)
    #[arg(short, long, value_parser = parse_station_callsign)]
    pub callsign: String,

    /// Local module letter
    #[arg(short, long, default_value_t = 'A')]
    pub module: char,

    /// Reflector address link requests are sent to
    #[arg(short, long)]
    pub reflector: IpAddr,

    /// Reflector port
    #[arg(long, default_value_t = M17_PORT)]
    pub reflector_port: u16,

    /// UDP port to listen on
    #[arg(short, long, default_value_t = M17_PORT)]
    pub port: u16,

    /// IPv4 address to bind to
    #[arg(long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    pub bind_v4: Ipv4Addr,

    /// IPv6 address to bind to
    #[arg(long, default_value_t = Ipv6Addr::UNSPECIFIED)]
    pub bind_v6: Ipv6Addr,

    /// Address families to listen on
    #[arg(short, long, value_enum, default_value_t = NetworkMode::Dual)]
    pub network: NetworkMode,

    /// Directory holding the audio manager sockets
    #[arg(short = 's', long, default_value = DEFAULT_SOCKET_DIR)]
    pub socket_dir: PathBuf,

    /// File polled for announcement requests
    #[arg(long)]
    pub voice_file: Option<PathBuf>,

    /// Static route to another gateway, as CALLSIGN=ADDRESS (repeatable)
    #[arg(long = "route", value_parser = parse_route)]
    pub routes: Vec<(Callsign, SocketAddr)>,

    /// Enable debug logging (shows every control packet and stream event)
    #[arg(long, default_value = "false")]
    pub debug: bool,
}

impl Args {
    /// Snapshot the arguments into the engine configuration
    pub fn to_config(&self) -> GatewayConfig {
        let mut config = GatewayConfig::new(&self.callsign, self.module, self.reflector);
        config.reflector = SocketAddr::new(self.reflector, self.reflector_port);
        config.network = self.network;
        config.bind_v4 = self.bind_v4;
        config.bind_v6 = self.bind_v6;
        config.port = self.port;
        config.socket_dir = self.socket_dir.clone();
        config.voice_file = self.voice_file.clone();
        config
    }
}

fn parse_station_callsign(arg: &str) -> Result<String, String> {
    if callsign_fits(arg) {
        Ok(arg.to_string())
    } else {
        Err(format!("'{}' is not a callsign of 1 to 8 characters", arg))
    }
}
