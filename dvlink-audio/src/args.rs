//! Command-line argument parsing

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use dvlink_audio::config::{AudioConfig, Destination, QUICK_KEY_TARGET};
use dvlink_common::DEFAULT_SOCKET_DIR;

/// dvlink audio manager
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Station (repeater) callsign
    #[arg(short, long, value_parser = parse_callsign)]
    pub callsign: String,

    /// Operator callsign (defaults to the station callsign)
    #[arg(short, long, value_parser = parse_callsign)]
    pub operator: Option<String>,

    /// Local module letter
    #[arg(short, long, default_value_t = 'A')]
    pub module: char,

    /// Directory holding the local channel sockets
    #[arg(short = 's', long, default_value = DEFAULT_SOCKET_DIR)]
    pub socket_dir: PathBuf,

    /// Audio hardware to use
    #[arg(short, long, value_enum, default_value_t = BackendKind::Synthetic)]
    pub backend: BackendKind,

    /// Input device name (cpal backend)
    #[arg(long, default_value = "")]
    pub input_device: String,

    /// Output device name (cpal backend)
    #[arg(long, default_value = "")]
    pub output_device: String,

    /// Milliseconds to wait for the vocoder before retrying
    #[arg(long, default_value_t = 100)]
    pub vocoder_timeout: u64,

    /// Enable debug logging (shows every stage start and stop)
    #[arg(long, default_value = "false")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Record for a while, then play the recording back
    Echo {
        /// Seconds to record
        #[arg(short, long, default_value_t = 3)]
        seconds: u64,
    },
    /// Key up toward the gateway or link service for a while
    Transmit {
        #[arg(value_enum)]
        destination: Destination,
        /// Seconds to transmit
        #[arg(short, long, default_value_t = 3)]
        seconds: u64,
        /// Destination callsign
        #[arg(short, long, default_value = QUICK_KEY_TARGET)]
        target: String,
    },
    /// Send a short silent transmission
    QuickKey {
        #[arg(value_enum)]
        destination: Destination,
        /// Destination callsign
        #[arg(short, long, default_value = QUICK_KEY_TARGET)]
        target: String,
    },
    /// Play a stored voice file
    Play { path: PathBuf },
    /// Play streams arriving from the gateway and link services until stopped
    Listen,
    /// List sound card devices (cpal backend)
    Devices,
}

/// Audio hardware choices
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Clock-driven silence generator and discarding speaker
    Synthetic,
    /// Sound card through cpal
    Cpal,
}

impl Args {
    /// Snapshot the arguments into the manager configuration
    pub fn to_config(&self) -> AudioConfig {
        let operator = self.operator.as_deref().unwrap_or(&self.callsign);
        let mut config = AudioConfig::new(&self.callsign, operator, self.module);
        config.socket_dir = self.socket_dir.clone();
        config
    }

    pub fn vocoder_timeout(&self) -> Duration {
        Duration::from_millis(self.vocoder_timeout)
    }
}

fn parse_callsign(arg: &str) -> Result<String, String> {
    let valid = !arg.is_empty()
        && arg.len() <= 8
        && arg.chars().all(|c| c.is_ascii_alphanumeric() || c == '/');
    if valid {
        Ok(arg.to_ascii_uppercase())
    } else {
        Err(format!("'{}' is not a callsign of at most 8 characters", arg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_defaults_to_station() {
        let args = Args::parse_from(["dvaudio", "-c", "n0call", "echo"]);
        let config = args.to_config();
        assert_eq!(config.station, "N0CALL");
        assert_eq!(config.operator, "N0CALL");
        assert!(matches!(args.command, Command::Echo { seconds: 3 }));
    }

    #[test]
    fn test_transmit_subcommand() {
        let args = Args::parse_from([
            "dvaudio", "-c", "N0CALL", "-o", "W1AW", "transmit", "gateway", "-t", "REF001CL",
        ]);
        match args.command {
            Command::Transmit {
                destination,
                ref target,
                ..
            } => {
                assert_eq!(destination, Destination::Gateway);
                assert_eq!(target, "REF001CL");
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(args.to_config().operator, "W1AW");
    }

    #[test]
    fn test_rejects_long_callsign() {
        assert!(Args::try_parse_from(["dvaudio", "-c", "TOOLONGCALL", "listen"]).is_err());
    }
}
