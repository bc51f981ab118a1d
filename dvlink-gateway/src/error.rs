//! Gateway error types

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use dvlink_common::WireError;
use thiserror::Error;

/// Result type alias for gateway operations.
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Errors that abort gateway setup or a single gateway operation
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// A UDP socket could not be created or bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The local channel socket could not be opened
    #[error("failed to open local channel {}: {source}", path.display())]
    LocalChannel {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Both address families were disabled
    #[error("no address family enabled")]
    NoNetwork,

    /// Destination address family has no socket
    #[error("no socket for address family of {0}")]
    NoSocketFor(SocketAddr),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Io(#[from] io::Error),
}
