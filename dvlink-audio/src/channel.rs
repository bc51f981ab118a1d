//! Local channels between the audio manager and its sibling services
//!
//! Outbound packets are written to a Unix datagram socket owned by the
//! receiving service. Inbound channels are bound here and drained by a
//! reader thread that hands each datagram to the audio manager.

use std::fs;
use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dvlink_common::local::MAX_LOCAL_DATAGRAM;
use tracing::{debug, info, warn};

use crate::config::Destination;
use crate::manager::AudioManager;

/// How often a reader re-checks its running flag while the channel is idle
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Where outbound packets for one destination are written
pub trait PacketSink: Send + Sync {
    fn send(&self, datagram: &[u8]) -> io::Result<()>;
}

/// Writes datagrams to a peer's socket path
pub struct UnixSink {
    socket: UnixDatagram,
    peer: PathBuf,
}

impl UnixSink {
    pub fn new(peer: impl Into<PathBuf>) -> io::Result<Self> {
        Ok(Self {
            socket: UnixDatagram::unbound()?,
            peer: peer.into(),
        })
    }

    pub fn peer(&self) -> &Path {
        &self.peer
    }
}

impl PacketSink for UnixSink {
    fn send(&self, datagram: &[u8]) -> io::Result<()> {
        self.socket.send_to(datagram, &self.peer).map(|_| ())
    }
}

/// Bind an inbound channel, replacing any stale socket file
pub fn bind_inbound(path: &Path) -> io::Result<UnixDatagram> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    let socket = UnixDatagram::bind(path)?;
    socket.set_read_timeout(Some(READ_TIMEOUT))?;
    Ok(socket)
}

/// Drain `socket` into `manager` until `running` clears
///
/// # Arguments
///
/// * `source` - Which service the channel carries packets from
/// * `socket` - Bound inbound channel
/// * `manager` - Audio manager that handles each datagram
/// * `running` - Cleared to stop the reader
pub fn spawn_reader(
    source: Destination,
    socket: UnixDatagram,
    manager: Arc<Mutex<AudioManager>>,
    running: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("dv-read-{:?}", source).to_lowercase())
        .spawn(move || {
            info!(?source, "listening for packets");
            let mut buf = [0u8; MAX_LOCAL_DATAGRAM];

            while running.load(Ordering::SeqCst) {
                let len = match socket.recv(&mut buf) {
                    Ok(len) => len,
                    Err(e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.kind() == io::ErrorKind::TimedOut =>
                    {
                        continue;
                    }
                    Err(e) => {
                        warn!(?source, "channel read failed: {}", e);
                        break;
                    }
                };

                let mut manager = manager.lock().unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = manager.handle_local(source, &buf[..len]) {
                    debug!(?source, len, "discarded local datagram: {}", e);
                }
            }

            debug!(?source, "reader stopped");
        })
}
