//! Local channel to the audio manager
//!
//! The gateway binds its inbound Unix datagram socket and delivers frames and
//! directives to the audio manager's socket by path. Delivery is best-effort:
//! if nothing is listening the datagram is dropped and logged.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dvlink_common::local::LocalMessage;
use tokio::net::UnixDatagram;
use tracing::debug;

use crate::error::{GatewayError, Result};

/// Local channel endpoints
#[derive(Debug)]
pub struct LocalChannel {
    socket: Arc<UnixDatagram>,
    inbound: PathBuf,
    outbound: PathBuf,
}

impl LocalChannel {
    /// Bind `inbound`, replacing a stale socket file left by a previous run
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(inbound: &Path, outbound: &Path) -> Result<Self> {
        let open_error = |source: io::Error| GatewayError::LocalChannel {
            path: inbound.to_path_buf(),
            source,
        };

        if let Some(dir) = inbound.parent() {
            fs::create_dir_all(dir).map_err(open_error)?;
        }
        match fs::remove_file(inbound) {
            Ok(()) => debug!(path = %inbound.display(), "removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(open_error(e)),
        }

        let socket = UnixDatagram::bind(inbound).map_err(open_error)?;
        Ok(Self {
            socket: Arc::new(socket),
            inbound: inbound.to_path_buf(),
            outbound: outbound.to_path_buf(),
        })
    }

    /// Socket to read inbound datagrams from
    pub fn socket(&self) -> Arc<UnixDatagram> {
        self.socket.clone()
    }

    /// Deliver raw bytes to the audio manager
    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        self.socket.send_to(bytes, &self.outbound).await?;
        Ok(())
    }

    /// Deliver a message to the audio manager
    pub async fn send_message(&self, message: &LocalMessage) -> Result<()> {
        self.send(&message.to_bytes()).await
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.inbound);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_bind_replaces_stale_file() {
        let dir = TempDir::new().expect("temp dir");
        let inbound = dir.path().join("am2m17");
        fs::write(&inbound, b"stale").expect("write stale file");

        let channel = LocalChannel::bind(&inbound, &dir.path().join("m172am")).expect("bind");
        assert!(inbound.exists());
        drop(channel);
        assert!(!inbound.exists());
    }

    #[tokio::test]
    async fn test_send_delivers() {
        let dir = TempDir::new().expect("temp dir");
        let outbound = dir.path().join("m172am");
        let listener = UnixDatagram::bind(&outbound).expect("bind listener");

        let channel = LocalChannel::bind(&dir.path().join("am2m17"), &outbound).expect("bind");
        let message = LocalMessage::play("welcome").expect("fits");
        channel.send_message(&message).await.expect("send");

        let mut buf = [0u8; 64];
        let len = listener.recv(&mut buf).await.expect("recv");
        assert_eq!(LocalMessage::from_bytes(&buf[..len]), Ok(message));
    }

    #[tokio::test]
    async fn test_send_without_listener_fails() {
        let dir = TempDir::new().expect("temp dir");
        let channel = LocalChannel::bind(&dir.path().join("am2m17"), &dir.path().join("nobody"))
            .expect("bind");
        assert!(channel.send(b"PLAYx").await.is_err());
    }
}
