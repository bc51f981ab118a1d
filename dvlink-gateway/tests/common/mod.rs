//! Shared harness for gateway integration tests
//!
//! Runs a real gateway on loopback with a fake reflector socket on one side
//! and a fake audio manager socket on the other.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dvlink_common::Callsign;
use dvlink_common::m17::M17Frame;
use dvlink_gateway::{Gateway, GatewayConfig, InMemoryRouteTable, NetworkMode, Result};
use tempfile::TempDir;
use tokio::net::{UdpSocket, UnixDatagram};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// How long a test waits for an expected datagram
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Station callsign the harness gateway runs as
pub const STATION: &str = "N0CALL";

/// Local module of the harness gateway
pub const MODULE: char = 'D';

pub struct Harness {
    pub dir: TempDir,
    pub gateway_addr: SocketAddr,
    pub reflector: UdpSocket,
    pub reflector_addr: SocketAddr,
    pub audio: UnixDatagram,
    pub routes: Arc<InMemoryRouteTable>,
    audio_out: UnixDatagram,
    inbound: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Start a gateway after letting the test adjust its configuration
    pub async fn start_with(configure: impl FnOnce(&mut GatewayConfig)) -> Self {
        let dir = TempDir::new().expect("temp dir");

        let reflector = UdpSocket::bind("127.0.0.1:0").await.expect("bind reflector");
        let reflector_addr = reflector.local_addr().expect("reflector addr");

        let mut config = GatewayConfig::new(STATION, MODULE, IpAddr::V4(Ipv4Addr::LOCALHOST));
        config.network = NetworkMode::Ipv4;
        config.bind_v4 = Ipv4Addr::LOCALHOST;
        config.port = 0;
        config.reflector = reflector_addr;
        config.socket_dir = dir.path().to_path_buf();
        configure(&mut config);

        let audio = UnixDatagram::bind(config.outbound_channel()).expect("bind audio socket");
        let inbound = config.inbound_channel();

        let routes = Arc::new(InMemoryRouteTable::new());
        let gateway = Gateway::bind(config, routes.clone()).expect("bind gateway");
        let gateway_addr = gateway
            .network()
            .local_addr_v4()
            .expect("gateway has an IPv4 socket");

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(gateway.run(async {
            let _ = rx.await;
        }));

        Self {
            dir,
            gateway_addr,
            reflector,
            reflector_addr,
            audio,
            routes,
            audio_out: UnixDatagram::unbound().expect("unbound socket"),
            inbound,
            shutdown: Some(tx),
            task,
        }
    }

    /// Send a datagram to the gateway as the reflector
    pub async fn reflector_send(&self, bytes: &[u8]) {
        self.reflector
            .send_to(bytes, self.gateway_addr)
            .await
            .expect("reflector send");
    }

    /// Next datagram the gateway sent to the reflector
    pub async fn reflector_recv(&self) -> Vec<u8> {
        recv_udp(&self.reflector).await
    }

    /// Send a datagram to the gateway as the audio manager
    pub async fn audio_send(&self, bytes: &[u8]) {
        self.audio_out
            .send_to(bytes, &self.inbound)
            .await
            .expect("audio send");
    }

    /// Next datagram the gateway delivered to the audio manager
    pub async fn audio_recv(&self) -> Vec<u8> {
        let mut buf = [0u8; 128];
        let len = tokio::time::timeout(RECV_TIMEOUT, self.audio.recv(&mut buf))
            .await
            .expect("timed out waiting for local datagram")
            .expect("audio recv");
        buf[..len].to_vec()
    }

    /// Stop the gateway and wait for it to exit
    pub async fn stop(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        (&mut self.task).await.expect("gateway task panicked")
    }

    /// Stop the gateway, then read what it sent the reflector on the way out
    pub async fn stop_and_drain_reflector(mut self) -> (Result<()>, Vec<u8>) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let result = (&mut self.task).await.expect("gateway task panicked");
        let sent = recv_udp(&self.reflector).await;
        (result, sent)
    }
}

/// Next datagram on `socket`, failing the test after [`RECV_TIMEOUT`]
pub async fn recv_udp(socket: &UdpSocket) -> Vec<u8> {
    let mut buf = [0u8; 128];
    let (len, _) = tokio::time::timeout(RECV_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for datagram")
        .expect("udp recv");
    buf[..len].to_vec()
}

/// A voice frame from the harness station to `dst`
pub fn voice_frame(stream_id: u16, number: u16, dst: &str) -> M17Frame {
    let mut frame = M17Frame::new(
        stream_id,
        &Callsign::new(dst),
        &Callsign::new("N0CALL  D"),
        0x0005,
    );
    frame.frame_number = number;
    frame.payload = [number as u8; 16];
    frame
}

/// Poll `check` until it holds or the receive timeout passes
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
