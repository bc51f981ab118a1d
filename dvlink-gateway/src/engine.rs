//! Gateway engine
//!
//! A single task owns all gateway state and wakes on any of:
//!
//! - a datagram on the IPv4 or IPv6 socket
//! - a frame from the audio manager on the local channel
//! - the timer tick, which expires links, closes stalled streams and polls
//!   the announcement request file
//!
//! Because one task owns the link and relay state, neither needs locking.
//!
//! ## Network traffic, dispatched by length
//!
//! - 4 bytes: ACKN / NACK / DISC, honored while linking or linked
//! - 10 bytes: PING / DISC, honored while linked
//! - 54 bytes: an M17 stream frame, relayed to the audio manager
//!
//! ## Local traffic, routed by destination callsign
//!
//! - `M17…` destinations go to the linked reflector, or start a link when
//!   the ninth character is `L`
//! - `U` asks the linked reflector to disconnect
//! - anything else is looked up in the route table

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use dvlink_common::control::{ADDRESSED_CONTROL_SIZE, ControlPacket, SHORT_CONTROL_SIZE};
use dvlink_common::local::{LocalMessage, MAX_LOCAL_DATAGRAM};
use dvlink_common::m17::{M17_FRAME_SIZE, M17Frame};
use dvlink_common::{Callsign, WireError};
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::link::{Link, LinkEvent, LinkState};
use crate::local::LocalChannel;
use crate::net::{self, MAX_DATAGRAM, Network};
use crate::relay::{RelayDecision, RelaySession};
use crate::route::{Reservation, RouteTable};

/// Prefix shared by reflector callsigns
const REFLECTOR_PREFIX: &str = "M17";

/// Ninth-character flag asking to link to the addressed reflector
const LINK_FLAG: char = 'L';

/// Index of the reflector module in a link request destination
const LINK_MODULE_INDEX: usize = 7;

/// Minimum announcement length worth playing
const MIN_ANNOUNCEMENT_LEN: usize = 3;

/// The M17 gateway
pub struct Gateway {
    config: GatewayConfig,
    routes: Arc<dyn RouteTable>,
    link: Link,
    relay: RelaySession,
    net: Network,
    local: LocalChannel,
}

impl Gateway {
    /// Assemble a gateway from already-open sockets
    pub fn new(
        config: GatewayConfig,
        routes: Arc<dyn RouteTable>,
        net: Network,
        local: LocalChannel,
    ) -> Self {
        let link = Link::new(
            config.source_callsign(),
            config.keepalive_timeout,
            config.link_timeout,
        );
        let relay = RelaySession::new(config.stream_timeout);
        Self {
            config,
            routes,
            link,
            relay,
            net,
            local,
        }
    }

    /// Open the network sockets and local channel described by `config`
    ///
    /// Any failure here is fatal: nothing has started yet.
    pub fn bind(config: GatewayConfig, routes: Arc<dyn RouteTable>) -> Result<Self> {
        let net = Network::bind(&config)?;
        let local = LocalChannel::bind(&config.inbound_channel(), &config.outbound_channel())?;
        Ok(Self::new(config, routes, net, local))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn network(&self) -> &Network {
        &self.net
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    /// Stream id of the inbound stream being relayed
    pub fn active_stream(&self) -> Option<u16> {
        self.relay.active_stream()
    }

    // =========================================================================
    // Run Loop
    // =========================================================================

    /// Run until `shutdown` completes
    ///
    /// On the way out an established or pending link is told to disconnect.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let v4 = self.net.ipv4();
        let v6 = self.net.ipv6();
        let local = self.local.socket();

        let mut buf4 = [0u8; MAX_DATAGRAM];
        let mut buf6 = [0u8; MAX_DATAGRAM];
        let mut local_buf = [0u8; MAX_LOCAL_DATAGRAM];

        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tokio::pin!(shutdown);

        info!(
            v4 = ?self.net.local_addr_v4(),
            v6 = ?self.net.local_addr_v6(),
            source = %self.config.source_callsign(),
            "gateway running"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tick.tick() => self.tick(Instant::now()).await,
                result = net::recv_from(v4.as_deref(), &mut buf4) => {
                    self.on_recv(result, &buf4).await;
                }
                result = net::recv_from(v6.as_deref(), &mut buf6) => {
                    self.on_recv(result, &buf6).await;
                }
                result = local.recv(&mut local_buf) => match result {
                    Ok(len) => self.handle_local(&local_buf[..len], Instant::now()).await,
                    Err(e) => warn!("local channel receive failed: {}", e),
                },
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn on_recv(&mut self, result: io::Result<(usize, SocketAddr)>, buf: &[u8]) {
        match result {
            Ok((len, from)) => self.handle_datagram(&buf[..len], from, Instant::now()).await,
            Err(e) => warn!("network receive failed: {}", e),
        }
    }

    /// Disconnect an active or pending link
    pub async fn shutdown(&mut self) {
        if let Some((peer, packet)) = self.link.disconnect_packet() {
            info!(%peer, "disconnecting from reflector");
            self.send_network(&packet.to_bytes(), peer).await;
        }
        if self.link.state() == LinkState::Linked {
            if let Some(peer) = self.link.peer() {
                self.routes.release(peer);
            }
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    /// Periodic work: link timers, stalled streams, announcement requests
    pub async fn tick(&mut self, now: Instant) {
        let event = self.link.check_timers(now);
        self.apply_link_event(event).await;

        if let Some(terminator) = self.relay.check_timeout(now) {
            info!(
                stream = format_args!("{:#06x}", terminator.stream_id),
                "stream timed out, sending closing frame"
            );
            self.send_local(&terminator.to_bytes()).await;
        }

        self.poll_voice_file().await;
    }

    async fn poll_voice_file(&self) {
        let Some(path) = &self.config.voice_file else {
            return;
        };

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(path = %path.display(), "failed to read voice file: {}", e);
                String::new()
            }
        };

        let line = content.lines().next().unwrap_or_default().trim();
        if line.len() >= MIN_ANNOUNCEMENT_LEN {
            self.play_announcement(line).await;
        }

        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), "failed to remove voice file: {}", e);
        }
    }

    /// Ask the audio manager to play an announcement
    pub async fn play_announcement(&self, text: &str) {
        match LocalMessage::play(text) {
            Ok(message) => {
                info!(text, "playing announcement");
                self.send_local(&message.to_bytes()).await;
            }
            Err(e) => warn!("announcement rejected: {}", e),
        }
    }

    // =========================================================================
    // Network Traffic
    // =========================================================================

    /// Handle one datagram from the network
    pub async fn handle_datagram(&mut self, bytes: &[u8], from: SocketAddr, now: Instant) {
        match bytes.len() {
            SHORT_CONTROL_SIZE | ADDRESSED_CONTROL_SIZE => match ControlPacket::from_bytes(bytes) {
                Ok(packet) => {
                    let event = self.link.on_control(from, packet, now);
                    if event == LinkEvent::Ignored {
                        debug!(%from, tag = ?packet.tag(), state = ?self.link.state(), "control packet ignored");
                    }
                    self.apply_link_event(event).await;
                }
                Err(e) => debug!(%from, len = bytes.len(), "unknown control packet: {}", e),
            },
            M17_FRAME_SIZE => self.handle_frame(bytes, from, now).await,
            len => debug!(%from, len, "unknown packet size"),
        }
    }

    async fn handle_frame(&mut self, bytes: &[u8], from: SocketAddr, now: Instant) {
        let frame = match M17Frame::from_bytes(bytes) {
            Ok(frame) => frame,
            Err(e @ WireError::Checksum { .. }) => {
                warn!(%from, "discarding frame: {}", e);
                return;
            }
            Err(e) => {
                debug!(%from, "discarding frame: {}", e);
                return;
            }
        };

        match self.relay.on_frame(&frame, now) {
            RelayDecision::Foreign { active } => {
                debug!(
                    %from,
                    stream = format_args!("{:#06x}", frame.stream_id),
                    active = format_args!("{:#06x}", active),
                    "dropping frame from a second stream"
                );
            }
            decision => {
                if decision == RelayDecision::Opened {
                    info!(
                        %from,
                        stream = format_args!("{:#06x}", frame.stream_id),
                        src = %frame.source().map(|cs| cs.to_string()).unwrap_or_default(),
                        "inbound stream started"
                    );
                } else if decision == RelayDecision::Closed {
                    debug!(stream = format_args!("{:#06x}", frame.stream_id), "inbound stream ended");
                }
                self.send_local(bytes).await;
            }
        }
    }

    async fn apply_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Idle | LinkEvent::Ignored => {}
            LinkEvent::Reply { peer, packet } => {
                self.send_network(&packet.to_bytes(), peer).await;
            }
            LinkEvent::Established { peer, target } => {
                info!(%peer, %target, "linked to reflector");
                self.routes.reserve(
                    peer,
                    Reservation {
                        target,
                        local_module: self.config.module,
                    },
                );
            }
            LinkEvent::Unlinked {
                peer,
                target,
                reason,
                release,
            } => {
                info!(%peer, %target, ?reason, "unlinked from reflector");
                if release {
                    self.routes.release(peer);
                }
            }
        }
    }

    // =========================================================================
    // Local Traffic
    // =========================================================================

    /// Handle one datagram from the audio manager
    pub async fn handle_local(&mut self, bytes: &[u8], now: Instant) {
        match LocalMessage::from_bytes(bytes) {
            Ok(LocalMessage::M17(frame)) => self.route_local_frame(&frame, bytes, now).await,
            Ok(other) => debug!(message = ?other, "unexpected local message"),
            Err(e) => debug!(len = bytes.len(), "undecodable local datagram: {}", e),
        }
    }

    async fn route_local_frame(&mut self, frame: &M17Frame, bytes: &[u8], now: Instant) {
        let Some(dest) = frame.destination() else {
            debug!(dst = ?frame.dst, "local frame has no usable destination");
            return;
        };

        if dest.prefix(REFLECTOR_PREFIX.len()) == REFLECTOR_PREFIX {
            match self.link.state() {
                LinkState::Linked => match (self.link.peer(), self.link.target()) {
                    (Some(peer), Some(target)) if target == dest => {
                        self.send_network(bytes, peer).await;
                    }
                    _ => debug!(%dest, "frame is not for the linked reflector"),
                },
                LinkState::Unlinked => {
                    if dest.module() == LINK_FLAG {
                        let module = dest.char_at(LINK_MODULE_INDEX).unwrap_or(' ');
                        let target = Callsign::new(dest.prefix(LINK_MODULE_INDEX)).with_module(module);
                        self.request_link(target, now).await;
                    }
                }
                LinkState::Linking => {}
            }
        } else if dest == Callsign::new("U") {
            match self.link.disconnect_packet() {
                Some((peer, packet)) => {
                    info!(%peer, "unlink requested");
                    self.send_network(&packet.to_bytes(), peer).await;
                }
                None => debug!("unlink requested with no link"),
            }
        } else if let Some(addr) = self.routes.find(&dest) {
            self.send_network(bytes, addr).await;
        } else {
            debug!(%dest, "no route for destination");
        }
    }

    async fn request_link(&mut self, target: Callsign, now: Instant) {
        let peer = self.config.reflector;
        if let Some(packet) = self.link.request(peer, target, now) {
            info!(%peer, %target, "requesting link");
            self.send_network(&packet.to_bytes(), peer).await;
        }
    }

    // =========================================================================
    // Sending
    // =========================================================================

    async fn send_network(&self, bytes: &[u8], addr: SocketAddr) {
        if let Err(e) = self.net.send_to(bytes, addr).await {
            warn!(%addr, "send failed: {}", e);
        }
    }

    async fn send_local(&self, bytes: &[u8]) {
        if let Err(e) = self.local.send(bytes).await {
            debug!("audio manager unreachable: {}", e);
        }
    }
}
