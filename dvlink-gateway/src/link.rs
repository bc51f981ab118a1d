//! Outbound reflector link state machine
//!
//! ```text
//!             request            ACKN
//! unlinked ------------> linking ------> linked
//!    ^                      |              |
//!    |   NACK, DISC or      |              |  DISC, or no PING
//!    +---- no answer -------+              |  within the keepalive timeout
//!    +-------------------------------------+
//! ```
//!
//! The state machine is pure: callers pass in the current time and act on
//! the returned [`LinkEvent`].

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use dvlink_common::Callsign;
use dvlink_common::control::ControlPacket;

/// Link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unlinked,
    Linking,
    Linked,
}

/// Why a link was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlinkReason {
    /// Reflector refused the request
    Refused,
    /// Reflector sent a disconnect
    Disconnected,
    /// No keepalive within the keepalive timeout
    KeepaliveTimeout,
    /// No answer to the link request
    NoAnswer,
}

/// Outcome of feeding the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Nothing changed and nothing needs sending
    Idle,
    /// Send `packet` to `peer`
    Reply { peer: SocketAddr, packet: ControlPacket },
    /// The reflector accepted the link
    Established { peer: SocketAddr, target: Callsign },
    /// The link is gone; `release` is set when a reservation was held
    Unlinked {
        peer: SocketAddr,
        target: Callsign,
        reason: UnlinkReason,
        release: bool,
    },
    /// Packet not valid in the current state or not from the peer
    Ignored,
}

/// The single outbound link this gateway maintains
#[derive(Debug)]
pub struct Link {
    state: LinkState,
    peer: Option<SocketAddr>,
    target: Option<Callsign>,
    /// Our callsign and module, carried in CONN and PONG
    source: Callsign,
    linking_since: Option<Instant>,
    last_ping: Option<Instant>,
    keepalive_timeout: Duration,
    link_timeout: Duration,
}

impl Link {
    pub fn new(source: Callsign, keepalive_timeout: Duration, link_timeout: Duration) -> Self {
        Self {
            state: LinkState::Unlinked,
            peer: None,
            target: None,
            source,
            linking_since: None,
            last_ping: None,
            keepalive_timeout,
            link_timeout,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Reflector callsign (with module) being linked or linked to
    pub fn target(&self) -> Option<Callsign> {
        self.target
    }

    /// Start linking to `target` at `peer`
    ///
    /// Returns the CONN packet to send, or `None` when a link already exists
    /// or is being set up.
    pub fn request(
        &mut self,
        peer: SocketAddr,
        target: Callsign,
        now: Instant,
    ) -> Option<ControlPacket> {
        if self.state != LinkState::Unlinked {
            return None;
        }

        self.state = LinkState::Linking;
        self.peer = Some(peer);
        self.target = Some(target);
        self.linking_since = Some(now);
        self.last_ping = None;

        Some(ControlPacket::Connect {
            callsign: self.source,
            module: target.module() as u8,
        })
    }

    /// Feed a control packet received from `from`
    pub fn on_control(&mut self, from: SocketAddr, packet: ControlPacket, now: Instant) -> LinkEvent {
        let (Some(peer), Some(target)) = (self.peer, self.target) else {
            return LinkEvent::Ignored;
        };
        if from != peer {
            return LinkEvent::Ignored;
        }

        match (self.state, packet) {
            (LinkState::Linking, ControlPacket::Ack) => {
                self.state = LinkState::Linked;
                self.linking_since = None;
                self.last_ping = Some(now);
                LinkEvent::Established { peer, target }
            }
            (LinkState::Linking, ControlPacket::Nack) => self.drop_link(UnlinkReason::Refused),
            // Only NACK or the link timer end a pending link
            (LinkState::Linked, ControlPacket::Disconnect)
            | (LinkState::Linked, ControlPacket::DisconnectFrom(_)) => {
                self.drop_link(UnlinkReason::Disconnected)
            }
            (LinkState::Linked, ControlPacket::Ping(_)) => {
                self.last_ping = Some(now);
                LinkEvent::Reply {
                    peer,
                    packet: ControlPacket::Pong(self.source),
                }
            }
            // A repeated ACKN changes nothing
            (LinkState::Linked, ControlPacket::Ack) => LinkEvent::Idle,
            _ => LinkEvent::Ignored,
        }
    }

    /// Expire the link if its timers have run out
    pub fn check_timers(&mut self, now: Instant) -> LinkEvent {
        match self.state {
            LinkState::Linked => {
                let last = self.last_ping.unwrap_or(now);
                if now.saturating_duration_since(last) > self.keepalive_timeout {
                    return self.drop_link(UnlinkReason::KeepaliveTimeout);
                }
            }
            LinkState::Linking => {
                let since = self.linking_since.unwrap_or(now);
                if now.saturating_duration_since(since) > self.link_timeout {
                    return self.drop_link(UnlinkReason::NoAnswer);
                }
            }
            LinkState::Unlinked => {}
        }
        LinkEvent::Idle
    }

    /// Packet asking the current peer to drop the link
    pub fn disconnect_packet(&self) -> Option<(SocketAddr, ControlPacket)> {
        match (self.state, self.peer, self.target) {
            (LinkState::Linking | LinkState::Linked, Some(peer), Some(target)) => {
                Some((peer, ControlPacket::DisconnectFrom(target)))
            }
            _ => None,
        }
    }

    fn drop_link(&mut self, reason: UnlinkReason) -> LinkEvent {
        let release = self.state == LinkState::Linked;
        let event = match (self.peer.take(), self.target.take()) {
            (Some(peer), Some(target)) => LinkEvent::Unlinked {
                peer,
                target,
                reason,
                release,
            },
            _ => LinkEvent::Idle,
        };
        self.state = LinkState::Unlinked;
        self.linking_since = None;
        self.last_ping = None;
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEEPALIVE: Duration = Duration::from_secs(30);
    const LINK: Duration = Duration::from_secs(5);

    fn peer() -> SocketAddr {
        "192.0.2.10:17000".parse().expect("valid address")
    }

    fn target() -> Callsign {
        Callsign::new("M17-USA C")
    }

    fn source() -> Callsign {
        Callsign::new("N0CALL  D")
    }

    fn linked(now: Instant) -> Link {
        let mut link = Link::new(source(), KEEPALIVE, LINK);
        link.request(peer(), target(), now);
        link.on_control(peer(), ControlPacket::Ack, now);
        link
    }

    #[test]
    fn test_request_sends_connect() {
        let mut link = Link::new(source(), KEEPALIVE, LINK);
        let packet = link.request(peer(), target(), Instant::now());

        assert_eq!(
            packet,
            Some(ControlPacket::Connect {
                callsign: source(),
                module: b'C'
            })
        );
        assert_eq!(link.state(), LinkState::Linking);
        assert_eq!(link.peer(), Some(peer()));
        assert_eq!(link.target(), Some(target()));
    }

    #[test]
    fn test_request_while_linking_ignored() {
        let now = Instant::now();
        let mut link = Link::new(source(), KEEPALIVE, LINK);
        link.request(peer(), target(), now);
        assert!(link.request(peer(), Callsign::new("M17-XYZ A"), now).is_none());
        assert_eq!(link.target(), Some(target()));
    }

    #[test]
    fn test_ack_links() {
        let now = Instant::now();
        let mut link = Link::new(source(), KEEPALIVE, LINK);
        link.request(peer(), target(), now);

        let event = link.on_control(peer(), ControlPacket::Ack, now);
        assert_eq!(
            event,
            LinkEvent::Established {
                peer: peer(),
                target: target()
            }
        );
        assert_eq!(link.state(), LinkState::Linked);
    }

    #[test]
    fn test_nack_unlinks_without_release() {
        let now = Instant::now();
        let mut link = Link::new(source(), KEEPALIVE, LINK);
        link.request(peer(), target(), now);

        let event = link.on_control(peer(), ControlPacket::Nack, now);
        assert_eq!(
            event,
            LinkEvent::Unlinked {
                peer: peer(),
                target: target(),
                reason: UnlinkReason::Refused,
                release: false
            }
        );
        assert_eq!(link.state(), LinkState::Unlinked);
        assert_eq!(link.peer(), None);
    }

    #[test]
    fn test_control_from_stranger_ignored() {
        let now = Instant::now();
        let mut link = Link::new(source(), KEEPALIVE, LINK);
        link.request(peer(), target(), now);

        let stranger: SocketAddr = "192.0.2.99:17000".parse().expect("valid address");
        assert_eq!(
            link.on_control(stranger, ControlPacket::Ack, now),
            LinkEvent::Ignored
        );
        assert_eq!(link.state(), LinkState::Linking);
    }

    #[test]
    fn test_control_while_unlinked_ignored() {
        let mut link = Link::new(source(), KEEPALIVE, LINK);
        assert_eq!(
            link.on_control(peer(), ControlPacket::Ack, Instant::now()),
            LinkEvent::Ignored
        );
    }

    #[test]
    fn test_ping_while_linking_ignored() {
        let now = Instant::now();
        let mut link = Link::new(source(), KEEPALIVE, LINK);
        link.request(peer(), target(), now);
        assert_eq!(
            link.on_control(peer(), ControlPacket::Ping(target()), now),
            LinkEvent::Ignored
        );
    }

    #[test]
    fn test_disconnect_while_linking_ignored() {
        let now = Instant::now();
        let mut link = Link::new(source(), KEEPALIVE, LINK);
        link.request(peer(), target(), now);

        assert_eq!(
            link.on_control(peer(), ControlPacket::Disconnect, now),
            LinkEvent::Ignored
        );
        assert_eq!(link.state(), LinkState::Linking);
        assert!(matches!(
            link.on_control(peer(), ControlPacket::Ack, now),
            LinkEvent::Established { .. }
        ));
    }

    #[test]
    fn test_ping_answered_with_pong() {
        let now = Instant::now();
        let mut link = linked(now);

        let event = link.on_control(peer(), ControlPacket::Ping(target()), now);
        assert_eq!(
            event,
            LinkEvent::Reply {
                peer: peer(),
                packet: ControlPacket::Pong(source())
            }
        );
    }

    #[test]
    fn test_keepalive_timeout() {
        let start = Instant::now();
        let mut link = linked(start);

        assert_eq!(link.check_timers(start + Duration::from_secs(30)), LinkEvent::Idle);
        assert_eq!(link.state(), LinkState::Linked);

        let event = link.check_timers(start + Duration::from_secs(31));
        assert_eq!(
            event,
            LinkEvent::Unlinked {
                peer: peer(),
                target: target(),
                reason: UnlinkReason::KeepaliveTimeout,
                release: true
            }
        );
        assert_eq!(link.state(), LinkState::Unlinked);
    }

    #[test]
    fn test_ping_resets_keepalive() {
        let start = Instant::now();
        let mut link = linked(start);

        link.on_control(peer(), ControlPacket::Ping(target()), start + Duration::from_secs(20));
        assert_eq!(link.check_timers(start + Duration::from_secs(45)), LinkEvent::Idle);
        assert_eq!(link.state(), LinkState::Linked);
    }

    #[test]
    fn test_disconnect_releases() {
        let now = Instant::now();
        let mut link = linked(now);

        let event = link.on_control(peer(), ControlPacket::DisconnectFrom(target()), now);
        assert!(matches!(
            event,
            LinkEvent::Unlinked {
                reason: UnlinkReason::Disconnected,
                release: true,
                ..
            }
        ));

        let mut link = linked(now);
        let event = link.on_control(peer(), ControlPacket::Disconnect, now);
        assert!(matches!(event, LinkEvent::Unlinked { release: true, .. }));
    }

    #[test]
    fn test_linking_timeout() {
        let start = Instant::now();
        let mut link = Link::new(source(), KEEPALIVE, LINK);
        link.request(peer(), target(), start);

        assert_eq!(link.check_timers(start + Duration::from_secs(4)), LinkEvent::Idle);
        let event = link.check_timers(start + Duration::from_secs(6));
        assert!(matches!(
            event,
            LinkEvent::Unlinked {
                reason: UnlinkReason::NoAnswer,
                release: false,
                ..
            }
        ));
        assert_eq!(link.state(), LinkState::Unlinked);
    }

    #[test]
    fn test_relink_after_unlink() {
        let now = Instant::now();
        let mut link = Link::new(source(), KEEPALIVE, LINK);
        link.request(peer(), target(), now);
        link.on_control(peer(), ControlPacket::Nack, now);

        assert!(link.request(peer(), target(), now).is_some());
    }

    #[test]
    fn test_disconnect_packet() {
        let now = Instant::now();
        let link = Link::new(source(), KEEPALIVE, LINK);
        assert!(link.disconnect_packet().is_none());

        let link = linked(now);
        assert_eq!(
            link.disconnect_packet(),
            Some((peer(), ControlPacket::DisconnectFrom(target())))
        );
    }
}
