//! Dual-stack UDP sockets
//!
//! IPv4 and IPv6 each get their own socket on the same port. The IPv6 socket
//! is created with `IPV6_V6ONLY` so both binds can succeed side by side.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};

/// Largest datagram the gateway expects to read
pub const MAX_DATAGRAM: usize = 100;

/// The gateway's network sockets
#[derive(Debug, Clone)]
pub struct Network {
    v4: Option<Arc<UdpSocket>>,
    v6: Option<Arc<UdpSocket>>,
}

impl Network {
    /// Bind the sockets selected by `config.network`
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: &GatewayConfig) -> Result<Self> {
        let v4 = if config.network.uses_ipv4() {
            let addr = SocketAddr::new(config.bind_v4.into(), config.port);
            Some(Arc::new(bind_udp(addr).map_err(|source| GatewayError::Bind { addr, source })?))
        } else {
            None
        };

        let v6 = if config.network.uses_ipv6() {
            let addr = SocketAddr::new(config.bind_v6.into(), config.port);
            Some(Arc::new(bind_udp(addr).map_err(|source| GatewayError::Bind { addr, source })?))
        } else {
            None
        };

        if v4.is_none() && v6.is_none() {
            return Err(GatewayError::NoNetwork);
        }

        Ok(Self { v4, v6 })
    }

    pub fn ipv4(&self) -> Option<Arc<UdpSocket>> {
        self.v4.clone()
    }

    pub fn ipv6(&self) -> Option<Arc<UdpSocket>> {
        self.v6.clone()
    }

    /// Bound address of the IPv4 socket
    pub fn local_addr_v4(&self) -> Option<SocketAddr> {
        self.v4.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Bound address of the IPv6 socket
    pub fn local_addr_v6(&self) -> Option<SocketAddr> {
        self.v6.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Send a datagram on the socket matching the destination's family
    pub async fn send_to(&self, bytes: &[u8], addr: SocketAddr) -> Result<()> {
        let socket = match addr {
            SocketAddr::V4(_) => self.v4.as_ref(),
            SocketAddr::V6(_) => self.v6.as_ref(),
        }
        .ok_or(GatewayError::NoSocketFor(addr))?;

        socket.send_to(bytes, addr).await?;
        debug!(%addr, len = bytes.len(), "sent datagram");
        Ok(())
    }
}

/// Receive from an optional socket; a missing socket never becomes readable
pub async fn recv_from(
    socket: Option<&UdpSocket>,
    buf: &mut [u8],
) -> io::Result<(usize, SocketAddr)> {
    match socket {
        Some(socket) => socket.recv_from(buf).await,
        None => std::future::pending().await,
    }
}

fn bind_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}
