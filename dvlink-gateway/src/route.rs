//! Route table collaborator
//!
//! The gateway asks the route table where a callsign lives and tells it when
//! a reflector link comes up or goes away. The table itself is owned
//! elsewhere; [`InMemoryRouteTable`] is the implementation the daemon seeds
//! from its command line.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock};

use dvlink_common::Callsign;

/// A link reservation recorded while a reflector link is up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Reflector callsign including its module
    pub target: Callsign,
    /// Local module the link was made from
    pub local_module: char,
}

/// Callsign to address lookup plus link bookkeeping
pub trait RouteTable: Send + Sync {
    /// Resolve a callsign to a network address
    fn find(&self, callsign: &Callsign) -> Option<SocketAddr>;

    /// Record that `peer` is now linked
    fn reserve(&self, peer: SocketAddr, reservation: Reservation);

    /// Drop any reservation held for `peer`
    fn release(&self, peer: SocketAddr);
}

// =============================================================================
// In-Memory Route Table
// =============================================================================

/// Thread-safe route table held in memory
#[derive(Debug, Default)]
pub struct InMemoryRouteTable {
    routes: RwLock<HashMap<Callsign, SocketAddr>>,
    reservations: RwLock<HashMap<SocketAddr, Reservation>>,
}

impl InMemoryRouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from static routes
    pub fn from_routes(routes: impl IntoIterator<Item = (Callsign, SocketAddr)>) -> Self {
        let table = Self::new();
        for (callsign, addr) in routes {
            table.insert(callsign, addr);
        }
        table
    }

    /// Add or replace a route
    pub fn insert(&self, callsign: Callsign, addr: SocketAddr) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(callsign, addr);
    }

    /// Current reservation for `peer`, if any
    pub fn reservation(&self, peer: SocketAddr) -> Option<Reservation> {
        self.reservations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&peer)
            .cloned()
    }

    /// Number of known routes
    pub fn len(&self) -> usize {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RouteTable for InMemoryRouteTable {
    fn find(&self, callsign: &Callsign) -> Option<SocketAddr> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(callsign)
            .copied()
    }

    fn reserve(&self, peer: SocketAddr, reservation: Reservation) {
        self.reservations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer, reservation);
    }

    fn release(&self, peer: SocketAddr) {
        self.reservations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&peer);
    }
}

/// Parse a `CALLSIGN=ADDRESS` route argument
pub fn parse_route(arg: &str) -> Result<(Callsign, SocketAddr), String> {
    let (callsign, addr) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected CALLSIGN=ADDRESS, got '{}'", arg))?;
    if callsign.trim().is_empty() {
        return Err("route callsign is empty".to_string());
    }
    let addr: SocketAddr = addr
        .trim()
        .parse()
        .map_err(|e| format!("invalid route address '{}': {}", addr, e))?;
    Ok((Callsign::new(callsign.trim()), addr))
}
