//! dvlink Gateway Library
//!
//! Bridges the local audio manager to M17 reflectors and gateways. This
//! library exposes the gateway's modules for the daemon and for integration
//! testing.

pub mod config;
pub mod engine;
pub mod error;
pub mod link;
pub mod local;
pub mod net;
pub mod relay;
pub mod route;

pub use config::{GatewayConfig, NetworkMode};
pub use engine::Gateway;
pub use error::{GatewayError, Result};
pub use link::LinkState;
pub use route::{InMemoryRouteTable, RouteTable};
