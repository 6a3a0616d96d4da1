//! The LTP controller: discovers sources and sinks, tracks their health,
//! and mates them via routes.
//!
//! A [`Controller`] aggregates discovery events into [`DeviceState`]
//! records with stable ids, fetches capabilities from new peers, and runs
//! an active health checker (mDNS removals are advisory only). The
//! [`RoutingEngine`] executes [`Route`]s on top of it: in proxy mode the
//! controller subscribes to the source, transforms frames
//! (scale/brightness/gamma/mirror), and forwards them to the sink; in
//! direct mode it instructs the source to send straight to the sink and
//! only supervises. Virtual sources render in-process through the same
//! transform path.
//!
//! Route supervisors never kill the engine: failures retry with
//! exponential backoff, and offline peers put the route into a
//! "waiting" state until the health checker sees them return.

pub mod admin;
pub mod config;
pub mod controller;
pub mod engine;
pub mod route;
pub mod transform;
pub mod virtual_source;

pub use config::ControllerFileConfig;
pub use controller::{Controller, ControllerConfig, DeviceState};
pub use engine::RoutingEngine;
pub use route::{Route, RouteMode, RouteStatus};
pub use virtual_source::VirtualSourceSpec;

/// Errors from controller and routing operations.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("route already exists: {source_id} -> {sink_id}")]
    RouteExists { source_id: String, sink_id: String },

    #[error("route not found: {0}")]
    RouteNotFound(String),

    #[error("unknown pattern: {0}")]
    UnknownPattern(String),

    #[error(transparent)]
    Transport(#[from] ltp_transport::TransportError),

    #[error(transparent)]
    Discovery(#[from] ltp_discovery::DiscoveryError),

    #[error("invalid configuration: {0}")]
    Config(String),
}
