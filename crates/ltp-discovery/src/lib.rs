//! DNS-SD/mDNS discovery for LTP devices.
//!
//! Three service types ride on mDNS:
//!
//! - `_ltp-sink._tcp.local.`
//! - `_ltp-source._tcp.local.`
//! - `_ltp-controller._tcp.local.`
//!
//! A [`ServiceAdvertiser`] registers one instance with the device's TCP
//! control port and a TXT record describing it, re-announcing every 30 s
//! to survive lossy networks. A [`ServiceBrowser`] watches the configured
//! service types and delivers [`DiscoveryEvent`]s on a channel.
//!
//! mDNS removal events are advisory: consumers that care about liveness
//! (the controller) confirm with active health checks.

pub mod advertise;
pub mod browse;

mod record;

pub use advertise::ServiceAdvertiser;
pub use browse::{DiscoveryEvent, ServiceBrowser};
pub use record::DiscoveredDevice;

/// Interval between re-announcements of an advertised service.
pub const REANNOUNCE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// Errors surfaced by the discovery layer.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("mdns error: {0}")]
    Mdns(#[from] mdns_sd::Error),
}
