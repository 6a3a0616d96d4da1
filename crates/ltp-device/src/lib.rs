//! LTP device endpoints.
//!
//! A [`Sink`] consumes pixel frames: it answers control messages, accepts
//! stream setups, receives UDP data packets, and hands decoded buffers to
//! its [`Renderer`] backend. A [`Source`] produces frames: it answers
//! `subscribe` by aiming a UDP sender at the caller and runs a fixed-rate
//! render loop over its [`FrameProducer`] backend.
//!
//! Backends are the plug-in seam: anything honoring the one-upcall-per-
//! frame contract works. The built-ins here are deliberately small (test
//! patterns, a stats renderer); real renderers live outside the core.

pub mod backend;
pub mod color;
pub mod pattern;
pub mod sink;
pub mod source;

pub use backend::{
    BufferRenderer, FrameProducer, LatestFrame, NullRenderer, Renderer, StatsRenderer,
};
pub use pattern::create_pattern;
pub use sink::{Sink, SinkConfig};
pub use source::{Source, SourceConfig};

/// Errors from device lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error(transparent)]
    Transport(#[from] ltp_transport::TransportError),

    #[error(transparent)]
    Discovery(#[from] ltp_discovery::DiscoveryError),

    #[error(transparent)]
    Protocol(#[from] ltp_wire::ProtocolError),

    #[error("invalid configuration: {0}")]
    Config(String),
}
