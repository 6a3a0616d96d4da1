//! Transport layer for LTP: the reliable TCP control channel and the
//! unreliable UDP data channel.
//!
//! The control side provides a connection-per-task [`ControlServer`] with
//! broadcast support and a [`ControlClient`] that correlates requests with
//! responses by `seq`. The data side provides a connected-socket
//! [`DataSender`] with an optional frame-rate cap and a [`DataReceiver`]
//! that decodes datagrams and hands them to a callback; malformed input is
//! dropped and counted, never fatal.

pub mod control;
pub mod data;
pub mod stream;

mod error;

pub use control::{
    ControlClient, ControlServer, ControlServerHandle, FallbackHandler, MessageHandler,
    NullHandler,
};
pub use data::{DataHandler, DataReceiver, DataSender};
pub use error::TransportError;
pub use stream::{StreamInfo, StreamManager};

/// Default timeout for control channel requests.
pub const DEFAULT_REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
