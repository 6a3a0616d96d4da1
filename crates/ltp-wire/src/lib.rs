//! Wire-level types for the LED Transport Protocol (LTP).
//!
//! LTP uses a dual-channel design:
//!
//! - a reliable **control channel**: newline-delimited JSON messages over
//!   TCP, with sequenced request/response correlation ([`Message`]);
//! - an unreliable **data channel**: framed binary pixel packets over UDP,
//!   with optional run-length encoding ([`DataPacket`]).
//!
//! This crate defines both wire formats plus the data model that rides on
//! them: pixel [`Topology`] descriptions and the typed, validated device
//! [`Control`] zoo with its [`ControlRegistry`].

pub mod control;
pub mod device;
pub mod message;
pub mod packet;
pub mod topology;
pub mod types;

mod error;

pub use control::{
    ActionControl, ArrayControl, ArrayItemType, BooleanControl, ColorControl, Control,
    ControlRegistry, EnumControl, EnumOption, NumberControl, StringControl,
};
pub use device::{DeviceInfo, SinkCapabilities, SourceCapabilities};
pub use error::ProtocolError;
pub use message::{Message, StreamFormat, SubscribeTarget, TransformSpec};
pub use packet::DataPacket;
pub use topology::{Coordinate, MatrixOrder, MatrixOrigin, Topology, TopologyMapper};
pub use types::{ColorFormat, Encoding, ErrorCode, ScaleMode, SourceMode, StreamAction};

/// Protocol version advertised in TXT records and capability responses.
pub const PROTOCOL_VERSION: &str = "0.1";

/// Magic prefix of every data packet: "LT", big-endian.
pub const PACKET_MAGIC: u16 = 0x4C54;

/// Conservative maximum UDP datagram size (vs. Ethernet MTU).
///
/// Packets above this limit are still transmitted, but senders log a
/// warning; frames are never split across datagrams.
pub const MAX_PACKET_SIZE: usize = 1400;

/// Default frame rate for sources that do not specify one.
pub const DEFAULT_REFRESH_HZ: u32 = 30;

/// DNS-SD service type advertised by sinks.
pub const SERVICE_TYPE_SINK: &str = "_ltp-sink._tcp.local.";

/// DNS-SD service type advertised by sources.
pub const SERVICE_TYPE_SOURCE: &str = "_ltp-source._tcp.local.";

/// DNS-SD service type advertised by controllers.
pub const SERVICE_TYPE_CONTROLLER: &str = "_ltp-controller._tcp.local.";
