//! Control channel messages: newline-delimited JSON over TCP.
//!
//! Every message carries a `type` tag and, for request/response pairs, an
//! integer `seq` that is monotonic per connection and correlates a response
//! with its request. Unsolicited pushes (`control_changed`) carry no `seq`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::types::{ColorFormat, Encoding, ErrorCode, ScaleMode, StreamAction};

/// Negotiated stream format, carried by `stream_setup`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub color: ColorFormat,
    pub encoding: Encoding,
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self {
            color: ColorFormat::Rgb,
            encoding: Encoding::Raw,
        }
    }
}

/// Requested (and granted) output shape, carried by `subscribe`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscribeTarget {
    pub dimensions: Vec<u32>,
    pub color: ColorFormat,
    pub rate: u32,
}

/// Frame transform requested when creating a route.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformSpec {
    pub scale_mode: ScaleMode,
    pub brightness: f32,
    pub gamma: f32,
    pub mirror_x: bool,
    pub mirror_y: bool,
}

impl Default for TransformSpec {
    fn default() -> Self {
        Self {
            scale_mode: ScaleMode::Fit,
            brightness: 1.0,
            gamma: 1.0,
            mirror_x: false,
            mirror_y: false,
        }
    }
}

/// A control channel message.
///
/// Serialized as a single JSON object with a `type` discriminator, followed
/// by a newline. Fields that are `None` are omitted on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    CapabilityRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
    CapabilityResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        device: Value,
    },
    StreamSetup {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        #[serde(default)]
        format: StreamFormat,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        udp_port: Option<u16>,
    },
    StreamSetupResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        status: String,
        udp_port: u16,
        stream_id: String,
    },
    StreamControl {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        stream_id: String,
        action: StreamAction,
    },
    StreamControlResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        status: String,
        stream_id: String,
    },
    ControlGet {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ids: Option<Vec<String>>,
    },
    ControlGetResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        status: String,
        values: Map<String, Value>,
    },
    ControlSet {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        values: Map<String, Value>,
    },
    ControlSetResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        status: String,
        applied: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        errors: Option<Map<String, Value>>,
    },
    /// Unsolicited push after a successful control change. Never carries a
    /// `seq`; clients route it to their fallback handler.
    ControlChanged { values: Map<String, Value> },
    Subscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        target: SubscribeTarget,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        callback_host: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        callback_port: Option<u16>,
    },
    SubscribeResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        status: String,
        actual: SubscribeTarget,
        stream_id: String,
    },
    RouteCreate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        name: String,
        source_id: String,
        sink_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transform: Option<TransformSpec>,
    },
    RouteCreateResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        route_id: Option<String>,
    },
    RouteDelete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        route_id: String,
    },
    RouteDeleteResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        status: String,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        code: ErrorCode,
        error: String,
        message: String,
    },
}

impl Message {
    /// Build an `error` message carrying the original request's `seq`.
    pub fn error(seq: Option<u64>, code: ErrorCode, message: impl Into<String>) -> Self {
        Message::Error {
            seq,
            code,
            error: code.name().to_string(),
            message: message.into(),
        }
    }

    /// The message's sequence number, if any.
    pub fn seq(&self) -> Option<u64> {
        match self {
            Message::CapabilityRequest { seq }
            | Message::CapabilityResponse { seq, .. }
            | Message::StreamSetup { seq, .. }
            | Message::StreamSetupResponse { seq, .. }
            | Message::StreamControl { seq, .. }
            | Message::StreamControlResponse { seq, .. }
            | Message::ControlGet { seq, .. }
            | Message::ControlGetResponse { seq, .. }
            | Message::ControlSet { seq, .. }
            | Message::ControlSetResponse { seq, .. }
            | Message::Subscribe { seq, .. }
            | Message::SubscribeResponse { seq, .. }
            | Message::RouteCreate { seq, .. }
            | Message::RouteCreateResponse { seq, .. }
            | Message::RouteDelete { seq, .. }
            | Message::RouteDeleteResponse { seq, .. }
            | Message::Error { seq, .. } => *seq,
            Message::ControlChanged { .. } => None,
        }
    }

    /// Set the sequence number. A no-op on `control_changed`, which never
    /// carries one.
    pub fn set_seq(&mut self, new_seq: u64) {
        match self {
            Message::CapabilityRequest { seq }
            | Message::CapabilityResponse { seq, .. }
            | Message::StreamSetup { seq, .. }
            | Message::StreamSetupResponse { seq, .. }
            | Message::StreamControl { seq, .. }
            | Message::StreamControlResponse { seq, .. }
            | Message::ControlGet { seq, .. }
            | Message::ControlGetResponse { seq, .. }
            | Message::ControlSet { seq, .. }
            | Message::ControlSetResponse { seq, .. }
            | Message::Subscribe { seq, .. }
            | Message::SubscribeResponse { seq, .. }
            | Message::RouteCreate { seq, .. }
            | Message::RouteCreateResponse { seq, .. }
            | Message::RouteDelete { seq, .. }
            | Message::RouteDeleteResponse { seq, .. }
            | Message::Error { seq, .. } => *seq = Some(new_seq),
            Message::ControlChanged { .. } => {}
        }
    }

    /// The wire name of this message's `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::CapabilityRequest { .. } => "capability_request",
            Message::CapabilityResponse { .. } => "capability_response",
            Message::StreamSetup { .. } => "stream_setup",
            Message::StreamSetupResponse { .. } => "stream_setup_response",
            Message::StreamControl { .. } => "stream_control",
            Message::StreamControlResponse { .. } => "stream_control_response",
            Message::ControlGet { .. } => "control_get",
            Message::ControlGetResponse { .. } => "control_get_response",
            Message::ControlSet { .. } => "control_set",
            Message::ControlSetResponse { .. } => "control_set_response",
            Message::ControlChanged { .. } => "control_changed",
            Message::Subscribe { .. } => "subscribe",
            Message::SubscribeResponse { .. } => "subscribe_response",
            Message::RouteCreate { .. } => "route_create",
            Message::RouteCreateResponse { .. } => "route_create_response",
            Message::RouteDelete { .. } => "route_delete",
            Message::RouteDeleteResponse { .. } => "route_delete_response",
            Message::Error { .. } => "error",
        }
    }

    /// Serialize to a single JSON line, newline terminator included.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).expect("message serialization is infallible");
        line.push('\n');
        line
    }

    /// Parse a message from one line of JSON.
    pub fn from_line(line: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(line.trim())
            .map_err(|e| ProtocolError::invalid_format(format!("bad control message: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_request_wire_shape() {
        let msg = Message::CapabilityRequest { seq: Some(1) };
        let line = msg.to_line();
        assert!(line.ends_with('\n'));
        let json: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(json["type"], "capability_request");
        assert_eq!(json["seq"], 1);
    }

    #[test]
    fn seq_omitted_when_absent() {
        let msg = Message::CapabilityRequest { seq: None };
        let json: Value = serde_json::from_str(&msg.to_line()).unwrap();
        assert!(json.get("seq").is_none());
    }

    #[test]
    fn line_roundtrip() {
        let msg = Message::StreamSetup {
            seq: Some(7),
            format: StreamFormat {
                color: ColorFormat::Rgbw,
                encoding: Encoding::Rle,
            },
            udp_port: None,
        };
        let parsed = Message::from_line(&msg.to_line()).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.seq(), Some(7));
    }

    #[test]
    fn stream_setup_format_defaults() {
        let parsed = Message::from_line(r#"{"type": "stream_setup", "seq": 2}"#).unwrap();
        match parsed {
            Message::StreamSetup { format, .. } => {
                assert_eq!(format.color, ColorFormat::Rgb);
                assert_eq!(format.encoding, Encoding::Raw);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_invalid_format() {
        let err = Message::from_line(r#"{"type": "warp_core_breach"}"#).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFormat);
    }

    #[test]
    fn garbage_is_invalid_format() {
        assert!(Message::from_line("not json {").is_err());
    }

    #[test]
    fn control_changed_never_carries_seq() {
        let mut msg = Message::ControlChanged {
            values: Map::new(),
        };
        msg.set_seq(9);
        assert_eq!(msg.seq(), None);
        let json: Value = serde_json::from_str(&msg.to_line()).unwrap();
        assert!(json.get("seq").is_none());
    }

    #[test]
    fn error_message_carries_code_and_name() {
        let msg = Message::error(Some(3), ErrorCode::NotFound, "no such stream");
        let json: Value = serde_json::from_str(&msg.to_line()).unwrap();
        assert_eq!(json["code"], 4);
        assert_eq!(json["error"], "NOT_FOUND");
        assert_eq!(json["message"], "no such stream");
        assert_eq!(json["seq"], 3);
    }

    #[test]
    fn set_seq_overwrites() {
        let mut msg = Message::ControlGet {
            seq: None,
            ids: Some(vec!["brightness".into()]),
        };
        msg.set_seq(42);
        assert_eq!(msg.seq(), Some(42));
    }

    #[test]
    fn transform_spec_defaults() {
        let spec: TransformSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.scale_mode, ScaleMode::Fit);
        assert_eq!(spec.brightness, 1.0);
        assert_eq!(spec.gamma, 1.0);
        assert!(!spec.mirror_x);
        assert!(!spec.mirror_y);
    }

    #[test]
    fn type_name_matches_serialized_tag() {
        let msg = Message::RouteDelete {
            seq: Some(1),
            route_id: "r1".into(),
        };
        let json: Value = serde_json::from_str(&msg.to_line()).unwrap();
        assert_eq!(json["type"], msg.type_name());
    }
}
