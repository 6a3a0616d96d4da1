//! Device identity and capability records.
//!
//! A capability record is what a device publishes in response to
//! `capability_request`. Sinks and sources publish different shapes; both
//! embed the common identity fields and the device's control list.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{ColorFormat, SourceMode};
use crate::Topology;
use crate::PROTOCOL_VERSION;

fn protocol_version() -> String {
    PROTOCOL_VERSION.to_string()
}

/// Stable identity of a fabric participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "protocol_version")]
    pub protocol_version: String,
}

impl DeviceInfo {
    pub fn new(id: Uuid, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            protocol_version: protocol_version(),
        }
    }
}

/// Capability record published by a sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SinkCapabilities {
    #[serde(flatten)]
    pub device: DeviceInfo,
    pub pixels: u32,
    pub dimensions: Vec<u32>,
    pub topology: Topology,
    pub color_formats: Vec<ColorFormat>,
    pub max_refresh_hz: u32,
    #[serde(default)]
    pub controls: Vec<Value>,
}

/// Capability record published by a source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceCapabilities {
    #[serde(flatten)]
    pub device: DeviceInfo,
    pub output_dimensions: Vec<u32>,
    pub color_format: ColorFormat,
    pub rate: u32,
    pub mode: SourceMode,
    #[serde(default)]
    pub controls: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_capabilities_flatten_identity() {
        let caps = SinkCapabilities {
            device: DeviceInfo::new(Uuid::nil(), "Shelf Strip", "over the desk"),
            pixels: 60,
            dimensions: vec![60],
            topology: Topology::linear(60),
            color_formats: vec![ColorFormat::Rgb],
            max_refresh_hz: 60,
            controls: Vec::new(),
        };
        let json = serde_json::to_value(&caps).unwrap();
        assert_eq!(json["name"], "Shelf Strip");
        assert_eq!(json["pixels"], 60);
        assert_eq!(json["topology"]["topology"], "linear");
        assert_eq!(json["protocol_version"], PROTOCOL_VERSION);

        let back: SinkCapabilities = serde_json::from_value(json).unwrap();
        assert_eq!(back, caps);
    }

    #[test]
    fn source_capabilities_roundtrip() {
        let caps = SourceCapabilities {
            device: DeviceInfo::new(Uuid::new_v4(), "Gradient", ""),
            output_dimensions: vec![16, 16],
            color_format: ColorFormat::Rgb,
            rate: 30,
            mode: SourceMode::Stream,
            controls: Vec::new(),
        };
        let json = serde_json::to_value(&caps).unwrap();
        assert_eq!(json["mode"], "stream");
        let back: SourceCapabilities = serde_json::from_value(json).unwrap();
        assert_eq!(back, caps);
    }
}
