//! Discovered device records and TXT schema helpers.

use std::collections::HashMap;

use uuid::Uuid;

use ltp_wire::{SERVICE_TYPE_CONTROLLER, SERVICE_TYPE_SINK, SERVICE_TYPE_SOURCE};

/// A peer found by the browser: one resolved mDNS service instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Full mDNS instance name (`<instance>.<service type>`), the
    /// browser-side identity of the record.
    pub instance_name: String,
    pub service_type: String,
    /// Advertised hostname.
    pub host: String,
    /// TCP control port.
    pub port: u16,
    /// UUID from the `id` TXT key, when present and parseable.
    pub device_id: Option<Uuid>,
    pub display_name: String,
    pub description: String,
    /// Raw TXT properties. Unrecognized keys are preserved, not rejected.
    pub properties: HashMap<String, String>,
    /// Resolved addresses, dotted-quad strings.
    pub addresses: Vec<String>,
}

impl DiscoveredDevice {
    /// Build a record from resolved service data.
    pub fn from_parts(
        service_type: &str,
        instance_name: &str,
        host: &str,
        port: u16,
        properties: HashMap<String, String>,
        addresses: Vec<String>,
    ) -> Self {
        let device_id = properties.get("id").and_then(|s| Uuid::parse_str(s).ok());
        let display_name = properties
            .get("name")
            .cloned()
            .unwrap_or_else(|| instance_name.to_string());
        let description = properties.get("desc").cloned().unwrap_or_default();

        Self {
            instance_name: instance_name.to_string(),
            service_type: service_type.to_string(),
            host: host.to_string(),
            port,
            device_id,
            display_name,
            description,
            properties,
            addresses,
        }
    }

    pub fn is_sink(&self) -> bool {
        self.service_type.contains(SERVICE_TYPE_SINK.trim_end_matches('.'))
    }

    pub fn is_source(&self) -> bool {
        self.service_type
            .contains(SERVICE_TYPE_SOURCE.trim_end_matches('.'))
    }

    pub fn is_controller(&self) -> bool {
        self.service_type
            .contains(SERVICE_TYPE_CONTROLLER.trim_end_matches('.'))
    }

    /// The address to dial: first resolved address, falling back to the
    /// advertised hostname with any `.local.` suffix trimmed.
    pub fn connect_host(&self) -> String {
        if let Some(addr) = self.addresses.first() {
            return addr.clone();
        }
        self.host
            .trim_end_matches('.')
            .trim_end_matches(".local")
            .to_string()
    }

    /// Parse a dimensions property (`"60"` or `"16x16"`).
    pub fn parse_dimensions(value: &str) -> Option<Vec<u32>> {
        let dims: Result<Vec<u32>, _> = value.split('x').map(str::parse).collect();
        dims.ok().filter(|d| !d.is_empty())
    }

    /// The device's dimensions from its TXT record: `dim` for sinks,
    /// `output` for sources, falling back to `pixels`.
    pub fn dimensions(&self) -> Option<Vec<u32>> {
        for key in ["dim", "output"] {
            if let Some(value) = self.properties.get(key) {
                if let Some(dims) = Self::parse_dimensions(value) {
                    return Some(dims);
                }
            }
        }
        self.properties
            .get("pixels")
            .and_then(|p| p.parse().ok())
            .map(|n| vec![n])
    }

    /// Advertised nominal rate, when present.
    pub fn rate(&self) -> Option<u32> {
        self.properties.get("rate").and_then(|r| r.parse().ok())
    }
}

/// Build the base TXT properties every LTP service carries.
pub(crate) fn base_txt_properties(
    device_id: Uuid,
    display_name: &str,
    description: &str,
    has_controls: bool,
) -> HashMap<String, String> {
    let mut props = HashMap::new();
    props.insert("ver".to_string(), ltp_wire::PROTOCOL_VERSION.to_string());
    props.insert("name".to_string(), display_name.to_string());
    props.insert("desc".to_string(), description.to_string());
    props.insert("id".to_string(), device_id.to_string());
    props.insert(
        "ctrl".to_string(),
        if has_controls { "1" } else { "0" }.to_string(),
    );
    props
}
