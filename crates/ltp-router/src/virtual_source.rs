//! Virtual sources: in-controller frame producers.
//!
//! A virtual source is a registered pattern rendered by the controller
//! itself. Routes reference it by name in place of a discovered source id;
//! the engine runs a local render loop instead of subscribing over the
//! network, and frames flow through the same transform path as a proxy
//! route.

use serde::{Deserialize, Serialize};

use ltp_device::backend::FrameProducer;
use ltp_device::create_pattern;

use crate::RouterError;

fn default_rate() -> u32 {
    ltp_wire::DEFAULT_REFRESH_HZ
}

/// Declaration of one virtual source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VirtualSourceSpec {
    /// Route-facing name; takes the place of a source id.
    pub name: String,
    /// Built-in pattern to render (`solid`, `gradient`, `rainbow`).
    pub pattern: String,
    pub dimensions: Vec<u32>,
    #[serde(default = "default_rate")]
    pub rate: u32,
}

impl VirtualSourceSpec {
    /// Validate the spec and instantiate its producer.
    pub fn build_producer(&self) -> Result<Box<dyn FrameProducer>, RouterError> {
        if self.dimensions.is_empty() || self.dimensions.iter().any(|&d| d == 0) {
            return Err(RouterError::Config(format!(
                "virtual source '{}' has invalid dimensions {:?}",
                self.name, self.dimensions
            )));
        }
        create_pattern(&self.pattern, &self.dimensions)
            .ok_or_else(|| RouterError::UnknownPattern(self.pattern.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_pattern_builds() {
        let spec = VirtualSourceSpec {
            name: "wall".into(),
            pattern: "rainbow".into(),
            dimensions: vec![16, 16],
            rate: 30,
        };
        let mut producer = spec.build_producer().unwrap();
        let frame = producer.next_frame().unwrap();
        assert_eq!(frame.len(), 16 * 16 * 3);
    }

    #[test]
    fn unknown_pattern_is_rejected() {
        let spec = VirtualSourceSpec {
            name: "wall".into(),
            pattern: "disco".into(),
            dimensions: vec![8],
            rate: 30,
        };
        assert!(matches!(
            spec.build_producer(),
            Err(RouterError::UnknownPattern(_))
        ));
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let spec = VirtualSourceSpec {
            name: "wall".into(),
            pattern: "solid".into(),
            dimensions: vec![0],
            rate: 30,
        };
        assert!(spec.build_producer().is_err());
    }

    #[test]
    fn rate_defaults_when_omitted() {
        let spec: VirtualSourceSpec =
            serde_yaml::from_str("name: wall\npattern: solid\ndimensions: [8]\n").unwrap();
        assert_eq!(spec.rate, ltp_wire::DEFAULT_REFRESH_HZ);
    }
}
