//! Controller YAML configuration: identity, virtual sources, and
//! pre-wired routes.
//!
//! State is volatile; this file is the bootstrap. The current route set
//! can be exported back out in the same shape.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ltp_wire::TransformSpec;

use crate::controller::ControllerConfig;
use crate::engine::RoutingEngine;
use crate::route::RouteMode;
use crate::virtual_source::VirtualSourceSpec;
use crate::RouterError;

fn default_enabled() -> bool {
    true
}

/// One pre-wired route.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub name: String,
    pub source_id: String,
    pub sink_id: String,
    #[serde(default)]
    pub mode: RouteMode,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub transform: TransformSpec,
}

/// The controller's YAML config file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerFileConfig {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    /// Keeps identity stable across restarts when set.
    pub device_id: Option<Uuid>,
    pub control_port: Option<u16>,
    pub health_check_interval_secs: Option<u64>,
    pub virtual_sources: Vec<VirtualSourceSpec>,
    pub routes: Vec<RouteEntry>,
}

impl ControllerFileConfig {
    pub fn load(path: &Path) -> Result<Self, RouterError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RouterError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, RouterError> {
        serde_yaml::from_str(text).map_err(|e| RouterError::Config(format!("bad config: {e}")))
    }

    pub fn to_yaml(&self) -> Result<String, RouterError> {
        serde_yaml::to_string(self).map_err(|e| RouterError::Config(e.to_string()))
    }

    /// Fold identity fields over a [`ControllerConfig`].
    pub fn apply_to(&self, base: &mut ControllerConfig) {
        if let Some(name) = &self.name {
            base.name = name.clone();
        }
        if let Some(display_name) = &self.display_name {
            base.display_name = display_name.clone();
        }
        if let Some(description) = &self.description {
            base.description = description.clone();
        }
        if let Some(device_id) = self.device_id {
            base.device_id = device_id;
        }
        if let Some(secs) = self.health_check_interval_secs {
            base.health_check_interval = Duration::from_secs(secs.max(1));
        }
    }

    /// Register configured virtual sources and routes with the engine.
    /// Individual failures are reported but do not abort the rest
    /// (best-effort startup).
    pub fn install(&self, engine: &Arc<RoutingEngine>) -> Vec<RouterError> {
        let mut failures = Vec::new();
        for spec in &self.virtual_sources {
            if let Err(e) = engine.register_virtual_source(spec.clone()) {
                failures.push(e);
            }
        }
        for entry in &self.routes {
            if let Err(e) = engine.create_route(
                &entry.name,
                &entry.source_id,
                &entry.sink_id,
                entry.mode,
                entry.transform,
                entry.enabled,
            ) {
                failures.push(e);
            }
        }
        failures
    }

    /// Capture the engine's current virtual sources and routes.
    pub fn export(engine: &RoutingEngine) -> Self {
        Self {
            virtual_sources: engine.virtual_sources(),
            routes: engine
                .routes()
                .into_iter()
                .map(|route| RouteEntry {
                    name: route.name.clone(),
                    source_id: route.source_id.clone(),
                    sink_id: route.sink_id.clone(),
                    mode: route.mode,
                    enabled: route.enabled(),
                    transform: route.transform(),
                })
                .collect(),
            ..Self::default()
        }
    }
}
