//! mDNS service advertisement.

use std::collections::HashMap;

use mdns_sd::{ServiceDaemon, ServiceInfo};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ltp_wire::{
    ColorFormat, SourceMode, SERVICE_TYPE_CONTROLLER, SERVICE_TYPE_SINK, SERVICE_TYPE_SOURCE,
};

use crate::record::base_txt_properties;
use crate::{DiscoveryError, REANNOUNCE_INTERVAL};

fn dims_string(dims: &[u32]) -> String {
    dims.iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("x")
}

/// Sink-specific TXT keys.
pub fn sink_txt_properties(
    pixels: u32,
    dimensions: &[u32],
    color_format: ColorFormat,
    max_rate: u32,
) -> HashMap<String, String> {
    let mut extra = HashMap::new();
    extra.insert("type".to_string(), "string".to_string());
    extra.insert("pixels".to_string(), pixels.to_string());
    extra.insert("dim".to_string(), dims_string(dimensions));
    extra.insert("color".to_string(), color_format.name().to_string());
    extra.insert("rate".to_string(), max_rate.to_string());
    extra
}

/// Source-specific TXT keys.
pub fn source_txt_properties(
    dimensions: &[u32],
    color_format: ColorFormat,
    rate: u32,
    mode: SourceMode,
) -> HashMap<String, String> {
    let mut extra = HashMap::new();
    extra.insert("output".to_string(), dims_string(dimensions));
    extra.insert("color".to_string(), color_format.name().to_string());
    extra.insert("rate".to_string(), rate.to_string());
    extra.insert("mode".to_string(), mode.name().to_string());
    extra
}

/// Advertises one LTP service instance over mDNS.
///
/// Registration is refreshed every [`REANNOUNCE_INTERVAL`] by
/// unregistering and re-registering, which forces a fresh announcement on
/// networks that drop multicast.
pub struct ServiceAdvertiser {
    daemon: ServiceDaemon,
    service_type: String,
    instance_name: String,
    port: u16,
    properties: Mutex<HashMap<String, String>>,
    fullname: Mutex<Option<String>>,
    reannounce_task: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceAdvertiser {
    /// Generic constructor; prefer [`ServiceAdvertiser::sink`],
    /// [`ServiceAdvertiser::source`], or
    /// [`ServiceAdvertiser::controller`].
    pub fn new(
        service_type: &str,
        instance_name: &str,
        port: u16,
        device_id: Uuid,
        display_name: &str,
        description: &str,
        has_controls: bool,
        extra_properties: HashMap<String, String>,
    ) -> Result<Self, DiscoveryError> {
        let mut properties = base_txt_properties(device_id, display_name, description, has_controls);
        properties.extend(extra_properties);

        Ok(Self {
            daemon: ServiceDaemon::new()?,
            service_type: service_type.to_string(),
            instance_name: instance_name.to_string(),
            port,
            properties: Mutex::new(properties),
            fullname: Mutex::new(None),
            reannounce_task: Mutex::new(None),
        })
    }

    /// Advertiser for a sink, with the sink-specific TXT keys.
    #[allow(clippy::too_many_arguments)]
    pub fn sink(
        instance_name: &str,
        port: u16,
        device_id: Uuid,
        display_name: &str,
        description: &str,
        pixels: u32,
        dimensions: &[u32],
        color_format: ColorFormat,
        max_rate: u32,
        has_controls: bool,
    ) -> Result<Self, DiscoveryError> {
        let extra = sink_txt_properties(pixels, dimensions, color_format, max_rate);
        Self::new(
            SERVICE_TYPE_SINK,
            instance_name,
            port,
            device_id,
            display_name,
            description,
            has_controls,
            extra,
        )
    }

    /// Advertiser for a source, with the source-specific TXT keys.
    #[allow(clippy::too_many_arguments)]
    pub fn source(
        instance_name: &str,
        port: u16,
        device_id: Uuid,
        display_name: &str,
        description: &str,
        dimensions: &[u32],
        color_format: ColorFormat,
        rate: u32,
        mode: SourceMode,
        has_controls: bool,
    ) -> Result<Self, DiscoveryError> {
        let extra = source_txt_properties(dimensions, color_format, rate, mode);
        Self::new(
            SERVICE_TYPE_SOURCE,
            instance_name,
            port,
            device_id,
            display_name,
            description,
            has_controls,
            extra,
        )
    }

    /// Advertiser for a controller.
    pub fn controller(
        instance_name: &str,
        port: u16,
        device_id: Uuid,
        display_name: &str,
        description: &str,
    ) -> Result<Self, DiscoveryError> {
        Self::new(
            SERVICE_TYPE_CONTROLLER,
            instance_name,
            port,
            device_id,
            display_name,
            description,
            false,
            HashMap::new(),
        )
    }

    fn build_service_info(&self) -> Result<ServiceInfo, DiscoveryError> {
        let host = format!("{}.local.", self.instance_name);
        let properties = self.properties.lock().clone();
        let info = ServiceInfo::new(
            &self.service_type,
            &self.instance_name,
            &host,
            "",
            self.port,
            properties,
        )?
        .enable_addr_auto();
        Ok(info)
    }

    /// Register the service and start the re-announce loop.
    pub fn start(self: &std::sync::Arc<Self>) -> Result<(), DiscoveryError> {
        let info = self.build_service_info()?;
        *self.fullname.lock() = Some(info.get_fullname().to_string());
        self.daemon.register(info)?;
        info!(
            service = %self.service_type,
            instance = %self.instance_name,
            port = self.port,
            "advertising service"
        );

        let advertiser = self.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(REANNOUNCE_INTERVAL).await;
                if let Err(e) = advertiser.reannounce() {
                    warn!(error = %e, "failed to re-announce service");
                }
            }
        });
        *self.reannounce_task.lock() = Some(task);
        Ok(())
    }

    fn reannounce(&self) -> Result<(), DiscoveryError> {
        let Some(fullname) = self.fullname.lock().clone() else {
            return Ok(());
        };
        // Unregister + register forces a fresh announcement.
        let _ = self.daemon.unregister(&fullname);
        let info = self.build_service_info()?;
        self.daemon.register(info)?;
        debug!(instance = %self.instance_name, "re-announced service");
        Ok(())
    }

    /// Re-publish with changed TXT properties merged over the current set.
    pub fn update_properties(
        &self,
        updates: HashMap<String, String>,
    ) -> Result<(), DiscoveryError> {
        self.properties.lock().extend(updates);
        self.reannounce()
    }

    /// Unregister and stop re-announcing.
    pub fn stop(&self) {
        if let Some(task) = self.reannounce_task.lock().take() {
            task.abort();
        }
        if let Some(fullname) = self.fullname.lock().take() {
            let _ = self.daemon.unregister(&fullname);
        }
        let _ = self.daemon.shutdown();
        info!(instance = %self.instance_name, "stopped advertising");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dims_render_in_wxh_form() {
        assert_eq!(dims_string(&[60]), "60");
        assert_eq!(dims_string(&[16, 16]), "16x16");
    }

    #[test]
    fn sink_txt_keys() {
        let props = sink_txt_properties(60, &[60], ColorFormat::Rgb, 60);
        assert_eq!(props["pixels"], "60");
        assert_eq!(props["dim"], "60");
        assert_eq!(props["color"], "rgb");
        assert_eq!(props["rate"], "60");
    }

    #[test]
    fn source_txt_keys() {
        let props = source_txt_properties(&[16, 16], ColorFormat::Rgb, 30, SourceMode::Stream);
        assert_eq!(props["output"], "16x16");
        assert_eq!(props["mode"], "stream");
        assert_eq!(props["rate"], "30");
        assert_eq!(props["color"], "rgb");
    }
}
