//! mDNS service browsing.

use std::collections::HashMap;
use std::sync::Arc;

use mdns_sd::{ServiceDaemon, ServiceEvent};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ltp_wire::{SERVICE_TYPE_CONTROLLER, SERVICE_TYPE_SINK, SERVICE_TYPE_SOURCE};

use crate::record::DiscoveredDevice;
use crate::DiscoveryError;

/// One discovery state change: a device appeared/updated (`online`) or its
/// advertisement went away (`!online`).
///
/// A removal is advisory only; the record may simply have expired on a
/// lossy network. Consumers that need liveness confirm with health checks.
#[derive(Clone, Debug)]
pub struct DiscoveryEvent {
    pub device: DiscoveredDevice,
    pub online: bool,
}

/// Browses the configured LTP service types and tracks resolved peers.
pub struct ServiceBrowser {
    daemon: ServiceDaemon,
    devices: Arc<Mutex<HashMap<String, DiscoveredDevice>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServiceBrowser {
    /// All three LTP service types.
    pub fn default_service_types() -> Vec<String> {
        vec![
            SERVICE_TYPE_SINK.to_string(),
            SERVICE_TYPE_SOURCE.to_string(),
            SERVICE_TYPE_CONTROLLER.to_string(),
        ]
    }

    /// Start browsing. Events are delivered on the returned channel for as
    /// long as the browser lives.
    pub fn start(
        service_types: &[String],
    ) -> Result<(Self, mpsc::UnboundedReceiver<DiscoveryEvent>), DiscoveryError> {
        let daemon = ServiceDaemon::new()?;
        let devices: Arc<Mutex<HashMap<String, DiscoveredDevice>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut tasks = Vec::new();
        for service_type in service_types {
            let receiver = daemon.browse(service_type)?;
            info!(service = %service_type, "browsing for services");

            let devices = devices.clone();
            let events_tx = events_tx.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    let event = match receiver.recv_async().await {
                        Ok(event) => event,
                        Err(_) => break,
                    };
                    match event {
                        ServiceEvent::ServiceResolved(info) => {
                            let properties: HashMap<String, String> = info
                                .get_properties()
                                .iter()
                                .map(|p| (p.key().to_string(), p.val_str().to_string()))
                                .collect();
                            let addresses: Vec<String> = info
                                .get_addresses()
                                .iter()
                                .map(|a| a.to_string())
                                .collect();
                            let device = DiscoveredDevice::from_parts(
                                info.get_type(),
                                info.get_fullname(),
                                info.get_hostname(),
                                info.get_port(),
                                properties,
                                addresses,
                            );

                            let is_new = devices
                                .lock()
                                .insert(device.instance_name.clone(), device.clone())
                                .is_none();
                            info!(
                                name = %device.display_name,
                                host = %device.connect_host(),
                                port = device.port,
                                new = is_new,
                                "service resolved"
                            );
                            let _ = events_tx.send(DiscoveryEvent {
                                device,
                                online: true,
                            });
                        }
                        ServiceEvent::ServiceRemoved(_, fullname) => {
                            let removed = devices.lock().remove(&fullname);
                            if let Some(device) = removed {
                                info!(name = %device.display_name, "service removed");
                                let _ = events_tx.send(DiscoveryEvent {
                                    device,
                                    online: false,
                                });
                            } else {
                                debug!(%fullname, "removal for unknown service ignored");
                            }
                        }
                        ServiceEvent::SearchStarted(_) | ServiceEvent::SearchStopped(_) => {}
                        other => {
                            debug!(?other, "discovery event ignored");
                        }
                    }
                }
            }));
        }

        Ok((
            Self {
                daemon,
                devices,
                tasks,
            },
            events_rx,
        ))
    }

    /// Snapshot of every known device, keyed by instance name.
    pub fn devices(&self) -> HashMap<String, DiscoveredDevice> {
        self.devices.lock().clone()
    }

    pub fn sinks(&self) -> Vec<DiscoveredDevice> {
        self.filtered(DiscoveredDevice::is_sink)
    }

    pub fn sources(&self) -> Vec<DiscoveredDevice> {
        self.filtered(DiscoveredDevice::is_source)
    }

    pub fn controllers(&self) -> Vec<DiscoveredDevice> {
        self.filtered(DiscoveredDevice::is_controller)
    }

    fn filtered(&self, predicate: impl Fn(&DiscoveredDevice) -> bool) -> Vec<DiscoveredDevice> {
        self.devices
            .lock()
            .values()
            .filter(|d| predicate(d))
            .cloned()
            .collect()
    }

    /// Find a device by its advertised UUID.
    pub fn find_by_id(&self, device_id: Uuid) -> Option<DiscoveredDevice> {
        self.devices
            .lock()
            .values()
            .find(|d| d.device_id == Some(device_id))
            .cloned()
    }

    /// Find a device by display name.
    pub fn find_by_name(&self, name: &str) -> Option<DiscoveredDevice> {
        self.devices
            .lock()
            .values()
            .find(|d| d.display_name == name)
            .cloned()
    }

    /// Stop browsing and clear the device table.
    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Err(e) = self.daemon.shutdown() {
            warn!(error = %e, "mdns daemon shutdown failed");
        }
        self.devices.lock().clear();
    }
}

impl Drop for ServiceBrowser {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
