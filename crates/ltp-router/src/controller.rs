//! Discovery aggregation, device state, and health checking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ltp_discovery::{DiscoveredDevice, DiscoveryEvent, ServiceAdvertiser, ServiceBrowser};
use ltp_transport::ControlClient;
use ltp_wire::{Message, SERVICE_TYPE_SINK, SERVICE_TYPE_SOURCE};

use crate::RouterError;

/// Consecutive health-check failures before a device flips offline. One
/// missed probe on a busy device must not cause route churn.
pub const FAILURES_BEFORE_OFFLINE: u32 = 5;

/// Timeout for the health check's TCP connect probe.
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for capability fetches from newly discovered devices.
const CAPABILITY_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a [`Controller`].
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub device_id: Uuid,
    pub health_check_interval: Duration,
    /// Disable to run without mDNS (tests, fixed-address setups).
    pub advertise: bool,
    pub browse: bool,
    /// Disable to skip capability fetches on discovery (tests).
    pub fetch_capabilities: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: "ltp-controller".to_string(),
            display_name: "LTP Controller".to_string(),
            description: "Central routing controller".to_string(),
            device_id: Uuid::new_v4(),
            health_check_interval: Duration::from_secs(30),
            advertise: true,
            browse: true,
            fetch_capabilities: true,
        }
    }
}

/// The controller's view of one discovered peer.
///
/// The `stable_id` is fixed at first discovery and is what routes refer
/// to, so a device that restarts with a fresh UUID keeps its routes.
#[derive(Clone, Debug)]
pub struct DeviceState {
    pub device: DiscoveredDevice,
    pub first_seen: SystemTime,
    pub last_seen: SystemTime,
    pub online: bool,
    pub capabilities: Option<Value>,
    pub control_values: Map<String, Value>,
    stable_id: String,
    consecutive_failures: u32,
}

impl DeviceState {
    pub fn new(device: DiscoveredDevice) -> Self {
        let stable_id = device
            .device_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| device.instance_name.clone());
        let now = SystemTime::now();
        Self {
            device,
            first_seen: now,
            last_seen: now,
            online: true,
            capabilities: None,
            control_values: Map::new(),
            stable_id,
            consecutive_failures: 0,
        }
    }

    /// Stable id used by routes. Fixed at first discovery.
    pub fn id(&self) -> &str {
        &self.stable_id
    }

    pub fn name(&self) -> &str {
        &self.device.display_name
    }

    pub fn connect_host(&self) -> String {
        self.device.connect_host()
    }

    pub fn port(&self) -> u16 {
        self.device.port
    }

    /// Record a failed health probe. Returns `true` when this failure
    /// crossed the offline threshold.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        if self.online && self.consecutive_failures >= FAILURES_BEFORE_OFFLINE {
            self.online = false;
            return true;
        }
        false
    }

    /// Record a successful probe. Returns `true` when the device came
    /// back online.
    pub fn record_success(&mut self) -> bool {
        self.consecutive_failures = 0;
        self.last_seen = SystemTime::now();
        if !self.online {
            self.online = true;
            return true;
        }
        false
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Pixel dimensions advertised in the TXT record.
    pub fn dimensions(&self) -> Vec<u32> {
        self.device.dimensions().unwrap_or_else(|| vec![60])
    }
}

/// Callback fired on device state changes `(state, online)`.
pub type DeviceCallback = Box<dyn Fn(&DeviceState, bool) + Send + Sync>;

#[derive(Default)]
struct Registry {
    sources: HashMap<String, DeviceState>,
    sinks: HashMap<String, DeviceState>,
}

/// Central controller: aggregates discovery, owns device state, runs the
/// health checker.
pub struct Controller {
    config: ControllerConfig,
    registry: Mutex<Registry>,
    callbacks: Mutex<Vec<DeviceCallback>>,
    browser: Mutex<Option<ServiceBrowser>>,
    advertiser: Mutex<Option<Arc<ServiceAdvertiser>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            registry: Mutex::new(Registry::default()),
            callbacks: Mutex::new(Vec::new()),
            browser: Mutex::new(None),
            advertiser: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register a state-change callback.
    pub fn on_device_change<F>(&self, callback: F)
    where
        F: Fn(&DeviceState, bool) + Send + Sync + 'static,
    {
        self.callbacks.lock().push(Box::new(callback));
    }

    /// Start discovery, advertisement, and the health loop.
    /// `control_port` is the already-bound admin server port.
    pub fn start(self: &Arc<Self>, control_port: u16) -> Result<(), RouterError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(name = %self.config.display_name, "starting controller");

        if self.config.browse {
            let service_types = vec![
                SERVICE_TYPE_SINK.to_string(),
                SERVICE_TYPE_SOURCE.to_string(),
            ];
            let (browser, mut events) = ServiceBrowser::start(&service_types)?;
            *self.browser.lock() = Some(browser);

            let controller = self.clone();
            self.tasks.lock().push(tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    controller.handle_discovery_event(event);
                }
            }));
        }

        if self.config.advertise {
            let advertiser = Arc::new(ServiceAdvertiser::controller(
                &self.config.name,
                control_port,
                self.config.device_id,
                &self.config.display_name,
                &self.config.description,
            )?);
            advertiser.start()?;
            *self.advertiser.lock() = Some(advertiser);
        }

        let controller = self.clone();
        self.tasks.lock().push(tokio::spawn(async move {
            controller.health_loop().await;
        }));

        Ok(())
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        if let Some(advertiser) = self.advertiser.lock().take() {
            advertiser.stop();
        }
        if let Some(mut browser) = self.browser.lock().take() {
            browser.stop();
        }
        info!("controller stopped");
    }

    /// Fold one discovery event into the registry. Public so tests and
    /// embedders can feed events without live mDNS.
    pub fn handle_discovery_event(self: &Arc<Self>, event: DiscoveryEvent) {
        let device = event.device;
        let is_source = device.is_source();
        let is_sink = device.is_sink();
        if !is_source && !is_sink {
            return;
        }

        if event.online {
            let key = device.instance_name.clone();
            let (state, is_new) = {
                let mut registry = self.registry.lock();
                let map = if is_source {
                    &mut registry.sources
                } else {
                    &mut registry.sinks
                };
                match map.get_mut(&key) {
                    Some(state) => {
                        state.device = device;
                        state.last_seen = SystemTime::now();
                        state.online = true;
                        (state.clone(), false)
                    }
                    None => {
                        let state = DeviceState::new(device);
                        map.insert(key.clone(), state.clone());
                        (state, true)
                    }
                }
            };

            if is_new {
                info!(kind = if is_source { "source" } else { "sink" },
                      name = %state.name(), id = %state.id(), "device discovered");
                if self.config.fetch_capabilities && self.is_running() {
                    self.spawn_capability_fetch(key, is_source);
                }
            } else {
                debug!(name = %state.name(), "device updated");
            }
            self.fire_callbacks(&state, true);
        } else {
            // Advisory: mark offline, keep the record. The health checker
            // is the authority for bringing it back.
            let state = {
                let mut registry = self.registry.lock();
                let map = if is_source {
                    &mut registry.sources
                } else {
                    &mut registry.sinks
                };
                map.get_mut(&device.instance_name).map(|state| {
                    state.online = false;
                    state.clone()
                })
            };
            if let Some(state) = state {
                info!(name = %state.name(), "device advertisement removed");
                self.fire_callbacks(&state, false);
            }
        }
    }

    fn fire_callbacks(&self, state: &DeviceState, online: bool) {
        for callback in self.callbacks.lock().iter() {
            callback(state, online);
        }
    }

    fn spawn_capability_fetch(self: &Arc<Self>, key: String, is_source: bool) {
        let controller = self.clone();
        tokio::spawn(async move {
            let target = {
                let registry = controller.registry.lock();
                let map = if is_source {
                    &registry.sources
                } else {
                    &registry.sinks
                };
                map.get(&key).map(|s| (s.connect_host(), s.port()))
            };
            let Some((host, port)) = target else { return };

            match fetch_device_info(&host, port).await {
                Ok((capabilities, values)) => {
                    let mut registry = controller.registry.lock();
                    let map = if is_source {
                        &mut registry.sources
                    } else {
                        &mut registry.sinks
                    };
                    if let Some(state) = map.get_mut(&key) {
                        state.capabilities = Some(capabilities);
                        state.control_values = values;
                        debug!(name = %state.name(), "capabilities fetched");
                    }
                }
                Err(e) => {
                    warn!(%key, error = %e, "capability fetch failed");
                }
            }
        });
    }

    /// Snapshot of all known sources.
    pub fn sources(&self) -> Vec<DeviceState> {
        self.registry.lock().sources.values().cloned().collect()
    }

    /// Snapshot of all known sinks.
    pub fn sinks(&self) -> Vec<DeviceState> {
        self.registry.lock().sinks.values().cloned().collect()
    }

    /// Find a source by instance key, stable id, or display name.
    pub fn get_source(&self, identifier: &str) -> Option<DeviceState> {
        let registry = self.registry.lock();
        lookup(&registry.sources, identifier)
    }

    /// Find a sink by instance key, stable id, or display name.
    pub fn get_sink(&self, identifier: &str) -> Option<DeviceState> {
        let registry = self.registry.lock();
        lookup(&registry.sinks, identifier)
    }

    async fn health_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.health_check_interval).await;
            let targets: Vec<(String, bool, String, u16)> = {
                let registry = self.registry.lock();
                registry
                    .sources
                    .iter()
                    .map(|(k, s)| (k.clone(), true, s.connect_host(), s.port()))
                    .chain(
                        registry
                            .sinks
                            .iter()
                            .map(|(k, s)| (k.clone(), false, s.connect_host(), s.port())),
                    )
                    .collect()
            };

            for (key, is_source, host, port) in targets {
                let alive = probe(&host, port).await;
                self.apply_probe_result(&key, is_source, alive);
            }
        }
    }

    /// Apply one health probe outcome. Public for tests.
    pub fn apply_probe_result(&self, key: &str, is_source: bool, success: bool) {
        let transition = {
            let mut registry = self.registry.lock();
            let map = if is_source {
                &mut registry.sources
            } else {
                &mut registry.sinks
            };
            map.get_mut(key).map(|state| {
                let changed = if success {
                    state.record_success()
                } else {
                    state.record_failure()
                };
                (state.clone(), changed)
            })
        };

        if let Some((state, changed)) = transition {
            if changed {
                if success {
                    info!(name = %state.name(), "device came online");
                } else {
                    info!(
                        name = %state.name(),
                        failures = state.consecutive_failures(),
                        "device went offline"
                    );
                }
                self.fire_callbacks(&state, success);
            }
        }
    }

    /// Set one control value on a device over a short-lived client.
    pub async fn set_device_control(
        &self,
        state: &DeviceState,
        control_id: &str,
        value: Value,
    ) -> Result<bool, RouterError> {
        if !state.online {
            warn!(name = %state.name(), "cannot set control on offline device");
            return Ok(false);
        }

        let client = ControlClient::connect(&state.connect_host(), state.port()).await?;
        let mut values = Map::new();
        values.insert(control_id.to_string(), value.clone());
        let response = client
            .request(Message::ControlSet { seq: None, values })
            .await;
        client.close().await;

        match response? {
            Message::ControlSetResponse { status, .. } if status == "ok" => {
                let mut registry = self.registry.lock();
                if let Some(s) = registry.sources.get_mut(&state.device.instance_name) {
                    s.control_values.insert(control_id.to_string(), value.clone());
                }
                if let Some(s) = registry.sinks.get_mut(&state.device.instance_name) {
                    s.control_values.insert(control_id.to_string(), value.clone());
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

fn lookup(map: &HashMap<String, DeviceState>, identifier: &str) -> Option<DeviceState> {
    if let Some(state) = map.get(identifier) {
        return Some(state.clone());
    }
    map.values()
        .find(|s| s.id() == identifier)
        .or_else(|| map.values().find(|s| s.name() == identifier))
        .cloned()
}

/// Health probe: TCP connect and immediately close.
async fn probe(host: &str, port: u16) -> bool {
    matches!(
        tokio::time::timeout(HEALTH_PROBE_TIMEOUT, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// Short-lived capability fetch: `capability_request` + `control_get`.
async fn fetch_device_info(
    host: &str,
    port: u16,
) -> Result<(Value, Map<String, Value>), RouterError> {
    let client = ControlClient::connect(host, port).await?;

    let result = async {
        let response = client
            .request_timeout(
                Message::CapabilityRequest { seq: None },
                CAPABILITY_FETCH_TIMEOUT,
            )
            .await?;
        let capabilities = match response {
            Message::CapabilityResponse { device, .. } => device,
            other => {
                return Err(RouterError::Config(format!(
                    "unexpected capability response: {}",
                    other.type_name()
                )))
            }
        };

        let values = match client
            .request_timeout(
                Message::ControlGet { seq: None, ids: None },
                CAPABILITY_FETCH_TIMEOUT,
            )
            .await
        {
            Ok(Message::ControlGetResponse { values, .. }) => values,
            _ => Map::new(),
        };

        Ok((capabilities, values))
    }
    .await;

    client.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use ltp_wire::SERVICE_TYPE_SINK;

    fn fake_device(instance: &str, service_type: &str, port: u16) -> DiscoveredDevice {
        let mut props = HashMap::new();
        props.insert("id".to_string(), Uuid::new_v4().to_string());
        props.insert("name".to_string(), instance.to_string());
        DiscoveredDevice::from_parts(
            service_type,
            &format!("{instance}.{service_type}"),
            "localhost.local.",
            port,
            props,
            vec!["127.0.0.1".to_string()],
        )
    }

    fn test_controller() -> Arc<Controller> {
        Arc::new(Controller::new(ControllerConfig {
            advertise: false,
            browse: false,
            fetch_capabilities: false,
            ..ControllerConfig::default()
        }))
    }

    #[test]
    fn offline_threshold_is_five_failures() {
        let mut state = DeviceState::new(fake_device("sink-a", SERVICE_TYPE_SINK, 1));
        for _ in 0..4 {
            assert!(!state.record_failure());
            assert!(state.online);
        }
        // Fifth consecutive failure flips offline.
        assert!(state.record_failure());
        assert!(!state.online);

        // Next success flips back online and resets the counter.
        assert!(state.record_success());
        assert!(state.online);
        assert_eq!(state.consecutive_failures(), 0);
        assert!(!state.record_failure());
        assert!(state.online);
    }

    #[test]
    fn success_resets_failure_counter() {
        let mut state = DeviceState::new(fake_device("sink-a", SERVICE_TYPE_SINK, 1));
        for _ in 0..4 {
            state.record_failure();
        }
        assert!(!state.record_success());
        for _ in 0..4 {
            assert!(!state.record_failure());
        }
        assert!(state.online);
    }

    #[test]
    fn stable_id_survives_device_id_change() {
        let controller = test_controller();
        let device = fake_device("sink-a", SERVICE_TYPE_SINK, 1);
        let original_id = device.device_id.unwrap().to_string();
        controller.handle_discovery_event(DiscoveryEvent {
            device: device.clone(),
            online: true,
        });

        // Same instance returns with a different UUID (restart with a
        // regenerated identity).
        let mut restarted = device;
        restarted.device_id = Some(Uuid::new_v4());
        restarted
            .properties
            .insert("id".to_string(), restarted.device_id.unwrap().to_string());
        controller.handle_discovery_event(DiscoveryEvent {
            device: restarted,
            online: true,
        });

        let state = controller.get_sink("sink-a").unwrap();
        assert_eq!(state.id(), original_id);
    }

    #[test]
    fn lookup_by_key_id_and_name() {
        let controller = test_controller();
        let device = fake_device("sink-a", SERVICE_TYPE_SINK, 1);
        let id = device.device_id.unwrap().to_string();
        controller.handle_discovery_event(DiscoveryEvent {
            device,
            online: true,
        });

        assert!(controller
            .get_sink(&format!("sink-a.{SERVICE_TYPE_SINK}"))
            .is_some());
        assert!(controller.get_sink(&id).is_some());
        assert!(controller.get_sink("sink-a").is_some());
        assert!(controller.get_sink("nope").is_none());
        assert!(controller.get_source(&id).is_none());
    }

    #[test]
    fn removal_is_advisory_and_record_survives() {
        let controller = test_controller();
        let device = fake_device("sink-a", SERVICE_TYPE_SINK, 1);
        controller.handle_discovery_event(DiscoveryEvent {
            device: device.clone(),
            online: true,
        });
        controller.handle_discovery_event(DiscoveryEvent {
            device,
            online: false,
        });

        let state = controller.get_sink("sink-a").unwrap();
        assert!(!state.online);

        // The health checker is the authority for bringing it back.
        controller.apply_probe_result(&state.device.instance_name, false, true);
        assert!(controller.get_sink("sink-a").unwrap().online);
    }

    #[test]
    fn callbacks_fire_on_transitions() {
        let controller = test_controller();
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let log = transitions.clone();
        controller.on_device_change(move |state, online| {
            log.lock().push((state.name().to_string(), online));
        });

        let device = fake_device("sink-a", SERVICE_TYPE_SINK, 1);
        let key = device.instance_name.clone();
        controller.handle_discovery_event(DiscoveryEvent {
            device,
            online: true,
        });
        for _ in 0..FAILURES_BEFORE_OFFLINE {
            controller.apply_probe_result(&key, false, false);
        }
        controller.apply_probe_result(&key, false, true);

        let log = transitions.lock();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].1, true);
        assert_eq!(log[1].1, false);
        assert_eq!(log[2].1, true);
    }
}
