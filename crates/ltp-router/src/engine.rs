//! Route execution: the engine that mates sources to sinks.
//!
//! Each enabled route runs under its own supervisor task. The supervisor
//! connects both ends, then watches for trouble; any failure tears the
//! attempt down and retries with exponential backoff. Failures never
//! propagate past the supervisor: a broken route keeps retrying while the
//! rest of the engine runs on.
//!
//! Routes are started and stopped via `pending_starts`/`pending_stops`
//! sets drained by a monitor task. That is the only serialization point
//! between callers (UI, admin messages) and route tasks.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ltp_transport::{ControlClient, DataReceiver, DataSender};
use ltp_wire::message::{StreamFormat, SubscribeTarget};
use ltp_wire::{ColorFormat, DataPacket, Message, StreamAction, TransformSpec};

use crate::controller::{Controller, DeviceState};
use crate::route::{Route, RouteMode, RouteStatus};
use crate::transform::apply_transform;
use crate::virtual_source::VirtualSourceSpec;
use crate::RouterError;

/// Delay before re-resolving when a route peer is offline.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Error backoff: initial delay, growth factor, cap.
const BACKOFF_INITIAL: Duration = Duration::from_secs(2);
const BACKOFF_FACTOR: f64 = 1.5;
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Cadence of the pending-starts/stops monitor.
const MONITOR_INTERVAL: Duration = Duration::from_millis(100);

/// Cadence of per-route liveness supervision.
const SUPERVISOR_INTERVAL: Duration = Duration::from_secs(1);

/// Connected time without frames before the no-data warning surfaces.
const NO_DATA_WARNING_AFTER: Duration = Duration::from_secs(5);

/// Timeout for best-effort STOP messages during teardown.
const CLEANUP_STOP_TIMEOUT: Duration = Duration::from_secs(2);

struct RouteTask {
    handle: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

/// The routing engine. Composes the controller's device view with
/// transports to execute routes.
pub struct RoutingEngine {
    controller: Arc<Controller>,
    routes: Mutex<HashMap<String, Arc<Route>>>,
    virtuals: Mutex<HashMap<String, VirtualSourceSpec>>,
    tasks: tokio::sync::Mutex<HashMap<String, RouteTask>>,
    pending_starts: Mutex<HashSet<String>>,
    pending_stops: Mutex<HashSet<String>>,
    running: AtomicBool,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl RoutingEngine {
    pub fn new(controller: Arc<Controller>) -> Arc<Self> {
        Arc::new(Self {
            controller,
            routes: Mutex::new(HashMap::new()),
            virtuals: Mutex::new(HashMap::new()),
            tasks: tokio::sync::Mutex::new(HashMap::new()),
            pending_starts: Mutex::new(HashSet::new()),
            pending_stops: Mutex::new(HashSet::new()),
            running: AtomicBool::new(false),
            monitor_task: Mutex::new(None),
        })
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    /// Register an in-process virtual source. Its name can then be used
    /// as a route's source id.
    pub fn register_virtual_source(&self, spec: VirtualSourceSpec) -> Result<(), RouterError> {
        // Validate the pattern and dimensions up front.
        spec.build_producer()?;
        info!(name = %spec.name, pattern = %spec.pattern, "registered virtual source");
        self.virtuals.lock().insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn virtual_sources(&self) -> Vec<VirtualSourceSpec> {
        self.virtuals.lock().values().cloned().collect()
    }

    /// `true` if a route already connects this (source, sink) pair.
    pub fn route_exists(&self, source_id: &str, sink_id: &str) -> bool {
        self.routes
            .lock()
            .values()
            .any(|r| r.source_id == source_id && r.sink_id == sink_id)
    }

    /// Create a route. At most one route may exist per (source, sink)
    /// pair.
    pub fn create_route(
        &self,
        name: &str,
        source_id: &str,
        sink_id: &str,
        mode: RouteMode,
        transform: TransformSpec,
        enabled: bool,
    ) -> Result<Arc<Route>, RouterError> {
        let mut routes = self.routes.lock();
        if routes
            .values()
            .any(|r| r.source_id == source_id && r.sink_id == sink_id)
        {
            return Err(RouterError::RouteExists {
                source_id: source_id.to_string(),
                sink_id: sink_id.to_string(),
            });
        }

        let id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let route = Arc::new(Route::new(
            id.clone(),
            name.to_string(),
            source_id.to_string(),
            sink_id.to_string(),
            mode,
            transform,
            enabled,
        ));
        routes.insert(id.clone(), route.clone());
        drop(routes);

        info!(route = %name, %source_id, %sink_id, ?mode, "created route");
        if enabled && self.running.load(Ordering::SeqCst) {
            self.pending_starts.lock().insert(id);
        }
        Ok(route)
    }

    pub fn get_route(&self, route_id: &str) -> Option<Arc<Route>> {
        self.routes.lock().get(route_id).cloned()
    }

    pub fn routes(&self) -> Vec<Arc<Route>> {
        self.routes.lock().values().cloned().collect()
    }

    /// Delete a route, tearing down its task if running.
    pub async fn delete_route(&self, route_id: &str) -> Result<(), RouterError> {
        let route = self
            .routes
            .lock()
            .remove(route_id)
            .ok_or_else(|| RouterError::RouteNotFound(route_id.to_string()))?;
        route.set_enabled(false);
        self.stop_route_task(route_id).await;
        info!(route = %route.name, "deleted route");
        Ok(())
    }

    /// Enable a route; it will be picked up by the monitor.
    pub fn enable_route(&self, route_id: &str) -> bool {
        let Some(route) = self.get_route(route_id) else {
            return false;
        };
        if !route.enabled() {
            route.set_enabled(true);
            if self.running.load(Ordering::SeqCst) {
                self.pending_starts.lock().insert(route_id.to_string());
            }
        }
        true
    }

    /// Disable a route; a disabled route holds no open streams.
    pub fn disable_route(&self, route_id: &str) -> bool {
        let Some(route) = self.get_route(route_id) else {
            return false;
        };
        if route.enabled() {
            route.set_enabled(false);
            if self.running.load(Ordering::SeqCst) {
                self.pending_stops.lock().insert(route_id.to_string());
            }
        }
        true
    }

    /// Start the engine: queue enabled routes and run the monitor.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let routes = self.routes.lock();
            let mut pending = self.pending_starts.lock();
            for (id, route) in routes.iter() {
                if route.enabled() {
                    pending.insert(id.clone());
                }
            }
        }

        let engine = self.clone();
        *self.monitor_task.lock() = Some(tokio::spawn(async move {
            engine.monitor_loop().await;
        }));
        info!("routing engine started");
    }

    /// Stop the engine and every route task.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.monitor_task.lock().take() {
            task.abort();
        }

        let ids: Vec<String> = self.tasks.lock().await.keys().cloned().collect();
        for id in ids {
            self.stop_route_task(&id).await;
        }
        self.pending_starts.lock().clear();
        self.pending_stops.lock().clear();
        info!("routing engine stopped");
    }

    async fn stop_route_task(&self, route_id: &str) {
        let task = self.tasks.lock().await.remove(route_id);
        if let Some(task) = task {
            let _ = task.stop.send(true);
            if let Err(e) = task.handle.await {
                if !e.is_cancelled() {
                    warn!(%route_id, error = %e, "route task ended abnormally");
                }
            }
        }
        if let Some(route) = self.get_route(route_id) {
            route.set_status(RouteStatus::Disconnected, None);
        }
    }

    /// Drain pending starts/stops. The only place route tasks are spawned
    /// or awaited.
    async fn monitor_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            let starts: Vec<String> = self.pending_starts.lock().drain().collect();
            for id in starts {
                let Some(route) = self.get_route(&id) else {
                    continue;
                };
                if !route.enabled() {
                    continue;
                }
                let mut tasks = self.tasks.lock().await;
                // Reap finished supervisors so re-enable can respawn.
                tasks.retain(|_, t| !t.handle.is_finished());
                if tasks.contains_key(&id) {
                    continue;
                }
                let (stop_tx, stop_rx) = watch::channel(false);
                let engine = self.clone();
                let handle = tokio::spawn(async move {
                    engine.run_route(route, stop_rx).await;
                });
                tasks.insert(
                    id,
                    RouteTask {
                        handle,
                        stop: stop_tx,
                    },
                );
            }

            let stops: Vec<String> = self.pending_stops.lock().drain().collect();
            for id in stops {
                self.stop_route_task(&id).await;
            }

            tokio::time::sleep(MONITOR_INTERVAL).await;
        }
    }

    /// Route supervisor: retry loop around individual connection attempts.
    async fn run_route(self: Arc<Self>, route: Arc<Route>, mut stop_rx: watch::Receiver<bool>) {
        let mut backoff = BACKOFF_INITIAL;
        info!(route = %route.name, "route supervisor started");

        while route.enabled() && !*stop_rx.borrow() {
            route.set_status(RouteStatus::Connecting, None);
            let outcome = self.run_attempt(&route, &mut stop_rx).await;
            match outcome {
                Outcome::Stopped => break,
                Outcome::Waiting(who) => {
                    debug!(route = %route.name, waiting_for = %who, "peer unavailable");
                    route.set_status(
                        RouteStatus::Disconnected,
                        Some(format!("Waiting for {who}")),
                    );
                    if sleep_or_stop(RECONNECT_DELAY, &mut stop_rx).await {
                        break;
                    }
                }
                Outcome::Failed {
                    message,
                    was_connected,
                } => {
                    warn!(route = %route.name, error = %message, "route attempt failed");
                    route.set_status(RouteStatus::Error, Some(message));
                    if was_connected {
                        // A fresh failure after a good connection restarts
                        // the backoff schedule.
                        backoff = BACKOFF_INITIAL;
                    }
                    if sleep_or_stop(backoff, &mut stop_rx).await {
                        break;
                    }
                    backoff = next_backoff(backoff);
                }
            }
        }

        route.set_status(RouteStatus::Disconnected, None);
        info!(route = %route.name, "route supervisor ended");
    }

    async fn run_attempt(&self, route: &Arc<Route>, stop_rx: &mut watch::Receiver<bool>) -> Outcome {
        let is_virtual = self.virtuals.lock().contains_key(&route.source_id);
        if is_virtual {
            return self.attempt_virtual(route, stop_rx).await;
        }
        match route.mode {
            RouteMode::Proxy => self.attempt_proxy(route, stop_rx).await,
            RouteMode::Direct => self.attempt_direct(route, stop_rx).await,
        }
    }

    fn resolve_sink(&self, route: &Route) -> Result<DeviceState, Outcome> {
        match self.controller.get_sink(&route.sink_id) {
            Some(state) if state.online => Ok(state),
            Some(state) => Err(Outcome::Waiting(state.name().to_string())),
            None => Err(Outcome::Waiting(route.sink_id.clone())),
        }
    }

    fn resolve_source(&self, route: &Route) -> Result<DeviceState, Outcome> {
        match self.controller.get_source(&route.source_id) {
            Some(state) if state.online => Ok(state),
            Some(state) => Err(Outcome::Waiting(state.name().to_string())),
            None => Err(Outcome::Waiting(route.source_id.clone())),
        }
    }

    /// Proxy mode: subscribe to the source with this controller as the
    /// callback, transform every frame, forward to the sink.
    async fn attempt_proxy(&self, route: &Arc<Route>, stop_rx: &mut watch::Receiver<bool>) -> Outcome {
        let sink = match self.resolve_sink(route) {
            Ok(state) => state,
            Err(outcome) => return outcome,
        };
        let source = match self.resolve_source(route) {
            Ok(state) => state,
            Err(outcome) => return outcome,
        };

        let mut links = RouteLinks::default();

        let sink_link = match connect_sink(&sink).await {
            Ok(link) => link,
            Err(message) => {
                return Outcome::Failed {
                    message,
                    was_connected: false,
                }
            }
        };
        let sink_host = sink.connect_host();
        let sink_udp_port = sink_link.udp_port;
        links.sink = Some(sink_link);

        let sender = match DataSender::connect(&sink_host, sink_udp_port).await {
            Ok(sender) => Arc::new(sender),
            Err(e) => {
                links.teardown().await;
                return Outcome::Failed {
                    message: format!("data sender failed: {e}"),
                    was_connected: false,
                };
            }
        };

        // Bind the receiver first: the subscribe callback needs its port.
        let (forward_tx, mut forward_rx) = mpsc::channel::<DataPacket>(4);
        let receiver = match DataReceiver::bind(
            "0.0.0.0",
            0,
            Arc::new(move |packet| {
                // Data plane backpressure: drop rather than queue.
                let _ = forward_tx.try_send(packet);
            }),
        )
        .await
        {
            Ok(receiver) => receiver,
            Err(e) => {
                links.teardown().await;
                return Outcome::Failed {
                    message: format!("data receiver failed: {e}"),
                    was_connected: false,
                };
            }
        };
        let receiver_port = receiver.local_port();
        links.receiver = Some(receiver);

        let source_host = source.connect_host();
        let local_ip = local_ip_toward(&source_host).await;

        let source_link =
            match subscribe_source(&source, &local_ip, receiver_port).await {
                Ok(link) => link,
                Err(message) => {
                    links.teardown().await;
                    return Outcome::Failed {
                        message,
                        was_connected: false,
                    };
                }
            };
        links.source = Some(source_link);

        route.clear_last_frame();
        route.set_status(RouteStatus::Connected, None);
        info!(
            route = %route.name,
            source = %source.name(),
            sink = %format!("{sink_host}:{sink_udp_port}"),
            callback = %format!("{local_ip}:{receiver_port}"),
            "proxy route connected"
        );

        let source_dims = source.dimensions();
        let sink_dims = sink.dimensions();
        let connected_at = tokio::time::Instant::now();
        let mut supervisor = tokio::time::interval(SUPERVISOR_INTERVAL);
        let mut warned_no_data = false;

        let outcome = loop {
            tokio::select! {
                _ = wait_stopped(stop_rx) => break Outcome::Stopped,
                packet = forward_rx.recv() => {
                    let Some(packet) = packet else {
                        break Outcome::Failed {
                            message: "receiver channel closed".to_string(),
                            was_connected: true,
                        };
                    };
                    let spec = route.transform();
                    let bpp = packet.color_format.bytes_per_pixel();
                    let frame =
                        apply_transform(&packet.pixels, bpp, &source_dims, &sink_dims, &spec);
                    if let Err(e) = sender.send(&frame, packet.color_format, packet.encoding).await {
                        break Outcome::Failed {
                            message: format!("forward to sink failed: {e}"),
                            was_connected: true,
                        };
                    }
                    route.record_frame();
                    if warned_no_data {
                        warned_no_data = false;
                        route.set_status(RouteStatus::Connected, None);
                    }
                }
                _ = supervisor.tick() => {
                    if let Some(outcome) = self.check_peers_online(route, true) {
                        break outcome;
                    }
                    // Surface a warning if connected but silent; keep the
                    // route up.
                    if route.last_frame().is_none()
                        && connected_at.elapsed() >= NO_DATA_WARNING_AFTER
                        && !warned_no_data
                    {
                        warned_no_data = true;
                        warn!(route = %route.name, "no data received on connected route");
                        route.set_status(
                            RouteStatus::Connected,
                            Some("No data received - check source output".to_string()),
                        );
                    }
                }
            }
        };

        links.teardown().await;
        outcome
    }

    /// Direct mode: point the source at the sink's data port and only
    /// supervise.
    async fn attempt_direct(&self, route: &Arc<Route>, stop_rx: &mut watch::Receiver<bool>) -> Outcome {
        let sink = match self.resolve_sink(route) {
            Ok(state) => state,
            Err(outcome) => return outcome,
        };
        let source = match self.resolve_source(route) {
            Ok(state) => state,
            Err(outcome) => return outcome,
        };

        let mut links = RouteLinks::default();

        let sink_link = match connect_sink(&sink).await {
            Ok(link) => link,
            Err(message) => {
                return Outcome::Failed {
                    message,
                    was_connected: false,
                }
            }
        };
        let sink_host = sink.connect_host();
        let sink_udp_port = sink_link.udp_port;
        links.sink = Some(sink_link);

        let source_link = match subscribe_source(&source, &sink_host, sink_udp_port).await {
            Ok(link) => link,
            Err(message) => {
                links.teardown().await;
                return Outcome::Failed {
                    message,
                    was_connected: false,
                };
            }
        };
        links.source = Some(source_link);

        route.set_status(RouteStatus::Connected, None);
        info!(
            route = %route.name,
            source = %source.name(),
            target = %format!("{sink_host}:{sink_udp_port}"),
            "direct route connected"
        );

        let mut supervisor = tokio::time::interval(SUPERVISOR_INTERVAL);
        let outcome = loop {
            tokio::select! {
                _ = wait_stopped(stop_rx) => break Outcome::Stopped,
                _ = supervisor.tick() => {
                    if let Some(outcome) = self.check_peers_online(route, true) {
                        break outcome;
                    }
                }
            }
        };

        links.teardown().await;
        outcome
    }

    /// Virtual source: render locally and push through the same transform
    /// path as a proxy route.
    async fn attempt_virtual(&self, route: &Arc<Route>, stop_rx: &mut watch::Receiver<bool>) -> Outcome {
        let sink = match self.resolve_sink(route) {
            Ok(state) => state,
            Err(outcome) => return outcome,
        };
        let Some(spec) = self.virtuals.lock().get(&route.source_id).cloned() else {
            return Outcome::Failed {
                message: format!("virtual source vanished: {}", route.source_id),
                was_connected: false,
            };
        };
        let mut producer = match spec.build_producer() {
            Ok(producer) => producer,
            Err(e) => {
                return Outcome::Failed {
                    message: e.to_string(),
                    was_connected: false,
                }
            }
        };

        let mut links = RouteLinks::default();
        let sink_link = match connect_sink(&sink).await {
            Ok(link) => link,
            Err(message) => {
                return Outcome::Failed {
                    message,
                    was_connected: false,
                }
            }
        };
        let sink_host = sink.connect_host();
        let sink_udp_port = sink_link.udp_port;
        links.sink = Some(sink_link);

        let sender = match DataSender::connect(&sink_host, sink_udp_port).await {
            Ok(sender) => sender,
            Err(e) => {
                links.teardown().await;
                return Outcome::Failed {
                    message: format!("data sender failed: {e}"),
                    was_connected: false,
                };
            }
        };

        route.set_status(RouteStatus::Connected, None);
        info!(route = %route.name, pattern = %spec.pattern, "virtual route connected");

        let sink_dims = sink.dimensions();
        let frame_interval = Duration::from_secs_f64(1.0 / f64::from(spec.rate.max(1)));
        let mut ticker = tokio::time::interval(frame_interval);
        let mut since_check = Duration::ZERO;

        let outcome = loop {
            tokio::select! {
                _ = wait_stopped(stop_rx) => break Outcome::Stopped,
                _ = ticker.tick() => {
                    since_check += frame_interval;
                    if since_check >= SUPERVISOR_INTERVAL {
                        since_check = Duration::ZERO;
                        if let Some(outcome) = self.check_peers_online(route, false) {
                            break outcome;
                        }
                    }

                    let Some(frame) = producer.next_frame() else { continue };
                    let spec_now = route.transform();
                    let out = apply_transform(&frame, 3, &spec.dimensions, &sink_dims, &spec_now);
                    if let Err(e) = sender.send(&out, ColorFormat::Rgb, ltp_wire::Encoding::Raw).await {
                        break Outcome::Failed {
                            message: format!("forward to sink failed: {e}"),
                            was_connected: true,
                        };
                    }
                    route.record_frame();
                }
            }
        };

        links.teardown().await;
        outcome
    }

    /// Supervision check: both peers (or just the sink for virtual
    /// routes) must still be online.
    fn check_peers_online(&self, route: &Route, check_source: bool) -> Option<Outcome> {
        let sink_online = self
            .controller
            .get_sink(&route.sink_id)
            .map(|s| s.online)
            .unwrap_or(false);
        if !sink_online {
            return Some(Outcome::Failed {
                message: "sink went offline".to_string(),
                was_connected: true,
            });
        }
        if check_source {
            let source_online = self
                .controller
                .get_source(&route.source_id)
                .map(|s| s.online)
                .unwrap_or(false);
            if !source_online {
                return Some(Outcome::Failed {
                    message: "source went offline".to_string(),
                    was_connected: true,
                });
            }
        }
        None
    }
}

enum Outcome {
    /// The stop signal fired.
    Stopped,
    /// A peer is missing or offline; retry after the fixed delay.
    Waiting(String),
    /// The attempt failed; retry with backoff.
    Failed { message: String, was_connected: bool },
}

struct SinkLink {
    client: ControlClient,
    stream_id: String,
    udp_port: u16,
}

struct SourceLink {
    client: ControlClient,
    stream_id: String,
}

#[derive(Default)]
struct RouteLinks {
    sink: Option<SinkLink>,
    source: Option<SourceLink>,
    receiver: Option<DataReceiver>,
}

impl RouteLinks {
    /// Best-effort teardown: STOP both streams (2 s each), close the
    /// clients, stop the receiver. Errors are logged and swallowed.
    async fn teardown(self) {
        if let Some(receiver) = self.receiver {
            receiver.stop();
        }
        if let Some(link) = self.source {
            let stop = Message::StreamControl {
                seq: None,
                stream_id: link.stream_id.clone(),
                action: StreamAction::Stop,
            };
            if let Err(e) = link.client.request_timeout(stop, CLEANUP_STOP_TIMEOUT).await {
                debug!(error = %e, "source stream stop failed during teardown");
            }
            link.client.close().await;
        }
        if let Some(link) = self.sink {
            let stop = Message::StreamControl {
                seq: None,
                stream_id: link.stream_id.clone(),
                action: StreamAction::Stop,
            };
            if let Err(e) = link.client.request_timeout(stop, CLEANUP_STOP_TIMEOUT).await {
                debug!(error = %e, "sink stream stop failed during teardown");
            }
            link.client.close().await;
        }
    }
}

/// Connect to a sink, set up a stream, and start it.
async fn connect_sink(sink: &DeviceState) -> Result<SinkLink, String> {
    let client = ControlClient::connect(&sink.connect_host(), sink.port())
        .await
        .map_err(|e| format!("sink connect failed: {e}"))?;

    let response = client
        .request(Message::StreamSetup {
            seq: None,
            format: StreamFormat::default(),
            udp_port: None,
        })
        .await
        .map_err(|e| format!("sink stream setup failed: {e}"))?;

    let (udp_port, stream_id) = match response {
        Message::StreamSetupResponse {
            status,
            udp_port,
            stream_id,
            ..
        } if status == "ok" => (udp_port, stream_id),
        other => {
            client.close().await;
            return Err(format!("sink stream setup rejected: {}", other.type_name()));
        }
    };

    let start = Message::StreamControl {
        seq: None,
        stream_id: stream_id.clone(),
        action: StreamAction::Start,
    };
    if let Err(e) = client.request(start).await {
        client.close().await;
        return Err(format!("sink stream start failed: {e}"));
    }

    Ok(SinkLink {
        client,
        stream_id,
        udp_port,
    })
}

/// Connect to a source and subscribe with the given callback address.
async fn subscribe_source(
    source: &DeviceState,
    callback_host: &str,
    callback_port: u16,
) -> Result<SourceLink, String> {
    let client = ControlClient::connect(&source.connect_host(), source.port())
        .await
        .map_err(|e| format!("source connect failed: {e}"))?;

    let target = SubscribeTarget {
        dimensions: source.dimensions(),
        color: ColorFormat::Rgb,
        rate: source.device.rate().unwrap_or(ltp_wire::DEFAULT_REFRESH_HZ),
    };
    let response = client
        .request(Message::Subscribe {
            seq: None,
            target,
            callback_host: Some(callback_host.to_string()),
            callback_port: Some(callback_port),
        })
        .await
        .map_err(|e| format!("source subscribe failed: {e}"))?;

    match response {
        Message::SubscribeResponse {
            status, stream_id, ..
        } if status == "ok" => Ok(SourceLink { client, stream_id }),
        other => {
            client.close().await;
            Err(format!("source subscribe rejected: {}", other.type_name()))
        }
    }
}

/// Resolve the local IP the source should send to: the address of a UDP
/// socket "connected" toward the source, falling back to loopback.
async fn local_ip_toward(remote_host: &str) -> String {
    if let Ok(socket) = UdpSocket::bind("0.0.0.0:0").await {
        if socket.connect((remote_host, 1)).await.is_ok() {
            if let Ok(addr) = socket.local_addr() {
                return addr.ip().to_string();
            }
        }
    }
    "127.0.0.1".to_string()
}

/// Resolves when the stop signal fires.
async fn wait_stopped(stop_rx: &mut watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow_and_update() {
            return;
        }
        if stop_rx.changed().await.is_err() {
            // Sender gone: treat as stopped.
            return;
        }
    }
}

/// Sleep, returning `true` if the stop signal fired first.
async fn sleep_or_stop(duration: Duration, stop_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = wait_stopped(stop_rx) => true,
    }
}

fn next_backoff(current: Duration) -> Duration {
    current.mul_f64(BACKOFF_FACTOR).min(BACKOFF_MAX)
}
