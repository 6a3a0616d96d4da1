//! The source endpoint: produces pixel frames on a fixed-rate render loop
//! and streams them to subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ltp_discovery::ServiceAdvertiser;
use ltp_transport::{
    ControlServer, ControlServerHandle, DataSender, MessageHandler, StreamManager,
};
use ltp_wire::control::{BooleanControl, Control, ControlRegistry, NumberControl};
use ltp_wire::device::{DeviceInfo, SourceCapabilities};
use ltp_wire::message::SubscribeTarget;
use ltp_wire::{
    ColorFormat, Encoding, ErrorCode, Message, ProtocolError, SourceMode, StreamAction,
};

use crate::backend::FrameProducer;
use crate::color::{apply_brightness, apply_gamma};
use crate::DeviceError;

/// Configuration for a [`Source`].
#[derive(Clone, Debug)]
pub struct SourceConfig {
    pub device_id: Uuid,
    pub name: String,
    pub description: String,
    /// Native output dimensions: `[n]` or `[w, h]`.
    pub dimensions: Vec<u32>,
    pub color_format: ColorFormat,
    /// Nominal frame rate in Hz; adjustable at runtime via the `rate`
    /// control.
    pub rate: u32,
    pub mode: SourceMode,
    pub control_host: String,
    pub control_port: u16,
    pub advertise: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            device_id: Uuid::new_v4(),
            name: "LTP Source".to_string(),
            description: String::new(),
            dimensions: vec![60],
            color_format: ColorFormat::Rgb,
            rate: ltp_wire::DEFAULT_REFRESH_HZ,
            mode: SourceMode::Stream,
            control_host: "0.0.0.0".to_string(),
            control_port: 0,
            advertise: true,
        }
    }
}

impl SourceConfig {
    pub fn pixels(&self) -> u32 {
        if self.dimensions.is_empty() {
            return 0;
        }
        self.dimensions.iter().product()
    }
}

struct SourceShared {
    config: SourceConfig,
    controls: Mutex<ControlRegistry>,
    streams: Mutex<StreamManager>,
    senders: Mutex<HashMap<String, Arc<DataSender>>>,
    producer: Mutex<Box<dyn FrameProducer>>,
    broadcaster: Mutex<Option<ControlServerHandle>>,
    /// Current rate in Hz; mirrors the `rate` control.
    rate: AtomicU32,
    paused: AtomicBool,
    frame_count: AtomicU64,
}

impl SourceShared {
    fn setup_controls(registry: &mut ControlRegistry, rate: u32) -> Result<(), ProtocolError> {
        registry.register(Control::Number(NumberControl {
            id: "brightness".to_string(),
            name: "Brightness".to_string(),
            description: "Output brightness".to_string(),
            readonly: false,
            group: "output".to_string(),
            value: 1.0,
            min: Some(0.0),
            max: Some(1.0),
            step: 0.05,
            unit: String::new(),
        }))?;
        registry.register(Control::Number(NumberControl {
            id: "gamma".to_string(),
            name: "Gamma".to_string(),
            description: "Gamma correction".to_string(),
            readonly: false,
            group: "output".to_string(),
            value: 1.0,
            min: Some(1.0),
            max: Some(3.0),
            step: 0.1,
            unit: String::new(),
        }))?;
        registry.register(Control::Number(NumberControl {
            id: "rate".to_string(),
            name: "Frame Rate".to_string(),
            description: "Output frame rate".to_string(),
            readonly: false,
            group: "playback".to_string(),
            value: f64::from(rate),
            min: Some(1.0),
            max: Some(120.0),
            step: 1.0,
            unit: "fps".to_string(),
        }))?;
        registry.register(Control::Boolean(BooleanControl {
            id: "paused".to_string(),
            name: "Paused".to_string(),
            description: "Pause output".to_string(),
            readonly: false,
            group: "playback".to_string(),
            value: false,
        }))?;
        Ok(())
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities {
            device: DeviceInfo::new(
                self.config.device_id,
                self.config.name.clone(),
                self.config.description.clone(),
            ),
            output_dimensions: self.config.dimensions.clone(),
            color_format: self.config.color_format,
            rate: self.rate.load(Ordering::Relaxed),
            mode: self.config.mode,
            controls: self.controls.lock().to_list(),
        }
    }

    /// Reflect applied control changes into the render loop's state.
    fn sync_runtime_controls(&self, applied: &serde_json::Map<String, serde_json::Value>) {
        if let Some(rate) = applied.get("rate").and_then(|v| v.as_f64()) {
            self.rate.store(rate.max(1.0) as u32, Ordering::Relaxed);
        }
        if let Some(paused) = applied.get("paused").and_then(|v| v.as_bool()) {
            self.paused.store(paused, Ordering::Relaxed);
        }
    }

    fn broadcast_control_changed(&self, values: serde_json::Map<String, serde_json::Value>) {
        if values.is_empty() {
            return;
        }
        if let Some(broadcaster) = self.broadcaster.lock().clone() {
            broadcaster.broadcast(&Message::ControlChanged { values });
        }
    }

    async fn render_tick(&self) {
        if self.paused.load(Ordering::Relaxed) {
            return;
        }
        let has_subscribers = self.streams.lock().any_active();
        if !has_subscribers {
            return;
        }

        let frame = self.producer.lock().next_frame();
        let Some(mut frame) = frame else {
            return;
        };

        let (brightness, gamma) = {
            let controls = self.controls.lock();
            let brightness = controls
                .get_value("brightness")
                .ok()
                .and_then(|v| v.as_f64())
                .unwrap_or(1.0);
            let gamma = controls
                .get_value("gamma")
                .ok()
                .and_then(|v| v.as_f64())
                .unwrap_or(1.0);
            (brightness, gamma)
        };
        apply_brightness(&mut frame, brightness);
        apply_gamma(&mut frame, gamma);

        self.frame_count.fetch_add(1, Ordering::Relaxed);

        let targets: Vec<(String, Arc<DataSender>)> = {
            let streams = self.streams.lock();
            let senders = self.senders.lock();
            streams
                .active_streams()
                .into_iter()
                .filter_map(|id| senders.get(&id).map(|s| (id, s.clone())))
                .collect()
        };
        for (stream_id, sender) in targets {
            if let Err(e) = sender
                .send(&frame, self.config.color_format, Encoding::Raw)
                .await
            {
                warn!(%stream_id, error = %e, "failed to send frame");
            } else {
                self.streams.lock().record_frame_sent(&stream_id);
            }
        }
    }
}

struct SourceHandler {
    shared: Arc<SourceShared>,
}

impl MessageHandler for SourceHandler {
    fn handle(&self, message: Message) -> BoxFuture<'_, Result<Option<Message>, ProtocolError>> {
        Box::pin(async move {
            match message {
                Message::CapabilityRequest { seq } => {
                    let device = serde_json::to_value(self.shared.capabilities())
                        .map_err(|e| ProtocolError::new(ErrorCode::Internal, e.to_string()))?;
                    Ok(Some(Message::CapabilityResponse { seq, device }))
                }
                Message::Subscribe {
                    seq,
                    target,
                    callback_host,
                    callback_port,
                } => {
                    let (Some(host), Some(port)) = (callback_host, callback_port) else {
                        return Err(ProtocolError::new(
                            ErrorCode::InvalidValue,
                            "callback_host and callback_port required",
                        ));
                    };

                    let sender = DataSender::connect(&host, port)
                        .await
                        .map_err(|e| ProtocolError::new(ErrorCode::Internal, e.to_string()))?;

                    // Subscribing implicitly starts the flow; the returned
                    // stream id is the stop handle.
                    let stream_id = {
                        let mut streams = self.shared.streams.lock();
                        let id = streams
                            .create_stream(self.shared.config.color_format, Encoding::Raw);
                        streams.start_stream(&id);
                        id
                    };
                    self.shared
                        .senders
                        .lock()
                        .insert(stream_id.clone(), Arc::new(sender));

                    info!(%stream_id, callback = %format!("{host}:{port}"), "subscription created");
                    debug!(requested = ?target, "subscription target requested");

                    Ok(Some(Message::SubscribeResponse {
                        seq,
                        status: "ok".to_string(),
                        actual: SubscribeTarget {
                            dimensions: self.shared.config.dimensions.clone(),
                            color: self.shared.config.color_format,
                            rate: self.shared.rate.load(Ordering::Relaxed),
                        },
                        stream_id,
                    }))
                }
                Message::StreamControl {
                    seq,
                    stream_id,
                    action,
                } => {
                    if !self.shared.streams.lock().contains(&stream_id) {
                        return Err(ProtocolError::new(
                            ErrorCode::NotFound,
                            format!("unknown stream: {stream_id}"),
                        ));
                    }
                    match action {
                        StreamAction::Start => {
                            self.shared.streams.lock().start_stream(&stream_id);
                        }
                        StreamAction::Pause => {
                            self.shared.streams.lock().stop_stream(&stream_id);
                        }
                        StreamAction::Stop => {
                            let mut streams = self.shared.streams.lock();
                            streams.stop_stream(&stream_id);
                            streams.delete_stream(&stream_id);
                            drop(streams);
                            self.shared.senders.lock().remove(&stream_id);
                            info!(%stream_id, "subscription stopped");
                        }
                    }
                    Ok(Some(Message::StreamControlResponse {
                        seq,
                        status: "ok".to_string(),
                        stream_id,
                    }))
                }
                Message::ControlGet { seq, ids } => {
                    let values = self.shared.controls.lock().get_values(ids.as_deref());
                    Ok(Some(Message::ControlGetResponse {
                        seq,
                        status: "ok".to_string(),
                        values,
                    }))
                }
                Message::ControlSet { seq, values } => {
                    let (applied, errors) = self.shared.controls.lock().set_values(&values);
                    self.shared.sync_runtime_controls(&applied);
                    self.shared.broadcast_control_changed(applied.clone());
                    let status = if errors.is_empty() { "ok" } else { "partial" };
                    Ok(Some(Message::ControlSetResponse {
                        seq,
                        status: status.to_string(),
                        applied,
                        errors: (!errors.is_empty()).then_some(errors),
                    }))
                }
                other => {
                    debug!(msg = other.type_name(), "source ignoring message");
                    Ok(None)
                }
            }
        })
    }
}

/// An LTP source: produces frames and streams them to subscribers.
pub struct Source {
    shared: Arc<SourceShared>,
    server: Option<ControlServer>,
    advertiser: Option<Arc<ServiceAdvertiser>>,
    render_task: Option<JoinHandle<()>>,
    stats_task: Option<JoinHandle<()>>,
    running: AtomicBool,
}

impl Source {
    pub fn new(config: SourceConfig, producer: Box<dyn FrameProducer>) -> Result<Self, DeviceError> {
        if config.dimensions.is_empty() || config.pixels() == 0 {
            return Err(DeviceError::Config(format!(
                "invalid dimensions: {:?}",
                config.dimensions
            )));
        }
        if config.rate == 0 {
            return Err(DeviceError::Config("rate must be at least 1".to_string()));
        }

        let mut controls = ControlRegistry::new();
        SourceShared::setup_controls(&mut controls, config.rate)?;

        let rate = config.rate;
        let shared = Arc::new(SourceShared {
            controls: Mutex::new(controls),
            streams: Mutex::new(StreamManager::new()),
            senders: Mutex::new(HashMap::new()),
            producer: Mutex::new(producer),
            broadcaster: Mutex::new(None),
            rate: AtomicU32::new(rate),
            paused: AtomicBool::new(false),
            frame_count: AtomicU64::new(0),
            config,
        });

        Ok(Self {
            shared,
            server: None,
            advertiser: None,
            render_task: None,
            stats_task: None,
            running: AtomicBool::new(false),
        })
    }

    /// Start the control server, advertisement, and render loop.
    /// Idempotent.
    pub async fn start(&mut self) -> Result<(), DeviceError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let config = self.shared.config.clone();
        info!(name = %config.name, rate = config.rate, "starting source");

        let server = ControlServer::bind(
            &config.control_host,
            config.control_port,
            Arc::new(SourceHandler {
                shared: self.shared.clone(),
            }),
        )
        .await?;
        *self.shared.broadcaster.lock() = Some(server.handle());

        if config.advertise {
            let instance = config.name.to_lowercase().replace(' ', "-");
            let advertiser = Arc::new(ServiceAdvertiser::source(
                &instance,
                server.local_port(),
                config.device_id,
                &config.name,
                &config.description,
                &config.dimensions,
                config.color_format,
                config.rate,
                config.mode,
                true,
            )?);
            advertiser.start()?;
            self.advertiser = Some(advertiser);
        }

        let render_shared = self.shared.clone();
        self.render_task = Some(tokio::spawn(async move {
            loop {
                let rate = render_shared.rate.load(Ordering::Relaxed).max(1);
                let tick_start = tokio::time::Instant::now();
                render_shared.render_tick().await;
                let interval = Duration::from_secs_f64(1.0 / f64::from(rate));
                let elapsed = tick_start.elapsed();
                if elapsed < interval {
                    tokio::time::sleep(interval - elapsed).await;
                }
            }
        }));

        let stats_shared = self.shared.clone();
        self.stats_task = Some(tokio::spawn(async move {
            let mut last_count = 0u64;
            loop {
                tokio::time::sleep(Duration::from_secs(5)).await;
                let count = stats_shared.frame_count.load(Ordering::Relaxed);
                let frames = count - last_count;
                if frames > 0 {
                    info!(
                        fps = frames as f64 / 5.0,
                        total = count,
                        subscribers = stats_shared.streams.lock().active_streams().len(),
                        "source stats"
                    );
                }
                last_count = count;
            }
        }));

        info!(control_port = server.local_port(), "source started");
        self.server = Some(server);
        Ok(())
    }

    /// Stop the render loop, streams, and server. Idempotent.
    pub async fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(name = %self.shared.config.name, "stopping source");

        if let Some(task) = self.render_task.take() {
            task.abort();
        }
        if let Some(task) = self.stats_task.take() {
            task.abort();
        }
        if let Some(advertiser) = self.advertiser.take() {
            advertiser.stop();
        }
        self.shared.senders.lock().clear();
        if let Some(server) = self.server.take() {
            server.stop();
        }
        *self.shared.broadcaster.lock() = None;
        info!(
            total_frames = self.shared.frame_count.load(Ordering::Relaxed),
            "source stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn control_port(&self) -> u16 {
        self.server.as_ref().map_or(0, ControlServer::local_port)
    }

    /// Frames produced (and offered to subscribers) so far.
    pub fn frame_count(&self) -> u64 {
        self.shared.frame_count.load(Ordering::Relaxed)
    }
}
