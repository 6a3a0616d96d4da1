//! The sink endpoint: consumes pixel frames and drives a renderer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use ltp_discovery::ServiceAdvertiser;
use ltp_transport::{
    ControlServer, ControlServerHandle, DataReceiver, MessageHandler, StreamManager,
};
use ltp_wire::control::{
    BooleanControl, Control, ControlRegistry, EnumControl, EnumOption, NumberControl,
};
use ltp_wire::device::{DeviceInfo, SinkCapabilities};
use ltp_wire::{
    ColorFormat, DataPacket, ErrorCode, Message, ProtocolError, StreamAction, Topology,
    TopologyMapper,
};

use crate::backend::Renderer;
use crate::DeviceError;

/// Configuration for a [`Sink`].
#[derive(Clone, Debug)]
pub struct SinkConfig {
    pub device_id: Uuid,
    pub name: String,
    pub description: String,
    /// `[n]` for a strip, `[w, h]` for a matrix.
    pub dimensions: Vec<u32>,
    pub color_format: ColorFormat,
    pub max_refresh_hz: u32,
    pub control_host: String,
    /// 0 picks an OS-assigned port.
    pub control_port: u16,
    pub data_port: u16,
    /// Disable to run without mDNS (tests, fixed-address setups).
    pub advertise: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            device_id: Uuid::new_v4(),
            name: "LTP Sink".to_string(),
            description: String::new(),
            dimensions: vec![60],
            color_format: ColorFormat::Rgb,
            max_refresh_hz: 60,
            control_host: "0.0.0.0".to_string(),
            control_port: 0,
            data_port: 0,
            advertise: true,
        }
    }
}

impl SinkConfig {
    pub fn pixels(&self) -> u32 {
        if self.dimensions.is_empty() {
            return 0;
        }
        self.dimensions.iter().product()
    }
}

struct SinkShared {
    config: SinkConfig,
    mapper: TopologyMapper,
    controls: Mutex<ControlRegistry>,
    streams: Mutex<StreamManager>,
    /// Last received frame, stream order, sized to the display.
    buffer: Mutex<Vec<u8>>,
    renderer: Mutex<Box<dyn Renderer>>,
    broadcaster: Mutex<Option<ControlServerHandle>>,
    data_port: Mutex<u16>,
    frames_rendered: AtomicU64,
    packets_dropped: AtomicU64,
}

impl SinkShared {
    fn setup_controls(registry: &mut ControlRegistry) -> Result<(), ProtocolError> {
        registry.register(Control::Number(NumberControl {
            id: "brightness".to_string(),
            name: "Global Brightness".to_string(),
            description: "Master brightness applied to display".to_string(),
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
            name: "Gamma Correction".to_string(),
            description: "Gamma value for color correction".to_string(),
            readonly: false,
            group: "output".to_string(),
            value: 2.2,
            min: Some(1.0),
            max: Some(3.0),
            step: 0.1,
            unit: String::new(),
        }))?;
        registry.register(Control::Boolean(BooleanControl {
            id: "test_mode".to_string(),
            name: "Test Mode".to_string(),
            description: "Display test pattern instead of input".to_string(),
            readonly: false,
            group: "general".to_string(),
            value: false,
        }))?;
        registry.register(Control::Enum(EnumControl {
            id: "test_pattern".to_string(),
            name: "Test Pattern".to_string(),
            description: "Pattern to display in test mode".to_string(),
            readonly: false,
            group: "general".to_string(),
            value: "rgb_sweep".to_string(),
            options: vec![
                EnumOption::new("rgb_sweep", "RGB Sweep"),
                EnumOption::new("white", "All White"),
                EnumOption::new("gradient", "Gradient"),
            ],
        }))?;
        Ok(())
    }

    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities {
            device: DeviceInfo::new(
                self.config.device_id,
                self.config.name.clone(),
                self.config.description.clone(),
            ),
            pixels: self.config.pixels(),
            dimensions: self.config.dimensions.clone(),
            topology: self.mapper.topology().clone(),
            color_formats: vec![self.config.color_format],
            max_refresh_hz: self.config.max_refresh_hz,
            controls: self.controls.lock().to_list(),
        }
    }

    /// Handle one decoded data packet. Packets with no active stream are
    /// dropped: they come from stale senders.
    fn handle_data_packet(&self, packet: DataPacket) {
        let active = {
            let mut streams = self.streams.lock();
            match streams.active_streams().first().cloned() {
                Some(id) => {
                    streams.record_frame_received(&id);
                    true
                }
                None => false,
            }
        };
        if !active {
            self.packets_dropped.fetch_add(1, Ordering::Relaxed);
            debug!("dropping data packet with no active stream");
            return;
        }

        let bpp = self.config.color_format.bytes_per_pixel();
        let display_len = self.config.pixels() as usize * bpp;
        {
            let mut buffer = self.buffer.lock();
            buffer.resize(display_len, 0);
            let n = packet.pixels.len().min(display_len);
            buffer[..n].copy_from_slice(&packet.pixels[..n]);
        }

        self.render_current();
    }

    fn render_current(&self) {
        let (brightness, test_mode, test_pattern) = {
            let controls = self.controls.lock();
            let brightness = controls
                .get_value("brightness")
                .ok()
                .and_then(|v| v.as_f64())
                .unwrap_or(1.0);
            let test_mode = controls
                .get_value("test_mode")
                .ok()
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let test_pattern = controls
                .get_value("test_pattern")
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "rgb_sweep".to_string());
            (brightness, test_mode, test_pattern)
        };

        let mut display = if test_mode {
            self.generate_test_pattern(&test_pattern)
        } else {
            self.buffer.lock().clone()
        };
        crate::color::apply_brightness(&mut display, brightness);

        self.renderer.lock().render(
            &display,
            self.config.color_format,
            &self.config.dimensions,
        );
        self.frames_rendered.fetch_add(1, Ordering::Relaxed);
    }

    fn generate_test_pattern(&self, pattern: &str) -> Vec<u8> {
        let count = self.config.pixels() as usize;
        let bpp = self.config.color_format.bytes_per_pixel();
        let mut pixels = vec![0u8; count * bpp];

        match pattern {
            "white" => pixels.fill(255),
            "gradient" => {
                for i in 0..count {
                    let v = ((i as f64 / count.max(1) as f64) * 255.0) as u8;
                    pixels[i * bpp..(i + 1) * bpp].fill(v);
                }
            }
            // rgb_sweep: thirds of red, green, blue.
            _ => {
                if bpp >= 3 {
                    for i in 0..count {
                        let phase = (i as f64 / count.max(1) as f64) * 3.0;
                        let color: [u8; 3] = if phase < 1.0 {
                            [255, 0, 0]
                        } else if phase < 2.0 {
                            [0, 255, 0]
                        } else {
                            [0, 0, 255]
                        };
                        pixels[i * bpp..i * bpp + 3].copy_from_slice(&color);
                    }
                } else {
                    pixels.fill(255);
                }
            }
        }
        pixels
    }

    fn broadcast_control_changed(&self, values: serde_json::Map<String, serde_json::Value>) {
        if values.is_empty() {
            return;
        }
        if let Some(broadcaster) = self.broadcaster.lock().clone() {
            broadcaster.broadcast(&Message::ControlChanged { values });
        }
    }
}

struct SinkHandler {
    shared: Arc<SinkShared>,
}

impl MessageHandler for SinkHandler {
    fn handle(&self, message: Message) -> BoxFuture<'_, Result<Option<Message>, ProtocolError>> {
        Box::pin(async move {
            match message {
                Message::CapabilityRequest { seq } => {
                    let device = serde_json::to_value(self.shared.capabilities())
                        .map_err(|e| ProtocolError::new(ErrorCode::Internal, e.to_string()))?;
                    Ok(Some(Message::CapabilityResponse { seq, device }))
                }
                Message::StreamSetup { seq, format, .. } => {
                    let udp_port = *self.shared.data_port.lock();
                    if udp_port == 0 {
                        return Err(ProtocolError::new(
                            ErrorCode::Internal,
                            "data receiver not running",
                        ));
                    }
                    let stream_id = {
                        let mut streams = self.shared.streams.lock();
                        let id = streams.create_stream(format.color, format.encoding);
                        // Setup activates the stream; `stream_control stop`
                        // is the teardown path.
                        streams.start_stream(&id);
                        id
                    };
                    info!(%stream_id, udp_port, "sink stream set up");
                    Ok(Some(Message::StreamSetupResponse {
                        seq,
                        status: "ok".to_string(),
                        udp_port,
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
                        StreamAction::Stop => {
                            self.shared.streams.lock().stop_stream(&stream_id);
                            self.shared.buffer.lock().clear();
                            self.shared.renderer.lock().clear();
                        }
                        StreamAction::Pause => {
                            self.shared.streams.lock().stop_stream(&stream_id);
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
                    debug!(msg = other.type_name(), "sink ignoring message");
                    Ok(None)
                }
            }
        })
    }
}

/// An LTP sink: receives and displays pixel data.
pub struct Sink {
    shared: Arc<SinkShared>,
    server: Option<ControlServer>,
    receiver: Option<DataReceiver>,
    advertiser: Option<Arc<ServiceAdvertiser>>,
    running: AtomicBool,
}

impl Sink {
    pub fn new(config: SinkConfig, renderer: Box<dyn Renderer>) -> Result<Self, DeviceError> {
        if config.dimensions.is_empty() || config.pixels() == 0 {
            return Err(DeviceError::Config(format!(
                "invalid dimensions: {:?}",
                config.dimensions
            )));
        }

        let topology = Topology::from_dimensions(&config.dimensions);
        let mut controls = ControlRegistry::new();
        SinkShared::setup_controls(&mut controls)?;

        let shared = Arc::new(SinkShared {
            mapper: TopologyMapper::new(topology),
            controls: Mutex::new(controls),
            streams: Mutex::new(StreamManager::new()),
            buffer: Mutex::new(Vec::new()),
            renderer: Mutex::new(renderer),
            broadcaster: Mutex::new(None),
            data_port: Mutex::new(0),
            frames_rendered: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            config,
        });

        Ok(Self {
            shared,
            server: None,
            receiver: None,
            advertiser: None,
            running: AtomicBool::new(false),
        })
    }

    /// Start the data receiver, control server, and advertisement.
    /// Idempotent: a second `start` is a no-op.
    pub async fn start(&mut self) -> Result<(), DeviceError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let config = self.shared.config.clone();
        info!(name = %config.name, "starting sink");

        let packet_shared = self.shared.clone();
        let receiver = DataReceiver::bind(
            &config.control_host,
            config.data_port,
            Arc::new(move |packet| packet_shared.handle_data_packet(packet)),
        )
        .await?;
        *self.shared.data_port.lock() = receiver.local_port();

        let server = ControlServer::bind(
            &config.control_host,
            config.control_port,
            Arc::new(SinkHandler {
                shared: self.shared.clone(),
            }),
        )
        .await?;
        *self.shared.broadcaster.lock() = Some(server.handle());

        if config.advertise {
            let instance = config.name.to_lowercase().replace(' ', "-");
            let advertiser = Arc::new(ServiceAdvertiser::sink(
                &instance,
                server.local_port(),
                config.device_id,
                &config.name,
                &config.description,
                config.pixels(),
                &config.dimensions,
                config.color_format,
                config.max_refresh_hz,
                true,
            )?);
            advertiser.start()?;
            self.advertiser = Some(advertiser);
        }

        info!(
            control_port = server.local_port(),
            data_port = receiver.local_port(),
            "sink started"
        );
        self.server = Some(server);
        self.receiver = Some(receiver);
        Ok(())
    }

    /// Stop everything. Idempotent: a second `stop` is a no-op.
    pub async fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(name = %self.shared.config.name, "stopping sink");

        if let Some(advertiser) = self.advertiser.take() {
            advertiser.stop();
        }
        if let Some(receiver) = self.receiver.take() {
            receiver.stop();
        }
        if let Some(server) = self.server.take() {
            server.stop();
        }
        *self.shared.broadcaster.lock() = None;
        *self.shared.data_port.lock() = 0;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bound control port, once started.
    pub fn control_port(&self) -> u16 {
        self.server.as_ref().map_or(0, ControlServer::local_port)
    }

    /// Bound UDP data port, once started.
    pub fn data_port(&self) -> u16 {
        self.receiver.as_ref().map_or(0, DataReceiver::local_port)
    }

    /// Frames handed to the renderer so far.
    pub fn frames_rendered(&self) -> u64 {
        self.shared.frames_rendered.load(Ordering::Relaxed)
    }

    /// Packets dropped for want of an active stream.
    pub fn packets_dropped(&self) -> u64 {
        self.shared.packets_dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullRenderer;

    fn test_config() -> SinkConfig {
        SinkConfig {
            advertise: false,
            ..SinkConfig::default()
        }
    }

    #[test]
    fn rejects_empty_dimensions() {
        let config = SinkConfig {
            dimensions: vec![],
            ..test_config()
        };
        assert!(Sink::new(config, Box::new(NullRenderer)).is_err());

        let config = SinkConfig {
            dimensions: vec![0],
            ..test_config()
        };
        assert!(Sink::new(config, Box::new(NullRenderer)).is_err());
    }

    #[test]
    fn capabilities_cover_display_and_controls() {
        let sink = Sink::new(test_config(), Box::new(NullRenderer)).unwrap();
        let caps = sink.shared.capabilities();
        assert_eq!(caps.pixels, 60);
        assert_eq!(caps.dimensions, vec![60]);
        assert_eq!(caps.color_formats, vec![ColorFormat::Rgb]);
        let ids: Vec<&str> = caps
            .controls
            .iter()
            .filter_map(|c| c["id"].as_str())
            .collect();
        assert!(ids.contains(&"brightness"));
        assert!(ids.contains(&"gamma"));
        assert!(ids.contains(&"test_mode"));
        assert!(ids.contains(&"test_pattern"));
    }

    #[test]
    fn test_patterns_fill_display() {
        let sink = Sink::new(test_config(), Box::new(NullRenderer)).unwrap();
        let white = sink.shared.generate_test_pattern("white");
        assert_eq!(white.len(), 180);
        assert!(white.iter().all(|&b| b == 255));

        let sweep = sink.shared.generate_test_pattern("rgb_sweep");
        assert_eq!(&sweep[..3], &[255, 0, 0]);
        assert_eq!(&sweep[177..], &[0, 0, 255]);

        let gradient = sink.shared.generate_test_pattern("gradient");
        assert!(gradient[0] < gradient[177]);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let mut sink = Sink::new(test_config(), Box::new(NullRenderer)).unwrap();
        sink.start().await.unwrap();
        let port = sink.control_port();
        assert_ne!(port, 0);

        // Second start keeps the same endpoints.
        sink.start().await.unwrap();
        assert_eq!(sink.control_port(), port);

        sink.stop().await;
        assert!(!sink.is_running());
        sink.stop().await;
        assert!(!sink.is_running());
    }

    #[tokio::test]
    async fn packets_without_active_stream_are_dropped() {
        let (renderer, handle) = crate::backend::BufferRenderer::new();
        let mut sink = Sink::new(test_config(), Box::new(renderer)).unwrap();
        sink.start().await.unwrap();

        let packet = DataPacket::new(
            1,
            ColorFormat::Rgb,
            ltp_wire::Encoding::Raw,
            vec![9; 180],
        );
        sink.shared.handle_data_packet(packet);
        assert_eq!(handle.frame_count(), 0);
        assert_eq!(sink.packets_dropped(), 1);

        sink.stop().await;
    }
}
