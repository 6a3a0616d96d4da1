//! Route model: a controller-managed edge from one source to one sink.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use ltp_wire::TransformSpec;

/// How frames travel along a route.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMode {
    /// The controller receives source frames, transforms them, and
    /// forwards to the sink.
    #[default]
    Proxy,
    /// The source sends straight to the sink's data port; the controller
    /// only supervises. No in-controller transforms apply; the
    /// controller cannot reshape frames it does not receive.
    Direct,
}

impl RouteMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "proxy" => Some(RouteMode::Proxy),
            "direct" => Some(RouteMode::Direct),
            _ => None,
        }
    }
}

/// Observed route connection state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// One route. Shared between the route table and its supervisor task.
///
/// Identity fields are immutable; runtime state lives behind locks and
/// atomics so UI snapshots never block the data path.
#[derive(Debug)]
pub struct Route {
    pub id: String,
    pub name: String,
    /// Stable ids (see [`crate::DeviceState::id`]), never live pointers,
    /// so routes survive peer restarts.
    pub source_id: String,
    pub sink_id: String,
    pub mode: RouteMode,
    enabled: AtomicBool,
    transform: Mutex<TransformSpec>,
    status: Mutex<RouteStatus>,
    status_message: Mutex<Option<String>>,
    frames_routed: AtomicU64,
    last_frame: Mutex<Option<Instant>>,
}

impl Route {
    pub fn new(
        id: String,
        name: String,
        source_id: String,
        sink_id: String,
        mode: RouteMode,
        transform: TransformSpec,
        enabled: bool,
    ) -> Self {
        Self {
            id,
            name,
            source_id,
            sink_id,
            mode,
            enabled: AtomicBool::new(enabled),
            transform: Mutex::new(transform),
            status: Mutex::new(RouteStatus::Disconnected),
            status_message: Mutex::new(None),
            frames_routed: AtomicU64::new(0),
            last_frame: Mutex::new(None),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn transform(&self) -> TransformSpec {
        *self.transform.lock()
    }

    pub fn set_transform(&self, transform: TransformSpec) {
        *self.transform.lock() = transform;
    }

    pub fn status(&self) -> RouteStatus {
        *self.status.lock()
    }

    pub fn status_message(&self) -> Option<String> {
        self.status_message.lock().clone()
    }

    pub(crate) fn set_status(&self, status: RouteStatus, message: Option<String>) {
        *self.status.lock() = status;
        *self.status_message.lock() = message;
    }

    pub fn frames_routed(&self) -> u64 {
        self.frames_routed.load(Ordering::Relaxed)
    }

    pub(crate) fn record_frame(&self) {
        self.frames_routed.fetch_add(1, Ordering::Relaxed);
        *self.last_frame.lock() = Some(Instant::now());
    }

    pub(crate) fn last_frame(&self) -> Option<Instant> {
        *self.last_frame.lock()
    }

    pub(crate) fn clear_last_frame(&self) {
        *self.last_frame.lock() = None;
    }
}
