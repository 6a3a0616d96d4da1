//! Backend seams: what the device cores call into per frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use ltp_wire::ColorFormat;

/// Sink-side backend: receives one upcall per decoded frame.
///
/// `pixels` is a flat `[N * bpp]` buffer in stream order; `dimensions` is
/// `[n]` for strips or `[w, h]` for matrices. Implementations that cannot
/// keep up should drop frames themselves; the core never queues.
pub trait Renderer: Send {
    fn render(&mut self, pixels: &[u8], color_format: ColorFormat, dimensions: &[u32]);

    /// Called when the active stream stops; renderers typically blank.
    fn clear(&mut self) {}
}

/// Source-side backend: produces one frame per render tick.
///
/// Returns a flat RGB buffer sized to the source's native dimensions, or
/// `None` when no frame is available this tick (end of media, starved
/// capture); the core skips the tick.
pub trait FrameProducer: Send {
    fn next_frame(&mut self) -> Option<Vec<u8>>;
}

/// Renderer that discards frames. The default when a sink is headless.
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn render(&mut self, _pixels: &[u8], _color_format: ColorFormat, _dimensions: &[u32]) {}
}

/// Renderer that keeps the latest frame and counts upcalls.
///
/// Useful for polling UIs and for asserting delivery in tests: clone the
/// [`BufferRendererHandle`] before handing the renderer to a sink.
pub struct BufferRenderer {
    handle: BufferRendererHandle,
}

#[derive(Clone, Default)]
pub struct BufferRendererHandle {
    last_frame: Arc<Mutex<Vec<u8>>>,
    frames: Arc<AtomicU64>,
}

impl BufferRenderer {
    pub fn new() -> (Self, BufferRendererHandle) {
        let handle = BufferRendererHandle::default();
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }
}

impl Renderer for BufferRenderer {
    fn render(&mut self, pixels: &[u8], _color_format: ColorFormat, _dimensions: &[u32]) {
        *self.handle.last_frame.lock() = pixels.to_vec();
        self.handle.frames.fetch_add(1, Ordering::SeqCst);
    }

    fn clear(&mut self) {
        self.handle.last_frame.lock().clear();
    }
}

impl BufferRendererHandle {
    pub fn last_frame(&self) -> Vec<u8> {
        self.last_frame.lock().clone()
    }

    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }
}

/// Single-slot latest-wins frame buffer for slow backends.
///
/// Backends that do blocking work (serial writes, screen I/O) run off the
/// event loop and consume frames through one of these: the producer
/// replaces whatever is in the slot, the consumer takes and clears it.
/// Overwritten frames are counted, never queued, so a slow consumer can
/// never build a backlog.
#[derive(Clone, Default)]
pub struct LatestFrame {
    slot: Arc<Mutex<Option<Vec<u8>>>>,
    dropped: Arc<AtomicU64>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a frame in the slot, displacing any unconsumed one.
    pub fn publish(&self, frame: Vec<u8>) {
        if self.slot.lock().replace(frame).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take the latest frame, leaving the slot empty.
    pub fn take(&self) -> Option<Vec<u8>> {
        self.slot.lock().take()
    }

    /// Frames overwritten before anyone consumed them.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Renderer that only logs throughput, every `log_every` frames.
pub struct StatsRenderer {
    frames: u64,
    log_every: u64,
}

impl StatsRenderer {
    pub fn new(log_every: u64) -> Self {
        Self {
            frames: 0,
            log_every: log_every.max(1),
        }
    }
}

impl Renderer for StatsRenderer {
    fn render(&mut self, pixels: &[u8], color_format: ColorFormat, _dimensions: &[u32]) {
        self.frames += 1;
        if self.frames % self.log_every == 0 {
            info!(
                frames = self.frames,
                pixels = pixels.len() / color_format.bytes_per_pixel(),
                "rendered"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_frame_is_single_slot() {
        let slot = LatestFrame::new();
        assert_eq!(slot.take(), None);

        slot.publish(vec![1]);
        slot.publish(vec![2]);
        slot.publish(vec![3]);
        // Only the newest frame survives; the two displaced are counted.
        assert_eq!(slot.take(), Some(vec![3]));
        assert_eq!(slot.take(), None);
        assert_eq!(slot.dropped(), 2);
    }

    #[test]
    fn buffer_renderer_retains_latest_frame() {
        let (mut renderer, handle) = BufferRenderer::new();
        renderer.render(&[1, 2, 3], ColorFormat::Rgb, &[1]);
        renderer.render(&[4, 5, 6], ColorFormat::Rgb, &[1]);
        assert_eq!(handle.frame_count(), 2);
        assert_eq!(handle.last_frame(), vec![4, 5, 6]);

        renderer.clear();
        assert!(handle.last_frame().is_empty());
        assert_eq!(handle.frame_count(), 2);
    }
}
