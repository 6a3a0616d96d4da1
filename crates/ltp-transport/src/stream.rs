//! In-memory registry of active data streams.

use std::collections::HashMap;

use tracing::info;

use ltp_wire::{ColorFormat, Encoding};

/// Bookkeeping for one stream.
#[derive(Clone, Debug)]
pub struct StreamInfo {
    pub id: String,
    pub color_format: ColorFormat,
    pub encoding: Encoding,
    pub active: bool,
    pub frames_sent: u64,
    pub frames_received: u64,
}

/// Registry of data streams, keyed by generated ids (`stream-0001`,
/// monotonic). Send and receive paths gate on [`StreamInfo::active`].
///
/// Not internally synchronized; endpoints wrap it in their own lock.
#[derive(Default)]
pub struct StreamManager {
    streams: HashMap<String, StreamInfo>,
    next_id: u64,
}

impl StreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a stream. Streams start inactive.
    pub fn create_stream(&mut self, color_format: ColorFormat, encoding: Encoding) -> String {
        self.next_id += 1;
        let id = format!("stream-{:04}", self.next_id);
        self.streams.insert(
            id.clone(),
            StreamInfo {
                id: id.clone(),
                color_format,
                encoding,
                active: false,
                frames_sent: 0,
                frames_received: 0,
            },
        );
        info!(stream_id = %id, "created stream");
        id
    }

    pub fn get(&self, stream_id: &str) -> Option<&StreamInfo> {
        self.streams.get(stream_id)
    }

    pub fn contains(&self, stream_id: &str) -> bool {
        self.streams.contains_key(stream_id)
    }

    /// Mark a stream active. Idempotent; unknown ids are ignored.
    pub fn start_stream(&mut self, stream_id: &str) {
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.active = true;
            info!(%stream_id, "started stream");
        }
    }

    /// Mark a stream inactive. Idempotent; unknown ids are ignored.
    pub fn stop_stream(&mut self, stream_id: &str) {
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.active = false;
            info!(%stream_id, "stopped stream");
        }
    }

    pub fn delete_stream(&mut self, stream_id: &str) {
        if self.streams.remove(stream_id).is_some() {
            info!(%stream_id, "deleted stream");
        }
    }

    pub fn is_active(&self, stream_id: &str) -> bool {
        self.streams.get(stream_id).is_some_and(|s| s.active)
    }

    /// `true` if any stream is currently active.
    pub fn any_active(&self) -> bool {
        self.streams.values().any(|s| s.active)
    }

    pub fn record_frame_sent(&mut self, stream_id: &str) {
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.frames_sent += 1;
        }
    }

    pub fn record_frame_received(&mut self, stream_id: &str) {
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.frames_received += 1;
        }
    }

    pub fn active_streams(&self) -> Vec<String> {
        self.streams
            .values()
            .filter(|s| s.active)
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_zero_padded() {
        let mut manager = StreamManager::new();
        let a = manager.create_stream(ColorFormat::Rgb, Encoding::Raw);
        let b = manager.create_stream(ColorFormat::Rgb, Encoding::Raw);
        assert_eq!(a, "stream-0001");
        assert_eq!(b, "stream-0002");

        // Deleting does not recycle ids.
        manager.delete_stream(&a);
        let c = manager.create_stream(ColorFormat::Rgb, Encoding::Raw);
        assert_eq!(c, "stream-0003");
    }

    #[test]
    fn streams_start_inactive_and_gate_on_active() {
        let mut manager = StreamManager::new();
        let id = manager.create_stream(ColorFormat::Rgbw, Encoding::Rle);
        assert!(!manager.is_active(&id));
        assert!(!manager.any_active());

        manager.start_stream(&id);
        assert!(manager.is_active(&id));
        assert_eq!(manager.active_streams(), vec![id.clone()]);

        manager.stop_stream(&id);
        assert!(!manager.is_active(&id));
    }

    #[test]
    fn start_stop_are_idempotent() {
        let mut manager = StreamManager::new();
        let id = manager.create_stream(ColorFormat::Rgb, Encoding::Raw);
        manager.start_stream(&id);
        manager.start_stream(&id);
        assert!(manager.is_active(&id));
        manager.stop_stream(&id);
        manager.stop_stream(&id);
        assert!(!manager.is_active(&id));

        // Unknown ids are harmless.
        manager.start_stream("stream-9999");
        manager.stop_stream("stream-9999");
        assert!(!manager.is_active("stream-9999"));
    }

    #[test]
    fn frame_counters_accumulate() {
        let mut manager = StreamManager::new();
        let id = manager.create_stream(ColorFormat::Rgb, Encoding::Raw);
        manager.record_frame_sent(&id);
        manager.record_frame_sent(&id);
        manager.record_frame_received(&id);
        let info = manager.get(&id).unwrap();
        assert_eq!(info.frames_sent, 2);
        assert_eq!(info.frames_received, 1);
    }
}
