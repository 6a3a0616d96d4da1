//! Built-in test-pattern producers.
//!
//! These keep the source binary and the routing engine's virtual sources
//! usable without any media backend: a solid fill, a static black-to-white
//! gradient, and a scrolling rainbow.

use crate::backend::FrameProducer;
use crate::color::hsv_to_rgb;

fn pixel_count(dimensions: &[u32]) -> usize {
    dimensions.iter().map(|&d| d as usize).product::<usize>().max(1)
}

/// Uniform fill of one RGB color.
pub struct SolidPattern {
    frame: Vec<u8>,
}

impl SolidPattern {
    pub fn new(dimensions: &[u32], color: [u8; 3]) -> Self {
        let count = pixel_count(dimensions);
        let mut frame = Vec::with_capacity(count * 3);
        for _ in 0..count {
            frame.extend_from_slice(&color);
        }
        Self { frame }
    }
}

impl FrameProducer for SolidPattern {
    fn next_frame(&mut self) -> Option<Vec<u8>> {
        Some(self.frame.clone())
    }
}

/// Static black-to-white gradient across the pixel run.
pub struct GradientPattern {
    frame: Vec<u8>,
}

impl GradientPattern {
    pub fn new(dimensions: &[u32]) -> Self {
        let count = pixel_count(dimensions);
        let span = (count.saturating_sub(1)).max(1) as f64;
        let mut frame = Vec::with_capacity(count * 3);
        for i in 0..count {
            let v = ((i as f64 / span) * 255.0).round() as u8;
            frame.extend_from_slice(&[v, v, v]);
        }
        Self { frame }
    }
}

impl FrameProducer for GradientPattern {
    fn next_frame(&mut self) -> Option<Vec<u8>> {
        Some(self.frame.clone())
    }
}

/// Hue wheel scrolling one step per tick.
pub struct RainbowPattern {
    count: usize,
    offset: u64,
}

impl RainbowPattern {
    pub fn new(dimensions: &[u32]) -> Self {
        Self {
            count: pixel_count(dimensions),
            offset: 0,
        }
    }
}

impl FrameProducer for RainbowPattern {
    fn next_frame(&mut self) -> Option<Vec<u8>> {
        let mut frame = Vec::with_capacity(self.count * 3);
        for i in 0..self.count {
            let hue = (i as f64 / self.count as f64) + (self.offset as f64 / 100.0);
            frame.extend_from_slice(&hsv_to_rgb(hue, 1.0, 1.0));
        }
        self.offset = self.offset.wrapping_add(1);
        Some(frame)
    }
}

/// Instantiate a built-in pattern by name.
pub fn create_pattern(name: &str, dimensions: &[u32]) -> Option<Box<dyn FrameProducer>> {
    match name {
        "solid" => Some(Box::new(SolidPattern::new(dimensions, [255, 255, 255]))),
        "gradient" => Some(Box::new(GradientPattern::new(dimensions))),
        "rainbow" => Some(Box::new(RainbowPattern::new(dimensions))),
        _ => None,
    }
}
