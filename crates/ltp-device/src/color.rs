//! Per-frame color adjustments applied by the source render loop.

/// Scale every channel by `brightness` in `[0, 1]`.
pub fn apply_brightness(pixels: &mut [u8], brightness: f64) {
    if (brightness - 1.0).abs() < f64::EPSILON {
        return;
    }
    let factor = brightness.clamp(0.0, 1.0);
    for channel in pixels.iter_mut() {
        *channel = (f64::from(*channel) * factor).round().min(255.0) as u8;
    }
}

/// Apply gamma correction (`out = in^gamma` on normalized channels).
pub fn apply_gamma(pixels: &mut [u8], gamma: f64) {
    if (gamma - 1.0).abs() < f64::EPSILON || gamma <= 0.0 {
        return;
    }
    // 256-entry lookup: the per-pixel pow would dominate the render loop.
    let mut table = [0u8; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = ((i as f64 / 255.0).powf(gamma) * 255.0).round() as u8;
    }
    for channel in pixels.iter_mut() {
        *channel = table[*channel as usize];
    }
}

/// Convert HSV (each in `[0, 1]`) to RGB bytes.
pub fn hsv_to_rgb(h: f64, s: f64, v: f64) -> [u8; 3] {
    let h = (h.fract() + 1.0).fract() * 6.0;
    let i = h.floor() as u32 % 6;
    let f = h - h.floor();
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);

    let (r, g, b) = match i {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    [
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
    ]
}
