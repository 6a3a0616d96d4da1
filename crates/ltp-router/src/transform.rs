//! Frame transforms applied by proxy routes.
//!
//! Order matters: scale first, then brightness, then gamma, then mirror.
//! Applying gamma after brightness keeps the curve numerically meaningful
//! on the already-scaled channel values.

use ltp_wire::{ScaleMode, TransformSpec};

fn pixel_total(dims: &[u32]) -> usize {
    dims.iter().map(|&d| d as usize).product::<usize>().max(1)
}

/// Run the full pipeline for one frame.
///
/// `pixels` is a flat `count * bpp` buffer in stream order. Returns the
/// transformed buffer sized for `sink_dims`.
pub fn apply_transform(
    pixels: &[u8],
    bpp: usize,
    source_dims: &[u32],
    sink_dims: &[u32],
    spec: &TransformSpec,
) -> Vec<u8> {
    let mut frame = if source_dims == sink_dims {
        pixels.to_vec()
    } else {
        scale(pixels, bpp, source_dims, sink_dims, spec.scale_mode)
    };

    if (spec.brightness - 1.0).abs() > f32::EPSILON {
        apply_brightness(&mut frame, spec.brightness);
    }
    if (spec.gamma - 1.0).abs() > f32::EPSILON {
        apply_gamma(&mut frame, spec.gamma);
    }
    if spec.mirror_x || spec.mirror_y {
        frame = mirror(&frame, bpp, sink_dims, spec.mirror_x, spec.mirror_y);
    }
    frame
}

/// Scale a frame between differing dimensions.
pub fn scale(
    pixels: &[u8],
    bpp: usize,
    source_dims: &[u32],
    sink_dims: &[u32],
    mode: ScaleMode,
) -> Vec<u8> {
    let source_count = pixel_total(source_dims);
    let sink_count = pixel_total(sink_dims);

    match mode {
        // All three copy in place: truncate the excess, pad the shortfall
        // with background black.
        ScaleMode::None | ScaleMode::Truncate | ScaleMode::PadBlack => {
            copy_truncate_pad(pixels, bpp, sink_count)
        }
        ScaleMode::PadRepeat => tile(pixels, bpp, source_count, sink_count),
        ScaleMode::Fit | ScaleMode::Fill | ScaleMode::Stretch => {
            if source_dims.len() == 2 && sink_dims.len() == 2 {
                resample_matrix(pixels, bpp, source_dims, sink_dims, mode)
            } else {
                // 1-D (or mixed) paths resample over the flat pixel run.
                resample_linear(pixels, bpp, source_count, sink_count)
            }
        }
    }
}

/// Copy as much as fits; missing pixels are background black.
fn copy_truncate_pad(pixels: &[u8], bpp: usize, sink_count: usize) -> Vec<u8> {
    let mut out = vec![0u8; sink_count * bpp];
    let n = pixels.len().min(out.len());
    out[..n].copy_from_slice(&pixels[..n]);
    out
}

/// Repeat the source run until the sink is full.
fn tile(pixels: &[u8], bpp: usize, source_count: usize, sink_count: usize) -> Vec<u8> {
    if source_count == 0 || pixels.len() < bpp {
        return vec![0u8; sink_count * bpp];
    }
    let mut out = Vec::with_capacity(sink_count * bpp);
    for i in 0..sink_count {
        let src = i % source_count;
        out.extend_from_slice(&pixels[src * bpp..(src + 1) * bpp]);
    }
    out
}

/// Piecewise-linear 1-D resample between neighboring source pixels.
fn resample_linear(pixels: &[u8], bpp: usize, source_count: usize, sink_count: usize) -> Vec<u8> {
    if source_count == 0 || pixels.len() < source_count * bpp {
        return vec![0u8; sink_count * bpp];
    }
    if source_count == sink_count {
        return pixels[..source_count * bpp].to_vec();
    }

    let mut out = Vec::with_capacity(sink_count * bpp);
    let span = if sink_count > 1 {
        (source_count - 1) as f64 / (sink_count - 1) as f64
    } else {
        0.0
    };
    for i in 0..sink_count {
        let pos = i as f64 * span;
        let low = pos.floor() as usize;
        let high = (low + 1).min(source_count - 1);
        let frac = pos - low as f64;
        for c in 0..bpp {
            let a = f64::from(pixels[low * bpp + c]);
            let b = f64::from(pixels[high * bpp + c]);
            out.push(((1.0 - frac) * a + frac * b).round() as u8);
        }
    }
    out
}

/// Bilinear sample of a `sw` x `sh` frame at fractional coordinates.
fn sample_bilinear(pixels: &[u8], bpp: usize, sw: usize, sh: usize, x: f64, y: f64, c: usize) -> f64 {
    let x0 = x.floor().clamp(0.0, (sw - 1) as f64) as usize;
    let y0 = y.floor().clamp(0.0, (sh - 1) as f64) as usize;
    let x1 = (x0 + 1).min(sw - 1);
    let y1 = (y0 + 1).min(sh - 1);
    let fx = (x - x0 as f64).clamp(0.0, 1.0);
    let fy = (y - y0 as f64).clamp(0.0, 1.0);

    let at = |px: usize, py: usize| f64::from(pixels[(py * sw + px) * bpp + c]);
    let top = (1.0 - fx) * at(x0, y0) + fx * at(x1, y0);
    let bottom = (1.0 - fx) * at(x0, y1) + fx * at(x1, y1);
    (1.0 - fy) * top + fy * bottom
}

/// 2-D resample: uniform zoom per the mode, then center crop or pad onto
/// the sink. Out-of-bounds pixels are background black.
fn resample_matrix(
    pixels: &[u8],
    bpp: usize,
    source_dims: &[u32],
    sink_dims: &[u32],
    mode: ScaleMode,
) -> Vec<u8> {
    let (sw, sh) = (source_dims[0] as usize, source_dims[1] as usize);
    let (tw, th) = (sink_dims[0] as usize, sink_dims[1] as usize);
    if sw == 0 || sh == 0 || pixels.len() < sw * sh * bpp {
        return vec![0u8; tw * th * bpp];
    }

    let (zoom_w, zoom_h) = match mode {
        ScaleMode::Stretch => (tw as f64 / sw as f64, th as f64 / sh as f64),
        ScaleMode::Fill => {
            let z = (tw as f64 / sw as f64).max(th as f64 / sh as f64);
            (z, z)
        }
        // Fit: the whole source stays visible.
        _ => {
            let z = (tw as f64 / sw as f64).min(th as f64 / sh as f64);
            (z, z)
        }
    };

    let zw = ((sw as f64 * zoom_w).round() as usize).max(1);
    let zh = ((sh as f64 * zoom_h).round() as usize).max(1);

    let mut out = vec![0u8; tw * th * bpp];
    // Signed offsets center the zoomed image over the sink.
    let off_x = (zw as isize - tw as isize) / 2;
    let off_y = (zh as isize - th as isize) / 2;

    for ty in 0..th {
        let zy = ty as isize + off_y;
        if zy < 0 || zy >= zh as isize {
            continue;
        }
        for tx in 0..tw {
            let zx = tx as isize + off_x;
            if zx < 0 || zx >= zw as isize {
                continue;
            }
            // Map the zoomed coordinate back into the source.
            let sx = if zw > 1 {
                zx as f64 * (sw - 1) as f64 / (zw - 1) as f64
            } else {
                0.0
            };
            let sy = if zh > 1 {
                zy as f64 * (sh - 1) as f64 / (zh - 1) as f64
            } else {
                0.0
            };
            for c in 0..bpp {
                out[(ty * tw + tx) * bpp + c] =
                    sample_bilinear(pixels, bpp, sw, sh, sx, sy, c).round() as u8;
            }
        }
    }
    out
}

/// Multiply every channel by `brightness` in `[0, 1]`.
fn apply_brightness(pixels: &mut [u8], brightness: f32) {
    let factor = f64::from(brightness.clamp(0.0, 1.0));
    for channel in pixels.iter_mut() {
        *channel = (f64::from(*channel) * factor).round().min(255.0) as u8;
    }
}

/// Gamma-correct normalized channels through a lookup table.
fn apply_gamma(pixels: &mut [u8], gamma: f32) {
    if gamma <= 0.0 {
        return;
    }
    let gamma = f64::from(gamma);
    let mut table = [0u8; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = ((i as f64 / 255.0).powf(gamma) * 255.0).round() as u8;
    }
    for channel in pixels.iter_mut() {
        *channel = table[*channel as usize];
    }
}

/// Mirror a frame horizontally and/or vertically.
///
/// For 1-D frames, `mirror_x` reverses the run and `mirror_y` is a no-op.
fn mirror(pixels: &[u8], bpp: usize, dims: &[u32], mirror_x: bool, mirror_y: bool) -> Vec<u8> {
    let (width, height) = match dims {
        [w, h, ..] => (*w as usize, *h as usize),
        [n] => (*n as usize, 1),
        [] => return pixels.to_vec(),
    };
    if pixels.len() < width * height * bpp {
        return pixels.to_vec();
    }

    let mut out = vec![0u8; width * height * bpp];
    for y in 0..height {
        let src_y = if mirror_y { height - 1 - y } else { y };
        for x in 0..width {
            let src_x = if mirror_x { width - 1 - x } else { x };
            let src = (src_y * width + src_x) * bpp;
            let dst = (y * width + x) * bpp;
            out[dst..dst + bpp].copy_from_slice(&pixels[src..src + bpp]);
        }
    }
    out
}
