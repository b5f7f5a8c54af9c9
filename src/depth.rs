//! Depth normalization.
//!
//! Raw 16-bit range samples become a displayable RGB image in two stages:
//!
//! 1. Percentile stretch to 8-bit grayscale. Statistics (1st and 99th
//!    percentile) are computed over every second row and column, ignoring
//!    zero samples, so contrast adapts to each scene. The output stays full
//!    resolution.
//! 2. JET palette lookup, after which every pixel whose raw sample was zero
//!    is forced to black so "no range" never reads as "very close".

use image::{GrayImage, Luma, Rgb, RgbImage};
use std::sync::OnceLock;
use std::time::Instant;

use crate::frame::{DepthImage, Frame};

/// Row/column step used when gathering percentile statistics.
pub const STATS_STRIDE: usize = 2;
pub const LOW_PERCENTILE: f64 = 1.0;
pub const HIGH_PERCENTILE: f64 = 99.0;

/// Stretch bounds in raw depth units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthBounds {
    pub low: f64,
    pub high: f64,
}

impl DepthBounds {
    /// Used when a frame has no valid sample at all.
    pub const FALLBACK: DepthBounds = DepthBounds { low: 0.0, high: 1.0 };
}

/// Output of [`colorize`]: both stages plus the bounds that produced them.
#[derive(Clone, Debug)]
pub struct DepthColorization {
    pub bounds: DepthBounds,
    pub gray: GrayImage,
    pub color: RgbImage,
}

/// Compute percentile bounds over the non-zero, subsampled samples.
pub fn depth_bounds(depth: &DepthImage) -> DepthBounds {
    let (width, height) = depth.dimensions();
    let mut samples: Vec<u16> = Vec::with_capacity(
        (width as usize).div_ceil(STATS_STRIDE) * (height as usize).div_ceil(STATS_STRIDE),
    );
    for y in (0..height).step_by(STATS_STRIDE) {
        for x in (0..width).step_by(STATS_STRIDE) {
            let value = depth.get_pixel(x, y)[0];
            if value != 0 {
                samples.push(value);
            }
        }
    }

    if samples.is_empty() {
        return DepthBounds::FALLBACK;
    }
    samples.sort_unstable();
    DepthBounds {
        low: percentile(&samples, LOW_PERCENTILE),
        high: percentile(&samples, HIGH_PERCENTILE),
    }
}

/// Linear interpolation between closest ranks. `sorted` must be non-empty.
fn percentile(sorted: &[u16], pct: f64) -> f64 {
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let a = sorted[lower] as f64;
    let b = sorted[upper] as f64;
    a + (b - a) * (rank - lower as f64)
}

/// Stage one: map every sample into `[0, 255]` against `bounds`.
pub fn to_grayscale(depth: &DepthImage, bounds: DepthBounds) -> GrayImage {
    let (width, height) = depth.dimensions();
    let span = bounds.high - bounds.low;
    let mut gray = GrayImage::new(width, height);
    for (out, raw) in gray.pixels_mut().zip(depth.pixels()) {
        *out = Luma([stretch(raw[0], bounds.low, span)]);
    }
    gray
}

fn stretch(value: u16, low: f64, span: f64) -> u8 {
    let value = value as f64;
    if span > 0.0 {
        ((value - low) / span * 255.0).clamp(0.0, 255.0) as u8
    } else if value > low {
        // Degenerate scene: every valid sample is identical.
        255
    } else {
        0
    }
}

/// Full two-stage colorization with the zero mask applied.
pub fn colorize(depth: &DepthImage) -> DepthColorization {
    let bounds = depth_bounds(depth);
    let gray = to_grayscale(depth, bounds);
    let lut = jet_lut();

    let (width, height) = depth.dimensions();
    let mut color = RgbImage::new(width, height);
    for ((out, level), raw) in color.pixels_mut().zip(gray.pixels()).zip(depth.pixels()) {
        *out = if raw[0] == 0 {
            Rgb([0, 0, 0])
        } else {
            Rgb(lut[level[0] as usize])
        };
    }

    DepthColorization {
        bounds,
        gray,
        color,
    }
}

/// 256-entry JET palette (dark blue -> cyan -> yellow -> dark red), RGB order.
pub fn jet_lut() -> &'static [[u8; 3]; 256] {
    static LUT: OnceLock<[[u8; 3]; 256]> = OnceLock::new();
    LUT.get_or_init(|| {
        let mut lut = [[0u8; 3]; 256];
        for (i, entry) in lut.iter_mut().enumerate() {
            let t = i as f32 / 255.0;
            *entry = [
                jet_channel(t, 3.0),
                jet_channel(t, 2.0),
                jet_channel(t, 1.0),
            ];
        }
        lut
    })
}

fn jet_channel(t: f32, center: f32) -> u8 {
    let v = (1.5 - (4.0 * t - center).abs()).clamp(0.0, 1.0);
    (v * 255.0).round() as u8
}

// ----------------------------------------------------------------------------
// DepthColorView
// ----------------------------------------------------------------------------

/// Latest colorized rendering of the depth stream, tagged with the capture
/// time of the depth frame it was computed from.
#[derive(Clone, Debug)]
pub struct DepthColorView {
    image: RgbImage,
    bounds: DepthBounds,
    source_timestamp: Instant,
}

impl DepthColorView {
    /// Colorize a depth frame. Returns `None` for non-depth frames.
    pub fn from_frame(frame: &Frame) -> Option<Self> {
        let depth = frame.as_depth()?;
        let colorized = colorize(depth);
        Some(Self {
            image: colorized.color,
            bounds: colorized.bounds,
            source_timestamp: frame.captured_at(),
        })
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn bounds(&self) -> DepthBounds {
        self.bounds
    }

    pub fn source_timestamp(&self) -> Instant {
        self.source_timestamp
    }
}
