//! Device and data-source contracts.
//!
//! A `DeviceDriver` opens a `Device` for a `PipelineConfig`; the device then
//! hands out one non-blocking `FrameSource` per stream. Sources yield
//! `SourceFrame`s in the device's native pixel layout, which
//! `SourceFrame::into_frame` converts to the display layout stored in the
//! cache.
//!
//! Drivers:
//! - `stub://<name>` synthetic device (see `synthetic`)
//! - anything else has no driver in this build and reports DeviceUnavailable

pub mod convert;
pub mod synthetic;

pub use synthetic::SyntheticDriver;

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{CaptureError, CaptureResult};
use crate::frame::{DepthImage, Frame, Pixels, StreamId};

// ----------------------------------------------------------------------------
// Contracts
// ----------------------------------------------------------------------------

/// Opens devices. Shared by the session across restarts.
pub trait DeviceDriver: Send + Sync {
    fn open(&self, config: &PipelineConfig) -> CaptureResult<Box<dyn Device>>;
}

/// An open device.
pub trait Device: Send {
    /// Open the output queue for one stream.
    fn open_stream(&mut self, stream: StreamId) -> CaptureResult<Box<dyn FrameSource>>;

    /// Release the device. Idempotent and infallible.
    fn close(&mut self);
}

/// Per-stream data source. `poll` never blocks.
pub trait FrameSource: Send {
    /// `Ok(None)` means no frame is available right now.
    fn poll(&mut self) -> CaptureResult<Option<SourceFrame>>;

    fn close(&mut self);
}

/// Pixel payload in the device's native layout.
#[derive(Clone, Debug)]
pub enum SourceImage {
    Rgb8(RgbImage),
    /// Interleaved BGR, as most camera ISPs emit it.
    Bgr8 {
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
    Gray8(GrayImage),
    Depth16(DepthImage),
}

#[derive(Clone, Debug)]
pub struct SourceFrame {
    pub image: SourceImage,
    pub captured_at: Instant,
}

impl SourceFrame {
    pub fn new(image: SourceImage, captured_at: Instant) -> Self {
        Self { image, captured_at }
    }

    /// Convert to a cache frame for `stream`. Depth payloads are only
    /// accepted on the depth stream and vice versa.
    pub fn into_frame(self, stream: StreamId) -> CaptureResult<Frame> {
        let pixels = match (stream, self.image) {
            (StreamId::Depth, SourceImage::Depth16(depth)) => Pixels::Depth16(depth),
            (StreamId::Depth, _) => {
                return Err(CaptureError::Transport(
                    "depth stream delivered a non-depth image".to_string(),
                ))
            }
            (_, SourceImage::Depth16(_)) => {
                return Err(CaptureError::Transport(format!(
                    "{} stream delivered a depth image",
                    stream
                )))
            }
            (_, SourceImage::Rgb8(rgb)) => Pixels::Rgb8(rgb),
            (_, SourceImage::Bgr8 {
                width,
                height,
                data,
            }) => Pixels::Rgb8(convert::bgr_to_rgb(width, height, data)?),
            (_, SourceImage::Gray8(gray)) => Pixels::Rgb8(convert::gray_to_rgb(&gray)),
        };
        Ok(Frame::new(stream, pixels, self.captured_at))
    }
}

/// Pick a driver for a device URL.
pub fn driver_for(device: &str) -> Arc<dyn DeviceDriver> {
    if device.starts_with(synthetic::SCHEME) {
        Arc::new(SyntheticDriver::new(device))
    } else {
        Arc::new(UnsupportedDriver {
            device: device.to_string(),
        })
    }
}

struct UnsupportedDriver {
    device: String,
}

impl DeviceDriver for UnsupportedDriver {
    fn open(&self, _config: &PipelineConfig) -> CaptureResult<Box<dyn Device>> {
        Err(CaptureError::DeviceUnavailable(format!(
            "no driver for {}",
            self.device
        )))
    }
}

// ----------------------------------------------------------------------------
// Pipeline configuration
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthPreset {
    HighDensity,
    HighAccuracy,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorCameraConfig {
    pub sensor_width: u32,
    pub sensor_height: u32,
    /// Size of the preview output actually streamed to the host.
    pub preview_width: u32,
    pub preview_height: u32,
    pub fps: u32,
    pub interleaved: bool,
}

impl Default for ColorCameraConfig {
    fn default() -> Self {
        Self {
            sensor_width: 1920,
            sensor_height: 1080,
            preview_width: 300,
            preview_height: 300,
            fps: 30,
            interleaved: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonoCameraConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for MonoCameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 400,
            fps: 30,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoDepthConfig {
    pub preset: DepthPreset,
    pub left_right_check: bool,
    pub subpixel: bool,
    pub extended_disparity: bool,
}

impl Default for StereoDepthConfig {
    fn default() -> Self {
        Self {
            preset: DepthPreset::HighDensity,
            left_right_check: true,
            subpixel: true,
            extended_disparity: false,
        }
    }
}

/// Four-stream acquisition setup: colour camera, two mono cameras and the
/// stereo depth node fed by them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub color: ColorCameraConfig,
    pub left: MonoCameraConfig,
    pub right: MonoCameraConfig,
    pub depth: StereoDepthConfig,
}

/// Output size and rate of one stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamGeometry {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl StreamGeometry {
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> CaptureResult<()> {
        let c = &self.color;
        for (name, value) in [
            ("color.sensor_width", c.sensor_width),
            ("color.sensor_height", c.sensor_height),
            ("color.preview_width", c.preview_width),
            ("color.preview_height", c.preview_height),
            ("color.fps", c.fps),
            ("left.width", self.left.width),
            ("left.height", self.left.height),
            ("left.fps", self.left.fps),
            ("right.width", self.right.width),
            ("right.height", self.right.height),
            ("right.fps", self.right.fps),
        ] {
            if value == 0 {
                return Err(CaptureError::ConfigurationRejected(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if c.preview_width > c.sensor_width || c.preview_height > c.sensor_height {
            return Err(CaptureError::ConfigurationRejected(
                "color preview exceeds sensor resolution".to_string(),
            ));
        }
        if self.left.width != self.right.width || self.left.height != self.right.height {
            return Err(CaptureError::ConfigurationRejected(
                "stereo pair resolutions differ".to_string(),
            ));
        }
        if self.depth.extended_disparity && self.depth.subpixel {
            return Err(CaptureError::ConfigurationRejected(
                "extended disparity and subpixel cannot be combined".to_string(),
            ));
        }
        Ok(())
    }

    /// Output geometry of `stream`. Depth is aligned to the mono pair and runs
    /// at the slower of the two.
    pub fn geometry(&self, stream: StreamId) -> StreamGeometry {
        match stream {
            StreamId::Color => StreamGeometry {
                width: self.color.preview_width,
                height: self.color.preview_height,
                fps: self.color.fps,
            },
            StreamId::Left => StreamGeometry {
                width: self.left.width,
                height: self.left.height,
                fps: self.left.fps,
            },
            StreamId::Right => StreamGeometry {
                width: self.right.width,
                height: self.right.height,
                fps: self.right.fps,
            },
            StreamId::Depth => StreamGeometry {
                width: self.left.width,
                height: self.left.height,
                fps: self.left.fps.min(self.right.fps),
            },
        }
    }
}
