//! Synthetic device for `stub://` URLs.
//!
//! Each stream produces deterministic frames at its configured rate: a
//! drifting colour gradient (delivered as BGR), shifted mono patterns for the
//! stereo pair, and a depth ramp crossed by a moving band of zero samples.
//! `stub://busy` behaves like a device already claimed by another process.

use image::{GrayImage, Luma};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Device, DeviceDriver, FrameSource, PipelineConfig, SourceFrame, SourceImage};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::{DepthImage, StreamId};

pub const SCHEME: &str = "stub://";
const BUSY_DEVICE: &str = "busy";

/// Nearest and farthest synthetic range, in millimetres.
const DEPTH_NEAR_MM: u32 = 400;
const DEPTH_FAR_MM: u32 = 4400;

pub struct SyntheticDriver {
    device: String,
}

impl SyntheticDriver {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl DeviceDriver for SyntheticDriver {
    fn open(&self, config: &PipelineConfig) -> CaptureResult<Box<dyn Device>> {
        let name = self.device.strip_prefix(SCHEME).ok_or_else(|| {
            CaptureError::DeviceUnavailable(format!("{} is not a synthetic device", self.device))
        })?;
        if name == BUSY_DEVICE {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} is in use by another process",
                self.device
            )));
        }
        config.validate()?;

        log::info!("SyntheticDevice: opened {}", self.device);
        Ok(Box::new(SyntheticDevice {
            device: self.device.clone(),
            config: config.clone(),
            link: Arc::new(AtomicBool::new(true)),
            opened: [false; 4],
        }))
    }
}

struct SyntheticDevice {
    device: String,
    config: PipelineConfig,
    /// Cleared on close; sources still held by a lingering loop start failing.
    link: Arc<AtomicBool>,
    opened: [bool; 4],
}

impl Device for SyntheticDevice {
    fn open_stream(&mut self, stream: StreamId) -> CaptureResult<Box<dyn FrameSource>> {
        if !self.link.load(Ordering::SeqCst) {
            return Err(CaptureError::Transport(format!(
                "{} is closed",
                self.device
            )));
        }
        let slot = &mut self.opened[stream.index()];
        if *slot {
            return Err(CaptureError::ConfigurationRejected(format!(
                "queue {} already open",
                stream.queue_name()
            )));
        }
        *slot = true;

        let geometry = self.config.geometry(stream);
        log::debug!(
            "SyntheticDevice: queue {} {}x{} @{}fps",
            stream.queue_name(),
            geometry.width,
            geometry.height,
            geometry.fps
        );
        Ok(Box::new(SyntheticSource {
            stream,
            width: geometry.width,
            height: geometry.height,
            period: geometry.frame_period(),
            next_due: None,
            frame_count: 0,
            link: Arc::clone(&self.link),
            closed: false,
        }))
    }

    fn close(&mut self) {
        if self.link.swap(false, Ordering::SeqCst) {
            log::info!("SyntheticDevice: closed {}", self.device);
        }
    }
}

struct SyntheticSource {
    stream: StreamId,
    width: u32,
    height: u32,
    period: Duration,
    next_due: Option<Instant>,
    frame_count: u64,
    link: Arc<AtomicBool>,
    closed: bool,
}

impl SyntheticSource {
    fn generate(&self) -> SourceImage {
        let (w, h) = (self.width.max(1), self.height.max(1));
        let shift = (self.frame_count % 65_536) as u32;
        match self.stream {
            StreamId::Color => {
                let mut data = Vec::with_capacity((w * h * 3) as usize);
                for y in 0..h {
                    for x in 0..w {
                        let r = ((x + shift) % w * 255 / w) as u8;
                        let g = (y * 255 / h) as u8;
                        let b = (shift % 256) as u8;
                        data.extend_from_slice(&[b, g, r]);
                    }
                }
                SourceImage::Bgr8 {
                    width: w,
                    height: h,
                    data,
                }
            }
            StreamId::Left | StreamId::Right => {
                // The right camera sees the same texture a few columns over.
                let offset = if self.stream == StreamId::Right { 8 } else { 0 };
                SourceImage::Gray8(GrayImage::from_fn(w, h, |x, y| {
                    Luma([((x + offset + y / 4 + shift) % 256) as u8])
                }))
            }
            StreamId::Depth => {
                let band_width = (w / 8).max(1);
                let band_start = (shift * 4) % w;
                SourceImage::Depth16(DepthImage::from_fn(w, h, |x, y| {
                    let in_band = (x + w - band_start) % w < band_width;
                    if in_band {
                        Luma([0])
                    } else {
                        let span = DEPTH_FAR_MM - DEPTH_NEAR_MM;
                        let mm = DEPTH_NEAR_MM + x * span / w + y;
                        Luma([mm.min(u16::MAX as u32) as u16])
                    }
                }))
            }
        }
    }
}

impl FrameSource for SyntheticSource {
    fn poll(&mut self) -> CaptureResult<Option<SourceFrame>> {
        if self.closed || !self.link.load(Ordering::SeqCst) {
            return Err(CaptureError::Transport(format!(
                "queue {} is closed",
                self.stream.queue_name()
            )));
        }
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if now < due {
                return Ok(None);
            }
        }
        self.next_due = Some(now + self.period);
        self.frame_count += 1;
        Ok(Some(SourceFrame::new(self.generate(), now)))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            log::debug!(
                "SyntheticSource: queue {} closed after {} frames",
                self.stream.queue_name(),
                self.frame_count
            );
        }
    }
}
