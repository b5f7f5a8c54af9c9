use image::ImageFormat;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{CaptureError, CaptureResult};
use crate::frame::ImageRef;

/// Destination for saved images. Paths are fully resolved by the caller.
pub trait FrameSink: Send {
    fn write(&mut self, path: &Path, image: ImageRef<'_>) -> CaptureResult<()>;
}

/// Writes PNG files, creating parent directories on demand. Depth images are
/// stored as 16-bit grayscale.
#[derive(Clone, Copy, Debug, Default)]
pub struct PngSink;

impl FrameSink for PngSink {
    fn write(&mut self, path: &Path, image: ImageRef<'_>) -> CaptureResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CaptureError::persistence(path, e))?;
        }
        let result = match image {
            ImageRef::Rgb8(img) => img.save_with_format(path, ImageFormat::Png),
            ImageRef::Depth16(img) => img.save_with_format(path, ImageFormat::Png),
        };
        result.map_err(|e| CaptureError::persistence(path, e))
    }
}

// ----------------------------------------------------------------------------
// In-memory sink
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoredKind {
    Rgb8,
    Depth16,
}

/// Record of one image accepted by a [`MemorySink`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredImage {
    pub path: PathBuf,
    pub kind: StoredKind,
    pub width: u32,
    pub height: u32,
}

#[derive(Default)]
struct MemorySinkState {
    written: Vec<StoredImage>,
    failures_pending: usize,
}

/// Sink that records writes instead of touching the filesystem.
///
/// Clones share state, so a handle kept outside a session can inspect what
/// the acquisition thread wrote and inject write failures.
#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemorySinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` writes fail with a persistence error.
    pub fn fail_next(&self, count: usize) {
        self.lock().failures_pending = count;
    }

    pub fn written(&self) -> Vec<StoredImage> {
        self.lock().written.clone()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().written.iter().map(|w| w.path.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().written.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().written.is_empty()
    }
}

impl FrameSink for MemorySink {
    fn write(&mut self, path: &Path, image: ImageRef<'_>) -> CaptureResult<()> {
        let mut state = self.lock();
        if state.failures_pending > 0 {
            state.failures_pending -= 1;
            return Err(CaptureError::persistence(path, "injected write failure"));
        }
        let (kind, (width, height)) = match image {
            ImageRef::Rgb8(img) => (StoredKind::Rgb8, img.dimensions()),
            ImageRef::Depth16(img) => (StoredKind::Depth16, img.dimensions()),
        };
        state.written.push(StoredImage {
            path: path.to_path_buf(),
            kind,
            width,
            height,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::frame::DepthImage;
    use image::{Luma, Rgb, RgbImage};

    #[test]
    fn png_sink_round_trips_depth_precision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depth").join("depth_test.png");
        let depth = DepthImage::from_fn(3, 2, |x, y| Luma([1000 + (x + y * 3) as u16 * 700]));

        PngSink.write(&path, ImageRef::Depth16(&depth)).unwrap();

        let decoded = image::open(&path).unwrap().into_luma16();
        assert_eq!(decoded, depth);
    }

    #[test]
    fn png_sink_writes_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rgb").join("rgb_test.png");
        let rgb = RgbImage::from_pixel(5, 4, Rgb([10, 20, 30]));

        PngSink.write(&path, ImageRef::Rgb8(&rgb)).unwrap();

        let decoded = image::open(&path).unwrap().into_rgb8();
        assert_eq!(decoded.get_pixel(4, 3).0, [10, 20, 30]);
    }

    #[test]
    fn png_sink_reports_unwritable_destination() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the directory should be.
        let blocker = dir.path().join("rgb");
        fs::write(&blocker, b"not a directory").unwrap();
        let rgb = RgbImage::new(1, 1);

        let err = PngSink
            .write(&blocker.join("rgb_x.png"), ImageRef::Rgb8(&rgb))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Persistence);
    }

    #[test]
    fn memory_sink_injects_failures_then_recovers() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        let rgb = RgbImage::new(2, 2);
        sink.fail_next(1);

        assert!(writer.write(Path::new("a.png"), ImageRef::Rgb8(&rgb)).is_err());
        writer.write(Path::new("b.png"), ImageRef::Rgb8(&rgb)).unwrap();

        assert_eq!(sink.paths(), vec![PathBuf::from("b.png")]);
        assert_eq!(sink.written()[0].kind, StoredKind::Rgb8);
    }
}
