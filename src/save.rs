//! Continuous save: operator toggles, on-disk layout and the throttled
//! scheduler that runs once per acquisition tick.

use chrono::{DateTime, Local};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::cache::{CacheSnapshot, FrameCache};
use crate::error::CaptureError;
use crate::frame::{ImageRef, StreamId};
use crate::storage::FrameSink;

pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_millis(500);

// ----------------------------------------------------------------------------
// Toggles
// ----------------------------------------------------------------------------

/// Independently toggled groups of streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SaveGroup {
    Color,
    Depth,
    LeftRight,
}

impl SaveGroup {
    pub const ALL: [SaveGroup; 3] = [SaveGroup::Color, SaveGroup::Depth, SaveGroup::LeftRight];

    pub fn label(self) -> &'static str {
        match self {
            SaveGroup::Color => "RGB",
            SaveGroup::Depth => "Depth",
            SaveGroup::LeftRight => "Left+Right",
        }
    }
}

impl fmt::Display for SaveGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Plain copy of the toggle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SaveToggles {
    pub color: bool,
    pub depth: bool,
    pub left_right: bool,
}

impl SaveToggles {
    pub fn any(&self) -> bool {
        self.color || self.depth || self.left_right
    }

    pub fn is_enabled(&self, group: SaveGroup) -> bool {
        match group {
            SaveGroup::Color => self.color,
            SaveGroup::Depth => self.depth,
            SaveGroup::LeftRight => self.left_right,
        }
    }
}

/// Toggle flags shared between the operator side and the acquisition thread.
#[derive(Debug, Default)]
pub struct SaveToggleSet {
    color: AtomicBool,
    depth: AtomicBool,
    left_right: AtomicBool,
}

impl SaveToggleSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, group: SaveGroup) -> &AtomicBool {
        match group {
            SaveGroup::Color => &self.color,
            SaveGroup::Depth => &self.depth,
            SaveGroup::LeftRight => &self.left_right,
        }
    }

    /// Flip one group and return its new value.
    pub fn toggle(&self, group: SaveGroup) -> bool {
        !self.flag(group).fetch_xor(true, Ordering::SeqCst)
    }

    pub fn set(&self, group: SaveGroup, enabled: bool) {
        self.flag(group).store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self, group: SaveGroup) -> bool {
        self.flag(group).load(Ordering::SeqCst)
    }

    pub fn disable_all(&self) {
        for group in SaveGroup::ALL {
            self.set(group, false);
        }
    }

    pub fn snapshot(&self) -> SaveToggles {
        SaveToggles {
            color: self.is_enabled(SaveGroup::Color),
            depth: self.is_enabled(SaveGroup::Depth),
            left_right: self.is_enabled(SaveGroup::LeftRight),
        }
    }
}

// ----------------------------------------------------------------------------
// Layout
// ----------------------------------------------------------------------------

/// One kind of saved file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SaveTarget {
    Color,
    Depth,
    DepthColor,
    Left,
    Right,
}

impl SaveTarget {
    /// Folder name under the save root, also used as the file name prefix.
    pub fn folder(self) -> &'static str {
        match self {
            SaveTarget::Color => "rgb",
            SaveTarget::Depth => "depth",
            SaveTarget::DepthColor => "depth_color",
            SaveTarget::Left => "left",
            SaveTarget::Right => "right",
        }
    }
}

/// Deterministic mapping from (target, batch stamp) to a file path.
#[derive(Clone, Debug)]
pub struct SaveLayout {
    root: PathBuf,
}

impl SaveLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn folder(&self, target: SaveTarget) -> PathBuf {
        self.root.join(target.folder())
    }

    pub fn path(&self, target: SaveTarget, stamp: &str) -> PathBuf {
        self.folder(target).join(format!("{}_{}.png", target.folder(), stamp))
    }
}

/// Millisecond-resolution stamp shared by every file in a batch.
pub fn batch_stamp(at: DateTime<Local>) -> String {
    at.format("%Y%m%d_%H%M%S_%3f").to_string()
}

// ----------------------------------------------------------------------------
// Scheduler
// ----------------------------------------------------------------------------

/// What one save batch did.
#[derive(Debug)]
pub struct BatchReport {
    pub stamp: String,
    pub written: Vec<PathBuf>,
    /// Requested targets with nothing cached yet.
    pub skipped: Vec<SaveTarget>,
    pub failure: Option<CaptureError>,
    /// The session moved on mid-batch; the remaining targets were not written.
    pub superseded: bool,
}

/// Runs at most one save batch per `interval`, writing the cached frames of
/// every enabled group. Any write failure disables every toggle.
pub struct SaveScheduler {
    layout: SaveLayout,
    interval: Duration,
    last_save_at: Option<Instant>,
    sink: Box<dyn FrameSink>,
    batches: u64,
}

impl SaveScheduler {
    pub fn new(layout: SaveLayout, interval: Duration, sink: Box<dyn FrameSink>) -> Self {
        Self {
            layout,
            interval,
            last_save_at: None,
            sink,
            batches: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_save_at(&self) -> Option<Instant> {
        self.last_save_at
    }

    /// Number of batches attempted so far.
    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// Called once per tick by the loop of `generation`. Returns `None` when
    /// no batch was due or the generation is no longer current.
    ///
    /// The first call starts the interval clock, so the earliest batch lands
    /// one full interval after the loop's first tick.
    pub fn run(
        &mut self,
        now: Instant,
        cache: &FrameCache,
        generation: u64,
        toggles: &SaveToggleSet,
    ) -> Option<BatchReport> {
        let last = *self.last_save_at.get_or_insert(now);
        let requested = toggles.snapshot();
        if !requested.any() {
            return None;
        }
        if now.saturating_duration_since(last) < self.interval {
            return None;
        }

        let stamp = batch_stamp(Local::now());
        let snapshot = cache.snapshot();
        let report = self.write_batch(stamp, requested, &snapshot, cache, generation);
        if report.superseded {
            log::debug!(
                "save batch {} cut short: generation {} superseded",
                report.stamp,
                generation
            );
            if report.written.is_empty() {
                return None;
            }
            return Some(report);
        }
        self.last_save_at = Some(now);
        self.batches += 1;

        if let Some(err) = &report.failure {
            toggles.disable_all();
            log::error!("continuous saving disabled: {}", err);
        } else {
            log::debug!(
                "save batch {}: {} written, {} skipped",
                report.stamp,
                report.written.len(),
                report.skipped.len()
            );
        }
        Some(report)
    }

    fn write_batch(
        &mut self,
        stamp: String,
        requested: SaveToggles,
        snapshot: &CacheSnapshot,
        cache: &FrameCache,
        generation: u64,
    ) -> BatchReport {
        let mut planned: Vec<(SaveTarget, Option<ImageRef<'_>>)> = Vec::new();
        if requested.color {
            let image = snapshot.frame(StreamId::Color).map(|f| f.image());
            planned.push((SaveTarget::Color, image));
        }
        if requested.depth {
            let raw = snapshot.frame(StreamId::Depth).map(|f| f.image());
            let view = snapshot
                .depth_view()
                .map(|view| ImageRef::Rgb8(view.image()));
            planned.push((SaveTarget::Depth, raw));
            planned.push((SaveTarget::DepthColor, view));
        }
        if requested.left_right {
            let left = snapshot.frame(StreamId::Left).map(|f| f.image());
            let right = snapshot.frame(StreamId::Right).map(|f| f.image());
            planned.push((SaveTarget::Left, left));
            planned.push((SaveTarget::Right, right));
        }

        let mut report = BatchReport {
            stamp,
            written: Vec::new(),
            skipped: Vec::new(),
            failure: None,
            superseded: false,
        };
        for (target, image) in planned {
            let Some(image) = image else {
                report.skipped.push(target);
                continue;
            };
            let path = self.layout.path(target, &report.stamp);
            let sink = &mut self.sink;
            match cache.persist_if_current(generation, || sink.write(&path, image)) {
                Some(Ok(())) => report.written.push(path),
                Some(Err(err)) => {
                    report.failure = Some(err);
                    break;
                }
                None => {
                    report.superseded = true;
                    break;
                }
            }
        }
        report
    }
}
