//! Deterministic end-to-end runs of the acquisition loop with scripted
//! sources and injected tick times.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{GrayImage, Luma, RgbImage};

use depth_capture::{
    AcquisitionLoop, CaptureResult, DepthImage, FrameCache, FrameSource, SaveGroup, SaveLayout,
    SaveScheduler, SaveToggleSet, SourceFrame, SourceImage, StatusBoard, StreamId,
};
use depth_capture::storage::{MemorySink, StoredKind};

const TICK: Duration = Duration::from_millis(30);
const INTERVAL: Duration = Duration::from_millis(500);

/// Source that replays a fixed list of frames, one per poll, then reports no
/// data. Capture times are supplied by the script.
struct Replay {
    frames: VecDeque<SourceFrame>,
}

impl FrameSource for Replay {
    fn poll(&mut self) -> CaptureResult<Option<SourceFrame>> {
        Ok(self.frames.pop_front())
    }

    fn close(&mut self) {}
}

fn image_for(stream: StreamId, seed: u16) -> SourceImage {
    match stream {
        StreamId::Color => SourceImage::Rgb8(RgbImage::new(32, 24)),
        StreamId::Depth => SourceImage::Depth16(DepthImage::from_fn(32, 24, |x, y| {
            if x < 4 {
                Luma([0])
            } else {
                Luma([800 + seed * 100 + (x + y) as u16 * 10])
            }
        })),
        StreamId::Left | StreamId::Right => {
            SourceImage::Gray8(GrayImage::from_pixel(32, 24, Luma([seed as u8])))
        }
    }
}

struct Harness {
    acquisition: AcquisitionLoop,
    cache: Arc<FrameCache>,
    toggles: Arc<SaveToggleSet>,
    sink: MemorySink,
}

/// Every stream delivers one frame at each of `times`.
fn harness(times: &[Instant]) -> Harness {
    let cache = Arc::new(FrameCache::new());
    let toggles = Arc::new(SaveToggleSet::new());
    let sink = MemorySink::new();
    let sources: Vec<(StreamId, Box<dyn FrameSource>)> = StreamId::ALL
        .iter()
        .map(|&stream| {
            let frames = times
                .iter()
                .enumerate()
                .map(|(i, &at)| SourceFrame::new(image_for(stream, i as u16), at))
                .collect();
            let source: Box<dyn FrameSource> = Box::new(Replay { frames });
            (stream, source)
        })
        .collect();
    let scheduler = SaveScheduler::new(
        SaveLayout::new("/captures"),
        INTERVAL,
        Box::new(sink.clone()),
    );
    let acquisition = AcquisitionLoop::new(
        cache.generation(),
        sources,
        Arc::clone(&cache),
        Arc::clone(&toggles),
        Arc::new(StatusBoard::default()),
        scheduler,
    );
    Harness {
        acquisition,
        cache,
        toggles,
        sink,
    }
}

#[test]
fn depth_toggle_saves_one_raw_and_one_colorized_file_after_the_interval() {
    let t0 = Instant::now();
    let mut h = harness(&[t0, t0 + TICK]);

    // Two ticks deliver all four streams.
    assert_eq!(h.acquisition.tick(t0).stored.len(), 4);
    assert_eq!(h.acquisition.tick(t0 + TICK).stored.len(), 4);
    let snapshot = h.cache.snapshot();
    for stream in StreamId::ALL {
        assert_eq!(snapshot.frame(stream).unwrap().captured_at(), t0 + TICK);
    }

    assert!(h.toggles.toggle(SaveGroup::Depth));

    // Still inside the interval: nothing saved.
    let report = h.acquisition.tick(t0 + TICK * 2);
    assert!(report.batch.is_none());
    assert!(h.sink.is_empty());

    // Interval elapsed since the loop's first tick.
    let report = h.acquisition.tick(t0 + INTERVAL);
    let batch = report.batch.expect("save batch due");
    assert!(batch.failure.is_none());

    let written = h.sink.written();
    assert_eq!(written.len(), 2);
    let folders: Vec<String> = written
        .iter()
        .map(|w| {
            w.path
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(folders, vec!["depth", "depth_color"]);
    assert_eq!(written[0].kind, StoredKind::Depth16);
    assert_eq!(written[1].kind, StoredKind::Rgb8);
    assert_eq!((written[0].width, written[0].height), (32, 24));

    let expected = format!("depth_{}.png", batch.stamp);
    assert_eq!(
        written[0].path.file_name().and_then(|n| n.to_str()),
        Some(expected.as_str())
    );
}

#[test]
fn stale_display_survives_quiet_sources() {
    let t0 = Instant::now();
    let mut h = harness(&[t0]);
    h.acquisition.tick(t0);

    for n in 1..20u32 {
        let report = h.acquisition.tick(t0 + TICK * n);
        assert!(report.stored.is_empty());
    }
    let snapshot = h.cache.snapshot();
    for stream in StreamId::ALL {
        assert!(snapshot.frame(stream).is_some());
    }
    assert!(snapshot.depth_view().is_some());
    assert_eq!(h.acquisition.summary().ticks, 20);
    assert_eq!(h.acquisition.summary().frames(StreamId::Depth), 1);
}

#[test]
fn colorized_depth_masks_missing_range() {
    let t0 = Instant::now();
    let mut h = harness(&[t0]);
    h.acquisition.tick(t0);

    let view = h.cache.depth_view().unwrap();
    assert_eq!(view.source_timestamp(), t0);
    assert_eq!(view.image().get_pixel(0, 0).0, [0, 0, 0]);
    assert_ne!(view.image().get_pixel(20, 10).0, [0, 0, 0]);
}

#[test]
fn stale_generation_loop_leaves_cache_untouched() {
    let t0 = Instant::now();
    let mut h = harness(&[t0, t0 + TICK]);
    h.acquisition.tick(t0);

    h.cache.advance_generation();
    let report = h.acquisition.tick(t0 + TICK);

    assert!(report.stored.is_empty());
    assert_eq!(h.acquisition.summary().discarded_writes, 4);
    let snapshot = h.cache.snapshot();
    for stream in StreamId::ALL {
        assert_eq!(snapshot.frame(stream).unwrap().captured_at(), t0);
    }
}

#[test]
fn left_right_toggle_never_writes_color_or_depth() {
    let t0 = Instant::now();
    let mut h = harness(&[t0]);
    h.acquisition.tick(t0);
    h.toggles.toggle(SaveGroup::LeftRight);

    let batch = h.acquisition.tick(t0 + INTERVAL).batch.unwrap();
    assert_eq!(batch.written.len(), 2);
    for path in &batch.written {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap();
        assert!(name.starts_with("left_") || name.starts_with("right_"));
    }
}
