//! Latest-frame cache shared by the acquisition thread and the display side.
//!
//! One slot per stream, each holding at most the newest `Frame` behind an
//! `Arc`; older frames are dropped, never queued. A single coarse lock guards
//! every slot, the derived depth colour view and the session generation, so
//! readers always observe whole values and a generation bump is atomic with
//! respect to writes.
//!
//! Disk writes made on behalf of a generation go through
//! [`FrameCache::persist_if_current`]. Once `advance_generation` returns, no
//! writer of an older generation is mid-write or can start one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::depth::DepthColorView;
use crate::frame::{Frame, StreamId};

/// Result of a cache write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    /// The frame is older than the one already cached for its stream.
    Stale,
    /// The writer belongs to a superseded acquisition session.
    Superseded,
}

#[derive(Default)]
struct Slots {
    generation: u64,
    frames: [Option<Arc<Frame>>; 4],
    depth_view: Option<Arc<DepthColorView>>,
}

impl Slots {
    fn admit(&self, generation: u64, frame: &Frame) -> StoreOutcome {
        if generation != self.generation {
            return StoreOutcome::Superseded;
        }
        match &self.frames[frame.stream().index()] {
            Some(current) if current.captured_at() > frame.captured_at() => StoreOutcome::Stale,
            _ => StoreOutcome::Stored,
        }
    }
}

#[derive(Default)]
pub struct FrameCache {
    slots: Mutex<Slots>,
    persist: Mutex<()>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // Slots only ever hold whole values, so a poisoned guard is still consistent.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Invalidate every writer holding the current generation and return the
    /// new one.
    pub fn advance_generation(&self) -> u64 {
        let generation = {
            let mut slots = self.lock();
            slots.generation += 1;
            slots.generation
        };
        // Wait out a write admitted under the old generation.
        drop(self.persist.lock().unwrap_or_else(PoisonError::into_inner));
        generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    /// Run `write` only if `generation` is still current, holding off
    /// `advance_generation` until it returns.
    pub fn persist_if_current<R>(&self, generation: u64, write: impl FnOnce() -> R) -> Option<R> {
        let _gate = self.persist.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_current(generation) {
            return None;
        }
        Some(write())
    }

    /// Replace the slot for `frame.stream()`.
    ///
    /// Storing a depth frame through this path drops the colour view, which
    /// no longer matches; use [`FrameCache::store_depth`] to publish both.
    pub fn store(&self, generation: u64, frame: Frame) -> StoreOutcome {
        let mut slots = self.lock();
        let outcome = slots.admit(generation, &frame);
        if outcome == StoreOutcome::Stored {
            let stream = frame.stream();
            if stream == StreamId::Depth {
                slots.depth_view = None;
            }
            slots.frames[stream.index()] = Some(Arc::new(frame));
        }
        outcome
    }

    /// Publish a depth frame together with its colour view.
    pub fn store_depth(&self, generation: u64, frame: Frame, view: DepthColorView) -> StoreOutcome {
        debug_assert_eq!(frame.stream(), StreamId::Depth);
        debug_assert_eq!(view.source_timestamp(), frame.captured_at());
        let mut slots = self.lock();
        let outcome = slots.admit(generation, &frame);
        if outcome == StoreOutcome::Stored {
            slots.frames[StreamId::Depth.index()] = Some(Arc::new(frame));
            slots.depth_view = Some(Arc::new(view));
        }
        outcome
    }

    pub fn latest(&self, stream: StreamId) -> Option<Arc<Frame>> {
        self.lock().frames[stream.index()].clone()
    }

    pub fn depth_view(&self) -> Option<Arc<DepthColorView>> {
        self.lock().depth_view.clone()
    }

    /// Consistent copy of every slot taken under one lock.
    pub fn snapshot(&self) -> CacheSnapshot {
        let slots = self.lock();
        CacheSnapshot {
            frames: slots.frames.clone(),
            depth_view: slots.depth_view.clone(),
        }
    }
}

/// Read-only view of the cache at one instant.
#[derive(Clone, Debug, Default)]
pub struct CacheSnapshot {
    frames: [Option<Arc<Frame>>; 4],
    depth_view: Option<Arc<DepthColorView>>,
}

impl CacheSnapshot {
    pub fn frame(&self, stream: StreamId) -> Option<&Arc<Frame>> {
        self.frames[stream.index()].as_ref()
    }

    pub fn depth_view(&self) -> Option<&Arc<DepthColorView>> {
        self.depth_view.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.iter().all(Option::is_none)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{DepthImage, Pixels};
    use image::{Luma, Rgb, RgbImage};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    fn color_frame(at: Instant, shade: u8) -> Frame {
        Frame::new(
            StreamId::Color,
            Pixels::Rgb8(RgbImage::from_pixel(2, 2, Rgb([shade, shade, shade]))),
            at,
        )
    }

    fn depth_frame(at: Instant, value: u16) -> Frame {
        Frame::new(
            StreamId::Depth,
            Pixels::Depth16(DepthImage::from_pixel(4, 4, Luma([value]))),
            at,
        )
    }

    #[test]
    fn latest_frame_wins() {
        let cache = FrameCache::new();
        let gen = cache.generation();
        let base = Instant::now();
        for i in 0..10u8 {
            let at = base + Duration::from_millis(i as u64);
            assert_eq!(cache.store(gen, color_frame(at, i)), StoreOutcome::Stored);
        }
        let latest = cache.latest(StreamId::Color).unwrap();
        assert_eq!(latest.captured_at(), base + Duration::from_millis(9));
        assert_eq!(latest.as_rgb().unwrap().get_pixel(0, 0).0, [9, 9, 9]);
    }

    #[test]
    fn older_frames_are_rejected() {
        let cache = FrameCache::new();
        let gen = cache.generation();
        let base = Instant::now();
        cache.store(gen, color_frame(base + Duration::from_millis(5), 1));
        assert_eq!(cache.store(gen, color_frame(base, 2)), StoreOutcome::Stale);
        assert_eq!(
            cache.latest(StreamId::Color).unwrap().captured_at(),
            base + Duration::from_millis(5)
        );
    }

    #[test]
    fn superseded_generation_cannot_write() {
        let cache = FrameCache::new();
        let old = cache.generation();
        let new = cache.advance_generation();
        assert_eq!(new, old + 1);

        assert_eq!(
            cache.store(old, color_frame(Instant::now(), 1)),
            StoreOutcome::Superseded
        );
        assert!(cache.latest(StreamId::Color).is_none());
        assert_eq!(
            cache.store(new, color_frame(Instant::now(), 1)),
            StoreOutcome::Stored
        );
    }

    #[test]
    fn each_stream_lands_in_its_own_slot() {
        let cache = FrameCache::new();
        let gen = cache.generation();
        let at = Instant::now();
        for (i, stream) in [StreamId::Color, StreamId::Left, StreamId::Right]
            .into_iter()
            .enumerate()
        {
            let frame = Frame::new(
                stream,
                Pixels::Rgb8(RgbImage::from_pixel(2, 2, Rgb([i as u8; 3]))),
                at,
            );
            assert_eq!(cache.store(gen, frame), StoreOutcome::Stored);
        }
        assert_eq!(cache.store(gen, depth_frame(at, 900)), StoreOutcome::Stored);

        let snapshot = cache.snapshot();
        for stream in StreamId::ALL {
            assert_eq!(snapshot.frame(stream).unwrap().stream(), stream);
        }
        let right = snapshot.frame(StreamId::Right).unwrap();
        assert_eq!(right.as_rgb().unwrap().get_pixel(0, 0).0, [2, 2, 2]);
    }

    #[test]
    fn persist_is_refused_once_superseded() {
        let cache = FrameCache::new();
        let old = cache.generation();
        assert_eq!(cache.persist_if_current(old, || 7), Some(7));

        let new = cache.advance_generation();
        assert!(!cache.is_current(old));
        assert!(cache.is_current(new));
        assert_eq!(cache.persist_if_current(old, || 7), None);
        assert_eq!(cache.persist_if_current(new, || 8), Some(8));
    }

    #[test]
    fn advancing_waits_for_an_admitted_write() {
        let cache = Arc::new(FrameCache::new());
        let gen = cache.generation();
        let finished = Arc::new(AtomicBool::new(false));
        let (entered_tx, entered_rx) = mpsc::channel();

        let writer = {
            let cache = Arc::clone(&cache);
            let finished = Arc::clone(&finished);
            std::thread::spawn(move || {
                cache.persist_if_current(gen, || {
                    entered_tx.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(50));
                    finished.store(true, Ordering::SeqCst);
                })
            })
        };

        entered_rx.recv().unwrap();
        cache.advance_generation();
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(writer.join().unwrap(), Some(()));
    }

    #[test]
    fn depth_frame_and_view_are_published_together() {
        let cache = FrameCache::new();
        let gen = cache.generation();
        let at = Instant::now();
        let frame = depth_frame(at, 900);
        let view = DepthColorView::from_frame(&frame).unwrap();
        assert_eq!(cache.store_depth(gen, frame, view), StoreOutcome::Stored);

        let snapshot = cache.snapshot();
        let stored = snapshot.frame(StreamId::Depth).unwrap();
        assert_eq!(
            snapshot.depth_view().unwrap().source_timestamp(),
            stored.captured_at()
        );

        // A bare depth write invalidates the now-mismatched view.
        cache.store(gen, depth_frame(at + Duration::from_millis(1), 901));
        assert!(cache.depth_view().is_none());
    }

    #[test]
    fn readers_never_observe_older_frames() {
        let cache = Arc::new(FrameCache::new());
        let gen = cache.generation();
        let base = Instant::now();

        let reader = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                let mut last = None;
                for _ in 0..2000 {
                    if let Some(frame) = cache.latest(StreamId::Color) {
                        let at = frame.captured_at();
                        if let Some(prev) = last {
                            assert!(at >= prev);
                        }
                        last = Some(at);
                    }
                }
            })
        };

        for i in 0..500u64 {
            cache.store(gen, color_frame(base + Duration::from_micros(i), 0));
        }
        reader.join().unwrap();
        assert_eq!(
            cache.latest(StreamId::Color).unwrap().captured_at(),
            base + Duration::from_micros(499)
        );
    }
}
