//! Acquisition loop.
//!
//! One loop per running session. Each tick polls all four sources, publishes
//! new frames to the cache (depth together with its colour view), then runs
//! the save scheduler. `AcquisitionLoop::tick` is the whole iteration body and
//! takes the tick time as an argument; `spawn` drives it from a background
//! thread at a fixed period.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::cache::{FrameCache, StoreOutcome};
use crate::depth::DepthColorView;
use crate::frame::{Frame, StreamId};
use crate::ingest::FrameSource;
use crate::save::{BatchReport, SaveScheduler, SaveToggleSet};
use crate::status::StatusBoard;

pub const DEFAULT_TICK: Duration = Duration::from_millis(30);

/// Ticks between debug health lines.
const HEALTH_EVERY_TICKS: u64 = 100;

/// Counters for one loop run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub ticks: u64,
    pub frames: [u64; 4],
    pub transport_errors: [u64; 4],
    /// Cache writes dropped because the session moved to a newer generation.
    pub discarded_writes: u64,
    pub save_batches: u64,
    pub save_failures: u64,
}

impl LoopSummary {
    pub fn frames(&self, stream: StreamId) -> u64 {
        self.frames[stream.index()]
    }

    pub fn transport_errors(&self, stream: StreamId) -> u64 {
        self.transport_errors[stream.index()]
    }

    pub fn total_frames(&self) -> u64 {
        self.frames.iter().sum()
    }
}

/// What a single tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Streams whose cache slot was replaced this tick, in publish order.
    pub stored: Vec<StreamId>,
    pub batch: Option<BatchReport>,
}

pub struct AcquisitionLoop {
    generation: u64,
    sources: Vec<(StreamId, Box<dyn FrameSource>)>,
    cache: Arc<FrameCache>,
    toggles: Arc<SaveToggleSet>,
    status: Arc<StatusBoard>,
    scheduler: SaveScheduler,
    summary: LoopSummary,
}

impl AcquisitionLoop {
    pub fn new(
        generation: u64,
        sources: Vec<(StreamId, Box<dyn FrameSource>)>,
        cache: Arc<FrameCache>,
        toggles: Arc<SaveToggleSet>,
        status: Arc<StatusBoard>,
        scheduler: SaveScheduler,
    ) -> Self {
        Self {
            generation,
            sources,
            cache,
            toggles,
            status,
            scheduler,
            summary: LoopSummary::default(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn summary(&self) -> &LoopSummary {
        &self.summary
    }

    /// One iteration: polls, depth colorization, then the save batch.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        self.summary.ticks += 1;
        let mut report = TickReport::default();
        let mut pending_depth: Option<Frame> = None;

        for (stream, source) in self.sources.iter_mut() {
            let stream = *stream;
            let polled = source
                .poll()
                .and_then(|frame| frame.map(|f| f.into_frame(stream)).transpose());
            let frame = match polled {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(err) => {
                    self.summary.transport_errors[stream.index()] += 1;
                    log::warn!("acquisition: {} poll failed: {}", stream, err);
                    continue;
                }
            };
            self.summary.frames[stream.index()] += 1;

            if stream == StreamId::Depth {
                pending_depth = Some(frame);
                continue;
            }
            let outcome = self.cache.store(self.generation, frame);
            record(&mut self.summary, &mut report, stream, outcome);
        }

        if let Some(frame) = pending_depth {
            let outcome = match DepthColorView::from_frame(&frame) {
                Some(view) => self.cache.store_depth(self.generation, frame, view),
                None => self.cache.store(self.generation, frame),
            };
            record(&mut self.summary, &mut report, StreamId::Depth, outcome);
        }

        let batch = self.scheduler.run(now, &self.cache, self.generation, &self.toggles);
        if let Some(batch) = batch {
            self.summary.save_batches += 1;
            if let Some(err) = &batch.failure {
                self.summary.save_failures += 1;
                self.status.error(format!("Save error: {}", err));
            }
            report.batch = Some(batch);
        }

        if self.summary.ticks % HEALTH_EVERY_TICKS == 0 {
            log::debug!(
                "acquisition: gen={} ticks={} frames={:?} transport_errors={:?}",
                self.generation,
                self.summary.ticks,
                self.summary.frames,
                self.summary.transport_errors
            );
        }
        report
    }

    /// Tick every `period` until `stop` fires or its sender is dropped, then
    /// close every source.
    pub fn run(mut self, period: Duration, stop: &Receiver<()>) -> LoopSummary {
        log::info!(
            "acquisition: started gen={} streams={} period={:?}",
            self.generation,
            self.sources.len(),
            period
        );
        loop {
            let started = Instant::now();
            self.tick(started);
            let wait = period.saturating_sub(started.elapsed());
            match stop.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.close_sources();

        let s = &self.summary;
        log::info!(
            "acquisition: stopped gen={} ticks={} rgb={} depth={} left={} right={} discarded={} batches={}",
            self.generation,
            s.ticks,
            s.frames(StreamId::Color),
            s.frames(StreamId::Depth),
            s.frames(StreamId::Left),
            s.frames(StreamId::Right),
            s.discarded_writes,
            s.save_batches
        );
        self.summary
    }

    pub fn close_sources(&mut self) {
        for (_, source) in self.sources.iter_mut() {
            source.close();
        }
    }
}

fn record(
    summary: &mut LoopSummary,
    report: &mut TickReport,
    stream: StreamId,
    outcome: StoreOutcome,
) {
    match outcome {
        StoreOutcome::Stored => report.stored.push(stream),
        StoreOutcome::Superseded => summary.discarded_writes += 1,
        StoreOutcome::Stale => log::debug!("acquisition: dropped out-of-order {} frame", stream),
    }
}

// ----------------------------------------------------------------------------
// Background runner
// ----------------------------------------------------------------------------

/// Handle to a loop running on its own thread.
#[derive(Debug)]
pub struct LoopHandle {
    stop: Sender<()>,
    done: Receiver<LoopSummary>,
    join: Option<JoinHandle<()>>,
}

impl LoopHandle {
    /// Ask the loop to exit after its current tick.
    pub fn signal_stop(&self) {
        let _ = self.stop.send(());
    }

    /// Wait up to `grace` for the loop to exit. Returns `None` and detaches the
    /// thread if it did not.
    pub fn wait(mut self, grace: Duration) -> Option<LoopSummary> {
        match self.done.recv_timeout(grace) {
            Ok(summary) => {
                if let Some(join) = self.join.take() {
                    if join.join().is_err() {
                        log::error!("acquisition thread panicked after reporting");
                    }
                }
                Some(summary)
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "acquisition: loop did not exit within {:?}, detaching",
                    grace
                );
                None
            }
            Err(RecvTimeoutError::Disconnected) => {
                log::error!("acquisition thread exited without a summary");
                None
            }
        }
    }
}

/// Run `acquisition` on a new thread, ticking every `period`.
pub fn spawn(acquisition: AcquisitionLoop, period: Duration) -> std::io::Result<LoopHandle> {
    let (stop_tx, stop_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();
    let join = std::thread::Builder::new()
        .name(format!("acquisition-{}", acquisition.generation()))
        .spawn(move || {
            let summary = acquisition.run(period, &stop_rx);
            let _ = done_tx.send(summary);
        })?;
    Ok(LoopHandle {
        stop: stop_tx,
        done: done_rx,
        join: Some(join),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CaptureError, CaptureResult};
    use crate::frame::DepthImage;
    use crate::ingest::{SourceFrame, SourceImage};
    use crate::save::{SaveGroup, SaveLayout};
    use crate::storage::MemorySink;
    use image::{Luma, RgbImage};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};

    enum Step {
        Frame(SourceImage),
        Empty,
        Fail,
    }

    struct Scripted {
        steps: VecDeque<Step>,
        closed: Arc<AtomicBool>,
    }

    impl FrameSource for Scripted {
        fn poll(&mut self) -> CaptureResult<Option<SourceFrame>> {
            match self.steps.pop_front().unwrap_or(Step::Empty) {
                Step::Frame(image) => Ok(Some(SourceFrame::new(image, Instant::now()))),
                Step::Empty => Ok(None),
                Step::Fail => Err(CaptureError::Transport("link dropped".to_string())),
            }
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn rgb() -> Step {
        Step::Frame(SourceImage::Rgb8(RgbImage::new(4, 4)))
    }

    fn depth(value: u16) -> Step {
        Step::Frame(SourceImage::Depth16(DepthImage::from_pixel(4, 4, Luma([value]))))
    }

    struct Rig {
        cache: Arc<FrameCache>,
        toggles: Arc<SaveToggleSet>,
        status: Arc<StatusBoard>,
        sink: MemorySink,
        closed: Arc<AtomicBool>,
    }

    fn build(scripts: Vec<(StreamId, Vec<Step>)>) -> (AcquisitionLoop, Rig) {
        let rig = Rig {
            cache: Arc::new(FrameCache::new()),
            toggles: Arc::new(SaveToggleSet::new()),
            status: Arc::new(StatusBoard::default()),
            sink: MemorySink::new(),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let sources = scripts
            .into_iter()
            .map(|(stream, steps)| {
                let source: Box<dyn FrameSource> = Box::new(Scripted {
                    steps: steps.into(),
                    closed: Arc::clone(&rig.closed),
                });
                (stream, source)
            })
            .collect();
        let scheduler = SaveScheduler::new(
            SaveLayout::new("/captures"),
            Duration::from_millis(500),
            Box::new(rig.sink.clone()),
        );
        let acquisition = AcquisitionLoop::new(
            rig.cache.generation(),
            sources,
            Arc::clone(&rig.cache),
            Arc::clone(&rig.toggles),
            Arc::clone(&rig.status),
            scheduler,
        );
        (acquisition, rig)
    }

    #[test]
    fn no_data_keeps_last_frame() {
        let (mut acq, rig) = build(vec![(StreamId::Color, vec![rgb(), Step::Empty, Step::Empty])]);
        let t0 = Instant::now();
        assert_eq!(acq.tick(t0).stored, vec![StreamId::Color]);
        let first = rig.cache.latest(StreamId::Color).unwrap();

        acq.tick(t0 + DEFAULT_TICK);
        acq.tick(t0 + DEFAULT_TICK * 2);
        let still = rig.cache.latest(StreamId::Color).unwrap();
        assert!(Arc::ptr_eq(&first, &still));
    }

    #[test]
    fn transport_error_is_treated_as_no_data() {
        let (mut acq, rig) = build(vec![
            (StreamId::Left, vec![rgb(), Step::Fail]),
            (StreamId::Right, vec![rgb(), rgb()]),
        ]);
        let t0 = Instant::now();
        acq.tick(t0);
        let report = acq.tick(t0 + DEFAULT_TICK);

        assert_eq!(report.stored, vec![StreamId::Right]);
        assert!(rig.cache.latest(StreamId::Left).is_some());
        assert_eq!(acq.summary().transport_errors(StreamId::Left), 1);
        assert_eq!(acq.summary().frames(StreamId::Right), 2);
    }

    #[test]
    fn depth_is_published_after_other_streams_with_its_view() {
        let (mut acq, rig) = build(vec![
            (StreamId::Color, vec![rgb()]),
            (StreamId::Depth, vec![depth(1200)]),
            (StreamId::Left, vec![rgb()]),
        ]);
        let report = acq.tick(Instant::now());
        assert_eq!(
            report.stored,
            vec![StreamId::Color, StreamId::Left, StreamId::Depth]
        );
        let snapshot = rig.cache.snapshot();
        assert_eq!(
            snapshot.depth_view().unwrap().source_timestamp(),
            snapshot.frame(StreamId::Depth).unwrap().captured_at()
        );
    }

    #[test]
    fn superseded_loop_cannot_write_or_save() {
        let (mut acq, rig) = build(vec![(StreamId::Color, vec![rgb(), rgb()])]);
        let t0 = Instant::now();
        acq.tick(t0);
        let before = rig.cache.latest(StreamId::Color).unwrap();

        rig.cache.advance_generation();
        rig.toggles.set(SaveGroup::Color, true);
        let report = acq.tick(t0 + Duration::from_secs(1));

        assert!(report.stored.is_empty());
        assert!(report.batch.is_none());
        assert!(rig.sink.is_empty());
        assert_eq!(acq.summary().discarded_writes, 1);
        assert!(Arc::ptr_eq(&before, &rig.cache.latest(StreamId::Color).unwrap()));
    }

    #[test]
    fn save_failure_posts_status_and_disables_toggles() {
        let (mut acq, rig) = build(vec![(StreamId::Color, vec![rgb()])]);
        rig.toggles.set(SaveGroup::Color, true);
        rig.sink.fail_next(1);

        let t0 = Instant::now();
        assert!(acq.tick(t0).batch.is_none());
        let report = acq.tick(t0 + Duration::from_millis(500));
        assert!(report.batch.unwrap().failure.is_some());
        assert!(!rig.toggles.snapshot().any());
        let status = rig.status.current(Instant::now()).unwrap();
        assert!(status.text().starts_with("Save error: "));
        assert_eq!(acq.summary().save_failures, 1);
    }

    #[test]
    fn runner_stops_on_signal_and_closes_sources() {
        let (acq, rig) = build(vec![(StreamId::Color, vec![rgb()])]);
        let handle = spawn(acq, Duration::from_millis(5)).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        handle.signal_stop();

        let summary = handle.wait(Duration::from_secs(2)).unwrap();
        assert!(summary.ticks >= 1);
        assert_eq!(summary.frames(StreamId::Color), 1);
        assert!(rig.closed.load(Ordering::SeqCst));
    }
}
