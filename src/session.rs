//! Session controller and operator action handlers.
//!
//! The session owns the device and the acquisition thread and is the only
//! place that moves between Idle, Running and Faulted. Each handler issues
//! exactly one status message describing its outcome.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::acquisition::{self, AcquisitionLoop, LoopHandle, LoopSummary, DEFAULT_TICK};
use crate::cache::{CacheSnapshot, FrameCache};
use crate::error::{CaptureError, CaptureResult};
use crate::frame::StreamId;
use crate::ingest::{Device, DeviceDriver, FrameSource, PipelineConfig};
use crate::save::{
    SaveGroup, SaveLayout, SaveScheduler, SaveToggleSet, SaveToggles, DEFAULT_SAVE_INTERVAL,
};
use crate::status::{StatusBoard, StatusMessage, DEFAULT_STATUS_TTL};
use crate::storage::{FrameSink, PngSink};

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Faulted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Faulted => "faulted",
        })
    }
}

/// Named operator actions, however they were triggered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    ToggleSave(SaveGroup),
    Quit,
}

/// Whether the caller should keep servicing input after an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub pipeline: PipelineConfig,
    pub save_root: PathBuf,
    pub tick: Duration,
    pub save_interval: Duration,
    pub stop_grace: Duration,
    pub status_ttl: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            save_root: PathBuf::from("camera_captures"),
            tick: DEFAULT_TICK,
            save_interval: DEFAULT_SAVE_INTERVAL,
            stop_grace: DEFAULT_STOP_GRACE,
            status_ttl: DEFAULT_STATUS_TTL,
        }
    }
}

type SinkFactory = Box<dyn Fn() -> Box<dyn FrameSink> + Send>;

pub struct Session {
    driver: Arc<dyn DeviceDriver>,
    options: SessionOptions,
    sink_factory: SinkFactory,
    cache: Arc<FrameCache>,
    toggles: Arc<SaveToggleSet>,
    status: Arc<StatusBoard>,
    state: SessionState,
    device: Option<Box<dyn Device>>,
    worker: Option<LoopHandle>,
    last_summary: Option<LoopSummary>,
}

impl Session {
    /// Session writing PNG files under `options.save_root`.
    pub fn new(driver: Arc<dyn DeviceDriver>, options: SessionOptions) -> Self {
        let status = Arc::new(StatusBoard::new(options.status_ttl));
        Self {
            driver,
            options,
            sink_factory: Box::new(|| Box::new(PngSink)),
            cache: Arc::new(FrameCache::new()),
            toggles: Arc::new(SaveToggleSet::new()),
            status,
            state: SessionState::Idle,
            device: None,
            worker: None,
            last_summary: None,
        }
    }

    /// Replace the persistence sink used by every later `start`.
    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: FrameSink + Clone + 'static,
    {
        self.sink_factory = Box::new(move || Box::new(sink.clone()));
        self
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Open the device and its four streams, then launch acquisition.
    ///
    /// Already running is a benign no-op. From Faulted the operator must stop
    /// first.
    pub fn start(&mut self) -> CaptureResult<()> {
        match self.state {
            SessionState::Running => {
                self.status.info("Camera already running");
                return Ok(());
            }
            SessionState::Faulted => {
                let err = CaptureError::InvalidActionForState {
                    action: "start",
                    state: self.state,
                };
                self.status.warn("Camera faulted - stop before starting again");
                return Err(err);
            }
            SessionState::Idle => {}
        }

        let mut device = match self.driver.open(&self.options.pipeline) {
            Ok(device) => device,
            Err(err) => return Err(self.fault(err)),
        };

        let mut sources: Vec<(StreamId, Box<dyn FrameSource>)> = Vec::with_capacity(4);
        for stream in StreamId::ALL {
            match device.open_stream(stream) {
                Ok(source) => sources.push((stream, source)),
                Err(err) => {
                    for (_, source) in sources.iter_mut() {
                        source.close();
                    }
                    device.close();
                    return Err(self.fault(err));
                }
            }
        }

        let generation = self.cache.generation();
        let scheduler = SaveScheduler::new(
            SaveLayout::new(&self.options.save_root),
            self.options.save_interval,
            (self.sink_factory)(),
        );
        let acquisition = AcquisitionLoop::new(
            generation,
            sources,
            Arc::clone(&self.cache),
            Arc::clone(&self.toggles),
            Arc::clone(&self.status),
            scheduler,
        );
        let worker = match acquisition::spawn(acquisition, self.options.tick) {
            Ok(worker) => worker,
            Err(err) => {
                device.close();
                return Err(self.fault(CaptureError::Transport(format!(
                    "failed to spawn acquisition thread: {}",
                    err
                ))));
            }
        };

        self.device = Some(device);
        self.worker = Some(worker);
        self.state = SessionState::Running;
        self.status.info("Camera started successfully");
        Ok(())
    }

    /// Stop acquisition and release the device. Always ends Idle.
    ///
    /// Blocks for at most the stop grace period. A loop that outlives it is
    /// detached; its later cache writes are discarded by the generation check.
    pub fn stop(&mut self) -> CaptureResult<()> {
        if self.state == SessionState::Idle {
            self.status.info("Camera not running");
            return Ok(());
        }

        let generation = self.cache.advance_generation();
        self.toggles.disable_all();
        if let Some(worker) = self.worker.take() {
            worker.signal_stop();
            self.last_summary = worker.wait(self.options.stop_grace);
        }
        if let Some(mut device) = self.device.take() {
            device.close();
        }
        log::debug!("session: stopped, generation now {}", generation);

        self.state = SessionState::Idle;
        self.status.info("Camera stopped");
        Ok(())
    }

    /// Flip one save group. Returns the new toggle value.
    pub fn toggle_save(&mut self, group: SaveGroup) -> CaptureResult<bool> {
        if self.state != SessionState::Running {
            self.status.warn("Camera not running - cannot save images");
            return Err(CaptureError::InvalidActionForState {
                action: "toggle save",
                state: self.state,
            });
        }
        let enabled = self.toggles.toggle(group);
        let verb = if enabled { "started" } else { "stopped" };
        self.status.info(format!("{} continuous saving {}", group.label(), verb));
        Ok(enabled)
    }

    /// Route one action. Failures are already reported on the status board.
    pub fn dispatch(&mut self, action: Action) -> Flow {
        let result = match action {
            Action::Start => self.start(),
            Action::Stop => self.stop(),
            Action::ToggleSave(group) => self.toggle_save(group).map(|_| ()),
            Action::Quit => return Flow::Quit,
        };
        if let Err(err) = result {
            log::debug!("session: {:?} not applied: {}", action, err);
        }
        Flow::Continue
    }

    /// Stop if anything is still open. Used on exit.
    pub fn shutdown(&mut self) {
        if self.state != SessionState::Idle {
            let _ = self.stop();
        }
    }

    fn fault(&mut self, err: CaptureError) -> CaptureError {
        self.state = SessionState::Faulted;
        self.status.error(format!("Error: {}", err));
        err
    }

    // ------------------------------------------------------------------------
    // Display surface
    // ------------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        self.cache.snapshot()
    }

    pub fn cache(&self) -> &Arc<FrameCache> {
        &self.cache
    }

    pub fn toggles(&self) -> SaveToggles {
        self.toggles.snapshot()
    }

    pub fn status(&self, now: Instant) -> Option<StatusMessage> {
        self.status.current(now)
    }

    pub fn status_board(&self) -> &Arc<StatusBoard> {
        &self.status
    }

    /// Counters from the most recent loop that exited within its grace period.
    pub fn last_summary(&self) -> Option<&LoopSummary> {
        self.last_summary.as_ref()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
