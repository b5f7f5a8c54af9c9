//! Depth Capture Kernel
//!
//! This crate drives a multi-stream depth camera: it acquires colour, depth
//! and two monochrome streams concurrently, keeps the latest frame of each for
//! display, colorizes depth for humans, and periodically saves selected
//! streams to disk under operator control.
//!
//! # Architecture
//!
//! Two execution contexts share state:
//!
//! 1. **Acquisition thread**: one per running session. Each tick polls every
//!    stream, publishes new frames to the cache, colorizes new depth, then
//!    runs the save scheduler.
//! 2. **Operator context**: reads cache snapshots for display and invokes
//!    named actions (start, stop, toggle save, quit) on the session.
//!
//! The frame cache and the save toggles are the only shared state. A
//! generation counter bumped on every stop fences off writes from a loop that
//! outlives its session.
//!
//! # Module Structure
//!
//! - `frame`: stream identifiers and immutable frames
//! - `depth`: percentile stretch + JET palette depth normalizer
//! - `cache`: latest-wins frame cache with generation fencing
//! - `save` / `storage`: continuous save scheduler and persistence sinks
//! - `ingest`: device and data-source contracts, synthetic `stub://` driver
//! - `acquisition`: the per-tick loop and its background runner
//! - `session`: session controller and operator actions
//! - `status`: expiring operator status line
//! - `panel`: button hit-testing and quad-view composition
//! - `config`: JSON file + environment configuration

pub mod acquisition;
pub mod cache;
pub mod config;
pub mod depth;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod panel;
pub mod save;
pub mod session;
pub mod status;
pub mod storage;

pub use acquisition::{AcquisitionLoop, LoopHandle, LoopSummary, TickReport};
pub use cache::{CacheSnapshot, FrameCache, StoreOutcome};
pub use config::CaptureConfig;
pub use depth::{colorize, depth_bounds, DepthBounds, DepthColorView};
pub use error::{CaptureError, CaptureResult, ErrorKind};
pub use frame::{DepthImage, Frame, ImageRef, Pixels, StreamId};
pub use ingest::{
    driver_for, Device, DeviceDriver, FrameSource, PipelineConfig, SourceFrame, SourceImage,
    SyntheticDriver,
};
pub use panel::{action_for_key, compose_panel, hit_test};
pub use save::{SaveGroup, SaveLayout, SaveScheduler, SaveTarget, SaveToggleSet, SaveToggles};
pub use session::{Action, Flow, Session, SessionOptions, SessionState};
pub use status::{Severity, StatusBoard, StatusMessage};
pub use storage::{FrameSink, MemorySink, PngSink};
