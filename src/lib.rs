//! Latest-frame capture pipeline.
//!
//! A dedicated worker thread pulls frames from a live video source, runs the
//! currently selected processing stage (typically an image classifier) and
//! publishes the result into a single latest-wins slot. Consumers such as a
//! display loop read the newest frame whenever they are ready; the worker
//! never waits for them.
//!
//! ```text
//! source ──read──▶ CaptureWorker ──apply(stage[selector])──▶ FrameSlot ──▶ consumer
//!                        ▲                                                   │
//!                        └──────────── select_stage / stop ◀─────────────────┘
//! ```
//!
//! Stages are loaded up front into a [`StageRegistry`]; switching between
//! them only swaps an index. [`PipelineController::stop`] returns after the
//! source has been released, so the same device can be reopened right away.

pub mod capture;
pub mod config;
pub mod error;
pub mod frame;
pub mod output;
pub mod pipeline;
pub mod slot;
pub mod stage;
mod worker;

pub use capture::{CaptureSource, SourceKind, SourceOpener, UriOpener};
pub use config::{BackoffConfig, EndOfStreamPolicy, PipelineConfig, SourceConfig};
pub use error::{CaptureError, InvalidStage, PipelineError};
pub use frame::{Annotation, Frame, PixelFormat, ProcessedFrame, RawFrame};
pub use pipeline::PipelineController;
pub use slot::{FrameSlot, LatestQueue};
pub use stage::{Stage, StageHandle, StageRegistry, StageSelector};
pub use worker::{PipelineState, PipelineStats};
