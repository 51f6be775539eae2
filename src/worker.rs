//! Capture worker - owns the source, runs the active stage, publishes results.
//!
//! The worker runs on its own thread and loops:
//! 1. Check the stop flag
//! 2. Read a frame from the source (backing off on failure)
//! 3. Load the active stage handle and apply that stage
//! 4. Publish the result to the [`FrameSlot`]
//!
//! On exit it closes the source exactly once, then closes the slot so no
//! consumer keeps waiting.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::capture::{CaptureSource, SourceOpener};
use crate::config::{BackoffConfig, EndOfStreamPolicy, PipelineConfig, SourceConfig};
use crate::error::{CaptureError, PipelineError};
use crate::frame::{Frame, ProcessedFrame};
use crate::slot::FrameSlot;
use crate::stage::{StageHandle, StageRegistry, StageSelector};

/// Longest single sleep while backing off, so stop requests are seen quickly.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Consecutive read failures between repeated warnings.
const FAILURE_LOG_EVERY: u32 = 50;

/// Lifecycle of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Constructed, source not opened yet.
    Created,
    /// Capture loop is running.
    Running,
    /// Stop requested; the loop finishes its current iteration.
    Stopping,
    /// Loop exited and the source is released. Terminal.
    Stopped,
}

impl PipelineState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Running => 1,
            Self::Stopping => 2,
            Self::Stopped => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Counters describing a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames successfully read from the source.
    pub frames_captured: u64,
    /// Frames published to the slot.
    pub frames_published: u64,
    /// Failed reads (absorbed by the worker).
    pub read_failures: u64,
    /// Frames whose stage returned an error or panicked.
    pub stage_failures: u64,
}

/// State shared between the controller and the worker thread.
pub(crate) struct WorkerShared {
    state: AtomicU8,
    stop_requested: AtomicBool,
    frames_captured: AtomicU64,
    frames_published: AtomicU64,
    read_failures: AtomicU64,
    stage_failures: AtomicU64,
}

impl WorkerShared {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PipelineState::Created.as_u8()),
            stop_requested: AtomicBool::new(false),
            frames_captured: AtomicU64::new(0),
            frames_published: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
            stage_failures: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: PipelineState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Moves Created to Running. Fails if a stop got there first.
    pub fn mark_running(&self) -> bool {
        self.state
            .compare_exchange(
                PipelineState::Created.as_u8(),
                PipelineState::Running.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Asks the loop to exit. Moves Running to Stopping.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        let _ = self.state.compare_exchange(
            PipelineState::Running.as_u8(),
            PipelineState::Stopping.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            frames_captured: self.frames_captured.load(Ordering::SeqCst),
            frames_published: self.frames_published.load(Ordering::SeqCst),
            read_failures: self.read_failures.load(Ordering::SeqCst),
            stage_failures: self.stage_failures.load(Ordering::SeqCst),
        }
    }
}

/// Everything the worker thread needs besides the source.
pub(crate) struct WorkerParts {
    pub registry: StageRegistry,
    pub selector: StageSelector,
    pub slot: Arc<FrameSlot>,
    pub shared: Arc<WorkerShared>,
}

/// Running totals for the periodic timing log.
#[derive(Default)]
struct Timings {
    frames: u64,
    read: Duration,
    stage: Duration,
}

struct CaptureWorker {
    source: Box<dyn CaptureSource>,
    parts: WorkerParts,
    backoff: BackoffConfig,
    end_of_stream: EndOfStreamPolicy,
    stats_interval: u64,
    active: StageHandle,
    consecutive_failures: u32,
    timings: Timings,
}

impl CaptureWorker {
    fn run(mut self) -> StageRegistry {
        tracing::info!(
            "Capture worker started on {} with stage {} ({})",
            self.source.describe(),
            self.active,
            self.stage_name(self.active)
        );

        while !self.parts.shared.stop_requested() {
            if !self.cycle() {
                break;
            }
        }

        // Release the source before anyone can observe Stopped
        self.source.close();
        self.parts.shared.set_state(PipelineState::Stopped);
        self.parts.slot.close();

        let stats = self.parts.shared.stats();
        tracing::info!(
            "Capture worker stopped: {} captured, {} published, {} read failures, {} stage failures",
            stats.frames_captured,
            stats.frames_published,
            stats.read_failures,
            stats.stage_failures
        );

        self.parts.registry
    }

    /// One capture cycle. Returns `false` when the loop should end.
    fn cycle(&mut self) -> bool {
        let read_start = Instant::now();
        let raw = match self.source.read_frame() {
            Ok(raw) => raw,
            Err(CaptureError::EndOfStream)
                if self.end_of_stream == EndOfStreamPolicy::Stop =>
            {
                tracing::info!("Source reached end of stream, stopping");
                return false;
            }
            Err(CaptureError::Closed) => {
                tracing::warn!("Source closed underneath the worker, stopping");
                return false;
            }
            Err(err) => {
                self.on_read_failure(err);
                return true;
            }
        };
        let read_time = read_start.elapsed();

        if self.consecutive_failures > 0 {
            tracing::info!(
                "Source recovered after {} failed reads",
                self.consecutive_failures
            );
            self.consecutive_failures = 0;
        }

        let sequence = self
            .parts
            .shared
            .frames_captured
            .fetch_add(1, Ordering::SeqCst);
        let frame = Frame::new(raw, sequence, Instant::now());

        // Selection made before this load applies to this frame
        let handle = self.parts.selector.current();
        if handle != self.active {
            self.switch_stage(handle);
        }

        let stage_start = Instant::now();
        let processed = self.apply_stage(handle, &frame);
        let stage_time = stage_start.elapsed();

        self.parts.slot.publish(processed);
        let published = self
            .parts
            .shared
            .frames_published
            .fetch_add(1, Ordering::SeqCst)
            + 1;

        self.record_timing(read_time, stage_time, published);
        true
    }

    fn apply_stage(&mut self, handle: StageHandle, frame: &Frame) -> ProcessedFrame {
        let result = match self.parts.registry.get_mut(handle) {
            Some(stage) => catch_unwind(AssertUnwindSafe(|| stage.apply(frame)))
                .unwrap_or_else(|_| Err(anyhow::anyhow!("stage panicked"))),
            None => Err(anyhow::anyhow!("stage {} not in registry", handle)),
        };

        match result {
            Ok(processed) => processed.produced_by(handle),
            Err(err) => {
                let failures = self
                    .parts
                    .shared
                    .stage_failures
                    .fetch_add(1, Ordering::SeqCst)
                    + 1;
                if failures == 1 || failures % u64::from(FAILURE_LOG_EVERY) == 0 {
                    tracing::warn!(
                        "Stage {} failed on frame {} ({} failures so far): {:#}",
                        handle,
                        frame.sequence(),
                        failures,
                        err
                    );
                }
                // Keep the display live with the unannotated frame
                ProcessedFrame::new(frame.clone()).produced_by(handle)
            }
        }
    }

    fn switch_stage(&mut self, handle: StageHandle) {
        tracing::info!(
            "Switching stage {} ({}) -> {} ({})",
            self.active,
            self.stage_name(self.active),
            handle,
            self.stage_name(handle)
        );
        self.active = handle;
    }

    fn stage_name(&self, handle: StageHandle) -> &str {
        self.parts.registry.name(handle).unwrap_or("?")
    }

    fn on_read_failure(&mut self, err: CaptureError) {
        self.parts
            .shared
            .read_failures
            .fetch_add(1, Ordering::SeqCst);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        let delay = self.backoff.delay_for(self.consecutive_failures);
        if self.consecutive_failures == 1 || self.consecutive_failures % FAILURE_LOG_EVERY == 0 {
            tracing::warn!(
                "Frame read failed ({} in a row), retrying in {:?}: {}",
                self.consecutive_failures,
                delay,
                err
            );
        } else {
            tracing::debug!("Frame read failed: {}", err);
        }

        self.sleep_unless_stopped(delay);
    }

    fn sleep_unless_stopped(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            if self.parts.shared.stop_requested() {
                return;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            thread::sleep(remaining.min(STOP_POLL_INTERVAL));
        }
    }

    fn record_timing(&mut self, read: Duration, stage: Duration, published: u64) {
        self.timings.frames += 1;
        self.timings.read += read;
        self.timings.stage += stage;

        if self.stats_interval == 0 || published % self.stats_interval != 0 {
            return;
        }

        let frames = self.timings.frames as f64;
        let avg_read_ms = self.timings.read.as_secs_f64() * 1000.0 / frames;
        let avg_stage_ms = self.timings.stage.as_secs_f64() * 1000.0 / frames;
        let total_ms = avg_read_ms + avg_stage_ms;
        let fps = if total_ms > 0.0 { 1000.0 / total_ms } else { 0.0 };
        tracing::info!(
            "Frame {}: read={:.1}ms, stage={:.1}ms, total={:.1}ms, fps={:.1}",
            published,
            avg_read_ms,
            avg_stage_ms,
            total_ms,
            fps
        );
        self.timings = Timings::default();
    }
}

/// Result of a start attempt, as seen by the controller.
pub(crate) enum SpawnOutcome {
    /// Source opened; the worker is running.
    Running(JoinHandle<StageRegistry>),
    /// Source failed to open; the registry comes back unused.
    OpenFailed(CaptureError, Option<StageRegistry>),
}

/// Spawns the capture thread, which opens the source and then loops.
///
/// Blocks until the source has opened or failed, so start-up errors are
/// reported synchronously.
pub(crate) fn spawn_capture_worker(
    opener: Arc<dyn SourceOpener>,
    config: &PipelineConfig,
    parts: WorkerParts,
) -> Result<SpawnOutcome, PipelineError> {
    let (init_tx, init_rx) = crossbeam_channel::bounded::<Result<(), CaptureError>>(1);
    let source_config: SourceConfig = config.source.clone();
    let backoff = config.backoff.clone();
    let end_of_stream = config.end_of_stream;
    let stats_interval = config.stats_interval;

    let handle = thread::Builder::new()
        .name("capture-worker".into())
        .spawn(move || {
            let mut source = match opener.open(&source_config) {
                Ok(source) => source,
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return parts.registry;
                }
            };

            if parts.shared.stop_requested() || !parts.shared.mark_running() {
                tracing::info!("Stop requested during open, releasing {}", source.describe());
                source.close();
                parts.shared.set_state(PipelineState::Stopped);
                parts.slot.close();
                let _ = init_tx.send(Ok(()));
                return parts.registry;
            }

            let active = parts.selector.current();
            let _ = init_tx.send(Ok(()));

            CaptureWorker {
                source,
                parts,
                backoff,
                end_of_stream,
                stats_interval,
                active,
                consecutive_failures: 0,
                timings: Timings::default(),
            }
            .run()
        })?;

    let opened = init_rx
        .recv()
        .unwrap_or_else(|_| Err(CaptureError::open(&config.source.uri, "capture worker exited")));

    match opened {
        Ok(()) => Ok(SpawnOutcome::Running(handle)),
        Err(err) => {
            let registry = handle.join().ok();
            Ok(SpawnOutcome::OpenFailed(err, registry))
        }
    }
}
