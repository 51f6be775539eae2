//! Pipeline controller - the public face of the capture pipeline.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::capture::SourceOpener;
use crate::config::PipelineConfig;
use crate::error::{InvalidStage, PipelineError};
use crate::frame::ProcessedFrame;
use crate::slot::FrameSlot;
use crate::stage::{StageHandle, StageRegistry, StageSelector};
use crate::worker::{
    spawn_capture_worker, PipelineState, PipelineStats, SpawnOutcome, WorkerParts, WorkerShared,
};

enum Lifecycle {
    /// Not started; holds the stages until the worker takes them.
    Idle(StageRegistry),
    /// `start()` is waiting for the source to open, without holding the lock.
    Starting,
    /// Worker thread running (or finished on its own, not yet joined).
    Running(JoinHandle<StageRegistry>),
    /// Stopped, or the stages were lost to a failed spawn.
    Finished,
}

/// Handle to a capture pipeline.
///
/// Owns the capture worker and exposes the latest processed frame. All
/// methods take `&self`, so the controller can be shared between a UI
/// thread and other control code behind an `Arc`.
///
/// # Lifecycle
///
/// 1. [`new()`](Self::new) - stages are already loaded, nothing is opened
/// 2. [`start()`](Self::start) - opens the source on the worker thread
/// 3. [`select_stage()`](Self::select_stage) - any time, takes effect next frame
/// 4. [`stop()`](Self::stop) - joins the worker; the source is released on return
///
/// A stopped pipeline cannot be restarted; build a new one. Dropping the
/// controller stops it.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use framegate::{PipelineConfig, PipelineController, StageHandle, StageRegistry, UriOpener};
/// use framegate::stage::{FixedLabel, Passthrough};
///
/// let registry = StageRegistry::new(vec![
///     Box::new(Passthrough::new()),
///     Box::new(FixedLabel::new("demo", "demo")),
/// ])?;
/// let pipeline = PipelineController::new(
///     UriOpener,
///     registry,
///     PipelineConfig::new("rtsp://192.168.1.64/stream"),
/// )?;
///
/// pipeline.start()?;
/// if let Some(frame) = pipeline.wait_for_frame(None, Duration::from_secs(5)) {
///     println!("frame {} ready", frame.sequence());
/// }
/// pipeline.select_stage(StageHandle::new(1))?;
/// pipeline.stop();
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct PipelineController {
    config: PipelineConfig,
    opener: Arc<dyn SourceOpener>,
    selector: StageSelector,
    stage_names: Vec<String>,
    slot: Arc<FrameSlot>,
    shared: Arc<WorkerShared>,
    lifecycle: Mutex<Lifecycle>,
}

impl PipelineController {
    /// Builds a pipeline around pre-loaded stages. Does not touch the source.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStage`] if `config.initial_stage` is outside the registry.
    pub fn new(
        opener: impl SourceOpener + 'static,
        registry: StageRegistry,
        config: PipelineConfig,
    ) -> Result<Self, InvalidStage> {
        let selector = StageSelector::new(registry.len(), config.initial_stage)?;
        let stage_names = registry.names();

        Ok(Self {
            config,
            opener: Arc::new(opener),
            selector,
            stage_names,
            slot: Arc::new(FrameSlot::new()),
            shared: Arc::new(WorkerShared::new()),
            lifecycle: Mutex::new(Lifecycle::Idle(registry)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens the source and starts the capture worker.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::SourceUnavailable`] if the source fails to open.
    ///   The pipeline stays in `Created` and `start()` may be retried.
    /// - [`PipelineError::AlreadyStarted`] if the pipeline already ran or is
    ///   starting on another thread.
    /// - [`PipelineError::StartCancelled`] if [`stop()`](Self::stop) was
    ///   called while the source was opening. The source is closed again
    ///   before this returns.
    /// - [`PipelineError::Spawn`] if the worker thread could not be created.
    pub fn start(&self) -> Result<(), PipelineError> {
        let registry = {
            let mut lifecycle = self.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Starting) {
                Lifecycle::Idle(registry) => registry,
                other => {
                    *lifecycle = other;
                    return Err(PipelineError::AlreadyStarted);
                }
            }
        };

        tracing::info!("Starting pipeline on {}", self.config.source.uri);

        let parts = WorkerParts {
            registry,
            selector: self.selector.clone(),
            slot: self.slot.clone(),
            shared: self.shared.clone(),
        };

        // Opening may block for a long time; stop() can run meanwhile
        let outcome = spawn_capture_worker(self.opener.clone(), &self.config, parts);

        let mut lifecycle = self.lock();
        let cancelled = !matches!(*lifecycle, Lifecycle::Starting);

        match outcome {
            Ok(SpawnOutcome::Running(handle)) if !cancelled => {
                *lifecycle = Lifecycle::Running(handle);
                Ok(())
            }
            Ok(SpawnOutcome::Running(handle)) => {
                *lifecycle = Lifecycle::Finished;
                drop(lifecycle);
                tracing::info!("Stopped while opening {}", self.config.source.uri);
                if handle.join().is_err() {
                    tracing::error!("Capture worker panicked");
                }
                self.finish();
                Err(PipelineError::StartCancelled)
            }
            Ok(SpawnOutcome::OpenFailed(err, registry)) => {
                tracing::warn!("Failed to open {}: {}", self.config.source.uri, err);
                match registry {
                    Some(registry) if !cancelled => *lifecycle = Lifecycle::Idle(registry),
                    _ => {
                        *lifecycle = Lifecycle::Finished;
                        drop(lifecycle);
                        self.finish();
                    }
                }
                Err(PipelineError::SourceUnavailable {
                    uri: self.config.source.uri.clone(),
                    source: err,
                })
            }
            Err(err) => {
                *lifecycle = Lifecycle::Finished;
                drop(lifecycle);
                self.finish();
                Err(err)
            }
        }
    }

    /// Makes `handle` the active stage for the next captured frame.
    ///
    /// Frames already published keep the stage they were processed with.
    pub fn select_stage(&self, handle: StageHandle) -> Result<(), InvalidStage> {
        self.selector.select(handle).map_err(|err| {
            tracing::warn!("Rejected stage selection: {}", err);
            err
        })?;
        tracing::debug!("Selected stage {}", handle);
        Ok(())
    }

    /// Stops the worker and waits for it to release the source.
    ///
    /// Safe to call from any thread and any number of times; only the first
    /// call does anything. Calling it on a never-started pipeline moves it
    /// straight to `Stopped`.
    ///
    /// If another thread is still inside [`start()`](Self::start) waiting
    /// for the source to open, this returns at once. That `start()` call
    /// releases the source as soon as the open completes and returns
    /// [`PipelineError::StartCancelled`].
    pub fn stop(&self) {
        self.shared.request_stop();

        let mut lifecycle = self.lock();
        match std::mem::replace(&mut *lifecycle, Lifecycle::Finished) {
            Lifecycle::Finished => return,
            Lifecycle::Starting => {
                tracing::info!("Stop requested while the source is opening");
                self.shared.set_state(PipelineState::Stopping);
                return;
            }
            Lifecycle::Idle(_) => tracing::info!("Stopping pipeline"),
            Lifecycle::Running(handle) => {
                tracing::info!("Stopping pipeline");
                // Held across the join so a concurrent stop() also waits
                if handle.join().is_err() {
                    tracing::error!("Capture worker panicked");
                }
            }
        }

        self.finish();
        drop(lifecycle);
        tracing::info!("Pipeline stopped");
    }

    fn finish(&self) {
        self.shared.set_state(PipelineState::Stopped);
        self.slot.close();
    }

    /// Most recent processed frame, or `None` before the first one.
    pub fn latest_frame(&self) -> Option<ProcessedFrame> {
        self.slot.latest()
    }

    /// Waits for a frame newer than sequence `after`.
    ///
    /// Returns `None` on timeout, or once the pipeline has stopped and no
    /// newer frame exists.
    pub fn wait_for_frame(&self, after: Option<u64>, timeout: Duration) -> Option<ProcessedFrame> {
        self.slot.wait_newer(after, timeout)
    }

    pub fn active_stage(&self) -> StageHandle {
        self.selector.current()
    }

    /// Stage names, indexed by handle.
    pub fn stage_names(&self) -> &[String] {
        &self.stage_names
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    pub fn stats(&self) -> PipelineStats {
        self.shared.stats()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.stop();
    }
}
