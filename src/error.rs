//! Error types for the capture pipeline.
//!
//! Errors fall into three groups:
//! - **Start-up errors** ([`PipelineError`]): returned from
//!   [`PipelineController::start()`](crate::PipelineController::start)
//! - **Caller errors** ([`InvalidStage`]): returned synchronously from stage selection
//! - **Source errors** ([`CaptureError`]): produced by a [`CaptureSource`](crate::CaptureSource).
//!   Read failures are absorbed by the capture worker and only show up in
//!   [`PipelineStats`](crate::PipelineStats).

/// Errors that prevent a pipeline from starting.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The video source could not be opened.
    #[error("source unavailable: {uri}: {source}")]
    SourceUnavailable {
        /// URI that failed to open.
        uri: String,
        /// What the source reported.
        #[source]
        source: CaptureError,
    },

    /// `start()` was called on a pipeline that already ran.
    #[error("pipeline already started")]
    AlreadyStarted,

    /// `stop()` was called while `start()` was opening the source.
    #[error("pipeline stopped while the source was opening")]
    StartCancelled,

    /// No stages were supplied at construction.
    #[error("stage registry is empty - load at least one stage")]
    EmptyRegistry,

    /// The capture worker thread could not be spawned.
    #[error("failed to spawn capture worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A stage handle outside the registry bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid stage {requested} (registry holds {available} stages)")]
pub struct InvalidStage {
    /// Index the caller asked for.
    pub requested: usize,
    /// Number of stages in the registry.
    pub available: usize,
}

/// Errors reported by a video source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// The source could not be opened.
    #[error("failed to open video source {uri:?}: {reason}")]
    Open {
        /// URI that failed to open.
        uri: String,
        /// Why it failed.
        reason: String,
    },

    /// A single read failed; the next read may succeed.
    #[error("frame read failed: {0}")]
    ReadFailed(String),

    /// The stream ended (file finished, remote hung up).
    #[error("end of stream")]
    EndOfStream,

    /// The source was read after `close()`.
    #[error("source closed")]
    Closed,
}

impl CaptureError {
    /// Creates an open error for the given URI.
    pub fn open(uri: impl Into<String>, reason: impl ToString) -> Self {
        Self::Open {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a read failure with the given reason.
    pub fn read_failed(reason: impl ToString) -> Self {
        Self::ReadFailed(reason.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_stage_display() {
        let err = InvalidStage {
            requested: 5,
            available: 2,
        };
        assert_eq!(err.to_string(), "invalid stage 5 (registry holds 2 stages)");
    }

    #[test]
    fn test_source_unavailable_keeps_cause() {
        let err = PipelineError::SourceUnavailable {
            uri: "rtsp://cam".to_string(),
            source: CaptureError::open("rtsp://cam", "connection refused"),
        };
        assert!(err.to_string().contains("rtsp://cam"));
        let cause = std::error::Error::source(&err).map(|e| e.to_string());
        assert_eq!(
            cause.as_deref(),
            Some("failed to open video source \"rtsp://cam\": connection refused")
        );
    }

    #[test]
    fn test_read_failed_display() {
        let err = CaptureError::read_failed("timeout");
        assert_eq!(err.to_string(), "frame read failed: timeout");
    }
}
