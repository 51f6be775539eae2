//! Configuration types for the capture pipeline.

use std::time::Duration;

use crate::stage::StageHandle;

/// What the capture worker does when the source reports end of stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndOfStreamPolicy {
    /// Treat it like any other read failure: back off and keep reading.
    ///
    /// Suits live sources that drop and come back. Network streams restart
    /// their decoder while the worker backs off; a finished file keeps
    /// reporting end of stream.
    #[default]
    Retry,

    /// Leave the capture loop, release the source and end in `Stopped`.
    ///
    /// Suits files and finite streams.
    Stop,
}

/// Settings for opening and reading a video source.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Source URI: a camera index, `/dev/videoN`, a stream URL or a file path.
    pub uri: String,

    /// Requested frame width. Network and file sources are scaled to this.
    pub width: u32,

    /// Requested frame height.
    pub height: u32,

    /// Decoded frames the source may hold before the oldest is dropped.
    ///
    /// `0` keeps only the most recently decoded frame: lowest latency, but a
    /// stuttering source shows up directly. Larger values smooth playback
    /// at the cost of lag.
    /// Default: 0
    pub buffer_depth: usize,

    /// How long opening may wait for the first frame.
    /// Default: 10s
    pub open_timeout: Duration,

    /// How long a single read may block before it counts as failed.
    /// Default: 2s
    pub read_timeout: Duration,
}

impl SourceConfig {
    /// Creates a config for `uri` with default settings.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            width: 640,
            height: 480,
            buffer_depth: 0,
            open_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(2),
        }
    }
}

/// Back-off applied between failed reads.
///
/// The delay starts at `initial`, is multiplied by `multiplier` after each
/// consecutive failure and is capped at `max`. A successful read resets it.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    /// Default: 5ms
    pub initial: Duration,

    /// Upper bound on the delay.
    /// Default: 500ms
    pub max: Duration,

    /// Growth factor per consecutive failure.
    /// Default: 2
    pub multiplier: u32,
}

impl BackoffConfig {
    /// Delay to apply after `failures` consecutive failed reads (1-based).
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        let mut delay = self.initial;
        for _ in 1..failures {
            delay = delay.saturating_mul(self.multiplier.max(1));
            if delay >= self.max {
                return self.max;
            }
        }
        delay.min(self.max)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(5),
            max: Duration::from_millis(500),
            multiplier: 2,
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Source to open on `start()`.
    pub source: SourceConfig,

    /// Back-off between failed reads.
    pub backoff: BackoffConfig,

    /// Behavior when the source runs out.
    pub end_of_stream: EndOfStreamPolicy,

    /// Stage active when the pipeline starts.
    pub initial_stage: StageHandle,

    /// Log a timing summary every N published frames. `0` disables it.
    /// Default: 0 (the launcher sets 30)
    pub stats_interval: u64,
}

impl PipelineConfig {
    /// Creates a config reading from `uri` with default settings.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            source: SourceConfig::new(uri),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_config_defaults() {
        let config = SourceConfig::new("rtsp://cam/stream");
        assert_eq!(config.uri, "rtsp://cam/stream");
        assert_eq!(config.buffer_depth, 0);
        assert_eq!((config.width, config.height), (640, 480));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.delay_for(1), Duration::from_millis(5));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(10));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(20));
        assert_eq!(backoff.delay_for(50), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_zero_multiplier_stays_flat() {
        let backoff = BackoffConfig {
            initial: Duration::from_millis(3),
            max: Duration::from_millis(100),
            multiplier: 0,
        };
        assert_eq!(backoff.delay_for(10), Duration::from_millis(3));
    }

    #[test]
    fn test_end_of_stream_default_retries() {
        assert_eq!(EndOfStreamPolicy::default(), EndOfStreamPolicy::Retry);
        assert_eq!(PipelineConfig::default().initial_stage, StageHandle::new(0));
    }
}
