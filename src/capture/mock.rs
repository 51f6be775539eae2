//! In-memory sources for testing and demos without camera hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::CaptureSource;
use crate::error::CaptureError;
use crate::frame::{PixelFormat, RawFrame};

/// Shared counters for observing a source from another thread.
#[derive(Debug, Clone, Default)]
pub struct SourceProbe {
    reads: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl SourceProbe {
    /// Total `read_frame` calls, successful or not.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Times `close()` released the source.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closes() > 0
    }
}

/// Generates a moving gradient, optionally paced to a frame interval.
///
/// Each frame's first byte carries the low 8 bits of its index.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    interval: Option<Duration>,
    produced: u64,
    probe: SourceProbe,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            interval: None,
            produced: 0,
            probe: SourceProbe::default(),
        }
    }

    /// Sleep `interval` before every frame, like a camera at a fixed rate.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn probe(&self) -> SourceProbe {
        self.probe.clone()
    }
}

impl CaptureSource for SyntheticSource {
    fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        if self.probe.is_closed() {
            return Err(CaptureError::Closed);
        }
        if let Some(interval) = self.interval {
            thread::sleep(interval);
        }

        let shift = self.produced as u32;
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..self.height {
            for x in 0..self.width {
                data.push((x.wrapping_add(shift) & 0xff) as u8);
                data.push((y & 0xff) as u8);
                data.push(((x ^ y).wrapping_add(shift) & 0xff) as u8);
            }
        }
        if let Some(first) = data.first_mut() {
            *first = (self.produced & 0xff) as u8;
        }
        self.produced += 1;

        Ok(RawFrame::new(data, self.width, self.height, PixelFormat::Rgb8))
    }

    fn close(&mut self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn describe(&self) -> String {
        format!("synthetic {}x{}", self.width, self.height)
    }
}

/// One scripted outcome of `read_frame`.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Frame,
    Fail,
    EndOfStream,
}

/// Replays a fixed list of read outcomes, then a configurable fallback.
///
/// Frames are 1x1 RGB pixels. Once the script runs out, reads keep
/// returning the fallback step.
pub struct ScriptedSource {
    steps: VecDeque<ScriptStep>,
    fallback: ScriptStep,
    probe: SourceProbe,
}

impl ScriptedSource {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            fallback: ScriptStep::Fail,
            probe: SourceProbe::default(),
        }
    }

    /// `failures` failed reads followed by frames forever.
    pub fn failing_then_frames(failures: usize) -> Self {
        Self::new(std::iter::repeat(ScriptStep::Fail).take(failures)).then(ScriptStep::Frame)
    }

    /// Step returned after the script is exhausted. Default: `Fail`.
    pub fn then(mut self, fallback: ScriptStep) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn probe(&self) -> SourceProbe {
        self.probe.clone()
    }
}

impl CaptureSource for ScriptedSource {
    fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        if self.probe.is_closed() {
            return Err(CaptureError::Closed);
        }

        let step = self.steps.pop_front().unwrap_or_else(|| self.fallback.clone());
        match step {
            ScriptStep::Frame => Ok(RawFrame::new(vec![0, 0, 0], 1, 1, PixelFormat::Rgb8)),
            ScriptStep::Fail => {
                self.probe.failures.fetch_add(1, Ordering::SeqCst);
                Err(CaptureError::read_failed("scripted failure"))
            }
            ScriptStep::EndOfStream => Err(CaptureError::EndOfStream),
        }
    }

    fn close(&mut self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn resolution(&self) -> (u32, u32) {
        (1, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_frames_carry_index() {
        let mut source = SyntheticSource::new(4, 4);
        for i in 0..3u8 {
            let frame = source.read_frame().unwrap();
            assert_eq!(frame.data[0], i);
            assert_eq!(frame.data.len(), 48);
        }
        assert_eq!(source.probe().reads(), 3);
    }

    #[test]
    fn test_scripted_sequence_then_fallback() {
        let mut source = ScriptedSource::new([ScriptStep::Fail, ScriptStep::Frame])
            .then(ScriptStep::EndOfStream);
        assert!(matches!(source.read_frame(), Err(CaptureError::ReadFailed(_))));
        assert!(source.read_frame().is_ok());
        assert_eq!(source.read_frame().unwrap_err(), CaptureError::EndOfStream);
        assert_eq!(source.read_frame().unwrap_err(), CaptureError::EndOfStream);
        assert_eq!(source.probe().failures(), 1);
    }

    #[test]
    fn test_reads_after_close_fail() {
        let mut source = ScriptedSource::failing_then_frames(0);
        let probe = source.probe();
        source.close();
        assert_eq!(source.read_frame().unwrap_err(), CaptureError::Closed);
        assert_eq!(probe.closes(), 1);
    }
}
