mod label_log;
mod loopback;

pub use label_log::LabelLog;
pub use loopback::LoopbackDisplay;

use anyhow::Result;

use crate::frame::ProcessedFrame;

/// Trait for display surfaces fed from the pipeline's latest frame
pub trait DisplaySink {
    /// Show a processed frame
    fn show(&mut self, frame: &ProcessedFrame) -> Result<()>;

    /// Get the expected output resolution, if the sink has one
    fn resolution(&self) -> Option<(u32, u32)> {
        None
    }
}
