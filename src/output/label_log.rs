use super::DisplaySink;
use crate::frame::ProcessedFrame;
use crate::stage::StageHandle;
use anyhow::Result;

/// Headless sink: logs whenever the shown label or stage changes
#[derive(Debug, Default)]
pub struct LabelLog {
    last: Option<(Option<StageHandle>, Option<String>)>,
    shown: u64,
}

impl LabelLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames passed to `show` so far.
    pub fn shown(&self) -> u64 {
        self.shown
    }
}

impl DisplaySink for LabelLog {
    fn show(&mut self, frame: &ProcessedFrame) -> Result<()> {
        self.shown += 1;

        let text = frame.annotation().map(|a| a.display_text());
        let current = (frame.stage(), text);
        if self.last.as_ref() != Some(&current) {
            match &current.1 {
                Some(text) => tracing::info!("frame {}: {}", frame.sequence(), text),
                None => tracing::info!("frame {}: no annotation", frame.sequence()),
            }
            self.last = Some(current);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Annotation, Frame, PixelFormat, RawFrame};
    use std::time::Instant;

    #[test]
    fn test_counts_frames() {
        let mut log = LabelLog::new();
        for seq in 0..3 {
            let raw = RawFrame::new(vec![0; 3], 1, 1, PixelFormat::Rgb8);
            let frame = ProcessedFrame::annotated(
                Frame::new(raw, seq, Instant::now()),
                Annotation::new(0, 1.0).with_label("A"),
            );
            log.show(&frame).unwrap();
        }
        assert_eq!(log.shown(), 3);
    }
}
