use anyhow::Result;

use super::Stage;
use crate::frame::{Annotation, Frame, ProcessedFrame};

/// Publishes frames unchanged, without an annotation.
#[derive(Debug, Default)]
pub struct Passthrough;

impl Passthrough {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for Passthrough {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn apply(&mut self, frame: &Frame) -> Result<ProcessedFrame> {
        Ok(ProcessedFrame::new(frame.clone()))
    }
}

/// Annotates every frame with the same label at full confidence.
///
/// Handy for wiring checks and demos where no model is available.
#[derive(Debug, Clone)]
pub struct FixedLabel {
    name: String,
    label: String,
    class_index: usize,
}

impl FixedLabel {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            class_index: 0,
        }
    }

    pub fn with_class_index(mut self, class_index: usize) -> Self {
        self.class_index = class_index;
        self
    }
}

impl Stage for FixedLabel {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, frame: &Frame) -> Result<ProcessedFrame> {
        let annotation = Annotation::new(self.class_index, 1.0).with_label(self.label.clone());
        Ok(ProcessedFrame::annotated(frame.clone(), annotation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{PixelFormat, RawFrame};
    use std::time::Instant;

    fn frame() -> Frame {
        Frame::new(
            RawFrame::new(vec![1, 2, 3], 1, 1, PixelFormat::Rgb8),
            0,
            Instant::now(),
        )
    }

    #[test]
    fn test_passthrough_has_no_annotation() {
        let out = Passthrough::new().apply(&frame()).unwrap();
        assert!(out.annotation().is_none());
        assert_eq!(out.frame().pixels(), &[1, 2, 3]);
    }

    #[test]
    fn test_fixed_label_leaves_input_untouched() {
        let input = frame();
        let out = FixedLabel::new("stub", "A")
            .with_class_index(4)
            .apply(&input)
            .unwrap();
        assert_eq!(out.label(), Some("A"));
        assert_eq!(out.annotation().unwrap().class_index, 4);
        assert_eq!(input.pixels(), &[1, 2, 3]);
    }
}
