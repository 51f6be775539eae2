//! Frame types flowing through the pipeline.

use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;

use crate::stage::StageHandle;

/// Pixel layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Interleaved 8-bit red, green, blue.
    Rgb8,
    /// Interleaved 8-bit blue, green, red.
    Bgr8,
}

impl PixelFormat {
    /// Bytes per pixel.
    pub fn channels(self) -> usize {
        3
    }
}

/// A decoded image as handed over by a source, before the pipeline stamps it.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl RawFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
        }
    }

    /// Wraps an RGB image.
    pub fn from_rgb(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, PixelFormat::Rgb8)
    }
}

/// One captured image, immutable once produced.
///
/// Pixels live behind an `Arc`, so clones share the buffer and nothing can
/// write to it after capture.
#[derive(Debug, Clone)]
pub struct Frame {
    pixels: Arc<[u8]>,
    width: u32,
    height: u32,
    format: PixelFormat,
    sequence: u64,
    captured_at: Instant,
}

impl Frame {
    /// Stamps a raw frame with its capture sequence number.
    pub fn new(raw: RawFrame, sequence: u64, captured_at: Instant) -> Self {
        Self {
            pixels: raw.data.into(),
            width: raw.width,
            height: raw.height,
            format: raw.format,
            sequence,
            captured_at,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Monotonic capture index, starting at 0 for each pipeline.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Copies the frame into an RGB image, swapping channels for BGR input.
    ///
    /// Returns `None` if the buffer is shorter than the dimensions claim.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        let expected = self.width as usize * self.height as usize * self.format.channels();
        if self.pixels.len() < expected {
            return None;
        }
        let data = &self.pixels[..expected];

        let rgb = match self.format {
            PixelFormat::Rgb8 => data.to_vec(),
            PixelFormat::Bgr8 => data
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
        };
        RgbImage::from_raw(self.width, self.height, rgb)
    }
}

/// Result of running a stage on a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Winning class index.
    pub class_index: usize,
    /// Human-readable label for the class, when one is known.
    pub label: Option<String>,
    /// Score of the winning class in `[0, 1]`.
    pub confidence: f32,
}

impl Annotation {
    pub fn new(class_index: usize, confidence: f32) -> Self {
        Self {
            class_index,
            label: None,
            confidence,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Text suitable for an overlay or a log line.
    pub fn display_text(&self) -> String {
        match &self.label {
            Some(label) => format!("{} ({:.1}%)", label, self.confidence * 100.0),
            None => format!("Predicted class: {}", self.class_index),
        }
    }
}

/// A frame after passing through the active stage.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    frame: Frame,
    annotation: Option<Annotation>,
    stage: Option<StageHandle>,
}

impl ProcessedFrame {
    /// Wraps a frame with no annotation.
    pub fn new(frame: Frame) -> Self {
        Self {
            frame,
            annotation: None,
            stage: None,
        }
    }

    pub fn annotated(frame: Frame, annotation: Annotation) -> Self {
        Self {
            frame,
            annotation: Some(annotation),
            stage: None,
        }
    }

    /// Records which stage produced this result.
    pub(crate) fn produced_by(mut self, stage: StageHandle) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn annotation(&self) -> Option<&Annotation> {
        self.annotation.as_ref()
    }

    /// Label of the annotation, if any.
    pub fn label(&self) -> Option<&str> {
        self.annotation.as_ref().and_then(|a| a.label.as_deref())
    }

    /// Stage that was active when this frame was processed.
    pub fn stage(&self) -> Option<StageHandle> {
        self.stage
    }

    pub fn sequence(&self) -> u64 {
        self.frame.sequence()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bgr_frame() -> Frame {
        // 2x1: one pure blue pixel, one pure red pixel (BGR order)
        let raw = RawFrame::new(vec![255, 0, 0, 0, 0, 255], 2, 1, PixelFormat::Bgr8);
        Frame::new(raw, 7, Instant::now())
    }

    #[test]
    fn test_bgr_to_rgb_swaps_channels() {
        let rgb = bgr_frame().to_rgb_image().unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 0, 255]);
        assert_eq!(rgb.get_pixel(1, 0).0, [255, 0, 0]);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let raw = RawFrame::new(vec![0; 5], 2, 1, PixelFormat::Rgb8);
        let frame = Frame::new(raw, 0, Instant::now());
        assert!(frame.to_rgb_image().is_none());
    }

    #[test]
    fn test_clone_shares_pixels() {
        let frame = bgr_frame();
        let copy = frame.clone();
        assert_eq!(frame.pixels().as_ptr(), copy.pixels().as_ptr());
        assert_eq!(copy.sequence(), 7);
    }

    #[test]
    fn test_annotation_display() {
        let plain = Annotation::new(3, 0.5);
        assert_eq!(plain.display_text(), "Predicted class: 3");
        let labelled = Annotation::new(3, 0.5).with_label("cat");
        assert_eq!(labelled.display_text(), "cat (50.0%)");
    }

    #[test]
    fn test_processed_frame_accessors() {
        let processed = ProcessedFrame::annotated(bgr_frame(), Annotation::new(1, 0.9).with_label("A"))
            .produced_by(StageHandle::new(1));
        assert_eq!(processed.label(), Some("A"));
        assert_eq!(processed.stage(), Some(StageHandle::new(1)));
        assert_eq!(processed.sequence(), 7);
    }
}
