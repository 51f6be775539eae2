use anyhow::{anyhow, Result};
use image::{imageops, RgbImage};
use ndarray::Array4;

use crate::frame::Frame;

/// ImageNet channel means, the normalization most classifiers are trained with.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Preprocessor for converting frames to classifier input tensors
#[derive(Debug, Clone)]
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Preprocessor {
    /// Creates a preprocessor using ImageNet normalization.
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    pub fn with_normalization(mut self, mean: [f32; 3], std: [f32; 3]) -> Self {
        self.mean = mean;
        self.std = std;
        self
    }

    /// Preprocess a frame into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Convert to RGB (BGR frames are swizzled)
    /// 2. Resize to target dimensions
    /// 3. Scale to [0, 1], then subtract mean and divide by std per channel
    /// 4. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, frame: &Frame) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("preprocess").entered();

        let image = frame.to_rgb_image().ok_or_else(|| {
            anyhow!(
                "frame {} buffer does not match {}x{}",
                frame.sequence(),
                frame.width(),
                frame.height()
            )
        })?;

        Ok(self.preprocess_image(&image))
    }

    /// Same as [`preprocess`](Self::preprocess) for an RGB image.
    pub fn preprocess_image(&self, image: &RgbImage) -> Array4<f32> {
        let resized = if image.dimensions() != (self.target_width, self.target_height) {
            imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            )
        } else {
            image.clone()
        };

        let (width, height) = resized.dimensions();
        Array4::from_shape_fn((1, 3, height as usize, width as usize), |(_, c, y, x)| {
            let value = resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
            (value - self.mean[c]) / self.std[c]
        })
    }
}
