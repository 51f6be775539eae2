use super::DisplaySink;
use crate::frame::ProcessedFrame;
use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Feeds processed frames to a v4l2loopback device as packed YUYV, so any
/// V4L2 viewer can watch the pipeline output.
pub struct LoopbackDisplay {
    path: PathBuf,
    file: File,
    width: u32,
    height: u32,
    packed: Vec<u8>,
}

impl LoopbackDisplay {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref().to_path_buf();
        tracing::info!("Opening loopback output {} ({}x{})", path.display(), width, height);

        let file = File::options()
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        Ok(Self {
            path,
            file,
            width,
            height,
            packed: Vec::with_capacity((width * height * 2) as usize),
        })
    }

    fn fit(&self, image: RgbImage) -> RgbImage {
        if image.dimensions() == (self.width, self.height) {
            image
        } else {
            imageops::resize(&image, self.width, self.height, FilterType::Triangle)
        }
    }
}

/// Packs RGB rows into YUYV (Y0 U Y1 V). Chroma is shared by each pixel
/// pair; an odd trailing pixel is paired with itself.
fn pack_yuyv(image: &RgbImage, out: &mut Vec<u8>) {
    let width = image.width() as usize;
    out.clear();
    if width == 0 {
        return;
    }

    for row in image.as_raw().chunks_exact(width * 3) {
        for pair in row.chunks(6) {
            let (y0, u0, v0) = yuv(&pair[..3]);
            let (y1, u1, v1) = if pair.len() == 6 { yuv(&pair[3..]) } else { (y0, u0, v0) };
            out.extend_from_slice(&[y0, avg(u0, u1), y1, avg(v0, v1)]);
        }
    }
}

/// Full-range BT.601 in 8.8 fixed point.
fn yuv(rgb: &[u8]) -> (u8, u8, u8) {
    let (r, g, b) = (i32::from(rgb[0]), i32::from(rgb[1]), i32::from(rgb[2]));
    let y = (77 * r + 150 * g + 29 * b) >> 8;
    let u = ((-43 * r - 85 * g + 128 * b) >> 8) + 128;
    let v = ((128 * r - 107 * g - 21 * b) >> 8) + 128;
    (clamp(y), clamp(u), clamp(v))
}

fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

fn avg(a: u8, b: u8) -> u8 {
    ((u16::from(a) + u16::from(b)) / 2) as u8
}

impl DisplaySink for LoopbackDisplay {
    fn show(&mut self, frame: &ProcessedFrame) -> Result<()> {
        let image = frame
            .frame()
            .to_rgb_image()
            .ok_or_else(|| anyhow!("frame {} has a truncated buffer", frame.sequence()))?;
        let image = self.fit(image);

        pack_yuyv(&image, &mut self.packed);
        self.file
            .write_all(&self.packed)
            .with_context(|| format!("Failed to write frame to {}", self.path.display()))
    }

    fn resolution(&self) -> Option<(u32, u32)> {
        Some((self.width, self.height))
    }
}
