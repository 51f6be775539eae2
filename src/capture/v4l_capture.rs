use super::CaptureSource;
use crate::config::SourceConfig;
use crate::error::CaptureError;
use crate::frame::RawFrame;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;

/// Frame rate asked for alongside the configured size.
const REQUESTED_FPS: u32 = 30;

/// Camera mode nearest to the configured size. MJPEG is what most USB
/// cameras offer at higher resolutions.
fn requested_format(config: &SourceConfig) -> CameraFormat {
    CameraFormat::new(
        Resolution::new(config.width, config.height),
        FrameFormat::MJPEG,
        REQUESTED_FPS,
    )
}

/// Local camera opened through nokhwa's V4L2 backend
pub struct WebcamCapture {
    camera: Camera,
    width: u32,
    height: u32,
    open: bool,
}

impl WebcamCapture {
    pub fn open(device_index: u32, config: &SourceConfig) -> Result<Self, CaptureError> {
        tracing::info!(
            "Initializing webcam {} (requested {}x{})",
            device_index,
            config.width,
            config.height
        );
        if config.buffer_depth > 0 {
            tracing::warn!(
                "Buffer depth {} ignored: webcam buffering is fixed by the driver",
                config.buffer_depth
            );
        }

        if config.width == 0 || config.height == 0 {
            return Err(CaptureError::open(
                &config.uri,
                format!("invalid frame size {}x{}", config.width, config.height),
            ));
        }

        let index = CameraIndex::Index(device_index);
        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(requested_format(config)));

        let mut camera = Camera::new(index, requested)
            .map_err(|err| CaptureError::open(&config.uri, err))?;

        camera
            .open_stream()
            .map_err(|err| CaptureError::open(&config.uri, err))?;

        let resolution = camera.resolution();
        tracing::info!(
            "Webcam {} streaming at {}x{}",
            camera.info().human_name(),
            resolution.width(),
            resolution.height()
        );
        if (resolution.width(), resolution.height()) != (config.width, config.height) {
            tracing::warn!(
                "Camera has no {}x{} mode, using the closest one",
                config.width,
                config.height
            );
        }

        Ok(Self {
            width: resolution.width(),
            height: resolution.height(),
            camera,
            open: true,
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        if !self.open {
            return Err(CaptureError::Closed);
        }

        let frame = self.camera.frame().map_err(CaptureError::read_failed)?;

        let decoded = frame
            .decode_image::<RgbFormat>()
            .map_err(CaptureError::read_failed)?;

        Ok(RawFrame::from_rgb(decoded))
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Err(err) = self.camera.stop_stream() {
            tracing::warn!("Failed to stop webcam stream: {}", err);
        }
        tracing::info!("Webcam released");
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn describe(&self) -> String {
        format!(
            "{} {}x{}",
            self.camera.info().human_name(),
            self.width,
            self.height
        )
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        self.close();
    }
}
