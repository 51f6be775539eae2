mod ffmpeg_capture;
pub mod mock;
mod v4l_capture;

pub use ffmpeg_capture::FfmpegCapture;
pub use mock::{ScriptStep, ScriptedSource, SourceProbe, SyntheticSource};
pub use v4l_capture::WebcamCapture;

use crate::config::SourceConfig;
use crate::error::CaptureError;
use crate::frame::RawFrame;

/// Trait for video sources
///
/// A source is opened once, read from a single thread, and closed once.
/// Implementations do not need to be `Send`: the capture worker opens them
/// on its own thread.
pub trait CaptureSource {
    /// Read the next frame
    ///
    /// May block on the source's own I/O. Errors are reported per read; the
    /// caller decides whether to retry.
    fn read_frame(&mut self) -> Result<RawFrame, CaptureError>;

    /// Release the underlying device or stream
    fn close(&mut self);

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);

    /// Human-readable description for logs
    fn describe(&self) -> String {
        let (width, height) = self.resolution();
        format!("{}x{}", width, height)
    }
}

/// Opens sources for a pipeline.
///
/// Called on the capture thread during `start()`. Implemented for closures
/// so tests and embedders can hand in their own sources.
pub trait SourceOpener: Send + Sync {
    fn open(&self, config: &SourceConfig) -> Result<Box<dyn CaptureSource>, CaptureError>;
}

impl<F> SourceOpener for F
where
    F: Fn(&SourceConfig) -> Result<Box<dyn CaptureSource>, CaptureError> + Send + Sync,
{
    fn open(&self, config: &SourceConfig) -> Result<Box<dyn CaptureSource>, CaptureError> {
        self(config)
    }
}

/// Kind of source a URI points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Local camera: a bare index or `/dev/videoN`.
    Device,
    /// Network stream (`rtsp://`, `http://`, `udp://`, ...).
    Network,
    /// Local video file.
    File,
    /// Generated test pattern (`synthetic://`).
    Synthetic,
}

impl SourceKind {
    pub fn from_uri(uri: &str) -> Self {
        if uri.starts_with("synthetic://") {
            SourceKind::Synthetic
        } else if parse_device_index(uri).is_some() {
            SourceKind::Device
        } else if uri.contains("://") {
            SourceKind::Network
        } else {
            SourceKind::File
        }
    }
}

/// Camera index for `"0"` or `"/dev/video0"` style URIs.
pub fn parse_device_index(uri: &str) -> Option<u32> {
    uri.strip_prefix("/dev/video")
        .unwrap_or(uri)
        .parse::<u32>()
        .ok()
}

/// Default opener: picks a source implementation from the URI.
#[derive(Debug, Default, Clone, Copy)]
pub struct UriOpener;

impl SourceOpener for UriOpener {
    fn open(&self, config: &SourceConfig) -> Result<Box<dyn CaptureSource>, CaptureError> {
        let kind = SourceKind::from_uri(&config.uri);
        tracing::debug!("Opening {} as {:?}", config.uri, kind);

        match kind {
            SourceKind::Device => {
                let index = parse_device_index(&config.uri)
                    .ok_or_else(|| CaptureError::open(&config.uri, "not a device index"))?;
                Ok(Box::new(WebcamCapture::open(index, config)?))
            }
            SourceKind::Network => Ok(Box::new(FfmpegCapture::open(config, false)?)),
            SourceKind::File => Ok(Box::new(FfmpegCapture::open(config, true)?)),
            SourceKind::Synthetic => Ok(Box::new(SyntheticSource::new(config.width, config.height))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_from_uri() {
        assert_eq!(SourceKind::from_uri("0"), SourceKind::Device);
        assert_eq!(SourceKind::from_uri("/dev/video2"), SourceKind::Device);
        assert_eq!(
            SourceKind::from_uri("rtsp://admin@192.168.1.64/h264/ch1/main/av_stream"),
            SourceKind::Network
        );
        assert_eq!(SourceKind::from_uri("udp://0.0.0.0:5000"), SourceKind::Network);
        assert_eq!(SourceKind::from_uri("clips/walk.mp4"), SourceKind::File);
        assert_eq!(SourceKind::from_uri("synthetic://"), SourceKind::Synthetic);
    }

    #[test]
    fn test_parse_device_index() {
        assert_eq!(parse_device_index("3"), Some(3));
        assert_eq!(parse_device_index("/dev/video10"), Some(10));
        assert_eq!(parse_device_index("/dev/videoX"), None);
        assert_eq!(parse_device_index("rtsp://cam"), None);
    }

    #[test]
    fn test_closure_opener() {
        let opener = |config: &SourceConfig| -> Result<Box<dyn CaptureSource>, CaptureError> {
            Err(CaptureError::open(&config.uri, "refused"))
        };
        let err = match opener.open(&SourceConfig::new("rtsp://cam")) {
            Ok(_) => panic!("expected open failure"),
            Err(err) => err,
        };
        assert_eq!(err, CaptureError::open("rtsp://cam", "refused"));
    }

    #[test]
    fn test_uri_opener_synthetic() {
        let mut config = SourceConfig::new("synthetic://");
        config.width = 4;
        config.height = 2;
        let mut source = UriOpener.open(&config).unwrap();
        assert_eq!(source.resolution(), (4, 2));
        let frame = source.read_frame().unwrap();
        assert_eq!(frame.data.len(), 4 * 2 * 3);
        source.close();
    }
}
