//! Network and file sources decoded by an `ffmpeg` child process.
//!
//! ffmpeg writes raw RGB24 frames at the configured size to stdout. A reader
//! thread slices them into frames and pushes them into a [`LatestQueue`]
//! sized by `buffer_depth`, so a slow capture loop always reads the newest
//! decoded frame instead of working through a backlog.
//!
//! When a network stream ends, the child is replaced with a fresh one
//! inside the same source, with growing delays between attempts. Files
//! report end of stream on every later read.

use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{CaptureSource, SourceKind};
use crate::config::SourceConfig;
use crate::error::CaptureError;
use crate::frame::{PixelFormat, RawFrame};
use crate::slot::LatestQueue;

type Decoded = Result<RawFrame, CaptureError>;

const FFMPEG: &str = "ffmpeg";

/// First wait before restarting a dropped stream; doubles per failed attempt.
const RESTART_DELAY_MIN: Duration = Duration::from_millis(200);
const RESTART_DELAY_MAX: Duration = Duration::from_secs(10);

/// One ffmpeg child plus the thread draining its stdout.
struct Decoder {
    child: Child,
    reader: Option<JoinHandle<()>>,
}

impl Decoder {
    fn spawn(
        mut cmd: Command,
        width: u32,
        height: u32,
        queue: LatestQueue<Decoded>,
    ) -> Result<Self, String> {
        let mut child = cmd
            .spawn()
            .map_err(|err| format!("failed to start ffmpeg: {err}"))?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err("failed to capture ffmpeg stdout".into());
            }
        };

        let frame_bytes = width as usize * height as usize * 3;
        let reader = thread::Builder::new()
            .name("ffmpeg-reader".into())
            .spawn(move || reader_loop(stdout, frame_bytes, width, height, queue));

        match reader {
            Ok(reader) => Ok(Self {
                child,
                reader: Some(reader),
            }),
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(format!("failed to spawn ffmpeg reader: {err}"))
            }
        }
    }

    fn stop(mut self) {
        if let Err(err) = self.child.kill() {
            tracing::debug!("ffmpeg already exited: {}", err);
        }
        if let Err(err) = self.child.wait() {
            tracing::warn!("Failed to reap ffmpeg: {}", err);
        }
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                tracing::warn!("ffmpeg reader thread panicked");
            }
        }
    }
}

pub struct FfmpegCapture {
    config: SourceConfig,
    realtime: bool,
    program: OsString,
    reconnect: bool,
    decoder: Option<Decoder>,
    queue: LatestQueue<Decoded>,
    pending: Option<RawFrame>,
    restart_delay: Duration,
    next_restart: Instant,
    restarts: u32,
    closed: bool,
}

impl FfmpegCapture {
    /// Starts ffmpeg and waits for the first frame.
    ///
    /// `realtime` paces file input at its native frame rate; live streams
    /// pace themselves.
    pub fn open(config: &SourceConfig, realtime: bool) -> Result<Self, CaptureError> {
        tracing::info!(
            "Opening stream {} at {}x{} (buffer depth {})",
            config.uri,
            config.width,
            config.height,
            config.buffer_depth
        );

        let mut capture = Self::launch(config, realtime, FFMPEG)?;

        // A stream that never produces a frame counts as unavailable.
        match capture.queue.pop_timeout(config.open_timeout) {
            Some(Ok(frame)) => {
                capture.pending = Some(frame);
                tracing::info!("Stream {} delivering frames", config.uri);
                Ok(capture)
            }
            Some(Err(err)) => {
                capture.close();
                Err(CaptureError::open(&config.uri, err))
            }
            None => {
                capture.close();
                Err(CaptureError::open(
                    &config.uri,
                    format!("no frame within {:?}", config.open_timeout),
                ))
            }
        }
    }

    /// Spawns the decoder without waiting for output.
    fn launch(
        config: &SourceConfig,
        realtime: bool,
        program: impl AsRef<OsStr>,
    ) -> Result<Self, CaptureError> {
        if config.width == 0 || config.height == 0 {
            return Err(CaptureError::open(
                &config.uri,
                format!("invalid frame size {}x{}", config.width, config.height),
            ));
        }

        let program = program.as_ref().to_os_string();
        let queue = LatestQueue::new(config.buffer_depth);
        let decoder = Decoder::spawn(
            build_command(&program, config, realtime),
            config.width,
            config.height,
            queue.clone(),
        )
        .map_err(|reason| CaptureError::open(&config.uri, reason))?;

        Ok(Self {
            config: config.clone(),
            realtime,
            program,
            reconnect: SourceKind::from_uri(&config.uri) == SourceKind::Network,
            decoder: Some(decoder),
            queue,
            pending: None,
            restart_delay: RESTART_DELAY_MIN,
            next_restart: Instant::now(),
            restarts: 0,
            closed: false,
        })
    }

    fn stop_decoder(&mut self) {
        if let Some(decoder) = self.decoder.take() {
            decoder.stop();
        }
    }

    /// Replaces a finished decoder once the restart delay has passed.
    fn restart_decoder(&mut self) -> Result<(), CaptureError> {
        let now = Instant::now();
        if now < self.next_restart {
            return Err(CaptureError::read_failed(format!(
                "stream ended, reconnecting in {:?}",
                self.next_restart - now
            )));
        }

        self.restarts += 1;
        tracing::info!(
            "Restarting ffmpeg for {} (attempt {})",
            self.config.uri,
            self.restarts
        );

        let cmd = build_command(&self.program, &self.config, self.realtime);
        match Decoder::spawn(cmd, self.config.width, self.config.height, self.queue.clone()) {
            Ok(decoder) => {
                self.decoder = Some(decoder);
                Ok(())
            }
            Err(reason) => {
                self.schedule_restart(now);
                Err(CaptureError::read_failed(reason))
            }
        }
    }

    fn schedule_restart(&mut self, now: Instant) {
        self.next_restart = now + self.restart_delay;
        self.restart_delay = (self.restart_delay * 2).min(RESTART_DELAY_MAX);
    }
}

fn build_command(program: &OsStr, config: &SourceConfig, realtime: bool) -> Command {
    let scale_arg = format!("scale={}:{}", config.width, config.height);
    let mut cmd = Command::new(program);
    cmd.arg("-hide_banner").arg("-loglevel").arg("error");

    if config.uri.starts_with("rtsp://") || config.uri.starts_with("rtsps://") {
        cmd.arg("-rtsp_transport").arg("tcp");
    }
    if config.buffer_depth == 0 {
        cmd.arg("-fflags")
            .arg("nobuffer")
            .arg("-flags")
            .arg("low_delay")
            .arg("-max_delay")
            .arg("0");
    }
    if realtime {
        cmd.arg("-re");
    }

    cmd.arg("-i")
        .arg(&config.uri)
        .arg("-an")
        .arg("-vf")
        .arg(&scale_arg)
        .arg("-pix_fmt")
        .arg("rgb24")
        .arg("-f")
        .arg("rawvideo")
        .arg("-");

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    cmd
}

fn reader_loop(
    mut stdout: ChildStdout,
    frame_bytes: usize,
    width: u32,
    height: u32,
    queue: LatestQueue<Decoded>,
) {
    let mut frames: u64 = 0;
    let mut dropped: u64 = 0;

    loop {
        let mut buffer = vec![0u8; frame_bytes];
        match stdout.read_exact(&mut buffer) {
            Ok(()) => {
                frames += 1;
                dropped += queue.push(Ok(RawFrame::new(buffer, width, height, PixelFormat::Rgb8)))
                    as u64;
            }
            Err(err) => {
                if err.kind() != std::io::ErrorKind::UnexpectedEof {
                    tracing::warn!("ffmpeg read error: {}", err);
                }
                queue.push(Err(CaptureError::EndOfStream));
                break;
            }
        }
    }

    tracing::debug!(
        "ffmpeg reader finished: {} frames decoded, {} superseded before read",
        frames,
        dropped
    );
}

impl CaptureSource for FfmpegCapture {
    fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        if self.closed {
            return Err(CaptureError::Closed);
        }
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        if self.decoder.is_none() {
            self.restart_decoder()?;
        }

        match self.queue.pop_timeout(self.config.read_timeout) {
            Some(Ok(frame)) => {
                self.restart_delay = RESTART_DELAY_MIN;
                Ok(frame)
            }
            Some(Err(CaptureError::EndOfStream)) if self.reconnect => {
                tracing::warn!("Stream {} ended", self.config.uri);
                self.stop_decoder();
                self.schedule_restart(Instant::now());
                Err(CaptureError::EndOfStream)
            }
            Some(Err(CaptureError::EndOfStream)) => {
                // Keep reporting end of stream on later reads
                self.queue.push(Err(CaptureError::EndOfStream));
                Err(CaptureError::EndOfStream)
            }
            Some(Err(err)) => Err(err),
            None => Err(CaptureError::read_failed(format!(
                "no frame within {:?}",
                self.config.read_timeout
            ))),
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stop_decoder();
        tracing::info!("Stream {} released", self.config.uri);
    }

    fn resolution(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn describe(&self) -> String {
        format!("{} {}x{}", self.config.uri, self.config.width, self.config.height)
    }
}

impl Drop for FfmpegCapture {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn small(uri: &str) -> SourceConfig {
        let mut config = SourceConfig::new(uri);
        config.width = 2;
        config.height = 2;
        config.read_timeout = Duration::from_secs(2);
        config
    }

    #[test]
    fn test_rtsp_low_latency_command() {
        let mut config = SourceConfig::new("rtsp://cam/stream");
        config.width = 320;
        config.height = 240;
        let cmd = build_command(OsStr::new(FFMPEG), &config, false);
        let args = args(&cmd);

        assert_eq!(cmd.get_program(), FFMPEG);
        assert!(args.windows(2).any(|w| w == ["-rtsp_transport", "tcp"]));
        assert!(args.windows(2).any(|w| w == ["-fflags", "nobuffer"]));
        assert!(args.windows(2).any(|w| w == ["-vf", "scale=320:240"]));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "rgb24"]));
        assert!(!args.contains(&"-re".to_string()));
    }

    #[test]
    fn test_buffered_file_command() {
        let mut config = SourceConfig::new("clip.mp4");
        config.buffer_depth = 4;
        let args = args(&build_command(OsStr::new(FFMPEG), &config, true));

        assert!(!args.contains(&"nobuffer".to_string()));
        assert!(!args.contains(&"-rtsp_transport".to_string()));
        assert!(args.contains(&"-re".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn test_zero_size_rejected_before_spawn() {
        let mut config = SourceConfig::new("rtsp://cam/stream");
        config.width = 0;

        match FfmpegCapture::open(&config, false) {
            Err(CaptureError::Open { uri, reason }) => {
                assert_eq!(uri, "rtsp://cam/stream");
                assert!(reason.contains("0x480"), "{reason}");
            }
            Err(other) => panic!("expected an open error, got {other:?}"),
            Ok(_) => panic!("zero-width stream should not open"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_dropped_network_stream_restarts_decoder() {
        // `true` ignores its arguments and exits with empty output
        let mut capture = FfmpegCapture::launch(&small("rtsp://cam/stream"), false, "true").unwrap();

        assert_eq!(capture.read_frame().unwrap_err(), CaptureError::EndOfStream);
        assert!(capture.decoder.is_none());

        // Too early: waits out the restart delay without spawning
        assert!(matches!(capture.read_frame(), Err(CaptureError::ReadFailed(_))));
        assert_eq!(capture.restarts, 0);

        thread::sleep(RESTART_DELAY_MIN + Duration::from_millis(50));
        assert_eq!(capture.read_frame().unwrap_err(), CaptureError::EndOfStream);
        assert_eq!(capture.restarts, 1);
        assert_eq!(capture.restart_delay, RESTART_DELAY_MIN * 4);

        capture.close();
        assert_eq!(capture.read_frame().unwrap_err(), CaptureError::Closed);
    }

    #[cfg(unix)]
    #[test]
    fn test_finished_file_stays_at_end_of_stream() {
        let mut capture = FfmpegCapture::launch(&small("clip.mp4"), true, "true").unwrap();

        for _ in 0..3 {
            assert_eq!(capture.read_frame().unwrap_err(), CaptureError::EndOfStream);
        }
        assert_eq!(capture.restarts, 0);
        assert!(capture.decoder.is_some());
    }
}
