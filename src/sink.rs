//! Sequential video sinks.
//!
//! Encoding is delegated to an `ffmpeg` child process fed raw frames on
//! stdin, so no codec lives in this crate.

use std::io::Write;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::traits::{FourCC, Frame, Resolution};

/// Errors from writing video.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The encoder process could not be started.
    #[error("failed to start encoder: {0}")]
    Spawn(#[source] std::io::Error),

    /// Writing to or finishing the encoder failed.
    #[error("encoder I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The encoder exited unsuccessfully.
    #[error("encoder exited with {0}")]
    EncoderFailed(std::process::ExitStatus),

    /// The frame size differs from the size the sink was opened with.
    #[error("frame is {actual}, sink expects {expected}")]
    FrameSize {
        /// Size the sink was opened with.
        expected: Resolution,
        /// Size of the rejected frame.
        actual: Resolution,
    },

    /// The frame carries a different number of bytes than its size and
    /// layout imply. Raw video is split into frames by byte count, so such
    /// a frame would shift every frame after it.
    #[error("frame has {actual} bytes, expected {expected}")]
    FrameLength {
        /// `width * height * bytes_per_pixel`.
        expected: usize,
        /// Bytes the frame carries.
        actual: usize,
    },

    /// The frame's pixel layout cannot be encoded.
    #[error("unsupported pixel format {0}")]
    UnsupportedFormat(FourCC),

    /// `write_frame` after `finish`.
    #[error("sink already finished")]
    Finished,
}

/// A video container being written frame by frame.
pub trait VideoSink {
    /// Append one frame. A frame counts as written only if this returns `Ok`.
    fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError>;

    /// Frames successfully written so far.
    fn frames_written(&self) -> u64;

    /// Flush and close the container. Idempotent.
    fn finish(&mut self) -> Result<(), SinkError>;
}

/// Opens video sinks for new recording sessions.
pub trait SinkFactory {
    /// Open a sink at `path` for frames of `resolution` at `framerate`.
    fn open(
        &self,
        path: &Path,
        resolution: Resolution,
        framerate: f64,
    ) -> Result<Box<dyn VideoSink>, SinkError>;
}

/// ffmpeg `-pix_fmt` name for a raw layout.
fn pix_fmt(fourcc: FourCC) -> Option<&'static str> {
    match fourcc {
        FourCC::GREY => Some("gray"),
        FourCC::YUYV => Some("yuyv422"),
        FourCC::RGB3 => Some("rgb24"),
        _ => None,
    }
}

/// Check `frame` against the size a sink was opened with.
///
/// Rejects frames of the wrong resolution, compressed layouts, and raw
/// frames whose byte count does not match their resolution.
pub fn check_frame(expected: Resolution, frame: &Frame) -> Result<(), SinkError> {
    if frame.resolution() != expected {
        return Err(SinkError::FrameSize {
            expected,
            actual: frame.resolution(),
        });
    }
    let bytes_per_pixel = frame
        .fourcc
        .bytes_per_pixel()
        .ok_or(SinkError::UnsupportedFormat(frame.fourcc))?;
    let length = (expected.width * expected.height * bytes_per_pixel) as usize;
    if frame.data.len() != length {
        return Err(SinkError::FrameLength {
            expected: length,
            actual: frame.data.len(),
        });
    }
    Ok(())
}

/// A command in its own process group, so a terminal Ctrl-C reaches only
/// this process and not the child.
fn detached(program: &str) -> Command {
    let mut command = Command::new(program);
    command.process_group(0);
    command
}

/// Writes MPEG-4 (XVID tagged) video through an `ffmpeg` child process.
///
/// The encoder is started on the first frame, once the pixel layout is
/// known; a session with no frames leaves no file behind.
pub struct FfmpegSink {
    path: PathBuf,
    resolution: Resolution,
    framerate: f64,
    encoder: Option<(Child, ChildStdin)>,
    fourcc: Option<FourCC>,
    frames_written: u64,
    finished: bool,
}

impl FfmpegSink {
    /// Sink writing to `path`.
    #[must_use]
    pub fn new(path: &Path, resolution: Resolution, framerate: f64) -> Self {
        Self {
            path: path.to_path_buf(),
            resolution,
            framerate,
            encoder: None,
            fourcc: None,
            frames_written: 0,
            finished: false,
        }
    }

    fn spawn(&self, pix_fmt: &str) -> Result<(Child, ChildStdin), SinkError> {
        let size = format!("{}x{}", self.resolution.width, self.resolution.height);
        let rate = format!("{}", self.framerate);
        let mut child = detached("ffmpeg")
            .args(["-f", "rawvideo", "-pix_fmt", pix_fmt, "-s", &size, "-r", &rate])
            .args(["-i", "pipe:0", "-c:v", "mpeg4", "-vtag", "xvid", "-q:v", "3"])
            .args(["-loglevel", "error", "-y"])
            .arg(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .map_err(SinkError::Spawn)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            SinkError::Spawn(std::io::Error::other("encoder stdin unavailable"))
        })?;
        info!(path = %self.path.display(), %size, pix_fmt, "video encoder started");
        Ok((child, stdin))
    }
}

impl VideoSink for FfmpegSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError> {
        if self.finished {
            return Err(SinkError::Finished);
        }
        check_frame(self.resolution, frame)?;
        if let Some(fourcc) = self.fourcc {
            if fourcc != frame.fourcc {
                return Err(SinkError::UnsupportedFormat(frame.fourcc));
            }
        }

        if self.encoder.is_none() {
            let name = pix_fmt(frame.fourcc).ok_or(SinkError::UnsupportedFormat(frame.fourcc))?;
            self.encoder = Some(self.spawn(name)?);
            self.fourcc = Some(frame.fourcc);
        }

        if let Some((_, stdin)) = self.encoder.as_mut() {
            stdin.write_all(&frame.data)?;
        }
        self.frames_written += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let Some((mut child, stdin)) = self.encoder.take() else {
            debug!(path = %self.path.display(), "video sink closed without frames");
            return Ok(());
        };
        // closing stdin lets the encoder write the trailer
        drop(stdin);
        let status = child.wait()?;
        if !status.success() {
            return Err(SinkError::EncoderFailed(status));
        }
        info!(
            path = %self.path.display(),
            frames = self.frames_written,
            "video file finished"
        );
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            warn!(error = %err, "video sink did not finish cleanly");
        }
    }
}

/// Opens [`FfmpegSink`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegSinkFactory;

impl SinkFactory for FfmpegSinkFactory {
    fn open(
        &self,
        path: &Path,
        resolution: Resolution,
        framerate: f64,
    ) -> Result<Box<dyn VideoSink>, SinkError> {
        Ok(Box::new(FfmpegSink::new(path, resolution, framerate)))
    }
}
