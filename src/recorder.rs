//! Recording sessions: one video file plus one timestamp document.
//!
//! Index `i` of the timestamp document is the capture time of encoded frame
//! `i`. A timestamp is only appended once its frame has been accepted by the
//! sink, so the two can never drift apart.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::{CameraConfig, RecordingConfig};
use crate::error::RecorderError;
use crate::fps::FpsCounter;
use crate::preview::{draw_fps_overlay, PreviewSurface};
use crate::sink::{SinkFactory, VideoSink};
use crate::traits::{Frame, Resolution};

/// The persisted timestamp document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampDocument {
    /// Capture times in seconds, one per encoded frame.
    pub timestamps: Vec<f64>,
}

/// What a finished session produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Video container path.
    pub video_path: PathBuf,
    /// Timestamp document path.
    pub timestamps_path: PathBuf,
    /// Frames encoded.
    pub frames_written: u64,
}

/// An open session. Exclusively owns its sink and timestamp file.
struct RecordingSession {
    video_path: PathBuf,
    timestamps_path: PathBuf,
    sink: Box<dyn VideoSink>,
    timestamps_file: File,
    timestamp_log: Vec<f64>,
    frame_count: u64,
}

/// Idle/Recording state machine.
///
/// Starting a session while one is open is rejected with
/// [`RecorderError::AlreadyRecording`]. Dropping a recorder stops any open
/// session.
pub struct Recorder {
    output_dir: PathBuf,
    file_format: String,
    resolution: Resolution,
    framerate: f64,
    sinks: Box<dyn SinkFactory>,
    preview: Option<Box<dyn PreviewSurface>>,
    session: Option<RecordingSession>,
    fps: FpsCounter,
}

impl Recorder {
    /// Recorder writing sessions sized to `camera` under `recording`'s directory.
    #[must_use]
    pub fn new(
        camera: &CameraConfig,
        recording: &RecordingConfig,
        sinks: Box<dyn SinkFactory>,
    ) -> Self {
        Self {
            output_dir: recording.output_directory.clone(),
            file_format: recording.file_format.trim_start_matches('.').to_owned(),
            resolution: camera.resolution,
            framerate: camera.framerate,
            sinks,
            preview: None,
            session: None,
            fps: FpsCounter::new(),
        }
    }

    /// Show each recorded frame, with the FPS overlay, on `preview`.
    #[must_use]
    pub fn with_preview(mut self, preview: Box<dyn PreviewSurface>) -> Self {
        self.preview = Some(preview);
        self
    }

    /// True while a session is open.
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Frames recorded in the open session.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.session.as_ref().map_or(0, |session| session.frame_count)
    }

    /// Timestamps recorded in the open session.
    #[must_use]
    pub fn timestamps(&self) -> &[f64] {
        self.session
            .as_ref()
            .map_or(&[], |session| session.timestamp_log.as_slice())
    }

    /// Frames per second over the last completed window.
    #[must_use]
    pub const fn fps(&self) -> f64 {
        self.fps.fps()
    }

    /// Open a new session named after the current wall-clock time.
    pub fn start_recording(&mut self) -> Result<&Path, RecorderError> {
        if self.session.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }
        std::fs::create_dir_all(&self.output_dir)?;

        let base = format!("recording_{}", Local::now().format("%Y%m%d_%H%M%S"));
        let video_path = self
            .output_dir
            .join(format!("{base}.{}", self.file_format));
        let timestamps_path = self.output_dir.join(format!("{base}_timestamps.json"));

        let sink = self.sinks.open(&video_path, self.resolution, self.framerate)?;
        let timestamps_file = File::create(&timestamps_path)?;
        self.fps.reset();

        info!(
            video = %video_path.display(),
            timestamps = %timestamps_path.display(),
            "recording started"
        );
        let session = self.session.insert(RecordingSession {
            video_path,
            timestamps_path,
            sink,
            timestamps_file,
            timestamp_log: Vec::new(),
            frame_count: 0,
        });
        Ok(session.video_path.as_path())
    }

    /// Encode `frame` and log its capture `timestamp` at the same index.
    pub fn record_frame(&mut self, frame: &Frame, timestamp: f64) -> Result<(), RecorderError> {
        let session = self.session.as_mut().ok_or(RecorderError::NotRecording)?;

        session.sink.write_frame(frame)?;
        session.timestamp_log.push(timestamp);
        session.frame_count += 1;

        let fps = self.fps.tick();
        if let Some(preview) = self.preview.as_mut() {
            let mut copy = frame.clone();
            draw_fps_overlay(&mut copy, fps);
            preview.show(&copy, fps);
        }
        Ok(())
    }

    /// Close the session, if any, and persist its timestamp document.
    ///
    /// Safe to call when idle. The recorder is idle afterwards even when
    /// finishing the video or writing the document fails; the first such
    /// error is returned.
    pub fn stop_recording(&mut self) -> Result<Option<SessionSummary>, RecorderError> {
        let session = self.session.take();
        if let Some(preview) = self.preview.as_mut() {
            preview.close();
        }
        let Some(mut session) = session else {
            return Ok(None);
        };

        let finished = session.sink.finish();
        let written = write_timestamps(&session.timestamps_file, &session.timestamp_log);
        finished?;
        written?;

        let summary = SessionSummary {
            video_path: session.video_path,
            timestamps_path: session.timestamps_path,
            frames_written: session.sink.frames_written(),
        };
        info!(
            frames = summary.frames_written,
            video = %summary.video_path.display(),
            "recording stopped"
        );
        Ok(Some(summary))
    }
}

fn write_timestamps(file: &File, timestamps: &[f64]) -> Result<(), RecorderError> {
    let document = TimestampDocument {
        timestamps: timestamps.to_vec(),
    };
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &document)?;
    writer.flush()?;
    file.sync_all()?;
    Ok(())
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Err(err) = self.stop_recording() {
            error!(error = %err, "failed to stop recording cleanly");
        }
    }
}
