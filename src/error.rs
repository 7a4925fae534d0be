//! Error types surfaced to callers of the backend and recorder.
//!
//! Only unrecoverable conditions live here. Transient read failures and
//! black frames are absorbed by the frame source and the probe and show up
//! as invalid [`FrameSample`](crate::traits::FrameSample)s instead.

use thiserror::Error;

use crate::backend::BackendKind;
use crate::sink::SinkError;
use crate::traits::{CameraError, Resolution};

/// No backend could open the camera.
#[derive(Debug, Error)]
pub enum InitError {
    /// A single backend failed to open its device.
    #[error("{kind} backend failed to open: {source}")]
    Backend {
        /// Which backend failed.
        kind: BackendKind,
        /// Underlying device error.
        #[source]
        source: CameraError,
    },

    /// Every candidate backend failed.
    #[error("no camera could be opened ({})", summarize(.0))]
    NoCamera(Vec<InitError>),
}

fn summarize(failures: &[InitError]) -> String {
    if failures.is_empty() {
        return "no backends configured".to_owned();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from applying a camera configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `configure` was called before `initialize`.
    #[error("camera not initialized")]
    NotInitialized,

    /// The driver settled on a different frame size than requested.
    #[error("camera negotiated {negotiated} instead of the requested {requested}")]
    ResolutionMismatch {
        /// Size from the configuration.
        requested: Resolution,
        /// Size the device reports after the write.
        negotiated: Resolution,
    },

    /// The device rejected a mandatory setting.
    #[error("device error while configuring: {0}")]
    Device(#[from] CameraError),
}

/// Errors from the recorder state machine and its outputs.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// `record_frame` was called with no session open.
    #[error("recording not started")]
    NotRecording,

    /// `start_recording` was called while a session is open.
    #[error("a recording session is already open")]
    AlreadyRecording,

    /// The video sink failed.
    #[error("video sink error: {0}")]
    Sink(#[from] SinkError),

    /// Creating the output directory or timestamp document failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing the timestamp document failed.
    #[error("timestamp document error: {0}")]
    Json(#[from] serde_json::Error),
}
