//! Behavior-Cam: camera acquisition and recording for behavioral experiments
//!
//! This library selects a camera backend (a vendor SDK when one is linked,
//! otherwise V4L2), applies exposure and gain policy, and records video
//! alongside a per-frame timestamp document. Every hardware seam is a trait
//! so the whole pipeline runs against mock devices in tests.

pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod fps;
pub mod frame_source;
pub mod generic;
pub mod preview;
pub mod probe;
pub mod recorder;
pub mod sink;
pub mod traits;
pub mod validation;
pub mod vendor;

#[cfg(test)]
pub mod mock;

pub use backend::{Backend, BackendKind};
pub use config::{load_settings, CameraConfig, RecordingConfig, Settings, Timing};
pub use device::{V4L2Device, V4l2Opener};
pub use error::{ConfigError, InitError, RecorderError};
pub use frame_source::FrameSource;
pub use probe::{ProbeResult, ProbeSettings};
pub use recorder::{Recorder, SessionSummary};
pub use sink::FfmpegSinkFactory;
pub use traits::{CameraError, FourCC, Frame, FrameMetadata, FrameSample, Resolution};
