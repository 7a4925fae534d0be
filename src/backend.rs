//! The device backend: one capability interface over the vendor SDK path
//! and the generic capture path.

use std::fmt;

use tracing::{info, warn};

use crate::config::{CameraConfig, Timing};
use crate::device::V4l2Opener;
use crate::error::{ConfigError, InitError};
use crate::generic::GenericBackend;
use crate::probe::ProbeResult;
use crate::traits::FrameSample;
use crate::vendor::{NoVendorSdk, VendorBackend, VendorSdk};

/// Which acquisition path a backend uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Vendor USB SDK.
    Vendor,
    /// Generic capture framework.
    Generic,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vendor => write!(f, "vendor"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

/// A camera backend. Exactly one variant is active per session.
pub enum Backend {
    /// Vendor SDK path.
    Vendor(VendorBackend),
    /// Generic capture path.
    Generic(GenericBackend),
}

impl Backend {
    /// Default candidates: the vendor SDK first, then V4L2 for `device_id`.
    #[must_use]
    pub fn default_candidates(
        sdk: Box<dyn VendorSdk>,
        device_id: u32,
        timing: Timing,
    ) -> Vec<Self> {
        vec![
            Self::Vendor(VendorBackend::new(sdk, timing)),
            Self::Generic(GenericBackend::new(
                Box::new(V4l2Opener::new(timing.read_timeout)),
                device_id,
                timing,
            )),
        ]
    }

    /// Candidates for a build without a vendor library.
    #[must_use]
    pub fn system_candidates(device_id: u32, timing: Timing) -> Vec<Self> {
        Self::default_candidates(Box::new(NoVendorSdk), device_id, timing)
    }

    /// Initialize candidates in order and keep the first that opens.
    ///
    /// Candidates that fail are released before moving on.
    pub fn select(candidates: Vec<Self>) -> Result<Self, InitError> {
        let mut failures = Vec::new();
        for mut candidate in candidates {
            match candidate.initialize() {
                Ok(()) => {
                    info!(backend = %candidate.kind(), "camera backend selected");
                    return Ok(candidate);
                }
                Err(err) => {
                    warn!(error = %err, "backend unavailable, trying next");
                    candidate.release();
                    failures.push(err);
                }
            }
        }
        Err(InitError::NoCamera(failures))
    }

    /// Which path this backend uses.
    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        match self {
            Self::Vendor(_) => BackendKind::Vendor,
            Self::Generic(_) => BackendKind::Generic,
        }
    }

    /// True once `initialize` has succeeded and `release` has not run.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        match self {
            Self::Vendor(backend) => backend.is_initialized(),
            Self::Generic(backend) => backend.is_initialized(),
        }
    }

    /// Outcome of the last successful `configure`, if any.
    #[must_use]
    pub const fn probe_result(&self) -> Option<&ProbeResult> {
        match self {
            Self::Vendor(backend) => backend.probe_result(),
            Self::Generic(backend) => backend.probe_result(),
        }
    }

    /// Open the underlying device. May block for device warm-up.
    pub fn initialize(&mut self) -> Result<(), InitError> {
        let kind = self.kind();
        let opened = match self {
            Self::Vendor(backend) => backend.initialize(),
            Self::Generic(backend) => backend.initialize(),
        };
        opened.map_err(|source| InitError::Backend { kind, source })
    }

    /// Apply a configuration; fails with `NotInitialized` before `initialize`.
    pub fn configure(&mut self, config: &CameraConfig) -> Result<ProbeResult, ConfigError> {
        let result = match self {
            Self::Vendor(backend) => backend.configure(config),
            Self::Generic(backend) => backend.configure(config),
        }?;
        info!(
            backend = %self.kind(),
            auto_exposure = ?result.settings.auto_exposure,
            accepted = result.accepted(),
            "camera configured"
        );
        Ok(result)
    }

    /// Read one frame with its timestamp.
    pub fn get_frame(&mut self) -> FrameSample {
        match self {
            Self::Vendor(backend) => backend.get_frame(),
            Self::Generic(backend) => backend.get_frame(),
        }
    }

    /// Close the device. Idempotent; also runs on drop.
    pub fn release(&mut self) {
        match self {
            Self::Vendor(backend) => backend.release(),
            Self::Generic(backend) => backend.release(),
        }
    }
}
