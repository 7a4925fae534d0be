//! Auto-exposure probing.
//!
//! Hardware auto-exposure on this sensor often settles on an all-black
//! image, so instead of trusting it we walk a short fixed list of
//! auto-exposure modes and keep the first one that yields a usable frame.
//! The probe is best effort: if nothing works, the last candidate stays
//! applied and no error is raised.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::BackendKind;
use crate::traits::{FrameSample, Result};

/// Auto-exposure values tried, in order.
pub const AUTO_EXPOSURE_CANDIDATES: [f64; 4] = [0.75, 1.0, 2.0, 3.0];

/// Auto-exposure value meaning "manual exposure".
pub const MANUAL_EXPOSURE: f64 = 0.0;

/// A backend the probe can drive.
pub trait ProbeTarget {
    /// Apply one auto-exposure candidate.
    fn apply_auto_exposure(&mut self, value: f64) -> Result<()>;

    /// Read one timestamped frame.
    fn sample(&mut self) -> FrameSample;
}

/// Settings that became active after configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSettings {
    /// Backend the settings were applied to.
    pub backend: BackendKind,
    /// Auto-exposure mode left applied; `None` if no candidate was tried.
    pub auto_exposure: Option<f64>,
    /// Manual exposure, in the backend's unit, when set.
    pub exposure: Option<f64>,
    /// Manual gain, when set.
    pub gain: Option<f64>,
}

/// Outcome of configuring exposure and gain.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    /// Settings now active on the device.
    pub settings: ProbeSettings,
    /// The frame that got a candidate accepted, if any was.
    pub evidence: Option<FrameSample>,
    /// How many candidates were tried.
    pub attempts: usize,
}

impl ProbeResult {
    /// Result for manual exposure, where nothing is probed.
    #[must_use]
    pub const fn manual(backend: BackendKind, exposure: f64, gain: f64) -> Self {
        Self {
            settings: ProbeSettings {
                backend,
                auto_exposure: Some(MANUAL_EXPOSURE),
                exposure: Some(exposure),
                gain: Some(gain),
            },
            evidence: None,
            attempts: 0,
        }
    }

    /// True when a candidate produced a non-degenerate frame.
    #[must_use]
    pub const fn accepted(&self) -> bool {
        self.evidence.is_some()
    }
}

/// Try each candidate in order until one yields a valid frame.
///
/// A failed write does not skip the candidate: the frame is still read, as
/// some devices keep working while rejecting the mode change.
pub fn probe_auto_exposure<T>(
    target: &mut T,
    backend: BackendKind,
    candidates: &[f64],
    settle: Duration,
) -> ProbeResult
where
    T: ProbeTarget + ?Sized,
{
    let mut result = ProbeResult {
        settings: ProbeSettings {
            backend,
            auto_exposure: None,
            exposure: None,
            gain: None,
        },
        evidence: None,
        attempts: 0,
    };

    for &candidate in candidates {
        info!(candidate, "testing auto exposure value");
        if let Err(err) = target.apply_auto_exposure(candidate) {
            debug!(candidate, error = %err, "auto exposure write rejected");
        }
        result.settings.auto_exposure = Some(candidate);
        result.attempts += 1;

        if !settle.is_zero() {
            thread::sleep(settle);
        }

        let sample = target.sample();
        if sample.is_valid {
            info!(candidate, "found working auto exposure value");
            result.evidence = Some(sample);
            return result;
        }
        debug!(candidate, read_ok = sample.frame.is_some(), "frame rejected");
    }

    warn!(
        auto_exposure = ?result.settings.auto_exposure,
        "no auto exposure candidate produced a usable frame, keeping the last one"
    );
    result
}
