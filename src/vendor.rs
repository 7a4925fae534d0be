//! Vendor SDK path: direct USB feature control.
//!
//! The SDK itself is an opaque dependency. [`VendorSdk`] and [`VendorDevice`]
//! are the whole surface this crate relies on; a binding to the real
//! library implements them, and [`NoVendorSdk`] stands in when none is
//! linked so backend selection falls through to the generic path.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::BackendKind;
use crate::config::{CameraConfig, Timing};
use crate::error::ConfigError;
use crate::probe::{self, ProbeResult, ProbeTarget, AUTO_EXPOSURE_CANDIDATES};
use crate::traits::{wall_clock_secs, CameraError, Frame, FrameSample, Resolution, Result};

/// Exposure time feature, in microseconds.
pub const EXPOSURE_TIME: &str = "ExposureTime";
/// Gain feature, in dB.
pub const GAIN: &str = "Gain";
/// Auto-exposure mode feature.
pub const EXPOSURE_AUTO: &str = "ExposureAuto";
/// Image width feature.
pub const WIDTH: &str = "Width";
/// Image height feature.
pub const HEIGHT: &str = "Height";
/// Acquisition framerate feature.
pub const FRAME_RATE: &str = "AcquisitionFrameRate";

/// Exposure written when the device is first opened, in microseconds.
const DEFAULT_EXPOSURE_US: f64 = 10_000.0;
/// Gain written when the device is first opened, in dB.
const DEFAULT_GAIN_DB: f64 = 0.0;

/// Identity of an enumerated vendor device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorDeviceInfo {
    /// Serial number used to open the device.
    pub serial_number: String,
    /// Vendor name.
    pub vendor_name: String,
    /// Model name.
    pub model_name: String,
}

/// Device manager of the vendor SDK.
pub trait VendorSdk {
    /// List attached devices.
    fn enumerate(&mut self) -> Result<Vec<VendorDeviceInfo>>;

    /// Open a device by serial number.
    fn open_by_serial(&mut self, serial_number: &str) -> Result<Box<dyn VendorDevice>>;
}

/// An opened vendor device.
pub trait VendorDevice {
    /// Whether the device implements a named feature.
    fn is_implemented(&self, feature: &str) -> bool;

    /// Write a float feature.
    fn set_float_feature(&mut self, feature: &str, value: f64) -> Result<()>;

    /// Read a float feature.
    fn float_feature(&self, feature: &str) -> Result<f64>;

    /// Start acquisition.
    fn stream_on(&mut self) -> Result<()>;

    /// Stop acquisition.
    fn stream_off(&mut self) -> Result<()>;

    /// Fetch the next image, waiting at most `timeout`.
    fn get_image(&mut self, timeout: Duration) -> Result<Frame>;

    /// Close the device.
    fn close(&mut self) -> Result<()>;
}

/// SDK binding used when no vendor library is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoVendorSdk;

impl VendorSdk for NoVendorSdk {
    fn enumerate(&mut self) -> Result<Vec<VendorDeviceInfo>> {
        debug!("no vendor SDK linked");
        Ok(Vec::new())
    }

    fn open_by_serial(&mut self, serial_number: &str) -> Result<Box<dyn VendorDevice>> {
        Err(CameraError::DeviceOpenFailed(format!(
            "no vendor SDK linked, cannot open {serial_number}"
        )))
    }
}

/// Backend over the vendor SDK.
pub struct VendorBackend {
    sdk: Box<dyn VendorSdk>,
    timing: Timing,
    device: Option<Box<dyn VendorDevice>>,
    streaming: bool,
    probe: Option<ProbeResult>,
}

impl VendorBackend {
    /// Backend driving `sdk`.
    #[must_use]
    pub fn new(sdk: Box<dyn VendorSdk>, timing: Timing) -> Self {
        Self {
            sdk,
            timing,
            device: None,
            streaming: false,
            probe: None,
        }
    }

    /// True once a device is open.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.device.is_some()
    }

    /// Outcome of the last successful `configure`.
    #[must_use]
    pub const fn probe_result(&self) -> Option<&ProbeResult> {
        self.probe.as_ref()
    }

    /// Read a float feature from the open device.
    pub fn feature(&self, feature: &str) -> Result<f64> {
        self.device
            .as_ref()
            .ok_or_else(|| CameraError::DeviceOpenFailed("vendor device not open".to_owned()))?
            .float_feature(feature)
    }

    /// Open the first enumerated device and start acquisition.
    pub fn initialize(&mut self) -> Result<()> {
        self.release();
        self.probe = None;

        let devices = self.sdk.enumerate()?;
        let first = devices
            .first()
            .ok_or_else(|| CameraError::DeviceOpenFailed("no vendor devices found".to_owned()))?;
        info!(
            vendor = %first.vendor_name,
            model = %first.model_name,
            serial = %first.serial_number,
            count = devices.len(),
            "opening vendor camera"
        );

        let device = self.sdk.open_by_serial(&first.serial_number)?;
        self.device = Some(device);

        self.write(EXPOSURE_TIME, DEFAULT_EXPOSURE_US);
        self.write(GAIN, DEFAULT_GAIN_DB);

        let started = match self.device.as_mut() {
            Some(device) => device.stream_on(),
            None => Ok(()),
        };
        if let Err(err) = started {
            self.release();
            return Err(err);
        }
        self.streaming = true;
        info!("vendor camera initialized");
        Ok(())
    }

    /// Apply resolution, framerate and exposure/gain policy.
    pub fn configure(&mut self, config: &CameraConfig) -> std::result::Result<ProbeResult, ConfigError> {
        if self.device.is_none() {
            return Err(ConfigError::NotInitialized);
        }

        self.write(WIDTH, f64::from(config.resolution.width));
        self.write(HEIGHT, f64::from(config.resolution.height));
        if let Some(negotiated) = self.negotiated_resolution() {
            if negotiated != config.resolution {
                return Err(ConfigError::ResolutionMismatch {
                    requested: config.resolution,
                    negotiated,
                });
            }
        }
        self.write(FRAME_RATE, config.framerate);

        let result = if config.auto_gain {
            let settle = self.timing.probe_settle;
            probe::probe_auto_exposure(self, BackendKind::Vendor, &AUTO_EXPOSURE_CANDIDATES, settle)
        } else {
            info!(
                exposure_us = config.exposure_time_us,
                gain_db = config.gain,
                "setting manual exposure"
            );
            self.write(EXPOSURE_AUTO, probe::MANUAL_EXPOSURE);
            self.write(EXPOSURE_TIME, config.exposure_time_us);
            self.write(GAIN, config.gain);
            ProbeResult::manual(BackendKind::Vendor, config.exposure_time_us, config.gain)
        };
        self.probe = Some(result.clone());
        Ok(result)
    }

    /// Read one frame. Never fails; problems show up as an invalid sample.
    pub fn get_frame(&mut self) -> FrameSample {
        let timestamp = wall_clock_secs();
        let timeout = self.timing.read_timeout;
        match self.device.as_mut() {
            Some(device) => FrameSample::from_read(timestamp, device.get_image(timeout)),
            None => FrameSample::failed(timestamp),
        }
    }

    /// Stop acquisition and close the device. Idempotent.
    pub fn release(&mut self) {
        let Some(mut device) = self.device.take() else {
            return;
        };
        if self.streaming {
            if let Err(err) = device.stream_off() {
                warn!(error = %err, "error stopping vendor acquisition");
            }
            self.streaming = false;
        }
        if let Err(err) = device.close() {
            warn!(error = %err, "error closing vendor camera");
        }
        info!("vendor camera released");
    }

    /// Frame size reported by the device, when it exposes both features.
    fn negotiated_resolution(&self) -> Option<Resolution> {
        let device = self.device.as_ref()?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let dimension = |feature: &str| {
            device
                .is_implemented(feature)
                .then(|| device.float_feature(feature).ok())
                .flatten()
                .map(|value| value as u32)
        };
        Some(Resolution::new(dimension(WIDTH)?, dimension(HEIGHT)?))
    }

    /// Write a feature if the device implements it; failures are logged.
    fn write(&mut self, feature: &str, value: f64) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        if !device.is_implemented(feature) {
            debug!(feature, "feature not implemented");
            return;
        }
        match device.set_float_feature(feature, value) {
            Ok(()) => debug!(feature, value, "feature set"),
            Err(err) => warn!(feature, value, error = %err, "error setting feature"),
        }
    }
}

impl ProbeTarget for VendorBackend {
    fn apply_auto_exposure(&mut self, value: f64) -> Result<()> {
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| CameraError::DeviceOpenFailed("vendor device not open".to_owned()))?;
        if !device.is_implemented(EXPOSURE_AUTO) {
            return Err(CameraError::PropertyNotSupported(EXPOSURE_AUTO.to_owned()));
        }
        device.set_float_feature(EXPOSURE_AUTO, value)
    }

    fn sample(&mut self) -> FrameSample {
        self.get_frame()
    }
}

impl Drop for VendorBackend {
    fn drop(&mut self) {
        self.release();
    }
}
