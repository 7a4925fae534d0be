//! Generic capture path: any camera a [`CaptureOpener`] can open.

use std::thread;

use tracing::{debug, info, warn};

use crate::backend::BackendKind;
use crate::config::{CameraConfig, Timing};
use crate::error::ConfigError;
use crate::probe::{self, ProbeResult, ProbeTarget, AUTO_EXPOSURE_CANDIDATES, MANUAL_EXPOSURE};
use crate::traits::{
    wall_clock_secs, CameraError, CaptureApi, CaptureDevice, CaptureOpener, FrameSample,
    Property, Resolution, Result,
};
use crate::validation::FrameStats;

/// Capture APIs tried by [`GenericBackend::initialize`], in order.
pub const DEFAULT_CAPTURE_APIS: [CaptureApi; 2] = [CaptureApi::Auto, CaptureApi::V4l2UserPtr];

/// Auto-exposure written right after opening, before warm-up.
const INITIAL_AUTO_EXPOSURE: f64 = 0.75;
/// Mid-range brightness/contrast written around auto exposure.
const MID_LEVEL: f64 = 0.5;

/// Backend over a generic capture framework.
pub struct GenericBackend {
    opener: Box<dyn CaptureOpener>,
    device_id: u32,
    timing: Timing,
    device: Option<Box<dyn CaptureDevice>>,
    probe: Option<ProbeResult>,
}

impl GenericBackend {
    /// Backend for `device_id`, trying [`DEFAULT_CAPTURE_APIS`].
    #[must_use]
    pub fn new(opener: Box<dyn CaptureOpener>, device_id: u32, timing: Timing) -> Self {
        Self {
            opener,
            device_id,
            timing,
            device: None,
            probe: None,
        }
    }

    /// True once a device is open.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.device.is_some()
    }

    /// The capture API in use, if initialized.
    #[must_use]
    pub fn api(&self) -> Option<CaptureApi> {
        self.device.as_ref().map(|device| device.api())
    }

    /// Outcome of the last successful `configure`.
    #[must_use]
    pub const fn probe_result(&self) -> Option<&ProbeResult> {
        self.probe.as_ref()
    }

    /// Read a property from the open device.
    pub fn property(&self, property: Property) -> Result<f64> {
        self.device
            .as_ref()
            .ok_or(CameraError::DeviceNotFound(self.device_id))?
            .property(property)
    }

    /// Open the device with the first capture API that works.
    pub fn initialize(&mut self) -> Result<()> {
        self.release();
        self.probe = None;

        let mut last_error = CameraError::DeviceNotFound(self.device_id);
        for api in DEFAULT_CAPTURE_APIS {
            match self.opener.open(api, self.device_id) {
                Ok(device) => {
                    info!(?api, device_id = self.device_id, "camera opened");
                    self.device = Some(device);
                    break;
                }
                Err(err) => {
                    debug!(?api, error = %err, "capture api failed to open");
                    last_error = err;
                }
            }
        }
        if self.device.is_none() {
            return Err(last_error);
        }

        self.write(Property::AutoExposure, INITIAL_AUTO_EXPOSURE);
        self.write(Property::Brightness, MID_LEVEL);
        if !self.timing.warmup.is_zero() {
            thread::sleep(self.timing.warmup);
        }

        self.log_properties("initial camera properties");
        self.report_test_frame();
        Ok(())
    }

    /// Apply resolution, framerate and exposure/gain policy.
    pub fn configure(&mut self, config: &CameraConfig) -> std::result::Result<ProbeResult, ConfigError> {
        let device = self.device.as_mut().ok_or(ConfigError::NotInitialized)?;

        info!(resolution = %config.resolution, "setting resolution");
        device.set_property(Property::Width, f64::from(config.resolution.width))?;
        device.set_property(Property::Height, f64::from(config.resolution.height))?;
        let negotiated = negotiated_resolution(&**device)?;
        if negotiated != config.resolution {
            return Err(ConfigError::ResolutionMismatch {
                requested: config.resolution,
                negotiated,
            });
        }
        info!(framerate = config.framerate, "setting framerate");
        self.write(Property::Fps, config.framerate);

        let result = if config.auto_gain {
            info!("probing auto exposure settings");
            let settle = self.timing.probe_settle;
            let result = probe::probe_auto_exposure(
                self,
                BackendKind::Generic,
                &AUTO_EXPOSURE_CANDIDATES,
                settle,
            );
            self.write(Property::Brightness, MID_LEVEL);
            self.write(Property::Contrast, MID_LEVEL);
            result
        } else {
            let exposure_ms = config.exposure_ms();
            info!(exposure_ms, gain = config.gain, "setting manual exposure");
            self.write(Property::AutoExposure, MANUAL_EXPOSURE);
            self.write(Property::Exposure, exposure_ms);
            self.write(Property::Gain, config.gain);
            ProbeResult::manual(BackendKind::Generic, exposure_ms, config.gain)
        };

        self.log_properties("final camera configuration");
        self.probe = Some(result.clone());
        Ok(result)
    }

    /// Read one frame. Never fails; problems show up as an invalid sample.
    pub fn get_frame(&mut self) -> FrameSample {
        let timestamp = wall_clock_secs();
        match self.device.as_mut() {
            Some(device) => FrameSample::from_read(timestamp, device.read_frame()),
            None => FrameSample::failed(timestamp),
        }
    }

    /// Close the device. Idempotent.
    pub fn release(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.release();
            info!(device_id = self.device_id, "camera released");
        }
    }

    /// Best-effort property write: unsupported properties are skipped.
    fn write(&mut self, property: Property, value: f64) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        match device.set_property(property, value) {
            Ok(()) => debug!(?property, value, "property set"),
            Err(err) => debug!(?property, value, error = %err, "property not applied"),
        }
    }

    fn log_properties(&self, heading: &str) {
        let Some(device) = self.device.as_ref() else {
            return;
        };
        info!("{heading}:");
        for property in Property::ALL {
            match device.property(property) {
                Ok(value) => info!("  {property:?}: {value}"),
                Err(err) => debug!("  {property:?}: unavailable ({err})"),
            }
        }
    }

    fn report_test_frame(&mut self) {
        let sample = self.get_frame();
        match sample.frame {
            Some(frame) => {
                let stats = FrameStats::of(&frame);
                if stats.is_black() {
                    warn!("test frame is completely black");
                    return;
                }
                info!(
                    resolution = %frame.resolution(),
                    fourcc = %frame.fourcc,
                    min = stats.min,
                    max = stats.max,
                    mean = format_args!("{:.2}", stats.mean),
                    "test frame captured"
                );
            }
            None => warn!("failed to capture test frame"),
        }
    }
}

/// The frame size the driver settled on after `Width`/`Height` writes.
fn negotiated_resolution(device: &dyn CaptureDevice) -> Result<Resolution> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let dimension = |property| device.property(property).map(|value| value as u32);
    Ok(Resolution::new(
        dimension(Property::Width)?,
        dimension(Property::Height)?,
    ))
}

impl ProbeTarget for GenericBackend {
    fn apply_auto_exposure(&mut self, value: f64) -> Result<()> {
        self.device
            .as_mut()
            .ok_or(CameraError::DeviceNotFound(self.device_id))?
            .set_property(Property::AutoExposure, value)
    }

    fn sample(&mut self) -> FrameSample {
        self.get_frame()
    }
}

impl Drop for GenericBackend {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDevice, MockOpener};

    fn config(auto_gain: bool) -> CameraConfig {
        CameraConfig {
            resolution: Resolution::new(640, 480),
            framerate: 30.0,
            pixel_depth: 8,
            exposure_time_us: 10_000.0,
            gain: 4.0,
            auto_gain,
            device_id: 0,
        }
    }

    #[test]
    fn test_configure_before_initialize() {
        let opener = MockOpener::new(MockDevice::new());
        let mut backend = GenericBackend::new(Box::new(opener), 0, Timing::immediate());
        let err = backend.configure(&config(true)).expect_err("not initialized");
        assert!(matches!(err, ConfigError::NotInitialized));
    }

    #[test]
    fn test_first_api_that_opens_is_used() {
        let opener = MockOpener::new(MockDevice::new()).rejecting(CaptureApi::Auto);
        let log = opener.attempts();
        let mut backend = GenericBackend::new(Box::new(opener), 0, Timing::immediate());

        backend.initialize().expect("second api should open");
        assert_eq!(backend.api(), Some(CaptureApi::V4l2UserPtr));
        assert_eq!(
            *log.borrow(),
            vec![CaptureApi::Auto, CaptureApi::V4l2UserPtr]
        );
    }

    #[test]
    fn test_initialize_fails_when_no_api_opens() {
        let opener = MockOpener::new(MockDevice::new())
            .rejecting(CaptureApi::Auto)
            .rejecting(CaptureApi::V4l2UserPtr);
        let mut backend = GenericBackend::new(Box::new(opener), 0, Timing::immediate());
        assert!(backend.initialize().is_err());
        assert!(!backend.is_initialized());
    }

    #[test]
    fn test_initialize_writes_startup_properties() {
        let device = MockDevice::new();
        let state = device.state();
        let mut backend =
            GenericBackend::new(Box::new(MockOpener::new(device)), 0, Timing::immediate());
        backend.initialize().expect("initialize");

        let state = state.borrow();
        assert_eq!(state.properties.get(&Property::AutoExposure), Some(&0.75));
        assert_eq!(state.properties.get(&Property::Brightness), Some(&0.5));
        // the startup test frame
        assert_eq!(state.reads, 1);
    }

    #[test]
    fn test_manual_exposure_in_milliseconds() {
        let device = MockDevice::new();
        let state = device.state();
        let mut backend =
            GenericBackend::new(Box::new(MockOpener::new(device)), 0, Timing::immediate());
        backend.initialize().expect("initialize");

        let result = backend.configure(&config(false)).expect("configure");
        assert_eq!(result.settings.exposure, Some(10.0));
        assert_eq!(result.attempts, 0);

        let state = state.borrow();
        assert_eq!(state.properties.get(&Property::AutoExposure), Some(&0.0));
        assert_eq!(state.properties.get(&Property::Exposure), Some(&10.0));
        assert_eq!(state.properties.get(&Property::Gain), Some(&4.0));
        assert_eq!(state.properties.get(&Property::Width), Some(&640.0));
        assert_eq!(state.properties.get(&Property::Height), Some(&480.0));
        assert_eq!(state.properties.get(&Property::Fps), Some(&30.0));
    }

    #[test]
    fn test_clamped_resolution_fails_configure() {
        let device = MockDevice::new().with_max_resolution(Resolution::new(320, 240));
        let state = device.state();
        let mut backend =
            GenericBackend::new(Box::new(MockOpener::new(device)), 0, Timing::immediate());
        backend.initialize().expect("initialize");

        let err = backend.configure(&config(false)).expect_err("size clamped");
        assert!(err.to_string().contains("320x240"));
        assert!(matches!(
            err,
            ConfigError::ResolutionMismatch { requested, negotiated }
                if requested == Resolution::new(640, 480)
                    && negotiated == Resolution::new(320, 240)
        ));
        // exposure policy is not applied to a camera of the wrong size
        assert_eq!(state.borrow().properties.get(&Property::Exposure), None);
        assert!(backend.probe_result().is_none());
    }

    #[test]
    fn test_configure_is_idempotent() {
        for auto_gain in [true, false] {
            let device = MockDevice::new().lit_only_with_auto_exposure(1.0);
            let state = device.state();
            let mut backend =
                GenericBackend::new(Box::new(MockOpener::new(device)), 0, Timing::immediate());
            backend.initialize().expect("initialize");

            let first = backend.configure(&config(auto_gain)).expect("configure");
            let after_first = state.borrow().properties.clone();
            let second = backend.configure(&config(auto_gain)).expect("configure");
            let after_second = state.borrow().properties.clone();

            assert_eq!(after_first, after_second);
            assert_eq!(first.settings, second.settings);
        }
    }

    #[test]
    fn test_unsupported_property_is_skipped() {
        let device = MockDevice::new().without_property(Property::Contrast);
        let mut backend =
            GenericBackend::new(Box::new(MockOpener::new(device)), 0, Timing::immediate());
        backend.initialize().expect("initialize");
        assert!(backend.configure(&config(true)).is_ok());
    }

    #[test]
    fn test_release_is_idempotent() {
        let device = MockDevice::new();
        let state = device.state();
        let mut backend =
            GenericBackend::new(Box::new(MockOpener::new(device)), 0, Timing::immediate());
        backend.release();
        backend.initialize().expect("initialize");
        backend.release();
        backend.release();
        assert_eq!(state.borrow().releases, 1);
        assert!(!backend.get_frame().is_valid);
    }
}
