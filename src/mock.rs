//! Mock devices, SDKs and sinks for testing without hardware.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use crate::preview::PreviewSurface;
use crate::sink::{check_frame, SinkError, SinkFactory, VideoSink};
use crate::traits::{
    CameraError, CaptureApi, CaptureDevice, CaptureOpener, FourCC, Frame, Property, Resolution,
    Result,
};
use crate::vendor::{
    VendorDevice, VendorDeviceInfo, VendorSdk, EXPOSURE_AUTO, EXPOSURE_TIME, FRAME_RATE, GAIN,
    HEIGHT, WIDTH,
};

/// Frame size until `Width`/`Height` are written.
const DEFAULT_RESOLUTION: Resolution = Resolution::new(640, 480);

/// Observable state shared by every clone of a [`MockDevice`].
#[derive(Debug, Default)]
pub struct MockState {
    /// Last value written per property.
    pub properties: HashMap<Property, f64>,
    /// Frames read.
    pub reads: usize,
    /// Times the device was released.
    pub releases: usize,
}

/// Generic capture device producing YUYV color bars.
#[derive(Debug, Clone)]
pub struct MockDevice {
    state: Rc<RefCell<MockState>>,
    api: CaptureApi,
    lit_at: Option<f64>,
    unsupported: Vec<Property>,
    max_resolution: Option<Resolution>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Device that supports every property and always produces lit frames.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::default(),
            api: CaptureApi::Auto,
            lit_at: None,
            unsupported: Vec::new(),
            max_resolution: None,
        }
    }

    /// Produce black frames unless auto exposure is set to `value`.
    #[must_use]
    pub fn lit_only_with_auto_exposure(mut self, value: f64) -> Self {
        self.lit_at = Some(value);
        self
    }

    /// Reject reads and writes of `property`.
    #[must_use]
    pub fn without_property(mut self, property: Property) -> Self {
        self.unsupported.push(property);
        self
    }

    /// Clamp `Width`/`Height` writes to `max`, like a driver negotiating
    /// the closest size it supports.
    #[must_use]
    pub fn with_max_resolution(mut self, max: Resolution) -> Self {
        self.max_resolution = Some(max);
        self
    }

    /// Shared state for assertions.
    #[must_use]
    pub fn state(&self) -> Rc<RefCell<MockState>> {
        Rc::clone(&self.state)
    }

    fn check(&self, property: Property) -> Result<()> {
        if self.unsupported.contains(&property) {
            return Err(CameraError::PropertyNotSupported(format!("{property:?}")));
        }
        Ok(())
    }

    fn resolution(state: &MockState) -> Resolution {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let dimension = |property, default: u32| {
            state
                .properties
                .get(&property)
                .map_or(default, |&value| value as u32)
        };
        Resolution::new(
            dimension(Property::Width, DEFAULT_RESOLUTION.width),
            dimension(Property::Height, DEFAULT_RESOLUTION.height),
        )
    }
}

impl CaptureDevice for MockDevice {
    fn api(&self) -> CaptureApi {
        self.api
    }

    fn set_property(&mut self, property: Property, value: f64) -> Result<()> {
        self.check(property)?;
        let value = match (property, self.max_resolution) {
            (Property::Width, Some(max)) => value.min(f64::from(max.width)),
            (Property::Height, Some(max)) => value.min(f64::from(max.height)),
            _ => value,
        };
        self.state.borrow_mut().properties.insert(property, value);
        Ok(())
    }

    fn property(&self, property: Property) -> Result<f64> {
        self.check(property)?;
        self.state
            .borrow()
            .properties
            .get(&property)
            .copied()
            .ok_or_else(|| CameraError::PropertyNotSupported(format!("{property:?} unset")))
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let mut state = self.state.borrow_mut();
        state.reads += 1;

        let resolution = Self::resolution(&state);
        let lit = self.lit_at.map_or(true, |wanted| {
            state.properties.get(&Property::AutoExposure) == Some(&wanted)
        });
        let mut data = vec![0; (resolution.width * resolution.height * 2) as usize];
        if lit {
            color_bars(&mut data, resolution.width, resolution.height);
        }

        #[allow(clippy::cast_possible_truncation)]
        let sequence = state.reads as u32;
        let mut frame = Frame::new(data, resolution.width, resolution.height, FourCC::YUYV);
        frame.metadata.sequence = sequence;
        Ok(frame)
    }

    fn release(&mut self) {
        self.state.borrow_mut().releases += 1;
    }
}

/// Opens clones of one [`MockDevice`], optionally refusing some APIs.
#[derive(Debug)]
pub struct MockOpener {
    device: MockDevice,
    rejected: Vec<CaptureApi>,
    attempts: Rc<RefCell<Vec<CaptureApi>>>,
}

impl MockOpener {
    /// Opener handing out `device`.
    #[must_use]
    pub fn new(device: MockDevice) -> Self {
        Self {
            device,
            rejected: Vec::new(),
            attempts: Rc::default(),
        }
    }

    /// Fail every open through `api`.
    #[must_use]
    pub fn rejecting(mut self, api: CaptureApi) -> Self {
        self.rejected.push(api);
        self
    }

    /// Every API an open was attempted with, in order.
    #[must_use]
    pub fn attempts(&self) -> Rc<RefCell<Vec<CaptureApi>>> {
        Rc::clone(&self.attempts)
    }
}

impl CaptureOpener for MockOpener {
    fn open(&self, api: CaptureApi, device_id: u32) -> Result<Box<dyn CaptureDevice>> {
        self.attempts.borrow_mut().push(api);
        if self.rejected.contains(&api) {
            return Err(CameraError::DeviceOpenFailed(format!(
                "mock device {device_id} refuses {api:?}"
            )));
        }
        let mut device = self.device.clone();
        device.api = api;
        Ok(Box::new(device))
    }
}

/// Observable state of a [`MockVendorSdk`] and its device.
#[derive(Debug, Default)]
pub struct MockVendorState {
    /// Acquisition running.
    pub streaming: bool,
    /// Last value written per feature.
    pub features: HashMap<String, f64>,
    /// Every `ExposureAuto` write, in order.
    pub exposure_auto_history: Vec<f64>,
    /// Times the device was closed.
    pub closes: usize,
}

/// Vendor SDK with zero or one attached device producing gray frames.
#[derive(Debug, Clone)]
pub struct MockVendorSdk {
    devices: Vec<VendorDeviceInfo>,
    lit_at: Option<f64>,
    max_resolution: Option<Resolution>,
    state: Rc<RefCell<MockVendorState>>,
}

impl MockVendorSdk {
    /// SDK with one attached camera.
    #[must_use]
    pub fn with_device() -> Self {
        Self {
            devices: vec![VendorDeviceInfo {
                serial_number: "MOCK0001".to_owned(),
                vendor_name: "Mock Vision".to_owned(),
                model_name: "MV-1".to_owned(),
            }],
            lit_at: None,
            max_resolution: None,
            state: Rc::default(),
        }
    }

    /// SDK with nothing attached.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            devices: Vec::new(),
            ..Self::with_device()
        }
    }

    /// Produce black frames unless `ExposureAuto` is set to `value`.
    #[must_use]
    pub fn lit_only_with_exposure_auto(mut self, value: f64) -> Self {
        self.lit_at = Some(value);
        self
    }

    /// Clamp `Width`/`Height` writes to `max`.
    #[must_use]
    pub fn with_max_resolution(mut self, max: Resolution) -> Self {
        self.max_resolution = Some(max);
        self
    }

    /// Shared state for assertions.
    #[must_use]
    pub fn state(&self) -> Rc<RefCell<MockVendorState>> {
        Rc::clone(&self.state)
    }
}

impl VendorSdk for MockVendorSdk {
    fn enumerate(&mut self) -> Result<Vec<VendorDeviceInfo>> {
        Ok(self.devices.clone())
    }

    fn open_by_serial(&mut self, serial_number: &str) -> Result<Box<dyn VendorDevice>> {
        if !self
            .devices
            .iter()
            .any(|device| device.serial_number == serial_number)
        {
            return Err(CameraError::DeviceOpenFailed(serial_number.to_owned()));
        }
        Ok(Box::new(MockVendorDevice {
            lit_at: self.lit_at,
            max_resolution: self.max_resolution,
            state: Rc::clone(&self.state),
        }))
    }
}

struct MockVendorDevice {
    lit_at: Option<f64>,
    max_resolution: Option<Resolution>,
    state: Rc<RefCell<MockVendorState>>,
}

const MOCK_FEATURES: [&str; 6] = [EXPOSURE_TIME, GAIN, EXPOSURE_AUTO, WIDTH, HEIGHT, FRAME_RATE];

impl VendorDevice for MockVendorDevice {
    fn is_implemented(&self, feature: &str) -> bool {
        MOCK_FEATURES.contains(&feature)
    }

    fn set_float_feature(&mut self, feature: &str, value: f64) -> Result<()> {
        if !self.is_implemented(feature) {
            return Err(CameraError::PropertyNotSupported(feature.to_owned()));
        }
        let value = match (feature, self.max_resolution) {
            (WIDTH, Some(max)) => value.min(f64::from(max.width)),
            (HEIGHT, Some(max)) => value.min(f64::from(max.height)),
            _ => value,
        };
        let mut state = self.state.borrow_mut();
        if feature == EXPOSURE_AUTO {
            state.exposure_auto_history.push(value);
        }
        state.features.insert(feature.to_owned(), value);
        Ok(())
    }

    fn float_feature(&self, feature: &str) -> Result<f64> {
        self.state
            .borrow()
            .features
            .get(feature)
            .copied()
            .ok_or_else(|| CameraError::PropertyNotSupported(feature.to_owned()))
    }

    fn stream_on(&mut self) -> Result<()> {
        self.state.borrow_mut().streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        self.state.borrow_mut().streaming = false;
        Ok(())
    }

    fn get_image(&mut self, _timeout: Duration) -> Result<Frame> {
        let state = self.state.borrow();
        if !state.streaming {
            return Err(CameraError::Timeout);
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let dimension = |feature: &str, default: u32| {
            state
                .features
                .get(feature)
                .map_or(default, |&value| value as u32)
        };
        let width = dimension(WIDTH, 64);
        let height = dimension(HEIGHT, 48);
        let lit = self
            .lit_at
            .map_or(true, |wanted| state.features.get(EXPOSURE_AUTO) == Some(&wanted));
        let value = if lit { 128 } else { 0 };
        Ok(Frame::new(
            vec![value; (width * height) as usize],
            width,
            height,
            FourCC::GREY,
        ))
    }

    fn close(&mut self) -> Result<()> {
        self.state.borrow_mut().closes += 1;
        Ok(())
    }
}

/// Sink keeping every frame in memory.
pub struct MemorySink {
    resolution: Resolution,
    frames: Rc<RefCell<Vec<Frame>>>,
    written: u64,
    finished: bool,
}

impl VideoSink for MemorySink {
    fn write_frame(&mut self, frame: &Frame) -> std::result::Result<(), SinkError> {
        if self.finished {
            return Err(SinkError::Finished);
        }
        check_frame(self.resolution, frame)?;
        self.frames.borrow_mut().push(frame.clone());
        self.written += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.written
    }

    fn finish(&mut self) -> std::result::Result<(), SinkError> {
        self.finished = true;
        Ok(())
    }
}

/// Opens [`MemorySink`]s that all append to one shared frame list.
#[derive(Debug, Default)]
pub struct MemorySinkFactory {
    frames: Rc<RefCell<Vec<Frame>>>,
}

impl MemorySinkFactory {
    /// Factory with an empty frame list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames written through any sink from this factory.
    #[must_use]
    pub fn frames(&self) -> Rc<RefCell<Vec<Frame>>> {
        Rc::clone(&self.frames)
    }
}

impl SinkFactory for MemorySinkFactory {
    fn open(
        &self,
        _path: &Path,
        resolution: Resolution,
        _framerate: f64,
    ) -> std::result::Result<Box<dyn VideoSink>, SinkError> {
        Ok(Box::new(MemorySink {
            resolution,
            frames: Rc::clone(&self.frames),
            written: 0,
            finished: false,
        }))
    }
}

/// What a [`MockPreview`] has been shown.
#[derive(Debug, Default)]
pub struct PreviewState {
    /// Frames shown.
    pub shown: usize,
    /// Most recent frame shown.
    pub last: Option<Frame>,
    /// Whether `close` was called.
    pub closed: bool,
}

/// Preview surface recording what it is shown.
#[derive(Debug, Default)]
pub struct MockPreview {
    state: Rc<RefCell<PreviewState>>,
}

impl MockPreview {
    /// Preview with nothing shown yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared state for assertions.
    #[must_use]
    pub fn state(&self) -> Rc<RefCell<PreviewState>> {
        Rc::clone(&self.state)
    }
}

impl PreviewSurface for MockPreview {
    fn show(&mut self, frame: &Frame, _fps: f64) {
        let mut state = self.state.borrow_mut();
        state.shown += 1;
        state.last = Some(frame.clone());
    }

    fn close(&mut self) {
        self.state.borrow_mut().closed = true;
    }
}

/// Fill a YUYV buffer with eight vertical color bars.
fn color_bars(data: &mut [u8], width: u32, height: u32) {
    // White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    let bars: [[u8; 4]; 8] = [
        [235, 128, 235, 128],
        [210, 16, 210, 146],
        [170, 166, 170, 16],
        [145, 54, 145, 34],
        [106, 202, 106, 222],
        [81, 90, 81, 240],
        [41, 240, 41, 110],
        [16, 128, 16, 128],
    ];
    let bar_width = (width / 8).max(1);

    for (index, pair) in data.chunks_exact_mut(4).enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let x = (index as u32 * 2) % width.max(1);
        let bar = (x / bar_width).min(7) as usize;
        if let Some(values) = bars.get(bar) {
            pair.copy_from_slice(values);
        }
    }
    debug_assert_eq!(data.len(), (width * height * 2) as usize);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_frame_follows_resolution() {
        let mut device = MockDevice::new();
        let frame = device.read_frame().expect("read");
        assert_eq!(frame.resolution(), DEFAULT_RESOLUTION);
        assert_eq!(frame.data.len(), 640 * 480 * 2);

        device.set_property(Property::Width, 320.0).expect("width");
        device.set_property(Property::Height, 240.0).expect("height");
        let frame = device.read_frame().expect("read");
        assert_eq!(frame.resolution(), Resolution::new(320, 240));
        assert_eq!(device.state().borrow().reads, 2);
    }

    #[test]
    fn test_color_bars_pattern() {
        let mut device = MockDevice::new();
        let frame = device.read_frame().expect("read");
        // first bar is white, last is black
        assert_eq!(frame.data.first(), Some(&235));
        assert_eq!(frame.pixel_at(639, 0), Some((16, 16, 16)));
        assert!(!frame.is_degenerate());
    }

    #[test]
    fn test_lit_only_with_auto_exposure() {
        let mut device = MockDevice::new().lit_only_with_auto_exposure(2.0);
        assert!(device.read_frame().expect("read").is_degenerate());
        device.set_property(Property::AutoExposure, 2.0).expect("write");
        assert!(!device.read_frame().expect("read").is_degenerate());
    }

    #[test]
    fn test_max_resolution_clamps_size_writes() {
        let mut device = MockDevice::new().with_max_resolution(Resolution::new(320, 240));
        device.set_property(Property::Width, 640.0).expect("width");
        device.set_property(Property::Height, 120.0).expect("height");
        assert_eq!(device.property(Property::Width).expect("width"), 320.0);
        assert_eq!(device.property(Property::Height).expect("height"), 120.0);
        assert_eq!(
            device.read_frame().expect("read").resolution(),
            Resolution::new(320, 120)
        );
    }

    #[test]
    fn test_opener_records_attempts() {
        let opener = MockOpener::new(MockDevice::new()).rejecting(CaptureApi::Auto);
        assert!(opener.open(CaptureApi::Auto, 0).is_err());
        let device = opener.open(CaptureApi::V4l2UserPtr, 0).expect("open");
        assert_eq!(device.api(), CaptureApi::V4l2UserPtr);
        assert_eq!(opener.attempts().borrow().len(), 2);
    }
}
