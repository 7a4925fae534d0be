//! Core traits and types shared by every camera backend.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Pixel format representation (e.g., YUYV, MJPG, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
    /// GREY pixel format (8-bit mono).
    pub const GREY: Self = Self::new(b"GREY");

    /// Bytes per pixel for packed raw formats, `None` for compressed ones.
    #[must_use]
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            Self::GREY => Some(1),
            Self::YUYV => Some(2),
            Self::RGB3 => Some(3),
            _ => None,
        }
    }
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct Resolution {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
}

impl Resolution {
    /// Create a new resolution.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Metadata for a captured frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Driver capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// A captured video frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw frame data.
    pub data: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel layout of `data`.
    pub fourcc: FourCC,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

impl Frame {
    /// Wrap raw pixel data.
    #[must_use]
    pub fn new(data: Vec<u8>, width: u32, height: u32, fourcc: FourCC) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let bytes_used = data.len() as u32;
        Self {
            data,
            width,
            height,
            fourcc,
            metadata: FrameMetadata {
                bytes_used,
                ..FrameMetadata::default()
            },
        }
    }

    /// Frame dimensions as a [`Resolution`].
    #[must_use]
    pub const fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// True when the frame carries no samples at all (a `(0, 0)` read).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    /// A frame is degenerate when it is empty or every sample is zero.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.is_empty() || self.data.iter().all(|&sample| sample == 0)
    }

    /// Get RGB values for a pixel at the specified coordinates.
    ///
    /// Returns `None` if the coordinates are out of bounds or the frame is
    /// compressed.
    ///
    /// # Notes
    ///
    /// For YUYV, odd x coordinates use the Y value from the second pixel of
    /// the pair with the shared U/V values.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.width || y >= self.height {
            return None;
        }

        match self.fourcc {
            FourCC::GREY => {
                let value = *self.data.get((y * self.width + x) as usize)?;
                Some((value, value, value))
            }
            FourCC::RGB3 => {
                let offset = ((y * self.width + x) * 3) as usize;
                let rgb = self.data.get(offset..offset + 3)?;
                Some((*rgb.first()?, *rgb.get(1)?, *rgb.get(2)?))
            }
            FourCC::YUYV => {
                // YUYV format: [Y0 U Y1 V] repeats
                let pair_x = x & !1;
                let offset = ((y * self.width + pair_x) * 2) as usize;

                let y_val = if x % 2 == 0 {
                    *self.data.get(offset)?
                } else {
                    *self.data.get(offset + 2)?
                };
                let u = *self.data.get(offset + 1)?;
                let v = *self.data.get(offset + 3)?;

                Some(yuv_to_rgb(y_val, u, v))
            }
            _ => None,
        }
    }
}

/// Convert YUV values to RGB.
///
/// Uses the ITU-R BT.601 conversion formula.
///
/// # Returns
///
/// RGB tuple with values clamped to 0-255 range.
#[must_use]
#[allow(clippy::many_single_char_names)]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let clamp = |val: f32| -> u8 { val.clamp(0.0, 255.0) as u8 };

    (clamp(r), clamp(g), clamp(b))
}

/// One timestamped acquisition attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSample {
    /// Wall-clock capture time in seconds since the UNIX epoch.
    pub timestamp: f64,
    /// The frame, if the read itself succeeded.
    pub frame: Option<Frame>,
    /// False when the read failed or the frame is degenerate.
    pub is_valid: bool,
}

impl FrameSample {
    /// Build a sample from a read result, judging validity on the way.
    #[must_use]
    pub fn from_read(timestamp: f64, read: Result<Frame>) -> Self {
        match read {
            Ok(frame) => {
                let is_valid = !frame.is_degenerate();
                Self {
                    timestamp,
                    frame: Some(frame),
                    is_valid,
                }
            }
            Err(_) => Self::failed(timestamp),
        }
    }

    /// A sample for a read that produced nothing.
    #[must_use]
    pub const fn failed(timestamp: f64) -> Self {
        Self {
            timestamp,
            frame: None,
            is_valid: false,
        }
    }
}

/// Seconds since the UNIX epoch, as stored in timestamp documents.
#[must_use]
pub fn wall_clock_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |elapsed| elapsed.as_secs_f64())
}

/// Device properties written through the generic capture path.
///
/// Units: `Exposure` is milliseconds, `Brightness` and `Contrast` are
/// normalised to `0.0..=1.0`, `AutoExposure` uses the capture-framework
/// convention (`0.25`/`0` manual, `0.75` auto, other integers are the
/// driver's own mode index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    /// Frame width in pixels.
    Width,
    /// Frame height in pixels.
    Height,
    /// Frames per second.
    Fps,
    /// Auto-exposure mode.
    AutoExposure,
    /// Exposure time in milliseconds.
    Exposure,
    /// Analog gain.
    Gain,
    /// Normalised brightness.
    Brightness,
    /// Normalised contrast.
    Contrast,
}

impl Property {
    /// Every property, in the order they are reported.
    pub const ALL: [Self; 8] = [
        Self::Width,
        Self::Height,
        Self::Fps,
        Self::Brightness,
        Self::Contrast,
        Self::Exposure,
        Self::AutoExposure,
        Self::Gain,
    ];
}

/// Capture I/O strategy tried by the generic backend, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureApi {
    /// Let the driver pick its preferred streaming I/O (memory-mapped buffers).
    Auto,
    /// V4L2 user-pointer streaming, for drivers without mmap support.
    V4l2UserPtr,
}

/// Error type for device-level camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Device with given index was not found.
    #[error("Device {0} not found")]
    DeviceNotFound(u32),
    /// Failed to open device.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// The device does not implement a property or feature.
    #[error("Property not supported: {0}")]
    PropertyNotSupported(String),
    /// Error during streaming operation.
    #[error("Stream error: {0}")]
    StreamError(String),
    /// Operation timed out.
    #[error("Operation timed out")]
    Timeout,
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// An opened device on the generic capture path.
pub trait CaptureDevice {
    /// The capture API this device was opened with.
    fn api(&self) -> CaptureApi;

    /// Write a property.
    fn set_property(&mut self, property: Property, value: f64) -> Result<()>;

    /// Read a property back from the device.
    fn property(&self, property: Property) -> Result<f64>;

    /// Read one frame, bounded by the device read timeout.
    fn read_frame(&mut self) -> Result<Frame>;

    /// Stop streaming and close the device. Safe to call more than once.
    fn release(&mut self);
}

/// Opens generic capture devices with a given capture API.
pub trait CaptureOpener {
    /// Open `device_id` using `api`, returning a device that reports opened.
    fn open(&self, api: CaptureApi, device_id: u32) -> Result<Box<dyn CaptureDevice>>;
}
