//! V4L2 device implementation using the v4l crate.

use std::time::Duration;

use tracing::debug;
use v4l::buffer::Type;
use v4l::control::{Control, Description, Value};
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::io::userptr::Stream as UserPtrStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::Device;

use crate::config::Timing;
use crate::traits::{
    CameraError, CaptureApi, CaptureDevice, CaptureOpener, FourCC, Frame, FrameMetadata,
    Property, Result,
};

const CID_BRIGHTNESS: u32 = 0x0098_0900;
const CID_CONTRAST: u32 = 0x0098_0901;
const CID_GAIN: u32 = 0x0098_0913;
const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;

/// `V4L2_EXPOSURE_MANUAL` menu index.
const EXPOSURE_MANUAL: i64 = 1;
/// `V4L2_EXPOSURE_APERTURE_PRIORITY` menu index.
const EXPOSURE_APERTURE_PRIORITY: i64 = 3;

/// Buffers queued for streaming capture.
const BUFFER_COUNT: u32 = 4;

/// Opens `/dev/videoN` through V4L2.
#[derive(Debug, Clone, Copy)]
pub struct V4l2Opener {
    read_timeout: Duration,
}

impl V4l2Opener {
    /// Opener whose devices wait at most `read_timeout` for a frame.
    #[must_use]
    pub const fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }

    /// Per-frame read timeout handed to opened devices.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}

impl Default for V4l2Opener {
    fn default() -> Self {
        Self::new(Timing::default().read_timeout)
    }
}

impl CaptureOpener for V4l2Opener {
    fn open(&self, api: CaptureApi, device_id: u32) -> Result<Box<dyn CaptureDevice>> {
        let mut device = V4L2Device::open(device_id, api, self.read_timeout)?;
        // A stream that starts is what "opened" means for this API.
        device.ensure_stream()?;
        Ok(Box::new(device))
    }
}

enum V4L2Stream {
    Mmap(MmapStream<'static>),
    UserPtr(UserPtrStream),
}

impl V4L2Stream {
    fn start(device: &Device, api: CaptureApi, read_timeout: Duration) -> Result<Self> {
        let mut stream = match api {
            CaptureApi::Auto => MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                .map(Self::Mmap),
            CaptureApi::V4l2UserPtr => {
                UserPtrStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                    .map(Self::UserPtr)
            }
        }
        .map_err(|err| CameraError::StreamError(err.to_string()))?;

        match &mut stream {
            Self::Mmap(inner) => inner.set_timeout(read_timeout),
            Self::UserPtr(inner) => inner.set_timeout(read_timeout),
        }
        Ok(stream)
    }

    fn next(&mut self) -> std::io::Result<(Vec<u8>, FrameMetadata)> {
        let (buf, meta) = match self {
            Self::Mmap(inner) => inner.next()?,
            Self::UserPtr(inner) => inner.next()?,
        };

        // V4L2 timestamps are always non-negative in practice
        #[allow(clippy::cast_sign_loss)]
        let secs = meta.timestamp.sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

        let used = (meta.bytesused as usize).min(buf.len());
        let data = buf.get(..used).unwrap_or(buf).to_vec();
        Ok((
            data,
            FrameMetadata {
                sequence: meta.sequence,
                timestamp: Duration::new(secs, nanos),
                bytes_used: meta.bytesused,
            },
        ))
    }
}

/// V4L2 device implementation wrapping the v4l crate.
pub struct V4L2Device {
    // Field order matters: the stream is dropped (stream-off) before the device.
    stream: Option<V4L2Stream>,
    device: Device,
    api: CaptureApi,
    read_timeout: Duration,
    controls: Vec<Description>,
    width: u32,
    height: u32,
    /// Bytes per row in driver buffers, padding included.
    stride: u32,
    fourcc: FourCC,
}

impl V4L2Device {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    ///
    /// Reads wait at most `read_timeout` for a frame.
    pub fn open(index: u32, api: CaptureApi, read_timeout: Duration) -> Result<Self> {
        let device = Device::new(index as usize)
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let caps = device
            .query_caps()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::DeviceOpenFailed(format!(
                "{} cannot capture video",
                caps.card
            )));
        }
        debug!(card = %caps.card, driver = %caps.driver, bus = %caps.bus, "v4l2 device");

        let controls = device.query_controls().unwrap_or_default();
        let mut fmt = device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        fmt.fourcc = FourCC::YUYV.into();
        let fmt = device
            .set_format(&fmt)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        Ok(Self {
            stream: None,
            device,
            api,
            read_timeout,
            controls,
            width: fmt.width,
            height: fmt.height,
            stride: fmt.stride,
            fourcc: FourCC::from(fmt.fourcc),
        })
    }

    fn ensure_stream(&mut self) -> Result<&mut V4L2Stream> {
        if self.stream.is_none() {
            self.stream = Some(V4L2Stream::start(&self.device, self.api, self.read_timeout)?);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| CameraError::StreamError("stream not started".to_owned()))
    }

    /// Change the frame size. Streaming stops until the next read.
    fn set_size(&mut self, width: u32, height: u32) -> Result<()> {
        self.stream = None;
        let mut fmt = self
            .device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        fmt.width = width;
        fmt.height = height;
        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        if fmt.fourcc.repr != FourCC::YUYV.0 {
            debug!(fourcc = %FourCC::from(fmt.fourcc), "driver chose a different format");
        }
        self.width = fmt.width;
        self.height = fmt.height;
        self.stride = fmt.stride;
        self.fourcc = FourCC::from(fmt.fourcc);
        Ok(())
    }

    fn set_fps(&mut self, fps: f64) -> Result<()> {
        self.stream = None;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let fps = fps.round().max(1.0) as u32;
        self.device
            .set_params(&Parameters::with_fps(fps))
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        Ok(())
    }

    fn describe(&self, id: u32, name: &str) -> Result<&Description> {
        self.controls
            .iter()
            .find(|desc| desc.id == id)
            .ok_or_else(|| CameraError::PropertyNotSupported(name.to_owned()))
    }

    fn write_control(&self, id: u32, name: &str, value: i64) -> Result<()> {
        let desc = self.describe(id, name)?;
        let value = value.clamp(desc.minimum, desc.maximum);
        self.device
            .set_control(Control {
                id,
                value: Value::Integer(value),
            })
            .map_err(|err| CameraError::StreamError(format!("{name}: {err}")))
    }

    fn read_control(&self, id: u32, name: &str) -> Result<i64> {
        self.describe(id, name)?;
        let control = self
            .device
            .control(id)
            .map_err(|err| CameraError::StreamError(format!("{name}: {err}")))?;
        match control.value {
            Value::Integer(value) => Ok(value),
            Value::Boolean(value) => Ok(i64::from(value)),
            _ => Err(CameraError::PropertyNotSupported(name.to_owned())),
        }
    }

    /// Map `0.0..=1.0` onto the control's range.
    fn write_normalised(&self, id: u32, name: &str, value: f64) -> Result<()> {
        let desc = self.describe(id, name)?;
        #[allow(clippy::cast_precision_loss)]
        let span = (desc.maximum - desc.minimum) as f64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let raw = desc.minimum + (value.clamp(0.0, 1.0) * span).round() as i64;
        self.write_control(id, name, raw)
    }

    fn read_normalised(&self, id: u32, name: &str) -> Result<f64> {
        let desc = self.describe(id, name)?;
        let raw = self.read_control(id, name)?;
        let span = desc.maximum - desc.minimum;
        if span <= 0 {
            return Ok(0.0);
        }
        #[allow(clippy::cast_precision_loss)]
        Ok((raw - desc.minimum) as f64 / span as f64)
    }
}

/// Drop per-row driver padding so rows are exactly `row_bytes` long.
///
/// Buffers without padding, or of a compressed layout, pass through.
fn strip_row_padding(data: Vec<u8>, row_bytes: usize, stride: usize) -> Vec<u8> {
    if row_bytes == 0 || stride <= row_bytes {
        return data;
    }
    data.chunks(stride)
        .flat_map(|row| row.get(..row_bytes).unwrap_or(row))
        .copied()
        .collect()
}

/// Translate the capture-framework auto-exposure convention to a V4L2 menu index.
fn exposure_auto_mode(value: f64) -> i64 {
    if value <= 0.25 {
        EXPOSURE_MANUAL
    } else if (value - 0.75).abs() < f64::EPSILON {
        EXPOSURE_APERTURE_PRIORITY
    } else {
        #[allow(clippy::cast_possible_truncation)]
        let mode = value.round() as i64;
        mode
    }
}

impl CaptureDevice for V4L2Device {
    fn api(&self) -> CaptureApi {
        self.api
    }

    fn set_property(&mut self, property: Property, value: f64) -> Result<()> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let pixels = value.round().max(0.0) as u32;
        match property {
            Property::Width => self.set_size(pixels, self.height),
            Property::Height => self.set_size(self.width, pixels),
            Property::Fps => self.set_fps(value),
            Property::AutoExposure => {
                self.write_control(CID_EXPOSURE_AUTO, "exposure_auto", exposure_auto_mode(value))
            }
            Property::Exposure => {
                // exposure_absolute counts 100 us units
                #[allow(clippy::cast_possible_truncation)]
                let units = (value * 10.0).round() as i64;
                self.write_control(CID_EXPOSURE_ABSOLUTE, "exposure_absolute", units)
            }
            Property::Gain => {
                #[allow(clippy::cast_possible_truncation)]
                let gain = value.round() as i64;
                self.write_control(CID_GAIN, "gain", gain)
            }
            Property::Brightness => self.write_normalised(CID_BRIGHTNESS, "brightness", value),
            Property::Contrast => self.write_normalised(CID_CONTRAST, "contrast", value),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn property(&self, property: Property) -> Result<f64> {
        match property {
            Property::Width => Ok(f64::from(self.width)),
            Property::Height => Ok(f64::from(self.height)),
            Property::Fps => {
                let params = self
                    .device
                    .params()
                    .map_err(|err| CameraError::StreamError(err.to_string()))?;
                let interval = params.interval;
                if interval.numerator == 0 {
                    return Ok(0.0);
                }
                Ok(f64::from(interval.denominator) / f64::from(interval.numerator))
            }
            Property::AutoExposure => self
                .read_control(CID_EXPOSURE_AUTO, "exposure_auto")
                .map(|mode| mode as f64),
            Property::Exposure => self
                .read_control(CID_EXPOSURE_ABSOLUTE, "exposure_absolute")
                .map(|units| units as f64 / 10.0),
            Property::Gain => self.read_control(CID_GAIN, "gain").map(|gain| gain as f64),
            Property::Brightness => self.read_normalised(CID_BRIGHTNESS, "brightness"),
            Property::Contrast => self.read_normalised(CID_CONTRAST, "contrast"),
        }
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let (width, height, stride, fourcc) = (self.width, self.height, self.stride, self.fourcc);
        let (data, metadata) = self.ensure_stream()?.next().map_err(|err| {
            if err.kind() == std::io::ErrorKind::TimedOut {
                CameraError::Timeout
            } else {
                CameraError::StreamError(err.to_string())
            }
        })?;
        let row_bytes = fourcc
            .bytes_per_pixel()
            .map_or(0, |bytes| (width * bytes) as usize);

        Ok(Frame {
            data: strip_row_padding(data, row_bytes, stride as usize),
            width,
            height,
            fourcc,
            metadata,
        })
    }

    fn release(&mut self) {
        self.stream = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exposure_auto_mapping() {
        assert_eq!(exposure_auto_mode(0.0), EXPOSURE_MANUAL);
        assert_eq!(exposure_auto_mode(0.25), EXPOSURE_MANUAL);
        assert_eq!(exposure_auto_mode(0.75), EXPOSURE_APERTURE_PRIORITY);
        assert_eq!(exposure_auto_mode(1.0), 1);
        assert_eq!(exposure_auto_mode(2.0), 2);
        assert_eq!(exposure_auto_mode(3.0), 3);
    }

    #[test]
    fn test_row_padding_stripped() {
        // 2 rows of 4 bytes, each padded to 6
        let padded = vec![1, 2, 3, 4, 0, 0, 5, 6, 7, 8, 0, 0];
        assert_eq!(
            strip_row_padding(padded, 4, 6),
            vec![1, 2, 3, 4, 5, 6, 7, 8]
        );

        let tight = vec![1, 2, 3, 4];
        assert_eq!(strip_row_padding(tight.clone(), 4, 4), tight);
        assert_eq!(strip_row_padding(tight.clone(), 0, 6), tight);
    }

    #[test]
    fn test_opener_keeps_read_timeout() {
        let opener = V4l2Opener::new(Duration::from_millis(250));
        assert_eq!(opener.read_timeout(), Duration::from_millis(250));
        assert_eq!(
            V4l2Opener::default().read_timeout(),
            Timing::default().read_timeout
        );
    }
}
