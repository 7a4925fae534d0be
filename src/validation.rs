//! Frame statistics used to judge whether a capture looks sane.
//!
//! Statistics run over raw samples, whatever the pixel layout, so an
//! all-black sensor readout shows up as `max == 0`.

use crate::traits::Frame;

/// Sample statistics of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    /// Smallest sample.
    pub min: u8,
    /// Largest sample.
    pub max: u8,
    /// Mean sample value.
    pub mean: f64,
    /// Number of samples.
    pub samples: usize,
}

impl FrameStats {
    /// Compute statistics over every sample of `frame`.
    #[must_use]
    pub fn of(frame: &Frame) -> Self {
        if frame.data.is_empty() {
            return Self {
                min: 0,
                max: 0,
                mean: 0.0,
                samples: 0,
            };
        }

        let (min, max, sum) = frame.data.iter().fold(
            (u8::MAX, u8::MIN, 0u64),
            |(min, max, sum), &sample| (min.min(sample), max.max(sample), sum + u64::from(sample)),
        );

        #[allow(clippy::cast_precision_loss)]
        let mean = sum as f64 / frame.data.len() as f64;

        Self {
            min,
            max,
            mean,
            samples: frame.data.len(),
        }
    }

    /// True when every sample is zero.
    #[must_use]
    pub const fn is_black(&self) -> bool {
        self.max == 0
    }
}
