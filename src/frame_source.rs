//! Timestamped frame acquisition with bounded retry.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::backend::Backend;
use crate::fps::FpsCounter;
use crate::traits::FrameSample;

/// Attempts per [`FrameSource::get_frame`] call.
pub const MAX_ATTEMPTS: u32 = 3;

/// Anything that yields one timestamped frame per call.
pub trait FrameReader {
    /// Read a single sample; failures are reported through `is_valid`.
    fn read_sample(&mut self) -> FrameSample;
}

impl FrameReader for Backend {
    fn read_sample(&mut self) -> FrameSample {
        self.get_frame()
    }
}

/// Wraps a backend with retry for transient failures and FPS bookkeeping.
pub struct FrameSource<R: FrameReader = Backend> {
    reader: R,
    retry_delay: Duration,
    fps: FpsCounter,
}

impl<R: FrameReader> FrameSource<R> {
    /// Wrap `reader`, sleeping `retry_delay` between attempts.
    pub fn new(reader: R, retry_delay: Duration) -> Self {
        Self {
            reader,
            retry_delay,
            fps: FpsCounter::new(),
        }
    }

    /// Read a frame, retrying failed reads and all-black frames.
    ///
    /// After [`MAX_ATTEMPTS`] the last sample is returned with
    /// `is_valid == false`; this never errors.
    pub fn get_frame(&mut self) -> FrameSample {
        let mut attempt = 1;
        loop {
            let sample = self.reader.read_sample();
            if sample.is_valid {
                self.fps.tick();
                return sample;
            }

            if sample.frame.is_some() {
                warn!(attempt, "frame is completely black");
            } else {
                debug!(attempt, "frame capture attempt failed");
            }

            if attempt >= MAX_ATTEMPTS {
                warn!("failed to capture valid frame");
                return sample;
            }
            attempt += 1;
            if !self.retry_delay.is_zero() {
                thread::sleep(self.retry_delay);
            }
        }
    }

    /// Frames per second over the last completed window.
    #[must_use]
    pub const fn fps(&self) -> f64 {
        self.fps.fps()
    }

    /// Start a new FPS window.
    pub fn reset_fps(&mut self) {
        self.fps.reset();
    }

    /// The wrapped reader.
    pub const fn reader(&self) -> &R {
        &self.reader
    }

    /// The wrapped reader, mutably.
    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }
}
