//! Windowed frames-per-second estimate, for display only.

use std::time::Instant;

/// Number of frames per FPS window.
pub const FPS_WINDOW: u32 = 30;

/// Recomputes FPS once every [`FPS_WINDOW`] frames as
/// `FPS_WINDOW / elapsed`. Never used as a control signal.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    window_start: Instant,
    frames_in_window: u32,
    fps: f64,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsCounter {
    /// Start a fresh window now.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Start a fresh window at `now`.
    #[must_use]
    pub const fn starting_at(now: Instant) -> Self {
        Self {
            window_start: now,
            frames_in_window: 0,
            fps: 0.0,
        }
    }

    /// Drop the current window and the last estimate.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Count one successfully retrieved frame.
    pub fn tick(&mut self) -> f64 {
        self.tick_at(Instant::now())
    }

    /// Count one frame retrieved at `now`.
    pub fn tick_at(&mut self, now: Instant) -> f64 {
        self.frames_in_window += 1;
        if self.frames_in_window >= FPS_WINDOW {
            let elapsed = now.duration_since(self.window_start).as_secs_f64();
            if elapsed > 0.0 {
                self.fps = f64::from(FPS_WINDOW) / elapsed;
            }
            self.window_start = now;
            self.frames_in_window = 0;
        }
        self.fps
    }

    /// Latest estimate; zero until the first window completes.
    #[must_use]
    pub const fn fps(&self) -> f64 {
        self.fps
    }
}
