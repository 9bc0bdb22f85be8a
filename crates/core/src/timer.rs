//! Frame timing.

use std::time::{Duration, Instant};

/// Measures the time between frames.
///
/// The first call to [`FrameTimer::tick`] reports the time since construction.
#[derive(Debug)]
pub struct FrameTimer {
    start: Instant,
    last_frame: Instant,
    frame_count: u64,
}

impl FrameTimer {
    /// Create a timer starting now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_frame: now,
            frame_count: 0,
        }
    }

    /// Mark the start of a new frame and return the previous frame's duration in seconds.
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let delta = now - self.last_frame;
        self.last_frame = now;
        self.frame_count += 1;
        delta.as_secs_f32()
    }

    /// Number of ticks since construction.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Time since construction.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Average frames per second since construction, or zero before the first tick.
    pub fn average_fps(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if self.frame_count == 0 || secs <= 0.0 {
            0.0
        } else {
            self.frame_count as f64 / secs
        }
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_counts_frames() {
        let mut timer = FrameTimer::new();
        assert_eq!(timer.frame_count(), 0);
        assert_eq!(timer.average_fps(), 0.0);

        let dt = timer.tick();
        assert!(dt >= 0.0);
        timer.tick();
        assert_eq!(timer.frame_count(), 2);
    }

    #[test]
    fn test_tick_is_monotonic() {
        let mut timer = FrameTimer::new();
        std::thread::sleep(Duration::from_millis(2));
        let dt = timer.tick();
        assert!(dt > 0.0);
        assert!(timer.elapsed() >= Duration::from_millis(2));
    }
}
