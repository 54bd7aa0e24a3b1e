// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

/// Counts rendered frames and reports the total once per window.
#[derive(Debug)]
pub struct FpsCounter {
    window: Duration,
    frames: u32,
    window_start: Instant,
}

impl FpsCounter {
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    pub fn starting_at(window: Duration, now: Instant) -> Self {
        Self {
            window,
            frames: 0,
            window_start: now,
        }
    }

    /// Records one frame. Returns the frame count of the window that just
    /// closed, if `now` crossed the window boundary.
    pub fn tick(&mut self, now: Instant) -> Option<u32> {
        self.frames = self.frames.saturating_add(1);
        if now.duration_since(self.window_start) < self.window {
            return None;
        }
        let count = self.frames;
        self.frames = 0;
        self.window_start = now;
        Some(count)
    }

    /// Drops the partial window, e.g. after a pause.
    pub fn reset(&mut self, now: Instant) {
        self.frames = 0;
        self.window_start = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_once_per_window() {
        let start = Instant::now();
        let mut fps = FpsCounter::starting_at(Duration::from_secs(1), start);

        for i in 1..60 {
            let t = start + Duration::from_millis(i * 10);
            assert_eq!(fps.tick(t), None);
        }
        assert_eq!(fps.tick(start + Duration::from_secs(1)), Some(60));
        assert_eq!(
            fps.tick(start + Duration::from_millis(1_100)),
            None,
            "new window starts empty"
        );
    }

    #[test]
    fn test_reset_discards_partial_window() {
        let start = Instant::now();
        let mut fps = FpsCounter::starting_at(Duration::from_secs(1), start);
        fps.tick(start + Duration::from_millis(100));
        fps.tick(start + Duration::from_millis(200));

        let later = start + Duration::from_millis(500);
        fps.reset(later);
        assert_eq!(fps.tick(later + Duration::from_secs(1)), Some(1));
    }
}
