// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

/// Smoothed frames-per-second, refreshed once a second.
pub struct FpsCounter {
    title: String,
    frames: u32,
    fps: f32,
    last: Instant,
}

impl FpsCounter {
    pub fn new(title: impl Into<String>, now: Instant) -> Self {
        Self {
            title: title.into(),
            frames: 0,
            fps: 0.0,
            last: now,
        }
    }

    pub fn frame(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Returns the new window title once per elapsed second.
    pub fn tick(&mut self, now: Instant) -> Option<String> {
        if now.duration_since(self.last) < WINDOW {
            return None;
        }
        self.fps = self.frames as f32 * 0.5 + self.fps * 0.5;
        self.frames = 0;
        self.last = now;
        Some(self.title_line())
    }

    fn title_line(&self) -> String {
        let avg_ms = if self.fps > 0.0 { 1000.0 / self.fps } else { 0.0 };
        format!(
            "{} | FPS: {:.0} | AVG FRAME TIME: {:.2} ms",
            self.title, self.fps, avg_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_before_a_second_has_passed() {
        let t0 = Instant::now();
        let mut fps = FpsCounter::new("lodge", t0);
        fps.frame();
        assert_eq!(fps.tick(t0 + Duration::from_millis(999)), None);
    }

    #[test]
    fn rate_is_averaged_with_the_previous_second() {
        let t0 = Instant::now();
        let mut fps = FpsCounter::new("lodge", t0);
        for _ in 0..100 {
            fps.frame();
        }
        let title = fps.tick(t0 + WINDOW);
        assert_eq!(fps.fps(), 50.0);
        assert_eq!(
            title.as_deref(),
            Some("lodge | FPS: 50 | AVG FRAME TIME: 20.00 ms")
        );

        for _ in 0..60 {
            fps.frame();
        }
        fps.tick(t0 + WINDOW * 2);
        assert_eq!(fps.fps(), 55.0);
    }

    #[test]
    fn idle_second_decays_without_dividing_by_zero() {
        let t0 = Instant::now();
        let mut fps = FpsCounter::new("lodge", t0);
        let title = fps.tick(t0 + WINDOW);
        assert_eq!(fps.fps(), 0.0);
        assert_eq!(
            title.as_deref(),
            Some("lodge | FPS: 0 | AVG FRAME TIME: 0.00 ms")
        );
    }
}
