// SPDX-License-Identifier: CEPL-1.0
use lodge_math::MotionStep;

/// Which present mode to ask for. The swapchain still falls back to FIFO
/// when the preferred mode is missing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentPreference {
    /// Mailbox when the surface offers it.
    #[default]
    LowLatency,
    Fifo,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderSettings {
    pub frames_in_flight: usize,
    pub present_preference: PresentPreference,
    pub clear_color: [f32; 4],
    /// Idle-wait the present queue after every present.
    pub serialize_present: bool,
    pub motion: MotionStep,
    /// Displacement queued per key event.
    pub nudge: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            present_preference: PresentPreference::LowLatency,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            serialize_present: true,
            motion: MotionStep::PerSecond(3.0),
            nudge: 0.3,
        }
    }
}

impl RenderSettings {
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }

    /// At least one slot, whatever the config said.
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_frames_in_flight_clamps_to_one() {
        let s = RenderSettings::default().with_frames_in_flight(0);
        assert_eq!(s.frames_in_flight(), 1);

        let raw = RenderSettings {
            frames_in_flight: 0,
            ..RenderSettings::default()
        };
        assert_eq!(raw.frames_in_flight(), 1);
    }
}
