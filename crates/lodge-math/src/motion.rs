// SPDX-License-Identifier: CEPL-1.0
use bitflags::bitflags;
use glam::Vec3;

bitflags! {
    /// Movement directions currently held down.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct HeldKeys: u8 {
        const FORWARD = 1 << 0; // +y
        const BACK    = 1 << 1; // -y
        const LEFT    = 1 << 2; // +x
        const RIGHT   = 1 << 3; // -x
        const RAISE   = 1 << 4; // +z
        const LOWER   = 1 << 5; // -z
    }
}

impl HeldKeys {
    fn opposite(dir: HeldKeys) -> HeldKeys {
        match dir {
            d if d == HeldKeys::FORWARD => HeldKeys::BACK,
            d if d == HeldKeys::BACK => HeldKeys::FORWARD,
            d if d == HeldKeys::LEFT => HeldKeys::RIGHT,
            d if d == HeldKeys::RIGHT => HeldKeys::LEFT,
            d if d == HeldKeys::RAISE => HeldKeys::LOWER,
            d if d == HeldKeys::LOWER => HeldKeys::RAISE,
            _ => HeldKeys::empty(),
        }
    }

    /// Pressing a direction releases its opposite; releasing only clears itself.
    pub fn apply(&mut self, dir: HeldKeys, pressed: bool) {
        if pressed {
            self.remove(Self::opposite(dir));
            self.insert(dir);
        } else {
            self.remove(dir);
        }
    }

    /// Displacement to queue for one key event.
    pub fn displacement(self, nudge: f32) -> Vec3 {
        let axis = |pos: HeldKeys, neg: HeldKeys| {
            if self.contains(pos) {
                nudge
            } else if self.contains(neg) {
                -nudge
            } else {
                0.0
            }
        };
        Vec3::new(
            axis(HeldKeys::LEFT, HeldKeys::RIGHT),
            axis(HeldKeys::FORWARD, HeldKeys::BACK),
            axis(HeldKeys::RAISE, HeldKeys::LOWER),
        )
    }
}

/// How far the eye may move per integration call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MotionStep {
    /// Fixed distance per rendered frame. Perceived speed follows frame rate.
    PerFrame(f32),
    /// Distance per second, scaled by the elapsed frame time.
    PerSecond(f32),
}

impl MotionStep {
    pub fn step_for(self, dt_seconds: f32) -> f32 {
        match self {
            MotionStep::PerFrame(step) => step,
            MotionStep::PerSecond(speed) => speed * dt_seconds.max(0.0),
        }
    }
}

/// Accumulated, not-yet-applied camera displacement.
#[derive(Clone, Copy, Debug)]
pub struct SmoothMotion {
    pending: Vec3,
    step: MotionStep,
}

impl SmoothMotion {
    pub fn new(step: MotionStep) -> Self {
        Self {
            pending: Vec3::ZERO,
            step,
        }
    }

    pub fn push(&mut self, displacement: Vec3) {
        self.pending += displacement;
    }

    pub fn pending(&self) -> Vec3 {
        self.pending
    }

    pub fn is_settled(&self) -> bool {
        self.pending == Vec3::ZERO
    }

    /// Moves `eye` one step toward the accumulated target on every axis.
    /// An axis whose remainder is below the step snaps and zeroes. A step
    /// that is not positive leaves everything where it is.
    pub fn advance(&mut self, eye: &mut Vec3, dt_seconds: f32) {
        let step = self.step.step_for(dt_seconds);
        if step.is_nan() || step <= 0.0 {
            return;
        }
        for axis in 0..3 {
            let rem = self.pending[axis];
            if rem == 0.0 {
                continue;
            }
            if rem.abs() >= step {
                let delta = step.copysign(rem);
                self.pending[axis] -= delta;
                eye[axis] += delta;
            } else {
                eye[axis] += rem;
                self.pending[axis] = 0.0;
            }
        }
    }
}
