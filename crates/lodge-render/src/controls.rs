// SPDX-License-Identifier: CEPL-1.0
use lodge_core::Key;
use lodge_math::{glam::Vec3, Camera, CameraUniform, HeldKeys, MotionStep, SmoothMotion};

/// Camera plus the keyboard state that steers it.
pub struct CameraRig {
    camera: Camera,
    held: HeldKeys,
    motion: SmoothMotion,
    nudge: f32,
}

fn direction(key: Key) -> Option<HeldKeys> {
    match key {
        Key::W => Some(HeldKeys::FORWARD),
        Key::S => Some(HeldKeys::BACK),
        Key::A => Some(HeldKeys::LEFT),
        Key::D => Some(HeldKeys::RIGHT),
        Key::Up => Some(HeldKeys::RAISE),
        Key::Down => Some(HeldKeys::LOWER),
        Key::Escape | Key::Other => None,
    }
}

impl CameraRig {
    pub fn new(camera: Camera, motion: MotionStep, nudge: f32) -> Self {
        Self {
            camera,
            held: HeldKeys::empty(),
            motion: SmoothMotion::new(motion),
            nudge,
        }
    }

    /// Every key event queues one nudge in the currently held directions,
    /// including events for keys that steer nothing.
    pub fn apply_key(&mut self, key: Key, pressed: bool) {
        if let Some(dir) = direction(key) {
            self.held.apply(dir, pressed);
        }
        self.motion.push(self.held.displacement(self.nudge));
    }

    pub fn advance(&mut self, dt_seconds: f32) {
        self.motion.advance(&mut self.camera.eye, dt_seconds);
    }

    pub fn eye(&self) -> Vec3 {
        self.camera.eye
    }

    pub fn held(&self) -> HeldKeys {
        self.held
    }

    pub fn uniform(&self, aspect: f32) -> CameraUniform {
        self.camera.uniform(aspect)
    }
}
