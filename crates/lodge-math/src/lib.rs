// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
pub mod camera;
pub mod motion;

pub use camera::{Camera, CameraUniform};
pub use glam;
pub use motion::{HeldKeys, MotionStep, SmoothMotion};
