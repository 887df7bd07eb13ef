// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Look-at camera. `up` points down the screen because the model is authored
/// Y-down.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub eye: Vec3,
    pub look_at: Vec3,
    pub up: Vec3,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Camera {
            eye: Vec3::new(1.0, 0.0, 2.0),
            look_at: Vec3::ZERO,
            up: Vec3::new(0.0, -1.0, 0.0),
            fov_y_degrees: 90.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

/// Matches the vertex shader's `Camera` block (three column-major mat4, std140).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

impl Camera {
    /// Model stands the mesh upright: rotate 90° about X, then push it back
    /// one unit along Z.
    pub fn model_matrix() -> Mat4 {
        Mat4::from_rotation_x(90f32.to_radians()) * Mat4::from_translation(Vec3::new(0.0, 0.0, -1.0))
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.look_at, self.up)
    }

    /// Zero-to-one depth, Y flipped for Vulkan clip space.
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        let mut proj = Mat4::perspective_rh(self.fov_y_degrees.to_radians(), aspect, self.near, self.far);
        proj.y_axis.y *= -1.0;
        proj
    }

    /// `aspect` is swapchain width / height; the caller never passes a
    /// zero-area extent.
    pub fn uniform(&self, aspect: f32) -> CameraUniform {
        CameraUniform {
            model: Self::model_matrix().to_cols_array_2d(),
            view: self.view_matrix().to_cols_array_2d(),
            proj: self.projection_matrix(aspect).to_cols_array_2d(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn uniform_is_three_std140_matrices() {
        assert_eq!(std::mem::size_of::<CameraUniform>(), 3 * 64);
    }

    #[test]
    fn projection_flips_y_and_honors_aspect() {
        let cam = Camera::default();
        let proj = cam.projection_matrix(2.0);
        // 90° fov => focal length 1
        assert!((proj.y_axis.y + 1.0).abs() < 1e-5);
        assert!((proj.x_axis.x - 0.5).abs() < 1e-5);
    }

    #[test]
    fn look_at_target_lands_in_front_of_the_eye() {
        let cam = Camera::default();
        let target = cam.view_matrix() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let dist = (cam.eye - cam.look_at).length();
        // right-handed view space looks down -Z
        assert!((target.z + dist).abs() < 1e-4);
        assert!(target.x.abs() < 1e-4 && target.y.abs() < 1e-4);
    }

    #[test]
    fn model_rotates_before_translating() {
        let p = Camera::model_matrix() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        // translate (0,0,-1) then rotate 90° about X sends -Z to +Y
        assert!((p.y - 1.0).abs() < 1e-5);
        assert!(p.z.abs() < 1e-5);
    }
}
