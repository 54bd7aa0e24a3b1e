// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

pub const FOV_Y_DEGREES: f32 = 45.0;
pub const NEAR_PLANE: f32 = 0.1;
pub const FAR_PLANE: f32 = 10.0;

const EYE: Vec3 = Vec3::new(2.5, 0.0, 1.0);
const TARGET: Vec3 = Vec3::new(0.0, 0.0, 0.25);
const UP: Vec3 = Vec3::Z;

/// Uniform block consumed by the vertex shader. Layout matches std140 for
/// three column-major `mat4`s.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct FrameTransforms {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl FrameTransforms {
    /// Model spun `angle` radians about +Z, seen from the fixed camera.
    pub fn new(angle: f32, aspect: f32) -> Self {
        Self {
            model: Mat4::from_rotation_z(angle),
            view: view(),
            proj: projection(aspect),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

pub fn view() -> Mat4 {
    Mat4::look_at_rh(EYE, TARGET, UP)
}

/// Right-handed perspective with a [0, 1] depth range and Y pointing down in
/// clip space, as Vulkan expects.
pub fn projection(aspect: f32) -> Mat4 {
    let mut proj = Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect, NEAR_PLANE, FAR_PLANE);
    proj.y_axis.y *= -1.0;
    proj
}

/// Rotation after `elapsed_secs` at `degrees_per_second`, in radians.
pub fn rotation_angle(elapsed_secs: f32, degrees_per_second: f32) -> f32 {
    (elapsed_secs * degrees_per_second).to_radians()
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_projection_flips_y() {
        let flipped = projection(1.0);
        let plain = Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), 1.0, NEAR_PLANE, FAR_PLANE);
        assert_eq!(flipped.y_axis.y, -plain.y_axis.y);
        assert_eq!(flipped.x_axis, plain.x_axis);
        assert_eq!(flipped.z_axis, plain.z_axis);

        // A point above the optical axis lands in the upper half of the
        // viewport, which is negative Y in Vulkan clip space.
        let clip = flipped * Vec4::new(0.0, 1.0, -5.0, 1.0);
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn test_projection_depth_range() {
        let proj = projection(4.0 / 3.0);
        let near = proj * Vec4::new(0.0, 0.0, -NEAR_PLANE, 1.0);
        let far = proj * Vec4::new(0.0, 0.0, -FAR_PLANE, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_rotation_angle() {
        assert_eq!(rotation_angle(0.0, 22.5), 0.0);
        let quarter = rotation_angle(4.0, 22.5);
        assert!((quarter - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn test_frame_transforms_layout() {
        assert_eq!(std::mem::size_of::<FrameTransforms>(), 3 * 64);
        let t = FrameTransforms::new(0.0, 1.0);
        assert_eq!(t.model, Mat4::IDENTITY);
        assert_eq!(t.as_bytes().len(), 192);
    }
}
