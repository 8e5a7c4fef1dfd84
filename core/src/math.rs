//! Math aliases over `nalgebra`, `f32` throughout.
//!
//! Quaternions are stored `[x, y, z, w]` but constructed `Quaternion::new(w, x, y, z)`.

pub use nalgebra;

use nalgebra::UnitQuaternion;

pub type Vec3 = nalgebra::Vector3<f32>;
pub type Mat4 = nalgebra::Matrix4<f32>;
pub type Quat = nalgebra::Quaternion<f32>;

/// Compose `T * R * S`. The rotation is normalized first.
pub fn mat4_from_scale_rotation_translation(scale: Vec3, rotation: Quat, translation: Vec3) -> Mat4 {
    let rotation = UnitQuaternion::new_normalize(rotation).to_homogeneous();
    Mat4::new_translation(&translation) * rotation * Mat4::new_nonuniform_scaling(&scale)
}

pub fn quat_identity() -> Quat {
    Quat::identity()
}

/// Rotation of `angle` radians about +Y.
pub fn quat_from_rotation_y(angle: f32) -> Quat {
    UnitQuaternion::from_axis_angle(&nalgebra::Vector3::y_axis(), angle).into_inner()
}

pub fn vec3_lerp(a: &Vec3, b: &Vec3, t: f32) -> Vec3 {
    a.lerp(b, t)
}

/// Spherical interpolation along the shorter arc.
pub fn quat_slerp(a: Quat, b: Quat, t: f32) -> Quat {
    let from = UnitQuaternion::new_normalize(a);
    let mut to = UnitQuaternion::new_normalize(b);
    if from.coords.dot(&to.coords) < 0.0 {
        to = UnitQuaternion::new_unchecked(-to.into_inner());
    }
    // Nearly parallel rotations fall back to normalized lerp.
    match from.try_slerp(&to, t, 1.0e-6) {
        Some(q) => q.into_inner(),
        None => from.nlerp(&to, t).into_inner(),
    }
}

/// Column-major array layout, as GPU uniforms expect.
pub fn mat4_to_cols_array_2d(m: &Mat4) -> [[f32; 4]; 4] {
    (*m).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trs_applies_scale_before_translation() {
        let m = mat4_from_scale_rotation_translation(
            Vec3::new(2.0, 2.0, 2.0),
            quat_identity(),
            Vec3::new(1.0, 2.0, 3.0),
        );
        let p = m.transform_point(&nalgebra::Point3::new(1.0, 0.0, 0.0));
        assert_eq!(p, nalgebra::Point3::new(3.0, 2.0, 3.0));
    }

    #[test]
    fn test_trs_rotation_about_y() {
        let m = mat4_from_scale_rotation_translation(
            Vec3::new(1.0, 1.0, 1.0),
            quat_from_rotation_y(std::f32::consts::FRAC_PI_2),
            Vec3::zeros(),
        );
        let p = m.transform_point(&nalgebra::Point3::new(1.0, 0.0, 0.0));
        assert!((p.z + 1.0).abs() < 1.0e-5);
        assert!(p.x.abs() < 1.0e-5);
    }

    #[test]
    fn test_cols_array_keeps_translation_in_last_column() {
        let m = Mat4::new_translation(&Vec3::new(4.0, 5.0, 6.0));
        assert_eq!(mat4_to_cols_array_2d(&m)[3], [4.0, 5.0, 6.0, 1.0]);
    }

    #[test]
    fn test_lerp_midpoint() {
        let a = Vec3::zeros();
        let b = Vec3::new(2.0, 4.0, 6.0);
        assert_eq!(vec3_lerp(&a, &b, 0.5), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_slerp_endpoints() {
        let a = quat_identity();
        let b = quat_from_rotation_y(1.0);
        assert!((quat_slerp(a, b, 0.0).coords - a.coords).norm() < 1.0e-5);
        assert!((quat_slerp(a, b, 1.0).coords - b.coords).norm() < 1.0e-5);
    }
}
