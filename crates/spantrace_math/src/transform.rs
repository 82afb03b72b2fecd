// Transform utilities for Mat4
//
// Extends glam::Mat4 with the pieces object and texture transforms need.
// Note: glam::Mat4 already provides transform_point3(), transform_vector3()
// and inverse()

use glam::{Mat3, Mat4, Vec3};

/// Extension trait for Mat4 to provide additional transform utilities
pub trait Mat4Ext {
    /// Matrix taking surface normals through this transform (inverse
    /// transpose of the linear part). `None` for singular matrices.
    fn normal_matrix(&self) -> Option<Mat3>;

    /// If the matrix is a rotation + uniform scale + translation, return the
    /// scale factor. Spheres stay spheres under such a transform.
    fn uniform_scale(&self) -> Option<f32>;
}

const SIMILARITY_TOLERANCE: f32 = 1e-4;

impl Mat4Ext for Mat4 {
    fn normal_matrix(&self) -> Option<Mat3> {
        let linear = Mat3::from_mat4(*self);
        (linear.determinant().abs() > f32::EPSILON).then(|| linear.inverse().transpose())
    }

    fn uniform_scale(&self) -> Option<f32> {
        // Projective matrices are never similarities
        if self.row(3) != glam::Vec4::new(0.0, 0.0, 0.0, 1.0) {
            return None;
        }
        let x = self.x_axis.truncate();
        let y = self.y_axis.truncate();
        let z = self.z_axis.truncate();
        let scale = x.length();
        if scale <= SIMILARITY_TOLERANCE {
            return None;
        }
        let tol = SIMILARITY_TOLERANCE * scale * scale;
        let same_length = (y.length() - scale).abs() <= SIMILARITY_TOLERANCE * scale
            && (z.length() - scale).abs() <= SIMILARITY_TOLERANCE * scale;
        let orthogonal = x.dot(y).abs() <= tol && y.dot(z).abs() <= tol && z.dot(x).abs() <= tol;
        (same_length && orthogonal).then_some(scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_transform_point3_translation() {
        let mat = Mat4::from_translation(Vec3::new(10.0, 20.0, 30.0));
        let point = Vec3::new(1.0, 2.0, 3.0);

        assert_eq!(mat.transform_point3(point), Vec3::new(11.0, 22.0, 33.0));
    }

    #[test]
    fn test_normal_matrix_ignores_translation() {
        let mat = Mat4::from_translation(Vec3::new(10.0, 20.0, 30.0));
        assert_eq!(mat.normal_matrix().unwrap() * Vec3::X, Vec3::X);
    }

    #[test]
    fn test_normal_matrix_non_uniform_scale() {
        // Squash y: a 45 degree normal tilts toward y
        let mat = Mat4::from_scale(Vec3::new(1.0, 0.5, 1.0));
        let n = (mat.normal_matrix().unwrap() * Vec3::new(1.0, 1.0, 0.0).normalize()).normalize();

        assert!((n.length() - 1.0).abs() < 1e-5);
        assert!(n.y > n.x);
    }

    #[test]
    fn test_normal_matrix_singular() {
        assert_eq!(Mat4::from_scale(Vec3::new(1.0, 0.0, 1.0)).normal_matrix(), None);
    }

    #[test]
    fn test_uniform_scale() {
        let mat = Mat4::from_scale_rotation_translation(
            Vec3::splat(2.0),
            glam::Quat::from_rotation_y(PI / 4.0),
            Vec3::new(1.0, 2.0, 3.0),
        );
        let scale = mat.uniform_scale();
        assert!(scale.is_some_and(|s| (s - 2.0).abs() < 1e-4));

        assert_eq!(Mat4::from_scale(Vec3::new(1.0, 2.0, 1.0)).uniform_scale(), None);
    }

    #[test]
    fn test_mat4_rotation_inverse() {
        let mat = Mat4::from_rotation_y(PI / 4.0);
        let inv = mat.inverse();

        let point = Vec3::new(5.0, 3.0, 2.0);
        let back = inv.transform_point3(mat.transform_point3(point));

        assert!((back - point).length() < 0.001);
    }
}
