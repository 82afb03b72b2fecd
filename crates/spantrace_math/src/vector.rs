//! Optics helpers on top of `glam::Vec3`.
//!
//! Mirror and refracted directions come straight from glam
//! (`Vec3::reflect`, `Vec3::refract(normal, eta)`); this adds the
//! transmission heuristic the integrator weights them with.

use glam::Vec3;

/// Extension trait for Vec3 with the refraction heuristic.
///
/// `normal` always faces the incoming direction (`self.dot(normal) <= 0`)
/// and `self` is expected to be normalized.
pub trait Vec3Ext {
    /// Fraction of light that the refraction heuristic lets through.
    ///
    /// `sqrt(cos_i * cos_t)`: 1 at normal incidence with matched indices,
    /// falling to 0 at grazing angles and under total internal reflection.
    fn refract_strength(self, eta: f32, normal: Vec3) -> f32;
}

impl Vec3Ext for Vec3 {
    fn refract_strength(self, eta: f32, normal: Vec3) -> f32 {
        let cos_i = (-self.dot(normal)).clamp(0.0, 1.0);
        let k = 1.0 - eta * eta * (1.0 - cos_i * cos_i);
        if k <= 0.0 {
            return 0.0;
        }
        (cos_i * k.sqrt()).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reflect() {
        let d = Vec3::new(1.0, -1.0, 0.0).normalize();
        let r = d.reflect(Vec3::Y);
        assert!((r - Vec3::new(1.0, 1.0, 0.0).normalize()).length() < 1e-6);
    }

    #[test]
    fn test_refract_straight_through() {
        let d = Vec3::NEG_Y;
        let t = d.refract(Vec3::Y, 1.0 / 1.5);
        assert!((t - Vec3::NEG_Y).length() < 1e-6);
        assert!((d.refract_strength(1.0 / 1.5, Vec3::Y) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_refract_bends_toward_normal() {
        let d = Vec3::new(1.0, -1.0, 0.0).normalize();
        let t = d.refract(Vec3::Y, 1.0 / 1.5);

        assert!((t.length() - 1.0).abs() < 1e-5);
        // sin_t = sin_i / 1.5
        let sin_i = d.x;
        assert!((t.x - sin_i / 1.5).abs() < 1e-5);
        assert!(t.y < 0.0);
    }

    #[test]
    fn test_total_internal_reflection() {
        let d = Vec3::new(1.0, -0.2, 0.0).normalize();
        assert_eq!(d.refract(Vec3::Y, 1.5), Vec3::ZERO);
        assert_eq!(d.refract_strength(1.5, Vec3::Y), 0.0);
    }

    #[test]
    fn test_refract_strength_falls_at_grazing() {
        let steep = Vec3::new(0.1, -1.0, 0.0).normalize();
        let shallow = Vec3::new(1.0, -0.1, 0.0).normalize();
        let eta = 1.0 / 1.3;
        assert!(steep.refract_strength(eta, Vec3::Y) > shallow.refract_strength(eta, Vec3::Y));
    }
}
