//! Object trait and scene-building helpers.

use std::sync::Arc;

use spantrace_core::Material;
use spantrace_math::{Mat4, Ray, Vec3};
use thiserror::Error;

use crate::csg::{Intersection, Union};
use crate::span::{Span, SpanIterator, EPS};
use crate::sphere::Sphere;
use crate::transformed::Transformed;

/// A solid that can be intersected with rays.
///
/// Objects are immutable once built and shared between render threads, so
/// all per-ray state lives in the span iterator they hand out.
pub trait Object: Send + Sync {
    /// Build a fresh iterator over this object's spans.
    ///
    /// The iterator (and, for combinators, its whole child tree) is meant
    /// to be created once and re-initialised for every ray.
    fn make_span_iterator<'a>(&'a self) -> Box<dyn SpanIterator<'a> + 'a>;

    /// Deep copy. Materials are shared.
    fn duplicate(&self) -> Box<dyn Object>;

    /// Return this object moved by `m`, if the object knows how to move
    /// itself exactly. `None` makes `transform` wrap it instead.
    fn transform(&self, _m: &Mat4) -> Option<Box<dyn Object>> {
        None
    }
}

/// Move `object` by `m`, preferring the object's own transform.
pub fn transform(m: &Mat4, object: &dyn Object) -> Box<dyn Object> {
    object
        .transform(m)
        .unwrap_or_else(|| Box::new(Transformed::new(*m, object.duplicate())))
}

/// The empty solid. Produces no spans for any ray.
#[derive(Debug, Clone, Copy, Default)]
pub struct Empty;

struct EmptySpans;

impl<'a> SpanIterator<'a> for EmptySpans {
    fn init(&mut self, _ray: &Ray) {}

    fn current(&self) -> Option<&Span<'a>> {
        None
    }

    fn advance(&mut self) {}
}

impl Object for Empty {
    fn make_span_iterator<'a>(&'a self) -> Box<dyn SpanIterator<'a> + 'a> {
        Box::new(EmptySpans)
    }

    fn duplicate(&self) -> Box<dyn Object> {
        Box::new(Empty)
    }

    fn transform(&self, _m: &Mat4) -> Option<Box<dyn Object>> {
        Some(Box::new(Empty))
    }
}

/// Union of every object in `objects`, built as a balanced tree so that
/// no iterator chain gets deeper than `log2(n)`.
pub fn union_all(mut objects: Vec<Box<dyn Object>>) -> Box<dyn Object> {
    match objects.len() {
        0 => Box::new(Empty),
        1 => objects.remove(0),
        n => {
            let right = objects.split_off(n / 2);
            Box::new(Union::new(union_all(objects), union_all(right)))
        }
    }
}

/// Errors from the scene helpers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    #[error("Lens radius {radius} exceeds its sphere radius {sphere_radius}")]
    LensTooWide { radius: f32, sphere_radius: f32 },

    #[error("Lens material needs an index of refraction above 1, got {0}")]
    LensIor(f32),

    #[error("Lens focus distance {0} is too small")]
    LensFocus(f32),
}

pub type SceneResult<T> = Result<T, SceneError>;

/// A biconvex lens: the intersection of two spheres of `sphere_radius`
/// whose rims meet in a circle of `radius` around `position`.
pub fn lens(
    position: Vec3,
    orientation: Vec3,
    radius: f32,
    sphere_radius: f32,
    material: Arc<Material>,
) -> SceneResult<Box<dyn Object>> {
    if radius > sphere_radius {
        return Err(SceneError::LensTooWide {
            radius,
            sphere_radius,
        });
    }
    let dist = (sphere_radius * sphere_radius - radius * radius).sqrt();
    let axis = orientation.normalize_or_zero();
    Ok(Box::new(Intersection::new(
        Box::new(Sphere::new(position + axis * dist, sphere_radius, material.clone())),
        Box::new(Sphere::new(position - axis * dist, sphere_radius, material)),
    )))
}

/// A lens at `position` facing `focus`, shaped so that it focuses roughly
/// at `focus_factor` times the distance to `focus`.
pub fn lens_pointed_at(
    position: Vec3,
    focus: Vec3,
    focus_factor: f32,
    radius: f32,
    material: Arc<Material>,
) -> SceneResult<Box<dyn Object>> {
    let ior = material.ior;
    if ior <= 1.0 + EPS {
        return Err(SceneError::LensIor(ior));
    }
    let distance = (focus - position).length() * focus_factor;
    if distance <= EPS {
        return Err(SceneError::LensFocus(distance));
    }
    lens(position, focus - position, radius, 2.0 * distance * (ior - 1.0), material)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plane::Plane;
    use crate::span::collect_spans;

    fn ray_down_z() -> Ray {
        Ray::new(Vec3::new(0.0, 0.0, 10.0), Vec3::NEG_Z)
    }

    #[test]
    fn test_empty_has_no_spans() {
        let mut iter = Empty.make_span_iterator();
        assert!(collect_spans(iter.as_mut(), &ray_down_z()).is_empty());
    }

    #[test]
    fn test_union_all_covers_every_object() {
        let m = Arc::new(Material::default());
        let objects: Vec<Box<dyn Object>> = (0..5)
            .map(|i| Box::new(Sphere::new(Vec3::new(0.0, 0.0, i as f32 * -3.0), 1.0, m.clone())) as Box<dyn Object>)
            .collect();
        let world = union_all(objects);
        let mut iter = world.make_span_iterator();
        let spans = collect_spans(iter.as_mut(), &ray_down_z());

        assert_eq!(spans.len(), 5);
        for (i, span) in spans.iter().enumerate() {
            let center = 10.0 + i as f32 * 3.0;
            assert!((span.start - (center - 1.0)).abs() < 1e-3);
            assert!((span.end - (center + 1.0)).abs() < 1e-3);
        }
    }

    #[test]
    fn test_union_all_empty_and_single() {
        let mut iter_owner = union_all(Vec::new());
        assert!(collect_spans(iter_owner.make_span_iterator().as_mut(), &ray_down_z()).is_empty());

        let m = Arc::new(Material::default());
        iter_owner = union_all(vec![Box::new(Sphere::new(Vec3::ZERO, 1.0, m))]);
        assert_eq!(collect_spans(iter_owner.make_span_iterator().as_mut(), &ray_down_z()).len(), 1);
    }

    #[test]
    fn test_transform_falls_back_to_wrapper() {
        struct Slab(Plane);
        impl Object for Slab {
            fn make_span_iterator<'a>(&'a self) -> Box<dyn SpanIterator<'a> + 'a> {
                self.0.make_span_iterator()
            }
            fn duplicate(&self) -> Box<dyn Object> {
                Box::new(Slab(self.0.clone()))
            }
        }

        let m = Arc::new(Material::default());
        let slab = Slab(Plane::new(Vec3::Z, 0.0, m));
        let moved = transform(&Mat4::from_translation(Vec3::new(0.0, 0.0, 4.0)), &slab);
        let mut iter = moved.make_span_iterator();
        let spans = collect_spans(iter.as_mut(), &ray_down_z());

        assert_eq!(spans.len(), 1);
        assert!((spans[0].start - 6.0).abs() < 1e-4);
    }

    #[test]
    fn test_lens_shape() {
        let m = Arc::new(Material::glass(0.7, 0.9, 1.5));
        let lens = lens(Vec3::ZERO, Vec3::Z, 0.6, 1.0, m).unwrap();
        let mut iter = lens.make_span_iterator();

        // Thickness on the axis: two caps of height r - sqrt(r^2 - a^2)
        let spans = collect_spans(iter.as_mut(), &ray_down_z());
        assert_eq!(spans.len(), 1);
        assert!((spans[0].end - spans[0].start - 0.4).abs() < 1e-3);

        // Outside the rim the lens is empty
        let outside = Ray::new(Vec3::new(0.7, 0.0, 10.0), Vec3::NEG_Z);
        assert!(collect_spans(iter.as_mut(), &outside).is_empty());
    }

    #[test]
    fn test_lens_validation() {
        let glass = Arc::new(Material::glass(0.7, 0.9, 1.5));
        assert!(matches!(
            lens(Vec3::ZERO, Vec3::Z, 2.0, 1.0, glass.clone()),
            Err(SceneError::LensTooWide { .. })
        ));
        assert!(matches!(
            lens_pointed_at(Vec3::ZERO, Vec3::ZERO, 1.0, 0.5, glass.clone()),
            Err(SceneError::LensFocus(_))
        ));
        assert!(matches!(
            lens_pointed_at(Vec3::ZERO, Vec3::Z, 1.0, 0.5, Arc::new(Material::default())),
            Err(SceneError::LensIor(_))
        ));
        assert!(lens_pointed_at(Vec3::ZERO, Vec3::new(0.0, 0.0, -10.0), 1.0, 0.5, glass).is_ok());
    }
}
