//! Sphere primitive.

use std::sync::Arc;

use spantrace_core::Material;
use spantrace_math::{Mat4, Mat4Ext, Ray, Vec3};

use crate::object::Object;
use crate::span::{Span, SpanIterator, EPS};
use crate::transformed::Transformed;

/// Rays whose normalized discriminant falls below this miss the sphere.
const DISCRIMINANT_EPS: f32 = EPS * EPS;

/// A solid ball.
#[derive(Debug, Clone)]
pub struct Sphere {
    center: Vec3,
    radius: f32,
    material: Arc<Material>,
}

impl Sphere {
    /// Create a new sphere.
    pub fn new(center: Vec3, radius: f32, material: Arc<Material>) -> Self {
        Self {
            center,
            radius: radius.abs(),
            material,
        }
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn material(&self) -> &Arc<Material> {
        &self.material
    }
}

struct SphereSpans<'a> {
    sphere: &'a Sphere,
    span: Option<Span<'a>>,
}

impl<'a> SpanIterator<'a> for SphereSpans<'a> {
    fn init(&mut self, ray: &Ray) {
        self.span = None;

        // Full quadratic: the direction may be unnormalized when the ray
        // comes through a transform.
        let oc = ray.origin - self.sphere.center;
        let a = ray.direction.length_squared();
        if a <= 0.0 {
            return;
        }
        let half_b = oc.dot(ray.direction);
        let c = oc.length_squared() - self.sphere.radius * self.sphere.radius;

        let discriminant = half_b * half_b - a * c;
        if discriminant <= DISCRIMINANT_EPS * a * a {
            return;
        }

        let sqrtd = discriminant.sqrt();
        let start = (-half_b - sqrtd) / a;
        let end = (-half_b + sqrtd) / a;
        let start_normal = (ray.at(start) - self.sphere.center).normalize_or_zero();
        let end_normal = (ray.at(end) - self.sphere.center).normalize_or_zero();

        self.span = Some(Span::new(start, start_normal, end, end_normal, &self.sphere.material));
    }

    fn current(&self) -> Option<&Span<'a>> {
        self.span.as_ref()
    }

    fn advance(&mut self) {
        self.span = None;
    }
}

impl Object for Sphere {
    fn make_span_iterator<'a>(&'a self) -> Box<dyn SpanIterator<'a> + 'a> {
        Box::new(SphereSpans {
            sphere: self,
            span: None,
        })
    }

    fn duplicate(&self) -> Box<dyn Object> {
        Box::new(self.clone())
    }

    /// Similarity transforms keep it a sphere. Anything else wraps a copy
    /// whose textures already follow the transform.
    fn transform(&self, m: &Mat4) -> Option<Box<dyn Object>> {
        let material = Arc::new(self.material.transform(&m.inverse()));
        match m.uniform_scale() {
            Some(scale) => Some(Box::new(Sphere {
                center: m.transform_point3(self.center),
                radius: self.radius * scale,
                material,
            })),
            None => Some(Box::new(Transformed::new(
                *m,
                Box::new(Sphere {
                    center: self.center,
                    radius: self.radius,
                    material,
                }),
            ))),
        }
    }
}
