//! Half-space primitive.

use std::sync::Arc;

use spantrace_core::Material;
use spantrace_math::{Mat4, Ray, Vec3, Vec4};

use crate::object::Object;
use crate::span::{Span, SpanIterator, EPS, MAX_VALUE};

/// Ray/plane dot products below this count as parallel.
const PARALLEL_EPS: f32 = EPS * EPS;

/// The solid half-space `normal · p + d <= 0`.
///
/// `normal` points out of the solid and need not be unit length.
#[derive(Debug, Clone)]
pub struct Plane {
    normal: Vec3,
    d: f32,
    material: Arc<Material>,
}

impl Plane {
    pub fn new(normal: Vec3, d: f32, material: Arc<Material>) -> Self {
        Self { normal, d, material }
    }

    /// Half-space whose boundary passes through `point`.
    pub fn through(normal: Vec3, point: Vec3, material: Arc<Material>) -> Self {
        Self::new(normal, -normal.dot(point), material)
    }

    pub fn normal(&self) -> Vec3 {
        self.normal
    }

    pub fn d(&self) -> f32 {
        self.d
    }

    /// Signed distance-like value; `<= 0` inside the solid.
    pub fn eval(&self, p: Vec3) -> f32 {
        self.normal.dot(p) + self.d
    }
}

struct PlaneSpans<'a> {
    plane: &'a Plane,
    unit_normal: Vec3,
    span: Option<Span<'a>>,
}

impl<'a> SpanIterator<'a> for PlaneSpans<'a> {
    fn init(&mut self, ray: &Ray) {
        let divisor = ray.direction.dot(self.plane.normal);
        let numerator = -self.plane.d - ray.origin.dot(self.plane.normal);
        let t = numerator / divisor;
        let n = self.unit_normal;
        let material = self.plane.material.as_ref();

        self.span = if divisor.abs() < PARALLEL_EPS || !(t.abs() < MAX_VALUE) {
            // Parallel: the whole ray is either inside or outside
            (numerator >= -PARALLEL_EPS).then(|| Span::new(-MAX_VALUE, n, MAX_VALUE, n, material))
        } else if divisor < 0.0 {
            Some(Span::new(t, n, MAX_VALUE, n, material))
        } else {
            Some(Span::new(-MAX_VALUE, n, t, n, material))
        };
    }

    fn current(&self) -> Option<&Span<'a>> {
        self.span.as_ref()
    }

    fn advance(&mut self) {
        self.span = None;
    }
}

impl Object for Plane {
    fn make_span_iterator<'a>(&'a self) -> Box<dyn SpanIterator<'a> + 'a> {
        Box::new(PlaneSpans {
            plane: self,
            unit_normal: self.normal.normalize_or_zero(),
            span: None,
        })
    }

    fn duplicate(&self) -> Box<dyn Object> {
        Box::new(self.clone())
    }

    /// Exact for any invertible affine matrix: the plane equation moves
    /// by the inverse transpose.
    fn transform(&self, m: &Mat4) -> Option<Box<dyn Object>> {
        if m.row(3) != Vec4::W || m.determinant().abs() <= f32::EPSILON {
            return None;
        }
        let inverse = m.inverse();
        let plane = inverse.transpose() * self.normal.extend(self.d);
        Some(Box::new(Plane {
            normal: plane.truncate(),
            d: plane.w,
            material: Arc::new(self.material.transform(&inverse)),
        }))
    }
}
