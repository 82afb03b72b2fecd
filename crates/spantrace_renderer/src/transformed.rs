//! Generic transform decorator.
//!
//! Rays are taken into the child's local space instead of moving the
//! child's geometry. The local ray keeps an unnormalized direction, so the
//! child reports the same `t` values the world-space ray would see.

use spantrace_math::{Mat3, Mat4, Mat4Ext, Ray, Vec3};

use crate::object::Object;
use crate::span::{Span, SpanIterator};

/// An object seen through a local-to-world matrix.
pub struct Transformed {
    matrix: Mat4,
    /// World-to-local; `None` for singular matrices, which flatten the
    /// child to nothing
    inverse: Option<Mat4>,
    normal_matrix: Mat3,
    object: Box<dyn Object>,
}

impl Transformed {
    pub fn new(matrix: Mat4, object: Box<dyn Object>) -> Self {
        let inverse = (matrix.determinant().abs() > f32::EPSILON).then(|| matrix.inverse());
        let normal_matrix = inverse.and(matrix.normal_matrix()).unwrap_or(Mat3::ZERO);
        Self {
            matrix,
            inverse,
            normal_matrix,
            object,
        }
    }

    pub fn matrix(&self) -> &Mat4 {
        &self.matrix
    }
}

struct TransformedSpans<'a> {
    inner: Box<dyn SpanIterator<'a> + 'a>,
    inverse: Option<Mat4>,
    normal_matrix: Mat3,
    active: bool,
    span: Option<Span<'a>>,
}

impl<'a> TransformedSpans<'a> {
    fn to_world(&self, normal: Vec3) -> Vec3 {
        (self.normal_matrix * normal).normalize_or_zero()
    }

    fn load(&mut self) {
        self.span = self.inner.current().copied().map(|mut span| {
            span.start_normal = self.to_world(span.start_normal);
            span.end_normal = self.to_world(span.end_normal);
            span
        });
    }
}

impl<'a> SpanIterator<'a> for TransformedSpans<'a> {
    fn init(&mut self, ray: &Ray) {
        self.active = false;
        self.span = None;
        let Some(inverse) = self.inverse else {
            return;
        };
        let local = Ray::from_raw(
            inverse.transform_point3(ray.origin),
            inverse.transform_vector3(ray.direction),
        );
        self.inner.init(&local);
        self.active = true;
        self.load();
    }

    fn current(&self) -> Option<&Span<'a>> {
        self.span.as_ref()
    }

    fn advance(&mut self) {
        if self.active {
            self.inner.advance();
            self.load();
        }
    }
}

impl Object for Transformed {
    fn make_span_iterator<'a>(&'a self) -> Box<dyn SpanIterator<'a> + 'a> {
        Box::new(TransformedSpans {
            inner: self.object.make_span_iterator(),
            inverse: self.inverse,
            normal_matrix: self.normal_matrix,
            active: false,
            span: None,
        })
    }

    fn duplicate(&self) -> Box<dyn Object> {
        Box::new(Transformed::new(self.matrix, self.object.duplicate()))
    }

    /// Folds `m` into the existing matrix instead of nesting decorators.
    fn transform(&self, m: &Mat4) -> Option<Box<dyn Object>> {
        Some(Box::new(Transformed::new(*m * self.matrix, self.object.duplicate())))
    }
}
