//! Spans: the intervals of a ray that lie inside a solid.
//!
//! Every object answers a ray with a sorted, non-overlapping stream of
//! spans. Boolean operators merge their children's streams instead of
//! intersecting surfaces directly, which is what makes arbitrarily nested
//! CSG trees cheap to trace.

use spantrace_core::Material;
use spantrace_math::{Ray, Vec3};

/// Smallest parametric distance that counts as a surface hit.
pub const EPS: f32 = 1e-4;

/// Parametric distance standing in for infinity in half-infinite spans.
pub const MAX_VALUE: f32 = 1e30;

/// One maximal interval `[start, end]` of a ray inside a solid, with the
/// outward surface normal and material at each boundary.
#[derive(Debug, Clone, Copy)]
pub struct Span<'a> {
    pub start: f32,
    pub start_normal: Vec3,
    pub start_material: &'a Material,
    pub end: f32,
    pub end_normal: Vec3,
    pub end_material: &'a Material,
}

impl<'a> Span<'a> {
    /// Span with the same material at both boundaries.
    pub fn new(start: f32, start_normal: Vec3, end: f32, end_normal: Vec3, material: &'a Material) -> Self {
        Self {
            start,
            start_normal,
            start_material: material,
            end,
            end_normal,
            end_material: material,
        }
    }

    /// `end <= start`. Zero-length spans are still legal in a stream; they
    /// show up where boolean operators trim a span down to a touching point.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// True if the closed intervals share a point.
    pub fn overlaps(&self, other: &Span<'_>) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// True if `t` lies in the closed interval.
    #[inline]
    pub fn contains(&self, t: f32) -> bool {
        self.start <= t && t <= self.end
    }

    pub fn copy_start_from_start(&mut self, other: &Span<'a>) {
        self.start = other.start;
        self.start_normal = other.start_normal;
        self.start_material = other.start_material;
    }

    pub fn copy_end_from_end(&mut self, other: &Span<'a>) {
        self.end = other.end;
        self.end_normal = other.end_normal;
        self.end_material = other.end_material;
    }

    /// Take `other`'s end as this span's start. The solid now lies past
    /// that surface, so the normal flips.
    pub fn copy_start_from_end(&mut self, other: &Span<'a>) {
        self.start = other.end;
        self.start_normal = -other.end_normal;
        self.start_material = other.end_material;
    }

    /// Take `other`'s start as this span's end, flipping the normal.
    pub fn copy_end_from_start(&mut self, other: &Span<'a>) {
        self.end = other.start;
        self.end_normal = -other.start_normal;
        self.end_material = other.start_material;
    }
}

/// Cursor over the spans one object produces along one ray.
///
/// An iterator is built once per object tree and re-`init`ed for every ray,
/// so the whole tree of child iterators is allocated once per tile.
pub trait SpanIterator<'a> {
    /// Reset the cursor to the first span along `ray`.
    fn init(&mut self, ray: &Ray);

    /// The current span, or `None` once the stream is exhausted.
    fn current(&self) -> Option<&Span<'a>>;

    /// Step to the next span.
    fn advance(&mut self);

    fn is_at_end(&self) -> bool {
        self.current().is_none()
    }
}

/// Take the current span and step past it.
pub(crate) fn pull<'a, I>(iter: &mut I) -> Option<Span<'a>>
where
    I: SpanIterator<'a> + ?Sized,
{
    let span = iter.current().copied();
    if span.is_some() {
        iter.advance();
    }
    span
}

/// Run `iter` over `ray` and gather every span.
pub fn collect_spans<'a, I>(iter: &mut I, ray: &Ray) -> Vec<Span<'a>>
where
    I: SpanIterator<'a> + ?Sized,
{
    iter.init(ray);
    let mut spans = Vec::new();
    while let Some(span) = pull(iter) {
        spans.push(span);
    }
    spans
}
