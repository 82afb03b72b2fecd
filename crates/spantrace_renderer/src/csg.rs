//! Boolean combinators.
//!
//! Each operator merges the sorted span streams of its two children in a
//! single forward pass. The child iterators are owned by the combinator's
//! iterator, so a whole CSG tree turns into one tree of iterators that can
//! be re-initialised per ray without allocating.

use spantrace_math::{Mat4, Ray};

use crate::object::{transform, Object};
use crate::span::{pull, Span, SpanIterator};

type BoxedSpans<'a> = Box<dyn SpanIterator<'a> + 'a>;

/// Shared state of a two-child merge: both child cursors, the span each
/// side is currently holding, and the span last emitted.
struct Merge<'a> {
    a: BoxedSpans<'a>,
    b: BoxedSpans<'a>,
    span_a: Option<Span<'a>>,
    span_b: Option<Span<'a>>,
    result: Option<Span<'a>>,
}

impl<'a> Merge<'a> {
    fn new(a: BoxedSpans<'a>, b: BoxedSpans<'a>) -> Self {
        Self {
            a,
            b,
            span_a: None,
            span_b: None,
            result: None,
        }
    }

    fn init(&mut self, ray: &Ray) {
        self.a.init(ray);
        self.b.init(ray);
        self.span_a = pull(self.a.as_mut());
        self.span_b = pull(self.b.as_mut());
    }

    fn next_a(&mut self) {
        self.span_a = pull(self.a.as_mut());
    }

    fn next_b(&mut self) {
        self.span_b = pull(self.b.as_mut());
    }

    /// The pending span with the lesser start, and which side holds it.
    fn earliest(&self) -> Option<(Side, Span<'a>)> {
        match (self.span_a, self.span_b) {
            (Some(a), Some(b)) if b.start < a.start => Some((Side::B, b)),
            (Some(a), _) => Some((Side::A, a)),
            (None, Some(b)) => Some((Side::B, b)),
            (None, None) => None,
        }
    }

    fn consume(&mut self, side: Side) {
        match side {
            Side::A => self.next_a(),
            Side::B => self.next_b(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    A,
    B,
}

/// Points inside either child.
pub struct Union {
    a: Box<dyn Object>,
    b: Box<dyn Object>,
}

impl Union {
    pub fn new(a: Box<dyn Object>, b: Box<dyn Object>) -> Self {
        Self { a, b }
    }
}

struct UnionSpans<'a>(Merge<'a>);

impl<'a> UnionSpans<'a> {
    fn step(&mut self) {
        let m = &mut self.0;
        let result = match m.earliest() {
            None => None,
            Some((side, first)) => {
                m.consume(side);
                // Swallow every span, from either side, that starts before
                // the merged span ends
                let mut merged = first;
                while let Some((side, next)) = m.earliest().filter(|(_, s)| s.start <= merged.end) {
                    m.consume(side);
                    if next.end > merged.end {
                        merged.copy_end_from_end(&next);
                    }
                }
                Some(merged)
            }
        };
        m.result = result;
    }
}

impl<'a> SpanIterator<'a> for UnionSpans<'a> {
    fn init(&mut self, ray: &Ray) {
        self.0.init(ray);
        self.step();
    }

    fn current(&self) -> Option<&Span<'a>> {
        self.0.result.as_ref()
    }

    fn advance(&mut self) {
        self.step();
    }
}

impl Object for Union {
    fn make_span_iterator<'a>(&'a self) -> Box<dyn SpanIterator<'a> + 'a> {
        Box::new(UnionSpans(Merge::new(
            self.a.make_span_iterator(),
            self.b.make_span_iterator(),
        )))
    }

    fn duplicate(&self) -> Box<dyn Object> {
        Box::new(Union::new(self.a.duplicate(), self.b.duplicate()))
    }

    fn transform(&self, m: &Mat4) -> Option<Box<dyn Object>> {
        Some(Box::new(Union::new(
            transform(m, self.a.as_ref()),
            transform(m, self.b.as_ref()),
        )))
    }
}

/// Points inside both children.
pub struct Intersection {
    a: Box<dyn Object>,
    b: Box<dyn Object>,
}

impl Intersection {
    pub fn new(a: Box<dyn Object>, b: Box<dyn Object>) -> Self {
        Self { a, b }
    }
}

struct IntersectionSpans<'a>(Merge<'a>);

impl<'a> IntersectionSpans<'a> {
    fn step(&mut self) {
        let m = &mut self.0;
        let result = loop {
            let (Some(mut a), Some(mut b)) = (m.span_a, m.span_b) else {
                break None;
            };
            if a.end < b.start {
                m.next_a();
                continue;
            }
            if b.end < a.start {
                m.next_b();
                continue;
            }
            // Emit the overlap and consume whichever span ends first; the
            // other may still overlap the next span on the far side
            if a.start < b.start {
                if a.end < b.end {
                    a.copy_start_from_start(&b);
                    m.next_a();
                    break Some(a);
                }
                m.next_b();
                break Some(b);
            }
            if b.end < a.end {
                b.copy_start_from_start(&a);
                m.next_b();
                break Some(b);
            }
            m.next_a();
            break Some(a);
        };
        m.result = result;
    }
}

impl<'a> SpanIterator<'a> for IntersectionSpans<'a> {
    fn init(&mut self, ray: &Ray) {
        self.0.init(ray);
        self.step();
    }

    fn current(&self) -> Option<&Span<'a>> {
        self.0.result.as_ref()
    }

    fn advance(&mut self) {
        self.step();
    }
}

impl Object for Intersection {
    fn make_span_iterator<'a>(&'a self) -> Box<dyn SpanIterator<'a> + 'a> {
        Box::new(IntersectionSpans(Merge::new(
            self.a.make_span_iterator(),
            self.b.make_span_iterator(),
        )))
    }

    fn duplicate(&self) -> Box<dyn Object> {
        Box::new(Intersection::new(self.a.duplicate(), self.b.duplicate()))
    }

    fn transform(&self, m: &Mat4) -> Option<Box<dyn Object>> {
        Some(Box::new(Intersection::new(
            transform(m, self.a.as_ref()),
            transform(m, self.b.as_ref()),
        )))
    }
}

/// Points inside `a` but not inside `b`.
pub struct Difference {
    a: Box<dyn Object>,
    b: Box<dyn Object>,
}

impl Difference {
    pub fn new(a: Box<dyn Object>, b: Box<dyn Object>) -> Self {
        Self { a, b }
    }
}

struct DifferenceSpans<'a>(Merge<'a>);

impl<'a> DifferenceSpans<'a> {
    fn step(&mut self) {
        let m = &mut self.0;
        let result = loop {
            let Some(mut a) = m.span_a else {
                break None;
            };
            let Some(b) = m.span_b else {
                m.next_a();
                break Some(a);
            };
            if a.end < b.start {
                m.next_a();
                break Some(a);
            }
            if b.end < a.start {
                m.next_b();
                continue;
            }
            if a.start < b.start {
                if a.end <= b.end {
                    // b covers a's tail
                    a.copy_end_from_start(&b);
                    m.next_a();
                    break Some(a);
                }
                // b sits inside a: emit the front, keep the back pending
                let mut front = a;
                front.copy_end_from_start(&b);
                a.copy_start_from_end(&b);
                m.span_a = Some(a);
                m.next_b();
                break Some(front);
            }
            if a.end > b.end {
                // b covers a's front
                a.copy_start_from_end(&b);
                m.span_a = Some(a);
                m.next_b();
                continue;
            }
            // b covers all of a
            m.next_a();
        };
        m.result = result;
    }
}

impl<'a> SpanIterator<'a> for DifferenceSpans<'a> {
    fn init(&mut self, ray: &Ray) {
        self.0.init(ray);
        self.step();
    }

    fn current(&self) -> Option<&Span<'a>> {
        self.0.result.as_ref()
    }

    fn advance(&mut self) {
        self.step();
    }
}

impl Object for Difference {
    fn make_span_iterator<'a>(&'a self) -> Box<dyn SpanIterator<'a> + 'a> {
        Box::new(DifferenceSpans(Merge::new(
            self.a.make_span_iterator(),
            self.b.make_span_iterator(),
        )))
    }

    fn duplicate(&self) -> Box<dyn Object> {
        Box::new(Difference::new(self.a.duplicate(), self.b.duplicate()))
    }

    fn transform(&self, m: &Mat4) -> Option<Box<dyn Object>> {
        Some(Box::new(Difference::new(
            transform(m, self.a.as_ref()),
            transform(m, self.b.as_ref()),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plane::Plane;
    use crate::span::{collect_spans, MAX_VALUE};
    use crate::sphere::Sphere;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use spantrace_core::Material;
    use spantrace_math::Vec3;
    use std::sync::Arc;

    const TOL: f32 = 1e-4;

    fn material() -> Arc<Material> {
        Arc::new(Material::default())
    }

    /// Two unit spheres 1.5 apart along x.
    fn pair() -> (Box<dyn Object>, Box<dyn Object>) {
        (
            Box::new(Sphere::new(Vec3::ZERO, 1.0, material())),
            Box::new(Sphere::new(Vec3::new(1.5, 0.0, 0.0), 1.0, material())),
        )
    }

    fn axis_ray() -> Ray {
        Ray::new(Vec3::new(-5.0, 0.0, 0.0), Vec3::X)
    }

    fn bounds(object: &dyn Object, ray: &Ray) -> Vec<(f32, f32)> {
        let mut iter = object.make_span_iterator();
        collect_spans(iter.as_mut(), ray)
            .iter()
            .map(|s| (s.start, s.end))
            .collect()
    }

    fn assert_bounds(actual: &[(f32, f32)], expected: &[(f32, f32)]) {
        assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
        for (a, e) in actual.iter().zip(expected) {
            assert!((a.0 - e.0).abs() < TOL && (a.1 - e.1).abs() < TOL, "{actual:?} vs {expected:?}");
        }
    }

    fn assert_well_formed(object: &dyn Object, ray: &Ray) {
        let spans = bounds(object, ray);
        for (start, end) in &spans {
            assert!(end >= start, "{spans:?}");
        }
        for pair in spans.windows(2) {
            assert!(pair[0].1 < pair[1].0, "{spans:?}");
        }
    }

    #[test]
    fn test_union_of_overlapping_spheres() {
        let (a, b) = pair();
        let u = Union::new(a, b);
        // Sphere A covers [4, 6] along the ray, B covers [5.5, 7.5]
        assert_bounds(&bounds(&u, &axis_ray()), &[(4.0, 7.5)]);
    }

    #[test]
    fn test_intersection_of_overlapping_spheres() {
        let (a, b) = pair();
        let i = Intersection::new(a, b);
        assert_bounds(&bounds(&i, &axis_ray()), &[(5.5, 6.0)]);
    }

    #[test]
    fn test_difference_of_overlapping_spheres() {
        let (a, b) = pair();
        let d = Difference::new(a, b);
        assert_bounds(&bounds(&d, &axis_ray()), &[(4.0, 5.5)]);

        let (a, b) = pair();
        let d = Difference::new(b, a);
        assert_bounds(&bounds(&d, &axis_ray()), &[(6.0, 7.5)]);
    }

    #[test]
    fn test_off_axis_ray() {
        // At y = 0.6 each sphere's chord has half-length 0.8
        let ray = Ray::new(Vec3::new(-5.0, 0.6, 0.0), Vec3::X);
        let (a, b) = pair();
        assert_bounds(&bounds(&Union::new(a, b), &ray), &[(4.2, 7.3)]);
        let (a, b) = pair();
        assert_bounds(&bounds(&Intersection::new(a, b), &ray), &[(5.7, 5.8)]);
        let (a, b) = pair();
        assert_bounds(&bounds(&Difference::new(a, b), &ray), &[(4.2, 5.7)]);
    }

    #[test]
    fn test_disjoint_children() {
        let a: Box<dyn Object> = Box::new(Sphere::new(Vec3::ZERO, 1.0, material()));
        let b: Box<dyn Object> = Box::new(Sphere::new(Vec3::new(4.0, 0.0, 0.0), 1.0, material()));
        assert_bounds(&bounds(&Union::new(a.duplicate(), b.duplicate()), &axis_ray()), &[(4.0, 6.0), (8.0, 10.0)]);
        assert!(bounds(&Intersection::new(a.duplicate(), b.duplicate()), &axis_ray()).is_empty());
        assert_bounds(&bounds(&Difference::new(a, b), &axis_ray()), &[(4.0, 6.0)]);
    }

    #[test]
    fn test_empty_children_are_legal() {
        let miss = Ray::new(Vec3::new(-5.0, 3.0, 0.0), Vec3::X);
        let (a, b) = pair();
        assert!(bounds(&Union::new(a, b), &miss).is_empty());
        let (a, b) = pair();
        assert!(bounds(&Intersection::new(a, b), &miss).is_empty());
        let (a, b) = pair();
        assert!(bounds(&Difference::new(a, b), &miss).is_empty());
    }

    #[test]
    fn test_hollow_shell() {
        let shell = Difference::new(
            Box::new(Sphere::new(Vec3::ZERO, 2.0, material())),
            Box::new(Sphere::new(Vec3::ZERO, 1.0, material())),
        );
        let spans = bounds(&shell, &axis_ray());
        assert_bounds(&spans, &[(3.0, 4.0), (6.0, 7.0)]);
    }

    #[test]
    fn test_difference_normals_face_out_of_the_solid() {
        let shell = Difference::new(
            Box::new(Sphere::new(Vec3::ZERO, 2.0, material())),
            Box::new(Sphere::new(Vec3::ZERO, 1.0, material())),
        );
        let mut iter = shell.make_span_iterator();
        let spans = collect_spans(iter.as_mut(), &axis_ray());

        // Inner cavity walls: outward from the shell means toward the centre
        assert!((spans[0].end_normal - Vec3::X).length() < TOL);
        assert!((spans[1].start_normal - Vec3::NEG_X).length() < TOL);
        assert!((spans[0].start_normal - Vec3::NEG_X).length() < TOL);
        assert!((spans[1].end_normal - Vec3::X).length() < TOL);
    }

    #[test]
    fn test_difference_trims_front() {
        // b covers the front of a: the remaining span starts where b ends
        let a: Box<dyn Object> = Box::new(Sphere::new(Vec3::new(1.5, 0.0, 0.0), 1.0, material()));
        let b: Box<dyn Object> = Box::new(Sphere::new(Vec3::ZERO, 1.0, material()));
        let d = Difference::new(a, b);
        let mut iter = d.make_span_iterator();
        let spans = collect_spans(iter.as_mut(), &axis_ray());

        assert_eq!(spans.len(), 1);
        assert!((spans[0].start - 6.0).abs() < TOL);
        assert!((spans[0].end - 7.5).abs() < TOL);
        assert!((spans[0].start_normal - Vec3::NEG_X).length() < TOL);
    }

    #[test]
    fn test_union_merges_chains() {
        // Three overlapping spheres collapse into one span
        let u = Union::new(
            Box::new(Union::new(
                Box::new(Sphere::new(Vec3::ZERO, 1.0, material())),
                Box::new(Sphere::new(Vec3::new(3.0, 0.0, 0.0), 1.0, material())),
            )),
            Box::new(Sphere::new(Vec3::new(1.5, 0.0, 0.0), 1.0, material())),
        );
        assert_bounds(&bounds(&u, &axis_ray()), &[(4.0, 9.0)]);
    }

    #[test]
    fn test_half_spaces() {
        // Slab 1 <= x <= 3 from two planes
        let slab = Intersection::new(
            Box::new(Plane::new(Vec3::NEG_X, 1.0, material())),
            Box::new(Plane::new(Vec3::X, -3.0, material())),
        );
        let spans = bounds(&slab, &axis_ray());
        assert_bounds(&spans, &[(6.0, 8.0)]);

        let outside = Difference::new(
            Box::new(Plane::new(Vec3::X, -100.0, material())),
            Box::new(slab),
        );
        let spans = bounds(&outside, &axis_ray());
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].0, -MAX_VALUE);
        assert!((spans[0].1 - 6.0).abs() < TOL);
        assert!((spans[1].0 - 8.0).abs() < TOL);
        assert!((spans[1].1 - 105.0).abs() < 1e-2);
    }

    #[test]
    fn test_transform_recurses_into_children() {
        let (a, b) = pair();
        let moved = transform(&Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0)), &Union::new(a, b));
        assert_bounds(&bounds(moved.as_ref(), &axis_ray()), &[(5.0, 8.5)]);
    }

    fn random_scene(rng: &mut StdRng) -> (Box<dyn Object>, Box<dyn Object>) {
        let sphere = |rng: &mut StdRng| -> Box<dyn Object> {
            let c = Vec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0));
            Box::new(Sphere::new(c, rng.gen_range(0.3..1.2), material()))
        };
        let a = Union::new(sphere(rng), sphere(rng));
        let b = Union::new(sphere(rng), sphere(rng));
        (Box::new(a), Box::new(b))
    }

    fn random_ray(rng: &mut StdRng) -> Ray {
        let target = Vec3::new(rng.gen_range(-0.8..0.8), rng.gen_range(-0.8..0.8), 0.0);
        Ray::new(Vec3::new(0.0, 0.0, -6.0), target - Vec3::new(0.0, 0.0, -6.0))
    }

    fn inside(spans: &[(f32, f32)], t: f32) -> bool {
        spans.iter().any(|&(s, e)| s <= t && t <= e)
    }

    fn near_boundary(spans: &[(f32, f32)], t: f32) -> bool {
        spans.iter().any(|&(s, e)| (s - t).abs() < 1e-3 || (e - t).abs() < 1e-3)
    }

    #[test]
    fn test_combinators_are_well_formed() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let (a, b) = random_scene(&mut rng);
            let ray = random_ray(&mut rng);
            assert_well_formed(&Union::new(a.duplicate(), b.duplicate()), &ray);
            assert_well_formed(&Intersection::new(a.duplicate(), b.duplicate()), &ray);
            assert_well_formed(&Difference::new(a.duplicate(), b.duplicate()), &ray);
        }
    }

    #[test]
    fn test_set_algebra_on_random_scenes() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let (a, b) = random_scene(&mut rng);
            let ray = random_ray(&mut rng);

            let sa = bounds(a.as_ref(), &ray);
            let sb = bounds(b.as_ref(), &ray);
            let union = bounds(&Union::new(a.duplicate(), b.duplicate()), &ray);
            let inter = bounds(&Intersection::new(a.duplicate(), b.duplicate()), &ray);
            let diff = bounds(&Difference::new(a.duplicate(), b.duplicate()), &ray);
            let b_only = bounds(&Difference::new(b.duplicate(), a.duplicate()), &ray);

            for step in 0..400 {
                let t = step as f32 * 0.025;
                let all = [&sa, &sb, &union, &inter, &diff, &b_only];
                if all.iter().any(|s| near_boundary(s, t)) {
                    continue;
                }
                let in_a = inside(&sa, t);
                let in_b = inside(&sb, t);
                assert_eq!(inside(&union, t), in_a || in_b);
                assert_eq!(inside(&inter, t), in_a && in_b);
                assert_eq!(inside(&diff, t), in_a && !in_b);
                // Difference, intersection and the b-only part rebuild the union
                assert_eq!(
                    inside(&union, t),
                    inside(&diff, t) || inside(&inter, t) || inside(&b_only, t)
                );
            }
        }
    }
}
