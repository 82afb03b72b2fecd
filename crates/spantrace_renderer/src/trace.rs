//! Stochastic path integrator.
//!
//! `trace_ray` walks a span stream to the first surface in front of the ray,
//! then recursively follows refracted and reflected/scattered rays. Every
//! recursive call re-initialises the *same* span iterator, so a whole path
//! is traced without allocating.

use rand::RngCore;
use spantrace_core::Material;
use spantrace_math::{Color, Ray, Vec3, Vec3Ext};
use thiserror::Error;

use crate::camera::Camera;
use crate::gen_f32;
use crate::span::{SpanIterator, EPS, MAX_VALUE};

/// Default recursion depth for primary rays.
pub const DEFAULT_RAY_DEPTH: u32 = 16;

/// Rays whose contribution can no longer exceed this stop recursing.
pub const STRENGTH_CUTOFF: f32 = 0.02;

/// Upper bound on scatter samples taken at one surface hit.
pub const MAX_SCATTER_SAMPLES: u32 = 8;

/// Rejection-sampling attempts per scatter direction.
pub const MAX_REJECTION_ITERATIONS: u32 = 1000;

/// Smallest index of refraction a surface may carry.
pub const MIN_IOR: f32 = EPS;

/// Malformed scene data found while tracing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TraceError {
    #[error("Index of refraction {0} is not above the minimum of {MIN_IOR}")]
    InvalidIor(f32),

    #[error("Scatter coefficient {0} is outside [0, 1]")]
    ScatterOutOfRange(f32),
}

pub type TraceResult<T> = Result<T, TraceError>;

/// First surface crossing in front of a ray.
struct Hit<'a> {
    t: f32,
    /// Faces the incoming ray
    normal: Vec3,
    material: &'a Material,
    /// Incident over transmitted index
    eta: f32,
}

fn relative_ior(material: &Material, entering: bool) -> TraceResult<f32> {
    if material.ior.is_nan() || material.ior <= MIN_IOR {
        return Err(TraceError::InvalidIor(material.ior));
    }
    Ok(if entering { 1.0 / material.ior } else { material.ior })
}

/// Scan the span stream for the first boundary at `t >= EPS`.
fn find_hit<'a>(ray: &Ray, spans: &mut (dyn SpanIterator<'a> + 'a)) -> TraceResult<Option<Hit<'a>>> {
    spans.init(ray);
    while let Some(&span) = spans.current() {
        if span.start >= MAX_VALUE {
            return Ok(None);
        }
        if span.start >= EPS {
            return Ok(Some(Hit {
                t: span.start,
                normal: span.start_normal,
                material: span.start_material,
                eta: relative_ior(span.start_material, true)?,
            }));
        }
        if span.end >= MAX_VALUE {
            return Ok(None);
        }
        if span.end >= EPS {
            return Ok(Some(Hit {
                t: span.end,
                normal: -span.end_normal,
                material: span.end_material,
                eta: relative_ior(span.end_material, false)?,
            }));
        }
        spans.advance();
    }
    Ok(None)
}

/// Uniform point inside the unit ball.
fn random_in_unit_ball(rng: &mut dyn RngCore) -> Vec3 {
    loop {
        let p = Vec3::new(
            gen_f32(rng) * 2.0 - 1.0,
            gen_f32(rng) * 2.0 - 1.0,
            gen_f32(rng) * 2.0 - 1.0,
        );
        if p.length_squared() < 1.0 {
            return p;
        }
    }
}

/// Draw a direction from the scatter lobe around `mirror`.
///
/// Returns `None` when rejection sampling gives up, which only happens for
/// lobes that lie almost entirely below the surface.
fn sample_lobe(mirror: Vec3, normal: Vec3, scatter: f32, rng: &mut dyn RngCore) -> Option<Vec3> {
    let bias = (1.0 / scatter - 1.0) * mirror;
    for _ in 0..MAX_REJECTION_ITERATIONS {
        let dir = random_in_unit_ball(rng) + bias;
        if normal.dot(dir) > EPS {
            return Some(dir.normalize());
        }
    }
    None
}

/// Color of the light arriving along `ray`.
///
/// `strength` bounds how much the result can still affect the final pixel;
/// recursion stops once it drops below [`STRENGTH_CUTOFF`] or `depth` runs
/// out. Rays that hit nothing, or escape to infinity, are black.
pub fn trace_ray<'a>(
    ray: &Ray,
    spans: &mut (dyn SpanIterator<'a> + 'a),
    depth: u32,
    strength: f32,
    rng: &mut dyn RngCore,
) -> TraceResult<Color> {
    let Some(hit) = find_hit(ray, spans)? else {
        return Ok(Color::BLACK);
    };

    let point = ray.at(hit.t);
    let surface = hit.material.sample(point);
    let mut result = surface.emissive;
    if depth == 0 || strength < STRENGTH_CUTOFF {
        return Ok(result);
    }

    let dir = ray.direction;
    let mut add_factor = 1.0;

    let probability = (surface.transmit_reflect * dir.refract_strength(hit.eta, hit.normal)).clamp(0.0, 1.0);
    if probability > 0.0 {
        let refracted = dir.refract(hit.normal, hit.eta);
        if refracted != Vec3::ZERO {
            let child_strength = strength * probability * surface.transmit.average();
            let child = trace_ray(&Ray::new(point, refracted), spans, depth - 1, child_strength, rng)?;
            result += surface.transmit * probability * child;
            add_factor -= probability;
        }
    }
    if add_factor <= 0.0 {
        return Ok(result);
    }

    let scatter = surface.scatter;
    if !(0.0..=1.0).contains(&scatter) {
        return Err(TraceError::ScatterOutOfRange(scatter));
    }

    let mirror = dir.reflect(hit.normal);
    let remaining = strength * add_factor;
    let specular = scatter <= EPS;
    let samples = if specular {
        1
    } else {
        ((remaining * scatter * MAX_SCATTER_SAMPLES as f32).ceil() as u32).clamp(1, MAX_SCATTER_SAMPLES)
    };

    let mut sum = Color::BLACK;
    let mut taken = 0;
    for _ in 0..samples {
        let direction = if specular {
            mirror
        } else {
            match sample_lobe(mirror, hit.normal, scatter, rng) {
                Some(d) => d,
                None => break,
            }
        };
        let grazing = 1.0 - (1.0 - direction.dot(hit.normal)) * scatter;
        let child_strength = remaining * grazing * surface.reflect.average();
        let child = trace_ray(&Ray::new(point, direction), spans, depth - 1, child_strength, rng)?;
        sum += grazing * child;
        taken += 1;
    }

    if taken > 0 {
        result += surface.reflect * sum * (add_factor / taken as f32);
    }
    Ok(result)
}

/// Average color of `samples` jittered camera rays through pixel
/// `(px, py)` of a `res_x` x `res_y` image.
#[allow(clippy::too_many_arguments)]
pub fn trace_pixel<'a>(
    spans: &mut (dyn SpanIterator<'a> + 'a),
    px: i32,
    py: i32,
    res_x: u32,
    res_y: u32,
    samples: u32,
    depth: u32,
    camera: &Camera,
    rng: &mut dyn RngCore,
) -> TraceResult<Color> {
    if samples == 0 {
        return Ok(Color::BLACK);
    }
    let mut sum = Color::BLACK;
    for _ in 0..samples {
        let x = 2.0 * (px as f32 + gen_f32(rng)) / res_x as f32 - 1.0;
        let y = 1.0 - 2.0 * (py as f32 + gen_f32(rng)) / res_y as f32;
        sum += trace_ray(&camera.ray(x, y), spans, depth, 1.0, rng)?;
    }
    Ok(sum / samples as f32)
}
