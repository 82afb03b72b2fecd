//! Spantrace Renderer - CSG span path tracing
//!
//! Objects describe solids as sorted runs of "inside" intervals along a ray
//! (spans). Boolean combinators merge those runs, and a stochastic path
//! integrator follows light through the first surface it meets.
//!
//! Images are rendered in square tiles on a small thread pool; each tile
//! samples its corners and recursively subdivides only where the colors
//! disagree. Tiles can also be rendered on remote servers over a simple
//! line-based TCP protocol.

mod block;
mod camera;
mod csg;
mod net;
mod object;
mod plane;
mod pool;
mod renderer;
mod settings;
mod span;
mod sphere;
mod tile;
mod trace;
mod transformed;

pub use block::{BlockError, BlockRenderer, BlockResult, RenderBlock, TileBuffer};
pub use camera::{Camera, DEFAULT_SCREEN_DISTANCE};
pub use csg::{Difference, Intersection, Union};
pub use net::{NetClient, NetError, NetRenderBlock, NetResult, RenderServer, DEFAULT_PORT};
pub use object::{lens, lens_pointed_at, transform, union_all, Empty, Object, SceneError, SceneResult};
pub use plane::Plane;
pub use pool::{JobError, JobHandle, JobResult, ThreadPool};
pub use renderer::{color_to_rgba, linear_to_gamma, render, render_scene, ImageBuffer, RenderReport};
pub use settings::{ConfigError, ConfigResult, RenderSettings};
pub use span::{collect_spans, Span, SpanIterator, EPS, MAX_VALUE};
pub use sphere::Sphere;
pub use tile::{generate_tiles, Tile};
pub use trace::{trace_pixel, trace_ray, TraceError, TraceResult, DEFAULT_RAY_DEPTH};
pub use transformed::Transformed;

/// Re-export math and surface types so scenes can be built from one crate
pub use spantrace_core::{Image, Material, Texture};
pub use spantrace_math::{Color, Mat4, Ray, Vec3};

use rand::{Rng, RngCore};

/// Uniform sample in `[0, 1)`.
#[inline]
pub(crate) fn gen_f32(rng: &mut dyn RngCore) -> f32 {
    rng.gen::<f32>()
}
