//! Adaptive tile rendering.
//!
//! A tile traces its four corners, then recursively quarters itself. A
//! square whose corners all agree and which is small enough is filled by
//! bilinear interpolation; anything else traces its edge midpoints and
//! centre and recurses, down to single pixels. Every traced pixel is
//! cached so neighbouring squares never trace the same pixel twice.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::SeedableRng;
use spantrace_math::Color;
use thiserror::Error;

use crate::camera::Camera;
use crate::object::Object;
use crate::pool::{lock, JobError, JobHandle, ThreadPool};
use crate::renderer::ImageBuffer;
use crate::settings::RenderSettings;
use crate::span::SpanIterator;
use crate::tile::Tile;
use crate::trace::{trace_pixel, TraceError, TraceResult};

/// Why a tile produced no (or only part of its) image.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlockError {
    #[error("Failed to allocate a tile buffer {extent} pixels wide")]
    Allocation { extent: u32 },

    #[error("Tile size {0} is not a power of two")]
    TileSize(u32),

    #[error("Tracing failed: {0}")]
    Trace(#[from] TraceError),

    #[error("Tile job failed: {0}")]
    Job(#[from] JobError),

    #[error("Remote render failed: {0}")]
    Remote(String),
}

pub type BlockResult<T> = Result<T, BlockError>;

/// Something producing the pixels of one tile, locally or elsewhere.
pub trait BlockRenderer: Send {
    fn tile(&self) -> Tile;

    /// True once no more pixels will arrive.
    fn done(&self) -> bool;

    /// Copy every pixel computed so far into `image`. Safe to call while
    /// the tile is still rendering.
    fn copy_to_buffer(&self, image: &mut ImageBuffer);

    /// Wait for the tile to complete and report how it went.
    fn finish(&mut self) -> BlockResult<()>;
}

/// Pixel cache for one tile plus a record of which pixels exist.
pub struct TileBuffer {
    tile: Tile,
    /// Cells per side; a tile's own square plus any shared border
    extent: u32,
    pixels: Vec<Color>,
    valid: Vec<bool>,
}

impl TileBuffer {
    /// Empty buffer of `extent` x `extent` cells anchored at the tile origin.
    pub fn new(tile: Tile, extent: u32) -> BlockResult<Self> {
        let alloc_err = || BlockError::Allocation { extent };
        let cells = (extent as usize).checked_mul(extent as usize).ok_or_else(alloc_err)?;

        let mut pixels = Vec::new();
        pixels.try_reserve_exact(cells).map_err(|_| alloc_err())?;
        let mut valid = Vec::new();
        valid.try_reserve_exact(cells).map_err(|_| alloc_err())?;
        pixels.resize(cells, Color::BLACK);
        valid.resize(cells, false);

        Ok(Self {
            tile,
            extent,
            pixels,
            valid,
        })
    }

    pub fn tile(&self) -> Tile {
        self.tile
    }

    fn index(&self, x: i64, y: i64) -> Option<usize> {
        let lx = x - self.tile.x as i64;
        let ly = y - self.tile.y as i64;
        let extent = self.extent as i64;
        if lx < 0 || ly < 0 || lx >= extent || ly >= extent {
            return None;
        }
        Some((ly * extent + lx) as usize)
    }

    /// Cached color at image coordinates, if it has been computed.
    pub fn get(&self, x: i64, y: i64) -> Option<Color> {
        let i = self.index(x, y)?;
        self.valid[i].then(|| self.pixels[i])
    }

    /// Store a color; coordinates outside the buffer are ignored.
    pub fn set(&mut self, x: i64, y: i64, color: Color) -> bool {
        match self.index(x, y) {
            Some(i) => {
                self.pixels[i] = color;
                self.valid[i] = true;
                true
            }
            None => false,
        }
    }

    /// Computed pixels inside the tile's own square, row by row.
    pub fn valid_pixels(&self) -> Vec<(u32, u32, Color)> {
        let side = self.tile.size.min(self.extent);
        let mut out = Vec::new();
        for ly in 0..side {
            for lx in 0..side {
                let i = (ly * self.extent + lx) as usize;
                if self.valid[i] {
                    out.push((self.tile.x + lx, self.tile.y + ly, self.pixels[i]));
                }
            }
        }
        out
    }

    /// Copy computed pixels of the tile's square into `image`, clipped to
    /// the image bounds.
    pub fn copy_to(&self, image: &mut ImageBuffer) {
        let side = self.tile.size.min(self.extent);
        let y_end = (self.tile.y + side).min(image.height);
        let x_end = (self.tile.x + side).min(image.width);
        for y in self.tile.y..y_end {
            for x in self.tile.x..x_end {
                let i = ((y - self.tile.y) * self.extent + (x - self.tile.x)) as usize;
                if self.valid[i] {
                    image.set(x, y, self.pixels[i]);
                }
            }
        }
    }
}

/// Colors at the four corners of a square.
#[derive(Clone, Copy)]
struct Corners {
    tl: Color,
    tr: Color,
    bl: Color,
    br: Color,
}

impl Corners {
    /// All six corner pairs within `delta` (squared distance).
    fn agree(&self, delta: f32) -> bool {
        let close = |a: Color, b: Color| a.distance_squared(b) <= delta;
        close(self.tl, self.tr)
            && close(self.tl, self.bl)
            && close(self.tl, self.br)
            && close(self.tr, self.bl)
            && close(self.tr, self.br)
            && close(self.bl, self.br)
    }
}

/// Per-tile sampling state owned by the worker.
struct Sampler<'b> {
    tile: Tile,
    buffer: &'b Mutex<TileBuffer>,
    settings: &'b RenderSettings,
    camera: Camera,
    rng: StdRng,
    /// Pixels actually traced rather than read from the cache
    traced: usize,
}

impl<'b> Sampler<'b> {
    fn new(tile: Tile, settings: &'b RenderSettings, buffer: &'b Mutex<TileBuffer>) -> Self {
        Self {
            tile,
            buffer,
            settings,
            camera: settings.camera(),
            rng: StdRng::seed_from_u64(tile.seed(settings.seed)),
            traced: 0,
        }
    }

    /// Cached or freshly traced, soft-clipped pixel color.
    fn pixel<'a>(&mut self, spans: &mut (dyn SpanIterator<'a> + 'a), x: i32, y: i32) -> TraceResult<Color> {
        if let Some(color) = lock(self.buffer).get(x as i64, y as i64) {
            return Ok(color);
        }
        let s = self.settings;
        let color = trace_pixel(spans, x, y, s.width, s.height, s.samples_per_pixel, s.ray_depth, &self.camera, &mut self.rng)?.soft_clip();
        lock(self.buffer).set(x as i64, y as i64, color);
        self.traced += 1;
        Ok(color)
    }

    fn adaptive<'a>(&mut self, spans: &mut (dyn SpanIterator<'a> + 'a)) -> TraceResult<()> {
        let x = self.tile.x as i32;
        let y = self.tile.y as i32;
        let size = self.tile.size as i32;
        let corners = Corners {
            tl: self.pixel(spans, x, y)?,
            tr: self.pixel(spans, x + size, y)?,
            bl: self.pixel(spans, x, y + size)?,
            br: self.pixel(spans, x + size, y + size)?,
        };
        self.square(spans, x, y, size, corners)
    }

    fn square<'a>(&mut self, spans: &mut (dyn SpanIterator<'a> + 'a), x: i32, y: i32, size: i32, c: Corners) -> TraceResult<()> {
        if x > self.settings.width as i32 || y > self.settings.height as i32 {
            return Ok(());
        }
        if size <= 1 {
            lock(self.buffer).set(x as i64, y as i64, c.tl);
            return Ok(());
        }
        if size <= self.settings.max_trustable_size as i32 && c.agree(self.settings.color_delta) {
            self.interpolate(x, y, size, c);
            return Ok(());
        }

        let half = size / 2;
        let cx = x + half;
        let cy = y + half;
        let tc = self.pixel(spans, cx, y)?;
        let cl = self.pixel(spans, x, cy)?;
        let cc = self.pixel(spans, cx, cy)?;
        let cr = self.pixel(spans, x + size, cy)?;
        let bc = self.pixel(spans, cx, y + size)?;

        self.square(spans, x, y, half, Corners { tl: c.tl, tr: tc, bl: cl, br: cc })?;
        self.square(spans, cx, y, half, Corners { tl: tc, tr: c.tr, bl: cc, br: cr })?;
        self.square(spans, x, cy, half, Corners { tl: cl, tr: cc, bl: c.bl, br: bc })?;
        self.square(spans, cx, cy, half, Corners { tl: cc, tr: cr, bl: bc, br: c.br })
    }

    /// Bilinear fill of the `size` x `size` pixels starting at `(x, y)`.
    fn interpolate(&mut self, x: i32, y: i32, size: i32, c: Corners) {
        let mut buffer = lock(self.buffer);
        for dy in 0..size {
            let fy = dy as f32 / size as f32;
            let left = c.tl + (c.bl - c.tl) * fy;
            let right = c.tr + (c.br - c.tr) * fy;
            for dx in 0..size {
                let fx = dx as f32 / size as f32;
                buffer.set((x + dx) as i64, (y + dy) as i64, left + (right - left) * fx);
            }
        }
    }

    /// Trace every visible pixel of the tile.
    fn brute_force<'a>(&mut self, spans: &mut (dyn SpanIterator<'a> + 'a)) -> TraceResult<()> {
        let y_end = (self.tile.y + self.tile.size).min(self.settings.height);
        let x_end = (self.tile.x + self.tile.size).min(self.settings.width);
        for y in self.tile.y..y_end {
            for x in self.tile.x..x_end {
                self.pixel(spans, x as i32, y as i32)?;
            }
        }
        Ok(())
    }
}

/// Render one tile into `buffer` on the calling thread.
fn run_block(tile: Tile, scene: &dyn Object, settings: &RenderSettings, buffer: &Mutex<TileBuffer>) -> BlockResult<()> {
    let mut spans = scene.make_span_iterator();
    let mut sampler = Sampler::new(tile, settings, buffer);
    if settings.adaptive {
        sampler.adaptive(spans.as_mut())?;
    } else {
        sampler.brute_force(spans.as_mut())?;
    }
    log::debug!("Tile {} at ({}, {}) done, {} pixels traced", tile.index, tile.x, tile.y, sampler.traced);
    Ok(())
}

/// A tile rendered by a job on the local thread pool.
pub struct RenderBlock {
    tile: Tile,
    buffer: Arc<Mutex<TileBuffer>>,
    job: Option<JobHandle<BlockResult<()>>>,
    outcome: Option<BlockResult<()>>,
}

impl RenderBlock {
    /// Allocate the tile buffer and queue the tile on `pool`.
    ///
    /// The tile size must be a power of two so every subdivision lands on
    /// whole pixels.
    pub fn start(tile: Tile, scene: Arc<dyn Object>, settings: Arc<RenderSettings>, pool: &ThreadPool) -> BlockResult<Self> {
        if !tile.size.is_power_of_two() {
            return Err(BlockError::TileSize(tile.size));
        }
        // One extra row and column: the far corners belong to the neighbours
        let buffer = Arc::new(Mutex::new(TileBuffer::new(tile, tile.size + 1)?));

        let job_buffer = Arc::clone(&buffer);
        let job = pool.submit(move || run_block(tile, scene.as_ref(), &settings, &job_buffer))?;

        Ok(Self {
            tile,
            buffer,
            job: Some(job),
            outcome: None,
        })
    }

    /// Snapshot of the pixels computed so far inside the tile.
    pub fn valid_pixels(&self) -> Vec<(u32, u32, Color)> {
        lock(&self.buffer).valid_pixels()
    }
}

impl BlockRenderer for RenderBlock {
    fn tile(&self) -> Tile {
        self.tile
    }

    fn done(&self) -> bool {
        match &self.job {
            Some(job) => job.is_finished(),
            None => true,
        }
    }

    fn copy_to_buffer(&self, image: &mut ImageBuffer) {
        lock(&self.buffer).copy_to(image);
    }

    fn finish(&mut self) -> BlockResult<()> {
        if let Some(job) = self.job.take() {
            let outcome = job.join().map_err(BlockError::from).and_then(|r| r);
            if let Err(e) = &outcome {
                log::error!("Tile {} at ({}, {}) failed: {}", self.tile.index, self.tile.x, self.tile.y, e);
            }
            self.outcome = Some(outcome);
        }
        self.outcome.clone().unwrap_or(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csg::Difference;
    use crate::plane::Plane;
    use crate::sphere::Sphere;
    use spantrace_core::{Image, Material, Texture};
    use spantrace_math::{Mat4, Vec3};

    const SENTINEL: Color = Color::rgb(-1.0, -1.0, -1.0);

    const GLOW: Color = Color::rgb(0.8, 0.6, 0.4);

    fn mirror_scene() -> Arc<dyn Object> {
        // A mirror ball carved out of a glowing room around the camera
        Arc::new(Difference::new(
            Box::new(Sphere::new(Vec3::ZERO, 50.0, Arc::new(Material::emitter(GLOW)))),
            Box::new(Sphere::new(Vec3::new(0.0, 0.0, -5.0), 1.5, Arc::new(Material::mirror(Color::gray(0.5))))),
        ))
    }

    /// Glowing wall at z = -2 whose red channel ramps from 0.25 at the left
    /// edge of the screen to 0.75 at the right, two texels per pixel at 64
    /// pixels wide.
    fn gradient_wall() -> Arc<dyn Object> {
        let ramp: Vec<[f32; 4]> = (0..256).map(|i| [i as f32 / 256.0, 0.3, 0.2, 1.0]).collect();
        let to_texture = Mat4::from_translation(Vec3::new(0.5, 0.5, 0.0)) * Mat4::from_scale(Vec3::new(0.25, 0.25, 1.0));
        let emission = Texture::Image(Image::from_pixels(256, 1, ramp).unwrap()).transform(&to_texture);
        let material = Material::emitter(Color::BLACK).with_emissive(emission);
        Arc::new(Plane::through(Vec3::Z, Vec3::new(0.0, 0.0, -2.0), Arc::new(material)))
    }

    fn gradient_settings(width: u32, adaptive: bool) -> Arc<RenderSettings> {
        Arc::new(RenderSettings {
            tile_size: 8,
            max_trustable_size: 4,
            adaptive,
            seed: 7,
            ..RenderSettings::for_resolution(width, 64)
        })
    }

    fn settings(adaptive: bool) -> Arc<RenderSettings> {
        Arc::new(RenderSettings {
            tile_size: 8,
            adaptive,
            seed: 42,
            ..RenderSettings::for_resolution(64, 64)
        })
    }

    fn render_tile(tile: Tile, scene: &Arc<dyn Object>, settings: &Arc<RenderSettings>, pool: &ThreadPool) -> ImageBuffer {
        let mut block = RenderBlock::start(tile, Arc::clone(scene), Arc::clone(settings), pool).unwrap();
        block.finish().unwrap();
        assert!(block.done());

        let mut image = ImageBuffer::new(settings.width, settings.height);
        image.fill(SENTINEL);
        block.copy_to_buffer(&mut image);
        image
    }

    fn assert_tile_filled(image: &ImageBuffer, tile: Tile) {
        for y in tile.y..(tile.y + tile.size).min(image.height) {
            for x in tile.x..(tile.x + tile.size).min(image.width) {
                assert_ne!(image.get(x, y), SENTINEL, "pixel ({}, {}) missing", x, y);
            }
        }
    }

    #[test]
    fn test_adaptive_matches_brute_force_on_smooth_tiles() {
        let pool = ThreadPool::new(2);
        let scene = mirror_scene();
        let adaptive = settings(true);
        let brute = settings(false);

        // Bare wall in the corner, pure mirror reflection at the centre
        for (tile, expected) in [
            (Tile::new(0, 0, 8, 0), GLOW),
            (Tile::new(28, 28, 8, 1), Color::rgb(0.4, 0.3, 0.2)),
        ] {
            let a = render_tile(tile, &scene, &adaptive, &pool);
            let b = render_tile(tile, &scene, &brute, &pool);
            for y in tile.y..tile.y + tile.size {
                for x in tile.x..tile.x + tile.size {
                    let (pa, pb) = (a.get(x, y), b.get(x, y));
                    assert!(pa.distance_squared(pb) < 1e-10, "({}, {}): {:?} vs {:?}", x, y, pa, pb);
                    assert!(pa.distance_squared(expected) < 1e-10, "({}, {}): {:?}", x, y, pa);
                }
            }
        }
    }

    #[test]
    fn test_smooth_squares_are_interpolated() {
        let scene = gradient_wall();
        let settings = gradient_settings(64, true);
        let tile = Tile::new(8, 8, 8, 0);
        let buffer = Mutex::new(TileBuffer::new(tile, tile.size + 1).unwrap());

        let mut spans = scene.make_span_iterator();
        let mut sampler = Sampler::new(tile, &settings, &buffer);
        sampler.adaptive(spans.as_mut()).unwrap();

        // Four corners, then the centre and edge midpoints; every 4x4
        // quarter is filled from its corners
        assert_eq!(sampler.traced, 9);
        let buffer = lock(&buffer);
        assert_eq!(buffer.valid_pixels().len(), 64);

        let tl = buffer.get(8, 8).unwrap();
        let tr = buffer.get(12, 8).unwrap();
        let bl = buffer.get(8, 12).unwrap();
        assert!(buffer.get(9, 8).unwrap().distance_squared(tl + (tr - tl) * 0.25) < 1e-10);
        assert!(buffer.get(8, 10).unwrap().distance_squared(tl + (bl - tl) * 0.5) < 1e-10);
    }

    #[test]
    fn test_interpolated_tiles_match_brute_force() {
        let pool = ThreadPool::new(2);
        let scene = gradient_wall();
        let adaptive = gradient_settings(64, true);
        let brute = gradient_settings(64, false);

        for tile in [Tile::new(0, 0, 8, 0), Tile::new(24, 32, 8, 1), Tile::new(48, 8, 8, 2)] {
            let a = render_tile(tile, &scene, &adaptive, &pool);
            let b = render_tile(tile, &scene, &brute, &pool);
            assert_tile_filled(&a, tile);
            for y in tile.y..tile.y + tile.size {
                for x in tile.x..tile.x + tile.size {
                    let (pa, pb) = (a.get(x, y), b.get(x, y));
                    assert!(pa.distance_squared(pb) <= adaptive.color_delta, "({}, {}): {:?} vs {:?}", x, y, pa, pb);
                }
            }
        }
    }

    #[test]
    fn test_interpolated_edge_tile_matches_brute_force() {
        let pool = ThreadPool::new(1);
        let scene = gradient_wall();
        let adaptive = gradient_settings(60, true);
        let brute = gradient_settings(60, false);

        // Half of this tile lies past the right edge
        let tile = Tile::new(56, 24, 8, 0);
        let a = render_tile(tile, &scene, &adaptive, &pool);
        let b = render_tile(tile, &scene, &brute, &pool);
        assert_tile_filled(&a, tile);
        for y in tile.y..tile.y + tile.size {
            for x in tile.x..60 {
                let (pa, pb) = (a.get(x, y), b.get(x, y));
                assert!(pa.distance_squared(pb) <= adaptive.color_delta, "({}, {}): {:?} vs {:?}", x, y, pa, pb);
            }
        }
    }

    #[test]
    fn test_tile_size_must_be_power_of_two() {
        let pool = ThreadPool::new(1);
        let result = RenderBlock::start(Tile::new(0, 0, 6, 0), mirror_scene(), settings(true), &pool);
        assert!(matches!(result, Err(BlockError::TileSize(6))));
    }

    #[test]
    fn test_tile_on_silhouette_fills_every_pixel() {
        let pool = ThreadPool::new(2);
        let scene = mirror_scene();
        let tile = Tile::new(48, 28, 8, 0);
        let image = render_tile(tile, &scene, &settings(true), &pool);

        assert_tile_filled(&image, tile);
        // Both the ball and the wall behind it show up
        let colors: Vec<_> = (tile.x..tile.x + 8).map(|x| image.get(x, 32)).collect();
        assert!(colors.iter().any(|c| c.average() < 0.35));
        assert!(colors.iter().any(|c| c.average() > 0.55));
    }

    #[test]
    fn test_tile_overhanging_image_edge() {
        let pool = ThreadPool::new(1);
        let settings = Arc::new(RenderSettings {
            tile_size: 16,
            ..RenderSettings::for_resolution(40, 20)
        });
        let tile = Tile::new(32, 16, 16, 0);
        let image = render_tile(tile, &mirror_scene(), &settings, &pool);
        assert_tile_filled(&image, tile);
    }

    #[test]
    fn test_trace_error_fails_the_tile() {
        let pool = ThreadPool::new(1);
        let bad = Material::glass(0.5, 0.5, 1.5).with_ior(0.0);
        let scene: Arc<dyn Object> = Arc::new(Sphere::new(Vec3::ZERO, 10.0, Arc::new(bad)));
        let mut block = RenderBlock::start(Tile::new(0, 0, 4, 0), scene, settings(true), &pool).unwrap();

        assert_eq!(block.finish(), Err(BlockError::Trace(TraceError::InvalidIor(0.0))));
        // The outcome is kept for later calls
        assert_eq!(block.finish(), Err(BlockError::Trace(TraceError::InvalidIor(0.0))));
    }

    #[test]
    fn test_partial_copy_while_running() {
        let pool = ThreadPool::new(1);
        let scene = mirror_scene();
        let mut block = RenderBlock::start(Tile::new(24, 24, 16, 0), scene, settings(false), &pool).unwrap();

        let mut image = ImageBuffer::new(64, 64);
        while !block.done() {
            block.copy_to_buffer(&mut image);
        }
        block.finish().unwrap();
        assert_eq!(block.valid_pixels().len(), 16 * 16);
    }

    #[test]
    fn test_tile_buffer_bounds() {
        let tile = Tile::new(10, 20, 4, 0);
        let mut buffer = TileBuffer::new(tile, 5).unwrap();

        assert!(buffer.set(14, 24, Color::WHITE));
        assert!(!buffer.set(15, 20, Color::WHITE));
        assert!(!buffer.set(9, 20, Color::WHITE));
        assert_eq!(buffer.get(14, 24), Some(Color::WHITE));
        assert_eq!(buffer.get(10, 20), None);

        // The shared border column is cached but not part of the tile
        assert!(buffer.valid_pixels().is_empty());
        buffer.set(11, 21, Color::GRAY);
        assert_eq!(buffer.valid_pixels(), vec![(11, 21, Color::GRAY)]);

        let mut image = ImageBuffer::new(12, 22);
        buffer.copy_to(&mut image);
        assert_eq!(image.get(11, 21), Color::GRAY);
    }

    #[test]
    fn test_tile_buffer_allocation_failure() {
        let tile = Tile::new(0, 0, u32::MAX, 0);
        assert!(matches!(
            TileBuffer::new(tile, u32::MAX),
            Err(BlockError::Allocation { extent: u32::MAX })
        ));
    }

    #[test]
    fn test_corners_agree() {
        let same = Corners {
            tl: Color::GRAY,
            tr: Color::GRAY,
            bl: Color::GRAY,
            br: Color::gray(0.52),
        };
        assert!(same.agree(0.003));
        let edge = Corners { br: Color::WHITE, ..same };
        assert!(!edge.agree(0.003));
    }
}
