//! Frame buffer and the tile-by-tile render driver.
//!
//! The driver keeps a bounded batch of tiles in flight, polls them for
//! partial results and collects the ones that fail instead of aborting the
//! frame. Tiles come from any [`BlockRenderer`] factory, so the same loop
//! drives local thread-pool rendering and remote network rendering.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ::image::codecs::hdr::HdrEncoder;
use ::image::{Rgb, RgbaImage};
use spantrace_core::{Image, ImageError, ImageResult};
use spantrace_math::Color;

use crate::block::{BlockError, BlockRenderer, BlockResult, RenderBlock};
use crate::object::Object;
use crate::pool::ThreadPool;
use crate::settings::RenderSettings;
use crate::tile::{generate_tiles, Tile};

/// Tiles started before the driver waits for the batch to finish.
pub const MAX_BLOCKS_IN_FLIGHT: usize = 200;

/// How often running tiles are polled for partial results.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Apply gamma correction (gamma = 2.0).
#[inline]
pub fn linear_to_gamma(linear: f32) -> f32 {
    if linear > 0.0 {
        linear.sqrt()
    } else {
        0.0
    }
}

/// Convert a color to 8-bit RGBA.
pub fn color_to_rgba(color: Color) -> [u8; 4] {
    let to_byte = |c: f32| (255.0 * linear_to_gamma(c).clamp(0.0, 1.0)) as u8;
    [to_byte(color.r), to_byte(color.g), to_byte(color.b), 255]
}

/// Mutable render output.
pub struct ImageBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Color>,
}

impl ImageBuffer {
    /// Create a new image buffer filled with black.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Color::BLACK; width as usize * height as usize],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Color {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, color: Color) {
        self.pixels[y as usize * self.width as usize + x as usize] = color;
    }

    pub fn fill(&mut self, color: Color) {
        self.pixels.fill(color);
    }

    /// Gamma-corrected RGBA bytes, row-major.
    pub fn to_rgba(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.pixels.len() * 4);
        for color in &self.pixels {
            bytes.extend_from_slice(&color_to_rgba(*color));
        }
        bytes
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> ImageResult<()> {
        let path = path.as_ref();
        let store_err = |reason: String| ImageError::Store {
            path: path.display().to_string(),
            reason,
        };
        let img = RgbaImage::from_raw(self.width, self.height, self.to_rgba())
            .ok_or_else(|| store_err("pixel buffer does not match the image size".to_string()))?;
        img.save(path).map_err(|e| store_err(e.to_string()))?;
        log::info!("Saved {}x{} PNG to {}", self.width, self.height, path.display());
        Ok(())
    }

    /// Write linear (un-clamped) colors as Radiance HDR.
    pub fn save_hdr(&self, path: impl AsRef<Path>) -> ImageResult<()> {
        let path = path.as_ref();
        let store_err = |reason: String| ImageError::Store {
            path: path.display().to_string(),
            reason,
        };
        let file = File::create(path).map_err(|e| store_err(e.to_string()))?;
        let data: Vec<Rgb<f32>> = self.pixels.iter().map(|c| Rgb([c.r.max(0.0), c.g.max(0.0), c.b.max(0.0)])).collect();
        HdrEncoder::new(BufWriter::new(file))
            .encode(&data, self.width as usize, self.height as usize)
            .map_err(|e| store_err(e.to_string()))?;
        log::info!("Saved {}x{} HDR to {}", self.width, self.height, path.display());
        Ok(())
    }

    /// Snapshot as a shared read-only image, usable as a texture.
    pub fn freeze(&self) -> ImageResult<Image> {
        let pixels = self.pixels.iter().map(|c| [c.r, c.g, c.b, c.a]).collect();
        Image::from_pixels(self.width, self.height, pixels)
    }
}

/// What happened during a render.
#[derive(Debug, Default)]
pub struct RenderReport {
    pub tiles: usize,
    pub failed: Vec<(Tile, BlockError)>,
    pub elapsed: Duration,
}

impl RenderReport {
    /// True when every tile rendered.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Render every tile of the frame through `start_block`.
///
/// `progress` is called after each poll with the partially filled image,
/// the number of finished tiles and the total tile count.
pub fn render<F, P>(settings: &RenderSettings, mut start_block: F, mut progress: P) -> (ImageBuffer, RenderReport)
where
    F: FnMut(Tile) -> BlockResult<Box<dyn BlockRenderer>>,
    P: FnMut(&ImageBuffer, usize, usize),
{
    let start = Instant::now();
    let tiles = generate_tiles(settings.width, settings.height, settings.tile_size);
    let total = tiles.len();
    log::info!(
        "Rendering {}x{} in {} tiles of {} px ({} spp, depth {})",
        settings.width,
        settings.height,
        total,
        settings.tile_size,
        settings.samples_per_pixel,
        settings.ray_depth
    );

    let mut image = ImageBuffer::new(settings.width, settings.height);
    let mut report = RenderReport {
        tiles: total,
        ..Default::default()
    };
    let mut finished = 0;

    for batch in tiles.chunks(MAX_BLOCKS_IN_FLIGHT) {
        let mut blocks = Vec::with_capacity(batch.len());
        for &tile in batch {
            match start_block(tile) {
                Ok(block) => blocks.push(block),
                Err(e) => {
                    log::error!("Tile {} at ({}, {}) could not start: {}", tile.index, tile.x, tile.y, e);
                    report.failed.push((tile, e));
                    finished += 1;
                }
            }
        }

        loop {
            let mut done = 0;
            for block in &blocks {
                // Sample done() first so the copy cannot miss final pixels
                if block.done() {
                    done += 1;
                }
                block.copy_to_buffer(&mut image);
            }
            progress(&image, finished + done, total);
            if done == blocks.len() {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }

        for mut block in blocks {
            if let Err(e) = block.finish() {
                report.failed.push((block.tile(), e));
            }
            block.copy_to_buffer(&mut image);
            finished += 1;
        }
    }

    report.elapsed = start.elapsed();
    if report.is_complete() {
        log::info!("Rendered {} tiles in {:.2?}", total, report.elapsed);
    } else {
        log::warn!("Rendered with {} of {} tiles failed in {:.2?}", report.failed.len(), total, report.elapsed);
    }
    (image, report)
}

/// Render `scene` on the local thread pool.
pub fn render_scene(scene: Arc<dyn Object>, settings: &RenderSettings, pool: &ThreadPool) -> (ImageBuffer, RenderReport) {
    let shared = Arc::new(settings.clone());
    let mut last_logged = 0;
    render(
        settings,
        |tile| {
            let block = RenderBlock::start(tile, Arc::clone(&scene), Arc::clone(&shared), pool)?;
            Ok(Box::new(block) as Box<dyn BlockRenderer>)
        },
        |_, done, total| {
            let percent = done * 100 / total.max(1);
            if percent >= last_logged + 10 {
                last_logged = percent - percent % 10;
                log::debug!("Progress: {}% ({}/{} tiles)", percent, done, total);
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sphere::Sphere;
    use spantrace_core::Material;
    use spantrace_math::Vec3;

    fn room(material: Material) -> Arc<dyn Object> {
        Arc::new(Sphere::new(Vec3::ZERO, 20.0, Arc::new(material)))
    }

    fn small_settings() -> RenderSettings {
        RenderSettings {
            tile_size: 8,
            ..RenderSettings::for_resolution(30, 20)
        }
    }

    #[test]
    fn test_linear_to_gamma() {
        assert_eq!(linear_to_gamma(0.0), 0.0);
        assert_eq!(linear_to_gamma(-1.0), 0.0);
        assert!((linear_to_gamma(1.0) - 1.0).abs() < 0.0001);
        assert!((linear_to_gamma(0.25) - 0.5).abs() < 0.0001);
    }

    #[test]
    fn test_color_to_rgba() {
        assert_eq!(color_to_rgba(Color::BLACK), [0, 0, 0, 255]);
        assert_eq!(color_to_rgba(Color::WHITE), [255, 255, 255, 255]);
        assert_eq!(color_to_rgba(Color::rgb(4.0, 0.25, -1.0)), [255, 127, 0, 255]);
    }

    #[test]
    fn test_image_buffer() {
        let mut image = ImageBuffer::new(4, 3);
        assert_eq!(image.pixels.len(), 12);
        image.set(3, 2, Color::WHITE);
        assert_eq!(image.get(3, 2), Color::WHITE);
        assert_eq!(image.get(0, 0), Color::BLACK);

        let rgba = image.to_rgba();
        assert_eq!(rgba.len(), 48);
        assert_eq!(&rgba[44..48], &[255, 255, 255, 255]);

        let frozen = image.freeze().unwrap();
        assert_eq!((frozen.width(), frozen.height()), (4, 3));
        assert_eq!(frozen.pixel(3, 2), Color::WHITE);
    }

    #[test]
    fn test_save_png_and_hdr() {
        let dir = std::env::temp_dir().join(format!("spantrace-output-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut image = ImageBuffer::new(5, 4);
        image.fill(Color::rgb(1.0, 0.25, 0.0));
        let png = dir.join("frame.png");
        image.save_png(&png).unwrap();

        let loaded = Image::open(&png).unwrap();
        assert_eq!((loaded.width(), loaded.height()), (5, 4));
        let c = loaded.pixel(2, 2);
        assert!((c.r - 1.0).abs() < 0.01 && (c.g - 0.5).abs() < 0.01 && c.b == 0.0, "{c:?}");

        let hdr = dir.join("frame.hdr");
        image.save_hdr(&hdr).unwrap();
        assert!(std::fs::metadata(&hdr).unwrap().len() > 0);

        assert!(matches!(image.save_png(dir.join("missing").join("x.png")), Err(ImageError::Store { .. })));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_render_scene_fills_frame() {
        let glow = Color::rgb(0.2, 0.4, 0.6);
        let settings = small_settings();
        let pool = ThreadPool::new(3);
        let (image, report) = render_scene(room(Material::emitter(glow)), &settings, &pool);

        assert!(report.is_complete());
        assert_eq!(report.tiles, 4 * 3);
        for y in 0..settings.height {
            for x in 0..settings.width {
                assert!(image.get(x, y).distance_squared(glow) < 1e-10, "({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_failed_tiles_are_reported() {
        let settings = small_settings();
        let pool = ThreadPool::new(2);
        let bad = Material::glass(0.5, 0.5, 1.5).with_ior(-1.0);
        let (_, report) = render_scene(room(bad), &settings, &pool);

        assert_eq!(report.failed.len(), report.tiles);
        assert!(report.failed.iter().all(|(_, e)| matches!(e, BlockError::Trace(_))));
    }

    #[test]
    fn test_render_with_custom_blocks() {
        let settings = small_settings();
        let pool = ThreadPool::new(2);
        let scene = room(Material::emitter(Color::WHITE));
        let shared = Arc::new(settings.clone());

        let mut calls = Vec::new();
        let (image, report) = render(
            &settings,
            |tile| {
                if tile.x == 0 && tile.y == 0 {
                    return Err(BlockError::Remote("refused".into()));
                }
                Ok(Box::new(RenderBlock::start(tile, Arc::clone(&scene), Arc::clone(&shared), &pool)?) as Box<dyn BlockRenderer>)
            },
            |_, done, total| calls.push((done, total)),
        );

        assert_eq!(report.failed.len(), 1);
        assert_eq!((report.failed[0].0.x, report.failed[0].0.y), (0, 0));
        assert_eq!(image.get(0, 0), Color::BLACK);
        assert_eq!(image.get(29, 19), Color::WHITE);
        assert_eq!(calls.last(), Some(&(report.tiles, report.tiles)));
    }
}
