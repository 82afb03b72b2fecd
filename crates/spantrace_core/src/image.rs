//! Shared, immutable pixel images for textures.
//!
//! Decoding goes through the `image` crate; the renderer only ever sees
//! linear RGBA floats behind an `Arc`, so cloning an `Image` is cheap and
//! every texture that references it shares one buffer.

use std::path::Path;
use std::sync::Arc;

use spantrace_math::Color;
use thiserror::Error;

/// Errors from the image collaborator.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Failed to load image {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("Failed to store image {path}: {reason}")]
    Store { path: String, reason: String },

    #[error("Pixel buffer holds {actual} pixels, expected {expected}")]
    BadDimensions { expected: usize, actual: usize },
}

pub type ImageResult<T> = Result<T, ImageError>;

#[derive(Debug)]
struct ImageData {
    width: u32,
    height: u32,
    /// Row-major RGBA, 0-1 range
    pixels: Vec<[f32; 4]>,
}

/// A read-only RGBA image shared by reference count.
#[derive(Debug, Clone)]
pub struct Image {
    data: Arc<ImageData>,
}

impl Image {
    /// Build an image from row-major RGBA pixels.
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<[f32; 4]>) -> ImageResult<Self> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(ImageError::BadDimensions {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            data: Arc::new(ImageData {
                width,
                height,
                pixels,
            }),
        })
    }

    /// A 1x1 image of a single color.
    pub fn solid(color: Color) -> Self {
        Self {
            data: Arc::new(ImageData {
                width: 1,
                height: 1,
                pixels: vec![[color.r, color.g, color.b, color.a]],
            }),
        }
    }

    /// Decode an image file (PNG and anything else the `image` crate reads).
    ///
    /// 8-bit channels are mapped straight to 0-1 without a gamma curve.
    pub fn open(path: impl AsRef<Path>) -> ImageResult<Self> {
        let path = path.as_ref();
        let img = ::image::open(path).map_err(|e| ImageError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        let pixels = rgba
            .pixels()
            .map(|p| {
                [
                    p[0] as f32 / 255.0,
                    p[1] as f32 / 255.0,
                    p[2] as f32 / 255.0,
                    p[3] as f32 / 255.0,
                ]
            })
            .collect();

        log::debug!("Loaded image: {} ({}x{})", path.display(), width, height);

        Self::from_pixels(width, height, pixels)
    }

    pub fn width(&self) -> u32 {
        self.data.width
    }

    pub fn height(&self) -> u32 {
        self.data.height
    }

    fn texel(&self, x: i64, y: i64) -> Option<[f32; 4]> {
        if x < 0 || y < 0 || x >= self.data.width as i64 || y >= self.data.height as i64 {
            return None;
        }
        let idx = y as usize * self.data.width as usize + x as usize;
        self.data.pixels.get(idx).copied()
    }

    /// Opaque color of a pixel; black outside the image.
    pub fn pixel(&self, x: i64, y: i64) -> Color {
        self.texel(x, y)
            .map(|p| Color::rgb(p[0], p[1], p[2]))
            .unwrap_or(Color::BLACK)
    }

    /// Alpha of a pixel; 0 outside the image.
    pub fn pixel_alpha(&self, x: i64, y: i64) -> f32 {
        self.texel(x, y).map(|p| p[3]).unwrap_or(0.0)
    }

    /// True when both handles share the same pixel buffer.
    pub fn ptr_eq(&self, other: &Image) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}
