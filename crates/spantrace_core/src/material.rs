//! Surface materials.
//!
//! A material is five textures plus an index of refraction. The integrator
//! samples every channel at the hit point, so any of them can vary over a
//! surface.

use spantrace_math::{Color, Mat4, Vec3};

use crate::image::{Image, ImageResult};
use crate::texture::{Skybox, Texture};
use std::path::Path;

/// Material response of a surface.
#[derive(Debug, Clone)]
pub struct Material {
    /// Color filter applied to reflected and scattered light
    pub reflect: Texture,
    /// Scatter coefficient, scalar in 0..=1: 0 = mirror, 1 = fully diffuse
    pub scatter: Texture,
    /// Light emitted by the surface
    pub emissive: Texture,
    /// Color filter applied to refracted light
    pub transmit: Texture,
    /// Scalar in 0..=1 balancing reflection (0) against transmission (1)
    pub transmit_reflect: Texture,
    /// Index of refraction of the solid behind the surface
    pub ior: f32,
}

/// All channels of a material evaluated at one point.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceSample {
    pub reflect: Color,
    pub scatter: f32,
    pub emissive: Color,
    pub transmit: Color,
    pub transmit_reflect: f32,
}

impl Material {
    /// A white diffuse surface that neither emits nor transmits.
    pub fn new() -> Self {
        Self {
            reflect: Texture::solid(Color::WHITE),
            scatter: Texture::value(1.0),
            emissive: Texture::solid(Color::BLACK),
            transmit: Texture::solid(Color::BLACK),
            transmit_reflect: Texture::value(0.0),
            ior: 1.0,
        }
    }

    /// Diffuse surface of the given color.
    pub fn diffuse(color: Color) -> Self {
        Self::new().with_reflect(Texture::solid(color))
    }

    /// Perfect mirror tinted by `color`.
    pub fn mirror(color: Color) -> Self {
        Self::new()
            .with_reflect(Texture::solid(color))
            .with_scatter(Texture::value(0.0))
    }

    /// Pure light source: black, non-reflective, emitting `color`.
    pub fn emitter(color: Color) -> Self {
        Self::new()
            .with_reflect(Texture::solid(Color::BLACK))
            .with_scatter(Texture::value(0.0))
            .with_emissive(Texture::solid(color))
    }

    /// Clear dielectric such as glass.
    pub fn glass(reflect: f32, transmit: f32, ior: f32) -> Self {
        Self::new()
            .with_reflect(Texture::value(reflect))
            .with_scatter(Texture::value(0.0))
            .with_transmit(Texture::value(transmit))
            .with_transmit_reflect(Texture::value(1.0))
            .with_ior(ior)
    }

    /// Emissive cube map read from `top.png`, `bottom.png`, `left.png`,
    /// `right.png`, `front.png` and `back.png` in `dir`.
    pub fn skybox(dir: impl AsRef<Path>) -> ImageResult<Self> {
        let dir = dir.as_ref();
        let face = |name: &str| Image::open(dir.join(format!("{name}.png")));
        let skybox = Skybox {
            top: face("top")?,
            bottom: face("bottom")?,
            left: face("left")?,
            right: face("right")?,
            front: face("front")?,
            back: face("back")?,
        };
        log::info!("Loaded skybox from {}", dir.display());
        Ok(Self::new()
            .with_reflect(Texture::solid(Color::BLACK))
            .with_scatter(Texture::value(0.0))
            .with_emissive(Texture::skybox(skybox)))
    }

    pub fn with_reflect(mut self, texture: Texture) -> Self {
        self.reflect = texture;
        self
    }

    pub fn with_scatter(mut self, texture: Texture) -> Self {
        self.scatter = texture;
        self
    }

    pub fn with_emissive(mut self, texture: Texture) -> Self {
        self.emissive = texture;
        self
    }

    pub fn with_transmit(mut self, texture: Texture) -> Self {
        self.transmit = texture;
        self
    }

    pub fn with_transmit_reflect(mut self, texture: Texture) -> Self {
        self.transmit_reflect = texture;
        self
    }

    pub fn with_ior(mut self, ior: f32) -> Self {
        self.ior = ior;
        self
    }

    /// Evaluate every channel at `pos`.
    pub fn sample(&self, pos: Vec3) -> SurfaceSample {
        SurfaceSample {
            reflect: self.reflect.color(pos),
            scatter: self.scatter.scalar(pos),
            emissive: self.emissive.color(pos),
            transmit: self.transmit.color(pos),
            transmit_reflect: self.transmit_reflect.scalar(pos),
        }
    }

    /// The same material with every texture looked up through `m`.
    pub fn transform(&self, m: &Mat4) -> Material {
        Material {
            reflect: self.reflect.transform(m),
            scatter: self.scatter.transform(m),
            emissive: self.emissive.transform(m),
            transmit: self.transmit.transform(m),
            transmit_reflect: self.transmit_reflect.transform(m),
            ior: self.ior,
        }
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::new()
    }
}
