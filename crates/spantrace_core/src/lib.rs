//! Spantrace Core - surface description for the CSG path tracer.
//!
//! This crate provides:
//!
//! - **Images**: shared, immutable RGBA buffers decoded with the `image` crate
//! - **Textures**: spatial color/scalar fields, including cube maps and filters
//! - **Materials**: five textures plus an index of refraction
//!
//! # Example
//!
//! ```ignore
//! use spantrace_core::{Material, Texture};
//! use spantrace_math::Color;
//!
//! let glass = Material::glass(0.7, 0.9, 1.3);
//! let lamp = Material::new().with_emissive(Texture::solid(Color::gray(2.0)));
//! ```

pub mod image;
pub mod material;
pub mod texture;

// Re-export commonly used types
pub use crate::image::{Image, ImageError, ImageResult};
pub use material::{Material, SurfaceSample};
pub use texture::{Skybox, Texture};
