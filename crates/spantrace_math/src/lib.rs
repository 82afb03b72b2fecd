// Re-export glam for convenience
pub use glam::*;

// Spantrace math types
mod color;
mod ray;
mod transform;
mod vector;

pub use color::Color;
pub use ray::Ray;
pub use transform::Mat4Ext;
pub use vector::Vec3Ext;
