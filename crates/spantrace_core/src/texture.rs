//! Spatial textures: functions from a 3D position to a color or a scalar.
//!
//! Every material channel is a texture, so a surface can vary its
//! reflectance, roughness, emission, transmission and reflect/transmit
//! balance across space. Leaf variants hold a value or an image; the
//! remaining variants wrap (and own) another texture.

use spantrace_math::{Color, Mat4, Vec3};

use crate::image::Image;

/// Six face images of a cube map, addressed by direction.
#[derive(Debug, Clone)]
pub struct Skybox {
    pub top: Image,
    pub bottom: Image,
    pub left: Image,
    pub right: Image,
    pub front: Image,
    pub back: Image,
}

impl Skybox {
    /// Pick the face a direction points at and the texel on it.
    ///
    /// Returns `None` for the zero vector.
    fn face_texel(&self, v: Vec3) -> Option<(&Image, i64, i64)> {
        if v == Vec3::ZERO {
            return None;
        }
        let a = v.abs();
        let (face, u, w) = if a.x > a.y && a.x > a.z {
            if v.x < 0.0 {
                (&self.left, -v.z / a.x, v.y / a.x)
            } else {
                (&self.right, v.z / a.x, v.y / a.x)
            }
        } else if a.y > a.z {
            if v.y < 0.0 {
                (&self.bottom, -v.x / a.y, v.z / a.y)
            } else {
                (&self.top, v.x / a.y, v.z / a.y)
            }
        } else if v.z < 0.0 {
            (&self.back, v.x / a.z, v.y / a.z)
        } else {
            (&self.front, -v.x / a.z, v.y / a.z)
        };

        // Face coordinates are -1..1 with +y up
        let x = (u * 0.5 + 0.5) * face.width() as f32;
        let y = (0.5 - w * 0.5) * face.height() as f32;
        Some((face, x.floor() as i64, y.floor() as i64))
    }
}

/// A spatial texture.
#[derive(Debug, Clone)]
pub enum Texture {
    /// The same color everywhere.
    Color(Color),
    /// Image tiled over the xy plane, one copy per unit square.
    Image(Image),
    /// Alpha channel of an image tiled over the xy plane, as gray.
    ImageAlpha(Image),
    /// Cube map looked up by the direction of the position from the origin.
    ImageSkybox(Box<Skybox>),
    /// Alpha channel of a cube map, as gray.
    ImageSkyboxAlpha(Box<Skybox>),
    /// Inner texture scaled channel-wise by a constant color.
    Multiply { factor: Color, inner: Box<Texture> },
    /// Logarithmic compression of the inner texture, for viewing HDR data.
    Log(Box<Texture>),
    /// Maps directions onto a mirror-ball photo in the unit square.
    MirrorBallSkymap(Box<Texture>),
    /// Maps directions onto a longitude/latitude image in the unit square.
    SphericalSkymap(Box<Texture>),
    /// Inner texture looked up at `matrix * position`.
    Transformed { matrix: Mat4, inner: Box<Texture> },
}

impl Texture {
    pub fn solid(color: Color) -> Self {
        Texture::Color(color)
    }

    /// Gray constant, handy for scalar channels.
    pub fn value(v: f32) -> Self {
        Texture::Color(Color::gray(v))
    }

    pub fn multiply(factor: Color, inner: Texture) -> Self {
        Texture::Multiply {
            factor,
            inner: Box::new(inner),
        }
    }

    pub fn log(inner: Texture) -> Self {
        Texture::Log(Box::new(inner))
    }

    pub fn mirror_ball(inner: Texture) -> Self {
        Texture::MirrorBallSkymap(Box::new(inner))
    }

    pub fn spherical(inner: Texture) -> Self {
        Texture::SphericalSkymap(Box::new(inner))
    }

    pub fn skybox(skybox: Skybox) -> Self {
        Texture::ImageSkybox(Box::new(skybox))
    }

    pub fn skybox_alpha(skybox: Skybox) -> Self {
        Texture::ImageSkyboxAlpha(Box::new(skybox))
    }

    /// Sample the texture color at a position.
    pub fn color(&self, pos: Vec3) -> Color {
        match self {
            Texture::Color(c) => *c,
            Texture::Image(image) => {
                let (x, y) = tile_texel(image, pos);
                image.pixel(x, y)
            }
            Texture::ImageAlpha(image) => {
                let (x, y) = tile_texel(image, pos);
                Color::gray(image.pixel_alpha(x, y))
            }
            Texture::ImageSkybox(skybox) => skybox
                .face_texel(pos)
                .map(|(face, x, y)| face.pixel(x, y))
                .unwrap_or(Color::BLACK),
            Texture::ImageSkyboxAlpha(skybox) => skybox
                .face_texel(pos)
                .map(|(face, x, y)| Color::gray(face.pixel_alpha(x, y)))
                .unwrap_or(Color::BLACK),
            Texture::Multiply { factor, inner } => inner.color(pos) * *factor,
            Texture::Log(inner) => {
                let c = inner.color(pos);
                Color::rgba(log_scale(c.r), log_scale(c.g), log_scale(c.b), c.a)
            }
            Texture::MirrorBallSkymap(inner) => inner.color(mirror_ball_coords(pos)),
            Texture::SphericalSkymap(inner) => inner.color(spherical_coords(pos)),
            Texture::Transformed { matrix, inner } => inner.color(matrix.transform_point3(pos)),
        }
    }

    /// Sample the texture as a scalar.
    ///
    /// Alpha textures return their alpha directly; everything else returns
    /// the mean of the color channels.
    pub fn scalar(&self, pos: Vec3) -> f32 {
        match self {
            Texture::ImageAlpha(image) => {
                let (x, y) = tile_texel(image, pos);
                image.pixel_alpha(x, y)
            }
            Texture::ImageSkyboxAlpha(skybox) => skybox
                .face_texel(pos)
                .map(|(face, x, y)| face.pixel_alpha(x, y))
                .unwrap_or(0.0),
            Texture::MirrorBallSkymap(inner) => inner.scalar(mirror_ball_coords(pos)),
            Texture::SphericalSkymap(inner) => inner.scalar(spherical_coords(pos)),
            Texture::Transformed { matrix, inner } => inner.scalar(matrix.transform_point3(pos)),
            _ => self.color(pos).average(),
        }
    }

    /// Deep copy of the texture tree.
    ///
    /// Images are shared, not copied; they are immutable.
    pub fn duplicate(&self) -> Texture {
        self.clone()
    }

    /// The same field seen through a coordinate transform:
    /// `t.transform(m).color(p) == t.color(m * p)`.
    pub fn transform(&self, m: &Mat4) -> Texture {
        match self {
            Texture::Color(c) => Texture::Color(*c),
            Texture::Transformed { matrix, inner } => Texture::Transformed {
                matrix: *matrix * *m,
                inner: inner.clone(),
            },
            other => Texture::Transformed {
                matrix: *m,
                inner: Box::new(other.clone()),
            },
        }
    }
}

/// Free-function form of [`Texture::transform`].
pub fn transform(m: &Mat4, texture: &Texture) -> Texture {
    texture.transform(m)
}

/// Texel for an image repeated over the xy plane with +y up.
fn tile_texel(image: &Image, pos: Vec3) -> (i64, i64) {
    let x = pos.x - pos.x.floor();
    let y = 1.0 - (pos.y - pos.y.floor());
    let w = image.width() as i64;
    let h = image.height() as i64;
    let xi = ((x * w as f32).floor() as i64).clamp(0, (w - 1).max(0));
    let yi = ((y * h as f32).floor() as i64).clamp(0, (h - 1).max(0));
    (xi, yi)
}

fn log_scale(v: f32) -> f32 {
    if v <= 1e-30 {
        return 0.0;
    }
    0.5 + v.log2() / 256.0
}

fn mirror_ball_coords(v: Vec3) -> Vec3 {
    if v == Vec3::ZERO {
        return Vec3::ZERO;
    }
    let v = v.normalize();
    if v.z <= -1.0 {
        return Vec3::new(0.0, 0.5, 0.0);
    }
    let d = (2.0 + 2.0 * v.z).sqrt();
    if d == 0.0 {
        return Vec3::new(0.0, 0.5, 0.0);
    }
    Vec3::new(v.x / d * 0.5 + 0.5, v.y / d * 0.5 + 0.5, 0.0)
}

fn spherical_coords(v: Vec3) -> Vec3 {
    use std::f32::consts::{FRAC_PI_2, PI};

    if v == Vec3::ZERO {
        return Vec3::ZERO;
    }
    let v = v.normalize();
    let theta = v.y.atan2(v.x);
    let phi = v.z.clamp(-1.0, 1.0).asin();
    Vec3::new(theta * 0.5 / PI + 0.5, phi / FRAC_PI_2 * 0.5 + 0.5, 0.0)
}
