use crate::Vec3;

/// A ray in 3D space with an origin and a direction.
///
/// `Ray::new` normalizes the direction so the ray parameter `t` is a world
/// distance. `Ray::from_raw` keeps the direction as given; transformed
/// objects use it so that `t` along a local-space ray still matches the
/// world-space ray it came from.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// Create a new ray with a normalized direction.
    ///
    /// A zero direction stays zero; intersection code treats such a ray as
    /// degenerate rather than failing.
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    /// Create a ray without touching the direction's length.
    pub fn from_raw(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    /// Get the origin point of the ray.
    #[inline]
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// Get the direction vector of the ray.
    #[inline]
    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    /// Get the point along the ray at parameter t.
    ///
    /// Returns: origin + t * direction
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}
