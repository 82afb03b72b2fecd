//! Pinhole camera for primary rays.

use serde::{Deserialize, Serialize};
use spantrace_math::{Ray, Vec3};

/// Default world-space distance from the eye to the screen.
pub const DEFAULT_SCREEN_DISTANCE: f32 = 2.0;

/// A pinhole at the origin looking down -Z through a world-space screen.
///
/// The screen spans `[-screen_width, screen_width]` by
/// `[-screen_height, screen_height]` at `z = -screen_distance`, so the field
/// of view is set by the ratio of the sizes to the distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub screen_width: f32,
    pub screen_height: f32,
    pub screen_distance: f32,
}

impl Camera {
    pub fn new(screen_width: f32, screen_height: f32, screen_distance: f32) -> Self {
        Self {
            screen_width,
            screen_height,
            screen_distance,
        }
    }

    /// Camera with square pixels for an image of `width` x `height`: the
    /// shorter side spans two screen units at distance 2.
    pub fn for_resolution(width: u32, height: u32) -> Self {
        let min = width.min(height).max(1) as f32;
        Self::new(
            width as f32 / min,
            height as f32 / min,
            DEFAULT_SCREEN_DISTANCE,
        )
    }

    pub fn with_screen_distance(mut self, distance: f32) -> Self {
        self.screen_distance = distance;
        self
    }

    /// Ray through normalized screen coordinates, `x` right and `y` up,
    /// both in `[-1, 1]`.
    pub fn ray(&self, x: f32, y: f32) -> Ray {
        Ray::new(
            Vec3::ZERO,
            Vec3::new(
                x * self.screen_width,
                y * self.screen_height,
                -self.screen_distance,
            ),
        )
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(4.0 / 3.0, 1.0, DEFAULT_SCREEN_DISTANCE)
    }
}
