//! RGBA color used for light energy.
//!
//! Channels are linear and unbounded above; a pixel value of 8.0 is simply
//! a very bright surface. Addition accumulates energy channel by channel,
//! and `over` composites with premultiplied alpha.

use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Sub};

/// A linear RGBA color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const CLEAR: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const GRAY: Color = Color::rgb(0.5, 0.5, 0.5);
    pub const RED: Color = Color::rgb(1.0, 0.0, 0.0);
    pub const GREEN: Color = Color::rgb(0.0, 1.0, 0.0);
    pub const BLUE: Color = Color::rgb(0.0, 0.0, 1.0);

    /// Opaque color.
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque gray with every channel set to `v`.
    pub const fn gray(v: f32) -> Self {
        Self::rgb(v, v, v)
    }

    /// Mean of the three color channels.
    #[inline]
    pub fn average(&self) -> f32 {
        (self.r + self.g + self.b) * (1.0 / 3.0)
    }

    #[inline]
    pub fn max_component(&self) -> f32 {
        self.r.max(self.g).max(self.b)
    }

    /// Squared RGB distance, used as the perceptual delta between samples.
    #[inline]
    pub fn distance_squared(&self, other: Color) -> f32 {
        let dr = self.r - other.r;
        let dg = self.g - other.g;
        let db = self.b - other.b;
        dr * dr + dg * dg + db * db
    }

    /// Linear interpolation of all four channels.
    #[inline]
    pub fn lerp(self, other: Color, t: f32) -> Color {
        Color::rgba(
            self.r + (other.r - self.r) * t,
            self.g + (other.g - self.g) * t,
            self.b + (other.b - self.b) * t,
            self.a + (other.a - self.a) * t,
        )
    }

    /// Premultiplied-alpha "over": `self` composited in front of `back`.
    pub fn over(self, back: Color) -> Color {
        let keep = 1.0 - self.a;
        Color::rgba(
            self.r * self.a + back.r * keep,
            self.g * self.a + back.g * keep,
            self.b * self.a + back.b * keep,
            1.0 - (1.0 - back.a) * keep,
        )
    }

    /// Fold energy above 1.0 into the other channels, then clamp.
    ///
    /// Very bright light saturates toward white instead of keeping its hue.
    pub fn soft_clip(self) -> Color {
        let peak = self.max_component();
        if peak <= 1.0 {
            return self;
        }
        let spill = (peak - 1.0) / 2.0;
        Color::rgba(
            (self.r + spill).min(1.0),
            (self.g + spill).min(1.0),
            (self.b + spill).min(1.0),
            self.a,
        )
    }

    pub fn is_finite(&self) -> bool {
        self.r.is_finite() && self.g.is_finite() && self.b.is_finite() && self.a.is_finite()
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

impl Add for Color {
    type Output = Color;

    fn add(self, rhs: Color) -> Color {
        Color::rgba(
            self.r + rhs.r,
            self.g + rhs.g,
            self.b + rhs.b,
            1.0 - (1.0 - self.a) * (1.0 - rhs.a),
        )
    }
}

impl AddAssign for Color {
    fn add_assign(&mut self, rhs: Color) {
        *self = *self + rhs;
    }
}

impl Sub for Color {
    type Output = Color;

    /// Channel difference; alpha is taken from the left side.
    fn sub(self, rhs: Color) -> Color {
        Color::rgba(self.r - rhs.r, self.g - rhs.g, self.b - rhs.b, self.a)
    }
}

impl Mul for Color {
    type Output = Color;

    /// Filter one color by another (e.g. light through a tinted surface).
    fn mul(self, rhs: Color) -> Color {
        Color::rgba(self.r * rhs.r, self.g * rhs.g, self.b * rhs.b, self.a * rhs.a)
    }
}

impl Mul<f32> for Color {
    type Output = Color;

    fn mul(self, rhs: f32) -> Color {
        Color::rgba(self.r * rhs, self.g * rhs, self.b * rhs, self.a)
    }
}

impl Mul<Color> for f32 {
    type Output = Color;

    fn mul(self, rhs: Color) -> Color {
        rhs * self
    }
}

impl MulAssign<f32> for Color {
    fn mul_assign(&mut self, rhs: f32) {
        *self = *self * rhs;
    }
}

impl Div<f32> for Color {
    type Output = Color;

    fn div(self, rhs: f32) -> Color {
        Color::rgba(self.r / rhs, self.g / rhs, self.b / rhs, self.a)
    }
}

impl DivAssign<f32> for Color {
    fn div_assign(&mut self, rhs: f32) {
        *self = *self / rhs;
    }
}
