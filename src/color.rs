//! Colors and the working colorspaces used for matching and dithering.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::ParseNameError;

/// An opaque 8-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn from_rgb24(rgb: u32) -> Self {
        Self::new((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8)
    }

    pub const fn to_rgb24(self) -> u32 {
        ((self.r as u32) << 16) | ((self.g as u32) << 8) | self.b as u32
    }

    pub fn hex(self) -> String {
        format!("#{:06x}", self.to_rgb24())
    }
}

impl From<image::Rgb<u8>> for Color {
    fn from(p: image::Rgb<u8>) -> Self {
        Self::new(p.0[0], p.0[1], p.0[2])
    }
}

impl From<Color> for image::Rgb<u8> {
    fn from(c: Color) -> Self {
        image::Rgb([c.r, c.g, c.b])
    }
}

/// A point in working space.
pub type Working = [f32; 3];

#[inline]
pub fn distance_sq(a: &Working, b: &Working) -> f32 {
    let d0 = a[0] - b[0];
    let d1 = a[1] - b[1];
    let d2 = a[2] - b[2];
    d0 * d0 + d1 * d1 + d2 * d2
}

/// Working colorspace selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorspaceKind {
    Rgb,
    Yuv,
    #[default]
    Yiq,
}

impl ColorspaceKind {
    pub const ALL: [ColorspaceKind; 3] = [Self::Rgb, Self::Yuv, Self::Yiq];

    pub fn name(self) -> &'static str {
        match self {
            Self::Rgb => "rgb",
            Self::Yuv => "yuv",
            Self::Yiq => "yiq",
        }
    }

    /// Row-major forward matrix; each row produces one working channel.
    fn matrix(self) -> [f32; 9] {
        match self {
            Self::Rgb => [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            Self::Yuv => [
                0.299, 0.587, 0.114, //
                -0.14713, -0.28886, 0.436, //
                0.615, -0.51499, -0.10001,
            ],
            Self::Yiq => [
                0.299, 0.587, 0.114, //
                0.595716, -0.274453, -0.321263, //
                0.211456, -0.522591, 0.311135,
            ],
        }
    }
}

impl fmt::Display for ColorspaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ColorspaceKind {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or(ParseNameError { kind: "colorspace", name: s })
    }
}

/// RGB <-> working-space transform. The inverse is derived once at
/// construction, so per-pixel conversion is two matrix products at most.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Colorspace {
    kind: ColorspaceKind,
    forward: [f32; 9],
    inverse: [f32; 9],
}

impl Colorspace {
    pub fn new(kind: ColorspaceKind) -> Self {
        let forward = kind.matrix();
        Self { kind, forward, inverse: invert3(&forward) }
    }

    /// Transforms an RGB triple in [0, 1] into working space.
    #[inline]
    pub fn from_unit_rgb(&self, rgb: Working) -> Working {
        if self.kind == ColorspaceKind::Rgb {
            return rgb;
        }
        mul3(&self.forward, &rgb)
    }

    #[inline]
    pub fn to_working(&self, c: Color) -> Working {
        self.from_unit_rgb([
            c.r as f32 / 255.0,
            c.g as f32 / 255.0,
            c.b as f32 / 255.0,
        ])
    }

    /// Transforms back to RGB, clamping each channel to [0, 1] before
    /// requantizing to 8 bits.
    #[inline]
    pub fn to_color(&self, w: &Working) -> Color {
        let rgb = if self.kind == ColorspaceKind::Rgb { *w } else { mul3(&self.inverse, w) };
        let q = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        Color::new(q(rgb[0]), q(rgb[1]), q(rgb[2]))
    }
}

impl From<ColorspaceKind> for Colorspace {
    fn from(kind: ColorspaceKind) -> Self {
        Self::new(kind)
    }
}

#[inline]
fn mul3(m: &[f32; 9], v: &Working) -> Working {
    [
        m[0] * v[0] + m[1] * v[1] + m[2] * v[2],
        m[3] * v[0] + m[4] * v[1] + m[5] * v[2],
        m[6] * v[0] + m[7] * v[1] + m[8] * v[2],
    ]
}

/// Inverse of a row-major 3x3 matrix via determinant and cofactors.
fn invert3(m: &[f32; 9]) -> [f32; 9] {
    let det = m[0] * (m[4] * m[8] - m[5] * m[7]) - m[1] * (m[3] * m[8] - m[5] * m[6])
        + m[2] * (m[3] * m[7] - m[4] * m[6]);
    let inv = 1.0 / det;
    [
        inv * (m[4] * m[8] - m[5] * m[7]),
        inv * (m[2] * m[7] - m[1] * m[8]),
        inv * (m[1] * m[5] - m[2] * m[4]),
        inv * (m[5] * m[6] - m[3] * m[8]),
        inv * (m[0] * m[8] - m[2] * m[6]),
        inv * (m[2] * m[3] - m[0] * m[5]),
        inv * (m[3] * m[7] - m[4] * m[6]),
        inv * (m[1] * m[6] - m[0] * m[7]),
        inv * (m[0] * m[4] - m[1] * m[3]),
    ]
}
