//! Dither catalog: error-diffusion kernels and ordered threshold matrices.
//!
//! Every catalog entry is a row-major grid plus a normalizing divisor.
//! Error-diffusion grids are anchored at their centre and their weights sum
//! to the divisor; ordered grids are indexed by `(x mod N, y mod N)` and
//! divided by the divisor to give a threshold in `[0, 1)`.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::{CtifError, ParseNameError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DitherMode {
    None,
    #[default]
    Error,
    Ordered,
}

impl DitherMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Error => "error",
            Self::Ordered => "ordered",
        }
    }
}

impl fmt::Display for DitherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DitherMode {
    type Err = ParseNameError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "error" => Ok(Self::Error),
            "ordered" => Ok(Self::Ordered),
            other => Err(ParseNameError { kind: "dither mode", name: other.to_string() }),
        }
    }
}

/// A dither grid with its trailing normalizing divisor.
#[derive(Debug, Clone, PartialEq)]
pub struct DitherKernel {
    width: usize,
    height: usize,
    values: Vec<f32>,
    divisor: f32,
}

impl DitherKernel {
    pub fn new(width: usize, height: usize, values: Vec<f32>, divisor: f32) -> Self {
        debug_assert_eq!(values.len(), width * height);
        Self { width, height, values, divisor }
    }

    fn from_ints(width: usize, height: usize, values: &[u8], divisor: u32) -> Self {
        Self::new(width, height, values.iter().map(|&v| v as f32).collect(), divisor as f32)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn divisor(&self) -> f32 {
        self.divisor
    }

    #[inline]
    pub fn value(&self, col: usize, row: usize) -> f32 {
        self.values[row * self.width + col]
    }

    /// Ordered threshold for an image position.
    #[inline]
    pub fn threshold(&self, x: u32, y: u32) -> f32 {
        self.value(x as usize % self.width, y as usize % self.height) / self.divisor
    }

    /// Forward neighbours of the anchor as `(dx, dy, weight)`, weights
    /// already divided by the divisor. Entries at or before the anchor in
    /// raster order are skipped.
    pub fn diffusion_taps(&self) -> Vec<(i32, i32, f32)> {
        let (ax, ay) = ((self.width / 2) as i32, (self.height / 2) as i32);
        let mut taps = Vec::new();
        for row in 0..self.height {
            for col in 0..self.width {
                let (dx, dy) = (col as i32 - ax, row as i32 - ay);
                let w = self.value(col, row);
                if w != 0.0 && (dy > 0 || (dy == 0 && dx > 0)) {
                    taps.push((dx, dy, w / self.divisor));
                }
            }
        }
        taps
    }
}

#[rustfmt::skip]
const FLOYD_STEINBERG: [u8; 9] = [
    0, 0, 0,
    0, 0, 7,
    3, 5, 1,
];

#[rustfmt::skip]
const SIERRA_LITE: [u8; 9] = [
    0, 0, 0,
    0, 0, 2,
    1, 1, 0,
];

#[rustfmt::skip]
const CHECKS: [u8; 4] = [
    0, 1,
    1, 0,
];

#[rustfmt::skip]
const BAYER_2: [u8; 4] = [
    1, 3,
    4, 2,
];

#[rustfmt::skip]
const BAYER_4: [u8; 16] = [
     1,  9,  3, 11,
    13,  5, 15,  7,
     4, 12,  2, 10,
    16,  8, 14,  6,
];

#[rustfmt::skip]
const BAYER_8: [u8; 64] = [
     1, 33,  9, 41,  3, 35, 11, 43,
    49, 17, 57, 25, 51, 19, 59, 27,
    13, 45,  5, 37, 15, 47,  7, 39,
    61, 29, 53, 21, 63, 31, 55, 23,
     4, 36, 12, 44,  2, 34, 10, 42,
    52, 20, 60, 28, 50, 18, 58, 26,
    16, 48,  8, 40, 14, 46,  6, 38,
    64, 32, 56, 24, 62, 30, 54, 22,
];

/// Procedurally generated ordered families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    DiagL,
    DiagR,
    Square,
    Diamond,
}

impl Family {
    const ALL: [Family; 4] = [Self::DiagL, Self::DiagR, Self::Square, Self::Diamond];

    fn prefix(self) -> &'static str {
        match self {
            Self::DiagL => "diag-l",
            Self::DiagR => "diag-r",
            Self::Square => "square",
            Self::Diamond => "diamond",
        }
    }

    fn supports(self, n: usize) -> bool {
        (3..=8).contains(&n) && (self != Self::Diamond || n % 2 == 1)
    }

    fn generate(self, n: usize) -> DitherKernel {
        let center = (n / 2) as i64;
        let mut values = Vec::with_capacity(n * n);
        for k in 0..n {
            for j in 0..n {
                let v = match self {
                    Self::DiagL => ((n - 1 - j) + (n - k)) % n,
                    Self::DiagR => (j + (n - k)) % n,
                    Self::Square => k.max(j).pow(2),
                    Self::Diamond => {
                        let d = (j as i64 - center).abs() + (k as i64 - center).abs();
                        (d * d) as usize
                    }
                };
                values.push(v as f32);
            }
        }
        let divisor = match self {
            Self::DiagL | Self::DiagR => n,
            Self::Square | Self::Diamond => n * n,
        };
        DitherKernel::new(n, n, values, divisor as f32)
    }
}

/// Looks up a catalog entry by name, case-insensitively.
pub fn lookup(name: &str) -> Result<DitherKernel> {
    let name = name.to_ascii_lowercase();
    let kernel = match name.as_str() {
        "floyd-steinberg" => DitherKernel::from_ints(3, 3, &FLOYD_STEINBERG, 16),
        "sierra-lite" => DitherKernel::from_ints(3, 3, &SIERRA_LITE, 4),
        "checks" => DitherKernel::from_ints(2, 2, &CHECKS, 2),
        "2x2" => DitherKernel::from_ints(2, 2, &BAYER_2, 5),
        "4x4" => DitherKernel::from_ints(4, 4, &BAYER_4, 17),
        "8x8" => DitherKernel::from_ints(8, 8, &BAYER_8, 65),
        other => generated(other).ok_or_else(|| CtifError::UnknownDitherType(name.clone()))?,
    };
    Ok(kernel)
}

/// Parses `<family>-NxN` names.
fn generated(name: &str) -> Option<DitherKernel> {
    Family::ALL.into_iter().find_map(|family| {
        let size = name.strip_prefix(family.prefix())?.strip_prefix('-')?;
        let (w, h) = size.split_once('x')?;
        let (w, h): (usize, usize) = (w.parse().ok()?, h.parse().ok()?);
        (w == h && family.supports(w)).then(|| family.generate(w))
    })
}

/// Every name [`lookup`] accepts.
pub fn catalog_names() -> Vec<String> {
    let mut names: Vec<String> = ["floyd-steinberg", "sierra-lite", "checks", "2x2", "4x4", "8x8"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for family in Family::ALL {
        for n in (3..=8).filter(|&n| family.supports(n)) {
            names.push(format!("{}-{n}x{n}", family.prefix()));
        }
    }
    names
}

/// A dither ready to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct Dither {
    pub mode: DitherMode,
    pub type_name: String,
    pub level: f32,
    pub kernel: DitherKernel,
}

impl Dither {
    /// Resolves mode, optional type name and level into a scaled kernel.
    ///
    /// The level must lie in `[0, 1]`. Level 0 disables dithering; level 1
    /// keeps the catalog kernel as is. In between, diffusion weights are scaled by the level and ordered
    /// thresholds are compressed towards the middle of their range.
    pub fn resolve(mode: DitherMode, type_name: Option<&str>, level: f32) -> Result<Self> {
        let type_name = match type_name {
            Some(t) => t.to_ascii_lowercase(),
            None if mode == DitherMode::Ordered => "4x4".to_string(),
            None => "floyd-steinberg".to_string(),
        };
        if !(0.0..=1.0).contains(&level) {
            return Err(CtifError::InvalidDitherLevel(level));
        }
        let mut kernel = lookup(&type_name)?;

        let mode = if level == 0.0 { DitherMode::None } else { mode };
        if level > 0.0 && level < 1.0 {
            match mode {
                DitherMode::Error => {
                    kernel.values.iter_mut().for_each(|v| *v *= level);
                }
                DitherMode::Ordered => {
                    let offset = kernel.divisor * (1.0 - level) / 2.0;
                    for v in kernel.values.iter_mut().filter(|v| **v > 0.0) {
                        *v = (*v - 1.0) * level + offset;
                    }
                }
                DitherMode::None => {}
            }
        }

        Ok(Self { mode, type_name, level, kernel })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_matrices() {
        for n in 3..=8 {
            let k = lookup(&format!("square-{n}x{n}")).unwrap();
            assert_eq!(k.divisor(), (n * n) as f32);
            for row in 0..n {
                for col in 0..n {
                    assert_eq!(k.value(col, row), (row.max(col) * row.max(col)) as f32);
                }
            }
            let mut distinct: Vec<u32> = k.values().iter().map(|&v| v as u32).collect();
            distinct.sort_unstable();
            distinct.dedup();
            let expected: Vec<u32> = (0..n as u32).map(|i| i * i).collect();
            assert_eq!(distinct, expected);
        }
    }

    #[test]
    fn test_diag_matrices() {
        let l = lookup("diag-l-4x4").unwrap();
        // row 0: ((3 - j) + 4) % 4
        assert_eq!(&l.values()[..4], &[3.0, 2.0, 1.0, 0.0]);
        assert_eq!(l.divisor(), 4.0);
        let r = lookup("diag-r-3x3").unwrap();
        assert_eq!(r.values(), &[0.0, 1.0, 2.0, 2.0, 0.0, 1.0, 1.0, 2.0, 0.0]);
    }

    #[test]
    fn test_diamond_odd_only() {
        let d = lookup("diamond-3x3").unwrap();
        assert_eq!(d.values(), &[4.0, 1.0, 4.0, 1.0, 0.0, 1.0, 4.0, 1.0, 4.0]);
        assert_eq!(d.divisor(), 9.0);
        assert!(lookup("diamond-4x4").is_err());
        assert!(lookup("square-9x9").is_err());
        assert!(lookup("square-3x4").is_err());
    }

    #[test]
    fn test_every_catalog_name_resolves() {
        for name in catalog_names() {
            let k = lookup(&name).unwrap();
            let max = k.values().iter().cloned().fold(0.0, f32::max);
            assert!(max < k.divisor(), "{name}");
        }
        assert!(matches!(lookup("atkinson"), Err(CtifError::UnknownDitherType(_))));
        assert!(lookup("Floyd-Steinberg").is_ok());
    }

    #[test]
    fn test_diffusion_kernels_sum_to_one() {
        for name in ["floyd-steinberg", "sierra-lite"] {
            let taps = lookup(name).unwrap().diffusion_taps();
            let sum: f32 = taps.iter().map(|t| t.2).sum();
            assert!((sum - 1.0).abs() < 1e-6, "{name}");
            assert!(taps.iter().all(|&(dx, dy, _)| dy > 0 || dx > 0));
        }
        let fs = lookup("floyd-steinberg").unwrap().diffusion_taps();
        assert_eq!(fs[0], (1, 0, 7.0 / 16.0));
        assert_eq!(fs[1], (-1, 1, 3.0 / 16.0));
    }

    #[test]
    fn test_defaults() {
        assert_eq!(Dither::resolve(DitherMode::Ordered, None, 1.0).unwrap().type_name, "4x4");
        assert_eq!(
            Dither::resolve(DitherMode::Error, None, 1.0).unwrap().type_name,
            "floyd-steinberg"
        );
        assert_eq!(
            Dither::resolve(DitherMode::None, None, 1.0).unwrap().type_name,
            "floyd-steinberg"
        );
    }

    #[test]
    fn test_level_zero_disables() {
        for mode in [DitherMode::Error, DitherMode::Ordered, DitherMode::None] {
            assert_eq!(Dither::resolve(mode, None, 0.0).unwrap().mode, DitherMode::None);
        }
    }

    #[test]
    fn test_level_one_keeps_kernel() {
        for name in ["floyd-steinberg", "8x8", "square-5x5"] {
            for mode in [DitherMode::Error, DitherMode::Ordered] {
                let d = Dither::resolve(mode, Some(name), 1.0).unwrap();
                assert_eq!(d.kernel, lookup(name).unwrap());
                assert_eq!(d.mode, mode);
            }
        }
    }

    #[test]
    fn test_partial_level_scaling() {
        let d = Dither::resolve(DitherMode::Error, Some("floyd-steinberg"), 0.5).unwrap();
        assert_eq!(d.kernel.value(2, 1), 3.5);
        assert_eq!(d.kernel.divisor(), 16.0);

        let d = Dither::resolve(DitherMode::Ordered, Some("2x2"), 0.5).unwrap();
        // offset = 5 * 0.5 / 2 = 1.25
        assert_eq!(d.kernel.values(), &[1.25, 2.25, 2.75, 1.75]);

        let d = Dither::resolve(DitherMode::Ordered, Some("checks"), 0.5).unwrap();
        assert_eq!(d.kernel.values(), &[0.0, 0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_level_out_of_range_is_rejected() {
        for level in [f32::NAN, -0.1, 1.5, f32::INFINITY] {
            assert!(
                matches!(
                    Dither::resolve(DitherMode::Error, None, level),
                    Err(CtifError::InvalidDitherLevel(_))
                ),
                "{level}"
            );
        }
    }

    #[test]
    fn test_threshold_wraps() {
        let k = lookup("4x4").unwrap();
        assert_eq!(k.threshold(0, 0), 1.0 / 17.0);
        assert_eq!(k.threshold(5, 4), 9.0 / 17.0);
    }
}
