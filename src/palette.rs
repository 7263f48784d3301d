//! Palette resolution: a platform's fixed palette, a palette file, or a
//! palette generated from the image.
//!
//! Palette files are raw `R G B` byte triplets, one per custom color, with
//! no header.

use image::RgbImage;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::color::{Color, Colorspace};
use crate::kmeans::PaletteGenerator;
use crate::platform::Platform;
use crate::{CtifError, Result, Timer};

/// A resolved palette. The first `custom_count` entries are loaded or
/// generated; the rest are the platform's fixed colors.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    colors: Vec<Color>,
    custom_count: usize,
}

impl Palette {
    pub fn new(colors: Vec<Color>, custom_count: usize) -> Self {
        debug_assert!(custom_count <= colors.len());
        Self { colors, custom_count }
    }

    /// The platform's built-in palette, unchanged.
    pub fn base(platform: Platform) -> Self {
        Self::new(platform.base_palette(), platform.custom_color_count())
    }

    pub fn colors(&self) -> &[Color] {
        &self.colors
    }

    pub fn custom(&self) -> &[Color] {
        &self.colors[..self.custom_count]
    }

    pub fn custom_count(&self) -> usize {
        self.custom_count
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

/// Where the custom part of the palette comes from.
#[derive(Debug, Clone, Default)]
pub struct PaletteOptions {
    /// Palette file to load instead of generating.
    pub path: Option<PathBuf>,
    /// File to write the custom colors to.
    pub export: Option<PathBuf>,
    pub sampling_resolution: u32,
    pub optimization_level: u32,
    pub threads: usize,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct ResolvedPalette {
    pub palette: Palette,
    /// Weighted k-means error when the palette was generated.
    pub error: Option<f64>,
}

/// Loads or generates the palette for `image`, exporting it if requested.
/// Platforms without custom colors always get their base palette.
pub fn resolve(
    platform: Platform,
    image: &RgbImage,
    colorspace: Colorspace,
    options: &PaletteOptions,
) -> Result<ResolvedPalette> {
    let count = platform.custom_color_count();
    if count == 0 {
        return Ok(ResolvedPalette { palette: Palette::base(platform), error: None });
    }

    let base = platform.base_palette();
    let (colors, error) = match &options.path {
        Some(path) => {
            info!("reading palette {}", path.display());
            let mut colors = base;
            let custom = load(path, count)?;
            colors[..count].copy_from_slice(&custom);
            (colors, None)
        }
        None => {
            info!("generating palette");
            let started = Timer::start();
            let generator = PaletteGenerator::new(
                image,
                &base,
                count,
                options.sampling_resolution,
                colorspace,
                options.optimization_level,
                options.seed,
            );
            let generated = generator.generate(options.threads, options.seed)?;
            debug!("palette generation time: {} ms", started.millis());
            (generated.palette, Some(generated.error))
        }
    };
    let palette = Palette::new(colors, count);

    if let Some(path) = &options.export {
        info!("saving palette {}", path.display());
        export(path, palette.custom())?;
    }

    Ok(ResolvedPalette { palette, error })
}

/// Reads `count` RGB triplets from a palette file.
pub fn load(path: &Path, count: usize) -> Result<Vec<Color>> {
    let wrap = |source| CtifError::Palette { path: path.to_path_buf(), source };
    let mut bytes = vec![0u8; count * 3];
    File::open(path).and_then(|mut f| f.read_exact(&mut bytes)).map_err(wrap)?;
    Ok(bytes.chunks_exact(3).map(|c| Color::new(c[0], c[1], c[2])).collect())
}

/// Writes colors as raw RGB triplets.
pub fn export(path: &Path, colors: &[Color]) -> Result<()> {
    let bytes: Vec<u8> = colors.iter().flat_map(|c| [c.r, c.g, c.b]).collect();
    File::create(path)
        .and_then(|mut f| f.write_all(&bytes))
        .map_err(|source| CtifError::Palette { path: path.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::ColorspaceKind;

    fn options() -> PaletteOptions {
        PaletteOptions { threads: 1, seed: 1, optimization_level: 4, ..Default::default() }
    }

    #[test]
    fn test_fixed_palette_platforms_use_base() {
        let img = RgbImage::from_pixel(4, 4, image::Rgb([10, 200, 30]));
        for platform in [Platform::OcTier1, Platform::Cc, Platform::Zxspectrum] {
            let resolved = resolve(platform, &img, ColorspaceKind::Yiq.into(), &options()).unwrap();
            assert_eq!(resolved.palette, Palette::base(platform));
            assert_eq!(resolved.palette.colors(), platform.base_palette().as_slice());
            assert!(resolved.error.is_none());
        }
    }

    #[test]
    fn test_generated_palette_keeps_anchors() {
        let img = RgbImage::from_fn(8, 8, |x, y| image::Rgb([(x * 30) as u8, (y * 30) as u8, 90]));
        let resolved = resolve(Platform::OcTier3, &img, ColorspaceKind::Yiq.into(), &options()).unwrap();
        assert_eq!(resolved.palette.len(), 256);
        assert_eq!(resolved.palette.custom().len(), 16);
        assert_eq!(&resolved.palette.colors()[16..], &Platform::OcTier3.base_palette()[16..]);
        assert!(resolved.error.is_some());
    }

    #[test]
    fn test_missing_palette_file_is_reported() {
        let mut opts = options();
        opts.path = Some(PathBuf::from("/nonexistent/palette.bin"));
        let img = RgbImage::new(2, 2);
        let err = resolve(Platform::OcTier2, &img, ColorspaceKind::Rgb.into(), &opts).unwrap_err();
        assert!(matches!(err, CtifError::Palette { .. }));
        assert!(err.to_string().contains("/nonexistent/palette.bin"));
    }
}
