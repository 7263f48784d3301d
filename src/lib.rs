//! Image to CTIF converter for character-cell displays.

pub mod chunk;
pub mod color;
pub mod dither;
pub mod encoder;
pub mod kmeans;
pub mod palette;
pub mod platform;
pub mod resize;
pub mod size;

#[cfg(target_arch = "wasm32")]
mod wasm;

pub use color::{Color, Colorspace, ColorspaceKind};
pub use dither::{Dither, DitherMode};
pub use palette::Palette;
pub use platform::Platform;
pub use resize::ResizeMode;

use image::{DynamicImage, RgbImage};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

use crate::palette::PaletteOptions;

#[derive(Error, Debug)]
pub enum CtifError {
    #[error("Size too large: {width}x{height} (maximum size: {max} pixels)")]
    SizeTooLarge { width: u32, height: u32, max: u32 },
    #[error("Width too large: {width} (maximum width: {max})")]
    WidthTooLarge { width: u32, max: u32 },
    #[error("Height too large: {height} (maximum height: {max})")]
    HeightTooLarge { height: u32, max: u32 },
    #[error("Unknown dither type: {0}")]
    UnknownDitherType(String),
    #[error("Dither level out of range: {0} (expected 0.0 to 1.0)")]
    InvalidDitherLevel(f32),
    #[error("Output size is zero: {width}x{height}")]
    ZeroSize { width: u32, height: u32 },
    #[error("Input image is empty")]
    EmptyImage,
    #[error("Palette file {}: {source}", path.display())]
    Palette { path: PathBuf, source: std::io::Error },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[cfg(not(target_arch = "wasm32"))]
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, CtifError>;

/// Stage timer for debug logs. There is no clock on wasm32, where it
/// always reads 0.
pub(crate) struct Timer {
    #[cfg(not(target_arch = "wasm32"))]
    started: std::time::Instant,
}

impl Timer {
    pub(crate) fn start() -> Self {
        Self {
            #[cfg(not(target_arch = "wasm32"))]
            started: std::time::Instant::now(),
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub(crate) fn millis(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    #[cfg(target_arch = "wasm32")]
    pub(crate) fn millis(&self) -> u128 {
        0
    }
}

/// Unrecognized name for a platform, colorspace or mode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind}: {name}")]
pub struct ParseNameError {
    pub kind: &'static str,
    pub name: String,
}

/// Conversion settings and entry point.
pub struct Converter {
    platform: Platform,
    colorspace: ColorspaceKind,
    optimization_level: u32,
    threads: usize,
    width: u32,
    height: u32,
    ignore_aspect_ratio: bool,
    resize_mode: ResizeMode,
    palette: Option<PathBuf>,
    palette_export: Option<PathBuf>,
    sampling_resolution: u32,
    dither_mode: DitherMode,
    dither_type: Option<String>,
    dither_level: f32,
    seed: Option<u64>,
}

/// Output of a conversion.
#[derive(Debug, Clone)]
pub struct Conversion {
    /// The image as the target would display it.
    pub preview: RgbImage,
    /// CTIF stream.
    pub data: Vec<u8>,
    pub report: ConversionReport,
}

/// Summary of a conversion, written by the CLI as JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionReport {
    pub platform: Platform,
    pub colorspace: ColorspaceKind,
    pub width: u32,
    pub height: u32,
    pub width_chars: u32,
    pub height_chars: u32,
    pub palette: Vec<String>,
    pub palette_error: Option<f64>,
    pub dither_mode: DitherMode,
    pub dither_type: String,
    pub dither_level: f32,
}

impl Converter {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            colorspace: ColorspaceKind::default(),
            optimization_level: 1,
            threads: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            width: 0,
            height: 0,
            ignore_aspect_ratio: false,
            resize_mode: ResizeMode::default(),
            palette: None,
            palette_export: None,
            sampling_resolution: 0,
            dither_mode: DitherMode::default(),
            dither_type: None,
            dither_level: 1.0,
            seed: None,
        }
    }

    pub fn with_colorspace(mut self, colorspace: ColorspaceKind) -> Self {
        self.colorspace = colorspace;
        self
    }

    pub fn with_optimization_level(mut self, level: u32) -> Self {
        self.optimization_level = level;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Requested output size in pixels; 0 leaves a dimension to the platform.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_ignore_aspect_ratio(mut self, ignore: bool) -> Self {
        self.ignore_aspect_ratio = ignore;
        self
    }

    pub fn with_resize_mode(mut self, mode: ResizeMode) -> Self {
        self.resize_mode = mode;
        self
    }

    /// Load custom colors from a file instead of generating them.
    pub fn with_palette(mut self, path: impl Into<PathBuf>) -> Self {
        self.palette = Some(path.into());
        self
    }

    pub fn with_palette_export(mut self, path: impl Into<PathBuf>) -> Self {
        self.palette_export = Some(path.into());
        self
    }

    pub fn with_sampling_resolution(mut self, resolution: u32) -> Self {
        self.sampling_resolution = resolution;
        self
    }

    pub fn with_dither(mut self, mode: DitherMode, type_name: Option<&str>, level: f32) -> Self {
        self.dither_mode = mode;
        self.dither_type = type_name.map(str::to_string);
        self.dither_level = level;
        self
    }

    /// Pins palette generation randomness.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn convert(&self, image: &DynamicImage) -> Result<Conversion> {
        let platform = self.platform;
        let colorspace = Colorspace::new(self.colorspace);
        let dither = Dither::resolve(self.dither_mode, self.dither_type.as_deref(), self.dither_level)?;

        let (width, height) = size::negotiate(
            platform,
            self.width,
            self.height,
            self.ignore_aspect_ratio,
            (image.width(), image.height()),
        )?;
        info!("output size {}x{} ({})", width, height, platform);

        info!("resizing image");
        let started = Timer::start();
        let resized = resize::resize(image, width, height, self.resize_mode);
        debug!("resize time: {} ms", started.millis());

        let seed = self.seed.unwrap_or_else(rand::random);
        debug!(threads = self.threads, seed, "palette settings");
        let options = PaletteOptions {
            path: self.palette.clone(),
            export: self.palette_export.clone(),
            sampling_resolution: self.sampling_resolution,
            optimization_level: self.optimization_level,
            threads: self.threads,
            seed,
        };
        let resolved = palette::resolve(platform, &resized, colorspace, &options)?;

        info!("converting image");
        let started = Timer::start();
        let encoded = encoder::encode(
            &resized,
            &resolved.palette,
            &dither,
            colorspace,
            platform,
            self.optimization_level,
        )?;
        debug!("conversion time: {} ms", started.millis());

        let report = ConversionReport {
            platform,
            colorspace: self.colorspace,
            width,
            height,
            width_chars: width / platform.char_width(),
            height_chars: height / platform.char_height(),
            palette: resolved.palette.colors().iter().map(|c| c.hex()).collect(),
            palette_error: resolved.error,
            dither_mode: dither.mode,
            dither_type: dither.type_name.clone(),
            dither_level: dither.level,
        };

        Ok(Conversion { preview: encoded.preview, data: encoded.data, report })
    }
}
