//! Resampling to the negotiated output size.

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, RgbImage};
use serde::Serialize;
use std::fmt;
use std::io::{Cursor, Write};
use std::process::{Command, Stdio};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

use crate::ParseNameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResizeMode {
    /// Nearest neighbour.
    Speed,
    /// Built-in bicubic, never shells out.
    QualityNative,
    /// ImageMagick when installed, built-in bicubic otherwise.
    #[default]
    Quality,
}

impl ResizeMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::Speed => "speed",
            Self::QualityNative => "quality-native",
            Self::Quality => "quality",
        }
    }
}

impl fmt::Display for ResizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResizeMode {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_ascii_lowercase().replace('_', "-");
        [Self::Speed, Self::QualityNative, Self::Quality]
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or(ParseNameError { kind: "resize mode", name: s })
    }
}

/// Failure of the external resampler. Always recovered by falling back to
/// the built-in one.
#[derive(Error, Debug)]
pub enum ExternalResizeError {
    #[error("ImageMagick not found")]
    Unavailable,
    #[error("ImageMagick failed: {0}")]
    Failed(String),
    #[error("ImageMagick I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ImageMagick output unreadable: {0}")]
    Decode(#[from] image::ImageError),
}

/// Resizes `image` to exactly `width`x`height` with the given mode.
pub fn resize(image: &DynamicImage, width: u32, height: u32, mode: ResizeMode) -> RgbImage {
    if image.width() == width && image.height() == height {
        return image.to_rgb8();
    }
    match mode {
        ResizeMode::Speed => fast_resize(image, width, height),
        ResizeMode::QualityNative => quality_resize(image, width, height, true),
        ResizeMode::Quality => quality_resize(image, width, height, false),
    }
}

pub fn fast_resize(image: &DynamicImage, width: u32, height: u32) -> RgbImage {
    imageops::resize(&image.to_rgb8(), width, height, FilterType::Nearest)
}

/// ImageMagick 7 entry point, then the legacy one.
const MAGICK_PROGRAMS: [&str; 2] = ["magick", "convert"];

/// Bicubic-or-better resize. Unless `force_builtin` is set, ImageMagick is
/// tried first.
pub fn quality_resize(image: &DynamicImage, width: u32, height: u32, force_builtin: bool) -> RgbImage {
    let programs: &[&str] = if force_builtin { &[] } else { &MAGICK_PROGRAMS };
    quality_resize_with(image, width, height, programs)
}

/// Tries each external program in turn, then the built-in resampler.
fn quality_resize_with(image: &DynamicImage, width: u32, height: u32, programs: &[&str]) -> RgbImage {
    if !programs.is_empty() {
        match magick_resize(image, width, height, programs) {
            Ok(resized) => {
                debug!("resized with ImageMagick");
                return resized;
            }
            Err(ExternalResizeError::Unavailable) => {
                warn!("ImageMagick not found, install it for improved scaling quality")
            }
            Err(e) => warn!("{e}, falling back to built-in resampler"),
        }
    }
    imageops::resize(&image.to_rgb8(), width, height, FilterType::CatmullRom)
}

/// Linear-light Lanczos resize through the first of `programs` that
/// exists, piping PNG over stdin/stdout.
fn magick_resize(
    image: &DynamicImage,
    width: u32,
    height: u32,
    programs: &[&str],
) -> Result<RgbImage, ExternalResizeError> {
    let mut png = Vec::new();
    DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    let geometry = format!("{width}x{height}!");
    let args = [
        "png:-", "-colorspace", "RGB", "-filter", "LanczosRadius", "-resize", geometry.as_str(),
        "-colorspace", "sRGB", "png:-",
    ];

    let mut child = None;
    for &program in programs {
        match Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(c) => {
                child = Some(c);
                break;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        }
    }
    let mut child = child.ok_or(ExternalResizeError::Unavailable)?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(&png)?;
    }
    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(ExternalResizeError::Failed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let resized = image::load_from_memory_with_format(&output.stdout, ImageFormat::Png)?.to_rgb8();
    if resized.dimensions() != (width, height) {
        return Err(ExternalResizeError::Failed(format!(
            "expected {width}x{height}, got {}x{}",
            resized.width(),
            resized.height()
        )));
    }
    Ok(resized)
}
