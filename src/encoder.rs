//! Per-pixel palette quantization and the CTIF stream writer.
//!
//! Pixels are visited in raster order. Each one is moved into working
//! space, modulated by the dither (an ordered threshold offset, or the
//! error diffused from earlier pixels), and matched to the nearest palette
//! entry by squared distance. Cells are then packed into two-color glyphs
//! by [`crate::chunk`].

use image::RgbImage;
use std::io::{self, Write};

use crate::chunk::{Cell, CellGrid};
use crate::color::{distance_sq, Color, Colorspace, Working};
use crate::dither::{Dither, DitherMode};
use crate::palette::Palette;
use crate::platform::Platform;

pub const MAGIC: &[u8; 4] = b"CTIF";
pub const HEADER_VERSION: u8 = 1;

/// Per-pixel quantization result in raster order.
#[derive(Debug, Clone)]
pub struct Quantized {
    pub width: u32,
    pub height: u32,
    /// Chosen palette index per pixel.
    pub indices: Vec<u8>,
    /// Working-space value each pixel was matched with, dither included.
    pub values: Vec<Working>,
}

pub struct PixelEncoder<'a> {
    dither: &'a Dither,
    colorspace: Colorspace,
    palette: Vec<Working>,
    /// Working-space image of a unit step on all RGB channels, scaled by
    /// the ordered dither spread.
    ordered_step: Working,
}

impl<'a> PixelEncoder<'a> {
    pub fn new(palette: &[Color], dither: &'a Dither, colorspace: Colorspace) -> Self {
        let spread = 1.0 / (palette.len().max(1) as f32).cbrt();
        let unit = colorspace.from_unit_rgb([spread; 3]);
        Self {
            dither,
            colorspace,
            palette: palette.iter().map(|&c| colorspace.to_working(c)).collect(),
            ordered_step: unit,
        }
    }

    /// Palette entry in working space.
    #[inline]
    pub fn entry(&self, index: usize) -> &Working {
        &self.palette[index]
    }

    /// Nearest palette index; ties go to the lowest index.
    #[inline]
    pub fn nearest(&self, v: &Working) -> usize {
        let mut best = 0;
        let mut best_dist = f32::MAX;
        for (i, p) in self.palette.iter().enumerate() {
            let d = distance_sq(v, p);
            if d < best_dist {
                best_dist = d;
                best = i;
                if d == 0.0 {
                    break;
                }
            }
        }
        best
    }

    /// Quantizes every pixel against the full palette.
    pub fn quantize(&self, image: &RgbImage) -> Quantized {
        let (width, height) = image.dimensions();
        let n = (width * height) as usize;
        let mut indices = Vec::with_capacity(n);
        let mut values = Vec::with_capacity(n);

        let kernel = &self.dither.kernel;
        let taps = match self.dither.mode {
            DitherMode::Error => kernel.diffusion_taps(),
            _ => Vec::new(),
        };
        let mut error = match self.dither.mode {
            DitherMode::Error => vec![[0.0f32; 3]; n],
            _ => Vec::new(),
        };

        for (x, y, pixel) in image.enumerate_pixels() {
            let p = (y * width + x) as usize;
            let mut v = self.colorspace.to_working(Color::from(*pixel));

            match self.dither.mode {
                DitherMode::None => {}
                DitherMode::Ordered => {
                    let offset = kernel.threshold(x, y) - 0.5;
                    for ch in 0..3 {
                        v[ch] += self.ordered_step[ch] * offset;
                    }
                }
                DitherMode::Error => {
                    for ch in 0..3 {
                        v[ch] += error[p][ch];
                    }
                }
            }

            let index = self.nearest(&v);

            if !taps.is_empty() {
                let chosen = self.palette[index];
                let residual = [v[0] - chosen[0], v[1] - chosen[1], v[2] - chosen[2]];
                for &(dx, dy, w) in &taps {
                    let (nx, ny) = (x as i64 + dx as i64, y as i64 + dy as i64);
                    if nx < 0 || nx >= width as i64 || ny >= height as i64 {
                        continue;
                    }
                    let q = ny as usize * width as usize + nx as usize;
                    for ch in 0..3 {
                        error[q][ch] += residual[ch] * w;
                    }
                }
            }

            indices.push(index as u8);
            values.push(v);
        }

        Quantized { width, height, indices, values }
    }
}

/// Encoded stream and its preview.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub preview: RgbImage,
    pub data: Vec<u8>,
}

/// Quantizes `image`, packs it into cells and writes the CTIF stream.
pub fn encode(
    image: &RgbImage,
    palette: &Palette,
    dither: &Dither,
    colorspace: Colorspace,
    platform: Platform,
    optimization_level: u32,
) -> io::Result<Encoded> {
    let encoder = PixelEncoder::new(palette.colors(), dither, colorspace);
    let quantized = encoder.quantize(image);

    let grid = CellGrid::new(image.width(), image.height(), platform.char_width(), platform.char_height());
    let (cells, indices) = grid.pack(&quantized, &encoder, platform, optimization_level);

    let colors = palette.colors();
    let preview = RgbImage::from_fn(image.width(), image.height(), |x, y| {
        colors[indices[(y * image.width() + x) as usize] as usize].into()
    });

    let mut data = Vec::new();
    write_header(&mut data, platform, palette, &grid)?;
    write_cells(&mut data, palette, platform, &cells)?;

    Ok(Encoded { preview, data })
}

/// Bits used per palette index in cell records.
pub fn index_bits(palette: &Palette) -> u8 {
    if palette.len() <= 16 {
        4
    } else {
        8
    }
}

pub fn write_header<W: Write>(out: &mut W, platform: Platform, palette: &Palette, grid: &CellGrid) -> io::Result<()> {
    out.write_all(MAGIC)?;
    out.write_all(&[HEADER_VERSION, platform.variant()])?;
    out.write_all(&platform.id().to_le_bytes())?;
    out.write_all(&(grid.cols() as u16).to_le_bytes())?;
    out.write_all(&(grid.rows() as u16).to_le_bytes())?;
    out.write_all(&[platform.char_width() as u8, platform.char_height() as u8])?;
    out.write_all(&[index_bits(palette), 24])?;
    out.write_all(&(palette.custom_count() as u16).to_le_bytes())?;
    for c in palette.custom() {
        out.write_all(&[c.r, c.g, c.b])?;
    }
    Ok(())
}

pub fn write_cells<W: Write>(out: &mut W, palette: &Palette, platform: Platform, cells: &[Cell]) -> io::Result<()> {
    let glyph_bytes = ((platform.char_width() * platform.char_height()) as usize).div_ceil(8);
    for cell in cells {
        if index_bits(palette) == 4 {
            out.write_all(&[(cell.bg << 4) | (cell.fg & 0x0f)])?;
        } else {
            out.write_all(&[cell.bg, cell.fg])?;
        }
        out.write_all(&cell.glyph.to_le_bytes()[..glyph_bytes])?;
    }
    Ok(())
}
