//! Cell packing - splits the quantized image into character cells and
//! reduces each cell to a background/foreground pair and a glyph mask.

use crate::color::{distance_sq, Working};
use crate::encoder::{PixelEncoder, Quantized};
use crate::platform::Platform;

/// Candidate colors considered per cell at optimization level 2 and above.
const FAST_CANDIDATES: usize = 4;

/// One packed character cell. Bit `row * cw + col` of `glyph` is set where
/// the pixel shows `fg`. Always `bg <= fg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub bg: u8,
    pub fg: u8,
    pub glyph: u64,
}

pub struct CellGrid {
    width: u32,
    cell_w: u32,
    cell_h: u32,
    cols: u32,
    rows: u32,
}

impl CellGrid {
    /// Image dimensions must be multiples of the cell size.
    pub fn new(width: u32, height: u32, cell_w: u32, cell_h: u32) -> Self {
        debug_assert!(width % cell_w == 0 && height % cell_h == 0);
        debug_assert!(cell_w * cell_h <= 64);
        Self { width, cell_w, cell_h, cols: width / cell_w, rows: height / cell_h }
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Raster indices of the pixels in cell (col, row), row-major inside
    /// the cell.
    pub fn cell_pixels(&self, col: u32, row: u32) -> impl Iterator<Item = usize> + '_ {
        let (x0, y0) = (col * self.cell_w, row * self.cell_h);
        (0..self.cell_h).flat_map(move |dy| {
            (0..self.cell_w).map(move |dx| ((y0 + dy) * self.width + x0 + dx) as usize)
        })
    }

    /// Packs every cell in row-major order. Returns the cells and the final
    /// per-pixel palette indices after remapping to each cell's pair.
    pub fn pack(
        &self,
        quantized: &Quantized,
        encoder: &PixelEncoder<'_>,
        platform: Platform,
        optimization_level: u32,
    ) -> (Vec<Cell>, Vec<u8>) {
        let limit = if optimization_level >= 2 { Some(FAST_CANDIDATES) } else { None };
        let mut cells = Vec::with_capacity((self.cols * self.rows) as usize);
        let mut indices = quantized.indices.clone();

        for row in 0..self.rows {
            for col in 0..self.cols {
                let pixels: Vec<usize> = self.cell_pixels(col, row).collect();
                let values: Vec<Working> = pixels.iter().map(|&p| quantized.values[p]).collect();
                let chosen: Vec<u8> = pixels.iter().map(|&p| quantized.indices[p]).collect();

                let candidates = candidates(&chosen, limit);
                let (bg, fg) = choose_pair(&values, &candidates, encoder, platform);

                let mut glyph = 0u64;
                for (bit, (&p, v)) in pixels.iter().zip(&values).enumerate() {
                    let use_fg = bg != fg
                        && distance_sq(v, encoder.entry(fg as usize)) < distance_sq(v, encoder.entry(bg as usize));
                    if use_fg {
                        glyph |= 1 << bit;
                        indices[p] = fg;
                    } else {
                        indices[p] = bg;
                    }
                }
                cells.push(Cell { bg, fg, glyph });
            }
        }
        (cells, indices)
    }
}

/// Distinct indices in a cell, most frequent first, lowest index on ties.
fn candidates(chosen: &[u8], limit: Option<usize>) -> Vec<u8> {
    let mut counts = [0u32; 256];
    for &i in chosen {
        counts[i as usize] += 1;
    }
    let mut distinct: Vec<u8> = (0..=255u8).filter(|&i| counts[i as usize] > 0).collect();
    distinct.sort_by(|&a, &b| counts[b as usize].cmp(&counts[a as usize]).then(a.cmp(&b)));
    if let Some(limit) = limit {
        distinct.truncate(limit);
    }
    distinct
}

/// Picks the allowed pair with the lowest total error over the cell, each
/// pixel counted against the nearer of the two. Disallowed candidate pairs
/// are retried with one side replaced by its platform equivalent.
///
/// Returns `(bg, fg)` with `bg <= fg`; a single-color cell returns the same
/// index twice.
pub fn choose_pair(
    values: &[Working],
    candidates: &[u8],
    encoder: &PixelEncoder<'_>,
    platform: Platform,
) -> (u8, u8) {
    let mut best = (candidates[0], candidates[0]);
    let mut best_cost = f32::MAX;
    let mut consider = |a: u8, b: u8| {
        let (ea, eb) = (encoder.entry(a as usize), encoder.entry(b as usize));
        let cost: f32 = values.iter().map(|v| distance_sq(v, ea).min(distance_sq(v, eb))).sum();
        if cost < best_cost {
            best_cost = cost;
            best = (a.min(b), a.max(b));
        }
    };
    for (i, &a) in candidates.iter().enumerate() {
        for &b in &candidates[i..] {
            let (ia, ib) = (a as usize, b as usize);
            if platform.allows_pair(ia, ib) {
                consider(a, b);
            } else {
                // move either side into the other's bank
                consider(a, platform.pair_equivalent(ib, ia) as u8);
                consider(platform.pair_equivalent(ia, ib) as u8, b);
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{Color, ColorspaceKind};
    use crate::dither::{Dither, DitherMode};
    use image::RgbImage;

    fn quantize_with<'a>(
        palette: &[Color],
        dither: &'a Dither,
        image: &RgbImage,
    ) -> (PixelEncoder<'a>, Quantized) {
        let enc = PixelEncoder::new(palette, dither, ColorspaceKind::Rgb.into());
        let q = enc.quantize(image);
        (enc, q)
    }

    #[test]
    fn test_cell_pixels_row_major() {
        let grid = CellGrid::new(4, 8, 2, 4);
        assert_eq!((grid.cols(), grid.rows()), (2, 2));
        let px: Vec<usize> = grid.cell_pixels(1, 1).collect();
        assert_eq!(px, vec![18, 19, 22, 23, 26, 27, 30, 31]);
    }

    #[test]
    fn test_candidates_order() {
        assert_eq!(candidates(&[5, 3, 3, 9, 5, 1], None), vec![3, 5, 1, 9]);
        assert_eq!(candidates(&[5, 3, 3, 9, 5, 1, 7, 2], Some(4)), vec![3, 5, 1, 2]);
    }

    #[test]
    fn test_two_color_cell_is_exact() {
        let d = Dither::resolve(DitherMode::None, None, 1.0).unwrap();
        let pal = Platform::Cc.base_palette();
        let red = pal[14];
        let blue = pal[11];
        let img = RgbImage::from_fn(2, 3, |x, _| if x == 0 { red.into() } else { blue.into() });
        let (enc, q) = quantize_with(&pal, &d, &img);
        let grid = CellGrid::new(2, 3, 2, 3);
        let (cells, indices) = grid.pack(&q, &enc, Platform::Cc, 1);
        assert_eq!(cells.len(), 1);
        assert_eq!((cells[0].bg, cells[0].fg), (11, 14));
        // column 0 (bits 0, 2, 4) shows the foreground
        assert_eq!(cells[0].glyph, 0b010101);
        assert_eq!(indices, q.indices);
    }

    #[test]
    fn test_single_color_cell_has_empty_glyph() {
        let d = Dither::resolve(DitherMode::None, None, 1.0).unwrap();
        let pal = Platform::OcTier2.base_palette();
        let img = RgbImage::from_pixel(2, 4, image::Rgb([34, 34, 34]));
        let (enc, q) = quantize_with(&pal, &d, &img);
        let (cells, _) = CellGrid::new(2, 4, 2, 4).pack(&q, &enc, Platform::OcTier2, 1);
        assert_eq!(cells[0], Cell { bg: 2, fg: 2, glyph: 0 });
    }

    #[test]
    fn test_three_colors_reduced_to_two() {
        let d = Dither::resolve(DitherMode::None, None, 1.0).unwrap();
        let pal = Platform::OcTier2.base_palette();
        let img = RgbImage::from_fn(2, 4, |_, y| match y {
            0 => image::Rgb([0, 0, 0]),
            1 => image::Rgb([17, 17, 17]),
            _ => image::Rgb([255, 255, 255]),
        });
        let (enc, q) = quantize_with(&pal, &d, &img);
        let (cells, indices) = CellGrid::new(2, 4, 2, 4).pack(&q, &enc, Platform::OcTier2, 1);
        let cell = cells[0];
        assert!(cell.bg <= cell.fg);
        let used: Vec<u8> = {
            let mut u = indices.clone();
            u.sort_unstable();
            u.dedup();
            u
        };
        assert!(used.len() <= 2);
        assert!(used.iter().all(|&i| i == cell.bg || i == cell.fg));
        assert_eq!(cell.fg, 15);
        assert_eq!(cell.glyph, 0xf0);
    }

    #[test]
    fn test_zx_pairs_never_mix_bright() {
        let d = Dither::resolve(DitherMode::None, None, 1.0).unwrap();
        let pal = Platform::Zxspectrum.base_palette();
        // bright white on the left, normal blue on the right
        let img = RgbImage::from_fn(8, 8, |x, _| if x < 4 { pal[15].into() } else { pal[1].into() });
        let (enc, q) = quantize_with(&pal, &d, &img);
        let (cells, _) = CellGrid::new(8, 8, 8, 8).pack(&q, &enc, Platform::Zxspectrum, 1);
        let cell = cells[0];
        assert_eq!(cell.bg < 8, cell.fg < 8);
        // bright blue is closer to normal blue than normal white is to bright white
        assert_eq!((cell.bg, cell.fg), (9, 15));
        assert_eq!(cell.glyph, 0x0f0f_0f0f_0f0f_0f0f);
    }

    #[test]
    fn test_choose_pair_respects_limit() {
        let d = Dither::resolve(DitherMode::None, None, 1.0).unwrap();
        let pal = Platform::OcTier2.base_palette();
        let enc = PixelEncoder::new(&pal, &d, ColorspaceKind::Rgb.into());
        let values: Vec<Working> = [0u8, 5, 10].iter().map(|&i| *enc.entry(i as usize)).collect();
        assert_eq!(choose_pair(&values, &[5], &enc, Platform::OcTier2), (5, 5));
        assert_eq!(choose_pair(&values, &[10, 0], &enc, Platform::OcTier2), (0, 10));
    }
}
