//! Palette generation by weighted k-means with parallel restarts.
//!
//! Distinct image colors become weighted points. The first `colors`
//! palette slots are trained with Lloyd's algorithm; the remaining slots of
//! the base palette are fixed anchors that take part in assignment but are
//! never moved. Each restart owns its centroids and RNG, so restarts run on
//! a worker pool without sharing anything mutable.

use image::RgbImage;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tracing::debug;

use crate::color::{distance_sq, Color, Colorspace, Working};
use crate::Result;

/// Upper bound on Lloyd passes per restart.
pub const MAX_PASSES: usize = 128;

/// Images at least this large are block-sampled at optimization level 3+.
const SUBSAMPLE_MIN_AREA: u32 = 4096;

/// Distinct working-space colors and how many sampled pixels map to each.
/// Parallel arrays indexed by point id.
#[derive(Debug, Default)]
struct Points {
    colors: Vec<Working>,
    weights: Vec<u32>,
    /// Squared distance to the closest anchor, `f32::MAX` without anchors.
    anchor_error: Vec<f32>,
}

impl Points {
    fn len(&self) -> usize {
        self.colors.len()
    }
}

/// Collects pixels into deduplicated weighted points.
struct PointBuilder<'a> {
    colorspace: &'a Colorspace,
    ids: HashMap<u32, usize>,
    points: Points,
}

impl<'a> PointBuilder<'a> {
    fn new(colorspace: &'a Colorspace) -> Self {
        Self { colorspace, ids: HashMap::new(), points: Points::default() }
    }

    fn add(&mut self, pixel: &image::Rgb<u8>) {
        let color = Color::from(*pixel);
        match self.ids.get(&color.to_rgb24()) {
            Some(&id) => self.points.weights[id] += 1,
            None => {
                self.ids.insert(color.to_rgb24(), self.points.len());
                self.points.colors.push(self.colorspace.to_working(color));
                self.points.weights.push(1);
            }
        }
    }
}

/// Outcome of one restart.
#[derive(Debug, Clone)]
pub struct Restart {
    pub centroids: Vec<Working>,
    /// Total point weight assigned to each centroid in the final pass.
    pub weights: Vec<u64>,
    /// Total weighted squared error of the final pass.
    pub error: f64,
    /// Total error of every pass, in order.
    pub history: Vec<f64>,
}

/// The winning palette and its error.
#[derive(Debug, Clone)]
pub struct Generated {
    pub palette: Vec<Color>,
    pub error: f64,
}

pub struct PaletteGenerator {
    base: Vec<Color>,
    colors: usize,
    colorspace: Colorspace,
    optimization_level: u32,
    points: Points,
}

impl PaletteGenerator {
    /// Builds the weighted point set from `image`.
    ///
    /// With `sampling_resolution > 0` two random pixels are taken from each
    /// cell of an `R x 2R` grid. Otherwise, at optimization level 3 and above
    /// on images of at least 4096 pixels, one random pixel per 4x4 block is
    /// used. Otherwise every pixel is used.
    pub fn new(
        image: &RgbImage,
        base: &[Color],
        colors: usize,
        sampling_resolution: u32,
        colorspace: Colorspace,
        optimization_level: u32,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut builder = PointBuilder::new(&colorspace);
        let (w, h) = image.dimensions();

        if w > 0 && h > 0 {
            if sampling_resolution > 0 {
                let r = sampling_resolution;
                let step_x = w as f32 / r as f32;
                let step_y = h as f32 / r as f32;
                let span_x = (step_x.ceil() as u32).max(1);
                let span_y = (step_y.ceil() as u32).max(1);
                for jy in 0..r {
                    for jx in 0..r * 2 {
                        let x = rng.gen_range(0..span_x) + ((jx % r) as f32 * step_x) as u32;
                        let y = rng.gen_range(0..span_y) + (jy as f32 * step_y) as u32;
                        builder.add(image.get_pixel(x.min(w - 1), y.min(h - 1)));
                    }
                }
            } else if optimization_level >= 3 && w * h >= SUBSAMPLE_MIN_AREA {
                for by in (0..h).step_by(4) {
                    let my = (h - by).min(4);
                    for bx in (0..w).step_by(4) {
                        let mx = (w - bx).min(4);
                        let pixel = image.get_pixel(bx + rng.gen_range(0..mx), by + rng.gen_range(0..my));
                        builder.add(pixel);
                    }
                }
            } else {
                image.pixels().for_each(|p| builder.add(p));
            }
        }

        let mut points = builder.points;
        let anchors: Vec<Working> = base[colors..].iter().map(|&c| colorspace.to_working(c)).collect();
        for v in &points.colors {
            let mut best_error = f32::MAX;
            for a in &anchors {
                best_error = best_error.min(distance_sq(v, a));
                if best_error == 0.0 {
                    break;
                }
            }
            points.anchor_error.push(best_error);
        }

        debug!(points = points.len(), anchors = anchors.len(), "palette points collected");

        Self { base: base.to_vec(), colors, colorspace, optimization_level, points }
    }

    /// Number of distinct weighted points.
    #[cfg(test)]
    fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Total weight of all points, i.e. the number of sampled pixels.
    #[cfg(test)]
    fn total_weight(&self) -> u64 {
        self.points.weights.iter().map(|&w| w as u64).sum()
    }

    pub fn restart_count(&self) -> usize {
        (20 / (self.optimization_level as usize + 1)).max(1)
    }

    /// Initial centroids: distinct points drawn with probability
    /// proportional to weight, repeated in order if there are too few.
    fn initial_centroids(&self, rng: &mut StdRng) -> Vec<Working> {
        let n = self.points.len();
        if n == 0 {
            return self.base[..self.colors].iter().map(|&c| self.colorspace.to_working(c)).collect();
        }
        let ids: Vec<usize> = (0..n).collect();
        let chosen: Vec<usize> = match ids.choose_multiple_weighted(rng, self.colors.min(n), |&i| {
            self.points.weights[i] as f64
        }) {
            Ok(it) => it.copied().collect(),
            Err(_) => ids.iter().take(self.colors).copied().collect(),
        };
        (0..self.colors).map(|i| self.points.colors[chosen[i % chosen.len()]]).collect()
    }

    /// Runs one k-means restart to convergence or [`MAX_PASSES`].
    pub fn run_restart(&self, seed: u64) -> Restart {
        let mut rng = StdRng::seed_from_u64(seed);
        let k = self.colors;
        let mut centroids = self.initial_centroids(&mut rng);
        let mut weights = vec![0u64; k];
        let mut history = Vec::new();
        let mut error = 0.0f64;

        for _ in 0..MAX_PASSES {
            let mut sums = vec![[0.0f64; 3]; k];
            weights.iter_mut().for_each(|w| *w = 0);
            error = 0.0;

            for (p, v) in self.points.colors.iter().enumerate() {
                let mut best_error = self.points.anchor_error[p];
                let mut best = None;
                for (i, c) in centroids.iter().enumerate() {
                    let e = distance_sq(v, c);
                    // Trainable slots win ties against anchors, so a pure black/white
                    // image still ends with two used clusters even when black or white
                    // is also an anchor color.
                    if e < best_error || (best.is_none() && e == best_error) {
                        best_error = e;
                        best = Some(i);
                        if e == 0.0 {
                            break;
                        }
                    }
                }

                let wt = self.points.weights[p];
                error += best_error as f64 * wt as f64;
                if let Some(i) = best {
                    for ch in 0..3 {
                        sums[i][ch] += v[ch] as f64 * wt as f64;
                    }
                    weights[i] += wt as u64;
                }
            }
            history.push(error);

            let mut changed = false;
            for i in 0..k {
                if weights[i] == 0 {
                    continue;
                }
                let n = weights[i] as f64;
                let mean = [(sums[i][0] / n) as f32, (sums[i][1] / n) as f32, (sums[i][2] / n) as f32];
                if mean != centroids[i] {
                    centroids[i] = mean;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        Restart { centroids, weights, error, history }
    }

    /// Runs every restart on a pool of `threads` workers and keeps the one
    /// with the lowest error. Restart `i` is seeded with `seed + i + 1`.
    pub fn generate(&self, threads: usize, seed: u64) -> Result<Generated> {
        let seeds: Vec<u64> = (0..self.restart_count()).map(|i| seed.wrapping_add(i as u64 + 1)).collect();
        debug!(restarts = seeds.len(), threads, "running k-means");

        let restarts = self.run_all(&seeds, threads)?;
        for (i, r) in restarts.iter().enumerate() {
            debug!("palette generator worker #{} error = {} ({} passes)", i + 1, r.error, r.history.len());
        }

        let best = &restarts[select_best(&restarts)];
        debug!("palette generator error = {}", best.error);
        Ok(Generated { palette: self.palette_from(&best.centroids), error: best.error })
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn run_all(&self, seeds: &[u64], threads: usize) -> Result<Vec<Restart>> {
        use rayon::prelude::*;

        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads.max(1)).build()?;
        Ok(pool.install(|| seeds.par_iter().map(|&s| self.run_restart(s)).collect()))
    }

    #[cfg(target_arch = "wasm32")]
    fn run_all(&self, seeds: &[u64], _threads: usize) -> Result<Vec<Restart>> {
        Ok(seeds.iter().map(|&s| self.run_restart(s)).collect())
    }

    /// Base palette with the trainable slots replaced by `centroids`.
    pub fn palette_from(&self, centroids: &[Working]) -> Vec<Color> {
        let mut palette = self.base.clone();
        for (slot, c) in palette.iter_mut().zip(centroids) {
            *slot = self.colorspace.to_color(c);
        }
        palette
    }
}

/// Index of the lowest-error restart; the earliest wins ties.
pub fn select_best(restarts: &[Restart]) -> usize {
    let mut best = 0;
    for (i, r) in restarts.iter().enumerate().skip(1) {
        if r.error < restarts[best].error {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::ColorspaceKind;
    use crate::platform::Platform;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            image::Rgb([(x * 255 / w.max(1)) as u8, (y * 255 / h.max(1)) as u8, ((x + y) % 256) as u8])
        })
    }

    fn black_white() -> RgbImage {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(1, 0, image::Rgb([255, 255, 255]));
        img
    }

    #[test]
    fn test_black_white_converges_exactly() {
        let base = Platform::OcTier2.base_palette();
        let cs = Colorspace::new(ColorspaceKind::Rgb);
        let gen = PaletteGenerator::new(&black_white(), &base, 16, 0, cs, 0, 7);
        assert_eq!(gen.point_count(), 2);

        let restart = gen.run_restart(11);
        assert_eq!(restart.error, 0.0);
        let used: Vec<Working> = restart
            .weights
            .iter()
            .zip(&restart.centroids)
            .filter(|(w, _)| **w > 0)
            .map(|(_, c)| *c)
            .collect();
        assert_eq!(used.len(), 2);
        assert!(used.contains(&[0.0, 0.0, 0.0]));
        assert!(used.contains(&[1.0, 1.0, 1.0]));

        let generated = gen.generate(2, 3).unwrap();
        assert_eq!(generated.error, 0.0);
        assert_eq!(generated.palette.len(), 16);
        assert!(generated.palette.contains(&Color::new(0, 0, 0)));
        assert!(generated.palette.contains(&Color::new(255, 255, 255)));
    }

    #[test]
    fn test_error_is_non_increasing() {
        let base = Platform::OcTier3.base_palette();
        for kind in ColorspaceKind::ALL {
            let gen = PaletteGenerator::new(&gradient(40, 30), &base, 16, 0, Colorspace::new(kind), 1, 5);
            for seed in 0..4 {
                let r = gen.run_restart(seed);
                assert!(!r.history.is_empty() && r.history.len() <= MAX_PASSES);
                for pair in r.history.windows(2) {
                    assert!(pair[1] <= pair[0] * (1.0 + 1e-5) + 1e-9, "{kind}: {:?}", r.history);
                }
                assert_eq!(r.error, *r.history.last().unwrap());
            }
        }
    }

    #[test]
    fn test_restart_count() {
        let base = Platform::OcTier2.base_palette();
        let img = gradient(4, 4);
        let cs = Colorspace::new(ColorspaceKind::Yiq);
        let count = |level| PaletteGenerator::new(&img, &base, 16, 0, cs, level, 0).restart_count();
        assert_eq!(count(0), 20);
        assert_eq!(count(1), 10);
        assert_eq!(count(3), 5);
        assert_eq!(count(40), 1);
    }

    #[test]
    fn test_select_best_prefers_lowest_then_earliest() {
        let r = |error| Restart { centroids: vec![], weights: vec![], error, history: vec![error] };
        assert_eq!(select_best(&[r(3.0), r(1.0), r(2.0), r(1.0)]), 1);
        assert_eq!(select_best(&[r(0.5)]), 0);
    }

    #[test]
    fn test_generate_picks_minimum_of_restarts() {
        let base = Platform::OcTier3.base_palette();
        let gen = PaletteGenerator::new(&gradient(32, 32), &base, 16, 0, Colorspace::new(ColorspaceKind::Yiq), 2, 9);
        let generated = gen.generate(3, 100).unwrap();
        let errors: Vec<f64> = (0..gen.restart_count()).map(|i| gen.run_restart(100 + i as u64 + 1).error).collect();
        let min = errors.iter().cloned().fold(f64::INFINITY, f64::min);
        assert_eq!(generated.error, min);
    }

    #[test]
    fn test_anchors_are_untouched() {
        let base = Platform::OcTier3.base_palette();
        let gen = PaletteGenerator::new(&gradient(16, 16), &base, 16, 0, Colorspace::new(ColorspaceKind::Yuv), 1, 1);
        let generated = gen.generate(1, 1).unwrap();
        assert_eq!(generated.palette.len(), 256);
        assert_eq!(&generated.palette[16..], &base[16..]);
    }

    #[test]
    fn test_sampling_modes_weigh_every_sample() {
        let base = Platform::OcTier2.base_palette();
        let cs = Colorspace::new(ColorspaceKind::Rgb);
        let img = gradient(100, 60);

        let full = PaletteGenerator::new(&img, &base, 16, 0, cs, 0, 1);
        assert_eq!(full.total_weight(), 6000);

        // 25x15 blocks of 4x4
        let blocks = PaletteGenerator::new(&img, &base, 16, 0, cs, 3, 1);
        assert_eq!(blocks.total_weight(), 25 * 15);

        let grid = PaletteGenerator::new(&img, &base, 16, 8, cs, 0, 1);
        assert_eq!(grid.total_weight(), 8 * 16);
    }
}
