//! Output size negotiation against a platform's cell grid and pixel budget.

use crate::platform::Platform;
use crate::{CtifError, Result};

/// Rounds `x` up to the next multiple of `step`.
pub fn round_up(x: u32, step: u32) -> u32 {
    match x % step {
        0 => x,
        r => x - r + step,
    }
}

/// Computes the output size in pixels.
///
/// `width` and `height` of 0 mean "unset" and default to the full screen.
/// Unless `ignore_aspect_ratio` is set, the result keeps the source aspect
/// ratio inside the requested box and the platform's pixel budget. Both
/// dimensions come out as multiples of the platform's cell size.
pub fn negotiate(
    platform: Platform,
    width: u32,
    height: u32,
    ignore_aspect_ratio: bool,
    image_size: (u32, u32),
) -> Result<(u32, u32)> {
    let (iw, ih) = image_size;
    if iw == 0 || ih == 0 {
        return Err(CtifError::EmptyImage);
    }

    let (cw, ch) = (platform.char_width(), platform.char_height());
    let mut w = if width > 0 { round_up(width, cw) } else { platform.width_px() };
    let mut h = if height > 0 { round_up(height, ch) } else { platform.height_px() };

    if !ignore_aspect_ratio {
        let x = iw as f32 / ih as f32;
        let y = 1.0f32;
        let a = (w as f32 / x)
            .min(h as f32 / y)
            .min((platform.chars_px() as f32 / (x * y)).sqrt());
        w = round_up((x * a).floor() as u32, cw);
        h = round_up((y * a).floor() as u32, ch);
    }

    if w == 0 || h == 0 {
        return Err(CtifError::ZeroSize { width: w, height: h });
    }
    validate(platform, w, h)?;
    Ok((w, h))
}

/// Checks a size against the platform limits, area first.
pub fn validate(platform: Platform, w: u32, h: u32) -> Result<()> {
    if w as u64 * h as u64 > platform.chars_px() as u64 {
        Err(CtifError::SizeTooLarge { width: w, height: h, max: platform.chars_px() })
    } else if w > platform.width_px() {
        Err(CtifError::WidthTooLarge { width: w, max: platform.width_px() })
    } else if h > platform.height_px() {
        Err(CtifError::HeightTooLarge { height: h, max: platform.height_px() })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(33, 2), 34);
        assert_eq!(round_up(34, 2), 34);
        assert_eq!(round_up(0, 4), 0);
        assert_eq!(round_up(1, 8), 8);
    }

    #[test]
    fn test_explicit_width_rounds_up_to_cell() {
        let size = negotiate(Platform::OcTier3, 33, 0, true, (100, 100)).unwrap();
        assert_eq!(size, (34, 200));
    }

    #[test]
    fn test_defaults_to_full_screen() {
        assert_eq!(negotiate(Platform::OcTier3, 0, 0, true, (1, 1)).unwrap(), (320, 200));
        assert_eq!(negotiate(Platform::Zxspectrum, 0, 0, true, (1, 1)).unwrap(), (256, 192));
    }

    #[test]
    fn test_aspect_ratio_preserved() {
        assert_eq!(negotiate(Platform::OcTier3, 0, 0, false, (1920, 1080)).unwrap(), (320, 180));
        assert_eq!(negotiate(Platform::OcTier3, 0, 0, false, (500, 500)).unwrap(), (200, 200));
        assert_eq!(negotiate(Platform::OcTier3, 160, 0, false, (500, 500)).unwrap(), (160, 160));
    }

    #[test]
    fn test_negotiated_sizes_respect_limits() {
        for platform in Platform::ALL {
            let (cw, ch) = (platform.char_width(), platform.char_height());
            for &(iw, ih) in &[(1, 1), (4, 3), (16, 9), (3, 4), (9, 16), (1000, 250), (250, 1000)] {
                for &(rw, rh) in &[(0, 0), (10, 0), (0, 10), (33, 17), (platform.width_px(), 0)] {
                    for ignore in [false, true] {
                        let (w, h) = negotiate(platform, rw, rh, ignore, (iw, ih))
                            .unwrap_or_else(|e| panic!("{platform} {iw}x{ih} {rw}x{rh}: {e}"));
                        assert_eq!(w % cw, 0);
                        assert_eq!(h % ch, 0);
                        assert!(w * h <= platform.chars_px());
                        assert!(w <= platform.width_px());
                        assert!(h <= platform.height_px());
                    }
                }
            }
        }
    }

    #[test]
    fn test_validation_order() {
        let p = Platform::OcTier1; // 100x64 px
        assert!(matches!(
            negotiate(p, 200, 200, true, (1, 1)),
            Err(CtifError::SizeTooLarge { width: 200, height: 200, max: 6400 })
        ));
        assert!(matches!(
            negotiate(p, 120, 4, true, (1, 1)),
            Err(CtifError::WidthTooLarge { width: 120, max: 100 })
        ));
        assert!(matches!(
            negotiate(p, 2, 80, true, (1, 1)),
            Err(CtifError::HeightTooLarge { height: 80, max: 64 })
        ));
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(matches!(
            negotiate(Platform::OcTier3, 0, 0, false, (0, 10)),
            Err(CtifError::EmptyImage)
        ));
        for ignore in [false, true] {
            assert!(matches!(negotiate(Platform::OcTier2, 0, 0, ignore, (0, 0)), Err(CtifError::EmptyImage)));
            assert!(matches!(negotiate(Platform::OcTier2, 40, 40, ignore, (7, 0)), Err(CtifError::EmptyImage)));
        }
        assert!(matches!(
            negotiate(Platform::OcTier3, 0, 0, false, (100_000, 1)),
            Err(CtifError::ZeroSize { .. })
        ));
    }
}
