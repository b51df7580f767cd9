//! Iterative mean-shift smoothing.
//!
//! Each pass replaces every pixel with the per-channel mean of the
//! in-frame neighbors inside its square spatial window whose gray level
//! is close to the center's. Passes chain: pass `n + 1` reads the output
//! of pass `n`. Edges between regions of different brightness survive
//! because far-off gray levels never enter the mean.

use crate::cancel::{CancelToken, Cancelled};
use crate::raster::{Planes, Raster};

/// Run `max_level` mean-shift passes.
///
/// A neighbor contributes when `|g - g_center| / 255 <= color_radius`.
/// Zero passes return a copy of the input.
///
/// # Panics
///
/// Panics if `color_radius` is outside `[0, 1]`.
///
/// # Errors
///
/// Returns [`Cancelled`] if `cancel` fires mid-run.
pub fn mean_shift_filter(
    image: &Raster,
    spatial_radius: u32,
    color_radius: f64,
    max_level: u32,
    cancel: &CancelToken,
) -> Result<Raster, Cancelled> {
    assert!(
        (0.0..=1.0).contains(&color_radius),
        "color radius must lie in [0, 1], got {color_radius}"
    );
    let mut current = Planes::from_raster(image);
    for level in 0..max_level {
        tracing::debug!(level, "mean-shift pass");
        current = pass(&current, spatial_radius, color_radius, cancel)?;
    }
    Ok(current.into_raster(image))
}

fn pass(
    src: &Planes,
    radius: u32,
    color_radius: f64,
    cancel: &CancelToken,
) -> Result<Planes, Cancelled> {
    let grays = src.grays();
    let width = src.width as usize;
    let mut dst = Planes::zeroed(src.width, src.height, src.channels);
    let mut sums = vec![0_u64; src.channels];

    for y in 0..src.height {
        for x in 0..src.width {
            cancel.check()?;
            let center = grays[y as usize * width + x as usize];
            sums.fill(0);
            let mut count = 0_u64;

            let y0 = y.saturating_sub(radius);
            let y1 = y.saturating_add(radius).min(src.height - 1);
            let x0 = x.saturating_sub(radius);
            let x1 = x.saturating_add(radius).min(src.width - 1);
            for wy in y0..=y1 {
                for wx in x0..=x1 {
                    let gray = grays[wy as usize * width + wx as usize];
                    if f64::from(gray.abs_diff(center)) / 255.0 > color_radius {
                        continue;
                    }
                    for (sum, &p) in sums.iter_mut().zip(src.pixel(wx, wy)) {
                        *sum += u64::from(p);
                    }
                    count += 1;
                }
            }

            // The center always passes its own test, so `count >= 1` and
            // each mean stays within 0..=255.
            for (out, &sum) in dst.pixel_mut(x, y).iter_mut().zip(&sums) {
                *out = u8::try_from(sum / count).unwrap_or(u8::MAX);
            }
        }
    }
    Ok(dst)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{GrayImage, Luma, Rgb, RgbImage};

    use super::*;

    /// Two flat regions, 20 and 220, split at x = 4, with mild noise.
    fn two_regions() -> GrayImage {
        GrayImage::from_fn(8, 6, |x, y| {
            let base = if x < 4 { 20 } else { 220 };
            Luma([base + u8::from((x + y) % 2 == 0) * 4])
        })
    }

    #[test]
    fn zero_levels_returns_input() {
        let image = Raster::Gray(two_regions());
        let out = mean_shift_filter(&image, 2, 0.1, 0, &CancelToken::new()).unwrap();
        assert_eq!(out, image);
    }

    #[test]
    fn preserves_strong_edge() {
        let image = Raster::Gray(two_regions());
        let out = mean_shift_filter(&image, 2, 0.1, 3, &CancelToken::new()).unwrap();
        for y in 0..6 {
            assert!(out.gray_at(3, y) < 30, "dark side leaked at y={y}");
            assert!(out.gray_at(4, y) >= 220, "bright side leaked at y={y}");
        }
    }

    #[test]
    fn full_color_radius_is_a_clipped_box_mean() {
        let gray = GrayImage::from_raw(3, 1, vec![0, 30, 90]).unwrap();
        let out =
            mean_shift_filter(&Raster::Gray(gray), 1, 1.0, 1, &CancelToken::new()).unwrap();
        assert_eq!(out.gray_at(0, 0), 15);
        assert_eq!(out.gray_at(1, 0), 40);
        assert_eq!(out.gray_at(2, 0), 60);
    }

    #[test]
    fn zero_color_radius_only_averages_equal_grays() {
        let image = Raster::Rgb(RgbImage::from_fn(3, 1, |x, _| {
            if x == 1 { Rgb([200, 0, 0]) } else { Rgb([10, 10, 10]) }
        }));
        let out = mean_shift_filter(&image, 1, 0.0, 1, &CancelToken::new()).unwrap();
        assert_eq!(out.rgb_at(1, 0), Rgb([200, 0, 0]));
        assert_eq!(out.rgb_at(0, 0), Rgb([10, 10, 10]));
    }

    #[test]
    #[should_panic(expected = "color radius must lie in [0, 1]")]
    fn rejects_out_of_range_color_radius() {
        let _ = mean_shift_filter(
            &Raster::Gray(two_regions()),
            1,
            1.5,
            1,
            &CancelToken::new(),
        );
    }

    #[test]
    fn cancelled_token_aborts() {
        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(
            mean_shift_filter(&Raster::Gray(two_regions()), 1, 0.2, 2, &cancel),
            Err(Cancelled)
        );
    }
}
