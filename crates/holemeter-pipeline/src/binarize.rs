//! Gray-level binarization into packed 1-bit images.
//!
//! Output images are MSB-first with the palette `[black, white]`; pixels
//! satisfying the predicate get index 1 (white, the foreground).

use image::Rgb;

use crate::histogram::grayscale_histogram;
use crate::raster::{BLACK, BitOrder, MonoImage, Raster, WHITE, gray_level};
use crate::threshold::ThresholdMethod;

/// Mark every pixel for which `predicate(color)` holds as foreground.
#[must_use = "returns the binary image"]
pub fn binarize_by(image: &Raster, predicate: impl Fn(Rgb<u8>) -> bool) -> MonoImage {
    MonoImage::from_fn(
        image.width(),
        image.height(),
        BitOrder::MsbFirst,
        [BLACK, WHITE],
        |x, y| predicate(image.rgb_at(x, y)),
    )
}

/// Foreground is every pixel whose gray level is strictly above
/// `threshold`.
#[must_use = "returns the binary image"]
pub fn binarize(image: &Raster, threshold: u8) -> MonoImage {
    binarize_by(image, |color| gray_level(color) > threshold)
}

/// Select a threshold with `method` from the image's histogram, then
/// binarize at that level.
///
/// # Panics
///
/// Panics for [`ThresholdMethod::PTile`] with `p` outside `[0, 1)`.
#[must_use = "returns the binary image"]
pub fn binarize_with(image: &Raster, method: ThresholdMethod) -> MonoImage {
    binarize(image, method.select(&grayscale_histogram(image)))
}

#[cfg(test)]
#[allow(clippy::cast_possible_truncation)]
mod tests {
    use image::{GrayImage, Luma, RgbImage};

    use super::*;
    use crate::threshold::cluster_threshold;

    /// Left `split` columns at `low`, the rest at `high`.
    fn two_level(width: u32, split: u32, low: u8, high: u8) -> Raster {
        Raster::Gray(GrayImage::from_fn(width, 4, |x, _| {
            Luma([if x < split { low } else { high }])
        }))
    }

    fn foreground_mask(mono: &MonoImage) -> Vec<bool> {
        let mut out = Vec::new();
        for y in 0..mono.height() {
            for x in 0..mono.width() {
                out.push(mono.is_foreground(x, y));
            }
        }
        out
    }

    #[test]
    fn threshold_is_exclusive() {
        let image = Raster::Gray(GrayImage::from_fn(3, 1, |x, _| Luma([99 + x as u8])));
        let mono = binarize(&image, 100);
        assert!(!mono.is_foreground(0, 0));
        assert!(!mono.is_foreground(1, 0));
        assert!(mono.is_foreground(2, 0));
    }

    #[test]
    fn output_layout_is_msb_first_black_white() {
        let mono = binarize(&two_level(10, 0, 0, 255), 0);
        assert_eq!(mono.bit_order(), BitOrder::MsbFirst);
        assert_eq!(mono.palette(), [BLACK, WHITE]);
        assert_eq!(mono.foreground_index(), 1);
        assert_eq!(mono.scanline(0), &[0xff, 0b1100_0000]);
    }

    #[test]
    fn predicate_sees_full_color() {
        let image = Raster::Rgb(RgbImage::from_fn(4, 1, |x, _| {
            Rgb([0, 0, (x * 80) as u8])
        }));
        let mono = binarize_by(&image, |c| c.0[2] >= 160);
        assert_eq!(
            foreground_mask(&mono),
            vec![false, false, true, true]
        );
    }

    #[test]
    fn otsu_binarization_ignores_monotonic_remap() {
        // Even split and a 70/30 split, each under two gray remappings
        // that preserve order.
        for (width, split) in [(20, 10), (20, 14)] {
            let a = two_level(width, split, 30, 200);
            let b = two_level(width, split, 90, 120);
            let ma = binarize(&a, cluster_threshold(&grayscale_histogram(&a)));
            let mb = binarize(&b, cluster_threshold(&grayscale_histogram(&b)));
            assert_eq!(foreground_mask(&ma), foreground_mask(&mb), "split {split}");
            assert!(ma.is_foreground(width - 1, 0));
            assert!(!ma.is_foreground(0, 0));
        }
    }

    #[test]
    fn binarize_with_matches_explicit_threshold() {
        let image = two_level(8, 4, 10, 250);
        let mono = binarize_with(&image, ThresholdMethod::Cluster);
        assert_eq!(mono, binarize(&image, 10));
        assert!(mono.is_foreground(7, 3));
        assert!(!mono.is_foreground(0, 3));
    }
}
