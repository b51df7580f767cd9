//! Boundary handling for out-of-range pixel reads.
//!
//! Convolution windows extend past the image edge near the border.
//! [`PaddingMode`] decides which in-range pixel stands in for an
//! out-of-range coordinate; [`sample_or`] instead substitutes a fixed
//! fill color.

use image::Rgb;
use serde::{Deserialize, Serialize};

use crate::raster::{BLACK, Raster};

/// Policy for mapping out-of-range coordinates back into the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PaddingMode {
    /// Clamp each axis to `[0, len - 1]` (edge pixels repeat).
    #[default]
    Fixed,
    /// Wrap around: the image tiles the plane.
    Periodic,
    /// Mirror at the edge, repeating the edge pixel
    /// (`-1 -> 0`, `len -> len - 1`). Far-out coordinates follow a
    /// triangle wave with period `2 * len`.
    Reflected,
}

/// Map `coord` into `[0, len)` under `mode`.
///
/// Returns `None` only when `len` is zero.
#[must_use]
pub fn remap(coord: i64, len: u32, mode: PaddingMode) -> Option<u32> {
    if len == 0 {
        return None;
    }
    let len = i64::from(len);
    let mapped = match mode {
        PaddingMode::Fixed => coord.clamp(0, len - 1),
        PaddingMode::Periodic => coord.rem_euclid(len),
        PaddingMode::Reflected => {
            let r = coord.rem_euclid(2 * len);
            if r < len { r } else { 2 * len - 1 - r }
        }
    };
    u32::try_from(mapped).ok()
}

/// Read the pixel at `(x, y)`, remapping out-of-range coordinates under
/// `mode`.
///
/// An empty image yields black.
#[must_use]
pub fn sample(image: &Raster, x: i64, y: i64, mode: PaddingMode) -> Rgb<u8> {
    match (
        remap(x, image.width(), mode),
        remap(y, image.height(), mode),
    ) {
        (Some(x), Some(y)) => image.rgb_at(x, y),
        _ => BLACK,
    }
}

/// Read the pixel at `(x, y)`, returning `fallback` when the position
/// lies outside the image.
#[must_use]
pub fn sample_or(image: &Raster, x: i64, y: i64, fallback: Rgb<u8>) -> Rgb<u8> {
    if image.contains(x, y) {
        match (u32::try_from(x), u32::try_from(y)) {
            (Ok(x), Ok(y)) => image.rgb_at(x, y),
            _ => fallback,
        }
    } else {
        fallback
    }
}

#[cfg(test)]
#[allow(clippy::cast_possible_truncation)]
mod tests {
    use image::{GrayImage, Luma};

    use super::*;

    /// 5x3 image whose gray value encodes the column index.
    fn column_ramp() -> Raster {
        Raster::Gray(GrayImage::from_fn(5, 3, |x, _| Luma([x as u8 * 10])))
    }

    #[test]
    fn minus_one_maps_per_mode() {
        let img = column_ramp();
        assert_eq!(sample(&img, -1, 1, PaddingMode::Fixed), Rgb([0, 0, 0]));
        assert_eq!(sample(&img, -1, 1, PaddingMode::Periodic), Rgb([40, 40, 40]));
        assert_eq!(sample(&img, -1, 1, PaddingMode::Reflected), Rgb([0, 0, 0]));
    }

    #[test]
    fn fixed_clamps_both_directions() {
        assert_eq!(remap(-7, 5, PaddingMode::Fixed), Some(0));
        assert_eq!(remap(2, 5, PaddingMode::Fixed), Some(2));
        assert_eq!(remap(5, 5, PaddingMode::Fixed), Some(4));
        assert_eq!(remap(99, 5, PaddingMode::Fixed), Some(4));
    }

    #[test]
    fn periodic_wraps_negative_and_overflow() {
        assert_eq!(remap(-1, 5, PaddingMode::Periodic), Some(4));
        assert_eq!(remap(-5, 5, PaddingMode::Periodic), Some(0));
        assert_eq!(remap(-6, 5, PaddingMode::Periodic), Some(4));
        assert_eq!(remap(7, 5, PaddingMode::Periodic), Some(2));
    }

    #[test]
    fn reflected_is_a_triangle_wave() {
        let cases = [
            (-12, 1),
            (-11, 0),
            (-10, 0),
            (-6, 4),
            (-5, 4),
            (-2, 1),
            (-1, 0),
            (0, 0),
            (4, 4),
            (5, 4),
            (6, 3),
            (9, 0),
            (10, 0),
            (14, 4),
        ];
        for (coord, expected) in cases {
            assert_eq!(
                remap(coord, 5, PaddingMode::Reflected),
                Some(expected),
                "coord {coord}"
            );
        }
    }

    #[test]
    fn single_pixel_axis_always_maps_to_zero() {
        for mode in [PaddingMode::Fixed, PaddingMode::Periodic, PaddingMode::Reflected] {
            for coord in -4..=4 {
                assert_eq!(remap(coord, 1, mode), Some(0));
            }
        }
    }

    #[test]
    fn zero_length_axis_has_no_mapping() {
        assert_eq!(remap(0, 0, PaddingMode::Fixed), None);
        let empty = Raster::Gray(GrayImage::new(0, 0));
        assert_eq!(sample(&empty, 0, 0, PaddingMode::Periodic), BLACK);
    }

    #[test]
    fn sample_or_uses_fallback_outside() {
        let img = column_ramp();
        let fill = Rgb([1, 2, 3]);
        assert_eq!(sample_or(&img, -1, 0, fill), fill);
        assert_eq!(sample_or(&img, 5, 0, fill), fill);
        assert_eq!(sample_or(&img, 0, 3, fill), fill);
        assert_eq!(sample_or(&img, 2, 2, fill), Rgb([20, 20, 20]));
    }
}
