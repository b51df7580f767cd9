//! Edge detection operators.
//!
//! Gradient operators (Sobel, Prewitt, Scharr) convolve with an X/Y
//! kernel pair and combine the responses by Euclidean norm; the
//! Laplacian convolves with a single second-derivative kernel. All use
//! [`PaddingMode::Fixed`] at the border.

use serde::{Deserialize, Serialize};

use crate::cancel::{CancelToken, Cancelled};
use crate::convolve::{Kernel, convolve, convolve_planes, convolve_xy};
use crate::padding::PaddingMode;
use crate::raster::{MonoImage, Raster};

const SOBEL_X: [[f64; 3]; 3] = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
const SOBEL_Y: [[f64; 3]; 3] = [[1.0, 2.0, 1.0], [0.0, 0.0, 0.0], [-1.0, -2.0, -1.0]];

const PREWITT_X: [[f64; 3]; 3] = [[-1.0, 0.0, 1.0], [-1.0, 0.0, 1.0], [-1.0, 0.0, 1.0]];
const PREWITT_Y: [[f64; 3]; 3] = [[-1.0, -1.0, -1.0], [0.0, 0.0, 0.0], [1.0, 1.0, 1.0]];

const SCHARR_X: [[f64; 3]; 3] = [[3.0, 10.0, 3.0], [0.0, 0.0, 0.0], [-3.0, -10.0, -3.0]];
const SCHARR_Y: [[f64; 3]; 3] = [[3.0, 0.0, -3.0], [10.0, 0.0, -10.0], [3.0, 0.0, -3.0]];

const LAPLACIAN: [[f64; 3]; 3] = [[0.0, 1.0, 0.0], [1.0, -4.0, 1.0], [0.0, 1.0, 0.0]];

/// Sobel gradient magnitude.
///
/// # Errors
///
/// Returns [`Cancelled`] if `cancel` fires mid-run.
pub fn sobel(image: &Raster, cancel: &CancelToken) -> Result<Raster, Cancelled> {
    gradient(image, SOBEL_X, SOBEL_Y, cancel)
}

/// Prewitt gradient magnitude.
///
/// # Errors
///
/// Returns [`Cancelled`] if `cancel` fires mid-run.
pub fn prewitt(image: &Raster, cancel: &CancelToken) -> Result<Raster, Cancelled> {
    gradient(image, PREWITT_X, PREWITT_Y, cancel)
}

/// Scharr gradient magnitude.
///
/// # Errors
///
/// Returns [`Cancelled`] if `cancel` fires mid-run.
pub fn scharr(image: &Raster, cancel: &CancelToken) -> Result<Raster, Cancelled> {
    gradient(image, SCHARR_X, SCHARR_Y, cancel)
}

/// Laplacian response (negative values clamp to 0).
///
/// # Errors
///
/// Returns [`Cancelled`] if `cancel` fires mid-run.
pub fn laplacian(image: &Raster, cancel: &CancelToken) -> Result<Raster, Cancelled> {
    convolve(
        image,
        &Kernel::from_array(LAPLACIAN),
        PaddingMode::Fixed,
        cancel,
    )
}

fn gradient(
    image: &Raster,
    x: [[f64; 3]; 3],
    y: [[f64; 3]; 3],
    cancel: &CancelToken,
) -> Result<Raster, Cancelled> {
    convolve_xy(
        image,
        &Kernel::from_array(x),
        &Kernel::from_array(y),
        PaddingMode::Fixed,
        cancel,
    )
}

/// Edge operator applied to the binary image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EdgeOperator {
    /// 3x3 Sobel pair.
    #[default]
    Sobel,
    /// 3x3 Prewitt pair.
    Prewitt,
    /// 3x3 Scharr pair.
    Scharr,
    /// 4-neighbor Laplacian.
    Laplacian,
}

impl EdgeOperator {
    /// Run this operator.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if `cancel` fires mid-run.
    pub fn apply(self, image: &Raster, cancel: &CancelToken) -> Result<Raster, Cancelled> {
        match self {
            Self::Sobel => sobel(image, cancel),
            Self::Prewitt => prewitt(image, cancel),
            Self::Scharr => scharr(image, cancel),
            Self::Laplacian => laplacian(image, cancel),
        }
    }

    /// Run this operator on a binary mask and snap the response back to
    /// the mask's palette.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if `cancel` fires mid-run.
    pub fn apply_to_mask(
        self,
        mask: &MonoImage,
        cancel: &CancelToken,
    ) -> Result<MonoImage, Cancelled> {
        let kernels: Vec<Kernel> = self
            .tables()
            .iter()
            .map(|&table| Kernel::from_array(table))
            .collect();
        let kernels: Vec<&Kernel> = kernels.iter().collect();
        let image = Raster::Mono(mask.clone());
        Ok(convolve_planes(&image, &kernels, PaddingMode::Fixed, cancel)?.into_mono(mask))
    }

    /// Coefficient tables: an X/Y pair for gradient operators, a single
    /// table for the Laplacian.
    const fn tables(self) -> &'static [[[f64; 3]; 3]] {
        match self {
            Self::Sobel => &[SOBEL_X, SOBEL_Y],
            Self::Prewitt => &[PREWITT_X, PREWITT_Y],
            Self::Scharr => &[SCHARR_X, SCHARR_Y],
            Self::Laplacian => &[LAPLACIAN],
        }
    }

    /// Short lowercase name for reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sobel => "sobel",
            Self::Prewitt => "prewitt",
            Self::Scharr => "scharr",
            Self::Laplacian => "laplacian",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{GrayImage, Luma};

    use super::*;

    const ALL: [EdgeOperator; 4] = [
        EdgeOperator::Sobel,
        EdgeOperator::Prewitt,
        EdgeOperator::Scharr,
        EdgeOperator::Laplacian,
    ];

    /// 20x20 image with a sharp vertical boundary at x = 10.
    fn sharp_edge_image() -> Raster {
        Raster::Gray(GrayImage::from_fn(20, 20, |x, _y| {
            if x < 10 { Luma([0]) } else { Luma([255]) }
        }))
    }

    #[test]
    fn flat_image_has_no_edges() {
        let image = Raster::Gray(GrayImage::from_pixel(8, 8, Luma([128])));
        for op in ALL {
            let out = op.apply(&image, &CancelToken::new()).unwrap();
            for y in 0..8 {
                for x in 0..8 {
                    assert_eq!(out.gray_at(x, y), 0, "{} at ({x}, {y})", op.name());
                }
            }
        }
    }

    #[test]
    fn gradient_operators_fire_on_the_boundary() {
        let image = sharp_edge_image();
        for op in [EdgeOperator::Sobel, EdgeOperator::Prewitt, EdgeOperator::Scharr] {
            let out = op.apply(&image, &CancelToken::new()).unwrap();
            assert_eq!(out.gray_at(9, 10), 255, "{} left of boundary", op.name());
            assert_eq!(out.gray_at(10, 10), 255, "{} right of boundary", op.name());
            assert_eq!(out.gray_at(2, 10), 0, "{} far left", op.name());
            assert_eq!(out.gray_at(17, 10), 0, "{} far right", op.name());
        }
    }

    #[test]
    fn laplacian_fires_on_dark_side_only() {
        let out = laplacian(&sharp_edge_image(), &CancelToken::new()).unwrap();
        // Dark pixel next to the boundary: 255 - 0 > 0.
        assert_eq!(out.gray_at(9, 10), 255);
        // Bright pixel next to the boundary: 0 - 255 clamps to 0.
        assert_eq!(out.gray_at(10, 10), 0);
    }

    #[test]
    fn prewitt_magnitude_on_unit_step() {
        // Column ramp of 10 per pixel: |gx| = 3 * 20 = 60, gy = 0.
        let image = Raster::Gray(GrayImage::from_fn(5, 5, |x, _| {
            Luma([u8::try_from(x * 10).unwrap()])
        }));
        let out = prewitt(&image, &CancelToken::new()).unwrap();
        assert_eq!(out.gray_at(2, 2), 60);
    }

    #[test]
    fn mask_path_matches_raster_path() {
        let mask = MonoImage::from_fn(
            16,
            12,
            crate::raster::BitOrder::LsbFirst,
            [crate::raster::BLACK, crate::raster::WHITE],
            |x, y| (4..11).contains(&x) && (3..9).contains(&y),
        );
        let cancel = CancelToken::new();
        for op in ALL {
            let via_mask = op.apply_to_mask(&mask, &cancel).unwrap();
            let via_raster = op.apply(&Raster::Mono(mask.clone()), &cancel).unwrap();
            assert_eq!(Raster::Mono(via_mask.clone()), via_raster, "{}", op.name());
            assert_eq!(via_mask.bit_order(), mask.bit_order());
            assert_eq!(via_mask.palette(), mask.palette());
        }
    }

    #[test]
    fn mask_outline_is_foreground() {
        let mask = MonoImage::from_fn(
            12,
            12,
            crate::raster::BitOrder::MsbFirst,
            [crate::raster::BLACK, crate::raster::WHITE],
            |x, y| (3..9).contains(&x) && (3..9).contains(&y),
        );
        let edges = EdgeOperator::Sobel
            .apply_to_mask(&mask, &CancelToken::new())
            .unwrap();
        assert!(edges.is_foreground(3, 5), "left rim");
        assert!(edges.is_foreground(2, 5), "outside next to rim");
        assert!(!edges.is_foreground(5, 5), "interior");
        assert!(!edges.is_foreground(0, 0), "background");
    }

    #[test]
    fn cancelled_token_aborts() {
        let cancel = CancelToken::new();
        cancel.cancel();
        for op in ALL {
            assert_eq!(op.apply(&sharp_edge_image(), &cancel), Err(Cancelled));
        }
    }
}
