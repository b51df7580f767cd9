//! Linear smoothing filters built on [`convolve`].
//!
//! [`box_filter`] averages a uniform square window; [`gaussian_filter`]
//! weights the same window by a sampled 2D Gaussian. Both honor the
//! caller's [`PaddingMode`] at the image border.

use crate::cancel::{CancelToken, Cancelled};
use crate::convolve::{Kernel, convolve};
use crate::padding::PaddingMode;
use crate::raster::Raster;

/// Gaussian sigma used when none is given: `radius / 2`.
#[must_use]
pub fn default_sigma(radius: u32) -> f64 {
    f64::from(radius) / 2.0
}

/// Uniform `(2r + 1)²` averaging kernel.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn box_kernel(radius: u32) -> Kernel {
    let side = f64::from(2 * radius + 1);
    let weight = 1.0 / (side * side);
    Kernel::square(radius, |_, _| weight)
}

/// Gaussian kernel over `[-r, r]²`, renormalized to sum to 1.
///
/// A non-positive (or NaN) `sigma` or a zero `radius` yields the
/// identity kernel.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn gaussian_kernel(radius: u32, sigma: f64) -> Kernel {
    if radius == 0 || sigma.is_nan() || sigma <= 0.0 {
        return Kernel::identity();
    }
    let two_sigma_sq = 2.0 * sigma * sigma;
    Kernel::square(radius, |dx, dy| {
        let d2 = (dx * dx + dy * dy) as f64;
        (-d2 / two_sigma_sq).exp()
    })
    .normalized()
}

/// Replace every pixel with the mean of its `(2r + 1)²` window.
///
/// # Errors
///
/// Returns [`Cancelled`] if `cancel` fires mid-run.
pub fn box_filter(
    image: &Raster,
    radius: u32,
    padding: PaddingMode,
    cancel: &CancelToken,
) -> Result<Raster, Cancelled> {
    convolve(image, &box_kernel(radius), padding, cancel)
}

/// Gaussian smoothing over a `(2r + 1)²` window.
///
/// `sigma = None` uses `radius / 2`.
///
/// # Errors
///
/// Returns [`Cancelled`] if `cancel` fires mid-run.
pub fn gaussian_filter(
    image: &Raster,
    radius: u32,
    sigma: Option<f64>,
    padding: PaddingMode,
    cancel: &CancelToken,
) -> Result<Raster, Cancelled> {
    let sigma = sigma.unwrap_or_else(|| default_sigma(radius));
    tracing::debug!(radius, sigma, "building gaussian kernel");
    convolve(image, &gaussian_kernel(radius, sigma), padding, cancel)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{GrayImage, Luma};

    use super::*;

    /// 10x10 image with a sharp black-to-white boundary at x = 5.
    fn sharp_edge_image() -> Raster {
        Raster::Gray(GrayImage::from_fn(10, 10, |x, _y| {
            if x < 5 { Luma([0]) } else { Luma([255]) }
        }))
    }

    #[test]
    fn gaussian_weights_sum_to_one() {
        for radius in [1, 2, 3, 5, 8] {
            for sigma in [0.3, 0.5, 1.0, 2.5, 10.0] {
                let kernel = gaussian_kernel(radius, sigma);
                assert!(
                    (kernel.sum() - 1.0).abs() < 1e-12,
                    "radius {radius} sigma {sigma}: sum {}",
                    kernel.sum()
                );
            }
        }
    }

    #[test]
    fn gaussian_peak_is_at_center() {
        let kernel = gaussian_kernel(2, 1.0);
        let center = kernel.weight(2, 2);
        assert!(kernel.weights().iter().all(|&w| w <= center));
        assert!((kernel.weight(0, 0) - kernel.weight(4, 4)).abs() < 1e-15);
    }

    #[test]
    fn degenerate_sigma_or_radius_is_identity() {
        assert_eq!(gaussian_kernel(3, 0.0), Kernel::identity());
        assert_eq!(gaussian_kernel(3, -1.0), Kernel::identity());
        assert_eq!(gaussian_kernel(0, 1.5), Kernel::identity());
    }

    #[test]
    fn zero_radius_filters_return_input() {
        let image = sharp_edge_image();
        let cancel = CancelToken::new();
        let boxed = box_filter(&image, 0, PaddingMode::Fixed, &cancel).unwrap();
        assert_eq!(boxed, image);
        let gauss = gaussian_filter(&image, 0, None, PaddingMode::Fixed, &cancel).unwrap();
        assert_eq!(gauss, image);
    }

    #[test]
    fn box_filter_smooths_the_boundary() {
        let out = box_filter(
            &sharp_edge_image(),
            1,
            PaddingMode::Fixed,
            &CancelToken::new(),
        )
        .unwrap();
        let left = out.gray_at(4, 5);
        let right = out.gray_at(5, 5);
        assert!(
            left > 0 && left < 255,
            "expected intermediate value at x=4, got {left}"
        );
        assert!(
            right > 0 && right < 255,
            "expected intermediate value at x=5, got {right}"
        );
        assert_eq!(out.gray_at(0, 5), 0);
    }

    #[test]
    fn gaussian_filter_preserves_dimensions() {
        let image = Raster::Gray(GrayImage::new(31, 17));
        let out =
            gaussian_filter(&image, 2, Some(1.0), PaddingMode::Periodic, &CancelToken::new())
                .unwrap();
        assert_eq!(out.dimensions(), image.dimensions());
        assert!(out.is_grayscale());
    }

    #[test]
    fn cancelled_filter_returns_error() {
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(gaussian_filter(&sharp_edge_image(), 2, None, PaddingMode::Fixed, &cancel).is_err());
    }
}
