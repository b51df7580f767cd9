//! Boundary-aware 2D convolution.
//!
//! Every entry point reads the kernel window through
//! [`sample`](crate::padding::sample) or
//! [`sample_or`](crate::padding::sample_or), accumulates per-channel
//! weighted sums in a full-precision working copy, clamps to `[0, 255]`,
//! truncates, and converts back to the input's pixel layout. Kernels are applied as a true convolution: weight
//! `(i, j)` multiplies the source pixel at
//! `(x + cols/2 - j, y + rows/2 - i)`.

use image::Rgb;

use crate::cancel::{CancelToken, Cancelled};
use crate::padding::{PaddingMode, sample, sample_or};
use crate::raster::{Planes, Raster, gray_level};
use crate::types::PipelineError;

/// Dense real-valued kernel with odd dimensions, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    rows: usize,
    cols: usize,
    weights: Vec<f64>,
}

impl Kernel {
    /// Build a kernel from row-major weights.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidKernel`] if either dimension is
    /// even or zero, or if `weights` does not hold `rows * cols` values.
    pub fn new(rows: usize, cols: usize, weights: Vec<f64>) -> Result<Self, PipelineError> {
        if rows.is_multiple_of(2) || cols.is_multiple_of(2) || weights.len() != rows * cols {
            return Err(PipelineError::InvalidKernel { rows, cols });
        }
        Ok(Self {
            rows,
            cols,
            weights,
        })
    }

    /// Build a kernel from a fixed-size array. Even dimensions fail to
    /// compile.
    #[must_use]
    pub fn from_array<const R: usize, const C: usize>(weights: [[f64; C]; R]) -> Self {
        const {
            assert!(R % 2 == 1 && C % 2 == 1, "kernel dimensions must be odd");
        }
        Self {
            rows: R,
            cols: C,
            weights: weights.into_iter().flatten().collect(),
        }
    }

    /// The 1x1 kernel with weight 1.
    #[must_use]
    pub fn identity() -> Self {
        Self::from_array([[1.0]])
    }

    /// Square `(2r + 1)²` kernel whose weight at offset `(dx, dy)` from
    /// the center is `f(dx, dy)`.
    #[must_use]
    pub fn square(radius: u32, f: impl Fn(i64, i64) -> f64) -> Self {
        let r = i64::from(radius);
        let side = 2 * radius as usize + 1;
        let mut weights = Vec::with_capacity(side * side);
        for dy in -r..=r {
            for dx in -r..=r {
                weights.push(f(dx, dy));
            }
        }
        Self {
            rows: side,
            cols: side,
            weights,
        }
    }

    /// Number of rows (always odd).
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns (always odd).
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// Weight at `(row, col)`.
    #[must_use]
    pub fn weight(&self, row: usize, col: usize) -> f64 {
        self.weights[row * self.cols + col]
    }

    /// All weights, row-major.
    #[must_use]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Sum of all weights.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// Scale every weight so the kernel sums to 1. A zero-sum kernel is
    /// returned unchanged.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let sum = self.sum();
        if sum.abs() > f64::EPSILON {
            for w in &mut self.weights {
                *w /= sum;
            }
        }
        self
    }

    /// `(dx, dy, weight)` for every tap, where `(x + dx, y + dy)` is the
    /// source position read for output pixel `(x, y)`.
    #[allow(clippy::cast_possible_wrap)]
    fn taps(&self) -> impl Iterator<Item = (i64, i64, f64)> + '_ {
        let cy = (self.rows / 2) as i64;
        let cx = (self.cols / 2) as i64;
        self.weights.iter().enumerate().map(move |(k, &w)| {
            let i = (k / self.cols) as i64;
            let j = (k % self.cols) as i64;
            (cx - j, cy - i, w)
        })
    }
}

/// How reads outside the image are resolved.
#[derive(Debug, Clone, Copy)]
enum Border {
    Padding(PaddingMode),
    Fill(Rgb<u8>),
}

/// Convolve `image` with `kernel`, remapping out-of-range reads under
/// `padding`.
///
/// # Errors
///
/// Returns [`Cancelled`] if `cancel` fires before the last output pixel.
pub fn convolve(
    image: &Raster,
    kernel: &Kernel,
    padding: PaddingMode,
    cancel: &CancelToken,
) -> Result<Raster, Cancelled> {
    run(image, &[kernel], Border::Padding(padding), cancel)
}

/// Convolve `image` with `kernel`, substituting `fill` for every
/// out-of-range read.
///
/// # Errors
///
/// Returns [`Cancelled`] if `cancel` fires before the last output pixel.
pub fn convolve_with_fill(
    image: &Raster,
    kernel: &Kernel,
    fill: Rgb<u8>,
    cancel: &CancelToken,
) -> Result<Raster, Cancelled> {
    run(image, &[kernel], Border::Fill(fill), cancel)
}

/// Convolve with two same-shaped kernels over the same window and
/// combine the responses per channel as `sqrt(gx² + gy²)`.
///
/// # Panics
///
/// Panics if the kernels differ in shape.
///
/// # Errors
///
/// Returns [`Cancelled`] if `cancel` fires before the last output pixel.
pub fn convolve_xy(
    image: &Raster,
    kernel_x: &Kernel,
    kernel_y: &Kernel,
    padding: PaddingMode,
    cancel: &CancelToken,
) -> Result<Raster, Cancelled> {
    assert!(
        kernel_x.rows == kernel_y.rows && kernel_x.cols == kernel_y.cols,
        "gradient kernels must share a shape: {}x{} vs {}x{}",
        kernel_x.rows,
        kernel_x.cols,
        kernel_y.rows,
        kernel_y.cols,
    );
    run(image, &[kernel_x, kernel_y], Border::Padding(padding), cancel)
}

fn run(
    image: &Raster,
    kernels: &[&Kernel],
    border: Border,
    cancel: &CancelToken,
) -> Result<Raster, Cancelled> {
    Ok(respond(image, kernels, border, cancel)?.into_raster(image))
}

/// Per-channel response of one kernel, or the Euclidean norm of several
/// same-shaped kernels, in the working layout of `image`.
pub(crate) fn convolve_planes(
    image: &Raster,
    kernels: &[&Kernel],
    padding: PaddingMode,
    cancel: &CancelToken,
) -> Result<Planes, Cancelled> {
    respond(image, kernels, Border::Padding(padding), cancel)
}

fn respond(
    image: &Raster,
    kernels: &[&Kernel],
    border: Border,
    cancel: &CancelToken,
) -> Result<Planes, Cancelled> {
    let channels = if image.is_grayscale() { 1 } else { 3 };
    let mut dst = Planes::zeroed(image.width(), image.height(), channels);
    let mut sums = vec![0.0_f64; kernels.len() * channels];

    for y in 0..image.height() {
        for x in 0..image.width() {
            cancel.check()?;
            sums.fill(0.0);
            for (kernel, acc) in kernels.iter().zip(sums.chunks_mut(channels)) {
                accumulate(image, kernel, border, x, y, acc);
            }
            let out = dst.pixel_mut(x, y);
            for (c, value) in out.iter_mut().enumerate() {
                let response = if kernels.len() == 1 {
                    sums[c]
                } else {
                    sums.iter()
                        .skip(c)
                        .step_by(channels)
                        .map(|s| s * s)
                        .sum::<f64>()
                        .sqrt()
                };
                *value = to_channel(response);
            }
        }
    }

    Ok(dst)
}

fn accumulate(image: &Raster, kernel: &Kernel, border: Border, x: u32, y: u32, acc: &mut [f64]) {
    for (dx, dy, w) in kernel.taps() {
        let (sx, sy) = (i64::from(x) + dx, i64::from(y) + dy);
        let color = match border {
            Border::Padding(mode) => sample(image, sx, sy, mode),
            Border::Fill(fill) => sample_or(image, sx, sy, fill),
        };
        if let [a] = acc {
            // Gray levels of in-frame gray pixels are the pixels themselves.
            *a += w * f64::from(gray_level(color));
        } else {
            for (a, &p) in acc.iter_mut().zip(&color.0) {
                *a += w * f64::from(p);
            }
        }
    }
}

/// Clamp to `[0, 255]` and truncate toward zero. NaN maps to 0.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_channel(value: f64) -> u8 {
    value.clamp(0.0, 255.0) as u8
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]
mod tests {
    use image::{GrayImage, Luma, RgbImage};

    use super::*;
    use crate::raster::{BLACK, BitOrder, MonoImage, WHITE};

    fn ramp() -> Raster {
        Raster::Gray(GrayImage::from_fn(6, 4, |x, y| Luma([(x * 30 + y) as u8])))
    }

    /// Reads the pixel one column to the right.
    fn shift_left() -> Kernel {
        Kernel::from_array([[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 0.0]])
    }

    #[test]
    fn identity_kernel_reproduces_every_layout() {
        let rgb = Raster::Rgb(RgbImage::from_fn(5, 3, |x, y| {
            Rgb([(x * 40) as u8, (y * 70) as u8, 200])
        }));
        let mono = Raster::Mono(MonoImage::from_fn(
            11,
            3,
            BitOrder::LsbFirst,
            [BLACK, WHITE],
            |x, y| (x * y) % 3 == 0,
        ));
        let cancel = CancelToken::new();
        for image in [ramp(), rgb, mono] {
            let out = convolve(&image, &Kernel::identity(), PaddingMode::Fixed, &cancel).unwrap();
            assert_eq!(out, image);
        }
    }

    #[test]
    fn even_dimensions_are_rejected() {
        assert!(matches!(
            Kernel::new(2, 3, vec![0.0; 6]),
            Err(PipelineError::InvalidKernel { rows: 2, cols: 3 })
        ));
        assert!(Kernel::new(3, 0, vec![]).is_err());
    }

    #[test]
    fn weight_count_must_match_shape() {
        assert!(Kernel::new(3, 3, vec![0.0; 8]).is_err());
        let kernel = Kernel::new(1, 3, vec![1.0, 2.0, 3.0]).unwrap();
        assert!((kernel.weight(0, 2) - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn kernel_is_applied_reversed() {
        let image = ramp();
        let out = convolve(&image, &shift_left(), PaddingMode::Fixed, &CancelToken::new()).unwrap();
        for y in 0..4 {
            for x in 0..5 {
                assert_eq!(out.gray_at(x, y), image.gray_at(x + 1, y), "at ({x}, {y})");
            }
            // Clamped read at the right edge.
            assert_eq!(out.gray_at(5, y), image.gray_at(5, y));
        }
    }

    #[test]
    fn periodic_padding_wraps_reads() {
        let image = ramp();
        let out = convolve(
            &image,
            &shift_left(),
            PaddingMode::Periodic,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(out.gray_at(5, 2), image.gray_at(0, 2));
    }

    #[test]
    fn fill_color_replaces_out_of_range_reads() {
        let image = ramp();
        let out = convolve_with_fill(
            &image,
            &shift_left(),
            Rgb([90, 90, 90]),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(out.gray_at(5, 1), 90);
        assert_eq!(out.gray_at(4, 1), image.gray_at(5, 1));
    }

    #[test]
    fn colored_fill_on_gray_image_uses_its_gray_level() {
        let image = ramp();
        let red = Rgb([255, 0, 0]);
        let out = convolve_with_fill(&image, &shift_left(), red, &CancelToken::new()).unwrap();
        assert_eq!(out.gray_at(5, 0), gray_level(red));
        assert_eq!(out.gray_at(5, 0), 87);
    }

    #[test]
    fn fill_on_rgb_image_keeps_channels() {
        let image = Raster::Rgb(RgbImage::from_pixel(4, 2, Rgb([10, 20, 30])));
        let fill = Rgb([200, 100, 50]);
        let out = convolve_with_fill(&image, &shift_left(), fill, &CancelToken::new()).unwrap();
        assert_eq!(out.rgb_at(3, 1), fill);
        assert_eq!(out.rgb_at(2, 1), Rgb([10, 20, 30]));
    }

    #[test]
    fn reflected_padding_mirrors_reads() {
        let image = ramp();
        let out = convolve(
            &image,
            &shift_left(),
            PaddingMode::Reflected,
            &CancelToken::new(),
        )
        .unwrap();
        // x = 6 mirrors onto column 5.
        assert_eq!(out.gray_at(5, 3), image.gray_at(5, 3));
    }

    #[test]
    fn sums_are_clamped() {
        let image = Raster::Gray(GrayImage::from_pixel(3, 3, Luma([200])));
        let cancel = CancelToken::new();
        let doubled = convolve(
            &image,
            &Kernel::from_array([[2.0]]),
            PaddingMode::Fixed,
            &cancel,
        )
        .unwrap();
        assert_eq!(doubled.gray_at(1, 1), 255);
        let negated = convolve(
            &image,
            &Kernel::from_array([[-1.0]]),
            PaddingMode::Fixed,
            &cancel,
        )
        .unwrap();
        assert_eq!(negated.gray_at(1, 1), 0);
    }

    #[test]
    fn exact_averaging_keeps_constant_image() {
        let image = Raster::Gray(GrayImage::from_pixel(4, 4, Luma([100])));
        let kernel = Kernel::from_array([[0.0, 0.0, 0.0], [0.5, 0.0, 0.5], [0.0, 0.0, 0.0]]);
        let out = convolve(&image, &kernel, PaddingMode::Reflected, &CancelToken::new()).unwrap();
        assert_eq!(out, image);
    }

    #[test]
    fn gradient_pair_combines_by_euclidean_norm() {
        let image = Raster::Gray(GrayImage::from_pixel(3, 3, Luma([30])));
        let out = convolve_xy(
            &image,
            &Kernel::from_array([[1.0]]),
            &Kernel::from_array([[1.0]]),
            PaddingMode::Fixed,
            &CancelToken::new(),
        )
        .unwrap();
        // sqrt(30² + 30²) = 42.43
        assert_eq!(out.gray_at(1, 1), 42);
    }

    #[test]
    #[should_panic(expected = "gradient kernels must share a shape")]
    fn gradient_pair_shapes_must_match() {
        let _ = convolve_xy(
            &ramp(),
            &Kernel::identity(),
            &shift_left(),
            PaddingMode::Fixed,
            &CancelToken::new(),
        );
    }

    #[test]
    fn cancelled_token_aborts() {
        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(
            convolve(&ramp(), &Kernel::identity(), PaddingMode::Fixed, &cancel),
            Err(Cancelled)
        );
    }

    #[test]
    fn normalized_kernel_sums_to_one() {
        let kernel = Kernel::square(2, |dx, dy| (dx.abs() + dy.abs() + 1) as f64).normalized();
        assert!((kernel.sum() - 1.0).abs() < 1e-12);
        assert_eq!(kernel.rows(), 5);
        assert_eq!(kernel.cols(), 5);
    }
}
