//! Shared types for the holemeter measurement pipeline.

use serde::{Deserialize, Serialize};

use crate::blur::default_sigma;
use crate::cancel::Cancelled;
use crate::circle_fit::{CircleData, CircleFitKind};
use crate::correction::CorrectionKind;
use crate::edge::EdgeOperator;
use crate::filter::FilterKind;
use crate::histogram::Histogram;
use crate::padding::PaddingMode;
use crate::raster::{MonoImage, Raster};
use crate::threshold::ThresholdMethod;

/// Re-export `GrayImage` so downstream crates can build inputs without
/// depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` for the same reason.
pub use image::RgbImage;

/// A 2D point in continuous image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

/// An integer pixel position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GridPoint {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
}

impl GridPoint {
    /// Create a new grid point.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl From<GridPoint> for Point {
    fn from(p: GridPoint) -> Self {
        Self::new(f64::from(p.x), f64::from(p.y))
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Total pixel count.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Configuration for the measurement pipeline.
///
/// All parameters have defaults matching the usual inspection setup:
/// light Gaussian smoothing, Otsu thresholding, Sobel edges, and a
/// hyper fit guarded by median-error outlier rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Which smoothing filter runs first.
    pub filter: FilterKind,

    /// Filter window radius; the window is `(2r + 1)²` pixels.
    pub filter_radius: u32,

    /// Gaussian standard deviation. `None` means `filter_radius / 2`.
    pub gaussian_sigma: Option<f64>,

    /// Boundary policy for the convolution-based filters.
    pub padding: PaddingMode,

    /// Mean-shift normalized gray-distance cutoff, in `[0, 1]`.
    pub mean_shift_color_radius: f64,

    /// Number of mean-shift passes.
    pub mean_shift_levels: u32,

    /// How the binarization threshold is chosen.
    pub threshold: ThresholdMethod,

    /// Edge operator applied to the binary image.
    pub edge_operator: EdgeOperator,

    /// Estimator fitting a circle to the edge pixels.
    pub circle_fit: CircleFitKind,

    /// Outlier rejection wrapped around the circle fit.
    pub correction: CorrectionKind,
}

impl PipelineConfig {
    /// Default filter kind.
    pub const DEFAULT_FILTER: FilterKind = FilterKind::Gaussian;
    /// Default filter radius.
    pub const DEFAULT_FILTER_RADIUS: u32 = 2;
    /// Default padding mode.
    pub const DEFAULT_PADDING: PaddingMode = PaddingMode::Fixed;
    /// Default mean-shift color radius.
    pub const DEFAULT_MEAN_SHIFT_COLOR_RADIUS: f64 = 0.1;
    /// Default number of mean-shift passes.
    pub const DEFAULT_MEAN_SHIFT_LEVELS: u32 = 3;
    /// Default thresholding method.
    pub const DEFAULT_THRESHOLD: ThresholdMethod = ThresholdMethod::Cluster;
    /// Default edge operator.
    pub const DEFAULT_EDGE_OPERATOR: EdgeOperator = EdgeOperator::Sobel;
    /// Default circle fit.
    pub const DEFAULT_CIRCLE_FIT: CircleFitKind = CircleFitKind::HyperAlgebraic;
    /// Default outlier correction.
    pub const DEFAULT_CORRECTION: CorrectionKind = CorrectionKind::MedianError;

    /// Check parameter ranges.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] when the p-tile fraction
    /// is outside `[0, 1)`, the mean-shift color radius is outside
    /// `[0, 1]`, or the Gaussian sigma is not finite.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if let ThresholdMethod::PTile(p) = self.threshold
            && !(0.0..1.0).contains(&p)
        {
            return Err(PipelineError::InvalidConfig(format!(
                "p-tile fraction {p} is outside [0, 1)"
            )));
        }
        if !(0.0..=1.0).contains(&self.mean_shift_color_radius) {
            return Err(PipelineError::InvalidConfig(format!(
                "mean-shift color radius {} is outside [0, 1]",
                self.mean_shift_color_radius
            )));
        }
        if let Some(sigma) = self.gaussian_sigma
            && !sigma.is_finite()
        {
            return Err(PipelineError::InvalidConfig(format!(
                "gaussian sigma {sigma} is not finite"
            )));
        }
        Ok(())
    }

    /// Effective Gaussian sigma: the configured value or `radius / 2`.
    #[must_use]
    pub fn effective_sigma(&self) -> f64 {
        self.gaussian_sigma
            .unwrap_or_else(|| default_sigma(self.filter_radius))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filter: Self::DEFAULT_FILTER,
            filter_radius: Self::DEFAULT_FILTER_RADIUS,
            gaussian_sigma: None,
            padding: Self::DEFAULT_PADDING,
            mean_shift_color_radius: Self::DEFAULT_MEAN_SHIFT_COLOR_RADIUS,
            mean_shift_levels: Self::DEFAULT_MEAN_SHIFT_LEVELS,
            threshold: Self::DEFAULT_THRESHOLD,
            edge_operator: Self::DEFAULT_EDGE_OPERATOR,
            circle_fit: Self::DEFAULT_CIRCLE_FIT,
            correction: Self::DEFAULT_CORRECTION,
        }
    }
}

/// Errors that can occur during pipeline processing.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A kernel was built with an even dimension or mismatched weights.
    #[error("invalid kernel: {rows}x{cols} (both dimensions must be odd and match the weights)")]
    InvalidKernel {
        /// Requested row count.
        rows: usize,
        /// Requested column count.
        cols: usize,
    },

    /// A configuration parameter is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Edge detection left no foreground pixels to fit.
    #[error("edge image contains no foreground pixels")]
    NoForeground,

    /// The caller cancelled the run.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Every intermediate of a pipeline run.
#[derive(Debug, Clone)]
pub struct StagedResult {
    /// Smoothed image (same layout as the input).
    pub filtered: Raster,
    /// Gray-level histogram of the smoothed image.
    pub histogram: Histogram,
    /// Selected binarization threshold.
    pub threshold: u8,
    /// Binarized image (foreground = gray above threshold).
    pub binary: MonoImage,
    /// Edge mask produced from the binary image.
    pub edges: MonoImage,
    /// Foreground pixels of the edge mask.
    pub edge_points: Vec<GridPoint>,
    /// Fitted circle after outlier correction.
    pub circle: CircleData,
    /// Dimensions of the input image.
    pub dimensions: Dimensions,
}
