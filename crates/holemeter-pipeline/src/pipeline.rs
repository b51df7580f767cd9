//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::process`] which runs the entire pipeline in one call,
//! [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use holemeter_pipeline::{CancelToken, Pipeline, PipelineConfig, PipelineError, Raster};
//! # fn run(image: Raster) -> Result<(), PipelineError> {
//! let cancel = CancelToken::new();
//! let binarized = Pipeline::new(image, PipelineConfig::default())
//!     .filter(&cancel)?
//!     .binarize();
//! println!("threshold = {}", binarized.threshold());
//!
//! let staged = binarized
//!     .detect_edges(&cancel)?
//!     .fit_circle(&cancel)?
//!     .into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next pipeline state
//! (or `Result` for fallible stages), carrying all previously computed
//! intermediates. Stages that run long loops take a [`CancelToken`].
//!
//! # Memory
//!
//! Every stage from [`Binarized`] onward retains the source raster, the
//! filtered raster and the packed binary images until
//! [`Fitted::into_result`] consumes the final stage. Callers that only
//! need the circle should take [`StagedResult::circle`] and drop the
//! rest.

use crate::binarize::binarize;
use crate::cancel::CancelToken;
use crate::circle_fit::CircleData;
use crate::diagnostics::{StageMetrics, count_foreground};
use crate::filter::{self, FilterParams};
use crate::foreground::foreground_positions;
use crate::histogram::{Histogram, grayscale_histogram};
use crate::raster::{MonoImage, Raster};
use crate::types::{Dimensions, GridPoint, PipelineConfig, PipelineError, StagedResult};

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
#[must_use = "pipeline stages are consumed by advancing, call .filter() to continue"]
pub struct Pending {
    config: PipelineConfig,
    source: Raster,
}

impl Pending {
    /// The input image.
    #[must_use]
    pub const fn source(&self) -> &Raster {
        &self.source
    }

    /// Run the configured smoothing filter.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Cancelled`] if `cancel` fires mid-filter.
    pub fn filter(self, cancel: &CancelToken) -> Result<Filtered, PipelineError> {
        let params = FilterParams::from(&self.config);
        tracing::debug!(
            filter = params.kind.name(),
            radius = params.radius,
            "filtering"
        );
        let filtered = filter::apply(&self.source, &params, cancel)?;
        Ok(Filtered {
            config: self.config,
            source: self.source,
            filtered,
        })
    }
}

// ───────────────────────── Stage 1: Filtered ─────────────────────────

/// Pipeline state after smoothing.
#[must_use = "pipeline stages are consumed by advancing, call .binarize() to continue"]
pub struct Filtered {
    config: PipelineConfig,
    source: Raster,
    filtered: Raster,
}

impl Filtered {
    /// The smoothed image, in the input's layout.
    #[must_use]
    pub const fn filtered(&self) -> &Raster {
        &self.filtered
    }

    /// Build the histogram, select a threshold and binarize.
    pub fn binarize(self) -> Binarized {
        let histogram = grayscale_histogram(&self.filtered);
        let threshold = self.config.threshold.select(&histogram);
        tracing::debug!(
            method = self.config.threshold.name(),
            threshold,
            "binarizing"
        );
        let binary = binarize(&self.filtered, threshold);
        Binarized {
            config: self.config,
            source: self.source,
            filtered: self.filtered,
            histogram,
            threshold,
            binary,
        }
    }
}

// ───────────────────────── Stage 2: Binarized ────────────────────────

/// Pipeline state after thresholding.
#[must_use = "pipeline stages are consumed by advancing, call .detect_edges() to continue"]
pub struct Binarized {
    config: PipelineConfig,
    source: Raster,
    filtered: Raster,
    histogram: Histogram,
    threshold: u8,
    binary: MonoImage,
}

impl Binarized {
    /// Gray-level histogram of the filtered image.
    #[must_use]
    pub const fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    /// The selected threshold.
    #[must_use]
    pub const fn threshold(&self) -> u8 {
        self.threshold
    }

    /// The binary image.
    #[must_use]
    pub const fn binary(&self) -> &MonoImage {
        &self.binary
    }

    /// Run the edge operator on the binary image and collect the
    /// foreground pixels of the result.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoForeground`] if the edge mask is
    /// empty, or [`PipelineError::Cancelled`] if `cancel` fires.
    pub fn detect_edges(self, cancel: &CancelToken) -> Result<EdgesDetected, PipelineError> {
        let edges = self
            .config
            .edge_operator
            .apply_to_mask(&self.binary, cancel)?;
        let edge_points = foreground_positions(&edges);
        tracing::debug!(
            operator = self.config.edge_operator.name(),
            edge_points = edge_points.len(),
            "edges detected"
        );
        if edge_points.is_empty() {
            return Err(PipelineError::NoForeground);
        }
        Ok(EdgesDetected {
            config: self.config,
            source: self.source,
            filtered: self.filtered,
            histogram: self.histogram,
            threshold: self.threshold,
            binary: self.binary,
            edges,
            edge_points,
        })
    }
}

// ───────────────────────── Stage 3: EdgesDetected ────────────────────

/// Pipeline state after edge detection.
#[must_use = "pipeline stages are consumed by advancing, call .fit_circle() to continue"]
pub struct EdgesDetected {
    config: PipelineConfig,
    source: Raster,
    filtered: Raster,
    histogram: Histogram,
    threshold: u8,
    binary: MonoImage,
    edges: MonoImage,
    edge_points: Vec<GridPoint>,
}

impl EdgesDetected {
    /// The edge mask.
    #[must_use]
    pub const fn edges(&self) -> &MonoImage {
        &self.edges
    }

    /// Foreground pixels of the edge mask, row-major.
    #[must_use]
    pub fn edge_points(&self) -> &[GridPoint] {
        &self.edge_points
    }

    /// Fit a circle to the edge points through the configured
    /// correction.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Cancelled`] if `cancel` fires before
    /// any fit completes.
    pub fn fit_circle(self, cancel: &CancelToken) -> Result<Fitted, PipelineError> {
        let circle =
            self.config
                .correction
                .fit(self.config.circle_fit, &self.edge_points, cancel)?;
        tracing::debug!(
            fit = self.config.circle_fit.name(),
            correction = self.config.correction.name(),
            x = circle.center.x,
            y = circle.center.y,
            radius = circle.radius,
            "circle fitted"
        );
        Ok(Fitted {
            config: self.config,
            source: self.source,
            filtered: self.filtered,
            histogram: self.histogram,
            threshold: self.threshold,
            binary: self.binary,
            edges: self.edges,
            edge_points: self.edge_points,
            circle,
        })
    }
}

// ───────────────────────── Stage 4: Fitted ───────────────────────────

/// Pipeline state after circle fitting, the final stage.
#[must_use = "call .into_result() to extract the StagedResult"]
pub struct Fitted {
    config: PipelineConfig,
    source: Raster,
    filtered: Raster,
    histogram: Histogram,
    threshold: u8,
    binary: MonoImage,
    edges: MonoImage,
    edge_points: Vec<GridPoint>,
    circle: CircleData,
}

impl Fitted {
    /// The fitted circle.
    #[must_use]
    pub const fn circle(&self) -> &CircleData {
        &self.circle
    }

    /// Input image dimensions.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        self.source.dimensions()
    }

    /// Consume the pipeline and return the full [`StagedResult`].
    #[must_use]
    pub fn into_result(self) -> StagedResult {
        StagedResult {
            dimensions: self.source.dimensions(),
            filtered: self.filtered,
            histogram: self.histogram,
            threshold: self.threshold,
            binary: self.binary,
            edges: self.edges,
            edge_points: self.edge_points,
            circle: self.circle,
        }
    }
}

// ──────────────────────── PipelineStage trait ────────────────────────

/// Total number of stages in the pipeline.
pub const STAGE_COUNT: usize = 5;

/// Uniform metadata over the stages that have done work.
///
/// [`Pending`] is stage `0` and does not implement this trait.
pub trait PipelineStage {
    /// Human-readable name of this stage (e.g. `"filter"`).
    const NAME: &str;

    /// Zero-based index of this stage (`1` for Filtered through `4` for
    /// Fitted).
    const INDEX: usize;

    /// Metrics describing the work done to reach this stage.
    fn metrics(&self) -> StageMetrics;
}

impl PipelineStage for Filtered {
    const NAME: &str = "filter";
    const INDEX: usize = 1;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Filter {
            kind: self.config.filter.name().to_string(),
            radius: self.config.filter_radius,
            width: self.filtered.width(),
            height: self.filtered.height(),
        }
    }
}

impl PipelineStage for Binarized {
    const NAME: &str = "binarize";
    const INDEX: usize = 2;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Binarize {
            method: self.config.threshold.name().to_string(),
            threshold: self.threshold,
            occupied_levels: self.histogram.occupied_levels(),
            foreground_pixel_count: count_foreground(&self.binary),
            total_pixel_count: self.source.dimensions().pixel_count(),
        }
    }
}

impl PipelineStage for EdgesDetected {
    const NAME: &str = "edges";
    const INDEX: usize = 3;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::EdgeDetection {
            operator: self.config.edge_operator.name().to_string(),
            edge_point_count: self.edge_points.len(),
            total_pixel_count: self.source.dimensions().pixel_count(),
        }
    }
}

impl PipelineStage for Fitted {
    const NAME: &str = "circle";
    const INDEX: usize = 4;

    fn metrics(&self) -> StageMetrics {
        StageMetrics::CircleFit {
            fit: self.config.circle_fit.name().to_string(),
            correction: self.config.correction.name().to_string(),
            input_point_count: self.edge_points.len(),
            circle: self.circle,
        }
    }
}

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental measurement pipeline.
///
/// Created via [`Pipeline::new`], which stores the image and config
/// without doing any processing. Each stage method consumes the current
/// state and returns the next, making it a compile-time error to skip
/// stages or call them out of order.
pub struct Pipeline;

impl Pipeline {
    /// Create a new pipeline from an input image and config.
    ///
    /// The config is not validated here; [`crate::process`] validates
    /// before running.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(image: Raster, config: PipelineConfig) -> Pending {
        Pending {
            config,
            source: image,
        }
    }
}
