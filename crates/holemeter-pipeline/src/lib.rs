//! holemeter-pipeline: Pure circle measurement pipeline (sans-IO).
//!
//! Measures a circular feature in an inspection image through:
//! smoothing filter -> histogram threshold -> binarization ->
//! edge operator -> foreground extraction -> circle fit with outlier
//! correction.
//!
//! This crate has **no I/O dependencies**: it operates on in-memory
//! rasters and returns structured data. Decoding files, timing, and
//! logging setup live in `holemeter-bench`.
//!
//! Every stage is also usable on its own; the building blocks are
//! exposed module by module.

pub mod binarize;
pub mod blur;
pub mod cancel;
pub mod circle_fit;
pub mod convolve;
pub mod correction;
pub mod diagnostics;
pub mod edge;
pub mod filter;
pub mod foreground;
pub mod histogram;
pub mod mean_shift;
pub mod median;
pub mod overlay;
pub mod padding;
pub mod pipeline;
pub mod raster;
pub mod threshold;
pub mod types;

pub use cancel::{CancelToken, Cancelled};
pub use circle_fit::{CircleData, CircleFitKind, FitFunction};
pub use correction::CorrectionKind;
pub use edge::EdgeOperator;
pub use filter::FilterKind;
pub use histogram::Histogram;
pub use median::MedianStrategy;
pub use overlay::{circle_label, render_overlay};
pub use padding::PaddingMode;
pub use pipeline::Pipeline;
pub use raster::{BitOrder, MonoImage, Raster};
pub use threshold::ThresholdMethod;
pub use types::{
    Dimensions, GridPoint, PipelineConfig, PipelineError, Point, StagedResult,
};

/// Run the full measurement pipeline.
///
/// Validates `config`, then runs every stage of [`Pipeline`] and
/// returns a [`StagedResult`] holding the circle and all intermediates.
///
/// # Pipeline steps
///
/// 1. Smoothing filter ([`PipelineConfig::filter`])
/// 2. Gray-level histogram and threshold selection
/// 3. Binarization (foreground = gray above threshold)
/// 4. Edge operator on the binary image
/// 5. Foreground pixel extraction from the edge mask
/// 6. Circle fit wrapped in outlier correction
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `config` is out of range.
/// Returns [`PipelineError::NoForeground`] if the edge mask is empty.
/// Returns [`PipelineError::Cancelled`] if `cancel` fires mid-run.
pub fn process(
    image: &Raster,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<StagedResult, PipelineError> {
    config.validate()?;
    Ok(Pipeline::new(image.clone(), config.clone())
        .filter(cancel)?
        .binarize()
        .detect_edges(cancel)?
        .fit_circle(cancel)?
        .into_result())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{GrayImage, Luma, RgbImage};

    use super::*;

    /// Dark hole of radius 12 centered at (30, 26) on a bright plate.
    fn hole() -> GrayImage {
        GrayImage::from_fn(60, 52, |x, y| {
            let d = (f64::from(x) - 30.0).hypot(f64::from(y) - 26.0);
            Luma([if d <= 12.0 { 15 } else { 235 }])
        })
    }

    #[test]
    fn process_finds_the_hole() {
        let result = process(
            &Raster::Gray(hole()),
            &PipelineConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();
        let c = result.circle;
        assert!((c.center.x - 30.0).abs() < 1.0, "center {:?}", c.center);
        assert!((c.center.y - 26.0).abs() < 1.0, "center {:?}", c.center);
        assert!((c.radius - 12.0).abs() < 1.5, "radius {}", c.radius);
        assert_eq!(
            result.dimensions,
            Dimensions {
                width: 60,
                height: 52
            }
        );
    }

    #[test]
    fn process_rejects_invalid_config() {
        let config = PipelineConfig {
            gaussian_sigma: Some(f64::INFINITY),
            ..PipelineConfig::default()
        };
        let result = process(&Raster::Gray(hole()), &config, &CancelToken::new());
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn process_uniform_image_returns_no_foreground() {
        let image = Raster::Gray(GrayImage::from_pixel(20, 20, Luma([128])));
        let result = process(&image, &PipelineConfig::default(), &CancelToken::new());
        assert!(matches!(result, Err(PipelineError::NoForeground)));
    }

    #[test]
    fn process_accepts_rgb_input() {
        let gray_image = hole();
        let rgb = RgbImage::from_fn(60, 52, |x, y| {
            let v = gray_image.get_pixel(x, y).0[0];
            image::Rgb([v, v, v])
        });
        let gray = process(
            &Raster::Gray(hole()),
            &PipelineConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();
        let color = process(
            &Raster::Rgb(rgb),
            &PipelineConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(gray.threshold, color.threshold);
        assert_eq!(gray.edge_points, color.edge_points);
    }

    #[test]
    fn process_honors_cancellation() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = process(&Raster::Gray(hole()), &PipelineConfig::default(), &cancel);
        assert!(matches!(result, Err(PipelineError::Cancelled(_))));
    }
}
