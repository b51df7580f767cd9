//! Smoothing filter selection.

use serde::{Deserialize, Serialize};

use crate::blur::{box_filter, gaussian_filter};
use crate::cancel::{CancelToken, Cancelled};
use crate::mean_shift::mean_shift_filter;
use crate::median::median_filter;
use crate::padding::PaddingMode;
use crate::raster::Raster;
use crate::types::PipelineConfig;

/// Which smoothing filter to apply before thresholding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterKind {
    /// Uniform window average.
    Box,
    /// Gaussian-weighted window average.
    #[default]
    Gaussian,
    /// Window median (edge preserving, removes impulse noise).
    Median,
    /// Iterative gray-range-limited mean.
    MeanShift,
}

impl FilterKind {
    /// Short lowercase name for reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Box => "box",
            Self::Gaussian => "gaussian",
            Self::Median => "median",
            Self::MeanShift => "mean-shift",
        }
    }
}

/// Parameters consumed by [`apply`]. Each filter reads the fields it
/// needs and ignores the rest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParams {
    /// Filter to run.
    pub kind: FilterKind,
    /// Window radius.
    pub radius: u32,
    /// Gaussian sigma; `None` means `radius / 2`.
    pub sigma: Option<f64>,
    /// Border policy for the convolution filters.
    pub padding: PaddingMode,
    /// Mean-shift gray cutoff in `[0, 1]`.
    pub color_radius: f64,
    /// Mean-shift pass count.
    pub levels: u32,
}

impl From<&PipelineConfig> for FilterParams {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            kind: config.filter,
            radius: config.filter_radius,
            sigma: Some(config.effective_sigma()),
            padding: config.padding,
            color_radius: config.mean_shift_color_radius,
            levels: config.mean_shift_levels,
        }
    }
}

/// Run the filter selected by `params.kind`.
///
/// # Errors
///
/// Returns [`Cancelled`] if `cancel` fires mid-run.
pub fn apply(
    image: &Raster,
    params: &FilterParams,
    cancel: &CancelToken,
) -> Result<Raster, Cancelled> {
    match params.kind {
        FilterKind::Box => box_filter(image, params.radius, params.padding, cancel),
        FilterKind::Gaussian => {
            gaussian_filter(image, params.radius, params.sigma, params.padding, cancel)
        }
        FilterKind::Median => median_filter(image, params.radius, cancel),
        FilterKind::MeanShift => mean_shift_filter(
            image,
            params.radius,
            params.color_radius,
            params.levels,
            cancel,
        ),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{GrayImage, Luma};

    use super::*;

    fn impulse() -> Raster {
        let mut gray = GrayImage::from_pixel(9, 9, Luma([50]));
        gray.put_pixel(4, 4, Luma([250]));
        Raster::Gray(gray)
    }

    #[test]
    fn every_kind_preserves_dimensions() {
        let image = impulse();
        let cancel = CancelToken::new();
        for kind in [
            FilterKind::Box,
            FilterKind::Gaussian,
            FilterKind::Median,
            FilterKind::MeanShift,
        ] {
            let params = FilterParams {
                kind,
                ..FilterParams::from(&PipelineConfig::default())
            };
            let out = apply(&image, &params, &cancel).unwrap();
            assert_eq!(out.dimensions(), image.dimensions(), "{}", kind.name());
        }
    }

    #[test]
    fn median_dispatch_removes_impulse() {
        let params = FilterParams {
            kind: FilterKind::Median,
            radius: 1,
            ..FilterParams::from(&PipelineConfig::default())
        };
        let out = apply(&impulse(), &params, &CancelToken::new()).unwrap();
        assert_eq!(out.gray_at(4, 4), 50);
    }

    #[test]
    fn params_follow_config() {
        let config = PipelineConfig {
            filter: FilterKind::MeanShift,
            filter_radius: 5,
            mean_shift_levels: 7,
            ..PipelineConfig::default()
        };
        let params = FilterParams::from(&config);
        assert_eq!(params.kind, FilterKind::MeanShift);
        assert_eq!(params.radius, 5);
        assert_eq!(params.levels, 7);
        assert_eq!(params.sigma, Some(2.5));
    }

    #[test]
    fn unset_sigma_matches_gaussian_default() {
        let image = impulse();
        let cancel = CancelToken::new();
        let config = PipelineConfig {
            filter: FilterKind::Gaussian,
            filter_radius: 3,
            gaussian_sigma: None,
            ..PipelineConfig::default()
        };
        let via_config = apply(&image, &FilterParams::from(&config), &cancel).unwrap();
        let direct = gaussian_filter(&image, 3, None, config.padding, &cancel).unwrap();
        assert_eq!(via_config, direct);
    }
}
