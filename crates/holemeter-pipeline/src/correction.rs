//! Outlier rejection wrapped around a circle fit.
//!
//! Edge images of real parts carry debris, scratches and partial
//! neighbors alongside the hole rim. The strategies here take any fit
//! function and a point set and return a circle estimated from the
//! inliers:
//!
//! - [`median_error_correction`] repeatedly drops points whose distance
//!   to the current circle is at or above the median distance.
//! - [`connectivity_based_correction`] splits the points into 8-connected
//!   components and keeps the largest component that also fits a circle
//!   better than every earlier accepted one.
//!
//! Both poll a [`CancelToken`]; on cancellation they return the best fit
//! computed so far, or [`Cancelled`] if there is none yet.

use petgraph::unionfind::UnionFind;
use rstar::RTree;
use rstar::primitives::GeomWithData;
use serde::{Deserialize, Serialize};

use crate::cancel::{CancelToken, Cancelled};
use crate::circle_fit::{CircleData, CircleFitKind, geometric_error};
use crate::types::GridPoint;

/// Iteration cap for [`median_error_correction`].
pub const MEDIAN_MAX_ITERATIONS: usize = 99;

/// Median geometric error (pixels) below which a fit is accepted.
pub const MEDIAN_ACCEPT_ERROR: f64 = 4.5;

/// Squared Euclidean radius covering the 8-neighborhood of a pixel.
const NEIGHBOR_RADIUS_SQ: i64 = 2;

/// Fit every point as-is.
#[must_use]
pub fn no_correction(fit: impl Fn(&[GridPoint]) -> CircleData, points: &[GridPoint]) -> CircleData {
    fit(points)
}

/// Iteratively discard points whose error is not below the median.
///
/// Stops when the median error drops under [`MEDIAN_ACCEPT_ERROR`], when
/// the median stops changing, or after [`MEDIAN_MAX_ITERATIONS`] rounds;
/// the last two log a warning and return the latest fit.
///
/// # Errors
///
/// Returns [`Cancelled`] if `cancel` fires before the first fit.
pub fn median_error_correction(
    fit: impl Fn(&[GridPoint]) -> CircleData,
    points: &[GridPoint],
    cancel: &CancelToken,
) -> Result<CircleData, Cancelled> {
    trim_by_median_error(|p| Ok(fit(p)), points, cancel)
}

fn trim_by_median_error(
    fit: impl Fn(&[GridPoint]) -> Result<CircleData, Cancelled>,
    points: &[GridPoint],
    cancel: &CancelToken,
) -> Result<CircleData, Cancelled> {
    let mut inliers = points.to_vec();
    let mut latest: Option<CircleData> = None;
    let mut previous_median: Option<f64> = None;

    for iteration in 0..MEDIAN_MAX_ITERATIONS {
        if cancel.check().is_err() {
            return latest.ok_or(Cancelled);
        }
        let Ok(circle) = fit(&inliers) else {
            return latest.ok_or(Cancelled);
        };
        latest = Some(circle);

        let errors: Vec<f64> = inliers.iter().map(|&p| geometric_error(p, &circle)).collect();
        let Some(median) = median_of(&errors) else {
            return Ok(circle);
        };
        tracing::debug!(iteration, median, inliers = inliers.len(), "median error");

        if median < MEDIAN_ACCEPT_ERROR {
            return Ok(circle);
        }
        #[allow(clippy::float_cmp)]
        if previous_median == Some(median) {
            tracing::warn!(iteration, median, "median error stopped changing");
            return Ok(circle);
        }
        previous_median = Some(median);

        let kept: Vec<GridPoint> = inliers
            .iter()
            .zip(&errors)
            .filter(|&(_, &e)| e < median)
            .map(|(&p, _)| p)
            .collect();
        if kept.is_empty() {
            tracing::warn!(iteration, median, "no point below the median error");
            return Ok(circle);
        }
        inliers = kept;
    }

    tracing::warn!(
        iterations = MEDIAN_MAX_ITERATIONS,
        "median error correction hit the iteration cap"
    );
    latest.map_or_else(|| fit(points), Ok)
}

/// Element of rank `len / 2` in ascending order.
fn median_of(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    let rank = sorted.len() / 2;
    let (_, median, _) = sorted.select_nth_unstable_by(rank, f64::total_cmp);
    Some(*median)
}

/// Fit the best 8-connected component.
///
/// Components are visited in order of their first point in `points`. A
/// component is accepted when it is strictly larger than the last
/// accepted one and its residual (largest geometric error divided by the
/// fitted radius) is strictly smaller. With no accepted component the
/// whole set is fitted and a warning logged.
///
/// # Errors
///
/// Returns [`Cancelled`] if `cancel` fires before any component is
/// accepted.
pub fn connectivity_based_correction(
    fit: impl Fn(&[GridPoint]) -> CircleData,
    points: &[GridPoint],
    cancel: &CancelToken,
) -> Result<CircleData, Cancelled> {
    best_component(|p| Ok(fit(p)), points, cancel)
}

fn best_component(
    fit: impl Fn(&[GridPoint]) -> Result<CircleData, Cancelled>,
    points: &[GridPoint],
    cancel: &CancelToken,
) -> Result<CircleData, Cancelled> {
    let components = connected_components(points);
    tracing::debug!(components = components.len(), "connectivity components");

    let mut best: Option<CircleData> = None;
    let mut best_size = 0;
    let mut best_residual = f64::INFINITY;
    for component in &components {
        if cancel.check().is_err() {
            return best.ok_or(Cancelled);
        }
        let Ok(circle) = fit(component) else {
            return best.ok_or(Cancelled);
        };
        let residual = component
            .iter()
            .map(|&p| geometric_error(p, &circle))
            .fold(0.0, f64::max)
            / circle.radius;
        if component.len() > best_size && residual < best_residual {
            best = Some(circle);
            best_size = component.len();
            best_residual = residual;
        }
    }

    best.map_or_else(
        || {
            tracing::warn!("no connected component fits a circle, fitting all points");
            fit(points)
        },
        Ok,
    )
}

/// Partition `points` into 8-connected groups, ordered by each group's
/// first member in `points`.
fn connected_components(points: &[GridPoint]) -> Vec<Vec<GridPoint>> {
    let tree = RTree::bulk_load(
        points
            .iter()
            .enumerate()
            .map(|(i, p)| GeomWithData::new([i64::from(p.x), i64::from(p.y)], i))
            .collect::<Vec<_>>(),
    );

    let mut uf = UnionFind::<usize>::new(points.len());
    for (i, p) in points.iter().enumerate() {
        let query = [i64::from(p.x), i64::from(p.y)];
        for neighbor in tree.locate_within_distance(query, NEIGHBOR_RADIUS_SQ) {
            uf.union(i, neighbor.data);
        }
    }

    let mut slot_of_root: Vec<Option<usize>> = vec![None; points.len()];
    let mut components: Vec<Vec<GridPoint>> = Vec::new();
    for (i, &p) in points.iter().enumerate() {
        let root = uf.find_mut(i);
        let slot = *slot_of_root[root].get_or_insert_with(|| {
            components.push(Vec::new());
            components.len() - 1
        });
        components[slot].push(p);
    }
    components
}

/// Outlier correction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CorrectionKind {
    /// Fit all points.
    None,
    /// Iterative median-error trimming.
    #[default]
    MedianError,
    /// Best 8-connected component.
    Connectivity,
}

impl CorrectionKind {
    /// Run this strategy around `fit`.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] under the conditions of the chosen strategy.
    pub fn apply(
        self,
        fit: impl Fn(&[GridPoint]) -> CircleData,
        points: &[GridPoint],
        cancel: &CancelToken,
    ) -> Result<CircleData, Cancelled> {
        match self {
            Self::None => Ok(no_correction(fit, points)),
            Self::MedianError => median_error_correction(fit, points, cancel),
            Self::Connectivity => connectivity_based_correction(fit, points, cancel),
        }
    }

    /// Run this strategy around `estimator`, handing `cancel` to the
    /// estimator as well so its own iterations can stop early.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if `cancel` fires before any fit completes.
    pub fn fit(
        self,
        estimator: CircleFitKind,
        points: &[GridPoint],
        cancel: &CancelToken,
    ) -> Result<CircleData, Cancelled> {
        let fit = |p: &[GridPoint]| estimator.fit_with_cancel(p, cancel);
        match self {
            Self::None => fit(points),
            Self::MedianError => trim_by_median_error(fit, points, cancel),
            Self::Connectivity => best_component(fit, points, cancel),
        }
    }

    /// Short lowercase name for reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::MedianError => "median-error",
            Self::Connectivity => "connectivity",
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
mod tests {
    use std::cell::Cell;
    use std::f64::consts::TAU;

    use super::*;
    use crate::circle_fit::{hyper_algebraic_circle_fit, naive_circle_fit};
    use crate::types::Point;

    /// `n` integer-rounded points on `(cx, cy, r)`, consecutive
    /// duplicates removed.
    fn ring(cx: f64, cy: f64, r: f64, n: usize) -> Vec<GridPoint> {
        let mut out: Vec<GridPoint> = Vec::new();
        for k in 0..n {
            let angle = TAU * k as f64 / n as f64;
            let p = GridPoint::new(
                r.mul_add(angle.cos(), cx).round() as u32,
                r.mul_add(angle.sin(), cy).round() as u32,
            );
            if !out.contains(&p) {
                out.push(p);
            }
        }
        out
    }

    fn center_error(circle: &CircleData, cx: f64, cy: f64) -> f64 {
        circle.center.distance(Point::new(cx, cy))
    }

    #[test]
    fn median_error_beats_no_correction_with_far_outliers() {
        let mut points = ring(50.0, 50.0, 20.0, 20);
        points.extend((0..5).map(|k| GridPoint::new(300, 44 + k * 3)));

        let plain = no_correction(naive_circle_fit, &points);
        let corrected =
            median_error_correction(naive_circle_fit, &points, &CancelToken::new()).unwrap();

        assert!(
            center_error(&corrected, 50.0, 50.0) < center_error(&plain, 50.0, 50.0),
            "center: corrected {corrected:?} vs plain {plain:?}"
        );
        assert!(
            (corrected.radius - 20.0).abs() < (plain.radius - 20.0).abs(),
            "radius: corrected {corrected:?} vs plain {plain:?}"
        );
    }

    #[test]
    fn median_error_accepts_clean_fit_immediately() {
        let points = ring(40.0, 40.0, 15.0, 60);
        let corrected =
            median_error_correction(hyper_algebraic_circle_fit, &points, &CancelToken::new())
                .unwrap();
        assert_eq!(corrected, hyper_algebraic_circle_fit(&points));
    }

    #[test]
    fn connectivity_picks_the_dense_ring() {
        let ring_points = ring(60.0, 60.0, 25.0, 400);
        let mut points = vec![
            GridPoint::new(5, 5),
            GridPoint::new(110, 8),
            GridPoint::new(9, 115),
            GridPoint::new(112, 113),
        ];
        points.extend(&ring_points);
        points.push(GridPoint::new(60, 2));

        let corrected = connectivity_based_correction(
            hyper_algebraic_circle_fit,
            &points,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(corrected, hyper_algebraic_circle_fit(&ring_points));
        assert!(center_error(&corrected, 60.0, 60.0) < 1.0);
    }

    #[test]
    fn connectivity_without_candidates_fits_everything() {
        // Isolated single points fit with radius 0, so no residual is
        // finite and nothing is accepted.
        let points = [
            GridPoint::new(0, 0),
            GridPoint::new(10, 0),
            GridPoint::new(0, 10),
        ];
        let corrected =
            connectivity_based_correction(naive_circle_fit, &points, &CancelToken::new())
                .unwrap();
        assert_eq!(corrected, naive_circle_fit(&points));
    }

    #[test]
    fn components_follow_first_occurrence_order() {
        let points = [
            GridPoint::new(10, 10),
            GridPoint::new(0, 0),
            GridPoint::new(11, 11),
            GridPoint::new(1, 0),
            GridPoint::new(12, 10),
        ];
        let components = connected_components(&points);
        assert_eq!(
            components,
            vec![
                vec![
                    GridPoint::new(10, 10),
                    GridPoint::new(11, 11),
                    GridPoint::new(12, 10)
                ],
                vec![GridPoint::new(0, 0), GridPoint::new(1, 0)],
            ]
        );
    }

    #[test]
    fn pixels_two_apart_are_not_connected() {
        let points = [GridPoint::new(0, 0), GridPoint::new(2, 0), GridPoint::new(2, 2)];
        assert_eq!(connected_components(&points).len(), 3);
    }

    #[test]
    fn cancelled_before_first_fit_is_an_error() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let points = ring(40.0, 40.0, 15.0, 60);
        assert_eq!(
            median_error_correction(naive_circle_fit, &points, &cancel),
            Err(Cancelled)
        );
        assert_eq!(
            connectivity_based_correction(naive_circle_fit, &points, &cancel),
            Err(Cancelled)
        );
    }

    #[test]
    fn median_error_cancelled_mid_run_keeps_first_fit() {
        let mut points = ring(50.0, 50.0, 20.0, 20);
        points.extend((0..5).map(|k| GridPoint::new(300, 44 + k * 3)));
        let cancel = CancelToken::new();
        let calls = Cell::new(0);
        let fit = |p: &[GridPoint]| {
            calls.set(calls.get() + 1);
            cancel.cancel();
            naive_circle_fit(p)
        };
        let circle = median_error_correction(fit, &points, &cancel).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(circle, naive_circle_fit(&points));
    }

    #[test]
    fn connectivity_cancelled_mid_run_keeps_accepted_component() {
        let ring_points = ring(60.0, 60.0, 25.0, 400);
        let mut points = ring_points.clone();
        points.extend([GridPoint::new(5, 5), GridPoint::new(110, 8)]);
        let cancel = CancelToken::new();
        let calls = Cell::new(0);
        let fit = |p: &[GridPoint]| {
            calls.set(calls.get() + 1);
            cancel.cancel();
            hyper_algebraic_circle_fit(p)
        };
        let circle = connectivity_based_correction(fit, &points, &cancel).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(circle, hyper_algebraic_circle_fit(&ring_points));
    }

    #[test]
    fn estimator_sees_the_cancel_token() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let points = ring(40.0, 40.0, 15.0, 400);
        assert_eq!(
            CorrectionKind::None.fit(CircleFitKind::HyperAlgebraic, &points, &cancel),
            Err(Cancelled)
        );
        assert_eq!(
            CorrectionKind::None.fit(CircleFitKind::Naive, &points, &cancel),
            Ok(naive_circle_fit(&points))
        );
    }

    #[test]
    fn estimator_dispatch_matches_function_pointer() {
        let mut points = ring(60.0, 60.0, 25.0, 400);
        points.push(GridPoint::new(5, 5));
        let cancel = CancelToken::new();
        for kind in [
            CorrectionKind::None,
            CorrectionKind::MedianError,
            CorrectionKind::Connectivity,
        ] {
            assert_eq!(
                kind.fit(CircleFitKind::HyperAlgebraic, &points, &cancel),
                kind.apply(hyper_algebraic_circle_fit, &points, &cancel),
                "{}",
                kind.name()
            );
        }
    }

    #[test]
    fn kind_dispatches() {
        let points = ring(40.0, 40.0, 15.0, 400);
        let cancel = CancelToken::new();
        assert_eq!(
            CorrectionKind::None
                .apply(naive_circle_fit, &points, &cancel)
                .unwrap(),
            naive_circle_fit(&points)
        );
        for kind in [CorrectionKind::MedianError, CorrectionKind::Connectivity] {
            let circle = kind.apply(hyper_algebraic_circle_fit, &points, &cancel).unwrap();
            assert!(center_error(&circle, 40.0, 40.0) < 1.0, "{}", kind.name());
        }
    }
}
