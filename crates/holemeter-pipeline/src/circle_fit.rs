//! Circle estimation from edge pixels.
//!
//! Three estimators share the signature `&[GridPoint] -> CircleData`:
//!
//! - [`naive_circle_fit`]: centroid plus RMS distance. Cheap and always
//!   defined, and the fallback for the other two.
//! - [`simple_algebraic_circle_fit`]: linear least squares on the
//!   algebraic distance `x² + y² + a x + b y + c`.
//! - [`hyper_algebraic_circle_fit`]: Chernov's Hyper fit, an algebraic
//!   fit whose constraint removes the essential bias of the simple fit.
//!
//! All arithmetic is `f64`. Degenerate inputs (fewer than three points,
//! collinear points) fall back to the naive fit and log a warning.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::cancel::{CancelToken, Cancelled};
use crate::types::{GridPoint, Point};

/// Radius tolerance used by [`CircleData`]'s equality.
pub const RADIUS_TOLERANCE: f64 = 1e-9;

/// Newton step cap for the Hyper fit's characteristic polynomial.
pub const HYPER_MAX_ITERATIONS: usize = 99;

/// Relative size below which the centered scatter determinant
/// `Sxx Syy - Sxy²` counts as zero against `(Sxx + Syy)²`.
pub const COLLINEAR_TOLERANCE: f64 = 1e-10;

/// Whether the centered second moments describe a point set with no
/// spread across some direction (a line or a single point).
fn is_collinear(xx: f64, yy: f64, xy: f64) -> bool {
    let trace = xx + yy;
    xx.mul_add(yy, -xy * xy) <= COLLINEAR_TOLERANCE * trace * trace
}

/// A fitted circle.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CircleData {
    /// Center in pixel coordinates.
    pub center: Point,
    /// Radius in pixels.
    pub radius: f64,
}

impl CircleData {
    /// Create a circle.
    #[must_use]
    pub const fn new(center: Point, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Whether the center and radius are all finite.
    #[must_use]
    pub const fn is_finite(&self) -> bool {
        self.center.x.is_finite() && self.center.y.is_finite() && self.radius.is_finite()
    }
}

/// Centers compare exactly; radii within [`RADIUS_TOLERANCE`].
impl PartialEq for CircleData {
    fn eq(&self, other: &Self) -> bool {
        self.center == other.center && (self.radius - other.radius).abs() <= RADIUS_TOLERANCE
    }
}

/// Pure point-set to circle estimator.
pub type FitFunction = fn(&[GridPoint]) -> CircleData;

/// Distance from `point` to the nearest point on `circle`.
#[must_use]
pub fn geometric_error(point: GridPoint, circle: &CircleData) -> f64 {
    (Point::from(point).distance(circle.center) - circle.radius).abs()
}

#[allow(clippy::cast_precision_loss)]
fn centroid(points: &[GridPoint]) -> Point {
    let n = points.len() as f64;
    let (sx, sy) = points.iter().fold((0.0, 0.0), |(sx, sy), p| {
        (sx + f64::from(p.x), sy + f64::from(p.y))
    });
    Point::new(sx / n, sy / n)
}

/// Center at the centroid, radius the RMS distance to it.
///
/// An empty set yields the default circle.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn naive_circle_fit(points: &[GridPoint]) -> CircleData {
    if points.is_empty() {
        tracing::warn!("naive circle fit on an empty point set");
        return CircleData::default();
    }
    let center = centroid(points);
    let mean_sq = points
        .iter()
        .map(|&p| Point::from(p).distance_squared(center))
        .sum::<f64>()
        / points.len() as f64;
    CircleData::new(center, mean_sq.sqrt())
}

/// Least-squares fit minimizing `Σ (x² + y² + a x + b y + c)²`.
///
/// Solves the 3x3 normal equations on centroid-shifted coordinates.
/// Fewer than three points or a singular system fall back to
/// [`naive_circle_fit`].
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn simple_algebraic_circle_fit(points: &[GridPoint]) -> CircleData {
    if points.len() < 3 {
        tracing::warn!(
            points = points.len(),
            "too few points for algebraic fit, using naive fit"
        );
        return naive_circle_fit(points);
    }
    let mean = centroid(points);
    let (mut suu, mut suv, mut svv) = (0.0, 0.0, 0.0);
    let (mut su, mut sv) = (0.0, 0.0);
    let (mut szu, mut szv, mut sz) = (0.0, 0.0, 0.0);
    for &p in points {
        let u = f64::from(p.x) - mean.x;
        let v = f64::from(p.y) - mean.y;
        let z = u.mul_add(u, v * v);
        suu += u * u;
        suv += u * v;
        svv += v * v;
        su += u;
        sv += v;
        szu += z * u;
        szv += z * v;
        sz += z;
    }
    if is_collinear(suu, svv, suv) {
        tracing::warn!("collinear points, using naive fit");
        return naive_circle_fit(points);
    }
    let n = points.len() as f64;
    let normal = Matrix3::new(suu, suv, su, suv, svv, sv, su, sv, n);
    let rhs = -Vector3::new(szu, szv, sz);

    let Some(solution) = normal.lu().solve(&rhs) else {
        tracing::warn!("singular normal equations, using naive fit");
        return naive_circle_fit(points);
    };
    let (a, b, c) = (solution[0], solution[1], solution[2]);
    let radius = a.mul_add(a, b.mul_add(b, -4.0 * c)).sqrt() / 2.0;
    let circle = CircleData::new(Point::new(mean.x - a / 2.0, mean.y - b / 2.0), radius);
    if circle.is_finite() {
        circle
    } else {
        tracing::warn!("algebraic fit produced a non-finite circle, using naive fit");
        naive_circle_fit(points)
    }
}

/// Chernov's Hyper fit.
///
/// Fewer than three points or a degenerate moment matrix fall back to
/// [`naive_circle_fit`].
#[must_use]
pub fn hyper_algebraic_circle_fit(points: &[GridPoint]) -> CircleData {
    match hyper_fit(points, None) {
        Ok(circle) => circle,
        // No token is polled, so this arm is never taken.
        Err(Cancelled) => naive_circle_fit(points),
    }
}

/// [`hyper_algebraic_circle_fit`] that polls `cancel` once per Newton
/// step.
///
/// # Errors
///
/// Returns [`Cancelled`] if `cancel` fires before the root is found.
pub fn hyper_algebraic_circle_fit_with_cancel(
    points: &[GridPoint],
    cancel: &CancelToken,
) -> Result<CircleData, Cancelled> {
    hyper_fit(points, Some(cancel))
}

/// Centered second and third order moments of the point set.
struct Moments {
    mean: Point,
    xx: f64,
    yy: f64,
    xy: f64,
    xz: f64,
    yz: f64,
    zz: f64,
}

impl Moments {
    #[allow(clippy::cast_precision_loss)]
    fn of(points: &[GridPoint]) -> Self {
        let mean = centroid(points);
        let mut m = Self {
            mean,
            xx: 0.0,
            yy: 0.0,
            xy: 0.0,
            xz: 0.0,
            yz: 0.0,
            zz: 0.0,
        };
        for &p in points {
            let x = f64::from(p.x) - mean.x;
            let y = f64::from(p.y) - mean.y;
            let z = x.mul_add(x, y * y);
            m.xx += x * x;
            m.yy += y * y;
            m.xy += x * y;
            m.xz += x * z;
            m.yz += y * z;
            m.zz += z * z;
        }
        let n = points.len() as f64;
        for value in [
            &mut m.xx, &mut m.yy, &mut m.xy, &mut m.xz, &mut m.yz, &mut m.zz,
        ] {
            *value /= n;
        }
        m
    }
}

fn hyper_fit(points: &[GridPoint], cancel: Option<&CancelToken>) -> Result<CircleData, Cancelled> {
    if points.len() < 3 {
        tracing::warn!(
            points = points.len(),
            "too few points for hyper fit, using naive fit"
        );
        return Ok(naive_circle_fit(points));
    }
    let m = Moments::of(points);
    if is_collinear(m.xx, m.yy, m.xy) {
        tracing::warn!("collinear points, using naive fit");
        return Ok(naive_circle_fit(points));
    }
    let mz = m.xx + m.yy;
    let cov_xy = m.xx.mul_add(m.yy, -m.xy * m.xy);
    let var_z = mz.mul_add(-mz, m.zz);

    // Characteristic polynomial P(t) = a0 + a1 t + a2 t² + 4 t³.
    let a2 = 4.0f64.mul_add(cov_xy, -3.0 * mz * mz) - m.zz;
    let a1 = var_z.mul_add(mz, 4.0 * cov_xy * mz) - m.xz * m.xz - m.yz * m.yz;
    let a0 = m.xz * m.xz.mul_add(m.yy, -m.yz * m.xy) + m.yz * m.yz.mul_add(m.xx, -m.xz * m.xy)
        - var_z * cov_xy;
    let a22 = a2 + a2;

    // Newton's method from t = 0 toward the smallest root.
    let mut t = 0.0_f64;
    let mut p = a0;
    let mut capped = true;
    for _ in 0..HYPER_MAX_ITERATIONS {
        if let Some(cancel) = cancel {
            cancel.check()?;
        }
        let dp = t.mul_add(16.0 * t * t + a22, a1);
        let t_next = t - p / dp;
        #[allow(clippy::float_cmp)]
        let stalled = t_next == t;
        if stalled || !t_next.is_finite() {
            capped = false;
            break;
        }
        let p_next = t_next.mul_add(t_next.mul_add(4.0f64.mul_add(t_next * t_next, a2), a1), a0);
        if p_next.abs() >= p.abs() {
            capped = false;
            break;
        }
        t = t_next;
        p = p_next;
    }
    if capped {
        tracing::warn!(
            iterations = HYPER_MAX_ITERATIONS,
            "hyper fit root search hit the iteration cap"
        );
    }

    let det = t.mul_add(t, -t * mz) + cov_xy;
    let xc = m.xz.mul_add(m.yy - t, -m.yz * m.xy) / det / 2.0;
    let yc = m.yz.mul_add(m.xx - t, -m.xz * m.xy) / det / 2.0;
    let radius = (xc.mul_add(xc, yc * yc) + mz - t - t).sqrt();
    let circle = CircleData::new(Point::new(xc + m.mean.x, yc + m.mean.y), radius);

    if det.abs() <= COLLINEAR_TOLERANCE * mz * mz || !circle.is_finite() {
        tracing::warn!(det, "degenerate hyper fit, using naive fit");
        return Ok(naive_circle_fit(points));
    }
    Ok(circle)
}

/// Circle estimator selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CircleFitKind {
    /// Centroid and RMS radius.
    Naive,
    /// Linear least squares on algebraic distance.
    SimpleAlgebraic,
    /// Chernov's Hyper fit.
    #[default]
    HyperAlgebraic,
}

impl CircleFitKind {
    /// Fit `points` with this estimator.
    #[must_use]
    pub fn fit(self, points: &[GridPoint]) -> CircleData {
        self.function()(points)
    }

    /// Fit `points`, polling `cancel` where the estimator iterates.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if `cancel` fires inside the Hyper fit's
    /// root search.
    pub fn fit_with_cancel(
        self,
        points: &[GridPoint],
        cancel: &CancelToken,
    ) -> Result<CircleData, Cancelled> {
        match self {
            Self::Naive | Self::SimpleAlgebraic => Ok(self.fit(points)),
            Self::HyperAlgebraic => hyper_algebraic_circle_fit_with_cancel(points, cancel),
        }
    }

    /// The estimator as a plain function pointer.
    #[must_use]
    pub const fn function(self) -> FitFunction {
        match self {
            Self::Naive => naive_circle_fit,
            Self::SimpleAlgebraic => simple_algebraic_circle_fit,
            Self::HyperAlgebraic => hyper_algebraic_circle_fit,
        }
    }

    /// Short lowercase name for reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Naive => "naive",
            Self::SimpleAlgebraic => "simple",
            Self::HyperAlgebraic => "hyper",
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
    use std::f64::consts::TAU;

    use super::*;

    const ALL: [CircleFitKind; 3] = [
        CircleFitKind::Naive,
        CircleFitKind::SimpleAlgebraic,
        CircleFitKind::HyperAlgebraic,
    ];

    /// `n` integer-rounded points on the circle `(cx, cy, r)`.
    fn rounded_circle(cx: f64, cy: f64, r: f64, n: usize) -> Vec<GridPoint> {
        (0..n)
            .map(|k| {
                let angle = TAU * k as f64 / n as f64;
                GridPoint::new(
                    r.mul_add(angle.cos(), cx).round() as u32,
                    r.mul_add(angle.sin(), cy).round() as u32,
                )
            })
            .collect()
    }

    fn assert_close(circle: &CircleData, cx: f64, cy: f64, r: f64, tol: f64, label: &str) {
        assert!(
            (circle.center.x - cx).abs() < tol
                && (circle.center.y - cy).abs() < tol
                && (circle.radius - r).abs() < tol,
            "{label}: expected ({cx}, {cy}, {r}) within {tol}, got {circle:?}"
        );
    }

    #[test]
    fn all_fits_recover_rounded_circle() {
        let points = rounded_circle(50.0, 50.0, 20.0, 16);
        for kind in ALL {
            assert_close(&kind.fit(&points), 50.0, 50.0, 20.0, 1.0, kind.name());
        }
    }

    #[test]
    fn algebraic_fits_are_exact_on_exact_points() {
        let points = vec![
            GridPoint::new(40, 30),
            GridPoint::new(30, 40),
            GridPoint::new(20, 30),
            GridPoint::new(30, 20),
            GridPoint::new(36, 38),
            GridPoint::new(22, 24),
        ];
        for kind in [CircleFitKind::SimpleAlgebraic, CircleFitKind::HyperAlgebraic] {
            assert_close(&kind.fit(&points), 30.0, 30.0, 10.0, 1e-6, kind.name());
        }
    }

    #[test]
    fn algebraic_fits_handle_partial_arcs() {
        // Quarter arc: the centroid is far from the true center.
        let points: Vec<GridPoint> = rounded_circle(100.0, 100.0, 60.0, 240)
            .into_iter()
            .filter(|p| p.x >= 100 && p.y >= 100)
            .collect();
        let naive = naive_circle_fit(&points);
        let hyper = hyper_algebraic_circle_fit(&points);
        assert_close(&hyper, 100.0, 100.0, 60.0, 2.0, "hyper");
        assert!(
            (naive.radius - 60.0).abs() > 10.0,
            "naive fit should be biased on an arc, got {naive:?}"
        );
    }

    #[test]
    fn simple_fit_on_two_points_is_naive() {
        let points = [GridPoint::new(3, 4), GridPoint::new(9, 12)];
        assert_eq!(
            simple_algebraic_circle_fit(&points),
            naive_circle_fit(&points)
        );
        assert_eq!(
            hyper_algebraic_circle_fit(&points),
            naive_circle_fit(&points)
        );
    }

    #[test]
    fn collinear_points_fall_back_to_naive() {
        let points: Vec<GridPoint> = (0..10).map(|x| GridPoint::new(x * 3, 7)).collect();
        let naive = naive_circle_fit(&points);
        assert_eq!(simple_algebraic_circle_fit(&points), naive);
        assert_eq!(hyper_algebraic_circle_fit(&points), naive);
    }

    #[test]
    fn sloped_collinear_points_fall_back_to_naive() {
        // Fractional centroids leave rounding noise in the scatter matrix.
        let lines: [&[GridPoint]; 3] = [
            &[GridPoint::new(0, 0), GridPoint::new(1, 3), GridPoint::new(3, 9)],
            &[
                GridPoint::new(0, 0),
                GridPoint::new(3, 2),
                GridPoint::new(6, 4),
                GridPoint::new(9, 6),
            ],
            &[
                GridPoint::new(7, 50),
                GridPoint::new(12, 35),
                GridPoint::new(13, 32),
                GridPoint::new(20, 11),
            ],
        ];
        for points in lines {
            let naive = naive_circle_fit(points);
            assert_eq!(simple_algebraic_circle_fit(points), naive, "{points:?}");
            assert_eq!(hyper_algebraic_circle_fit(points), naive, "{points:?}");
        }
    }

    #[test]
    fn three_points_define_a_circle() {
        // Right angle at (5, 1): the hypotenuse is a diameter.
        let points = [GridPoint::new(1, 1), GridPoint::new(5, 1), GridPoint::new(5, 4)];
        for kind in [CircleFitKind::SimpleAlgebraic, CircleFitKind::HyperAlgebraic] {
            assert_close(&kind.fit(&points), 3.0, 2.5, 2.5, 1e-6, kind.name());
        }
    }

    #[test]
    fn naive_fit_uses_centroid_and_rms() {
        let points = [
            GridPoint::new(0, 0),
            GridPoint::new(2, 0),
            GridPoint::new(0, 2),
            GridPoint::new(2, 2),
        ];
        let circle = naive_circle_fit(&points);
        assert_eq!(circle.center, Point::new(1.0, 1.0));
        assert!((circle.radius - 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn empty_input_gives_default_circle() {
        for kind in ALL {
            assert_eq!(kind.fit(&[]), CircleData::default(), "{}", kind.name());
        }
    }

    #[test]
    fn equality_tolerates_tiny_radius_differences() {
        let a = CircleData::new(Point::new(1.0, 2.0), 3.0);
        assert_eq!(a, CircleData::new(Point::new(1.0, 2.0), 3.0 + 1e-12));
        assert_ne!(a, CircleData::new(Point::new(1.0, 2.0), 3.0 + 1e-6));
        assert_ne!(a, CircleData::new(Point::new(1.0, 2.0 + 1e-12), 3.0));
    }

    #[test]
    fn geometric_error_is_distance_to_rim() {
        let circle = CircleData::new(Point::new(10.0, 10.0), 5.0);
        assert!((geometric_error(GridPoint::new(15, 10), &circle)).abs() < 1e-12);
        assert!((geometric_error(GridPoint::new(10, 10), &circle) - 5.0).abs() < 1e-12);
        assert!((geometric_error(GridPoint::new(10, 22), &circle) - 7.0).abs() < 1e-12);
    }

    #[test]
    fn function_pointer_matches_fit() {
        let points = rounded_circle(30.0, 40.0, 12.0, 24);
        for kind in ALL {
            assert_eq!(kind.function()(&points), kind.fit(&points));
        }
    }

    #[test]
    fn cancelled_hyper_fit_returns_error() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let points = rounded_circle(30.0, 40.0, 12.0, 24);
        assert_eq!(
            hyper_algebraic_circle_fit_with_cancel(&points, &cancel),
            Err(Cancelled)
        );
        let fresh = CancelToken::new();
        assert_eq!(
            hyper_algebraic_circle_fit_with_cancel(&points, &fresh).unwrap(),
            hyper_algebraic_circle_fit(&points)
        );
    }

    #[test]
    fn only_the_iterative_fit_observes_cancellation() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let points = rounded_circle(30.0, 40.0, 12.0, 24);
        for kind in [CircleFitKind::Naive, CircleFitKind::SimpleAlgebraic] {
            assert_eq!(
                kind.fit_with_cancel(&points, &cancel),
                Ok(kind.fit(&points)),
                "{}",
                kind.name()
            );
        }
        assert_eq!(
            CircleFitKind::HyperAlgebraic.fit_with_cancel(&points, &cancel),
            Err(Cancelled)
        );
    }
}
