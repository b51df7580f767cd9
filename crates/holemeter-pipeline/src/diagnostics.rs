//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! These diagnostics are permanent instrumentation intended for
//! parameter experimentation. [`process_with_diagnostics`] runs the
//! staged pipeline and records, per stage, how long it took and what it
//! produced.
//!
//! Timestamps come from a caller-supplied [`Clock`], keeping this crate
//! free of platform time sources. Durations are serialized as
//! fractional seconds (`f64`) for JSON compatibility, since
//! `std::time::Duration` does not implement serde traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::circle_fit::CircleData;
use crate::pipeline::{Pipeline, PipelineStage};
use crate::raster::{MonoImage, Raster};
use crate::types::{PipelineConfig, PipelineError, StagedResult};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Monotonic time source used to time pipeline stages.
pub trait Clock {
    /// Opaque timestamp.
    type Instant;

    /// Current timestamp.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 1: smoothing filter.
    pub filter: StageDiagnostics,
    /// Stage 2: histogram, threshold selection and binarization.
    pub binarize: StageDiagnostics,
    /// Stage 3: edge operator and foreground extraction.
    pub edge_detection: StageDiagnostics,
    /// Stage 4: circle fit with outlier correction.
    pub circle_fit: StageDiagnostics,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Smoothing filter metrics.
    Filter {
        /// Which filter ran.
        kind: String,
        /// Window radius.
        radius: u32,
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
    },
    /// Binarization metrics.
    Binarize {
        /// Threshold selection method.
        method: String,
        /// Selected threshold.
        threshold: u8,
        /// Number of non-empty histogram bins.
        occupied_levels: usize,
        /// Pixels above the threshold.
        foreground_pixel_count: u64,
        /// Total pixel count.
        total_pixel_count: u64,
    },
    /// Edge detection metrics.
    EdgeDetection {
        /// Edge operator.
        operator: String,
        /// Foreground pixels in the edge mask.
        edge_point_count: usize,
        /// Total pixel count.
        total_pixel_count: u64,
    },
    /// Circle fit metrics.
    CircleFit {
        /// Fit estimator.
        fit: String,
        /// Outlier correction.
        correction: String,
        /// Edge points handed to the correction.
        input_point_count: usize,
        /// The fitted circle.
        circle: CircleData,
    },
}

/// High-level summary for the entire pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Source image width in pixels.
    pub image_width: u32,
    /// Source image height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
    /// Edge points found.
    pub edge_point_count: usize,
    /// Final circle.
    pub circle: CircleData,
}

/// Run the staged pipeline, timing each stage with `clock`.
///
/// # Errors
///
/// Same as [`crate::process`].
pub fn process_with_diagnostics<C: Clock>(
    image: &Raster,
    config: &PipelineConfig,
    cancel: &CancelToken,
    clock: &C,
) -> Result<(StagedResult, PipelineDiagnostics), PipelineError> {
    config.validate()?;
    let start = clock.now();

    let t = clock.now();
    let filtered = Pipeline::new(image.clone(), config.clone()).filter(cancel)?;
    let filter = stage_diagnostics(&filtered, clock.elapsed(&t));

    let t = clock.now();
    let binarized = filtered.binarize();
    let binarize = stage_diagnostics(&binarized, clock.elapsed(&t));

    let t = clock.now();
    let edges = binarized.detect_edges(cancel)?;
    let edge_detection = stage_diagnostics(&edges, clock.elapsed(&t));

    let t = clock.now();
    let fitted = edges.fit_circle(cancel)?;
    let circle_fit = stage_diagnostics(&fitted, clock.elapsed(&t));

    let total_duration = clock.elapsed(&start);
    let result = fitted.into_result();

    let summary = PipelineSummary {
        image_width: result.dimensions.width,
        image_height: result.dimensions.height,
        pixel_count: result.dimensions.pixel_count(),
        edge_point_count: result.edge_points.len(),
        circle: result.circle,
    };

    Ok((
        result,
        PipelineDiagnostics {
            filter,
            binarize,
            edge_detection,
            circle_fit,
            total_duration,
            summary,
        },
    ))
}

fn stage_diagnostics(stage: &impl PipelineStage, duration: Duration) -> StageDiagnostics {
    StageDiagnostics {
        duration,
        metrics: stage.metrics(),
    }
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} ({} pixels)",
            self.summary.image_width, self.summary.image_height, self.summary.pixel_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let stages = [
            ("Filter", &self.filter),
            ("Binarize", &self.binarize),
            ("Edge Detection", &self.edge_detection),
            ("Circle Fit", &self.circle_fit),
        ];
        for (name, diag) in stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        let c = &self.summary.circle;
        lines.push(format!(
            "Edge points: {}  |  Circle: center=({:.3}, {:.3}) radius={:.3}",
            self.summary.edge_point_count, c.center.x, c.center.y, c.radius,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, whole: u64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64 * 100.0
    } else {
        0.0
    }
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Filter {
            kind,
            radius,
            width,
            height,
        } => format!("{kind} r={radius} {width}x{height}"),
        StageMetrics::Binarize {
            method,
            threshold,
            occupied_levels,
            foreground_pixel_count,
            total_pixel_count,
        } => format!(
            "{method} t={threshold} levels={occupied_levels} fg={foreground_pixel_count} ({:.1}%)",
            percent(*foreground_pixel_count, *total_pixel_count),
        ),
        StageMetrics::EdgeDetection {
            operator,
            edge_point_count,
            total_pixel_count,
        } => format!(
            "{operator} edges={edge_point_count} ({:.1}%)",
            percent(*edge_point_count as u64, *total_pixel_count),
        ),
        StageMetrics::CircleFit {
            fit,
            correction,
            input_point_count,
            circle,
        } => format!(
            "{fit}+{correction} {input_point_count} pts -> ({:.2}, {:.2}) r={:.2}",
            circle.center.x, circle.center.y, circle.radius,
        ),
    }
}

/// Count foreground pixels in a binary image.
pub(crate) fn count_foreground(image: &MonoImage) -> u64 {
    let mut count = 0;
    for y in 0..image.height() {
        for x in 0..image.width() {
            count += u64::from(image.is_foreground(x, y));
        }
    }
    count
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use image::{GrayImage, Luma};

    use super::*;
    use crate::raster::{BLACK, BitOrder, WHITE};
    use crate::types::Point;

    /// Clock that advances one millisecond per reading.
    struct StepClock {
        ticks: Cell<u64>,
    }

    impl Clock for StepClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            let t = self.ticks.get();
            self.ticks.set(t + 1);
            t
        }

        fn elapsed(&self, since: &u64) -> Duration {
            Duration::from_millis(self.now() - since)
        }
    }

    fn disk() -> Raster {
        Raster::Gray(GrayImage::from_fn(40, 40, |x, y| {
            let d = (f64::from(x) - 20.0).hypot(f64::from(y) - 20.0);
            Luma([if d <= 10.0 { 200 } else { 20 }])
        }))
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let d = Duration::from_millis(1234);
        let ms = duration_ms(d);
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn count_foreground_works() {
        let mut img = MonoImage::new(10, 10, BitOrder::MsbFirst, [BLACK, WHITE]);
        for i in 0..5 {
            img.put_index(i, 3, 1);
        }
        assert_eq!(count_foreground(&img), 5);
    }

    #[test]
    fn diagnostics_match_the_staged_result() {
        let clock = StepClock {
            ticks: Cell::new(0),
        };
        let (result, diag) = process_with_diagnostics(
            &disk(),
            &PipelineConfig::default(),
            &CancelToken::new(),
            &clock,
        )
        .unwrap();

        assert_eq!(diag.summary.circle, result.circle);
        assert_eq!(diag.summary.edge_point_count, result.edge_points.len());
        assert_eq!(diag.summary.pixel_count, 1600);
        assert!(matches!(
            diag.binarize.metrics,
            StageMetrics::Binarize { threshold, .. } if threshold == result.threshold
        ));
        for stage in [
            &diag.filter,
            &diag.binarize,
            &diag.edge_detection,
            &diag.circle_fit,
        ] {
            assert_eq!(stage.duration, Duration::from_millis(1));
        }
        assert!(diag.total_duration >= Duration::from_millis(4));
    }

    #[test]
    fn invalid_config_is_rejected_before_running() {
        let clock = StepClock {
            ticks: Cell::new(0),
        };
        let config = PipelineConfig {
            mean_shift_color_radius: -0.5,
            ..PipelineConfig::default()
        };
        let result = process_with_diagnostics(&disk(), &config, &CancelToken::new(), &clock);
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
        assert_eq!(clock.ticks.get(), 0);
    }

    #[test]
    fn json_round_trip_keeps_durations() {
        let clock = StepClock {
            ticks: Cell::new(0),
        };
        let (_, diag) = process_with_diagnostics(
            &disk(),
            &PipelineConfig::default(),
            &CancelToken::new(),
            &clock,
        )
        .unwrap();
        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("\"duration\":0.001"));
        let back: PipelineDiagnostics = serde_json::from_str(&json).unwrap();
        assert!(
            (back.total_duration.as_secs_f64() - diag.total_duration.as_secs_f64()).abs() < 1e-9
        );
        assert_eq!(back.circle_fit.metrics, diag.circle_fit.metrics);
    }

    #[test]
    fn negative_duration_is_rejected() {
        let json = r#"{"duration": -1.0, "metrics": {"Filter": {"kind": "box", "radius": 1, "width": 1, "height": 1}}}"#;
        assert!(serde_json::from_str::<StageDiagnostics>(json).is_err());
    }

    #[test]
    fn report_produces_nonempty_string() {
        let stage = |metrics| StageDiagnostics {
            duration: Duration::from_millis(5),
            metrics,
        };
        let circle = CircleData::new(Point::new(12.0, 14.5), 6.25);
        let diag = PipelineDiagnostics {
            filter: stage(StageMetrics::Filter {
                kind: "gaussian".to_string(),
                radius: 2,
                width: 100,
                height: 100,
            }),
            binarize: stage(StageMetrics::Binarize {
                method: "cluster".to_string(),
                threshold: 97,
                occupied_levels: 40,
                foreground_pixel_count: 2500,
                total_pixel_count: 10000,
            }),
            edge_detection: stage(StageMetrics::EdgeDetection {
                operator: "sobel".to_string(),
                edge_point_count: 300,
                total_pixel_count: 10000,
            }),
            circle_fit: stage(StageMetrics::CircleFit {
                fit: "hyper".to_string(),
                correction: "median-error".to_string(),
                input_point_count: 300,
                circle,
            }),
            total_duration: Duration::from_millis(20),
            summary: PipelineSummary {
                image_width: 100,
                image_height: 100,
                pixel_count: 10000,
                edge_point_count: 300,
                circle,
            },
        };

        let report = diag.report();
        assert!(report.contains("Pipeline Diagnostics Report"));
        assert!(report.contains("Edge Detection"));
        assert!(report.contains("cluster t=97"));
        assert!(report.contains("fg=2500 (25.0%)"));
        assert!(report.contains("radius=6.250"));
    }
}
