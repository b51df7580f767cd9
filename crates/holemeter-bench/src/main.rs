//! holemeter-bench: CLI tool for measuring a hole in an image and
//! experimenting with pipeline parameters.
//!
//! Runs the measurement pipeline on a given image file with configurable
//! parameters, printing the fitted circle and per-stage diagnostics.
//! Useful for:
//!
//! - Comparing filters, threshold methods, and edge operators
//! - Comparing circle fits and outlier corrections on real parts
//! - Measuring per-stage durations to identify bottlenecks
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin holemeter-bench -- [OPTIONS] <IMAGE_PATH>
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`); set
//! `RUST_LOG=holemeter_pipeline=debug` to trace each stage.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use holemeter_pipeline::diagnostics::{Clock, PipelineDiagnostics};
use holemeter_pipeline::{
    CancelToken, CircleFitKind, CorrectionKind, EdgeOperator, FilterKind, PaddingMode,
    PipelineConfig, Raster, ThresholdMethod,
};

/// Default p-tile fraction when `--threshold p-tile` is given without
/// `--p-tile`.
const DEFAULT_P_TILE: f64 = 0.5;

/// Circle measurement and pipeline diagnostics for holemeter.
///
/// Runs the measurement pipeline on a given image with configurable
/// parameters and prints the fitted circle with per-stage timing.
#[derive(Parser)]
#[command(name = "holemeter-bench", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Smoothing filter.
    #[arg(long, value_enum, default_value_t = filter_from_pipeline(PipelineConfig::DEFAULT_FILTER))]
    filter: Filter,

    /// Filter window radius in pixels.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_FILTER_RADIUS)]
    radius: u32,

    /// Gaussian sigma (default: radius / 2).
    #[arg(long)]
    sigma: Option<f64>,

    /// Border handling for convolution filters.
    #[arg(long, value_enum, default_value_t = padding_from_pipeline(PipelineConfig::DEFAULT_PADDING))]
    padding: Padding,

    /// Mean-shift normalized gray cutoff (0.0-1.0).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MEAN_SHIFT_COLOR_RADIUS)]
    color_radius: f64,

    /// Mean-shift pass count.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MEAN_SHIFT_LEVELS)]
    levels: u32,

    /// Threshold selection method.
    #[arg(long, value_enum, default_value_t = threshold_from_pipeline(PipelineConfig::DEFAULT_THRESHOLD))]
    threshold: Threshold,

    /// Fraction of pixels at or below the threshold for `p-tile`, in [0, 1).
    #[arg(long, default_value_t = DEFAULT_P_TILE)]
    p_tile: f64,

    /// Edge operator.
    #[arg(long, value_enum, default_value_t = edge_from_pipeline(PipelineConfig::DEFAULT_EDGE_OPERATOR))]
    edge: Edge,

    /// Circle fit estimator.
    #[arg(long, value_enum, default_value_t = fit_from_pipeline(PipelineConfig::DEFAULT_CIRCLE_FIT))]
    fit: Fit,

    /// Outlier correction strategy.
    #[arg(long, value_enum, default_value_t = correction_from_pipeline(PipelineConfig::DEFAULT_CORRECTION))]
    correction: Correction,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// The JSON must be a valid `PipelineConfig` serialization; missing
    /// fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,

    /// Write the input with the fitted circle drawn on it to this PNG.
    #[arg(long)]
    overlay: Option<PathBuf>,
}

/// Smoothing filter selection.
#[derive(Clone, Copy, ValueEnum)]
enum Filter {
    /// Uniform window average.
    Box,
    /// Gaussian-weighted window average.
    Gaussian,
    /// Window median.
    Median,
    /// Gray-range-limited iterative mean.
    MeanShift,
}

/// Border handling selection.
#[derive(Clone, Copy, ValueEnum)]
enum Padding {
    /// Repeat edge pixels.
    Fixed,
    /// Wrap around.
    Periodic,
    /// Mirror at the border.
    Reflected,
}

/// Threshold method selection.
#[derive(Clone, Copy, ValueEnum)]
enum Threshold {
    /// Otsu's between-class variance maximum.
    Cluster,
    /// Mean gray level.
    Mean,
    /// Moment-preserving (Tsai).
    Moments,
    /// Minimum fuzziness (Huang).
    Fuzziness,
    /// Fixed fraction of dark pixels (see `--p-tile`).
    PTile,
}

/// Edge operator selection.
#[derive(Clone, Copy, ValueEnum)]
enum Edge {
    /// 3x3 Sobel.
    Sobel,
    /// 3x3 Prewitt.
    Prewitt,
    /// 3x3 Scharr.
    Scharr,
    /// 4-neighbor Laplacian.
    Laplacian,
}

/// Circle fit selection.
#[derive(Clone, Copy, ValueEnum)]
enum Fit {
    /// Centroid and RMS distance.
    Naive,
    /// Linear least squares on the algebraic distance.
    Simple,
    /// Bias-corrected algebraic fit.
    Hyper,
}

/// Outlier correction selection.
#[derive(Clone, Copy, ValueEnum)]
enum Correction {
    /// Fit every edge point.
    None,
    /// Iterative median-error trimming.
    MedianError,
    /// Best 8-connected component.
    Connectivity,
}

// The CLI defaults are derived from the `PipelineConfig::DEFAULT_*`
// constants so the two cannot silently diverge.

const fn filter_from_pipeline(f: FilterKind) -> Filter {
    match f {
        FilterKind::Box => Filter::Box,
        FilterKind::Gaussian => Filter::Gaussian,
        FilterKind::Median => Filter::Median,
        FilterKind::MeanShift => Filter::MeanShift,
    }
}

const fn padding_from_pipeline(p: PaddingMode) -> Padding {
    match p {
        PaddingMode::Fixed => Padding::Fixed,
        PaddingMode::Periodic => Padding::Periodic,
        PaddingMode::Reflected => Padding::Reflected,
    }
}

const fn threshold_from_pipeline(t: ThresholdMethod) -> Threshold {
    match t {
        ThresholdMethod::Cluster => Threshold::Cluster,
        ThresholdMethod::Mean => Threshold::Mean,
        ThresholdMethod::Moments => Threshold::Moments,
        ThresholdMethod::Fuzziness => Threshold::Fuzziness,
        ThresholdMethod::PTile(_) => Threshold::PTile,
    }
}

const fn edge_from_pipeline(e: EdgeOperator) -> Edge {
    match e {
        EdgeOperator::Sobel => Edge::Sobel,
        EdgeOperator::Prewitt => Edge::Prewitt,
        EdgeOperator::Scharr => Edge::Scharr,
        EdgeOperator::Laplacian => Edge::Laplacian,
    }
}

const fn fit_from_pipeline(f: CircleFitKind) -> Fit {
    match f {
        CircleFitKind::Naive => Fit::Naive,
        CircleFitKind::SimpleAlgebraic => Fit::Simple,
        CircleFitKind::HyperAlgebraic => Fit::Hyper,
    }
}

const fn correction_from_pipeline(c: CorrectionKind) -> Correction {
    match c {
        CorrectionKind::None => Correction::None,
        CorrectionKind::MedianError => Correction::MedianError,
        CorrectionKind::Connectivity => Correction::Connectivity,
    }
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored. Otherwise, a config is
/// assembled from the individual flags. Either way the result is
/// validated.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    let config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        PipelineConfig {
            filter: match cli.filter {
                Filter::Box => FilterKind::Box,
                Filter::Gaussian => FilterKind::Gaussian,
                Filter::Median => FilterKind::Median,
                Filter::MeanShift => FilterKind::MeanShift,
            },
            filter_radius: cli.radius,
            gaussian_sigma: cli.sigma,
            padding: match cli.padding {
                Padding::Fixed => PaddingMode::Fixed,
                Padding::Periodic => PaddingMode::Periodic,
                Padding::Reflected => PaddingMode::Reflected,
            },
            mean_shift_color_radius: cli.color_radius,
            mean_shift_levels: cli.levels,
            threshold: match cli.threshold {
                Threshold::Cluster => ThresholdMethod::Cluster,
                Threshold::Mean => ThresholdMethod::Mean,
                Threshold::Moments => ThresholdMethod::Moments,
                Threshold::Fuzziness => ThresholdMethod::Fuzziness,
                Threshold::PTile => ThresholdMethod::PTile(cli.p_tile),
            },
            edge_operator: match cli.edge {
                Edge::Sobel => EdgeOperator::Sobel,
                Edge::Prewitt => EdgeOperator::Prewitt,
                Edge::Scharr => EdgeOperator::Scharr,
                Edge::Laplacian => EdgeOperator::Laplacian,
            },
            circle_fit: match cli.fit {
                Fit::Naive => CircleFitKind::Naive,
                Fit::Simple => CircleFitKind::SimpleAlgebraic,
                Fit::Hyper => CircleFitKind::HyperAlgebraic,
            },
            correction: match cli.correction {
                Correction::None => CorrectionKind::None,
                Correction::MedianError => CorrectionKind::MedianError,
                Correction::Connectivity => CorrectionKind::Connectivity,
            },
        }
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let decoded = match image::open(&cli.image_path) {
        Ok(img) => img,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };
    let raster = Raster::from(&decoded);

    eprintln!(
        "Image: {} ({}x{})",
        cli.image_path.display(),
        raster.width(),
        raster.height(),
    );
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let cancel = CancelToken::new();
    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        match holemeter_pipeline::diagnostics::process_with_diagnostics(
            &raster, &config, &cancel, &StdClock,
        ) {
            Ok((staged, diagnostics)) => {
                if cli.json {
                    match serde_json::to_string_pretty(&diagnostics) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("Error serializing diagnostics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", diagnostics.report());
                }

                // Write the overlay on the first run only.
                if run == 0
                    && let Some(ref overlay_path) = cli.overlay
                {
                    let overlay = holemeter_pipeline::render_overlay(&raster, &staged.circle);
                    match overlay.save(overlay_path) {
                        Ok(()) => tracing::info!(
                            path = %overlay_path.display(),
                            label = %holemeter_pipeline::circle_label(&staged.circle),
                            "overlay written"
                        ),
                        Err(e) => {
                            eprintln!("Error writing overlay to {}: {e}", overlay_path.display());
                            return ExitCode::FAILURE;
                        }
                    }
                }

                all_diagnostics.push(diagnostics);
            }
            Err(e) => {
                eprintln!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        }

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&PipelineDiagnostics) -> Duration;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Filter", |d| d.filter.duration),
        ("Binarize", |d| d.binarize.duration),
        ("Edge Detection", |d| d.edge_detection.duration),
        ("Circle Fit", |d| d.circle_fit.duration),
    ];

    for (name, extractor) in stage_extractors {
        let stage_mean = all_diagnostics
            .iter()
            .map(|d| extractor(d).as_secs_f64() * 1000.0)
            .sum::<f64>()
            / all_diagnostics.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
