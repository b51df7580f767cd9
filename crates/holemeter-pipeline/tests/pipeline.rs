//! Integration test: encode a synthetic inspection image, decode it the
//! way the CLI does, and measure the hole through the full pipeline.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use holemeter_pipeline::{
    BitOrder, CancelToken, CircleData, CorrectionKind, FilterKind, MonoImage, PipelineConfig,
    Raster, ThresholdMethod, process, render_overlay,
};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};

const CX: f64 = 48.0;
const CY: f64 = 40.0;
const R: f64 = 18.0;

fn inside(x: u32, y: u32) -> bool {
    (f64::from(x) - CX).hypot(f64::from(y) - CY) <= R
}

/// Dark hole on a bright plate, plus a small dark speck below it.
fn plate_with_speck() -> GrayImage {
    GrayImage::from_fn(96, 84, |x, y| {
        let speck = (70..74).contains(&x) && (72..76).contains(&y);
        Luma([if inside(x, y) || speck { 25 } else { 210 }])
    })
}

fn png_round_trip(image: &GrayImage) -> Raster {
    let mut buf = std::io::Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png).unwrap();
    let decoded: DynamicImage = image::load_from_memory(buf.get_ref()).unwrap();
    Raster::from(&decoded)
}

fn assert_near(circle: &CircleData, tolerance: f64) {
    assert!(
        (circle.center.x - CX).abs() < tolerance && (circle.center.y - CY).abs() < tolerance,
        "center {:?} not within {tolerance} of ({CX}, {CY})",
        circle.center
    );
    assert!(
        (circle.radius - R).abs() < tolerance + 0.5,
        "radius {} not within {} of {R}",
        circle.radius,
        tolerance + 0.5
    );
}

#[test]
fn decoded_png_measures_the_hole() {
    let raster = png_round_trip(&plate_with_speck());
    let config = PipelineConfig {
        correction: CorrectionKind::Connectivity,
        ..PipelineConfig::default()
    };
    let result = process(&raster, &config, &CancelToken::new()).expect("pipeline should succeed");

    eprintln!(
        "threshold {} edge points {} circle {:?}",
        result.threshold,
        result.edge_points.len(),
        result.circle
    );
    assert_near(&result.circle, 1.0);
    // The speck's outline is part of the edge set; the correction drops it.
    assert!(result.edge_points.iter().any(|p| p.y > 70 && p.x > 65));
}

#[test]
fn every_filter_supports_the_measurement() {
    let raster = Raster::Gray(plate_with_speck());
    for filter in [
        FilterKind::Box,
        FilterKind::Gaussian,
        FilterKind::Median,
        FilterKind::MeanShift,
    ] {
        let config = PipelineConfig {
            filter,
            filter_radius: 1,
            correction: CorrectionKind::Connectivity,
            ..PipelineConfig::default()
        };
        let result = process(&raster, &config, &CancelToken::new());
        assert!(result.is_ok(), "{}: {result:?}", filter.name());
        assert_near(&result.unwrap().circle, 1.5);
    }
}

#[test]
fn mono_input_with_lsb_layout() {
    let mono = MonoImage::from_fn(
        96,
        84,
        BitOrder::LsbFirst,
        [image::Rgb([255, 255, 255]), image::Rgb([0, 0, 0])],
        inside,
    );
    let config = PipelineConfig {
        filter: FilterKind::Median,
        filter_radius: 1,
        threshold: ThresholdMethod::Mean,
        ..PipelineConfig::default()
    };
    let result = process(&Raster::Mono(mono), &config, &CancelToken::new()).unwrap();
    assert_near(&result.circle, 1.0);
}

#[test]
fn overlay_marks_the_measured_center() {
    let raster = Raster::Gray(plate_with_speck());
    let config = PipelineConfig {
        correction: CorrectionKind::Connectivity,
        ..PipelineConfig::default()
    };
    let result = process(&raster, &config, &CancelToken::new()).unwrap();
    let overlay = render_overlay(&raster, &result.circle);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (x, y) = (
        result.circle.center.x.round() as u32,
        result.circle.center.y.round() as u32,
    );
    assert_eq!(overlay.get_pixel(x, y).0, [255, 0, 0]);
    assert_eq!(overlay.get_pixel(2, 2).0, [210, 210, 210]);
}
