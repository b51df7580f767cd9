//! Visual check of a fitted circle against its source image.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_cross_mut, draw_hollow_circle_mut};

use crate::circle_fit::CircleData;
use crate::raster::Raster;

/// Overlay color.
pub const OVERLAY_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Caption for an overlay: center and radius to two decimals.
#[must_use]
pub fn circle_label(circle: &CircleData) -> String {
    format!(
        "Center: ({:.2}, {:.2})\nRadius: {:.2}",
        circle.center.x, circle.center.y, circle.radius
    )
}

/// RGB copy of `image` with `circle` outlined and its center marked by
/// a cross.
///
/// Non-finite circles are not drawn.
#[must_use = "returns the annotated image"]
#[allow(clippy::cast_possible_truncation)]
pub fn render_overlay(image: &Raster, circle: &CircleData) -> RgbImage {
    let mut canvas = image.to_rgb_image();
    if !circle.is_finite() {
        tracing::warn!(?circle, "not drawing a non-finite circle");
        return canvas;
    }
    let cx = circle.center.x.round() as i32;
    let cy = circle.center.y.round() as i32;
    let r = circle.radius.round() as i32;
    draw_hollow_circle_mut(&mut canvas, (cx, cy), r, OVERLAY_COLOR);
    draw_cross_mut(&mut canvas, OVERLAY_COLOR, cx, cy);
    canvas
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma};

    use super::*;
    use crate::types::Point;

    fn field() -> Raster {
        Raster::Gray(GrayImage::from_pixel(40, 40, Luma([90])))
    }

    #[test]
    fn circle_and_center_are_drawn() {
        let circle = CircleData::new(Point::new(20.0, 20.0), 10.0);
        let out = render_overlay(&field(), &circle);
        assert_eq!(out.dimensions(), (40, 40));
        assert_eq!(*out.get_pixel(20, 20), OVERLAY_COLOR);
        assert_eq!(*out.get_pixel(30, 20), OVERLAY_COLOR);
        assert_eq!(*out.get_pixel(20, 10), OVERLAY_COLOR);
        assert_eq!(*out.get_pixel(0, 0), Rgb([90, 90, 90]));
    }

    #[test]
    fn circle_may_leave_the_canvas() {
        let circle = CircleData::new(Point::new(38.0, 2.0), 25.0);
        let out = render_overlay(&field(), &circle);
        assert_eq!(*out.get_pixel(38, 2), OVERLAY_COLOR);
    }

    #[test]
    fn label_names_center_and_radius() {
        let circle = CircleData::new(Point::new(20.0, 12.5), 7.126);
        assert_eq!(circle_label(&circle), "Center: (20.00, 12.50)\nRadius: 7.13");
    }

    #[test]
    fn non_finite_circle_leaves_image_untouched() {
        let circle = CircleData::new(Point::new(f64::NAN, 3.0), 4.0);
        assert_eq!(render_overlay(&field(), &circle), field().to_rgb_image());
    }
}
