//! Median filtering over a clipped square window.
//!
//! Each output pixel is the median-gray pixel of its `(2r + 1)²`
//! neighborhood. Window positions outside the image are excluded rather
//! than padded, so border windows are smaller. Window members are
//! ordered by `(gray level, row-major scan position)` and the member of
//! rank `count / 2` is selected; for RGB inputs the whole pixel of that
//! member is copied.
//!
//! Three strategies compute the same result with different cost
//! profiles; [`MedianStrategy::auto`] picks one from the image layout
//! and radius.

use serde::{Deserialize, Serialize};

use crate::cancel::{CancelToken, Cancelled};
use crate::raster::{Planes, Raster};

/// Largest radius for which [`MedianStrategy::Select`] is chosen
/// automatically on non-gray images.
pub const SELECT_MAX_RADIUS: u32 = 7;

/// Algorithm used to locate the window median.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MedianStrategy {
    /// 256-bin running histogram slid one column at a time. Grayscale
    /// only; other layouts fall back to [`Bucket`](Self::Bucket).
    Histogram,
    /// Order-statistic selection over the collected window.
    Select,
    /// Window members bucketed by gray level, buckets walked to the
    /// median rank.
    Bucket,
}

impl MedianStrategy {
    /// Strategy picked when the caller does not force one.
    #[must_use]
    pub const fn auto(image: &Raster, radius: u32) -> Self {
        if image.is_grayscale() {
            Self::Histogram
        } else if radius <= SELECT_MAX_RADIUS {
            Self::Select
        } else {
            Self::Bucket
        }
    }
}

/// Median filter with an automatically chosen strategy.
///
/// # Errors
///
/// Returns [`Cancelled`] if `cancel` fires mid-run.
pub fn median_filter(
    image: &Raster,
    radius: u32,
    cancel: &CancelToken,
) -> Result<Raster, Cancelled> {
    median_filter_with(image, radius, MedianStrategy::auto(image, radius), cancel)
}

/// Median filter with a caller-chosen strategy.
///
/// # Errors
///
/// Returns [`Cancelled`] if `cancel` fires mid-run.
pub fn median_filter_with(
    image: &Raster,
    radius: u32,
    strategy: MedianStrategy,
    cancel: &CancelToken,
) -> Result<Raster, Cancelled> {
    if image.width() == 0 || image.height() == 0 {
        return Ok(image.clone());
    }
    let src = Planes::from_raster(image);
    let window = Window::new(&src, radius);
    let dst = match strategy {
        MedianStrategy::Histogram if image.is_grayscale() => by_histogram(&window, cancel)?,
        MedianStrategy::Histogram | MedianStrategy::Bucket => by_bucket(&window, cancel)?,
        MedianStrategy::Select => by_select(&window, cancel)?,
    };
    Ok(dst.into_raster(image))
}

/// Source pixels plus their gray levels and the window geometry.
struct Window<'a> {
    src: &'a Planes,
    grays: Vec<u8>,
    radius: u32,
}

impl<'a> Window<'a> {
    fn new(src: &'a Planes, radius: u32) -> Self {
        Self {
            src,
            grays: src.grays(),
            radius,
        }
    }

    /// Clipped inclusive ranges `(x0..=x1, y0..=y1)` of the window
    /// centered on `(x, y)`.
    fn bounds(&self, x: u32, y: u32) -> (u32, u32, u32, u32) {
        (
            x.saturating_sub(self.radius),
            x.saturating_add(self.radius).min(self.src.width - 1),
            y.saturating_sub(self.radius),
            y.saturating_add(self.radius).min(self.src.height - 1),
        )
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.src.width as usize + x as usize
    }

    /// Window members in row-major scan order.
    fn members(&self, x: u32, y: u32) -> impl Iterator<Item = (u32, u32)> {
        let (x0, x1, y0, y1) = self.bounds(x, y);
        (y0..=y1).flat_map(move |wy| (x0..=x1).map(move |wx| (wx, wy)))
    }
}

fn by_select(window: &Window<'_>, cancel: &CancelToken) -> Result<Planes, Cancelled> {
    let src = window.src;
    let mut dst = Planes::zeroed(src.width, src.height, src.channels);
    let mut members: Vec<(u8, usize, (u32, u32))> = Vec::new();
    for y in 0..src.height {
        for x in 0..src.width {
            cancel.check()?;
            members.clear();
            members.extend(
                window
                    .members(x, y)
                    .enumerate()
                    .map(|(scan, (wx, wy))| (window.grays[window.index(wx, wy)], scan, (wx, wy))),
            );
            let rank = members.len() / 2;
            let (_, &mut (_, _, (mx, my)), _) =
                members.select_nth_unstable_by_key(rank, |&(gray, scan, _)| (gray, scan));
            dst.pixel_mut(x, y).copy_from_slice(src.pixel(mx, my));
        }
    }
    Ok(dst)
}

fn by_bucket(window: &Window<'_>, cancel: &CancelToken) -> Result<Planes, Cancelled> {
    let src = window.src;
    let mut dst = Planes::zeroed(src.width, src.height, src.channels);
    let mut buckets: Vec<Vec<(u32, u32)>> = vec![Vec::new(); 256];
    for y in 0..src.height {
        for x in 0..src.width {
            cancel.check()?;
            for bucket in &mut buckets {
                bucket.clear();
            }
            let mut count = 0;
            for (wx, wy) in window.members(x, y) {
                buckets[usize::from(window.grays[window.index(wx, wy)])].push((wx, wy));
                count += 1;
            }
            let mut remaining = count / 2;
            for bucket in &buckets {
                if remaining < bucket.len() {
                    let (mx, my) = bucket[remaining];
                    dst.pixel_mut(x, y).copy_from_slice(src.pixel(mx, my));
                    break;
                }
                remaining -= bucket.len();
            }
        }
    }
    Ok(dst)
}

fn by_histogram(window: &Window<'_>, cancel: &CancelToken) -> Result<Planes, Cancelled> {
    let src = window.src;
    let mut dst = Planes::zeroed(src.width, src.height, src.channels);
    let mut hist = [0_usize; 256];
    for y in 0..src.height {
        let (_, _, y0, y1) = window.bounds(0, y);
        let column = |hist: &mut [usize; 256], wx: u32, add: bool| {
            for wy in y0..=y1 {
                let slot = &mut hist[usize::from(window.grays[window.index(wx, wy)])];
                if add {
                    *slot += 1;
                } else {
                    *slot -= 1;
                }
            }
        };

        hist.fill(0);
        let (_, first_x1, _, _) = window.bounds(0, y);
        for wx in 0..=first_x1 {
            column(&mut hist, wx, true);
        }

        for x in 0..src.width {
            cancel.check()?;
            if x > 0 {
                let entering = x.saturating_add(window.radius);
                if entering < src.width {
                    column(&mut hist, entering, true);
                }
                if let Some(leaving) = x.checked_sub(window.radius + 1) {
                    column(&mut hist, leaving, false);
                }
            }
            let (x0, x1, _, _) = window.bounds(x, y);
            let count = (x1 - x0 + 1) as usize * (y1 - y0 + 1) as usize;
            let mut remaining = count / 2;
            for (level, &n) in hist.iter().enumerate() {
                if remaining < n {
                    // `level` indexes a 256-entry table.
                    #[allow(clippy::cast_possible_truncation)]
                    let value = level as u8;
                    dst.pixel_mut(x, y)[0] = value;
                    break;
                }
                remaining -= n;
            }
        }
    }
    Ok(dst)
}
