//! Automatic threshold selection from a gray-level histogram.
//!
//! Every algorithm takes a [`Histogram`] and returns a gray level; the
//! `*_of` variants build the histogram from an image first and always
//! agree with the histogram form. Binarization treats pixels strictly
//! above the returned level as foreground.
//!
//! Empty histograms select level 0 and log a warning.

use serde::{Deserialize, Serialize};

use crate::histogram::{Histogram, LEVELS, grayscale_histogram};
use crate::raster::Raster;

/// Clamp a level index into the `u8` range.
fn level(i: usize) -> u8 {
    u8::try_from(i).unwrap_or(u8::MAX)
}

/// Floor of the mean gray level.
#[must_use]
pub fn mean_threshold(histogram: &Histogram) -> u8 {
    let total = histogram.total();
    if total == 0 {
        tracing::warn!("mean threshold of an empty histogram, using 0");
        return 0;
    }
    let weighted: u64 = histogram
        .counts()
        .iter()
        .zip(0_u64..)
        .map(|(&n, i)| i * n)
        .sum();
    u8::try_from(weighted / total).unwrap_or(u8::MAX)
}

/// Smallest level whose cumulative count exceeds `total * p`.
///
/// # Panics
///
/// Panics if `p` is outside `[0, 1)`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn p_tile_threshold(histogram: &Histogram, p: f64) -> u8 {
    assert!((0.0..1.0).contains(&p), "p-value {p} is out of range [0, 1)");
    let total = histogram.total();
    if total == 0 {
        tracing::warn!("p-tile threshold of an empty histogram, using 0");
        return 0;
    }
    let target = total as f64 * p;
    let mut cumulative = 0_u64;
    for (i, &n) in histogram.counts().iter().enumerate() {
        cumulative += n;
        if cumulative as f64 > target {
            return level(i);
        }
    }
    u8::MAX
}

/// Otsu's clustering threshold: the split maximizing between-class
/// variance. The first maximum wins on ties.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn cluster_threshold(histogram: &Histogram) -> u8 {
    let total = histogram.total();
    if total == 0 {
        tracing::warn!("cluster threshold of an empty histogram, using 0");
        return 0;
    }
    let normalized = histogram.normalized();
    let global_average: f64 = normalized
        .iter()
        .enumerate()
        .map(|(i, &p)| i as f64 * p)
        .sum();

    let mut threshold = 0;
    let mut max_variance = 0.0;
    let mut below = 0.0;
    let mut average = 0.0;
    let mut below_count = 0_u64;
    for (i, (&p, &n)) in normalized.iter().zip(histogram.counts()).enumerate() {
        below += p;
        average += i as f64 * p;
        below_count += n;
        // One class is empty: the variance is undefined.
        if below_count == 0 || below_count == total {
            continue;
        }
        let shift = average / below - global_average;
        let variance = shift * shift * below / (1.0 - below);
        if variance > max_variance {
            max_variance = variance;
            threshold = i;
        }
    }
    level(threshold)
}

/// Tsai's moment-preserving threshold.
///
/// Falls back to [`mean_threshold`] when the moment system has no
/// finite solution (a single occupied level, for instance).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn moments_threshold(histogram: &Histogram) -> u8 {
    if histogram.is_empty() {
        tracing::warn!("moments threshold of an empty histogram, using 0");
        return 0;
    }
    let normalized = histogram.normalized();
    let (mut m1, mut m2, mut m3) = (0.0, 0.0, 0.0);
    for (i, &p) in normalized.iter().enumerate() {
        let i = i as f64;
        m1 += i * p;
        m2 += i * i * p;
        m3 += i * i * i * p;
    }

    let cd = m1.mul_add(-m1, m2);
    let c0 = m1.mul_add(m3, -m2 * m2) / cd;
    let c1 = m1.mul_add(m2, -m3) / cd;
    let root = c1.mul_add(c1, -4.0 * c0).sqrt();
    let z0 = 0.5 * (-root - c1);
    let z1 = 0.5 * (root - c1);
    let pt = (z1 - m1) / (z1 - z0);

    if !pt.is_finite() {
        tracing::warn!(pt, "moment system is degenerate, falling back to mean threshold");
        return mean_threshold(histogram);
    }

    let mut cumulative = 0.0;
    for (i, &p) in normalized.iter().enumerate() {
        cumulative += p;
        if cumulative > pt {
            return level(i);
        }
    }
    u8::MAX
}

/// Huang-Wang threshold minimizing the fuzziness of the two classes.
///
/// With at most two occupied levels the lower one is returned.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn fuzziness_threshold(histogram: &Histogram) -> u8 {
    let Some((first, last)) = histogram.occupied_range() else {
        tracing::warn!("fuzziness threshold of an empty histogram, using 0");
        return 0;
    };
    if last - first <= 1 {
        return level(first);
    }
    let h = histogram.counts();

    // Cumulative counts and cumulative level-weighted counts.
    let mut s = vec![0.0_f64; last + 1];
    let mut w = vec![0.0_f64; last + 1];
    s[0] = h[0] as f64;
    for i in first.max(1)..=last {
        s[i] = s[i - 1] + h[i] as f64;
        w[i] = (i as f64).mul_add(h[i] as f64, w[i - 1]);
    }

    // Shannon entropy of the membership at each distance from a class
    // mean; distance 0 has membership 1 and entropy 0.
    let c = (last - first) as f64;
    let mut entropy_at = vec![0.0_f64; last - first + 1];
    for (d, slot) in entropy_at.iter_mut().enumerate().skip(1) {
        let mu = 1.0 / (1.0 + d as f64 / c);
        *slot = (-mu).mul_add(mu.ln(), -(1.0 - mu) * (1.0 - mu).ln());
    }

    let class_entropy = |range: std::ops::RangeInclusive<usize>, mean: usize| -> f64 {
        range
            .map(|j| entropy_at[j.abs_diff(mean)] * h[j] as f64)
            .sum()
    };

    let mut threshold = first;
    let mut best = f64::MAX;
    for i in first..last {
        let below_mean = (w[i] / s[i]) as usize;
        let above_mean = ((w[last] - w[i]) / (s[last] - s[i])) as usize;
        let entropy = class_entropy(first..=i, below_mean)
            + class_entropy(i + 1..=last, above_mean);
        if entropy < best {
            best = entropy;
            threshold = i;
        }
    }
    level(threshold)
}

/// [`mean_threshold`] of an image's histogram.
#[must_use]
pub fn mean_threshold_of(image: &Raster) -> u8 {
    mean_threshold(&grayscale_histogram(image))
}

/// [`p_tile_threshold`] of an image's histogram.
///
/// # Panics
///
/// Panics if `p` is outside `[0, 1)`.
#[must_use]
pub fn p_tile_threshold_of(image: &Raster, p: f64) -> u8 {
    p_tile_threshold(&grayscale_histogram(image), p)
}

/// [`cluster_threshold`] of an image's histogram.
#[must_use]
pub fn cluster_threshold_of(image: &Raster) -> u8 {
    cluster_threshold(&grayscale_histogram(image))
}

/// [`moments_threshold`] of an image's histogram.
#[must_use]
pub fn moments_threshold_of(image: &Raster) -> u8 {
    moments_threshold(&grayscale_histogram(image))
}

/// [`fuzziness_threshold`] of an image's histogram.
#[must_use]
pub fn fuzziness_threshold_of(image: &Raster) -> u8 {
    fuzziness_threshold(&grayscale_histogram(image))
}

/// Threshold selection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum ThresholdMethod {
    /// Otsu's between-class variance maximization.
    #[default]
    Cluster,
    /// Mean gray level.
    Mean,
    /// Tsai's moment preservation.
    Moments,
    /// Huang-Wang fuzziness minimization.
    Fuzziness,
    /// Fixed fraction `p` of pixels at or below the threshold.
    PTile(f64),
}

impl ThresholdMethod {
    /// Pick a threshold from `histogram`.
    ///
    /// # Panics
    ///
    /// Panics for [`PTile`](Self::PTile) with `p` outside `[0, 1)`.
    #[must_use]
    pub fn select(self, histogram: &Histogram) -> u8 {
        match self {
            Self::Cluster => cluster_threshold(histogram),
            Self::Mean => mean_threshold(histogram),
            Self::Moments => moments_threshold(histogram),
            Self::Fuzziness => fuzziness_threshold(histogram),
            Self::PTile(p) => p_tile_threshold(histogram, p),
        }
    }

    /// Short lowercase name for reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cluster => "cluster",
            Self::Mean => "mean",
            Self::Moments => "moments",
            Self::Fuzziness => "fuzziness",
            Self::PTile(_) => "p-tile",
        }
    }
}

/// Histogram sizes are fixed; keep the level table and `u8` in step.
const _: () = assert!(LEVELS == u8::MAX as usize + 1);

#[cfg(test)]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
mod tests {
    use image::{GrayImage, Luma};

    use super::*;

    fn histogram_of(levels: &[(usize, u64)]) -> Histogram {
        let mut counts = [0; LEVELS];
        for &(level, n) in levels {
            counts[level] = n;
        }
        Histogram::from_counts(counts)
    }

    fn noisy_image() -> Raster {
        Raster::Gray(GrayImage::from_fn(32, 24, |x, y| {
            let base: u32 = if (x as i32 - 16).pow(2) + (y as i32 - 12).pow(2) < 64 {
                190
            } else {
                50
            };
            Luma([(base + (x * 7 + y * 13) % 30) as u8])
        }))
    }

    #[test]
    fn mean_is_floored() {
        assert_eq!(mean_threshold(&histogram_of(&[(10, 1), (21, 1)])), 15);
        assert_eq!(mean_threshold(&histogram_of(&[(0, 3), (255, 1)])), 63);
    }

    #[test]
    fn p_tile_finds_cumulative_fraction() {
        let uniform = histogram_of(&(0..100).map(|i| (i, 1)).collect::<Vec<_>>());
        assert_eq!(p_tile_threshold(&uniform, 0.25), 25);
        assert_eq!(p_tile_threshold(&uniform, 0.0), 0);
        assert_eq!(p_tile_threshold(&uniform, 0.999), 99);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn p_tile_rejects_one() {
        let _ = p_tile_threshold(&histogram_of(&[(5, 1)]), 1.0);
    }

    #[test]
    fn cluster_splits_even_bimodal() {
        assert_eq!(cluster_threshold(&histogram_of(&[(50, 100), (200, 100)])), 50);
    }

    #[test]
    fn cluster_splits_uneven_bimodal() {
        assert_eq!(cluster_threshold(&histogram_of(&[(40, 70), (180, 30)])), 40);
    }

    #[test]
    fn cluster_separates_spread_modes() {
        let mut levels: Vec<(usize, u64)> = (20..=60).map(|i| (i, 5)).collect();
        levels.extend((150..=230).map(|i| (i, 3)));
        let t = cluster_threshold(&histogram_of(&levels));
        assert!(
            (60..150).contains(&usize::from(t)),
            "threshold {t} should fall between the modes"
        );
    }

    #[test]
    fn moments_falls_between_spread_modes() {
        let mut levels: Vec<(usize, u64)> = (30..=50).map(|i| (i, 10)).collect();
        levels.extend((170..=200).map(|i| (i, 10)));
        let t = moments_threshold(&histogram_of(&levels));
        assert!(
            (30..=170).contains(&usize::from(t)),
            "threshold {t} should fall near the lower mode's upper edge"
        );
    }

    #[test]
    fn moments_single_level_falls_back_to_mean() {
        assert_eq!(moments_threshold(&histogram_of(&[(77, 5)])), 77);
    }

    #[test]
    fn fuzziness_two_levels_returns_first() {
        assert_eq!(fuzziness_threshold(&histogram_of(&[(12, 4), (13, 9)])), 12);
        assert_eq!(fuzziness_threshold(&histogram_of(&[(99, 4)])), 99);
    }

    #[test]
    fn fuzziness_splits_bimodal_at_lower_mode() {
        assert_eq!(
            fuzziness_threshold(&histogram_of(&[(40, 70), (180, 30)])),
            40
        );
    }

    #[test]
    fn fuzziness_separates_spread_modes() {
        let mut levels: Vec<(usize, u64)> = (20..=40).map(|i| (i, 6)).collect();
        levels.extend((180..=210).map(|i| (i, 4)));
        let t = fuzziness_threshold(&histogram_of(&levels));
        assert!(
            (40..180).contains(&usize::from(t)),
            "threshold {t} should fall between the modes"
        );
    }

    #[test]
    fn empty_histogram_selects_zero() {
        let empty = Histogram::default();
        for method in [
            ThresholdMethod::Cluster,
            ThresholdMethod::Mean,
            ThresholdMethod::Moments,
            ThresholdMethod::Fuzziness,
            ThresholdMethod::PTile(0.5),
        ] {
            assert_eq!(method.select(&empty), 0, "{}", method.name());
        }
    }

    #[test]
    fn image_variants_match_histogram_variants() {
        let image = noisy_image();
        let hist = grayscale_histogram(&image);
        assert_eq!(mean_threshold_of(&image), mean_threshold(&hist));
        assert_eq!(p_tile_threshold_of(&image, 0.3), p_tile_threshold(&hist, 0.3));
        assert_eq!(cluster_threshold_of(&image), cluster_threshold(&hist));
        assert_eq!(moments_threshold_of(&image), moments_threshold(&hist));
        assert_eq!(fuzziness_threshold_of(&image), fuzziness_threshold(&hist));
    }

    #[test]
    fn select_dispatches() {
        let hist = histogram_of(&[(10, 1), (21, 1)]);
        assert_eq!(ThresholdMethod::Mean.select(&hist), 15);
        assert_eq!(ThresholdMethod::PTile(0.4).select(&hist), 10);
        assert_eq!(ThresholdMethod::default(), ThresholdMethod::Cluster);
    }
}
