//! 256-bin gray-level histogram.

use serde::{Deserialize, Serialize};

use crate::raster::Raster;

/// Number of gray levels.
pub const LEVELS: usize = 256;

/// Pixel count per gray level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Histogram(#[serde(with = "counts_serde")] [u64; LEVELS]);

impl Histogram {
    /// Wrap precomputed counts.
    #[must_use]
    pub const fn from_counts(counts: [u64; LEVELS]) -> Self {
        Self(counts)
    }

    /// Counts indexed by gray level.
    #[must_use]
    pub const fn counts(&self) -> &[u64; LEVELS] {
        &self.0
    }

    /// Total number of counted pixels.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }

    /// Whether no pixel was counted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&n| n == 0)
    }

    /// Number of gray levels with a non-zero count.
    #[must_use]
    pub fn occupied_levels(&self) -> usize {
        self.0.iter().filter(|&&n| n > 0).count()
    }

    /// Lowest and highest occupied level, or `None` if empty.
    #[must_use]
    pub fn occupied_range(&self) -> Option<(usize, usize)> {
        let first = self.0.iter().position(|&n| n > 0)?;
        let last = self.0.iter().rposition(|&n| n > 0)?;
        Some((first, last))
    }

    /// Counts divided by the total. All zeros when empty.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn normalized(&self) -> [f64; LEVELS] {
        let total = self.total();
        let mut out = [0.0; LEVELS];
        if total > 0 {
            let total = total as f64;
            for (p, &n) in out.iter_mut().zip(&self.0) {
                *p = n as f64 / total;
            }
        }
        out
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self([0; LEVELS])
    }
}

/// Count the gray level of every pixel.
#[must_use]
pub fn grayscale_histogram(image: &Raster) -> Histogram {
    let mut counts = [0_u64; LEVELS];
    match image {
        Raster::Gray(gray) => {
            for &v in gray.as_raw() {
                counts[usize::from(v)] += 1;
            }
        }
        _ => {
            for y in 0..image.height() {
                for x in 0..image.width() {
                    counts[usize::from(image.gray_at(x, y))] += 1;
                }
            }
        }
    }
    Histogram(counts)
}

/// Serde does not derive for arrays longer than 32; go through a slice.
mod counts_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::LEVELS;

    pub fn serialize<S: Serializer>(counts: &[u64; LEVELS], s: S) -> Result<S::Ok, S::Error> {
        counts.as_slice().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u64; LEVELS], D::Error> {
        let v = Vec::<u64>::deserialize(d)?;
        let len = v.len();
        v.try_into().map_err(|_| {
            serde::de::Error::invalid_length(len, &"an array of 256 counts")
        })
    }
}
