//! Change detection between consecutive region crops
//!
//! The score is the mean absolute luminance difference (0-255). Missing
//! history, mismatched sizes and empty images all score [`CHANGED_SENTINEL`]
//! so that a region is reprocessed rather than silently skipped.

use image::DynamicImage;

/// Score returned whenever two images cannot be compared
pub const CHANGED_SENTINEL: f64 = 1000.0;

/// Scores below this are treated as "unchanged"
pub const DEFAULT_CHANGE_THRESHOLD: f64 = 2.0;

/// Decides whether a region's content changed enough to reprocess
#[derive(Debug, Clone, Copy)]
pub struct ChangeDetector {
    threshold: f64,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(DEFAULT_CHANGE_THRESHOLD)
    }
}

impl ChangeDetector {
    pub fn new(threshold: f64) -> Self {
        let threshold = if threshold.is_finite() && threshold >= 0.0 {
            threshold
        } else {
            DEFAULT_CHANGE_THRESHOLD
        };
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Mean absolute luminance difference; 0 only for identical content
    pub fn score(current: &DynamicImage, previous: Option<&DynamicImage>) -> f64 {
        let Some(previous) = previous else {
            return CHANGED_SENTINEL;
        };

        if current.width() != previous.width() || current.height() != previous.height() {
            return CHANGED_SENTINEL;
        }
        if current.width() == 0 || current.height() == 0 {
            return CHANGED_SENTINEL;
        }

        let a = current.to_luma8();
        let b = previous.to_luma8();

        let total: u64 = a
            .as_raw()
            .iter()
            .zip(b.as_raw().iter())
            .map(|(&pa, &pb)| u64::from(pa.abs_diff(pb)))
            .sum();

        let count = a.as_raw().len();
        if count == 0 {
            return CHANGED_SENTINEL;
        }

        total as f64 / count as f64
    }

    /// True when `score` warrants reprocessing
    pub fn is_significant(&self, score: f64) -> bool {
        score.is_nan() || score >= self.threshold
    }

    /// Score the pair and apply the threshold in one step
    pub fn has_changed(&self, current: &DynamicImage, previous: Option<&DynamicImage>) -> bool {
        self.is_significant(Self::score(current, previous))
    }
}
