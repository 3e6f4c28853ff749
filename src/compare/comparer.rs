//! Tolerant pixel-difference comparison between RGBA images

use crate::capture::frame::RgbaView;
use crate::error::CompareError;

const CHANNELS: u64 = 4;
const CHANNEL_MAX: u64 = 255;

/// Outcome of comparing one frame against one reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferenceReport {
    pub width: u32,
    pub height: u32,
    /// Sum of the per-pixel Manhattan distances that were counted.
    pub total_difference: u64,
    /// Pixels whose distance exceeded the per-pixel threshold.
    pub differing_pixels: u64,
    /// `total_difference / (width * height * 4 * 255)`, in `[0, 1]`.
    pub normalized: f64,
}

impl DifferenceReport {
    pub fn is_empty(&self) -> bool {
        self.total_difference == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageComparer {
    /// Any channel difference counts in full.
    Exact,
    /// Per-pixel distances at or below `per_pixel_threshold` are ignored;
    /// images are similar when the ratio is at most `image_threshold`.
    Tolerant {
        image_threshold: f64,
        per_pixel_threshold: u32,
    },
}

impl ImageComparer {
    pub fn tolerant(image_threshold: f64, per_pixel_threshold: u32) -> Self {
        Self::Tolerant {
            image_threshold,
            per_pixel_threshold,
        }
    }

    pub fn tolerant_percentage(image_threshold_percent: f64, per_pixel_threshold: u32) -> Self {
        Self::tolerant(image_threshold_percent / 100.0, per_pixel_threshold)
    }

    pub fn image_threshold(&self) -> f64 {
        match self {
            Self::Exact => 0.0,
            Self::Tolerant {
                image_threshold, ..
            } => *image_threshold,
        }
    }

    pub fn per_pixel_threshold(&self) -> u32 {
        match self {
            Self::Exact => 0,
            Self::Tolerant {
                per_pixel_threshold,
                ..
            } => *per_pixel_threshold,
        }
    }

    /// Compare `actual` against `expected`.
    ///
    /// Both images must have identical dimensions; a mismatch is a
    /// configuration fault, not a per-frame difference.
    pub fn compare(
        &self,
        actual: RgbaView<'_>,
        expected: RgbaView<'_>,
    ) -> Result<DifferenceReport, CompareError> {
        if actual.dimensions() != expected.dimensions() {
            return Err(CompareError::DimensionMismatch {
                expected_width: expected.width(),
                expected_height: expected.height(),
                actual_width: actual.width(),
                actual_height: actual.height(),
            });
        }

        let threshold = self.per_pixel_threshold();
        let mut total_difference = 0u64;
        let mut differing_pixels = 0u64;

        for (actual_row, expected_row) in actual.rows().zip(expected.rows()) {
            for (a, e) in actual_row.chunks_exact(4).zip(expected_row.chunks_exact(4)) {
                let distance = manhattan(a, e);
                if distance > threshold {
                    total_difference += u64::from(distance);
                    differing_pixels += 1;
                }
            }
        }

        let max = u64::from(actual.width()) * u64::from(actual.height()) * CHANNELS * CHANNEL_MAX;
        let normalized = if max == 0 {
            0.0
        } else {
            total_difference as f64 / max as f64
        };

        Ok(DifferenceReport {
            width: actual.width(),
            height: actual.height(),
            total_difference,
            differing_pixels,
            normalized,
        })
    }

    pub fn is_similar(&self, report: &DifferenceReport) -> bool {
        report.normalized <= self.image_threshold()
    }

    /// Compare multi-frame images pairwise, keeping only non-empty reports.
    pub fn compare_sequences(
        &self,
        expected: &[RgbaView<'_>],
        actual: &[RgbaView<'_>],
    ) -> Result<Vec<DifferenceReport>, CompareError> {
        if expected.len() != actual.len() {
            return Err(CompareError::FrameCountMismatch {
                expected: expected.len(),
                actual: actual.len(),
            });
        }

        let mut reports = Vec::new();
        for (e, a) in expected.iter().zip(actual) {
            let report = self.compare(*a, *e)?;
            if !report.is_empty() {
                reports.push(report);
            }
        }
        Ok(reports)
    }
}

#[inline]
fn manhattan(a: &[u8], b: &[u8]) -> u32 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| u32::from(x.abs_diff(y)))
        .sum()
}
