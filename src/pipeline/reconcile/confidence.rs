//! Consensus confidence arithmetic. All values on the 0–100 scale.

use crate::models::OcrQuality;

/// Confidence bands used for run metadata and warnings.
pub mod thresholds {
    /// Below this: recognition likely failed.
    pub const VERY_LOW: f32 = 30.0;

    /// Below this: significant uncertainty.
    pub const LOW: f32 = 50.0;

    /// Below this: some uncertainty.
    pub const MODERATE: f32 = 70.0;

    /// At or above this: very high confidence.
    pub const HIGH: f32 = 85.0;
}

/// Probability that at least one independent reading is right.
///
/// Never below the largest input, so agreement can only raise confidence.
pub fn noisy_or(confidences: impl IntoIterator<Item = f32>) -> f32 {
    let miss: f32 = confidences
        .into_iter()
        .map(|c| 1.0 - (c / 100.0).clamp(0.0, 1.0))
        .product();
    (100.0 * (1.0 - miss)).clamp(0.0, 100.0)
}

/// Confidence of a region whose readings disagree.
///
/// With an agreeing majority of two or more, their combined confidence is
/// discounted by severity weighted by the dissenting share of total
/// confidence. Otherwise the weakest reading bounds the result, discounted
/// by the full severity.
pub fn disagreement_confidence(agreeing: &[f32], dissenting: &[f32], severity: f32) -> f32 {
    let severity = severity.clamp(0.0, 1.0);
    if agreeing.len() >= 2 {
        let total: f32 = agreeing.iter().chain(dissenting).sum();
        let dissent_share = if total > 0.0 {
            dissenting.iter().sum::<f32>() / total
        } else {
            1.0
        };
        noisy_or(agreeing.iter().copied()) * (1.0 - severity * dissent_share)
    } else {
        let weakest = agreeing
            .iter()
            .chain(dissenting)
            .copied()
            .fold(f32::INFINITY, f32::min);
        if weakest.is_finite() {
            weakest * (1.0 - severity)
        } else {
            0.0
        }
    }
}

/// Arithmetic mean, or `None` when empty.
pub fn mean(values: impl IntoIterator<Item = f32>) -> Option<f32> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0f32, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f32)
    }
}

/// Map a mean region confidence onto a quality band.
pub fn classify_quality(mean_confidence: f32) -> OcrQuality {
    if mean_confidence < thresholds::VERY_LOW {
        OcrQuality::VeryLow
    } else if mean_confidence < thresholds::LOW {
        OcrQuality::Low
    } else if mean_confidence < thresholds::MODERATE {
        OcrQuality::Moderate
    } else if mean_confidence < thresholds::HIGH {
        OcrQuality::High
    } else {
        OcrQuality::VeryHigh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noisy_or_of_one_reading_is_that_reading() {
        assert!((noisy_or([73.0]) - 73.0).abs() < 1e-4);
    }

    #[test]
    fn noisy_or_combines_agreement() {
        // 1 - 0.08 * 0.12 = 0.9904
        let c = noisy_or([92.0, 88.0]);
        assert!((c - 99.04).abs() < 1e-3, "Expected 99.04, got {c}");
    }

    #[test]
    fn noisy_or_of_nothing_is_zero() {
        assert_eq!(noisy_or(std::iter::empty()), 0.0);
    }

    #[test]
    fn majority_disagreement_is_discounted_by_dissent_share() {
        let c = disagreement_confidence(&[92.0, 88.0], &[60.0], 1.0 / 12.0);
        assert!(c > 92.0, "Expected > 92, got {c}");
        assert!(c < 99.04, "Expected below the undisputed value, got {c}");
    }

    #[test]
    fn pair_disagreement_falls_below_weakest() {
        let c = disagreement_confidence(&[80.0], &[75.0], 0.1);
        assert!((c - 67.5).abs() < 1e-4, "Expected 67.5, got {c}");
    }

    #[test]
    fn quality_bands() {
        assert_eq!(classify_quality(12.0), OcrQuality::VeryLow);
        assert_eq!(classify_quality(30.0), OcrQuality::Low);
        assert_eq!(classify_quality(55.0), OcrQuality::Moderate);
        assert_eq!(classify_quality(84.9), OcrQuality::High);
        assert_eq!(classify_quality(85.0), OcrQuality::VeryHigh);
    }

    #[test]
    fn mean_of_empty_is_none() {
        assert_eq!(mean(Vec::<f32>::new()), None);
        assert_eq!(mean([40.0, 60.0]), Some(50.0));
    }
}
