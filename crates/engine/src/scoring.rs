//! Shared severity and confidence scoring
//!
//! Every detector maps its evidence onto severity and confidence
//! through these helpers so the formulas cannot drift between signal
//! types. Confidence is an evidence-strength score in [0, 1], not a
//! statistical p-value.

use crate::models::Severity;

/// Severity from an average level on a 0-100 scale
pub fn severity_from_level(avg: f64) -> Severity {
    if avg > 95.0 {
        Severity::Emergency
    } else if avg > 90.0 {
        Severity::Critical
    } else {
        Severity::Warning
    }
}

/// Severity from a z-score against a statistical baseline
pub fn severity_from_z(z_score: f64) -> Severity {
    if z_score > 4.0 {
        Severity::Emergency
    } else if z_score > 3.0 {
        Severity::Critical
    } else {
        Severity::Warning
    }
}

/// Severity from predicted hours until a capacity breach
pub fn severity_from_time_to_breach(hours: f64) -> Severity {
    if hours < 1.0 {
        Severity::Emergency
    } else if hours < 6.0 {
        Severity::Critical
    } else {
        Severity::Warning
    }
}

/// Confidence from how far the evidence deviates past a threshold
///
/// `scale` is the deviation at which confidence saturates above the
/// 0.5 floor. A non-positive scale contributes nothing.
pub fn confidence_from_deviation(deviation: f64, scale: f64) -> f64 {
    if scale <= f64::EPSILON {
        return 0.5;
    }
    (0.5 + deviation / scale).clamp(0.0, 1.0)
}

/// Confidence from spike/run evidence
///
/// `ratio` is the fraction of samples involved; `magnitude` is a ratio
/// of the extreme value to the baseline, capped at 1.0 before
/// weighting.
pub fn confidence_from_evidence(ratio: f64, magnitude: f64) -> f64 {
    (0.5 + ratio * 0.3 + magnitude.min(1.0) * 0.2).clamp(0.0, 1.0)
}

/// Division with a neutral result for a vanishing denominator
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() < f64::EPSILON {
        0.0
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_severity_bands() {
        assert_eq!(severity_from_level(96.0), Severity::Emergency);
        assert_eq!(severity_from_level(92.0), Severity::Critical);
        assert_eq!(severity_from_level(85.0), Severity::Warning);
        // Boundaries are strict
        assert_eq!(severity_from_level(95.0), Severity::Critical);
        assert_eq!(severity_from_level(90.0), Severity::Warning);
    }

    #[test]
    fn test_z_severity_bands() {
        assert_eq!(severity_from_z(4.5), Severity::Emergency);
        assert_eq!(severity_from_z(3.5), Severity::Critical);
        assert_eq!(severity_from_z(2.0), Severity::Warning);
    }

    #[test]
    fn test_breach_severity_bands() {
        assert_eq!(severity_from_time_to_breach(0.5), Severity::Emergency);
        assert_eq!(severity_from_time_to_breach(3.0), Severity::Critical);
        assert_eq!(severity_from_time_to_breach(12.0), Severity::Warning);
    }

    #[test]
    fn test_confidence_is_bounded() {
        assert_eq!(confidence_from_deviation(1000.0, 20.0), 1.0);
        assert!((confidence_from_deviation(5.0, 20.0) - 0.75).abs() < 1e-9);
        assert_eq!(confidence_from_deviation(1.0, 0.0), 0.5);

        assert_eq!(confidence_from_evidence(1.0, 100.0), 1.0);
        assert!((confidence_from_evidence(0.5, 0.5) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_safe_ratio() {
        assert_eq!(safe_ratio(10.0, 0.0), 0.0);
        assert!((safe_ratio(10.0, 4.0) - 2.5).abs() < 1e-9);
    }
}
