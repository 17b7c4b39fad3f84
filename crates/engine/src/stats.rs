//! Baseline statistics and trend fitting
//!
//! Pure functions over sample windows: summary statistics for adaptive
//! baselines and ordinary least-squares regression for trend
//! extrapolation. Every division guards its denominator; degenerate
//! inputs yield a neutral value instead of NaN or Inf.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Sample;

/// Arithmetic mean; 0.0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation; 0.0 for fewer than two values
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Percentile with linear interpolation between ranks; 0.0 for empty input
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = rank - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Median of a slice; 0.0 for empty input
pub fn median(values: &[f64]) -> f64 {
    percentile(values, 50.0)
}

/// Summary statistics computed over a historical sample window
///
/// Derived on demand and never persisted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub percentile_95: f64,
    pub window_size: usize,
    pub computed_at: DateTime<Utc>,
}

impl Baseline {
    /// Compute a baseline from raw values; `None` for an empty window
    pub fn compute(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let min = values
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        let max = values
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);

        Some(Self {
            mean: mean(values),
            std_dev: std_dev(values),
            min,
            max,
            percentile_95: percentile(values, 95.0),
            window_size: values.len(),
            computed_at: Utc::now(),
        })
    }

    /// Adaptive threshold: mean plus `multiplier` standard deviations
    pub fn threshold(&self, multiplier: f64) -> f64 {
        self.mean + self.std_dev * multiplier
    }
}

/// Least-squares linear fit of a sample stream against elapsed time
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrendFit {
    pub slope_per_second: f64,
    pub intercept: f64,
    /// Goodness of fit in [0, 1]; below a caller's minimum means "no usable trend"
    pub r_squared: f64,
}

impl TrendFit {
    /// Value the fitted line predicts at `elapsed` seconds from the first sample
    pub fn predict(&self, elapsed: f64) -> f64 {
        self.slope_per_second * elapsed + self.intercept
    }
}

/// Fit a trend over borrowed samples, x being seconds since the first one
///
/// Returns `None` when there are fewer than two samples or no elapsed
/// time spread to regress against.
pub fn fit_trend(samples: &[&Sample]) -> Option<TrendFit> {
    let n = samples.len() as f64;
    if samples.len() < 2 {
        return None;
    }

    let t0 = samples[0].timestamp;
    let xs: Vec<f64> = samples
        .iter()
        .map(|s| (s.timestamp - t0).num_milliseconds() as f64 / 1000.0)
        .collect();

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;
    for (x, s) in xs.iter().zip(samples.iter()) {
        sum_x += x;
        sum_y += s.value;
        sum_xy += x * s.value;
        sum_xx += x * x;
    }

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return None;
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;

    let mean_y = sum_y / n;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (x, s) in xs.iter().zip(samples.iter()) {
        let predicted = slope * x + intercept;
        ss_res += (s.value - predicted).powi(2);
        ss_tot += (s.value - mean_y).powi(2);
    }

    let r_squared = if ss_tot.abs() < f64::EPSILON {
        0.0
    } else {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    };

    Some(TrendFit {
        slope_per_second: slope,
        intercept,
        r_squared,
    })
}
