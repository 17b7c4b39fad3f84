//! Baseline/z-score detection
//!
//! Splits the input at the 90% mark: the leading 90% forms the
//! historical window the baseline is computed from, the trailing 10%
//! is test data judged against it.

use crate::models::{AnomalyEvent, EventError, Sample};
use crate::scoring;
use crate::stats::Baseline;

use super::Detection;

/// Minimum historical samples before a baseline is trusted
const MIN_HISTORY: usize = 10;

/// Detects samples deviating from an adaptive statistical baseline
#[derive(Debug, Clone)]
pub struct BaselineDetector {
    /// Standard deviations above the mean that mark an anomaly
    pub std_multiplier: f64,
    kind: String,
    baseline: Option<Baseline>,
}

impl BaselineDetector {
    pub fn new(std_multiplier: f64) -> Self {
        Self {
            std_multiplier,
            kind: "high_cpu".to_string(),
            baseline: None,
        }
    }

    /// Override the signal tag emitted on events
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// The baseline computed by the most recent `detect` call
    ///
    /// Recomputed in full on every call; retained only for display.
    pub fn baseline(&self) -> Option<&Baseline> {
        self.baseline.as_ref()
    }

    /// Detect baseline deviations in a sorted sample sequence
    ///
    /// One event per offending test sample; runs are not merged.
    pub fn detect(&mut self, samples: &[Sample]) -> Result<Vec<AnomalyEvent>, EventError> {
        if samples.len() < MIN_HISTORY {
            return Ok(Vec::new());
        }

        let split = (samples.len() as f64 * 0.9) as usize;
        let (history, test) = samples.split_at(split);
        if history.len() < MIN_HISTORY {
            return Ok(Vec::new());
        }

        let values: Vec<f64> = history.iter().map(|s| s.value).collect();
        let Some(baseline) = Baseline::compute(&values) else {
            return Ok(Vec::new());
        };
        let threshold = baseline.threshold(self.std_multiplier);

        let mut events = Vec::new();
        for sample in test {
            if sample.value > threshold {
                events.push(self.sample_event(sample, &baseline, threshold)?);
            }
        }

        self.baseline = Some(baseline);
        Ok(events)
    }

    fn sample_event(
        &self,
        sample: &Sample,
        baseline: &Baseline,
        threshold: f64,
    ) -> Result<AnomalyEvent, EventError> {
        let z_score = scoring::safe_ratio(sample.value - baseline.mean, baseline.std_dev);

        let mut builder = AnomalyEvent::builder(&self.kind, "dynamic_baseline")
            .start_time(sample.timestamp)
            .end_time(sample.timestamp)
            .severity(scoring::severity_from_z(z_score))
            .confidence(scoring::confidence_from_deviation(z_score, 10.0))
            .metric("value", sample.value)
            .metric("baseline_mean", baseline.mean)
            .metric("threshold", threshold)
            .metric("z_score", z_score)
            .baseline(baseline.mean);

        if let Some(entity) = &sample.entity_key {
            builder = builder.entity(entity.clone());
        }
        builder.build()
    }
}

impl Detection for BaselineDetector {
    fn name(&self) -> &str {
        "dynamic_baseline"
    }

    fn detect(&mut self, samples: &[Sample]) -> Result<Vec<AnomalyEvent>, EventError> {
        BaselineDetector::detect(self, samples)
    }
}
