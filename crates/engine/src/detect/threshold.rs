//! Threshold-crossing detection with hysteresis
//!
//! An anomaly window opens only after a configurable run of consecutive
//! samples strictly above the threshold, and closes only after an
//! equally long run at or below it. The hysteresis suppresses flapping
//! on noisy data in both directions.

use std::time::Duration;

use crate::models::{AnomalyEvent, EventError, Sample};
use crate::scoring;

use super::Detection;

/// Detects runs of samples above a static threshold
#[derive(Debug, Clone)]
pub struct ThresholdDetector {
    /// Values strictly above this open or extend an anomaly window
    pub threshold: f64,
    /// Consecutive confirming samples needed to open or close a window
    pub consecutive_periods: usize,
    /// Nominal minimum window duration for emission
    pub min_duration: Duration,
    kind: String,
}

impl ThresholdDetector {
    pub fn new(threshold: f64, consecutive_periods: usize, min_duration: Duration) -> Self {
        Self {
            threshold,
            consecutive_periods: consecutive_periods.max(1),
            min_duration,
            kind: "high_cpu".to_string(),
        }
    }

    /// Override the signal tag emitted on events
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Detect threshold-crossing anomalies in a sorted sample sequence
    ///
    /// Single pass, left to right. A window still open when the input
    /// ends is flushed as a completed event so every call returns a
    /// bounded event list.
    pub fn detect(&self, samples: &[Sample]) -> Result<Vec<AnomalyEvent>, EventError> {
        let mut events = Vec::new();
        let n = samples.len();
        let mut i = 0;

        while i < n {
            // Seek a run of consecutive samples strictly above threshold
            let mut consecutive_above = 0;
            let mut start = None;
            while i < n && consecutive_above < self.consecutive_periods {
                if samples[i].value > self.threshold {
                    consecutive_above += 1;
                    if consecutive_above == 1 {
                        start = Some(i);
                    }
                } else {
                    consecutive_above = 0;
                    start = None;
                }
                i += 1;
            }

            let Some(start) = start else { continue };
            if consecutive_above < self.consecutive_periods {
                continue;
            }

            // Window is open; it tolerates dips and only closes after a
            // full run of samples at or below threshold. `end` tracks the
            // last sample that was still above, so trailing noise inside
            // the closing run never stretches the window.
            let mut end = i - 1;
            let mut consecutive_below = 0;
            while i < n && consecutive_below < self.consecutive_periods {
                if samples[i].value <= self.threshold {
                    consecutive_below += 1;
                } else {
                    consecutive_below = 0;
                    end = i;
                }
                i += 1;
            }

            let window = &samples[start..=end];
            let duration =
                (samples[end].timestamp - samples[start].timestamp).num_milliseconds() as f64
                    / 1000.0;

            // Fallback: high-frequency sampling can make windows shorter
            // in wall time than the nominal minimum while still carrying
            // a full consecutive_periods of evidence.
            let min_required = self
                .min_duration
                .as_secs_f64()
                .min(self.consecutive_periods as f64);
            if duration >= min_required || window.len() >= self.consecutive_periods {
                events.push(self.window_event(window)?);
            }
        }

        Ok(events)
    }

    fn window_event(&self, window: &[Sample]) -> Result<AnomalyEvent, EventError> {
        let values: Vec<f64> = window.iter().map(|s| s.value).collect();
        let avg = crate::stats::mean(&values);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);

        AnomalyEvent::builder(&self.kind, "static_threshold")
            .start_time(window[0].timestamp)
            .end_time(window[window.len() - 1].timestamp)
            .severity(scoring::severity_from_level(avg))
            .confidence(scoring::confidence_from_deviation(
                avg - self.threshold,
                20.0,
            ))
            .metric("avg_value", avg)
            .metric("max_value", max)
            .metric("min_value", min)
            .metric("samples", window.len() as f64)
            .build()
    }
}

impl Detection for ThresholdDetector {
    fn name(&self) -> &str {
        "static_threshold"
    }

    fn detect(&mut self, samples: &[Sample]) -> Result<Vec<AnomalyEvent>, EventError> {
        ThresholdDetector::detect(self, samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn series(values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Sample::new(ts(i as i64), *v))
            .collect()
    }

    fn detector() -> ThresholdDetector {
        ThresholdDetector::new(80.0, 3, Duration::from_secs(300))
    }

    #[test]
    fn test_empty_input() {
        assert!(detector().detect(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_full_run_one_event() {
        let samples = series(&[85.0, 86.0, 87.0, 84.0, 85.0]);
        let events = detector().detect(&samples).unwrap();

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.start_time, ts(0));
        assert_eq!(event.end_time, Some(ts(4)));
        assert_eq!(event.severity, Severity::Warning);
        assert_eq!(event.metrics.get("samples"), Some(&5.0));
    }

    #[test]
    fn test_run_shorter_than_consecutive_periods() {
        let samples = series(&[85.0, 86.0, 40.0, 50.0, 60.0]);
        let events = detector().detect(&samples).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_exact_threshold_does_not_count() {
        // Strict inequality: values equal to the threshold are "below"
        let samples = series(&[80.0, 80.0, 80.0, 80.0, 80.0]);
        let events = detector().detect(&samples).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_window_tolerates_dips() {
        // One dip inside the window does not close it
        let samples = series(&[85.0, 86.0, 87.0, 70.0, 88.0, 89.0, 40.0, 40.0, 40.0]);
        let events = detector().detect(&samples).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start_time, ts(0));
        // Window ends at the last sample that was above threshold
        assert_eq!(events[0].end_time, Some(ts(5)));
    }

    #[test]
    fn test_two_separate_runs() {
        let samples = series(&[
            85.0, 86.0, 87.0, 40.0, 40.0, 40.0, 91.0, 92.0, 93.0, 40.0, 40.0, 40.0,
        ]);
        let events = detector().detect(&samples).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].start_time, ts(0));
        assert_eq!(events[1].start_time, ts(6));
    }

    #[test]
    fn test_open_window_flushed_at_end_of_input() {
        let samples = series(&[85.0, 86.0, 87.0, 88.0]);
        let events = detector().detect(&samples).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].end_time, Some(ts(3)));
    }

    #[test]
    fn test_severity_from_window_average() {
        let hot = series(&[97.0, 98.0, 97.0, 40.0, 40.0, 40.0]);
        let events = detector().detect(&hot).unwrap();
        assert_eq!(events[0].severity, Severity::Emergency);

        let critical = series(&[92.0, 93.0, 92.0, 40.0, 40.0, 40.0]);
        let events = detector().detect(&critical).unwrap();
        assert_eq!(events[0].severity, Severity::Critical);
    }

    #[test]
    fn test_confidence_saturates_at_one() {
        let samples = series(&[99.0, 99.0, 99.0, 99.0]);
        let events = detector().detect(&samples).unwrap();
        assert_eq!(events[0].confidence, 1.0);
    }

    #[test]
    fn test_detect_is_idempotent() {
        let samples = series(&[85.0, 86.0, 87.0, 40.0, 40.0, 40.0, 95.0, 96.0, 97.0]);
        let det = detector();
        let first = det.detect(&samples).unwrap();
        let second = det.detect(&samples).unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.start_time, b.start_time);
            assert_eq!(a.end_time, b.end_time);
            assert_eq!(a.severity, b.severity);
            assert_eq!(a.confidence, b.confidence);
        }
    }
}
