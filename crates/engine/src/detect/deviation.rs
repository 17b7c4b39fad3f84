//! Spike and sustained-deviation detection
//!
//! A dual test generalized over signal types that misbehave in two
//! distinct ways: a single sample far beyond a baseline (spike), or a
//! run of samples camped beyond an absolute limit (sustained). The two
//! sub-tests are independent; either or both can be enabled.
//!
//! Samples are grouped by entity key so one hot device cannot hide
//! behind quiet siblings.

use crate::models::{AnomalyEvent, EventError, Sample, Severity};
use crate::scoring;
use crate::stats;

use super::{group_by_entity, Detection};

/// Which side of the baseline counts as anomalous
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Above,
    Below,
}

/// Where the reference baseline for a group comes from
///
/// Drop-style signals baseline on their healthy (upper) half so a
/// degraded stretch cannot drag the reference down with it; level-style
/// signals use the calmer (lower) half or the leading half for the
/// mirror-image reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineSource {
    FirstHalfMean,
    LowerHalfMedian,
    UpperHalfMedian,
    OverallMedian,
}

impl BaselineSource {
    fn compute(self, values: &[f64]) -> f64 {
        let half = (values.len() / 2).max(1);
        match self {
            BaselineSource::FirstHalfMean => stats::mean(&values[..half]),
            BaselineSource::LowerHalfMedian | BaselineSource::UpperHalfMedian => {
                let mut sorted = values.to_vec();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                if self == BaselineSource::LowerHalfMedian {
                    stats::median(&sorted[..half])
                } else {
                    stats::median(&sorted[values.len() / 2..])
                }
            }
            BaselineSource::OverallMedian => stats::median(values),
        }
    }
}

/// Detects instantaneous spikes and sustained runs beyond a limit
#[derive(Debug, Clone)]
pub struct DeviationDetector {
    kind: String,
    pub direction: Direction,
    /// Above: absolute limit (also the spike floor). Below: percent
    /// drop from baseline that marks the sustained limit.
    pub absolute_threshold: f64,
    /// Multiple of baseline a single sample must pass to spike;
    /// `None` disables the spike test
    pub spike_multiplier: Option<f64>,
    /// Fraction of the group a run must cover to count as sustained;
    /// `None` disables the sustained test
    pub sustained_ratio: Option<f64>,
    /// Minimum samples per group before either test runs
    pub min_samples: usize,
    /// Events scoring below this confidence are dropped
    pub min_confidence: f64,
    pub baseline_source: BaselineSource,
}

impl DeviationDetector {
    pub fn new(
        kind: impl Into<String>,
        direction: Direction,
        absolute_threshold: f64,
        baseline_source: BaselineSource,
    ) -> Self {
        Self {
            kind: kind.into(),
            direction,
            absolute_threshold,
            spike_multiplier: None,
            sustained_ratio: None,
            min_samples: 10,
            min_confidence: 0.0,
            baseline_source,
        }
    }

    pub fn with_spike(mut self, multiplier: f64) -> Self {
        self.spike_multiplier = Some(multiplier);
        self
    }

    pub fn with_sustained(mut self, ratio: f64) -> Self {
        self.sustained_ratio = Some(ratio);
        self
    }

    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples.max(2);
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Swap usage percent: camping over the limit and sudden jumps both
    /// matter, and thrashing tends to start abruptly, so the leading
    /// half is the calm reference.
    pub fn swap(threshold_percent: f64, spike_multiplier: f64) -> Self {
        Self::new(
            "swap_anomaly",
            Direction::Above,
            threshold_percent,
            BaselineSource::FirstHalfMean,
        )
        .with_spike(spike_multiplier)
        .with_sustained(0.3)
        .with_min_confidence(0.7)
    }

    /// Per-device await latency in ms; spike-only, with the absolute
    /// threshold as a floor so quiet disks don't alert on microsecond noise
    pub fn io_latency(op: &str, threshold_ms: f64, spike_multiplier: f64) -> Self {
        Self::new(
            format!("high_{op}_latency"),
            Direction::Above,
            threshold_ms,
            BaselineSource::LowerHalfMedian,
        )
        .with_spike(spike_multiplier)
        .with_min_confidence(0.7)
    }

    /// Per-device throughput in bytes/s; a drop-style signal judged
    /// against the healthy upper half
    pub fn throughput(op: &str, drop_percent: f64, spike_multiplier: f64) -> Self {
        Self::new(
            format!("{op}_throughput_drop"),
            Direction::Below,
            drop_percent,
            BaselineSource::UpperHalfMedian,
        )
        .with_spike(spike_multiplier)
        .with_sustained(0.3)
        .with_min_confidence(0.7)
    }

    /// Per-device in-flight I/O count; only sustained pressure matters,
    /// momentary bursts are normal
    pub fn queue_depth(threshold: f64, sustained_ratio: f64) -> Self {
        Self::new(
            "high_queue_depth",
            Direction::Above,
            threshold,
            BaselineSource::OverallMedian,
        )
        .with_sustained(sustained_ratio)
        .with_min_confidence(0.7)
        .with_min_samples(5)
    }

    /// Detect spikes and sustained runs across all entity groups
    pub fn detect(&self, samples: &[Sample]) -> Result<Vec<AnomalyEvent>, EventError> {
        let mut events = Vec::new();
        for (entity, group) in group_by_entity(samples) {
            if group.len() < self.min_samples {
                continue;
            }
            self.analyze_group(entity.as_deref(), &group, &mut events)?;
        }
        Ok(events)
    }

    fn analyze_group(
        &self,
        entity: Option<&str>,
        group: &[&Sample],
        events: &mut Vec<AnomalyEvent>,
    ) -> Result<(), EventError> {
        let values: Vec<f64> = group.iter().map(|s| s.value).collect();
        let baseline = self.baseline_source.compute(&values);

        if let Some(ratio) = self.sustained_ratio {
            self.sustained_test(entity, group, baseline, ratio, events)?;
        }
        if let Some(multiplier) = self.spike_multiplier {
            self.spike_test(entity, group, baseline, multiplier, events)?;
        }
        Ok(())
    }

    /// Absolute limit the sustained test holds samples against
    fn sustained_threshold(&self, baseline: f64) -> f64 {
        match self.direction {
            Direction::Above => self.absolute_threshold,
            Direction::Below => baseline * (1.0 - self.absolute_threshold / 100.0),
        }
    }

    fn beyond(&self, value: f64, threshold: f64) -> bool {
        match self.direction {
            Direction::Above => value > threshold,
            Direction::Below => value < threshold,
        }
    }

    fn sustained_test(
        &self,
        entity: Option<&str>,
        group: &[&Sample],
        baseline: f64,
        sustained_ratio: f64,
        events: &mut Vec<AnomalyEvent>,
    ) -> Result<(), EventError> {
        let threshold = self.sustained_threshold(baseline);
        if self.direction == Direction::Below && baseline.abs() < f64::EPSILON {
            return Ok(());
        }

        let n = group.len();
        let mut i = 0;
        while i < n {
            if !self.beyond(group[i].value, threshold) {
                i += 1;
                continue;
            }
            let start = i;
            while i < n && self.beyond(group[i].value, threshold) {
                i += 1;
            }
            let run = &group[start..i];
            let run_ratio = run.len() as f64 / n as f64;
            if run_ratio < sustained_ratio {
                continue;
            }

            let run_values: Vec<f64> = run.iter().map(|s| s.value).collect();
            let run_avg = stats::mean(&run_values);
            let excess = match self.direction {
                Direction::Above => scoring::safe_ratio(run_avg - threshold, threshold.abs()),
                Direction::Below => scoring::safe_ratio(threshold - run_avg, threshold.abs()),
            };
            let confidence = scoring::confidence_from_evidence(run_ratio, excess);
            if confidence < self.min_confidence {
                continue;
            }
            let severity = if run_ratio >= 0.75 || excess >= 1.0 {
                Severity::Critical
            } else {
                Severity::Warning
            };

            let mut builder = AnomalyEvent::builder(&self.kind, "spike_sustained")
                .start_time(run[0].timestamp)
                .end_time(run[run.len() - 1].timestamp)
                .severity(severity)
                .confidence(confidence)
                .metric("avg_value", run_avg)
                .metric("threshold", threshold)
                .metric("run_ratio", run_ratio)
                .metric("samples", run.len() as f64)
                .baseline(baseline);
            if let Some(entity) = entity {
                builder = builder.entity(entity);
            }
            events.push(builder.build()?);
        }
        Ok(())
    }

    fn spike_test(
        &self,
        entity: Option<&str>,
        group: &[&Sample],
        baseline: f64,
        multiplier: f64,
        events: &mut Vec<AnomalyEvent>,
    ) -> Result<(), EventError> {
        if baseline.abs() < f64::EPSILON {
            return Ok(());
        }
        let threshold = match self.direction {
            // The absolute threshold doubles as a floor so a near-zero
            // baseline cannot produce a hair-trigger multiple.
            Direction::Above => (baseline * multiplier).max(self.absolute_threshold),
            Direction::Below => baseline / multiplier,
        };

        let spikes: Vec<&&Sample> = group
            .iter()
            .filter(|s| self.beyond(s.value, threshold))
            .collect();
        if spikes.is_empty() {
            return Ok(());
        }
        let spike_ratio = spikes.len() as f64 / group.len() as f64;

        // One event per spiking sample; adjacent spikes are not merged
        for sample in spikes {
            let magnitude = match self.direction {
                Direction::Above => scoring::safe_ratio(sample.value, baseline * multiplier),
                Direction::Below => scoring::safe_ratio(baseline / multiplier, sample.value.max(f64::EPSILON)),
            };
            let confidence = scoring::confidence_from_evidence(spike_ratio, magnitude);
            if confidence < self.min_confidence {
                continue;
            }
            let severity = if magnitude >= 2.0 {
                Severity::Critical
            } else {
                Severity::Warning
            };

            let mut builder = AnomalyEvent::builder(&self.kind, "spike_sustained")
                .start_time(sample.timestamp)
                .end_time(sample.timestamp)
                .severity(severity)
                .confidence(confidence)
                .metric("value", sample.value)
                .metric("spike_threshold", threshold)
                .metric("magnitude", magnitude)
                .metric("spike_ratio", spike_ratio)
                .baseline(baseline);
            if let Some(entity) = entity {
                builder = builder.entity(entity);
            }
            events.push(builder.build()?);
        }
        Ok(())
    }
}

impl Detection for DeviationDetector {
    fn name(&self) -> &str {
        "spike_sustained"
    }

    fn detect(&mut self, samples: &[Sample]) -> Result<Vec<AnomalyEvent>, EventError> {
        DeviationDetector::detect(self, samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn device_series(device: &str, values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Sample::with_entity(ts(i as i64), *v, device))
            .collect()
    }

    #[test]
    fn test_empty_input() {
        let detector = DeviationDetector::queue_depth(10.0, 0.3);
        assert!(detector.detect(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_spike_boundary_against_calm_baseline() {
        // Calm lower half at 10, multiplier 2.0: the spike line is 20
        let detector = DeviationDetector::new(
            "high_read_latency",
            Direction::Above,
            0.0,
            BaselineSource::LowerHalfMedian,
        )
        .with_spike(2.0)
        .with_min_samples(2);

        let samples = series(&[10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 25.0, 15.0]);
        let events = detector.detect(&samples).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].metrics["value"], 25.0);
        assert_eq!(events[0].baseline, Some(10.0));
    }

    #[test]
    fn test_spike_floor_suppresses_low_absolute_values() {
        // Baseline 2ms, multiplier 3: the multiple alone would fire at
        // 6ms, but the 100ms floor keeps quiet disks quiet
        let detector = DeviationDetector::io_latency("read", 100.0, 3.0).with_min_samples(2);
        let samples = device_series("sda", &[2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 8.0]);
        assert!(detector.detect(&samples).unwrap().is_empty());

        let samples = device_series("sda", &[2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 150.0]);
        let events = detector.detect(&samples).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "high_read_latency");
        assert_eq!(events[0].entity_key.as_deref(), Some("sda"));
    }

    #[test]
    fn test_sustained_run_over_queue_limit() {
        let detector = DeviationDetector::queue_depth(10.0, 0.3);
        // Half the window camped over the limit
        let samples = device_series("sda", &[2.0, 3.0, 2.0, 20.0, 22.0, 21.0, 20.0, 2.0]);
        let events = detector.detect(&samples).unwrap();

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.start_time, ts(3));
        assert_eq!(event.end_time, Some(ts(6)));
        assert_eq!(event.severity, Severity::Critical); // avg 20.75 vs limit 10
        assert!(event.confidence >= 0.7);
    }

    #[test]
    fn test_short_run_not_sustained() {
        let detector = DeviationDetector::queue_depth(10.0, 0.5);
        let samples = device_series("sda", &[2.0, 3.0, 2.0, 20.0, 22.0, 2.0, 3.0, 2.0]);
        assert!(detector.detect(&samples).unwrap().is_empty());
    }

    #[test]
    fn test_throughput_drop_is_sustained_below() {
        // Healthy upper half at 100 MB/s, 50% drop line at 50
        let detector = DeviationDetector::throughput("read", 50.0, 4.0);
        let samples = device_series(
            "sda",
            &[100.0, 100.0, 100.0, 100.0, 100.0, 10.0, 12.0, 11.0, 10.0, 12.0],
        );
        let events = detector.detect(&samples).unwrap();

        // The collapse fires both the sustained run and per-sample
        // drop spikes below baseline/multiplier = 25
        let sustained: Vec<_> = events
            .iter()
            .filter(|e| e.metrics.contains_key("run_ratio"))
            .collect();
        assert_eq!(sustained.len(), 1);
        assert_eq!(sustained[0].kind, "read_throughput_drop");
        assert_eq!(sustained[0].start_time, ts(5));
        assert_eq!(sustained[0].end_time, Some(ts(9)));
        assert_eq!(sustained[0].baseline, Some(100.0));
    }

    #[test]
    fn test_swap_runs_both_tests() {
        // Calm first half near 5%, then camped at 80%+ for half the window
        let detector = DeviationDetector::swap(50.0, 3.0);
        let samples = series(&[5.0, 5.0, 6.0, 5.0, 5.0, 80.0, 85.0, 90.0, 85.0, 80.0]);
        let events = detector.detect(&samples).unwrap();

        let sustained = events.iter().filter(|e| e.metrics.contains_key("run_ratio"));
        let spikes = events.iter().filter(|e| e.metrics.contains_key("spike_ratio"));
        assert_eq!(sustained.count(), 1);
        assert_eq!(spikes.count(), 5);
    }

    #[test]
    fn test_min_confidence_filters_weak_spikes() {
        let mut values = vec![10.0; 39];
        values.push(25.0); // one spike in forty samples
        let detector = DeviationDetector::new(
            "swap_anomaly",
            Direction::Above,
            0.0,
            BaselineSource::LowerHalfMedian,
        )
        .with_spike(2.0)
        .with_min_confidence(0.9);

        assert!(detector.detect(&series(&values)).unwrap().is_empty());
    }

    #[test]
    fn test_groups_are_independent() {
        let detector = DeviationDetector::queue_depth(10.0, 0.3);
        let mut samples = device_series("sda", &[20.0, 21.0, 22.0, 20.0, 21.0]);
        samples.extend(device_series("sdb", &[1.0, 2.0, 1.0, 2.0, 1.0]));
        samples.sort_by_key(|s| s.timestamp);

        let events = detector.detect(&samples).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].entity_key.as_deref(), Some("sda"));
    }

    #[test]
    fn test_group_below_min_samples_skipped() {
        let detector = DeviationDetector::queue_depth(10.0, 0.3).with_min_samples(10);
        let samples = device_series("sda", &[20.0, 21.0, 22.0]);
        assert!(detector.detect(&samples).unwrap().is_empty());
    }

    #[test]
    fn test_zero_baseline_never_divides() {
        let detector = DeviationDetector::throughput("write", 50.0, 4.0);
        let samples = device_series("sda", &[0.0; 12]);
        assert!(detector.detect(&samples).unwrap().is_empty());
    }
}
