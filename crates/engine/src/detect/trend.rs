//! Trend-extrapolation detection
//!
//! Fits a least-squares line through each entity's samples and projects
//! it forward to predict when the signal crosses a capacity limit. The
//! detector answers "will this become a problem soon", not "is growth
//! present": growth past the threshold without a predicted breach
//! inside the prediction window emits nothing.

use std::time::Duration;

use chrono::Duration as ChronoDuration;

use crate::models::{AnomalyEvent, EventError, Sample};
use crate::scoring;
use crate::stats::fit_trend;

use super::{group_by_entity, Detection};

/// Predicts capacity breaches from per-entity growth trends
#[derive(Debug, Clone)]
pub struct TrendDetector {
    kind: String,
    /// Minimum samples per entity before a trend is trusted
    pub min_samples: usize,
    /// Growth rate (signal units per hour) that must be exceeded
    pub growth_threshold: f64,
    /// Minimum r-squared for the fit to count as a usable trend
    pub confidence_threshold: f64,
    /// Signal level whose crossing constitutes a breach
    pub capacity_limit: f64,
    /// Breaches predicted beyond this horizon are ignored
    pub prediction_window: Duration,
}

impl TrendDetector {
    pub fn new(
        kind: impl Into<String>,
        min_samples: usize,
        growth_threshold: f64,
        confidence_threshold: f64,
        capacity_limit: f64,
        prediction_window: Duration,
    ) -> Self {
        Self {
            kind: kind.into(),
            min_samples: min_samples.max(2),
            growth_threshold,
            confidence_threshold,
            capacity_limit,
            prediction_window,
        }
    }

    /// Per-process memory leak preset: resident size in MB, grouped by
    /// pid, judged against an assumed per-process ceiling.
    pub fn leak(growth_threshold_mb: f64, confidence_threshold: f64) -> Self {
        Self::new(
            "memory_leak",
            100,
            growth_threshold_mb,
            confidence_threshold,
            16.0 * 1024.0,
            Duration::from_secs(24 * 3600),
        )
    }

    /// System-wide exhaustion preset: usage percent against the risk
    /// threshold, whole-system group, any positive growth counts.
    pub fn exhaustion(risk_threshold_percent: f64, prediction_window: Duration) -> Self {
        Self::new(
            "oom_risk",
            30,
            0.0,
            0.5,
            risk_threshold_percent,
            prediction_window,
        )
    }

    /// Detect predicted capacity breaches, one event per trending entity
    pub fn detect(&self, samples: &[Sample]) -> Result<Vec<AnomalyEvent>, EventError> {
        if samples.is_empty() {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        for (entity, group) in group_by_entity(samples) {
            if group.len() < self.min_samples {
                continue;
            }
            if let Some(event) = self.analyze_group(entity.as_deref(), &group)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn analyze_group(
        &self,
        entity: Option<&str>,
        group: &[&Sample],
    ) -> Result<Option<AnomalyEvent>, EventError> {
        let Some(fit) = fit_trend(group) else {
            return Ok(None);
        };
        let growth_per_hour = fit.slope_per_second * 3600.0;

        if growth_per_hour <= self.growth_threshold
            || fit.r_squared <= self.confidence_threshold
            || fit.slope_per_second <= 0.0
        {
            return Ok(None);
        }

        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            return Ok(None);
        };

        let remaining = self.capacity_limit - last.value;
        let seconds_to_breach = if remaining <= 0.0 {
            0.0
        } else {
            remaining / fit.slope_per_second
        };
        if seconds_to_breach > self.prediction_window.as_secs_f64() {
            return Ok(None);
        }

        let hours_to_breach = seconds_to_breach / 3600.0;
        let breach_time =
            last.timestamp + ChronoDuration::milliseconds((seconds_to_breach * 1000.0) as i64);

        let mut builder = AnomalyEvent::builder(&self.kind, "trend_extrapolation")
            .start_time(first.timestamp)
            .end_time(last.timestamp)
            .severity(scoring::severity_from_time_to_breach(hours_to_breach))
            .confidence(fit.r_squared)
            .metric("initial_value", first.value)
            .metric("final_value", last.value)
            .metric("total_growth", last.value - first.value)
            .metric("growth_per_hour", growth_per_hour)
            .metric("r_squared", fit.r_squared)
            .metric("capacity_limit", self.capacity_limit)
            .metric("time_to_breach_hours", hours_to_breach)
            .metric("predicted_breach_at", breach_time.timestamp() as f64)
            .metric("samples", group.len() as f64);

        if let Some(entity) = entity {
            builder = builder.entity(entity);
        }
        builder.build().map(Some)
    }
}

impl Detection for TrendDetector {
    fn name(&self) -> &str {
        "trend_extrapolation"
    }

    fn detect(&mut self, samples: &[Sample]) -> Result<Vec<AnomalyEvent>, EventError> {
        TrendDetector::detect(self, samples)
    }
}
