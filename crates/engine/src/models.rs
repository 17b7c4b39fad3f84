//! Core data model for the detection engine

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// One timestamped numeric observation of a monitored signal
///
/// Sequences handed to detectors are sorted ascending by timestamp;
/// detectors never mutate them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    /// Entity the observation belongs to (pid, device name), if any
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub entity_key: Option<String>,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            timestamp,
            value,
            entity_key: None,
        }
    }

    pub fn with_entity(timestamp: DateTime<Utc>, value: f64, entity_key: impl Into<String>) -> Self {
        Self {
            timestamp,
            value,
            entity_key: Some(entity_key.into()),
        }
    }
}

/// Anomaly severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
    Emergency,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
            Severity::Emergency => write!(f, "emergency"),
        }
    }
}

/// Errors raised when constructing an invalid [`AnomalyEvent`]
///
/// These indicate a detector bug, never bad input data, and must abort
/// the detection cycle instead of emitting a corrupt event.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("confidence must be within [0.0, 1.0], got {0}")]
    ConfidenceOutOfRange(f64),
    #[error("end_time {end} precedes start_time {start}")]
    EndBeforeStart {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("event for kind {0} is missing a start time")]
    MissingStartTime(String),
}

/// An anomaly detected by the engine
///
/// Immutable once built; ownership passes to the caller, which may
/// serialize, render, or discard it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_time: Option<DateTime<Utc>>,
    pub severity: Severity,
    /// Signal tag, e.g. "high_cpu", "memory_leak", "io_queue_congestion"
    pub kind: String,
    /// Evidence strength in [0.0, 1.0]; not a p-value
    pub confidence: f64,
    /// Numeric evidence supporting the classification
    pub metrics: BTreeMap<String, f64>,
    /// Baseline value the detection was judged against, if one was used
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub baseline: Option<f64>,
    /// Entity the anomaly belongs to (pid, device name), if any
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub entity_key: Option<String>,
    /// Detection algorithm that produced this event
    pub algorithm: String,
}

impl AnomalyEvent {
    /// Start building an event for the given signal kind and algorithm
    pub fn builder(kind: impl Into<String>, algorithm: impl Into<String>) -> EventBuilder {
        EventBuilder {
            kind: kind.into(),
            algorithm: algorithm.into(),
            start_time: None,
            end_time: None,
            severity: Severity::Warning,
            confidence: 0.5,
            metrics: BTreeMap::new(),
            baseline: None,
            entity_key: None,
        }
    }

    /// Event duration in seconds, if the window has an end
    pub fn duration_seconds(&self) -> Option<f64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds() as f64 / 1000.0)
    }
}

/// Validating builder for [`AnomalyEvent`]
///
/// `build` enforces the event invariants: severity is already closed by
/// the enum, confidence must lie in [0, 1], and `end_time` must not
/// precede `start_time`. Violations fail rather than clamp.
#[derive(Debug)]
pub struct EventBuilder {
    kind: String,
    algorithm: String,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    severity: Severity,
    confidence: f64,
    metrics: BTreeMap<String, f64>,
    baseline: Option<f64>,
    entity_key: Option<String>,
}

impl EventBuilder {
    pub fn start_time(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    pub fn end_time(mut self, end: DateTime<Utc>) -> Self {
        self.end_time = Some(end);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn baseline(mut self, baseline: f64) -> Self {
        self.baseline = Some(baseline);
        self
    }

    pub fn entity(mut self, entity_key: impl Into<String>) -> Self {
        self.entity_key = Some(entity_key.into());
        self
    }

    pub fn build(self) -> Result<AnomalyEvent, EventError> {
        let start_time = self
            .start_time
            .ok_or_else(|| EventError::MissingStartTime(self.kind.clone()))?;

        if !(0.0..=1.0).contains(&self.confidence) || self.confidence.is_nan() {
            return Err(EventError::ConfidenceOutOfRange(self.confidence));
        }

        if let Some(end) = self.end_time {
            if end < start_time {
                return Err(EventError::EndBeforeStart {
                    start: start_time,
                    end,
                });
            }
        }

        Ok(AnomalyEvent {
            id: Uuid::new_v4(),
            start_time,
            end_time: self.end_time,
            severity: self.severity,
            kind: self.kind,
            confidence: self.confidence,
            metrics: self.metrics,
            baseline: self.baseline,
            entity_key: self.entity_key,
            algorithm: self.algorithm,
        })
    }
}

/// A per-process observation used by the process-sequence report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub name: String,
    /// Kernel state letter from /proc/<pid>/stat: R, S, D, Z, T, ...
    pub state: char,
    pub ppid: u32,
    pub cpu_percent: f64,
    pub rss_bytes: u64,
}

impl ProcessSnapshot {
    pub fn is_zombie(&self) -> bool {
        self.state == 'Z'
    }
}

/// Renderable detection result
///
/// A closed set of shapes the output layer can receive, so formatters
/// pattern-match on the tag instead of inspecting concrete value types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Report {
    Samples(Vec<Sample>),
    Processes(Vec<ProcessSnapshot>),
    Events(Vec<AnomalyEvent>),
    Composite(Vec<Report>),
}
