//! File-backed alert persistence
//!
//! Detected events only live as long as the process that found them;
//! the [`AlertStore`] writes them into a JSON file so later invocations
//! can list, acknowledge, and resolve them. One flat file, rewritten
//! whole on every mutation; the store is not meant for high volume or
//! concurrent writers.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::models::{AnomalyEvent, Severity};

const ALERTS_FILE: &str = "alerts.json";

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("alert file is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Lifecycle state of a recorded alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Acknowledged,
    Resolved,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Firing => write!(f, "firing"),
            AlertStatus::Acknowledged => write!(f, "acknowledged"),
            AlertStatus::Resolved => write!(f, "resolved"),
        }
    }
}

/// One persisted alert, derived from an [`AnomalyEvent`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Signal kind of the originating event, e.g. "high_cpu"
    pub kind: String,
    pub status: AlertStatus,
    pub severity: Severity,
    pub message: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub acknowledged_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub entity_key: Option<String>,
    pub metrics: BTreeMap<String, f64>,
}

impl Alert {
    fn from_event(event: &AnomalyEvent) -> Self {
        let entity = event
            .entity_key
            .as_deref()
            .map(|e| format!(" [{e}]"))
            .unwrap_or_default();
        Self {
            kind: event.kind.clone(),
            status: AlertStatus::Firing,
            severity: event.severity,
            message: format!(
                "{}{entity}: {} via {}, confidence {:.0}%",
                event.kind,
                event.severity,
                event.algorithm,
                event.confidence * 100.0
            ),
            started_at: event.start_time,
            ended_at: None,
            acknowledged_at: None,
            acknowledged_by: None,
            entity_key: event.entity_key.clone(),
            metrics: event.metrics.clone(),
        }
    }
}

/// JSON-file alert sink and query surface
pub struct AlertStore {
    alerts_path: PathBuf,
}

impl AlertStore {
    /// Open (creating if needed) the store directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, AlertError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            alerts_path: dir.join(ALERTS_FILE),
        })
    }

    /// Record a firing alert for a detected event
    pub fn record(&self, event: &AnomalyEvent) -> Result<Alert, AlertError> {
        let alert = Alert::from_event(event);
        let mut alerts = self.load()?;
        alerts.push(alert.clone());
        self.save(&alerts)?;
        debug!(kind = %alert.kind, "alert recorded");
        Ok(alert)
    }

    /// List alerts, optionally filtered by status and severity
    pub fn list(
        &self,
        status: Option<AlertStatus>,
        severity: Option<Severity>,
    ) -> Result<Vec<Alert>, AlertError> {
        let alerts = self.load()?;
        Ok(alerts
            .into_iter()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .filter(|a| severity.map_or(true, |s| a.severity == s))
            .collect())
    }

    /// Mark the oldest firing alert of a kind as acknowledged
    ///
    /// Returns false when no firing alert of that kind exists.
    pub fn acknowledge(&self, kind: &str, user: &str) -> Result<bool, AlertError> {
        let mut alerts = self.load()?;
        let Some(alert) = alerts
            .iter_mut()
            .find(|a| a.kind == kind && a.status == AlertStatus::Firing)
        else {
            return Ok(false);
        };
        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_at = Some(Utc::now());
        alert.acknowledged_by = Some(user.to_string());
        self.save(&alerts)?;
        Ok(true)
    }

    /// Mark the oldest open (firing or acknowledged) alert of a kind as
    /// resolved; returns false when none is open.
    pub fn resolve(&self, kind: &str) -> Result<bool, AlertError> {
        let mut alerts = self.load()?;
        let Some(alert) = alerts.iter_mut().find(|a| {
            a.kind == kind
                && matches!(a.status, AlertStatus::Firing | AlertStatus::Acknowledged)
        }) else {
            return Ok(false);
        };
        alert.status = AlertStatus::Resolved;
        alert.ended_at = Some(Utc::now());
        self.save(&alerts)?;
        Ok(true)
    }

    fn load(&self) -> Result<Vec<Alert>, AlertError> {
        if !self.alerts_path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.alerts_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, alerts: &[Alert]) -> Result<(), AlertError> {
        let content = serde_json::to_string_pretty(alerts)?;
        fs::write(&self.alerts_path, content)?;
        Ok(())
    }
}
