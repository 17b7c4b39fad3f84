//! `opswatch alerts`: inspect and manage persisted alerts

use std::path::Path;

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use opswatch_engine::{Alert, AlertStatus, AlertStore, Severity};
use tabled::{settings::Style, Table, Tabled};

use crate::output::OutputFormat;

/// Default storage directory shared with `monitor --alert-dir`
pub const DEFAULT_ALERT_DIR: &str = "/tmp/opswatch/alerts";

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusFilter {
    Firing,
    Acknowledged,
    Resolved,
}

impl From<StatusFilter> for AlertStatus {
    fn from(filter: StatusFilter) -> Self {
        match filter {
            StatusFilter::Firing => AlertStatus::Firing,
            StatusFilter::Acknowledged => AlertStatus::Acknowledged,
            StatusFilter::Resolved => AlertStatus::Resolved,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SeverityFilter {
    Warning,
    Critical,
    Emergency,
}

impl From<SeverityFilter> for Severity {
    fn from(filter: SeverityFilter) -> Self {
        match filter {
            SeverityFilter::Warning => Severity::Warning,
            SeverityFilter::Critical => Severity::Critical,
            SeverityFilter::Emergency => Severity::Emergency,
        }
    }
}

pub fn list(
    dir: &Path,
    status: Option<StatusFilter>,
    severity: Option<SeverityFilter>,
    format: OutputFormat,
) -> Result<()> {
    let store = AlertStore::open(dir)?;
    let alerts = store.list(status.map(Into::into), severity.map(Into::into))?;
    render_alerts(&alerts, format)
}

pub fn acknowledge(dir: &Path, kind: &str, user: &str) -> Result<()> {
    let store = AlertStore::open(dir)?;
    if store.acknowledge(kind, user)? {
        println!("acknowledged {kind}");
    } else {
        println!("{}", format!("no firing alert for {kind}").yellow());
    }
    Ok(())
}

pub fn resolve(dir: &Path, kind: &str) -> Result<()> {
    let store = AlertStore::open(dir)?;
    if store.resolve(kind)? {
        println!("resolved {kind}");
    } else {
        println!("{}", format!("no open alert for {kind}").yellow());
    }
    Ok(())
}

fn render_alerts(alerts: &[Alert], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(alerts)?),
        OutputFormat::Table => {
            if alerts.is_empty() {
                println!("{}", "no alerts recorded".yellow());
                return Ok(());
            }
            let rows: Vec<AlertRow> = alerts.iter().map(AlertRow::from).collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
        }
        OutputFormat::Text => {
            for alert in alerts {
                println!(
                    "{} {} {} {}",
                    alert.started_at.to_rfc3339(),
                    alert.status,
                    alert.severity,
                    alert.message
                );
            }
        }
    }
    Ok(())
}

#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "STARTED")]
    started: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "SEVERITY")]
    severity: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "ENTITY")]
    entity: String,
}

impl From<&Alert> for AlertRow {
    fn from(alert: &Alert) -> Self {
        Self {
            started: alert.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            kind: alert.kind.clone(),
            severity: alert.severity.to_string(),
            status: alert.status.to_string(),
            entity: alert.entity_key.clone().unwrap_or_else(|| "-".to_string()),
        }
    }
}
