//! Output formatting utilities
//!
//! Every command produces a [`Report`]; the renderer pattern-matches on
//! its tag, so adding a new output shape means adding a variant, not
//! inspecting value types.

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use opswatch_engine::{AnomalyEvent, ProcessSnapshot, Report, Sample, Severity};
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
    /// Plain key/value text with full event metrics
    #[value(alias = "structured-text")]
    Text,
}

/// Render a report to stdout in the requested format
pub fn render(report: &Report, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Table => print_table(report),
        OutputFormat::Text => print_text(report),
    }
    Ok(())
}

/// One-line event rendering for the monitor stream
pub fn render_event_line(event: &AnomalyEvent, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(event)?),
        OutputFormat::Table | OutputFormat::Text => {
            let entity = event
                .entity_key
                .as_deref()
                .map(|e| format!(" [{e}]"))
                .unwrap_or_default();
            println!(
                "{} {} {}{} confidence {}",
                event.start_time.format("%H:%M:%S"),
                color_severity(event.severity),
                event.kind.bold(),
                entity,
                color_confidence(event.confidence)
            );
        }
    }
    Ok(())
}

fn print_table(report: &Report) {
    match report {
        Report::Samples(samples) => {
            let rows: Vec<SampleRow> = samples.iter().map(SampleRow::from).collect();
            print_rows(&rows, "no samples collected");
        }
        Report::Processes(snapshots) => {
            let rows: Vec<ProcessRow> = snapshots.iter().map(ProcessRow::from).collect();
            print_rows(&rows, "no processes found");
        }
        Report::Events(events) => {
            let rows: Vec<EventRow> = events.iter().map(EventRow::from).collect();
            print_rows(&rows, "no anomalies detected");
        }
        Report::Composite(reports) => {
            for report in reports {
                print_table(report);
            }
        }
    }
}

fn print_rows<T: Tabled>(rows: &[T], empty_message: &str) {
    if rows.is_empty() {
        println!("{}", empty_message.yellow());
        return;
    }
    println!("{}", Table::new(rows).with(Style::rounded()));
}

fn print_text(report: &Report) {
    match report {
        Report::Samples(samples) => {
            for sample in samples {
                let entity = sample
                    .entity_key
                    .as_deref()
                    .map(|e| format!(" entity={e}"))
                    .unwrap_or_default();
                println!(
                    "{} value={:.2}{}",
                    sample.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
                    sample.value,
                    entity
                );
            }
        }
        Report::Processes(snapshots) => {
            for p in snapshots {
                println!(
                    "pid={} name={} cpu={:.1}% rss={}",
                    p.pid,
                    p.name,
                    p.cpu_percent,
                    format_bytes(p.rss_bytes)
                );
            }
        }
        Report::Events(events) => {
            for event in events {
                print_event_text(event);
            }
        }
        Report::Composite(reports) => {
            for report in reports {
                print_text(report);
            }
        }
    }
}

fn print_event_text(event: &AnomalyEvent) {
    println!("{}: {}", "anomaly".bold(), event.kind);
    println!("  severity:   {}", color_severity(event.severity));
    println!("  confidence: {}", color_confidence(event.confidence));
    println!("  algorithm:  {}", event.algorithm);
    println!("  start:      {}", event.start_time.to_rfc3339());
    if let Some(end) = event.end_time {
        println!("  end:        {}", end.to_rfc3339());
    }
    if let Some(entity) = &event.entity_key {
        println!("  entity:     {entity}");
    }
    if let Some(baseline) = event.baseline {
        println!("  baseline:   {baseline:.2}");
    }
    for (name, value) in &event.metrics {
        println!("  {name}: {value:.3}");
    }
}

#[derive(Tabled)]
struct SampleRow {
    #[tabled(rename = "TIME")]
    time: String,
    #[tabled(rename = "ENTITY")]
    entity: String,
    #[tabled(rename = "VALUE")]
    value: String,
}

impl From<&Sample> for SampleRow {
    fn from(sample: &Sample) -> Self {
        Self {
            time: sample.timestamp.format("%H:%M:%S").to_string(),
            entity: sample.entity_key.clone().unwrap_or_else(|| "-".to_string()),
            value: format!("{:.2}", sample.value),
        }
    }
}

#[derive(Tabled)]
struct ProcessRow {
    #[tabled(rename = "PID")]
    pid: u32,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "CPU%")]
    cpu: String,
    #[tabled(rename = "RSS")]
    rss: String,
}

impl From<&ProcessSnapshot> for ProcessRow {
    fn from(p: &ProcessSnapshot) -> Self {
        Self {
            pid: p.pid,
            name: p.name.clone(),
            cpu: format!("{:.1}", p.cpu_percent),
            rss: format_bytes(p.rss_bytes),
        }
    }
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "START")]
    start: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "SEVERITY")]
    severity: String,
    #[tabled(rename = "CONFIDENCE")]
    confidence: String,
    #[tabled(rename = "ENTITY")]
    entity: String,
    #[tabled(rename = "DURATION")]
    duration: String,
}

impl From<&AnomalyEvent> for EventRow {
    fn from(event: &AnomalyEvent) -> Self {
        Self {
            start: event.start_time.format("%H:%M:%S").to_string(),
            kind: event.kind.clone(),
            severity: color_severity(event.severity),
            confidence: color_confidence(event.confidence),
            entity: event.entity_key.clone().unwrap_or_else(|| "-".to_string()),
            duration: event
                .duration_seconds()
                .map(|secs| format!("{secs:.0}s"))
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

fn color_severity(severity: Severity) -> String {
    match severity {
        Severity::Warning => severity.to_string().yellow().to_string(),
        Severity::Critical => severity.to_string().red().to_string(),
        Severity::Emergency => severity.to_string().red().bold().to_string(),
    }
}

fn color_confidence(confidence: f64) -> String {
    let formatted = format!("{:.0}%", confidence * 100.0);
    if confidence >= 0.8 {
        formatted.green().to_string()
    } else if confidence >= 0.6 {
        formatted.yellow().to_string()
    } else {
        formatted.red().to_string()
    }
}

/// Format bytes as a human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}Gi", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}Mi", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}Ki", bytes as f64 / KB as f64)
    } else {
        format!("{bytes}B")
    }
}
