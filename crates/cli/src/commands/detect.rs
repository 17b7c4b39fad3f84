//! `opswatch detect`: run the configured detectors over live or
//! recorded samples

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use opswatch_engine::collector::ProcessCollector;
use opswatch_engine::{AnomalyEvent, CrashDetector, EngineConfig, Report, Sample, ZombieDetector};
use tokio::time::sleep;
use tracing::warn;

use crate::output::{self, OutputFormat};

use super::{collect::collect_series, detectors_for, pipelines, Signal};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

pub async fn run(
    signal: Signal,
    input: Option<&Path>,
    count: usize,
    interval: Duration,
    config: &EngineConfig,
    format: OutputFormat,
) -> Result<()> {
    let events = match input {
        Some(path) => detect_recorded(signal, path, config)?,
        None => detect_live(signal, count, interval, config).await?,
    };
    output::render(&Report::Events(events), format)
}

/// Run every detector for the signal over one recorded series
fn detect_recorded(
    signal: Signal,
    path: &Path,
    config: &EngineConfig,
) -> Result<Vec<AnomalyEvent>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read samples from {}", path.display()))?;
    let mut samples: Vec<Sample> = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON sample array", path.display()))?;
    samples.sort_by_key(|s| s.timestamp);

    let mut events = Vec::new();
    for mut detector in detectors_for(signal, config) {
        events.extend(detector.detect(&samples)?);
    }
    events.sort_by_key(|e| e.start_time);
    Ok(events)
}

/// Collect live samples per pipeline, then detect on each series
async fn detect_live(
    signal: Signal,
    count: usize,
    interval: Duration,
    config: &EngineConfig,
) -> Result<Vec<AnomalyEvent>> {
    if signal == Signal::Process {
        let mut collector = ProcessCollector::new();
        return detect_process(&mut collector, count, interval, config).await;
    }
    let mut pipes = pipelines(signal, config);
    let series = collect_series(&mut pipes, count, interval).await;

    let mut events = Vec::new();
    for (pipe, samples) in pipes.iter_mut().zip(series) {
        for detector in &mut pipe.detectors {
            events.extend(detector.detect(&samples)?);
        }
    }
    events.sort_by_key(|e| e.start_time);
    Ok(events)
}

/// Process signal: snapshot batches feed the state checks each tick,
/// the accumulated RSS series feeds the leak detector at the end
async fn detect_process(
    collector: &mut ProcessCollector,
    count: usize,
    interval: Duration,
    config: &EngineConfig,
) -> Result<Vec<AnomalyEvent>> {
    let zombie = ZombieDetector::new();
    let mut crash = CrashDetector::new();
    let mut events = Vec::new();
    let mut samples = Vec::new();
    let mut last_batch = Vec::new();

    for tick in 0..count {
        if tick > 0 {
            sleep(interval).await;
        }
        let snapshots = match collector.snapshots().await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!(error = %e, "process scan failed, skipping tick");
                continue;
            }
        };
        events.extend(crash.detect(&snapshots)?);
        let timestamp = Utc::now();
        samples.extend(snapshots.iter().map(|s| {
            Sample::with_entity(timestamp, s.rss_bytes as f64 / BYTES_PER_MB, s.pid.to_string())
        }));
        last_batch = snapshots;
    }
    // Zombies linger; checking the final batch avoids one event per tick
    events.extend(zombie.detect(&last_batch)?);

    for mut detector in detectors_for(Signal::Process, config) {
        events.extend(detector.detect(&samples)?);
    }
    events.sort_by_key(|e| e.start_time);
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::io::Write;

    fn recorded_samples(values: &[f64]) -> tempfile::NamedTempFile {
        let samples: Vec<Sample> = values
            .iter()
            .enumerate()
            .map(|(i, v)| Sample::new(Utc.timestamp_opt(i as i64, 0).unwrap(), *v))
            .collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&samples).unwrap()).unwrap();
        file
    }

    #[test]
    fn test_detect_recorded_cpu_run() {
        let file = recorded_samples(&[85.0, 86.0, 87.0, 84.0, 85.0]);
        let config = EngineConfig::default();

        let events = detect_recorded(Signal::Cpu, file.path(), &config).unwrap();
        // The static threshold fires; the baseline detector lacks history
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "high_cpu");
        assert_eq!(events[0].algorithm, "static_threshold");
    }

    #[tokio::test]
    async fn test_detect_process_flags_zombies() {
        let dir = tempfile::tempdir().unwrap();
        for (pid, state) in [(100u32, 'S'), (200, 'Z')] {
            let pid_dir = dir.path().join(pid.to_string());
            std::fs::create_dir(&pid_dir).unwrap();
            std::fs::write(
                pid_dir.join("stat"),
                format!("{pid} (worker) {state} 1 {pid} {pid} 0 -1 0 0 0 0 0 10 20 0 0 20 0 1 0 1 1 1 1\n"),
            )
            .unwrap();
            std::fs::write(pid_dir.join("statm"), "10000 2560 800 100 0 3000 0\n").unwrap();
        }

        let mut collector = ProcessCollector::with_proc_path(dir.path());
        let config = EngineConfig::default();
        let events = detect_process(&mut collector, 2, Duration::from_millis(1), &config)
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "zombie_process");
        assert_eq!(events[0].entity_key.as_deref(), Some("200"));
    }

    #[test]
    fn test_detect_recorded_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let config = EngineConfig::default();
        assert!(detect_recorded(Signal::Cpu, file.path(), &config).is_err());
    }
}
