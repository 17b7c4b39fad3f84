//! Per-device I/O metrics from /proc/diskstats
//!
//! Latency and throughput come from counter deltas between two reads;
//! queue depth is the instantaneous in-flight count. One collector
//! instance samples one metric so each detector sees a homogeneous
//! series per device.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::models::Sample;
use crate::scoring::safe_ratio;

use super::{read_proc_file, SampleCollector};

const SECTOR_BYTES: f64 = 512.0;

/// Cumulative counters for one block device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskStats {
    pub reads_completed: u64,
    pub sectors_read: u64,
    pub read_time_ms: u64,
    pub writes_completed: u64,
    pub sectors_written: u64,
    pub write_time_ms: u64,
    pub in_flight: u64,
}

/// Which diskstats-derived metric this collector samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskMetric {
    /// ms per completed read over the delta
    ReadLatency,
    /// ms per completed write over the delta
    WriteLatency,
    /// bytes read per second over the delta
    ReadThroughput,
    /// bytes written per second over the delta
    WriteThroughput,
    /// instantaneous in-flight I/O count
    QueueDepth,
}

/// Parse /proc/diskstats into device name to counters
///
/// Virtual loop/ram devices are skipped; partitions are kept since the
/// kernel accounts them separately and a hot partition is a real signal.
pub fn parse_diskstats(content: &str) -> HashMap<String, DiskStats> {
    let mut devices = HashMap::new();
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 12 {
            continue;
        }
        let name = fields[2];
        if name.starts_with("loop") || name.starts_with("ram") {
            continue;
        }
        let parse = |i: usize| fields[i].parse::<u64>().unwrap_or(0);
        devices.insert(
            name.to_string(),
            DiskStats {
                reads_completed: parse(3),
                sectors_read: parse(5),
                read_time_ms: parse(6),
                writes_completed: parse(7),
                sectors_written: parse(9),
                write_time_ms: parse(10),
                in_flight: parse(11),
            },
        );
    }
    devices
}

/// Derive one metric value from the counter delta
///
/// `None` when the delta carries no signal (no completed ops for a
/// latency metric, no elapsed time for a rate).
pub fn metric_value(
    metric: DiskMetric,
    prev: DiskStats,
    curr: DiskStats,
    elapsed_secs: f64,
) -> Option<f64> {
    match metric {
        DiskMetric::ReadLatency => {
            let ops = curr.reads_completed.saturating_sub(prev.reads_completed);
            if ops == 0 {
                return None;
            }
            let ms = curr.read_time_ms.saturating_sub(prev.read_time_ms);
            Some(safe_ratio(ms as f64, ops as f64))
        }
        DiskMetric::WriteLatency => {
            let ops = curr.writes_completed.saturating_sub(prev.writes_completed);
            if ops == 0 {
                return None;
            }
            let ms = curr.write_time_ms.saturating_sub(prev.write_time_ms);
            Some(safe_ratio(ms as f64, ops as f64))
        }
        DiskMetric::ReadThroughput => {
            if elapsed_secs <= 0.0 {
                return None;
            }
            let sectors = curr.sectors_read.saturating_sub(prev.sectors_read);
            Some(sectors as f64 * SECTOR_BYTES / elapsed_secs)
        }
        DiskMetric::WriteThroughput => {
            if elapsed_secs <= 0.0 {
                return None;
            }
            let sectors = curr.sectors_written.saturating_sub(prev.sectors_written);
            Some(sectors as f64 * SECTOR_BYTES / elapsed_secs)
        }
        DiskMetric::QueueDepth => Some(curr.in_flight as f64),
    }
}

/// Samples one I/O metric per block device, keyed by device name
pub struct DiskCollector {
    proc_path: PathBuf,
    metric: DiskMetric,
    prev: HashMap<String, DiskStats>,
    prev_at: Option<Instant>,
}

impl DiskCollector {
    pub fn new(metric: DiskMetric) -> Self {
        Self::with_proc_path(metric, "/proc")
    }

    /// Custom proc path, for testing
    pub fn with_proc_path(metric: DiskMetric, proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
            metric,
            prev: HashMap::new(),
            prev_at: None,
        }
    }
}

#[async_trait]
impl SampleCollector for DiskCollector {
    fn signal(&self) -> &str {
        match self.metric {
            DiskMetric::ReadLatency => "disk_read_latency",
            DiskMetric::WriteLatency => "disk_write_latency",
            DiskMetric::ReadThroughput => "disk_read_throughput",
            DiskMetric::WriteThroughput => "disk_write_throughput",
            DiskMetric::QueueDepth => "disk_queue_depth",
        }
    }

    async fn collect(&mut self) -> Result<Vec<Sample>> {
        let content = read_proc_file(&self.proc_path.join("diskstats")).await?;
        let curr = parse_diskstats(&content);
        let now = Instant::now();
        let elapsed = self
            .prev_at
            .replace(now)
            .map(|t| (now - t).as_secs_f64())
            .unwrap_or(0.0);
        let prev = std::mem::replace(&mut self.prev, curr.clone());

        let timestamp = Utc::now();
        let mut samples = Vec::new();
        for (device, stats) in &curr {
            let value = if self.metric == DiskMetric::QueueDepth {
                Some(stats.in_flight as f64)
            } else {
                // Delta metrics need a previous snapshot of this device
                prev.get(device)
                    .and_then(|p| metric_value(self.metric, *p, *stats, elapsed))
            };
            if let Some(value) = value {
                samples.push(Sample::with_entity(timestamp, value, device.clone()));
            }
        }

        if samples.is_empty() {
            debug!(signal = self.signal(), "no device deltas this tick");
        }
        samples.sort_by(|a, b| a.entity_key.cmp(&b.entity_key));
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DISKSTATS: &str =
        "   8       0 sda 1000 50 80000 2000 500 20 40000 3000 4 5000 5000\n";
    const DISKSTATS_LATER: &str =
        "   8       0 sda 1100 50 96000 2400 550 20 48000 3500 2 5200 5200\n";
    const WITH_LOOP: &str = "   7       0 loop0 10 0 80 5 0 0 0 0 0 5 5\n\
                               8       0 sda 1000 50 80000 2000 500 20 40000 3000 4 5000 5000\n";

    fn stats(content: &str) -> DiskStats {
        parse_diskstats(content)["sda"]
    }

    #[test]
    fn test_parse_diskstats() {
        let sda = stats(DISKSTATS);
        assert_eq!(sda.reads_completed, 1000);
        assert_eq!(sda.sectors_read, 80000);
        assert_eq!(sda.write_time_ms, 3000);
        assert_eq!(sda.in_flight, 4);
    }

    #[test]
    fn test_virtual_devices_skipped() {
        let devices = parse_diskstats(WITH_LOOP);
        assert!(devices.contains_key("sda"));
        assert!(!devices.contains_key("loop0"));
    }

    #[test]
    fn test_latency_from_delta() {
        let prev = stats(DISKSTATS);
        let curr = stats(DISKSTATS_LATER);
        // 400 ms over 100 reads
        let read = metric_value(DiskMetric::ReadLatency, prev, curr, 10.0).unwrap();
        assert!((read - 4.0).abs() < 1e-9);
        // 500 ms over 50 writes
        let write = metric_value(DiskMetric::WriteLatency, prev, curr, 10.0).unwrap();
        assert!((write - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_throughput_from_delta() {
        let prev = stats(DISKSTATS);
        let curr = stats(DISKSTATS_LATER);
        // 16000 sectors * 512 bytes over 10 seconds
        let read = metric_value(DiskMetric::ReadThroughput, prev, curr, 10.0).unwrap();
        assert!((read - 819_200.0).abs() < 1e-6);
    }

    #[test]
    fn test_idle_device_yields_no_latency_sample() {
        let prev = stats(DISKSTATS);
        assert!(metric_value(DiskMetric::ReadLatency, prev, prev, 10.0).is_none());
        assert!(metric_value(DiskMetric::ReadThroughput, prev, prev, 0.0).is_none());
    }

    #[tokio::test]
    async fn test_queue_depth_needs_no_priming() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("diskstats"), DISKSTATS).unwrap();

        let mut collector = DiskCollector::with_proc_path(DiskMetric::QueueDepth, dir.path());
        let samples = collector.collect().await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 4.0);
        assert_eq!(samples[0].entity_key.as_deref(), Some("sda"));
    }

    #[tokio::test]
    async fn test_latency_collector_primes_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("diskstats"), DISKSTATS).unwrap();

        let mut collector = DiskCollector::with_proc_path(DiskMetric::ReadLatency, dir.path());
        assert!(collector.collect().await.unwrap().is_empty());

        std::fs::write(dir.path().join("diskstats"), DISKSTATS_LATER).unwrap();
        let samples = collector.collect().await.unwrap();
        assert_eq!(samples.len(), 1);
        assert!((samples[0].value - 4.0).abs() < 1e-9);
    }
}
