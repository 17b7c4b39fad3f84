//! Per-process CPU and memory from /proc/<pid>/{stat,statm}
//!
//! Processes come and go between ticks; a pid that vanishes mid-scan
//! is skipped, never an error.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tracing::debug;

use crate::models::{ProcessSnapshot, Sample};
use crate::scoring::safe_ratio;

use super::{read_proc_file, SampleCollector};

const PAGE_BYTES: u64 = 4096;
const TICKS_PER_SEC: f64 = 100.0;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Fields parsed out of /proc/<pid>/stat
#[derive(Debug, Clone, PartialEq)]
pub struct PidStat {
    pub comm: String,
    /// Kernel state letter: R, S, D, Z, T, ...
    pub state: char,
    pub ppid: u32,
    /// utime + stime
    pub total_ticks: u64,
}

/// Parse /proc/<pid>/stat
///
/// comm may itself contain spaces or parentheses, so fields are taken
/// relative to the last closing paren.
pub fn parse_pid_stat(content: &str) -> Option<PidStat> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    let comm = content.get(open + 1..close)?.to_string();

    let fields: Vec<&str> = content.get(close + 1..)?.split_whitespace().collect();
    // After the comm: state ppid pgrp session tty tpgid flags minflt
    // cminflt majflt cmajflt utime stime
    let state = fields.first()?.chars().next()?;
    let ppid: u32 = fields.get(1)?.parse().ok()?;
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(PidStat {
        comm,
        state,
        ppid,
        total_ticks: utime + stime,
    })
}

/// Parse /proc/<pid>/statm into resident pages
pub fn parse_statm(content: &str) -> Option<u64> {
    content.split_whitespace().nth(1)?.parse().ok()
}

/// CPU percent from a tick delta over elapsed wall time
pub fn cpu_percent(prev_ticks: u64, curr_ticks: u64, elapsed_secs: f64) -> f64 {
    let busy_secs = curr_ticks.saturating_sub(prev_ticks) as f64 / TICKS_PER_SEC;
    safe_ratio(busy_secs, elapsed_secs) * 100.0
}

/// Samples per-process resident memory in MB, keyed by pid
pub struct ProcessCollector {
    proc_path: PathBuf,
    prev_ticks: HashMap<u32, u64>,
    prev_at: Option<Instant>,
}

impl ProcessCollector {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    /// Custom proc path, for testing
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
            prev_ticks: HashMap::new(),
            prev_at: None,
        }
    }

    async fn scan_pids(&self) -> Result<Vec<u32>> {
        let mut pids = Vec::new();
        let mut entries = fs::read_dir(&self.proc_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() {
                pids.push(pid);
            }
        }
        pids.sort_unstable();
        Ok(pids)
    }

    async fn read_pid(&self, pid: u32) -> Option<(PidStat, u64)> {
        let stat = read_proc_file(&self.proc_path.join(format!("{pid}/stat")))
            .await
            .ok()?;
        let statm = read_proc_file(&self.proc_path.join(format!("{pid}/statm")))
            .await
            .ok()?;
        let stat = parse_pid_stat(&stat)?;
        let pages = parse_statm(&statm)?;
        Some((stat, pages * PAGE_BYTES))
    }

    /// One snapshot per live process, CPU percent from tick deltas
    ///
    /// The first call reports zero CPU for every process since there is
    /// no previous tick count to diff against.
    pub async fn snapshots(&mut self) -> Result<Vec<ProcessSnapshot>> {
        let now = Instant::now();
        let elapsed = self
            .prev_at
            .replace(now)
            .map(|t| (now - t).as_secs_f64())
            .unwrap_or(0.0);

        let mut snapshots = Vec::new();
        let mut ticks_seen = HashMap::new();
        for pid in self.scan_pids().await? {
            let Some((stat, rss_bytes)) = self.read_pid(pid).await else {
                debug!(pid, "process vanished during scan");
                continue;
            };
            let cpu = self
                .prev_ticks
                .get(&pid)
                .map(|prev| cpu_percent(*prev, stat.total_ticks, elapsed))
                .unwrap_or(0.0);
            ticks_seen.insert(pid, stat.total_ticks);
            snapshots.push(ProcessSnapshot {
                pid,
                name: stat.comm,
                state: stat.state,
                ppid: stat.ppid,
                cpu_percent: cpu,
                rss_bytes,
            });
        }
        self.prev_ticks = ticks_seen;
        Ok(snapshots)
    }
}

impl Default for ProcessCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SampleCollector for ProcessCollector {
    fn signal(&self) -> &str {
        "process"
    }

    /// Resident set size in MB per process, pid as the entity key
    async fn collect(&mut self) -> Result<Vec<Sample>> {
        let timestamp = Utc::now();
        let mut samples = Vec::new();
        for pid in self.scan_pids().await? {
            let Some((_, rss_bytes)) = self.read_pid(pid).await else {
                continue;
            };
            samples.push(Sample::with_entity(
                timestamp,
                rss_bytes as f64 / BYTES_PER_MB,
                pid.to_string(),
            ));
        }
        Ok(samples)
    }
}
