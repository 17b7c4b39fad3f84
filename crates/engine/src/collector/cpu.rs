//! System CPU utilization from /proc/stat
//!
//! The aggregate `cpu` line carries cumulative jiffies per state, so
//! utilization is the busy share of the delta between two reads.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::models::Sample;

use super::{read_proc_file, SampleCollector};

/// Cumulative jiffy counters from the aggregate cpu line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub busy: u64,
    pub idle: u64,
}

impl CpuTimes {
    pub fn total(&self) -> u64 {
        self.busy + self.idle
    }
}

/// Parse the aggregate `cpu` line of /proc/stat
///
/// Fields: user nice system idle iowait irq softirq steal. Idle and
/// iowait count as idle, everything else as busy.
pub fn parse_proc_stat(content: &str) -> Result<CpuTimes> {
    let line = content
        .lines()
        .find(|l| l.starts_with("cpu "))
        .context("no aggregate cpu line in /proc/stat")?;

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|f| f.parse().unwrap_or(0))
        .collect();
    if fields.len() < 4 {
        anyhow::bail!("malformed cpu line: {line:?}");
    }

    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    let busy: u64 = fields
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 3 && *i != 4)
        .map(|(_, v)| v)
        .sum();

    Ok(CpuTimes { busy, idle })
}

/// Busy percent over the counter delta; `None` when no time elapsed
pub fn busy_percent(prev: CpuTimes, curr: CpuTimes) -> Option<f64> {
    let total = curr.total().checked_sub(prev.total())?;
    if total == 0 {
        return None;
    }
    let busy = curr.busy.saturating_sub(prev.busy);
    Some(busy as f64 / total as f64 * 100.0)
}

/// Samples whole-system CPU busy percent
pub struct CpuCollector {
    proc_path: PathBuf,
    prev: Option<CpuTimes>,
}

impl CpuCollector {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    /// Custom proc path, for testing
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
            prev: None,
        }
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SampleCollector for CpuCollector {
    fn signal(&self) -> &str {
        "cpu"
    }

    async fn collect(&mut self) -> Result<Vec<Sample>> {
        let content = read_proc_file(&self.proc_path.join("stat")).await?;
        let curr = parse_proc_stat(&content)?;
        let prev = self.prev.replace(curr);

        let Some(percent) = prev.and_then(|p| busy_percent(p, curr)) else {
            debug!(signal = "cpu", "priming read, no delta yet");
            return Ok(Vec::new());
        };

        Ok(vec![Sample::new(Utc::now(), percent)])
    }
}
