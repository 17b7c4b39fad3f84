//! Memory and swap utilization from /proc/meminfo

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::models::Sample;
use crate::scoring::safe_ratio;

use super::{read_proc_file, SampleCollector};

/// Which meminfo-derived percentage this collector samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemoryMetric {
    Used,
    Swap,
}

/// Parse /proc/meminfo into field name to kB value
pub fn parse_meminfo(content: &str) -> HashMap<String, u64> {
    let mut fields = HashMap::new();
    for line in content.lines() {
        let Some((name, rest)) = line.split_once(':') else {
            continue;
        };
        if let Some(value) = rest.split_whitespace().next() {
            if let Ok(kb) = value.parse::<u64>() {
                fields.insert(name.to_string(), kb);
            }
        }
    }
    fields
}

/// Used-memory percent, with MemAvailable as the ground truth for free
pub fn used_percent(fields: &HashMap<String, u64>) -> Option<f64> {
    let total = *fields.get("MemTotal")?;
    let available = *fields.get("MemAvailable")?;
    if total == 0 {
        return None;
    }
    let used = total.saturating_sub(available);
    Some(safe_ratio(used as f64, total as f64) * 100.0)
}

/// Swap-used percent; `None` on swapless hosts
pub fn swap_percent(fields: &HashMap<String, u64>) -> Option<f64> {
    let total = *fields.get("SwapTotal")?;
    let free = *fields.get("SwapFree")?;
    if total == 0 {
        return None;
    }
    let used = total.saturating_sub(free);
    Some(safe_ratio(used as f64, total as f64) * 100.0)
}

/// Samples memory or swap utilization percent
pub struct MemoryCollector {
    proc_path: PathBuf,
    metric: MemoryMetric,
}

impl MemoryCollector {
    /// Used-memory percent of MemTotal
    pub fn usage() -> Self {
        Self {
            proc_path: PathBuf::from("/proc"),
            metric: MemoryMetric::Used,
        }
    }

    /// Swap-used percent of SwapTotal
    pub fn swap() -> Self {
        Self {
            proc_path: PathBuf::from("/proc"),
            metric: MemoryMetric::Swap,
        }
    }

    /// Custom proc path, for testing
    pub fn with_proc_path(mut self, proc_path: impl Into<PathBuf>) -> Self {
        self.proc_path = proc_path.into();
        self
    }
}

#[async_trait]
impl SampleCollector for MemoryCollector {
    fn signal(&self) -> &str {
        match self.metric {
            MemoryMetric::Used => "memory",
            MemoryMetric::Swap => "swap",
        }
    }

    async fn collect(&mut self) -> Result<Vec<Sample>> {
        let content = read_proc_file(&self.proc_path.join("meminfo")).await?;
        let fields = parse_meminfo(&content);

        let percent = match self.metric {
            MemoryMetric::Used => {
                used_percent(&fields).context("MemTotal/MemAvailable missing from meminfo")?
            }
            MemoryMetric::Swap => match swap_percent(&fields) {
                Some(percent) => percent,
                None => {
                    debug!(signal = "swap", "no swap configured, skipping");
                    return Ok(Vec::new());
                }
            },
        };

        Ok(vec![Sample::new(Utc::now(), percent)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:       16000000 kB\n\
                           MemFree:         2000000 kB\n\
                           MemAvailable:    4000000 kB\n\
                           Buffers:          500000 kB\n\
                           SwapTotal:       8000000 kB\n\
                           SwapFree:        6000000 kB\n";

    #[test]
    fn test_parse_meminfo() {
        let fields = parse_meminfo(MEMINFO);
        assert_eq!(fields.get("MemTotal"), Some(&16_000_000));
        assert_eq!(fields.get("SwapFree"), Some(&6_000_000));
    }

    #[test]
    fn test_used_and_swap_percent() {
        let fields = parse_meminfo(MEMINFO);
        assert!((used_percent(&fields).unwrap() - 75.0).abs() < 1e-9);
        assert!((swap_percent(&fields).unwrap() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_swapless_host() {
        let fields = parse_meminfo("MemTotal: 100 kB\nMemAvailable: 50 kB\nSwapTotal: 0 kB\nSwapFree: 0 kB\n");
        assert!(swap_percent(&fields).is_none());
    }

    #[tokio::test]
    async fn test_collector_reads_meminfo() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("meminfo"), MEMINFO).unwrap();

        let mut collector = MemoryCollector::usage().with_proc_path(dir.path());
        let samples = collector.collect().await.unwrap();
        assert_eq!(samples.len(), 1);
        assert!((samples[0].value - 75.0).abs() < 1e-9);

        let mut collector = MemoryCollector::swap().with_proc_path(dir.path());
        let samples = collector.collect().await.unwrap();
        assert!((samples[0].value - 25.0).abs() < 1e-9);
    }
}
