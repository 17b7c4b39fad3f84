//! Sample collectors over /proc
//!
//! Each collector reads one family of kernel counters and turns them
//! into [`Sample`]s for the detectors. Parsing is split into pure
//! functions over file contents so it can be tested without a live
//! /proc; the async wrappers only do I/O.
//!
//! Counter files are tiny but reads still carry a bounded timeout, so
//! a wedged kernel interface stalls one tick instead of the loop.

mod cpu;
mod disk;
mod memory;
mod process;

pub use cpu::CpuCollector;
pub use disk::{DiskCollector, DiskMetric};
pub use memory::MemoryCollector;
pub use process::ProcessCollector;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tokio::time::timeout;

use crate::models::Sample;

const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// One sampling source feeding the detection engine
///
/// `&mut self` because delta-based collectors keep the previous
/// counter snapshot between ticks.
#[async_trait]
pub trait SampleCollector: Send {
    /// Signal name used in logs and event routing
    fn signal(&self) -> &str;

    /// Take one reading; delta-based collectors return an empty batch
    /// on their priming call
    async fn collect(&mut self) -> Result<Vec<Sample>>;
}

pub(crate) async fn read_proc_file(path: &Path) -> Result<String> {
    timeout(READ_TIMEOUT, fs::read_to_string(path))
        .await
        .with_context(|| format!("timed out reading {}", path.display()))?
        .with_context(|| format!("failed to read {}", path.display()))
}
