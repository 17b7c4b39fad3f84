//! `opswatch collect`: sample a signal and render the raw readings

use std::time::Duration;

use anyhow::Result;
use opswatch_engine::collector::ProcessCollector;
use opswatch_engine::{EngineConfig, Report, Sample};
use tokio::time::sleep;
use tracing::warn;

use crate::output::{self, OutputFormat};

use super::{pipelines, Pipeline, Signal};

pub async fn run(
    signal: Signal,
    count: usize,
    interval: Duration,
    config: &EngineConfig,
    format: OutputFormat,
) -> Result<()> {
    let report = if signal == Signal::Process {
        // Processes render as snapshots with CPU deltas, not raw samples
        Report::Processes(collect_snapshots(count, interval).await?)
    } else {
        let mut pipes = pipelines(signal, config);
        let series = collect_series(&mut pipes, count, interval).await;
        into_report(series)
    };
    output::render(&report, format)
}

async fn collect_snapshots(
    count: usize,
    interval: Duration,
) -> Result<Vec<opswatch_engine::ProcessSnapshot>> {
    let mut collector = ProcessCollector::new();
    let mut snapshots = collector.snapshots().await?;
    for _ in 1..count {
        sleep(interval).await;
        snapshots = collector.snapshots().await?;
    }
    Ok(snapshots)
}

/// Drive each pipeline's collector for `count` ticks
pub(super) async fn collect_series(
    pipes: &mut [Pipeline],
    count: usize,
    interval: Duration,
) -> Vec<Vec<Sample>> {
    let mut series: Vec<Vec<Sample>> = pipes.iter().map(|_| Vec::new()).collect();
    for tick in 0..count {
        if tick > 0 {
            sleep(interval).await;
        }
        for (i, pipe) in pipes.iter_mut().enumerate() {
            match pipe.collector.collect().await {
                Ok(batch) => series[i].extend(batch),
                Err(e) => warn!(
                    signal = pipe.collector.signal(),
                    error = %e,
                    "collection failed, skipping tick"
                ),
            }
        }
    }
    series
}

fn into_report(mut series: Vec<Vec<Sample>>) -> Report {
    if series.len() == 1 {
        Report::Samples(series.remove(0))
    } else {
        Report::Composite(series.into_iter().map(Report::Samples).collect())
    }
}
