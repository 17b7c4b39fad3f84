//! `opswatch monitor`: continuous detection across all signals
//!
//! Spawns one monitor loop per pipeline plus a process-state loop and
//! streams detected events to stdout until Ctrl-C. With an alert
//! directory set, every event is also persisted as a firing alert.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use opswatch_engine::collector::ProcessCollector;
use opswatch_engine::monitor::MonitorLoopBuilder;
use opswatch_engine::{AlertStore, AnomalyEvent, CrashDetector, EngineConfig, ZombieDetector};
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

use crate::output::{self, OutputFormat};

use super::{interval_for, pipelines, Signal};

const ALL_SIGNALS: [Signal; 5] = [
    Signal::Cpu,
    Signal::Memory,
    Signal::Swap,
    Signal::Disk,
    Signal::Process,
];

type SharedStore = Option<Arc<Mutex<AlertStore>>>;

pub async fn run(
    interval_override: Option<u64>,
    alert_dir: Option<&Path>,
    config: &EngineConfig,
    format: OutputFormat,
) -> Result<()> {
    let store: SharedStore = match alert_dir {
        Some(dir) => Some(Arc::new(Mutex::new(AlertStore::open(dir)?))),
        None => None,
    };

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut loop_handles = Vec::new();

    for signal in ALL_SIGNALS {
        let interval = interval_override
            .map(Duration::from_secs)
            .unwrap_or_else(|| interval_for(signal, config));

        for pipe in pipelines(signal, config) {
            let mut builder = MonitorLoopBuilder::new()
                .collector(pipe.collector)
                .interval(interval);
            for detector in pipe.detectors {
                builder = builder.detector(detector);
            }
            let (monitor, mut events_rx) = builder.build()?;

            loop_handles.push(tokio::spawn(monitor.run(shutdown_tx.subscribe())));
            let store = store.clone();
            tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    let _ = output::render_event_line(&event, format);
                    persist(&store, &event).await;
                }
            });
        }
    }

    let process_interval = interval_override
        .map(Duration::from_secs)
        .unwrap_or_else(|| interval_for(Signal::Process, config));
    loop_handles.push(tokio::spawn(process_state_loop(
        process_interval,
        format,
        store.clone(),
        shutdown_tx.subscribe(),
    )));

    info!("monitoring all signals, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    let _ = shutdown_tx.send(());
    for handle in loop_handles {
        let _ = handle.await;
    }
    Ok(())
}

/// Watches the process table for zombies and vanished processes
///
/// Zombies linger across ticks, so the zombie check only fires when the
/// set of zombie pids changes.
async fn process_state_loop(
    interval: Duration,
    format: OutputFormat,
    store: SharedStore,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut collector = ProcessCollector::new();
    let zombie = ZombieDetector::new();
    let mut crash = CrashDetector::new();
    let mut known_zombies: HashSet<u32> = HashSet::new();

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshots = match collector.snapshots().await {
                    Ok(snapshots) => snapshots,
                    Err(e) => {
                        warn!(error = %e, "process scan failed, skipping tick");
                        continue;
                    }
                };

                let mut events = Vec::new();
                let zombies: HashSet<u32> = snapshots
                    .iter()
                    .filter(|s| s.is_zombie())
                    .map(|s| s.pid)
                    .collect();
                if zombies != known_zombies && !zombies.is_empty() {
                    match zombie.detect(&snapshots) {
                        Ok(found) => events.extend(found),
                        Err(e) => error!(error = %e, "zombie check produced an invalid event"),
                    }
                }
                known_zombies = zombies;

                match crash.detect(&snapshots) {
                    Ok(found) => events.extend(found),
                    Err(e) => error!(error = %e, "crash check produced an invalid event"),
                }

                for event in events {
                    let _ = output::render_event_line(&event, format);
                    persist(&store, &event).await;
                }
            }
            _ = shutdown.recv() => {
                info!("shutting down process state loop");
                break;
            }
        }
    }
}

async fn persist(store: &SharedStore, event: &AnomalyEvent) {
    if let Some(store) = store {
        if let Err(e) = store.lock().await.record(event) {
            warn!(error = %e, "failed to persist alert");
        }
    }
}
