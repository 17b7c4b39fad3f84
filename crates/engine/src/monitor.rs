//! Continuous monitoring loop
//!
//! Periodically drives one collector, maintains a rolling sample
//! window, and runs a set of detectors over it each tick. Detected
//! events go out over an mpsc channel; a broadcast signal shuts the
//! loop down.
//!
//! A failed collection is logged and skipped so one bad tick never
//! kills the loop. An [`EventError`] aborts the current detection
//! cycle instead, since it means a detector produced an invalid event.

use std::collections::{HashSet, VecDeque};

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::collector::SampleCollector;
use crate::detect::Detection;
use crate::models::{AnomalyEvent, Sample};

/// Identity of an emission within the rolling window
///
/// Consecutive ticks re-detect a still-ongoing anomaly as a new event
/// with a fresh id; kind, entity, and start time pin it to the same
/// underlying episode.
type EventKey = (String, Option<String>, DateTime<Utc>);

fn event_key(event: &AnomalyEvent) -> EventKey {
    (event.kind.clone(), event.entity_key.clone(), event.start_time)
}

/// Configuration for one monitoring loop
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Sampling interval (default: 10 seconds)
    pub interval: Duration,
    /// Rolling window size in samples (default: 360, an hour at 10s)
    pub window_size: usize,
    /// Event channel buffer size
    pub buffer_size: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            window_size: 360,
            buffer_size: 1000,
        }
    }
}

/// One collector, a rolling window, and the detectors that watch it
pub struct MonitorLoop {
    collector: Box<dyn SampleCollector>,
    detectors: Vec<Box<dyn Detection>>,
    config: MonitorConfig,
    window: VecDeque<Sample>,
    emitted: HashSet<EventKey>,
    events_tx: mpsc::Sender<AnomalyEvent>,
}

impl MonitorLoop {
    pub fn new(
        collector: Box<dyn SampleCollector>,
        detectors: Vec<Box<dyn Detection>>,
        config: MonitorConfig,
    ) -> (Self, mpsc::Receiver<AnomalyEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.buffer_size);
        let loop_instance = Self {
            collector,
            detectors,
            config,
            window: VecDeque::new(),
            emitted: HashSet::new(),
            events_tx,
        };
        (loop_instance, events_rx)
    }

    /// Run until the shutdown signal fires
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            signal = self.collector.signal(),
            interval_secs = self.config.interval.as_secs(),
            window_size = self.config.window_size,
            "starting monitor loop"
        );

        let mut ticker = interval(self.config.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cycle().await;
                }
                _ = shutdown.recv() => {
                    info!(signal = self.collector.signal(), "shutting down monitor loop");
                    break;
                }
            }
        }
    }

    /// One collect-and-detect cycle
    async fn cycle(&mut self) {
        let batch = match self.collector.collect().await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(
                    signal = self.collector.signal(),
                    error = %e,
                    "collection failed, skipping tick"
                );
                return;
            }
        };
        self.extend_window(batch);
        if self.window.is_empty() {
            return;
        }

        let samples: Vec<Sample> = self.window.iter().cloned().collect();
        let mut detected = Vec::new();
        for detector in &mut self.detectors {
            match detector.detect(&samples) {
                Ok(events) => detected.extend(events),
                Err(e) => {
                    error!(
                        detector = detector.name(),
                        error = %e,
                        "invalid event, aborting detection cycle"
                    );
                    return;
                }
            }
        }

        // An anomaly still inside the window is re-detected every tick;
        // only the first sighting of each episode goes out.
        let current: HashSet<EventKey> = detected.iter().map(event_key).collect();
        for event in detected {
            if self.emitted.contains(&event_key(&event)) {
                debug!(kind = %event.kind, "suppressing already-reported anomaly");
                continue;
            }
            if let Err(e) = self.events_tx.send(event).await {
                warn!(error = %e, "event receiver gone, dropping event");
            }
        }
        self.emitted = current;

        debug!(
            signal = self.collector.signal(),
            window = samples.len(),
            "detection cycle complete"
        );
    }

    fn extend_window(&mut self, batch: Vec<Sample>) {
        self.window.extend(batch);
        while self.window.len() > self.config.window_size {
            self.window.pop_front();
        }
    }
}

/// Builder for a monitor loop
pub struct MonitorLoopBuilder {
    collector: Option<Box<dyn SampleCollector>>,
    detectors: Vec<Box<dyn Detection>>,
    config: MonitorConfig,
}

impl MonitorLoopBuilder {
    pub fn new() -> Self {
        Self {
            collector: None,
            detectors: Vec::new(),
            config: MonitorConfig::default(),
        }
    }

    pub fn collector(mut self, collector: Box<dyn SampleCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn detector(mut self, detector: Box<dyn Detection>) -> Self {
        self.detectors.push(detector);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn window_size(mut self, window_size: usize) -> Self {
        self.config.window_size = window_size;
        self
    }

    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.config.buffer_size = buffer_size;
        self
    }

    pub fn build(self) -> Result<(MonitorLoop, mpsc::Receiver<AnomalyEvent>)> {
        let collector = self
            .collector
            .ok_or_else(|| anyhow::anyhow!("collector is required"))?;
        if self.detectors.is_empty() {
            anyhow::bail!("at least one detector is required");
        }
        Ok(MonitorLoop::new(collector, self.detectors, self.config))
    }
}

impl Default for MonitorLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ThresholdDetector;
    use crate::models::EventError;
    use async_trait::async_trait;
    use chrono::Utc;

    /// Scripted collector replaying fixed batches
    struct ScriptedCollector {
        batches: VecDeque<Vec<Sample>>,
        fail_first: bool,
    }

    #[async_trait]
    impl SampleCollector for ScriptedCollector {
        fn signal(&self) -> &str {
            "scripted"
        }

        async fn collect(&mut self) -> Result<Vec<Sample>> {
            if self.fail_first {
                self.fail_first = false;
                anyhow::bail!("transient failure");
            }
            Ok(self.batches.pop_front().unwrap_or_default())
        }
    }

    fn batch(values: &[f64]) -> Vec<Sample> {
        values.iter().map(|v| Sample::new(Utc::now(), *v)).collect()
    }

    fn threshold_loop(
        collector: ScriptedCollector,
        window_size: usize,
    ) -> (MonitorLoop, mpsc::Receiver<AnomalyEvent>) {
        MonitorLoopBuilder::new()
            .collector(Box::new(collector))
            .detector(Box::new(
                ThresholdDetector::new(80.0, 3, Duration::from_secs(0)),
            ))
            .window_size(window_size)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_cycle_emits_events() {
        let collector = ScriptedCollector {
            batches: VecDeque::from([batch(&[85.0, 86.0, 87.0])]),
            fail_first: false,
        };
        let (mut monitor, mut rx) = threshold_loop(collector, 100);

        monitor.cycle().await;
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, "high_cpu");
    }

    #[tokio::test]
    async fn test_collection_failure_skips_tick() {
        let collector = ScriptedCollector {
            batches: VecDeque::from([batch(&[85.0, 86.0, 87.0])]),
            fail_first: true,
        };
        let (mut monitor, mut rx) = threshold_loop(collector, 100);

        monitor.cycle().await; // fails, no detection
        assert!(rx.try_recv().is_err());

        monitor.cycle().await; // recovers on the next tick
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_ongoing_anomaly_reported_once() {
        // The same high run stays inside the window across ticks; only
        // the first sighting may go out.
        let collector = ScriptedCollector {
            batches: VecDeque::from([batch(&[85.0, 86.0, 87.0]), batch(&[84.0])]),
            fail_first: false,
        };
        let (mut monitor, mut rx) = threshold_loop(collector, 100);

        monitor.cycle().await;
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, "high_cpu");

        monitor.cycle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_new_episode_still_reported() {
        let collector = ScriptedCollector {
            batches: VecDeque::from([
                batch(&[85.0, 86.0, 87.0]),
                batch(&[10.0, 10.0, 10.0, 95.0, 96.0, 97.0]),
            ]),
            fail_first: false,
        };
        let (mut monitor, mut rx) = threshold_loop(collector, 100);

        monitor.cycle().await;
        let first = rx.try_recv().unwrap();

        monitor.cycle().await;
        // The original run is suppressed but the fresh one goes out
        let second = rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());
        assert_ne!(first.start_time, second.start_time);
    }

    #[tokio::test]
    async fn test_window_is_bounded() {
        let collector = ScriptedCollector {
            batches: VecDeque::from([batch(&[10.0; 4]), batch(&[20.0; 4])]),
            fail_first: false,
        };
        let (mut monitor, _rx) = threshold_loop(collector, 5);

        monitor.cycle().await;
        monitor.cycle().await;
        assert_eq!(monitor.window.len(), 5);
        // Oldest samples fell off the front
        assert_eq!(monitor.window.front().unwrap().value, 10.0);
        assert_eq!(monitor.window.back().unwrap().value, 20.0);
    }

    #[tokio::test]
    async fn test_event_error_aborts_cycle() {
        struct BrokenDetector;
        impl Detection for BrokenDetector {
            fn name(&self) -> &str {
                "broken"
            }
            fn detect(&mut self, _: &[Sample]) -> Result<Vec<AnomalyEvent>, EventError> {
                Err(EventError::ConfidenceOutOfRange(2.0))
            }
        }

        let collector = ScriptedCollector {
            batches: VecDeque::from([batch(&[85.0, 86.0, 87.0])]),
            fail_first: false,
        };
        let (mut monitor, mut rx) = MonitorLoopBuilder::new()
            .collector(Box::new(collector))
            .detector(Box::new(BrokenDetector))
            .detector(Box::new(
                ThresholdDetector::new(80.0, 3, Duration::from_secs(0)),
            ))
            .build()
            .unwrap();

        monitor.cycle().await;
        // The threshold detector never ran after the broken one failed
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_builder_requires_parts() {
        assert!(MonitorLoopBuilder::new().build().is_err());

        let collector = ScriptedCollector {
            batches: VecDeque::new(),
            fail_first: false,
        };
        assert!(MonitorLoopBuilder::new()
            .collector(Box::new(collector))
            .build()
            .is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let collector = ScriptedCollector {
            batches: VecDeque::new(),
            fail_first: false,
        };
        let (monitor, _rx) = threshold_loop(collector, 10);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(monitor.run(shutdown_rx));
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
