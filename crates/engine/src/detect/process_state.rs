//! Process-state checks over snapshot batches
//!
//! These detectors look at the process table itself rather than a
//! numeric series, so they take [`ProcessSnapshot`] batches instead of
//! implementing [`super::Detection`]. Empty batches are a valid
//! observation: every process disappearing at once is exactly what the
//! crash check must notice.

use std::collections::HashSet;

use chrono::Utc;

use crate::models::{AnomalyEvent, EventError, ProcessSnapshot, Severity};

/// Flags zombie processes present in a snapshot batch
///
/// Stateless; emits one summary event per batch that contains any
/// process in state Z.
#[derive(Debug, Clone, Default)]
pub struct ZombieDetector;

impl ZombieDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(
        &self,
        snapshots: &[ProcessSnapshot],
    ) -> Result<Vec<AnomalyEvent>, EventError> {
        let zombies: Vec<&ProcessSnapshot> =
            snapshots.iter().filter(|s| s.is_zombie()).collect();
        if zombies.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = AnomalyEvent::builder("zombie_process", "zombie_detector")
            .start_time(Utc::now())
            .severity(Severity::Warning)
            .confidence(1.0)
            .metric("zombie_count", zombies.len() as f64);
        // A lone zombie is attributable to one pid; several are not
        if let [zombie] = zombies.as_slice() {
            builder = builder
                .entity(zombie.pid.to_string())
                .metric("parent_pid", zombie.ppid as f64);
        }
        Ok(vec![builder.build()?])
    }
}

/// Flags processes that vanished between two snapshot batches
///
/// Keeps the previous batch's pid set; the first call only records
/// state and never fires.
#[derive(Debug, Clone, Default)]
pub struct CrashDetector {
    prev_pids: HashSet<u32>,
    primed: bool,
}

impl CrashDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detect(
        &mut self,
        snapshots: &[ProcessSnapshot],
    ) -> Result<Vec<AnomalyEvent>, EventError> {
        let current: HashSet<u32> = snapshots.iter().map(|s| s.pid).collect();
        let disappeared: Vec<u32> = if self.primed {
            self.prev_pids.difference(&current).copied().collect()
        } else {
            Vec::new()
        };
        self.prev_pids = current;
        self.primed = true;

        if disappeared.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = AnomalyEvent::builder("process_crash", "crash_detector")
            .start_time(Utc::now())
            .severity(Severity::Critical)
            .confidence(0.8)
            .metric("disappeared_count", disappeared.len() as f64);
        if let [pid] = disappeared.as_slice() {
            builder = builder.entity(pid.to_string());
        }
        Ok(vec![builder.build()?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pid: u32, state: char) -> ProcessSnapshot {
        ProcessSnapshot {
            pid,
            name: format!("proc-{pid}"),
            state,
            ppid: 1,
            cpu_percent: 0.0,
            rss_bytes: 1024 * 1024,
        }
    }

    #[test]
    fn test_zombie_among_healthy_processes() {
        let detector = ZombieDetector::new();
        let snapshots = vec![snapshot(1234, 'Z'), snapshot(5678, 'S')];

        let events = detector.detect(&snapshots).unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.kind, "zombie_process");
        assert_eq!(event.severity, Severity::Warning);
        assert_eq!(event.confidence, 1.0);
        assert_eq!(event.metrics["zombie_count"], 1.0);
        assert_eq!(event.metrics["parent_pid"], 1.0);
        assert_eq!(event.entity_key.as_deref(), Some("1234"));
    }

    #[test]
    fn test_no_zombies_no_event() {
        let detector = ZombieDetector::new();
        let snapshots = vec![snapshot(1234, 'S'), snapshot(5678, 'R')];
        assert!(detector.detect(&snapshots).unwrap().is_empty());
        assert!(detector.detect(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_multiple_zombies_single_summary() {
        let detector = ZombieDetector::new();
        let snapshots = vec![snapshot(10, 'Z'), snapshot(20, 'Z'), snapshot(30, 'S')];

        let events = detector.detect(&snapshots).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].metrics["zombie_count"], 2.0);
        assert!(events[0].entity_key.is_none());
    }

    #[test]
    fn test_disappeared_process_fires_after_priming() {
        let mut detector = CrashDetector::new();

        let first = vec![snapshot(1234, 'S')];
        assert!(detector.detect(&first).unwrap().is_empty());

        // Process gone on the next batch
        let events = detector.detect(&[]).unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.kind, "process_crash");
        assert_eq!(event.severity, Severity::Critical);
        assert_eq!(event.confidence, 0.8);
        assert_eq!(event.metrics["disappeared_count"], 1.0);
        assert_eq!(event.entity_key.as_deref(), Some("1234"));
    }

    #[test]
    fn test_stable_process_table_stays_quiet() {
        let mut detector = CrashDetector::new();
        let batch = vec![snapshot(1, 'S'), snapshot(2, 'S')];

        assert!(detector.detect(&batch).unwrap().is_empty());
        assert!(detector.detect(&batch).unwrap().is_empty());
        assert!(detector.detect(&batch).unwrap().is_empty());
    }

    #[test]
    fn test_new_processes_are_not_crashes() {
        let mut detector = CrashDetector::new();

        detector.detect(&[snapshot(1, 'S')]).unwrap();
        let grown = vec![snapshot(1, 'S'), snapshot(2, 'S'), snapshot(3, 'R')];
        assert!(detector.detect(&grown).unwrap().is_empty());
    }

    #[test]
    fn test_each_vanishing_reported_once() {
        let mut detector = CrashDetector::new();

        detector
            .detect(&[snapshot(1, 'S'), snapshot(2, 'S')])
            .unwrap();
        let events = detector.detect(&[snapshot(1, 'S')]).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].entity_key.as_deref(), Some("2"));

        // Already accounted for; the shrunken table is the new normal
        assert!(detector.detect(&[snapshot(1, 'S')]).unwrap().is_empty());
    }
}
