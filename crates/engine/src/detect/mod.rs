//! Anomaly detectors
//!
//! Four detection strategies share the sample data model:
//! - [`ThresholdDetector`]: static limits with hysteresis
//! - [`BaselineDetector`]: adaptive limits from historical data
//! - [`TrendDetector`]: least-squares extrapolation toward a capacity limit
//! - [`DeviationDetector`]: instantaneous spikes and sustained runs
//!
//! Two process-state checks, [`ZombieDetector`] and [`CrashDetector`],
//! work on process snapshot batches instead of sample series.
//!
//! Detectors are pure over their inputs: they perform no I/O, never
//! mutate the sample sequence, and may run on any thread. Malformed or
//! insufficient input yields an empty result; an invariant violation
//! while constructing an event is an [`EventError`] and aborts the
//! detection cycle.

mod baseline;
mod deviation;
mod process_state;
mod threshold;
mod trend;

pub use baseline::BaselineDetector;
pub use deviation::{BaselineSource, DeviationDetector, Direction};
pub use process_state::{CrashDetector, ZombieDetector};
pub use threshold::ThresholdDetector;
pub use trend::TrendDetector;

use std::collections::BTreeMap;

use crate::models::{AnomalyEvent, EventError, Sample};

/// Uniform detection seam for the monitor loop
///
/// `&mut self` accommodates the one piece of cross-call state the
/// engine allows: the cached baseline in [`BaselineDetector`].
pub trait Detection: Send {
    fn name(&self) -> &str;

    fn detect(&mut self, samples: &[Sample]) -> Result<Vec<AnomalyEvent>, EventError>;
}

/// Group borrowed samples by entity key, preserving input order
///
/// Samples without a key form a single whole-system group.
pub(crate) fn group_by_entity(samples: &[Sample]) -> BTreeMap<Option<String>, Vec<&Sample>> {
    let mut groups: BTreeMap<Option<String>, Vec<&Sample>> = BTreeMap::new();
    for sample in samples {
        groups
            .entry(sample.entity_key.clone())
            .or_default()
            .push(sample);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_group_by_entity() {
        let ts = Utc.timestamp_opt(0, 0).unwrap();
        let samples = vec![
            Sample::with_entity(ts, 1.0, "sda"),
            Sample::with_entity(ts, 2.0, "sdb"),
            Sample::with_entity(ts, 3.0, "sda"),
            Sample::new(ts, 4.0),
        ];

        let groups = group_by_entity(&samples);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups.get(&Some("sda".to_string())).unwrap().len(), 2);
        assert_eq!(groups.get(&None).unwrap().len(), 1);
    }
}
