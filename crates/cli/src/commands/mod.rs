//! Command implementations
//!
//! Each monitored signal maps to a fixed set of collector/detector
//! pairings built from the loaded configuration; the commands differ
//! only in how they drive those pipelines.

pub mod alerts;
pub mod collect;
pub mod detect;
pub mod monitor;
pub mod show_config;

use std::time::Duration;

use clap::ValueEnum;
use opswatch_engine::collector::{
    CpuCollector, DiskCollector, DiskMetric, MemoryCollector, ProcessCollector, SampleCollector,
};
use opswatch_engine::{
    BaselineDetector, Detection, DeviationDetector, EngineConfig, ThresholdDetector, TrendDetector,
};

/// A monitored signal family
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Signal {
    Cpu,
    Memory,
    Swap,
    Disk,
    Process,
}

/// One collector and the detectors that watch its series
pub struct Pipeline {
    pub collector: Box<dyn SampleCollector>,
    pub detectors: Vec<Box<dyn Detection>>,
}

/// Build the collector/detector pairings for a signal
pub fn pipelines(signal: Signal, config: &EngineConfig) -> Vec<Pipeline> {
    match signal {
        Signal::Cpu => vec![Pipeline {
            collector: Box::new(CpuCollector::new()),
            detectors: cpu_detectors(config),
        }],
        Signal::Memory => vec![Pipeline {
            collector: Box::new(MemoryCollector::usage()),
            detectors: memory_detectors(config),
        }],
        Signal::Swap => vec![Pipeline {
            collector: Box::new(MemoryCollector::swap()),
            detectors: swap_detectors(config),
        }],
        Signal::Disk => {
            let disk = &config.disk;
            let latency = |op: &str| -> Box<dyn Detection> {
                Box::new(
                    DeviationDetector::io_latency(
                        op,
                        disk.latency_threshold_ms,
                        disk.latency_spike_multiplier,
                    )
                    .with_min_confidence(disk.min_confidence),
                )
            };
            let throughput = |op: &str| -> Box<dyn Detection> {
                Box::new(
                    DeviationDetector::throughput(
                        op,
                        disk.throughput_drop_percent,
                        disk.throughput_spike_multiplier,
                    )
                    .with_sustained(disk.sustained_ratio)
                    .with_min_confidence(disk.min_confidence),
                )
            };
            vec![
                disk_pipeline(DiskMetric::ReadLatency, latency("read")),
                disk_pipeline(DiskMetric::WriteLatency, latency("write")),
                disk_pipeline(DiskMetric::ReadThroughput, throughput("read")),
                disk_pipeline(DiskMetric::WriteThroughput, throughput("write")),
                disk_pipeline(
                    DiskMetric::QueueDepth,
                    Box::new(
                        DeviationDetector::queue_depth(
                            disk.queue_depth_threshold,
                            disk.sustained_ratio,
                        )
                        .with_min_confidence(disk.min_confidence),
                    ),
                ),
            ]
        }
        Signal::Process => vec![Pipeline {
            collector: Box::new(ProcessCollector::new()),
            detectors: process_detectors(config),
        }],
    }
}

fn disk_pipeline(metric: DiskMetric, detector: Box<dyn Detection>) -> Pipeline {
    Pipeline {
        collector: Box::new(DiskCollector::new(metric)),
        detectors: vec![detector],
    }
}

fn cpu_detectors(config: &EngineConfig) -> Vec<Box<dyn Detection>> {
    let cpu = &config.cpu;
    vec![
        Box::new(ThresholdDetector::new(
            cpu.threshold_percent,
            cpu.consecutive_periods,
            Duration::from_secs(cpu.duration_seconds),
        )),
        Box::new(BaselineDetector::new(cpu.std_multiplier)),
    ]
}

fn memory_detectors(config: &EngineConfig) -> Vec<Box<dyn Detection>> {
    let memory = &config.memory;
    vec![Box::new(TrendDetector::exhaustion(
        memory.risk_threshold_percent,
        Duration::from_secs(memory.prediction_window_hours * 3600),
    ))]
}

fn swap_detectors(config: &EngineConfig) -> Vec<Box<dyn Detection>> {
    let memory = &config.memory;
    vec![Box::new(DeviationDetector::swap(
        memory.swap_threshold_percent,
        memory.swap_spike_multiplier,
    ))]
}

fn process_detectors(config: &EngineConfig) -> Vec<Box<dyn Detection>> {
    let process = &config.process;
    vec![Box::new(TrendDetector::leak(
        process.leak_growth_mb_per_hour,
        process.leak_confidence_threshold,
    ))]
}

/// Every detector configured for a signal, for running over a recorded
/// series that is not split per collector
pub fn detectors_for(signal: Signal, config: &EngineConfig) -> Vec<Box<dyn Detection>> {
    pipelines(signal, config)
        .into_iter()
        .flat_map(|p| p.detectors)
        .collect()
}

/// Configured sampling interval for a signal
pub fn interval_for(signal: Signal, config: &EngineConfig) -> Duration {
    let secs = match signal {
        Signal::Cpu => config.cpu.interval_seconds,
        Signal::Memory | Signal::Swap => config.memory.interval_seconds,
        Signal::Disk => config.disk.interval_seconds,
        Signal::Process => config.process.interval_seconds,
    };
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipelines_per_signal() {
        let config = EngineConfig::default();
        assert_eq!(pipelines(Signal::Cpu, &config).len(), 1);
        assert_eq!(pipelines(Signal::Disk, &config).len(), 5);

        // CPU gets both the static and the adaptive detector
        assert_eq!(detectors_for(Signal::Cpu, &config).len(), 2);
        assert_eq!(detectors_for(Signal::Process, &config).len(), 1);
    }

    #[test]
    fn test_interval_follows_config_section() {
        let mut config = EngineConfig::default();
        config.process.interval_seconds = 60;
        assert_eq!(
            interval_for(Signal::Process, &config),
            Duration::from_secs(60)
        );
        assert_eq!(interval_for(Signal::Cpu, &config), Duration::from_secs(10));
    }
}
