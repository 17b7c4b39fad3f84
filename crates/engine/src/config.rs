//! Engine configuration
//!
//! Serde-deserializable tree loaded from an optional TOML file with
//! `OPSWATCH_`-prefixed environment overrides layered on top. Every
//! field has a default so an empty config is a working config;
//! `validate` rejects values the detectors cannot operate with.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: f64 },
    #[error("{field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// CPU signal parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Static busy-percent limit for the threshold detector
    pub threshold_percent: f64,
    /// Nominal minimum anomaly duration in seconds
    pub duration_seconds: u64,
    /// Consecutive samples needed to open or close a window
    pub consecutive_periods: usize,
    /// Standard deviations over the mean for the baseline detector
    pub std_multiplier: f64,
    /// Sampling interval in seconds
    pub interval_seconds: u64,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            threshold_percent: 80.0,
            duration_seconds: 300,
            consecutive_periods: 3,
            std_multiplier: 2.0,
            interval_seconds: 10,
        }
    }
}

/// Memory and swap signal parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Usage percent treated as exhaustion for trend prediction
    pub risk_threshold_percent: f64,
    /// How far ahead a predicted breach still matters, in hours
    pub prediction_window_hours: u64,
    /// Swap-used percent the sustained test holds samples against
    pub swap_threshold_percent: f64,
    /// Multiple of the calm baseline a swap spike must reach
    pub swap_spike_multiplier: f64,
    pub interval_seconds: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            risk_threshold_percent: 90.0,
            prediction_window_hours: 24,
            swap_threshold_percent: 50.0,
            swap_spike_multiplier: 3.0,
            interval_seconds: 10,
        }
    }
}

/// Disk I/O signal parameters, applied per device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Await-latency floor in ms before a spike can fire
    pub latency_threshold_ms: f64,
    /// Multiple of baseline latency that marks a spike
    pub latency_spike_multiplier: f64,
    /// Percent drop from baseline throughput that marks degradation
    pub throughput_drop_percent: f64,
    /// Divisor of baseline throughput that marks a collapse spike
    pub throughput_spike_multiplier: f64,
    /// In-flight I/O count the sustained test holds samples against
    pub queue_depth_threshold: f64,
    /// Fraction of the window a run must cover to be sustained
    pub sustained_ratio: f64,
    /// Events scoring below this confidence are dropped
    pub min_confidence: f64,
    pub interval_seconds: u64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            latency_threshold_ms: 100.0,
            latency_spike_multiplier: 3.0,
            throughput_drop_percent: 50.0,
            throughput_spike_multiplier: 4.0,
            queue_depth_threshold: 10.0,
            sustained_ratio: 0.3,
            min_confidence: 0.7,
            interval_seconds: 10,
        }
    }
}

/// Per-process signal parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Resident-size growth in MB per hour that suggests a leak
    pub leak_growth_mb_per_hour: f64,
    /// Minimum r-squared for a leak trend to be trusted
    pub leak_confidence_threshold: f64,
    pub interval_seconds: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            leak_growth_mb_per_hour: 50.0,
            leak_confidence_threshold: 0.8,
            interval_seconds: 30,
        }
    }
}

/// Root configuration tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cpu: CpuConfig,
    pub memory: MemoryConfig,
    pub disk: DiskConfig,
    pub process: ProcessConfig,
}

impl EngineConfig {
    /// Load from an optional file plus OPSWATCH_* environment overrides
    ///
    /// Nested fields use a double underscore in the environment, e.g.
    /// `OPSWATCH_CPU__THRESHOLD_PERCENT=90`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        builder = match path {
            Some(path) => builder.add_source(config::File::from(path)),
            None => builder.add_source(config::File::with_name("opswatch").required(false)),
        };
        builder = builder.add_source(
            config::Environment::with_prefix("OPSWATCH")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .context("failed to load configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
            if value <= 0.0 {
                return Err(ConfigError::NonPositive { field, value });
            }
            Ok(())
        }
        fn within(
            field: &'static str,
            value: f64,
            min: f64,
            max: f64,
        ) -> Result<(), ConfigError> {
            if !(min..=max).contains(&value) {
                return Err(ConfigError::OutOfRange {
                    field,
                    value,
                    min,
                    max,
                });
            }
            Ok(())
        }

        positive("cpu.threshold_percent", self.cpu.threshold_percent)?;
        positive("cpu.std_multiplier", self.cpu.std_multiplier)?;
        positive(
            "cpu.consecutive_periods",
            self.cpu.consecutive_periods as f64,
        )?;
        positive("cpu.interval_seconds", self.cpu.interval_seconds as f64)?;

        positive(
            "memory.risk_threshold_percent",
            self.memory.risk_threshold_percent,
        )?;
        positive(
            "memory.prediction_window_hours",
            self.memory.prediction_window_hours as f64,
        )?;
        positive(
            "memory.swap_threshold_percent",
            self.memory.swap_threshold_percent,
        )?;
        positive(
            "memory.swap_spike_multiplier",
            self.memory.swap_spike_multiplier,
        )?;
        positive(
            "memory.interval_seconds",
            self.memory.interval_seconds as f64,
        )?;

        positive("disk.latency_threshold_ms", self.disk.latency_threshold_ms)?;
        positive(
            "disk.latency_spike_multiplier",
            self.disk.latency_spike_multiplier,
        )?;
        positive(
            "disk.throughput_spike_multiplier",
            self.disk.throughput_spike_multiplier,
        )?;
        positive(
            "disk.queue_depth_threshold",
            self.disk.queue_depth_threshold,
        )?;
        positive("disk.interval_seconds", self.disk.interval_seconds as f64)?;
        within(
            "disk.throughput_drop_percent",
            self.disk.throughput_drop_percent,
            0.0,
            100.0,
        )?;
        within("disk.sustained_ratio", self.disk.sustained_ratio, 0.0, 1.0)?;
        within("disk.min_confidence", self.disk.min_confidence, 0.0, 1.0)?;

        positive(
            "process.leak_growth_mb_per_hour",
            self.process.leak_growth_mb_per_hour,
        )?;
        within(
            "process.leak_confidence_threshold",
            self.process.leak_confidence_threshold,
            0.0,
            1.0,
        )?;
        positive(
            "process.interval_seconds",
            self.process.interval_seconds as f64,
        )?;

        Ok(())
    }
}
