//! Detection engine for host resource anomalies
//!
//! This crate provides the core functionality for:
//! - Statistical anomaly detection over resource sample streams
//! - Thin /proc-based sample collection
//! - A periodic monitor loop feeding detectors
//! - File-backed alert persistence
//! - Configuration loading and validation

pub mod alert;
pub mod collector;
pub mod config;
pub mod detect;
pub mod models;
pub mod monitor;
pub mod scoring;
pub mod stats;

pub use alert::{Alert, AlertError, AlertStatus, AlertStore};
pub use config::EngineConfig;
pub use detect::{
    BaselineDetector, CrashDetector, Detection, DeviationDetector, ThresholdDetector,
    TrendDetector, ZombieDetector,
};
pub use models::{AnomalyEvent, EventError, ProcessSnapshot, Report, Sample, Severity};
pub use stats::{Baseline, TrendFit};
