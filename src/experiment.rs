//! Experiment domain model: champion/challenger configuration and state.
//!
//! An [`Experiment`] is a plain value type; all mutation flows through
//! [`crate::evaluator::ExperimentEvaluator`], which serializes access per
//! experiment. Status transitions are one-directional except the
//! RUNNING↔PAUSED pair; COMPLETED and CANCELLED are terminal and reject all
//! further routing and recording.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{MonitorError, Result};

/// One side of an A/B comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Champion,
    Challenger,
}

impl Variant {
    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Champion => "champion",
            Variant::Challenger => "challenger",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A model identified by name and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub name: String,
    pub version: String,
}

impl ModelRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

/// Lifecycle state of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentStatus {
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl ExperimentStatus {
    /// COMPLETED and CANCELLED accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, ExperimentStatus::Completed | ExperimentStatus::Cancelled)
    }
}

/// Validated experiment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    pub champion: ModelRef,
    pub challenger: ModelRef,
    /// Fraction of traffic directed to the challenger, in `[0, 1]`.
    pub traffic_split: f64,
    /// Minimum samples per variant before significance can complete the run.
    pub min_sample_size: usize,
    /// Hard stop after this many days.
    pub max_duration_days: i64,
    /// Two-sided p-value below which the mean difference is significant.
    pub significance_level: f64,
}

impl ExperimentConfig {
    /// Check every field is inside its valid domain.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.traffic_split) || !self.traffic_split.is_finite() {
            return Err(MonitorError::InvalidConfiguration(format!(
                "traffic_split must be in [0, 1], got {}",
                self.traffic_split
            )));
        }
        if self.min_sample_size < 2 {
            return Err(MonitorError::InvalidConfiguration(format!(
                "min_sample_size must be at least 2, got {}",
                self.min_sample_size
            )));
        }
        if self.max_duration_days <= 0 {
            return Err(MonitorError::InvalidConfiguration(format!(
                "max_duration_days must be positive, got {}",
                self.max_duration_days
            )));
        }
        if !(self.significance_level > 0.0 && self.significance_level < 1.0) {
            return Err(MonitorError::InvalidConfiguration(format!(
                "significance_level must be in (0, 1), got {}",
                self.significance_level
            )));
        }
        Ok(())
    }
}

/// Per-variant accumulation: a monotone sample count and append-only metric
/// series keyed by metric name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantData {
    pub samples: u64,
    pub metrics: BTreeMap<String, Vec<f64>>,
}

impl VariantData {
    fn record(&mut self, metric_name: &str, value: f64) {
        self.samples += 1;
        self.metrics
            .entry(metric_name.to_string())
            .or_default()
            .push(value);
    }
}

/// A champion/challenger experiment with its accumulated results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    /// Unique id, `ABT-yyyymmdd-xxxxxxxx`.
    pub id: String,
    pub config: ExperimentConfig,
    pub status: ExperimentStatus,
    pub champion_data: VariantData,
    pub challenger_data: VariantData,
    pub winner: Option<Variant>,
    pub significance_reached: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Experiment {
    pub fn new(id: String, config: ExperimentConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            config,
            status: ExperimentStatus::Running,
            champion_data: VariantData::default(),
            challenger_data: VariantData::default(),
            winner: None,
            significance_reached: false,
            started_at,
            completed_at: None,
        }
    }

    pub fn variant_data(&self, variant: Variant) -> &VariantData {
        match variant {
            Variant::Champion => &self.champion_data,
            Variant::Challenger => &self.challenger_data,
        }
    }

    pub fn model_for(&self, variant: Variant) -> &ModelRef {
        match variant {
            Variant::Champion => &self.config.champion,
            Variant::Challenger => &self.config.challenger,
        }
    }

    /// Error unless the experiment is RUNNING.
    pub fn require_running(&self) -> Result<()> {
        if self.status != ExperimentStatus::Running {
            return Err(MonitorError::ExperimentNotActive {
                id: self.id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    /// Whether the maximum duration has elapsed at `now`.
    pub fn duration_exceeded(&self, now: DateTime<Utc>) -> bool {
        now - self.started_at > Duration::days(self.config.max_duration_days)
    }

    /// Whether both variants have reached the minimum sample size.
    pub fn both_at_min_samples(&self) -> bool {
        let min = self.config.min_sample_size as u64;
        self.champion_data.samples >= min && self.challenger_data.samples >= min
    }

    pub(crate) fn record(&mut self, variant: Variant, metric_name: &str, value: f64) {
        match variant {
            Variant::Champion => self.champion_data.record(metric_name, value),
            Variant::Challenger => self.challenger_data.record(metric_name, value),
        }
    }

    /// Complete the experiment. One-way and idempotent: a second call leaves
    /// winner, flag, and timestamps untouched.
    pub(crate) fn complete(
        &mut self,
        winner: Option<Variant>,
        significance_reached: bool,
        now: DateTime<Utc>,
    ) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ExperimentStatus::Completed;
        self.winner = winner;
        self.significance_reached = significance_reached;
        self.completed_at = Some(now);
    }

    pub(crate) fn pause(&mut self) -> Result<()> {
        self.require_running()?;
        self.status = ExperimentStatus::Paused;
        Ok(())
    }

    pub(crate) fn resume(&mut self) -> Result<()> {
        if self.status != ExperimentStatus::Paused {
            return Err(MonitorError::ExperimentNotActive {
                id: self.id.clone(),
                status: self.status,
            });
        }
        self.status = ExperimentStatus::Running;
        Ok(())
    }

    pub(crate) fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(MonitorError::ExperimentNotActive {
                id: self.id.clone(),
                status: self.status,
            });
        }
        self.status = ExperimentStatus::Cancelled;
        self.completed_at = Some(now);
        Ok(())
    }
}
