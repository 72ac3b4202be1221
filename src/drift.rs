//! Drift detection: population stability and prediction-distribution checks.
//!
//! Two detection modes, both over confidence scores from the prediction log:
//!
//! - **Population drift** compares an explicit baseline range against an
//!   explicit current range via the Population Stability Index.
//! - **Prediction-distribution drift** splits a lookback window in half and
//!   runs a two-sample Kolmogorov–Smirnov test between the halves.
//!
//! Both modes gate on a minimum sample size per side and refuse to emit a
//! partial result below it. A detection is only materialized when the score
//! clears its threshold; quiet periods write nothing.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::prediction::prefixed_id;
use crate::stats::{ks_two_sample, population_stability_index, sample_std_dev};
use crate::store::{DriftStore, PredictionStore};
use crate::{MonitorError, Result};

/// Which distribution shifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftKind {
    /// Baseline-vs-current confidence histogram shift (PSI).
    Population,
    /// Older-half vs newer-half confidence distribution shift (KS).
    PredictionDistribution,
}

/// Summary of one side of a drift comparison, stored for later audit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub sample_count: usize,
    pub mean_confidence: f64,
    pub std_confidence: f64,
}

impl PeriodSummary {
    fn from_confidences(start: DateTime<Utc>, end: DateTime<Utc>, values: &[f64]) -> Self {
        let mean = if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        };
        Self {
            start,
            end,
            sample_count: values.len(),
            mean_confidence: mean,
            std_confidence: sample_std_dev(values, mean),
        }
    }
}

/// One detection event. Append-only; created only when a threshold is crossed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftDetection {
    /// Unique id, `DRIFT-yyyymmdd-xxxxxxxx`.
    pub id: String,
    pub model_name: String,
    pub model_version: String,
    pub kind: DriftKind,
    /// PSI for population drift, KS statistic for distribution drift.
    pub score: f64,
    pub threshold: f64,
    /// KS statistic (distribution mode only).
    pub test_statistic: Option<f64>,
    /// KS p-value (distribution mode only).
    pub p_value: Option<f64>,
    pub baseline: PeriodSummary,
    pub current: PeriodSummary,
    pub detected_at: DateTime<Utc>,
}

/// Detection thresholds and sampling requirements.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DriftConfig {
    /// PSI above this emits a population-drift detection.
    pub psi_threshold: f64,
    /// KS statistic must exceed this (in addition to the p-value gate).
    pub ks_threshold: f64,
    /// KS p-value must fall below this.
    pub ks_p_value: f64,
    /// Minimum predictions per side before any comparison runs.
    pub min_samples: usize,
    /// Histogram bins for PSI.
    pub bins: usize,
    /// Zero-proportion replacement for PSI.
    pub epsilon: f64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            psi_threshold: 0.05,
            ks_threshold: 0.10,
            ks_p_value: 0.05,
            min_samples: 100,
            bins: 10,
            epsilon: 1e-4,
        }
    }
}

/// Compares prediction populations and records detections.
pub struct DriftDetector {
    predictions: Arc<dyn PredictionStore>,
    detections: Arc<dyn DriftStore>,
    cfg: DriftConfig,
}

impl DriftDetector {
    pub fn new(
        predictions: Arc<dyn PredictionStore>,
        detections: Arc<dyn DriftStore>,
        cfg: DriftConfig,
    ) -> Self {
        Self {
            predictions,
            detections,
            cfg,
        }
    }

    pub fn config(&self) -> DriftConfig {
        self.cfg
    }

    /// Population drift between two explicit time ranges.
    ///
    /// Returns `Ok(None)` when the PSI stays at or under the threshold, the
    /// persisted detection when it does not, and `InsufficientSamples` when
    /// either side is below `min_samples` (no partial result).
    pub fn detect_population_drift(
        &self,
        model_name: &str,
        model_version: &str,
        baseline_range: (DateTime<Utc>, DateTime<Utc>),
        current_range: (DateTime<Utc>, DateTime<Utc>),
        now: DateTime<Utc>,
    ) -> Result<Option<DriftDetection>> {
        let baseline =
            self.predictions
                .for_model_in_range(model_name, baseline_range.0, baseline_range.1)?;
        let current =
            self.predictions
                .for_model_in_range(model_name, current_range.0, current_range.1)?;
        self.require_samples(baseline.len(), current.len())?;

        let base_conf: Vec<f64> = baseline.iter().filter_map(|p| p.confidence).collect();
        let cur_conf: Vec<f64> = current.iter().filter_map(|p| p.confidence).collect();

        let psi =
            population_stability_index(&base_conf, &cur_conf, self.cfg.bins, self.cfg.epsilon);
        if psi <= self.cfg.psi_threshold {
            return Ok(None);
        }

        let detection = DriftDetection {
            id: prefixed_id("DRIFT", now),
            model_name: model_name.to_string(),
            model_version: model_version.to_string(),
            kind: DriftKind::Population,
            score: psi,
            threshold: self.cfg.psi_threshold,
            test_statistic: None,
            p_value: None,
            baseline: PeriodSummary::from_confidences(
                baseline_range.0,
                baseline_range.1,
                &base_conf,
            ),
            current: PeriodSummary::from_confidences(current_range.0, current_range.1, &cur_conf),
            detected_at: now,
        };
        self.detections.append(detection.clone())?;
        tracing::warn!(
            model = model_name,
            version = model_version,
            psi,
            threshold = self.cfg.psi_threshold,
            "population drift detected"
        );
        Ok(Some(detection))
    }

    /// Prediction-distribution drift over the last `lookback_days`: the older
    /// half of the window is the baseline, the newer half the current sample.
    ///
    /// Emits a detection only when the KS p-value falls below `ks_p_value`
    /// *and* the statistic exceeds `ks_threshold`.
    pub fn detect_prediction_drift(
        &self,
        model_name: &str,
        model_version: &str,
        lookback_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<DriftDetection>> {
        if lookback_days <= 0 {
            return Err(MonitorError::InvalidConfiguration(format!(
                "lookback must be positive, got {lookback_days} days"
            )));
        }
        let start = now - Duration::days(lookback_days);
        let mid = now - Duration::seconds(lookback_days * 86_400 / 2);

        let early = self.predictions.for_model_in_range(model_name, start, mid)?;
        let recent = self.predictions.for_model_in_range(model_name, mid, now)?;
        self.require_samples(early.len(), recent.len())?;

        let early_conf: Vec<f64> = early.iter().filter_map(|p| p.confidence).collect();
        let recent_conf: Vec<f64> = recent.iter().filter_map(|p| p.confidence).collect();
        let ks = ks_two_sample(&early_conf, &recent_conf)?;

        if ks.p_value >= self.cfg.ks_p_value || ks.statistic <= self.cfg.ks_threshold {
            return Ok(None);
        }

        let detection = DriftDetection {
            id: prefixed_id("DRIFT", now),
            model_name: model_name.to_string(),
            model_version: model_version.to_string(),
            kind: DriftKind::PredictionDistribution,
            score: ks.statistic,
            threshold: self.cfg.ks_threshold,
            test_statistic: Some(ks.statistic),
            p_value: Some(ks.p_value),
            baseline: PeriodSummary::from_confidences(start, mid, &early_conf),
            current: PeriodSummary::from_confidences(mid, now, &recent_conf),
            detected_at: now,
        };
        self.detections.append(detection.clone())?;
        tracing::warn!(
            model = model_name,
            version = model_version,
            ks = ks.statistic,
            p = ks.p_value,
            "prediction-distribution drift detected"
        );
        Ok(Some(detection))
    }

    fn require_samples(&self, baseline: usize, current: usize) -> Result<()> {
        if baseline < self.cfg.min_samples || current < self.cfg.min_samples {
            return Err(MonitorError::InsufficientSamples {
                required: self.cfg.min_samples,
                baseline,
                current,
            });
        }
        Ok(())
    }
}
