//! Time-window aggregation of the prediction log.
//!
//! [`WindowAggregator::aggregate`] folds raw predictions into fixed-size
//! windows of per-metric statistics. Runs are idempotent: a window that
//! already exists for the same key is overwritten, never duplicated, so the
//! periodic job can be re-run (or run concurrently with ingestion) freely.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::prediction::Prediction;
use crate::stats::DescriptiveStats;
use crate::store::{MetricStore, PredictionStore};
use crate::{MonitorError, Result};

/// Kinds of metric a window can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Confidence,
    Latency,
    Accuracy,
    Throughput,
    ErrorRate,
}

impl MetricType {
    /// Stable lowercase name, used as the metric key in snapshots and rules.
    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Confidence => "confidence",
            MetricType::Latency => "latency",
            MetricType::Accuracy => "accuracy",
            MetricType::Throughput => "throughput",
            MetricType::ErrorRate => "error_rate",
        }
    }
}

/// Aggregate statistics for one model+version+metric over
/// `[window_start, window_end)`. Immutable once materialized; superseded by
/// later windows rather than edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricWindow {
    pub model_name: String,
    pub model_version: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub window_size_minutes: i64,
    pub metric_type: MetricType,
    /// Headline value: the mean for sampled metrics, the rate for throughput.
    pub value: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub std_dev: Option<f64>,
    pub p95: Option<f64>,
    pub sample_count: usize,
}

/// Folds prediction rows into [`MetricWindow`]s on a fixed cadence.
pub struct WindowAggregator {
    predictions: Arc<dyn PredictionStore>,
    metrics: Arc<dyn MetricStore>,
}

impl WindowAggregator {
    pub fn new(predictions: Arc<dyn PredictionStore>, metrics: Arc<dyn MetricStore>) -> Self {
        Self {
            predictions,
            metrics,
        }
    }

    /// Aggregate all predictions for `model_name` within the last
    /// `lookback_hours` into consecutive `window_minutes`-sized buckets,
    /// persist the resulting windows, and return them.
    ///
    /// Buckets with zero samples are omitted, not zero-filled. Empty input is
    /// an empty result, not an error.
    pub fn aggregate(
        &self,
        model_name: &str,
        window_minutes: i64,
        lookback_hours: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<MetricWindow>> {
        if window_minutes <= 0 {
            return Err(MonitorError::InvalidConfiguration(format!(
                "window size must be positive, got {window_minutes} minutes"
            )));
        }
        if lookback_hours <= 0 {
            return Err(MonitorError::InvalidConfiguration(format!(
                "lookback must be positive, got {lookback_hours} hours"
            )));
        }

        let from = now - Duration::hours(lookback_hours);
        let rows = self.predictions.for_model_in_range(model_name, from, now)?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut buckets: BTreeMap<DateTime<Utc>, Vec<&Prediction>> = BTreeMap::new();
        for p in &rows {
            buckets
                .entry(truncate_to_window(p.timestamp, window_minutes))
                .or_default()
                .push(p);
        }

        let mut out = Vec::new();
        for (start, preds) in buckets {
            let end = start + Duration::minutes(window_minutes);
            out.extend(window_metrics(
                model_name,
                &preds,
                start,
                end,
                window_minutes,
            ));
        }

        for w in &out {
            self.metrics.upsert(w.clone())?;
        }
        Ok(out)
    }
}

/// Truncate a timestamp down to the nearest multiple of `window_minutes`
/// (measured from the Unix epoch, so windows larger than an hour stay aligned).
pub fn truncate_to_window(ts: DateTime<Utc>, window_minutes: i64) -> DateTime<Utc> {
    let window_secs = window_minutes * 60;
    let secs = ts.timestamp();
    let truncated = secs.div_euclid(window_secs) * window_secs;
    Utc.timestamp_opt(truncated, 0).single().unwrap_or(ts)
}

/// Compute the per-metric windows for one bucket of predictions.
fn window_metrics(
    model_name: &str,
    preds: &[&Prediction],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    window_minutes: i64,
) -> Vec<MetricWindow> {
    let mut out = Vec::new();
    if preds.is_empty() {
        return out;
    }
    let version = dominant_version(preds);

    let mk = |metric_type: MetricType, stats: DescriptiveStats| MetricWindow {
        model_name: model_name.to_string(),
        model_version: version.clone(),
        window_start: start,
        window_end: end,
        window_size_minutes: window_minutes,
        metric_type,
        value: stats.mean,
        min: Some(stats.min),
        max: Some(stats.max),
        std_dev: Some(stats.std_dev),
        p95: Some(stats.p95),
        sample_count: stats.count,
    };

    let confidences: Vec<f64> = preds.iter().filter_map(|p| p.confidence).collect();
    if let Some(stats) = DescriptiveStats::from_samples(&confidences) {
        out.push(mk(MetricType::Confidence, stats));
    }

    let latencies: Vec<f64> = preds.iter().map(|p| p.latency_ms).collect();
    if let Some(stats) = DescriptiveStats::from_samples(&latencies) {
        out.push(mk(MetricType::Latency, stats));
    }

    let accuracies: Vec<f64> = preds.iter().filter_map(|p| p.accuracy()).collect();
    if let Some(stats) = DescriptiveStats::from_samples(&accuracies) {
        out.push(mk(MetricType::Accuracy, stats));
    }

    // Error rate mirrors accuracy: the per-row fraction of wrong fields.
    let errors: Vec<f64> = accuracies.iter().map(|a| 1.0 - a).collect();
    if let Some(stats) = DescriptiveStats::from_samples(&errors) {
        out.push(mk(MetricType::ErrorRate, stats));
    }

    // Throughput: predictions per hour of window.
    let window_hours = window_minutes as f64 / 60.0;
    out.push(MetricWindow {
        model_name: model_name.to_string(),
        model_version: version,
        window_start: start,
        window_end: end,
        window_size_minutes: window_minutes,
        metric_type: MetricType::Throughput,
        value: preds.len() as f64 / window_hours,
        min: None,
        max: None,
        std_dev: None,
        p95: None,
        sample_count: preds.len(),
    });

    out
}

/// Most frequent model version within a bucket (ties break lexicographically
/// to keep re-runs deterministic).
fn dominant_version(preds: &[&Prediction]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for p in preds {
        *counts.entry(p.model_version.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(v, _)| v.to_string())
        .unwrap_or_default()
}
