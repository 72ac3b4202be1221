//! The top-level facade wiring ingestion, aggregation, drift detection,
//! experimentation, and alerting over a shared store.
//!
//! [`MonitorEngine`] is what a service embeds. Public methods stamp the
//! current wall clock and delegate to `*_at` variants that take an explicit
//! timestamp; the `*_at` forms exist so schedulers can replay historical data
//! and tests can control time.
//!
//! Notification is fire-and-forget: a failing [`AlertNotifier`] is logged and
//! never fails the operation that raised the alert, since the alert itself is
//! already persisted and queryable.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::alert::{Alert, AlertManager, AlertRule, AlertSeverity, AlertStatus};
use crate::drift::{DriftConfig, DriftDetection, DriftDetector};
use crate::evaluator::{ActiveExperiment, ExperimentEvaluator, ExperimentResults, RoutedModel};
use crate::experiment::{ExperimentConfig, Variant};
use crate::prediction::{field_correctness, prefixed_id, Prediction};
use crate::store::{AlertStore, DriftStore, MemoryStore, MetricStore, PredictionStore};
use crate::window::{MetricType, MetricWindow, WindowAggregator};
use crate::Result;

/// Confidence below this raises a realtime warning at ingestion.
pub const LOW_CONFIDENCE_FLOOR: f64 = 0.80;
/// Latency above this (milliseconds) raises a realtime warning at ingestion.
pub const HIGH_LATENCY_CEILING_MS: f64 = 2000.0;
/// Mean accuracy or confidence falling this far below the model's own
/// baseline counts as degradation.
pub const DEGRADATION_DROP: f64 = 0.05;
/// Mean latency growing past this multiple of the baseline counts as
/// degradation.
pub const DEGRADATION_LATENCY_RATIO: f64 = 1.2;

/// One metric that moved against the model's own baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationFinding {
    pub metric_type: MetricType,
    pub baseline_mean: f64,
    pub recent_mean: f64,
    /// `recent_mean - baseline_mean`.
    pub change: f64,
}

enum Degraded {
    Drop,
    Growth,
}

/// Sample-weighted mean of the window means for one metric type.
fn weighted_mean(windows: &[&MetricWindow], metric_type: MetricType) -> Option<f64> {
    let mut total = 0usize;
    let mut acc = 0.0;
    for w in windows.iter().filter(|w| w.metric_type == metric_type) {
        total += w.sample_count;
        acc += w.value * w.sample_count as f64;
    }
    (total > 0).then(|| acc / total as f64)
}

/// Resolves a model's deployment stage. Backed by a model registry in
/// production; the default implementation knows nothing.
pub trait ModelRegistry: Send + Sync {
    fn model_stage(&self, model_name: &str, model_version: &str) -> Option<String>;
}

/// Registry that resolves no models.
#[derive(Debug, Default)]
pub struct NoopRegistry;

impl ModelRegistry for NoopRegistry {
    fn model_stage(&self, _model_name: &str, _model_version: &str) -> Option<String> {
        None
    }
}

/// Pushes fired alerts to an external channel (pager, chat, webhook).
pub trait AlertNotifier: Send + Sync {
    fn notify(&self, alert: &Alert) -> Result<()>;
}

/// Notifier that drops everything.
#[derive(Debug, Default)]
pub struct NoopNotifier;

impl AlertNotifier for NoopNotifier {
    fn notify(&self, _alert: &Alert) -> Result<()> {
        Ok(())
    }
}

/// One prediction to ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionInput {
    pub model_name: String,
    pub model_version: String,
    pub payload: Value,
    pub confidence: Option<f64>,
    pub latency_ms: f64,
    pub ground_truth: Option<Value>,
    pub correlation_id: Option<String>,
}

/// Monitoring and experimentation engine over a shared store.
pub struct MonitorEngine {
    predictions: Arc<dyn PredictionStore>,
    metrics: Arc<dyn MetricStore>,
    drift_store: Arc<dyn DriftStore>,
    aggregator: WindowAggregator,
    drift: DriftDetector,
    evaluator: ExperimentEvaluator,
    alerts: AlertManager,
    alert_store: Arc<dyn AlertStore>,
    registry: Arc<dyn ModelRegistry>,
    notifier: Arc<dyn AlertNotifier>,
}

impl MonitorEngine {
    /// Engine over the in-memory store with the stock alert rules.
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            DriftConfig::default(),
            crate::alert::default_rules(),
            Arc::new(NoopRegistry),
            Arc::new(NoopNotifier),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        predictions: Arc<dyn PredictionStore>,
        metrics: Arc<dyn MetricStore>,
        drift_store: Arc<dyn DriftStore>,
        alert_store: Arc<dyn AlertStore>,
        drift_config: DriftConfig,
        rules: Vec<AlertRule>,
        registry: Arc<dyn ModelRegistry>,
        notifier: Arc<dyn AlertNotifier>,
    ) -> Self {
        Self {
            aggregator: WindowAggregator::new(predictions.clone(), metrics.clone()),
            drift: DriftDetector::new(predictions.clone(), drift_store.clone(), drift_config),
            evaluator: ExperimentEvaluator::new(),
            alerts: AlertManager::new(rules, alert_store.clone()),
            predictions,
            metrics,
            drift_store,
            alert_store,
            registry,
            notifier,
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn ModelRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn AlertNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    /// Log one prediction, computing per-field correctness when ground truth
    /// accompanies it, and raise realtime alerts for suspicious rows.
    pub fn log_prediction(&self, input: PredictionInput) -> Result<Prediction> {
        self.log_prediction_at(input, Utc::now())
    }

    pub fn log_prediction_at(
        &self,
        input: PredictionInput,
        now: DateTime<Utc>,
    ) -> Result<Prediction> {
        let stage = self
            .registry
            .model_stage(&input.model_name, &input.model_version)
            .unwrap_or_else(|| "None".to_string());
        let correctness = input
            .ground_truth
            .as_ref()
            .map(|truth| field_correctness(&input.payload, truth))
            .filter(|c| !c.is_empty());

        let prediction = Prediction {
            id: prefixed_id("PRED", now),
            model_name: input.model_name,
            model_version: input.model_version,
            stage,
            payload: input.payload,
            confidence: input.confidence,
            latency_ms: input.latency_ms,
            timestamp: now,
            ground_truth: input.ground_truth,
            correctness,
            correlation_id: input.correlation_id,
        };
        self.predictions.append(prediction.clone())?;
        debug!(
            model = %prediction.model_name,
            version = %prediction.model_version,
            confidence = ?prediction.confidence,
            latency_ms = prediction.latency_ms,
            "prediction logged"
        );

        self.realtime_checks(&prediction, now)?;
        Ok(prediction)
    }

    /// Per-row alerts raised at ingestion, outside the rule engine so they
    /// carry the offending prediction id.
    fn realtime_checks(&self, p: &Prediction, now: DateTime<Utc>) -> Result<()> {
        if let Some(conf) = p.confidence {
            if conf < LOW_CONFIDENCE_FLOOR {
                self.raise_realtime(
                    p,
                    "low_confidence_prediction",
                    format!("prediction {} confidence {conf:.3} below {LOW_CONFIDENCE_FLOOR}", p.id),
                    json!({ "prediction_id": p.id, "confidence": conf }),
                    now,
                )?;
            }
        }
        if p.latency_ms > HIGH_LATENCY_CEILING_MS {
            self.raise_realtime(
                p,
                "high_latency_prediction",
                format!(
                    "prediction {} took {:.0}ms, ceiling {HIGH_LATENCY_CEILING_MS:.0}ms",
                    p.id, p.latency_ms
                ),
                json!({ "prediction_id": p.id, "latency_ms": p.latency_ms }),
                now,
            )?;
        }
        Ok(())
    }

    fn raise_realtime(
        &self,
        p: &Prediction,
        kind: &str,
        message: String,
        details: Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let alert = Alert {
            id: prefixed_id("ALR", now),
            subject: p.model_name.clone(),
            kind: kind.to_string(),
            severity: AlertSeverity::Warning,
            message,
            details,
            status: AlertStatus::Open,
            created_at: now,
            acknowledged_at: None,
            resolved_at: None,
        };
        self.alert_store.append(alert.clone())?;
        self.dispatch(&[alert]);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Aggregation and dashboards
    // ------------------------------------------------------------------

    /// Fold recent predictions into fixed-size metric windows.
    pub fn compute_window_metrics(
        &self,
        model_name: &str,
        window_minutes: i64,
        lookback_hours: i64,
    ) -> Result<Vec<MetricWindow>> {
        self.compute_window_metrics_at(model_name, window_minutes, lookback_hours, Utc::now())
    }

    pub fn compute_window_metrics_at(
        &self,
        model_name: &str,
        window_minutes: i64,
        lookback_hours: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<MetricWindow>> {
        self.aggregator
            .aggregate(model_name, window_minutes, lookback_hours, now)
    }

    /// Materialized windows for a model since `from`.
    pub fn windows_since(
        &self,
        model_name: &str,
        from: DateTime<Utc>,
    ) -> Result<Vec<MetricWindow>> {
        self.metrics.for_model_since(model_name, from)
    }

    /// JSON health summary for one model over the trailing window: per-metric
    /// rollups, open alert count, and recent drift detections.
    pub fn dashboard(&self, model_name: &str, lookback_hours: i64) -> Result<Value> {
        self.dashboard_at(model_name, lookback_hours, Utc::now())
    }

    pub fn dashboard_at(
        &self,
        model_name: &str,
        lookback_hours: i64,
        now: DateTime<Utc>,
    ) -> Result<Value> {
        let from = now - Duration::hours(lookback_hours);
        let snapshot = self.metric_snapshot(model_name, from)?;
        let open_alerts = self.alert_store.list_active(Some(model_name), None)?;
        let detections = self.drift_store.for_model(model_name)?;
        let recent: Vec<Value> = detections
            .iter()
            .filter(|d| d.detected_at >= from)
            .map(|d| {
                json!({
                    "id": d.id,
                    "kind": d.kind,
                    "score": d.score,
                    "detected_at": d.detected_at,
                })
            })
            .collect();

        Ok(json!({
            "model": model_name,
            "generated_at": now,
            "lookback_hours": lookback_hours,
            "metrics": snapshot,
            "open_alerts": open_alerts.len(),
            "drift_detections": recent,
        }))
    }

    /// Roll the materialized windows since `from` up into one JSON object
    /// keyed by metric name, the shape the alert rules address with dot paths.
    fn metric_snapshot(&self, model_name: &str, from: DateTime<Utc>) -> Result<Value> {
        let windows = self.metrics.for_model_since(model_name, from)?;
        let mut out = Map::new();
        for metric_type in [
            MetricType::Confidence,
            MetricType::Latency,
            MetricType::Accuracy,
            MetricType::ErrorRate,
            MetricType::Throughput,
        ] {
            let of_type: Vec<&MetricWindow> = windows
                .iter()
                .filter(|w| w.metric_type == metric_type)
                .collect();
            if of_type.is_empty() {
                continue;
            }
            // Sample-weighted mean of the window means; extrema and p95 are
            // taken across windows.
            let total: usize = of_type.iter().map(|w| w.sample_count).sum();
            let mean = if total == 0 {
                0.0
            } else {
                of_type
                    .iter()
                    .map(|w| w.value * w.sample_count as f64)
                    .sum::<f64>()
                    / total as f64
            };
            let min = of_type
                .iter()
                .filter_map(|w| w.min)
                .fold(f64::INFINITY, f64::min);
            let max = of_type
                .iter()
                .filter_map(|w| w.max)
                .fold(f64::NEG_INFINITY, f64::max);
            let p95 = of_type
                .iter()
                .filter_map(|w| w.p95)
                .fold(f64::NEG_INFINITY, f64::max);

            let mut entry = Map::new();
            entry.insert("mean".into(), json!(mean));
            entry.insert("count".into(), json!(total));
            if min.is_finite() {
                entry.insert("min".into(), json!(min));
            }
            if max.is_finite() {
                entry.insert("max".into(), json!(max));
            }
            if p95.is_finite() {
                entry.insert("p95".into(), json!(p95));
            }
            out.insert(metric_type.as_str().to_string(), Value::Object(entry));
        }
        Ok(Value::Object(out))
    }

    // ------------------------------------------------------------------
    // Drift
    // ------------------------------------------------------------------

    /// PSI comparison of two explicit time ranges; raises the drift alert
    /// rule when a detection fires.
    pub fn detect_population_drift(
        &self,
        model_name: &str,
        model_version: &str,
        baseline_range: (DateTime<Utc>, DateTime<Utc>),
        current_range: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<Option<DriftDetection>> {
        self.detect_population_drift_at(
            model_name,
            model_version,
            baseline_range,
            current_range,
            Utc::now(),
        )
    }

    pub fn detect_population_drift_at(
        &self,
        model_name: &str,
        model_version: &str,
        baseline_range: (DateTime<Utc>, DateTime<Utc>),
        current_range: (DateTime<Utc>, DateTime<Utc>),
        now: DateTime<Utc>,
    ) -> Result<Option<DriftDetection>> {
        let detection = self.drift.detect_population_drift(
            model_name,
            model_version,
            baseline_range,
            current_range,
            now,
        )?;
        if detection.is_some() {
            self.raise_drift_alerts(model_name, now)?;
        }
        Ok(detection)
    }

    /// Half-split KS comparison over the trailing lookback; raises the drift
    /// alert rule when a detection fires.
    pub fn detect_prediction_drift(
        &self,
        model_name: &str,
        model_version: &str,
        lookback_days: i64,
    ) -> Result<Option<DriftDetection>> {
        self.detect_prediction_drift_at(model_name, model_version, lookback_days, Utc::now())
    }

    pub fn detect_prediction_drift_at(
        &self,
        model_name: &str,
        model_version: &str,
        lookback_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<DriftDetection>> {
        let detection =
            self.drift
                .detect_prediction_drift(model_name, model_version, lookback_days, now)?;
        if detection.is_some() {
            self.raise_drift_alerts(model_name, now)?;
        }
        Ok(detection)
    }

    fn raise_drift_alerts(&self, model_name: &str, now: DateTime<Utc>) -> Result<()> {
        let fired = self
            .alerts
            .evaluate(model_name, &Value::Null, true, now)?;
        self.dispatch(&fired);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Alerting
    // ------------------------------------------------------------------

    /// Evaluate the threshold rules against the rolled-up windows of the
    /// trailing `lookback_hours`.
    pub fn check_alerts(&self, model_name: &str, lookback_hours: i64) -> Result<Vec<Alert>> {
        self.check_alerts_at(model_name, lookback_hours, Utc::now())
    }

    pub fn check_alerts_at(
        &self,
        model_name: &str,
        lookback_hours: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>> {
        let from = now - Duration::hours(lookback_hours);
        let snapshot = self.metric_snapshot(model_name, from)?;
        let fired = self.alerts.evaluate(model_name, &snapshot, false, now)?;
        self.dispatch(&fired);
        Ok(fired)
    }

    /// Compare a model's recent windows against its own earlier baseline.
    ///
    /// Unlike the threshold rules, which compare against absolute constants,
    /// this flags relative movement: a mean accuracy or confidence drop of
    /// more than [`DEGRADATION_DROP`], or mean latency growing past
    /// [`DEGRADATION_LATENCY_RATIO`] times the baseline. The baseline is the
    /// `[now - baseline_hours, now - recent_hours)` slice of materialized
    /// windows, the recent period the trailing `recent_hours`. Any finding
    /// raises one `performance_degradation` warning carrying all of them.
    pub fn detect_performance_degradation(
        &self,
        model_name: &str,
        recent_hours: i64,
        baseline_hours: i64,
    ) -> Result<Vec<DegradationFinding>> {
        self.detect_performance_degradation_at(model_name, recent_hours, baseline_hours, Utc::now())
    }

    pub fn detect_performance_degradation_at(
        &self,
        model_name: &str,
        recent_hours: i64,
        baseline_hours: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<DegradationFinding>> {
        if recent_hours <= 0 || baseline_hours <= recent_hours {
            return Err(crate::MonitorError::InvalidConfiguration(format!(
                "baseline ({baseline_hours}h) must be longer than the recent period ({recent_hours}h)"
            )));
        }
        let split = now - Duration::hours(recent_hours);
        let windows = self
            .metrics
            .for_model_since(model_name, now - Duration::hours(baseline_hours))?;
        let (baseline, recent): (Vec<&MetricWindow>, Vec<&MetricWindow>) = windows
            .iter()
            .filter(|w| w.window_start < now)
            .partition(|w| w.window_start < split);

        let mut findings = Vec::new();
        for (metric_type, degraded) in [
            (MetricType::Accuracy, Degraded::Drop),
            (MetricType::Confidence, Degraded::Drop),
            (MetricType::Latency, Degraded::Growth),
        ] {
            let Some(base) = weighted_mean(&baseline, metric_type) else {
                continue;
            };
            let Some(cur) = weighted_mean(&recent, metric_type) else {
                continue;
            };
            let hit = match degraded {
                Degraded::Drop => cur < base - DEGRADATION_DROP,
                Degraded::Growth => cur > base * DEGRADATION_LATENCY_RATIO,
            };
            if hit {
                findings.push(DegradationFinding {
                    metric_type,
                    baseline_mean: base,
                    recent_mean: cur,
                    change: cur - base,
                });
            }
        }

        if !findings.is_empty() {
            warn!(
                model = model_name,
                findings = findings.len(),
                "performance degradation detected"
            );
            let alert = Alert {
                id: prefixed_id("ALR", now),
                subject: model_name.to_string(),
                kind: "performance_degradation".to_string(),
                severity: AlertSeverity::Warning,
                message: format!(
                    "{model_name} degraded vs its own baseline on {}",
                    findings
                        .iter()
                        .map(|f| f.metric_type.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                details: json!({ "findings": findings }),
                status: AlertStatus::Open,
                created_at: now,
                acknowledged_at: None,
                resolved_at: None,
            };
            self.alert_store.append(alert.clone())?;
            self.dispatch(&[alert]);
        }
        Ok(findings)
    }

    pub fn list_active_alerts(
        &self,
        subject: Option<&str>,
        severity: Option<AlertSeverity>,
    ) -> Result<Vec<Alert>> {
        self.alerts.list_active(subject, severity)
    }

    pub fn acknowledge_alert(&self, alert_id: &str) -> Result<()> {
        self.alerts.acknowledge(alert_id, Utc::now())
    }

    pub fn resolve_alert(&self, alert_id: &str) -> Result<()> {
        self.alerts.resolve(alert_id, Utc::now())
    }

    fn dispatch(&self, alerts: &[Alert]) {
        for alert in alerts {
            if let Err(err) = self.notifier.notify(alert) {
                warn!(alert = %alert.id, error = %err, "alert notification failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Experiments
    // ------------------------------------------------------------------

    pub fn create_experiment(&self, config: ExperimentConfig) -> Result<String> {
        self.evaluator.create_experiment(config, Utc::now())
    }

    pub fn create_experiment_at(
        &self,
        config: ExperimentConfig,
        now: DateTime<Utc>,
    ) -> Result<String> {
        self.evaluator.create_experiment(config, now)
    }

    pub fn route(&self, experiment_id: &str, request_id: &str) -> Result<RoutedModel> {
        self.evaluator.route(experiment_id, request_id)
    }

    pub fn record_result(
        &self,
        experiment_id: &str,
        variant: Variant,
        metric_name: &str,
        value: f64,
    ) -> Result<()> {
        self.evaluator
            .record_result(experiment_id, variant, metric_name, value, Utc::now())
    }

    pub fn record_result_at(
        &self,
        experiment_id: &str,
        variant: Variant,
        metric_name: &str,
        value: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.evaluator
            .record_result(experiment_id, variant, metric_name, value, now)
    }

    pub fn experiment_results(&self, experiment_id: &str) -> Result<ExperimentResults> {
        self.evaluator.get_results(experiment_id)
    }

    pub fn pause_experiment(&self, experiment_id: &str) -> Result<()> {
        self.evaluator.pause(experiment_id)
    }

    pub fn resume_experiment(&self, experiment_id: &str) -> Result<()> {
        self.evaluator.resume(experiment_id)
    }

    pub fn cancel_experiment(&self, experiment_id: &str) -> Result<()> {
        self.evaluator.cancel(experiment_id, Utc::now())
    }

    pub fn active_experiments(&self) -> Vec<ActiveExperiment> {
        self.evaluator.list_active()
    }
}
