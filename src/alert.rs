//! Threshold alerting over metric snapshots, with per-rule cooldowns.
//!
//! Rules compare a single value, addressed by a dot path into a JSON metric
//! snapshot, against a threshold. A rule that fires is silenced for its
//! cooldown window so a persistently-bad metric produces one alert per
//! window instead of one per evaluation. Drift rules are value-less: they
//! fire whenever the caller reports drift, subject to the same cooldown.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::prediction::prefixed_id;
use crate::store::AlertStore;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
}

/// Direction of a threshold comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Greater,
    Less,
}

impl CompareOp {
    fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            CompareOp::Greater => value > threshold,
            CompareOp::Less => value < threshold,
        }
    }
}

/// A single alerting rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique rule name; also the cooldown key.
    pub name: String,
    /// Dot path into the metric snapshot, e.g. `latency.p95`.
    /// Ignored for drift rules.
    pub metric: String,
    pub op: CompareOp,
    pub threshold: f64,
    pub severity: AlertSeverity,
    pub cooldown_minutes: i64,
    /// Drift rules fire on a reported drift signal instead of a metric value.
    pub on_drift: bool,
}

impl AlertRule {
    pub fn threshold_rule(
        name: impl Into<String>,
        metric: impl Into<String>,
        op: CompareOp,
        threshold: f64,
        severity: AlertSeverity,
        cooldown_minutes: i64,
    ) -> Self {
        Self {
            name: name.into(),
            metric: metric.into(),
            op,
            threshold,
            severity,
            cooldown_minutes,
            on_drift: false,
        }
    }

    pub fn drift_rule(
        name: impl Into<String>,
        severity: AlertSeverity,
        cooldown_minutes: i64,
    ) -> Self {
        Self {
            name: name.into(),
            metric: String::new(),
            op: CompareOp::Greater,
            threshold: 0.0,
            severity,
            cooldown_minutes,
            on_drift: true,
        }
    }
}

/// A fired alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Unique id, `ALR-yyyymmdd-xxxxxxxx`.
    pub id: String,
    /// What the alert is about, usually a model name.
    pub subject: String,
    /// The rule name that produced it.
    pub kind: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub details: Value,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Evaluates rules against metric snapshots and manages alert lifecycle.
pub struct AlertManager {
    rules: Vec<AlertRule>,
    store: Arc<dyn AlertStore>,
    /// (rule name, subject) -> last time the rule fired.
    last_fired: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl AlertManager {
    pub fn new(rules: Vec<AlertRule>, store: Arc<dyn AlertStore>) -> Self {
        Self {
            rules,
            store,
            last_fired: Mutex::new(HashMap::new()),
        }
    }

    /// With the stock production rule set.
    pub fn with_default_rules(store: Arc<dyn AlertStore>) -> Self {
        Self::new(default_rules(), store)
    }

    /// Evaluate every rule against a metric snapshot for one subject.
    ///
    /// `drift_detected` drives the drift rules; `metrics` drives the
    /// threshold rules. Fired alerts are persisted and returned. A rule
    /// inside its cooldown window is skipped silently; a rule whose metric
    /// path is absent from the snapshot is skipped too.
    pub fn evaluate(
        &self,
        subject: &str,
        metrics: &Value,
        drift_detected: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>> {
        let mut fired = Vec::new();
        for rule in &self.rules {
            if self.in_cooldown(rule, subject, now) {
                continue;
            }
            let alert = if rule.on_drift {
                if !drift_detected {
                    continue;
                }
                self.build_alert(
                    rule,
                    subject,
                    format!("drift detected for {subject}"),
                    json!({ "drift_detected": true }),
                    now,
                )
            } else {
                let Some(value) = lookup_path(metrics, &rule.metric) else {
                    continue;
                };
                if !rule.op.holds(value, rule.threshold) {
                    continue;
                }
                self.build_alert(
                    rule,
                    subject,
                    format!(
                        "{} {} is {value:.4}, threshold {:.4}",
                        subject, rule.metric, rule.threshold
                    ),
                    json!({ "metric": rule.metric, "value": value, "threshold": rule.threshold }),
                    now,
                )
            };
            warn!(
                subject,
                rule = %rule.name,
                severity = rule.severity.as_str(),
                "alert fired"
            );
            // Persist before recording the firing time: a store failure must
            // leave the cooldown untouched so a retry can still alert.
            self.store.append(alert.clone())?;
            self.mark_fired(rule, subject, now);
            fired.push(alert);
        }
        Ok(fired)
    }

    fn build_alert(
        &self,
        rule: &AlertRule,
        subject: &str,
        message: String,
        details: Value,
        now: DateTime<Utc>,
    ) -> Alert {
        Alert {
            id: prefixed_id("ALR", now),
            subject: subject.to_string(),
            kind: rule.name.clone(),
            severity: rule.severity,
            message,
            details,
            status: AlertStatus::Open,
            created_at: now,
            acknowledged_at: None,
            resolved_at: None,
        }
    }

    fn in_cooldown(&self, rule: &AlertRule, subject: &str, now: DateTime<Utc>) -> bool {
        let key = (rule.name.clone(), subject.to_string());
        self.last_fired
            .lock()
            .get(&key)
            .map_or(false, |last| now - *last < Duration::minutes(rule.cooldown_minutes))
    }

    fn mark_fired(&self, rule: &AlertRule, subject: &str, now: DateTime<Utc>) {
        self.last_fired
            .lock()
            .insert((rule.name.clone(), subject.to_string()), now);
    }

    pub fn acknowledge(&self, alert_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.store.set_status(alert_id, AlertStatus::Acknowledged, now)
    }

    pub fn resolve(&self, alert_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.store.set_status(alert_id, AlertStatus::Resolved, now)
    }

    /// Open alerts, optionally filtered, newest first.
    pub fn list_active(
        &self,
        subject: Option<&str>,
        severity: Option<AlertSeverity>,
    ) -> Result<Vec<Alert>> {
        self.store.list_active(subject, severity)
    }
}

/// Stock rule set for production model monitoring.
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::threshold_rule(
            "high_error_rate",
            "error_rate.mean",
            CompareOp::Greater,
            0.05,
            AlertSeverity::Critical,
            15,
        ),
        AlertRule::threshold_rule(
            "slow_response_time",
            "latency.p95",
            CompareOp::Greater,
            2000.0,
            AlertSeverity::Warning,
            10,
        ),
        AlertRule::threshold_rule(
            "low_confidence",
            "confidence.mean",
            CompareOp::Less,
            0.75,
            AlertSeverity::Warning,
            30,
        ),
        AlertRule::drift_rule("drift_detected", AlertSeverity::Critical, 60),
    ]
}

/// Walk a dot path through nested JSON objects to a number.
fn lookup_path(metrics: &Value, path: &str) -> Option<f64> {
    let mut cur = metrics;
    for segment in path.split('.') {
        cur = cur.get(segment)?;
    }
    cur.as_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn manager() -> (AlertManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let mgr = AlertManager::with_default_rules(Arc::clone(&store) as Arc<dyn AlertStore>);
        (mgr, store)
    }

    #[test]
    fn lookup_path_walks_nested_objects() {
        let v = json!({ "latency": { "p95": 2500.0, "mean": 300.0 } });
        assert_eq!(lookup_path(&v, "latency.p95"), Some(2500.0));
        assert_eq!(lookup_path(&v, "latency.mean"), Some(300.0));
        assert_eq!(lookup_path(&v, "latency.p99"), None);
        assert_eq!(lookup_path(&v, "throughput"), None);
    }

    #[test]
    fn threshold_rule_fires_and_persists() {
        let (mgr, store) = manager();
        let now = Utc::now();
        let metrics = json!({ "latency": { "p95": 3000.0 } });
        let fired = mgr.evaluate("ocr-model", &metrics, false, now).unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, "slow_response_time");
        assert_eq!(fired[0].severity, AlertSeverity::Warning);
        assert!(fired[0].id.starts_with("ALR-"));

        let open = store.list_active(Some("ocr-model"), None).unwrap();
        assert_eq!(open.len(), 1);
    }

    #[test]
    fn healthy_metrics_fire_nothing() {
        let (mgr, _) = manager();
        let metrics = json!({
            "error_rate": { "mean": 0.01 },
            "latency": { "p95": 150.0 },
            "confidence": { "mean": 0.92 },
        });
        let fired = mgr.evaluate("ocr-model", &metrics, false, Utc::now()).unwrap();
        assert!(fired.is_empty());
    }

    #[test]
    fn cooldown_suppresses_refiring() {
        let (mgr, _) = manager();
        let start = Utc::now();
        let metrics = json!({ "latency": { "p95": 3000.0 } });

        assert_eq!(mgr.evaluate("m", &metrics, false, start).unwrap().len(), 1);
        // 5 minutes later: still inside the 10-minute cooldown.
        let at5 = start + Duration::minutes(5);
        assert!(mgr.evaluate("m", &metrics, false, at5).unwrap().is_empty());
        // 11 minutes later: cooldown elapsed, fires again.
        let at11 = start + Duration::minutes(11);
        assert_eq!(mgr.evaluate("m", &metrics, false, at11).unwrap().len(), 1);
    }

    #[test]
    fn cooldown_is_per_subject() {
        let (mgr, _) = manager();
        let now = Utc::now();
        let metrics = json!({ "latency": { "p95": 3000.0 } });
        assert_eq!(mgr.evaluate("model-a", &metrics, false, now).unwrap().len(), 1);
        assert_eq!(mgr.evaluate("model-b", &metrics, false, now).unwrap().len(), 1);
    }

    #[test]
    fn drift_rule_ignores_metric_values() {
        let (mgr, _) = manager();
        let now = Utc::now();
        let fired = mgr.evaluate("m", &json!({}), true, now).unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, "drift_detected");
        assert_eq!(fired[0].severity, AlertSeverity::Critical);

        let none = mgr.evaluate("m2", &json!({}), false, now).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn missing_metric_path_is_skipped() {
        let (mgr, _) = manager();
        // Snapshot with only confidence; other rules must not panic or fire.
        let metrics = json!({ "confidence": { "mean": 0.60 } });
        let fired = mgr.evaluate("m", &metrics, false, Utc::now()).unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, "low_confidence");
    }

    #[test]
    fn acknowledge_and_resolve_update_status() {
        let (mgr, store) = manager();
        let now = Utc::now();
        let metrics = json!({ "error_rate": { "mean": 0.5 } });
        let fired = mgr.evaluate("m", &metrics, false, now).unwrap();
        let id = fired[0].id.clone();

        mgr.acknowledge(&id, now).unwrap();
        let open = store.list_active(None, None).unwrap();
        assert!(open.is_empty(), "acknowledged alerts are no longer open");

        mgr.resolve(&id, now + Duration::minutes(1)).unwrap();
        assert!(mgr.acknowledge("ALR-nope", now).is_err());
    }

    /// Store that rejects the first append, then recovers.
    struct FlakyStore {
        inner: MemoryStore,
        failures_left: Mutex<u32>,
    }

    impl FlakyStore {
        fn failing_once() -> Self {
            Self {
                inner: MemoryStore::new(),
                failures_left: Mutex::new(1),
            }
        }
    }

    impl AlertStore for FlakyStore {
        fn append(&self, alert: Alert) -> crate::Result<()> {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(crate::MonitorError::Persistence("store offline".into()));
            }
            self.inner.append(alert)
        }

        fn set_status(
            &self,
            alert_id: &str,
            status: AlertStatus,
            at: DateTime<Utc>,
        ) -> crate::Result<()> {
            self.inner.set_status(alert_id, status, at)
        }

        fn list_active(
            &self,
            subject: Option<&str>,
            severity: Option<AlertSeverity>,
        ) -> crate::Result<Vec<Alert>> {
            self.inner.list_active(subject, severity)
        }
    }

    #[test]
    fn failed_persist_does_not_burn_the_cooldown() {
        let store = Arc::new(FlakyStore::failing_once());
        let mgr = AlertManager::with_default_rules(Arc::clone(&store) as Arc<dyn AlertStore>);
        let start = Utc::now();
        let metrics = json!({ "latency": { "p95": 3000.0 } });

        // First evaluation hits the store failure and surfaces it.
        assert!(mgr.evaluate("m", &metrics, false, start).is_err());
        assert!(store.list_active(None, None).unwrap().is_empty());

        // A retry well inside the rule's 10-minute cooldown still alerts.
        let retry = mgr
            .evaluate("m", &metrics, false, start + Duration::minutes(1))
            .unwrap();
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].kind, "slow_response_time");
        assert_eq!(store.list_active(None, None).unwrap().len(), 1);
    }

    #[test]
    fn severity_filter_applies() {
        let (mgr, _) = manager();
        let now = Utc::now();
        let metrics = json!({
            "error_rate": { "mean": 0.5 },
            "confidence": { "mean": 0.1 },
        });
        mgr.evaluate("m", &metrics, false, now).unwrap();
        let critical = mgr.list_active(None, Some(AlertSeverity::Critical)).unwrap();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].kind, "high_error_rate");
    }
}
