//! Repository traits and the in-memory reference implementation.
//!
//! Domain types stay persistence-agnostic; each store trait is the narrow
//! surface a durable backend must provide. [`MemoryStore`] implements all of
//! them behind `parking_lot` read-write locks and is what the tests (and
//! single-process deployments) use. A relational/document backend slots in by
//! implementing the same traits; schema layout is its own concern.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::alert::{Alert, AlertSeverity, AlertStatus};
use crate::drift::DriftDetection;
use crate::prediction::Prediction;
use crate::window::MetricWindow;
use crate::{MonitorError, Result};

/// Append-only prediction log.
pub trait PredictionStore: Send + Sync {
    fn append(&self, prediction: Prediction) -> Result<()>;

    /// All predictions for `model_name` with `from <= timestamp < to`,
    /// ordered by timestamp.
    fn for_model_in_range(
        &self,
        model_name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Prediction>>;
}

/// Materialized metric windows.
pub trait MetricStore: Send + Sync {
    /// Insert or overwrite the window with the same
    /// (model, version, metric type, window start, window size) key.
    /// Overwriting makes aggregation re-runs idempotent.
    fn upsert(&self, window: MetricWindow) -> Result<()>;

    /// Windows for `model_name` with `window_start >= from`, ordered by start.
    fn for_model_since(&self, model_name: &str, from: DateTime<Utc>) -> Result<Vec<MetricWindow>>;
}

/// Append-only drift detection records.
pub trait DriftStore: Send + Sync {
    fn append(&self, detection: DriftDetection) -> Result<()>;
    fn for_model(&self, model_name: &str) -> Result<Vec<DriftDetection>>;
}

/// Alert records with operator-driven status transitions.
pub trait AlertStore: Send + Sync {
    fn append(&self, alert: Alert) -> Result<()>;

    /// Transition an alert's status, stamping the matching timestamp.
    /// Unknown ids are a persistence error.
    fn set_status(&self, alert_id: &str, status: AlertStatus, at: DateTime<Utc>) -> Result<()>;

    /// Open alerts, optionally filtered by subject and/or severity, newest first.
    fn list_active(
        &self,
        subject: Option<&str>,
        severity: Option<AlertSeverity>,
    ) -> Result<Vec<Alert>>;
}

/// In-memory implementation of every store trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    predictions: RwLock<Vec<Prediction>>,
    windows: RwLock<Vec<MetricWindow>>,
    detections: RwLock<Vec<DriftDetection>>,
    alerts: RwLock<Vec<Alert>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of logged predictions (all models).
    pub fn prediction_count(&self) -> usize {
        self.predictions.read().len()
    }
}

impl PredictionStore for MemoryStore {
    fn append(&self, prediction: Prediction) -> Result<()> {
        self.predictions.write().push(prediction);
        Ok(())
    }

    fn for_model_in_range(
        &self,
        model_name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Prediction>> {
        let mut out: Vec<Prediction> = self
            .predictions
            .read()
            .iter()
            .filter(|p| p.model_name == model_name && p.timestamp >= from && p.timestamp < to)
            .cloned()
            .collect();
        out.sort_by_key(|p| p.timestamp);
        Ok(out)
    }
}

impl MetricStore for MemoryStore {
    fn upsert(&self, window: MetricWindow) -> Result<()> {
        let mut rows = self.windows.write();
        if let Some(existing) = rows.iter_mut().find(|w| {
            w.model_name == window.model_name
                && w.model_version == window.model_version
                && w.metric_type == window.metric_type
                && w.window_start == window.window_start
                && w.window_size_minutes == window.window_size_minutes
        }) {
            *existing = window;
        } else {
            rows.push(window);
        }
        Ok(())
    }

    fn for_model_since(&self, model_name: &str, from: DateTime<Utc>) -> Result<Vec<MetricWindow>> {
        let mut out: Vec<MetricWindow> = self
            .windows
            .read()
            .iter()
            .filter(|w| w.model_name == model_name && w.window_start >= from)
            .cloned()
            .collect();
        out.sort_by_key(|w| w.window_start);
        Ok(out)
    }
}

impl DriftStore for MemoryStore {
    fn append(&self, detection: DriftDetection) -> Result<()> {
        self.detections.write().push(detection);
        Ok(())
    }

    fn for_model(&self, model_name: &str) -> Result<Vec<DriftDetection>> {
        Ok(self
            .detections
            .read()
            .iter()
            .filter(|d| d.model_name == model_name)
            .cloned()
            .collect())
    }
}

impl AlertStore for MemoryStore {
    fn append(&self, alert: Alert) -> Result<()> {
        self.alerts.write().push(alert);
        Ok(())
    }

    fn set_status(&self, alert_id: &str, status: AlertStatus, at: DateTime<Utc>) -> Result<()> {
        let mut rows = self.alerts.write();
        let alert = rows
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| MonitorError::Persistence(format!("unknown alert id {alert_id}")))?;
        match status {
            AlertStatus::Acknowledged => alert.acknowledged_at = Some(at),
            AlertStatus::Resolved => alert.resolved_at = Some(at),
            AlertStatus::Open => {}
        }
        alert.status = status;
        Ok(())
    }

    fn list_active(
        &self,
        subject: Option<&str>,
        severity: Option<AlertSeverity>,
    ) -> Result<Vec<Alert>> {
        let mut out: Vec<Alert> = self
            .alerts
            .read()
            .iter()
            .filter(|a| a.status == AlertStatus::Open)
            .filter(|a| subject.map_or(true, |s| a.subject == s))
            .filter(|a| severity.map_or(true, |s| a.severity == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}
