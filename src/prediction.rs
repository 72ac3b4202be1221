//! Prediction log records: one immutable row per inference.
//!
//! Every inference made by a deployed model lands here first; aggregation and
//! drift detection are pure readers of this log. Rows are append-only and
//! carry everything later analysis needs (confidence, latency, optional
//! ground truth) so no join back to the serving path is ever required.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single logged inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    /// Unique id, `PRED-yyyymmdd-xxxxxxxx`.
    pub id: String,
    pub model_name: String,
    pub model_version: String,
    /// Deployment stage the serving model reported (e.g. "Production").
    pub stage: String,
    /// Raw prediction output.
    pub payload: Value,
    /// Overall confidence in `[0, 1]`, when the model reports one.
    pub confidence: Option<f64>,
    pub latency_ms: f64,
    pub timestamp: DateTime<Utc>,
    /// True labels, when known at (or backfilled after) logging time.
    pub ground_truth: Option<Value>,
    /// Per-field correctness derived from `ground_truth`; `None` without truth.
    pub correctness: Option<BTreeMap<String, bool>>,
    /// Caller-supplied correlation id (request/session).
    pub correlation_id: Option<String>,
}

impl Prediction {
    /// Fraction of ground-truth fields the prediction got right, when
    /// correctness is available and non-empty.
    pub fn accuracy(&self) -> Option<f64> {
        let c = self.correctness.as_ref()?;
        if c.is_empty() {
            return None;
        }
        let correct = c.values().filter(|&&v| v).count();
        Some(correct as f64 / c.len() as f64)
    }
}

/// Per-field correctness of a prediction against ground truth.
///
/// Compares values field-by-field over the keys of `ground_truth` that also
/// appear in `prediction`; fields absent from the prediction are skipped, not
/// counted wrong. Non-object inputs yield an empty map.
pub fn field_correctness(prediction: &Value, ground_truth: &Value) -> BTreeMap<String, bool> {
    let mut out = BTreeMap::new();
    let (Some(pred), Some(truth)) = (prediction.as_object(), ground_truth.as_object()) else {
        return out;
    };
    for (key, expected) in truth {
        if let Some(actual) = pred.get(key) {
            out.insert(key.clone(), actual == expected);
        }
    }
    out
}

/// Generate a prefixed unique id, e.g. `PRED-20260830-1a2b3c4d`.
pub(crate) fn prefixed_id(prefix: &str, now: DateTime<Utc>) -> String {
    let tail = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}-{}", now.format("%Y%m%d"), &tail[..8])
}
