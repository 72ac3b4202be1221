//! `driftwatch`: model observability and online-experimentation primitives.
//!
//! Built for services that serve ML model predictions and need to know, after
//! the fact, whether those predictions are still any good. Everything hangs
//! off an append-only prediction log: each inference is recorded once with
//! its confidence, latency, and (when available) ground truth, and every
//! other capability is a pure reader of that log.
//!
//! **Capabilities:**
//! - [`MonitorEngine::log_prediction`]: ingest one inference, derive
//!   per-field correctness against ground truth, raise realtime warnings for
//!   low-confidence or slow rows.
//! - [`WindowAggregator`]: fold the log into fixed-size time windows of
//!   confidence / latency / accuracy / error-rate / throughput statistics.
//!   Idempotent; re-runs overwrite rather than duplicate.
//! - [`DriftDetector`]: Population Stability Index over explicit baseline and
//!   current ranges, plus a half-split two-sample Kolmogorov–Smirnov check
//!   over a trailing lookback. Detections are append-only events.
//! - [`ExperimentEvaluator`]: champion/challenger experiments with
//!   deterministic hash-based traffic splitting (the same request id always
//!   lands on the same variant), Welch's t-test on the primary metric, and
//!   one-way completion once significance or the duration limit is reached.
//! - [`AlertManager`]: dot-path threshold rules over metric snapshots with
//!   per-rule, per-subject cooldowns; drift rules fire on detection events.
//!
//! **Goals:**
//! - **Deterministic**: same log + config → same windows, detections, and
//!   routing decisions. Randomness exists only inside generated ids.
//! - **Storage-agnostic**: the engine talks to narrow store traits
//!   ([`PredictionStore`], [`MetricStore`], [`DriftStore`], [`AlertStore`]);
//!   [`MemoryStore`] implements them all for tests and single-process use.
//! - **Pure core**: services take explicit timestamps so schedulers can
//!   replay history; only the engine facade touches the wall clock.
//!
//! **Non-goals:**
//! - Not a serving layer, a metrics backend, or a pager. The engine raises
//!   and stores alerts; delivery is behind the [`AlertNotifier`] trait.
//! - No multivariate or feature-level drift; detection runs on the
//!   confidence distribution of the log.

#![forbid(unsafe_code)]

mod error;
pub use error::*;

pub mod stats;

mod prediction;
pub use prediction::*;

mod store;
pub use store::*;

mod window;
pub use window::*;

mod drift;
pub use drift::*;

mod assign;
pub use assign::*;

mod experiment;
pub use experiment::*;

mod evaluator;
pub use evaluator::*;

mod alert;
pub use alert::*;

mod engine;
pub use engine::*;
