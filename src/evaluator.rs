//! Champion/challenger experiment lifecycle: creation, routing, result
//! accumulation, and statistical evaluation.
//!
//! The evaluator owns every live experiment behind a per-experiment mutex, so
//! concurrent `record_result` calls for different experiments never contend
//! and calls for the same experiment serialize. Completion checks run inside
//! that same critical section, which makes the check-then-complete sequence
//! atomic: an experiment completes exactly once, and results recorded against
//! a completed experiment are rejected rather than silently dropped.
//!
//! Evaluation uses Welch's unequal-variance t-test on the primary metric and
//! declares the variant with the higher mean the winner once the two-sided
//! p-value drops below the configured significance level. The check runs
//! after every recorded result without alpha correction, so the realized
//! false-positive rate exceeds the nominal level under continuous peeking.
//! Callers who need strict guarantees should set `min_sample_size` to the
//! full planned sample and treat earlier completions as directional.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::assign::assign_variant;
use crate::experiment::{Experiment, ExperimentConfig, ExperimentStatus, ModelRef, Variant};
use crate::prediction::prefixed_id;
use crate::stats::{effect_size, welch_t_test, DescriptiveStats};
use crate::{MonitorError, Result};

/// Routing decision for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutedModel {
    pub experiment_id: String,
    pub variant: Variant,
    pub model: ModelRef,
}

/// Statistical comparison of the two variants on one metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricComparison {
    pub champion: Option<DescriptiveStats>,
    pub challenger: Option<DescriptiveStats>,
    /// Welch t statistic, when both sides have at least 2 samples.
    pub t_statistic: Option<f64>,
    pub p_value: Option<f64>,
    pub significant: bool,
    pub effect_size: Option<f64>,
}

/// One row of the running-experiments listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveExperiment {
    pub id: String,
    pub name: String,
    pub champion_samples: u64,
    pub challenger_samples: u64,
    pub started_at: DateTime<Utc>,
}

/// Snapshot of an experiment's accumulated results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResults {
    pub experiment_id: String,
    pub name: String,
    pub status: ExperimentStatus,
    pub champion_samples: u64,
    pub challenger_samples: u64,
    pub metrics: BTreeMap<String, MetricComparison>,
    pub winner: Option<Variant>,
    pub significance_reached: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Creates experiments, routes requests, records outcomes, and decides
/// winners.
#[derive(Debug, Default)]
pub struct ExperimentEvaluator {
    experiments: DashMap<String, Arc<Mutex<Experiment>>>,
}

impl ExperimentEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and start a new RUNNING experiment.
    pub fn create_experiment(
        &self,
        config: ExperimentConfig,
        now: DateTime<Utc>,
    ) -> Result<String> {
        config.validate()?;
        let id = prefixed_id("ABT", now);
        info!(
            experiment = %id,
            name = %config.name,
            champion = %config.champion,
            challenger = %config.challenger,
            split = config.traffic_split,
            "experiment created"
        );
        let exp = Experiment::new(id.clone(), config, now);
        self.experiments.insert(id.clone(), Arc::new(Mutex::new(exp)));
        Ok(id)
    }

    fn get(&self, experiment_id: &str) -> Result<Arc<Mutex<Experiment>>> {
        self.experiments
            .get(experiment_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| MonitorError::ExperimentNotFound(experiment_id.to_string()))
    }

    /// Deterministically route a request to champion or challenger.
    ///
    /// The same `request_id` always receives the same variant for the life of
    /// the experiment. Errors if the experiment is not RUNNING.
    pub fn route(&self, experiment_id: &str, request_id: &str) -> Result<RoutedModel> {
        let exp = self.get(experiment_id)?;
        let exp = exp.lock();
        exp.require_running()?;
        let variant = assign_variant(&exp.id, request_id, exp.config.traffic_split);
        Ok(RoutedModel {
            experiment_id: exp.id.clone(),
            variant,
            model: exp.model_for(variant).clone(),
        })
    }

    /// Record an observed outcome for one variant and run the completion
    /// checks.
    ///
    /// Checks, in order, under the experiment lock:
    /// 1. Maximum duration exceeded: complete immediately. The winner is the
    ///    higher-mean variant only if both sides reached the minimum sample
    ///    size, otherwise no winner.
    /// 2. Both variants at minimum sample size: Welch t-test on `metric_name`.
    ///    If p < significance level, complete with the higher-mean variant as
    ///    winner and the significance flag set.
    pub fn record_result(
        &self,
        experiment_id: &str,
        variant: Variant,
        metric_name: &str,
        value: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let exp = self.get(experiment_id)?;
        let mut exp = exp.lock();
        exp.require_running()?;
        exp.record(variant, metric_name, value);

        if exp.duration_exceeded(now) {
            let winner = if exp.both_at_min_samples() {
                compare_means(&exp, metric_name)
            } else {
                None
            };
            info!(
                experiment = %exp.id,
                winner = ?winner,
                "experiment completed: maximum duration reached"
            );
            exp.complete(winner, false, now);
            return Ok(());
        }

        if exp.both_at_min_samples() {
            let champ = exp.champion_data.metrics.get(metric_name);
            let chall = exp.challenger_data.metrics.get(metric_name);
            if let (Some(champ), Some(chall)) = (champ, chall) {
                if champ.len() >= 2 && chall.len() >= 2 {
                    let test = welch_t_test(champ, chall)?;
                    debug!(
                        experiment = %exp.id,
                        metric = metric_name,
                        t = test.statistic,
                        p = test.p_value,
                        "significance check"
                    );
                    if test.p_value < exp.config.significance_level {
                        let winner = compare_means(&exp, metric_name);
                        info!(
                            experiment = %exp.id,
                            metric = metric_name,
                            p = test.p_value,
                            winner = ?winner,
                            "experiment completed: significance reached"
                        );
                        exp.complete(winner, true, now);
                    }
                }
            }
        }
        Ok(())
    }

    /// Per-metric descriptive stats for both variants, with the t-test
    /// comparison wherever both sides have at least 2 samples.
    pub fn get_results(&self, experiment_id: &str) -> Result<ExperimentResults> {
        let exp = self.get(experiment_id)?;
        let exp = exp.lock();

        let mut metric_names: Vec<&String> = exp
            .champion_data
            .metrics
            .keys()
            .chain(exp.challenger_data.metrics.keys())
            .collect();
        metric_names.sort();
        metric_names.dedup();

        let mut metrics = BTreeMap::new();
        for name in metric_names {
            let champ = exp
                .champion_data
                .metrics
                .get(name)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let chall = exp
                .challenger_data
                .metrics
                .get(name)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let comparison = if champ.len() >= 2 && chall.len() >= 2 {
                let test = welch_t_test(champ, chall)?;
                MetricComparison {
                    champion: DescriptiveStats::from_samples(champ),
                    challenger: DescriptiveStats::from_samples(chall),
                    t_statistic: Some(test.statistic),
                    p_value: Some(test.p_value),
                    significant: test.p_value < exp.config.significance_level,
                    effect_size: Some(effect_size(champ, chall)),
                }
            } else {
                MetricComparison {
                    champion: DescriptiveStats::from_samples(champ),
                    challenger: DescriptiveStats::from_samples(chall),
                    t_statistic: None,
                    p_value: None,
                    significant: false,
                    effect_size: None,
                }
            };
            metrics.insert(name.clone(), comparison);
        }

        Ok(ExperimentResults {
            experiment_id: exp.id.clone(),
            name: exp.config.name.clone(),
            status: exp.status,
            champion_samples: exp.champion_data.samples,
            challenger_samples: exp.challenger_data.samples,
            metrics,
            winner: exp.winner,
            significance_reached: exp.significance_reached,
            started_at: exp.started_at,
            completed_at: exp.completed_at,
        })
    }

    /// RUNNING → PAUSED. Errors for any other starting state.
    pub fn pause(&self, experiment_id: &str) -> Result<()> {
        let exp = self.get(experiment_id)?;
        exp.lock().pause()?;
        info!(experiment = experiment_id, "experiment paused");
        Ok(())
    }

    /// PAUSED → RUNNING. Errors for any other starting state.
    pub fn resume(&self, experiment_id: &str) -> Result<()> {
        let exp = self.get(experiment_id)?;
        exp.lock().resume()?;
        info!(experiment = experiment_id, "experiment resumed");
        Ok(())
    }

    /// Cancel a RUNNING or PAUSED experiment. No winner is declared.
    pub fn cancel(&self, experiment_id: &str, now: DateTime<Utc>) -> Result<()> {
        let exp = self.get(experiment_id)?;
        exp.lock().cancel(now)?;
        info!(experiment = experiment_id, "experiment cancelled");
        Ok(())
    }

    /// All RUNNING experiments, sorted by id.
    pub fn list_active(&self) -> Vec<ActiveExperiment> {
        let mut out: Vec<ActiveExperiment> = self
            .experiments
            .iter()
            .filter_map(|entry| {
                let exp = entry.value().lock();
                (exp.status == ExperimentStatus::Running).then(|| ActiveExperiment {
                    id: exp.id.clone(),
                    name: exp.config.name.clone(),
                    champion_samples: exp.champion_data.samples,
                    challenger_samples: exp.challenger_data.samples,
                    started_at: exp.started_at,
                })
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

/// Higher mean wins; ties (or a missing series) leave the champion in place.
fn compare_means(exp: &Experiment, metric_name: &str) -> Option<Variant> {
    let mean = |v: &Variant| -> Option<f64> {
        let series = exp.variant_data(*v).metrics.get(metric_name)?;
        if series.is_empty() {
            return None;
        }
        Some(series.iter().sum::<f64>() / series.len() as f64)
    };
    let champ = mean(&Variant::Champion)?;
    let chall = mean(&Variant::Challenger)?;
    if chall > champ {
        Some(Variant::Challenger)
    } else {
        Some(Variant::Champion)
    }
}
