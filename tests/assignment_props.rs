//! Property and integration tests for deterministic traffic assignment.

use driftwatch::{assign_variant, assignment_unit, ExperimentConfig, ExperimentEvaluator, ModelRef, Variant};
use chrono::Utc;
use proptest::prelude::*;

fn config(split: f64) -> ExperimentConfig {
    ExperimentConfig {
        name: "assignment props".into(),
        champion: ModelRef::new("m", "1"),
        challenger: ModelRef::new("m", "2"),
        traffic_split: split,
        min_sample_size: 30,
        max_duration_days: 14,
        significance_level: 0.05,
    }
}

// ---------------------------------------------------------------------------
// Property tests
// ---------------------------------------------------------------------------

proptest! {
    /// Assignment is a pure function of (experiment, request, split).
    #[test]
    fn assignment_is_stable(
        exp in "[A-Za-z0-9-]{1,32}",
        req in "[A-Za-z0-9-]{1,32}",
        split in 0.0f64..=1.0,
    ) {
        let first = assign_variant(&exp, &req, split);
        for _ in 0..5 {
            prop_assert_eq!(assign_variant(&exp, &req, split), first);
        }
    }

    /// Raising the split never moves a request from challenger back to
    /// champion.
    #[test]
    fn split_is_monotone_per_request(
        exp in "[a-z0-9-]{1,20}",
        req in "[a-z0-9-]{1,20}",
        lo in 0.0f64..=1.0,
        hi in 0.0f64..=1.0,
    ) {
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        if assign_variant(&exp, &req, lo) == Variant::Challenger {
            prop_assert_eq!(assign_variant(&exp, &req, hi), Variant::Challenger);
        }
    }

    /// The unit-interval position never leaves [0, 1).
    #[test]
    fn unit_stays_in_range(exp in ".{0,40}", req in ".{0,40}") {
        let u = assignment_unit(&exp, &req);
        prop_assert!((0.0..1.0).contains(&u));
    }
}

// ---------------------------------------------------------------------------
// Integration: assignment through the evaluator
// ---------------------------------------------------------------------------

#[test]
fn evaluator_routing_is_sticky_across_many_requests() {
    let eval = ExperimentEvaluator::new();
    let id = eval.create_experiment(config(0.3), Utc::now()).unwrap();

    for i in 0..500 {
        let rid = format!("session-{i}");
        let first = eval.route(&id, &rid).unwrap();
        let second = eval.route(&id, &rid).unwrap();
        assert_eq!(first, second, "request {rid} flapped");
        let expected = match first.variant {
            Variant::Champion => "1",
            Variant::Challenger => "2",
        };
        assert_eq!(first.model.version, expected);
    }
}

#[test]
fn observed_split_tracks_configuration() {
    let eval = ExperimentEvaluator::new();
    let id = eval.create_experiment(config(0.25), Utc::now()).unwrap();

    let n = 20_000;
    let challengers = (0..n)
        .filter(|i| {
            eval.route(&id, &format!("req-{i}")).unwrap().variant == Variant::Challenger
        })
        .count();
    let frac = challengers as f64 / n as f64;
    assert!((frac - 0.25).abs() < 0.02, "observed challenger share {frac}");
}

#[test]
fn distinct_experiments_shuffle_the_population() {
    let eval = ExperimentEvaluator::new();
    let now = Utc::now();
    let a = eval.create_experiment(config(0.5), now).unwrap();
    let b = eval.create_experiment(config(0.5), now).unwrap();

    // Ids differ, so the same request population must split differently.
    let n = 5_000;
    let disagreements = (0..n)
        .filter(|i| {
            let rid = format!("user-{i}");
            eval.route(&a, &rid).unwrap().variant != eval.route(&b, &rid).unwrap().variant
        })
        .count();
    let frac = disagreements as f64 / n as f64;
    assert!(frac > 0.4 && frac < 0.6, "disagreement share {frac}");
}
