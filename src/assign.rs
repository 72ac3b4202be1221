//! Deterministic variant assignment for champion/challenger experiments.
//!
//! Assignment must be a pure function of `(experiment_id, request_id,
//! traffic_split)`: the same request always lands on the same variant while
//! an experiment runs, with no per-call randomness and no stored state. The
//! hash is FNV-1a with a SplitMix64 finalizer: cheap, stable across
//! platforms, and uniform enough that the challenger fraction tracks the
//! configured split. Not cryptographic, and does not need to be.

use crate::experiment::Variant;

/// Deterministic (non-crypto) 64-bit hash of `s`, scoped by `seed`.
///
/// FNV-1a over the bytes, then SplitMix64 to diffuse the low bits (raw FNV
/// is visibly non-uniform in the bottom byte, which `mod 100` would expose).
#[must_use]
pub fn stable_hash64(seed: u64, s: &str) -> u64 {
    let mut h: u64 = 14_695_981_039_346_656_037;
    for b in s.as_bytes() {
        h ^= u64::from(*b);
        h = h.wrapping_mul(1_099_511_628_211);
    }
    splitmix64(seed ^ h)
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Map a request onto the unit interval for an experiment: hash scoped by the
/// experiment id, bucketed into percents.
#[must_use]
pub fn assignment_unit(experiment_id: &str, request_id: &str) -> f64 {
    let scope = stable_hash64(0, experiment_id);
    let h = stable_hash64(scope, request_id);
    (h % 100) as f64 / 100.0
}

/// Assign a request to champion or challenger.
///
/// Challenger iff the request's unit-interval position is below
/// `traffic_split` (the fraction of traffic directed at the challenger).
/// A split of 0.0 routes everything to the champion, 1.0 everything to the
/// challenger.
#[must_use]
pub fn assign_variant(experiment_id: &str, request_id: &str, traffic_split: f64) -> Variant {
    if assignment_unit(experiment_id, request_id) < traffic_split {
        Variant::Challenger
    } else {
        Variant::Champion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hash_is_stable_across_calls() {
        assert_eq!(stable_hash64(7, "req-1"), stable_hash64(7, "req-1"));
        assert_ne!(stable_hash64(7, "req-1"), stable_hash64(8, "req-1"));
        assert_ne!(stable_hash64(7, "req-1"), stable_hash64(7, "req-2"));
    }

    #[test]
    fn split_extremes_are_total() {
        for i in 0..200 {
            let rid = format!("req-{i}");
            assert_eq!(assign_variant("exp", &rid, 0.0), Variant::Champion);
            assert_eq!(assign_variant("exp", &rid, 1.0), Variant::Challenger);
        }
    }

    #[test]
    fn challenger_fraction_tracks_split() {
        let n = 20_000;
        for &split in &[0.1, 0.3, 0.5, 0.8] {
            let challengers = (0..n)
                .filter(|i| {
                    assign_variant("exp-frac", &format!("request-{i}"), split)
                        == Variant::Challenger
                })
                .count();
            let frac = challengers as f64 / n as f64;
            assert!(
                (frac - split).abs() < 0.02,
                "split={split} observed={frac}"
            );
        }
    }

    #[test]
    fn different_experiments_decorrelate_assignments() {
        // The same request id should not be pinned to one side across
        // experiments; count disagreements over many ids.
        let n = 5_000;
        let disagree = (0..n)
            .filter(|i| {
                let rid = format!("request-{i}");
                assign_variant("exp-a", &rid, 0.5) != assign_variant("exp-b", &rid, 0.5)
            })
            .count();
        let frac = disagree as f64 / n as f64;
        assert!(frac > 0.4 && frac < 0.6, "disagreement={frac}");
    }

    proptest! {
        #[test]
        fn assignment_is_deterministic(
            exp in "[a-z0-9-]{1,20}",
            req in "[a-zA-Z0-9-]{1,30}",
            split in 0.0f64..=1.0,
        ) {
            let a = assign_variant(&exp, &req, split);
            let b = assign_variant(&exp, &req, split);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn unit_is_in_range(exp in ".*", req in ".*") {
            let u = assignment_unit(&exp, &req);
            prop_assert!((0.0..1.0).contains(&u));
        }
    }
}
