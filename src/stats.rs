//! Statistical primitives shared by aggregation, drift detection, and
//! experiment evaluation.
//!
//! Everything here is plain `f64` math over caller-supplied samples: no
//! allocation beyond a sort buffer, no global state. The special functions
//! (ln-gamma, regularized incomplete beta, KS tail) use the standard series /
//! continued-fraction forms, accurate to well beyond what threshold checks on
//! p-values need.

use crate::{MonitorError, Result};

/// Descriptive statistics over a sample.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DescriptiveStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation (n-1 denominator); 0 for singleton samples.
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub p95: f64,
}

impl DescriptiveStats {
    /// Compute stats for a non-empty sample. Returns `None` when empty.
    pub fn from_samples(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let std_dev = sample_std_dev(values, mean);
        Some(Self {
            count: n,
            mean,
            median: percentile_sorted(&sorted, 50.0),
            std_dev,
            min: sorted[0],
            max: sorted[n - 1],
            p95: percentile_sorted(&sorted, 95.0),
        })
    }
}

/// Sample standard deviation around a precomputed mean (n-1 denominator).
pub fn sample_std_dev(values: &[f64], mean: f64) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let ss: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    (ss / (n - 1) as f64).sqrt()
}

/// Linear-interpolation percentile over an already-sorted slice.
///
/// `q` is in percent (0–100). Empty input returns NaN; callers guard.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

// ============================================================================
// Population Stability Index
// ============================================================================

/// Population Stability Index between two samples.
///
/// Bins span the union range of both samples with `bins` equal-width buckets;
/// counts become proportions, zero proportions are replaced with `epsilon` to
/// keep the log finite, and the result is
/// `|Σ (current_pct − baseline_pct) · ln(current_pct / baseline_pct)|`.
///
/// A degenerate range (all values identical across both samples) yields 0.0:
/// two point masses at the same spot have not shifted.
pub fn population_stability_index(
    baseline: &[f64],
    current: &[f64],
    bins: usize,
    epsilon: f64,
) -> f64 {
    if baseline.is_empty() || current.is_empty() || bins == 0 {
        return 0.0;
    }
    let min_val = baseline
        .iter()
        .chain(current.iter())
        .copied()
        .fold(f64::INFINITY, f64::min);
    let max_val = baseline
        .iter()
        .chain(current.iter())
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    let width = (max_val - min_val) / bins as f64;
    if !width.is_finite() || width <= 0.0 {
        return 0.0;
    }

    let bin_of = |v: f64| -> usize {
        let idx = ((v - min_val) / width) as usize;
        idx.min(bins - 1)
    };
    let mut base_counts = vec![0u64; bins];
    let mut cur_counts = vec![0u64; bins];
    for &v in baseline {
        base_counts[bin_of(v)] += 1;
    }
    for &v in current {
        cur_counts[bin_of(v)] += 1;
    }

    let bn = baseline.len() as f64;
    let cn = current.len() as f64;
    let mut psi = 0.0_f64;
    for i in 0..bins {
        let base_pct = (base_counts[i] as f64 / bn).max(epsilon);
        let cur_pct = (cur_counts[i] as f64 / cn).max(epsilon);
        psi += (cur_pct - base_pct) * (cur_pct / base_pct).ln();
    }
    psi.abs()
}

// ============================================================================
// Two-sample Kolmogorov–Smirnov test
// ============================================================================

/// Result of a two-sample KS test.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct KsTest {
    /// Maximum distance between the two empirical CDFs.
    pub statistic: f64,
    /// Asymptotic two-sided p-value.
    pub p_value: f64,
}

/// Two-sample Kolmogorov–Smirnov test.
///
/// Requires at least 2 samples per side. The p-value uses the asymptotic
/// Kolmogorov distribution with the usual small-sample correction on the
/// effective n, which is what table-threshold comparisons expect.
pub fn ks_two_sample(a: &[f64], b: &[f64]) -> Result<KsTest> {
    if a.len() < 2 || b.len() < 2 {
        return Err(MonitorError::InsufficientSamples {
            required: 2,
            baseline: a.len(),
            current: b.len(),
        });
    }
    let mut sa = a.to_vec();
    let mut sb = b.to_vec();
    sa.sort_by(|x, y| x.total_cmp(y));
    sb.sort_by(|x, y| x.total_cmp(y));

    let (na, nb) = (sa.len(), sb.len());
    let (mut i, mut j) = (0usize, 0usize);
    let mut d = 0.0_f64;
    while i < na && j < nb {
        let xa = sa[i];
        let xb = sb[j];
        let x = xa.min(xb);
        while i < na && sa[i] <= x {
            i += 1;
        }
        while j < nb && sb[j] <= x {
            j += 1;
        }
        let fa = i as f64 / na as f64;
        let fb = j as f64 / nb as f64;
        d = d.max((fa - fb).abs());
    }

    let en = ((na as f64 * nb as f64) / (na as f64 + nb as f64)).sqrt();
    let lambda = (en + 0.12 + 0.11 / en) * d;
    Ok(KsTest {
        statistic: d,
        p_value: kolmogorov_tail(lambda),
    })
}

/// Tail of the Kolmogorov distribution: `Q(λ) = 2 Σ_{j≥1} (−1)^{j−1} e^{−2j²λ²}`.
fn kolmogorov_tail(lambda: f64) -> f64 {
    if lambda <= 0.0 {
        return 1.0;
    }
    let mut sum = 0.0_f64;
    let mut sign = 1.0_f64;
    for j in 1..=100u32 {
        let jf = f64::from(j);
        let term = sign * (-2.0 * jf * jf * lambda * lambda).exp();
        sum += term;
        if term.abs() < 1e-12 * sum.abs().max(1e-300) {
            break;
        }
        sign = -sign;
    }
    (2.0 * sum).clamp(0.0, 1.0)
}

// ============================================================================
// Welch's t-test
// ============================================================================

/// Result of a two-sample mean-difference test.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct TTest {
    pub statistic: f64,
    pub degrees_of_freedom: f64,
    /// Two-sided p-value.
    pub p_value: f64,
}

/// Welch's unequal-variance t-test for two independent samples.
///
/// Requires at least 2 samples per side. Degenerate variance (both samples
/// constant) yields p = 1.0 when the means agree and p = 0.0 otherwise.
pub fn welch_t_test(a: &[f64], b: &[f64]) -> Result<TTest> {
    if a.len() < 2 || b.len() < 2 {
        return Err(MonitorError::InsufficientSamples {
            required: 2,
            baseline: a.len(),
            current: b.len(),
        });
    }
    let na = a.len() as f64;
    let nb = b.len() as f64;
    let mean_a = a.iter().sum::<f64>() / na;
    let mean_b = b.iter().sum::<f64>() / nb;
    let var_a = {
        let s = sample_std_dev(a, mean_a);
        s * s
    };
    let var_b = {
        let s = sample_std_dev(b, mean_b);
        s * s
    };

    let se2 = var_a / na + var_b / nb;
    if se2 <= 0.0 {
        // Zero variance on both sides: identical constants or a clean split.
        let same = (mean_a - mean_b).abs() < f64::EPSILON;
        return Ok(TTest {
            statistic: if same { 0.0 } else { f64::INFINITY },
            degrees_of_freedom: na + nb - 2.0,
            p_value: if same { 1.0 } else { 0.0 },
        });
    }

    let t = (mean_a - mean_b) / se2.sqrt();
    // Welch–Satterthwaite effective degrees of freedom.
    let df = se2 * se2
        / ((var_a / na) * (var_a / na) / (na - 1.0) + (var_b / nb) * (var_b / nb) / (nb - 1.0));
    let p = student_t_two_sided_p(t, df);
    Ok(TTest {
        statistic: t,
        degrees_of_freedom: df,
        p_value: p,
    })
}

/// Effect size reported alongside comparisons: mean difference scaled by the
/// standard deviation of the pooled (concatenated) sample.
pub fn effect_size(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let pooled: Vec<f64> = a.iter().chain(b.iter()).copied().collect();
    let mean_p = pooled.iter().sum::<f64>() / pooled.len() as f64;
    let sd = sample_std_dev(&pooled, mean_p);
    if sd <= 0.0 {
        return 0.0;
    }
    let mean_a = a.iter().sum::<f64>() / a.len() as f64;
    let mean_b = b.iter().sum::<f64>() / b.len() as f64;
    (mean_b - mean_a) / sd
}

/// Two-sided p-value for a t statistic with `df` degrees of freedom:
/// `p = I_{df/(df+t²)}(df/2, 1/2)`.
pub fn student_t_two_sided_p(t: f64, df: f64) -> f64 {
    if !t.is_finite() {
        return 0.0;
    }
    if df <= 0.0 {
        return 1.0;
    }
    let x = df / (df + t * t);
    regularized_incomplete_beta(df / 2.0, 0.5, x).clamp(0.0, 1.0)
}

/// Regularized incomplete beta function `I_x(a, b)` via the continued-fraction
/// expansion (converges quickly for the argument ranges t-tests produce).
pub fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

/// Modified Lentz continued fraction for the incomplete beta.
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 200;
    const TINY: f64 = 1e-30;
    const EPS: f64 = 1e-14;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0_f64;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let mf = m as f64;
        let m2 = 2.0 * mf;
        // Even step.
        let aa = mf * (b - mf) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;
        // Odd step.
        let aa = -(a + mf) * (qab + mf) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;
        if (del - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

/// Lanczos approximation of `ln Γ(x)` (g = 7, 9 coefficients).
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_59,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        // Reflection: Γ(x)Γ(1−x) = π / sin(πx).
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut acc = COEFFS[0];
    for (i, &c) in COEFFS.iter().enumerate().skip(1) {
        acc += c / (x + i as f64);
    }
    let t = x + 7.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn descriptive_stats_basic() {
        let s = DescriptiveStats::from_samples(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(s.count, 5);
        assert!((s.mean - 3.0).abs() < 1e-12);
        assert!((s.median - 3.0).abs() < 1e-12);
        assert!((s.min - 1.0).abs() < 1e-12);
        assert!((s.max - 5.0).abs() < 1e-12);
        // Sample std of 1..5 is sqrt(2.5).
        assert!((s.std_dev - 2.5_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn descriptive_stats_empty_is_none() {
        assert!(DescriptiveStats::from_samples(&[]).is_none());
    }

    #[test]
    fn percentile_interpolates() {
        let sorted = [10.0, 20.0, 30.0, 40.0];
        assert!((percentile_sorted(&sorted, 0.0) - 10.0).abs() < 1e-12);
        assert!((percentile_sorted(&sorted, 100.0) - 40.0).abs() < 1e-12);
        assert!((percentile_sorted(&sorted, 50.0) - 25.0).abs() < 1e-12);
    }

    #[test]
    fn psi_zero_for_identical_samples() {
        let xs: Vec<f64> = (0..200).map(|i| (i % 10) as f64 / 10.0).collect();
        let psi = population_stability_index(&xs, &xs, 10, 1e-4);
        assert!(psi < 1e-9, "psi={psi}");
    }

    #[test]
    fn psi_degenerate_range_is_zero() {
        let xs = vec![0.5; 50];
        assert_eq!(population_stability_index(&xs, &xs, 10, 1e-4), 0.0);
    }

    #[test]
    fn psi_grows_with_mean_separation() {
        // Two coarse "Gaussians" via deterministic quantile sampling.
        let base: Vec<f64> = (0..500).map(|i| 0.5 + 0.05 * z_ish(i)).collect();
        let near: Vec<f64> = (0..500).map(|i| 0.52 + 0.05 * z_ish(i)).collect();
        let far: Vec<f64> = (0..500).map(|i| 0.65 + 0.05 * z_ish(i)).collect();
        let psi_near = population_stability_index(&base, &near, 10, 1e-4);
        let psi_far = population_stability_index(&base, &far, 10, 1e-4);
        assert!(psi_near >= 0.0);
        assert!(psi_far > psi_near, "near={psi_near} far={psi_far}");
    }

    // Cheap symmetric spread in roughly [-2, 2] for test fixtures.
    fn z_ish(i: usize) -> f64 {
        ((i % 41) as f64 - 20.0) / 10.0
    }

    #[test]
    fn ks_identical_samples_have_high_p() {
        let xs: Vec<f64> = (0..100).map(|i| i as f64 / 100.0).collect();
        let ks = ks_two_sample(&xs, &xs).unwrap();
        assert!(ks.statistic < 0.011, "stat={}", ks.statistic);
        assert!(ks.p_value > 0.99, "p={}", ks.p_value);
    }

    #[test]
    fn ks_detects_shifted_sample() {
        let a: Vec<f64> = (0..200).map(|i| i as f64 / 200.0).collect();
        let b: Vec<f64> = (0..200).map(|i| 0.5 + i as f64 / 200.0).collect();
        let ks = ks_two_sample(&a, &b).unwrap();
        assert!(ks.statistic > 0.4, "stat={}", ks.statistic);
        assert!(ks.p_value < 1e-6, "p={}", ks.p_value);
    }

    #[test]
    fn ks_rejects_tiny_samples() {
        let err = ks_two_sample(&[1.0], &[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            crate::MonitorError::InsufficientSamples { .. }
        ));
    }

    #[test]
    fn welch_identical_means_high_p() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [1.5, 2.5, 3.5, 3.5, 4.5, 5.5];
        let t = welch_t_test(&a, &b).unwrap();
        assert!(t.p_value > 0.5, "p={}", t.p_value);
    }

    #[test]
    fn welch_separated_means_low_p() {
        let a: Vec<f64> = (0..30).map(|i| 0.90 + 0.001 * (i % 5) as f64).collect();
        let b: Vec<f64> = (0..30).map(|i| 0.95 + 0.001 * (i % 5) as f64).collect();
        let t = welch_t_test(&a, &b).unwrap();
        assert!(t.p_value < 1e-6, "p={}", t.p_value);
        assert!(t.statistic < 0.0, "a-mean below b-mean gives negative t");
    }

    #[test]
    fn welch_constant_samples() {
        let a = [1.0, 1.0, 1.0];
        let b = [1.0, 1.0, 1.0];
        let t = welch_t_test(&a, &b).unwrap();
        assert_eq!(t.p_value, 1.0);
        let c = [2.0, 2.0, 2.0];
        let t2 = welch_t_test(&a, &c).unwrap();
        assert_eq!(t2.p_value, 0.0);
    }

    #[test]
    fn student_t_p_matches_known_values() {
        // t=0 → p=1 at any df.
        assert!((student_t_two_sided_p(0.0, 10.0) - 1.0).abs() < 1e-12);
        // Large |t| → p near 0.
        assert!(student_t_two_sided_p(50.0, 10.0) < 1e-10);
        // t=2.228, df=10 is the classic 5% two-sided critical value.
        let p = student_t_two_sided_p(2.228, 10.0);
        assert!((p - 0.05).abs() < 2e-3, "p={p}");
    }

    #[test]
    fn ln_gamma_matches_factorials() {
        for n in 1..10u64 {
            let fact: f64 = (1..n).map(|k| k as f64).product();
            assert!(
                (ln_gamma(n as f64) - fact.ln()).abs() < 1e-9,
                "ln_gamma({n})"
            );
        }
    }

    #[test]
    fn effect_size_sign_follows_mean_order() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, 5.0, 6.0];
        assert!(effect_size(&a, &b) > 0.0);
        assert!(effect_size(&b, &a) < 0.0);
    }

    proptest! {
        #[test]
        fn psi_is_nonnegative(
            base in prop::collection::vec(0.0f64..1.0, 10..200),
            cur in prop::collection::vec(0.0f64..1.0, 10..200),
        ) {
            let psi = population_stability_index(&base, &cur, 10, 1e-4);
            prop_assert!(psi >= 0.0);
            prop_assert!(psi.is_finite());
        }

        #[test]
        fn ks_statistic_and_p_are_bounded(
            a in prop::collection::vec(-100.0f64..100.0, 2..120),
            b in prop::collection::vec(-100.0f64..100.0, 2..120),
        ) {
            let ks = ks_two_sample(&a, &b).unwrap();
            prop_assert!((0.0..=1.0).contains(&ks.statistic));
            prop_assert!((0.0..=1.0).contains(&ks.p_value));
        }

        #[test]
        fn ks_is_symmetric(
            a in prop::collection::vec(-10.0f64..10.0, 2..80),
            b in prop::collection::vec(-10.0f64..10.0, 2..80),
        ) {
            let ab = ks_two_sample(&a, &b).unwrap();
            let ba = ks_two_sample(&b, &a).unwrap();
            prop_assert!((ab.statistic - ba.statistic).abs() < 1e-12);
        }

        #[test]
        fn welch_p_value_is_bounded(
            a in prop::collection::vec(-50.0f64..50.0, 2..80),
            b in prop::collection::vec(-50.0f64..50.0, 2..80),
        ) {
            let t = welch_t_test(&a, &b).unwrap();
            prop_assert!((0.0..=1.0).contains(&t.p_value), "p={}", t.p_value);
        }

        #[test]
        fn incomplete_beta_is_monotone_in_x(
            a in 0.5f64..20.0,
            b in 0.5f64..20.0,
            x1 in 0.01f64..0.99,
            x2 in 0.01f64..0.99,
        ) {
            let (lo, hi) = if x1 <= x2 { (x1, x2) } else { (x2, x1) };
            let ilo = regularized_incomplete_beta(a, b, lo);
            let ihi = regularized_incomplete_beta(a, b, hi);
            prop_assert!(ihi >= ilo - 1e-9, "I({a},{b}): {ilo} !<= {ihi}");
        }
    }
}
