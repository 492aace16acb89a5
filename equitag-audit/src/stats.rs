//! Statistical primitives shared by the fairness engines
//!
//! **Purpose:** Rates with undefined (NaN) denominators, two-proportion
//! z-tests, the large-sample Welch test and Holm–Bonferroni step-down
//! correction.
//!
//! Undefined quantities are always NaN. Nothing in this module returns an
//! error or panics on degenerate input.

use std::f64::consts::SQRT_2;

/// `num / den`, or NaN when `den` is zero
pub fn rate(num: usize, den: usize) -> f64 {
    if den > 0 {
        num as f64 / den as f64
    } else {
        f64::NAN
    }
}

/// Complementary error function
///
/// Chebyshev fit (Numerical Recipes `erfcc`), fractional error below 1.2e-7
/// everywhere, so small tail probabilities keep their precision.
pub fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let ans = t * (-z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77)))))))))
        .exp();
    if x >= 0.0 {
        ans
    } else {
        2.0 - ans
    }
}

/// Standard normal cumulative distribution function
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// Two-sided p-value of a standard normal statistic, clipped to [0, 1]
pub fn two_sided_p(z: f64) -> f64 {
    if z.is_nan() {
        return f64::NAN;
    }
    erfc(z.abs() / SQRT_2).clamp(0.0, 1.0)
}

/// Two-sided two-proportion z-test
///
/// Compares `k1/n1` against `k2/n2` with the pooled standard error
/// `sqrt(p(1-p)(1/n1 + 1/n2))`, `p = (k1+k2)/(n1+n2)`.
///
/// # Returns
/// * NaN when either group is empty
/// * 1.0 when the standard error is exactly zero
pub fn two_proportion_pvalue(k1: usize, n1: usize, k2: usize, n2: usize) -> f64 {
    if n1 == 0 || n2 == 0 {
        return f64::NAN;
    }
    let p1 = k1 as f64 / n1 as f64;
    let p2 = k2 as f64 / n2 as f64;
    let pooled = (k1 + k2) as f64 / (n1 + n2) as f64;
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 as f64 + 1.0 / n2 as f64)).sqrt();
    if se == 0.0 {
        return 1.0;
    }
    two_sided_p((p1 - p2) / se)
}

/// Arithmetic mean, NaN for an empty sample
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean of the defined (non-NaN) values, NaN when none are defined
pub fn nan_mean(values: &[f64]) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Sample variance (n - 1 denominator), NaN below two observations
pub fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() - 1) as f64
}

/// Result of a two-sample Welch comparison
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WelchResult {
    /// Unequal-variance t statistic (`mean_a - mean_b` over its standard error)
    pub t: f64,
    /// Two-sided p-value from the standard normal CDF of `|t|`
    pub p: f64,
}

/// Welch's unequal-variance test with a normal approximation
///
/// The p-value uses the standard normal distribution instead of Student's t,
/// which is adequate for the large partitions this is applied to.
///
/// # Returns
/// * NaN `t` and `p` when either sample has fewer than two observations
/// * `t = 0`, `p = 1` when the standard error is zero
pub fn welch_test(a: &[f64], b: &[f64]) -> WelchResult {
    if a.len() < 2 || b.len() < 2 {
        return WelchResult {
            t: f64::NAN,
            p: f64::NAN,
        };
    }
    let se = (sample_variance(a) / a.len() as f64 + sample_variance(b) / b.len() as f64).sqrt();
    if se == 0.0 {
        return WelchResult { t: 0.0, p: 1.0 };
    }
    let t = (mean(a) - mean(b)) / se;
    WelchResult {
        t,
        p: two_sided_p(t),
    }
}

/// Holm–Bonferroni step-down adjustment
///
/// NaN inputs are ranked and adjusted as 1.0. The sort is stable, so equal
/// p-values keep their input order. Output is in input order, clipped to
/// [0, 1] and non-decreasing along the ascending raw order.
pub fn holm_bonferroni(raw: &[f64]) -> Vec<f64> {
    let m = raw.len();
    let p: Vec<f64> = raw
        .iter()
        .map(|&x| if x.is_nan() { 1.0 } else { x })
        .collect();

    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| p[a].total_cmp(&p[b]));

    let mut adjusted = vec![1.0; m];
    let mut running_max = 0.0_f64;
    for (rank0, &i) in order.iter().enumerate() {
        let scaled = (m - rank0) as f64 * p[i];
        running_max = running_max.max(scaled);
        adjusted[i] = running_max.clamp(0.0, 1.0);
    }
    adjusted
}
