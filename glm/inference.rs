//! Wald inference for fitted coefficients: standard errors from the inverse Fisher
//! information, z statistics, two-sided normal p-values and confidence intervals.

use ndarray::{Array1, Array2};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};

/// Two-sided p-value of a z statistic, `P(|Z| > |z|)`.
pub fn pvalue_z(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    Normal::new(0.0, 1.0).map_or(f64::NAN, |normal| 2.0 * normal.sf(z.abs()))
}

/// Normal-theory interval `estimate -/+ z_{1 - (1 - level)/2} * std_error`.
pub fn confidence_interval_z(estimate: f64, std_error: f64, level: f64) -> (f64, f64) {
    if !estimate.is_finite() || !std_error.is_finite() || std_error <= 0.0 {
        return (f64::NAN, f64::NAN);
    }
    let Ok(normal) = Normal::new(0.0, 1.0) else {
        return (f64::NAN, f64::NAN);
    };
    let z_critical = normal.inverse_cdf(1.0 - (1.0 - level) / 2.0);
    let margin = z_critical * std_error;
    (estimate - margin, estimate + margin)
}

/// Upper tail `P(X > stat)` of a chi-squared variable with `df` degrees of freedom.
pub fn chi2_sf(stat: f64, df: f64) -> f64 {
    if !stat.is_finite() || df <= 0.0 {
        return f64::NAN;
    }
    if stat <= 0.0 {
        return 1.0;
    }
    ChiSquared::new(df).map_or(f64::NAN, |chi2| chi2.sf(stat))
}

/// Square roots of the covariance diagonal.
pub fn standard_errors(covariance: &Array2<f64>) -> Array1<f64> {
    covariance.diag().mapv(|v| if v >= 0.0 { v.sqrt() } else { f64::NAN })
}

/// One line of the coefficient table.
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientRow {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    pub z_value: f64,
    pub p_value: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
}

impl CoefficientRow {
    /// Derives the Wald statistics for `estimate` from its standard error.
    pub fn new(name: &str, estimate: f64, std_error: f64, level: f64) -> Self {
        let z_value = estimate / std_error;
        let (ci_lower, ci_upper) = confidence_interval_z(estimate, std_error, level);
        Self {
            name: name.to_string(),
            estimate,
            std_error,
            z_value,
            p_value: pvalue_z(z_value),
            ci_lower,
            ci_upper,
        }
    }

    /// True when the generating value lies within `k` standard errors of the estimate.
    pub fn within_standard_errors(&self, value: f64, k: f64) -> bool {
        (self.estimate - value).abs() <= k * self.std_error
    }
}
