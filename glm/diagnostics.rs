//! Poisson versus negative binomial comparison.
//!
//! The Poisson model is nested in NB2 at `alpha = 0`, a boundary point, so the
//! likelihood-ratio statistic follows a 50:50 mixture of a point mass at zero and
//! chi2(1). The reported p-value is `0.5 * P(chi2_1 > LR)`.

use crate::estimate::FittedModel;
use crate::inference::chi2_sf;

#[derive(Debug, Clone, PartialEq)]
pub struct OverdispersionReport {
    /// Pearson chi2 / df of the Poisson fit; far above 1 under overdispersion.
    pub poisson_dispersion_ratio: f64,
    pub negative_binomial_dispersion_ratio: f64,
    pub poisson_aic: f64,
    pub negative_binomial_aic: f64,
    /// `2 (ll_NB - ll_Poisson)`, floored at zero.
    pub likelihood_ratio: f64,
    pub likelihood_ratio_pvalue: f64,
}

impl OverdispersionReport {
    /// True when the boundary LR test rejects the Poisson model at `level`.
    pub fn rejects_poisson(&self, level: f64) -> bool {
        self.likelihood_ratio_pvalue < level
    }

    /// True when the negative binomial fit has the lower AIC.
    pub fn prefers_negative_binomial(&self) -> bool {
        self.negative_binomial_aic < self.poisson_aic
    }
}

pub fn compare_to_poisson(
    poisson: &FittedModel,
    negative_binomial: &FittedModel,
) -> OverdispersionReport {
    let likelihood_ratio = (2.0
        * (negative_binomial.statistics.log_likelihood - poisson.statistics.log_likelihood))
        .max(0.0);
    let likelihood_ratio_pvalue = if likelihood_ratio > 0.0 {
        0.5 * chi2_sf(likelihood_ratio, 1.0)
    } else {
        1.0
    };

    let report = OverdispersionReport {
        poisson_dispersion_ratio: poisson.pearson_dispersion_ratio(),
        negative_binomial_dispersion_ratio: negative_binomial.pearson_dispersion_ratio(),
        poisson_aic: poisson.statistics.aic,
        negative_binomial_aic: negative_binomial.statistics.aic,
        likelihood_ratio,
        likelihood_ratio_pvalue,
    };
    log::debug!("Overdispersion comparison: {report:?}");
    report
}
