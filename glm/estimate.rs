//! # Model Estimation by Profile Maximum Likelihood
//!
//! The negative binomial model has coefficients `beta` and a dispersion `alpha`.
//! They are estimated with a nested scheme:
//!
//! 1.  **Outer loop (BFGS):** minimises the profile negative log-likelihood per
//!     observation over `log alpha`. The log scale keeps `alpha` positive.
//!
//! 2.  **Inner loop (IRLS):** for each trial `alpha`, fits `beta` with the family held
//!     fixed (see [`crate::irls`]).
//!
//! At the inner optimum the score for `beta` vanishes, so the derivative of the
//! profile with respect to `alpha` is just the partial derivative of the
//! log-likelihood. No numerical differentiation is needed.

use crate::inference::{CoefficientRow, standard_errors};
use crate::irls::{self, IrlsResult};
use crate::matrix::DesignMatrix;
use crate::model::{Family, FitConfig};
use ndarray::{Array1, ArrayView1, Zip};
use statrs::function::gamma::digamma;
use std::sync::Arc;
use thiserror::Error;
use wolfe_bfgs::{Bfgs, BfgsSolution};

/// Bounds of the `log alpha` search, roughly `alpha` in [1e-6, 1e3].
const LOG_ALPHA_MIN: f64 = -13.8;
const LOG_ALPHA_MAX: f64 = 6.9;
/// Floor of the moment-based starting value.
const MIN_INITIAL_ALPHA: f64 = 1e-2;
/// Returned to the line search in place of a failed or non-finite cost.
const FAILED_COST: f64 = 1e10;

#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("A linear system solve failed. The weighted Gram matrix may be singular. Error: {0}")]
    LinearSystemSolveFailed(ndarray_linalg::error::LinalgError),

    #[error("IRLS produced non-finite values at iteration {iteration}.")]
    IrlsUnstable { iteration: usize },

    #[error(
        "IRLS could not reduce the deviance at iteration {iteration} after {halvings} step halvings."
    )]
    StepHalvingFailed { iteration: usize, halvings: usize },

    #[error("Dispersion optimization failed to converge: {0}")]
    DispersionOptimizationFailed(String),

    #[error("The response has {response} observations but the design matrix has {design} rows.")]
    DimensionMismatch { response: usize, design: usize },

    #[error("Cannot fit a model to an empty sample.")]
    EmptyData,

    #[error("The response is identically zero; a log-link model has no finite estimate.")]
    DegenerateResponse,
}

/// Likelihood-based summaries of one fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitStatistics {
    pub log_likelihood: f64,
    /// Log-likelihood of the intercept-only model with the same family.
    pub null_log_likelihood: f64,
    pub deviance: f64,
    pub pearson_chi2: f64,
    pub aic: f64,
    pub bic: f64,
    /// Cox–Snell pseudo R-squared, `1 - exp(2 (ll_null - ll) / n)`.
    pub pseudo_r_squared_cs: f64,
    pub df_model: usize,
    pub df_residuals: usize,
}

/// A fitted count model, ready for reporting.
#[derive(Debug, Clone)]
pub struct FittedModel {
    pub family: Family,
    pub column_names: Vec<String>,
    pub n_obs: usize,
    pub coefficients: Vec<CoefficientRow>,
    /// The `alpha` row; `None` for Poisson.
    pub dispersion: Option<CoefficientRow>,
    pub fit: IrlsResult,
    pub statistics: FitStatistics,
    /// BFGS iterations spent on the dispersion; zero when it is not estimated.
    pub dispersion_iterations: usize,
    pub confidence_level: f64,
}

impl FittedModel {
    pub fn converged(&self) -> bool {
        self.fit.converged()
    }

    pub fn coefficient(&self, name: &str) -> Option<&CoefficientRow> {
        self.coefficients.iter().find(|row| row.name == name)
    }

    /// Pearson chi2 over the residual degrees of freedom. Near 1 when the variance
    /// function matches the data.
    pub fn pearson_dispersion_ratio(&self) -> f64 {
        self.statistics.pearson_chi2 / self.statistics.df_residuals.max(1) as f64
    }

    /// The estimated `alpha`, if the family has one.
    pub fn alpha(&self) -> Option<f64> {
        match self.family {
            Family::NegativeBinomial { alpha } => Some(alpha),
            Family::Poisson => None,
        }
    }
}

/// Owns everything the BFGS closure needs to evaluate the profile likelihood.
struct ProfileLikelihood {
    design: DesignMatrix,
    y: Array1<f64>,
    config: FitConfig,
}

impl ProfileLikelihood {
    fn fit_at(&self, log_alpha: f64) -> Result<IrlsResult, EstimationError> {
        let alpha = log_alpha.clamp(LOG_ALPHA_MIN, LOG_ALPHA_MAX).exp();
        irls::fit_glm(
            &self.design,
            self.y.view(),
            Family::NegativeBinomial { alpha },
            &self.config,
        )
    }

    /// Average negative profile log-likelihood and its derivative in `log alpha`.
    fn cost_and_gradient(&self, log_alpha: f64) -> Result<(f64, f64), EstimationError> {
        let clamped = log_alpha.clamp(LOG_ALPHA_MIN, LOG_ALPHA_MAX);
        let fit = self.fit_at(clamped)?;
        let alpha = clamped.exp();
        let theta = 1.0 / alpha;
        let n = self.y.len() as f64;

        let log_likelihood =
            irls::log_likelihood(self.y.view(), &fit.mu, Family::NegativeBinomial { alpha });
        // d(-ll)/d(log alpha) = theta * dll/dtheta, since dtheta/d(log alpha) = -theta.
        let gradient = theta * theta_score(self.y.view(), &fit.mu, theta);
        Ok((-log_likelihood / n, gradient / n))
    }
}

/// `trigamma(y + theta) - trigamma(theta)` for integer `y`, as the finite sum
/// `-sum_{k < y} 1 / (theta + k)^2`. statrs has no trigamma.
fn trigamma_difference(y: f64, theta: f64) -> f64 {
    let count = y.round().max(0.0) as u64;
    -(0..count).map(|k| (theta + k as f64).powi(-2)).sum::<f64>()
}

/// `dll/dtheta` summed over observations.
pub fn theta_score(y: ArrayView1<f64>, mu: &Array1<f64>, theta: f64) -> f64 {
    Zip::from(y).and(mu).fold(0.0, |acc, &yi, &mi| {
        acc + digamma(yi + theta) - digamma(theta) + theta.ln() + 1.0
            - (theta + mi).ln()
            - (theta + yi) / (theta + mi)
    })
}

/// Observed information for `theta`, `-d2ll/dtheta2`, summed over observations.
pub fn theta_information(y: ArrayView1<f64>, mu: &Array1<f64>, theta: f64) -> f64 {
    -Zip::from(y).and(mu).fold(0.0, |acc, &yi, &mi| {
        acc + trigamma_difference(yi, theta) + 1.0 / theta - 1.0 / (theta + mi)
            - (mi - yi) / ((theta + mi) * (theta + mi))
    })
}

/// Method-of-moments dispersion, `(var - mean) / mean^2`, floored at a small
/// positive value.
pub fn moment_alpha(y: ArrayView1<f64>) -> f64 {
    let Some(mean) = y.mean() else {
        return MIN_INITIAL_ALPHA;
    };
    if y.len() < 2 || mean <= 0.0 {
        return MIN_INITIAL_ALPHA;
    }
    let variance = y.var(1.0);
    ((variance - mean) / (mean * mean)).max(MIN_INITIAL_ALPHA)
}

/// Fits the NB2 regression, estimating `alpha` by maximum likelihood.
pub fn fit_negative_binomial(
    design: &DesignMatrix,
    y: ArrayView1<f64>,
    config: &FitConfig,
) -> Result<FittedModel, EstimationError> {
    log::info!(
        "Starting negative binomial fit. {} observations, {} coefficients.",
        y.len(),
        design.ncols()
    );
    if y.is_empty() {
        return Err(EstimationError::EmptyData);
    }
    if y.len() != design.nrows() {
        return Err(EstimationError::DimensionMismatch {
            response: y.len(),
            design: design.nrows(),
        });
    }

    let profile = Arc::new(ProfileLikelihood {
        design: design.clone(),
        y: y.to_owned(),
        config: config.clone(),
    });

    let initial_alpha = moment_alpha(y);
    let initial_log_alpha = initial_alpha.ln().clamp(LOG_ALPHA_MIN, LOG_ALPHA_MAX);
    let (initial_cost, _) = profile.cost_and_gradient(initial_log_alpha)?;
    if !initial_cost.is_finite() {
        return Err(EstimationError::DispersionOptimizationFailed(format!(
            "Initial cost is not finite: {initial_cost}. Cannot start BFGS optimization."
        )));
    }
    log::info!("Initial alpha (moments): {initial_alpha:.6}, cost {initial_cost:.8}");

    let profile_for_closure = Arc::clone(&profile);
    let cost_and_grad = move |point: &Array1<f64>| -> (f64, Array1<f64>) {
        match profile_for_closure.cost_and_gradient(point[0]) {
            Ok((cost, gradient)) if cost.is_finite() && gradient.is_finite() => {
                (cost, Array1::from_elem(1, gradient))
            }
            Ok((cost, gradient)) => {
                log::warn!(
                    "Non-finite profile cost {cost} or gradient {gradient} at log alpha {:.4}",
                    point[0]
                );
                (FAILED_COST, Array1::zeros(1))
            }
            Err(e) => {
                log::warn!(
                    "Profile fit failed at log alpha {:.4}: {e}. Returning a large cost.",
                    point[0]
                );
                (FAILED_COST, Array1::zeros(1))
            }
        }
    };

    let BfgsSolution {
        final_point,
        final_value,
        iterations,
        ..
    } = Bfgs::new(Array1::from_elem(1, initial_log_alpha), cost_and_grad)
        .with_tolerance(config.dispersion_tolerance)
        .with_max_iterations(config.dispersion_max_iterations)
        .run()
        .map_err(|e| EstimationError::DispersionOptimizationFailed(format!("BFGS failed: {e:?}")))?;

    let log_alpha = final_point[0].clamp(LOG_ALPHA_MIN, LOG_ALPHA_MAX);
    let alpha = log_alpha.exp();
    log::info!(
        "Dispersion optimization finished in {iterations} iterations: alpha {alpha:.6}, cost {final_value:.8}"
    );
    if log_alpha <= LOG_ALPHA_MIN || log_alpha >= LOG_ALPHA_MAX {
        log::warn!("Estimated alpha {alpha:.3e} sits on the search boundary.");
    }

    let family = Family::NegativeBinomial { alpha };
    let fit = profile.fit_at(log_alpha)?;

    let theta = 1.0 / alpha;
    let information = theta_information(y, &fit.mu, theta);
    let theta_se = if information > 0.0 {
        information.recip().sqrt()
    } else {
        log::warn!("Observed information for theta is not positive ({information:.3e}).");
        f64::NAN
    };
    // Delta method: alpha = 1 / theta, so |dalpha/dtheta| = 1 / theta^2 = alpha^2.
    let alpha_se = theta_se * alpha * alpha;
    let dispersion = CoefficientRow::new("alpha", alpha, alpha_se, config.confidence_level);

    assemble(design, y, family, fit, Some(dispersion), iterations, config)
}

/// Fits the Poisson regression on the same design, the reference model of the
/// overdispersion comparison.
pub fn fit_poisson(
    design: &DesignMatrix,
    y: ArrayView1<f64>,
    config: &FitConfig,
) -> Result<FittedModel, EstimationError> {
    log::info!("Starting Poisson fit. {} observations.", y.len());
    let fit = irls::fit_glm(design, y, Family::Poisson, config)?;
    assemble(design, y, Family::Poisson, fit, None, 0, config)
}

fn assemble(
    design: &DesignMatrix,
    y: ArrayView1<f64>,
    family: Family,
    fit: IrlsResult,
    dispersion: Option<CoefficientRow>,
    dispersion_iterations: usize,
    config: &FitConfig,
) -> Result<FittedModel, EstimationError> {
    let n_obs = y.len();
    let n_coefficients = design.ncols();

    let std_errors = standard_errors(&fit.covariance_unscaled);
    let coefficients = design
        .column_names()
        .iter()
        .zip(fit.beta.iter().zip(std_errors.iter()))
        .map(|(name, (&estimate, &se))| {
            CoefficientRow::new(name, estimate, se, config.confidence_level)
        })
        .collect();

    let null_fit = irls::fit_glm(&DesignMatrix::intercept_only(n_obs), y, family, config)?;
    let null_log_likelihood = irls::log_likelihood(y, &null_fit.mu, family);
    let log_likelihood = irls::log_likelihood(y, &fit.mu, family);

    let k = (n_coefficients + family.num_dispersion_params()) as f64;
    let n = n_obs as f64;
    let statistics = FitStatistics {
        log_likelihood,
        null_log_likelihood,
        deviance: fit.deviance,
        pearson_chi2: irls::pearson_chi2(y, &fit.mu, family),
        aic: -2.0 * log_likelihood + 2.0 * k,
        bic: -2.0 * log_likelihood + n.ln() * k,
        pseudo_r_squared_cs: 1.0 - (2.0 * (null_log_likelihood - log_likelihood) / n).exp(),
        df_model: n_coefficients.saturating_sub(1),
        df_residuals: n_obs.saturating_sub(n_coefficients),
    };

    log::info!(
        "{} fit complete: log-likelihood {:.4}, deviance {:.4}, converged {}",
        family.name(),
        log_likelihood,
        fit.deviance,
        fit.converged()
    );

    Ok(FittedModel {
        family,
        column_names: design.column_names().to_vec(),
        n_obs,
        coefficients,
        dispersion,
        fit,
        statistics,
        dispersion_iterations,
        confidence_level: config.confidence_level,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::NegativeBinomial;
    use approx::assert_abs_diff_eq;
    use ndarray::{Axis, array};
    use rand::distributions::Distribution;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn nb_sample(n: usize, alpha: f64, seed: u64) -> (DesignMatrix, Array1<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let x: Array1<f64> = (0..n).map(|_| rng.gen_range(0.0..2.0)).collect();
        let y: Array1<f64> = x
            .iter()
            .map(|&xi| {
                let mu = (0.7_f64 + 0.4 * xi).exp();
                NegativeBinomial::from_mean(mu, alpha).unwrap().sample(&mut rng) as f64
            })
            .collect();
        let design = DesignMatrix::with_constant(x.view().insert_axis(Axis(1)), &["x"]).unwrap();
        (design, y)
    }

    #[test]
    fn profile_gradient_matches_finite_differences() {
        let (design, y) = nb_sample(300, 0.6, 11);
        let profile = ProfileLikelihood {
            design,
            y,
            config: FitConfig::default(),
        };
        let log_alpha = (0.4_f64).ln();
        let h = 1e-5;
        let (_, analytic) = profile.cost_and_gradient(log_alpha).unwrap();
        let (plus, _) = profile.cost_and_gradient(log_alpha + h).unwrap();
        let (minus, _) = profile.cost_and_gradient(log_alpha - h).unwrap();
        let numeric = (plus - minus) / (2.0 * h);
        assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-6);
    }

    #[test]
    fn theta_information_is_the_negative_score_derivative() {
        let y = array![0.0, 1.0, 4.0, 2.0, 9.0, 3.0];
        let mu = array![1.5, 2.0, 3.0, 2.5, 4.0, 2.0];
        let theta = 1.7;
        let h = 1e-4;
        let numeric = -(theta_score(y.view(), &mu, theta + h) - theta_score(y.view(), &mu, theta - h))
            / (2.0 * h);
        assert_abs_diff_eq!(theta_information(y.view(), &mu, theta), numeric, epsilon = 1e-5);
    }

    #[test]
    fn theta_score_agrees_with_the_integer_count_sum() {
        // For integer y, digamma(y + theta) - digamma(theta) = sum_{k < y} 1 / (theta + k).
        let y = array![0.0, 1.0, 4.0, 12.0];
        let mu = array![0.8, 1.5, 3.0, 6.0];
        let theta = 0.9;
        let expected: f64 = y
            .iter()
            .zip(mu.iter())
            .map(|(&yi, &mi)| {
                let counts: f64 = (0..yi as u64).map(|k| 1.0 / (theta + k as f64)).sum();
                counts + theta.ln() + 1.0 - (theta + mi).ln() - (theta + yi) / (theta + mi)
            })
            .sum();
        assert_abs_diff_eq!(theta_score(y.view(), &mu, theta), expected, epsilon = 1e-9);
    }

    #[test]
    fn trigamma_difference_is_the_digamma_difference_derivative() {
        let theta = 2.3;
        let h = 1e-4;
        for y in [0.0, 1.0, 5.0, 20.0] {
            let difference = |t: f64| digamma(y + t) - digamma(t);
            let numeric = (difference(theta + h) - difference(theta - h)) / (2.0 * h);
            assert_abs_diff_eq!(trigamma_difference(y, theta), numeric, epsilon = 1e-6);
        }
    }

    #[test]
    fn moment_alpha_is_floored() {
        assert_abs_diff_eq!(moment_alpha(array![2.0, 2.0, 2.0].view()), MIN_INITIAL_ALPHA);
        // mean 2.5, variance 9: (9 - 2.5) / 6.25.
        let y = array![0.0, 0.0, 3.0, 7.0];
        assert_abs_diff_eq!(moment_alpha(y.view()), 6.5 / 6.25, epsilon = 1e-12);
    }

    #[test]
    fn recovers_dispersion_and_coefficients() {
        let (design, y) = nb_sample(3000, 0.5, 5);
        let model = fit_negative_binomial(&design, y.view(), &FitConfig::default()).unwrap();

        assert!(model.converged());
        let alpha = model.dispersion.as_ref().unwrap();
        assert_abs_diff_eq!(alpha.estimate, 0.5, epsilon = 0.12);
        assert!(alpha.std_error > 0.0 && alpha.z_value > 3.0);
        assert_eq!(model.alpha(), Some(alpha.estimate));

        let slope = model.coefficient("x").unwrap();
        assert!(slope.within_standard_errors(0.4, 4.0), "slope {slope:?}");
        assert_eq!(model.statistics.df_model, 1);
        assert_eq!(model.statistics.df_residuals, 2998);
    }

    #[test]
    fn profile_is_stationary_at_the_estimate() {
        let (design, y) = nb_sample(800, 0.8, 9);
        let model = fit_negative_binomial(&design, y.view(), &FitConfig::default()).unwrap();
        let theta = 1.0 / model.alpha().unwrap();
        let score = theta_score(y.view(), &model.fit.mu, theta) / y.len() as f64;
        assert!(score.abs() < 1e-3, "mean theta score {score}");
    }

    #[test]
    fn statistics_are_internally_consistent() {
        let (design, y) = nb_sample(500, 0.5, 3);
        let model = fit_negative_binomial(&design, y.view(), &FitConfig::default()).unwrap();
        let stats = &model.statistics;
        // 2 coefficients + alpha.
        assert_abs_diff_eq!(stats.aic, -2.0 * stats.log_likelihood + 6.0, epsilon = 1e-9);
        assert!(stats.bic > stats.aic);
        assert!(stats.log_likelihood >= stats.null_log_likelihood - 1e-9);
        assert!((0.0..1.0).contains(&stats.pseudo_r_squared_cs));
        assert_eq!(model.coefficients.len(), 2);
        assert_eq!(model.column_names, vec!["const", "x"]);
    }

    #[test]
    fn poisson_fit_has_no_dispersion_row() {
        let (design, y) = nb_sample(400, 0.5, 21);
        let model = fit_poisson(&design, y.view(), &FitConfig::default()).unwrap();
        assert!(model.dispersion.is_none());
        assert_eq!(model.alpha(), None);
        assert_eq!(model.dispersion_iterations, 0);
        assert_abs_diff_eq!(
            model.statistics.aic,
            -2.0 * model.statistics.log_likelihood + 4.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn rejects_empty_and_mismatched_inputs() {
        let design = DesignMatrix::intercept_only(3);
        let config = FitConfig::default();
        let empty = Array1::<f64>::zeros(0);
        assert!(matches!(
            fit_negative_binomial(&design, empty.view(), &config),
            Err(EstimationError::EmptyData)
        ));
        let short = array![1.0, 2.0];
        assert!(matches!(
            fit_negative_binomial(&design, short.view(), &config),
            Err(EstimationError::DimensionMismatch { .. })
        ));
    }
}
