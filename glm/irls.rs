//! Iteratively reweighted least squares for count GLMs with a fixed family.
//!
//! Each iteration linearizes the model around the current mean,
//! `z = eta + (y - mu) g'(mu)` with weights `w = 1 / (V(mu) g'(mu)^2)`, and solves
//! the weighted normal equations `X'WX beta = X'Wz`. A step that raises the deviance
//! (or produces non-finite values) is halved until it does not.

use crate::estimate::EstimationError;
use crate::matrix::{DesignMatrix, INTERCEPT};
use crate::model::{Family, FitConfig};
use crate::types::{Coefficients, LinearPredictor};
use ndarray::{Array1, Array2, ArrayView1, Zip};
use ndarray_linalg::{Inverse, Solve};

const MAX_STEP_HALVINGS: usize = 30;
const MIN_WEIGHT: f64 = 1e-10;
/// Relative slack when comparing deviances, so rounding noise at convergence
/// does not trigger step halving.
const DEVIANCE_SLACK: f64 = 1e-12;
/// `exp(30)` is about 1e13 incidents; a linear predictor beyond this is diverging.
const ETA_STABILITY_THRESHOLD: f64 = 30.0;

/// The status of the IRLS convergence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrlsStatus {
    /// Converged successfully within tolerance.
    Converged,
    /// Reached maximum iterations without meeting the tolerances.
    MaxIterationsReached,
}

/// Result of an IRLS fit for one fixed family.
#[derive(Clone, Debug)]
pub struct IrlsResult {
    pub beta: Coefficients,
    pub mu: Array1<f64>,
    /// Working weights at the final mean; `X'WX` with these is the Fisher information.
    pub final_weights: Array1<f64>,
    pub deviance: f64,
    /// `(X'WX)^-1`. With the dispersion scale fixed at 1 this is `Cov(beta)`.
    pub covariance_unscaled: Array2<f64>,
    pub status: IrlsStatus,
    pub iteration: usize,
}

impl IrlsResult {
    pub fn converged(&self) -> bool {
        self.status == IrlsStatus::Converged
    }
}

/// Fits `family` (with its log link) to `y` by IRLS.
///
/// The search starts from `beta = 0` with the intercept at `ln(mean(y))`, so the
/// first linearization is around the marginal mean.
pub fn fit_glm(
    design: &DesignMatrix,
    y: ArrayView1<f64>,
    family: Family,
    config: &FitConfig,
) -> Result<IrlsResult, EstimationError> {
    if y.is_empty() {
        return Err(EstimationError::EmptyData);
    }
    if y.len() != design.nrows() {
        return Err(EstimationError::DimensionMismatch {
            response: y.len(),
            design: design.nrows(),
        });
    }
    let mean_y = y.mean().ok_or(EstimationError::EmptyData)?;
    if mean_y <= 0.0 {
        return Err(EstimationError::DegenerateResponse);
    }

    let mut beta = Array1::<f64>::zeros(design.ncols());
    if design.column_names().first().map(String::as_str) == Some(INTERCEPT) {
        beta[0] = family.link().link(mean_y);
    }
    let mut eta = LinearPredictor::new(design.matrix_vector_multiply(&beta));
    let (mut mu, mut weights, mut z) = update_glm_vectors(y, &eta, family);
    let mut last_deviance = calculate_deviance(y, &mu, family);
    let mut status = IrlsStatus::MaxIterationsReached;
    let mut last_iter = 0;

    log::debug!(
        "Starting IRLS for {} family: {} observations, {} coefficients, initial deviance {:.6e}",
        family.name(),
        y.len(),
        design.ncols(),
        last_deviance
    );

    for iter in 1..=config.max_iterations {
        last_iter = iter;

        if !mu.iter().all(|v| v.is_finite())
            || !weights.iter().all(|v| v.is_finite())
            || !z.iter().all(|v| v.is_finite())
        {
            return Err(EstimationError::IrlsUnstable { iteration: iter });
        }

        let beta_current = beta.clone();
        let xtwx = design.weighted_gram(&weights);
        let xtwz = design.weighted_transpose_multiply(&weights, &z);
        let mut beta_trial = xtwx
            .solve(&xtwz)
            .map_err(EstimationError::LinearSystemSolveFailed)?;
        if !beta_trial.iter().all(|b| b.is_finite()) {
            log::error!("Non-finite beta values at iteration {iter}: {beta_trial:?}");
            return Err(EstimationError::IrlsUnstable { iteration: iter });
        }

        let mut eta_trial = design.matrix_vector_multiply(&beta_trial);
        let mut deviance_trial = calculate_deviance(y, &eta_trial.mapv(|e| family.link().inverse(e)), family);
        let deviance_bound = last_deviance + DEVIANCE_SLACK * (last_deviance.abs() + 1.0);

        let mut step_halving_count = 0;
        while (!deviance_trial.is_finite() || deviance_trial > deviance_bound)
            && step_halving_count < MAX_STEP_HALVINGS
        {
            beta_trial = &beta_current + 0.5 * (&beta_trial - &beta_current);
            eta_trial = design.matrix_vector_multiply(&beta_trial);
            deviance_trial =
                calculate_deviance(y, &eta_trial.mapv(|e| family.link().inverse(e)), family);
            step_halving_count += 1;
            log::debug!(
                "Step halving #{} | current: {:.8e}, trial: {:.8e}",
                step_halving_count,
                last_deviance,
                deviance_trial
            );
        }

        if !deviance_trial.is_finite() || deviance_trial > deviance_bound {
            log::warn!(
                "IRLS failed to find a valid step after {} halvings",
                step_halving_count
            );
            return Err(EstimationError::StepHalvingFailed {
                iteration: iter,
                halvings: step_halving_count,
            });
        }

        let max_step = (&beta_trial - &beta_current)
            .iter()
            .fold(0.0_f64, |acc, d| acc.max(d.abs()));
        let deviance_change = (last_deviance - deviance_trial).abs();

        beta = beta_trial;
        eta = LinearPredictor::new(eta_trial);
        last_deviance = deviance_trial;
        (mu, weights, z) = update_glm_vectors(y, &eta, family);

        let max_abs_eta = eta.max_abs();
        if max_abs_eta > ETA_STABILITY_THRESHOLD {
            log::warn!(
                "IRLS iteration {iter}: |eta| reached {max_abs_eta:.2}; fitted means are diverging"
            );
        }

        log::debug!(
            "[IRLS Iter #{}] deviance {:.10e}, change {:.3e}, max step {:.3e}",
            iter,
            last_deviance,
            deviance_change,
            max_step
        );

        if deviance_change / (last_deviance.abs() + 0.1) < config.convergence_tolerance
            && max_step < config.coefficient_tolerance
        {
            status = IrlsStatus::Converged;
            break;
        }
    }

    if status != IrlsStatus::Converged {
        log::warn!(
            "IRLS reached the maximum of {} iterations without converging (deviance {:.6e})",
            config.max_iterations,
            last_deviance
        );
    }

    let covariance_unscaled = design
        .weighted_gram(&weights)
        .inv()
        .map_err(EstimationError::LinearSystemSolveFailed)?;

    Ok(IrlsResult {
        beta: Coefficients::new(beta),
        mu,
        final_weights: weights,
        deviance: last_deviance,
        covariance_unscaled,
        status,
        iteration: last_iter,
    })
}

/// Computes the mean, working weights and working response for a linear predictor.
pub fn update_glm_vectors(
    y: ArrayView1<f64>,
    eta: &Array1<f64>,
    family: Family,
) -> (Array1<f64>, Array1<f64>, Array1<f64>) {
    let link = family.link();
    let mu = eta.mapv(|e| link.inverse(e));
    let weights = mu.mapv(|m| {
        let derivative = link.derivative(m);
        (1.0 / (family.variance(m) * derivative * derivative)).max(MIN_WEIGHT)
    });
    let z = Zip::from(eta)
        .and(y)
        .and(&mu)
        .map_collect(|&e, &yi, &mi| e + (yi - mi) * link.derivative(mi));
    (mu, weights, z)
}

pub fn calculate_deviance(y: ArrayView1<f64>, mu: &Array1<f64>, family: Family) -> f64 {
    Zip::from(y)
        .and(mu)
        .fold(0.0, |acc, &yi, &mi| acc + family.unit_deviance(yi, mi))
}

/// Sum of squared Pearson residuals, `sum (y - mu)^2 / V(mu)`.
pub fn pearson_chi2(y: ArrayView1<f64>, mu: &Array1<f64>, family: Family) -> f64 {
    Zip::from(y).and(mu).fold(0.0, |acc, &yi, &mi| {
        let residual = yi - mi;
        acc + residual * residual / family.variance(mi)
    })
}

pub fn log_likelihood(y: ArrayView1<f64>, mu: &Array1<f64>, family: Family) -> f64 {
    Zip::from(y)
        .and(mu)
        .fold(0.0, |acc, &yi, &mi| acc + family.log_likelihood(yi, mi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::NegativeBinomial;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};
    use rand::distributions::Distribution;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::Poisson;

    fn single_covariate_design(x: &Array1<f64>) -> DesignMatrix {
        let covariates = x.view().insert_axis(ndarray::Axis(1));
        DesignMatrix::with_constant(covariates, &["x"]).unwrap()
    }

    #[test]
    fn recovers_poisson_coefficients() {
        let n = 2000;
        let mut rng = StdRng::seed_from_u64(42);
        let x: Array1<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let y: Array1<f64> = x
            .iter()
            .map(|&xi| {
                let mu = (0.3_f64 + 0.8 * xi).exp();
                Poisson::new(mu).unwrap().sample(&mut rng)
            })
            .collect();

        let design = single_covariate_design(&x);
        let fit = fit_glm(&design, y.view(), Family::Poisson, &FitConfig::default()).unwrap();

        assert!(fit.converged());
        assert!(fit.iteration < 50);
        assert_abs_diff_eq!(fit.beta[0], 0.3, epsilon = 0.1);
        assert_abs_diff_eq!(fit.beta[1], 0.8, epsilon = 0.1);
    }

    #[test]
    fn poisson_score_equations_hold_at_convergence() {
        // With the canonical log link the MLE satisfies X'(y - mu) = 0.
        let x = array![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let y = array![1.0, 0.0, 2.0, 3.0, 2.0, 6.0, 5.0, 9.0];
        let design = single_covariate_design(&x);
        let fit = fit_glm(&design, y.view(), Family::Poisson, &FitConfig::default()).unwrap();

        let residuals = &y - &fit.mu;
        assert_abs_diff_eq!(residuals.sum(), 0.0, epsilon = 1e-8);
        assert_abs_diff_eq!(residuals.dot(&x), 0.0, epsilon = 1e-8);
    }

    #[test]
    fn intercept_only_fit_returns_the_log_mean() {
        let y = array![0.0, 3.0, 1.0, 8.0, 2.0, 4.0];
        let design = DesignMatrix::intercept_only(y.len());
        let family = Family::NegativeBinomial { alpha: 0.8 };
        let fit = fit_glm(&design, y.view(), family, &FitConfig::default()).unwrap();

        assert!(fit.converged());
        assert_abs_diff_eq!(fit.beta[0], 3.0_f64.ln(), epsilon = 1e-8);
        // Var(beta_0) = 1 / sum(w) with w = mu / (1 + alpha mu).
        let expected_var = (1.0 + 0.8 * 3.0) / (6.0 * 3.0);
        assert_abs_diff_eq!(fit.covariance_unscaled[[0, 0]], expected_var, epsilon = 1e-8);
    }

    #[test]
    fn negative_binomial_fit_recovers_generating_coefficients() {
        let n = 4000;
        let mut rng = StdRng::seed_from_u64(7);
        let x: Array1<f64> = (0..n).map(|_| rng.gen_range(0.0..2.0)).collect();
        let y: Array1<f64> = x
            .iter()
            .map(|&xi| {
                let mu = (0.5_f64 + 0.6 * xi).exp();
                NegativeBinomial::from_mean(mu, 0.5).unwrap().sample(&mut rng) as f64
            })
            .collect();
        let design = single_covariate_design(&x);
        let family = Family::NegativeBinomial { alpha: 0.5 };
        let fit = fit_glm(&design, y.view(), family, &FitConfig::default()).unwrap();

        assert!(fit.converged());
        assert_abs_diff_eq!(fit.beta[0], 0.5, epsilon = 0.1);
        assert_abs_diff_eq!(fit.beta[1], 0.6, epsilon = 0.1);
        assert!(fit.deviance.is_finite());
        assert_eq!(fit.final_weights.len(), n);
    }

    #[test]
    fn reports_max_iterations_when_budget_is_too_small() {
        let x = array![0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let y = array![1.0, 0.0, 2.0, 5.0, 4.0, 9.0];
        let design = single_covariate_design(&x);
        let config = FitConfig {
            max_iterations: 1,
            ..FitConfig::default()
        };
        let fit = fit_glm(&design, y.view(), Family::Poisson, &config).unwrap();
        assert_eq!(fit.status, IrlsStatus::MaxIterationsReached);
        assert_eq!(fit.iteration, 1);
    }

    #[test]
    fn rejects_mismatched_and_degenerate_inputs() {
        let design = DesignMatrix::intercept_only(3);
        let config = FitConfig::default();

        let short = array![1.0, 2.0];
        assert!(matches!(
            fit_glm(&design, short.view(), Family::Poisson, &config),
            Err(EstimationError::DimensionMismatch { response: 2, design: 3 })
        ));

        let zeros = array![0.0, 0.0, 0.0];
        assert!(matches!(
            fit_glm(&design, zeros.view(), Family::Poisson, &config),
            Err(EstimationError::DegenerateResponse)
        ));
    }

    #[test]
    fn singular_design_fails_the_linear_solve() {
        let covariates = Array2::<f64>::zeros((4, 1));
        let design = DesignMatrix::with_constant(covariates.view(), &["constant_zero"]).unwrap();
        let y = array![1.0, 2.0, 0.0, 3.0];
        assert!(matches!(
            fit_glm(&design, y.view(), Family::Poisson, &FitConfig::default()),
            Err(EstimationError::LinearSystemSolveFailed(_))
        ));
    }

    #[test]
    fn working_vectors_follow_the_variance_function() {
        let y = array![2.0];
        let eta = array![0.0];
        let (mu, weights, z) = update_glm_vectors(y.view(), &eta, Family::NegativeBinomial { alpha: 0.5 });
        assert_abs_diff_eq!(mu[0], 1.0, epsilon = 1e-12);
        // w = mu / (1 + alpha mu) and z = eta + (y - mu) / mu.
        assert_abs_diff_eq!(weights[0], 1.0 / 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(z[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pearson_chi2(y.view(), &mu, Family::Poisson), 1.0, epsilon = 1e-12);
    }
}
