use statrs::function::gamma::ln_gamma;

/// Linear predictors beyond this magnitude are clamped before exponentiation.
const ETA_CLAMP: f64 = 700.0;

/// Defines the link function, connecting the linear predictor to the mean response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFunction {
    /// The log link, for count outcomes. Maps means (0, inf) to the real line.
    Log,
}

impl LinkFunction {
    pub fn name(&self) -> &'static str {
        match self {
            LinkFunction::Log => "Log",
        }
    }

    pub fn link(&self, mu: f64) -> f64 {
        match self {
            LinkFunction::Log => mu.ln(),
        }
    }

    pub fn inverse(&self, eta: f64) -> f64 {
        match self {
            LinkFunction::Log => eta.clamp(-ETA_CLAMP, ETA_CLAMP).exp(),
        }
    }

    /// `g'(mu)`, the derivative of the link with respect to the mean.
    pub fn derivative(&self, mu: f64) -> f64 {
        match self {
            LinkFunction::Log => 1.0 / mu,
        }
    }
}

/// Error distribution of the response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Family {
    /// `Var(Y) = mu`.
    Poisson,
    /// NB2: `Var(Y) = mu + alpha * mu^2`, with `theta = 1 / alpha`.
    NegativeBinomial { alpha: f64 },
}

impl Family {
    pub fn name(&self) -> &'static str {
        match self {
            Family::Poisson => "Poisson",
            Family::NegativeBinomial { .. } => "NegativeBinomial",
        }
    }

    /// Both count families use their conventional log link.
    pub fn link(&self) -> LinkFunction {
        LinkFunction::Log
    }

    pub fn variance(&self, mu: f64) -> f64 {
        match *self {
            Family::Poisson => mu,
            Family::NegativeBinomial { alpha } => mu + alpha * mu * mu,
        }
    }

    /// Contribution of one observation to the deviance.
    pub fn unit_deviance(&self, y: f64, mu: f64) -> f64 {
        let y_log_y_over_mu = if y > 0.0 { y * (y / mu).ln() } else { 0.0 };
        match *self {
            Family::Poisson => 2.0 * (y_log_y_over_mu - (y - mu)),
            Family::NegativeBinomial { alpha } => {
                let theta = 1.0 / alpha;
                2.0 * (y_log_y_over_mu - (y + theta) * ((y + theta) / (mu + theta)).ln())
            }
        }
    }

    /// Log-likelihood of one count observation.
    pub fn log_likelihood(&self, y: f64, mu: f64) -> f64 {
        match *self {
            Family::Poisson => {
                let y_log_mu = if y > 0.0 { y * mu.ln() } else { 0.0 };
                y_log_mu - mu - ln_gamma(y + 1.0)
            }
            Family::NegativeBinomial { alpha } => {
                let theta = 1.0 / alpha;
                let y_log_odds = if y > 0.0 {
                    y * (mu / (theta + mu)).ln()
                } else {
                    0.0
                };
                ln_gamma(y + theta) - ln_gamma(theta) - ln_gamma(y + 1.0)
                    + theta * (theta / (theta + mu)).ln()
                    + y_log_odds
            }
        }
    }

    /// Number of family parameters estimated besides the coefficients.
    pub fn num_dispersion_params(&self) -> usize {
        match self {
            Family::Poisson => 0,
            Family::NegativeBinomial { .. } => 1,
        }
    }
}

/// Tuning of the fitting routines. All values are fixed; the defaults are what the
/// binary uses.
#[derive(Debug, Clone, PartialEq)]
pub struct FitConfig {
    /// Maximum number of IRLS iterations.
    pub max_iterations: usize,
    /// Bound on the relative deviance change `|dev_old - dev_new| / (|dev_new| + 0.1)`.
    pub convergence_tolerance: f64,
    /// Bound on the largest absolute coefficient step. IRLS stops when both hold.
    pub coefficient_tolerance: f64,
    /// Gradient-norm tolerance of the BFGS search over `log alpha`.
    pub dispersion_tolerance: f64,
    pub dispersion_max_iterations: usize,
    /// Coverage of the reported confidence intervals.
    pub confidence_level: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            convergence_tolerance: 1e-10,
            coefficient_tolerance: 1e-8,
            dispersion_tolerance: 1e-5,
            dispersion_max_iterations: 100,
            confidence_level: 0.95,
        }
    }
}
