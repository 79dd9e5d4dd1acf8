//! # Synthetic Count Data
//!
//! Draws the demonstration cohort: a continuous peer-risk score, a binary parenting
//! style indicator, and a monthly incident count whose log-mean is linear in both.
//! The count is negative binomial, so its variance exceeds its mean by `alpha * mu^2`.
//!
//! A single `StdRng` is seeded once and consumed column by column (all `PeerRisk`
//! draws, then all `ParentingStyle` draws, then all counts). Two runs with the same
//! configuration therefore yield identical tables.

use ndarray::Array1;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Gamma, GammaError, Poisson, PoissonError};
use thiserror::Error;

/// Upper bound of the uniform `PeerRisk` draw; the lower bound is zero.
const PEER_RISK_MAX: f64 = 10.0;

/// Fixed parameters of the simulated cohort.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub n_samples: usize,
    pub seed: u64,
    pub intercept: f64,
    pub peer_risk_coef: f64,
    pub parenting_style_coef: f64,
    /// Negative binomial dispersion; `Var(Y) = mu + alpha * mu^2`.
    pub alpha: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            n_samples: 500,
            seed: 42,
            intercept: 0.1,
            peer_risk_coef: 0.2,
            parenting_style_coef: 0.5,
            alpha: 0.5,
        }
    }
}

impl SimulationConfig {
    /// The generating coefficients in design-matrix order: const, PeerRisk, ParentingStyle.
    pub fn true_coefficients(&self) -> [f64; 3] {
        [self.intercept, self.peer_risk_coef, self.parenting_style_coef]
    }
}

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("The sample size must be at least one observation.")]
    EmptySample,
    #[error("The dispersion parameter alpha must be finite and strictly positive, got {0}.")]
    InvalidDispersion(f64),
    #[error(
        "Negative binomial parameters are out of range: size={size} must be > 0 and prob={prob} must lie in (0, 1]."
    )]
    InvalidParameters { size: f64, prob: f64 },
    #[error("The Gamma mixing distribution rejected its parameters: {0}")]
    GammaError(#[from] GammaError),
    #[error("The Poisson distribution rejected its parameters: {0}")]
    PoissonError(#[from] PoissonError),
}

/// Negative binomial distribution in the (`size`, `prob`) parameterization: the number
/// of failures before `size` successes with success probability `prob`.
///
/// Sampled as a Gamma–Poisson mixture, `lambda ~ Gamma(size, (1 - prob) / prob)` and
/// `Y ~ Poisson(lambda)`, which also covers non-integer `size`.
#[derive(Clone, Debug)]
pub struct NegativeBinomial {
    size: f64,
    prob: f64,
    mixing: Option<Gamma<f64>>,
}

impl NegativeBinomial {
    pub fn new(size: f64, prob: f64) -> Result<Self, SimulationError> {
        if !size.is_finite() || size <= 0.0 || !(prob > 0.0 && prob <= 1.0) {
            return Err(SimulationError::InvalidParameters { size, prob });
        }
        // prob == 1 is a point mass at zero.
        let mixing = if prob < 1.0 {
            Some(Gamma::new(size, (1.0 - prob) / prob)?)
        } else {
            None
        };
        Ok(Self { size, prob, mixing })
    }

    /// Builds the distribution with mean `mean` and dispersion `alpha`
    /// (`size = 1 / alpha`, `prob = size / (size + mean)`).
    pub fn from_mean(mean: f64, alpha: f64) -> Result<Self, SimulationError> {
        if !alpha.is_finite() || alpha <= 0.0 {
            return Err(SimulationError::InvalidDispersion(alpha));
        }
        let size = 1.0 / alpha;
        Self::new(size, size / (size + mean))
    }

    pub fn mean(&self) -> f64 {
        self.size * (1.0 - self.prob) / self.prob
    }

    pub fn variance(&self) -> f64 {
        self.size * (1.0 - self.prob) / (self.prob * self.prob)
    }
}

impl Distribution<u64> for NegativeBinomial {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        let Some(gamma) = &self.mixing else {
            return 0;
        };
        let lambda = gamma.sample(rng);
        if !lambda.is_finite() || lambda <= 0.0 {
            return 0;
        }
        Poisson::new(lambda).map_or(0, |poisson| poisson.sample(rng) as u64)
    }
}

/// The simulated cohort, one entry per subject in every column.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedData {
    pub peer_risk: Array1<f64>,
    pub parenting_style: Array1<i64>,
    pub monthly_incidents: Array1<i64>,
    /// `exp(eta)` under the generating coefficients.
    pub true_mean: Array1<f64>,
}

impl SimulatedData {
    pub fn len(&self) -> usize {
        self.monthly_incidents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monthly_incidents.is_empty()
    }
}

/// Draws `config.n_samples` independent subjects.
pub fn synthesize(config: &SimulationConfig) -> Result<SimulatedData, SimulationError> {
    if config.n_samples == 0 {
        return Err(SimulationError::EmptySample);
    }
    if !config.alpha.is_finite() || config.alpha <= 0.0 {
        return Err(SimulationError::InvalidDispersion(config.alpha));
    }

    let n = config.n_samples;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let risk_distribution = Uniform::new(0.0, PEER_RISK_MAX);
    let peer_risk: Array1<f64> = (0..n).map(|_| risk_distribution.sample(&mut rng)).collect();
    let parenting_style: Array1<i64> = (0..n).map(|_| rng.gen_range(0..2)).collect();

    let true_mean: Array1<f64> = peer_risk
        .iter()
        .zip(parenting_style.iter())
        .map(|(&risk, &style)| {
            let eta = config.intercept
                + config.peer_risk_coef * risk
                + config.parenting_style_coef * style as f64;
            eta.exp()
        })
        .collect();

    let mut counts = Vec::with_capacity(n);
    for &mu in &true_mean {
        let distribution = NegativeBinomial::from_mean(mu, config.alpha)?;
        counts.push(distribution.sample(&mut rng) as i64);
    }

    log::debug!(
        "Synthesized {} observations (seed {}, alpha {})",
        n,
        config.seed,
        config.alpha
    );

    Ok(SimulatedData {
        peer_risk,
        parenting_style,
        monthly_incidents: Array1::from_vec(counts),
        true_mean,
    })
}
