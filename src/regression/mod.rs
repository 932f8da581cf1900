//! Radial-basis-function regression pieces for the dispersion prior
//!
//! The prior on log-dispersion is a nonlinear regression on log-mean
//! expression: an intercept, a linear term in log(mu) and a grid of
//! Gaussian radial basis functions centered at the basis locations. The
//! regression coefficients, precision weights and residual variance are
//! sampled by the enclosing Gibbs sampler and enter the updaters here as
//! fixed inputs.

use ndarray::{Array1, Array2};

use crate::error::{BasicsError, Result};
use crate::stats::quantile_sorted;

/// Regression nuisance parameters held fixed within a single updater call.
///
/// `x` is the design matrix evaluated at the *current* mean vector; the
/// mean updater additionally rebuilds a design matrix at the proposed
/// means, but the current-state residual term always reads `x`.
#[derive(Debug, Clone)]
pub struct RegressionState {
    /// Number of regression components: intercept, linear term and k-2 bases
    pub k: usize,
    /// Per-gene precision weights of the scaled error model
    pub lambda: Array1<f64>,
    /// Regression coefficients
    pub beta: Array1<f64>,
    /// Design matrix at the current means (genes x k)
    pub x: Array2<f64>,
    /// Residual variance
    pub sigma2: f64,
    /// Bandwidth scale of the Gaussian bases
    pub variance: f64,
}

impl RegressionState {
    pub(crate) fn validate(&self, q0: usize) -> Result<()> {
        if self.k < 4 {
            return Err(BasicsError::InvalidRegression {
                reason: format!(
                    "at least 4 regression components are required (intercept, slope and 2 bases), got {}",
                    self.k
                ),
            });
        }
        if self.lambda.len() != q0 {
            return Err(BasicsError::DimensionMismatch {
                expected: format!("{} entries in lambda", q0),
                got: format!("{}", self.lambda.len()),
            });
        }
        if self.beta.len() != self.k {
            return Err(BasicsError::DimensionMismatch {
                expected: format!("{} entries in beta", self.k),
                got: format!("{}", self.beta.len()),
            });
        }
        if self.x.dim() != (q0, self.k) {
            return Err(BasicsError::DimensionMismatch {
                expected: format!("{}x{} design matrix", q0, self.k),
                got: format!("{}x{}", self.x.nrows(), self.x.ncols()),
            });
        }
        if !(self.sigma2 > 0.0) || !self.sigma2.is_finite() {
            return Err(BasicsError::InvalidRegression {
                reason: format!("residual variance must be positive and finite, got {}", self.sigma2),
            });
        }
        Ok(())
    }
}

/// Build the design matrix of the dispersion regression for a mean vector.
/// BASiCS equivalent: designMatrix() in utils.h
///
/// Columns are the intercept, log(mu) and one Gaussian bump per basis
/// location, with bandwidth proportional to the location spacing:
/// `h = (loc[1] - loc[0]) * variance`.
pub fn design_matrix(
    k: usize,
    locations: &Array1<f64>,
    mu: &Array1<f64>,
    variance: f64,
) -> Result<Array2<f64>> {
    if k < 4 {
        return Err(BasicsError::InvalidRegression {
            reason: format!(
                "at least 4 regression components are required (intercept, slope and 2 bases), got {}",
                k
            ),
        });
    }
    if locations.len() != k - 2 {
        return Err(BasicsError::DimensionMismatch {
            expected: format!("{} basis locations", k - 2),
            got: format!("{}", locations.len()),
        });
    }

    let h = (locations[1] - locations[0]) * variance;
    if !(h > 0.0) || !h.is_finite() {
        return Err(BasicsError::InvalidRegression {
            reason: "basis locations must be strictly increasing and finite".to_string(),
        });
    }

    let q0 = mu.len();
    let mut x = Array2::ones((q0, k));
    for i in 0..q0 {
        let log_mu = mu[i].ln();
        x[[i, 1]] = log_mu;
        for j in 0..k - 2 {
            let z = (log_mu - locations[j]) / h;
            x[[i, j + 2]] = (-0.5 * z * z).exp();
        }
    }
    Ok(x)
}

/// Place the k-2 basis centers over the observed range of log-means.
/// BASiCS equivalent: estimateRBFLocations() in utils.h
///
/// With `min_max` the centers form an equally spaced grid over
/// `[min(log_mu), max(log_mu)]`; otherwise they sit at equally spaced
/// empirical quantiles of `log_mu`, which keeps the grid from being
/// stretched by a handful of outlying genes.
pub fn estimate_rbf_locations(
    log_mu: &Array1<f64>,
    k: usize,
    min_max: bool,
) -> Result<Array1<f64>> {
    if k < 4 {
        return Err(BasicsError::InvalidRegression {
            reason: format!(
                "at least 4 regression components are required (intercept, slope and 2 bases), got {}",
                k
            ),
        });
    }
    if log_mu.is_empty() {
        return Err(BasicsError::InvalidInput {
            reason: "cannot place basis locations for an empty log-mean vector".to_string(),
        });
    }

    let m = k - 2;
    if min_max {
        let lo = log_mu.fold(f64::INFINITY, |a, &b| a.min(b));
        let hi = log_mu.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        Ok(Array1::linspace(lo, hi, m))
    } else {
        let mut sorted = log_mu.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let locations = (0..m)
            .map(|j| quantile_sorted(&sorted, j as f64 / (m - 1) as f64))
            .collect();
        Ok(locations)
    }
}
