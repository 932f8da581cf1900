//! Adaptive Metropolis-Hastings updates for the gene-specific parameters
//!
//! Two kernels, invoked once per MCMC iteration by the enclosing Gibbs
//! sampler: [`MeanUpdater`] for the mean expression vector (under the
//! sum-of-log-means identifiability constraint) and [`DispersionUpdater`]
//! for the overdispersion vector (under the radial-basis regression
//! prior). Both propose through a log-normal random walk and decide
//! per gene with the Metropolis rule.
//!
//! Randomness is injected through [`ProposalDraws`]: a call is a pure
//! function of its inputs and its draws, so fixed draws give bit-identical
//! output across runs.

mod dispersion;
mod mean;

pub use dispersion::DispersionUpdater;
pub use mean::{ConstraintSet, MeanPrior, MeanUpdater};

use ndarray::Array1;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{BasicsError, Result};

/// Random draws consumed by one updater call: standard-normal increments
/// `z` for the log-normal random walk and uniform variates `u` for the
/// Metropolis test, one of each per gene.
#[derive(Debug, Clone)]
pub struct ProposalDraws {
    pub z: Array1<f64>,
    pub u: Array1<f64>,
}

impl ProposalDraws {
    /// Sample fresh draws for `q0` genes.
    pub fn sample<R: Rng + ?Sized>(q0: usize, rng: &mut R) -> Self {
        let z = Array1::from_iter((0..q0).map(|_| rng.sample::<f64, _>(StandardNormal)));
        let u = Array1::from_iter((0..q0).map(|_| rng.random::<f64>()));
        ProposalDraws { z, u }
    }

    pub fn len(&self) -> usize {
        self.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.z.is_empty()
    }
}

/// Tuning knobs shared by both updaters.
#[derive(Debug, Clone, Copy)]
pub struct UpdateSettings {
    /// Tempering exponent applied to prior and regression contributions
    pub exponent: f64,
    /// Proposals at or below this floor are always rejected
    pub mintol: f64,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        UpdateSettings {
            exponent: 1.0,
            mintol: 1e-3,
        }
    }
}

impl UpdateSettings {
    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.exponent > 0.0) || !self.exponent.is_finite() {
            return Err(BasicsError::InvalidInput {
                reason: format!("tempering exponent must be positive and finite, got {}", self.exponent),
            });
        }
        if !(self.mintol > 0.0) || !self.mintol.is_finite() {
            return Err(BasicsError::InvalidInput {
                reason: format!("tolerance floor must be positive and finite, got {}", self.mintol),
            });
        }
        Ok(())
    }
}

/// Result of one accept/reject sweep: the two aligned columns of updated
/// values and acceptance indicators, plus a diagnostic counter.
#[derive(Debug, Clone)]
pub struct McmcUpdate {
    /// Updated parameter vector: the proposed value where accepted, a copy
    /// of the current value where rejected
    pub values: Array1<f64>,
    /// Acceptance indicator per gene, 0.0 or 1.0
    pub accepted: Array1<f64>,
    /// Genes rejected because the acceptance ratio or the proposal was not
    /// finite
    pub non_finite: usize,
}

impl McmcUpdate {
    /// Fraction of genes accepted in this call.
    pub fn acceptance_rate(&self) -> f64 {
        if self.accepted.is_empty() {
            return 0.0;
        }
        self.accepted.sum() / self.accepted.len() as f64
    }
}

/// Per-gene decision callback for diagnostic traces. Receives the gene
/// index and whether the proposal was accepted; must not influence the
/// numerical result.
pub type DecisionObserver<'a> = dyn FnMut(usize, bool) + 'a;

/// Outcome of a single Metropolis test under the tolerance floor and the
/// non-finite rejection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Accept,
    Reject,
    /// Rejected because the ratio or the proposal was not finite
    NonFinite,
}

/// Decide a single gene. A non-finite log-ratio or proposal rejects and is
/// flagged so the caller can keep a diagnostic count instead of aborting
/// the chain; a proposal at or below `mintol` is rejected unconditionally.
pub(crate) fn decide(log_u: f64, log_ratio: f64, proposed: f64, mintol: f64) -> Decision {
    if !log_ratio.is_finite() || !proposed.is_finite() {
        return Decision::NonFinite;
    }
    if log_u < log_ratio && proposed > mintol {
        Decision::Accept
    } else {
        Decision::Reject
    }
}

/// Log-normal random-walk proposal: `current * exp(z * sqrt(prop_var))`.
pub(crate) fn propose_log_normal(
    current: &Array1<f64>,
    prop_var: &Array1<f64>,
    z: &Array1<f64>,
) -> Array1<f64> {
    let mut proposed = Array1::zeros(current.len());
    for i in 0..current.len() {
        proposed[i] = current[i] * (z[i] * prop_var[i].sqrt()).exp();
    }
    proposed
}

pub(crate) fn check_len(name: &str, len: usize, expected: usize) -> Result<()> {
    if len != expected {
        return Err(BasicsError::DimensionMismatch {
            expected: format!("{} entries in {}", expected, name),
            got: format!("{}", len),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_draws_are_reproducible() {
        let mut rng1 = StdRng::seed_from_u64(17);
        let mut rng2 = StdRng::seed_from_u64(17);
        let a = ProposalDraws::sample(50, &mut rng1);
        let b = ProposalDraws::sample(50, &mut rng2);
        assert_eq!(a.z, b.z);
        assert_eq!(a.u, b.u);
        assert_eq!(a.len(), 50);
        assert!(a.u.iter().all(|&u| (0.0..1.0).contains(&u)));
    }

    #[test]
    fn test_decide_policies() {
        // favorable ratio, proposal above the floor
        assert_eq!(decide(-1.0, 0.0, 1.0, 1e-3), Decision::Accept);
        // unfavorable ratio
        assert_eq!(decide(-0.1, -1.0, 1.0, 1e-3), Decision::Reject);
        // favorable ratio but proposal at/below the floor
        assert_eq!(decide(-700.0, 5.0, 1e-3, 1e-3), Decision::Reject);
        // non-finite ratio or proposal
        assert_eq!(decide(-1.0, f64::NAN, 1.0, 1e-3), Decision::NonFinite);
        assert_eq!(decide(-1.0, 0.0, f64::INFINITY, 1e-3), Decision::NonFinite);
    }

    #[test]
    fn test_log_normal_proposal() {
        let current = array![2.0, 3.0];
        let prop_var = array![4.0, 1.0];
        let z = array![0.5, 0.0];
        let proposed = propose_log_normal(&current, &prop_var, &z);
        // 2 * exp(0.5 * 2) = 2e, 3 * exp(0) = 3
        assert!((proposed[0] - 2.0 * 1.0_f64.exp()).abs() < 1e-12);
        assert!((proposed[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_settings_validation() {
        assert!(UpdateSettings::default().validate().is_ok());
        assert!(UpdateSettings { exponent: 0.0, mintol: 1e-3 }.validate().is_err());
        assert!(UpdateSettings { exponent: 1.0, mintol: -1.0 }.validate().is_err());
        assert!(UpdateSettings { exponent: f64::NAN, mintol: 1e-3 }.validate().is_err());
    }
}
