//! Metropolis-Hastings update of the gene-specific overdispersion parameters
//! BASiCS equivalent: .deltaUpdateRegNoSpikes() in updatesRegNoSpikes.h
//!
//! Every gene is independent here: there is no identifiability constraint,
//! and the regression prior is evaluated against the fixed design matrix
//! supplied by the caller, so the whole likelihood sweep is data-parallel.
//! Indicator production runs as a separate serial pass that can feed a
//! diagnostic observer without touching the numbers.

use ndarray::Array1;
use rayon::prelude::*;

use crate::data::CountMatrix;
use crate::error::Result;
use crate::regression::RegressionState;
use crate::sampler::{
    check_len, decide, propose_log_normal, Decision, DecisionObserver, McmcUpdate, ProposalDraws,
    UpdateSettings,
};
use crate::stats::ln_gamma;

/// Metropolis-Hastings updater for the overdispersion vector.
#[derive(Debug, Clone, Default)]
pub struct DispersionUpdater {
    pub settings: UpdateSettings,
}

impl DispersionUpdater {
    /// Run one accept/reject sweep over all genes.
    ///
    /// `delta0` is the current state, `mu` the current means and
    /// `regression` the regression nuisance parameters with the design
    /// matrix evaluated at `mu`. Returns the updated dispersions and
    /// acceptance indicators; rejected genes keep a copy of their current
    /// value.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &self,
        counts: &CountMatrix,
        nu: &Array1<f64>,
        mu: &Array1<f64>,
        delta0: &Array1<f64>,
        prop_var: &Array1<f64>,
        regression: &RegressionState,
        draws: &ProposalDraws,
    ) -> Result<McmcUpdate> {
        self.update_with_observer(counts, nu, mu, delta0, prop_var, regression, draws, &mut |_, _| {})
    }

    /// Like [`update`](Self::update), with a per-gene decision callback for
    /// diagnostic traces.
    #[allow(clippy::too_many_arguments)]
    pub fn update_with_observer(
        &self,
        counts: &CountMatrix,
        nu: &Array1<f64>,
        mu: &Array1<f64>,
        delta0: &Array1<f64>,
        prop_var: &Array1<f64>,
        regression: &RegressionState,
        draws: &ProposalDraws,
        observer: &mut DecisionObserver,
    ) -> Result<McmcUpdate> {
        let q0 = counts.n_genes();
        let n = counts.n_cells();

        self.settings.validate()?;
        check_len("nu", nu.len(), n)?;
        check_len("mu", mu.len(), q0)?;
        check_len("delta0", delta0.len(), q0)?;
        check_len("prop_var", prop_var.len(), q0)?;
        check_len("draws", draws.len(), q0)?;
        regression.validate(q0)?;

        // PROPOSAL STEP
        let delta1 = propose_log_normal(delta0, prop_var, &draws.z);

        let raw = counts.counts();
        let fit = regression.x.dot(&regression.beta);
        let n_f = n as f64;
        let exponent = self.settings.exponent;

        // Acceptance ratio, accumulated gene by gene in parallel.
        let log_aux: Vec<f64> = (0..q0)
            .into_par_iter()
            .map(|i| {
                let inv1 = 1.0 / delta1[i];
                let inv0 = 1.0 / delta0[i];

                let mut acc = -n_f * (ln_gamma(inv1) - ln_gamma(inv0));
                // a +1 appears because log(delta) is updated rather than
                // delta; it cancels against the prior
                acc -= n_f * (delta1[i].ln() * inv1 - delta0[i].ln() * inv0);

                for j in 0..n {
                    let count = raw[[i, j]];
                    let scaled_mu = nu[j] * mu[i];
                    acc += ln_gamma(count + inv1) - ln_gamma(count + inv0);
                    acc -= (count + inv1) * (scaled_mu + inv1).ln();
                    acc += (count + inv0) * (scaled_mu + inv0).ln();
                }

                acc - exponent * regression.lambda[i]
                    * ((delta1[i].ln() - fit[i]).powi(2) - (delta0[i].ln() - fit[i]).powi(2))
                    / (2.0 * regression.sigma2)
            })
            .collect();

        // Indicator pass: serial, so the observer sees genes in order.
        let mut values = delta1;
        let mut accepted = Array1::zeros(q0);
        let mut non_finite = 0usize;
        for i in 0..q0 {
            let decision = decide(draws.u[i].ln(), log_aux[i], values[i], self.settings.mintol);
            match decision {
                Decision::Accept => {
                    accepted[i] = 1.0;
                }
                Decision::Reject => {
                    values[i] = delta0[i];
                }
                Decision::NonFinite => {
                    non_finite += 1;
                    log::warn!(
                        "non-finite acceptance ratio updating delta for gene {}; \
                         consider additional data filtering",
                        i
                    );
                    values[i] = delta0[i];
                }
            }
            observer(i, decision == Decision::Accept);
        }

        let update = McmcUpdate {
            values,
            accepted,
            non_finite,
        };
        log::debug!(
            "delta update: accepted {}/{} genes ({} non-finite rejections)",
            update.accepted.sum() as usize,
            q0,
            non_finite
        );
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BasicsError;
    use ndarray::{array, Array2};

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    fn regression(q0: usize, lambda: Array1<f64>) -> RegressionState {
        RegressionState {
            k: 4,
            lambda,
            beta: Array1::zeros(4),
            x: Array2::zeros((q0, 4)),
            sigma2: 1.0,
            variance: 1.0,
        }
    }

    #[test]
    fn test_hand_computed_ratio_accepts() {
        // Single gene, single cell with a zero count: the lgamma terms
        // cancel and the ratio reduces to
        //   -(ln d1/d1 - ln d0/d0) - (1/d1) ln(mu + 1/d1) + (1/d0) ln(mu + 1/d0)
        // With d0 = 1, d1 = e, mu = nu = 1 this is
        //   -1/e - (1/e) ln(1 + 1/e) + ln 2 = 0.2100...
        // so the proposal is accepted even with u close to 1.
        let counts = CountMatrix::new(array![[0.0], [1.0]], ids("gene", 2), ids("cell", 1)).unwrap();
        let nu = array![1.0];
        let mu = array![1.0, 1.0];
        let delta0 = array![1.0, 1.0];
        let prop_var = array![1.0, 1.0];
        let draws = ProposalDraws {
            z: array![1.0, 0.0],
            u: array![0.9, 0.5],
        };

        let updater = DispersionUpdater::default();
        let result = updater
            .update(&counts, &nu, &mu, &delta0, &prop_var, &regression(2, Array1::zeros(2)), &draws)
            .unwrap();

        assert_eq!(result.accepted[0], 1.0);
        assert!((result.values[0] - 1.0_f64.exp()).abs() < 1e-12);
        // z = 0 proposes the current value; the ratio is exactly zero and
        // ln(0.5) < 0 accepts it
        assert_eq!(result.accepted[1], 1.0);
        assert!((result.values[1] - 1.0).abs() < 1e-12);
        assert_eq!(result.non_finite, 0);
    }

    #[test]
    fn test_regression_term_can_flip_the_decision() {
        // Same setup as above for gene 0, but a heavy precision weight
        // pushes the squared-residual penalty of the larger proposal below
        // the likelihood gain: with lambda = 10 and sigma2 = 1 the penalty
        // is 10 * (1 - 0) / 2 = 5, far larger than the 0.21 likelihood
        // advantage, so u = 0.9 now rejects.
        let counts = CountMatrix::new(array![[0.0]], ids("gene", 1), ids("cell", 1)).unwrap();
        let nu = array![1.0];
        let mu = array![1.0];
        let delta0 = array![1.0];
        let prop_var = array![1.0];
        let draws = ProposalDraws {
            z: array![1.0],
            u: array![0.9],
        };

        let updater = DispersionUpdater::default();
        let result = updater
            .update(&counts, &nu, &mu, &delta0, &prop_var, &regression(1, array![10.0]), &draws)
            .unwrap();

        assert_eq!(result.accepted[0], 0.0);
        assert_eq!(result.values[0], 1.0);
    }

    #[test]
    fn test_proposal_below_floor_always_rejected() {
        let counts = CountMatrix::new(array![[3.0]], ids("gene", 1), ids("cell", 1)).unwrap();
        let nu = array![1.0];
        let mu = array![2.0];
        let delta0 = array![1.0];
        let prop_var = array![1.0];
        // collapse the proposal to ~e-20 with a u that passes any ratio
        let draws = ProposalDraws {
            z: array![-20.0],
            u: array![1e-300],
        };

        let updater = DispersionUpdater::default();
        let result = updater
            .update(&counts, &nu, &mu, &delta0, &prop_var, &regression(1, Array1::zeros(1)), &draws)
            .unwrap();

        assert_eq!(result.accepted[0], 0.0);
        assert_eq!(result.values[0], 1.0);
    }

    #[test]
    fn test_overflowing_proposal_is_counted() {
        let counts = CountMatrix::new(array![[3.0]], ids("gene", 1), ids("cell", 1)).unwrap();
        let nu = array![1.0];
        let mu = array![2.0];
        let delta0 = array![1.0];
        let prop_var = array![1.0];
        let draws = ProposalDraws {
            z: array![1000.0],
            u: array![0.5],
        };

        let updater = DispersionUpdater::default();
        let result = updater
            .update(&counts, &nu, &mu, &delta0, &prop_var, &regression(1, Array1::zeros(1)), &draws)
            .unwrap();

        assert_eq!(result.non_finite, 1);
        assert_eq!(result.accepted[0], 0.0);
        assert_eq!(result.values[0], 1.0);
    }

    #[test]
    fn test_observer_sees_every_gene_in_order() {
        let counts = CountMatrix::new(
            array![[0.0, 2.0], [1.0, 4.0], [3.0, 0.0]],
            ids("gene", 3),
            ids("cell", 2),
        )
        .unwrap();
        let nu = array![1.0, 1.1];
        let mu = array![1.0, 2.0, 0.5];
        let delta0 = array![0.5, 1.0, 2.0];
        let prop_var = array![0.3, 0.3, 0.3];
        let draws = ProposalDraws {
            z: array![0.8, -0.2, 0.1],
            u: array![0.4, 0.7, 0.2],
        };

        let updater = DispersionUpdater::default();
        let mut trace: Vec<(usize, bool)> = Vec::new();
        let result = updater
            .update_with_observer(
                &counts,
                &nu,
                &mu,
                &delta0,
                &prop_var,
                &regression(3, Array1::ones(3)),
                &draws,
                &mut |gene, accepted| trace.push((gene, accepted)),
            )
            .unwrap();

        assert_eq!(trace.len(), 3);
        for (i, &(gene, accepted)) in trace.iter().enumerate() {
            assert_eq!(gene, i);
            assert_eq!(accepted, result.accepted[i] == 1.0);
            if !accepted {
                assert_eq!(result.values[i], delta0[i]);
            }
        }
    }

    #[test]
    fn test_fixed_draws_are_bit_reproducible() {
        let counts = CountMatrix::new(
            array![[5.0, 0.0, 2.0], [1.0, 3.0, 8.0]],
            ids("gene", 2),
            ids("cell", 3),
        )
        .unwrap();
        let nu = array![0.9, 1.0, 1.2];
        let mu = array![2.0, 4.0];
        let delta0 = array![0.7, 1.3];
        let prop_var = array![0.4, 0.4];
        let draws = ProposalDraws {
            z: array![0.3, -1.2],
            u: array![0.45, 0.05],
        };

        let updater = DispersionUpdater::default();
        let reg = regression(2, Array1::ones(2));
        let a = updater
            .update(&counts, &nu, &mu, &delta0, &prop_var, &reg, &draws)
            .unwrap();
        let b = updater
            .update(&counts, &nu, &mu, &delta0, &prop_var, &reg, &draws)
            .unwrap();
        assert_eq!(a.values, b.values);
        assert_eq!(a.accepted, b.accepted);
        assert_eq!(a.non_finite, b.non_finite);
    }

    #[test]
    fn test_dimension_mismatch_fails_fast() {
        let counts = CountMatrix::new(array![[1.0], [1.0]], ids("gene", 2), ids("cell", 1)).unwrap();
        let updater = DispersionUpdater::default();
        let draws = ProposalDraws {
            z: array![0.0, 0.0],
            u: array![0.5, 0.5],
        };
        // mu has the wrong length
        let result = updater.update(
            &counts,
            &array![1.0],
            &array![1.0, 1.0, 1.0],
            &array![1.0, 1.0],
            &array![1.0, 1.0],
            &regression(2, Array1::zeros(2)),
            &draws,
        );
        assert!(matches!(result, Err(BasicsError::DimensionMismatch { .. })));
    }
}
