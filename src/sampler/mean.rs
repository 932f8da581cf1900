//! Metropolis-Hastings update of the gene-specific mean expression parameters
//! BASiCS equivalent: .muUpdateRegNoSpikes() in updatesRegNoSpikes.h
//!
//! The acceptance ratio combines three ingredients: the negative binomial
//! likelihood of the counts, the change in the dispersion regression
//! residuals (the dispersion prior depends on the means through the design
//! matrix, so proposing new means moves it), and the sum-of-log-means
//! identifiability constraint. The likelihood and regression terms are
//! accumulated per gene in parallel; the constrained genes are then
//! decided one at a time against a running sum, and the reference gene is
//! derived rather than sampled so the constraint holds exactly after every
//! call.

use ndarray::Array1;
use rayon::prelude::*;

use crate::data::CountMatrix;
use crate::error::{BasicsError, Result};
use crate::regression::{design_matrix, estimate_rbf_locations, RegressionState};
use crate::sampler::{
    check_len, decide, propose_log_normal, Decision, McmcUpdate, ProposalDraws, UpdateSettings,
};

/// Log-normal prior on the gene means.
#[derive(Debug, Clone)]
pub struct MeanPrior {
    /// Prior means of log(mu), one per gene
    pub mu_mu: Array1<f64>,
    /// Prior variance of log(mu), shared across genes
    pub s2_mu: f64,
}

/// The sum-of-log-means identifiability constraint.
///
/// Without it, the gene means and the cell scaling factors are jointly
/// scale-invariant. Constrained genes are accepted or rejected one at a
/// time, in the order given here, each against the running sum of the
/// already-decided genes; the reference gene's mean is then derived, not
/// sampled, so that the log-means of the constrained genes (reference
/// included) sum to `target` exactly after every call.
///
/// The order of `constrained` is part of the contract: permuting it
/// changes the trajectory of the running sum and can change which genes
/// are accepted.
#[derive(Debug, Clone)]
pub struct ConstraintSet {
    /// Genes subject to the constraint, in processing order. May include
    /// the reference gene, which is skipped inside the loop.
    pub constrained: Vec<usize>,
    /// Genes exempt from the constraint (relevant for a trimmed constraint)
    pub unconstrained: Vec<usize>,
    /// The gene whose mean is derived to close the constraint
    pub ref_gene: usize,
    /// Target value of the constrained log-mean sum
    pub target: f64,
}

impl ConstraintSet {
    pub(crate) fn validate(&self, q0: usize) -> Result<()> {
        if self.ref_gene >= q0 {
            return Err(BasicsError::InvalidConstraint {
                reason: format!("reference gene {} out of range for {} genes", self.ref_gene, q0),
            });
        }
        if !self.target.is_finite() {
            return Err(BasicsError::InvalidConstraint {
                reason: format!("constraint target must be finite, got {}", self.target),
            });
        }

        let mut membership = vec![0u8; q0];
        for &g in &self.constrained {
            if g >= q0 {
                return Err(BasicsError::InvalidConstraint {
                    reason: format!("constrained gene {} out of range for {} genes", g, q0),
                });
            }
            membership[g] += 1;
        }
        for &g in &self.unconstrained {
            if g >= q0 {
                return Err(BasicsError::InvalidConstraint {
                    reason: format!("unconstrained gene {} out of range for {} genes", g, q0),
                });
            }
            if g == self.ref_gene {
                return Err(BasicsError::InvalidConstraint {
                    reason: "the reference gene cannot be in the unconstrained set".to_string(),
                });
            }
            membership[g] += 1;
        }
        for (g, &count) in membership.iter().enumerate() {
            if g == self.ref_gene {
                // the reference gene may sit in the constrained set or in neither
                if count > 1 {
                    return Err(BasicsError::InvalidConstraint {
                        reason: format!("gene {} listed more than once", g),
                    });
                }
            } else if count != 1 {
                return Err(BasicsError::InvalidConstraint {
                    reason: format!(
                        "gene {} must belong to exactly one of the constrained or unconstrained sets",
                        g
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Metropolis-Hastings updater for the mean expression vector.
#[derive(Debug, Clone)]
pub struct MeanUpdater {
    pub prior: MeanPrior,
    pub constraint: ConstraintSet,
    /// Keep the basis locations fixed instead of re-estimating them from
    /// the proposed means
    pub fix_locations: bool,
    /// Basis placement mode when relocating: min/max grid vs quantile grid
    pub rbf_min_max: bool,
    pub settings: UpdateSettings,
}

impl MeanUpdater {
    /// Run one accept/reject sweep over all genes.
    ///
    /// `mu0` is the current state, `delta` the current dispersions,
    /// `regression` the regression nuisance parameters with the design
    /// matrix evaluated at `mu0`. `locations` holds the current basis
    /// centers and is overwritten in place when relocation is enabled.
    ///
    /// Returns the updated means and acceptance indicators; rejected genes
    /// keep a copy of their current value.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &self,
        counts: &CountMatrix,
        nu: &Array1<f64>,
        mu0: &Array1<f64>,
        delta: &Array1<f64>,
        prop_var: &Array1<f64>,
        regression: &RegressionState,
        locations: &mut Array1<f64>,
        draws: &ProposalDraws,
    ) -> Result<McmcUpdate> {
        let q0 = counts.n_genes();
        let n = counts.n_cells();

        self.settings.validate()?;
        check_len("nu", nu.len(), n)?;
        check_len("mu0", mu0.len(), q0)?;
        check_len("delta", delta.len(), q0)?;
        check_len("prop_var", prop_var.len(), q0)?;
        check_len("mu_mu", self.prior.mu_mu.len(), q0)?;
        check_len("draws", draws.len(), q0)?;
        self.constraint.validate(q0)?;
        regression.validate(q0)?;

        let ref_gene = self.constraint.ref_gene;
        let exponent = self.settings.exponent;

        // PROPOSAL STEP
        let mut mu1 = propose_log_normal(mu0, prop_var, &draws.z);

        // Likelihood contribution of the acceptance ratio. Identical for
        // every gene but the reference one, whose value is derived below;
        // each gene owns its own slot, so the sweep is data-parallel.
        let raw = counts.counts();
        let sum_by_cell = counts.sum_by_cell();
        let mut log_aux: Vec<f64> = (0..q0)
            .into_par_iter()
            .map(|i| {
                let mut acc = (mu1[i].ln() - mu0[i].ln()) * sum_by_cell[i];
                if i != ref_gene {
                    let inv_delta = 1.0 / delta[i];
                    for j in 0..n {
                        acc -= (raw[[i, j]] + inv_delta)
                            * ((nu[j] * mu1[i] + inv_delta) / (nu[j] * mu0[i] + inv_delta)).ln();
                    }
                }
                acc
            })
            .collect();

        // The dispersion prior couples the means to the regression: rebuild
        // the design matrix at the proposed means (relocating the basis
        // first unless held fixed) and adjust by the change in squared
        // regression residuals. The current-state term always reads the
        // design matrix supplied by the caller.
        if !self.fix_locations {
            let log_mu1 = mu1.mapv(f64::ln);
            *locations = estimate_rbf_locations(&log_mu1, regression.k, self.rbf_min_max)?;
        }
        let x_mu1 = design_matrix(regression.k, locations, &mu1, regression.variance)?;
        let fit1 = x_mu1.dot(&regression.beta);
        let fit0 = regression.x.dot(&regression.beta);
        for i in 0..q0 {
            let log_delta = delta[i].ln();
            log_aux[i] -= exponent * regression.lambda[i]
                * ((log_delta - fit1[i]).powi(2) - (log_delta - fit0[i]).powi(2))
                / (2.0 * regression.sigma2);
        }

        let mut accepted = Array1::zeros(q0);
        let mut non_finite = 0usize;

        // Constrained genes: a strictly serial fold. Each gene's prior
        // centering depends on the running sum of the already-decided
        // genes, so this region cannot run out of order.
        let mut sum_aux: f64 = self
            .constraint
            .constrained
            .iter()
            .map(|&g| mu0[g].ln())
            .sum::<f64>()
            - mu0[ref_gene].ln();

        for &i in &self.constraint.constrained {
            if i == ref_gene {
                continue;
            }
            let mut aux = 0.5 * (self.constraint.target - (sum_aux - mu0[i].ln()));
            aux += 0.5 * (self.prior.mu_mu[i] - self.prior.mu_mu[ref_gene]);
            log_aux[i] -= (exponent / self.prior.s2_mu) * (mu1[i].ln() - aux).powi(2);
            log_aux[i] += (exponent / self.prior.s2_mu) * (mu0[i].ln() - aux).powi(2);

            match decide(draws.u[i].ln(), log_aux[i], mu1[i], self.settings.mintol) {
                Decision::Accept => {
                    accepted[i] = 1.0;
                    sum_aux += mu1[i].ln() - mu0[i].ln();
                }
                Decision::Reject => {
                    mu1[i] = mu0[i];
                }
                Decision::NonFinite => {
                    non_finite += 1;
                    log::warn!(
                        "non-finite acceptance ratio updating mu for gene {}; \
                         consider additional data filtering",
                        i
                    );
                    mu1[i] = mu0[i];
                }
            }
        }

        // Reference gene: derived, not sampled. Closes the constraint
        // exactly, whatever was accepted above.
        accepted[ref_gene] = 1.0;
        mu1[ref_gene] = (self.constraint.target - sum_aux).exp();

        // Unconstrained genes: independent of the fold above; each worker
        // owns a disjoint slot, decisions are written back serially.
        let decisions: Vec<(usize, Decision)> = self
            .constraint
            .unconstrained
            .par_iter()
            .map(|&i| {
                let ratio = log_aux[i]
                    - (0.5 * exponent / self.prior.s2_mu)
                        * ((mu1[i].ln() - self.prior.mu_mu[i]).powi(2)
                            - (mu0[i].ln() - self.prior.mu_mu[i]).powi(2));
                (i, decide(draws.u[i].ln(), ratio, mu1[i], self.settings.mintol))
            })
            .collect();
        for (i, decision) in decisions {
            match decision {
                Decision::Accept => {
                    accepted[i] = 1.0;
                }
                Decision::Reject => {
                    mu1[i] = mu0[i];
                }
                Decision::NonFinite => {
                    non_finite += 1;
                    log::warn!(
                        "non-finite acceptance ratio updating mu for gene {}; \
                         consider additional data filtering",
                        i
                    );
                    mu1[i] = mu0[i];
                }
            }
        }

        let update = McmcUpdate {
            values: mu1,
            accepted,
            non_finite,
        };
        log::debug!(
            "mu update: accepted {}/{} genes ({} non-finite rejections)",
            update.accepted.sum() as usize,
            q0,
            non_finite
        );
        Ok(update)
    }
}
