//! rust_basics: MCMC kernels for Bayesian normalization of single-cell counts
//!
//! This crate implements the adaptive Metropolis-Hastings updates of the
//! gene-specific mean expression (`mu`) and overdispersion (`delta`)
//! parameters of the BASiCS hierarchical negative binomial model, in the
//! regression / no-spikes variant: dispersion is predicted by a radial
//! basis function regression on mean expression, and the gene means obey a
//! sum-of-log-means identifiability constraint closed by a reference gene.
//!
//! The enclosing Gibbs sampler (cell scaling factors, technical noise,
//! regression hyper-parameters, burn-in and adaptation policy, chain
//! storage) lives outside this crate and drives the two updaters once per
//! iteration.
//!
//! # Example
//!
//! ```ignore
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//! use rust_basics::prelude::*;
//!
//! let mut rng = StdRng::seed_from_u64(42);
//! let draws = ProposalDraws::sample(counts.n_genes(), &mut rng);
//!
//! let mu_update = mean_updater.update(
//!     &counts, &nu, &mu, &delta, &prop_var_mu, &regression, &mut locations, &draws,
//! )?;
//!
//! let draws = ProposalDraws::sample(counts.n_genes(), &mut rng);
//! let delta_update = dispersion_updater.update(
//!     &counts, &nu, &mu_update.values, &delta, &prop_var_delta, &regression, &draws,
//! )?;
//! ```

pub mod data;
pub mod error;
pub mod regression;
pub mod sampler;
pub mod stats;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::data::CountMatrix;
    pub use crate::error::{BasicsError, Result};
    pub use crate::regression::{design_matrix, estimate_rbf_locations, RegressionState};
    pub use crate::sampler::{
        ConstraintSet, DispersionUpdater, McmcUpdate, MeanPrior, MeanUpdater, ProposalDraws,
        UpdateSettings,
    };
}
