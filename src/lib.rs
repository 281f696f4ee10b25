//! Discrete-time stochastic compartmental models and MCMC updates for their
//! unobserved ("occult") transition events.
//!
//! [`DiscreteTimeStateTransitionModel`] simulates event-count trajectories
//! of a multi-population compartmental model and scores them exactly.
//! [`UncalibratedOccultUpdate`] proposes adding or deleting target events in
//! an event tensor, and [`MetropolisHastings`] turns those proposals into a
//! reversible Markov chain.

pub(crate) mod discrete_markov;
pub(crate) mod error;
pub(crate) mod hazard;
pub(crate) mod kernel;
pub(crate) mod math;
pub(crate) mod metropolis;
pub(crate) mod model;
pub(crate) mod occult_kernel;
pub(crate) mod occult_proposal;
pub(crate) mod stoichiometry;
pub(crate) mod topology;

pub use discrete_markov::{compute_state, discrete_markov_log_prob, discrete_markov_simulation};
pub use error::{Error, Result};
pub use hazard::{ConstantRates, TransitionRates};
pub use kernel::{KernelResults, MarkovTransitionKernel, TargetLogProb};
pub use metropolis::{MetropolisHastings, MetropolisResults};
pub use model::{DiscreteTimeStateTransitionModel, ModelConfig, StochasticProcessModel};
pub use occult_kernel::{
    OccultKernelResults, OccultOptions, OccultStepInfo, ProposalBranch, UncalibratedOccultUpdate,
};
pub use occult_proposal::{AddOccultProposal, DelOccultProposal, OccultProposal, OccultUpdate};
pub use stoichiometry::{transition_coords, Stoichiometry};
pub use topology::Topology;
