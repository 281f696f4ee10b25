use std::fmt::Debug;

use rand::Rng;

use crate::error::Result;

/// Unnormalized log density of the chain's target distribution.
///
/// Errors are propagated to the caller of the kernel unchanged.
pub trait TargetLogProb<S: ?Sized> {
    fn log_prob(&self, state: &S) -> anyhow::Result<f64>;
}

impl<S: ?Sized, F> TargetLogProb<S> for F
where
    F: Fn(&S) -> anyhow::Result<f64>,
{
    fn log_prob(&self, state: &S) -> anyhow::Result<f64> {
        self(state)
    }
}

/// What a Metropolis-Hastings wrapper needs from the results of a proposal.
pub trait KernelResults: Clone + Debug {
    fn target_log_prob(&self) -> f64;

    /// `ln q(reverse) - ln q(forward)` for the move that produced the state.
    fn log_acceptance_correction(&self) -> f64;
}

/// One step of a Markov chain: state and previous results in, new state and
/// results out.
///
/// Kernels hold no chain state of their own, so several chains can share a
/// kernel as long as each brings its own state and generator.
pub trait MarkovTransitionKernel {
    type State: Clone;
    type Results: Clone + Debug;

    fn one_step<R: Rng + ?Sized>(
        &self,
        current_state: &Self::State,
        previous_results: &Self::Results,
        rng: &mut R,
    ) -> Result<(Self::State, Self::Results)>;

    /// Results describing `init_state` before the first step.
    fn bootstrap_results(&self, init_state: &Self::State) -> Result<Self::Results>;

    /// Whether the kernel leaves its target invariant on its own, or only
    /// proposes moves for an outer accept/reject step.
    fn is_calibrated(&self) -> bool;
}
