//! Uncalibrated add/delete update for occult events.
//!
//! Each step either inserts a block of unobserved target events into one
//! `(metapopulation, time)` cell or removes a block from a cell that holds
//! some, and reports the Hastings correction for an outer
//! [`MetropolisHastings`](crate::MetropolisHastings) step.

use ndarray::{Array2, Array3};
use rand::Rng;

use crate::error::{Error, Result};
use crate::kernel::{KernelResults, MarkovTransitionKernel, TargetLogProb};
use crate::occult_proposal::{
    proposal_pair, AddOccultProposal, DelOccultProposal, OccultProposal, OccultUpdate,
};
use crate::stoichiometry::Stoichiometry;
use crate::topology::Topology;

/// Probability of choosing the delete branch when it is available.
const DELETE_PROBABILITY: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalBranch {
    Add,
    Delete,
}

impl ProposalBranch {
    fn reverse(self) -> Self {
        match self {
            ProposalBranch::Add => ProposalBranch::Delete,
            ProposalBranch::Delete => ProposalBranch::Add,
        }
    }

    /// Log probability of selecting `self` given whether a delete is possible.
    fn log_prob(self, can_delete: bool) -> f64 {
        match (self, can_delete) {
            (ProposalBranch::Delete, true) => DELETE_PROBABILITY.ln(),
            (ProposalBranch::Delete, false) => f64::NEG_INFINITY,
            (ProposalBranch::Add, true) => (1. - DELETE_PROBABILITY).ln(),
            (ProposalBranch::Add, false) => 0.,
        }
    }

    fn sign(self) -> f64 {
        match self {
            ProposalBranch::Add => 1.,
            ProposalBranch::Delete => -1.,
        }
    }
}

/// Settings for [`UncalibratedOccultUpdate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OccultOptions {
    /// Largest number of events added or removed in one step.
    pub n_max: u64,
    /// Half-open window `[lo, hi)` of time indices eligible for updates.
    pub t_range: Option<(usize, usize)>,
}

impl Default for OccultOptions {
    fn default() -> OccultOptions {
        OccultOptions {
            n_max: 10,
            t_range: None,
        }
    }
}

/// The move attempted in a step. Both fields are `None` after bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OccultStepInfo {
    pub branch: Option<ProposalBranch>,
    /// `None` also when the chosen branch had no feasible cell.
    pub update: Option<OccultUpdate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OccultKernelResults {
    pub log_acceptance_correction: f64,
    pub target_log_prob: f64,
    pub extra: OccultStepInfo,
}

impl KernelResults for OccultKernelResults {
    fn target_log_prob(&self) -> f64 {
        self.target_log_prob
    }

    fn log_acceptance_correction(&self) -> f64 {
        self.log_acceptance_correction
    }
}

/// Both proposals at one event tensor.
struct Proposals {
    add: AddOccultProposal,
    del: DelOccultProposal,
}

impl Proposals {
    /// Log probability of choosing `branch` and then drawing `update`.
    fn log_prob(&self, branch: ProposalBranch, update: &OccultUpdate) -> f64 {
        let select = branch.log_prob(!self.del.is_empty());
        let draw = match branch {
            ProposalBranch::Add => self.add.log_prob(update),
            ProposalBranch::Delete => self.del.log_prob(update),
        };
        select + draw
    }
}

/// Adds `sign * x_star` events at `(m, t, transition)`.
///
/// Fails instead of producing a negative count.
fn add_events(
    events: &Array3<f64>,
    update: &OccultUpdate,
    transition: usize,
    sign: f64,
) -> Result<Array3<f64>> {
    let index = [update.m, update.t, transition];
    let mut next = events.clone();
    let cell = next.get_mut(index).ok_or_else(|| Error::ShapeMismatch {
        what: "occult update",
        expected: events.shape().to_vec(),
        found: index.to_vec(),
    })?;
    *cell += sign * update.x_star as f64;
    if *cell < 0. {
        return Err(Error::NegativeEventCount {
            m: update.m,
            t: update.t,
            x: transition,
            value: *cell,
        });
    }
    Ok(next)
}

/// Markov kernel that adds or deletes occult events of one transition.
///
/// It is uncalibrated: every step returns the proposed state together with
/// its target log probability and the log acceptance correction, and leaves
/// the accept/reject decision to an outer Metropolis-Hastings step.
pub struct UncalibratedOccultUpdate<L> {
    target_log_prob_fn: L,
    topology: Topology,
    stoichiometry: Stoichiometry,
    initial_state: Array2<f64>,
    options: OccultOptions,
}

impl<L> UncalibratedOccultUpdate<L>
where
    L: TargetLogProb<Array3<f64>>,
{
    /// `initial_state` is the `[metapopulation, compartment]` occupancy that
    /// the event tensor is accumulated onto.
    pub fn new(
        target_log_prob_fn: L,
        topology: Topology,
        stoichiometry: Stoichiometry,
        initial_state: Array2<f64>,
        options: OccultOptions,
    ) -> Result<Self> {
        topology.validate(&stoichiometry)?;
        if options.n_max == 0 {
            return Err(Error::InvalidConfig("n_max must be at least 1".into()));
        }
        if initial_state.ncols() != stoichiometry.num_compartments() {
            return Err(Error::ShapeMismatch {
                what: "initial state",
                expected: vec![initial_state.nrows(), stoichiometry.num_compartments()],
                found: initial_state.shape().to_vec(),
            });
        }
        Ok(UncalibratedOccultUpdate {
            target_log_prob_fn,
            topology,
            stoichiometry,
            initial_state,
            options,
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn options(&self) -> &OccultOptions {
        &self.options
    }

    /// Add and delete proposals at `events`.
    fn proposals(&self, events: &Array3<f64>) -> Result<Proposals> {
        let (add, del) = proposal_pair(
            events.view(),
            self.initial_state.view(),
            &self.stoichiometry,
            &self.topology,
            self.options.n_max,
            self.options.t_range,
        )?;
        Ok(Proposals { add, del })
    }

    /// Applies `update` through `branch` to `current` and returns the new
    /// event tensor with its log acceptance correction,
    /// `ln q(next -> current) - ln q(current -> next)`.
    pub fn apply_update(
        &self,
        branch: ProposalBranch,
        current: &Array3<f64>,
        update: &OccultUpdate,
    ) -> Result<(Array3<f64>, f64)> {
        let forward = self.proposals(current)?;
        self.apply_with(branch, current, &forward, update)
    }

    fn apply_with(
        &self,
        branch: ProposalBranch,
        current: &Array3<f64>,
        forward: &Proposals,
        update: &OccultUpdate,
    ) -> Result<(Array3<f64>, f64)> {
        let next = add_events(current, update, self.topology.target, branch.sign())?;
        let reverse = self.proposals(&next)?;
        let q_fwd = forward.log_prob(branch, update);
        let q_rev = reverse.log_prob(branch.reverse(), update);
        Ok((next, q_rev - q_fwd))
    }

    fn target_log_prob(&self, events: &Array3<f64>) -> Result<f64> {
        Ok(self.target_log_prob_fn.log_prob(events)?)
    }
}

impl<L> MarkovTransitionKernel for UncalibratedOccultUpdate<L>
where
    L: TargetLogProb<Array3<f64>>,
{
    type State = Array3<f64>;
    type Results = OccultKernelResults;

    fn one_step<R: Rng + ?Sized>(
        &self,
        current_events: &Array3<f64>,
        _previous_results: &OccultKernelResults,
        rng: &mut R,
    ) -> Result<(Array3<f64>, OccultKernelResults)> {
        let forward = self.proposals(current_events)?;
        let u: f64 = rng.random();
        let branch = if u < DELETE_PROBABILITY && !forward.del.is_empty() {
            ProposalBranch::Delete
        } else {
            ProposalBranch::Add
        };

        let update = match branch {
            ProposalBranch::Add => forward.add.sample(rng),
            ProposalBranch::Delete => forward.del.sample(rng),
        };

        let (next_events, log_acceptance_correction) = match &update {
            Some(update) => self.apply_with(branch, current_events, &forward, update)?,
            None => (current_events.clone(), 0.),
        };
        let target_log_prob = self.target_log_prob(&next_events)?;

        tracing::trace!(
            ?branch,
            ?update,
            log_acceptance_correction,
            target_log_prob,
            "occult update proposed"
        );

        Ok((
            next_events,
            OccultKernelResults {
                log_acceptance_correction,
                target_log_prob,
                extra: OccultStepInfo {
                    branch: Some(branch),
                    update,
                },
            },
        ))
    }

    fn bootstrap_results(&self, init_state: &Array3<f64>) -> Result<OccultKernelResults> {
        let target_log_prob = self.target_log_prob(init_state)?;
        tracing::debug!(target_log_prob, "bootstrapped occult update");
        Ok(OccultKernelResults {
            log_acceptance_correction: 0.,
            target_log_prob,
            extra: OccultStepInfo::default(),
        })
    }

    fn is_calibrated(&self) -> bool {
        false
    }
}
