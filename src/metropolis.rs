use rand::Rng;

use crate::error::Result;
use crate::kernel::{KernelResults, MarkovTransitionKernel};

#[derive(Debug, Clone)]
pub struct MetropolisResults<R> {
    /// Results of the state the chain is at after the step.
    pub accepted_results: R,
    pub proposed_results: R,
    pub is_accepted: bool,
    pub log_accept_ratio: f64,
}

impl<R: KernelResults> KernelResults for MetropolisResults<R> {
    fn target_log_prob(&self) -> f64 {
        self.accepted_results.target_log_prob()
    }

    fn log_acceptance_correction(&self) -> f64 {
        0.
    }
}

/// Accepts or rejects the moves of an uncalibrated kernel with probability
/// `min(1, exp(Δ log π + correction))`.
pub struct MetropolisHastings<K> {
    inner: K,
}

impl<K> MetropolisHastings<K>
where
    K: MarkovTransitionKernel,
    K::Results: KernelResults,
{
    pub fn new(inner: K) -> Self {
        if inner.is_calibrated() {
            tracing::warn!("wrapping an already calibrated kernel in Metropolis-Hastings");
        }
        MetropolisHastings { inner }
    }

    pub fn inner(&self) -> &K {
        &self.inner
    }
}

impl<K> MarkovTransitionKernel for MetropolisHastings<K>
where
    K: MarkovTransitionKernel,
    K::Results: KernelResults,
{
    type State = K::State;
    type Results = MetropolisResults<K::Results>;

    fn one_step<R: Rng + ?Sized>(
        &self,
        current_state: &Self::State,
        previous_results: &Self::Results,
        rng: &mut R,
    ) -> Result<(Self::State, Self::Results)> {
        let accepted = &previous_results.accepted_results;
        let (proposed_state, proposed_results) =
            self.inner.one_step(current_state, accepted, rng)?;

        let mut log_accept_ratio = proposed_results.target_log_prob() - accepted.target_log_prob()
            + proposed_results.log_acceptance_correction();
        if log_accept_ratio.is_nan() {
            log_accept_ratio = f64::NEG_INFINITY;
        }
        let log_uniform = rng.random::<f64>().ln();
        let is_accepted = log_uniform < log_accept_ratio;

        let (state, accepted_results) = if is_accepted {
            (proposed_state, proposed_results.clone())
        } else {
            (current_state.clone(), accepted.clone())
        };
        Ok((
            state,
            MetropolisResults {
                accepted_results,
                proposed_results,
                is_accepted,
                log_accept_ratio,
            },
        ))
    }

    fn bootstrap_results(&self, init_state: &Self::State) -> Result<Self::Results> {
        let results = self.inner.bootstrap_results(init_state)?;
        Ok(MetropolisResults {
            accepted_results: results.clone(),
            proposed_results: results,
            is_accepted: true,
            log_accept_ratio: 0.,
        })
    }

    fn is_calibrated(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occult_kernel::{OccultOptions, UncalibratedOccultUpdate};
    use crate::stoichiometry::Stoichiometry;
    use crate::topology::Topology;
    use ndarray::{array, Array3};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn impossible_states_are_rejected() {
        let stoich = Stoichiometry::from_rows(&[[-1, 1]]).unwrap();
        // Any occult at all is impossible under this target
        let target = |events: &Array3<f64>| -> anyhow::Result<f64> {
            Ok(if events.sum() > 0. { f64::NEG_INFINITY } else { 0. })
        };
        let inner = UncalibratedOccultUpdate::new(
            target,
            Topology::from_stoichiometry(&stoich, 0).unwrap(),
            stoich,
            array![[10., 0.]],
            OccultOptions::default(),
        )
        .unwrap();
        let kernel = MetropolisHastings::new(inner);
        assert!(kernel.is_calibrated());
        assert!(!kernel.inner().is_calibrated());

        let events = Array3::zeros((1, 3, 1));
        let mut results = kernel.bootstrap_results(&events).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        for _ in 0..20 {
            let (next, next_results) = kernel.one_step(&events, &results, &mut rng).unwrap();
            assert!(!next_results.is_accepted);
            assert_eq!(next, events);
            assert_eq!(next_results.target_log_prob(), 0.);
            results = next_results;
        }
    }
}
