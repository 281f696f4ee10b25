//! Distribution-style surface over the discrete-time jump process.

use ndarray::{Array1, Array2, Array3, Array4, ArrayView3, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::discrete_markov::{check_state_shape, discrete_markov_log_prob, simulate_steps};
use crate::error::{Error, Result};
use crate::hazard::TransitionRates;
use crate::stoichiometry::Stoichiometry;

/// A stochastic process whose realisations are event-count tensors of shape
/// `[metapopulation, time, transition]`.
pub trait StochasticProcessModel {
    /// Draw `n` independent realisations, stacked along a new leading axis.
    ///
    /// The same `seed` always gives the same output.
    fn sample(&self, n: usize, seed: u64) -> Result<Array4<f64>>;

    /// Log probability of one realisation.
    fn log_prob(&self, events: ArrayView3<'_, f64>) -> Result<f64>;

    fn event_shape(&self) -> [usize; 3];

    fn batch_shape(&self) -> Vec<usize> {
        Vec::new()
    }
}

/// Everything needed to define a [`DiscreteTimeStateTransitionModel`].
#[derive(Debug, Clone)]
pub struct ModelConfig<F> {
    /// Hazards as a function of `(t, state)`, see [`TransitionRates`].
    pub transition_rates: F,
    pub stoichiometry: Stoichiometry,
    /// `[metapopulation, compartment]` occupancy at the first step.
    pub initial_state: Array2<f64>,
    /// Time of the first step.
    pub initial_step: f64,
    pub time_delta: f64,
    pub num_steps: usize,
    /// Also check that event tensors and the initial state hold whole counts.
    pub validate_args: bool,
}

/// Discrete-time Markov jump process for a state transition model.
#[derive(Debug, Clone)]
pub struct DiscreteTimeStateTransitionModel<F> {
    config: ModelConfig<F>,
}

impl<F: TransitionRates> DiscreteTimeStateTransitionModel<F> {
    pub fn new(config: ModelConfig<F>) -> Result<Self> {
        check_state_shape(&config.initial_state, &config.stoichiometry)?;
        if !(config.time_delta > 0.) || !config.time_delta.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "time_delta must be positive and finite, got {}",
                config.time_delta
            )));
        }
        if !config.initial_step.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "initial_step must be finite, got {}",
                config.initial_step
            )));
        }
        if config.num_steps == 0 {
            return Err(Error::InvalidConfig("num_steps must be at least 1".into()));
        }
        if config.validate_args {
            check_integral("initial state", config.initial_state.iter())?;
        }
        Ok(DiscreteTimeStateTransitionModel { config })
    }

    pub fn transition_rates(&self) -> &F {
        &self.config.transition_rates
    }

    pub fn stoichiometry(&self) -> &Stoichiometry {
        &self.config.stoichiometry
    }

    pub fn initial_state(&self) -> &Array2<f64> {
        &self.config.initial_state
    }

    pub fn initial_step(&self) -> f64 {
        self.config.initial_step
    }

    pub fn time_delta(&self) -> f64 {
        self.config.time_delta
    }

    pub fn num_steps(&self) -> usize {
        self.config.num_steps
    }

    /// Start time of every step.
    pub fn times(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.config.num_steps, |i| {
            self.config.initial_step + i as f64 * self.config.time_delta
        })
    }

    /// Draw one realisation using the caller's generator.
    pub fn sample_with_rng<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Array3<f64>> {
        let (_, events) = simulate_steps(
            &self.config.transition_rates,
            &self.config.initial_state,
            self.config.initial_step,
            self.config.num_steps,
            self.config.time_delta,
            &self.config.stoichiometry,
            rng,
        )?;
        Ok(events
            .permuted_axes([1, 0, 2])
            .as_standard_layout()
            .into_owned())
    }
}

impl<F: TransitionRates> StochasticProcessModel for DiscreteTimeStateTransitionModel<F> {
    fn sample(&self, n: usize, seed: u64) -> Result<Array4<f64>> {
        // One stream per replicate keeps the output independent of scheduling.
        let draws = (0..n)
            .into_par_iter()
            .map(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                rng.set_stream(i as u64);
                self.sample_with_rng(&mut rng)
            })
            .collect::<Result<Vec<_>>>()?;

        let [m, t, r] = self.event_shape();
        let mut out = Array4::zeros((n, m, t, r));
        for (mut slot, draw) in out.outer_iter_mut().zip(draws) {
            slot.assign(&draw);
        }
        Ok(out)
    }

    fn log_prob(&self, events: ArrayView3<'_, f64>) -> Result<f64> {
        let expected = self.event_shape();
        if events.shape() != &expected[..] {
            return Err(Error::ShapeMismatch {
                what: "events",
                expected: expected.to_vec(),
                found: events.shape().to_vec(),
            });
        }
        if self.config.validate_args {
            check_integral("events", events.iter())?;
        }
        discrete_markov_log_prob(
            events,
            &self.config.initial_state,
            self.config.initial_step,
            self.config.time_delta,
            &self.config.transition_rates,
            &self.config.stoichiometry,
        )
    }

    fn event_shape(&self) -> [usize; 3] {
        [
            self.config.initial_state.len_of(Axis(0)),
            self.config.num_steps,
            self.config.stoichiometry.num_transitions(),
        ]
    }
}

fn check_integral<'a>(what: &'static str, mut values: impl Iterator<Item = &'a f64>) -> Result<()> {
    match values.find(|v| v.fract() != 0.) {
        Some(&value) => Err(Error::NonIntegralCount { what, value }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hazard::ConstantRates;
    use ndarray::array;
    use pretty_assertions::assert_eq;

    fn si_model(validate_args: bool) -> DiscreteTimeStateTransitionModel<ConstantRates> {
        DiscreteTimeStateTransitionModel::new(ModelConfig {
            transition_rates: ConstantRates(array![0.1]),
            stoichiometry: Stoichiometry::from_rows(&[[-1, 1]]).unwrap(),
            initial_state: array![[100., 0.]],
            initial_step: 0.,
            time_delta: 1.,
            num_steps: 5,
            validate_args,
        })
        .unwrap()
    }

    #[test]
    fn shapes() {
        let model = si_model(false);
        assert_eq!(model.event_shape(), [1, 5, 1]);
        assert!(model.batch_shape().is_empty());
        assert_eq!(model.times(), array![0., 1., 2., 3., 4.]);
        let draws = model.sample(3, 1).unwrap();
        assert_eq!(draws.shape(), &[3, 1, 5, 1]);
    }

    #[test]
    fn replicates_differ_but_repeat() {
        let model = si_model(false);
        let a = model.sample(4, 42).unwrap();
        let b = model.sample(4, 42).unwrap();
        assert_eq!(a, b);
        assert!(a.outer_iter().any(|draw| draw != a.index_axis(Axis(0), 0)));
        assert_eq!(model.sample(0, 42).unwrap().shape(), &[0, 1, 5, 1]);
    }

    #[test]
    fn log_prob_checks_shape_and_integrality() {
        let model = si_model(true);
        let err = model.log_prob(Array3::zeros((1, 4, 1)).view()).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));

        let mut events = Array3::zeros((1, 5, 1));
        events[[0, 2, 0]] = 1.5;
        let err = model.log_prob(events.view()).unwrap_err();
        assert!(matches!(err, Error::NonIntegralCount { .. }));
    }

    #[test]
    fn rejects_bad_config() {
        let config = ModelConfig {
            transition_rates: ConstantRates(array![0.1]),
            stoichiometry: Stoichiometry::from_rows(&[[-1, 1]]).unwrap(),
            initial_state: array![[100., 0., 0.]],
            initial_step: 0.,
            time_delta: 1.,
            num_steps: 5,
            validate_args: false,
        };
        assert!(matches!(
            DiscreteTimeStateTransitionModel::new(config.clone()).unwrap_err(),
            Error::ShapeMismatch { .. }
        ));
        let config = ModelConfig {
            initial_state: array![[100., 0.]],
            time_delta: 0.,
            ..config
        };
        assert!(matches!(
            DiscreteTimeStateTransitionModel::new(config).unwrap_err(),
            Error::InvalidConfig(_)
        ));
    }
}
