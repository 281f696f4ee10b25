//! Transition rates and their conversion into per-step event probabilities.

use ndarray::{Array1, Array2, ArrayView1};

use crate::error::{Error, Result};
use crate::stoichiometry::Stoichiometry;

/// Instantaneous transition hazards as a function of time and state.
///
/// `state` has shape `[metapopulation, compartment]`. The returned array
/// must broadcast to `[metapopulation, transition]`, so a `[1, transition]`
/// array applies the same rates to every metapopulation.
///
/// Implementations are called once per simulated or scored time step and
/// must be free of side effects.
pub trait TransitionRates: Sync {
    fn rates(&self, t: f64, state: &Array2<f64>) -> Array2<f64>;
}

impl<F> TransitionRates for F
where
    F: Fn(f64, &Array2<f64>) -> Array2<f64> + Sync,
{
    fn rates(&self, t: f64, state: &Array2<f64>) -> Array2<f64> {
        self(t, state)
    }
}

/// The same hazard for every metapopulation and time.
#[derive(Debug, Clone)]
pub struct ConstantRates(pub Array1<f64>);

impl TransitionRates for ConstantRates {
    fn rates(&self, _t: f64, _state: &Array2<f64>) -> Array2<f64> {
        self.0.clone().insert_axis(ndarray::Axis(0))
    }
}

/// Evaluates the hazards at `(t, state)` and broadcasts them to
/// `[metapopulation, transition]`.
pub(crate) fn evaluate_rates<F: TransitionRates + ?Sized>(
    hazard_fn: &F,
    t: f64,
    state: &Array2<f64>,
    num_transitions: usize,
) -> Result<Array2<f64>> {
    let rates = hazard_fn.rates(t, state);
    let shape = (state.nrows(), num_transitions);
    let rates = match rates.broadcast(shape) {
        Some(view) => view.to_owned(),
        None => {
            return Err(Error::ShapeMismatch {
                what: "transition rates",
                expected: vec![shape.0, shape.1],
                found: rates.shape().to_vec(),
            })
        }
    };
    if let Some(&value) = rates.iter().find(|v| v.is_nan()) {
        return Err(Error::InvalidRate { time: t, value });
    }
    Ok(rates)
}

/// Per-step event probabilities for one metapopulation.
///
/// Transitions leaving the same compartment compete: the compartment is
/// left with probability `1 - exp(-H dt)` where `H` is the sum of their
/// hazards, and a departing individual takes transition `j` with
/// probability `h_j / H`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StepProbabilities {
    /// Probability per transition.
    pub transition: Vec<f64>,
    /// Probability of staying put, per compartment.
    pub stay: Vec<f64>,
}

impl StepProbabilities {
    pub(crate) fn new(rates: ArrayView1<'_, f64>, time_delta: f64, stoich: &Stoichiometry) -> Self {
        let rates: Vec<f64> = rates.iter().map(|&rate| clamp_rate(rate)).collect();
        let mut transition = vec![0.; stoich.num_transitions()];
        let mut stay = vec![1.; stoich.num_compartments()];

        for (compartment, stay) in stay.iter_mut().enumerate() {
            let outgoing = stoich.outgoing(compartment);
            let total: f64 = outgoing.iter().map(|&j| rates[j]).sum();
            if outgoing.is_empty() || total <= 0. {
                continue;
            }
            let leave = departure_probability(total, time_delta);
            *stay = 1. - leave;
            let weights = split_weights(outgoing, &rates);
            let weight_sum: f64 = weights.iter().sum();
            for (&j, weight) in outgoing.iter().zip(weights) {
                transition[j] = leave * weight / weight_sum;
            }
        }

        StepProbabilities { transition, stay }
    }
}

/// Relative weights of the competing `outgoing` transitions, scaled by the
/// largest rate so that the sum stays finite. Infinite rates share the
/// departures among themselves.
fn split_weights(outgoing: &[usize], rates: &[f64]) -> Vec<f64> {
    let largest = outgoing.iter().map(|&j| rates[j]).fold(0., f64::max);
    outgoing
        .iter()
        .map(|&j| {
            if largest.is_infinite() {
                if rates[j].is_infinite() {
                    1.
                } else {
                    0.
                }
            } else {
                rates[j] / largest
            }
        })
        .collect()
}

fn clamp_rate(rate: f64) -> f64 {
    if rate < 0. {
        tracing::warn!(rate, "negative transition rate clamped to zero");
        0.
    } else {
        rate
    }
}

/// `1 - exp(-hazard * time_delta)`, clamped to `[0, 1]`.
pub(crate) fn departure_probability(hazard: f64, time_delta: f64) -> f64 {
    let p = -(-hazard * time_delta).exp_m1();
    if (0. ..=1.).contains(&p) {
        p
    } else {
        tracing::warn!(hazard, time_delta, p, "event probability clamped to [0, 1]");
        p.clamp(0., 1.)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn single_transition_matches_exponential() {
        let stoich = Stoichiometry::from_rows(&[[-1, 1]]).unwrap();
        let probs = StepProbabilities::new(array![0.1].view(), 1., &stoich);
        assert_abs_diff_eq!(probs.transition[0], 1. - (-0.1f64).exp(), epsilon = 1e-15);
        assert_abs_diff_eq!(probs.stay[0], (-0.1f64).exp(), epsilon = 1e-15);
        assert_eq!(probs.stay[1], 1.);
    }

    #[test]
    fn competing_transitions_split_departures() {
        let stoich = Stoichiometry::from_rows(&[[-1, 1, 0], [-1, 0, 1]]).unwrap();
        let probs = StepProbabilities::new(array![0.3, 0.1].view(), 0.5, &stoich);
        let leave = 1. - (-0.2f64).exp();
        assert_abs_diff_eq!(probs.transition[0], leave * 0.75, epsilon = 1e-15);
        assert_abs_diff_eq!(probs.transition[1], leave * 0.25, epsilon = 1e-15);
        assert_abs_diff_eq!(
            probs.transition.iter().sum::<f64>() + probs.stay[0],
            1.,
            epsilon = 1e-15
        );
    }

    #[test]
    fn zero_and_negative_rates_give_no_events() {
        let stoich = Stoichiometry::from_rows(&[[-1, 1, 0], [0, -1, 1]]).unwrap();
        let probs = StepProbabilities::new(array![0., -2.].view(), 1., &stoich);
        assert_eq!(probs.transition, vec![0., 0.]);
        assert_eq!(probs.stay, vec![1., 1., 1.]);
    }

    #[test]
    fn infinite_rates_take_every_departure() {
        let stoich = Stoichiometry::from_rows(&[[-1, 1]]).unwrap();
        let probs = StepProbabilities::new(array![f64::INFINITY].view(), 1., &stoich);
        assert_eq!(probs.transition, vec![1.]);
        assert_eq!(probs.stay, vec![0., 1.]);

        let stoich = Stoichiometry::from_rows(&[[-1, 1, 0], [-1, 0, 1]]).unwrap();
        let probs = StepProbabilities::new(array![f64::INFINITY, 1.].view(), 1., &stoich);
        assert_eq!(probs.transition, vec![1., 0.]);
        assert_eq!(probs.stay[0], 0.);

        // Finite rates whose sum overflows still split evenly
        let probs = StepProbabilities::new(array![f64::MAX, f64::MAX].view(), 1., &stoich);
        assert_eq!(probs.transition, vec![0.5, 0.5]);
        assert_eq!(probs.stay[0], 0.);
    }

    #[test]
    fn huge_hazard_saturates() {
        assert_eq!(departure_probability(1e308, 10.), 1.);
        assert_eq!(departure_probability(f64::INFINITY, 1.), 1.);
    }

    #[test]
    fn rates_broadcast_over_metapopulations() {
        let state = Array2::<f64>::zeros((3, 2));
        let rates = evaluate_rates(&ConstantRates(array![0.5]), 0., &state, 1).unwrap();
        assert_eq!(rates.shape(), &[3, 1]);

        let bad = |_t: f64, _s: &Array2<f64>| Array2::<f64>::zeros((2, 4));
        let err = evaluate_rates(&bad, 0., &state, 1).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));

        let nan = |_t: f64, _s: &Array2<f64>| array![[f64::NAN]];
        let err = evaluate_rates(&nan, 2., &state, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidRate { .. }));
    }
}
