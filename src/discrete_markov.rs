//! Discrete-time Markov jump process: forward simulation and the matching
//! exact log likelihood.
//!
//! Both directions evaluate the hazards at the state reached at the start of
//! each step, convert them to step probabilities with
//! [`StepProbabilities`], and move individuals out of each compartment
//! according to a multinomial law over the competing outgoing transitions.

use itertools::izip;
use ndarray::{s, Array1, Array2, Array3, ArrayView2, ArrayView3, ArrayViewMut1, Axis};
use rand::Rng;
use rand_distr::{Binomial, Distribution};

use crate::error::{Error, Result};
use crate::hazard::{evaluate_rates, StepProbabilities, TransitionRates};
use crate::math::multinomial_log_pmf;
use crate::stoichiometry::Stoichiometry;

/// Number of steps of size `time_step` that start inside `[start, end)`.
pub(crate) fn num_steps(start: f64, end: f64, time_step: f64) -> Result<usize> {
    if !(time_step > 0.) || !time_step.is_finite() {
        return Err(Error::InvalidConfig(format!(
            "time step must be positive and finite, got {time_step}"
        )));
    }
    if !(end >= start) {
        return Err(Error::InvalidConfig(format!(
            "end time {end} precedes start time {start}"
        )));
    }
    // Tolerate rounding in `start + n * time_step`.
    Ok(((end - start) / time_step - 1e-9).ceil().max(0.) as usize)
}

pub(crate) fn check_state_shape(state: &Array2<f64>, stoich: &Stoichiometry) -> Result<()> {
    if state.ncols() != stoich.num_compartments() || state.nrows() == 0 {
        return Err(Error::ShapeMismatch {
            what: "initial state",
            expected: vec![state.nrows().max(1), stoich.num_compartments()],
            found: state.shape().to_vec(),
        });
    }
    if let Some(((m, c), &value)) = state.indexed_iter().find(|(_, v)| !(**v >= 0.)) {
        return Err(Error::NegativeState {
            m,
            t: 0,
            compartment: c,
            value,
        });
    }
    Ok(())
}

/// Splits `n` individuals among the transitions in `outgoing` by sequential
/// conditional binomial draws, so that the total never exceeds `n`.
fn thin<R: Rng + ?Sized>(
    n: f64,
    outgoing: &[usize],
    probs: &StepProbabilities,
    counts: &mut ArrayViewMut1<'_, f64>,
    rng: &mut R,
) -> Result<()> {
    let mut remaining = n.round() as u64;
    let mut mass = 1.;
    for &j in outgoing {
        if remaining == 0 {
            break;
        }
        let p = probs.transition[j];
        let conditional = if mass > 0. { (p / mass).clamp(0., 1.) } else { 0. };
        let dist = Binomial::new(remaining, conditional).map_err(|err| {
            Error::InvalidConfig(format!("binomial({remaining}, {conditional}): {err}"))
        })?;
        let k = dist.sample(rng);
        counts[j] = k as f64;
        remaining -= k;
        mass -= p;
    }
    Ok(())
}

/// Simulates one trajectory of the jump process.
///
/// Returns the start time of every step and the number of events per
/// `[time, metapopulation, transition]`.
pub fn discrete_markov_simulation<F, R>(
    hazard_fn: &F,
    state: &Array2<f64>,
    start: f64,
    end: f64,
    time_step: f64,
    stoichiometry: &Stoichiometry,
    rng: &mut R,
) -> Result<(Array1<f64>, Array3<f64>)>
where
    F: TransitionRates + ?Sized,
    R: Rng + ?Sized,
{
    let steps = num_steps(start, end, time_step)?;
    simulate_steps(hazard_fn, state, start, steps, time_step, stoichiometry, rng)
}

pub(crate) fn simulate_steps<F, R>(
    hazard_fn: &F,
    state: &Array2<f64>,
    start: f64,
    steps: usize,
    time_step: f64,
    stoichiometry: &Stoichiometry,
    rng: &mut R,
) -> Result<(Array1<f64>, Array3<f64>)>
where
    F: TransitionRates + ?Sized,
    R: Rng + ?Sized,
{
    check_state_shape(state, stoichiometry)?;
    let (num_meta, num_trans) = (state.nrows(), stoichiometry.num_transitions());
    tracing::debug!(steps, num_meta, num_trans, "simulating discrete markov process");

    let times = Array1::from_shape_fn(steps, |i| start + i as f64 * time_step);
    let mut events = Array3::zeros((steps, num_meta, num_trans));
    let mut state = state.clone();

    for (&t, mut step_events) in times.iter().zip(events.outer_iter_mut()) {
        let rates = evaluate_rates(hazard_fn, t, &state, num_trans)?;
        for (rates, mut counts, mut occupancy) in izip!(
            rates.outer_iter(),
            step_events.outer_iter_mut(),
            state.outer_iter_mut()
        ) {
            let probs = StepProbabilities::new(rates, time_step, stoichiometry);
            for (compartment, &n) in occupancy.iter().enumerate() {
                thin(n, stoichiometry.outgoing(compartment), &probs, &mut counts, rng)?;
            }
            stoichiometry.apply(counts.iter(), &mut occupancy);
        }
    }

    Ok((times, events))
}

/// Exact log probability of `events` (`[metapopulation, time, transition]`)
/// under the process that [`discrete_markov_simulation`] samples from.
///
/// The state is advanced with the given events rather than by resampling.
/// Event counts that overdraw a compartment give negative infinity;
/// negative counts are an error.
pub fn discrete_markov_log_prob<F>(
    events: ArrayView3<'_, f64>,
    init_state: &Array2<f64>,
    init_step: f64,
    time_delta: f64,
    hazard_fn: &F,
    stoichiometry: &Stoichiometry,
) -> Result<f64>
where
    F: TransitionRates + ?Sized,
{
    check_state_shape(init_state, stoichiometry)?;
    check_events(events, init_state.nrows(), stoichiometry.num_transitions())?;
    let num_trans = stoichiometry.num_transitions();

    let mut state = init_state.clone();
    let mut logp = 0.;
    let mut counts = vec![0.; num_trans];
    let mut probs_out = Vec::with_capacity(num_trans);

    for (step, step_events) in events.axis_iter(Axis(1)).enumerate() {
        let t = init_step + step as f64 * time_delta;
        let rates = evaluate_rates(hazard_fn, t, &state, num_trans)?;
        for (rates, observed, mut occupancy) in izip!(
            rates.outer_iter(),
            step_events.outer_iter(),
            state.outer_iter_mut()
        ) {
            let probs = StepProbabilities::new(rates, time_delta, stoichiometry);
            for (compartment, &n) in occupancy.iter().enumerate() {
                let outgoing = stoichiometry.outgoing(compartment);
                if outgoing.is_empty() {
                    continue;
                }
                counts.clear();
                probs_out.clear();
                counts.extend(outgoing.iter().map(|&j| observed[j]));
                probs_out.extend(outgoing.iter().map(|&j| probs.transition[j]));
                logp += multinomial_log_pmf(n, &counts, &probs_out, probs.stay[compartment]);
            }
            if logp == f64::NEG_INFINITY {
                return Ok(logp);
            }
            stoichiometry.apply(observed.iter(), &mut occupancy);
        }
    }
    Ok(logp)
}

pub(crate) fn check_events(
    events: ArrayView3<'_, f64>,
    num_meta: usize,
    num_trans: usize,
) -> Result<()> {
    let shape = events.shape();
    if shape[0] != num_meta || shape[2] != num_trans {
        return Err(Error::ShapeMismatch {
            what: "events",
            expected: vec![num_meta, shape[1], num_trans],
            found: shape.to_vec(),
        });
    }
    if let Some(((m, t, x), &value)) = events.indexed_iter().find(|(_, v)| !(**v >= 0.)) {
        return Err(Error::NegativeEventCount { m, t, x, value });
    }
    Ok(())
}

/// Compartment occupancy at the start of every step, `[metapopulation,
/// time, compartment]`, obtained by accumulating `events` onto
/// `initial_state`.
pub fn compute_state(
    initial_state: ArrayView2<'_, f64>,
    events: ArrayView3<'_, f64>,
    stoichiometry: &Stoichiometry,
) -> Array3<f64> {
    let (num_meta, num_steps, _) = events.dim();
    let mut state = Array3::zeros((num_meta, num_steps, stoichiometry.num_compartments()));
    for (mut trajectory, initial, meta_events) in izip!(
        state.outer_iter_mut(),
        initial_state.outer_iter(),
        events.outer_iter()
    ) {
        let mut current = initial.to_owned();
        for (mut slot, step_events) in trajectory.outer_iter_mut().zip(meta_events.outer_iter()) {
            slot.assign(&current);
            stoichiometry.apply(step_events.iter(), &mut current);
        }
    }
    state
}

/// Individuals of each compartment that do not leave during the step,
/// `[metapopulation, time, compartment]`.
pub(crate) fn residual_occupancy(
    state: &Array3<f64>,
    events: ArrayView3<'_, f64>,
    stoichiometry: &Stoichiometry,
) -> Array3<f64> {
    let mut residual = state.clone();
    for (&(source, _), transition_events) in stoichiometry
        .coords()
        .iter()
        .zip(events.axis_iter(Axis(2)))
    {
        let mut column = residual.slice_mut(s![.., .., source]);
        column -= &transition_events;
    }
    residual
}
