//! Forward and reverse proposals for adding and deleting occult events.
//!
//! Both proposals draw a cell `(m, t)` and a count `x_star` in two stages:
//! `m` uniformly among metapopulations that have at least one feasible
//! cell, then `t` uniformly among the feasible times of `m`, then `x_star`
//! uniformly on `1..=bound[m, t]`. The bounds are exact, meaning a cell
//! admits `x` events iff the event tensor stays consistent with the initial
//! state after the move. This makes every add reachable by a delete from
//! the resulting state and vice versa.

use std::ops::Range;

use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, Axis};
use rand::Rng;

use crate::discrete_markov::{check_events, compute_state, residual_occupancy};
use crate::error::{Error, Result};
use crate::stoichiometry::Stoichiometry;
use crate::topology::Topology;

/// A move of `x_star` target events at metapopulation `m` and time `t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OccultUpdate {
    pub m: usize,
    pub t: usize,
    pub x_star: u64,
}

pub trait OccultProposal {
    /// Draw an update, or `None` if no cell admits a move.
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<OccultUpdate>;

    /// Log mass of drawing exactly `update`.
    fn log_prob(&self, update: &OccultUpdate) -> f64;

    fn is_empty(&self) -> bool;
}

/// Largest admissible count per cell plus the index of feasible cells.
#[derive(Debug, Clone)]
struct CellBounds {
    bounds: Array2<u64>,
    metapops: Vec<usize>,
    times: Vec<Vec<usize>>,
}

impl CellBounds {
    fn new(bounds: Array2<u64>) -> Self {
        let times: Vec<Vec<usize>> = bounds
            .outer_iter()
            .map(|row| {
                row.indexed_iter()
                    .filter(|(_, &b)| b > 0)
                    .map(|(t, _)| t)
                    .collect()
            })
            .collect();
        let metapops = times
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_empty())
            .map(|(m, _)| m)
            .collect();
        CellBounds {
            bounds,
            metapops,
            times,
        }
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<OccultUpdate> {
        if self.metapops.is_empty() {
            return None;
        }
        let m = self.metapops[rng.random_range(0..self.metapops.len())];
        let times = &self.times[m];
        let t = times[rng.random_range(0..times.len())];
        let x_star = rng.random_range(1..=self.bounds[[m, t]]);
        Some(OccultUpdate { m, t, x_star })
    }

    fn log_prob(&self, update: &OccultUpdate) -> f64 {
        let bound = match self.bounds.get((update.m, update.t)) {
            Some(&bound) => bound,
            None => return f64::NEG_INFINITY,
        };
        if update.x_star == 0 || update.x_star > bound {
            return f64::NEG_INFINITY;
        }
        -(self.metapops.len() as f64).ln()
            - (self.times[update.m].len() as f64).ln()
            - (bound as f64).ln()
    }
}

/// Resolves an optional `[lo, hi)` window over `num_steps` time indices.
pub(crate) fn time_window(t_range: Option<(usize, usize)>, num_steps: usize) -> Result<Range<usize>> {
    match t_range {
        None => Ok(0..num_steps),
        Some((lo, hi)) if lo < hi && hi <= num_steps => Ok(lo..hi),
        Some((lo, hi)) => Err(Error::InvalidConfig(format!(
            "time range [{lo}, {hi}) is empty or exceeds {num_steps} steps"
        ))),
    }
}

/// Running minimum from the last time index backwards, per metapopulation.
fn suffix_min(values: ArrayView2<'_, f64>) -> Array2<f64> {
    let mut out = values.to_owned();
    for mut row in out.outer_iter_mut() {
        let mut running = f64::INFINITY;
        for value in row.iter_mut().rev() {
            running = running.min(*value);
            *value = running;
        }
    }
    out
}

fn to_count(value: f64) -> u64 {
    // Saturates for an unconstrained (infinite) bound.
    value.max(0.).floor() as u64
}

fn check_inputs(
    events: ArrayView3<'_, f64>,
    initial_state: ArrayView2<'_, f64>,
    stoichiometry: &Stoichiometry,
    topology: &Topology,
) -> Result<()> {
    topology.validate(stoichiometry)?;
    if initial_state.ncols() != stoichiometry.num_compartments() {
        return Err(Error::ShapeMismatch {
            what: "initial state",
            expected: vec![initial_state.nrows(), stoichiometry.num_compartments()],
            found: initial_state.shape().to_vec(),
        });
    }
    check_events(events, initial_state.nrows(), stoichiometry.num_transitions())
}

/// Validates the inputs and returns the residual occupancy of `events`.
fn residuals(
    events: ArrayView3<'_, f64>,
    initial_state: ArrayView2<'_, f64>,
    stoichiometry: &Stoichiometry,
    topology: &Topology,
) -> Result<Array3<f64>> {
    check_inputs(events, initial_state, stoichiometry, topology)?;
    let state = compute_state(initial_state, events, stoichiometry);
    Ok(residual_occupancy(&state, events, stoichiometry))
}

/// Builds both proposals for `events` from a single pass over the state.
pub(crate) fn proposal_pair(
    events: ArrayView3<'_, f64>,
    initial_state: ArrayView2<'_, f64>,
    stoichiometry: &Stoichiometry,
    topology: &Topology,
    n_max: u64,
    t_range: Option<(usize, usize)>,
) -> Result<(AddOccultProposal, DelOccultProposal)> {
    let residual = residuals(events, initial_state, stoichiometry, topology)?;
    let window = time_window(t_range, events.len_of(Axis(1)))?;
    Ok((
        AddOccultProposal::from_residual(&residual, stoichiometry, topology, n_max, window.clone()),
        DelOccultProposal::from_residual(events, &residual, stoichiometry, topology, n_max, window),
    ))
}

/// Proposes inserting occult events of the target transition.
///
/// An add of `x` events at `(m, t)` removes `x` individuals from the source
/// compartment from step `t` onwards, so `x` is bounded by the smallest
/// number of source occupants that stay put over `t..T`.
#[derive(Debug, Clone)]
pub struct AddOccultProposal {
    cells: CellBounds,
}

impl AddOccultProposal {
    pub fn new(
        events: ArrayView3<'_, f64>,
        initial_state: ArrayView2<'_, f64>,
        stoichiometry: &Stoichiometry,
        topology: &Topology,
        n_max: u64,
        t_range: Option<(usize, usize)>,
    ) -> Result<Self> {
        let residual = residuals(events, initial_state, stoichiometry, topology)?;
        let window = time_window(t_range, events.len_of(Axis(1)))?;
        Ok(Self::from_residual(&residual, stoichiometry, topology, n_max, window))
    }

    fn from_residual(
        residual: &Array3<f64>,
        stoichiometry: &Stoichiometry,
        topology: &Topology,
        n_max: u64,
        window: Range<usize>,
    ) -> Self {
        let source = topology.source_compartment(stoichiometry);
        let slack = suffix_min(residual.slice(s![.., .., source]));

        let bounds = Array2::from_shape_fn(slack.dim(), |(m, t)| {
            if window.contains(&t) {
                to_count(slack[[m, t]]).min(n_max)
            } else {
                0
            }
        });
        AddOccultProposal {
            cells: CellBounds::new(bounds),
        }
    }

    pub fn bound(&self, m: usize, t: usize) -> u64 {
        self.cells.bounds[[m, t]]
    }
}

impl OccultProposal for AddOccultProposal {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<OccultUpdate> {
        self.cells.sample(rng)
    }

    fn log_prob(&self, update: &OccultUpdate) -> f64 {
        self.cells.log_prob(update)
    }

    fn is_empty(&self) -> bool {
        self.cells.metapops.is_empty()
    }
}

/// Proposes removing events of the target transition.
///
/// A delete of `x` events at `(m, t)` never removes more than the cell holds,
/// and since it takes `x` individuals out of the destination compartment
/// after step `t`, `x` is bounded by the destination occupants that stay put
/// over `t+1..T`.
#[derive(Debug, Clone)]
pub struct DelOccultProposal {
    cells: CellBounds,
}

impl DelOccultProposal {
    pub fn new(
        events: ArrayView3<'_, f64>,
        initial_state: ArrayView2<'_, f64>,
        stoichiometry: &Stoichiometry,
        topology: &Topology,
        n_max: u64,
        t_range: Option<(usize, usize)>,
    ) -> Result<Self> {
        let residual = residuals(events, initial_state, stoichiometry, topology)?;
        let window = time_window(t_range, events.len_of(Axis(1)))?;
        Ok(Self::from_residual(events, &residual, stoichiometry, topology, n_max, window))
    }

    fn from_residual(
        events: ArrayView3<'_, f64>,
        residual: &Array3<f64>,
        stoichiometry: &Stoichiometry,
        topology: &Topology,
        n_max: u64,
        window: Range<usize>,
    ) -> Self {
        let num_steps = events.len_of(Axis(1));
        let dest = topology.dest_compartment(stoichiometry);
        let slack = suffix_min(residual.slice(s![.., .., dest]));

        let bounds = Array2::from_shape_fn(slack.dim(), |(m, t)| {
            if !window.contains(&t) {
                return 0;
            }
            let later = if t + 1 < num_steps {
                to_count(slack[[m, t + 1]])
            } else {
                u64::MAX
            };
            to_count(events[[m, t, topology.target]])
                .min(later)
                .min(n_max)
        });
        DelOccultProposal {
            cells: CellBounds::new(bounds),
        }
    }

    pub fn bound(&self, m: usize, t: usize) -> u64 {
        self.cells.bounds[[m, t]]
    }
}

impl OccultProposal for DelOccultProposal {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<OccultUpdate> {
        self.cells.sample(rng)
    }

    fn log_prob(&self, update: &OccultUpdate) -> f64 {
        self.cells.log_prob(update)
    }

    fn is_empty(&self) -> bool {
        self.cells.metapops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array3};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sir() -> (Stoichiometry, Topology) {
        let stoich = Stoichiometry::from_rows(&[[-1, 1, 0], [0, -1, 1]]).unwrap();
        let topology = Topology::from_stoichiometry(&stoich, 1).unwrap();
        (stoich, topology)
    }

    #[test]
    fn add_bound_is_limited_by_future_source_occupancy() {
        let stoich = Stoichiometry::from_rows(&[[-1, 1, 0], [0, -1, 1]]).unwrap();
        let topology = Topology::from_stoichiometry(&stoich, 0).unwrap();
        // 4 susceptibles, 3 of them infected at step 1
        let init = array![[4., 0., 0.]];
        let events = array![[[0., 0.], [3., 0.], [0., 0.]]];
        let add = AddOccultProposal::new(events.view(), init.view(), &stoich, &topology, 10, None)
            .unwrap();
        assert_eq!(add.bound(0, 0), 1);
        assert_eq!(add.bound(0, 1), 1);
        assert_eq!(add.bound(0, 2), 1);

        let add = AddOccultProposal::new(events.view(), init.view(), &stoich, &topology, 10, Some((2, 3)))
            .unwrap();
        assert_eq!(add.bound(0, 0), 0);
        assert_eq!(add.bound(0, 2), 1);
    }

    #[test]
    fn delete_bound_is_limited_by_cell_and_destination() {
        let (stoich, topology) = sir();
        // Recoveries at steps 0 and 2; nobody leaves R
        let init = array![[0., 5., 0.]];
        let events = array![[[0., 2.], [0., 0.], [0., 3.]]];
        let del = DelOccultProposal::new(events.view(), init.view(), &stoich, &topology, 10, None)
            .unwrap();
        assert_eq!(del.bound(0, 0), 2);
        assert_eq!(del.bound(0, 1), 0);
        assert_eq!(del.bound(0, 2), 3);

        let del = DelOccultProposal::new(events.view(), init.view(), &stoich, &topology, 1, None)
            .unwrap();
        assert_eq!(del.bound(0, 2), 1);
    }

    #[test]
    fn delete_respects_downstream_departures() {
        let stoich = Stoichiometry::from_rows(&[[-1, 1, 0], [0, -1, 1]]).unwrap();
        let topology = Topology::from_stoichiometry(&stoich, 0).unwrap();
        // Both infections at step 0 recover at step 1, so neither can go.
        let init = array![[2., 0., 0.]];
        let events = array![[[2., 0.], [0., 2.]]];
        let del = DelOccultProposal::new(events.view(), init.view(), &stoich, &topology, 10, None)
            .unwrap();
        assert!(del.is_empty());
    }

    #[test]
    fn log_prob_is_two_stage_uniform() {
        let (stoich, topology) = sir();
        let init = array![[0., 4., 0.], [0., 0., 0.]];
        let events = Array3::zeros((2, 3, 2));
        let add = AddOccultProposal::new(events.view(), init.view(), &stoich, &topology, 3, None)
            .unwrap();
        let update = OccultUpdate { m: 0, t: 1, x_star: 2 };
        assert_abs_diff_eq!(add.log_prob(&update), -(3f64.ln() + 3f64.ln()), epsilon = 1e-12);
        // The second metapopulation has nobody to move
        assert_eq!(add.log_prob(&OccultUpdate { m: 1, t: 0, x_star: 1 }), f64::NEG_INFINITY);
        assert_eq!(add.log_prob(&OccultUpdate { m: 0, t: 0, x_star: 4 }), f64::NEG_INFINITY);
        assert_eq!(add.log_prob(&OccultUpdate { m: 0, t: 0, x_star: 0 }), f64::NEG_INFINITY);
    }

    #[test]
    fn pair_matches_separate_construction() {
        let (stoich, topology) = sir();
        let init = array![[3., 6., 0.], [1., 2., 4.]];
        let events = array![
            [[1., 2.], [0., 1.], [2., 0.], [0., 3.]],
            [[0., 1.], [1., 0.], [0., 2.], [0., 0.]]
        ];
        let window = Some((1, 4));
        let (add, del) =
            proposal_pair(events.view(), init.view(), &stoich, &topology, 2, window).unwrap();
        let lone_add =
            AddOccultProposal::new(events.view(), init.view(), &stoich, &topology, 2, window).unwrap();
        let lone_del =
            DelOccultProposal::new(events.view(), init.view(), &stoich, &topology, 2, window).unwrap();
        assert_eq!(add.cells.bounds, lone_add.cells.bounds);
        assert_eq!(del.cells.bounds, lone_del.cells.bounds);
        assert_eq!(del.bound(0, 3), 2);
        assert_eq!(del.bound(0, 0), 0);
    }

    #[test]
    fn rejects_bad_time_range() {
        let (stoich, topology) = sir();
        let init = array![[1., 1., 0.]];
        let events = Array3::zeros((1, 3, 2));
        for range in [(2, 2), (0, 4)] {
            let err = AddOccultProposal::new(events.view(), init.view(), &stoich, &topology, 3, Some(range))
                .unwrap_err();
            assert!(matches!(err, Error::InvalidConfig(_)));
        }
    }

    proptest! {
        #[test]
        fn samples_stay_within_bounds(seed in any::<u64>(), n_max in 1u64..6, counts in proptest::collection::vec(0u32..4, 6)) {
            let (stoich, topology) = sir();
            let init = array![[0., 24., 0.]];
            let mut events = Array3::zeros((1, 6, 2));
            for (t, &c) in counts.iter().enumerate() {
                events[[0, t, 1]] = c as f64;
            }
            let mut rng = ChaCha8Rng::seed_from_u64(seed);

            let add = AddOccultProposal::new(events.view(), init.view(), &stoich, &topology, n_max, None).unwrap();
            if let Some(update) = add.sample(&mut rng) {
                prop_assert!(update.x_star >= 1 && update.x_star <= n_max);
                prop_assert!(add.log_prob(&update).is_finite());
            }

            let del = DelOccultProposal::new(events.view(), init.view(), &stoich, &topology, n_max, None).unwrap();
            prop_assert_eq!(del.is_empty(), counts.iter().all(|&c| c == 0));
            if let Some(update) = del.sample(&mut rng) {
                prop_assert!(update.x_star >= 1 && update.x_star <= n_max);
                prop_assert!(update.x_star as f64 <= events[[update.m, update.t, 1]]);
                prop_assert!(del.log_prob(&update).is_finite());
            }
        }
    }
}
