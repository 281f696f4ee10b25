//! Static description of the transitions of a compartmental model.
//!
//! Rows of the stoichiometry matrix are transitions and columns are
//! compartments. Every transition moves one individual out of exactly one
//! source compartment and into exactly one target compartment, so each row
//! holds a single `-1`, a single `+1` and zeros elsewhere.

use std::ops::IndexMut;

use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::error::{Error, Result};

/// The `(source, target)` compartment pair of every row of `stoichiometry`.
pub fn transition_coords(stoichiometry: ArrayView2<'_, i64>) -> Result<Vec<(usize, usize)>> {
    stoichiometry
        .rows()
        .into_iter()
        .enumerate()
        .map(|(row, values)| row_coords(row, values))
        .collect()
}

fn row_coords(row: usize, values: ArrayView1<'_, i64>) -> Result<(usize, usize)> {
    let mut source = None;
    let mut target = None;
    for (col, &value) in values.iter().enumerate() {
        match value {
            0 => {}
            -1 if source.is_none() => source = Some(col),
            1 if target.is_none() => target = Some(col),
            -1 | 1 => {
                return Err(Error::MalformedStoichiometry {
                    row,
                    reason: format!("more than one entry equal to {value}"),
                })
            }
            _ => {
                return Err(Error::MalformedStoichiometry {
                    row,
                    reason: format!("entry {value} in column {col} is not -1, 0 or 1"),
                })
            }
        }
    }
    match (source, target) {
        (Some(source), Some(target)) => Ok((source, target)),
        _ => Err(Error::MalformedStoichiometry {
            row,
            reason: "expected exactly one negative and one positive entry".into(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stoichiometry {
    matrix: Array2<i64>,
    coords: Vec<(usize, usize)>,
    outgoing: Vec<Vec<usize>>,
}

impl Stoichiometry {
    pub fn new(matrix: Array2<i64>) -> Result<Self> {
        if matrix.nrows() == 0 || matrix.ncols() < 2 {
            return Err(Error::ShapeMismatch {
                what: "stoichiometry",
                expected: vec![1, 2],
                found: matrix.shape().to_vec(),
            });
        }
        let coords = transition_coords(matrix.view())?;
        let mut outgoing = vec![Vec::new(); matrix.ncols()];
        for (transition, &(source, _)) in coords.iter().enumerate() {
            outgoing[source].push(transition);
        }
        Ok(Stoichiometry {
            matrix,
            coords,
            outgoing,
        })
    }

    pub fn from_rows<const C: usize>(rows: &[[i64; C]]) -> Result<Self> {
        let flat: Vec<i64> = rows.iter().flatten().copied().collect();
        let matrix = Array2::from_shape_vec((rows.len(), C), flat).map_err(|_| {
            Error::ShapeMismatch {
                what: "stoichiometry",
                expected: vec![rows.len(), C],
                found: vec![rows.len() * C],
            }
        })?;
        Self::new(matrix)
    }

    pub fn matrix(&self) -> ArrayView2<'_, i64> {
        self.matrix.view()
    }

    pub fn num_transitions(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn num_compartments(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn coords(&self) -> &[(usize, usize)] {
        &self.coords
    }

    pub fn source(&self, transition: usize) -> usize {
        self.coords[transition].0
    }

    pub fn target(&self, transition: usize) -> usize {
        self.coords[transition].1
    }

    /// Transitions that draw from `compartment`, in row order.
    pub fn outgoing(&self, compartment: usize) -> &[usize] {
        &self.outgoing[compartment]
    }

    /// Adds the effect of `counts` transitions (one entry per row) onto a
    /// single metapopulation's compartment vector.
    pub(crate) fn apply<'a, S>(&self, counts: impl IntoIterator<Item = &'a f64>, state: &mut S)
    where
        S: IndexMut<usize, Output = f64> + ?Sized,
    {
        for (&(source, target), &count) in self.coords.iter().zip(counts) {
            state[source] -= count;
            state[target] += count;
        }
    }
}
