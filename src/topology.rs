use crate::error::{Error, Result};
use crate::stoichiometry::Stoichiometry;

/// Which transition the occult update moves, and the transitions adjacent
/// to it in the compartment chain.
///
/// `prev` feeds the source compartment of `target` and `next` drains its
/// destination. Both are checked by [`Topology::validate`] and otherwise
/// descriptive: proposal bounds come from the occupancy of the source and
/// destination compartments, which already accounts for every transition
/// in or out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    pub prev: Option<usize>,
    pub target: usize,
    pub next: Option<usize>,
}

impl Topology {
    pub fn new(prev: Option<usize>, target: usize, next: Option<usize>) -> Self {
        Topology { prev, target, next }
    }

    /// Derives `prev` and `next` as the first transitions (in row order)
    /// into the source and out of the destination of `target`.
    pub fn from_stoichiometry(stoichiometry: &Stoichiometry, target: usize) -> Result<Self> {
        check_transition(stoichiometry, "target", target)?;
        let (source, dest) = stoichiometry.coords()[target];
        let prev = (0..stoichiometry.num_transitions()).find(|&r| stoichiometry.target(r) == source);
        let next = stoichiometry.outgoing(dest).first().copied();
        Ok(Topology { prev, target, next })
    }

    pub fn validate(&self, stoichiometry: &Stoichiometry) -> Result<()> {
        check_transition(stoichiometry, "target", self.target)?;
        let (source, dest) = stoichiometry.coords()[self.target];
        if let Some(prev) = self.prev {
            check_transition(stoichiometry, "prev", prev)?;
            if stoichiometry.target(prev) != source {
                return Err(Error::InvalidConfig(format!(
                    "transition {prev} does not feed compartment {source}, the source of transition {}",
                    self.target
                )));
            }
        }
        if let Some(next) = self.next {
            check_transition(stoichiometry, "next", next)?;
            if stoichiometry.source(next) != dest {
                return Err(Error::InvalidConfig(format!(
                    "transition {next} does not drain compartment {dest}, the destination of transition {}",
                    self.target
                )));
            }
        }
        Ok(())
    }

    /// Compartment that loses an individual per target event.
    pub fn source_compartment(&self, stoichiometry: &Stoichiometry) -> usize {
        stoichiometry.source(self.target)
    }

    /// Compartment that gains an individual per target event.
    pub fn dest_compartment(&self, stoichiometry: &Stoichiometry) -> usize {
        stoichiometry.target(self.target)
    }
}

fn check_transition(stoichiometry: &Stoichiometry, name: &str, index: usize) -> Result<()> {
    if index >= stoichiometry.num_transitions() {
        return Err(Error::InvalidConfig(format!(
            "{name} transition {index} out of range for {} transitions",
            stoichiometry.num_transitions()
        )));
    }
    Ok(())
}
