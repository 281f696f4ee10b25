use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed stoichiometry in row {row}: {reason}")]
    MalformedStoichiometry { row: usize, reason: String },

    #[error("shape mismatch for {what}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("transition rate function returned {value} at time {time}")]
    InvalidRate { time: f64, value: f64 },

    #[error("negative event count {value} at metapopulation {m}, time {t}, transition {x}")]
    NegativeEventCount {
        m: usize,
        t: usize,
        x: usize,
        value: f64,
    },

    #[error("compartment {compartment} of metapopulation {m} is negative ({value}) at time {t}")]
    NegativeState {
        m: usize,
        t: usize,
        compartment: usize,
        value: f64,
    },

    #[error("{what} holds the non-integral count {value}")]
    NonIntegralCount { what: &'static str, value: f64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failure inside a user supplied target log density.
    #[error(transparent)]
    TargetLogProb(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
