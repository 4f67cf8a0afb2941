//! Typed errors for the convergence engine.
//!
//! Exhausting the iteration budget is not an error: the loop reports it
//! through `ScfOutcome::converged` and still hands back the best field.

use std::fmt;

/// Errors surfaced by the engine.
#[derive(Debug)]
pub enum ScfError {
    /// The inner eigensolver failed. Fatal to the run; never retried here.
    InnerSolver(String),

    /// Pulay extrapolation met a numerically unusable history (singular
    /// overlap matrix or vanishing coefficient sum) in a context where no
    /// plain-mixing fallback applies.
    DegenerateHistory(String),

    /// Field shapes or auxiliary-field presence disagree with the run
    /// configuration.
    ShapeMismatch(String),

    /// A configuration parameter is out of range.
    InvalidConfig(String),
}

impl fmt::Display for ScfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InnerSolver(msg) => write!(f, "inner solver failed: {msg}"),
            Self::DegenerateHistory(msg) => write!(f, "degenerate mixing history: {msg}"),
            Self::ShapeMismatch(msg) => write!(f, "field shape mismatch: {msg}"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ScfError {}
