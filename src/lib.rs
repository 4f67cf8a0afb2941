//! resmin: a self-consistent field convergence engine.
//!
//! Drives a field-dependent fixed-point problem to convergence with
//! history-based acceleration: plain (linear) mixing or generalized
//! Pulay/DIIS extrapolation over a bounded window of past iterates. The
//! expensive inner eigen-solve and the density-to-potential map are injected
//! through [`scf::InnerSolver`]; this crate owns only the
//! convergence-acceleration control logic.

pub mod config;
pub mod error;
pub mod field;
pub mod history;
pub mod mixing;
pub mod model;
pub mod overlap;
pub mod scf;

pub use config::{MixScheme, MixedVariable, MixingConfig};
pub use error::ScfError;
pub use field::FieldSet;
pub use scf::{DiagnosticsSink, InnerSolution, InnerSolver, ScfLoop, ScfOutcome};
