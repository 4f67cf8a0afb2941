//! Run configuration.
//!
//! [`MixingConfig`] is the validated configuration the engine consumes.
//! [`ScfSection`] and [`ModelSection`] are the YAML surface read by the demo
//! driver, with missing fields completed from the defaults; [`Args`] are the
//! command-line overrides.

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::ScfError;

/// Vector-extrapolation scheme for the outer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MixScheme {
    Plain,
    Pulay,
}

/// Which variable the loop mixes between iterations. Mixing densities
/// requires re-deriving the potential after every mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MixedVariable {
    Density,
    Potential,
}

/// Immutable per-run mixing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixingConfig {
    pub scheme: MixScheme,
    /// History depth H: how many past iterates are retained for
    /// extrapolation.
    pub history: usize,
    /// Weight of the newest iterate in plain mixing, in (0, 1].
    pub alpha: f64,
    /// Convergence threshold on |dE| between outer iterations.
    pub energy_tolerance: f64,
    /// Unconditional iteration cap.
    pub max_iterations: usize,
    pub mixed_variable: MixedVariable,
    /// Whether every field set of the run carries the auxiliary
    /// (kinetic-energy density) array.
    pub needs_auxiliary: bool,
    /// Volume element of one field sample, used by the inner products.
    pub volume_element: f64,
}

impl Default for MixingConfig {
    fn default() -> Self {
        MixingConfig {
            scheme: MixScheme::Pulay,
            history: 8,
            alpha: 0.5,
            energy_tolerance: 1e-6,
            max_iterations: 100,
            mixed_variable: MixedVariable::Density,
            needs_auxiliary: false,
            volume_element: 1.0,
        }
    }
}

impl MixingConfig {
    /// Reject out-of-range parameters before a run starts. Everything the
    /// loop later relies on (positive depth, a usable mixing fraction) is
    /// checked here, not per iteration.
    pub fn validate(&self) -> Result<(), ScfError> {
        if self.history < 1 {
            return Err(ScfError::InvalidConfig(
                "history depth must be at least 1".into(),
            ));
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(ScfError::InvalidConfig(
                "mixing fraction must lie in (0, 1]".into(),
            ));
        }
        if !(self.energy_tolerance > 0.0) {
            return Err(ScfError::InvalidConfig(
                "energy tolerance must be positive".into(),
            ));
        }
        if self.max_iterations < 1 {
            return Err(ScfError::InvalidConfig(
                "iteration cap must be at least 1".into(),
            ));
        }
        if !(self.volume_element > 0.0) {
            return Err(ScfError::InvalidConfig(
                "volume element must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// `scf:` section of a YAML run file. Every field is optional; gaps are
/// filled from [`MixingConfig::default`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScfSection {
    #[serde(default)]
    pub scheme: Option<MixScheme>,
    #[serde(default)]
    pub history: Option<usize>,
    #[serde(default)]
    pub alpha: Option<f64>,
    #[serde(default)]
    pub energy_tolerance: Option<f64>,
    #[serde(default)]
    pub max_iterations: Option<usize>,
    #[serde(default)]
    pub mixed_variable: Option<MixedVariable>,
    #[serde(default)]
    pub needs_auxiliary: Option<bool>,
    #[serde(default)]
    pub volume_element: Option<f64>,
}

impl ScfSection {
    /// Apply default values to any missing fields.
    pub fn into_config(self) -> MixingConfig {
        let defaults = MixingConfig::default();
        MixingConfig {
            scheme: self.scheme.unwrap_or(defaults.scheme),
            history: self.history.unwrap_or(defaults.history),
            alpha: self.alpha.unwrap_or(defaults.alpha),
            energy_tolerance: self.energy_tolerance.unwrap_or(defaults.energy_tolerance),
            max_iterations: self.max_iterations.unwrap_or(defaults.max_iterations),
            mixed_variable: self.mixed_variable.unwrap_or(defaults.mixed_variable),
            needs_auxiliary: self.needs_auxiliary.unwrap_or(defaults.needs_auxiliary),
            volume_element: self.volume_element.unwrap_or(defaults.volume_element),
        }
    }
}

/// `model:` section describing the synthetic linear-response problem run by
/// the demo driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    /// Number of field samples.
    #[serde(default = "default_samples")]
    pub samples: usize,
    /// Fixed-point value the samples relax towards.
    #[serde(default = "default_target")]
    pub target: f64,
    /// Initial sample value.
    #[serde(default)]
    pub initial: f64,
    /// Contraction factor the inner solve applies to the deviation from the
    /// fixed point.
    #[serde(default = "default_response")]
    pub response: f64,
    /// Spread of the contraction factor across samples; a nonzero value
    /// gives the residuals some structure for Pulay to work with.
    #[serde(default)]
    pub dispersion: f64,
    /// Energy at the fixed point.
    #[serde(default = "default_energy_floor")]
    pub energy_floor: f64,
}

fn default_samples() -> usize {
    64
}

fn default_target() -> f64 {
    1.0
}

fn default_response() -> f64 {
    0.25
}

fn default_energy_floor() -> f64 {
    -1.0
}

impl Default for ModelSection {
    fn default() -> Self {
        ModelSection {
            samples: default_samples(),
            target: default_target(),
            initial: 0.0,
            response: default_response(),
            dispersion: 0.0,
            energy_floor: default_energy_floor(),
        }
    }
}

/// Full YAML run description for the demo driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub scf: ScfSection,
}

/// Command-line arguments for the demo driver.
#[derive(Parser, Debug)]
#[command(name = "resmin")]
#[command(about = "Self-consistent field convergence engine", long_about = None)]
pub struct Args {
    /// Path to the YAML run file
    #[arg(short, long, default_value = "run.yaml")]
    pub config_file: String,

    /// Log output file (stdout when absent)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Mixing scheme, plain or pulay (overrides the run file)
    #[arg(long)]
    pub scheme: Option<String>,

    /// Mixing fraction in (0, 1] (overrides the run file)
    #[arg(long)]
    pub alpha: Option<f64>,

    /// History depth for extrapolation (overrides the run file)
    #[arg(long)]
    pub history: Option<usize>,

    /// Energy convergence threshold (overrides the run file)
    #[arg(long)]
    pub energy_tolerance: Option<f64>,

    /// Iteration cap (overrides the run file)
    #[arg(long)]
    pub max_iterations: Option<usize>,
}
