//! Mixing strategies for the outer SCF loop.
//!
//! Two schemes are supported. Plain mixing takes a convex combination of the
//! newest and previous iterate. Pulay mixing (generalized DIIS) extrapolates
//! over the whole history window: it diagonalizes the residual-overlap
//! matrix, takes the eigenvector of the smallest eigenvalue as coefficients,
//! rescales them to unit sum, and combines the historical snapshots with
//! those weights, which minimizes the norm of the combined residual.

use nalgebra::DVector;
use tracing::{debug, warn};

use crate::config::{MixScheme, MixingConfig};
use crate::error::ScfError;
use crate::field::{self, FieldSet};
use crate::history::HistoryBuffer;
use crate::overlap::OverlapMatrix;

/// Relative tolerance below which the coefficient sum counts as zero.
const SUM_TOLERANCE: f64 = 1e-12;

/// Why Pulay mixing fell back to plain mixing for one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// The history window is not yet full; the extrapolation is not
    /// well-posed.
    PartialHistory,
    /// The overlap matrix is numerically singular or the coefficient sum
    /// vanished.
    DegenerateHistory,
}

/// Per-iteration mixing diagnostics, forwarded to the diagnostics sink and
/// never read back by the engine.
#[derive(Debug, Clone, Default)]
pub struct MixReport {
    /// Normalization constant of the Pulay coefficients (raw sum of the
    /// selected eigenvector's components).
    pub norm_constant: Option<f64>,
    /// Self-overlap of the newest residual, before extrapolation.
    pub residual_before: Option<f64>,
    /// Self-overlap of the extrapolated residual.
    pub residual_after: Option<f64>,
    /// Set when Pulay fell back to plain mixing this iteration.
    pub fallback: Option<Fallback>,
}

/// Mixing scheme selected per run, dispatched by the outer loop.
#[derive(Debug)]
pub enum Mixer {
    Plain(PlainMixer),
    Pulay(PulayMixer),
}

impl Mixer {
    pub fn from_config(config: &MixingConfig) -> Mixer {
        match config.scheme {
            MixScheme::Plain => Mixer::Plain(PlainMixer::new(config.alpha)),
            MixScheme::Pulay => Mixer::Pulay(PulayMixer::new(config.alpha, config.history)),
        }
    }
}

/// Linear mixing: `alpha * new + (1 - alpha) * old`, field by field. Pure,
/// with no history dependence.
#[derive(Debug, Clone, Copy)]
pub struct PlainMixer {
    alpha: f64,
}

impl PlainMixer {
    pub fn new(alpha: f64) -> Self {
        PlainMixer { alpha }
    }

    pub fn mix(&self, new: &FieldSet, old: &FieldSet) -> FieldSet {
        FieldSet::lerp(new, old, self.alpha)
    }
}

/// Pulay (DIIS) mixing over a bounded window of past iterates.
#[derive(Debug, Clone, Copy)]
pub struct PulayMixer {
    alpha: f64,
    depth: usize,
}

impl PulayMixer {
    pub fn new(alpha: f64, depth: usize) -> Self {
        PulayMixer { alpha, depth }
    }

    /// One Pulay step. `new` is the updated variable from the inner solve;
    /// the most recent history entry must hold the snapshot that solve
    /// started from. Appends the residual, refreshes the overlap matrix and
    /// either extrapolates or falls back to plain mixing (window not yet
    /// full, or degenerate history).
    pub fn mix(
        &self,
        new: &FieldSet,
        history: &mut HistoryBuffer,
        overlap_matrix: &mut OverlapMatrix,
        dv: f64,
    ) -> Result<(FieldSet, MixReport), ScfError> {
        let snapshot = history
            .latest()
            .map(|entry| entry.snapshot.clone())
            .ok_or_else(|| {
                ScfError::DegenerateHistory("pulay mixing invoked with empty history".into())
            })?;

        let residual = new.sub(&snapshot);
        history.attach_residual(residual);
        overlap_matrix.update(&history.residuals(), dv);
        let n = overlap_matrix.len();

        let mut report = MixReport {
            residual_before: Some(overlap_matrix.get(n - 1, n - 1)),
            ..MixReport::default()
        };

        // The extrapolation needs the full window, and at least two
        // residuals, to be well-posed; until then mix the two most recent
        // iterates linearly.
        if n < self.depth.max(2) {
            debug!(n, depth = self.depth, "history window not full, plain mixing");
            report.fallback = Some(Fallback::PartialHistory);
            return Ok((FieldSet::lerp(new, &snapshot, self.alpha), report));
        }

        match extrapolation_coefficients(overlap_matrix) {
            Some((coefficients, norm_constant)) => {
                report.norm_constant = Some(norm_constant);

                // c-weighted combination of the historical snapshots; the
                // combined residual is only reported, never applied.
                let mut mixed = snapshot.zeros_like();
                let mut combined = snapshot.zeros_like();
                for (j, entry) in history.entries().iter().enumerate() {
                    mixed.axpy(coefficients[j], &entry.snapshot);
                    if let Some(r) = entry.residual.as_ref() {
                        combined.axpy(coefficients[j], r);
                    }
                }
                report.residual_after = Some(field::overlap(&combined, &combined, dv));
                Ok((mixed, report))
            }
            None => {
                warn!("degenerate residual history, falling back to plain mixing");
                report.fallback = Some(Fallback::DegenerateHistory);
                Ok((FieldSet::lerp(new, &snapshot, self.alpha), report))
            }
        }
    }
}

/// Coefficients of the minimum-residual combination: the eigenvector of the
/// overlap matrix belonging to the smallest eigenvalue, rescaled so the
/// components sum to one. Returns the coefficients together with the raw
/// normalization constant, or `None` when the decomposition is unusable or
/// the sum is numerically zero.
pub(crate) fn extrapolation_coefficients(
    overlap_matrix: &OverlapMatrix,
) -> Option<(DVector<f64>, f64)> {
    let (eigenvalues, eigenvectors) = overlap_matrix.diagonalize();
    if !eigenvalues.iter().all(|v| v.is_finite()) {
        return None;
    }

    let raw = eigenvectors.column(0).into_owned();
    let norm_constant: f64 = raw.sum();
    let scale = raw.amax().max(1.0);
    if !norm_constant.is_finite() || norm_constant.abs() <= SUM_TOLERANCE * scale {
        return None;
    }
    Some((raw / norm_constant, norm_constant))
}
