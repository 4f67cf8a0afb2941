//! Field containers for the mixed SCF variable.
//!
//! A [`FieldSet`] bundles the primary scalar field (the density or the
//! potential sampled on a discretized domain) with an optional auxiliary
//! field (the kinetic-energy density analog). Residuals between iterations
//! are `FieldSet`s as well. All arrays in one set share a single shape; the
//! auxiliary array is present iff the run enables it.

use nalgebra::DVector;
use rayon::prelude::*;

use crate::error::ScfError;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSet {
    primary: DVector<f64>,
    auxiliary: Option<DVector<f64>>,
}

impl FieldSet {
    /// Bundle a primary field with an optional auxiliary field.
    ///
    /// Rejects an auxiliary array whose shape differs from the primary's.
    pub fn new(primary: DVector<f64>, auxiliary: Option<DVector<f64>>) -> Result<Self, ScfError> {
        if let Some(aux) = &auxiliary {
            if aux.len() != primary.len() {
                return Err(ScfError::ShapeMismatch(format!(
                    "auxiliary field has {} samples, primary has {}",
                    aux.len(),
                    primary.len()
                )));
            }
        }
        Ok(FieldSet { primary, auxiliary })
    }

    /// A field set without an auxiliary array.
    pub fn primary_only(primary: DVector<f64>) -> Self {
        FieldSet {
            primary,
            auxiliary: None,
        }
    }

    pub fn primary(&self) -> &DVector<f64> {
        &self.primary
    }

    pub fn auxiliary(&self) -> Option<&DVector<f64>> {
        self.auxiliary.as_ref()
    }

    pub fn len(&self) -> usize {
        self.primary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    pub fn has_auxiliary(&self) -> bool {
        self.auxiliary.is_some()
    }

    /// Shape compatibility: same sample count and same auxiliary presence.
    pub fn compatible(&self, other: &FieldSet) -> bool {
        self.len() == other.len() && self.has_auxiliary() == other.has_auxiliary()
    }

    /// A zero field set with this set's shape.
    pub fn zeros_like(&self) -> FieldSet {
        FieldSet {
            primary: DVector::zeros(self.len()),
            auxiliary: self.auxiliary.as_ref().map(|aux| DVector::zeros(aux.len())),
        }
    }

    /// `self - other`, field by field.
    pub fn sub(&self, other: &FieldSet) -> FieldSet {
        debug_assert!(self.compatible(other));
        FieldSet {
            primary: &self.primary - &other.primary,
            auxiliary: match (&self.auxiliary, &other.auxiliary) {
                (Some(a), Some(b)) => Some(a - b),
                _ => None,
            },
        }
    }

    /// `self += a * x`, field by field.
    pub fn axpy(&mut self, a: f64, x: &FieldSet) {
        debug_assert!(self.compatible(x));
        self.primary.axpy(a, &x.primary, 1.0);
        if let (Some(own), Some(other)) = (&mut self.auxiliary, &x.auxiliary) {
            own.axpy(a, other, 1.0);
        }
    }

    /// Convex combination `alpha * new + (1 - alpha) * old`, field by field.
    pub fn lerp(new: &FieldSet, old: &FieldSet, alpha: f64) -> FieldSet {
        debug_assert!(new.compatible(old));
        FieldSet {
            primary: alpha * &new.primary + (1.0 - alpha) * &old.primary,
            auxiliary: match (&new.auxiliary, &old.auxiliary) {
                (Some(n), Some(o)) => Some(alpha * n + (1.0 - alpha) * o),
                _ => None,
            },
        }
    }
}

/// Weighted inner product of two field sets: the pointwise product summed
/// over every field, times the volume element `dv` of one sample. This is
/// the discrete form of integrating the product over the domain. When the
/// samples live on distributed partitions, this sum is the collective
/// reduction every participant must agree on before the scalar enters the
/// overlap matrix or a residual norm.
pub fn overlap(a: &FieldSet, b: &FieldSet, dv: f64) -> f64 {
    debug_assert!(a.compatible(b));
    let mut acc = dot(a.primary.as_slice(), b.primary.as_slice());
    if let (Some(x), Some(y)) = (&a.auxiliary, &b.auxiliary) {
        acc += dot(x.as_slice(), y.as_slice());
    }
    acc * dv
}

// Fixed partition size keeps the reduction order stable, so repeated runs
// produce bit-identical sums regardless of thread scheduling.
const REDUCTION_CHUNK: usize = 4096;

fn dot(a: &[f64], b: &[f64]) -> f64 {
    let partials: Vec<f64> = a
        .par_chunks(REDUCTION_CHUNK)
        .zip(b.par_chunks(REDUCTION_CHUNK))
        .map(|(x, y)| x.iter().zip(y).map(|(p, q)| p * q).sum::<f64>())
        .collect();
    partials.iter().sum()
}
