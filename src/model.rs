//! Synthetic linear-response fixed-point problem.
//!
//! Stands in for the band-structure inner solver in the demo driver and the
//! end-to-end tests: the frozen solve pulls every sample towards a fixed
//! target with a per-sample contraction factor, and the energy is the
//! weighted squared deviation above a fixed floor. A nonzero dispersion
//! spreads the contraction factors so the residual directions change between
//! iterations, which gives Pulay extrapolation something to work with.

use nalgebra::DVector;

use crate::config::ModelSection;
use crate::error::ScfError;
use crate::field::{self, FieldSet};
use crate::scf::{InnerSolution, InnerSolver};

pub struct LinearResponseModel {
    target: FieldSet,
    response: DVector<f64>,
    energy_floor: f64,
    dv: f64,
    refreshes: usize,
}

impl LinearResponseModel {
    pub fn new(
        target: FieldSet,
        response: DVector<f64>,
        energy_floor: f64,
        dv: f64,
    ) -> Result<Self, ScfError> {
        if response.len() != target.len() {
            return Err(ScfError::ShapeMismatch(format!(
                "response has {} samples, target has {}",
                response.len(),
                target.len()
            )));
        }
        Ok(LinearResponseModel {
            target,
            response,
            energy_floor,
            dv,
            refreshes: 0,
        })
    }

    /// Build the model described by a run file's `model:` section.
    pub fn from_section(
        section: &ModelSection,
        needs_auxiliary: bool,
        dv: f64,
    ) -> Result<Self, ScfError> {
        let n = section.samples;
        if n == 0 {
            return Err(ScfError::InvalidConfig(
                "model needs at least one sample".into(),
            ));
        }
        let primary = DVector::from_element(n, section.target);
        let auxiliary = needs_auxiliary.then(|| DVector::from_element(n, section.target));
        let target = FieldSet::new(primary, auxiliary)?;

        let response = DVector::from_fn(n, |i, _| {
            if n == 1 {
                section.response
            } else {
                section.response + section.dispersion * (i as f64 / (n - 1) as f64 - 0.5)
            }
        });
        LinearResponseModel::new(target, response, section.energy_floor, dv)
    }

    /// The constant initial field matching a `model:` section.
    pub fn initial_field(
        section: &ModelSection,
        needs_auxiliary: bool,
    ) -> Result<FieldSet, ScfError> {
        let primary = DVector::from_element(section.samples, section.initial);
        let auxiliary =
            needs_auxiliary.then(|| DVector::from_element(section.samples, section.initial));
        FieldSet::new(primary, auxiliary)
    }

    /// How many times the density-to-potential refresh ran.
    pub fn refresh_count(&self) -> usize {
        self.refreshes
    }

    fn energy_of(&self, state: &FieldSet) -> f64 {
        let deviation = state.sub(&self.target);
        self.energy_floor + field::overlap(&deviation, &deviation, self.dv)
    }

    fn contract(&self, values: &DVector<f64>, target: &DVector<f64>) -> DVector<f64> {
        target + self.response.component_mul(&(values - target))
    }
}

impl InnerSolver for LinearResponseModel {
    fn solve(&mut self, frozen: &FieldSet) -> Result<InnerSolution, ScfError> {
        if !frozen.compatible(&self.target) {
            return Err(ScfError::ShapeMismatch(
                "input field does not match the model shape".into(),
            ));
        }
        let primary = self.contract(frozen.primary(), self.target.primary());
        let auxiliary = match (frozen.auxiliary(), self.target.auxiliary()) {
            (Some(values), Some(target)) => Some(self.contract(values, target)),
            _ => None,
        };
        Ok(InnerSolution {
            energy: self.energy_of(frozen),
            updated: FieldSet::new(primary, auxiliary)?,
        })
    }

    fn refresh_potential(&mut self, density: &FieldSet) -> Result<f64, ScfError> {
        self.refreshes += 1;
        Ok(self.energy_of(density))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn section() -> ModelSection {
        ModelSection {
            samples: 4,
            target: 2.0,
            initial: 0.0,
            response: 0.5,
            dispersion: 0.0,
            energy_floor: -1.0,
        }
    }

    #[test]
    fn solve_contracts_towards_the_target() {
        let mut model = LinearResponseModel::from_section(&section(), false, 1.0).unwrap();
        let frozen = LinearResponseModel::initial_field(&section(), false).unwrap();
        let solution = model.solve(&frozen).unwrap();
        // deviation -2 per sample, contracted by 0.5: updated = 2 - 1 = 1
        for v in solution.updated.primary().iter() {
            assert_relative_eq!(*v, 1.0);
        }
        // energy = floor + 4 * (-2)^2
        assert_relative_eq!(solution.energy, 15.0);
    }

    #[test]
    fn fixed_point_is_stationary_at_the_floor() {
        let sec = ModelSection {
            initial: 2.0,
            ..section()
        };
        let mut model = LinearResponseModel::from_section(&sec, false, 1.0).unwrap();
        let frozen = LinearResponseModel::initial_field(&sec, false).unwrap();
        let solution = model.solve(&frozen).unwrap();
        assert_eq!(solution.updated, frozen);
        assert_relative_eq!(solution.energy, -1.0);
    }

    #[test]
    fn dispersion_spreads_the_response_factors() {
        let sec = ModelSection {
            dispersion: 0.4,
            ..section()
        };
        let model = LinearResponseModel::from_section(&sec, false, 1.0).unwrap();
        assert_relative_eq!(model.response[0], 0.3);
        assert_relative_eq!(model.response[3], 0.7);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let mut model = LinearResponseModel::from_section(&section(), false, 1.0).unwrap();
        let wrong = FieldSet::primary_only(DVector::zeros(7));
        assert!(matches!(
            model.solve(&wrong),
            Err(ScfError::ShapeMismatch(_))
        ));
    }
}
