//! Outer SCF loop.
//!
//! One iteration: solve the inner problem at a frozen Hamiltonian, check the
//! energy change against the threshold, snapshot the pre-update field, mix,
//! and (when mixing densities) re-derive the potential. The loop owns the
//! history buffer and the overlap matrix and mutates nothing else; all calls
//! into the collaborators are synchronous and the whole run is deterministic
//! for identical inputs.

use tracing::info;

use crate::config::{MixedVariable, MixingConfig};
use crate::error::ScfError;
use crate::field::FieldSet;
use crate::history::HistoryBuffer;
use crate::mixing::{MixReport, Mixer};
use crate::overlap::OverlapMatrix;

/// Result of one frozen-Hamiltonian inner solve: the total energy and the
/// updated field-determining quantity.
#[derive(Debug, Clone)]
pub struct InnerSolution {
    pub energy: f64,
    pub updated: FieldSet,
}

/// The external eigensolver driven by the outer loop.
///
/// `solve` runs with the Hamiltonian frozen at `frozen` (no field updates
/// may be triggered mid-call) and must be re-entrant across iterations. Its
/// failures propagate as failed runs; the loop never retries.
/// `refresh_potential` is the density-to-potential map, invoked only when
/// the loop mixes densities; it returns the energy of the refreshed state
/// for diagnostics.
pub trait InnerSolver {
    fn solve(&mut self, frozen: &FieldSet) -> Result<InnerSolution, ScfError>;
    fn refresh_potential(&mut self, density: &FieldSet) -> Result<f64, ScfError>;
}

/// Per-iteration record handed to the diagnostics sink. Write-only from the
/// loop's point of view.
#[derive(Debug, Clone)]
pub struct IterationRecord {
    pub iteration: usize,
    pub energy: f64,
    pub energy_prev: Option<f64>,
    pub delta: Option<f64>,
    pub mix: Option<MixReport>,
    /// Energy reported by the density-to-potential refresh after mixing;
    /// absent when the run mixes potentials or the iteration converged.
    pub refresh_energy: Option<f64>,
}

/// Injected collaborator receiving the per-iteration log.
pub trait DiagnosticsSink {
    fn record(&mut self, rec: &IterationRecord);
}

/// Sink that writes the per-iteration log through `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn record(&mut self, rec: &IterationRecord) {
        match (rec.energy_prev, rec.delta) {
            (Some(prev), Some(delta)) => info!(
                "SCF iter {:4}  Eprev {:.12}  dE {:+.3e}  Etot {:.12}",
                rec.iteration, prev, delta, rec.energy
            ),
            _ => info!("SCF iter {:4}  Etot {:.12}", rec.iteration, rec.energy),
        }
        if let Some(mix) = &rec.mix {
            if let Some(norm) = mix.norm_constant {
                info!(
                    "  pulay norm {:.6}  residual {:.3e} -> {:.3e}",
                    norm,
                    mix.residual_before.unwrap_or(0.0),
                    mix.residual_after.unwrap_or(0.0)
                );
            }
        }
        if let Some(refreshed) = rec.refresh_energy {
            info!("  refreshed potential, E {:.12}", refreshed);
        }
    }
}

/// Sink that drops everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn record(&mut self, _rec: &IterationRecord) {}
}

/// Outcome of a run: the best available field, whether the energy change
/// dropped below threshold, the iterations used, and the last energy.
#[derive(Debug, Clone)]
pub struct ScfOutcome {
    pub field: FieldSet,
    pub converged: bool,
    pub iterations: usize,
    pub energy: f64,
}

/// The outer fixed-point loop. Owns the mutable run state (current field,
/// history, overlap matrix); nothing external mutates it during a run.
#[derive(Debug)]
pub struct ScfLoop {
    config: MixingConfig,
    mixer: Mixer,
    history: HistoryBuffer,
    overlap: OverlapMatrix,
}

impl ScfLoop {
    /// Build a loop from a configuration, rejecting out-of-range parameters
    /// up front.
    pub fn new(config: MixingConfig) -> Result<Self, ScfError> {
        config.validate()?;
        Ok(ScfLoop {
            mixer: Mixer::from_config(&config),
            history: HistoryBuffer::new(config.history),
            overlap: OverlapMatrix::new(config.history),
            config,
        })
    }

    pub fn config(&self) -> &MixingConfig {
        &self.config
    }

    /// Drive the fixed-point problem to convergence.
    ///
    /// Stops when |dE| between consecutive iterations falls below the
    /// threshold (never on iteration 0, whose previous energy is undefined)
    /// or unconditionally once the iteration cap is reached, in which case
    /// `converged` is false and the best available field is returned.
    pub fn run(
        &mut self,
        initial: FieldSet,
        solver: &mut dyn InnerSolver,
        sink: &mut dyn DiagnosticsSink,
    ) -> Result<ScfOutcome, ScfError> {
        if initial.is_empty() {
            return Err(ScfError::InvalidConfig(
                "initial field has no samples".into(),
            ));
        }
        if initial.has_auxiliary() != self.config.needs_auxiliary {
            return Err(ScfError::ShapeMismatch(format!(
                "auxiliary field {} by the configuration but {} in the initial field",
                if self.config.needs_auxiliary { "required" } else { "disabled" },
                if initial.has_auxiliary() { "present" } else { "absent" },
            )));
        }

        self.history.clear();
        self.overlap.reset();

        let dv = self.config.volume_element;
        let mut field = initial;
        let mut energy_prev: Option<f64> = None;
        let mut energy = 0.0;
        let mut converged = false;
        let mut iterations = 0;

        for iteration in 0..self.config.max_iterations {
            // Hamiltonian frozen for the duration of the inner solve.
            let solution = solver.solve(&field)?;
            energy = solution.energy;
            iterations = iteration + 1;

            let delta = energy_prev.map(|prev| energy - prev);
            if let Some(d) = delta {
                if d.abs() < self.config.energy_tolerance {
                    sink.record(&IterationRecord {
                        iteration,
                        energy,
                        energy_prev,
                        delta,
                        mix: None,
                        refresh_energy: None,
                    });
                    info!(
                        "SCF converged (|dE| < {:e}) in {} iterations",
                        self.config.energy_tolerance, iterations
                    );
                    converged = true;
                    break;
                }
            }

            // Snapshot the pre-update field. A full buffer resets entirely
            // and the overlap matrix follows in lockstep.
            if self.history.push(field.clone()) {
                self.overlap.reset();
            }

            let (next, mix) = match &self.mixer {
                Mixer::Plain(plain) => {
                    (plain.mix(&solution.updated, &field), MixReport::default())
                }
                Mixer::Pulay(pulay) => {
                    pulay.mix(&solution.updated, &mut self.history, &mut self.overlap, dv)?
                }
            };
            field = next;
            let refresh_energy = if self.config.mixed_variable == MixedVariable::Density {
                Some(solver.refresh_potential(&field)?)
            } else {
                None
            };
            sink.record(&IterationRecord {
                iteration,
                energy,
                energy_prev,
                delta,
                mix: Some(mix),
                refresh_energy,
            });
            energy_prev = Some(energy);
        }

        if !converged {
            info!(
                "SCF stopped after {} iterations without meeting |dE| < {:e}",
                iterations, self.config.energy_tolerance
            );
        }

        Ok(ScfOutcome {
            field,
            converged,
            iterations,
            energy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MixScheme, ModelSection};
    use crate::model::LinearResponseModel;
    use approx::assert_relative_eq;

    #[derive(Default)]
    struct VecSink {
        records: Vec<IterationRecord>,
    }

    impl DiagnosticsSink for VecSink {
        fn record(&mut self, rec: &IterationRecord) {
            self.records.push(rec.clone());
        }
    }

    struct FailingSolver;

    impl InnerSolver for FailingSolver {
        fn solve(&mut self, _frozen: &FieldSet) -> Result<InnerSolution, ScfError> {
            Err(ScfError::InnerSolver("band minimizer diverged".into()))
        }

        fn refresh_potential(&mut self, _density: &FieldSet) -> Result<f64, ScfError> {
            Ok(0.0)
        }
    }

    fn geometric_section() -> ModelSection {
        ModelSection {
            samples: 8,
            target: 2.0,
            initial: 0.0,
            response: 0.0,
            dispersion: 0.0,
            energy_floor: -1.0,
        }
    }

    fn plain_config() -> MixingConfig {
        MixingConfig {
            scheme: MixScheme::Plain,
            history: 4,
            alpha: 0.5,
            energy_tolerance: 1e-6,
            max_iterations: 50,
            ..MixingConfig::default()
        }
    }

    #[test]
    fn plain_mixing_converges_geometrically_within_the_bound() {
        // With response 0 and alpha 0.5 the residual halves each iteration:
        // the run must finish within ceil(log2(r0 / eps)) iterations.
        let section = geometric_section();
        let config = plain_config();
        let mut model = LinearResponseModel::from_section(&section, false, 1.0).unwrap();
        let initial = LinearResponseModel::initial_field(&section, false).unwrap();

        let mut sink = VecSink::default();
        let mut scf = ScfLoop::new(config).unwrap();
        let outcome = scf.run(initial, &mut model, &mut sink).unwrap();

        let initial_residual = (8.0 * 4.0_f64).sqrt();
        let bound = (initial_residual / 1e-6).log2().ceil() as usize;
        assert!(outcome.converged);
        assert!(outcome.iterations <= bound);
        assert_relative_eq!(outcome.energy, -1.0, epsilon = 1e-6);

        // Iteration 0 has no previous energy and must not converge.
        assert!(sink.records[0].delta.is_none());
        assert!(sink.records.len() >= 2);
    }

    #[test]
    fn iteration_budget_of_one_reports_nonconvergence() {
        let section = geometric_section();
        let config = MixingConfig {
            max_iterations: 1,
            ..plain_config()
        };
        let mut model = LinearResponseModel::from_section(&section, false, 1.0).unwrap();
        let initial = LinearResponseModel::initial_field(&section, false).unwrap();

        let mut scf = ScfLoop::new(config).unwrap();
        let outcome = scf.run(initial, &mut model, &mut NullSink).unwrap();
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 1);
    }

    #[test]
    fn never_converges_on_iteration_zero() {
        // Starting exactly at the fixed point keeps the energy constant, so
        // the zero delta triggers convergence on iteration 1, not 0.
        let section = ModelSection {
            initial: 2.0,
            ..geometric_section()
        };
        let mut model = LinearResponseModel::from_section(&section, false, 1.0).unwrap();
        let initial = LinearResponseModel::initial_field(&section, false).unwrap();

        let mut scf = ScfLoop::new(plain_config()).unwrap();
        let outcome = scf.run(initial, &mut model, &mut NullSink).unwrap();
        assert!(outcome.converged);
        assert_eq!(outcome.iterations, 2);
    }

    #[test]
    fn pulay_run_converges_on_a_dispersive_model() {
        let section = ModelSection {
            samples: 32,
            target: 1.0,
            initial: 0.0,
            response: 0.25,
            dispersion: 0.3,
            energy_floor: -4.0,
        };
        let config = MixingConfig {
            scheme: MixScheme::Pulay,
            history: 3,
            alpha: 0.5,
            energy_tolerance: 1e-8,
            max_iterations: 200,
            ..MixingConfig::default()
        };
        let mut model = LinearResponseModel::from_section(&section, false, 1.0).unwrap();
        let initial = LinearResponseModel::initial_field(&section, false).unwrap();

        let mut scf = ScfLoop::new(config).unwrap();
        let outcome = scf.run(initial, &mut model, &mut NullSink).unwrap();
        assert!(outcome.converged);
        assert_relative_eq!(outcome.energy, -4.0, epsilon = 1e-6);
    }

    #[test]
    fn auxiliary_flag_mismatch_is_rejected_up_front() {
        let config = MixingConfig {
            needs_auxiliary: true,
            ..plain_config()
        };
        let section = geometric_section();
        let mut model = LinearResponseModel::from_section(&section, true, 1.0).unwrap();
        let initial = LinearResponseModel::initial_field(&section, false).unwrap();

        let mut scf = ScfLoop::new(config).unwrap();
        let result = scf.run(initial, &mut model, &mut NullSink);
        assert!(matches!(result, Err(ScfError::ShapeMismatch(_))));
    }

    #[test]
    fn auxiliary_field_is_carried_through_a_run() {
        let config = MixingConfig {
            needs_auxiliary: true,
            ..plain_config()
        };
        let section = geometric_section();
        let mut model = LinearResponseModel::from_section(&section, true, 1.0).unwrap();
        let initial = LinearResponseModel::initial_field(&section, true).unwrap();

        let mut scf = ScfLoop::new(config).unwrap();
        let outcome = scf.run(initial, &mut model, &mut NullSink).unwrap();
        assert!(outcome.converged);
        assert!(outcome.field.has_auxiliary());
    }

    #[test]
    fn density_mixing_refreshes_the_potential_each_iteration() {
        let section = geometric_section();
        let mut model = LinearResponseModel::from_section(&section, false, 1.0).unwrap();
        let initial = LinearResponseModel::initial_field(&section, false).unwrap();

        let mut scf = ScfLoop::new(plain_config()).unwrap();
        let outcome = scf.run(initial, &mut model, &mut NullSink).unwrap();
        // Every iteration except the converged one mixes and refreshes.
        assert_eq!(model.refresh_count(), outcome.iterations - 1);
    }

    #[test]
    fn refresh_energy_reaches_the_diagnostics_when_mixing_densities() {
        let section = geometric_section();
        let mut model = LinearResponseModel::from_section(&section, false, 1.0).unwrap();
        let initial = LinearResponseModel::initial_field(&section, false).unwrap();

        let mut sink = VecSink::default();
        let mut scf = ScfLoop::new(plain_config()).unwrap();
        let outcome = scf.run(initial, &mut model, &mut sink).unwrap();

        let (last, mixed_iterations) = sink.records.split_last().unwrap();
        assert!(outcome.converged);
        assert!(last.refresh_energy.is_none());
        for rec in mixed_iterations {
            // The refreshed state is the mixed field the next solve starts
            // from, so its energy lies below the pre-mix energy.
            let refreshed = rec.refresh_energy.unwrap();
            assert!(refreshed < rec.energy);
        }
    }

    #[test]
    fn potential_mixing_reports_no_refresh_energy() {
        let section = geometric_section();
        let config = MixingConfig {
            mixed_variable: MixedVariable::Potential,
            ..plain_config()
        };
        let mut model = LinearResponseModel::from_section(&section, false, 1.0).unwrap();
        let initial = LinearResponseModel::initial_field(&section, false).unwrap();

        let mut sink = VecSink::default();
        let mut scf = ScfLoop::new(config).unwrap();
        scf.run(initial, &mut model, &mut sink).unwrap();
        assert!(sink.records.iter().all(|rec| rec.refresh_energy.is_none()));
    }

    #[test]
    fn potential_mixing_skips_the_refresh() {
        let section = geometric_section();
        let config = MixingConfig {
            mixed_variable: MixedVariable::Potential,
            ..plain_config()
        };
        let mut model = LinearResponseModel::from_section(&section, false, 1.0).unwrap();
        let initial = LinearResponseModel::initial_field(&section, false).unwrap();

        let mut scf = ScfLoop::new(config).unwrap();
        scf.run(initial, &mut model, &mut NullSink).unwrap();
        assert_eq!(model.refresh_count(), 0);
    }

    #[test]
    fn inner_solver_failure_propagates() {
        let section = geometric_section();
        let initial = LinearResponseModel::initial_field(&section, false).unwrap();

        let mut scf = ScfLoop::new(plain_config()).unwrap();
        let result = scf.run(initial, &mut FailingSolver, &mut NullSink);
        assert!(matches!(result, Err(ScfError::InnerSolver(_))));
    }
}
