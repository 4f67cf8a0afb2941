//! End-to-end runs through the public API.

use approx::assert_relative_eq;
use resmin::config::{MixScheme, ModelSection};
use resmin::model::LinearResponseModel;
use resmin::scf::NullSink;
use resmin::{MixingConfig, ScfLoop};

fn dispersive_section() -> ModelSection {
    ModelSection {
        samples: 48,
        target: 1.5,
        initial: -0.5,
        response: 0.3,
        dispersion: 0.4,
        energy_floor: -2.0,
    }
}

#[test]
fn plain_and_pulay_reach_the_same_fixed_point() {
    let section = dispersive_section();

    let mut outcomes = Vec::new();
    for scheme in [MixScheme::Plain, MixScheme::Pulay] {
        let config = MixingConfig {
            scheme,
            history: 4,
            alpha: 0.6,
            energy_tolerance: 1e-10,
            max_iterations: 300,
            ..MixingConfig::default()
        };
        let mut model = LinearResponseModel::from_section(&section, false, 1.0).unwrap();
        let initial = LinearResponseModel::initial_field(&section, false).unwrap();
        let mut scf = ScfLoop::new(config).unwrap();
        let outcome = scf.run(initial, &mut model, &mut NullSink).unwrap();
        assert!(outcome.converged);
        outcomes.push(outcome);
    }

    assert_relative_eq!(outcomes[0].energy, outcomes[1].energy, epsilon = 1e-6);
    for (a, b) in outcomes[0]
        .field
        .primary()
        .iter()
        .zip(outcomes[1].field.primary().iter())
    {
        assert_relative_eq!(a, b, epsilon = 1e-4);
    }
}

#[test]
fn identical_runs_are_deterministic() {
    let section = dispersive_section();
    let config = MixingConfig {
        scheme: MixScheme::Pulay,
        history: 3,
        alpha: 0.5,
        energy_tolerance: 1e-9,
        max_iterations: 200,
        ..MixingConfig::default()
    };

    let run = || {
        let mut model = LinearResponseModel::from_section(&section, false, 1.0).unwrap();
        let initial = LinearResponseModel::initial_field(&section, false).unwrap();
        let mut scf = ScfLoop::new(config.clone()).unwrap();
        scf.run(initial, &mut model, &mut NullSink).unwrap()
    };

    let first = run();
    let second = run();
    assert_eq!(first.iterations, second.iterations);
    assert_eq!(first.energy.to_bits(), second.energy.to_bits());
    assert_eq!(first.field, second.field);
}
