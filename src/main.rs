//! Demo driver: runs the synthetic linear-response problem through the
//! convergence engine from a YAML run description.

use clap::Parser;
use color_eyre::eyre::{eyre, Result, WrapErr};
use std::fs;
use std::fs::File;
use tracing::info;
use tracing_subscriber::{fmt::layer, layer::SubscriberExt, util::SubscriberInitExt, Registry};

use resmin::config::{Args, MixScheme, RunConfig};
use resmin::model::LinearResponseModel;
use resmin::scf::{ScfLoop, TracingSink};

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    setup_logging(args.output.as_deref())?;

    info!("Reading run description from: {}", args.config_file);
    let text = fs::read_to_string(&args.config_file)
        .wrap_err_with(|| format!("unable to read run file: {}", args.config_file))?;
    let run: RunConfig = serde_yml::from_str(&text).wrap_err("failed to parse run file")?;

    let mut config = run.scf.clone().into_config();
    if let Some(scheme) = args.scheme.as_deref() {
        config.scheme = match scheme {
            "plain" => MixScheme::Plain,
            "pulay" => MixScheme::Pulay,
            other => return Err(eyre!("unknown mixing scheme: {other}")),
        };
    }
    if let Some(alpha) = args.alpha {
        info!("Overriding alpha with: {}", alpha);
        config.alpha = alpha;
    }
    if let Some(history) = args.history {
        info!("Overriding history with: {}", history);
        config.history = history;
    }
    if let Some(tolerance) = args.energy_tolerance {
        info!("Overriding energy_tolerance with: {}", tolerance);
        config.energy_tolerance = tolerance;
    }
    if let Some(cap) = args.max_iterations {
        info!("Overriding max_iterations with: {}", cap);
        config.max_iterations = cap;
    }

    info!(
        "Mixing {:?} with {:?} scheme, alpha {}, history {}, cap {}",
        config.mixed_variable, config.scheme, config.alpha, config.history, config.max_iterations
    );

    let mut model = LinearResponseModel::from_section(&run.model, config.needs_auxiliary, config.volume_element)?;
    let initial = LinearResponseModel::initial_field(&run.model, config.needs_auxiliary)?;

    let mut scf = ScfLoop::new(config)?;
    let outcome = scf.run(initial, &mut model, &mut TracingSink)?;

    if outcome.converged {
        info!(
            "Converged in {} iterations, final energy {:.12}",
            outcome.iterations, outcome.energy
        );
    } else {
        info!(
            "Not converged after {} iterations, last energy {:.12}",
            outcome.iterations, outcome.energy
        );
    }
    Ok(())
}

/// Route the tracing log to a file or to stdout.
fn setup_logging(output: Option<&str>) -> Result<()> {
    match output {
        Some(path) => {
            let log = File::create(path)
                .wrap_err_with(|| format!("could not create output file: {path}"))?;
            Registry::default()
                .with(layer().with_writer(log).with_ansi(false))
                .init();
        }
        None => {
            Registry::default()
                .with(layer().with_writer(std::io::stdout))
                .init();
        }
    }
    Ok(())
}
