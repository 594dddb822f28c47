//! Run a Drynx survey on an in-process cluster described by a YAML simulation.

use clap::{Arg, ArgAction, Command};
use commonware_runtime::{tokio, Metrics, Runner};
use drynx_node::{cluster::Cluster, config::Simulation, Error};
use std::{path::PathBuf, process::ExitCode, str::FromStr};
use tracing::{error, info, Level};

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

fn main() -> ExitCode {
    let matches = Command::new("drynx")
        .version(crate_version())
        .about("Run a verifiable privacy-preserving survey over simulated computing, data provider, and verifying nodes.")
        .arg(
            Arg::new("config")
                .long("config")
                .required(true)
                .help("Path to YAML simulation file")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .default_value("info")
                .help("Maximum level of logs (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("metrics")
                .long("metrics")
                .action(ArgAction::SetTrue)
                .help("Print the metrics of every node once the survey completes"),
        )
        .get_matches();

    let level = matches
        .get_one::<String>("log-level")
        .map(|level| Level::from_str(level))
        .transpose();
    let level = match level {
        Ok(level) => level.unwrap_or(Level::INFO),
        Err(err) => {
            eprintln!("invalid log level: {err}");
            return ExitCode::from(2);
        }
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let Some(path) = matches.get_one::<PathBuf>("config") else {
        return ExitCode::from(2);
    };
    let simulation = match Simulation::load(path) {
        Ok(simulation) => simulation,
        Err(err) => {
            error!(?err, "failed to load simulation");
            return ExitCode::from(2);
        }
    };
    let print_metrics = matches.get_flag("metrics");

    let mut cfg = tokio::Config::new();
    if let Some(directory) = &simulation.storage {
        cfg = cfg.with_storage_directory(directory.clone());
    }
    let executor = tokio::Runner::new(cfg);
    let result = executor.start(|mut context| async move {
        let cluster = Cluster::start(&mut context, simulation.cluster(), |i, j| {
            simulation.source(i, j)
        })
        .await?;
        let query = simulation.query(&cluster)?;
        let mut querier = cluster
            .querier(context.with_label("querier"), "querier")
            .await?;
        let outcome = querier.execute(query).await?;
        if print_metrics {
            println!("{}", context.encode());
        }
        Ok::<_, Error>(outcome)
    });

    match result {
        Ok(outcome) => {
            for (group, output) in &outcome.groups {
                println!("{group}: {output:?}");
            }
            if let Some(block) = &outcome.block {
                info!(
                    survey_id = block.survey_id,
                    verdicts = block.bitmap.len(),
                    "survey verified"
                );
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(?err, "survey failed");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
