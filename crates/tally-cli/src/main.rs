//! `tally <scenario.json> [config.json]`
//!
//! Runs a scenario against the in-memory store and prints every
//! notification, then the final balances, as JSON lines on stdout.

mod logging;
mod scenario;

use std::{env, fs, process::ExitCode};

use tally_types::{EngineConfig, Result, TallyError, constants};

use crate::scenario::Scenario;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            tracing::warn!(failed, "Scenario finished with failed operations");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Returns the number of failed operations.
async fn run() -> Result<usize> {
    let mut args = env::args().skip(1);
    let scenario_path = args.next().ok_or_else(|| {
        TallyError::Configuration("usage: tally <scenario.json> [config.json]".into())
    })?;
    let config = match args.next() {
        Some(path) => EngineConfig::from_json_str(&read(&path)?)?,
        None => EngineConfig::default(),
    };
    logging::init_logging(&config.logging)?;
    tracing::info!(version = constants::VERSION, scenario = %scenario_path, "tally starting");

    let scenario = Scenario::from_json_str(&read(&scenario_path)?)?;
    let report = scenario::run(scenario, &config).await?;

    for notification in &report.notifications {
        println!("{}", serde_json::to_string(notification)?);
    }
    for balance in &report.balances {
        println!("{}", serde_json::to_string(balance)?);
    }
    Ok(report.failed)
}

fn read(path: &str) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|err| TallyError::Configuration(format!("cannot read {path}: {err}")))
}
