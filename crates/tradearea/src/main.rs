//! `tradearea` - CLI for trade-area analysis and site selection
//!
//! This binary provides the command-line interface for managing projects,
//! locations and trade areas, and for running the site-selection engine.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::io::Write;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use tradearea::cli::{config_command, App, Cli, Command};
use tradearea::{init_logging, Config, Storage};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let status = err
                .downcast_ref::<tradearea::Error>()
                .map(tradearea::Error::status_code);
            tracing::debug!(?status, "command failed");
            eprintln!("Error: {err:#}");
            // Client errors (bad input, missing or foreign entities) exit 2
            match status {
                Some(code) if (400..500).contains(&code) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone();
    let config = Config::load_from(config_path.clone()).with_context(|| match &config_path {
        Some(path) => format!("loading configuration from {}", path.display()),
        None => "loading configuration".to_string(),
    })?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    // Configuration commands work without a database
    if let Command::Config(cmd) = cli.command {
        config_command(&config, cmd, &mut out)?;
        out.flush()?;
        return Ok(());
    }

    let owner = cli.owner.unwrap_or_else(|| config.user.owner.clone());
    if owner.trim().is_empty() {
        anyhow::bail!("--owner must not be empty");
    }

    let db_path = config.database_path();
    let storage = Storage::open(&db_path)
        .with_context(|| format!("opening database at {}", db_path.display()))?;

    let app = App::new(config, storage, owner);
    app.execute(cli.command, &mut out)?;
    out.flush()?;
    Ok(())
}
