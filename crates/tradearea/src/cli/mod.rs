//! Command-line interface for tradearea.
//!
//! This module provides the CLI structure and command handlers for the
//! `tradearea` binary.

mod commands;
mod handlers;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    AlgorithmArg, AreaParamsArgs, AreaTypeArg, BoundsArgs, ConfigCommand, FormatArg, GeoCommand,
    GridCommand, HistoryCommand, LocationCommand, LocationTypeArg, OptimizeCommand, OutputFormat,
    PopulationCommand, ProjectCommand, RunsCommand, StatusCommand, TradeAreaCommand,
};
pub use handlers::{config_command, App};

/// tradearea - Trade-area analysis and retail site selection
///
/// Manage projects, store locations and trade areas, then choose new store
/// sites with a Huff gravity model over a population grid.
#[derive(Debug, Parser)]
#[command(name = "tradearea")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Act as this owner instead of the configured one
    #[arg(long, global = true, value_name = "NAME")]
    pub owner: Option<String>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show database status
    Status(StatusCommand),

    /// Manage projects
    #[command(subcommand)]
    Project(ProjectCommand),

    /// Manage store, competitor and POI locations
    #[command(subcommand)]
    Location(LocationCommand),

    /// Manage trade areas around locations
    #[command(subcommand)]
    TradeArea(TradeAreaCommand),

    /// Import and look up census population
    #[command(subcommand)]
    Population(PopulationCommand),

    /// Generate and summarize a demand grid
    Grid(GridCommand),

    /// Choose new store sites
    Optimize(OptimizeCommand),

    /// Learn from past store performance and recommend sites
    History(HistoryCommand),

    /// Geographic helpers: isochrones, radius demographics, distances and
    /// grid square codes
    #[command(subcommand)]
    Geo(GeoCommand),

    /// Browse stored analysis runs
    #[command(subcommand)]
    Runs(RunsCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        crate::logging::Verbosity::from_flags(self.verbose, self.quiet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn status_cli(verbose: u8, quiet: bool) -> Cli {
        Cli {
            config: None,
            owner: None,
            verbose,
            quiet,
            command: Command::Status(StatusCommand { json: false }),
        }
    }

    #[test]
    fn test_cli_name() {
        let cli = Cli::command();
        assert_eq!(cli.get_name(), "tradearea");
    }

    #[test]
    fn test_verbosity_levels() {
        use crate::logging::Verbosity;
        assert_eq!(status_cli(0, true).verbosity(), Verbosity::Quiet);
        assert_eq!(status_cli(0, false).verbosity(), Verbosity::Normal);
        assert_eq!(status_cli(1, false).verbosity(), Verbosity::Verbose);
        assert_eq!(status_cli(2, false).verbosity(), Verbosity::Trace);
        // Quiet wins over -v
        assert_eq!(status_cli(2, true).verbosity(), Verbosity::Quiet);
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_status() {
        let cli = Cli::try_parse_from(["tradearea", "status", "--json"]).unwrap();
        assert!(matches!(cli.command, Command::Status(StatusCommand { json: true })));
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from([
            "tradearea",
            "-c",
            "/custom/config.toml",
            "-v",
            "status",
            "--owner",
            "alice",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
        assert_eq!(cli.verbose, 1);
        assert_eq!(cli.owner.as_deref(), Some("alice"));
    }

    #[test]
    fn test_parse_project_create() {
        let cli = Cli::try_parse_from([
            "tradearea",
            "project",
            "create",
            "Shibuya",
            "--settings",
            r#"{"currency": "JPY"}"#,
        ])
        .unwrap();
        let Command::Project(ProjectCommand::Create { name, settings, .. }) = cli.command else {
            panic!("expected project create");
        };
        assert_eq!(name, "Shibuya");
        assert_eq!(settings.unwrap()["currency"], "JPY");
    }

    #[test]
    fn test_parse_project_rejects_non_object_settings() {
        let result =
            Cli::try_parse_from(["tradearea", "project", "create", "x", "--settings", "[1]"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_location_add_negative_coordinates() {
        let cli = Cli::try_parse_from([
            "tradearea",
            "location",
            "add",
            "--project",
            "1",
            "--name",
            "Lima",
            "--lat",
            "-12.05",
            "--lng",
            "-77.04",
            "--type",
            "competitor",
        ])
        .unwrap();
        let Command::Location(LocationCommand::Add {
            lat,
            lng,
            location_type,
            ..
        }) = cli.command
        else {
            panic!("expected location add");
        };
        assert_eq!(lat, -12.05);
        assert_eq!(lng, -77.04);
        assert_eq!(location_type, LocationTypeArg::Competitor);
    }

    #[test]
    fn test_parse_location_update_needs_both_coordinates() {
        let result =
            Cli::try_parse_from(["tradearea", "location", "update", "3", "--lat", "35.0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_trade_area_create() {
        let cli = Cli::try_parse_from([
            "tradearea",
            "trade-area",
            "create",
            "--location",
            "2",
            "--name",
            "10 min drive",
            "--type",
            "drive-time",
            "--minutes",
            "10",
        ])
        .unwrap();
        let Command::TradeArea(TradeAreaCommand::Create {
            area_type, params, ..
        }) = cli.command
        else {
            panic!("expected trade-area create");
        };
        assert_eq!(area_type, AreaTypeArg::DriveTime);
        assert_eq!(params.minutes, Some(10.0));
    }

    #[test]
    fn test_parse_trade_area_list_needs_scope() {
        assert!(Cli::try_parse_from(["tradearea", "trade-area", "list"]).is_err());
        assert!(Cli::try_parse_from([
            "tradearea",
            "trade-area",
            "list",
            "--location",
            "1",
            "--project",
            "1"
        ])
        .is_err());
        assert!(Cli::try_parse_from(["tradearea", "trade-area", "list", "--project", "1"]).is_ok());
    }

    #[test]
    fn test_parse_optimize() {
        let cli = Cli::try_parse_from([
            "tradearea",
            "optimize",
            "--project",
            "1",
            "--algorithm",
            "multi-scenario",
            "-n",
            "4",
            "--seed",
            "42",
            "--format",
            "json",
        ])
        .unwrap();
        let Command::Optimize(cmd) = cli.command else {
            panic!("expected optimize");
        };
        assert_eq!(cmd.algorithm, AlgorithmArg::MultiScenario);
        assert_eq!(cmd.stores, 4);
        assert_eq!(cmd.seed, Some(42));
        assert_eq!(cmd.output.format, OutputFormat::Json);
    }

    #[test]
    fn test_parse_optimize_defaults() {
        let cli = Cli::try_parse_from(["tradearea", "optimize", "-p", "1"]).unwrap();
        let Command::Optimize(cmd) = cli.command else {
            panic!("expected optimize");
        };
        assert_eq!(cmd.algorithm, AlgorithmArg::Greedy);
        assert_eq!(cmd.stores, 5);
        assert_eq!(cmd.output.format, OutputFormat::Plain);
    }

    #[test]
    fn test_parse_geo_distance() {
        let cli =
            Cli::try_parse_from([
            "tradearea",
            "geo",
            "distance",
            "--from",
            "35.68,139.70",
            "--to",
            "-12.05,-77.04",
        ])
                .unwrap();
        let Command::Geo(GeoCommand::Distance { from, to }) = cli.command else {
            panic!("expected geo distance");
        };
        assert_eq!(from.lat, 35.68);
        assert_eq!(to.lng, -77.04);
    }

    #[test]
    fn test_parse_geo_meshcode_level_range() {
        assert!(Cli::try_parse_from(["tradearea", "geo", "meshcode", "--at", "35.68,139.70", "-l", "5"]).is_ok());
        assert!(Cli::try_parse_from(["tradearea", "geo", "meshcode", "--at", "35.68,139.70", "-l", "6"]).is_err());
    }

    #[test]
    fn test_parse_config_validate() {
        let cli =
            Cli::try_parse_from(["tradearea", "config", "validate", "/tmp/config.toml"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Config(ConfigCommand::Validate { file: Some(_) })
        ));
    }
}
