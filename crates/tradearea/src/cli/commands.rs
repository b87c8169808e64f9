//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::geo::{Bounds, GeoPoint, Polygon};
use crate::model::{AreaType, LocationType};

/// Output format for commands that print data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Plain,
    /// Pretty-printed JSON
    Json,
}

/// Shared `--format` flag.
#[derive(Debug, Clone, Copy, Default, Args)]
pub struct FormatArg {
    /// Output format
    #[arg(short, long, value_enum, default_value = "plain")]
    pub format: OutputFormat,
}

/// Location type argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LocationTypeArg {
    /// One of your stores
    Store,
    /// A competitor's store
    Competitor,
    /// Any other point of interest
    Poi,
}

impl From<LocationTypeArg> for LocationType {
    fn from(arg: LocationTypeArg) -> Self {
        match arg {
            LocationTypeArg::Store => Self::Store,
            LocationTypeArg::Competitor => Self::Competitor,
            LocationTypeArg::Poi => Self::Poi,
        }
    }
}

/// Trade area type argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AreaTypeArg {
    /// Reachable within --minutes of driving
    DriveTime,
    /// Within --radius-km or --miles
    Distance,
    /// Explicit --geometry polygon
    Custom,
}

impl From<AreaTypeArg> for AreaType {
    fn from(arg: AreaTypeArg) -> Self {
        match arg {
            AreaTypeArg::DriveTime => Self::DriveTime,
            AreaTypeArg::Distance => Self::Distance,
            AreaTypeArg::Custom => Self::Custom,
        }
    }
}

/// Optimization algorithm argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AlgorithmArg {
    /// Greedy selection by incremental demand
    Greedy,
    /// Greedy start improved by swap local search
    Mip,
    /// Greedy selection measured against competitors
    Competitive,
    /// Compare the four standard scenarios
    MultiScenario,
}

impl AlgorithmArg {
    /// Name stored with the analysis run.
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Self::Greedy => "greedy",
            Self::Mip => "mip",
            Self::Competitive => "competitive",
            Self::MultiScenario => "multi_scenario",
        }
    }
}

/// Parse a JSON object argument.
///
/// # Errors
///
/// Returns a message when the text is not a JSON object.
pub fn parse_json_object(text: &str) -> std::result::Result<Value, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    if value.is_object() {
        Ok(value)
    } else {
        Err("expected a JSON object".to_string())
    }
}

/// Parse polygon vertices given as `[[lat, lng], ...]`.
///
/// # Errors
///
/// Returns a message for malformed JSON or fewer than three vertices.
pub fn parse_polygon(text: &str) -> std::result::Result<Polygon, String> {
    let pairs: Vec<[f64; 2]> = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let vertices = pairs
        .into_iter()
        .map(|[lat, lng]| GeoPoint { lat, lng })
        .collect();
    Polygon::new(vertices).map_err(|e| e.to_string())
}

/// Parse a point given as `lat,lng`.
///
/// # Errors
///
/// Returns a message for malformed numbers or out-of-range coordinates.
pub fn parse_point(text: &str) -> std::result::Result<GeoPoint, String> {
    let (lat, lng) = text
        .split_once(',')
        .ok_or_else(|| "expected LAT,LNG".to_string())?;
    let lat: f64 = lat.trim().parse().map_err(|e| format!("latitude: {e}"))?;
    let lng: f64 = lng.trim().parse().map_err(|e| format!("longitude: {e}"))?;
    GeoPoint::new(lat, lng).map_err(|e| e.to_string())
}

/// Optional bounding box flags.
#[derive(Debug, Clone, Default, Args)]
pub struct BoundsArgs {
    /// Northern latitude of the study area
    #[arg(long, allow_hyphen_values = true)]
    pub north: Option<f64>,

    /// Southern latitude of the study area
    #[arg(long, allow_hyphen_values = true)]
    pub south: Option<f64>,

    /// Eastern longitude of the study area
    #[arg(long, allow_hyphen_values = true)]
    pub east: Option<f64>,

    /// Western longitude of the study area
    #[arg(long, allow_hyphen_values = true)]
    pub west: Option<f64>,
}

impl BoundsArgs {
    /// The box, if all four edges were given.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBounds`] when only some edges are given or
    /// the box is invalid.
    pub fn to_bounds(&self) -> Result<Option<Bounds>> {
        match (self.north, self.south, self.east, self.west) {
            (None, None, None, None) => Ok(None),
            (Some(n), Some(s), Some(e), Some(w)) => Bounds::new(n, s, e, w).map(Some),
            _ => Err(Error::InvalidBounds(
                "give all of --north, --south, --east and --west, or none".to_string(),
            )),
        }
    }
}

/// Flags describing a trade area's extent.
#[derive(Debug, Clone, Default, Args)]
pub struct AreaParamsArgs {
    /// Radius in kilometres (distance areas)
    #[arg(long)]
    pub radius_km: Option<f64>,

    /// Radius in miles (distance areas)
    #[arg(long)]
    pub miles: Option<f64>,

    /// Drive time in minutes (drive-time areas)
    #[arg(long)]
    pub minutes: Option<f64>,

    /// Polygon vertices as JSON `[[lat, lng], ...]` (custom areas)
    #[arg(long, value_parser = parse_polygon)]
    pub geometry: Option<Polygon>,
}

impl AreaParamsArgs {
    /// Parameters object from the numeric flags, or `None` when none were
    /// given.
    #[must_use]
    pub fn parameters(&self) -> Option<Value> {
        let mut map = Map::new();
        if let Some(v) = self.radius_km {
            map.insert("radius_km".to_string(), json!(v));
        }
        if let Some(v) = self.miles {
            map.insert("miles".to_string(), json!(v));
        }
        if let Some(v) = self.minutes {
            map.insert("minutes".to_string(), json!(v));
        }
        (!map.is_empty()).then_some(Value::Object(map))
    }
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Project commands.
#[derive(Debug, Subcommand)]
pub enum ProjectCommand {
    /// Create a project
    Create {
        /// Project name, unique among your projects
        name: String,

        /// Description
        #[arg(short, long)]
        description: Option<String>,

        /// Settings as a JSON object
        #[arg(long, value_parser = parse_json_object)]
        settings: Option<Value>,

        #[command(flatten)]
        output: FormatArg,
    },

    /// List your projects, newest first
    List {
        #[command(flatten)]
        output: FormatArg,
    },

    /// Show one project
    Show {
        /// Project id
        id: i64,

        #[command(flatten)]
        output: FormatArg,
    },

    /// Update a project
    Update {
        /// Project id
        id: i64,

        /// New name
        #[arg(long)]
        name: Option<String>,

        /// New description; pass "" to clear it
        #[arg(short, long)]
        description: Option<String>,

        /// Replacement settings JSON object
        #[arg(long, value_parser = parse_json_object)]
        settings: Option<Value>,

        #[command(flatten)]
        output: FormatArg,
    },

    /// Delete a project with its locations, trade areas and runs
    Delete {
        /// Project id
        id: i64,
    },
}

/// Location commands.
#[derive(Debug, Subcommand)]
pub enum LocationCommand {
    /// Add a location to a project
    Add {
        /// Project id
        #[arg(short, long)]
        project: i64,

        /// Location name
        #[arg(short, long)]
        name: String,

        /// Latitude
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        /// Street address
        #[arg(short, long)]
        address: Option<String>,

        /// Location type
        #[arg(short = 't', long = "type", value_enum, default_value = "store")]
        location_type: LocationTypeArg,

        /// Metadata as a JSON object
        #[arg(long, value_parser = parse_json_object)]
        metadata: Option<Value>,

        #[command(flatten)]
        output: FormatArg,
    },

    /// List the locations of a project
    List {
        /// Project id
        #[arg(short, long)]
        project: i64,

        /// Only this type
        #[arg(short = 't', long = "type", value_enum)]
        location_type: Option<LocationTypeArg>,

        #[command(flatten)]
        output: FormatArg,
    },

    /// Show one location
    Show {
        /// Location id
        id: i64,

        #[command(flatten)]
        output: FormatArg,
    },

    /// Update a location
    Update {
        /// Location id
        id: i64,

        /// New name
        #[arg(short, long)]
        name: Option<String>,

        /// New latitude (requires --lng)
        #[arg(long, requires = "lng", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// New longitude (requires --lat)
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lng: Option<f64>,

        /// New address; pass "" to clear it
        #[arg(short, long)]
        address: Option<String>,

        /// New type
        #[arg(short = 't', long = "type", value_enum)]
        location_type: Option<LocationTypeArg>,

        /// Replacement metadata JSON object
        #[arg(long, value_parser = parse_json_object)]
        metadata: Option<Value>,

        #[command(flatten)]
        output: FormatArg,
    },

    /// Delete a location and its trade areas
    Delete {
        /// Location id
        id: i64,
    },
}

/// Trade area commands.
#[derive(Debug, Subcommand)]
pub enum TradeAreaCommand {
    /// Create a trade area around a location
    Create {
        /// Location id
        #[arg(short, long)]
        location: i64,

        /// Trade area name
        #[arg(short, long)]
        name: String,

        /// How the boundary is defined
        #[arg(short = 't', long = "type", value_enum)]
        area_type: AreaTypeArg,

        #[command(flatten)]
        params: AreaParamsArgs,

        #[command(flatten)]
        output: FormatArg,
    },

    /// List trade areas of a location or of a whole project
    List {
        /// Location id
        #[arg(short, long, conflicts_with = "project", required_unless_present = "project")]
        location: Option<i64>,

        /// Project id
        #[arg(short, long)]
        project: Option<i64>,

        #[command(flatten)]
        output: FormatArg,
    },

    /// Show one trade area
    Show {
        /// Trade area id
        id: i64,

        #[command(flatten)]
        output: FormatArg,
    },

    /// Update a trade area; changing its extent rebuilds the boundary
    Update {
        /// Trade area id
        id: i64,

        /// New name
        #[arg(short, long)]
        name: Option<String>,

        /// New type
        #[arg(short = 't', long = "type", value_enum)]
        area_type: Option<AreaTypeArg>,

        #[command(flatten)]
        params: AreaParamsArgs,

        #[command(flatten)]
        output: FormatArg,
    },

    /// Delete a trade area
    Delete {
        /// Trade area id
        id: i64,
    },

    /// Recompute demographics from the demand grid
    Refresh {
        /// Trade area id
        id: i64,

        /// Seed for simulated population
        #[arg(long)]
        seed: Option<u64>,

        #[command(flatten)]
        output: FormatArg,
    },
}

/// Population commands.
#[derive(Debug, Subcommand)]
pub enum PopulationCommand {
    /// Import census population from a JSON file of
    /// `[{"mesh_code": "5339461111", "population": 320}, ...]`
    Import {
        /// JSON file to read
        file: PathBuf,
    },

    /// List stored population squares inside a box
    Lookup {
        #[command(flatten)]
        bounds: BoundsArgs,

        #[command(flatten)]
        output: FormatArg,
    },
}

/// Grid command arguments.
#[derive(Debug, Args)]
pub struct GridCommand {
    /// Derive the area from this project's locations
    #[arg(short, long)]
    pub project: Option<i64>,

    #[command(flatten)]
    pub bounds: BoundsArgs,

    /// Mesh edge length in metres
    #[arg(long)]
    pub mesh_size: Option<f64>,

    /// Seed for simulated population
    #[arg(long)]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub output: FormatArg,
}

/// Optimize command arguments.
#[derive(Debug, Args)]
pub struct OptimizeCommand {
    /// Project id
    #[arg(short, long)]
    pub project: i64,

    /// Selection algorithm
    #[arg(short, long, value_enum, default_value = "greedy")]
    pub algorithm: AlgorithmArg,

    /// Number of stores to place
    #[arg(short = 'n', long, default_value = "5")]
    pub stores: usize,

    #[command(flatten)]
    pub bounds: BoundsArgs,

    /// Number of candidate sites
    #[arg(long)]
    pub candidates: Option<usize>,

    /// Use the highest-demand mesh centres as candidates
    #[arg(long)]
    pub from_meshes: bool,

    /// Catchment radius in kilometres
    #[arg(long)]
    pub max_radius: Option<f64>,

    /// Minimum distance between new stores in kilometres
    #[arg(long)]
    pub min_distance: Option<f64>,

    /// Total budget
    #[arg(long)]
    pub budget: Option<f64>,

    /// Seed for population, candidates and restarts
    #[arg(long)]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub output: FormatArg,
}

/// History command arguments.
#[derive(Debug, Args)]
pub struct HistoryCommand {
    /// Project id
    #[arg(short, long)]
    pub project: i64,

    /// JSON file of store records
    pub records: PathBuf,

    #[command(flatten)]
    pub bounds: BoundsArgs,

    /// Seed for simulated population
    #[arg(long)]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub output: FormatArg,
}

/// Stored analysis run commands.
#[derive(Debug, Subcommand)]
pub enum RunsCommand {
    /// List runs of a project, newest first
    List {
        /// Project id
        #[arg(short, long)]
        project: i64,

        /// Maximum number of runs
        #[arg(short, long, default_value = "20")]
        limit: usize,

        #[command(flatten)]
        output: FormatArg,
    },

    /// Show one run with its full result
    Show {
        /// Run id
        id: i64,

        #[command(flatten)]
        output: FormatArg,
    },
}

/// Geographic helpers.
#[derive(Debug, Subcommand)]
pub enum GeoCommand {
    /// Drive-time boundary around a point, as a GeoJSON feature
    Isochrone {
        /// Centre as LAT,LNG
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        at: GeoPoint,

        /// Drive time in minutes
        #[arg(short, long, default_value = "10")]
        minutes: f64,
    },

    /// Population and demand within a radius of a point
    Demographics {
        /// Centre as LAT,LNG
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        at: GeoPoint,

        /// Radius in kilometres
        #[arg(short, long, default_value = "1")]
        radius_km: f64,

        /// Seed for simulated population
        #[arg(long)]
        seed: Option<u64>,

        #[command(flatten)]
        output: FormatArg,
    },

    /// Great-circle distance between two points
    Distance {
        /// First point as LAT,LNG
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        from: GeoPoint,

        /// Second point as LAT,LNG
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        to: GeoPoint,
    },

    /// Grid square code containing a point
    Meshcode {
        /// Point as LAT,LNG
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        at: GeoPoint,

        /// Level 1 (80 km) to 5 (250 m)
        #[arg(short, long, default_value = "3", value_parser = clap::value_parser!(u8).range(1..=5))]
        level: u8,
    },

    /// Extent and centre of a grid square code
    Decode {
        /// Grid square code
        code: String,

        #[command(flatten)]
        output: FormatArg,
    },
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        file: Option<PathBuf>,
    },
}
