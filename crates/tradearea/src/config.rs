//! Configuration management for tradearea.
//!
//! Layered with figment: built-in defaults, then a TOML file, then
//! environment variables. Nested keys in the environment are separated by a
//! double underscore, e.g. `TRADEAREA_OPTIMIZATION__MAX_RADIUS_KM=3.0`.

use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geo::GeoPoint;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "tradearea";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "tradearea.db";

/// Environment variable prefix.
const ENV_PREFIX: &str = "TRADEAREA_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `TRADEAREA_`)
/// 2. TOML config file at `~/.config/tradearea/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Identity the CLI acts as.
    pub user: UserConfig,
    /// Demand grid generation.
    pub grid: GridConfig,
    /// Site-selection engine parameters.
    pub optimization: OptimizationConfig,
    /// Historical pattern analysis.
    pub historical: HistoricalConfig,
    /// Trade area geometry.
    pub trade_area: TradeAreaConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/tradearea/tradearea.db`
    pub database_path: Option<PathBuf>,
}

/// The owning identity used for every stored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Owner name recorded on projects.
    pub owner: String,
}

/// Demand grid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Mesh edge length in metres.
    pub mesh_size_m: f64,
    /// Fraction of population that becomes demand.
    pub demand_ratio: f64,
    /// Seed for simulated population and candidate sampling.
    pub seed: Option<u64>,
    /// Centre used by the simulated population falloff.
    pub urban_center: GeoPoint,
    /// Base population per cell before scaling.
    pub base_population: u32,
    /// Probability that a simulated cell is uninhabited.
    pub uninhabited_probability: f64,
    /// Largest grid a single request may build.
    pub max_cells: usize,
}

/// Optimization engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Catchment radius of a store in kilometres.
    pub max_radius_km: f64,
    /// Exponent of the distance decay in the gravity model.
    pub distance_decay: f64,
    /// Minimum spacing between selected stores in kilometres.
    pub min_distance_km: f64,
    /// Cost of opening one store.
    pub store_cost: f64,
    /// Optional total budget.
    pub max_budget: Option<f64>,
    /// Iteration cap for local search.
    pub max_iterations: usize,
    /// Candidate pool size used for random restarts.
    pub restart_pool: usize,
    /// Rounds without improvement before local search stops.
    pub stall_limit: usize,
    /// Number of random candidate sites to sample.
    pub candidate_count: usize,
    /// Minimum spacing between sampled candidates in kilometres.
    pub candidate_spacing_km: f64,
    /// Attractiveness of a new store.
    pub new_store_attractiveness: f64,
    /// Attractiveness of a competitor store.
    pub competitor_attractiveness: f64,
}

/// Historical analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoricalConfig {
    /// Score at or above which a store is a high performer.
    pub performance_threshold: f64,
    /// Minimum pattern match ratio for a recommendation.
    pub confidence_level: f64,
    /// Radius used when extracting location features.
    pub feature_radius_km: f64,
    /// Maximum number of site recommendations.
    pub max_recommendations: usize,
    /// Investment assumed per new site for payback estimates.
    pub investment_cost: f64,
}

/// Trade area geometry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeAreaConfig {
    /// Average travel speed used to turn drive minutes into a radius.
    pub drive_speed_kmh: f64,
    /// Number of vertices for generated circles.
    pub polygon_segments: usize,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            owner: "local".to_string(),
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            mesh_size_m: 250.0,
            demand_ratio: 0.3,
            seed: None,
            // Tokyo
            urban_center: GeoPoint {
                lat: 35.6762,
                lng: 139.6503,
            },
            base_population: 150,
            uninhabited_probability: 0.02,
            max_cells: crate::grid::DEFAULT_MAX_CELLS,
        }
    }
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            max_radius_km: 2.0,
            distance_decay: 1.5,
            min_distance_km: 0.5,
            store_cost: 1_000_000.0,
            max_budget: None,
            max_iterations: 100,
            restart_pool: 50,
            stall_limit: 20,
            candidate_count: 200,
            candidate_spacing_km: 0.2,
            new_store_attractiveness: 1.0,
            competitor_attractiveness: 0.8,
        }
    }
}

impl Default for HistoricalConfig {
    fn default() -> Self {
        Self {
            performance_threshold: 0.8,
            confidence_level: 0.8,
            feature_radius_km: 2.0,
            max_recommendations: 10,
            investment_cost: 1_000_000.0,
        }
    }
}

impl Default for TradeAreaConfig {
    fn default() -> Self {
        Self {
            drive_speed_kmh: 30.0,
            polygon_segments: 32,
        }
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}

fn require_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be greater than 0 (got {value})")))
    }
}

fn require_unit(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be within 0..=1 (got {value})")))
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// A missing file is not an error; defaults and the environment still
    /// apply.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file).nested())
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigValidation`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.user.owner.trim().is_empty() {
            return Err(invalid("user.owner must not be empty"));
        }

        let grid = &self.grid;
        require_positive("grid.mesh_size_m", grid.mesh_size_m)?;
        require_unit("grid.demand_ratio", grid.demand_ratio)?;
        require_unit("grid.uninhabited_probability", grid.uninhabited_probability)?;
        if grid.base_population == 0 {
            return Err(invalid("grid.base_population must be greater than 0"));
        }
        if grid.max_cells == 0 {
            return Err(invalid("grid.max_cells must be greater than 0"));
        }
        grid.urban_center
            .validate()
            .map_err(|e| invalid(format!("grid.urban_center: {e}")))?;

        let opt = &self.optimization;
        require_positive("optimization.max_radius_km", opt.max_radius_km)?;
        require_positive("optimization.distance_decay", opt.distance_decay)?;
        require_positive("optimization.store_cost", opt.store_cost)?;
        require_positive(
            "optimization.new_store_attractiveness",
            opt.new_store_attractiveness,
        )?;
        require_positive(
            "optimization.competitor_attractiveness",
            opt.competitor_attractiveness,
        )?;
        if opt.min_distance_km < 0.0 || opt.candidate_spacing_km < 0.0 {
            return Err(invalid(
                "optimization spacing distances must not be negative",
            ));
        }
        if let Some(budget) = opt.max_budget {
            require_positive("optimization.max_budget", budget)?;
        }
        if opt.max_iterations == 0 || opt.restart_pool == 0 || opt.candidate_count == 0 {
            return Err(invalid(
                "optimization.max_iterations, restart_pool and candidate_count must be greater than 0",
            ));
        }

        let hist = &self.historical;
        require_positive("historical.performance_threshold", hist.performance_threshold)?;
        require_unit("historical.confidence_level", hist.confidence_level)?;
        require_positive("historical.feature_radius_km", hist.feature_radius_km)?;
        require_positive("historical.investment_cost", hist.investment_cost)?;
        if hist.max_recommendations == 0 {
            return Err(invalid("historical.max_recommendations must be greater than 0"));
        }

        require_positive("trade_area.drive_speed_kmh", self.trade_area.drive_speed_kmh)?;
        if self.trade_area.polygon_segments < 3 {
            return Err(invalid("trade_area.polygon_segments must be at least 3"));
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Render the effective configuration as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.user.owner, "local");
    }

    #[test]
    fn test_default_grid_config() {
        let grid = GridConfig::default();
        assert_eq!(grid.mesh_size_m, 250.0);
        assert_eq!(grid.demand_ratio, 0.3);
        assert!(grid.seed.is_none());
        assert_eq!(grid.base_population, 150);
        assert_eq!(grid.max_cells, 1_000_000);
    }

    #[test]
    fn test_default_optimization_config() {
        let opt = OptimizationConfig::default();
        assert_eq!(opt.max_radius_km, 2.0);
        assert_eq!(opt.distance_decay, 1.5);
        assert_eq!(opt.min_distance_km, 0.5);
        assert_eq!(opt.store_cost, 1_000_000.0);
        assert!(opt.max_budget.is_none());
        assert_eq!(opt.max_iterations, 100);
        assert_eq!(opt.restart_pool, 50);
        assert_eq!(opt.stall_limit, 20);
    }

    #[test]
    fn test_default_historical_config() {
        let hist = HistoricalConfig::default();
        assert_eq!(hist.performance_threshold, 0.8);
        assert_eq!(hist.confidence_level, 0.8);
        assert_eq!(hist.max_recommendations, 10);
    }

    #[test]
    fn test_validate_rejects_zero_mesh_size() {
        let mut config = Config::default();
        config.grid.mesh_size_m = 0.0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("mesh_size_m"));
    }

    #[test]
    fn test_validate_rejects_zero_max_cells() {
        let mut config = Config::default();
        config.grid.max_cells = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("max_cells"));
    }

    #[test]
    fn test_validate_rejects_demand_ratio_out_of_range() {
        let mut config = Config::default();
        config.grid.demand_ratio = 1.5;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("demand_ratio"));
    }

    #[test]
    fn test_validate_rejects_negative_decay() {
        let mut config = Config::default();
        config.optimization.distance_decay = -1.0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("distance_decay"));
    }

    #[test]
    fn test_validate_rejects_non_positive_budget() {
        let mut config = Config::default();
        config.optimization.max_budget = Some(0.0);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("max_budget"));
    }

    #[test]
    fn test_validate_rejects_empty_owner() {
        let mut config = Config::default();
        config.user.owner = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_confidence_above_one() {
        let mut config = Config::default();
        config.historical.confidence_level = 1.2;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("confidence_level"));
    }

    #[test]
    fn test_validate_rejects_degenerate_polygon() {
        let mut config = Config::default();
        config.trade_area.polygon_segments = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        let path = config.database_path();
        assert!(path.to_string_lossy().contains("tradearea.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));
        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("tradearea"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let config = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config.grid, GridConfig::default());
        assert_eq!(config.historical, HistoricalConfig::default());
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = std::env::temp_dir().join(format!(
            "tradearea_config_test_{}.toml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            "[optimization]\nmax_radius_km = 3.5\n\n[grid]\nseed = 42\n",
        )
        .unwrap();

        let config = Config::load_from(Some(path.clone())).unwrap();
        assert_eq!(config.optimization.max_radius_km, 3.5);
        assert_eq!(config.grid.seed, Some(42));
        // Untouched keys keep their defaults
        assert_eq!(config.optimization.distance_decay, 1.5);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_load_rejects_invalid_file_values() {
        let path = std::env::temp_dir().join(format!(
            "tradearea_config_invalid_{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[grid]\nmesh_size_m = -10.0\n").unwrap();

        let err = Config::load_from(Some(path.clone())).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_optimization_config_deserialize_partial() {
        let json = r#"{"max_radius_km": 1.0, "max_budget": 3000000.0}"#;
        let opt: OptimizationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(opt.max_radius_km, 1.0);
        assert_eq!(opt.max_budget, Some(3_000_000.0));
        assert_eq!(opt.candidate_count, 200);
    }

    #[test]
    fn test_pretty_json_contains_sections() {
        let json = Config::default().to_pretty_json().unwrap();
        assert!(json.contains("optimization"));
        assert!(json.contains("trade_area"));
    }
}
