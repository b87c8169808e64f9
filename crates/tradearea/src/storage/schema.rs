//! `SQLite` schema definitions for tradearea.
//!
//! Geometry, settings and metadata columns hold JSON text. Timestamps are
//! RFC 3339 strings.

/// Projects, unique by name per owner.
pub const CREATE_PROJECTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    settings TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(owner, name)
)
";

/// Locations belonging to a project.
pub const CREATE_LOCATIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS locations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    address TEXT,
    lat REAL NOT NULL,
    lng REAL NOT NULL,
    location_type TEXT NOT NULL DEFAULT 'store',
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
)
";

/// Trade areas around a location.
pub const CREATE_TRADE_AREAS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS trade_areas (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    location_id INTEGER NOT NULL REFERENCES locations(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    area_type TEXT NOT NULL,
    parameters TEXT NOT NULL DEFAULT '{}',
    geometry TEXT,
    demographics TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
)
";

/// Census population keyed by grid square code.
pub const CREATE_POPULATION_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS population_meshes (
    mesh_code TEXT PRIMARY KEY,
    center_lat REAL NOT NULL,
    center_lng REAL NOT NULL,
    population INTEGER NOT NULL,
    mesh_level INTEGER NOT NULL,
    updated_at TEXT NOT NULL
)
";

/// Stored optimization and analysis results.
pub const CREATE_ANALYSIS_RUNS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS analysis_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    input_hash TEXT NOT NULL,
    input TEXT NOT NULL,
    result TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(project_id, input_hash)
)
";

/// Index for listing locations of a project.
pub const CREATE_LOCATIONS_PROJECT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_locations_project ON locations(project_id)
";

/// Index for listing trade areas of a location.
pub const CREATE_TRADE_AREAS_LOCATION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_trade_areas_location ON trade_areas(location_id)
";

/// Index for bounding-box lookups of population meshes.
pub const CREATE_POPULATION_POSITION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_population_position ON population_meshes(center_lat, center_lng)
";

/// Index for listing runs newest first.
pub const CREATE_RUNS_PROJECT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_runs_project ON analysis_runs(project_id, created_at DESC)
";

/// Key-value pairs, including the schema version.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_PROJECTS_TABLE,
    CREATE_LOCATIONS_TABLE,
    CREATE_TRADE_AREAS_TABLE,
    CREATE_POPULATION_TABLE,
    CREATE_ANALYSIS_RUNS_TABLE,
    CREATE_LOCATIONS_PROJECT_INDEX,
    CREATE_TRADE_AREAS_LOCATION_INDEX,
    CREATE_POPULATION_POSITION_INDEX,
    CREATE_RUNS_PROJECT_INDEX,
    CREATE_METADATA_TABLE,
];
