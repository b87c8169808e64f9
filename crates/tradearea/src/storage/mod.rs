//! Storage layer for tradearea.
//!
//! `SQLite` persistence for projects, their locations and trade areas,
//! census population by grid square, and stored analysis runs.
//!
//! Every project-scoped operation takes the acting `owner`. A row that does
//! not exist yields [`Error::NotFound`]; a row that belongs to another owner
//! yields [`Error::Forbidden`].

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::TradeAreaConfig;
use crate::error::{Error, Result};
use crate::geo::{Bounds, GeoPoint, Polygon};
use crate::meshcode;
use crate::model::{
    AreaType, Location, LocationType, LocationUpdate, NewLocation, NewProject, NewTradeArea,
    Project, ProjectUpdate, TradeArea, TradeAreaUpdate,
};
use crate::trade_area::build_geometry;

const PROJECT_COLUMNS: &str = "id, owner, name, description, settings, created_at, updated_at";
const LOCATION_COLUMNS: &str =
    "l.id, l.project_id, l.name, l.address, l.lat, l.lng, l.location_type, l.metadata, l.created_at";
const TRADE_AREA_COLUMNS: &str =
    "t.id, t.location_id, t.name, t.area_type, t.parameters, t.geometry, t.demographics, t.created_at";
const RUN_COLUMNS: &str = "id, project_id, owner, kind, input_hash, input, result, created_at";

/// Census population of one grid square.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationRecord {
    /// Grid square code.
    pub mesh_code: String,
    /// Centre of the square.
    pub center: GeoPoint,
    /// Resident population.
    pub population: u32,
    /// Grid square level (1-5).
    pub mesh_level: u8,
    /// Last time the figure was written.
    pub updated_at: DateTime<Utc>,
}

impl PopulationRecord {
    /// Build a record from a grid square code, deriving centre and level.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a malformed code.
    pub fn from_code(mesh_code: &str, population: u32) -> Result<Self> {
        let cell = meshcode::decode(mesh_code)?;
        Ok(Self {
            mesh_code: cell.code,
            center: cell.center,
            population,
            mesh_level: cell.level.number(),
            updated_at: Utc::now(),
        })
    }
}

/// A stored optimization or analysis result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRun {
    /// Row id.
    pub id: i64,
    /// Project analysed.
    pub project_id: i64,
    /// Who ran it.
    pub owner: String,
    /// Analysis kind, e.g. `greedy` or `historical`.
    pub kind: String,
    /// BLAKE3 hex digest of kind and input.
    pub input_hash: String,
    /// Request that produced the result.
    pub input: Value,
    /// Serialized result.
    pub result: Value,
    /// When the run was stored.
    pub created_at: DateTime<Utc>,
}

/// Hash identifying an analysis request.
#[must_use]
pub fn input_hash(kind: &str, input: &Value) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.as_bytes());
    hasher.update(b"\0");
    hasher.update(input.to_string().as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Storage engine backed by `SQLite`.
#[derive(Debug)]
pub struct Storage {
    path: PathBuf,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the schema cannot
    /// be initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::initialize_schema(&conn)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    // === Ownership ===

    fn check_owner(entity: &'static str, id: i64, actual: Option<String>, owner: &str) -> Result<()> {
        match actual {
            None => Err(Error::not_found(entity, id)),
            Some(actual) if actual != owner => {
                debug!(entity, id, "access denied for {owner}");
                Err(Error::forbidden(entity, id))
            }
            Some(_) => Ok(()),
        }
    }

    fn authorize_project(&self, owner: &str, project_id: i64) -> Result<()> {
        let actual: Option<String> = self
            .conn
            .query_row(
                "SELECT owner FROM projects WHERE id = ?1",
                [project_id],
                |row| row.get(0),
            )
            .optional()?;
        Self::check_owner("project", project_id, actual, owner)
    }

    fn authorize_location(&self, owner: &str, location_id: i64) -> Result<()> {
        let actual: Option<String> = self
            .conn
            .query_row(
                r"
                SELECT p.owner FROM locations l
                JOIN projects p ON p.id = l.project_id
                WHERE l.id = ?1
                ",
                [location_id],
                |row| row.get(0),
            )
            .optional()?;
        Self::check_owner("location", location_id, actual, owner)
    }

    fn authorize_trade_area(&self, owner: &str, trade_area_id: i64) -> Result<()> {
        let actual: Option<String> = self
            .conn
            .query_row(
                r"
                SELECT p.owner FROM trade_areas t
                JOIN locations l ON l.id = t.location_id
                JOIN projects p ON p.id = l.project_id
                WHERE t.id = ?1
                ",
                [trade_area_id],
                |row| row.get(0),
            )
            .optional()?;
        Self::check_owner("trade area", trade_area_id, actual, owner)
    }

    // === Projects ===

    /// Create a project.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a bad payload and
    /// [`Error::Conflict`] when the owner already has a project of that name.
    pub fn create_project(&self, owner: &str, new: &NewProject) -> Result<Project> {
        new.validate()?;
        let now = Utc::now().to_rfc3339();
        let settings = new.settings.clone().unwrap_or_else(|| json!({}));
        self.conn
            .execute(
                r"
                INSERT INTO projects (owner, name, description, settings, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                ",
                params![owner, new.name, new.description, settings.to_string(), now],
            )
            .map_err(|e| duplicate_name(e, &new.name))?;

        let id = self.conn.last_insert_rowid();
        info!(id, name = %new.name, "created project");
        self.get_project(owner, id)
    }

    /// Projects of `owner`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_projects(&self, owner: &str) -> Result<Vec<Project>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE owner = ?1 ORDER BY created_at DESC, id DESC"
        ))?;
        let projects = stmt
            .query_map([owner], Self::row_to_project)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(projects)
    }

    /// A project of `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::Forbidden`].
    pub fn get_project(&self, owner: &str, id: i64) -> Result<Project> {
        self.authorize_project(owner, id)?;
        let project = self.conn.query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
            [id],
            Self::row_to_project,
        )?;
        Ok(project)
    }

    /// Apply a partial update to a project.
    ///
    /// An empty description clears it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`], [`Error::NotFound`],
    /// [`Error::Forbidden`], or [`Error::Conflict`] on a rename collision.
    pub fn update_project(&self, owner: &str, id: i64, update: &ProjectUpdate) -> Result<Project> {
        update.validate()?;
        let mut project = self.get_project(owner, id)?;
        if let Some(name) = &update.name {
            project.name.clone_from(name);
        }
        if let Some(description) = &update.description {
            project.description = Some(description.clone()).filter(|d| !d.is_empty());
        }
        if let Some(settings) = &update.settings {
            project.settings = settings.clone();
        }

        self.conn
            .execute(
                r"
                UPDATE projects SET name = ?1, description = ?2, settings = ?3, updated_at = ?4
                WHERE id = ?5
                ",
                params![
                    project.name,
                    project.description,
                    project.settings.to_string(),
                    Utc::now().to_rfc3339(),
                    id,
                ],
            )
            .map_err(|e| duplicate_name(e, &project.name))?;
        debug!(id, "updated project");
        self.get_project(owner, id)
    }

    /// Delete a project with its locations, trade areas and runs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::Forbidden`].
    pub fn delete_project(&self, owner: &str, id: i64) -> Result<()> {
        self.authorize_project(owner, id)?;
        self.conn.execute("DELETE FROM projects WHERE id = ?1", [id])?;
        info!(id, "deleted project");
        Ok(())
    }

    // === Locations ===

    /// Add a location to a project.
    ///
    /// # Errors
    ///
    /// Returns a validation error, or [`Error::NotFound`] /
    /// [`Error::Forbidden`] for the project.
    pub fn create_location(&self, owner: &str, project_id: i64, new: &NewLocation) -> Result<Location> {
        new.validate()?;
        self.authorize_project(owner, project_id)?;
        let metadata = new.metadata.clone().unwrap_or_else(|| json!({}));
        self.conn.execute(
            r"
            INSERT INTO locations (project_id, name, address, lat, lng, location_type, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
            params![
                project_id,
                new.name,
                new.address,
                new.point.lat,
                new.point.lng,
                new.location_type.as_str(),
                metadata.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(id, project_id, "created location");
        self.get_location(owner, id)
    }

    /// Locations of a project, optionally of one type, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::Forbidden`] for the project.
    pub fn list_locations(
        &self,
        owner: &str,
        project_id: i64,
        location_type: Option<LocationType>,
    ) -> Result<Vec<Location>> {
        self.authorize_project(owner, project_id)?;
        let mut stmt = self.conn.prepare(&format!(
            r"
            SELECT {LOCATION_COLUMNS} FROM locations l
            WHERE l.project_id = ?1 AND (?2 IS NULL OR l.location_type = ?2)
            ORDER BY l.id
            "
        ))?;
        let locations = stmt
            .query_map(
                params![project_id, location_type.map(LocationType::as_str)],
                Self::row_to_location,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(locations)
    }

    /// A location in a project of `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::Forbidden`].
    pub fn get_location(&self, owner: &str, id: i64) -> Result<Location> {
        self.authorize_location(owner, id)?;
        let location = self.conn.query_row(
            &format!("SELECT {LOCATION_COLUMNS} FROM locations l WHERE l.id = ?1"),
            [id],
            Self::row_to_location,
        )?;
        Ok(location)
    }

    /// Apply a partial update to a location. An empty address clears it.
    ///
    /// # Errors
    ///
    /// Returns a validation error, [`Error::NotFound`] or
    /// [`Error::Forbidden`].
    pub fn update_location(&self, owner: &str, id: i64, update: &LocationUpdate) -> Result<Location> {
        update.validate()?;
        let mut location = self.get_location(owner, id)?;
        if let Some(name) = &update.name {
            location.name.clone_from(name);
        }
        if let Some(address) = &update.address {
            location.address = Some(address.clone()).filter(|a| !a.is_empty());
        }
        if let Some(point) = update.point {
            location.point = point;
        }
        if let Some(location_type) = update.location_type {
            location.location_type = location_type;
        }
        if let Some(metadata) = &update.metadata {
            location.metadata = metadata.clone();
        }

        self.conn.execute(
            r"
            UPDATE locations
            SET name = ?1, address = ?2, lat = ?3, lng = ?4, location_type = ?5, metadata = ?6
            WHERE id = ?7
            ",
            params![
                location.name,
                location.address,
                location.point.lat,
                location.point.lng,
                location.location_type.as_str(),
                location.metadata.to_string(),
                id,
            ],
        )?;
        if update.point.is_some() {
            debug!(id, "location moved; existing trade areas keep their geometry until updated");
        }
        Ok(location)
    }

    /// Delete a location and its trade areas.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::Forbidden`].
    pub fn delete_location(&self, owner: &str, id: i64) -> Result<()> {
        self.authorize_location(owner, id)?;
        self.conn.execute("DELETE FROM locations WHERE id = ?1", [id])?;
        debug!(id, "deleted location");
        Ok(())
    }

    // === Trade areas ===

    /// Create a trade area around a location, building its boundary.
    ///
    /// # Errors
    ///
    /// Returns a validation error, or [`Error::NotFound`] /
    /// [`Error::Forbidden`] for the location.
    pub fn create_trade_area(
        &self,
        owner: &str,
        location_id: i64,
        new: &NewTradeArea,
        config: &TradeAreaConfig,
    ) -> Result<TradeArea> {
        new.validate()?;
        let location = self.get_location(owner, location_id)?;
        let geometry = build_geometry(
            location.point,
            new.area_type,
            &new.parameters,
            new.geometry.as_ref(),
            config,
        )?;
        self.conn.execute(
            r"
            INSERT INTO trade_areas (location_id, name, area_type, parameters, geometry, demographics, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, '{}', ?6)
            ",
            params![
                location_id,
                new.name,
                new.area_type.as_str(),
                new.parameters.to_string(),
                geometry_to_json(&geometry),
                Utc::now().to_rfc3339(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(id, location_id, area_type = %new.area_type, "created trade area");
        self.get_trade_area(owner, id)
    }

    /// Trade areas of one location.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::Forbidden`] for the location.
    pub fn list_trade_areas(&self, owner: &str, location_id: i64) -> Result<Vec<TradeArea>> {
        self.authorize_location(owner, location_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TRADE_AREA_COLUMNS} FROM trade_areas t WHERE t.location_id = ?1 ORDER BY t.id"
        ))?;
        let areas = stmt
            .query_map([location_id], Self::row_to_trade_area)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(areas)
    }

    /// Trade areas of every location in a project.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::Forbidden`] for the project.
    pub fn list_project_trade_areas(&self, owner: &str, project_id: i64) -> Result<Vec<TradeArea>> {
        self.authorize_project(owner, project_id)?;
        let mut stmt = self.conn.prepare(&format!(
            r"
            SELECT {TRADE_AREA_COLUMNS} FROM trade_areas t
            JOIN locations l ON l.id = t.location_id
            WHERE l.project_id = ?1
            ORDER BY t.location_id, t.id
            "
        ))?;
        let areas = stmt
            .query_map([project_id], Self::row_to_trade_area)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(areas)
    }

    /// A trade area of `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::Forbidden`].
    pub fn get_trade_area(&self, owner: &str, id: i64) -> Result<TradeArea> {
        self.authorize_trade_area(owner, id)?;
        let area = self.conn.query_row(
            &format!("SELECT {TRADE_AREA_COLUMNS} FROM trade_areas t WHERE t.id = ?1"),
            [id],
            Self::row_to_trade_area,
        )?;
        Ok(area)
    }

    /// Apply a partial update to a trade area.
    ///
    /// Changing the type, parameters or geometry rebuilds the boundary and
    /// clears the demographics.
    ///
    /// # Errors
    ///
    /// Returns a validation error, [`Error::NotFound`] or
    /// [`Error::Forbidden`].
    pub fn update_trade_area(
        &self,
        owner: &str,
        id: i64,
        update: &TradeAreaUpdate,
        config: &TradeAreaConfig,
    ) -> Result<TradeArea> {
        let existing = self.get_trade_area(owner, id)?;
        let mut merged = update.apply(&existing)?;
        let reshaped =
            update.area_type.is_some() || update.parameters.is_some() || update.geometry.is_some();
        if reshaped {
            let location = self.get_location(owner, existing.location_id)?;
            merged.geometry = Some(build_geometry(
                location.point,
                merged.area_type,
                &merged.parameters,
                merged.geometry.as_ref(),
                config,
            )?);
            merged.demographics = json!({});
        }

        self.conn.execute(
            r"
            UPDATE trade_areas
            SET name = ?1, area_type = ?2, parameters = ?3, geometry = ?4, demographics = ?5
            WHERE id = ?6
            ",
            params![
                merged.name,
                merged.area_type.as_str(),
                merged.parameters.to_string(),
                merged.geometry.as_ref().map(geometry_to_json),
                merged.demographics.to_string(),
                id,
            ],
        )?;
        debug!(id, reshaped, "updated trade area");
        Ok(merged)
    }

    /// Store computed demographics for a trade area.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] unless `demographics` is an object, or
    /// [`Error::NotFound`] / [`Error::Forbidden`].
    pub fn set_demographics(&self, owner: &str, id: i64, demographics: &Value) -> Result<TradeArea> {
        if !demographics.is_object() {
            return Err(Error::invalid("demographics must be a JSON object"));
        }
        self.authorize_trade_area(owner, id)?;
        self.conn.execute(
            "UPDATE trade_areas SET demographics = ?1 WHERE id = ?2",
            params![demographics.to_string(), id],
        )?;
        self.get_trade_area(owner, id)
    }

    /// Delete a trade area.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::Forbidden`].
    pub fn delete_trade_area(&self, owner: &str, id: i64) -> Result<()> {
        self.authorize_trade_area(owner, id)?;
        self.conn.execute("DELETE FROM trade_areas WHERE id = ?1", [id])?;
        Ok(())
    }

    // === Population ===

    /// Insert or replace population figures in one transaction.
    ///
    /// Returns the number of records written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a malformed code; nothing is
    /// written in that case.
    pub fn upsert_population(&self, records: &[PopulationRecord]) -> Result<usize> {
        for record in records {
            if !meshcode::is_valid(&record.mesh_code) {
                return Err(Error::invalid(format!(
                    "invalid mesh code '{}'",
                    record.mesh_code
                )));
            }
            record.center.validate()?;
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                r"
                INSERT INTO population_meshes (mesh_code, center_lat, center_lng, population, mesh_level, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(mesh_code) DO UPDATE SET
                    center_lat = excluded.center_lat,
                    center_lng = excluded.center_lng,
                    population = excluded.population,
                    mesh_level = excluded.mesh_level,
                    updated_at = excluded.updated_at
                ",
            )?;
            for record in records {
                stmt.execute(params![
                    record.mesh_code,
                    record.center.lat,
                    record.center.lng,
                    record.population,
                    record.mesh_level,
                    record.updated_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        info!(count = records.len(), "upserted population meshes");
        Ok(records.len())
    }

    /// Population squares whose centre lies inside `bounds`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBounds`] or a database error.
    pub fn population_in_bounds(&self, bounds: &Bounds) -> Result<Vec<PopulationRecord>> {
        bounds.validate()?;
        let mut stmt = self.conn.prepare(
            r"
            SELECT mesh_code, center_lat, center_lng, population, mesh_level, updated_at
            FROM population_meshes
            WHERE center_lat BETWEEN ?1 AND ?2 AND center_lng BETWEEN ?3 AND ?4
            ORDER BY mesh_code
            ",
        )?;
        let records = stmt
            .query_map(
                params![bounds.south, bounds.north, bounds.west, bounds.east],
                Self::row_to_population,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    // === Analysis runs ===

    /// A stored run of `kind` for exactly this input, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::Forbidden`] for the project.
    pub fn find_run(&self, owner: &str, project_id: i64, kind: &str, input: &Value) -> Result<Option<AnalysisRun>> {
        self.authorize_project(owner, project_id)?;
        let hash = input_hash(kind, input);
        let run = self
            .conn
            .query_row(
                &format!(
                    "SELECT {RUN_COLUMNS} FROM analysis_runs WHERE project_id = ?1 AND input_hash = ?2"
                ),
                params![project_id, hash],
                Self::row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    /// Store a run. An identical earlier request keeps its stored run, which
    /// is returned instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::Forbidden`] for the project.
    pub fn record_run(
        &self,
        owner: &str,
        project_id: i64,
        kind: &str,
        input: &Value,
        result: &Value,
    ) -> Result<AnalysisRun> {
        self.authorize_project(owner, project_id)?;
        let hash = input_hash(kind, input);
        let inserted = self.conn.execute(
            r"
            INSERT INTO analysis_runs (project_id, owner, kind, input_hash, input, result, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(project_id, input_hash) DO NOTHING
            ",
            params![
                project_id,
                owner,
                kind,
                hash,
                input.to_string(),
                result.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        if inserted == 0 {
            debug!(project_id, kind, "identical run already stored");
        }
        self.find_run(owner, project_id, kind, input)?
            .ok_or_else(|| Error::internal("analysis run missing after insert"))
    }

    /// Runs of a project, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::Forbidden`] for the project.
    pub fn list_runs(&self, owner: &str, project_id: i64, limit: usize) -> Result<Vec<AnalysisRun>> {
        self.authorize_project(owner, project_id)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(&format!(
            r"
            SELECT {RUN_COLUMNS} FROM analysis_runs
            WHERE project_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
            "
        ))?;
        let runs = stmt
            .query_map(params![project_id, limit], Self::row_to_run)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    /// A stored run, checked against the owner of its project.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] or [`Error::Forbidden`].
    pub fn get_run(&self, owner: &str, id: i64) -> Result<AnalysisRun> {
        let project_id: Option<i64> = self
            .conn
            .query_row(
                "SELECT project_id FROM analysis_runs WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        let project_id = project_id.ok_or_else(|| Error::not_found("analysis run", id))?;
        self.authorize_project(owner, project_id)
            .map_err(|e| if e.is_forbidden() { Error::forbidden("analysis run", id) } else { e })?;
        let run = self.conn.query_row(
            &format!("SELECT {RUN_COLUMNS} FROM analysis_runs WHERE id = ?1"),
            [id],
            Self::row_to_run,
        )?;
        Ok(run)
    }

    // === Stats ===

    fn count(&self, table: &str) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(count)
    }

    /// Row counts and database size.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            projects: self.count("projects")?,
            locations: self.count("locations")?,
            trade_areas: self.count("trade_areas")?,
            population_meshes: self.count("population_meshes")?,
            analysis_runs: self.count("analysis_runs")?,
            schema_version: migrations::get_schema_version(&self.conn)?,
            db_size_bytes,
        })
    }

    // === Row mapping ===

    fn row_to_project(row: &rusqlite::Row) -> rusqlite::Result<Project> {
        Ok(Project {
            id: row.get(0)?,
            owner: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            settings: json_column(row, 4)?,
            created_at: parse_timestamp(&row.get::<_, String>(5)?),
            updated_at: parse_timestamp(&row.get::<_, String>(6)?),
        })
    }

    fn row_to_location(row: &rusqlite::Row) -> rusqlite::Result<Location> {
        let type_str: String = row.get(6)?;
        let location_type = type_str.parse().unwrap_or_else(|_| {
            warn!("Unknown location type: {}, defaulting to store", type_str);
            LocationType::Store
        });
        Ok(Location {
            id: row.get(0)?,
            project_id: row.get(1)?,
            name: row.get(2)?,
            address: row.get(3)?,
            point: GeoPoint {
                lat: row.get(4)?,
                lng: row.get(5)?,
            },
            location_type,
            metadata: json_column(row, 7)?,
            created_at: parse_timestamp(&row.get::<_, String>(8)?),
        })
    }

    fn row_to_trade_area(row: &rusqlite::Row) -> rusqlite::Result<TradeArea> {
        let type_str: String = row.get(3)?;
        let area_type = type_str.parse().unwrap_or_else(|_| {
            warn!("Unknown area type: {}, treating as custom", type_str);
            AreaType::Custom
        });
        let geometry = row
            .get::<_, Option<String>>(5)?
            .map(|text| geometry_from_json(&text))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
        Ok(TradeArea {
            id: row.get(0)?,
            location_id: row.get(1)?,
            name: row.get(2)?,
            area_type,
            parameters: json_column(row, 4)?,
            geometry,
            demographics: json_column(row, 6)?,
            created_at: parse_timestamp(&row.get::<_, String>(7)?),
        })
    }

    fn row_to_population(row: &rusqlite::Row) -> rusqlite::Result<PopulationRecord> {
        Ok(PopulationRecord {
            mesh_code: row.get(0)?,
            center: GeoPoint {
                lat: row.get(1)?,
                lng: row.get(2)?,
            },
            population: row.get(3)?,
            mesh_level: row.get(4)?,
            updated_at: parse_timestamp(&row.get::<_, String>(5)?),
        })
    }

    fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<AnalysisRun> {
        Ok(AnalysisRun {
            id: row.get(0)?,
            project_id: row.get(1)?,
            owner: row.get(2)?,
            kind: row.get(3)?,
            input_hash: row.get(4)?,
            input: json_column(row, 5)?,
            result: json_column(row, 6)?,
            created_at: parse_timestamp(&row.get::<_, String>(7)?),
        })
    }
}

fn parse_timestamp(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

fn json_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Value> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn duplicate_name(err: rusqlite::Error, name: &str) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            Error::conflict(format!("a project named '{name}' already exists"))
        }
        _ => err.into(),
    }
}

#[derive(Deserialize)]
struct GeoJsonPolygon {
    coordinates: Vec<Vec<[f64; 2]>>,
}

/// GeoJSON polygon text, `[lng, lat]` order.
fn geometry_to_json(polygon: &Polygon) -> String {
    polygon.to_geojson().to_string()
}

fn geometry_from_json(text: &str) -> serde_json::Result<Polygon> {
    let parsed: GeoJsonPolygon = serde_json::from_str(text)?;
    let ring = parsed
        .coordinates
        .into_iter()
        .next()
        .unwrap_or_default()
        .into_iter()
        .map(|[lng, lat]| GeoPoint { lat, lng })
        .collect();
    Ok(Polygon { ring })
}

/// Row counts and size of the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Projects of all owners.
    pub projects: i64,
    /// Locations.
    pub locations: i64,
    /// Trade areas.
    pub trade_areas: i64,
    /// Population squares.
    pub population_meshes: i64,
    /// Stored analysis runs.
    pub analysis_runs: i64,
    /// Schema version.
    pub schema_version: i32,
    /// Size of the database file in bytes; 0 in memory.
    pub db_size_bytes: u64,
}
