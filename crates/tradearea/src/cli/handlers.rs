//! Command handlers.
//!
//! [`App`] owns the loaded configuration, the open database and the acting
//! owner, and writes every command's output to a caller-supplied writer so
//! the handlers can be exercised in tests.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::commands::{
    AlgorithmArg, BoundsArgs, ConfigCommand, GeoCommand, GridCommand, HistoryCommand,
    LocationCommand,
    OptimizeCommand, OutputFormat, PopulationCommand, ProjectCommand, RunsCommand, StatusCommand,
    TradeAreaCommand,
};
use super::Command;
use crate::candidates::{candidates_from_meshes, generate_candidate_sites, CandidateSite};
use crate::capture::{Facility, FacilityKind};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::geo::{Bounds, GeoPoint, Polygon};
use crate::grid::{
    generate_demand_grid, seeded_rng, GridSummary, Mesh, MeshTablePopulation, SimulatedPopulation,
};
use crate::historical::{analyze, HistoricalAnalysis, StoreRecord};
use crate::meshcode::{self, MeshLevel};
use crate::model::{
    AreaType, Location, LocationType, LocationUpdate, NewLocation, NewProject, NewTradeArea, Project,
    ProjectUpdate, TradeArea, TradeAreaUpdate,
};
use crate::optimize::{
    competitive_optimization, default_scenarios, greedy, mip_style, multi_scenario,
    CompetitiveOptimization, Constraints, OptimizationResult, ScenarioComparison,
};
use crate::storage::{AnalysisRun, PopulationRecord, Storage};
use crate::trade_area::{area_radius_km, build_geometry, summarize_demographics};

/// Kind recorded for historical analysis runs.
const HISTORICAL_KIND: &str = "historical";

/// Padding around a study area when looking up stored population, so
/// squares centred just outside still cover edge cells.
const POPULATION_PADDING_KM: f64 = 1.0;

/// One entry of a population import file.
#[derive(Debug, Deserialize)]
struct PopulationEntry {
    mesh_code: String,
    population: u32,
}

/// Census figures for a study area.
#[derive(Debug)]
struct Census {
    figures: HashMap<String, u32>,
    /// BLAKE3 over the sorted `(mesh_code, population)` pairs.
    digest: String,
}

impl Census {
    /// Identity of the figures, recorded in analysis run inputs.
    fn fingerprint(&self) -> Value {
        json!({ "squares": self.figures.len(), "digest": self.digest })
    }
}

fn write_json<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> Result<()> {
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// The CLI application state.
#[derive(Debug)]
pub struct App {
    config: Config,
    storage: Storage,
    owner: String,
}

impl App {
    /// Create an application acting as `owner`.
    #[must_use]
    pub fn new(config: Config, storage: Storage, owner: impl Into<String>) -> Self {
        Self {
            config,
            storage,
            owner: owner.into(),
        }
    }

    /// The open database.
    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Run `command`, writing its output to `out`.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by storage, validation or the engine.
    pub fn execute(&self, command: Command, out: &mut dyn Write) -> Result<()> {
        match command {
            Command::Status(cmd) => self.status(&cmd, out),
            Command::Project(cmd) => self.project(cmd, out),
            Command::Location(cmd) => self.location(cmd, out),
            Command::TradeArea(cmd) => self.trade_area(cmd, out),
            Command::Population(cmd) => self.population(&cmd, out),
            Command::Grid(cmd) => self.grid(&cmd, out),
            Command::Optimize(cmd) => self.optimize(&cmd, out),
            Command::History(cmd) => self.history(&cmd, out),
            Command::Geo(cmd) => self.geo(&cmd, out),
            Command::Runs(cmd) => self.runs(&cmd, out),
            Command::Config(cmd) => config_command(&self.config, cmd, out),
        }
    }

    fn status(&self, cmd: &StatusCommand, out: &mut dyn Write) -> Result<()> {
        let stats = self.storage.stats()?;
        if cmd.json {
            let status = json!({
                "owner": self.owner,
                "database_path": self.storage.path(),
                "stats": stats,
            });
            return write_json(out, &status);
        }
        writeln!(out, "tradearea status")?;
        writeln!(out, "----------------")?;
        writeln!(out, "Owner:             {}", self.owner)?;
        writeln!(out, "Database:          {}", self.storage.path().display())?;
        writeln!(out, "Schema version:    {}", stats.schema_version)?;
        writeln!(out, "Database size:     {} bytes", stats.db_size_bytes)?;
        writeln!(out, "Projects:          {}", stats.projects)?;
        writeln!(out, "Locations:         {}", stats.locations)?;
        writeln!(out, "Trade areas:       {}", stats.trade_areas)?;
        writeln!(out, "Population meshes: {}", stats.population_meshes)?;
        writeln!(out, "Analysis runs:     {}", stats.analysis_runs)?;
        Ok(())
    }

    // === Projects ===

    fn project(&self, cmd: ProjectCommand, out: &mut dyn Write) -> Result<()> {
        match cmd {
            ProjectCommand::Create {
                name,
                description,
                settings,
                output,
            } => {
                let new = NewProject {
                    name,
                    description,
                    settings,
                };
                let project = self.storage.create_project(&self.owner, &new)?;
                print_project(out, &project, output.format)
            }
            ProjectCommand::List { output } => {
                let projects = self.storage.list_projects(&self.owner)?;
                if output.format == OutputFormat::Json {
                    return write_json(out, &projects);
                }
                if projects.is_empty() {
                    writeln!(out, "No projects.")?;
                }
                for p in &projects {
                    writeln!(
                        out,
                        "#{:<5} {:<30} {}",
                        p.id,
                        p.name,
                        p.description.as_deref().unwrap_or("")
                    )?;
                }
                Ok(())
            }
            ProjectCommand::Show { id, output } => {
                let project = self.storage.get_project(&self.owner, id)?;
                print_project(out, &project, output.format)
            }
            ProjectCommand::Update {
                id,
                name,
                description,
                settings,
                output,
            } => {
                let update = ProjectUpdate {
                    name,
                    description,
                    settings,
                };
                let project = self.storage.update_project(&self.owner, id, &update)?;
                print_project(out, &project, output.format)
            }
            ProjectCommand::Delete { id } => {
                self.storage.delete_project(&self.owner, id)?;
                writeln!(out, "Deleted project {id}")?;
                Ok(())
            }
        }
    }

    // === Locations ===

    fn location(&self, cmd: LocationCommand, out: &mut dyn Write) -> Result<()> {
        match cmd {
            LocationCommand::Add {
                project,
                name,
                lat,
                lng,
                address,
                location_type,
                metadata,
                output,
            } => {
                let new = NewLocation {
                    name,
                    address,
                    point: GeoPoint { lat, lng },
                    location_type: location_type.into(),
                    metadata,
                };
                let location = self.storage.create_location(&self.owner, project, &new)?;
                print_location(out, &location, output.format)
            }
            LocationCommand::List {
                project,
                location_type,
                output,
            } => {
                let locations = self.storage.list_locations(
                    &self.owner,
                    project,
                    location_type.map(Into::into),
                )?;
                if output.format == OutputFormat::Json {
                    return write_json(out, &locations);
                }
                if locations.is_empty() {
                    writeln!(out, "No locations.")?;
                }
                for l in &locations {
                    writeln!(
                        out,
                        "#{:<5} {:<10} {:<30} {}",
                        l.id, l.location_type, l.name, l.point
                    )?;
                }
                Ok(())
            }
            LocationCommand::Show { id, output } => {
                let location = self.storage.get_location(&self.owner, id)?;
                print_location(out, &location, output.format)
            }
            LocationCommand::Update {
                id,
                name,
                lat,
                lng,
                address,
                location_type,
                metadata,
                output,
            } => {
                let point = match (lat, lng) {
                    (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
                    _ => None,
                };
                let update = LocationUpdate {
                    name,
                    address,
                    point,
                    location_type: location_type.map(Into::into),
                    metadata,
                };
                let location = self.storage.update_location(&self.owner, id, &update)?;
                print_location(out, &location, output.format)
            }
            LocationCommand::Delete { id } => {
                self.storage.delete_location(&self.owner, id)?;
                writeln!(out, "Deleted location {id}")?;
                Ok(())
            }
        }
    }

    // === Trade areas ===

    fn trade_area(&self, cmd: TradeAreaCommand, out: &mut dyn Write) -> Result<()> {
        let cfg = &self.config.trade_area;
        match cmd {
            TradeAreaCommand::Create {
                location,
                name,
                area_type,
                params,
                output,
            } => {
                let new = NewTradeArea {
                    name,
                    area_type: area_type.into(),
                    parameters: params.parameters().unwrap_or_else(|| json!({})),
                    geometry: params.geometry,
                };
                let area = self
                    .storage
                    .create_trade_area(&self.owner, location, &new, cfg)?;
                print_trade_area(out, &area, output.format)
            }
            TradeAreaCommand::List {
                location,
                project,
                output,
            } => {
                let areas = match (location, project) {
                    (Some(location), _) => self.storage.list_trade_areas(&self.owner, location)?,
                    (None, Some(project)) => {
                        self.storage.list_project_trade_areas(&self.owner, project)?
                    }
                    (None, None) => {
                        return Err(Error::invalid("give --location or --project"));
                    }
                };
                if output.format == OutputFormat::Json {
                    return write_json(out, &areas);
                }
                if areas.is_empty() {
                    writeln!(out, "No trade areas.")?;
                }
                for a in &areas {
                    writeln!(
                        out,
                        "#{:<5} location {:<5} {:<10} {:<30} {}",
                        a.id, a.location_id, a.area_type, a.name, a.parameters
                    )?;
                }
                Ok(())
            }
            TradeAreaCommand::Show { id, output } => {
                let area = self.storage.get_trade_area(&self.owner, id)?;
                print_trade_area(out, &area, output.format)
            }
            TradeAreaCommand::Update {
                id,
                name,
                area_type,
                params,
                output,
            } => {
                let update = TradeAreaUpdate {
                    name,
                    area_type: area_type.map(Into::into),
                    parameters: params.parameters(),
                    geometry: params.geometry,
                };
                let area = self
                    .storage
                    .update_trade_area(&self.owner, id, &update, cfg)?;
                print_trade_area(out, &area, output.format)
            }
            TradeAreaCommand::Delete { id } => {
                self.storage.delete_trade_area(&self.owner, id)?;
                writeln!(out, "Deleted trade area {id}")?;
                Ok(())
            }
            TradeAreaCommand::Refresh { id, seed, output } => {
                let area = self.storage.get_trade_area(&self.owner, id)?;
                let polygon = area
                    .geometry
                    .as_ref()
                    .ok_or_else(|| Error::invalid(format!("trade area {id} has no boundary")))?;
                let bounds = polygon
                    .bounds()
                    .ok_or_else(|| Error::internal("trade area boundary has no extent"))?;
                let census = self.census_near(&bounds)?;
                let meshes =
                    self.demand_grid(&bounds, self.config.grid.mesh_size_m, seed, census)?;
                let demographics = summarize_demographics(polygon, &meshes);
                info!(
                    trade_area = id,
                    population = demographics.population,
                    meshes = demographics.mesh_count,
                    "refreshed trade area demographics"
                );
                let area = self.storage.set_demographics(
                    &self.owner,
                    id,
                    &serde_json::to_value(&demographics)?,
                )?;
                print_trade_area(out, &area, output.format)
            }
        }
    }

    // === Population ===

    fn population(&self, cmd: &PopulationCommand, out: &mut dyn Write) -> Result<()> {
        match cmd {
            PopulationCommand::Import { file } => {
                let entries: Vec<PopulationEntry> = read_json_file(file)?;
                let records = entries
                    .iter()
                    .map(|e| PopulationRecord::from_code(&e.mesh_code, e.population))
                    .collect::<Result<Vec<_>>>()?;
                let written = self.storage.upsert_population(&records)?;
                writeln!(
                    out,
                    "Imported {written} population squares from {}",
                    file.display()
                )?;
                Ok(())
            }
            PopulationCommand::Lookup { bounds, output } => {
                let bounds = bounds.to_bounds()?.ok_or_else(|| {
                    Error::InvalidBounds("lookup needs --north, --south, --east and --west".into())
                })?;
                let records = self.storage.population_in_bounds(&bounds)?;
                if output.format == OutputFormat::Json {
                    return write_json(out, &records);
                }
                let total: u64 = records.iter().map(|r| u64::from(r.population)).sum();
                for r in &records {
                    writeln!(
                        out,
                        "{:<12} level {} {:>8}  {}",
                        r.mesh_code, r.mesh_level, r.population, r.center
                    )?;
                }
                writeln!(out, "{} squares, population {total}", records.len())?;
                Ok(())
            }
        }
    }

    // === Engine ===

    /// Stored census squares near `bounds`, with a digest of their figures.
    fn census_near(&self, bounds: &Bounds) -> Result<Census> {
        let corners = [
            GeoPoint {
                lat: bounds.north,
                lng: bounds.east,
            },
            GeoPoint {
                lat: bounds.south,
                lng: bounds.west,
            },
        ];
        let lookup = Bounds::enclosing(&corners, POPULATION_PADDING_KM).unwrap_or(*bounds);
        let records = self.storage.population_in_bounds(&lookup)?;

        // Rows arrive ordered by mesh code
        let mut hasher = blake3::Hasher::new();
        for r in &records {
            hasher.update(r.mesh_code.as_bytes());
            hasher.update(b"\0");
            hasher.update(&r.population.to_le_bytes());
        }
        let digest = hasher.finalize().to_hex().to_string();
        let figures = records
            .into_iter()
            .map(|r| (r.mesh_code, r.population))
            .collect();
        Ok(Census { figures, digest })
    }

    /// Demand grid over `bounds`.
    ///
    /// Census squares are used where they exist; other cells fall back to
    /// simulated population.
    fn demand_grid(
        &self,
        bounds: &Bounds,
        mesh_size_m: f64,
        seed: Option<u64>,
        census: Census,
    ) -> Result<Vec<Mesh>> {
        let grid = &self.config.grid;
        let mut simulated = match seed {
            Some(seed) => SimulatedPopulation::with_seed(grid, seed),
            None => SimulatedPopulation::new(grid),
        };

        if census.figures.is_empty() {
            return generate_demand_grid(
                bounds,
                mesh_size_m,
                grid.demand_ratio,
                grid.max_cells,
                &mut simulated,
            );
        }

        let squares = census.figures.len();
        let mut model = MeshTablePopulation::new(census.figures, mesh_size_m, Box::new(simulated));
        let meshes = generate_demand_grid(
            bounds,
            mesh_size_m,
            grid.demand_ratio,
            grid.max_cells,
            &mut model,
        )?;
        debug!(
            squares,
            cells = meshes.len(),
            simulated = model.misses(),
            "built demand grid from census population"
        );
        Ok(meshes)
    }

    /// Study area from explicit flags, or around the given points padded by
    /// `padding_km`.
    fn study_bounds(
        &self,
        flags: &BoundsArgs,
        points: &[GeoPoint],
        padding_km: f64,
    ) -> Result<Bounds> {
        if let Some(bounds) = flags.to_bounds()? {
            return Ok(bounds);
        }
        Bounds::enclosing(points, padding_km).ok_or_else(|| {
            Error::InvalidBounds(
                "no locations to derive a study area from; give --north, --south, --east and --west"
                    .to_string(),
            )
        })
    }

    fn project_locations(&self, project_id: i64) -> Result<Vec<Location>> {
        self.storage.list_locations(&self.owner, project_id, None)
    }

    fn grid(&self, cmd: &GridCommand, out: &mut dyn Write) -> Result<()> {
        let points: Vec<GeoPoint> = match cmd.project {
            Some(project) => self
                .project_locations(project)?
                .iter()
                .map(|l| l.point)
                .collect(),
            None => Vec::new(),
        };
        let bounds = self.study_bounds(&cmd.bounds, &points, self.config.optimization.max_radius_km)?;
        let mesh_size = cmd.mesh_size.unwrap_or(self.config.grid.mesh_size_m);
        let seed = cmd.seed.or(self.config.grid.seed);
        let census = self.census_near(&bounds)?;
        let meshes = self.demand_grid(&bounds, mesh_size, seed, census)?;
        let summary = GridSummary::from_meshes(&meshes);

        if cmd.output.format == OutputFormat::Json {
            return write_json(
                out,
                &json!({
                    "bounds": bounds,
                    "mesh_size_m": mesh_size,
                    "summary": summary,
                }),
            );
        }
        writeln!(out, "Demand grid")?;
        writeln!(out, "-----------")?;
        writeln!(
            out,
            "Bounds:           N {:.5} S {:.5} E {:.5} W {:.5}",
            bounds.north, bounds.south, bounds.east, bounds.west
        )?;
        writeln!(out, "Mesh size:        {mesh_size} m")?;
        writeln!(out, "Cells:            {}", summary.cells)?;
        writeln!(out, "Uninhabited:      {}", summary.uninhabited_cells)?;
        writeln!(out, "Total population: {}", summary.total_population)?;
        writeln!(out, "Total demand:     {:.0}", summary.total_demand)?;
        if let Some(max_cell) = &summary.max_cell {
            writeln!(out, "Busiest cell:     {max_cell} ({:.0})", summary.max_demand)?;
        }
        Ok(())
    }

    fn optimize(&self, cmd: &OptimizeCommand, out: &mut dyn Write) -> Result<()> {
        if cmd.stores == 0 {
            return Err(Error::invalid("--stores must be at least 1"));
        }
        let project = self.storage.get_project(&self.owner, cmd.project)?;
        let locations = self.project_locations(project.id)?;

        let mut opt = self.config.optimization.clone();
        if let Some(radius) = cmd.max_radius {
            opt.max_radius_km = radius;
        }
        if let Some(distance) = cmd.min_distance {
            opt.min_distance_km = distance;
        }
        if let Some(budget) = cmd.budget {
            opt.max_budget = Some(budget);
        }
        let constraints = Constraints::from(&opt);
        constraints.validate()?;

        let points: Vec<GeoPoint> = locations.iter().map(|l| l.point).collect();
        let bounds = self.study_bounds(&cmd.bounds, &points, opt.max_radius_km)?;
        // Unseeded requests get a fresh seed so the stored run can be replayed
        let seed = cmd.seed.or(self.config.grid.seed).unwrap_or_else(rand::random);
        let candidate_count = cmd.candidates.unwrap_or(opt.candidate_count);
        let kind = cmd.algorithm.kind();
        let census = self.census_near(&bounds)?;

        let input = json!({
            "algorithm": kind,
            "stores": cmd.stores,
            "bounds": bounds,
            "seed": seed,
            "candidates": candidate_count,
            "from_meshes": cmd.from_meshes,
            "grid": self.config.grid,
            "census": census.fingerprint(),
            "constraints": constraints,
            "competitor_attractiveness": opt.competitor_attractiveness,
            "locations": locations
                .iter()
                .map(|l| json!({"id": l.id, "type": l.location_type, "point": l.point}))
                .collect::<Vec<_>>(),
        });

        if let Some(run) = self.storage.find_run(&self.owner, project.id, kind, &input)? {
            info!(run_id = run.id, kind, "reusing stored analysis run");
            return print_run(out, &run, true, cmd.output.format);
        }

        let meshes = self.demand_grid(&bounds, self.config.grid.mesh_size_m, Some(seed), census)?;
        let mut rng = seeded_rng(Some(seed));
        let candidates: Vec<CandidateSite> = if cmd.from_meshes {
            candidates_from_meshes(&meshes, candidate_count)
        } else {
            generate_candidate_sites(
                &bounds,
                candidate_count,
                &points,
                opt.candidate_spacing_km,
                &mut rng,
            )?
        };
        if candidates.is_empty() {
            return Err(Error::invalid("no candidate sites could be placed"));
        }

        let stores: Vec<Facility> = locations
            .iter()
            .filter(|l| l.location_type == LocationType::Store)
            .map(|l| {
                Facility::new(
                    format!("location_{}", l.id),
                    l.point,
                    opt.new_store_attractiveness,
                    FacilityKind::Existing,
                )
                .with_name(&l.name)
            })
            .collect();
        let competitors: Vec<Facility> = locations
            .iter()
            .filter(|l| l.location_type == LocationType::Competitor)
            .map(|l| {
                Facility::new(
                    format!("location_{}", l.id),
                    l.point,
                    opt.competitor_attractiveness,
                    FacilityKind::Competitor,
                )
                .with_name(&l.name)
            })
            .collect();
        let background: Vec<Facility> = stores.iter().chain(&competitors).cloned().collect();

        info!(
            project = project.id,
            kind,
            candidates = candidates.len(),
            meshes = meshes.len(),
            "running site optimization"
        );
        let result = match cmd.algorithm {
            AlgorithmArg::Greedy => serde_json::to_value(greedy(
                &candidates,
                &meshes,
                &background,
                cmd.stores,
                &constraints,
            )?)?,
            AlgorithmArg::Mip => serde_json::to_value(mip_style(
                &candidates,
                &meshes,
                &background,
                cmd.stores,
                &constraints,
                &mut rng,
            )?)?,
            AlgorithmArg::Competitive => serde_json::to_value(competitive_optimization(
                &candidates,
                &meshes,
                &stores,
                &competitors,
                cmd.stores,
                &constraints,
                opt.competitor_attractiveness,
            )?)?,
            AlgorithmArg::MultiScenario => {
                let scenarios = default_scenarios(cmd.stores, &constraints);
                serde_json::to_value(multi_scenario(
                    &candidates,
                    &meshes,
                    &background,
                    &scenarios,
                    &mut rng,
                )?)?
            }
        };

        let run = self
            .storage
            .record_run(&self.owner, project.id, kind, &input, &result)?;
        print_run(out, &run, false, cmd.output.format)
    }

    fn history(&self, cmd: &HistoryCommand, out: &mut dyn Write) -> Result<()> {
        let project = self.storage.get_project(&self.owner, cmd.project)?;
        let records: Vec<StoreRecord> = read_json_file(&cmd.records)?;
        if records.is_empty() {
            return Err(Error::invalid("the records file holds no stores"));
        }
        let locations = self.project_locations(project.id)?;
        let competitors: Vec<GeoPoint> = locations
            .iter()
            .filter(|l| l.location_type == LocationType::Competitor)
            .map(|l| l.point)
            .collect();

        let hist = &self.config.historical;
        let points: Vec<GeoPoint> = records
            .iter()
            .map(|r| r.point)
            .chain(locations.iter().map(|l| l.point))
            .collect();
        let bounds = self.study_bounds(&cmd.bounds, &points, hist.feature_radius_km)?;
        let seed = cmd.seed.or(self.config.grid.seed).unwrap_or_else(rand::random);
        let census = self.census_near(&bounds)?;

        let input = json!({
            "records": records,
            "bounds": bounds,
            "seed": seed,
            "competitors": competitors,
            "grid": self.config.grid,
            "census": census.fingerprint(),
            "config": hist,
        });
        if let Some(run) =
            self.storage
                .find_run(&self.owner, project.id, HISTORICAL_KIND, &input)?
        {
            info!(run_id = run.id, "reusing stored historical analysis");
            return print_run(out, &run, true, cmd.output.format);
        }

        let meshes = self.demand_grid(&bounds, self.config.grid.mesh_size_m, Some(seed), census)?;
        let analysis = analyze(&records, &meshes, &competitors, hist)?;
        let run = self.storage.record_run(
            &self.owner,
            project.id,
            HISTORICAL_KIND,
            &input,
            &serde_json::to_value(&analysis)?,
        )?;
        print_run(out, &run, false, cmd.output.format)
    }

    fn geo(&self, cmd: &GeoCommand, out: &mut dyn Write) -> Result<()> {
        let cfg = &self.config.trade_area;
        match cmd {
            GeoCommand::Isochrone { at, minutes } => {
                let parameters = json!({ "minutes": minutes });
                let polygon = build_geometry(*at, AreaType::DriveTime, &parameters, None, cfg)?;
                let feature = json!({
                    "type": "Feature",
                    "properties": {
                        "contour": minutes,
                        "metric": "time",
                        "radius_km": area_radius_km(AreaType::DriveTime, &parameters, cfg),
                    },
                    "geometry": polygon.to_geojson(),
                });
                write_json(out, &feature)
            }
            GeoCommand::Demographics {
                at,
                radius_km,
                seed,
                output,
            } => {
                at.validate()?;
                if !(radius_km.is_finite() && *radius_km > 0.0) {
                    return Err(Error::invalid("--radius-km must be greater than 0"));
                }
                let polygon = Polygon::circle(*at, *radius_km, cfg.polygon_segments);
                let bounds = polygon
                    .bounds()
                    .ok_or_else(|| Error::internal("circle has no extent"))?;
                let seed = seed.or(self.config.grid.seed);
                let census = self.census_near(&bounds)?;
                let meshes =
                    self.demand_grid(&bounds, self.config.grid.mesh_size_m, seed, census)?;
                let demographics = summarize_demographics(&polygon, &meshes);
                if output.format == OutputFormat::Json {
                    return write_json(out, &demographics);
                }
                writeln!(out, "Within {radius_km} km of {at}")?;
                writeln!(out, "  Population: {}", demographics.population)?;
                writeln!(out, "  Demand:     {:.0}", demographics.demand)?;
                writeln!(out, "  Meshes:     {}", demographics.mesh_count)?;
                writeln!(out, "  Area:       {:.2} km2", demographics.area_km2)?;
                writeln!(out, "  Density:    {:.0} per km2", demographics.density_per_km2)?;
                Ok(())
            }
            GeoCommand::Distance { from, to } => {
                writeln!(out, "{:.3} km", from.distance_km(to))?;
                Ok(())
            }
            GeoCommand::Meshcode { at, level } => {
                let code = meshcode::encode(*at, MeshLevel::from_number(*level)?)?;
                writeln!(out, "{code}")?;
                Ok(())
            }
            GeoCommand::Decode { code, output } => {
                let cell = meshcode::decode(code)?;
                if output.format == OutputFormat::Json {
                    return write_json(out, &cell);
                }
                writeln!(out, "{} ({:?} level)", cell.code, cell.level)?;
                writeln!(out, "  Centre: {}", cell.center)?;
                writeln!(
                    out,
                    "  Bounds: N {:.6} S {:.6} E {:.6} W {:.6}",
                    cell.bounds.north, cell.bounds.south, cell.bounds.east, cell.bounds.west
                )?;
                Ok(())
            }
        }
    }

    fn runs(&self, cmd: &RunsCommand, out: &mut dyn Write) -> Result<()> {
        match cmd {
            RunsCommand::List {
                project,
                limit,
                output,
            } => {
                let runs = self.storage.list_runs(&self.owner, *project, *limit)?;
                if output.format == OutputFormat::Json {
                    return write_json(out, &runs);
                }
                if runs.is_empty() {
                    writeln!(out, "No analysis runs.")?;
                }
                for run in &runs {
                    writeln!(
                        out,
                        "#{:<5} {:<15} {}  {}",
                        run.id,
                        run.kind,
                        run.created_at.to_rfc3339(),
                        &run.input_hash[..12.min(run.input_hash.len())]
                    )?;
                }
                Ok(())
            }
            RunsCommand::Show { id, output } => {
                let run = self.storage.get_run(&self.owner, *id)?;
                print_run(out, &run, false, output.format)
            }
        }
    }
}

/// Handle a configuration command. Needs no database.
///
/// # Errors
///
/// Returns an error if output cannot be written or serialized.
pub fn config_command(config: &Config, cmd: ConfigCommand, out: &mut dyn Write) -> Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                writeln!(out, "{}", config.to_pretty_json()?)?;
                return Ok(());
            }
            let grid = &config.grid;
            let opt = &config.optimization;
            let hist = &config.historical;
            writeln!(out, "Current Configuration")?;
            writeln!(out, "=====================")?;
            writeln!(out)?;
            writeln!(out, "[Storage]")?;
            writeln!(out, "  Database path:        {}", config.database_path().display())?;
            writeln!(out)?;
            writeln!(out, "[User]")?;
            writeln!(out, "  Owner:                {}", config.user.owner)?;
            writeln!(out)?;
            writeln!(out, "[Grid]")?;
            writeln!(out, "  Mesh size (m):        {}", grid.mesh_size_m)?;
            writeln!(out, "  Demand ratio:         {}", grid.demand_ratio)?;
            writeln!(out, "  Urban centre:         {}", grid.urban_center)?;
            match grid.seed {
                Some(seed) => writeln!(out, "  Seed:                 {seed}")?,
                None => writeln!(out, "  Seed:                 random")?,
            }
            writeln!(out)?;
            writeln!(out, "[Optimization]")?;
            writeln!(out, "  Max radius (km):      {}", opt.max_radius_km)?;
            writeln!(out, "  Distance decay:       {}", opt.distance_decay)?;
            writeln!(out, "  Min distance (km):    {}", opt.min_distance_km)?;
            writeln!(out, "  Store cost:           {}", opt.store_cost)?;
            match opt.max_budget {
                Some(budget) => writeln!(out, "  Max budget:           {budget}")?,
                None => writeln!(out, "  Max budget:           unlimited")?,
            }
            writeln!(out, "  Candidates:           {}", opt.candidate_count)?;
            writeln!(out, "  Max iterations:       {}", opt.max_iterations)?;
            writeln!(out)?;
            writeln!(out, "[Historical]")?;
            writeln!(out, "  Threshold:            {}", hist.performance_threshold)?;
            writeln!(out, "  Confidence level:     {}", hist.confidence_level)?;
            writeln!(out, "  Feature radius (km):  {}", hist.feature_radius_km)?;
            writeln!(out)?;
            writeln!(out, "[Trade area]")?;
            writeln!(out, "  Drive speed (km/h):   {}", config.trade_area.drive_speed_kmh)?;
            writeln!(out, "  Polygon segments:     {}", config.trade_area.polygon_segments)?;
        }
        ConfigCommand::Path => {
            writeln!(out, "{}", Config::default_config_path().display())?;
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            writeln!(out, "Validating configuration: {}", path.display())?;
            match Config::load_from(Some(path)) {
                Ok(_) => writeln!(out, "Configuration is valid.")?,
                Err(e) => writeln!(out, "Configuration error: {e}")?,
            }
        }
    }
    Ok(())
}

fn print_project(out: &mut dyn Write, project: &Project, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return write_json(out, project);
    }
    writeln!(out, "Project #{}: {}", project.id, project.name)?;
    if let Some(description) = &project.description {
        writeln!(out, "  Description: {description}")?;
    }
    writeln!(out, "  Owner:       {}", project.owner)?;
    writeln!(out, "  Settings:    {}", project.settings)?;
    writeln!(out, "  Created:     {}", project.created_at.to_rfc3339())?;
    writeln!(out, "  Updated:     {}", project.updated_at.to_rfc3339())?;
    Ok(())
}

fn print_location(out: &mut dyn Write, location: &Location, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return write_json(out, location);
    }
    writeln!(
        out,
        "Location #{} ({}): {}",
        location.id, location.location_type, location.name
    )?;
    writeln!(out, "  Project:  {}", location.project_id)?;
    writeln!(out, "  Position: {}", location.point)?;
    if let Some(address) = &location.address {
        writeln!(out, "  Address:  {address}")?;
    }
    writeln!(out, "  Metadata: {}", location.metadata)?;
    Ok(())
}

fn print_trade_area(out: &mut dyn Write, area: &TradeArea, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return write_json(out, area);
    }
    writeln!(out, "Trade area #{} ({}): {}", area.id, area.area_type, area.name)?;
    writeln!(out, "  Location:     {}", area.location_id)?;
    writeln!(out, "  Parameters:   {}", area.parameters)?;
    if let Some(polygon) = &area.geometry {
        writeln!(
            out,
            "  Boundary:     {} vertices, {:.2} km2",
            polygon.vertices().len(),
            polygon.area_km2()
        )?;
    }
    writeln!(out, "  Demographics: {}", area.demographics)?;
    Ok(())
}

/// Print a stored run, decoding its result by kind.
fn print_run(out: &mut dyn Write, run: &AnalysisRun, reused: bool, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return write_json(out, run);
    }
    writeln!(
        out,
        "Run #{} ({}, {}){}",
        run.id,
        run.kind,
        run.created_at.to_rfc3339(),
        if reused { " [stored result]" } else { "" }
    )?;
    writeln!(out)?;
    match run.kind.as_str() {
        "greedy" | "mip" => {
            let result: OptimizationResult = serde_json::from_value(run.result.clone())?;
            print_optimization(out, &result)
        }
        "competitive" => {
            let result: CompetitiveOptimization = serde_json::from_value(run.result.clone())?;
            print_competitive(out, &result)
        }
        "multi_scenario" => {
            let result: ScenarioComparison = serde_json::from_value(run.result.clone())?;
            print_scenarios(out, &result)
        }
        HISTORICAL_KIND => {
            let result: HistoricalAnalysis = serde_json::from_value(run.result.clone())?;
            print_historical(out, &result)
        }
        _ => write_json(out, &run.result),
    }
}

fn print_optimization(out: &mut dyn Write, result: &OptimizationResult) -> Result<()> {
    writeln!(out, "Algorithm:      {}", result.algorithm)?;
    writeln!(out, "Stores:         {}", result.total_stores)?;
    writeln!(out, "Demand:         {:.1}", result.total_demand_captured)?;
    writeln!(out, "Coverage:       {:.1}%", result.coverage)?;
    writeln!(out, "Total cost:     {:.0}", result.total_cost)?;
    writeln!(out, "Efficiency:     {:.2}", result.metrics.efficiency)?;
    writeln!(
        out,
        "Run time:       {} ms, {} iterations",
        result.performance.execution_time_ms, result.performance.iterations_completed
    )?;
    writeln!(out)?;
    for site in &result.selected_sites {
        writeln!(
            out,
            "  {:>2}. {:<20} {}  demand {:.1}",
            site.store_number, site.candidate_id, site.point, site.demand_captured
        )?;
    }
    Ok(())
}

fn print_competitive(out: &mut dyn Write, result: &CompetitiveOptimization) -> Result<()> {
    print_optimization(out, &result.base_optimization)?;
    let analysis = &result.analysis;
    writeln!(out)?;
    writeln!(out, "Market demand:      {:.1}", analysis.total_market_demand)?;
    writeln!(
        out,
        "New stores:         {:.1} ({:.1}% share)",
        analysis.new_stores.total_demand, analysis.new_stores.market_share
    )?;
    writeln!(
        out,
        "Competitors:        {:.1} ({:.1}% share)",
        analysis.competitors.total_demand, analysis.competitors.market_share
    )?;
    writeln!(out, "Market coverage:    {:.1}%", analysis.summary.market_coverage)?;
    writeln!(out, "Avg competition:    {:.2}", analysis.summary.average_competition)?;
    writeln!(out, "New store advantage: {:.1}%", analysis.summary.new_store_advantage)?;
    Ok(())
}

fn print_scenarios(out: &mut dyn Write, result: &ScenarioComparison) -> Result<()> {
    for outcome in &result.scenarios {
        writeln!(
            out,
            "  {}. {:<28} stores {:>2}  demand {:>10.1}  coverage {:>5.1}%  efficiency {:.2}",
            outcome.scenario_index,
            outcome.name,
            outcome.result.total_stores,
            outcome.result.total_demand_captured,
            outcome.result.coverage,
            outcome.result.metrics.efficiency
        )?;
    }
    writeln!(out)?;
    writeln!(out, "Best by demand:     {}", result.best_demand().name)?;
    writeln!(out, "Best by coverage:   {}", result.best_coverage().name)?;
    writeln!(out, "Best by efficiency: {}", result.best_efficiency().name)?;
    writeln!(
        out,
        "Demand range:       {:.1} - {:.1} (mean {:.1})",
        result.summary.min_demand, result.summary.max_demand, result.summary.average_demand
    )?;
    Ok(())
}

fn print_historical(out: &mut dyn Write, result: &HistoricalAnalysis) -> Result<()> {
    let cats = &result.categories;
    writeln!(
        out,
        "Stores analysed:  {} (high {}, average {}, under {})",
        result.metadata.total_stores_analyzed,
        cats.high.len(),
        cats.average.len(),
        cats.under.len()
    )?;
    writeln!(out, "Pattern strength: {:.2}", result.metadata.pattern_strength)?;
    writeln!(out)?;
    writeln!(out, "Feature importance:")?;
    for f in result.feature_importance.iter().take(5) {
        writeln!(out, "  {:<24} {:.3}", f.feature, f.importance)?;
    }
    writeln!(out)?;
    if result.recommendations.is_empty() {
        writeln!(out, "No sites match the winning patterns.")?;
        return Ok(());
    }
    writeln!(out, "Recommended sites:")?;
    for (rec, forecast) in result.recommendations.iter().zip(&result.forecasts) {
        let payback = forecast
            .payback_years
            .map_or_else(|| "n/a".to_string(), |y| format!("{y:.1} y"));
        writeln!(
            out,
            "  {:<20} score {:.2}  confidence {:.2}  revenue {:.0}  payback {payback}",
            rec.site_id, rec.pattern_score, rec.confidence, forecast.projected_revenue
        )?;
        for line in &rec.reasoning {
            writeln!(out, "      {line}")?;
        }
    }
    Ok(())
}
