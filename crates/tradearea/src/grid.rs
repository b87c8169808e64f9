//! Demand grid generation.
//!
//! The study area is cut into square meshes (250 m by default, the size of a
//! census quarter square). Each mesh carries a population figure from a
//! [`PopulationModel`] and a demand derived from it.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::GridConfig;
use crate::error::{Error, Result};
use crate::geo::{km_per_deg_lng, Bounds, GeoPoint, KM_PER_DEG_LAT};
use crate::meshcode::{self, MeshLevel};

/// Metres per degree of latitude.
const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// Default upper bound on the number of cells in one grid.
pub const DEFAULT_MAX_CELLS: usize = 1_000_000;

/// Build the RNG used by the engine: deterministic when seeded.
#[must_use]
pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}

/// One grid cell with its population and demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    /// Identifier, `mesh_{n}`.
    pub id: String,
    /// Centre of the cell.
    pub center: GeoPoint,
    /// Extent of the cell.
    pub bounds: Bounds,
    /// Resident population.
    pub population: u32,
    /// Demand units derived from population.
    pub demand: f64,
}

/// A source of population figures for grid cells.
pub trait PopulationModel {
    /// Population of the cell centred on `center`.
    fn population_at(&mut self, center: GeoPoint) -> u32;
}

/// Synthetic population that falls off with distance from an urban centre.
#[derive(Debug)]
pub struct SimulatedPopulation {
    rng: StdRng,
    base: f64,
    urban_center: GeoPoint,
    uninhabited_probability: f64,
}

impl SimulatedPopulation {
    /// Create a model from grid configuration.
    #[must_use]
    pub fn new(config: &GridConfig) -> Self {
        Self {
            rng: seeded_rng(config.seed),
            base: f64::from(config.base_population),
            urban_center: config.urban_center,
            uninhabited_probability: config.uninhabited_probability,
        }
    }

    /// Create a model with an explicit seed, ignoring the configured one.
    #[must_use]
    pub fn with_seed(config: &GridConfig, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..Self::new(config)
        }
    }
}

impl PopulationModel for SimulatedPopulation {
    fn population_at(&mut self, center: GeoPoint) -> u32 {
        if center.validate().is_err() {
            return 0;
        }
        let random_factor = self.rng.random_range(0.5..1.5);
        let distance = center.distance_km(&self.urban_center);
        let density_factor = (2.0 - distance / 10.0).max(0.3);

        if self.rng.random::<f64>() < self.uninhabited_probability {
            return 0;
        }

        let population = (self.base * random_factor * density_factor).round();
        // Bounded by base * 1.5 * 2
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let population = population as u32;
        population.max(5)
    }
}

/// The same population in every cell.
#[derive(Debug, Clone, Copy)]
pub struct UniformPopulation(pub u32);

impl PopulationModel for UniformPopulation {
    fn population_at(&mut self, _center: GeoPoint) -> u32 {
        self.0
    }
}

/// Census figures keyed by mesh code.
///
/// Lookups go from the finest level to the coarsest. A figure published for
/// a square larger than the grid cell is scaled down by the area ratio.
/// Cells with no figure at any level use the fallback model.
pub struct MeshTablePopulation {
    figures: HashMap<String, u32>,
    cell_area_km2: f64,
    fallback: Box<dyn PopulationModel>,
    misses: usize,
}

impl std::fmt::Debug for MeshTablePopulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshTablePopulation")
            .field("figures", &self.figures.len())
            .field("cell_area_km2", &self.cell_area_km2)
            .field("misses", &self.misses)
            .finish_non_exhaustive()
    }
}

impl MeshTablePopulation {
    /// Create a table-backed model for cells of `mesh_size_m`.
    #[must_use]
    pub fn new(
        figures: HashMap<String, u32>,
        mesh_size_m: f64,
        fallback: Box<dyn PopulationModel>,
    ) -> Self {
        let edge_km = mesh_size_m / 1000.0;
        Self {
            figures,
            cell_area_km2: edge_km * edge_km,
            fallback,
            misses: 0,
        }
    }

    /// Number of lookups served by the fallback model.
    #[must_use]
    pub fn misses(&self) -> usize {
        self.misses
    }

    fn square_area_km2(level: MeshLevel, lat: f64) -> f64 {
        level.lat_span() * KM_PER_DEG_LAT * level.lng_span() * km_per_deg_lng(lat)
    }
}

impl PopulationModel for MeshTablePopulation {
    fn population_at(&mut self, center: GeoPoint) -> u32 {
        for level in [
            MeshLevel::Fifth,
            MeshLevel::Fourth,
            MeshLevel::Third,
            MeshLevel::Second,
            MeshLevel::First,
        ] {
            let Ok(code) = meshcode::encode(center, level) else {
                break;
            };
            if let Some(&population) = self.figures.get(&code) {
                let ratio =
                    (self.cell_area_km2 / Self::square_area_km2(level, center.lat)).min(1.0);
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let scaled = (f64::from(population) * ratio).round() as u32;
                return scaled;
            }
        }
        self.misses += 1;
        self.fallback.population_at(center)
    }
}

/// Generate the demand grid covering `bounds`.
///
/// Cells are laid out row-major from the south-west corner; cells on the
/// northern and eastern edges are clipped to the bounds.
///
/// # Errors
///
/// Returns an error if the bounds are invalid, the mesh size is not
/// positive, `demand_ratio` lies outside 0..=1, or the grid would hold more
/// than `max_cells` cells.
pub fn generate_demand_grid(
    bounds: &Bounds,
    mesh_size_m: f64,
    demand_ratio: f64,
    max_cells: usize,
    model: &mut dyn PopulationModel,
) -> Result<Vec<Mesh>> {
    bounds.validate()?;
    if !(mesh_size_m.is_finite() && mesh_size_m > 0.0) {
        return Err(Error::invalid(format!(
            "mesh size must be greater than 0 (got {mesh_size_m})"
        )));
    }
    if !(0.0..=1.0).contains(&demand_ratio) {
        return Err(Error::invalid(format!(
            "demand ratio must be within 0..=1 (got {demand_ratio})"
        )));
    }

    let lat_step = mesh_size_m / METERS_PER_DEG_LAT;
    let lng_step = mesh_size_m / (METERS_PER_DEG_LAT * bounds.north.to_radians().cos());
    if !lng_step.is_finite() || lng_step <= 0.0 {
        return Err(Error::InvalidBounds(
            "bounds too close to a pole for a metric grid".to_string(),
        ));
    }

    // Non-negative after ceil; huge quotients saturate to usize::MAX
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rows = ((bounds.north - bounds.south) / lat_step).ceil() as usize;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let cols = ((bounds.east - bounds.west) / lng_step).ceil() as usize;
    debug!(rows, cols, lat_step, lng_step, "generating demand grid");
    let cells = match rows.checked_mul(cols) {
        Some(cells) if cells <= max_cells => cells,
        _ => {
            warn!(rows, cols, max_cells, "demand grid too large");
            return Err(Error::invalid(format!(
                "demand grid of {rows} x {cols} cells exceeds the limit of {max_cells}; \
                 use a larger mesh size or a smaller area"
            )));
        }
    };

    let mut meshes = Vec::with_capacity(cells);
    for row in 0..rows {
        let south = bounds.south + row as f64 * lat_step;
        let north = (south + lat_step).min(bounds.north);
        for col in 0..cols {
            let west = bounds.west + col as f64 * lng_step;
            let east = (west + lng_step).min(bounds.east);
            let cell = Bounds {
                north,
                south,
                east,
                west,
            };
            let center = cell.center();
            let population = model.population_at(center);
            let demand = (f64::from(population) * demand_ratio).round().max(1.0);
            meshes.push(Mesh {
                id: format!("mesh_{}", meshes.len()),
                center,
                bounds: cell,
                population,
                demand,
            });
        }
    }
    Ok(meshes)
}

/// Build a grid using the configured simulated population.
///
/// # Errors
///
/// See [`generate_demand_grid`].
pub fn simulated_grid(bounds: &Bounds, config: &GridConfig) -> Result<Vec<Mesh>> {
    let mut model = SimulatedPopulation::new(config);
    generate_demand_grid(
        bounds,
        config.mesh_size_m,
        config.demand_ratio,
        config.max_cells,
        &mut model,
    )
}

/// Aggregate figures for a grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridSummary {
    /// Number of cells.
    pub cells: usize,
    /// Sum of population.
    pub total_population: u64,
    /// Sum of demand.
    pub total_demand: f64,
    /// Cells with zero population.
    pub uninhabited_cells: usize,
    /// Identifier of the cell with the highest demand.
    pub max_cell: Option<String>,
    /// Demand of that cell.
    pub max_demand: f64,
}

impl GridSummary {
    /// Summarize `meshes`.
    #[must_use]
    pub fn from_meshes(meshes: &[Mesh]) -> Self {
        let mut summary = Self {
            cells: meshes.len(),
            ..Self::default()
        };
        for mesh in meshes {
            summary.total_population += u64::from(mesh.population);
            summary.total_demand += mesh.demand;
            if mesh.population == 0 {
                summary.uninhabited_cells += 1;
            }
            if summary.max_cell.is_none() || mesh.demand > summary.max_demand {
                summary.max_cell = Some(mesh.id.clone());
                summary.max_demand = mesh.demand;
            }
        }
        summary
    }
}
