//! Site selection.
//!
//! Given candidate sites and a demand grid, pick the set of new stores that
//! captures the most demand under the gravity model. Existing facilities
//! passed in stay fixed and compete for demand but are never selected or
//! counted.
//!
//! - [`greedy`] adds one store at a time by largest incremental capture.
//! - [`mip_style`] improves a greedy start with swap local search and
//!   random restarts.
//! - [`competitive_optimization`] runs greedy and then measures the result
//!   against competitor stores.
//! - [`multi_scenario`] compares several configurations side by side.

mod competitive;
mod greedy;
mod local_search;
mod scenario;

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::candidates::CandidateSite;
use crate::capture::{
    background_utility, capture_demand, captured_demand, coverage_pct, CaptureParams, Facility,
    FacilityKind, UtilityMatrix,
};
use crate::config::OptimizationConfig;
use crate::error::{Error, Result};
use crate::geo::GeoPoint;
use crate::grid::Mesh;

pub use competitive::{
    competitive_analysis, competitive_optimization, CompetitiveAnalysis, CompetitiveOptimization,
    CompetitiveParams, CompetitiveStore, CompetitiveSummary, GroupPerformance,
};
pub use greedy::greedy;
pub use local_search::mip_style;
pub use scenario::{
    default_scenarios, multi_scenario, Scenario, ScenarioComparison, ScenarioOutcome,
    ScenarioSummary,
};

/// Improvements smaller than this are treated as ties.
const IMPROVEMENT_EPSILON: f64 = 1e-9;

/// Selection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// One store at a time by largest incremental capture.
    Greedy,
    /// Greedy start refined by swap local search.
    Mip,
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Greedy => write!(f, "greedy"),
            Self::Mip => write!(f, "mip"),
        }
    }
}

/// Limits and model parameters for a selection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Catchment radius in kilometres.
    pub max_radius_km: f64,
    /// Distance decay exponent.
    pub distance_decay: f64,
    /// Minimum distance between two selected stores.
    pub min_distance_km: f64,
    /// Total budget; `None` means unlimited.
    pub max_budget: Option<f64>,
    /// Cost of one store.
    pub store_cost: f64,
    /// Attractiveness of a selected store.
    pub store_attractiveness: f64,
    /// Local search iteration cap.
    pub max_iterations: usize,
    /// Candidates drawn for a random restart.
    pub restart_pool: usize,
    /// Local search stops at the first idle round after more than this many
    /// rounds.
    pub stall_limit: usize,
}

impl Default for Constraints {
    fn default() -> Self {
        Self::from(&OptimizationConfig::default())
    }
}

impl From<&OptimizationConfig> for Constraints {
    fn from(config: &OptimizationConfig) -> Self {
        Self {
            max_radius_km: config.max_radius_km,
            distance_decay: config.distance_decay,
            min_distance_km: config.min_distance_km,
            max_budget: config.max_budget,
            store_cost: config.store_cost,
            store_attractiveness: config.new_store_attractiveness,
            max_iterations: config.max_iterations,
            restart_pool: config.restart_pool,
            stall_limit: config.stall_limit,
        }
    }
}

impl Constraints {
    /// The same spacing and gravity parameters with no budget and the
    /// default local search cap.
    ///
    /// Scenario comparisons and competitive runs use these, so a budget set
    /// for a single run does not cut their store counts.
    #[must_use]
    pub fn unbudgeted(&self) -> Self {
        Self {
            max_budget: None,
            max_iterations: Self::default().max_iterations,
            ..self.clone()
        }
    }

    /// Gravity model parameters.
    #[must_use]
    pub fn capture_params(&self) -> CaptureParams {
        CaptureParams {
            max_radius_km: self.max_radius_km,
            distance_decay: self.distance_decay,
        }
    }

    /// Check the constraints are usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] describing the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_radius_km.is_nan() || self.max_radius_km <= 0.0 {
            return Err(Error::invalid("max_radius_km must be greater than 0"));
        }
        if self.distance_decay.is_nan() || self.distance_decay <= 0.0 {
            return Err(Error::invalid("distance_decay must be greater than 0"));
        }
        if self.min_distance_km < 0.0 {
            return Err(Error::invalid("min_distance_km must not be negative"));
        }
        if self.store_cost < 0.0 {
            return Err(Error::invalid("store_cost must not be negative"));
        }
        if matches!(self.max_budget, Some(b) if b < 0.0) {
            return Err(Error::invalid("max_budget must not be negative"));
        }
        Ok(())
    }
}

/// A site chosen by an optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedSite {
    /// Store number in selection order, from 1.
    pub store_number: usize,
    /// Id of the candidate this store occupies.
    pub candidate_id: String,
    /// Location.
    pub point: GeoPoint,
    /// Demand this store captures in the final allocation.
    pub demand_captured: f64,
}

/// One greedy step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Step number, from 1.
    pub iteration: usize,
    /// Candidate picked in this step.
    pub candidate_id: String,
    /// Demand the new store takes in this step.
    pub incremental_demand: f64,
    /// Demand captured by all selected stores after this step.
    pub cumulative_demand: f64,
    /// Cost of all selected stores after this step.
    pub cumulative_cost: f64,
    /// Candidates not yet selected.
    pub remaining_candidates: usize,
}

/// Derived ratios of a result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetrics {
    /// Captured demand per selected store.
    pub average_demand_per_store: f64,
    /// Cost per unit of captured demand.
    pub cost_per_demand_unit: f64,
    /// Captured demand per 100 000 of investment.
    pub efficiency: f64,
}

/// Run statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunPerformance {
    /// Wall-clock time of the run.
    pub execution_time_ms: u64,
    /// Greedy steps or local search rounds executed.
    pub iterations_completed: usize,
}

/// Outcome of [`greedy`] or [`mip_style`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    /// Algorithm that produced the result.
    pub algorithm: Algorithm,
    /// Chosen sites.
    pub selected_sites: Vec<SelectedSite>,
    /// Number of chosen sites.
    pub total_stores: usize,
    /// Demand the chosen sites capture, competition included.
    pub total_demand_captured: f64,
    /// Cost of the chosen sites.
    pub total_cost: f64,
    /// Percentage of meshes in which a chosen site holds a share.
    pub coverage: f64,
    /// Greedy steps that built the solution before any swaps.
    pub iterations: Vec<IterationRecord>,
    /// Derived ratios.
    pub metrics: ResultMetrics,
    /// Run statistics.
    pub performance: RunPerformance,
}

impl ResultMetrics {
    fn compute(total_demand: f64, total_cost: f64, stores: usize) -> Self {
        let ratio = |num: f64, den: f64| if den > 0.0 { num / den } else { 0.0 };
        Self {
            average_demand_per_store: ratio(total_demand, stores as f64),
            cost_per_demand_unit: ratio(total_cost, total_demand),
            efficiency: ratio(total_demand, total_cost) * 100_000.0,
        }
    }
}

/// Fast objective evaluation over one candidate set and grid.
///
/// The demand a selection captures is
/// `sum(demand_m * U_m / (B_m + U_m))`, where `U_m` is the selected stores'
/// utility at mesh `m` and `B_m` that of the fixed facilities.
pub(crate) struct Evaluator<'a> {
    meshes: &'a [Mesh],
    candidates: &'a [CandidateSite],
    existing: &'a [Facility],
    matrix: UtilityMatrix,
    background: Vec<f64>,
    constraints: &'a Constraints,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(
        candidates: &'a [CandidateSite],
        meshes: &'a [Mesh],
        existing: &'a [Facility],
        constraints: &'a Constraints,
    ) -> Result<Self> {
        constraints.validate()?;
        for c in candidates {
            c.point.validate()?;
        }
        let params = constraints.capture_params();
        let points: Vec<GeoPoint> = candidates.iter().map(|c| c.point).collect();
        Ok(Self {
            meshes,
            candidates,
            existing,
            matrix: UtilityMatrix::build(
                &points,
                meshes,
                constraints.store_attractiveness,
                &params,
            ),
            background: background_utility(meshes, existing, &params),
            constraints,
        })
    }

    pub(crate) fn constraints(&self) -> &Constraints {
        self.constraints
    }

    pub(crate) fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    /// Selected-store utility per mesh for `selection`.
    pub(crate) fn utility_field(&self, selection: &[usize]) -> Vec<f64> {
        let mut field = vec![0.0; self.meshes.len()];
        for &i in selection {
            self.add_to_field(&mut field, i);
        }
        field
    }

    pub(crate) fn add_to_field(&self, field: &mut [f64], candidate: usize) {
        for &(m, u) in self.matrix.row(candidate) {
            field[m] += u;
        }
    }

    /// Demand captured by the selection whose utility field is `field`.
    pub(crate) fn objective_of_field(&self, field: &[f64]) -> f64 {
        field
            .iter()
            .zip(&self.background)
            .zip(self.meshes)
            .filter(|((u, _), _)| **u > 0.0)
            .map(|((u, b), mesh)| mesh.demand * u / (b + u))
            .sum()
    }

    /// Demand captured by `selection`.
    pub(crate) fn objective(&self, selection: &[usize]) -> f64 {
        self.objective_of_field(&self.utility_field(selection))
    }

    /// Demand candidate `i` would take if added to the selection with
    /// utility field `field`.
    pub(crate) fn incremental(&self, field: &[f64], i: usize) -> f64 {
        self.matrix
            .row(i)
            .iter()
            .map(|&(m, u)| self.meshes[m].demand * u / (self.background[m] + field[m] + u))
            .sum()
    }

    /// Whether candidate `i` lies within the minimum distance of any of
    /// `others`.
    pub(crate) fn too_close(&self, i: usize, others: impl IntoIterator<Item = usize>) -> bool {
        let point = self.candidates[i].point;
        others.into_iter().any(|j| {
            j != i && point.distance_km(&self.candidates[j].point) < self.constraints.min_distance_km
        })
    }

    pub(crate) fn candidate_id(&self, i: usize) -> &str {
        &self.candidates[i].id
    }

    /// Build the reported result for `selection`, allocating demand with
    /// the full gravity model.
    pub(crate) fn finish(
        &self,
        algorithm: Algorithm,
        selection: &[usize],
        iterations: Vec<IterationRecord>,
        iterations_completed: usize,
        started: Instant,
    ) -> OptimizationResult {
        let mut facilities: Vec<Facility> = selection
            .iter()
            .enumerate()
            .map(|(k, &i)| {
                Facility::new(
                    format!("store_{k}"),
                    self.candidates[i].point,
                    self.constraints.store_attractiveness,
                    FacilityKind::New,
                )
            })
            .collect();
        facilities.extend(self.existing.iter().cloned());

        let params = self.constraints.capture_params();
        let captures = capture_demand(self.meshes, &facilities, &params);
        let selected = selection.len();
        let total_demand = captured_demand(self.meshes, &captures, |f| f < selected);

        let selected_sites = selection
            .iter()
            .enumerate()
            .map(|(k, &i)| SelectedSite {
                store_number: k + 1,
                candidate_id: self.candidates[i].id.clone(),
                point: self.candidates[i].point,
                demand_captured: captured_demand(self.meshes, &captures, |f| f == k),
            })
            .collect();

        let total_cost = selected as f64 * self.constraints.store_cost;
        // Elapsed milliseconds fit comfortably in u64
        #[allow(clippy::cast_possible_truncation)]
        let execution_time_ms = started.elapsed().as_millis() as u64;

        OptimizationResult {
            algorithm,
            selected_sites,
            total_stores: selected,
            total_demand_captured: total_demand,
            total_cost,
            coverage: coverage_pct(&captures, |f| f < selected),
            iterations,
            metrics: ResultMetrics::compute(total_demand, total_cost, selected),
            performance: RunPerformance {
                execution_time_ms,
                iterations_completed,
            },
        }
    }
}
