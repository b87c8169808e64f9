use serde::{Deserialize, Serialize};
use tracing::info;

use super::{greedy, Constraints, OptimizationResult};
use crate::candidates::CandidateSite;
use crate::capture::{capture_demand, market_demand, CaptureParams, Facility, FacilityKind};
use crate::config::OptimizationConfig;
use crate::error::{Error, Result};
use crate::geo::GeoPoint;
use crate::grid::Mesh;

/// Gravity model settings for a head-to-head comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompetitiveParams {
    /// Catchment radius and decay.
    pub capture: CaptureParams,
    /// Attractiveness given to every new store.
    pub new_store_attractiveness: f64,
    /// Attractiveness given to every competitor.
    pub competitor_attractiveness: f64,
}

impl Default for CompetitiveParams {
    fn default() -> Self {
        Self::from(&OptimizationConfig::default())
    }
}

impl From<&OptimizationConfig> for CompetitiveParams {
    fn from(config: &OptimizationConfig) -> Self {
        Self {
            capture: CaptureParams::from(config),
            new_store_attractiveness: config.new_store_attractiveness,
            competitor_attractiveness: config.competitor_attractiveness,
        }
    }
}

/// One store's result in a competitive allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitiveStore {
    /// Store identifier.
    pub id: String,
    /// Store name.
    pub name: Option<String>,
    /// Location.
    pub point: GeoPoint,
    /// Demand captured.
    pub demand_captured: f64,
    /// Share of total market demand, in percent.
    pub market_share: f64,
    /// Meshes where this store shares demand with at least one other store.
    pub competitive_meshes: usize,
}

/// Totals for one side of the comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupPerformance {
    /// Demand captured by the group.
    pub total_demand: f64,
    /// Group share of total market demand, in percent.
    pub market_share: f64,
    /// Demand per store in the group.
    pub average_demand_per_store: f64,
    /// Per-store detail.
    pub stores: Vec<CompetitiveStore>,
}

/// Market-level indicators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompetitiveSummary {
    /// Percentage of meshes in which any store holds a share.
    pub market_coverage: f64,
    /// Mean number of stores sharing a mesh.
    pub average_competition: f64,
    /// Average new store demand relative to the average competitor, in
    /// percent.
    pub new_store_advantage: f64,
}

/// Outcome of [`competitive_analysis`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompetitiveAnalysis {
    /// Demand of all meshes.
    pub total_market_demand: f64,
    /// Proposed stores.
    pub new_stores: GroupPerformance,
    /// Competitor stores.
    pub competitors: GroupPerformance,
    /// Market-level indicators.
    pub summary: CompetitiveSummary,
}

/// Outcome of [`competitive_optimization`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitiveOptimization {
    /// The greedy selection the analysis was run on.
    pub base_optimization: OptimizationResult,
    /// The selection measured against competitors.
    pub analysis: CompetitiveAnalysis,
}

fn pct(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

fn per_store(total: f64, count: usize) -> f64 {
    if count > 0 {
        total / count as f64
    } else {
        0.0
    }
}

/// Allocate demand between proposed stores and competitors.
///
/// Attractiveness on the input facilities is ignored; every new store gets
/// `new_store_attractiveness` and every competitor
/// `competitor_attractiveness`.
#[must_use]
pub fn competitive_analysis(
    new_stores: &[Facility],
    competitors: &[Facility],
    meshes: &[Mesh],
    params: &CompetitiveParams,
) -> CompetitiveAnalysis {
    let facilities: Vec<Facility> = new_stores
        .iter()
        .map(|f| Facility {
            attractiveness: params.new_store_attractiveness,
            kind: FacilityKind::New,
            ..f.clone()
        })
        .chain(competitors.iter().map(|f| Facility {
            attractiveness: params.competitor_attractiveness,
            kind: FacilityKind::Competitor,
            ..f.clone()
        }))
        .collect();
    let captures = capture_demand(meshes, &facilities, &params.capture);
    let market = market_demand(meshes);

    let mut demand = vec![0.0_f64; facilities.len()];
    let mut contested = vec![0_usize; facilities.len()];
    for (mesh, capture) in meshes.iter().zip(&captures) {
        for share in &capture.shares {
            demand[share.facility] += mesh.demand * share.ratio;
            if capture.shares.len() > 1 {
                contested[share.facility] += 1;
            }
        }
    }

    let group = |range: std::ops::Range<usize>| {
        let stores: Vec<CompetitiveStore> = range
            .map(|i| CompetitiveStore {
                id: facilities[i].id.clone(),
                name: facilities[i].name.clone(),
                point: facilities[i].point,
                demand_captured: demand[i],
                market_share: pct(demand[i], market),
                competitive_meshes: contested[i],
            })
            .collect();
        let total: f64 = stores.iter().map(|s| s.demand_captured).sum();
        GroupPerformance {
            total_demand: total,
            market_share: pct(total, market),
            average_demand_per_store: per_store(total, stores.len()),
            stores,
        }
    };
    let split = new_stores.len();
    let new_group = group(0..split);
    let competitor_group = group(split..facilities.len());

    let covered = captures.iter().filter(|c| c.is_captured()).count();
    let shares_total: usize = captures.iter().map(|c| c.shares.len()).sum();
    let competitor_average = if competitor_group.average_demand_per_store > 0.0 {
        competitor_group.average_demand_per_store
    } else {
        1.0
    };
    let summary = CompetitiveSummary {
        market_coverage: pct(covered as f64, captures.len() as f64),
        average_competition: per_store(shares_total as f64, captures.len()),
        new_store_advantage: new_group.average_demand_per_store / competitor_average * 100.0,
    };

    info!(
        new_stores = split,
        competitors = competitors.len(),
        new_share = new_group.market_share,
        "competitive analysis complete"
    );
    CompetitiveAnalysis {
        total_market_demand: market,
        new_stores: new_group,
        competitors: competitor_group,
        summary,
    }
}

/// Choose sites by greedy selection, then measure them against competitors.
///
/// Competitors are left out of the selection itself and only enter the
/// analysis. The selection runs without the budget in `constraints`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when `competitors` is empty, or any error
/// from [`greedy`].
pub fn competitive_optimization(
    candidates: &[CandidateSite],
    meshes: &[Mesh],
    existing: &[Facility],
    competitors: &[Facility],
    num_stores: usize,
    constraints: &Constraints,
    competitor_attractiveness: f64,
) -> Result<CompetitiveOptimization> {
    if competitors.is_empty() {
        return Err(Error::invalid(
            "competitive analysis needs at least one competitor",
        ));
    }
    let constraints = &constraints.unbudgeted();
    let base = greedy(candidates, meshes, existing, num_stores, constraints)?;
    let new_stores: Vec<Facility> = base
        .selected_sites
        .iter()
        .map(|s| {
            Facility::new(
                format!("store_{}", s.store_number),
                s.point,
                constraints.store_attractiveness,
                FacilityKind::New,
            )
            .with_name(s.candidate_id.clone())
        })
        .collect();
    let params = CompetitiveParams {
        capture: constraints.capture_params(),
        new_store_attractiveness: constraints.store_attractiveness,
        competitor_attractiveness,
    };
    let analysis = competitive_analysis(&new_stores, competitors, meshes, &params);
    Ok(CompetitiveOptimization {
        base_optimization: base,
        analysis,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn store(id: &str, lat: f64, lng: f64, kind: FacilityKind) -> Facility {
        Facility::new(id, GeoPoint { lat, lng }, 1.0, kind)
    }

    #[test]
    fn test_analysis_splits_market() {
        let meshes = uniform_grid();
        let new_stores = vec![store("n1", 35.675, 139.69, FacilityKind::New)];
        let rivals = vec![store("c1", 35.69, 139.71, FacilityKind::Competitor)];
        let params = CompetitiveParams {
            capture: CaptureParams {
                max_radius_km: 1.5,
                distance_decay: 1.5,
            },
            ..CompetitiveParams::default()
        };
        let analysis = competitive_analysis(&new_stores, &rivals, &meshes, &params);

        let market: f64 = meshes.iter().map(|m| m.demand).sum();
        assert!((analysis.total_market_demand - market).abs() < 1e-9);
        let captured = analysis.new_stores.total_demand + analysis.competitors.total_demand;
        assert!(captured <= market + 1e-9);
        assert!(analysis.new_stores.total_demand > 0.0);
        assert!(analysis.competitors.total_demand > 0.0);
        assert_eq!(analysis.new_stores.stores.len(), 1);
        assert_eq!(analysis.competitors.stores.len(), 1);
        assert!(analysis.summary.market_coverage > 0.0);
        assert!(analysis.summary.average_competition > 0.0);
    }

    #[test]
    fn test_new_store_advantage_with_equal_footprint() {
        // Symmetric placement: the only difference is attractiveness 1.0 vs 0.8
        let meshes = uniform_grid();
        let new_stores = vec![store("n", 35.682, 139.688, FacilityKind::New)];
        let rivals = vec![store("c", 35.682, 139.708, FacilityKind::Competitor)];
        let analysis =
            competitive_analysis(&new_stores, &rivals, &meshes, &CompetitiveParams::default());
        assert!(analysis.new_stores.total_demand > analysis.competitors.total_demand);
        assert!(analysis.summary.new_store_advantage > 100.0);
        assert!(analysis.new_stores.stores[0].competitive_meshes > 0);
    }

    #[test]
    fn test_analysis_without_competitors() {
        let meshes = uniform_grid();
        let new_stores = vec![store("n", 35.682, 139.698, FacilityKind::New)];
        let analysis = competitive_analysis(&new_stores, &[], &meshes, &CompetitiveParams::default());
        assert_eq!(analysis.competitors.total_demand, 0.0);
        assert_eq!(analysis.competitors.average_demand_per_store, 0.0);
        // Divides by 1 when there is no competitor demand
        assert!(
            (analysis.summary.new_store_advantage - analysis.new_stores.total_demand * 100.0).abs()
                < 1e-6
        );
    }

    #[test]
    fn test_analysis_on_empty_grid() {
        let analysis = competitive_analysis(&[], &[], &[], &CompetitiveParams::default());
        assert_eq!(analysis, CompetitiveAnalysis::default());
    }

    #[test]
    fn test_competitive_optimization_requires_competitors() {
        let meshes = uniform_grid();
        let err = competitive_optimization(
            &lattice_candidates(),
            &meshes,
            &[],
            &[],
            2,
            &tight_constraints(),
            0.8,
        )
        .unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_competitive_optimization_runs_greedy_then_analysis() {
        let meshes = uniform_grid();
        let rivals = vec![store("c1", 35.69, 139.70, FacilityKind::Competitor)];
        let outcome = competitive_optimization(
            &lattice_candidates(),
            &meshes,
            &[],
            &rivals,
            3,
            &tight_constraints(),
            0.8,
        )
        .unwrap();
        assert_eq!(outcome.base_optimization.total_stores, 3);
        assert_eq!(outcome.analysis.new_stores.stores.len(), 3);
        // Competition can only lower what the selection captures
        assert!(
            outcome.analysis.new_stores.total_demand
                <= outcome.base_optimization.total_demand_captured + 1e-6
        );
    }

    #[test]
    fn test_competitive_optimization_ignores_budget() {
        let meshes = uniform_grid();
        let rivals = vec![store("c1", 35.69, 139.70, FacilityKind::Competitor)];
        let constraints = Constraints {
            max_budget: Some(1.5 * Constraints::default().store_cost),
            ..tight_constraints()
        };
        let outcome = competitive_optimization(
            &lattice_candidates(),
            &meshes,
            &[],
            &rivals,
            3,
            &constraints,
            0.8,
        )
        .unwrap();
        assert_eq!(outcome.base_optimization.total_stores, 3);
    }
}
