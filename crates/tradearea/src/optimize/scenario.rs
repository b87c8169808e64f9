use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{greedy, mip_style, Algorithm, Constraints, OptimizationResult};
use crate::candidates::CandidateSite;
use crate::capture::Facility;
use crate::error::{Error, Result};
use crate::grid::Mesh;

/// One configuration to compare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Label shown in comparisons.
    pub name: String,
    /// Algorithm to run.
    pub algorithm: Algorithm,
    /// Stores to place.
    pub num_stores: usize,
    /// Constraints for this run.
    pub constraints: Constraints,
}

/// A scenario and its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    /// Position in the input list, from 1.
    pub scenario_index: usize,
    /// Scenario label.
    pub name: String,
    /// Algorithm used.
    pub algorithm: Algorithm,
    /// Stores requested.
    pub num_stores: usize,
    /// Result of the run.
    pub result: OptimizationResult,
}

/// Aggregates over all scenarios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSummary {
    /// Number of scenarios run.
    pub total_scenarios: usize,
    /// Mean captured demand.
    pub average_demand: f64,
    /// Mean coverage, in percent.
    pub average_coverage: f64,
    /// Lowest captured demand.
    pub min_demand: f64,
    /// Highest captured demand.
    pub max_demand: f64,
}

/// Outcome of [`multi_scenario`].
///
/// The `best_by_*` fields index into `scenarios`; the earliest scenario wins
/// ties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioComparison {
    /// Every scenario in input order.
    pub scenarios: Vec<ScenarioOutcome>,
    /// Scenario with the most captured demand.
    pub best_by_demand: usize,
    /// Scenario with the highest coverage.
    pub best_by_coverage: usize,
    /// Scenario with the most demand per investment.
    pub best_by_efficiency: usize,
    /// Aggregates.
    pub summary: ScenarioSummary,
}

impl ScenarioComparison {
    /// The scenario with the most captured demand.
    #[must_use]
    pub fn best_demand(&self) -> &ScenarioOutcome {
        &self.scenarios[self.best_by_demand]
    }

    /// The scenario with the highest coverage.
    #[must_use]
    pub fn best_coverage(&self) -> &ScenarioOutcome {
        &self.scenarios[self.best_by_coverage]
    }

    /// The scenario with the most demand per investment.
    #[must_use]
    pub fn best_efficiency(&self) -> &ScenarioOutcome {
        &self.scenarios[self.best_by_efficiency]
    }
}

fn best_by(outcomes: &[ScenarioOutcome], key: impl Fn(&OptimizationResult) -> f64) -> usize {
    let mut best = 0;
    for (i, outcome) in outcomes.iter().enumerate().skip(1) {
        if key(&outcome.result) > key(&outcomes[best].result) {
            best = i;
        }
    }
    best
}

/// Run every scenario on the same candidates and grid and compare them.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when `scenarios` is empty, or the first
/// error from a scenario run.
pub fn multi_scenario<R: Rng + ?Sized>(
    candidates: &[CandidateSite],
    meshes: &[Mesh],
    existing: &[Facility],
    scenarios: &[Scenario],
    rng: &mut R,
) -> Result<ScenarioComparison> {
    if scenarios.is_empty() {
        return Err(Error::invalid("at least one scenario is required"));
    }

    let mut outcomes = Vec::with_capacity(scenarios.len());
    for (i, scenario) in scenarios.iter().enumerate() {
        let result = match scenario.algorithm {
            Algorithm::Greedy => greedy(
                candidates,
                meshes,
                existing,
                scenario.num_stores,
                &scenario.constraints,
            )?,
            Algorithm::Mip => mip_style(
                candidates,
                meshes,
                existing,
                scenario.num_stores,
                &scenario.constraints,
                rng,
            )?,
        };
        info!(
            scenario = %scenario.name,
            demand = result.total_demand_captured,
            coverage = result.coverage,
            "scenario complete"
        );
        outcomes.push(ScenarioOutcome {
            scenario_index: i + 1,
            name: scenario.name.clone(),
            algorithm: scenario.algorithm,
            num_stores: scenario.num_stores,
            result,
        });
    }

    let demands: Vec<f64> = outcomes.iter().map(|o| o.result.total_demand_captured).collect();
    let n = outcomes.len() as f64;
    let summary = ScenarioSummary {
        total_scenarios: outcomes.len(),
        average_demand: demands.iter().sum::<f64>() / n,
        average_coverage: outcomes.iter().map(|o| o.result.coverage).sum::<f64>() / n,
        min_demand: demands.iter().copied().fold(f64::INFINITY, f64::min),
        max_demand: demands.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    };

    Ok(ScenarioComparison {
        best_by_demand: best_by(&outcomes, |r| r.total_demand_captured),
        best_by_coverage: best_by(&outcomes, |r| r.coverage),
        best_by_efficiency: best_by(&outcomes, |r| r.metrics.efficiency),
        scenarios: outcomes,
        summary,
    })
}

/// The four standard scenarios around a base configuration:
/// conservative, standard, optimized and aggressive.
///
/// Scenarios take their spacing from `base` but never its budget.
#[must_use]
pub fn default_scenarios(num_stores: usize, base: &Constraints) -> Vec<Scenario> {
    let base = &base.unbudgeted();
    let conservative_stores = num_stores.saturating_sub(2).max(1);
    vec![
        Scenario {
            name: format!("Conservative ({conservative_stores} stores)"),
            algorithm: Algorithm::Greedy,
            num_stores: conservative_stores,
            constraints: Constraints {
                min_distance_km: base.min_distance_km + 0.2,
                ..base.clone()
            },
        },
        Scenario {
            name: "Standard (Greedy)".to_string(),
            algorithm: Algorithm::Greedy,
            num_stores,
            constraints: base.clone(),
        },
        Scenario {
            name: "Optimized (MIP)".to_string(),
            algorithm: Algorithm::Mip,
            num_stores,
            constraints: base.clone(),
        },
        Scenario {
            name: "Aggressive (More stores)".to_string(),
            algorithm: Algorithm::Greedy,
            num_stores: num_stores + 2,
            constraints: Constraints {
                max_radius_km: base.max_radius_km + 0.5,
                min_distance_km: (base.min_distance_km - 0.1).max(0.2),
                ..base.clone()
            },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_default_scenarios() {
        let base = Constraints::default();
        let scenarios = default_scenarios(5, &base);
        assert_eq!(scenarios.len(), 4);
        assert_eq!(scenarios[0].num_stores, 3);
        assert!((scenarios[0].constraints.min_distance_km - 0.7).abs() < 1e-12);
        assert_eq!(scenarios[1].constraints, base);
        assert_eq!(scenarios[2].algorithm, Algorithm::Mip);
        assert_eq!(scenarios[3].num_stores, 7);
        assert!((scenarios[3].constraints.max_radius_km - 2.5).abs() < 1e-12);
        assert!((scenarios[3].constraints.min_distance_km - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_default_scenarios_ignore_budget() {
        let base = Constraints {
            max_budget: Some(1.5 * Constraints::default().store_cost),
            max_iterations: 15,
            ..tight_constraints()
        };
        let scenarios = default_scenarios(3, &base);
        for scenario in &scenarios {
            assert!(scenario.constraints.max_budget.is_none());
            assert_eq!(scenario.constraints.max_iterations, 100);
        }

        let mut rng = StdRng::seed_from_u64(5);
        let comparison =
            multi_scenario(&lattice_candidates(), &uniform_grid(), &[], &scenarios, &mut rng)
                .unwrap();
        // A budget for one store and a half would have stopped each run at one
        assert_eq!(comparison.scenarios[1].result.total_stores, 3);
    }

    #[test]
    fn test_default_scenarios_small_counts() {
        let base = Constraints {
            min_distance_km: 0.25,
            ..Constraints::default()
        };
        let scenarios = default_scenarios(1, &base);
        assert_eq!(scenarios[0].num_stores, 1);
        assert!((scenarios[3].constraints.min_distance_km - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_multi_scenario_requires_scenarios() {
        let meshes = uniform_grid();
        let mut rng = StdRng::seed_from_u64(0);
        let err = multi_scenario(&lattice_candidates(), &meshes, &[], &[], &mut rng).unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_multi_scenario_compares_results() {
        let meshes = uniform_grid();
        let candidates = lattice_candidates();
        let base = Constraints {
            max_iterations: 15,
            ..tight_constraints()
        };
        let scenarios = default_scenarios(3, &base);
        let mut rng = StdRng::seed_from_u64(17);
        let comparison = multi_scenario(&candidates, &meshes, &[], &scenarios, &mut rng).unwrap();

        assert_eq!(comparison.scenarios.len(), 4);
        assert_eq!(comparison.summary.total_scenarios, 4);
        assert_eq!(comparison.scenarios[0].scenario_index, 1);
        let best = comparison.best_demand().result.total_demand_captured;
        for outcome in &comparison.scenarios {
            assert!(outcome.result.total_demand_captured <= best);
        }
        assert_eq!(comparison.summary.max_demand, best);
        assert!(comparison.summary.min_demand <= comparison.summary.average_demand);
        // Five stores with a wider radius should capture the most
        assert_eq!(comparison.best_demand().name, "Aggressive (More stores)");
    }

    #[test]
    fn test_best_by_prefers_first_on_ties() {
        let meshes = uniform_grid();
        let candidates = lattice_candidates();
        let base = tight_constraints();
        let same = Scenario {
            name: "a".to_string(),
            algorithm: Algorithm::Greedy,
            num_stores: 2,
            constraints: base,
        };
        let twin = Scenario {
            name: "b".to_string(),
            ..same.clone()
        };
        let mut rng = StdRng::seed_from_u64(3);
        let comparison =
            multi_scenario(&candidates, &meshes, &[], &[same, twin], &mut rng).unwrap();
        assert_eq!(comparison.best_by_demand, 0);
        assert_eq!(comparison.best_by_coverage, 0);
        assert_eq!(comparison.best_by_efficiency, 0);
    }
}
