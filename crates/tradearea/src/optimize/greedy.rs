use std::time::Instant;

use tracing::{debug, info};

use super::{Algorithm, Constraints, Evaluator, IterationRecord, OptimizationResult, IMPROVEMENT_EPSILON};
use crate::candidates::CandidateSite;
use crate::capture::Facility;
use crate::error::Result;
use crate::grid::Mesh;

/// Greedy selection restricted to the candidate indices in `pool`.
///
/// Returns the chosen indices in selection order and the step history.
pub(super) fn greedy_select(
    eval: &Evaluator<'_>,
    pool: &[usize],
    num_stores: usize,
) -> (Vec<usize>, Vec<IterationRecord>) {
    let constraints = eval.constraints();
    let mut remaining: Vec<usize> = pool.to_vec();
    let mut selected: Vec<usize> = Vec::with_capacity(num_stores);
    let mut history = Vec::with_capacity(num_stores);
    let mut field = eval.utility_field(&[]);
    let mut total_cost = 0.0;

    for iteration in 1..=num_stores {
        if remaining.is_empty() {
            debug!(iteration, "candidates exhausted");
            break;
        }
        if let Some(budget) = constraints.max_budget {
            if total_cost + constraints.store_cost > budget {
                debug!(iteration, total_cost, budget, "budget reached");
                break;
            }
        }

        let mut best: Option<(usize, f64)> = None;
        for (pos, &candidate) in remaining.iter().enumerate() {
            if eval.too_close(candidate, selected.iter().copied()) {
                continue;
            }
            let gain = eval.incremental(&field, candidate);
            let threshold = best.map_or(IMPROVEMENT_EPSILON, |(_, g)| g);
            if gain > threshold {
                best = Some((pos, gain));
            }
        }

        let Some((pos, gain)) = best else {
            debug!(iteration, "no candidate adds demand");
            break;
        };
        let candidate = remaining.remove(pos);
        eval.add_to_field(&mut field, candidate);
        selected.push(candidate);
        total_cost += constraints.store_cost;

        let cumulative = eval.objective_of_field(&field);
        debug!(
            iteration,
            candidate = eval.candidate_id(candidate),
            incremental = gain,
            cumulative,
            "selected site"
        );
        history.push(IterationRecord {
            iteration,
            candidate_id: eval.candidate_id(candidate).to_string(),
            incremental_demand: gain,
            cumulative_demand: cumulative,
            cumulative_cost: total_cost,
            remaining_candidates: remaining.len(),
        });
    }

    (selected, history)
}

/// Pick up to `num_stores` sites, one at a time, each time taking the
/// candidate that captures the most demand given the stores already chosen
/// and the fixed `existing` facilities.
///
/// Candidates closer than `min_distance_km` to a chosen site are skipped.
/// Selection stops early when candidates run out, when no candidate adds
/// demand, or when another store would exceed the budget.
///
/// # Errors
///
/// Returns an error if the constraints or candidate coordinates are invalid.
pub fn greedy(
    candidates: &[CandidateSite],
    meshes: &[Mesh],
    existing: &[Facility],
    num_stores: usize,
    constraints: &Constraints,
) -> Result<OptimizationResult> {
    let started = Instant::now();
    let eval = Evaluator::new(candidates, meshes, existing, constraints)?;
    let pool: Vec<usize> = (0..eval.candidate_count()).collect();

    let (selection, history) = greedy_select(&eval, &pool, num_stores);
    let steps = history.len();
    let result = eval.finish(Algorithm::Greedy, &selection, history, steps, started);
    info!(
        stores = result.total_stores,
        demand = result.total_demand_captured,
        coverage = result.coverage,
        "greedy optimization complete"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::capture::FacilityKind;
    use crate::geo::GeoPoint;

    #[test]
    fn test_greedy_selects_requested_count() {
        let meshes = uniform_grid();
        let candidates = lattice_candidates();
        let result = greedy(&candidates, &meshes, &[], 3, &tight_constraints()).unwrap();

        assert_eq!(result.algorithm, Algorithm::Greedy);
        assert_eq!(result.total_stores, 3);
        assert_eq!(result.selected_sites.len(), 3);
        assert_eq!(result.iterations.len(), 3);
        assert_eq!(result.total_cost, 3.0 * 1_000_000.0);
        assert!(result.total_demand_captured > 0.0);
        assert!(result.coverage > 0.0 && result.coverage <= 100.0);
        assert_eq!(result.selected_sites[0].store_number, 1);
    }

    #[test]
    fn test_greedy_respects_min_distance() {
        let meshes = uniform_grid();
        let candidates = lattice_candidates();
        let constraints = Constraints {
            min_distance_km: 1.5,
            ..tight_constraints()
        };
        let result = greedy(&candidates, &meshes, &[], 4, &constraints).unwrap();
        for (i, a) in result.selected_sites.iter().enumerate() {
            for b in &result.selected_sites[i + 1..] {
                assert!(a.point.distance_km(&b.point) >= 1.5);
            }
        }
    }

    #[test]
    fn test_greedy_history_is_non_decreasing() {
        let meshes = uniform_grid();
        let candidates = lattice_candidates();
        let result = greedy(&candidates, &meshes, &[], 5, &tight_constraints()).unwrap();
        let mut previous = 0.0;
        for record in &result.iterations {
            assert!(record.cumulative_demand >= previous - 1e-9);
            previous = record.cumulative_demand;
        }
        let last = result.iterations.last().unwrap();
        assert!((last.cumulative_demand - result.total_demand_captured).abs() < 1e-6);
        assert_eq!(last.remaining_candidates, candidates.len() - 5);
    }

    #[test]
    fn test_greedy_stops_at_budget() {
        let meshes = uniform_grid();
        let candidates = lattice_candidates();
        let constraints = Constraints {
            max_budget: Some(2_500_000.0),
            ..tight_constraints()
        };
        let result = greedy(&candidates, &meshes, &[], 5, &constraints).unwrap();
        assert_eq!(result.total_stores, 2);
        assert!(result.total_cost <= 2_500_000.0);
    }

    #[test]
    fn test_greedy_stops_when_candidates_run_out() {
        let meshes = uniform_grid();
        let candidates = lattice_candidates()[..2].to_vec();
        let result = greedy(&candidates, &meshes, &[], 5, &tight_constraints()).unwrap();
        assert_eq!(result.total_stores, 2);
    }

    #[test]
    fn test_greedy_skips_candidates_without_demand() {
        let meshes = uniform_grid();
        let candidates = vec![CandidateSite::new("far", GeoPoint { lat: 43.0, lng: 141.3 })];
        let result = greedy(&candidates, &meshes, &[], 2, &tight_constraints()).unwrap();
        assert_eq!(result.total_stores, 0);
        assert_eq!(result.total_demand_captured, 0.0);
        assert_eq!(result.metrics.efficiency, 0.0);
    }

    #[test]
    fn test_greedy_zero_stores() {
        let meshes = uniform_grid();
        let result = greedy(&lattice_candidates(), &meshes, &[], 0, &tight_constraints()).unwrap();
        assert_eq!(result.total_stores, 0);
        assert_eq!(result.coverage, 0.0);
    }

    #[test]
    fn test_greedy_avoids_existing_store_area() {
        let meshes = uniform_grid();
        let candidates = lattice_candidates();
        // A strong existing store on candidate 12 makes that spot unattractive
        let existing = vec![Facility::new(
            "own",
            candidates[12].point,
            5.0,
            FacilityKind::Existing,
        )];
        let result = greedy(&candidates, &meshes, &existing, 1, &tight_constraints()).unwrap();
        assert_ne!(result.selected_sites[0].candidate_id, "candidate_12");
    }

    #[test]
    fn test_greedy_first_pick_is_best_single_site() {
        let meshes = uniform_grid();
        let candidates = lattice_candidates();
        let constraints = tight_constraints();
        let eval = Evaluator::new(&candidates, &meshes, &[], &constraints).unwrap();
        let best_single = (0..candidates.len())
            .map(|i| eval.objective(&[i]))
            .fold(0.0, f64::max);
        let result = greedy(&candidates, &meshes, &[], 1, &constraints).unwrap();
        assert!((result.total_demand_captured - best_single).abs() < 1e-6);
    }
}
