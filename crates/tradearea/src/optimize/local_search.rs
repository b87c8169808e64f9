use std::time::Instant;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

use super::greedy::greedy_select;
use super::{Algorithm, Constraints, Evaluator, OptimizationResult, IMPROVEMENT_EPSILON};
use crate::candidates::CandidateSite;
use crate::capture::Facility;
use crate::error::Result;
use crate::grid::Mesh;

/// Random restarts stop this many rounds before the iteration cap.
const RESTART_CUTOFF: usize = 10;

/// First-improvement swap: replace one selected site with an unselected
/// candidate. Returns the new objective when a better selection was found.
fn try_swap(eval: &Evaluator<'_>, selection: &mut [usize], best: f64) -> Option<f64> {
    for pos in 0..selection.len() {
        let others: Vec<usize> = selection
            .iter()
            .enumerate()
            .filter(|(k, _)| *k != pos)
            .map(|(_, &i)| i)
            .collect();
        for candidate in 0..eval.candidate_count() {
            if selection.contains(&candidate) || eval.too_close(candidate, others.iter().copied()) {
                continue;
            }
            let previous = selection[pos];
            selection[pos] = candidate;
            let objective = eval.objective(selection);
            if objective > best + IMPROVEMENT_EPSILON {
                return Some(objective);
            }
            selection[pos] = previous;
        }
    }
    None
}

/// Improve a greedy selection by local search.
///
/// Each round tries swaps until the first one that raises captured demand.
/// A round without an improving swap runs greedy again on a random pool of
/// `restart_pool` candidates and keeps it if better; restarts stop
/// ten rounds before `max_iterations`. The search ends after
/// `max_iterations` rounds, or at the first idle round once more than
/// `stall_limit` rounds have passed. The result is never worse than the greedy start.
///
/// # Errors
///
/// Returns an error if the constraints or candidate coordinates are invalid.
pub fn mip_style<R: Rng + ?Sized>(
    candidates: &[CandidateSite],
    meshes: &[Mesh],
    existing: &[Facility],
    num_stores: usize,
    constraints: &Constraints,
    rng: &mut R,
) -> Result<OptimizationResult> {
    let started = Instant::now();
    let eval = Evaluator::new(candidates, meshes, existing, constraints)?;
    let all: Vec<usize> = (0..eval.candidate_count()).collect();

    let (mut selection, mut history) = greedy_select(&eval, &all, num_stores);
    let mut best = eval.objective(&selection);
    debug!(objective = best, "initial greedy solution");

    let restart_until = constraints.max_iterations.saturating_sub(RESTART_CUTOFF);
    let mut rounds = 0;
    for iteration in 0..constraints.max_iterations {
        rounds = iteration + 1;
        let mut improved = false;

        if let Some(objective) = try_swap(&eval, &mut selection, best) {
            debug!(iteration = rounds, objective, previous = best, "swap improved solution");
            best = objective;
            improved = true;
        }

        if !improved && iteration < restart_until {
            let mut pool = all.clone();
            pool.shuffle(rng);
            pool.truncate(constraints.restart_pool);
            let (restart, restart_history) = greedy_select(&eval, &pool, num_stores);
            let objective = eval.objective(&restart);
            if objective > best + IMPROVEMENT_EPSILON {
                debug!(iteration = rounds, objective, "random restart improved solution");
                selection = restart;
                history = restart_history;
                best = objective;
                improved = true;
            }
        }

        if !improved && iteration > constraints.stall_limit {
            debug!(iteration = rounds, "no improvement, stopping");
            break;
        }
    }

    let result = eval.finish(Algorithm::Mip, &selection, history, rounds, started);
    info!(
        stores = result.total_stores,
        demand = result.total_demand_captured,
        rounds,
        "local search optimization complete"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::greedy;
    use super::*;
    use crate::geo::GeoPoint;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_mip_never_worse_than_greedy() {
        let meshes = uniform_grid();
        let candidates = lattice_candidates();
        let constraints = Constraints {
            max_iterations: 30,
            ..tight_constraints()
        };
        let base = greedy(&candidates, &meshes, &[], 4, &constraints).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let refined = mip_style(&candidates, &meshes, &[], 4, &constraints, &mut rng).unwrap();

        assert_eq!(refined.algorithm, Algorithm::Mip);
        assert_eq!(refined.total_stores, 4);
        assert!(refined.total_demand_captured >= base.total_demand_captured - 1e-6);
        assert!(refined.performance.iterations_completed <= 30);
    }

    #[test]
    fn test_mip_keeps_count_when_spacing_blocks_pairs() {
        // The central site crowds out both neighbours; a swap cannot add a store
        let meshes = uniform_grid();
        let candidates = vec![
            CandidateSite::new("center", GeoPoint { lat: 35.682, lng: 139.698 }),
            CandidateSite::new("west", GeoPoint { lat: 35.682, lng: 139.687 }),
            CandidateSite::new("east", GeoPoint { lat: 35.682, lng: 139.709 }),
        ];
        let constraints = Constraints {
            min_distance_km: 1.2,
            max_iterations: 15,
            ..tight_constraints()
        };
        let base = greedy(&candidates, &meshes, &[], 2, &constraints).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let refined = mip_style(&candidates, &meshes, &[], 2, &constraints, &mut rng).unwrap();
        assert_eq!(base.total_stores, 1);
        assert_eq!(refined.total_stores, 1);
        assert!(refined.total_demand_captured >= base.total_demand_captured - 1e-6);
    }

    #[test]
    fn test_mip_is_deterministic_with_seed() {
        let meshes = uniform_grid();
        let candidates = lattice_candidates();
        let constraints = Constraints {
            max_iterations: 25,
            restart_pool: 8,
            ..tight_constraints()
        };
        let a = mip_style(&candidates, &meshes, &[], 3, &constraints, &mut StdRng::seed_from_u64(5))
            .unwrap();
        let b = mip_style(&candidates, &meshes, &[], 3, &constraints, &mut StdRng::seed_from_u64(5))
            .unwrap();
        assert_eq!(a.selected_sites, b.selected_sites);
        assert_eq!(a.total_demand_captured, b.total_demand_captured);
    }

    #[test]
    fn test_mip_stops_on_stall() {
        let meshes = uniform_grid();
        let candidates = lattice_candidates();
        let constraints = Constraints {
            max_iterations: 100,
            stall_limit: 2,
            ..tight_constraints()
        };
        let mut rng = StdRng::seed_from_u64(9);
        let result = mip_style(&candidates, &meshes, &[], 2, &constraints, &mut rng).unwrap();
        assert!(result.performance.iterations_completed < 100);
    }

    #[test]
    fn test_mip_idle_rounds_run_past_stall_limit() {
        // One candidate leaves nothing to swap, so every round is idle
        let meshes = uniform_grid();
        let candidates = lattice_candidates();
        let constraints = Constraints {
            stall_limit: 0,
            ..tight_constraints()
        };
        let mut rng = StdRng::seed_from_u64(1);
        let result =
            mip_style(&candidates[..1], &meshes, &[], 1, &constraints, &mut rng).unwrap();
        assert_eq!(result.total_stores, 1);
        assert_eq!(result.performance.iterations_completed, 2);
    }

    #[test]
    fn test_mip_with_no_candidates() {
        let meshes = uniform_grid();
        let mut rng = StdRng::seed_from_u64(0);
        let result = mip_style(&[], &meshes, &[], 3, &tight_constraints(), &mut rng).unwrap();
        assert_eq!(result.total_stores, 0);
        assert_eq!(result.total_demand_captured, 0.0);
    }
}
