//! Candidate site generation.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::geo::{Bounds, GeoPoint};
use crate::grid::Mesh;

/// Attempts made to place each candidate before giving up on it.
pub const MAX_PLACEMENT_ATTEMPTS: usize = 50;

/// A potential store site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSite {
    /// Identifier, `candidate_{i}` for sampled sites.
    pub id: String,
    /// Location.
    pub point: GeoPoint,
}

impl CandidateSite {
    /// Create a site.
    #[must_use]
    pub fn new(id: impl Into<String>, point: GeoPoint) -> Self {
        Self {
            id: id.into(),
            point,
        }
    }
}

/// Sample up to `count` sites uniformly within `bounds`.
///
/// A sample closer than `spacing_km` to an existing store or an earlier
/// candidate is rejected; after [`MAX_PLACEMENT_ATTEMPTS`] rejections the
/// slot is skipped, so fewer than `count` sites may come back. Ids keep the
/// slot number, so gaps are possible.
///
/// # Errors
///
/// Returns an error if `bounds` is invalid.
pub fn generate_candidate_sites<R: Rng + ?Sized>(
    bounds: &Bounds,
    count: usize,
    existing: &[GeoPoint],
    spacing_km: f64,
    rng: &mut R,
) -> Result<Vec<CandidateSite>> {
    bounds.validate()?;
    let mut candidates: Vec<CandidateSite> = Vec::with_capacity(count);
    let mut skipped = 0_usize;

    for i in 0..count {
        let mut placed = false;
        for _ in 0..MAX_PLACEMENT_ATTEMPTS {
            let point = GeoPoint {
                lat: bounds.south + rng.random::<f64>() * (bounds.north - bounds.south),
                lng: bounds.west + rng.random::<f64>() * (bounds.east - bounds.west),
            };
            let too_close = existing
                .iter()
                .chain(candidates.iter().map(|c| &c.point))
                .any(|other| point.distance_km(other) < spacing_km);
            if !too_close {
                candidates.push(CandidateSite::new(format!("candidate_{i}"), point));
                placed = true;
                break;
            }
        }
        if !placed {
            skipped += 1;
        }
    }

    if skipped > 0 {
        warn!(
            requested = count,
            placed = candidates.len(),
            skipped,
            "area too crowded to place every candidate"
        );
    }
    debug!(count = candidates.len(), "generated candidate sites");
    Ok(candidates)
}

/// Use the centres of the `top_n` highest-demand meshes as candidates.
///
/// Ties keep grid order.
#[must_use]
pub fn candidates_from_meshes(meshes: &[Mesh], top_n: usize) -> Vec<CandidateSite> {
    let mut ranked: Vec<&Mesh> = meshes.iter().collect();
    ranked.sort_by(|a, b| b.demand.total_cmp(&a.demand));
    ranked
        .into_iter()
        .take(top_n)
        .map(|m| CandidateSite::new(format!("candidate_{}", m.id), m.center))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{generate_demand_grid, UniformPopulation, DEFAULT_MAX_CELLS};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn bounds() -> Bounds {
        Bounds::new(35.70, 35.66, 139.72, 139.68).unwrap()
    }

    #[test]
    fn test_candidates_inside_bounds_and_spaced() {
        let mut rng = StdRng::seed_from_u64(3);
        let sites = generate_candidate_sites(&bounds(), 20, &[], 0.2, &mut rng).unwrap();
        assert_eq!(sites.len(), 20);
        for (i, a) in sites.iter().enumerate() {
            assert!(bounds().contains(&a.point));
            for b in &sites[i + 1..] {
                assert!(a.point.distance_km(&b.point) >= 0.2);
            }
        }
        assert_eq!(sites[0].id, "candidate_0");
    }

    #[test]
    fn test_candidates_avoid_existing_stores() {
        let existing = [bounds().center()];
        let mut rng = StdRng::seed_from_u64(5);
        let sites = generate_candidate_sites(&bounds(), 30, &existing, 0.5, &mut rng).unwrap();
        for s in &sites {
            assert!(s.point.distance_km(&existing[0]) >= 0.5);
        }
    }

    #[test]
    fn test_crowded_area_returns_fewer_sites() {
        // A ~110 m square cannot hold many sites 200 m apart
        let tiny = Bounds::new(35.681, 35.680, 139.701, 139.700).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let sites = generate_candidate_sites(&tiny, 10, &[], 0.2, &mut rng).unwrap();
        assert_eq!(sites.len(), 1);
    }

    #[test]
    fn test_same_seed_same_sites() {
        let a = generate_candidate_sites(&bounds(), 10, &[], 0.2, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = generate_candidate_sites(&bounds(), 10, &[], 0.2, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_bounds() {
        let bad = Bounds {
            north: 1.0,
            south: 2.0,
            east: 3.0,
            west: 2.0,
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert!(generate_candidate_sites(&bad, 5, &[], 0.2, &mut rng).is_err());
    }

    #[test]
    fn test_candidates_from_meshes_ranked_by_demand() {
        let mut meshes = generate_demand_grid(
            &bounds(),
            1000.0,
            1.0,
            DEFAULT_MAX_CELLS,
            &mut UniformPopulation(10),
        )
        .unwrap();
        meshes[3].demand = 500.0;
        meshes[1].demand = 300.0;
        let sites = candidates_from_meshes(&meshes, 2);
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].point, meshes[3].center);
        assert_eq!(sites[1].point, meshes[1].center);
        assert!(candidates_from_meshes(&meshes, 0).is_empty());
    }
}
