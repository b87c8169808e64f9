//! Gravity-model (Huff) demand capture.
//!
//! Every facility within the catchment radius of a mesh centre competes for
//! that mesh's demand. A facility's utility is its attractiveness divided by
//! distance raised to the decay exponent; its share is its utility over the
//! sum of utilities in range.

use serde::{Deserialize, Serialize};

use crate::config::OptimizationConfig;
use crate::geo::{Bounds, GeoPoint};
use crate::grid::Mesh;

/// Distances below this are clamped so a store sitting on a mesh centre
/// does not get infinite utility.
pub const MIN_UTILITY_DISTANCE_KM: f64 = 0.1;

/// Role a facility plays in an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacilityKind {
    /// A proposed site.
    New,
    /// One of the operator's own open stores.
    Existing,
    /// A rival's store.
    Competitor,
}

/// A store taking part in demand allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facility {
    /// Identifier, unique within one allocation.
    pub id: String,
    /// Display name.
    pub name: Option<String>,
    /// Location.
    pub point: GeoPoint,
    /// Relative pull of the store; non-positive values take no demand.
    pub attractiveness: f64,
    /// Role of the store.
    pub kind: FacilityKind,
}

impl Facility {
    /// Create a facility.
    #[must_use]
    pub fn new(id: impl Into<String>, point: GeoPoint, attractiveness: f64, kind: FacilityKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            point,
            attractiveness,
            kind,
        }
    }

    /// Attach a display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Parameters of the gravity model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureParams {
    /// Catchment radius in kilometres.
    pub max_radius_km: f64,
    /// Distance decay exponent.
    pub distance_decay: f64,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            max_radius_km: 2.0,
            distance_decay: 1.5,
        }
    }
}

impl From<&OptimizationConfig> for CaptureParams {
    fn from(config: &OptimizationConfig) -> Self {
        Self {
            max_radius_km: config.max_radius_km,
            distance_decay: config.distance_decay,
        }
    }
}

/// Utility of a facility at `distance_km` from a demand point.
#[must_use]
pub fn utility(attractiveness: f64, distance_km: f64, decay: f64) -> f64 {
    attractiveness / distance_km.max(MIN_UTILITY_DISTANCE_KM).powf(decay)
}

/// One facility's fraction of a mesh's demand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Share {
    /// Index into the facility slice.
    pub facility: usize,
    /// Fraction of demand, 0..=1.
    pub ratio: f64,
}

/// The allocation of one mesh.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeshCapture {
    /// Facilities in range and their shares; empty when none are in range.
    pub shares: Vec<Share>,
}

impl MeshCapture {
    /// Whether any facility takes demand from this mesh.
    #[must_use]
    pub fn is_captured(&self) -> bool {
        !self.shares.is_empty()
    }

    /// Share held by the facility at `index`.
    #[must_use]
    pub fn ratio_of(&self, index: usize) -> f64 {
        self.shares
            .iter()
            .find(|s| s.facility == index)
            .map_or(0.0, |s| s.ratio)
    }
}

/// Facilities in range of `center`, with their utilities.
fn utilities_at(
    center: &GeoPoint,
    facilities: &[Facility],
    params: &CaptureParams,
) -> Vec<(usize, f64)> {
    facilities
        .iter()
        .enumerate()
        .filter(|(_, f)| f.attractiveness > 0.0)
        .filter_map(|(i, f)| {
            let d = center.distance_km(&f.point);
            (d <= params.max_radius_km).then(|| (i, utility(f.attractiveness, d, params.distance_decay)))
        })
        .collect()
}

/// Allocate every mesh's demand among `facilities`.
///
/// The result is parallel to `meshes`.
#[must_use]
pub fn capture_demand(
    meshes: &[Mesh],
    facilities: &[Facility],
    params: &CaptureParams,
) -> Vec<MeshCapture> {
    meshes
        .iter()
        .map(|mesh| {
            let in_range = utilities_at(&mesh.center, facilities, params);
            let total: f64 = in_range.iter().map(|(_, u)| u).sum();
            if total <= 0.0 {
                return MeshCapture::default();
            }
            MeshCapture {
                shares: in_range
                    .into_iter()
                    .map(|(facility, u)| Share {
                        facility,
                        ratio: u / total,
                    })
                    .collect(),
            }
        })
        .collect()
}

/// Demand captured by the facilities selected by `include`.
#[must_use]
pub fn captured_demand(
    meshes: &[Mesh],
    captures: &[MeshCapture],
    include: impl Fn(usize) -> bool,
) -> f64 {
    meshes
        .iter()
        .zip(captures)
        .map(|(mesh, capture)| {
            capture
                .shares
                .iter()
                .filter(|s| include(s.facility))
                .map(|s| mesh.demand * s.ratio)
                .sum::<f64>()
        })
        .sum()
}

/// Percentage of meshes in which a facility selected by `include` holds a
/// share.
#[must_use]
pub fn coverage_pct(captures: &[MeshCapture], include: impl Fn(usize) -> bool) -> f64 {
    if captures.is_empty() {
        return 0.0;
    }
    let covered = captures
        .iter()
        .filter(|c| c.shares.iter().any(|s| include(s.facility)))
        .count();
    covered as f64 / captures.len() as f64 * 100.0
}

/// Total demand of all meshes.
#[must_use]
pub fn market_demand(meshes: &[Mesh]) -> f64 {
    meshes.iter().map(|m| m.demand).sum()
}

/// Demand performance of a single facility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorePerformance {
    /// Facility identifier.
    pub id: String,
    /// Facility name.
    pub name: Option<String>,
    /// Role of the facility.
    pub kind: FacilityKind,
    /// Demand captured.
    pub total_demand: f64,
    /// Meshes in which the facility holds a share.
    pub mesh_count: usize,
    /// Captured demand as a percentage of total market demand.
    pub market_share: f64,
    /// Captured demand per mesh served.
    pub demand_density: f64,
}

/// Per-facility performance for an allocation from [`capture_demand`].
#[must_use]
pub fn store_performance(
    meshes: &[Mesh],
    captures: &[MeshCapture],
    facilities: &[Facility],
) -> Vec<StorePerformance> {
    let mut totals = vec![(0.0_f64, 0_usize); facilities.len()];
    for (mesh, capture) in meshes.iter().zip(captures) {
        for share in &capture.shares {
            if let Some(entry) = totals.get_mut(share.facility) {
                entry.0 += mesh.demand * share.ratio;
                entry.1 += 1;
            }
        }
    }
    let market = market_demand(meshes);

    facilities
        .iter()
        .zip(totals)
        .map(|(f, (total_demand, mesh_count))| StorePerformance {
            id: f.id.clone(),
            name: f.name.clone(),
            kind: f.kind,
            total_demand,
            mesh_count,
            market_share: if market > 0.0 {
                total_demand / market * 100.0
            } else {
                0.0
            },
            demand_density: if mesh_count > 0 {
                total_demand / mesh_count as f64
            } else {
                0.0
            },
        })
        .collect()
}

/// Precomputed utilities of candidate sites, for fast repeated evaluation.
///
/// Row `i` lists the meshes within range of site `i` with the site's
/// utility there.
#[derive(Debug, Clone, Default)]
pub struct UtilityMatrix {
    rows: Vec<Vec<(usize, f64)>>,
}

impl UtilityMatrix {
    /// Compute utilities of `sites` (all with `attractiveness`) over `meshes`.
    #[must_use]
    pub fn build(
        sites: &[GeoPoint],
        meshes: &[Mesh],
        attractiveness: f64,
        params: &CaptureParams,
    ) -> Self {
        if attractiveness <= 0.0 {
            return Self {
                rows: vec![Vec::new(); sites.len()],
            };
        }
        let rows = sites
            .iter()
            .map(|site| {
                // Cheap rectangle test before the trigonometry
                let bbox = Bounds::around(*site, params.max_radius_km * 1.01);
                meshes
                    .iter()
                    .enumerate()
                    .filter(|(_, m)| bbox.contains(&m.center))
                    .filter_map(|(j, m)| {
                        let d = site.distance_km(&m.center);
                        (d <= params.max_radius_km)
                            .then(|| (j, utility(attractiveness, d, params.distance_decay)))
                    })
                    .collect()
            })
            .collect();
        Self { rows }
    }

    /// Meshes in range of site `i` and the site's utility in each.
    #[must_use]
    pub fn row(&self, i: usize) -> &[(usize, f64)] {
        self.rows.get(i).map_or(&[], Vec::as_slice)
    }

    /// Number of sites.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the matrix has no sites.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Per-mesh sum of utilities from a set of facilities.
#[must_use]
pub fn background_utility(
    meshes: &[Mesh],
    facilities: &[Facility],
    params: &CaptureParams,
) -> Vec<f64> {
    meshes
        .iter()
        .map(|m| {
            utilities_at(&m.center, facilities, params)
                .iter()
                .map(|(_, u)| u)
                .sum()
        })
        .collect()
}
