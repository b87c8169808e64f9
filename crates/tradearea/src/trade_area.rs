//! Trade area boundaries and the demographics inside them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::TradeAreaConfig;
use crate::error::{Error, Result};
use crate::geo::{GeoPoint, Polygon};
use crate::grid::Mesh;
use crate::model::{positive_param, AreaType, KM_PER_MILE};

/// Radius in kilometres implied by a distance or drive-time definition.
///
/// `radius_km` wins over `miles` when both are given. Custom areas have no
/// radius.
#[must_use]
pub fn area_radius_km(area_type: AreaType, parameters: &Value, config: &TradeAreaConfig) -> Option<f64> {
    match area_type {
        AreaType::Distance => positive_param(parameters, "radius_km")
            .or_else(|| positive_param(parameters, "miles").map(|m| m * KM_PER_MILE)),
        AreaType::DriveTime => {
            positive_param(parameters, "minutes").map(|m| m / 60.0 * config.drive_speed_kmh)
        }
        AreaType::Custom => None,
    }
}

/// Boundary of a trade area around `center`.
///
/// Distance and drive-time areas become circles; drive time is converted to
/// a radius at `drive_speed_kmh`. Custom areas use `geometry` as given.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when the parameters do not define an area
/// of `area_type`.
pub fn build_geometry(
    center: GeoPoint,
    area_type: AreaType,
    parameters: &Value,
    geometry: Option<&Polygon>,
    config: &TradeAreaConfig,
) -> Result<Polygon> {
    center.validate()?;
    if area_type == AreaType::Custom {
        let polygon = geometry.ok_or_else(|| Error::invalid("custom areas need a geometry"))?;
        return Polygon::new(polygon.vertices().to_vec());
    }
    let radius = area_radius_km(area_type, parameters, config).ok_or_else(|| {
        Error::invalid(format!("{area_type} area parameters do not define a radius"))
    })?;
    debug!(%center, radius_km = radius, %area_type, "building circular trade area");
    Ok(Polygon::circle(center, radius, config.polygon_segments))
}

/// Population and demand inside a trade area.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Demographics {
    /// Population of meshes whose centre lies inside.
    pub population: u64,
    /// Demand of those meshes.
    pub demand: f64,
    /// Meshes counted.
    pub mesh_count: usize,
    /// Area of the polygon.
    pub area_km2: f64,
    /// Population per square kilometre.
    pub density_per_km2: f64,
}

/// Aggregate the meshes whose centres fall inside `polygon`.
#[must_use]
pub fn summarize_demographics(polygon: &Polygon, meshes: &[Mesh]) -> Demographics {
    let Some(bounds) = polygon.bounds() else {
        return Demographics::default();
    };
    let mut summary = Demographics {
        area_km2: polygon.area_km2(),
        ..Demographics::default()
    };
    for mesh in meshes {
        if bounds.contains(&mesh.center) && polygon.contains(&mesh.center) {
            summary.population += u64::from(mesh.population);
            summary.demand += mesh.demand;
            summary.mesh_count += 1;
        }
    }
    if summary.area_km2 > 0.0 {
        summary.density_per_km2 = summary.population as f64 / summary.area_km2;
    }
    summary
}
