//! Geometry primitives: points, bounding boxes and polygons on the WGS84
//! sphere.
//!
//! Distances use the haversine formula. Areas and ray casting work in an
//! equirectangular projection, which is accurate enough at trade-area scale
//! (a few kilometres).

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometres per degree of latitude.
pub const KM_PER_DEG_LAT: f64 = 111.32;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees, -90..=90.
    pub lat: f64,
    /// Longitude in degrees, -180..=180.
    pub lng: f64,
}

impl GeoPoint {
    /// Create a validated point.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCoordinates`] when either component is out of
    /// range or not finite.
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        let point = Self { lat, lng };
        point.validate()?;
        Ok(point)
    }

    /// Check that the point lies on the globe.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCoordinates`] when out of range.
    pub fn validate(&self) -> Result<()> {
        let lat_ok = self.lat.is_finite() && (-90.0..=90.0).contains(&self.lat);
        let lng_ok = self.lng.is_finite() && (-180.0..=180.0).contains(&self.lng);
        if lat_ok && lng_ok {
            Ok(())
        } else {
            Err(Error::InvalidCoordinates {
                lat: self.lat,
                lng: self.lng,
            })
        }
    }

    /// Great-circle distance to `other` in kilometres.
    #[must_use]
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_km(self.lat, self.lng, other.lat, other.lng)
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.4}, {:.4})", self.lat, self.lng)
    }
}

/// Great-circle distance in kilometres between two coordinates.
#[must_use]
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlng = (lng2 - lng1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Kilometres per degree of longitude at the given latitude.
#[must_use]
pub fn km_per_deg_lng(lat: f64) -> f64 {
    KM_PER_DEG_LAT * lat.to_radians().cos()
}

/// An axis-aligned bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Northern latitude edge.
    pub north: f64,
    /// Southern latitude edge.
    pub south: f64,
    /// Eastern longitude edge.
    pub east: f64,
    /// Western longitude edge.
    pub west: f64,
}

impl Bounds {
    /// Create validated bounds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBounds`] when the box is empty, inverted or
    /// off the globe.
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Result<Self> {
        let bounds = Self {
            north,
            south,
            east,
            west,
        };
        bounds.validate()?;
        Ok(bounds)
    }

    /// Validate edge ordering and ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBounds`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        let all_finite = [self.north, self.south, self.east, self.west]
            .iter()
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(Error::InvalidBounds("edges must be finite".to_string()));
        }
        if self.north <= self.south {
            return Err(Error::InvalidBounds(
                "north must be greater than south".to_string(),
            ));
        }
        if self.east <= self.west {
            return Err(Error::InvalidBounds(
                "east must be greater than west".to_string(),
            ));
        }
        if self.north > 90.0 || self.south < -90.0 || self.east > 180.0 || self.west < -180.0 {
            return Err(Error::InvalidBounds(
                "edges must lie within lat -90..90 and lng -180..180".to_string(),
            ));
        }
        Ok(())
    }

    /// Square box of half-width `radius_km` around `center`, clamped to the
    /// globe.
    #[must_use]
    pub fn around(center: GeoPoint, radius_km: f64) -> Self {
        let dlat = radius_km / KM_PER_DEG_LAT;
        let per_lng = km_per_deg_lng(center.lat).abs().max(1e-6);
        let dlng = radius_km / per_lng;
        Self {
            north: (center.lat + dlat).min(90.0),
            south: (center.lat - dlat).max(-90.0),
            east: (center.lng + dlng).min(180.0),
            west: (center.lng - dlng).max(-180.0),
        }
    }

    /// Smallest box containing every point, padded by `padding_km`.
    ///
    /// Returns `None` when `points` is empty.
    #[must_use]
    pub fn enclosing(points: &[GeoPoint], padding_km: f64) -> Option<Self> {
        let first = points.first()?;
        let mut bounds = Self {
            north: first.lat,
            south: first.lat,
            east: first.lng,
            west: first.lng,
        };
        for p in &points[1..] {
            bounds.north = bounds.north.max(p.lat);
            bounds.south = bounds.south.min(p.lat);
            bounds.east = bounds.east.max(p.lng);
            bounds.west = bounds.west.min(p.lng);
        }
        let dlat = padding_km / KM_PER_DEG_LAT;
        let dlng = padding_km / km_per_deg_lng(bounds.center().lat).abs().max(1e-6);
        bounds.north = (bounds.north + dlat).min(90.0);
        bounds.south = (bounds.south - dlat).max(-90.0);
        bounds.east = (bounds.east + dlng).min(180.0);
        bounds.west = (bounds.west - dlng).max(-180.0);
        Some(bounds)
    }

    /// Whether `point` lies inside or on the edge of the box.
    #[must_use]
    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.lat >= self.south
            && point.lat <= self.north
            && point.lng >= self.west
            && point.lng <= self.east
    }

    /// Centre of the box.
    #[must_use]
    pub fn center(&self) -> GeoPoint {
        GeoPoint {
            lat: (self.north + self.south) / 2.0,
            lng: (self.east + self.west) / 2.0,
        }
    }

    /// Area in square degrees.
    #[must_use]
    pub fn area_deg2(&self) -> f64 {
        (self.north - self.south) * (self.east - self.west)
    }
}

/// A simple polygon given as a ring of vertices.
///
/// The ring is stored closed (first vertex repeated at the end).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    /// Ring vertices, closed.
    pub ring: Vec<GeoPoint>,
}

impl Polygon {
    /// Build a polygon from vertices, closing the ring if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if fewer than three distinct vertices
    /// are given, or a vertex is off the globe.
    pub fn new(mut vertices: Vec<GeoPoint>) -> Result<Self> {
        for v in &vertices {
            v.validate()?;
        }
        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }
        let mut distinct: Vec<GeoPoint> = Vec::with_capacity(vertices.len());
        for v in &vertices {
            if !distinct.contains(v) {
                distinct.push(*v);
            }
        }
        if distinct.len() < 3 {
            return Err(Error::invalid(
                "polygon needs at least three distinct vertices",
            ));
        }
        if let Some(first) = vertices.first().copied() {
            vertices.push(first);
        }
        Ok(Self { ring: vertices })
    }

    /// Approximate a circle of `radius_km` around `center` with `segments`
    /// vertices.
    #[must_use]
    pub fn circle(center: GeoPoint, radius_km: f64, segments: usize) -> Self {
        let segments = segments.max(3);
        let dlat = radius_km / KM_PER_DEG_LAT;
        let dlng = radius_km / km_per_deg_lng(center.lat).abs().max(1e-6);
        let mut ring: Vec<GeoPoint> = (0..segments)
            .map(|i| {
                let theta = std::f64::consts::TAU * i as f64 / segments as f64;
                GeoPoint {
                    lat: (center.lat + dlat * theta.sin()).clamp(-90.0, 90.0),
                    lng: (center.lng + dlng * theta.cos()).clamp(-180.0, 180.0),
                }
            })
            .collect();
        ring.push(ring[0]);
        Self { ring }
    }

    /// Vertices without the closing duplicate.
    #[must_use]
    pub fn vertices(&self) -> &[GeoPoint] {
        match self.ring.len() {
            0 => &self.ring,
            n => &self.ring[..n - 1],
        }
    }

    /// Point-in-polygon test by ray casting.
    #[must_use]
    pub fn contains(&self, point: &GeoPoint) -> bool {
        let verts = self.vertices();
        let mut inside = false;
        let mut j = verts.len().wrapping_sub(1);
        for (i, vi) in verts.iter().enumerate() {
            let vj = verts[j];
            let crosses = (vi.lat > point.lat) != (vj.lat > point.lat);
            if crosses {
                let x = (vj.lng - vi.lng) * (point.lat - vi.lat) / (vj.lat - vi.lat) + vi.lng;
                if point.lng < x {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// Bounding box of the ring.
    #[must_use]
    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::enclosing(self.vertices(), 0.0)
    }

    /// GeoJSON `Polygon` geometry, `[lng, lat]` order.
    #[must_use]
    pub fn to_geojson(&self) -> serde_json::Value {
        let ring: Vec<[f64; 2]> = self.ring.iter().map(|v| [v.lng, v.lat]).collect();
        serde_json::json!({ "type": "Polygon", "coordinates": [ring] })
    }

    /// Area in square kilometres (shoelace formula, equirectangular).
    #[must_use]
    pub fn area_km2(&self) -> f64 {
        let verts = self.vertices();
        if verts.len() < 3 {
            return 0.0;
        }
        let ref_lat = verts.iter().map(|v| v.lat).sum::<f64>() / verts.len() as f64;
        let kx = km_per_deg_lng(ref_lat);
        let mut twice_area = 0.0;
        for (i, a) in verts.iter().enumerate() {
            let b = verts[(i + 1) % verts.len()];
            twice_area += (a.lng * kx) * (b.lat * KM_PER_DEG_LAT)
                - (b.lng * kx) * (a.lat * KM_PER_DEG_LAT);
        }
        (twice_area / 2.0).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKYO: GeoPoint = GeoPoint {
        lat: 35.6762,
        lng: 139.6503,
    };

    #[test]
    fn test_point_validation() {
        assert!(GeoPoint::new(35.0, 139.0).is_ok());
        assert!(GeoPoint::new(91.0, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -180.5).is_err());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_haversine_zero_distance() {
        assert!(TOKYO.distance_km(&TOKYO).abs() < 1e-9);
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude is roughly 111.2 km on a 6371 km sphere
        let d = haversine_km(35.0, 139.0, 36.0, 139.0);
        assert!((d - 111.19).abs() < 0.1, "got {d}");
    }

    #[test]
    fn test_haversine_symmetric() {
        let a = GeoPoint { lat: 35.65, lng: 139.75 };
        let b = GeoPoint { lat: 35.68, lng: 139.77 };
        assert!((a.distance_km(&b) - b.distance_km(&a)).abs() < 1e-12);
    }

    #[test]
    fn test_bounds_validation() {
        assert!(Bounds::new(35.7, 35.6, 139.8, 139.7).is_ok());
        let err = Bounds::new(35.6, 35.7, 139.8, 139.7).unwrap_err();
        assert!(err.to_string().contains("north"));
        let err = Bounds::new(35.7, 35.6, 139.7, 139.8).unwrap_err();
        assert!(err.to_string().contains("east"));
        assert!(Bounds::new(95.0, 35.6, 139.8, 139.7).is_err());
    }

    #[test]
    fn test_bounds_contains_and_center() {
        let b = Bounds::new(35.7, 35.6, 139.8, 139.7).unwrap();
        assert!(b.contains(&GeoPoint { lat: 35.65, lng: 139.75 }));
        assert!(!b.contains(&GeoPoint { lat: 35.75, lng: 139.75 }));
        let c = b.center();
        assert!((c.lat - 35.65).abs() < 1e-9);
        assert!((c.lng - 139.75).abs() < 1e-9);
    }

    #[test]
    fn test_bounds_around() {
        let b = Bounds::around(TOKYO, 2.0);
        assert!(b.validate().is_ok());
        assert!(b.contains(&TOKYO));
        let edge = GeoPoint { lat: b.north, lng: TOKYO.lng };
        assert!((TOKYO.distance_km(&edge) - 2.0).abs() < 0.05);
    }

    #[test]
    fn test_bounds_enclosing() {
        assert!(Bounds::enclosing(&[], 1.0).is_none());
        let pts = [
            GeoPoint { lat: 35.6, lng: 139.7 },
            GeoPoint { lat: 35.7, lng: 139.8 },
        ];
        let b = Bounds::enclosing(&pts, 0.0).unwrap();
        assert_eq!(b.north, 35.7);
        assert_eq!(b.west, 139.7);
        let padded = Bounds::enclosing(&pts, 1.0).unwrap();
        assert!(padded.north > b.north && padded.west < b.west);
    }

    #[test]
    fn test_polygon_requires_three_vertices() {
        let pts = vec![
            GeoPoint { lat: 35.0, lng: 139.0 },
            GeoPoint { lat: 35.1, lng: 139.0 },
            GeoPoint { lat: 35.0, lng: 139.0 },
        ];
        assert!(Polygon::new(pts).is_err());
    }

    #[test]
    fn test_polygon_closes_ring() {
        let square = Polygon::new(vec![
            GeoPoint { lat: 35.0, lng: 139.0 },
            GeoPoint { lat: 35.0, lng: 139.1 },
            GeoPoint { lat: 35.1, lng: 139.1 },
            GeoPoint { lat: 35.1, lng: 139.0 },
        ])
        .unwrap();
        assert_eq!(square.ring.len(), 5);
        assert_eq!(square.ring.first(), square.ring.last());
        assert_eq!(square.vertices().len(), 4);
    }

    #[test]
    fn test_polygon_contains() {
        let square = Polygon::new(vec![
            GeoPoint { lat: 35.0, lng: 139.0 },
            GeoPoint { lat: 35.0, lng: 139.1 },
            GeoPoint { lat: 35.1, lng: 139.1 },
            GeoPoint { lat: 35.1, lng: 139.0 },
        ])
        .unwrap();
        assert!(square.contains(&GeoPoint { lat: 35.05, lng: 139.05 }));
        assert!(!square.contains(&GeoPoint { lat: 35.15, lng: 139.05 }));
        assert!(!square.contains(&GeoPoint { lat: 35.05, lng: 138.95 }));
    }

    #[test]
    fn test_circle_polygon() {
        let circle = Polygon::circle(TOKYO, 1.0, 32);
        assert_eq!(circle.vertices().len(), 32);
        assert!(circle.contains(&TOKYO));
        for v in circle.vertices() {
            assert!((TOKYO.distance_km(v) - 1.0).abs() < 0.02);
        }
        // pi * r^2 with a little polygon shrinkage
        let area = circle.area_km2();
        assert!((area - std::f64::consts::PI).abs() < 0.05, "area {area}");
    }

    #[test]
    fn test_polygon_bounds() {
        let circle = Polygon::circle(TOKYO, 1.0, 16);
        let b = circle.bounds().unwrap();
        assert!(b.contains(&TOKYO));
    }
}
