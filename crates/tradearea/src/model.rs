//! Domain entities and request payloads.
//!
//! Every `New*` and `*Update` type has a `validate` method; the storage layer
//! calls it before touching the database so malformed input is reported as
//! [`Error::InvalidInput`] (status 400).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::geo::{GeoPoint, Polygon};

/// Longest accepted entity name.
pub const MAX_NAME_LEN: usize = 255;
/// Longest accepted project description.
pub const MAX_DESCRIPTION_LEN: usize = 1000;
/// Longest accepted street address.
pub const MAX_ADDRESS_LEN: usize = 500;

/// Kilometres per statute mile.
pub const KM_PER_MILE: f64 = 1.609_344;

/// A named collection of locations owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Row id.
    pub id: i64,
    /// Owning identity.
    pub owner: String,
    /// Name, unique per owner.
    pub name: String,
    /// Free-text description.
    pub description: Option<String>,
    /// Arbitrary settings object.
    pub settings: Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// What a location represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationType {
    /// One of the operator's stores.
    #[default]
    Store,
    /// A competitor's store.
    Competitor,
    /// Any other point of interest.
    Poi,
}

impl LocationType {
    /// Storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Competitor => "competitor",
            Self::Poi => "poi",
        }
    }
}

impl fmt::Display for LocationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "store" => Ok(Self::Store),
            "competitor" => Ok(Self::Competitor),
            "poi" => Ok(Self::Poi),
            other => Err(Error::invalid(format!(
                "unknown location type '{other}' (expected store, competitor or poi)"
            ))),
        }
    }
}

/// A point belonging to a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Row id.
    pub id: i64,
    /// Owning project.
    pub project_id: i64,
    /// Display name.
    pub name: String,
    /// Street address.
    pub address: Option<String>,
    /// Coordinates.
    pub point: GeoPoint,
    /// What the location represents.
    pub location_type: LocationType,
    /// Arbitrary metadata object.
    pub metadata: Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// How a trade area's boundary is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaType {
    /// Reachable within `minutes` of driving.
    DriveTime,
    /// Within `radius_km` (or `miles`).
    Distance,
    /// An explicit polygon.
    Custom,
}

impl AreaType {
    /// Storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DriveTime => "drive_time",
            Self::Distance => "distance",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for AreaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AreaType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "drive_time" => Ok(Self::DriveTime),
            "distance" => Ok(Self::Distance),
            "custom" => Ok(Self::Custom),
            other => Err(Error::invalid(format!(
                "unknown area type '{other}' (expected drive_time, distance or custom)"
            ))),
        }
    }
}

/// Catchment of a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeArea {
    /// Row id.
    pub id: i64,
    /// Location the area surrounds.
    pub location_id: i64,
    /// Display name.
    pub name: String,
    /// Boundary definition.
    pub area_type: AreaType,
    /// Definition parameters (`minutes`, `radius_km`, `miles`).
    pub parameters: Value,
    /// Boundary polygon.
    pub geometry: Option<Polygon>,
    /// Aggregated demographics for the area.
    pub demographics: Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

fn validate_name(field: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::invalid(format!("{field} must not be empty")));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(Error::invalid(format!(
            "{field} must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_len(field: &str, value: Option<&str>, max: usize) -> Result<()> {
    match value {
        Some(v) if v.chars().count() > max => Err(Error::invalid(format!(
            "{field} must be at most {max} characters"
        ))),
        _ => Ok(()),
    }
}

fn validate_object(field: &str, value: Option<&Value>) -> Result<()> {
    match value {
        Some(v) if !v.is_object() => Err(Error::invalid(format!("{field} must be a JSON object"))),
        _ => Ok(()),
    }
}

/// Read a strictly positive number from a parameters object.
#[must_use]
pub fn positive_param(parameters: &Value, key: &str) -> Option<f64> {
    parameters
        .get(key)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Check that `parameters` and `geometry` define a usable area of
/// `area_type`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] describing the missing or bad field.
pub fn validate_area_definition(
    area_type: AreaType,
    parameters: &Value,
    geometry: Option<&Polygon>,
) -> Result<()> {
    validate_object("parameters", Some(parameters))?;
    match area_type {
        AreaType::DriveTime => {
            if positive_param(parameters, "minutes").is_none() {
                return Err(Error::invalid(
                    "drive_time areas need a positive 'minutes' parameter",
                ));
            }
        }
        AreaType::Distance => {
            let has_radius = positive_param(parameters, "radius_km").is_some()
                || positive_param(parameters, "miles").is_some();
            if !has_radius {
                return Err(Error::invalid(
                    "distance areas need a positive 'radius_km' or 'miles' parameter",
                ));
            }
        }
        AreaType::Custom => {
            let polygon =
                geometry.ok_or_else(|| Error::invalid("custom areas need a geometry"))?;
            Polygon::new(polygon.ring.clone())?;
        }
    }
    if let Some(polygon) = geometry {
        for v in &polygon.ring {
            v.validate()?;
        }
    }
    Ok(())
}

/// Payload for creating a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
    /// Name, unique per owner.
    pub name: String,
    /// Free-text description.
    pub description: Option<String>,
    /// Settings object; defaults to `{}`.
    pub settings: Option<Value>,
}

impl NewProject {
    /// Validate the payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        validate_name("project name", &self.name)?;
        validate_len("description", self.description.as_deref(), MAX_DESCRIPTION_LEN)?;
        validate_object("settings", self.settings.as_ref())
    }
}

/// Partial update of a project. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectUpdate {
    /// New name.
    pub name: Option<String>,
    /// New description; an empty string clears it.
    pub description: Option<String>,
    /// Replacement settings object.
    pub settings: Option<Value>,
}

impl ProjectUpdate {
    /// Whether the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.settings.is_none()
    }

    /// Validate the payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::invalid("no fields to update"));
        }
        if let Some(name) = &self.name {
            validate_name("project name", name)?;
        }
        validate_len("description", self.description.as_deref(), MAX_DESCRIPTION_LEN)?;
        validate_object("settings", self.settings.as_ref())
    }
}

/// Payload for adding a location to a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLocation {
    /// Display name.
    pub name: String,
    /// Street address.
    pub address: Option<String>,
    /// Coordinates.
    pub point: GeoPoint,
    /// What the location represents.
    #[serde(default)]
    pub location_type: LocationType,
    /// Metadata object; defaults to `{}`.
    pub metadata: Option<Value>,
}

impl NewLocation {
    /// Validate the payload.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first problem.
    pub fn validate(&self) -> Result<()> {
        validate_name("location name", &self.name)?;
        validate_len("address", self.address.as_deref(), MAX_ADDRESS_LEN)?;
        self.point.validate()?;
        validate_object("metadata", self.metadata.as_ref())
    }
}

/// Partial update of a location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    /// New name.
    pub name: Option<String>,
    /// New address; an empty string clears it.
    pub address: Option<String>,
    /// New coordinates.
    pub point: Option<GeoPoint>,
    /// New type.
    pub location_type: Option<LocationType>,
    /// Replacement metadata object.
    pub metadata: Option<Value>,
}

impl LocationUpdate {
    /// Whether the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.address.is_none()
            && self.point.is_none()
            && self.location_type.is_none()
            && self.metadata.is_none()
    }

    /// Validate the payload.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::invalid("no fields to update"));
        }
        if let Some(name) = &self.name {
            validate_name("location name", name)?;
        }
        validate_len("address", self.address.as_deref(), MAX_ADDRESS_LEN)?;
        if let Some(point) = &self.point {
            point.validate()?;
        }
        validate_object("metadata", self.metadata.as_ref())
    }
}

/// Payload for creating a trade area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTradeArea {
    /// Display name.
    pub name: String,
    /// Boundary definition.
    pub area_type: AreaType,
    /// Definition parameters.
    #[serde(default = "empty_object")]
    pub parameters: Value,
    /// Explicit boundary; required for custom areas.
    pub geometry: Option<Polygon>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl NewTradeArea {
    /// Validate the payload.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first problem.
    pub fn validate(&self) -> Result<()> {
        validate_name("trade area name", &self.name)?;
        validate_area_definition(self.area_type, &self.parameters, self.geometry.as_ref())
    }
}

/// Partial update of a trade area.
///
/// The merged result is revalidated by the store, since a new area type may
/// need parameters the old one did not.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeAreaUpdate {
    /// New name.
    pub name: Option<String>,
    /// New area type.
    pub area_type: Option<AreaType>,
    /// Replacement parameters.
    pub parameters: Option<Value>,
    /// Replacement geometry.
    pub geometry: Option<Polygon>,
}

impl TradeAreaUpdate {
    /// Whether the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.area_type.is_none()
            && self.parameters.is_none()
            && self.geometry.is_none()
    }

    /// Validate the fields that can be checked in isolation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::invalid("no fields to update"));
        }
        if let Some(name) = &self.name {
            validate_name("trade area name", name)?;
        }
        validate_object("parameters", self.parameters.as_ref())
    }

    /// Apply the update to `area`, returning the merged area.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the merged definition is unusable.
    pub fn apply(&self, area: &TradeArea) -> Result<TradeArea> {
        self.validate()?;
        let mut merged = area.clone();
        if let Some(name) = &self.name {
            merged.name.clone_from(name);
        }
        if let Some(area_type) = self.area_type {
            merged.area_type = area_type;
        }
        if let Some(parameters) = &self.parameters {
            merged.parameters = parameters.clone();
        }
        if let Some(geometry) = &self.geometry {
            merged.geometry = Some(geometry.clone());
        }
        let explicit = if merged.area_type == AreaType::Custom {
            merged.geometry.as_ref()
        } else {
            self.geometry.as_ref()
        };
        validate_area_definition(merged.area_type, &merged.parameters, explicit)?;
        Ok(merged)
    }
}
