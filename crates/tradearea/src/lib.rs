//! `tradearea` - Trade-area analysis and retail site selection
//!
//! This library manages projects, store locations and trade areas in a local
//! database, and chooses new store sites with a Huff gravity model over a
//! population demand grid.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod candidates;
pub mod capture;
pub mod cli;
pub mod config;
pub mod error;
pub mod geo;
pub mod grid;
pub mod historical;
pub mod logging;
pub mod meshcode;
pub mod model;
pub mod optimize;
pub mod storage;
pub mod trade_area;

pub use capture::{Facility, FacilityKind};
pub use config::Config;
pub use error::{Error, Result};
pub use geo::{Bounds, GeoPoint, Polygon};
pub use grid::Mesh;
pub use logging::init_logging;
pub use model::{AreaType, Location, LocationType, Project, TradeArea};
pub use optimize::{Constraints, OptimizationResult};
pub use storage::{Storage, StorageStats};
