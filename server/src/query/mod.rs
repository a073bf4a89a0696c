//! Tile query module
//!
//! This module provides:
//! - `MapObjectService` trait for answering tile queries
//! - `TileQueryService` backed by index snapshots on disk
//! - `ExperimentRegistry` for lazily loaded, cached indexes
//! - HTTP routes serving GeoJSON feature collections

pub mod registry;
pub mod routes;
pub mod service;
pub mod types;

pub use registry::ExperimentRegistry;
pub use routes::{QueryAppState, query_routes};
pub use service::{MapObjectService, TileQueryService, query_index};
pub use types::{Feature, FeatureCollection, Geometry, QueryError, TileQuery};
