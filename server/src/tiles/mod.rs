//! Pyramid tile serving module
//!
//! This module provides:
//! - `LayerTileService` trait for abstracting tile sources
//! - `LocalLayerService` reading published pyramids from the data directory
//! - `TileCache` for caching encoded tile bytes
//! - HTTP routes for layer listings and tiles

pub mod cache;
pub mod routes;
mod service;
mod types;

pub use cache::{TileCache, TileCacheConfig, TileCacheStats, TileKey};
pub use routes::{TileAppState, tile_routes};
pub use service::{LAYERS_DIR, LayerTileService, LocalLayerService};
pub use types::{LayerInfo, TileData, TileError, TileRequest};
