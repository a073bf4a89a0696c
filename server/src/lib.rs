//! CellMap Server Library
//!
//! Mosaic assembly, global object identification and tile queries for
//! multiplexed microscopy. This module exports the pipeline stages for the
//! batch binary and the HTTP router for the server and integration tests.

pub mod config;
pub mod grid;
pub mod index;
pub mod labels;
pub mod mosaic;
pub mod pipeline;
pub mod pyramid;
pub mod query;
pub mod tiles;

use std::sync::Arc;

use axum::{Json, Router, routing::get};
use serde::Serialize;

use config::Config;
use query::{ExperimentRegistry, QueryAppState, TileQueryService, query_routes};
use tiles::{LocalLayerService, TileAppState, TileCache, TileCacheConfig, tile_routes};

// Re-export commonly used types
pub use pipeline::{JobConfig, Pipeline, PipelineReport};
pub use query::MapObjectService;
pub use tiles::LayerTileService;

/// Services behind the HTTP API
#[derive(Clone)]
pub struct AppServices {
    pub registry: Arc<ExperimentRegistry>,
    pub map_objects: Arc<dyn MapObjectService>,
    pub layers: Arc<dyn LayerTileService>,
}

impl AppServices {
    /// Services reading experiments from the configured data directory
    pub fn from_config(config: &Config) -> Self {
        let registry = Arc::new(ExperimentRegistry::new(
            &config.data_dir,
            config.cache.max_cached_experiments,
        ));
        let tile_cache = Arc::new(TileCache::new(TileCacheConfig::with_max_mb(
            config.cache.tile_cache_max_mb,
        )));
        Self {
            map_objects: Arc::new(TileQueryService::new(registry.clone(), config.tile_size)),
            layers: Arc::new(LocalLayerService::new(&config.data_dir, tile_cache)),
            registry,
        }
    }
}

#[derive(Serialize)]
struct ExperimentListResponse {
    experiments: Vec<String>,
}

/// Router with the experiment API nested under `/api`
pub fn build_router(services: AppServices) -> Router {
    let registry = services.registry.clone();
    let list_experiments = get(move || {
        let registry = registry.clone();
        async move {
            Json(ExperimentListResponse {
                experiments: registry.list(),
            })
        }
    });

    let api = Router::new()
        .route("/experiments", list_experiments)
        .merge(query_routes(QueryAppState {
            service: services.map_objects,
        }))
        .merge(tile_routes(TileAppState {
            service: services.layers,
        }));

    Router::new().nest("/api", api)
}
