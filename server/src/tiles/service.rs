//! Pyramid tile service reading published pyramids from the data directory
//!
//! Layout: `<data_dir>/<experiment>/layers/<layer>/pyramid.json` plus the zoom
//! directories written by the pyramid builder. A manifest whose modification
//! time changed marks a republished experiment: its cached manifests and
//! tiles are dropped before the new manifest is used.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::pyramid::{PyramidManifest, level_size, tile_counts, tile_path};
use crate::query::registry::is_valid_experiment_id;

use super::cache::{TileCache, TileKey};
use super::types::{LayerInfo, TileData, TileError, TileRequest};

pub const LAYERS_DIR: &str = "layers";

/// Trait for pyramid tile sources
#[async_trait]
pub trait LayerTileService: Send + Sync {
    /// Layers of an experiment, sorted by name
    async fn list_layers(&self, experiment_id: &str) -> Result<Vec<LayerInfo>, TileError>;

    async fn get_tile(&self, request: &TileRequest) -> Result<TileData, TileError>;
}

struct CachedManifest {
    manifest: PyramidManifest,
    modified: Option<SystemTime>,
}

/// Tile service over pyramids on the local filesystem
pub struct LocalLayerService {
    data_dir: PathBuf,
    manifests: DashMap<(String, String), CachedManifest>,
    cache: Arc<TileCache>,
}

impl LocalLayerService {
    pub fn new(data_dir: impl Into<PathBuf>, cache: Arc<TileCache>) -> Self {
        Self {
            data_dir: data_dir.into(),
            manifests: DashMap::new(),
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        &self.cache
    }

    /// Forget manifests and tiles of an experiment after its pyramids changed
    pub fn invalidate_experiment(&self, experiment_id: &str) {
        self.manifests.retain(|(id, _), _| id != experiment_id);
        self.cache.invalidate_experiment(experiment_id);
    }

    fn layers_dir(&self, experiment_id: &str) -> Result<PathBuf, TileError> {
        if !is_valid_experiment_id(experiment_id) {
            return Err(TileError::ExperimentNotFound(experiment_id.to_string()));
        }
        let experiment_dir = self.data_dir.join(experiment_id);
        if !experiment_dir.is_dir() {
            return Err(TileError::ExperimentNotFound(experiment_id.to_string()));
        }
        Ok(experiment_dir.join(LAYERS_DIR))
    }

    fn layer_dir(&self, experiment_id: &str, layer: &str) -> Result<PathBuf, TileError> {
        let layers_dir = self.layers_dir(experiment_id)?;
        if !is_valid_experiment_id(layer) {
            return Err(TileError::LayerNotFound {
                experiment_id: experiment_id.to_string(),
                layer: layer.to_string(),
            });
        }
        Ok(layers_dir.join(layer))
    }

    fn manifest(&self, experiment_id: &str, layer: &str) -> Result<PyramidManifest, TileError> {
        let dir = self.layer_dir(experiment_id, layer)?;
        let Ok(metadata) = std::fs::metadata(dir.join(PyramidManifest::FILE_NAME)) else {
            return Err(TileError::LayerNotFound {
                experiment_id: experiment_id.to_string(),
                layer: layer.to_string(),
            });
        };
        let modified = metadata.modified().ok();

        let key = (experiment_id.to_string(), layer.to_string());
        let stale = match self.manifests.get(&key) {
            Some(cached) if cached.modified == modified => return Ok(cached.manifest.clone()),
            Some(_) => true,
            None => false,
        };
        if stale {
            info!("Pyramid {}/{} changed on disk, dropping cached tiles", experiment_id, layer);
            self.invalidate_experiment(experiment_id);
        }

        let manifest = PyramidManifest::load(&dir)?;
        debug!(
            "Loaded pyramid manifest {}/{}: {}x{}, max zoom {}",
            experiment_id, layer, manifest.width, manifest.height, manifest.max_zoom
        );
        self.manifests.insert(
            key,
            CachedManifest {
                manifest: manifest.clone(),
                modified,
            },
        );
        Ok(manifest)
    }

    fn check_coordinates(manifest: &PyramidManifest, request: &TileRequest) -> Result<(), TileError> {
        if request.z > manifest.max_zoom {
            return Err(TileError::InvalidLevel {
                z: request.z,
                max_zoom: manifest.max_zoom,
            });
        }
        let (level_width, level_height) = level_size(manifest.width, manifest.height, manifest.max_zoom, request.z);
        let (columns, rows) = tile_counts(level_width, level_height, manifest.tile_size);
        if request.x >= columns || request.y >= rows {
            return Err(TileError::InvalidTileCoordinates {
                z: request.z,
                x: request.x,
                y: request.y,
            });
        }
        Ok(())
    }
}

async fn read_tile(path: &Path) -> Result<Bytes, TileError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(Bytes::from(bytes))
}

#[async_trait]
impl LayerTileService for LocalLayerService {
    async fn list_layers(&self, experiment_id: &str) -> Result<Vec<LayerInfo>, TileError> {
        let layers_dir = self.layers_dir(experiment_id)?;
        let mut names: Vec<String> = std::fs::read_dir(&layers_dir)
            .into_iter()
            .flatten()
            .flatten()
            .filter(|entry| entry.path().join(PyramidManifest::FILE_NAME).exists())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();

        let mut layers = Vec::with_capacity(names.len());
        for name in names {
            match self.manifest(experiment_id, &name) {
                Ok(manifest) => layers.push(LayerInfo::new(name, &manifest)),
                Err(e) => tracing::warn!("Skipping layer {}/{}: {}", experiment_id, name, e),
            }
        }
        Ok(layers)
    }

    async fn get_tile(&self, request: &TileRequest) -> Result<TileData, TileError> {
        let manifest = self.manifest(&request.experiment_id, &request.layer)?;
        Self::check_coordinates(&manifest, request)?;

        let path = tile_path(
            &self.layer_dir(&request.experiment_id, &request.layer)?,
            request.z,
            request.x,
            request.y,
            manifest.kind,
        );
        let key = TileKey {
            experiment_id: request.experiment_id.clone(),
            layer: request.layer.clone(),
            z: request.z,
            x: request.x,
            y: request.y,
        };
        let bytes = self.cache.get_or_try_insert_with(key, || read_tile(&path)).await?;

        Ok(TileData {
            kind: manifest.kind,
            bytes,
        })
    }
}
