//! Lazily loaded, cached object indexes of experiments on disk
//!
//! Each experiment lives in `<data_dir>/<experiment_id>/` and holds its index
//! snapshot as `objects.pb.gz`. Snapshots are loaded on first use and kept in
//! a concurrent map; when more than `max_cached` experiments are loaded, the
//! least recently loaded one is dropped. A snapshot whose modification time
//! differs from the cached one is loaded again.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::index::{IndexError, ObjectIndex, SNAPSHOT_FILE, read_snapshot};

use super::types::QueryError;

struct CachedExperiment {
    index: Arc<ObjectIndex>,
    loaded_seq: u64,
    /// Modification time of the snapshot the index came from
    modified: Option<SystemTime>,
}

/// Cache of committed object indexes keyed by experiment id
pub struct ExperimentRegistry {
    data_dir: PathBuf,
    cache: DashMap<String, CachedExperiment>,
    max_cached: usize,
    load_counter: AtomicU64,
}

/// Experiment ids are plain directory names
pub fn is_valid_experiment_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl ExperimentRegistry {
    pub fn new(data_dir: impl Into<PathBuf>, max_cached: usize) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache: DashMap::new(),
            max_cached: max_cached.max(1),
            load_counter: AtomicU64::new(0),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory of an experiment, rejecting ids that are not plain names
    pub fn experiment_dir(&self, id: &str) -> Result<PathBuf, QueryError> {
        if !is_valid_experiment_id(id) {
            return Err(QueryError::UnknownExperiment(id.to_string()));
        }
        Ok(self.data_dir.join(id))
    }

    /// Register an already built index, e.g. right after a pipeline run
    ///
    /// The index stays current until the experiment's snapshot on disk changes.
    pub fn insert(&self, id: &str, index: ObjectIndex) -> Arc<ObjectIndex> {
        let modified = self.snapshot_modified(id);
        self.store(id, index, modified)
    }

    fn store(&self, id: &str, index: ObjectIndex, modified: Option<SystemTime>) -> Arc<ObjectIndex> {
        let index = Arc::new(index);
        self.cache.insert(
            id.to_string(),
            CachedExperiment {
                index: Arc::clone(&index),
                loaded_seq: self.load_counter.fetch_add(1, Ordering::Relaxed),
                modified,
            },
        );
        self.evict_if_needed();
        index
    }

    fn snapshot_modified(&self, id: &str) -> Option<SystemTime> {
        let path = self.experiment_dir(id).ok()?.join(SNAPSHOT_FILE);
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    /// Get the index of an experiment, loading its snapshot on first use
    pub fn get(&self, id: &str) -> Result<Arc<ObjectIndex>, QueryError> {
        let path = self.experiment_dir(id)?.join(SNAPSHOT_FILE);
        let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();

        // In-memory indexes without a snapshot on disk stay valid
        let current = self.cache.get(id).and_then(|cached| {
            (modified.is_none() || cached.modified == modified).then(|| Arc::clone(&cached.index))
        });
        if let Some(index) = current {
            return Ok(index);
        }
        if self.cache.contains_key(id) {
            info!("Snapshot of experiment '{}' changed on disk, reloading", id);
        }

        if modified.is_none() && !path.exists() {
            return Err(QueryError::UnknownExperiment(id.to_string()));
        }

        debug!("Loading index snapshot from: {:?}", path);
        let index = read_snapshot(&path).map_err(|e| match e {
            IndexError::IoError(io) if io.kind() == std::io::ErrorKind::NotFound => {
                QueryError::UnknownExperiment(id.to_string())
            }
            other => QueryError::Index(other),
        })?;

        info!(
            "Loaded experiment '{}': {} types, {} objects",
            id,
            index.type_names().len(),
            index.object_count()
        );
        Ok(self.store(id, index, modified))
    }

    /// Experiments with an index snapshot on disk, sorted
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = std::fs::read_dir(&self.data_dir)
            .into_iter()
            .flatten()
            .flatten()
            .filter(|entry| entry.path().join(SNAPSHOT_FILE).exists())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|id| is_valid_experiment_id(id))
            .collect();
        ids.sort();
        ids
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    fn evict_if_needed(&self) {
        while self.cache.len() > self.max_cached {
            let oldest = self
                .cache
                .iter()
                .min_by_key(|entry| entry.value().loaded_seq)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(id) => {
                    self.cache.remove(&id);
                    debug!("Evicted experiment from cache: {}", id);
                }
                None => break,
            }
        }
    }
}
