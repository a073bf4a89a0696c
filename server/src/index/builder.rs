//! Two-phase construction of the object index
//!
//! Phase 1 commits every staged object of a type and obtains its permanent
//! global id from an [`IdIssuer`]. Phase 2, which requires all commits to be
//! done, computes outline, centroid and bounding box in parallel, bulk-loads
//! the R-trees and derives each type's `min_poly_zoom`.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info};

use super::geometry::{close_ring, polygon_centroid};
use super::spatial::{ObjectIndex, TypeIndex};
use super::types::{BBox, IndexError, MapObject, RawObject};
use super::zoom::{ZoomSampling, min_poly_zoom};

/// Reference to an object awaiting its global id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRef {
    pub external_id: u64,
    pub proposed_id: Option<u64>,
}

/// Issues permanent global ids for committed objects
pub trait IdIssuer: Send + Sync {
    /// Return one global id per object, in order
    fn commit(&self, type_name: &str, objects: &[ObjectRef]) -> Result<Vec<u64>, IndexError>;
}

/// Uses the ids proposed by label unification
pub struct AssignedIds;

impl IdIssuer for AssignedIds {
    fn commit(&self, type_name: &str, objects: &[ObjectRef]) -> Result<Vec<u64>, IndexError> {
        objects
            .iter()
            .map(|o| {
                o.proposed_id.ok_or_else(|| IndexError::CommitFailed {
                    type_name: type_name.to_string(),
                    count: objects.len(),
                    reason: format!("object {} has no proposed id", o.external_id),
                })
            })
            .collect()
    }
}

/// Keeps proposed ids and numbers the remaining objects after the largest one
pub struct PreferProposed;

impl IdIssuer for PreferProposed {
    fn commit(&self, _type_name: &str, objects: &[ObjectRef]) -> Result<Vec<u64>, IndexError> {
        let mut next = objects.iter().filter_map(|o| o.proposed_id).max().unwrap_or(0) + 1;
        Ok(objects
            .iter()
            .map(|o| {
                o.proposed_id.unwrap_or_else(|| {
                    next += 1;
                    next - 1
                })
            })
            .collect())
    }
}

#[derive(Default)]
struct TypeStage {
    staged: Vec<RawObject>,
    external_ids: HashSet<u64>,
    global_ids: Option<Vec<u64>>,
}

/// Collects objects per type and commits them into an [`ObjectIndex`]
pub struct SpatialIndexBuilder {
    issuer: Arc<dyn IdIssuer>,
    max_zoom: u32,
    base_tile_size: u32,
    sampling: ZoomSampling,
    stages: BTreeMap<String, TypeStage>,
}

impl SpatialIndexBuilder {
    pub fn new(issuer: Arc<dyn IdIssuer>, max_zoom: u32, base_tile_size: u32) -> Self {
        Self {
            issuer,
            max_zoom,
            base_tile_size,
            sampling: ZoomSampling::default(),
            stages: BTreeMap::new(),
        }
    }

    pub fn with_sampling(mut self, sampling: ZoomSampling) -> Self {
        self.sampling = sampling;
        self
    }

    /// Register a type that may end up without objects
    pub fn declare_type(&mut self, type_name: &str) {
        self.stages.entry(type_name.to_string()).or_default();
    }

    /// Stage one object; external ids are unique per type
    pub fn add(&mut self, type_name: &str, object: RawObject) -> Result<(), IndexError> {
        let stage = self.stages.entry(type_name.to_string()).or_default();
        if stage.global_ids.is_some() {
            return Err(IndexError::CommitFailed {
                type_name: type_name.to_string(),
                count: 1,
                reason: "type already committed".to_string(),
            });
        }
        if object.outline.len() < 3 {
            return Err(IndexError::InvalidOutline {
                type_name: type_name.to_string(),
                external_id: object.external_id,
                reason: format!("{} vertices", object.outline.len()),
            });
        }
        if !stage.external_ids.insert(object.external_id) {
            return Err(IndexError::DuplicateExternalId {
                type_name: type_name.to_string(),
                external_id: object.external_id,
            });
        }
        stage.staged.push(object);
        Ok(())
    }

    /// Phase 1: obtain global ids for every staged object of a type
    pub fn commit(&mut self, type_name: &str) -> Result<usize, IndexError> {
        let stage = self
            .stages
            .get_mut(type_name)
            .ok_or_else(|| IndexError::UnknownType(type_name.to_string()))?;
        if stage.global_ids.is_some() {
            return Ok(0);
        }

        let refs: Vec<ObjectRef> = stage
            .staged
            .iter()
            .map(|o| ObjectRef {
                external_id: o.external_id,
                proposed_id: o.proposed_id,
            })
            .collect();
        let ids = self.issuer.commit(type_name, &refs)?;
        if ids.len() != refs.len() {
            return Err(IndexError::CommitFailed {
                type_name: type_name.to_string(),
                count: refs.len(),
                reason: format!("issuer returned {} ids", ids.len()),
            });
        }
        let unique: HashSet<u64> = ids.iter().copied().collect();
        if unique.len() != ids.len() {
            return Err(IndexError::CommitFailed {
                type_name: type_name.to_string(),
                count: refs.len(),
                reason: "issuer returned duplicate ids".to_string(),
            });
        }

        debug!("Committed {} objects of type '{}'", ids.len(), type_name);
        stage.global_ids = Some(ids);
        Ok(refs.len())
    }

    /// Commit every type that has not been committed yet
    pub fn commit_all(&mut self) -> Result<usize, IndexError> {
        let names: Vec<String> = self.stages.keys().cloned().collect();
        names.iter().map(|name| self.commit(name)).sum()
    }

    /// Phase 2: build the spatial index; every type must be committed
    pub fn finish(self) -> Result<ObjectIndex, IndexError> {
        if let Some((name, _)) = self.stages.iter().find(|(_, s)| s.global_ids.is_none()) {
            return Err(IndexError::NotCommitted(name.clone()));
        }

        let mut index = ObjectIndex::new();
        for (type_name, stage) in self.stages {
            let global_ids = stage.global_ids.unwrap_or_default();
            let objects = stage
                .staged
                .into_par_iter()
                .zip(global_ids.into_par_iter())
                .map(|(raw, global_id)| to_map_object(&type_name, raw, global_id))
                .collect::<Result<Vec<_>, IndexError>>()?;

            let mut type_index = TypeIndex::new(type_name.clone(), self.max_zoom, objects);
            let threshold = min_poly_zoom(&type_index, self.base_tile_size, &self.sampling);
            type_index.set_min_poly_zoom(threshold);

            info!(
                "Indexed type '{}': {} objects, min_poly_zoom {} of {}",
                type_name,
                type_index.len(),
                threshold,
                self.max_zoom
            );
            index.insert(type_index);
        }
        Ok(index)
    }
}

fn to_map_object(type_name: &str, raw: RawObject, global_id: u64) -> Result<MapObject, IndexError> {
    let invalid = |reason: &str| IndexError::InvalidOutline {
        type_name: type_name.to_string(),
        external_id: raw.external_id,
        reason: reason.to_string(),
    };

    if raw.outline.iter().flatten().any(|v| !v.is_finite()) {
        return Err(invalid("non-finite coordinate"));
    }
    let outline = close_ring(raw.outline);
    let bbox = BBox::from_points(&outline).ok_or_else(|| invalid("empty outline"))?;
    let centroid = polygon_centroid(&outline).ok_or_else(|| invalid("empty outline"))?;

    Ok(MapObject {
        external_id: raw.external_id,
        global_id,
        type_name: type_name.to_string(),
        tpoint: raw.tpoint,
        zplane: raw.zplane,
        outline,
        centroid,
        bbox,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(external_id: u64, proposed_id: Option<u64>) -> RawObject {
        RawObject {
            external_id,
            proposed_id,
            tpoint: 0,
            zplane: 0,
            outline: vec![[10.0, -50.0], [20.0, -50.0], [20.0, -10.0], [10.0, -10.0]],
        }
    }

    #[test]
    fn test_two_phase_build() {
        let mut builder = SpatialIndexBuilder::new(Arc::new(PreferProposed), 6, 256);
        builder.add("cells", raw(5, None)).unwrap();
        builder.add("cells", raw(6, None)).unwrap();
        builder.add("nuclei", raw(5, None)).unwrap();
        assert_eq!(builder.commit_all().unwrap(), 3);

        let index = builder.finish().unwrap();
        let cells = index.get("cells").unwrap();
        let ids: Vec<u64> = cells.objects().iter().map(|o| o.global_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(index.get("nuclei").unwrap().objects()[0].global_id, 1);

        let object = &cells.objects()[0];
        assert_eq!(object.bbox, BBox::new(10.0, -50.0, 20.0, -10.0));
        assert_eq!(object.centroid, [15.0, -30.0]);
        assert_eq!(object.outline.len(), 5);
    }

    #[test]
    fn test_finish_requires_commit() {
        let mut builder = SpatialIndexBuilder::new(Arc::new(PreferProposed), 6, 256);
        builder.add("cells", raw(1, None)).unwrap();
        assert!(matches!(builder.finish(), Err(IndexError::NotCommitted(name)) if name == "cells"));
    }

    #[test]
    fn test_duplicate_external_id() {
        let mut builder = SpatialIndexBuilder::new(Arc::new(PreferProposed), 6, 256);
        builder.add("cells", raw(1, None)).unwrap();
        let err = builder.add("cells", raw(1, None)).unwrap_err();
        assert!(matches!(err, IndexError::DuplicateExternalId { external_id: 1, .. }));
    }

    #[test]
    fn test_assigned_ids_use_proposals() {
        let mut builder = SpatialIndexBuilder::new(Arc::new(AssignedIds), 6, 256);
        builder.add("cells", raw(1, Some(18))).unwrap();
        builder.add("cells", raw(2, Some(19))).unwrap();
        builder.commit("cells").unwrap();
        let index = builder.finish().unwrap();
        let ids: Vec<u64> = index.get("cells").unwrap().objects().iter().map(|o| o.global_id).collect();
        assert_eq!(ids, vec![18, 19]);

        let mut builder = SpatialIndexBuilder::new(Arc::new(AssignedIds), 6, 256);
        builder.add("cells", raw(1, None)).unwrap();
        assert!(matches!(builder.commit("cells"), Err(IndexError::CommitFailed { .. })));
    }

    #[test]
    fn test_prefer_proposed_fills_gaps_after_largest() {
        let refs = [
            ObjectRef { external_id: 1, proposed_id: None },
            ObjectRef { external_id: 2, proposed_id: Some(40) },
            ObjectRef { external_id: 3, proposed_id: None },
        ];
        assert_eq!(PreferProposed.commit("cells", &refs).unwrap(), vec![41, 40, 42]);
    }

    #[test]
    fn test_invalid_outline_rejected() {
        let mut builder = SpatialIndexBuilder::new(Arc::new(PreferProposed), 6, 256);
        let mut object = raw(1, None);
        object.outline.truncate(2);
        assert!(matches!(
            builder.add("cells", object),
            Err(IndexError::InvalidOutline { .. })
        ));
    }
}
