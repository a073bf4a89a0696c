//! Tile query service
//!
//! Turns a tile request into the GeoJSON of all objects whose bounding box
//! intersects the tile. Below a type's `min_poly_zoom` objects are centroid
//! points; from there on they are outlines, simplified for the zoom level.

use std::sync::Arc;

use async_trait::async_trait;

use crate::index::simplify::{simplify_ring, tolerance};
use crate::index::{IndexError, ObjectIndex, TypeInfo, tile_bounds};

use super::registry::ExperimentRegistry;
use super::types::{Feature, FeatureCollection, FeatureProperties, Geometry, QueryError, TileQuery};

/// Trait for map object services
#[async_trait]
pub trait MapObjectService: Send + Sync {
    /// List object types of an experiment with their zoom thresholds
    async fn list_types(&self, experiment_id: &str) -> Result<Vec<TypeInfo>, QueryError>;

    /// Objects of one type intersecting a tile
    async fn query_tile(
        &self,
        experiment_id: &str,
        type_name: &str,
        query: &TileQuery,
    ) -> Result<FeatureCollection, QueryError>;
}

/// Answer a tile query against a committed index
pub fn query_index(
    index: &ObjectIndex,
    type_name: &str,
    query: &TileQuery,
    base_tile_size: u32,
) -> Result<FeatureCollection, QueryError> {
    let type_index = index.get(type_name).map_err(|e| match e {
        IndexError::UnknownType(name) => QueryError::UnknownObjectType {
            experiment_id: String::new(),
            type_name: name,
        },
        other => QueryError::Index(other),
    })?;

    let max_zoom = type_index.max_zoom();
    if query.z > max_zoom {
        return Err(QueryError::Malformed(format!(
            "zoom {} exceeds maximal zoom {}",
            query.z, max_zoom
        )));
    }

    let bbox = tile_bounds(query.x, query.y, query.z, max_zoom, base_tile_size);
    let as_points = query.z < type_index.min_poly_zoom();
    let epsilon = tolerance(query.z, max_zoom);

    let features = type_index
        .query(&bbox, query.tpoint, query.zplane)
        .into_iter()
        .map(|object| {
            let geometry = if as_points {
                Geometry::Point {
                    coordinates: object.centroid,
                }
            } else {
                Geometry::Polygon {
                    coordinates: vec![simplify_ring(&object.outline, epsilon)],
                }
            };
            Feature {
                geometry,
                properties: FeatureProperties {
                    id: object.global_id.to_string(),
                    type_name: object.type_name.clone(),
                },
            }
        })
        .collect();

    Ok(FeatureCollection { features })
}

/// Map object service backed by index snapshots on disk
pub struct TileQueryService {
    registry: Arc<ExperimentRegistry>,
    base_tile_size: u32,
}

impl TileQueryService {
    pub fn new(registry: Arc<ExperimentRegistry>, base_tile_size: u32) -> Self {
        Self {
            registry,
            base_tile_size,
        }
    }

    pub fn registry(&self) -> &Arc<ExperimentRegistry> {
        &self.registry
    }
}

#[async_trait]
impl MapObjectService for TileQueryService {
    async fn list_types(&self, experiment_id: &str) -> Result<Vec<TypeInfo>, QueryError> {
        Ok(self.registry.get(experiment_id)?.infos())
    }

    async fn query_tile(
        &self,
        experiment_id: &str,
        type_name: &str,
        query: &TileQuery,
    ) -> Result<FeatureCollection, QueryError> {
        let index = self.registry.get(experiment_id)?;
        query_index(&index, type_name, query, self.base_tile_size).map_err(|e| match e {
            QueryError::UnknownObjectType { type_name, .. } => QueryError::UnknownObjectType {
                experiment_id: experiment_id.to_string(),
                type_name,
            },
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{BBox, MapObject, TypeIndex};

    fn square(global_id: u64, min_x: f64, min_y: f64, size: f64) -> MapObject {
        let (max_x, max_y) = (min_x + size, min_y + size);
        MapObject {
            external_id: global_id,
            global_id,
            type_name: "cells".to_string(),
            tpoint: 0,
            zplane: 0,
            outline: vec![[min_x, min_y], [max_x, min_y], [max_x, max_y], [min_x, max_y], [min_x, min_y]],
            centroid: [(min_x + max_x) / 2.0, (min_y + max_y) / 2.0],
            bbox: BBox::new(min_x, min_y, max_x, max_y),
        }
    }

    fn index(min_poly_zoom: u32) -> ObjectIndex {
        let mut object = square(18, 10.0, -50.0, 10.0);
        object.outline = vec![[10.0, -50.0], [20.0, -50.0], [20.0, -10.0], [10.0, -10.0], [10.0, -50.0]];
        object.centroid = [15.0, -30.0];
        object.bbox = BBox::new(10.0, -50.0, 20.0, -10.0);

        let mut cells = TypeIndex::new("cells", 6, vec![object, square(19, 5000.0, -5000.0, 10.0)]);
        cells.set_min_poly_zoom(min_poly_zoom);
        let mut index = ObjectIndex::new();
        index.insert(cells);
        index
    }

    fn tile(x: u32, y: u32, z: u32) -> TileQuery {
        TileQuery {
            x,
            y,
            z,
            zplane: 0,
            tpoint: 0,
        }
    }

    #[test]
    fn test_tile_returns_intersecting_object() {
        let result = query_index(&index(0), "cells", &tile(0, 0, 6), 256).unwrap();
        assert_eq!(result.len(), 1);
        let feature = &result.features[0];
        assert_eq!(feature.properties.id, "18");
        assert!(matches!(&feature.geometry, Geometry::Polygon { coordinates } if coordinates[0].len() == 5));
    }

    #[test]
    fn test_disjoint_tile_is_empty() {
        let result = query_index(&index(0), "cells", &tile(3, 3, 6), 256).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_points_below_min_poly_zoom() {
        let idx = index(4);
        // Zoom 3 tiles span 2048 px: both objects in tile (0,0) at zoom 0, only one at zoom 3
        let low = query_index(&idx, "cells", &tile(0, 0, 3), 256).unwrap();
        assert!(low.features.iter().all(|f| matches!(f.geometry, Geometry::Point { .. })));
        let high = query_index(&idx, "cells", &tile(0, 0, 4), 256).unwrap();
        assert!(!high.is_empty());
        assert!(high.features.iter().all(|f| matches!(f.geometry, Geometry::Polygon { .. })));

        let whole = query_index(&idx, "cells", &tile(0, 0, 0), 256).unwrap();
        assert_eq!(whole.len(), 2);
        assert_eq!(
            whole.features[0].geometry,
            Geometry::Point {
                coordinates: [15.0, -30.0]
            }
        );
    }

    #[test]
    fn test_other_layers_are_filtered() {
        let mut query = tile(0, 0, 6);
        query.tpoint = 1;
        assert!(query_index(&index(0), "cells", &query, 256).unwrap().is_empty());
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            query_index(&index(0), "nuclei", &tile(0, 0, 6), 256),
            Err(QueryError::UnknownObjectType { .. })
        ));
        assert!(matches!(
            query_index(&index(0), "cells", &tile(0, 0, 7), 256),
            Err(QueryError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_service_reports_experiment_in_errors() {
        let registry = Arc::new(ExperimentRegistry::new("/nonexistent", 2));
        registry.insert("exp", index(0));
        let service = TileQueryService::new(registry, 256);

        let types = service.list_types("exp").await.unwrap();
        assert_eq!(types[0].name, "cells");
        assert_eq!(types[0].object_count, 2);

        let err = service.query_tile("exp", "nuclei", &tile(0, 0, 6)).await.unwrap_err();
        assert!(matches!(err, QueryError::UnknownObjectType { experiment_id, .. } if experiment_id == "exp"));
        assert!(matches!(
            service.query_tile("other", "cells", &tile(0, 0, 6)).await,
            Err(QueryError::UnknownExperiment(_))
        ));
    }
}
