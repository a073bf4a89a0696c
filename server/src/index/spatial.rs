//! R-tree index over object bounding boxes
//!
//! One tree per (tpoint, zplane) layer of an object type. Entries carry only
//! the bounding box and an index into the type's object vector, so a finished
//! index is immutable and shared read-only by any number of queries.

use std::collections::{BTreeMap, HashMap};

use rstar::{AABB, RTree, RTreeObject};

use super::types::{BBox, IndexError, MapObject, TypeInfo};

/// Entry in the spatial index: bounding box and index into the objects vector
#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub index: usize,
    pub lower: [f64; 2],
    pub upper: [f64; 2],
}

impl RTreeObject for ObjectEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.lower, self.upper)
    }
}

/// All objects of one type with per-layer R-trees
pub struct TypeIndex {
    name: String,
    max_zoom: u32,
    min_poly_zoom: u32,
    objects: Vec<MapObject>,
    trees: HashMap<(u32, u32), RTree<ObjectEntry>>,
}

impl TypeIndex {
    /// Build the trees of a type; `min_poly_zoom` starts at `max_zoom`
    pub fn new(name: impl Into<String>, max_zoom: u32, objects: Vec<MapObject>) -> Self {
        let mut layers: HashMap<(u32, u32), Vec<ObjectEntry>> = HashMap::new();
        for (index, object) in objects.iter().enumerate() {
            layers
                .entry((object.tpoint, object.zplane))
                .or_default()
                .push(ObjectEntry {
                    index,
                    lower: [object.bbox.min_x, object.bbox.min_y],
                    upper: [object.bbox.max_x, object.bbox.max_y],
                });
        }
        let trees = layers
            .into_iter()
            .map(|(layer, entries)| (layer, RTree::bulk_load(entries)))
            .collect();

        Self {
            name: name.into(),
            max_zoom,
            min_poly_zoom: max_zoom,
            objects,
            trees,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_zoom(&self) -> u32 {
        self.max_zoom
    }

    pub fn min_poly_zoom(&self) -> u32 {
        self.min_poly_zoom
    }

    pub fn set_min_poly_zoom(&mut self, zoom: u32) {
        self.min_poly_zoom = zoom.min(self.max_zoom);
    }

    pub fn objects(&self) -> &[MapObject] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// (tpoint, zplane) layers holding objects, sorted
    pub fn layers(&self) -> Vec<(u32, u32)> {
        let mut layers: Vec<(u32, u32)> = self.trees.keys().copied().collect();
        layers.sort_unstable();
        layers
    }

    /// Union of all object bounding boxes
    pub fn extent(&self) -> Option<BBox> {
        self.objects
            .iter()
            .map(|o| o.bbox)
            .reduce(|a, b| a.union(&b))
    }

    /// Objects of one layer whose bounding box intersects `bbox`, by global id
    pub fn query(&self, bbox: &BBox, tpoint: u32, zplane: u32) -> Vec<&MapObject> {
        let Some(tree) = self.trees.get(&(tpoint, zplane)) else {
            return Vec::new();
        };
        let envelope = AABB::from_corners([bbox.min_x, bbox.min_y], [bbox.max_x, bbox.max_y]);
        let mut hits: Vec<&MapObject> = tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| &self.objects[entry.index])
            .collect();
        hits.sort_unstable_by_key(|o| o.global_id);
        hits
    }

    pub fn info(&self) -> TypeInfo {
        TypeInfo {
            name: self.name.clone(),
            object_count: self.objects.len(),
            max_zoom: self.max_zoom,
            min_poly_zoom: self.min_poly_zoom,
            layers: self.layers(),
        }
    }
}

/// Committed index of all object types of one experiment
#[derive(Default)]
pub struct ObjectIndex {
    types: BTreeMap<String, TypeIndex>,
}

impl ObjectIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: TypeIndex) {
        self.types.insert(index.name.clone(), index);
    }

    pub fn get(&self, type_name: &str) -> Result<&TypeIndex, IndexError> {
        self.types
            .get(type_name)
            .ok_or_else(|| IndexError::UnknownType(type_name.to_string()))
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeIndex> {
        self.types.values()
    }

    pub fn type_names(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }

    pub fn infos(&self) -> Vec<TypeInfo> {
        self.types.values().map(TypeIndex::info).collect()
    }

    pub fn object_count(&self) -> usize {
        self.types.values().map(TypeIndex::len).sum()
    }
}
