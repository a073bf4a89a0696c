//! Border objects and parent/child exclusion for display masks
//!
//! An object touching the first or last row or column of its site is cut by
//! the site edge. Child objects (e.g. nuclei) whose parent (e.g. the cell) is
//! such a border object are hidden from display masks. Index entries and
//! global ids are not affected.

use std::collections::{BTreeSet, HashMap};

use crate::mosaic::Raster;

use super::types::LabelError;

/// Labels of all objects touching the raster edge
pub fn border_labels(labels: &Raster<u32>) -> BTreeSet<u32> {
    let (width, height) = labels.dimensions();
    let mut border = BTreeSet::new();
    if width == 0 || height == 0 {
        return border;
    }

    let mut add = |x: u32, y: u32| {
        let v = labels.get_pixel(x, y).0[0];
        if v != 0 {
            border.insert(v);
        }
    };
    for x in 0..width {
        add(x, 0);
        add(x, height - 1);
    }
    for y in 0..height {
        add(0, y);
        add(width - 1, y);
    }
    border
}

/// Parent label of every child label, by largest pixel overlap
///
/// Children that lie entirely on parent background have no entry.
pub fn parent_of(children: &Raster<u32>, parents: &Raster<u32>) -> Result<HashMap<u32, u32>, LabelError> {
    if children.dimensions() != parents.dimensions() {
        return Err(LabelError::ShapeMismatch {
            expected_width: parents.width(),
            expected_height: parents.height(),
            width: children.width(),
            height: children.height(),
        });
    }

    let mut overlaps: HashMap<u32, HashMap<u32, usize>> = HashMap::new();
    for (child, parent) in children.as_raw().iter().zip(parents.as_raw()) {
        if *child != 0 && *parent != 0 {
            *overlaps.entry(*child).or_default().entry(*parent).or_default() += 1;
        }
    }

    Ok(overlaps
        .into_iter()
        .filter_map(|(child, counts)| {
            // Ties go to the smaller parent label
            counts
                .into_iter()
                .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
                .map(|(parent, _)| (child, parent))
        })
        .collect())
}

/// Child labels to hide because their parent touches the site border
pub fn excluded_children(parent_map: &HashMap<u32, u32>, border_parents: &BTreeSet<u32>) -> BTreeSet<u32> {
    parent_map
        .iter()
        .filter(|(_, parent)| border_parents.contains(parent))
        .map(|(child, _)| *child)
        .collect()
}

/// Set the given labels to background
pub fn mask_labels(labels: &mut Raster<u32>, excluded: &BTreeSet<u32>) {
    if excluded.is_empty() {
        return;
    }
    for pixel in labels.pixels_mut() {
        if excluded.contains(&pixel.0[0]) {
            pixel.0[0] = 0;
        }
    }
}

/// Hide children of border parents in a child display mask
pub fn mask_border_children(children: &mut Raster<u32>, parents: &Raster<u32>) -> Result<BTreeSet<u32>, LabelError> {
    let parent_map = parent_of(children, parents)?;
    let excluded = excluded_children(&parent_map, &border_labels(parents));
    mask_labels(children, &excluded);
    Ok(excluded)
}
