//! Zoom threshold between centroid points and polygon outlines
//!
//! Walking from full resolution outwards, random tiles within the type's extent
//! are sampled at each zoom and the outline vertices falling inside them
//! counted. The threshold is the smallest zoom, reached without interruption
//! from `max_zoom`, whose average stays within the vertex limit.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::geometry::{tile_bounds, vertices_in};
use super::spatial::TypeIndex;

fn default_samples() -> usize {
    10
}

fn default_vertex_limit() -> usize {
    1500
}

fn default_seed() -> u64 {
    42
}

/// Parameters of the tile sampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoomSampling {
    /// Tiles sampled per zoom level
    #[serde(default = "default_samples")]
    pub samples: usize,
    /// Largest tolerated average of outline vertices per tile
    #[serde(default = "default_vertex_limit")]
    pub vertex_limit: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for ZoomSampling {
    fn default() -> Self {
        Self {
            samples: default_samples(),
            vertex_limit: default_vertex_limit(),
            seed: default_seed(),
        }
    }
}

/// Average number of outline vertices in sampled tiles at zoom `z`
pub fn sample_vertex_density(
    index: &TypeIndex,
    z: u32,
    base_tile_size: u32,
    sampling: &ZoomSampling,
    rng: &mut ChaCha8Rng,
) -> f64 {
    let layers = index.layers();
    let Some(extent) = index.extent() else {
        return 0.0;
    };
    if layers.is_empty() || sampling.samples == 0 {
        return 0.0;
    }

    let tile_size = base_tile_size as f64 * 2f64.powi(index.max_zoom().saturating_sub(z) as i32);
    let tile_range = |min: f64, max: f64| {
        let first = (min / tile_size).floor().max(0.0) as u32;
        let last = (max / tile_size).floor().max(0.0) as u32;
        (first, last.max(first))
    };
    let (x_first, x_last) = tile_range(extent.min_x, extent.max_x);
    // Map y is -row: the top edge (max_y) holds the smallest row
    let (y_first, y_last) = tile_range(-extent.max_y, -extent.min_y);

    let mut total = 0usize;
    for _ in 0..sampling.samples {
        let x = rng.random_range(x_first..=x_last);
        let y = rng.random_range(y_first..=y_last);
        let (tpoint, zplane) = layers[rng.random_range(0..layers.len())];

        let bbox = tile_bounds(x, y, z, index.max_zoom(), base_tile_size);
        total += index
            .query(&bbox, tpoint, zplane)
            .iter()
            .map(|object| vertices_in(&object.outline, &bbox))
            .sum::<usize>();
    }
    total as f64 / sampling.samples as f64
}

/// Smallest zoom at which outlines are served as polygons
pub fn min_poly_zoom(index: &TypeIndex, base_tile_size: u32, sampling: &ZoomSampling) -> u32 {
    if index.is_empty() {
        return 0;
    }

    let mut rng = ChaCha8Rng::seed_from_u64(sampling.seed);
    let mut threshold = index.max_zoom();
    for z in (0..=index.max_zoom()).rev() {
        let density = sample_vertex_density(index, z, base_tile_size, sampling, &mut rng);
        debug!("Type '{}' zoom {}: {:.1} vertices per tile", index.name(), z, density);
        if density > sampling.vertex_limit as f64 {
            break;
        }
        threshold = z;
    }
    threshold
}
