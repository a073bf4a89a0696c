//! Map-space geometry helpers
//!
//! Map space is `x = column`, `y = -row`. A tile at zoom `z` spans
//! `256 * 2^(max_zoom - z)` mosaic pixels.

use super::types::BBox;

/// Bounding box of tile (x, y) at zoom `z`
pub fn tile_bounds(x: u32, y: u32, z: u32, max_zoom: u32, base_tile_size: u32) -> BBox {
    let tile_size = base_tile_size as f64 * 2f64.powi(max_zoom.saturating_sub(z) as i32);
    let x0 = x as f64 * tile_size;
    let y0 = y as f64 * tile_size;
    BBox::new(x0, -y0 - tile_size, x0 + tile_size, -y0)
}

/// Pixel coordinate (column, row) to map space
pub fn pixel_to_map(x: f64, y: f64) -> [f64; 2] {
    [x, -y]
}

/// Translate a pixel-space ring by `offset` and convert it to map space
pub fn ring_to_map(ring: &[(f64, f64)], offset: (f64, f64)) -> Vec<[f64; 2]> {
    ring.iter()
        .map(|&(x, y)| pixel_to_map(x + offset.0, y + offset.1))
        .collect()
}

/// Close an open ring by repeating its first vertex
pub fn close_ring(mut ring: Vec<[f64; 2]>) -> Vec<[f64; 2]> {
    if let Some(&first) = ring.first()
        && ring.last() != Some(&first)
    {
        ring.push(first);
    }
    ring
}

fn signed_area(ring: &[[f64; 2]]) -> f64 {
    ring.windows(2)
        .map(|w| w[0][0] * w[1][1] - w[1][0] * w[0][1])
        .sum::<f64>()
        / 2.0
}

/// Area centroid of a closed ring; vertex mean for degenerate rings
pub fn polygon_centroid(ring: &[[f64; 2]]) -> Option<[f64; 2]> {
    if ring.is_empty() {
        return None;
    }
    let area = signed_area(ring);
    if area.abs() < f64::EPSILON {
        let n = ring.len() as f64;
        let (sx, sy) = ring.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
        return Some([sx / n, sy / n]);
    }

    let (cx, cy) = ring.windows(2).fold((0.0, 0.0), |(cx, cy), w| {
        let cross = w[0][0] * w[1][1] - w[1][0] * w[0][1];
        (cx + (w[0][0] + w[1][0]) * cross, cy + (w[0][1] + w[1][1]) * cross)
    });
    Some([cx / (6.0 * area), cy / (6.0 * area)])
}

/// Number of ring vertices inside `bbox`, not counting the closing vertex
pub fn vertices_in(ring: &[[f64; 2]], bbox: &BBox) -> usize {
    let open = match ring {
        [first, .., last] if first == last => &ring[..ring.len() - 1],
        _ => ring,
    };
    open.iter().filter(|p| bbox.contains(**p)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_bounds_formula() {
        // max_zoom 6, z 6: 256 px tiles
        assert_eq!(tile_bounds(0, 0, 6, 6, 256), BBox::new(0.0, -256.0, 256.0, 0.0));
        assert_eq!(tile_bounds(2, 1, 6, 6, 256), BBox::new(512.0, -512.0, 768.0, -256.0));
        // Two zoom levels out a tile covers 1024 px
        assert_eq!(tile_bounds(1, 0, 4, 6, 256), BBox::new(1024.0, -1024.0, 2048.0, 0.0));
    }

    #[test]
    fn test_ring_to_map_flips_y() {
        let ring = ring_to_map(&[(1.0, 2.0), (3.0, 2.0)], (10.0, 20.0));
        assert_eq!(ring, vec![[11.0, -22.0], [13.0, -22.0]]);
    }

    #[test]
    fn test_polygon_centroid() {
        let square = close_ring(vec![[10.0, -50.0], [20.0, -50.0], [20.0, -10.0], [10.0, -10.0]]);
        assert_eq!(square.len(), 5);
        assert_eq!(polygon_centroid(&square), Some([15.0, -30.0]));
        assert_eq!(polygon_centroid(&[]), None);
    }

    #[test]
    fn test_vertices_in_ignores_closing_vertex() {
        let square = close_ring(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]);
        assert_eq!(vertices_in(&square, &BBox::new(-1.0, -1.0, 2.0, 2.0)), 4);
        assert_eq!(vertices_in(&square, &BBox::new(0.5, -1.0, 2.0, 2.0)), 2);
    }
}
