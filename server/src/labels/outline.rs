//! Object outlines traced from label matrices
//!
//! Every pixel contributes the edges it shares with a different label as
//! directed unit segments (clockwise in image coordinates). Chaining segments
//! end to start yields closed loops; the loop of largest area is the object's
//! outer boundary. Collinear vertices along straight pixel runs are dropped.

use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use tracing::debug;

use crate::mosaic::Raster;

use super::types::{LabelOutline, PixelBounds};

type Corner = (i64, i64);
type Segment = (Corner, Corner);

#[derive(Default)]
struct Accumulator {
    segments: Vec<Segment>,
    sum_x: f64,
    sum_y: f64,
    area: usize,
    bounds: Option<PixelBounds>,
}

/// Trace the outline, centroid and bounds of every nonzero label
///
/// Results are sorted by label.
pub fn extract_outlines(labels: &Raster<u32>) -> Vec<LabelOutline> {
    let (width, height) = labels.dimensions();
    let at = |x: i64, y: i64| -> u32 {
        if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
            0
        } else {
            labels.get_pixel(x as u32, y as u32).0[0]
        }
    };

    let mut objects: BTreeMap<u32, Accumulator> = BTreeMap::new();
    for (px, py, pixel) in labels.enumerate_pixels() {
        let label = pixel.0[0];
        if label == 0 {
            continue;
        }
        let acc = objects.entry(label).or_default();
        acc.sum_x += px as f64 + 0.5;
        acc.sum_y += py as f64 + 0.5;
        acc.area += 1;
        match acc.bounds.as_mut() {
            Some(bounds) => bounds.extend(px, py),
            None => acc.bounds = Some(PixelBounds::point(px, py)),
        }

        let (x, y) = (px as i64, py as i64);
        if at(x, y - 1) != label {
            acc.segments.push(((x, y), (x + 1, y)));
        }
        if at(x + 1, y) != label {
            acc.segments.push(((x + 1, y), (x + 1, y + 1)));
        }
        if at(x, y + 1) != label {
            acc.segments.push(((x + 1, y + 1), (x, y + 1)));
        }
        if at(x - 1, y) != label {
            acc.segments.push(((x, y + 1), (x, y)));
        }
    }

    let outlines: Vec<LabelOutline> = objects
        .into_par_iter()
        .filter_map(|(label, acc)| {
            let ring = outer_loop(acc.segments)?;
            let bounds = acc.bounds?;
            Some(LabelOutline {
                label,
                ring,
                centroid: (acc.sum_x / acc.area as f64, acc.sum_y / acc.area as f64),
                bounds,
                area: acc.area,
            })
        })
        .collect();

    debug!("Traced {} outlines in {}x{} label raster", outlines.len(), width, height);
    outlines
}

fn direction(segment: &Segment) -> Corner {
    (segment.1.0 - segment.0.0, segment.1.1 - segment.0.1)
}

/// Preference for leaving a corner after arriving along `incoming`
///
/// The object lies on the right of every segment, so the right turn keeps
/// diagonally touching pixels in separate loops.
fn turn_rank(incoming: Corner, outgoing: Corner) -> u8 {
    if outgoing == (-incoming.1, incoming.0) {
        0
    } else if outgoing == incoming {
        1
    } else if outgoing == (incoming.1, -incoming.0) {
        2
    } else {
        3
    }
}

fn outer_loop(segments: Vec<Segment>) -> Option<Vec<(f64, f64)>> {
    let mut starts: HashMap<Corner, Vec<usize>> = HashMap::new();
    for (index, segment) in segments.iter().enumerate() {
        starts.entry(segment.0).or_default().push(index);
    }

    let mut used = vec![false; segments.len()];
    let mut best: Option<(f64, Vec<Corner>)> = None;

    for first in 0..segments.len() {
        if used[first] {
            continue;
        }
        used[first] = true;
        let start = segments[first].0;
        let mut heading = direction(&segments[first]);
        let mut current = segments[first].1;
        let mut points = vec![start, current];

        while current != start {
            let Some(next) = starts.get(&current).and_then(|outgoing| {
                outgoing
                    .iter()
                    .copied()
                    .filter(|&i| !used[i])
                    .min_by_key(|&i| turn_rank(heading, direction(&segments[i])))
            }) else {
                break;
            };
            used[next] = true;
            heading = direction(&segments[next]);
            current = segments[next].1;
            points.push(current);
        }

        if points.len() < 5 || points.first() != points.last() {
            continue;
        }
        let area = signed_area(&points).abs();
        if best.as_ref().is_none_or(|(best_area, _)| area > *best_area) {
            best = Some((area, points));
        }
    }

    let (_, points) = best?;
    let ring = remove_collinear(points);
    (ring.len() >= 4).then(|| ring.into_iter().map(|(x, y)| (x as f64, y as f64)).collect())
}

fn signed_area(points: &[Corner]) -> f64 {
    points
        .windows(2)
        .map(|w| (w[0].0 * w[1].1 - w[1].0 * w[0].1) as f64)
        .sum::<f64>()
        / 2.0
}

/// Drop vertices lying on a straight line between their neighbours
fn remove_collinear(mut points: Vec<Corner>) -> Vec<Corner> {
    if points.first() == points.last() {
        points.pop();
    }
    let len = points.len();
    if len < 3 {
        return Vec::new();
    }

    let mut kept: Vec<Corner> = (0..len)
        .filter(|&i| {
            let prev = points[(i + len - 1) % len];
            let curr = points[i];
            let next = points[(i + 1) % len];
            let cross = (curr.0 - prev.0) * (next.1 - curr.1) - (curr.1 - prev.1) * (next.0 - curr.0);
            cross != 0
        })
        .map(|i| points[i])
        .collect();

    if kept.len() < 3 {
        return Vec::new();
    }
    kept.push(kept[0]);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};

    #[test]
    fn test_rectangle_outline() {
        // Label 3 covers x in [2, 5), y in [1, 3)
        let labels: Raster<u32> = ImageBuffer::from_fn(8, 6, |x, y| {
            Luma([if (2..5).contains(&x) && (1..3).contains(&y) { 3 } else { 0 }])
        });
        let outlines = extract_outlines(&labels);
        assert_eq!(outlines.len(), 1);

        let outline = &outlines[0];
        assert_eq!(outline.label, 3);
        assert_eq!(outline.area, 6);
        assert_eq!(outline.ring.len(), 5);
        assert_eq!(outline.ring.first(), outline.ring.last());
        let mut corners: Vec<(f64, f64)> = outline.ring[..4].to_vec();
        corners.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(corners, vec![(2.0, 1.0), (2.0, 3.0), (5.0, 1.0), (5.0, 3.0)]);
        assert_eq!(outline.centroid, (3.5, 2.0));
        assert_eq!(
            outline.bounds,
            PixelBounds {
                min_x: 2,
                min_y: 1,
                max_x: 4,
                max_y: 2
            }
        );
    }

    #[test]
    fn test_object_touching_raster_edge() {
        let labels: Raster<u32> = ImageBuffer::from_fn(4, 4, |x, y| Luma([if x < 2 && y < 2 { 1 } else { 2 }]));
        let outlines = extract_outlines(&labels);
        assert_eq!(outlines.len(), 2);
        assert_eq!(outlines[0].ring.len(), 5);
        // L-shaped label 2 has six corners
        assert_eq!(outlines[1].ring.len(), 7);
        assert_eq!(outlines[1].area, 12);
    }

    #[test]
    fn test_hole_is_ignored() {
        // Ring of label 1 around a background pixel
        let labels: Raster<u32> = ImageBuffer::from_fn(3, 3, |x, y| Luma([if x == 1 && y == 1 { 0 } else { 1 }]));
        let outlines = extract_outlines(&labels);
        assert_eq!(outlines.len(), 1);
        assert_eq!(outlines[0].ring.len(), 5);
        assert_eq!(signed_area(&outlines[0].ring.iter().map(|&(x, y)| (x as i64, y as i64)).collect::<Vec<_>>()).abs(), 9.0);
    }

    #[test]
    fn test_diagonal_pixels_form_separate_rings() {
        // Checkerboard: label 4 touches itself only at corners
        let labels: Raster<u32> = ImageBuffer::from_fn(4, 4, |x, y| Luma([if (x + y) % 2 == 0 { 4 } else { 0 }]));
        let outlines = extract_outlines(&labels);
        assert_eq!(outlines.len(), 1);

        let ring: Vec<Corner> = outlines[0].ring.iter().map(|&(x, y)| (x as i64, y as i64)).collect();
        assert_eq!(ring.len(), 5);
        assert_eq!(signed_area(&ring).abs(), 1.0);
        let mut vertices = ring[..ring.len() - 1].to_vec();
        vertices.sort();
        vertices.dedup();
        assert_eq!(vertices.len(), 4);
    }

    #[test]
    fn test_pinched_shape_keeps_larger_part() {
        // 2x2 block and a single pixel meeting at corner (2, 2)
        let labels: Raster<u32> = ImageBuffer::from_fn(4, 4, |x, y| Luma([if (x < 2 && y < 2) || (x == 2 && y == 2) { 1 } else { 0 }]));
        let outlines = extract_outlines(&labels);
        let ring: Vec<Corner> = outlines[0].ring.iter().map(|&(x, y)| (x as i64, y as i64)).collect();
        assert_eq!(ring.len(), 5);
        assert_eq!(signed_area(&ring).abs(), 4.0);
        assert_eq!(outlines[0].area, 5);
    }

    #[test]
    fn test_single_pixel() {
        let mut labels: Raster<u32> = ImageBuffer::new(3, 3);
        labels.put_pixel(1, 1, Luma([9]));
        let outlines = extract_outlines(&labels);
        assert_eq!(outlines[0].ring.len(), 5);
        assert_eq!(outlines[0].centroid, (1.5, 1.5));
    }
}
