//! Zoom-dependent outline simplification (Ramer-Douglas-Peucker)

/// Simplification tolerance in mosaic pixels at zoom `z`
///
/// One screen pixel at zoom `z` covers `2^(max_zoom - z)` mosaic pixels; half
/// of that is invisible.
pub fn tolerance(z: u32, max_zoom: u32) -> f64 {
    0.5 * 2f64.powi(max_zoom.saturating_sub(z) as i32)
}

fn segment_distance(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    let (dx, dy) = (b[0] - a[0], b[1] - a[1]);
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return ((p[0] - a[0]).powi(2) + (p[1] - a[1]).powi(2)).sqrt();
    }
    let t = (((p[0] - a[0]) * dx + (p[1] - a[1]) * dy) / len_sq).clamp(0.0, 1.0);
    let (px, py) = (a[0] + t * dx, a[1] + t * dy);
    ((p[0] - px).powi(2) + (p[1] - py).powi(2)).sqrt()
}

/// Indices kept by RDP on the open polyline `points`
fn rdp_keep(points: &[[f64; 2]], epsilon: f64) -> Vec<bool> {
    let mut keep = vec![false; points.len()];
    if points.is_empty() {
        return keep;
    }
    let last = points.len() - 1;
    keep[0] = true;
    keep[last] = true;

    let mut stack = vec![(0, last)];
    while let Some((start, end)) = stack.pop() {
        if end <= start + 1 {
            continue;
        }
        let (index, distance) = (start + 1..end)
            .map(|i| (i, segment_distance(points[i], points[start], points[end])))
            .fold((start, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });
        if distance > epsilon {
            keep[index] = true;
            stack.push((start, index));
            stack.push((index, end));
        }
    }
    keep
}

/// Simplify a closed ring, keeping at least a closed triangle
///
/// Tolerances below one pixel return the ring unchanged.
pub fn simplify_ring(ring: &[[f64; 2]], epsilon: f64) -> Vec<[f64; 2]> {
    if epsilon < 1.0 || ring.len() <= 4 {
        return ring.to_vec();
    }
    let open = if ring.first() == ring.last() {
        &ring[..ring.len() - 1]
    } else {
        ring
    };
    if open.len() < 3 {
        return ring.to_vec();
    }

    // Split the ring at the vertex farthest from the first one
    let far = (1..open.len())
        .max_by(|&a, &b| {
            segment_distance(open[a], open[0], open[0]).total_cmp(&segment_distance(open[b], open[0], open[0]))
        })
        .unwrap_or(1);

    let mut closed: Vec<[f64; 2]> = open.to_vec();
    closed.push(open[0]);
    let mut keep = rdp_keep(&closed[..=far], epsilon);
    let tail = rdp_keep(&closed[far..], epsilon);
    keep.extend_from_slice(&tail[1..]);

    let mut out: Vec<[f64; 2]> = closed
        .iter()
        .zip(&keep)
        .filter(|(_, k)| **k)
        .map(|(p, _)| *p)
        .collect();

    if out.len() < 4 {
        // Closed triangle: first, farthest and the vertex farthest from that chord
        let third = (1..open.len())
            .filter(|&i| i != far)
            .max_by(|&a, &b| {
                segment_distance(open[a], open[0], open[far]).total_cmp(&segment_distance(open[b], open[0], open[far]))
            })
            .unwrap_or(far);
        let (second, third) = if third < far { (third, far) } else { (far, third) };
        out = vec![open[0], open[second], open[third], open[0]];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circle(n: usize, radius: f64) -> Vec<[f64; 2]> {
        let mut ring: Vec<[f64; 2]> = (0..n)
            .map(|i| {
                let a = i as f64 / n as f64 * std::f64::consts::TAU;
                [radius * a.cos(), radius * a.sin()]
            })
            .collect();
        ring.push(ring[0]);
        ring
    }

    #[test]
    fn test_tolerance_doubles_per_zoom_out() {
        assert_eq!(tolerance(6, 6), 0.5);
        assert_eq!(tolerance(5, 6), 1.0);
        assert_eq!(tolerance(3, 6), 4.0);
    }

    #[test]
    fn test_full_resolution_is_unchanged() {
        let ring = circle(64, 20.0);
        assert_eq!(simplify_ring(&ring, tolerance(6, 6)), ring);
    }

    #[test]
    fn test_simplification_reduces_vertices() {
        let ring = circle(200, 50.0);
        let coarse = simplify_ring(&ring, 4.0);
        assert!(coarse.len() < ring.len() / 4);
        assert!(coarse.len() >= 4);
        assert_eq!(coarse.first(), coarse.last());
    }

    #[test]
    fn test_collinear_square_edges_collapse() {
        let mut ring: Vec<[f64; 2]> = Vec::new();
        for i in 0..10 {
            ring.push([i as f64, 0.0]);
        }
        for i in 0..10 {
            ring.push([10.0, i as f64]);
        }
        for i in 0..10 {
            ring.push([10.0 - i as f64, 10.0]);
        }
        for i in 0..10 {
            ring.push([0.0, 10.0 - i as f64]);
        }
        ring.push([0.0, 0.0]);

        let simplified = simplify_ring(&ring, 1.0);
        assert_eq!(simplified.len(), 5);
    }

    #[test]
    fn test_tiny_ring_keeps_a_triangle() {
        let ring = circle(12, 1.0);
        let simplified = simplify_ring(&ring, 64.0);
        assert_eq!(simplified.len(), 4);
        assert_eq!(simplified.first(), simplified.last());
    }
}
