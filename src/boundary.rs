// boundary.rs — Gridline crossings of solid-object outlines (CPU reference).
//
// Mirrors the `count_boundary_points` / `write_boundary_points` kernels in
// shaders/boundary/boundary_points.wgsl line for line. The GPU pipeline in
// gpu/boundary.rs is validated against `extract_boundary_points`.
//
// COORDINATES
// ───────────
// Polygon vertices are in unit coordinates. Multiplying by the grid
// resolution r maps them to grid units, where the vertical gridlines are
// x = k and the horizontal gridlines are y = k for integer k. Crossing
// points are reported in grid units.
//
// EDGE-CASE POLICY
// ────────────────
// For a segment a → b and a gridline at coordinate k along one axis, with
// d0 = a - k and d1 = b - k:
//
//   a == b (parallel)          → no crossing
//   d0 == 0  (start vertex)    → crossing, reported once, by this segment
//   d1 == 0  (end vertex)      → no crossing; the next segment reports it
//   |d0| or |d1| < 1e-3        → no crossing (near-axis-aligned segment,
//                                 the intersection is numerically unstable)
//   sign(d0) != sign(d1)       → crossing
//
// A horizontal crossing lying within 1e-3 of an included vertical crossing
// (i.e. the segment passes through a grid corner) is the same point seen
// twice; only the vertical one is kept.
//
// Within a segment, crossings are ordered by the segment parameter t, with
// the vertical crossing first on a tie. Segments are laid out one after the
// other using the inclusive prefix sum of the per-segment counts.
//
// CAPACITY
// ────────
// A segment producing more than MAX_CROSSINGS_PER_SEGMENT crossings reports
// OVERFLOW_SENTINEL instead of a count. Extraction then fails with
// `Error::IllegalArgument(TOO_MANY_INTERSECTIONS)`: the resolution is too
// fine for the outline, and silently truncating would lose boundary points.

use crate::error::{Error, Result, TOO_MANY_INTERSECTIONS};
use crate::polygon::Polygon;

/// Fixed per-segment output capacity of the generation kernel.
pub const MAX_CROSSINGS_PER_SEGMENT: usize = 64;

/// Gridlines closer than this to a vertex are ignored (except exact hits on
/// the start vertex).
pub const VERTEX_EPSILON: f32 = 1e-3;

/// Horizontal crossings this close to an included vertical crossing are
/// treated as the same grid-corner point.
pub const MERGE_EPSILON: f32 = 1e-3;

/// Count written by a segment that exceeds `MAX_CROSSINGS_PER_SEGMENT`.
pub const OVERFLOW_SENTINEL: i32 = -1;

/// One gridline crossing along a segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossing {
    /// Segment parameter in [0, 1).
    pub t: f32,
    /// Grid-unit position.
    pub point: [f32; 2],
    pub axis: Axis,
}

/// Which gridline family a crossing lies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// A vertical line x = k.
    Vertical,
    /// A horizontal line y = k.
    Horizontal,
}

/// Per-object extraction result, index-aligned with the polygon's segments.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryPoints {
    pub counts: Vec<i32>,
    /// Inclusive prefix sum of `counts`; the last entry is the total.
    pub prefix: Vec<i32>,
    /// Packed crossing points in grid units.
    pub points: Vec<[f32; 2]>,
}

impl BoundaryPoints {
    pub fn total(&self) -> usize {
        self.prefix.last().copied().unwrap_or(0) as usize
    }

    /// Points as the flat `x, y` list the device buffer holds.
    pub fn flat(&self) -> Vec<f32> {
        self.points.iter().flat_map(|p| [p[0], p[1]]).collect()
    }
}

// ---------------------------------------------------------------------------
// Per-gridline rules
// ---------------------------------------------------------------------------

/// Does the segment from coordinate `a` to `b` cross the gridline at `k`
/// under the edge-case policy above?
#[inline]
pub fn crosses_gridline(a: f32, b: f32, k: f32) -> bool {
    if a == b {
        return false;
    }
    let d0 = a - k;
    let d1 = b - k;
    if d0 == 0.0 {
        return true;
    }
    if d1 == 0.0 {
        return false;
    }
    if d0.abs() < VERTEX_EPSILON || d1.abs() < VERTEX_EPSILON {
        return false;
    }
    (d0 < 0.0) != (d1 < 0.0)
}

/// Candidate gridlines between `a` and `b`, in the direction of travel.
fn gridlines(a: f32, b: f32) -> impl Iterator<Item = f32> {
    let lo = a.min(b).ceil() as i64;
    let hi = a.max(b).floor() as i64;
    let ascending = b >= a;
    let n = if hi >= lo { (hi - lo + 1) as usize } else { 0 };
    (0..n).map(move |i| {
        let k = if ascending { lo + i as i64 } else { hi - i as i64 };
        k as f32
    })
}

/// Would a horizontal crossing at grid x-coordinate `x` coincide with an
/// included vertical crossing of the same segment?
#[inline]
fn merges_with_vertical(a: [f32; 2], b: [f32; 2], x: f32) -> bool {
    let k = x.round();
    (x - k).abs() < MERGE_EPSILON && crosses_gridline(a[0], b[0], k)
}

// ---------------------------------------------------------------------------
// Segment level
// ---------------------------------------------------------------------------

/// All crossings of one segment (grid units), ordered by `t`.
///
/// Not capped; only call this once `count_crossings` has accepted the
/// segment.
pub fn segment_crossings(a: [f32; 2], b: [f32; 2]) -> Vec<Crossing> {
    let mut out = Vec::new();

    for k in gridlines(a[0], b[0]) {
        if crosses_gridline(a[0], b[0], k) {
            let t = (k - a[0]) / (b[0] - a[0]);
            out.push(Crossing { t, point: [k, a[1] + t * (b[1] - a[1])], axis: Axis::Vertical });
        }
    }
    for k in gridlines(a[1], b[1]) {
        if crosses_gridline(a[1], b[1], k) {
            let t = (k - a[1]) / (b[1] - a[1]);
            let x = a[0] + t * (b[0] - a[0]);
            if !merges_with_vertical(a, b, x) {
                out.push(Crossing { t, point: [x, k], axis: Axis::Horizontal });
            }
        }
    }

    // Stable: verticals were pushed first and win ties.
    out.sort_by(|p, q| p.t.total_cmp(&q.t));
    out
}

/// Count written by the count pass for one segment: the number of
/// crossings, or `OVERFLOW_SENTINEL` past capacity.
///
/// Stops at the first crossing past capacity, so the cost is bounded by
/// `MAX_CROSSINGS_PER_SEGMENT` however fine the grid is.
pub fn count_crossings(a: [f32; 2], b: [f32; 2]) -> i32 {
    let vertical = gridlines(a[0], b[0]).filter(|&k| crosses_gridline(a[0], b[0], k));
    let horizontal = gridlines(a[1], b[1]).filter(|&k| {
        crosses_gridline(a[1], b[1], k) && {
            let t = (k - a[1]) / (b[1] - a[1]);
            !merges_with_vertical(a, b, a[0] + t * (b[0] - a[0]))
        }
    });

    let mut n = 0usize;
    for _ in vertical.chain(horizontal) {
        n += 1;
        if n > MAX_CROSSINGS_PER_SEGMENT {
            return OVERFLOW_SENTINEL;
        }
    }
    n as i32
}

/// Serial inclusive prefix sum (the single-work-item kernel's semantics).
pub fn inclusive_prefix_sum(counts: &[i32]) -> Vec<i32> {
    counts
        .iter()
        .scan(0i32, |acc, &c| {
            *acc += c;
            Some(*acc)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Object level
// ---------------------------------------------------------------------------

/// Extract the packed gridline crossings of `polygon` at `resolution` cells
/// per unit length.
///
/// # Errors
/// `Error::IllegalArgument(TOO_MANY_INTERSECTIONS)` if any segment exceeds
/// the per-segment capacity.
pub fn extract_boundary_points(polygon: &Polygon, resolution: u32) -> Result<BoundaryPoints> {
    if resolution == 0 {
        return Err(Error::IllegalArgument("grid resolution must be positive".into()));
    }
    let r = resolution as f32;
    let scaled: Vec<([f32; 2], [f32; 2])> = polygon
        .segments()
        .map(|(a, b)| ([a[0] * r, a[1] * r], [b[0] * r, b[1] * r]))
        .collect();

    let counts: Vec<i32> = scaled.iter().map(|&(a, b)| count_crossings(a, b)).collect();
    if counts.iter().any(|&c| c < 0) {
        return Err(Error::IllegalArgument(TOO_MANY_INTERSECTIONS.into()));
    }

    let prefix = inclusive_prefix_sum(&counts);
    let total = prefix.last().copied().unwrap_or(0) as usize;

    let mut points = vec![[0.0f32; 2]; total];
    for (i, &(a, b)) in scaled.iter().enumerate() {
        let offset = if i == 0 { 0 } else { prefix[i - 1] as usize };
        for (j, c) in segment_crossings(a, b).into_iter().enumerate() {
            points[offset + j] = c.point;
        }
    }

    Ok(BoundaryPoints { counts, prefix, points })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gridlines_follow_direction_of_travel() {
        let fwd: Vec<f32> = gridlines(0.5, 3.5).collect();
        assert_eq!(fwd, vec![1.0, 2.0, 3.0]);
        let back: Vec<f32> = gridlines(3.5, 0.5).collect();
        assert_eq!(back, vec![3.0, 2.0, 1.0]);
        assert_eq!(gridlines(0.2, 0.8).count(), 0);
    }

    #[test]
    fn test_crosses_gridline_rules() {
        assert!(crosses_gridline(1.0, 1.6, 1.0), "start vertex is included");
        assert!(!crosses_gridline(0.2, 1.0, 1.0), "end vertex is excluded");
        assert!(!crosses_gridline(0.9999, 1.0001, 1.0), "tolerance band");
        assert!(!crosses_gridline(1.0, 1.0, 1.0), "parallel");
        assert!(crosses_gridline(0.4, 1.6, 1.0));
        assert!(!crosses_gridline(0.4, 0.9, 1.0));
    }

    #[test]
    fn test_prefix_sum_inclusive() {
        assert_eq!(inclusive_prefix_sum(&[1, 0, 2, 3]), vec![1, 1, 3, 6]);
        assert!(inclusive_prefix_sum(&[]).is_empty());
    }

    #[test]
    fn test_overflow_sentinel() {
        // 200 vertical gridlines in one segment.
        assert_eq!(count_crossings([0.5, 0.5], [200.5, 0.5]), OVERFLOW_SENTINEL);
        assert_eq!(count_crossings([0.5, 0.5], [64.5, 0.5]), 64);
    }

    #[test]
    fn test_count_matches_generated_crossings() {
        let segments = [
            ([0.5, 0.5], [1.5, 1.5]),
            ([0.4, 0.4], [3.2, 3.2002]),
            ([3.7, 2.9], [0.2, 0.4]),
            ([1.0, 1.0], [3.0, 1.0]),
            ([0.9995, 0.5], [2.5, 0.5]),
        ];
        for (a, b) in segments {
            assert_eq!(count_crossings(a, b) as usize, segment_crossings(a, b).len(), "{a:?} → {b:?}");
        }
    }

    #[test]
    fn test_overflow_detected_without_walking_the_segment() {
        // Tens of millions of candidate gridlines; only the first 65 are visited.
        assert_eq!(count_crossings([0.0, 0.0], [2.0e7, 1.97e7]), OVERFLOW_SENTINEL);
    }
}
