// contour.rs — Marching squares over a histogram pyramid (CPU reference).
//
// Mirrors shaders/marching_squares/*.wgsl. The GPU pipeline in
// gpu/contour.rs is validated against `extract_contour`.
//
// CELL CASES
// ──────────
// Cell (i, j) has corners
//
//     c3 (i, j+1) ── e2 ── c2 (i+1, j+1)
//         │                    │
//        e3                   e1
//         │                    │
//     c0 (i, j)   ── e0 ── c1 (i+1, j)
//
// A corner is inside when its value is < 0. The case index sets bit n for
// an inside corner cn. Edge en joins corner n to corner (n+1) % 4. Each case
// maps to zero, one or two edge pairs; the ambiguous saddles 5 and 10 are
// always resolved as two separated segments (no centre sampling), so the
// per-cell count depends only on the case.
//
// HISTOGRAM PYRAMID
// ─────────────────
// Level 0 holds the per-cell segment count, (w-1)×(h-1) for a field of w×h
// samples. Level k+1 is the ceiling-half of level k, each entry the sum of
// the 2×2 block below it (clamped at the right/bottom border). The 1×1 top
// is the total. Segment s is found by walking down from the top: at each
// level visit the up-to-four children in row-major order, subtracting
// their counts until s falls inside one.

use crate::error::{Error, Result};
use crate::field::Field;

/// Upper bound on pyramid depth; matches the level table in the kernels.
/// Sixteen levels cover grids up to 32768 cells on a side.
pub const MAX_PYRAMID_LEVELS: usize = 16;

/// Edge pairs per case; `-1` marks an unused slot.
pub const CASE_EDGES: [[i8; 4]; 16] = [
    [-1, -1, -1, -1],
    [3, 0, -1, -1],
    [0, 1, -1, -1],
    [3, 1, -1, -1],
    [1, 2, -1, -1],
    [3, 0, 1, 2],
    [0, 2, -1, -1],
    [3, 2, -1, -1],
    [2, 3, -1, -1],
    [0, 2, -1, -1],
    [0, 1, 2, 3],
    [1, 2, -1, -1],
    [1, 3, -1, -1],
    [0, 1, -1, -1],
    [3, 0, -1, -1],
    [-1, -1, -1, -1],
];

const CORNER_OFFSETS: [[usize; 2]; 4] = [[0, 0], [1, 0], [1, 1], [0, 1]];

/// Case index of cell (i, j).
pub fn cell_case(field: &Field<f32>, i: usize, j: usize) -> usize {
    CORNER_OFFSETS
        .iter()
        .enumerate()
        .filter(|(_, o)| field.get(i + o[0], j + o[1]) < 0.0)
        .fold(0, |acc, (bit, _)| acc | (1 << bit))
}

/// Number of segments (0, 1 or 2) a case produces.
pub fn case_segment_count(case: usize) -> i32 {
    let e = CASE_EDGES[case];
    (e[0] >= 0) as i32 + (e[2] >= 0) as i32
}

/// Zero crossing on edge `edge` of cell (i, j), in sample coordinates.
fn edge_point(field: &Field<f32>, i: usize, j: usize, edge: usize) -> [f32; 2] {
    let a = CORNER_OFFSETS[edge];
    let b = CORNER_OFFSETS[(edge + 1) % 4];
    let va = field.get(i + a[0], j + a[1]);
    let vb = field.get(i + b[0], j + b[1]);
    let denom = va - vb;
    let t = if denom != 0.0 { va / denom } else { 0.5 };
    [
        (i + a[0]) as f32 + t * (b[0] as f32 - a[0] as f32),
        (j + a[1]) as f32 + t * (b[1] as f32 - a[1] as f32),
    ]
}

/// Segment `local` (0 or 1) of cell (i, j) as `[x0, y0, x1, y1]`.
pub fn cell_segment(field: &Field<f32>, i: usize, j: usize, local: usize) -> [f32; 4] {
    let e = CASE_EDGES[cell_case(field, i, j)];
    let p = edge_point(field, i, j, e[2 * local] as usize);
    let q = edge_point(field, i, j, e[2 * local + 1] as usize);
    [p[0], p[1], q[0], q[1]]
}

// ---------------------------------------------------------------------------
// Pyramid shape
// ---------------------------------------------------------------------------

/// Level dimensions for a field of `width × height` samples, finest first,
/// ending at 1×1.
///
/// # Errors
/// `IllegalArgument` for fields smaller than 2×2 (no cells) or deeper than
/// `MAX_PYRAMID_LEVELS`.
pub fn pyramid_level_dims(width: u32, height: u32) -> Result<Vec<(u32, u32)>> {
    if width < 2 || height < 2 {
        return Err(Error::IllegalArgument(format!(
            "field of {width}×{height} samples has no cells"
        )));
    }
    let mut dims = vec![(width - 1, height - 1)];
    while let Some(&(w, h)) = dims.last() {
        if w == 1 && h == 1 {
            break;
        }
        dims.push((w.div_ceil(2), h.div_ceil(2)));
    }
    if dims.len() > MAX_PYRAMID_LEVELS {
        return Err(Error::IllegalArgument(format!(
            "field of {width}×{height} needs {} pyramid levels, at most {MAX_PYRAMID_LEVELS} supported",
            dims.len()
        )));
    }
    Ok(dims)
}

// ---------------------------------------------------------------------------
// HistogramPyramid (host)
// ---------------------------------------------------------------------------

/// One pyramid level: row-major counts.
#[derive(Debug, Clone, PartialEq)]
pub struct PyramidLevel {
    pub width: u32,
    pub height: u32,
    pub counts: Vec<i32>,
}

impl PyramidLevel {
    #[inline]
    fn get(&self, x: u32, y: u32) -> i32 {
        self.counts[(y * self.width + x) as usize]
    }
}

/// Host histogram pyramid over a field's marching-squares counts.
#[derive(Debug, Clone)]
pub struct HistogramPyramid {
    levels: Vec<PyramidLevel>,
}

impl HistogramPyramid {
    /// Populate level 0 from `field` and reduce to the top.
    pub fn build(field: &Field<f32>) -> Result<Self> {
        let dims = pyramid_level_dims(field.width() as u32, field.height() as u32)?;

        let (w0, h0) = dims[0];
        let mut base = Vec::with_capacity((w0 * h0) as usize);
        for j in 0..h0 as usize {
            for i in 0..w0 as usize {
                base.push(case_segment_count(cell_case(field, i, j)));
            }
        }
        let mut levels = vec![PyramidLevel { width: w0, height: h0, counts: base }];

        for &(w, h) in &dims[1..] {
            let src = &levels[levels.len() - 1];
            let mut counts = Vec::with_capacity((w * h) as usize);
            for y in 0..h {
                for x in 0..w {
                    counts.push(roll_up(src, x, y));
                }
            }
            levels.push(PyramidLevel { width: w, height: h, counts });
        }
        Ok(HistogramPyramid { levels })
    }

    pub fn levels(&self) -> &[PyramidLevel] {
        &self.levels
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Total segment count (the 1×1 top).
    pub fn total(&self) -> u32 {
        self.levels[self.levels.len() - 1].counts[0] as u32
    }

    /// Map a flat segment index to `(cell_x, cell_y, local)`.
    pub fn locate(&self, index: u32) -> Option<(u32, u32, u32)> {
        if index >= self.total() {
            return None;
        }
        let mut remaining = index as i32;
        let (mut px, mut py) = (0u32, 0u32);
        for level in self.levels[..self.levels.len() - 1].iter().rev() {
            let mut found = false;
            for k in 0..4u32 {
                let cx = 2 * px + (k & 1);
                let cy = 2 * py + (k >> 1);
                if cx >= level.width || cy >= level.height {
                    continue;
                }
                let c = level.get(cx, cy);
                if remaining < c {
                    px = cx;
                    py = cy;
                    found = true;
                    break;
                }
                remaining -= c;
            }
            if !found {
                return None;
            }
        }
        Some((px, py, remaining as u32))
    }
}

/// Sum of the clamped 2×2 block of `src` under parent (x, y).
fn roll_up(src: &PyramidLevel, x: u32, y: u32) -> i32 {
    let mut sum = 0;
    for dy in 0..2 {
        for dx in 0..2 {
            let sx = 2 * x + dx;
            let sy = 2 * y + dy;
            if sx < src.width && sy < src.height {
                sum += src.get(sx, sy);
            }
        }
    }
    sum
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Zero contour of `field` as `[x0, y0, x1, y1]` segments, in the order the
/// generation kernel writes them (pyramid index order).
pub fn extract_contour(field: &Field<f32>) -> Result<Vec<[f32; 4]>> {
    let pyramid = HistogramPyramid::build(field)?;
    let mut out = Vec::with_capacity(pyramid.total() as usize);
    for s in 0..pyramid.total() {
        let Some((i, j, local)) = pyramid.locate(s) else {
            return Err(Error::IllegalState(format!("segment {s} not found in pyramid")));
        };
        out.push(cell_segment(field, i as usize, j as usize, local as usize));
    }
    Ok(out)
}
