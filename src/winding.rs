// winding.rs — Winding-number field accumulation (CPU reference).
//
// Mirrors shaders/winding_number.wgsl. Each grid cell samples one point,
// `(x + origin.x, y + origin.y)` in grid units, and adds the winding number
// of every solid outline around that point. Inside a simple counter-clockwise
// polygon the count is +1, clockwise -1, outside 0.
//
// The crossing test is the classic half-open upward/downward edge rule
// (Sunday): an edge counts when it straddles the sample's horizontal line,
// with the start vertex inclusive and the end vertex exclusive, and the
// sample lies strictly to its left (upward) or right (downward).

use crate::double_buffer::DoubleBuffer;
use crate::field::Field;
use crate::polygon::Polygon;

/// Sampling parameters shared by the CPU and GPU paths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindingConfig {
    /// Offset of the sample point within each cell. (0.5, 0.5) samples cell
    /// centres.
    pub origin: [f32; 2],
    /// Factor applied to polygon vertices to reach grid units; usually the
    /// grid resolution.
    pub scale: f32,
}

impl Default for WindingConfig {
    fn default() -> Self {
        Self { origin: [0.5, 0.5], scale: 1.0 }
    }
}

/// > 0 if `p` is left of the directed line a → b, < 0 if right.
#[inline]
fn is_left(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (p[0] - a[0]) * (b[1] - a[1])
}

/// Winding number of `polygon` (scaled by `scale`) around `p`.
pub fn winding_number(polygon: &Polygon, scale: f32, p: [f32; 2]) -> i32 {
    let mut wn = 0;
    for (a, b) in polygon.segments() {
        let a = [a[0] * scale, a[1] * scale];
        let b = [b[0] * scale, b[1] * scale];
        if a[1] <= p[1] {
            if b[1] > p[1] && is_left(a, b, p) > 0.0 {
                wn += 1;
            }
        } else if b[1] <= p[1] && is_left(a, b, p) < 0.0 {
            wn -= 1;
        }
    }
    wn
}

/// One accumulation step: `back = front + wn(polygon)` at every cell.
pub fn accumulate(front: &Field<i32>, back: &mut Field<i32>, polygon: &Polygon, config: WindingConfig) {
    for y in 0..front.height() {
        for x in 0..front.width() {
            let p = [x as f32 + config.origin[0], y as f32 + config.origin[1]];
            back.set(x, y, front.get(x, y) + winding_number(polygon, config.scale, p));
        }
    }
}

/// Accumulate every polygon in turn, swapping after each one. On return the
/// front of `fields` holds the summed winding numbers.
pub fn accumulate_all(fields: &mut DoubleBuffer<Field<i32>>, polygons: &[Polygon], config: WindingConfig) {
    for polygon in polygons {
        let (front, back) = fields.split_mut();
        accumulate(front, back, polygon, config);
        fields.swap();
    }
}

/// Convenience: the summed winding field of `polygons` on a fresh grid.
pub fn winding_field(width: usize, height: usize, polygons: &[Polygon], config: WindingConfig) -> Field<i32> {
    let mut fields = DoubleBuffer::from_fn(|| Field::new(width, height));
    accumulate_all(&mut fields, polygons, config);
    fields.into_front()
}
