// eikonal.rs — Signed-distance smoothing by eikonal relaxation (CPU
// reference).
//
// Mirrors shaders/eikonal.wgsl. Each sweep reads the whole front field and
// writes the whole back field (Jacobi), so the CPU and GPU produce identical
// values up to float rounding.

use crate::double_buffer::DoubleBuffer;
use crate::field::Field;

/// The twelve sweep offsets of one pass: each axis direction three times.
pub const SWEEP_DIRECTIONS: [(i32, i32); 12] = [
    (1, 0), (1, 0), (1, 0),
    (-1, 0), (-1, 0), (-1, 0),
    (0, 1), (0, 1), (0, 1),
    (0, -1), (0, -1), (0, -1),
];

/// Default number of full passes over `SWEEP_DIRECTIONS`.
pub const DEFAULT_PASSES: usize = 2;

/// Stand-in for "no usable neighbour".
pub const FAR: f32 = 1.0e30;

/// Smoothing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmoothingConfig {
    pub passes: usize,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self { passes: DEFAULT_PASSES }
    }
}

/// Godunov update for unit grid spacing.
#[inline]
pub fn solve_quadratic(a: f32, b: f32) -> f32 {
    let lo = a.min(b);
    if lo >= FAR {
        return FAR;
    }
    let diff = a - b;
    if diff.abs() >= 1.0 {
        lo + 1.0
    } else {
        0.5 * (a + b + (2.0 - diff * diff).sqrt())
    }
}

/// Relaxed value of sample (x, y) for sweep direction (dx, dy).
///
/// Zero samples and samples next to the interface (a 4-neighbour of
/// opposite sign or zero) keep their value.
pub fn relax_sample(front: &Field<f32>, x: usize, y: usize, dx: i32, dy: i32) -> f32 {
    let phi = front.get(x, y);
    if phi == 0.0 {
        return 0.0;
    }
    let s = phi.signum();
    let (xi, yi) = (x as i64, y as i64);

    for (ox, oy) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
        if let Some(n) = front.get_checked(xi + ox, yi + oy) {
            if n * s <= 0.0 {
                return phi;
            }
        }
    }

    // Same-sign magnitude of a neighbour, FAR if missing.
    let mag = |nx: i64, ny: i64| -> f32 {
        match front.get_checked(nx, ny) {
            Some(n) if n * s > 0.0 => n.abs(),
            _ => FAR,
        }
    };
    let (dx, dy) = (dx as i64, dy as i64);
    let a = mag(xi - dx, yi - dy);
    // Perpendicular axis: (dy, dx) for axis-aligned sweeps.
    let b = mag(xi + dy, yi + dx).min(mag(xi - dy, yi - dx));

    let u = solve_quadratic(a, b);
    s * phi.abs().min(u)
}

/// One sweep: every back sample from the front field.
pub fn relax(front: &Field<f32>, back: &mut Field<f32>, dx: i32, dy: i32) {
    for y in 0..front.height() {
        for x in 0..front.width() {
            back.set(x, y, relax_sample(front, x, y, dx, dy));
        }
    }
}

/// Full smoothing schedule: `passes` × twelve sweeps, swapping after each.
pub fn smooth(fields: &mut DoubleBuffer<Field<f32>>, config: SmoothingConfig) {
    for _ in 0..config.passes {
        for &(dx, dy) in &SWEEP_DIRECTIONS {
            let (front, back) = fields.split_mut();
            relax(front, back, dx, dy);
            fields.swap();
        }
    }
}

/// Smooth a single field, returning the result.
pub fn smooth_field(field: &Field<f32>, config: SmoothingConfig) -> Field<f32> {
    let mut fields = DoubleBuffer::new(field.clone(), field.clone());
    smooth(&mut fields, config);
    fields.into_front()
}
