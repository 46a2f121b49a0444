// field.rs — Host-side 2-D scalar grid.
//
// `Field<T>` is the CPU counterpart of `gpu::Image2D<T>`: row-major,
// tightly packed (stride == width), so `as_slice()` is exactly what an image
// upload expects and what `Session::read_2d_image` returns.
//
// Sample (x, y) lives at index `y * width + x`. Sample coordinates are the
// grid's integer lattice; a field of w×h samples spans (w-1)×(h-1) cells.

use std::fmt;

/// Types that can be stored in a `Field`.
///
/// `Copy + Default` for zero-initialisation, `bytemuck::Pod` so the raw data
/// can be uploaded to and read back from the device without conversion.
pub trait Sample: Copy + Default + PartialEq + bytemuck::Pod + Send + Sync + 'static {}

impl Sample for f32 {}
impl Sample for i32 {}

/// A 2-D grid of samples with runtime dimensions.
#[derive(Clone, PartialEq)]
pub struct Field<T: Sample> {
    data: Vec<T>,
    width: usize,
    height: usize,
}

impl<T: Sample> Field<T> {
    /// Zero-initialised field.
    pub fn new(width: usize, height: usize) -> Self {
        Field { data: vec![T::default(); width * height], width, height }
    }

    /// Wrap existing row-major data.
    ///
    /// # Panics
    /// If `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "field data length {} does not match {width}×{height}",
            data.len()
        );
        Field { data, width, height }
    }

    /// Build a field by evaluating `f(x, y)` at every sample.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Field { data, width, height }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> T {
        debug_assert!(x < self.width && y < self.height, "({x}, {y}) out of bounds");
        self.data[y * self.width + x]
    }

    /// Signed-coordinate lookup; `None` outside the grid.
    #[inline]
    pub fn get_checked(&self, x: i64, y: i64) -> Option<T> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        Some(self.data[y as usize * self.width + x as usize])
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        debug_assert!(x < self.width && y < self.height, "({x}, {y}) out of bounds");
        self.data[y * self.width + x] = value;
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Iterate `(x, y, value)` in row-major order.
    pub fn samples(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        let w = self.width;
        self.data.iter().enumerate().map(move |(i, &v)| (i % w, i / w, v))
    }
}

impl Field<f32> {
    /// Sample a signed-distance function at every lattice point.
    pub fn sample_sdf(width: usize, height: usize, sdf: impl Fn(f32, f32) -> f32) -> Self {
        Field::from_fn(width, height, |x, y| sdf(x as f32, y as f32))
    }

    /// Signed distance to a circle, in sample units.
    pub fn circle(width: usize, height: usize, center: [f32; 2], radius: f32) -> Self {
        Field::sample_sdf(width, height, |x, y| {
            ((x - center[0]).powi(2) + (y - center[1]).powi(2)).sqrt() - radius
        })
    }
}

impl<T: Sample + fmt::Debug> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major_layout() {
        let f = Field::<i32>::from_fn(3, 2, |x, y| (y * 10 + x) as i32);
        assert_eq!(f.as_slice(), &[0, 1, 2, 10, 11, 12]);
        assert_eq!(f.get(2, 1), 12);
    }

    #[test]
    fn test_get_checked_bounds() {
        let f = Field::<f32>::new(4, 4);
        assert_eq!(f.get_checked(-1, 0), None);
        assert_eq!(f.get_checked(4, 0), None);
        assert_eq!(f.get_checked(3, 3), Some(0.0));
    }

    #[test]
    fn test_circle_sign() {
        let f = Field::circle(9, 9, [4.0, 4.0], 2.0);
        assert!(f.get(4, 4) < 0.0);
        assert!(f.get(0, 0) > 0.0);
        assert!((f.get(6, 4)).abs() < 1e-6);
    }

    #[test]
    #[should_panic]
    fn test_from_vec_length_mismatch() {
        let _ = Field::<f32>::from_vec(2, 2, vec![0.0; 3]);
    }
}
