// polygon.rs — Host-side solid-object outlines.
//
// A `Polygon` is a polyline stored as a flat `[x0, y0, x1, y1, ...]` list in
// unit coordinates (the domain is [0, 1]², the grid resolution maps it onto
// cells later). Segment i runs from vertex i to vertex i+1, so a list of n
// vertices has n-1 segments. Closed outlines repeat the first vertex at the
// end (as `closed()` and `circle()` do), so the flat list can
// be uploaded unchanged as a device vertex buffer.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    coords: Vec<f32>,
}

impl Polygon {
    /// Wrap a flat coordinate list as-is (open or already closed).
    ///
    /// Needs at least two vertices (one segment) and an even length.
    pub fn from_flat(coords: Vec<f32>) -> Result<Self> {
        if coords.len() % 2 != 0 {
            return Err(Error::IllegalArgument(format!(
                "vertex list has odd length {}",
                coords.len()
            )));
        }
        if coords.len() < 4 {
            return Err(Error::IllegalArgument(
                "a polygon needs at least one segment".into(),
            ));
        }
        Ok(Polygon { coords })
    }

    /// Build a closed outline: the first vertex is appended after the last.
    pub fn closed(points: &[[f32; 2]]) -> Result<Self> {
        let Some(first) = points.first() else {
            return Err(Error::IllegalArgument("empty polygon".into()));
        };
        let mut coords: Vec<f32> = points.iter().flat_map(|p| [p[0], p[1]]).collect();
        coords.extend_from_slice(first);
        Polygon::from_flat(coords)
    }

    /// Regular `segments`-gon approximating a circle.
    pub fn circle(center: [f32; 2], radius: f32, segments: usize) -> Result<Self> {
        if segments < 3 {
            return Err(Error::IllegalArgument(format!(
                "circle needs at least 3 segments, got {segments}"
            )));
        }
        let points: Vec<[f32; 2]> = (0..segments)
            .map(|i| {
                let a = std::f32::consts::TAU * i as f32 / segments as f32;
                [center[0] + radius * a.cos(), center[1] + radius * a.sin()]
            })
            .collect();
        Polygon::closed(&points)
    }

    pub fn coords(&self) -> &[f32] {
        &self.coords
    }

    pub fn vertex_count(&self) -> usize {
        self.coords.len() / 2
    }

    pub fn segment_count(&self) -> usize {
        self.vertex_count() - 1
    }

    pub fn vertex(&self, i: usize) -> [f32; 2] {
        [self.coords[2 * i], self.coords[2 * i + 1]]
    }

    /// Segment `i` as `(start, end)`.
    pub fn segment(&self, i: usize) -> ([f32; 2], [f32; 2]) {
        (self.vertex(i), self.vertex(i + 1))
    }

    pub fn segments(&self) -> impl Iterator<Item = ([f32; 2], [f32; 2])> + '_ {
        (0..self.segment_count()).map(move |i| self.segment(i))
    }

    pub fn is_closed(&self) -> bool {
        self.vertex(0) == self.vertex(self.vertex_count() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_segment() {
        let p = Polygon::from_flat(vec![0.2, 0.1, 0.8, 0.7]).unwrap();
        assert_eq!(p.segment_count(), 1);
        assert_eq!(p.segment(0), ([0.2, 0.1], [0.8, 0.7]));
        assert!(!p.is_closed());
    }

    #[test]
    fn test_closed_repeats_first_vertex() {
        let p = Polygon::closed(&[[0.1, 0.1], [0.8, 0.2], [0.6, 0.7]]).unwrap();
        assert_eq!(p.segment_count(), 3);
        assert!(p.is_closed());
        assert_eq!(p.coords().len(), 8);
    }

    #[test]
    fn test_circle_layout() {
        let p = Polygon::circle([0.5, 0.5], 0.25, 100).unwrap();
        assert_eq!(p.coords().len(), 202);
        assert_eq!(p.segment_count(), 100);
        assert!(p.is_closed());
    }

    #[test]
    fn test_rejects_degenerate_input() {
        assert!(Polygon::from_flat(vec![0.1, 0.2]).is_err());
        assert!(Polygon::from_flat(vec![0.1, 0.2, 0.3]).is_err());
        assert!(Polygon::closed(&[]).is_err());
        assert!(Polygon::circle([0.0, 0.0], 1.0, 2).is_err());
    }
}
