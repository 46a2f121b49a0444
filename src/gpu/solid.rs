// gpu/solid.rs — Solid outlines resident on the device.

use crate::boundary::BoundaryPoints;
use crate::error::{Error, Result};
use crate::gpu::buffer::{BufferUsage, LinearBuffer, SubBuffer};
use crate::gpu::session::Session;
use crate::polygon::Polygon;

/// One solid object: its outline vertices plus per-segment scratch for the
/// boundary count and prefix passes.
pub struct SolidObject {
    outline: Polygon,
    pub(crate) vertices: LinearBuffer<f32>,
    pub(crate) counts: LinearBuffer<i32>,
    pub(crate) prefix: LinearBuffer<i32>,
}

impl SolidObject {
    /// Upload `outline` (unit coordinates).
    pub fn upload(session: &Session, outline: &Polygon) -> Result<Self> {
        let segments = outline.segment_count();
        if segments == 0 {
            return Err(Error::IllegalArgument("solid outline has no segments".into()));
        }
        Ok(SolidObject {
            outline: outline.clone(),
            vertices: session.create_buffer(outline.coords(), BufferUsage::Storage)?,
            counts: session.allocate_buffer(segments, BufferUsage::Storage)?,
            prefix: session.allocate_buffer(segments, BufferUsage::Storage)?,
        })
    }

    pub fn outline(&self) -> &Polygon {
        &self.outline
    }

    pub fn segment_count(&self) -> usize {
        self.outline.segment_count()
    }

    pub fn vertex_buffer(&self) -> &LinearBuffer<f32> {
        &self.vertices
    }

    /// Per-segment counts from the last extraction.
    pub fn read_counts(&self, session: &Session) -> Result<Vec<i32>> {
        session.read_buffer(&self.counts)
    }

    /// Inclusive prefix of the counts from the last extraction.
    pub fn read_prefix(&self, session: &Session) -> Result<Vec<i32>> {
        session.read_buffer(&self.prefix)
    }
}

/// Boundary points of one object inside the shared arena.
#[derive(Debug, Clone)]
pub struct BoundaryPointBuffer {
    /// `2 * point_count` floats, `x, y` interleaved, in grid units.
    pub points: SubBuffer<f32>,
    pub point_count: usize,
}

impl BoundaryPointBuffer {
    /// Blocking read of the points.
    pub fn read(&self, session: &Session) -> Result<Vec<[f32; 2]>> {
        let flat = session.read_sub_buffer(&self.points)?;
        Ok(flat.chunks_exact(2).map(|p| [p[0], p[1]]).collect())
    }

    /// Blocking read in the host-side layout, for comparison with
    /// `boundary::extract_boundary_points`.
    pub fn read_with_counts(&self, session: &Session, solid: &SolidObject) -> Result<BoundaryPoints> {
        Ok(BoundaryPoints {
            counts: solid.read_counts(session)?,
            prefix: solid.read_prefix(session)?,
            points: self.read(session)?,
        })
    }
}
