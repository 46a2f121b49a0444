// gpu/boundary.rs — Solid-boundary extraction pipeline.
//
// Per object:
//
//   count_boundary_points   (1 invocation / segment)   → counts
//        │ wait + read counts; any -1 → IllegalArgument
//        ▼
//   serial_prefix_sum       (1 invocation)             → prefix (inclusive)
//        │ read prefix[n-1] = total
//        ▼
//   arena.request_sub_buffer(2 * total)
//        │
//        ▼
//   write_boundary_points   (1 invocation / segment)   → points
//
// The two read-backs are the pipeline's only host synchronisation; both are
// needed because the output size is data dependent. Extraction happens once
// per object at start-up, so the stalls are not on the frame path.

use crate::error::{Error, Result, TOO_MANY_INTERSECTIONS};
use crate::gpu::buffer::ArenaBuffer;
use crate::gpu::kernel::{Binding, Kernel, KernelModule, Program};
use crate::gpu::session::{Dispatch, Session};
use crate::gpu::solid::{BoundaryPointBuffer, SolidObject};

/// Uniform parameters. Must match `BoundaryParams` in
/// shaders/boundary/boundary_points.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct BoundaryParams {
    segment_count: u32,
    resolution: f32,
    _pad: [u32; 2],
}

struct BoundaryKernels {
    count: Kernel,
    prefix: Kernel,
    write: Kernel,
}

/// Gridline crossings of solid outlines, packed into an arena.
#[derive(Default)]
pub struct SolidBoundaryPipeline {
    kernels: Option<BoundaryKernels>,
}

impl SolidBoundaryPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    fn kernels(&self) -> Result<&BoundaryKernels> {
        self.kernels.as_ref().ok_or_else(|| Error::not_compiled(self.name()))
    }

    /// Extract the boundary points of `solid` at `resolution` cells per unit
    /// length into `arena`.
    ///
    /// # Errors
    /// `IllegalArgument` when a segment exceeds the per-segment capacity or
    /// the arena is exhausted. The arena is untouched in both cases.
    pub fn extract(
        &self,
        session: &Session,
        solid: &SolidObject,
        arena: &mut ArenaBuffer<f32>,
        resolution: u32,
    ) -> Result<BoundaryPointBuffer> {
        let k = self.kernels()?;
        if resolution == 0 {
            return Err(Error::IllegalArgument("grid resolution must be positive".into()));
        }
        let segments = solid.segment_count() as u32;
        let params = session.uniform(
            "boundary params",
            &BoundaryParams { segment_count: segments, resolution: resolution as f32, _pad: [0; 2] },
        );

        let count_args = k
            .count
            .args()
            .uniform(0, &params)
            .buffer(1, &solid.vertices)
            .buffer(2, &solid.counts)
            .build(session)?;
        let counted = session.enqueue(&k.count, &count_args, Dispatch::Linear(segments), &[])?;
        session.wait(&counted)?;

        let counts = session.read_buffer(&solid.counts)?;
        if let Some(i) = counts.iter().position(|&c| c < 0) {
            log::warn!("segment {i} of a {segments}-segment outline overflows at resolution {resolution}");
            return Err(Error::IllegalArgument(TOO_MANY_INTERSECTIONS.into()));
        }

        let prefix_args = k
            .prefix
            .args()
            .uniform(0, &params)
            .buffer(2, &solid.counts)
            .buffer(3, &solid.prefix)
            .build(session)?;
        let summed = session.enqueue(&k.prefix, &prefix_args, Dispatch::Single, &[&counted])?;
        let total = session.read_buffer_element(&solid.prefix, segments as usize - 1)?.max(0) as usize;

        let points = arena.request_sub_buffer(2 * total)?;
        if total > 0 {
            let write_args = k
                .write
                .args()
                .uniform(0, &params)
                .buffer(1, &solid.vertices)
                .buffer(3, &solid.prefix)
                .sub_buffer(4, &points)
                .build(session)?;
            let written = session.enqueue(&k.write, &write_args, Dispatch::Linear(segments), &[&summed])?;
            session.wait(&written)?;
        } else {
            summed.retire();
        }

        log::debug!(
            "boundary: {segments} segments → {total} points at byte {} of the arena",
            points.offset()
        );
        Ok(BoundaryPointBuffer { points, point_count: total })
    }

    /// `extract` for every object, in order.
    pub fn extract_all(
        &self,
        session: &Session,
        solids: &[SolidObject],
        arena: &mut ArenaBuffer<f32>,
        resolution: u32,
    ) -> Result<Vec<BoundaryPointBuffer>> {
        solids
            .iter()
            .map(|solid| self.extract(session, solid, arena, resolution))
            .collect()
    }
}

impl KernelModule for SolidBoundaryPipeline {
    fn name(&self) -> &'static str {
        "solid_boundary"
    }

    fn sources(&self) -> &'static [&'static str] {
        &["common/indexing.wgsl", "boundary/boundary_points.wgsl", "boundary/prefix_sum.wgsl"]
    }

    fn bind(&mut self, session: &Session, program: &Program) -> Result<()> {
        self.kernels = Some(BoundaryKernels {
            count: program.kernel(
                session,
                "count_boundary_points",
                &[Binding::uniform(0), Binding::storage_read(1), Binding::storage(2)],
            )?,
            prefix: program.kernel(
                session,
                "serial_prefix_sum",
                &[Binding::uniform(0), Binding::storage(2), Binding::storage(3)],
            )?,
            write: program.kernel(
                session,
                "write_boundary_points",
                &[Binding::uniform(0), Binding::storage_read(1), Binding::storage(3), Binding::storage(4)],
            )?,
        });
        Ok(())
    }

    fn is_compiled(&self) -> bool {
        self.kernels.is_some()
    }
}
