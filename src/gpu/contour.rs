// gpu/contour.rs — Marching-squares contour extraction into a vertex buffer
// owned by the rasterizer.
//
// STAGES
// ──────
//   count_segments        grid over (w-1)×(h-1) cells   → pyramid level 0
//   roll_up_histogram ×L  grid over level k+1            → level k+1
//        (each launch waits on the previous one: a TokenChain)
//   wait + read the 1×1 top                              → segment count N
//   rasterizer allocates 4N floats, shared + acquired for compute
//   generate_segments     one invocation per segment     → x0 y0 x1 y1
//   release back to the rasterizer once generation has completed
//
// The total read-back is the one host stall per frame: the vertex buffer
// cannot be sized before it.
//
// Output coordinates are in field-sample units: sample (i, j) is at (i, j).

use crate::error::{Error, Result};
use crate::gpu::event::{CompletionToken, TokenChain};
use crate::gpu::image::Image2D;
use crate::gpu::kernel::{Binding, Kernel, KernelModule, Program};
use crate::gpu::pyramid::HistogramPyramid;
use crate::gpu::session::{Dispatch, Session};
use crate::gpu::shared::{GraphicsShared, Rasterizer, Unshared, VertexBuffer};

/// Floats written per segment.
pub const FLOATS_PER_SEGMENT: usize = 4;

/// Must match `FieldParams` in shaders/marching_squares/lookup.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct FieldParams {
    width: u32,
    height: u32,
    cells_x: u32,
    cells_y: u32,
}

/// Must match `ReduceParams` in shaders/marching_squares/lookup.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ReduceParams {
    level: u32,
    _pad: [u32; 3],
}

const R32F: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

struct MarchingKernels {
    count: Kernel,
    roll_up: Kernel,
    generate: Kernel,
}

/// Zero contour of a field, handed back to the rasterizer.
#[derive(Debug)]
pub struct ContourSegments {
    pub vertices: GraphicsShared<VertexBuffer, Unshared>,
    pub segment_count: u32,
}

impl ContourSegments {
    /// Vertices to draw as a line list.
    pub fn vertex_count(&self) -> u32 {
        2 * self.segment_count
    }

    /// Blocking read of the segments as `[x0, y0, x1, y1]`.
    pub fn read(&self, session: &Session) -> Result<Vec<[f32; 4]>> {
        let n = self.segment_count as usize * FLOATS_PER_SEGMENT;
        let flat = session.read_vertex_buffer(self.vertices.graphics(), n)?;
        Ok(flat.chunks_exact(FLOATS_PER_SEGMENT).map(|s| [s[0], s[1], s[2], s[3]]).collect())
    }
}

/// Histogram-pyramid marching squares.
#[derive(Default)]
pub struct MarchingSquaresPipeline {
    kernels: Option<MarchingKernels>,
}

impl MarchingSquaresPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    fn kernels(&self) -> Result<&MarchingKernels> {
        self.kernels.as_ref().ok_or_else(|| Error::not_compiled(self.name()))
    }

    /// Extract the zero contour of `phi` into a fresh rasterizer vertex
    /// buffer. `pyramid` must have been built for `phi`'s shape; its
    /// contents are overwritten. Launches wait on `wait`.
    pub fn march<R: Rasterizer + ?Sized>(
        &self,
        session: &Session,
        phi: &Image2D<f32>,
        pyramid: &HistogramPyramid,
        rasterizer: &mut R,
        wait: &[&CompletionToken],
    ) -> Result<ContourSegments> {
        let k = self.kernels()?;
        let (width, height) = (phi.width(), phi.height());
        if pyramid.field_size() != (width, height) {
            return Err(Error::IllegalArgument(format!(
                "pyramid built for {:?}, field is {width}×{height}",
                pyramid.field_size()
            )));
        }
        let base = pyramid.levels()[0];

        // Level 0.
        let field_params = session.uniform(
            "field params",
            &FieldParams { width, height, cells_x: base.width, cells_y: base.height },
        );
        let count_args = k
            .count
            .args()
            .uniform(0, &field_params)
            .image(1, phi)
            .buffer(2, &pyramid.counts)
            .build(session)?;
        let counted = session.enqueue(
            &k.count,
            &count_args,
            Dispatch::Grid { width: base.width, height: base.height },
            wait,
        )?;

        // Reduction chain.
        let mut chain = TokenChain::after(counted);
        for (level, dst) in pyramid.levels().iter().enumerate().skip(1) {
            let reduce = session.uniform(
                "reduce params",
                &ReduceParams { level: level as u32 - 1, _pad: [0; 3] },
            );
            let args = k
                .roll_up
                .args()
                .buffer(2, &pyramid.counts)
                .uniform(4, pyramid.table_uniform())
                .uniform(5, &reduce)
                .build(session)?;
            let token = session.enqueue(
                &k.roll_up,
                &args,
                Dispatch::Grid { width: dst.width, height: dst.height },
                &chain.wait_list(),
            )?;
            chain.push(token);
        }
        let links = chain.links();
        let reduced = chain
            .finish()
            .ok_or_else(|| Error::IllegalState("empty reduction chain".into()))?;
        session.wait(&reduced)?;
        let total = pyramid.read_total(session)?;
        log::debug!("marching squares: {width}×{height} field, {links} reductions, {total} segments");

        // Output buffer from the rasterizer.
        let floats = total as usize * FLOATS_PER_SEGMENT;
        let handle = rasterizer.allocate_shared_vertex_buffer(session, floats)?;
        let shared = session.share_graphics_buffer(handle, floats)?;
        let (acquired, acquire_token) = shared.acquire(session, &[&reduced])?;

        let released = if total > 0 {
            let args = k
                .generate
                .args()
                .image(1, phi)
                .buffer(2, &pyramid.counts)
                .vertex_buffer(3, acquired.compute())
                .uniform(4, pyramid.table_uniform())
                .build(session)?;
            let generated = session.enqueue(&k.generate, &args, Dispatch::Linear(total), &[&acquire_token])?;
            acquired.release(session, &[&generated])?
        } else {
            acquired.release(session, &[&acquire_token])?
        };

        Ok(ContourSegments { vertices: released, segment_count: total })
    }
}

impl KernelModule for MarchingSquaresPipeline {
    fn name(&self) -> &'static str {
        "marching_squares"
    }

    fn sources(&self) -> &'static [&'static str] {
        &[
            "common/indexing.wgsl",
            "marching_squares/lookup.wgsl",
            "marching_squares/count_segments.wgsl",
            "marching_squares/roll_up_histogram.wgsl",
            "marching_squares/generate_segments.wgsl",
        ]
    }

    fn bind(&mut self, session: &Session, program: &Program) -> Result<()> {
        self.kernels = Some(MarchingKernels {
            count: program.kernel(
                session,
                "count_segments",
                &[Binding::uniform(0), Binding::image(1, R32F), Binding::storage(2)],
            )?,
            roll_up: program.kernel(
                session,
                "roll_up_histogram",
                &[Binding::storage(2), Binding::uniform(4), Binding::uniform(5)],
            )?,
            generate: program.kernel(
                session,
                "generate_segments",
                &[Binding::image(1, R32F), Binding::storage(2), Binding::storage(3), Binding::uniform(4)],
            )?,
        });
        Ok(())
    }

    fn is_compiled(&self) -> bool {
        self.kernels.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::{extract_contour, HistogramPyramid as HostPyramid};
    use crate::field::Field;
    use crate::gpu::shared::HeadlessRasterizer;
    use crate::gpu::test_support::{gpu_session, run_gpu_test_in_subprocess};

    #[test]
    fn test_uniform_layouts() {
        assert_eq!(std::mem::size_of::<FieldParams>(), 16);
        assert_eq!(std::mem::size_of::<ReduceParams>(), 16);
    }

    #[test]
    fn test_march_requires_compile() {
        let p = MarchingSquaresPipeline::new();
        assert!(!p.is_compiled());
        assert!(matches!(p.kernels(), Err(Error::IllegalState(_))));
    }

    // ---- GPU integration tests ---------------------------------------------

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_contour_matches_cpu() {
        let session = gpu_session();
        let mut pipeline = MarchingSquaresPipeline::new();
        pipeline.compile(&session).unwrap();

        let field = Field::circle(70, 45, [30.3, 20.7], 12.2);
        let phi = session.allocate_2d_image(70, 45, Some(field.as_slice())).unwrap();
        let pyramid = HistogramPyramid::new(&session, 70, 45).unwrap();
        let mut raster = HeadlessRasterizer::new();
        let contour = pipeline.march(&session, &phi, &pyramid, &mut raster, &[]).unwrap();

        let host = HostPyramid::build(&field).unwrap();
        for (level, expected) in host.levels().iter().enumerate() {
            assert_eq!(&pyramid.read_level(&session, level).unwrap(), expected, "level {level}");
        }

        let expected = extract_contour(&field).unwrap();
        assert_eq!(contour.segment_count as usize, expected.len());
        let got = contour.read(&session).unwrap();
        for (g, e) in got.iter().zip(&expected) {
            for c in 0..4 {
                assert!((g[c] - e[c]).abs() < 1e-4, "{g:?} vs {e:?}");
            }
        }
        assert_eq!(raster.allocations(), 1);
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_empty_contour() {
        let session = gpu_session();
        let mut pipeline = MarchingSquaresPipeline::new();
        pipeline.compile(&session).unwrap();

        let phi = session.allocate_2d_image(16, 16, Some(&[1.0f32; 256])).unwrap();
        let pyramid = HistogramPyramid::new(&session, 16, 16).unwrap();
        let mut raster = HeadlessRasterizer::new();
        let contour = pipeline.march(&session, &phi, &pyramid, &mut raster, &[]).unwrap();
        assert_eq!(contour.segment_count, 0);
        assert!(contour.read(&session).unwrap().is_empty());
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real GPU"]
    fn test_contour_matches_cpu() {
        let out = run_gpu_test_in_subprocess("gpu::contour::tests::inner_contour_matches_cpu");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }

    #[test]
    #[ignore = "requires a real GPU"]
    fn test_empty_contour() {
        let out = run_gpu_test_in_subprocess("gpu::contour::tests::inner_empty_contour");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }
}
