// gpu/winding.rs — Solid winding-number field.
//
// One 2-D launch per solid object. Each launch reads the front image and
// writes front + wn into the back image; the host waits for it and swaps.
// After the last object the front image holds the summed winding numbers:
// non-zero inside a solid, zero in the fluid.

use crate::double_buffer::DoubleBuffer;
use crate::error::{Error, Result};
use crate::gpu::event::CompletionToken;
use crate::gpu::image::Image2D;
use crate::gpu::kernel::{Binding, Kernel, KernelModule, Program};
use crate::gpu::session::{Dispatch, Session};
use crate::gpu::solid::SolidObject;
use crate::winding::WindingConfig;

/// Must match `WindingParams` in shaders/winding_number.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct WindingParams {
    origin: [f32; 2],
    scale: f32,
    segment_count: u32,
    width: u32,
    height: u32,
    _pad: [u32; 2],
}

/// Accumulates winding numbers of solid outlines into an `i32` image pair.
#[derive(Default)]
pub struct WindingNumberPipeline {
    kernel: Option<Kernel>,
}

impl WindingNumberPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `solid`'s winding number to every cell, then swap.
    pub fn accumulate(
        &self,
        session: &Session,
        fields: &mut DoubleBuffer<Image2D<i32>>,
        solid: &SolidObject,
        config: WindingConfig,
        wait: &[&CompletionToken],
    ) -> Result<()> {
        let kernel = self.kernel.as_ref().ok_or_else(|| Error::not_compiled(self.name()))?;
        let (front, back) = fields.split();
        let (width, height) = (front.width(), front.height());
        let params = session.uniform(
            "winding params",
            &WindingParams {
                origin: config.origin,
                scale: config.scale,
                segment_count: solid.segment_count() as u32,
                width,
                height,
                _pad: [0; 2],
            },
        );
        let args = kernel
            .args()
            .uniform(0, &params)
            .buffer(1, solid.vertex_buffer())
            .image(2, front)
            .image(3, back)
            .build(session)?;
        let token = session.enqueue(kernel, &args, Dispatch::Grid { width, height }, wait)?;
        session.wait(&token)?;
        fields.swap();
        Ok(())
    }

    /// `accumulate` every solid in order.
    pub fn accumulate_all(
        &self,
        session: &Session,
        fields: &mut DoubleBuffer<Image2D<i32>>,
        solids: &[SolidObject],
        config: WindingConfig,
    ) -> Result<()> {
        for solid in solids {
            self.accumulate(session, fields, solid, config, &[])?;
        }
        log::debug!("winding field: {} solids accumulated", solids.len());
        Ok(())
    }
}

impl KernelModule for WindingNumberPipeline {
    fn name(&self) -> &'static str {
        "winding_number"
    }

    fn sources(&self) -> &'static [&'static str] {
        &["winding_number.wgsl"]
    }

    fn bind(&mut self, session: &Session, program: &Program) -> Result<()> {
        self.kernel = Some(program.kernel(
            session,
            "compute_winding_number",
            &[
                Binding::uniform(0),
                Binding::storage_read(1),
                Binding::image(2, wgpu::TextureFormat::R32Sint),
                Binding::storage_image(3, wgpu::TextureFormat::R32Sint),
            ],
        )?);
        Ok(())
    }

    fn is_compiled(&self) -> bool {
        self.kernel.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::test_support::{gpu_session, run_gpu_test_in_subprocess};
    use crate::polygon::Polygon;
    use crate::winding::winding_field;

    #[test]
    fn test_params_layout() {
        assert_eq!(std::mem::size_of::<WindingParams>(), 32);
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_winding_matches_cpu() {
        let session = gpu_session();
        let mut pipeline = WindingNumberPipeline::new();
        pipeline.compile(&session).unwrap();

        let outlines = [
            Polygon::circle([0.5, 0.5], 0.25, 64).unwrap(),
            Polygon::closed(&[[0.1, 0.1], [0.4, 0.1], [0.4, 0.3], [0.1, 0.3]]).unwrap(),
        ];
        let solids: Vec<_> = outlines.iter().map(|p| SolidObject::upload(&session, p).unwrap()).collect();
        let config = WindingConfig { scale: 40.0, ..Default::default() };

        let mut fields = session.allocate_image_pair::<i32>(40, 32, None).unwrap();
        pipeline.accumulate_all(&session, &mut fields, &solids, config).unwrap();

        let expected = winding_field(40, 32, &outlines, config);
        assert_eq!(session.read_2d_image(fields.front()).unwrap(), expected.as_slice());
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real GPU"]
    fn test_winding_matches_cpu() {
        let out = run_gpu_test_in_subprocess("gpu::winding::tests::inner_winding_matches_cpu");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }
}
