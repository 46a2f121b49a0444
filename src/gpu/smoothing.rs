// gpu/smoothing.rs — Signed-distance smoothing of the free surface.
//
// The free-surface field lives in a ping-pong image pair shared with the
// rasterizer. One call:
//
//   acquire pair ──► token
//   for pass in 0..passes:
//       for (dx, dy) in SWEEP_DIRECTIONS:          (12 sweeps)
//           iterate_eikonal(front → back), waits on the previous token
//           swap
//   release pair (blocks on the last token)
//
// Every sweep is a full Jacobi step, identical to `eikonal::relax` on the
// host, so the device result can be checked sample for sample.

use crate::double_buffer::DoubleBuffer;
use crate::eikonal::{SmoothingConfig, SWEEP_DIRECTIONS};
use crate::error::{Error, Result};
use crate::gpu::event::{CompletionToken, TokenChain};
use crate::gpu::image::Image2D;
use crate::gpu::kernel::{Binding, Kernel, KernelModule, Program};
use crate::gpu::session::{Dispatch, Session};
use crate::gpu::shared::{GraphicsShared, Unshared};

/// Free-surface image pair in rasterizer ownership.
pub type SharedSurface = GraphicsShared<DoubleBuffer<Image2D<f32>>, Unshared>;

/// Must match `EikonalParams` in shaders/eikonal.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct EikonalParams {
    dx: i32,
    dy: i32,
    width: u32,
    height: u32,
}

/// Eikonal relaxation over a shared image pair.
#[derive(Default)]
pub struct SignedDistanceSmoother {
    kernel: Option<Kernel>,
    config: SmoothingConfig,
}

impl SignedDistanceSmoother {
    pub fn new(config: SmoothingConfig) -> Self {
        SignedDistanceSmoother { kernel: None, config }
    }

    pub fn config(&self) -> SmoothingConfig {
        self.config
    }

    /// Run the full sweep schedule. The pair comes back to the rasterizer
    /// with the smoothed field in front.
    pub fn smooth(&self, session: &Session, surface: SharedSurface, wait: &[&CompletionToken]) -> Result<SharedSurface> {
        let kernel = self.kernel.as_ref().ok_or_else(|| Error::not_compiled(self.name()))?;
        let (mut acquired, acquire_token) = surface.acquire(session, wait)?;
        let (width, height) = {
            let front = acquired.compute().front();
            (front.width(), front.height())
        };

        let mut chain = TokenChain::after(acquire_token);
        for _ in 0..self.config.passes {
            for &(dx, dy) in &SWEEP_DIRECTIONS {
                let params = session.uniform("eikonal params", &EikonalParams { dx, dy, width, height });
                let pair = acquired.compute_mut();
                let (front, back) = pair.split();
                let args = kernel
                    .args()
                    .uniform(0, &params)
                    .image(1, front)
                    .image(2, back)
                    .build(session)?;
                let token = session.enqueue(kernel, &args, Dispatch::Grid { width, height }, &chain.wait_list())?;
                chain.push(token);
                pair.swap();
            }
        }

        let sweeps = chain.links();
        match chain.finish() {
            Some(last) => {
                let released = acquired.release(session, &[&last])?;
                log::debug!(
                    "smoothing: {sweeps} sweeps over {width}×{height}, last sweep {:?} on device",
                    last.device_time()
                );
                Ok(released)
            }
            None => acquired.release(session, &[]),
        }
    }
}

impl KernelModule for SignedDistanceSmoother {
    fn name(&self) -> &'static str {
        "eikonal"
    }

    fn sources(&self) -> &'static [&'static str] {
        &["eikonal.wgsl"]
    }

    fn bind(&mut self, session: &Session, program: &Program) -> Result<()> {
        self.kernel = Some(program.kernel(
            session,
            "iterate_eikonal",
            &[
                Binding::uniform(0),
                Binding::image(1, wgpu::TextureFormat::R32Float),
                Binding::storage_image(2, wgpu::TextureFormat::R32Float),
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
    use crate::eikonal::smooth_field;
    use crate::field::Field;
    use crate::gpu::test_support::{gpu_session, run_gpu_test_in_subprocess};

    #[test]
    fn test_params_layout() {
        assert_eq!(std::mem::size_of::<EikonalParams>(), 16);
    }

    #[test]
    fn test_default_passes() {
        assert_eq!(SignedDistanceSmoother::default().config().passes, 2);
    }

    #[test]
    #[ignore = "GPU integration: run via outer subprocess wrapper"]
    fn inner_smoothing_matches_cpu() {
        let session = gpu_session();
        let mut smoother = SignedDistanceSmoother::new(SmoothingConfig::default());
        smoother.compile(&session).unwrap();

        // A distorted distance field: the circle's distance scaled by 3
        // away from the interface.
        let field = Field::sample_sdf(48, 40, |x, y| {
            let d = ((x - 20.0).powi(2) + (y - 18.0).powi(2)).sqrt() - 9.5;
            if d.abs() > 1.0 { 3.0 * d } else { d }
        });
        let pair = session.allocate_image_pair(48, 40, Some(field.as_slice())).unwrap();
        let surface = GraphicsShared::new(pair);
        let surface = smoother.smooth(&session, surface, &[]).unwrap();

        let expected = smooth_field(&field, SmoothingConfig::default());
        let got = session.read_2d_image(surface.graphics().front()).unwrap();
        for (g, e) in got.iter().zip(expected.as_slice()) {
            assert!((g - e).abs() < 1e-4 * e.abs().max(1.0), "{g} vs {e}");
        }
        println!("GPU_TEST_OK");
    }

    #[test]
    #[ignore = "requires a real GPU"]
    fn test_smoothing_matches_cpu() {
        let out = run_gpu_test_in_subprocess("gpu::smoothing::tests::inner_smoothing_matches_cpu");
        assert!(out.contains("GPU_TEST_OK"), "inner test failed:\n{out}");
    }
}
