// gpu/shared.rs — Resources shared between compute and the rasterizer.
//
// OWNERSHIP PROTOCOL
// ──────────────────
// A shared resource belongs to exactly one side at a time:
//
//   GraphicsShared<R, Unshared>          the rasterizer may read it
//        │ acquire(session, wait)  ──►  token
//        ▼
//   GraphicsShared<R, SharedForCompute>  kernels may bind it
//        │ release(session, wait)  (blocks on `wait`)
//        ▼
//   GraphicsShared<R, Unshared>
//
// The state is a zero-sized type parameter. `acquire` and `release` consume
// `self`, so holding a compute view after release, or handing an acquired
// buffer to the rasterizer, does not compile.
//
// Both sides use the same wgpu device and queue. An acquire is recorded as
// an empty submission whose token orders the first compute launch; a
// release waits for the last compute launch before returning the resource.
//
// NEW RUST CONCEPTS
// - `PhantomData<S>` carries a type that has no runtime representation.
// - Methods in `impl<R> GraphicsShared<R, Unshared>` exist only in that
//   state: the type system, not a runtime flag, enforces the protocol.

use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::gpu::event::CompletionToken;
use crate::gpu::session::Session;

/// State: owned by the rasterizer.
#[derive(Debug)]
pub struct Unshared;

/// State: owned by compute kernels.
#[derive(Debug)]
pub struct SharedForCompute;

/// A resource `R` in ownership state `S`.
#[derive(Debug)]
pub struct GraphicsShared<R, S> {
    resource: R,
    _state: PhantomData<S>,
}

impl<R> GraphicsShared<R, Unshared> {
    /// Wrap a rasterizer-owned resource.
    pub fn new(resource: R) -> Self {
        GraphicsShared { resource, _state: PhantomData }
    }

    /// Rasterizer view.
    pub fn graphics(&self) -> &R {
        &self.resource
    }

    /// Hand the resource to compute. Launches that touch it must wait on
    /// the returned token.
    pub fn acquire(
        self,
        session: &Session,
        wait: &[&CompletionToken],
    ) -> Result<(GraphicsShared<R, SharedForCompute>, CompletionToken)> {
        session.check_tokens(wait)?;
        let token = session.marker("acquire_graphics_objects");
        Ok((GraphicsShared { resource: self.resource, _state: PhantomData }, token))
    }

    pub fn into_inner(self) -> R {
        self.resource
    }
}

impl<R> GraphicsShared<R, SharedForCompute> {
    /// Compute view.
    pub fn compute(&self) -> &R {
        &self.resource
    }

    pub fn compute_mut(&mut self) -> &mut R {
        &mut self.resource
    }

    /// Give the resource back to the rasterizer once every token in `wait`
    /// has completed. Blocks.
    pub fn release(self, session: &Session, wait: &[&CompletionToken]) -> Result<GraphicsShared<R, Unshared>> {
        for token in wait {
            session.wait(token)?;
        }
        session.marker("release_graphics_objects").retire();
        Ok(GraphicsShared { resource: self.resource, _state: PhantomData })
    }
}

// ---------------------------------------------------------------------------
// Vertex buffers
// ---------------------------------------------------------------------------

/// A rasterizer vertex buffer mapped for compute writes.
///
/// The same `wgpu::Buffer` serves as the compute binding and as the
/// rasterizer's vertex input; `element_count` is the number of floats the
/// compute side may write.
#[derive(Debug)]
pub struct VertexBuffer {
    handle: wgpu::Buffer,
    element_count: usize,
}

impl VertexBuffer {
    pub(crate) fn new(handle: wgpu::Buffer, element_count: usize) -> Result<Self> {
        let needed = (element_count * std::mem::size_of::<f32>()) as u64;
        if handle.size() < needed {
            return Err(Error::IllegalArgument(format!(
                "shared buffer of {} bytes cannot hold {element_count} floats",
                handle.size()
            )));
        }
        if !handle.usage().contains(wgpu::BufferUsages::STORAGE) {
            return Err(Error::IllegalArgument(
                "shared vertex buffer lacks STORAGE usage".into(),
            ));
        }
        Ok(VertexBuffer { handle, element_count })
    }

    /// Handle bound by compute kernels.
    pub fn compute_handle(&self) -> &wgpu::Buffer {
        &self.handle
    }

    /// Handle the rasterizer draws from.
    pub fn graphics_handle(&self) -> &wgpu::Buffer {
        &self.handle
    }

    pub fn element_count(&self) -> usize {
        self.element_count
    }

    pub(crate) fn binding(&self) -> Option<wgpu::BufferBinding<'_>> {
        let bytes = (self.element_count * std::mem::size_of::<f32>()) as u64;
        std::num::NonZeroU64::new(bytes).map(|size| wgpu::BufferBinding {
            buffer: &self.handle,
            offset: 0,
            size: Some(size),
        })
    }
}

// ---------------------------------------------------------------------------
// Rasterizer interface
// ---------------------------------------------------------------------------

/// Viewport dimensions handed to the rasterizer with each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// The rendering layer as seen from the compute pipelines.
pub trait Rasterizer {
    /// Allocate a vertex buffer of at least `capacity_floats` floats that
    /// compute kernels can write (needs `STORAGE` usage).
    fn allocate_shared_vertex_buffer(&mut self, session: &Session, capacity_floats: usize) -> Result<wgpu::Buffer>;

    /// Draw `vertex_count` vertices from `vertices` as a line list.
    fn present_frame(
        &mut self,
        vertices: &GraphicsShared<VertexBuffer, Unshared>,
        vertex_count: u32,
        viewport: Viewport,
    ) -> Result<()>;
}

/// A frame recorded by `HeadlessRasterizer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentedFrame {
    pub vertex_count: u32,
    pub viewport: Viewport,
}

/// Surface-less rasterizer: allocates real device buffers and records what
/// would have been drawn.
#[derive(Debug, Default)]
pub struct HeadlessRasterizer {
    frames: Vec<PresentedFrame>,
    allocations: usize,
}

impl HeadlessRasterizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[PresentedFrame] {
        &self.frames
    }

    pub fn last_frame(&self) -> Option<&PresentedFrame> {
        self.frames.last()
    }

    pub fn allocations(&self) -> usize {
        self.allocations
    }
}

impl Rasterizer for HeadlessRasterizer {
    fn allocate_shared_vertex_buffer(&mut self, session: &Session, capacity_floats: usize) -> Result<wgpu::Buffer> {
        self.allocations += 1;
        session.allocate_raw_vertex_buffer(capacity_floats)
    }

    fn present_frame(
        &mut self,
        vertices: &GraphicsShared<VertexBuffer, Unshared>,
        vertex_count: u32,
        viewport: Viewport,
    ) -> Result<()> {
        let capacity = vertices.graphics().element_count() / 2;
        if vertex_count as usize > capacity {
            return Err(Error::IllegalArgument(format!(
                "{vertex_count} vertices requested from a buffer holding {capacity}"
            )));
        }
        log::debug!("present: {vertex_count} vertices, {}×{}", viewport.width, viewport.height);
        self.frames.push(PresentedFrame { vertex_count, viewport });
        Ok(())
    }
}
