// gpu/buffer.rs — Linear device buffers and the arena.
//
// LinearBuffer<T>
//   Fixed-length, typed, owned. Element count and handle never change after
//   creation; contents do. Dropping it releases the device memory.
//
// ArenaBuffer<T> / SubBuffer<T>
//   One large buffer allocated up front plus a bump cursor. Each request
//   carves `[cursor, cursor + len)` out of it and advances the cursor; space
//   is never handed back. The only way to reset is to create a new arena.
//   Used for per-object outputs whose size is known only after a count pass.
//
// ARENA OFFSETS
// ─────────────
// A sub-range of a storage buffer can only be bound at an offset that is a
// multiple of `min_storage_buffer_offset_alignment` (256 bytes on most
// adapters). The cursor is therefore advanced by the requested length
// rounded up to that alignment. Regions stay disjoint and increasing; the
// capacity check counts the padding.

use std::marker::PhantomData;
use std::num::NonZeroU64;
use std::ops::Range;
use std::sync::Arc;

use crate::error::{Error, Result};

/// What a linear buffer will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// Kernel storage, readable back to the host.
    Storage,
    /// Kernel storage that the rasterizer also consumes as vertex input.
    Vertex,
}

impl BufferUsage {
    pub(crate) fn wgpu_usages(self) -> wgpu::BufferUsages {
        let base = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST;
        match self {
            BufferUsage::Storage => base,
            BufferUsage::Vertex => base | wgpu::BufferUsages::VERTEX,
        }
    }
}

/// Byte size of `len` elements of `T`, never zero and copy-aligned.
pub(crate) fn buffer_byte_size<T>(len: usize) -> u64 {
    let bytes = (len.max(1) * std::mem::size_of::<T>()) as u64;
    align_to_u64(bytes, wgpu::COPY_BUFFER_ALIGNMENT)
}

#[inline]
pub(crate) fn align_to_u64(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

// ---------------------------------------------------------------------------
// LinearBuffer
// ---------------------------------------------------------------------------

/// An owned, fixed-length 1-D device buffer of `T`.
///
/// Create through `Session::allocate_buffer` or `Session::create_buffer`.
pub struct LinearBuffer<T: bytemuck::Pod> {
    pub(crate) buffer: wgpu::Buffer,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: bytemuck::Pod> LinearBuffer<T> {
    pub(crate) fn from_raw(buffer: wgpu::Buffer, len: usize) -> Self {
        LinearBuffer { buffer, len, _marker: PhantomData }
    }

    /// Element count.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Bytes covering exactly `len` elements.
    pub fn byte_len(&self) -> u64 {
        (self.len * std::mem::size_of::<T>()) as u64
    }
}

// ---------------------------------------------------------------------------
// ArenaCursor
// ---------------------------------------------------------------------------

/// The arena's bookkeeping, independent of any device.
///
/// Invariants: `cursor` only grows, is always a multiple of `alignment`,
/// and never exceeds `capacity`. Returned ranges are disjoint and
/// increasing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaCursor {
    capacity: u64,
    cursor: u64,
    alignment: u64,
}

impl ArenaCursor {
    pub fn new(capacity: u64, alignment: u64) -> Self {
        ArenaCursor { capacity, cursor: 0, alignment: alignment.max(1) }
    }

    /// Reserve `len` bytes. A zero-length request returns an empty range at
    /// the cursor and does not advance it.
    ///
    /// # Errors
    /// `IllegalArgument` when the request does not fit; the cursor is left
    /// unchanged.
    pub fn request(&mut self, len: u64) -> Result<Range<u64>> {
        let start = self.cursor;
        if len == 0 {
            return Ok(start..start);
        }
        let end = start + len;
        if end > self.capacity {
            return Err(Error::IllegalArgument(format!(
                "arena exhausted: requested {len} bytes at offset {start}, capacity {}",
                self.capacity
            )));
        }
        self.cursor = align_to_u64(end, self.alignment).min(self.capacity);
        Ok(start..end)
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn remaining(&self) -> u64 {
        self.capacity - self.cursor
    }
}

// ---------------------------------------------------------------------------
// ArenaBuffer / SubBuffer
// ---------------------------------------------------------------------------

/// Bump allocator over one device buffer of `T`.
///
/// Single owner, append-only for the lifetime of one run.
pub struct ArenaBuffer<T: bytemuck::Pod> {
    buffer: Arc<wgpu::Buffer>,
    cursor: ArenaCursor,
    _marker: PhantomData<T>,
}

impl<T: bytemuck::Pod> ArenaBuffer<T> {
    pub(crate) fn new(buffer: wgpu::Buffer, capacity_bytes: u64, alignment: u64) -> Self {
        ArenaBuffer {
            buffer: Arc::new(buffer),
            cursor: ArenaCursor::new(capacity_bytes, alignment),
            _marker: PhantomData,
        }
    }

    /// Carve `len` elements off the front of the free space.
    pub fn request_sub_buffer(&mut self, len: usize) -> Result<SubBuffer<T>> {
        let elem = std::mem::size_of::<T>() as u64;
        let range = self.cursor.request(len as u64 * elem)?;
        log::trace!(
            "arena: {} elements at byte {} (cursor now {})",
            len,
            range.start,
            self.cursor.cursor()
        );
        Ok(SubBuffer {
            buffer: Arc::clone(&self.buffer),
            offset: range.start,
            len,
            _marker: PhantomData,
        })
    }

    pub fn cursor(&self) -> &ArenaCursor {
        &self.cursor
    }

    /// Capacity in elements.
    pub fn capacity(&self) -> usize {
        (self.cursor.capacity() / std::mem::size_of::<T>() as u64) as usize
    }
}

/// A view of `len` elements at byte `offset` inside an arena.
///
/// Keeps the arena's backing buffer alive.
#[derive(Clone)]
pub struct SubBuffer<T: bytemuck::Pod> {
    pub(crate) buffer: Arc<wgpu::Buffer>,
    offset: u64,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: bytemuck::Pod> SubBuffer<T> {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn byte_len(&self) -> u64 {
        (self.len * std::mem::size_of::<T>()) as u64
    }

    /// Bindable range; `None` for an empty view.
    pub(crate) fn binding(&self) -> Option<wgpu::BufferBinding<'_>> {
        NonZeroU64::new(self.byte_len()).map(|size| wgpu::BufferBinding {
            buffer: &self.buffer,
            offset: self.offset,
            size: Some(size),
        })
    }
}

impl<T: bytemuck::Pod> std::fmt::Debug for SubBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubBuffer")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_byte_size_never_zero() {
        assert_eq!(buffer_byte_size::<f32>(0), 4);
        assert_eq!(buffer_byte_size::<f32>(3), 12);
        assert_eq!(buffer_byte_size::<u8>(3), 4);
    }

    #[test]
    fn test_usage_flags() {
        assert!(BufferUsage::Vertex.wgpu_usages().contains(wgpu::BufferUsages::VERTEX));
        assert!(!BufferUsage::Storage.wgpu_usages().contains(wgpu::BufferUsages::VERTEX));
        assert!(BufferUsage::Storage.wgpu_usages().contains(wgpu::BufferUsages::COPY_SRC));
    }

    #[test]
    fn test_cursor_aligns_and_advances() {
        let mut c = ArenaCursor::new(1024, 256);
        assert_eq!(c.request(8).unwrap(), 0..8);
        assert_eq!(c.cursor(), 256);
        assert_eq!(c.request(300).unwrap(), 256..556);
        assert_eq!(c.cursor(), 768);
    }

    #[test]
    fn test_cursor_rejects_overflow_without_advancing() {
        let mut c = ArenaCursor::new(512, 256);
        c.request(256).unwrap();
        assert!(c.request(257).is_err());
        assert_eq!(c.cursor(), 256);
        assert_eq!(c.request(256).unwrap(), 256..512);
        assert_eq!(c.remaining(), 0);
    }

    #[test]
    fn test_zero_length_request() {
        let mut c = ArenaCursor::new(256, 256);
        assert_eq!(c.request(0).unwrap(), 0..0);
        assert_eq!(c.cursor(), 0);
    }
}
