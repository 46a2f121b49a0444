// gpu/pyramid.rs — Device histogram pyramid.
//
// All levels of the pyramid are packed back to back into one i32 storage
// buffer. Level 0 is the per-cell segment count of a (w-1)×(h-1) cell grid;
// each further level is the ceiling-half of the one below; the last level is
// the 1×1 total. Shape and packing come from `contour::pyramid_level_dims`,
// so the device layout matches the host `contour::HistogramPyramid` level for
// level.
//
//
// LEVEL TABLE
// ───────────
// Kernels locate levels through a uniform table:
//
//   struct PyramidTable {
//       level_count: u32, total_len: u32, _pad: [u32; 2],
//       levels: [[u32; 4]; 16],      // (offset, width, height, 0)
//   }
//
// `vec4<u32>` elements keep the array's uniform stride at 16 bytes without
// per-field padding. Sixteen levels cover cell grids up to 32768 on a side.
//
//
// LIFETIME
// ────────
// Built once per field shape (`HistogramPyramid::new`), reused every frame.
// The contents are overwritten by each marching-squares run.

use crate::contour::{pyramid_level_dims, PyramidLevel, MAX_PYRAMID_LEVELS};
use crate::error::Result;
use crate::gpu::buffer::{BufferUsage, LinearBuffer};
use crate::gpu::session::Session;

/// Uniform layout of the level table. Must match `PyramidTable` in
/// shaders/marching_squares/lookup.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PyramidTable {
    pub level_count: u32,
    pub total_len: u32,
    pub _pad: [u32; 2],
    pub levels: [[u32; 4]; MAX_PYRAMID_LEVELS],
}

/// Placement of one level inside the packed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelLayout {
    pub offset: u32,
    pub width: u32,
    pub height: u32,
}

impl LevelLayout {
    pub fn len(&self) -> u32 {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pack the levels of a `width × height` sample field end to end.
pub fn pack_levels(width: u32, height: u32) -> Result<Vec<LevelLayout>> {
    let mut offset = 0;
    Ok(pyramid_level_dims(width, height)?
        .into_iter()
        .map(|(w, h)| {
            let level = LevelLayout { offset, width: w, height: h };
            offset += w * h;
            level
        })
        .collect())
}

/// Histogram pyramid resident on the device.
pub struct HistogramPyramid {
    pub(crate) counts: LinearBuffer<i32>,
    levels: Vec<LevelLayout>,
    table: wgpu::Buffer,
    field_width: u32,
    field_height: u32,
}

impl HistogramPyramid {
    /// Allocate a pyramid for a field of `width × height` samples.
    ///
    /// # Errors
    /// `IllegalArgument` for fields smaller than 2×2 or too deep for the
    /// level table.
    pub fn new(session: &Session, width: u32, height: u32) -> Result<Self> {
        let levels = pack_levels(width, height)?;
        let total_len: u32 = levels.iter().map(LevelLayout::len).sum();
        let counts = session.allocate_buffer::<i32>(total_len as usize, BufferUsage::Storage)?;
        let table = session.uniform("pyramid table", &Self::table_for(&levels));
        log::debug!(
            "histogram pyramid for {width}×{height}: {} levels, {total_len} entries",
            levels.len()
        );
        Ok(HistogramPyramid { counts, levels, table, field_width: width, field_height: height })
    }

    fn table_for(levels: &[LevelLayout]) -> PyramidTable {
        let mut table = PyramidTable {
            level_count: levels.len() as u32,
            total_len: levels.iter().map(LevelLayout::len).sum(),
            _pad: [0; 2],
            levels: [[0; 4]; MAX_PYRAMID_LEVELS],
        };
        for (slot, l) in table.levels.iter_mut().zip(levels) {
            *slot = [l.offset, l.width, l.height, 0];
        }
        table
    }

    pub fn table(&self) -> PyramidTable {
        Self::table_for(&self.levels)
    }

    pub(crate) fn table_uniform(&self) -> &wgpu::Buffer {
        &self.table
    }

    pub fn levels(&self) -> &[LevelLayout] {
        &self.levels
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Field shape the pyramid was built for.
    pub fn field_size(&self) -> (u32, u32) {
        (self.field_width, self.field_height)
    }

    /// Element offset of the 1×1 top.
    pub fn top_offset(&self) -> usize {
        self.levels.last().map_or(0, |l| l.offset as usize)
    }

    /// Blocking read of the total segment count.
    pub fn read_total(&self, session: &Session) -> Result<u32> {
        Ok(session.read_buffer_element(&self.counts, self.top_offset())?.max(0) as u32)
    }

    /// Blocking read of one level.
    pub fn read_level(&self, session: &Session, level: usize) -> Result<PyramidLevel> {
        let Some(l) = self.levels.get(level).copied() else {
            return Err(crate::error::Error::IllegalArgument(format!(
                "level {level} of a {}-level pyramid",
                self.levels.len()
            )));
        };
        let all = session.read_buffer(&self.counts)?;
        let range = l.offset as usize..(l.offset + l.len()) as usize;
        Ok(PyramidLevel { width: l.width, height: l.height, counts: all[range].to_vec() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_272_bytes() {
        assert_eq!(std::mem::size_of::<PyramidTable>(), 16 + 16 * 16);
    }

    #[test]
    fn test_pack_levels_end_to_end() {
        // 9×5 samples → 8×4 cells → 4×2 → 2×1 → 1×1
        let levels = pack_levels(9, 5).unwrap();
        let shapes: Vec<_> = levels.iter().map(|l| (l.width, l.height)).collect();
        assert_eq!(shapes, vec![(8, 4), (4, 2), (2, 1), (1, 1)]);
        let offsets: Vec<_> = levels.iter().map(|l| l.offset).collect();
        assert_eq!(offsets, vec![0, 32, 40, 42]);
    }

    #[test]
    fn test_single_cell_field() {
        let levels = pack_levels(2, 2).unwrap();
        assert_eq!(levels, vec![LevelLayout { offset: 0, width: 1, height: 1 }]);
    }

    #[test]
    fn test_table_contents() {
        let levels = pack_levels(9, 5).unwrap();
        let t = HistogramPyramid::table_for(&levels);
        assert_eq!(t.level_count, 4);
        assert_eq!(t.total_len, 43);
        assert_eq!(t.levels[1], [32, 4, 2, 0]);
        assert_eq!(t.levels[4], [0; 4]);
    }

    #[test]
    fn test_too_small_field_rejected() {
        assert!(pack_levels(1, 8).is_err());
    }
}
