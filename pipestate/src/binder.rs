//! Allocation of binding tables.
//!
//! A binding table is an array of 32-bit pointers to `RENDER_SURFACE_STATE`s, one table per
//! shader stage. Tables are carved out of a dedicated region that the hardware addresses
//! relative to the binding table pool base, with 16 bits of offset, which is why the region can't
//! grow past 64 KiB.

use crate::{
    alloc::{AllocError, BumpRegion, RegionUser},
    align_up,
    bo::{Bo, BufferProvider, MemZone},
    dirty::{DirtyFlags, DirtyTracker},
    ShaderStage, STAGE_COUNT,
};
use std::sync::Arc;

/// The default size of the binder region.
pub const BINDER_SIZE: u32 = 64 * 1024;

/// The default alignment of binding tables.
pub const BINDER_ALIGNMENT: u32 = 64;

/// The largest region whose offsets state pointers can express.
pub const MAX_STATE_SIZE: u32 = 64 * 1024;

/// Lays out the binding tables of every stage that needs new ones.
#[derive(Debug)]
pub struct Binder {
    region: BumpRegion,
    bt_offset: [u32; STAGE_COUNT],
}

impl Binder {
    /// # Panics
    ///
    /// - Panics if `size` is larger than [`MAX_STATE_SIZE`].
    /// - Panics if `alignment` is not a power of two.
    pub fn new(
        provider: &mut dyn BufferProvider,
        size: u32,
        alignment: u32,
    ) -> Result<Self, AllocError> {
        assert!(size <= MAX_STATE_SIZE);

        Ok(Binder {
            region: BumpRegion::new(provider, "binder", MemZone::Binder, size, alignment)?,
            bt_offset: [0; STAGE_COUNT],
        })
    }

    /// Returns the buffer object the current tables live in.
    #[inline]
    pub fn bo(&self) -> &Arc<Bo> {
        self.region.bo()
    }

    #[inline]
    pub fn region(&self) -> &BumpRegion {
        &self.region
    }

    /// Returns the offset of the binding table of `stage`, or 0 if it has none.
    #[inline]
    pub fn bt_offset(&self, stage: ShaderStage) -> u32 {
        self.bt_offset[stage.index()]
    }

    /// Reserves new binding tables for every stage among `stages` whose binding-table group is
    /// dirty, with a single reservation.
    ///
    /// `sizes` holds the size in bytes of each stage's table. Stages whose size is zero get
    /// offset 0. If the region has to be replaced, the tables of every stage are invalidated,
    /// so every binding-table group is marked and every stage gets a new table.
    pub fn reserve_stages(
        &mut self,
        stages: &[ShaderStage],
        sizes: [u32; STAGE_COUNT],
        dirty: &mut DirtyTracker,
        provider: &mut dyn BufferProvider,
        user: &mut dyn RegionUser,
    ) -> Result<(), AllocError> {
        let alignment = self.region.alignment();
        let aligned_sizes = sizes.map(|size| align_up(size, alignment));

        let total = |dirty: &DirtyTracker| -> u32 {
            stages
                .iter()
                .filter(|&&stage| dirty.is_dirty(DirtyFlags::bindings(stage)))
                .map(|stage| aligned_sizes[stage.index()])
                .sum()
        };

        let mut size = total(dirty);

        if size == 0 {
            return Ok(());
        }

        if self.region.prepare(size, alignment, provider, user)? {
            dirty.mark(DirtyFlags::ALL_BINDINGS);
            size = total(dirty);
            self.region.prepare(size, alignment, provider, user)?;
        }

        let mut cursor = self.region.insert(size, alignment);
        user.reference(self.region.bo());

        for &stage in stages {
            if !dirty.is_dirty(DirtyFlags::bindings(stage)) {
                continue;
            }

            let stage_size = aligned_sizes[stage.index()];

            if stage_size == 0 {
                self.bt_offset[stage.index()] = 0;
            } else {
                self.bt_offset[stage.index()] = cursor;
                cursor += stage_size;
            }
        }

        Ok(())
    }

    /// Writes the entries of the binding table of `stage`.
    ///
    /// # Panics
    ///
    /// - Panics if `stage` has no binding table.
    pub fn write_table(&self, stage: ShaderStage, entries: &[u32]) {
        let offset = self.bt_offset(stage);
        assert_ne!(offset, 0, "{} has no binding table", stage.abbrev());

        self.region.bo().write_dwords(offset, entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{alloc::tests::CountingUser, bo::HeapBufferProvider};

    fn sizes(vs: u32, tcs: u32, tes: u32) -> [u32; STAGE_COUNT] {
        [vs, tcs, tes, 0, 0, 0]
    }

    #[test]
    fn stages_are_laid_out_in_order() {
        let mut provider = HeapBufferProvider::new();
        let mut user = CountingUser::default();
        let mut dirty = DirtyTracker::default();
        let mut binder = Binder::new(&mut provider, BINDER_SIZE, 32).unwrap();

        binder
            .reserve_stages(
                &ShaderStage::RENDER,
                sizes(64, 0, 128),
                &mut dirty,
                &mut provider,
                &mut user,
            )
            .unwrap();

        let vs = binder.bt_offset(ShaderStage::Vertex);
        let tcs = binder.bt_offset(ShaderStage::TessControl);
        let tes = binder.bt_offset(ShaderStage::TessEval);

        assert_eq!(tcs, 0);
        assert_eq!(vs, 32);
        assert_eq!(tes, 96);
        assert_eq!(vs % 32, 0);
        assert_eq!(tes % 32, 0);
        assert!(vs + 64 <= tes);
        assert_eq!(binder.region().insert_point(), 224);
        assert_eq!(user.referenced, [binder.bo().id()]);
    }

    #[test]
    fn clean_stages_keep_their_tables() {
        let mut provider = HeapBufferProvider::new();
        let mut user = CountingUser::default();
        let mut dirty = DirtyTracker::default();
        let mut binder = Binder::new(&mut provider, BINDER_SIZE, BINDER_ALIGNMENT).unwrap();

        binder
            .reserve_stages(
                &ShaderStage::RENDER,
                sizes(64, 64, 0),
                &mut dirty,
                &mut provider,
                &mut user,
            )
            .unwrap();
        let vs = binder.bt_offset(ShaderStage::Vertex);

        dirty.clear(DirtyFlags::all());
        dirty.mark(DirtyFlags::BINDINGS_TCS);
        binder
            .reserve_stages(
                &ShaderStage::RENDER,
                sizes(64, 64, 0),
                &mut dirty,
                &mut provider,
                &mut user,
            )
            .unwrap();

        assert_eq!(binder.bt_offset(ShaderStage::Vertex), vs);
        assert_eq!(binder.bt_offset(ShaderStage::TessControl), 192);
    }

    #[test]
    fn nothing_dirty_reserves_nothing() {
        let mut provider = HeapBufferProvider::new();
        let mut user = CountingUser::default();
        let mut dirty = DirtyTracker::clean();
        let mut binder = Binder::new(&mut provider, BINDER_SIZE, BINDER_ALIGNMENT).unwrap();

        binder
            .reserve_stages(
                &ShaderStage::RENDER,
                sizes(64, 64, 64),
                &mut dirty,
                &mut provider,
                &mut user,
            )
            .unwrap();

        assert_eq!(binder.region().insert_point(), BINDER_ALIGNMENT);
        assert!(user.referenced.is_empty());
    }

    #[test]
    fn overflow_remarks_every_stage() {
        let mut provider = HeapBufferProvider::new();
        let mut user = CountingUser::default();
        let mut dirty = DirtyTracker::default();
        let mut binder = Binder::new(&mut provider, 512, BINDER_ALIGNMENT).unwrap();
        let first_bo = binder.bo().id();

        binder
            .reserve_stages(
                &ShaderStage::RENDER,
                sizes(128, 128, 64),
                &mut dirty,
                &mut provider,
                &mut user,
            )
            .unwrap();

        dirty.clear(DirtyFlags::all());
        dirty.mark(DirtyFlags::BINDINGS_VS);
        binder
            .reserve_stages(
                &ShaderStage::RENDER,
                sizes(192, 128, 64),
                &mut dirty,
                &mut provider,
                &mut user,
            )
            .unwrap();

        assert_eq!(user.drained, [first_bo]);
        assert!(dirty.bits().contains(DirtyFlags::ALL_BINDINGS));
        assert_eq!(binder.bt_offset(ShaderStage::Vertex), 64);
        assert_eq!(binder.bt_offset(ShaderStage::TessControl), 256);
        assert_eq!(binder.bt_offset(ShaderStage::TessEval), 384);
    }

    #[test]
    fn tables_are_written_at_their_offset() {
        let mut provider = HeapBufferProvider::new();
        let mut user = CountingUser::default();
        let mut dirty = DirtyTracker::default();
        let mut binder = Binder::new(&mut provider, BINDER_SIZE, BINDER_ALIGNMENT).unwrap();

        binder
            .reserve_stages(
                &[ShaderStage::Compute],
                [0, 0, 0, 0, 0, 8],
                &mut dirty,
                &mut provider,
                &mut user,
            )
            .unwrap();
        binder.write_table(ShaderStage::Compute, &[0x1000, 0x2000]);

        let offset = binder.bt_offset(ShaderStage::Compute);
        assert_eq!(binder.bo().read_dwords(offset, 2), [0x1000, 0x2000]);
    }
}
