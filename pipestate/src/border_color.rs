//! A pool of deduplicated sampler border colors.
//!
//! `SAMPLER_STATE` points at its border color with an offset from the dynamic state base address,
//! so every border color referenced by one set of samplers has to live in the same buffer object.
//! Callers therefore [`reserve`] room for all the colors of a binding operation up front, which
//! replaces the pool early if needed, before uploading them one by one.
//!
//! [`reserve`]: BorderColorPool::reserve

use crate::{
    alloc::{AllocError, BumpRegion, RegionUser},
    binder::MAX_STATE_SIZE,
    bo::{Bo, BufferProvider, MemZone},
};
use bytemuck::{Pod, Zeroable};
use foldhash::HashMap;
use std::sync::Arc;

/// The default size of the border color pool.
pub const BORDER_COLOR_POOL_SIZE: u32 = 64 * 1024;

/// The stride and alignment of border color entries. The hardware wants 64-byte alignment on
/// all supported generations.
pub const BORDER_COLOR_ALIGNMENT: u32 = 64;

/// A border color, as four 32-bit channels.
///
/// Whether the channels hold floats or integers depends on the format of the sampled view. Two
/// colors are the same entry if their bits are the same.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct BorderColor {
    pub channels: [u32; 4],
}

impl BorderColor {
    #[inline]
    pub fn from_f32(rgba: [f32; 4]) -> Self {
        BorderColor {
            channels: rgba.map(f32::to_bits),
        }
    }

    #[inline]
    pub const fn from_u32(rgba: [u32; 4]) -> Self {
        BorderColor { channels: rgba }
    }
}

/// Uploads border colors, handing out the same offset for the same color.
///
/// # Efficiency
///
/// Uploading a color already in the pool is a hash lookup. The map is dropped along with the
/// buffer object whenever the pool is replaced.
#[derive(Debug)]
pub struct BorderColorPool {
    region: BumpRegion,
    map: HashMap<BorderColor, u32>,
}

impl BorderColorPool {
    /// # Panics
    ///
    /// - Panics if `size` is larger than [`MAX_STATE_SIZE`].
    pub fn new(provider: &mut dyn BufferProvider, size: u32) -> Result<Self, AllocError> {
        assert!(size <= MAX_STATE_SIZE);

        Ok(BorderColorPool {
            region: BumpRegion::new(
                provider,
                "border colors",
                MemZone::Dynamic,
                size,
                BORDER_COLOR_ALIGNMENT,
            )?,
            map: HashMap::default(),
        })
    }

    #[inline]
    pub fn bo(&self) -> &Arc<Bo> {
        self.region.bo()
    }

    #[inline]
    pub fn region(&self) -> &BumpRegion {
        &self.region
    }

    /// Returns the number of distinct colors in the current buffer object.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Makes sure `count` more entries fit in the current buffer object, replacing it now if they
    /// don't.
    pub fn reserve(
        &mut self,
        count: u32,
        provider: &mut dyn BufferProvider,
        user: &mut dyn RegionUser,
    ) -> Result<(), AllocError> {
        let size = count.saturating_mul(BORDER_COLOR_ALIGNMENT);

        if size == 0 {
            return Ok(());
        }

        if self
            .region
            .prepare(size, BORDER_COLOR_ALIGNMENT, provider, user)?
        {
            self.map.clear();
        }

        Ok(())
    }

    /// Uploads `color` unless it is already in the pool, and returns its offset.
    pub fn upload(
        &mut self,
        color: BorderColor,
        provider: &mut dyn BufferProvider,
        user: &mut dyn RegionUser,
    ) -> Result<u32, AllocError> {
        if let Some(&offset) = self.map.get(&color) {
            user.reference(self.region.bo());

            return Ok(offset);
        }

        let reservation = self.region.reserve(
            BORDER_COLOR_ALIGNMENT,
            BORDER_COLOR_ALIGNMENT,
            provider,
            user,
        )?;

        if reservation.replaced {
            self.map.clear();
        }

        self.region
            .write(reservation.offset, bytemuck::bytes_of(&color));
        self.map.insert(color, reservation.offset);

        Ok(reservation.offset)
    }
}
