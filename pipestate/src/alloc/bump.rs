use super::{AllocError, RegionUser};
use crate::{
    align_up,
    bo::{Bo, BufferProvider, MemZone},
};
use std::sync::Arc;

/// A fixed-capacity region of GPU-visible memory that can only be allocated from linearly.
///
/// # Algorithm
///
/// Every reservation receives the current *insert point*, aligned as requested, and the insert
/// point is then bumped past it, rounded up to the region's alignment. Memory is never freed
/// individually. When a request would go past the end of the region, the region's
/// [`RegionUser`] drains the old buffer object, a new one is allocated, and the insert point goes
/// back to the first valid offset, which is the region's alignment since offset 0 is reserved.
///
/// The old buffer object is not reused by the region. Whoever still holds a reference to it,
/// such as a submitted batch, keeps it alive.
///
/// # Efficiency
///
/// Reserving is *O*(1), and so is replacing the region, not counting the cost of the drain.
#[derive(Debug)]
pub struct BumpRegion {
    name: &'static str,
    zone: MemZone,
    size: u32,
    alignment: u32,
    bo: Arc<Bo>,
    insert_point: u32,
    generation: u32,
}

/// Memory handed out by [`BumpRegion::reserve`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reservation {
    /// Offset of the reservation from the start of the region's current buffer object.
    pub offset: u32,
    /// Whether the region was replaced to satisfy the reservation. Offsets handed out before are
    /// relative to the previous buffer object.
    pub replaced: bool,
}

impl BumpRegion {
    /// Creates a region of `size` bytes in `zone`.
    ///
    /// # Panics
    ///
    /// - Panics if `alignment` is not a power of two.
    /// - Panics if `size` leaves no room past the reserved first `alignment` bytes.
    pub fn new(
        provider: &mut dyn BufferProvider,
        name: &'static str,
        zone: MemZone,
        size: u32,
        alignment: u32,
    ) -> Result<Self, AllocError> {
        assert!(alignment.is_power_of_two());
        assert!(size > alignment);

        let bo = provider.alloc(name, u64::from(size), zone)?;

        Ok(BumpRegion {
            name,
            zone,
            size,
            alignment,
            bo,
            insert_point: alignment,
            generation: 0,
        })
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the current backing buffer object.
    #[inline]
    pub fn bo(&self) -> &Arc<Bo> {
        &self.bo
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn alignment(&self) -> u32 {
        self.alignment
    }

    /// Returns the offset the next reservation will start at, before alignment.
    #[inline]
    pub fn insert_point(&self) -> u32 {
        self.insert_point
    }

    /// Returns how many times the backing buffer object has been replaced.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Returns the number of bytes left before the region has to be replaced.
    #[inline]
    pub fn remaining(&self) -> u32 {
        self.size.saturating_sub(self.insert_point)
    }

    /// Returns whether a reservation of `size` bytes fits without replacing the region.
    #[inline]
    pub fn fits(&self, size: u32, alignment: u32) -> bool {
        Self::end_of(self.insert_point, size, alignment) <= u64::from(self.size)
    }

    fn fits_when_empty(&self, size: u32, alignment: u32) -> bool {
        Self::end_of(self.alignment, size, alignment) <= u64::from(self.size)
    }

    fn end_of(insert_point: u32, size: u32, alignment: u32) -> u64 {
        u64::from(align_up(insert_point, alignment)) + u64::from(size)
    }

    /// Drains the current buffer object and replaces it with a fresh one.
    pub fn reset(
        &mut self,
        provider: &mut dyn BufferProvider,
        user: &mut dyn RegionUser,
    ) -> Result<(), AllocError> {
        user.drain(&self.bo)?;

        self.bo = provider.alloc(self.name, u64::from(self.size), self.zone)?;
        self.insert_point = self.alignment;
        self.generation += 1;

        tracing::debug!(
            region = self.name,
            bo = self.bo.id().0,
            generation = self.generation,
            "replaced exhausted region",
        );

        Ok(())
    }

    /// Carves out `size` bytes at the insert point without checking for space. The caller must
    /// have made sure the reservation [fits].
    ///
    /// [fits]: Self::fits
    pub(crate) fn insert(&mut self, size: u32, alignment: u32) -> u32 {
        debug_assert!(self.fits(size, alignment));

        let offset = align_up(self.insert_point, alignment);
        self.insert_point = align_up(offset + size, self.alignment);

        offset
    }

    /// Makes sure a reservation of `size` bytes fits, [resetting] the region if it doesn't.
    /// Returns whether the region was replaced.
    ///
    /// [resetting]: Self::reset
    pub(crate) fn prepare(
        &mut self,
        size: u32,
        alignment: u32,
        provider: &mut dyn BufferProvider,
        user: &mut dyn RegionUser,
    ) -> Result<bool, AllocError> {
        if !self.fits_when_empty(size, alignment) {
            return Err(AllocError::RequestTooLarge {
                region: self.name,
                size,
                capacity: self.size - align_up(self.alignment, alignment).min(self.size),
            });
        }

        if self.fits(size, alignment) {
            return Ok(false);
        }

        self.reset(provider, user)?;

        Ok(true)
    }

    /// Reserves `size` bytes aligned to at least `alignment` and the region's own alignment.
    ///
    /// If the reservation doesn't fit, the region is [reset] and the reservation is retried once.
    ///
    /// # Panics
    ///
    /// - Panics if `size` is zero.
    /// - Panics if `alignment` is not a power of two.
    ///
    /// [reset]: Self::reset
    pub fn reserve(
        &mut self,
        size: u32,
        alignment: u32,
        provider: &mut dyn BufferProvider,
        user: &mut dyn RegionUser,
    ) -> Result<Reservation, AllocError> {
        assert!(size > 0, "zero-sized reservation from region `{}`", self.name);
        assert!(alignment.is_power_of_two());

        let alignment = alignment.max(self.alignment);
        let replaced = self.prepare(size, alignment, provider, user)?;
        let offset = self.insert(size, alignment);
        user.reference(&self.bo);

        Ok(Reservation { offset, replaced })
    }

    /// Copies `data` into the current buffer object at `offset`.
    #[inline]
    pub fn write(&self, offset: u32, data: &[u8]) {
        self.bo.write(offset, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{alloc::tests::CountingUser, bo::HeapBufferProvider};

    fn region(provider: &mut HeapBufferProvider, size: u32) -> BumpRegion {
        BumpRegion::new(provider, "test", MemZone::Dynamic, size, 64).unwrap()
    }

    #[test]
    fn never_hands_out_zero() {
        let mut provider = HeapBufferProvider::new();
        let mut user = CountingUser::default();
        let mut region = region(&mut provider, 1024);

        let r = region.reserve(1, 1, &mut provider, &mut user).unwrap();
        assert_eq!(r.offset, 64);
        assert!(!r.replaced);
        assert_eq!(region.insert_point(), 128);
        assert_eq!(user.referenced, [region.bo().id()]);
    }

    #[test]
    fn alignment_is_respected() {
        let mut provider = HeapBufferProvider::new();
        let mut user = CountingUser::default();
        let mut region = region(&mut provider, 4096);

        let a = region.reserve(10, 64, &mut provider, &mut user).unwrap();
        let b = region.reserve(10, 256, &mut provider, &mut user).unwrap();
        let c = region.reserve(100, 32, &mut provider, &mut user).unwrap();

        assert_eq!(a.offset, 64);
        assert_eq!(b.offset, 256);
        assert_eq!(c.offset, 320);
        assert_eq!(region.insert_point(), 448);
    }

    #[test]
    fn overflow_drains_once() {
        let mut provider = HeapBufferProvider::new();
        let mut user = CountingUser::default();
        let mut region = region(&mut provider, 256);
        let first_bo = region.bo().id();

        region.reserve(128, 64, &mut provider, &mut user).unwrap();
        assert_eq!(region.remaining(), 64);

        let r = region.reserve(128, 64, &mut provider, &mut user).unwrap();
        assert!(r.replaced);
        assert_eq!(r.offset, 64);
        assert_eq!(user.drained, [first_bo]);
        assert_ne!(region.bo().id(), first_bo);
        assert_eq!(region.generation(), 1);
    }

    #[test]
    fn too_large_is_an_error() {
        let mut provider = HeapBufferProvider::new();
        let mut user = CountingUser::default();
        let mut region = region(&mut provider, 256);

        let err = region
            .reserve(256, 64, &mut provider, &mut user)
            .unwrap_err();
        assert!(matches!(
            err,
            AllocError::RequestTooLarge { capacity: 192, .. }
        ));
        assert!(user.drained.is_empty());
    }

    #[test]
    fn provider_failure_propagates() {
        let mut provider = HeapBufferProvider::with_budget(256);
        let mut user = CountingUser::default();
        let mut region = region(&mut provider, 256);

        region.reserve(192, 64, &mut provider, &mut user).unwrap();
        let err = region.reserve(64, 64, &mut provider, &mut user).unwrap_err();
        assert!(matches!(err, AllocError::OutOfMemory(_)));
    }

    #[test]
    #[should_panic = "zero-sized reservation"]
    fn zero_size_panics() {
        let mut provider = HeapBufferProvider::new();
        let mut user = CountingUser::default();
        let mut region = region(&mut provider, 256);

        let _ = region.reserve(0, 64, &mut provider, &mut user);
    }
}
