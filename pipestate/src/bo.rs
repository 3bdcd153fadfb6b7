//! GPU-visible buffer objects and the interface used to allocate them.
//!
//! Buffer objects are owned by whoever allocated them and shared through `Arc`. Keeping a
//! buffer object alive past the point where the GPU is done with it, and recycling it afterwards,
//! is the business of the [`BufferProvider`], not of this crate.

use parking_lot::Mutex;
use std::{fmt, sync::Arc};
use thiserror::Error;

/// Identifies a buffer object for the lifetime of its provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoId(pub u64);

/// A region of the GPU virtual address space.
///
/// Hardware pointers to state are 32-bit offsets from the base address of the zone the state
/// lives in, so state of one kind must stay within its zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemZone {
    /// Shader assembly, relative to the instruction base address.
    Shader,
    /// Binding tables, relative to the binding table pool base address.
    Binder,
    /// `RENDER_SURFACE_STATE`s, relative to the surface state base address.
    Surface,
    /// Dynamic state (blend, viewport, sampler, border color), relative to the dynamic state base
    /// address.
    Dynamic,
    /// Everything else: vertex and index data, render targets, the batch itself.
    Other,
}

const ZONE_SPAN: u64 = 1 << 32;

impl MemZone {
    pub const ALL: [MemZone; 5] = [
        MemZone::Shader,
        MemZone::Binder,
        MemZone::Surface,
        MemZone::Dynamic,
        MemZone::Other,
    ];

    /// Returns the first GPU address of the zone.
    #[inline]
    pub const fn base_address(self) -> u64 {
        match self {
            MemZone::Shader => 0,
            MemZone::Binder => ZONE_SPAN,
            MemZone::Surface => ZONE_SPAN + (1 << 30),
            MemZone::Dynamic => 2 * ZONE_SPAN,
            MemZone::Other => 3 * ZONE_SPAN,
        }
    }

    /// Returns how many bytes of address space the zone spans.
    #[inline]
    pub const fn span(self) -> u64 {
        match self {
            MemZone::Binder => 1 << 30,
            MemZone::Surface => ZONE_SPAN - (1 << 30),
            _ => ZONE_SPAN,
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// A GPU-visible buffer object with a CPU mapping.
pub struct Bo {
    id: BoId,
    name: &'static str,
    zone: MemZone,
    address: u64,
    map: Mutex<Box<[u8]>>,
}

impl Bo {
    /// Creates a zero-filled buffer object at `address`.
    ///
    /// # Panics
    ///
    /// - Panics if the buffer object doesn't fit inside `zone`.
    pub fn new(id: BoId, name: &'static str, size: u64, zone: MemZone, address: u64) -> Self {
        assert!(address >= zone.base_address());
        assert!(address + size <= zone.base_address() + zone.span());

        Bo {
            id,
            name,
            zone,
            address,
            map: Mutex::new(vec![0; size as usize].into_boxed_slice()),
        }
    }

    #[inline]
    pub fn id(&self) -> BoId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.map.lock().len() as u64
    }

    #[inline]
    pub fn zone(&self) -> MemZone {
        self.zone
    }

    /// Returns the GPU virtual address of the first byte.
    #[inline]
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Returns the offset of the first byte from the base address of the buffer object's zone.
    /// This is what state pointers in packets hold.
    #[inline]
    pub fn offset_from_base(&self) -> u32 {
        (self.address - self.zone.base_address()) as u32
    }

    /// Copies `data` into the mapping at `offset`.
    ///
    /// # Panics
    ///
    /// - Panics if the range is out of bounds of the buffer object.
    pub fn write(&self, offset: u32, data: &[u8]) {
        let offset = offset as usize;
        self.map.lock()[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Copies `dwords` into the mapping at `offset`.
    pub fn write_dwords(&self, offset: u32, dwords: &[u32]) {
        self.write(offset, bytemuck::cast_slice(dwords));
    }

    /// Reads `len` bytes at `offset` out of the mapping.
    pub fn read(&self, offset: u32, len: usize) -> Vec<u8> {
        let offset = offset as usize;
        self.map.lock()[offset..offset + len].to_vec()
    }

    /// Reads `count` dwords at `offset` out of the mapping.
    pub fn read_dwords(&self, offset: u32, count: usize) -> Vec<u32> {
        self.read(offset, count * 4)
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

impl fmt::Debug for Bo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("zone", &self.zone)
            .field("address", &format_args!("{:#x}", self.address))
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

/// Allocates GPU-visible memory.
pub trait BufferProvider {
    /// Allocates a zero-filled buffer object of `size` bytes in `zone`.
    fn alloc(
        &mut self,
        name: &'static str,
        size: u64,
        zone: MemZone,
    ) -> Result<Arc<Bo>, BoAllocError>;
}

/// Error that can happen when allocating a buffer object.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BoAllocError {
    #[error("out of GPU memory allocating {size} bytes for `{name}`")]
    OutOfMemory { name: &'static str, size: u64 },
    #[error("memory zone {zone:?} is exhausted allocating {size} bytes for `{name}`")]
    ZoneExhausted {
        name: &'static str,
        size: u64,
        zone: MemZone,
    },
}

const PAGE_SIZE: u64 = 4096;

/// A [`BufferProvider`] backed by host memory, handing out page-aligned addresses that only ever
/// grow within each zone.
#[derive(Debug)]
pub struct HeapBufferProvider {
    next_id: u64,
    next_address: [u64; 5],
    budget: Option<u64>,
    allocated: u64,
}

impl Default for HeapBufferProvider {
    fn default() -> Self {
        HeapBufferProvider::new()
    }
}

impl HeapBufferProvider {
    pub fn new() -> Self {
        HeapBufferProvider {
            next_id: 1,
            next_address: MemZone::ALL.map(MemZone::base_address),
            budget: None,
            allocated: 0,
        }
    }

    /// Creates a provider that fails once `budget` bytes have been handed out in total.
    pub fn with_budget(budget: u64) -> Self {
        HeapBufferProvider {
            budget: Some(budget),
            ..HeapBufferProvider::new()
        }
    }

    /// Returns the number of bytes handed out so far.
    #[inline]
    pub fn allocated(&self) -> u64 {
        self.allocated
    }
}

impl BufferProvider for HeapBufferProvider {
    fn alloc(
        &mut self,
        name: &'static str,
        size: u64,
        zone: MemZone,
    ) -> Result<Arc<Bo>, BoAllocError> {
        if self.budget.is_some_and(|budget| self.allocated + size > budget) {
            return Err(BoAllocError::OutOfMemory { name, size });
        }

        let address = self.next_address[zone.index()];
        let end = address + size.next_multiple_of(PAGE_SIZE);

        if end > zone.base_address() + zone.span() {
            return Err(BoAllocError::ZoneExhausted { name, size, zone });
        }

        let id = BoId(self.next_id);
        self.next_id += 1;
        self.next_address[zone.index()] = end;
        self.allocated += size;

        Ok(Arc::new(Bo::new(id, name, size, zone, address)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_grow_per_zone() {
        let mut provider = HeapBufferProvider::new();

        let a = provider.alloc("a", 100, MemZone::Dynamic).unwrap();
        let b = provider.alloc("b", 100, MemZone::Dynamic).unwrap();
        let c = provider.alloc("c", 100, MemZone::Binder).unwrap();

        assert_eq!(a.offset_from_base(), 0);
        assert_eq!(b.offset_from_base(), PAGE_SIZE as u32);
        assert_eq!(c.offset_from_base(), 0);
        assert_ne!(a.id(), b.id());
        assert_eq!(c.address(), MemZone::Binder.base_address());
    }

    #[test]
    fn budget() {
        let mut provider = HeapBufferProvider::with_budget(1000);

        provider.alloc("a", 600, MemZone::Other).unwrap();
        assert_eq!(
            provider.alloc("b", 600, MemZone::Other).unwrap_err(),
            BoAllocError::OutOfMemory {
                name: "b",
                size: 600,
            },
        );
        provider.alloc("c", 400, MemZone::Other).unwrap();
    }

    #[test]
    fn read_write() {
        let mut provider = HeapBufferProvider::new();
        let bo = provider.alloc("bo", 64, MemZone::Other).unwrap();

        bo.write_dwords(8, &[0xdead_beef, 7]);
        assert_eq!(bo.read_dwords(8, 2), [0xdead_beef, 7]);
        assert_eq!(bo.read(0, 4), [0; 4]);
    }
}
