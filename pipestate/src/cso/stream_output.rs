//! Stream-output targets.
//!
//! A target is a range of a buffer that transform feedback writes vertices to. Unlike other
//! state, the hardware keeps a running write offset per bound buffer, so a `3DSTATE_SO_BUFFER`
//! only resets the offset the first time a freshly bound target is emitted.

use crate::{
    bo::Bo,
    packet::{cmd::SoBuffer, merge, Address, Builder, Words, MOCS_WB},
    Gen,
};
use std::sync::Arc;

/// The number of stream-output buffer slots.
pub const MAX_SO_BUFFERS: usize = 4;

/// Parameters to create a [`StreamOutputTarget`].
#[derive(Clone, Debug)]
pub struct StreamOutputTargetInfo {
    pub bo: Arc<Bo>,
    /// Offset of the range from the start of `bo`, in bytes. Must be a multiple of 4.
    pub offset: u32,
    /// Size of the range in bytes.
    pub size: u32,
    /// Distance between consecutive vertices written to the range, in bytes.
    pub stride: u32,
}

/// A stream-output target CSO.
#[derive(Clone, Debug)]
pub struct StreamOutputTarget {
    pub bo: Arc<Bo>,
    /// `3DSTATE_SO_BUFFER` without the buffer index and the offset write enable.
    pub so_buffer: Words,
    pub stride: u32,
}

impl StreamOutputTarget {
    /// # Panics
    ///
    /// - Panics if the range is not 4-byte aligned or goes past the end of the buffer object.
    pub fn new(hw: Gen, info: &StreamOutputTargetInfo) -> Self {
        assert_eq!(info.offset % 4, 0);
        assert!(u64::from(info.offset) + u64::from(info.size) <= info.bo.size());

        let mut sob = Builder::<SoBuffer>::new(hw);
        sob.so_buffer_enable = true;
        sob.mocs = MOCS_WB;
        sob.surface_base_address = Address(info.bo.address() + u64::from(info.offset));
        sob.surface_size = (info.size / 4).max(1) - 1;

        StreamOutputTarget {
            bo: info.bo.clone(),
            so_buffer: sob.finish(),
            stride: info.stride,
        }
    }

    /// Returns the `3DSTATE_SO_BUFFER` binding the target to slot `index`. `zero_offset` resets
    /// the running write offset to the start of the range.
    pub fn so_buffer(&self, hw: Gen, index: u32, zero_offset: bool) -> Words {
        let mut sob = Builder::<SoBuffer>::new(hw);
        sob.so_buffer_index = index;
        sob.stream_offset_write_enable = zero_offset;

        merge(&self.so_buffer, &sob.finish())
    }
}

/// Returns the `3DSTATE_SO_BUFFER` of an unbound slot.
pub fn null_so_buffer(hw: Gen, index: u32) -> Words {
    let mut sob = Builder::<SoBuffer>::new(hw);
    sob.so_buffer_index = index;

    sob.finish()
}
