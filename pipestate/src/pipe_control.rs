//! Sequencing of `PIPE_CONTROL` commands.
//!
//! A `PIPE_CONTROL` flushes or invalidates caches, stalls parts of the pipeline, and can write a
//! value to memory once the work before it has reached some point. The hardware places many
//! restrictions on which of these can be combined, and some requests need an extra
//! `PIPE_CONTROL` before them. [`Batch::emit_raw_pipe_control`] takes care of all of that, so
//! callers only ever ask for what they need.

use crate::{
    batch::Batch,
    bo::Bo,
    packet::{cmd::PipeControl, pack, Address},
    Gen, Pipeline,
};
use bitflags::bitflags;
use std::sync::Arc;

bitflags! {
    /// What a `PIPE_CONTROL` should do.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PipeControlFlags: u32 {
        const FLUSH_LLC = 1 << 1;
        const LRI_POST_SYNC_OP = 1 << 2;
        const STORE_DATA_INDEX = 1 << 3;
        const CS_STALL = 1 << 4;
        const GLOBAL_SNAPSHOT_COUNT_RESET = 1 << 5;
        const SYNC_GFDT = 1 << 6;
        const TLB_INVALIDATE = 1 << 7;
        const MEDIA_STATE_CLEAR = 1 << 8;
        const WRITE_IMMEDIATE = 1 << 9;
        const WRITE_DEPTH_COUNT = 1 << 10;
        const WRITE_TIMESTAMP = 1 << 11;
        const DEPTH_STALL = 1 << 12;
        const RENDER_TARGET_FLUSH = 1 << 13;
        const INSTRUCTION_INVALIDATE = 1 << 14;
        const TEXTURE_CACHE_INVALIDATE = 1 << 15;
        const INDIRECT_STATE_POINTERS_DISABLE = 1 << 16;
        const NOTIFY_ENABLE = 1 << 17;
        const FLUSH_ENABLE = 1 << 18;
        const DATA_CACHE_FLUSH = 1 << 19;
        const VF_CACHE_INVALIDATE = 1 << 20;
        const CONST_CACHE_INVALIDATE = 1 << 21;
        const STATE_CACHE_INVALIDATE = 1 << 22;
        const STALL_AT_SCOREBOARD = 1 << 23;
        const DEPTH_CACHE_FLUSH = 1 << 24;

        /// The write caches.
        const CACHE_FLUSH_BITS = Self::DEPTH_CACHE_FLUSH.bits()
            | Self::DATA_CACHE_FLUSH.bits()
            | Self::RENDER_TARGET_FLUSH.bits();

        /// The read-only caches.
        const CACHE_INVALIDATE_BITS = Self::STATE_CACHE_INVALIDATE.bits()
            | Self::CONST_CACHE_INVALIDATE.bits()
            | Self::VF_CACHE_INVALIDATE.bits()
            | Self::TEXTURE_CACHE_INVALIDATE.bits()
            | Self::INSTRUCTION_INVALIDATE.bits();

        /// Post-sync operations writing to memory.
        const WRITE_BITS = Self::WRITE_IMMEDIATE.bits()
            | Self::WRITE_DEPTH_COUNT.bits()
            | Self::WRITE_TIMESTAMP.bits();

        /// Every post-sync operation. At most one may be requested at a time.
        const POST_SYNC_BITS = Self::WRITE_BITS.bits() | Self::LRI_POST_SYNC_OP.bits();
    }
}

impl PipeControlFlags {
    /// Returns the post-sync operation among `self`.
    ///
    /// # Panics
    ///
    /// - Panics if more than one post-sync operation is set.
    fn post_sync(self) -> PipeControlFlags {
        let post_sync = self & PipeControlFlags::POST_SYNC_BITS;
        assert!(
            post_sync.bits().count_ones() <= 1,
            "more than one post-sync operation requested: {post_sync:?}",
        );

        post_sync
    }

    fn post_sync_operation(self) -> u32 {
        if self.contains(PipeControlFlags::WRITE_IMMEDIATE) {
            PipeControl::WRITE_IMMEDIATE_DATA
        } else if self.contains(PipeControlFlags::WRITE_DEPTH_COUNT) {
            PipeControl::WRITE_PS_DEPTH_COUNT
        } else if self.contains(PipeControlFlags::WRITE_TIMESTAMP) {
            PipeControl::WRITE_TIMESTAMP
        } else {
            PipeControl::NO_WRITE
        }
    }
}

/// How deep prerequisite `PIPE_CONTROL`s may nest. Each rule that needs one emits a request the
/// rules themselves never expand further than once.
const MAX_DEPTH: u32 = 2;

impl Batch {
    /// Emits a `PIPE_CONTROL` doing what `flags` asks for, preceded by whatever other
    /// `PIPE_CONTROL`s the hardware requires and with whatever extra bits it requires added.
    ///
    /// `write` is where a post-sync operation writes to, and `imm` the value written by
    /// [`WRITE_IMMEDIATE`].
    ///
    /// # Panics
    ///
    /// - Panics if `flags` is a combination no amount of fixing up can make legal, such as
    ///   more than one post-sync operation, or a scoreboard stall together with a depth stall.
    ///
    /// [`WRITE_IMMEDIATE`]: PipeControlFlags::WRITE_IMMEDIATE
    pub fn emit_raw_pipe_control(
        &mut self,
        flags: PipeControlFlags,
        write: Option<(&Arc<Bo>, u32)>,
        imm: u64,
    ) {
        self.emit_pipe_control_at_depth(flags, write.map(|(bo, o)| (bo.clone(), o)), imm, 0);
    }

    fn emit_pipe_control_at_depth(
        &mut self,
        mut flags: PipeControlFlags,
        mut write: Option<(Arc<Bo>, u32)>,
        imm: u64,
        depth: u32,
    ) {
        use PipeControlFlags as F;

        assert!(
            depth <= MAX_DEPTH,
            "PIPE_CONTROL prerequisites nested too deeply",
        );

        let hw = self.hw();
        let compute = self.pipeline() == Pipeline::Compute;
        let post_sync = flags.post_sync();

        // Prerequisites go first.
        if hw == Gen::Gen9 && flags.contains(F::VF_CACHE_INVALIDATE) {
            self.emit_pipe_control_at_depth(F::empty(), None, 0, depth + 1);
        }

        if hw == Gen::Gen9 && compute && !post_sync.is_empty() {
            self.emit_pipe_control_at_depth(F::CS_STALL, None, 0, depth + 1);
        }

        if hw == Gen::Gen10 && flags.contains(F::RENDER_TARGET_FLUSH) {
            self.emit_pipe_control_at_depth(F::FLUSH_ENABLE, None, 0, depth + 1);
        }

        if flags.contains(F::VF_CACHE_INVALIDATE) && write.is_none() {
            flags |= F::WRITE_IMMEDIATE;
            write = Some((self.workaround_bo().clone(), 0));
        }

        let post_sync = flags.post_sync();
        let write_sync = post_sync - F::LRI_POST_SYNC_OP;

        if hw == Gen::Gen10 {
            if flags.contains(F::RENDER_TARGET_FLUSH) {
                flags |= F::STALL_AT_SCOREBOARD;
            } else if !write_sync.is_empty() {
                flags |= F::DEPTH_STALL;
            }
        }

        if flags.intersects(F::RENDER_TARGET_FLUSH | F::STALL_AT_SCOREBOARD) {
            assert!(
                !post_sync.intersects(F::WRITE_DEPTH_COUNT | F::WRITE_TIMESTAMP),
                "depth count and timestamp writes can't follow a render target flush or \
                scoreboard stall",
            );
        }

        if flags.contains(F::STALL_AT_SCOREBOARD) {
            let excluded = if hw >= Gen::Gen10 {
                F::DEPTH_STALL
            } else {
                F::DEPTH_STALL | F::RENDER_TARGET_FLUSH
            };
            assert!(
                !flags.intersects(excluded),
                "scoreboard stall combined with {:?}",
                flags & excluded,
            );
        }

        if hw == Gen::Gen8 && flags.contains(F::STATE_CACHE_INVALIDATE) {
            flags |= F::CS_STALL;
        }

        if flags.contains(F::FLUSH_LLC) {
            assert!(
                flags.contains(F::WRITE_IMMEDIATE),
                "LLC flush without an immediate write",
            );
        }

        assert!(
            !flags.contains(F::GLOBAL_SNAPSHOT_COUNT_RESET),
            "global snapshot count reset is never valid",
        );

        if flags.intersects(F::MEDIA_STATE_CLEAR | F::INDIRECT_STATE_POINTERS_DISABLE) {
            flags |= F::CS_STALL;
        }

        if flags.intersects(F::STORE_DATA_INDEX | F::SYNC_GFDT) {
            assert!(
                !write_sync.is_empty(),
                "{:?} needs a post-sync write",
                flags & (F::STORE_DATA_INDEX | F::SYNC_GFDT),
            );
        }

        if flags.contains(F::TLB_INVALIDATE) {
            flags |= F::CS_STALL;
        }

        if compute {
            if hw >= Gen::Gen9 && flags.contains(F::TEXTURE_CACHE_INVALIDATE) {
                flags |= F::CS_STALL;
            }

            if hw == Gen::Gen8
                && (!post_sync.is_empty()
                    || flags.intersects(
                        F::NOTIFY_ENABLE
                            | F::DEPTH_STALL
                            | F::RENDER_TARGET_FLUSH
                            | F::DEPTH_CACHE_FLUSH
                            | F::DATA_CACHE_FLUSH,
                    ))
            {
                flags |= F::CS_STALL;
            }
        }

        if hw == Gen::Gen8 && flags.contains(F::CS_STALL) {
            let stall_companions = F::RENDER_TARGET_FLUSH
                | F::DEPTH_CACHE_FLUSH
                | F::WRITE_BITS
                | F::STALL_AT_SCOREBOARD
                | F::DEPTH_STALL
                | F::DATA_CACHE_FLUSH;

            if !flags.intersects(stall_companions) {
                flags |= F::STALL_AT_SCOREBOARD;
            }
        }

        flags.post_sync();

        let address = match &write {
            Some((bo, offset)) if flags.intersects(F::WRITE_BITS) => {
                self.use_bo(bo, true);
                Address(bo.address() + u64::from(*offset))
            }
            _ => Address::default(),
        };

        tracing::trace!(?flags, depth, "PIPE_CONTROL");

        let words = pack::<PipeControl>(hw, |pc| {
            pc.pipe_control_flush_enable = flags.contains(F::FLUSH_ENABLE);
            pc.dc_flush_enable = flags.contains(F::DATA_CACHE_FLUSH);
            pc.command_streamer_stall_enable = flags.contains(F::CS_STALL);
            pc.tlb_invalidate = flags.contains(F::TLB_INVALIDATE);
            pc.generic_media_state_clear = flags.contains(F::MEDIA_STATE_CLEAR);
            pc.stall_at_pixel_scoreboard = flags.contains(F::STALL_AT_SCOREBOARD);
            pc.render_target_cache_flush_enable = flags.contains(F::RENDER_TARGET_FLUSH);
            pc.depth_cache_flush_enable = flags.contains(F::DEPTH_CACHE_FLUSH);
            pc.state_cache_invalidation_enable = flags.contains(F::STATE_CACHE_INVALIDATE);
            pc.vf_cache_invalidation_enable = flags.contains(F::VF_CACHE_INVALIDATE);
            pc.constant_cache_invalidation_enable = flags.contains(F::CONST_CACHE_INVALIDATE);
            pc.post_sync_operation = flags.post_sync_operation();
            pc.depth_stall_enable = flags.contains(F::DEPTH_STALL);
            pc.instruction_cache_invalidate_enable = flags.contains(F::INSTRUCTION_INVALIDATE);
            pc.notify_enable = flags.contains(F::NOTIFY_ENABLE);
            pc.indirect_state_pointers_disable =
                flags.contains(F::INDIRECT_STATE_POINTERS_DISABLE);
            pc.texture_cache_invalidation_enable = flags.contains(F::TEXTURE_CACHE_INVALIDATE);
            pc.flush_llc = flags.contains(F::FLUSH_LLC);
            pc.store_data_index = flags.contains(F::STORE_DATA_INDEX);
            pc.address = address;
            pc.immediate_data = imm;
        });

        self.emit(&words);
    }

    /// Flushes and invalidates the caches in `flags`.
    ///
    /// A single `PIPE_CONTROL` both flushing and invalidating races: the invalidated caches can
    /// refill from memory before the flushed data lands. Such requests are split, with an
    /// end-of-pipe sync carrying the flushes first.
    pub fn emit_pipe_control_flush(&mut self, mut flags: PipeControlFlags) {
        if flags.intersects(PipeControlFlags::CACHE_FLUSH_BITS)
            && flags.intersects(PipeControlFlags::CACHE_INVALIDATE_BITS)
        {
            self.emit_end_of_pipe_sync(flags & PipeControlFlags::CACHE_FLUSH_BITS);
            flags -= PipeControlFlags::CACHE_FLUSH_BITS | PipeControlFlags::CS_STALL;
        }

        self.emit_raw_pipe_control(flags, None, 0);
    }

    /// Writes to `bo` at `offset` once prior work completes. `flags` must hold exactly one of
    /// the write operations.
    ///
    /// # Panics
    ///
    /// - Panics if `flags` doesn't hold exactly one write operation.
    pub fn emit_pipe_control_write(
        &mut self,
        flags: PipeControlFlags,
        bo: &Arc<Bo>,
        offset: u32,
        imm: u64,
    ) {
        assert_eq!(
            (flags & PipeControlFlags::WRITE_BITS).bits().count_ones(),
            1,
            "a pipe control write needs exactly one write operation",
        );

        self.emit_raw_pipe_control(flags, Some((bo, offset)), imm);
    }

    /// Waits for all prior work to complete, with the write caches in `flags` flushed to memory.
    pub fn emit_end_of_pipe_sync(&mut self, flags: PipeControlFlags) {
        let workaround_bo = self.workaround_bo().clone();

        self.emit_pipe_control_write(
            flags | PipeControlFlags::CS_STALL | PipeControlFlags::WRITE_IMMEDIATE,
            &workaround_bo,
            0,
            0,
        );
    }
}

/// Decodes the flags a `PIPE_CONTROL` was emitted with.
#[cfg(test)]
pub(crate) fn decode(words: &[u32]) -> PipeControlFlags {
    use crate::packet::extract;
    use PipeControlFlags as F;

    const FIELDS: [(u32, PipeControlFlags); 20] = [
        (0, F::DEPTH_CACHE_FLUSH),
        (1, F::STALL_AT_SCOREBOARD),
        (2, F::STATE_CACHE_INVALIDATE),
        (3, F::CONST_CACHE_INVALIDATE),
        (4, F::VF_CACHE_INVALIDATE),
        (5, F::DATA_CACHE_FLUSH),
        (7, F::FLUSH_ENABLE),
        (8, F::NOTIFY_ENABLE),
        (9, F::INDIRECT_STATE_POINTERS_DISABLE),
        (10, F::TEXTURE_CACHE_INVALIDATE),
        (11, F::INSTRUCTION_INVALIDATE),
        (12, F::RENDER_TARGET_FLUSH),
        (13, F::DEPTH_STALL),
        (16, F::MEDIA_STATE_CLEAR),
        (18, F::TLB_INVALIDATE),
        (19, F::GLOBAL_SNAPSHOT_COUNT_RESET),
        (20, F::CS_STALL),
        (21, F::STORE_DATA_INDEX),
        (23, F::LRI_POST_SYNC_OP),
        (26, F::FLUSH_LLC),
    ];

    assert_eq!(words.len(), 6);
    assert_eq!(words[0], 0x7a00_0004);

    let mut flags = F::empty();

    for (bit, flag) in FIELDS {
        if extract(words, 1, bit, bit) != 0 {
            flags |= flag;
        }
    }

    flags |= match extract(words, 1, 14, 15) as u32 {
        PipeControl::WRITE_IMMEDIATE_DATA => F::WRITE_IMMEDIATE,
        PipeControl::WRITE_PS_DEPTH_COUNT => F::WRITE_DEPTH_COUNT,
        PipeControl::WRITE_TIMESTAMP => F::WRITE_TIMESTAMP,
        _ => F::empty(),
    };

    flags
}

/// Splits the words of a batch holding nothing but `PIPE_CONTROL`s.
#[cfg(test)]
pub(crate) fn decode_all(words: &[u32]) -> Vec<PipeControlFlags> {
    words.chunks_exact(6).map(decode).collect()
}
