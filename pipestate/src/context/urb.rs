//! Partitioning of the URB between the vertex-pipeline stages.

use crate::{
    packet::{cmd::Urb, Builder, Words},
    Gen, ShaderStage,
};

/// The URB size of the smallest configuration of each supported generation, in KiB.
const URB_SIZE_KB: u32 = 384;

/// The URB is partitioned in chunks of this many KiB.
const CHUNK_KB: u32 = 8;

/// Chunks at the start of the URB set aside for push constants.
const PUSH_CONSTANT_CHUNKS: u32 = 4;

/// The vertex-pipeline stages, in `3DSTATE_URB_*` order.
pub(crate) const URB_STAGES: [ShaderStage; 4] = [
    ShaderStage::Vertex,
    ShaderStage::TessControl,
    ShaderStage::TessEval,
    ShaderStage::Geometry,
];

/// How the URB is split.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct UrbConfig {
    pub(crate) entries: [u32; 4],
    /// Entry sizes in 64-byte units.
    pub(crate) entry_size: [u32; 4],
    /// Starting addresses in chunks.
    pub(crate) start: [u32; 4],
}

const fn max_entries(hw: Gen) -> [u32; 4] {
    match hw {
        Gen::Gen8 => [2560, 504, 1536, 960],
        Gen::Gen9 | Gen::Gen10 => [1856, 672, 1120, 640],
    }
}

/// Splits the URB between the stages whose entry size is given. Stages with no program get no
/// entries.
///
/// # Algorithm
///
/// The chunks left after the push constants are shared between the active stages in proportion
/// to their entry sizes, so that each gets roughly the same number of entries. The vertex stage
/// is always active. Entry counts are capped to what each stage can address and rounded down to
/// a multiple of 8, as the vertex stage requires.
pub(crate) fn urb_config(hw: Gen, entry_sizes: [Option<u32>; 4]) -> UrbConfig {
    let available = URB_SIZE_KB / CHUNK_KB - PUSH_CONSTANT_CHUNKS;
    let max = max_entries(hw);
    let entry_size = entry_sizes.map(|size| size.unwrap_or(1).max(1));
    let total_weight: u32 = entry_sizes.iter().flatten().map(|&size| size.max(1)).sum();

    let mut config = UrbConfig {
        entries: [0; 4],
        entry_size,
        start: [0; 4],
    };
    let mut next = PUSH_CONSTANT_CHUNKS;

    for i in 0..4 {
        config.start[i] = next;

        if entry_sizes[i].is_none() {
            continue;
        }

        let chunks = available * entry_size[i] / total_weight.max(1);
        let fit = chunks * CHUNK_KB * 1024 / (entry_size[i] * 64);

        config.entries[i] = fit.min(max[i]) & !7;
        next += chunks;
    }

    config
}

/// Encodes the four `3DSTATE_URB_*` commands of `config`.
pub(crate) fn emit_urb_config(hw: Gen, config: &UrbConfig) -> Words {
    let mut words = Words::new();

    for (i, stage) in URB_STAGES.into_iter().enumerate() {
        let mut urb = Builder::with(hw, Urb::for_stage(stage));
        urb.number_of_urb_entries = config.entries[i];
        urb.urb_entry_allocation_size = config.entry_size[i] - 1;
        urb.urb_starting_address = config.start[i];
        words.extend(urb.finish());
    }

    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::extract;

    #[test]
    fn vertex_only() {
        let config = urb_config(Gen::Gen9, [Some(2), None, None, None]);

        // 44 chunks of 8 KiB hold 2816 entries of 128 bytes, more than the stage can address.
        assert_eq!(config.entries, [1856, 0, 0, 0]);
        assert_eq!(config.entry_size, [2, 1, 1, 1]);
        assert_eq!(config.start, [4, 48, 48, 48]);

        let config = urb_config(Gen::Gen8, [Some(2), None, None, None]);
        assert_eq!(config.entries[0], 2560);
    }

    #[test]
    fn split_follows_entry_sizes() {
        let config = urb_config(Gen::Gen9, [Some(4), None, None, Some(7)]);

        // 44 * 4 / 11 = 16 chunks for the vertex stage, 28 for the geometry stage.
        assert_eq!(config.start, [4, 20, 20, 20]);
        assert_eq!(config.entries[0], 512);
        assert_eq!(config.entries[3], 28 * 8192 / (7 * 64) & !7);
        assert!(config.entries.iter().all(|entries| entries % 8 == 0));
    }

    #[test]
    fn packets_are_in_stage_order() {
        let config = urb_config(Gen::Gen9, [Some(3), Some(2), Some(2), None]);
        let words = emit_urb_config(Gen::Gen9, &config);

        assert_eq!(words.len(), 8);

        for i in 0..4 {
            let cmd = &words[2 * i..2 * i + 2];
            assert_eq!(extract(cmd, 0, 16, 23), 0x30 + i as u64);
            assert_eq!(extract(cmd, 1, 0, 15), u64::from(config.entries[i]));
            assert_eq!(extract(cmd, 1, 16, 24), u64::from(config.entry_size[i] - 1));
            assert_eq!(extract(cmd, 1, 25, 31), u64::from(config.start[i]));
        }
    }
}
