//! Tracking of which logical state groups changed since they were last encoded.
//!
//! Every state mutation marks the groups whose encoded packets could change as a result,
//! including groups that merely embed a field derived from the mutated state. The draw and
//! dispatch encoders read the mask, encode only what is marked, and clear what they encoded.

use crate::ShaderStage;
use bitflags::bitflags;

bitflags! {
    /// A set of logical state groups.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DirtyFlags: u64 {
        const COLOR_CALC_STATE = 1 << 0;
        const POLYGON_STIPPLE = 1 << 1;
        const SCISSOR_RECT = 1 << 2;
        const WM_DEPTH_STENCIL = 1 << 3;
        const CC_VIEWPORT = 1 << 4;
        const SF_CL_VIEWPORT = 1 << 5;
        const PS_BLEND = 1 << 6;
        const BLEND_STATE = 1 << 7;
        const RASTER = 1 << 8;
        const CLIP = 1 << 9;
        const SBE = 1 << 10;
        const LINE_STIPPLE = 1 << 11;
        const VERTEX_ELEMENTS = 1 << 12;
        const MULTISAMPLE = 1 << 13;
        const VERTEX_BUFFERS = 1 << 14;
        const SAMPLE_MASK = 1 << 15;
        const SAMPLER_STATES_VS = 1 << 16;
        const SAMPLER_STATES_TCS = 1 << 17;
        const SAMPLER_STATES_TES = 1 << 18;
        const SAMPLER_STATES_GS = 1 << 19;
        const SAMPLER_STATES_PS = 1 << 20;
        const SAMPLER_STATES_CS = 1 << 21;
        const UNCOMPILED_VS = 1 << 22;
        const UNCOMPILED_TCS = 1 << 23;
        const UNCOMPILED_TES = 1 << 24;
        const UNCOMPILED_GS = 1 << 25;
        const UNCOMPILED_FS = 1 << 26;
        const UNCOMPILED_CS = 1 << 27;
        const VS = 1 << 28;
        const TCS = 1 << 29;
        const TES = 1 << 30;
        const GS = 1 << 31;
        const FS = 1 << 32;
        const CS = 1 << 33;
        const URB = 1 << 34;
        const CONSTANTS_VS = 1 << 35;
        const CONSTANTS_TCS = 1 << 36;
        const CONSTANTS_TES = 1 << 37;
        const CONSTANTS_GS = 1 << 38;
        const CONSTANTS_FS = 1 << 39;
        const DEPTH_BUFFER = 1 << 40;
        const WM = 1 << 41;
        const BINDINGS_VS = 1 << 42;
        const BINDINGS_TCS = 1 << 43;
        const BINDINGS_TES = 1 << 44;
        const BINDINGS_GS = 1 << 45;
        const BINDINGS_FS = 1 << 46;
        const BINDINGS_CS = 1 << 47;
        const SO_BUFFERS = 1 << 48;
        const SO_DECL_LIST = 1 << 49;
        const STREAMOUT = 1 << 50;
        const VF_TOPOLOGY = 1 << 51;
        const INDEX_BUFFER = 1 << 52;

        const ALL_BINDINGS = Self::BINDINGS_VS.bits()
            | Self::BINDINGS_TCS.bits()
            | Self::BINDINGS_TES.bits()
            | Self::BINDINGS_GS.bits()
            | Self::BINDINGS_FS.bits()
            | Self::BINDINGS_CS.bits();

        /// Groups that only the compute pipeline consumes.
        const COMPUTE = Self::CS.bits()
            | Self::UNCOMPILED_CS.bits()
            | Self::SAMPLER_STATES_CS.bits()
            | Self::BINDINGS_CS.bits();

        /// Groups whose packets, once emitted, stay live in hardware and must not be re-emitted
        /// merely because a draw happened. Re-emitting stream-output buffers resets their write
        /// offsets.
        const PERSISTENT = Self::SO_BUFFERS.bits();
    }
}

impl DirtyFlags {
    /// Groups a draw consumes and clears.
    pub const RENDER: DirtyFlags = DirtyFlags::all()
        .difference(DirtyFlags::COMPUTE)
        .difference(DirtyFlags::PERSISTENT);

    #[inline]
    const fn per_stage(first: DirtyFlags, stage: ShaderStage) -> DirtyFlags {
        DirtyFlags::from_bits_retain(first.bits() << stage.index())
    }

    /// Returns the sampler-state group of `stage`.
    #[inline]
    pub const fn sampler_states(stage: ShaderStage) -> DirtyFlags {
        DirtyFlags::per_stage(DirtyFlags::SAMPLER_STATES_VS, stage)
    }

    /// Returns the group tracking the API-level (not yet compiled) shader of `stage`.
    #[inline]
    pub const fn uncompiled(stage: ShaderStage) -> DirtyFlags {
        DirtyFlags::per_stage(DirtyFlags::UNCOMPILED_VS, stage)
    }

    /// Returns the compiled-program group of `stage`.
    #[inline]
    pub const fn shader(stage: ShaderStage) -> DirtyFlags {
        DirtyFlags::per_stage(DirtyFlags::VS, stage)
    }

    /// Returns the binding-table group of `stage`.
    #[inline]
    pub const fn bindings(stage: ShaderStage) -> DirtyFlags {
        DirtyFlags::per_stage(DirtyFlags::BINDINGS_VS, stage)
    }

    /// Returns the push-constant group of `stage`.
    ///
    /// # Panics
    ///
    /// - Panics if `stage` is [`ShaderStage::Compute`], which has no push-constant command.
    #[inline]
    pub const fn constants(stage: ShaderStage) -> DirtyFlags {
        assert!(stage.is_render());

        DirtyFlags::per_stage(DirtyFlags::CONSTANTS_VS, stage)
    }
}

/// The per-context dirty mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirtyTracker {
    mask: DirtyFlags,
}

impl Default for DirtyTracker {
    /// A new context has never encoded anything, so everything starts out dirty.
    #[inline]
    fn default() -> Self {
        DirtyTracker {
            mask: DirtyFlags::all(),
        }
    }
}

impl DirtyTracker {
    /// Creates a tracker with nothing marked.
    #[inline]
    pub const fn clean() -> Self {
        DirtyTracker {
            mask: DirtyFlags::empty(),
        }
    }

    #[inline]
    pub fn mark(&mut self, flags: DirtyFlags) {
        self.mask |= flags;
    }

    /// Returns `true` if any of `flags` is marked.
    #[inline]
    pub fn is_dirty(&self, flags: DirtyFlags) -> bool {
        self.mask.intersects(flags)
    }

    #[inline]
    pub fn clear(&mut self, flags: DirtyFlags) {
        self.mask &= !flags;
    }

    #[inline]
    pub fn bits(&self) -> DirtyFlags {
        self.mask
    }

    /// Returns the marked groups among `flags` and clears them.
    #[inline]
    pub fn take(&mut self, flags: DirtyFlags) -> DirtyFlags {
        let taken = self.mask & flags;
        self.mask &= !flags;

        taken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_stage_bits() {
        assert_eq!(
            DirtyFlags::sampler_states(ShaderStage::Fragment),
            DirtyFlags::SAMPLER_STATES_PS,
        );
        assert_eq!(DirtyFlags::shader(ShaderStage::Compute), DirtyFlags::CS);
        assert_eq!(
            DirtyFlags::bindings(ShaderStage::TessEval),
            DirtyFlags::BINDINGS_TES,
        );
        assert_eq!(
            DirtyFlags::constants(ShaderStage::Geometry),
            DirtyFlags::CONSTANTS_GS,
        );
        assert_eq!(
            DirtyFlags::uncompiled(ShaderStage::TessControl),
            DirtyFlags::UNCOMPILED_TCS,
        );
    }

    #[test]
    fn render_set_excludes_persistent_and_compute() {
        assert!(!DirtyFlags::RENDER.intersects(DirtyFlags::SO_BUFFERS));
        assert!(!DirtyFlags::RENDER.intersects(DirtyFlags::COMPUTE));
        assert!(DirtyFlags::RENDER.contains(DirtyFlags::BINDINGS_FS | DirtyFlags::STREAMOUT));
        assert_eq!(
            DirtyFlags::RENDER | DirtyFlags::COMPUTE | DirtyFlags::PERSISTENT,
            DirtyFlags::all(),
        );
    }

    #[test]
    fn mark_and_clear() {
        let mut dirty = DirtyTracker::clean();
        assert!(!dirty.is_dirty(DirtyFlags::all()));

        dirty.mark(DirtyFlags::RASTER | DirtyFlags::CLIP);
        assert!(dirty.is_dirty(DirtyFlags::CLIP));
        assert!(!dirty.is_dirty(DirtyFlags::SBE));

        dirty.clear(DirtyFlags::RASTER);
        assert_eq!(dirty.bits(), DirtyFlags::CLIP);

        dirty.mark(DirtyFlags::CS);
        assert_eq!(dirty.take(DirtyFlags::COMPUTE), DirtyFlags::CS);
        assert_eq!(dirty.bits(), DirtyFlags::CLIP);
    }

    #[test]
    fn starts_fully_dirty() {
        assert_eq!(DirtyTracker::default().bits(), DirtyFlags::all());
    }
}
