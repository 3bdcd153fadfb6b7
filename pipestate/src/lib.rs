//! State diffing and command encoding for a GPU graphics driver.
//!
//! The crate turns a stream of high-level pipeline-state mutations into a minimal, correctly
//! ordered stream of fixed-layout command words for the command streamer of Gen8 to Gen10
//! hardware.
//!
//! # Overview
//!
//! A [`Context`] owns everything needed to encode draws:
//!
//! - The [dirty tracker] records which logical state groups changed since the last draw, so that
//!   unchanged state isn't encoded again.
//! - [Constant state objects] are created once from an API-level description, at which point
//!   they are encoded into ready-to-copy packet fragments. Binding one swaps the active handle and
//!   raises dirty bits based on what actually differs from the previously bound object.
//! - Three [bump regions] hand out GPU-visible memory: the [binder] for binding tables, the
//!   [border color pool] and the [program cache]. When a region runs out, any batch referring to
//!   it is submitted and the region is replaced wholesale.
//! - The [hazard sequencer] rewrites a requested cache flush or invalidation into a sequence of
//!   `PIPE_CONTROL` commands that respects the programming restrictions of each generation.
//! - [`Context::draw_vbo`] walks the dirty mask in a fixed order and appends the resulting
//!   commands to the current [`Batch`].
//!
//! Memory allocation and batch submission are external collaborators, reached through the
//! [`BufferProvider`] and [`BatchSink`] traits.
//!
//! [dirty tracker]: dirty
//! [Constant state objects]: cso
//! [bump regions]: alloc
//! [binder]: binder
//! [border color pool]: border_color
//! [program cache]: program_cache
//! [hazard sequencer]: pipe_control
//! [`Batch`]: batch::Batch
//! [`BufferProvider`]: bo::BufferProvider
//! [`BatchSink`]: batch::BatchSink

pub use crate::context::{Context, ContextCreateInfo, DrawError};
use std::fmt;

pub mod alloc;
pub mod batch;
pub mod binder;
pub mod bo;
pub mod border_color;
pub mod context;
pub mod cso;
pub mod dirty;
pub mod packet;
pub mod pipe_control;
pub mod program_cache;
#[cfg(test)]
mod proptests;

/// A hardware generation.
///
/// Packet layouts and hazard rules differ between generations, so every encoder takes one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Gen {
    /// Broadwell.
    Gen8,
    /// Skylake, Kaby Lake, Coffee Lake.
    #[default]
    Gen9,
    /// Cannon Lake.
    Gen10,
}

impl Gen {
    /// Returns the generation number.
    #[inline]
    pub const fn ver(self) -> u32 {
        match self {
            Gen::Gen8 => 8,
            Gen::Gen9 => 9,
            Gen::Gen10 => 10,
        }
    }

    /// Returns the maximum number of hardware threads a stage can dispatch.
    pub const fn max_threads(self, stage: ShaderStage) -> u32 {
        match (self, stage) {
            (Gen::Gen8, ShaderStage::Fragment) => 384,
            (_, ShaderStage::Fragment) => 448,
            (_, ShaderStage::Compute) => 56,
            (Gen::Gen8, _) => 504,
            (_, _) => 336,
        }
    }
}

impl fmt::Display for Gen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gen{}", self.ver())
    }
}

/// A shader stage.
///
/// The render stages are ordered the way the hardware lays out its per-stage commands, which is
/// also the order in which per-stage state is encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ShaderStage {
    Vertex = 0,
    TessControl = 1,
    TessEval = 2,
    Geometry = 3,
    Fragment = 4,
    Compute = 5,
}

/// The number of shader stages.
pub const STAGE_COUNT: usize = 6;

impl ShaderStage {
    /// All stages, in encoding order.
    pub const ALL: [ShaderStage; STAGE_COUNT] = [
        ShaderStage::Vertex,
        ShaderStage::TessControl,
        ShaderStage::TessEval,
        ShaderStage::Geometry,
        ShaderStage::Fragment,
        ShaderStage::Compute,
    ];

    /// The stages of the render pipeline, in encoding order.
    pub const RENDER: [ShaderStage; 5] = [
        ShaderStage::Vertex,
        ShaderStage::TessControl,
        ShaderStage::TessEval,
        ShaderStage::Geometry,
        ShaderStage::Fragment,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub const fn is_render(self) -> bool {
        !matches!(self, ShaderStage::Compute)
    }

    /// Returns the short name the hardware documentation uses for this stage.
    pub const fn abbrev(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "VS",
            ShaderStage::TessControl => "TCS",
            ShaderStage::TessEval => "TES",
            ShaderStage::Geometry => "GS",
            ShaderStage::Fragment => "FS",
            ShaderStage::Compute => "CS",
        }
    }
}

/// The pipeline the command streamer is currently set up for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Pipeline {
    #[default]
    Render,
    Compute,
}

/// Rounds `value` up to a multiple of `alignment`, which must be a power of two.
#[inline]
pub(crate) const fn align_up(value: u32, alignment: u32) -> u32 {
    debug_assert!(alignment.is_power_of_two());

    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order() {
        for (i, stage) in ShaderStage::ALL.into_iter().enumerate() {
            assert_eq!(stage.index(), i);
        }
        assert!(ShaderStage::RENDER.iter().all(|s| s.is_render()));
        assert!(!ShaderStage::Compute.is_render());
    }

    #[test]
    fn align() {
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 32), 96);
    }

    #[test]
    fn gen_ordering() {
        assert!(Gen::Gen8 < Gen::Gen9);
        assert!(Gen::Gen9 < Gen::Gen10);
        assert_eq!(Gen::Gen10.to_string(), "Gen10");
    }
}
