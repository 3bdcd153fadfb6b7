//! Blend state.

use crate::{
    packet::{
        cmd::PsBlend,
        state::{BlendState as BlendStateRecord, BlendStateEntry},
        Builder, Words,
    },
    Gen,
};
use bitflags::bitflags;

/// The number of color attachments a blend state describes.
pub const MAX_COLOR_BUFFERS: usize = 8;

/// A blend factor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
    SrcAlphaSaturate,
    ConstantColor,
    OneMinusConstantColor,
    ConstantAlpha,
    OneMinusConstantAlpha,
    Src1Color,
    OneMinusSrc1Color,
    Src1Alpha,
    OneMinusSrc1Alpha,
}

impl BlendFactor {
    pub const fn to_hw(self) -> u32 {
        match self {
            BlendFactor::One => 0x01,
            BlendFactor::SrcColor => 0x02,
            BlendFactor::SrcAlpha => 0x03,
            BlendFactor::DstAlpha => 0x04,
            BlendFactor::DstColor => 0x05,
            BlendFactor::SrcAlphaSaturate => 0x06,
            BlendFactor::ConstantColor => 0x07,
            BlendFactor::ConstantAlpha => 0x08,
            BlendFactor::Src1Color => 0x09,
            BlendFactor::Src1Alpha => 0x0a,
            BlendFactor::Zero => 0x11,
            BlendFactor::OneMinusSrcColor => 0x12,
            BlendFactor::OneMinusSrcAlpha => 0x13,
            BlendFactor::OneMinusDstAlpha => 0x14,
            BlendFactor::OneMinusDstColor => 0x15,
            BlendFactor::OneMinusConstantColor => 0x17,
            BlendFactor::OneMinusConstantAlpha => 0x18,
            BlendFactor::OneMinusSrc1Color => 0x19,
            BlendFactor::OneMinusSrc1Alpha => 0x1a,
        }
    }
}

/// A blend equation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BlendOp {
    #[default]
    Add = 0,
    Subtract = 1,
    ReverseSubtract = 2,
    Min = 3,
    Max = 4,
}

/// A logic operation, applied instead of blending.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LogicOp {
    Clear = 0,
    Nor = 1,
    AndInverted = 2,
    CopyInverted = 3,
    AndReverse = 4,
    Invert = 5,
    Xor = 6,
    Nand = 7,
    And = 8,
    Equivalent = 9,
    NoOp = 10,
    OrInverted = 11,
    Copy = 12,
    OrReverse = 13,
    Or = 14,
    Set = 15,
}

bitflags! {
    /// Which channels of a color attachment are written.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ColorComponents: u8 {
        const R = 1 << 0;
        const G = 1 << 1;
        const B = 1 << 2;
        const A = 1 << 3;
    }
}

impl Default for ColorComponents {
    #[inline]
    fn default() -> Self {
        ColorComponents::all()
    }
}

/// How one color attachment is blended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttachmentBlend {
    pub blend_enable: bool,
    pub src_color_blend_factor: BlendFactor,
    pub dst_color_blend_factor: BlendFactor,
    pub color_blend_op: BlendOp,
    pub src_alpha_blend_factor: BlendFactor,
    pub dst_alpha_blend_factor: BlendFactor,
    pub alpha_blend_op: BlendOp,
    pub color_write_mask: ColorComponents,
}

impl Default for AttachmentBlend {
    /// Blending disabled, writing every channel.
    #[inline]
    fn default() -> Self {
        AttachmentBlend {
            blend_enable: false,
            src_color_blend_factor: BlendFactor::One,
            dst_color_blend_factor: BlendFactor::Zero,
            color_blend_op: BlendOp::Add,
            src_alpha_blend_factor: BlendFactor::One,
            dst_alpha_blend_factor: BlendFactor::Zero,
            alpha_blend_op: BlendOp::Add,
            color_write_mask: ColorComponents::all(),
        }
    }
}

impl AttachmentBlend {
    /// Returns whether alpha is blended differently from color.
    #[inline]
    pub fn has_separate_alpha(&self) -> bool {
        self.alpha_blend_op != self.color_blend_op
            || self.src_alpha_blend_factor != self.src_color_blend_factor
            || self.dst_alpha_blend_factor != self.dst_color_blend_factor
    }
}

/// Parameters to create a [`BlendState`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct BlendStateInfo {
    /// If `false`, `attachments[0]` applies to every color attachment.
    pub independent_blend_enable: bool,
    pub attachments: [AttachmentBlend; MAX_COLOR_BUFFERS],
    pub logic_op: Option<LogicOp>,
    pub alpha_to_coverage_enable: bool,
    pub alpha_to_one_enable: bool,
    pub dither_enable: bool,
}

/// A blend CSO.
#[derive(Clone, Debug, PartialEq)]
pub struct BlendState {
    /// `BLEND_STATE` followed by one `BLEND_STATE_ENTRY` per color attachment. The alpha test
    /// fields are merged in at draw time, from the depth-stencil-alpha state.
    pub blend_state: Words,
    /// `3DSTATE_PS_BLEND`, without the fields that depend on the framebuffer and the alpha test.
    pub ps_blend: Words,
    pub alpha_to_coverage_enable: bool,
}

impl BlendState {
    pub fn new(hw: Gen, info: &BlendStateInfo) -> Self {
        let attachment = |i: usize| {
            if info.independent_blend_enable {
                &info.attachments[i]
            } else {
                &info.attachments[0]
            }
        };

        let independent_alpha_blend =
            (0..MAX_COLOR_BUFFERS).any(|i| attachment(i).has_separate_alpha());

        let mut bs = Builder::<BlendStateRecord>::new(hw);
        bs.alpha_to_coverage_enable = info.alpha_to_coverage_enable;
        bs.independent_alpha_blend_enable = independent_alpha_blend;
        bs.alpha_to_one_enable = info.alpha_to_one_enable;
        bs.alpha_to_coverage_dither_enable = info.alpha_to_coverage_enable && info.dither_enable;
        bs.color_dither_enable = info.dither_enable;
        let mut blend_state = bs.finish();

        for i in 0..MAX_COLOR_BUFFERS {
            let rt = attachment(i);
            let mut be = Builder::<BlendStateEntry>::new(hw);

            be.logic_op_enable = info.logic_op.is_some();
            be.logic_op_function = info.logic_op.map_or(0, |op| op as u32);
            be.color_clamp_range = BlendStateEntry::COLORCLAMP_RTFORMAT;
            be.pre_blend_color_clamp_enable = true;
            be.post_blend_color_clamp_enable = true;
            be.color_buffer_blend_enable = rt.blend_enable;
            be.color_blend_function = rt.color_blend_op as u32;
            be.source_blend_factor = rt.src_color_blend_factor.to_hw();
            be.destination_blend_factor = rt.dst_color_blend_factor.to_hw();
            be.alpha_blend_function = rt.alpha_blend_op as u32;
            be.source_alpha_blend_factor = rt.src_alpha_blend_factor.to_hw();
            be.destination_alpha_blend_factor = rt.dst_alpha_blend_factor.to_hw();
            be.write_disable_red = !rt.color_write_mask.contains(ColorComponents::R);
            be.write_disable_green = !rt.color_write_mask.contains(ColorComponents::G);
            be.write_disable_blue = !rt.color_write_mask.contains(ColorComponents::B);
            be.write_disable_alpha = !rt.color_write_mask.contains(ColorComponents::A);

            blend_state.extend_from_slice(&be.finish());
        }

        let rt0 = &info.attachments[0];
        let mut pb = Builder::<PsBlend>::new(hw);
        pb.alpha_to_coverage_enable = info.alpha_to_coverage_enable;
        pb.independent_alpha_blend_enable = independent_alpha_blend;
        pb.color_buffer_blend_enable = rt0.blend_enable;
        pb.source_blend_factor = rt0.src_color_blend_factor.to_hw();
        pb.source_alpha_blend_factor = rt0.src_alpha_blend_factor.to_hw();
        pb.destination_blend_factor = rt0.dst_color_blend_factor.to_hw();
        pb.destination_alpha_blend_factor = rt0.dst_alpha_blend_factor.to_hw();

        BlendState {
            blend_state,
            ps_blend: pb.finish(),
            alpha_to_coverage_enable: info.alpha_to_coverage_enable,
        }
    }

    /// Returns the `BLEND_STATE` header dword.
    #[inline]
    pub fn header(&self) -> u32 {
        self.blend_state[0]
    }

    /// Returns the `BLEND_STATE_ENTRY` of color attachment `index`.
    #[inline]
    pub fn entry(&self, index: usize) -> &[u32] {
        &self.blend_state[1 + 2 * index..3 + 2 * index]
    }
}
