//! Sampler state.

use super::CompareFunc;
use crate::{
    border_color::BorderColor,
    packet::{
        merge, sfixed, state::SamplerState as SamplerStateRecord, ufixed, Address, Builder, Words,
    },
    Gen,
};

/// How texture coordinates outside of 0..1 are handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum WrapMode {
    #[default]
    Repeat,
    MirrorRepeat,
    ClampToEdge,
    ClampToBorder,
    MirrorClampToEdge,
    /// Legacy clamp, blending the edge texel with the border color half a texel out.
    Clamp,
}

impl WrapMode {
    /// Returns the `TCM_*` texture coordinate mode.
    #[inline]
    pub const fn to_hw(self) -> u32 {
        match self {
            WrapMode::Repeat => 0,
            WrapMode::MirrorRepeat => 1,
            WrapMode::ClampToEdge => 2,
            WrapMode::ClampToBorder => 4,
            WrapMode::MirrorClampToEdge => 5,
            WrapMode::Clamp => 6,
        }
    }

    /// Returns whether sampling with this mode can return the border color.
    #[inline]
    pub const fn needs_border_color(self) -> bool {
        matches!(self, WrapMode::ClampToBorder | WrapMode::Clamp)
    }
}

/// A minification or magnification filter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Filter {
    #[default]
    Nearest = 0,
    Linear = 1,
}

/// How mipmap levels are selected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MipFilter {
    #[default]
    None,
    Nearest,
    Linear,
}

impl MipFilter {
    #[inline]
    pub const fn to_hw(self) -> u32 {
        match self {
            MipFilter::None => 0,
            MipFilter::Nearest => 1,
            MipFilter::Linear => 3,
        }
    }
}

const MAPFILTER_ANISOTROPIC: u32 = 2;
const EWA_APPROXIMATION: u32 = 1;
const HW_MAX_LOD: f32 = 14.0;

/// Parameters to create a [`SamplerState`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerInfo {
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
    pub wrap_r: WrapMode,
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub mip_filter: MipFilter,
    pub normalized_coords: bool,
    pub seamless_cube_map: bool,
    /// Anisotropy below 2 disables anisotropic filtering.
    pub max_anisotropy: u32,
    /// The depth comparison of shadow samplers.
    pub compare_func: Option<CompareFunc>,
    pub min_lod: f32,
    pub max_lod: f32,
    pub lod_bias: f32,
    pub border_color: BorderColor,
}

impl Default for SamplerInfo {
    fn default() -> Self {
        SamplerInfo {
            wrap_s: WrapMode::Repeat,
            wrap_t: WrapMode::Repeat,
            wrap_r: WrapMode::Repeat,
            min_filter: Filter::Nearest,
            mag_filter: Filter::Nearest,
            mip_filter: MipFilter::None,
            normalized_coords: true,
            seamless_cube_map: false,
            max_anisotropy: 0,
            compare_func: None,
            min_lod: 0.0,
            max_lod: HW_MAX_LOD,
            lod_bias: 0.0,
            border_color: BorderColor::default(),
        }
    }
}

/// A sampler CSO.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplerState {
    /// `SAMPLER_STATE` without the border color pointer, which is merged in at bind time.
    pub sampler_state: Words,
    pub needs_border_color: bool,
    pub border_color: BorderColor,
}

impl SamplerState {
    pub fn new(hw: Gen, info: &SamplerInfo) -> Self {
        let needs_border_color = [info.wrap_s, info.wrap_t, info.wrap_r]
            .iter()
            .any(|wrap| wrap.needs_border_color());

        let mut samp = Builder::<SamplerStateRecord>::new(hw);
        samp.tcx_address_control_mode = info.wrap_s.to_hw();
        samp.tcy_address_control_mode = info.wrap_t.to_hw();
        samp.tcz_address_control_mode = info.wrap_r.to_hw();
        samp.cube_surface_control_mode = u32::from(info.seamless_cube_map);
        samp.non_normalized_coordinate_enable = !info.normalized_coords;
        samp.min_mode_filter = info.min_filter as u32;
        samp.mag_mode_filter = info.mag_filter as u32;
        samp.mip_mode_filter = info.mip_filter.to_hw();
        samp.maximum_anisotropy = SamplerStateRecord::RATIO_2_1;

        if info.max_anisotropy >= 2 {
            if info.min_filter == Filter::Linear {
                samp.min_mode_filter = MAPFILTER_ANISOTROPIC;
                samp.anisotropic_algorithm = EWA_APPROXIMATION;
            }

            if info.mag_filter == Filter::Linear {
                samp.mag_mode_filter = MAPFILTER_ANISOTROPIC;
            }

            samp.maximum_anisotropy =
                ((info.max_anisotropy - 2) / 2).min(SamplerStateRecord::RATIO_16_1);
        }

        if info.min_filter != Filter::Nearest {
            samp.u_address_min_filter_rounding_enable = true;
            samp.v_address_min_filter_rounding_enable = true;
            samp.r_address_min_filter_rounding_enable = true;
        }

        if info.mag_filter != Filter::Nearest {
            samp.u_address_mag_filter_rounding_enable = true;
            samp.v_address_mag_filter_rounding_enable = true;
            samp.r_address_mag_filter_rounding_enable = true;
        }

        if let Some(func) = info.compare_func {
            samp.shadow_function = shadow_func(func);
        }

        samp.lod_pre_clamp_mode = SamplerStateRecord::LODPRECLAMP_OGL;
        samp.min_lod = ufixed(info.min_lod.clamp(0.0, HW_MAX_LOD), 4, 8);
        samp.max_lod = ufixed(info.max_lod.clamp(0.0, HW_MAX_LOD), 4, 8);
        samp.texture_lod_bias = sfixed(info.lod_bias.clamp(-16.0, 15.0), 5, 8);

        SamplerState {
            sampler_state: samp.finish(),
            needs_border_color,
            border_color: info.border_color,
        }
    }

    /// Returns the `SAMPLER_STATE` pointing at a border color uploaded at `offset` from the
    /// dynamic state base address.
    pub fn with_border_color(&self, hw: Gen, offset: u32) -> Words {
        let mut samp = Builder::<SamplerStateRecord>::new(hw);
        samp.indirect_state_pointer = Address::from(offset);

        merge(&self.sampler_state, &samp.finish())
    }
}

/// The shadow comparison is the inverse of the comparison it implements: a texel passes when
/// the comparison with the reference fails.
const fn shadow_func(func: CompareFunc) -> u32 {
    const PREFILTEROP_ALWAYS: u32 = 0;
    const PREFILTEROP_NEVER: u32 = 1;
    const PREFILTEROP_LESS: u32 = 2;
    const PREFILTEROP_EQUAL: u32 = 3;
    const PREFILTEROP_LEQUAL: u32 = 4;
    const PREFILTEROP_GREATER: u32 = 5;
    const PREFILTEROP_NOTEQUAL: u32 = 6;
    const PREFILTEROP_GEQUAL: u32 = 7;

    match func {
        CompareFunc::Never => PREFILTEROP_ALWAYS,
        CompareFunc::Less => PREFILTEROP_LEQUAL,
        CompareFunc::LessEqual => PREFILTEROP_LESS,
        CompareFunc::Greater => PREFILTEROP_GEQUAL,
        CompareFunc::GreaterEqual => PREFILTEROP_GREATER,
        CompareFunc::NotEqual => PREFILTEROP_EQUAL,
        CompareFunc::Equal => PREFILTEROP_NOTEQUAL,
        CompareFunc::Always => PREFILTEROP_NEVER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::extract;

    #[test]
    fn border_color_is_needed_by_border_modes() {
        let plain = SamplerState::new(Gen::Gen9, &SamplerInfo::default());
        assert!(!plain.needs_border_color);

        for wrap in [WrapMode::ClampToBorder, WrapMode::Clamp] {
            let samp = SamplerState::new(
                Gen::Gen9,
                &SamplerInfo {
                    wrap_t: wrap,
                    ..Default::default()
                },
            );
            assert!(samp.needs_border_color);
            assert_eq!(extract(&samp.sampler_state, 3, 3, 5), u64::from(wrap.to_hw()));
        }
    }

    #[test]
    fn anisotropy() {
        let samp = SamplerState::new(
            Gen::Gen9,
            &SamplerInfo {
                min_filter: Filter::Linear,
                mag_filter: Filter::Linear,
                max_anisotropy: 16,
                ..Default::default()
            },
        );
        let words = &samp.sampler_state;

        assert_eq!(extract(words, 0, 14, 16), u64::from(MAPFILTER_ANISOTROPIC));
        assert_eq!(extract(words, 0, 17, 19), u64::from(MAPFILTER_ANISOTROPIC));
        assert_eq!(extract(words, 0, 0, 0), 1);
        assert_eq!(extract(words, 3, 19, 21), 7);
        assert_eq!(extract(words, 3, 13, 18), 0b11_1111);
    }

    #[test]
    fn lods_are_clamped() {
        let samp = SamplerState::new(
            Gen::Gen9,
            &SamplerInfo {
                min_lod: -1.0,
                max_lod: 100.0,
                lod_bias: -20.0,
                ..Default::default()
            },
        );
        let words = &samp.sampler_state;

        assert_eq!(extract(words, 1, 20, 31), 0);
        assert_eq!(extract(words, 1, 8, 19), 14 << 8);
        assert_eq!(extract(words, 0, 1, 13), 0x1000);
    }

    #[test]
    fn shadow_compare_is_inverted() {
        let samp = SamplerState::new(
            Gen::Gen9,
            &SamplerInfo {
                compare_func: Some(CompareFunc::Less),
                ..Default::default()
            },
        );

        assert_eq!(extract(&samp.sampler_state, 1, 1, 3), 4);
    }

    #[test]
    fn border_color_pointer_is_merged() {
        let samp = SamplerState::new(
            Gen::Gen9,
            &SamplerInfo {
                wrap_s: WrapMode::ClampToBorder,
                ..Default::default()
            },
        );

        let words = samp.with_border_color(Gen::Gen9, 0x40);
        assert_eq!(words[2], 0x40);
        assert_eq!(words[3], samp.sampler_state[3]);
        assert_eq!(samp.sampler_state[2], 0);
    }
}
