//! Rasterizer state.
//!
//! A rasterizer CSO contributes to five packets. `3DSTATE_CLIP` and `3DSTATE_WM` also depend on
//! the fragment shader and the framebuffer, so only their rasterizer-owned fields are packed
//! here; the rest is merged in at draw time.

use crate::{
    packet::{
        cmd::{Clip, LineStipple, Raster, Sbe, Sf, Wm},
        ufixed, Builder, Words,
    },
    Gen,
};

/// Which faces are culled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
    FrontAndBack,
}

impl CullMode {
    #[inline]
    pub const fn to_hw(self) -> u32 {
        match self {
            CullMode::FrontAndBack => 0,
            CullMode::None => 1,
            CullMode::Front => 2,
            CullMode::Back => 3,
        }
    }
}

/// How polygons are rasterized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PolygonMode {
    #[default]
    Fill = 0,
    Line = 1,
    Point = 2,
}

/// Where point sprite texture coordinates originate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SpriteCoordOrigin {
    #[default]
    UpperLeft,
    LowerLeft,
}

impl SpriteCoordOrigin {
    #[inline]
    pub const fn to_hw(self) -> u32 {
        match self {
            SpriteCoordOrigin::UpperLeft => Sbe::UPPERLEFT,
            SpriteCoordOrigin::LowerLeft => Sbe::LOWERLEFT,
        }
    }
}

/// Parameters to create a [`RasterizerState`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RasterizerInfo {
    pub flatshade: bool,
    /// Whether the first vertex of a primitive, rather than the last, provides flat-shaded
    /// attributes.
    pub flatshade_first: bool,
    pub light_twoside: bool,
    pub clamp_fragment_color: bool,
    pub front_ccw: bool,
    pub cull_mode: CullMode,
    pub fill_front: PolygonMode,
    pub fill_back: PolygonMode,
    pub offset_point: bool,
    pub offset_line: bool,
    pub offset_tri: bool,
    pub offset_units: f32,
    pub offset_scale: f32,
    pub offset_clamp: f32,
    pub scissor: bool,
    pub multisample: bool,
    pub half_pixel_center: bool,
    pub rasterizer_discard: bool,
    pub depth_clip_near: bool,
    pub depth_clip_far: bool,
    /// Whether clip space z ranges over 0..1 rather than -1..1.
    pub clip_halfz: bool,
    /// Whether points and triangles are clipped against the viewport in x and y.
    pub point_tri_clip: bool,
    /// The user clip planes in use, one bit per plane.
    pub clip_plane_enable: u8,
    pub line_width: f32,
    pub line_smooth: bool,
    pub line_last_pixel: bool,
    pub line_stipple_enable: bool,
    pub line_stipple_pattern: u16,
    /// The stipple repeat factor minus one.
    pub line_stipple_factor: u8,
    pub poly_stipple_enable: bool,
    pub point_size: f32,
    pub point_size_per_vertex: bool,
    pub point_smooth: bool,
    pub sprite_coord_enable: u16,
    pub sprite_coord_mode: SpriteCoordOrigin,
}

impl Default for RasterizerInfo {
    fn default() -> Self {
        RasterizerInfo {
            flatshade: false,
            flatshade_first: false,
            light_twoside: false,
            clamp_fragment_color: false,
            front_ccw: false,
            cull_mode: CullMode::None,
            fill_front: PolygonMode::Fill,
            fill_back: PolygonMode::Fill,
            offset_point: false,
            offset_line: false,
            offset_tri: false,
            offset_units: 0.0,
            offset_scale: 0.0,
            offset_clamp: 0.0,
            scissor: false,
            multisample: false,
            half_pixel_center: true,
            rasterizer_discard: false,
            depth_clip_near: true,
            depth_clip_far: true,
            clip_halfz: false,
            point_tri_clip: false,
            clip_plane_enable: 0,
            line_width: 1.0,
            line_smooth: false,
            line_last_pixel: false,
            line_stipple_enable: false,
            line_stipple_pattern: 0,
            line_stipple_factor: 0,
            poly_stipple_enable: false,
            point_size: 1.0,
            point_size_per_vertex: false,
            point_smooth: false,
            sprite_coord_enable: 0,
            sprite_coord_mode: SpriteCoordOrigin::UpperLeft,
        }
    }
}

/// A rasterizer CSO.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterizerState {
    pub sf: Words,
    /// `3DSTATE_CLIP` without the fields that depend on the fragment shader and framebuffer.
    pub clip: Words,
    pub raster: Words,
    /// `3DSTATE_WM` without the fields that depend on the fragment shader.
    pub wm: Words,
    pub line_stipple: Words,

    pub flatshade: bool,
    pub clamp_fragment_color: bool,
    pub light_twoside: bool,
    pub rasterizer_discard: bool,
    pub half_pixel_center: bool,
    pub line_stipple_enable: bool,
    pub poly_stipple_enable: bool,
    pub sprite_coord_mode: SpriteCoordOrigin,
    pub sprite_coord_enable: u16,
    pub scissor: bool,
}

const AA_WIDTH_0_5_PIXELS: u32 = 0;
const AA_WIDTH_1_0_PIXELS: u32 = 1;
const AA_LINE_DISTANCE_TRUE: u32 = 1;

impl RasterizerState {
    pub fn new(hw: Gen, info: &RasterizerInfo) -> Self {
        // Provoking vertex selects for triangle strips, triangle fans and line strips.
        let (tri_strip_pv, tri_fan_pv, line_strip_pv) = if info.flatshade_first {
            (2, 2, 1)
        } else {
            (0, 1, 0)
        };

        let mut sf = Builder::<Sf>::new(hw);
        sf.statistics_enable = true;
        sf.viewport_transform_enable = true;
        sf.aa_line_distance_mode = AA_LINE_DISTANCE_TRUE;
        sf.line_end_cap_antialiasing_region_width = if info.line_smooth {
            AA_WIDTH_1_0_PIXELS
        } else {
            AA_WIDTH_0_5_PIXELS
        };
        sf.last_pixel_enable = info.line_last_pixel;
        sf.line_width = ufixed(info.line_width, 11, 7);
        sf.smooth_point_enable = info.point_smooth;
        sf.point_width_source = if info.point_size_per_vertex {
            Sf::VERTEX
        } else {
            Sf::STATE
        };
        sf.point_width = ufixed(info.point_size, 8, 3);
        sf.triangle_strip_list_provoking_vertex_select = tri_strip_pv;
        sf.triangle_fan_provoking_vertex_select = tri_fan_pv;
        sf.line_strip_list_provoking_vertex_select = line_strip_pv;

        let mut rr = Builder::<Raster>::new(hw);
        rr.front_winding = u32::from(info.front_ccw);
        rr.cull_mode = info.cull_mode.to_hw();
        rr.front_face_fill_mode = info.fill_front as u32;
        rr.back_face_fill_mode = info.fill_back as u32;
        rr.dx_multisample_rasterization_enable = info.multisample;
        rr.global_depth_offset_enable_solid = info.offset_tri;
        rr.global_depth_offset_enable_wireframe = info.offset_line;
        rr.global_depth_offset_enable_point = info.offset_point;
        rr.global_depth_offset_constant = info.offset_units;
        rr.global_depth_offset_scale = info.offset_scale;
        rr.global_depth_offset_clamp = info.offset_clamp;
        rr.smooth_point_enable = info.point_smooth;
        rr.antialiasing_enable = info.line_smooth;
        rr.scissor_rectangle_enable = info.scissor;
        rr.viewport_z_near_clip_test_enable = info.depth_clip_near;
        rr.viewport_z_far_clip_test_enable = info.depth_clip_far;

        let mut cl = Builder::<Clip>::new(hw);
        cl.statistics_enable = true;
        cl.early_cull_enable = true;
        cl.user_clip_distance_clip_test_enable_bitmask = info.clip_plane_enable.into();
        cl.force_user_clip_distance_clip_test_enable_bitmask = true;
        cl.api_mode = if info.clip_halfz {
            Clip::APIMODE_D3D
        } else {
            Clip::APIMODE_OGL
        };
        cl.guardband_clip_test_enable = true;
        cl.clip_mode = if info.rasterizer_discard {
            Clip::CLIPMODE_REJECT_ALL
        } else {
            Clip::CLIPMODE_NORMAL
        };
        cl.clip_enable = true;
        cl.viewport_xy_clip_test_enable = info.point_tri_clip;
        cl.minimum_point_width = ufixed(0.125, 8, 3);
        cl.maximum_point_width = ufixed(255.875, 8, 3);
        cl.triangle_strip_list_provoking_vertex_select = tri_strip_pv;
        cl.triangle_fan_provoking_vertex_select = tri_fan_pv;
        cl.line_strip_list_provoking_vertex_select = line_strip_pv;

        let mut wm = Builder::<Wm>::new(hw);
        wm.line_antialiasing_region_width = AA_WIDTH_1_0_PIXELS;
        wm.line_end_cap_antialiasing_region_width = AA_WIDTH_0_5_PIXELS;
        wm.point_rasterization_rule = Wm::RASTRULE_UPPER_RIGHT;
        wm.statistics_enable = true;
        wm.line_stipple_enable = info.line_stipple_enable;
        wm.polygon_stipple_enable = info.poly_stipple_enable;

        // The API factor is 0..=255 for a repeat count of 1..=256.
        let factor = u32::from(info.line_stipple_factor) + 1;
        let mut line = Builder::<LineStipple>::new(hw);
        line.line_stipple_pattern = info.line_stipple_pattern.into();
        line.line_stipple_inverse_repeat_count = ufixed(1.0 / factor as f32, 1, 16);
        line.line_stipple_repeat_count = factor;

        RasterizerState {
            sf: sf.finish(),
            clip: cl.finish(),
            raster: rr.finish(),
            wm: wm.finish(),
            line_stipple: line.finish(),
            flatshade: info.flatshade,
            clamp_fragment_color: info.clamp_fragment_color,
            light_twoside: info.light_twoside,
            rasterizer_discard: info.rasterizer_discard,
            half_pixel_center: info.half_pixel_center,
            line_stipple_enable: info.line_stipple_enable,
            poly_stipple_enable: info.poly_stipple_enable,
            sprite_coord_mode: info.sprite_coord_mode,
            sprite_coord_enable: info.sprite_coord_enable,
            scissor: info.scissor,
        }
    }
}
