//! State records, which live in memory and are pointed to by commands.

use super::{Address, Header};

packet! {
    /// The part of `BLEND_STATE` shared by all render targets. One [`BlendStateEntry`] per render
    /// target follows it.
    pub struct BlendState: "BLEND_STATE" {
        header: None::<Header>,
        length(hw): 1,
        y_dither_offset: u32 => 0[19..=20],
        x_dither_offset: u32 => 0[21..=22],
        color_dither_enable: bool => 0[23],
        alpha_test_function: u32 => 0[24..=26],
        alpha_test_enable: bool => 0[27],
        alpha_to_coverage_dither_enable: bool => 0[28],
        alpha_to_one_enable: bool => 0[29],
        independent_alpha_blend_enable: bool => 0[30],
        alpha_to_coverage_enable: bool => 0[31],
    }
}

packet! {
    pub struct BlendStateEntry: "BLEND_STATE_ENTRY" {
        header: None::<Header>,
        length(hw): 2,
        write_disable_blue: bool => 0[0],
        write_disable_green: bool => 0[1],
        write_disable_red: bool => 0[2],
        write_disable_alpha: bool => 0[3],
        alpha_blend_function: u32 => 0[5..=7],
        destination_alpha_blend_factor: u32 => 0[8..=12],
        source_alpha_blend_factor: u32 => 0[13..=17],
        color_blend_function: u32 => 0[18..=20],
        destination_blend_factor: u32 => 0[21..=25],
        source_blend_factor: u32 => 0[26..=30],
        color_buffer_blend_enable: bool => 0[31],
        post_blend_color_clamp_enable: bool => 1[0],
        pre_blend_color_clamp_enable: bool => 1[1],
        color_clamp_range: u32 => 1[2..=3],
        pre_blend_source_only_clamp_enable: bool => 1[4],
        logic_op_function: u32 => 1[27..=30],
        logic_op_enable: bool => 1[31],
    }
}

impl BlendStateEntry {
    pub const COLORCLAMP_RTFORMAT: u32 = 2;
}

packet! {
    pub struct ColorCalcState: "COLOR_CALC_STATE" {
        header: None::<Header>,
        length(hw): 6,
        alpha_test_format: u32 => 0[0],
        round_disable_function_disable: bool => 0[15],
        /// Only honored before gen9, which moved the references to `3DSTATE_WM_DEPTH_STENCIL`.
        backface_stencil_reference_value: u32 => 0[16..=23],
        stencil_reference_value: u32 => 0[24..=31],
        alpha_reference_value_as_float32: f32 => 1,
        blend_constant_color_red: f32 => 2,
        blend_constant_color_green: f32 => 3,
        blend_constant_color_blue: f32 => 4,
        blend_constant_color_alpha: f32 => 5,
    }
}

impl ColorCalcState {
    pub const ALPHATEST_FLOAT32: u32 = 1;
}

packet! {
    pub struct CcViewport: "CC_VIEWPORT" {
        header: None::<Header>,
        length(hw): 2,
        minimum_depth: f32 => 0,
        maximum_depth: f32 => 1,
    }
}

packet! {
    pub struct SfClipViewport: "SF_CLIP_VIEWPORT" {
        header: None::<Header>,
        length(hw): 16,
        viewport_matrix_element_m00: f32 => 0,
        viewport_matrix_element_m11: f32 => 1,
        viewport_matrix_element_m22: f32 => 2,
        viewport_matrix_element_m30: f32 => 3,
        viewport_matrix_element_m31: f32 => 4,
        viewport_matrix_element_m32: f32 => 5,
        x_min_clip_guardband: f32 => 8,
        x_max_clip_guardband: f32 => 9,
        y_min_clip_guardband: f32 => 10,
        y_max_clip_guardband: f32 => 11,
        x_min_viewport: f32 => 12,
        x_max_viewport: f32 => 13,
        y_min_viewport: f32 => 14,
        y_max_viewport: f32 => 15,
    }
}

packet! {
    pub struct ScissorRect: "SCISSOR_RECT" {
        header: None::<Header>,
        length(hw): 2,
        scissor_rectangle_x_min: u32 => 0[0..=15],
        scissor_rectangle_y_min: u32 => 0[16..=31],
        scissor_rectangle_x_max: u32 => 1[0..=15],
        scissor_rectangle_y_max: u32 => 1[16..=31],
    }
}

packet! {
    pub struct SamplerState: "SAMPLER_STATE" {
        header: None::<Header>,
        length(hw): 4,
        anisotropic_algorithm: u32 => 0[0],
        texture_lod_bias: i32 => 0[1..=13],
        min_mode_filter: u32 => 0[14..=16],
        mag_mode_filter: u32 => 0[17..=19],
        mip_mode_filter: u32 => 0[20..=21],
        base_mip_level: u32 => 0[22..=26],
        lod_pre_clamp_mode: u32 => 0[27..=28],
        texture_border_color_mode: u32 => 0[29],
        sampler_disable: bool => 0[31],
        cube_surface_control_mode: u32 => 1[0],
        shadow_function: u32 => 1[1..=3],
        max_lod: u32 => 1[8..=19],
        min_lod: u32 => 1[20..=31],
        lod_clamp_magnification_mode: u32 => 2[0],
        /// Offset of the border color from the dynamic state base address.
        indirect_state_pointer: Address => 2[6..=23],
        tcz_address_control_mode: u32 => 3[0..=2],
        tcy_address_control_mode: u32 => 3[3..=5],
        tcx_address_control_mode: u32 => 3[6..=8],
        non_normalized_coordinate_enable: bool => 3[10],
        trilinear_filter_quality: u32 => 3[11..=12],
        r_address_min_filter_rounding_enable: bool => 3[13],
        r_address_mag_filter_rounding_enable: bool => 3[14],
        v_address_min_filter_rounding_enable: bool => 3[15],
        v_address_mag_filter_rounding_enable: bool => 3[16],
        u_address_min_filter_rounding_enable: bool => 3[17],
        u_address_mag_filter_rounding_enable: bool => 3[18],
        maximum_anisotropy: u32 => 3[19..=21],
    }
}

impl SamplerState {
    pub const LODPRECLAMP_OGL: u32 = 2;
    pub const RATIO_2_1: u32 = 0;
    pub const RATIO_16_1: u32 = 7;
}

packet! {
    pub struct VertexBufferState: "VERTEX_BUFFER_STATE" {
        header: None::<Header>,
        length(hw): 4,
        buffer_pitch: u32 => 0[0..=11],
        null_vertex_buffer: bool => 0[13],
        address_modify_enable: bool => 0[14],
        mocs: u32 => 0[16..=22],
        vertex_buffer_index: u32 => 0[26..=31],
        buffer_starting_address: Address => 1[0..=63],
        buffer_size: u32 => 3,
    }
}

packet! {
    pub struct VertexElementState: "VERTEX_ELEMENT_STATE" {
        header: None::<Header>,
        length(hw): 2,
        source_element_offset: u32 => 0[0..=11],
        edge_flag_enable: bool => 0[15],
        source_element_format: u32 => 0[16..=24],
        valid: bool => 0[25],
        vertex_buffer_index: u32 => 0[26..=31],
        component_3_control: u32 => 1[16..=18],
        component_2_control: u32 => 1[20..=22],
        component_1_control: u32 => 1[24..=26],
        component_0_control: u32 => 1[28..=30],
    }
}

impl VertexElementState {
    pub const VFCOMP_NOSTORE: u32 = 0;
    pub const VFCOMP_STORE_SRC: u32 = 1;
    pub const VFCOMP_STORE_0: u32 = 2;
    pub const VFCOMP_STORE_1_FP: u32 = 3;
    pub const VFCOMP_STORE_1_INT: u32 = 4;
}

packet! {
    pub struct InterfaceDescriptorData: "INTERFACE_DESCRIPTOR_DATA" {
        header: None::<Header>,
        length(hw): 8,
        kernel_start_pointer: Address => 0[6..=47],
        sampler_count: u32 => 3[2..=4],
        sampler_state_pointer: Address => 3[5..=31],
        binding_table_entry_count: u32 => 4[0..=4],
        binding_table_pointer: Address => 4[5..=15],
        constant_urb_entry_read_offset: u32 => 5[0..=15],
        constant_indirect_urb_entry_read_length: u32 => 5[16..=31],
        number_of_threads_in_gpgpu_thread_group: u32 => 6[0..=9],
        shared_local_memory_size: u32 => 6[16..=20],
        barrier_enable: bool => 6[21],
        cross_thread_constant_data_read_length: u32 => 7[0..=7],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        packet::{extract, pack, Packet},
        Gen,
    };

    #[test]
    fn records_have_no_header() {
        let words = pack::<ColorCalcState>(Gen::Gen9, |cc| {
            cc.alpha_test_format = ColorCalcState::ALPHATEST_FLOAT32;
            cc.blend_constant_color_red = 1.0;
        });

        assert!(ColorCalcState::HEADER.is_none());
        assert_eq!(words.len(), 6);
        assert_eq!(words[0], 1);
        assert_eq!(words[2], 1.0f32.to_bits());
    }

    #[test]
    fn sampler_border_color_pointer_is_unshifted() {
        let words = pack::<SamplerState>(Gen::Gen9, |samp| {
            samp.indirect_state_pointer = Address(0x1240);
            samp.tcx_address_control_mode = 4;
        });

        assert_eq!(words[2], 0x1240);
        assert_eq!(extract(&words, 3, 6, 8), 4);
    }

    #[test]
    fn scissor_packs_bounds() {
        let words = pack::<ScissorRect>(Gen::Gen9, |sc| {
            sc.scissor_rectangle_x_min = 1;
            sc.scissor_rectangle_y_min = 2;
            sc.scissor_rectangle_x_max = 3;
            sc.scissor_rectangle_y_max = 4;
        });

        assert_eq!(words.as_slice(), [2 << 16 | 1, 4 << 16 | 3]);
    }
}
