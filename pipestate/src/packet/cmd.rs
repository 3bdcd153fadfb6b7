//! Commands, which are written directly into the batch.
//!
//! Commands that exist once per shader stage share a struct with a `command_sub_opcode` field.
//! Their constructors fill it in; the header's own sub-opcode is left zero.

use super::{
    state::{VertexBufferState, VertexElementState},
    Address, Dwords, Header, Packet,
};
use crate::{Gen, ShaderStage};
use smallvec::SmallVec;

packet! {
    pub struct MiNoop: "MI_NOOP" {
        header: Header::mi(0x00),
        length(hw): 1,
    }
}

packet! {
    pub struct MiBatchBufferEnd: "MI_BATCH_BUFFER_END" {
        header: Header::mi(0x0a),
        length(hw): 1,
    }
}

packet! {
    /// Flushes and invalidates caches, stalls, and optionally writes a value to memory once the
    /// preceding work reaches a point in the pipeline.
    pub struct PipeControl: "PIPE_CONTROL" {
        header: Header::render(2, 0),
        length(hw): 6,
        depth_cache_flush_enable: bool => 1[0],
        stall_at_pixel_scoreboard: bool => 1[1],
        state_cache_invalidation_enable: bool => 1[2],
        constant_cache_invalidation_enable: bool => 1[3],
        vf_cache_invalidation_enable: bool => 1[4],
        dc_flush_enable: bool => 1[5],
        pipe_control_flush_enable: bool => 1[7],
        notify_enable: bool => 1[8],
        indirect_state_pointers_disable: bool => 1[9],
        texture_cache_invalidation_enable: bool => 1[10],
        instruction_cache_invalidate_enable: bool => 1[11],
        render_target_cache_flush_enable: bool => 1[12],
        depth_stall_enable: bool => 1[13],
        post_sync_operation: u32 => 1[14..=15],
        generic_media_state_clear: bool => 1[16],
        tlb_invalidate: bool => 1[18],
        global_snapshot_count_reset: bool => 1[19],
        command_streamer_stall_enable: bool => 1[20],
        store_data_index: bool => 1[21],
        lri_post_sync_operation: bool => 1[23],
        destination_address_type: bool => 1[24],
        flush_llc: bool => 1[26],
        address: Address => 2[2..=63],
        immediate_data: u64 => 4[0..=63],
    }
}

impl PipeControl {
    pub const NO_WRITE: u32 = 0;
    pub const WRITE_IMMEDIATE_DATA: u32 = 1;
    pub const WRITE_PS_DEPTH_COUNT: u32 = 2;
    pub const WRITE_TIMESTAMP: u32 = 3;
}

packet! {
    pub struct PipelineSelect: "PIPELINE_SELECT" {
        header: Header::common(1, 4),
        length(hw): 1,
        mask_bits: u32 => 0[8..=15],
        pipeline_selection: u32 => 0[0..=1],
    }
}

impl PipelineSelect {
    pub const SELECT_3D: u32 = 0;
    pub const SELECT_GPGPU: u32 = 2;
}

packet! {
    pub struct ViewportStatePointersCc: "3DSTATE_VIEWPORT_STATE_POINTERS_CC" {
        header: Header::render(0, 0x23),
        length(hw): 2,
        cc_viewport_pointer: Address => 1[5..=31],
    }
}

packet! {
    pub struct ViewportStatePointersSfClip: "3DSTATE_VIEWPORT_STATE_POINTERS_SF_CLIP" {
        header: Header::render(0, 0x21),
        length(hw): 2,
        sf_clip_viewport_pointer: Address => 1[6..=31],
    }
}

packet! {
    pub struct BlendStatePointers: "3DSTATE_BLEND_STATE_POINTERS" {
        header: Header::render(0, 0x24),
        length(hw): 2,
        blend_state_pointer_valid: bool => 1[0],
        blend_state_pointer: Address => 1[6..=31],
    }
}

packet! {
    pub struct CcStatePointers: "3DSTATE_CC_STATE_POINTERS" {
        header: Header::render(0, 0x0e),
        length(hw): 2,
        color_calc_state_pointer_valid: bool => 1[0],
        color_calc_state_pointer: Address => 1[6..=31],
    }
}

packet! {
    pub struct ScissorStatePointers: "3DSTATE_SCISSOR_STATE_POINTERS" {
        header: Header::render(0, 0x0f),
        length(hw): 2,
        scissor_rect_pointer: Address => 1[5..=31],
    }
}

packet! {
    /// Push constant buffers of one render stage.
    pub struct Constant: "3DSTATE_CONSTANT_*" {
        header: Header::render(0, 0),
        length(hw): 11,
        command_sub_opcode: u32 => 0[16..=23],
        read_length_0: u32 => 1[0..=15],
        read_length_1: u32 => 1[16..=31],
        read_length_2: u32 => 2[0..=15],
        read_length_3: u32 => 2[16..=31],
        buffer_0: Address => 3[5..=63],
        buffer_1: Address => 5[5..=63],
        buffer_2: Address => 7[5..=63],
        buffer_3: Address => 9[5..=63],
    }
}

impl Constant {
    /// # Panics
    ///
    /// - Panics if `stage` is [`ShaderStage::Compute`].
    pub fn for_stage(stage: ShaderStage) -> Self {
        const SUB_OPCODES: [u32; 5] = [21, 25, 26, 22, 23];

        assert!(stage.is_render());

        Constant {
            command_sub_opcode: SUB_OPCODES[stage.index()],
            ..Default::default()
        }
    }
}

packet! {
    pub struct BindingTablePointers: "3DSTATE_BINDING_TABLE_POINTERS_*" {
        header: Header::render(0, 0),
        length(hw): 2,
        command_sub_opcode: u32 => 0[16..=23],
        binding_table_pointer: Address => 1[5..=15],
    }
}

impl BindingTablePointers {
    /// # Panics
    ///
    /// - Panics if `stage` is [`ShaderStage::Compute`].
    pub fn for_stage(stage: ShaderStage) -> Self {
        assert!(stage.is_render());

        BindingTablePointers {
            command_sub_opcode: 38 + stage.index() as u32,
            ..Default::default()
        }
    }
}

packet! {
    pub struct SamplerStatePointers: "3DSTATE_SAMPLER_STATE_POINTERS_*" {
        header: Header::render(0, 0),
        length(hw): 2,
        command_sub_opcode: u32 => 0[16..=23],
        sampler_state_pointer: Address => 1[5..=31],
    }
}

impl SamplerStatePointers {
    /// # Panics
    ///
    /// - Panics if `stage` is [`ShaderStage::Compute`].
    pub fn for_stage(stage: ShaderStage) -> Self {
        assert!(stage.is_render());

        SamplerStatePointers {
            command_sub_opcode: 43 + stage.index() as u32,
            ..Default::default()
        }
    }
}

packet! {
    /// URB allocation of one vertex-pipeline stage.
    pub struct Urb: "3DSTATE_URB_*" {
        header: Header::render(0, 0),
        length(hw): 2,
        command_sub_opcode: u32 => 0[16..=23],
        number_of_urb_entries: u32 => 1[0..=15],
        urb_entry_allocation_size: u32 => 1[16..=24],
        urb_starting_address: u32 => 1[25..=31],
    }
}

impl Urb {
    /// # Panics
    ///
    /// - Panics if `stage` is not a vertex-pipeline stage.
    pub fn for_stage(stage: ShaderStage) -> Self {
        assert!(stage.is_render() && stage != ShaderStage::Fragment);

        Urb {
            command_sub_opcode: 0x30 + stage.index() as u32,
            ..Default::default()
        }
    }
}

packet! {
    pub struct Multisample: "3DSTATE_MULTISAMPLE" {
        header: Header::render(0, 0x0d),
        length(hw): 2,
        pixel_position_offset_enable: bool => 1[5],
        pixel_location: u32 => 1[4],
        number_of_multisamples: u32 => 1[1..=3],
    }
}

packet! {
    pub struct SampleMask: "3DSTATE_SAMPLE_MASK" {
        header: Header::render(0, 0x18),
        length(hw): 2,
        sample_mask: u32 => 1[0..=15],
    }
}

packet! {
    pub struct Vs: "3DSTATE_VS" {
        header: Header::render(0, 0x10),
        length(hw): 9,
        kernel_start_pointer: Address => 1[6..=63],
        binding_table_entry_count: u32 => 3[18..=25],
        sampler_count: u32 => 3[27..=29],
        vertex_urb_entry_read_offset: u32 => 6[4..=9],
        vertex_urb_entry_read_length: u32 => 6[11..=16],
        dispatch_grf_start_register_for_urb_data: u32 => 6[20..=24],
        function_enable: bool => 7[0],
        simd8_dispatch_enable: bool => 7[2],
        statistics_enable: bool => 7[10],
        maximum_number_of_threads: u32 => 7[23..=31],
        user_clip_distance_cull_test_enable_bitmask: u32 => 8[0..=7],
        user_clip_distance_clip_test_enable_bitmask: u32 => 8[8..=15],
        vertex_urb_entry_output_length: u32 => 8[16..=20],
        vertex_urb_entry_output_read_offset: u32 => 8[21..=26],
    }
}

packet! {
    pub struct Hs: "3DSTATE_HS" {
        header: Header::render(0, 0x1b),
        length(hw): 9,
        binding_table_entry_count: u32 => 1[18..=25],
        sampler_count: u32 => 1[27..=29],
        instance_count: u32 => 2[0..=3],
        maximum_number_of_threads: u32 => 2[8..=16],
        statistics_enable: bool => 2[29],
        enable: bool => 2[31],
        kernel_start_pointer: Address => 3[6..=63],
        vertex_urb_entry_read_offset: u32 => 7[4..=9],
        vertex_urb_entry_read_length: u32 => 7[11..=16],
        dispatch_grf_start_register_for_urb_data: u32 => 7[19..=23],
        include_vertex_handles: bool => 7[24],
    }
}

packet! {
    pub struct Te: "3DSTATE_TE" {
        header: Header::render(0, 0x1c),
        length(hw): 4,
        te_enable: bool => 1[0],
        te_mode: u32 => 1[1..=2],
        te_domain: u32 => 1[4..=5],
        output_topology: u32 => 1[8..=9],
        partitioning: u32 => 1[12..=13],
        maximum_tessellation_factor_odd: f32 => 2,
        maximum_tessellation_factor_not_odd: f32 => 3,
    }
}

packet! {
    pub struct Ds: "3DSTATE_DS" {
        header: Header::render(0, 0x1d),
        length(hw): if hw >= Gen::Gen9 { 11 } else { 9 },
        kernel_start_pointer: Address => 1[6..=63],
        binding_table_entry_count: u32 => 3[18..=25],
        sampler_count: u32 => 3[27..=29],
        patch_urb_entry_read_offset: u32 => 6[4..=9],
        patch_urb_entry_read_length: u32 => 6[11..=17],
        dispatch_grf_start_register_for_urb_data: u32 => 6[20..=24],
        function_enable: bool => 7[0],
        compute_w_coordinate_enable: bool => 7[2],
        statistics_enable: bool => 7[10],
        maximum_number_of_threads: u32 => 7[21..=30],
    }
}

packet! {
    pub struct Gs: "3DSTATE_GS" {
        header: Header::render(0, 0x11),
        length(hw): 10,
        kernel_start_pointer: Address => 1[6..=63],
        binding_table_entry_count: u32 => 3[18..=25],
        sampler_count: u32 => 3[27..=29],
        dispatch_grf_start_register_for_urb_data: u32 => 6[0..=3],
        vertex_urb_entry_read_offset: u32 => 6[4..=9],
        include_vertex_handles: bool => 6[10],
        vertex_urb_entry_read_length: u32 => 6[11..=16],
        output_topology: u32 => 6[17..=22],
        output_vertex_size: u32 => 6[23..=28],
        function_enable: bool => 7[0],
        statistics_enable: bool => 7[10],
        dispatch_mode: u32 => 7[11..=12],
        instance_control: u32 => 7[15..=19],
        control_data_header_size: u32 => 7[20..=23],
        maximum_number_of_threads: u32 => 7[24..=31],
        vertex_urb_entry_output_length: u32 => 8[16..=20],
        vertex_urb_entry_output_read_offset: u32 => 8[21..=26],
    }
}

packet! {
    pub struct Ps: "3DSTATE_PS" {
        header: Header::render(0, 0x20),
        length(hw): 12,
        kernel_start_pointer_0: Address => 1[6..=63],
        floating_point_mode: bool => 3[16],
        binding_table_entry_count: u32 => 3[18..=25],
        sampler_count: u32 => 3[27..=29],
        vector_mask_enable: bool => 3[30],
        single_program_flow: bool => 3[31],
        simd8_dispatch_enable: bool => 6[0],
        simd16_dispatch_enable: bool => 6[1],
        simd32_dispatch_enable: bool => 6[2],
        position_xy_offset_select: u32 => 6[3..=4],
        render_target_resolve_type: u32 => 6[6..=7],
        render_target_fast_clear_enable: bool => 6[8],
        push_constant_enable: bool => 6[11],
        maximum_number_of_threads_per_psd: u32 => 6[23..=31],
        dispatch_grf_start_register_for_constant_setup_data_2: u32 => 7[0..=6],
        dispatch_grf_start_register_for_constant_setup_data_1: u32 => 7[8..=14],
        dispatch_grf_start_register_for_constant_setup_data_0: u32 => 7[16..=22],
        kernel_start_pointer_1: Address => 8[6..=63],
        kernel_start_pointer_2: Address => 10[6..=63],
    }
}

packet! {
    pub struct PsExtra: "3DSTATE_PS_EXTRA" {
        header: Header::render(0, 0x4f),
        length(hw): 2,
        pixel_shader_uses_input_coverage_mask: bool => 1[1],
        pixel_shader_has_uav: bool => 1[2],
        pixel_shader_is_per_sample: bool => 1[6],
        pixel_shader_disables_alpha_to_coverage: bool => 1[7],
        attribute_enable: bool => 1[8],
        pixel_shader_uses_source_w: bool => 1[23],
        pixel_shader_uses_source_depth: bool => 1[24],
        force_computed_depth: bool => 1[25],
        pixel_shader_computed_depth_mode: u32 => 1[26..=27],
        pixel_shader_kills_pixel: bool => 1[28],
        o_mask_present_to_render_target: bool => 1[29],
        pixel_shader_does_not_write_to_rt: bool => 1[30],
        pixel_shader_valid: bool => 1[31],
    }
}

packet! {
    pub struct Streamout: "3DSTATE_STREAMOUT" {
        header: Header::render(0, 0x1e),
        length(hw): 5,
        so_statistics_enable: bool => 1[25],
        reorder_mode: u32 => 1[26],
        render_stream_select: u32 => 1[27..=28],
        rendering_disable: bool => 1[30],
        so_function_enable: bool => 1[31],
        stream_0_vertex_read_length: u32 => 2[0..=4],
        stream_0_vertex_read_offset: u32 => 2[5],
        buffer_0_surface_pitch: u32 => 3[0..=11],
        buffer_1_surface_pitch: u32 => 3[16..=27],
        buffer_2_surface_pitch: u32 => 4[0..=11],
        buffer_3_surface_pitch: u32 => 4[16..=27],
    }
}

packet! {
    pub struct SoBuffer: "3DSTATE_SO_BUFFER" {
        header: Header::render(1, 0x18),
        length(hw): 8,
        stream_output_buffer_offset_address_enable: bool => 1[20],
        stream_offset_write_enable: bool => 1[21],
        mocs: u32 => 1[22..=28],
        so_buffer_index: u32 => 1[29..=30],
        so_buffer_enable: bool => 1[31],
        surface_base_address: Address => 2[2..=47],
        surface_size: u32 => 4[0..=29],
        stream_output_buffer_offset_address: Address => 5[2..=47],
        stream_offset: u32 => 7,
    }
}

packet! {
    pub struct Clip: "3DSTATE_CLIP" {
        header: Header::render(0, 0x12),
        length(hw): 4,
        user_clip_distance_cull_test_enable_bitmask: u32 => 1[0..=7],
        statistics_enable: bool => 1[10],
        force_clip_mode: bool => 1[16],
        force_user_clip_distance_clip_test_enable_bitmask: bool => 1[17],
        early_cull_enable: bool => 1[18],
        vertex_sub_pixel_precision_select: u32 => 1[19],
        force_user_clip_distance_cull_test_enable_bitmask: bool => 1[20],
        triangle_fan_provoking_vertex_select: u32 => 2[0..=1],
        line_strip_list_provoking_vertex_select: u32 => 2[2..=3],
        triangle_strip_list_provoking_vertex_select: u32 => 2[4..=5],
        non_perspective_barycentric_enable: bool => 2[8],
        perspective_divide_disable: bool => 2[9],
        clip_mode: u32 => 2[13..=15],
        user_clip_distance_clip_test_enable_bitmask: u32 => 2[16..=23],
        guardband_clip_test_enable: bool => 2[26],
        viewport_xy_clip_test_enable: bool => 2[28],
        api_mode: u32 => 2[30],
        clip_enable: bool => 2[31],
        maximum_vp_index: u32 => 3[0..=3],
        force_zero_rta_index_enable: bool => 3[5],
        maximum_point_width: u32 => 3[6..=16],
        minimum_point_width: u32 => 3[17..=27],
    }
}

impl Clip {
    pub const CLIPMODE_NORMAL: u32 = 0;
    pub const CLIPMODE_REJECT_ALL: u32 = 3;
    pub const APIMODE_OGL: u32 = 0;
    pub const APIMODE_D3D: u32 = 1;
}

packet! {
    pub struct Raster: "3DSTATE_RASTER" {
        header: Header::render(0, 0x50),
        length(hw): 5,
        viewport_z_near_clip_test_enable: bool => 1[0],
        scissor_rectangle_enable: bool => 1[1],
        antialiasing_enable: bool => 1[2],
        back_face_fill_mode: u32 => 1[3..=4],
        front_face_fill_mode: u32 => 1[5..=6],
        global_depth_offset_enable_point: bool => 1[7],
        global_depth_offset_enable_wireframe: bool => 1[8],
        global_depth_offset_enable_solid: bool => 1[9],
        dx_multisample_rasterization_mode: u32 => 1[10..=11],
        dx_multisample_rasterization_enable: bool => 1[12],
        smooth_point_enable: bool => 1[13],
        force_multisampling: bool => 1[14],
        cull_mode: u32 => 1[16..=17],
        forced_sample_count: u32 => 1[18..=20],
        front_winding: u32 => 1[21],
        api_mode: u32 => 1[22..=23],
        viewport_z_far_clip_test_enable: bool => 1[26],
        global_depth_offset_constant: f32 => 2,
        global_depth_offset_scale: f32 => 3,
        global_depth_offset_clamp: f32 => 4,
    }
}

packet! {
    pub struct Sf: "3DSTATE_SF" {
        header: Header::render(0, 0x13),
        length(hw): 4,
        viewport_transform_enable: bool => 1[1],
        statistics_enable: bool => 1[10],
        legacy_global_depth_bias_enable: bool => 1[11],
        line_width: u32 => 1[12..=29],
        line_end_cap_antialiasing_region_width: u32 => 2[16..=17],
        point_width: u32 => 3[0..=10],
        point_width_source: u32 => 3[11],
        smooth_point_enable: bool => 3[13],
        aa_line_distance_mode: u32 => 3[14],
        triangle_fan_provoking_vertex_select: u32 => 3[25..=26],
        line_strip_list_provoking_vertex_select: u32 => 3[27..=28],
        triangle_strip_list_provoking_vertex_select: u32 => 3[29..=30],
        last_pixel_enable: bool => 3[31],
    }
}

impl Sf {
    pub const VERTEX: u32 = 0;
    pub const STATE: u32 = 1;
}

packet! {
    pub struct Wm: "3DSTATE_WM" {
        header: Header::render(0, 0x14),
        length(hw): 2,
        force_kill_pixel_enable: u32 => 1[0..=1],
        point_rasterization_rule: u32 => 1[2],
        line_stipple_enable: bool => 1[3],
        polygon_stipple_enable: bool => 1[4],
        line_antialiasing_region_width: u32 => 1[6..=7],
        line_end_cap_antialiasing_region_width: u32 => 1[8..=9],
        barycentric_interpolation_mode: u32 => 1[11..=16],
        position_zw_interpolation_mode: u32 => 1[17..=18],
        force_thread_dispatch_enable: u32 => 1[19..=20],
        early_depth_stencil_control: u32 => 1[21..=22],
        legacy_diamond_line_rasterization: bool => 1[26],
        legacy_hierarchical_depth_buffer_resolve_enable: bool => 1[27],
        legacy_depth_buffer_resolve_enable: bool => 1[28],
        legacy_depth_buffer_clear_enable: bool => 1[30],
        statistics_enable: bool => 1[31],
    }
}

impl Wm {
    pub const EDSC_NORMAL: u32 = 0;
    pub const EDSC_PSEXEC: u32 = 1;
    pub const EDSC_PREPS: u32 = 2;
    pub const RASTRULE_UPPER_RIGHT: u32 = 1;
}

packet! {
    pub struct Sbe: "3DSTATE_SBE" {
        header: Header::render(0, 0x1f),
        length(hw): if hw >= Gen::Gen9 { 6 } else { 4 },
        vertex_urb_entry_read_offset: u32 => 1[5..=10],
        vertex_urb_entry_read_length: u32 => 1[11..=15],
        point_sprite_texture_coordinate_origin: u32 => 1[20],
        attribute_swizzle_enable: bool => 1[21],
        number_of_sf_output_attributes: u32 => 1[22..=27],
        force_vertex_urb_entry_read_offset: bool => 1[28],
        force_vertex_urb_entry_read_length: bool => 1[29],
        point_sprite_texture_coordinate_enable: u32 => 2,
        constant_interpolation_enable: u32 => 3,
        attribute_active_component_format_lo: u32 => 4,
        attribute_active_component_format_hi: u32 => 5,
    }
}

impl Sbe {
    pub const UPPERLEFT: u32 = 0;
    pub const LOWERLEFT: u32 = 1;
}

/// `3DSTATE_SBE_SWIZ`, which routes vertex outputs to fragment shader inputs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SbeSwiz {
    /// `SF_OUTPUT_ATTRIBUTE_DETAIL` of each of the first 16 attributes.
    pub attributes: [SfOutputAttributeDetail; 16],
    /// Wrap-shortest enables of each attribute, one bit per component.
    pub wrap_shortest_enables: [u8; 16],
}

/// Where one fragment shader input comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SfOutputAttributeDetail {
    pub source_attribute: u32,
    pub swizzle_select: u32,
    pub constant_source: u32,
    pub swizzle_control_mode: bool,
    /// Component overrides for x, y, z and w, as bits 0 through 3.
    pub component_override: u8,
}

impl SfOutputAttributeDetail {
    pub const INPUTATTR: u32 = 0;
    pub const INPUTATTR_FACING: u32 = 1;

    pub const CONST_0000: u32 = 0;
    pub const CONST_0001_FLOAT: u32 = 1;
    pub const CONST_1111_FLOAT: u32 = 2;
    pub const PRIM_ID: u32 = 3;

    fn encode(&self) -> u32 {
        debug_assert!(self.source_attribute < 32);
        debug_assert!(self.component_override < 16);

        self.source_attribute
            | self.swizzle_select << 6
            | self.constant_source << 9
            | u32::from(self.swizzle_control_mode) << 11
            | u32::from(self.component_override) << 12
    }
}

impl Packet for SbeSwiz {
    const NAME: &'static str = "3DSTATE_SBE_SWIZ";

    const HEADER: Option<Header> = Header::render(0, 0x51);

    fn length(&self, _hw: Gen) -> usize {
        11
    }

    fn pack(&self, _hw: Gen, dw: &mut Dwords<'_>) {
        for (i, attr) in self.attributes.iter().enumerate() {
            let lo = (i as u32 % 2) * 16;
            dw.field(1 + i / 2, lo, lo + 15, attr.encode());
        }

        for (i, &enables) in self.wrap_shortest_enables.iter().enumerate() {
            let lo = (i as u32 % 8) * 4;
            dw.field(9 + i / 8, lo, lo + 3, u32::from(enables));
        }
    }
}

packet! {
    pub struct PsBlend: "3DSTATE_PS_BLEND" {
        header: Header::render(0, 0x4d),
        length(hw): 2,
        independent_alpha_blend_enable: bool => 1[7],
        alpha_test_enable: bool => 1[8],
        destination_blend_factor: u32 => 1[9..=13],
        source_blend_factor: u32 => 1[14..=18],
        destination_alpha_blend_factor: u32 => 1[19..=23],
        source_alpha_blend_factor: u32 => 1[24..=28],
        color_buffer_blend_enable: bool => 1[29],
        has_writeable_rt: bool => 1[30],
        alpha_to_coverage_enable: bool => 1[31],
    }
}

packet! {
    pub struct WmDepthStencil: "3DSTATE_WM_DEPTH_STENCIL" {
        header: Header::render(0, 0x4e),
        length(hw): if hw >= Gen::Gen9 { 4 } else { 3 },
        depth_buffer_write_enable: bool => 1[0],
        depth_test_enable: bool => 1[1],
        stencil_buffer_write_enable: bool => 1[2],
        stencil_test_enable: bool => 1[3],
        double_sided_stencil_enable: bool => 1[4],
        depth_test_function: u32 => 1[5..=7],
        backface_stencil_test_function: u32 => 1[8..=10],
        stencil_test_function: u32 => 1[11..=13],
        backface_stencil_pass_depth_pass_op: u32 => 1[14..=16],
        backface_stencil_pass_depth_fail_op: u32 => 1[17..=19],
        backface_stencil_fail_op: u32 => 1[20..=22],
        stencil_pass_depth_pass_op: u32 => 1[23..=25],
        stencil_pass_depth_fail_op: u32 => 1[26..=28],
        stencil_fail_op: u32 => 1[29..=31],
        backface_stencil_write_mask: u32 => 2[0..=7],
        backface_stencil_test_mask: u32 => 2[8..=15],
        stencil_write_mask: u32 => 2[16..=23],
        stencil_test_mask: u32 => 2[24..=31],
        /// Only present from gen9 on. Earlier generations keep the references in
        /// `COLOR_CALC_STATE`.
        backface_stencil_reference_value: u32 => 3[0..=7],
        stencil_reference_value: u32 => 3[8..=15],
    }
}

packet! {
    pub struct DepthBuffer: "3DSTATE_DEPTH_BUFFER" {
        header: Header::render(0, 0x05),
        length(hw): 8,
        surface_pitch: u32 => 1[0..=17],
        surface_format: u32 => 1[18..=20],
        hierarchical_depth_buffer_enable: bool => 1[22],
        stencil_write_enable: bool => 1[27],
        depth_write_enable: bool => 1[28],
        surface_type: u32 => 1[29..=31],
        surface_base_address: Address => 2[0..=63],
        lod: u32 => 4[0..=3],
        width: u32 => 4[4..=17],
        height: u32 => 4[18..=31],
        mocs: u32 => 5[0..=6],
        minimum_array_element: u32 => 5[10..=20],
        depth: u32 => 5[21..=31],
        surface_qpitch: u32 => 7[0..=14],
        render_target_view_extent: u32 => 7[21..=31],
    }
}

impl DepthBuffer {
    pub const SURFTYPE_2D: u32 = 1;
    pub const SURFTYPE_NULL: u32 = 7;
    pub const D32_FLOAT: u32 = 1;
    pub const D16_UNORM: u32 = 5;
}

packet! {
    pub struct HierDepthBuffer: "3DSTATE_HIER_DEPTH_BUFFER" {
        header: Header::render(0, 0x07),
        length(hw): 5,
        surface_pitch: u32 => 1[0..=16],
        mocs: u32 => 1[25..=31],
        surface_base_address: Address => 2[0..=63],
        surface_qpitch: u32 => 4[0..=14],
    }
}

packet! {
    pub struct StencilBuffer: "3DSTATE_STENCIL_BUFFER" {
        header: Header::render(0, 0x06),
        length(hw): 5,
        surface_pitch: u32 => 1[0..=16],
        mocs: u32 => 1[22..=28],
        stencil_buffer_enable: bool => 1[31],
        surface_base_address: Address => 2[0..=63],
        surface_qpitch: u32 => 4[0..=14],
    }
}

packet! {
    pub struct ClearParams: "3DSTATE_CLEAR_PARAMS" {
        header: Header::render(0, 0x04),
        length(hw): 3,
        depth_clear_value: f32 => 1,
        depth_clear_value_valid: bool => 2[0],
    }
}

/// `3DSTATE_POLY_STIPPLE_PATTERN`, a 32x32 stipple mask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PolyStipplePattern {
    pub rows: [u32; 32],
}

impl Packet for PolyStipplePattern {
    const NAME: &'static str = "3DSTATE_POLY_STIPPLE_PATTERN";

    const HEADER: Option<Header> = Header::render(1, 0x07);

    fn length(&self, _hw: Gen) -> usize {
        33
    }

    fn pack(&self, _hw: Gen, dw: &mut Dwords<'_>) {
        for (i, &row) in self.rows.iter().enumerate() {
            dw.field(1 + i, 0, 31, row);
        }
    }
}

packet! {
    pub struct LineStipple: "3DSTATE_LINE_STIPPLE" {
        header: Header::render(1, 0x08),
        length(hw): 3,
        line_stipple_pattern: u32 => 1[0..=15],
        current_stipple_index: u32 => 1[16..=19],
        current_repeat_counter: u32 => 1[21..=29],
        modify_enable_current_repeat_counter_current_stipple_index: bool => 1[31],
        line_stipple_repeat_count: u32 => 2[0..=8],
        line_stipple_inverse_repeat_count: u32 => 2[15..=31],
    }
}

packet! {
    pub struct VfTopology: "3DSTATE_VF_TOPOLOGY" {
        header: Header::render(0, 0x4b),
        length(hw): 2,
        primitive_topology_type: u32 => 1[0..=5],
    }
}

packet! {
    pub struct IndexBuffer: "3DSTATE_INDEX_BUFFER" {
        header: Header::render(0, 0x0a),
        length(hw): 5,
        mocs: u32 => 1[0..=6],
        index_format: u32 => 1[8..=9],
        buffer_starting_address: Address => 2[0..=63],
        buffer_size: u32 => 4,
    }
}

impl IndexBuffer {
    /// Returns the index format of indices `size` bytes wide.
    ///
    /// # Panics
    ///
    /// - Panics if `size` is not 1, 2 or 4.
    pub fn format_of_size(size: u32) -> u32 {
        match size {
            1 => 0,
            2 => 1,
            4 => 2,
            _ => panic!("invalid index size {size}"),
        }
    }
}

/// `3DSTATE_VERTEX_BUFFERS`. With no buffers, a single null buffer is encoded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VertexBuffers {
    pub buffers: SmallVec<[VertexBufferState; 8]>,
}

impl Packet for VertexBuffers {
    const NAME: &'static str = "3DSTATE_VERTEX_BUFFERS";

    const HEADER: Option<Header> = Header::render(0, 0x08);

    fn length(&self, _hw: Gen) -> usize {
        1 + 4 * self.buffers.len().max(1)
    }

    fn pack(&self, hw: Gen, dw: &mut Dwords<'_>) {
        if self.buffers.is_empty() {
            let null = VertexBufferState {
                null_vertex_buffer: true,
                address_modify_enable: true,
                ..Default::default()
            };
            dw.nested(1, hw, &null);
        }

        for (i, vb) in self.buffers.iter().enumerate() {
            dw.nested(1 + 4 * i, hw, vb);
        }
    }
}

/// `3DSTATE_VERTEX_ELEMENTS`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VertexElements {
    pub elements: SmallVec<[VertexElementState; 8]>,
}

impl Packet for VertexElements {
    const NAME: &'static str = "3DSTATE_VERTEX_ELEMENTS";

    const HEADER: Option<Header> = Header::render(0, 0x09);

    fn length(&self, _hw: Gen) -> usize {
        debug_assert!(!self.elements.is_empty());

        1 + 2 * self.elements.len().max(1)
    }

    fn pack(&self, hw: Gen, dw: &mut Dwords<'_>) {
        for (i, ve) in self.elements.iter().enumerate() {
            dw.nested(1 + 2 * i, hw, ve);
        }
    }
}

packet! {
    pub struct VfInstancing: "3DSTATE_VF_INSTANCING" {
        header: Header::render(0, 0x49),
        length(hw): 3,
        vertex_element_index: u32 => 1[0..=5],
        instancing_enable: bool => 1[8],
        instance_data_step_rate: u32 => 2,
    }
}

packet! {
    pub struct VfSgvs: "3DSTATE_VF_SGVS" {
        header: Header::render(0, 0x4a),
        length(hw): 2,
        vertex_id_element_offset: u32 => 1[0..=5],
        vertex_id_component_number: u32 => 1[13..=14],
        vertex_id_enable: bool => 1[15],
        instance_id_element_offset: u32 => 1[16..=21],
        instance_id_component_number: u32 => 1[29..=30],
        instance_id_enable: bool => 1[31],
    }
}

packet! {
    pub struct Vf: "3DSTATE_VF" {
        header: Header::common(0, 0x0c),
        length(hw): 2,
        indexed_draw_cut_index_enable: bool => 0[8],
        cut_index: u32 => 1,
    }
}

packet! {
    pub struct Primitive3d: "3DPRIMITIVE" {
        header: Header::render(3, 0),
        length(hw): 7,
        predicate_enable: bool => 0[8],
        indirect_parameter_enable: bool => 0[10],
        primitive_topology_type: u32 => 1[0..=5],
        vertex_access_type: u32 => 1[8],
        end_offset_enable: bool => 1[9],
        vertex_count_per_instance: u32 => 2,
        start_vertex_location: u32 => 3,
        instance_count: u32 => 4,
        start_instance_location: u32 => 5,
        base_vertex_location: i32 => 6,
    }
}

impl Primitive3d {
    pub const SEQUENTIAL: u32 = 0;
    pub const RANDOM: u32 = 1;
}

packet! {
    pub struct MediaVfeState: "MEDIA_VFE_STATE" {
        header: Header::media(0, 0),
        length(hw): 9,
        per_thread_scratch_space: u32 => 1[0..=3],
        scratch_space_base_pointer: Address => 1[10..=47],
        reset_gateway_timer: bool => 3[7],
        number_of_urb_entries: u32 => 3[8..=15],
        maximum_number_of_threads: u32 => 3[16..=31],
        curbe_allocation_size: u32 => 5[0..=15],
        urb_entry_allocation_size: u32 => 5[16..=31],
    }
}

packet! {
    pub struct MediaInterfaceDescriptorLoad: "MEDIA_INTERFACE_DESCRIPTOR_LOAD" {
        header: Header::media(0, 2),
        length(hw): 4,
        interface_descriptor_total_length: u32 => 2[0..=16],
        interface_descriptor_data_start_address: Address => 3[0..=31],
    }
}

packet! {
    pub struct MediaStateFlush: "MEDIA_STATE_FLUSH" {
        header: Header::media(0, 4),
        length(hw): 2,
        interface_descriptor_offset: u32 => 1[0..=5],
        watermark_required: bool => 1[6],
    }
}

packet! {
    pub struct GpgpuWalker: "GPGPU_WALKER" {
        header: Header::media(1, 5),
        length(hw): 15,
        predicate_enable: bool => 0[8],
        indirect_parameter_enable: bool => 0[10],
        interface_descriptor_offset: u32 => 1[0..=5],
        thread_width_counter_maximum: u32 => 4[0..=5],
        thread_height_counter_maximum: u32 => 4[8..=13],
        thread_depth_counter_maximum: u32 => 4[16..=21],
        simd_size: u32 => 4[30..=31],
        thread_group_id_starting_x: u32 => 5,
        thread_group_id_x_dimension: u32 => 7,
        thread_group_id_starting_y: u32 => 8,
        thread_group_id_y_dimension: u32 => 10,
        thread_group_id_starting_resume_z: u32 => 11,
        thread_group_id_z_dimension: u32 => 12,
        right_execution_mask: u32 => 13,
        bottom_execution_mask: u32 => 14,
    }
}

impl GpgpuWalker {
    pub const SIMD8: u32 = 0;
    pub const SIMD16: u32 = 1;
    pub const SIMD32: u32 = 2;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{extract, pack, Builder};
    use smallvec::smallvec;

    #[test]
    fn per_stage_sub_opcodes() {
        let words = Builder::with(Gen::Gen9, Constant::for_stage(ShaderStage::Fragment)).finish();
        assert_eq!(extract(&words, 0, 16, 23), 23);
        assert_eq!(words[0] & 0xff, 9);

        let words = Builder::with(
            Gen::Gen9,
            BindingTablePointers::for_stage(ShaderStage::Geometry),
        )
        .finish();
        assert_eq!(extract(&words, 0, 16, 23), 41);

        let words = Builder::with(
            Gen::Gen9,
            SamplerStatePointers::for_stage(ShaderStage::Vertex),
        )
        .finish();
        assert_eq!(extract(&words, 0, 16, 23), 43);
    }

    #[test]
    fn sbe_swiz_packs_pairs() {
        let mut swiz = SbeSwiz::default();
        swiz.attributes[0].source_attribute = 1;
        swiz.attributes[1].source_attribute = 2;
        swiz.attributes[1].component_override = 0xf;
        swiz.wrap_shortest_enables[9] = 0x3;

        let words = Builder::with(Gen::Gen9, swiz).finish();
        assert_eq!(words.len(), 11);
        assert_eq!(words[1], 1 | (2 | 0xf << 12) << 16);
        assert_eq!(words[10], 0x3 << 4);
    }

    #[test]
    fn empty_vertex_buffers_emit_a_null_buffer() {
        let words = Builder::<VertexBuffers>::new(Gen::Gen9).finish();

        assert_eq!(words.len(), 5);
        assert_eq!(words[1], 1 << 13 | 1 << 14);
    }

    #[test]
    fn vertex_elements_are_nested() {
        let words = Builder::with(
            Gen::Gen9,
            VertexElements {
                elements: smallvec![
                    VertexElementState {
                        valid: true,
                        ..Default::default()
                    },
                    VertexElementState {
                        vertex_buffer_index: 1,
                        valid: true,
                        source_element_offset: 16,
                        ..Default::default()
                    },
                ],
            },
        )
        .finish();

        assert_eq!(words.len(), 5);
        assert_eq!(words[0] & 0xff, 3);
        assert_eq!(words[3], 1 << 26 | 1 << 25 | 16);
    }

    #[test]
    fn primitive_base_vertex_is_signed() {
        let words = pack::<Primitive3d>(Gen::Gen9, |prim| {
            prim.base_vertex_location = -2;
        });

        assert_eq!(words[6], (-2i32) as u32);
    }
}
