//! Encoding of draws.
//!
//! A draw walks the dirty mask in a fixed order, encodes every marked group, appends the
//! `3DPRIMITIVE` and clears what it encoded. Groups that aren't marked are left alone: the
//! hardware context still holds what was last emitted for them.

use super::{sbe::emit_sbe, upload_dynamic, urb, Context, DrawError, Shaders, Viewport};
use crate::{
    alloc::AllocError,
    bo::{Bo, BoId},
    cso::stream_output::{null_so_buffer, MAX_SO_BUFFERS},
    dirty::DirtyFlags,
    packet::{
        cmd::{
            BindingTablePointers, BlendStatePointers, CcStatePointers, ClearParams, Clip,
            Constant, DepthBuffer, Ds, Gs, HierDepthBuffer, Hs, IndexBuffer, Multisample,
            PolyStipplePattern, Primitive3d, PsBlend, SampleMask, SamplerStatePointers,
            ScissorStatePointers, StencilBuffer, Streamout, Te, Vf, VfSgvs, VfTopology,
            VertexBuffers, ViewportStatePointersCc, ViewportStatePointersSfClip, Wm,
            WmDepthStencil,
        },
        merge, pack,
        state::{BlendState as BlendStateRecord, ColorCalcState, VertexBufferState},
        Address, Builder, MOCS_WB,
    },
    program_cache::{CompiledShader, FsProgData, VueMap},
    Gen, Pipeline, ShaderStage, STAGE_COUNT,
};
use smallvec::SmallVec;
use std::sync::Arc;

/// Batch space a draw may take at most, in bytes.
const DRAW_SPACE: usize = 1500 * 4;

/// The `3DSTATE_WM` barycentric modes that interpolate without perspective correction.
const NONPERSPECTIVE_BARYCENTRIC_MODES: u32 = 0x38;

const REORDER_TRAILING: u32 = 1;

const PIXLOC_CENTER: u32 = 0;
const PIXLOC_UL_CORNER: u32 = 1;

/// How vertices are assembled into primitives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PrimitiveMode {
    Points,
    LineList,
    LineStrip,
    LineLoop,
    #[default]
    TriangleList,
    TriangleStrip,
    TriangleFan,
    Quads,
    QuadStrip,
    /// Patches of [`DrawInfo::vertices_per_patch`] control points.
    Patches,
}

impl PrimitiveMode {
    /// Returns the `_3DPRIM_*` topology.
    ///
    /// # Panics
    ///
    /// - Panics if `self` is [`PrimitiveMode::Patches`] and `vertices_per_patch` is not within
    ///   1..=32.
    pub fn to_hw(self, vertices_per_patch: u32) -> u32 {
        match self {
            PrimitiveMode::Points => 0x01,
            PrimitiveMode::LineList => 0x02,
            PrimitiveMode::LineStrip => 0x03,
            PrimitiveMode::TriangleList => 0x04,
            PrimitiveMode::TriangleStrip => 0x05,
            PrimitiveMode::TriangleFan => 0x06,
            PrimitiveMode::Quads => 0x07,
            PrimitiveMode::QuadStrip => 0x08,
            PrimitiveMode::LineLoop => 0x10,
            PrimitiveMode::Patches => {
                assert!((1..=32).contains(&vertices_per_patch));

                0x20 + vertices_per_patch - 1
            }
        }
    }
}

/// The index buffer of an indexed draw.
#[derive(Clone, Debug)]
pub struct IndexBufferInfo {
    pub bo: Arc<Bo>,
    pub offset: u32,
    /// The size of one index in bytes: 1, 2 or 4.
    pub index_size: u32,
}

/// Parameters of a draw.
#[derive(Clone, Debug)]
pub struct DrawInfo {
    pub mode: PrimitiveMode,
    /// The first vertex, or the first index of an indexed draw.
    pub start: u32,
    pub count: u32,
    pub index: Option<IndexBufferInfo>,
    /// Added to every index of an indexed draw.
    pub index_bias: i32,
    /// The default value is 1.
    pub instance_count: u32,
    pub start_instance: u32,
    pub primitive_restart: bool,
    pub restart_index: u32,
    pub vertices_per_patch: u32,
}

impl Default for DrawInfo {
    #[inline]
    fn default() -> Self {
        DrawInfo {
            mode: PrimitiveMode::default(),
            start: 0,
            count: 0,
            index: None,
            index_bias: 0,
            instance_count: 1,
            start_instance: 0,
            primitive_restart: false,
            restart_index: 0,
            vertices_per_patch: 0,
        }
    }
}

/// What the vertex fetcher was last set up with. These are per-draw parameters rather than
/// bound state, so they are compared with the draw instead of being marked.
#[derive(Debug, Default)]
pub(super) struct VfCache {
    topology: Option<u32>,
    index_buffer: Option<(BoId, u32, u32)>,
    index_bo: Option<Arc<Bo>>,
    cut: Option<(bool, u32)>,
}

impl Context {
    /// Encodes a draw into the current batch.
    ///
    /// Draws without vertices or instances encode nothing. On error nothing is considered
    /// encoded, so the next draw starts over from the same dirty mask.
    pub fn draw_vbo(&mut self, info: &DrawInfo) -> Result<(), DrawError> {
        if info.count == 0 || info.instance_count == 0 {
            tracing::trace!(count = info.count, instances = info.instance_count, "empty draw");

            return Ok(());
        }

        self.encode_draw(info).inspect_err(|err| {
            tracing::warn!(%err, "failed to encode draw");
        })
    }

    fn encode_draw(&mut self, info: &DrawInfo) -> Result<(), DrawError> {
        self.recover_lost_batch();

        let shaders = self.bound_shaders();

        for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
            if shaders[stage.index()].is_none() {
                return Err(DrawError::MissingShader(stage));
            }
        }

        let Some(fs) = shaders[ShaderStage::Fragment.index()]
            .as_ref()
            .and_then(|fs| fs.prog_data().fs())
        else {
            return Err(DrawError::MissingShader(ShaderStage::Fragment));
        };

        let ib_size = info
            .index
            .as_ref()
            .map(|index| {
                let size = index.bo.size();

                index_buffer_size(size, index.offset).ok_or(DrawError::IndexOffsetOutOfBounds {
                    offset: index.offset,
                    size,
                })
            })
            .transpose()?;

        self.batch.require_space(DRAW_SPACE)?;

        let bt_sizes: [u32; STAGE_COUNT] = std::array::from_fn(|i| {
            shaders[i]
                .as_ref()
                .map_or(0, |shader| shader.prog_data().binding_table_size)
        });
        self.binder.reserve_stages(
            &ShaderStage::RENDER,
            bt_sizes,
            &mut self.dirty,
            &mut *self.provider,
            &mut self.batch,
        )?;

        self.restore_saved_bos(&shaders);
        self.flush_caches_for_draw();

        if self.batch.pipeline() == Pipeline::Compute {
            self.select_pipeline(Pipeline::Render);
        }

        self.mark_vertex_fetch(info);

        let dirty = self.dirty.bits();

        self.emit_viewports(dirty)?;

        if dirty.intersects(DirtyFlags::URB) {
            let entry_sizes = urb::URB_STAGES.map(|stage| {
                shaders[stage.index()].as_ref().map(|shader| {
                    shader
                        .prog_data()
                        .vue()
                        .map_or(1, |vue| vue.urb_entry_size)
                })
            });
            let config = urb::urb_config(self.hw, entry_sizes);
            self.batch.emit(&urb::emit_urb_config(self.hw, &config));
        }

        self.emit_blend_and_color_calc(dirty)?;
        self.emit_constants(dirty, &shaders);
        self.emit_bindings(dirty, &bt_sizes);
        self.emit_sampler_pointers(dirty, &shaders);
        self.emit_multisample(dirty);
        self.emit_shaders(dirty, &shaders);

        let vue_map = last_vue_map(&shaders);

        self.emit_stream_output(dirty, vue_map);
        self.emit_raster(dirty, fs, vue_map)?;
        self.emit_depth_buffer(dirty);
        self.emit_stipples(dirty);
        self.emit_vertex_fetch(dirty, info, ib_size);
        self.emit_primitive(info);

        self.dirty
            .clear(DirtyFlags::RENDER | (dirty & DirtyFlags::SO_BUFFERS));

        tracing::trace!(?dirty, "encoded draw");

        Ok(())
    }

    /// Pins the buffer objects that state encoded into an earlier batch points at, for the
    /// groups that won't be encoded again.
    pub(super) fn restore_render_bos(&mut self, shaders: &Shaders) {
        let dirty = self.dirty.bits();
        let clean = |flags: DirtyFlags| !dirty.intersects(flags);
        let batch = &mut self.batch;

        for stage in ShaderStage::RENDER {
            let i = stage.index();

            if clean(DirtyFlags::shader(stage)) {
                if let Some(shader) = &shaders[i] {
                    batch.use_bo(shader.bo(), false);
                }
            }

            if clean(DirtyFlags::sampler_states(stage)) {
                if let Some(table) = &self.state.sampler_tables[i] {
                    batch.use_bo(&table.bo, false);

                    if let Some(border_bo) = &table.border_bo {
                        batch.use_bo(border_bo, false);
                    }
                }
            }

            if clean(DirtyFlags::constants(stage)) {
                let workaround_bo = batch.workaround_bo().clone();
                batch.use_bo(&workaround_bo, false);

                for cbuf in self.state.constant_buffers[i].iter().flatten() {
                    batch.use_bo(&cbuf.bo, false);
                }
            }

            if clean(DirtyFlags::bindings(stage)) {
                batch.use_bo(self.binder.bo(), false);

                for view in self.state.sampler_views[i].iter().flatten() {
                    batch.use_bo(&view.bo, false);
                    batch.use_bo(&view.surface_state.bo, false);
                }

                for cbuf in self.state.constant_buffers[i].iter().flatten() {
                    batch.use_bo(&cbuf.bo, false);
                    batch.use_bo(&cbuf.surface_state.bo, false);
                }

                if stage == ShaderStage::Fragment {
                    for cbuf in self.state.framebuffer.cbufs.iter().flatten() {
                        batch.use_bo(&cbuf.bo, true);
                        batch.use_bo(&cbuf.surface_state.bo, false);
                        batch.render_cache_add_bo(&cbuf.bo, cbuf.format);
                    }
                }
            }
        }

        let dynamic_bos = [
            (DirtyFlags::CC_VIEWPORT, &self.dynamic_bos.cc_viewport),
            (DirtyFlags::SF_CL_VIEWPORT, &self.dynamic_bos.sf_clip_viewport),
            (DirtyFlags::BLEND_STATE, &self.dynamic_bos.blend_state),
            (DirtyFlags::COLOR_CALC_STATE, &self.dynamic_bos.color_calc_state),
            (DirtyFlags::SCISSOR_RECT, &self.dynamic_bos.scissor_rect),
        ];

        for (flags, bo) in dynamic_bos {
            if let (true, Some(bo)) = (clean(flags), bo) {
                batch.use_bo(bo, false);
            }
        }

        if clean(DirtyFlags::DEPTH_BUFFER) {
            if let Some(zs) = &self.state.framebuffer.zsbuf {
                for bo in zs.bos() {
                    batch.use_bo(bo, true);
                    batch.depth_cache_add_bo(bo);
                }
            }
        }

        if clean(DirtyFlags::VERTEX_BUFFERS) {
            for vb in self.state.vertex_buffers.iter().flatten() {
                batch.use_bo(&vb.bo, false);
            }
        }

        if clean(DirtyFlags::INDEX_BUFFER) {
            if let Some(bo) = &self.vf_cache.index_bo {
                batch.use_bo(bo, false);
            }
        }

        if clean(DirtyFlags::SO_BUFFERS) {
            for &handle in &self.state.so_targets {
                batch.use_bo(&self.stream_output_targets[handle].bo, true);
            }
        }
    }

    /// Flushes the caches that rendering or depth testing left data in, for everything the draw
    /// is about to read or write through another cache.
    fn flush_caches_for_draw(&mut self) {
        for views in &self.state.sampler_views {
            for view in views.iter().flatten() {
                self.batch.cache_flush_for_read(&view.bo);
            }
        }

        for cbuf in self.state.framebuffer.cbufs.iter().flatten() {
            self.batch.cache_flush_for_render(&cbuf.bo, cbuf.format);
        }

        if let Some(zs) = &self.state.framebuffer.zsbuf {
            for bo in zs.bos() {
                self.batch.cache_flush_for_depth(bo);
            }
        }
    }

    /// Marks the vertex fetch groups whose per-draw parameters changed.
    fn mark_vertex_fetch(&mut self, info: &DrawInfo) {
        let topology = info.mode.to_hw(info.vertices_per_patch);

        if self.vf_cache.topology != Some(topology) {
            self.dirty.mark(DirtyFlags::VF_TOPOLOGY);
        }

        if let Some(index) = &info.index {
            let key = (index.bo.id(), index.offset, index.index_size);

            if self.vf_cache.index_buffer != Some(key) {
                self.dirty.mark(DirtyFlags::INDEX_BUFFER);
            }
        }
    }

    fn emit_viewports(&mut self, dirty: DirtyFlags) -> Result<(), AllocError> {
        let hw = self.hw;
        let count = self.state.viewports.len().max(1);

        if dirty.intersects(DirtyFlags::CC_VIEWPORT) {
            let dsa = &self.depth_stencil_alpha_states[self.state.depth_stencil_alpha];
            let words: SmallVec<[u32; 32]> = dsa
                .cc_viewport
                .iter()
                .copied()
                .cycle()
                .take(dsa.cc_viewport.len() * count)
                .collect();

            let (bo, pointer) = upload_dynamic(
                &mut self.dynamic,
                &mut *self.provider,
                &mut self.batch,
                &words,
                32,
            )?;
            self.batch.emit(&pack::<ViewportStatePointersCc>(hw, |ptr| {
                ptr.cc_viewport_pointer = Address::from(pointer);
            }));
            self.dynamic_bos.cc_viewport = Some(bo);
        }

        if dirty.intersects(DirtyFlags::SF_CL_VIEWPORT) {
            let fb = &self.state.framebuffer;
            let mut words = SmallVec::<[u32; 64]>::new();

            // Without viewports, draw to the whole framebuffer.
            if self.state.viewports.is_empty() {
                let (half_width, half_height) = (fb.width as f32 / 2.0, fb.height as f32 / 2.0);
                let vp = Viewport {
                    scale: [half_width, half_height, 0.5],
                    translate: [half_width, half_height, 0.5],
                };
                words.extend(vp.sf_clip_viewport(hw, fb.width, fb.height));
            }

            for vp in &self.state.viewports {
                words.extend(vp.sf_clip_viewport(hw, fb.width, fb.height));
            }

            let (bo, pointer) = upload_dynamic(
                &mut self.dynamic,
                &mut *self.provider,
                &mut self.batch,
                &words,
                64,
            )?;
            self.batch.emit(&pack::<ViewportStatePointersSfClip>(hw, |ptr| {
                ptr.sf_clip_viewport_pointer = Address::from(pointer);
            }));
            self.dynamic_bos.sf_clip_viewport = Some(bo);
        }

        Ok(())
    }

    fn emit_blend_and_color_calc(&mut self, dirty: DirtyFlags) -> Result<(), AllocError> {
        let hw = self.hw;
        let dsa = &self.depth_stencil_alpha_states[self.state.depth_stencil_alpha];

        if dirty.intersects(DirtyFlags::BLEND_STATE) {
            let blend = &self.blend_states[self.state.blend];
            let rt_count = self.state.framebuffer.cbufs.len().max(1);

            let alpha = pack::<BlendStateRecord>(hw, |bs| {
                bs.alpha_test_enable = dsa.alpha.enabled;
                bs.alpha_test_function = dsa.alpha.func.to_hw();
            });

            let mut words = SmallVec::<[u32; 32]>::new();
            words.push(blend.header() | alpha[0]);

            for i in 0..rt_count {
                words.extend_from_slice(blend.entry(i));
            }

            let (bo, pointer) = upload_dynamic(
                &mut self.dynamic,
                &mut *self.provider,
                &mut self.batch,
                &words,
                64,
            )?;
            self.batch.emit(&pack::<BlendStatePointers>(hw, |ptr| {
                ptr.blend_state_pointer = Address::from(pointer);
                ptr.blend_state_pointer_valid = true;
            }));
            self.dynamic_bos.blend_state = Some(bo);
        }

        if dirty.intersects(DirtyFlags::COLOR_CALC_STATE) {
            let [red, green, blue, alpha] = self.state.blend_color;
            let [front, back] = self.state.stencil_ref;

            let mut cc = Builder::<ColorCalcState>::new(hw);
            cc.alpha_test_format = ColorCalcState::ALPHATEST_FLOAT32;
            cc.alpha_reference_value_as_float32 = dsa.alpha.ref_value;
            cc.blend_constant_color_red = red;
            cc.blend_constant_color_green = green;
            cc.blend_constant_color_blue = blue;
            cc.blend_constant_color_alpha = alpha;

            if hw == Gen::Gen8 {
                cc.stencil_reference_value = front.into();
                cc.backface_stencil_reference_value = if dsa.two_sided_stencil {
                    back.into()
                } else {
                    front.into()
                };
            }

            let (bo, pointer) = upload_dynamic(
                &mut self.dynamic,
                &mut *self.provider,
                &mut self.batch,
                &cc.finish(),
                64,
            )?;
            self.batch.emit(&pack::<CcStatePointers>(hw, |ptr| {
                ptr.color_calc_state_pointer = Address::from(pointer);
                ptr.color_calc_state_pointer_valid = true;
            }));
            self.dynamic_bos.color_calc_state = Some(bo);
        }

        Ok(())
    }

    /// Emits the push constant commands.
    ///
    /// The pushed ranges fill the four constant buffer slots of the command from the last one
    /// down, which is what the compiler expects when fewer than four are used.
    fn emit_constants(&mut self, dirty: DirtyFlags, shaders: &Shaders) {
        for stage in ShaderStage::RENDER {
            let i = stage.index();

            if !dirty.intersects(DirtyFlags::constants(stage)) {
                continue;
            }

            let Some(shader) = &shaders[i] else {
                continue;
            };

            let mut constant = Builder::with(self.hw, Constant::for_stage(stage));
            let mut slot = 3;

            for range in shader.prog_data().ubo_ranges.iter().rev() {
                if range.length == 0 {
                    continue;
                }

                let cbuf = self.state.constant_buffers[i]
                    .get(range.block as usize)
                    .and_then(Option::as_ref);

                // A range of an unbound buffer reads the workaround BO, which is never written.
                let address = match cbuf {
                    Some(cbuf) => {
                        self.batch.use_bo(&cbuf.bo, false);

                        cbuf.bo.address() + u64::from(cbuf.offset + range.start * 32)
                    }
                    None => {
                        let bo = self.batch.workaround_bo().clone();
                        self.batch.use_bo(&bo, false);

                        bo.address()
                    }
                };

                set_constant_range(&mut constant, slot, range.length, Address(address));
                slot = slot.saturating_sub(1);
            }

            self.batch.emit(&constant.finish());
        }
    }

    fn emit_bindings(&mut self, dirty: DirtyFlags, bt_sizes: &[u32; STAGE_COUNT]) {
        for stage in ShaderStage::RENDER {
            if !dirty.intersects(DirtyFlags::bindings(stage)) {
                continue;
            }

            let offset = self.binder.bt_offset(stage);

            if offset != 0 {
                let entries = self.binding_table_entries(stage, bt_sizes[stage.index()] / 4);
                self.binder.write_table(stage, &entries);
            }

            let mut btp = Builder::with(self.hw, BindingTablePointers::for_stage(stage));
            btp.binding_table_pointer = Address::from(offset);
            self.batch.emit(&btp.finish());
        }
    }

    /// Returns the surface state pointers of the binding table of `stage`, and pins what they
    /// point at.
    ///
    /// The fragment stage's table starts with the color buffers, at least one. Then come the
    /// sampler views and the constant buffers.
    pub(super) fn binding_table_entries(
        &mut self,
        stage: ShaderStage,
        count: u32,
    ) -> SmallVec<[u32; 32]> {
        let i = stage.index();
        let batch = &mut self.batch;
        let mut entries = SmallVec::new();

        if stage == ShaderStage::Fragment {
            let fb = &self.state.framebuffer;

            if fb.cbufs.is_empty() {
                entries.push(0);
            }

            for cbuf in &fb.cbufs {
                let Some(cbuf) = cbuf else {
                    entries.push(0);
                    continue;
                };

                batch.use_bo(&cbuf.bo, true);
                batch.use_bo(&cbuf.surface_state.bo, false);
                batch.render_cache_add_bo(&cbuf.bo, cbuf.format);
                entries.push(cbuf.surface_state.pointer());
            }
        }

        for view in &self.state.sampler_views[i] {
            let Some(view) = view else {
                entries.push(0);
                continue;
            };

            batch.use_bo(&view.bo, false);
            batch.use_bo(&view.surface_state.bo, false);
            entries.push(view.surface_state.pointer());
        }

        for cbuf in &self.state.constant_buffers[i] {
            let Some(cbuf) = cbuf else {
                entries.push(0);
                continue;
            };

            batch.use_bo(&cbuf.bo, false);
            batch.use_bo(&cbuf.surface_state.bo, false);
            entries.push(cbuf.surface_state.pointer());
        }

        entries.resize(count as usize, 0);

        entries
    }

    fn emit_sampler_pointers(&mut self, dirty: DirtyFlags, shaders: &Shaders) {
        for stage in ShaderStage::RENDER {
            let i = stage.index();

            if !dirty.intersects(DirtyFlags::sampler_states(stage)) || shaders[i].is_none() {
                continue;
            }

            let pointer = match &self.state.sampler_tables[i] {
                Some(table) => {
                    self.batch.use_bo(&table.bo, false);

                    if let Some(border_bo) = &table.border_bo {
                        self.batch.use_bo(border_bo, false);
                    }

                    table.pointer
                }
                None => 0,
            };

            let mut ssp = Builder::with(self.hw, SamplerStatePointers::for_stage(stage));
            ssp.sampler_state_pointer = Address::from(pointer);
            self.batch.emit(&ssp.finish());
        }
    }

    fn emit_multisample(&mut self, dirty: DirtyFlags) {
        let hw = self.hw;

        if dirty.intersects(DirtyFlags::MULTISAMPLE) {
            let rast = &self.rasterizer_states[self.state.rasterizer];
            let samples = self.state.framebuffer.samples.max(1);

            self.batch.emit(&pack::<Multisample>(hw, |ms| {
                ms.number_of_multisamples = samples.ilog2();
                ms.pixel_location = if rast.half_pixel_center {
                    PIXLOC_CENTER
                } else {
                    PIXLOC_UL_CORNER
                };
            }));
        }

        if dirty.intersects(DirtyFlags::SAMPLE_MASK) {
            let mask = (self.state.sample_mask & 0xffff).max(1);

            self.batch.emit(&pack::<SampleMask>(hw, |sm| sm.sample_mask = mask));
        }
    }

    /// Emits the shader unit commands. A tessellation or geometry stage without a program is
    /// turned off with zeroed commands.
    fn emit_shaders(&mut self, dirty: DirtyFlags, shaders: &Shaders) {
        let hw = self.hw;
        let shader = |stage: ShaderStage| shaders[stage.index()].as_ref();

        if dirty.intersects(DirtyFlags::VS) {
            if let Some(vs) = shader(ShaderStage::Vertex) {
                self.emit_derived(vs);
            }
        }

        if dirty.intersects(DirtyFlags::TCS | DirtyFlags::TES) {
            match shader(ShaderStage::TessEval) {
                Some(tes) => {
                    match shader(ShaderStage::TessControl) {
                        Some(tcs) => self.emit_derived(tcs),
                        None => self.batch.emit(&pack::<Hs>(hw, |_| {})),
                    }

                    self.emit_derived(tes);
                }
                None => {
                    self.batch.emit(&pack::<Hs>(hw, |_| {}));
                    self.batch.emit(&pack::<Te>(hw, |_| {}));
                    self.batch.emit(&pack::<Ds>(hw, |_| {}));
                }
            }
        }

        if dirty.intersects(DirtyFlags::GS) {
            match shader(ShaderStage::Geometry) {
                Some(gs) => self.emit_derived(gs),
                None => self.batch.emit(&pack::<Gs>(hw, |_| {})),
            }
        }

        if dirty.intersects(DirtyFlags::FS) {
            if let Some(fs) = shader(ShaderStage::Fragment) {
                self.emit_derived(fs);
            }
        }
    }

    #[inline]
    fn emit_derived(&mut self, shader: &CompiledShader) {
        self.batch.use_bo(shader.bo(), false);
        self.batch.emit(shader.derived());
    }

    fn emit_stream_output(&mut self, dirty: DirtyFlags, vue_map: Option<&VueMap>) {
        let hw = self.hw;
        let targets = &self.state.so_targets;

        if dirty.intersects(DirtyFlags::STREAMOUT) {
            let mut so = Builder::<Streamout>::new(hw);

            if !targets.is_empty() {
                let slots = vue_map.map_or(1, VueMap::num_slots) as u32;

                so.so_function_enable = true;
                so.so_statistics_enable = true;
                so.reorder_mode = REORDER_TRAILING;
                so.stream_0_vertex_read_length = slots.div_ceil(2).saturating_sub(1);

                let pitch = |i: usize| {
                    targets
                        .get(i)
                        .map_or(0, |&handle| self.stream_output_targets[handle].stride)
                };
                so.buffer_0_surface_pitch = pitch(0);
                so.buffer_1_surface_pitch = pitch(1);
                so.buffer_2_surface_pitch = pitch(2);
                so.buffer_3_surface_pitch = pitch(3);
            }

            self.batch.emit(&so.finish());
        }

        if dirty.intersects(DirtyFlags::SO_BUFFERS) {
            for i in 0..MAX_SO_BUFFERS {
                let words = match targets.get(i) {
                    Some(&handle) => {
                        let target = &self.stream_output_targets[handle];
                        self.batch.use_bo(&target.bo, true);

                        target.so_buffer(hw, i as u32, self.state.so_zero_offset[i])
                    }
                    None => null_so_buffer(hw, i as u32),
                };

                self.batch.emit(&words);
            }

            self.state.so_zero_offset = [false; MAX_SO_BUFFERS];
        }
    }

    /// Emits the clipper, rasterizer and pixel backend commands, merging in the fields that
    /// depend on state bound through other objects.
    fn emit_raster(
        &mut self,
        dirty: DirtyFlags,
        fs: &FsProgData,
        vue_map: Option<&VueMap>,
    ) -> Result<(), AllocError> {
        let hw = self.hw;
        let rast = &self.rasterizer_states[self.state.rasterizer];
        let dsa = &self.depth_stencil_alpha_states[self.state.depth_stencil_alpha];
        let fb = &self.state.framebuffer;

        if dirty.intersects(DirtyFlags::CLIP) {
            let mut cl = Builder::<Clip>::new(hw);
            cl.non_perspective_barycentric_enable =
                fs.barycentric_interp_modes & NONPERSPECTIVE_BARYCENTRIC_MODES != 0;
            cl.force_zero_rta_index_enable = fb.layers == 0;
            cl.maximum_vp_index = self.state.viewports.len().max(1) as u32 - 1;

            self.batch.emit(&merge(&rast.clip, &cl.finish()));
        }

        if dirty.intersects(DirtyFlags::RASTER) {
            self.batch.emit(&rast.raster);
            self.batch.emit(&rast.sf);
        }

        if dirty.intersects(DirtyFlags::WM) {
            let mut wm = Builder::<Wm>::new(hw);
            wm.barycentric_interpolation_mode = fs.barycentric_interp_modes & 0x3f;
            wm.early_depth_stencil_control = if fs.early_fragment_tests {
                Wm::EDSC_PREPS
            } else if fs.has_side_effects {
                Wm::EDSC_PSEXEC
            } else {
                Wm::EDSC_NORMAL
            };

            self.batch.emit(&merge(&rast.wm, &wm.finish()));
        }

        if dirty.intersects(DirtyFlags::SBE) {
            let empty = VueMap::default();
            self.batch
                .emit(&emit_sbe(hw, fs, vue_map.unwrap_or(&empty), rast));
        }

        if dirty.intersects(DirtyFlags::PS_BLEND) {
            let blend = &self.blend_states[self.state.blend];
            let mut pb = Builder::<PsBlend>::new(hw);
            pb.has_writeable_rt = fb.has_color_buffer();
            pb.alpha_test_enable = dsa.alpha.enabled;

            self.batch.emit(&merge(&blend.ps_blend, &pb.finish()));
        }

        if dirty.intersects(DirtyFlags::WM_DEPTH_STENCIL) {
            let mut wmds = Builder::<WmDepthStencil>::new(hw);

            if hw >= Gen::Gen9 {
                let [front, back] = self.state.stencil_ref;
                wmds.stencil_reference_value = front.into();
                wmds.backface_stencil_reference_value = back.into();
            }

            self.batch.emit(&merge(&dsa.wmds, &wmds.finish()));
        }

        if dirty.intersects(DirtyFlags::SCISSOR_RECT) {
            let count = self.state.viewports.len().max(1);
            let words: SmallVec<[u32; 32]> = self.state.scissors[..count]
                .iter()
                .flat_map(|scissor| scissor.encode(hw))
                .collect();

            let (bo, pointer) = upload_dynamic(
                &mut self.dynamic,
                &mut *self.provider,
                &mut self.batch,
                &words,
                32,
            )?;
            self.batch.emit(&pack::<ScissorStatePointers>(hw, |ptr| {
                ptr.scissor_rect_pointer = Address::from(pointer);
            }));
            self.dynamic_bos.scissor_rect = Some(bo);
        }

        Ok(())
    }

    fn emit_depth_buffer(&mut self, dirty: DirtyFlags) {
        if !dirty.intersects(DirtyFlags::DEPTH_BUFFER) {
            return;
        }

        let hw = self.hw;
        let dsa = &self.depth_stencil_alpha_states[self.state.depth_stencil_alpha];
        let fb = &self.state.framebuffer;
        let zs = fb.zsbuf.as_ref();
        let hiz = zs.and_then(|zs| zs.hiz.as_ref());
        let stencil = zs.and_then(|zs| zs.stencil.as_ref());

        let mut db = Builder::<DepthBuffer>::new(hw);

        match zs.and_then(|zs| zs.depth.as_ref()) {
            Some(depth) => {
                let layers = fb.layers.max(1) - 1;

                db.surface_type = DepthBuffer::SURFTYPE_2D;
                db.surface_format = depth.format.to_hw();
                db.surface_pitch = depth.pitch - 1;
                db.surface_base_address = Address(depth.bo.address());
                db.width = fb.width.max(1) - 1;
                db.height = fb.height.max(1) - 1;
                db.depth = layers;
                db.render_target_view_extent = layers;
                db.surface_qpitch = depth.qpitch >> 2;
                db.mocs = MOCS_WB;
                db.depth_write_enable = dsa.writes_depth;
                db.hierarchical_depth_buffer_enable = hiz.is_some();
            }
            None => {
                db.surface_type = DepthBuffer::SURFTYPE_NULL;
                db.surface_format = DepthBuffer::D32_FLOAT;
            }
        }

        db.stencil_write_enable = dsa.writes_stencil && stencil.is_some();

        let mut hz = Builder::<HierDepthBuffer>::new(hw);

        if let Some(hiz) = hiz {
            hz.surface_pitch = hiz.pitch - 1;
            hz.mocs = MOCS_WB;
            hz.surface_base_address = Address(hiz.bo.address());
            hz.surface_qpitch = hiz.qpitch >> 2;
        }

        let mut sb = Builder::<StencilBuffer>::new(hw);

        if let Some(stencil) = stencil {
            sb.stencil_buffer_enable = true;
            sb.surface_pitch = stencil.pitch - 1;
            sb.mocs = MOCS_WB;
            sb.surface_base_address = Address(stencil.bo.address());
            sb.surface_qpitch = stencil.qpitch >> 2;
        }

        let clear = pack::<ClearParams>(hw, |cp| {
            cp.depth_clear_value = zs.map_or(0.0, |zs| zs.clear_value);
            cp.depth_clear_value_valid = hiz.is_some();
        });

        self.batch.emit(&db.finish());
        self.batch.emit(&hz.finish());
        self.batch.emit(&sb.finish());
        self.batch.emit(&clear);

        if let Some(zs) = zs {
            for bo in zs.bos() {
                self.batch.use_bo(bo, true);
                self.batch.depth_cache_add_bo(bo);
            }
        }
    }

    fn emit_stipples(&mut self, dirty: DirtyFlags) {
        if dirty.intersects(DirtyFlags::LINE_STIPPLE) {
            let rast = &self.rasterizer_states[self.state.rasterizer];
            self.batch.emit(&rast.line_stipple);
        }

        if dirty.intersects(DirtyFlags::POLYGON_STIPPLE) {
            let rows = self.state.poly_stipple;
            self.batch
                .emit(&pack::<PolyStipplePattern>(self.hw, |ps| ps.rows = rows));
        }
    }

    fn emit_vertex_fetch(
        &mut self,
        dirty: DirtyFlags,
        info: &DrawInfo,
        ib_size: Option<u32>,
    ) {
        let hw = self.hw;

        if dirty.intersects(DirtyFlags::VF_TOPOLOGY) {
            let topology = info.mode.to_hw(info.vertices_per_patch);

            self.batch.emit(&pack::<VfTopology>(hw, |vft| {
                vft.primitive_topology_type = topology;
            }));
            self.vf_cache.topology = Some(topology);
        }

        if let Some(index) = &info.index {
            if dirty.intersects(DirtyFlags::INDEX_BUFFER) {
                let mut ib = Builder::<IndexBuffer>::new(hw);
                ib.mocs = MOCS_WB;
                ib.index_format = IndexBuffer::format_of_size(index.index_size);
                ib.buffer_starting_address = Address(index.bo.address() + u64::from(index.offset));
                ib.buffer_size = ib_size.unwrap_or(0);

                self.batch.emit(&ib.finish());
                self.vf_cache.index_buffer = Some((index.bo.id(), index.offset, index.index_size));
                self.vf_cache.index_bo = Some(index.bo.clone());
            }

            self.batch.use_bo(&index.bo, false);
        }

        if dirty.intersects(DirtyFlags::VERTEX_BUFFERS) {
            let mut vbs = Builder::<VertexBuffers>::new(hw);

            for (i, vb) in self.state.vertex_buffers.iter().enumerate() {
                let state = match vb {
                    Some(vb) => {
                        self.batch.use_bo(&vb.bo, false);
                        vb.state(i as u32)
                    }
                    None => VertexBufferState {
                        null_vertex_buffer: true,
                        address_modify_enable: true,
                        vertex_buffer_index: i as u32,
                        ..Default::default()
                    },
                };

                vbs.buffers.push(state);
            }

            self.batch.emit(&vbs.finish());
        }

        if dirty.intersects(DirtyFlags::VERTEX_ELEMENTS) {
            let ve = &self.vertex_elements_states[self.state.vertex_elements];

            self.batch.emit(&ve.vertex_elements);

            for vi in &ve.vf_instancing {
                self.batch.emit(vi);
            }

            self.batch.emit(&pack::<VfSgvs>(hw, |_| {}));
        }

        let cut = (info.primitive_restart, info.restart_index);

        if self.vf_cache.cut != Some(cut) {
            self.batch.emit(&pack::<Vf>(hw, |vf| {
                vf.indexed_draw_cut_index_enable = info.primitive_restart;
                vf.cut_index = info.restart_index;
            }));
            self.vf_cache.cut = Some(cut);
        }
    }

    fn emit_primitive(&mut self, info: &DrawInfo) {
        let indexed = info.index.is_some();

        self.batch.emit(&pack::<Primitive3d>(self.hw, |prim| {
            prim.vertex_access_type = if indexed {
                Primitive3d::RANDOM
            } else {
                Primitive3d::SEQUENTIAL
            };
            prim.vertex_count_per_instance = info.count;
            prim.start_vertex_location = info.start;
            prim.instance_count = info.instance_count;
            prim.start_instance_location = info.start_instance;
            prim.base_vertex_location = if indexed { info.index_bias } else { 0 };
        }));
    }
}

/// Returns the output layout of the last enabled vertex-pipeline stage.
fn last_vue_map(shaders: &Shaders) -> Option<&VueMap> {
    [ShaderStage::Geometry, ShaderStage::TessEval, ShaderStage::Vertex]
        .into_iter()
        .find_map(|stage| shaders[stage.index()].as_ref())
        .and_then(|shader| shader.prog_data().vue())
        .map(|vue| &vue.vue_map)
}

fn set_constant_range(constant: &mut Constant, slot: usize, length: u32, address: Address) {
    match slot {
        0 => {
            constant.read_length_0 = length;
            constant.buffer_0 = address;
        }
        1 => {
            constant.read_length_1 = length;
            constant.buffer_1 = address;
        }
        2 => {
            constant.read_length_2 = length;
            constant.buffer_2 = address;
        }
        _ => {
            constant.read_length_3 = length;
            constant.buffer_3 = address;
        }
    }
}

/// Returns the bytes of a `bo_size`-byte index buffer past `offset`, clamped to what
/// `3DSTATE_INDEX_BUFFER` can hold, or `None` if `offset` is past the end.
fn index_buffer_size(bo_size: u64, offset: u32) -> Option<u32> {
    let size = bo_size.checked_sub(u64::from(offset))?;

    Some(u32::try_from(size).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        batch::SubmitError,
        context::{
            tests::{alloc, bind_shaders, commands, context, context_with, find, opcode},
            ConstantBuffer, ContextCreateInfo, DepthStencilView, DepthSurface, FramebufferState,
            SurfaceState,
        },
        cso::{depth_stencil::DepthStencilAlphaInfo, rasterizer::RasterizerInfo, CompareFunc},
        packet::{
            cmd::{Raster, Sf, SoBuffer},
            extract,
        },
        program_cache::{
            tests::{fs_prog_data, vs_prog_data},
            CacheId, UboRange,
        },
    };

    fn triangle() -> DrawInfo {
        DrawInfo {
            count: 3,
            ..Default::default()
        }
    }

    fn ready(hw: Gen) -> Context {
        let (mut ctx, _sink) = context(hw);
        bind_shaders(&mut ctx);
        ctx.set_viewport_states(
            0,
            &[Viewport {
                scale: [32.0, 32.0, 0.5],
                translate: [32.0, 32.0, 0.5],
            }],
        );
        ctx.set_framebuffer_state(&FramebufferState {
            width: 64,
            height: 64,
            ..Default::default()
        });

        ctx
    }

    fn opcodes(words: &[u32]) -> Vec<u32> {
        commands(words).iter().map(|command| command[0] >> 16).collect()
    }

    #[test]
    fn first_draw_encodes_everything() {
        let mut ctx = ready(Gen::Gen9);
        ctx.draw_vbo(&triangle()).unwrap();

        assert!(!ctx.dirty().is_dirty(DirtyFlags::RENDER | DirtyFlags::SO_BUFFERS));
        assert!(ctx.dirty().bits().contains(DirtyFlags::COMPUTE));
        assert!(ctx.batch().contains_draw());

        let words = ctx.batch().words();
        assert_eq!(find(words, SoBuffer::default()).len(), MAX_SO_BUFFERS);
        assert_eq!(find(words, Ds::default()).len(), 1);
        assert_eq!(find(words, Gs::default()).len(), 1);

        let prims = find(words, Primitive3d::default());
        assert_eq!(prims.len(), 1);
        assert_eq!(*commands(words).last().unwrap(), prims[0]);
        assert_eq!(extract(prims[0], 1, 8, 8), u64::from(Primitive3d::SEQUENTIAL));
        assert_eq!(prims[0][2], 3);
        assert_eq!(prims[0][4], 1);

        let topology = find(words, VfTopology::default());
        assert_eq!(topology[0][1], 4);

        // Without a depth buffer, a null one is bound.
        let depth = find(words, DepthBuffer::default());
        assert_eq!(extract(depth[0], 1, 29, 31), u64::from(DepthBuffer::SURFTYPE_NULL));
    }

    #[test]
    fn identical_draw_encodes_only_the_primitive() {
        let mut ctx = ready(Gen::Gen9);
        ctx.draw_vbo(&triangle()).unwrap();
        let before = ctx.batch().words().len();

        ctx.draw_vbo(&triangle()).unwrap();
        let words = &ctx.batch().words()[before..];

        assert_eq!(opcodes(words), [opcode(Primitive3d::default())]);
    }

    #[test]
    fn rebinding_the_rasterizer() {
        let mut ctx = ready(Gen::Gen9);
        ctx.draw_vbo(&triangle()).unwrap();
        let before = ctx.batch().words().len();

        ctx.bind_rasterizer_state(None);
        ctx.draw_vbo(&triangle()).unwrap();
        let words = &ctx.batch().words()[before..];

        assert_eq!(
            opcodes(words),
            [
                opcode(ViewportStatePointersSfClip::default()),
                opcode(Clip::default()),
                opcode(Raster::default()),
                opcode(Sf::default()),
                opcode(Primitive3d::default()),
            ],
        );
    }

    #[test]
    fn stencil_reference_is_merged() {
        let mut ctx = ready(Gen::Gen9);
        ctx.draw_vbo(&triangle()).unwrap();
        let before = ctx.batch().words().len();

        ctx.set_stencil_ref([0x12, 0x34]);
        ctx.draw_vbo(&triangle()).unwrap();
        let words = &ctx.batch().words()[before..];

        let wmds = find(words, WmDepthStencil::default());
        assert_eq!(wmds.len(), 1);
        assert_eq!(extract(wmds[0], 3, 8, 15), 0x12);
        assert_eq!(extract(wmds[0], 3, 0, 7), 0x34);
        assert_eq!(commands(words).len(), 2);
    }

    #[test]
    fn gen8_stencil_reference_is_color_calc_state() {
        let mut ctx = ready(Gen::Gen8);
        ctx.draw_vbo(&triangle()).unwrap();
        let before = ctx.batch().words().len();

        ctx.set_stencil_ref([0x12, 0x34]);
        ctx.draw_vbo(&triangle()).unwrap();
        let words = &ctx.batch().words()[before..];

        let cc = find(words, CcStatePointers::default());
        assert_eq!(cc.len(), 1);
        assert!(find(words, WmDepthStencil::default()).is_empty());

        let bo = ctx.dynamic_bos.color_calc_state.clone().unwrap();
        let pointer = (extract(cc[0], 1, 6, 31) << 6) as u32;
        let record = bo.read_dwords(pointer - bo.offset_from_base(), 6);

        // One-sided stencil uses the front reference for both faces.
        assert_eq!(extract(&record, 0, 24, 31), 0x12);
        assert_eq!(extract(&record, 0, 16, 23), 0x12);
    }

    #[test]
    fn indexed_draws() {
        let mut ctx = ready(Gen::Gen9);
        let ib = alloc(&mut ctx, "indices", 4096);
        let info = DrawInfo {
            count: 6,
            start: 2,
            index: Some(IndexBufferInfo {
                bo: ib.clone(),
                offset: 64,
                index_size: 2,
            }),
            index_bias: -1,
            ..Default::default()
        };

        ctx.draw_vbo(&info).unwrap();
        let words = ctx.batch().words();

        let index = find(words, IndexBuffer::default());
        assert_eq!(index.len(), 1);
        assert_eq!(extract(index[0], 1, 8, 9), 1);
        assert_eq!(extract(index[0], 2, 0, 63), ib.address() + 64);
        assert_eq!(index[0][4], 4096 - 64);

        let prim = find(words, Primitive3d::default())[0];
        assert_eq!(extract(prim, 1, 8, 8), u64::from(Primitive3d::RANDOM));
        assert_eq!(prim[3], 2);
        assert_eq!(prim[6] as i32, -1);
        assert!(ctx.batch().references(&ib));

        let before = ctx.batch().words().len();
        ctx.draw_vbo(&info).unwrap();
        let words = &ctx.batch().words()[before..];
        assert!(find(words, IndexBuffer::default()).is_empty());
    }

    #[test]
    fn index_offset_bounds() {
        let mut ctx = ready(Gen::Gen9);
        let ib = alloc(&mut ctx, "indices", 4096);
        let at = |offset| DrawInfo {
            count: 3,
            index: Some(IndexBufferInfo {
                bo: ib.clone(),
                offset,
                index_size: 4,
            }),
            ..Default::default()
        };

        assert!(matches!(
            ctx.draw_vbo(&at(4097)),
            Err(DrawError::IndexOffsetOutOfBounds {
                offset: 4097,
                size: 4096,
            }),
        ));
        assert!(ctx.batch().is_empty());

        ctx.draw_vbo(&at(4096)).unwrap();
        let index = find(ctx.batch().words(), IndexBuffer::default());
        assert_eq!(index[0][4], 0);
    }

    #[test]
    fn index_buffer_size_clamps() {
        assert_eq!(index_buffer_size(4096, 64), Some(4032));
        assert_eq!(index_buffer_size(4096, 4096), Some(0));
        assert_eq!(index_buffer_size(4096, 4097), None);
        assert_eq!(index_buffer_size(1 << 33, 0), Some(u32::MAX));
        assert_eq!(index_buffer_size(u64::from(u32::MAX) + 16, 16), Some(u32::MAX));
    }

    #[test]
    fn primitive_restart_reprograms_the_cut_index() {
        let mut ctx = ready(Gen::Gen9);
        ctx.draw_vbo(&triangle()).unwrap();
        let before = ctx.batch().words().len();

        ctx.draw_vbo(&DrawInfo {
            mode: PrimitiveMode::TriangleStrip,
            primitive_restart: true,
            restart_index: 0xffff,
            ..triangle()
        })
        .unwrap();
        let words = &ctx.batch().words()[before..];

        assert_eq!(find(words, VfTopology::default())[0][1], 5);
        let vf = find(words, Vf::default());
        assert_eq!(extract(vf[0], 0, 8, 8), 1);
        assert_eq!(vf[0][1], 0xffff);
    }

    #[test]
    fn missing_shaders() {
        let (mut ctx, _sink) = context(Gen::Gen9);

        assert!(matches!(
            ctx.draw_vbo(&triangle()),
            Err(DrawError::MissingShader(ShaderStage::Vertex)),
        ));
        assert!(ctx.batch().is_empty());
        assert_eq!(ctx.dirty().bits(), DirtyFlags::all());
    }

    #[test]
    fn empty_draws_encode_nothing() {
        let mut ctx = ready(Gen::Gen9);

        ctx.draw_vbo(&DrawInfo::default()).unwrap();
        assert!(ctx.batch().is_empty());
    }

    #[test]
    fn push_constants_fill_the_last_slots() {
        let (mut ctx, _sink) = context(Gen::Gen9);
        let ubo = alloc(&mut ctx, "ubo", 4096);
        let surface = alloc(&mut ctx, "surfaces", 4096);

        let mut vs = vs_prog_data(2);
        vs.ubo_ranges[0] = UboRange {
            block: 0,
            start: 2,
            length: 1,
        };
        ctx.upload_shader(CacheId::Vertex, b"vs", &[0x11; 64], vs)
            .unwrap();
        ctx.upload_shader(CacheId::Fragment, b"fs", &[0x22; 64], fs_prog_data())
            .unwrap();
        ctx.set_constant_buffer(
            ShaderStage::Vertex,
            0,
            Some(ConstantBuffer {
                bo: ubo.clone(),
                offset: 256,
                size: 1024,
                surface_state: SurfaceState {
                    bo: surface.clone(),
                    offset: 128,
                },
            }),
        );

        ctx.draw_vbo(&triangle()).unwrap();
        let words = ctx.batch().words();
        let constants = find(words, Constant::for_stage(ShaderStage::Vertex));

        assert_eq!(constants.len(), 1);
        assert_eq!(extract(constants[0], 2, 16, 31), 1);
        assert_eq!(extract(constants[0], 9, 0, 63), ubo.address() + 256 + 64);
        assert!(ctx.batch().references(&ubo));

        // The VS binding table holds the constant buffer's surface after the sampler views.
        let offset = ctx.binder().bt_offset(ShaderStage::Vertex);
        let table = ctx.binder().bo().read_dwords(offset, 2);
        assert_eq!(table, [surface.offset_from_base() + 128, 0]);
        assert!(ctx.batch().references(&surface));
    }

    #[test]
    fn depth_buffer() {
        let mut ctx = ready(Gen::Gen9);
        let depth = alloc(&mut ctx, "depth", 1 << 16);

        ctx.set_framebuffer_state(&FramebufferState {
            width: 64,
            height: 32,
            zsbuf: Some(DepthStencilView {
                depth: Some(DepthSurface {
                    bo: depth.clone(),
                    format: Default::default(),
                    pitch: 256,
                    qpitch: 32,
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
        ctx.draw_vbo(&triangle()).unwrap();

        let words = ctx.batch().words();
        let db = find(words, DepthBuffer::default())[0];
        assert_eq!(extract(db, 1, 29, 31), u64::from(DepthBuffer::SURFTYPE_2D));
        assert_eq!(extract(db, 1, 0, 17), 255);
        assert_eq!(extract(db, 2, 0, 63), depth.address());
        assert_eq!(extract(db, 4, 4, 17), 63);
        assert_eq!(extract(db, 4, 18, 31), 31);
        assert_eq!(extract(db, 7, 0, 14), 8);

        let validation = ctx.batch().validation();
        let entry = validation.iter().find(|e| e.bo.id() == depth.id()).unwrap();
        assert!(entry.writable);
    }

    #[test]
    fn depth_writes_follow_the_bound_dsa() {
        let mut ctx = ready(Gen::Gen9);
        let depth = alloc(&mut ctx, "depth", 1 << 16);

        ctx.set_framebuffer_state(&FramebufferState {
            width: 64,
            height: 64,
            zsbuf: Some(DepthStencilView {
                depth: Some(DepthSurface {
                    bo: depth,
                    format: Default::default(),
                    pitch: 256,
                    qpitch: 64,
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
        ctx.draw_vbo(&triangle()).unwrap();

        let db = find(ctx.batch().words(), DepthBuffer::default())[0];
        assert_eq!(extract(db, 1, 28, 28), 0);

        let writes = ctx.create_depth_stencil_alpha_state(&DepthStencilAlphaInfo {
            depth_test_enable: true,
            depth_write_enable: true,
            ..Default::default()
        });
        ctx.bind_depth_stencil_alpha_state(Some(writes));
        assert!(ctx.dirty().is_dirty(DirtyFlags::DEPTH_BUFFER));

        let before = ctx.batch().words().len();
        ctx.draw_vbo(&triangle()).unwrap();
        let words = &ctx.batch().words()[before..];

        let db = find(words, DepthBuffer::default());
        assert_eq!(db.len(), 1);
        assert_eq!(extract(db[0], 1, 28, 28), 1);

        // Same write enables, so the depth buffer stays as it is.
        let other = ctx.create_depth_stencil_alpha_state(&DepthStencilAlphaInfo {
            depth_test_enable: true,
            depth_write_enable: true,
            depth_func: CompareFunc::Less,
            ..Default::default()
        });
        ctx.bind_depth_stencil_alpha_state(Some(other));
        assert!(!ctx.dirty().is_dirty(DirtyFlags::DEPTH_BUFFER));
    }

    #[test]
    fn new_batch_pins_clean_state() {
        let mut ctx = ready(Gen::Gen9);
        ctx.draw_vbo(&triangle()).unwrap();
        ctx.flush().unwrap();
        assert!(ctx.batch().is_empty());

        ctx.draw_vbo(&triangle()).unwrap();

        let vs = ctx.program_cache().bound(ShaderStage::Vertex).unwrap().clone();
        assert!(ctx.batch().references(vs.bo()));
        assert!(ctx.batch().references(ctx.binder().bo()));
        let blend = ctx.dynamic_bos.blend_state.clone().unwrap();
        assert!(ctx.batch().references(&blend));
        assert_eq!(opcodes(ctx.batch().words()), [opcode(Primitive3d::default())]);
    }

    #[test]
    fn submit_failure_is_reported() {
        let (mut ctx, sink) = context_with(ContextCreateInfo {
            batch_size: DRAW_SPACE as u32 + 4096,
            ..Default::default()
        });
        bind_shaders(&mut ctx);
        sink.fail_next(SubmitError::DeviceLost);

        let mut result = Ok(());

        for _ in 0..512 {
            result = ctx.draw_vbo(&triangle());

            if result.is_err() {
                break;
            }
        }

        assert!(matches!(
            result,
            Err(DrawError::Submit(SubmitError::DeviceLost)),
        ));
        assert!(sink.submissions().is_empty());

        ctx.draw_vbo(&triangle()).unwrap();
        ctx.flush().unwrap();

        // The lost batch carried the state setup, so the next one encodes it again.
        let submissions = sink.submissions();
        assert_eq!(submissions.len(), 1);
        let words = &submissions[0].words;
        assert_eq!(find(words, DepthBuffer::default()).len(), 1);
        assert_eq!(find(words, VfTopology::default()).len(), 1);
        assert_eq!(find(words, SoBuffer::default()).len(), MAX_SO_BUFFERS);
        assert_eq!(find(words, Primitive3d::default()).len(), 1);
    }

    #[test]
    fn failed_flush_reencodes_state() {
        let (mut ctx, sink) = context(Gen::Gen9);
        bind_shaders(&mut ctx);
        ctx.draw_vbo(&triangle()).unwrap();

        sink.fail_next(SubmitError::DeviceLost);
        assert_eq!(ctx.flush(), Err(SubmitError::DeviceLost));

        ctx.draw_vbo(&triangle()).unwrap();
        assert!(!ctx.dirty().is_dirty(DirtyFlags::RENDER));

        let words = ctx.batch().words();
        assert_eq!(find(words, DepthBuffer::default()).len(), 1);
        assert_eq!(find(words, VfTopology::default()).len(), 1);
        assert!(ctx.batch().references(ctx.binder().bo()));
    }

    #[test]
    fn patches() {
        assert_eq!(PrimitiveMode::Patches.to_hw(1), 0x20);
        assert_eq!(PrimitiveMode::Patches.to_hw(32), 0x3f);
        assert_eq!(PrimitiveMode::LineLoop.to_hw(0), 0x10);
    }

    #[test]
    fn rasterizer_discard_rejects_everything() {
        let mut ctx = ready(Gen::Gen9);
        let discard = ctx.create_rasterizer_state(&RasterizerInfo {
            rasterizer_discard: true,
            ..Default::default()
        });
        ctx.bind_rasterizer_state(Some(discard));
        ctx.draw_vbo(&triangle()).unwrap();

        let clip = find(ctx.batch().words(), Clip::default());
        assert_eq!(extract(clip[0], 2, 13, 15), u64::from(Clip::CLIPMODE_REJECT_ALL));
        // Not layered, single viewport.
        assert_eq!(extract(clip[0], 3, 5, 5), 1);
        assert_eq!(extract(clip[0], 3, 0, 3), 0);
    }
}
