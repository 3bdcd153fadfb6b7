//! Creating, binding and deleting CSOs, and the set-style entry points.
//!
//! Binding compares the new object with the old one and marks only the groups whose packets
//! embed something that differs.

use super::{
    resources::{ConstantBuffer, FramebufferState, ScissorRect, SurfaceView, VertexBuffer, Viewport},
    upload_dynamic, Context, SamplerTable, MAX_VIEWPORTS,
};
use crate::{
    alloc::AllocError,
    cso::{
        blend::{BlendState, BlendStateInfo},
        depth_stencil::{DepthStencilAlphaInfo, DepthStencilAlphaState},
        rasterizer::{RasterizerInfo, RasterizerState},
        sampler::{SamplerInfo, SamplerState},
        stream_output::{StreamOutputTarget, StreamOutputTargetInfo, MAX_SO_BUFFERS},
        vertex::{VertexElementInfo, VertexElementsState},
        Handle,
    },
    dirty::DirtyFlags,
    packet::{state::SamplerState as SamplerStateRecord, Builder},
    Gen, ShaderStage,
};
use smallvec::SmallVec;

impl Context {
    pub fn create_blend_state(&mut self, info: &BlendStateInfo) -> Handle<BlendState> {
        self.blend_states.insert(BlendState::new(self.hw, info))
    }

    /// Binds a blend state, or the default one if `handle` is `None`.
    ///
    /// # Panics
    ///
    /// - Panics if `handle` was deleted.
    pub fn bind_blend_state(&mut self, handle: Option<Handle<BlendState>>) {
        let handle = handle.unwrap_or(self.defaults.blend);
        assert!(self.blend_states.contains(handle), "binding an unknown blend state");

        self.state.blend = handle;
        self.dirty.mark(DirtyFlags::PS_BLEND | DirtyFlags::BLEND_STATE);
    }

    /// # Panics
    ///
    /// - Panics if the state is bound or is the default one.
    pub fn delete_blend_state(&mut self, handle: Handle<BlendState>) {
        assert_ne!(handle, self.state.blend, "deleting a bound blend state");
        assert_ne!(handle, self.defaults.blend, "deleting the default blend state");

        self.blend_states.remove(handle);
    }

    pub fn create_depth_stencil_alpha_state(
        &mut self,
        info: &DepthStencilAlphaInfo,
    ) -> Handle<DepthStencilAlphaState> {
        self.depth_stencil_alpha_states
            .insert(DepthStencilAlphaState::new(self.hw, info))
    }

    /// Binds a depth-stencil-alpha state, or the default one if `handle` is `None`.
    ///
    /// # Panics
    ///
    /// - Panics if `handle` was deleted.
    pub fn bind_depth_stencil_alpha_state(&mut self, handle: Option<Handle<DepthStencilAlphaState>>) {
        let handle = handle.unwrap_or(self.defaults.depth_stencil_alpha);
        assert!(
            self.depth_stencil_alpha_states.contains(handle),
            "binding an unknown depth-stencil-alpha state",
        );

        let old = &self.depth_stencil_alpha_states[self.state.depth_stencil_alpha];
        let new = &self.depth_stencil_alpha_states[handle];
        let mut flags = DirtyFlags::WM_DEPTH_STENCIL | DirtyFlags::CC_VIEWPORT;

        if old.alpha.ref_value != new.alpha.ref_value {
            flags |= DirtyFlags::COLOR_CALC_STATE;
        }

        if old.alpha.enabled != new.alpha.enabled || old.alpha.func != new.alpha.func {
            flags |= DirtyFlags::PS_BLEND | DirtyFlags::BLEND_STATE;
        }

        // The depth buffer packets carry the write enables.
        if old.writes_depth != new.writes_depth || old.writes_stencil != new.writes_stencil {
            flags |= DirtyFlags::DEPTH_BUFFER;
        }

        // Gen8 keeps the back face stencil reference in the color calculator state.
        if self.hw == Gen::Gen8 && old.two_sided_stencil != new.two_sided_stencil {
            flags |= DirtyFlags::COLOR_CALC_STATE;
        }

        self.state.depth_stencil_alpha = handle;
        self.dirty.mark(flags);
    }

    /// # Panics
    ///
    /// - Panics if the state is bound or is the default one.
    pub fn delete_depth_stencil_alpha_state(&mut self, handle: Handle<DepthStencilAlphaState>) {
        assert_ne!(
            handle, self.state.depth_stencil_alpha,
            "deleting a bound depth-stencil-alpha state",
        );
        assert_ne!(
            handle, self.defaults.depth_stencil_alpha,
            "deleting the default depth-stencil-alpha state",
        );

        self.depth_stencil_alpha_states.remove(handle);
    }

    pub fn create_rasterizer_state(&mut self, info: &RasterizerInfo) -> Handle<RasterizerState> {
        self.rasterizer_states
            .insert(RasterizerState::new(self.hw, info))
    }

    /// Binds a rasterizer state, or the default one if `handle` is `None`.
    ///
    /// # Panics
    ///
    /// - Panics if `handle` was deleted.
    pub fn bind_rasterizer_state(&mut self, handle: Option<Handle<RasterizerState>>) {
        let handle = handle.unwrap_or(self.defaults.rasterizer);
        assert!(
            self.rasterizer_states.contains(handle),
            "binding an unknown rasterizer state",
        );

        let old = &self.rasterizer_states[self.state.rasterizer];
        let new = &self.rasterizer_states[handle];
        let mut flags = DirtyFlags::RASTER | DirtyFlags::CLIP | DirtyFlags::SF_CL_VIEWPORT;

        if old.line_stipple != new.line_stipple {
            flags |= DirtyFlags::LINE_STIPPLE;
        }

        if old.half_pixel_center != new.half_pixel_center {
            flags |= DirtyFlags::MULTISAMPLE;
        }

        if old.line_stipple_enable != new.line_stipple_enable
            || old.poly_stipple_enable != new.poly_stipple_enable
        {
            flags |= DirtyFlags::WM;
        }

        if old.light_twoside != new.light_twoside
            || old.sprite_coord_enable != new.sprite_coord_enable
            || old.sprite_coord_mode != new.sprite_coord_mode
            || old.flatshade != new.flatshade
        {
            flags |= DirtyFlags::SBE;
        }

        self.state.rasterizer = handle;
        self.dirty.mark(flags);
    }

    /// # Panics
    ///
    /// - Panics if the state is bound or is the default one.
    pub fn delete_rasterizer_state(&mut self, handle: Handle<RasterizerState>) {
        assert_ne!(handle, self.state.rasterizer, "deleting a bound rasterizer state");
        assert_ne!(
            handle, self.defaults.rasterizer,
            "deleting the default rasterizer state",
        );

        self.rasterizer_states.remove(handle);
    }

    pub fn create_sampler_state(&mut self, info: &SamplerInfo) -> Handle<SamplerState> {
        self.sampler_states.insert(SamplerState::new(self.hw, info))
    }

    /// Binds `samplers` to slots `start..` of `stage`, and uploads the resulting sampler table
    /// along with the border colors it needs.
    ///
    /// If the upload fails, the previously bound samplers stay bound.
    ///
    /// # Panics
    ///
    /// - Panics if a handle was deleted.
    pub fn bind_sampler_states(
        &mut self,
        stage: ShaderStage,
        start: usize,
        samplers: &[Option<Handle<SamplerState>>],
    ) -> Result<(), AllocError> {
        let mut bound = self.state.samplers[stage.index()].clone();

        if bound.len() < start + samplers.len() {
            bound.resize(start + samplers.len(), None);
        }

        for (slot, &sampler) in bound[start..].iter_mut().zip(samplers) {
            if let Some(handle) = sampler {
                assert!(
                    self.sampler_states.contains(handle),
                    "binding an unknown sampler state",
                );
            }

            *slot = sampler;
        }

        while bound.last() == Some(&None) {
            bound.pop();
        }

        let table = self.upload_sampler_table(&bound)?;

        self.state.samplers[stage.index()] = bound;
        self.state.sampler_tables[stage.index()] = table;
        self.dirty.mark(DirtyFlags::sampler_states(stage));

        Ok(())
    }

    /// Encodes `bound` into dynamic state.
    fn upload_sampler_table(
        &mut self,
        bound: &[Option<Handle<SamplerState>>],
    ) -> Result<Option<SamplerTable>, AllocError> {
        if bound.is_empty() {
            return Ok(None);
        }

        let with_border = bound
            .iter()
            .flatten()
            .filter(|&&handle| self.sampler_states[handle].needs_border_color)
            .count() as u32;

        // All border colors of one table have to live in the same pool.
        self.border_colors
            .reserve(with_border, &mut *self.provider, &mut self.batch)?;

        let mut words = SmallVec::<[u32; 64]>::new();
        let mut border_bo = None;

        for &sampler in bound {
            match sampler {
                Some(handle) => {
                    let sampler = &self.sampler_states[handle];

                    if sampler.needs_border_color {
                        let offset = self.border_colors.upload(
                            sampler.border_color,
                            &mut *self.provider,
                            &mut self.batch,
                        )?;
                        let pool = self.border_colors.bo();
                        let pointer = pool.offset_from_base() + offset;

                        words.extend_from_slice(&sampler.with_border_color(self.hw, pointer));
                        border_bo = Some(pool.clone());
                    } else {
                        words.extend_from_slice(&sampler.sampler_state);
                    }
                }
                None => {
                    let mut samp = Builder::<SamplerStateRecord>::new(self.hw);
                    samp.sampler_disable = true;
                    words.extend_from_slice(&samp.finish());
                }
            }
        }

        let (bo, pointer) = upload_dynamic(
            &mut self.dynamic,
            &mut *self.provider,
            &mut self.batch,
            &words,
            32,
        )?;

        Ok(Some(SamplerTable {
            bo,
            pointer,
            border_bo,
        }))
    }

    /// # Panics
    ///
    /// - Panics if the state is bound to any stage.
    pub fn delete_sampler_state(&mut self, handle: Handle<SamplerState>) {
        assert!(
            self.state
                .samplers
                .iter()
                .all(|bound| !bound.contains(&Some(handle))),
            "deleting a bound sampler state",
        );

        self.sampler_states.remove(handle);
    }

    pub fn create_vertex_elements_state(
        &mut self,
        elements: &[VertexElementInfo],
    ) -> Handle<VertexElementsState> {
        self.vertex_elements_states
            .insert(VertexElementsState::new(self.hw, elements))
    }

    /// Binds a vertex-elements state, or one without any elements if `handle` is `None`.
    ///
    /// # Panics
    ///
    /// - Panics if `handle` was deleted.
    pub fn bind_vertex_elements_state(&mut self, handle: Option<Handle<VertexElementsState>>) {
        let handle = handle.unwrap_or(self.defaults.vertex_elements);
        assert!(
            self.vertex_elements_states.contains(handle),
            "binding an unknown vertex-elements state",
        );

        self.state.vertex_elements = handle;
        self.dirty.mark(DirtyFlags::VERTEX_ELEMENTS);
    }

    /// # Panics
    ///
    /// - Panics if the state is bound or is the default one.
    pub fn delete_vertex_elements_state(&mut self, handle: Handle<VertexElementsState>) {
        assert_ne!(
            handle, self.state.vertex_elements,
            "deleting a bound vertex-elements state",
        );
        assert_ne!(
            handle, self.defaults.vertex_elements,
            "deleting the default vertex-elements state",
        );

        self.vertex_elements_states.remove(handle);
    }

    pub fn create_stream_output_target(
        &mut self,
        info: &StreamOutputTargetInfo,
    ) -> Handle<StreamOutputTarget> {
        self.stream_output_targets
            .insert(StreamOutputTarget::new(self.hw, info))
    }

    /// Binds the stream-output targets. Unless `append` is set, writing starts over at the
    /// beginning of each target.
    ///
    /// # Panics
    ///
    /// - Panics if more than [`MAX_SO_BUFFERS`] targets are given.
    /// - Panics if a handle was deleted.
    pub fn set_stream_output_targets(
        &mut self,
        targets: &[Handle<StreamOutputTarget>],
        append: bool,
    ) {
        assert!(targets.len() <= MAX_SO_BUFFERS);

        for &handle in targets {
            assert!(
                self.stream_output_targets.contains(handle),
                "binding an unknown stream-output target",
            );
        }

        let old = &self.state.so_targets;
        let strides_changed = old.len() != targets.len()
            || old.iter().zip(targets).any(|(&a, &b)| {
                self.stream_output_targets[a].stride != self.stream_output_targets[b].stride
            });

        let mut flags = DirtyFlags::SO_BUFFERS;

        if strides_changed {
            flags |= DirtyFlags::STREAMOUT;
        }

        self.state.so_targets = targets.iter().copied().collect();
        self.state.so_zero_offset = [!append; MAX_SO_BUFFERS];
        self.dirty.mark(flags);
    }

    /// # Panics
    ///
    /// - Panics if the target is bound.
    pub fn delete_stream_output_target(&mut self, handle: Handle<StreamOutputTarget>) {
        assert!(
            !self.state.so_targets.contains(&handle),
            "deleting a bound stream-output target",
        );

        self.stream_output_targets.remove(handle);
    }

    pub fn set_blend_color(&mut self, color: [f32; 4]) {
        self.state.blend_color = color;
        self.dirty.mark(DirtyFlags::COLOR_CALC_STATE);
    }

    /// Sets the front and back stencil reference values.
    pub fn set_stencil_ref(&mut self, refs: [u8; 2]) {
        self.state.stencil_ref = refs;
        self.dirty.mark(if self.hw == Gen::Gen8 {
            DirtyFlags::COLOR_CALC_STATE
        } else {
            DirtyFlags::WM_DEPTH_STENCIL
        });
    }

    /// Sets viewports `start..`. The number of viewports in use is the end of the last one set.
    ///
    /// # Panics
    ///
    /// - Panics if the range goes past [`MAX_VIEWPORTS`].
    pub fn set_viewport_states(&mut self, start: usize, viewports: &[Viewport]) {
        let end = start + viewports.len();
        assert!(end <= MAX_VIEWPORTS);

        let old_count = self.state.viewports.len();
        self.state.viewports.resize(end.max(old_count), Viewport::default());
        self.state.viewports[start..end].copy_from_slice(viewports);
        self.state.viewports.truncate(end.max(start));

        let mut flags = DirtyFlags::SF_CL_VIEWPORT;

        if self.state.viewports.len() != old_count {
            flags |= DirtyFlags::CC_VIEWPORT | DirtyFlags::CLIP | DirtyFlags::SCISSOR_RECT;
        }

        self.dirty.mark(flags);
    }

    /// # Panics
    ///
    /// - Panics if the range goes past [`MAX_VIEWPORTS`].
    pub fn set_scissor_states(&mut self, start: usize, scissors: &[ScissorRect]) {
        let end = start + scissors.len();
        assert!(end <= MAX_VIEWPORTS);

        self.state.scissors[start..end].copy_from_slice(scissors);
        self.dirty.mark(DirtyFlags::SCISSOR_RECT);
    }

    pub fn set_sample_mask(&mut self, mask: u32) {
        self.state.sample_mask = mask;
        self.dirty.mark(DirtyFlags::SAMPLE_MASK);
    }

    pub fn set_polygon_stipple(&mut self, pattern: &[u32; 32]) {
        self.state.poly_stipple = *pattern;
        self.dirty.mark(DirtyFlags::POLYGON_STIPPLE);
    }

    pub fn set_framebuffer_state(&mut self, framebuffer: &FramebufferState) {
        let old = &self.state.framebuffer;
        let mut flags = DirtyFlags::DEPTH_BUFFER | DirtyFlags::BINDINGS_FS | DirtyFlags::PS_BLEND;

        if old.samples != framebuffer.samples {
            flags |= DirtyFlags::MULTISAMPLE;
        }

        if old.cbufs.len() != framebuffer.cbufs.len() {
            flags |= DirtyFlags::BLEND_STATE;
        }

        if (old.layers == 0) != (framebuffer.layers == 0) {
            flags |= DirtyFlags::CLIP;
        }

        if old.width != framebuffer.width || old.height != framebuffer.height {
            flags |= DirtyFlags::SF_CL_VIEWPORT;
        }

        self.state.framebuffer = framebuffer.clone();
        self.dirty.mark(flags);
    }

    /// Binds or unbinds the constant buffer in slot `index` of `stage`.
    ///
    /// # Panics
    ///
    /// - Panics if `index` is not below [`MAX_CONSTANT_BUFFERS`](super::MAX_CONSTANT_BUFFERS).
    pub fn set_constant_buffer(
        &mut self,
        stage: ShaderStage,
        index: usize,
        buffer: Option<ConstantBuffer>,
    ) {
        assert!(index < super::MAX_CONSTANT_BUFFERS);

        let bound = &mut self.state.constant_buffers[stage.index()];

        if bound.len() <= index {
            bound.resize(index + 1, None);
        }

        bound[index] = buffer;

        while bound.last().is_some_and(Option::is_none) {
            bound.pop();
        }

        let mut flags = DirtyFlags::bindings(stage);

        if stage.is_render() {
            flags |= DirtyFlags::constants(stage);
        }

        self.dirty.mark(flags);
    }

    /// # Panics
    ///
    /// - Panics if the range goes past [`MAX_VERTEX_BUFFERS`](super::MAX_VERTEX_BUFFERS).
    pub fn set_vertex_buffers(&mut self, start: usize, buffers: &[Option<VertexBuffer>]) {
        let end = start + buffers.len();
        assert!(end <= super::MAX_VERTEX_BUFFERS);

        let bound = &mut self.state.vertex_buffers;

        if bound.len() < end {
            bound.resize(end, None);
        }

        bound[start..end].clone_from_slice(buffers);

        while bound.last().is_some_and(Option::is_none) {
            bound.pop();
        }

        self.dirty.mark(DirtyFlags::VERTEX_BUFFERS);
    }

    /// # Panics
    ///
    /// - Panics if the range goes past [`MAX_SAMPLER_VIEWS`](super::MAX_SAMPLER_VIEWS).
    pub fn set_sampler_views(
        &mut self,
        stage: ShaderStage,
        start: usize,
        views: &[Option<SurfaceView>],
    ) {
        let end = start + views.len();
        assert!(end <= super::MAX_SAMPLER_VIEWS);

        let bound = &mut self.state.sampler_views[stage.index()];

        if bound.len() < end {
            bound.resize(end, None);
        }

        bound[start..end].clone_from_slice(views);

        while bound.last().is_some_and(Option::is_none) {
            bound.pop();
        }

        self.dirty.mark(DirtyFlags::bindings(stage));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        border_color::BorderColor,
        cso::{sampler::WrapMode, CompareFunc, depth_stencil::AlphaTest},
        batch::RecordingSink,
        bo::{Bo, BoAllocError, BufferProvider, HeapBufferProvider, MemZone},
        context::{tests::context, ContextCreateInfo},
        packet::extract,
    };
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    #[test]
    fn rasterizers_differing_in_two_sided_lighting() {
        let (mut ctx, _sink) = context(Gen::Gen9);
        let a = ctx.create_rasterizer_state(&RasterizerInfo::default());
        let b = ctx.create_rasterizer_state(&RasterizerInfo {
            light_twoside: true,
            ..Default::default()
        });

        ctx.bind_rasterizer_state(Some(a));
        ctx.dirty.clear(DirtyFlags::all());
        ctx.bind_rasterizer_state(Some(b));

        assert_eq!(
            ctx.dirty().bits(),
            DirtyFlags::SBE | DirtyFlags::RASTER | DirtyFlags::CLIP | DirtyFlags::SF_CL_VIEWPORT,
        );
    }

    #[test]
    fn rasterizer_stipples_and_pixel_centers() {
        let (mut ctx, _sink) = context(Gen::Gen9);
        let stippled = ctx.create_rasterizer_state(&RasterizerInfo {
            line_stipple_enable: true,
            line_stipple_pattern: 0xf0f0,
            half_pixel_center: false,
            ..Default::default()
        });

        ctx.dirty.clear(DirtyFlags::all());
        ctx.bind_rasterizer_state(Some(stippled));

        let flags = ctx.dirty().bits();
        assert!(flags.contains(DirtyFlags::LINE_STIPPLE | DirtyFlags::MULTISAMPLE | DirtyFlags::WM));
        assert!(!flags.contains(DirtyFlags::SBE));
    }

    #[test]
    fn alpha_test_changes_reach_blend_and_color_calc() {
        let (mut ctx, _sink) = context(Gen::Gen9);
        let alpha = ctx.create_depth_stencil_alpha_state(&DepthStencilAlphaInfo {
            alpha: AlphaTest {
                enabled: true,
                func: CompareFunc::Greater,
                ref_value: 0.5,
            },
            ..Default::default()
        });
        let depth_only = ctx.create_depth_stencil_alpha_state(&DepthStencilAlphaInfo {
            depth_test_enable: true,
            ..Default::default()
        });

        ctx.dirty.clear(DirtyFlags::all());
        ctx.bind_depth_stencil_alpha_state(Some(depth_only));
        assert_eq!(
            ctx.dirty().bits(),
            DirtyFlags::WM_DEPTH_STENCIL | DirtyFlags::CC_VIEWPORT,
        );

        ctx.dirty.clear(DirtyFlags::all());
        ctx.bind_depth_stencil_alpha_state(Some(alpha));
        assert_eq!(
            ctx.dirty().bits(),
            DirtyFlags::WM_DEPTH_STENCIL
                | DirtyFlags::CC_VIEWPORT
                | DirtyFlags::COLOR_CALC_STATE
                | DirtyFlags::PS_BLEND
                | DirtyFlags::BLEND_STATE,
        );
    }

    #[test]
    fn stencil_ref_lives_in_different_packets() {
        let (mut ctx, _sink) = context(Gen::Gen8);
        ctx.dirty.clear(DirtyFlags::all());
        ctx.set_stencil_ref([1, 2]);
        assert_eq!(ctx.dirty().bits(), DirtyFlags::COLOR_CALC_STATE);

        let (mut ctx, _sink) = context(Gen::Gen9);
        ctx.dirty.clear(DirtyFlags::all());
        ctx.set_stencil_ref([1, 2]);
        assert_eq!(ctx.dirty().bits(), DirtyFlags::WM_DEPTH_STENCIL);
    }

    #[test]
    #[should_panic = "deleting a bound blend state"]
    fn bound_state_cant_be_deleted() {
        let (mut ctx, _sink) = context(Gen::Gen9);
        let blend = ctx.create_blend_state(&BlendStateInfo::default());
        ctx.bind_blend_state(Some(blend));
        ctx.delete_blend_state(blend);
    }

    #[test]
    fn unbinding_restores_the_default() {
        let (mut ctx, _sink) = context(Gen::Gen9);
        let blend = ctx.create_blend_state(&BlendStateInfo {
            alpha_to_coverage_enable: true,
            ..Default::default()
        });

        ctx.bind_blend_state(Some(blend));
        ctx.bind_blend_state(None);
        ctx.delete_blend_state(blend);

        assert!(!ctx.blend_states.contains(blend));
        assert!(!ctx.blend_states[ctx.state.blend].alpha_to_coverage_enable);
    }

    #[test]
    fn sampler_table_points_at_border_colors() {
        let (mut ctx, _sink) = context(Gen::Gen9);
        let plain = ctx.create_sampler_state(&SamplerInfo::default());
        let clamped = ctx.create_sampler_state(&SamplerInfo {
            wrap_s: WrapMode::ClampToBorder,
            border_color: BorderColor::from_f32([1.0, 0.0, 0.0, 1.0]),
            ..Default::default()
        });

        ctx.dirty.clear(DirtyFlags::all());
        ctx.bind_sampler_states(ShaderStage::Fragment, 0, &[Some(plain), None, Some(clamped)])
            .unwrap();
        assert_eq!(ctx.dirty().bits(), DirtyFlags::SAMPLER_STATES_PS);

        let table = ctx.state.sampler_tables[ShaderStage::Fragment.index()]
            .clone()
            .unwrap();
        let words = table
            .bo
            .read_dwords(table.pointer - table.bo.offset_from_base(), 12);

        assert_eq!(extract(&words, 0, 31, 31), 0);
        assert_eq!(extract(&words, 4, 31, 31), 1);
        assert_eq!(extract(&words, 8, 31, 31), 0);

        let pool = table.border_bo.unwrap();
        let border = extract(&words, 10, 6, 23) << 6;
        assert_eq!(pool.id(), ctx.border_color_pool().bo().id());
        assert!(border >= u64::from(pool.offset_from_base()));
        assert_eq!(ctx.border_color_pool().len(), 1);
        assert!(ctx.batch().references(&pool));
        assert!(ctx.batch().references(&table.bo));
    }

    /// Hands out memory until told to run out.
    struct ExhaustibleProvider {
        inner: HeapBufferProvider,
        exhausted: Arc<AtomicBool>,
    }

    impl BufferProvider for ExhaustibleProvider {
        fn alloc(
            &mut self,
            name: &'static str,
            size: u64,
            zone: MemZone,
        ) -> Result<Arc<Bo>, BoAllocError> {
            if self.exhausted.load(Ordering::Relaxed) {
                return Err(BoAllocError::OutOfMemory { name, size });
            }

            self.inner.alloc(name, size, zone)
        }
    }

    #[test]
    fn failed_sampler_upload_keeps_previous_binding() {
        let exhausted = Arc::new(AtomicBool::new(false));
        let mut ctx = Context::new(
            ContextCreateInfo {
                dynamic_state_size: 128,
                ..Default::default()
            },
            Box::new(ExhaustibleProvider {
                inner: HeapBufferProvider::new(),
                exhausted: exhausted.clone(),
            }),
            Box::new(RecordingSink::new()),
        )
        .unwrap();
        let plain = ctx.create_sampler_state(&SamplerInfo::default());
        let stage = ShaderStage::Fragment;

        ctx.bind_sampler_states(stage, 0, &[Some(plain)]).unwrap();
        exhausted.store(true, Ordering::Relaxed);

        let mut failed = false;

        for count in 2..16 {
            let previous = ctx.state.samplers[stage.index()].clone();
            let pointer = ctx.state.sampler_tables[stage.index()]
                .as_ref()
                .map(|table| table.pointer);
            ctx.dirty.clear(DirtyFlags::all());

            if ctx
                .bind_sampler_states(stage, 0, &vec![Some(plain); count])
                .is_err()
            {
                assert_eq!(ctx.state.samplers[stage.index()], previous);
                assert_eq!(
                    ctx.state.sampler_tables[stage.index()]
                        .as_ref()
                        .map(|table| table.pointer),
                    pointer,
                );
                assert!(ctx.dirty().bits().is_empty());
                failed = true;
                break;
            }
        }

        assert!(failed);

        exhausted.store(false, Ordering::Relaxed);
        ctx.bind_sampler_states(stage, 0, &[Some(plain), Some(plain)])
            .unwrap();
        assert_eq!(ctx.state.samplers[stage.index()].len(), 2);
        assert!(ctx.dirty().is_dirty(DirtyFlags::SAMPLER_STATES_PS));
    }

    #[test]
    fn trailing_unbound_samplers_are_dropped() {
        let (mut ctx, _sink) = context(Gen::Gen9);
        let plain = ctx.create_sampler_state(&SamplerInfo::default());

        ctx.bind_sampler_states(ShaderStage::Vertex, 0, &[Some(plain), Some(plain)])
            .unwrap();
        ctx.bind_sampler_states(ShaderStage::Vertex, 1, &[None]).unwrap();
        assert_eq!(ctx.state.samplers[0].len(), 1);

        ctx.bind_sampler_states(ShaderStage::Vertex, 0, &[None]).unwrap();
        assert!(ctx.state.samplers[0].is_empty());
        assert!(ctx.state.sampler_tables[0].is_none());

        ctx.delete_sampler_state(plain);
    }

    #[test]
    fn viewport_count_changes() {
        let (mut ctx, _sink) = context(Gen::Gen9);
        let vp = Viewport {
            scale: [1.0; 3],
            translate: [0.0; 3],
        };

        ctx.set_viewport_states(0, &[vp, vp]);
        ctx.dirty.clear(DirtyFlags::all());

        ctx.set_viewport_states(1, &[vp]);
        assert_eq!(ctx.dirty().bits(), DirtyFlags::SF_CL_VIEWPORT);

        ctx.set_viewport_states(0, &[vp]);
        assert_eq!(ctx.state.viewports.len(), 1);
        assert!(ctx.dirty().is_dirty(DirtyFlags::SCISSOR_RECT));
        assert!(ctx.dirty().is_dirty(DirtyFlags::CLIP));
    }

    #[test]
    fn framebuffer_changes() {
        let (mut ctx, _sink) = context(Gen::Gen9);
        ctx.dirty.clear(DirtyFlags::all());

        ctx.set_framebuffer_state(&FramebufferState::default());
        assert_eq!(
            ctx.dirty().bits(),
            DirtyFlags::DEPTH_BUFFER | DirtyFlags::BINDINGS_FS | DirtyFlags::PS_BLEND,
        );

        ctx.dirty.clear(DirtyFlags::all());
        ctx.set_framebuffer_state(&FramebufferState {
            width: 64,
            height: 64,
            samples: 4,
            layers: 6,
            ..Default::default()
        });
        assert!(ctx.dirty().bits().contains(
            DirtyFlags::MULTISAMPLE | DirtyFlags::CLIP | DirtyFlags::SF_CL_VIEWPORT
        ));
        assert!(!ctx.dirty().is_dirty(DirtyFlags::BLEND_STATE));
    }

    #[test]
    fn compute_constant_buffers_have_no_push_constants() {
        let (mut ctx, _sink) = context(Gen::Gen9);
        ctx.dirty.clear(DirtyFlags::all());

        ctx.set_constant_buffer(ShaderStage::Compute, 0, None);
        assert_eq!(ctx.dirty().bits(), DirtyFlags::BINDINGS_CS);

        ctx.set_constant_buffer(ShaderStage::Geometry, 2, None);
        assert!(ctx.dirty().bits().contains(DirtyFlags::BINDINGS_GS | DirtyFlags::CONSTANTS_GS));
        assert!(ctx.state.constant_buffers[ShaderStage::Geometry.index()].is_empty());
    }
}
