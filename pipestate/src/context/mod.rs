//! The per-context state and its entry points.
//!
//! A [`Context`] is what the state tracker above talks to. It owns the CSO tables, the
//! streamed state set through `set_*` calls, the allocators, the program cache and the batch.
//! Every entry point only records state and marks the dirty tracker; commands are only written
//! by [`Context::draw_vbo`] and [`Context::launch_grid`].
//!
//! A context is single-threaded. Nothing in it blocks on the GPU.

pub use self::{
    compute::GridInfo,
    draw::{DrawInfo, IndexBufferInfo, PrimitiveMode},
    resources::{
        AuxSurface, ConstantBuffer, DepthFormat, DepthStencilView, DepthSurface,
        FramebufferState, ScissorRect, SurfaceState, SurfaceView, VertexBuffer, Viewport,
        MAX_CONSTANT_BUFFERS, MAX_SAMPLER_VIEWS, MAX_VERTEX_BUFFERS, MAX_VIEWPORTS,
    },
};
use crate::{
    alloc::{AllocError, BumpRegion, RegionUser},
    batch::{Batch, BatchSink, SubmitError, BATCH_SIZE},
    binder::{Binder, BINDER_ALIGNMENT, BINDER_SIZE},
    bo::{Bo, BufferProvider, MemZone},
    border_color::{BorderColorPool, BORDER_COLOR_POOL_SIZE},
    cso::{
        blend::{BlendState, BlendStateInfo},
        depth_stencil::{DepthStencilAlphaInfo, DepthStencilAlphaState},
        rasterizer::{RasterizerInfo, RasterizerState},
        sampler::SamplerState,
        stream_output::{StreamOutputTarget, MAX_SO_BUFFERS},
        vertex::VertexElementsState,
        Handle, SlotTable,
    },
    dirty::{DirtyFlags, DirtyTracker},
    packet::{cmd::PipelineSelect, pack},
    pipe_control::PipeControlFlags,
    program_cache::{CacheId, CompiledShader, ProgData, ProgramCache, PROGRAM_CACHE_SIZE},
    Gen, Pipeline, ShaderStage, STAGE_COUNT,
};
use smallvec::SmallVec;
use std::sync::Arc;
use thiserror::Error;

mod bind;
mod compute;
mod draw;
mod resources;
mod sbe;
mod urb;

/// The default size of the dynamic state region.
pub const DYNAMIC_STATE_SIZE: u32 = 64 * 1024;

/// The alignment of everything uploaded to dynamic state. Some pointers need more.
pub const DYNAMIC_STATE_ALIGNMENT: u32 = 32;

/// Parameters to create a [`Context`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextCreateInfo {
    /// The hardware generation to encode for.
    ///
    /// The default value is [`Gen::Gen9`].
    pub hw: Gen,

    /// The size of the binding table region, in bytes. Must be at most
    /// [`MAX_STATE_SIZE`](crate::binder::MAX_STATE_SIZE).
    ///
    /// The default value is [`BINDER_SIZE`].
    pub binder_size: u32,

    /// The size of the border color pool, in bytes. Must be at most
    /// [`MAX_STATE_SIZE`](crate::binder::MAX_STATE_SIZE).
    ///
    /// The default value is [`BORDER_COLOR_POOL_SIZE`].
    pub border_color_pool_size: u32,

    /// The size of each batch, in bytes.
    ///
    /// The default value is [`BATCH_SIZE`].
    pub batch_size: u32,

    /// The size of the shader assembly region, in bytes.
    ///
    /// The default value is [`PROGRAM_CACHE_SIZE`].
    pub program_cache_size: u32,

    /// The size of the region viewports, blend state, color calculator state, scissors,
    /// sampler tables and interface descriptors are streamed into, in bytes.
    ///
    /// The default value is [`DYNAMIC_STATE_SIZE`].
    pub dynamic_state_size: u32,
}

impl Default for ContextCreateInfo {
    #[inline]
    fn default() -> Self {
        ContextCreateInfo {
            hw: Gen::default(),
            binder_size: BINDER_SIZE,
            border_color_pool_size: BORDER_COLOR_POOL_SIZE,
            batch_size: BATCH_SIZE,
            program_cache_size: PROGRAM_CACHE_SIZE,
            dynamic_state_size: DYNAMIC_STATE_SIZE,
        }
    }
}

/// Error that can happen when encoding a draw or a dispatch.
///
/// Nothing that was dirty before a failed draw is considered encoded afterwards, so the next
/// draw re-emits it.
#[derive(Debug, Error)]
pub enum DrawError {
    /// A stage every draw needs has no program bound.
    #[error("no {} program is bound", .0.abbrev())]
    MissingShader(ShaderStage),
    /// The index buffer offset lies past the end of its buffer object.
    #[error("index buffer offset {offset} is past the end of a {size}-byte buffer object")]
    IndexOffsetOutOfBounds { offset: u32, size: u64 },
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
}

/// The CSOs bound when nothing else is.
#[derive(Debug)]
struct DefaultStates {
    blend: Handle<BlendState>,
    depth_stencil_alpha: Handle<DepthStencilAlphaState>,
    rasterizer: Handle<RasterizerState>,
    vertex_elements: Handle<VertexElementsState>,
}

/// The `SAMPLER_STATE` table of one stage, uploaded when its samplers are bound.
#[derive(Clone, Debug)]
struct SamplerTable {
    bo: Arc<Bo>,
    /// Offset of the table from the dynamic state base address.
    pointer: u32,
    /// The border color pool the table's samplers point into, if any of them does.
    border_bo: Option<Arc<Bo>>,
}

/// The dynamic state buffer objects the hardware context currently points at.
#[derive(Debug, Default)]
struct DynamicStateBos {
    cc_viewport: Option<Arc<Bo>>,
    sf_clip_viewport: Option<Arc<Bo>>,
    blend_state: Option<Arc<Bo>>,
    color_calc_state: Option<Arc<Bo>>,
    scissor_rect: Option<Arc<Bo>>,
    interface_descriptor: Option<Arc<Bo>>,
}

/// The program bound to each stage.
type Shaders = [Option<Arc<CompiledShader>>; STAGE_COUNT];

/// What is currently bound and set.
#[derive(Debug)]
struct BoundState {
    blend: Handle<BlendState>,
    depth_stencil_alpha: Handle<DepthStencilAlphaState>,
    rasterizer: Handle<RasterizerState>,
    vertex_elements: Handle<VertexElementsState>,
    samplers: [SmallVec<[Option<Handle<SamplerState>>; 16]>; STAGE_COUNT],
    sampler_tables: [Option<SamplerTable>; STAGE_COUNT],
    so_targets: SmallVec<[Handle<StreamOutputTarget>; MAX_SO_BUFFERS]>,
    /// Whether the next `3DSTATE_SO_BUFFER` of each slot resets the write offset.
    so_zero_offset: [bool; MAX_SO_BUFFERS],

    blend_color: [f32; 4],
    stencil_ref: [u8; 2],
    viewports: SmallVec<[Viewport; MAX_VIEWPORTS]>,
    scissors: [ScissorRect; MAX_VIEWPORTS],
    sample_mask: u32,
    poly_stipple: [u32; 32],
    framebuffer: FramebufferState,
    constant_buffers: [SmallVec<[Option<ConstantBuffer>; 4]>; STAGE_COUNT],
    sampler_views: [SmallVec<[Option<SurfaceView>; 16]>; STAGE_COUNT],
    vertex_buffers: SmallVec<[Option<VertexBuffer>; 8]>,
    /// The API-level program of each stage, which the compiler turns into what gets bound to
    /// the program cache.
    uncompiled: [Option<u32>; STAGE_COUNT],
}

/// The state of one graphics context, and the commands encoded for it.
pub struct Context {
    hw: Gen,
    provider: Box<dyn BufferProvider>,
    batch: Batch,
    dirty: DirtyTracker,

    binder: Binder,
    border_colors: BorderColorPool,
    programs: ProgramCache,
    dynamic: BumpRegion,

    blend_states: SlotTable<BlendState>,
    depth_stencil_alpha_states: SlotTable<DepthStencilAlphaState>,
    rasterizer_states: SlotTable<RasterizerState>,
    sampler_states: SlotTable<SamplerState>,
    vertex_elements_states: SlotTable<VertexElementsState>,
    stream_output_targets: SlotTable<StreamOutputTarget>,

    defaults: DefaultStates,
    state: BoundState,
    dynamic_bos: DynamicStateBos,
    vf_cache: draw::VfCache,
}

impl Context {
    /// Creates a context allocating from `provider` and submitting to `sink`.
    ///
    /// Everything starts out dirty, so the first draw encodes the complete state.
    pub fn new(
        create_info: ContextCreateInfo,
        mut provider: Box<dyn BufferProvider>,
        sink: Box<dyn BatchSink>,
    ) -> Result<Context, AllocError> {
        let ContextCreateInfo {
            hw,
            binder_size,
            border_color_pool_size,
            batch_size,
            program_cache_size,
            dynamic_state_size,
        } = create_info;

        let workaround_bo = provider.alloc("workaround", 4096, MemZone::Other)?;
        let binder = Binder::new(&mut *provider, binder_size, BINDER_ALIGNMENT)?;
        let border_colors = BorderColorPool::new(&mut *provider, border_color_pool_size)?;
        let programs = ProgramCache::new(hw, &mut *provider, program_cache_size)?;
        let dynamic = BumpRegion::new(
            &mut *provider,
            "dynamic state",
            MemZone::Dynamic,
            dynamic_state_size,
            DYNAMIC_STATE_ALIGNMENT,
        )?;

        let mut blend_states = SlotTable::new();
        let mut depth_stencil_alpha_states = SlotTable::new();
        let mut rasterizer_states = SlotTable::new();
        let mut vertex_elements_states = SlotTable::new();

        let defaults = DefaultStates {
            blend: blend_states.insert(BlendState::new(hw, &BlendStateInfo::default())),
            depth_stencil_alpha: depth_stencil_alpha_states.insert(DepthStencilAlphaState::new(
                hw,
                &DepthStencilAlphaInfo::default(),
            )),
            rasterizer: rasterizer_states
                .insert(RasterizerState::new(hw, &RasterizerInfo::default())),
            vertex_elements: vertex_elements_states.insert(VertexElementsState::new(hw, &[])),
        };

        let state = BoundState {
            blend: defaults.blend,
            depth_stencil_alpha: defaults.depth_stencil_alpha,
            rasterizer: defaults.rasterizer,
            vertex_elements: defaults.vertex_elements,
            samplers: Default::default(),
            sampler_tables: Default::default(),
            so_targets: SmallVec::new(),
            so_zero_offset: [false; MAX_SO_BUFFERS],
            blend_color: [0.0; 4],
            stencil_ref: [0; 2],
            viewports: SmallVec::new(),
            scissors: [ScissorRect::default(); MAX_VIEWPORTS],
            sample_mask: 0xffff,
            poly_stipple: [0; 32],
            framebuffer: FramebufferState::default(),
            constant_buffers: Default::default(),
            sampler_views: Default::default(),
            vertex_buffers: SmallVec::new(),
            uncompiled: [None; STAGE_COUNT],
        };

        Ok(Context {
            hw,
            provider,
            batch: Batch::new(hw, batch_size, workaround_bo, sink),
            dirty: DirtyTracker::default(),
            binder,
            border_colors,
            programs,
            dynamic,
            blend_states,
            depth_stencil_alpha_states,
            rasterizer_states,
            sampler_states: SlotTable::new(),
            vertex_elements_states,
            stream_output_targets: SlotTable::new(),
            defaults,
            state,
            dynamic_bos: DynamicStateBos::default(),
            vf_cache: draw::VfCache::default(),
        })
    }

    #[inline]
    pub fn hw(&self) -> Gen {
        self.hw
    }

    /// Returns the batch commands are being recorded into.
    #[inline]
    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    #[inline]
    pub fn dirty(&self) -> &DirtyTracker {
        &self.dirty
    }

    #[inline]
    pub fn program_cache(&self) -> &ProgramCache {
        &self.programs
    }

    #[inline]
    pub fn binder(&self) -> &Binder {
        &self.binder
    }

    #[inline]
    pub fn border_color_pool(&self) -> &BorderColorPool {
        &self.border_colors
    }

    /// Submits everything recorded so far.
    #[inline]
    pub fn flush(&mut self) -> Result<(), SubmitError> {
        self.batch.flush()
    }

    /// Sets the API-level program of `stage`, which has to be compiled and bound through
    /// [`bind_cached_shader`] or [`upload_shader`] before the next draw.
    ///
    /// [`bind_cached_shader`]: Self::bind_cached_shader
    /// [`upload_shader`]: Self::upload_shader
    pub fn set_shader_state(&mut self, stage: ShaderStage, program_string_id: Option<u32>) {
        self.state.uncompiled[stage.index()] = program_string_id;
        self.dirty.mark(DirtyFlags::uncompiled(stage));
    }

    /// Returns the API-level program of `stage`.
    #[inline]
    pub fn shader_state(&self, stage: ShaderStage) -> Option<u32> {
        self.state.uncompiled[stage.index()]
    }

    /// Binds the program cached under `key`. Returns `false` if it has to be compiled first.
    pub fn bind_cached_shader(&mut self, cache_id: CacheId, key: &[u8]) -> bool {
        self.programs
            .bind_cached_shader(cache_id, key, &mut self.dirty)
    }

    /// Uploads a freshly compiled program, caches it under `key` and binds it.
    ///
    /// If the program region has to be replaced, the batch is submitted first if it refers to
    /// the old one.
    pub fn upload_shader(
        &mut self,
        cache_id: CacheId,
        key: &[u8],
        assembly: &[u8],
        prog_data: ProgData,
    ) -> Result<Arc<CompiledShader>, AllocError> {
        self.programs.upload_and_bind(
            cache_id,
            key,
            assembly,
            prog_data,
            &mut self.dirty,
            &mut *self.provider,
            &mut self.batch,
        )
    }

    /// Leaves `stage` without a program.
    pub fn unbind_shader(&mut self, stage: ShaderStage) {
        self.programs.unbind(stage, &mut self.dirty);
    }

    /// Returns the key of an earlier compile of the program with `program_string_id`.
    pub fn find_previous_compile(&self, cache_id: CacheId, program_string_id: u32) -> Option<&[u8]> {
        self.programs
            .find_previous_compile(cache_id, program_string_id)
    }

    fn bound_shaders(&self) -> Shaders {
        ShaderStage::ALL.map(|stage| self.programs.bound(stage).cloned())
    }

    /// Pins what the hardware context still points at, if nothing was encoded into the batch
    /// yet. State saved by an earlier batch is only re-emitted when it changes, but the buffer
    /// objects it refers to have to stay resident.
    fn restore_saved_bos(&mut self, shaders: &Shaders) {
        if self.batch.contains_draw() {
            return;
        }

        self.restore_render_bos(shaders);
        self.restore_compute_bos(shaders);
        self.batch.set_contains_draw();
    }

    /// Marks everything dirty if a batch failed to submit. The hardware context never saw the
    /// state encoded into it, so none of it can be assumed anymore.
    fn recover_lost_batch(&mut self) {
        if self.batch.take_lost() {
            tracing::debug!("re-encoding all state after a failed submission");

            self.dirty.mark(DirtyFlags::all());
            self.vf_cache = draw::VfCache::default();
        }
    }

    /// Switches the command streamer to `pipeline`.
    ///
    /// `PIPELINE_SELECT` has to be preceded by an end-of-pipe sync flushing the write caches,
    /// and followed by invalidating the read caches.
    fn select_pipeline(&mut self, pipeline: Pipeline) {
        self.batch.emit_end_of_pipe_sync(
            PipeControlFlags::RENDER_TARGET_FLUSH
                | PipeControlFlags::DEPTH_CACHE_FLUSH
                | PipeControlFlags::DATA_CACHE_FLUSH,
        );
        self.batch.emit_pipe_control_flush(
            PipeControlFlags::TEXTURE_CACHE_INVALIDATE
                | PipeControlFlags::CONST_CACHE_INVALIDATE
                | PipeControlFlags::STATE_CACHE_INVALIDATE
                | PipeControlFlags::INSTRUCTION_INVALIDATE,
        );

        let words = pack::<PipelineSelect>(self.hw, |sel| {
            sel.mask_bits = 3;
            sel.pipeline_selection = match pipeline {
                Pipeline::Render => PipelineSelect::SELECT_3D,
                Pipeline::Compute => PipelineSelect::SELECT_GPGPU,
            };
        });
        self.batch.emit(&words);
        self.batch.set_pipeline(pipeline);

        tracing::debug!(?pipeline, "switched pipeline");
    }
}

/// Lets the dynamic state region be replaced in the middle of a draw. Nothing has to be
/// submitted: the old buffer object stays pinned by the batch pointing into it and is never
/// handed out again.
struct PinOnly<'a>(&'a mut Batch);

impl RegionUser for PinOnly<'_> {
    #[inline]
    fn drain(&mut self, _old: &Arc<Bo>) -> Result<(), SubmitError> {
        Ok(())
    }

    #[inline]
    fn reference(&mut self, bo: &Arc<Bo>) {
        self.0.use_bo(bo, false);
    }
}

/// Copies `words` into the dynamic state region. Returns the buffer object they landed in and
/// their offset from the dynamic state base address.
fn upload_dynamic(
    dynamic: &mut BumpRegion,
    provider: &mut dyn BufferProvider,
    batch: &mut Batch,
    words: &[u32],
    alignment: u32,
) -> Result<(Arc<Bo>, u32), AllocError> {
    let size = u32::try_from(words.len() * 4).unwrap_or(u32::MAX);
    let reservation = dynamic.reserve(size, alignment, provider, &mut PinOnly(batch))?;
    let bo = dynamic.bo().clone();
    bo.write_dwords(reservation.offset, words);

    let pointer = bo.offset_from_base() + reservation.offset;

    Ok((bo, pointer))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        batch::RecordingSink,
        bo::HeapBufferProvider,
        packet::{Builder, Packet},
        program_cache::tests::{fs_prog_data, vs_prog_data},
    };

    pub(crate) fn context(hw: Gen) -> (Context, RecordingSink) {
        context_with(ContextCreateInfo {
            hw,
            ..Default::default()
        })
    }

    pub(crate) fn context_with(create_info: ContextCreateInfo) -> (Context, RecordingSink) {
        let sink = RecordingSink::new();
        let ctx = Context::new(
            create_info,
            Box::new(HeapBufferProvider::new()),
            Box::new(sink.clone()),
        )
        .unwrap();

        (ctx, sink)
    }

    /// Binds a minimal vertex and fragment shader pair.
    pub(crate) fn bind_shaders(ctx: &mut Context) {
        ctx.upload_shader(CacheId::Vertex, b"vs", &[0x11; 64], vs_prog_data(2))
            .unwrap();
        ctx.upload_shader(CacheId::Fragment, b"fs", &[0x22; 64], fs_prog_data())
            .unwrap();
    }

    /// Splits batch words into commands.
    pub(crate) fn commands(words: &[u32]) -> Vec<&[u32]> {
        let mut commands = Vec::new();
        let mut i = 0;

        while i < words.len() {
            let header = words[i];
            let length = if header >> 29 == 0 || header >> 16 == 0x6904 {
                1
            } else {
                (header & 0xff) as usize + 2
            };

            commands.push(&words[i..i + length]);
            i += length;
        }

        commands
    }

    /// Allocates a buffer object from the context's own provider, so that its id is unique.
    pub(crate) fn alloc(ctx: &mut Context, name: &'static str, size: u64) -> Arc<Bo> {
        ctx.provider.alloc(name, size, MemZone::Other).unwrap()
    }

    /// Returns the upper half of the header of `template`, identifying the command.
    pub(crate) fn opcode<P: Packet>(template: P) -> u32 {
        Builder::with(Gen::Gen9, template).finish()[0] >> 16
    }

    /// Returns the commands with the same opcode as `template`.
    pub(crate) fn find<P: Packet>(words: &[u32], template: P) -> Vec<&[u32]> {
        let opcode = opcode(template);

        commands(words)
            .into_iter()
            .filter(|command| command[0] >> 16 == opcode)
            .collect()
    }

    #[test]
    fn a_new_context_is_all_dirty() {
        let (ctx, sink) = context(Gen::Gen9);

        assert_eq!(ctx.dirty().bits(), DirtyFlags::all());
        assert!(ctx.batch().is_empty());
        assert!(sink.submissions().is_empty());
    }

    #[test]
    fn shader_state_marks_uncompiled() {
        let (mut ctx, _sink) = context(Gen::Gen9);
        ctx.dirty.clear(DirtyFlags::all());

        ctx.set_shader_state(ShaderStage::Geometry, Some(7));
        assert_eq!(ctx.shader_state(ShaderStage::Geometry), Some(7));
        assert_eq!(ctx.dirty().bits(), DirtyFlags::UNCOMPILED_GS);
    }

    #[test]
    fn previous_compiles_are_found_by_program() {
        let (mut ctx, _sink) = context(Gen::Gen9);
        let mut key = 42u32.to_le_bytes().to_vec();
        key.push(1);

        ctx.upload_shader(CacheId::Vertex, &key, &[0x11; 64], vs_prog_data(2))
            .unwrap();

        assert_eq!(
            ctx.find_previous_compile(CacheId::Vertex, 42),
            Some(key.as_slice()),
        );
        assert!(ctx.find_previous_compile(CacheId::Vertex, 43).is_none());
        assert!(ctx.bind_cached_shader(CacheId::Vertex, &key));
        assert!(!ctx.bind_cached_shader(CacheId::Vertex, b"missing"));
    }

    #[test]
    fn provider_failure_at_creation() {
        let result = Context::new(
            ContextCreateInfo::default(),
            Box::new(HeapBufferProvider::with_budget(8192)),
            Box::new(RecordingSink::new()),
        );

        assert!(matches!(result, Err(AllocError::OutOfMemory(_))));
    }

    #[test]
    fn dynamic_uploads_dont_drain() {
        let mut provider = HeapBufferProvider::new();
        let (mut batch, sink) = crate::batch::tests::batch(Gen::Gen9, &mut provider, BATCH_SIZE);
        let mut dynamic =
            BumpRegion::new(&mut provider, "dynamic state", MemZone::Dynamic, 128, 32).unwrap();
        let first = dynamic.bo().clone();

        batch.emit(&[0]);
        let (bo, pointer) =
            upload_dynamic(&mut dynamic, &mut provider, &mut batch, &[1; 16], 64).unwrap();
        assert_eq!(bo.id(), first.id());
        assert_eq!(pointer, first.offset_from_base() + 64);
        assert_eq!(first.read_dwords(64, 16), [1; 16]);

        let (bo, _) =
            upload_dynamic(&mut dynamic, &mut provider, &mut batch, &[2; 16], 64).unwrap();
        assert_ne!(bo.id(), first.id());
        assert!(batch.references(&first));
        assert!(batch.references(&bo));
        assert!(sink.submissions().is_empty());
    }
}
