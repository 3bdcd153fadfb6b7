//! Storage of compiled shader programs.
//!
//! Programs are cached per [`CacheId`] under the key the compiler was invoked with, which is an
//! opaque byte string to this module. Each cached program is a [`CompiledShader`]: where its
//! assembly lives in the program region, the metadata the compiler produced for it, and the
//! packets that program the shader unit of its stage, which are derived once at upload.
//!
//! Distinct keys often compile to identical machine code, so assembly is deduplicated by
//! content: uploading a byte-identical blob under a new key reuses the offset of the first one.
//! Metadata is never deduplicated, since it can differ between keys even when the code doesn't.
//!
//! The cache also holds the program bound to each stage, since binding decides what the next
//! draw has to re-emit.

use crate::{
    alloc::{AllocError, BumpRegion, RegionUser},
    bo::{Bo, BufferProvider, MemZone},
    dirty::{DirtyFlags, DirtyTracker},
    packet::{
        cmd::{Ds, Gs, Hs, Ps, PsExtra, Te, Vs},
        Address, Builder, Words,
    },
    Gen, ShaderStage, STAGE_COUNT,
};
use foldhash::HashMap;
use smallvec::SmallVec;
use std::sync::Arc;

/// The default size of the program region.
pub const PROGRAM_CACHE_SIZE: u32 = 64 * 1024;

/// The alignment of every program, which kernel start pointers require.
pub const PROGRAM_ALIGNMENT: u32 = 64;

const CACHE_COUNT: usize = STAGE_COUNT + 1;

/// Which cache a program lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheId {
    Vertex,
    TessControl,
    TessEval,
    Geometry,
    Fragment,
    Compute,
    /// Internal shaders used to implement blits. Their keys don't start with a program string
    /// id, and they are never bound through the cache.
    Blit,
}

impl CacheId {
    /// Returns the shader stage the cache holds programs of, or `None` for [`CacheId::Blit`].
    #[inline]
    pub const fn stage(self) -> Option<ShaderStage> {
        match self {
            CacheId::Vertex => Some(ShaderStage::Vertex),
            CacheId::TessControl => Some(ShaderStage::TessControl),
            CacheId::TessEval => Some(ShaderStage::TessEval),
            CacheId::Geometry => Some(ShaderStage::Geometry),
            CacheId::Fragment => Some(ShaderStage::Fragment),
            CacheId::Compute => Some(ShaderStage::Compute),
            CacheId::Blit => None,
        }
    }

    #[inline]
    const fn index(self) -> usize {
        match self.stage() {
            Some(stage) => stage.index(),
            None => STAGE_COUNT,
        }
    }
}

impl From<ShaderStage> for CacheId {
    #[inline]
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => CacheId::Vertex,
            ShaderStage::TessControl => CacheId::TessControl,
            ShaderStage::TessEval => CacheId::TessEval,
            ShaderStage::Geometry => CacheId::Geometry,
            ShaderStage::Fragment => CacheId::Fragment,
            ShaderStage::Compute => CacheId::Compute,
        }
    }
}

/// Returns the groups that have to be re-emitted when the program bound from `cache_id`
/// changes.
///
/// Besides its own unit, a program decides the size of its binding table, the layout of its
/// push constants and how many samplers it reads. The last vertex-pipeline stage decides the
/// output layout that the setup unit and stream output read, and the fragment shader feeds
/// several fixed-function packets.
pub const fn dirty_flag_for_cache(cache_id: CacheId) -> DirtyFlags {
    const VUE_OUTPUT: DirtyFlags = DirtyFlags::SBE.union(DirtyFlags::STREAMOUT);

    match cache_id {
        CacheId::Vertex => render_stage_flags(ShaderStage::Vertex).union(VUE_OUTPUT),
        CacheId::TessControl => render_stage_flags(ShaderStage::TessControl),
        CacheId::TessEval => render_stage_flags(ShaderStage::TessEval).union(VUE_OUTPUT),
        CacheId::Geometry => render_stage_flags(ShaderStage::Geometry).union(VUE_OUTPUT),
        CacheId::Fragment => render_stage_flags(ShaderStage::Fragment)
            .union(DirtyFlags::WM)
            .union(DirtyFlags::SBE)
            .union(DirtyFlags::CLIP)
            .union(DirtyFlags::PS_BLEND),
        CacheId::Compute => DirtyFlags::CS
            .union(DirtyFlags::BINDINGS_CS)
            .union(DirtyFlags::SAMPLER_STATES_CS),
        CacheId::Blit => DirtyFlags::empty(),
    }
}

const fn render_stage_flags(stage: ShaderStage) -> DirtyFlags {
    DirtyFlags::shader(stage)
        .union(DirtyFlags::bindings(stage))
        .union(DirtyFlags::constants(stage))
        .union(DirtyFlags::sampler_states(stage))
}

/// Varying slot numbers, as the compiler assigns them in VUE maps and input masks.
pub mod varying {
    pub const POS: u8 = 0;
    pub const COL0: u8 = 1;
    pub const COL1: u8 = 2;
    pub const FOGC: u8 = 3;
    pub const TEX0: u8 = 4;
    pub const PSIZ: u8 = 12;
    pub const BFC0: u8 = 13;
    pub const BFC1: u8 = 14;
    pub const EDGE: u8 = 15;
    pub const CLIP_VERTEX: u8 = 16;
    pub const CLIP_DIST0: u8 = 17;
    pub const CLIP_DIST1: u8 = 18;
    pub const CULL_DIST0: u8 = 19;
    pub const CULL_DIST1: u8 = 20;
    pub const PRIMITIVE_ID: u8 = 21;
    pub const LAYER: u8 = 22;
    pub const VIEWPORT: u8 = 23;
    pub const FACE: u8 = 24;
    pub const PNTC: u8 = 25;
    /// The first generic varying.
    pub const VAR0: u8 = 32;
    /// Marks a VUE slot that holds no varying.
    pub const PAD: u8 = u8::MAX;

    /// Returns the bit of `varying` in a varying mask.
    #[inline]
    pub const fn bit(varying: u8) -> u64 {
        1 << varying
    }
}

/// The layout of a vertex URB entry: which varying each 16-byte slot holds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VueMap {
    pub slot_to_varying: SmallVec<[u8; 32]>,
}

impl VueMap {
    /// Lays out `varyings` one per slot, in order.
    pub fn new(varyings: &[u8]) -> Self {
        VueMap {
            slot_to_varying: varyings.iter().copied().collect(),
        }
    }

    #[inline]
    pub fn num_slots(&self) -> usize {
        self.slot_to_varying.len()
    }

    /// Returns the varying in `slot`, or [`varying::PAD`] past the end.
    #[inline]
    pub fn varying_at(&self, slot: usize) -> u8 {
        self.slot_to_varying
            .get(slot)
            .copied()
            .unwrap_or(varying::PAD)
    }

    /// Returns the slot holding `varying`.
    pub fn slot_of(&self, varying: u8) -> Option<usize> {
        self.slot_to_varying.iter().position(|&v| v == varying)
    }

    #[inline]
    pub fn writes(&self, varying: u8) -> bool {
        self.slot_of(varying).is_some()
    }
}

/// A range of a constant buffer that is pushed into registers, in 32-byte units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct UboRange {
    /// The constant buffer slot.
    pub block: u32,
    pub start: u32,
    pub length: u32,
}

/// Metadata shared by the vertex-pipeline stages.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VueProgData {
    /// The number of 32-byte units read from each input URB entry.
    pub urb_read_length: u32,
    /// The size of each output URB entry, in 64-byte units.
    pub urb_entry_size: u32,
    pub cull_distance_mask: u8,
    pub vue_map: VueMap,
}

/// How the tessellator subdivides a patch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TessDomain {
    #[default]
    Quad = 0,
    Tri = 1,
    Isoline = 2,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TessPartitioning {
    #[default]
    Integer = 0,
    FractionalOdd = 1,
    FractionalEven = 2,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TessOutputTopology {
    #[default]
    Point = 0,
    Line = 1,
    TriCw = 2,
    TriCcw = 3,
}

/// A fragment shader input and the setup attribute it is read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UrbInput {
    pub varying: u8,
    pub index: u8,
}

/// Fragment shader metadata.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FsProgData {
    /// One bit per barycentric interpolation mode, in `3DSTATE_WM` order.
    pub barycentric_interp_modes: u32,
    pub early_fragment_tests: bool,
    pub has_side_effects: bool,
    pub uses_kill: bool,
    /// The `3DSTATE_PS_EXTRA` computed depth mode, 0 if depth isn't written.
    pub computed_depth_mode: u32,
    pub num_varying_inputs: u32,
    /// One bit per setup attribute that is flat shaded.
    pub flat_inputs: u32,
    /// The varyings read, as a [`varying::bit`] mask.
    pub inputs_read: u64,
    pub urb_setup: SmallVec<[UrbInput; 16]>,
    pub dispatch_8: bool,
    pub dispatch_16: bool,
    pub dispatch_32: bool,
    /// Dispatch start register of each enabled kernel, in kernel start pointer order.
    pub dispatch_grf_start: [u32; 3],
    /// Offset of each kernel from the start of the assembly. Must be multiples of 64.
    pub prog_offset: [u32; 3],
    pub uses_src_depth: bool,
    pub uses_src_w: bool,
    pub persample_dispatch: bool,
    pub uses_omask: bool,
    pub uses_pos_offset: bool,
}

/// Compute shader metadata.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CsProgData {
    pub local_size: [u32; 3],
    /// The SIMD width the kernel was compiled for: 8, 16 or 32.
    pub simd_size: u32,
    /// The number of hardware threads one thread group needs.
    pub threads: u32,
    pub uses_barrier: bool,
    /// Shared local memory per thread group, in bytes.
    pub shared_local_memory_size: u32,
}

/// Metadata that only some stages have.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum StageProgData {
    Vertex(VueProgData),
    TessControl {
        vue: VueProgData,
        /// The number of HS instances per patch.
        instances: u32,
    },
    TessEval {
        vue: VueProgData,
        domain: TessDomain,
        partitioning: TessPartitioning,
        output_topology: TessOutputTopology,
    },
    Geometry {
        vue: VueProgData,
        output_vertex_size_hwords: u32,
        /// The `_3DPRIM_*` topology of the output.
        output_topology: u32,
        control_data_header_size_hwords: u32,
        invocations: u32,
    },
    Fragment(FsProgData),
    Compute(CsProgData),
    #[default]
    Blit,
}

/// What the compiler reports about a program.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgData {
    /// The size of the assembly in bytes. Filled in on upload.
    pub program_size: u32,
    pub dispatch_grf_start: u32,
    /// The size of the binding table the program expects, in bytes.
    pub binding_table_size: u32,
    pub sampler_count: u32,
    /// The number of 32-bit push constant parameters.
    pub nr_params: u32,
    pub ubo_ranges: [UboRange; 4],
    pub stage: StageProgData,
}

impl ProgData {
    /// Returns the vertex-pipeline metadata, if the program belongs to a vertex-pipeline stage.
    pub fn vue(&self) -> Option<&VueProgData> {
        match &self.stage {
            StageProgData::Vertex(vue)
            | StageProgData::TessControl { vue, .. }
            | StageProgData::TessEval { vue, .. }
            | StageProgData::Geometry { vue, .. } => Some(vue),
            _ => None,
        }
    }

    pub fn fs(&self) -> Option<&FsProgData> {
        match &self.stage {
            StageProgData::Fragment(fs) => Some(fs),
            _ => None,
        }
    }

    pub fn cs(&self) -> Option<&CsProgData> {
        match &self.stage {
            StageProgData::Compute(cs) => Some(cs),
            _ => None,
        }
    }
}

/// A program in the cache.
#[derive(Debug)]
pub struct CompiledShader {
    bo: Arc<Bo>,
    offset: u32,
    prog_data: ProgData,
    derived: Words,
}

impl CompiledShader {
    /// Returns the buffer object holding the assembly.
    #[inline]
    pub fn bo(&self) -> &Arc<Bo> {
        &self.bo
    }

    /// Returns the offset of the assembly in [`bo`].
    ///
    /// [`bo`]: Self::bo
    #[inline]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Returns the kernel start pointer, relative to the instruction base address.
    #[inline]
    pub fn kernel_start_pointer(&self) -> u32 {
        self.bo.offset_from_base() + self.offset
    }

    #[inline]
    pub fn prog_data(&self) -> &ProgData {
        &self.prog_data
    }

    /// Returns the packets programming the shader unit, ready to be copied into a batch. Empty
    /// for compute and blit programs.
    #[inline]
    pub fn derived(&self) -> &[u32] {
        &self.derived
    }
}

/// The program caches of a context, along with the programs bound to each stage.
#[derive(Debug)]
pub struct ProgramCache {
    hw: Gen,
    region: BumpRegion,
    caches: [HashMap<Box<[u8]>, Arc<CompiledShader>>; CACHE_COUNT],
    /// Offsets of the assembly uploaded to the current buffer object.
    assembly: HashMap<Box<[u8]>, u32>,
    bound: [Option<Arc<CompiledShader>>; STAGE_COUNT],
}

impl ProgramCache {
    pub fn new(hw: Gen, provider: &mut dyn BufferProvider, size: u32) -> Result<Self, AllocError> {
        Ok(ProgramCache {
            hw,
            region: BumpRegion::new(
                provider,
                "program cache",
                MemZone::Shader,
                size,
                PROGRAM_ALIGNMENT,
            )?,
            caches: Default::default(),
            assembly: HashMap::default(),
            bound: Default::default(),
        })
    }

    #[inline]
    pub fn region(&self) -> &BumpRegion {
        &self.region
    }

    /// Returns the number of programs cached under `cache_id`.
    #[inline]
    pub fn len(&self, cache_id: CacheId) -> usize {
        self.caches[cache_id.index()].len()
    }

    pub fn lookup(&self, cache_id: CacheId, key: &[u8]) -> Option<&Arc<CompiledShader>> {
        self.caches[cache_id.index()].get(key)
    }

    /// Returns the key of an earlier compile of the program with `program_string_id`, so that
    /// a recompile can reuse its key as a starting point.
    ///
    /// Keys of the stage caches start with the program string id, as 4 little-endian bytes.
    pub fn find_previous_compile(&self, cache_id: CacheId, program_string_id: u32) -> Option<&[u8]> {
        cache_id.stage()?;

        let id = program_string_id.to_le_bytes();

        self.caches[cache_id.index()]
            .keys()
            .find(|key| key.starts_with(&id))
            .map(|key| &**key)
    }

    /// Uploads `assembly` and caches it under `key` along with `prog_data` and the packets
    /// derived from them.
    ///
    /// If byte-identical assembly was already uploaded to the current buffer object, it is
    /// reused rather than copied again.
    ///
    /// # Panics
    ///
    /// - Panics if `assembly` is empty.
    pub fn upload(
        &mut self,
        cache_id: CacheId,
        key: &[u8],
        assembly: &[u8],
        mut prog_data: ProgData,
        provider: &mut dyn BufferProvider,
        user: &mut dyn RegionUser,
    ) -> Result<Arc<CompiledShader>, AllocError> {
        assert!(!assembly.is_empty(), "empty shader assembly");

        let offset = match self.assembly.get(assembly) {
            Some(&offset) => {
                tracing::debug!(
                    ?cache_id,
                    offset,
                    size = assembly.len(),
                    "reusing identical shader assembly",
                );
                user.reference(self.region.bo());

                offset
            }
            None => {
                let size = u32::try_from(assembly.len()).unwrap_or(u32::MAX);
                let reservation = self.region.reserve(size, PROGRAM_ALIGNMENT, provider, user)?;

                if reservation.replaced {
                    self.assembly.clear();
                }

                self.region.write(reservation.offset, assembly);
                self.assembly.insert(assembly.into(), reservation.offset);

                reservation.offset
            }
        };

        prog_data.program_size = assembly.len() as u32;

        let bo = self.region.bo().clone();
        let ksp = bo.offset_from_base() + offset;
        let derived = match cache_id.stage() {
            Some(stage) => derived_state(self.hw, stage, ksp, &prog_data),
            None => Words::new(),
        };

        let shader = Arc::new(CompiledShader {
            bo,
            offset,
            prog_data,
            derived,
        });

        self.caches[cache_id.index()].insert(key.into(), shader.clone());

        Ok(shader)
    }

    /// Returns the program bound to `stage`.
    #[inline]
    pub fn bound(&self, stage: ShaderStage) -> Option<&Arc<CompiledShader>> {
        self.bound[stage.index()].as_ref()
    }

    /// Binds the program cached under `key`. Returns whether it was found.
    ///
    /// Nothing is marked if the program is already bound.
    ///
    /// # Panics
    ///
    /// - Panics if `cache_id` is [`CacheId::Blit`].
    pub fn bind_cached_shader(
        &mut self,
        cache_id: CacheId,
        key: &[u8],
        dirty: &mut DirtyTracker,
    ) -> bool {
        let stage = cache_id
            .stage()
            .unwrap_or_else(|| panic!("blit programs can't be bound"));

        let Some(shader) = self.lookup(cache_id, key).cloned() else {
            return false;
        };

        self.bind(stage, Some(shader), dirty);

        true
    }

    /// Leaves `stage` without a program.
    pub fn unbind(&mut self, stage: ShaderStage, dirty: &mut DirtyTracker) {
        self.bind(stage, None, dirty);
    }

    /// Uploads a program and binds it.
    ///
    /// # Panics
    ///
    /// - Panics if `cache_id` is [`CacheId::Blit`].
    #[allow(clippy::too_many_arguments)]
    pub fn upload_and_bind(
        &mut self,
        cache_id: CacheId,
        key: &[u8],
        assembly: &[u8],
        prog_data: ProgData,
        dirty: &mut DirtyTracker,
        provider: &mut dyn BufferProvider,
        user: &mut dyn RegionUser,
    ) -> Result<Arc<CompiledShader>, AllocError> {
        let stage = cache_id
            .stage()
            .unwrap_or_else(|| panic!("blit programs can't be bound"));

        let shader = self.upload(cache_id, key, assembly, prog_data, provider, user)?;
        self.bind(stage, Some(shader.clone()), dirty);

        Ok(shader)
    }

    fn bind(
        &mut self,
        stage: ShaderStage,
        shader: Option<Arc<CompiledShader>>,
        dirty: &mut DirtyTracker,
    ) {
        let old = &self.bound[stage.index()];

        let unchanged = match (old, &shader) {
            (Some(old), Some(new)) => Arc::ptr_eq(old, new),
            (None, None) => true,
            _ => false,
        };

        if unchanged {
            return;
        }

        let urb_entry_size =
            |shader: &Option<Arc<CompiledShader>>| -> Option<u32> {
                shader
                    .as_ref()
                    .and_then(|shader| shader.prog_data.vue())
                    .map(|vue| vue.urb_entry_size)
            };

        if urb_entry_size(old) != urb_entry_size(&shader) {
            dirty.mark(DirtyFlags::URB);
        }

        dirty.mark(dirty_flag_for_cache(stage.into()));
        self.bound[stage.index()] = shader;
    }
}

/// Encodes a sampler count the way shader unit packets expect it: in groups of 4, at most 16.
#[inline]
pub(crate) const fn encode_sampler_count(count: u32) -> u32 {
    let count = if count > 16 { 16 } else { count };

    count.div_ceil(4)
}

/// Returns the URB read offset and length of the outputs of the last vertex stage, for the
/// stages whose packets have output fields. The header slot is skipped.
fn urb_entry_output(vue_map: &VueMap) -> (u32, u32) {
    let length = (vue_map.num_slots() as u32).div_ceil(2).saturating_sub(1);

    (1, length.max(1))
}

const GS_DISPATCH_MODE_SIMD8: u32 = 3;
const POSOFFSET_NONE: u32 = 0;
const POSOFFSET_SAMPLE: u32 = 2;

fn derived_state(hw: Gen, stage: ShaderStage, ksp: u32, prog_data: &ProgData) -> Words {
    let ksp = Address(u64::from(ksp));
    let bt_count = prog_data.binding_table_size / 4;
    let sampler_count = encode_sampler_count(prog_data.sampler_count);
    let max_threads = hw.max_threads(stage);

    match &prog_data.stage {
        StageProgData::Vertex(vue) => {
            let (output_offset, output_length) = urb_entry_output(&vue.vue_map);

            let mut vs = Builder::<Vs>::new(hw);
            vs.kernel_start_pointer = ksp;
            vs.binding_table_entry_count = bt_count;
            vs.sampler_count = sampler_count;
            vs.vertex_urb_entry_read_length = vue.urb_read_length;
            vs.vertex_urb_entry_read_offset = 0;
            vs.dispatch_grf_start_register_for_urb_data = prog_data.dispatch_grf_start;
            vs.function_enable = true;
            vs.simd8_dispatch_enable = true;
            vs.statistics_enable = true;
            vs.maximum_number_of_threads = max_threads - 1;
            vs.user_clip_distance_cull_test_enable_bitmask = vue.cull_distance_mask.into();
            vs.vertex_urb_entry_output_read_offset = output_offset;
            vs.vertex_urb_entry_output_length = output_length;

            vs.finish()
        }
        StageProgData::TessControl { vue, instances } => {
            let mut hs = Builder::<Hs>::new(hw);
            hs.kernel_start_pointer = ksp;
            hs.binding_table_entry_count = bt_count;
            hs.sampler_count = sampler_count;
            hs.vertex_urb_entry_read_length = vue.urb_read_length;
            hs.vertex_urb_entry_read_offset = 0;
            hs.dispatch_grf_start_register_for_urb_data = prog_data.dispatch_grf_start;
            hs.instance_count = instances.saturating_sub(1);
            hs.maximum_number_of_threads = max_threads - 1;
            hs.include_vertex_handles = true;
            hs.statistics_enable = true;
            hs.enable = true;

            hs.finish()
        }
        StageProgData::TessEval {
            vue,
            domain,
            partitioning,
            output_topology,
        } => {
            let mut te = Builder::<Te>::new(hw);
            te.te_enable = true;
            te.te_domain = *domain as u32;
            te.partitioning = *partitioning as u32;
            te.output_topology = *output_topology as u32;
            te.maximum_tessellation_factor_odd = 63.0;
            te.maximum_tessellation_factor_not_odd = 64.0;

            let mut ds = Builder::<Ds>::new(hw);
            ds.kernel_start_pointer = ksp;
            ds.binding_table_entry_count = bt_count;
            ds.sampler_count = sampler_count;
            ds.patch_urb_entry_read_length = vue.urb_read_length;
            ds.patch_urb_entry_read_offset = 0;
            ds.dispatch_grf_start_register_for_urb_data = prog_data.dispatch_grf_start;
            ds.function_enable = true;
            ds.compute_w_coordinate_enable = *domain == TessDomain::Tri;
            ds.statistics_enable = true;
            ds.maximum_number_of_threads = max_threads - 1;

            let mut words = te.finish();
            words.extend_from_slice(&ds.finish());

            words
        }
        StageProgData::Geometry {
            vue,
            output_vertex_size_hwords,
            output_topology,
            control_data_header_size_hwords,
            invocations,
        } => {
            let (output_offset, output_length) = urb_entry_output(&vue.vue_map);

            let mut gs = Builder::<Gs>::new(hw);
            gs.kernel_start_pointer = ksp;
            gs.binding_table_entry_count = bt_count;
            gs.sampler_count = sampler_count;
            gs.vertex_urb_entry_read_length = vue.urb_read_length;
            gs.vertex_urb_entry_read_offset = 0;
            gs.dispatch_grf_start_register_for_urb_data = prog_data.dispatch_grf_start;
            gs.include_vertex_handles = true;
            gs.output_vertex_size = (output_vertex_size_hwords * 2).saturating_sub(1);
            gs.output_topology = *output_topology;
            gs.control_data_header_size = *control_data_header_size_hwords;
            gs.instance_control = invocations.saturating_sub(1);
            gs.dispatch_mode = GS_DISPATCH_MODE_SIMD8;
            gs.function_enable = true;
            gs.statistics_enable = true;
            gs.maximum_number_of_threads = if hw == Gen::Gen8 {
                max_threads / 2 - 1
            } else {
                max_threads - 1
            };
            gs.vertex_urb_entry_output_read_offset = output_offset;
            gs.vertex_urb_entry_output_length = output_length;

            gs.finish()
        }
        StageProgData::Fragment(fs) => {
            let kernel = |i: usize| Address(ksp.0 + u64::from(fs.prog_offset[i]));

            let mut ps = Builder::<Ps>::new(hw);
            ps.vector_mask_enable = true;
            ps.binding_table_entry_count = bt_count;
            ps.sampler_count = sampler_count;
            ps.maximum_number_of_threads_per_psd = 64 - if hw == Gen::Gen8 { 2 } else { 1 };
            ps.push_constant_enable =
                prog_data.nr_params > 0 || prog_data.ubo_ranges[0].length > 0;
            ps.position_xy_offset_select = if fs.uses_pos_offset {
                POSOFFSET_SAMPLE
            } else {
                POSOFFSET_NONE
            };
            ps.simd8_dispatch_enable = fs.dispatch_8;
            ps.simd16_dispatch_enable = fs.dispatch_16;
            ps.simd32_dispatch_enable = fs.dispatch_32;
            ps.dispatch_grf_start_register_for_constant_setup_data_0 = fs.dispatch_grf_start[0];
            ps.dispatch_grf_start_register_for_constant_setup_data_1 = fs.dispatch_grf_start[1];
            ps.dispatch_grf_start_register_for_constant_setup_data_2 = fs.dispatch_grf_start[2];
            ps.kernel_start_pointer_0 = kernel(0);
            ps.kernel_start_pointer_1 = kernel(1);
            ps.kernel_start_pointer_2 = kernel(2);

            let mut psx = Builder::<PsExtra>::new(hw);
            psx.pixel_shader_valid = true;
            psx.pixel_shader_computed_depth_mode = fs.computed_depth_mode;
            psx.pixel_shader_kills_pixel = fs.uses_kill;
            psx.attribute_enable = fs.num_varying_inputs != 0;
            psx.pixel_shader_uses_source_depth = fs.uses_src_depth;
            psx.pixel_shader_uses_source_w = fs.uses_src_w;
            psx.pixel_shader_is_per_sample = fs.persample_dispatch;
            psx.o_mask_present_to_render_target = fs.uses_omask;
            psx.pixel_shader_has_uav = fs.has_side_effects;

            let mut words = ps.finish();
            words.extend_from_slice(&psx.finish());

            words
        }
        StageProgData::Compute(_) | StageProgData::Blit => Words::new(),
    }
}
