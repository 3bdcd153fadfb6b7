//! Encoding of compute dispatches.

use super::{upload_dynamic, Context, DrawError, Shaders};
use crate::{
    alloc::AllocError,
    dirty::DirtyFlags,
    packet::{
        cmd::{GpgpuWalker, MediaInterfaceDescriptorLoad, MediaStateFlush, MediaVfeState},
        pack,
        state::InterfaceDescriptorData,
        Address, Builder,
    },
    program_cache::{CompiledShader, CsProgData},
    align_up, Pipeline, ShaderStage, STAGE_COUNT,
};

/// Batch space a dispatch may take at most, in bytes.
const DISPATCH_SPACE: usize = 400 * 4;

const INTERFACE_DESCRIPTOR_SIZE: u32 = 8 * 4;

/// URB entries and their size, in 256-bit units, for the indirect payload of each thread.
const VFE_URB_ENTRIES: u32 = 2;
const VFE_URB_ENTRY_SIZE: u32 = 2;

/// The most sampler state entries an interface descriptor counts, in groups of four.
const MAX_SAMPLER_COUNT: u32 = 4;

/// The most binding table entries an interface descriptor prefetches.
const MAX_BINDING_TABLE_PREFETCH: u32 = 31;

/// Parameters of a compute dispatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GridInfo {
    /// The number of thread groups in each dimension. The size of a group comes from the
    /// bound program.
    pub grid: [u32; 3],
}

impl Context {
    /// Encodes a compute dispatch into the current batch.
    ///
    /// Empty grids encode nothing.
    pub fn launch_grid(&mut self, info: &GridInfo) -> Result<(), DrawError> {
        if info.grid.contains(&0) {
            tracing::trace!(grid = ?info.grid, "empty grid");

            return Ok(());
        }

        self.encode_dispatch(info).inspect_err(|err| {
            tracing::warn!(%err, "failed to encode dispatch");
        })
    }

    fn encode_dispatch(&mut self, info: &GridInfo) -> Result<(), DrawError> {
        self.recover_lost_batch();

        let shaders = self.bound_shaders();

        let Some(cs) = shaders[ShaderStage::Compute.index()].clone() else {
            return Err(DrawError::MissingShader(ShaderStage::Compute));
        };
        let Some(cs_data) = cs.prog_data().cs() else {
            return Err(DrawError::MissingShader(ShaderStage::Compute));
        };

        self.batch.require_space(DISPATCH_SPACE)?;

        let mut bt_sizes = [0; STAGE_COUNT];
        bt_sizes[ShaderStage::Compute.index()] = cs.prog_data().binding_table_size;
        self.binder.reserve_stages(
            &[ShaderStage::Compute],
            bt_sizes,
            &mut self.dirty,
            &mut *self.provider,
            &mut self.batch,
        )?;

        self.restore_saved_bos(&shaders);

        for view in self.state.sampler_views[ShaderStage::Compute.index()]
            .iter()
            .flatten()
        {
            self.batch.cache_flush_for_read(&view.bo);
        }

        if self.batch.pipeline() == Pipeline::Render {
            self.select_pipeline(Pipeline::Compute);
        }

        let dirty = self.dirty.bits();

        if dirty.intersects(DirtyFlags::BINDINGS_CS)
            && self.binder.bt_offset(ShaderStage::Compute) != 0
        {
            let count = bt_sizes[ShaderStage::Compute.index()] / 4;
            let entries = self.binding_table_entries(ShaderStage::Compute, count);
            self.binder.write_table(ShaderStage::Compute, &entries);
        }

        if dirty.intersects(DirtyFlags::CS) {
            self.batch.emit(&pack::<MediaVfeState>(self.hw, |vfe| {
                vfe.maximum_number_of_threads = self.hw.max_threads(ShaderStage::Compute) - 1;
                vfe.reset_gateway_timer = true;
                vfe.number_of_urb_entries = VFE_URB_ENTRIES;
                vfe.urb_entry_allocation_size = VFE_URB_ENTRY_SIZE;
                vfe.curbe_allocation_size =
                    align_up(push_constant_regs(&cs) * cs_data.threads, 2);
            }));
        }

        if dirty.intersects(DirtyFlags::CS | DirtyFlags::BINDINGS_CS | DirtyFlags::SAMPLER_STATES_CS)
        {
            self.emit_interface_descriptor(&cs, cs_data)?;
        }

        self.batch
            .emit(&pack::<GpgpuWalker>(self.hw, |walker| {
                let (simd_size, right_mask) = execution_masks(cs_data);

                walker.simd_size = simd_size;
                walker.thread_width_counter_maximum = cs_data.threads.max(1) - 1;
                walker.thread_group_id_x_dimension = info.grid[0];
                walker.thread_group_id_y_dimension = info.grid[1];
                walker.thread_group_id_z_dimension = info.grid[2];
                walker.right_execution_mask = right_mask;
                walker.bottom_execution_mask = u32::MAX;
            }));
        self.batch.emit(&pack::<MediaStateFlush>(self.hw, |_| {}));

        self.dirty.clear(DirtyFlags::COMPUTE);

        tracing::trace!(?dirty, grid = ?info.grid, "encoded dispatch");

        Ok(())
    }

    fn emit_interface_descriptor(
        &mut self,
        cs: &CompiledShader,
        cs_data: &CsProgData,
    ) -> Result<(), AllocError> {
        let hw = self.hw;
        let prog_data = cs.prog_data();
        let table = &self.state.sampler_tables[ShaderStage::Compute.index()];

        self.batch.use_bo(cs.bo(), false);
        self.batch.use_bo(self.binder.bo(), false);

        let mut idd = Builder::<InterfaceDescriptorData>::new(hw);
        idd.kernel_start_pointer = Address::from(cs.kernel_start_pointer());
        idd.binding_table_pointer = Address::from(self.binder.bt_offset(ShaderStage::Compute));
        idd.binding_table_entry_count =
            (prog_data.binding_table_size / 4).min(MAX_BINDING_TABLE_PREFETCH);
        idd.constant_indirect_urb_entry_read_length = push_constant_regs(cs);
        idd.number_of_threads_in_gpgpu_thread_group = cs_data.threads;
        idd.shared_local_memory_size = encode_slm_size(cs_data.shared_local_memory_size);
        idd.barrier_enable = cs_data.uses_barrier;

        if let Some(table) = table {
            self.batch.use_bo(&table.bo, false);

            if let Some(border_bo) = &table.border_bo {
                self.batch.use_bo(border_bo, false);
            }

            idd.sampler_state_pointer = Address::from(table.pointer);
            idd.sampler_count = prog_data.sampler_count.div_ceil(4).min(MAX_SAMPLER_COUNT);
        }

        let (bo, pointer) = upload_dynamic(
            &mut self.dynamic,
            &mut *self.provider,
            &mut self.batch,
            &idd.finish(),
            64,
        )?;
        self.batch
            .emit(&pack::<MediaInterfaceDescriptorLoad>(hw, |load| {
                load.interface_descriptor_total_length = INTERFACE_DESCRIPTOR_SIZE;
                load.interface_descriptor_data_start_address = Address::from(pointer);
            }));
        self.dynamic_bos.interface_descriptor = Some(bo);

        Ok(())
    }

    /// Pins the buffer objects the compute state of the hardware context still points at.
    pub(super) fn restore_compute_bos(&mut self, shaders: &Shaders) {
        let dirty = self.dirty.bits();
        let i = ShaderStage::Compute.index();

        if !dirty.intersects(DirtyFlags::CS) {
            if let Some(cs) = &shaders[i] {
                self.batch.use_bo(cs.bo(), false);
            }
        }

        if !dirty.intersects(DirtyFlags::SAMPLER_STATES_CS) {
            if let Some(table) = &self.state.sampler_tables[i] {
                self.batch.use_bo(&table.bo, false);

                if let Some(border_bo) = &table.border_bo {
                    self.batch.use_bo(border_bo, false);
                }
            }
        }

        if !dirty.intersects(DirtyFlags::BINDINGS_CS) {
            self.batch.use_bo(self.binder.bo(), false);

            for view in self.state.sampler_views[i].iter().flatten() {
                self.batch.use_bo(&view.bo, false);
                self.batch.use_bo(&view.surface_state.bo, false);
            }

            for cbuf in self.state.constant_buffers[i].iter().flatten() {
                self.batch.use_bo(&cbuf.bo, false);
                self.batch.use_bo(&cbuf.surface_state.bo, false);
            }
        }

        if let Some(bo) = &self.dynamic_bos.interface_descriptor {
            self.batch.use_bo(bo, false);
        }
    }
}

/// Returns the number of registers of push constants each thread reads.
fn push_constant_regs(cs: &CompiledShader) -> u32 {
    cs.prog_data().nr_params.div_ceil(8)
}

/// Returns the `SIMD_SIZE` of the walker and the execution mask of the last thread of each
/// group, which may be partially filled.
///
/// # Panics
///
/// - Panics if the SIMD width isn't 8, 16 or 32.
fn execution_masks(cs_data: &CsProgData) -> (u32, u32) {
    let simd_size = match cs_data.simd_size {
        8 => GpgpuWalker::SIMD8,
        16 => GpgpuWalker::SIMD16,
        32 => GpgpuWalker::SIMD32,
        width => panic!("unsupported SIMD width {width}"),
    };

    let group_size: u32 = cs_data.local_size.iter().product();
    let remainder = group_size % cs_data.simd_size;
    let right_mask = if remainder == 0 {
        u32::MAX >> (32 - cs_data.simd_size)
    } else {
        (1 << remainder) - 1
    };

    (simd_size, right_mask)
}

/// Encodes a shared local memory size: 0 for none, otherwise the power of two of kilobytes,
/// from 1 KiB, plus one.
fn encode_slm_size(bytes: u32) -> u32 {
    if bytes == 0 {
        return 0;
    }

    bytes.max(1024).next_power_of_two().ilog2() - 10 + 1
}
