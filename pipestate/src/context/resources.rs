//! Resources bound to a context through set-style calls.
//!
//! Unlike CSOs these are not encoded when they are created. They are plain descriptions that
//! the draw encoder turns into packets, binding table entries and validation-list entries.

use crate::{
    bo::Bo,
    cso::blend::MAX_COLOR_BUFFERS,
    packet::{
        cmd::DepthBuffer,
        state::{ScissorRect as ScissorRectRecord, SfClipViewport, VertexBufferState},
        Address, Builder, Words, MOCS_WB,
    },
    Gen,
};
use smallvec::SmallVec;
use std::sync::Arc;

/// The most viewports and scissor rectangles a context can hold.
pub const MAX_VIEWPORTS: usize = 16;

/// The most vertex buffers a context can hold.
pub const MAX_VERTEX_BUFFERS: usize = 33;

/// The most constant buffers a stage can have bound.
pub const MAX_CONSTANT_BUFFERS: usize = 15;

/// The most sampler views a stage can have bound.
pub const MAX_SAMPLER_VIEWS: usize = 128;

/// The size of the guardband, in pixels, around the render area.
const GUARDBAND_SIZE: f32 = 16384.0;

/// A `RENDER_SURFACE_STATE` somewhere in the surface zone.
#[derive(Clone, Debug)]
pub struct SurfaceState {
    pub bo: Arc<Bo>,
    /// Offset of the surface state from the start of `bo`. Must be a multiple of 64.
    pub offset: u32,
}

impl SurfaceState {
    /// Returns the binding table entry pointing at the surface state.
    #[inline]
    pub fn pointer(&self) -> u32 {
        self.bo.offset_from_base() + self.offset
    }
}

/// A view of a surface, for sampling or as a color buffer.
#[derive(Clone, Debug)]
pub struct SurfaceView {
    /// The memory the view reads or writes.
    pub bo: Arc<Bo>,
    pub surface_state: SurfaceState,
    /// The surface format of the view. Rendering to the same memory with another format needs
    /// a render cache flush first.
    pub format: u32,
}

/// A range of a buffer bound as a constant buffer.
#[derive(Clone, Debug)]
pub struct ConstantBuffer {
    pub bo: Arc<Bo>,
    /// Offset of the range from the start of `bo`. Must be a multiple of 32, since pushed ranges
    /// are addressed in 32-byte units.
    pub offset: u32,
    pub size: u32,
    /// The surface state used when the shader pulls from the buffer instead.
    pub surface_state: SurfaceState,
}

/// A vertex buffer binding.
#[derive(Clone, Debug)]
pub struct VertexBuffer {
    pub bo: Arc<Bo>,
    pub offset: u32,
    /// The distance between consecutive vertices, in bytes.
    pub stride: u32,
}

impl VertexBuffer {
    /// Returns the `VERTEX_BUFFER_STATE` of the binding in slot `index`.
    pub(crate) fn state(&self, index: u32) -> VertexBufferState {
        VertexBufferState {
            buffer_pitch: self.stride,
            address_modify_enable: true,
            mocs: MOCS_WB,
            vertex_buffer_index: index,
            buffer_starting_address: Address(self.bo.address() + u64::from(self.offset)),
            buffer_size: (self.bo.size() - u64::from(self.offset)) as u32,
            ..Default::default()
        }
    }
}

/// The formats a depth buffer can have.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DepthFormat {
    D16Unorm,
    #[default]
    D32Float,
}

impl DepthFormat {
    #[inline]
    pub const fn to_hw(self) -> u32 {
        match self {
            DepthFormat::D16Unorm => DepthBuffer::D16_UNORM,
            DepthFormat::D32Float => DepthBuffer::D32_FLOAT,
        }
    }
}

/// The depth surface of a depth-stencil view.
#[derive(Clone, Debug)]
pub struct DepthSurface {
    pub bo: Arc<Bo>,
    pub format: DepthFormat,
    /// The row pitch in bytes.
    pub pitch: u32,
    /// The distance between array slices in rows.
    pub qpitch: u32,
}

/// A hierarchical depth or separate stencil surface.
#[derive(Clone, Debug)]
pub struct AuxSurface {
    pub bo: Arc<Bo>,
    pub pitch: u32,
    pub qpitch: u32,
}

/// The depth-stencil attachment of a framebuffer.
#[derive(Clone, Debug, Default)]
pub struct DepthStencilView {
    pub depth: Option<DepthSurface>,
    pub hiz: Option<AuxSurface>,
    pub stencil: Option<AuxSurface>,
    pub clear_value: f32,
}

impl DepthStencilView {
    /// Returns every BO the view points the hardware at.
    pub(crate) fn bos(&self) -> impl Iterator<Item = &Arc<Bo>> {
        let depth = self.depth.as_ref().map(|depth| &depth.bo);
        let hiz = self.hiz.as_ref().map(|hiz| &hiz.bo);
        let stencil = self.stencil.as_ref().map(|stencil| &stencil.bo);

        depth.into_iter().chain(hiz).chain(stencil)
    }
}

/// The render targets of subsequent draws.
#[derive(Clone, Debug, Default)]
pub struct FramebufferState {
    pub width: u32,
    pub height: u32,
    /// The number of array layers, or 0 if the attachments aren't layered.
    pub layers: u32,
    /// The number of samples per pixel, or 0 for single-sampled.
    pub samples: u32,
    pub cbufs: SmallVec<[Option<SurfaceView>; MAX_COLOR_BUFFERS]>,
    pub zsbuf: Option<DepthStencilView>,
}

impl FramebufferState {
    /// Returns whether any color buffer is bound.
    #[inline]
    pub fn has_color_buffer(&self) -> bool {
        self.cbufs.iter().any(Option::is_some)
    }
}

/// The transform from normalized device coordinates to window coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub scale: [f32; 3],
    pub translate: [f32; 3],
}

impl Viewport {
    fn extent(&self, axis: usize, sign: f32) -> f32 {
        self.scale[axis].abs().copysign(sign) + self.translate[axis]
    }

    /// Encodes the `SF_CLIP_VIEWPORT` of the viewport when rendering to a `width` by `height`
    /// framebuffer.
    ///
    /// # Algorithm
    ///
    /// The guardband is a square of twice [`GUARDBAND_SIZE`] centered on the render area, which
    /// is the union of the framebuffer and the viewport. Primitives within it are rasterized
    /// without clipping. It is converted back to normalized device coordinates for the clipper.
    pub(crate) fn sf_clip_viewport(&self, hw: Gen, width: u32, height: u32) -> Words {
        let [m00, m11, m22] = self.scale;
        let [m30, m31, m32] = self.translate;

        let mut vp = Builder::<SfClipViewport>::new(hw);
        vp.viewport_matrix_element_m00 = m00;
        vp.viewport_matrix_element_m11 = m11;
        vp.viewport_matrix_element_m22 = m22;
        vp.viewport_matrix_element_m30 = m30;
        vp.viewport_matrix_element_m31 = m31;
        vp.viewport_matrix_element_m32 = m32;

        // A viewport scaling to 0 renders nothing, so the guardband stays empty.
        if m00 != 0.0 && m11 != 0.0 {
            let ra_xmin = 0f32.min(m30 + m00).min(m30 - m00);
            let ra_xmax = (width as f32).max(m30 + m00).max(m30 - m00);
            let ra_ymin = 0f32.min(m31 + m11).min(m31 - m11);
            let ra_ymax = (height as f32).max(m31 + m11).max(m31 - m11);

            let gb_xmin = ((ra_xmin + ra_xmax) / 2.0 - GUARDBAND_SIZE - m30) / m00;
            let gb_xmax = ((ra_xmin + ra_xmax) / 2.0 + GUARDBAND_SIZE - m30) / m00;
            let gb_ymin = ((ra_ymin + ra_ymax) / 2.0 - GUARDBAND_SIZE - m31) / m11;
            let gb_ymax = ((ra_ymin + ra_ymax) / 2.0 + GUARDBAND_SIZE - m31) / m11;

            // A negative scale flips the guardband around.
            vp.x_min_clip_guardband = gb_xmin.min(gb_xmax);
            vp.x_max_clip_guardband = gb_xmin.max(gb_xmax);
            vp.y_min_clip_guardband = gb_ymin.min(gb_ymax);
            vp.y_max_clip_guardband = gb_ymin.max(gb_ymax);
        }

        vp.x_min_viewport = self.extent(0, -1.0);
        vp.x_max_viewport = self.extent(0, 1.0) - 1.0;
        vp.y_min_viewport = self.extent(1, -1.0);
        vp.y_max_viewport = self.extent(1, 1.0) - 1.0;

        vp.finish()
    }
}

/// A scissor rectangle in window coordinates. The maximums are exclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ScissorRect {
    pub minx: u16,
    pub miny: u16,
    pub maxx: u16,
    pub maxy: u16,
}

impl ScissorRect {
    pub(crate) fn encode(&self, hw: Gen) -> Words {
        let mut sc = Builder::<ScissorRectRecord>::new(hw);

        if self.minx >= self.maxx || self.miny >= self.maxy {
            // The hardware has inclusive maximums, so an empty rectangle needs min > max.
            sc.scissor_rectangle_x_min = 1;
            sc.scissor_rectangle_y_min = 1;
        } else {
            sc.scissor_rectangle_x_min = self.minx.into();
            sc.scissor_rectangle_y_min = self.miny.into();
            sc.scissor_rectangle_x_max = u32::from(self.maxx) - 1;
            sc.scissor_rectangle_y_max = u32::from(self.maxy) - 1;
        }

        sc.finish()
    }
}
