//! Depth, stencil and alpha test state.

use super::CompareFunc;
use crate::{
    packet::{cmd::WmDepthStencil, state::CcViewport, Builder, Words},
    Gen,
};

/// What to do with the stencil value of a sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StencilOp {
    #[default]
    Keep = 0,
    Zero = 1,
    Replace = 2,
    IncrementAndClamp = 3,
    DecrementAndClamp = 4,
    IncrementAndWrap = 5,
    DecrementAndWrap = 6,
    Invert = 7,
}

/// The stencil test of one face.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StencilFaceInfo {
    pub enabled: bool,
    pub func: CompareFunc,
    pub fail_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub value_mask: u8,
    pub write_mask: u8,
}

impl Default for StencilFaceInfo {
    #[inline]
    fn default() -> Self {
        StencilFaceInfo {
            enabled: false,
            func: CompareFunc::Always,
            fail_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
            value_mask: 0xff,
            write_mask: 0xff,
        }
    }
}

/// The alpha test. It is applied by the blend and color calculator units, which is why changing
/// it dirties their state.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AlphaTest {
    pub enabled: bool,
    pub func: CompareFunc,
    pub ref_value: f32,
}

/// Parameters to create a [`DepthStencilAlphaState`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthStencilAlphaInfo {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_func: CompareFunc,
    /// The front face test, then the back face test. The back face test being enabled turns on
    /// two-sided stencil.
    pub stencil: [StencilFaceInfo; 2],
    pub alpha: AlphaTest,
    pub depth_bounds_min: f32,
    pub depth_bounds_max: f32,
}

impl Default for DepthStencilAlphaInfo {
    #[inline]
    fn default() -> Self {
        DepthStencilAlphaInfo {
            depth_test_enable: false,
            depth_write_enable: false,
            depth_func: CompareFunc::Always,
            stencil: [StencilFaceInfo::default(); 2],
            alpha: AlphaTest::default(),
            depth_bounds_min: 0.0,
            depth_bounds_max: 1.0,
        }
    }
}

/// A depth-stencil-alpha CSO.
#[derive(Clone, Debug, PartialEq)]
pub struct DepthStencilAlphaState {
    /// `3DSTATE_WM_DEPTH_STENCIL` without the stencil reference values.
    pub wmds: Words,
    /// `CC_VIEWPORT`, holding the depth bounds.
    pub cc_viewport: Words,
    pub alpha: AlphaTest,
    pub two_sided_stencil: bool,
    pub writes_depth: bool,
    pub writes_stencil: bool,
}

impl DepthStencilAlphaState {
    /// # Panics
    ///
    /// - Panics if depth writes are enabled with an `Equal` depth test, which writes nothing.
    pub fn new(hw: Gen, info: &DepthStencilAlphaInfo) -> Self {
        assert!(
            !(info.depth_func == CompareFunc::Equal && info.depth_write_enable),
            "depth writes with an equal depth test should be optimized away",
        );

        let [front, back] = &info.stencil;
        let two_sided_stencil = back.enabled;
        let writes_stencil = front.write_mask != 0 || (two_sided_stencil && back.write_mask != 0);

        let mut wmds = Builder::<WmDepthStencil>::new(hw);
        wmds.stencil_fail_op = front.fail_op as u32;
        wmds.stencil_pass_depth_fail_op = front.depth_fail_op as u32;
        wmds.stencil_pass_depth_pass_op = front.pass_op as u32;
        wmds.stencil_test_function = front.func.to_hw();
        wmds.backface_stencil_fail_op = back.fail_op as u32;
        wmds.backface_stencil_pass_depth_fail_op = back.depth_fail_op as u32;
        wmds.backface_stencil_pass_depth_pass_op = back.pass_op as u32;
        wmds.backface_stencil_test_function = back.func.to_hw();
        wmds.depth_test_function = info.depth_func.to_hw();
        wmds.double_sided_stencil_enable = two_sided_stencil;
        wmds.stencil_test_enable = front.enabled;
        wmds.stencil_buffer_write_enable = writes_stencil;
        wmds.depth_test_enable = info.depth_test_enable;
        wmds.depth_buffer_write_enable = info.depth_write_enable;
        wmds.stencil_test_mask = front.value_mask.into();
        wmds.stencil_write_mask = front.write_mask.into();
        wmds.backface_stencil_test_mask = back.value_mask.into();
        wmds.backface_stencil_write_mask = back.write_mask.into();

        let mut cc_vp = Builder::<CcViewport>::new(hw);
        cc_vp.minimum_depth = info.depth_bounds_min;
        cc_vp.maximum_depth = info.depth_bounds_max;

        DepthStencilAlphaState {
            wmds: wmds.finish(),
            cc_viewport: cc_vp.finish(),
            alpha: info.alpha,
            two_sided_stencil,
            writes_depth: info.depth_test_enable && info.depth_write_enable,
            writes_stencil: front.enabled && writes_stencil,
        }
    }
}
