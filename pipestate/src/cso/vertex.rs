//! Vertex element state.

use crate::{
    packet::{
        cmd::{VertexElements, VfInstancing},
        state::VertexElementState,
        Builder, Words,
    },
    Gen,
};
use smallvec::SmallVec;

/// The most vertex elements a vertex-elements CSO can hold.
pub const MAX_VERTEX_ELEMENTS: usize = 33;

/// The format vertex data is fetched in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum VertexFormat {
    R32G32B32A32_FLOAT,
    R32G32B32_FLOAT,
    R32G32_FLOAT,
    R32_FLOAT,
    R16G16B16A16_FLOAT,
    R8G8B8A8_UNORM,
    R32G32B32A32_UINT,
    R32_UINT,
}

impl VertexFormat {
    /// Returns the surface format the vertex fetcher uses.
    pub const fn to_hw(self) -> u32 {
        match self {
            VertexFormat::R32G32B32A32_FLOAT => 0x000,
            VertexFormat::R32G32B32A32_UINT => 0x006,
            VertexFormat::R32G32B32_FLOAT => 0x040,
            VertexFormat::R32G32_FLOAT => 0x085,
            VertexFormat::R16G16B16A16_FLOAT => 0x088,
            VertexFormat::R8G8B8A8_UNORM => 0x0c7,
            VertexFormat::R32_UINT => 0x0d7,
            VertexFormat::R32_FLOAT => 0x0d8,
        }
    }

    /// Returns the number of channels the format stores.
    pub const fn channels(self) -> u32 {
        match self {
            VertexFormat::R32G32B32A32_FLOAT
            | VertexFormat::R32G32B32A32_UINT
            | VertexFormat::R16G16B16A16_FLOAT
            | VertexFormat::R8G8B8A8_UNORM => 4,
            VertexFormat::R32G32B32_FLOAT => 3,
            VertexFormat::R32G32_FLOAT => 2,
            VertexFormat::R32_FLOAT | VertexFormat::R32_UINT => 1,
        }
    }

    /// Returns whether the channels are read as integers rather than floats.
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            VertexFormat::R32G32B32A32_UINT | VertexFormat::R32_UINT,
        )
    }
}

/// One vertex attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexElementInfo {
    pub vertex_buffer_index: u32,
    /// Offset of the attribute within a vertex, in bytes.
    pub src_offset: u32,
    pub format: VertexFormat,
    /// Advance the attribute once every this many instances, or once per vertex if 0.
    pub instance_divisor: u32,
}

/// A vertex-elements CSO.
#[derive(Clone, Debug, PartialEq)]
pub struct VertexElementsState {
    /// `3DSTATE_VERTEX_ELEMENTS`, with a single dummy element if there are no attributes.
    pub vertex_elements: Words,
    /// One `3DSTATE_VF_INSTANCING` per attribute.
    pub vf_instancing: SmallVec<[Words; 8]>,
    pub count: u32,
}

impl VertexElementsState {
    /// # Panics
    ///
    /// - Panics if `elements` has more than [`MAX_VERTEX_ELEMENTS`] entries.
    pub fn new(hw: Gen, elements: &[VertexElementInfo]) -> Self {
        assert!(elements.len() <= MAX_VERTEX_ELEMENTS);

        let mut ve = Builder::<VertexElements>::new(hw);
        let mut vf_instancing = SmallVec::new();

        if elements.is_empty() {
            // The hardware needs at least one element. Feed (0, 0, 0, 1) to the shader.
            ve.elements.push(VertexElementState {
                valid: true,
                source_element_format: VertexFormat::R32G32B32A32_FLOAT.to_hw(),
                component_0_control: VertexElementState::VFCOMP_STORE_0,
                component_1_control: VertexElementState::VFCOMP_STORE_0,
                component_2_control: VertexElementState::VFCOMP_STORE_0,
                component_3_control: VertexElementState::VFCOMP_STORE_1_FP,
                ..Default::default()
            });
        }

        for (i, element) in elements.iter().enumerate() {
            let comp = component_controls(element.format);

            ve.elements.push(VertexElementState {
                vertex_buffer_index: element.vertex_buffer_index,
                valid: true,
                source_element_offset: element.src_offset,
                source_element_format: element.format.to_hw(),
                component_0_control: comp[0],
                component_1_control: comp[1],
                component_2_control: comp[2],
                component_3_control: comp[3],
                ..Default::default()
            });

            let mut vi = Builder::<VfInstancing>::new(hw);
            vi.vertex_element_index = i as u32;
            vi.instancing_enable = element.instance_divisor > 0;
            vi.instance_data_step_rate = element.instance_divisor;
            vf_instancing.push(vi.finish());
        }

        VertexElementsState {
            vertex_elements: ve.finish(),
            vf_instancing,
            count: elements.len() as u32,
        }
    }
}

/// Stores the channels the format has, zero for the missing ones, and one for a missing alpha.
fn component_controls(format: VertexFormat) -> [u32; 4] {
    let mut comp = [VertexElementState::VFCOMP_STORE_SRC; 4];
    let channels = format.channels() as usize;

    for c in comp.iter_mut().take(3).skip(channels) {
        *c = VertexElementState::VFCOMP_STORE_0;
    }

    if channels < 4 {
        comp[3] = if format.is_integer() {
            VertexElementState::VFCOMP_STORE_1_INT
        } else {
            VertexElementState::VFCOMP_STORE_1_FP
        };
    }

    comp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::extract;

    fn element(format: VertexFormat) -> VertexElementInfo {
        VertexElementInfo {
            vertex_buffer_index: 1,
            src_offset: 12,
            format,
            instance_divisor: 0,
        }
    }

    fn controls(words: &[u32], index: usize) -> [u64; 4] {
        let dw = 2 + 2 * index;
        [
            extract(words, dw, 28, 30),
            extract(words, dw, 24, 26),
            extract(words, dw, 20, 22),
            extract(words, dw, 16, 18),
        ]
    }

    #[test]
    fn no_elements_emit_a_dummy() {
        let cso = VertexElementsState::new(Gen::Gen9, &[]);

        assert_eq!(cso.count, 0);
        assert_eq!(cso.vertex_elements.len(), 3);
        assert!(cso.vf_instancing.is_empty());
        assert_eq!(controls(&cso.vertex_elements, 0), [2, 2, 2, 3]);
    }

    #[test]
    fn missing_channels_are_filled_in() {
        let cso = VertexElementsState::new(
            Gen::Gen9,
            &[
                element(VertexFormat::R32G32_FLOAT),
                element(VertexFormat::R32_UINT),
                element(VertexFormat::R8G8B8A8_UNORM),
            ],
        );
        let words = &cso.vertex_elements;

        assert_eq!(words.len(), 7);
        assert_eq!(controls(words, 0), [1, 1, 2, 3]);
        assert_eq!(controls(words, 1), [1, 2, 2, 4]);
        assert_eq!(controls(words, 2), [1, 1, 1, 1]);
        assert_eq!(extract(words, 1, 0, 11), 12);
        assert_eq!(extract(words, 1, 16, 24), 0x85);
        assert_eq!(extract(words, 1, 26, 31), 1);
    }

    #[test]
    fn instanced_elements() {
        let mut instanced = element(VertexFormat::R32G32B32A32_FLOAT);
        instanced.instance_divisor = 3;
        let cso = VertexElementsState::new(
            Gen::Gen9,
            &[element(VertexFormat::R32G32B32_FLOAT), instanced],
        );

        assert_eq!(cso.vf_instancing.len(), 2);
        assert_eq!(extract(&cso.vf_instancing[0], 1, 8, 8), 0);
        assert_eq!(extract(&cso.vf_instancing[1], 1, 0, 5), 1);
        assert_eq!(extract(&cso.vf_instancing[1], 1, 8, 8), 1);
        assert_eq!(cso.vf_instancing[1][2], 3);
    }
}
