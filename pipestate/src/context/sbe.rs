//! Routing of the last vertex stage's outputs to the fragment shader's inputs.

use crate::{
    cso::rasterizer::RasterizerState,
    packet::{
        cmd::{Sbe, SbeSwiz, SfOutputAttributeDetail},
        Builder, Words,
    },
    program_cache::{varying, FsProgData, VueMap},
    Gen,
};

/// Every component of every attribute is active.
const ACTIVE_COMPONENTS_XYZW: u32 = 0xffff_ffff;

/// All four components of an attribute come from the constant source.
const OVERRIDE_XYZW: u8 = 0b1111;

#[inline]
fn bit(v: u8) -> u64 {
    if v < 64 {
        varying::bit(v)
    } else {
        0
    }
}

/// Returns the first slot the fragment shader reads from, rounded down to a pair of slots.
fn first_urb_slot_required(inputs_read: u64, vue_map: &VueMap) -> usize {
    // Layer and viewport may come from the header, which is always read.
    if inputs_read & (bit(varying::LAYER) | bit(varying::VIEWPORT)) != 0 {
        return 0;
    }

    (0..vue_map.num_slots())
        .find(|&slot| {
            let v = vue_map.varying_at(slot);
            v != varying::POS && inputs_read & bit(v) != 0
        })
        .map_or(0, |slot| slot & !1)
}

/// Computes the URB read offset and length of the setup unit, both in pairs of slots.
///
/// The read starts at the first slot the fragment shader needs and ends at the last one. Colors
/// are read along with their back-facing counterparts when two-sided lighting is on, and
/// replaced by them when only the back color is written.
pub(crate) fn urb_read_interval(
    inputs_read: u64,
    vue_map: &VueMap,
    two_sided_color: bool,
) -> (u32, u32) {
    let first_slot = first_urb_slot_required(inputs_read, vue_map);
    let mut inputs = inputs_read;

    for (col, bfc) in [(varying::COL0, varying::BFC0), (varying::COL1, varying::BFC1)] {
        if inputs & bit(col) == 0 {
            continue;
        }

        if two_sided_color {
            inputs |= bit(bfc);
        }

        if !vue_map.writes(col) {
            inputs &= !bit(col);
            inputs |= bit(bfc);
        }
    }

    let mut last_read_slot = vue_map.num_slots().saturating_sub(1);

    while last_read_slot > first_slot && inputs & bit(vue_map.varying_at(last_read_slot)) == 0 {
        last_read_slot -= 1;
    }

    let offset = (first_slot / 2) as u32;
    let length = (last_read_slot.saturating_sub(first_slot) + 1).div_ceil(2) as u32;

    (offset, length)
}

fn constant(source: u32) -> SfOutputAttributeDetail {
    SfOutputAttributeDetail {
        constant_source: source,
        component_override: OVERRIDE_XYZW,
        ..Default::default()
    }
}

/// Computes where each of the first 16 fragment shader inputs comes from.
fn attribute_overrides(
    fs: &FsProgData,
    vue_map: &VueMap,
    light_twoside: bool,
    urb_read_offset: u32,
) -> [SfOutputAttributeDetail; 16] {
    let mut attributes = [SfOutputAttributeDetail::default(); 16];

    for input in &fs.urb_setup {
        let Some(attr) = attributes.get_mut(usize::from(input.index)) else {
            continue;
        };

        if input.varying == varying::PRIMITIVE_ID {
            *attr = constant(SfOutputAttributeDetail::PRIM_ID);
            continue;
        }

        let mut slot = vue_map.slot_of(input.varying);

        if slot.is_none() && input.varying == varying::COL0 {
            slot = vue_map.slot_of(varying::BFC0);
        }

        if slot.is_none() && input.varying == varying::COL1 {
            slot = vue_map.slot_of(varying::BFC1);
        }

        let Some(slot) = slot else {
            // Layer and viewport read back as zero when nothing wrote them. Anything else is
            // undefined.
            *attr = if matches!(input.varying, varying::LAYER | varying::VIEWPORT) {
                constant(SfOutputAttributeDetail::CONST_0000)
            } else {
                constant(SfOutputAttributeDetail::CONST_0001_FLOAT)
            };
            continue;
        };

        attr.source_attribute = (slot as u32).saturating_sub(2 * urb_read_offset);

        let pair = (vue_map.varying_at(slot), vue_map.varying_at(slot + 1));

        if light_twoside
            && matches!(
                pair,
                (varying::COL0, varying::BFC0) | (varying::COL1, varying::BFC1),
            )
        {
            attr.swizzle_select = SfOutputAttributeDetail::INPUTATTR_FACING;
        }
    }

    attributes
}

/// Returns the setup attributes whose value is the point sprite coordinate rather than a vertex
/// output.
fn point_sprite_enables(fs: &FsProgData, sprite_coord_enable: u16) -> u32 {
    fs.urb_setup
        .iter()
        .filter(|input| input.index < 32)
        .filter(|input| {
            input.varying == varying::PNTC
                || ((varying::TEX0..varying::TEX0 + 8).contains(&input.varying)
                    && sprite_coord_enable & (1 << (input.varying - varying::TEX0)) != 0)
        })
        .fold(0, |enables, input| enables | 1 << input.index)
}

/// Returns the setup attributes that are flat shaded.
fn constant_interpolation(fs: &FsProgData, flatshade: bool) -> u32 {
    let colors = [varying::COL0, varying::COL1, varying::BFC0, varying::BFC1];

    fs.urb_setup
        .iter()
        .filter(|input| input.index < 32 && flatshade && colors.contains(&input.varying))
        .fold(fs.flat_inputs, |flat, input| flat | 1 << input.index)
}

/// Encodes `3DSTATE_SBE` and `3DSTATE_SBE_SWIZ` for the bound fragment shader, last vertex
/// stage and rasterizer.
pub(crate) fn emit_sbe(
    hw: Gen,
    fs: &FsProgData,
    vue_map: &VueMap,
    rast: &RasterizerState,
) -> Words {
    let (read_offset, read_length) = urb_read_interval(fs.inputs_read, vue_map, rast.light_twoside);

    let mut sbe = Builder::<Sbe>::new(hw);
    sbe.attribute_swizzle_enable = true;
    sbe.number_of_sf_output_attributes = fs.num_varying_inputs;
    sbe.point_sprite_texture_coordinate_origin = rast.sprite_coord_mode.to_hw();
    sbe.vertex_urb_entry_read_offset = read_offset;
    sbe.vertex_urb_entry_read_length = read_length;
    sbe.force_vertex_urb_entry_read_offset = true;
    sbe.force_vertex_urb_entry_read_length = true;
    sbe.point_sprite_texture_coordinate_enable =
        point_sprite_enables(fs, rast.sprite_coord_enable);
    sbe.constant_interpolation_enable = constant_interpolation(fs, rast.flatshade);

    if hw >= Gen::Gen9 {
        sbe.attribute_active_component_format_lo = ACTIVE_COMPONENTS_XYZW;
        sbe.attribute_active_component_format_hi = ACTIVE_COMPONENTS_XYZW;
    }

    let mut swiz = Builder::<SbeSwiz>::new(hw);
    swiz.attributes = attribute_overrides(fs, vue_map, rast.light_twoside, read_offset);

    let mut words = sbe.finish();
    words.extend_from_slice(&swiz.finish());

    words
}
