//! Encoding of hardware commands and state records.
//!
//! Every packet is a plain struct with one public field per hardware field, implementing
//! [`Packet`]. To encode one, fill in a [`Builder`] and call [`Builder::finish`], which is the
//! only way to obtain the encoded words:
//!
//! ```
//! use pipestate::{packet::{cmd::Vf, Builder}, Gen};
//!
//! let mut vf = Builder::<Vf>::new(Gen::Gen9);
//! vf.indexed_draw_cut_index_enable = true;
//! vf.cut_index = 0xffff;
//! let words = vf.finish();
//!
//! assert_eq!(words.len(), 2);
//! assert_eq!(words[1], 0xffff);
//! ```
//!
//! Encoding is pure: the same field values for the same generation always give the same words.
//! Constant state objects rely on this to precompute their packets once and copy them at draw
//! time, [merging] in the few fields that are only known then.
//!
//! [merging]: merge

use crate::Gen;
use smallvec::SmallVec;
use std::ops::{Deref, DerefMut};

/// Encoded packet words.
pub type Words = SmallVec<[u32; 16]>;

/// Memory object control state selecting write-back caching, for every buffer the crate points
/// the hardware at.
pub const MOCS_WB: u32 = 2 << 1;

macro_rules! packet {
    (@lo) => { 0 };
    (@lo $lo:literal) => { $lo };
    (@hi) => { 31 };
    (@hi $lo:literal) => { $lo };
    (@hi $lo:literal $hi:literal) => { $hi };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident : $hw_name:literal {
            header: $header:expr,
            length($hw:ident): $length:expr,
            $(
                $(#[$field_meta:meta])*
                $field:ident : $ty:ty => $dword:literal $([$lo:literal $(..= $hi:literal)?])?
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field: $ty,
            )*
        }

        impl $crate::packet::Packet for $name {
            const NAME: &'static str = $hw_name;

            const HEADER: Option<$crate::packet::Header> = $header;

            #[inline]
            #[allow(unused_variables)]
            fn length(&self, $hw: $crate::Gen) -> usize {
                $length
            }

            #[allow(unused_variables)]
            fn pack(&self, hw: $crate::Gen, dw: &mut $crate::packet::Dwords<'_>) {
                $(
                    dw.field(
                        $dword,
                        packet!(@lo $($lo)?),
                        packet!(@hi $($lo $($hi)?)?),
                        self.$field,
                    );
                )*
            }
        }
    };
}

pub mod cmd;
pub mod state;

/// The first dword of a command, identifying it to the command streamer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Header {
    /// A command of the render engine's graphics pipeline.
    Gfx {
        subtype: u32,
        opcode: u32,
        sub_opcode: u32,
    },
    /// A memory interface command.
    Mi { opcode: u32 },
}

impl Header {
    const GFX_TYPE: u32 = 3;

    /// A `3DSTATE_*` or `3DPRIMITIVE` command.
    #[inline]
    pub const fn render(opcode: u32, sub_opcode: u32) -> Option<Header> {
        Some(Header::Gfx {
            subtype: 3,
            opcode,
            sub_opcode,
        })
    }

    /// A command shared by the render and compute pipelines.
    #[inline]
    pub const fn common(opcode: u32, sub_opcode: u32) -> Option<Header> {
        Some(Header::Gfx {
            subtype: 1,
            opcode,
            sub_opcode,
        })
    }

    /// A media or GPGPU command.
    #[inline]
    pub const fn media(opcode: u32, sub_opcode: u32) -> Option<Header> {
        Some(Header::Gfx {
            subtype: 2,
            opcode,
            sub_opcode,
        })
    }

    #[inline]
    pub const fn mi(opcode: u32) -> Option<Header> {
        Some(Header::Mi { opcode })
    }

    /// Encodes the header of a command `length` dwords long. Single-dword commands have no
    /// length field.
    pub const fn encode(self, length: usize) -> u32 {
        let dword_length = if length > 1 { length as u32 - 2 } else { 0 };

        match self {
            Header::Gfx {
                subtype,
                opcode,
                sub_opcode,
            } => {
                Header::GFX_TYPE << 29
                    | subtype << 27
                    | opcode << 24
                    | sub_opcode << 16
                    | dword_length
            }
            Header::Mi { opcode } => opcode << 23 | dword_length,
        }
    }
}

/// A hardware command or state record.
///
/// Implementations describe where each field lives; [`Builder`] does the encoding.
pub trait Packet: Default {
    /// The name the hardware documentation uses.
    const NAME: &'static str;

    /// The command header, or `None` for state records, which are written to memory rather than
    /// to the batch.
    const HEADER: Option<Header>;

    /// Returns the encoded length in dwords for the given generation.
    fn length(&self, hw: Gen) -> usize;

    /// Writes every field into `dw`, which is zero-initialized apart from the header.
    fn pack(&self, hw: Gen, dw: &mut Dwords<'_>);
}

/// The destination of [`Packet::pack`].
///
/// Only a [`Builder`] can create one, which keeps packing behind [`Builder::finish`].
pub struct Dwords<'a> {
    words: &'a mut [u32],
}

impl Dwords<'_> {
    /// ORs `value` into bits `lo..=hi` counted from the start of dword `dword`. A field may span
    /// into the following dword.
    ///
    /// Fields in dwords past the end of the packet are ignored if they hold the default value,
    /// which is how fields that only exist on some generations are handled.
    #[inline]
    pub fn field<T: FieldValue>(&mut self, dword: usize, lo: u32, hi: u32, value: T) {
        debug_assert!(lo <= hi && lo < 32 && hi < 64);

        let bits = value.encode(lo, hi);

        if bits == 0 {
            return;
        }

        let last = dword + hi as usize / 32;
        assert!(
            last < self.words.len(),
            "field at dword {dword} bits {lo}..={hi} is past the end of a {}-dword packet",
            self.words.len(),
        );

        self.words[dword] |= bits as u32;

        if hi >= 32 {
            self.words[dword + 1] |= (bits >> 32) as u32;
        }
    }

    /// Packs a nested record starting at dword `dword`.
    pub fn nested<P: Packet>(&mut self, dword: usize, hw: Gen, packet: &P) {
        let length = packet.length(hw);
        let mut inner = Dwords {
            words: &mut self.words[dword..dword + length],
        };

        if let Some(header) = P::HEADER {
            inner.words[0] |= header.encode(length);
        }

        packet.pack(hw, &mut inner);
    }
}

/// A value that can be stored in a packet field.
pub trait FieldValue: Copy {
    /// Returns the value shifted into place for a field spanning bits `lo..=hi`.
    fn encode(self, lo: u32, hi: u32) -> u64;
}

#[inline]
const fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1 << width) - 1
    }
}

impl FieldValue for bool {
    #[inline]
    fn encode(self, lo: u32, hi: u32) -> u64 {
        debug_assert_eq!(lo, hi);

        u64::from(self) << lo
    }
}

impl FieldValue for u64 {
    #[inline]
    fn encode(self, lo: u32, hi: u32) -> u64 {
        let width = hi - lo + 1;
        debug_assert!(
            self & !mask(width) == 0,
            "{self:#x} doesn't fit in a {width}-bit field",
        );

        self << lo
    }
}

impl FieldValue for u32 {
    #[inline]
    fn encode(self, lo: u32, hi: u32) -> u64 {
        u64::from(self).encode(lo, hi)
    }
}

impl FieldValue for i32 {
    #[inline]
    fn encode(self, lo: u32, hi: u32) -> u64 {
        let width = hi - lo + 1;
        debug_assert!(
            width >= 32 || {
                let limit = 1i64 << (width - 1);
                (-limit..limit).contains(&i64::from(self))
            },
            "{self} doesn't fit in a signed {width}-bit field",
        );

        ((self as i64 as u64) & mask(width)) << lo
    }
}

impl FieldValue for f32 {
    #[inline]
    fn encode(self, lo: u32, hi: u32) -> u64 {
        debug_assert!(lo == 0 && hi == 31);

        u64::from(self.to_bits())
    }
}

/// A GPU address, or an offset from one of the base addresses, stored as-is.
///
/// Unlike integer fields, address fields are not shifted into place: the field covers the
/// significant bits of the address and the bits below the field must be zero, which is the
/// field's alignment requirement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Address(pub u64);

impl From<u32> for Address {
    #[inline]
    fn from(offset: u32) -> Self {
        Address(u64::from(offset))
    }
}

impl FieldValue for Address {
    #[inline]
    fn encode(self, lo: u32, hi: u32) -> u64 {
        debug_assert!(
            self.0 & mask(lo) == 0,
            "address {:#x} is not aligned to {} bytes",
            self.0,
            1u64 << lo,
        );
        debug_assert!(
            self.0 & !mask(hi + 1) == 0,
            "address {:#x} doesn't fit in {} bits",
            self.0,
            hi + 1,
        );

        self.0
    }
}

/// Converts `value` to unsigned fixed point with `frac_bits` fractional bits, clamping to what
/// `int_bits + frac_bits` bits can hold.
pub fn ufixed(value: f32, int_bits: u32, frac_bits: u32) -> u32 {
    let max = mask(int_bits + frac_bits) as f32;
    let scaled = (value * (1u32 << frac_bits) as f32).round();

    scaled.clamp(0.0, max) as u32
}

/// Converts `value` to signed fixed point with `frac_bits` fractional bits, clamping to the
/// range of a two's complement value of `int_bits + frac_bits` bits.
pub fn sfixed(value: f32, int_bits: u32, frac_bits: u32) -> i32 {
    let limit = (1i64 << (int_bits + frac_bits - 1)) as f32;
    let scaled = (value * (1u32 << frac_bits) as f32).round();

    scaled.clamp(-limit, limit - 1.0) as i32
}

/// Zero-initializes a packet, lets fields be set one by one through `Deref`, and encodes it
/// with [`finish`].
///
/// [`finish`]: Self::finish
#[must_use = "a packet builder encodes nothing until `finish` is called"]
#[derive(Clone, Debug)]
pub struct Builder<P> {
    hw: Gen,
    packet: P,
}

impl<P: Packet> Builder<P> {
    /// Starts a packet with every field zeroed.
    #[inline]
    pub fn new(hw: Gen) -> Self {
        Builder {
            hw,
            packet: P::default(),
        }
    }

    /// Starts from a packet whose fields are already filled in.
    #[inline]
    pub fn with(hw: Gen, packet: P) -> Self {
        Builder { hw, packet }
    }

    /// Encodes the packet.
    pub fn finish(self) -> Words {
        let length = self.packet.length(self.hw);
        let mut words: Words = smallvec::smallvec![0; length];

        if let Some(header) = P::HEADER {
            words[0] = header.encode(length);
        }

        self.packet.pack(self.hw, &mut Dwords { words: &mut words });

        words
    }
}

impl<P> Deref for Builder<P> {
    type Target = P;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.packet
    }
}

impl<P> DerefMut for Builder<P> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.packet
    }
}

/// Encodes a packet whose fields are filled in by `f`.
#[inline]
pub fn pack<P: Packet>(hw: Gen, f: impl FnOnce(&mut P)) -> Words {
    let mut builder = Builder::new(hw);
    f(&mut builder);

    builder.finish()
}

/// ORs a precomputed encoding with one holding the fields only known at draw time.
///
/// # Panics
///
/// - Panics if the two encodings have different lengths.
pub fn merge(precomputed: &[u32], dynamic: &[u32]) -> Words {
    assert_eq!(precomputed.len(), dynamic.len());

    precomputed
        .iter()
        .zip(dynamic)
        .map(|(a, b)| a | b)
        .collect()
}

/// Extracts bits `lo..=hi` of dword `dword`, for inspecting encoded words.
pub fn extract(words: &[u32], dword: usize, lo: u32, hi: u32) -> u64 {
    let mut bits = u64::from(words[dword]);

    if hi >= 32 {
        bits |= u64::from(words[dword + 1]) << 32;
    }

    (bits >> lo) & mask(hi - lo + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{cmd::*, state::*};
    use pretty_assertions::assert_eq;

    #[test]
    fn header_encoding() {
        let words = pack::<PipeControl>(Gen::Gen9, |_| {});
        assert_eq!(words.len(), 6);
        assert_eq!(words[0], 0x7a00_0004);

        let words = pack::<MiBatchBufferEnd>(Gen::Gen9, |_| {});
        assert_eq!(words.as_slice(), [0x0500_0000]);

        let words = pack::<MiNoop>(Gen::Gen9, |_| {});
        assert_eq!(words.as_slice(), [0]);
    }

    #[test]
    fn fields_land_in_place() {
        let words = pack::<PipeControl>(Gen::Gen9, |pc| {
            pc.command_streamer_stall_enable = true;
            pc.post_sync_operation = 1;
            pc.address = Address(0x1_2345_6780);
            pc.immediate_data = 0xdead_beef_0000_0001;
        });

        assert_eq!(words[1], 1 << 20 | 1 << 14);
        assert_eq!(words[2], 0x2345_6780);
        assert_eq!(words[3], 0x1);
        assert_eq!(words[4], 0x0000_0001);
        assert_eq!(words[5], 0xdead_beef);
        assert_eq!(extract(&words, 1, 14, 15), 1);
    }

    #[test]
    fn encoding_is_deterministic() {
        let make = || {
            pack::<Clip>(Gen::Gen9, |cl| {
                cl.clip_enable = true;
                cl.api_mode = 1;
                cl.minimum_point_width = ufixed(0.125, 8, 3);
                cl.maximum_point_width = ufixed(255.875, 8, 3);
            })
        };

        assert_eq!(make(), make());
    }

    #[test]
    fn length_depends_on_generation() {
        let gen8 = pack::<WmDepthStencil>(Gen::Gen8, |_| {});
        let gen9 = pack::<WmDepthStencil>(Gen::Gen9, |_| {});

        assert_eq!(gen8.len(), 3);
        assert_eq!(gen9.len(), 4);
        assert_eq!(extract(&gen8, 0, 0, 7), 1);
        assert_eq!(extract(&gen9, 0, 0, 7), 2);
    }

    #[test]
    fn absent_fields_with_default_values_are_ignored() {
        let words = pack::<WmDepthStencil>(Gen::Gen8, |wmds| {
            wmds.depth_test_enable = true;
            wmds.stencil_reference_value = 0;
        });

        assert_eq!(words[1], 1 << 1);
    }

    #[test]
    #[should_panic = "past the end"]
    fn absent_fields_with_values_panic() {
        let _ = pack::<WmDepthStencil>(Gen::Gen8, |wmds| {
            wmds.stencil_reference_value = 1;
        });
    }

    #[test]
    fn merge_ors_words() {
        let precomputed = pack::<PsBlend>(Gen::Gen9, |pb| {
            pb.color_buffer_blend_enable = true;
        });
        let dynamic = pack::<PsBlend>(Gen::Gen9, |pb| {
            pb.has_writeable_rt = true;
        });

        let merged = merge(&precomputed, &dynamic);
        assert_eq!(merged[0], precomputed[0]);
        assert_eq!(merged[1], 1 << 29 | 1 << 30);
    }

    #[test]
    fn signed_fields_are_masked() {
        let words = pack::<SamplerState>(Gen::Gen9, |samp| {
            samp.texture_lod_bias = sfixed(-1.0, 5, 8);
        });

        assert_eq!(extract(&words, 0, 1, 13), 0x1f00);
    }

    #[test]
    fn fixed_point() {
        assert_eq!(ufixed(1.5, 4, 8), 0x180);
        assert_eq!(ufixed(100.0, 4, 8), 0xfff);
        assert_eq!(ufixed(-3.0, 4, 8), 0);
        assert_eq!(sfixed(-16.5, 5, 8), -4096);
        assert_eq!(sfixed(2.25, 5, 8), 0x240);
    }
}
