use crate::{
    align_up,
    alloc::{tests::CountingUser, BumpRegion},
    batch::tests::batch,
    bo::{BoId, HeapBufferProvider, MemZone},
    border_color::{BorderColor, BorderColorPool, BORDER_COLOR_POOL_SIZE},
    context::{
        tests::{bind_shaders, context},
        DrawInfo, ScissorRect, Viewport,
    },
    cso::{
        blend::{BlendState, BlendStateInfo},
        rasterizer::{CullMode, RasterizerInfo, RasterizerState},
    },
    dirty::DirtyFlags,
    pipe_control::{decode_all, PipeControlFlags as F},
    program_cache::{tests::vs_prog_data, CacheId, ProgramCache, PROGRAM_CACHE_SIZE},
    Gen, Pipeline,
};
use proptest::{prelude::*, test_runner::TestCaseResult};
use std::collections::HashMap;

const MAX_OPS: usize = 64;

fn gen_strategy() -> impl Strategy<Value = Gen> {
    prop_oneof![Just(Gen::Gen8), Just(Gen::Gen9), Just(Gen::Gen10)]
}

#[derive(Clone, Copy, Debug)]
struct Request {
    size: u32,
    alignment: u32,
}

fn request_strategy() -> impl Strategy<Value = Request> {
    (1u32..=256, 0u32..=8).prop_map(|(size, log2)| Request {
        size,
        alignment: 1 << log2,
    })
}

fn check_reservations(region_size: u32, requests: &[Request]) -> TestCaseResult {
    let mut provider = HeapBufferProvider::new();
    let mut user = CountingUser::default();
    let mut region = BumpRegion::new(&mut provider, "test", MemZone::Dynamic, region_size, 32)
        .unwrap();

    let mut retired: Vec<BoId> = Vec::new();
    let mut end = 0;

    for request in requests {
        let alignment = request.alignment.max(region.alignment());
        let fits = region.fits(request.size, alignment);
        let drains = user.drained.len();
        let old_bo = region.bo().id();

        let reservation = region
            .reserve(request.size, request.alignment, &mut provider, &mut user)
            .unwrap();

        prop_assert_ne!(reservation.offset, 0);
        prop_assert_eq!(reservation.offset % alignment, 0);
        prop_assert!(reservation.offset + request.size <= region_size);

        if fits {
            prop_assert!(!reservation.replaced);
            prop_assert_eq!(user.drained.len(), drains);
            prop_assert!(reservation.offset >= end);
        } else {
            // Exactly one drain, of the buffer object the earlier offsets point into.
            prop_assert!(reservation.replaced);
            prop_assert_eq!(&user.drained[drains..], &[old_bo]);
            prop_assert_eq!(
                reservation.offset,
                align_up(region.alignment(), alignment),
            );
            retired.push(old_bo);
        }

        prop_assert!(!retired.contains(&region.bo().id()));
        prop_assert_eq!(user.referenced.last(), Some(&region.bo().id()));

        end = reservation.offset + request.size;
    }

    Ok(())
}

fn check_border_colors(colors: &[u8]) -> TestCaseResult {
    let palette = |i: u8| BorderColor::from_u32([u32::from(i), 0, u32::from(i) << 8, 1]);

    let mut provider = HeapBufferProvider::new();
    let mut user = CountingUser::default();
    let mut pool = BorderColorPool::new(&mut provider, BORDER_COLOR_POOL_SIZE).unwrap();
    let mut offsets: HashMap<u8, u32> = HashMap::new();

    for &i in colors {
        let color = palette(i);
        let offset = pool.upload(color, &mut provider, &mut user).unwrap();

        match offsets.get(&i) {
            Some(&previous) => prop_assert_eq!(offset, previous),
            None => {
                prop_assert!(!offsets.values().any(|&other| other == offset));
                offsets.insert(i, offset);
            }
        }

        prop_assert_eq!(pool.bo().read_dwords(offset, 4), color.channels);
    }

    prop_assert_eq!(pool.len(), offsets.len());
    prop_assert!(user.drained.is_empty());

    Ok(())
}

fn check_program_assembly(programs: &[u8]) -> TestCaseResult {
    let assembly = |i: u8| vec![i + 1; 64 + 16 * usize::from(i)];

    let mut provider = HeapBufferProvider::new();
    let mut user = CountingUser::default();
    let mut cache = ProgramCache::new(Gen::Gen9, &mut provider, PROGRAM_CACHE_SIZE).unwrap();
    let mut offsets: HashMap<u8, u32> = HashMap::new();

    for (n, &i) in programs.iter().enumerate() {
        let key = (n as u32).to_le_bytes();
        let shader = cache
            .upload(
                CacheId::Vertex,
                &key,
                &assembly(i),
                vs_prog_data(2),
                &mut provider,
                &mut user,
            )
            .unwrap();

        match offsets.get(&i) {
            Some(&previous) => prop_assert_eq!(shader.offset(), previous),
            None => {
                prop_assert!(!offsets.values().any(|&other| other == shader.offset()));
                offsets.insert(i, shader.offset());
            }
        }

        prop_assert_eq!(
            shader.bo().read(shader.offset(), assembly(i).len()),
            assembly(i),
        );
    }

    prop_assert_eq!(cache.len(CacheId::Vertex), programs.len());

    Ok(())
}

#[derive(Clone, Debug)]
enum Mutation {
    BlendColor(f32),
    StencilRef(u8, u8),
    Viewports(usize),
    Scissor(u16, u16),
    SampleMask(u32),
    PolygonStipple(u32),
    Rasterizer { light_twoside: bool, cull_mode: CullMode, scissor: bool },
    Blend { alpha_to_coverage_enable: bool, dither_enable: bool },
}

fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    let cull_mode = prop_oneof![
        Just(CullMode::None),
        Just(CullMode::Front),
        Just(CullMode::Back),
        Just(CullMode::FrontAndBack),
    ];

    prop_oneof![
        (0.0f32..1.0).prop_map(Mutation::BlendColor),
        (any::<u8>(), any::<u8>()).prop_map(|(front, back)| Mutation::StencilRef(front, back)),
        (1usize..=4).prop_map(Mutation::Viewports),
        (any::<u16>(), any::<u16>()).prop_map(|(w, h)| Mutation::Scissor(w, h)),
        any::<u32>().prop_map(Mutation::SampleMask),
        any::<u32>().prop_map(Mutation::PolygonStipple),
        (any::<bool>(), cull_mode, any::<bool>()).prop_map(
            |(light_twoside, cull_mode, scissor)| Mutation::Rasterizer {
                light_twoside,
                cull_mode,
                scissor,
            },
        ),
        (any::<bool>(), any::<bool>()).prop_map(|(alpha_to_coverage_enable, dither_enable)| {
            Mutation::Blend {
                alpha_to_coverage_enable,
                dither_enable,
            }
        }),
    ]
}

fn check_dirty_closure(hw: Gen, rounds: &[Vec<Mutation>]) -> TestCaseResult {
    let (mut ctx, _sink) = context(hw);
    bind_shaders(&mut ctx);

    for mutations in rounds {
        for mutation in mutations {
            match *mutation {
                Mutation::BlendColor(v) => ctx.set_blend_color([v, v, v, 1.0]),
                Mutation::StencilRef(front, back) => ctx.set_stencil_ref([front, back]),
                Mutation::Viewports(count) => {
                    let viewport = Viewport {
                        scale: [32.0, -32.0, 0.5],
                        translate: [32.0, 32.0, 0.5],
                    };
                    ctx.set_viewport_states(0, &vec![viewport; count]);
                }
                Mutation::Scissor(maxx, maxy) => ctx.set_scissor_states(
                    0,
                    &[ScissorRect {
                        minx: 0,
                        miny: 0,
                        maxx,
                        maxy,
                    }],
                ),
                Mutation::SampleMask(mask) => ctx.set_sample_mask(mask),
                Mutation::PolygonStipple(row) => ctx.set_polygon_stipple(&[row; 32]),
                Mutation::Rasterizer {
                    light_twoside,
                    cull_mode,
                    scissor,
                } => {
                    let handle = ctx.create_rasterizer_state(&RasterizerInfo {
                        light_twoside,
                        cull_mode,
                        scissor,
                        ..Default::default()
                    });
                    ctx.bind_rasterizer_state(Some(handle));
                }
                Mutation::Blend {
                    alpha_to_coverage_enable,
                    dither_enable,
                } => {
                    let handle = ctx.create_blend_state(&BlendStateInfo {
                        alpha_to_coverage_enable,
                        dither_enable,
                        ..Default::default()
                    });
                    ctx.bind_blend_state(Some(handle));
                }
            }
        }

        ctx.draw_vbo(&DrawInfo {
            count: 3,
            ..Default::default()
        })
        .unwrap();

        prop_assert!(
            !ctx.dirty().is_dirty(DirtyFlags::RENDER),
            "left dirty after a draw: {:?}",
            ctx.dirty().bits() & DirtyFlags::RENDER,
        );
    }

    Ok(())
}

/// Flags callers may ask for. The rest are either added by the sequencer itself or only valid
/// in combinations callers never request.
const REQUESTABLE: F = F::CACHE_FLUSH_BITS
    .union(F::CACHE_INVALIDATE_BITS)
    .union(F::CS_STALL)
    .union(F::TLB_INVALIDATE);

fn check_hazards(hw: Gen, pipeline: Pipeline, requested: F) -> TestCaseResult {
    let mut provider = HeapBufferProvider::new();
    let (mut batch, _sink) = batch(hw, &mut provider, 4096);
    batch.set_pipeline(pipeline);
    batch.emit_pipe_control_flush(requested);

    let emitted = decode_all(batch.words());
    let compute = pipeline == Pipeline::Compute;

    prop_assert!(!emitted.is_empty());

    for (i, &flags) in emitted.iter().enumerate() {
        let earlier = &emitted[..i];

        prop_assert!(
            !(flags.intersects(F::CACHE_FLUSH_BITS) && flags.intersects(F::CACHE_INVALIDATE_BITS)),
            "flush and invalidate in one command: {flags:?}",
        );
        prop_assert!(!flags.contains(F::STALL_AT_SCOREBOARD | F::DEPTH_STALL));

        if hw < Gen::Gen10 {
            prop_assert!(!flags.contains(F::STALL_AT_SCOREBOARD | F::RENDER_TARGET_FLUSH));
        }

        if flags.contains(F::TLB_INVALIDATE) {
            prop_assert!(flags.contains(F::CS_STALL));
        }

        if flags.contains(F::VF_CACHE_INVALIDATE) {
            prop_assert!(flags.contains(F::WRITE_IMMEDIATE));

            if hw == Gen::Gen9 {
                prop_assert!(earlier.contains(&F::empty()));
            }
        }

        match hw {
            Gen::Gen8 => {
                if flags.contains(F::STATE_CACHE_INVALIDATE) {
                    prop_assert!(flags.contains(F::CS_STALL));
                }

                if flags.contains(F::CS_STALL) {
                    prop_assert!(flags.intersects(
                        F::RENDER_TARGET_FLUSH
                            | F::DEPTH_CACHE_FLUSH
                            | F::WRITE_BITS
                            | F::STALL_AT_SCOREBOARD
                            | F::DEPTH_STALL
                            | F::DATA_CACHE_FLUSH,
                    ));
                }

                if compute && flags.intersects(F::WRITE_BITS) {
                    prop_assert!(flags.contains(F::CS_STALL));
                }
            }
            Gen::Gen9 => {
                // The write a VF invalidation adds for itself needs no stall.
                if compute
                    && flags.intersects(F::WRITE_BITS)
                    && !flags.contains(F::VF_CACHE_INVALIDATE)
                {
                    prop_assert!(earlier.last().is_some_and(|f| f.contains(F::CS_STALL)));
                }

                if compute && flags.contains(F::TEXTURE_CACHE_INVALIDATE) {
                    prop_assert!(flags.contains(F::CS_STALL));
                }
            }
            Gen::Gen10 => {
                if flags.contains(F::RENDER_TARGET_FLUSH) {
                    prop_assert!(flags.contains(F::STALL_AT_SCOREBOARD));
                    prop_assert!(earlier.last().is_some_and(|f| f.contains(F::FLUSH_ENABLE)));
                }

                if flags.intersects(F::WRITE_BITS) && !flags.contains(F::RENDER_TARGET_FLUSH) {
                    prop_assert!(flags.contains(F::DEPTH_STALL));
                }
            }
        }
    }

    let all = emitted.iter().fold(F::empty(), |all, &flags| all | flags);
    let required = requested & (F::CACHE_FLUSH_BITS | F::CACHE_INVALIDATE_BITS | F::TLB_INVALIDATE);
    prop_assert!(all.contains(required), "requested {requested:?}, emitted {emitted:?}");

    // Invalidations land last, after anything flushed has reached memory.
    let last = emitted[emitted.len() - 1];
    prop_assert!(last.contains(requested & F::CACHE_INVALIDATE_BITS));

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn reservations_are_aligned_and_never_overlap(
        region_size in prop_oneof![Just(1024u32), Just(4096u32)],
        requests in prop::collection::vec(request_strategy(), 1..MAX_OPS),
    ) {
        check_reservations(region_size, &requests)?;
    }

    #[test]
    fn border_colors_are_deduplicated(colors in prop::collection::vec(0u8..8, 1..MAX_OPS)) {
        check_border_colors(&colors)?;
    }

    #[test]
    fn shader_assembly_is_deduplicated(programs in prop::collection::vec(0u8..6, 1..32)) {
        check_program_assembly(&programs)?;
    }

    #[test]
    fn encoding_is_idempotent(
        hw in gen_strategy(),
        light_twoside: bool,
        flatshade: bool,
        front_ccw: bool,
        rasterizer_discard: bool,
        line_width in 0.0f32..8.0,
        alpha_to_coverage_enable: bool,
        dither_enable: bool,
    ) {
        let info = RasterizerInfo {
            light_twoside,
            flatshade,
            front_ccw,
            rasterizer_discard,
            line_width,
            ..Default::default()
        };
        prop_assert_eq!(RasterizerState::new(hw, &info), RasterizerState::new(hw, &info));

        let info = BlendStateInfo {
            alpha_to_coverage_enable,
            dither_enable,
            ..Default::default()
        };
        prop_assert_eq!(BlendState::new(hw, &info), BlendState::new(hw, &info));
    }

    #[test]
    fn draws_clear_what_they_consume(
        hw in gen_strategy(),
        rounds in prop::collection::vec(prop::collection::vec(mutation_strategy(), 0..8), 1..6),
    ) {
        check_dirty_closure(hw, &rounds)?;
    }

    #[test]
    fn pipe_controls_are_legal(
        hw in gen_strategy(),
        pipeline in prop_oneof![Just(Pipeline::Render), Just(Pipeline::Compute)],
        bits: u32,
    ) {
        check_hazards(hw, pipeline, F::from_bits_truncate(bits) & REQUESTABLE)?;
    }
}
