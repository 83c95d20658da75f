//! Batching, state caching and failure handling seen from the producer.

use vellum_gfx::command::{DrawTriangles, QueueConfig};
use vellum_gfx::coords::{quad, Vertex, QUAD_INDICES};
use vellum_gfx::core::Graphics;
use vellum_gfx::device::soft::{Call, SoftDevice};
use vellum_gfx::device::DeviceError;
use vellum_gfx::image::{ImageId, Residency};
use vellum_gfx::shader::{ShaderIr, UniformDecl};
use vellum_gfx::{Error, ErrorKind};

fn gfx() -> Graphics<SoftDevice> {
    Graphics::new(SoftDevice::new())
}

fn read(g: &mut Graphics<SoftDevice>, id: ImageId) -> Vec<u8> {
    let (w, h) = g.image_size(id).unwrap();
    let mut out = vec![0; (w * h * 4) as usize];
    g.read_pixels(id, &mut out).unwrap();
    out
}

fn blit(dst: ImageId, src: ImageId, x: f32) -> DrawTriangles {
    DrawTriangles::new(
        dst,
        [src],
        quad([x, 0.0, 2.0, 2.0], [0.0, 0.0, 2.0, 2.0]),
        QUAD_INDICES,
    )
}

/// Two sources with distinct content and a destination, ready to draw.
fn scene(g: &mut Graphics<SoftDevice>) -> (ImageId, ImageId, ImageId) {
    let a = g.new_image(2, 2).unwrap();
    let b = g.new_image(2, 2).unwrap();
    g.replace_pixels(a, &[255, 0, 0, 255].repeat(4), 0, 0, 2, 2).unwrap();
    g.replace_pixels(b, &[0, 0, 255, 255].repeat(4), 0, 0, 2, 2).unwrap();
    let dst = g.new_image(6, 2).unwrap();
    (a, b, dst)
}

// ── merging ───────────────────────────────────────────────────────────────

#[test]
fn merged_draws_match_separate_draws() {
    let render = |config: QueueConfig| {
        let mut g = Graphics::with_config(SoftDevice::new(), config);
        let (a, b, dst) = scene(&mut g);
        g.flush().unwrap();
        g.draw_triangles(blit(dst, a, 0.0)).unwrap();
        g.draw_triangles(blit(dst, b, 3.0)).unwrap();
        let stats = g.flush().unwrap();
        let draws = g.device().calls().draws();
        (read(&mut g, dst), stats, draws)
    };

    let (merged, merged_stats, merged_draws) = render(QueueConfig::default());
    let (separate, separate_stats, separate_draws) = render(QueueConfig {
        merge_draws: false,
        ..Default::default()
    });

    assert_eq!(merged, separate);
    assert_eq!(merged_stats.merged, 1);
    assert_eq!(merged_stats.draws, 1);
    assert_eq!(separate_stats.draws, 2);
    assert_eq!(merged_draws, 1);
    assert_eq!(separate_draws, 2);
}

#[test]
fn sourceless_builtin_draw_never_samples_a_stale_unit() {
    let render = |config: QueueConfig| {
        let mut g = Graphics::with_config(SoftDevice::new(), config);
        let (a, b, dst) = scene(&mut g);
        // `a` is uploaded last, so its texture stays bound on unit 0.
        g.replace_pixels(a, &[255, 0, 0, 255].repeat(4), 0, 0, 2, 2).unwrap();
        g.flush().unwrap();

        let sourceless = DrawTriangles::new(
            dst,
            [],
            quad([0.0, 0.0, 2.0, 2.0], [0.0, 0.0, 2.0, 2.0]),
            QUAD_INDICES,
        );
        assert_eq!(g.draw_triangles(sourceless), Err(Error::NoSource));
        g.draw_triangles(blit(dst, b, 3.0)).unwrap();
        read(&mut g, dst)
    };

    let merged = render(QueueConfig::default());
    let separate = render(QueueConfig {
        merge_draws: false,
        ..Default::default()
    });
    assert_eq!(merged, separate);
    assert_eq!(&merged[0..4], &[0; 4]);
    assert_eq!(&merged[12..16], &[0, 0, 255, 255]);
}

#[test]
fn different_uniforms_are_not_merged() {
    let mut g = gfx();
    let fill = g.new_shader(ShaderIr::fill());
    let dst = g.new_image(4, 1).unwrap();
    for (x, color) in [(0.0, [1.0, 0.0, 0.0, 1.0]), (2.0, [0.0, 1.0, 0.0, 1.0])] {
        g.draw_triangles(
            DrawTriangles::new(dst, [], quad([x, 0.0, 2.0, 1.0], [0.0; 4]), QUAD_INDICES)
                .with_shader(fill, vec![color.to_vec()]),
        )
        .unwrap();
    }
    assert_eq!(g.pending(), 2);
    let out = read(&mut g, dst);
    assert_eq!(&out[0..4], &[255, 0, 0, 255]);
    assert_eq!(&out[8..12], &[0, 255, 0, 255]);
}

#[test]
fn replace_between_draws_blocks_merging() {
    let mut g = gfx();
    let (a, b, dst) = scene(&mut g);
    g.draw_triangles(blit(dst, a, 0.0)).unwrap();
    g.replace_pixels(b, &[0; 16], 0, 0, 2, 2).unwrap();
    g.draw_triangles(blit(dst, b, 3.0)).unwrap();
    // Two source uploads from `scene`, draw, upload, draw.
    assert_eq!(g.pending(), 5);
}

// ── state caching ─────────────────────────────────────────────────────────

#[test]
fn empty_flush_never_touches_device() {
    let mut g = gfx();
    g.device_mut().clear_calls();
    let stats = g.flush().unwrap();
    assert_eq!(stats.commands, 0);
    assert!(g.device().calls().is_empty());
}

#[test]
fn enqueue_never_touches_device() {
    let mut g = gfx();
    let (a, _, dst) = scene(&mut g);
    g.device_mut().clear_calls();
    g.draw_triangles(blit(dst, a, 0.0)).unwrap();
    assert!(g.device().calls().is_empty());
}

#[test]
fn screen_viewport_is_reissued_each_flush() {
    let mut g = gfx();
    let fill = g.new_shader(ShaderIr::fill());
    let fb = g.device_mut().create_screen(4, 4);
    let screen = g.new_screen_image(fb, 4, 4).unwrap();
    let offscreen = g.new_image(4, 4).unwrap();

    let draw = |dst| {
        DrawTriangles::new(dst, [], quad([0.0, 0.0, 4.0, 4.0], [0.0; 4]), QUAD_INDICES)
            .with_shader(fill, vec![vec![1.0; 4]])
    };

    for _ in 0..2 {
        g.draw_triangles(draw(screen).with_invert_y(true)).unwrap();
        g.flush().unwrap();
    }
    assert_eq!(g.device().calls().viewports(), 2);

    g.draw_triangles(draw(offscreen)).unwrap();
    g.flush().unwrap();
    g.device_mut().clear_calls();
    g.draw_triangles(draw(offscreen)).unwrap();
    g.flush().unwrap();
    assert_eq!(g.device().calls().viewports(), 0);
}

#[test]
fn program_compiled_once_and_locations_cached() {
    let mut g = gfx();
    let (a, b, dst) = scene(&mut g);
    for src in [a, b, a] {
        g.draw_triangles(blit(dst, src, 0.0)).unwrap();
        g.flush().unwrap();
    }
    let calls = g.device().calls();
    assert_eq!(calls.count(|c| *c == Call::CreateProgram), 1);
    assert_eq!(
        calls.count(|c| matches!(c, Call::UniformLocation(n) if n == "u_projection")),
        1
    );
}

#[test]
fn capabilities_are_memoized() {
    let mut g = gfx();
    assert_eq!(g.max_texture_size(), 4096);
    g.new_image(8, 8).unwrap();
    g.new_image(8, 8).unwrap();
    assert!(g.has_high_precision_float());
    assert!(g.has_high_precision_float());
    let calls = g.device().calls();
    assert_eq!(calls.count(|c| *c == Call::MaxTextureSize), 1);
    assert_eq!(calls.count(|c| *c == Call::FloatPrecision), 1);
}

// ── contract violations ───────────────────────────────────────────────────

#[test]
fn contract_violations_fail_at_the_call() {
    let mut g = gfx();
    let (a, b, dst) = scene(&mut g);
    let extra: Vec<ImageId> = (0..3).map(|_| g.new_image(1, 1).unwrap()).collect();

    let too_many = DrawTriangles::new(dst, [a, b, extra[0], extra[1], extra[2]], Vec::<Vertex>::new(), Vec::<u16>::new());
    assert_eq!(
        g.draw_triangles(too_many),
        Err(Error::TooManySources { count: 5, max: 4 })
    );

    let err = g.replace_pixels(a, &[0; 16], 1, 1, 2, 2).unwrap_err();
    assert!(matches!(err, Error::OutOfBounds { .. }));
    assert_eq!(err.kind(), ErrorKind::Contract);

    let bad_index = DrawTriangles::new(dst, [a], quad([0.0; 4], [0.0; 4]), vec![0u16, 1, 9]);
    assert_eq!(
        g.draw_triangles(bad_index),
        Err(Error::InvalidIndex { index: 9, vertices: 4 })
    );

    assert_eq!(g.draw_triangles(blit(a, a, 0.0)), Err(Error::SourceIsDestination));
    assert_eq!(g.new_image(5000, 1), Err(Error::TooLarge { width: 5000, height: 1, max: 4096 }));
    assert_eq!(g.copy_pixels(dst, a), Err(Error::IncompatibleCopy {
        source_size: (6, 2),
        destination_size: (2, 2),
    }));
    assert_eq!(g.pending(), 2);
}

#[test]
fn custom_shader_uniforms_are_checked() {
    let mut g = gfx();
    let shader = g.new_shader(ShaderIr::wgsl(
        "return vec4<f32>(u_tint.rgb, 1.0);",
        vec![UniformDecl::new("u_tint", 4)],
    ));
    let dst = g.new_image(1, 1).unwrap();
    let draw = DrawTriangles::new(dst, [], quad([0.0, 0.0, 1.0, 1.0], [0.0; 4]), QUAD_INDICES);

    assert_eq!(
        g.draw_triangles(draw.clone().with_shader(shader, vec![])),
        Err(Error::UniformCount { expected: 1, actual: 0 })
    );
    assert!(matches!(
        g.draw_triangles(draw.clone().with_shader(shader, vec![vec![1.0; 3]])),
        Err(Error::UniformLength { .. })
    ));

    // Accepted, but the software device cannot run WGSL.
    g.draw_triangles(draw.with_shader(shader, vec![vec![1.0; 4]])).unwrap();
    let err = g.flush().unwrap_err();
    assert!(matches!(err, Error::Device(DeviceError::Unsupported(_))));
    assert_eq!(err.kind(), ErrorKind::Device);
}

#[test]
fn screen_cannot_be_a_source_or_replaced() {
    let mut g = gfx();
    let fb = g.device_mut().create_screen(2, 2);
    let screen = g.new_screen_image(fb, 2, 2).unwrap();
    let img = g.new_image(2, 2).unwrap();

    assert_eq!(g.draw_triangles(blit(img, screen, 0.0)), Err(Error::ScreenAsSource));
    assert_eq!(g.replace_pixels(screen, &[0; 16], 0, 0, 2, 2), Err(Error::ScreenPixels));
    assert_eq!(g.new_screen_image(fb, 2, 2), Err(Error::ScreenExists));
}

// ── disposal ──────────────────────────────────────────────────────────────

#[test]
fn dispose_releases_and_kills_the_handle() {
    let mut g = gfx();
    let (a, _, dst) = scene(&mut g);
    g.draw_triangles(blit(dst, a, 0.0)).unwrap();
    g.flush().unwrap();
    let before = g.device().live_textures();

    g.dispose(a).unwrap();
    assert_eq!(g.dispose(a), Err(Error::Disposed));
    assert_eq!(g.draw_triangles(blit(dst, a, 0.0)), Err(Error::Disposed));

    g.flush().unwrap();
    assert_eq!(g.device().live_textures(), before - 1);
    assert_eq!(g.image(a).map(|i| i.residency()), Some(Residency::Disposed));
    let mut out = vec![0; 16];
    assert_eq!(g.read_pixels(a, &mut out), Err(Error::Disposed));
}

// ── failures ──────────────────────────────────────────────────────────────

#[test]
fn out_of_memory_poisons_until_reset() {
    let mut g = gfx();
    g.device_mut().set_memory_budget(Some(1024));
    let img = g.new_image(32, 32).unwrap();
    let doomed = g.new_image(1, 1).unwrap();
    g.replace_pixels(img, &vec![1; 32 * 32 * 4], 0, 0, 32, 32).unwrap();
    g.dispose(doomed).unwrap();

    let err = g.flush().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    assert_eq!(g.pending(), 0);
    assert!(g.is_poisoned());
    assert_eq!(g.replace_pixels(img, &[0; 4], 0, 0, 1, 1), Err(Error::Poisoned));
    assert_eq!(g.flush().unwrap_err().kind(), ErrorKind::Poisoned);

    g.device_mut().set_memory_budget(None);
    g.reset();
    assert!(!g.is_poisoned());
    assert_eq!(g.image(doomed).map(|i| i.residency()), Some(Residency::Disposed));

    g.replace_pixels(img, &vec![1; 32 * 32 * 4], 0, 0, 32, 32).unwrap();
    assert!(read(&mut g, img).iter().all(|&b| b == 1));
}

#[test]
fn context_loss_is_distinct_and_recoverable() {
    let mut g = gfx();
    let (a, _, dst) = scene(&mut g);
    g.draw_triangles(blit(dst, a, 0.0)).unwrap();
    g.flush().unwrap();

    g.device_mut().lose_context();
    assert!(g.is_context_lost());
    g.draw_triangles(blit(dst, a, 0.0)).unwrap();
    let err = g.flush().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContextLost);

    g.device_mut().restore_context();
    g.reset();
    assert_eq!(g.image(a).map(|i| i.residency()), Some(Residency::Unallocated));
    assert!(read(&mut g, dst).iter().all(|&b| b == 0));

    g.replace_pixels(a, &[255, 0, 0, 255].repeat(4), 0, 0, 2, 2).unwrap();
    g.draw_triangles(blit(dst, a, 0.0)).unwrap();
    let out = read(&mut g, dst);
    assert_eq!(&out[0..4], &[255, 0, 0, 255]);
}
