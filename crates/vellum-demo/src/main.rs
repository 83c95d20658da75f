use anyhow::{Context, Result};
use rand::Rng;
use vellum_gfx::command::DrawTriangles;
use vellum_gfx::coords::{quad, QUAD_INDICES};
use vellum_gfx::core::Graphics;
use vellum_gfx::device::soft::SoftDevice;
use vellum_gfx::logging::{init_logging, LoggingConfig};

const SCREEN: (u32, u32) = (320, 240);
const CANVAS: (u32, u32) = (160, 120);
const DEFAULT_FRAMES: u32 = 60;

fn frames() -> Result<u32> {
    match std::env::var("VELLUM_DEMO_FRAMES") {
        Ok(v) => v
            .parse()
            .with_context(|| format!("VELLUM_DEMO_FRAMES is not a frame count: {v:?}")),
        Err(_) => Ok(DEFAULT_FRAMES),
    }
}

fn main() -> Result<()> {
    init_logging(LoggingConfig {
        trace_batching: std::env::var_os("VELLUM_DEMO_TRACE").is_some(),
        ..Default::default()
    });
    let frames = frames()?;

    let mut device = SoftDevice::new();
    let fb = device.create_screen(SCREEN.0, SCREEN.1);
    let mut gfx = Graphics::new(device);
    let screen = gfx.new_screen_image(fb, SCREEN.0, SCREEN.1)?;
    let canvas = gfx.new_image(CANVAS.0, CANVAS.1)?;

    let mut rng = rand::rng();
    let (sw, sh) = (SCREEN.0 as f32, SCREEN.1 as f32);
    let (cw, ch) = (CANVAS.0 as f32, CANVAS.1 as f32);

    for frame in 0..frames {
        // A handful of single-pixel writes, as a paint program would issue.
        for _ in 0..16 {
            let x = rng.random_range(0..CANVAS.0);
            let y = rng.random_range(0..CANVAS.1);
            let px: [u8; 4] = [rng.random(), rng.random(), rng.random(), 255];
            gfx.replace_pixels(canvas, &px, x, y, 1, 1)?;
        }

        gfx.draw_triangles(
            DrawTriangles::new(
                screen,
                [canvas],
                quad([0.0, 0.0, sw, sh], [0.0, 0.0, cw, ch]),
                QUAD_INDICES,
            )
            .with_invert_y(true),
        )?;

        let stats = gfx.flush()?;
        log::debug!("frame {frame}: {stats:?}");
    }

    let lit = gfx
        .device()
        .framebuffer_pixels(fb)
        .context("screen framebuffer vanished")?
        .chunks_exact(4)
        .filter(|px| px[3] != 0)
        .count();
    log::info!(
        "{frames} frames rendered; {lit} of {} screen pixels lit",
        SCREEN.0 * SCREEN.1
    );
    Ok(())
}
