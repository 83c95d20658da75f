//! The stateful graphics API this crate drives.
//!
//! [`Device`] mirrors an immediate-mode GPU context: objects are created and
//! named by handles, and most calls act on whatever is currently bound
//! (active texture unit, framebuffer, renderbuffer, program). Nothing in a
//! device caches; redundant-call elimination is the job of
//! [`StateCache`](crate::state::StateCache), which is the only caller.
//!
//! Backends:
//! - [`soft::SoftDevice`]: deterministic CPU rasterizer, always available
//! - `wgpu::WgpuDevice`: GPU backend (cargo feature `wgpu`)

mod error;
pub mod soft;

#[cfg(feature = "wgpu")]
pub mod wgpu;

pub use error::DeviceError;

use crate::coords::{Region, Vertex};
use crate::paint::CompositeMode;
use crate::shader::ShaderIr;

/// Number of texture units a draw may sample from.
pub const TEXTURE_UNITS: usize = 4;

/// Texture object handle.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TextureId(pub u32);

/// Framebuffer object handle.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct FramebufferId(pub u32);

/// Renderbuffer handle. Renderbuffers hold stencil data.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RenderbufferId(pub u32);

/// Linked program handle.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ProgramId(pub u32);

/// Resolved uniform location inside one program.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct UniformLocation(pub u32);

/// Stencil configuration for the next draws.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum StencilMode {
    /// Stencil ignored; color always written.
    #[default]
    Disabled,
    /// Covered pixels invert their stencil value; color writes are masked.
    Invert,
    /// Color is written only where the stencil value is non-zero.
    NonZero,
}

/// Immediate-mode graphics context.
///
/// Pixel data is RGBA8, premultiplied, row-major. Row 0 of a framebuffer is
/// the row that normalized device coordinate `y = -1` maps to.
pub trait Device {
    // ── capabilities ──────────────────────────────────────────────────────

    /// Largest texture edge, in texels. May be slow; callers memoize.
    fn max_texture_size(&mut self) -> u32;

    /// Mantissa bits of fragment-stage floats. May be slow; callers memoize.
    fn float_precision_bits(&mut self) -> u32;

    fn is_context_lost(&mut self) -> bool;

    // ── textures ──────────────────────────────────────────────────────────

    /// Allocates a zero-filled texture.
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId, DeviceError>;
    fn delete_texture(&mut self, texture: TextureId);

    /// Selects the texture unit that `bind_texture` and uploads act on.
    fn active_texture(&mut self, unit: usize);
    fn bind_texture(&mut self, texture: TextureId);

    /// Uploads `pixels` into the texture bound on the active unit.
    fn tex_sub_image(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<(), DeviceError>;

    // ── framebuffers ──────────────────────────────────────────────────────

    /// Creates a framebuffer whose color attachment is `texture`.
    fn create_framebuffer(&mut self, texture: TextureId) -> Result<FramebufferId, DeviceError>;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);
    fn bind_framebuffer(&mut self, framebuffer: FramebufferId);
    fn set_viewport(&mut self, width: u32, height: u32);

    /// Restricts rasterization to `region` of the bound framebuffer.
    fn set_scissor(&mut self, region: Option<Region>);

    /// Reads a rectangle of the bound framebuffer into `out`.
    fn read_pixels(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        out: &mut [u8],
    ) -> Result<(), DeviceError>;

    /// Copies a rectangle of the bound framebuffer, starting at `(src_x, src_y)`,
    /// into the texture bound on the active unit at `(dst_x, dst_y)`.
    fn copy_tex_sub_image(
        &mut self,
        dst_x: u32,
        dst_y: u32,
        src_x: u32,
        src_y: u32,
        width: u32,
        height: u32,
    ) -> Result<(), DeviceError>;

    // ── renderbuffers (stencil) ───────────────────────────────────────────

    fn create_renderbuffer(&mut self, width: u32, height: u32) -> Result<RenderbufferId, DeviceError>;
    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId);
    fn bind_renderbuffer(&mut self, renderbuffer: RenderbufferId);

    /// Attaches the bound renderbuffer as the bound framebuffer's stencil buffer.
    fn attach_stencil(&mut self) -> Result<(), DeviceError>;

    /// Zeroes the bound framebuffer's stencil buffer.
    fn clear_stencil(&mut self);
    fn set_stencil_mode(&mut self, mode: StencilMode);

    // ── programs ──────────────────────────────────────────────────────────

    fn create_program(&mut self, ir: &ShaderIr) -> Result<ProgramId, DeviceError>;
    fn delete_program(&mut self, program: ProgramId);
    fn use_program(&mut self, program: ProgramId);

    /// Looks up a uniform by name. Slow (string lookup); callers memoize.
    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    /// Sets a uniform of the current program.
    fn set_uniform(&mut self, location: UniformLocation, value: &[f32]);

    // ── drawing ───────────────────────────────────────────────────────────

    fn set_blend(&mut self, mode: CompositeMode);

    /// Draws indexed triangles into the bound framebuffer with the current
    /// program, textures, blend, scissor and stencil state.
    fn draw_elements(&mut self, vertices: &[Vertex], indices: &[u16]) -> Result<(), DeviceError>;
}
