use std::collections::HashMap;

use crate::coords::{Region, Vertex};
use crate::device::{
    Device, DeviceError, FramebufferId, ProgramId, RenderbufferId, StencilMode, TextureId,
    UniformLocation, TEXTURE_UNITS,
};
use crate::paint::CompositeMode;
use crate::shader::ShaderIr;

/// A framebuffer together with its pixel size.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Framebuffer {
    pub id: FramebufferId,
    pub width: u32,
    pub height: u32,
}

/// Wraps a [`Device`] and drops calls that would not change its state.
///
/// Bindings (framebuffer, per-unit textures, renderbuffer, program), the
/// viewport, blend, scissor, stencil mode and uniform values are remembered
/// from the last call. A binding or value equal to the remembered one is
/// not forwarded. Capability queries are asked once and kept.
///
/// The screen framebuffer's viewport is never remembered: the platform may
/// resize it behind our back, so it is re-issued on every bind.
///
/// Anything that touches the device directly through
/// [`StateCache::device_mut`] must be followed by [`StateCache::reset`].
pub struct StateCache<D: Device> {
    device: D,
    screen_framebuffer: Option<FramebufferId>,

    framebuffer: Option<FramebufferId>,
    active_unit: Option<usize>,
    textures: [Option<TextureId>; TEXTURE_UNITS],
    renderbuffer: Option<RenderbufferId>,
    viewport: Option<(u32, u32)>,
    composite: Option<CompositeMode>,
    program: Option<ProgramId>,
    scissor: Option<Option<Region>>,
    stencil: Option<StencilMode>,
    uniforms: HashMap<(ProgramId, UniformLocation), Vec<f32>>,

    max_texture_size: Option<u32>,
    high_precision: Option<bool>,
}

/// Fragment floats with at least this many mantissa bits count as high precision.
const HIGH_PRECISION_BITS: u32 = 23;

impl<D: Device> StateCache<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            screen_framebuffer: None,
            framebuffer: None,
            active_unit: None,
            textures: [None; TEXTURE_UNITS],
            renderbuffer: None,
            viewport: None,
            composite: None,
            program: None,
            scissor: None,
            stencil: None,
            uniforms: HashMap::new(),
            max_texture_size: None,
            high_precision: None,
        }
    }

    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Direct device access. Call [`StateCache::reset`] afterwards if any
    /// binding changed.
    #[inline]
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_inner(self) -> D {
        self.device
    }

    /// Forgets every remembered binding and value. Capabilities and the
    /// screen framebuffer are kept.
    pub fn reset(&mut self) {
        self.framebuffer = None;
        self.active_unit = None;
        self.textures = [None; TEXTURE_UNITS];
        self.renderbuffer = None;
        self.viewport = None;
        self.composite = None;
        self.program = None;
        self.scissor = None;
        self.stencil = None;
        self.uniforms.clear();
    }

    // ── capabilities ──────────────────────────────────────────────────────

    pub fn max_texture_size(&mut self) -> u32 {
        *self
            .max_texture_size
            .get_or_insert_with(|| self.device.max_texture_size())
    }

    pub fn has_high_precision_float(&mut self) -> bool {
        *self
            .high_precision
            .get_or_insert_with(|| self.device.float_precision_bits() >= HIGH_PRECISION_BITS)
    }

    #[inline]
    pub fn is_context_lost(&mut self) -> bool {
        self.device.is_context_lost()
    }

    // ── screen ────────────────────────────────────────────────────────────

    /// Registers the platform framebuffer. Only the first call takes effect.
    pub fn set_screen_framebuffer(&mut self, framebuffer: FramebufferId) -> bool {
        match self.screen_framebuffer {
            Some(existing) if existing != framebuffer => {
                log::warn!("screen framebuffer already set to {existing:?}; ignoring {framebuffer:?}");
                false
            }
            _ => {
                self.screen_framebuffer = Some(framebuffer);
                true
            }
        }
    }

    #[inline]
    pub fn screen_framebuffer(&self) -> Option<FramebufferId> {
        self.screen_framebuffer
    }

    // ── bindings ──────────────────────────────────────────────────────────

    pub fn bind_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffer == Some(framebuffer) {
            return;
        }
        self.device.bind_framebuffer(framebuffer);
        self.framebuffer = Some(framebuffer);
    }

    /// Binds `framebuffer` and sizes the viewport to it.
    pub fn set_viewport(&mut self, framebuffer: &Framebuffer) {
        self.bind_framebuffer(framebuffer.id);

        let size = (framebuffer.width, framebuffer.height);
        if self.viewport != Some(size) {
            self.device.set_viewport(size.0, size.1);
        }

        self.viewport = if Some(framebuffer.id) == self.screen_framebuffer {
            None
        } else {
            Some(size)
        };
    }

    pub fn active_texture(&mut self, unit: usize) {
        if self.active_unit == Some(unit) {
            return;
        }
        self.device.active_texture(unit);
        self.active_unit = Some(unit);
    }

    /// Binds `texture` on `unit`. The unit is only activated when a bind is
    /// actually issued.
    pub fn bind_texture(&mut self, unit: usize, texture: TextureId) {
        if self.textures.get(unit).copied().flatten() == Some(texture) {
            return;
        }
        self.active_texture(unit);
        self.device.bind_texture(texture);
        if let Some(slot) = self.textures.get_mut(unit) {
            *slot = Some(texture);
        }
    }

    pub fn bind_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        if self.renderbuffer == Some(renderbuffer) {
            return;
        }
        self.device.bind_renderbuffer(renderbuffer);
        self.renderbuffer = Some(renderbuffer);
    }

    pub fn use_program(&mut self, program: ProgramId) {
        if self.program == Some(program) {
            return;
        }
        self.device.use_program(program);
        self.program = Some(program);
    }

    // ── pipeline state ────────────────────────────────────────────────────

    pub fn set_composite(&mut self, mode: CompositeMode) {
        if self.composite == Some(mode) {
            return;
        }
        self.device.set_blend(mode);
        self.composite = Some(mode);
    }

    pub fn set_scissor(&mut self, region: Option<Region>) {
        if self.scissor == Some(region) {
            return;
        }
        self.device.set_scissor(region);
        self.scissor = Some(region);
    }

    pub fn set_stencil_mode(&mut self, mode: StencilMode) {
        if self.stencil == Some(mode) {
            return;
        }
        self.device.set_stencil_mode(mode);
        self.stencil = Some(mode);
    }

    /// Makes `program` current and sets one of its uniforms.
    pub fn set_uniform(&mut self, program: ProgramId, location: UniformLocation, value: &[f32]) {
        self.use_program(program);
        let key = (program, location);
        if self.uniforms.get(&key).is_some_and(|v| v.as_slice() == value) {
            return;
        }
        self.device.set_uniform(location, value);
        self.uniforms.insert(key, value.to_vec());
    }

    // ── objects ───────────────────────────────────────────────────────────

    #[inline]
    pub fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId, DeviceError> {
        self.device.create_texture(width, height)
    }

    pub fn delete_texture(&mut self, texture: TextureId) {
        self.device.delete_texture(texture);
        for slot in &mut self.textures {
            if *slot == Some(texture) {
                *slot = None;
            }
        }
    }

    #[inline]
    pub fn create_framebuffer(&mut self, texture: TextureId) -> Result<FramebufferId, DeviceError> {
        self.device.create_framebuffer(texture)
    }

    pub fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.device.delete_framebuffer(framebuffer);
        if self.framebuffer == Some(framebuffer) {
            self.framebuffer = None;
            self.viewport = None;
        }
    }

    #[inline]
    pub fn create_renderbuffer(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<RenderbufferId, DeviceError> {
        self.device.create_renderbuffer(width, height)
    }

    pub fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        self.device.delete_renderbuffer(renderbuffer);
        if self.renderbuffer == Some(renderbuffer) {
            self.renderbuffer = None;
        }
    }

    #[inline]
    pub fn create_program(&mut self, ir: &ShaderIr) -> Result<ProgramId, DeviceError> {
        self.device.create_program(ir)
    }

    pub fn delete_program(&mut self, program: ProgramId) {
        self.device.delete_program(program);
        if self.program == Some(program) {
            self.program = None;
        }
        self.uniforms.retain(|(p, _), _| *p != program);
    }

    #[inline]
    pub fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.device.uniform_location(program, name)
    }

    // ── data ──────────────────────────────────────────────────────────────

    /// Uploads into `texture`, binding it on unit 0.
    pub fn tex_sub_image(
        &mut self,
        texture: TextureId,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<(), DeviceError> {
        self.bind_texture(0, texture);
        // Uploads target the active unit's texture.
        self.active_texture(0);
        self.device.tex_sub_image(x, y, width, height, pixels)
    }

    /// Reads from `framebuffer`, binding it first.
    pub fn read_pixels(
        &mut self,
        framebuffer: FramebufferId,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        out: &mut [u8],
    ) -> Result<(), DeviceError> {
        self.bind_framebuffer(framebuffer);
        self.device.read_pixels(x, y, width, height, out)
    }

    /// Copies a `width × height` rectangle from the origin of `source` into
    /// `destination` at its origin.
    pub fn copy_framebuffer_to_texture(
        &mut self,
        source: FramebufferId,
        destination: TextureId,
        width: u32,
        height: u32,
    ) -> Result<(), DeviceError> {
        self.bind_framebuffer(source);
        self.bind_texture(0, destination);
        self.active_texture(0);
        self.device.copy_tex_sub_image(0, 0, 0, 0, width, height)
    }

    /// Attaches `renderbuffer` as the stencil buffer of `framebuffer`.
    pub fn attach_stencil(
        &mut self,
        framebuffer: FramebufferId,
        renderbuffer: RenderbufferId,
    ) -> Result<(), DeviceError> {
        self.bind_framebuffer(framebuffer);
        self.bind_renderbuffer(renderbuffer);
        self.device.attach_stencil()
    }

    #[inline]
    pub fn clear_stencil(&mut self) {
        self.device.clear_stencil();
    }

    #[inline]
    pub fn draw_elements(&mut self, vertices: &[Vertex], indices: &[u16]) -> Result<(), DeviceError> {
        self.device.draw_elements(vertices, indices)
    }
}
