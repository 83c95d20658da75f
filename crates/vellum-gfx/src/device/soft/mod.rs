//! Deterministic CPU implementation of [`Device`].
//!
//! `SoftDevice` behaves like a small GL context: objects live in tables keyed
//! by handle, and every call is appended to a [`CallLog`]. Two test hooks
//! simulate platform failures:
//! - a memory budget, after which allocations fail with `OutOfMemory`
//! - [`SoftDevice::lose_context`], after which fallible calls fail with
//!   `ContextLost` until [`SoftDevice::restore_context`]

mod calls;
mod raster;
mod shade;

pub use calls::{Call, CallLog};

use std::collections::{HashMap, HashSet};

use super::{
    Device, DeviceError, FramebufferId, ProgramId, RenderbufferId, StencilMode, TextureId,
    UniformLocation, TEXTURE_UNITS,
};
use crate::coords::{Region, Vertex};
use crate::paint::CompositeMode;
use crate::shader::{builtin, Kernel, ShaderIr};
use raster::{PixelBounds, WindowVertex};
use shade::FragmentState;

/// Capabilities reported by a [`SoftDevice`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SoftDeviceConfig {
    pub max_texture_size: u32,
    /// Reported fragment float mantissa bits.
    pub precision_bits: u32,
}

impl Default for SoftDeviceConfig {
    fn default() -> Self {
        Self {
            max_texture_size: 4096,
            precision_bits: 23,
        }
    }
}

/// RGBA8 premultiplied pixel storage.
struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Surface {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    #[inline]
    fn bytes(&self) -> usize {
        self.pixels.len()
    }

    fn contains(&self, x: u32, y: u32, width: u32, height: u32) -> bool {
        x.checked_add(width).is_some_and(|r| r <= self.width)
            && y.checked_add(height).is_some_and(|b| b <= self.height)
    }

    fn texel(&self, x: u32, y: u32) -> [f32; 4] {
        let o = self.offset(x, y);
        std::array::from_fn(|i| self.pixels[o + i] as f32 / 255.0)
    }

    fn store(&mut self, x: u32, y: u32, c: [f32; 4]) {
        let o = self.offset(x, y);
        for (i, v) in c.iter().enumerate() {
            self.pixels[o + i] = (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
    }

    fn read_rect(&self, x: u32, y: u32, width: u32, height: u32, out: &mut [u8]) {
        let row = width as usize * 4;
        for j in 0..height {
            let src = self.offset(x, y + j);
            let dst = j as usize * row;
            out[dst..dst + row].copy_from_slice(&self.pixels[src..src + row]);
        }
    }

    fn write_rect(&mut self, x: u32, y: u32, width: u32, height: u32, data: &[u8]) {
        let row = width as usize * 4;
        for j in 0..height {
            let dst = self.offset(x, y + j);
            let src = j as usize * row;
            self.pixels[dst..dst + row].copy_from_slice(&data[src..src + row]);
        }
    }
}

struct StencilBuffer {
    width: u32,
    height: u32,
    values: Vec<u8>,
}

impl StencilBuffer {
    #[inline]
    fn index(&self, x: i32, y: i32) -> Option<usize> {
        let (x, y) = (u32::try_from(x).ok()?, u32::try_from(y).ok()?);
        (x < self.width && y < self.height)
            .then(|| y as usize * self.width as usize + x as usize)
    }
}

struct SoftFramebuffer {
    texture: TextureId,
    stencil: Option<RenderbufferId>,
}

#[derive(Debug, Copy, Clone)]
enum SoftKernel {
    Textured,
    Fill,
}

struct SoftProgram {
    kernel: SoftKernel,
    names: Vec<String>,
    values: Vec<Vec<f32>>,
}

impl SoftProgram {
    fn value(&self, name: &str) -> &[f32] {
        match self.names.iter().position(|n| n == name) {
            Some(i) => &self.values[i],
            None => &[],
        }
    }
}

/// CPU rasterizer with GL-like object and binding semantics.
pub struct SoftDevice {
    config: SoftDeviceConfig,
    next_id: u32,

    textures: HashMap<TextureId, Surface>,
    framebuffers: HashMap<FramebufferId, SoftFramebuffer>,
    renderbuffers: HashMap<RenderbufferId, StencilBuffer>,
    programs: HashMap<ProgramId, SoftProgram>,
    screens: HashSet<FramebufferId>,

    units: [Option<TextureId>; TEXTURE_UNITS],
    active_unit: usize,
    framebuffer: Option<FramebufferId>,
    renderbuffer: Option<RenderbufferId>,
    program: Option<ProgramId>,
    viewport: (u32, u32),
    scissor: Option<Region>,
    blend: CompositeMode,
    stencil_mode: StencilMode,

    memory_budget: Option<usize>,
    memory_used: usize,
    lost: bool,
    log: CallLog,
}

impl Default for SoftDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftDevice {
    pub fn new() -> Self {
        Self::with_config(SoftDeviceConfig::default())
    }

    pub fn with_config(config: SoftDeviceConfig) -> Self {
        Self {
            config,
            next_id: 1,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            renderbuffers: HashMap::new(),
            programs: HashMap::new(),
            screens: HashSet::new(),
            units: [None; TEXTURE_UNITS],
            active_unit: 0,
            framebuffer: None,
            renderbuffer: None,
            program: None,
            viewport: (0, 0),
            scissor: None,
            blend: CompositeMode::default(),
            stencil_mode: StencilMode::Disabled,
            memory_budget: None,
            memory_used: 0,
            lost: false,
            log: CallLog::default(),
        }
    }

    #[inline]
    pub fn config(&self) -> SoftDeviceConfig {
        self.config
    }

    /// Creates the platform-owned framebuffer a window would present.
    ///
    /// It is not charged against the memory budget and survives context loss.
    pub fn create_screen(&mut self, width: u32, height: u32) -> FramebufferId {
        let texture = TextureId(self.alloc_id());
        self.textures.insert(texture, Surface::new(width.max(1), height.max(1)));
        let framebuffer = FramebufferId(self.alloc_id());
        self.framebuffers.insert(framebuffer, SoftFramebuffer { texture, stencil: None });
        self.screens.insert(framebuffer);
        framebuffer
    }

    /// Pixels of a framebuffer's color attachment, for inspection.
    pub fn framebuffer_pixels(&self, framebuffer: FramebufferId) -> Option<&[u8]> {
        let fb = self.framebuffers.get(&framebuffer)?;
        self.textures.get(&fb.texture).map(|s| s.pixels.as_slice())
    }

    #[inline]
    pub fn calls(&self) -> &CallLog {
        &self.log
    }

    pub fn clear_calls(&mut self) {
        self.log.clear();
    }

    /// Limits texture and renderbuffer memory, in bytes. `None` is unlimited.
    pub fn set_memory_budget(&mut self, budget: Option<usize>) {
        self.memory_budget = budget;
    }

    #[inline]
    pub fn memory_used(&self) -> usize {
        self.memory_used
    }

    /// Drops every non-platform object, as a lost GL context would.
    pub fn lose_context(&mut self) {
        log::warn!("soft device: context lost");
        self.lost = true;

        let screens = &self.screens;
        self.framebuffers.retain(|id, _| screens.contains(id));
        let kept: HashSet<TextureId> = self.framebuffers.values().map(|fb| fb.texture).collect();
        self.textures.retain(|id, _| kept.contains(id));
        for fb in self.framebuffers.values_mut() {
            fb.stencil = None;
        }
        self.renderbuffers.clear();
        self.programs.clear();

        self.units = [None; TEXTURE_UNITS];
        self.framebuffer = None;
        self.renderbuffer = None;
        self.program = None;
        self.memory_used = 0;
    }

    pub fn restore_context(&mut self) {
        log::info!("soft device: context restored");
        self.lost = false;
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len() - self.screens.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len() - self.screens.len()
    }

    pub fn live_renderbuffers(&self) -> usize {
        self.renderbuffers.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_lost(&self) -> Result<(), DeviceError> {
        if self.lost {
            Err(DeviceError::ContextLost)
        } else {
            Ok(())
        }
    }

    fn charge(&mut self, bytes: usize, what: &'static str) -> Result<(), DeviceError> {
        let used = self.memory_used + bytes;
        if self.memory_budget.is_some_and(|budget| used > budget) {
            log::debug!("soft device: {what} of {bytes} bytes exceeds budget");
            return Err(DeviceError::OutOfMemory(what));
        }
        self.memory_used = used;
        Ok(())
    }

    fn check_size(&self, width: u32, height: u32) -> Result<(), DeviceError> {
        let max = self.config.max_texture_size;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(DeviceError::Backend(format!(
                "invalid surface size {width}x{height} (max {max})"
            )));
        }
        Ok(())
    }

    fn bound_target(&self) -> Result<(TextureId, Option<RenderbufferId>), DeviceError> {
        let fb = self
            .framebuffer
            .and_then(|id| self.framebuffers.get(&id))
            .ok_or(DeviceError::InvalidHandle("framebuffer"))?;
        Ok((fb.texture, fb.stencil))
    }

    fn active_texture_id(&self) -> Result<TextureId, DeviceError> {
        self.units[self.active_unit]
            .filter(|id| self.textures.contains_key(id))
            .ok_or(DeviceError::InvalidHandle("texture"))
    }

    fn pixel_bounds(&self, target: &Surface) -> PixelBounds {
        let mut bounds = PixelBounds {
            x0: 0,
            y0: 0,
            x1: target.width.min(self.viewport.0) as i32,
            y1: target.height.min(self.viewport.1) as i32,
        };
        if let Some(scissor) = self.scissor {
            let (x0, y0, x1, y1) = scissor.pixel_bounds();
            bounds = bounds.intersect(PixelBounds { x0, y0, x1, y1 });
        }
        bounds
    }
}

impl Device for SoftDevice {
    fn max_texture_size(&mut self) -> u32 {
        self.log.push(Call::MaxTextureSize);
        self.config.max_texture_size
    }

    fn float_precision_bits(&mut self) -> u32 {
        self.log.push(Call::FloatPrecision);
        self.config.precision_bits
    }

    fn is_context_lost(&mut self) -> bool {
        self.log.push(Call::IsContextLost);
        self.lost
    }

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId, DeviceError> {
        self.log.push(Call::CreateTexture { width, height });
        self.check_lost()?;
        self.check_size(width, height)?;

        let surface = Surface::new(width, height);
        self.charge(surface.bytes(), "texture")?;
        let id = TextureId(self.alloc_id());
        self.textures.insert(id, surface);
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.log.push(Call::DeleteTexture(texture));
        if let Some(s) = self.textures.remove(&texture) {
            self.memory_used = self.memory_used.saturating_sub(s.bytes());
        }
        for unit in &mut self.units {
            if *unit == Some(texture) {
                *unit = None;
            }
        }
    }

    fn active_texture(&mut self, unit: usize) {
        self.log.push(Call::ActiveTexture(unit));
        if unit < TEXTURE_UNITS {
            self.active_unit = unit;
        }
    }

    fn bind_texture(&mut self, texture: TextureId) {
        self.log.push(Call::BindTexture(texture));
        self.units[self.active_unit] = Some(texture);
    }

    fn tex_sub_image(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<(), DeviceError> {
        self.log.push(Call::TexSubImage { x, y, width, height });
        self.check_lost()?;

        let id = self.active_texture_id()?;
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(DeviceError::Backend(format!(
                "upload of {} bytes, expected {expected}",
                pixels.len()
            )));
        }
        let surface = self
            .textures
            .get_mut(&id)
            .ok_or(DeviceError::InvalidHandle("texture"))?;
        if !surface.contains(x, y, width, height) {
            return Err(DeviceError::Backend("upload outside texture".into()));
        }
        surface.write_rect(x, y, width, height, pixels);
        Ok(())
    }

    fn create_framebuffer(&mut self, texture: TextureId) -> Result<FramebufferId, DeviceError> {
        self.log.push(Call::CreateFramebuffer(texture));
        self.check_lost()?;
        if !self.textures.contains_key(&texture) {
            return Err(DeviceError::InvalidHandle("texture"));
        }
        let id = FramebufferId(self.alloc_id());
        self.framebuffers.insert(id, SoftFramebuffer { texture, stencil: None });
        Ok(id)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.log.push(Call::DeleteFramebuffer(framebuffer));
        if self.screens.contains(&framebuffer) {
            return;
        }
        self.framebuffers.remove(&framebuffer);
        if self.framebuffer == Some(framebuffer) {
            self.framebuffer = None;
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.log.push(Call::BindFramebuffer(framebuffer));
        self.framebuffer = Some(framebuffer);
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.log.push(Call::Viewport { width, height });
        self.viewport = (width, height);
    }

    fn set_scissor(&mut self, region: Option<Region>) {
        self.log.push(Call::Scissor(region));
        self.scissor = region;
    }

    fn read_pixels(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        out: &mut [u8],
    ) -> Result<(), DeviceError> {
        self.log.push(Call::ReadPixels);
        self.check_lost()?;

        let (texture, _) = self.bound_target()?;
        let surface = self
            .textures
            .get(&texture)
            .ok_or(DeviceError::InvalidHandle("texture"))?;
        if !surface.contains(x, y, width, height) {
            return Err(DeviceError::Backend("read outside framebuffer".into()));
        }
        if out.len() < width as usize * height as usize * 4 {
            return Err(DeviceError::Backend("read buffer too small".into()));
        }
        surface.read_rect(x, y, width, height, out);
        Ok(())
    }

    fn copy_tex_sub_image(
        &mut self,
        dst_x: u32,
        dst_y: u32,
        src_x: u32,
        src_y: u32,
        width: u32,
        height: u32,
    ) -> Result<(), DeviceError> {
        self.log.push(Call::CopyTexSubImage);
        self.check_lost()?;

        let (src_id, _) = self.bound_target()?;
        let dst_id = self.active_texture_id()?;

        let src = self
            .textures
            .get(&src_id)
            .ok_or(DeviceError::InvalidHandle("texture"))?;
        if !src.contains(src_x, src_y, width, height) {
            return Err(DeviceError::Backend("copy source outside framebuffer".into()));
        }
        let mut staging = vec![0; width as usize * height as usize * 4];
        src.read_rect(src_x, src_y, width, height, &mut staging);

        let dst = self
            .textures
            .get_mut(&dst_id)
            .ok_or(DeviceError::InvalidHandle("texture"))?;
        if !dst.contains(dst_x, dst_y, width, height) {
            return Err(DeviceError::Backend("copy destination outside texture".into()));
        }
        dst.write_rect(dst_x, dst_y, width, height, &staging);
        Ok(())
    }

    fn create_renderbuffer(&mut self, width: u32, height: u32) -> Result<RenderbufferId, DeviceError> {
        self.log.push(Call::CreateRenderbuffer);
        self.check_lost()?;
        self.check_size(width, height)?;

        let bytes = width as usize * height as usize;
        self.charge(bytes, "renderbuffer")?;
        let id = RenderbufferId(self.alloc_id());
        self.renderbuffers.insert(
            id,
            StencilBuffer {
                width,
                height,
                values: vec![0; bytes],
            },
        );
        Ok(id)
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        self.log.push(Call::DeleteRenderbuffer(renderbuffer));
        if let Some(rb) = self.renderbuffers.remove(&renderbuffer) {
            self.memory_used = self.memory_used.saturating_sub(rb.values.len());
        }
        for fb in self.framebuffers.values_mut() {
            if fb.stencil == Some(renderbuffer) {
                fb.stencil = None;
            }
        }
        if self.renderbuffer == Some(renderbuffer) {
            self.renderbuffer = None;
        }
    }

    fn bind_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        self.log.push(Call::BindRenderbuffer(renderbuffer));
        self.renderbuffer = Some(renderbuffer);
    }

    fn attach_stencil(&mut self) -> Result<(), DeviceError> {
        self.log.push(Call::AttachStencil);
        self.check_lost()?;

        let rb = self
            .renderbuffer
            .filter(|id| self.renderbuffers.contains_key(id))
            .ok_or(DeviceError::InvalidHandle("renderbuffer"))?;
        let fb = self
            .framebuffer
            .and_then(|id| self.framebuffers.get_mut(&id))
            .ok_or(DeviceError::InvalidHandle("framebuffer"))?;
        fb.stencil = Some(rb);
        Ok(())
    }

    fn clear_stencil(&mut self) {
        self.log.push(Call::ClearStencil);
        let Ok((_, Some(rb))) = self.bound_target() else {
            return;
        };
        if let Some(stencil) = self.renderbuffers.get_mut(&rb) {
            stencil.values.fill(0);
        }
    }

    fn set_stencil_mode(&mut self, mode: StencilMode) {
        self.log.push(Call::StencilMode(mode));
        self.stencil_mode = mode;
    }

    fn create_program(&mut self, ir: &ShaderIr) -> Result<ProgramId, DeviceError> {
        self.log.push(Call::CreateProgram);
        self.check_lost()?;

        let kernel = match ir.kernel() {
            Kernel::Textured => SoftKernel::Textured,
            Kernel::Fill => SoftKernel::Fill,
            Kernel::Wgsl(_) => {
                return Err(DeviceError::Unsupported(
                    "WGSL kernels require a GPU device".into(),
                ));
            }
        };
        let names: Vec<String> = ir.declared_uniforms().map(|u| u.name.to_string()).collect();
        let values = vec![Vec::new(); names.len()];

        let id = ProgramId(self.alloc_id());
        self.programs.insert(id, SoftProgram { kernel, names, values });
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.log.push(Call::DeleteProgram(program));
        self.programs.remove(&program);
        if self.program == Some(program) {
            self.program = None;
        }
    }

    fn use_program(&mut self, program: ProgramId) {
        self.log.push(Call::UseProgram(program));
        self.program = Some(program);
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.log.push(Call::UniformLocation(name.to_string()));
        let p = self.programs.get(&program)?;
        p.names
            .iter()
            .position(|n| n == name)
            .map(|i| UniformLocation(i as u32))
    }

    fn set_uniform(&mut self, location: UniformLocation, value: &[f32]) {
        self.log.push(Call::SetUniform(location));
        let Some(p) = self.program.and_then(|id| self.programs.get_mut(&id)) else {
            return;
        };
        if let Some(slot) = p.values.get_mut(location.0 as usize) {
            slot.clear();
            slot.extend_from_slice(value);
        }
    }

    fn set_blend(&mut self, mode: CompositeMode) {
        self.log.push(Call::Blend(mode));
        self.blend = mode;
    }

    fn draw_elements(&mut self, vertices: &[Vertex], indices: &[u16]) -> Result<(), DeviceError> {
        self.log.push(Call::DrawElements { indices: indices.len() });
        self.check_lost()?;

        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(DeviceError::Backend(format!(
                "index {bad} out of range for {} vertices",
                vertices.len()
            )));
        }

        let (target_id, stencil_id) = self.bound_target()?;
        let program = self
            .program
            .and_then(|id| self.programs.get(&id))
            .ok_or(DeviceError::InvalidHandle("program"))?;
        let state = FragmentState::new(program);
        let projection: [f64; 16] = {
            let p = program.value(builtin::PROJECTION);
            std::array::from_fn(|i| match p.get(i) {
                Some(&v) => v as f64,
                None if i % 5 == 0 => 1.0,
                None => 0.0,
            })
        };

        let mut target = self
            .textures
            .remove(&target_id)
            .ok_or(DeviceError::InvalidHandle("texture"))?;
        let mut stencil = stencil_id.and_then(|id| self.renderbuffers.remove(&id).map(|s| (id, s)));

        let bounds = self.pixel_bounds(&target);
        let (vw, vh) = (self.viewport.0 as f64, self.viewport.1 as f64);
        let to_window = |v: &Vertex| {
            let (x, y) = (v.position[0] as f64, v.position[1] as f64);
            let p = &projection;
            let cx = p[0] * x + p[4] * y + p[12];
            let cy = p[1] * x + p[5] * y + p[13];
            let cw = p[3] * x + p[7] * y + p[15];
            WindowVertex {
                x: (cx / cw + 1.0) * 0.5 * vw,
                y: (cy / cw + 1.0) * 0.5 * vh,
                tex: v.tex_coords,
                color: v.color,
                source: v.source,
            }
        };

        let sources: [Option<&Surface>; TEXTURE_UNITS] =
            std::array::from_fn(|i| self.units[i].and_then(|t| self.textures.get(&t)));
        let mode = self.stencil_mode;
        let blend = self.blend;

        for tri in indices.chunks_exact(3) {
            let tri = [
                to_window(&vertices[tri[0] as usize]),
                to_window(&vertices[tri[1] as usize]),
                to_window(&vertices[tri[2] as usize]),
            ];
            raster::rasterize(tri, bounds, |x, y, varyings| {
                let stencil_index = stencil.as_ref().and_then(|(_, s)| s.index(x, y));
                match mode {
                    StencilMode::Invert => {
                        if let (Some((_, s)), Some(i)) = (stencil.as_mut(), stencil_index) {
                            s.values[i] ^= 0xff;
                        }
                        return;
                    }
                    StencilMode::NonZero => {
                        if let (Some((_, s)), Some(i)) = (stencil.as_ref(), stencil_index) {
                            if s.values[i] == 0 {
                                return;
                            }
                        }
                    }
                    StencilMode::Disabled => {}
                }

                let (x, y) = (x as u32, y as u32);
                let src = state.shade(&varyings, &sources);
                let dst = target.texel(x, y);
                target.store(x, y, blend.blend(src, dst));
            });
        }

        self.textures.insert(target_id, target);
        if let Some((id, s)) = stencil {
            self.renderbuffers.insert(id, s);
        }
        Ok(())
    }
}
