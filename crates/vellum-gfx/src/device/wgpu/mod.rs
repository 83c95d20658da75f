//! GPU implementation of [`Device`] on top of `wgpu`.
//!
//! wgpu has no bind points, so `WgpuDevice` keeps the GL-style binding state
//! on the CPU and turns every `draw_elements` into one render pass:
//! - color attachment: the bound framebuffer's texture, `LoadOp::Load`
//! - stencil attachment: its renderbuffer, when one is attached
//! - bind group: the current program's uniforms and the four texture units
//!
//! Each pass is submitted right away, so uploads queued with
//! `write_texture` land between the draws they were issued between.
//!
//! WGSL kernels ([`Kernel::Wgsl`](crate::shader::Kernel::Wgsl)) are the body
//! of `fn shade(frag: Fragment) -> vec4<f32>`. Inside it:
//! - `frag.tex`, `frag.color`, `frag.source` are the interpolated vertex data
//! - each user uniform is a local of the same name (`vec4<f32>`, or an array
//!   of `vec4<f32>` when it is longer than four floats)
//! - `sample_source(slot, texel_coords)` samples a source the way the
//!   built-in kernel does, and `apply_color_matrix(c)` applies the draw's
//!   color matrix

mod init;
mod pipeline;
mod program;

pub use init::WgpuInit;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::{
    Device, DeviceError, FramebufferId, ProgramId, RenderbufferId, StencilMode, TextureId,
    UniformLocation, TEXTURE_UNITS,
};
use crate::coords::{Region, Vertex};
use crate::paint::CompositeMode;
use crate::shader::ShaderIr;
use pipeline::PipelineKey;
use program::GpuProgram;

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const STENCIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Stencil8;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    /// Bytes charged against the memory budget.
    bytes: u64,
}

impl GpuTexture {
    fn color(device: &wgpu::Device, width: u32, height: u32) -> Self {
        Self::new(
            device,
            "vellum texture",
            width,
            height,
            COLOR_FORMAT,
            wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            4,
        )
    }

    fn stencil(device: &wgpu::Device, width: u32, height: u32) -> Self {
        Self::new(
            device,
            "vellum stencil",
            width,
            height,
            STENCIL_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
            1,
        )
    }

    fn new(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
        bytes_per_texel: u64,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
            bytes: u64::from(width) * u64::from(height) * bytes_per_texel,
        }
    }

    fn contains(&self, x: u32, y: u32, width: u32, height: u32) -> bool {
        x.checked_add(width).is_some_and(|r| r <= self.width)
            && y.checked_add(height).is_some_and(|b| b <= self.height)
    }

    fn origin(x: u32, y: u32) -> wgpu::Origin3d {
        wgpu::Origin3d { x, y, z: 0 }
    }

    fn copy_info(&self, x: u32, y: u32) -> wgpu::TexelCopyTextureInfo<'_> {
        wgpu::TexelCopyTextureInfo {
            texture: &self.texture,
            mip_level: 0,
            origin: Self::origin(x, y),
            aspect: wgpu::TextureAspect::All,
        }
    }
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

struct GpuFramebuffer {
    texture: TextureId,
    stencil: Option<RenderbufferId>,
}

/// `wgpu`-backed device rendering into offscreen textures.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    lost: Arc<AtomicBool>,

    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    /// Bound on texture units that have nothing bound.
    blank: GpuTexture,

    next_id: u32,
    textures: HashMap<TextureId, GpuTexture>,
    framebuffers: HashMap<FramebufferId, GpuFramebuffer>,
    renderbuffers: HashMap<RenderbufferId, GpuTexture>,
    programs: HashMap<ProgramId, GpuProgram>,
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

    memory_budget: Option<u64>,
    memory_used: u64,
}

impl WgpuDevice {
    /// Wraps a device/queue pair the host already owns.
    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue, memory_budget: Option<u64>) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            log::warn!("wgpu device lost ({reason:?}): {message}");
            flag.store(true, Ordering::SeqCst);
        });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("vellum bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(1),
                texture_entry(2),
                texture_entry(3),
                texture_entry(4),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("vellum pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });
        let blank = GpuTexture::color(&device, 1, 1);

        Self {
            device,
            queue,
            lost,
            bind_group_layout,
            pipeline_layout,
            blank,
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
            memory_budget,
            memory_used: 0,
        }
    }

    #[inline]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[inline]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Creates the framebuffer a screen image wraps. Its texture is not
    /// charged to the memory budget; the host presents it through
    /// [`WgpuDevice::framebuffer_texture`].
    pub fn create_screen(&mut self, width: u32, height: u32) -> FramebufferId {
        let texture = TextureId(self.alloc_id());
        let mut color = GpuTexture::color(&self.device, width.max(1), height.max(1));
        color.bytes = 0;
        self.textures.insert(texture, color);
        let fb = FramebufferId(self.alloc_id());
        self.framebuffers.insert(fb, GpuFramebuffer { texture, stencil: None });
        self.screens.insert(fb);
        fb
    }

    /// Color texture behind `framebuffer`.
    pub fn framebuffer_texture(&self, framebuffer: FramebufferId) -> Option<&wgpu::Texture> {
        let fb = self.framebuffers.get(&framebuffer)?;
        self.textures.get(&fb.texture).map(|t| &t.texture)
    }

    #[inline]
    pub fn memory_used(&self) -> u64 {
        self.memory_used
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_lost(&self) -> Result<(), DeviceError> {
        if self.lost.load(Ordering::SeqCst) {
            Err(DeviceError::ContextLost)
        } else {
            Ok(())
        }
    }

    fn charge(&mut self, bytes: u64, what: &'static str) -> Result<(), DeviceError> {
        let used = self.memory_used + bytes;
        if self.memory_budget.is_some_and(|budget| used > budget) {
            log::debug!("wgpu: {what} of {bytes} bytes exceeds budget");
            return Err(DeviceError::OutOfMemory(what));
        }
        self.memory_used = used;
        Ok(())
    }

    fn check_size(&self, width: u32, height: u32) -> Result<(), DeviceError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(DeviceError::Backend(format!(
                "invalid surface size {width}x{height} (max {max})"
            )));
        }
        Ok(())
    }

    fn bound_framebuffer(&self) -> Result<&GpuFramebuffer, DeviceError> {
        self.framebuffer
            .and_then(|id| self.framebuffers.get(&id))
            .ok_or(DeviceError::InvalidHandle("framebuffer"))
    }

    fn bound_color(&self) -> Result<&GpuTexture, DeviceError> {
        let fb = self.bound_framebuffer()?;
        self.textures
            .get(&fb.texture)
            .ok_or(DeviceError::InvalidHandle("texture"))
    }

    fn active_texture_id(&self) -> Result<TextureId, DeviceError> {
        self.units[self.active_unit]
            .filter(|id| self.textures.contains_key(id))
            .ok_or(DeviceError::InvalidHandle("texture"))
    }

    fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }
}

/// Copies a rectangle of `texture` into `out`, dropping row padding.
#[allow(clippy::too_many_arguments)]
fn readback(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &GpuTexture,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    out: &mut [u8],
) -> Result<(), DeviceError> {
    if width == 0 || height == 0 {
        return Ok(());
    }

    // Rows must be aligned to COPY_BYTES_PER_ROW_ALIGNMENT (256 bytes).
    let row = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded = row.div_ceil(align) * align;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("vellum readback"),
        size: u64::from(padded) * u64::from(height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("vellum readback encoder"),
    });
    encoder.copy_texture_to_buffer(
        texture.copy_info(x, y),
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        extent(width, height),
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| DeviceError::Backend(format!("poll failed: {e}")))?;
    rx.recv()
        .map_err(|_| DeviceError::Backend("readback callback dropped".into()))?
        .map_err(|e| DeviceError::Backend(format!("readback map failed: {e}")))?;

    {
        let mapped = slice.get_mapped_range();
        let row = row as usize;
        for (dst, src) in out.chunks_exact_mut(row).zip(mapped.chunks(padded as usize)) {
            dst.copy_from_slice(&src[..row]);
        }
    }
    staging.unmap();
    Ok(())
}

impl Device for WgpuDevice {
    fn max_texture_size(&mut self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn float_precision_bits(&mut self) -> u32 {
        // WGSL f32 is IEEE single precision on every backend.
        23
    }

    fn is_context_lost(&mut self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    // ── textures ──────────────────────────────────────────────────────────

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId, DeviceError> {
        self.check_lost()?;
        self.check_size(width, height)?;

        let texture = GpuTexture::color(&self.device, width, height);
        self.charge(texture.bytes, "texture")?;
        let id = TextureId(self.alloc_id());
        self.textures.insert(id, texture);
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(t) = self.textures.remove(&texture) {
            self.memory_used = self.memory_used.saturating_sub(t.bytes);
            t.texture.destroy();
        }
        for unit in &mut self.units {
            if *unit == Some(texture) {
                *unit = None;
            }
        }
    }

    fn active_texture(&mut self, unit: usize) {
        if unit < TEXTURE_UNITS {
            self.active_unit = unit;
        }
    }

    fn bind_texture(&mut self, texture: TextureId) {
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
        self.check_lost()?;

        let id = self.active_texture_id()?;
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(DeviceError::Backend(format!(
                "upload of {} bytes, expected {expected}",
                pixels.len()
            )));
        }
        let texture = self
            .textures
            .get(&id)
            .ok_or(DeviceError::InvalidHandle("texture"))?;
        if !texture.contains(x, y, width, height) {
            return Err(DeviceError::Backend("upload outside texture".into()));
        }
        if expected == 0 {
            return Ok(());
        }

        self.queue.write_texture(
            texture.copy_info(x, y),
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            extent(width, height),
        );
        Ok(())
    }

    // ── framebuffers ──────────────────────────────────────────────────────

    fn create_framebuffer(&mut self, texture: TextureId) -> Result<FramebufferId, DeviceError> {
        self.check_lost()?;
        if !self.textures.contains_key(&texture) {
            return Err(DeviceError::InvalidHandle("texture"));
        }
        let id = FramebufferId(self.alloc_id());
        self.framebuffers.insert(id, GpuFramebuffer { texture, stencil: None });
        Ok(id)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.screens.contains(&framebuffer) {
            return;
        }
        self.framebuffers.remove(&framebuffer);
        if self.framebuffer == Some(framebuffer) {
            self.framebuffer = None;
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.framebuffer = Some(framebuffer);
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    fn set_scissor(&mut self, region: Option<Region>) {
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
        self.check_lost()?;

        let texture = self.bound_color()?;
        if !texture.contains(x, y, width, height) {
            return Err(DeviceError::Backend("read outside framebuffer".into()));
        }
        if out.len() < width as usize * height as usize * 4 {
            return Err(DeviceError::Backend("read buffer too small".into()));
        }
        readback(&self.device, &self.queue, texture, x, y, width, height, out)
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
        self.check_lost()?;

        let src_id = self.bound_framebuffer()?.texture;
        let dst_id = self.active_texture_id()?;
        if src_id == dst_id {
            return Err(DeviceError::Backend("copy source is the destination".into()));
        }
        let src = self
            .textures
            .get(&src_id)
            .ok_or(DeviceError::InvalidHandle("texture"))?;
        let dst = self
            .textures
            .get(&dst_id)
            .ok_or(DeviceError::InvalidHandle("texture"))?;
        if !src.contains(src_x, src_y, width, height) {
            return Err(DeviceError::Backend("copy source outside framebuffer".into()));
        }
        if !dst.contains(dst_x, dst_y, width, height) {
            return Err(DeviceError::Backend("copy destination outside texture".into()));
        }

        let mut encoder = self.encoder("vellum copy encoder");
        encoder.copy_texture_to_texture(
            src.copy_info(src_x, src_y),
            dst.copy_info(dst_x, dst_y),
            extent(width, height),
        );
        self.submit(encoder);
        Ok(())
    }

    // ── renderbuffers (stencil) ───────────────────────────────────────────

    fn create_renderbuffer(&mut self, width: u32, height: u32) -> Result<RenderbufferId, DeviceError> {
        self.check_lost()?;
        self.check_size(width, height)?;

        let stencil = GpuTexture::stencil(&self.device, width, height);
        self.charge(stencil.bytes, "renderbuffer")?;
        let id = RenderbufferId(self.alloc_id());
        self.renderbuffers.insert(id, stencil);
        Ok(id)
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        if let Some(rb) = self.renderbuffers.remove(&renderbuffer) {
            self.memory_used = self.memory_used.saturating_sub(rb.bytes);
            rb.texture.destroy();
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
        self.renderbuffer = Some(renderbuffer);
    }

    fn attach_stencil(&mut self) -> Result<(), DeviceError> {
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
        if self.check_lost().is_err() {
            return;
        }
        let Some(stencil) = self
            .bound_framebuffer()
            .ok()
            .and_then(|fb| fb.stencil)
            .and_then(|id| self.renderbuffers.get(&id))
        else {
            return;
        };

        let mut encoder = self.encoder("vellum stencil clear encoder");
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("vellum stencil clear"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &stencil.view,
                    depth_ops: None,
                    stencil_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(0),
                        store: wgpu::StoreOp::Store,
                    }),
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }
        self.submit(encoder);
    }

    fn set_stencil_mode(&mut self, mode: StencilMode) {
        self.stencil_mode = mode;
    }

    // ── programs ──────────────────────────────────────────────────────────

    fn create_program(&mut self, ir: &ShaderIr) -> Result<ProgramId, DeviceError> {
        self.check_lost()?;
        let program = GpuProgram::new(&self.device, ir);
        let id = ProgramId(self.alloc_id());
        self.programs.insert(id, program);
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        if self.program == Some(program) {
            self.program = None;
        }
    }

    fn use_program(&mut self, program: ProgramId) {
        self.program = Some(program);
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.programs.get(&program)?.location(name)
    }

    fn set_uniform(&mut self, location: UniformLocation, value: &[f32]) {
        if let Some(p) = self.program.and_then(|id| self.programs.get_mut(&id)) {
            p.set(location, value);
        }
    }

    // ── drawing ───────────────────────────────────────────────────────────

    fn set_blend(&mut self, mode: CompositeMode) {
        self.blend = mode;
    }

    fn draw_elements(&mut self, vertices: &[Vertex], indices: &[u16]) -> Result<(), DeviceError> {
        self.check_lost()?;
        if indices.is_empty() {
            return Ok(());
        }
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(DeviceError::Backend(format!(
                "index {bad} out of range for {} vertices",
                vertices.len()
            )));
        }

        let fb = self
            .framebuffer
            .and_then(|id| self.framebuffers.get(&id))
            .ok_or(DeviceError::InvalidHandle("framebuffer"))?;
        let target_id = fb.texture;
        let target = self
            .textures
            .get(&target_id)
            .ok_or(DeviceError::InvalidHandle("texture"))?;
        let stencil = fb.stencil.and_then(|id| self.renderbuffers.get(&id));

        let vw = self.viewport.0.min(target.width);
        let vh = self.viewport.1.min(target.height);
        if vw == 0 || vh == 0 {
            return Ok(());
        }
        let (mut x0, mut y0, mut x1, mut y1) = (0, 0, vw as i32, vh as i32);
        if let Some(scissor) = self.scissor {
            let (sx0, sy0, sx1, sy1) = scissor.pixel_bounds();
            (x0, y0, x1, y1) = (x0.max(sx0), y0.max(sy0), x1.min(sx1), y1.min(sy1));
        }
        if x0 >= x1 || y0 >= y1 {
            return Ok(());
        }

        let key = PipelineKey {
            composite: self.blend,
            stencil: self.stencil_mode,
            has_stencil: stencil.is_some(),
        };
        let program_id = self.program.ok_or(DeviceError::InvalidHandle("program"))?;
        self.programs
            .get_mut(&program_id)
            .ok_or(DeviceError::InvalidHandle("program"))?
            .ensure_pipeline(&self.device, &self.pipeline_layout, key);
        let program = self
            .programs
            .get(&program_id)
            .ok_or(DeviceError::InvalidHandle("program"))?;
        let pipeline = program
            .pipeline(key)
            .ok_or(DeviceError::Backend("pipeline missing after build".into()))?;

        let uniforms = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("vellum uniforms"),
            contents: bytemuck::cast_slice(program.values()),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("vellum vertices"),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("vellum indices"),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        // A texture cannot be sampled while it is the render target.
        let views: [&wgpu::TextureView; TEXTURE_UNITS] = std::array::from_fn(|i| {
            self.units[i]
                .filter(|&t| t != target_id)
                .and_then(|t| self.textures.get(&t))
                .map_or(&self.blank.view, |t| &t.view)
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("vellum draw bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(views[0]),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(views[1]),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(views[2]),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(views[3]),
                },
            ],
        });

        let mut encoder = self.encoder("vellum draw encoder");
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("vellum draw pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: stencil.map(|s| wgpu::RenderPassDepthStencilAttachment {
                    view: &s.view,
                    depth_ops: None,
                    stencil_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint16);
            pass.set_viewport(0.0, 0.0, vw as f32, vh as f32, 0.0, 1.0);
            pass.set_scissor_rect(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32);
            pass.set_stencil_reference(0);
            pass.draw_indexed(0..indices.len() as u32, 0, 0..1);
        }
        self.submit(encoder);
        Ok(())
    }
}
