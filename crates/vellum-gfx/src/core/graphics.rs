use slotmap::SlotMap;

use crate::command::exec::Replay;
use crate::command::{
    Command, CommandQueue, DrawTriangles, FlushStats, QueueConfig, SOURCE_SLOTS,
};
use crate::device::{Device, FramebufferId};
use crate::error::{Error, ErrorKind, Result};
use crate::image::{GpuImage, ImageId};
use crate::shader::{ShaderId, ShaderIr, ShaderProgram, UniformDecl};
use crate::state::StateCache;

/// The graphics command layer.
///
/// Every mutating call validates its arguments immediately and buffers the
/// work; nothing reaches the device until [`Graphics::flush`] or
/// [`Graphics::read_pixels`]. After a failed flush every enqueue returns
/// [`Error::Poisoned`] until [`Graphics::reset`].
pub struct Graphics<D: Device> {
    cache: StateCache<D>,
    queue: CommandQueue,
    images: SlotMap<ImageId, GpuImage>,
    shaders: SlotMap<ShaderId, ShaderProgram>,
    default_shader: ShaderProgram,
    screen: Option<ImageId>,
    /// A context loss was observed since the last reset.
    context_lost: bool,
}

impl<D: Device> Graphics<D> {
    pub fn new(device: D) -> Self {
        Self::with_config(device, QueueConfig::default())
    }

    pub fn with_config(device: D, config: QueueConfig) -> Self {
        Self {
            cache: StateCache::new(device),
            queue: CommandQueue::new(config),
            images: SlotMap::with_key(),
            shaders: SlotMap::with_key(),
            default_shader: ShaderProgram::new(ShaderIr::textured()),
            screen: None,
            context_lost: false,
        }
    }

    #[inline]
    pub fn device(&self) -> &D {
        self.cache.device()
    }

    /// Direct device access. Bindings changed here are unknown to the
    /// state cache until [`Graphics::reset`].
    #[inline]
    pub fn device_mut(&mut self) -> &mut D {
        self.cache.device_mut()
    }

    #[inline]
    pub fn config(&self) -> QueueConfig {
        self.queue.config()
    }

    // ── capabilities ──────────────────────────────────────────────────────

    pub fn max_texture_size(&mut self) -> u32 {
        self.cache.max_texture_size()
    }

    pub fn has_high_precision_float(&mut self) -> bool {
        self.cache.has_high_precision_float()
    }

    pub fn is_context_lost(&mut self) -> bool {
        let lost = self.cache.is_context_lost();
        self.context_lost |= lost;
        lost
    }

    fn observe(&mut self, err: Error) -> Error {
        if err.kind() == ErrorKind::ContextLost {
            self.context_lost = true;
        }
        err
    }

    // ── images and shaders ────────────────────────────────────────────────

    /// Registers a `width × height` image. No GPU memory is allocated yet.
    pub fn new_image(&mut self, width: u32, height: u32) -> Result<ImageId> {
        if width == 0 || height == 0 {
            return Err(Error::EmptyImage { width, height });
        }
        let max = self.cache.max_texture_size();
        if width > max || height > max {
            return Err(Error::TooLarge { width, height, max });
        }
        let id = self.images.insert(GpuImage::new(width, height));
        log::trace!("new image {id:?} {width}x{height}");
        Ok(id)
    }

    /// Wraps the platform framebuffer. Only one screen image may exist.
    pub fn new_screen_image(
        &mut self,
        framebuffer: FramebufferId,
        width: u32,
        height: u32,
    ) -> Result<ImageId> {
        if self.screen.is_some() {
            return Err(Error::ScreenExists);
        }
        if width == 0 || height == 0 {
            return Err(Error::EmptyImage { width, height });
        }
        if !self.cache.set_screen_framebuffer(framebuffer) {
            return Err(Error::ScreenExists);
        }
        let id = self.images.insert(GpuImage::screen(framebuffer, width, height));
        self.screen = Some(id);
        log::debug!("screen image {id:?} {width}x{height} on {framebuffer:?}");
        Ok(id)
    }

    #[inline]
    pub fn screen_image(&self) -> Option<ImageId> {
        self.screen
    }

    pub fn new_shader(&mut self, ir: ShaderIr) -> ShaderId {
        self.shaders.insert(ShaderProgram::new(ir))
    }

    pub fn image(&self, id: ImageId) -> Option<&GpuImage> {
        self.images.get(id)
    }

    pub fn image_size(&self, id: ImageId) -> Result<(u32, u32)> {
        Ok(self.live_image(id)?.size())
    }

    fn live_image(&self, id: ImageId) -> Result<&GpuImage> {
        let img = self.images.get(id).ok_or(Error::UnknownImage)?;
        if img.is_dead() {
            return Err(Error::Disposed);
        }
        Ok(img)
    }

    // ── enqueueing ────────────────────────────────────────────────────────

    /// Validates `command` and buffers it.
    pub fn enqueue(&mut self, command: Command) -> Result<()> {
        if self.queue.is_poisoned() {
            return Err(Error::Poisoned);
        }
        match &command {
            Command::DrawTriangles(draw) => self.validate_draw(draw)?,
            Command::ReplacePixels {
                destination,
                pixels,
                x,
                y,
                width,
                height,
            } => {
                let img = self.live_image(*destination)?;
                if img.is_screen() {
                    return Err(Error::ScreenPixels);
                }
                img.check_bounds(*x, *y, *width, *height)?;
                let expected = *width as usize * *height as usize * 4;
                if pixels.len() != expected {
                    return Err(Error::BufferSize {
                        expected,
                        actual: pixels.len(),
                    });
                }
            }
            Command::CopyPixels {
                source,
                destination,
            } => {
                if source == destination {
                    return Err(Error::SourceIsDestination);
                }
                let src = self.live_image(*source)?;
                let dst = self.live_image(*destination)?;
                if dst.is_screen() {
                    return Err(Error::ScreenPixels);
                }
                if src.width() > dst.width() || src.height() > dst.height() {
                    return Err(Error::IncompatibleCopy {
                        source_size: src.size(),
                        destination_size: dst.size(),
                    });
                }
            }
            Command::Dispose { image } => {
                self.live_image(*image)?;
            }
        }

        let dispose = match command {
            Command::Dispose { image } => Some(image),
            _ => None,
        };
        self.queue.enqueue(command)?;
        if let Some(img) = dispose.and_then(|id| self.images.get_mut(id)) {
            img.mark_pending_dispose();
        }
        Ok(())
    }

    fn validate_draw(&self, draw: &DrawTriangles) -> Result<()> {
        self.live_image(draw.destination)?;

        if draw.sources.len() > SOURCE_SLOTS {
            return Err(Error::TooManySources {
                count: draw.sources.len(),
                max: SOURCE_SLOTS,
            });
        }
        if draw.shader.is_none() && draw.sources.is_empty() {
            return Err(Error::NoSource);
        }
        for &id in &draw.sources {
            if id == draw.destination {
                return Err(Error::SourceIsDestination);
            }
            if self.live_image(id)?.is_screen() {
                return Err(Error::ScreenAsSource);
            }
        }

        let max = self.queue.config().max_vertices_per_draw.min(1 << 16);
        if draw.vertices.len() > max {
            return Err(Error::TooManyVertices {
                count: draw.vertices.len(),
                max,
            });
        }
        if draw.indices.len() % 3 != 0 {
            return Err(Error::PartialTriangle {
                indices: draw.indices.len(),
            });
        }
        if let Some(&index) = draw
            .indices
            .iter()
            .find(|&&i| i as usize >= draw.vertices.len())
        {
            return Err(Error::InvalidIndex {
                index,
                vertices: draw.vertices.len(),
            });
        }
        let slots = draw.sources.len().max(1);
        if let Some(v) = draw.vertices.iter().find(|v| v.source as usize >= slots) {
            return Err(Error::InvalidSlot {
                slot: v.source,
                sources: draw.sources.len(),
            });
        }

        let declared: &[UniformDecl] = match draw.shader {
            Some(id) => self.shaders.get(id).ok_or(Error::UnknownShader)?.ir().user_uniforms(),
            None => &[],
        };
        if declared.len() != draw.uniforms.len() {
            return Err(Error::UniformCount {
                expected: declared.len(),
                actual: draw.uniforms.len(),
            });
        }
        for (decl, value) in declared.iter().zip(&draw.uniforms) {
            if decl.len != value.len() {
                return Err(Error::UniformLength {
                    name: decl.name.to_string(),
                    expected: decl.len,
                    actual: value.len(),
                });
            }
        }
        Ok(())
    }

    pub fn draw_triangles(&mut self, draw: DrawTriangles) -> Result<()> {
        self.enqueue(Command::DrawTriangles(draw))
    }

    /// Replaces the `width × height` rectangle at `(x, y)` with `pixels`
    /// (row-major RGBA8, premultiplied).
    pub fn replace_pixels(
        &mut self,
        image: ImageId,
        pixels: &[u8],
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.enqueue(Command::ReplacePixels {
            destination: image,
            pixels: pixels.to_vec(),
            x,
            y,
            width,
            height,
        })
    }

    pub fn copy_pixels(&mut self, source: ImageId, destination: ImageId) -> Result<()> {
        self.enqueue(Command::CopyPixels {
            source,
            destination,
        })
    }

    /// Schedules the image's release. The handle is dead from now on.
    pub fn dispose(&mut self, image: ImageId) -> Result<()> {
        self.enqueue(Command::Dispose { image })
    }

    /// Commands waiting for the next flush.
    #[inline]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_poisoned(&self) -> bool {
        self.queue.is_poisoned()
    }

    // ── flushing ──────────────────────────────────────────────────────────

    /// Executes every buffered command in order.
    pub fn flush(&mut self) -> Result<FlushStats> {
        let mut replay = Replay {
            cache: &mut self.cache,
            images: &mut self.images,
            shaders: &mut self.shaders,
            default_shader: &mut self.default_shader,
        };
        let stats = self.queue.flush(&mut replay).map_err(|e| self.observe(e))?;
        if stats.commands > 0 {
            log::debug!(
                "flushed {} commands ({} draws, {} merged)",
                stats.commands,
                stats.draws,
                stats.merged
            );
        }
        Ok(stats)
    }

    /// Flushes, then reads the whole image into `out` (row-major RGBA8).
    pub fn read_pixels(&mut self, image: ImageId, out: &mut [u8]) -> Result<()> {
        let (width, height) = self.live_image(image)?.size();
        let expected = width as usize * height as usize * 4;
        if out.len() != expected {
            return Err(Error::BufferSize {
                expected,
                actual: out.len(),
            });
        }

        self.flush()?;
        let img = self.images.get_mut(image).ok_or(Error::UnknownImage)?;
        img.read_pixels(&mut self.cache, out)
            .map_err(|e| self.observe(e))
    }

    // ── recovery ──────────────────────────────────────────────────────────

    /// Clears a poisoned queue and finishes disposals it dropped.
    ///
    /// If the context was lost, every image forgets its GPU objects and
    /// becomes unallocated (contents are gone), and every program will be
    /// recompiled on next use.
    pub fn reset(&mut self) {
        self.queue.reset();
        self.cache.reset();

        let lost = self.is_context_lost() || self.context_lost;
        self.context_lost = false;
        if lost {
            log::warn!("context lost; dropping all GPU residency");
            for img in self.images.values_mut() {
                img.invalidate();
            }
            for shader in self.shaders.values_mut() {
                shader.invalidate();
            }
            self.default_shader.invalidate();
        }

        for img in self.images.values_mut() {
            if img.is_dead() && !img.is_disposed() {
                img.release(&mut self.cache);
            }
        }
    }
}
