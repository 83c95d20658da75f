use slotmap::SlotMap;
use smallvec::SmallVec;

use super::cmd::{Command, DrawTriangles, SOURCE_SLOTS};
use super::queue::Executor;
use crate::coords::projection;
use crate::device::{Device, StencilMode, TextureId};
use crate::error::{Error, Result};
use crate::image::{GpuImage, ImageId};
use crate::shader::{builtin, ShaderId, ShaderProgram};
use crate::state::StateCache;

/// Replays commands against a [`StateCache`].
///
/// Borrows everything a flush needs for its duration; images and shaders
/// are only touched through here while the queue drains.
pub(crate) struct Replay<'a, D: Device> {
    pub cache: &'a mut StateCache<D>,
    pub images: &'a mut SlotMap<ImageId, GpuImage>,
    pub shaders: &'a mut SlotMap<ShaderId, ShaderProgram>,
    pub default_shader: &'a mut ShaderProgram,
}

impl<D: Device> Replay<'_, D> {
    fn draw(&mut self, draw: DrawTriangles) -> Result<()> {
        let mut textures: SmallVec<[(TextureId, (u32, u32)); SOURCE_SLOTS]> = SmallVec::new();
        for &id in &draw.sources {
            let source = self.images.get_mut(id).ok_or(Error::UnknownImage)?;
            textures.push((source.ensure_texture(self.cache)?, source.size()));
        }

        let destination = self
            .images
            .get_mut(draw.destination)
            .ok_or(Error::UnknownImage)?;
        let fb = if draw.even_odd {
            destination.ensure_stencil(self.cache)?.0
        } else {
            destination.ensure_framebuffer(self.cache)?
        };
        self.cache.set_viewport(&fb);

        let shader = match draw.shader {
            Some(id) => self.shaders.get_mut(id).ok_or(Error::UnknownShader)?,
            None => &mut *self.default_shader,
        };
        let cache = &mut *self.cache;
        let program = shader.ensure_compiled(cache)?;
        cache.use_program(program);

        let mut source_sizes = [0.0; 2 * SOURCE_SLOTS];
        for (i, (_, (w, h))) in textures.iter().enumerate() {
            source_sizes[2 * i] = *w as f32;
            source_sizes[2 * i + 1] = *h as f32;
        }
        let clip = draw.clip_region;
        let use_matrix = if draw.color_matrix.is_identity() { 0.0 } else { 1.0 };
        let (w, h) = (fb.width as f32, fb.height as f32);

        shader.set_uniform(cache, builtin::PROJECTION, &projection(fb.width, fb.height, draw.invert_y))?;
        shader.set_uniform(cache, builtin::DESTINATION_SIZE, &[w, h])?;
        shader.set_uniform(cache, builtin::SOURCE_SIZES, &source_sizes)?;
        shader.set_uniform(cache, builtin::COLOR_MATRIX_BODY, &draw.color_matrix.body_columns())?;
        shader.set_uniform(cache, builtin::COLOR_MATRIX_TRANSLATION, &draw.color_matrix.translation)?;
        shader.set_uniform(cache, builtin::USE_COLOR_MATRIX, &[use_matrix])?;
        shader.set_uniform(cache, builtin::SOURCE_REGION, &[clip.x, clip.y, clip.width, clip.height])?;
        shader.set_uniform(cache, builtin::FILTER, &[draw.filter.as_uniform()])?;
        shader.set_uniform(cache, builtin::ADDRESS, &[draw.address.as_uniform()])?;

        for (i, value) in draw.uniforms.iter().enumerate() {
            let Some(decl) = shader.ir().user_uniforms().get(i) else {
                break;
            };
            let name = decl.name.clone();
            shader.set_uniform(cache, &name, value)?;
        }

        for (slot, (texture, _)) in textures.iter().enumerate() {
            cache.bind_texture(slot, *texture);
        }
        cache.set_composite(draw.composite);
        cache.set_scissor((!draw.dst_region.is_empty()).then_some(draw.dst_region));

        if draw.even_odd {
            cache.clear_stencil();
            cache.set_stencil_mode(StencilMode::Invert);
            cache.draw_elements(&draw.vertices, &draw.indices)?;
            cache.set_stencil_mode(StencilMode::NonZero);
            cache.draw_elements(&draw.vertices, &draw.indices)?;
        } else {
            cache.set_stencil_mode(StencilMode::Disabled);
            cache.draw_elements(&draw.vertices, &draw.indices)?;
        }
        Ok(())
    }

    fn copy(&mut self, source: ImageId, destination: ImageId) -> Result<()> {
        let fb = self
            .images
            .get_mut(source)
            .ok_or(Error::UnknownImage)?
            .ensure_framebuffer(self.cache)?;
        self.images
            .get_mut(destination)
            .ok_or(Error::UnknownImage)?
            .copy_from(self.cache, fb)
    }
}

impl<D: Device> Executor for Replay<'_, D> {
    fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::DrawTriangles(draw) => self.draw(draw),
            Command::ReplacePixels {
                destination,
                pixels,
                x,
                y,
                width,
                height,
            } => self
                .images
                .get_mut(destination)
                .ok_or(Error::UnknownImage)?
                .replace_pixels(self.cache, &pixels, x, y, width, height),
            Command::CopyPixels {
                source,
                destination,
            } => self.copy(source, destination),
            Command::Dispose { image } => {
                let img = self.images.get_mut(image).ok_or(Error::UnknownImage)?;
                if !img.is_disposed() {
                    img.release(self.cache);
                    log::trace!("disposed image {image:?}");
                }
                Ok(())
            }
        }
    }
}
