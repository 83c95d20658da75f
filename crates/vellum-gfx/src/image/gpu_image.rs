use slotmap::new_key_type;

use crate::device::{Device, FramebufferId, RenderbufferId, TextureId};
use crate::error::{Error, Result};
use crate::state::{Framebuffer, StateCache};

new_key_type! {
    /// Handle to an image owned by [`Graphics`](crate::core::Graphics).
    pub struct ImageId;
}

/// Where an image's pixels live.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Residency {
    /// Nothing allocated yet. Reads back as zeros.
    Unallocated,
    Allocated {
        texture: TextureId,
        framebuffer: Option<FramebufferId>,
        stencil: Option<RenderbufferId>,
    },
    /// The platform's framebuffer. There is no texture to sample from.
    Screen {
        framebuffer: FramebufferId,
        stencil: Option<RenderbufferId>,
    },
    Disposed,
}

#[derive(Debug)]
pub struct GpuImage {
    width: u32,
    height: u32,
    residency: Residency,
    pending_dispose: bool,
}

impl GpuImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            residency: Residency::Unallocated,
            pending_dispose: false,
        }
    }

    /// Wraps the externally owned screen framebuffer.
    pub fn screen(framebuffer: FramebufferId, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            residency: Residency::Screen {
                framebuffer,
                stencil: None,
            },
            pending_dispose: false,
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn residency(&self) -> Residency {
        self.residency
    }

    #[inline]
    pub fn is_screen(&self) -> bool {
        matches!(self.residency, Residency::Screen { .. })
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.residency == Residency::Disposed
    }

    /// Disposed, or disposal already enqueued.
    #[inline]
    pub fn is_dead(&self) -> bool {
        self.pending_dispose || self.is_disposed()
    }

    pub(crate) fn mark_pending_dispose(&mut self) {
        self.pending_dispose = true;
    }

    pub fn texture(&self) -> Option<TextureId> {
        match self.residency {
            Residency::Allocated { texture, .. } => Some(texture),
            _ => None,
        }
    }

    fn framebuffer_of(&self, id: FramebufferId) -> Framebuffer {
        Framebuffer {
            id,
            width: self.width,
            height: self.height,
        }
    }

    // ── allocation ────────────────────────────────────────────────────────

    pub fn ensure_texture<D: Device>(&mut self, cache: &mut StateCache<D>) -> Result<TextureId> {
        match self.residency {
            Residency::Allocated { texture, .. } => Ok(texture),
            Residency::Screen { .. } => Err(Error::ScreenAsSource),
            Residency::Disposed => Err(Error::Disposed),
            Residency::Unallocated => {
                let texture = cache.create_texture(self.width, self.height)?;
                log::trace!("allocated {}x{} texture {texture:?}", self.width, self.height);
                self.residency = Residency::Allocated {
                    texture,
                    framebuffer: None,
                    stencil: None,
                };
                Ok(texture)
            }
        }
    }

    /// Allocates the framebuffer on first use. Idempotent.
    pub fn ensure_framebuffer<D: Device>(
        &mut self,
        cache: &mut StateCache<D>,
    ) -> Result<Framebuffer> {
        match self.residency {
            Residency::Screen { framebuffer, .. } => return Ok(self.framebuffer_of(framebuffer)),
            Residency::Allocated {
                framebuffer: Some(fb),
                ..
            } => return Ok(self.framebuffer_of(fb)),
            Residency::Disposed => return Err(Error::Disposed),
            _ => {}
        }

        let texture = self.ensure_texture(cache)?;
        let fb = cache.create_framebuffer(texture)?;
        log::trace!("allocated framebuffer {fb:?} for texture {texture:?}");
        if let Residency::Allocated { framebuffer, .. } = &mut self.residency {
            *framebuffer = Some(fb);
        }
        Ok(self.framebuffer_of(fb))
    }

    /// Allocates a stencil buffer and attaches it to the framebuffer.
    pub fn ensure_stencil<D: Device>(
        &mut self,
        cache: &mut StateCache<D>,
    ) -> Result<(Framebuffer, RenderbufferId)> {
        let fb = self.ensure_framebuffer(cache)?;
        let existing = match self.residency {
            Residency::Allocated { stencil, .. } | Residency::Screen { stencil, .. } => stencil,
            _ => None,
        };
        if let Some(rb) = existing {
            return Ok((fb, rb));
        }

        let rb = cache.create_renderbuffer(self.width, self.height)?;
        cache.attach_stencil(fb.id, rb)?;
        log::trace!("attached stencil {rb:?} to framebuffer {:?}", fb.id);
        match &mut self.residency {
            Residency::Allocated { stencil, .. } | Residency::Screen { stencil, .. } => {
                *stencil = Some(rb);
            }
            _ => {}
        }
        Ok((fb, rb))
    }

    // ── pixels ────────────────────────────────────────────────────────────

    /// Checks that `(x, y, width, height)` lies inside the image.
    pub fn check_bounds(&self, x: u32, y: u32, width: u32, height: u32) -> Result<()> {
        let fits = x.checked_add(width).is_some_and(|r| r <= self.width)
            && y.checked_add(height).is_some_and(|b| b <= self.height);
        if fits {
            Ok(())
        } else {
            Err(Error::OutOfBounds {
                x,
                y,
                width,
                height,
                image_width: self.width,
                image_height: self.height,
            })
        }
    }

    pub fn replace_pixels<D: Device>(
        &mut self,
        cache: &mut StateCache<D>,
        pixels: &[u8],
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        if self.is_screen() {
            return Err(Error::ScreenPixels);
        }
        self.check_bounds(x, y, width, height)?;
        check_buffer(pixels.len(), width, height)?;
        if width == 0 || height == 0 {
            return Ok(());
        }

        let texture = self.ensure_texture(cache)?;
        cache.tex_sub_image(texture, x, y, width, height, pixels)?;
        Ok(())
    }

    /// Reads the whole image, row-major RGBA8.
    pub fn read_pixels<D: Device>(&mut self, cache: &mut StateCache<D>, out: &mut [u8]) -> Result<()> {
        check_buffer(out.len(), self.width, self.height)?;
        match self.residency {
            Residency::Disposed => Err(Error::Disposed),
            Residency::Unallocated => {
                out.fill(0);
                Ok(())
            }
            _ => {
                let fb = self.ensure_framebuffer(cache)?;
                cache.read_pixels(fb.id, 0, 0, self.width, self.height, out)?;
                Ok(())
            }
        }
    }

    /// Copies all of `source` into this image's top-left corner.
    pub fn copy_from<D: Device>(
        &mut self,
        cache: &mut StateCache<D>,
        source: Framebuffer,
    ) -> Result<()> {
        if self.is_screen() {
            return Err(Error::ScreenPixels);
        }
        if source.width > self.width || source.height > self.height {
            return Err(Error::IncompatibleCopy {
                source_size: (source.width, source.height),
                destination_size: self.size(),
            });
        }
        let texture = self.ensure_texture(cache)?;
        cache.copy_framebuffer_to_texture(source.id, texture, source.width, source.height)?;
        Ok(())
    }

    // ── teardown ──────────────────────────────────────────────────────────

    /// Deletes every owned GPU object. The screen framebuffer is not ours.
    pub fn release<D: Device>(&mut self, cache: &mut StateCache<D>) {
        match self.residency {
            Residency::Allocated {
                texture,
                framebuffer,
                stencil,
            } => {
                if let Some(rb) = stencil {
                    cache.delete_renderbuffer(rb);
                }
                if let Some(fb) = framebuffer {
                    cache.delete_framebuffer(fb);
                }
                cache.delete_texture(texture);
            }
            Residency::Screen { stencil: Some(rb), .. } => cache.delete_renderbuffer(rb),
            _ => {}
        }
        self.residency = Residency::Disposed;
    }

    /// Forgets GPU objects that a context loss destroyed.
    pub fn invalidate(&mut self) {
        match self.residency {
            Residency::Allocated { .. } => self.residency = Residency::Unallocated,
            Residency::Screen { ref mut stencil, .. } => *stencil = None,
            _ => {}
        }
    }
}

fn check_buffer(actual: usize, width: u32, height: u32) -> Result<()> {
    let expected = width as usize * height as usize * 4;
    if actual == expected {
        Ok(())
    } else {
        Err(Error::BufferSize { expected, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::soft::{Call, SoftDevice};

    fn cache() -> StateCache<SoftDevice> {
        StateCache::new(SoftDevice::new())
    }

    #[test]
    fn unallocated_reads_zero_without_device() {
        let mut c = cache();
        let mut img = GpuImage::new(2, 2);
        let mut out = vec![7u8; 16];
        img.read_pixels(&mut c, &mut out).unwrap();
        assert_eq!(out, vec![0; 16]);
        assert!(c.device().calls().is_empty());
    }

    #[test]
    fn replace_then_read_round_trips() {
        let mut c = cache();
        let mut img = GpuImage::new(3, 2);
        let data: Vec<u8> = (0..8).collect();
        assert_eq!(img.texture(), None);
        img.replace_pixels(&mut c, &data, 1, 1, 2, 1).unwrap();
        assert!(img.texture().is_some());

        let mut out = vec![0; 24];
        img.read_pixels(&mut c, &mut out).unwrap();
        assert_eq!(&out[16..24], &data[..]);
        assert!(out[..16].iter().all(|&b| b == 0));
    }

    #[test]
    fn framebuffer_is_allocated_once() {
        let mut c = cache();
        let mut img = GpuImage::new(4, 4);
        let a = img.ensure_framebuffer(&mut c).unwrap();
        let b = img.ensure_framebuffer(&mut c).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            c.device().calls().count(|c| matches!(c, Call::CreateFramebuffer(_))),
            1
        );
    }

    #[test]
    fn replace_outside_bounds_fails() {
        let mut c = cache();
        let mut img = GpuImage::new(2, 2);
        let err = img.replace_pixels(&mut c, &[0; 16], 1, 0, 2, 2).unwrap_err();
        assert!(matches!(err, Error::OutOfBounds { .. }));
        assert_eq!(img.residency(), Residency::Unallocated);
    }

    #[test]
    fn wrong_buffer_size_fails() {
        let mut c = cache();
        let mut img = GpuImage::new(2, 2);
        let err = img.replace_pixels(&mut c, &[0; 15], 0, 0, 2, 2).unwrap_err();
        assert_eq!(err, Error::BufferSize { expected: 16, actual: 15 });
    }

    #[test]
    fn release_deletes_everything_and_is_terminal() {
        let mut c = cache();
        let mut img = GpuImage::new(2, 2);
        img.ensure_stencil(&mut c).unwrap();
        img.release(&mut c);

        assert!(img.is_disposed());
        assert_eq!(c.device().live_textures(), 0);
        assert_eq!(c.device().live_framebuffers(), 0);
        assert_eq!(c.device().live_renderbuffers(), 0);
        assert_eq!(img.ensure_texture(&mut c), Err(Error::Disposed));
    }

    #[test]
    fn screen_has_no_texture() {
        let mut c = cache();
        let fb = c.device_mut().create_screen(4, 4);
        let mut img = GpuImage::screen(fb, 4, 4);
        assert_eq!(img.ensure_texture(&mut c), Err(Error::ScreenAsSource));
        assert_eq!(img.ensure_framebuffer(&mut c).unwrap().id, fb);
    }

    #[test]
    fn copy_requires_fitting_source() {
        let mut c = cache();
        let mut src = GpuImage::new(4, 4);
        let mut dst = GpuImage::new(2, 2);
        let fb = src.ensure_framebuffer(&mut c).unwrap();
        let err = dst.copy_from(&mut c, fb).unwrap_err();
        assert!(matches!(err, Error::IncompatibleCopy { .. }));
    }

    #[test]
    fn copy_moves_pixels() {
        let mut c = cache();
        let mut src = GpuImage::new(2, 1);
        src.replace_pixels(&mut c, &[1, 2, 3, 4, 5, 6, 7, 8], 0, 0, 2, 1).unwrap();
        let fb = src.ensure_framebuffer(&mut c).unwrap();

        let mut dst = GpuImage::new(3, 1);
        dst.copy_from(&mut c, fb).unwrap();
        let mut out = vec![0; 12];
        dst.read_pixels(&mut c, &mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8, 0, 0, 0, 0]);
    }

    #[test]
    fn invalidate_returns_to_unallocated() {
        let mut c = cache();
        let mut img = GpuImage::new(1, 1);
        img.ensure_framebuffer(&mut c).unwrap();
        img.invalidate();
        assert_eq!(img.residency(), Residency::Unallocated);
    }
}
