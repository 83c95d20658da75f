use crate::coords::Region;
use crate::device::{FramebufferId, ProgramId, RenderbufferId, StencilMode, TextureId, UniformLocation};
use crate::paint::CompositeMode;

/// One call received by a [`SoftDevice`](super::SoftDevice).
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    MaxTextureSize,
    FloatPrecision,
    IsContextLost,
    CreateTexture { width: u32, height: u32 },
    DeleteTexture(TextureId),
    ActiveTexture(usize),
    BindTexture(TextureId),
    TexSubImage { x: u32, y: u32, width: u32, height: u32 },
    CreateFramebuffer(TextureId),
    DeleteFramebuffer(FramebufferId),
    BindFramebuffer(FramebufferId),
    Viewport { width: u32, height: u32 },
    Scissor(Option<Region>),
    ReadPixels,
    CopyTexSubImage,
    CreateRenderbuffer,
    DeleteRenderbuffer(RenderbufferId),
    BindRenderbuffer(RenderbufferId),
    AttachStencil,
    ClearStencil,
    StencilMode(StencilMode),
    CreateProgram,
    DeleteProgram(ProgramId),
    UseProgram(ProgramId),
    UniformLocation(String),
    SetUniform(UniformLocation),
    Blend(CompositeMode),
    DrawElements { indices: usize },
}

/// Ordered record of device calls, for tests and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Vec<Call>,
}

impl CallLog {
    #[inline]
    pub(super) fn push(&mut self, call: Call) {
        self.calls.push(call);
    }

    #[inline]
    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn viewports(&self) -> usize {
        self.count(|c| matches!(c, Call::Viewport { .. }))
    }

    pub fn draws(&self) -> usize {
        self.count(|c| matches!(c, Call::DrawElements { .. }))
    }
}
