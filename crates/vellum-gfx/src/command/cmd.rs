use smallvec::SmallVec;

use crate::coords::{Region, Vertex};
use crate::device::TEXTURE_UNITS;
use crate::image::ImageId;
use crate::paint::{Address, ColorMatrix, CompositeMode, Filter};
use crate::shader::ShaderId;

/// Number of source images one draw may sample.
pub const SOURCE_SLOTS: usize = TEXTURE_UNITS;

/// Source images of a draw; a vertex picks one by index.
pub type Sources = SmallVec<[ImageId; SOURCE_SLOTS]>;

/// Indexed triangles drawn into `destination`.
///
/// Built with [`DrawTriangles::new`] plus the `with_*` setters; every other
/// field defaults to a plain SourceOver draw with the built-in shader.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawTriangles {
    pub destination: ImageId,
    pub sources: Sources,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u16>,
    pub color_matrix: ColorMatrix,
    pub composite: CompositeMode,
    pub filter: Filter,
    pub address: Address,
    /// Scissor in destination pixels. Empty = whole destination.
    pub dst_region: Region,
    /// Region of the source that `address` clips against, in texels.
    /// Empty = whole source.
    pub clip_region: Region,
    /// `None` = built-in textured shader.
    pub shader: Option<ShaderId>,
    /// Values of the shader's user uniforms, in declaration order.
    pub uniforms: Vec<Vec<f32>>,
    /// Fill with the even-odd rule via the stencil buffer.
    pub even_odd: bool,
    /// Flip rows when projecting, for the screen framebuffer.
    pub invert_y: bool,
}

impl DrawTriangles {
    pub fn new(
        destination: ImageId,
        sources: impl IntoIterator<Item = ImageId>,
        vertices: impl Into<Vec<Vertex>>,
        indices: impl Into<Vec<u16>>,
    ) -> Self {
        Self {
            destination,
            sources: sources.into_iter().collect(),
            vertices: vertices.into(),
            indices: indices.into(),
            color_matrix: ColorMatrix::IDENTITY,
            composite: CompositeMode::default(),
            filter: Filter::default(),
            address: Address::default(),
            dst_region: Region::default(),
            clip_region: Region::default(),
            shader: None,
            uniforms: Vec::new(),
            even_odd: false,
            invert_y: false,
        }
    }

    pub fn with_color_matrix(mut self, m: ColorMatrix) -> Self {
        self.color_matrix = m;
        self
    }

    pub fn with_composite(mut self, mode: CompositeMode) -> Self {
        self.composite = mode;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = address;
        self
    }

    pub fn with_dst_region(mut self, region: Region) -> Self {
        self.dst_region = region;
        self
    }

    pub fn with_clip_region(mut self, region: Region) -> Self {
        self.clip_region = region;
        self
    }

    pub fn with_shader(mut self, shader: ShaderId, uniforms: Vec<Vec<f32>>) -> Self {
        self.shader = Some(shader);
        self.uniforms = uniforms;
        self
    }

    pub fn with_even_odd(mut self, even_odd: bool) -> Self {
        self.even_odd = even_odd;
        self
    }

    pub fn with_invert_y(mut self, invert_y: bool) -> Self {
        self.invert_y = invert_y;
        self
    }

    /// No triangles to draw.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// One buffered operation.
///
/// Read-back is not a variant: reading drains the queue first and then
/// reads synchronously, see [`Graphics::read_pixels`](crate::core::Graphics::read_pixels).
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    DrawTriangles(DrawTriangles),
    ReplacePixels {
        destination: ImageId,
        pixels: Vec<u8>,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    /// Copies all of `source` into the top-left of a destination at least as large.
    CopyPixels {
        source: ImageId,
        destination: ImageId,
    },
    Dispose {
        image: ImageId,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::DrawTriangles(_) => "draw-triangles",
            Command::ReplacePixels { .. } => "replace-pixels",
            Command::CopyPixels { .. } => "copy-pixels",
            Command::Dispose { .. } => "dispose",
        }
    }
}
