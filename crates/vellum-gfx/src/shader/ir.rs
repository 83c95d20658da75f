use std::borrow::Cow;

/// Names of the uniforms every program receives from the command layer.
pub mod builtin {
    /// `mat4`, column-major: destination pixels → normalized device coordinates.
    pub const PROJECTION: &str = "u_projection";
    /// `vec2`: destination width/height in pixels.
    pub const DESTINATION_SIZE: &str = "u_destination_size";
    /// `vec2` per source slot: source width/height in texels.
    pub const SOURCE_SIZES: &str = "u_source_sizes";
    /// `mat4`, column-major color matrix body.
    pub const COLOR_MATRIX_BODY: &str = "u_color_matrix_body";
    /// `vec4` color matrix translation.
    pub const COLOR_MATRIX_TRANSLATION: &str = "u_color_matrix_translation";
    /// `float`, 0 or 1: whether the color matrix is applied at all.
    pub const USE_COLOR_MATRIX: &str = "u_use_color_matrix";
    /// `vec4` (x, y, w, h) in source texels; zero size means the whole source.
    pub const SOURCE_REGION: &str = "u_source_region";
    /// `float`: [`Filter`](crate::paint::Filter) encoding.
    pub const FILTER: &str = "u_filter";
    /// `float`: [`Address`](crate::paint::Address) encoding.
    pub const ADDRESS: &str = "u_address";
}

/// Declared uniform: a name and its length in floats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformDecl {
    pub name: Cow<'static, str>,
    pub len: usize,
}

impl UniformDecl {
    pub fn new(name: impl Into<Cow<'static, str>>, len: usize) -> Self {
        Self { name: name.into(), len }
    }
}

const fn decl(name: &'static str, len: usize) -> UniformDecl {
    UniformDecl { name: Cow::Borrowed(name), len }
}

/// Uniforms declared by every program, in location order.
pub static BUILTIN_UNIFORMS: [UniformDecl; 9] = [
    decl(builtin::PROJECTION, 16),
    decl(builtin::DESTINATION_SIZE, 2),
    decl(builtin::SOURCE_SIZES, 2 * crate::device::TEXTURE_UNITS),
    decl(builtin::COLOR_MATRIX_BODY, 16),
    decl(builtin::COLOR_MATRIX_TRANSLATION, 4),
    decl(builtin::USE_COLOR_MATRIX, 1),
    decl(builtin::SOURCE_REGION, 4),
    decl(builtin::FILTER, 1),
    decl(builtin::ADDRESS, 1),
];

/// Fragment stage of a compiled shader.
///
/// The command layer never looks inside a kernel; devices lower it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kernel {
    /// Sample the vertex's source slot, apply the color matrix, scale by the
    /// vertex color.
    Textured,
    /// Emit the premultiplied `color` uniform.
    Fill,
    /// WGSL fragment function body (wgpu devices only). See
    /// `device::wgpu` for the bindings it can use.
    Wgsl(String),
}

/// Compiled shader artifact handed over by the shader front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderIr {
    kernel: Kernel,
    uniforms: Vec<UniformDecl>,
}

impl ShaderIr {
    /// Name of the uniform read by [`ShaderIr::fill`].
    pub const FILL_COLOR: &'static str = "color";

    /// Program used by draws that name no shader.
    pub fn textured() -> Self {
        Self {
            kernel: Kernel::Textured,
            uniforms: Vec::new(),
        }
    }

    /// Constant-color program; the draw supplies `color` (premultiplied RGBA).
    pub fn fill() -> Self {
        Self {
            kernel: Kernel::Fill,
            uniforms: vec![UniformDecl::new(Self::FILL_COLOR, 4)],
        }
    }

    /// Raw WGSL program with its extra uniforms, in the order draws supply them.
    pub fn wgsl(source: impl Into<String>, uniforms: Vec<UniformDecl>) -> Self {
        Self {
            kernel: Kernel::Wgsl(source.into()),
            uniforms,
        }
    }

    #[inline]
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Uniforms the draw supplies, in declaration order.
    #[inline]
    pub fn user_uniforms(&self) -> &[UniformDecl] {
        &self.uniforms
    }

    /// Built-in uniforms followed by user uniforms.
    pub fn declared_uniforms(&self) -> impl Iterator<Item = &UniformDecl> {
        BUILTIN_UNIFORMS.iter().chain(self.uniforms.iter())
    }
}
