//! Shader artifacts and their device programs.

mod ir;
mod program;

pub use ir::{builtin, Kernel, ShaderIr, UniformDecl, BUILTIN_UNIFORMS};
pub use program::{ShaderId, ShaderProgram};
