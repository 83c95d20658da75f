//! How source pixels turn into destination pixels.
//!
//! Scope:
//! - composite (blend) modes over premultiplied alpha
//! - the color matrix applied to sampled colors
//! - filter and address modes for sampling

mod color_matrix;
mod composite;
mod sampling;

pub use color_matrix::ColorMatrix;
pub use composite::{BlendFactor, CompositeMode};
pub use sampling::{Address, Filter};
