//! GPU-backed images and their lazy residency.
//!
//! An image starts `Unallocated`. Its texture is created on the first pixel
//! upload or draw that needs it; its framebuffer only once it is drawn into
//! or read back. Disposal is terminal.

mod gpu_image;

pub use gpu_image::{GpuImage, ImageId, Residency};
