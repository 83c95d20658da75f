/// Failure reported by a [`Device`](super::Device).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// Allocation of a texture, framebuffer or renderbuffer failed.
    #[error("out of GPU memory while allocating {0}")]
    OutOfMemory(&'static str),

    /// The context is gone; every GPU resource must be recreated.
    #[error("graphics context lost")]
    ContextLost,

    /// The device cannot execute the request (e.g. an unsupported shader kernel).
    #[error("unsupported by this device: {0}")]
    Unsupported(String),

    /// A handle was used that the device does not know or no longer owns.
    #[error("invalid {0} handle")]
    InvalidHandle(&'static str),

    /// Any other backend-specific failure.
    #[error("device error: {0}")]
    Backend(String),
}
