use crate::device::DeviceError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything the command layer reports to its producer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    // ── contract violations ───────────────────────────────────────────────
    #[error("image has been disposed")]
    Disposed,

    #[error("unknown image handle")]
    UnknownImage,

    #[error("unknown shader handle")]
    UnknownShader,

    #[error("the built-in shader needs at least one source image")]
    NoSource,

    #[error("{count} sources exceed the {max} available slots")]
    TooManySources { count: usize, max: usize },

    #[error("rectangle at ({x}, {y}) of {width}x{height} lies outside the {image_width}x{image_height} image")]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },

    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("image size {width}x{height} is empty")]
    EmptyImage { width: u32, height: u32 },

    #[error("image size {width}x{height} exceeds the maximum texture size {max}")]
    TooLarge { width: u32, height: u32, max: u32 },

    #[error("the screen image cannot be used as a draw source")]
    ScreenAsSource,

    #[error("the screen image's pixels cannot be replaced or copied into")]
    ScreenPixels,

    #[error("a screen image already exists")]
    ScreenExists,

    #[error("an image cannot be drawn or copied onto itself")]
    SourceIsDestination,

    #[error("cannot copy a {}x{} image into a {}x{} image", .source_size.0, .source_size.1, .destination_size.0, .destination_size.1)]
    IncompatibleCopy {
        source_size: (u32, u32),
        destination_size: (u32, u32),
    },

    #[error("index {index} out of range for {vertices} vertices")]
    InvalidIndex { index: u16, vertices: usize },

    #[error("{indices} indices do not form whole triangles")]
    PartialTriangle { indices: usize },

    #[error("vertex uses source slot {slot} but the draw has {sources} sources")]
    InvalidSlot { slot: u32, sources: usize },

    #[error("{count} vertices exceed the per-draw limit of {max}")]
    TooManyVertices { count: usize, max: usize },

    #[error("shader declares {expected} uniforms, draw supplied {actual}")]
    UniformCount { expected: usize, actual: usize },

    #[error("uniform `{name}` takes {expected} floats, draw supplied {actual}")]
    UniformLength {
        name: String,
        expected: usize,
        actual: usize,
    },

    // ── runtime ───────────────────────────────────────────────────────────
    #[error("command queue refused the operation after a failed flush; reset it first")]
    Poisoned,

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller broke an API precondition. Not retried.
    Contract,
    /// The device ran out of memory during a flush.
    ResourceExhausted,
    /// The graphics context was lost; GPU resources must be recreated.
    ContextLost,
    /// The queue is poisoned by an earlier failed flush.
    Poisoned,
    /// Any other device failure.
    Device,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Poisoned => ErrorKind::Poisoned,
            Error::Device(DeviceError::OutOfMemory(_)) => ErrorKind::ResourceExhausted,
            Error::Device(DeviceError::ContextLost) => ErrorKind::ContextLost,
            Error::Device(_) => ErrorKind::Device,
            _ => ErrorKind::Contract,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(Error::Disposed.kind(), ErrorKind::Contract);
        assert_eq!(Error::Poisoned.kind(), ErrorKind::Poisoned);
        assert_eq!(
            Error::from(DeviceError::OutOfMemory("texture")).kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(Error::from(DeviceError::ContextLost).kind(), ErrorKind::ContextLost);
        assert_eq!(
            Error::from(DeviceError::Backend("x".into())).kind(),
            ErrorKind::Device
        );
    }

    #[test]
    fn messages_name_the_problem() {
        let e = Error::TooManySources { count: 5, max: 4 };
        assert_eq!(e.to_string(), "5 sources exceed the 4 available slots");
    }
}
