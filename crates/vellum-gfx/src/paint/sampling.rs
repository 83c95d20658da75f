/// Texel filtering used when sampling a source image.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum Filter {
    #[default]
    Nearest,
    Linear,
}

/// Behavior for texels outside the draw's source clip region.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum Address {
    /// No clipping: reads clamp to the texture edge.
    #[default]
    Unsafe,
    /// Texels outside the region read as transparent.
    ClampToZero,
    /// Coordinates wrap inside the region.
    Repeat,
}

impl Filter {
    /// Shader-side encoding.
    pub const fn as_uniform(self) -> f32 {
        match self {
            Filter::Nearest => 0.0,
            Filter::Linear => 1.0,
        }
    }

    pub fn from_uniform(v: f32) -> Self {
        if v.round() == 1.0 { Filter::Linear } else { Filter::Nearest }
    }
}

impl Address {
    /// Shader-side encoding.
    pub const fn as_uniform(self) -> f32 {
        match self {
            Address::Unsafe => 0.0,
            Address::ClampToZero => 1.0,
            Address::Repeat => 2.0,
        }
    }

    pub fn from_uniform(v: f32) -> Self {
        match v.round() as i32 {
            1 => Address::ClampToZero,
            2 => Address::Repeat,
            _ => Address::Unsafe,
        }
    }
}
