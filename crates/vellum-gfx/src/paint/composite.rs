/// Blend factor applied to either the source or the destination color.
///
/// This is the whole operation set the composite modes need; devices map it
/// onto their native blend-factor enums.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    DstAlpha,
    OneMinusSrcAlpha,
    OneMinusDstAlpha,
    DstColor,
}

impl BlendFactor {
    /// Evaluates the factor for one channel.
    ///
    /// `src`/`dst` are premultiplied RGBA in [0, 1]; `channel` selects the
    /// component used by `DstColor`.
    #[inline]
    pub fn eval(self, src: [f32; 4], dst: [f32; 4], channel: usize) -> f32 {
        match self {
            BlendFactor::Zero => 0.0,
            BlendFactor::One => 1.0,
            BlendFactor::SrcAlpha => src[3],
            BlendFactor::DstAlpha => dst[3],
            BlendFactor::OneMinusSrcAlpha => 1.0 - src[3],
            BlendFactor::OneMinusDstAlpha => 1.0 - dst[3],
            BlendFactor::DstColor => dst[channel],
        }
    }
}

/// Porter-Duff composite mode of a draw.
///
/// Every mode is a real blend configuration: `Clear` writes zero through the
/// blend unit like any other draw and is never special-cased on the CPU.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum CompositeMode {
    #[default]
    SourceOver,
    Clear,
    Copy,
    DestinationOver,
    SourceIn,
    DestinationIn,
    SourceOut,
    DestinationOut,
    SourceAtop,
    DestinationAtop,
    Xor,
    Lighter,
    Multiply,
}

impl CompositeMode {
    pub const ALL: [CompositeMode; 13] = [
        CompositeMode::SourceOver,
        CompositeMode::Clear,
        CompositeMode::Copy,
        CompositeMode::DestinationOver,
        CompositeMode::SourceIn,
        CompositeMode::DestinationIn,
        CompositeMode::SourceOut,
        CompositeMode::DestinationOut,
        CompositeMode::SourceAtop,
        CompositeMode::DestinationAtop,
        CompositeMode::Xor,
        CompositeMode::Lighter,
        CompositeMode::Multiply,
    ];

    /// `(source factor, destination factor)` for premultiplied colors.
    ///
    /// The same pair applies to color and alpha channels.
    pub const fn factors(self) -> (BlendFactor, BlendFactor) {
        use BlendFactor::*;
        match self {
            CompositeMode::SourceOver => (One, OneMinusSrcAlpha),
            CompositeMode::Clear => (Zero, Zero),
            CompositeMode::Copy => (One, Zero),
            CompositeMode::DestinationOver => (OneMinusDstAlpha, One),
            CompositeMode::SourceIn => (DstAlpha, Zero),
            CompositeMode::DestinationIn => (Zero, SrcAlpha),
            CompositeMode::SourceOut => (OneMinusDstAlpha, Zero),
            CompositeMode::DestinationOut => (Zero, OneMinusSrcAlpha),
            CompositeMode::SourceAtop => (DstAlpha, OneMinusSrcAlpha),
            CompositeMode::DestinationAtop => (OneMinusDstAlpha, SrcAlpha),
            CompositeMode::Xor => (OneMinusDstAlpha, OneMinusSrcAlpha),
            CompositeMode::Lighter => (One, One),
            CompositeMode::Multiply => (DstColor, OneMinusSrcAlpha),
        }
    }

    /// Blends a premultiplied source over a premultiplied destination.
    ///
    /// Output is clamped to [0, 1].
    pub fn blend(self, src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
        let (sf, df) = self.factors();
        let mut out = [0.0; 4];
        for (c, o) in out.iter_mut().enumerate() {
            let v = src[c] * sf.eval(src, dst, c) + dst[c] * df.eval(src, dst, c);
            *o = v.clamp(0.0, 1.0);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
    const HALF_BLUE: [f32; 4] = [0.0, 0.0, 0.5, 0.5];

    #[test]
    fn clear_zeroes_any_destination() {
        assert_eq!(CompositeMode::Clear.blend(RED, HALF_BLUE), [0.0; 4]);
        assert_eq!(CompositeMode::Clear.blend([0.0; 4], RED), [0.0; 4]);
    }

    #[test]
    fn source_over_opaque_replaces() {
        assert_eq!(CompositeMode::SourceOver.blend(RED, HALF_BLUE), RED);
    }

    #[test]
    fn source_over_translucent_mixes() {
        let out = CompositeMode::SourceOver.blend(HALF_BLUE, RED);
        assert_eq!(out, [0.5, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn copy_ignores_destination() {
        assert_eq!(CompositeMode::Copy.blend(HALF_BLUE, RED), HALF_BLUE);
    }

    #[test]
    fn lighter_saturates() {
        assert_eq!(CompositeMode::Lighter.blend(RED, RED), RED);
    }

    #[test]
    fn destination_out_punches_alpha() {
        let out = CompositeMode::DestinationOut.blend(RED, HALF_BLUE);
        assert_eq!(out, [0.0; 4]);
    }
}
