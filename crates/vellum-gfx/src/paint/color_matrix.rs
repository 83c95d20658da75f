/// Affine color transform applied to straight-alpha RGBA.
///
/// `out = body * rgba + translation`, with `body` stored row-major.
/// The sampled color is un-premultiplied before the transform and
/// premultiplied again afterwards.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ColorMatrix {
    pub body: [[f32; 4]; 4],
    pub translation: [f32; 4],
}

impl Default for ColorMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl ColorMatrix {
    pub const IDENTITY: ColorMatrix = ColorMatrix {
        body: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
        translation: [0.0; 4],
    };

    /// Per-channel scale.
    pub const fn scale(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self {
            body: [
                [r, 0.0, 0.0, 0.0],
                [0.0, g, 0.0, 0.0],
                [0.0, 0.0, b, 0.0],
                [0.0, 0.0, 0.0, a],
            ],
            translation: [0.0; 4],
        }
    }

    pub const fn translated(mut self, r: f32, g: f32, b: f32, a: f32) -> Self {
        self.translation = [r, g, b, a];
        self
    }

    #[inline]
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Body as 16 floats in column-major order (shader `mat4x4` layout).
    pub fn body_columns(&self) -> [f32; 16] {
        let mut out = [0.0; 16];
        for col in 0..4 {
            for row in 0..4 {
                out[col * 4 + row] = self.body[row][col];
            }
        }
        out
    }

    /// Inverse of [`ColorMatrix::body_columns`].
    pub fn from_columns(columns: &[f32], translation: &[f32]) -> Self {
        let mut m = Self::IDENTITY;
        for col in 0..4 {
            for row in 0..4 {
                if let Some(&v) = columns.get(col * 4 + row) {
                    m.body[row][col] = v;
                }
            }
        }
        for (i, t) in m.translation.iter_mut().enumerate() {
            *t = translation.get(i).copied().unwrap_or(0.0);
        }
        m
    }

    /// Applies the transform to a premultiplied color.
    pub fn apply_premul(&self, c: [f32; 4]) -> [f32; 4] {
        let straight = if c[3] > 0.0 {
            [c[0] / c[3], c[1] / c[3], c[2] / c[3], c[3]]
        } else {
            [0.0; 4]
        };

        let mut out = [0.0; 4];
        for (row, o) in out.iter_mut().enumerate() {
            let m = self.body[row];
            let v = m[0] * straight[0]
                + m[1] * straight[1]
                + m[2] * straight[2]
                + m[3] * straight[3]
                + self.translation[row];
            *o = v.clamp(0.0, 1.0);
        }

        [out[0] * out[3], out[1] * out[3], out[2] * out[3], out[3]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_identity() {
        assert!(ColorMatrix::default().is_identity());
        assert!(!ColorMatrix::scale(0.5, 1.0, 1.0, 1.0).is_identity());
    }

    #[test]
    fn scale_halves_red() {
        let out = ColorMatrix::scale(0.5, 1.0, 1.0, 1.0).apply_premul([1.0, 1.0, 1.0, 1.0]);
        assert_eq!(out, [0.5, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn translation_on_transparent_input() {
        let m = ColorMatrix::IDENTITY.translated(0.0, 0.0, 0.0, 1.0);
        assert_eq!(m.apply_premul([0.0; 4]), [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn body_columns_transposes() {
        let mut m = ColorMatrix::IDENTITY;
        m.body[0][3] = 0.25;
        let cols = m.body_columns();
        // row 0, column 3 lands at index 3 * 4 + 0.
        assert_eq!(cols[12], 0.25);
    }

    #[test]
    fn from_columns_restores_body() {
        let m = ColorMatrix::scale(0.25, 0.5, 0.75, 1.0).translated(0.1, 0.0, 0.0, 0.0);
        let back = ColorMatrix::from_columns(&m.body_columns(), &m.translation);
        assert_eq!(back, m);
    }
}
