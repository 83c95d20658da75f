use bytemuck::{Pod, Zeroable};

/// One vertex of a `DrawTriangles` command.
///
/// - `position`: destination pixel coordinates
/// - `tex_coords`: source texel coordinates (not normalized)
/// - `color`: premultiplied RGBA scale applied to the sampled color
/// - `source`: index into the draw's source list
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub tex_coords: [f32; 2],
    pub color: [f32; 4],
    pub source: u32,
}

impl Vertex {
    /// Vertex sampling source slot 0 with an opaque white color scale.
    #[inline]
    pub const fn new(x: f32, y: f32, u: f32, v: f32) -> Self {
        Self {
            position: [x, y],
            tex_coords: [u, v],
            color: [1.0, 1.0, 1.0, 1.0],
            source: 0,
        }
    }

    #[inline]
    pub const fn with_color(mut self, color: [f32; 4]) -> Self {
        self.color = color;
        self
    }

    #[inline]
    pub const fn with_source(mut self, source: u32) -> Self {
        self.source = source;
        self
    }
}

/// Index pattern for one quad made of four vertices (two triangles).
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 1, 2, 3];

/// Four vertices mapping the source texels `(sx, sy, sw, sh)` onto the
/// destination rectangle `(dx, dy, dw, dh)`.
///
/// Vertex order: top-left, top-right, bottom-left, bottom-right, matching
/// [`QUAD_INDICES`].
pub fn quad(dst: [f32; 4], src: [f32; 4]) -> [Vertex; 4] {
    let [dx, dy, dw, dh] = dst;
    let [sx, sy, sw, sh] = src;
    [
        Vertex::new(dx, dy, sx, sy),
        Vertex::new(dx + dw, dy, sx + sw, sy),
        Vertex::new(dx, dy + dh, sx, sy + sh),
        Vertex::new(dx + dw, dy + dh, sx + sw, sy + sh),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 36);
    }

    #[test]
    fn quad_corners_follow_index_pattern() {
        let v = quad([0.0, 0.0, 4.0, 2.0], [1.0, 1.0, 2.0, 2.0]);
        assert_eq!(v[0].position, [0.0, 0.0]);
        assert_eq!(v[3].position, [4.0, 2.0]);
        assert_eq!(v[3].tex_coords, [3.0, 3.0]);
        assert!(QUAD_INDICES.iter().all(|&i| (i as usize) < v.len()));
    }
}
