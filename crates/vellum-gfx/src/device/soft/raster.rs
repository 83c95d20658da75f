//! Triangle scan conversion.
//!
//! Coverage is sampled at pixel centers with a top-left style tie rule, so
//! two triangles sharing an edge never both cover a pixel on that edge.

/// Vertex after the viewport transform, in window pixels.
#[derive(Debug, Copy, Clone)]
pub(super) struct WindowVertex {
    pub x: f64,
    pub y: f64,
    pub tex: [f32; 2],
    pub color: [f32; 4],
    pub source: u32,
}

/// Interpolated fragment inputs.
#[derive(Debug, Copy, Clone)]
pub(super) struct Varyings {
    pub tex: [f32; 2],
    pub color: [f32; 4],
    pub source: u32,
}

/// Half-open pixel rectangle `[x0, x1) × [y0, y1)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) struct PixelBounds {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl PixelBounds {
    pub fn intersect(self, other: PixelBounds) -> PixelBounds {
        PixelBounds {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        }
    }

    pub fn is_empty(self) -> bool {
        self.x0 >= self.x1 || self.y0 >= self.y1
    }
}

#[inline]
fn edge(a: &WindowVertex, b: &WindowVertex, px: f64, py: f64) -> f64 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

/// Whether pixels lying exactly on edge `a → b` belong to this triangle.
///
/// A shared edge is walked in opposite directions by its two triangles, so
/// exactly one of them owns it.
#[inline]
fn owns_edge(a: &WindowVertex, b: &WindowVertex) -> bool {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    dy < 0.0 || (dy == 0.0 && dx < 0.0)
}

#[inline]
fn covers(w: f64, owned: bool) -> bool {
    w > 0.0 || (w == 0.0 && owned)
}

/// Calls `emit(x, y, varyings)` for every pixel inside `bounds` covered by `tri`.
pub(super) fn rasterize(
    tri: [WindowVertex; 3],
    bounds: PixelBounds,
    mut emit: impl FnMut(i32, i32, Varyings),
) {
    let [v0, mut v1, mut v2] = tri;

    let mut area = edge(&v0, &v1, v2.x, v2.y);
    if area == 0.0 || !area.is_finite() {
        return;
    }
    if area < 0.0 {
        std::mem::swap(&mut v1, &mut v2);
        area = -area;
    }

    let min_x = v0.x.min(v1.x).min(v2.x).floor() as i32;
    let min_y = v0.y.min(v1.y).min(v2.y).floor() as i32;
    let max_x = v0.x.max(v1.x).max(v2.x).ceil() as i32;
    let max_y = v0.y.max(v1.y).max(v2.y).ceil() as i32;

    let area_bounds = PixelBounds { x0: min_x, y0: min_y, x1: max_x, y1: max_y };
    let b = bounds.intersect(area_bounds);
    if b.is_empty() {
        return;
    }

    let own0 = owns_edge(&v1, &v2);
    let own1 = owns_edge(&v2, &v0);
    let own2 = owns_edge(&v0, &v1);

    for y in b.y0..b.y1 {
        let py = y as f64 + 0.5;
        for x in b.x0..b.x1 {
            let px = x as f64 + 0.5;

            let w0 = edge(&v1, &v2, px, py);
            let w1 = edge(&v2, &v0, px, py);
            let w2 = edge(&v0, &v1, px, py);
            if !(covers(w0, own0) && covers(w1, own1) && covers(w2, own2)) {
                continue;
            }

            let l0 = (w0 / area) as f32;
            let l1 = (w1 / area) as f32;
            let l2 = (w2 / area) as f32;

            let lerp = |a: f32, b: f32, c: f32| a * l0 + b * l1 + c * l2;
            let mut color = [0.0; 4];
            for (i, out) in color.iter_mut().enumerate() {
                *out = lerp(v0.color[i], v1.color[i], v2.color[i]);
            }

            emit(
                x,
                y,
                Varyings {
                    tex: [
                        lerp(v0.tex[0], v1.tex[0], v2.tex[0]),
                        lerp(v0.tex[1], v1.tex[1], v2.tex[1]),
                    ],
                    color,
                    // Flat: the first vertex of the triangle provides the slot.
                    source: tri[0].source,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wv(x: f64, y: f64) -> WindowVertex {
        WindowVertex { x, y, tex: [x as f32, y as f32], color: [1.0; 4], source: 0 }
    }

    fn bounds(w: i32, h: i32) -> PixelBounds {
        PixelBounds { x0: 0, y0: 0, x1: w, y1: h }
    }

    fn coverage(tris: &[[WindowVertex; 3]], w: i32, h: i32) -> Vec<u32> {
        let mut hits = vec![0u32; (w * h) as usize];
        for tri in tris {
            rasterize(*tri, bounds(w, h), |x, y, _| hits[(y * w + x) as usize] += 1);
        }
        hits
    }

    #[test]
    fn quad_covers_every_pixel_exactly_once() {
        let (a, b, c, d) = (wv(0.0, 0.0), wv(8.0, 0.0), wv(0.0, 8.0), wv(8.0, 8.0));
        let hits = coverage(&[[a, b, c], [b, c, d]], 8, 8);
        assert!(hits.iter().all(|&n| n == 1));
    }

    #[test]
    fn winding_does_not_matter() {
        let hits = coverage(&[[wv(0.0, 0.0), wv(0.0, 4.0), wv(4.0, 0.0)]], 4, 4);
        let total: u32 = hits.iter().sum();
        // Centers strictly inside; the diagonal belongs to the other half.
        assert_eq!(total, 6);
    }

    #[test]
    fn degenerate_triangle_emits_nothing() {
        let hits = coverage(&[[wv(0.0, 0.0), wv(2.0, 2.0), wv(4.0, 4.0)]], 4, 4);
        assert!(hits.iter().all(|&n| n == 0));
    }

    #[test]
    fn bounds_clip_emission() {
        let (a, b, c, d) = (wv(0.0, 0.0), wv(8.0, 0.0), wv(0.0, 8.0), wv(8.0, 8.0));
        let mut n = 0;
        let clip = PixelBounds { x0: 2, y0: 2, x1: 4, y1: 4 };
        for tri in [[a, b, c], [b, c, d]] {
            rasterize(tri, clip, |x, y, _| {
                assert!((2..4).contains(&x) && (2..4).contains(&y));
                n += 1;
            });
        }
        assert_eq!(n, 4);
    }

    #[test]
    fn texture_coordinates_interpolate_to_pixel_centers() {
        let (a, b, c, d) = (wv(0.0, 0.0), wv(4.0, 0.0), wv(0.0, 4.0), wv(4.0, 4.0));
        for tri in [[a, b, c], [b, c, d]] {
            rasterize(tri, bounds(4, 4), |x, y, v| {
                assert!((v.tex[0] - (x as f32 + 0.5)).abs() < 1e-4);
                assert!((v.tex[1] - (y as f32 + 0.5)).abs() < 1e-4);
            });
        }
    }
}
