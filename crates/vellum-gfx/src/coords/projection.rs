/// Orthographic projection from destination pixels to normalized device
/// coordinates, as a column-major `mat4`.
///
/// Pixel row 0 maps to NDC `y = -1`. With `invert_y` the rows are flipped,
/// which is what the platform screen framebuffer expects.
pub fn projection(width: u32, height: u32, invert_y: bool) -> [f32; 16] {
    let (w, h) = (width.max(1) as f32, height.max(1) as f32);
    let (sy, ty) = if invert_y { (-2.0 / h, 1.0) } else { (2.0 / h, -1.0) };
    #[rustfmt::skip]
    let m = [
        2.0 / w, 0.0, 0.0, 0.0,
        0.0,     sy,  0.0, 0.0,
        0.0,     0.0, 1.0, 0.0,
        -1.0,    ty,  0.0, 1.0,
    ];
    m
}
