use super::raster::Varyings;
use super::{SoftKernel, SoftProgram, Surface};
use crate::device::TEXTURE_UNITS;
use crate::paint::{Address, ColorMatrix, Filter};
use crate::shader::{builtin, ShaderIr};

/// Uniform values of one draw, decoded once before rasterization.
pub(super) struct FragmentState {
    kernel: SoftKernel,
    matrix: Option<ColorMatrix>,
    region: [f32; 4],
    filter: Filter,
    address: Address,
    fill: [f32; 4],
}

impl FragmentState {
    pub fn new(program: &SoftProgram) -> Self {
        let scalar = |name: &str| program.value(name).first().copied().unwrap_or(0.0);
        let vec4 = |name: &str| -> [f32; 4] {
            let v = program.value(name);
            std::array::from_fn(|i| v.get(i).copied().unwrap_or(0.0))
        };

        let matrix = (scalar(builtin::USE_COLOR_MATRIX) != 0.0).then(|| {
            ColorMatrix::from_columns(
                program.value(builtin::COLOR_MATRIX_BODY),
                program.value(builtin::COLOR_MATRIX_TRANSLATION),
            )
        });

        Self {
            kernel: program.kernel,
            matrix,
            region: vec4(builtin::SOURCE_REGION),
            filter: Filter::from_uniform(scalar(builtin::FILTER)),
            address: Address::from_uniform(scalar(builtin::ADDRESS)),
            fill: vec4(ShaderIr::FILL_COLOR),
        }
    }

    /// Premultiplied output color of one fragment.
    pub fn shade(&self, v: &Varyings, sources: &[Option<&Surface>; TEXTURE_UNITS]) -> [f32; 4] {
        match self.kernel {
            SoftKernel::Fill => self.fill,
            SoftKernel::Textured => {
                let surface = sources.get(v.source as usize).copied().flatten();
                let Some(surface) = surface else {
                    return [0.0; 4];
                };
                let mut c = self.sample(surface, v.tex[0], v.tex[1]);
                if let Some(m) = &self.matrix {
                    c = m.apply_premul(c);
                }
                std::array::from_fn(|i| c[i] * v.color[i])
            }
        }
    }

    fn sample(&self, s: &Surface, u: f32, v: f32) -> [f32; 4] {
        match self.filter {
            Filter::Nearest => self.texel(s, u.floor() as i32, v.floor() as i32),
            Filter::Linear => {
                let (u, v) = (u - 0.5, v - 0.5);
                let (x0, y0) = (u.floor(), v.floor());
                let (fx, fy) = (u - x0, v - y0);
                let (x0, y0) = (x0 as i32, y0 as i32);

                let c00 = self.texel(s, x0, y0);
                let c10 = self.texel(s, x0 + 1, y0);
                let c01 = self.texel(s, x0, y0 + 1);
                let c11 = self.texel(s, x0 + 1, y0 + 1);
                std::array::from_fn(|i| {
                    let top = c00[i] + (c10[i] - c00[i]) * fx;
                    let bottom = c01[i] + (c11[i] - c01[i]) * fx;
                    top + (bottom - top) * fy
                })
            }
        }
    }

    fn texel(&self, s: &Surface, mut x: i32, mut y: i32) -> [f32; 4] {
        let [rx, ry, rw, rh] = self.region;
        let (x0, y0, x1, y1) = if rw > 0.0 && rh > 0.0 {
            (
                rx.floor() as i32,
                ry.floor() as i32,
                (rx + rw).ceil() as i32,
                (ry + rh).ceil() as i32,
            )
        } else {
            (0, 0, s.width as i32, s.height as i32)
        };

        match self.address {
            Address::Unsafe => {}
            Address::ClampToZero => {
                if x < x0 || x >= x1 || y < y0 || y >= y1 {
                    return [0.0; 4];
                }
            }
            Address::Repeat => {
                if x1 > x0 {
                    x = x0 + (x - x0).rem_euclid(x1 - x0);
                }
                if y1 > y0 {
                    y = y0 + (y - y0).rem_euclid(y1 - y0);
                }
            }
        }

        let x = x.clamp(0, s.width as i32 - 1) as u32;
        let y = y.clamp(0, s.height as i32 - 1) as u32;
        s.texel(x, y)
    }
}
