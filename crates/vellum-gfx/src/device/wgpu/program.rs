use std::collections::HashMap;

use super::pipeline::{self, PipelineKey};
use crate::device::UniformLocation;
use crate::shader::{builtin, Kernel, ShaderIr};

const COMMON: &str = include_str!("shaders/common.wgsl");
const TEXTURED: &str = include_str!("shaders/textured.wgsl");

/// Where each declared uniform lives in the program's `array<vec4<f32>>`.
///
/// Every uniform starts on a fresh vec4 slot; a location is the uniform's
/// index in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct UniformLayout {
    entries: Vec<UniformSlot>,
    slots: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct UniformSlot {
    name: String,
    slot: usize,
    len: usize,
}

impl UniformLayout {
    pub fn new(ir: &ShaderIr) -> Self {
        let mut entries = Vec::new();
        let mut slots = 0;
        for decl in ir.declared_uniforms() {
            entries.push(UniformSlot {
                name: decl.name.to_string(),
                slot: slots,
                len: decl.len,
            });
            slots += decl.len.div_ceil(4).max(1);
        }
        Self { entries, slots }
    }

    #[inline]
    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn location(&self, name: &str) -> Option<UniformLocation> {
        self.entries
            .iter()
            .position(|e| e.name == name)
            .map(|i| UniformLocation(i as u32))
    }

    fn slot(&self, name: &str) -> usize {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map_or(0, |e| e.slot)
    }

    /// WGSL module for `ir`: constants, shared stages, then the kernel.
    pub fn module_source(&self, ir: &ShaderIr) -> String {
        let mut src = format!("const UNIFORM_SLOTS: u32 = {}u;\n", self.slots.max(1));
        for (name, constant) in [
            (builtin::PROJECTION, "SLOT_PROJECTION"),
            (builtin::COLOR_MATRIX_BODY, "SLOT_COLOR_MATRIX_BODY"),
            (builtin::COLOR_MATRIX_TRANSLATION, "SLOT_COLOR_MATRIX_TRANSLATION"),
            (builtin::USE_COLOR_MATRIX, "SLOT_USE_COLOR_MATRIX"),
            (builtin::SOURCE_REGION, "SLOT_SOURCE_REGION"),
            (builtin::FILTER, "SLOT_FILTER"),
            (builtin::ADDRESS, "SLOT_ADDRESS"),
        ] {
            src.push_str(&format!("const {constant}: u32 = {}u;\n", self.slot(name)));
        }
        src.push('\n');
        src.push_str(COMMON);
        src.push('\n');

        match ir.kernel() {
            Kernel::Textured => src.push_str(TEXTURED),
            Kernel::Fill => src.push_str(&format!(
                "fn shade(frag: Fragment) -> vec4<f32> {{\n    return u.v[{}];\n}}\n",
                self.slot(ShaderIr::FILL_COLOR)
            )),
            Kernel::Wgsl(body) => {
                src.push_str("fn shade(frag: Fragment) -> vec4<f32> {\n");
                for decl in ir.user_uniforms() {
                    let slot = self.slot(&decl.name);
                    let n = decl.len.div_ceil(4);
                    if n <= 1 {
                        src.push_str(&format!("    let {} = u.v[{slot}];\n", decl.name));
                    } else {
                        let items: Vec<String> =
                            (0..n).map(|i| format!("u.v[{}]", slot + i)).collect();
                        src.push_str(&format!(
                            "    let {} = array<vec4<f32>, {n}>({});\n",
                            decl.name,
                            items.join(", ")
                        ));
                    }
                }
                src.push_str(body);
                src.push_str("\n}\n");
            }
        }
        src
    }
}

/// A compiled program: its module, uniform storage and pipelines.
pub(super) struct GpuProgram {
    module: wgpu::ShaderModule,
    layout: UniformLayout,
    values: Vec<[f32; 4]>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl GpuProgram {
    pub fn new(device: &wgpu::Device, ir: &ShaderIr) -> Self {
        let layout = UniformLayout::new(ir);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("vellum program"),
            source: wgpu::ShaderSource::Wgsl(layout.module_source(ir).into()),
        });
        Self {
            module,
            values: vec![[0.0; 4]; layout.slots().max(1)],
            layout,
            pipelines: HashMap::new(),
        }
    }

    #[inline]
    pub fn location(&self, name: &str) -> Option<UniformLocation> {
        self.layout.location(name)
    }

    /// Stores `value` at `location`; extra floats are dropped.
    pub fn set(&mut self, location: UniformLocation, value: &[f32]) {
        let Some(entry) = self.layout.entries.get(location.0 as usize) else {
            return;
        };
        let (slot, len) = (entry.slot, entry.len);
        for (i, &v) in value.iter().take(len).enumerate() {
            self.values[slot + i / 4][i % 4] = v;
        }
    }

    #[inline]
    pub fn values(&self) -> &[[f32; 4]] {
        &self.values
    }

    pub fn ensure_pipeline(
        &mut self,
        device: &wgpu::Device,
        layout: &wgpu::PipelineLayout,
        key: PipelineKey,
    ) {
        if self.pipelines.contains_key(&key) {
            return;
        }
        log::debug!("wgpu: building pipeline {key:?}");
        let built = pipeline::build(device, layout, &self.module, key);
        self.pipelines.insert(key, built);
    }

    #[inline]
    pub fn pipeline(&self, key: PipelineKey) -> Option<&wgpu::RenderPipeline> {
        self.pipelines.get(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::{UniformDecl, BUILTIN_UNIFORMS};

    #[test]
    fn builtins_take_fixed_slots() {
        let layout = UniformLayout::new(&ShaderIr::textured());
        assert_eq!(layout.slot(builtin::PROJECTION), 0);
        assert_eq!(layout.slot(builtin::DESTINATION_SIZE), 4);
        assert_eq!(layout.slot(builtin::COLOR_MATRIX_BODY), 7);
        assert_eq!(layout.slot(builtin::ADDRESS), 15);
        assert_eq!(layout.slots(), 16);
    }

    #[test]
    fn locations_follow_declaration_order() {
        let layout = UniformLayout::new(&ShaderIr::fill());
        assert_eq!(
            layout.location(ShaderIr::FILL_COLOR),
            Some(UniformLocation(BUILTIN_UNIFORMS.len() as u32))
        );
        assert_eq!(layout.location("missing"), None);
    }

    #[test]
    fn wgsl_kernel_binds_user_uniforms() {
        let ir = ShaderIr::wgsl(
            "return u_tint * u_weights[1].x;",
            vec![UniformDecl::new("u_tint", 4), UniformDecl::new("u_weights", 6)],
        );
        let src = UniformLayout::new(&ir).module_source(&ir);
        assert!(src.contains("let u_tint = u.v[16];"));
        assert!(src.contains("let u_weights = array<vec4<f32>, 2>(u.v[17], u.v[18]);"));
        assert!(src.contains("const UNIFORM_SLOTS: u32 = 19u;"));
    }

    #[test]
    fn fill_kernel_reads_color_slot() {
        let ir = ShaderIr::fill();
        let src = UniformLayout::new(&ir).module_source(&ir);
        assert!(src.contains("return u.v[16];"));
    }
}
