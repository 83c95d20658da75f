use crate::coords::Vertex;
use crate::device::StencilMode;
use crate::paint::{BlendFactor, CompositeMode};

use super::{COLOR_FORMAT, STENCIL_FORMAT};

/// Fixed-function state a pipeline is specialized for.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub(super) struct PipelineKey {
    pub composite: CompositeMode,
    pub stencil: StencilMode,
    /// The target has a stencil attachment.
    pub has_stencil: bool,
}

// ── blend ─────────────────────────────────────────────────────────────────

fn factor(f: BlendFactor) -> wgpu::BlendFactor {
    match f {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
        BlendFactor::DstColor => wgpu::BlendFactor::Dst,
    }
}

pub(super) fn blend_state(mode: CompositeMode) -> wgpu::BlendState {
    let (src, dst) = mode.factors();
    let component = wgpu::BlendComponent {
        src_factor: factor(src),
        dst_factor: factor(dst),
        operation: wgpu::BlendOperation::Add,
    };
    wgpu::BlendState {
        color: component,
        alpha: component,
    }
}

// ── stencil ───────────────────────────────────────────────────────────────

fn stencil_state(mode: StencilMode) -> wgpu::StencilState {
    let face = match mode {
        StencilMode::Disabled => wgpu::StencilFaceState::IGNORE,
        StencilMode::Invert => wgpu::StencilFaceState {
            compare: wgpu::CompareFunction::Always,
            fail_op: wgpu::StencilOperation::Keep,
            depth_fail_op: wgpu::StencilOperation::Keep,
            pass_op: wgpu::StencilOperation::Invert,
        },
        // Reference is always 0.
        StencilMode::NonZero => wgpu::StencilFaceState {
            compare: wgpu::CompareFunction::NotEqual,
            fail_op: wgpu::StencilOperation::Keep,
            depth_fail_op: wgpu::StencilOperation::Keep,
            pass_op: wgpu::StencilOperation::Keep,
        },
    };
    wgpu::StencilState {
        front: face,
        back: face,
        read_mask: 0xff,
        write_mask: 0xff,
    }
}

// ── vertex layout ─────────────────────────────────────────────────────────

const VERTEX_ATTRS: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
    0 => Float32x2,
    1 => Float32x2,
    2 => Float32x4,
    3 => Uint32,
];

fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &VERTEX_ATTRS,
    }
}

// ── pipeline ──────────────────────────────────────────────────────────────

pub(super) fn build(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    key: PipelineKey,
) -> wgpu::RenderPipeline {
    let write_mask = match key.stencil {
        StencilMode::Invert => wgpu::ColorWrites::empty(),
        _ => wgpu::ColorWrites::ALL,
    };

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("vellum pipeline"),
        layout: Some(layout),

        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[vertex_layout()],
        },

        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: COLOR_FORMAT,
                blend: Some(blend_state(key.composite)),
                write_mask,
            })],
        }),

        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },

        depth_stencil: key.has_stencil.then(|| wgpu::DepthStencilState {
            format: STENCIL_FORMAT,
            depth_write_enabled: false,
            depth_compare: wgpu::CompareFunction::Always,
            stencil: stencil_state(key.stencil),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),

        multiview_mask: None,
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_over_is_premultiplied_over() {
        let b = blend_state(CompositeMode::SourceOver);
        assert_eq!(b.color.src_factor, wgpu::BlendFactor::One);
        assert_eq!(b.color.dst_factor, wgpu::BlendFactor::OneMinusSrcAlpha);
        assert_eq!(b.alpha, b.color);
    }

    #[test]
    fn multiply_uses_destination_color() {
        let b = blend_state(CompositeMode::Multiply);
        assert_eq!(b.color.src_factor, wgpu::BlendFactor::Dst);
    }

    #[test]
    fn invert_pass_always_inverts() {
        let s = stencil_state(StencilMode::Invert);
        assert_eq!(s.front.compare, wgpu::CompareFunction::Always);
        assert_eq!(s.front.pass_op, wgpu::StencilOperation::Invert);
        assert_eq!(s.back, s.front);
    }
}
