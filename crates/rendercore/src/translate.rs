//! Conversions from tracked render state to `wgpu` pipeline descriptors.
//!
//! Explicit-pipeline APIs bake fixed-function state into the pipeline, so
//! these functions read a `StateSnapshot` once instead of issuing calls.
//! Face orientation follows the native path: front and back are exchanged
//! while `invert_y` is off.

use thiserror::Error;

use crate::snapshot::StateSnapshot;
use crate::types::{
    BlendEq, BlendFunc, BlendState, CullFace, DepthTest, LogicOp, PrimitiveType, RenderMode,
    StencilOp, StencilOps, StencilTest, TextureFormat,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranslateError {
    #[error("{0} has no pipeline equivalent")]
    Unsupported(&'static str),
}

pub fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8 => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Srgba8 => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Rgba16F => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32F => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::R32F => wgpu::TextureFormat::R32Float,
        TextureFormat::Depth16 => wgpu::TextureFormat::Depth16Unorm,
        TextureFormat::Depth24 => wgpu::TextureFormat::Depth24Plus,
        TextureFormat::Depth32F => wgpu::TextureFormat::Depth32Float,
        TextureFormat::Stencil8 => wgpu::TextureFormat::Stencil8,
        TextureFormat::Depth24Stencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
        TextureFormat::Depth32FStencil8 => wgpu::TextureFormat::Depth32FloatStencil8,
    }
}

fn topology(primitive: PrimitiveType) -> Result<wgpu::PrimitiveTopology, TranslateError> {
    Ok(match primitive {
        PrimitiveType::Points => wgpu::PrimitiveTopology::PointList,
        PrimitiveType::Lines => wgpu::PrimitiveTopology::LineList,
        PrimitiveType::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        PrimitiveType::Triangles => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveType::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        PrimitiveType::TriangleFan => return Err(TranslateError::Unsupported("triangle fan")),
    })
}

pub fn primitive_state(
    snapshot: &StateSnapshot,
    primitive: PrimitiveType,
) -> Result<wgpu::PrimitiveState, TranslateError> {
    let cull = if snapshot.matrices.invert_y {
        snapshot.cull_face
    } else {
        snapshot.cull_face.swapped()
    };
    let cull_mode = match cull {
        CullFace::None => None,
        CullFace::Front => Some(wgpu::Face::Front),
        CullFace::Back => Some(wgpu::Face::Back),
        CullFace::FrontAndBack => return Err(TranslateError::Unsupported("culling both faces")),
    };
    let polygon_mode = match snapshot.render_mode {
        RenderMode::Solid => wgpu::PolygonMode::Fill,
        RenderMode::Wireframe => wgpu::PolygonMode::Line,
        RenderMode::Points => wgpu::PolygonMode::Point,
    };

    Ok(wgpu::PrimitiveState {
        topology: topology(primitive)?,
        strip_index_format: None,
        front_face: wgpu::FrontFace::Ccw,
        cull_mode,
        polygon_mode,
        unclipped_depth: false,
        conservative: false,
    })
}

fn compare(test: DepthTest) -> wgpu::CompareFunction {
    match test {
        DepthTest::Less => wgpu::CompareFunction::Less,
        DepthTest::LessEqual => wgpu::CompareFunction::LessEqual,
        DepthTest::Greater => wgpu::CompareFunction::Greater,
        DepthTest::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        DepthTest::Equal => wgpu::CompareFunction::Equal,
        DepthTest::NotEqual => wgpu::CompareFunction::NotEqual,
        DepthTest::AlwaysPass => wgpu::CompareFunction::Always,
        DepthTest::NeverPass => wgpu::CompareFunction::Never,
    }
}

fn stencil_compare(test: StencilTest) -> wgpu::CompareFunction {
    match test {
        StencilTest::Less => wgpu::CompareFunction::Less,
        StencilTest::LessEqual => wgpu::CompareFunction::LessEqual,
        StencilTest::Greater => wgpu::CompareFunction::Greater,
        StencilTest::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        StencilTest::Equal => wgpu::CompareFunction::Equal,
        StencilTest::NotEqual => wgpu::CompareFunction::NotEqual,
        StencilTest::AlwaysPass => wgpu::CompareFunction::Always,
        StencilTest::NeverPass => wgpu::CompareFunction::Never,
    }
}

fn stencil_operation(op: StencilOp) -> wgpu::StencilOperation {
    match op {
        StencilOp::Keep => wgpu::StencilOperation::Keep,
        StencilOp::Zero => wgpu::StencilOperation::Zero,
        StencilOp::Replace => wgpu::StencilOperation::Replace,
        StencilOp::Invert => wgpu::StencilOperation::Invert,
        StencilOp::Increment => wgpu::StencilOperation::IncrementClamp,
        StencilOp::Decrement => wgpu::StencilOperation::DecrementClamp,
        StencilOp::IncrementWrap => wgpu::StencilOperation::IncrementWrap,
        StencilOp::DecrementWrap => wgpu::StencilOperation::DecrementWrap,
    }
}

fn stencil_face(test: StencilTest, ops: StencilOps) -> wgpu::StencilFaceState {
    wgpu::StencilFaceState {
        compare: stencil_compare(test),
        fail_op: stencil_operation(ops.fail),
        depth_fail_op: stencil_operation(ops.zfail),
        pass_op: stencil_operation(ops.zpass),
    }
}

/// Depth and stencil state for a pass writing to `format`.
///
/// The stencil reference is dynamic state in `wgpu`; callers set it on the
/// render pass from `snapshot.stencil.reference`.
pub fn depth_stencil_state(snapshot: &StateSnapshot, format: TextureFormat) -> wgpu::DepthStencilState {
    let stencil = &snapshot.stencil;
    let (front, back) = if snapshot.matrices.invert_y {
        (stencil.front, stencil.back)
    } else {
        (stencil.back, stencil.front)
    };

    wgpu::DepthStencilState {
        format: texture_format(format),
        depth_write_enabled: snapshot.depth_write,
        depth_compare: compare(snapshot.depth_test),
        stencil: wgpu::StencilState {
            front: stencil_face(stencil.test, front),
            back: stencil_face(stencil.test, back),
            read_mask: 0xff,
            write_mask: 0xff,
        },
        bias: wgpu::DepthBiasState {
            constant: snapshot.polygon_offset.units as i32,
            slope_scale: snapshot.polygon_offset.factor,
            clamp: 0.0,
        },
    }
}

fn blend_factor(func: BlendFunc) -> wgpu::BlendFactor {
    match func {
        BlendFunc::Zero => wgpu::BlendFactor::Zero,
        BlendFunc::One => wgpu::BlendFactor::One,
        BlendFunc::SrcColor => wgpu::BlendFactor::Src,
        BlendFunc::OneMinusSrcColor => wgpu::BlendFactor::OneMinusSrc,
        BlendFunc::DstColor => wgpu::BlendFactor::Dst,
        BlendFunc::OneMinusDstColor => wgpu::BlendFactor::OneMinusDst,
        BlendFunc::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFunc::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFunc::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFunc::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
        BlendFunc::SrcAlphaSaturate => wgpu::BlendFactor::SrcAlphaSaturated,
        BlendFunc::ConstantColor => wgpu::BlendFactor::Constant,
        BlendFunc::OneMinusConstantColor => wgpu::BlendFactor::OneMinusConstant,
    }
}

fn blend_operation(eq: BlendEq) -> wgpu::BlendOperation {
    match eq {
        BlendEq::Add => wgpu::BlendOperation::Add,
        BlendEq::Subtract => wgpu::BlendOperation::Subtract,
        BlendEq::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
        BlendEq::Min => wgpu::BlendOperation::Min,
        BlendEq::Max => wgpu::BlendOperation::Max,
    }
}

pub fn blend_state(state: &BlendState) -> Option<wgpu::BlendState> {
    if state.is_disabled() {
        return None;
    }
    Some(wgpu::BlendState {
        color: wgpu::BlendComponent {
            src_factor: blend_factor(state.src_rgb),
            dst_factor: blend_factor(state.dst_rgb),
            operation: blend_operation(state.eq_rgb),
        },
        alpha: wgpu::BlendComponent {
            src_factor: blend_factor(state.src_alpha),
            dst_factor: blend_factor(state.dst_alpha),
            operation: blend_operation(state.eq_alpha),
        },
    })
}

/// One colour target per entry of `formats`, blended by the matching
/// per-buffer blend state.
pub fn color_target_states(
    snapshot: &StateSnapshot,
    formats: &[TextureFormat],
) -> Result<Vec<Option<wgpu::ColorTargetState>>, TranslateError> {
    if snapshot.logic_op != LogicOp::Copy {
        return Err(TranslateError::Unsupported("logic op"));
    }
    if formats.len() > snapshot.blend.len() {
        return Err(TranslateError::Unsupported("more colour targets than draw buffers"));
    }

    let mut write_mask = wgpu::ColorWrites::empty();
    if snapshot.color_write {
        write_mask |= wgpu::ColorWrites::COLOR;
    }
    if snapshot.alpha_write {
        write_mask |= wgpu::ColorWrites::ALPHA;
    }

    Ok(formats
        .iter()
        .zip(snapshot.blend.iter())
        .map(|(format, blend)| {
            Some(wgpu::ColorTargetState {
                format: texture_format(*format),
                blend: blend_state(blend),
                write_mask,
            })
        })
        .collect())
}

pub fn multisample_state(samples: u32) -> wgpu::MultisampleState {
    wgpu::MultisampleState {
        count: samples.max(1),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LogicOp, StencilOps};

    fn surface() -> StateSnapshot {
        StateSnapshot::new(64, 64)
    }

    #[test]
    fn default_state_translates_to_opaque_triangles() {
        let mut state = surface();
        state.matrices.invert_y = true;
        let primitive = primitive_state(&state, PrimitiveType::Triangles).expect("primitive");
        assert_eq!(primitive.topology, wgpu::PrimitiveTopology::TriangleList);
        assert_eq!(primitive.cull_mode, Some(wgpu::Face::Back));

        let targets = color_target_states(&state, &[TextureFormat::Rgba8]).expect("targets");
        let target = targets[0].clone().expect("target");
        assert!(target.blend.is_none());
        assert_eq!(target.write_mask, wgpu::ColorWrites::ALL);
    }

    #[test]
    fn faces_swap_without_inverted_y() {
        let mut state = surface();
        state.matrices.invert_y = false;
        state.stencil.front = StencilOps::new(StencilOp::Zero, StencilOp::Keep, StencilOp::Keep);
        let primitive = primitive_state(&state, PrimitiveType::Triangles).expect("primitive");
        assert_eq!(primitive.cull_mode, Some(wgpu::Face::Front));

        let depth = depth_stencil_state(&state, TextureFormat::Depth24Stencil8);
        assert_eq!(depth.stencil.back.fail_op, wgpu::StencilOperation::Zero);
        assert_eq!(depth.stencil.front.fail_op, wgpu::StencilOperation::Keep);
    }

    #[test]
    fn alpha_blending_and_masks() {
        let mut state = surface();
        state.blend[0] = BlendState::ALPHA;
        state.alpha_write = false;
        let targets = color_target_states(&state, &[TextureFormat::Srgba8]).expect("targets");
        let target = targets[0].clone().expect("target");
        let blend = target.blend.expect("blend");
        assert_eq!(blend.color.src_factor, wgpu::BlendFactor::SrcAlpha);
        assert_eq!(blend.color.dst_factor, wgpu::BlendFactor::OneMinusSrcAlpha);
        assert_eq!(target.write_mask, wgpu::ColorWrites::COLOR);
        assert_eq!(target.format, wgpu::TextureFormat::Rgba8UnormSrgb);
    }

    #[test]
    fn unsupported_state_is_reported() {
        let mut state = surface();
        assert_eq!(
            primitive_state(&state, PrimitiveType::TriangleFan),
            Err(TranslateError::Unsupported("triangle fan"))
        );
        state.logic_op = LogicOp::Xor;
        assert_eq!(
            color_target_states(&state, &[TextureFormat::Rgba8]),
            Err(TranslateError::Unsupported("logic op"))
        );
    }

    #[test]
    fn polygon_offset_becomes_depth_bias() {
        let mut state = surface();
        state.polygon_offset.factor = 1.5;
        state.polygon_offset.units = 4.0;
        state.depth_test = DepthTest::LessEqual;
        let depth = depth_stencil_state(&state, TextureFormat::Depth32F);
        assert_eq!(depth.bias.constant, 4);
        assert_eq!(depth.bias.slope_scale, 1.5);
        assert_eq!(depth.depth_compare, wgpu::CompareFunction::LessEqual);
        assert_eq!(depth.format, wgpu::TextureFormat::Depth32Float);
    }
}
