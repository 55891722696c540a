//! The complete render state at one point in time.
//!
//! A `StateSnapshot` is always fully populated; there is no "unset" value
//! except for the bound framebuffers, where `None` means the display surface.
//! `diff` reports which independently-issued pieces of state differ between
//! two snapshots, which is what `StateStack::pop` re-applies.

use serde::Serialize;

use crate::framebuffer::FramebufferId;
use crate::types::{
    BlendState, Color4, CullFace, DepthTest, DrawBuffer, Face, LogicOp, Mat4, Rect2D, RenderMode,
    ShadeMode, StencilOps, StencilTest, MAX_DRAW_BUFFERS,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StencilState {
    pub test: StencilTest,
    pub reference: i32,
    pub clear: i32,
    pub front: StencilOps,
    pub back: StencilOps,
}

impl Default for StencilState {
    fn default() -> Self {
        Self {
            test: StencilTest::AlwaysPass,
            reference: 0,
            clear: 0,
            front: StencilOps::KEEP,
            back: StencilOps::KEEP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PolygonOffset {
    pub factor: f32,
    pub units: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DepthRange {
    pub near: f32,
    pub far: f32,
}

/// Transform state fed to shaders as engine uniforms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Matrices {
    pub object_to_world: Mat4,
    pub camera_to_world: Mat4,
    pub camera_to_world_inverse: Mat4,
    pub projection: Mat4,
    /// True while rendering to the display surface, whose rows run top-down.
    pub invert_y: bool,
    /// Set whenever a matrix changes; cleared once uploaded.
    pub changed: bool,
}

impl Matrices {
    /// Projection actually uploaded: flipped vertically when `invert_y`.
    pub fn effective_projection(&self) -> Mat4 {
        if self.invert_y {
            Mat4::diagonal(1.0, -1.0, 1.0, 1.0).mul(&self.projection)
        } else {
            self.projection
        }
    }
}

impl Default for Matrices {
    fn default() -> Self {
        Self {
            object_to_world: Mat4::IDENTITY,
            camera_to_world: Mat4::IDENTITY,
            camera_to_world_inverse: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            invert_y: true,
            changed: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub viewport: Rect2D,
    pub clip: Rect2D,
    pub clip_enabled: bool,
    pub depth_test: DepthTest,
    pub depth_write: bool,
    pub color_write: bool,
    pub alpha_write: bool,
    pub stencil: StencilState,
    pub blend: [BlendState; MAX_DRAW_BUFFERS],
    pub logic_op: LogicOp,
    pub cull_face: CullFace,
    pub polygon_offset: PolygonOffset,
    pub render_mode: RenderMode,
    pub point_size: f32,
    pub depth_range: DepthRange,
    pub srgb_conversion: bool,
    pub shade_mode: ShadeMode,
    pub clear_color: Color4,
    pub clear_depth: f32,
    pub draw_buffer: DrawBuffer,
    pub read_buffer: DrawBuffer,
    pub draw_framebuffer: Option<FramebufferId>,
    pub read_framebuffer: Option<FramebufferId>,
    pub matrices: Matrices,
}

impl StateSnapshot {
    /// Default state for a `width` x `height` display surface.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            viewport: Rect2D::from_size(width, height),
            clip: Rect2D::INFINITE,
            clip_enabled: false,
            depth_test: DepthTest::Less,
            depth_write: true,
            color_write: true,
            alpha_write: true,
            stencil: StencilState::default(),
            blend: [BlendState::DISABLED; MAX_DRAW_BUFFERS],
            logic_op: LogicOp::Copy,
            cull_face: CullFace::Back,
            polygon_offset: PolygonOffset {
                factor: 0.0,
                units: 0.0,
            },
            render_mode: RenderMode::Solid,
            point_size: 1.0,
            depth_range: DepthRange { near: 0.0, far: 1.0 },
            srgb_conversion: true,
            shade_mode: ShadeMode::Smooth,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            clear_depth: 1.0,
            draw_buffer: DrawBuffer::Back,
            read_buffer: DrawBuffer::Back,
            draw_framebuffer: None,
            read_framebuffer: None,
            matrices: Matrices::default(),
        }
    }

    /// Fields whose values differ between `self` and `other`.
    ///
    /// `matrices.changed` is bookkeeping, not state, and is never reported.
    pub fn diff(&self, other: &StateSnapshot) -> StateDiff {
        let mut fields = Vec::new();
        let mut check = |differs: bool, field: StateField| {
            if differs {
                fields.push(field);
            }
        };

        check(self.draw_framebuffer != other.draw_framebuffer, StateField::DrawFramebuffer);
        check(self.read_framebuffer != other.read_framebuffer, StateField::ReadFramebuffer);
        check(self.viewport != other.viewport, StateField::Viewport);
        check(
            self.clip_enabled != other.clip_enabled || (self.clip_enabled && self.clip != other.clip),
            StateField::Clip,
        );
        check(self.depth_test != other.depth_test, StateField::DepthTest);
        check(self.depth_write != other.depth_write, StateField::DepthWrite);
        check(self.color_write != other.color_write, StateField::ColorWrite);
        check(self.alpha_write != other.alpha_write, StateField::AlphaWrite);
        check(
            self.stencil.test != other.stencil.test || self.stencil.reference != other.stencil.reference,
            StateField::StencilTest,
        );
        check(self.stencil.clear != other.stencil.clear, StateField::StencilClear);
        check(self.stencil.front != other.stencil.front, StateField::StencilOp(Face::Front));
        check(self.stencil.back != other.stencil.back, StateField::StencilOp(Face::Back));
        for (index, (a, b)) in self.blend.iter().zip(other.blend.iter()).enumerate() {
            check(a != b, StateField::Blend(index));
        }
        check(self.logic_op != other.logic_op, StateField::LogicOp);
        check(self.cull_face != other.cull_face, StateField::CullFace);
        check(self.polygon_offset != other.polygon_offset, StateField::PolygonOffset);
        check(self.render_mode != other.render_mode, StateField::RenderMode);
        check(self.point_size != other.point_size, StateField::PointSize);
        check(self.depth_range != other.depth_range, StateField::DepthRange);
        check(self.srgb_conversion != other.srgb_conversion, StateField::SrgbConversion);
        check(self.shade_mode != other.shade_mode, StateField::ShadeMode);
        check(self.clear_color != other.clear_color, StateField::ClearColor);
        check(self.clear_depth != other.clear_depth, StateField::ClearDepth);
        check(self.draw_buffer != other.draw_buffer, StateField::DrawBuffer);
        check(self.read_buffer != other.read_buffer, StateField::ReadBuffer);
        check(
            self.matrices.object_to_world != other.matrices.object_to_world,
            StateField::ObjectToWorldMatrix,
        );
        check(
            self.matrices.camera_to_world != other.matrices.camera_to_world,
            StateField::CameraToWorldMatrix,
        );
        check(self.matrices.projection != other.matrices.projection, StateField::ProjectionMatrix);
        check(self.matrices.invert_y != other.matrices.invert_y, StateField::InvertY);

        StateDiff { fields }
    }
}

/// One independently issued piece of state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StateField {
    DrawFramebuffer,
    ReadFramebuffer,
    Viewport,
    Clip,
    DepthTest,
    DepthWrite,
    ColorWrite,
    AlphaWrite,
    StencilTest,
    StencilClear,
    StencilOp(Face),
    Blend(usize),
    LogicOp,
    CullFace,
    PolygonOffset,
    RenderMode,
    PointSize,
    DepthRange,
    SrgbConversion,
    ShadeMode,
    ClearColor,
    ClearDepth,
    DrawBuffer,
    ReadBuffer,
    ObjectToWorldMatrix,
    CameraToWorldMatrix,
    ProjectionMatrix,
    InvertY,
}

/// Ordered set of differing fields; framebuffer bindings come first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDiff {
    fields: Vec<StateField>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn contains(&self, field: StateField) -> bool {
        self.fields.contains(&field)
    }

    pub fn iter(&self) -> impl Iterator<Item = StateField> + '_ {
        self.fields.iter().copied()
    }
}
