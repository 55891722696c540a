//! The boundary to the graphics driver.
//!
//! Everything above this module reasons about cached state and only reaches
//! the driver through these traits, one method per native call, so that the
//! number of calls a higher-level operation costs is observable.
//!
//! Types:
//!
//! - `ShaderBackend` compiles, links and reflects programs.
//! - `NativeDevice` adds fixed-function state, framebuffer objects, uniform
//!   upload and draw submission.
//! - `RecordingDevice` implements both by appending a `NativeCall` per
//!   invocation; it backs the tests and the `shadecheck trace` command.

mod recording;

use std::fmt;

use serde::Serialize;
use shaderprep::ShaderStage;

use crate::framebuffer::{Attachment, AttachmentPoint};
use crate::shader::{ActiveAttribute, ActiveUniform, UniformValue};
use crate::types::{
    BlendState, Color4, CullFace, DepthTest, DrawBuffer, Face, FramebufferTarget, LogicOp,
    PrimitiveType, Rect2D, RenderMode, ShadeMode, StencilOps, StencilTest, TextureRef,
};

pub use recording::{NativeCall, RecordingDevice};

/// Compiled but unlinked stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StageObject(pub u32);

/// Linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ProgramObject(pub u32);

/// Driver framebuffer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NativeFramebuffer(pub u32);

/// Completeness status reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FramebufferStatus {
    Complete,
    IncompleteAttachment,
    Unsupported,
    MissingAttachment,
    MissingDrawBuffer,
    MissingReadBuffer,
    Unknown(u32),
}

impl fmt::Display for FramebufferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramebufferStatus::Complete => f.write_str("Framebuffer complete"),
            FramebufferStatus::IncompleteAttachment => f.write_str("Framebuffer Incomplete: Incomplete Attachment"),
            FramebufferStatus::Unsupported => f.write_str("Unsupported framebuffer format"),
            FramebufferStatus::MissingAttachment => f.write_str("Framebuffer Incomplete: Missing attachment"),
            FramebufferStatus::MissingDrawBuffer => f.write_str("Framebuffer Incomplete: Missing draw buffer"),
            FramebufferStatus::MissingReadBuffer => f.write_str("Framebuffer Incomplete: Missing read buffer"),
            FramebufferStatus::Unknown(code) => write!(f, "Unknown framebuffer status 0x{code:X}"),
        }
    }
}

/// Parameters of one draw submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrawCall {
    pub primitive: PrimitiveType,
    pub first: u32,
    pub count: u32,
    pub indexed: bool,
    pub instances: u32,
}

/// Shader compilation half of the driver.
///
/// Failures carry the driver's log text. Logs should name locations as
/// `<file index>(<line>)` so `FileTable::remap_log` can restore file names.
pub trait ShaderBackend {
    fn compile_stage(&mut self, stage: ShaderStage, source: &str) -> Result<StageObject, String>;

    fn delete_stage(&mut self, stage: StageObject);

    fn link(&mut self, stages: &[StageObject]) -> Result<ProgramObject, String>;

    fn active_uniforms(&mut self, program: ProgramObject) -> Vec<ActiveUniform>;

    fn active_attributes(&mut self, program: ProgramObject) -> Vec<ActiveAttribute>;

    fn delete_program(&mut self, program: ProgramObject);
}

/// Full driver surface used by the state stack, framebuffers and dispatch.
pub trait NativeDevice: ShaderBackend {
    fn viewport(&mut self, rect: Rect2D);
    /// `None` disables scissoring.
    fn scissor(&mut self, rect: Option<Rect2D>);
    /// `None` disables the depth test.
    fn depth_test(&mut self, test: Option<DepthTest>);
    fn depth_write(&mut self, enabled: bool);
    fn color_mask(&mut self, rgb: bool, alpha: bool);
    /// `None` disables the stencil test.
    fn stencil_func(&mut self, test: Option<(StencilTest, i32)>);
    fn stencil_op(&mut self, face: Face, ops: StencilOps);
    /// `None` disables blending on `buffer`.
    fn blend(&mut self, buffer: usize, state: Option<BlendState>);
    /// `None` disables the logic op.
    fn logic_op(&mut self, op: Option<LogicOp>);
    fn cull_face(&mut self, face: CullFace);
    fn polygon_mode(&mut self, mode: RenderMode);
    fn polygon_offset(&mut self, factor: f32, units: f32);
    fn point_size(&mut self, size: f32);
    fn depth_range(&mut self, near: f32, far: f32);
    fn framebuffer_srgb(&mut self, enabled: bool);
    fn shade_model(&mut self, mode: ShadeMode);
    fn clear_color(&mut self, color: Color4);
    fn clear_depth(&mut self, depth: f32);
    fn clear_stencil(&mut self, value: i32);
    fn draw_buffer(&mut self, buffer: DrawBuffer);
    fn read_buffer(&mut self, buffer: DrawBuffer);

    fn create_framebuffer(&mut self) -> NativeFramebuffer;
    /// `None` binds the display surface.
    fn bind_framebuffer(&mut self, target: FramebufferTarget, framebuffer: Option<NativeFramebuffer>);
    /// Attaches or replaces whatever is at `attachment.point`.
    fn attach(&mut self, framebuffer: NativeFramebuffer, attachment: &Attachment);
    fn detach(&mut self, framebuffer: NativeFramebuffer, point: AttachmentPoint);
    /// Empty `buffers` means no draw buffer.
    fn set_draw_buffers(&mut self, framebuffer: NativeFramebuffer, buffers: &[AttachmentPoint]);
    fn framebuffer_status(&mut self, framebuffer: NativeFramebuffer) -> FramebufferStatus;
    fn delete_framebuffer(&mut self, framebuffer: NativeFramebuffer);

    fn use_program(&mut self, program: Option<ProgramObject>);
    fn set_uniform(&mut self, program: ProgramObject, location: i32, value: &UniformValue);
    fn bind_texture(&mut self, unit: u32, texture: &TextureRef);
    fn clear(&mut self, color: bool, depth: bool, stencil: bool);
    fn draw(&mut self, call: &DrawCall);
    fn dispatch_compute(&mut self, groups: [u32; 3]);
}
