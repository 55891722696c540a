use std::collections::HashMap;

use serde::Serialize;
use shaderprep::{lexer, ShaderStage};

use super::{
    DrawCall, FramebufferStatus, NativeDevice, NativeFramebuffer, ProgramObject, ShaderBackend,
    StageObject,
};
use crate::framebuffer::{Attachment, AttachmentKind, AttachmentPoint};
use crate::shader::reflect::{scan_declarations, ArraySize};
use crate::shader::{ActiveAttribute, ActiveUniform, GlslType, UniformValue};
use crate::types::{
    BlendState, Color4, CullFace, DepthTest, DrawBuffer, Face, FramebufferTarget, LogicOp, Rect2D,
    RenderMode, ShadeMode, StencilOps, StencilTest, TextureId, TextureRef,
};

/// One recorded driver invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeCall {
    CompileStage { stage: ShaderStage, object: StageObject },
    DeleteStage(StageObject),
    Link { program: ProgramObject, stages: Vec<StageObject> },
    DeleteProgram(ProgramObject),
    Viewport(Rect2D),
    Scissor(Option<Rect2D>),
    DepthTest(Option<DepthTest>),
    DepthWrite(bool),
    ColorMask { rgb: bool, alpha: bool },
    StencilFunc(Option<(StencilTest, i32)>),
    StencilOp { face: Face, ops: StencilOps },
    Blend { buffer: usize, state: Option<BlendState> },
    LogicOp(Option<LogicOp>),
    CullFace(CullFace),
    PolygonMode(RenderMode),
    PolygonOffset { factor: f32, units: f32 },
    PointSize(f32),
    DepthRange { near: f32, far: f32 },
    FramebufferSrgb(bool),
    ShadeModel(ShadeMode),
    ClearColor(Color4),
    ClearDepth(f32),
    ClearStencil(i32),
    DrawBuffer(DrawBuffer),
    ReadBuffer(DrawBuffer),
    CreateFramebuffer(NativeFramebuffer),
    BindFramebuffer {
        target: FramebufferTarget,
        framebuffer: Option<NativeFramebuffer>,
    },
    Attach {
        framebuffer: NativeFramebuffer,
        point: AttachmentPoint,
        texture: Option<TextureId>,
    },
    Detach {
        framebuffer: NativeFramebuffer,
        point: AttachmentPoint,
    },
    SetDrawBuffers {
        framebuffer: NativeFramebuffer,
        buffers: Vec<AttachmentPoint>,
    },
    FramebufferStatus(NativeFramebuffer),
    DeleteFramebuffer(NativeFramebuffer),
    UseProgram(Option<ProgramObject>),
    /// `bytes` is the std140 payload the driver receives.
    SetUniform {
        program: ProgramObject,
        location: i32,
        bytes: Vec<u8>,
    },
    BindTexture { unit: u32, texture: TextureId },
    Clear { color: bool, depth: bool, stencil: bool },
    Draw(DrawCall),
    DispatchCompute([u32; 3]),
}

impl NativeCall {
    /// Fixed-function state changes, as opposed to object, shader or draw calls.
    pub fn is_state_change(&self) -> bool {
        matches!(
            self,
            NativeCall::Viewport(_)
                | NativeCall::Scissor(_)
                | NativeCall::DepthTest(_)
                | NativeCall::DepthWrite(_)
                | NativeCall::ColorMask { .. }
                | NativeCall::StencilFunc(_)
                | NativeCall::StencilOp { .. }
                | NativeCall::Blend { .. }
                | NativeCall::LogicOp(_)
                | NativeCall::CullFace(_)
                | NativeCall::PolygonMode(_)
                | NativeCall::PolygonOffset { .. }
                | NativeCall::PointSize(_)
                | NativeCall::DepthRange { .. }
                | NativeCall::FramebufferSrgb(_)
                | NativeCall::ShadeModel(_)
                | NativeCall::ClearColor(_)
                | NativeCall::ClearDepth(_)
                | NativeCall::ClearStencil(_)
                | NativeCall::DrawBuffer(_)
                | NativeCall::ReadBuffer(_)
        )
    }

    /// Attach, detach and draw-buffer calls on framebuffer objects.
    pub fn is_attachment_change(&self) -> bool {
        matches!(
            self,
            NativeCall::Attach { .. } | NativeCall::Detach { .. } | NativeCall::SetDrawBuffers { .. }
        )
    }
}

/// Device stub that records every call instead of talking to a driver.
///
/// Compilation succeeds unless a stage contains the configured failure
/// marker; reflection reports every declared uniform as active unless a
/// result was scripted.
#[derive(Debug)]
pub struct RecordingDevice {
    calls: Vec<NativeCall>,
    next_object: u32,
    stages: HashMap<StageObject, (ShaderStage, String)>,
    programs: HashMap<ProgramObject, Vec<(ShaderStage, String)>>,
    fail_marker: Option<String>,
    scripted_uniforms: Option<Vec<ActiveUniform>>,
    scripted_attributes: Option<Vec<ActiveAttribute>>,
    status: FramebufferStatus,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            next_object: 1,
            stages: HashMap::new(),
            programs: HashMap::new(),
            fail_marker: None,
            scripted_uniforms: None,
            scripted_attributes: None,
            status: FramebufferStatus::Complete,
        }
    }
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[NativeCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<NativeCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn count(&self, predicate: impl Fn(&NativeCall) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(*call)).count()
    }

    pub fn state_change_count(&self) -> usize {
        self.count(NativeCall::is_state_change)
    }

    pub fn compile_count(&self) -> usize {
        self.count(|call| matches!(call, NativeCall::CompileStage { .. }))
    }

    pub fn link_count(&self) -> usize {
        self.count(|call| matches!(call, NativeCall::Link { .. }))
    }

    /// Makes every stage whose source contains `marker` fail to compile.
    pub fn fail_compiles_containing(&mut self, marker: impl Into<String>) {
        self.fail_marker = Some(marker.into());
    }

    pub fn clear_compile_failures(&mut self) {
        self.fail_marker = None;
    }

    pub fn script_uniforms(&mut self, uniforms: Vec<ActiveUniform>) {
        self.scripted_uniforms = Some(uniforms);
    }

    pub fn script_attributes(&mut self, attributes: Vec<ActiveAttribute>) {
        self.scripted_attributes = Some(attributes);
    }

    pub fn set_framebuffer_status(&mut self, status: FramebufferStatus) {
        self.status = status;
    }

    fn next(&mut self) -> u32 {
        let object = self.next_object;
        self.next_object += 1;
        object
    }

    fn record(&mut self, call: NativeCall) {
        self.calls.push(call);
    }
}

/// `<file>(<line>) : error : ...` for the first line containing `marker`.
fn scripted_failure_log(source: &str, marker: &str) -> Option<String> {
    lexer::scan(source)
        .into_iter()
        .find(|line| line.text.contains(marker))
        .map(|line| {
            format!(
                "{}({}) : error : scripted compile failure ({marker})\n",
                line.location.file, line.location.line
            )
        })
}

impl ShaderBackend for RecordingDevice {
    fn compile_stage(&mut self, stage: ShaderStage, source: &str) -> Result<StageObject, String> {
        if let Some(marker) = self.fail_marker.as_deref() {
            if let Some(log) = scripted_failure_log(source, marker) {
                return Err(log);
            }
        }
        let object = StageObject(self.next());
        self.stages.insert(object, (stage, source.to_string()));
        self.record(NativeCall::CompileStage { stage, object });
        Ok(object)
    }

    fn delete_stage(&mut self, stage: StageObject) {
        self.stages.remove(&stage);
        self.record(NativeCall::DeleteStage(stage));
    }

    fn link(&mut self, stages: &[StageObject]) -> Result<ProgramObject, String> {
        if stages.is_empty() {
            return Err("link error : program has no stages\n".into());
        }
        let mut sources = Vec::with_capacity(stages.len());
        for stage in stages {
            let source = self
                .stages
                .get(stage)
                .cloned()
                .ok_or_else(|| format!("link error : unknown stage object {}\n", stage.0))?;
            sources.push(source);
        }
        let program = ProgramObject(self.next());
        self.programs.insert(program, sources);
        self.record(NativeCall::Link {
            program,
            stages: stages.to_vec(),
        });
        Ok(program)
    }

    fn active_uniforms(&mut self, program: ProgramObject) -> Vec<ActiveUniform> {
        if let Some(scripted) = &self.scripted_uniforms {
            return scripted.clone();
        }
        let mut uniforms: Vec<ActiveUniform> = Vec::new();
        let mut location = 0;
        for (_, source) in self.programs.get(&program).into_iter().flatten() {
            for decl in scan_declarations(source, &["uniform"]) {
                if uniforms.iter().any(|u| u.name == decl.name) {
                    continue;
                }
                let size = match decl.array {
                    Some(ArraySize::Literal(n)) => n,
                    _ => 1,
                };
                uniforms.push(ActiveUniform {
                    name: decl.name,
                    ty: GlslType::from_glsl(&decl.ty),
                    size,
                    location,
                });
                location += size as i32;
            }
        }
        uniforms
    }

    fn active_attributes(&mut self, program: ProgramObject) -> Vec<ActiveAttribute> {
        if let Some(scripted) = &self.scripted_attributes {
            return scripted.clone();
        }
        self.programs
            .get(&program)
            .into_iter()
            .flatten()
            .filter(|(stage, _)| *stage == ShaderStage::Vertex)
            .flat_map(|(_, source)| scan_declarations(source, &["in", "attribute"]))
            .enumerate()
            .map(|(location, decl)| ActiveAttribute {
                name: decl.name,
                ty: GlslType::from_glsl(&decl.ty),
                location: location as i32,
            })
            .collect()
    }

    fn delete_program(&mut self, program: ProgramObject) {
        self.programs.remove(&program);
        self.record(NativeCall::DeleteProgram(program));
    }
}

impl NativeDevice for RecordingDevice {
    fn viewport(&mut self, rect: Rect2D) {
        self.record(NativeCall::Viewport(rect));
    }

    fn scissor(&mut self, rect: Option<Rect2D>) {
        self.record(NativeCall::Scissor(rect));
    }

    fn depth_test(&mut self, test: Option<DepthTest>) {
        self.record(NativeCall::DepthTest(test));
    }

    fn depth_write(&mut self, enabled: bool) {
        self.record(NativeCall::DepthWrite(enabled));
    }

    fn color_mask(&mut self, rgb: bool, alpha: bool) {
        self.record(NativeCall::ColorMask { rgb, alpha });
    }

    fn stencil_func(&mut self, test: Option<(StencilTest, i32)>) {
        self.record(NativeCall::StencilFunc(test));
    }

    fn stencil_op(&mut self, face: Face, ops: StencilOps) {
        self.record(NativeCall::StencilOp { face, ops });
    }

    fn blend(&mut self, buffer: usize, state: Option<BlendState>) {
        self.record(NativeCall::Blend { buffer, state });
    }

    fn logic_op(&mut self, op: Option<LogicOp>) {
        self.record(NativeCall::LogicOp(op));
    }

    fn cull_face(&mut self, face: CullFace) {
        self.record(NativeCall::CullFace(face));
    }

    fn polygon_mode(&mut self, mode: RenderMode) {
        self.record(NativeCall::PolygonMode(mode));
    }

    fn polygon_offset(&mut self, factor: f32, units: f32) {
        self.record(NativeCall::PolygonOffset { factor, units });
    }

    fn point_size(&mut self, size: f32) {
        self.record(NativeCall::PointSize(size));
    }

    fn depth_range(&mut self, near: f32, far: f32) {
        self.record(NativeCall::DepthRange { near, far });
    }

    fn framebuffer_srgb(&mut self, enabled: bool) {
        self.record(NativeCall::FramebufferSrgb(enabled));
    }

    fn shade_model(&mut self, mode: ShadeMode) {
        self.record(NativeCall::ShadeModel(mode));
    }

    fn clear_color(&mut self, color: Color4) {
        self.record(NativeCall::ClearColor(color));
    }

    fn clear_depth(&mut self, depth: f32) {
        self.record(NativeCall::ClearDepth(depth));
    }

    fn clear_stencil(&mut self, value: i32) {
        self.record(NativeCall::ClearStencil(value));
    }

    fn draw_buffer(&mut self, buffer: DrawBuffer) {
        self.record(NativeCall::DrawBuffer(buffer));
    }

    fn read_buffer(&mut self, buffer: DrawBuffer) {
        self.record(NativeCall::ReadBuffer(buffer));
    }

    fn create_framebuffer(&mut self) -> NativeFramebuffer {
        let framebuffer = NativeFramebuffer(self.next());
        self.record(NativeCall::CreateFramebuffer(framebuffer));
        framebuffer
    }

    fn bind_framebuffer(&mut self, target: FramebufferTarget, framebuffer: Option<NativeFramebuffer>) {
        self.record(NativeCall::BindFramebuffer { target, framebuffer });
    }

    fn attach(&mut self, framebuffer: NativeFramebuffer, attachment: &Attachment) {
        let texture = match attachment.kind {
            AttachmentKind::Texture(texture) => Some(texture.id),
            AttachmentKind::Dummy => None,
        };
        self.record(NativeCall::Attach {
            framebuffer,
            point: attachment.point,
            texture,
        });
    }

    fn detach(&mut self, framebuffer: NativeFramebuffer, point: AttachmentPoint) {
        self.record(NativeCall::Detach { framebuffer, point });
    }

    fn set_draw_buffers(&mut self, framebuffer: NativeFramebuffer, buffers: &[AttachmentPoint]) {
        self.record(NativeCall::SetDrawBuffers {
            framebuffer,
            buffers: buffers.to_vec(),
        });
    }

    fn framebuffer_status(&mut self, framebuffer: NativeFramebuffer) -> FramebufferStatus {
        self.record(NativeCall::FramebufferStatus(framebuffer));
        self.status
    }

    fn delete_framebuffer(&mut self, framebuffer: NativeFramebuffer) {
        self.record(NativeCall::DeleteFramebuffer(framebuffer));
    }

    fn use_program(&mut self, program: Option<ProgramObject>) {
        self.record(NativeCall::UseProgram(program));
    }

    fn set_uniform(&mut self, program: ProgramObject, location: i32, value: &UniformValue) {
        self.record(NativeCall::SetUniform {
            program,
            location,
            bytes: value.to_bytes(),
        });
    }

    fn bind_texture(&mut self, unit: u32, texture: &TextureRef) {
        self.record(NativeCall::BindTexture {
            unit,
            texture: texture.id,
        });
    }

    fn clear(&mut self, color: bool, depth: bool, stencil: bool) {
        self.record(NativeCall::Clear { color, depth, stencil });
    }

    fn draw(&mut self, call: &DrawCall) {
        self.record(NativeCall::Draw(*call));
    }

    fn dispatch_compute(&mut self, groups: [u32; 3]) {
        self.record(NativeCall::DispatchCompute(groups));
    }
}
