//! Ties the state stack, framebuffers and shader cache together for clears,
//! draws and compute dispatches.

use std::borrow::Cow;
use std::collections::HashMap;

use tracing::{trace, warn};

use crate::framebuffer::{Completeness, Framebuffer, FramebufferId};
use crate::native::{DrawCall, NativeDevice};
use crate::shader::{Args, ArgsDomain, ShaderError, ShaderId, ShaderManager, ShaderProgram, UniformValue};
use crate::snapshot::Matrices;
use crate::stack::StateStack;
use crate::types::FramebufferTarget;

/// Engine matrices as last uploaded, for skipping redundant uploads.
#[derive(Debug, Clone, Copy, PartialEq)]
struct UploadedMatrices {
    program: crate::native::ProgramObject,
    matrices: Matrices,
}

/// A rendering context: one device, its state stack, shader cache and
/// registered framebuffers.
#[derive(Debug)]
pub struct RenderDevice<D: NativeDevice> {
    stack: StateStack<D>,
    shaders: ShaderManager,
    framebuffers: HashMap<FramebufferId, Framebuffer>,
    /// Binding known to be on the device; `None` until first bound.
    bound_draw: Option<Option<FramebufferId>>,
    bound_read: Option<Option<FramebufferId>>,
    uploaded: Option<UploadedMatrices>,
}

impl<D: NativeDevice> RenderDevice<D> {
    /// Context over a `width` x `height` display surface with a default shader cache.
    pub fn new(device: D, width: u32, height: u32) -> Self {
        Self::from_parts(StateStack::new(device, width, height), ShaderManager::default())
    }

    pub fn from_parts(stack: StateStack<D>, shaders: ShaderManager) -> Self {
        Self {
            stack,
            shaders,
            framebuffers: HashMap::new(),
            bound_draw: None,
            bound_read: None,
            uploaded: None,
        }
    }

    pub fn state(&self) -> &StateStack<D> {
        &self.stack
    }

    /// Setter access; framebuffer ids passed here must be registered.
    pub fn state_mut(&mut self) -> &mut StateStack<D> {
        &mut self.stack
    }

    pub fn device(&self) -> &D {
        self.stack.device()
    }

    pub fn device_mut(&mut self) -> &mut D {
        self.stack.device_mut()
    }

    pub fn shaders(&self) -> &ShaderManager {
        &self.shaders
    }

    pub fn shaders_mut(&mut self) -> &mut ShaderManager {
        &mut self.shaders
    }

    /// Registers `framebuffer` so it can be targeted by id.
    pub fn add_framebuffer(&mut self, framebuffer: Framebuffer) -> FramebufferId {
        let id = framebuffer.id();
        self.framebuffers.insert(id, framebuffer);
        id
    }

    pub fn framebuffer(&self, id: FramebufferId) -> Option<&Framebuffer> {
        self.framebuffers.get(&id)
    }

    /// Attachment edits made here are reconciled at the next bind.
    pub fn framebuffer_mut(&mut self, id: FramebufferId) -> Option<&mut Framebuffer> {
        self.framebuffers.get_mut(&id)
    }

    /// Unregisters a framebuffer and deletes its native object.
    ///
    /// # Panics
    ///
    /// When the framebuffer is the current draw or read target.
    pub fn remove_framebuffer(&mut self, id: FramebufferId) -> Option<Framebuffer> {
        let snapshot = self.stack.snapshot();
        assert!(
            snapshot.draw_framebuffer != Some(id) && snapshot.read_framebuffer != Some(id),
            "{id} is still bound"
        );
        let mut framebuffer = self.framebuffers.remove(&id)?;
        framebuffer.release(self.stack.device_mut());
        if self.bound_draw == Some(Some(id)) {
            self.bound_draw = None;
        }
        if self.bound_read == Some(Some(id)) {
            self.bound_read = None;
        }
        Some(framebuffer)
    }

    pub fn push_state(&mut self) {
        self.stack.push();
    }

    /// Pushes and targets a registered framebuffer.
    ///
    /// # Panics
    ///
    /// When `id` is not registered.
    pub fn push_state_with(&mut self, id: FramebufferId) {
        let Some(framebuffer) = self.framebuffers.get(&id) else {
            panic!("{id} is not registered with this render device");
        };
        self.stack.push_with_framebuffer(framebuffer);
    }

    pub fn pop_state(&mut self) {
        self.stack.pop();
    }

    fn registered(&self, id: FramebufferId) -> &Framebuffer {
        match self.framebuffers.get(&id) {
            Some(framebuffer) => framebuffer,
            None => panic!("{id} is not registered with this render device"),
        }
    }

    /// Binds whatever the snapshot targets and reconciles its attachments.
    fn reconcile(&mut self, target: FramebufferTarget) {
        let snapshot = self.stack.snapshot();
        let (want, bound) = match target {
            FramebufferTarget::Draw => (snapshot.draw_framebuffer, self.bound_draw),
            FramebufferTarget::Read => (snapshot.read_framebuffer, self.bound_read),
        };
        let already_bound = bound == Some(want);

        match want {
            Some(id) => {
                let Some(framebuffer) = self.framebuffers.get_mut(&id) else {
                    panic!("{id} is not registered with this render device");
                };
                let device = self.stack.device_mut();
                let changed = !framebuffer.in_sync();
                if framebuffer.bind(device, target, already_bound) {
                    self.stack.count_major_native();
                }
                if changed && target == FramebufferTarget::Draw {
                    let completeness = framebuffer.check_complete(self.stack.device_mut());
                    if !completeness.complete {
                        warn!(framebuffer = %id, reason = %completeness.why_not, "drawing to an incomplete framebuffer");
                    }
                }
            }
            None if !already_bound => {
                self.stack.device_mut().bind_framebuffer(target, None);
                self.stack.count_major_native();
            }
            None => {}
        }
        match target {
            FramebufferTarget::Draw => self.bound_draw = Some(want),
            FramebufferTarget::Read => self.bound_read = Some(want),
        }
    }

    /// Completeness of the current draw target; the display is always complete.
    pub fn check_draw_framebuffer(&mut self) -> Completeness {
        match self.stack.snapshot().draw_framebuffer {
            Some(id) => {
                let Some(framebuffer) = self.framebuffers.get_mut(&id) else {
                    panic!("{id} is not registered with this render device");
                };
                framebuffer.check_complete(self.stack.device_mut())
            }
            None => Completeness {
                complete: true,
                why_not: String::new(),
            },
        }
    }

    /// Clears the current draw target with the snapshot's clear values.
    pub fn clear(&mut self, color: bool, depth: bool, stencil: bool) {
        self.reconcile(FramebufferTarget::Draw);
        self.stack.device_mut().clear(color, depth, stencil);
    }

    /// Runs `shader` with `args` against the current state.
    ///
    /// Reconciles the draw target, appends its uniform arguments, resolves the
    /// variant, uploads engine matrices when stale, binds arguments and
    /// issues the draw or dispatch.
    ///
    /// # Panics
    ///
    /// When a compute program receives draw arguments or a graphics program
    /// receives a compute grid.
    pub fn apply(&mut self, shader: ShaderId, args: &Args) -> Result<(), ShaderError> {
        self.reconcile(FramebufferTarget::Draw);
        let args = match self.stack.snapshot().draw_framebuffer {
            Some(id) => {
                let mut merged = args.clone();
                merged.append(&self.registered(id).uniform_args());
                Cow::Owned(merged)
            }
            None => Cow::Borrowed(args),
        };
        let args = args.as_ref();

        let program = self.shaders.resolve(shader, args, self.stack.device_mut())?;
        let domain = args.domain();
        match (program.is_compute(), domain) {
            (true, ArgsDomain::Draw(_)) => panic!("compute shader invoked with draw arguments"),
            (false, ArgsDomain::Compute(_)) => panic!("graphics shader invoked with a compute grid"),
            _ => {}
        }

        self.stack.device_mut().use_program(Some(program.object()));
        self.stack.count_major(true);
        self.upload_matrices(&program);
        program.bind_args(args, self.stack.device_mut());

        match domain {
            ArgsDomain::Draw(draw) => {
                self.stack.device_mut().draw(&DrawCall {
                    primitive: draw.primitive,
                    first: draw.first,
                    count: draw.count,
                    indexed: draw.indexed,
                    instances: draw.instances,
                });
                let primitives =
                    draw.primitive.primitive_count(draw.count) * u64::from(draw.instances);
                self.stack.count_draw(primitives);
            }
            ArgsDomain::Compute(groups) => {
                self.stack.device_mut().dispatch_compute(groups);
                self.stack.count_draw(0);
            }
        }
        self.stack.device_mut().use_program(None);
        Ok(())
    }

    fn upload_matrices(&mut self, program: &ShaderProgram) {
        let matrices = self.stack.snapshot().matrices;
        let current = UploadedMatrices {
            program: program.object(),
            matrices: Matrices {
                changed: false,
                ..matrices
            },
        };
        if !matrices.changed && self.uploaded == Some(current) {
            return;
        }

        let mut engine = Args::new();
        engine
            .set_uniform("hal_ObjectToWorldMatrix", UniformValue::Mat4(matrices.object_to_world))
            .set_uniform("hal_CameraToWorldMatrix", UniformValue::Mat4(matrices.camera_to_world))
            .set_uniform(
                "hal_WorldToCameraMatrix",
                UniformValue::Mat4(matrices.camera_to_world_inverse),
            )
            .set_uniform(
                "hal_ProjectionMatrix",
                UniformValue::Mat4(matrices.effective_projection()),
            )
            .set_uniform(
                "hal_InvertY",
                UniformValue::Float(if matrices.invert_y { 1.0 } else { 0.0 }),
            );
        program.bind_args(&engine, self.stack.device_mut());
        self.stack.mark_matrices_uploaded();
        self.uploaded = Some(current);
        trace!(program = program.object().0, "uploaded engine matrices");
    }
}
