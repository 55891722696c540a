//! Hierarchically scoped render state with redundant-call elimination.
//!
//! Every setter compares against the cached snapshot and reaches the device
//! only when the value changes. `pop` restores the saved snapshot by
//! replaying exactly the fields that differ.

use serde::Serialize;
use tracing::{trace, warn};

use crate::framebuffer::{Framebuffer, FramebufferId};
use crate::native::NativeDevice;
use crate::snapshot::{DepthRange, PolygonOffset, StateField, StateSnapshot};
use crate::types::{
    BlendState, Color4, CullFace, DepthTest, DrawBuffer, Face, LogicOp, Mat4, Rect2D, RenderMode,
    ShadeMode, StencilOps, StencilTest, MAX_DRAW_BUFFERS,
};

/// Counters describing how much state traffic reached the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateStats {
    /// Setter calls for fixed-function state.
    pub minor_state_changes: u64,
    /// Setter calls that issued at least one native call.
    pub minor_native_state_changes: u64,
    /// Framebuffer and program binding requests.
    pub major_state_changes: u64,
    /// Framebuffer and program bindings issued natively.
    pub major_native_state_changes: u64,
    pub push_states: u64,
    pub primitives: u64,
    pub draws: u64,
}

/// Limits applied to a [`StateStack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackOptions {
    pub max_depth: usize,
    pub track_stats: bool,
}

impl Default for StackOptions {
    fn default() -> Self {
        Self {
            max_depth: 64,
            track_stats: true,
        }
    }
}

/// The current render state, a stack of saved states, and the device they
/// are issued to.
#[derive(Debug)]
pub struct StateStack<D: NativeDevice> {
    device: D,
    current: StateSnapshot,
    saved: Vec<StateSnapshot>,
    surface_width: u32,
    surface_height: u32,
    options: StackOptions,
    stats: StateStats,
}

impl<D: NativeDevice> StateStack<D> {
    /// Stack over a display surface of `width` x `height` pixels.
    ///
    /// The device is assumed to hold the default state; call
    /// [`StateStack::reissue_all`] when it might not.
    pub fn new(device: D, width: u32, height: u32) -> Self {
        Self::with_options(device, width, height, StackOptions::default())
    }

    pub fn with_options(device: D, width: u32, height: u32, options: StackOptions) -> Self {
        Self {
            device,
            current: StateSnapshot::new(width, height),
            saved: Vec::new(),
            surface_width: width,
            surface_height: height,
            options,
            stats: StateStats::default(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    pub fn snapshot(&self) -> &StateSnapshot {
        &self.current
    }

    pub fn depth(&self) -> usize {
        self.saved.len()
    }

    pub fn surface_size(&self) -> (u32, u32) {
        (self.surface_width, self.surface_height)
    }

    pub fn stats(&self) -> &StateStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = StateStats::default();
    }

    /// Updates the display surface size after a resize.
    ///
    /// The viewport and clip are reissued when drawing to the display since
    /// their flipped coordinates depend on the height.
    pub fn resize_surface(&mut self, width: u32, height: u32) {
        self.surface_width = width;
        self.surface_height = height;
        if self.current.matrices.invert_y {
            self.issue_viewport();
            self.issue_scissor();
        }
    }

    /// Issues the whole snapshot to the device, ignoring the cache.
    pub fn reissue_all(&mut self) {
        self.issue_viewport();
        self.issue_scissor();
        self.issue_depth_test();
        self.device.depth_write(self.current.depth_write);
        self.device.color_mask(self.current.color_write, self.current.alpha_write);
        self.issue_stencil_func();
        self.device.clear_stencil(self.current.stencil.clear);
        self.issue_stencil_ops();
        for buffer in 0..MAX_DRAW_BUFFERS {
            self.issue_blend(buffer);
        }
        self.issue_logic_op();
        self.issue_cull_face();
        self.device
            .polygon_offset(self.current.polygon_offset.factor, self.current.polygon_offset.units);
        self.device.polygon_mode(self.current.render_mode);
        self.device.point_size(self.current.point_size);
        self.device
            .depth_range(self.current.depth_range.near, self.current.depth_range.far);
        self.device.framebuffer_srgb(self.current.srgb_conversion);
        self.device.shade_model(self.current.shade_mode);
        self.device.clear_color(self.current.clear_color);
        self.device.clear_depth(self.current.clear_depth);
        self.device.draw_buffer(self.current.draw_buffer);
        self.device.read_buffer(self.current.read_buffer);
        self.current.matrices.changed = true;
    }

    /// Saves the current state.
    ///
    /// # Panics
    ///
    /// When the stack is already at its maximum depth.
    pub fn push(&mut self) {
        assert!(
            self.saved.len() < self.options.max_depth,
            "state stack overflow: more than {} nested pushes",
            self.options.max_depth
        );
        self.saved.push(self.current.clone());
        self.current.matrices.changed = false;
        if self.options.track_stats {
            self.stats.push_states += 1;
        }
        trace!(depth = self.saved.len(), "pushed render state");
    }

    /// Saves the current state, then targets `framebuffer` with a viewport
    /// covering it and no clip.
    pub fn push_with_framebuffer(&mut self, framebuffer: &Framebuffer) {
        self.push();
        self.set_draw_framebuffer(Some(framebuffer.id()));
        self.clear_clip_2d();
        self.set_viewport(framebuffer.rect());
    }

    /// Restores the most recently saved state, reissuing only what differs.
    ///
    /// # Panics
    ///
    /// When nothing was pushed.
    pub fn pop(&mut self) {
        let restored = match self.saved.pop() {
            Some(snapshot) => snapshot,
            None => panic!("pop called on an empty render state stack"),
        };
        let diff = self.current.diff(&restored);
        let flip_changes = diff.contains(StateField::InvertY);

        for field in diff.iter() {
            match field {
                StateField::DrawFramebuffer => {
                    self.bind_framebuffer_field(true, restored.draw_framebuffer);
                }
                StateField::ReadFramebuffer => {
                    self.bind_framebuffer_field(false, restored.read_framebuffer);
                }
                // Reissued once by set_invert_y with the restored values.
                StateField::Viewport if flip_changes => {
                    self.count_minor(false);
                    self.current.viewport = restored.viewport;
                }
                StateField::Clip if flip_changes => {
                    self.current.clip = restored.clip;
                    self.current.clip_enabled = restored.clip_enabled;
                    // set_invert_y only reissues an enabled scissor.
                    if self.count_minor(!restored.clip_enabled) {
                        self.issue_scissor();
                    }
                }
                StateField::CullFace if flip_changes => {
                    self.count_minor(false);
                    self.current.cull_face = restored.cull_face;
                }
                StateField::StencilOp(face) if flip_changes => {
                    let before = self.native_stencil_func();
                    match face {
                        Face::Front => self.current.stencil.front = restored.stencil.front,
                        Face::Back => self.current.stencil.back = restored.stencil.back,
                    }
                    let after = self.native_stencil_func();
                    if self.count_minor(after != before) {
                        self.issue_stencil_func();
                    }
                }
                StateField::Viewport => self.set_viewport(restored.viewport),
                StateField::Clip => {
                    if restored.clip_enabled {
                        self.set_clip_2d(restored.clip);
                    } else {
                        self.clear_clip_2d();
                    }
                }
                StateField::DepthTest => self.set_depth_test(restored.depth_test),
                StateField::DepthWrite => self.set_depth_write(restored.depth_write),
                StateField::ColorWrite => self.set_color_write(restored.color_write),
                StateField::AlphaWrite => self.set_alpha_write(restored.alpha_write),
                StateField::StencilTest => {
                    self.set_stencil_test(restored.stencil.test, restored.stencil.reference)
                }
                StateField::StencilClear => self.set_stencil_clear_value(restored.stencil.clear),
                StateField::StencilOp(face) => {
                    let ops = match face {
                        Face::Front => restored.stencil.front,
                        Face::Back => restored.stencil.back,
                    };
                    self.set_stencil_op_separate(face, ops);
                }
                StateField::Blend(buffer) => self.set_blend_func_buffer(buffer, restored.blend[buffer]),
                StateField::LogicOp => self.set_logic_op(restored.logic_op),
                StateField::CullFace => self.set_cull_face(restored.cull_face),
                StateField::PolygonOffset => self.set_polygon_offset(
                    restored.polygon_offset.factor,
                    restored.polygon_offset.units,
                ),
                StateField::RenderMode => self.set_render_mode(restored.render_mode),
                StateField::PointSize => self.set_point_size(restored.point_size),
                StateField::DepthRange => {
                    self.set_depth_range(restored.depth_range.near, restored.depth_range.far)
                }
                StateField::SrgbConversion => self.set_srgb_conversion(restored.srgb_conversion),
                StateField::ShadeMode => self.set_shade_mode(restored.shade_mode),
                StateField::ClearColor => self.set_color_clear_value(restored.clear_color),
                StateField::ClearDepth => self.set_depth_clear_value(restored.clear_depth),
                StateField::DrawBuffer => self.set_draw_buffer(restored.draw_buffer),
                StateField::ReadBuffer => self.set_read_buffer(restored.read_buffer),
                StateField::ObjectToWorldMatrix => {
                    self.set_object_to_world_matrix(restored.matrices.object_to_world)
                }
                StateField::CameraToWorldMatrix => {
                    self.set_camera_to_world_matrix(restored.matrices.camera_to_world)
                }
                StateField::ProjectionMatrix => self.set_projection_matrix(restored.matrices.projection),
                StateField::InvertY => self.set_invert_y(restored.matrices.invert_y),
            }
        }
        self.current.matrices.changed |= restored.matrices.changed;
        trace!(depth = self.saved.len(), reissued = diff.len(), "popped render state");
    }

    fn count_minor(&mut self, native: bool) -> bool {
        if self.options.track_stats {
            self.stats.minor_state_changes += 1;
            if native {
                self.stats.minor_native_state_changes += 1;
            }
        }
        native
    }

    pub(crate) fn count_major(&mut self, native: bool) {
        if self.options.track_stats {
            self.stats.major_state_changes += 1;
            if native {
                self.stats.major_native_state_changes += 1;
            }
        }
    }

    /// A deferred framebuffer bind that reached the device.
    pub(crate) fn count_major_native(&mut self) {
        if self.options.track_stats {
            self.stats.major_native_state_changes += 1;
        }
    }

    pub(crate) fn count_draw(&mut self, primitives: u64) {
        if self.options.track_stats {
            self.stats.draws += 1;
            self.stats.primitives += primitives;
        }
    }

    pub(crate) fn mark_matrices_uploaded(&mut self) {
        self.current.matrices.changed = false;
    }

    fn flip(&self, rect: Rect2D) -> Rect2D {
        if self.current.matrices.invert_y {
            rect.flipped(self.surface_height as i32)
        } else {
            rect
        }
    }

    fn native_face(&self, face: Face) -> Face {
        if self.current.matrices.invert_y {
            face
        } else {
            face.swapped()
        }
    }

    fn issue_viewport(&mut self) {
        let rect = self.flip(self.current.viewport);
        self.device.viewport(rect);
    }

    fn issue_scissor(&mut self) {
        let rect = self.current.clip_enabled.then(|| self.flip(self.current.clip));
        self.device.scissor(rect);
    }

    fn native_depth_test(&self) -> Option<DepthTest> {
        let s = &self.current;
        (!(s.depth_test == DepthTest::AlwaysPass && !s.depth_write)).then_some(s.depth_test)
    }

    fn issue_depth_test(&mut self) {
        let test = self.native_depth_test();
        self.device.depth_test(test);
    }

    fn native_stencil_func(&self) -> Option<(StencilTest, i32)> {
        let stencil = &self.current.stencil;
        let idle = stencil.test == StencilTest::AlwaysPass
            && stencil.front == StencilOps::KEEP
            && stencil.back == StencilOps::KEEP;
        (!idle).then_some((stencil.test, stencil.reference))
    }

    fn issue_stencil_func(&mut self) {
        let func = self.native_stencil_func();
        self.device.stencil_func(func);
    }

    fn issue_stencil_op(&mut self, face: Face) {
        let ops = match face {
            Face::Front => self.current.stencil.front,
            Face::Back => self.current.stencil.back,
        };
        let native = self.native_face(face);
        self.device.stencil_op(native, ops);
    }

    fn issue_stencil_ops(&mut self) {
        self.issue_stencil_op(Face::Front);
        self.issue_stencil_op(Face::Back);
    }

    fn issue_blend(&mut self, buffer: usize) {
        let state = self.current.blend[buffer];
        self.device
            .blend(buffer, (!state.is_disabled()).then_some(state));
    }

    fn issue_logic_op(&mut self) {
        let op = self.current.logic_op;
        self.device.logic_op((op != LogicOp::Copy).then_some(op));
    }

    fn issue_cull_face(&mut self) {
        let face = if self.current.matrices.invert_y {
            self.current.cull_face
        } else {
            self.current.cull_face.swapped()
        };
        self.device.cull_face(face);
    }

    pub fn set_viewport(&mut self, rect: Rect2D) {
        if !self.count_minor(self.current.viewport != rect) {
            return;
        }
        self.current.viewport = rect;
        self.issue_viewport();
    }

    /// Restricts rendering to `rect`.
    pub fn set_clip_2d(&mut self, rect: Rect2D) {
        let unchanged = self.current.clip_enabled && self.current.clip == rect;
        if !self.count_minor(!unchanged) {
            return;
        }
        self.current.clip_enabled = true;
        self.current.clip = rect;
        self.issue_scissor();
    }

    pub fn clear_clip_2d(&mut self) {
        if !self.count_minor(self.current.clip_enabled) {
            return;
        }
        self.current.clip_enabled = false;
        self.current.clip = Rect2D::INFINITE;
        self.issue_scissor();
    }

    /// `AlwaysPass` combined with depth writes off disables the native test.
    pub fn set_depth_test(&mut self, test: DepthTest) {
        if !self.count_minor(self.current.depth_test != test) {
            return;
        }
        self.current.depth_test = test;
        self.issue_depth_test();
    }

    pub fn set_depth_write(&mut self, enabled: bool) {
        if !self.count_minor(self.current.depth_write != enabled) {
            return;
        }
        let before = self.native_depth_test();
        self.current.depth_write = enabled;
        self.device.depth_write(enabled);
        if self.native_depth_test() != before {
            self.issue_depth_test();
        }
    }

    pub fn set_color_write(&mut self, enabled: bool) {
        if !self.count_minor(self.current.color_write != enabled) {
            return;
        }
        self.current.color_write = enabled;
        self.device.color_mask(enabled, self.current.alpha_write);
    }

    pub fn set_alpha_write(&mut self, enabled: bool) {
        if !self.count_minor(self.current.alpha_write != enabled) {
            return;
        }
        self.current.alpha_write = enabled;
        self.device.color_mask(self.current.color_write, enabled);
    }

    pub fn set_stencil_test(&mut self, test: StencilTest, reference: i32) {
        let stencil = self.current.stencil;
        if !self.count_minor(stencil.test != test || stencil.reference != reference) {
            return;
        }
        self.current.stencil.test = test;
        self.current.stencil.reference = reference;
        self.issue_stencil_func();
    }

    pub fn set_stencil_clear_value(&mut self, value: i32) {
        if !self.count_minor(self.current.stencil.clear != value) {
            return;
        }
        self.current.stencil.clear = value;
        self.device.clear_stencil(value);
    }

    /// Same operations for both faces.
    pub fn set_stencil_op(&mut self, ops: StencilOps) {
        self.set_stencil_op_separate(Face::Front, ops);
        self.set_stencil_op_separate(Face::Back, ops);
    }

    pub fn set_stencil_op_separate(&mut self, face: Face, ops: StencilOps) {
        let slot = match face {
            Face::Front => self.current.stencil.front,
            Face::Back => self.current.stencil.back,
        };
        if !self.count_minor(slot != ops) {
            return;
        }
        let before = self.native_stencil_func();
        match face {
            Face::Front => self.current.stencil.front = ops,
            Face::Back => self.current.stencil.back = ops,
        }
        self.issue_stencil_op(face);
        if self.native_stencil_func() != before {
            self.issue_stencil_func();
        }
    }

    /// Same blending on every draw buffer.
    pub fn set_blend_func(&mut self, state: BlendState) {
        let differing: Vec<usize> = (0..MAX_DRAW_BUFFERS)
            .filter(|&buffer| self.current.blend[buffer] != state)
            .collect();
        if !self.count_minor(!differing.is_empty()) {
            return;
        }
        for buffer in differing {
            self.current.blend[buffer] = state;
            self.issue_blend(buffer);
        }
    }

    /// # Panics
    ///
    /// When `buffer` is not a valid draw buffer index.
    pub fn set_blend_func_buffer(&mut self, buffer: usize, state: BlendState) {
        assert!(
            buffer < MAX_DRAW_BUFFERS,
            "draw buffer index {buffer} out of range"
        );
        if !self.count_minor(self.current.blend[buffer] != state) {
            return;
        }
        self.current.blend[buffer] = state;
        self.issue_blend(buffer);
    }

    pub fn set_logic_op(&mut self, op: LogicOp) {
        if !self.count_minor(self.current.logic_op != op) {
            return;
        }
        self.current.logic_op = op;
        self.issue_logic_op();
    }

    pub fn set_cull_face(&mut self, face: CullFace) {
        if !self.count_minor(self.current.cull_face != face) {
            return;
        }
        self.current.cull_face = face;
        self.issue_cull_face();
    }

    pub fn set_polygon_offset(&mut self, factor: f32, units: f32) {
        let offset = PolygonOffset { factor, units };
        if !self.count_minor(self.current.polygon_offset != offset) {
            return;
        }
        self.current.polygon_offset = offset;
        self.device.polygon_offset(factor, units);
    }

    pub fn set_render_mode(&mut self, mode: RenderMode) {
        if !self.count_minor(self.current.render_mode != mode) {
            return;
        }
        self.current.render_mode = mode;
        self.device.polygon_mode(mode);
    }

    pub fn set_point_size(&mut self, size: f32) {
        if !self.count_minor(self.current.point_size != size) {
            return;
        }
        self.current.point_size = size;
        self.device.point_size(size);
    }

    pub fn set_depth_range(&mut self, near: f32, far: f32) {
        let range = DepthRange { near, far };
        if !self.count_minor(self.current.depth_range != range) {
            return;
        }
        self.current.depth_range = range;
        self.device.depth_range(near, far);
    }

    pub fn set_srgb_conversion(&mut self, enabled: bool) {
        if !self.count_minor(self.current.srgb_conversion != enabled) {
            return;
        }
        self.current.srgb_conversion = enabled;
        self.device.framebuffer_srgb(enabled);
    }

    pub fn set_shade_mode(&mut self, mode: ShadeMode) {
        if !self.count_minor(self.current.shade_mode != mode) {
            return;
        }
        self.current.shade_mode = mode;
        self.device.shade_model(mode);
    }

    pub fn set_color_clear_value(&mut self, color: Color4) {
        if !self.count_minor(self.current.clear_color != color) {
            return;
        }
        self.current.clear_color = color;
        self.device.clear_color(color);
    }

    pub fn set_depth_clear_value(&mut self, depth: f32) {
        if !self.count_minor(self.current.clear_depth != depth) {
            return;
        }
        self.current.clear_depth = depth;
        self.device.clear_depth(depth);
    }

    /// # Panics
    ///
    /// When a colour buffer index is past the last draw buffer.
    pub fn set_draw_buffer(&mut self, buffer: DrawBuffer) {
        check_draw_buffer(buffer);
        if !self.count_minor(self.current.draw_buffer != buffer) {
            return;
        }
        self.current.draw_buffer = buffer;
        self.device.draw_buffer(buffer);
    }

    /// # Panics
    ///
    /// When a colour buffer index is past the last draw buffer.
    pub fn set_read_buffer(&mut self, buffer: DrawBuffer) {
        check_draw_buffer(buffer);
        if !self.count_minor(self.current.read_buffer != buffer) {
            return;
        }
        self.current.read_buffer = buffer;
        self.device.read_buffer(buffer);
    }

    /// Matrices are uploaded as engine uniforms at dispatch, never here.
    pub fn set_object_to_world_matrix(&mut self, matrix: Mat4) {
        self.count_minor(false);
        if self.current.matrices.object_to_world == matrix {
            return;
        }
        self.current.matrices.object_to_world = matrix;
        self.current.matrices.changed = true;
    }

    /// Also caches the inverse; a singular matrix leaves an identity inverse.
    pub fn set_camera_to_world_matrix(&mut self, matrix: Mat4) {
        self.count_minor(false);
        if self.current.matrices.camera_to_world == matrix {
            return;
        }
        let inverse = matrix.affine_inverse().unwrap_or_else(|| {
            warn!("camera-to-world matrix is singular; using identity inverse");
            Mat4::IDENTITY
        });
        let matrices = &mut self.current.matrices;
        matrices.camera_to_world = matrix;
        matrices.camera_to_world_inverse = inverse;
        matrices.changed = true;
    }

    pub fn set_projection_matrix(&mut self, matrix: Mat4) {
        self.count_minor(false);
        if self.current.matrices.projection == matrix {
            return;
        }
        self.current.matrices.projection = matrix;
        self.current.matrices.changed = true;
    }

    /// Targets `framebuffer`, or the display surface for `None`. The native
    /// bind happens lazily at the next clear or draw.
    pub fn set_draw_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.bind_framebuffer_field(true, framebuffer);
        self.set_invert_y(framebuffer.is_none());
    }

    pub fn set_read_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.bind_framebuffer_field(false, framebuffer);
    }

    fn bind_framebuffer_field(&mut self, draw: bool, framebuffer: Option<FramebufferId>) {
        let slot = if draw {
            &mut self.current.draw_framebuffer
        } else {
            &mut self.current.read_framebuffer
        };
        if *slot == framebuffer {
            return;
        }
        *slot = framebuffer;
        self.count_major(false);
    }

    /// Switches between display-surface (top-down) and framebuffer
    /// (bottom-up) orientation. Viewport, clip, cull face and stencil
    /// operations are reissued since their native values depend on it.
    pub fn set_invert_y(&mut self, invert: bool) {
        if !self.count_minor(self.current.matrices.invert_y != invert) {
            return;
        }
        self.current.matrices.invert_y = invert;
        self.current.matrices.changed = true;
        self.issue_viewport();
        if self.current.clip_enabled {
            self.issue_scissor();
        }
        self.issue_cull_face();
        self.issue_stencil_ops();
    }
}

fn check_draw_buffer(buffer: DrawBuffer) {
    if let DrawBuffer::Color(index) = buffer {
        assert!(
            usize::from(index) < MAX_DRAW_BUFFERS,
            "colour buffer index {index} out of range"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{NativeCall, RecordingDevice};
    use crate::types::{BlendEq, BlendFunc, StencilOp, TextureFormat, TextureRef};
    use crate::framebuffer::AttachmentPoint;

    fn stack() -> StateStack<RecordingDevice> {
        StateStack::new(RecordingDevice::new(), 640, 480)
    }

    #[test]
    fn repeated_setters_reach_the_device_once() {
        let mut stack = stack();
        stack.set_point_size(3.0);
        stack.set_point_size(3.0);
        stack.set_cull_face(CullFace::Front);
        stack.set_cull_face(CullFace::Front);
        assert_eq!(stack.device().state_change_count(), 2);
        assert_eq!(stack.stats().minor_state_changes, 4);
        assert_eq!(stack.stats().minor_native_state_changes, 2);
    }

    #[test]
    fn pop_reissues_only_changed_fields() {
        let mut stack = stack();
        stack.push();
        stack.set_depth_test(DepthTest::Greater);
        stack.set_blend_func_buffer(2, BlendState::ALPHA);
        stack.set_point_size(2.0);
        stack.set_point_size(1.0);
        stack.device_mut().clear_calls();

        stack.pop();
        assert_eq!(
            stack.device().calls(),
            &[
                NativeCall::DepthTest(Some(DepthTest::Less)),
                NativeCall::Blend { buffer: 2, state: None },
            ]
        );
        assert_eq!(stack.snapshot(), &StateSnapshot::new(640, 480));
    }

    #[test]
    #[should_panic(expected = "empty render state stack")]
    fn pop_without_push_panics() {
        stack().pop();
    }

    #[test]
    #[should_panic(expected = "state stack overflow")]
    fn depth_is_bounded() {
        let options = StackOptions {
            max_depth: 2,
            track_stats: true,
        };
        let mut stack = StateStack::with_options(RecordingDevice::new(), 8, 8, options);
        stack.push();
        stack.push();
        stack.push();
    }

    #[test]
    fn always_pass_without_writes_disables_depth_test() {
        let mut stack = stack();
        stack.set_depth_test(DepthTest::AlwaysPass);
        stack.set_depth_write(false);
        assert_eq!(
            stack.device().calls(),
            &[
                NativeCall::DepthTest(Some(DepthTest::AlwaysPass)),
                NativeCall::DepthWrite(false),
                NativeCall::DepthTest(None),
            ]
        );
    }

    #[test]
    fn display_viewport_is_flipped() {
        let mut stack = stack();
        stack.set_viewport(Rect2D::new(0, 0, 100, 80));
        assert_eq!(
            stack.device().calls(),
            &[NativeCall::Viewport(Rect2D::new(0, 400, 100, 480))]
        );
    }

    #[test]
    fn framebuffer_targets_swap_faces() {
        let mut stack = stack();
        let mut fb = Framebuffer::new("offscreen");
        fb.set(
            AttachmentPoint::Color(0),
            Some(TextureRef::new_2d(1, TextureFormat::Rgba8, 256, 128)),
        );
        stack.set_stencil_op_separate(
            Face::Front,
            StencilOps::new(StencilOp::Keep, StencilOp::Keep, StencilOp::Replace),
        );
        stack.device_mut().clear_calls();

        stack.push_with_framebuffer(&fb);
        let calls = stack.device().calls().to_vec();
        assert!(calls.contains(&NativeCall::CullFace(CullFace::Front)));
        assert!(calls.contains(&NativeCall::StencilOp {
            face: Face::Back,
            ops: StencilOps::new(StencilOp::Keep, StencilOp::Keep, StencilOp::Replace),
        }));
        assert!(calls.contains(&NativeCall::Viewport(Rect2D::new(0, 0, 256, 128))));
        assert!(!stack.snapshot().matrices.invert_y);
        assert_eq!(stack.stats().major_state_changes, 1);

        stack.device_mut().clear_calls();
        stack.pop();
        let calls = stack.device().calls();
        // Viewport once, cull face once, two stencil faces.
        assert_eq!(calls.iter().filter(|c| c.is_state_change()).count(), 4);
        assert!(calls.contains(&NativeCall::Viewport(Rect2D::new(0, 0, 640, 480))));
        assert!(stack.snapshot().matrices.invert_y);
    }

    fn offscreen() -> Framebuffer {
        let mut fb = Framebuffer::new("offscreen");
        fb.set(
            AttachmentPoint::Color(0),
            Some(TextureRef::new_2d(1, TextureFormat::Rgba8, 256, 128)),
        );
        fb
    }

    #[test]
    fn pop_to_display_disables_framebuffer_clip() {
        let mut stack = stack();
        let fb = offscreen();
        stack.push_with_framebuffer(&fb);
        stack.set_clip_2d(Rect2D::new(1, 1, 10, 10));
        stack.device_mut().clear_calls();

        stack.pop();
        assert!(!stack.snapshot().clip_enabled);
        assert_eq!(
            stack.device().count(|call| matches!(call, NativeCall::Scissor(_))),
            1
        );
        assert!(stack.device().calls().contains(&NativeCall::Scissor(None)));
    }

    #[test]
    fn pop_to_display_reflips_enabled_clip() {
        let mut stack = stack();
        let fb = offscreen();
        stack.set_clip_2d(Rect2D::new(0, 0, 100, 80));
        stack.push_with_framebuffer(&fb);
        stack.device_mut().clear_calls();

        stack.pop();
        assert_eq!(
            stack.device().count(|call| matches!(call, NativeCall::Scissor(_))),
            1
        );
        assert!(stack
            .device()
            .calls()
            .contains(&NativeCall::Scissor(Some(Rect2D::new(0, 400, 100, 480)))));
    }

    #[test]
    fn pop_across_orientation_change_restores_stencil_func() {
        let mut stack = stack();
        let fb = offscreen();
        stack.push_with_framebuffer(&fb);
        stack.set_stencil_op(StencilOps::new(StencilOp::Keep, StencilOp::Keep, StencilOp::Replace));
        assert!(stack
            .device()
            .calls()
            .contains(&NativeCall::StencilFunc(Some((StencilTest::AlwaysPass, 0)))));
        stack.device_mut().clear_calls();

        stack.pop();
        let calls = stack.device().calls();
        assert!(calls.contains(&NativeCall::StencilFunc(None)));
        assert!(calls.contains(&NativeCall::StencilOp {
            face: Face::Front,
            ops: StencilOps::KEEP,
        }));
        assert!(calls.contains(&NativeCall::StencilOp {
            face: Face::Back,
            ops: StencilOps::KEEP,
        }));
    }

    #[test]
    fn matrices_never_reach_the_device() {
        let mut stack = stack();
        stack.push();
        stack.set_projection_matrix(Mat4::diagonal(2.0, 2.0, 1.0, 1.0));
        stack.set_camera_to_world_matrix(Mat4::translation(0.0, 1.0, 5.0));
        assert!(stack.snapshot().matrices.changed);
        assert_eq!(
            stack.snapshot().matrices.camera_to_world_inverse,
            Mat4::translation(0.0, -1.0, -5.0)
        );
        stack.pop();
        assert!(stack.device().calls().is_empty());
        assert_eq!(stack.snapshot().matrices.projection, Mat4::IDENTITY);
    }

    #[test]
    fn blend_all_updates_only_differing_buffers() {
        let mut stack = stack();
        let additive = BlendState::uniform(BlendFunc::One, BlendFunc::One, BlendEq::Add);
        stack.set_blend_func_buffer(0, additive);
        stack.device_mut().clear_calls();
        stack.set_blend_func(additive);
        assert_eq!(stack.device().calls().len(), MAX_DRAW_BUFFERS - 1);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn colour_buffer_index_is_bounded() {
        stack().set_draw_buffer(DrawBuffer::Color(16));
    }
}
