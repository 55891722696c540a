//! Render targets with lazily reconciled attachments.
//!
//! Setting an attachment only edits the desired list. Native attach and
//! detach calls happen when the framebuffer is bound or explicitly synced,
//! and only for attachment points whose binding actually changed.

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

use serde::Serialize;
use tracing::{debug, warn};

use crate::native::{FramebufferStatus, NativeDevice, NativeFramebuffer};
use crate::shader::{Args, UniformValue};
use crate::types::{
    Color4, CubeFace, FramebufferTarget, Rect2D, TextureRef, MAX_DRAW_BUFFERS,
};

static NEXT_FRAMEBUFFER_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique handle naming a framebuffer in state snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FramebufferId(pub u32);

impl FramebufferId {
    fn next() -> Self {
        FramebufferId(NEXT_FRAMEBUFFER_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

impl fmt::Display for FramebufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "framebuffer#{}", self.0)
    }
}

/// Where an attachment is bound. Sorts colour points by index, then depth,
/// stencil, depth-stencil and finally the geometry-only point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum AttachmentPoint {
    Color(u8),
    Depth,
    Stencil,
    DepthAndStencil,
    NoAttachment,
}

impl AttachmentPoint {
    pub fn is_color(self) -> bool {
        matches!(self, AttachmentPoint::Color(_))
    }
}

impl fmt::Display for AttachmentPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentPoint::Color(index) => write!(f, "COLOR{index}"),
            AttachmentPoint::Depth => f.write_str("DEPTH"),
            AttachmentPoint::Stencil => f.write_str("STENCIL"),
            AttachmentPoint::DepthAndStencil => f.write_str("DEPTH_AND_STENCIL"),
            AttachmentPoint::NoAttachment => f.write_str("NO_ATTACHMENT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum AttachmentKind {
    Texture(TextureRef),
    /// Carries geometry only; used by framebuffers without attachments.
    Dummy,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Attachment {
    pub point: AttachmentPoint,
    pub kind: AttachmentKind,
    pub cube_face: Option<CubeFace>,
    pub mip_level: u32,
    /// Single layer of an array or 3D texture; `None` attaches all layers.
    pub layer: Option<u32>,
    pub clear_value: Option<Color4>,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub samples: u32,
}

impl Attachment {
    /// Whole-texture attachment at mip 0.
    pub fn texture(point: AttachmentPoint, texture: TextureRef) -> Self {
        Self {
            point,
            kind: AttachmentKind::Texture(texture),
            cube_face: None,
            mip_level: 0,
            layer: None,
            clear_value: None,
            width: texture.width,
            height: texture.height,
            layers: texture.layers,
            samples: texture.samples,
        }
    }

    fn dummy(width: u32, height: u32, layers: u32, samples: u32) -> Self {
        Self {
            point: AttachmentPoint::NoAttachment,
            kind: AttachmentKind::Dummy,
            cube_face: None,
            mip_level: 0,
            layer: None,
            clear_value: None,
            width,
            height,
            layers,
            samples,
        }
    }

    pub fn texture_ref(&self) -> Option<&TextureRef> {
        match &self.kind {
            AttachmentKind::Texture(texture) => Some(texture),
            AttachmentKind::Dummy => None,
        }
    }

    /// Same native binding; clear values do not require a re-attach.
    pub fn binds_same(&self, other: &Attachment) -> bool {
        self.point == other.point
            && self.kind == other.kind
            && self.cube_face == other.cube_face
            && self.mip_level == other.mip_level
            && self.layer == other.layer
    }
}

/// Native work performed by one [`Framebuffer::sync`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub attached: Vec<AttachmentPoint>,
    pub replaced: Vec<AttachmentPoint>,
    pub detached: Vec<AttachmentPoint>,
    pub draw_buffers_changed: bool,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.native_calls() == 0
    }

    /// Attach, replace, detach and draw-buffer calls issued.
    pub fn native_calls(&self) -> usize {
        self.attached.len()
            + self.replaced.len()
            + self.detached.len()
            + usize::from(self.draw_buffers_changed)
    }
}

/// Driver verdict on whether a framebuffer can be rendered to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Completeness {
    pub complete: bool,
    /// Empty when complete.
    pub why_not: String,
}

impl Completeness {
    fn from_status(status: FramebufferStatus) -> Self {
        match status {
            FramebufferStatus::Complete => Self {
                complete: true,
                why_not: String::new(),
            },
            other => Self {
                complete: false,
                why_not: other.to_string(),
            },
        }
    }
}

/// A render target: desired attachments plus what the native object holds.
#[derive(Debug)]
pub struct Framebuffer {
    id: FramebufferId,
    name: String,
    native: Option<NativeFramebuffer>,
    desired: Vec<Attachment>,
    current: Vec<Attachment>,
    draw_buffers: Vec<AttachmentPoint>,
    issued_draw_buffers: Option<Vec<AttachmentPoint>>,
    in_sync: bool,
    no_attachments: bool,
    uniform_args: Args,
}

impl Framebuffer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: FramebufferId::next(),
            name: name.into(),
            native: None,
            desired: Vec::new(),
            current: Vec::new(),
            draw_buffers: Vec::new(),
            issued_draw_buffers: None,
            in_sync: true,
            no_attachments: false,
            uniform_args: Args::new(),
        }
    }

    /// Framebuffer rendered to without any attachment, for shaders that only
    /// write images or buffers. Its geometry comes from a dummy attachment.
    pub fn create_without_attachments(
        name: impl Into<String>,
        width: u32,
        height: u32,
        layers: u32,
        samples: u32,
    ) -> Self {
        let mut framebuffer = Self::new(name);
        framebuffer.desired.push(Attachment::dummy(width, height, layers, samples));
        framebuffer.no_attachments = true;
        framebuffer.in_sync = false;
        framebuffer
    }

    pub fn id(&self) -> FramebufferId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn native(&self) -> Option<NativeFramebuffer> {
        self.native
    }

    pub fn in_sync(&self) -> bool {
        self.in_sync
    }

    /// Attaches `texture` at `point`, or removes the attachment for `None`.
    ///
    /// # Panics
    ///
    /// On `NoAttachment`, on framebuffers created without attachments, on
    /// colour indices past the last draw buffer, and when a depth or stencil
    /// point receives a texture without the matching format.
    pub fn set(&mut self, point: AttachmentPoint, texture: Option<TextureRef>) {
        self.set_with(point, texture, None, 0);
    }

    /// Like [`Framebuffer::set`] for one cube face and mip level.
    pub fn set_with(
        &mut self,
        point: AttachmentPoint,
        texture: Option<TextureRef>,
        cube_face: Option<CubeFace>,
        mip_level: u32,
    ) {
        match texture {
            Some(texture) => {
                let mut attachment = Attachment::texture(point, texture);
                attachment.cube_face = cube_face;
                attachment.mip_level = mip_level;
                attachment.width = texture.width.checked_shr(mip_level).unwrap_or(0).max(1);
                attachment.height = texture.height.checked_shr(mip_level).unwrap_or(0).max(1);
                self.set_attachment(attachment);
            }
            None => self.remove(point),
        }
    }

    /// Inserts or replaces a fully described attachment.
    pub fn set_attachment(&mut self, attachment: Attachment) {
        self.check_point(attachment.point);
        if let Some(texture) = attachment.texture_ref() {
            check_format(attachment.point, texture);
        }
        match self.search(attachment.point) {
            Ok(index) => self.desired[index] = attachment,
            Err(index) => self.desired.insert(index, attachment),
        }
        self.in_sync = false;
    }

    fn remove(&mut self, point: AttachmentPoint) {
        self.check_point(point);
        if let Ok(index) = self.search(point) {
            self.desired.remove(index);
            self.in_sync = false;
        }
    }

    /// Removes every attachment.
    pub fn clear(&mut self) {
        assert!(
            !self.no_attachments,
            "framebuffer {} was created without attachments",
            self.name
        );
        if !self.desired.is_empty() {
            self.desired.clear();
            self.in_sync = false;
        }
    }

    fn check_point(&self, point: AttachmentPoint) {
        assert!(
            point != AttachmentPoint::NoAttachment,
            "cannot set an attachment at NoAttachment on framebuffer {}",
            self.name
        );
        assert!(
            !self.no_attachments,
            "framebuffer {} was created without attachments",
            self.name
        );
        if let AttachmentPoint::Color(index) = point {
            assert!(
                usize::from(index) < MAX_DRAW_BUFFERS,
                "colour attachment index {index} out of range on framebuffer {}",
                self.name
            );
        }
    }

    fn search(&self, point: AttachmentPoint) -> Result<usize, usize> {
        self.desired.binary_search_by(|attachment| attachment.point.cmp(&point))
    }

    pub fn get(&self, point: AttachmentPoint) -> Option<&Attachment> {
        self.search(point).ok().map(|index| &self.desired[index])
    }

    pub fn has(&self, point: AttachmentPoint) -> bool {
        self.search(point).is_ok()
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.desired
    }

    /// Width of the first attachment, 0 when there is none.
    pub fn width(&self) -> u32 {
        self.desired.first().map_or(0, |attachment| attachment.width)
    }

    pub fn height(&self) -> u32 {
        self.desired.first().map_or(0, |attachment| attachment.height)
    }

    pub fn rect(&self) -> Rect2D {
        Rect2D::from_size(self.width(), self.height())
    }

    pub fn num_color_attachments(&self) -> usize {
        self.desired.iter().filter(|a| a.point.is_color()).count()
    }

    /// Colour points written by draws, in ascending order, as of the last sync.
    pub fn draw_buffers(&self) -> &[AttachmentPoint] {
        &self.draw_buffers
    }

    /// User arguments appended to every draw into this framebuffer.
    pub fn uniform_args_mut(&mut self) -> &mut Args {
        &mut self.uniform_args
    }

    /// User arguments plus `hal_FramebufferSize` as `(w, h, 1/w, 1/h)`.
    pub fn uniform_args(&self) -> Args {
        let mut args = self.uniform_args.clone();
        let (w, h) = (self.width().max(1) as f32, self.height().max(1) as f32);
        args.set_uniform("hal_FramebufferSize", UniformValue::Vec4([w, h, 1.0 / w, 1.0 / h]));
        args
    }

    fn ensure_native<D: NativeDevice + ?Sized>(&mut self, device: &mut D) -> NativeFramebuffer {
        match self.native {
            Some(native) => native,
            None => {
                let native = device.create_framebuffer();
                debug!(framebuffer = %self.name, native = native.0, "created native framebuffer");
                self.native = Some(native);
                native
            }
        }
    }

    /// Binds the native object unless `already_bound`, creating it on first
    /// use, then reconciles attachments if they changed. Returns whether a
    /// native bind was issued.
    pub fn bind<D: NativeDevice + ?Sized>(
        &mut self,
        device: &mut D,
        target: FramebufferTarget,
        already_bound: bool,
    ) -> bool {
        let native = self.ensure_native(device);
        if !already_bound {
            device.bind_framebuffer(target, Some(native));
        }
        if !self.in_sync {
            self.sync(device);
        }
        !already_bound
    }

    /// Brings the native object in line with the desired attachments.
    ///
    /// Walks both sorted lists once: points only present natively are
    /// detached, new points attached, and changed points re-attached with a
    /// single call. The draw-buffer list is reissued only when it changed.
    pub fn sync<D: NativeDevice + ?Sized>(&mut self, device: &mut D) -> SyncReport {
        let mut report = SyncReport::default();
        if self.in_sync && self.native.is_some() {
            return report;
        }
        let native = self.ensure_native(device);

        let (mut d, mut c) = (0, 0);
        while d < self.desired.len() || c < self.current.len() {
            let order = match (self.desired.get(d), self.current.get(c)) {
                (Some(want), Some(have)) => want.point.cmp(&have.point),
                (Some(_), None) => Ordering::Less,
                (None, _) => Ordering::Greater,
            };
            match order {
                Ordering::Less => {
                    let want = &self.desired[d];
                    if want.point != AttachmentPoint::NoAttachment {
                        device.attach(native, want);
                        report.attached.push(want.point);
                    }
                    d += 1;
                }
                Ordering::Greater => {
                    let have = &self.current[c];
                    if have.point != AttachmentPoint::NoAttachment {
                        device.detach(native, have.point);
                        report.detached.push(have.point);
                    }
                    c += 1;
                }
                Ordering::Equal => {
                    let want = &self.desired[d];
                    if !want.binds_same(&self.current[c]) {
                        device.attach(native, want);
                        report.replaced.push(want.point);
                    }
                    d += 1;
                    c += 1;
                }
            }
        }
        self.current.clone_from(&self.desired);

        self.draw_buffers = self
            .current
            .iter()
            .map(|attachment| attachment.point)
            .filter(|point| point.is_color())
            .collect();
        if self.issued_draw_buffers.as_ref() != Some(&self.draw_buffers) {
            device.set_draw_buffers(native, &self.draw_buffers);
            self.issued_draw_buffers = Some(self.draw_buffers.clone());
            report.draw_buffers_changed = true;
        }
        self.in_sync = true;

        debug!(
            framebuffer = %self.name,
            attached = report.attached.len(),
            replaced = report.replaced.len(),
            detached = report.detached.len(),
            "synchronised attachments"
        );
        report
    }

    /// Syncs, then asks the driver whether the framebuffer is renderable.
    pub fn check_complete<D: NativeDevice + ?Sized>(&mut self, device: &mut D) -> Completeness {
        self.sync(device);
        let native = self.ensure_native(device);
        let completeness = Completeness::from_status(device.framebuffer_status(native));
        if !completeness.complete {
            warn!(framebuffer = %self.name, reason = %completeness.why_not, "framebuffer incomplete");
        }
        completeness
    }

    /// Deletes the native object; the framebuffer may be bound again later.
    pub fn release<D: NativeDevice + ?Sized>(&mut self, device: &mut D) {
        if let Some(native) = self.native.take() {
            device.delete_framebuffer(native);
            self.current.clear();
            self.issued_draw_buffers = None;
            self.in_sync = false;
        }
    }
}

fn check_format(point: AttachmentPoint, texture: &TextureRef) {
    let format = texture.format;
    match point {
        AttachmentPoint::Depth => assert!(
            format.has_depth(),
            "depth attachment {} has non-depth format {format:?}",
            texture.id
        ),
        AttachmentPoint::Stencil => assert!(
            format.has_stencil(),
            "stencil attachment {} has non-stencil format {format:?}",
            texture.id
        ),
        AttachmentPoint::DepthAndStencil => assert!(
            format.has_depth() && format.has_stencil(),
            "depth-stencil attachment {} has format {format:?}",
            texture.id
        ),
        AttachmentPoint::Color(_) | AttachmentPoint::NoAttachment => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{NativeCall, RecordingDevice};
    use crate::types::TextureFormat;

    fn color(id: u32) -> TextureRef {
        TextureRef::new_2d(id, TextureFormat::Rgba8, 64, 32)
    }

    fn depth(id: u32) -> TextureRef {
        TextureRef::new_2d(id, TextureFormat::Depth24, 64, 32)
    }

    #[test]
    fn setting_attachments_issues_nothing_until_bound() {
        let mut device = RecordingDevice::new();
        let mut fb = Framebuffer::new("gbuffer");
        fb.set(AttachmentPoint::Color(1), Some(color(2)));
        fb.set(AttachmentPoint::Depth, Some(depth(3)));
        fb.set(AttachmentPoint::Color(0), Some(color(1)));
        assert!(device.calls().is_empty());
        assert_eq!(
            fb.attachments().iter().map(|a| a.point).collect::<Vec<_>>(),
            vec![AttachmentPoint::Color(0), AttachmentPoint::Color(1), AttachmentPoint::Depth]
        );

        assert!(fb.bind(&mut device, FramebufferTarget::Draw, false));
        assert_eq!(device.count(|c| matches!(c, NativeCall::CreateFramebuffer(_))), 1);
        assert_eq!(device.count(|c| matches!(c, NativeCall::Attach { .. })), 3);
        assert_eq!(fb.draw_buffers(), &[AttachmentPoint::Color(0), AttachmentPoint::Color(1)]);
        assert_eq!(fb.rect(), Rect2D::new(0, 0, 64, 32));
    }

    #[test]
    fn sync_touches_only_changed_points() {
        let mut device = RecordingDevice::new();
        let mut fb = Framebuffer::new("target");
        fb.set(AttachmentPoint::Color(0), Some(color(1)));
        fb.set(AttachmentPoint::Color(1), Some(color(2)));
        fb.set(AttachmentPoint::Depth, Some(depth(3)));
        fb.sync(&mut device);
        device.clear_calls();

        fb.set(AttachmentPoint::Color(1), Some(color(9)));
        fb.set(AttachmentPoint::Depth, None);
        fb.set(AttachmentPoint::Color(0), Some(color(1)));
        let report = fb.sync(&mut device);

        assert_eq!(report.replaced, vec![AttachmentPoint::Color(1)]);
        assert_eq!(report.detached, vec![AttachmentPoint::Depth]);
        assert!(report.attached.is_empty());
        assert!(!report.draw_buffers_changed);
        assert_eq!(device.calls().len(), report.native_calls());

        assert!(fb.sync(&mut device).is_empty());
    }

    #[test]
    fn draw_buffers_follow_colour_points() {
        let mut device = RecordingDevice::new();
        let mut fb = Framebuffer::new("shadow");
        fb.set(AttachmentPoint::Depth, Some(depth(1)));
        let report = fb.sync(&mut device);
        assert!(report.draw_buffers_changed);
        assert!(fb.draw_buffers().is_empty());

        fb.set(AttachmentPoint::Color(3), Some(color(2)));
        let report = fb.sync(&mut device);
        assert!(report.draw_buffers_changed);
        assert_eq!(fb.num_color_attachments(), 1);
        assert_eq!(fb.draw_buffers(), &[AttachmentPoint::Color(3)]);
    }

    #[test]
    fn attachmentless_framebuffers_carry_geometry() {
        let mut device = RecordingDevice::new();
        let mut fb = Framebuffer::create_without_attachments("scratch", 128, 64, 1, 4);
        assert_eq!(fb.width(), 128);
        assert!(fb.has(AttachmentPoint::NoAttachment));
        fb.bind(&mut device, FramebufferTarget::Draw, false);
        assert_eq!(device.count(|c| matches!(c, NativeCall::Attach { .. })), 0);
    }

    #[test]
    #[should_panic(expected = "created without attachments")]
    fn attachmentless_framebuffers_reject_attachments() {
        let mut fb = Framebuffer::create_without_attachments("scratch", 8, 8, 1, 1);
        fb.set(AttachmentPoint::Color(0), Some(color(1)));
    }

    #[test]
    #[should_panic(expected = "NoAttachment")]
    fn no_attachment_point_is_rejected() {
        Framebuffer::new("fb").set(AttachmentPoint::NoAttachment, Some(color(1)));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn colour_index_is_bounded() {
        Framebuffer::new("fb").set(AttachmentPoint::Color(16), Some(color(1)));
    }

    #[test]
    #[should_panic(expected = "non-depth format")]
    fn depth_point_requires_depth_format() {
        Framebuffer::new("fb").set(AttachmentPoint::Depth, Some(color(1)));
    }

    #[test]
    fn completeness_reports_driver_status() {
        let mut device = RecordingDevice::new();
        let mut fb = Framebuffer::new("fb");
        fb.set(AttachmentPoint::Color(0), Some(color(1)));
        assert!(fb.check_complete(&mut device).complete);

        device.set_framebuffer_status(FramebufferStatus::Unknown(0x8CDD));
        let verdict = fb.check_complete(&mut device);
        assert!(!verdict.complete);
        assert_eq!(verdict.why_not, "Unknown framebuffer status 0x8CDD");
    }

    #[test]
    fn uniform_args_include_target_size() {
        let mut fb = Framebuffer::new("fb");
        fb.set(AttachmentPoint::Color(0), Some(color(1)));
        fb.uniform_args_mut().set_uniform("exposure", UniformValue::Float(2.0));
        let args = fb.uniform_args();
        assert_eq!(
            args.uniform("hal_FramebufferSize"),
            Some(&UniformValue::Vec4([64.0, 32.0, 1.0 / 64.0, 1.0 / 32.0]))
        );
        assert!(args.uniform("exposure").is_some());
    }
}
