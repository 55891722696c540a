//! Render-state tracking for an immediate-mode graphics driver.
//!
//! Higher layers describe the state they want; this crate remembers what the
//! driver already has and only issues the native calls that change something.
//! The flow for a draw is:
//!
//! ```text
//!   setters ──▶ StateStack ──▶ NativeDevice (immediate, redundant calls dropped)
//!                  │ push/pop
//!                  ▼
//!   RenderDevice::apply ──▶ reconcile framebuffer ──▶ ShaderManager::resolve
//!                                                        │ variant per macro set
//!                                                        ▼
//!                              engine matrices + uniform args ──▶ draw / dispatch
//! ```
//!
//! Types:
//!
//! - `StateSnapshot` is the full render state; `StateStack` owns the current
//!   snapshot, the saved ones and the device.
//! - `Framebuffer` is a desired attachment set that syncs itself onto a
//!   native framebuffer object with the minimum number of calls.
//! - `ShaderManager` caches one linked program per shader and macro set.
//! - `RenderDevice` combines the three for clears, draws and dispatches.
//! - `RecordingDevice` and `NagaBackend` are driver implementations that need
//!   no GPU.

pub mod compile;
mod dispatch;
mod framebuffer;
pub mod native;
pub mod shader;
mod snapshot;
mod stack;
pub mod translate;
pub mod types;

pub use compile::NagaBackend;
pub use dispatch::RenderDevice;
pub use framebuffer::{
    Attachment, AttachmentKind, AttachmentPoint, Completeness, Framebuffer, FramebufferId, SyncReport,
};
pub use native::{NativeCall, NativeDevice, RecordingDevice, ShaderBackend};
pub use shader::{
    Args, FailurePolicy, RecoveryAction, RecoveryPrompt, Shader, ShaderError, ShaderId, ShaderManager,
    ShaderProgram, UniformValue,
};
pub use snapshot::{DepthRange, Matrices, PolygonOffset, StateDiff, StateField, StateSnapshot, StencilState};
pub use stack::{StackOptions, StateStack, StateStats};
