//! Shader variants: argument sets, reflection, the per-context variant cache
//! and what happens when compilation fails.
//!
//! Types:
//!
//! - `Args` carries macros, preamble, uniform values and draw or compute
//!   parameters. Its macro string is the variant key.
//! - `Shader` is a set of stage sources plus an optional failure policy.
//! - `ShaderManager` owns loaded shaders and their compiled variants.
//! - `ShaderProgram` is one linked variant with its uniform and attribute
//!   tables.

mod args;
mod cache;
mod policy;
mod program;
pub mod reflect;

use std::fmt;

use shaderprep::PreprocessError;
use thiserror::Error;

pub use args::{Args, ArgsDomain, DrawArgs, UniformValue};
pub use cache::{CacheStats, ReloadReport, Shader, ShaderManager};
pub use policy::{FailurePolicy, LoggedPrompt, RecoveryAction, RecoveryPrompt};
pub use program::ShaderProgram;
pub use reflect::{
    ActiveAttribute, ActiveUniform, AttributeDecl, AttributeTable, GlslType, UniformDecl,
    UniformTable,
};

/// Handle to a shader loaded into a [`ShaderManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(pub(crate) usize);

impl fmt::Display for ShaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shader#{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum ShaderError {
    /// Preprocessing, compilation or linking failed; `log` names files, not indices.
    #[error("shader {shader} failed to compile:\n{log}")]
    Compile { shader: String, log: String },
    #[error(transparent)]
    Load(#[from] PreprocessError),
    #[error("compilation of shader {0} was aborted")]
    Aborted(String),
    #[error("{0} is not loaded in this shader manager")]
    UnknownShader(ShaderId),
}
