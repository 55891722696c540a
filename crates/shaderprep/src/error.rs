use std::path::PathBuf;

use thiserror::Error;

use crate::stage::ShaderStage;

/// Failures that prevent a stage source from being loaded at all.
///
/// Malformed directives are not errors at this level; they are reported
/// through [`crate::Diagnostics`].
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("failed to read shader source {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot infer a shader stage from {}", .0.display())]
    UnknownStage(PathBuf),
    #[error("{stage} stage supplied more than once ({})", .path.display())]
    DuplicateStage { stage: ShaderStage, path: PathBuf },
}
