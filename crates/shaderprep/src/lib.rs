//! Directive expansion for GLSL stage sources. Every stage works on a plain
//! string, records problems in a `Diagnostics` buffer instead of failing
//! fast, and keeps `#line` pragmas accurate so compiler output can be traced
//! back to the file and line that produced it.
//!
//! Types:
//!
//! - `StageSources` holds the six per-stage slots of a shader and decides
//!   which program kind they form.
//! - `FileTable` maps file names to the indices written into `#line`
//!   pragmas and rewrites compiler logs back to names.
//! - `PreprocessOptions` and `IncludeOptions` carry capability, search paths
//!   and injection switches.
//! - `PreprocessedStages` is the reusable, macro-independent result of
//!   loading a shader.
//!
//! Functions:
//!
//! - `preprocess_stages` runs include and foreach expansion once per source.
//! - `PreprocessedStages::assemble` runs for, expect, version and extension
//!   handling for one macro set and concatenates the final stage text.
//! - The individual stages (`expand_includes`, `expand_foreach`,
//!   `expand_for`, `expand_expect`, `extract_version`, `extract_extensions`)
//!   are exported for callers that need only one of them.

mod diagnostics;
mod error;
mod expect;
mod extensions;
mod files;
mod foreach;
mod forloop;
mod include;
mod inject;
pub mod lexer;
mod preprocess;
mod source;
mod stage;
mod version;

pub use diagnostics::Diagnostics;
pub use error::PreprocessError;
pub use expect::expand_expect;
pub use extensions::{extract_extensions, merge_extensions};
pub use files::{line_pragma, FileTable, INSERTED_CODE};
pub use foreach::expand_foreach;
pub use forloop::{expand_for, Macros, MAX_FOR_ITERATIONS};
pub use include::{expand_includes, IncludeOptions};
pub use inject::{engine_preamble, ENGINE_UNIFORMS};
pub use preprocess::{preprocess_stages, LoadedStage, PreprocessOptions, PreprocessedStages};
pub use source::{
    ProgramKind, SourceOrigin, StageSource, StageSources, DEFAULT_VERTEX_NAME, DEFAULT_VERTEX_SOURCE,
};
pub use stage::{ShaderStage, STAGE_COUNT};
pub use version::{canonicalize_version, extract_version, DEFAULT_VERSION_LINE, VALID_GLSL_VERSIONS};
