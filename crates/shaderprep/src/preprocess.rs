//! Stage driver: runs the expansion stages in order and assembles the final
//! per-stage text handed to the native compiler.
//!
//! Work is split in two phases. [`preprocess_stages`] runs the macro-independent
//! stages (include, foreach) once per raw source; the result can be kept and
//! reused for every variant. [`PreprocessedStages::assemble`] runs the
//! macro-dependent stages (for, expect) plus version and extension hoisting
//! for one variant and concatenates:
//!
//! ```text
//! #version ...            chosen version line
//! #extension ...          configured defaults, then hoisted lines
//! #line 1 0               engine defines and uniforms
//! <preamble + #defines>   variant macro string
//! #line 1 <file index>    stage body
//! ```

use tracing::{debug, trace};

use crate::diagnostics::Diagnostics;
use crate::expect::expand_expect;
use crate::extensions::{extract_extensions, merge_extensions};
use crate::files::{line_pragma, FileTable};
use crate::foreach::expand_foreach;
use crate::forloop::{expand_for, Macros};
use crate::include::{expand_includes, IncludeOptions};
use crate::inject::engine_preamble;
use crate::source::{ProgramKind, StageSources, DEFAULT_VERTEX_NAME, DEFAULT_VERTEX_SOURCE};
use crate::stage::ShaderStage;
use crate::version::extract_version;

/// Knobs shared by every stage of a program.
#[derive(Debug, Clone)]
pub struct PreprocessOptions {
    pub include: IncludeOptions,
    /// Highest GLSL version the driver accepts.
    pub glsl_capability: u32,
    /// `#extension` lines emitted ahead of every stage's own.
    pub default_extensions: Vec<String>,
    /// Declare the engine uniforms in graphics stages.
    pub engine_uniforms: bool,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            include: IncludeOptions::default(),
            glsl_capability: 450,
            default_extensions: Vec::new(),
            engine_uniforms: true,
        }
    }
}

/// One stage after the load-time expansions.
#[derive(Debug, Clone)]
pub struct LoadedStage {
    pub stage: ShaderStage,
    pub name: String,
    /// Text after include and foreach expansion, starting with `#line 1 <index>`.
    pub body: String,
}

/// Macro-independent result of preprocessing a shader's sources.
#[derive(Debug, Clone)]
pub struct PreprocessedStages {
    pub kind: Option<ProgramKind>,
    pub stages: Vec<LoadedStage>,
    pub files: FileTable,
    pub diagnostics: Diagnostics,
}

impl PreprocessedStages {
    /// True when loading produced no diagnostics and the stages form a valid program.
    pub fn is_ok(&self) -> bool {
        self.kind.is_some() && self.diagnostics.is_empty()
    }

    pub fn stage(&self, stage: ShaderStage) -> Option<&LoadedStage> {
        self.stages.iter().find(|loaded| loaded.stage == stage)
    }

    /// Final text for one stage and variant, or `None` with diagnostics recorded.
    pub fn assemble<M>(
        &self,
        loaded: &LoadedStage,
        macro_preamble: &str,
        macros: &M,
        options: &PreprocessOptions,
        diagnostics: &mut Diagnostics,
    ) -> Option<String>
    where
        M: Macros + ?Sized,
    {
        let mut body = loaded.body.clone();
        let mut ok = expand_for(&mut body, macros, &self.files, diagnostics);
        ok &= expand_expect(&mut body, &self.files, diagnostics);
        let version = extract_version(&mut body, options.glsl_capability, &self.files, diagnostics);
        let extensions = merge_extensions(&options.default_extensions, &extract_extensions(&mut body));
        let version = version.filter(|_| ok)?;

        let mut out = String::with_capacity(body.len() + macro_preamble.len() + 512);
        out.push_str(&version);
        out.push_str(&extensions);
        out.push_str(&engine_preamble(loaded.stage, options.engine_uniforms));
        out.push_str(macro_preamble);
        if !macro_preamble.is_empty() && !macro_preamble.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&body);
        trace!(stage = %loaded.stage, bytes = out.len(), "assembled stage");
        Some(out)
    }

    /// Assembles every stage; `None` when any stage failed.
    pub fn assemble_all<M>(
        &self,
        macro_preamble: &str,
        macros: &M,
        options: &PreprocessOptions,
        diagnostics: &mut Diagnostics,
    ) -> Option<Vec<(ShaderStage, String)>>
    where
        M: Macros + ?Sized,
    {
        let mut out = Vec::with_capacity(self.stages.len());
        let mut ok = true;
        for loaded in &self.stages {
            match self.assemble(loaded, macro_preamble, macros, options, diagnostics) {
                Some(code) => out.push((loaded.stage, code)),
                None => ok = false,
            }
        }
        ok.then_some(out)
    }
}

/// Runs include and foreach expansion on every present stage.
///
/// Pixel-only graphics sources get [`DEFAULT_VERTEX_SOURCE`] as their vertex
/// stage. An invalid stage combination leaves `kind` empty and records why.
pub fn preprocess_stages(sources: &StageSources, options: &PreprocessOptions) -> PreprocessedStages {
    let mut files = FileTable::new();
    let mut diagnostics = Diagnostics::new();
    let mut stages = Vec::new();

    let kind = match sources.kind() {
        Ok(kind) => Some(kind),
        Err(message) => {
            diagnostics.push(format!("invalid shader stage combination: {message}"));
            None
        }
    };

    if let Some(ProgramKind::Graphics { default_vertex: true }) = kind {
        let index = files.index_of(DEFAULT_VERTEX_NAME);
        stages.push(LoadedStage {
            stage: ShaderStage::Vertex,
            name: DEFAULT_VERTEX_NAME.to_string(),
            body: format!("{}{}", line_pragma(1, index), DEFAULT_VERTEX_SOURCE),
        });
    }

    for source in sources.iter() {
        let name = source.name();
        let index = files.index_of(&name);
        let mut body = format!("{}{}", line_pragma(1, index), source.text);
        let included = expand_includes(&mut body, source.path(), &mut files, &options.include, &mut diagnostics);
        let unrolled = expand_foreach(&mut body, &files, &mut diagnostics);
        debug!(stage = %source.stage, name = %name, included, unrolled, "loaded stage source");
        stages.push(LoadedStage {
            stage: source.stage,
            name,
            body,
        });
    }
    stages.sort_by_key(|loaded| loaded.stage);

    PreprocessedStages {
        kind,
        stages,
        files,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;

    fn no_macros() -> Vec<(&'static str, &'static str)> {
        Vec::new()
    }

    #[test]
    fn assembles_in_documented_order() {
        let sources = StageSources::from_strings([(
            ShaderStage::Pixel,
            "#extension GL_ARB_gpu_shader5 : enable\n#version 330 or 420\nout vec4 c;\nvoid main() { c = vec4(1.0); }\n",
        )]);
        let options = PreprocessOptions {
            glsl_capability: 410,
            default_extensions: vec!["#extension GL_ARB_texture_query_lod : enable".into()],
            engine_uniforms: false,
            ..PreprocessOptions::default()
        };
        let loaded = preprocess_stages(&sources, &options);
        assert!(loaded.is_ok(), "{}", loaded.diagnostics);

        let pixel = loaded.stage(ShaderStage::Pixel).expect("pixel stage");
        let mut diagnostics = Diagnostics::new();
        let code = loaded
            .assemble(pixel, "#define LIGHTS 2\n", no_macros().as_slice(), &options, &mut diagnostics)
            .expect("assembled");

        let lines: Vec<&str> = code.lines().collect();
        assert_eq!(lines[0], "#version 330");
        assert_eq!(lines[1], "#extension GL_ARB_texture_query_lod : enable");
        assert_eq!(lines[2], "#extension GL_ARB_gpu_shader5 : enable");
        assert_eq!(lines[3], "#line 1 0");
        assert!(code.contains("#define HAL_SHADER_STAGE HAL_FRAGMENT_SHADER\n#define LIGHTS 2\n#line 1 2\n"));
    }

    #[test]
    fn pixel_only_gets_default_vertex_stage() {
        let sources = StageSources::from_strings([(ShaderStage::Pixel, "void main() {}\n")]);
        let loaded = preprocess_stages(&sources, &PreprocessOptions::default());
        assert_eq!(loaded.kind, Some(ProgramKind::Graphics { default_vertex: true }));
        let vertex = loaded.stage(ShaderStage::Vertex).expect("vertex stage");
        assert_eq!(vertex.name, DEFAULT_VERTEX_NAME);
        assert_eq!(loaded.stages[0].stage, ShaderStage::Vertex);
    }

    #[test]
    fn invalid_combination_is_diagnosed() {
        let sources = StageSources::from_strings([(ShaderStage::Vertex, "void main() {}\n")]);
        let loaded = preprocess_stages(&sources, &PreprocessOptions::default());
        assert!(!loaded.is_ok());
        assert!(loaded.diagnostics.contains("graphics programs need a pixel stage"));
    }

    #[test]
    fn for_bounds_come_from_variant_macros() {
        let sources = StageSources::from_strings([(
            ShaderStage::Compute,
            "#for (int i = 0; i < N; ++i)\nfloat v$(i);\n#endfor\nvoid main() {}\n",
        )]);
        let options = PreprocessOptions::default();
        let loaded = preprocess_stages(&sources, &options);
        let compute = loaded.stage(ShaderStage::Compute).expect("compute stage");

        let mut diagnostics = Diagnostics::new();
        let code = loaded
            .assemble(compute, "", [("N", "3")].as_slice(), &options, &mut diagnostics)
            .expect("assembled");
        assert!(code.contains("float v0;") && code.contains("float v2;"));
        assert!(!code.contains("float v3;"));

        let body_line = lexer::scan(&code)
            .into_iter()
            .find(|line| line.text == "void main() {}")
            .expect("main line");
        assert_eq!(body_line.location.line, 4);
        assert_eq!(loaded.files.name(body_line.location.file), Some("<compute source>"));
    }

    #[test]
    fn malformed_expect_fails_the_variant() {
        let sources = StageSources::from_strings([(ShaderStage::Compute, "#expect 3\nvoid main() {}\n")]);
        let options = PreprocessOptions::default();
        let loaded = preprocess_stages(&sources, &options);
        let mut diagnostics = Diagnostics::new();
        let code = loaded.assemble_all("", no_macros().as_slice(), &options, &mut diagnostics);
        assert!(code.is_none());
        assert!(diagnostics.contains("<compute source>(1): Malformed expect pragma"));
    }
}
