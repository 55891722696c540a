use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use shaderprep::{
    preprocess_stages, Diagnostics, PreprocessError, PreprocessOptions, PreprocessedStages,
    ShaderStage, StageSources,
};
use tracing::{debug, info, trace, warn};

use crate::native::ShaderBackend;
use crate::shader::args::Args;
use crate::shader::policy::{FailurePolicy, LoggedPrompt, RecoveryAction, RecoveryPrompt};
use crate::shader::program::ShaderProgram;
use crate::shader::reflect::{build_attribute_table, build_uniform_table};
use crate::shader::{ShaderError, ShaderId};

/// Stage sources plus how to react when they fail to compile.
#[derive(Debug, Clone)]
pub struct Shader {
    name: String,
    sources: StageSources,
    policy: Option<FailurePolicy>,
}

impl Shader {
    /// Loads each file into the stage its extension names; the shader is
    /// named after the first file's stem.
    pub fn from_files<I, P>(paths: I) -> Result<Self, PreprocessError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let paths: Vec<PathBuf> = paths.into_iter().map(|p| p.as_ref().to_path_buf()).collect();
        let sources = StageSources::from_files(&paths)?;
        let name = paths
            .first()
            .and_then(|path| path.file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "<unnamed>".to_string());
        Ok(Self::from_sources(name, sources))
    }

    pub fn from_strings<'a, I>(name: impl Into<String>, sources: I) -> Self
    where
        I: IntoIterator<Item = (ShaderStage, &'a str)>,
    {
        Self::from_sources(name, StageSources::from_strings(sources))
    }

    pub fn from_sources(name: impl Into<String>, sources: StageSources) -> Self {
        Self {
            name: name.into(),
            sources,
            policy: None,
        }
    }

    /// Overrides the manager's failure policy for this shader.
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sources(&self) -> &StageSources {
        &self.sources
    }
}

/// Compile and lookup counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Stage compilations attempted.
    pub compiles: u64,
    pub links: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Outcome of [`ShaderManager::reload_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReloadReport {
    pub recompiled: usize,
    pub failed: usize,
    /// `(shader, log)` for every failure.
    pub failures: Vec<(String, String)>,
}

impl ReloadReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug)]
struct Variant {
    args: Args,
    program: Arc<ShaderProgram>,
}

#[derive(Debug)]
struct Entry {
    shader: Shader,
    preprocessed: Option<PreprocessedStages>,
    variants: HashMap<String, Variant>,
    last_error: Option<String>,
}

/// Per-context cache of shaders and their compiled variants.
///
/// A variant is keyed by [`Args::preamble_and_macro_string`]. Failed
/// compilations are never cached, so the next resolve tries again.
pub struct ShaderManager {
    entries: Vec<Entry>,
    options: PreprocessOptions,
    policy: FailurePolicy,
    cache_preprocessed: bool,
    prompt: Box<dyn RecoveryPrompt>,
    retired: Vec<Arc<ShaderProgram>>,
    stats: CacheStats,
}

impl std::fmt::Debug for ShaderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderManager")
            .field("shaders", &self.entries.len())
            .field("policy", &self.policy)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Default for ShaderManager {
    fn default() -> Self {
        Self::new(PreprocessOptions::default())
    }
}

/// Where a failed compile goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    /// Return the error.
    Fail,
    /// Keep whatever program is already cached and move on.
    Keep,
    Retry,
    Reload,
    Abort,
}

impl ShaderManager {
    pub fn new(options: PreprocessOptions) -> Self {
        Self {
            entries: Vec::new(),
            options,
            policy: FailurePolicy::default(),
            cache_preprocessed: true,
            prompt: Box::new(LoggedPrompt),
            retired: Vec::new(),
            stats: CacheStats::default(),
        }
    }

    /// Policy for shaders that do not set their own.
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_prompt(mut self, prompt: Box<dyn RecoveryPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Keep include and foreach expansion between variants of one shader.
    pub fn with_preprocess_cache(mut self, enabled: bool) -> Self {
        self.cache_preprocessed = enabled;
        self
    }

    pub fn options(&self) -> &PreprocessOptions {
        &self.options
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn load(&mut self, shader: Shader) -> ShaderId {
        debug!(shader = %shader.name, "loaded shader");
        self.entries.push(Entry {
            shader,
            preprocessed: None,
            variants: HashMap::new(),
            last_error: None,
        });
        ShaderId(self.entries.len() - 1)
    }

    pub fn shader(&self, id: ShaderId) -> Option<&Shader> {
        self.entries.get(id.0).map(|entry| &entry.shader)
    }

    pub fn find(&self, name: &str) -> Option<ShaderId> {
        self.entries
            .iter()
            .position(|entry| entry.shader.name == name)
            .map(ShaderId)
    }

    pub fn ids(&self) -> impl Iterator<Item = ShaderId> {
        (0..self.entries.len()).map(ShaderId)
    }

    /// Remapped log of the most recent failure, cleared by a success.
    pub fn last_error(&self, id: ShaderId) -> Option<&str> {
        self.entries.get(id.0).and_then(|entry| entry.last_error.as_deref())
    }

    pub fn variant_count(&self, id: ShaderId) -> usize {
        self.entries.get(id.0).map_or(0, |entry| entry.variants.len())
    }

    /// Every file any loaded shader reads from.
    pub fn source_paths(&self) -> Vec<PathBuf> {
        self.entries
            .iter()
            .flat_map(|entry| entry.shader.sources.paths().map(Path::to_path_buf))
            .collect()
    }

    fn entry(&self, id: ShaderId) -> Result<&Entry, ShaderError> {
        self.entries.get(id.0).ok_or(ShaderError::UnknownShader(id))
    }

    /// Returns the program for `args`, compiling it on first use.
    pub fn resolve<B>(
        &mut self,
        id: ShaderId,
        args: &Args,
        backend: &mut B,
    ) -> Result<Arc<ShaderProgram>, ShaderError>
    where
        B: ShaderBackend + ?Sized,
    {
        let key = args.preamble_and_macro_string();
        let entry = self.entries.get(id.0).ok_or(ShaderError::UnknownShader(id))?;
        if let Some(variant) = entry.variants.get(&key) {
            self.stats.cache_hits += 1;
            trace!(shader = %entry.shader.name, "variant cache hit");
            return Ok(Arc::clone(&variant.program));
        }
        self.stats.cache_misses += 1;
        debug!(shader = %entry.shader.name, variants = entry.variants.len(), "variant cache miss");

        loop {
            let (name, log) = match self.build(id, args, backend) {
                Ok(program) => {
                    let program = Arc::new(program);
                    let entry = &mut self.entries[id.0];
                    entry.last_error = None;
                    entry.variants.insert(
                        key,
                        Variant {
                            args: args.clone(),
                            program: Arc::clone(&program),
                        },
                    );
                    return Ok(program);
                }
                Err(ShaderError::Compile { shader, log }) => (shader, log),
                Err(other) => return Err(other),
            };
            self.entries[id.0].last_error = Some(log.clone());

            match self.recover(id, &name, &log) {
                // A new variant has no stale program to fall back on.
                Recovery::Fail | Recovery::Keep => {
                    return Err(ShaderError::Compile { shader: name, log })
                }
                Recovery::Abort => return Err(ShaderError::Aborted(name)),
                Recovery::Retry => self.reread(id)?,
                Recovery::Reload => {
                    self.reload_all(backend)?;
                    self.reread(id)?;
                }
            }
        }
    }

    fn recover(&mut self, id: ShaderId, name: &str, log: &str) -> Recovery {
        let policy = self.entries[id.0].shader.policy.unwrap_or(self.policy);
        match policy {
            FailurePolicy::Silent => {
                debug!(shader = %name, "shader compilation failed:\n{log}");
                Recovery::Keep
            }
            FailurePolicy::Error => {
                warn!(shader = %name, "shader compilation failed:\n{log}");
                Recovery::Fail
            }
            FailurePolicy::Prompt => match self.prompt.on_failure(name, log) {
                RecoveryAction::Retry => Recovery::Retry,
                RecoveryAction::Reload => Recovery::Reload,
                RecoveryAction::Abort => Recovery::Abort,
                RecoveryAction::Ignore => Recovery::Fail,
            },
        }
    }

    fn reread(&mut self, id: ShaderId) -> Result<(), ShaderError> {
        let entry = &mut self.entries[id.0];
        entry.shader.sources.reload()?;
        entry.preprocessed = None;
        Ok(())
    }

    fn build<B>(&mut self, id: ShaderId, args: &Args, backend: &mut B) -> Result<ShaderProgram, ShaderError>
    where
        B: ShaderBackend + ?Sized,
    {
        let entry = &mut self.entries[id.0];
        if !self.cache_preprocessed {
            entry.preprocessed = None;
        }
        let options = &self.options;
        let preprocessed = entry
            .preprocessed
            .get_or_insert_with(|| preprocess_stages(&entry.shader.sources, options));
        compile_variant(
            backend,
            &entry.shader.name,
            preprocessed,
            args,
            &self.options,
            &mut self.stats,
        )
    }

    /// Drops every variant of one shader and re-reads its sources.
    ///
    /// Native programs are deleted once no caller holds them anymore; see
    /// [`ShaderManager::collect_garbage`].
    pub fn reload<B>(&mut self, id: ShaderId, backend: &mut B) -> Result<(), ShaderError>
    where
        B: ShaderBackend + ?Sized,
    {
        self.entry(id)?;
        let entry = &mut self.entries[id.0];
        self.retired
            .extend(entry.variants.drain().map(|(_, variant)| variant.program));
        self.reread(id)?;
        self.collect_garbage(backend);
        debug!(shader = %self.entries[id.0].shader.name, "reloaded shader");
        Ok(())
    }

    /// Recompiles every cached variant from freshly read sources.
    ///
    /// A variant is replaced only when its new build succeeds; otherwise the
    /// stale program stays cached. Each failure goes through the shader's
    /// [`FailurePolicy`]: `Silent` records it in the report, `Error` finishes
    /// the pass and returns the first such failure, and `Prompt` may retry the
    /// shader or abort the pass.
    pub fn reload_all<B>(&mut self, backend: &mut B) -> Result<ReloadReport, ShaderError>
    where
        B: ShaderBackend + ?Sized,
    {
        let mut report = ReloadReport::default();
        let mut surfaced = None;
        for index in 0..self.entries.len() {
            if let Err(err) = self.reload_entry(ShaderId(index), backend, &mut report, &mut surfaced) {
                self.collect_garbage(backend);
                return Err(err);
            }
        }
        self.collect_garbage(backend);
        info!(
            recompiled = report.recompiled,
            failed = report.failed,
            "reloaded all shaders"
        );
        match surfaced {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    fn reload_entry<B>(
        &mut self,
        id: ShaderId,
        backend: &mut B,
        report: &mut ReloadReport,
        surfaced: &mut Option<ShaderError>,
    ) -> Result<(), ShaderError>
    where
        B: ShaderBackend + ?Sized,
    {
        let name = self.entries[id.0].shader.name.clone();
        'attempt: loop {
            let mut sources = self.entries[id.0].shader.sources.clone();
            if let Err(err) = sources.reload() {
                let log = err.to_string();
                warn!(shader = %name, error = %log, "failed to re-read shader sources");
                let failed = self.entries[id.0].variants.len().max(1);
                match self.reload_failure(id, &name, log, failed, report, surfaced)? {
                    Recovery::Retry => continue 'attempt,
                    _ => return Ok(()),
                }
            }
            self.entries[id.0].shader.sources = sources;
            let preprocessed = preprocess_stages(&self.entries[id.0].shader.sources, &self.options);

            let keys: Vec<String> = self.entries[id.0].variants.keys().cloned().collect();
            let mut replaced = Vec::new();
            for key in keys {
                let args = self.entries[id.0].variants[&key].args.clone();
                match compile_variant(backend, &name, &preprocessed, &args, &self.options, &mut self.stats) {
                    Ok(program) => replaced.push((key, Arc::new(program))),
                    Err(err) => {
                        let log = match err {
                            ShaderError::Compile { log, .. } => log,
                            other => other.to_string(),
                        };
                        self.entries[id.0].last_error = Some(log.clone());
                        let next = self.reload_failure(id, &name, log, 1, report, surfaced);
                        if !matches!(next, Ok(Recovery::Keep)) {
                            self.retired.extend(replaced.drain(..).map(|(_, program)| program));
                        }
                        if next? == Recovery::Retry {
                            continue 'attempt;
                        }
                    }
                }
            }
            let entry = &mut self.entries[id.0];
            for (key, program) in replaced {
                if let Some(variant) = entry.variants.get_mut(&key) {
                    let stale = std::mem::replace(&mut variant.program, program);
                    self.retired.push(stale);
                    report.recompiled += 1;
                }
            }
            entry.preprocessed = Some(preprocessed);
            return Ok(());
        }
    }

    /// Applies the failure policy to one reload failure. Returns
    /// [`Recovery::Retry`] when the shader should be read and built again and
    /// [`Recovery::Keep`] when its stale programs stay in place.
    fn reload_failure(
        &mut self,
        id: ShaderId,
        name: &str,
        log: String,
        failed: usize,
        report: &mut ReloadReport,
        surfaced: &mut Option<ShaderError>,
    ) -> Result<Recovery, ShaderError> {
        match self.recover(id, name, &log) {
            Recovery::Retry | Recovery::Reload => return Ok(Recovery::Retry),
            Recovery::Abort => return Err(ShaderError::Aborted(name.to_string())),
            Recovery::Fail => {
                surfaced.get_or_insert_with(|| ShaderError::Compile {
                    shader: name.to_string(),
                    log: log.clone(),
                });
            }
            Recovery::Keep => {}
        }
        report.failed += failed;
        report.failures.push((name.to_string(), log));
        Ok(Recovery::Keep)
    }

    /// Deletes retired programs that no caller holds anymore.
    pub fn collect_garbage<B>(&mut self, backend: &mut B)
    where
        B: ShaderBackend + ?Sized,
    {
        self.retired.retain(|program| {
            if Arc::strong_count(program) == 1 {
                backend.delete_program(program.object);
                false
            } else {
                true
            }
        });
    }
}

/// Assembles, compiles, links and reflects one variant.
fn compile_variant<B>(
    backend: &mut B,
    name: &str,
    preprocessed: &PreprocessedStages,
    args: &Args,
    options: &PreprocessOptions,
    stats: &mut CacheStats,
) -> Result<ShaderProgram, ShaderError>
where
    B: ShaderBackend + ?Sized,
{
    let failed = |log: String| ShaderError::Compile {
        shader: name.to_string(),
        log,
    };
    let Some(kind) = preprocessed.kind.filter(|_| preprocessed.is_ok()) else {
        return Err(failed(preprocessed.diagnostics.to_string()));
    };

    let mut diagnostics = Diagnostics::new();
    let preamble = args.preamble_and_macro_string();
    let Some(stage_code) = preprocessed.assemble_all(&preamble, args, options, &mut diagnostics) else {
        return Err(failed(diagnostics.to_string()));
    };

    let files = &preprocessed.files;
    let mut objects = Vec::with_capacity(stage_code.len());
    let mut log = String::new();
    for (stage, code) in &stage_code {
        stats.compiles += 1;
        match backend.compile_stage(*stage, code) {
            Ok(object) => objects.push(object),
            Err(stage_log) => log.push_str(&files.remap_log(&stage_log)),
        }
    }
    if !log.is_empty() {
        for object in objects {
            backend.delete_stage(object);
        }
        return Err(failed(log));
    }

    stats.links += 1;
    let linked = backend.link(&objects);
    for object in objects {
        backend.delete_stage(object);
    }
    let object = linked.map_err(|link_log| failed(files.remap_log(&link_log)))?;

    let active_uniforms = backend.active_uniforms(object);
    let active_attributes = backend.active_attributes(object);
    let codes: Vec<&str> = stage_code.iter().map(|(_, code)| code.as_str()).collect();
    let uniforms = build_uniform_table(&active_uniforms, &codes);
    let vertex = stage_code
        .iter()
        .find(|(stage, _)| *stage == ShaderStage::Vertex)
        .map(|(_, code)| code.as_str());
    let attributes = build_attribute_table(&active_attributes, vertex);
    debug!(
        shader = %name,
        stages = stage_code.len(),
        uniforms = uniforms.len(),
        "compiled shader variant"
    );

    Ok(ShaderProgram {
        object,
        kind,
        stage_code,
        files: files.clone(),
        uniforms,
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{NativeCall, RecordingDevice};
    use crate::shader::UniformValue;
    use crate::types::{TextureFormat, TextureRef};

    const PIXEL: &str = "#version 330\nuniform vec4 tint;\nout vec4 color;\nvoid main() { color = tint; }\n";

    fn manager() -> ShaderManager {
        ShaderManager::default()
    }

    #[test]
    fn variants_compile_once_per_macro_set() {
        let mut device = RecordingDevice::new();
        let mut shaders = manager();
        let id = shaders.load(Shader::from_strings("tint", [(ShaderStage::Pixel, PIXEL)]));

        let mut a = Args::new();
        a.set_macro("FAST", 1);
        let first = shaders.resolve(id, &a, &mut device).expect("first");
        let again = shaders.resolve(id, &a, &mut device).expect("again");
        assert!(Arc::ptr_eq(&first, &again));

        let mut b = Args::new();
        b.set_macro("FAST", 0);
        let other = shaders.resolve(id, &b, &mut device).expect("other");
        assert_ne!(first.object(), other.object());

        let stats = shaders.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 2);
        assert_eq!(stats.compiles, 4);
        assert_eq!(stats.links, 2);
        assert_eq!(device.link_count(), 2);
        assert_eq!(shaders.variant_count(id), 2);
    }

    #[test]
    fn pixel_only_shaders_get_the_default_vertex_stage() {
        let mut device = RecordingDevice::new();
        let mut shaders = manager();
        let id = shaders.load(Shader::from_strings("tint", [(ShaderStage::Pixel, PIXEL)]));
        let program = shaders.resolve(id, &Args::new(), &mut device).expect("program");
        let vertex = program.stage_code(ShaderStage::Vertex).expect("vertex stage");
        assert!(vertex.contains("gl_VertexIndex"));
        assert!(vertex.contains("#define HAL_VERTEX_SHADER"));
        assert!(!program.is_compute());
        assert!(program.uniforms().get("tint").is_some_and(|u| !u.dummy));
    }

    #[test]
    fn failures_are_remapped_and_not_cached() {
        let mut device = RecordingDevice::new();
        device.fail_compiles_containing("BROKEN");
        let mut shaders = manager();
        let id = shaders.load(Shader::from_strings(
            "broken",
            [(ShaderStage::Pixel, "#version 330\nvoid main() {\nBROKEN\n}\n")],
        ));

        let err = shaders.resolve(id, &Args::new(), &mut device).expect_err("must fail");
        let ShaderError::Compile { shader, log } = err else {
            panic!("expected a compile error");
        };
        assert_eq!(shader, "broken");
        assert!(log.starts_with("<pixel source>(3) : error"), "{log}");
        assert_eq!(shaders.last_error(id), Some(log.as_str()));

        shaders.resolve(id, &Args::new(), &mut device).expect_err("still failing");
        assert_eq!(shaders.stats().cache_misses, 2);
        assert_eq!(shaders.variant_count(id), 0);
    }

    #[test]
    fn invalid_stage_combinations_fail_to_compile() {
        let mut device = RecordingDevice::new();
        let mut shaders = manager();
        let id = shaders.load(Shader::from_strings(
            "mixed",
            [
                (ShaderStage::Pixel, PIXEL),
                (ShaderStage::Compute, "void main() {}\n"),
            ],
        ));
        let err = shaders.resolve(id, &Args::new(), &mut device).expect_err("invalid");
        assert!(err.to_string().contains("invalid shader stage combination"));
        assert_eq!(device.compile_count(), 0);
    }

    #[test]
    fn prompt_retry_rereads_sources() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("flash.pix");
        std::fs::write(&path, "void main() {\nBROKEN\n}\n").expect("write");

        let fix = path.clone();
        let prompt = move |_: &str, _: &str| {
            std::fs::write(&fix, "void main() {}\n").expect("rewrite");
            RecoveryAction::Retry
        };
        let mut shaders = manager()
            .with_policy(FailurePolicy::Prompt)
            .with_prompt(Box::new(prompt));
        let mut device = RecordingDevice::new();
        device.fail_compiles_containing("BROKEN");

        let id = shaders.load(Shader::from_files([&path]).expect("load"));
        assert_eq!(shaders.shader(id).map(Shader::name), Some("flash"));
        shaders.resolve(id, &Args::new(), &mut device).expect("retried");
        assert_eq!(shaders.last_error(id), None);
    }

    #[test]
    fn prompt_abort_stops_compilation() {
        let mut device = RecordingDevice::new();
        device.fail_compiles_containing("BROKEN");
        let mut shaders = manager()
            .with_policy(FailurePolicy::Prompt)
            .with_prompt(Box::new(|_: &str, _: &str| RecoveryAction::Abort));
        let id = shaders.load(Shader::from_strings("x", [(ShaderStage::Pixel, "BROKEN\n")]));
        assert!(matches!(
            shaders.resolve(id, &Args::new(), &mut device),
            Err(ShaderError::Aborted(name)) if name == "x"
        ));
    }

    #[test]
    fn reload_all_keeps_stale_programs_on_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("glow.frag");
        std::fs::write(&path, "void main() {}\n").expect("write");

        let mut device = RecordingDevice::new();
        device.fail_compiles_containing("BROKEN");
        let mut shaders = manager().with_policy(FailurePolicy::Silent);
        let id = shaders.load(Shader::from_files([&path]).expect("load"));
        let first = shaders.resolve(id, &Args::new(), &mut device).expect("first");

        std::fs::write(&path, "void main() { float x = 1.0; }\n").expect("edit");
        let report = shaders.reload_all(&mut device).expect("reload");
        assert_eq!(report.recompiled, 1);
        assert!(report.is_clean());
        let second = shaders.resolve(id, &Args::new(), &mut device).expect("second");
        assert_ne!(first.object(), second.object());
        assert!(second.stage_code(ShaderStage::Pixel).is_some_and(|c| c.contains("float x")));

        drop(first);
        std::fs::write(&path, "BROKEN\n").expect("break");
        let report = shaders.reload_all(&mut device).expect("silent keeps going");
        assert_eq!(report.failed, 1);
        let third = shaders.resolve(id, &Args::new(), &mut device).expect("stale");
        assert_eq!(second.object(), third.object());
        assert!(device
            .calls()
            .iter()
            .any(|call| matches!(call, NativeCall::DeleteProgram(_))));
    }

    #[test]
    fn reload_all_surfaces_failures_under_error_policy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("glow.frag");
        std::fs::write(&path, "void main() {}\n").expect("write");

        let mut device = RecordingDevice::new();
        device.fail_compiles_containing("BROKEN");
        let mut shaders = manager().with_policy(FailurePolicy::Error);
        let id = shaders.load(Shader::from_files([&path]).expect("load"));
        let first = shaders.resolve(id, &Args::new(), &mut device).expect("first");

        std::fs::write(&path, "BROKEN\n").expect("break");
        let err = shaders.reload_all(&mut device).expect_err("error policy");
        assert!(matches!(&err, ShaderError::Compile { shader, .. } if shader == "glow"));
        let stale = shaders.resolve(id, &Args::new(), &mut device).expect("stale");
        assert_eq!(first.object(), stale.object());
        assert!(shaders.last_error(id).is_some());

        std::fs::remove_file(&path).expect("remove");
        assert!(shaders.reload_all(&mut device).is_err());
        assert_eq!(shaders.variant_count(id), 1);
    }

    #[test]
    fn reload_all_prompt_can_retry_or_abort() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("flash.pix");
        std::fs::write(&path, "void main() {}\n").expect("write");

        let fix = path.clone();
        let prompt = move |_: &str, _: &str| {
            std::fs::write(&fix, "void main() { float y = 2.0; }\n").expect("rewrite");
            RecoveryAction::Retry
        };
        let mut device = RecordingDevice::new();
        device.fail_compiles_containing("BROKEN");
        let mut shaders = manager()
            .with_policy(FailurePolicy::Prompt)
            .with_prompt(Box::new(prompt));
        let id = shaders.load(Shader::from_files([&path]).expect("load"));
        shaders.resolve(id, &Args::new(), &mut device).expect("first");

        std::fs::write(&path, "BROKEN\n").expect("break");
        let report = shaders.reload_all(&mut device).expect("retried");
        assert!(report.is_clean());
        assert_eq!(report.recompiled, 1);
        let program = shaders.resolve(id, &Args::new(), &mut device).expect("fixed");
        assert!(program.stage_code(ShaderStage::Pixel).is_some_and(|c| c.contains("float y")));

        let mut shaders = manager()
            .with_policy(FailurePolicy::Prompt)
            .with_prompt(Box::new(|_: &str, _: &str| RecoveryAction::Abort));
        std::fs::write(&path, "void main() {}\n").expect("restore");
        let id = shaders.load(Shader::from_files([&path]).expect("load"));
        shaders.resolve(id, &Args::new(), &mut device).expect("first");
        std::fs::write(&path, "BROKEN\n").expect("break again");
        assert!(matches!(
            shaders.reload_all(&mut device),
            Err(ShaderError::Aborted(name)) if name == "flash"
        ));
        assert_eq!(shaders.variant_count(id), 1);
    }

    #[test]
    fn reload_drops_variants() {
        let mut device = RecordingDevice::new();
        let mut shaders = manager();
        let id = shaders.load(Shader::from_strings("tint", [(ShaderStage::Pixel, PIXEL)]));
        let program = shaders.resolve(id, &Args::new(), &mut device).expect("program");
        shaders.reload(id, &mut device).expect("reload");
        assert_eq!(shaders.variant_count(id), 0);
        // Still held by the caller.
        assert_eq!(device.count(|c| matches!(c, NativeCall::DeleteProgram(_))), 0);
        drop(program);
        shaders.collect_garbage(&mut device);
        assert_eq!(device.count(|c| matches!(c, NativeCall::DeleteProgram(_))), 1);
    }

    #[test]
    fn bind_args_uploads_values_and_textures() {
        let mut device = RecordingDevice::new();
        let mut shaders = manager();
        let id = shaders.load(Shader::from_strings(
            "textured",
            [(
                ShaderStage::Pixel,
                "uniform sampler2D albedo;\nuniform vec4 tint;\nuniform float unused_noset_;\nout vec4 c;\nvoid main() { c = texture(albedo, vec2(0.0)) * tint; }\n",
            )],
        ));
        let program = shaders.resolve(id, &Args::new(), &mut device).expect("program");
        device.clear_calls();

        let texture = TextureRef::new_2d(7, TextureFormat::Rgba8, 4, 4);
        let mut args = Args::new();
        args.set_uniform("albedo", UniformValue::Texture(texture))
            .set_uniform("tint", UniformValue::Vec4([1.0; 4]))
            .set_uniform("not_declared", UniformValue::Float(0.0));
        program.bind_args(&args, &mut device);

        assert_eq!(
            device.count(|c| matches!(c, NativeCall::BindTexture { unit: 0, .. })),
            1
        );
        assert_eq!(device.count(|c| matches!(c, NativeCall::SetUniform { .. })), 2);
        let tint = device.calls().iter().find_map(|call| match call {
            NativeCall::SetUniform { bytes, .. } if bytes.len() == 16 => Some(bytes.clone()),
            _ => None,
        });
        assert_eq!(tint, Some(bytemuck::cast_slice(&[1.0f32; 4]).to_vec()));
    }

    #[test]
    #[should_panic(expected = "declared as Vec4")]
    fn bind_args_rejects_mismatched_types() {
        let mut device = RecordingDevice::new();
        let mut shaders = manager();
        let id = shaders.load(Shader::from_strings("tint", [(ShaderStage::Pixel, PIXEL)]));
        let program = shaders.resolve(id, &Args::new(), &mut device).expect("program");
        let mut args = Args::new();
        args.set_uniform("tint", UniformValue::Float(1.0));
        program.bind_args(&args, &mut device);
    }

    #[test]
    fn unknown_ids_are_errors() {
        let mut device = RecordingDevice::new();
        let mut shaders = manager();
        assert!(matches!(
            shaders.resolve(ShaderId(3), &Args::new(), &mut device),
            Err(ShaderError::UnknownShader(_))
        ));
    }
}
