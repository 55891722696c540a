//! Per-stage source slots for one shader.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::PreprocessError;
use crate::stage::{ShaderStage, STAGE_COUNT};

/// Vertex stage substituted for pixel-only shaders: one oversized triangle
/// covering the viewport.
pub const DEFAULT_VERTEX_SOURCE: &str = "\
void main() {
    vec2 corner = vec2(float((gl_VertexIndex << 1) & 2), float(gl_VertexIndex & 2));
    gl_Position = vec4(corner * 2.0 - 1.0, 0.0, 1.0);
}
";

/// File-table name of [`DEFAULT_VERTEX_SOURCE`].
pub const DEFAULT_VERTEX_NAME: &str = "<default vertex shader>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin {
    File(PathBuf),
    Inline(String),
}

/// Raw text of one stage and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSource {
    pub stage: ShaderStage,
    pub origin: SourceOrigin,
    pub text: String,
}

impl StageSource {
    /// Name recorded in the file table and shown in diagnostics.
    pub fn name(&self) -> String {
        match &self.origin {
            SourceOrigin::File(path) => path.display().to_string(),
            SourceOrigin::Inline(label) => label.clone(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.origin {
            SourceOrigin::File(path) => Some(path),
            SourceOrigin::Inline(_) => None,
        }
    }
}

/// Stage combination a set of sources compiles to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    /// Rasterisation program; `default_vertex` when the vertex stage is synthesised.
    Graphics { default_vertex: bool },
    Compute,
}

/// Six optional stage slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSources {
    slots: [Option<StageSource>; STAGE_COUNT],
}

impl StageSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads each file into the slot its extension names.
    pub fn from_files<I, P>(paths: I) -> Result<Self, PreprocessError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut sources = Self::new();
        for path in paths {
            let path = path.as_ref();
            let stage = ShaderStage::from_path(path)
                .ok_or_else(|| PreprocessError::UnknownStage(path.to_path_buf()))?;
            if sources.get(stage).is_some() {
                return Err(PreprocessError::DuplicateStage {
                    stage,
                    path: path.to_path_buf(),
                });
            }
            sources.set_file(stage, path)?;
        }
        Ok(sources)
    }

    /// Builds sources from in-memory text; each is labelled `<stage> source`.
    pub fn from_strings<'a, I>(sources: I) -> Self
    where
        I: IntoIterator<Item = (ShaderStage, &'a str)>,
    {
        let mut out = Self::new();
        for (stage, text) in sources {
            out.set_string(stage, format!("<{stage} source>"), text);
        }
        out
    }

    pub fn set_file(&mut self, stage: ShaderStage, path: &Path) -> Result<(), PreprocessError> {
        let text = read_source(path)?;
        self.slots[stage.index()] = Some(StageSource {
            stage,
            origin: SourceOrigin::File(path.to_path_buf()),
            text,
        });
        Ok(())
    }

    pub fn set_string(&mut self, stage: ShaderStage, label: impl Into<String>, text: impl Into<String>) {
        self.slots[stage.index()] = Some(StageSource {
            stage,
            origin: SourceOrigin::Inline(label.into()),
            text: text.into(),
        });
    }

    pub fn clear(&mut self, stage: ShaderStage) {
        self.slots[stage.index()] = None;
    }

    pub fn get(&self, stage: ShaderStage) -> Option<&StageSource> {
        self.slots[stage.index()].as_ref()
    }

    /// Present stages in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &StageSource> {
        self.slots.iter().flatten()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.iter().filter_map(StageSource::path)
    }

    /// Re-reads every file-backed stage. Inline stages are kept.
    pub fn reload(&mut self) -> Result<(), PreprocessError> {
        for slot in self.slots.iter_mut().flatten() {
            if let SourceOrigin::File(path) = &slot.origin {
                slot.text = read_source(path)?;
            }
        }
        Ok(())
    }

    /// Classifies the stage combination, or explains why it cannot link.
    pub fn kind(&self) -> Result<ProgramKind, String> {
        let has = |stage| self.get(stage).is_some();
        let graphics_stages = [
            ShaderStage::Vertex,
            ShaderStage::TessControl,
            ShaderStage::TessEval,
            ShaderStage::Geometry,
            ShaderStage::Pixel,
        ];
        let any_graphics = graphics_stages.into_iter().any(has);

        if has(ShaderStage::Compute) {
            return if any_graphics {
                Err("a compute stage cannot be combined with graphics stages".into())
            } else {
                Ok(ProgramKind::Compute)
            };
        }
        if !has(ShaderStage::Pixel) {
            return Err(if any_graphics {
                "graphics programs need a pixel stage".into()
            } else {
                "no shader stages were supplied".into()
            });
        }
        if has(ShaderStage::Vertex) {
            return Ok(ProgramKind::Graphics {
                default_vertex: false,
            });
        }
        if [ShaderStage::TessControl, ShaderStage::TessEval, ShaderStage::Geometry]
            .into_iter()
            .any(has)
        {
            return Err("tessellation and geometry stages need an explicit vertex stage".into());
        }
        Ok(ProgramKind::Graphics {
            default_vertex: true,
        })
    }
}

fn read_source(path: &Path) -> Result<String, PreprocessError> {
    debug!(path = %path.display(), "reading shader source");
    fs::read_to_string(path).map_err(|source| PreprocessError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_files_by_extension() {
        let dir = TempDir::new().expect("tempdir");
        let pix = dir.path().join("shade.pix");
        let vrt = dir.path().join("shade.vrt");
        fs::write(&pix, "void main() {}\n").expect("write pix");
        fs::write(&vrt, "void main() {}\n").expect("write vrt");

        let sources = StageSources::from_files([&vrt, &pix]).expect("sources");
        assert_eq!(sources.iter().count(), 2);
        assert_eq!(sources.get(ShaderStage::Pixel).map(StageSource::name), Some(pix.display().to_string()));
        assert_eq!(sources.kind(), Ok(ProgramKind::Graphics { default_vertex: false }));
    }

    #[test]
    fn rejects_unknown_and_duplicate_stages() {
        let dir = TempDir::new().expect("tempdir");
        let a = dir.path().join("a.frag");
        let b = dir.path().join("b.pix");
        let c = dir.path().join("c.glsl");
        for path in [&a, &b, &c] {
            fs::write(path, "").expect("write");
        }
        assert!(matches!(
            StageSources::from_files([&c]),
            Err(PreprocessError::UnknownStage(_))
        ));
        assert!(matches!(
            StageSources::from_files([&a, &b]),
            Err(PreprocessError::DuplicateStage { stage: ShaderStage::Pixel, .. })
        ));
    }

    #[test]
    fn classifies_stage_combinations() {
        let pixel_only = StageSources::from_strings([(ShaderStage::Pixel, "")]);
        assert_eq!(pixel_only.kind(), Ok(ProgramKind::Graphics { default_vertex: true }));

        let compute = StageSources::from_strings([(ShaderStage::Compute, "")]);
        assert_eq!(compute.kind(), Ok(ProgramKind::Compute));

        assert!(StageSources::from_strings([(ShaderStage::Compute, ""), (ShaderStage::Pixel, "")])
            .kind()
            .is_err());
        assert!(StageSources::from_strings([(ShaderStage::Vertex, "")]).kind().is_err());
        assert!(StageSources::from_strings([(ShaderStage::Geometry, ""), (ShaderStage::Pixel, "")])
            .kind()
            .is_err());
        assert!(StageSources::new().kind().is_err());
    }

    #[test]
    fn reload_rereads_files() {
        let dir = TempDir::new().expect("tempdir");
        let pix = dir.path().join("live.pix");
        fs::write(&pix, "// one\n").expect("write");
        let mut sources = StageSources::from_files([&pix]).expect("sources");
        fs::write(&pix, "// two\n").expect("rewrite");
        sources.reload().expect("reload");
        assert_eq!(sources.get(ShaderStage::Pixel).map(|s| s.text.as_str()), Some("// two\n"));
    }
}
