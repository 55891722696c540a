//! Headless shader backend built on the GLSL frontend and validator that
//! ship with `wgpu`.
//!
//! Compiling parses one stage, linking validates every stage and checks the
//! stage combination, and reflection walks the parsed modules. The frontend
//! only understands Vulkan-flavoured GLSL 440 and later, so stage text is
//! normalised to `#version 450` and `#line` pragmas are blanked before
//! parsing. Reported lines are translated back through those pragmas, which
//! keeps logs in the `<file index>(<line>)` shape that `FileTable` remaps.

use std::collections::HashMap;

use shaderprep::{lexer, ShaderStage};
use tracing::debug;
use wgpu::naga;
use wgpu::naga::front::glsl::{Frontend, Options};
use wgpu::naga::valid::{Capabilities, ValidationFlags, Validator};

use crate::native::{ProgramObject, ShaderBackend, StageObject};
use crate::shader::{ActiveAttribute, ActiveUniform, GlslType};

#[derive(Debug, Clone)]
struct CompiledStage {
    stage: ShaderStage,
    module: naga::Module,
    source: String,
}

/// [`ShaderBackend`] that needs no GPU.
#[derive(Debug, Default)]
pub struct NagaBackend {
    frontend: Frontend,
    next_object: u32,
    stages: HashMap<StageObject, CompiledStage>,
    programs: HashMap<ProgramObject, Vec<CompiledStage>>,
}

impl NagaBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u32 {
        self.next_object += 1;
        self.next_object
    }
}

fn naga_stage(stage: ShaderStage) -> Option<naga::ShaderStage> {
    match stage {
        ShaderStage::Vertex => Some(naga::ShaderStage::Vertex),
        ShaderStage::Pixel => Some(naga::ShaderStage::Fragment),
        ShaderStage::Compute => Some(naga::ShaderStage::Compute),
        ShaderStage::TessControl | ShaderStage::TessEval | ShaderStage::Geometry => None,
    }
}

/// Rewrites the version line and blanks `#line` pragmas without changing
/// the number of lines.
pub fn normalise_for_frontend(source: &str) -> String {
    let mut out = String::with_capacity(source.len() + 16);
    let mut saw_version = false;
    for line in lexer::scan(source) {
        match line.directive.map(|directive| directive.keyword) {
            Some("version") if !saw_version => {
                saw_version = true;
                out.push_str("#version 450");
            }
            Some("line") => {}
            _ => out.push_str(line.text),
        }
        out.push('\n');
    }
    if !saw_version {
        out.insert_str(0, "#version 450\n");
    }
    out
}

/// `<file>(<line>)` of flattened `line` (1-based) in `source`.
fn original_location(source: &str, line: u32, shifted: bool) -> String {
    let index = (line as usize).saturating_sub(if shifted { 2 } else { 1 });
    match lexer::scan(source).get(index) {
        Some(found) => format!("{}({})", found.location.file, found.location.line),
        None => format!("0({line})"),
    }
}

fn has_version(source: &str) -> bool {
    lexer::scan(source)
        .iter()
        .any(|line| matches!(line.directive, Some(directive) if directive.keyword == "version"))
}

fn glsl_type(module: &naga::Module, ty: naga::Handle<naga::Type>) -> (GlslType, u32) {
    use naga::{ArraySize, ImageClass, ScalarKind, TypeInner, VectorSize};

    let scalar_name = |kind: ScalarKind| match kind {
        ScalarKind::Float | ScalarKind::AbstractFloat => "",
        ScalarKind::Sint | ScalarKind::AbstractInt => "i",
        ScalarKind::Uint => "u",
        ScalarKind::Bool => "b",
    };
    match &module.types[ty].inner {
        TypeInner::Scalar(scalar) => {
            let name = match scalar.kind {
                ScalarKind::Float | ScalarKind::AbstractFloat => "float",
                ScalarKind::Sint | ScalarKind::AbstractInt => "int",
                ScalarKind::Uint => "uint",
                ScalarKind::Bool => "bool",
            };
            (GlslType::from_glsl(name), 1)
        }
        TypeInner::Vector { size, scalar } => {
            let n = match size {
                VectorSize::Bi => 2,
                VectorSize::Tri => 3,
                VectorSize::Quad => 4,
            };
            (GlslType::from_glsl(&format!("{}vec{n}", scalar_name(scalar.kind))), 1)
        }
        TypeInner::Matrix { columns, rows, .. } if columns == rows => {
            let n = *columns as u8;
            (GlslType::from_glsl(&format!("mat{n}")), 1)
        }
        TypeInner::Array { base, size, .. } => {
            let (element, _) = glsl_type(module, *base);
            let count = match size {
                ArraySize::Constant(n) => n.get(),
                _ => 1,
            };
            (element, count)
        }
        TypeInner::Image { class, .. } => match class {
            ImageClass::Storage { .. } => (GlslType::Image("image".into()), 1),
            _ => (GlslType::Sampler("texture".into()), 1),
        },
        TypeInner::Sampler { .. } => (GlslType::Sampler("sampler".into()), 1),
        other => (GlslType::Other(format!("{other:?}")), 1),
    }
}

impl ShaderBackend for NagaBackend {
    fn compile_stage(&mut self, stage: ShaderStage, source: &str) -> Result<StageObject, String> {
        let naga_stage = naga_stage(stage)
            .ok_or_else(|| format!("0(1) : error : {stage} shaders are not supported by this backend\n"))?;
        let shifted = !has_version(source);
        let normalised = normalise_for_frontend(source);

        match self.frontend.parse(&Options::from(naga_stage), &normalised) {
            Ok(module) => {
                let object = StageObject(self.next());
                debug!(stage = %stage, object = object.0, "parsed stage");
                self.stages.insert(
                    object,
                    CompiledStage {
                        stage,
                        module,
                        source: source.to_string(),
                    },
                );
                Ok(object)
            }
            Err(errors) => {
                let mut log = String::new();
                for error in &errors.errors {
                    let location = error.meta.location(&normalised);
                    log.push_str(&format!(
                        "{} : error : {}\n",
                        original_location(source, location.line_number, shifted),
                        error.kind
                    ));
                }
                Err(log)
            }
        }
    }

    fn delete_stage(&mut self, stage: StageObject) {
        self.stages.remove(&stage);
    }

    fn link(&mut self, stages: &[StageObject]) -> Result<ProgramObject, String> {
        let mut compiled = Vec::with_capacity(stages.len());
        for object in stages {
            let stage = self
                .stages
                .get(object)
                .ok_or_else(|| format!("link error : unknown stage object {}\n", object.0))?;
            compiled.push(stage.clone());
        }

        let has = |wanted: ShaderStage| compiled.iter().any(|c| c.stage == wanted);
        let valid_combination = if has(ShaderStage::Compute) {
            compiled.len() == 1
        } else {
            has(ShaderStage::Vertex) && has(ShaderStage::Pixel)
        };
        if !valid_combination {
            return Err(
                "link error : programs need vertex and pixel stages, or a single compute stage\n".into(),
            );
        }

        let mut log = String::new();
        for stage in &compiled {
            let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
            if let Err(error) = validator.validate(&stage.module) {
                let normalised = normalise_for_frontend(&stage.source);
                let shifted = !has_version(&stage.source);
                let location = error
                    .spans()
                    .next()
                    .map(|(span, _)| span.location(&normalised).line_number)
                    .map_or_else(|| "0(0)".to_string(), |line| original_location(&stage.source, line, shifted));
                log.push_str(&format!("{location} : error : {}\n", error.as_inner()));
            }
        }
        if !log.is_empty() {
            return Err(log);
        }

        let program = ProgramObject(self.next());
        self.programs.insert(program, compiled);
        Ok(program)
    }

    fn active_uniforms(&mut self, program: ProgramObject) -> Vec<ActiveUniform> {
        let mut uniforms: Vec<ActiveUniform> = Vec::new();
        for stage in self.programs.get(&program).into_iter().flatten() {
            let module = &stage.module;
            for (_, global) in module.global_variables.iter() {
                if !matches!(global.space, naga::AddressSpace::Uniform | naga::AddressSpace::Handle) {
                    continue;
                }
                let Some(name) = global.name.clone() else {
                    continue;
                };
                if uniforms.iter().any(|u| u.name == name) {
                    continue;
                }
                let (ty, size) = glsl_type(module, global.ty);
                let location = uniforms.iter().map(|u| u.size as i32).sum();
                uniforms.push(ActiveUniform {
                    name,
                    ty,
                    size,
                    location,
                });
            }
        }
        uniforms
    }

    fn active_attributes(&mut self, program: ProgramObject) -> Vec<ActiveAttribute> {
        let mut attributes = Vec::new();
        for stage in self.programs.get(&program).into_iter().flatten() {
            let module = &stage.module;
            for entry in module
                .entry_points
                .iter()
                .filter(|entry| entry.stage == naga::ShaderStage::Vertex)
            {
                for argument in &entry.function.arguments {
                    if let Some(naga::Binding::Location { location, .. }) = &argument.binding {
                        attributes.push(ActiveAttribute {
                            name: argument.name.clone().unwrap_or_default(),
                            ty: glsl_type(module, argument.ty).0,
                            location: *location as i32,
                        });
                    }
                }
            }
        }
        attributes
    }

    fn delete_program(&mut self, program: ProgramObject) {
        self.programs.remove(&program);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = "#version 450\nlayout(location = 0) in vec3 position;\nvoid main() { gl_Position = vec4(position, 1.0); }\n";
    const PIXEL: &str = "#version 450\nlayout(location = 0) out vec4 color;\nvoid main() { color = vec4(1.0); }\n";

    #[test]
    fn normalising_keeps_line_count() {
        let source = "#version 330 core\n#line 1 2\nvoid main() {}\n";
        let normalised = normalise_for_frontend(source);
        assert_eq!(normalised, "#version 450\n\nvoid main() {}\n");
        assert_eq!(normalised.lines().count(), source.lines().count());
    }

    #[test]
    fn parse_errors_point_at_original_lines() {
        let mut backend = NagaBackend::new();
        let source = "#version 330\n#line 1 2\nvoid main() {\n    float x = ;\n}\n";
        let err = backend
            .compile_stage(ShaderStage::Pixel, source)
            .expect_err("syntax error");
        assert!(err.starts_with("2(2) : error : "), "{err}");
    }

    #[test]
    fn links_and_reflects_graphics_programs() {
        let mut backend = NagaBackend::new();
        let vs = backend.compile_stage(ShaderStage::Vertex, VERTEX).expect("vertex");
        let ps = backend.compile_stage(ShaderStage::Pixel, PIXEL).expect("pixel");
        let program = backend.link(&[vs, ps]).expect("link");

        let attributes = backend.active_attributes(program);
        assert_eq!(attributes.len(), 1);
        assert_eq!(attributes[0].name, "position");
        assert_eq!(attributes[0].ty, GlslType::Vec3);
        assert!(backend.active_uniforms(program).is_empty());
    }

    #[test]
    fn rejects_incomplete_graphics_programs() {
        let mut backend = NagaBackend::new();
        let ps = backend.compile_stage(ShaderStage::Pixel, PIXEL).expect("pixel");
        let err = backend.link(&[ps]).expect_err("no vertex stage");
        assert!(err.contains("vertex and pixel"));
    }

    #[test]
    fn geometry_stages_are_unsupported() {
        let mut backend = NagaBackend::new();
        let err = backend
            .compile_stage(ShaderStage::Geometry, "void main() {}\n")
            .expect_err("unsupported");
        assert!(err.contains("geometry shaders are not supported"));
    }
}
