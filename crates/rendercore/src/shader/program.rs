use shaderprep::{FileTable, ProgramKind, ShaderStage};
use tracing::trace;

use crate::native::{NativeDevice, ProgramObject};
use crate::shader::args::{Args, UniformValue};
use crate::shader::reflect::{AttributeTable, UniformTable};

/// A linked shader variant.
///
/// Programs are shared as `Arc<ShaderProgram>`; the native object stays
/// alive until its variant is evicted and no caller holds it anymore.
#[derive(Debug)]
pub struct ShaderProgram {
    pub(crate) object: ProgramObject,
    pub(crate) kind: ProgramKind,
    pub(crate) stage_code: Vec<(ShaderStage, String)>,
    pub(crate) files: FileTable,
    pub(crate) uniforms: UniformTable,
    pub(crate) attributes: AttributeTable,
}

impl ShaderProgram {
    pub fn object(&self) -> ProgramObject {
        self.object
    }

    pub fn kind(&self) -> ProgramKind {
        self.kind
    }

    pub fn is_compute(&self) -> bool {
        self.kind == ProgramKind::Compute
    }

    /// Final text handed to the compiler for `stage`.
    pub fn stage_code(&self, stage: ShaderStage) -> Option<&str> {
        self.stage_code
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, code)| code.as_str())
    }

    pub fn stages(&self) -> impl Iterator<Item = ShaderStage> + '_ {
        self.stage_code.iter().map(|(stage, _)| *stage)
    }

    /// File-index table for the `#line` pragmas in the stage code.
    pub fn files(&self) -> &FileTable {
        &self.files
    }

    pub fn uniforms(&self) -> &UniformTable {
        &self.uniforms
    }

    pub fn attributes(&self) -> &AttributeTable {
        &self.attributes
    }

    /// Uploads every uniform in `args` to this program.
    ///
    /// Names the program does not declare are skipped, as are declared
    /// uniforms the driver optimised away. Textures and images are bound to
    /// the unit assigned to their uniform.
    ///
    /// # Panics
    ///
    /// When a value does not match the declared type of its uniform.
    pub fn bind_args<D: NativeDevice + ?Sized>(&self, args: &Args, device: &mut D) {
        for (name, value) in args.uniforms() {
            let Some(decl) = self.uniforms.get(name) else {
                trace!(uniform = %name, "argument not declared by program");
                continue;
            };
            if decl.dummy {
                continue;
            }
            assert!(
                value.matches(&decl.ty),
                "uniform {name} is declared as {:?} but was given a {} argument",
                decl.ty,
                value.type_name()
            );
            match value {
                UniformValue::Texture(texture) | UniformValue::Image(texture) => {
                    let unit = decl.unit.unwrap_or(0);
                    device.bind_texture(unit, texture);
                    device.set_uniform(self.object, decl.location, &UniformValue::Int(unit as i32));
                }
                other => device.set_uniform(self.object, decl.location, other),
            }
        }
    }
}
