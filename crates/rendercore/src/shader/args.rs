use std::collections::BTreeMap;

use serde::Serialize;
use shaderprep::Macros;

use crate::shader::reflect::GlslType;
use crate::types::{Mat4, PrimitiveType, TextureRef};

/// Value bound to a uniform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Int(i32),
    IVec2([i32; 2]),
    IVec3([i32; 3]),
    IVec4([i32; 4]),
    UInt(u32),
    Bool(bool),
    Mat3([[f32; 3]; 3]),
    Mat4(Mat4),
    /// Texture sampled through a `sampler*` uniform.
    Texture(TextureRef),
    /// Texture bound for load/store through an `image*` uniform.
    Image(TextureRef),
}

impl UniformValue {
    /// Whether this value may be bound to a uniform declared as `ty`.
    ///
    /// Samplers of every dimension accept any texture.
    pub fn matches(&self, ty: &GlslType) -> bool {
        matches!(
            (self, ty),
            (UniformValue::Float(_), GlslType::Float)
                | (UniformValue::Vec2(_), GlslType::Vec2)
                | (UniformValue::Vec3(_), GlslType::Vec3)
                | (UniformValue::Vec4(_), GlslType::Vec4)
                | (UniformValue::Int(_), GlslType::Int)
                | (UniformValue::IVec2(_), GlslType::IVec2)
                | (UniformValue::IVec3(_), GlslType::IVec3)
                | (UniformValue::IVec4(_), GlslType::IVec4)
                | (UniformValue::UInt(_), GlslType::UInt)
                | (UniformValue::Bool(_), GlslType::Bool)
                | (UniformValue::Mat3(_), GlslType::Mat3)
                | (UniformValue::Mat4(_), GlslType::Mat4)
                | (UniformValue::Texture(_), GlslType::Sampler(_))
                | (UniformValue::Image(_), GlslType::Image(_))
        )
    }

    /// Std140-compatible bytes for value uniforms; empty for textures.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            UniformValue::Float(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Vec2(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::Vec3(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::Vec4(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::Int(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::IVec2(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::IVec3(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::IVec4(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::UInt(v) => bytemuck::bytes_of(v).to_vec(),
            UniformValue::Bool(v) => bytemuck::bytes_of(&u32::from(*v)).to_vec(),
            UniformValue::Mat3(cols) => cols
                .iter()
                .flat_map(|col| [col[0], col[1], col[2], 0.0])
                .flat_map(f32::to_ne_bytes)
                .collect(),
            UniformValue::Mat4(m) => bytemuck::cast_slice(m.as_array()).to_vec(),
            UniformValue::Texture(_) | UniformValue::Image(_) => Vec::new(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            UniformValue::Float(_) => "float",
            UniformValue::Vec2(_) => "vec2",
            UniformValue::Vec3(_) => "vec3",
            UniformValue::Vec4(_) => "vec4",
            UniformValue::Int(_) => "int",
            UniformValue::IVec2(_) => "ivec2",
            UniformValue::IVec3(_) => "ivec3",
            UniformValue::IVec4(_) => "ivec4",
            UniformValue::UInt(_) => "uint",
            UniformValue::Bool(_) => "bool",
            UniformValue::Mat3(_) => "mat3",
            UniformValue::Mat4(_) => "mat4",
            UniformValue::Texture(_) => "texture",
            UniformValue::Image(_) => "image",
        }
    }
}

/// Geometry submitted by a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrawArgs {
    pub primitive: PrimitiveType,
    pub count: u32,
    pub first: u32,
    pub indexed: bool,
    pub instances: u32,
}

/// Whether a set of arguments describes a draw or a compute dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgsDomain {
    Draw(DrawArgs),
    Compute([u32; 3]),
}

/// Everything a shader invocation is parameterised by: macros and preamble
/// select the variant, uniforms and geometry drive the call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    macros: BTreeMap<String, String>,
    preamble: String,
    uniforms: BTreeMap<String, UniformValue>,
    draw: Option<DrawArgs>,
    compute_grid: Option<[u32; 3]>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines `name` as `value`; a later definition of the same name wins.
    pub fn set_macro(&mut self, name: impl Into<String>, value: impl ToString) -> &mut Self {
        self.macros.insert(name.into(), value.to_string());
        self
    }

    pub fn macros(&self) -> &BTreeMap<String, String> {
        &self.macros
    }

    pub fn set_preamble(&mut self, preamble: impl Into<String>) -> &mut Self {
        self.preamble = preamble.into();
        self
    }

    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    pub fn set_uniform(&mut self, name: impl Into<String>, value: UniformValue) -> &mut Self {
        self.uniforms.insert(name.into(), value);
        self
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms.get(name)
    }

    pub fn uniforms(&self) -> impl Iterator<Item = (&str, &UniformValue)> {
        self.uniforms.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Sequential draw of `count` vertices.
    pub fn set_primitive(&mut self, primitive: PrimitiveType, count: u32) -> &mut Self {
        self.draw = Some(DrawArgs {
            primitive,
            count,
            first: 0,
            indexed: false,
            instances: 1,
        });
        self
    }

    /// Indexed draw of `count` indices starting at `first`.
    pub fn set_indexed(&mut self, primitive: PrimitiveType, first: u32, count: u32) -> &mut Self {
        self.draw = Some(DrawArgs {
            primitive,
            count,
            first,
            indexed: true,
            instances: 1,
        });
        self
    }

    pub fn set_instances(&mut self, instances: u32) -> &mut Self {
        if let Some(draw) = self.draw.as_mut() {
            draw.instances = instances;
        }
        self
    }

    pub fn set_compute_grid(&mut self, x: u32, y: u32, z: u32) -> &mut Self {
        self.compute_grid = Some([x, y, z]);
        self
    }

    /// Draw or compute parameters.
    ///
    /// # Panics
    ///
    /// When both or neither were set.
    pub fn domain(&self) -> ArgsDomain {
        match (self.draw, self.compute_grid) {
            (Some(draw), None) => ArgsDomain::Draw(draw),
            (None, Some(grid)) => ArgsDomain::Compute(grid),
            (Some(_), Some(_)) => panic!("shader args carry both draw and compute parameters"),
            (None, None) => panic!("shader args carry neither draw nor compute parameters"),
        }
    }

    /// Merges `other` into `self`; `other` wins on conflicting names.
    pub fn append(&mut self, other: &Args) {
        self.macros
            .extend(other.macros.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.uniforms
            .extend(other.uniforms.iter().map(|(k, v)| (k.clone(), v.clone())));
        if !other.preamble.is_empty() {
            if !self.preamble.is_empty() {
                self.preamble.push('\n');
            }
            self.preamble.push_str(&other.preamble);
        }
        if other.draw.is_some() {
            self.draw = other.draw;
        }
        if other.compute_grid.is_some() {
            self.compute_grid = other.compute_grid;
        }
    }

    /// Variant key and injected text: the preamble, a newline, then one
    /// `#define NAME VALUE` line per macro sorted by name.
    pub fn preamble_and_macro_string(&self) -> String {
        let mut out = String::with_capacity(self.preamble.len() + 32 * self.macros.len() + 1);
        out.push_str(&self.preamble);
        out.push('\n');
        for (name, value) in &self.macros {
            out.push_str(&format!("#define {name} {value}\n"));
        }
        out
    }
}

impl Macros for Args {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.macros.get(name).map(String::as_str)
    }
}
