//! Uniform and attribute tables built from backend reflection plus a
//! lexical scan of the final stage code.
//!
//! Drivers only report variables that survive dead-code elimination. Binding
//! an argument to a declared-but-unused uniform is legal, so every declared
//! name gets a dummy entry (location -1) that binding skips silently, while a
//! name that is not declared at all is still distinguishable.

use std::collections::HashMap;

use serde::Serialize;
use shaderprep::lexer;

/// GLSL type of a reflected variable, compared canonically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum GlslType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Int,
    IVec2,
    IVec3,
    IVec4,
    UInt,
    Bool,
    Mat2,
    Mat3,
    Mat4,
    /// Any `sampler*` type; the GLSL spelling is kept for diagnostics.
    Sampler(String),
    /// Any `image*` type.
    Image(String),
    Other(String),
}

impl GlslType {
    pub fn from_glsl(name: &str) -> Self {
        match name {
            "float" => GlslType::Float,
            "vec2" => GlslType::Vec2,
            "vec3" => GlslType::Vec3,
            "vec4" => GlslType::Vec4,
            "int" => GlslType::Int,
            "ivec2" => GlslType::IVec2,
            "ivec3" => GlslType::IVec3,
            "ivec4" => GlslType::IVec4,
            "uint" => GlslType::UInt,
            "bool" => GlslType::Bool,
            "mat2" => GlslType::Mat2,
            "mat3" => GlslType::Mat3,
            "mat4" => GlslType::Mat4,
            other if other.contains("sampler") => GlslType::Sampler(other.to_string()),
            other if other.contains("image") => GlslType::Image(other.to_string()),
            other => GlslType::Other(other.to_string()),
        }
    }

    /// Samplers and images take texture units rather than values.
    pub fn is_opaque(&self) -> bool {
        matches!(self, GlslType::Sampler(_) | GlslType::Image(_))
    }
}

/// Uniform as reported by a backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveUniform {
    pub name: String,
    pub ty: GlslType,
    /// Array length; 1 for scalars.
    pub size: u32,
    pub location: i32,
}

/// Vertex attribute as reported by a backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveAttribute {
    pub name: String,
    pub ty: GlslType,
    pub location: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniformDecl {
    pub name: String,
    pub ty: GlslType,
    pub location: i32,
    /// Texture unit assigned to sampler and image uniforms.
    pub unit: Option<u32>,
    /// Declared but not active: binding to it is a silent no-op.
    pub dummy: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UniformTable {
    entries: Vec<UniformDecl>,
    #[serde(skip)]
    by_name: HashMap<String, usize>,
}

impl UniformTable {
    pub fn get(&self, name: &str) -> Option<&UniformDecl> {
        self.by_name.get(name).map(|&index| &self.entries[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &UniformDecl> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that a driver actually reported.
    pub fn active(&self) -> impl Iterator<Item = &UniformDecl> {
        self.entries.iter().filter(|entry| !entry.dummy)
    }

    fn insert(&mut self, decl: UniformDecl) {
        if self.by_name.contains_key(&decl.name) {
            return;
        }
        self.by_name.insert(decl.name.clone(), self.entries.len());
        self.entries.push(decl);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeDecl {
    pub name: String,
    pub ty: GlslType,
    pub location: i32,
    pub dummy: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttributeTable {
    entries: Vec<AttributeDecl>,
}

impl AttributeTable {
    pub fn get(&self, name: &str) -> Option<&AttributeDecl> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeDecl> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Array extent of a lexically declared variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArraySize {
    Literal(u32),
    /// Size given by a macro or expression that was not resolved lexically.
    Symbolic(String),
}

/// `qualifier type name[size]` found by [`scan_declarations`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub ty: String,
    pub name: String,
    pub array: Option<ArraySize>,
}

/// Finds declarations introduced by any of `qualifiers` (`uniform`, `in`,
/// `attribute`) outside comments and directives. Interface blocks are skipped.
pub fn scan_declarations(code: &str, qualifiers: &[&str]) -> Vec<Declaration> {
    let mut found = Vec::new();
    let mut in_block_comment = false;

    for line in lexer::scan(code) {
        let text = strip_comments(line.text, &mut in_block_comment);
        if line.directive.is_some() {
            continue;
        }
        let Ok(tokens) = lexer::tokenize(&text) else {
            continue;
        };
        let Some(start) = tokens
            .iter()
            .position(|token| qualifiers.iter().any(|q| token.is_ident(q)))
        else {
            continue;
        };

        let mut rest = tokens[start + 1..].iter().peekable();
        // Precision and interpolation qualifiers before the type.
        while let Some(lexer::Token::Ident(word)) = rest.peek() {
            if matches!(word.as_str(), "highp" | "mediump" | "lowp" | "flat" | "smooth" | "noperspective") {
                rest.next();
            } else {
                break;
            }
        }
        let Some(lexer::Token::Ident(ty)) = rest.next() else {
            continue;
        };

        loop {
            let Some(lexer::Token::Ident(name)) = rest.next() else {
                break;
            };
            let mut array = None;
            if rest.peek().is_some_and(|t| t.is_punct('[')) {
                rest.next();
                let mut size = String::new();
                for token in rest.by_ref() {
                    if token.is_punct(']') {
                        break;
                    }
                    size.push_str(&token.to_string());
                }
                array = Some(match size.parse::<u32>() {
                    Ok(n) => ArraySize::Literal(n),
                    Err(_) => ArraySize::Symbolic(size),
                });
            }
            found.push(Declaration {
                ty: ty.clone(),
                name: name.clone(),
                array,
            });
            // Skip initialisers up to the next declarator.
            let mut more = false;
            for token in rest.by_ref() {
                if token.is_punct(',') {
                    more = true;
                    break;
                }
                if token.is_punct(';') {
                    break;
                }
            }
            if !more {
                break;
            }
        }
    }
    found
}

fn strip_comments(text: &str, in_block_comment: &mut bool) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        if *in_block_comment {
            match rest.find("*/") {
                Some(end) => {
                    *in_block_comment = false;
                    rest = &rest[end + 2..];
                }
                None => return out,
            }
        }
        let line_comment = rest.find("//");
        let block_comment = rest.find("/*");
        match (line_comment, block_comment) {
            (Some(l), Some(b)) if l < b => {
                out.push_str(&rest[..l]);
                return out;
            }
            (Some(l), None) => {
                out.push_str(&rest[..l]);
                return out;
            }
            (_, Some(b)) => {
                out.push_str(&rest[..b]);
                out.push(' ');
                *in_block_comment = true;
                rest = &rest[b + 2..];
            }
            (None, None) => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

/// Builds the uniform table for a linked program.
///
/// Active arrays expand to `name[i]` elements at consecutive locations.
/// Sampler and image uniforms receive texture units in reported order.
pub fn build_uniform_table(active: &[ActiveUniform], stage_code: &[&str]) -> UniformTable {
    let mut table = UniformTable::default();
    let mut next_unit = 0u32;

    for uniform in active {
        let base = uniform.name.strip_suffix("[0]").unwrap_or(&uniform.name);
        let dummy = uniform.location < 0 || base.starts_with("gl_");
        let elements: Vec<String> = if uniform.size > 1 {
            (0..uniform.size).map(|i| format!("{base}[{i}]")).collect()
        } else {
            vec![base.to_string()]
        };
        for (offset, name) in elements.into_iter().enumerate() {
            let unit = (!dummy && uniform.ty.is_opaque()).then(|| {
                let unit = next_unit;
                next_unit += 1;
                unit
            });
            table.insert(UniformDecl {
                name,
                ty: uniform.ty.clone(),
                location: if dummy { -1 } else { uniform.location + offset as i32 },
                unit,
                dummy,
            });
        }
    }

    for code in stage_code {
        for decl in scan_declarations(code, &["uniform"]) {
            if decl.name.contains("_noset_") {
                continue;
            }
            let ty = GlslType::from_glsl(&decl.ty);
            let names = match &decl.array {
                Some(ArraySize::Literal(n)) => (0..*n).map(|i| format!("{}[{i}]", decl.name)).collect(),
                Some(ArraySize::Symbolic(_)) | None => vec![decl.name.clone()],
            };
            for name in names {
                table.insert(UniformDecl {
                    name,
                    ty: ty.clone(),
                    location: -1,
                    unit: None,
                    dummy: true,
                });
            }
        }
    }
    table
}

/// Builds the attribute table from backend reflection and the vertex stage code.
pub fn build_attribute_table(active: &[ActiveAttribute], vertex_code: Option<&str>) -> AttributeTable {
    let mut entries: Vec<AttributeDecl> = active
        .iter()
        .map(|attribute| AttributeDecl {
            name: attribute.name.clone(),
            ty: attribute.ty.clone(),
            location: attribute.location,
            dummy: attribute.location < 0 || attribute.name.starts_with("gl_"),
        })
        .collect();

    if let Some(code) = vertex_code {
        for decl in scan_declarations(code, &["in", "attribute"]) {
            if entries.iter().any(|entry| entry.name == decl.name) {
                continue;
            }
            entries.push(AttributeDecl {
                name: decl.name,
                ty: GlslType::from_glsl(&decl.ty),
                location: -1,
                dummy: true,
            });
        }
    }
    AttributeTable { entries }
}
