use std::fmt;
use std::path::Path;

use serde::Serialize;

/// Programmable pipeline stage a source slot feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderStage {
    Vertex,
    TessControl,
    TessEval,
    Geometry,
    Pixel,
    Compute,
}

/// Number of stage slots in a program.
pub const STAGE_COUNT: usize = 6;

impl ShaderStage {
    pub const ALL: [ShaderStage; STAGE_COUNT] = [
        ShaderStage::Vertex,
        ShaderStage::TessControl,
        ShaderStage::TessEval,
        ShaderStage::Geometry,
        ShaderStage::Pixel,
        ShaderStage::Compute,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Conventional stage for a file extension (`.pix`, `.frag`, `.vrt`, ...).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "vrt" | "vert" | "vs" => Some(ShaderStage::Vertex),
            "ctl" | "tesc" => Some(ShaderStage::TessControl),
            "evl" | "tese" => Some(ShaderStage::TessEval),
            "geo" | "geom" | "gs" => Some(ShaderStage::Geometry),
            "pix" | "frag" | "fs" => Some(ShaderStage::Pixel),
            "glc" | "comp" | "cs" => Some(ShaderStage::Compute),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Name of the macro that identifies this stage in injected code.
    pub fn define_name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "HAL_VERTEX_SHADER",
            ShaderStage::TessControl => "HAL_TESS_CONTROL_SHADER",
            ShaderStage::TessEval => "HAL_TESS_EVALUATION_SHADER",
            ShaderStage::Geometry => "HAL_GEOMETRY_SHADER",
            ShaderStage::Pixel => "HAL_FRAGMENT_SHADER",
            ShaderStage::Compute => "HAL_COMPUTE_SHADER",
        }
    }

    /// Numeric value bound to [`ShaderStage::define_name`] (the GL stage enum).
    pub fn define_value(self) -> u32 {
        match self {
            ShaderStage::Vertex => 0x8B31,
            ShaderStage::TessControl => 0x8E88,
            ShaderStage::TessEval => 0x8E87,
            ShaderStage::Geometry => 0x8DD9,
            ShaderStage::Pixel => 0x8B30,
            ShaderStage::Compute => 0x91B9,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::TessControl => "tessellation control",
            ShaderStage::TessEval => "tessellation evaluation",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Pixel => "pixel",
            ShaderStage::Compute => "compute",
        };
        f.write_str(name)
    }
}
