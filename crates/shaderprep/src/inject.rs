//! Engine-inserted code placed between the extensions and the user preamble.

use crate::files::line_pragma;
use crate::stage::ShaderStage;

/// Uniforms the engine declares in every graphics stage and feeds from the
/// state stack on dispatch, as `(glsl type, name)`.
pub const ENGINE_UNIFORMS: [(&str, &str); 5] = [
    ("mat4", "hal_ObjectToWorldMatrix"),
    ("mat4", "hal_CameraToWorldMatrix"),
    ("mat4", "hal_WorldToCameraMatrix"),
    ("mat4", "hal_ProjectionMatrix"),
    ("float", "hal_InvertY"),
];

/// Stage defines plus, when `engine_uniforms` is set, the engine uniform
/// declarations. Attributed to file index 0.
pub fn engine_preamble(stage: ShaderStage, engine_uniforms: bool) -> String {
    let mut out = line_pragma(1, 0);
    for other in ShaderStage::ALL {
        out.push_str(&format!("#define {} 0x{:X}\n", other.define_name(), other.define_value()));
    }
    out.push_str(&format!("#define HAL_SHADER_STAGE {}\n", stage.define_name()));

    if engine_uniforms && stage != ShaderStage::Compute {
        for (ty, name) in ENGINE_UNIFORMS {
            out.push_str(&format!("uniform {ty} {name};\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defines_every_stage_and_the_current_one() {
        let preamble = engine_preamble(ShaderStage::Pixel, false);
        assert!(preamble.starts_with("#line 1 0\n"));
        assert!(preamble.contains("#define HAL_VERTEX_SHADER 0x8B31\n"));
        assert!(preamble.contains("#define HAL_SHADER_STAGE HAL_FRAGMENT_SHADER\n"));
        assert!(!preamble.contains("uniform"));
    }

    #[test]
    fn compute_stages_get_no_engine_uniforms() {
        assert!(engine_preamble(ShaderStage::Vertex, true).contains("uniform mat4 hal_ProjectionMatrix;\n"));
        assert!(!engine_preamble(ShaderStage::Compute, true).contains("uniform"));
    }
}
