//! `#extension` hoisting.
//!
//! GLSL requires extension directives before any other code, but includes
//! and injected preambles push them down. They are pulled out of the body
//! (leaving blank lines behind) and re-emitted right after `#version`.

use crate::lexer;

/// Removes `#extension` lines from `code` and returns them, newline-terminated,
/// in source order. Duplicates are emitted once.
pub fn extract_extensions(code: &mut String) -> String {
    let mut extensions: Vec<String> = Vec::new();
    let mut out = String::with_capacity(code.len());

    for line in lexer::scan(code) {
        match line.directive {
            Some(directive) if directive.keyword == "extension" => {
                let normalised = format!("#extension {}", directive.rest);
                if !extensions.contains(&normalised) {
                    extensions.push(normalised);
                }
                out.push('\n');
            }
            _ => {
                out.push_str(line.text);
                out.push('\n');
            }
        }
    }

    *code = out;
    lexer::join_lines(extensions.iter().map(String::as_str))
}

/// Merges configured default extension lines with those hoisted from a source.
pub fn merge_extensions(defaults: &[String], hoisted: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in defaults.iter().map(|line| line.trim()).chain(hoisted.lines()) {
        if !line.is_empty() && !lines.contains(&line) {
            lines.push(line);
        }
    }
    lexer::join_lines(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hoists_extension_lines() {
        let mut code = String::from(
            "float a;\n#extension GL_ARB_gpu_shader5 : enable\nfloat b;\n#  extension GL_ARB_gpu_shader5 : enable\n",
        );
        let hoisted = extract_extensions(&mut code);
        assert_eq!(hoisted, "#extension GL_ARB_gpu_shader5 : enable\n");
        assert_eq!(code, "float a;\n\nfloat b;\n\n");
    }

    #[test]
    fn defaults_come_first_without_duplicates() {
        let defaults = vec![
            "#extension GL_ARB_texture_query_lod : enable".to_string(),
            "#extension GL_ARB_gpu_shader5 : enable".to_string(),
        ];
        let merged = merge_extensions(&defaults, "#extension GL_ARB_gpu_shader5 : enable\n#extension GL_EXT_x : require\n");
        assert_eq!(
            merged,
            "#extension GL_ARB_texture_query_lod : enable\n#extension GL_ARB_gpu_shader5 : enable\n#extension GL_EXT_x : require\n"
        );
    }
}
