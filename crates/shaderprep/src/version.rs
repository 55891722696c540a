//! `#version` canonicalisation.
//!
//! A source may offer alternatives, `#version 330 or 400 core or 420`, and
//! the highest listed version the driver supports is chosen. The directive
//! line is blanked (its newline kept so line numbers hold) and the chosen
//! line is returned for the assembler to emit first.

use crate::diagnostics::Diagnostics;
use crate::files::FileTable;
use crate::lexer::{self, Token};

/// GLSL versions a `#version` directive may name.
pub const VALID_GLSL_VERSIONS: [u32; 13] =
    [110, 120, 130, 140, 150, 330, 400, 410, 420, 430, 440, 450, 460];

/// Version line used when a source has no `#version` directive.
pub const DEFAULT_VERSION_LINE: &str = "#version 330\n";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    version: u32,
    profile: Option<String>,
}

/// Picks the best alternative in a `#version` argument list.
///
/// Returns the canonical `#version N [profile]\n` line, or an error message
/// when the list is malformed or nothing fits under `capability`.
pub fn canonicalize_version(rest: &str, capability: u32) -> Result<String, String> {
    let candidates = parse_candidates(rest)?;
    if let Some(bad) = candidates
        .iter()
        .find(|candidate| !VALID_GLSL_VERSIONS.contains(&candidate.version))
    {
        return Err(format!("{} is not a valid GLSL version", bad.version));
    }
    let best = candidates
        .into_iter()
        .filter(|candidate| candidate.version <= capability)
        .max_by_key(|candidate| candidate.version)
        .ok_or_else(|| format!("no listed GLSL version is supported (driver supports {capability})"))?;

    Ok(match best.profile {
        Some(profile) => format!("#version {} {}\n", best.version, profile),
        None => format!("#version {}\n", best.version),
    })
}

fn parse_candidates(rest: &str) -> Result<Vec<Candidate>, String> {
    let tokens = lexer::tokenize(rest).map_err(|err| err.to_string())?;
    let mut candidates = Vec::new();
    for phrase in tokens.split(|token| token.is_ident("or")) {
        let candidate = match phrase {
            [Token::Int(version)] => Candidate {
                version: to_version(*version)?,
                profile: None,
            },
            [Token::Int(version), Token::Ident(profile)] => Candidate {
                version: to_version(*version)?,
                profile: Some(profile.clone()),
            },
            [] => return Err("empty alternative in #version".into()),
            other => {
                let text = other.iter().map(Token::to_string).collect::<Vec<_>>().join(" ");
                return Err(format!("malformed #version alternative '{text}'"));
            }
        };
        candidates.push(candidate);
    }
    Ok(candidates)
}

fn to_version(value: i64) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("{value} is not a valid GLSL version"))
}

/// Removes every `#version` directive from `code` and returns the chosen line.
///
/// Sources without a directive get [`DEFAULT_VERSION_LINE`]. `None` means a
/// diagnostic was recorded.
pub fn extract_version(
    code: &mut String,
    capability: u32,
    files: &FileTable,
    diagnostics: &mut Diagnostics,
) -> Option<String> {
    let mut chosen: Option<String> = None;
    let mut ok = true;
    let mut out = String::with_capacity(code.len());

    for line in lexer::scan(code) {
        let Some(directive) = line.directive.filter(|d| d.keyword == "version") else {
            out.push_str(line.text);
            out.push('\n');
            continue;
        };
        out.push('\n');

        if chosen.is_some() {
            ok = false;
            diagnostics.push(files.describe(line.location, "duplicate #version directive"));
            continue;
        }
        match canonicalize_version(directive.rest, capability) {
            Ok(version) => chosen = Some(version),
            Err(message) => {
                ok = false;
                diagnostics.push(files.describe(line.location, &message));
            }
        }
    }

    *code = out;
    ok.then(|| chosen.unwrap_or_else(|| DEFAULT_VERSION_LINE.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_highest_supported_alternative() {
        assert_eq!(canonicalize_version("330 or 400 or 420", 410).as_deref(), Ok("#version 400\n"));
        assert_eq!(canonicalize_version("330 or 400 or 420", 450).as_deref(), Ok("#version 420\n"));
        assert_eq!(canonicalize_version("150", 450).as_deref(), Ok("#version 150\n"));
        assert_eq!(canonicalize_version("450 or 460 core", 460).as_deref(), Ok("#version 460 core\n"));
        assert_eq!(canonicalize_version("450 or 460", 450).as_deref(), Ok("#version 450\n"));
    }

    #[test]
    fn keeps_profile_of_chosen_alternative() {
        assert_eq!(
            canonicalize_version("150 compatibility or 330 core", 450).as_deref(),
            Ok("#version 330 core\n")
        );
    }

    #[test]
    fn rejects_invalid_and_unsupported_lists() {
        assert!(canonicalize_version("335", 450).is_err());
        assert!(canonicalize_version("440 or 450", 410).is_err());
        assert!(canonicalize_version("330 or", 450).is_err());
        assert!(canonicalize_version("core", 450).is_err());
    }

    #[test]
    fn extract_blanks_directive_and_defaults() {
        let mut code = String::from("// header\n#version 330 or 420\nvoid main() {}\n");
        let mut diagnostics = Diagnostics::new();
        let version = extract_version(&mut code, 410, &FileTable::new(), &mut diagnostics);
        assert_eq!(version.as_deref(), Some("#version 330\n"));
        assert_eq!(code, "// header\n\nvoid main() {}\n");

        let mut code = String::from("void main() {}\n");
        let version = extract_version(&mut code, 410, &FileTable::new(), &mut diagnostics);
        assert_eq!(version.as_deref(), Some(DEFAULT_VERSION_LINE));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn extract_reports_bad_versions_with_location() {
        let mut code = String::from("#line 1 0\n\n#version 999\n");
        let mut diagnostics = Diagnostics::new();
        assert_eq!(extract_version(&mut code, 450, &FileTable::new(), &mut diagnostics), None);
        assert!(diagnostics.contains("(2): 999 is not a valid GLSL version"));
    }
}
