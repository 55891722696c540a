//! `#expect NAME "description"` guards.
//!
//! The directive turns into an `#ifndef NAME` / `#error` / `#endif` block, so
//! forgetting to supply a required macro fails native compilation with a
//! message naming it. The `#error` line keeps the directive's line number.

use crate::diagnostics::Diagnostics;
use crate::files::{line_pragma, FileTable};
use crate::lexer::{self, Token};

const MALFORMED: &str =
    "Malformed expect pragma. Use #expect SYMBOL_NAME \"optional description\"";

/// Expands every `#expect` directive in place.
///
/// Malformed directives are reported and left blank; expansion continues so
/// that every malformed line is reported in one pass.
pub fn expand_expect(code: &mut String, files: &FileTable, diagnostics: &mut Diagnostics) -> bool {
    let mut ok = true;
    let mut out = String::with_capacity(code.len());

    for line in lexer::scan(code) {
        let Some(directive) = line.directive.filter(|d| d.keyword == "expect") else {
            out.push_str(line.text);
            out.push('\n');
            continue;
        };

        match parse_expect(directive.rest) {
            Some((name, description)) => {
                let at = line.location;
                let suffix = description.map(|d| format!(", {d}")).unwrap_or_default();
                out.push_str(&line_pragma(at.line.saturating_sub(1), at.file));
                out.push_str(&format!("#ifndef {name}\n"));
                out.push_str(&format!("#error Expected {name} argument{suffix}\n"));
                out.push_str("#endif\n");
                out.push_str(&line_pragma(at.line + 1, at.file));
            }
            None => {
                ok = false;
                diagnostics.push(files.describe(line.location, MALFORMED));
                out.push('\n');
            }
        }
    }

    *code = out;
    ok
}

fn parse_expect(rest: &str) -> Option<(String, Option<String>)> {
    let tokens = lexer::tokenize(rest).ok()?;
    match tokens.as_slice() {
        [Token::Ident(name)] => Some((name.clone(), None)),
        [Token::Ident(name), Token::Str(description)] => {
            Some((name.clone(), Some(description.clone())))
        }
        _ => None,
    }
}
