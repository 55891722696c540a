//! `#foreach` block expansion.
//!
//! ```text
//! #foreach (name, count) in (diffuse, 2), (specular, 4)
//!     vec4 $(name)[$(count)];
//! #endforeach
//! ```
//!
//! The body is emitted once per value tuple with `$(field)` replaced by that
//! tuple's value. The outermost block is expanded first and the source is
//! rescanned from the top after each expansion, so nested blocks (including
//! ones whose headers mention outer fields) are handled outside-in.

use crate::diagnostics::Diagnostics;
use crate::files::{line_pragma, FileTable};
use crate::lexer::{self, Line, Spanned, Token};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ForeachHeader {
    pub fields: Vec<String>,
    pub tuples: Vec<Vec<String>>,
}

/// Expands every `#foreach` block in place.
pub fn expand_foreach(code: &mut String, files: &FileTable, diagnostics: &mut Diagnostics) -> bool {
    loop {
        let lines = lexer::scan(code);
        let Some(begin) = lines.iter().position(|line| line.is_directive("foreach")) else {
            return true;
        };
        let at = lines[begin].location;

        let Some(end) = find_block_end(&lines, begin, "foreach", "endforeach") else {
            diagnostics.push(files.describe(at, "No matching #endforeach found."));
            return false;
        };

        let rest = lines[begin].directive.map_or("", |d| d.rest);
        let header = match parse_header(rest) {
            Ok(header) => header,
            Err(message) => {
                diagnostics.push(files.describe(at, &format!("malformed #foreach pragma: {message}")));
                return false;
            }
        };

        let body = &lines[begin + 1..end];
        let mut out = String::with_capacity(code.len() * 2);
        push_lines(&mut out, &lines[..begin]);
        out.push('\n');
        for tuple in &header.tuples {
            out.push_str(&line_pragma(at.line + 1, at.file));
            for line in body {
                let text = lexer::substitute(line.text, |expr| {
                    let expr = expr.trim();
                    header
                        .fields
                        .iter()
                        .position(|field| field == expr)
                        .map(|slot| tuple[slot].clone())
                });
                out.push_str(&text);
                out.push('\n');
            }
        }
        let closing = lines[end].location;
        out.push_str(&line_pragma(closing.line + 1, closing.file));
        push_lines(&mut out, &lines[end + 1..]);
        *code = out;
    }
}

/// Index of the end directive matching the block opened at `begin`.
pub(crate) fn find_block_end(lines: &[Line<'_>], begin: usize, open: &str, close: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (index, line) in lines.iter().enumerate().skip(begin) {
        if line.is_directive(open) {
            depth += 1;
        } else if line.is_directive(close) {
            depth -= 1;
            if depth == 0 {
                return Some(index);
            }
        }
    }
    None
}

pub(crate) fn push_lines(out: &mut String, lines: &[Line<'_>]) {
    for line in lines {
        out.push_str(line.text);
        out.push('\n');
    }
}

/// Parses `(a, b) in (1, 2), (3, 4)`; the parentheses around the field list
/// are optional. Tuple values keep their raw source text.
pub(crate) fn parse_header(rest: &str) -> Result<ForeachHeader, String> {
    let tokens = lexer::tokenize_spanned(rest).map_err(|err| err.to_string())?;
    let mut pos = 0;
    let peek = |pos: usize| tokens.get(pos).map(|spanned| &spanned.token);

    let parenthesised = peek(pos).is_some_and(|t| t.is_punct('('));
    if parenthesised {
        pos += 1;
    }
    let mut fields = Vec::new();
    loop {
        match peek(pos) {
            Some(Token::Punct(')')) if parenthesised => {
                pos += 1;
                break;
            }
            Some(Token::Ident(id)) if id == "in" && !parenthesised => break,
            Some(Token::Punct(',')) => pos += 1,
            Some(Token::Ident(id)) => {
                fields.push(id.clone());
                pos += 1;
            }
            Some(other) => return Err(format!("unexpected '{other}' in field list")),
            None => return Err("field list is not terminated".into()),
        }
    }
    if fields.is_empty() {
        return Err("no fields declared".into());
    }
    if !peek(pos).is_some_and(|t| t.is_ident("in")) {
        return Err("expected 'in' after the field list".into());
    }
    pos += 1;

    let mut tuples = Vec::new();
    loop {
        if !peek(pos).is_some_and(|t| t.is_punct('(')) {
            return Err("expected '(' to open a value tuple".into());
        }
        pos += 1;
        let (values, next) = read_tuple(rest, &tokens, pos)?;
        if values.len() != fields.len() {
            return Err(format!(
                "tuple {} has {} values but {} fields were declared",
                tuples.len() + 1,
                values.len(),
                fields.len()
            ));
        }
        tuples.push(values);
        pos = next;
        match peek(pos) {
            Some(Token::Punct(',')) => pos += 1,
            None => break,
            Some(other) => return Err(format!("unexpected '{other}' after value tuple")),
        }
    }

    Ok(ForeachHeader { fields, tuples })
}

/// Reads comma-separated raw values up to the tuple's closing parenthesis.
/// Nested parentheses stay inside a value.
fn read_tuple(raw: &str, tokens: &[Spanned], mut pos: usize) -> Result<(Vec<String>, usize), String> {
    let mut values = Vec::new();
    let mut depth = 0usize;
    let mut first: Option<usize> = None;
    let mut last = 0usize;

    while let Some(spanned) = tokens.get(pos) {
        pos += 1;
        match spanned.token {
            Token::Punct('(') => depth += 1,
            Token::Punct(')') if depth > 0 => depth -= 1,
            Token::Punct(c @ (',' | ')')) if depth == 0 => {
                let value = first.map_or("", |start| raw[start..last].trim());
                if value.is_empty() {
                    return Err("empty value in tuple".into());
                }
                values.push(value.to_string());
                first = None;
                if c == ')' {
                    return Ok((values, pos));
                }
                continue;
            }
            _ => {}
        }
        first.get_or_insert(spanned.start);
        last = spanned.end;
    }

    Err("value tuple is not terminated".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_pragmas(code: &str) -> Vec<String> {
        code.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with("#line"))
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn unrolls_tuples() {
        let mut code = String::from("#foreach (a,b) in (1,2),(3,4)\nV$(a)_$(b);\n#endforeach\n");
        let mut diagnostics = Diagnostics::new();
        assert!(expand_foreach(&mut code, &FileTable::new(), &mut diagnostics));
        assert_eq!(strip_pragmas(&code), vec!["V1_2;", "V3_4;"]);
    }

    #[test]
    fn field_parentheses_are_optional() {
        let header = parse_header("name, size in (albedo, vec3(1.0, 0.5, 0.0)), (mask, 1.0)")
            .expect("header");
        assert_eq!(header.fields, vec!["name", "size"]);
        assert_eq!(header.tuples[0], vec!["albedo", "vec3(1.0, 0.5, 0.0)"]);
        assert_eq!(header.tuples[1], vec!["mask", "1.0"]);
    }

    #[test]
    fn nested_blocks_expand_outside_in() {
        let mut code = String::from(
            "#foreach (s) in (a), (b)\n#foreach (t) in (1), (2)\n$(s)$(t)\n#endforeach\n#endforeach\n",
        );
        let mut diagnostics = Diagnostics::new();
        assert!(expand_foreach(&mut code, &FileTable::new(), &mut diagnostics));
        assert_eq!(strip_pragmas(&code), vec!["a1", "a2", "b1", "b2"]);
    }

    #[test]
    fn line_after_block_keeps_its_number() {
        let mut code = String::from("#line 1 0\n#foreach (x) in (1), (2)\nf($(x));\n#endforeach\nafter\n");
        let mut diagnostics = Diagnostics::new();
        assert!(expand_foreach(&mut code, &FileTable::new(), &mut diagnostics));
        let lines = lexer::scan(&code);
        let after = lines.iter().find(|line| line.text == "after").expect("after line");
        assert_eq!(after.location.line, 4);
        let body = lines.iter().filter(|line| line.text.starts_with("f(")).collect::<Vec<_>>();
        assert_eq!(body.len(), 2);
        assert!(body.iter().all(|line| line.location.line == 2));
    }

    #[test]
    fn missing_end_is_reported() {
        let mut code = String::from("#foreach (a) in (1)\nx\n");
        let mut diagnostics = Diagnostics::new();
        assert!(!expand_foreach(&mut code, &FileTable::new(), &mut diagnostics));
        assert!(diagnostics.contains("No matching #endforeach found."));
    }

    #[test]
    fn arity_mismatch_is_reported() {
        let mut code = String::from("#foreach (a, b) in (1)\nx\n#endforeach\n");
        let mut diagnostics = Diagnostics::new();
        assert!(!expand_foreach(&mut code, &FileTable::new(), &mut diagnostics));
        assert!(diagnostics.contains("1 values but 2 fields"));
    }
}
