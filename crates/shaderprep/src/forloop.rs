//! `#for` counted-loop unrolling.
//!
//! ```text
//! #for (int i = 0; i < NUM_LIGHTS; ++i)
//!     uniform vec4 light$(i)_position;
//!     float weight$(i) = $(i * 0.5);
//! #endfor
//! ```
//!
//! Bounds are integer literals or macro names looked up in the caller's
//! macro set, which is why this stage runs per variant rather than at load
//! time. A bound that does not resolve does not fail the pipeline: an
//! `#error` line is emitted in place of the header so the native compiler
//! reports it, but only if the block survives conditional compilation.
//! Overflowing substitutions and blocks longer than [`MAX_FOR_ITERATIONS`]
//! copies are diagnostics and fail the stage.

use std::collections::{BTreeMap, HashMap};

use crate::diagnostics::Diagnostics;
use crate::files::{line_pragma, FileTable};
use crate::foreach::{find_block_end, push_lines};
use crate::lexer::{self, Cursor, SyntaxError, Token};

/// Read-only view of macro definitions used to resolve loop bounds.
pub trait Macros {
    fn lookup(&self, name: &str) -> Option<&str>;
}

impl Macros for BTreeMap<String, String> {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

impl Macros for HashMap<String, String> {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

impl Macros for [(&str, &str)] {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
    }
}

/// Most copies a single `#for` block may produce.
pub const MAX_FOR_ITERATIONS: i64 = 4096;

#[derive(Debug, Clone, PartialEq)]
enum Bound {
    Literal(i64),
    Symbol(String),
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
struct ForHeader {
    counter: String,
    init: Bound,
    end: Bound,
}

/// Unrolls every `#for` block in place using `macros` for symbolic bounds.
pub fn expand_for<M>(
    code: &mut String,
    macros: &M,
    files: &FileTable,
    diagnostics: &mut Diagnostics,
) -> bool
where
    M: Macros + ?Sized,
{
    let mut ok = true;
    loop {
        let lines = lexer::scan(code);
        let Some(begin) = lines.iter().position(|line| line.is_directive("for")) else {
            return ok;
        };
        let at = lines[begin].location;

        let Some(end) = find_block_end(&lines, begin, "for", "endfor") else {
            diagnostics.push(files.describe(at, "No matching #endfor found."));
            return false;
        };

        let rest = lines[begin].directive.map_or("", |d| d.rest);
        let header = match parse_header(rest) {
            Ok(header) => header,
            Err(err) => {
                diagnostics.push(files.describe(at, &format!("malformed #for pragma: {err}")));
                return false;
            }
        };

        let mut errors = Vec::new();
        let init = resolve(&header.init, macros).unwrap_or_else(|| {
            errors.push(format!(
                "#error Ill-formed FOR pragma, unable to parse initializer ({}) into integer literal",
                bound_text(&header.init)
            ));
            0
        });
        let limit = resolve(&header.end, macros).unwrap_or_else(|| {
            errors.push(format!(
                "#error Ill-formed FOR pragma, unable to parse endValue ({}) into integer literal",
                bound_text(&header.end)
            ));
            0
        });

        let body = &lines[begin + 1..end];
        let mut out = String::with_capacity(code.len() * 2);
        push_lines(&mut out, &lines[..begin]);
        if errors.is_empty() {
            out.push('\n');
        } else {
            for error in &errors {
                out.push_str(error);
                out.push('\n');
            }
        }
        let iterations = limit.saturating_sub(init);
        let range = if iterations > MAX_FOR_ITERATIONS {
            ok = false;
            diagnostics.push(files.describe(
                at,
                &format!("#for loop would unroll {iterations} times; the limit is {MAX_FOR_ITERATIONS}"),
            ));
            0..0
        } else {
            init..limit
        };
        for value in range {
            out.push_str(&line_pragma(at.line + 1, at.file));
            for line in body {
                let text = lexer::substitute(line.text, |expr| {
                    match evaluate(expr, &header.counter, value) {
                        Evaluated::Value(text) => Some(text),
                        Evaluated::Foreign => None,
                        Evaluated::Invalid(message) => {
                            ok = false;
                            diagnostics.push(files.describe(line.location, &message));
                            None
                        }
                    }
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

fn parse_header(rest: &str) -> Result<ForHeader, SyntaxError> {
    let tokens = lexer::tokenize(rest)?;
    let mut cursor = Cursor::new(&tokens);

    cursor.expect_punct('(')?;
    cursor.expect_keyword("int")?;
    let counter = cursor.expect_ident()?.to_string();
    cursor.expect_punct('=')?;
    let init = read_bound(&mut cursor)?;
    cursor.expect_punct(';')?;
    cursor.expect_keyword(&counter)?;
    cursor.expect_punct('<')?;
    let end = read_bound(&mut cursor)?;
    cursor.expect_punct(';')?;
    if cursor.eat_punct('+') {
        cursor.expect_punct('+')?;
        cursor.expect_keyword(&counter)?;
    } else {
        cursor.expect_keyword(&counter)?;
        cursor.expect_punct('+')?;
        cursor.expect_punct('+')?;
    }
    cursor.expect_punct(')')?;

    Ok(ForHeader { counter, init, end })
}

fn read_bound(cursor: &mut Cursor<'_>) -> Result<Bound, SyntaxError> {
    let negative = cursor.eat_punct('-');
    let bound = match cursor.expect_any("loop bound")? {
        Token::Int(value) if negative => Bound::Literal(-value),
        Token::Int(value) => Bound::Literal(*value),
        Token::Ident(name) if !negative => Bound::Symbol(name.clone()),
        other if negative => Bound::Other(format!("-{other}")),
        other => Bound::Other(other.to_string()),
    };
    Ok(bound)
}

fn bound_text(bound: &Bound) -> String {
    match bound {
        Bound::Literal(value) => value.to_string(),
        Bound::Symbol(name) | Bound::Other(name) => name.clone(),
    }
}

fn resolve<M: Macros + ?Sized>(bound: &Bound, macros: &M) -> Option<i64> {
    match bound {
        Bound::Literal(value) => Some(*value),
        Bound::Symbol(name) => {
            let tokens = lexer::tokenize(macros.lookup(name)?).ok()?;
            match tokens.as_slice() {
                [Token::Int(value)] => Some(*value),
                [Token::Punct('-'), Token::Int(value)] => Some(-value),
                _ => None,
            }
        }
        Bound::Other(_) => None,
    }
}

#[derive(Debug, PartialEq)]
enum Evaluated {
    Value(String),
    /// Belongs to another loop; left for that loop's expansion.
    Foreign,
    Invalid(String),
}

/// Evaluates `counter`, `counter + k`, `counter - k`, `counter * k`, `counter / k`.
fn evaluate(expr: &str, counter: &str, value: i64) -> Evaluated {
    let Ok(tokens) = lexer::tokenize(expr) else {
        return Evaluated::Foreign;
    };
    match tokens.as_slice() {
        [Token::Ident(name), ..] if name != counter => Evaluated::Foreign,
        [Token::Ident(_)] => Evaluated::Value(value.to_string()),
        [Token::Ident(_), Token::Punct(op), Token::Int(k)] => integer_op(*op, value, *k, counter),
        [Token::Ident(_), Token::Punct(op), Token::Float(k)] => {
            float_op(*op, value as f64, *k, counter)
        }
        [Token::Ident(_), ..] => {
            Evaluated::Invalid(format!("expected +, -, /, or * inside $({counter} ...)"))
        }
        _ => Evaluated::Foreign,
    }
}

fn integer_op(op: char, value: i64, k: i64, counter: &str) -> Evaluated {
    let result = match op {
        '+' => value.checked_add(k),
        '-' => value.checked_sub(k),
        '*' => value.checked_mul(k),
        '/' if k == 0 => {
            return Evaluated::Invalid(format!("division by zero inside $({counter} / 0)"));
        }
        '/' => floor_div(value, k),
        _ => return Evaluated::Invalid(format!("expected +, -, /, or * inside $({counter} ...)")),
    };
    match result {
        Some(result) => Evaluated::Value(result.to_string()),
        None => Evaluated::Invalid(format!("integer overflow inside $({counter} {op} {k})")),
    }
}

fn floor_div(value: i64, k: i64) -> Option<i64> {
    let quotient = value.checked_div(k)?;
    if value % k != 0 && ((value < 0) != (k < 0)) {
        quotient.checked_sub(1)
    } else {
        Some(quotient)
    }
}

fn float_op(op: char, value: f64, k: f64, counter: &str) -> Evaluated {
    let result = match op {
        '+' => value + k,
        '-' => value - k,
        '*' => value * k,
        '/' => value / k,
        _ => return Evaluated::Invalid(format!("expected +, -, /, or * inside $({counter} ...)")),
    };
    if !result.is_finite() {
        return Evaluated::Invalid(format!("non-finite result inside $({counter} {op} {k})"));
    }
    Evaluated::Value(format!("{result}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_lines(code: &str) -> Vec<&str> {
        code.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with("#line"))
            .collect()
    }

    fn no_macros() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn unrolls_half_open_range() {
        let mut code = String::from("#for (int i = 0; i < 4; ++i)\nX$(i);\n#endfor\n");
        let mut diagnostics = Diagnostics::new();
        assert!(expand_for(&mut code, &no_macros(), &FileTable::new(), &mut diagnostics));
        assert_eq!(body_lines(&code), vec!["X0;", "X1;", "X2;", "X3;"]);
    }

    #[test]
    fn arithmetic_substitutions() {
        let mut code = String::from(
            "#for (int i = 1; i < 3; ++i)\n$(i + 1) $(i - 1) $(i * 3) $(i / 2) $(i / 2.0) $(i * 0.5)\n#endfor\n",
        );
        let mut diagnostics = Diagnostics::new();
        assert!(expand_for(&mut code, &no_macros(), &FileTable::new(), &mut diagnostics));
        assert_eq!(body_lines(&code), vec!["2 0 3 0 0.5 0.5", "3 1 6 1 1 1"]);
    }

    #[test]
    fn bounds_resolve_through_macros() {
        let macros: &[(&str, &str)] = &[("COUNT", "3"), ("START", "1")];
        let mut code = String::from("#for (int k = START; k < COUNT; ++k)\nv$(k)\n#endfor\n");
        let mut diagnostics = Diagnostics::new();
        assert!(expand_for(&mut code, macros, &FileTable::new(), &mut diagnostics));
        assert_eq!(body_lines(&code), vec!["v1", "v2"]);
    }

    #[test]
    fn unresolved_bound_becomes_error_directive() {
        let mut code = String::from("#ifdef NEVER\n#for (int i = 0; i < MISSING; ++i)\nx$(i)\n#endfor\n#endif\n");
        let mut diagnostics = Diagnostics::new();
        assert!(expand_for(&mut code, &no_macros(), &FileTable::new(), &mut diagnostics));
        assert!(diagnostics.is_empty());
        assert!(code.contains(
            "#error Ill-formed FOR pragma, unable to parse endValue (MISSING) into integer literal"
        ));
        assert!(!code.contains("x0"));
    }

    #[test]
    fn nested_loops_pass_foreign_counters_through() {
        let mut code = String::from(
            "#for (int i = 0; i < 2; ++i)\n#for (int j = 0; j < 2; ++j)\n$(i)$(j)\n#endfor\n#endfor\n",
        );
        let mut diagnostics = Diagnostics::new();
        assert!(expand_for(&mut code, &no_macros(), &FileTable::new(), &mut diagnostics));
        assert_eq!(body_lines(&code), vec!["00", "01", "10", "11"]);
    }

    #[test]
    fn missing_endfor_fails() {
        let mut code = String::from("#for (int i = 0; i < 2; ++i)\nx\n");
        let mut diagnostics = Diagnostics::new();
        assert!(!expand_for(&mut code, &no_macros(), &FileTable::new(), &mut diagnostics));
        assert!(diagnostics.contains("No matching #endfor found."));
    }

    #[test]
    fn overflowing_arithmetic_is_reported() {
        let mut code = String::from("#for (int i = 0; i < 3; ++i)\n$(i * 9223372036854775807)\n#endfor\n");
        let mut diagnostics = Diagnostics::new();
        assert!(!expand_for(&mut code, &no_macros(), &FileTable::new(), &mut diagnostics));
        assert!(diagnostics.contains("integer overflow inside $(i * 9223372036854775807)"));
        assert_eq!(body_lines(&code)[0], "0");
        assert_eq!(evaluate("i - 1", "i", i64::MIN), Evaluated::Invalid(
            "integer overflow inside $(i - 1)".into()
        ));
        assert!(matches!(evaluate("i / 0.0", "i", 1), Evaluated::Invalid(_)));
    }

    #[test]
    fn huge_bounds_are_refused() {
        let macros: &[(&str, &str)] = &[("N", "1000000000")];
        let mut code = String::from("#for (int i = 0; i < N; ++i)\nx$(i)\n#endfor\nafter\n");
        let mut diagnostics = Diagnostics::new();
        assert!(!expand_for(&mut code, macros, &FileTable::new(), &mut diagnostics));
        assert!(diagnostics.contains("would unroll 1000000000 times"));
        assert_eq!(body_lines(&code), vec!["after"]);

        let bound = MAX_FOR_ITERATIONS.to_string();
        let macros: &[(&str, &str)] = &[("N", bound.as_str())];
        let mut code = String::from("#for (int i = 0; i < N; ++i)\nx$(i)\n#endfor\n");
        assert!(expand_for(&mut code, macros, &FileTable::new(), &mut Diagnostics::new()));
        assert_eq!(body_lines(&code).len(), MAX_FOR_ITERATIONS as usize);
    }

    #[test]
    fn evaluates_expressions() {
        assert_eq!(evaluate("i", "i", 3), Evaluated::Value("3".into()));
        assert_eq!(evaluate(" i ", "i", 3), Evaluated::Value("3".into()));
        assert_eq!(evaluate("j + 1", "i", 3), Evaluated::Foreign);
        assert_eq!(evaluate("i / 2", "i", -3), Evaluated::Value("-2".into()));
        assert_eq!(evaluate("i / -2", "i", 3), Evaluated::Invalid(
            "expected +, -, /, or * inside $(i ...)".into()
        ));
        assert!(matches!(evaluate("i % 2", "i", 3), Evaluated::Invalid(_)));
        assert_eq!(evaluate("1", "i", 3), Evaluated::Foreign);
    }
}
