//! Line scanner and directive tokenizer shared by every expansion stage.
//!
//! Stages never search raw text for `#keyword`. They call [`scan`], which
//! splits the source into [`Line`]s, recognises directives (a `#` that is
//! the first non-blank character of a line outside block comments, with
//! optional spaces before the keyword) and tracks the `(file, line)`
//! location of every line by replaying `#line` pragmas. Directive arguments
//! are then read with [`tokenize`] and a [`Cursor`].

use std::fmt;

/// Original position of a line: file-table index plus 1-based line number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub file: u32,
    pub line: u32,
}

impl Location {
    pub const fn new(file: u32, line: u32) -> Self {
        Self { file, line }
    }
}

/// `#keyword rest` split out of a directive line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directive<'a> {
    pub keyword: &'a str,
    pub rest: &'a str,
}

/// One source line without its terminator.
#[derive(Debug, Clone, Copy)]
pub struct Line<'a> {
    pub text: &'a str,
    pub directive: Option<Directive<'a>>,
    pub location: Location,
}

impl<'a> Line<'a> {
    pub fn is_directive(&self, keyword: &str) -> bool {
        matches!(self.directive, Some(d) if d.keyword == keyword)
    }
}

/// Splits `source` into lines, classifying directives and tracking locations.
///
/// Lines before the first `#line` pragma are attributed to file index 0.
pub fn scan(source: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut in_block_comment = false;
    let mut next = Location::new(0, 1);

    for raw in source.split_inclusive('\n') {
        let text = raw.strip_suffix('\n').unwrap_or(raw);
        let text = text.strip_suffix('\r').unwrap_or(text);

        let directive = if in_block_comment {
            None
        } else {
            parse_directive(text)
        };
        let location = next;
        next.line += 1;

        if let Some(Directive { keyword: "line", rest }) = directive {
            if let Some((line, file)) = parse_line_pragma(rest) {
                next = Location::new(file.unwrap_or(location.file), line);
            }
        }

        in_block_comment = update_comment_state(text, in_block_comment);
        lines.push(Line {
            text,
            directive,
            location,
        });
    }

    lines
}

fn parse_directive(text: &str) -> Option<Directive<'_>> {
    let trimmed = text.trim_start_matches([' ', '\t']);
    let after_hash = trimmed.strip_prefix('#')?;
    let after_hash = after_hash.trim_start_matches([' ', '\t']);
    let end = after_hash
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(after_hash.len());
    let (keyword, rest) = after_hash.split_at(end);
    Some(Directive {
        keyword,
        rest: rest.trim(),
    })
}

fn parse_line_pragma(rest: &str) -> Option<(u32, Option<u32>)> {
    let mut parts = rest.split_whitespace();
    let line = parts.next()?.parse().ok()?;
    let file = parts.next().and_then(|value| value.parse().ok());
    Some((line, file))
}

/// Returns whether the line ends inside an unterminated `/* ... */`.
fn update_comment_state(text: &str, mut in_block_comment: bool) -> bool {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        let pair = (bytes[i], bytes[i + 1]);
        if in_block_comment {
            if pair == (b'*', b'/') {
                in_block_comment = false;
                i += 2;
                continue;
            }
        } else if pair == (b'/', b'/') {
            break;
        } else if pair == (b'/', b'*') {
            in_block_comment = true;
            i += 2;
            continue;
        }
        i += 1;
    }
    in_block_comment
}

/// Directive argument token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Punct(char),
}

impl Token {
    pub fn is_punct(&self, c: char) -> bool {
        matches!(self, Token::Punct(p) if *p == c)
    }

    pub fn is_ident(&self, name: &str) -> bool {
        matches!(self, Token::Ident(id) if id == name)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(id) => f.write_str(id),
            Token::Int(value) => write!(f, "{value}"),
            Token::Float(value) => write!(f, "{value}"),
            Token::Str(value) => write!(f, "\"{value}\""),
            Token::Punct(c) => write!(f, "{c}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyntaxError {
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("malformed number '{0}'")]
    BadNumber(String),
    #[error("expected {expected}, found {found}")]
    Unexpected { expected: String, found: String },
    #[error("expected {0}, found end of line")]
    EndOfInput(String),
}

/// Token plus the byte range it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub start: usize,
    pub end: usize,
}

/// Tokenizes a directive argument string. Comments are skipped.
pub fn tokenize(input: &str) -> Result<Vec<Token>, SyntaxError> {
    Ok(tokenize_spanned(input)?
        .into_iter()
        .map(|spanned| spanned.token)
        .collect())
}

/// Like [`tokenize`], keeping source ranges so callers can recover raw text.
pub fn tokenize_spanned(input: &str) -> Result<Vec<Spanned>, SyntaxError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let offset = |i: usize| chars.get(i).map_or(input.len(), |&(at, _)| at);
    let at = |i: usize| chars.get(i).map(|&(_, c)| c);
    let mut tokens = Vec::new();
    let mut i = 0;

    while let Some(c) = at(i) {
        let start = i;
        let token = if c.is_whitespace() {
            i += 1;
            continue;
        } else if c == '/' && at(i + 1) == Some('/') {
            break;
        } else if c == '/' && at(i + 1) == Some('*') {
            i += 2;
            while at(i).is_some() && !(at(i) == Some('*') && at(i + 1) == Some('/')) {
                i += 1;
            }
            i += 2;
            continue;
        } else if c == '"' {
            let mut end = i + 1;
            while at(end).is_some_and(|d| d != '"') {
                end += 1;
            }
            if at(end).is_none() {
                return Err(SyntaxError::UnterminatedString);
            }
            i = end + 1;
            Token::Str(input[offset(start + 1)..offset(end)].to_string())
        } else if c.is_ascii_alphabetic() || c == '_' {
            while at(i).is_some_and(|d| d.is_ascii_alphanumeric() || d == '_') {
                i += 1;
            }
            Token::Ident(input[offset(start)..offset(i)].to_string())
        } else if c.is_ascii_digit() || (c == '.' && at(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let digits: Vec<char> = chars[i..].iter().map(|&(_, d)| d).collect();
            i += number_end(&digits, 0);
            parse_number(&input[offset(start)..offset(i)])?
        } else {
            i += 1;
            Token::Punct(c)
        };
        tokens.push(Spanned {
            token,
            start: offset(start),
            end: offset(i),
        });
    }

    Ok(tokens)
}

fn number_end(chars: &[char], mut i: usize) -> usize {
    if chars[i] == '0' && matches!(chars.get(i + 1), Some('x') | Some('X')) {
        i += 2;
        while i < chars.len() && chars[i].is_ascii_hexdigit() {
            i += 1;
        }
    } else {
        while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
            i += 1;
        }
        if i < chars.len() && matches!(chars[i], 'e' | 'E') {
            let mut j = i + 1;
            if j < chars.len() && matches!(chars[j], '+' | '-') {
                j += 1;
            }
            if j < chars.len() && chars[j].is_ascii_digit() {
                i = j;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
        }
    }
    while i < chars.len() && matches!(chars[i], 'u' | 'U' | 'f' | 'F') {
        i += 1;
    }
    i
}

fn parse_number(text: &str) -> Result<Token, SyntaxError> {
    let bad = || SyntaxError::BadNumber(text.to_string());
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        let hex = hex.trim_end_matches(['u', 'U']);
        return i64::from_str_radix(hex, 16).map(Token::Int).map_err(|_| bad());
    }
    let is_float = text.contains(['.', 'e', 'E']) || text.ends_with(['f', 'F']);
    let digits = text.trim_end_matches(['u', 'U', 'f', 'F']);
    if is_float {
        digits.parse().map(Token::Float).map_err(|_| bad())
    } else {
        digits.parse().map(Token::Int).map_err(|_| bad())
    }
}

/// Recursive-descent helper over a token slice.
pub struct Cursor<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Cursor<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    pub fn next_token(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Consumes `c` when it is the next token.
    pub fn eat_punct(&mut self, c: char) -> bool {
        if self.peek().is_some_and(|t| t.is_punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn expect_punct(&mut self, c: char) -> Result<(), SyntaxError> {
        match self.next_token() {
            Some(token) if token.is_punct(c) => Ok(()),
            Some(token) => Err(unexpected(format!("'{c}'"), token)),
            None => Err(SyntaxError::EndOfInput(format!("'{c}'"))),
        }
    }

    pub fn expect_ident(&mut self) -> Result<&'t str, SyntaxError> {
        match self.next_token() {
            Some(Token::Ident(id)) => Ok(id.as_str()),
            Some(token) => Err(unexpected("identifier".into(), token)),
            None => Err(SyntaxError::EndOfInput("identifier".into())),
        }
    }

    pub fn expect_keyword(&mut self, keyword: &str) -> Result<(), SyntaxError> {
        match self.next_token() {
            Some(token) if token.is_ident(keyword) => Ok(()),
            Some(token) => Err(unexpected(format!("'{keyword}'"), token)),
            None => Err(SyntaxError::EndOfInput(format!("'{keyword}'"))),
        }
    }

    pub fn expect_any(&mut self, what: &str) -> Result<&'t Token, SyntaxError> {
        self.next_token()
            .ok_or_else(|| SyntaxError::EndOfInput(what.to_string()))
    }
}

fn unexpected(expected: String, found: &Token) -> SyntaxError {
    SyntaxError::Unexpected {
        expected,
        found: found.to_string(),
    }
}

/// Replaces every `$(expr)` in `text` for which `eval` returns a value.
///
/// Unmatched `$(` sequences and expressions `eval` declines are copied
/// through unchanged.
pub fn substitute<F>(text: &str, mut eval: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("$(") {
        let Some(close) = rest[start + 2..].find(')') else {
            break;
        };
        let end = start + 2 + close;
        out.push_str(&rest[..start]);
        match eval(&rest[start + 2..end]) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[start..=end]),
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    out
}

/// Joins scanned line texts back into newline-terminated source.
pub fn join_lines<'a, I>(lines: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = String::new();
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_allow_spaces_after_hash() {
        let lines = scan("  #  include \"a.glsl\"\nvoid main() {}\n");
        assert!(lines[0].is_directive("include"));
        assert_eq!(lines[0].directive.expect("directive").rest, "\"a.glsl\"");
        assert!(lines[1].directive.is_none());
    }

    #[test]
    fn directives_inside_block_comments_are_ignored() {
        let lines = scan("/*\n#include \"x\"\n*/\n#include \"y\"\n");
        assert!(lines[1].directive.is_none());
        assert!(lines[3].is_directive("include"));
    }

    #[test]
    fn text_before_hash_disables_directive() {
        let lines = scan("x = 1; #include \"a\"\n");
        assert!(lines[0].directive.is_none());
    }

    #[test]
    fn line_pragmas_drive_locations() {
        let lines = scan("#line 10 3\na\nb\n#line 1\nc\n");
        assert_eq!(lines[1].location, Location::new(3, 10));
        assert_eq!(lines[2].location, Location::new(3, 11));
        assert_eq!(lines[4].location, Location::new(3, 1));
    }

    #[test]
    fn tokenizes_for_header() {
        let tokens = tokenize("(int i = 0; i < N; ++i)").expect("tokens");
        assert_eq!(tokens[0], Token::Punct('('));
        assert_eq!(tokens[1], Token::Ident("int".into()));
        assert_eq!(tokens[4], Token::Int(0));
        assert_eq!(tokens[8], Token::Ident("N".into()));
        assert!(tokens[10].is_punct('+') && tokens[11].is_punct('+'));
    }

    #[test]
    fn tokenizes_numbers() {
        let tokens = tokenize("0x10 2.5 3u 1e2").expect("tokens");
        assert_eq!(tokens, vec![
            Token::Int(16),
            Token::Float(2.5),
            Token::Int(3),
            Token::Float(100.0),
        ]);
    }

    #[test]
    fn substitute_keeps_declined_expressions() {
        let out = substitute("a$(i)b$(j)c", |expr| (expr == "i").then(|| "7".to_string()));
        assert_eq!(out, "a7b$(j)c");
    }
}
