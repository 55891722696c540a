//! `#include` expansion.
//!
//! `#include "relative/path"` resolves against the including file's
//! directory first and the search paths second; `#include <name>` resolves
//! against the search paths only. Included text is bracketed by `#line`
//! pragmas: `#line 1 <child>` before it and `#line <next> <parent>` after it,
//! so later diagnostics still point at the original files.
//!
//! A file that is already on the current inclusion chain is reported as a
//! recursive include and never expanded again. With `include_once` enabled
//! (the default, like a blanket `#pragma once`) a file that was already
//! expanded elsewhere in the unit is skipped.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::diagnostics::Diagnostics;
use crate::files::{line_pragma, FileTable};
use crate::lexer::{self, Location};

/// Resolution rules for `#include`.
#[derive(Debug, Clone)]
pub struct IncludeOptions {
    /// Directories searched for `<name>` includes and unresolved quoted includes.
    pub search_paths: Vec<PathBuf>,
    /// Expand each file at most once per compilation unit.
    pub include_once: bool,
    /// Maximum nesting depth before expansion gives up.
    pub max_depth: usize,
}

impl Default for IncludeOptions {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            include_once: true,
            max_depth: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum IncludeTarget {
    Quoted(String),
    Angled(String),
}

impl IncludeTarget {
    fn name(&self) -> &str {
        match self {
            IncludeTarget::Quoted(name) | IncludeTarget::Angled(name) => name,
        }
    }
}

/// Expands every include directive in `code` in place.
///
/// `source_path` is the file `code` was read from, if any; it anchors
/// relative includes and seeds the cycle guard. Returns `false` when any
/// include could not be resolved, read, or parsed; the output still contains
/// every resolvable include so that further diagnostics remain useful.
pub fn expand_includes(
    code: &mut String,
    source_path: Option<&Path>,
    files: &mut FileTable,
    options: &IncludeOptions,
    diagnostics: &mut Diagnostics,
) -> bool {
    let dir = source_path
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut chain = Vec::new();
    if let Some(path) = source_path {
        chain.push(canonical(path));
    }

    let mut expander = Expander {
        files,
        options,
        diagnostics,
        contents: HashMap::new(),
        included: HashSet::new(),
        ok: true,
    };
    let mut out = String::with_capacity(code.len());
    expander.expand(code, &dir, &mut chain, &mut out);
    *code = out;
    expander.ok
}

struct Expander<'a> {
    files: &'a mut FileTable,
    options: &'a IncludeOptions,
    diagnostics: &'a mut Diagnostics,
    contents: HashMap<PathBuf, String>,
    included: HashSet<PathBuf>,
    ok: bool,
}

impl Expander<'_> {
    fn expand(&mut self, code: &str, dir: &Path, chain: &mut Vec<PathBuf>, out: &mut String) {
        for line in lexer::scan(code) {
            let Some(directive) = line.directive.filter(|d| d.keyword == "include") else {
                out.push_str(line.text);
                out.push('\n');
                continue;
            };

            match parse_target(directive.rest) {
                Ok(target) => self.include(&target, line.location, dir, chain, out),
                Err(message) => {
                    self.fail(line.location, &message);
                    out.push('\n');
                }
            }
        }
    }

    fn include(
        &mut self,
        target: &IncludeTarget,
        at: Location,
        dir: &Path,
        chain: &mut Vec<PathBuf>,
        out: &mut String,
    ) {
        let Some(path) = self.resolve(target, dir) else {
            self.fail(at, &format!("#included file {} not found.", target.name()));
            out.push('\n');
            return;
        };
        let key = canonical(&path);

        if chain.contains(&key) {
            self.fail(at, &format!("recursive #include of {}", target.name()));
            out.push('\n');
            return;
        }
        if self.options.include_once && self.included.contains(&key) {
            debug!(path = %path.display(), "skipping already included file");
            out.push('\n');
            return;
        }
        if chain.len() >= self.options.max_depth {
            self.fail(
                at,
                &format!(
                    "#include nesting deeper than {} while including {}",
                    self.options.max_depth,
                    target.name()
                ),
            );
            out.push('\n');
            return;
        }

        let body = match self.read(&key) {
            Ok(body) => body,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "failed to read include");
                self.fail(at, &format!("#included file {} not found.", target.name()));
                out.push('\n');
                return;
            }
        };
        debug!(path = %path.display(), depth = chain.len(), "expanding include");

        let index = self.files.index_of(&path.display().to_string());
        let child = format!("{}{}", line_pragma(1, index), body);
        let child_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dir.to_path_buf());

        self.included.insert(key.clone());
        chain.push(key);
        self.expand(&child, &child_dir, chain, out);
        chain.pop();

        out.push_str(&line_pragma(at.line + 1, at.file));
    }

    fn resolve(&self, target: &IncludeTarget, dir: &Path) -> Option<PathBuf> {
        let search = self.options.search_paths.iter().map(|root| root.join(target.name()));
        match target {
            IncludeTarget::Quoted(name) => {
                let direct = Path::new(name);
                if direct.is_absolute() {
                    return direct.is_file().then(|| direct.to_path_buf());
                }
                std::iter::once(dir.join(name))
                    .chain(search)
                    .find(|candidate| candidate.is_file())
            }
            IncludeTarget::Angled(_) => search
                .chain(std::iter::once(dir.join(target.name())))
                .find(|candidate| candidate.is_file()),
        }
    }

    fn read(&mut self, key: &Path) -> std::io::Result<String> {
        if let Some(body) = self.contents.get(key) {
            return Ok(body.clone());
        }
        let body = fs::read_to_string(key)?;
        self.contents.insert(key.to_path_buf(), body.clone());
        Ok(body)
    }

    fn fail(&mut self, at: Location, message: &str) {
        self.ok = false;
        self.diagnostics.push(self.files.describe(at, message));
    }
}

fn parse_target(rest: &str) -> Result<IncludeTarget, String> {
    let malformed = || format!("malformed #include directive '{rest}'");
    if let Some(inner) = rest.strip_prefix('"') {
        let end = inner.find('"').ok_or_else(malformed)?;
        let name = inner[..end].trim();
        if name.is_empty() {
            return Err(malformed());
        }
        Ok(IncludeTarget::Quoted(name.to_string()))
    } else if let Some(inner) = rest.strip_prefix('<') {
        let end = inner.find('>').ok_or_else(malformed)?;
        let name = inner[..end].trim();
        if name.is_empty() {
            return Err(malformed());
        }
        Ok(IncludeTarget::Angled(name.to_string()))
    } else {
        Err(malformed())
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
