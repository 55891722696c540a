//! File-index table and `#line` pragma helpers.
//!
//! Every file that contributes text to a flattened stage gets a small integer
//! index. The index is written into `#line <line> <index>` pragmas so that a
//! compiler log, which only knows flattened positions and indices, can be
//! mapped back to file names with [`FileTable::remap_log`].

use std::collections::HashMap;

use crate::lexer::{self, Location};

/// Name reserved for index 0: text synthesised by the engine itself.
pub const INSERTED_CODE: &str = "<engine inserted code>";

/// Formats a `#line` pragma (including the trailing newline).
pub fn line_pragma(line: u32, file: u32) -> String {
    format!("#line {line} {file}\n")
}

/// Bidirectional filename <-> index mapping for one program.
#[derive(Debug, Clone)]
pub struct FileTable {
    names: Vec<String>,
    indices: HashMap<String, u32>,
}

impl FileTable {
    pub fn new() -> Self {
        let mut indices = HashMap::new();
        indices.insert(INSERTED_CODE.to_string(), 0);
        Self {
            names: vec![INSERTED_CODE.to_string()],
            indices,
        }
    }

    /// Returns the index for `name`, allocating the next unused one if needed.
    pub fn index_of(&mut self, name: &str) -> u32 {
        if let Some(&index) = self.indices.get(name) {
            return index;
        }
        let index = self.names.len() as u32;
        self.names.push(name.to_string());
        self.indices.insert(name.to_string(), index);
        index
    }

    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.indices.get(name).copied()
    }

    pub fn name(&self, index: u32) -> Option<&str> {
        self.names.get(index as usize).map(String::as_str)
    }

    /// Like [`FileTable::name`] but never fails, for diagnostics.
    pub fn display_name(&self, index: u32) -> &str {
        self.name(index).unwrap_or("<unknown file>")
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        // Index 0 is always present.
        false
    }

    /// `#line` pragma for `name`, registering the file if it is new.
    pub fn pragma_for(&mut self, line: u32, name: &str) -> String {
        let index = self.index_of(name);
        line_pragma(line, index)
    }

    /// Formats `file(line): message` for a scanned location.
    pub fn describe(&self, location: Location, message: &str) -> String {
        format!(
            "{}({}): {}",
            self.display_name(location.file),
            location.line,
            message
        )
    }

    /// Maps a 1-based line of flattened output back to its original file and line.
    pub fn resolve<'s>(&'s self, flattened: &str, line: usize) -> Option<(&'s str, u32)> {
        let lines = lexer::scan(flattened);
        let scanned = lines.get(line.checked_sub(1)?)?;
        Some((self.name(scanned.location.file)?, scanned.location.line))
    }

    /// Rewrites compiler log lines whose location starts with a file index.
    ///
    /// Handles the common driver layouts `3(17) : error ...`,
    /// `3:17(5): error ...` and `ERROR: 3:17: ...`. Unknown indices and other
    /// lines are copied unchanged.
    pub fn remap_log(&self, log: &str) -> String {
        let mut out = String::with_capacity(log.len());
        for line in log.split_inclusive('\n') {
            out.push_str(&self.remap_line(line));
        }
        out
    }

    fn remap_line(&self, line: &str) -> String {
        let (prefix, body) = split_severity(line);
        let digits = body.len() - body.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            return line.to_string();
        }
        let after = &body[digits..];
        if !(after.starts_with('(') || after.starts_with(':')) {
            return line.to_string();
        }
        let Some(name) = body[..digits].parse().ok().and_then(|index| self.name(index)) else {
            return line.to_string();
        };
        format!("{prefix}{name}{after}")
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

fn split_severity(line: &str) -> (&str, &str) {
    for prefix in ["ERROR: ", "WARNING: ", "error: ", "warning: "] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return (prefix, rest);
        }
    }
    ("", line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_zero_is_reserved_for_inserted_code() {
        let mut table = FileTable::new();
        assert_eq!(table.name(0), Some(INSERTED_CODE));
        assert_eq!(table.index_of("a.pix"), 1);
        assert_eq!(table.index_of("b.glsl"), 2);
        assert_eq!(table.index_of("a.pix"), 1);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn remaps_driver_log_formats() {
        let mut table = FileTable::new();
        table.index_of("shade.pix");
        table.index_of("lighting.glsl");
        let log = "1(12) : error C0000: syntax error\nERROR: 2:7: 'x' : undeclared\nlink failed\n9(1): bogus\n";
        let remapped = table.remap_log(log);
        assert!(remapped.contains("shade.pix(12) : error C0000"));
        assert!(remapped.contains("ERROR: lighting.glsl:7: 'x'"));
        assert!(remapped.contains("link failed\n"));
        assert!(remapped.contains("9(1): bogus"));
    }

    #[test]
    fn resolves_flattened_lines() {
        let mut table = FileTable::new();
        let pragma = table.pragma_for(5, "a.vrt");
        let flattened = format!("#version 330\n{pragma}x\ny\n");
        assert_eq!(table.resolve(&flattened, 4), Some(("a.vrt", 6)));
        assert_eq!(table.resolve(&flattened, 1), Some((INSERTED_CODE, 1)));
    }
}
