//! Source file table shared by the AutoFDO workspace
//!
//! Locations in the host program refer to their source file through a
//! [`FileId`]. The table only has to answer "what is the name of this file",
//! which is what branch-annotation records and diagnostics print. File
//! contents are optional and only kept when a caller wants to show lines.

use std::collections::HashMap;
use std::fmt;

/// Unique identifier for a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(usize);

impl FileId {
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

/// Information about a source file
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    content: Option<String>,
    line_starts: Vec<usize>,
}

impl SourceFile {
    /// A file known by name only.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: None,
            line_starts: Vec::new(),
        }
    }

    /// A file with its text, so individual lines can be looked up.
    pub fn with_content(name: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let line_starts = compute_line_starts(&content);
        Self {
            name: name.into(),
            content: Some(content),
            line_starts,
        }
    }

    /// Base name of the file (the part after the last path separator).
    pub fn base_name(&self) -> &str {
        self.name
            .rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or(&self.name)
    }

    /// Get a specific line from the source file (1-based line numbers)
    pub fn get_line(&self, line_number: usize) -> Option<&str> {
        let content = self.content.as_deref()?;
        if line_number == 0 || line_number > self.line_starts.len() {
            return None;
        }

        let start = self.line_starts[line_number - 1];
        let end = if line_number < self.line_starts.len() {
            self.line_starts[line_number]
        } else {
            content.len()
        };

        Some(content[start..end].trim_end_matches(['\n', '\r']))
    }
}

/// Table of the source files a compilation refers to
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
    by_name: HashMap<String, FileId>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file, returning the existing id if the name is already known.
    pub fn add_file(&mut self, file: SourceFile) -> FileId {
        if let Some(&id) = self.by_name.get(&file.name) {
            return id;
        }
        let id = FileId(self.files.len());
        self.by_name.insert(file.name.clone(), id);
        self.files.push(file);
        id
    }

    /// Shorthand for registering a file known by name only.
    pub fn add_named(&mut self, name: impl Into<String>) -> FileId {
        self.add_file(SourceFile::named(name))
    }

    pub fn get_file(&self, file_id: FileId) -> Option<&SourceFile> {
        self.files.get(file_id.0)
    }

    pub fn file_name(&self, file_id: FileId) -> Option<&str> {
        self.get_file(file_id).map(|f| f.name.as_str())
    }

    pub fn find(&self, name: &str) -> Option<FileId> {
        self.by_name.get(name).copied()
    }

    pub fn get_line(&self, file_id: FileId, line_number: usize) -> Option<&str> {
        self.get_file(file_id)?.get_line(line_number)
    }

    pub fn file_ids(&self) -> impl Iterator<Item = FileId> + '_ {
        (0..self.files.len()).map(FileId)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn compute_line_starts(source: &str) -> Vec<usize> {
    let mut line_starts = vec![0];

    for (i, ch) in source.char_indices() {
        if ch == '\n' {
            line_starts.push(i + 1);
        }
    }

    line_starts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_file_dedups_by_name() {
        let mut map = SourceMap::new();
        let a = map.add_named("src/foo.c");
        let b = map.add_named("src/bar.c");
        let again = map.add_named("src/foo.c");

        assert_eq!(a, again);
        assert_ne!(a, b);
        assert_eq!(map.len(), 2);
        assert_eq!(map.file_name(b), Some("src/bar.c"));
        assert_eq!(map.find("src/bar.c"), Some(b));
    }

    #[test]
    fn test_lines_only_with_content() {
        let mut map = SourceMap::new();
        let named = map.add_named("a.c");
        let full = map.add_file(SourceFile::with_content("b.c", "int x;\nint y;\n"));

        assert_eq!(map.get_line(named, 1), None);
        assert_eq!(map.get_line(full, 1), Some("int x;"));
        assert_eq!(map.get_line(full, 2), Some("int y;"));
        assert_eq!(map.get_line(full, 0), None);
    }

    #[test]
    fn test_base_name() {
        assert_eq!(SourceFile::named("dir/sub/file.cc").base_name(), "file.cc");
        assert_eq!(SourceFile::named("plain.c").base_name(), "plain.c");
    }
}
