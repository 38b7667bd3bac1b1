use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Source text plus a byte index of line starts, computed once per file so
/// diagnostics can translate byte offsets to line/column pairs cheaply.
#[derive(Clone, Debug)]
pub struct SourceFile {
    content: String,
    line_starts: Vec<usize>,
}

impl SourceFile {
    fn new(content: String) -> Self {
        let mut line_starts = vec![0];
        for (byte_idx, c) in content.char_indices() {
            if c == '\n' {
                line_starts.push(byte_idx + 1);
            }
        }
        SourceFile {
            content,
            line_starts,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Zero-based (line, column) of a byte offset.
    pub fn line_col(&self, byte_idx: usize) -> (usize, usize) {
        let line = match self.line_starts.binary_search(&byte_idx) {
            Ok(exact) => exact,
            Err(next) => next - 1,
        };
        (line, byte_idx - self.line_starts[line])
    }

    pub fn num_lines(&self) -> usize {
        self.line_starts.len()
    }

    pub fn line(&self, line_idx: usize) -> &str {
        let start = self.line_starts[line_idx];
        let end = self
            .line_starts
            .get(line_idx + 1)
            .map(|&next_start| next_start - 1)
            .unwrap_or(self.content.len());

        let line = &self.content[start..end];
        line.strip_suffix('\r').unwrap_or(line)
    }
}

#[derive(Clone, Debug)]
pub struct FileCache {
    files: BTreeMap<PathBuf, SourceFile>,
}

impl FileCache {
    pub fn new() -> Self {
        FileCache {
            files: BTreeMap::new(),
        }
    }

    pub fn read(&mut self, path: impl AsRef<Path>) -> io::Result<&SourceFile> {
        let canonical = path.as_ref().canonicalize()?;
        if !self.files.contains_key(&canonical) {
            let content = fs::read_to_string(&canonical)?;
            self.files.insert(canonical.clone(), SourceFile::new(content));
        }
        Ok(&self.files[&canonical])
    }

    /// Like `read`, but never reads the filesystem; the file must already be
    /// cached.
    pub fn read_cached(&self, path: impl AsRef<Path>) -> io::Result<&SourceFile> {
        let path = path.as_ref();
        if let Some(file) = self.files.get(path) {
            return Ok(file);
        }
        let canonical = path.canonicalize()?;
        Ok(&self.files[&canonical])
    }

    /// Seed the cache directly; used by hosts that hold sources in memory.
    pub fn insert(&mut self, path: impl Into<PathBuf>, content: String) {
        self.files.insert(path.into(), SourceFile::new(content));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn line_index() {
        let file = SourceFile::new("one\ntwo\r\nthree".to_owned());
        assert_eq!(file.num_lines(), 3);
        assert_eq!(file.line(0), "one");
        assert_eq!(file.line(1), "two");
        assert_eq!(file.line(2), "three");
        assert_eq!(file.line_col(0), (0, 0));
        assert_eq!(file.line_col(5), (1, 1));
        assert_eq!(file.line_col(9), (2, 0));
    }
}
