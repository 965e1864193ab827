//! Which inputs a reader already processed, persisted between runs

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::SourceError;

/// Last-modified times, in milliseconds since the epoch, by input
/// identifier (an absolute path)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedFileHistory {
    entries: BTreeMap<String, i64>,
}

impl ProcessedFileHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a history file with lines of the form `<millis> <identifier>`.
    ///
    /// A missing file yields an empty history. Malformed lines are skipped.
    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no history file yet");
                return Ok(Self::new());
            }
            Err(e) => return Err(SourceError::io(path.display(), e)),
        };
        Ok(Self::parse(&text))
    }

    fn parse(text: &str) -> Self {
        let mut history = Self::new();
        for (number, line) in text.lines().enumerate() {
            let parsed = line
                .split_once(' ')
                .filter(|(_, id)| !id.is_empty())
                .and_then(|(millis, id)| Some((millis.parse::<i64>().ok()?, id)));
            match parsed {
                Some((millis, id)) => history.record(id, millis),
                None => tracing::warn!(line = number + 1, content = line, "skipping malformed history line"),
            }
        }
        history
    }

    /// Write the history, replacing the file at `path`
    pub fn save(&self, path: &Path) -> Result<(), SourceError> {
        let io_err = |e| SourceError::io(path.display(), e);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut out = BufWriter::new(fs::File::create(path).map_err(io_err)?);
        for (id, millis) in self.entries.iter() {
            writeln!(out, "{} {}", millis, id).map_err(io_err)?;
        }
        out.flush().map_err(io_err)
    }

    pub fn record(&mut self, id: impl Into<String>, last_modified: i64) {
        self.entries.insert(id.into(), last_modified);
    }

    pub fn last_modified(&self, id: &str) -> Option<i64> {
        self.entries.get(id).copied()
    }

    /// Whether `id` was processed before with the same modification time
    pub fn is_unchanged(&self, id: &str, last_modified: i64) -> bool {
        self.last_modified(id) == Some(last_modified)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.entries.iter().map(|(id, millis)| (id.as_str(), *millis))
    }
}
