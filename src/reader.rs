//! Reading descriptors from directories and tar archives on a background
//! thread

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::SystemTime;

use crate::descriptor::{self, Descriptor, ParseOptions};
use crate::error::{MisuseError, SourceError};
use crate::history::ProcessedFileHistory;
use crate::sequence::BlockingSequence;

//
// External dependencies
//
use derive_builder::Builder;
use flate2::read::GzDecoder;

/// What a [`DescriptorReader`] reads
#[derive(Debug, Clone, Builder)]
#[builder(default)]
pub struct ReaderConfig {
    /// Directories searched recursively for descriptor files
    #[builder(setter(each(name = "directory", into)))]
    pub directories: Vec<PathBuf>,
    /// Tar archives, optionally gzip compressed (`.tar.gz`, `.tgz`)
    #[builder(setter(each(name = "archive", into)))]
    pub archives: Vec<PathBuf>,
    /// Where processed inputs are remembered between runs
    #[builder(setter(into, strip_option))]
    pub history_file: Option<PathBuf>,
    /// How many files may wait for the consumer before reading pauses
    pub max_files_in_queue: usize,
    pub parse_options: ParseOptions,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            directories: Vec::new(),
            archives: Vec::new(),
            history_file: None,
            max_files_in_queue: 100,
            parse_options: ParseOptions::default(),
        }
    }
}

/// The descriptors of one file or archive entry, or why there are none
#[derive(Debug)]
pub struct DescriptorFile {
    /// The configured directory the file was found in
    pub directory: Option<PathBuf>,
    /// The archive the entry was read from
    pub archive: Option<PathBuf>,
    /// Path of the file, or of the entry within its archive
    pub path: PathBuf,
    /// Milliseconds since the epoch
    pub last_modified: i64,
    pub descriptors: Vec<Descriptor>,
    pub error: Option<SourceError>,
}

impl DescriptorFile {
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Reads descriptor files and hands them out through a [`BlockingSequence`].
///
/// Configuration can be changed until [`DescriptorReader::read_descriptors`]
/// is called; a reader runs once.
#[derive(Debug, Default)]
pub struct DescriptorReader {
    config: ReaderConfig,
    started: bool,
    worker: Option<JoinHandle<ProcessedFileHistory>>,
}

impl DescriptorReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ReaderConfig) -> Self {
        DescriptorReader {
            config,
            ..Self::default()
        }
    }

    fn configure(&mut self, change: impl FnOnce(&mut ReaderConfig)) -> Result<(), MisuseError> {
        if self.started {
            return Err(MisuseError::AlreadyStarted);
        }
        change(&mut self.config);
        Ok(())
    }

    pub fn add_directory(&mut self, directory: impl Into<PathBuf>) -> Result<(), MisuseError> {
        let directory = directory.into();
        self.configure(|c| c.directories.push(directory))
    }

    pub fn add_archive(&mut self, archive: impl Into<PathBuf>) -> Result<(), MisuseError> {
        let archive = archive.into();
        self.configure(|c| c.archives.push(archive))
    }

    pub fn set_history_file(&mut self, path: impl Into<PathBuf>) -> Result<(), MisuseError> {
        let path = path.into();
        self.configure(|c| c.history_file = Some(path))
    }

    pub fn set_max_files_in_queue(&mut self, max: usize) -> Result<(), MisuseError> {
        self.configure(|c| c.max_files_in_queue = max)
    }

    pub fn set_parse_options(&mut self, options: ParseOptions) -> Result<(), MisuseError> {
        self.configure(|c| c.parse_options = options)
    }

    /// Start reading on a background thread. Once every handle to the
    /// returned sequence is dropped while the queue is full, reading stops
    /// and the history file is left untouched.
    pub fn read_descriptors(&mut self) -> Result<BlockingSequence<DescriptorFile>, MisuseError> {
        if self.started {
            return Err(MisuseError::AlreadyStarted);
        }
        self.started = true;

        let files = BlockingSequence::bounded(self.config.max_files_in_queue);
        let producer = files.clone();
        let config = self.config.clone();
        self.worker = Some(std::thread::spawn(move || {
            let _guard = producer.close_guard();
            ReadRun::new(config, producer).run()
        }));
        Ok(files)
    }

    /// Wait for the background thread and return the inputs it saw, or
    /// `None` if reading never started or the thread panicked
    pub fn processed_files(&mut self) -> Option<ProcessedFileHistory> {
        self.worker.take()?.join().ok()
    }
}

/// State of the reader thread
struct ReadRun {
    config: ReaderConfig,
    files: BlockingSequence<DescriptorFile>,
    before: ProcessedFileHistory,
    after: ProcessedFileHistory,
    /// Set once the consumer side is gone
    stopped: bool,
}

fn millis(time: SystemTime) -> i64 {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

impl ReadRun {
    fn new(config: ReaderConfig, files: BlockingSequence<DescriptorFile>) -> Self {
        let before = match &config.history_file {
            Some(path) => ProcessedFileHistory::load(path).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "could not read history file, reading everything");
                ProcessedFileHistory::new()
            }),
            None => ProcessedFileHistory::new(),
        };
        ReadRun {
            config,
            files,
            before,
            after: ProcessedFileHistory::new(),
            stopped: false,
        }
    }

    fn run(mut self) -> ProcessedFileHistory {
        tracing::info!(
            directories = self.config.directories.len(),
            archives = self.config.archives.len(),
            "starting to read descriptors"
        );
        for directory in self.config.directories.clone() {
            self.read_directory(&directory);
        }
        for archive in self.config.archives.clone() {
            self.read_archive(&archive);
        }
        if self.stopped {
            tracing::warn!("reading abandoned by the consumer, history not saved");
            return self.after;
        }
        if let Some(path) = &self.config.history_file {
            if let Err(e) = self.after.save(path) {
                tracing::warn!(error = %e, "could not write history file");
            }
        }
        tracing::info!(inputs = self.after.len(), "finished reading descriptors");
        self.after
    }

    fn publish(&mut self, file: DescriptorFile) {
        if self.stopped {
            return;
        }
        if let Err(e) = self.files.publish(file) {
            tracing::warn!(error = %e, "stopping to publish descriptor files");
            self.stopped = true;
        }
    }

    /// Whether an input is unchanged since the last run; either way it
    /// goes into this run's history
    fn seen_before(&mut self, id: &str, last_modified: i64) -> bool {
        self.after.record(id, last_modified);
        let unchanged = self.before.is_unchanged(id, last_modified);
        if unchanged {
            tracing::debug!(input = id, "skipping unchanged input");
        }
        unchanged
    }

    fn read_directory(&mut self, directory: &Path) {
        let mut pending = vec![directory.to_path_buf()];
        // Canonical paths of listed directories, so symlink loops end
        let mut visited = HashSet::new();
        while let Some(dir) = pending.pop() {
            if self.stopped {
                return;
            }
            if !visited.insert(absolute(&dir)) {
                tracing::debug!(directory = %dir.display(), "directory already read");
                continue;
            }
            let mut entries: Vec<PathBuf> = match fs::read_dir(&dir) {
                Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
                Err(e) => {
                    tracing::warn!(directory = %dir.display(), error = %e, "cannot list directory");
                    continue;
                }
            };
            entries.sort();
            // Subdirectories are visited after the files, in name order
            for path in entries.iter().rev().filter(|p| p.is_dir()) {
                pending.push(path.clone());
            }
            for path in entries.iter().filter(|p| p.is_file()) {
                if self.stopped {
                    return;
                }
                self.read_file(directory, path);
            }
        }
    }

    fn read_file(&mut self, directory: &Path, path: &Path) {
        let last_modified = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(time) => millis(time),
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "cannot stat file");
                self.publish(DescriptorFile {
                    directory: Some(directory.to_path_buf()),
                    archive: None,
                    path: path.to_path_buf(),
                    last_modified: 0,
                    descriptors: Vec::new(),
                    error: Some(SourceError::io(path.display(), e)),
                });
                return;
            }
        };
        let id = absolute(path).display().to_string();
        if self.seen_before(&id, last_modified) {
            return;
        }

        let mut file = DescriptorFile {
            directory: Some(directory.to_path_buf()),
            archive: None,
            path: path.to_path_buf(),
            last_modified,
            descriptors: Vec::new(),
            error: None,
        };
        match fs::read(path) {
            Ok(raw) => self.parse_into(&mut file, &raw),
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "cannot read file");
                file.error = Some(SourceError::io(path.display(), e));
            }
        }
        self.publish(file);
    }

    fn read_archive(&mut self, archive: &Path) {
        if self.stopped {
            return;
        }
        let opened = File::open(archive).and_then(|f| Ok((f.metadata()?.modified()?, f)));
        let (modified, handle) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                tracing::warn!(archive = %archive.display(), error = %e, "cannot open archive");
                self.publish(DescriptorFile {
                    directory: None,
                    archive: Some(archive.to_path_buf()),
                    path: archive.to_path_buf(),
                    last_modified: 0,
                    descriptors: Vec::new(),
                    error: Some(SourceError::io(archive.display(), e)),
                });
                return;
            }
        };
        let id = absolute(archive).display().to_string();
        if self.seen_before(&id, millis(modified)) {
            return;
        }

        let name = archive.to_string_lossy();
        let reader: Box<dyn Read> = if name.ends_with(".gz") || name.ends_with(".tgz") {
            Box::new(GzDecoder::new(handle))
        } else {
            Box::new(handle)
        };
        if let Err(e) = self.read_entries(archive, tar::Archive::new(reader)) {
            tracing::warn!(archive = %archive.display(), error = %e, "aborting archive");
            self.publish(DescriptorFile {
                directory: None,
                archive: Some(archive.to_path_buf()),
                path: archive.to_path_buf(),
                last_modified: millis(modified),
                descriptors: Vec::new(),
                error: Some(SourceError::io(archive.display(), e)),
            });
        }
    }

    fn read_entries<R: Read>(&mut self, archive: &Path, mut tar: tar::Archive<R>) -> std::io::Result<()> {
        for entry in tar.entries()? {
            if self.stopped {
                break;
            }
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry.path()?.into_owned();
            let last_modified = entry.header().mtime().map(|t| t as i64 * 1000).unwrap_or(0);
            let mut file = DescriptorFile {
                directory: None,
                archive: Some(archive.to_path_buf()),
                path,
                last_modified,
                descriptors: Vec::new(),
                error: None,
            };
            let mut raw = Vec::new();
            match entry.read_to_end(&mut raw) {
                Ok(_) => self.parse_into(&mut file, &raw),
                Err(e) => file.error = Some(SourceError::io(file.path.display(), e)),
            }
            self.publish(file);
        }
        Ok(())
    }

    fn parse_into(&self, file: &mut DescriptorFile, raw: &[u8]) {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        let file_name = file.path.file_name().and_then(|n| n.to_str());
        match descriptor::parse_descriptors(raw, file_name, &self.config.parse_options) {
            Ok(descriptors) => file.descriptors = descriptors,
            Err(e) => {
                tracing::debug!(file = %file.path.display(), error = %e, "unparseable descriptor");
                file.error = Some(SourceError::Parse(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_reconfiguration_after_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = DescriptorReader::new();
        reader.add_directory(dir.path()).unwrap();
        let files = reader.read_descriptors().unwrap();
        assert_eq!(files.iter().count(), 0);
        assert_eq!(reader.add_directory(dir.path()), Err(MisuseError::AlreadyStarted));
        assert_eq!(reader.set_max_files_in_queue(5), Err(MisuseError::AlreadyStarted));
        assert!(matches!(reader.read_descriptors(), Err(MisuseError::AlreadyStarted)));
        assert!(reader.processed_files().unwrap().is_empty());
    }

    #[test]
    fn config_builder() {
        let config = ReaderConfigBuilder::default()
            .directory("/srv/a")
            .directory("/srv/b")
            .history_file("/tmp/history")
            .build()
            .unwrap();
        assert_eq!(config.directories.len(), 2);
        assert_eq!(config.max_files_in_queue, 100);
        assert_eq!(config.history_file, Some(PathBuf::from("/tmp/history")));
    }

    #[test]
    fn negative_millis() {
        let before = SystemTime::UNIX_EPOCH - std::time::Duration::from_millis(5);
        assert_eq!(millis(before), -5);
    }
}
