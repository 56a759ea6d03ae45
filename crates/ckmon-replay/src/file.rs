//! Reading and writing `.ckmon` files.
//!
//! This module provides:
//! - [`StreamWriter`] — Appends encoded entries to a file, with size-based
//!   rotation into sibling files
//! - [`EntryReader`] — Forward-only scan over one file, yielding byte offsets
//! - [`read_entry_at`] — Random-access decode used by pagination
//!
//! A file is a sequence of codec-encoded entries terminated by the sentinel
//! control word or raw EOF; readers tolerate the no-sentinel case.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ckmon_wire::{codec, TagRegistry, WireEntry};
use tracing::debug;

use crate::error::Result;

/// File extension convention for activity log files.
pub const FILE_EXTENSION: &str = "ckmon";

/// Returns true if the path carries the `.ckmon` extension.
#[must_use]
pub fn is_ckmon_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == FILE_EXTENSION)
}

/// Configuration for [`StreamWriter`].
#[derive(Debug, Clone, Default)]
pub struct StreamWriterConfig {
    /// Maximum size of a single file before rotation (bytes). `None`
    /// disables rotation.
    pub max_file_size: Option<u64>,
}

impl StreamWriterConfig {
    /// Creates a config with rotation disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the max file size for rotation.
    #[must_use]
    pub const fn with_max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = Some(size);
        self
    }
}

/// Writes one logical entry stream to disk, rotating by size.
///
/// Rotation is transparent to the stream: when an append would push the
/// current file past the configured size, the file is finalized with the
/// sentinel and the stream continues in a numbered sibling
/// (`app.ckmon`, `app.0001.ckmon`, `app.0002.ckmon`, ...). Rotation never
/// splits an entry.
pub struct StreamWriter {
    base: PathBuf,
    config: StreamWriterConfig,
    writer: BufWriter<File>,
    current_size: u64,
    seq: u32,
    files: Vec<PathBuf>,
}

impl StreamWriter {
    /// Creates a writer with rotation disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(path, StreamWriterConfig::new())
    }

    /// Creates a writer with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn with_config(path: impl Into<PathBuf>, config: StreamWriterConfig) -> Result<Self> {
        let base = path.into();
        let writer = BufWriter::new(File::create(&base)?);
        Ok(Self {
            files: vec![base.clone()],
            base,
            config,
            writer,
            current_size: 0,
            seq: 0,
        })
    }

    /// Appends one entry to the stream, rotating first if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub fn write_entry(&mut self, entry: &WireEntry) -> Result<()> {
        let bytes = codec::encode_to_vec(entry)?;
        if let Some(max) = self.config.max_file_size {
            // +2 keeps room for the closing sentinel.
            if self.current_size > 0 && self.current_size + bytes.len() as u64 + 2 > max {
                self.rotate()?;
            }
        }
        self.writer.write_all(&bytes)?;
        self.current_size += bytes.len() as u64;
        Ok(())
    }

    /// Finalizes the current file and continues in the next sibling.
    ///
    /// # Errors
    ///
    /// Returns an error if the sentinel write or the new file creation fails.
    pub fn rotate(&mut self) -> Result<()> {
        codec::write_sentinel(&mut self.writer)?;
        self.writer.flush()?;

        self.seq += 1;
        let path = self.numbered_path(self.seq);
        debug!(path = %path.display(), "rotating entry stream");
        self.writer = BufWriter::new(File::create(&path)?);
        self.files.push(path);
        self.current_size = 0;
        Ok(())
    }

    /// Writes the sentinel, flushes, and returns every file written, in
    /// stream order.
    ///
    /// # Errors
    ///
    /// Returns an error if the final write fails.
    pub fn finish(mut self) -> Result<Vec<PathBuf>> {
        codec::write_sentinel(&mut self.writer)?;
        self.writer.flush()?;
        Ok(self.files)
    }

    /// Returns the files written so far, in stream order.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    fn numbered_path(&self, seq: u32) -> PathBuf {
        let stem = self
            .base
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "stream".to_string());
        let name = format!("{stem}.{seq:04}.{FILE_EXTENSION}");
        self.base.with_file_name(name)
    }
}

/// Forward-only scanner over one entry file.
pub struct EntryReader<'a> {
    reader: BufReader<File>,
    registry: &'a TagRegistry,
    offset: u64,
    done: bool,
}

impl<'a> EntryReader<'a> {
    /// Opens a file for scanning.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path, registry: &'a TagRegistry) -> Result<Self> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
            registry,
            offset: 0,
            done: false,
        })
    }

    /// Decodes the next entry, returning the byte offset it started at.
    ///
    /// `Ok(None)` marks the end of the file (sentinel or raw EOF).
    ///
    /// # Errors
    ///
    /// Returns a decode error on a malformed or truncated entry; the scan
    /// cannot continue past it.
    pub fn next_entry(&mut self) -> Result<Option<(u64, WireEntry)>> {
        if self.done {
            return Ok(None);
        }
        let start = self.offset;
        match codec::decode(&mut self.reader, self.registry)? {
            Some(entry) => {
                self.offset = self.reader.stream_position()?;
                Ok(Some((start, entry)))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

/// Decodes one entry at a previously-recorded byte offset.
///
/// # Errors
///
/// Returns an error if the seek or the decode fails.
pub fn read_entry_at<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    registry: &TagRegistry,
) -> Result<Option<WireEntry>> {
    reader.seek(SeekFrom::Start(offset))?;
    Ok(codec::decode(reader, registry)?)
}
