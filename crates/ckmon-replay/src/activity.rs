//! Multi-file discovery and indexing.
//!
//! This module provides:
//! - [`SessionConfig`] — Page size configuration for one reconstruction session
//! - [`ActivityMap`] — The aggregate of all files scanned in one session
//! - [`Monitor`] — One monitor's merged, ordered entry index
//! - [`MonitorIndexInfo`] — Serializable per-monitor summary for downstream
//!   formatters
//!
//! The discovery pass scans every file once, keeping only a small locator
//! per entry (file ordinal, byte offset, ordering key, depth, kind, level);
//! full entries are decoded again on demand by the pager. Corrupt files are
//! recorded with their error and skipped — the session continues with the
//! remaining files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ckmon_wire::{EntryKind, Level, LogEntry, MonitorId, TagRegistry, LEVELS};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ReplayError, Result};
use crate::file::EntryReader;
use crate::page::Page;

/// Configuration for one reconstruction session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Entries per page for paginated reads.
    pub page_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { page_size: 100 }
    }
}

impl SessionConfig {
    /// Creates a config with the default page size.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page size.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

/// Where one entry lives and how it orders, without the entry itself.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryLocator {
    /// Ordinal of the originating file in [`ActivityMap::files`].
    pub file: usize,
    /// Byte offset the entry starts at.
    pub offset: u64,
    /// Entry timestamp.
    pub timestamp: DateTime<Utc>,
    /// Timestamp tie-breaker.
    pub uniquifier: u8,
    /// Nesting depth (from the envelope, or synthesized for unicast files).
    pub depth: u32,
    /// Entry kind.
    pub kind: EntryKind,
    /// Severity level.
    pub level: Level,
}

impl EntryLocator {
    fn sort_key(&self) -> (DateTime<Utc>, u8, usize, u64) {
        (self.timestamp, self.uniquifier, self.file, self.offset)
    }
}

/// One scanned file: its path plus either an entry count or the error that
/// stopped the scan.
#[derive(Debug)]
pub struct FileRecord {
    path: PathBuf,
    entry_count: u64,
    error: Option<ReplayError>,
}

impl FileRecord {
    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of entries decoded from this file.
    #[must_use]
    pub const fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Returns the error that excluded this file, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&ReplayError> {
        self.error.as_ref()
    }

    /// Returns true if the file scanned cleanly.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

/// One monitor's merged, chronologically ordered entry index.
#[derive(Debug)]
pub struct Monitor {
    id: MonitorId,
    locators: Vec<EntryLocator>,
    level_counts: [u64; 5],
    first_entry_at: DateTime<Utc>,
    last_entry_at: DateTime<Utc>,
}

impl Monitor {
    /// Returns the monitor id.
    #[must_use]
    pub const fn id(&self) -> MonitorId {
        self.id
    }

    /// Returns the total entry count.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.locators.len() as u64
    }

    /// Returns the entry count at the given level.
    #[must_use]
    pub const fn level_count(&self, level: Level) -> u64 {
        self.level_counts[level.index()]
    }

    /// Returns the timestamp of the first entry.
    #[must_use]
    pub const fn first_entry_at(&self) -> DateTime<Utc> {
        self.first_entry_at
    }

    /// Returns the timestamp of the last entry.
    #[must_use]
    pub const fn last_entry_at(&self) -> DateTime<Utc> {
        self.last_entry_at
    }

    /// Returns the ordinals of the files this monitor's entries live in.
    #[must_use]
    pub fn file_ordinals(&self) -> Vec<usize> {
        let mut ordinals: Vec<usize> = self.locators.iter().map(|l| l.file).collect();
        ordinals.sort_unstable();
        ordinals.dedup();
        ordinals
    }

    /// Builds the serializable summary for this monitor.
    #[must_use]
    pub fn index_info(&self, page_size: usize) -> MonitorIndexInfo {
        let entry_count = self.entry_count();
        let page_count = if page_size == 0 {
            0
        } else {
            entry_count.div_ceil(page_size as u64)
        };
        MonitorIndexInfo {
            monitor_id: self.id,
            entry_count,
            level_counts: LEVELS
                .iter()
                .map(|level| (level.as_str(), self.level_counts[level.index()]))
                .collect(),
            first_entry_at: self.first_entry_at,
            last_entry_at: self.last_entry_at,
            page_size,
            page_count,
        }
    }

    pub(crate) fn locators(&self) -> &[EntryLocator] {
        &self.locators
    }
}

/// Serializable per-monitor summary, independent of any later rendering.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorIndexInfo {
    /// The monitor id.
    pub monitor_id: MonitorId,
    /// Total entry count.
    pub entry_count: u64,
    /// Entry counts keyed by level name.
    pub level_counts: BTreeMap<&'static str, u64>,
    /// Timestamp of the first entry.
    pub first_entry_at: DateTime<Utc>,
    /// Timestamp of the last entry.
    pub last_entry_at: DateTime<Utc>,
    /// Page size the page count was computed for.
    pub page_size: usize,
    /// Number of pages at that page size.
    pub page_count: u64,
}

/// The aggregate of all files scanned in one reconstruction session.
///
/// Built once, read-only thereafter. Owns its [`Monitor`]s and
/// [`FileRecord`]s for the duration of the session.
pub struct ActivityMap {
    files: Vec<FileRecord>,
    monitors: BTreeMap<MonitorId, Monitor>,
    first_entry_at: Option<DateTime<Utc>>,
    last_entry_at: Option<DateTime<Utc>>,
    page_size: usize,
    registry: Arc<TagRegistry>,
}

impl ActivityMap {
    /// Scans the given files and builds the activity map.
    ///
    /// Files that fail to open or decode are recorded with their error and
    /// excluded from the monitor index; the scan continues with the
    /// remaining files.
    ///
    /// The build is single-threaded and blocks on disk I/O; in a
    /// multi-threaded host, run it on a worker rather than a caller-facing
    /// thread. Independent sessions may build concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::NoData`] if zero files scanned cleanly. A
    /// session over valid-but-empty files succeeds with no monitors.
    pub fn build<P: Into<PathBuf>>(
        paths: impl IntoIterator<Item = P>,
        config: &SessionConfig,
        registry: &Arc<TagRegistry>,
    ) -> Result<Self> {
        let mut files = Vec::new();
        let mut by_monitor: BTreeMap<MonitorId, Vec<EntryLocator>> = BTreeMap::new();

        for (ordinal, path) in paths.into_iter().enumerate() {
            let path = path.into();
            match scan_file(&path, ordinal, registry) {
                Ok(locators) => {
                    debug!(path = %path.display(), entries = locators.len(), "scanned file");
                    files.push(FileRecord {
                        path,
                        entry_count: locators.len() as u64,
                        error: None,
                    });
                    for locator in locators {
                        by_monitor.entry(locator.0).or_default().push(locator.1);
                    }
                }
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "file excluded from session");
                    files.push(FileRecord {
                        path,
                        entry_count: 0,
                        error: Some(error),
                    });
                }
            }
        }

        if !files.iter().any(FileRecord::is_valid) {
            return Err(ReplayError::NoData);
        }

        let mut monitors = BTreeMap::new();
        let mut first_entry_at: Option<DateTime<Utc>> = None;
        let mut last_entry_at: Option<DateTime<Utc>> = None;

        for (id, mut locators) in by_monitor {
            locators.sort_by_key(EntryLocator::sort_key);
            let mut level_counts = [0_u64; 5];
            for locator in &locators {
                level_counts[locator.level.index()] += 1;
            }
            // Non-empty by construction: a monitor only exists here because
            // at least one locator referenced it.
            let Some((first, last)) = locators
                .first()
                .map(|f| f.timestamp)
                .zip(locators.last().map(|l| l.timestamp))
            else {
                continue;
            };
            first_entry_at = Some(first_entry_at.map_or(first, |t| t.min(first)));
            last_entry_at = Some(last_entry_at.map_or(last, |t| t.max(last)));
            monitors.insert(
                id,
                Monitor {
                    id,
                    locators,
                    level_counts,
                    first_entry_at: first,
                    last_entry_at: last,
                },
            );
        }

        info!(
            valid = files.iter().filter(|f| f.is_valid()).count(),
            errored = files.iter().filter(|f| !f.is_valid()).count(),
            monitors = monitors.len(),
            "activity map built"
        );

        Ok(Self {
            files,
            monitors,
            first_entry_at,
            last_entry_at,
            page_size: config.page_size,
            registry: Arc::clone(registry),
        })
    }

    /// Returns every scanned file record, valid and errored.
    #[must_use]
    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    /// Returns the files that scanned cleanly.
    pub fn valid_files(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.iter().filter(|f| f.is_valid())
    }

    /// Returns the files excluded by a scan error.
    pub fn errored_files(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.iter().filter(|f| !f.is_valid())
    }

    /// Returns the discovered monitors, ordered by id.
    pub fn monitors(&self) -> impl Iterator<Item = &Monitor> {
        self.monitors.values()
    }

    /// Returns the number of discovered monitors.
    #[must_use]
    pub fn monitor_count(&self) -> usize {
        self.monitors.len()
    }

    /// Looks up one monitor.
    #[must_use]
    pub fn monitor(&self, id: MonitorId) -> Option<&Monitor> {
        self.monitors.get(&id)
    }

    /// Returns the timestamp of the earliest entry across all monitors.
    #[must_use]
    pub const fn first_entry_at(&self) -> Option<DateTime<Utc>> {
        self.first_entry_at
    }

    /// Returns the timestamp of the latest entry across all monitors.
    #[must_use]
    pub const fn last_entry_at(&self) -> Option<DateTime<Utc>> {
        self.last_entry_at
    }

    /// Returns the session page size.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Builds the serializable summary for one monitor at the session page
    /// size.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::UnknownMonitor`] if the monitor is not in the
    /// map.
    pub fn index_info(&self, id: MonitorId) -> Result<MonitorIndexInfo> {
        self.monitors
            .get(&id)
            .map(|m| m.index_info(self.page_size))
            .ok_or(ReplayError::UnknownMonitor(id))
    }

    /// Reads the first page of a monitor's timeline.
    ///
    /// `from_time` skips entries before the given instant; `None` starts at
    /// the monitor's first entry. The returned [`Page`] carries
    /// ancestor-group context forward across [`Page::forward_page`] calls.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError::UnknownMonitor`] for an unindexed monitor and
    /// [`ReplayError::InvalidPageSize`] for a zero page size.
    pub fn read_first_page(
        &self,
        id: MonitorId,
        from_time: Option<DateTime<Utc>>,
        page_size: usize,
    ) -> Result<Page<'_>> {
        if page_size == 0 {
            return Err(ReplayError::InvalidPageSize);
        }
        let monitor = self
            .monitors
            .get(&id)
            .ok_or(ReplayError::UnknownMonitor(id))?;
        Page::first(self, monitor, from_time, page_size)
    }

    pub(crate) fn file_path(&self, ordinal: usize) -> &Path {
        &self.files[ordinal].path
    }

    pub(crate) fn registry(&self) -> &TagRegistry {
        &self.registry
    }
}

/// Scans one file, producing per-entry locators keyed by monitor.
///
/// Unicast entries are indexed under [`MonitorId::UNICAST`] with a depth
/// synthesized from a running open-group counter, so single-monitor files
/// flow through the same paging machinery as multiplexed ones.
fn scan_file(
    path: &Path,
    ordinal: usize,
    registry: &TagRegistry,
) -> Result<Vec<(MonitorId, EntryLocator)>> {
    let mut reader = EntryReader::open(path, registry)?;
    let mut locators = Vec::new();
    let mut unicast_depth: u32 = 0;

    while let Some((offset, wire)) = reader.next_entry()? {
        let (monitor_id, depth) = match wire.envelope {
            Some(envelope) => (envelope.monitor_id, envelope.depth),
            None => {
                let depth = match wire.entry {
                    LogEntry::Line(_) => unicast_depth,
                    LogEntry::OpenGroup(_) => {
                        let depth = unicast_depth;
                        unicast_depth += 1;
                        depth
                    }
                    LogEntry::CloseGroup(_) => {
                        unicast_depth = unicast_depth.saturating_sub(1);
                        unicast_depth
                    }
                };
                (MonitorId::UNICAST, depth)
            }
        };
        locators.push((
            monitor_id,
            EntryLocator {
                file: ordinal,
                offset,
                timestamp: wire.entry.timestamp(),
                uniquifier: wire.entry.uniquifier(),
                depth,
                kind: wire.entry.kind(),
                level: wire.entry.level(),
            },
        ));
    }
    Ok(locators)
}
