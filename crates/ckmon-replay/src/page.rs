//! Paginated, group-aware reads over one monitor's timeline.
//!
//! This module provides:
//! - [`Page`] — A bounded window of a monitor's chronological entries
//! - [`ParentedLogEntry`] — An entry paired with its enclosing open group
//! - [`GroupFrame`] — One frame of ancestor-group context
//!
//! A page maintains an explicit open-group stack while advancing: push on
//! open, pop on close. The open-groups-on-end stack of one page becomes the
//! open-groups-on-start context of the next, so a renderer can show correct
//! ancestry without re-scanning from the monitor's start. The stack depth
//! always equals the current entry's depth field: when the visible window
//! starts mid-group, missing ancestor frames are synthesized, and entries
//! parented by one carry `missing_parent` instead of a resolvable parent.
//! That is the defined degraded-rendering case, never an error.
//!
//! Cross-file continuation is invisible here: the cursor walks the
//! monitor's merged locator sequence and switches file handles internally.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ckmon_wire::{LogEntry, MonitorId, OpenGroupEntry, WireEntry};

use crate::activity::{ActivityMap, EntryLocator, Monitor};
use crate::error::{ReplayError, Result};
use crate::file::read_entry_at;

/// One frame of ancestor-group context.
#[derive(Debug, Clone)]
pub struct GroupFrame {
    entry: Option<Arc<OpenGroupEntry>>,
}

impl GroupFrame {
    fn open(entry: Arc<OpenGroupEntry>) -> Self {
        Self { entry: Some(entry) }
    }

    const fn missing() -> Self {
        Self { entry: None }
    }

    /// Returns the opening entry, or `None` when it lies outside the
    /// visible window (e.g. in a rotated-away file).
    #[must_use]
    pub const fn entry(&self) -> Option<&Arc<OpenGroupEntry>> {
        self.entry.as_ref()
    }

    /// Returns true if the opening entry could not be located.
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        self.entry.is_none()
    }
}

/// An entry paired with a reference to its enclosing open group.
#[derive(Debug, Clone)]
pub struct ParentedLogEntry {
    /// The entry itself.
    pub entry: LogEntry,
    /// Nesting depth within the monitor (0 = root).
    pub depth: u32,
    /// The enclosing open-group entry, when it is within the visible window.
    pub parent: Option<Arc<OpenGroupEntry>>,
    /// True when an enclosing group exists but its opening entry could not
    /// be located. Root-level entries have no parent and are not missing.
    pub missing_parent: bool,
}

/// A bounded window of one monitor's chronological entries.
///
/// Produced by [`ActivityMap::read_first_page`]; advanced by
/// [`forward_page`](Self::forward_page).
pub struct Page<'a> {
    map: &'a ActivityMap,
    monitor: &'a Monitor,
    page_size: usize,
    cursor: usize,
    stack: Vec<GroupFrame>,
    open_on_start: Vec<GroupFrame>,
    entries: Vec<ParentedLogEntry>,
    readers: HashMap<usize, BufReader<File>>,
    page_number: usize,
}

impl<'a> Page<'a> {
    pub(crate) fn first(
        map: &'a ActivityMap,
        monitor: &'a Monitor,
        from_time: Option<DateTime<Utc>>,
        page_size: usize,
    ) -> Result<Self> {
        let cursor = match from_time {
            Some(from) => monitor
                .locators()
                .partition_point(|locator| locator.timestamp < from),
            None => 0,
        };
        let mut page = Self {
            map,
            monitor,
            page_size,
            cursor,
            stack: Vec::new(),
            open_on_start: Vec::new(),
            entries: Vec::new(),
            readers: HashMap::new(),
            page_number: 0,
        };
        page.fill()?;
        Ok(page)
    }

    /// Advances to the next page, returning the number of entries read
    /// (0 at the end of the timeline).
    ///
    /// # Errors
    ///
    /// Returns an error if an indexed entry can no longer be read back.
    pub fn forward_page(&mut self) -> Result<usize> {
        let advanced = self.fill()?;
        if advanced > 0 {
            self.page_number += 1;
        }
        Ok(advanced)
    }

    /// Returns this page's entries in chronological order.
    #[must_use]
    pub fn entries(&self) -> &[ParentedLogEntry] {
        &self.entries
    }

    /// Returns the groups that were open when this page started, outermost
    /// first.
    #[must_use]
    pub fn open_groups_on_start(&self) -> &[GroupFrame] {
        &self.open_on_start
    }

    /// Returns the groups still open at the end of this page, outermost
    /// first.
    #[must_use]
    pub fn open_groups_on_end(&self) -> &[GroupFrame] {
        &self.stack
    }

    /// Returns the number of entries in this page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if this page holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the monitor this page reads.
    #[must_use]
    pub const fn monitor_id(&self) -> MonitorId {
        self.monitor.id()
    }

    /// Returns the zero-based page number.
    #[must_use]
    pub const fn page_number(&self) -> usize {
        self.page_number
    }

    fn fill(&mut self) -> Result<usize> {
        self.open_on_start = self.stack.clone();
        self.entries.clear();

        while self.entries.len() < self.page_size {
            let Some(locator) = self.monitor.locators().get(self.cursor).copied() else {
                break;
            };
            self.cursor += 1;
            let wire = self.decode(&locator)?;
            let parented = self.track(&locator, wire.entry);
            self.entries.push(parented);
        }
        Ok(self.entries.len())
    }

    fn decode(&mut self, locator: &EntryLocator) -> Result<WireEntry> {
        let path = self.map.file_path(locator.file);
        let reader = match self.readers.entry(locator.file) {
            std::collections::hash_map::Entry::Occupied(occupied) => occupied.into_mut(),
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(BufReader::new(File::open(path)?))
            }
        };
        read_entry_at(reader, locator.offset, self.map.registry())?.ok_or_else(|| {
            ReplayError::BadLocator {
                path: path.to_path_buf(),
                offset: locator.offset,
            }
        })
    }

    /// Threads one entry through the open-group stack.
    fn track(&mut self, locator: &EntryLocator, entry: LogEntry) -> ParentedLogEntry {
        let depth = locator.depth as usize;
        match &entry {
            LogEntry::Line(_) => {
                self.align(depth);
                let parent = self.stack.last().and_then(|f| f.entry().cloned());
                ParentedLogEntry {
                    missing_parent: depth > 0 && parent.is_none(),
                    depth: locator.depth,
                    parent,
                    entry,
                }
            }
            LogEntry::OpenGroup(open) => {
                self.align(depth);
                let parent = self.stack.last().and_then(|f| f.entry().cloned());
                let frame = GroupFrame::open(Arc::new(open.clone()));
                self.stack.push(frame);
                ParentedLogEntry {
                    missing_parent: depth > 0 && parent.is_none(),
                    depth: locator.depth,
                    parent,
                    entry,
                }
            }
            LogEntry::CloseGroup(_) => {
                // A close at depth d matches a context of d+1 frames. Extra
                // frames are mismatches; drop them first.
                while self.stack.len() > depth + 1 {
                    self.stack.pop();
                }
                let parent = if self.stack.len() == depth + 1 {
                    self.stack.pop().and_then(|f| f.entry().cloned())
                } else {
                    // Stack underflow: the opening entry is outside the
                    // visible window. The pop is a no-op.
                    None
                };
                ParentedLogEntry {
                    missing_parent: parent.is_none(),
                    depth: locator.depth,
                    parent,
                    entry,
                }
            }
        }
    }

    /// Pads or trims the context stack so its depth equals `target`.
    fn align(&mut self, target: usize) {
        while self.stack.len() > target {
            self.stack.pop();
        }
        while self.stack.len() < target {
            self.stack.push(GroupFrame::missing());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::SessionConfig;
    use crate::file::StreamWriter;
    use chrono::DateTime;
    use ckmon_wire::{
        CloseGroupEntry, Level, LineEntry, TagRegistry,
    };
    use std::path::PathBuf;
    use tempfile::TempDir;
    use test_case::test_case;

    fn ts(micros: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(micros).expect("timestamp in range")
    }

    fn line(micros: i64, id: MonitorId, depth: u32, text: &str) -> WireEntry {
        WireEntry::multicast(
            LogEntry::Line(LineEntry::new(ts(micros), Level::Info, text)),
            id,
            depth,
        )
    }

    fn open(micros: i64, id: MonitorId, depth: u32, title: &str) -> WireEntry {
        WireEntry::multicast(
            LogEntry::OpenGroup(OpenGroupEntry::new(ts(micros), Level::Info, title)),
            id,
            depth,
        )
    }

    fn close(micros: i64, id: MonitorId, depth: u32) -> WireEntry {
        WireEntry::multicast(
            LogEntry::CloseGroup(CloseGroupEntry::new(ts(micros), Level::Info)),
            id,
            depth,
        )
    }

    fn write_file(dir: &TempDir, name: &str, entries: &[WireEntry]) -> PathBuf {
        let path = dir.path().join(name);
        let mut writer = StreamWriter::create(&path).expect("create");
        for entry in entries {
            writer.write_entry(entry).expect("write");
        }
        writer.finish().expect("finish");
        path
    }

    fn build(paths: &[PathBuf]) -> ActivityMap {
        let registry = Arc::new(TagRegistry::new());
        ActivityMap::build(paths.to_vec(), &SessionConfig::new(), &registry).expect("build")
    }

    /// A nested timeline: open / line / open / line / close / line / close,
    /// plus a trailing root line.
    fn nested_timeline(id: MonitorId) -> Vec<WireEntry> {
        vec![
            open(1, id, 0, "outer"),
            line(2, id, 1, "in outer"),
            open(3, id, 1, "inner"),
            line(4, id, 2, "in inner"),
            close(5, id, 1),
            line(6, id, 1, "back in outer"),
            close(7, id, 0),
            line(8, id, 0, "root again"),
        ]
    }

    fn collect_all_pages(map: &ActivityMap, id: MonitorId, page_size: usize) -> Vec<ParentedLogEntry> {
        let mut page = map
            .read_first_page(id, None, page_size)
            .expect("first page");
        let mut collected = page.entries().to_vec();
        loop {
            let advanced = page.forward_page().expect("forward");
            if advanced == 0 {
                break;
            }
            collected.extend(page.entries().iter().cloned());
        }
        collected
    }

    #[test_case(1; "page size one")]
    #[test_case(7; "page size seven")]
    #[test_case(100; "page size larger than total")]
    fn pagination_is_idempotent(page_size: usize) {
        let dir = TempDir::new().expect("temp dir");
        let id = MonitorId::random();
        let timeline = nested_timeline(id);
        let path = write_file(&dir, "one.ckmon", &timeline);
        let map = build(&[path]);

        let collected = collect_all_pages(&map, id, page_size);
        let texts: Vec<Option<String>> = collected
            .iter()
            .map(|p| p.entry.text().map(String::from))
            .collect();
        let expected: Vec<Option<String>> = timeline
            .iter()
            .map(|w| w.entry.text().map(String::from))
            .collect();
        assert_eq!(texts, expected, "no duplicates, no gaps, stable order");
    }

    #[test]
    fn parents_follow_group_nesting() {
        let dir = TempDir::new().expect("temp dir");
        let id = MonitorId::random();
        let path = write_file(&dir, "nested.ckmon", &nested_timeline(id));
        let map = build(&[path]);

        let all = collect_all_pages(&map, id, 100);
        let parent_titles: Vec<Option<String>> = all
            .iter()
            .map(|p| p.parent.as_ref().map(|g| g.text.clone()))
            .collect();
        assert_eq!(
            parent_titles,
            vec![
                None,                       // open "outer" at root
                Some("outer".to_string()),  // line in outer
                Some("outer".to_string()),  // open "inner"
                Some("inner".to_string()),  // line in inner
                Some("inner".to_string()),  // close of inner
                Some("outer".to_string()),  // line back in outer
                Some("outer".to_string()),  // close of outer
                None,                       // trailing root line
            ]
        );
        assert!(all.iter().all(|p| !p.missing_parent));
    }

    #[test]
    fn context_carries_across_page_boundary() {
        let dir = TempDir::new().expect("temp dir");
        let id = MonitorId::random();
        let timeline = vec![
            open(1, id, 0, "g"),
            line(2, id, 1, "a"),
            line(3, id, 1, "b"),
            close(4, id, 0),
        ];
        let path = write_file(&dir, "boundary.ckmon", &timeline);
        let map = build(&[path]);

        let mut page = map.read_first_page(id, None, 2).expect("first page");
        assert_eq!(page.len(), 2);
        assert!(page.open_groups_on_start().is_empty());
        assert_eq!(page.open_groups_on_end().len(), 1);

        let advanced = page.forward_page().expect("forward");
        assert_eq!(advanced, 2);
        assert_eq!(page.page_number(), 1);

        // Page 2 starts inside "g" and knows it without re-scanning.
        let on_start = page.open_groups_on_start();
        assert_eq!(on_start.len(), 1);
        assert_eq!(
            on_start[0].entry().map(|g| g.text.as_str()),
            Some("g")
        );
        assert_eq!(
            page.entries()[0].parent.as_ref().map(|g| g.text.as_str()),
            Some("g")
        );
        assert!(page.open_groups_on_end().is_empty());
    }

    #[test]
    fn cross_file_continuity_matches_single_file() {
        let dir = TempDir::new().expect("temp dir");
        let id = MonitorId::random();
        let timeline = nested_timeline(id);

        // 60/40 split across two files by timestamp.
        let split = timeline.len() * 6 / 10;
        let first = write_file(&dir, "first.ckmon", &timeline[..split]);
        let second = write_file(&dir, "second.ckmon", &timeline[split..]);
        let whole = write_file(&dir, "whole.ckmon", &timeline);

        let split_map = build(&[first, second]);
        let whole_map = build(&[whole]);

        let from_split: Vec<LogEntry> = collect_all_pages(&split_map, id, 3)
            .into_iter()
            .map(|p| p.entry)
            .collect();
        let from_whole: Vec<LogEntry> = collect_all_pages(&whole_map, id, 3)
            .into_iter()
            .map(|p| p.entry)
            .collect();
        assert_eq!(from_split, from_whole);
    }

    #[test]
    fn window_starting_mid_group_marks_missing_parents() {
        let dir = TempDir::new().expect("temp dir");
        let id = MonitorId::random();

        // The opening entry lives in an earlier, rotated-away file; only the
        // tail of the group is visible.
        let tail = vec![
            line(10, id, 1, "orphaned line"),
            close(11, id, 0),
            line(12, id, 0, "root after close"),
        ];
        let path = write_file(&dir, "tail.ckmon", &tail);
        let map = build(&[path]);

        let page = map.read_first_page(id, None, 10).expect("first page");
        let entries = page.entries();
        assert_eq!(entries.len(), 3);

        assert!(entries[0].missing_parent);
        assert!(entries[0].parent.is_none());

        // The close has no resolvable parent; the pop is a no-op, not an error.
        assert!(entries[1].missing_parent);
        assert!(entries[1].parent.is_none());

        // After the dangling close, root-level entries are clean.
        assert!(!entries[2].missing_parent);
    }

    #[test]
    fn from_time_window_inside_group() {
        let dir = TempDir::new().expect("temp dir");
        let id = MonitorId::random();
        let path = write_file(&dir, "window.ckmon", &nested_timeline(id));
        let map = build(&[path]);

        // Start at ts 6: inside "outer", after "inner" closed.
        let page = map
            .read_first_page(id, Some(ts(6)), 10)
            .expect("first page");
        let entries = page.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].entry.text(), Some("back in outer"));
        assert!(entries[0].missing_parent);
        assert_eq!(entries[0].depth, 1);
    }

    #[test]
    fn forward_page_at_end_returns_zero() {
        let dir = TempDir::new().expect("temp dir");
        let id = MonitorId::random();
        let path = write_file(&dir, "short.ckmon", &[line(1, id, 0, "only")]);
        let map = build(&[path]);

        let mut page = map.read_first_page(id, None, 10).expect("first page");
        assert_eq!(page.len(), 1);
        assert_eq!(page.forward_page().expect("forward"), 0);
        assert!(page.is_empty());
        assert_eq!(page.page_number(), 0);
    }

    #[test]
    fn read_first_page_rejects_bad_arguments() {
        let dir = TempDir::new().expect("temp dir");
        let id = MonitorId::random();
        let path = write_file(&dir, "args.ckmon", &[line(1, id, 0, "x")]);
        let map = build(&[path]);

        assert!(matches!(
            map.read_first_page(id, None, 0),
            Err(ReplayError::InvalidPageSize)
        ));
        assert!(matches!(
            map.read_first_page(MonitorId::random(), None, 5),
            Err(ReplayError::UnknownMonitor(_))
        ));
    }
}
