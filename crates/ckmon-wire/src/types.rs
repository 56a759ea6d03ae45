//! Core types for activity log entries.
//!
//! This module provides:
//! - [`Level`] — Severity levels for log entries
//! - [`MonitorId`] — 128-bit identifier of an originating monitor
//! - [`LogEntry`] — Closed union over line / open-group / close-group entries
//! - [`Envelope`] — Multicast monitor-id + depth envelope
//! - [`WireEntry`] — An entry together with its optional envelope

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::exception::ExceptionRecord;
use crate::tags::TagSet;

/// Log severity levels, ordered from most to least verbose.
///
/// Fits the 6-bit level field of the wire control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Most verbose, detailed debugging information
    Trace = 0,
    /// Debugging information
    Debug = 1,
    /// General information
    Info = 2,
    /// Warning conditions
    Warn = 3,
    /// Error conditions
    Error = 4,
}

/// All levels, in ascending severity order.
pub const LEVELS: [Level; 5] = [
    Level::Trace,
    Level::Debug,
    Level::Info,
    Level::Warn,
    Level::Error,
];

impl Level {
    /// Returns the string representation of this level.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Returns the level for a 6-bit wire value, if valid.
    #[must_use]
    pub const fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Trace),
            1 => Some(Self::Debug),
            2 => Some(Self::Info),
            3 => Some(Self::Warn),
            4 => Some(Self::Error),
            _ => None,
        }
    }

    /// Returns the 6-bit wire value of this level.
    #[must_use]
    pub const fn to_wire(self) -> u8 {
        self as u8
    }

    /// Returns the index of this level in [`LEVELS`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Identifier of a monitor: a logical execution context producing entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonitorId(pub Uuid);

impl MonitorId {
    /// The synthesized fixed id under which unicast streams are indexed.
    pub const UNICAST: Self = Self(Uuid::nil());

    /// Creates a fresh random monitor id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the raw 16 bytes of the id.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Reconstructs an id from its raw 16 bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl std::fmt::Display for MonitorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Source location an entry was emitted from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    /// Source file name.
    pub file: String,
    /// 1-based line number.
    pub line: u32,
}

impl SourceLocation {
    /// Creates a source location.
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

/// A conclusion produced when a group closed: a tag set plus free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conclusion {
    /// Tags classifying the conclusion.
    pub tags: TagSet,
    /// Conclusion text.
    pub text: String,
}

impl Conclusion {
    /// Creates a conclusion.
    #[must_use]
    pub fn new(tags: TagSet, text: impl Into<String>) -> Self {
        Self {
            tags,
            text: text.into(),
        }
    }
}

/// A leveled log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineEntry {
    /// When the line was emitted (UTC).
    pub timestamp: DateTime<Utc>,
    /// Tie-breaker for entries sharing the same timestamp tick.
    pub uniquifier: u8,
    /// Severity level.
    pub level: Level,
    /// The line text.
    pub text: String,
    /// Where the line was emitted from, if captured.
    pub origin: Option<SourceLocation>,
    /// Tags attached to the line, if any.
    pub tags: Option<TagSet>,
    /// Structured exception record, if the line reports one.
    pub exception: Option<ExceptionRecord>,
}

impl LineEntry {
    /// Creates a line entry with the required fields.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, level: Level, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            uniquifier: 0,
            level,
            text: text.into(),
            origin: None,
            tags: None,
            exception: None,
        }
    }

    /// Sets the uniquifier.
    #[must_use]
    pub const fn with_uniquifier(mut self, uniquifier: u8) -> Self {
        self.uniquifier = uniquifier;
        self
    }

    /// Sets the source location.
    #[must_use]
    pub fn with_origin(mut self, origin: SourceLocation) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Sets the tag set.
    #[must_use]
    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Attaches an exception record.
    #[must_use]
    pub fn with_exception(mut self, exception: ExceptionRecord) -> Self {
        self.exception = Some(exception);
        self
    }
}

/// Start of a nested group span. Carries the same payload as a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenGroupEntry {
    /// When the group was opened (UTC).
    pub timestamp: DateTime<Utc>,
    /// Tie-breaker for entries sharing the same timestamp tick.
    pub uniquifier: u8,
    /// Severity level.
    pub level: Level,
    /// Group title.
    pub text: String,
    /// Where the group was opened from, if captured.
    pub origin: Option<SourceLocation>,
    /// Tags attached to the group, if any.
    pub tags: Option<TagSet>,
    /// Structured exception record, if the group reports one.
    pub exception: Option<ExceptionRecord>,
}

impl OpenGroupEntry {
    /// Creates an open-group entry with the required fields.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, level: Level, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            uniquifier: 0,
            level,
            text: text.into(),
            origin: None,
            tags: None,
            exception: None,
        }
    }

    /// Sets the uniquifier.
    #[must_use]
    pub const fn with_uniquifier(mut self, uniquifier: u8) -> Self {
        self.uniquifier = uniquifier;
        self
    }

    /// Sets the source location.
    #[must_use]
    pub fn with_origin(mut self, origin: SourceLocation) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Sets the tag set.
    #[must_use]
    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Attaches an exception record.
    #[must_use]
    pub fn with_exception(mut self, exception: ExceptionRecord) -> Self {
        self.exception = Some(exception);
        self
    }
}

/// End of a group span, carrying the conclusions the group produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseGroupEntry {
    /// When the group was closed (UTC).
    pub timestamp: DateTime<Utc>,
    /// Tie-breaker for entries sharing the same timestamp tick.
    pub uniquifier: u8,
    /// Severity level.
    pub level: Level,
    /// Conclusions produced when the group closed.
    pub conclusions: Vec<Conclusion>,
}

impl CloseGroupEntry {
    /// Creates a close-group entry with no conclusions.
    #[must_use]
    pub const fn new(timestamp: DateTime<Utc>, level: Level) -> Self {
        Self {
            timestamp,
            uniquifier: 0,
            level,
            conclusions: Vec::new(),
        }
    }

    /// Sets the uniquifier.
    #[must_use]
    pub const fn with_uniquifier(mut self, uniquifier: u8) -> Self {
        self.uniquifier = uniquifier;
        self
    }

    /// Appends a conclusion.
    #[must_use]
    pub fn with_conclusion(mut self, conclusion: Conclusion) -> Self {
        self.conclusions.push(conclusion);
        self
    }
}

/// The kind of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A leveled log line.
    Line,
    /// Start of a group span.
    OpenGroup,
    /// End of a group span.
    CloseGroup,
}

/// A single activity log entry.
///
/// Closed union: all engine logic pattern-matches on this rather than
/// testing wire flags ad hoc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    /// A leveled log line.
    Line(LineEntry),
    /// Start of a group span.
    OpenGroup(OpenGroupEntry),
    /// End of a group span.
    CloseGroup(CloseGroupEntry),
}

impl LogEntry {
    /// Returns the kind of this entry.
    #[must_use]
    pub const fn kind(&self) -> EntryKind {
        match self {
            Self::Line(_) => EntryKind::Line,
            Self::OpenGroup(_) => EntryKind::OpenGroup,
            Self::CloseGroup(_) => EntryKind::CloseGroup,
        }
    }

    /// Returns the entry timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Line(e) => e.timestamp,
            Self::OpenGroup(e) => e.timestamp,
            Self::CloseGroup(e) => e.timestamp,
        }
    }

    /// Returns the entry uniquifier.
    #[must_use]
    pub const fn uniquifier(&self) -> u8 {
        match self {
            Self::Line(e) => e.uniquifier,
            Self::OpenGroup(e) => e.uniquifier,
            Self::CloseGroup(e) => e.uniquifier,
        }
    }

    /// Returns the entry level.
    #[must_use]
    pub const fn level(&self) -> Level {
        match self {
            Self::Line(e) => e.level,
            Self::OpenGroup(e) => e.level,
            Self::CloseGroup(e) => e.level,
        }
    }

    /// Returns the chronological ordering key: timestamp, then uniquifier.
    #[must_use]
    pub const fn sort_key(&self) -> (DateTime<Utc>, u8) {
        (self.timestamp(), self.uniquifier())
    }

    /// Returns the entry text (a close group has none).
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Line(e) => Some(&e.text),
            Self::OpenGroup(e) => Some(&e.text),
            Self::CloseGroup(_) => None,
        }
    }
}

/// Multicast envelope: which monitor an entry belongs to, and how deep in
/// that monitor's group nesting it sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Envelope {
    /// The originating monitor.
    pub monitor_id: MonitorId,
    /// Distance from the monitor's root (0 = top level).
    pub depth: u32,
}

/// A log entry as it crosses the wire: the entry plus its optional
/// multicast envelope.
///
/// `envelope: None` is the unicast shape (single-monitor file);
/// `envelope: Some(_)` is the multicast shape, letting entries from many
/// concurrently-running monitors share one file or datagram stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireEntry {
    /// The entry payload.
    pub entry: LogEntry,
    /// Multicast envelope, if present.
    pub envelope: Option<Envelope>,
}

impl WireEntry {
    /// Wraps an entry in the unicast shape.
    #[must_use]
    pub const fn unicast(entry: LogEntry) -> Self {
        Self {
            entry,
            envelope: None,
        }
    }

    /// Wraps an entry in the multicast shape.
    #[must_use]
    pub const fn multicast(entry: LogEntry, monitor_id: MonitorId, depth: u32) -> Self {
        Self {
            entry,
            envelope: Some(Envelope { monitor_id, depth }),
        }
    }

    /// Returns true if the entry carries a multicast envelope.
    #[must_use]
    pub const fn is_multicast(&self) -> bool {
        self.envelope.is_some()
    }
}
