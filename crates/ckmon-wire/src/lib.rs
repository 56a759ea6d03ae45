//! # ckmon-wire
//!
//! Entry data model and binary wire codec for ckmon activity logs.
//!
//! This crate provides:
//!
//! - [`LogEntry`] — Closed union over line / open-group / close-group entries
//! - [`Level`] — Severity levels (Trace, Debug, Info, Warn, Error)
//! - [`MonitorId`] / [`Envelope`] — Multicast addressing of entries
//! - [`TagRegistry`] / [`TagSet`] — Session-owned tag interning
//! - [`ExceptionRecord`] — Recursive exception cause chains
//! - [`codec`] — Encode/decode entries to and from binary cursors
//!
//! The same encoding backs `.ckmon` files and the live UDP path; see the
//! [`codec`] module docs for the byte layout and the failure policy.
//!
//! ## Example
//!
//! ```rust
//! use ckmon_wire::{codec, Level, LineEntry, LogEntry, TagRegistry, WireEntry};
//! use chrono::{DateTime, Utc};
//!
//! // Timestamps cross the wire at microsecond resolution.
//! let now = DateTime::from_timestamp_micros(Utc::now().timestamp_micros())
//!     .unwrap_or_default();
//!
//! let registry = TagRegistry::new();
//! let entry = WireEntry::unicast(LogEntry::Line(
//!     LineEntry::new(now, Level::Info, "service started")
//!         .with_tags(registry.register("lifecycle")),
//! ));
//!
//! let bytes = codec::encode_to_vec(&entry)?;
//! let decoded = codec::decode(&mut std::io::Cursor::new(bytes), &registry)?;
//! assert_eq!(decoded.as_ref(), Some(&entry));
//! # Ok::<(), ckmon_wire::WireError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod exception;
pub mod tags;
pub mod types;

// Re-export main types
pub use error::{Result, WireError};
pub use exception::ExceptionRecord;
pub use tags::{TagRegistry, TagSet};
pub use types::{
    CloseGroupEntry, Conclusion, Envelope, EntryKind, Level, LineEntry, LogEntry, MonitorId,
    OpenGroupEntry, SourceLocation, WireEntry, LEVELS,
};
