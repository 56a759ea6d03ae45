//! # ckmon-replay
//!
//! File store and multi-file reconstruction engine for ckmon activity logs.
//!
//! This crate provides:
//!
//! - [`StreamWriter`] / [`EntryReader`] — `.ckmon` file writing (with
//!   size-based rotation) and forward scanning
//! - [`ActivityMap`] — The aggregate of one reconstruction session: valid
//!   and errored files, discovered monitors, global time bounds
//! - [`MonitorIndexInfo`] — Serializable per-monitor summaries
//! - [`Page`] / [`ParentedLogEntry`] — Paginated, group-context-aware reads
//!   of a monitor's timeline, stitched transparently across rotated files
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ckmon_replay::{ActivityMap, SessionConfig};
//! use ckmon_wire::TagRegistry;
//!
//! let registry = Arc::new(TagRegistry::new());
//! let config = SessionConfig::new().with_page_size(50);
//! let map = ActivityMap::build(
//!     ["a.ckmon".to_string(), "b.ckmon".to_string()],
//!     &config,
//!     &registry,
//! )?;
//!
//! for monitor in map.monitors() {
//!     let mut page = map.read_first_page(monitor.id(), None, 50)?;
//!     while {
//!         for parented in page.entries() {
//!             println!("{:?}", parented.entry.text());
//!         }
//!         page.forward_page()? > 0
//!     } {}
//! }
//! # Ok::<(), ckmon_replay::ReplayError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod activity;
pub mod error;
pub mod file;
pub mod page;

// Re-export main types
pub use activity::{ActivityMap, FileRecord, Monitor, MonitorIndexInfo, SessionConfig};
pub use error::{ReplayError, Result};
pub use file::{
    is_ckmon_file, read_entry_at, EntryReader, StreamWriter, StreamWriterConfig, FILE_EXTENSION,
};
pub use page::{GroupFrame, Page, ParentedLogEntry};
