//! # ckmon-collector
//!
//! Live UDP collector and client monitor database for ckmon activity logs.
//!
//! This crate provides:
//!
//! - [`Collector`] — One listening session: bound UDP socket, receive loop,
//!   explicit `open`/`close` lifecycle owned by the caller
//! - [`ClientMonitorDatabase`] — In-memory applications → monitors store,
//!   safely readable from any thread while dispatch is running
//! - [`DispatchNotice`] / [`NoticeStream`] — Per-entry notifications, as a
//!   synchronous handler and as an async stream
//!
//! Delivery is best-effort end to end: one multicast entry per datagram, no
//! sequence numbers, no acknowledgments, no retransmission. Lost or
//! reordered datagrams are dispatched as they arrive.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ckmon_collector::{Collector, CollectorConfig};
//! use ckmon_wire::TagRegistry;
//!
//! # async fn run() -> ckmon_collector::Result<()> {
//! let collector = Collector::open(
//!     CollectorConfig::new().with_port(52110),
//!     Arc::new(TagRegistry::new()),
//!     Box::new(|notice| {
//!         println!("{}: {} entries", notice.signature, notice.monitor.entry_count);
//!     }),
//! )
//! .await?;
//!
//! // ... later, from any thread:
//! collector.close();
//! collector.closed().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod collector;
pub mod database;
pub mod dispatch;
pub mod error;

// Re-export main types
pub use collector::{
    Collector, CollectorConfig, CollectorState, CollectorStats, NoticeStream, DEFAULT_PORT,
};
pub use database::{ApplicationSnapshot, ClientMonitorDatabase, MonitorSummary};
pub use dispatch::{DispatchNotice, EntryHandler};
pub use error::{CollectorError, Result};
