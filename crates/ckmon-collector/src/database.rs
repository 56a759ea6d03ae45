//! In-memory database of applications and their monitors.
//!
//! This module provides:
//! - [`ClientMonitorDatabase`] — Shared store keyed by application signature
//! - [`ApplicationSnapshot`] / [`MonitorSummary`] — Consistent read views
//!
//! The database has process lifetime: created at collector start, cleared
//! only by restart. It is mutated only by the dispatch task; any other
//! thread may query it concurrently and always observes fully-updated
//! summaries, never a partial one.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ckmon_wire::MonitorId;
use parking_lot::RwLock;
use serde::Serialize;

/// Summary of one monitor as seen from one application signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorSummary {
    /// The monitor id.
    pub monitor_id: MonitorId,
    /// Entries dispatched for this monitor, in arrival order.
    pub entry_count: u64,
    /// Timestamp carried by the most recently arrived entry.
    ///
    /// Arrival order, not timestamp order: a late datagram moves this
    /// backwards. That is the documented best-effort semantic of the
    /// transport.
    pub last_entry_at: DateTime<Utc>,
}

/// Consistent snapshot of one application and its monitors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationSnapshot {
    /// The application signature (host identity).
    pub signature: String,
    /// Monitor summaries, ordered by monitor id.
    pub monitors: Vec<MonitorSummary>,
}

impl ApplicationSnapshot {
    /// Returns the total entry count across all monitors.
    #[must_use]
    pub fn entry_total(&self) -> u64 {
        self.monitors.iter().map(|m| m.entry_count).sum()
    }
}

/// Shared database of applications → monitors fed by the live dispatcher.
#[derive(Debug, Default)]
pub struct ClientMonitorDatabase {
    apps: RwLock<BTreeMap<String, BTreeMap<MonitorId, MonitorSummary>>>,
}

impl ClientMonitorDatabase {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty shared database handle.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Records one dispatched entry, returning the updated snapshots.
    ///
    /// Looks up or creates the application for `signature` and the monitor
    /// summary for `monitor_id` within it, then bumps the entry count. The
    /// returned snapshots are taken under the same lock as the update.
    pub fn record_entry(
        &self,
        signature: &str,
        monitor_id: MonitorId,
        entry_at: DateTime<Utc>,
    ) -> (ApplicationSnapshot, MonitorSummary) {
        let mut apps = self.apps.write();
        let monitors = apps.entry(signature.to_string()).or_default();
        let summary = monitors.entry(monitor_id).or_insert_with(|| MonitorSummary {
            monitor_id,
            entry_count: 0,
            last_entry_at: entry_at,
        });
        summary.entry_count += 1;
        summary.last_entry_at = entry_at;
        let summary = summary.clone();

        let application = ApplicationSnapshot {
            signature: signature.to_string(),
            monitors: monitors.values().cloned().collect(),
        };
        (application, summary)
    }

    /// Returns snapshots of every application, ordered by signature.
    #[must_use]
    pub fn applications(&self) -> Vec<ApplicationSnapshot> {
        self.apps
            .read()
            .iter()
            .map(|(signature, monitors)| ApplicationSnapshot {
                signature: signature.clone(),
                monitors: monitors.values().cloned().collect(),
            })
            .collect()
    }

    /// Returns a snapshot of one application.
    #[must_use]
    pub fn application(&self, signature: &str) -> Option<ApplicationSnapshot> {
        self.apps
            .read()
            .get(signature)
            .map(|monitors| ApplicationSnapshot {
                signature: signature.to_string(),
                monitors: monitors.values().cloned().collect(),
            })
    }

    /// Returns the number of known applications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.apps.read().len()
    }

    /// Returns true if no application has been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apps.read().is_empty()
    }

    /// Removes every application and monitor summary.
    pub fn clear(&self) {
        self.apps.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(micros: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(micros).expect("timestamp in range")
    }

    #[test]
    fn record_creates_application_and_monitor() {
        let db = ClientMonitorDatabase::new();
        let id = MonitorId::random();

        let (app, summary) = db.record_entry("10.0.0.7", id, ts(1));
        assert_eq!(app.signature, "10.0.0.7");
        assert_eq!(app.monitors.len(), 1);
        assert_eq!(summary.monitor_id, id);
        assert_eq!(summary.entry_count, 1);
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn record_bumps_counts_per_monitor() {
        let db = ClientMonitorDatabase::new();
        let a = MonitorId::random();
        let b = MonitorId::random();

        db.record_entry("host", a, ts(1));
        db.record_entry("host", a, ts(2));
        let (app, _) = db.record_entry("host", b, ts(3));

        assert_eq!(app.monitors.len(), 2);
        assert_eq!(app.entry_total(), 3);

        let counts: Vec<u64> = app
            .monitors
            .iter()
            .map(|m| m.entry_count)
            .collect();
        assert!(counts.contains(&2));
        assert!(counts.contains(&1));
    }

    #[test]
    fn late_entry_moves_last_entry_backwards() {
        // Arrival order wins: no reordering on the live path.
        let db = ClientMonitorDatabase::new();
        let id = MonitorId::random();

        db.record_entry("host", id, ts(100));
        let (_, summary) = db.record_entry("host", id, ts(50));
        assert_eq!(summary.last_entry_at, ts(50));
    }

    #[test]
    fn distinct_signatures_are_distinct_applications() {
        let db = ClientMonitorDatabase::new();
        let id = MonitorId::random();

        db.record_entry("host-a", id, ts(1));
        db.record_entry("host-b", id, ts(2));

        assert_eq!(db.len(), 2);
        let apps = db.applications();
        assert_eq!(apps[0].signature, "host-a");
        assert_eq!(apps[1].signature, "host-b");
    }

    #[test]
    fn application_lookup() {
        let db = ClientMonitorDatabase::new();
        assert!(db.application("nobody").is_none());

        db.record_entry("host", MonitorId::random(), ts(1));
        let app = db.application("host").expect("application present");
        assert_eq!(app.entry_total(), 1);
    }

    #[test]
    fn clear_empties_the_database() {
        let db = ClientMonitorDatabase::new();
        db.record_entry("host", MonitorId::random(), ts(1));
        assert!(!db.is_empty());

        db.clear();
        assert!(db.is_empty());
        assert!(db.applications().is_empty());
    }

    #[test]
    fn snapshot_serializes() {
        let db = ClientMonitorDatabase::new();
        db.record_entry("host", MonitorId::UNICAST, ts(1));
        let apps = db.applications();
        let json = serde_json::to_value(&apps).expect("serialize");
        assert_eq!(json[0]["signature"], "host");
        assert_eq!(json[0]["monitors"][0]["entry_count"], 1);
    }
}
