//! Dispatching decoded entries into the database.

use std::sync::Arc;

use ckmon_wire::{Envelope, LogEntry, MonitorId};
use tokio::sync::broadcast;
use tracing::trace;

use crate::database::{ApplicationSnapshot, ClientMonitorDatabase, MonitorSummary};

/// Notification raised for every dispatched entry.
///
/// Carries the entry together with the application and monitor summaries as
/// they stood immediately after the update. Notices are raised in arrival
/// order — the transport is best-effort and a late datagram is dispatched
/// late, not reordered.
#[derive(Debug, Clone)]
pub struct DispatchNotice {
    /// Signature of the originating application (sender host identity).
    pub signature: String,
    /// The originating monitor.
    pub monitor_id: MonitorId,
    /// Nesting depth carried by the entry's envelope.
    pub depth: u32,
    /// The dispatched entry.
    pub entry: LogEntry,
    /// The application snapshot after the update.
    pub application: ApplicationSnapshot,
    /// The monitor summary after the update.
    pub monitor: MonitorSummary,
}

/// Callback invoked synchronously for every dispatched entry, before the
/// next datagram is processed.
pub type EntryHandler = Box<dyn Fn(&DispatchNotice) + Send + Sync>;

/// Applies decoded entries to the database and fans out notices.
pub(crate) struct Dispatcher {
    db: Arc<ClientMonitorDatabase>,
    handler: EntryHandler,
    notices: broadcast::Sender<DispatchNotice>,
}

impl Dispatcher {
    pub(crate) fn new(
        db: Arc<ClientMonitorDatabase>,
        handler: EntryHandler,
        notices: broadcast::Sender<DispatchNotice>,
    ) -> Self {
        Self {
            db,
            handler,
            notices,
        }
    }

    /// Records one entry and raises its notice.
    pub(crate) fn dispatch(&self, signature: String, envelope: Envelope, entry: LogEntry) {
        let (application, monitor) =
            self.db
                .record_entry(&signature, envelope.monitor_id, entry.timestamp());
        trace!(
            signature = %signature,
            monitor = %envelope.monitor_id,
            entries = monitor.entry_count,
            "entry dispatched"
        );

        let notice = DispatchNotice {
            signature,
            monitor_id: envelope.monitor_id,
            depth: envelope.depth,
            entry,
            application,
            monitor,
        };
        (self.handler)(&notice);
        // Subscribers are best-effort; nobody listening is fine.
        let _ = self.notices.send(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use ckmon_wire::{Level, LineEntry};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(micros: i64) -> LogEntry {
        LogEntry::Line(LineEntry::new(
            DateTime::from_timestamp_micros(micros).expect("timestamp in range"),
            Level::Info,
            "x",
        ))
    }

    #[test]
    fn dispatch_updates_database_and_calls_handler() {
        let db = ClientMonitorDatabase::shared();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let (notices, mut rx) = broadcast::channel(8);

        let dispatcher = Dispatcher::new(
            Arc::clone(&db),
            Box::new(move |notice| {
                assert_eq!(notice.signature, "host");
                seen.fetch_add(1, Ordering::SeqCst);
            }),
            notices,
        );

        let id = MonitorId::random();
        let envelope = Envelope {
            monitor_id: id,
            depth: 0,
        };
        dispatcher.dispatch("host".to_string(), envelope, entry(1));
        dispatcher.dispatch("host".to_string(), envelope, entry(2));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(db.application("host").map(|a| a.entry_total()), Some(2));

        let notice = rx.try_recv().expect("first notice");
        assert_eq!(notice.monitor.entry_count, 1);
        let notice = rx.try_recv().expect("second notice");
        assert_eq!(notice.monitor.entry_count, 2);
    }
}
