//! Live UDP collector.
//!
//! This module provides:
//! - [`Collector`] — Owns one listening session: a bound UDP socket and its
//!   receive-loop task
//! - [`CollectorConfig`] — Bind address configuration
//! - [`NoticeStream`] — Async stream of dispatch notices
//!
//! One encoded multicast entry per datagram, no extra framing. Each
//! datagram is decoded and dispatched synchronously before the next one is
//! read, preserving arrival order. There is no queueing or backpressure: a
//! slow handler stalls the loop and the transport drops subsequent
//! datagrams — accepted best-effort behavior, not a bug. Undecodable
//! datagrams are counted and dropped; they never end the session.
//!
//! The collector is an explicit object owned by its caller — no
//! process-wide singleton. [`Collector::close`] may be called from any
//! thread; the loop stops after the in-flight dispatch completes.

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use ckmon_wire::{codec, TagRegistry, WireEntry};
use futures::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::database::ClientMonitorDatabase;
use crate::dispatch::{DispatchNotice, Dispatcher, EntryHandler};
use crate::error::{CollectorError, Result};

/// Default UDP port for live collection.
pub const DEFAULT_PORT: u16 = 52110;

/// Largest datagram the collector will receive.
const MAX_DATAGRAM_LEN: usize = 64 * 1024;

/// Configuration for the live collector.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// UDP address to bind. Port 0 binds an ephemeral port (useful in
    /// tests).
    pub bind_addr: SocketAddr,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
        }
    }
}

impl CollectorConfig {
    /// Creates a config listening on the default port.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the port, keeping the wildcard address.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.bind_addr.set_port(port);
        self
    }

    /// Sets the full bind address.
    #[must_use]
    pub const fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }
}

/// Lifecycle state of a collector session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectorState {
    /// Constructed, loop not yet running.
    Idle,
    /// Waiting for the next datagram.
    Listening,
    /// Decoding a received datagram.
    Decoding,
    /// Dispatching a decoded entry.
    Dispatching,
    /// Terminal: the loop has stopped and the socket is released.
    Closed,
}

impl CollectorState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Listening => 1,
            Self::Decoding => 2,
            Self::Dispatching => 3,
            Self::Closed => 4,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Listening,
            2 => Self::Decoding,
            3 => Self::Dispatching,
            4 => Self::Closed,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    dispatched: AtomicU64,
    decode_failures: AtomicU64,
    dropped_unicast: AtomicU64,
}

/// Point-in-time view of the collector's diagnostic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollectorStats {
    /// Datagrams received.
    pub received: u64,
    /// Entries decoded and dispatched.
    pub dispatched: u64,
    /// Datagrams dropped because they failed to decode.
    pub decode_failures: u64,
    /// Datagrams dropped because they lacked a multicast envelope.
    pub dropped_unicast: u64,
}

/// One live collection session.
///
/// Binds a UDP socket on [`open`](Self::open) and receives until
/// [`close`](Self::close). The session dispatches into a
/// [`ClientMonitorDatabase`] that outlives individual queries: readers on
/// any thread always see consistent summaries.
pub struct Collector {
    db: Arc<ClientMonitorDatabase>,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<Result<()>>>>,
    state: Arc<AtomicU8>,
    counters: Arc<Counters>,
    notices: broadcast::Sender<DispatchNotice>,
}

impl Collector {
    /// Binds the configured address and starts the receive loop.
    ///
    /// The handler runs synchronously on the receive task for every
    /// dispatched entry, before the next datagram is processed.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::Bind`] if the socket cannot be bound.
    pub async fn open(
        config: CollectorConfig,
        registry: Arc<TagRegistry>,
        handler: EntryHandler,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|source| CollectorError::Bind {
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = socket.local_addr()?;
        info!(addr = %local_addr, "collector listening");

        let db = ClientMonitorDatabase::shared();
        let (notices, _) = broadcast::channel(1024);
        let dispatcher = Dispatcher::new(Arc::clone(&db), handler, notices.clone());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let state = Arc::new(AtomicU8::new(CollectorState::Idle.as_u8()));
        let counters = Arc::new(Counters::default());

        let task = tokio::spawn(receive_loop(
            socket,
            registry,
            dispatcher,
            shutdown_rx,
            Arc::clone(&state),
            Arc::clone(&counters),
        ));

        Ok(Self {
            db,
            local_addr,
            shutdown,
            task: Mutex::new(Some(task)),
            state,
            counters,
            notices,
        })
    }

    /// Returns the bound socket address (with the actual port when the
    /// config asked for port 0).
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the shared database this session dispatches into.
    #[must_use]
    pub fn database(&self) -> Arc<ClientMonitorDatabase> {
        Arc::clone(&self.db)
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> CollectorState {
        CollectorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns a snapshot of the diagnostic counters.
    #[must_use]
    pub fn stats(&self) -> CollectorStats {
        CollectorStats {
            received: self.counters.received.load(Ordering::Relaxed),
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            decode_failures: self.counters.decode_failures.load(Ordering::Relaxed),
            dropped_unicast: self.counters.dropped_unicast.load(Ordering::Relaxed),
        }
    }

    /// Subscribes to dispatch notices.
    ///
    /// Lagging subscribers skip notices rather than stalling the loop,
    /// matching the best-effort transport.
    #[must_use]
    pub fn subscribe(&self) -> NoticeStream {
        NoticeStream::new(self.notices.subscribe())
    }

    /// Signals the receive loop to stop after the current datagram.
    ///
    /// Safe to call from any thread, idempotent, and never blocks on an
    /// in-progress dispatch.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Waits for the receive loop to terminate.
    ///
    /// # Errors
    ///
    /// Returns the session-fatal receive error, if the loop ended on one.
    pub async fn closed(&self) -> Result<()> {
        let task = self.task.lock().take();
        match task {
            Some(task) => task.await.unwrap_or(Ok(())),
            None => Ok(()),
        }
    }
}

async fn receive_loop(
    socket: UdpSocket,
    registry: Arc<TagRegistry>,
    dispatcher: Dispatcher,
    mut shutdown: watch::Receiver<bool>,
    state: Arc<AtomicU8>,
    counters: Arc<Counters>,
) -> Result<()> {
    let mut buf = vec![0_u8; MAX_DATAGRAM_LEN];
    state.store(CollectorState::Listening.as_u8(), Ordering::Release);

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, peer)) => {
                        counters.received.fetch_add(1, Ordering::Relaxed);
                        state.store(CollectorState::Decoding.as_u8(), Ordering::Release);
                        match codec::decode(&mut Cursor::new(&buf[..len]), &registry) {
                            Ok(Some(WireEntry { entry, envelope: Some(envelope) })) => {
                                state.store(CollectorState::Dispatching.as_u8(), Ordering::Release);
                                dispatcher.dispatch(peer.ip().to_string(), envelope, entry);
                                counters.dispatched.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(Some(_)) => {
                                counters.dropped_unicast.fetch_add(1, Ordering::Relaxed);
                                warn!(peer = %peer, "datagram without multicast envelope dropped");
                            }
                            Ok(None) => {
                                counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                                warn!(peer = %peer, "empty datagram dropped");
                            }
                            Err(decode_error) => {
                                counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                                warn!(peer = %peer, error = %decode_error, "undecodable datagram dropped");
                            }
                        }
                        state.store(CollectorState::Listening.as_u8(), Ordering::Release);
                    }
                    Err(receive_error) => {
                        error!(error = %receive_error, "receive failed, closing collector session");
                        state.store(CollectorState::Closed.as_u8(), Ordering::Release);
                        return Err(CollectorError::Receive(receive_error));
                    }
                }
            }
            changed = shutdown.changed() => {
                // A dropped sender means the owning collector is gone.
                if changed.is_err() || *shutdown.borrow() {
                    info!("collector shutting down");
                    break;
                }
            }
        }
    }

    state.store(CollectorState::Closed.as_u8(), Ordering::Release);
    Ok(())
}

/// Async stream of dispatch notices.
///
/// Yields notices as the receive loop dispatches entries. A lagging
/// subscriber skips missed notices and keeps going.
pub struct NoticeStream {
    receiver: broadcast::Receiver<DispatchNotice>,
    closed: bool,
}

impl NoticeStream {
    const fn new(receiver: broadcast::Receiver<DispatchNotice>) -> Self {
        Self {
            receiver,
            closed: false,
        }
    }

    /// Returns true if the stream is closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    async fn recv_next(&mut self) -> Option<DispatchNotice> {
        loop {
            match self.receiver.recv().await {
                Ok(notice) => return Some(notice),
                Err(broadcast::error::RecvError::Closed) => {
                    self.closed = true;
                    return None;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notice subscriber lagged");
                }
            }
        }
    }
}

impl Stream for NoticeStream {
    type Item = DispatchNotice;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        if self.closed {
            return std::task::Poll::Ready(None);
        }

        let future = self.recv_next();
        tokio::pin!(future);

        std::future::Future::poll(future.as_mut(), cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ApplicationSnapshot;
    use chrono::{DateTime, Utc};
    use ckmon_wire::{Level, LineEntry, LogEntry, MonitorId};
    use futures::StreamExt;
    use std::time::Duration;

    fn ts(micros: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(micros).expect("timestamp in range")
    }

    fn datagram(micros: i64, id: MonitorId, text: &str) -> Vec<u8> {
        let entry = WireEntry::multicast(
            LogEntry::Line(LineEntry::new(ts(micros), Level::Info, text)),
            id,
            0,
        );
        codec::encode_to_vec(&entry).expect("encode")
    }

    async fn open_local() -> Collector {
        let config = CollectorConfig::new().with_bind_addr(
            "127.0.0.1:0".parse().expect("addr"),
        );
        Collector::open(config, Arc::new(TagRegistry::new()), Box::new(|_| {}))
            .await
            .expect("open collector")
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..500 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within deadline");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dispatches_datagrams_into_database() {
        let collector = open_local().await;
        let addr = collector.local_addr();
        let db = collector.database();

        let a = MonitorId::random();
        let b = MonitorId::random();
        let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.expect("bind sender");
        sender.send_to(&datagram(1, a, "one"), addr).await.expect("send");
        sender.send_to(&datagram(2, a, "two"), addr).await.expect("send");
        sender.send_to(&datagram(3, b, "three"), addr).await.expect("send");

        wait_until(|| db.applications().iter().map(ApplicationSnapshot::entry_total).sum::<u64>() == 3)
            .await;

        // One application (one source host), two monitors, counts 2 and 1.
        let apps = db.applications();
        assert_eq!(apps.len(), 1);
        let app = &apps[0];
        assert_eq!(app.monitors.len(), 2);

        let count_of = |id: MonitorId| {
            app.monitors
                .iter()
                .find(|m| m.monitor_id == id)
                .map(|m| m.entry_count)
        };
        assert_eq!(count_of(a), Some(2));
        assert_eq!(count_of(b), Some(1));

        collector.close();
        collector.closed().await.expect("clean close");
        assert_eq!(collector.state(), CollectorState::Closed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn undecodable_datagram_is_dropped_not_fatal() {
        let collector = open_local().await;
        let addr = collector.local_addr();

        let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.expect("bind sender");
        // Reserved control bit set: malformed.
        sender.send_to(&0x8040_u16.to_le_bytes(), addr).await.expect("send");
        sender
            .send_to(&datagram(1, MonitorId::random(), "after garbage"), addr)
            .await
            .expect("send");

        wait_until(|| collector.stats().dispatched == 1).await;
        let stats = collector.stats();
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.received, 2);

        collector.close();
        collector.closed().await.expect("clean close");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unicast_datagram_is_dropped() {
        let collector = open_local().await;
        let addr = collector.local_addr();

        let unicast = codec::encode_to_vec(&WireEntry::unicast(LogEntry::Line(
            LineEntry::new(ts(1), Level::Info, "no envelope"),
        )))
        .expect("encode");
        let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.expect("bind sender");
        sender.send_to(&unicast, addr).await.expect("send");

        wait_until(|| collector.stats().dropped_unicast == 1).await;
        assert!(collector.database().is_empty());

        collector.close();
        collector.closed().await.expect("clean close");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn handler_runs_before_next_datagram() {
        let seen: Arc<parking_lot::Mutex<Vec<String>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let config = CollectorConfig::new().with_bind_addr(
            "127.0.0.1:0".parse().expect("addr"),
        );
        let collector = Collector::open(
            config,
            Arc::new(TagRegistry::new()),
            Box::new(move |notice| {
                if let Some(text) = notice.entry.text() {
                    sink.lock().push(text.to_string());
                }
            }),
        )
        .await
        .expect("open collector");

        let addr = collector.local_addr();
        let id = MonitorId::random();
        let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.expect("bind sender");
        sender.send_to(&datagram(1, id, "first"), addr).await.expect("send");
        sender.send_to(&datagram(2, id, "second"), addr).await.expect("send");

        wait_until(|| seen.lock().len() == 2).await;
        assert_eq!(*seen.lock(), vec!["first".to_string(), "second".to_string()]);

        collector.close();
        collector.closed().await.expect("clean close");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscriber_stream_yields_notices() {
        let collector = open_local().await;
        let mut stream = collector.subscribe();
        let addr = collector.local_addr();

        let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.expect("bind sender");
        sender
            .send_to(&datagram(5, MonitorId::random(), "streamed"), addr)
            .await
            .expect("send");

        let notice = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("notice within deadline")
            .expect("stream open");
        assert_eq!(notice.entry.text(), Some("streamed"));
        assert_eq!(notice.monitor.entry_count, 1);

        collector.close();
        collector.closed().await.expect("clean close");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn close_is_idempotent_and_from_any_thread() {
        let collector = Arc::new(open_local().await);

        let remote = Arc::clone(&collector);
        let handle = std::thread::spawn(move || remote.close());
        handle.join().expect("close thread");

        collector.close();
        collector.closed().await.expect("clean close");
        collector.closed().await.expect("second wait is a no-op");
        assert_eq!(collector.state(), CollectorState::Closed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bind_failure_is_synchronous() {
        let first = open_local().await;
        let config = CollectorConfig::new().with_bind_addr(first.local_addr());

        let result = Collector::open(config, Arc::new(TagRegistry::new()), Box::new(|_| {})).await;
        assert!(matches!(result, Err(CollectorError::Bind { .. })));

        first.close();
        first.closed().await.expect("clean close");
    }

    #[test]
    fn config_builders() {
        let config = CollectorConfig::new();
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);

        let config = CollectorConfig::new().with_port(9000);
        assert_eq!(config.bind_addr.port(), 9000);
    }

    #[test]
    fn state_u8_roundtrip() {
        for state in [
            CollectorState::Idle,
            CollectorState::Listening,
            CollectorState::Decoding,
            CollectorState::Dispatching,
            CollectorState::Closed,
        ] {
            assert_eq!(CollectorState::from_u8(state.as_u8()), state);
        }
    }
}
