//! Error types for the live collector.

use std::net::SocketAddr;

use thiserror::Error;

/// Errors that can occur in the live collector.
///
/// Datagram-level decode failures are not represented here: they are
/// counted, logged, and the datagram is dropped — they never cross the
/// receive-loop boundary.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Binding the UDP socket failed (port in use, permission denied).
    /// Fatal at construction, surfaced synchronously by
    /// [`Collector::open`](crate::Collector::open).
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that could not be bound.
        addr: SocketAddr,
        /// The underlying socket error.
        source: std::io::Error,
    },

    /// Receiving from the socket failed. Fatal to the collector session.
    #[error("receive failed: {0}")]
    Receive(#[from] std::io::Error),
}

/// Result type alias for collector operations.
pub type Result<T> = std::result::Result<T, CollectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let addr: SocketAddr = "127.0.0.1:9".parse().expect("addr");
        let err = CollectorError::Bind {
            addr,
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().contains("127.0.0.1:9"));
        assert!(err.to_string().contains("in use"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CollectorError>();
    }
}
