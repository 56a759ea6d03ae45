//! Error types for the reconstruction engine.

use ckmon_wire::{MonitorId, WireError};
use thiserror::Error;

/// Errors that can occur while reconstructing activity logs from files.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An entry failed to decode.
    ///
    /// During an [`ActivityMap`](crate::ActivityMap) build this is captured
    /// per file rather than returned, so one corrupt file does not abort the
    /// session.
    #[error("decode error: {0}")]
    Wire(#[from] WireError),

    /// The session found zero valid files.
    ///
    /// Distinct from an empty-but-valid result: valid files containing no
    /// entries build an `ActivityMap` with no monitors.
    #[error("no valid files found")]
    NoData,

    /// The requested monitor is not present in the activity map.
    #[error("unknown monitor: {0}")]
    UnknownMonitor(MonitorId),

    /// A page size of zero was requested.
    #[error("page size must be nonzero")]
    InvalidPageSize,

    /// An indexed entry could not be re-read at its recorded offset.
    #[error("indexed entry vanished at offset {offset} of {path}")]
    BadLocator {
        /// File the locator points into.
        path: std::path::PathBuf,
        /// Byte offset the entry was indexed at.
        offset: u64,
    },
}

/// Result type alias for reconstruction operations.
pub type Result<T> = std::result::Result<T, ReplayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(ReplayError::NoData.to_string(), "no valid files found");
        assert_eq!(
            ReplayError::InvalidPageSize.to_string(),
            "page size must be nonzero"
        );

        let err = ReplayError::UnknownMonitor(MonitorId::UNICAST);
        assert!(err.to_string().contains("unknown monitor"));
    }

    #[test]
    fn error_from_wire() {
        let err: ReplayError = WireError::Truncated("text").into();
        assert!(err.to_string().contains("decode error"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ReplayError>();
    }
}
