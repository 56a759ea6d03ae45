//! Error types for the wire codec.

use thiserror::Error;

/// Errors that can occur while encoding or decoding entries.
///
/// End of stream is not an error: [`decode`](crate::codec::decode) reports it
/// as `Ok(None)`. Every `WireError` produced after a control word has been
/// read is fatal for the stream being decoded — the codec never attempts to
/// resynchronize.
#[derive(Debug, Error)]
pub enum WireError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The payload ended before the entry was complete.
    #[error("truncated entry: {0}")]
    Truncated(&'static str),

    /// The bytes read do not form a valid entry.
    #[error("malformed entry: {0}")]
    Malformed(String),
}

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, WireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = WireError::Truncated("text");
        assert_eq!(err.to_string(), "truncated entry: text");

        let err = WireError::Malformed("bad kind".to_string());
        assert_eq!(err.to_string(), "malformed entry: bad kind");
    }

    #[test]
    fn error_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: WireError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WireError>();
    }
}
