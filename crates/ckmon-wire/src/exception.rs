//! Structured exception records with cause chains.
//!
//! Exceptions cross the wire as a self-delimiting recursive record: each
//! record carries a message, captured stack frames, and optionally the record
//! that caused it. The codec recurses on this shape rather than depending on
//! any host runtime's exception object graph.

use serde::Serialize;

/// A structured exception record, possibly chained to a cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionRecord {
    /// The exception message.
    pub message: String,
    /// Captured stack frames, innermost first.
    pub stack: Vec<String>,
    /// The exception that caused this one, if any.
    pub cause: Option<Box<ExceptionRecord>>,
}

impl ExceptionRecord {
    /// Creates a leaf record with no stack and no cause.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Vec::new(),
            cause: None,
        }
    }

    /// Sets the captured stack frames.
    #[must_use]
    pub fn with_stack(mut self, stack: Vec<String>) -> Self {
        self.stack = stack;
        self
    }

    /// Chains this record onto a cause.
    #[must_use]
    pub fn caused_by(mut self, cause: Self) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the number of records in the chain, including this one.
    #[must_use]
    pub fn chain_len(&self) -> usize {
        let mut len = 1;
        let mut current = self.cause.as_deref();
        while let Some(record) = current {
            len += 1;
            current = record.cause.as_deref();
        }
        len
    }

    /// Returns the innermost record of the chain.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            current = cause;
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_record() {
        let record = ExceptionRecord::new("boom");
        assert_eq!(record.message, "boom");
        assert!(record.stack.is_empty());
        assert!(record.cause.is_none());
        assert_eq!(record.chain_len(), 1);
    }

    #[test]
    fn chained_records() {
        let record = ExceptionRecord::new("outer")
            .caused_by(ExceptionRecord::new("middle").caused_by(ExceptionRecord::new("inner")));

        assert_eq!(record.chain_len(), 3);
        assert_eq!(record.root_cause().message, "inner");
    }

    #[test]
    fn root_cause_of_leaf_is_self() {
        let record = ExceptionRecord::new("only");
        assert_eq!(record.root_cause().message, "only");
    }

    #[test]
    fn stack_frames_preserved() {
        let record = ExceptionRecord::new("boom")
            .with_stack(vec!["frame_a".to_string(), "frame_b".to_string()]);
        assert_eq!(record.stack.len(), 2);
        assert_eq!(record.stack[0], "frame_a");
    }
}
