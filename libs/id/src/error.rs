//! Error types for ID parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating IDs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("ID cannot be empty")]
    Empty,

    /// The ID has the wrong number of `/` separated segments.
    #[error("invalid {kind} ID: expected {expected} segments, got {actual}")]
    SegmentCount {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    /// An account address is malformed.
    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    /// A sequence number is not an unsigned integer.
    #[error("invalid {field} sequence '{value}'")]
    InvalidSequence { field: &'static str, value: String },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }
}
