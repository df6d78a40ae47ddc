//! Reconciliation errors.

use thiserror::Error;

use crate::object::ResourceKind;

/// Errors returned by the remote orchestration API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// The object does not exist. Routes an apply to the create path.
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: ResourceKind,
        namespace: String,
        name: String,
    },

    /// Create of an object that already exists.
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: ResourceKind,
        namespace: String,
        name: String,
    },

    /// Write based on a stale resource version.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other status returned by the API server.
    #[error("remote API returned {code}: {message}")]
    Status { code: u16, message: String },

    /// The request never got a response.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ApiError {
    /// Returns true if this error indicates the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors computing desired state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuilderError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("encoding manifest: {0}")]
    Encode(String),
}

impl BuilderError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from a single apply call.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// A remote call failed, passed through unmodified.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The builder could not compute the desired object.
    #[error("building {kind} {name}: {source}")]
    Builder {
        kind: ResourceKind,
        name: String,
        #[source]
        source: BuilderError,
    },

    /// A network policy list stopped part way. The first `applied` members
    /// were written; member `index` and everything after it were not.
    #[error("network policy {index} ({name}) failed after {applied} applied: {source}")]
    PartialApply {
        index: usize,
        name: String,
        applied: usize,
        #[source]
        source: Box<ApplyError>,
    },

    #[error("apply cancelled")]
    Cancelled,

    #[error("apply deadline exceeded")]
    DeadlineExceeded,
}

impl ApplyError {
    /// Returns the underlying remote error, if any, looking through
    /// partial-apply wrapping.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(e) => Some(e),
            Self::PartialApply { source, .. } => source.api_error(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.api_error().is_some_and(ApiError::is_not_found)
    }
}
