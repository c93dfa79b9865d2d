//! Errors from external collaborators.
//!
//! Every collaborator call fails with a [`ServiceError`] whose [`ErrorKind`]
//! decides what the retry policy does with it:
//!
//! - **Transient** errors (rate limits, 5xx, network trouble, a git process
//!   that died) are retried with backoff.
//! - **Permanent** errors (bad credentials, missing repository, malformed
//!   responses) are returned at once.
//!
//! A rebase conflict is not an error at all; see `git::RebaseOutcome`.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
}

impl ErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

/// Failure of one collaborator operation.
#[derive(Debug, Error)]
pub struct ServiceError {
    pub kind: ErrorKind,
    /// Which operation failed, e.g. `detect_changes`.
    pub operation: &'static str,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
        };
        write!(f, "{} failed ({}): {}", self.operation, kind, self.message)
    }
}

impl ServiceError {
    pub fn transient(operation: &'static str, message: impl Into<String>) -> Self {
        ServiceError {
            kind: ErrorKind::Transient,
            operation,
            message: message.into(),
            source: None,
        }
    }

    pub fn permanent(operation: &'static str, message: impl Into<String>) -> Self {
        ServiceError {
            kind: ErrorKind::Permanent,
            operation,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_retriable()
    }
}
