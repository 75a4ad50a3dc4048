//! Error types for flamegate-core
//!
//! One taxonomy covers both request-level failures (duplicate session,
//! unknown task, malformed body) and cycle-level failures classified by
//! pipeline stage (collection, render, storage, cancellation).

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// A session with this id is already registered on a live transport
    #[error("duplicate session: {0}")]
    DuplicateSession(String),

    /// Unknown task or session id
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed or invalid request
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The trace collector failed
    #[error("collection error: {0}")]
    Collection(String),

    /// The flame-graph renderer failed
    #[error("render error: {0}")]
    Render(String),

    /// The artifact store rejected or lost a write
    #[error("storage error: {0}")]
    Storage(String),

    /// The operation was cancelled by an explicit stop or session close
    #[error("cancelled")]
    Cancelled,

    /// An external process could not be spawned or inspected
    #[error("process error: {0}")]
    Process(String),

    /// Local filesystem failure outside the artifact store
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable code, used in wire payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Error::DuplicateSession(_) => "DuplicateSession",
            Error::NotFound(_) => "NotFound",
            Error::BadRequest(_) => "BadRequest",
            Error::Collection(_) => "CollectionError",
            Error::Render(_) => "RenderError",
            Error::Storage(_) => "StorageError",
            Error::Cancelled => "Cancelled",
            Error::Process(_) => "ProcessError",
            Error::Io(_) => "IoError",
        }
    }

    /// Taxonomy-prefixed rendering for progress payloads, e.g.
    /// `CollectionError: dtrace exited with 1`.
    pub fn classified(&self) -> String {
        match self {
            Error::Cancelled => self.code().to_string(),
            Error::DuplicateSession(m)
            | Error::NotFound(m)
            | Error::BadRequest(m)
            | Error::Collection(m)
            | Error::Render(m)
            | Error::Storage(m)
            | Error::Process(m) => format!("{}: {}", self.code(), m),
            Error::Io(e) => format!("{}: {}", self.code(), e),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_match_taxonomy() {
        assert_eq!(Error::Collection("dtrace: no probe".into()).code(), "CollectionError");
        assert_eq!(Error::Render("empty input".into()).code(), "RenderError");
        assert_eq!(Error::Cancelled.code(), "Cancelled");
        assert_eq!(Error::NotFound("task x".into()).code(), "NotFound");
    }

    #[test]
    fn test_display_carries_detail() {
        let err = Error::Collection("invalid probe specifier".into());
        assert!(err.to_string().contains("invalid probe specifier"));
    }
}
