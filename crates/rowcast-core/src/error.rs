//! Unified error types for Rowcast.

use thiserror::Error;

/// Result type alias using RowcastError.
pub type Result<T> = std::result::Result<T, RowcastError>;

#[derive(Error, Debug)]
pub enum RowcastError {
    // Transport errors (scoped to a single recipient token)
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid group invite: {0}")]
    InvalidInvite(String),

    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("Transport not ready: {0}")]
    TransportNotReady(String),

    // Record store errors
    #[error("Not found in record store: {0}")]
    StoreNotFound(String),

    #[error("Record store error: {0}")]
    Store(String),

    // Parse errors (treated as skips by the engine)
    #[error("Parse error: {0}")]
    Parse(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Recurrence errors
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Dispatch already in progress: {0}")]
    Busy(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("{0}")]
    Other(String),
}

impl RowcastError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::StoreNotFound(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// True for failures that belong to one recipient token only.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::InvalidInvite(_) | Self::InvalidDestination(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RowcastError::Transport("timeout".into());
        assert!(err.to_string().contains("timeout"));

        let err = RowcastError::StoreNotFound("sheet \"Msgs\"".into());
        assert_eq!(err.to_string(), "Not found in record store: sheet \"Msgs\"");
    }

    #[test]
    fn test_error_constructors() {
        assert!(matches!(RowcastError::transport("x"), RowcastError::Transport(_)));
        assert!(matches!(RowcastError::store("x"), RowcastError::Store(_)));
        assert!(matches!(RowcastError::not_found("x"), RowcastError::StoreNotFound(_)));
        assert!(matches!(RowcastError::config("x"), RowcastError::Config(_)));
        assert!(matches!(RowcastError::parse("x"), RowcastError::Parse(_)));
    }

    #[test]
    fn test_is_transport() {
        assert!(RowcastError::InvalidInvite("abc".into()).is_transport());
        assert!(RowcastError::InvalidDestination("abc".into()).is_transport());
        assert!(!RowcastError::store("write failed").is_transport());
        assert!(!RowcastError::TransportNotReady("qr".into()).is_transport());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RowcastError = io_err.into();
        assert!(matches!(err, RowcastError::Io(_)));
    }
}
