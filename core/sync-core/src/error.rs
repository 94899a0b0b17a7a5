//! Error types for measview-core operations.

use std::path::PathBuf;

use measview_protocol::ErrorInfo;

/// All errors that can occur while editing and synchronizing datasets.
///
/// Reconciliation itself never fails; ambiguous rows surface as
/// [`crate::reconcile::ReconciliationWarning`] values instead.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    // ─────────────────────────────────────────────────────────────────────
    // Editor Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("No dataset found under any of: {}", candidates.join(", "))]
    Load { candidates: Vec<String> },

    #[error("Validation errors block save: {}", keys.join(", "))]
    Validation { keys: Vec<String> },

    #[error("Field is not editable: {0}")]
    FieldNotEditable(String),

    #[error("Row index out of range: {index} (rows: {len})")]
    RowOutOfRange { index: usize, len: usize },

    #[error("Row {0} is marked for deletion")]
    RowDeleted(usize),

    #[error("Operation {operation} not allowed while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Transport Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(ErrorInfo),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration file malformed: {path}: {details}")]
    Config { path: PathBuf, details: String },
}

impl SyncError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        SyncError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        SyncError::Json {
            context: context.into(),
            source,
        }
    }
}

impl From<ErrorInfo> for SyncError {
    fn from(info: ErrorInfo) -> Self {
        SyncError::Protocol(info)
    }
}

/// Convenience type alias for Results using SyncError.
pub type Result<T> = std::result::Result<T, SyncError>;

impl From<SyncError> for String {
    fn from(err: SyncError) -> String {
        err.to_string()
    }
}
