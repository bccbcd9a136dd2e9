//! Error taxonomy shared by every provider and the gateway

use thiserror::Error;

/// Result type alias using `StorageError`
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors reported by providers and the streaming pipe.
///
/// Backend-native failures are translated into one of these at the provider
/// boundary; the gateway maps each variant onto a response status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Malformed request input, raised before any backend is contacted
    #[error("invalid request: {0}")]
    Validation(String),

    /// The backend reports the path absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Credential or session acquisition/refresh failed
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Backend rejected a download
    #[error("download failed{}: {message}", status_suffix(.status))]
    Download { status: Option<u16>, message: String },

    /// Backend rejected an upload. Bytes the backend already committed are not rolled back.
    #[error("upload failed{}: {message}", status_suffix(.status))]
    Upload { status: Option<u16>, message: String },

    /// Backend rejected a delete
    #[error("delete failed{}: {message}", status_suffix(.status))]
    Delete { status: Option<u16>, message: String },

    /// Backend rejected a metadata or listing request
    #[error("metadata request failed{}: {message}", status_suffix(.status))]
    Metadata { status: Option<u16>, message: String },

    /// Operation not supported for this path or provider
    #[error("unsupported operation: {0}")]
    Conflict(String),

    /// Streaming transfer aborted before end-of-stream
    #[error("transfer aborted: {0}")]
    Aborted(String),

    /// Transport failure before a backend status was observed
    #[error("http error: {0}")]
    Http(String),

    /// Backend payload could not be decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" ({code})"),
        None => String::new(),
    }
}

impl StorageError {
    /// Backend status code carried by operational failures, if any
    pub fn backend_status(&self) -> Option<u16> {
        match self {
            Self::Download { status, .. }
            | Self::Upload { status, .. }
            | Self::Delete { status, .. }
            | Self::Metadata { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether this failure came from the backend (as opposed to the request or the pipe)
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::Auth(_)
                | Self::Download { .. }
                | Self::Upload { .. }
                | Self::Delete { .. }
                | Self::Metadata { .. }
                | Self::Http(_)
                | Self::Serialization(_)
        )
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
