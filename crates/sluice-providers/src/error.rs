//! Translation of backend HTTP failures into the storage error taxonomy

use reqwest::{Response, StatusCode};
use sluice_core::{ProviderPath, StorageError};
use std::error::Error as StdError;

/// Which operation a backend response belongs to
#[derive(Clone, Copy, Debug)]
pub(crate) enum Operation {
    Download,
    Upload,
    Delete,
    Metadata,
}

impl Operation {
    pub(crate) fn error(self, status: Option<u16>, message: String) -> StorageError {
        match self {
            Self::Download => StorageError::Download { status, message },
            Self::Upload => StorageError::Upload { status, message },
            Self::Delete => StorageError::Delete { status, message },
            Self::Metadata => StorageError::Metadata { status, message },
        }
    }
}

/// Map a failed request that never produced a response.
///
/// Errors raised by a streamed request body (an aborted upload pipe) are
/// carried inside reqwest's source chain and are surfaced unchanged.
pub(crate) fn transport(err: reqwest::Error) -> StorageError {
    if let Some(inner) = storage_error_source(&err) {
        return inner;
    }
    if err.is_timeout() {
        StorageError::Http(format!("backend request timed out: {err}"))
    } else if err.is_connect() {
        StorageError::Http(format!("could not connect to backend: {err}"))
    } else {
        StorageError::Http(err.to_string())
    }
}

fn storage_error_source(err: &(dyn StdError + 'static)) -> Option<StorageError> {
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(storage) = inner.downcast_ref::<StorageError>() {
            return Some(storage.clone());
        }
        source = inner.source();
    }
    None
}

/// Body text of a failed response, or the status reason when the body is empty
pub(crate) async fn backend_message(response: Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if text.trim().is_empty() {
        status.canonical_reason().unwrap_or("unknown error").to_string()
    } else {
        text
    }
}

/// Pass a successful response through, translate anything else.
///
/// 401 means the session token was rejected and is what triggers the
/// re-authenticate-and-retry-once policy.
pub(crate) async fn check(
    response: Response,
    operation: Operation,
    path: &ProviderPath,
) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::UNAUTHORIZED => Err(StorageError::Auth(format!(
            "backend rejected session token ({status})"
        ))),
        StatusCode::NOT_FOUND => Err(StorageError::NotFound(path.to_string())),
        _ => {
            let message = backend_message(response).await;
            Err(operation.error(Some(status.as_u16()), message))
        }
    }
}
