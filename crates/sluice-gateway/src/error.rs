//! Error types and gateway error codes

use crate::middleware::current_request_id;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sluice_core::StorageError;
use thiserror::Error;

/// Client-visible error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidArgument,
    InvalidPath,
    UnsupportedOperation,
    UploadAborted,
    NotFound,
    NoSuchProvider,
    BackendAuthFailed,
    BackendError,
    InternalError,
}

impl ErrorCode {
    /// Get the error code string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::InvalidPath => "InvalidPath",
            Self::UnsupportedOperation => "UnsupportedOperation",
            Self::UploadAborted => "UploadAborted",
            Self::NotFound => "NotFound",
            Self::NoSuchProvider => "NoSuchProvider",
            Self::BackendAuthFailed => "BackendAuthFailed",
            Self::BackendError => "BackendError",
            Self::InternalError => "InternalError",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument
            | Self::InvalidPath
            | Self::UnsupportedOperation
            | Self::UploadAborted => StatusCode::BAD_REQUEST,
            Self::NotFound | Self::NoSuchProvider => StatusCode::NOT_FOUND,
            Self::BackendAuthFailed | Self::BackendError => StatusCode::BAD_GATEWAY,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&StorageError> for ErrorCode {
    fn from(err: &StorageError) -> Self {
        match err {
            StorageError::Validation(_) => Self::InvalidPath,
            StorageError::Conflict(_) => Self::UnsupportedOperation,
            StorageError::Aborted(_) => Self::UploadAborted,
            StorageError::NotFound(_) => Self::NotFound,
            StorageError::Auth(_) => Self::BackendAuthFailed,
            StorageError::Download { .. }
            | StorageError::Upload { .. }
            | StorageError::Delete { .. }
            | StorageError::Metadata { .. }
            | StorageError::Http(_) => Self::BackendError,
            StorageError::Serialization(_) => Self::InternalError,
        }
    }
}

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{message}")]
    Api {
        code: ErrorCode,
        message: String,
        resource: Option<String>,
    },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource: Option<&'a str>,
    request_id: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            message: message.into(),
            resource: None,
        }
    }

    /// Create with resource
    pub fn with_resource(
        code: ErrorCode,
        message: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self::Api {
            code,
            message: message.into(),
            resource: Some(resource.into()),
        }
    }

    /// Get the error code
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Api { code, .. } => *code,
            Self::Internal(_) => ErrorCode::InternalError,
            Self::Storage(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.error_code();
        let status = code.status_code();
        let request_id = current_request_id();

        match &self {
            Self::Storage(e) if e.is_upstream() => tracing::warn!(
                code = code.as_str(),
                backend_status = ?e.backend_status(),
                error = %e,
                "backend call failed"
            ),
            _ if status.is_server_error() => {
                tracing::error!(code = code.as_str(), error = %self, "request failed")
            }
            _ => tracing::debug!(code = code.as_str(), error = %self, "request rejected"),
        }

        let resource = match &self {
            Self::Api { resource, .. } => resource.as_deref(),
            _ => None,
        };
        let body = ErrorBody {
            code: code.as_str(),
            message: self.to_string(),
            resource,
            request_id: request_id.clone(),
        };

        (status, [("x-request-id", request_id.as_str())], Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(StorageError::Validation("..".into()), StatusCode::BAD_REQUEST)]
    #[case(StorageError::Conflict("folder".into()), StatusCode::BAD_REQUEST)]
    #[case(StorageError::Aborted("gone".into()), StatusCode::BAD_REQUEST)]
    #[case(StorageError::NotFound("/x".into()), StatusCode::NOT_FOUND)]
    #[case(StorageError::Auth("bad key".into()), StatusCode::BAD_GATEWAY)]
    #[case(StorageError::Download { status: Some(503), message: "down".into() }, StatusCode::BAD_GATEWAY)]
    #[case(StorageError::Upload { status: Some(413), message: "big".into() }, StatusCode::BAD_GATEWAY)]
    #[case(StorageError::Delete { status: None, message: "no".into() }, StatusCode::BAD_GATEWAY)]
    #[case(StorageError::Http("reset".into()), StatusCode::BAD_GATEWAY)]
    #[case(StorageError::Serialization("eof".into()), StatusCode::INTERNAL_SERVER_ERROR)]
    fn test_storage_error_status(#[case] err: StorageError, #[case] expected: StatusCode) {
        assert_eq!(ApiError::from(err).error_code().status_code(), expected);
    }

    #[tokio::test]
    async fn test_error_body_carries_backend_message() {
        let response = ApiError::from(StorageError::Download {
            status: Some(503),
            message: "maintenance window".into(),
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(response.headers().contains_key("x-request-id"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "BackendError");
        assert!(json["message"].as_str().unwrap().contains("maintenance window"));
        assert!(json.get("resource").is_none());
    }
}
