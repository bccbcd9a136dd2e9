//! Metadata and folder listing handler

use crate::{ApiError, AppState};
use axum::{
    response::{IntoResponse, Response},
    Json,
};
use sluice_core::ProviderPath;
use std::sync::Arc;

/// GET with `?meta`, or GET on a folder path - file metadata or folder entries
pub async fn get_metadata(
    state: Arc<AppState>,
    provider_name: String,
    path: ProviderPath,
) -> Result<Response, ApiError> {
    let provider = state.provider(&provider_name)?;
    let metadata = provider.metadata(&path).await?;
    tracing::debug!(
        provider = %provider_name,
        path = %path,
        entries = metadata.entries().len(),
        "metadata resolved"
    );
    Ok(Json(metadata).into_response())
}
