//! Download, upload and delete handlers.
//!
//! Each request walks `prepare → stream setup → body transfer → finalize →
//! notify → respond`. Uploads run the provider concurrently with the inbound
//! body; downloads pump the backend stream into the response one chunk at a
//! time.

use crate::error::{ApiError, ErrorCode};
use crate::hooks::{HookAction, HookEvent};
use crate::AppState;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use sluice_core::{pipe, pump, ByteStream, ChunkSink, ProviderPath, StorageError};
use sluice_providers::{Download, DownloadOptions, UploadOptions};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Query parameters accepted by a download
#[derive(Debug, Default, Deserialize)]
pub struct DownloadParams {
    pub accept_url: Option<String>,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
}

/// Parse `accept_url`; absent means `true`, matching is case-insensitive
pub fn parse_accept_url(value: Option<&str>) -> Result<bool, ApiError> {
    match value.map(str::to_ascii_lowercase).as_deref() {
        None | Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(other) => Err(ApiError::new(
            ErrorCode::InvalidArgument,
            format!("accept_url must be \"true\" or \"false\", got {other:?}"),
        )),
    }
}

/// `Content-Disposition` for a download.
///
/// Precedence: the `displayName` override, then the backend's own header,
/// then the final segment of the requested path.
pub fn content_disposition(
    display_name: Option<&str>,
    backend: Option<&str>,
    path: &ProviderPath,
) -> String {
    if let Some(name) = display_name.filter(|n| !n.is_empty()) {
        return attachment(name);
    }
    if let Some(header) = backend.filter(|h| !h.trim().is_empty()) {
        return header.to_string();
    }
    attachment(path.name())
}

fn attachment(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(name)
    )
}

/// Outbound side of a download: a one-slot channel feeding the response body
struct ResponseSink {
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
}

#[async_trait]
impl ChunkSink for ResponseSink {
    async fn write(&mut self, chunk: Bytes) -> sluice_core::Result<()> {
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| StorageError::Aborted("client disconnected".to_string()))
    }

    async fn flush(&mut self) -> sluice_core::Result<()> {
        // The slot frees once the body has taken the chunk
        self.tx
            .reserve()
            .await
            .map(drop)
            .map_err(|_| StorageError::Aborted("client disconnected".to_string()))
    }
}

fn response_body(source: ByteStream, chunk_size: usize, path: ProviderPath) -> Body {
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let mut sink = ResponseSink { tx };
        match pump(source, &mut sink, chunk_size).await {
            Ok(bytes) => debug!(path = %path, bytes, "download complete"),
            Err(StorageError::Aborted(reason)) => {
                info!(path = %path, %reason, "download stopped early")
            }
            Err(e) => {
                warn!(path = %path, error = %e, "download failed mid-stream");
                let _ = sink.tx.send(Err(std::io::Error::other(e.to_string()))).await;
            }
        }
    });

    Body::from_stream(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

/// GET - stream a file, or redirect to a signed URL
pub async fn get_file(
    state: Arc<AppState>,
    provider_name: String,
    path: ProviderPath,
    params: DownloadParams,
) -> Result<Response, ApiError> {
    let accept_url = parse_accept_url(params.accept_url.as_deref())?;
    let provider = state.provider(&provider_name)?;

    match provider.download(&path, &DownloadOptions { accept_url }).await? {
        Download::Redirect(url) => {
            debug!(provider = %provider_name, path = %path, "redirecting to signed URL");
            Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response())
        }
        Download::Stream(stream) => {
            let disposition = content_disposition(
                params.display_name.as_deref(),
                stream
                    .headers
                    .get(header::CONTENT_DISPOSITION)
                    .and_then(|v| v.to_str().ok()),
                &path,
            );
            let content_type = stream
                .content_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string());

            let mut builder = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_DISPOSITION, disposition);
            if let Some(size) = stream.size {
                builder = builder.header(header::CONTENT_LENGTH, size);
            }

            let body = response_body(stream.body, state.config.chunk_size, path);
            builder
                .body(body)
                .map_err(|e| ApiError::Internal(format!("failed to build response: {e}")))
        }
    }
}

fn upload_options(headers: &HeaderMap) -> UploadOptions {
    let value = |name| headers.get(name).and_then(|v: &HeaderValue| v.to_str().ok());
    UploadOptions {
        content_type: value(header::CONTENT_TYPE).map(str::to_string),
        content_length: value(header::CONTENT_LENGTH).and_then(|v| v.parse().ok()),
    }
}

/// PUT - stream the request body into the provider
pub async fn put_file(
    state: Arc<AppState>,
    provider_name: String,
    path: ProviderPath,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    // Prepare
    let provider = Arc::clone(state.provider(&provider_name)?);
    if path.is_dir() {
        return Err(ApiError::with_resource(
            ErrorCode::InvalidPath,
            "cannot upload to a folder path",
            path.as_str(),
        ));
    }
    let options = upload_options(&headers);

    // Stream setup: the provider starts before the first body byte arrives
    let (mut writer, reader) = pipe(state.config.pipe_capacity, state.config.upload_idle_timeout());
    let upload = {
        let path = path.clone();
        tokio::spawn(async move { provider.upload(reader.into_stream(), &path, &options).await })
    };

    // Body transfer
    let mut inbound = body.into_data_stream();
    while let Some(frame) = inbound.next().await {
        match frame {
            Ok(chunk) => {
                if writer.feed_data(chunk).await.is_err() {
                    // Provider stopped reading; its own result explains why
                    break;
                }
            }
            Err(e) => {
                writer.abort(format!("client disconnected: {e}")).await;
                break;
            }
        }
    }
    writer.feed_eof().await;

    // Finalize
    let (metadata, created) = upload
        .await
        .map_err(|e| ApiError::Internal(format!("upload task failed: {e}")))??;
    info!(
        provider = %provider_name,
        path = %path,
        bytes = writer.bytes_fed(),
        created,
        "upload complete"
    );

    // Notify
    let action = if created { HookAction::Create } else { HookAction::Update };
    let payload = serde_json::to_value(&metadata).unwrap_or_else(|e| {
        warn!(provider = %provider_name, path = %path, error = %e, "hook payload not serializable");
        serde_json::Value::Null
    });
    state.hooks.notify(HookEvent::new(action, provider_name, payload));

    // Respond
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(metadata)).into_response())
}

/// DELETE - remove a file; folders are refused before the provider is contacted
pub async fn delete_file(
    state: Arc<AppState>,
    provider_name: String,
    path: ProviderPath,
) -> Result<Response, ApiError> {
    if path.is_dir() {
        return Err(StorageError::Conflict(format!("deleting folders is not supported: {path}")).into());
    }
    let provider = state.provider(&provider_name)?;

    provider.delete(&path).await?;
    info!(provider = %provider_name, path = %path, "deleted");

    let payload = serde_json::json!({
        "path": path.as_str(),
        "fullPath": format!("/{provider_name}{path}"),
    });
    state.hooks.notify(HookEvent::new(HookAction::Delete, provider_name, payload));

    Ok(StatusCode::NO_CONTENT.into_response())
}
