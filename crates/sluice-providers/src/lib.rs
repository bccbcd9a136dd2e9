//! # Sluice Providers
//!
//! Storage backends behind the sluice gateway.
//!
//! Every backend implements [`Provider`]: a uniform async contract for
//! download, upload, delete, URL signing and metadata. Backends share a
//! [`SessionCache`] so one credential identity authenticates once no matter
//! how many requests are in flight.
//!
//! Available providers:
//! - [`CloudFilesProvider`]: Rackspace CloudFiles / OpenStack Swift
//! - [`DataverseProvider`]: a single Dataverse dataset
//! - [`MemoryProvider`]: in-process store for tests and local runs

pub mod cloudfiles;
pub mod dataverse;
mod error;
pub mod memory;
pub mod session;

pub use cloudfiles::{CloudFilesConfig, CloudFilesCredentials, CloudFilesProvider};
pub use dataverse::{DataverseConfig, DataverseProvider};
pub use memory::MemoryProvider;
pub use session::{Authenticator, Session, SessionCache, SessionHandle};

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Method;
use sluice_core::{ByteStream, Metadata, ProviderPath, Result};
use std::sync::Arc;
use std::time::Duration;

/// Options for [`Provider::download`]
#[derive(Clone, Debug, Default)]
pub struct DownloadOptions {
    /// Prefer a direct URL over streamed content
    pub accept_url: bool,
}

/// Options for [`Provider::upload`]
#[derive(Clone, Debug, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    /// Declared body length, when the client sent one
    pub content_length: Option<u64>,
}

/// Options for [`Provider::generate_url`]
#[derive(Clone, Debug)]
pub struct UrlOptions {
    pub method: Method,
    /// Validity window; the provider's configured default when `None`
    pub ttl: Option<Duration>,
}

impl Default for UrlOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            ttl: None,
        }
    }
}

/// Streamed file content plus what the backend said about it
pub struct DownloadStream {
    pub body: ByteStream,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    /// Backend response headers (`Content-Disposition` is honoured downstream)
    pub headers: HeaderMap,
    pub status: u16,
}

impl std::fmt::Debug for DownloadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadStream")
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Result of a download: content, or a URL the client should fetch instead
#[derive(Debug)]
pub enum Download {
    Redirect(String),
    Stream(DownloadStream),
}

/// Uniform contract every storage backend implements
#[async_trait]
pub trait Provider: Send + Sync {
    /// Identifier used in request routes and hook events
    fn name(&self) -> &'static str;

    /// Establish (or reuse) the backend session
    async fn authenticate(&self) -> Result<Arc<Session>>;

    /// Fetch content, or a signed URL when `accept_url` is set and supported
    async fn download(&self, path: &ProviderPath, options: &DownloadOptions) -> Result<Download>;

    /// Consume `stream` into `path`.
    ///
    /// Returns the stored object's metadata and whether it was newly created.
    async fn upload(
        &self,
        stream: ByteStream,
        path: &ProviderPath,
        options: &UploadOptions,
    ) -> Result<(Metadata, bool)>;

    async fn delete(&self, path: &ProviderPath) -> Result<()>;

    /// Time-limited URL granting direct access to `path`
    async fn generate_url(&self, path: &ProviderPath, options: &UrlOptions) -> Result<String>;

    async fn metadata(&self, path: &ProviderPath) -> Result<Metadata>;
}
