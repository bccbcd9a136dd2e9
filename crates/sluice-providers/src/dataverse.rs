//! Dataverse provider.
//!
//! One provider instance exposes one dataset at one version. The dataset is
//! the provider root; its files are addressed as `/{file id}`. Uploads go
//! through the native API and always land in the draft version, deletes go
//! through the SWORD edit-media endpoint.

use crate::error::{check, transport, Operation};
use crate::session::{Authenticator, Session, SessionCache, SessionHandle};
use crate::{Download, DownloadOptions, DownloadStream, Provider, UploadOptions, UrlOptions};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use serde::Deserialize;
use sluice_core::metadata::{DataverseDatasetMetadata, DataverseDatasetVersion, DataverseFileMetadata};
use sluice_core::{ByteStream, Metadata, ProviderPath, Result, StorageError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

const API_KEY_HEADER: &str = "X-Dataverse-key";

/// Dataverse provider configuration
#[derive(Clone, Debug)]
pub struct DataverseConfig {
    /// Installation base URL, e.g. `https://dataverse.harvard.edu`
    pub host: String,
    /// Persistent id of the dataset, e.g. `doi:10.5072/FK2/ABCDEF`
    pub doi: String,
    /// Display name of the dataset
    pub name: String,
    /// `latest`, `draft`, `latest-published` or an explicit version number
    pub version: String,
    /// Deadline for API calls other than datafile transfers, which only
    /// use it as a connect timeout
    pub timeout: Duration,
}

impl DataverseConfig {
    pub fn new(host: impl Into<String>, doi: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            doi: doi.into(),
            name: String::new(),
            version: "latest".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    fn version_segment(&self) -> &str {
        match self.version.as_str() {
            "latest" => ":latest",
            "draft" => ":draft",
            "latest-published" => ":latest-published",
            other => other,
        }
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Dataverse storage provider
pub struct DataverseProvider {
    client: Client,
    api_token: String,
    config: DataverseConfig,
    session: SessionHandle,
}

impl DataverseProvider {
    pub fn new(
        api_token: impl Into<String>,
        config: DataverseConfig,
        sessions: Arc<SessionCache>,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| StorageError::Http(format!("failed to build HTTP client: {e}")))?;
        let identity = format!("dataverse:{}:{}", config.host.trim_end_matches('/'), config.doi);

        Ok(Self {
            client,
            api_token: api_token.into(),
            config,
            session: SessionHandle::new(sessions, identity),
        })
    }

    fn url(&self, session: &Session, path: &str) -> String {
        format!("{}{}", session.endpoint.trim_end_matches('/'), path)
    }

    /// File id addressed by `path`
    fn file_id<'a>(&self, path: &'a ProviderPath) -> Result<&'a str> {
        if path.is_dir() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        Ok(path.name())
    }

    async fn dataset(&self) -> Result<DataverseDatasetMetadata> {
        let root = ProviderPath::root();
        let version: DataverseDatasetVersion = self
            .session
            .call(self, |session| {
                let root = &root;
                async move {
                    let url = self.url(
                        &session,
                        &format!(
                            "/api/datasets/:persistentId/versions/{}",
                            self.config.version_segment()
                        ),
                    );
                    let response = self
                        .client
                        .get(url)
                        .header(API_KEY_HEADER, &session.token)
                        .query(&[("persistentId", self.config.doi.as_str())])
                        .timeout(self.config.timeout)
                        .send()
                        .await
                        .map_err(transport)?;
                    let response = check(response, Operation::Metadata, root).await?;
                    let envelope: Envelope<DataverseDatasetVersion> = response.json().await.map_err(|e| {
                        StorageError::Serialization(format!("invalid dataset version: {e}"))
                    })?;
                    Ok(envelope.data)
                }
            })
            .await?;

        Ok(DataverseDatasetMetadata::new(
            version,
            self.config.name.clone(),
            self.config.doi.clone(),
            self.config.version.clone(),
        ))
    }

    async fn file(&self, path: &ProviderPath) -> Result<Metadata> {
        let id = self.file_id(path)?;
        let dataset = Metadata::DataverseDataset(self.dataset().await?);
        dataset
            .entries()
            .iter()
            .find(|entry| entry.as_file().is_some_and(|f| f.file_id() == id))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }
}

#[async_trait]
impl Authenticator for DataverseProvider {
    #[instrument(skip(self), fields(host = %self.config.host))]
    async fn handshake(&self) -> Result<Session> {
        let response = self
            .client
            .get(format!("{}/api/users/:me", self.config.host.trim_end_matches('/')))
            .header(API_KEY_HEADER, &self.api_token)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| StorageError::Auth(format!("dataverse unreachable: {e}")))?;

        match response.status() {
            s if s.is_success() => Ok(Session::new(self.api_token.clone(), self.config.host.clone())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(StorageError::Auth("dataverse rejected API token".into()))
            }
            s => Err(StorageError::Auth(format!("dataverse token check failed ({s})"))),
        }
    }
}

#[async_trait]
impl Provider for DataverseProvider {
    fn name(&self) -> &'static str {
        "dataverse"
    }

    async fn authenticate(&self) -> Result<Arc<Session>> {
        self.session.session(self).await
    }

    /// Dataverse cannot sign URLs, so content is streamed regardless of `accept_url`
    #[instrument(skip(self, options), fields(provider = "dataverse", path = %path))]
    async fn download(&self, path: &ProviderPath, options: &DownloadOptions) -> Result<Download> {
        let id = self.file_id(path)?;
        if options.accept_url {
            debug!("direct URLs unsupported, streaming instead");
        }

        let response = self
            .session
            .call(self, |session| async move {
                let response = self
                    .client
                    .get(self.url(&session, &format!("/api/access/datafile/{id}")))
                    .header(API_KEY_HEADER, &session.token)
                    .send()
                    .await
                    .map_err(transport)?;
                check(response, Operation::Download, path).await
            })
            .await?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let header = |name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let size = header(CONTENT_LENGTH).and_then(|v| v.parse().ok());
        let content_type = header(CONTENT_TYPE);
        let body: ByteStream = Box::pin(response.bytes_stream().map_err(|e| {
            StorageError::Download {
                status: None,
                message: format!("backend stream failed: {e}"),
            }
        }));

        Ok(Download::Stream(DownloadStream {
            body,
            size,
            content_type,
            headers,
            status,
        }))
    }

    #[instrument(skip(self, stream, options), fields(provider = "dataverse", path = %path))]
    async fn upload(
        &self,
        stream: ByteStream,
        path: &ProviderPath,
        options: &UploadOptions,
    ) -> Result<(Metadata, bool)> {
        if path.is_dir() {
            return Err(StorageError::Validation(format!(
                "cannot upload to folder path {path}"
            )));
        }

        let session = self.session.session(self).await?;
        let body = Body::wrap_stream(stream);
        let mut part = match options.content_length {
            Some(length) => Part::stream_with_length(body, length),
            None => Part::stream(body),
        }
        .file_name(path.name().to_string());
        if let Some(content_type) = &options.content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| StorageError::Validation(format!("invalid content type: {e}")))?;
        }
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(self.url(&session, "/api/datasets/:persistentId/add"))
            .header(API_KEY_HEADER, &session.token)
            .query(&[("persistentId", self.config.doi.as_str())])
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        let response = check(response, Operation::Upload, path).await?;

        let added: Envelope<DataverseDatasetVersion> = response
            .json()
            .await
            .map_err(|e| StorageError::Serialization(format!("invalid upload response: {e}")))?;
        let entry = added.data.files.into_iter().next().ok_or_else(|| StorageError::Upload {
            status: None,
            message: "dataverse accepted the upload but returned no file".into(),
        })?;

        let mut file = entry.data_file;
        if file.name.is_none() {
            file.name = entry.label;
        }
        // New files always land in the draft version
        let metadata = Metadata::DataverseFile(DataverseFileMetadata::new(file, "draft"));
        Ok((metadata, true))
    }

    #[instrument(skip(self), fields(provider = "dataverse", path = %path))]
    async fn delete(&self, path: &ProviderPath) -> Result<()> {
        let id = self.file_id(path)?;
        let metadata = self.file(path).await?;
        if !metadata.can_delete() {
            return Err(StorageError::Conflict(format!(
                "file {id} belongs to a published version and cannot be deleted"
            )));
        }

        self.session
            .call(self, |session| async move {
                let response = self
                    .client
                    .delete(self.url(
                        &session,
                        &format!("/dvn/api/data-deposit/v1.1/swordv2/edit-media/file/{id}"),
                    ))
                    .basic_auth(&session.token, None::<&str>)
                    .timeout(self.config.timeout)
                    .send()
                    .await
                    .map_err(transport)?;
                check(response, Operation::Delete, path).await.map(|_| ())
            })
            .await
    }

    async fn generate_url(&self, _path: &ProviderPath, _options: &UrlOptions) -> Result<String> {
        Err(StorageError::Conflict("dataverse does not issue signed URLs".into()))
    }

    #[instrument(skip(self), fields(provider = "dataverse", path = %path))]
    async fn metadata(&self, path: &ProviderPath) -> Result<Metadata> {
        if path.is_root() {
            return Ok(Metadata::DataverseDataset(self.dataset().await?));
        }
        self.file(path).await
    }
}
