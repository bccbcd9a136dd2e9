//! In-memory provider.
//!
//! Objects live in a [`DashMap`] keyed by object key; folders are implied by
//! key prefixes. Useful for tests and for running the gateway without a
//! backend account.

use crate::session::Session;
use crate::{Download, DownloadOptions, DownloadStream, Provider, UploadOptions, UrlOptions};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use md5::{Digest, Md5};
use reqwest::header::HeaderMap;
use sluice_core::metadata::{MemoryFileMetadata, MemoryFolderMetadata, MemoryObject};
use sluice_core::{ByteStream, Metadata, ProviderPath, Result, StorageError, DEFAULT_CHUNK_SIZE};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    object: MemoryObject,
}

/// In-process storage provider
#[derive(Clone)]
pub struct MemoryProvider {
    objects: Arc<DashMap<String, StoredObject>>,
    chunk_size: usize,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(DashMap::new()),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Size of the chunks downloads are streamed in
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Raw content stored at `path`
    pub fn get(&self, path: &ProviderPath) -> Option<Bytes> {
        self.objects.get(path.object_key()).map(|o| o.data.clone())
    }

    fn file_metadata(object: &MemoryObject) -> Metadata {
        Metadata::MemoryFile(MemoryFileMetadata::new(object.clone()))
    }

    fn list(&self, path: &ProviderPath) -> Result<Metadata> {
        let prefix = path.object_key();
        let mut folders = BTreeSet::new();
        let mut files = Vec::new();

        for entry in self.objects.iter() {
            let Some(rest) = entry.key().strip_prefix(prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((folder, _)) => {
                    folders.insert(format!("{prefix}{folder}/"));
                }
                None => files.push(entry.value().object.clone()),
            }
        }

        if folders.is_empty() && files.is_empty() && !path.is_root() {
            return Err(StorageError::NotFound(path.to_string()));
        }

        files.sort_by(|a, b| a.key.cmp(&b.key));
        let entries = folders
            .into_iter()
            .map(|folder| Metadata::MemoryFolder(MemoryFolderMetadata::new(folder, Vec::new())))
            .chain(files.iter().map(Self::file_metadata))
            .collect();

        Ok(Metadata::MemoryFolder(MemoryFolderMetadata::new(prefix, entries)))
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn authenticate(&self) -> Result<Arc<Session>> {
        Ok(Arc::new(Session::new("memory", "memory://")))
    }

    #[instrument(skip(self, _options), fields(provider = "memory", path = %path))]
    async fn download(&self, path: &ProviderPath, _options: &DownloadOptions) -> Result<Download> {
        let stored = self
            .objects
            .get(path.object_key())
            .map(|o| o.value().clone())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;

        let data = stored.data;
        let chunk_size = self.chunk_size;
        let chunks = (0..data.len())
            .step_by(chunk_size)
            .map(move |start| Ok::<_, StorageError>(data.slice(start..(start + chunk_size).min(data.len()))))
            .collect::<Vec<_>>();

        Ok(Download::Stream(DownloadStream {
            body: Box::pin(futures::stream::iter(chunks)),
            size: Some(stored.object.size),
            content_type: stored.object.content_type,
            headers: HeaderMap::new(),
            status: 200,
        }))
    }

    #[instrument(skip(self, stream, options), fields(provider = "memory", path = %path))]
    async fn upload(
        &self,
        mut stream: ByteStream,
        path: &ProviderPath,
        options: &UploadOptions,
    ) -> Result<(Metadata, bool)> {
        if path.is_dir() {
            return Err(StorageError::Validation(format!(
                "cannot upload to folder path {path}"
            )));
        }

        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        let data = buffer.freeze();

        let key = path.object_key().to_string();
        let content_type = options.content_type.clone().or_else(|| {
            mime_guess::from_path(&key)
                .first()
                .map(|mime| mime.essence_str().to_string())
        });
        let object = MemoryObject {
            key: key.clone(),
            size: data.len() as u64,
            content_type,
            modified: Utc::now(),
            etag: hex::encode(Md5::digest(&data)),
        };
        let metadata = Self::file_metadata(&object);

        let previous = self.objects.insert(key, StoredObject { data, object });
        debug!(created = previous.is_none(), "stored object");
        Ok((metadata, previous.is_none()))
    }

    async fn delete(&self, path: &ProviderPath) -> Result<()> {
        self.objects
            .remove(path.object_key())
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn generate_url(&self, _path: &ProviderPath, _options: &UrlOptions) -> Result<String> {
        Err(StorageError::Conflict(
            "memory provider does not issue signed URLs".into(),
        ))
    }

    async fn metadata(&self, path: &ProviderPath) -> Result<Metadata> {
        if path.is_dir() {
            return self.list(path);
        }
        self.objects
            .get(path.object_key())
            .map(|o| Self::file_metadata(&o.object))
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn path(p: &str) -> ProviderPath {
        ProviderPath::parse(p).unwrap()
    }

    fn stream_of(chunks: &[&'static [u8]]) -> ByteStream {
        let items: Vec<Result<Bytes>> = chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
        Box::pin(futures::stream::iter(items))
    }

    async fn read_all(download: Download) -> Vec<Bytes> {
        match download {
            Download::Stream(s) => s.body.map(|c| c.unwrap()).collect().await,
            Download::Redirect(_) => panic!("memory provider never redirects"),
        }
    }

    #[tokio::test]
    async fn test_upload_created_then_updated() {
        let provider = MemoryProvider::new();

        let (meta, created) = provider
            .upload(stream_of(&[b"a", b"b", b"c"]), &path("/notes.txt"), &UploadOptions::default())
            .await
            .unwrap();
        assert!(created);
        assert_eq!(meta.size(), Some(3));
        assert_eq!(meta.content_type().as_deref(), Some("text/plain"));

        let (_, created) = provider
            .upload(stream_of(&[b"xyz"]), &path("/notes.txt"), &UploadOptions::default())
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(provider.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_upload() {
        let provider = MemoryProvider::new();
        let (meta, _) = provider
            .upload(stream_of(&[]), &path("/empty.bin"), &UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(meta.size(), Some(0));
        assert_eq!(provider.get(&path("/empty.bin")), Some(Bytes::new()));
    }

    #[tokio::test]
    async fn test_failed_stream_stores_nothing() {
        let provider = MemoryProvider::new();
        let stream: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(StorageError::Aborted("client went away".into())),
        ]));

        let err = provider
            .upload(stream, &path("/x"), &UploadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Aborted(_)));
        assert!(provider.is_empty());
    }

    #[rstest]
    #[case(1, 14)]
    #[case(5, 3)]
    #[case(64, 1)]
    #[tokio::test]
    async fn test_download_chunking(#[case] chunk_size: usize, #[case] expected_chunks: usize) {
        let provider = MemoryProvider::new().with_chunk_size(chunk_size);
        provider
            .upload(stream_of(&[b"dearly-beloved"]), &path("/song"), &UploadOptions::default())
            .await
            .unwrap();

        let chunks = read_all(
            provider
                .download(&path("/song"), &DownloadOptions::default())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(chunks.len(), expected_chunks);
        assert_eq!(chunks.concat(), b"dearly-beloved");
    }

    #[tokio::test]
    async fn test_folder_listing() {
        let provider = MemoryProvider::new();
        for key in ["/photos/a.jpg", "/photos/2024/b.jpg", "/photos/2024/c.jpg", "/readme.md"] {
            provider
                .upload(stream_of(&[b"x"]), &path(key), &UploadOptions::default())
                .await
                .unwrap();
        }

        let photos = provider.metadata(&path("/photos/")).await.unwrap();
        let paths: Vec<String> = photos.serialized().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["/photos/2024/", "/photos/a.jpg"]);

        let root = provider.metadata(&ProviderPath::root()).await.unwrap();
        assert_eq!(root.entries().len(), 2);

        let err = provider.metadata(&path("/nothing/")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_and_missing() {
        let provider = MemoryProvider::new();
        provider
            .upload(stream_of(&[b"x"]), &path("/gone"), &UploadOptions::default())
            .await
            .unwrap();

        provider.delete(&path("/gone")).await.unwrap();
        assert_eq!(
            provider.delete(&path("/gone")).await,
            Err(StorageError::NotFound("/gone".into()))
        );
        assert!(matches!(
            provider.download(&path("/gone"), &DownloadOptions::default()).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
