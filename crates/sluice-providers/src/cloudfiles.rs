//! Rackspace CloudFiles (OpenStack Swift) provider.
//!
//! Authentication goes through the Rackspace identity service, which hands
//! back a token and a service catalog; the `cloudFiles` endpoint for the
//! configured region becomes the session endpoint. The account's temp URL
//! key, when set, lets the provider issue signed URLs clients can fetch
//! without a token.

use crate::error::{check, transport, Operation};
use crate::session::{Authenticator, Session, SessionCache, SessionHandle};
use crate::{Download, DownloadOptions, DownloadStream, Provider, UploadOptions, UrlOptions};
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use reqwest::{Body, Client, Method};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sluice_core::metadata::{
    parse_timestamp, CloudFilesFileMetadata, CloudFilesFolderMetadata, CloudFilesListing,
    CloudFilesObject, CloudFilesSubdir,
};
use sluice_core::{ByteStream, Metadata, ProviderPath, Result, StorageError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Rackspace identity endpoint
pub const DEFAULT_AUTH_URL: &str = "https://identity.api.rackspacecloud.com/v2.0/tokens";

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const TEMP_URL_KEY_HEADER: &str = "X-Account-Meta-Temp-URL-Key";

type HmacSha1 = Hmac<Sha1>;

/// Account credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct CloudFilesCredentials {
    pub username: String,
    pub api_key: String,
    pub region: String,
}

impl std::fmt::Debug for CloudFilesCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudFilesCredentials")
            .field("username", &self.username)
            .field("api_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

/// CloudFiles provider configuration
#[derive(Clone, Debug)]
pub struct CloudFilesConfig {
    pub container: String,
    pub auth_url: String,
    /// Default validity of generated URLs
    pub temp_url_ttl: Duration,
    /// Deadline for control-plane calls (identity, HEAD, listing, delete).
    /// Object transfers only use it as a connect timeout.
    pub timeout: Duration,
}

impl CloudFilesConfig {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            temp_url_ttl: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = url.into();
        self
    }

    pub fn with_temp_url_ttl(mut self, ttl: Duration) -> Self {
        self.temp_url_ttl = ttl;
        self
    }
}

#[derive(Deserialize)]
struct AuthResponse {
    access: Access,
}

#[derive(Deserialize)]
struct Access {
    token: TokenInfo,
    #[serde(rename = "serviceCatalog", default)]
    service_catalog: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
struct TokenInfo {
    id: String,
    #[serde(default)]
    expires: Option<String>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    name: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Deserialize)]
struct CatalogEndpoint {
    #[serde(rename = "publicURL")]
    public_url: String,
    #[serde(default)]
    region: Option<String>,
}

fn system_clock() -> i64 {
    Utc::now().timestamp()
}

/// `HMAC-SHA1` temp URL signature over `"{method}\n{expires}\n{path}"`, hex encoded
pub fn temp_url_signature(key: &[u8], method: &str, expires: i64, path: &str) -> Result<String> {
    let mut mac = HmacSha1::new_from_slice(key)
        .map_err(|e| StorageError::Auth(format!("invalid temp URL key: {e}")))?;
    mac.update(format!("{method}\n{expires}\n{path}").as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl reqwest::header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// CloudFiles storage provider
pub struct CloudFilesProvider {
    client: Client,
    credentials: CloudFilesCredentials,
    config: CloudFilesConfig,
    session: SessionHandle,
    clock: fn() -> i64,
}

impl CloudFilesProvider {
    pub fn new(
        credentials: CloudFilesCredentials,
        config: CloudFilesConfig,
        sessions: Arc<SessionCache>,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| StorageError::Http(format!("failed to build HTTP client: {e}")))?;
        let identity = Self::identity(&credentials);

        Ok(Self {
            client,
            credentials,
            config,
            session: SessionHandle::new(sessions, identity),
            clock: system_clock,
        })
    }

    /// Replace the clock used for URL expiry (unix seconds)
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// Session cache key for a credential set
    pub fn identity(credentials: &CloudFilesCredentials) -> String {
        format!(
            "cloudfiles:{}@{}",
            credentials.username,
            credentials.region.to_lowercase()
        )
    }

    fn container_url(&self, session: &Session) -> String {
        format!(
            "{}/{}",
            session.endpoint.trim_end_matches('/'),
            urlencoding::encode(&self.config.container)
        )
    }

    fn object_url(&self, session: &Session, path: &ProviderPath) -> String {
        format!("{}/{}", self.container_url(session), encode_key(path.object_key()))
    }

    /// Signed URL for `path` valid until `expires` (unix seconds)
    pub fn generate_url_with_expiry(
        &self,
        session: &Session,
        path: &ProviderPath,
        method: &Method,
        expires: i64,
    ) -> Result<String> {
        let key = session.signing_key.as_deref().ok_or_else(|| {
            StorageError::Conflict("account has no temp URL key; signed URLs unavailable".into())
        })?;

        let endpoint = url::Url::parse(&session.endpoint)
            .map_err(|e| StorageError::Auth(format!("invalid storage endpoint: {e}")))?;
        let endpoint_path = urlencoding::decode(endpoint.path())
            .map_err(|e| StorageError::Auth(format!("invalid storage endpoint: {e}")))?;
        let signed_path = format!(
            "{}/{}/{}",
            endpoint_path.trim_end_matches('/'),
            self.config.container,
            path.object_key()
        );

        let signature = temp_url_signature(key, method.as_str(), expires, &signed_path)?;
        Ok(format!(
            "{}?temp_url_sig={}&temp_url_expires={}",
            self.object_url(session, path),
            signature,
            expires
        ))
    }

    async fn head_object(&self, session: Arc<Session>, path: &ProviderPath) -> Result<Metadata> {
        let response = self
            .client
            .head(self.object_url(&session, path))
            .header(AUTH_TOKEN_HEADER, &session.token)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(transport)?;
        let response = check(response, Operation::Metadata, path).await?;

        let headers = response.headers();
        let raw = CloudFilesObject {
            name: path.object_key().to_string(),
            bytes: header_str(headers, CONTENT_LENGTH).and_then(|v| v.parse().ok()),
            content_type: header_str(headers, CONTENT_TYPE).map(str::to_string),
            last_modified: header_str(headers, LAST_MODIFIED)
                .and_then(parse_timestamp)
                .map(|t| t.to_rfc3339()),
            hash: header_str(headers, ETAG).map(|v| v.trim_matches('"').to_string()),
        };
        Ok(Metadata::CloudFilesFile(CloudFilesFileMetadata::new(raw)))
    }

    async fn list(&self, path: &ProviderPath) -> Result<Metadata> {
        let prefix = path.object_key();
        let listing: Vec<CloudFilesListing> = self
            .session
            .call(self, |session| async move {
                let response = self
                    .client
                    .get(self.container_url(&session))
                    .header(AUTH_TOKEN_HEADER, &session.token)
                    .query(&[("format", "json"), ("delimiter", "/"), ("prefix", prefix)])
                    .timeout(self.config.timeout)
                    .send()
                    .await
                    .map_err(transport)?;
                let response = check(response, Operation::Metadata, path).await?;
                response
                    .json()
                    .await
                    .map_err(|e| StorageError::Serialization(format!("invalid container listing: {e}")))
            })
            .await?;

        // A missing pseudo-directory lists as empty
        if listing.is_empty() && !path.is_root() {
            return Err(StorageError::NotFound(path.to_string()));
        }

        let raw = CloudFilesSubdir {
            subdir: prefix.to_string(),
        };
        Ok(Metadata::CloudFilesFolder(CloudFilesFolderMetadata::new(raw, listing)))
    }
}

#[async_trait]
impl Authenticator for CloudFilesProvider {
    #[instrument(skip(self), fields(username = %self.credentials.username, region = %self.credentials.region))]
    async fn handshake(&self) -> Result<Session> {
        let body = serde_json::json!({
            "auth": {
                "RAX-KSKEY:apiKeyCredentials": {
                    "username": self.credentials.username,
                    "apiKey": self.credentials.api_key,
                }
            }
        });

        let response = self
            .client
            .post(&self.config.auth_url)
            .json(&body)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| StorageError::Auth(format!("identity service unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(StorageError::Auth(format!(
                "identity service rejected credentials ({})",
                response.status()
            )));
        }

        let auth: AuthResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Auth(format!("malformed identity response: {e}")))?;

        let endpoint = auth
            .access
            .service_catalog
            .iter()
            .filter(|entry| entry.name == "cloudFiles")
            .flat_map(|entry| entry.endpoints.iter())
            .find(|ep| {
                ep.region
                    .as_deref()
                    .is_some_and(|r| r.eq_ignore_ascii_case(&self.credentials.region))
            })
            .map(|ep| ep.public_url.clone())
            .ok_or_else(|| {
                StorageError::Auth(format!(
                    "no cloudFiles endpoint for region {}",
                    self.credentials.region
                ))
            })?;

        let account = self
            .client
            .head(&endpoint)
            .header(AUTH_TOKEN_HEADER, &auth.access.token.id)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| StorageError::Auth(format!("storage endpoint unreachable: {e}")))?;
        if !account.status().is_success() {
            return Err(StorageError::Auth(format!(
                "could not read account metadata ({})",
                account.status()
            )));
        }
        let signing_key = header_str(account.headers(), TEMP_URL_KEY_HEADER)
            .map(|key| key.as_bytes().to_vec());
        if signing_key.is_none() {
            debug!("account has no temp URL key");
        }

        let expires_at = auth.access.token.expires.as_deref().and_then(parse_timestamp);
        Ok(Session::new(auth.access.token.id, endpoint)
            .with_signing_key(signing_key)
            .with_expiry(expires_at))
    }
}

#[async_trait]
impl Provider for CloudFilesProvider {
    fn name(&self) -> &'static str {
        "cloudfiles"
    }

    async fn authenticate(&self) -> Result<Arc<Session>> {
        self.session.session(self).await
    }

    #[instrument(skip(self, options), fields(provider = "cloudfiles", path = %path, accept_url = options.accept_url))]
    async fn download(&self, path: &ProviderPath, options: &DownloadOptions) -> Result<Download> {
        if options.accept_url {
            let session = self.session.session(self).await?;
            if session.signing_key.is_some() {
                let url = self.generate_url(path, &UrlOptions::default()).await?;
                return Ok(Download::Redirect(url));
            }
            debug!("no temp URL key, streaming instead of redirecting");
        }

        let response = self
            .session
            .call(self, |session| async move {
                let response = self
                    .client
                    .get(self.object_url(&session, path))
                    .header(AUTH_TOKEN_HEADER, &session.token)
                    .send()
                    .await
                    .map_err(transport)?;
                check(response, Operation::Download, path).await
            })
            .await?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body: ByteStream = Box::pin(response.bytes_stream().map_err(|e| {
            StorageError::Download {
                status: None,
                message: format!("backend stream failed: {e}"),
            }
        }));

        Ok(Download::Stream(DownloadStream {
            body,
            size: header_str(&headers, CONTENT_LENGTH).and_then(|v| v.parse().ok()),
            content_type: header_str(&headers, CONTENT_TYPE).map(str::to_string),
            status,
            headers,
        }))
    }

    #[instrument(skip(self, stream, options), fields(provider = "cloudfiles", path = %path))]
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

        let exists = match self.session.call(self, |s| self.head_object(s, path)).await {
            Ok(_) => true,
            Err(StorageError::NotFound(_)) => false,
            Err(e) => return Err(e),
        };

        // The body stream is consumed by the request, so a rejected token
        // here cannot be retried. The existence check above keeps the session fresh.
        let session = self.session.session(self).await?;
        let mut request = self
            .client
            .put(self.object_url(&session, path))
            .header(AUTH_TOKEN_HEADER, &session.token)
            .body(Body::wrap_stream(stream));
        if let Some(content_type) = &options.content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }
        if let Some(length) = options.content_length {
            request = request.header(CONTENT_LENGTH, length);
        }

        let response = request.send().await.map_err(transport)?;
        check(response, Operation::Upload, path).await?;
        debug!(created = !exists, "upload stored");

        let metadata = self.session.call(self, |s| self.head_object(s, path)).await?;
        Ok((metadata, !exists))
    }

    #[instrument(skip(self), fields(provider = "cloudfiles", path = %path))]
    async fn delete(&self, path: &ProviderPath) -> Result<()> {
        self.session
            .call(self, |session| async move {
                let response = self
                    .client
                    .delete(self.object_url(&session, path))
                    .header(AUTH_TOKEN_HEADER, &session.token)
                    .timeout(self.config.timeout)
                    .send()
                    .await
                    .map_err(transport)?;
                check(response, Operation::Delete, path).await.map(|_| ())
            })
            .await
    }

    async fn generate_url(&self, path: &ProviderPath, options: &UrlOptions) -> Result<String> {
        let session = self.session.session(self).await?;
        let ttl = options.ttl.unwrap_or(self.config.temp_url_ttl);
        let expires = (self.clock)() + ttl.as_secs() as i64;
        self.generate_url_with_expiry(&session, path, &options.method, expires)
    }

    #[instrument(skip(self), fields(provider = "cloudfiles", path = %path))]
    async fn metadata(&self, path: &ProviderPath) -> Result<Metadata> {
        if path.is_dir() {
            self.list(path).await
        } else {
            self.session.call(self, |s| self.head_object(s, path)).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::StreamExt;
    use rstest::rstest;
    use wiremock::matchers::{body_json, header, method, path as url_path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ACCOUNT_PATH: &str = "/v1/MossoCloudFS_926294";
    const OBJECT_PATH: &str = "/v1/MossoCloudFS_926294/purple-rain/lets-go-crazy";
    const BODY: &[u8] = b"dearly-beloved";

    fn mock_time() -> i64 {
        10
    }

    fn credentials() -> CloudFilesCredentials {
        CloudFilesCredentials {
            username: "prince".into(),
            api_key: "revolutionary".into(),
            region: "iad".into(),
        }
    }

    fn auth_body(server: &MockServer) -> serde_json::Value {
        serde_json::json!({
            "access": {
                "token": {"id": "2322f6b2322f4dbfa69802baf50b0832", "expires": "2099-12-17T18:00:00Z"},
                "serviceCatalog": [
                    {"name": "cloudFilesCDN", "endpoints": [
                        {"region": "IAD", "publicURL": "https://cdn.example/v1/x"}
                    ]},
                    {"name": "cloudFiles", "endpoints": [
                        {"region": "ORD", "publicURL": "https://ord.example/v1/x"},
                        {"region": "IAD", "publicURL": format!("{}{}", server.uri(), ACCOUNT_PATH)}
                    ]}
                ]
            }
        })
    }

    async fn mount_auth(server: &MockServer, expected: u64) {
        Mock::given(method("POST"))
            .and(url_path("/v2.0/tokens"))
            .and(body_json(serde_json::json!({
                "auth": {"RAX-KSKEY:apiKeyCredentials": {"username": "prince", "apiKey": "revolutionary"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(auth_body(server)))
            .expect(expected)
            .mount(server)
            .await;
        Mock::given(method("HEAD"))
            .and(url_path(ACCOUNT_PATH))
            .respond_with(ResponseTemplate::new(204).insert_header(TEMP_URL_KEY_HEADER, "super-secret"))
            .mount(server)
            .await;
    }

    fn provider(server: &MockServer) -> CloudFilesProvider {
        let config = CloudFilesConfig::new("purple-rain")
            .with_auth_url(format!("{}/v2.0/tokens", server.uri()));
        CloudFilesProvider::new(credentials(), config, Arc::new(SessionCache::new()))
            .unwrap()
            .with_clock(mock_time)
    }

    fn object() -> ProviderPath {
        ProviderPath::parse("/lets-go-crazy").unwrap()
    }

    async fn collect(download: Download) -> Vec<u8> {
        match download {
            Download::Stream(stream) => {
                let chunks: Vec<Bytes> = stream.body.map(|c| c.unwrap()).collect().await;
                chunks.concat()
            }
            Download::Redirect(url) => panic!("expected stream, got redirect to {url}"),
        }
    }

    #[tokio::test]
    async fn test_handshake_selects_region_endpoint_and_key() {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;

        let session = provider(&server).authenticate().await.unwrap();

        assert_eq!(session.token, "2322f6b2322f4dbfa69802baf50b0832");
        assert_eq!(session.endpoint, format!("{}{}", server.uri(), ACCOUNT_PATH));
        assert_eq!(session.signing_key.as_deref(), Some(&b"super-secret"[..]));
        assert!(!session.is_expired());
    }

    #[tokio::test]
    async fn test_handshake_without_region_fails() {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;
        let mut creds = credentials();
        creds.region = "syd".into();
        let config = CloudFilesConfig::new("purple-rain")
            .with_auth_url(format!("{}/v2.0/tokens", server.uri()));
        let provider = CloudFilesProvider::new(creds, config, Arc::new(SessionCache::new())).unwrap();

        let err = provider.authenticate().await.unwrap_err();
        assert!(matches!(err, StorageError::Auth(msg) if msg.contains("syd")));
    }

    #[tokio::test]
    async fn test_handshake_rejected_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = provider(&server).authenticate().await.unwrap_err();
        assert!(matches!(err, StorageError::Auth(_)));
    }

    #[tokio::test]
    async fn test_download() {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;
        Mock::given(method("GET"))
            .and(url_path(OBJECT_PATH))
            .and(header(AUTH_TOKEN_HEADER, "2322f6b2322f4dbfa69802baf50b0832"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(BODY)
                    .insert_header("content-type", "text/plain"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let download = provider(&server)
            .download(&object(), &DownloadOptions::default())
            .await
            .unwrap();

        if let Download::Stream(stream) = &download {
            assert_eq!(stream.size, Some(BODY.len() as u64));
            assert_eq!(stream.content_type.as_deref(), Some("text/plain"));
        }
        assert_eq!(collect(download).await, BODY);
    }

    #[tokio::test]
    async fn test_download_accept_url_returns_generated_url() {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;
        Mock::given(method("GET"))
            .and(url_path(OBJECT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
            .expect(0)
            .mount(&server)
            .await;

        let provider = provider(&server);
        let download = provider
            .download(&object(), &DownloadOptions { accept_url: true })
            .await
            .unwrap();
        let expected = provider
            .generate_url(&object(), &UrlOptions::default())
            .await
            .unwrap();

        match download {
            Download::Redirect(url) => assert_eq!(url, expected),
            Download::Stream(_) => panic!("expected redirect"),
        }
    }

    #[tokio::test]
    async fn test_generated_url_is_fetchable_without_token() {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;

        let expires = mock_time() + 60;
        let signature = temp_url_signature(
            b"super-secret",
            "GET",
            expires,
            "/v1/MossoCloudFS_926294/purple-rain/lets-go-crazy",
        )
        .unwrap();
        Mock::given(method("GET"))
            .and(url_path(OBJECT_PATH))
            .and(query_param("temp_url_sig", signature.as_str()))
            .and(query_param("temp_url_expires", expires.to_string().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
            .expect(1)
            .mount(&server)
            .await;

        let url = provider(&server)
            .generate_url(&object(), &UrlOptions::default())
            .await
            .unwrap();
        let fetched = reqwest::get(&url).await.unwrap();

        assert_eq!(fetched.status(), 200);
        assert_eq!(fetched.bytes().await.unwrap(), BODY);
    }

    #[rstest]
    #[case(Method::GET)]
    #[case(Method::PUT)]
    #[case(Method::DELETE)]
    fn test_signature_depends_on_method(#[case] method: Method) {
        let a = temp_url_signature(b"k", method.as_str(), 70, "/v1/a/c/o").unwrap();
        let b = temp_url_signature(b"k", "HEAD", 70, "/v1/a/c/o").unwrap();
        assert_eq!(a.len(), 40);
        assert_ne!(a, b);
    }

    #[test]
    fn test_signed_path_uses_decoded_names() {
        let server_uri = "https://storage.example";
        let session = Session::new("t", format!("{server_uri}/v1/AUTH_acct"))
            .with_signing_key(Some(b"key".to_vec()));
        let config = CloudFilesConfig::new("my files");
        let provider = CloudFilesProvider::new(credentials(), config, Arc::new(SessionCache::new()))
            .unwrap();
        let path = ProviderPath::parse("/a b/c.txt").unwrap();

        let url = provider
            .generate_url_with_expiry(&session, &path, &Method::GET, 100)
            .unwrap();
        let signature = temp_url_signature(b"key", "GET", 100, "/v1/AUTH_acct/my files/a b/c.txt")
            .unwrap();

        assert_eq!(
            url,
            format!(
                "{server_uri}/v1/AUTH_acct/my%20files/a%20b/c.txt?temp_url_sig={signature}&temp_url_expires=100"
            )
        );
    }

    #[test]
    fn test_generate_url_without_key_is_conflict() {
        let session = Session::new("t", "https://storage.example/v1/AUTH_acct");
        let provider = CloudFilesProvider::new(
            credentials(),
            CloudFilesConfig::new("c"),
            Arc::new(SessionCache::new()),
        )
        .unwrap();

        let err = provider
            .generate_url_with_expiry(&session, &object(), &Method::GET, 1)
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    async fn mount_keyless_auth(server: &MockServer) {
        Mock::given(method("POST"))
            .and(url_path("/v2.0/tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(auth_body(server)))
            .mount(server)
            .await;
        Mock::given(method("HEAD"))
            .and(url_path(ACCOUNT_PATH))
            .respond_with(ResponseTemplate::new(204))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_download_without_key_streams() {
        let server = MockServer::start().await;
        mount_keyless_auth(&server).await;
        Mock::given(method("GET"))
            .and(url_path(OBJECT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
            .expect(1)
            .mount(&server)
            .await;

        let download = provider(&server)
            .download(&object(), &DownloadOptions { accept_url: true })
            .await
            .unwrap();
        assert_eq!(collect(download).await, BODY);
    }

    fn short_deadline_provider(server: &MockServer) -> CloudFilesProvider {
        let mut config = CloudFilesConfig::new("purple-rain")
            .with_auth_url(format!("{}/v2.0/tokens", server.uri()));
        config.timeout = Duration::from_millis(200);
        CloudFilesProvider::new(credentials(), config, Arc::new(SessionCache::new())).unwrap()
    }

    #[tokio::test]
    async fn test_slow_download_outlives_request_timeout() {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;
        let large = vec![b'x'; 4 * 1024 * 1024];
        Mock::given(method("GET"))
            .and(url_path(OBJECT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(large.clone()))
            .mount(&server)
            .await;

        let download = short_deadline_provider(&server)
            .download(&object(), &DownloadOptions::default())
            .await
            .unwrap();
        let Download::Stream(mut stream) = download else {
            panic!("expected stream");
        };

        // The consumer holds the body well past the control-plane deadline
        let mut received = stream.body.next().await.unwrap().unwrap().len();
        tokio::time::sleep(Duration::from_millis(500)).await;
        while let Some(chunk) = stream.body.next().await {
            received += chunk.unwrap().len();
        }
        assert_eq!(received, large.len());
    }

    #[tokio::test]
    async fn test_slow_upload_outlives_request_timeout() {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;
        mount_upload(&server, false).await;

        let slow: ByteStream = Box::pin(
            futures::stream::once(async { Ok::<_, StorageError>(Bytes::from_static(b"dearly-")) })
                .chain(futures::stream::once(async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(Bytes::from_static(b"beloved"))
                })),
        );
        let (_, created) = short_deadline_provider(&server)
            .upload(slow, &object(), &UploadOptions::default())
            .await
            .unwrap();
        assert!(created);

        let requests = server.received_requests().await.unwrap();
        let put = requests.iter().find(|r| r.method.as_str() == "PUT").unwrap();
        assert_eq!(put.body, BODY);
    }

    #[tokio::test]
    async fn test_control_plane_calls_keep_deadline() {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;
        Mock::given(method("HEAD"))
            .and(url_path(OBJECT_PATH))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(1000)))
            .mount(&server)
            .await;

        let err = short_deadline_provider(&server)
            .metadata(&object())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Http(msg) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn test_download_not_found() {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;
        Mock::given(method("GET"))
            .and(url_path(OBJECT_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = provider(&server)
            .download(&object(), &DownloadOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, StorageError::NotFound("/lets-go-crazy".into()));
    }

    #[tokio::test]
    async fn test_download_backend_error_carries_status() {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;
        Mock::given(method("GET"))
            .and(url_path(OBJECT_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .download(&object(), &DownloadOptions::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StorageError::Download {
                status: Some(503),
                message: "maintenance".into()
            }
        );
    }

    #[tokio::test]
    async fn test_expired_token_reauthenticates_and_retries_once() {
        let server = MockServer::start().await;
        mount_auth(&server, 2).await;
        Mock::given(method("GET"))
            .and(url_path(OBJECT_PATH))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path(OBJECT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
            .expect(1)
            .mount(&server)
            .await;

        let download = provider(&server)
            .download(&object(), &DownloadOptions::default())
            .await
            .unwrap();
        assert_eq!(collect(download).await, BODY);
    }

    #[tokio::test]
    async fn test_second_rejection_is_surfaced() {
        let server = MockServer::start().await;
        mount_auth(&server, 2).await;
        Mock::given(method("GET"))
            .and(url_path(OBJECT_PATH))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let err = provider(&server)
            .download(&object(), &DownloadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Auth(_)));
    }

    #[tokio::test]
    async fn test_concurrent_requests_authenticate_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/v2.0/tokens"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(auth_body(&server))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(url_path(ACCOUNT_PATH))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path(OBJECT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
            .expect(8)
            .mount(&server)
            .await;

        let provider = Arc::new(provider(&server));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let provider = Arc::clone(&provider);
                tokio::spawn(async move {
                    let download = provider
                        .download(&object(), &DownloadOptions::default())
                        .await
                        .unwrap();
                    collect(download).await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), BODY);
        }
    }

    async fn mount_upload(server: &MockServer, exists_before: bool) {
        if !exists_before {
            Mock::given(method("HEAD"))
                .and(url_path(OBJECT_PATH))
                .respond_with(ResponseTemplate::new(404))
                .up_to_n_times(1)
                .with_priority(1)
                .mount(server)
                .await;
        }
        Mock::given(method("HEAD"))
            .and(url_path(OBJECT_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(BODY)
                    .insert_header("etag", "\"44b7d5fa9c0c1f43e1e6ee1bd8c0f2a9\""),
            )
            .mount(server)
            .await;
        Mock::given(method("PUT"))
            .and(url_path(OBJECT_PATH))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(server)
            .await;
    }

    fn body_stream() -> ByteStream {
        Box::pin(futures::stream::iter(vec![
            Ok::<_, StorageError>(Bytes::from_static(b"dearly-")),
            Ok(Bytes::from_static(b"beloved")),
        ]))
    }

    #[rstest]
    #[case(false, true)]
    #[case(true, false)]
    #[tokio::test]
    async fn test_upload_reports_created(#[case] exists_before: bool, #[case] created: bool) {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;
        mount_upload(&server, exists_before).await;

        let (metadata, was_created) = provider(&server)
            .upload(body_stream(), &object(), &UploadOptions::default())
            .await
            .unwrap();

        assert_eq!(was_created, created);
        assert_eq!(metadata.path(), "/lets-go-crazy");
        assert_eq!(metadata.name(), "lets-go-crazy");

        let requests = server.received_requests().await.unwrap();
        let put = requests
            .iter()
            .find(|r| r.method.as_str() == "PUT")
            .expect("PUT was sent");
        assert_eq!(put.body, BODY);
    }

    #[tokio::test]
    async fn test_upload_to_folder_is_rejected() {
        let server = MockServer::start().await;
        let err = provider(&server)
            .upload(
                body_stream(),
                &ProviderPath::parse("/photos/").unwrap(),
                &UploadOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[rstest]
    #[case(204, None)]
    #[case(404, Some(StorageError::NotFound("/lets-go-crazy".into())))]
    #[tokio::test]
    async fn test_delete(#[case] status: u16, #[case] expected: Option<StorageError>) {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;
        Mock::given(method("DELETE"))
            .and(url_path(OBJECT_PATH))
            .respond_with(ResponseTemplate::new(status))
            .expect(1)
            .mount(&server)
            .await;

        let result = provider(&server).delete(&object()).await;
        assert_eq!(result.err(), expected);
    }

    #[tokio::test]
    async fn test_folder_metadata_lists_children() {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;
        Mock::given(method("GET"))
            .and(url_path("/v1/MossoCloudFS_926294/purple-rain"))
            .and(query_param("format", "json"))
            .and(query_param("delimiter", "/"))
            .and(query_param("prefix", "photos/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"subdir": "photos/2024/"},
                {"name": "photos/a.jpg", "bytes": 3, "content_type": "image/jpeg",
                 "last_modified": "2024-01-02T03:04:05.000000", "hash": "abc"}
            ])))
            .mount(&server)
            .await;

        let metadata = provider(&server)
            .metadata(&ProviderPath::parse("/photos/").unwrap())
            .await
            .unwrap();

        let records = metadata.serialized();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].path, "/photos/2024/");
        assert_eq!(records[1].path, "/photos/a.jpg");
        assert_eq!(records[1].size, Some(3));
    }

    #[tokio::test]
    async fn test_missing_folder_is_not_found() {
        let server = MockServer::start().await;
        mount_auth(&server, 1).await;
        Mock::given(method("GET"))
            .and(url_path("/v1/MossoCloudFS_926294/purple-rain"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let err = provider(&server)
            .metadata(&ProviderPath::parse("/nothing/").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}
