//! Authenticated backend sessions.
//!
//! A [`SessionCache`] holds at most one live session per credential identity.
//! Establishing or refreshing a session is single-flight: concurrent callers
//! for the same identity wait on one handshake and share its result.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use sluice_core::{Result, StorageError};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Sessions expiring within this window are treated as already expired
const EXPIRY_MARGIN_SECS: i64 = 30;

/// Token and endpoint obtained from a backend's identity handshake
#[derive(Clone)]
pub struct Session {
    pub token: String,
    /// Base URL data-plane requests go to
    pub endpoint: String,
    /// Account key used to sign time-limited URLs, when the backend has one
    pub signing_key: Option<Vec<u8>>,
    pub expires_at: Option<DateTime<Utc>>,
    generation: u64,
}

impl Session {
    pub fn new(token: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            endpoint: endpoint.into(),
            signing_key: None,
            expires_at: None,
            generation: 0,
        }
    }

    pub fn with_signing_key(mut self, key: Option<Vec<u8>>) -> Self {
        self.signing_key = key;
        self
    }

    pub fn with_expiry(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Utc::now() + ChronoDuration::seconds(EXPIRY_MARGIN_SECS) >= at,
            None => false,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("signing_key", &self.signing_key.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Backend identity handshake
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn handshake(&self) -> Result<Session>;
}

#[derive(Default)]
struct Slot {
    current: Option<Arc<Session>>,
    generation: u64,
}

/// Shared store of live sessions keyed by credential identity
#[derive(Default)]
pub struct SessionCache {
    slots: DashMap<String, Arc<Mutex<Slot>>>,
    handshakes: AtomicU64,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, identity: &str) -> Arc<Mutex<Slot>> {
        // Clone out of the map so no shard lock is held across an await
        self.slots.entry(identity.to_string()).or_default().clone()
    }

    /// Return the live session for `identity`, running `handshake` if there is none
    pub async fn get_or_authenticate<F, Fut>(&self, identity: &str, handshake: F) -> Result<Arc<Session>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Session>>,
    {
        let slot = self.slot(identity);
        let mut guard = slot.lock().await;
        if let Some(session) = &guard.current {
            if !session.is_expired() {
                return Ok(Arc::clone(session));
            }
            debug!(identity, "cached session expired");
        }
        self.establish(&mut guard, identity, handshake).await
    }

    /// Replace `stale` after the backend rejected it.
    ///
    /// When another caller already refreshed past `stale`, its session is
    /// returned without a second handshake.
    pub async fn refresh<F, Fut>(
        &self,
        identity: &str,
        stale: &Session,
        handshake: F,
    ) -> Result<Arc<Session>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Session>>,
    {
        let slot = self.slot(identity);
        let mut guard = slot.lock().await;
        if let Some(current) = &guard.current {
            if current.generation != stale.generation && !current.is_expired() {
                return Ok(Arc::clone(current));
            }
        }
        self.establish(&mut guard, identity, handshake).await
    }

    async fn establish<F, Fut>(&self, slot: &mut Slot, identity: &str, handshake: F) -> Result<Arc<Session>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Session>>,
    {
        slot.current = None;
        let attempt = self.handshakes.fetch_add(1, Ordering::Relaxed) + 1;
        info!(identity, handshakes = attempt, "authenticating with backend");

        let mut session = handshake().await?;
        slot.generation += 1;
        session.generation = slot.generation;

        let session = Arc::new(session);
        slot.current = Some(Arc::clone(&session));
        Ok(session)
    }
}

/// One provider's view of the shared cache
#[derive(Clone)]
pub struct SessionHandle {
    cache: Arc<SessionCache>,
    identity: String,
}

impl SessionHandle {
    pub fn new(cache: Arc<SessionCache>, identity: impl Into<String>) -> Self {
        Self {
            cache,
            identity: identity.into(),
        }
    }

    pub async fn session<A>(&self, auth: &A) -> Result<Arc<Session>>
    where
        A: Authenticator + ?Sized,
    {
        self.cache
            .get_or_authenticate(&self.identity, || auth.handshake())
            .await
    }

    /// Run `op` with a live session.
    ///
    /// If the backend rejects the token, the session is refreshed and `op`
    /// runs exactly once more; a second rejection is returned to the caller.
    pub async fn call<A, T, F, Fut>(&self, auth: &A, op: F) -> Result<T>
    where
        A: Authenticator + ?Sized,
        F: Fn(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let session = self.session(auth).await?;
        match op(Arc::clone(&session)).await {
            Err(StorageError::Auth(reason)) => {
                warn!(identity = %self.identity, %reason, "session rejected, re-authenticating");
                let fresh = self
                    .cache
                    .refresh(&self.identity, &session, || auth.handshake())
                    .await?;
                op(fresh).await
            }
            other => other,
        }
    }
}
