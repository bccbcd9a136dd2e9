//! Fire-and-forget notifications for completed writes.
//!
//! Handlers place a [`HookEvent`] on a bounded queue and move on. A worker
//! task drains the queue and hands each event to a [`HookDelivery`]. A full
//! queue drops the event; delivery failures are logged and never retried.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HookAction {
    Create,
    Update,
    Delete,
}

/// One completed operation
#[derive(Clone, Debug, Serialize)]
pub struct HookEvent {
    pub action: HookAction,
    /// Mount name of the provider the operation ran against
    pub provider: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl HookEvent {
    pub fn new(action: HookAction, provider: impl Into<String>, payload: Value) -> Self {
        Self {
            action,
            provider: provider.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Transport that carries events to their receiver
#[async_trait]
pub trait HookDelivery: Send + Sync {
    async fn deliver(&self, event: &HookEvent) -> anyhow::Result<()>;
}

/// POSTs each event as JSON to a fixed URL
pub struct HttpHookDelivery {
    client: Client,
    url: String,
}

impl HttpHookDelivery {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl HookDelivery for HttpHookDelivery {
    async fn deliver(&self, event: &HookEvent) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Logs events; used when no hook URL is configured
pub struct LogHookDelivery;

#[async_trait]
impl HookDelivery for LogHookDelivery {
    async fn deliver(&self, event: &HookEvent) -> anyhow::Result<()> {
        info!(action = ?event.action, provider = %event.provider, "hook event");
        Ok(())
    }
}

/// Handle used by request handlers to enqueue events
#[derive(Clone, Debug)]
pub struct HookSender {
    tx: mpsc::Sender<HookEvent>,
}

impl HookSender {
    /// Enqueue without waiting
    pub fn notify(&self, event: HookEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(action = ?event.action, provider = %event.provider, "hook queue full, event dropped");
            }
            Err(TrySendError::Closed(event)) => {
                warn!(action = ?event.action, provider = %event.provider, "hook worker stopped, event dropped");
            }
        }
    }
}

/// Start the delivery worker. The worker exits once every sender is dropped.
pub fn spawn_hook_worker(
    delivery: Arc<dyn HookDelivery>,
    capacity: usize,
) -> (HookSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<HookEvent>(capacity.max(1));

    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match delivery.deliver(&event).await {
                Ok(()) => debug!(action = ?event.action, "hook delivered"),
                Err(e) => warn!(action = ?event.action, error = %e, "hook delivery failed"),
            }
        }
        debug!("hook worker finished");
    });

    (HookSender { tx }, handle)
}
