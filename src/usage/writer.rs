use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::UsageUpdate;
use crate::api_keys::CredentialStore;

const CHANNEL_CAPACITY: usize = 1024;

/// Cheaply cloneable handle for recording key usage.
///
/// Callers use `record()` to push updates into a bounded channel.
/// A background task drains the channel and writes to the credential store.
#[derive(Clone)]
pub struct UsageWriter {
    tx: mpsc::Sender<UsageUpdate>,
}

impl UsageWriter {
    /// Record a usage timestamp. Non-blocking: drops the update if the channel is full.
    pub fn record(&self, key_id: &str, at: DateTime<Utc>) {
        let update = UsageUpdate {
            key_id: key_id.to_string(),
            at,
        };
        if let Err(e) = self.tx.try_send(update) {
            match e {
                mpsc::error::TrySendError::Full(u) => {
                    log::warn!("Usage channel full, last_used_at dropped for key={}", u.key_id)
                }
                mpsc::error::TrySendError::Closed(u) => {
                    log::debug!("Usage writer stopped, last_used_at dropped for key={}", u.key_id)
                }
            }
        }
    }

    /// Writer plus the raw receiving end, for callers that drain updates
    /// themselves.
    pub fn channel() -> (UsageWriter, mpsc::Receiver<UsageUpdate>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (UsageWriter { tx }, rx)
    }
}

/// Create the background writer and return the UsageWriter handle.
///
/// The caller is responsible for spawning the returned future. It runs until
/// every writer handle is dropped or `shutdown` fires, flushing queued
/// updates before it exits.
pub fn create(
    store: Arc<dyn CredentialStore>,
    shutdown: CancellationToken,
) -> (UsageWriter, impl std::future::Future<Output = ()>) {
    let (writer, rx) = UsageWriter::channel();
    let future = run(rx, store, shutdown);
    (writer, future)
}

async fn run(
    mut rx: mpsc::Receiver<UsageUpdate>,
    store: Arc<dyn CredentialStore>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            update = rx.recv() => {
                match update {
                    Some(u) => apply(store.as_ref(), u).await,
                    None => break,
                }
            }
            _ = shutdown.cancelled() => {
                // Drain what is already queued, then exit
                rx.close();
                while let Some(u) = rx.recv().await {
                    apply(store.as_ref(), u).await;
                }
                break;
            }
        }
    }
    log::info!("Usage writer stopped");
}

async fn apply(store: &dyn CredentialStore, update: UsageUpdate) {
    if let Err(e) = store.touch_last_used(&update.key_id, update.at).await {
        log::error!("last_used_at update failed for key={}: {}", update.key_id, e);
    }
}
