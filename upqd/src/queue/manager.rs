use std::path::Path;

use thiserror::Error;
use time::OffsetDateTime;
use upq_core::{FilePayload, UploadClient, UploadReceipt};

use super::store::{NewEntry, QueueStore, StoreError, StoreOutcome};
use crate::connectivity::{Connectivity, NetworkStatus};
use crate::notify::Notifier;
use crate::sync::{RegistryError, SYNC_TAG, SyncRegistry};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    /// Entry `id` is stored, but no sync was registered for it.
    #[error("queued entry {id} but could not schedule a sync: {source}")]
    SyncRegistration { id: i64, source: RegistryError },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueReason {
    Offline,
    SendFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Sent(UploadReceipt),
    /// `sync_registered` is false when the entry is stored but the background
    /// sync could not be scheduled yet.
    Queued {
        id: i64,
        reason: QueueReason,
        sync_registered: bool,
    },
}

/// What one flush invocation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub attempted: usize,
    pub sent: usize,
    pub rejected: usize,
    pub transport_failures: usize,
    pub store_errors: usize,
    /// Connectivity dropped during the batch and the rest was left for later.
    pub aborted: bool,
}

impl FlushReport {
    /// Nothing is left that a later flush could still deliver.
    pub fn is_clean(&self) -> bool {
        !self.aborted && self.transport_failures == 0 && self.store_errors == 0
    }
}

#[derive(Clone)]
pub struct QueueManager {
    store: QueueStore,
    client: UploadClient,
    registry: SyncRegistry,
    notifier: Notifier,
    connectivity: Connectivity,
}

impl QueueManager {
    pub fn new(
        store: QueueStore,
        client: UploadClient,
        registry: SyncRegistry,
        notifier: Notifier,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            store,
            client,
            registry,
            notifier,
            connectivity,
        }
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub fn client(&self) -> &UploadClient {
        &self.client
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub async fn submit(
        &self,
        payload: FilePayload,
        filename: &str,
        network: NetworkStatus,
    ) -> Result<SubmitOutcome, ManagerError> {
        let filename = validate_filename(filename)?;

        if network.is_online() {
            match self.client.send_file(&payload, filename).await {
                Ok(receipt) => {
                    tracing::info!(filename, "file sent directly");
                    return Ok(SubmitOutcome::Sent(receipt));
                }
                Err(err) => {
                    tracing::warn!(filename, error = %err, "direct send failed, queuing");
                    let reason = QueueReason::SendFailed(err.user_message());
                    return self.queue_for_later(payload, filename, reason).await;
                }
            }
        }

        self.queue_for_later(payload, filename, QueueReason::Offline)
            .await
    }

    async fn queue_for_later(
        &self,
        payload: FilePayload,
        filename: &str,
        reason: QueueReason,
    ) -> Result<SubmitOutcome, ManagerError> {
        let (id, sync_registered) = match self.enqueue(payload, filename).await {
            Ok(id) => (id, true),
            Err(ManagerError::SyncRegistration { id, source }) => {
                tracing::warn!(id, error = %source, "entry queued without a sync registration");
                (id, false)
            }
            Err(err) => return Err(err),
        };
        Ok(SubmitOutcome::Queued {
            id,
            reason,
            sync_registered,
        })
    }

    pub async fn submit_path(
        &self,
        path: &Path,
        network: NetworkStatus,
    ) -> Result<SubmitOutcome, ManagerError> {
        let (payload, filename) = read_payload(path).await?;
        self.submit(payload, &filename, network).await
    }

    /// Stores the file and asks the host to run a flush once the network is back.
    ///
    /// A failed registration is reported as `ManagerError::SyncRegistration`; the
    /// entry is durable by then and the host re-registers on startup when the
    /// queue is not empty.
    pub async fn enqueue(&self, payload: FilePayload, filename: &str) -> Result<i64, ManagerError> {
        let filename = validate_filename(filename)?;
        let id = self
            .store
            .insert(&NewEntry {
                payload,
                filename: filename.to_string(),
            })
            .await?;
        tracing::info!(id, filename, "file queued");

        match self.registry.register(SYNC_TAG).await {
            Ok(true) => tracing::debug!(tag = SYNC_TAG, "sync registered"),
            Ok(false) => tracing::debug!(tag = SYNC_TAG, "sync already pending"),
            Err(source) => return Err(ManagerError::SyncRegistration { id, source }),
        }
        Ok(id)
    }

    /// Sends every queued entry, oldest first, one at a time.
    pub async fn flush(&self) -> Result<FlushReport, ManagerError> {
        let entries = self.store.list_all().await?;
        let mut report = FlushReport::default();
        if entries.is_empty() {
            tracing::debug!("upload queue is empty, nothing to flush");
            return Ok(report);
        }
        tracing::info!(count = entries.len(), "flushing upload queue");

        for entry in entries {
            report.attempted += 1;
            match self.client.send_file(&entry.payload, &entry.filename).await {
                Ok(_) => {
                    report.sent += 1;
                    match self.store.delete_by_id(entry.id).await {
                        Ok(StoreOutcome::Applied) => {
                            tracing::info!(id = entry.id, filename = %entry.filename, "queued file sent");
                        }
                        Ok(StoreOutcome::NotFound) => {
                            tracing::debug!(id = entry.id, "entry already removed by another flush");
                        }
                        Err(err) => {
                            report.store_errors += 1;
                            tracing::error!(id = entry.id, error = %err, "failed to remove sent entry");
                        }
                    }
                }
                Err(err) if err.is_transport() => {
                    report.transport_failures += 1;
                    tracing::warn!(id = entry.id, filename = %entry.filename, error = %err, "network error while sending queued file");
                    if !self.connectivity.is_online() {
                        tracing::warn!("connectivity lost, stopping flush");
                        report.aborted = true;
                        break;
                    }
                }
                Err(err) => {
                    report.rejected += 1;
                    let message = err.user_message();
                    let at = OffsetDateTime::now_utc();
                    tracing::error!(id = entry.id, filename = %entry.filename, reason = %message, "server rejected queued file");
                    match self.store.annotate_error(entry.id, &message, at).await {
                        Ok(StoreOutcome::Applied) => {
                            self.notifier.item_failed(entry.id, message, at);
                        }
                        Ok(StoreOutcome::NotFound) => {
                            tracing::debug!(id = entry.id, "entry removed before it could be annotated");
                        }
                        Err(err) => {
                            report.store_errors += 1;
                            tracing::error!(id = entry.id, error = %err, "failed to record rejection");
                        }
                    }
                }
            }
        }

        tracing::info!(
            sent = report.sent,
            rejected = report.rejected,
            transport_failures = report.transport_failures,
            aborted = report.aborted,
            "finished processing upload queue"
        );
        if report.sent > 0 {
            self.notifier.drain_completed();
        }
        Ok(report)
    }
}

fn validate_filename(filename: &str) -> Result<&str, ManagerError> {
    if filename.trim().is_empty() {
        return Err(ManagerError::InvalidInput(
            "Please choose a file.".to_string(),
        ));
    }
    Ok(filename)
}

async fn read_payload(path: &Path) -> Result<(FilePayload, String), ManagerError> {
    let display = path.display().to_string();
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| ManagerError::InvalidInput(format!("Not a file: {display}")))?;
    let meta = tokio::fs::metadata(path).await.map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ManagerError::InvalidInput(format!("File not found: {display}"))
        } else {
            ManagerError::Read {
                path: display.clone(),
                source,
            }
        }
    })?;
    if !meta.is_file() {
        return Err(ManagerError::InvalidInput(format!("Not a file: {display}")));
    }
    let content = tokio::fs::read(path)
        .await
        .map_err(|source| ManagerError::Read {
            path: display,
            source,
        })?;
    Ok((FilePayload::new(filename.clone(), content), filename))
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
