use thiserror::Error;

use crate::queue::{FlushReport, ManagerError, QueueManager};
use crate::shell_cache::{AppShellCache, FetchedResource, ShellCacheError};
use crate::sync::SYNC_TAG;

/// Lifecycle events the host delivers to the background worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch { path: String },
    Sync { tag: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerResponse {
    Installed { files: usize },
    Activated { removed: Vec<String> },
    Resource(FetchedResource),
    Synced(FlushReport),
    /// The event carried a sync tag this worker does not handle.
    Ignored,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Shell(#[from] ShellCacheError),
    #[error(transparent)]
    Queue(#[from] ManagerError),
}

/// Runs independently of any open session; the scheduler and the daemon
/// hand it events and act on the response.
pub struct BackgroundWorker {
    manager: QueueManager,
    shell: AppShellCache,
}

impl BackgroundWorker {
    pub fn new(manager: QueueManager, shell: AppShellCache) -> Self {
        Self { manager, shell }
    }

    pub fn manager(&self) -> &QueueManager {
        &self.manager
    }

    pub fn shell(&self) -> &AppShellCache {
        &self.shell
    }

    pub async fn handle(&self, event: WorkerEvent) -> Result<WorkerResponse, WorkerError> {
        match event {
            WorkerEvent::Install => {
                let files = self.shell.install().await?;
                Ok(WorkerResponse::Installed { files })
            }
            WorkerEvent::Activate => {
                let removed = self.shell.activate().await?;
                Ok(WorkerResponse::Activated { removed })
            }
            WorkerEvent::Fetch { path } => {
                Ok(WorkerResponse::Resource(self.shell.fetch(&path).await?))
            }
            WorkerEvent::Sync { tag } if tag == SYNC_TAG => {
                tracing::info!(tag = %tag, "sync event received");
                Ok(WorkerResponse::Synced(self.manager.flush().await?))
            }
            WorkerEvent::Sync { tag } => {
                tracing::debug!(tag = %tag, "ignoring sync event for unknown tag");
                Ok(WorkerResponse::Ignored)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::{Connectivity, NetworkStatus};
    use crate::notify::Notifier;
    use crate::queue::QueueStore;
    use crate::sync::SyncRegistry;
    use sqlx::SqlitePool;
    use tempfile::{TempDir, tempdir};
    use upq_core::{FilePayload, UploadClient};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn make_worker(server: &MockServer) -> (BackgroundWorker, TempDir) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = QueueStore::from_pool(pool.clone());
        store.init().await.unwrap();
        let client = UploadClient::with_base_url(&server.uri()).unwrap();
        let manager = QueueManager::new(
            store,
            client.clone(),
            SyncRegistry::new(pool),
            Notifier::default(),
            Connectivity::new(NetworkStatus::Online),
        );
        let dir = tempdir().unwrap();
        let shell = AppShellCache::new(dir.path(), client);
        (BackgroundWorker::new(manager, shell), dir)
    }

    #[tokio::test]
    async fn sync_event_for_queue_tag_flushes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "filename": "a.txt",
            })))
            .expect(1)
            .mount(&server)
            .await;
        let (worker, _dir) = make_worker(&server).await;
        worker
            .manager()
            .enqueue(FilePayload::new("a.txt", b"a".to_vec()), "a.txt")
            .await
            .unwrap();

        let response = worker
            .handle(WorkerEvent::Sync {
                tag: SYNC_TAG.to_string(),
            })
            .await
            .unwrap();

        let WorkerResponse::Synced(report) = response else {
            panic!("expected a flush report");
        };
        assert_eq!(report.sent, 1);
        assert!(worker.manager().store().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn unknown_sync_tag_is_ignored() {
        let server = MockServer::start().await;
        let (worker, _dir) = make_worker(&server).await;

        let response = worker
            .handle(WorkerEvent::Sync {
                tag: "photos".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(response, WorkerResponse::Ignored);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn activate_without_cache_dir_removes_nothing() {
        let server = MockServer::start().await;
        let (worker, dir) = make_worker(&server).await;
        drop(dir);

        let response = worker.handle(WorkerEvent::Activate).await.unwrap();
        assert_eq!(response, WorkerResponse::Activated { removed: vec![] });
    }
}
