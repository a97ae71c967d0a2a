use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use upq_core::{FilePayload, UploadClient};
use upq_server::config::Config;
use upqd::connectivity::{Connectivity, NetworkStatus};
use upqd::notify::{Notifier, QueueEvent};
use upqd::queue::{QueueManager, StoreSlot, SubmitOutcome};
use upqd::shell_cache::AppShellCache;
use upqd::sync::{RetryPolicy, SYNC_TAG, SyncRegistry, SyncScheduler};
use upqd::worker::BackgroundWorker;

struct Flow {
    manager: QueueManager,
    registry: SyncRegistry,
    notifier: Notifier,
    connectivity: Connectivity,
    worker: Arc<BackgroundWorker>,
    server_dir: PathBuf,
    _dir: TempDir,
}

async fn spawn_server(dir: &TempDir) -> (String, PathBuf) {
    let upload_dir = dir.path().join("uploads");
    let config = Config {
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        upload_dir: upload_dir.clone(),
        static_dir: dir.path().join("public"),
        max_upload_bytes: 1024 * 1024,
        log_level: "debug".to_string(),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = upq_server::build_app(config);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), upload_dir)
}

async fn flow(network: NetworkStatus) -> Flow {
    let dir = tempfile::tempdir().unwrap();
    let (base_url, server_dir) = spawn_server(&dir).await;
    let slot = StoreSlot::in_dir(&dir.path().join("client"));
    let store = slot.get().await.unwrap().clone();
    let registry = SyncRegistry::new(store.pool().clone());
    let notifier = Notifier::default();
    let connectivity = Connectivity::new(network);
    let client = UploadClient::with_base_url(&base_url).unwrap();
    let manager = QueueManager::new(
        store,
        client.clone(),
        registry.clone(),
        notifier.clone(),
        connectivity.clone(),
    );
    let shell = AppShellCache::new(dir.path().join("shell"), client);
    let worker = Arc::new(BackgroundWorker::new(manager.clone(), shell));
    Flow {
        manager,
        registry,
        notifier,
        connectivity,
        worker,
        server_dir,
        _dir: dir,
    }
}

#[tokio::test]
async fn online_submit_lands_on_server() {
    let f = flow(NetworkStatus::Online).await;

    let outcome = f
        .manager
        .submit(
            FilePayload::new("photo.jpg", b"jpeg".to_vec()),
            "photo.jpg",
            NetworkStatus::Online,
        )
        .await
        .unwrap();

    assert!(matches!(outcome, SubmitOutcome::Sent(_)));
    assert!(f.manager.store().is_empty().await.unwrap());
    assert_eq!(
        f.manager.client().list_files().await.unwrap(),
        vec!["photo.jpg".to_string()]
    );
}

#[tokio::test]
async fn offline_submit_is_queued_then_synced_when_connectivity_returns() {
    let f = flow(NetworkStatus::Offline).await;
    let mut events = f.notifier.subscribe();

    let outcome = f
        .manager
        .submit(
            FilePayload::new("doc.pdf", b"pdf".to_vec()),
            "doc.pdf",
            NetworkStatus::Offline,
        )
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Queued { .. }));

    let entries = f.manager.store().list_all().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].filename, "doc.pdf");
    assert!(entries[0].last_error().is_none());
    assert!(entries[0].last_attempt_at().is_none());
    assert!(f.registry.is_pending(SYNC_TAG).await.unwrap());

    let scheduler = SyncScheduler::new(
        f.registry.clone(),
        f.connectivity.clone(),
        Arc::clone(&f.worker),
        RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(50), false, 3),
    );
    let handle = tokio::spawn(scheduler.run());
    f.connectivity.set(NetworkStatus::Online);

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("drain notification should arrive")
        .unwrap();
    assert_eq!(event, QueueEvent::QueueDrainCompleted);
    assert!(f.manager.store().is_empty().await.unwrap());
    assert!(f.server_dir.join("doc.pdf").exists());
    handle.abort();
}

#[tokio::test]
async fn rejected_entry_keeps_filename_and_gains_diagnostic() {
    let f = flow(NetworkStatus::Online).await;
    let mut events = f.notifier.subscribe();
    let id = f
        .manager
        .enqueue(FilePayload::new("x.txt", b"x".to_vec()), "bad name/../x.txt")
        .await
        .unwrap();

    let report = f.manager.flush().await.unwrap();
    assert_eq!(report.rejected, 1);

    let entry = f.manager.store().get(id).await.unwrap().unwrap();
    assert_eq!(entry.filename, "bad name/../x.txt");
    assert_eq!(entry.last_error(), Some("Invalid file name."));
    assert!(entry.last_attempt_at().is_some());

    match events.recv().await.unwrap() {
        QueueEvent::ItemFailed { id: failed, message, .. } => {
            assert_eq!(failed, id);
            assert_eq!(message, "Invalid file name.");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn mixed_batch_sends_good_files_and_keeps_rejected_ones() {
    let f = flow(NetworkStatus::Online).await;
    let mut events = f.notifier.subscribe();
    for name in ["a.txt", "../evil.txt", "b.txt"] {
        f.manager
            .enqueue(FilePayload::new(name, name.as_bytes().to_vec()), name)
            .await
            .unwrap();
    }

    let report = f.manager.flush().await.unwrap();
    assert_eq!(report.sent, 2);
    assert_eq!(report.rejected, 1);

    let remaining = f.manager.store().list_all().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].filename, "../evil.txt");
    assert_eq!(
        f.manager.client().list_files().await.unwrap(),
        vec!["a.txt".to_string(), "b.txt".to_string()]
    );

    assert!(matches!(
        events.recv().await.unwrap(),
        QueueEvent::ItemFailed { .. }
    ));
    assert_eq!(events.recv().await.unwrap(), QueueEvent::QueueDrainCompleted);
}
