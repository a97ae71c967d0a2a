use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use upq_core::UploadClient;
use url::Url;

use crate::connectivity::{Connectivity, NetworkStatus, ProbeTarget, probe_once, spawn_probe};
use crate::notify::Notifier;
use crate::queue::store::default_data_dir;
use crate::queue::{FlushReport, QueueManager, StoreSlot};
use crate::session::Session;
use crate::shell_cache::AppShellCache;
use crate::sync::{RetryPolicy, SYNC_TAG, SyncRegistry, SyncScheduler};
use crate::worker::{BackgroundWorker, WorkerEvent, WorkerResponse};

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_PROBE_SECS: u64 = 5;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 1500;
const DEFAULT_SYNC_MAX_ATTEMPTS: u64 = 5;
const DEFAULT_SYNC_BACKOFF_MS: u64 = 250;
const DEFAULT_SYNC_BACKOFF_MAX_SECS: u64 = 60;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub server_url: Url,
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub sync_max_attempts: u32,
    pub sync_backoff: Duration,
    pub sync_backoff_max: Duration,
    pub log_level: String,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let server_url =
            std::env::var("UPQ_SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
        let server_url = Url::parse(&server_url)
            .with_context(|| format!("UPQ_SERVER_URL is not a valid url: {server_url}"))?;
        let data_dir = match std::env::var("UPQ_DATA_DIR") {
            Ok(value) => expand_with_home(&value, &home),
            Err(_) => default_data_dir().context("data directory is unavailable")?,
        };
        let cache_dir = std::env::var("UPQ_CACHE_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(default_cache_root);
        let probe_interval =
            Duration::from_secs(read_u64_env("UPQ_PROBE_SECS", DEFAULT_PROBE_SECS));
        let probe_timeout = Duration::from_millis(read_u64_env(
            "UPQ_PROBE_TIMEOUT_MS",
            DEFAULT_PROBE_TIMEOUT_MS,
        ));
        let sync_max_attempts = read_u64_env("UPQ_SYNC_MAX_ATTEMPTS", DEFAULT_SYNC_MAX_ATTEMPTS)
            .min(u64::from(u32::MAX)) as u32;
        let sync_backoff =
            Duration::from_millis(read_u64_env("UPQ_SYNC_BACKOFF_MS", DEFAULT_SYNC_BACKOFF_MS));
        let sync_backoff_max = Duration::from_secs(read_u64_env(
            "UPQ_SYNC_BACKOFF_MAX_SECS",
            DEFAULT_SYNC_BACKOFF_MAX_SECS,
        ));
        let log_level = std::env::var("UPQ_LOG").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());

        Ok(Self {
            server_url,
            data_dir,
            cache_dir,
            probe_interval,
            probe_timeout,
            sync_max_attempts,
            sync_backoff,
            sync_backoff_max,
            log_level,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.sync_backoff,
            self.sync_backoff_max,
            true,
            self.sync_max_attempts,
        )
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    manager: QueueManager,
    registry: SyncRegistry,
    connectivity: Connectivity,
    worker: Arc<BackgroundWorker>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.cache_dir)
            .await
            .with_context(|| format!("failed to create cache dir at {:?}", config.cache_dir))?;

        let slot = StoreSlot::in_dir(&config.data_dir);
        let store = slot
            .get()
            .await
            .with_context(|| format!("failed to open upload queue at {:?}", slot.db_path()))?
            .clone();
        let registry = SyncRegistry::new(store.pool().clone());
        let client = UploadClient::with_base_url(config.server_url.as_str())
            .context("invalid server url")?;

        let initial = match ProbeTarget::from_url(&config.server_url) {
            Some(target) => probe_once(&target, config.probe_timeout).await,
            None => NetworkStatus::Offline,
        };
        let connectivity = Connectivity::new(initial);
        let notifier = Notifier::default();
        let manager = QueueManager::new(
            store,
            client.clone(),
            registry.clone(),
            notifier,
            connectivity.clone(),
        );
        let shell = AppShellCache::new(&config.cache_dir, client);
        let worker = Arc::new(BackgroundWorker::new(manager.clone(), shell));

        Ok(Self {
            config,
            manager,
            registry,
            connectivity,
            worker,
        })
    }

    pub fn manager(&self) -> &QueueManager {
        &self.manager
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Installs and activates the app shell, then makes sure a non-empty queue
    /// has a pending sync registration.
    pub async fn prepare(&self) -> anyhow::Result<()> {
        for event in [WorkerEvent::Install, WorkerEvent::Activate] {
            match self.worker.handle(event.clone()).await {
                Ok(response) => tracing::debug!(?event, ?response, "lifecycle event handled"),
                Err(err) => tracing::warn!(?event, error = %err, "lifecycle event failed"),
            }
        }

        let queued = self
            .manager
            .store()
            .len()
            .await
            .context("failed to read upload queue")?;
        if queued > 0 {
            self.registry
                .register(SYNC_TAG)
                .await
                .context("failed to register queue sync")?;
            tracing::info!(queued, "pending uploads found, sync registered");
        }
        Ok(())
    }

    fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        match ProbeTarget::from_url(&self.config.server_url) {
            Some(target) => handles.push(spawn_probe(
                self.connectivity.clone(),
                target,
                self.config.probe_interval,
                self.config.probe_timeout,
            )),
            None => tracing::warn!(url = %self.config.server_url, "server url has no host, connectivity probe disabled"),
        }
        let scheduler = SyncScheduler::new(
            self.registry.clone(),
            self.connectivity.clone(),
            Arc::clone(&self.worker),
            self.config.retry_policy(),
        );
        handles.push(tokio::spawn(scheduler.run()));
        handles
    }

    /// Background host only: prints every queue event as a JSON line.
    pub async fn run_headless(self) -> anyhow::Result<()> {
        self.prepare().await?;
        tracing::info!(
            server = %self.config.server_url,
            data_dir = %self.config.data_dir.display(),
            network = self.connectivity.status().label(),
            "upqd started in headless mode"
        );
        let handles = self.spawn_background();
        let mut events = self.manager.notifier().subscribe();
        let mut stdout = tokio::io::stdout();

        let result = loop {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    break res.context("failed waiting for shutdown signal");
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        let line = event_line(&event)?;
                        stdout.write_all(line.as_bytes()).await?;
                        stdout.flush().await?;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "dropped queue events");
                    }
                    Err(RecvError::Closed) => break Ok(()),
                },
            }
        };

        for handle in handles {
            handle.abort();
        }
        result
    }

    /// Background host plus a terminal session reading commands from stdin.
    pub async fn run_interactive(self) -> anyhow::Result<()> {
        self.prepare().await?;
        let handles = self.spawn_background();
        let mut events = self.manager.notifier().subscribe();
        let mut network = self.connectivity.subscribe();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        let mut session = Session::new(self.manager.clone(), self.connectivity.status());
        session.load().await;
        print_screen(&mut stdout, &session.render()).await?;

        let result: anyhow::Result<()> = loop {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    break res.context("failed waiting for shutdown signal");
                }
                line = lines.next_line() => {
                    let Some(line) = line.context("failed to read stdin")? else {
                        break Ok(());
                    };
                    match parse_session_command(&line) {
                        Ok(SessionCommand::Quit) => break Ok(()),
                        Ok(SessionCommand::Help) => {
                            print_screen(&mut stdout, SESSION_HELP).await?;
                            continue;
                        }
                        Ok(SessionCommand::Empty) => continue,
                        Ok(SessionCommand::Submit(path)) => session.submit(&path).await,
                        Ok(SessionCommand::Refresh) => session.refresh_server_files().await,
                        Ok(SessionCommand::Status) => session.reload_queue().await,
                        Ok(SessionCommand::Flush) => {
                            if let Err(err) = self.registry.register(SYNC_TAG).await {
                                tracing::warn!(error = %err, "failed to request sync");
                            }
                        }
                        Err(message) => {
                            print_screen(&mut stdout, &format!("{message}\n{SESSION_HELP}")).await?;
                            continue;
                        }
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => session.handle_event(&event).await,
                    Err(RecvError::Lagged(_)) => session.resync().await,
                    Err(RecvError::Closed) => break Ok(()),
                },
                changed = network.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                    let status = *network.borrow_and_update();
                    if !session.set_network(status) {
                        continue;
                    }
                }
            }
            print_screen(&mut stdout, &session.render()).await?;
        };

        for handle in handles {
            handle.abort();
        }
        result
    }

    /// One flush invocation, as the host would run it, then exit.
    pub async fn flush_once(&self) -> anyhow::Result<FlushReport> {
        let report = self.manager.flush().await.context("flush failed")?;
        if report.is_clean() && self.manager.store().is_empty().await? {
            self.registry
                .unregister(SYNC_TAG)
                .await
                .context("failed to clear sync registration")?;
        }
        Ok(report)
    }

    pub async fn fetch(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        match self
            .worker
            .handle(WorkerEvent::Fetch {
                path: path.to_string(),
            })
            .await
            .with_context(|| format!("failed to fetch {path}"))?
        {
            WorkerResponse::Resource(resource) => {
                tracing::debug!(path, source = ?resource.source, "resource served");
                Ok(resource.body)
            }
            other => anyhow::bail!("unexpected worker response: {other:?}"),
        }
    }
}

async fn print_screen(stdout: &mut tokio::io::Stdout, text: &str) -> anyhow::Result<()> {
    stdout.write_all(text.as_bytes()).await?;
    if !text.ends_with('\n') {
        stdout.write_all(b"\n").await?;
    }
    stdout.flush().await?;
    Ok(())
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
