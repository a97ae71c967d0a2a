use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Online,
    Offline,
}

impl NetworkStatus {
    pub fn is_online(self) -> bool {
        self == NetworkStatus::Online
    }

    pub fn label(self) -> &'static str {
        match self {
            NetworkStatus::Online => "Online",
            NetworkStatus::Offline => "Offline",
        }
    }
}

/// Process-wide view of whether the upload server is reachable.
#[derive(Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<NetworkStatus>>,
}

impl Connectivity {
    pub fn new(initial: NetworkStatus) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn status(&self) -> NetworkStatus {
        *self.tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.status().is_online()
    }

    /// Returns `true` when the status actually changed.
    pub fn set(&self, status: NetworkStatus) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.tx.subscribe()
    }

    pub async fn wait_online(&self) {
        let mut rx = self.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|status| status.is_online()).await;
    }
}

/// Host and port probed to decide whether the server is reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host: String,
    pub port: u16,
}

impl ProbeTarget {
    pub fn from_url(url: &Url) -> Option<Self> {
        Some(Self {
            host: url.host_str()?.to_string(),
            port: url.port_or_known_default()?,
        })
    }
}

pub async fn probe_once(target: &ProbeTarget, timeout: Duration) -> NetworkStatus {
    let connect = TcpStream::connect((target.host.as_str(), target.port));
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(_)) => NetworkStatus::Online,
        _ => NetworkStatus::Offline,
    }
}

pub fn spawn_probe(
    connectivity: Connectivity,
    target: ProbeTarget,
    interval: Duration,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let status = probe_once(&target, timeout).await;
            if connectivity.set(status) {
                tracing::info!(
                    host = %target.host,
                    port = target.port,
                    "network is now {}",
                    status.label()
                );
            }
            tokio::time::sleep(interval).await;
        }
    })
}
