use std::fmt::Write as _;
use std::path::Path;

use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;

use crate::connectivity::NetworkStatus;
use crate::notify::QueueEvent;
use crate::queue::{EntrySummary, ManagerError, QueueManager, QueueReason, SubmitOutcome};

const ATTEMPT_TIME: &[FormatItem<'static>] = format_description!("[hour]:[minute]:[second]");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueView {
    Loaded(Vec<EntrySummary>),
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFiles {
    NotLoaded,
    Loaded(Vec<String>),
    Unavailable,
}

/// What the user sees. Every render reads from the last reload, and every
/// reload goes back to the store, so a missed notification only delays an update.
pub struct Session {
    manager: QueueManager,
    network: NetworkStatus,
    status: String,
    queue: QueueView,
    server_files: ServerFiles,
}

impl Session {
    pub fn new(manager: QueueManager, network: NetworkStatus) -> Self {
        Self {
            manager,
            network,
            status: String::new(),
            queue: QueueView::Loaded(Vec::new()),
            server_files: ServerFiles::NotLoaded,
        }
    }

    pub fn network(&self) -> NetworkStatus {
        self.network
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn queue(&self) -> &QueueView {
        &self.queue
    }

    pub fn server_files(&self) -> &ServerFiles {
        &self.server_files
    }

    pub async fn load(&mut self) {
        self.reload_queue().await;
        self.refresh_server_files().await;
    }

    pub async fn reload_queue(&mut self) {
        self.queue = match self.manager.store().list_summaries().await {
            Ok(entries) => QueueView::Loaded(entries),
            Err(err) => {
                tracing::error!(error = %err, "could not read upload queue");
                QueueView::Unavailable
            }
        };
    }

    pub async fn refresh_server_files(&mut self) {
        self.server_files = match self.manager.client().list_files().await {
            Ok(files) => ServerFiles::Loaded(files),
            Err(err) => {
                tracing::warn!(error = %err, "could not fetch server file list");
                ServerFiles::Unavailable
            }
        };
    }

    /// Returns `true` when the indicator changed.
    pub fn set_network(&mut self, status: NetworkStatus) -> bool {
        let changed = self.network != status;
        self.network = status;
        changed
    }

    pub async fn submit(&mut self, path: &Path) {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        match self.manager.submit_path(path, self.network).await {
            Ok(SubmitOutcome::Sent(_)) => {
                self.status = format!("File \"{name}\" uploaded successfully!");
                self.refresh_server_files().await;
            }
            Ok(SubmitOutcome::Queued {
                reason,
                sync_registered,
                ..
            }) => {
                self.status = match reason {
                    QueueReason::Offline => {
                        format!("You are offline. File \"{name}\" was added to the upload queue.")
                    }
                    QueueReason::SendFailed(message) => format!(
                        "Upload failed ({message}). File \"{name}\" was added to the upload queue."
                    ),
                };
                if !sync_registered {
                    self.status
                        .push_str(" Automatic retry is not scheduled yet; use \"flush\" to request it.");
                }
                self.reload_queue().await;
            }
            Err(ManagerError::InvalidInput(message)) => {
                self.status = message;
            }
            Err(err) => {
                tracing::error!(error = %err, "submit failed");
                self.status = format!("Could not queue \"{name}\": {err}");
            }
        }
    }

    pub async fn handle_event(&mut self, event: &QueueEvent) {
        match event {
            QueueEvent::QueueDrainCompleted => {
                self.status = "Queued files were synchronised successfully.".to_string();
                self.reload_queue().await;
                self.refresh_server_files().await;
            }
            QueueEvent::ItemFailed { id, .. } => {
                tracing::debug!(id, "queued file was rejected, re-rendering queue");
                self.reload_queue().await;
            }
        }
    }

    /// Called when notifications were dropped; a full reload catches up.
    pub async fn resync(&mut self) {
        self.load().await;
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Status: {}", self.network.label());

        let _ = writeln!(out, "Queued uploads:");
        match &self.queue {
            QueueView::Unavailable => {
                let _ = writeln!(out, "  Could not display the queue.");
            }
            QueueView::Loaded(entries) if entries.is_empty() => {
                let _ = writeln!(out, "  Queue is empty.");
            }
            QueueView::Loaded(entries) => {
                for entry in entries {
                    let _ = writeln!(out, "  - {} ({} bytes)", entry.filename, entry.size);
                    if let Some(failure) = &entry.last_failure {
                        let _ = writeln!(
                            out,
                            "    Error: {} (attempt at {})",
                            failure.message,
                            attempt_time(failure.at)
                        );
                    }
                }
            }
        }

        let _ = writeln!(out, "Files on server:");
        match &self.server_files {
            ServerFiles::NotLoaded => {
                let _ = writeln!(out, "  Loading...");
            }
            ServerFiles::Unavailable => {
                let _ = writeln!(out, "  Could not load the file list.");
            }
            ServerFiles::Loaded(files) if files.is_empty() => {
                let _ = writeln!(out, "  No files on the server yet.");
            }
            ServerFiles::Loaded(files) => {
                for file in files {
                    let _ = writeln!(out, "  - {file}");
                }
            }
        }

        if !self.status.is_empty() {
            let _ = writeln!(out, "> {}", self.status);
        }
        out
    }
}

fn attempt_time(at: OffsetDateTime) -> String {
    at.format(ATTEMPT_TIME).unwrap_or_else(|_| at.to_string())
}
