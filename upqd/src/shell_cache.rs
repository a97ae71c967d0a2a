use std::path::{Component, Path, PathBuf};

use rand::Rng;
use rand::distributions::Alphanumeric;
use thiserror::Error;
use upq_core::{FILES_PATH, UploadClient, UploadError};

/// Resources needed to render the UI without a network.
pub const SHELL_FILES: &[&str] = &["/", "/index.html", "/style.css", "/manifest.webmanifest"];
/// Bump when the shell changes so `activate` drops the previous copy.
pub const SHELL_GENERATION: &str = "upq-app-shell-v1";

const STAGING_PREFIX: &str = ".staging-";
const DIRECTORY_INDEX: &str = "index.html";

#[derive(Debug, Error)]
pub enum ShellCacheError {
    #[error("failed to fetch {path}: {source}")]
    Fetch { path: String, source: UploadError },
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("path is not cacheable: {0}")]
    InvalidPath(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceSource {
    Cache,
    Network,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    pub path: String,
    pub body: Vec<u8>,
    pub source: ResourceSource,
}

/// Versioned on-disk copy of the app shell, one directory per generation.
#[derive(Clone)]
pub struct AppShellCache {
    root: PathBuf,
    generation: String,
    client: UploadClient,
}

impl AppShellCache {
    pub fn new(root: impl Into<PathBuf>, client: UploadClient) -> Self {
        Self::with_generation(root, client, SHELL_GENERATION)
    }

    pub fn with_generation(
        root: impl Into<PathBuf>,
        client: UploadClient,
        generation: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            generation: generation.into(),
            client,
        }
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub fn generation_dir(&self) -> PathBuf {
        self.root.join(&self.generation)
    }

    pub async fn is_installed(&self) -> bool {
        tokio::fs::metadata(self.generation_dir())
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }

    /// Downloads every shell file. Either all of them land in the generation
    /// directory or the previous contents stay untouched.
    pub async fn install(&self) -> Result<usize, ShellCacheError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let staging = self.root.join(format!("{STAGING_PREFIX}{}", random_suffix()));
        tokio::fs::create_dir_all(&staging).await?;

        if let Err(err) = self.fill(&staging).await {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(err);
        }

        let target = self.generation_dir();
        if tokio::fs::metadata(&target).await.is_ok() {
            tokio::fs::remove_dir_all(&target).await?;
        }
        tokio::fs::rename(&staging, &target).await?;
        tracing::info!(generation = %self.generation, files = SHELL_FILES.len(), "app shell cached");
        Ok(SHELL_FILES.len())
    }

    async fn fill(&self, staging: &Path) -> Result<(), ShellCacheError> {
        for path in SHELL_FILES {
            let body = self
                .client
                .fetch_resource(path)
                .await
                .map_err(|source| ShellCacheError::Fetch {
                    path: path.to_string(),
                    source,
                })?;
            let local = cache_path_for(staging, path)?;
            if let Some(parent) = local.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&local, body).await?;
        }
        Ok(())
    }

    /// Removes every cached generation other than the current one, along with
    /// staging directories left behind by an interrupted install.
    pub async fn activate(&self) -> Result<Vec<String>, ShellCacheError> {
        let mut removed = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == self.generation {
                continue;
            }
            tokio::fs::remove_dir_all(entry.path()).await?;
            tracing::info!(cache = %name, "removed old app shell cache");
            removed.push(name);
        }
        removed.sort();
        Ok(removed)
    }

    /// Serves `path` from the cache when possible. API paths always go to the
    /// network so file listings are never stale.
    pub async fn fetch(&self, path: &str) -> Result<FetchedResource, ShellCacheError> {
        if !is_api_path(path) {
            let local = cache_path_for(&self.generation_dir(), path)?;
            match tokio::fs::read(&local).await {
                Ok(body) => {
                    return Ok(FetchedResource {
                        path: path.to_string(),
                        body,
                        source: ResourceSource::Cache,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }

        let body = self
            .client
            .fetch_resource(path)
            .await
            .map_err(|source| ShellCacheError::Fetch {
                path: path.to_string(),
                source,
            })?;
        Ok(FetchedResource {
            path: path.to_string(),
            body,
            source: ResourceSource::Network,
        })
    }
}

pub fn is_api_path(path: &str) -> bool {
    let path = strip_query(path);
    [FILES_PATH, "/api"].iter().any(|prefix| {
        path == *prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

fn cache_path_for(dir: &Path, request_path: &str) -> Result<PathBuf, ShellCacheError> {
    let normalized = strip_query(request_path);
    if !normalized.starts_with('/') {
        return Err(ShellCacheError::InvalidPath(request_path.to_string()));
    }

    let mut local = dir.to_path_buf();
    let mut pushed = false;
    for component in Path::new(normalized).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => {
                local.push(part);
                pushed = true;
            }
            Component::ParentDir | Component::Prefix(_) => {
                return Err(ShellCacheError::InvalidPath(request_path.to_string()));
            }
        }
    }
    if !pushed || normalized.ends_with('/') {
        local.push(DIRECTORY_INDEX);
    }
    Ok(local)
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}
