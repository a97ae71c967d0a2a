use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{Row, SqlitePool, migrate::Migrator, sqlite::SqliteRow};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::OnceCell;
use upq_core::FilePayload;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const DATABASE_FILE: &str = "queue.db";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("queue store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("invalid stored timestamp: {0}")]
    InvalidTimestamp(i64),
}

impl StoreError {
    /// Nothing was written when these happen, so the caller may simply try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}

/// Result of a mutation addressed by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Applied,
    NotFound,
}

/// Diagnostics of the last rejected send; message and time always travel together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub message: String,
    pub at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub payload: FilePayload,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: i64,
    pub payload: FilePayload,
    pub filename: String,
    pub last_failure: Option<AttemptFailure>,
    pub created_at: OffsetDateTime,
}

impl QueueEntry {
    pub fn last_error(&self) -> Option<&str> {
        self.last_failure.as_ref().map(|f| f.message.as_str())
    }

    pub fn last_attempt_at(&self) -> Option<OffsetDateTime> {
        self.last_failure.as_ref().map(|f| f.at)
    }
}

/// Queue entry without its payload, for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    pub id: i64,
    pub filename: String,
    pub size: u64,
    pub last_failure: Option<AttemptFailure>,
}

#[derive(Debug, Clone)]
pub struct QueueStore {
    pool: SqlitePool,
}

impl QueueStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // WAL plus a busy timeout lets a one-shot flush process share the file with the daemon.
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert(&self, entry: &NewEntry) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO upload_requests (filename, payload_name, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&entry.filename)
        .bind(&entry.payload.name)
        .bind(&entry.payload.content)
        .bind(unix_millis(OffsetDateTime::now_utc()))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn list_all(&self) -> Result<Vec<QueueEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, filename, payload_name, payload, last_error, last_attempt_at, created_at
             FROM upload_requests
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    pub async fn list_summaries(&self) -> Result<Vec<EntrySummary>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, filename, length(payload) AS size, last_error, last_attempt_at
             FROM upload_requests
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let size: i64 = row.try_get("size")?;
            out.push(EntrySummary {
                id: row.try_get("id")?,
                filename: row.try_get("filename")?,
                size: u64::try_from(size).unwrap_or(0),
                last_failure: failure_from_row(&row)?,
            });
        }
        Ok(out)
    }

    pub async fn get(&self, id: i64) -> Result<Option<QueueEntry>, StoreError> {
        let row = sqlx::query(
            "SELECT id, filename, payload_name, payload, last_error, last_attempt_at, created_at
             FROM upload_requests
             WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    pub async fn delete_by_id(&self, id: i64) -> Result<StoreOutcome, StoreError> {
        let result = sqlx::query("DELETE FROM upload_requests WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(outcome(result.rows_affected()))
    }

    pub async fn annotate_error(
        &self,
        id: i64,
        message: &str,
        at: OffsetDateTime,
    ) -> Result<StoreOutcome, StoreError> {
        let result = sqlx::query(
            "UPDATE upload_requests SET last_error = ?1, last_attempt_at = ?2 WHERE id = ?3",
        )
        .bind(message)
        .bind(unix_millis(at))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(outcome(result.rows_affected()))
    }

    pub async fn len(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM upload_requests")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }
}

/// Opens the store on first use and hands out the same instance afterwards.
/// A failed open leaves the slot empty so the next call tries again.
pub struct StoreSlot {
    db_path: PathBuf,
    cell: OnceCell<QueueStore>,
}

impl StoreSlot {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            cell: OnceCell::new(),
        }
    }

    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(DATABASE_FILE))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub async fn get(&self) -> Result<&QueueStore, StoreError> {
        self.cell
            .get_or_try_init(|| QueueStore::open(&self.db_path))
            .await
    }
}

pub fn default_data_dir() -> Result<PathBuf, StoreError> {
    let mut path = dirs::data_dir().ok_or(StoreError::MissingDataDir)?;
    path.push("upq");
    Ok(path)
}

pub(crate) fn unix_millis(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

pub(crate) fn from_unix_millis(millis: i64) -> Result<OffsetDateTime, StoreError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map_err(|_| StoreError::InvalidTimestamp(millis))
}

fn outcome(rows_affected: u64) -> StoreOutcome {
    if rows_affected == 0 {
        StoreOutcome::NotFound
    } else {
        StoreOutcome::Applied
    }
}

fn failure_from_row(row: &SqliteRow) -> Result<Option<AttemptFailure>, StoreError> {
    let message: Option<String> = row.try_get("last_error")?;
    let at: Option<i64> = row.try_get("last_attempt_at")?;
    match (message, at) {
        (Some(message), Some(at)) => Ok(Some(AttemptFailure {
            message,
            at: from_unix_millis(at)?,
        })),
        _ => Ok(None),
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<QueueEntry, StoreError> {
    let created_at: i64 = row.try_get("created_at")?;
    Ok(QueueEntry {
        id: row.try_get("id")?,
        payload: FilePayload {
            name: row.try_get("payload_name")?,
            content: row.try_get("payload")?,
        },
        filename: row.try_get("filename")?,
        last_failure: failure_from_row(row)?,
        created_at: from_unix_millis(created_at)?,
    })
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
