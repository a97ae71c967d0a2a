use std::sync::Arc;

use sqlx::{Row, SqlitePool};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Notify;

use crate::queue::store::unix_millis;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("sync registry unavailable: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("sync tag must not be empty")]
    InvalidTag,
}

/// A pending request to run the handler for `tag` once connectivity allows.
///
/// `generation` grows every time the tag is registered again while pending, so a
/// scheduler can tell whether a registration arrived while it was dispatching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub tag: String,
    pub generation: i64,
}

/// Durable named sync registrations, stored next to the queue.
#[derive(Clone)]
pub struct SyncRegistry {
    pool: SqlitePool,
    wake: Arc<Notify>,
}

impl SyncRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Returns `true` when the tag was not pending before. Registering a pending
    /// tag is not an error.
    pub async fn register(&self, tag: &str) -> Result<bool, RegistryError> {
        if tag.trim().is_empty() {
            return Err(RegistryError::InvalidTag);
        }
        let generation: i64 = sqlx::query_scalar(
            "INSERT INTO sync_registrations (tag, generation, registered_at)
             VALUES (?1, 1, ?2)
             ON CONFLICT(tag) DO UPDATE SET generation = sync_registrations.generation + 1
             RETURNING generation",
        )
        .bind(tag)
        .bind(unix_millis(OffsetDateTime::now_utc()))
        .fetch_one(&self.pool)
        .await?;

        self.wake.notify_one();
        Ok(generation == 1)
    }

    pub async fn pending(&self) -> Result<Vec<Registration>, RegistryError> {
        let rows = sqlx::query(
            "SELECT tag, generation FROM sync_registrations ORDER BY registered_at ASC, tag ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Registration {
                tag: row.try_get("tag")?,
                generation: row.try_get("generation")?,
            });
        }
        Ok(out)
    }

    pub async fn is_pending(&self, tag: &str) -> Result<bool, RegistryError> {
        let row = sqlx::query("SELECT 1 FROM sync_registrations WHERE tag = ?1")
            .bind(tag)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Removes the registration only if nobody registered it again since
    /// `registration` was read. Returns whether it was removed.
    pub async fn release(&self, registration: &Registration) -> Result<bool, RegistryError> {
        let result =
            sqlx::query("DELETE FROM sync_registrations WHERE tag = ?1 AND generation = ?2")
                .bind(&registration.tag)
                .bind(registration.generation)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn unregister(&self, tag: &str) -> Result<bool, RegistryError> {
        let result = sqlx::query("DELETE FROM sync_registrations WHERE tag = ?1")
            .bind(tag)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Resolves after the next `register` call (or immediately if one happened
    /// since the last wait).
    pub async fn registered(&self) {
        self.wake.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueStore;
    use std::time::Duration;

    async fn make_registry() -> SyncRegistry {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        QueueStore::from_pool(pool.clone()).init().await.unwrap();
        SyncRegistry::new(pool)
    }

    #[tokio::test]
    async fn registering_twice_is_a_no_op() {
        let registry = make_registry().await;

        assert!(registry.register("upload-queue").await.unwrap());
        assert!(!registry.register("upload-queue").await.unwrap());

        let pending = registry.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].tag, "upload-queue");
    }

    #[tokio::test]
    async fn empty_tag_is_rejected() {
        let registry = make_registry().await;
        assert!(matches!(
            registry.register("  ").await,
            Err(RegistryError::InvalidTag)
        ));
    }

    #[tokio::test]
    async fn release_keeps_registration_made_during_dispatch() {
        let registry = make_registry().await;
        registry.register("upload-queue").await.unwrap();
        let seen = registry.pending().await.unwrap().remove(0);

        registry.register("upload-queue").await.unwrap();

        assert!(!registry.release(&seen).await.unwrap());
        assert!(registry.is_pending("upload-queue").await.unwrap());

        let latest = registry.pending().await.unwrap().remove(0);
        assert!(registry.release(&latest).await.unwrap());
        assert!(!registry.is_pending("upload-queue").await.unwrap());
    }

    #[tokio::test]
    async fn unregister_reports_missing_tag() {
        let registry = make_registry().await;
        registry.register("upload-queue").await.unwrap();

        assert!(registry.unregister("upload-queue").await.unwrap());
        assert!(!registry.unregister("upload-queue").await.unwrap());
    }

    #[tokio::test]
    async fn register_wakes_waiter() {
        let registry = make_registry().await;
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.registered().await })
        };

        registry.register("upload-queue").await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
