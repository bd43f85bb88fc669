use std::time::Duration;

use async_trait::async_trait;
use azdo_core::{CacheKey, ResponseCache};
use sqlx::Row;
use tracing::warn;

use super::{Store, StoreError, now_unix};

impl Store {
    pub async fn cached_response(
        &self,
        resource: &str,
        digest: &str,
        now: i64,
    ) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            "SELECT body FROM response_cache
             WHERE resource = ?1 AND digest = ?2 AND expires_at > ?3",
        )
        .bind(resource)
        .bind(digest)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("body")?)),
            None => Ok(None),
        }
    }

    /// Stores one body and drops every entry that expired by `now`.
    pub async fn put_cached_response(
        &self,
        resource: &str,
        digest: &str,
        body: &str,
        expires_at: i64,
        now: i64,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM response_cache WHERE expires_at <= ?1")
            .bind(now)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO response_cache (resource, digest, body, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(resource, digest) DO UPDATE SET
                body = excluded.body,
                expires_at = excluded.expires_at",
        )
        .bind(resource)
        .bind(digest)
        .bind(body)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn clear_cached_responses(&self) -> Result<u64, StoreError> {
        Ok(sqlx::query("DELETE FROM response_cache")
            .execute(&self.pool)
            .await?
            .rows_affected())
    }

    pub async fn count_cached_responses(&self, now: i64) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS entries FROM response_cache WHERE expires_at > ?1")
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("entries")?)
    }
}

/// Response cache kept in the database, so every process using the same
/// database shares (and clears) the same entries.
#[derive(Clone)]
pub struct SqliteCache {
    store: Store,
    ttl: Duration,
}

impl SqliteCache {
    pub fn new(store: Store, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn ttl_secs(&self) -> i64 {
        i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX)
    }
}

#[async_trait]
impl ResponseCache for SqliteCache {
    async fn get(&self, key: &CacheKey) -> Option<String> {
        match self
            .store
            .cached_response(key.resource(), key.digest(), now_unix())
            .await
        {
            Ok(body) => body,
            Err(err) => {
                warn!(resource = key.resource(), %err, "response cache read failed");
                None
            }
        }
    }

    async fn put(&self, key: CacheKey, body: String) {
        let ttl = self.ttl_secs();
        if ttl == 0 {
            return;
        }
        let now = now_unix();
        if let Err(err) = self
            .store
            .put_cached_response(key.resource(), key.digest(), &body, now.saturating_add(ttl), now)
            .await
        {
            warn!(resource = key.resource(), %err, "response cache write failed");
        }
    }

    async fn clear(&self) -> usize {
        match self.store.clear_cached_responses().await {
            Ok(removed) => usize::try_from(removed).unwrap_or(usize::MAX),
            Err(err) => {
                warn!(%err, "response cache clear failed");
                0
            }
        }
    }

    async fn len(&self) -> usize {
        match self.store.count_cached_responses(now_unix()).await {
            Ok(entries) => usize::try_from(entries).unwrap_or_default(),
            Err(err) => {
                warn!(%err, "response cache count failed");
                0
            }
        }
    }
}
