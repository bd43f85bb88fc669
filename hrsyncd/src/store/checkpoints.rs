use sqlx::{Row, sqlite::SqliteRow};

use super::{CheckpointRecord, CheckpointStatus, CheckpointUpdate, Store, StoreError, SyncType, now_unix};

fn checkpoint_from_row(row: &SqliteRow) -> Result<CheckpointRecord, StoreError> {
    let project_id: String = row.try_get("project_id")?;
    let sync_type: String = row.try_get("sync_type")?;
    let status: String = row.try_get("status")?;
    Ok(CheckpointRecord {
        table_name: row.try_get("table_name")?,
        project_id: (!project_id.is_empty()).then_some(project_id),
        last_sync_at: row.try_get("last_sync_at")?,
        sync_type: SyncType::parse(&sync_type)?,
        status: CheckpointStatus::parse(&status)?,
        records_processed: row.try_get("records_processed")?,
        error_message: row.try_get("error_message")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Store {
    /// Writes the single checkpoint row for `(table_name, project_id)`.
    ///
    /// `last_sync_at` only advances on success; a failed or in-progress write
    /// keeps whatever the previous successful run recorded.
    pub async fn record_checkpoint(&self, update: &CheckpointUpdate<'_>) -> Result<(), StoreError> {
        let last_sync_at =
            (update.status == CheckpointStatus::Success).then_some(update.synced_at);
        sqlx::query(
            "INSERT INTO sync_checkpoints (
                table_name, project_id, last_sync_at, sync_type, status,
                records_processed, error_message, updated_at
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(table_name, project_id) DO UPDATE SET
                last_sync_at = CASE
                    WHEN excluded.status = 'success' THEN excluded.last_sync_at
                    ELSE sync_checkpoints.last_sync_at
                END,
                sync_type = excluded.sync_type,
                status = excluded.status,
                records_processed = excluded.records_processed,
                error_message = excluded.error_message,
                updated_at = excluded.updated_at",
        )
        .bind(update.table_name)
        .bind(update.project_id.unwrap_or_default())
        .bind(last_sync_at)
        .bind(update.sync_type.as_str())
        .bind(update.status.as_str())
        .bind(update.records_processed)
        .bind(update.error_message)
        .bind(now_unix())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_checkpoint(
        &self,
        table_name: &str,
        project_id: Option<&str>,
    ) -> Result<Option<CheckpointRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT table_name, project_id, last_sync_at, sync_type, status, records_processed, error_message, updated_at
             FROM sync_checkpoints WHERE table_name = ?1 AND project_id = ?2",
        )
        .bind(table_name)
        .bind(project_id.unwrap_or_default())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(checkpoint_from_row).transpose()
    }

    pub async fn list_checkpoints(&self) -> Result<Vec<CheckpointRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT table_name, project_id, last_sync_at, sync_type, status, records_processed, error_message, updated_at
             FROM sync_checkpoints ORDER BY table_name ASC, project_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(checkpoint_from_row).collect()
    }
}
