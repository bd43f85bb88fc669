use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};
use sqlx::{SqlitePool, migrate::Migrator, sqlite::SqliteConnectOptions};
use thiserror::Error;

mod catalog;
mod checkpoints;
mod iterations;
mod people;
mod response_cache;
mod work_items;

pub use response_cache::SqliteCache;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("data directory is unavailable")]
    MissingDataDir,
    #[error("invalid {column} value: {value}")]
    InvalidValue { column: &'static str, value: String },
}

/// Outcome of an insert-or-update keyed by a stable external id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Inserted,
    Updated,
}

impl Upserted {
    fn from_existing(existed: bool) -> Self {
        if existed {
            Upserted::Updated
        } else {
            Upserted::Inserted
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectInput {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub state: String,
    pub last_update_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub state: String,
    pub last_update_time: Option<String>,
    pub is_active: bool,
}

impl ProjectRecord {
    /// Locally active and reported well-formed by the source.
    pub fn is_processable(&self) -> bool {
        self.is_active && self.state == "wellFormed"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub descriptor: String,
    pub display_name: Option<String>,
    pub mail_address: Option<String>,
    pub principal_name: Option<String>,
    pub origin: Option<String>,
    pub origin_id: Option<String>,
    pub subject_kind: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamRecord {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub project_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IterationInput {
    pub identifier: String,
    pub node_id: Option<i64>,
    pub name: String,
    pub path: String,
    pub start_date: Option<i64>,
    pub finish_date: Option<i64>,
    pub time_frame: Option<String>,
    /// JSON text of the node's attribute bag.
    pub attributes: Option<String>,
    pub project_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    pub identifier: String,
    pub node_id: Option<i64>,
    pub name: String,
    pub path: String,
    pub start_date: Option<i64>,
    pub finish_date: Option<i64>,
    pub time_frame: Option<String>,
    pub attributes: Option<String>,
    pub project_id: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamIterationInput {
    pub id: String,
    pub team_id: String,
    pub iteration_id: String,
    pub name: String,
    pub path: Option<String>,
    pub start_date: Option<i64>,
    pub finish_date: Option<i64>,
    pub time_frame: Option<String>,
    pub assigned: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamIterationRecord {
    pub id: String,
    pub team_id: String,
    pub iteration_id: String,
    pub name: String,
    pub path: Option<String>,
    pub start_date: Option<i64>,
    pub finish_date: Option<i64>,
    pub time_frame: Option<String>,
    pub assigned: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkItemRecord {
    pub id: i64,
    pub rev: Option<i64>,
    pub work_item_type: Option<String>,
    pub title: Option<String>,
    pub state: Option<String>,
    pub reason: Option<String>,
    pub story_points: Option<f64>,
    pub effort: Option<f64>,
    pub remaining_work: Option<f64>,
    pub completed_work: Option<f64>,
    pub original_estimate: Option<f64>,
    pub assigned_to: Option<String>,
    pub changed_by: Option<String>,
    pub created_by: Option<String>,
    pub iteration_path: Option<String>,
    pub iteration_id: Option<String>,
    pub team_iteration_id: Option<String>,
    pub area_path: Option<String>,
    pub tags: Option<String>,
    /// JSON object text of the item's `Custom.*` fields.
    pub custom_fields: Option<String>,
    pub created_date: Option<i64>,
    pub changed_date: Option<i64>,
    pub parent_id: Option<i64>,
    pub project_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Full,
    Incremental,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Full => "full",
            SyncType::Incremental => "incremental",
        }
    }

    fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "full" => Ok(SyncType::Full),
            "incremental" => Ok(SyncType::Incremental),
            other => Err(StoreError::InvalidValue {
                column: "sync_type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Success,
    Failed,
    InProgress,
    /// Finished, but covered only part of the source (first-batch runs).
    Partial,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::Success => "success",
            CheckpointStatus::Failed => "failed",
            CheckpointStatus::InProgress => "in_progress",
            CheckpointStatus::Partial => "partial",
        }
    }

    fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "success" => Ok(CheckpointStatus::Success),
            "failed" => Ok(CheckpointStatus::Failed),
            "in_progress" => Ok(CheckpointStatus::InProgress),
            "partial" => Ok(CheckpointStatus::Partial),
            other => Err(StoreError::InvalidValue {
                column: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// Durable record of the last sync of one `(table, scope)` pair. Global scope is
/// `project_id == None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointRecord {
    pub table_name: String,
    pub project_id: Option<String>,
    pub last_sync_at: Option<i64>,
    pub sync_type: SyncType,
    pub status: CheckpointStatus,
    pub records_processed: i64,
    pub error_message: Option<String>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct CheckpointUpdate<'a> {
    pub table_name: &'a str,
    pub project_id: Option<&'a str>,
    pub sync_type: SyncType,
    pub status: CheckpointStatus,
    pub records_processed: i64,
    pub error_message: Option<&'a str>,
    /// Becomes `last_sync_at` only when `status` is `Success`.
    pub synced_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BambooEmployeeRecord {
    pub id: i64,
    pub display_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub work_email: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub location: Option<String>,
    pub status: Option<String>,
}

impl BambooEmployeeRecord {
    pub fn full_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            _ => self.display_name.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeOffRecord {
    pub id: i64,
    pub employee_id: Option<i64>,
    pub type_name: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub amount: Option<f64>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InatechEmployee {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMapping {
    pub inatech_employee_id: i64,
    pub bamboo_employee_id: Option<i64>,
    pub devops_descriptor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingRecord {
    pub id: i64,
    pub inatech_employee_id: i64,
    pub bamboo_employee_id: Option<i64>,
    pub devops_descriptor: Option<String>,
    pub created_at: i64,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options: SqliteConnectOptions = database_url.parse()?;
        let pool = SqlitePool::connect_with(options.create_if_missing(true)).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn new_default() -> Result<Self, StoreError> {
        let db_path = default_db_path()?;
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
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

    /// Migrated in-memory database. One connection, or each would see its own
    /// empty database.
    #[cfg(test)]
    pub(crate) async fn in_memory() -> Self {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = Self::from_pool(pool);
        store.init().await.unwrap();
        store
    }
}

pub fn default_db_path() -> Result<PathBuf, StoreError> {
    let base = dirs::data_dir().ok_or(StoreError::MissingDataDir)?;
    Ok(base.join("hrsync").join("hrsync.db"))
}

pub(crate) fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
