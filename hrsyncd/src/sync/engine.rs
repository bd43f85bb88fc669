use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use azdo_core::wiql::{LARGE_RESULT_THRESHOLD, WiqlQuery};
use azdo_core::{BatchMode, DevOpsClient, NodeKind, RemoteError, WorkItem};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::flatten::{derive_time_frame, flatten_tree, validate_iteration};
use super::{RecordError, parse_timestamp};
use crate::bamboohr::{BambooClient, BambooError};
use crate::progress::{NoopProgress, ProgressFields, ProgressSink};
use crate::store::{
    BambooEmployeeRecord, CheckpointRecord, CheckpointStatus, CheckpointUpdate, ProjectInput,
    ProjectRecord, Store, StoreError, SyncType, TeamIterationInput, TeamRecord, TimeOffRecord,
    Upserted, UserRecord, WorkItemRecord, now_unix,
};

const SERVICE: &str = "azure-devops";
const BAMBOO_SERVICE: &str = "bamboohr";
const DEFAULT_TEAM_DELAY: Duration = Duration::from_millis(50);
const DEFAULT_ITERATION_DEPTH: u32 = 10;
/// Upper bound passed to WIQL as `$top`.
const WIQL_TOP: usize = 20_000;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("api error: {0}")]
    Remote(#[from] RemoteError),
    #[error("bamboohr error: {0}")]
    Bamboo(#[from] BambooError),
    #[error("bamboohr is not configured")]
    BambooNotConfigured,
}

/// A failed step together with what it had already committed.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct StepFailure {
    pub error: SyncError,
    pub tally: ResourceTally,
}

impl From<SyncError> for StepFailure {
    fn from(error: SyncError) -> Self {
        Self {
            error,
            tally: ResourceTally::default(),
        }
    }
}

/// Where a run is. Steps advance strictly in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Projects,
    Users,
    Teams,
    Iterations,
    TeamIterations,
    WorkItems,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncResource {
    Projects,
    Users,
    Teams,
    Iterations,
    TeamIterations,
    WorkItems,
}

impl SyncResource {
    /// Dependency order: later resources resolve references to earlier ones.
    pub const ORDER: [SyncResource; 6] = [
        SyncResource::Projects,
        SyncResource::Users,
        SyncResource::Teams,
        SyncResource::Iterations,
        SyncResource::TeamIterations,
        SyncResource::WorkItems,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncResource::Projects => "projects",
            SyncResource::Users => "users",
            SyncResource::Teams => "teams",
            SyncResource::Iterations => "iterations",
            SyncResource::TeamIterations => "team-iterations",
            SyncResource::WorkItems => "work-items",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase().replace('_', "-");
        SyncResource::ORDER
            .into_iter()
            .find(|resource| resource.as_str() == value)
    }

    /// Checkpoint table name.
    pub fn table_name(&self) -> &'static str {
        match self {
            SyncResource::Projects => "projects",
            SyncResource::Users => "users",
            SyncResource::Teams => "teams",
            SyncResource::Iterations => "iterations",
            SyncResource::TeamIterations => "team_iterations",
            SyncResource::WorkItems => "work_items",
        }
    }

    pub fn state(&self) -> SyncState {
        match self {
            SyncResource::Projects => SyncState::Projects,
            SyncResource::Users => SyncState::Users,
            SyncResource::Teams => SyncState::Teams,
            SyncResource::Iterations => SyncState::Iterations,
            SyncResource::TeamIterations => SyncState::TeamIterations,
            SyncResource::WorkItems => SyncState::WorkItems,
        }
    }
}

/// What to do with a work item whose team-iteration is missing or inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TeamScopePolicy {
    /// Store it; the team-iteration reference is simply null.
    #[default]
    KeepAll,
    /// Skip it and count it as skipped.
    RequireActiveTeamIteration,
}

impl TeamScopePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "keep-all" => Some(TeamScopePolicy::KeepAll),
            "require-active-team-iteration" => Some(TeamScopePolicy::RequireActiveTeamIteration),
            _ => None,
        }
    }
}

/// Per-step counters. Each step builds its own and returns it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceTally {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl ResourceTally {
    pub fn record(&mut self, outcome: Upserted) {
        match outcome {
            Upserted::Inserted => self.inserted += 1,
            Upserted::Updated => self.updated += 1,
        }
    }

    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn merge(&mut self, other: ResourceTally) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }

    fn progress(&self, total: Option<usize>) -> ProgressFields {
        ProgressFields {
            total,
            processed: self.written() + self.skipped + self.errors,
            inserted: self.inserted,
            updated: self.updated,
            errors: self.errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub resource: SyncResource,
    pub success: bool,
    pub tally: ResourceTally,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub success: bool,
    pub state: SyncState,
    pub steps: Vec<StepReport>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub iteration_depth: u32,
    /// Fetch only the first batch of work-item details per project.
    pub first_batch_only: bool,
    /// Ignore checkpoints and rescan all work items.
    pub force_full: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            iteration_depth: DEFAULT_ITERATION_DEPTH,
            first_batch_only: false,
            force_full: false,
        }
    }
}

pub struct SyncEngine {
    client: DevOpsClient,
    store: Store,
    bamboo: Option<BambooClient>,
    progress: Arc<dyn ProgressSink>,
    team_delay: Duration,
    team_scope: TeamScopePolicy,
}

impl SyncEngine {
    pub fn new(client: DevOpsClient, store: Store) -> Self {
        Self {
            client,
            store,
            bamboo: None,
            progress: Arc::new(NoopProgress),
            team_delay: DEFAULT_TEAM_DELAY,
            team_scope: TeamScopePolicy::default(),
        }
    }

    pub fn with_bamboo(mut self, bamboo: BambooClient) -> Self {
        self.bamboo = Some(bamboo);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_team_delay(mut self, delay: Duration) -> Self {
        self.team_delay = delay;
        self
    }

    pub fn with_team_scope(mut self, policy: TeamScopePolicy) -> Self {
        self.team_scope = policy;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn client(&self) -> &DevOpsClient {
        &self.client
    }

    /// Drops every cached list/tree response. Returns how many were removed.
    pub async fn clear_cache(&self) -> usize {
        let entries = self.client.clear_cache().await;
        info!(entries, "response cache cleared");
        entries
    }

    pub async fn status(&self) -> Result<Vec<CheckpointRecord>, SyncError> {
        Ok(self.store.list_checkpoints().await?)
    }

    pub async fn sync_all(&self, options: SyncOptions) -> SyncSummary {
        self.sync_selected(&SyncResource::ORDER, options).await
    }

    /// Runs the chosen resources in dependency order, stopping at the first
    /// step that fails. Completed steps keep their writes.
    pub async fn sync_selected(&self, resources: &[SyncResource], options: SyncOptions) -> SyncSummary {
        let started = Instant::now();
        let wanted: HashSet<_> = resources.iter().copied().collect();
        let mut state = SyncState::Idle;
        let mut steps = Vec::new();
        let mut errors = Vec::new();

        for resource in SyncResource::ORDER.into_iter().filter(|r| wanted.contains(r)) {
            state = resource.state();
            let step_started = Instant::now();
            let result = self.run_step(resource, options).await;
            let duration_ms = elapsed_ms(step_started);
            match result {
                Ok(tally) => steps.push(StepReport {
                    resource,
                    success: true,
                    tally,
                    error: None,
                    duration_ms,
                }),
                Err(failure) => {
                    let err = failure.error;
                    let message = format!("{}: {err}", resource.as_str());
                    warn!(resource = resource.as_str(), error = %err, "sync step failed");
                    steps.push(StepReport {
                        resource,
                        success: false,
                        tally: failure.tally,
                        error: Some(err.to_string()),
                        duration_ms,
                    });
                    errors.push(message);
                    state = SyncState::Failed;
                    break;
                }
            }
        }

        if state != SyncState::Failed {
            state = SyncState::Done;
        }
        let summary = SyncSummary {
            success: state == SyncState::Done,
            state,
            steps,
            errors,
            duration_ms: elapsed_ms(started),
        };
        info!(
            success = summary.success,
            steps = summary.steps.len(),
            duration_ms = summary.duration_ms,
            "sync run finished"
        );
        summary
    }

    pub async fn run_step(
        &self,
        resource: SyncResource,
        options: SyncOptions,
    ) -> Result<ResourceTally, StepFailure> {
        let result = match resource {
            SyncResource::Projects => self.sync_projects().await,
            SyncResource::Users => self.sync_users().await,
            SyncResource::Teams => self.sync_teams().await,
            SyncResource::Iterations => self.sync_iterations(options.iteration_depth).await,
            SyncResource::TeamIterations => self.sync_team_iterations().await,
            SyncResource::WorkItems => return self.sync_work_items(options).await,
        };
        result.map_err(StepFailure::from)
    }

    /// Wraps one step in its checkpoint: `in_progress` first, then `success`
    /// with the step's start time, or `failed` with the error text.
    async fn checkpointed<F, Fut>(
        &self,
        service: &str,
        table_name: &str,
        project_id: Option<&str>,
        sync_type: SyncType,
        run: F,
    ) -> Result<ResourceTally, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ResourceTally, SyncError>>,
    {
        self.checkpointed_as(
            service,
            table_name,
            project_id,
            sync_type,
            CheckpointStatus::Success,
            run,
        )
        .await
    }

    /// Like `checkpointed`, but a successful run is recorded as `finished`.
    /// Only `Success` advances `last_sync_at`.
    async fn checkpointed_as<F, Fut>(
        &self,
        service: &str,
        table_name: &str,
        project_id: Option<&str>,
        sync_type: SyncType,
        finished: CheckpointStatus,
        run: F,
    ) -> Result<ResourceTally, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ResourceTally, SyncError>>,
    {
        let started = now_unix();
        let operation = match project_id {
            Some(project) => format!("{table_name}:{project}"),
            None => table_name.to_string(),
        };
        let checkpoint = CheckpointUpdate {
            table_name,
            project_id,
            sync_type,
            status: CheckpointStatus::InProgress,
            records_processed: 0,
            error_message: None,
            synced_at: started,
        };
        self.store.record_checkpoint(&checkpoint).await?;
        self.progress
            .initialize(service, &operation, &ProgressFields::default());

        match run().await {
            Ok(tally) => {
                self.store
                    .record_checkpoint(&CheckpointUpdate {
                        status: finished,
                        records_processed: tally.written() as i64,
                        ..checkpoint
                    })
                    .await?;
                self.progress
                    .complete(service, &operation, &tally.progress(None));
                info!(
                    table = table_name,
                    project = project_id,
                    inserted = tally.inserted,
                    updated = tally.updated,
                    skipped = tally.skipped,
                    errors = tally.errors,
                    status = finished.as_str(),
                    "sync step finished"
                );
                Ok(tally)
            }
            Err(err) => {
                let message = err.to_string();
                if let Err(store_err) = self
                    .store
                    .record_checkpoint(&CheckpointUpdate {
                        status: CheckpointStatus::Failed,
                        error_message: Some(&message),
                        ..checkpoint
                    })
                    .await
                {
                    warn!(table = table_name, error = %store_err, "failed to record failed checkpoint");
                }
                self.progress.fail(service, &operation, &message);
                Err(err)
            }
        }
    }
}

include!("engine_impl_catalog.rs");
include!("engine_impl_iterations.rs");
include!("engine_impl_work_items.rs");
include!("engine_impl_bamboo.rs");

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}
