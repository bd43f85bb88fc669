impl SyncEngine {
    /// Syncs work items of every processable project, each under its own
    /// checkpoint. A project with a previous successful run is queried
    /// incrementally unless `force_full` is set.
    ///
    /// A first-batch run is recorded as `partial`, so the next run still
    /// covers everything since the last complete one. On failure the tally of
    /// the projects already finished is returned with the error.
    pub async fn sync_work_items(&self, options: SyncOptions) -> Result<ResourceTally, StepFailure> {
        let table = SyncResource::WorkItems.table_name();
        let projects: Vec<ProjectRecord> = self
            .store
            .list_active_projects()
            .await
            .map_err(SyncError::from)?
            .into_iter()
            .filter(ProjectRecord::is_processable)
            .collect();
        let finished = if options.first_batch_only {
            CheckpointStatus::Partial
        } else {
            CheckpointStatus::Success
        };

        let mut tally = ResourceTally::default();
        for project in &projects {
            let previous = self
                .store
                .get_checkpoint(table, Some(project.id.as_str()))
                .await
                .map_err(SyncError::from)?;
            let since = previous
                .and_then(|checkpoint| checkpoint.last_sync_at)
                .filter(|_| !options.force_full)
                .and_then(|at| OffsetDateTime::from_unix_timestamp(at).ok());
            let sync_type = if since.is_some() {
                SyncType::Incremental
            } else {
                SyncType::Full
            };
            let result = self
                .checkpointed_as(
                    SERVICE,
                    table,
                    Some(project.id.as_str()),
                    sync_type,
                    finished,
                    || self.pull_project_work_items(project, since, options),
                )
                .await;
            match result {
                Ok(project_tally) => tally.merge(project_tally),
                Err(error) => return Err(StepFailure { error, tally }),
            }
        }
        Ok(tally)
    }

    async fn pull_project_work_items(
        &self,
        project: &ProjectRecord,
        since: Option<OffsetDateTime>,
        options: SyncOptions,
    ) -> Result<ResourceTally, SyncError> {
        let paths = self.store.active_iteration_paths(&project.id).await?;
        let query = WiqlQuery::new(project.name.as_str())
            .with_iteration_paths(paths)
            .changed_since(since);
        let ids = self
            .client
            .query_work_item_ids(&project.id, &query.build(), WIQL_TOP)
            .await?;
        if ids.len() > LARGE_RESULT_THRESHOLD {
            warn!(project = %project.id, count = ids.len(), "large work item result set");
        }
        info!(
            project = %project.id,
            count = ids.len(),
            incremental = query.is_incremental(),
            "work item ids queried"
        );

        let mode = if options.first_batch_only {
            BatchMode::FirstBatchOnly
        } else {
            BatchMode::All
        };
        let operation = format!("work_items:{}", project.id);
        let total = ids.len();
        let mut tally = ResourceTally::default();
        let mut batches = self.client.work_item_batches(&ids, &project.id, mode);
        while let Some(batch) = batches.next().await {
            for item in batch? {
                self.store_work_item(&item, &project.id, &mut tally).await?;
            }
            self.progress
                .update(SERVICE, &operation, &tally.progress(Some(total)));
        }
        Ok(tally)
    }

    async fn store_work_item(
        &self,
        item: &WorkItem,
        project_id: &str,
        tally: &mut ResourceTally,
    ) -> Result<(), SyncError> {
        let mut record = match work_item_record(item, project_id) {
            Ok(record) => record,
            Err(err) => {
                warn!(id = item.id, project = %project_id, error = %err, "rejected work item");
                tally.errors += 1;
                return Ok(());
            }
        };

        let team_iteration = match record.iteration_path.as_deref() {
            Some(path) => self.store.find_team_iteration_by_path(project_id, path).await?,
            None => None,
        };
        if self.team_scope == TeamScopePolicy::RequireActiveTeamIteration
            && !team_iteration.as_ref().is_some_and(|ti| ti.is_active)
        {
            debug!(id = item.id, "work item outside active team iterations");
            tally.skipped += 1;
            return Ok(());
        }
        record.team_iteration_id = team_iteration.map(|ti| ti.id);
        record.iteration_id = self
            .store
            .resolve_iteration(
                project_id,
                item.fields.iteration_id,
                record.iteration_path.as_deref(),
            )
            .await?;
        record.assigned_to = self.known_user(record.assigned_to.take()).await?;
        record.changed_by = self.known_user(record.changed_by.take()).await?;

        tally.record(self.store.upsert_work_item(&record).await?);
        Ok(())
    }

    /// Keeps a descriptor only if the user is stored.
    async fn known_user(&self, descriptor: Option<String>) -> Result<Option<String>, SyncError> {
        match descriptor {
            Some(descriptor) if self.store.user_exists(&descriptor).await? => Ok(Some(descriptor)),
            _ => Ok(None),
        }
    }
}

/// Maps the source fields of `item`. References to users and iterations are
/// left raw for the caller to resolve.
fn work_item_record(item: &WorkItem, project_id: &str) -> Result<WorkItemRecord, RecordError> {
    let fields = &item.fields;
    let custom = fields.custom_fields();
    Ok(WorkItemRecord {
        id: item.id,
        rev: item.rev,
        work_item_type: fields.work_item_type.clone(),
        title: fields.title.clone(),
        state: fields.state.clone(),
        reason: fields.reason.clone(),
        story_points: fields.story_points,
        effort: fields.effort,
        remaining_work: fields.remaining_work,
        completed_work: fields.completed_work,
        original_estimate: fields.original_estimate,
        assigned_to: fields.assigned_to.as_ref().and_then(|r| r.descriptor.clone()),
        changed_by: fields.changed_by.as_ref().and_then(|r| r.descriptor.clone()),
        created_by: fields.created_by.as_ref().and_then(|r| r.display_name.clone()),
        iteration_path: fields.iteration_path.clone(),
        iteration_id: None,
        team_iteration_id: None,
        area_path: fields.area_path.clone(),
        tags: fields.tags.clone(),
        custom_fields: if custom.is_empty() {
            None
        } else {
            serde_json::to_string(&custom).ok()
        },
        created_date: parse_timestamp("System.CreatedDate", fields.created_date.as_deref())?,
        changed_date: parse_timestamp("System.ChangedDate", fields.changed_date.as_deref())?,
        parent_id: item.parent_id(),
        project_id: project_id.to_string(),
    })
}
