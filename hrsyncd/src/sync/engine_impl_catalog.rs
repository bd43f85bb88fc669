impl SyncEngine {
    pub async fn sync_projects(&self) -> Result<ResourceTally, SyncError> {
        let table = SyncResource::Projects.table_name();
        self.checkpointed(SERVICE, table, None, SyncType::Full, || self.pull_projects())
            .await
    }

    pub async fn sync_users(&self) -> Result<ResourceTally, SyncError> {
        let table = SyncResource::Users.table_name();
        self.checkpointed(SERVICE, table, None, SyncType::Full, || self.pull_users())
            .await
    }

    pub async fn sync_teams(&self) -> Result<ResourceTally, SyncError> {
        let table = SyncResource::Teams.table_name();
        self.checkpointed(SERVICE, table, None, SyncType::Full, || self.pull_teams())
            .await
    }

    async fn pull_projects(&self) -> Result<ResourceTally, SyncError> {
        let projects = self.client.list_projects().await?;
        let mut tally = ResourceTally::default();
        for project in &projects {
            let input = ProjectInput {
                id: project.id.clone(),
                name: project.name.clone(),
                description: project.description.clone(),
                state: project.state.as_str().to_string(),
                last_update_time: project.last_update_time.clone(),
            };
            tally.record(self.store.upsert_project(&input).await?);
        }
        Ok(tally)
    }

    async fn pull_users(&self) -> Result<ResourceTally, SyncError> {
        let users = self.client.list_users().await?;
        let mut tally = ResourceTally::default();
        for user in users {
            let record = UserRecord {
                is_active: !user.is_deleted_in_origin,
                descriptor: user.descriptor,
                display_name: user.display_name,
                mail_address: user.mail_address,
                principal_name: user.principal_name,
                origin: user.origin,
                origin_id: user.origin_id,
                subject_kind: user.subject_kind,
            };
            tally.record(self.store.upsert_user(&record).await?);
        }
        Ok(tally)
    }

    /// Teams whose project is unknown or switched off locally are not stored.
    async fn pull_teams(&self) -> Result<ResourceTally, SyncError> {
        let teams = self.client.list_teams().await?;
        let mut tally = ResourceTally::default();
        for team in teams {
            let project = match team.project_id.as_deref() {
                Some(project_id) => self.store.get_project(project_id).await?,
                None => None,
            };
            let Some(project) = project.filter(|project| project.is_active) else {
                debug!(team = %team.id, project = ?team.project_id, "skipping orphan team");
                tally.skipped += 1;
                continue;
            };
            let record = TeamRecord {
                id: team.id,
                name: team.name,
                description: team.description,
                project_id: project.id,
            };
            tally.record(self.store.upsert_team(&record).await?);
        }
        if tally.skipped > 0 {
            warn!(skipped = tally.skipped, "teams without an active project were skipped");
        }
        Ok(tally)
    }
}
