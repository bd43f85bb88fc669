impl SyncEngine {
    pub async fn sync_iterations(&self, depth: u32) -> Result<ResourceTally, SyncError> {
        let table = SyncResource::Iterations.table_name();
        self.checkpointed(SERVICE, table, None, SyncType::Full, || {
            self.pull_iterations(depth)
        })
        .await
    }

    pub async fn sync_team_iterations(&self) -> Result<ResourceTally, SyncError> {
        let table = SyncResource::TeamIterations.table_name();
        self.checkpointed(SERVICE, table, None, SyncType::Full, || {
            self.pull_team_iterations()
        })
        .await
    }

    async fn pull_iterations(&self, depth: u32) -> Result<ResourceTally, SyncError> {
        let now = now_unix();
        let mut tally = ResourceTally::default();
        for project in self.store.list_active_projects().await? {
            let root = self
                .client
                .get_classification_tree(&project.id, NodeKind::Iterations, depth)
                .await?;
            let nodes = flatten_tree(&root);
            debug!(project = %project.id, nodes = nodes.len(), "flattened iteration tree");
            for node in &nodes {
                match validate_iteration(node, &project.id, now) {
                    Ok(input) => tally.record(self.store.upsert_iteration(&input).await?),
                    Err(err) => {
                        warn!(project = %project.id, path = %node.path, error = %err, "rejected iteration");
                        tally.errors += 1;
                    }
                }
            }
        }
        Ok(tally)
    }

    /// Every team's sprint configuration becomes `assigned` rows keyed
    /// `{team}-{iteration}`. Rows the team no longer lists are kept but lose
    /// `assigned`. A team whose request fails is skipped.
    async fn pull_team_iterations(&self) -> Result<ResourceTally, SyncError> {
        let now = now_unix();
        let mut teams = Vec::new();
        for project in self.store.list_active_projects().await? {
            for team in self.store.list_teams_for_project(&project.id).await? {
                teams.push((project.id.clone(), team));
            }
        }

        let total = teams.len();
        let mut tally = ResourceTally::default();
        for (index, (project_id, team)) in teams.iter().enumerate() {
            if index > 0 && !self.team_delay.is_zero() {
                tokio::time::sleep(self.team_delay).await;
            }
            let iterations = match self.client.list_team_iterations(project_id, &team.id).await {
                Ok(iterations) => iterations,
                Err(err) => {
                    warn!(team = %team.id, project = %project_id, error = %err, "team iterations unavailable, skipping team");
                    tally.errors += 1;
                    continue;
                }
            };

            let mut keep = Vec::with_capacity(iterations.len());
            for iteration in &iterations {
                let key = format!("{}-{}", team.id, iteration.id);
                let attributes = &iteration.attributes;
                let dates = parse_timestamp("startDate", attributes.start_date.as_deref()).and_then(
                    |start| {
                        parse_timestamp("finishDate", attributes.finish_date.as_deref())
                            .map(|finish| (start, finish))
                    },
                );
                let (start_date, finish_date) = match dates {
                    Ok(dates) => dates,
                    Err(err) => {
                        warn!(key = %key, error = %err, "rejected team iteration");
                        tally.errors += 1;
                        continue;
                    }
                };
                let time_frame = attributes.time_frame.clone().or_else(|| {
                    derive_time_frame(start_date, finish_date, now).map(str::to_string)
                });
                let input = TeamIterationInput {
                    id: key.clone(),
                    team_id: team.id.clone(),
                    iteration_id: iteration.id.clone(),
                    name: iteration.name.clone(),
                    path: iteration.path.clone(),
                    start_date,
                    finish_date,
                    time_frame,
                    assigned: true,
                };
                tally.record(self.store.upsert_team_iteration(&input).await?);
                keep.push(key);
            }

            let unassigned = self.store.mark_unassigned_except(&team.id, &keep).await?;
            tally.updated += unassigned as usize;
            self.progress
                .update(SERVICE, "team_iterations", &tally.progress(Some(total)));
        }
        Ok(tally)
    }
}
