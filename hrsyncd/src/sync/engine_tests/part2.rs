async fn record_work_item_checkpoint(engine: &SyncEngine, status: CheckpointStatus, at: i64) {
    engine
        .store
        .record_checkpoint(&CheckpointUpdate {
            table_name: "work_items",
            project_id: Some("p1"),
            sync_type: SyncType::Full,
            status,
            records_processed: 0,
            error_message: None,
            synced_at: at,
        })
        .await
        .unwrap();
}

async fn seed_team_iteration(engine: &SyncEngine, team_id: &str, iteration_id: &str, active: bool) {
    let key = format!("{team_id}-{iteration_id}");
    engine
        .store
        .upsert_team_iteration(&TeamIterationInput {
            id: key.clone(),
            team_id: team_id.into(),
            iteration_id: iteration_id.into(),
            name: iteration_id.into(),
            path: Some(format!("Fabrikam\\{iteration_id}")),
            start_date: None,
            finish_date: None,
            time_frame: None,
            assigned: true,
        })
        .await
        .unwrap();
    engine
        .store
        .set_team_iteration_active(&key, active)
        .await
        .unwrap();
}

fn item(id: i64, iteration_path: &str) -> Value {
    json!({
        "id": id,
        "rev": 1,
        "fields": {
            "System.Title": format!("Item {id}"),
            "System.IterationPath": iteration_path,
            "System.AssignedTo": { "descriptor": "aad.nobody" }
        }
    })
}

#[tokio::test]
async fn work_items_sync_without_teams_or_iterations() {
    let server = MockServer::start().await;
    mount_wiql(&server, "p1", &[1, 2]).await;
    mount_work_items(
        &server,
        "p1",
        json!([item(1, "Fabrikam\\Sprint 9"), item(2, "Fabrikam")]),
    )
    .await;
    let engine = make_engine(&server).await;
    seed_project(&engine, "p1", "Fabrikam", true).await;

    let tally = engine.sync_work_items(SyncOptions::default()).await.unwrap();
    assert_eq!(tally.inserted, 2);
    assert_eq!(tally.errors, 0);

    for record in engine.store.list_work_items("p1").await.unwrap() {
        assert_eq!(record.iteration_id, None);
        assert_eq!(record.team_iteration_id, None);
        assert_eq!(record.assigned_to, None);
    }
    let checkpoint = engine
        .store
        .get_checkpoint("work_items", Some("p1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::Success);
    assert_eq!(checkpoint.sync_type, SyncType::Full);
    assert_eq!(checkpoint.records_processed, 2);
    assert!(checkpoint.last_sync_at.is_some());
}

#[tokio::test]
async fn incremental_run_filters_on_changed_date() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contoso/p1/_apis/wit/wiql"))
        .and(body_string_contains(
            "[System.ChangedDate] >= '2024-01-01T00:00:00Z'",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "workItems": [] })))
        .expect(1)
        .mount(&server)
        .await;
    let engine = make_engine(&server).await;
    seed_project(&engine, "p1", "Fabrikam", true).await;
    record_work_item_checkpoint(&engine, CheckpointStatus::Success, 1_704_067_200).await;

    engine.sync_work_items(SyncOptions::default()).await.unwrap();

    let checkpoint = engine
        .store
        .get_checkpoint("work_items", Some("p1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.sync_type, SyncType::Incremental);
    assert!(checkpoint.last_sync_at.unwrap() > 1_704_067_200);
}

#[tokio::test]
async fn forced_full_run_ignores_checkpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contoso/p1/_apis/wit/wiql"))
        .and(body_string_contains("ChangedDate"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    mount_wiql(&server, "p1", &[]).await;
    let engine = make_engine(&server).await;
    seed_project(&engine, "p1", "Fabrikam", true).await;
    record_work_item_checkpoint(&engine, CheckpointStatus::Success, 1_704_067_200).await;

    let options = SyncOptions {
        force_full: true,
        ..SyncOptions::default()
    };
    engine.sync_work_items(options).await.unwrap();
}

#[tokio::test]
async fn failed_run_keeps_previous_sync_time() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contoso/p1/_apis/wit/wiql"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    let progress = Arc::new(RecordingProgress::default());
    let engine = make_engine(&server).await.with_progress(progress.clone());
    seed_project(&engine, "p1", "Fabrikam", true).await;
    record_work_item_checkpoint(&engine, CheckpointStatus::Success, 1000).await;

    let failure = engine
        .sync_work_items(SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        failure.error,
        SyncError::Remote(RemoteError::RetriesExhausted { .. })
    ));
    assert_eq!(failure.tally, ResourceTally::default());

    let checkpoint = engine
        .store
        .get_checkpoint("work_items", Some("p1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::Failed);
    assert_eq!(checkpoint.last_sync_at, Some(1000));
    assert!(checkpoint.error_message.is_some());
    assert_eq!(
        progress.calls(),
        ["init:work_items:p1", "fail:work_items:p1"]
    );
}

#[tokio::test]
async fn first_batch_only_fetches_one_batch() {
    let server = MockServer::start().await;
    mount_wiql(&server, "p1", &[1, 2, 3, 4, 5]).await;
    Mock::given(method("POST"))
        .and(path("/contoso/p1/_apis/wit/workitemsbatch"))
        .respond_with(list(json!([item(1, "Fabrikam"), item(2, "Fabrikam")])))
        .expect(1)
        .mount(&server)
        .await;
    let engine = make_engine(&server).await;
    seed_project(&engine, "p1", "Fabrikam", true).await;

    let options = SyncOptions {
        first_batch_only: true,
        ..SyncOptions::default()
    };
    let tally = engine.sync_work_items(options).await.unwrap();
    assert_eq!(tally.inserted, 2);
}

#[tokio::test]
async fn first_batch_run_does_not_advance_resume_point() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contoso/p1/_apis/wit/wiql"))
        .and(body_string_contains("ChangedDate"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    mount_wiql(&server, "p1", &[1, 2, 3, 4, 5]).await;
    Mock::given(method("POST"))
        .and(path("/contoso/p1/_apis/wit/workitemsbatch"))
        .and(body_string_contains("[1,2]"))
        .respond_with(list(json!([item(1, "Fabrikam"), item(2, "Fabrikam")])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/contoso/p1/_apis/wit/workitemsbatch"))
        .and(body_string_contains("[3,4]"))
        .respond_with(list(json!([item(3, "Fabrikam"), item(4, "Fabrikam")])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/contoso/p1/_apis/wit/workitemsbatch"))
        .and(body_string_contains("[5]"))
        .respond_with(list(json!([item(5, "Fabrikam")])))
        .mount(&server)
        .await;
    let engine = make_engine(&server).await;
    seed_project(&engine, "p1", "Fabrikam", true).await;

    let smoke = SyncOptions {
        first_batch_only: true,
        ..SyncOptions::default()
    };
    let tally = engine.sync_work_items(smoke).await.unwrap();
    assert_eq!(tally.inserted, 2);
    let checkpoint = engine
        .store
        .get_checkpoint("work_items", Some("p1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::Partial);
    assert_eq!(checkpoint.last_sync_at, None);

    let tally = engine.sync_work_items(SyncOptions::default()).await.unwrap();
    assert_eq!(tally.inserted, 3);
    assert_eq!(tally.updated, 2);
    assert_eq!(engine.store.list_work_items("p1").await.unwrap().len(), 5);
    let checkpoint = engine
        .store
        .get_checkpoint("work_items", Some("p1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.sync_type, SyncType::Full);
    assert_eq!(checkpoint.status, CheckpointStatus::Success);
    assert!(checkpoint.last_sync_at.is_some());
}

#[tokio::test]
async fn first_batch_run_keeps_previous_sync_time() {
    let server = MockServer::start().await;
    mount_wiql(&server, "p1", &[1]).await;
    mount_work_items(&server, "p1", json!([item(1, "Fabrikam")])).await;
    let engine = make_engine(&server).await;
    seed_project(&engine, "p1", "Fabrikam", true).await;
    record_work_item_checkpoint(&engine, CheckpointStatus::Success, 1_704_067_200).await;

    let smoke = SyncOptions {
        first_batch_only: true,
        ..SyncOptions::default()
    };
    engine.sync_work_items(smoke).await.unwrap();

    let checkpoint = engine
        .store
        .get_checkpoint("work_items", Some("p1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::Partial);
    assert_eq!(checkpoint.last_sync_at, Some(1_704_067_200));
}

#[tokio::test]
async fn failed_work_item_step_reports_finished_projects() {
    let server = MockServer::start().await;
    mount_wiql(&server, "p1", &[1]).await;
    mount_work_items(&server, "p1", json!([item(1, "Fabrikam")])).await;
    Mock::given(method("POST"))
        .and(path("/contoso/p2/_apis/wit/wiql"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad query"))
        .mount(&server)
        .await;
    let engine = make_engine(&server).await;
    seed_project(&engine, "p1", "Fabrikam", true).await;
    seed_project(&engine, "p2", "Tailspin", true).await;

    let summary = engine
        .sync_selected(&[SyncResource::WorkItems], SyncOptions::default())
        .await;
    assert!(!summary.success);
    assert_eq!(summary.steps.len(), 1);
    let step = &summary.steps[0];
    assert!(!step.success);
    assert_eq!(step.tally.inserted, 1);
    assert!(step.error.is_some());

    let p1 = engine
        .store
        .get_checkpoint("work_items", Some("p1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(p1.status, CheckpointStatus::Success);
    let p2 = engine
        .store
        .get_checkpoint("work_items", Some("p2"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(p2.status, CheckpointStatus::Failed);
}

#[tokio::test]
async fn malformed_work_item_is_counted_not_fatal() {
    let server = MockServer::start().await;
    mount_wiql(&server, "p1", &[1, 2]).await;
    mount_work_items(
        &server,
        "p1",
        json!([
            { "id": 1, "fields": { "System.ChangedDate": "yesterday" } },
            item(2, "Fabrikam")
        ]),
    )
    .await;
    let engine = make_engine(&server).await;
    seed_project(&engine, "p1", "Fabrikam", true).await;

    let tally = engine.sync_work_items(SyncOptions::default()).await.unwrap();
    assert_eq!(tally.inserted, 1);
    assert_eq!(tally.errors, 1);
    assert!(engine.store.get_work_item(1).await.unwrap().is_none());
}

#[tokio::test]
async fn strict_team_scope_skips_items_outside_active_team_iterations() {
    let server = MockServer::start().await;
    mount_wiql(&server, "p1", &[1, 3]).await;
    mount_work_items(
        &server,
        "p1",
        json!([item(1, "Fabrikam\\S1"), item(3, "Fabrikam\\S3")]),
    )
    .await;
    let engine = make_engine(&server)
        .await
        .with_team_scope(TeamScopePolicy::RequireActiveTeamIteration);
    seed_project(&engine, "p1", "Fabrikam", true).await;
    seed_team(&engine, "T1", "p1").await;
    seed_team_iteration(&engine, "T1", "S1", false).await;
    seed_team_iteration(&engine, "T1", "S3", true).await;

    let tally = engine.sync_work_items(SyncOptions::default()).await.unwrap();
    assert_eq!(tally.inserted, 1);
    assert_eq!(tally.skipped, 1);
    let kept = engine.store.get_work_item(3).await.unwrap().unwrap();
    assert_eq!(kept.team_iteration_id.as_deref(), Some("T1-S3"));
}

#[tokio::test]
async fn default_team_scope_keeps_items_with_inactive_team_iteration() {
    let server = MockServer::start().await;
    mount_wiql(&server, "p1", &[1]).await;
    mount_work_items(&server, "p1", json!([item(1, "Fabrikam\\S1")])).await;
    let engine = make_engine(&server).await;
    seed_project(&engine, "p1", "Fabrikam", true).await;
    seed_team(&engine, "T1", "p1").await;
    seed_team_iteration(&engine, "T1", "S1", false).await;

    let tally = engine.sync_work_items(SyncOptions::default()).await.unwrap();
    assert_eq!(tally.inserted, 1);
    let kept = engine.store.get_work_item(1).await.unwrap().unwrap();
    assert_eq!(kept.team_iteration_id.as_deref(), Some("T1-S1"));
}

#[tokio::test]
async fn run_stops_at_first_failed_step() {
    let server = MockServer::start().await;
    mount_projects(&server, json!([well_formed("p1", "Fabrikam")])).await;
    Mock::given(method("GET"))
        .and(path("/contoso/_apis/graph/users"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/contoso/_apis/teams"))
        .respond_with(list(json!([])))
        .expect(0)
        .mount(&server)
        .await;
    let progress = Arc::new(RecordingProgress::default());
    let engine = make_engine(&server).await.with_progress(progress.clone());

    let summary = engine.sync_all(SyncOptions::default()).await;
    assert!(!summary.success);
    assert_eq!(summary.state, SyncState::Failed);
    assert_eq!(summary.steps.len(), 2);
    assert!(summary.steps[0].success);
    assert_eq!(summary.steps[0].tally.inserted, 1);
    assert!(!summary.steps[1].success);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].starts_with("users:"));

    assert_eq!(
        progress.calls(),
        ["init:projects", "complete:projects", "init:users", "fail:users"]
    );
    let users = engine.store.get_checkpoint("users", None).await.unwrap().unwrap();
    assert_eq!(users.status, CheckpointStatus::Failed);
    assert!(engine.store.get_checkpoint("teams", None).await.unwrap().is_none());
    assert!(engine.store.get_project("p1").await.unwrap().is_some());
}

#[test]
fn resources_parse_from_cli_and_path_names() {
    assert_eq!(SyncResource::parse("work-items"), Some(SyncResource::WorkItems));
    assert_eq!(SyncResource::parse("team_iterations"), Some(SyncResource::TeamIterations));
    assert_eq!(SyncResource::parse("Projects"), Some(SyncResource::Projects));
    assert_eq!(SyncResource::parse("sprints"), None);
    assert_eq!(SyncResource::WorkItems.table_name(), "work_items");
}
