async fn mount_full_fixture(server: &MockServer) {
    mount_projects(server, json!([well_formed("p1", "Fabrikam")])).await;
    mount_users(
        server,
        json!([{ "descriptor": "aad.u1", "displayName": "Jane Doe", "origin": "aad" }]),
    )
    .await;
    mount_teams(
        server,
        json!([{ "id": "T1", "name": "Platform", "projectId": "p1" }]),
    )
    .await;
    mount_tree(
        server,
        "p1",
        json!({
            "id": 10, "identifier": "R0", "name": "Fabrikam",
            "children": [{
                "id": 11, "identifier": "I1", "name": "Sprint 1",
                "attributes": {
                    "startDate": "2024-01-01T00:00:00Z",
                    "finishDate": "2024-01-14T00:00:00Z"
                }
            }]
        }),
    )
    .await;
    mount_team_iterations(
        server,
        "p1",
        "T1",
        json!([{
            "id": "I1", "name": "Sprint 1", "path": "Fabrikam\\Sprint 1",
            "attributes": { "timeFrame": "past" }
        }]),
    )
    .await;
    mount_wiql(server, "p1", &[100]).await;
    mount_work_items(
        server,
        "p1",
        json!([{
            "id": 100,
            "rev": 4,
            "fields": {
                "System.Title": "Fix login",
                "System.IterationPath": "Fabrikam\\Sprint 1",
                "System.IterationId": 11,
                "System.AssignedTo": { "displayName": "Jane Doe", "descriptor": "aad.u1" },
                "System.ChangedBy": { "displayName": "Ghost", "descriptor": "aad.ghost" },
                "System.CreatedBy": { "displayName": "Jane Doe", "descriptor": "aad.u1" },
                "System.ChangedDate": "2024-01-05T10:00:00Z",
                "Custom.Billable": true
            }
        }]),
    )
    .await;
}

#[tokio::test]
async fn second_full_run_only_updates() {
    let server = MockServer::start().await;
    mount_full_fixture(&server).await;
    let engine = make_engine(&server).await;

    let first = engine.sync_all(SyncOptions::default()).await;
    assert!(first.success, "{:?}", first.errors);
    assert_eq!(first.state, SyncState::Done);
    let inserted: Vec<_> = first.steps.iter().map(|step| step.tally.inserted).collect();
    assert_eq!(inserted, [1, 1, 1, 2, 1, 1]);

    let second = engine.sync_all(SyncOptions::default()).await;
    assert!(second.success, "{:?}", second.errors);
    for step in &second.steps {
        assert_eq!(step.tally.inserted, 0, "{:?}", step.resource);
        assert!(step.tally.updated > 0, "{:?}", step.resource);
    }
    assert_eq!(engine.store.count_work_items().await.unwrap(), 1);
    assert_eq!(engine.status().await.unwrap().len(), 6);
}

#[tokio::test]
async fn work_item_references_are_resolved_or_nulled() {
    let server = MockServer::start().await;
    mount_full_fixture(&server).await;
    let engine = make_engine(&server).await;

    let summary = engine.sync_all(SyncOptions::default()).await;
    assert!(summary.success, "{:?}", summary.errors);

    let item = engine.store.get_work_item(100).await.unwrap().unwrap();
    assert_eq!(item.project_id, "p1");
    assert_eq!(item.iteration_id.as_deref(), Some("I1"));
    assert_eq!(item.team_iteration_id.as_deref(), Some("T1-I1"));
    assert_eq!(item.assigned_to.as_deref(), Some("aad.u1"));
    assert_eq!(item.changed_by, None);
    assert_eq!(item.created_by.as_deref(), Some("Jane Doe"));
    assert_eq!(item.changed_date, Some(1_704_448_800));
    assert_eq!(item.custom_fields.as_deref(), Some(r#"{"Custom.Billable":true}"#));
}

#[tokio::test]
async fn inactive_project_contributes_nothing() {
    let server = MockServer::start().await;
    mount_projects(
        &server,
        json!([well_formed("p1", "Fabrikam"), well_formed("p2", "Legacy")]),
    )
    .await;
    mount_teams(
        &server,
        json!([
            { "id": "T1", "name": "Platform", "projectId": "p1" },
            { "id": "T2", "name": "Archive", "projectId": "p2" }
        ]),
    )
    .await;
    mount_tree(&server, "p1", json!({ "identifier": "R0", "name": "Fabrikam" })).await;
    mount_team_iterations(&server, "p1", "T1", json!([])).await;
    mount_wiql(&server, "p1", &[]).await;
    let engine = make_engine(&server).await;

    engine.sync_projects().await.unwrap();
    engine.store.set_project_active("p2", false).await.unwrap();

    let summary = engine
        .sync_selected(
            &[
                SyncResource::WorkItems,
                SyncResource::Teams,
                SyncResource::Iterations,
                SyncResource::TeamIterations,
            ],
            SyncOptions::default(),
        )
        .await;
    assert!(summary.success, "{:?}", summary.errors);
    let order: Vec<_> = summary.steps.iter().map(|step| step.resource).collect();
    assert_eq!(
        order,
        [
            SyncResource::Teams,
            SyncResource::Iterations,
            SyncResource::TeamIterations,
            SyncResource::WorkItems,
        ]
    );
    assert_eq!(summary.steps[0].tally.skipped, 1);

    assert!(engine.store.get_team("T2").await.unwrap().is_none());
    assert!(engine.store.list_iterations("p2").await.unwrap().is_empty());
    assert!(engine.store.list_work_items("p2").await.unwrap().is_empty());
    let legacy = engine.store.get_project("p2").await.unwrap().unwrap();
    assert!(!legacy.is_active);
}

#[tokio::test]
async fn orphan_teams_are_skipped() {
    let server = MockServer::start().await;
    mount_teams(
        &server,
        json!([
            { "id": "T1", "name": "Platform", "projectId": "p1" },
            { "id": "T2", "name": "Lost", "projectId": "missing" },
            { "id": "T3", "name": "Nowhere" }
        ]),
    )
    .await;
    let engine = make_engine(&server).await;
    seed_project(&engine, "p1", "Fabrikam", true).await;

    let tally = engine.sync_teams().await.unwrap();
    assert_eq!(
        tally,
        ResourceTally {
            inserted: 1,
            updated: 0,
            skipped: 2,
            errors: 0
        }
    );
    assert_eq!(engine.store.count_teams().await.unwrap(), 1);
}

#[tokio::test]
async fn team_iteration_key_is_stable_across_runs() {
    let server = MockServer::start().await;
    mount_team_iterations(
        &server,
        "p1",
        "T1",
        json!([{ "id": "I1", "name": "Sprint 1", "path": "Fabrikam\\Sprint 1" }]),
    )
    .await;
    let engine = make_engine(&server).await;
    seed_project(&engine, "p1", "Fabrikam", true).await;
    seed_team(&engine, "T1", "p1").await;

    for _ in 0..3 {
        engine.sync_team_iterations().await.unwrap();
    }

    let rows = engine.store.list_team_iterations("T1").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, "T1-I1");
    assert_eq!(rows[0].iteration_id, "I1");
    assert!(rows[0].assigned);
}

#[tokio::test]
async fn failing_team_is_skipped_and_others_continue() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/contoso/p1/T1/_apis/work/teamsettings/iterations"))
        .respond_with(ResponseTemplate::new(404).set_body_string("team not found"))
        .mount(&server)
        .await;
    mount_team_iterations(
        &server,
        "p1",
        "T2",
        json!([{ "id": "I1", "name": "Sprint 1", "path": "Fabrikam\\Sprint 1" }]),
    )
    .await;
    let engine = make_engine(&server).await;
    seed_project(&engine, "p1", "Fabrikam", true).await;
    seed_team(&engine, "T1", "p1").await;
    seed_team(&engine, "T2", "p1").await;

    let tally = engine.sync_team_iterations().await.unwrap();
    assert_eq!(tally.errors, 1);
    assert_eq!(tally.inserted, 1);
    assert!(engine.store.get_team_iteration("T2-I1").await.unwrap().is_some());
}

#[tokio::test]
async fn dropped_sprint_is_unassigned_not_deleted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/contoso/p1/T1/_apis/work/teamsettings/iterations"))
        .respond_with(list(json!([
            { "id": "I1", "name": "Sprint 1", "path": "Fabrikam\\Sprint 1" },
            { "id": "I2", "name": "Sprint 2", "path": "Fabrikam\\Sprint 2" }
        ])))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_team_iterations(
        &server,
        "p1",
        "T1",
        json!([{ "id": "I1", "name": "Sprint 1", "path": "Fabrikam\\Sprint 1" }]),
    )
    .await;
    let engine = make_engine(&server).await;
    seed_project(&engine, "p1", "Fabrikam", true).await;
    seed_team(&engine, "T1", "p1").await;

    let first = engine.sync_team_iterations().await.unwrap();
    assert_eq!(first.inserted, 2);

    engine.clear_cache().await;
    let second = engine.sync_team_iterations().await.unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 2);

    let dropped = engine.store.get_team_iteration("T1-I2").await.unwrap().unwrap();
    assert!(!dropped.assigned);
    assert!(dropped.is_active);
}

#[tokio::test]
async fn invalid_iteration_nodes_are_counted() {
    let server = MockServer::start().await;
    mount_tree(
        &server,
        "p1",
        json!({
            "id": 10, "identifier": "R0", "name": "Fabrikam",
            "children": [
                { "id": 11, "identifier": "I1" },
                { "id": 12, "identifier": "I2", "name": "Sprint 2",
                  "attributes": { "startDate": "soon" } }
            ]
        }),
    )
    .await;
    let engine = make_engine(&server).await;
    seed_project(&engine, "p1", "Fabrikam", true).await;

    let tally = engine.sync_iterations(4).await.unwrap();
    assert_eq!(tally.inserted, 1);
    assert_eq!(tally.errors, 2);

    let stored: Vec<IterationRecord> = engine.store.list_iterations("p1").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].path, "Fabrikam");
}
