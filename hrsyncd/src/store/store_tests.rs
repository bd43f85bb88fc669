use super::*;

fn project(id: &str, state: &str) -> ProjectInput {
    ProjectInput {
        id: id.into(),
        name: format!("Project {id}"),
        description: None,
        state: state.into(),
        last_update_time: None,
    }
}

fn team(id: &str, project_id: &str) -> TeamRecord {
    TeamRecord {
        id: id.into(),
        name: format!("Team {id}"),
        description: None,
        project_id: project_id.into(),
    }
}

fn iteration(identifier: &str, path: &str, node_id: i64) -> IterationInput {
    IterationInput {
        identifier: identifier.into(),
        node_id: Some(node_id),
        name: path.rsplit('\\').next().unwrap_or(path).into(),
        path: path.into(),
        start_date: None,
        finish_date: None,
        time_frame: None,
        attributes: None,
        project_id: "p1".into(),
    }
}

fn team_iteration(team_id: &str, iteration_id: &str, path: &str) -> TeamIterationInput {
    TeamIterationInput {
        id: format!("{team_id}-{iteration_id}"),
        team_id: team_id.into(),
        iteration_id: iteration_id.into(),
        name: iteration_id.into(),
        path: Some(path.into()),
        start_date: None,
        finish_date: None,
        time_frame: None,
        assigned: true,
    }
}

#[tokio::test]
async fn upsert_project_reports_insert_then_update() {
    let store = Store::in_memory().await;

    assert_eq!(
        store.upsert_project(&project("p1", "wellFormed")).await.unwrap(),
        Upserted::Inserted
    );
    let mut changed = project("p1", "wellFormed");
    changed.name = "Renamed".into();
    assert_eq!(store.upsert_project(&changed).await.unwrap(), Upserted::Updated);

    let stored = store.get_project("p1").await.unwrap().unwrap();
    assert_eq!(stored.name, "Renamed");
    assert_eq!(store.list_projects().await.unwrap().len(), 1);
}

#[tokio::test]
async fn upsert_keeps_local_active_flag() {
    let store = Store::in_memory().await;
    store.upsert_project(&project("p1", "wellFormed")).await.unwrap();
    store.set_project_active("p1", false).await.unwrap();

    store.upsert_project(&project("p1", "wellFormed")).await.unwrap();

    let stored = store.get_project("p1").await.unwrap().unwrap();
    assert!(!stored.is_active);
    assert!(!stored.is_processable());
    assert!(store.list_active_projects().await.unwrap().is_empty());
}

#[tokio::test]
async fn processable_requires_well_formed_state() {
    let store = Store::in_memory().await;
    store.upsert_project(&project("p1", "createPending")).await.unwrap();
    let stored = store.get_project("p1").await.unwrap().unwrap();
    assert!(stored.is_active);
    assert!(!stored.is_processable());
}

#[tokio::test]
async fn global_checkpoint_is_never_duplicated() {
    let store = Store::in_memory().await;
    for synced_at in [100, 200] {
        store
            .record_checkpoint(&CheckpointUpdate {
                table_name: "projects",
                project_id: None,
                sync_type: SyncType::Full,
                status: CheckpointStatus::Success,
                records_processed: 3,
                error_message: None,
                synced_at,
            })
            .await
            .unwrap();
    }

    let all = store.list_checkpoints().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].project_id, None);
    assert_eq!(all[0].last_sync_at, Some(200));
}

#[tokio::test]
async fn failed_checkpoint_keeps_previous_sync_time() {
    let store = Store::in_memory().await;
    let success = CheckpointUpdate {
        table_name: "work_items",
        project_id: Some("p1"),
        sync_type: SyncType::Full,
        status: CheckpointStatus::Success,
        records_processed: 10,
        error_message: None,
        synced_at: 1_000,
    };
    store.record_checkpoint(&success).await.unwrap();
    store
        .record_checkpoint(&CheckpointUpdate {
            sync_type: SyncType::Incremental,
            status: CheckpointStatus::Failed,
            records_processed: 0,
            error_message: Some("boom"),
            synced_at: 2_000,
            ..success
        })
        .await
        .unwrap();

    let checkpoint = store
        .get_checkpoint("work_items", Some("p1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::Failed);
    assert_eq!(checkpoint.last_sync_at, Some(1_000));
    assert_eq!(checkpoint.error_message.as_deref(), Some("boom"));
    assert!(store.get_checkpoint("work_items", None).await.unwrap().is_none());
}

#[tokio::test]
async fn first_in_progress_checkpoint_has_no_sync_time() {
    let store = Store::in_memory().await;
    store
        .record_checkpoint(&CheckpointUpdate {
            table_name: "teams",
            project_id: None,
            sync_type: SyncType::Full,
            status: CheckpointStatus::InProgress,
            records_processed: 0,
            error_message: None,
            synced_at: 50,
        })
        .await
        .unwrap();
    let checkpoint = store.get_checkpoint("teams", None).await.unwrap().unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::InProgress);
    assert_eq!(checkpoint.last_sync_at, None);
}

#[tokio::test]
async fn active_paths_union_iterations_and_team_iterations() {
    let store = Store::in_memory().await;
    store.upsert_team(&team("t1", "p1")).await.unwrap();
    store
        .upsert_iteration(&iteration("i1", "P\\Sprint 1", 11))
        .await
        .unwrap();
    store
        .upsert_iteration(&iteration("i2", "P\\Sprint 2", 12))
        .await
        .unwrap();
    store.set_iteration_active("i2", false).await.unwrap();
    store
        .upsert_team_iteration(&team_iteration("t1", "i1", "P\\Sprint 1"))
        .await
        .unwrap();
    store
        .upsert_team_iteration(&team_iteration("t1", "i3", "P\\Sprint 3"))
        .await
        .unwrap();

    let paths: Vec<_> = store
        .active_iteration_paths("p1")
        .await
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(paths, vec!["P\\Sprint 1".to_string(), "P\\Sprint 3".to_string()]);
}

#[tokio::test]
async fn resolve_iteration_prefers_node_id_then_path() {
    let store = Store::in_memory().await;
    store
        .upsert_iteration(&iteration("i1", "P\\Sprint 1", 11))
        .await
        .unwrap();

    let by_node = store.resolve_iteration("p1", Some(11), None).await.unwrap();
    assert_eq!(by_node.as_deref(), Some("i1"));
    let by_path = store
        .resolve_iteration("p1", Some(99), Some("P\\Sprint 1"))
        .await
        .unwrap();
    assert_eq!(by_path.as_deref(), Some("i1"));
    assert!(store
        .resolve_iteration("p1", None, Some("P\\Nope"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn unassigned_rows_are_flagged_not_deleted() {
    let store = Store::in_memory().await;
    store
        .upsert_team_iteration(&team_iteration("t1", "i1", "P\\Sprint 1"))
        .await
        .unwrap();
    store
        .upsert_team_iteration(&team_iteration("t1", "i2", "P\\Sprint 2"))
        .await
        .unwrap();

    let changed = store
        .mark_unassigned_except("t1", &["t1-i1".to_string()])
        .await
        .unwrap();

    assert_eq!(changed, 1);
    let rows = store.list_team_iterations("t1").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].assigned);
    assert!(!rows[1].assigned);
}

#[tokio::test]
async fn team_iteration_upsert_keeps_active_flag() {
    let store = Store::in_memory().await;
    let input = team_iteration("t1", "i1", "P\\Sprint 1");
    store.upsert_team_iteration(&input).await.unwrap();
    store.set_team_iteration_active("t1-i1", false).await.unwrap();

    assert_eq!(
        store.upsert_team_iteration(&input).await.unwrap(),
        Upserted::Updated
    );
    let row = store.get_team_iteration("t1-i1").await.unwrap().unwrap();
    assert!(!row.is_active);
}

#[tokio::test]
async fn work_item_round_trips_nullable_fields() {
    let store = Store::in_memory().await;
    let item = WorkItemRecord {
        id: 42,
        title: Some("Fix login".into()),
        story_points: Some(3.0),
        custom_fields: Some(r#"{"Custom.Billable":true}"#.into()),
        project_id: "p1".into(),
        ..WorkItemRecord::default()
    };
    assert_eq!(store.upsert_work_item(&item).await.unwrap(), Upserted::Inserted);
    assert_eq!(store.upsert_work_item(&item).await.unwrap(), Upserted::Updated);

    let stored = store.get_work_item(42).await.unwrap().unwrap();
    assert_eq!(stored, item);
    assert_eq!(store.count_work_items().await.unwrap(), 1);
}

#[tokio::test]
async fn mapping_columns_are_unique() {
    let store = Store::in_memory().await;
    store
        .link_mapping(&NewMapping {
            inatech_employee_id: 5,
            bamboo_employee_id: Some(9),
            devops_descriptor: None,
        })
        .await
        .unwrap();

    let duplicate = store
        .link_mapping(&NewMapping {
            inatech_employee_id: 6,
            bamboo_employee_id: Some(9),
            devops_descriptor: None,
        })
        .await;
    assert!(matches!(duplicate, Err(StoreError::Sqlx(_))));

    let found = store.mapping_for_bamboo(9).await.unwrap().unwrap();
    assert_eq!(found.inatech_employee_id, 5);
    assert!(store.mapping_for_inatech(6).await.unwrap().is_none());
}

#[tokio::test]
async fn linking_fills_empty_columns_only() {
    let store = Store::in_memory().await;
    let first = store
        .link_mapping(&NewMapping {
            inatech_employee_id: 5,
            bamboo_employee_id: Some(9),
            devops_descriptor: None,
        })
        .await
        .unwrap();

    let linked = store
        .link_mapping(&NewMapping {
            inatech_employee_id: 5,
            bamboo_employee_id: Some(10),
            devops_descriptor: Some("aad.john".into()),
        })
        .await
        .unwrap();
    assert_eq!(linked.id, first.id);
    assert_eq!(linked.created_at, first.created_at);
    assert_eq!(linked.bamboo_employee_id, Some(9));
    assert_eq!(linked.devops_descriptor.as_deref(), Some("aad.john"));
    assert_eq!(store.list_mappings().await.unwrap().len(), 1);
}

#[tokio::test]
async fn file_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("hrsync.db").display());

    let store = Store::connect(&url).await.unwrap();
    store.upsert_project(&project("p1", "wellFormed")).await.unwrap();
    store.set_project_active("p1", false).await.unwrap();
    store.pool().close().await;

    let reopened = Store::connect(&url).await.unwrap();
    let stored = reopened.get_project("p1").await.unwrap().unwrap();
    assert!(!stored.is_active);
}

#[tokio::test]
async fn response_cache_is_shared_between_handles() {
    use azdo_core::{CacheKey, ResponseCache};
    use std::time::Duration;

    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("hrsync.db").display());
    let server = SqliteCache::new(Store::connect(&url).await.unwrap(), Duration::from_secs(60));
    let cli = SqliteCache::new(Store::connect(&url).await.unwrap(), Duration::from_secs(60));

    let key = CacheKey::new("projects", "https://dev.azure.com/contoso");
    server.put(key.clone(), "[]".into()).await;
    assert_eq!(cli.get(&key).await.as_deref(), Some("[]"));
    assert_eq!(cli.len().await, 1);

    assert_eq!(cli.clear().await, 1);
    assert!(server.get(&key).await.is_none());
    assert_eq!(server.len().await, 0);
}

#[tokio::test]
async fn expired_responses_are_purged_on_write() {
    let store = Store::in_memory().await;
    store
        .put_cached_response("teams", "old", "[]", 100, 50)
        .await
        .unwrap();
    assert_eq!(store.cached_response("teams", "old", 99).await.unwrap().as_deref(), Some("[]"));
    assert_eq!(store.cached_response("teams", "old", 100).await.unwrap(), None);

    store
        .put_cached_response("teams", "new", "[1]", 500, 200)
        .await
        .unwrap();
    assert_eq!(store.count_cached_responses(0).await.unwrap(), 1);
    assert_eq!(store.clear_cached_responses().await.unwrap(), 1);
}

#[tokio::test]
async fn zero_ttl_cache_stores_nothing() {
    use azdo_core::{CacheKey, ResponseCache};

    let cache = SqliteCache::new(Store::in_memory().await, std::time::Duration::ZERO);
    let key = CacheKey::new("teams", "org");
    cache.put(key.clone(), "[]".into()).await;
    assert!(cache.get(&key).await.is_none());
}
