fn bamboo_client(server: &MockServer) -> BambooClient {
    let mut config = crate::bamboohr::BambooConfig::new("acme", "secret");
    config.base_url = server.uri();
    BambooClient::new(config).unwrap()
}

#[tokio::test]
async fn bamboo_sync_requires_configuration() {
    let server = MockServer::start().await;
    let engine = make_engine(&server).await;

    let err = engine.sync_bamboo_employees().await.unwrap_err();
    assert!(matches!(err, SyncError::BambooNotConfigured));
    let err = engine.sync_time_off("2024-01-01", "2024-01-31").await.unwrap_err();
    assert!(matches!(err, SyncError::BambooNotConfigured));
}

#[tokio::test]
async fn bamboo_directory_is_upserted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/acme/v1/employees/directory"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "employees": [
                { "id": "7", "displayName": "Jane Doe", "firstName": "Jane", "lastName": "Doe" },
                { "id": "n/a", "displayName": "Broken" }
            ]
        })))
        .mount(&server)
        .await;
    let engine = make_engine(&server).await.with_bamboo(bamboo_client(&server));

    let first = engine.sync_bamboo_employees().await.unwrap();
    assert_eq!(first.inserted, 1);
    assert_eq!(first.errors, 1);
    let second = engine.sync_bamboo_employees().await.unwrap();
    assert_eq!(second.updated, 1);

    let stored = engine.store.list_bamboo_employees().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].full_name(), "Jane Doe");
    let checkpoint = engine
        .store
        .get_checkpoint("bamboo_employees", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::Success);
}

#[tokio::test]
async fn time_off_for_unknown_employee_keeps_null_reference() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/acme/v1/time_off/requests/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "100", "employeeId": "7",
                "status": { "status": "approved" },
                "start": "2024-01-10", "end": "2024-01-11",
                "type": { "name": "Vacation" },
                "amount": { "unit": "days", "amount": "1.5" }
            },
            { "id": "101", "employeeId": "99", "start": "2024-01-15", "end": "2024-01-15" }
        ])))
        .mount(&server)
        .await;
    let engine = make_engine(&server).await.with_bamboo(bamboo_client(&server));
    engine
        .store
        .upsert_bamboo_employee(&BambooEmployeeRecord {
            id: 7,
            display_name: Some("Jane Doe".into()),
            first_name: None,
            last_name: None,
            work_email: None,
            job_title: None,
            department: None,
            location: None,
            status: None,
        })
        .await
        .unwrap();

    let tally = engine.sync_time_off("2024-01-01", "2024-01-31").await.unwrap();
    assert_eq!(tally.inserted, 2);

    let known = engine.store.get_time_off(100).await.unwrap().unwrap();
    assert_eq!(known.employee_id, Some(7));
    assert_eq!(known.amount, Some(1.5));
    assert_eq!(known.type_name.as_deref(), Some("Vacation"));
    assert_eq!(known.status.as_deref(), Some("approved"));
    let unknown = engine.store.get_time_off(101).await.unwrap().unwrap();
    assert_eq!(unknown.employee_id, None);
}
