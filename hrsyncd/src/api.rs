//! JSON HTTP surface over the sync engine and identity reconciler.
//!
//! Every response is `{"success": bool, "data"?: ..., "error"?: "..."}`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::identity::{IdentityError, IdentitySpace, Reconciler};
use crate::store::{InatechEmployee, NewMapping};
use crate::sync::{SyncEngine, SyncError, SyncOptions, SyncResource, SyncSummary};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
    pub reconciler: Arc<Reconciler>,
    /// Defaults for runs; query parameters override per request.
    pub options: SyncOptions,
    /// Held for the duration of a run. A second run is refused, not queued.
    pub run_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(engine: SyncEngine, reconciler: Reconciler, options: SyncOptions) -> Self {
        Self {
            engine: Arc::new(engine),
            reconciler: Arc::new(reconciler),
            options,
            run_lock: Arc::new(Mutex::new(())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::BambooNotConfigured => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::UnknownEmployee(_) => ApiError::NotFound(err.to_string()),
            IdentityError::Store(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Envelope::<()> {
            success: false,
            data: None,
            error: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        data: Some(data),
        error: None,
    })
}

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

#[derive(Debug, Default, Deserialize)]
struct RunParams {
    #[serde(default)]
    first_batch_only: bool,
    depth: Option<u32>,
    #[serde(default)]
    full: bool,
}

impl RunParams {
    fn apply(&self, defaults: SyncOptions) -> SyncOptions {
        SyncOptions {
            iteration_depth: self.depth.filter(|depth| *depth > 0).unwrap_or(defaults.iteration_depth),
            first_batch_only: self.first_batch_only || defaults.first_batch_only,
            force_full: self.full || defaults.force_full,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SpaceParams {
    space: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TimeOffParams {
    start: String,
    end: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sync/all", post(sync_all))
        .route("/api/sync/status", get(sync_status))
        .route("/api/sync/clear-cache", post(clear_cache))
        .route("/api/sync/:resource", post(sync_resource))
        .route("/api/bamboo/employees", post(sync_bamboo_employees))
        .route("/api/bamboo/time-off", post(sync_time_off))
        .route("/api/identity/employees", post(register_employees))
        .route("/api/identity/mappings", post(create_mappings))
        .route("/api/identity/:inatech_id/suggestions", get(suggestions))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A failed run is still a 200: the summary says which step failed.
fn summary_response(summary: SyncSummary) -> Json<Envelope<SyncSummary>> {
    let error = (!summary.success).then(|| summary.errors.join("; "));
    Json(Envelope {
        success: summary.success,
        data: Some(summary),
        error,
    })
}

fn busy() -> ApiError {
    ApiError::Conflict("a sync is already running".to_string())
}

async fn sync_all(
    State(state): State<AppState>,
    Query(params): Query<RunParams>,
) -> Result<Json<Envelope<SyncSummary>>, ApiError> {
    let _guard = state.run_lock.try_lock().map_err(|_| busy())?;
    let summary = state.engine.sync_all(params.apply(state.options)).await;
    Ok(summary_response(summary))
}

async fn sync_resource(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(params): Query<RunParams>,
) -> Result<Json<Envelope<SyncSummary>>, ApiError> {
    let resource = SyncResource::parse(&resource)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown resource `{resource}`")))?;
    let _guard = state.run_lock.try_lock().map_err(|_| busy())?;
    let summary = state
        .engine
        .sync_selected(&[resource], params.apply(state.options))
        .await;
    Ok(summary_response(summary))
}

async fn sync_status(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let checkpoints = state.engine.status().await?;
    let running = state.run_lock.try_lock().is_err();
    Ok(ok(json!({ "running": running, "checkpoints": checkpoints })))
}

async fn clear_cache(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let cleared = state.engine.clear_cache().await;
    Ok(ok(json!({ "cleared": cleared })))
}

async fn sync_bamboo_employees(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let _guard = state.run_lock.try_lock().map_err(|_| busy())?;
    let tally = state.engine.sync_bamboo_employees().await?;
    Ok(ok(json!({ "tally": tally })))
}

async fn sync_time_off(
    State(state): State<AppState>,
    Query(params): Query<TimeOffParams>,
) -> ApiResult<serde_json::Value> {
    let _guard = state.run_lock.try_lock().map_err(|_| busy())?;
    let tally = state.engine.sync_time_off(&params.start, &params.end).await?;
    Ok(ok(json!({ "tally": tally })))
}

async fn register_employees(
    State(state): State<AppState>,
    Json(employees): Json<Vec<InatechEmployee>>,
) -> ApiResult<serde_json::Value> {
    for employee in &employees {
        state.reconciler.register_employee(employee).await?;
    }
    info!(count = employees.len(), "roster employees registered");
    Ok(ok(json!({ "registered": employees.len() })))
}

async fn create_mappings(
    State(state): State<AppState>,
    Json(requests): Json<Vec<NewMapping>>,
) -> ApiResult<crate::identity::BulkMappingReport> {
    let report = state.reconciler.create_mappings(&requests).await?;
    Ok(ok(report))
}

async fn suggestions(
    State(state): State<AppState>,
    Path(inatech_id): Path<i64>,
    Query(params): Query<SpaceParams>,
) -> ApiResult<Vec<crate::identity::Suggestion>> {
    let space = match params.space.as_deref() {
        None => IdentitySpace::Bamboo,
        Some(value) => IdentitySpace::parse(value)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown identity space `{value}`")))?,
    };
    Ok(ok(state.reconciler.suggest_matches(inatech_id, space).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use axum::body::Body;
    use axum::http::Request;
    use azdo_core::{ClientConfig, DevOpsClient};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_state(server: &MockServer) -> AppState {
        let store = Store::in_memory().await;
        let client =
            DevOpsClient::with_config(ClientConfig::new("contoso", "pat").with_base_url(&server.uri()))
                .unwrap();
        let engine = SyncEngine::new(client, store.clone()).with_team_delay(Duration::ZERO);
        AppState::new(engine, Reconciler::new(store), SyncOptions::default())
    }

    async fn send(state: AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        let response = build_router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn status_lists_checkpoints() {
        let server = MockServer::start().await;
        let (status, body) = send(test_state(&server).await, "GET", "/api/sync/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["running"], false);
        assert_eq!(body["data"]["checkpoints"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn projects_sync_returns_summary() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/contoso/_apis/projects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "count": 1,
                "value": [{ "id": "p1", "name": "Fabrikam", "state": "wellFormed" }]
            })))
            .mount(&server)
            .await;

        let (status, body) =
            send(test_state(&server).await, "POST", "/api/sync/projects", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["state"], "done");
        assert_eq!(body["data"]["steps"][0]["resource"], "projects");
        assert_eq!(body["data"]["steps"][0]["tally"]["inserted"], 1);
    }

    #[tokio::test]
    async fn unknown_resource_is_bad_request() {
        let server = MockServer::start().await;
        let (status, body) =
            send(test_state(&server).await, "POST", "/api/sync/sprints", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "unknown resource `sprints`");
    }

    #[tokio::test]
    async fn concurrent_run_is_refused() {
        let server = MockServer::start().await;
        let state = test_state(&server).await;
        let _running = state.run_lock.clone().lock_owned().await;

        let (status, body) = send(state, "POST", "/api/sync/all", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "a sync is already running");
    }

    #[tokio::test]
    async fn bamboo_without_configuration_is_bad_request() {
        let server = MockServer::start().await;
        let (status, _) =
            send(test_state(&server).await, "POST", "/api/bamboo/employees", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn identity_endpoints_register_suggest_and_map() {
        let server = MockServer::start().await;
        let state = test_state(&server).await;

        let (status, body) = send(
            state.clone(),
            "POST",
            "/api/identity/employees",
            Some(serde_json::json!([
                { "id": 5, "name": "John Smith", "email": null, "is_active": true }
            ])),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["registered"], 1);

        let (status, body) = send(
            state.clone(),
            "GET",
            "/api/identity/5/suggestions?space=devops",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], serde_json::json!([]));

        let (status, _) = send(
            state.clone(),
            "GET",
            "/api/identity/5/suggestions?space=ldap",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(state.clone(), "GET", "/api/identity/77/suggestions", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            state,
            "POST",
            "/api/identity/mappings",
            Some(serde_json::json!([
                { "inatech_employee_id": 5, "devops_descriptor": "aad.john" },
                { "inatech_employee_id": 5, "devops_descriptor": "aad.other" }
            ])),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["created"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"]["failures"][0]["index"], 1);
        assert_eq!(
            body["data"]["failures"][0]["reason"],
            "employee 5 is already mapped to a devops user"
        );
    }
}
