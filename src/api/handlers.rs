use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::AppState;
use crate::crawler::{JobScheduler, DEFAULT_LOG_LIMIT};
use crate::error::{HarvestError, HarvestResult};
use crate::storage::{ConfigFilter, NewScraperConfig, SourceKind};

#[derive(Debug, Default, Deserialize)]
pub struct ScraperQuery {
    pub action: Option<String>,
    pub process_id: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScraperCommand {
    pub action: Option<String>,
    pub config_id: Option<i64>,
    pub process_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigQuery {
    pub action: Option<String>,
    pub id: Option<i64>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigCommand {
    pub action: Option<String>,
    pub id: Option<i64>,
    pub config: Option<NewScraperConfig>,
}

fn failure(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "success": false, "message": message.into() }))
}

/// Domain failures are reported in the body; the status code stays 200
fn reply(result: HarvestResult<Value>) -> Json<Value> {
    match result {
        Ok(Value::Object(mut body)) => {
            body.insert("success".to_string(), Value::Bool(true));
            Json(Value::Object(body))
        }
        Ok(other) => Json(json!({ "success": true, "data": other })),
        Err(e) => {
            debug!("Control API request failed: {}", e);
            failure(e.to_string())
        }
    }
}

fn required<T>(value: Option<T>, name: &str) -> HarvestResult<T> {
    value.ok_or_else(|| HarvestError::Configuration(format!("{} is required", name)))
}

fn to_value<T: serde::Serialize>(value: T) -> HarvestResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| HarvestError::Configuration(format!("failed to encode response: {}", e)))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "success": true, "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

pub async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "success": false, "message": "Method not allowed" })),
    )
        .into_response()
}

/// `GET /scraper?action=get_process|get_logs|get_running`
pub async fn scraper_query(
    State(state): State<AppState>,
    query: Result<Query<ScraperQuery>, QueryRejection>,
) -> Json<Value> {
    match query {
        Ok(Query(query)) => reply(dispatch_scraper_query(&state.scheduler, &query).await),
        Err(rejection) => failure(rejection.body_text()),
    }
}

async fn dispatch_scraper_query(scheduler: &JobScheduler, query: &ScraperQuery) -> HarvestResult<Value> {
    match query.action.as_deref() {
        Some("get_process") => {
            let job_id = required(query.process_id.as_deref(), "process_id")?;
            let details = scheduler.get_process_details(job_id).await?;
            Ok(json!({ "process": to_value(details)? }))
        }
        Some("get_logs") => {
            let job_id = required(query.process_id.as_deref(), "process_id")?;
            let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
            let logs = scheduler.get_process_logs(job_id, limit).await?;
            Ok(json!({ "logs": to_value(logs)? }))
        }
        Some("get_running") => {
            let processes = scheduler.get_running_processes().await?;
            Ok(json!({ "processes": to_value(processes)? }))
        }
        other => Err(unknown_action(other)),
    }
}

/// `POST /scraper {action: start|stop}`
pub async fn scraper_command(
    State(state): State<AppState>,
    body: Result<Json<ScraperCommand>, JsonRejection>,
) -> Json<Value> {
    match body {
        Ok(Json(command)) => reply(dispatch_scraper_command(&state.scheduler, &command).await),
        Err(rejection) => failure(rejection.body_text()),
    }
}

async fn dispatch_scraper_command(scheduler: &JobScheduler, command: &ScraperCommand) -> HarvestResult<Value> {
    match command.action.as_deref() {
        Some("start") => {
            let config_id = required(command.config_id, "config_id")?;
            to_value(scheduler.start_scraper(config_id).await?)
        }
        Some("stop") => {
            let job_id = required(command.process_id.as_deref(), "process_id")?;
            to_value(scheduler.stop_scraper(job_id).await?)
        }
        other => Err(unknown_action(other)),
    }
}

/// `GET /config?action=get|list`
pub async fn config_query(
    State(state): State<AppState>,
    query: Result<Query<ConfigQuery>, QueryRejection>,
) -> Json<Value> {
    match query {
        Ok(Query(query)) => reply(dispatch_config_query(&state.scheduler, &query).await),
        Err(rejection) => failure(rejection.body_text()),
    }
}

async fn dispatch_config_query(scheduler: &JobScheduler, query: &ConfigQuery) -> HarvestResult<Value> {
    match query.action.as_deref() {
        Some("get") => {
            let id = required(query.id, "id")?;
            Ok(json!({ "config": to_value(scheduler.get_config(id).await?)? }))
        }
        Some("list") => {
            let kind = match query.kind.as_deref().filter(|k| !k.is_empty()) {
                Some(raw) => Some(raw.parse::<SourceKind>().map_err(HarvestError::Configuration)?),
                None => None,
            };
            let filter = ConfigFilter {
                kind,
                search: query.search.clone(),
            };
            Ok(json!({ "configs": to_value(scheduler.list_configs(&filter).await?)? }))
        }
        other => Err(unknown_action(other)),
    }
}

/// `POST /config {action: create|delete|duplicate}`
pub async fn config_command(
    State(state): State<AppState>,
    body: Result<Json<ConfigCommand>, JsonRejection>,
) -> Json<Value> {
    match body {
        Ok(Json(command)) => reply(dispatch_config_command(&state.scheduler, &command).await),
        Err(rejection) => failure(rejection.body_text()),
    }
}

async fn dispatch_config_command(scheduler: &JobScheduler, command: &ConfigCommand) -> HarvestResult<Value> {
    match command.action.as_deref() {
        Some("create") => {
            let new = required(command.config.as_ref(), "config")?;
            Ok(json!({ "config": to_value(scheduler.create_config(new).await?)? }))
        }
        Some("delete") => {
            let id = required(command.id, "id")?;
            scheduler.delete_config(id).await?;
            Ok(json!({ "message": format!("Config {} deleted", id) }))
        }
        Some("duplicate") => {
            let id = required(command.id, "id")?;
            Ok(json!({ "config": to_value(scheduler.duplicate_config(id).await?)? }))
        }
        other => Err(unknown_action(other)),
    }
}

fn unknown_action(action: Option<&str>) -> HarvestError {
    match action {
        Some(action) => HarvestError::Configuration(format!("Unknown action: {}", action)),
        None => HarvestError::Configuration("action is required".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{router, AppState};
    use crate::crawler::spawner::MockJobSpawner;
    use crate::crawler::JobScheduler;
    use crate::storage::configs::tests::website_config;
    use crate::storage::Database;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    const TOKEN: &str = "secret-token";

    async fn app_with(spawner: MockJobSpawner) -> (Router, Database, tempfile::TempDir) {
        let db = Database::in_memory().await;
        let dir = tempfile::tempdir().unwrap();
        let scheduler = JobScheduler::new(db.clone(), Arc::new(spawner), dir.path());
        (router(AppState::new(scheduler, TOKEN)), db, dir)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("Authorization", format!("Bearer {}", TOKEN))
            .body(Body::empty())
            .unwrap()
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Authorization", format!("Bearer {}", TOKEN))
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_missing_token_is_401() {
        let (app, _db, _dir) = app_with(MockJobSpawner::new()).await;
        let request = Request::builder()
            .uri("/scraper?action=get_running")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], json!(false));

        let wrong = Request::builder()
            .uri("/config?action=list")
            .header("Authorization", "Bearer nope")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, wrong).await.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (app, _db, _dir) = app_with(MockJobSpawner::new()).await;
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("ok"));
    }

    #[tokio::test]
    async fn test_unsupported_method_is_405() {
        let (app, _db, _dir) = app_with(MockJobSpawner::new()).await;
        let request = Request::builder()
            .method("DELETE")
            .uri("/scraper")
            .header("Authorization", format!("Bearer {}", TOKEN))
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["success"], json!(false));
    }

    #[tokio::test]
    async fn test_start_stop_and_inspect() {
        let mut spawner = MockJobSpawner::new();
        spawner.expect_spawn().returning(|_, _| Ok(777));
        spawner.expect_is_alive().returning(|_| true);
        spawner.expect_terminate().returning(|_| Ok(()));
        let (app, db, _dir) = app_with(spawner).await;
        let config = db.configs().create(&website_config("Via API")).await.unwrap();

        let (status, started) = send(&app, post("/scraper", json!({"action": "start", "config_id": config.id}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(started["success"], json!(true));
        let job_id = started["job_id"].as_str().unwrap().to_string();

        let (_, process) = send(&app, get(&format!("/scraper?action=get_process&process_id={}", job_id))).await;
        assert_eq!(process["process"]["status"], json!("running"));
        assert_eq!(process["process"]["config_name"], json!("Via API"));

        let (_, running) = send(&app, get("/scraper?action=get_running")).await;
        assert_eq!(running["processes"].as_array().unwrap().len(), 1);

        let (_, logs) = send(&app, get(&format!("/scraper?action=get_logs&process_id={}&limit=5", job_id))).await;
        assert!(!logs["logs"].as_array().unwrap().is_empty());

        let (_, stopped) = send(&app, post("/scraper", json!({"action": "stop", "process_id": job_id}))).await;
        assert_eq!(stopped["success"], json!(true));
        assert_eq!(stopped["stopped"], json!(true));

        let (_, again) = send(&app, post("/scraper", json!({"action": "stop", "process_id": "unknown"}))).await;
        assert_eq!(again["success"], json!(true));
        assert_eq!(again["stopped"], json!(false));
    }

    #[tokio::test]
    async fn test_not_found_is_structured_failure() {
        let (app, _db, _dir) = app_with(MockJobSpawner::new()).await;

        let (status, body) = send(&app, get("/scraper?action=get_process&process_id=missing")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["message"], json!("process not found: missing"));

        let (_, unknown) = send(&app, get("/config?action=explode")).await;
        assert_eq!(unknown["success"], json!(false));
    }

    #[tokio::test]
    async fn test_config_actions() {
        let (app, _db, _dir) = app_with(MockJobSpawner::new()).await;

        let (_, created) = send(
            &app,
            post("/config", json!({"action": "create", "config": website_config("Coastal")})),
        )
        .await;
        assert_eq!(created["success"], json!(true));
        let id = created["config"]["id"].as_i64().unwrap();

        let (_, copy) = send(&app, post("/config", json!({"action": "duplicate", "id": id}))).await;
        assert_eq!(copy["config"]["status"], json!("inactive"));

        let (_, listed) = send(&app, get("/config?action=list&type=website&search=coast")).await;
        assert_eq!(listed["configs"].as_array().unwrap().len(), 2);

        let (_, none) = send(&app, get("/config?action=list&type=xml")).await;
        assert!(none["configs"].as_array().unwrap().is_empty());

        let (_, deleted) = send(&app, post("/config", json!({"action": "delete", "id": id}))).await;
        assert_eq!(deleted["success"], json!(true));

        let (_, gone) = send(&app, get(&format!("/config?action=get&id={}", id))).await;
        assert_eq!(gone["success"], json!(false));

        let (_, invalid) = send(
            &app,
            post("/config", json!({"action": "create", "config": {"name": "x", "source_kind": "xml"}})),
        )
        .await;
        assert_eq!(invalid["success"], json!(false));
    }
}
