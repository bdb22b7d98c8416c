//! Axum route handlers for the HIVEMIND server.
//!
//! # Routes
//!
//! - `GET    /health`                    — liveness probe
//! - `GET    /metrics`                   — Prometheus text exposition
//! - `POST   /v1/completions`            — submit a prompt, 202 + task id
//! - `GET    /v1/completions`            — list tasks (session_id, state, limit)
//! - `GET    /v1/completions/{id}`       — task status
//! - `GET    /v1/completions/{id}/result`— synthesized result, 425 until terminal
//! - `DELETE /v1/completions/{id}`       — cancel, 204 / 409 if terminal
//! - `POST   /v1/sessions`               — create session
//! - `GET    /v1/sessions/{id}`          — session + its tasks
//! - `DELETE /v1/sessions/{id}`          — end session
//! - `GET    /v1/agents`                 — agent roster with runtime state
//! - `GET    /v1/concurrency`            — dispatcher layer status
//! - `GET    /v1/ws`                     — WebSocket task stream

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::app::Application;
use crate::core::coordinator::{Task, TaskPriority, TaskState};
use crate::server::ws::ws_handler;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub app: Arc<Application>,
}

/// Build the axum router with all routes.
pub fn app_router(app: Arc<Application>) -> Router {
    let state = AppState { app };
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/completions", post(create_completion).get(list_tasks))
        .route("/v1/completions/:id", get(get_task_status).delete(cancel_task))
        .route("/v1/completions/:id/result", get(get_task_result))
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/:id", get(get_session).delete(end_session))
        .route("/v1/agents", get(list_agents))
        .route("/v1/concurrency", get(concurrency_status))
        .route("/v1/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "hivemind",
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.app.metrics.encode()
}

// ---------------------------------------------------------------------------
// Completions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    pub task_id: Uuid,
    pub state: TaskState,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct AgentResultResponse {
    pub agent_id: String,
    pub team_id: String,
    pub success: bool,
    pub execution_time: f64,
}

#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: Uuid,
    pub state: TaskState,
    pub prompt: String,
    pub priority: TaskPriority,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<f64>,
    pub target_teams: Vec<String>,
    pub target_agents: Vec<String>,
    pub keywords: Vec<String>,
    pub results: Vec<AgentResultResponse>,
    pub error: Option<String>,
    pub session_id: Option<String>,
}

impl TaskStatusResponse {
    fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            state: task.state,
            prompt: task.prompt.clone(),
            priority: task.priority,
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            duration: task.duration(),
            target_teams: task.target_teams.iter().map(|t| t.to_string()).collect(),
            target_agents: task.target_agents.clone(),
            keywords: task.keywords.clone(),
            results: task
                .results
                .iter()
                .map(|r| AgentResultResponse {
                    agent_id: r.agent_id.clone(),
                    team_id: r.team_id.clone(),
                    success: r.success,
                    execution_time: r.execution_time,
                })
                .collect(),
            error: task.error.clone(),
            session_id: task.session_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CompletionResult {
    pub task_id: Uuid,
    pub state: TaskState,
    pub prompt: String,
    pub response: Option<String>,
    pub error: Option<String>,
    pub duration: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

fn not_found(what: &str, id: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": format!("{what} not found: {id}")})),
    )
}

/// POST /v1/completions — accept a prompt and process it in the background.
async fn create_completion(
    State(state): State<AppState>,
    Json(request): Json<CompletionRequest>,
) -> Result<(StatusCode, Json<CompletionResponse>), (StatusCode, Json<Value>)> {
    if request.prompt.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "prompt must not be empty"})),
        ));
    }

    let priority = request.priority.unwrap_or_default();
    let task = state.app.coordinator.create_task(
        &request.prompt,
        priority,
        request.session_id.clone(),
        request.user_id.clone(),
        None,
    );
    let task_id = task.read().id;

    tracing::info!(task_id = %task_id, session_id = ?request.session_id, "task created via API");

    let app = state.app.clone();
    tokio::spawn(async move {
        app.process_existing_task(task).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(CompletionResponse {
            task_id,
            state: TaskState::Pending,
            message: "Task submitted successfully".to_string(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub session_id: Option<String>,
    pub state: Option<TaskState>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// GET /v1/completions — list tasks, optionally filtered.
async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Json<Vec<TaskStatusResponse>> {
    let coordinator = &state.app.coordinator;
    let tasks = if let Some(session_id) = &query.session_id {
        coordinator.get_tasks_by_session(session_id)
    } else if let Some(task_state) = query.state {
        coordinator.get_tasks_by_state(task_state)
    } else {
        coordinator.get_all_tasks()
    };

    let mut responses: Vec<TaskStatusResponse> = tasks
        .iter()
        .map(|t| TaskStatusResponse::from_task(&t.read()))
        .collect();
    responses.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    responses.truncate(query.limit);
    Json(responses)
}

/// GET /v1/completions/{id} — task status.
async fn get_task_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskStatusResponse>, (StatusCode, Json<Value>)> {
    let task = state
        .app
        .coordinator
        .get_task(id)
        .ok_or_else(|| not_found("Task", id))?;
    let response = TaskStatusResponse::from_task(&task.read());
    Ok(Json(response))
}

/// GET /v1/completions/{id}/result — synthesized response; 425 until the
/// task reaches a terminal state.
async fn get_task_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CompletionResult>, (StatusCode, Json<Value>)> {
    let task = state
        .app
        .coordinator
        .get_task(id)
        .ok_or_else(|| not_found("Task", id))?;
    let task = task.read();

    if !task.is_complete() {
        return Err((
            StatusCode::TOO_EARLY,
            Json(json!({"error": format!("Task not yet complete: {}", task.state.as_str())})),
        ));
    }

    Ok(Json(CompletionResult {
        task_id: task.id,
        state: task.state,
        prompt: task.prompt.clone(),
        response: if task.error.is_some() {
            None
        } else {
            task.synthesized_response.clone()
        },
        error: task.error.clone(),
        duration: task.duration(),
        created_at: task.created_at,
        completed_at: task.completed_at,
    }))
}

/// DELETE /v1/completions/{id} — cancel; 409 when already terminal.
async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    let task = state
        .app
        .coordinator
        .get_task(id)
        .ok_or_else(|| not_found("Task", id))?;

    if task.read().is_complete() {
        let state_name = task.read().state.as_str();
        return Err((
            StatusCode::CONFLICT,
            Json(json!({"error": format!("Task already complete: {state_name}")})),
        ));
    }

    if state.app.coordinator.cancel_task(id).await {
        tracing::info!(task_id = %id, "task cancelled via API");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Failed to cancel task"})),
        ))
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// POST /v1/sessions.
async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let session = state
        .app
        .repository
        .create_session(
            request.user_id.as_deref(),
            request.metadata.unwrap_or_else(|| json!({})),
        )
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
        })?;
    Ok((StatusCode::CREATED, Json(json!(session))))
}

/// GET /v1/sessions/{id} — session plus its tasks.
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let session = state
        .app
        .repository
        .get_session(&id)
        .await
        .ok()
        .flatten()
        .ok_or_else(|| not_found("Session", &id))?;

    let tasks: Vec<TaskStatusResponse> = state
        .app
        .coordinator
        .get_tasks_by_session(&id)
        .iter()
        .map(|t| TaskStatusResponse::from_task(&t.read()))
        .collect();

    Ok(Json(json!({"session": session, "tasks": tasks})))
}

/// DELETE /v1/sessions/{id}.
async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    match state.app.repository.end_session(&id).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(not_found("Session", &id)),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )),
    }
}

// ---------------------------------------------------------------------------
// Agents & concurrency
// ---------------------------------------------------------------------------

/// GET /v1/agents — the roster with runtime state.
async fn list_agents(State(state): State<AppState>) -> Json<Vec<Value>> {
    let agents = state
        .app
        .pool
        .all_agents()
        .iter()
        .map(|agent| {
            let a = agent.read();
            json!({
                "id": a.id(),
                "name": a.name(),
                "team": a.team(),
                "description": a.metadata.description.clone(),
                "state": a.state,
                "current_task_id": a.current_task_id.clone(),
                "last_activity": a.last_activity,
                "success_count": a.success_count,
                "error_count": a.error_count,
                "keywords": a.metadata.keywords.clone(),
            })
        })
        .collect();
    Json(agents)
}

/// GET /v1/concurrency — dispatcher layer snapshot.
async fn concurrency_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.app.dispatcher.concurrency_status()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn test_router() -> Router {
        let app = Arc::new(Application::new(Settings::default()));
        app_router(app)
    }

    #[tokio::test]
    async fn test_health() {
        let router = test_router();
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "hivemind");
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let router = test_router();
        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_agents_listing_has_full_roster() {
        let router = test_router();
        let response = router
            .oneshot(Request::get("/v1/agents").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 24);
    }

    #[tokio::test]
    async fn test_unknown_task_is_404() {
        let router = test_router();
        let response = router
            .oneshot(
                Request::get(format!("/v1/completions/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_prompt_is_400() {
        let router = test_router();
        let response = router
            .oneshot(
                Request::post("/v1/completions")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"prompt": "   "}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_submit_and_poll_completion() {
        let app = Arc::new(Application::new(Settings::default()));
        let router = app_router(app.clone());

        let response = router
            .clone()
            .oneshot(
                Request::post("/v1/completions")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"prompt": "Build and implement a backend api feature"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        let task_id = body["task_id"].as_str().unwrap().to_string();

        // The default consultant binary is absent in tests, so the engine
        // executor fails fast and the task reaches a terminal state quickly.
        let mut terminal = false;
        for _ in 0..100 {
            let response = router
                .clone()
                .oneshot(
                    Request::get(format!("/v1/completions/{task_id}"))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            let status = body_json(response).await;
            if status["state"] == "completed" || status["state"] == "failed" {
                terminal = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(terminal, "task never reached a terminal state");

        let response = router
            .clone()
            .oneshot(
                Request::get(format!("/v1/completions/{task_id}/result"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cancel_terminal_task_is_409() {
        let app = Arc::new(Application::new(Settings::default()));
        let router = app_router(app.clone());

        // Drive a task to FAILED through the no-route path.
        let (task, _) = app
            .coordinator
            .process_task("asdfghjkl qwertyuiop", TaskPriority::Normal, None, None)
            .await;
        let task_id = task.read().id;

        let response = router
            .oneshot(
                Request::delete(format!("/v1/completions/{task_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let router = test_router();
        let response = router
            .clone()
            .oneshot(
                Request::post("/v1/sessions")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"user_id": "u-1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        let session_id = body["id"].as_str().unwrap().to_string();

        let response = router
            .clone()
            .oneshot(
                Request::get(format!("/v1/sessions/{session_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .clone()
            .oneshot(
                Request::delete(format!("/v1/sessions/{session_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
