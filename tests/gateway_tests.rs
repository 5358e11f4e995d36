use orchestra::config::{EventStoreConfig, PoolConfig, RouterConfig};
use orchestra::event_store::EventStore;
use orchestra::gateway::{create_task, health, list_models, AppState, CreateTaskRequest};
use orchestra::lifecycle::ShutdownManager;
use orchestra::pool::ConnectionPool;
use orchestra::router::{ModelRegistry, ModelRouter};
use axum::extract::State;
use axum::Json;
use std::sync::{Arc, RwLock};
use std::time::Duration;

fn test_state() -> AppState {
    let pool = ConnectionPool::new(PoolConfig {
        base_url: "http://localhost:11434".into(),
        max_concurrent: 4,
        max_keepalive: 2,
        request_timeout: Duration::from_secs(5),
    });
    let registry = Arc::new(RwLock::new(ModelRegistry::default()));
    let router = Arc::new(ModelRouter::new(registry, RouterConfig::default()));
    let event_store = EventStore::new(EventStoreConfig {
        max_sessions: 10,
        event_ttl: Duration::from_secs(3600),
        cleanup_interval: Duration::from_secs(300),
    });
    AppState {
        event_store,
        router,
        pool,
        shutdown: ShutdownManager::new(Duration::from_secs(5)),
    }
}

#[tokio::test]
async fn health_reports_ok_once_pool_is_initialized() {
    let state = test_state();
    let response = health(State(state)).await;
    assert_eq!(response.0.status, "ok");
    assert!(response.0.services.pool);
}

#[tokio::test]
async fn list_models_reflects_an_empty_registry_before_any_refresh() {
    let state = test_state();
    let response = list_models(State(state)).await;
    assert_eq!(response.0.count, 0);
    assert!(response.0.models.is_empty());
}

#[tokio::test]
async fn create_task_mints_a_fresh_id_per_call() {
    let state = test_state();
    let req = CreateTaskRequest {
        task: "write a function that reverses a string".into(),
        mode: "code".into(),
        model: None,
        temperature: None,
        max_iterations: None,
    };
    let first = create_task(State(state.clone()), Json(req.clone())).await.unwrap();
    let second = create_task(State(state), Json(req)).await.unwrap();
    assert_ne!(first.0.task_id, second.0.task_id);
}

#[tokio::test]
async fn create_task_rejects_an_empty_task_body() {
    let state = test_state();
    let req = CreateTaskRequest {
        task: String::new(),
        mode: "code".into(),
        model: None,
        temperature: None,
        max_iterations: None,
    };
    let result = create_task(State(state), Json(req)).await;
    assert!(result.is_err());
}
