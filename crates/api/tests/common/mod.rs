use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use lorakit_api::config::ServerConfig;
use lorakit_api::router::build_app_router;
use lorakit_api::state::AppState;
use lorakit_core::registry::TaskRegistry;
use lorakit_pipeline::launch::LaunchConfig;
use lorakit_pipeline::manager::PipelineManager;

/// Build a test `LaunchConfig` with both credentials set.
///
/// Uses a deliberately nonexistent interpreter so nothing actually spawns
/// unless a test overrides it with a fake runner.
pub fn test_launch() -> LaunchConfig {
    LaunchConfig {
        python_bin: "/nonexistent/lorakit-test-interpreter".into(),
        runner_script: "/nonexistent/pipeline_runner.py".into(),
        datasets_root: "/tmp/lorakit-test-datasets".into(),
        tikhub_api_key: Some("test-tikhub-key".into()),
        openai_api_key: Some("test-openai-key".into()),
    }
}

/// Build a test `ServerConfig` around the given launch settings.
pub fn test_config(launch: LaunchConfig) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3001".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        launch,
    }
}

/// Build the full application router plus a handle to its registry.
///
/// This mirrors the router construction in `main.rs` so integration tests
/// exercise the same middleware stack (CORS, request ID, timeout, tracing,
/// panic recovery) that production uses.
pub fn build_test_app(launch: LaunchConfig) -> (Router, Arc<TaskRegistry>) {
    let config = test_config(launch);
    let registry = Arc::new(TaskRegistry::new());
    let pipeline = PipelineManager::new(Arc::clone(&registry), config.launch.clone());

    let state = AppState {
        config: Arc::new(config.clone()),
        registry: Arc::clone(&registry),
        pipeline,
    };

    (build_app_router(state, &config), registry)
}

/// Issue a GET request against the app.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

/// Issue a POST request with a JSON body against the app.
pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// Collect a response body into JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll the status endpoint until the task reaches a terminal state.
pub async fn poll_until_terminal(app: &Router, task_id: &str) -> serde_json::Value {
    for _ in 0..200 {
        let response = get(app.clone(), &format!("/api/v1/pipeline/status?taskId={task_id}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        if json["status"] == "completed" || json["status"] == "error" {
            return json;
        }
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }
    panic!("task {task_id} never reached a terminal state");
}
