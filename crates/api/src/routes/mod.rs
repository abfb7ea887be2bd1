pub mod health;
pub mod pipeline;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /pipeline/start      POST   launch a pipeline task
/// /pipeline/status     GET    poll a task record (?taskId=...)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/pipeline", pipeline::router())
}
