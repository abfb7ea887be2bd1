//! Route definitions for pipeline task orchestration.
//!
//! ```text
//! POST /start    -> start_pipeline
//! GET  /status   -> pipeline_status
//! ```

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::pipeline;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/start", post(pipeline::start_pipeline))
        .route("/status", get(pipeline::pipeline_status))
}
