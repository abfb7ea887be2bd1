//! Handlers for starting pipeline tasks and polling their status.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use lorakit_core::error::CoreError;
use lorakit_core::task::{TaskRecord, TaskStatus};
use lorakit_pipeline::launch::StartPipelineRequest;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// POST /pipeline/start
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPipelineResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub message: String,
}

/// Launch a pipeline task for the requested username.
///
/// Returns immediately with the task id; all further outcome (including a
/// failed spawn) is observable only through the status endpoint.
pub async fn start_pipeline(
    State(state): State<AppState>,
    Json(req): Json<StartPipelineRequest>,
) -> AppResult<impl IntoResponse> {
    let started = state.pipeline.start_task(req).await?;

    Ok(Json(StartPipelineResponse {
        task_id: started.task_id,
        status: TaskStatus::Running,
        message: format!("Pipeline task started for {}", started.subject),
    }))
}

// ---------------------------------------------------------------------------
// GET /pipeline/status?taskId=...
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(rename = "taskId")]
    pub task_id: Option<String>,
}

/// Return the full task record for a task id.
///
/// Read-only; a missing id is a 400, an unknown id a 404. The polling
/// client always receives a well-formed record, never a mid-flight error.
pub async fn pipeline_status(
    State(state): State<AppState>,
    Query(params): Query<StatusQuery>,
) -> AppResult<Json<TaskRecord>> {
    let task_id = params
        .task_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing taskId query parameter".to_string()))?;

    let record = state
        .registry
        .get(&task_id)
        .await
        .ok_or_else(|| {
            AppError::Core(CoreError::NotFound {
                entity: "Task",
                id: task_id,
            })
        })?;

    Ok(Json(record))
}
