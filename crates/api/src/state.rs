use std::sync::Arc;

use lorakit_core::registry::TaskRegistry;
use lorakit_pipeline::manager::PipelineManager;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// In-memory task registry (source of truth for status queries).
    pub registry: Arc<TaskRegistry>,
    /// Pipeline launcher and running-task tracker.
    pub pipeline: Arc<PipelineManager>,
}
