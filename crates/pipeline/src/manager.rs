//! Pipeline task manager.
//!
//! [`PipelineManager`] is created once at application startup and cloned
//! into request handlers behind an `Arc`. It owns the launch
//! configuration, a handle to the shared [`TaskRegistry`], and a map of
//! per-task cancellation tokens (children of a master token cancelled
//! during shutdown). Each started task gets its own supervising tokio
//! task; nothing here shares a worker pool.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use lorakit_core::registry::TaskRegistry;
use lorakit_core::subject::normalize_subject;
use lorakit_core::task::{new_task_id, TaskRecord, TaskStatus, TaskUpdate};

use crate::launch::{build_args, LaunchConfig, StartPipelineRequest};
use crate::supervisor::supervise;
use crate::PipelineError;

/// Internal bookkeeping for one running pipeline task.
struct RunningTask {
    /// Per-task cancellation token (child of the master token).
    cancel: CancellationToken,
}

/// Launches pipeline processes and tracks the running ones.
pub struct PipelineManager {
    registry: Arc<TaskRegistry>,
    launch: LaunchConfig,
    running: Arc<RwLock<HashMap<String, RunningTask>>>,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
}

/// Result of a successful launch.
#[derive(Debug, Clone)]
pub struct StartedTask {
    pub task_id: String,
    pub subject: String,
}

impl PipelineManager {
    pub fn new(registry: Arc<TaskRegistry>, launch: LaunchConfig) -> Arc<Self> {
        Arc::new(Self {
            registry,
            launch,
            running: Arc::new(RwLock::new(HashMap::new())),
            cancel: CancellationToken::new(),
        })
    }

    /// Validate a start request, create the task record, and spawn the
    /// runner under a dedicated supervisor.
    ///
    /// Validation and the credential check happen before the record is
    /// created, so a request that cannot proceed leaves nothing behind. A
    /// spawn failure after that point still reports the task as started;
    /// the record is immediately terminal `error` and the client observes
    /// it by polling.
    pub async fn start_task(
        &self,
        req: StartPipelineRequest,
    ) -> Result<StartedTask, PipelineError> {
        let username = req
            .username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(PipelineError::MissingUsername)?
            .to_string();

        let creds = self.launch.credentials()?;

        let subject = normalize_subject(&username);
        let dataset_path = self
            .launch
            .datasets_root
            .join(&subject)
            .to_string_lossy()
            .into_owned();

        let task_id = new_task_id();
        let record = TaskRecord::new(subject.clone(), dataset_path, req.total_steps());
        self.registry.create(&task_id, record).await?;

        tracing::info!(task_id = %task_id, subject = %subject, "Starting pipeline task");

        let args = build_args(&self.launch, &username, &creds, &req);
        let mut command = Command::new(&self.launch.python_bin);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Failed to spawn pipeline runner");
                self.registry
                    .merge(
                        &task_id,
                        TaskUpdate {
                            status: Some(TaskStatus::Error),
                            error: Some(Some(e.to_string())),
                            completed_at: Some(chrono::Utc::now()),
                            ..TaskUpdate::default()
                        },
                    )
                    .await;
                return Ok(StartedTask { task_id, subject });
            }
        };

        let task_cancel = self.cancel.child_token();
        self.running.write().await.insert(
            task_id.clone(),
            RunningTask {
                cancel: task_cancel.clone(),
            },
        );

        let registry = Arc::clone(&self.registry);
        let running = Arc::clone(&self.running);
        let id = task_id.clone();
        tokio::spawn(async move {
            supervise(registry, id.clone(), child, task_cancel).await;
            running.write().await.remove(&id);
        });

        Ok(StartedTask { task_id, subject })
    }

    /// Kill the process supervising `task_id`.
    ///
    /// Returns `false` if no such task is currently running. The task
    /// record ends up terminal `error` through the normal exit path.
    pub async fn kill(&self, task_id: &str) -> bool {
        match self.running.read().await.get(task_id) {
            Some(task) => {
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of tasks whose processes are currently being supervised.
    pub async fn running_count(&self) -> usize {
        self.running.read().await.len()
    }

    /// Kill all running tasks and wait up to `drain_timeout` for their
    /// supervisors to finish reconciling.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        self.cancel.cancel();

        let deadline = tokio::time::Instant::now() + drain_timeout;
        while tokio::time::Instant::now() < deadline {
            if self.running.read().await.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let remaining = self.running.read().await.len();
        if remaining > 0 {
            tracing::warn!(remaining, "Shutdown drain timed out with tasks still running");
        }
    }
}
