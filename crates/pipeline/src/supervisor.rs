//! Per-process supervision: stream consumption and exit reconciliation.
//!
//! One [`supervise`] call owns the full lifecycle of one spawned runner:
//! it drains stdout and stderr on dedicated tasks, feeds every stdout
//! line through the protocol codec into registry merges, and reconciles
//! the terminal state after the process exits. Exit handling runs only
//! after stdout has reached end-of-stream, so a final summary line is
//! never lost to a racing exit notification.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio_util::sync::CancellationToken;

use lorakit_core::registry::TaskRegistry;
use lorakit_core::task::{reconcile_on_exit, TaskProgress, TaskStatus, TaskUpdate};

use crate::protocol::{parse_line, PipelineEvent, ProgressPayload};

impl From<ProgressPayload> for TaskProgress {
    fn from(p: ProgressPayload) -> Self {
        TaskProgress {
            current_step: p.current_step,
            total_steps: p.total_steps,
            step_name: p.step_name,
            percentage: p.percentage,
        }
    }
}

/// Supervise one spawned pipeline process until it exits.
///
/// Cancelling `cancel` kills the child; the normal non-zero-exit path then
/// records the failure. Both output streams are drained to EOF even when
/// individual merges no-op, so the child never blocks on a full pipe.
pub async fn supervise(
    registry: Arc<TaskRegistry>,
    task_id: String,
    mut child: Child,
    cancel: CancellationToken,
) {
    let stdout_task = child.stdout.take().map(|stdout| {
        tokio::spawn(read_stdout(
            Arc::clone(&registry),
            task_id.clone(),
            stdout,
        ))
    });
    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(read_stderr(task_id.clone(), stderr)));

    let wait_result = tokio::select! {
        result = child.wait() => result,
        _ = cancel.cancelled() => {
            tracing::info!(task_id = %task_id, "Kill requested, terminating pipeline process");
            let _ = child.start_kill();
            child.wait().await
        }
    };

    // Drain both streams before touching terminal state.
    if let Some(handle) = stdout_task {
        let _ = handle.await;
    }
    if let Some(handle) = stderr_task {
        let _ = handle.await;
    }

    match wait_result {
        Ok(status) => {
            let exit_code = status.code();
            tracing::info!(task_id = %task_id, ?exit_code, "Pipeline process exited");
            if let Some(record) = registry.get(&task_id).await {
                if let Some(update) = reconcile_on_exit(&record, exit_code) {
                    registry.merge(&task_id, update).await;
                }
            }
        }
        Err(e) => {
            tracing::error!(task_id = %task_id, error = %e, "Failed to wait on pipeline process");
            registry
                .merge(
                    &task_id,
                    TaskUpdate {
                        status: Some(TaskStatus::Error),
                        error: Some(Some(format!("Failed to wait on pipeline process: {e}"))),
                        completed_at: Some(chrono::Utc::now()),
                        ..TaskUpdate::default()
                    },
                )
                .await;
        }
    }
}

/// Apply one observed stdout line to the task record.
///
/// Progress events merge `{progress}`, plus an error transition when the
/// step reports `status: "error"`. Summary events merge the result payload
/// and drive the terminal status. Everything else is operator-visible
/// diagnostics only.
pub async fn apply_output_line(registry: &TaskRegistry, task_id: &str, line: &str) {
    match parse_line(line) {
        PipelineEvent::Progress(payload) => {
            let error = payload.is_error().then(|| {
                payload
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("Step {} failed", payload.current_step))
            });

            registry
                .merge(
                    task_id,
                    TaskUpdate {
                        progress: Some(payload.into()),
                        ..TaskUpdate::default()
                    },
                )
                .await;

            if let Some(message) = error {
                registry
                    .merge(
                        task_id,
                        TaskUpdate {
                            status: Some(TaskStatus::Error),
                            error: Some(Some(message)),
                            ..TaskUpdate::default()
                        },
                    )
                    .await;
            }
        }
        PipelineEvent::Summary(payload) => {
            let status = if payload.success {
                TaskStatus::Completed
            } else {
                TaskStatus::Error
            };
            let error = if payload.success {
                None
            } else {
                Some(
                    payload
                        .error_message()
                        .unwrap_or("Pipeline reported failure")
                        .to_string(),
                )
            };
            registry
                .merge(
                    task_id,
                    TaskUpdate {
                        status: Some(status),
                        summary: Some(payload.summary),
                        error: Some(error),
                        ..TaskUpdate::default()
                    },
                )
                .await;
        }
        PipelineEvent::Unrecognized => {}
    }
}

/// Lines are read as raw bytes and converted lossily: the runner may
/// interleave binary-ish diagnostics with the tagged protocol lines, and a
/// garbled line must be skipped without closing the pipe (dropping the
/// handle early would SIGPIPE the child and lose its final summary).
async fn read_stdout(registry: Arc<TaskRegistry>, task_id: String, stdout: ChildStdout) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']);
                tracing::debug!(task_id = %task_id, line = %line, "pipeline stdout");
                apply_output_line(&registry, &task_id, line).await;
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "Error reading pipeline stdout");
                break;
            }
        }
    }
}

/// Stderr is captured for diagnostics only; it never mutates task state.
async fn read_stderr(task_id: String, stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']);
                tracing::warn!(task_id = %task_id, line = %line, "pipeline stderr");
            }
        }
    }
}
