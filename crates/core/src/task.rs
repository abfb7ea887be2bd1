//! Task record, task state machine, and exit reconciliation.
//!
//! A [`TaskRecord`] is created once per launched pipeline and afterwards
//! only ever mutated through [`TaskRecord::apply`], which enforces the
//! state machine guards: terminal states never regress, `completed_at` is
//! stamped at most once, and progress never moves backwards. That makes
//! late or duplicate events from a supervising process idempotent.

use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a pipeline task.
///
/// `Paused` is reserved for an executor variant that stops after the
/// cleaning stage to await human curation; nothing in the progress
/// protocol produces it today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Paused,
    Completed,
    Error,
}

impl TaskStatus {
    /// Whether this state permits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }

    /// Whether a transition from `self` to `next` is legal.
    ///
    /// Same-state transitions are allowed (and are no-ops when applied).
    /// `Paused` may be superseded by any state; resumption itself is
    /// driven by an external actor, not by this crate.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        self == next || !self.is_terminal()
    }
}

/// Step-level progress within a running task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub current_step: u32,
    pub total_steps: u32,
    pub step_name: String,
    pub percentage: f64,
}

/// The mutable state record for one pipeline task.
///
/// Serialized camelCase; this is exactly the JSON shape the polling
/// client receives from the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub status: TaskStatus,
    /// Normalized username the pipeline operates on.
    pub subject: String,
    pub progress: TaskProgress,
    /// Where the pipeline writes its output. Set at creation, never mutated.
    pub dataset_path: String,
    /// Structured result payload from the final summary event, if any.
    pub summary: Option<serde_json::Value>,
    /// Human-readable failure message, if the task failed.
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Create a fresh record in `Running` state with zeroed progress.
    ///
    /// `total_steps` is fixed here for the lifetime of the task: 4 when
    /// auto-start training is requested, 3 otherwise.
    pub fn new(subject: String, dataset_path: String, total_steps: u32) -> Self {
        Self {
            status: TaskStatus::Running,
            subject,
            progress: TaskProgress {
                current_step: 0,
                total_steps,
                step_name: "preparing".to_string(),
                percentage: 0.0,
            },
            dataset_path,
            summary: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Shallow-merge an update into this record, field by field.
    ///
    /// Guards applied here (the registry holds the write lock, so this is
    /// the single serialization point for all mutation):
    /// - a status change is ignored if the current status forbids it;
    /// - `summary` and `error` travel with the status change: a rejected
    ///   change drops them too, so a stray late summary cannot attach a
    ///   failure message to a completed record (or clear one from a failed
    ///   record);
    /// - a progress update is ignored once the task is terminal, or if it
    ///   would move `current_step` backwards;
    /// - `summary` is replaced wholesale, never deep-merged;
    /// - `completed_at` is only set if not already set.
    pub fn apply(&mut self, update: TaskUpdate) {
        let status_accepted = match update.status {
            Some(status) => {
                if self.status.can_transition_to(status) {
                    self.status = status;
                    true
                } else {
                    false
                }
            }
            None => true,
        };

        if let Some(progress) = update.progress {
            let regressing = progress.current_step < self.progress.current_step;
            if !self.status.is_terminal() && !regressing {
                self.progress = progress;
            }
        }

        if status_accepted {
            if let Some(summary) = update.summary {
                self.summary = Some(summary);
            }

            if let Some(error) = update.error {
                self.error = error;
            }
        }

        if let Some(ts) = update.completed_at {
            if self.completed_at.is_none() {
                self.completed_at = Some(ts);
            }
        }
    }
}

/// A partial update merged into a [`TaskRecord`].
///
/// `None` means "leave the field alone". The `error` field is doubly
/// optional so a successful summary can explicitly clear a stale message
/// (`Some(None)`).
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<TaskProgress>,
    pub summary: Option<serde_json::Value>,
    pub error: Option<Option<String>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Generate a registry-unique task id: `pipeline_<millis>_<suffix>`.
pub fn new_task_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(9)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();
    format!("pipeline_{millis}_{suffix}")
}

/// Compute the update to apply when the pipeline process exits.
///
/// Pure function so exit handling is testable without spawning anything:
///
/// - exit 0 with the record still `Running`: silent success, force
///   `Completed` and stamp `completed_at`;
/// - exit 0 with the record already terminal (a summary got there first):
///   stamp `completed_at` only;
/// - non-zero exit (or signal termination, where no code is available):
///   force `Error` unless the task already completed, keeping any more
///   specific error message recorded earlier;
/// - exit 0 while `Paused`: nothing to reconcile, the task is waiting on
///   an external actor.
pub fn reconcile_on_exit(record: &TaskRecord, exit_code: Option<i32>) -> Option<TaskUpdate> {
    match exit_code {
        Some(0) => match record.status {
            TaskStatus::Running => Some(TaskUpdate {
                status: Some(TaskStatus::Completed),
                completed_at: Some(Utc::now()),
                ..TaskUpdate::default()
            }),
            TaskStatus::Paused => None,
            TaskStatus::Completed | TaskStatus::Error => {
                record.completed_at.is_none().then(|| TaskUpdate {
                    completed_at: Some(Utc::now()),
                    ..TaskUpdate::default()
                })
            }
        },
        code => {
            if record.status == TaskStatus::Completed {
                return record.completed_at.is_none().then(|| TaskUpdate {
                    completed_at: Some(Utc::now()),
                    ..TaskUpdate::default()
                });
            }
            let message = record.error.clone().unwrap_or_else(|| match code {
                Some(n) => format!("Process exited with code {n}"),
                None => "Process terminated by signal".to_string(),
            });
            Some(TaskUpdate {
                status: Some(TaskStatus::Error),
                error: Some(Some(message)),
                completed_at: Some(Utc::now()),
                ..TaskUpdate::default()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_record() -> TaskRecord {
        TaskRecord::new("alice".into(), "/data/datasets/alice".into(), 3)
    }

    fn progress(step: u32, pct: f64) -> TaskProgress {
        TaskProgress {
            current_step: step,
            total_steps: 3,
            step_name: format!("step-{step}"),
            percentage: pct,
        }
    }

    // -- state machine -------------------------------------------------------

    #[test]
    fn running_may_transition_anywhere() {
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Paused));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Error));
    }

    #[test]
    fn terminal_states_admit_no_transition() {
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Error));
        assert!(!TaskStatus::Error.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Error.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn paused_is_not_terminal_and_may_be_superseded() {
        assert!(!TaskStatus::Paused.is_terminal());
        assert!(TaskStatus::Paused.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Paused.can_transition_to(TaskStatus::Error));
    }

    // -- apply ---------------------------------------------------------------

    #[test]
    fn new_record_starts_running_with_zero_progress() {
        let rec = running_record();
        assert_eq!(rec.status, TaskStatus::Running);
        assert_eq!(rec.progress.current_step, 0);
        assert_eq!(rec.progress.total_steps, 3);
        assert!((rec.progress.percentage - 0.0).abs() < f64::EPSILON);
        assert!(rec.completed_at.is_none());
    }

    #[test]
    fn apply_merges_progress_while_running() {
        let mut rec = running_record();
        rec.apply(TaskUpdate {
            progress: Some(progress(1, 50.0)),
            ..TaskUpdate::default()
        });
        assert_eq!(rec.progress.current_step, 1);
        assert!((rec.progress.percentage - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn apply_rejects_regressing_progress() {
        let mut rec = running_record();
        rec.apply(TaskUpdate {
            progress: Some(progress(2, 80.0)),
            ..TaskUpdate::default()
        });
        rec.apply(TaskUpdate {
            progress: Some(progress(1, 10.0)),
            ..TaskUpdate::default()
        });
        assert_eq!(rec.progress.current_step, 2);
    }

    #[test]
    fn apply_ignores_progress_after_terminal() {
        let mut rec = running_record();
        rec.apply(TaskUpdate {
            status: Some(TaskStatus::Completed),
            ..TaskUpdate::default()
        });
        rec.apply(TaskUpdate {
            progress: Some(progress(2, 80.0)),
            ..TaskUpdate::default()
        });
        assert_eq!(rec.progress.current_step, 0);
    }

    #[test]
    fn apply_does_not_regress_terminal_status() {
        let mut rec = running_record();
        rec.apply(TaskUpdate {
            status: Some(TaskStatus::Error),
            error: Some(Some("boom".into())),
            ..TaskUpdate::default()
        });
        rec.apply(TaskUpdate {
            status: Some(TaskStatus::Running),
            ..TaskUpdate::default()
        });
        assert_eq!(rec.status, TaskStatus::Error);
        assert_eq!(rec.error.as_deref(), Some("boom"));
    }

    #[test]
    fn apply_sets_completed_at_only_once() {
        let mut rec = running_record();
        let first = Utc::now();
        rec.apply(TaskUpdate {
            status: Some(TaskStatus::Completed),
            completed_at: Some(first),
            ..TaskUpdate::default()
        });
        rec.apply(TaskUpdate {
            completed_at: Some(first + chrono::Duration::seconds(30)),
            ..TaskUpdate::default()
        });
        assert_eq!(rec.completed_at, Some(first));
    }

    #[test]
    fn apply_replaces_summary_wholesale() {
        let mut rec = running_record();
        rec.apply(TaskUpdate {
            summary: Some(serde_json::json!({"totalImages": 10, "elapsedTime": 2.5})),
            ..TaskUpdate::default()
        });
        rec.apply(TaskUpdate {
            summary: Some(serde_json::json!({"totalImages": 12})),
            ..TaskUpdate::default()
        });
        assert_eq!(rec.summary, Some(serde_json::json!({"totalImages": 12})));
    }

    #[test]
    fn rejected_status_change_drops_companion_fields() {
        let mut rec = running_record();
        rec.apply(TaskUpdate {
            status: Some(TaskStatus::Completed),
            ..TaskUpdate::default()
        });
        rec.apply(TaskUpdate {
            status: Some(TaskStatus::Error),
            summary: Some(serde_json::json!({"error": "late failure"})),
            error: Some(Some("late failure".into())),
            ..TaskUpdate::default()
        });
        assert_eq!(rec.status, TaskStatus::Completed);
        assert!(rec.summary.is_none());
        assert!(rec.error.is_none());
    }

    #[test]
    fn late_success_summary_does_not_clear_recorded_error() {
        let mut rec = running_record();
        rec.apply(TaskUpdate {
            status: Some(TaskStatus::Error),
            error: Some(Some("boom".into())),
            ..TaskUpdate::default()
        });
        rec.apply(TaskUpdate {
            status: Some(TaskStatus::Completed),
            summary: Some(serde_json::json!({"totalImages": 3})),
            error: Some(None),
            ..TaskUpdate::default()
        });
        assert_eq!(rec.status, TaskStatus::Error);
        assert!(rec.summary.is_none());
        assert_eq!(rec.error.as_deref(), Some("boom"));
    }

    #[test]
    fn apply_can_clear_error() {
        let mut rec = running_record();
        rec.apply(TaskUpdate {
            error: Some(Some("transient".into())),
            ..TaskUpdate::default()
        });
        rec.apply(TaskUpdate {
            error: Some(None),
            ..TaskUpdate::default()
        });
        assert!(rec.error.is_none());
    }

    // -- reconcile_on_exit ---------------------------------------------------

    #[test]
    fn exit_zero_while_running_completes() {
        let rec = running_record();
        let update = reconcile_on_exit(&rec, Some(0)).expect("expected an update");
        assert_eq!(update.status, Some(TaskStatus::Completed));
        assert!(update.completed_at.is_some());
    }

    #[test]
    fn exit_zero_after_summary_only_stamps_completed_at() {
        let mut rec = running_record();
        rec.apply(TaskUpdate {
            status: Some(TaskStatus::Completed),
            ..TaskUpdate::default()
        });
        let update = reconcile_on_exit(&rec, Some(0)).expect("expected an update");
        assert!(update.status.is_none());
        assert!(update.completed_at.is_some());
    }

    #[test]
    fn exit_zero_while_paused_is_a_noop() {
        let mut rec = running_record();
        rec.apply(TaskUpdate {
            status: Some(TaskStatus::Paused),
            ..TaskUpdate::default()
        });
        assert!(reconcile_on_exit(&rec, Some(0)).is_none());
    }

    #[test]
    fn nonzero_exit_without_prior_error_uses_generic_message() {
        let rec = running_record();
        let update = reconcile_on_exit(&rec, Some(7)).expect("expected an update");
        assert_eq!(update.status, Some(TaskStatus::Error));
        assert_eq!(
            update.error,
            Some(Some("Process exited with code 7".to_string()))
        );
        assert!(update.completed_at.is_some());
    }

    #[test]
    fn nonzero_exit_keeps_more_specific_error() {
        let mut rec = running_record();
        rec.apply(TaskUpdate {
            status: Some(TaskStatus::Error),
            error: Some(Some("step 2 failed: quality filter".into())),
            ..TaskUpdate::default()
        });
        let update = reconcile_on_exit(&rec, Some(1)).expect("expected an update");
        assert_eq!(
            update.error,
            Some(Some("step 2 failed: quality filter".to_string()))
        );
    }

    #[test]
    fn signal_termination_reports_signal_message() {
        let rec = running_record();
        let update = reconcile_on_exit(&rec, None).expect("expected an update");
        assert_eq!(
            update.error,
            Some(Some("Process terminated by signal".to_string()))
        );
    }

    #[test]
    fn nonzero_exit_never_regresses_completed() {
        let mut rec = running_record();
        rec.apply(TaskUpdate {
            status: Some(TaskStatus::Completed),
            completed_at: Some(Utc::now()),
            ..TaskUpdate::default()
        });
        assert!(reconcile_on_exit(&rec, Some(1)).is_none());
    }

    // -- task ids ------------------------------------------------------------

    #[test]
    fn task_ids_have_expected_shape() {
        let id = new_task_id();
        let mut parts = id.splitn(3, '_');
        assert_eq!(parts.next(), Some("pipeline"));
        assert!(parts.next().unwrap().parse::<i64>().is_ok());
        let suffix = parts.next().unwrap();
        assert_eq!(suffix.len(), 9);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn task_ids_are_unique() {
        let a = new_task_id();
        let b = new_task_id();
        assert_ne!(a, b);
    }

    // -- serialization -------------------------------------------------------

    #[test]
    fn record_serializes_camel_case() {
        let rec = running_record();
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["subject"], "alice");
        assert_eq!(json["datasetPath"], "/data/datasets/alice");
        assert_eq!(json["progress"]["currentStep"], 0);
        assert_eq!(json["progress"]["totalSteps"], 3);
        assert!(json["startedAt"].is_string());
        assert!(json["completedAt"].is_null());
        assert!(json["summary"].is_null());
        assert!(json["error"].is_null());
    }
}
