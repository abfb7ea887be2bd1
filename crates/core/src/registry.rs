//! In-memory task registry.
//!
//! Process-wide, volatile state: records live exactly as long as the host
//! process. The registry exclusively owns all [`TaskRecord`]s: the
//! supervisor and the HTTP layer hold task ids only and go through
//! [`TaskRegistry::merge`] / [`TaskRegistry::get`], so the write lock here
//! is the single serialization point for record mutation.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::task::{TaskRecord, TaskUpdate};

/// Mapping from task id to its mutable state record.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, TaskRecord>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a freshly created record under `id`.
    ///
    /// Fails with [`CoreError::Conflict`] if the id is already present; a
    /// record is created exactly once per task.
    pub async fn create(&self, id: &str, record: TaskRecord) -> Result<(), CoreError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(id) {
            return Err(CoreError::Conflict(format!("Task {id} already exists")));
        }
        tasks.insert(id.to_string(), record);
        Ok(())
    }

    /// Merge a partial update into the record for `id`.
    ///
    /// Unknown ids are a deliberate no-op: a supervising process may emit
    /// late or duplicate events for a task that was never registered (for
    /// example during shutdown), and those must not fail anything.
    pub async fn merge(&self, id: &str, update: TaskUpdate) {
        let mut tasks = self.tasks.write().await;
        if let Some(record) = tasks.get_mut(id) {
            record.apply(update);
        }
    }

    /// Look up the current record for `id`.
    pub async fn get(&self, id: &str) -> Option<TaskRecord> {
        self.tasks.read().await.get(id).cloned()
    }

    /// Number of records currently held (all states, terminal included).
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}
