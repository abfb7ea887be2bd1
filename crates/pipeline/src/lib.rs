//! Pipeline executor integration.
//!
//! This crate owns everything between an HTTP start request and a terminal
//! task record: building the `pipeline_runner.py` argument vector
//! (`launch`), decoding the tagged-line progress protocol on the child's
//! stdout (`protocol`), supervising one child process per task
//! (`supervisor`), and tracking running tasks with a kill/shutdown
//! capability (`manager`).

pub mod launch;
pub mod manager;
pub mod protocol;
pub mod supervisor;

use lorakit_core::error::CoreError;

/// Errors surfaced when launching a pipeline task.
///
/// Anything that happens after a successful launch is recorded on the task
/// record instead; the polling client never sees a mid-flight error.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The start request carried no usable username.
    #[error("Missing required parameter: username")]
    MissingUsername,

    /// A required credential is absent from the server environment.
    #[error("{var} is not configured; add it to the backend environment (.env)")]
    MissingCredential { var: &'static str },

    #[error(transparent)]
    Core(#[from] CoreError),
}
