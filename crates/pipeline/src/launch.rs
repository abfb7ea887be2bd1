//! Pipeline launch configuration and argument-vector construction.

use std::path::PathBuf;

use serde::Deserialize;

use crate::PipelineError;

/// Environment variable holding the TikHub (data access) API key.
pub const TIKHUB_API_KEY_VAR: &str = "TIKHUB_API_KEY";
/// Environment variable holding the OpenAI (captioning) API key.
pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";

/// How to launch `pipeline_runner.py`, loaded once at process start.
///
/// Credentials come from the server environment, never from a client
/// request.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Python interpreter used to run the pipeline (default: `python3`).
    pub python_bin: String,
    /// Path to the pipeline runner script.
    pub runner_script: PathBuf,
    /// Root directory under which per-subject datasets are written.
    pub datasets_root: PathBuf,
    pub tikhub_api_key: Option<String>,
    pub openai_api_key: Option<String>,
}

impl LaunchConfig {
    /// Load launch configuration from environment variables.
    ///
    /// | Env Var           | Default                |
    /// |-------------------|------------------------|
    /// | `PIPELINE_ROOT`   | `..`                   |
    /// | `PYTHON_BIN`      | `python3`              |
    /// | `TIKHUB_API_KEY`  | unset                  |
    /// | `OPENAI_API_KEY`  | unset                  |
    ///
    /// The runner script and datasets root are derived from
    /// `PIPELINE_ROOT` as `scripts/pipeline_runner.py` and `datasets/`.
    pub fn from_env() -> Self {
        let root = PathBuf::from(std::env::var("PIPELINE_ROOT").unwrap_or_else(|_| "..".into()));
        let python_bin = std::env::var("PYTHON_BIN").unwrap_or_else(|_| "python3".into());

        Self {
            python_bin,
            runner_script: root.join("scripts").join("pipeline_runner.py"),
            datasets_root: root.join("datasets"),
            tikhub_api_key: std::env::var(TIKHUB_API_KEY_VAR).ok(),
            openai_api_key: std::env::var(OPENAI_API_KEY_VAR).ok(),
        }
    }

    /// Resolve both required credentials, failing fast on the first one
    /// that is absent. Called before any task record is created so a
    /// request that cannot proceed never leaves an orphaned record.
    pub fn credentials(&self) -> Result<Credentials<'_>, PipelineError> {
        let tikhub_api_key = self
            .tikhub_api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(PipelineError::MissingCredential {
                var: TIKHUB_API_KEY_VAR,
            })?;
        let openai_api_key = self
            .openai_api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(PipelineError::MissingCredential {
                var: OPENAI_API_KEY_VAR,
            })?;
        Ok(Credentials {
            tikhub_api_key,
            openai_api_key,
        })
    }
}

/// Resolved required credentials, borrowed from a [`LaunchConfig`].
#[derive(Debug, Clone, Copy)]
pub struct Credentials<'a> {
    pub tikhub_api_key: &'a str,
    pub openai_api_key: &'a str,
}

/// Body of `POST /pipeline/start`.
///
/// Only `username` is required; omitted tunables let the runner apply its
/// own defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPipelineRequest {
    pub username: Option<String>,
    pub max_posts: Option<u32>,
    pub concurrent: Option<u32>,
    pub min_resolution: Option<u32>,
    pub min_quality: Option<f64>,
    pub enable_dedup: Option<bool>,
    pub trigger_word: Option<String>,
    pub training_steps: Option<u32>,
    pub auto_start_training: Option<bool>,
}

impl StartPipelineRequest {
    /// Total pipeline steps for this request: scrape, clean, caption, plus
    /// the training stage when auto-start is requested.
    pub fn total_steps(&self) -> u32 {
        if self.auto_start_training == Some(true) {
            4
        } else {
            3
        }
    }
}

/// Build the runner's argument vector.
///
/// The raw (un-normalized) username is forwarded; the runner does its own
/// cleanup. Optional tunables are only passed when explicitly supplied.
/// Dedup is on by default, so `--no-dedup` is emitted only for an explicit
/// `false`; training auto-start is off by default, so
/// `--auto-start-training` is emitted only for an explicit `true`.
pub fn build_args(
    config: &LaunchConfig,
    username: &str,
    creds: &Credentials<'_>,
    req: &StartPipelineRequest,
) -> Vec<String> {
    let mut args = vec![
        config.runner_script.to_string_lossy().into_owned(),
        "--username".into(),
        username.into(),
        "--tikhub-api-key".into(),
        creds.tikhub_api_key.into(),
        "--gpt4o-api-key".into(),
        creds.openai_api_key.into(),
    ];

    if let Some(n) = req.max_posts {
        args.push("--max-posts".into());
        args.push(n.to_string());
    }
    if let Some(n) = req.concurrent {
        args.push("--concurrent".into());
        args.push(n.to_string());
    }
    if let Some(n) = req.min_resolution {
        args.push("--min-resolution".into());
        args.push(n.to_string());
    }
    if let Some(q) = req.min_quality {
        args.push("--min-quality".into());
        args.push(q.to_string());
    }
    if req.enable_dedup == Some(false) {
        args.push("--no-dedup".into());
    }
    if let Some(word) = &req.trigger_word {
        args.push("--trigger-word".into());
        args.push(word.clone());
    }
    if let Some(n) = req.training_steps {
        args.push("--training-steps".into());
        args.push(n.to_string());
    }
    if req.auto_start_training == Some(true) {
        args.push("--auto-start-training".into());
    }

    args
}
