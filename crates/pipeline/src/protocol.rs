//! Tagged-line progress protocol codec.
//!
//! The pipeline runner communicates over its stdout with two line-tagged
//! JSON payloads:
//!
//! ```text
//! PIPELINE_PROGRESS:{"currentStep":1,"totalSteps":3,"stepName":"fetch","percentage":50}
//! PIPELINE_SUMMARY:{"success":true,"summary":{...}}
//! ```
//!
//! [`parse_line`] turns one observed line into a [`PipelineEvent`]. The
//! codec is stateless and reentrant; any line without a recognized tag is
//! diagnostic output and must not affect task state. Malformed JSON after
//! a recognized tag is logged and swallowed; a corrupt progress line
//! never aborts a task.

use serde::Deserialize;

/// Tag prefix for step-level progress updates.
pub const PROGRESS_TAG: &str = "PIPELINE_PROGRESS:";
/// Tag prefix for the terminal summary, emitted once before exit.
pub const SUMMARY_TAG: &str = "PIPELINE_SUMMARY:";

/// Payload of a `PIPELINE_PROGRESS:` line.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub current_step: u32,
    pub total_steps: u32,
    pub step_name: String,
    pub percentage: f64,
    /// `"error"` marks a failed step; other values are informational.
    #[serde(default)]
    pub status: Option<String>,
    /// Failure message accompanying `status == "error"`.
    #[serde(default)]
    pub message: Option<String>,
}

impl ProgressPayload {
    /// Whether this progress line additionally signals an error transition.
    pub fn is_error(&self) -> bool {
        self.status.as_deref() == Some("error")
    }
}

/// Payload of a `PIPELINE_SUMMARY:` line.
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryPayload {
    pub success: bool,
    pub summary: serde_json::Value,
}

impl SummaryPayload {
    /// The failure message carried inside the summary object, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.summary.get("error").and_then(|v| v.as_str())
    }
}

/// One decoded stdout line.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Progress(ProgressPayload),
    Summary(SummaryPayload),
    /// Diagnostic output, or a tagged line whose JSON did not parse.
    Unrecognized,
}

/// Decode a single stdout line.
///
/// Tags are matched anywhere in the line (the runner may prefix its own
/// log timestamps); the rest of the line is the JSON payload.
pub fn parse_line(line: &str) -> PipelineEvent {
    if let Some(idx) = line.find(PROGRESS_TAG) {
        let payload = &line[idx + PROGRESS_TAG.len()..];
        return match serde_json::from_str::<ProgressPayload>(payload) {
            Ok(progress) => PipelineEvent::Progress(progress),
            Err(e) => {
                tracing::warn!(error = %e, raw_line = %line, "Malformed progress payload");
                PipelineEvent::Unrecognized
            }
        };
    }

    if let Some(idx) = line.find(SUMMARY_TAG) {
        let payload = &line[idx + SUMMARY_TAG.len()..];
        return match serde_json::from_str::<SummaryPayload>(payload) {
            Ok(summary) => PipelineEvent::Summary(summary),
            Err(e) => {
                tracing::warn!(error = %e, raw_line = %line, "Malformed summary payload");
                PipelineEvent::Unrecognized
            }
        };
    }

    PipelineEvent::Unrecognized
}
