//! JSON run report emitted at the end of every run, for humans and for
//! whatever queues the next application.

use serde::Serialize;

use crate::types::{RunContext, RunOutcome, Transition};

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub job_url: String,
    pub outcome: RunOutcome,
    pub fields_filled: usize,
    pub skipped_fields: Vec<String>,
    pub checkpoint_attempts: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stuck_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    pub duration_ms: u64,
    pub transitions: Vec<Transition>,
}

impl RunReport {
    pub fn from_context(ctx: &RunContext, duration_ms: u64) -> Self {
        let screenshot = ctx
            .vars
            .get("screenshot")
            .and_then(|v| v.as_str().map(String::from));
        Self {
            job_url: ctx.job_url.clone(),
            outcome: ctx.outcome.clone().unwrap_or(RunOutcome::Failed {
                reason: "run ended without an outcome".to_string(),
            }),
            fields_filled: ctx.fields_filled,
            skipped_fields: ctx.skipped_fields.clone(),
            checkpoint_attempts: ctx.checkpoint_attempts,
            stuck_reason: ctx.stuck_reason.clone(),
            screenshot,
            duration_ms,
            transitions: ctx.history.clone(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}
