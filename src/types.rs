use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hard cap on state-machine transitions per run. Runaway prevention.
pub const MAX_TRANSITIONS: usize = 25;

/// Maximum passes of the fill loop over one page.
pub const MAX_FILL_ITERATIONS: usize = 5;

/// Maximum last-resort checkpoint consultations per run.
pub const MAX_CHECKPOINT_ATTEMPTS: u8 = 2;

/// Settle delay after a fill pass, letting dynamically injected content land.
pub const SETTLE_DELAY_MS: u64 = 1200;

/// Character cap on the page text sample handed to the classifier.
pub const TEXT_SAMPLE_MAX_CHARS: usize = 4000;

/// How many failed write attempts before a field is skipped for the run.
pub const MAX_FIELD_ATTEMPTS: u32 = 2;

/// The closed set of orchestration states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateId {
    ClassifyPage,
    HandleApply,
    FillForm,
    HandleAuth,
    HandlePopup,
    FinalCheckpoint,
    HumanIntervention,
    Success,
    Fail,
}

impl StateId {
    pub fn is_terminal(self) -> bool {
        matches!(self, StateId::Success | StateId::Fail)
    }

    pub fn name(self) -> &'static str {
        match self {
            StateId::ClassifyPage => "classify_page",
            StateId::HandleApply => "handle_apply",
            StateId::FillForm => "fill_form",
            StateId::HandleAuth => "handle_auth",
            StateId::HandlePopup => "handle_popup",
            StateId::FinalCheckpoint => "final_checkpoint",
            StateId::HumanIntervention => "human_intervention",
            StateId::Success => "success",
            StateId::Fail => "fail",
        }
    }
}

/// One step of the run, appended exactly once per completed iteration.
/// Immutable once written; the substrate for loop detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: StateId,
    pub to: StateId,
    pub url: String,
    pub progress_made: bool,
    pub fields_filled: usize,
}

/// Per-step flags that must not leak into the next iteration.
/// The machine drains them when it records the transition.
#[derive(Debug, Default)]
pub struct StepFlags {
    pub progress_made: bool,
}

impl StepFlags {
    /// Consume the progress flag, resetting it for the next step.
    pub fn drain(&mut self) -> bool {
        std::mem::take(&mut self.progress_made)
    }
}

/// How the run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Failed { reason: String },
    NeedsHuman { reason: String },
}

/// Mutable context threaded through every state handler for one run.
#[derive(Debug)]
pub struct RunContext {
    pub job_url: String,
    pub current: StateId,
    pub history: Vec<Transition>,
    pub flags: StepFlags,
    /// Free-form scratch values shared between handlers.
    pub vars: HashMap<String, serde_json::Value>,
    /// Total fields filled so far, written by every filling handler.
    pub fields_filled: usize,
    pub checkpoint_attempts: u8,
    /// Labels of fields given up on after repeated write failures.
    pub skipped_fields: Vec<String>,
    pub stuck_reason: Option<String>,
    pub outcome: Option<RunOutcome>,
}

impl RunContext {
    pub fn new(job_url: impl Into<String>) -> Self {
        Self {
            job_url: job_url.into(),
            current: StateId::ClassifyPage,
            history: Vec::new(),
            flags: StepFlags::default(),
            vars: HashMap::new(),
            fields_filled: 0,
            checkpoint_attempts: 0,
            skipped_fields: Vec::new(),
            stuck_reason: None,
            outcome: None,
        }
    }

    pub fn note_failure(&mut self, reason: impl Into<String>) {
        if self.outcome.is_none() {
            self.outcome = Some(RunOutcome::Failed {
                reason: reason.into(),
            });
        }
    }
}

/// What kind of control a detected field is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Email,
    Phone,
    Url,
    Number,
    Date,
    TextArea,
    Dropdown,
    RadioGroup,
    Checkbox,
    CheckboxGroup,
    Password,
    File,
    Unknown,
}

/// One selectable option inside a radio or checkbox group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupOption {
    pub label: String,
    pub selector: String,
}

/// A detected form control. Holds no live element handle; the stable id is
/// re-resolved against the DOM on every interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Derived from id/name/aria-label; survives DOM re-renders.
    pub stable_id: String,
    pub label: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub placeholder: String,
    #[serde(default)]
    pub aria_text: String,
    #[serde(default)]
    pub html_required: bool,
    #[serde(default)]
    pub aria_required: bool,
    #[serde(default)]
    pub data_required: bool,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub options: Vec<GroupOption>,
}

impl FieldDescriptor {
    /// CSS selector that re-locates the live element via the stamped id.
    pub fn selector(&self) -> String {
        format!("[data-aaid=\"{}\"]", self.stable_id)
    }

    /// Label, placeholder and aria text joined for keyword matching.
    pub fn haystack(&self) -> String {
        format!("{} {} {}", self.label, self.placeholder, self.aria_text).to_lowercase()
    }
}

/// A clickable candidate found on the page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonCandidate {
    pub selector: String,
    pub text: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
}

/// Required/optional verdict for one field.
#[derive(Debug, Clone, PartialEq)]
pub struct RequiredDecision {
    pub required: bool,
    pub confidence: f32,
    pub method: &'static str,
}

/// How a field value was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMethod {
    Deterministic,
    Pattern,
    Ai,
}

/// A value ready to be written into a field. Produced once per field per
/// iteration and not retained past the fill attempt.
#[derive(Debug, Clone)]
pub struct MappingResult {
    pub value: String,
    pub confidence: f32,
    pub method: MappingMethod,
}

/// Everything the classifier gets to see about the current page.
#[derive(Debug, Clone, Serialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub text: String,
    pub fields: Vec<FieldDescriptor>,
    pub buttons: Vec<ButtonCandidate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_flags_drain_resets() {
        let mut flags = StepFlags::default();
        flags.progress_made = true;
        assert!(flags.drain());
        assert!(!flags.drain());
    }

    #[test]
    fn field_selector_uses_stable_id() {
        let field = FieldDescriptor {
            stable_id: "first-name".into(),
            label: "First Name".into(),
            kind: FieldKind::Text,
            value: String::new(),
            placeholder: String::new(),
            aria_text: String::new(),
            html_required: false,
            aria_required: false,
            data_required: false,
            classes: vec![],
            options: vec![],
        };
        assert_eq!(field.selector(), "[data-aaid=\"first-name\"]");
    }
}
