use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::profile::Profile;
use crate::types::{ButtonCandidate, FieldDescriptor, PageSnapshot};

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Failures at the classifier boundary. Callers distinguish these so they
/// can fall back to rule-based heuristics instead of trusting bad output.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("OPENAI_API_KEY not set in environment")]
    MissingKey,
}

/// What kind of page the classifier believes we are on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Listing,
    ApplicationForm,
    Auth,
    Popup,
    Submitted,
    Error,
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageDecision {
    pub page_type: PageType,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub reason: String,
}

/// Per-field answer from the batched mapping call. A missing value means
/// the model chose to skip the field.
#[derive(Debug, Clone, Deserialize)]
pub struct AiFieldAnswer {
    pub value: Option<String>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ButtonPick {
    pub selector: Option<String>,
    #[serde(default)]
    pub reason: String,
}

/// Which control we are hunting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonIntent {
    Apply,
    Next,
    Submit,
    DismissPopup,
}

impl ButtonIntent {
    pub fn describe(self) -> &'static str {
        match self {
            ButtonIntent::Apply => "the button that starts a job application",
            ButtonIntent::Next => "the button that advances to the next form step",
            ButtonIntent::Submit => "the button that submits the finished application",
            ButtonIntent::DismissPopup => "the button that dismisses the blocking popup",
        }
    }
}

/// One instruction from the last-resort checkpoint probe.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CheckpointDecision {
    /// The state is acceptable to stop; not actually stuck.
    GreenSignal,
    Fill { label: String, value: String },
    Click { button_text: String },
    Wait { ms: u64 },
}

/// Everything the checkpoint shows the external decision process.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointProbe {
    pub url: String,
    pub unfilled: Vec<ProbeField>,
    pub buttons: Vec<String>,
    pub skipped: Vec<String>,
    pub profile_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeField {
    pub label: String,
    pub kind: String,
    pub required: bool,
}

/// External classifier/mapper capability. The orchestration core depends
/// only on the response shapes; every implementation must validate before
/// returning and callers must tolerate errors by falling back to rules.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify_page(&self, snapshot: &PageSnapshot) -> Result<PageDecision, ClassifyError>;

    async fn map_fields(
        &self,
        fields: &[FieldDescriptor],
        profile: &Profile,
    ) -> Result<HashMap<String, AiFieldAnswer>, ClassifyError>;

    async fn pick_button(
        &self,
        candidates: &[ButtonCandidate],
        intent: ButtonIntent,
    ) -> Result<ButtonPick, ClassifyError>;

    async fn decide_next_action(
        &self,
        probe: &CheckpointProbe,
    ) -> Result<CheckpointDecision, ClassifyError>;
}

/// Classifier backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiClassifier {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClassifier {
    pub fn from_env() -> Result<Self, ClassifyError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| ClassifyError::MissingKey)?;
        Ok(Self {
            client: Client::new(),
            api_key,
            model: std::env::var("AUTOAPPLY_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        })
    }

    async fn chat(&self, system: &str, user: String) -> Result<String, ClassifyError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
                "temperature": 0.1,
            }))
            .send()
            .await?;

        let status = response.status();
        let body: serde_json::Value = response.json().await?;

        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("unknown API error")
                .to_string();
            return Err(ClassifyError::Api {
                status: status.as_u16(),
                message,
            });
        }

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| ClassifyError::MalformedResponse("no message content".into()))
    }
}

/// Strip markdown fences the model may wrap around JSON, then parse and
/// validate against the expected shape.
pub fn parse_json_object<T: serde::de::DeserializeOwned>(content: &str) -> Result<T, ClassifyError> {
    let cleaned = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    serde_json::from_str(cleaned).map_err(|e| {
        warn!(error = %e, "classifier returned unparseable JSON");
        ClassifyError::MalformedResponse(format!("{e}: {}", cleaned.chars().take(200).collect::<String>()))
    })
}

const CLASSIFY_SYSTEM: &str = r#"You classify web pages in a job application flow.
Respond with ONLY one JSON object, no markdown:
{"page_type":"listing|application_form|auth|popup|submitted|error|unknown","confidence":0.0,"reason":"short"}
- listing: a job posting with an apply button
- application_form: a form collecting applicant details
- auth: sign-in / account creation gate
- popup: a blocking overlay (cookies, newsletter) covering the page
- submitted: confirmation that the application was received
- error: an error page"#;

const MAP_SYSTEM: &str = r#"You map job application form fields to applicant profile data.
Given fields and a profile, respond with ONLY one JSON object keyed by stable_id:
{"<stable_id>":{"value":"text to enter or option label to pick","reason":"short"}}
Use null for value to skip a field. Never invent credentials or legal answers;
skip anything you cannot answer from the profile or common sense."#;

const PICK_SYSTEM: &str = r#"You pick one button from serialized candidates.
Respond with ONLY one JSON object: {"selector":"css selector from the list or null","reason":"short"}"#;

const CHECKPOINT_SYSTEM: &str = r#"A form-filling agent appears stalled. Decide ONE next action.
Respond with ONLY one JSON object, one of:
{"action":"green_signal"}  -- the page state is acceptable, safe to stop
{"action":"fill","label":"<field label>","value":"<text>"}
{"action":"click","button_text":"<visible button text>"}
{"action":"wait","ms":2000}"#;

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify_page(&self, snapshot: &PageSnapshot) -> Result<PageDecision, ClassifyError> {
        let user = format!(
            "URL: {}\nTitle: {}\nFields: {}\nButtons: {}\n\nVisible text:\n{}",
            snapshot.url,
            snapshot.title,
            snapshot
                .fields
                .iter()
                .map(|f| f.label.as_str())
                .collect::<Vec<_>>()
                .join(" | "),
            snapshot
                .buttons
                .iter()
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join(" | "),
            snapshot.text,
        );
        let content = self.chat(CLASSIFY_SYSTEM, user).await?;
        debug!(content, "classify_page reply");
        parse_json_object(&content)
    }

    async fn map_fields(
        &self,
        fields: &[FieldDescriptor],
        profile: &Profile,
    ) -> Result<HashMap<String, AiFieldAnswer>, ClassifyError> {
        let field_json = serde_json::to_string_pretty(
            &fields
                .iter()
                .map(|f| {
                    json!({
                        "stable_id": f.stable_id,
                        "label": f.label,
                        "kind": f.kind,
                        "placeholder": f.placeholder,
                        "options": f.options.iter().map(|o| o.label.clone()).collect::<Vec<_>>(),
                    })
                })
                .collect::<Vec<_>>(),
        )
        .unwrap_or_default();
        let profile_json = serde_json::to_string_pretty(
            &profile.iter().collect::<std::collections::BTreeMap<_, _>>(),
        )
        .unwrap_or_default();

        let user = format!("Fields:\n{field_json}\n\nProfile:\n{profile_json}");
        let content = self.chat(MAP_SYSTEM, user).await?;
        debug!(content, "map_fields reply");
        parse_json_object(&content)
    }

    async fn pick_button(
        &self,
        candidates: &[ButtonCandidate],
        intent: ButtonIntent,
    ) -> Result<ButtonPick, ClassifyError> {
        let listing = serde_json::to_string_pretty(candidates).unwrap_or_default();
        let user = format!("Find {}.\n\nCandidates:\n{}", intent.describe(), listing);
        let content = self.chat(PICK_SYSTEM, user).await?;
        debug!(content, "pick_button reply");
        parse_json_object(&content)
    }

    async fn decide_next_action(
        &self,
        probe: &CheckpointProbe,
    ) -> Result<CheckpointDecision, ClassifyError> {
        let user = serde_json::to_string_pretty(probe).unwrap_or_default();
        let content = self.chat(CHECKPOINT_SYSTEM, user).await?;
        debug!(content, "decide_next_action reply");
        parse_json_object(&content)
    }
}

/// Keyword fallback used when the external classifier is unavailable or
/// returns something unparseable. Never trusts a single weak signal.
pub fn classify_by_rules(snapshot: &PageSnapshot) -> PageDecision {
    let text = format!("{} {}", snapshot.title, snapshot.text).to_lowercase();
    let button_text = snapshot
        .buttons
        .iter()
        .map(|b| b.text.to_lowercase())
        .collect::<Vec<_>>()
        .join(" | ");

    const SUBMITTED: &[&str] = &[
        "application submitted",
        "application received",
        "thank you for applying",
        "thanks for applying",
        "successfully submitted",
    ];
    const AUTH: &[&str] = &["sign in", "log in", "login", "create account", "sign up"];
    const POPUP_BUTTONS: &[&str] = &["accept all", "accept cookies", "got it", "no thanks"];
    const ERROR: &[&str] = &["page not found", "404", "something went wrong"];

    if SUBMITTED.iter().any(|kw| text.contains(kw)) {
        return decision(PageType::Submitted, 0.8, "confirmation text");
    }
    if POPUP_BUTTONS.iter().any(|kw| button_text.contains(kw)) {
        return decision(PageType::Popup, 0.7, "consent/dismiss buttons visible");
    }
    let has_password = snapshot
        .fields
        .iter()
        .any(|f| f.kind == crate::types::FieldKind::Password);
    if has_password {
        return decision(PageType::Auth, 0.8, "password field present");
    }
    if snapshot.fields.len() <= 2 && AUTH.iter().any(|kw| text.contains(kw)) {
        return decision(PageType::Auth, 0.6, "sign-in vocabulary");
    }
    if snapshot.fields.len() >= 3 {
        return decision(PageType::ApplicationForm, 0.7, "multiple form fields");
    }
    if button_text.contains("apply") {
        return decision(PageType::Listing, 0.7, "apply button visible");
    }
    if ERROR.iter().any(|kw| text.contains(kw)) {
        return decision(PageType::Error, 0.6, "error text");
    }
    decision(PageType::Unknown, 0.3, "no rule matched")
}

fn decision(page_type: PageType, confidence: f32, reason: &str) -> PageDecision {
    PageDecision {
        page_type,
        confidence,
        reason: reason.to_string(),
    }
}
