//! Scripted stand-ins for the browser page and the external classifier,
//! shared by the unit tests. `FakePage` replays queued scan payloads and
//! records every write; `FakeClassifier` errors by default so the
//! rule-based fallbacks are exercised unless a test arms a response.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::browser::Page;
use crate::classifier::{
    AiFieldAnswer, ButtonIntent, ButtonPick, CheckpointDecision, CheckpointProbe, Classifier,
    ClassifyError, PageDecision,
};
use crate::profile::Profile;
use crate::types::{ButtonCandidate, FieldDescriptor, PageSnapshot};

pub fn field_json(stable_id: &str, label: &str, kind: &str) -> Value {
    json!({"stable_id": stable_id, "label": label, "kind": kind})
}

pub fn button_json(selector: &str, text: &str) -> Value {
    json!({"selector": selector, "text": text, "tag": "button"})
}

pub fn scan_payload(fields: Vec<Value>, buttons: Vec<Value>, text: &str) -> Value {
    json!({"fields": fields, "buttons": buttons, "text": text})
}

#[derive(Default)]
struct PageState {
    url: String,
    scans: VecDeque<Value>,
    last_scan: Option<Value>,
    scan_calls: usize,
    values: HashMap<String, String>,
    checked: Vec<String>,
    clicks: Vec<String>,
    successful_clicks: usize,
    fail_standard_clicks: bool,
    fail_all_clicks: bool,
    fail_scans: bool,
    bump_url: bool,
    swallow_typing: bool,
}

/// In-memory `Page`. Scan payloads are replayed FIFO; once the queue is
/// empty the last payload repeats, so a static page stays static.
pub struct FakePage {
    state: Mutex<PageState>,
}

impl FakePage {
    pub fn new(url: &str) -> Self {
        Self {
            state: Mutex::new(PageState {
                url: url.to_string(),
                ..PageState::default()
            }),
        }
    }

    pub fn push_scan(&self, payload: Value) {
        self.state.lock().unwrap().scans.push_back(payload);
    }

    /// Standard clicks fail; script and forced clicks still work.
    pub fn fail_standard_clicks(&self) {
        self.state.lock().unwrap().fail_standard_clicks = true;
    }

    /// Every click strategy fails.
    pub fn fail_all_clicks(&self) {
        self.state.lock().unwrap().fail_all_clicks = true;
    }

    pub fn fail_scans(&self) {
        self.state.lock().unwrap().fail_scans = true;
    }

    /// `type_text` silently drops its input, like a controlled input that
    /// ignores synthetic keystrokes. `set_value` still works.
    pub fn swallow_typing(&self) {
        self.state.lock().unwrap().swallow_typing = true;
    }

    /// Each successful click lands on a fresh URL, like a listing that
    /// keeps redirecting.
    pub fn bump_url_on_click(&self) {
        self.state.lock().unwrap().bump_url = true;
    }

    /// Successful clicks in order. Script clicks are prefixed `js:`,
    /// forced clicks `forced:`.
    pub fn clicks(&self) -> Vec<String> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn checked(&self) -> Vec<String> {
        self.state.lock().unwrap().checked.clone()
    }

    /// Last value written to a selector via type_text/set_value/select.
    pub fn typed(&self, selector: &str) -> Option<String> {
        self.state.lock().unwrap().values.get(selector).cloned()
    }

    pub fn scan_calls(&self) -> usize {
        self.state.lock().unwrap().scan_calls
    }
}

#[async_trait]
impl Page for FakePage {
    async fn navigate(&self, url: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let s = self.state.lock().unwrap();
        if s.bump_url && s.successful_clicks > 0 {
            Ok(format!("{}?step={}", s.url, s.successful_clicks))
        } else {
            Ok(s.url.clone())
        }
    }

    async fn title(&self) -> Result<String> {
        Ok(String::new())
    }

    async fn scan(&self) -> Result<Value> {
        let mut s = self.state.lock().unwrap();
        if s.fail_scans {
            return Err(anyhow!("scan failed"));
        }
        s.scan_calls += 1;
        if let Some(payload) = s.scans.pop_front() {
            s.last_scan = Some(payload.clone());
            return Ok(payload);
        }
        Ok(s.last_scan
            .clone()
            .unwrap_or_else(|| scan_payload(vec![], vec![], "")))
    }

    async fn read_value(&self, selector: &str) -> Result<String> {
        let s = self.state.lock().unwrap();
        Ok(s.values.get(selector).cloned().unwrap_or_default())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        if !s.swallow_typing {
            s.values.insert(selector.to_string(), text.to_string());
        }
        Ok(())
    }

    async fn set_value(&self, selector: &str, value: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.values.insert(selector.to_string(), value.to_string());
        Ok(())
    }

    async fn select_option(&self, selector: &str, label: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.values.insert(selector.to_string(), label.to_string());
        Ok(())
    }

    async fn set_checked(&self, selector: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.checked.push(selector.to_string());
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        if s.fail_all_clicks || s.fail_standard_clicks {
            return Err(anyhow!("click failed on {selector}"));
        }
        s.clicks.push(selector.to_string());
        s.successful_clicks += 1;
        Ok(())
    }

    async fn click_js(&self, selector: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        if s.fail_all_clicks {
            return Err(anyhow!("js click failed on {selector}"));
        }
        s.clicks.push(format!("js:{selector}"));
        s.successful_clicks += 1;
        Ok(())
    }

    async fn click_forced(&self, selector: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        if s.fail_all_clicks {
            return Err(anyhow!("forced click failed on {selector}"));
        }
        s.clicks.push(format!("forced:{selector}"));
        s.successful_clicks += 1;
        Ok(())
    }

    async fn wait_for(&self, _selector: &str, _timeout_ms: u64) -> Result<bool> {
        Ok(true)
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Scripted `Classifier`. Every call errors unless the test arms a
/// response, which pushes the callers onto their rule-based fallbacks.
#[derive(Default)]
pub struct FakeClassifier {
    map_answers: Option<HashMap<String, AiFieldAnswer>>,
    button_pick: Option<Option<String>>,
    checkpoint: Option<CheckpointDecision>,
}

impl FakeClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_map_answers(mut self, answers: HashMap<String, AiFieldAnswer>) -> Self {
        self.map_answers = Some(answers);
        self
    }

    pub fn with_button_pick(mut self, selector: Option<String>) -> Self {
        self.button_pick = Some(selector);
        self
    }

    pub fn with_checkpoint(mut self, decision: CheckpointDecision) -> Self {
        self.checkpoint = Some(decision);
        self
    }

    fn unarmed<T>(what: &str) -> Result<T, ClassifyError> {
        Err(ClassifyError::MalformedResponse(format!(
            "fake classifier has no scripted {what}"
        )))
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify_page(
        &self,
        _snapshot: &PageSnapshot,
    ) -> Result<PageDecision, ClassifyError> {
        Self::unarmed("page decision")
    }

    async fn map_fields(
        &self,
        _fields: &[FieldDescriptor],
        _profile: &Profile,
    ) -> Result<HashMap<String, AiFieldAnswer>, ClassifyError> {
        match &self.map_answers {
            Some(answers) => Ok(answers.clone()),
            None => Self::unarmed("field answers"),
        }
    }

    async fn pick_button(
        &self,
        _candidates: &[ButtonCandidate],
        _intent: ButtonIntent,
    ) -> Result<ButtonPick, ClassifyError> {
        match &self.button_pick {
            Some(selector) => Ok(ButtonPick {
                selector: selector.clone(),
                reason: "scripted".into(),
            }),
            None => Self::unarmed("button pick"),
        }
    }

    async fn decide_next_action(
        &self,
        _probe: &CheckpointProbe,
    ) -> Result<CheckpointDecision, ClassifyError> {
        match &self.checkpoint {
            Some(decision) => Ok(decision.clone()),
            None => Self::unarmed("checkpoint decision"),
        }
    }
}
