//! The field mapping and filling pipeline.
//!
//! Each iteration re-detects the page's fields (content is injected
//! dynamically, so a one-time scan misses late controls), drops anything
//! already tracked or non-empty, maps deterministically first, batches the
//! leftovers to the AI mapper, then writes, verifies and records.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::browser::Page;
use crate::classifier::Classifier;
use crate::detect::{required, sensitive};
use crate::dom;
use crate::mapping;
use crate::profile::Profile;
use crate::tracker::CompletionTracker;
use crate::types::{
    FieldDescriptor, FieldKind, MappingMethod, MappingResult, MAX_FIELD_ATTEMPTS,
    MAX_FILL_ITERATIONS, SETTLE_DELAY_MS,
};

#[derive(Debug, Default)]
pub struct FillSummary {
    pub filled: usize,
    /// Labels of fields given up on (unwritable, unverifiable, unmapped
    /// uploads). Reported to the checkpoint probe later.
    pub skipped: Vec<String>,
    /// Set when a sensitive field blocks automated progress.
    pub needs_human: Option<String>,
}

pub struct FormFiller<'a> {
    pub page: &'a dyn Page,
    pub classifier: &'a dyn Classifier,
    pub profile: &'a Profile,
}

impl<'a> FormFiller<'a> {
    /// Run up to `MAX_FILL_ITERATIONS` passes over the current page. A pass
    /// that fills nothing ends the loop early; there is no more progress to
    /// be had from re-scanning.
    pub async fn fill_pass(&self, tracker: &mut CompletionTracker) -> Result<FillSummary> {
        let mut summary = FillSummary::default();

        for iteration in 0..MAX_FILL_ITERATIONS {
            let snap = dom::snapshot(self.page).await?;
            let url = snap.url.clone();

            let creation_page = match sensitive::gate(&snap.fields, &snap.text) {
                sensitive::SensitiveVerdict::NeedsHuman(reason) => {
                    summary.needs_human = Some(reason);
                    return Ok(summary);
                }
                sensitive::SensitiveVerdict::AutoFillCredentials => true,
                sensitive::SensitiveVerdict::Clear => false,
            };

            let mut planned: Vec<(FieldDescriptor, MappingResult)> = Vec::new();
            let mut unmapped: Vec<FieldDescriptor> = Vec::new();

            for field in snap.fields {
                if tracker.is_done(&url, &field.stable_id) {
                    continue;
                }
                if !field.value.trim().is_empty() {
                    continue;
                }
                if field.kind == FieldKind::File {
                    push_unique(&mut summary.skipped, &field.label);
                    continue;
                }
                if field.kind == FieldKind::Password {
                    // Only reachable on account-creation pages; the gate
                    // above already rerouted login pages.
                    if creation_page {
                        if let Some(pw) = self.profile.get("password") {
                            planned.push((
                                field,
                                MappingResult {
                                    value: pw.to_string(),
                                    confidence: 0.9,
                                    method: MappingMethod::Deterministic,
                                },
                            ));
                        } else {
                            push_unique(&mut summary.skipped, &field.label);
                        }
                    }
                    continue;
                }

                match mapping::map_deterministic(&field, self.profile) {
                    Some(result) => planned.push((field, result)),
                    None => {
                        let decision = required::classify_required(&field);
                        if decision.required {
                            unmapped.push(field);
                        } else {
                            debug!(
                                label = %field.label,
                                method = decision.method,
                                "optional field with no mapping, leaving blank"
                            );
                        }
                    }
                }
            }

            if !unmapped.is_empty() {
                match self.classifier.map_fields(&unmapped, self.profile).await {
                    Ok(answers) => {
                        for field in unmapped {
                            match answers.get(&field.stable_id).and_then(|a| a.value.clone()) {
                                Some(value) if !value.trim().is_empty() => {
                                    // AI answers get the same cleanup as
                                    // profile values before any write.
                                    let value = mapping::clean_value(field.kind, &value);
                                    planned.push((
                                        field,
                                        MappingResult {
                                            value,
                                            confidence: 0.7,
                                            method: MappingMethod::Ai,
                                        },
                                    ));
                                }
                                _ => push_unique(&mut summary.skipped, &field.label),
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "AI mapper unavailable, skipping unmapped fields");
                        for field in unmapped {
                            push_unique(&mut summary.skipped, &field.label);
                        }
                    }
                }
            }

            // Deterministic results were pushed first, so they are also
            // written first.
            let mut filled_this_pass = 0;
            for (field, result) in planned {
                let attempts = tracker.note_attempt(&url, &field.stable_id);
                if attempts > MAX_FIELD_ATTEMPTS {
                    push_unique(&mut summary.skipped, &field.label);
                    continue;
                }
                match self.write_field(&field, &result).await {
                    Ok(true) => {
                        tracker.record(&url, &field.stable_id, &field.label, &result.value);
                        filled_this_pass += 1;
                        debug!(label = %field.label, method = ?result.method, "field filled");
                    }
                    Ok(false) => {
                        warn!(label = %field.label, "post-fill verification failed");
                    }
                    Err(e) => {
                        warn!(label = %field.label, error = %e, "field write failed");
                    }
                }
            }

            summary.filled += filled_this_pass;
            info!(
                iteration,
                filled = filled_this_pass,
                total = summary.filled,
                "fill pass complete"
            );

            if filled_this_pass == 0 {
                break;
            }
            // Let the page react (conditional sections, async validation).
            tokio::time::sleep(std::time::Duration::from_millis(SETTLE_DELAY_MS)).await;
        }

        Ok(summary)
    }

    /// Write one value with format cleanup already applied, then verify.
    async fn write_field(&self, field: &FieldDescriptor, result: &MappingResult) -> Result<bool> {
        let selector = field.selector();
        match field.kind {
            FieldKind::Dropdown => {
                self.page.select_option(&selector, &result.value).await?;
                // Option values rarely equal their labels; a non-empty value
                // is the strongest check available.
                Ok(!self.page.read_value(&selector).await?.is_empty())
            }
            FieldKind::RadioGroup | FieldKind::CheckboxGroup => {
                let want = result.value.to_lowercase();
                let option = field
                    .options
                    .iter()
                    .find(|o| o.label.to_lowercase() == want)
                    .or_else(|| {
                        field
                            .options
                            .iter()
                            .find(|o| o.label.to_lowercase().contains(&want))
                    });
                match option {
                    Some(opt) => {
                        self.page.set_checked(&opt.selector).await?;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            FieldKind::Checkbox => {
                let affirmative = matches!(
                    result.value.to_lowercase().as_str(),
                    "yes" | "true" | "checked" | "on"
                );
                if affirmative {
                    self.page.set_checked(&selector).await?;
                }
                Ok(true)
            }
            _ => {
                self.page.type_text(&selector, &result.value).await?;
                let written = self.page.read_value(&selector).await?;
                if written.trim() == result.value.trim() {
                    return Ok(true);
                }
                // Some controlled inputs swallow synthetic keystrokes; set
                // the value directly and fire input/change instead.
                self.page.set_value(&selector, &result.value).await?;
                let written = self.page.read_value(&selector).await?;
                Ok(written.trim() == result.value.trim())
            }
        }
    }
}

fn push_unique(list: &mut Vec<String>, label: &str) {
    if !list.iter().any(|l| l == label) {
        list.push(label.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::AiFieldAnswer;
    use crate::testutil::{field_json, scan_payload, FakeClassifier, FakePage};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn profile() -> Profile {
        let mut m = BTreeMap::new();
        m.insert("first_name".to_string(), "Jane".to_string());
        m.insert("email".to_string(), "jane@example.com".to_string());
        m.insert("phone".to_string(), "(240) 610-1453".to_string());
        Profile::from_map(m)
    }

    fn two_field_payload() -> serde_json::Value {
        scan_payload(
            vec![
                field_json("first-name", "First Name", "text"),
                field_json("phone", "Phone Number", "phone"),
            ],
            vec![],
            "Application form",
        )
    }

    #[tokio::test]
    async fn fills_fresh_fields_then_exits_on_zero_fill_pass() {
        let page = FakePage::new("https://jobs.example.com/apply");
        page.push_scan(two_field_payload());
        page.push_scan(two_field_payload()); // rescan finds nothing new
        let classifier = FakeClassifier::new();
        let profile = profile();
        let filler = FormFiller {
            page: &page,
            classifier: &classifier,
            profile: &profile,
        };
        let mut tracker = CompletionTracker::new();

        let summary = filler.fill_pass(&mut tracker).await.unwrap();

        assert_eq!(summary.filled, 2);
        assert!(summary.needs_human.is_none());
        // two iterations: one that fills, one that sees nothing left
        assert_eq!(page.scan_calls(), 2);
        assert!(tracker.is_done("https://jobs.example.com/apply", "first-name"));
        assert_eq!(
            page.typed("[data-aaid=\"phone\"]"),
            Some("2406101453".to_string())
        );
    }

    #[tokio::test]
    async fn tracked_fields_are_excluded_even_if_still_in_dom() {
        let page = FakePage::new("https://jobs.example.com/apply");
        page.push_scan(scan_payload(
            vec![field_json("first-name", "First Name", "text")],
            vec![],
            "",
        ));
        let classifier = FakeClassifier::new();
        let profile = profile();
        let filler = FormFiller {
            page: &page,
            classifier: &classifier,
            profile: &profile,
        };
        let mut tracker = CompletionTracker::new();
        tracker.record("https://jobs.example.com/apply", "first-name", "First Name", "Jane");

        let summary = filler.fill_pass(&mut tracker).await.unwrap();
        assert_eq!(summary.filled, 0);
        assert!(page.typed("[data-aaid=\"first-name\"]").is_none());
    }

    #[tokio::test]
    async fn unknown_required_fields_go_to_the_ai_mapper() {
        let page = FakePage::new("https://jobs.example.com/apply");
        page.push_scan(scan_payload(
            vec![json!({
                "stable_id": "team-q",
                "label": "Describe your ideal team",
                "kind": "text_area",
                "html_required": true
            })],
            vec![],
            "",
        ));
        page.push_scan(scan_payload(vec![], vec![], ""));
        let mut answers = std::collections::HashMap::new();
        answers.insert(
            "team-q".to_string(),
            AiFieldAnswer {
                value: Some("A collaborative team".to_string()),
                reason: String::new(),
            },
        );
        let classifier = FakeClassifier::new().with_map_answers(answers);
        let profile = profile();
        let filler = FormFiller {
            page: &page,
            classifier: &classifier,
            profile: &profile,
        };
        let mut tracker = CompletionTracker::new();

        let summary = filler.fill_pass(&mut tracker).await.unwrap();
        assert_eq!(summary.filled, 1);
        assert_eq!(
            page.typed("[data-aaid=\"team-q\"]"),
            Some("A collaborative team".to_string())
        );
    }

    #[tokio::test]
    async fn ai_answers_are_cleaned_by_kind_before_write() {
        let page = FakePage::new("https://jobs.example.com/apply");
        page.push_scan(scan_payload(
            vec![json!({
                "stable_id": "linkedin",
                "label": "LinkedIn Profile",
                "kind": "url",
                "html_required": true
            })],
            vec![],
            "",
        ));
        page.push_scan(scan_payload(vec![], vec![], ""));
        let mut answers = std::collections::HashMap::new();
        answers.insert(
            "linkedin".to_string(),
            AiFieldAnswer {
                value: Some("linkedin.com/in/jane".to_string()),
                reason: String::new(),
            },
        );
        // Profile has no linkedin key, so the field escalates to the AI.
        let classifier = FakeClassifier::new().with_map_answers(answers);
        let profile = profile();
        let filler = FormFiller {
            page: &page,
            classifier: &classifier,
            profile: &profile,
        };
        let mut tracker = CompletionTracker::new();

        let summary = filler.fill_pass(&mut tracker).await.unwrap();
        assert_eq!(summary.filled, 1);
        assert_eq!(
            page.typed("[data-aaid=\"linkedin\"]"),
            Some("https://www.linkedin.com/in/jane".to_string())
        );
    }

    #[tokio::test]
    async fn set_value_rescues_inputs_that_swallow_typing() {
        let page = FakePage::new("https://jobs.example.com/apply");
        page.swallow_typing();
        page.push_scan(scan_payload(
            vec![field_json("first-name", "First Name", "text")],
            vec![],
            "",
        ));
        page.push_scan(scan_payload(vec![], vec![], ""));
        let classifier = FakeClassifier::new();
        let profile = profile();
        let filler = FormFiller {
            page: &page,
            classifier: &classifier,
            profile: &profile,
        };
        let mut tracker = CompletionTracker::new();

        let summary = filler.fill_pass(&mut tracker).await.unwrap();
        assert_eq!(summary.filled, 1);
        assert_eq!(
            page.typed("[data-aaid=\"first-name\"]"),
            Some("Jane".to_string())
        );
    }

    #[tokio::test]
    async fn ai_mapper_failure_skips_fields_instead_of_crashing() {
        let page = FakePage::new("https://jobs.example.com/apply");
        page.push_scan(scan_payload(
            vec![json!({
                "stable_id": "team-q",
                "label": "Describe your ideal team",
                "kind": "text_area",
                "html_required": true
            })],
            vec![],
            "",
        ));
        let classifier = FakeClassifier::new(); // map_fields errors by default
        let profile = profile();
        let filler = FormFiller {
            page: &page,
            classifier: &classifier,
            profile: &profile,
        };
        let mut tracker = CompletionTracker::new();

        let summary = filler.fill_pass(&mut tracker).await.unwrap();
        assert_eq!(summary.filled, 0);
        assert_eq!(summary.skipped, vec!["Describe your ideal team".to_string()]);
    }

    #[tokio::test]
    async fn login_password_field_requests_human() {
        let page = FakePage::new("https://jobs.example.com/login");
        page.push_scan(scan_payload(
            vec![field_json("pw", "Password", "password")],
            vec![],
            "Welcome back! Sign in to continue",
        ));
        let classifier = FakeClassifier::new();
        let profile = profile();
        let filler = FormFiller {
            page: &page,
            classifier: &classifier,
            profile: &profile,
        };
        let mut tracker = CompletionTracker::new();

        let summary = filler.fill_pass(&mut tracker).await.unwrap();
        assert!(summary.needs_human.is_some());
        assert_eq!(summary.filled, 0);
    }

    #[tokio::test]
    async fn radio_group_picks_matching_option() {
        let page = FakePage::new("https://jobs.example.com/apply");
        page.push_scan(scan_payload(
            vec![json!({
                "stable_id": "sponsor",
                "label": "Do you require sponsorship?",
                "kind": "radio_group",
                "options": [
                    {"label": "Yes", "selector": "[data-aaid=\"sponsor-yes\"]"},
                    {"label": "No", "selector": "[data-aaid=\"sponsor-no\"]"}
                ]
            })],
            vec![],
            "",
        ));
        page.push_scan(scan_payload(vec![], vec![], ""));
        let classifier = FakeClassifier::new();
        let profile = profile();
        let filler = FormFiller {
            page: &page,
            classifier: &classifier,
            profile: &profile,
        };
        let mut tracker = CompletionTracker::new();

        let summary = filler.fill_pass(&mut tracker).await.unwrap();
        assert_eq!(summary.filled, 1);
        assert!(page
            .checked()
            .contains(&"[data-aaid=\"sponsor-no\"]".to_string()));
    }
}
