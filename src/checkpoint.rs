//! Last-resort recovery probe, invoked only when stagnation is suspected
//! and strictly budget-limited. Collects what is still unfilled plus the
//! visible buttons, asks the external decision process for one instruction,
//! and executes exactly that instruction.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::browser::{click_with_escalation, Page};
use crate::classifier::{CheckpointDecision, CheckpointProbe, ProbeField};
use crate::detect::required;
use crate::dom;
use crate::mapping;
use crate::profile::Profile;
use crate::tracker::CompletionTracker;

/// Ceiling on classifier-requested waits.
const MAX_WAIT_MS: u64 = 5000;

pub async fn build_probe(
    page: &dyn Page,
    tracker: &CompletionTracker,
    profile: &Profile,
    skipped: &[String],
) -> Result<CheckpointProbe> {
    let snap = dom::snapshot(page).await?;
    let unfilled = snap
        .fields
        .iter()
        .filter(|f| !tracker.is_done(&snap.url, &f.stable_id) && f.value.trim().is_empty())
        .map(|f| ProbeField {
            label: f.label.clone(),
            kind: format!("{:?}", f.kind).to_lowercase(),
            required: required::classify_required(f).required,
        })
        .collect();
    let buttons = snap
        .buttons
        .iter()
        .map(|b| b.text.clone())
        .filter(|t| !t.is_empty())
        .collect();
    Ok(CheckpointProbe {
        url: snap.url,
        unfilled,
        buttons,
        skipped: skipped.to_vec(),
        profile_keys: profile.keys().iter().map(|k| k.to_string()).collect(),
    })
}

/// Execute one checkpoint instruction. Returns whether an observable action
/// was taken (the progress flag for this step).
pub async fn execute(
    page: &dyn Page,
    tracker: &mut CompletionTracker,
    decision: &CheckpointDecision,
) -> Result<bool> {
    match decision {
        CheckpointDecision::GreenSignal => Ok(false),
        CheckpointDecision::Fill { label, value } => {
            let fields = dom::scan_fields(page).await?;
            let want = label.to_lowercase();
            let target = fields
                .iter()
                .find(|f| f.label.to_lowercase() == want)
                .or_else(|| fields.iter().find(|f| f.label.to_lowercase().contains(&want)));
            match target {
                Some(field) => {
                    let cleaned = mapping::clean_value(field.kind, value);
                    page.type_text(&field.selector(), &cleaned).await?;
                    // Recorded like any other fill so later passes do not
                    // redo or overwrite it.
                    let url = page.current_url().await?;
                    tracker.record(&url, &field.stable_id, &field.label, &cleaned);
                    info!(label = %field.label, "checkpoint filled field");
                    Ok(true)
                }
                None => {
                    warn!(label = %label, "checkpoint named a field that does not exist");
                    Ok(false)
                }
            }
        }
        CheckpointDecision::Click { button_text } => {
            let buttons = dom::scan_buttons(page).await?;
            let want = button_text.to_lowercase();
            let target = buttons
                .iter()
                .find(|b| b.text.to_lowercase() == want)
                .or_else(|| buttons.iter().find(|b| b.text.to_lowercase().contains(&want)));
            match target {
                Some(button) => {
                    click_with_escalation(page, &button.selector).await?;
                    info!(text = %button.text, "checkpoint clicked button");
                    Ok(true)
                }
                None => {
                    warn!(text = %button_text, "checkpoint named a button that does not exist");
                    Ok(false)
                }
            }
        }
        CheckpointDecision::Wait { ms } => {
            let bounded = (*ms).min(MAX_WAIT_MS);
            debug!(ms = bounded, "checkpoint waiting for dynamic content");
            tokio::time::sleep(std::time::Duration::from_millis(bounded)).await;
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{button_json, field_json, scan_payload, FakePage};

    #[tokio::test]
    async fn probe_lists_unfilled_fields_and_buttons() {
        let page = FakePage::new("https://jobs.example.com/apply");
        page.push_scan(scan_payload(
            vec![field_json("city", "City", "text")],
            vec![button_json("[data-aaid=\"next\"]", "Next")],
            "",
        ));
        let mut tracker = CompletionTracker::new();
        tracker.record("https://jobs.example.com/apply", "done", "Done Field", "x");
        let profile = Profile::default();

        let probe = build_probe(&page, &tracker, &profile, &["Resume".to_string()])
            .await
            .unwrap();
        assert_eq!(probe.unfilled.len(), 1);
        assert_eq!(probe.unfilled[0].label, "City");
        assert_eq!(probe.buttons, vec!["Next".to_string()]);
        assert_eq!(probe.skipped, vec!["Resume".to_string()]);
    }

    #[tokio::test]
    async fn click_instruction_matches_by_visible_text() {
        let page = FakePage::new("https://jobs.example.com/apply");
        page.push_scan(scan_payload(
            vec![],
            vec![button_json("[data-aaid=\"continue\"]", "Continue to review")],
            "",
        ));
        let acted = execute(
            &page,
            &mut CompletionTracker::new(),
            &CheckpointDecision::Click {
                button_text: "continue".into(),
            },
        )
        .await
        .unwrap();
        assert!(acted);
        assert_eq!(page.clicks(), vec!["[data-aaid=\"continue\"]".to_string()]);
    }

    #[tokio::test]
    async fn fill_instruction_targets_field_by_label() {
        let page = FakePage::new("https://jobs.example.com/apply");
        page.push_scan(scan_payload(
            vec![field_json("city", "City", "text")],
            vec![],
            "",
        ));
        let mut tracker = CompletionTracker::new();
        let acted = execute(
            &page,
            &mut tracker,
            &CheckpointDecision::Fill {
                label: "City".into(),
                value: "Austin".into(),
            },
        )
        .await
        .unwrap();
        assert!(acted);
        assert_eq!(page.typed("[data-aaid=\"city\"]"), Some("Austin".to_string()));
        // Recorded so a later fill pass will not redo the field.
        assert!(tracker.is_done("https://jobs.example.com/apply", "city"));
    }

    #[tokio::test]
    async fn fill_instruction_cleans_values_by_kind() {
        let page = FakePage::new("https://jobs.example.com/apply");
        page.push_scan(scan_payload(
            vec![field_json("phone", "Phone Number", "phone")],
            vec![],
            "",
        ));
        let mut tracker = CompletionTracker::new();
        let acted = execute(
            &page,
            &mut tracker,
            &CheckpointDecision::Fill {
                label: "Phone Number".into(),
                value: "(240) 610-1453".into(),
            },
        )
        .await
        .unwrap();
        assert!(acted);
        assert_eq!(
            page.typed("[data-aaid=\"phone\"]"),
            Some("2406101453".to_string())
        );
    }

    #[tokio::test]
    async fn missing_targets_are_not_progress() {
        let page = FakePage::new("https://jobs.example.com/apply");
        page.push_scan(scan_payload(vec![], vec![], ""));
        let acted = execute(
            &page,
            &mut CompletionTracker::new(),
            &CheckpointDecision::Click {
                button_text: "Launch".into(),
            },
        )
        .await
        .unwrap();
        assert!(!acted);
    }
}
