//! Tiered button detection for apply/next/submit/dismiss intents.
//!
//! Most-specific exact text tiers run first, broad substring and class tiers
//! last; each hit is confirmed with a short visibility wait. When no tier
//! matches, the serialized candidates go to the AI classifier.

use anyhow::Result;
use tracing::{debug, warn};

use crate::browser::Page;
use crate::classifier::{ButtonIntent, Classifier};
use crate::dom;
use crate::types::ButtonCandidate;

/// How long to wait for a matched button to become visible/enabled.
const VISIBILITY_WAIT_MS: u64 = 800;

fn exact_phrases(intent: ButtonIntent) -> &'static [&'static str] {
    match intent {
        ButtonIntent::Apply => &[
            "apply now",
            "easy apply",
            "apply for this job",
            "apply",
            "start application",
        ],
        ButtonIntent::Next => &["next", "continue", "save and continue", "next step"],
        ButtonIntent::Submit => &[
            "submit application",
            "submit your application",
            "submit",
            "send application",
            "finish",
        ],
        ButtonIntent::DismissPopup => &[
            "accept all",
            "accept cookies",
            "accept",
            "got it",
            "i agree",
            "no thanks",
            "close",
            "dismiss",
            "×",
            "x",
        ],
    }
}

fn substring_phrases(intent: ButtonIntent) -> &'static [&'static str] {
    match intent {
        ButtonIntent::Apply => &["apply"],
        ButtonIntent::Next => &["next", "continue"],
        ButtonIntent::Submit => &["submit", "finish"],
        ButtonIntent::DismissPopup => &["accept", "close", "dismiss", "reject"],
    }
}

fn class_hints(intent: ButtonIntent) -> &'static [&'static str] {
    match intent {
        ButtonIntent::Apply => &["apply", "jobs-apply"],
        ButtonIntent::Next => &["next", "continue"],
        ButtonIntent::Submit => &["submit"],
        ButtonIntent::DismissPopup => &["close", "dismiss", "modal-close", "cookie"],
    }
}

fn match_tiered(candidates: &[ButtonCandidate], intent: ButtonIntent) -> Option<ButtonCandidate> {
    // Tier 1: exact text, in phrase priority order.
    for phrase in exact_phrases(intent) {
        if let Some(hit) = candidates
            .iter()
            .find(|b| b.text.trim().eq_ignore_ascii_case(phrase))
        {
            return Some(hit.clone());
        }
    }
    // Tier 2: substring.
    for phrase in substring_phrases(intent) {
        if let Some(hit) = candidates
            .iter()
            .find(|b| b.text.to_lowercase().contains(phrase))
        {
            return Some(hit.clone());
        }
    }
    // Tier 3: class hints.
    for hint in class_hints(intent) {
        if let Some(hit) = candidates.iter().find(|b| {
            b.classes
                .iter()
                .any(|c| c.to_lowercase().contains(hint))
        }) {
            return Some(hit.clone());
        }
    }
    None
}

/// Scan the page and locate the button for `intent`, falling back to the AI
/// classifier when tiered matching comes up empty.
pub async fn find_button(
    page: &dyn Page,
    classifier: &dyn Classifier,
    intent: ButtonIntent,
) -> Result<Option<ButtonCandidate>> {
    let candidates = dom::scan_buttons(page).await?;
    if candidates.is_empty() {
        return Ok(None);
    }

    if let Some(hit) = match_tiered(&candidates, intent) {
        if page.wait_for(&hit.selector, VISIBILITY_WAIT_MS).await? {
            debug!(intent = ?intent, text = %hit.text, "button matched by tier");
            return Ok(Some(hit));
        }
        debug!(intent = ?intent, text = %hit.text, "tier match never became visible");
    }

    match classifier.pick_button(&candidates, intent).await {
        Ok(pick) => {
            if let Some(selector) = pick.selector {
                // Only accept selectors that point at a real candidate.
                if let Some(hit) = candidates.iter().find(|b| b.selector == selector) {
                    debug!(intent = ?intent, text = %hit.text, "button picked by classifier");
                    return Ok(Some(hit.clone()));
                }
                warn!(selector, "classifier picked a selector outside the candidate set");
            }
            Ok(None)
        }
        Err(e) => {
            warn!(error = %e, "button classifier unavailable, no match");
            Ok(None)
        }
    }
}
