//! Loop / stagnation detection over the transition history.
//!
//! URL equality alone both under-detects (dynamic content changes the DOM
//! without changing the URL) and over-detects (filling many fields on one
//! page looks like a loop), so every heuristic also consults the explicit
//! progress flag and the fields-filled count carried by each transition.

use std::collections::HashMap;

use crate::types::{Transition, MAX_CHECKPOINT_ATTEMPTS};

/// Minimum history length before any heuristic runs.
const MIN_HISTORY: usize = 6;
/// Window for the repeated-signature heuristic.
const SIGNATURE_WINDOW: usize = 10;
/// A signature recurring this often inside the window means stuck.
const SIGNATURE_LIMIT: usize = 3;
/// Window for stagnation and ping-pong checks.
const RECENT_WINDOW: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum LoopVerdict {
    Healthy,
    /// Candidate-stuck: same page, no progress. Worth a checkpoint probe
    /// before giving up.
    Stagnating,
    Stuck(String),
}

#[derive(Debug, Clone)]
pub struct LoopDetector {
    max_checkpoint_attempts: u8,
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self {
            max_checkpoint_attempts: MAX_CHECKPOINT_ATTEMPTS,
        }
    }
}

impl LoopDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, history: &[Transition], checkpoint_attempts: u8) -> LoopVerdict {
        if history.len() < MIN_HISTORY {
            return LoopVerdict::Healthy;
        }

        // Stagnation is checked first: a fully stalled page also repeats its
        // transition signature, and it deserves the checkpoint probe before
        // being written off as stuck.
        if is_stagnating(history) {
            if checkpoint_attempts >= self.max_checkpoint_attempts {
                return LoopVerdict::Stuck(format!(
                    "stagnation persisted after {checkpoint_attempts} checkpoint attempts"
                ));
            }
            return LoopVerdict::Stagnating;
        }
        if let Some(reason) = repeated_signature(history) {
            return LoopVerdict::Stuck(reason);
        }
        if let Some(reason) = ping_pong(history) {
            return LoopVerdict::Stuck(reason);
        }
        LoopVerdict::Healthy
    }
}

/// Heuristic 1: an identical (from, to, url, fields_filled) signature
/// recurring within the recent window.
fn repeated_signature(history: &[Transition]) -> Option<String> {
    let window = &history[history.len().saturating_sub(SIGNATURE_WINDOW)..];
    let mut counts: HashMap<(_, _, &str, usize), usize> = HashMap::new();
    for t in window {
        let count = counts
            .entry((t.from, t.to, t.url.as_str(), t.fields_filled))
            .or_insert(0);
        *count += 1;
        if *count >= SIGNATURE_LIMIT {
            return Some(format!(
                "transition {} -> {} at {} repeated {} times with no field growth",
                t.from.name(),
                t.to.name(),
                t.url,
                count
            ));
        }
    }
    None
}

/// Heuristic 3: classic A->B->A->B alternation with position-matched URLs
/// and no progress anywhere in the window.
fn ping_pong(history: &[Transition]) -> Option<String> {
    if history.len() < RECENT_WINDOW {
        return None;
    }
    let recent = &history[history.len() - RECENT_WINDOW..];
    if recent.iter().any(|t| t.progress_made) {
        return None;
    }
    let (a0, b0, a1, b1) = (&recent[0], &recent[1], &recent[2], &recent[3]);
    let same_pair = |x: &Transition, y: &Transition| x.from == y.from && x.to == y.to;
    if same_pair(a0, a1)
        && same_pair(b0, b1)
        && !same_pair(a0, b0)
        && a0.url == a1.url
        && b0.url == b1.url
    {
        return Some(format!(
            "alternating {} -> {} / {} -> {} with no progress",
            a0.from.name(),
            a0.to.name(),
            b0.from.name(),
            b0.to.name()
        ));
    }
    None
}

/// Heuristic 2: same URL, same fields-filled count, no progress across the
/// recent window.
fn is_stagnating(history: &[Transition]) -> bool {
    if history.len() < RECENT_WINDOW {
        return false;
    }
    let recent = &history[history.len() - RECENT_WINDOW..];
    let first = &recent[0];
    recent.iter().all(|t| {
        t.url == first.url && t.fields_filled == first.fields_filled && !t.progress_made
    })
}
