//! Per-page memory of which fields have been filled or attempted, so the
//! fill loop never redoes work across iterations.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct CompletionRecord {
    pub label: String,
    pub value: String,
    pub at_epoch_ms: u64,
}

/// Keyed by (page URL, stable field id). A recorded id is never reprocessed
/// on the same page unless tracking is reset after a DOM restructure.
#[derive(Debug, Default)]
pub struct CompletionTracker {
    completed: HashMap<String, HashMap<String, CompletionRecord>>,
    attempts: HashMap<(String, String), u32>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self, url: &str, stable_id: &str) -> bool {
        self.completed
            .get(url)
            .map(|page| page.contains_key(stable_id))
            .unwrap_or(false)
    }

    pub fn record(&mut self, url: &str, stable_id: &str, label: &str, value: &str) {
        self.completed.entry(url.to_string()).or_default().insert(
            stable_id.to_string(),
            CompletionRecord {
                label: label.to_string(),
                value: value.to_string(),
                at_epoch_ms: now_ms(),
            },
        );
    }

    /// Bump and return the attempt count for a field write.
    pub fn note_attempt(&mut self, url: &str, stable_id: &str) -> u32 {
        let count = self
            .attempts
            .entry((url.to_string(), stable_id.to_string()))
            .or_insert(0);
        *count += 1;
        *count
    }

    pub fn filled_count(&self, url: &str) -> usize {
        self.completed.get(url).map(HashMap::len).unwrap_or(0)
    }

    pub fn total_filled(&self) -> usize {
        self.completed.values().map(HashMap::len).sum()
    }

    /// Forget a page, e.g. after detected DOM restructuring.
    pub fn reset_page(&mut self, url: &str) {
        self.completed.remove(url);
        self.attempts.retain(|(u, _), _| u != url);
    }
}
