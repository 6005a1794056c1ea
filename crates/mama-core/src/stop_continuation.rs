// MAMA OS — StopContinuationHandler (C11).
//
// Detects truncated / "I'll continue" responses and issues bounded retries.
// Per-channel state is just two counters — no separate module needed for
// persistence; callers that want durability persist `attempts` alongside
// the session row.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::atoms::constants::{STOP_CONTINUATION_MAX_RETRIES, STOP_CONTINUATION_TAIL_CHARS, STOP_CONTINUATION_TRUNCATION_THRESHOLD_CHARS};

const COMPLETION_MARKERS: &[&str] = &["done", "finished", "✅", "task_complete", "완료", "끝"];
const INCOMPLETE_MARKERS: &[&str] = &[
    "i'll continue",
    "let me continue",
    "to be continued",
    "계속하겠",
    "계속할게",
    "이어서",
    "다음으로",
];
const TERMINAL_PUNCTUATION: &[char] = &['.', '!', '?', '。', '…'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Disabled,
    ManuallyStopped,
    Complete,
    IncompleteResponse,
    MaxRetriesReached,
    NormalCompletion,
}

#[derive(Debug, Clone)]
pub struct ContinuationDecision {
    pub should_continue: bool,
    pub reason: StopReason,
    pub continuation_prompt: Option<String>,
    pub max_retries_reached: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    attempts: u32,
    manually_stopped: bool,
}

#[derive(Debug, Clone)]
pub struct StopContinuationConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub truncation_threshold_chars: usize,
}

impl Default for StopContinuationConfig {
    fn default() -> Self {
        StopContinuationConfig {
            enabled: true,
            max_retries: STOP_CONTINUATION_MAX_RETRIES,
            truncation_threshold_chars: STOP_CONTINUATION_TRUNCATION_THRESHOLD_CHARS,
        }
    }
}

pub struct StopContinuationHandler {
    config: StopContinuationConfig,
    state: Mutex<HashMap<String, ChannelState>>,
}

impl StopContinuationHandler {
    pub fn new(config: StopContinuationConfig) -> Self {
        StopContinuationHandler { config, state: Mutex::new(HashMap::new()) }
    }

    pub fn manually_stop(&self, channel_key: &str) {
        self.state.lock().entry(channel_key.to_string()).or_default().manually_stopped = true;
    }

    pub fn resume(&self, channel_key: &str) {
        self.state.lock().entry(channel_key.to_string()).or_default().manually_stopped = false;
    }

    pub fn analyze(&self, channel_key: &str, response_text: &str) -> ContinuationDecision {
        if !self.config.enabled {
            return decision(false, StopReason::Disabled, None, false);
        }

        let mut state = self.state.lock();
        let entry = state.entry(channel_key.to_string()).or_default();

        if entry.manually_stopped {
            return decision(false, StopReason::ManuallyStopped, None, false);
        }

        if has_completion_marker_in_tail(response_text) {
            entry.attempts = 0;
            return decision(false, StopReason::Complete, None, false);
        }

        let looks_incomplete = has_incomplete_marker(response_text) || is_truncated(response_text, self.config.truncation_threshold_chars);

        if looks_incomplete {
            if entry.attempts + 1 > self.config.max_retries {
                entry.attempts = 0;
                return decision(false, StopReason::MaxRetriesReached, None, true);
            }
            entry.attempts += 1;
            let prompt = continuation_prompt(response_text);
            return decision(true, StopReason::IncompleteResponse, Some(prompt), false);
        }

        entry.attempts = 0;
        decision(false, StopReason::NormalCompletion, None, false)
    }
}

fn decision(should_continue: bool, reason: StopReason, continuation_prompt: Option<String>, max_retries_reached: bool) -> ContinuationDecision {
    ContinuationDecision { should_continue, reason, continuation_prompt, max_retries_reached }
}

fn has_completion_marker_in_tail(text: &str) -> bool {
    let tail: Vec<&str> = text.lines().rev().take(3).collect();
    let tail_text = tail.join("\n").to_lowercase();
    COMPLETION_MARKERS.iter().any(|m| tail_text.contains(&m.to_lowercase()))
}

fn has_incomplete_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    INCOMPLETE_MARKERS.iter().any(|m| lower.contains(&m.to_lowercase()))
}

fn is_truncated(text: &str, threshold: usize) -> bool {
    if text.chars().count() < threshold {
        return false;
    }
    match text.trim_end().chars().last() {
        Some(c) => !TERMINAL_PUNCTUATION.contains(&c),
        None => false,
    }
}

/// Tail of the previous response (last N chars for long responses, full
/// text for short ones) plus an instruction to end with a completion marker.
fn continuation_prompt(previous_text: &str) -> String {
    let tail: String = if previous_text.chars().count() > STOP_CONTINUATION_TAIL_CHARS {
        let start = previous_text.chars().count() - STOP_CONTINUATION_TAIL_CHARS;
        previous_text.chars().skip(start).collect()
    } else {
        previous_text.to_string()
    };
    format!(
        "Continue from where you left off:\n...{tail}\n\nWhen you are finished, end your response with DONE or TASK_COMPLETE."
    )
}
