// MAMA OS — ResponseValidator (C3).
//
// Flattery/filler detector. Same pattern-catalogue shape as the injection
// scanner: a static table of `{pattern, category, label}`, a scan that
// collects every match, then a score (here, two independent thresholds
// instead of one composite score) decides accept/reject.

use std::sync::OnceLock;

use regex::Regex;

use crate::atoms::constants::{
    FLATTERY_MAX_RETRIES, FLATTERY_PATTERN_COUNT_THRESHOLD, FLATTERY_THRESHOLD,
};
use crate::atoms::types::{FlatteryCategory, FlatteryMatch, ValidationResult};

struct FlatteryPattern {
    pattern: &'static str,
    category: FlatteryCategory,
    label: &'static str,
}

/// ~50-entry bilingual (English + Korean) catalogue of praise, self-
/// congratulation, status-filler, and unnecessary-confirmation phrases.
/// Matching is case-insensitive substring search, same as the injection
/// scanner — no NLP, just a fixed vocabulary.
fn catalogue() -> &'static [FlatteryPattern] {
    use FlatteryCategory::*;
    static CATALOGUE: &[FlatteryPattern] = &[
        // ── direct praise ──
        FlatteryPattern { pattern: "great question", category: DirectPraise, label: "great_question" },
        FlatteryPattern { pattern: "excellent question", category: DirectPraise, label: "great_question" },
        FlatteryPattern { pattern: "what a great idea", category: DirectPraise, label: "great_idea" },
        FlatteryPattern { pattern: "brilliant idea", category: DirectPraise, label: "great_idea" },
        FlatteryPattern { pattern: "great catch", category: DirectPraise, label: "great_catch" },
        FlatteryPattern { pattern: "good catch", category: DirectPraise, label: "great_catch" },
        FlatteryPattern { pattern: "you're absolutely right", category: DirectPraise, label: "absolutely_right" },
        FlatteryPattern { pattern: "you are absolutely right", category: DirectPraise, label: "absolutely_right" },
        FlatteryPattern { pattern: "that's a fantastic point", category: DirectPraise, label: "fantastic_point" },
        FlatteryPattern { pattern: "incredibly insightful", category: DirectPraise, label: "insightful" },
        FlatteryPattern { pattern: "very insightful", category: DirectPraise, label: "insightful" },
        FlatteryPattern { pattern: "amazing work", category: DirectPraise, label: "amazing_work" },
        FlatteryPattern { pattern: "impressive work", category: DirectPraise, label: "amazing_work" },
        FlatteryPattern { pattern: "정말 좋은 질문", category: DirectPraise, label: "great_question" },
        FlatteryPattern { pattern: "훌륭한 아이디어", category: DirectPraise, label: "great_idea" },
        FlatteryPattern { pattern: "정확하게 보셨", category: DirectPraise, label: "great_catch" },
        FlatteryPattern { pattern: "훌륭합니다", category: DirectPraise, label: "wonderful" },
        FlatteryPattern { pattern: "완벽합니다", category: DirectPraise, label: "perfect_desc" },
        FlatteryPattern { pattern: "최고의 솔루션", category: DirectPraise, label: "best_solution" },
        FlatteryPattern { pattern: "최고의", category: DirectPraise, label: "the_best" },
        FlatteryPattern { pattern: "솔루션이에요", category: DirectPraise, label: "solution_filler" },
        // ── self-congratulation ──
        FlatteryPattern { pattern: "i did a great job", category: SelfCongratulation, label: "self_praise" },
        FlatteryPattern { pattern: "i nailed it", category: SelfCongratulation, label: "self_praise" },
        FlatteryPattern { pattern: "perfect, i've successfully", category: SelfCongratulation, label: "perfect_success" },
        FlatteryPattern { pattern: "i've successfully completed", category: SelfCongratulation, label: "perfect_success" },
        FlatteryPattern { pattern: "flawless execution", category: SelfCongratulation, label: "flawless" },
        FlatteryPattern { pattern: "i'm proud of this", category: SelfCongratulation, label: "self_proud" },
        FlatteryPattern { pattern: "제가 완벽하게", category: SelfCongratulation, label: "perfect_success" },
        FlatteryPattern { pattern: "성공적으로 완료했", category: SelfCongratulation, label: "perfect_success" },
        // ── status filler ──
        FlatteryPattern { pattern: "i'm happy to help", category: StatusFiller, label: "happy_to_help" },
        FlatteryPattern { pattern: "i'd be happy to", category: StatusFiller, label: "happy_to_help" },
        FlatteryPattern { pattern: "of course!", category: StatusFiller, label: "of_course" },
        FlatteryPattern { pattern: "absolutely!", category: StatusFiller, label: "absolutely_filler" },
        FlatteryPattern { pattern: "great, let's", category: StatusFiller, label: "great_lets" },
        FlatteryPattern { pattern: "awesome, here", category: StatusFiller, label: "awesome_here" },
        FlatteryPattern { pattern: "certainly! here", category: StatusFiller, label: "certainly_here" },
        FlatteryPattern { pattern: "기꺼이 도와드리겠습니다", category: StatusFiller, label: "happy_to_help" },
        FlatteryPattern { pattern: "물론입니다", category: StatusFiller, label: "of_course" },
        // ── unnecessary confirmation ──
        FlatteryPattern { pattern: "as you correctly pointed out", category: UnnecessaryConfirmation, label: "as_you_said" },
        FlatteryPattern { pattern: "as you mentioned", category: UnnecessaryConfirmation, label: "as_you_said" },
        FlatteryPattern { pattern: "you're right that", category: UnnecessaryConfirmation, label: "youre_right_that" },
        FlatteryPattern { pattern: "confirming that i have", category: UnnecessaryConfirmation, label: "confirming_done" },
        FlatteryPattern { pattern: "to confirm, i have", category: UnnecessaryConfirmation, label: "confirming_done" },
        FlatteryPattern { pattern: "just to confirm", category: UnnecessaryConfirmation, label: "just_to_confirm" },
        FlatteryPattern { pattern: "말씀하신 대로", category: UnnecessaryConfirmation, label: "as_you_said" },
        FlatteryPattern { pattern: "확인해 드리면", category: UnnecessaryConfirmation, label: "confirming_done" },
    ];
    CATALOGUE
}

fn code_strip_patterns() -> &'static (Regex, Regex) {
    static PATTERNS: OnceLock<(Regex, Regex)> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        (
            Regex::new(r"(?s)```.*?```").expect("fenced code regex"),
            Regex::new(r"`[^`\n]*`").expect("inline code regex"),
        )
    })
}

/// Remove fenced code blocks and inline code spans before scanning, so code
/// containing words like "perfect" isn't mistaken for flattery.
fn strip_code(text: &str) -> String {
    let (fenced, inline) = code_strip_patterns();
    let no_fenced = fenced.replace_all(text, " ");
    inline.replace_all(&no_fenced, " ").into_owned()
}

#[derive(Debug, Clone)]
pub struct ResponseValidatorConfig {
    pub flattery_threshold: f64,
    pub pattern_count_threshold: usize,
    pub max_retries: u32,
}

impl Default for ResponseValidatorConfig {
    fn default() -> Self {
        ResponseValidatorConfig {
            flattery_threshold: FLATTERY_THRESHOLD,
            pattern_count_threshold: FLATTERY_PATTERN_COUNT_THRESHOLD,
            max_retries: FLATTERY_MAX_RETRIES,
        }
    }
}

pub struct ResponseValidator {
    config: ResponseValidatorConfig,
}

impl ResponseValidator {
    pub fn new(config: ResponseValidatorConfig) -> Self {
        ResponseValidator { config }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Scan `text` for flattery/filler. `strict_mode` doubles both the
    /// ratio and pattern-count effective thresholds down (tighter bar) for
    /// agent-to-agent turns; non-strict (agent-to-human) gets 2x headroom.
    pub fn validate(&self, text: &str, strict_mode: bool) -> ValidationResult {
        let scanned = strip_code(text);
        let non_code_len = scanned.chars().filter(|c| !c.is_whitespace()).count().max(1);
        let lower = scanned.to_lowercase();

        let mut matched: Vec<FlatteryMatch> = Vec::new();
        let mut matched_chars: usize = 0;
        let mut seen_labels = std::collections::HashSet::new();

        for pat in catalogue() {
            if let Some(idx) = lower.find(pat.pattern) {
                let _ = idx;
                matched_chars += pat.pattern.chars().count();
                if seen_labels.insert(pat.label) {
                    matched.push(FlatteryMatch { label: pat.label.to_string(), category: pat.category });
                }
            }
        }

        let ratio = matched_chars as f64 / non_code_len as f64;
        let ratio_limit = if strict_mode { self.config.flattery_threshold } else { self.config.flattery_threshold * 2.0 };
        let count_limit = if strict_mode { self.config.pattern_count_threshold } else { self.config.pattern_count_threshold * 2 };

        let ratio_exceeded = ratio > ratio_limit;
        let count_exceeded = seen_labels.len() > count_limit;

        if ratio_exceeded || count_exceeded {
            let labels: Vec<&str> = matched.iter().map(|m| m.label.as_str()).collect();
            let reason = Some(format!("flattery detected: {}", labels.join(", ")));
            ValidationResult { valid: false, ratio, matched, reason }
        } else {
            ValidationResult { valid: true, ratio, matched, reason: None }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_response_passes() {
        let v = ResponseValidator::new(ResponseValidatorConfig::default());
        let r = v.validate("The function returns the sum of two integers.", true);
        assert!(r.valid);
        assert!(r.matched.is_empty());
    }

    #[test]
    fn heavy_flattery_fails_strict_mode() {
        let v = ResponseValidator::new(ResponseValidatorConfig::default());
        let text = "Great question! You're absolutely right, and I'm happy to help — \
                    as you correctly pointed out, great catch on that, amazing work!";
        let r = v.validate(text, true);
        assert!(!r.valid);
        assert!(r.reason.is_some());
    }

    #[test]
    fn non_strict_mode_has_more_headroom() {
        let v = ResponseValidator::new(ResponseValidatorConfig::default());
        let text = "Great question! Of course, here's the answer.";
        let strict = v.validate(text, true);
        let lenient = v.validate(text, false);
        assert!(lenient.ratio <= strict.ratio + f64::EPSILON);
    }

    #[test]
    fn flattery_inside_code_fence_is_ignored() {
        let v = ResponseValidator::new(ResponseValidatorConfig::default());
        let text = "```\n// great job, amazing work, flawless execution\n```\nHere is the diff.";
        let r = v.validate(text, true);
        assert!(r.valid);
    }

    #[test]
    fn distinct_pattern_count_triggers_even_at_low_ratio() {
        let cfg = ResponseValidatorConfig { pattern_count_threshold: 1, ..ResponseValidatorConfig::default() };
        let v = ResponseValidator::new(cfg);
        let text = "Great question. Great catch. Of course. As you mentioned before.";
        let r = v.validate(text, true);
        assert!(!r.valid);
    }
}
