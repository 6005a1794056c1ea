// MAMA OS — PromptSizeMonitor (C13 helper).
//
// Builds the final prompt from priority-ordered sections and keeps it under
// budget. Priority 1 sections (persona, the current user turn) are never
// dropped; everything else is truncated or removed, lowest priority first,
// until the prompt clears the truncate threshold. If it still exceeds the
// hard ceiling after that, the remaining content is trimmed from the tail.

use crate::atoms::constants::{PROMPT_SIZE_HARD_CHARS, PROMPT_SIZE_TRUNCATE_CHARS, PROMPT_SIZE_WARN_CHARS};

#[derive(Debug, Clone)]
pub struct PromptSection {
    pub name: String,
    /// 1 = never removed. Higher numbers are dropped first when over budget.
    pub priority: u8,
    pub content: String,
}

impl PromptSection {
    pub fn new(name: impl Into<String>, priority: u8, content: impl Into<String>) -> Self {
        PromptSection { name: name.into(), priority, content: content.into() }
    }
}

#[derive(Debug, Clone)]
pub struct PromptSizeMonitor {
    pub warn_chars: usize,
    pub truncate_chars: usize,
    pub hard_chars: usize,
}

impl Default for PromptSizeMonitor {
    fn default() -> Self {
        PromptSizeMonitor {
            warn_chars: PROMPT_SIZE_WARN_CHARS,
            truncate_chars: PROMPT_SIZE_TRUNCATE_CHARS,
            hard_chars: PROMPT_SIZE_HARD_CHARS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuiltPrompt {
    pub text: String,
    pub total_chars: usize,
    pub truncated_sections: Vec<String>,
    pub warned: bool,
}

impl PromptSizeMonitor {
    pub fn build(&self, sections: &[PromptSection]) -> BuiltPrompt {
        let mut ordered: Vec<PromptSection> = sections.to_vec();
        let total_chars: usize = ordered.iter().map(|s| s.content.chars().count()).sum();
        let warned = total_chars >= self.warn_chars;
        if warned {
            log::warn!("prompt size {total_chars} chars crosses warn threshold ({})", self.warn_chars);
        }

        let mut truncated_sections = Vec::new();
        let mut current: usize = total_chars;

        if current > self.truncate_chars {
            // Drop lowest-priority (highest number) sections first, never priority 1.
            let mut removable_idx: Vec<usize> = (0..ordered.len())
                .filter(|&i| ordered[i].priority > 1)
                .collect();
            removable_idx.sort_by_key(|&i| std::cmp::Reverse(ordered[i].priority));

            for idx in removable_idx {
                if current <= self.truncate_chars {
                    break;
                }
                let len = ordered[idx].content.chars().count();
                if len == 0 {
                    continue;
                }
                current -= len;
                truncated_sections.push(ordered[idx].name.clone());
                ordered[idx].content.clear();
            }
        }

        let mut text = join_sections(&ordered);
        let mut text_len = text.chars().count();

        if text_len > self.hard_chars {
            log::warn!("prompt still over hard ceiling ({text_len} > {}) after section trimming; truncating tail", self.hard_chars);
            text = text.chars().take(self.hard_chars).collect();
            text_len = text.chars().count();
        }

        BuiltPrompt { text, total_chars: text_len, truncated_sections, warned }
    }
}

fn join_sections(sections: &[PromptSection]) -> String {
    sections
        .iter()
        .filter(|s| !s.content.is_empty())
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
