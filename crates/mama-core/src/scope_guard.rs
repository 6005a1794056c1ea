// MAMA OS — ScopeGuard (C4).
//
// Compares a delegated task's expected file list (extracted from free-form
// task text) against what a delegate's turn actually touched. Glob matching
// follows the same `*`/`**`/`?` semantics as `glob::Pattern`.

use std::sync::OnceLock;

use glob::Pattern;
use regex::Regex;

use crate::atoms::types::{ScopeCheckResult, ScopeGuardMode};

fn file_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\w\-./]+\.[a-z]{1,4}").expect("file reference regex"))
}

/// Extract plausible file paths from free-form delegation task text.
pub fn extract_expected_files(task_text: &str) -> Vec<String> {
    file_ref_regex()
        .find_iter(task_text)
        .map(|m| m.as_str().to_string())
        .collect()
}

pub struct ScopeGuard {
    pub mode: ScopeGuardMode,
    pub allowed_patterns: Vec<String>,
}

impl ScopeGuard {
    pub fn new(mode: ScopeGuardMode, allowed_patterns: Vec<String>) -> Self {
        ScopeGuard { mode, allowed_patterns }
    }

    fn in_scope(&self, expected: &[String], path: &str) -> bool {
        for exp in expected {
            if exp == path {
                return true;
            }
            // (b) an expected entry is a directory prefix of the modified path
            if exp.ends_with('/') && path.starts_with(exp.as_str()) {
                return true;
            }
            if !exp.ends_with('/') && path.starts_with(&format!("{exp}/")) {
                return true;
            }
        }
        for pat in &self.allowed_patterns {
            if let Ok(glob) = Pattern::new(pat) {
                if glob.matches(path) {
                    return true;
                }
                if let Some(basename) = path.rsplit('/').next() {
                    if glob.matches(basename) {
                        return true;
                    }
                }
            }
        }
        false
    }

    pub fn check(&self, expected_files: &[String], modified_files: &[String]) -> ScopeCheckResult {
        let mut unexpected = Vec::new();
        for path in modified_files {
            if !self.in_scope(expected_files, path) {
                unexpected.push(path.clone());
            }
        }

        let in_scope = unexpected.is_empty() || matches!(self.mode, ScopeGuardMode::Warn);
        let reason = if unexpected.is_empty() {
            None
        } else {
            Some(format!("unexpected files outside declared scope: {}", unexpected.join(", ")))
        };

        ScopeCheckResult {
            in_scope,
            modified_files: modified_files.to_vec(),
            unexpected_files: unexpected,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_file_references_from_task_text() {
        let task = "Fix the bug in src/engine/routing.rs and update README.md";
        let files = extract_expected_files(task);
        assert!(files.contains(&"src/engine/routing.rs".to_string()));
        assert!(files.contains(&"README.md".to_string()));
    }

    #[test]
    fn exact_match_is_in_scope() {
        let guard = ScopeGuard::new(ScopeGuardMode::Block, vec![]);
        let result = guard.check(&["src/a.rs".to_string()], &["src/a.rs".to_string()]);
        assert!(result.in_scope);
        assert!(result.unexpected_files.is_empty());
    }

    #[test]
    fn directory_prefix_is_in_scope() {
        let guard = ScopeGuard::new(ScopeGuardMode::Block, vec![]);
        let result = guard.check(&["src/engine".to_string()], &["src/engine/routing.rs".to_string()]);
        assert!(result.in_scope);
    }

    #[test]
    fn block_mode_fails_on_unexpected_file() {
        let guard = ScopeGuard::new(ScopeGuardMode::Block, vec![]);
        let result = guard.check(&["src/a.rs".to_string()], &["src/a.rs".to_string(), "src/b.rs".to_string()]);
        assert!(!result.in_scope);
        assert_eq!(result.unexpected_files, vec!["src/b.rs".to_string()]);
    }

    #[test]
    fn warn_mode_reports_but_passes() {
        let guard = ScopeGuard::new(ScopeGuardMode::Warn, vec![]);
        let result = guard.check(&["src/a.rs".to_string()], &["src/b.rs".to_string()]);
        assert!(result.in_scope);
        assert!(!result.unexpected_files.is_empty());
        assert!(result.reason.is_some());
    }

    #[test]
    fn glob_pattern_allows_matching_path() {
        let guard = ScopeGuard::new(ScopeGuardMode::Block, vec!["**/*.md".to_string()]);
        let result = guard.check(&[], &["docs/guide.md".to_string()]);
        assert!(result.in_scope);
    }
}
