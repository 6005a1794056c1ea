// MAMA OS — RoleManager (C5).
//
// Maps a message source ("discord", "slack", "viewer", …) to a `RoleConfig`
// and validates tool/path access against it. Sensitive-value masking follows
// the same line-based redaction shape used elsewhere in this codebase for
// exporting configuration with secrets scrubbed.

use std::collections::HashMap;

use glob::Pattern;

use crate::atoms::types::RoleConfig;

/// Key-name fragments that mark a config value as secret. Case-insensitive
/// substring match against the key.
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &["token", "api_key", "apikey", "secret", "password", "bot_token"];

pub struct RoleManager {
    source_roles: HashMap<String, String>,
    roles: HashMap<String, RoleConfig>,
    default_role: RoleConfig,
}

impl RoleManager {
    pub fn new(source_roles: HashMap<String, String>, roles: HashMap<String, RoleConfig>) -> Self {
        RoleManager { source_roles, roles, default_role: RoleConfig::default() }
    }

    pub fn role_for(&self, source: &str) -> &RoleConfig {
        self.source_roles
            .get(source)
            .and_then(|name| self.roles.get(name))
            .unwrap_or(&self.default_role)
    }

    /// `blockedTools` wins over `allowedTools`. `allowedTools` supports `*`
    /// (match everything) and suffix globs such as `mama_*`.
    pub fn is_tool_allowed(&self, role: &RoleConfig, tool_name: &str) -> bool {
        if role.blocked_tools.iter().any(|p| tool_glob_matches(p, tool_name)) {
            return false;
        }
        role.allowed_tools.iter().any(|p| tool_glob_matches(p, tool_name))
    }

    /// Glob match over absolute paths, after `~` expansion and lexical
    /// `..`/`.` normalization. Normalizing before the glob match closes a
    /// traversal gap: `glob::Pattern` matches the string as given, so an
    /// un-normalized `/workspace/../../etc/passwd` would otherwise satisfy
    /// an `allowed_paths: ["/workspace/**"]` pattern by sharing its literal
    /// prefix.
    pub fn is_path_allowed(&self, role: &RoleConfig, path: &str) -> bool {
        let expanded = normalize_path(&expand_tilde(path));
        role.allowed_paths.iter().any(|pat| {
            let expanded_pat = expand_tilde(pat);
            Pattern::new(&expanded_pat)
                .map(|g| g.matches(&expanded))
                .unwrap_or(false)
        })
    }

    /// Mask sensitive values in a `key = "value"`-style config export when
    /// the role lacks `sensitiveAccess`.
    pub fn mask_sensitive_config(&self, role: &RoleConfig, raw: &str) -> String {
        if role.sensitive_access {
            return raw.to_string();
        }
        raw.lines()
            .map(|line| {
                let trimmed = line.trim_start();
                let key = trimmed.split('=').next().unwrap_or("").trim().to_lowercase();
                if SENSITIVE_KEY_FRAGMENTS.iter().any(|frag| key.contains(frag)) {
                    if let Some(eq) = line.find('=') {
                        format!("{}= \"[redacted]\"", &line[..eq])
                    } else {
                        line.to_string()
                    }
                } else {
                    line.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn tool_glob_matches(pattern: &str, tool_name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return tool_name.starts_with(prefix);
    }
    pattern == tool_name
}

/// Collapse `.`/`..` components without touching the filesystem (the target
/// may not exist yet, so `Path::canonicalize` isn't an option here). A
/// `ParentDir` past the root simply has nothing left to pop.
fn normalize_path(path: &str) -> String {
    use std::path::Component;

    let mut out = std::path::PathBuf::new();
    for component in std::path::Path::new(path).components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out.to_string_lossy().into_owned()
}

fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().into_owned();
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role_with(allowed: &[&str], blocked: &[&str]) -> RoleConfig {
        RoleConfig {
            allowed_tools: allowed.iter().map(|s| s.to_string()).collect(),
            blocked_tools: blocked.iter().map(|s| s.to_string()).collect(),
            ..RoleConfig::default()
        }
    }

    #[test]
    fn blocked_tool_wins_over_wildcard_allow() {
        let mgr = RoleManager::new(HashMap::new(), HashMap::new());
        let role = role_with(&["*"], &["delete_file"]);
        assert!(!mgr.is_tool_allowed(&role, "delete_file"));
        assert!(mgr.is_tool_allowed(&role, "read_file"));
    }

    #[test]
    fn suffix_glob_allows_matching_prefix() {
        let mgr = RoleManager::new(HashMap::new(), HashMap::new());
        let role = role_with(&["mama_*"], &[]);
        assert!(mgr.is_tool_allowed(&role, "mama_search"));
        assert!(!mgr.is_tool_allowed(&role, "other_tool"));
    }

    #[test]
    fn unknown_source_falls_back_to_default_role() {
        let mgr = RoleManager::new(HashMap::new(), HashMap::new());
        let role = mgr.role_for("unmapped_source");
        assert!(role.allowed_tools.is_empty());
    }

    #[test]
    fn source_maps_to_configured_role() {
        let mut source_roles = HashMap::new();
        source_roles.insert("discord".to_string(), "chat_bot".to_string());
        let mut roles = HashMap::new();
        roles.insert("chat_bot".to_string(), role_with(&["mama_*"], &[]));
        let mgr = RoleManager::new(source_roles, roles);
        let role = mgr.role_for("discord");
        assert!(mgr.is_tool_allowed(role, "mama_fetch"));
    }

    #[test]
    fn path_traversal_outside_allowed_prefix_is_rejected() {
        let mgr = RoleManager::new(HashMap::new(), HashMap::new());
        let role = RoleConfig { allowed_paths: vec!["/workspace/**".to_string()], ..RoleConfig::default() };
        assert!(!mgr.is_path_allowed(&role, "/workspace/../../etc/passwd"));
        assert!(mgr.is_path_allowed(&role, "/workspace/project/src/lib.rs"));
    }

    #[test]
    fn masks_sensitive_keys_without_sensitive_access() {
        let mgr = RoleManager::new(HashMap::new(), HashMap::new());
        let role = RoleConfig { sensitive_access: false, ..RoleConfig::default() };
        let raw = "bot_token = \"abc123\"\nmodel = \"claude\"";
        let masked = mgr.mask_sensitive_config(&role, raw);
        assert!(masked.contains("[redacted]"));
        assert!(masked.contains("claude"));
        assert!(!masked.contains("abc123"));
    }

    #[test]
    fn sensitive_access_role_sees_unmasked_config() {
        let mgr = RoleManager::new(HashMap::new(), HashMap::new());
        let role = RoleConfig { sensitive_access: true, ..RoleConfig::default() };
        let raw = "bot_token = \"abc123\"";
        assert_eq!(mgr.mask_sensitive_config(&role, raw), raw);
    }
}
