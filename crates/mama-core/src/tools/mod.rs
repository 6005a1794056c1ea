// MAMA OS — GatewayToolExecutor (C6).
//
// Dispatches a named tool call to a registered handler, enforcing
// `RoleManager` checks first. Handlers are plain function pointers keyed by
// name — no trait objects needed since every handler has the same pure
// `(input, context) -> result` shape (§4.6).

pub mod builtins;

use std::collections::HashMap;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::{ToolContext, ToolHandler};
use crate::atoms::types::{RoleConfig, ToolDefinition};
use crate::role_manager::RoleManager;

/// Tools whose input carries file paths that must additionally clear
/// `RoleManager::is_path_allowed` before dispatch.
fn path_argument_keys(tool_name: &str) -> &'static [&'static str] {
    match tool_name {
        "read_file" | "write_file" | "delete_file" | "list_dir" => &["path"],
        "move_file" => &["from", "to"],
        _ => &[],
    }
}

pub struct GatewayToolExecutor {
    handlers: HashMap<&'static str, ToolHandler>,
    definitions: HashMap<&'static str, ToolDefinition>,
}

impl Default for GatewayToolExecutor {
    fn default() -> Self {
        GatewayToolExecutor { handlers: HashMap::new(), definitions: HashMap::new() }
    }
}

impl GatewayToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: ToolDefinition, handler: ToolHandler) {
        let name: &'static str = Box::leak(definition.name.clone().into_boxed_str());
        self.handlers.insert(name, handler);
        self.definitions.insert(name, definition);
    }

    pub fn definitions(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.definitions.values()
    }

    pub fn execute(
        &self,
        role_manager: &RoleManager,
        role: &RoleConfig,
        tool_name: &str,
        input: &serde_json::Value,
        context: &ToolContext,
    ) -> EngineResult<serde_json::Value> {
        let Some(handler) = self.handlers.get(tool_name) else {
            return Err(EngineError::UnknownTool(tool_name.to_string()));
        };

        if !role_manager.is_tool_allowed(role, tool_name) {
            return Err(EngineError::PermissionDenied(format!("tool '{tool_name}' is not permitted for this role")));
        }

        for key in path_argument_keys(tool_name) {
            if let Some(path) = input.get(*key).and_then(|v| v.as_str()) {
                if !role_manager.is_path_allowed(role, path) {
                    return Err(EngineError::PermissionDenied(format!("path '{path}' is outside the allowed set")));
                }
            }
        }

        handler(input, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::{ToolParamSpec};
    use std::collections::HashMap as Map;

    fn echo_handler(input: &serde_json::Value, _ctx: &ToolContext) -> EngineResult<serde_json::Value> {
        Ok(input.clone())
    }

    fn sample_definition(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            params: vec![ToolParamSpec { name: "path".into(), ty: "string".into(), required: true }],
            return_type: "object".into(),
            description: "echoes input".into(),
            category: "test".into(),
            read_only: true,
        }
    }

    fn ctx() -> ToolContext {
        ToolContext { agent_id: "a".into(), session_id: "s".into(), role_name: "chat_bot".into() }
    }

    #[test]
    fn unknown_tool_fails_with_unknown_tool() {
        let executor = GatewayToolExecutor::new();
        let role_manager = RoleManager::new(Map::new(), Map::new());
        let role = RoleConfig::default();
        let result = executor.execute(&role_manager, &role, "nope", &serde_json::json!({}), &ctx());
        assert!(matches!(result, Err(EngineError::UnknownTool(_))));
    }

    #[test]
    fn blocked_tool_fails_with_permission_denied() {
        let mut executor = GatewayToolExecutor::new();
        executor.register(sample_definition("read_file"), echo_handler);
        let role_manager = RoleManager::new(Map::new(), Map::new());
        let role = RoleConfig { allowed_tools: vec![], ..RoleConfig::default() };
        let result = executor.execute(&role_manager, &role, "read_file", &serde_json::json!({"path": "/tmp/x"}), &ctx());
        assert!(matches!(result, Err(EngineError::PermissionDenied(_))));
    }

    #[test]
    fn allowed_tool_with_disallowed_path_is_denied() {
        let mut executor = GatewayToolExecutor::new();
        executor.register(sample_definition("read_file"), echo_handler);
        let role_manager = RoleManager::new(Map::new(), Map::new());
        let role = RoleConfig {
            allowed_tools: vec!["read_file".into()],
            allowed_paths: vec!["/workspace/**".into()],
            ..RoleConfig::default()
        };
        let result = executor.execute(&role_manager, &role, "read_file", &serde_json::json!({"path": "/etc/passwd"}), &ctx());
        assert!(matches!(result, Err(EngineError::PermissionDenied(_))));
    }

    #[test]
    fn allowed_tool_and_path_dispatches_to_handler() {
        let mut executor = GatewayToolExecutor::new();
        executor.register(sample_definition("read_file"), echo_handler);
        let role_manager = RoleManager::new(Map::new(), Map::new());
        let role = RoleConfig {
            allowed_tools: vec!["read_file".into()],
            allowed_paths: vec!["/workspace/**".into()],
            ..RoleConfig::default()
        };
        let result = executor
            .execute(&role_manager, &role, "read_file", &serde_json::json!({"path": "/workspace/a.txt"}), &ctx())
            .unwrap();
        assert_eq!(result, serde_json::json!({"path": "/workspace/a.txt"}));
    }
}
