// MAMA OS — Built-in gateway tools (C6).
//
// A small, filesystem-scoped tool surface exposed to every role's tool
// allowlist by name: `read_file`, `write_file`, `list_dir`. Handlers are
// plain functions, not methods, since `ToolHandler` is a bare fn pointer —
// all state they need comes from `input`/`ToolContext`.

use std::path::{Path, PathBuf};

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::ToolContext;
use crate::atoms::types::{ToolDefinition, ToolParamSpec};
use crate::tools::GatewayToolExecutor;

fn workspace_root() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("mama-os").join("workspace")
}

fn resolve(raw_path: &str) -> EngineResult<PathBuf> {
    let path = Path::new(raw_path);
    let resolved = if path.is_absolute() { path.to_path_buf() } else { workspace_root().join(path) };
    if resolved.to_string_lossy().ends_with(".rs") {
        return Err(EngineError::PermissionDenied("cannot access engine source files".to_string()));
    }
    Ok(resolved)
}

fn read_file(input: &serde_json::Value, _ctx: &ToolContext) -> EngineResult<serde_json::Value> {
    let raw_path = input["path"].as_str().ok_or_else(|| EngineError::tool("read_file", "missing 'path' argument"))?;
    let path = resolve(raw_path)?;
    let content = std::fs::read_to_string(&path).map_err(|e| EngineError::tool("read_file", e.to_string()))?;
    Ok(serde_json::json!({ "content": content }))
}

fn write_file(input: &serde_json::Value, _ctx: &ToolContext) -> EngineResult<serde_json::Value> {
    let raw_path = input["path"].as_str().ok_or_else(|| EngineError::tool("write_file", "missing 'path' argument"))?;
    let content = input["content"].as_str().ok_or_else(|| EngineError::tool("write_file", "missing 'content' argument"))?;
    let path = resolve(raw_path)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| EngineError::tool("write_file", e.to_string()))?;
    }
    std::fs::write(&path, content).map_err(|e| EngineError::tool("write_file", e.to_string()))?;
    Ok(serde_json::json!({ "bytes_written": content.len() }))
}

fn list_dir(input: &serde_json::Value, _ctx: &ToolContext) -> EngineResult<serde_json::Value> {
    let raw_path = input["path"].as_str().unwrap_or(".");
    let path = resolve(raw_path)?;
    let mut entries = Vec::new();
    let dir = std::fs::read_dir(&path).map_err(|e| EngineError::tool("list_dir", e.to_string()))?;
    for entry in dir {
        let entry = entry.map_err(|e| EngineError::tool("list_dir", e.to_string()))?;
        entries.push(entry.file_name().to_string_lossy().to_string());
    }
    Ok(serde_json::json!({ "entries": entries }))
}

pub fn register_all(executor: &mut GatewayToolExecutor) {
    executor.register(
        ToolDefinition {
            name: "read_file".to_string(),
            params: vec![ToolParamSpec { name: "path".to_string(), ty: "string".to_string(), required: true }],
            return_type: "object".to_string(),
            description: "Read a UTF-8 text file within the agent workspace.".to_string(),
            category: "filesystem".to_string(),
            read_only: true,
        },
        read_file,
    );
    executor.register(
        ToolDefinition {
            name: "write_file".to_string(),
            params: vec![
                ToolParamSpec { name: "path".to_string(), ty: "string".to_string(), required: true },
                ToolParamSpec { name: "content".to_string(), ty: "string".to_string(), required: true },
            ],
            return_type: "object".to_string(),
            description: "Write a UTF-8 text file within the agent workspace.".to_string(),
            category: "filesystem".to_string(),
            read_only: false,
        },
        write_file,
    );
    executor.register(
        ToolDefinition {
            name: "list_dir".to_string(),
            params: vec![ToolParamSpec { name: "path".to_string(), ty: "string".to_string(), required: false }],
            return_type: "object".to_string(),
            description: "List entries in a directory within the agent workspace.".to_string(),
            category: "filesystem".to_string(),
            read_only: true,
        },
        list_dir,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext { agent_id: "dev".into(), session_id: "s1".into(), role_name: "full".into() }
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = std::env::temp_dir().join(format!("mama-os-tool-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("note.txt").to_string_lossy().to_string();
        write_file(&serde_json::json!({ "path": path, "content": "hello" }), &ctx()).unwrap();
        let result = read_file(&serde_json::json!({ "path": path }), &ctx()).unwrap();
        assert_eq!(result["content"], "hello");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rust_source_paths_are_refused() {
        let result = read_file(&serde_json::json!({ "path": "/tmp/engine.rs" }), &ctx());
        assert!(result.is_err());
    }

    #[test]
    fn list_dir_reports_written_file() {
        let dir = std::env::temp_dir().join(format!("mama-os-tool-test-{}", uuid::Uuid::new_v4()));
        let file_path = dir.join("a.txt").to_string_lossy().to_string();
        write_file(&serde_json::json!({ "path": &file_path, "content": "x" }), &ctx()).unwrap();
        let result = list_dir(&serde_json::json!({ "path": dir.to_string_lossy() }), &ctx()).unwrap();
        let entries = result["entries"].as_array().unwrap();
        assert!(entries.iter().any(|e| e == "a.txt"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
