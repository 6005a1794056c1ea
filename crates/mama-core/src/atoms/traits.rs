// ── MAMA OS Atoms: Core Traits ─────────────────────────────────────────────
// Seam definitions shared by more than one component. Each trait is the
// contract a component depends on; concrete implementations live in the
// owning component's module (llm_runner, tools).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::atoms::error::EngineResult;

// ── LLMRunner (C10) ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    pub model: Option<String>,
    pub session_prompt: Option<String>,
    pub session_id: Option<String>,
    pub workspace_dir: Option<String>,
    pub timeout_ms: Option<u64>,
    /// Backend-specific "skip permissions" passthrough (§9 open question).
    /// Ignored by backends that don't understand it.
    pub skip_permissions: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub text: String,
    pub session_id: String,
    pub usage: Usage,
}

/// Abstracted prompt→response interface. A subprocess CLI and an embedded
/// HTTP backend both implement this so the orchestrator never needs to know
/// which one it is talking to.
#[async_trait]
pub trait LLMRunner: Send + Sync {
    async fn run(&self, prompt: &str, opts: RunOptions) -> EngineResult<RunOutcome>;

    /// Short identifier used in logs (e.g. "subprocess:claude", "http:openai").
    fn kind(&self) -> &'static str;
}

/// Type-erased runner, used everywhere a concrete backend type would leak
/// through an API boundary (mirrors the `AnyProvider` wrapper pattern used
/// for AI providers elsewhere in this codebase).
pub struct AnyRunner(pub Box<dyn LLMRunner>);

#[async_trait]
impl LLMRunner for AnyRunner {
    async fn run(&self, prompt: &str, opts: RunOptions) -> EngineResult<RunOutcome> {
        self.0.run(prompt, opts).await
    }

    fn kind(&self) -> &'static str {
        self.0.kind()
    }
}

// ── GatewayToolExecutor (C6) ─────────────────────────────────────────────────

/// Context passed to every tool handler: who is calling, under what session,
/// and with what role's permissions already validated by the executor.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub agent_id: String,
    pub session_id: String,
    pub role_name: String,
}

/// A registered tool handler. Handlers are pure functions of `(input,
/// context)` and must be idempotent if they mutate external state (§4.6).
pub type ToolHandler = fn(&serde_json::Value, &ToolContext) -> EngineResult<serde_json::Value>;
