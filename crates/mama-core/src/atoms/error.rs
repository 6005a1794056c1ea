// ── Paw Atoms: Error Types ─────────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, DB, Provider, Config…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • `EngineError` → `String` conversion is provided via `Display` so that
//     Tauri command boundaries (`Result<T, String>`) can call `.map_err(|e|
//     e.to_string())` without boilerplate.
//   • No variant carries secret material (API keys, passwords) in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// AI provider HTTP or API-level failure (non-secret detail only).
    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Tool execution failure.
    #[error("Tool error: {tool}: {message}")]
    Tool { tool: String, message: String },

    /// Channel / bridge failure.
    #[error("Channel error: {channel}: {message}")]
    Channel { channel: String, message: String },

    /// Engine or agent configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication / authorization failure.
    #[error("Auth error: {0}")]
    Auth(String),

    /// Security policy violation (risk classification, approval denial, etc.).
    #[error("Security error: {0}")]
    Security(String),

    /// OS keychain / credential store failure.
    #[error("Keyring error: {0}")]
    Keyring(String),

    /// External process (CLI tool, sandbox, etc.) returned a non-zero exit.
    #[error("Process error: {0}")]
    Process(String),

    /// Code-Act sandbox failure (VM construction, memory/stack limit, interrupt).
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    /// LLMRunner failure — see `RunnerErrorKind` for the taxonomy.
    #[error("Runner error ({kind:?}): {detail}")]
    Runner { kind: RunnerErrorKind, detail: String },

    /// No session exists for the channel and none could be created.
    #[error("no active session for channel")]
    NoSession,

    /// A session id was referenced that does not exist in the pool.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// GatewayToolExecutor was asked to dispatch a name with no registered handler.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// RoleManager denied a tool or path access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// RateLimiter rejected an outbound call after retries were exhausted.
    #[error("rate limited")]
    RateLimited,

    /// RateLimiter's per-entry deadline elapsed before dispatch.
    #[error("request timed out")]
    RequestTimeout,

    /// RateLimiter's bounded FIFO queue was full on submission.
    #[error("queue full")]
    QueueFull,

    /// ScopeGuard (in `block` mode) found modifications outside the task's declared scope.
    #[error("scope creep: unexpected files {0:?}")]
    ScopeCreep(Vec<String>),

    /// ResponseValidator rejected a response for excessive flattery.
    #[error("flattery rejected: {0}")]
    FlatteryRejected(String),

    /// A bounded retry loop (validator re-prompt, continuation) exhausted its budget.
    #[error("max retries reached")]
    MaxRetriesReached,

    /// Orchestrator refused a `DELEGATE::`/`DELEGATE_BG::` line — see `DelegationBlockReason`.
    #[error("delegation blocked: {0:?}")]
    DelegationBlocked(DelegationBlockReason),

    /// JobLock is already held by another owner and has not yet expired.
    #[error("lock busy: {0}")]
    Busy(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

/// Why an `LLMRunner::run` call failed (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerErrorKind {
    Timeout,
    ExitNonZero,
    ParseError,
    Network,
}

/// Why the orchestrator refused a delegation line (§4.13).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationBlockReason {
    Depth,
    Cycle,
    ChainLength,
    Cooldown,
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create a provider error with name and message.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.into(), message: message.into() }
    }

    /// Create a tool error with name and message.
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool { tool: tool.into(), message: message.into() }
    }

    /// Create a channel error with name and message.
    pub fn channel(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Channel { channel: channel.into(), message: message.into() }
    }

    /// Create a sandbox error with message.
    pub fn sandbox(message: impl Into<String>) -> Self {
        Self::Sandbox(message.into())
    }

    /// Create a config error with message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a runner error with kind and detail.
    pub fn runner(kind: RunnerErrorKind, detail: impl Into<String>) -> Self {
        Self::Runner { kind, detail: detail.into() }
    }

    /// The stable wire code surfaced to gateways and tool-result messages (§6
    /// of the specification). Unmapped variants fall back to a generic code —
    /// they are not part of the contract callers may match on.
    pub fn as_wire_code(&self) -> &'static str {
        match self {
            EngineError::NoSession => "no_session",
            EngineError::SessionNotFound(_) => "session_not_found",
            EngineError::UnknownTool(_) => "unknown_tool",
            EngineError::PermissionDenied(_) => "permission_denied",
            EngineError::RateLimited => "rate_limited",
            EngineError::RequestTimeout => "request_timeout",
            EngineError::QueueFull => "queue_full",
            EngineError::ScopeCreep(_) => "scope_creep",
            EngineError::FlatteryRejected(_) => "flattery_rejected",
            EngineError::MaxRetriesReached => "max_retries_reached",
            EngineError::DelegationBlocked(DelegationBlockReason::Depth) => "delegation_blocked_depth",
            EngineError::DelegationBlocked(DelegationBlockReason::Cycle) => "delegation_blocked_cycle",
            EngineError::DelegationBlocked(DelegationBlockReason::ChainLength) => "delegation_blocked_chain_length",
            EngineError::DelegationBlocked(DelegationBlockReason::Cooldown) => "delegation_blocked_cooldown",
            EngineError::Runner { .. } => "runner_error",
            EngineError::Busy(_) => "lock_busy",
            _ => "internal_error",
        }
    }
}

// ── Migration bridge: String → EngineError ─────────────────────────────────
// Allows `?` on functions still returning `Result<T, String>` inside functions
// that return `EngineResult<T>`. Remove once all modules are migrated.

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations should return this type.
/// At Tauri command boundaries, convert with `.map_err(|e| e.to_string())`.
pub type EngineResult<T> = Result<T, EngineError>;

// ── Conversion: EngineError → String ──────────────────────────────────────
// Lets Tauri command functions call `.map_err(EngineError::into)` directly.

impl From<EngineError> for String {
    fn from(e: EngineError) -> Self {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_match_spec_strings() {
        assert_eq!(EngineError::NoSession.as_wire_code(), "no_session");
        assert_eq!(
            EngineError::DelegationBlocked(DelegationBlockReason::Cycle).as_wire_code(),
            "delegation_blocked_cycle"
        );
        assert_eq!(EngineError::QueueFull.as_wire_code(), "queue_full");
    }

    #[test]
    fn tool_constructor_carries_name_and_message() {
        let e = EngineError::tool("fetch", "bad url");
        let s = e.to_string();
        assert!(s.contains("fetch"));
        assert!(s.contains("bad url"));
    }
}
