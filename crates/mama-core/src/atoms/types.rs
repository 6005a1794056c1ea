// ── MAMA OS Atoms: Data Model ──────────────────────────────────────────────
// Struct/enum definitions for everything that flows through the orchestration
// core (§3 of the specification) plus the declarative configuration schema
// (§6). Component modules own the behaviour; this file only owns the shapes.
// Atoms layer rule: no I/O, no side effects, no imports from component modules.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::atoms::constants::*;

// ── Message ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub content_type: Option<String>,
}

/// An inbound message from a gateway (or synthesized by the cron scheduler).
/// Immutable once constructed; its lifetime ends when routing completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub source: String,
    pub channel_id: String,
    pub user_id: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

// ── Agents & Roles ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AgentTier {
    /// Full tools + delegation.
    Full = 1,
    /// Read-mostly.
    ReadMostly = 2,
    /// Read-only, scoped execution.
    ReadOnly = 3,
}

impl TryFrom<u8> for AgentTier {
    type Error = String;
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(AgentTier::Full),
            2 => Ok(AgentTier::ReadMostly),
            3 => Ok(AgentTier::ReadOnly),
            other => Err(format!("invalid agent tier: {other}")),
        }
    }
}

impl From<AgentTier> for u8 {
    fn from(t: AgentTier) -> u8 {
        t as u8
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPermissions {
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub blocked: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub persona_text: String,
    pub tier: AgentTier,
    #[serde(default)]
    pub can_delegate: bool,
    #[serde(default)]
    pub trigger_prefix: Option<String>,
    #[serde(default)]
    pub auto_respond_keywords: Vec<String>,
    #[serde(default)]
    pub category_patterns: Vec<String>,
    #[serde(default)]
    pub cooldown_ms: u64,
    pub model: String,
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub tool_permissions: Option<ToolPermissions>,
    #[serde(default = "default_true")]
    pub auto_continue: bool,
    #[serde(default)]
    pub enabled: bool,
}

pub(crate) fn default_true() -> bool { true }

impl AgentConfig {
    /// Enforces the spec invariant: only tier-1 agents may delegate, regardless
    /// of what `can_delegate` says in config.
    pub fn effective_can_delegate(&self) -> bool {
        self.tier == AgentTier::Full && self.can_delegate
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            id: String::new(),
            display_name: String::new(),
            persona_text: String::new(),
            tier: AgentTier::Full,
            can_delegate: false,
            trigger_prefix: None,
            auto_respond_keywords: Vec::new(),
            category_patterns: Vec::new(),
            cooldown_ms: 0,
            model: String::new(),
            bot_token: None,
            tool_permissions: None,
            auto_continue: true,
            enabled: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleConfig {
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub blocked_tools: Vec<String>,
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default)]
    pub system_control: bool,
    #[serde(default)]
    pub sensitive_access: bool,
    #[serde(default)]
    pub max_turns: Option<u32>,
    #[serde(default)]
    pub model: Option<String>,
}

// ── Sessions (C9) ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub channel_key: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_active: chrono::DateTime<chrono::Utc>,
    pub message_count: u64,
    pub cumulative_input_tokens: u64,
    #[serde(skip)]
    pub in_use: bool,
}

impl Session {
    pub fn new(channel_key: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Session {
            session_id: uuid::Uuid::new_v4().to_string(),
            channel_key: channel_key.into(),
            created_at: now,
            last_active: now,
            message_count: 0,
            cumulative_input_tokens: 0,
            in_use: false,
        }
    }

    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>, timeout_secs: i64) -> bool {
        (now - self.last_active).num_seconds() > timeout_secs
    }

    pub fn is_over_watermark(&self, watermark: u64) -> bool {
        self.cumulative_input_tokens >= watermark
    }
}

// ── Delegation (C13) ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    Pending,
    Claimed,
    Completed,
    Failed,
}

/// A persisted `cron_jobs` row (C14). `next_run`/`last_run` are `None` for
/// a job that has never fired or whose schedule string failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronJob {
    pub id: String,
    pub schedule: String,
    pub enabled: bool,
    pub next_run: Option<chrono::DateTime<chrono::Utc>>,
    pub last_run: Option<chrono::DateTime<chrono::Utc>>,
    pub last_status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationEdge {
    pub from_agent_id: String,
    pub to_agent_id: String,
    pub task: String,
    pub wave: u32,
    pub depth: u32,
    pub claimed_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub status: DelegationStatus,
    pub background: bool,
}

#[derive(Debug, Clone)]
pub struct ChainState {
    pub length: u32,
    pub global_cooldown_until: chrono::DateTime<chrono::Utc>,
    /// Agent ids on the active chain for this channel, root first.
    pub ancestors: Vec<String>,
}

impl Default for ChainState {
    fn default() -> Self {
        ChainState {
            length: 0,
            global_cooldown_until: chrono::DateTime::<chrono::Utc>::MIN_UTC,
            ancestors: Vec::new(),
        }
    }
}

// ── UltraWork (C13) ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UltraWorkState {
    Planning,
    Building,
    Retro,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UltraWorkProgressEntry {
    pub step: u32,
    pub description: String,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UltraWorkSession {
    pub session_id: String,
    pub channel_key: String,
    pub state: UltraWorkState,
    pub max_steps: u32,
    pub max_duration_ms: u64,
    pub step_count: u32,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub plan: String,
    pub progress: Vec<UltraWorkProgressEntry>,
}

impl UltraWorkSession {
    pub fn new(channel_key: impl Into<String>, max_steps: u32, max_duration_ms: u64) -> Self {
        UltraWorkSession {
            session_id: uuid::Uuid::new_v4().to_string(),
            channel_key: channel_key.into(),
            state: UltraWorkState::Planning,
            max_steps,
            max_duration_ms,
            step_count: 0,
            started_at: chrono::Utc::now(),
            plan: String::new(),
            progress: Vec::new(),
        }
    }

    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        let elapsed = (now - self.started_at).num_milliseconds().max(0) as u64;
        elapsed >= self.max_duration_ms || self.step_count >= self.max_steps
    }
}

// ── Tools ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
    pub agent_id: String,
    pub session_id: String,
    pub tool_call_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultBody {
    Value(serde_json::Value),
    Error { code: String, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub success: bool,
    pub body: ToolResultBody,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, value: serde_json::Value) -> Self {
        ToolResult { tool_call_id: tool_call_id.into(), success: true, body: ToolResultBody::Value(value) }
    }

    pub fn err(tool_call_id: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        ToolResult {
            tool_call_id: tool_call_id.into(),
            success: false,
            body: ToolResultBody::Error { code: code.into(), message: message.into() },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParamSpec {
    pub name: String,
    pub ty: String,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub params: Vec<ToolParamSpec>,
    pub return_type: String,
    pub description: String,
    pub category: String,
    /// Admitted for tier 2/3 agents (the read-only subset, §4.8).
    pub read_only: bool,
}

// ── Enforcement (C3 / C4) ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlatteryCategory {
    DirectPraise,
    SelfCongratulation,
    StatusFiller,
    UnnecessaryConfirmation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatteryMatch {
    pub label: String,
    pub category: FlatteryCategory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub ratio: f64,
    pub matched: Vec<FlatteryMatch>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeGuardMode {
    Warn,
    Block,
}

impl Default for ScopeGuardMode {
    fn default() -> Self { ScopeGuardMode::Warn }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeCheckResult {
    pub in_scope: bool,
    pub modified_files: Vec<String>,
    pub unexpected_files: Vec<String>,
    pub reason: Option<String>,
}

// ── Configuration schema (§6) ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSectionConfig {
    pub model: String,
    pub max_turns: u32,
    pub timeout_seconds: u64,
    pub backend: String,
}

impl Default for AgentSectionConfig {
    fn default() -> Self {
        AgentSectionConfig {
            model: "claude-3-5-sonnet".into(),
            max_turns: 20,
            timeout_seconds: RUNNER_SUBPROCESS_TIMEOUT_SECS,
            backend: "subprocess".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordGatewayConfig {
    pub token: Option<String>,
    pub require_mention: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackGatewayConfig {
    pub bot_token: Option<String>,
    pub app_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramGatewayConfig {
    pub token: Option<String>,
    pub allowed_chat_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaysConfig {
    pub discord: DiscordGatewayConfig,
    pub slack: SlackGatewayConfig,
    pub telegram: TelegramGatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryConfig {
    pub name: String,
    pub patterns: Vec<String>,
    pub agent_ids: Vec<String>,
    pub priority: i32,
}

impl Default for CategoryConfig {
    fn default() -> Self {
        CategoryConfig { name: String::new(), patterns: Vec::new(), agent_ids: Vec::new(), priority: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UltraWorkConfig {
    pub enabled: bool,
    pub max_steps: u32,
    pub max_duration_ms: u64,
    pub phased_loop: bool,
    pub persist_state: bool,
}

impl Default for UltraWorkConfig {
    fn default() -> Self {
        UltraWorkConfig {
            enabled: true,
            max_steps: ULTRAWORK_MAX_STEPS,
            max_duration_ms: ULTRAWORK_MAX_DURATION_MS,
            phased_loop: true,
            persist_state: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskContinuationConfig {
    pub enabled: bool,
    pub max_retries: u32,
}

impl Default for TaskContinuationConfig {
    fn default() -> Self {
        TaskContinuationConfig { enabled: true, max_retries: STOP_CONTINUATION_MAX_RETRIES }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopPreventionConfig {
    pub max_chain_length: u32,
    pub global_cooldown_ms: u64,
    pub max_delegation_depth: u32,
}

impl Default for LoopPreventionConfig {
    fn default() -> Self {
        LoopPreventionConfig {
            max_chain_length: DELEGATION_MAX_CHAIN_LENGTH,
            global_cooldown_ms: DELEGATION_GLOBAL_COOLDOWN_MS,
            max_delegation_depth: DELEGATION_MAX_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiAgentConfig {
    pub enabled: bool,
    pub free_chat: bool,
    pub default_agent_id: String,
    pub agents: HashMap<String, AgentConfig>,
    pub categories: Vec<CategoryConfig>,
    pub ultrawork: UltraWorkConfig,
    pub task_continuation: TaskContinuationConfig,
    pub loop_prevention: LoopPreventionConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuietHours {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub interval_minutes: u32,
    pub quiet_hours: QuietHours,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig { enabled: true, interval_minutes: 1, quiet_hours: QuietHours::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseValidatorConfig {
    pub enabled: bool,
    pub flattery_threshold: f64,
    pub max_retries: u32,
    pub strict_mode: bool,
    pub pattern_count_threshold: usize,
}

impl Default for ResponseValidatorConfig {
    fn default() -> Self {
        ResponseValidatorConfig {
            enabled: true,
            flattery_threshold: FLATTERY_THRESHOLD,
            max_retries: FLATTERY_MAX_RETRIES,
            strict_mode: false,
            pattern_count_threshold: FLATTERY_PATTERN_COUNT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeGuardConfig {
    pub enabled: bool,
    pub allowed_patterns: Vec<String>,
    pub mode: ScopeGuardMode,
}

impl Default for ScopeGuardConfig {
    fn default() -> Self {
        ScopeGuardConfig { enabled: true, allowed_patterns: Vec::new(), mode: ScopeGuardMode::Warn }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcementConfig {
    pub response_validator: ResponseValidatorConfig,
    pub scope_guard: ScopeGuardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests_per_minute: u32,
    pub min_interval_ms: u64,
    pub max_queue_size: usize,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            max_requests_per_minute: RATE_LIMIT_MAX_REQUESTS_PER_MINUTE,
            min_interval_ms: RATE_LIMIT_MIN_INTERVAL_MS,
            max_queue_size: RATE_LIMIT_MAX_QUEUE_SIZE,
            request_timeout_ms: RATE_LIMIT_REQUEST_TIMEOUT_MS,
            max_retries: RATE_LIMIT_MAX_RETRIES,
            retry_delay_ms: RATE_LIMIT_RETRY_DELAY_BASE_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StopContinuationConfig {
    pub truncation_threshold_chars: usize,
}

impl Default for StopContinuationConfig {
    fn default() -> Self {
        StopContinuationConfig { truncation_threshold_chars: STOP_CONTINUATION_TRUNCATION_THRESHOLD_CHARS }
    }
}

/// Root configuration object, deserialized from a single TOML file (§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MamaConfig {
    pub agent: AgentSectionConfig,
    pub gateways: GatewaysConfig,
    pub multi_agent: MultiAgentConfig,
    pub source_roles: HashMap<String, String>,
    pub roles: HashMap<String, RoleConfig>,
    pub heartbeat: HeartbeatConfig,
    pub enforcement: EnforcementConfig,
    pub rate_limit: RateLimitConfig,
    pub stop_continuation: StopContinuationConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_tier_round_trips_through_u8() {
        assert_eq!(AgentTier::try_from(1u8).unwrap(), AgentTier::Full);
        assert_eq!(u8::from(AgentTier::ReadOnly), 3);
        assert!(AgentTier::try_from(4u8).is_err());
    }

    #[test]
    fn non_tier_one_agent_cannot_delegate_even_if_flag_set() {
        let agent = AgentConfig {
            id: "dev".into(),
            display_name: "Dev".into(),
            persona_text: String::new(),
            tier: AgentTier::ReadMostly,
            can_delegate: true,
            trigger_prefix: None,
            auto_respond_keywords: vec![],
            category_patterns: vec![],
            cooldown_ms: 0,
            model: "m".into(),
            bot_token: None,
            tool_permissions: None,
            auto_continue: true,
            enabled: true,
        };
        assert!(!agent.effective_can_delegate());
    }

    #[test]
    fn default_config_deserializes_from_empty_toml() {
        let cfg: MamaConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.rate_limit.max_requests_per_minute, RATE_LIMIT_MAX_REQUESTS_PER_MINUTE);
        assert_eq!(cfg.multi_agent.loop_prevention.max_delegation_depth, DELEGATION_MAX_DEPTH);
    }
}
