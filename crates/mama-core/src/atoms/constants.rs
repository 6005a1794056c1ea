// ── MAMA OS Atoms: Constants ───────────────────────────────────────────────
// All named default values for the crate live here, grouped by the component
// they parameterize. Every one of these is overridable via config (§6); the
// value here is only the `Default` fallback.

// ── RateLimiter (C1) ───────────────────────────────────────────────────────
pub const RATE_LIMIT_MAX_REQUESTS_PER_MINUTE: u32 = 60;
pub const RATE_LIMIT_MIN_INTERVAL_MS: u64 = 250;
pub const RATE_LIMIT_MAX_QUEUE_SIZE: usize = 500;
pub const RATE_LIMIT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const RATE_LIMIT_MAX_RETRIES: u32 = 3;
pub const RATE_LIMIT_RETRY_DELAY_BASE_MS: u64 = 1_000;
pub const RATE_LIMIT_RETRY_DELAY_MAX_MS: u64 = 30_000;
pub const RATE_LIMIT_RETRY_JITTER_MAX_MS: u64 = 1_000;

// ── ResponseValidator (C3) ─────────────────────────────────────────────────
pub const FLATTERY_THRESHOLD: f64 = 0.12;
pub const FLATTERY_PATTERN_COUNT_THRESHOLD: usize = 4;
pub const FLATTERY_MAX_RETRIES: u32 = 2;

// ── SessionPool (C9) ───────────────────────────────────────────────────────
pub const SESSION_TIMEOUT_SECS: i64 = 30 * 60;
pub const SESSION_CONTEXT_HIGH_WATERMARK: u64 = 160_000;
pub const SESSION_CONTEXT_WINDOW: u64 = 200_000;
pub const SESSION_POOL_MAX_SESSIONS: usize = 100;
pub const SESSION_EVICTION_SWEEP_SECS: u64 = 5 * 60;

// ── Code-Act Sandbox (C7) ──────────────────────────────────────────────────
pub const SANDBOX_MEMORY_LIMIT_BYTES: usize = 32 * 1024 * 1024;
pub const SANDBOX_STACK_LIMIT_BYTES: usize = 512 * 1024;
pub const SANDBOX_TIMEOUT_MS: u64 = 10_000;
pub const SANDBOX_MAX_CONCURRENT_HOST_CALLS: u32 = 50;
pub const SANDBOX_MAX_MARSHAL_DEPTH: usize = 32;

// ── LLMRunner (C10) ────────────────────────────────────────────────────────
pub const RUNNER_SUBPROCESS_TIMEOUT_SECS: u64 = 120;
pub const RUNNER_HTTP_TIMEOUT_SECS: u64 = 120;

// ── StopContinuationHandler (C11) ──────────────────────────────────────────
pub const STOP_CONTINUATION_MAX_RETRIES: u32 = 3;
/// Assumes a ~2000-char platform message limit (§9 open question). Override
/// per-deployment via `stop_continuation.truncation_threshold_chars` if the
/// target gateway's limit differs.
pub const STOP_CONTINUATION_TRUNCATION_THRESHOLD_CHARS: usize = 1800;
pub const STOP_CONTINUATION_TAIL_CHARS: usize = 200;

// ── Orchestrator (C13) ─────────────────────────────────────────────────────
pub const PROMPT_SIZE_WARN_CHARS: usize = 15_000;
pub const PROMPT_SIZE_TRUNCATE_CHARS: usize = 25_000;
pub const PROMPT_SIZE_HARD_CHARS: usize = 40_000;
pub const DELEGATION_MAX_CHAIN_LENGTH: u32 = 10;
pub const DELEGATION_GLOBAL_COOLDOWN_MS: u64 = 2_000;
pub const DELEGATION_MAX_DEPTH: u32 = 1;
pub const DELEGATION_AWAIT_TIMEOUT_SECS: u64 = 10 * 60;
pub const ULTRAWORK_MAX_STEPS: u32 = 20;
pub const ULTRAWORK_MAX_DURATION_MS: u64 = 30 * 60 * 1000;
pub const TOOL_DISPATCH_TIMEOUT_SECS: u64 = 60;

// ── CronScheduler (C14) ────────────────────────────────────────────────────
pub const CRON_JOB_LOCK_TTL_SECS: i64 = 5 * 60;
pub const CRON_TICK_INTERVAL_SECS: u64 = 60;

// ── JobLock (C2) ───────────────────────────────────────────────────────────
pub const JOB_LOCK_DEFAULT_TTL_SECS: i64 = 5 * 60;
