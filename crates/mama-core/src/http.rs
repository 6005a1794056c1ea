// MAMA OS — shared HTTP plumbing.
//
// Retry/backoff, circuit breaking, and a certificate-pinned client shared by
// the HTTP `LLMRunner` backend and outbound gateway calls (Discord/Slack/
// Telegram REST + gateway dials). Also carries an outbound request audit log
// for the HTTP runner backend so signed provider calls can be replayed/
// inspected without touching raw credentials.
//
// Features:
//   • Exponential backoff with ±25% jitter (base 1s, max 30s)
//   • Retry on 429 (rate limit), 500, 502, 503, 504, 529
//   • Respects `Retry-After` header
//   • Circuit breaker: N consecutive failures → fail fast for a cooldown
//   • Gateway reconnect helper with escalating backoff + cap
//   • Certificate-pinned reqwest::Client factory

use log::{info, warn};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

// ── Constants ──────────────────────────────────────────────────────────────

/// Default maximum number of retry attempts per request.
pub const MAX_RETRIES: u32 = 3;

/// Initial retry delay in milliseconds (doubles each attempt).
const INITIAL_RETRY_DELAY_MS: u64 = 1_000;

/// Maximum retry delay cap in milliseconds (30 seconds).
const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Maximum gateway reconnect delay cap in milliseconds (5 minutes).
const MAX_RECONNECT_DELAY_MS: u64 = 300_000;

// ── Retryable status detection ─────────────────────────────────────────────

/// Check if an HTTP status code represents a transient/retryable error.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

// ── Backoff delay ──────────────────────────────────────────────────────────

/// Sleep with exponential backoff + ±25% jitter.
/// Respects Retry-After header if the server sent one.
/// Returns the actual delay duration for logging.
pub async fn retry_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    let base_ms = INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt);
    let capped_ms = base_ms.min(MAX_RETRY_DELAY_MS);
    let delay_ms = if let Some(secs) = retry_after_secs {
        (secs.min(60) * 1000).max(capped_ms)
    } else {
        capped_ms
    };
    let jittered = apply_jitter(delay_ms);
    let delay = Duration::from_millis(jittered);
    tokio::time::sleep(delay).await;
    delay
}

/// Compute exponential backoff delay for gateway reconnection.
/// Uses a longer cap (5 minutes) than request retries. `attempt` is 0-based.
pub async fn reconnect_delay(attempt: u32) -> Duration {
    let base_ms = INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt.min(12));
    let capped_ms = base_ms.min(MAX_RECONNECT_DELAY_MS);
    let jittered = apply_jitter(capped_ms);
    let delay = Duration::from_millis(jittered);
    tokio::time::sleep(delay).await;
    delay
}

/// Apply ±25% jitter to prevent thundering-herd effects.
fn apply_jitter(base_ms: u64) -> u64 {
    let jitter_range = (base_ms / 4) as i64;
    if jitter_range == 0 {
        return base_ms.max(100);
    }
    let offset = (rand_jitter() % (2 * jitter_range + 1)) - jitter_range;
    let result = base_ms as i64 + offset;
    result.max(100) as u64
}

/// Simple jitter source using system clock nanos (no extra crate needed).
fn rand_jitter() -> i64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as i64
}

// ── Retry-After header parsing ─────────────────────────────────────────────

/// Parse Retry-After header value (integer seconds only).
/// HTTP-date format is not implemented — falls back to computed backoff.
pub fn parse_retry_after(header_value: &str) -> Option<u64> {
    header_value.trim().parse::<u64>().ok()
}

// ── Circuit Breaker ────────────────────────────────────────────────────────

/// A simple circuit breaker that trips after N consecutive failures,
/// then rejects requests for a cooldown period before allowing retries.
///
/// States:
///   Closed   — normal operation, requests pass through
///   Open     — rejecting requests (cooldown active)
///   HalfOpen — cooldown expired, one probe request allowed
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    tripped_at: AtomicU64,
    threshold: u32,
    cooldown_secs: u64,
}

impl CircuitBreaker {
    /// `threshold`: consecutive failures before tripping. `cooldown_secs`:
    /// seconds to wait before allowing a probe request through.
    pub const fn new(threshold: u32, cooldown_secs: u64) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            tripped_at: AtomicU64::new(0),
            threshold,
            cooldown_secs,
        }
    }

    /// Returns `Ok(())` if a request should be allowed through, `Err` if the
    /// circuit is open.
    pub fn check(&self) -> Result<(), String> {
        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        if failures < self.threshold {
            return Ok(());
        }

        let tripped = self.tripped_at.load(Ordering::Relaxed);
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        if now - tripped < self.cooldown_secs {
            Err(format!(
                "circuit breaker open: {} consecutive failures, cooling down for {}s",
                failures,
                self.cooldown_secs - (now - tripped)
            ))
        } else {
            Ok(())
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.tripped_at.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        let prev = self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        if prev + 1 >= self.threshold {
            let now = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            self.tripped_at.store(now, Ordering::Relaxed);
            warn!(
                "[circuit-breaker] tripped after {} consecutive failures, cooling down {}s",
                prev + 1,
                self.cooldown_secs
            );
        }
    }
}

// ── Certificate-Pinned Client Factory ──────────────────────────────────────
//
// reqwest with `rustls-tls` already ignores the OS trust store in favor of
// webpki-roots, but building the ClientConfig explicitly means:
//   (a) this holds even if reqwest's defaults change in a future version
//   (b) one Client (and connection pool) is shared across every provider

use reqwest::Client;
use rustls::ClientConfig;
use std::sync::LazyLock;

/// Build a `rustls::ClientConfig` pinned to the Mozilla root certificates.
///
/// Uses an explicit `ring` CryptoProvider rather than the process-level
/// default so this also works in unit-test binaries where no global
/// provider has been installed.
fn pinned_tls_config() -> ClientConfig {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .expect("failed to set default TLS protocol versions")
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

/// A singleton certificate-pinned `reqwest::Client`, shared across every
/// LLM provider and gateway REST call — one connection pool, one TLS config.
static PINNED_CLIENT: LazyLock<Client> = LazyLock::new(|| {
    let tls = pinned_tls_config();
    Client::builder()
        .use_preconfigured_tls(tls)
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(120))
        .build()
        .expect("failed to build certificate-pinned reqwest::Client")
});

/// Get the shared certificate-pinned HTTP client. Callers should use this
/// instead of `Client::builder().build()`.
pub fn pinned_client() -> Client {
    PINNED_CLIENT.clone()
}

// ── Outbound Request Signing & Audit ───────────────────────────────────────
//
// Before sending an LLM provider request, hash provider || model ||
// timestamp || body and log it to an in-memory ring buffer: tamper
// detection if a proxy mutates the body in flight, and an audit trail for
// compliance exports.

/// An entry in the outbound request audit log.
#[derive(Debug, Clone)]
pub struct RequestAuditEntry {
    pub timestamp: String,
    pub provider: String,
    pub model: String,
    /// SHA-256 hex digest of `provider || model || timestamp || body`.
    pub hash: String,
    /// HTTP status code of the response (0 if request failed).
    pub status: u16,
}

const AUDIT_LOG_CAPACITY: usize = 500;

pub struct RequestAuditLog {
    entries: Vec<RequestAuditEntry>,
    /// Write index (wraps around at capacity).
    head: usize,
    /// Total entries ever written.
    total: u64,
}

impl Default for RequestAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestAuditLog {
    pub fn new() -> Self {
        Self { entries: Vec::with_capacity(AUDIT_LOG_CAPACITY), head: 0, total: 0 }
    }

    /// Append an audit entry. When full, overwrites the oldest entry.
    pub fn push(&mut self, entry: RequestAuditEntry) {
        if self.entries.len() < AUDIT_LOG_CAPACITY {
            self.entries.push(entry);
        } else {
            self.entries[self.head] = entry;
        }
        self.head = (self.head + 1) % AUDIT_LOG_CAPACITY;
        self.total += 1;
    }

    /// Update the status of the entry with this hash. Concurrent requests
    /// can interleave their signing and response-handling, so the entry to
    /// update is found by its unique hash, not by "whatever was pushed
    /// last" — the last-pushed entry may belong to a different, later
    /// request by the time this response comes back.
    pub fn update_status(&mut self, hash: &str, status: u16) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.hash == hash) {
            entry.status = status;
        }
    }

    /// Get recent entries (newest first), up to `limit`.
    pub fn recent(&self, limit: usize) -> Vec<RequestAuditEntry> {
        let len = self.entries.len();
        if len == 0 {
            return vec![];
        }
        let count = limit.min(len);
        let mut result = Vec::with_capacity(count);
        let mut idx = if self.entries.len() < AUDIT_LOG_CAPACITY {
            self.entries.len().wrapping_sub(1)
        } else {
            (self.head + AUDIT_LOG_CAPACITY - 1) % AUDIT_LOG_CAPACITY
        };
        for _ in 0..count {
            result.push(self.entries[idx].clone());
            idx = (idx + AUDIT_LOG_CAPACITY - 1) % AUDIT_LOG_CAPACITY;
        }
        result
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

static AUDIT_LOG: LazyLock<Arc<Mutex<RequestAuditLog>>> = LazyLock::new(|| Arc::new(Mutex::new(RequestAuditLog::new())));

/// Compute a SHA-256 hash for an outbound request and append it to the
/// audit log. Call immediately before `.send()`. Returns the hex hash so
/// callers can include it in debug logs.
pub fn sign_and_log_request(provider: &str, model: &str, body_bytes: &[u8]) -> String {
    let now = chrono::Utc::now().to_rfc3339();
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update(model.as_bytes());
    hasher.update(now.as_bytes());
    hasher.update(body_bytes);
    let digest = hasher.finalize();
    let hash_hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();

    let entry = RequestAuditEntry { timestamp: now, provider: provider.to_string(), model: model.to_string(), hash: hash_hex.clone(), status: 0 };

    info!("[security] outbound request signed: provider={} model={} hash={}", provider, model, &hash_hex[..16]);

    AUDIT_LOG.lock().push(entry);
    hash_hex
}

/// Update the status code of the audit entry `sign_and_log_request` created
/// for this hash, once the response comes back.
pub fn update_audit_status(hash: &str, status: u16) {
    AUDIT_LOG.lock().update_status(hash, status);
}

/// Get recent audit entries (newest first).
pub fn recent_audit_entries(limit: usize) -> Vec<RequestAuditEntry> {
    AUDIT_LOG.lock().recent(limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(529));
        assert!(!is_retryable_status(200));
        assert!(!is_retryable_status(404));
    }

    #[test]
    fn parse_retry_after_valid() {
        assert_eq!(parse_retry_after("5"), Some(5));
        assert_eq!(parse_retry_after(" 30 "), Some(30));
        assert_eq!(parse_retry_after("not-a-number"), None);
    }

    #[test]
    fn jitter_stays_in_range() {
        for base in [100, 1000, 5000, 30_000] {
            let result = apply_jitter(base);
            let lower = (base as f64 * 0.7) as u64;
            let upper = (base as f64 * 1.3) as u64;
            assert!(result >= lower.max(100) && result <= upper, "jitter({base}) = {result} not in [{lower}, {upper}]");
        }
    }

    #[test]
    fn circuit_breaker_trips_and_recovers() {
        let cb = CircuitBreaker::new(3, 1);
        assert!(cb.check().is_ok());
        cb.record_failure();
        cb.record_failure();
        assert!(cb.check().is_ok());
        cb.record_failure();
        assert!(cb.check().is_err());
        cb.record_success();
        assert!(cb.check().is_ok());
    }

    #[test]
    fn circuit_breaker_resets_on_success() {
        let cb = CircuitBreaker::new(3, 60);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert!(cb.check().is_ok());
    }

    #[test]
    fn audit_log_ring_buffer() {
        let mut log = RequestAuditLog::new();
        assert_eq!(log.total(), 0);
        assert!(log.recent(10).is_empty());
        for i in 0..3 {
            log.push(RequestAuditEntry {
                timestamp: format!("2025-01-0{}T00:00:00Z", i + 1),
                provider: "test".into(),
                model: format!("model-{i}"),
                hash: format!("hash-{i}"),
                status: 200,
            });
        }
        assert_eq!(log.total(), 3);
        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].model, "model-2");
        assert_eq!(recent[1].model, "model-1");
    }

    #[test]
    fn status_update_targets_its_own_hash_even_after_a_later_push() {
        let mut log = RequestAuditLog::new();
        log.push(RequestAuditEntry { timestamp: "t0".into(), provider: "p".into(), model: "m".into(), hash: "hash-a".into(), status: 0 });
        // A second request is signed before the first one's response comes back.
        log.push(RequestAuditEntry { timestamp: "t1".into(), provider: "p".into(), model: "m".into(), hash: "hash-b".into(), status: 0 });
        log.update_status("hash-a", 200);

        let recent = log.recent(2);
        assert_eq!(recent[0].hash, "hash-b");
        assert_eq!(recent[0].status, 0);
        assert_eq!(recent[1].hash, "hash-a");
        assert_eq!(recent[1].status, 200);
    }

    #[test]
    fn sign_request_produces_hex_hash() {
        let hash = sign_and_log_request("openai", "gpt-4", b"{\"test\":true}");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn pinned_client_builds_successfully() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let _client = pinned_client();
    }
}
