// MAMA OS — RateLimiter (C1).
//
// Token-bucket + bounded FIFO queue guarding outbound platform API calls.
// Shares its retry/backoff vocabulary with `crate::http`: same jittered
// exponential delay, same "is this a rate-limit signal" classification.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use crate::atoms::constants::{
    RATE_LIMIT_MAX_QUEUE_SIZE, RATE_LIMIT_MAX_RETRIES, RATE_LIMIT_MIN_INTERVAL_MS,
    RATE_LIMIT_REQUEST_TIMEOUT_MS, RATE_LIMIT_RETRY_DELAY_BASE_MS, RATE_LIMIT_RETRY_DELAY_MAX_MS,
    RATE_LIMIT_RETRY_JITTER_MAX_MS,
};
use crate::atoms::error::{EngineError, EngineResult};

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub max_requests_per_minute: u32,
    pub min_interval_ms: u64,
    pub max_queue_size: usize,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        RateLimiterConfig {
            max_requests_per_minute: crate::atoms::constants::RATE_LIMIT_MAX_REQUESTS_PER_MINUTE,
            min_interval_ms: RATE_LIMIT_MIN_INTERVAL_MS,
            max_queue_size: RATE_LIMIT_MAX_QUEUE_SIZE,
            request_timeout_ms: RATE_LIMIT_REQUEST_TIMEOUT_MS,
            max_retries: RATE_LIMIT_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Default)]
pub struct RateLimiterStats {
    pub dispatched: AtomicU64,
    pub rate_limit_hits: AtomicU64,
    pub failures: AtomicU64,
    pub timeouts: AtomicU64,
    pub queue_full_rejections: AtomicU64,
}

/// Returns true when an error looks like a platform rate-limit signal —
/// status 429, a `rate_limited` wire code, or the substring "rate limit".
pub fn looks_rate_limited(err: &EngineError) -> bool {
    match err {
        EngineError::RateLimited => true,
        _ => {
            let s = err.to_string().to_lowercase();
            s.contains("429") || s.contains("rate_limited") || s.contains("rate limit")
        }
    }
}

struct Ticket {
    permit: tokio::sync::OwnedSemaphorePermit,
}

/// Bounded FIFO admission queue with a token-bucket pace limit. A single
/// `RateLimiter` instance should be shared (via `Arc`) per outbound
/// destination (one per gateway, or one per LLM provider).
pub struct RateLimiter {
    config: RateLimiterConfig,
    /// Gate on requests-per-minute: acquiring a permit costs one "slot";
    /// slots refill on a ticking background task.
    slots: std::sync::Arc<Semaphore>,
    /// Admission queue length, tracked separately from the semaphore so we
    /// can reject with `QueueFull` before even attempting to acquire.
    queued: AtomicU64,
    last_dispatch: Mutex<Option<Instant>>,
    pub stats: RateLimiterStats,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> std::sync::Arc<Self> {
        let permits = config.max_requests_per_minute.max(1) as usize;
        let limiter = std::sync::Arc::new(RateLimiter {
            slots: std::sync::Arc::new(Semaphore::new(permits)),
            queued: AtomicU64::new(0),
            last_dispatch: Mutex::new(None),
            stats: RateLimiterStats::default(),
            config,
        });
        limiter.clone().spawn_refill_task();
        limiter
    }

    fn spawn_refill_task(self: std::sync::Arc<Self>) {
        let permits = self.config.max_requests_per_minute.max(1) as usize;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let available = self.slots.available_permits();
                if available < permits {
                    self.slots.add_permits(permits - available);
                }
            }
        });
    }

    /// Run `call` under rate-limit admission control, retrying rate-limit
    /// failures at the head of the queue with exponential backoff.
    pub async fn enqueue<F, Fut, T>(&self, mut call: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = EngineResult<T>>,
    {
        if self.queued.load(Ordering::Relaxed) as usize >= self.config.max_queue_size {
            self.stats.queue_full_rejections.fetch_add(1, Ordering::Relaxed);
            return Err(EngineError::QueueFull);
        }
        self.queued.fetch_add(1, Ordering::Relaxed);
        let result = self.run_with_retries(&mut call).await;
        self.queued.fetch_sub(1, Ordering::Relaxed);
        result
    }

    async fn run_with_retries<F, Fut, T>(&self, call: &mut F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = EngineResult<T>>,
    {
        let deadline = Instant::now() + Duration::from_millis(self.config.request_timeout_ms);
        let mut attempt: u32 = 0;

        loop {
            if Instant::now() >= deadline {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(EngineError::RequestTimeout);
            }

            self.wait_for_slot_and_pace(deadline).await?;

            match call().await {
                Ok(value) => {
                    self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(err) if looks_rate_limited(&err) && attempt < self.config.max_retries => {
                    self.stats.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                    attempt += 1;
                    let delay = retry_delay_for_attempt(attempt);
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    sleep(delay.min(remaining)).await;
                    // retried entry re-dispatches next: it occupies the head
                    // of this call's own loop, so it is effectively
                    // re-queued ahead of anything enqueued after it.
                    continue;
                }
                Err(err) => {
                    // Reached only on a terminal error: either not rate-limited at
                    // all, or rate-limited with retries exhausted. Either way it's
                    // a real failure, so it always counts — not just the
                    // retries-exhausted case.
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    return Err(err);
                }
            }
        }
    }

    async fn wait_for_slot_and_pace(&self, deadline: Instant) -> EngineResult<()> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(EngineError::RequestTimeout);
        }
        let permit = tokio::time::timeout(remaining, self.slots.clone().acquire_owned())
            .await
            .map_err(|_| EngineError::RequestTimeout)?
            .map_err(|_| EngineError::Other("rate limiter semaphore closed".into()))?;
        // Permit is intentionally dropped (consumed) rather than held —
        // the refill task replenishes capacity on the minute tick.
        let _ticket = Ticket { permit };

        let min_interval = Duration::from_millis(self.config.min_interval_ms);
        let mut last = self.last_dispatch.lock();
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < min_interval {
                drop(last);
                sleep(min_interval - elapsed).await;
                last = self.last_dispatch.lock();
            }
        }
        *last = Some(Instant::now());
        Ok(())
    }
}

fn retry_delay_for_attempt(attempt: u32) -> Duration {
    let base = RATE_LIMIT_RETRY_DELAY_BASE_MS.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let capped = base.min(RATE_LIMIT_RETRY_DELAY_MAX_MS);
    let jitter = (nanos_jitter()) % (RATE_LIMIT_RETRY_JITTER_MAX_MS + 1);
    Duration::from_millis(capped + jitter)
}

fn nanos_jitter() -> u64 {
    use std::time::SystemTime;
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64
}
