// MAMA OS — SessionPool (C9).
//
// Per-channel long-lived conversation sessions. One in-memory map guarded by
// a single mutex (lock granularity matches this codebase's existing
// `SessionStore`); persistence mirrors session identity/counters into the
// `sessions` table so a restart resumes the same sessionId while still
// within TTL and under the context watermark.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::atoms::constants::{SESSION_CONTEXT_HIGH_WATERMARK, SESSION_POOL_MAX_SESSIONS, SESSION_TIMEOUT_SECS};
use crate::atoms::error::EngineResult;
use crate::atoms::types::Session;
use crate::store::Store;

pub struct GetOrCreateResult {
    pub session_id: String,
    pub is_new: bool,
}

struct PoolState {
    sessions: HashMap<String, Session>,
    /// Per-channel lane lock. Serializes concurrent send attempts to the
    /// same channel (§4.9, §5). Created lazily on first use.
    lanes: HashMap<String, Arc<AsyncMutex<()>>>,
}

pub struct SessionPool {
    store: Arc<Store>,
    state: Mutex<PoolState>,
    timeout_secs: i64,
    high_watermark: u64,
    max_sessions: usize,
}

impl SessionPool {
    pub fn new(store: Arc<Store>) -> Self {
        SessionPool {
            store,
            state: Mutex::new(PoolState { sessions: HashMap::new(), lanes: HashMap::new() }),
            timeout_secs: SESSION_TIMEOUT_SECS,
            high_watermark: SESSION_CONTEXT_HIGH_WATERMARK,
            max_sessions: SESSION_POOL_MAX_SESSIONS,
        }
    }

    /// Lane lock for `channel_key`. Callers hold this guard for the
    /// duration of one orchestrator turn.
    pub fn lane(&self, channel_key: &str) -> Arc<AsyncMutex<()>> {
        let mut state = self.state.lock();
        state.lanes.entry(channel_key.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    pub fn get_or_create(&self, channel_key: &str) -> EngineResult<GetOrCreateResult> {
        let now = Utc::now();
        let mut state = self.state.lock();

        let needs_new = match state.sessions.get(channel_key) {
            None => true,
            Some(existing) => existing.is_expired(now, self.timeout_secs) || existing.is_over_watermark(self.high_watermark),
        };

        if needs_new {
            let session = Session::new(channel_key.to_string());
            let session_id = session.session_id.clone();
            self.persist(&session)?;
            state.sessions.insert(channel_key.to_string(), session);
            return Ok(GetOrCreateResult { session_id, is_new: true });
        }

        let session = state.sessions.get_mut(channel_key).expect("checked above");
        session.in_use = true;
        session.last_active = now;
        session.message_count += 1;
        let session_id = session.session_id.clone();
        let snapshot = session.clone();
        drop(state);
        self.persist(&snapshot)?;
        Ok(GetOrCreateResult { session_id, is_new: false })
    }

    pub fn touch(&self, channel_key: &str) {
        let mut state = self.state.lock();
        if let Some(session) = state.sessions.get_mut(channel_key) {
            session.last_active = Utc::now();
        }
    }

    pub fn record_input_tokens(&self, channel_key: &str, tokens: u64) {
        let mut state = self.state.lock();
        if let Some(session) = state.sessions.get_mut(channel_key) {
            session.cumulative_input_tokens += tokens;
        }
    }

    pub fn release(&self, channel_key: &str) {
        let mut state = self.state.lock();
        if let Some(session) = state.sessions.get_mut(channel_key) {
            session.in_use = false;
        }
    }

    /// Periodic sweep: evict sessions beyond `max_sessions`, oldest
    /// `last_active` first.
    pub fn evict_overflow(&self) -> Vec<String> {
        let mut state = self.state.lock();
        if state.sessions.len() <= self.max_sessions {
            return vec![];
        }
        let mut entries: Vec<(String, chrono::DateTime<Utc>)> =
            state.sessions.iter().map(|(k, v)| (k.clone(), v.last_active)).collect();
        entries.sort_by_key(|(_, last_active)| *last_active);

        let overflow = state.sessions.len() - self.max_sessions;
        let mut evicted = Vec::with_capacity(overflow);
        for (channel_key, _) in entries.into_iter().take(overflow) {
            state.sessions.remove(&channel_key);
            evicted.push(channel_key);
        }
        evicted
    }

    fn persist(&self, session: &Session) -> EngineResult<()> {
        let conn = self.store.conn.lock();
        conn.execute(
            "INSERT INTO sessions (session_id, channel_key, created_at, last_active, message_count, cumulative_input_tokens, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active')
             ON CONFLICT(session_id) DO UPDATE SET
                 last_active = excluded.last_active,
                 message_count = excluded.message_count,
                 cumulative_input_tokens = excluded.cumulative_input_tokens",
            rusqlite::params![
                session.session_id,
                session.channel_key,
                session.created_at.to_rfc3339(),
                session.last_active.to_rfc3339(),
                session.message_count as i64,
                session.cumulative_input_tokens as i64,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> SessionPool {
        SessionPool::new(Arc::new(Store::open_in_memory().unwrap()))
    }

    #[test]
    fn first_call_creates_new_session() {
        let pool = pool();
        let result = pool.get_or_create("discord:general").unwrap();
        assert!(result.is_new);
    }

    #[test]
    fn second_call_within_ttl_reuses_session() {
        let pool = pool();
        let first = pool.get_or_create("discord:general").unwrap();
        let second = pool.get_or_create("discord:general").unwrap();
        assert!(!second.is_new);
        assert_eq!(first.session_id, second.session_id);
    }

    #[test]
    fn over_watermark_session_is_replaced() {
        let pool = pool();
        let first = pool.get_or_create("discord:general").unwrap();
        pool.record_input_tokens("discord:general", SESSION_CONTEXT_HIGH_WATERMARK + 1);
        let second = pool.get_or_create("discord:general").unwrap();
        assert!(second.is_new);
        assert_ne!(first.session_id, second.session_id);
    }

    #[test]
    fn eviction_sweep_removes_oldest_first_beyond_cap() {
        let pool = SessionPool { max_sessions: 2, ..pool() };
        pool.get_or_create("a").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        pool.get_or_create("b").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        pool.get_or_create("c").unwrap();

        let evicted = pool.evict_overflow();
        assert_eq!(evicted, vec!["a".to_string()]);
    }

    #[test]
    fn distinct_channels_get_distinct_lanes() {
        let pool = pool();
        let lane_a = pool.lane("a");
        let lane_b = pool.lane("b");
        assert!(!Arc::ptr_eq(&lane_a, &lane_b));
        let lane_a_again = pool.lane("a");
        assert!(Arc::ptr_eq(&lane_a, &lane_a_again));
    }
}
