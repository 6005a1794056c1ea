// MAMA OS — Delegation protocol (C13).
//
// Parses `DELEGATE::agent::task` / `DELEGATE_BG::agent::task` lines out of a
// response, guards dispatch against the loop-prevention invariants (depth,
// chain length, cooldown, cycle), and keeps the durable `decision_edges`
// audit trail. Guard state (chain length / cooldown / ancestor stack) is
// in-memory per channel, the same shape as `StopContinuationHandler`'s
// per-channel counters; the audit trail is the thing that survives restart.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use regex::Regex;

use crate::atoms::error::EngineResult;
use crate::atoms::types::{ChainState, DelegationEdge, DelegationStatus, LoopPreventionConfig};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationLine {
    pub background: bool,
    pub to_agent: String,
    pub task: String,
}

fn delegate_line_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^DELEGATE(_BG)?::(\w+)::(.+)$").expect("delegate line regex"))
}

/// First `DELEGATE::`/`DELEGATE_BG::` line found in `text`, if any.
pub fn extract_delegation_line(text: &str) -> Option<DelegationLine> {
    let captures = delegate_line_regex().captures(text)?;
    Some(DelegationLine {
        background: captures.get(1).is_some(),
        to_agent: captures.get(2)?.as_str().to_string(),
        task: captures.get(3)?.as_str().trim().to_string(),
    })
}

pub struct DelegationTracker {
    store: Arc<Store>,
    chains: Mutex<HashMap<String, ChainState>>,
}

impl DelegationTracker {
    pub fn new(store: Arc<Store>) -> Self {
        DelegationTracker { store, chains: Mutex::new(HashMap::new()) }
    }

    fn snapshot(&self, channel_key: &str) -> ChainState {
        self.chains.lock().entry(channel_key.to_string()).or_default().clone()
    }

    /// Evaluate the four loop-prevention guards in spec order. Returns the
    /// first violated guard; `Ok(())` means dispatch may proceed. Caller is
    /// responsible for the separate `AgentConfig::effective_can_delegate`
    /// check, which is a plain permission denial rather than a loop guard.
    pub fn check(&self, channel_key: &str, to_agent_id: &str, depth: u32, config: &LoopPreventionConfig) -> Result<(), crate::atoms::error::DelegationBlockReason> {
        use crate::atoms::error::DelegationBlockReason::*;
        let chain = self.snapshot(channel_key);

        if chain.length >= config.max_chain_length {
            return Err(ChainLength);
        }
        if Utc::now() < chain.global_cooldown_until {
            return Err(Cooldown);
        }
        if depth + 1 > config.max_delegation_depth {
            return Err(Depth);
        }
        if chain.ancestors.iter().any(|a| a == to_agent_id) {
            return Err(Cycle);
        }
        Ok(())
    }

    /// Record that a delegation was dispatched: bump the chain length, push
    /// the cooldown window forward, and push `to_agent_id` onto the
    /// ancestor stack so a later cycle back to it is caught. The very first
    /// delegation on a channel also seeds the stack with `from_agent_id` —
    /// otherwise a cycle back to the root invoker (A delegates to B, B
    /// delegates back to A) would go undetected since the root is never
    /// itself a delegation target.
    pub fn begin(&self, channel_key: &str, from_agent_id: &str, to_agent_id: &str, config: &LoopPreventionConfig) {
        let mut chains = self.chains.lock();
        let chain = chains.entry(channel_key.to_string()).or_default();
        if chain.ancestors.is_empty() {
            chain.ancestors.push(from_agent_id.to_string());
        }
        chain.length += 1;
        chain.global_cooldown_until = Utc::now() + chrono::Duration::milliseconds(config.global_cooldown_ms as i64);
        chain.ancestors.push(to_agent_id.to_string());
    }

    /// Pop `to_agent_id` off the ancestor stack once its delegated turn has
    /// completed (successfully or not). The chain length is left as-is; it
    /// resets only when the channel goes idle long enough to be evicted.
    pub fn end(&self, channel_key: &str, to_agent_id: &str) {
        let mut chains = self.chains.lock();
        if let Some(chain) = chains.get_mut(channel_key) {
            if chain.ancestors.last().map(|a| a.as_str()) == Some(to_agent_id) {
                chain.ancestors.pop();
            }
        }
    }

    pub fn record_edge(&self, channel_key: &str, edge: &DelegationEdge) -> EngineResult<()> {
        let conn = self.store.conn.lock();
        conn.execute(
            "INSERT INTO decision_edges (from_id, to_id, relationship, reason, created_at, created_by, approved_by_user, wave, status, channel_key, depth, task)
             VALUES (?1, ?2, 'delegates', NULL, ?3, ?1, 0, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                edge.from_agent_id,
                edge.to_agent_id,
                edge.claimed_at.to_rfc3339(),
                edge.wave,
                status_str(edge.status),
                channel_key,
                edge.depth,
                edge.task,
            ],
        )?;
        Ok(())
    }

    pub fn complete_edge(&self, channel_key: &str, to_agent_id: &str, status: DelegationStatus) -> EngineResult<()> {
        let conn = self.store.conn.lock();
        conn.execute(
            "UPDATE decision_edges SET status = ?1
             WHERE channel_key = ?2 AND to_id = ?3
               AND id = (SELECT MAX(id) FROM decision_edges WHERE channel_key = ?2 AND to_id = ?3)",
            rusqlite::params![status_str(status), channel_key, to_agent_id],
        )?;
        Ok(())
    }
}

fn status_str(status: DelegationStatus) -> &'static str {
    match status {
        DelegationStatus::Pending => "pending",
        DelegationStatus::Claimed => "claimed",
        DelegationStatus::Completed => "completed",
        DelegationStatus::Failed => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> DelegationTracker {
        DelegationTracker::new(Arc::new(Store::open_in_memory().unwrap()))
    }

    #[test]
    fn parses_foreground_delegate_line() {
        let line = extract_delegation_line("DELEGATE::reviewer::check the diff").unwrap();
        assert!(!line.background);
        assert_eq!(line.to_agent, "reviewer");
        assert_eq!(line.task, "check the diff");
    }

    #[test]
    fn parses_background_delegate_line() {
        let line = extract_delegation_line("preamble\nDELEGATE_BG::scanner::scan the repo\ntrailer").unwrap();
        assert!(line.background);
        assert_eq!(line.to_agent, "scanner");
    }

    #[test]
    fn no_delegate_line_returns_none() {
        assert!(extract_delegation_line("just a regular response").is_none());
    }

    #[test]
    fn fresh_channel_passes_all_guards() {
        let tracker = tracker();
        let config = LoopPreventionConfig::default();
        assert!(tracker.check("c1", "worker", 0, &config).is_ok());
    }

    #[test]
    fn depth_guard_blocks_beyond_max_delegation_depth() {
        let tracker = tracker();
        let config = LoopPreventionConfig { max_delegation_depth: 1, ..LoopPreventionConfig::default() };
        assert!(tracker.check("c1", "worker", 1, &config).is_err());
    }

    #[test]
    fn chain_length_guard_blocks_once_limit_reached() {
        let tracker = tracker();
        let config = LoopPreventionConfig { max_chain_length: 1, global_cooldown_ms: 0, ..LoopPreventionConfig::default() };
        tracker.begin("c1", "boss", "worker", &config);
        assert!(tracker.check("c1", "other", 0, &config).is_err());
    }

    #[test]
    fn cycle_guard_blocks_delegating_back_to_an_active_ancestor() {
        let tracker = tracker();
        let config = LoopPreventionConfig { global_cooldown_ms: 0, max_delegation_depth: 10, max_chain_length: 10 };
        tracker.begin("c1", "ceo", "boss", &config);
        let result = tracker.check("c1", "boss", 1, &config);
        assert_eq!(result, Err(crate::atoms::error::DelegationBlockReason::Cycle));
    }

    #[test]
    fn cycle_guard_blocks_delegating_back_to_the_root_invoker() {
        let tracker = tracker();
        let config = LoopPreventionConfig { global_cooldown_ms: 0, max_delegation_depth: 10, max_chain_length: 10 };
        tracker.begin("c1", "a", "b", &config);
        let result = tracker.check("c1", "a", 1, &config);
        assert_eq!(result, Err(crate::atoms::error::DelegationBlockReason::Cycle));
    }

    #[test]
    fn ending_a_delegation_pops_it_off_the_ancestor_stack() {
        let tracker = tracker();
        let config = LoopPreventionConfig { global_cooldown_ms: 0, ..LoopPreventionConfig::default() };
        tracker.begin("c1", "boss", "worker", &config);
        tracker.end("c1", "worker");
        assert!(tracker.check("c1", "worker", 0, &config).is_ok());
    }

    #[test]
    fn record_and_complete_edge_round_trips_through_store() {
        let tracker = tracker();
        let edge = DelegationEdge {
            from_agent_id: "boss".into(),
            to_agent_id: "worker".into(),
            task: "do the thing".into(),
            wave: 1,
            depth: 1,
            claimed_at: Utc::now(),
            completed_at: None,
            status: DelegationStatus::Claimed,
            background: false,
        };
        tracker.record_edge("c1", &edge).unwrap();
        tracker.complete_edge("c1", "worker", DelegationStatus::Completed).unwrap();

        let conn = tracker.store.conn.lock();
        let status: String = conn
            .query_row("SELECT status FROM decision_edges WHERE channel_key = 'c1' AND to_id = 'worker'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(status, "completed");
    }
}
