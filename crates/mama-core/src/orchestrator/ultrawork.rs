// MAMA OS — UltraWork mode (C13).
//
// Three-phase autonomous session (Planning -> Building -> Retro -> Done)
// triggered by a keyword in the inbound message. State is persisted to
// `ultrawork_sessions` after every transition so a daemon restart resumes
// the same session instead of losing an in-flight plan.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::params;

use crate::atoms::error::EngineResult;
use crate::atoms::types::{UltraWorkProgressEntry, UltraWorkSession, UltraWorkState};
use crate::store::Store;

const TRIGGER_KEYWORDS: &[&str] = &["ultrawork", "deep work", "autonomous", "울트라워크", "딥워크", "자율"];

/// True if `text` contains any of the trigger keywords, case-insensitive.
pub fn is_trigger(text: &str) -> bool {
    let lower = text.to_lowercase();
    TRIGGER_KEYWORDS.iter().any(|kw| lower.contains(&kw.to_lowercase()))
}

pub struct UltraWorkHandler {
    store: Arc<Store>,
}

impl UltraWorkHandler {
    pub fn new(store: Arc<Store>) -> Self {
        UltraWorkHandler { store }
    }

    pub fn start(&self, channel_key: &str, max_steps: u32, max_duration_ms: u64) -> EngineResult<UltraWorkSession> {
        let session = UltraWorkSession::new(channel_key, max_steps, max_duration_ms);
        self.persist(&session)?;
        Ok(session)
    }

    /// Most recent non-terminal session for `channel_key`, if one exists
    /// and hasn't run past its step/duration caps.
    pub fn load_active(&self, channel_key: &str) -> EngineResult<Option<UltraWorkSession>> {
        let conn = self.store.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT session_id, state, max_steps, max_duration_ms, step_count, started_at, plan, progress_json
             FROM ultrawork_sessions WHERE channel_key = ?1
             ORDER BY started_at DESC LIMIT 1",
        )?;
        let row = stmt.query_row(params![channel_key], |row| {
            let state_str: String = row.get(1)?;
            let started_at: String = row.get(5)?;
            let progress_json: String = row.get(7)?;
            Ok((
                row.get::<_, String>(0)?,
                state_str,
                row.get::<_, u32>(2)?,
                row.get::<_, u64>(3)?,
                row.get::<_, u32>(4)?,
                started_at,
                row.get::<_, String>(6)?,
                progress_json,
            ))
        });

        let (session_id, state_str, max_steps, max_duration_ms, step_count, started_at, plan, progress_json) = match row {
            Ok(v) => v,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        drop(stmt);
        drop(conn);

        let state = parse_state(&state_str);
        if matches!(state, UltraWorkState::Done | UltraWorkState::Failed) {
            return Ok(None);
        }

        let session = UltraWorkSession {
            session_id,
            channel_key: channel_key.to_string(),
            state,
            max_steps,
            max_duration_ms,
            step_count,
            started_at: chrono::DateTime::parse_from_rfc3339(&started_at).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
            plan,
            progress: serde_json::from_str(&progress_json).unwrap_or_default(),
        };

        if session.is_expired(Utc::now()) {
            let mut expired = session;
            expired.state = UltraWorkState::Failed;
            self.persist(&expired)?;
            return Ok(None);
        }

        Ok(Some(session))
    }

    /// Record the plan text produced in the Planning phase and move to Building.
    pub fn record_plan(&self, session: &mut UltraWorkSession, plan: String) -> EngineResult<()> {
        session.plan = plan;
        session.state = UltraWorkState::Building;
        self.persist(session)
    }

    /// Record one Building-phase step. Transitions to Retro once the step
    /// cap is one away from being exhausted, leaving room for a final
    /// retrospective turn within `max_steps`.
    pub fn record_step(&self, session: &mut UltraWorkSession, description: String) -> EngineResult<()> {
        session.step_count += 1;
        session.progress.push(UltraWorkProgressEntry { step: session.step_count, description, recorded_at: Utc::now() });

        if session.is_expired(Utc::now()) || session.step_count + 1 >= session.max_steps {
            session.state = UltraWorkState::Retro;
        }
        self.persist(session)
    }

    pub fn finish(&self, session: &mut UltraWorkSession, summary: String) -> EngineResult<()> {
        session.progress.push(UltraWorkProgressEntry { step: session.step_count, description: summary, recorded_at: Utc::now() });
        session.state = UltraWorkState::Done;
        self.persist(session)
    }

    fn persist(&self, session: &UltraWorkSession) -> EngineResult<()> {
        let progress_json = serde_json::to_string(&session.progress)?;
        let conn = self.store.conn.lock();
        conn.execute(
            "INSERT INTO ultrawork_sessions (session_id, channel_key, state, max_steps, max_duration_ms, step_count, started_at, plan, progress_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(session_id) DO UPDATE SET
                 state = excluded.state,
                 step_count = excluded.step_count,
                 plan = excluded.plan,
                 progress_json = excluded.progress_json",
            params![
                session.session_id,
                session.channel_key,
                state_str(session.state),
                session.max_steps,
                session.max_duration_ms,
                session.step_count,
                session.started_at.to_rfc3339(),
                session.plan,
                progress_json,
            ],
        )?;
        Ok(())
    }
}

fn state_str(state: UltraWorkState) -> &'static str {
    match state {
        UltraWorkState::Planning => "planning",
        UltraWorkState::Building => "building",
        UltraWorkState::Retro => "retro",
        UltraWorkState::Done => "done",
        UltraWorkState::Failed => "failed",
    }
}

fn parse_state(s: &str) -> UltraWorkState {
    match s {
        "planning" => UltraWorkState::Planning,
        "building" => UltraWorkState::Building,
        "retro" => UltraWorkState::Retro,
        "done" => UltraWorkState::Done,
        _ => UltraWorkState::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> UltraWorkHandler {
        UltraWorkHandler::new(Arc::new(Store::open_in_memory().unwrap()))
    }

    #[test]
    fn recognizes_trigger_keywords_in_either_language() {
        assert!(is_trigger("let's go into ultrawork mode"));
        assert!(is_trigger("자율 모드로 진행해줘"));
        assert!(!is_trigger("just answer the question"));
    }

    #[test]
    fn starts_in_planning_and_persists() {
        let h = handler();
        let session = h.start("c1", 20, 1_800_000).unwrap();
        assert_eq!(session.state, UltraWorkState::Planning);
        let loaded = h.load_active("c1").unwrap().unwrap();
        assert_eq!(loaded.session_id, session.session_id);
    }

    #[test]
    fn recording_plan_moves_to_building() {
        let h = handler();
        let mut session = h.start("c1", 20, 1_800_000).unwrap();
        h.record_plan(&mut session, "step 1, step 2".into()).unwrap();
        assert_eq!(session.state, UltraWorkState::Building);
        assert_eq!(session.plan, "step 1, step 2");
    }

    #[test]
    fn step_cap_drives_transition_into_retro() {
        let h = handler();
        let mut session = h.start("c1", 3, 1_800_000).unwrap();
        h.record_plan(&mut session, "plan".into()).unwrap();
        h.record_step(&mut session, "did step 1".into()).unwrap();
        assert_eq!(session.state, UltraWorkState::Retro);
    }

    #[test]
    fn finish_marks_done_and_load_active_then_returns_none() {
        let h = handler();
        let mut session = h.start("c1", 20, 1_800_000).unwrap();
        h.finish(&mut session, "wrapped up".into()).unwrap();
        assert!(h.load_active("c1").unwrap().is_none());
    }

    #[test]
    fn expired_session_is_marked_failed_and_not_returned_as_active() {
        let h = handler();
        let session = h.start("c1", 20, 0).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(h.load_active("c1").unwrap().is_none());
    }
}
