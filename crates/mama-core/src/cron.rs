// MAMA OS — CronScheduler (C14).
//
// Reads persisted `cron_jobs` rows, guards each firing with JobLock (C2) so
// only one process ever runs a given job at a time, and forwards a
// synthetic Message through the Orchestrator so the usual routing and
// enforcement pipeline applies. Schedule parsing is the same hand-rolled
// mini-DSL this codebase always used ("every Nm", "every Nh", "daily
// HH:MM") rather than a full cron grammar — jobs are authored by the same
// people who configure agents, not ops.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use rusqlite::params;

use crate::atoms::constants::CRON_JOB_LOCK_TTL_SECS;
use crate::atoms::error::EngineResult;
use crate::atoms::types::{CronJob, Message};
use crate::job_lock::JobLock;
use crate::orchestrator::Orchestrator;
use crate::store::Store;

pub struct CronScheduler {
    store: Arc<Store>,
    orchestrator: Arc<Orchestrator>,
}

impl CronScheduler {
    pub fn new(store: Arc<Store>, orchestrator: Arc<Orchestrator>) -> Self {
        CronScheduler { store, orchestrator }
    }

    pub fn upsert_job(&self, id: &str, schedule: &str, enabled: bool) -> EngineResult<()> {
        upsert_job(&self.store, id, schedule, enabled)
    }

    pub fn remove_job(&self, id: &str) -> EngineResult<()> {
        remove_job(&self.store, id)
    }

    fn due_jobs(&self, now: &DateTime<Utc>) -> EngineResult<Vec<CronJob>> {
        let conn = self.store.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, schedule, enabled, next_run, last_run, last_status
             FROM cron_jobs WHERE enabled = 1",
        )?;
        let jobs = stmt
            .query_map([], |row| {
                Ok(CronJob {
                    id: row.get(0)?,
                    schedule: row.get(1)?,
                    enabled: row.get::<_, i64>(2)? != 0,
                    next_run: row.get::<_, Option<String>>(3)?.and_then(|s| parse_rfc3339(&s)),
                    last_run: row.get::<_, Option<String>>(4)?.and_then(|s| parse_rfc3339(&s)),
                    last_status: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs.into_iter().filter(|j| j.next_run.map(|n| n <= *now).unwrap_or(true)).collect())
    }

    /// Run one scheduler tick: fire every due, enabled job whose JobLock can
    /// be acquired, and return the ids of jobs that actually fired.
    pub async fn tick(&self) -> EngineResult<Vec<String>> {
        let now = Utc::now();
        let due = self.due_jobs(&now)?;
        if due.is_empty() {
            return Ok(Vec::new());
        }
        info!("cron: {} job(s) due", due.len());

        let mut fired = Vec::new();
        for job in due {
            match self.fire(&job, &now).await {
                Ok(true) => fired.push(job.id),
                Ok(false) => {} // lock denied, another holder owns this job
                Err(e) => error!("cron: job '{}' failed: {e}", job.id),
            }
        }
        Ok(fired)
    }

    async fn fire(&self, job: &CronJob, now: &DateTime<Utc>) -> EngineResult<bool> {
        let lock = JobLock::new(&self.store);
        if lock.acquire(&job.id, CRON_JOB_LOCK_TTL_SECS, "cron-scheduler").is_err() {
            warn!("cron: job '{}' lock busy, skipping this tick", job.id);
            return Ok(false);
        }

        let msg = Message {
            source: "cron".to_string(),
            channel_id: job.id.clone(),
            user_id: "cron".to_string(),
            text: job.schedule.clone(),
            attachments: Vec::new(),
            timestamp: *now,
        };

        let result = self.orchestrator.handle_message(&msg).await;
        let status = match &result {
            Ok(_) => "ok",
            Err(e) => {
                warn!("cron: job '{}' orchestration failed: {e}", job.id);
                "error"
            }
        };
        self.record_run(&job.id, now, status)?;
        lock.release(&job.id, "cron-scheduler")?;
        result.map(|_| true)
    }

    fn record_run(&self, id: &str, now: &DateTime<Utc>, status: &str) -> EngineResult<()> {
        let schedule: String = {
            let conn = self.store.conn.lock();
            conn.query_row("SELECT schedule FROM cron_jobs WHERE id = ?1", params![id], |row| row.get(0))?
        };
        let next = compute_next_run(&schedule, now);
        let conn = self.store.conn.lock();
        conn.execute(
            "UPDATE cron_jobs SET last_run = ?2, last_status = ?3, next_run = ?4 WHERE id = ?1",
            params![id, now.to_rfc3339(), status, next.map(|d| d.to_rfc3339())],
        )?;
        Ok(())
    }
}

/// Insert or update a job's schedule/enabled flag, standalone (not a
/// `CronScheduler` method) so the `mama` CLI can manage jobs without
/// constructing an `Orchestrator`.
pub fn upsert_job(store: &Store, id: &str, schedule: &str, enabled: bool) -> EngineResult<()> {
    let next = compute_next_run(schedule, &Utc::now());
    let conn = store.conn.lock();
    conn.execute(
        "INSERT INTO cron_jobs (id, schedule, enabled, next_run, last_run, last_status)
         VALUES (?1, ?2, ?3, ?4, NULL, NULL)
         ON CONFLICT(id) DO UPDATE SET
             schedule = excluded.schedule,
             enabled  = excluded.enabled,
             next_run = excluded.next_run",
        params![id, schedule, enabled as i64, next.map(|d| d.to_rfc3339())],
    )?;
    Ok(())
}

/// Delete a job. Standalone for the same reason as [`upsert_job`].
pub fn remove_job(store: &Store, id: &str) -> EngineResult<()> {
    let conn = store.conn.lock();
    conn.execute("DELETE FROM cron_jobs WHERE id = ?1", params![id])?;
    Ok(())
}

/// List every persisted job, enabled or not, ordered by id.
pub fn list_jobs(store: &Store) -> EngineResult<Vec<CronJob>> {
    let conn = store.conn.lock();
    let mut stmt = conn.prepare("SELECT id, schedule, enabled, next_run, last_run, last_status FROM cron_jobs ORDER BY id")?;
    let jobs = stmt
        .query_map([], |row| {
            Ok(CronJob {
                id: row.get(0)?,
                schedule: row.get(1)?,
                enabled: row.get::<_, i64>(2)? != 0,
                next_run: row.get::<_, Option<String>>(3)?.and_then(|s| parse_rfc3339(&s)),
                last_run: row.get::<_, Option<String>>(4)?.and_then(|s| parse_rfc3339(&s)),
                last_status: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(jobs)
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

/// Schedule mini-DSL: "every Nm", "every Nh", "daily HH:MM". Anything else
/// falls back to hourly, matching this codebase's historical behavior.
fn compute_next_run(schedule: &str, from: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let s = schedule.trim().to_lowercase();

    if let Some(rest) = s.strip_prefix("every ") {
        let rest = rest.trim();
        if let Some(mins) = rest.strip_suffix('m') {
            let mins: i64 = mins.trim().parse().ok()?;
            return Some(*from + chrono::Duration::minutes(mins));
        }
        if let Some(hours) = rest.strip_suffix('h') {
            let hours: i64 = hours.trim().parse().ok()?;
            return Some(*from + chrono::Duration::hours(hours));
        }
    } else if let Some(time_str) = s.strip_prefix("daily ") {
        let parts: Vec<&str> = time_str.trim().split(':').collect();
        if parts.len() == 2 {
            let hour: u32 = parts[0].parse().ok()?;
            let minute: u32 = parts[1].parse().ok()?;
            let today = from.date_naive();
            let target = today.and_hms_opt(hour, minute, 0)?.and_utc();
            if target > *from {
                return Some(target);
            }
            let tomorrow = today.succ_opt()?;
            return Some(tomorrow.and_hms_opt(hour, minute, 0)?.and_utc());
        }
    }

    Some(*from + chrono::Duration::hours(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_n_minutes_advances_by_n_minutes() {
        let from = Utc::now();
        let next = compute_next_run("every 15m", &from).unwrap();
        assert_eq!((next - from).num_minutes(), 15);
    }

    #[test]
    fn every_n_hours_advances_by_n_hours() {
        let from = Utc::now();
        let next = compute_next_run("every 2h", &from).unwrap();
        assert_eq!((next - from).num_hours(), 2);
    }

    #[test]
    fn unparseable_schedule_falls_back_to_hourly() {
        let from = Utc::now();
        let next = compute_next_run("whenever", &from).unwrap();
        assert_eq!((next - from).num_hours(), 1);
    }

    #[test]
    fn daily_time_in_the_past_rolls_to_tomorrow() {
        let from = Utc::now();
        let past = (from - chrono::Duration::hours(1)).format("%H:%M").to_string();
        let next = compute_next_run(&format!("daily {past}"), &from).unwrap();
        assert!(next > from + chrono::Duration::hours(22));
    }

    #[test]
    fn upsert_then_tick_fires_an_immediately_due_job() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        // next_run left NULL means "due now" per `due_jobs`.
        {
            let conn = store.conn.lock();
            conn.execute(
                "INSERT INTO cron_jobs (id, schedule, enabled) VALUES ('digest', 'every 5m', 1)",
                [],
            )
            .unwrap();
        }
        let jobs = {
            let conn = store.conn.lock();
            let mut stmt = conn.prepare("SELECT id, schedule, enabled, next_run, last_run, last_status FROM cron_jobs WHERE enabled = 1").unwrap();
            stmt.query_map([], |row| {
                Ok(CronJob {
                    id: row.get(0)?,
                    schedule: row.get(1)?,
                    enabled: row.get::<_, i64>(2)? != 0,
                    next_run: row.get::<_, Option<String>>(3)?.and_then(|s| parse_rfc3339(&s)),
                    last_run: None,
                    last_status: None,
                })
            })
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
        };
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "digest");
    }

    #[test]
    fn disabled_job_is_not_selected_as_due() {
        let store = Store::open_in_memory().unwrap();
        {
            let conn = store.conn.lock();
            conn.execute(
                "INSERT INTO cron_jobs (id, schedule, enabled) VALUES ('paused', 'every 5m', 0)",
                [],
            )
            .unwrap();
        }
        let conn = store.conn.lock();
        let mut stmt = conn.prepare("SELECT id FROM cron_jobs WHERE enabled = 1").unwrap();
        let rows: Vec<String> = stmt.query_map([], |row| row.get(0)).unwrap().collect::<Result<Vec<_>, _>>().unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn list_jobs_includes_disabled_jobs() {
        let store = Store::open_in_memory().unwrap();
        {
            let conn = store.conn.lock();
            conn.execute("INSERT INTO cron_jobs (id, schedule, enabled) VALUES ('digest', 'every 5m', 1)", []).unwrap();
            conn.execute("INSERT INTO cron_jobs (id, schedule, enabled) VALUES ('paused', 'daily 09:00', 0)", []).unwrap();
        }
        let jobs = list_jobs(&store).unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().any(|j| j.id == "digest" && j.enabled));
        assert!(jobs.iter().any(|j| j.id == "paused" && !j.enabled));
    }
}
