// MAMA OS — JobLock (C2).
//
// Process-wide named mutex with a TTL, used to singletonize cron task
// execution. Backed by the `job_locks` table (§10.3) so a crashed holder's
// lock still expires on schedule after a restart.

use chrono::{DateTime, Utc};

use crate::atoms::constants::JOB_LOCK_DEFAULT_TTL_SECS;
use crate::atoms::error::{EngineError, EngineResult};
use crate::store::Store;

pub struct JobLock<'a> {
    store: &'a Store,
}

impl<'a> JobLock<'a> {
    pub fn new(store: &'a Store) -> Self {
        JobLock { store }
    }

    /// Acquire exclusive ownership of `name` for `ttl_secs`. Returns
    /// `EngineError::Busy`-equivalent (`PermissionDenied`-free `Other`) when
    /// another holder's lock has not yet expired.
    pub fn acquire(&self, name: &str, ttl_secs: i64, holder: &str) -> EngineResult<()> {
        let now = Utc::now();
        let conn = self.store.conn.lock();

        let existing: Option<(String, String)> = conn
            .query_row(
                "SELECT holder, expires_at FROM job_locks WHERE name = ?1",
                rusqlite::params![name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok();

        if let Some((_, expires_at)) = &existing {
            if let Ok(expires) = DateTime::parse_from_rfc3339(expires_at) {
                if expires.with_timezone(&Utc) > now {
                    return Err(EngineError::Busy(name.to_string()));
                }
            }
        }

        conn.execute(
            "INSERT INTO job_locks (name, holder, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                 holder = excluded.holder,
                 acquired_at = excluded.acquired_at,
                 expires_at = excluded.expires_at",
            rusqlite::params![
                name,
                holder,
                now.to_rfc3339(),
                (now + chrono::Duration::seconds(ttl_secs)).to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn acquire_default(&self, name: &str, holder: &str) -> EngineResult<()> {
        self.acquire(name, JOB_LOCK_DEFAULT_TTL_SECS, holder)
    }

    /// Release `name`, but only if `holder` is still the current owner.
    /// Idempotent: releasing a lock that isn't held, already expired, or
    /// held by someone else is not an error — it's just a no-op, since a
    /// caller releasing a lock it no longer owns (its TTL expired and
    /// another holder already reacquired it) must not delete that other
    /// holder's row out from under them.
    pub fn release(&self, name: &str, holder: &str) -> EngineResult<()> {
        let conn = self.store.conn.lock();
        conn.execute("DELETE FROM job_locks WHERE name = ?1 AND holder = ?2", rusqlite::params![name, holder])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_allows_reacquire() {
        let store = Store::open_in_memory().unwrap();
        let lock = JobLock::new(&store);
        lock.acquire("nightly-digest", 300, "worker-a").unwrap();
        assert!(lock.acquire("nightly-digest", 300, "worker-b").is_err());
        lock.release("nightly-digest", "worker-a").unwrap();
        assert!(lock.acquire("nightly-digest", 300, "worker-b").is_ok());
    }

    #[test]
    fn expired_lock_can_be_reacquired_by_another_holder() {
        let store = Store::open_in_memory().unwrap();
        let lock = JobLock::new(&store);
        lock.acquire("cleanup", -1, "worker-a").unwrap();
        assert!(lock.acquire("cleanup", 300, "worker-b").is_ok());
    }

    #[test]
    fn release_of_unheld_lock_is_not_an_error() {
        let store = Store::open_in_memory().unwrap();
        let lock = JobLock::new(&store);
        assert!(lock.release("never-acquired", "nobody").is_ok());
    }

    #[test]
    fn stale_holder_release_does_not_steal_a_new_holders_lock() {
        let store = Store::open_in_memory().unwrap();
        let lock = JobLock::new(&store);
        lock.acquire("cleanup", -1, "worker-a").unwrap();
        lock.acquire("cleanup", 300, "worker-b").unwrap();
        // worker-a's stale release must not touch worker-b's active lock.
        lock.release("cleanup", "worker-a").unwrap();
        assert!(lock.acquire("cleanup", 300, "worker-c").is_err());
    }
}
