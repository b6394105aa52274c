//! Named leases stored in SQLite.
//!
//! A lease keeps two update runs (from the daemon and the CLI, or two
//! overlapping triggers) from processing the same files at once. Leases
//! expire so a crashed holder does not block later runs forever.

use rusqlite::params;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{format_ts, now_ts, Database};
use crate::error::Result;

/// Longest lease handed out, whatever the caller asks for.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub struct RunLease {
    db: Arc<Database>,
    name: String,
    holder: String,
    released: bool,
}

impl RunLease {
    /// Take the lease `name` for `ttl`, or `None` if a live holder has it.
    pub fn try_acquire(db: &Arc<Database>, name: &str, ttl: Duration) -> Result<Option<Self>> {
        let now = now_ts();
        // Expiry is compared as text, so it has to stay a four-digit year.
        let ttl = chrono::Duration::from_std(ttl.min(MAX_TTL)).unwrap_or(chrono::Duration::days(365));
        let expires = now.checked_add_signed(ttl).unwrap_or(now);
        let holder = uuid::Uuid::new_v4().to_string();

        let acquired = {
            let mut conn = db.conn()?;
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM process_lease WHERE name = ? AND expires_at <= ?",
                params![name, format_ts(&now)],
            )?;
            let inserted = tx.execute(
                r#"
                INSERT OR IGNORE INTO process_lease (name, holder, acquired_at, expires_at)
                VALUES (?, ?, ?, ?)
                "#,
                params![name, holder, format_ts(&now), format_ts(&expires)],
            )?;
            tx.commit()?;
            inserted == 1
        };

        if !acquired {
            return Ok(None);
        }

        debug!("Acquired lease {} as {}", name, holder);
        Ok(Some(Self {
            db: Arc::clone(db),
            name: name.to_string(),
            holder,
            released: false,
        }))
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.delete()
    }

    fn delete(&self) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "DELETE FROM process_lease WHERE name = ? AND holder = ?",
            params![self.name, self.holder],
        )?;
        Ok(())
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.delete() {
            warn!("Failed to release lease {}: {}", self.name, e);
        }
    }
}
