use chrono::Utc;
use rusqlite::params;

use super::super::{SqliteDatabase, SqliteResultExt};
use crate::DbError;

const LEASE_NAME: &str = "orphan_sweep";

impl SqliteDatabase {
    /// Insert the lease, or take it over when it has expired or is already
    /// ours. The upsert's WHERE clause leaves a live foreign lease untouched,
    /// in which case no row changes.
    pub fn try_acquire_sweep_lease_sync(
        &self,
        holder: &str,
        ttl: chrono::Duration,
    ) -> Result<bool, DbError> {
        self.with_conn(|conn| {
            let now = Utc::now().timestamp_millis();
            let expires_at = now + ttl.num_milliseconds();
            let changed = conn
                .execute(
                    "INSERT INTO sweep_lease (name, holder, expires_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(name) DO UPDATE
                        SET holder = excluded.holder, expires_at = excluded.expires_at
                        WHERE sweep_lease.expires_at <= ?4 OR sweep_lease.holder = excluded.holder",
                    params![LEASE_NAME, holder, expires_at, now],
                )
                .to_db()?;
            Ok(changed > 0)
        })
    }

    pub fn release_sweep_lease_sync(&self, holder: &str) -> Result<(), DbError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM sweep_lease WHERE name = ?1 AND holder = ?2",
                params![LEASE_NAME, holder],
            )
            .to_db()?;
            Ok(())
        })
    }
}
