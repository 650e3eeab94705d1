use rusqlite::Connection;

use crate::sqlite::SqliteResultExt;
use crate::DbError;

pub fn run(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS records (
            id          TEXT PRIMARY KEY,
            account_id  TEXT NOT NULL,
            member      TEXT NOT NULL,
            title       TEXT NOT NULL,
            record_type TEXT NOT NULL DEFAULT 'other'
                            CHECK(record_type IN (
                                'checkup', 'prescription', 'vaccination',
                                'lab_result', 'surgery', 'imaging', 'other'
                            )),
            doctor      TEXT NOT NULL DEFAULT '',
            record_date TEXT NOT NULL,
            notes       TEXT NOT NULL DEFAULT '',
            version     INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_records_account
            ON records(account_id, record_date);

        CREATE TABLE IF NOT EXISTS attachments (
            id          TEXT PRIMARY KEY,
            record_id   TEXT NOT NULL REFERENCES records(id) ON DELETE CASCADE,
            position    INTEGER NOT NULL DEFAULT 0,
            filename    TEXT NOT NULL,
            remote_url  TEXT NOT NULL,
            remote_id   TEXT NOT NULL UNIQUE,
            mime_type   TEXT NOT NULL DEFAULT '',
            size_bytes  INTEGER NOT NULL DEFAULT 0,
            uploaded_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_attachments_record
            ON attachments(record_id, position);

        CREATE TABLE IF NOT EXISTS api_keys (
            id           TEXT PRIMARY KEY,
            account_id   TEXT NOT NULL,
            name         TEXT NOT NULL,
            key_hash     TEXT NOT NULL UNIQUE,
            created_at   TEXT NOT NULL,
            last_used_at TEXT
        );
        ",
    )
    .to_db()?;

    // Versioned migrations
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )
    .to_db()?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        // v1: lease row for the orphan sweep; expires_at is unix millis
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sweep_lease (
                name       TEXT PRIMARY KEY,
                holder     TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
            INSERT INTO schema_version (version, applied_at) VALUES (1, datetime('now'));",
        )
        .to_db()?;
    }

    if current_version < 2 {
        // v2: family members and appointments. `records.member` holds a
        // family member id, checked on write.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS family_members (
                id            TEXT PRIMARY KEY,
                account_id    TEXT NOT NULL,
                name          TEXT NOT NULL,
                relationship  TEXT NOT NULL
                                  CHECK(relationship IN (
                                      'self', 'spouse', 'son', 'daughter', 'father',
                                      'mother', 'brother', 'sister', 'grandfather',
                                      'grandmother', 'other'
                                  )),
                date_of_birth TEXT,
                created_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_family_members_account
                ON family_members(account_id, created_at);

            CREATE TABLE IF NOT EXISTS appointments (
                id           TEXT PRIMARY KEY,
                account_id   TEXT NOT NULL,
                member       TEXT NOT NULL REFERENCES family_members(id),
                doctor       TEXT NOT NULL,
                scheduled_at TEXT NOT NULL,
                status       TEXT NOT NULL DEFAULT 'scheduled'
                                 CHECK(status IN ('scheduled', 'completed', 'cancelled')),
                notes        TEXT NOT NULL DEFAULT '',
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_appointments_account
                ON appointments(account_id, scheduled_at);
            CREATE INDEX IF NOT EXISTS idx_records_member ON records(member);
            INSERT INTO schema_version (version, applied_at) VALUES (2, datetime('now'));",
        )
        .to_db()?;
    }

    Ok(())
}
