use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use heallink_core::attachment::{Attachment, NewAttachment};
use heallink_core::record::HealthRecord;

use super::super::{SqliteDatabase, SqliteResultExt};
use super::records::fetch_record;
use crate::DbError;

fn row_to_attachment(row: &Row) -> rusqlite::Result<Attachment> {
    Ok(Attachment {
        id: row.get("id")?,
        record_id: row.get("record_id")?,
        filename: row.get("filename")?,
        remote_url: row.get("remote_url")?,
        remote_id: row.get("remote_id")?,
        mime_type: row.get("mime_type")?,
        size_bytes: row.get("size_bytes")?,
        uploaded_at: row.get("uploaded_at")?,
    })
}

pub(crate) fn load_attachments(
    conn: &Connection,
    record_id: &str,
) -> Result<Vec<Attachment>, DbError> {
    let mut stmt = conn
        .prepare("SELECT * FROM attachments WHERE record_id = ?1 ORDER BY position")
        .to_db()?;
    let attachments = stmt
        .query_map(params![record_id], row_to_attachment)
        .to_db()?
        .collect::<Result<Vec<_>, _>>()
        .to_db()?;
    Ok(attachments)
}

pub(crate) fn insert_attachment(
    conn: &Connection,
    record_id: &str,
    position: usize,
    file: &NewAttachment,
    uploaded_at: DateTime<Utc>,
) -> Result<(), DbError> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO attachments (id, record_id, position, filename, remote_url, remote_id,
                                  mime_type, size_bytes, uploaded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            record_id,
            position as i64,
            file.filename,
            file.remote_url,
            file.remote_id,
            file.mime_type,
            file.size_bytes,
            uploaded_at
        ],
    )
    .to_db()?;
    Ok(())
}

fn bump_version(conn: &Connection, record_id: &str) -> Result<(), DbError> {
    conn.execute(
        "UPDATE records SET version = version + 1, updated_at = ?1 WHERE id = ?2",
        params![Utc::now(), record_id],
    )
    .to_db()?;
    Ok(())
}

impl SqliteDatabase {
    /// Overwrite the record's attachment list. A repeated remote id keeps
    /// its first occurrence; attachments that survive keep their
    /// `uploaded_at`.
    pub fn replace_attachments_sync(
        &self,
        account_id: &str,
        record_id: &str,
        files: &[NewAttachment],
        expected_version: Option<i64>,
    ) -> Result<(HealthRecord, Vec<Attachment>), DbError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction().to_db()?;
            let current = fetch_record(&tx, account_id, record_id)?;
            if let Some(expected) = expected_version {
                if expected != current.version {
                    return Err(DbError::Conflict(format!(
                        "record {record_id} is at version {}, expected {expected}",
                        current.version
                    )));
                }
            }

            let mut seen = HashSet::new();
            let kept: Vec<&NewAttachment> = files
                .iter()
                .filter(|f| seen.insert(f.remote_id.as_str()))
                .collect();
            let previous: HashMap<&str, DateTime<Utc>> = current
                .attachments
                .iter()
                .map(|a| (a.remote_id.as_str(), a.uploaded_at))
                .collect();
            let dropped: Vec<Attachment> = current
                .attachments
                .iter()
                .filter(|a| !seen.contains(a.remote_id.as_str()))
                .cloned()
                .collect();

            tx.execute(
                "DELETE FROM attachments WHERE record_id = ?1",
                params![record_id],
            )
            .to_db()?;
            let now = Utc::now();
            for (position, file) in kept.iter().enumerate() {
                let uploaded_at = previous
                    .get(file.remote_id.as_str())
                    .copied()
                    .unwrap_or(now);
                insert_attachment(&tx, record_id, position, file, uploaded_at)?;
            }
            bump_version(&tx, record_id)?;
            tx.commit().to_db()?;

            let record = fetch_record(conn, account_id, record_id)?;
            Ok((record, dropped))
        })
    }

    /// Remove matching attachments in one transaction. Ids not attached to
    /// the record are ignored, so repeating a call removes nothing.
    pub fn remove_attachments_sync(
        &self,
        account_id: &str,
        record_id: &str,
        remote_ids: &[String],
    ) -> Result<Vec<Attachment>, DbError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction().to_db()?;
            let current = fetch_record(&tx, account_id, record_id)?;
            let wanted: HashSet<&str> = remote_ids.iter().map(String::as_str).collect();
            let removed: Vec<Attachment> = current
                .attachments
                .into_iter()
                .filter(|a| wanted.contains(a.remote_id.as_str()))
                .collect();
            if removed.is_empty() {
                return Ok(removed);
            }
            for attachment in &removed {
                tx.execute(
                    "DELETE FROM attachments WHERE id = ?1",
                    params![attachment.id],
                )
                .to_db()?;
            }
            bump_version(&tx, record_id)?;
            tx.commit().to_db()?;
            Ok(removed)
        })
    }

    pub fn list_referenced_remote_ids_sync(&self) -> Result<HashSet<String>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT remote_id FROM attachments").to_db()?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .to_db()?
                .collect::<Result<HashSet<_>, _>>()
                .to_db()?;
            Ok(ids)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use heallink_core::family::{CreateFamilyMember, Relationship};
    use heallink_core::record::{CreateRecord, RecordType};

    fn file(remote_id: &str) -> NewAttachment {
        NewAttachment {
            filename: format!("{remote_id}.png"),
            remote_url: format!("https://cdn.example/{remote_id}.png"),
            remote_id: remote_id.into(),
            mime_type: "image/png".into(),
            size_bytes: 10,
        }
    }

    fn seed(db: &SqliteDatabase, account: &str, ids: &[&str]) -> HealthRecord {
        let member = db
            .create_family_member_sync(
                account,
                &CreateFamilyMember {
                    name: "Ada".into(),
                    relationship: Relationship::Oneself,
                    date_of_birth: None,
                },
            )
            .unwrap();
        db.create_record_sync(
            account,
            &CreateRecord {
                member: member.id,
                title: "X-ray".into(),
                record_type: RecordType::Imaging,
                doctor: String::new(),
                record_date: NaiveDate::from_ymd_opt(2026, 4, 2).unwrap(),
                notes: String::new(),
                files: ids.iter().map(|id| file(id)).collect(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_replace_overwrites_and_reports_dropped() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let record = seed(&db, "acct", &["a", "b"]);

        let (updated, dropped) = db
            .replace_attachments_sync("acct", &record.id, &[file("b"), file("c")], None)
            .unwrap();
        assert_eq!(updated.remote_ids(), vec!["b", "c"]);
        assert_eq!(updated.version, record.version + 1);
        let dropped: Vec<_> = dropped.iter().map(|a| a.remote_id.as_str()).collect();
        assert_eq!(dropped, vec!["a"]);

        // Surviving attachment keeps its original upload time
        let before = record.attachments.iter().find(|a| a.remote_id == "b").unwrap();
        let after = updated.attachments.iter().find(|a| a.remote_id == "b").unwrap();
        assert_eq!(before.uploaded_at, after.uploaded_at);
    }

    #[test]
    fn test_replace_with_stale_version_conflicts() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let record = seed(&db, "acct", &["a"]);
        db.replace_attachments_sync("acct", &record.id, &[file("b")], Some(record.version))
            .unwrap();

        let err = db
            .replace_attachments_sync("acct", &record.id, &[file("c")], Some(record.version))
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
        // Nothing changed
        let current = db.get_record_sync("acct", &record.id).unwrap();
        assert_eq!(current.remote_ids(), vec!["b"]);
    }

    #[test]
    fn test_replace_dedups_remote_ids() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let record = seed(&db, "acct", &[]);
        let (updated, _) = db
            .replace_attachments_sync("acct", &record.id, &[file("a"), file("a")], None)
            .unwrap();
        assert_eq!(updated.remote_ids(), vec!["a"]);
    }

    #[test]
    fn test_remote_id_attached_elsewhere_conflicts() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        seed(&db, "acct", &["shared"]);
        let other = seed(&db, "acct", &[]);
        let err = db
            .replace_attachments_sync("acct", &other.id, &[file("shared")], None)
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let record = seed(&db, "acct", &["a", "b", "c"]);
        let ids = vec!["b".to_string(), "zzz".to_string()];

        let removed = db.remove_attachments_sync("acct", &record.id, &ids).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].remote_id, "b");

        let again = db.remove_attachments_sync("acct", &record.id, &ids).unwrap();
        assert!(again.is_empty());

        let current = db.get_record_sync("acct", &record.id).unwrap();
        assert_eq!(current.remote_ids(), vec!["a", "c"]);
        // Only the effective removal moved the version
        assert_eq!(current.version, record.version + 1);
    }

    #[test]
    fn test_remove_from_missing_record() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let err = db
            .remove_attachments_sync("acct", "nope", &["a".to_string()])
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }

    #[test]
    fn test_referenced_ids_span_accounts() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        seed(&db, "acct-1", &["a", "b"]);
        seed(&db, "acct-2", &["c"]);
        let ids = db.list_referenced_remote_ids_sync().unwrap();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains("c"));
    }
}
