use chrono::Utc;
use rusqlite::{params, Connection, Row};

use heallink_core::record::{CreateRecord, HealthRecord, RecordType, UpdateRecord};

use super::super::{SqliteDatabase, SqliteResultExt};
use super::attachments::{insert_attachment, load_attachments};
use super::family::ensure_member;
use crate::DbError;

fn row_to_record(row: &Row) -> rusqlite::Result<HealthRecord> {
    let record_type: String = row.get("record_type")?;
    Ok(HealthRecord {
        id: row.get("id")?,
        account_id: row.get("account_id")?,
        member: row.get("member")?,
        title: row.get("title")?,
        record_type: RecordType::parse_str(&record_type).unwrap_or_default(),
        doctor: row.get("doctor")?,
        record_date: row.get("record_date")?,
        notes: row.get("notes")?,
        attachments: Vec::new(),
        version: row.get("version")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Load one record with its attachments, scoped to `account_id`.
pub(crate) fn fetch_record(
    conn: &Connection,
    account_id: &str,
    id: &str,
) -> Result<HealthRecord, DbError> {
    let mut record = conn
        .query_row(
            "SELECT * FROM records WHERE id = ?1 AND account_id = ?2",
            params![id, account_id],
            row_to_record,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("record {id}")),
            other => DbError::Internal(other.to_string()),
        })?;
    record.attachments = load_attachments(conn, id)?;
    Ok(record)
}

impl SqliteDatabase {
    pub fn create_record_sync(
        &self,
        account_id: &str,
        input: &CreateRecord,
    ) -> Result<HealthRecord, DbError> {
        self.with_conn(|conn| {
            let id = uuid::Uuid::new_v4().to_string();
            let now = Utc::now();
            let tx = conn.unchecked_transaction().to_db()?;
            ensure_member(&tx, account_id, &input.member)?;
            tx.execute(
                "INSERT INTO records (id, account_id, member, title, record_type, doctor,
                                      record_date, notes, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?10)",
                params![
                    id,
                    account_id,
                    input.member,
                    input.title,
                    input.record_type.as_str(),
                    input.doctor,
                    input.record_date,
                    input.notes,
                    now,
                    now
                ],
            )
            .to_db()?;
            for (position, file) in input.files.iter().enumerate() {
                insert_attachment(&tx, &id, position, file, now)?;
            }
            tx.commit().to_db()?;
            fetch_record(conn, account_id, &id)
        })
    }

    pub fn get_record_sync(&self, account_id: &str, id: &str) -> Result<HealthRecord, DbError> {
        self.with_conn(|conn| fetch_record(conn, account_id, id))
    }

    pub fn list_records_sync(&self, account_id: &str) -> Result<Vec<HealthRecord>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM records WHERE account_id = ?1
                     ORDER BY record_date DESC, created_at DESC",
                )
                .to_db()?;
            let mut records = stmt
                .query_map(params![account_id], row_to_record)
                .to_db()?
                .collect::<Result<Vec<_>, _>>()
                .to_db()?;
            for record in &mut records {
                record.attachments = load_attachments(conn, &record.id)?;
            }
            Ok(records)
        })
    }

    pub fn update_record_sync(
        &self,
        account_id: &str,
        id: &str,
        update: &UpdateRecord,
    ) -> Result<HealthRecord, DbError> {
        self.with_conn(|conn| {
            let mut sets = Vec::new();
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(ref member) = update.member {
                ensure_member(conn, account_id, member)?;
                sets.push("member = ?");
                values.push(Box::new(member.clone()));
            }
            if let Some(ref title) = update.title {
                sets.push("title = ?");
                values.push(Box::new(title.clone()));
            }
            if let Some(record_type) = update.record_type {
                sets.push("record_type = ?");
                values.push(Box::new(record_type.as_str().to_string()));
            }
            if let Some(ref doctor) = update.doctor {
                sets.push("doctor = ?");
                values.push(Box::new(doctor.clone()));
            }
            if let Some(record_date) = update.record_date {
                sets.push("record_date = ?");
                values.push(Box::new(record_date));
            }
            if let Some(ref notes) = update.notes {
                sets.push("notes = ?");
                values.push(Box::new(notes.clone()));
            }

            if sets.is_empty() {
                return fetch_record(conn, account_id, id);
            }

            sets.push("version = version + 1");
            sets.push("updated_at = ?");
            values.push(Box::new(Utc::now()));
            values.push(Box::new(id.to_string()));
            values.push(Box::new(account_id.to_string()));

            let sql = format!(
                "UPDATE records SET {} WHERE id = ? AND account_id = ?",
                sets.join(", ")
            );
            let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
            let changed = conn.execute(&sql, params.as_slice()).to_db()?;
            if changed == 0 {
                return Err(DbError::NotFound(format!("record {id}")));
            }

            fetch_record(conn, account_id, id)
        })
    }

    /// Returns the deleted record, attachments included.
    pub fn delete_record_sync(&self, account_id: &str, id: &str) -> Result<HealthRecord, DbError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction().to_db()?;
            let record = fetch_record(&tx, account_id, id)?;
            tx.execute(
                "DELETE FROM records WHERE id = ?1 AND account_id = ?2",
                params![id, account_id],
            )
            .to_db()?;
            tx.commit().to_db()?;
            Ok(record)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use heallink_core::attachment::NewAttachment;
    use heallink_core::family::{CreateFamilyMember, Relationship};

    fn seed_member(db: &SqliteDatabase, account_id: &str) -> String {
        db.create_family_member_sync(
            account_id,
            &CreateFamilyMember {
                name: "Ada".into(),
                relationship: Relationship::Oneself,
                date_of_birth: None,
            },
        )
        .unwrap()
        .id
    }

    fn new_record(member: &str, title: &str, date: (i32, u32, u32)) -> CreateRecord {
        CreateRecord {
            member: member.into(),
            title: title.into(),
            record_type: RecordType::LabResult,
            doctor: "Dr. Okafor".into(),
            record_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            notes: String::new(),
            files: vec![],
        }
    }

    fn file(remote_id: &str) -> NewAttachment {
        NewAttachment {
            filename: format!("{remote_id}.pdf"),
            remote_url: format!("https://cdn.example/{remote_id}.pdf"),
            remote_id: remote_id.into(),
            mime_type: "application/pdf".into(),
            size_bytes: 100,
        }
    }

    #[test]
    fn test_record_crud() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let member = seed_member(&db, "acct");

        let mut input = new_record(&member, "Blood panel", (2026, 2, 1));
        input.files = vec![file("r/a"), file("r/b")];
        let record = db.create_record_sync("acct", &input).unwrap();
        assert_eq!(record.title, "Blood panel");
        assert_eq!(record.record_type, RecordType::LabResult);
        assert_eq!(record.version, 1);
        assert_eq!(record.remote_ids(), vec!["r/a", "r/b"]);

        let fetched = db.get_record_sync("acct", &record.id).unwrap();
        assert_eq!(fetched.attachments.len(), 2);

        let updated = db
            .update_record_sync(
                "acct",
                &record.id,
                &UpdateRecord {
                    notes: Some("fasting".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.notes, "fasting");
        assert_eq!(updated.version, 2);
        assert_eq!(updated.attachments.len(), 2);

        let deleted = db.delete_record_sync("acct", &record.id).unwrap();
        assert_eq!(deleted.remote_ids(), vec!["r/a", "r/b"]);
        assert!(matches!(
            db.get_record_sync("acct", &record.id),
            Err(DbError::NotFound(_))
        ));
        // Attachment rows went with the record
        assert!(db.list_referenced_remote_ids_sync().unwrap().is_empty());
    }

    #[test]
    fn test_records_are_scoped_to_account() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let member = seed_member(&db, "acct-1");
        let record = db
            .create_record_sync("acct-1", &new_record(&member, "Checkup", (2026, 1, 1)))
            .unwrap();

        assert!(matches!(
            db.get_record_sync("acct-2", &record.id),
            Err(DbError::NotFound(_))
        ));
        assert!(db.list_records_sync("acct-2").unwrap().is_empty());
        assert!(matches!(
            db.delete_record_sync("acct-2", &record.id),
            Err(DbError::NotFound(_))
        ));
        assert!(matches!(
            db.update_record_sync(
                "acct-2",
                &record.id,
                &UpdateRecord {
                    title: Some("stolen".into()),
                    ..Default::default()
                }
            ),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_newest_first() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let member = seed_member(&db, "acct");
        for (title, year) in [("old", 2024), ("new", 2026), ("mid", 2025)] {
            db.create_record_sync("acct", &new_record(&member, title, (year, 5, 1)))
                .unwrap();
        }

        let titles: Vec<_> = db
            .list_records_sync("acct")
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(titles, vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_empty_update_keeps_version() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let member = seed_member(&db, "acct");
        let record = db
            .create_record_sync("acct", &new_record(&member, "x", (2026, 1, 1)))
            .unwrap();
        let same = db
            .update_record_sync("acct", &record.id, &UpdateRecord::default())
            .unwrap();
        assert_eq!(same.version, 1);
    }

    #[test]
    fn test_member_must_belong_to_the_account() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let theirs = seed_member(&db, "acct-2");

        let err = db
            .create_record_sync("acct-1", &new_record(&theirs, "x", (2026, 1, 1)))
            .unwrap_err();
        assert!(matches!(err, DbError::Invalid(_)));
        assert!(db.list_records_sync("acct-1").unwrap().is_empty());

        let mine = seed_member(&db, "acct-1");
        let record = db
            .create_record_sync("acct-1", &new_record(&mine, "x", (2026, 1, 1)))
            .unwrap();
        let err = db
            .update_record_sync(
                "acct-1",
                &record.id,
                &UpdateRecord {
                    member: Some("free text".into()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, DbError::Invalid(_)));
        assert_eq!(db.get_record_sync("acct-1", &record.id).unwrap().member, mine);
    }
}
