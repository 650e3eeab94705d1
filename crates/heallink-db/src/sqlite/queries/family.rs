use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use heallink_core::family::{CreateFamilyMember, FamilyMember, Relationship, UpdateFamilyMember};

use super::super::{SqliteDatabase, SqliteResultExt};
use crate::DbError;

fn row_to_member(row: &Row) -> rusqlite::Result<FamilyMember> {
    let relationship: String = row.get("relationship")?;
    Ok(FamilyMember {
        id: row.get("id")?,
        account_id: row.get("account_id")?,
        name: row.get("name")?,
        relationship: Relationship::parse_str(&relationship).unwrap_or(Relationship::Other),
        date_of_birth: row.get("date_of_birth")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn fetch_member(conn: &Connection, account_id: &str, id: &str) -> Result<FamilyMember, DbError> {
    conn.query_row(
        "SELECT * FROM family_members WHERE id = ?1 AND account_id = ?2",
        params![id, account_id],
        row_to_member,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("family member {id}")),
        other => DbError::Internal(other.to_string()),
    })
}

/// Fail with `Invalid` unless `member` is a family member of the account.
pub(crate) fn ensure_member(
    conn: &Connection,
    account_id: &str,
    member: &str,
) -> Result<(), DbError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM family_members WHERE id = ?1 AND account_id = ?2",
            params![member, account_id],
            |_| Ok(()),
        )
        .optional()
        .to_db()?;
    found.ok_or_else(|| DbError::Invalid(format!("unknown family member {member}")))
}

impl SqliteDatabase {
    pub fn create_family_member_sync(
        &self,
        account_id: &str,
        input: &CreateFamilyMember,
    ) -> Result<FamilyMember, DbError> {
        self.with_conn(|conn| {
            let id = uuid::Uuid::new_v4().to_string();
            let now = Utc::now();
            conn.execute(
                "INSERT INTO family_members (id, account_id, name, relationship,
                                             date_of_birth, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    account_id,
                    input.name,
                    input.relationship.as_str(),
                    input.date_of_birth,
                    now,
                    now
                ],
            )
            .to_db()?;
            fetch_member(conn, account_id, &id)
        })
    }

    pub fn get_family_member_sync(
        &self,
        account_id: &str,
        id: &str,
    ) -> Result<FamilyMember, DbError> {
        self.with_conn(|conn| fetch_member(conn, account_id, id))
    }

    pub fn list_family_members_sync(&self, account_id: &str) -> Result<Vec<FamilyMember>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM family_members WHERE account_id = ?1
                     ORDER BY created_at ASC, rowid ASC",
                )
                .to_db()?;
            let members = stmt
                .query_map(params![account_id], row_to_member)
                .to_db()?
                .collect::<Result<Vec<_>, _>>()
                .to_db()?;
            Ok(members)
        })
    }

    pub fn update_family_member_sync(
        &self,
        account_id: &str,
        id: &str,
        update: &UpdateFamilyMember,
    ) -> Result<FamilyMember, DbError> {
        self.with_conn(|conn| {
            let mut sets = Vec::new();
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(ref name) = update.name {
                sets.push("name = ?");
                values.push(Box::new(name.clone()));
            }
            if let Some(relationship) = update.relationship {
                sets.push("relationship = ?");
                values.push(Box::new(relationship.as_str().to_string()));
            }
            if let Some(date_of_birth) = update.date_of_birth {
                sets.push("date_of_birth = ?");
                values.push(Box::new(date_of_birth));
            }

            if sets.is_empty() {
                return fetch_member(conn, account_id, id);
            }

            sets.push("updated_at = ?");
            values.push(Box::new(Utc::now()));
            values.push(Box::new(id.to_string()));
            values.push(Box::new(account_id.to_string()));

            let sql = format!(
                "UPDATE family_members SET {} WHERE id = ? AND account_id = ?",
                sets.join(", ")
            );
            let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
            let changed = conn.execute(&sql, params.as_slice()).to_db()?;
            if changed == 0 {
                return Err(DbError::NotFound(format!("family member {id}")));
            }

            fetch_member(conn, account_id, id)
        })
    }

    pub fn delete_family_member_sync(&self, account_id: &str, id: &str) -> Result<(), DbError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction().to_db()?;
            fetch_member(&tx, account_id, id)?;
            let (records, appointments): (i64, i64) = tx
                .query_row(
                    "SELECT (SELECT COUNT(*) FROM records WHERE member = ?1 AND account_id = ?2),
                            (SELECT COUNT(*) FROM appointments WHERE member = ?1 AND account_id = ?2)",
                    params![id, account_id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .to_db()?;
            if records > 0 || appointments > 0 {
                return Err(DbError::Conflict(format!(
                    "family member {id} still has {records} records and {appointments} appointments"
                )));
            }
            tx.execute(
                "DELETE FROM family_members WHERE id = ?1 AND account_id = ?2",
                params![id, account_id],
            )
            .to_db()?;
            tx.commit().to_db()?;
            Ok(())
        })
    }
}
