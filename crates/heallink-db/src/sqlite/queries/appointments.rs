use chrono::Utc;
use rusqlite::{params, Connection, Row};

use heallink_core::appointment::{
    Appointment, AppointmentStatus, CreateAppointment, UpdateAppointment,
};

use super::super::{SqliteDatabase, SqliteResultExt};
use super::family::ensure_member;
use crate::DbError;

fn row_to_appointment(row: &Row) -> rusqlite::Result<Appointment> {
    let status: String = row.get("status")?;
    Ok(Appointment {
        id: row.get("id")?,
        account_id: row.get("account_id")?,
        member: row.get("member")?,
        doctor: row.get("doctor")?,
        scheduled_at: row.get("scheduled_at")?,
        status: AppointmentStatus::parse_str(&status).unwrap_or_default(),
        notes: row.get("notes")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn fetch_appointment(
    conn: &Connection,
    account_id: &str,
    id: &str,
) -> Result<Appointment, DbError> {
    conn.query_row(
        "SELECT * FROM appointments WHERE id = ?1 AND account_id = ?2",
        params![id, account_id],
        row_to_appointment,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("appointment {id}")),
        other => DbError::Internal(other.to_string()),
    })
}

impl SqliteDatabase {
    pub fn create_appointment_sync(
        &self,
        account_id: &str,
        input: &CreateAppointment,
    ) -> Result<Appointment, DbError> {
        self.with_conn(|conn| {
            ensure_member(conn, account_id, &input.member)?;
            let id = uuid::Uuid::new_v4().to_string();
            let now = Utc::now();
            conn.execute(
                "INSERT INTO appointments (id, account_id, member, doctor, scheduled_at,
                                           status, notes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    account_id,
                    input.member,
                    input.doctor,
                    input.scheduled_at,
                    AppointmentStatus::Scheduled.as_str(),
                    input.notes,
                    now,
                    now
                ],
            )
            .to_db()?;
            fetch_appointment(conn, account_id, &id)
        })
    }

    pub fn get_appointment_sync(&self, account_id: &str, id: &str) -> Result<Appointment, DbError> {
        self.with_conn(|conn| fetch_appointment(conn, account_id, id))
    }

    pub fn list_appointments_sync(&self, account_id: &str) -> Result<Vec<Appointment>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM appointments WHERE account_id = ?1
                     ORDER BY scheduled_at ASC",
                )
                .to_db()?;
            let appointments = stmt
                .query_map(params![account_id], row_to_appointment)
                .to_db()?
                .collect::<Result<Vec<_>, _>>()
                .to_db()?;
            Ok(appointments)
        })
    }

    pub fn update_appointment_sync(
        &self,
        account_id: &str,
        id: &str,
        update: &UpdateAppointment,
    ) -> Result<Appointment, DbError> {
        self.with_conn(|conn| {
            let mut sets = Vec::new();
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(ref member) = update.member {
                ensure_member(conn, account_id, member)?;
                sets.push("member = ?");
                values.push(Box::new(member.clone()));
            }
            if let Some(ref doctor) = update.doctor {
                sets.push("doctor = ?");
                values.push(Box::new(doctor.clone()));
            }
            if let Some(scheduled_at) = update.scheduled_at {
                sets.push("scheduled_at = ?");
                values.push(Box::new(scheduled_at));
            }
            if let Some(status) = update.status {
                sets.push("status = ?");
                values.push(Box::new(status.as_str().to_string()));
            }
            if let Some(ref notes) = update.notes {
                sets.push("notes = ?");
                values.push(Box::new(notes.clone()));
            }

            if sets.is_empty() {
                return fetch_appointment(conn, account_id, id);
            }

            sets.push("updated_at = ?");
            values.push(Box::new(Utc::now()));
            values.push(Box::new(id.to_string()));
            values.push(Box::new(account_id.to_string()));

            let sql = format!(
                "UPDATE appointments SET {} WHERE id = ? AND account_id = ?",
                sets.join(", ")
            );
            let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
            let changed = conn.execute(&sql, params.as_slice()).to_db()?;
            if changed == 0 {
                return Err(DbError::NotFound(format!("appointment {id}")));
            }

            fetch_appointment(conn, account_id, id)
        })
    }

    pub fn delete_appointment_sync(&self, account_id: &str, id: &str) -> Result<(), DbError> {
        self.with_conn(|conn| {
            let changed = conn
                .execute(
                    "DELETE FROM appointments WHERE id = ?1 AND account_id = ?2",
                    params![id, account_id],
                )
                .to_db()?;
            if changed == 0 {
                return Err(DbError::NotFound(format!("appointment {id}")));
            }
            Ok(())
        })
    }
}
