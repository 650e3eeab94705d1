pub mod queries;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;

use heallink_core::api_key::ApiKey;
use heallink_core::appointment::{Appointment, CreateAppointment, UpdateAppointment};
use heallink_core::attachment::{Attachment, NewAttachment};
use heallink_core::family::{CreateFamilyMember, FamilyMember, UpdateFamilyMember};
use heallink_core::record::{CreateRecord, HealthRecord, UpdateRecord};

use crate::{migrations, Database, DbConfig, DbError};

/// Extension trait that converts `rusqlite::Result<T>` into `Result<T, DbError>`.
pub(crate) trait SqliteResultExt<T> {
    fn to_db(self) -> Result<T, DbError>;
}

impl<T> SqliteResultExt<T> for rusqlite::Result<T> {
    fn to_db(self) -> Result<T, DbError> {
        self.map_err(map_sqlite_err)
    }
}

/// Map a `rusqlite::Error` into a `DbError`. Constraint violations (a
/// remote id already attached elsewhere) become `Conflict`.
pub(crate) fn map_sqlite_err(e: rusqlite::Error) -> DbError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DbError::Conflict(e.to_string())
        }
        _ => DbError::Internal(e.to_string()),
    }
}

#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatabase {
    pub fn open(config: &DbConfig) -> Result<Self, DbError> {
        let path = config
            .sqlite_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| crate::data_dir().join("heallink.db"));
        std::fs::create_dir_all(path.parent().unwrap_or(Path::new(".")))?;
        Self::open_path(&path)
    }

    pub fn open_path(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path).to_db()?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )
        .to_db()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory().to_db()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;").to_db()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Connection) -> Result<T, DbError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|_| DbError::Internal("lock poisoned".into()))?;
        f(&conn)
    }

    fn run_migrations(&self) -> Result<(), DbError> {
        self.with_conn(migrations::run)
    }
}


#[async_trait]
impl Database for SqliteDatabase {
    // -- Family members --
    async fn create_family_member(
        &self,
        account_id: &str,
        input: &CreateFamilyMember,
    ) -> Result<FamilyMember, DbError> {
        let db = self.clone();
        let account_id = account_id.to_string();
        let input = input.clone();
        tokio::task::spawn_blocking(move || db.create_family_member_sync(&account_id, &input))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn get_family_member(
        &self,
        account_id: &str,
        id: &str,
    ) -> Result<FamilyMember, DbError> {
        let db = self.clone();
        let account_id = account_id.to_string();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || db.get_family_member_sync(&account_id, &id))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn list_family_members(&self, account_id: &str) -> Result<Vec<FamilyMember>, DbError> {
        let db = self.clone();
        let account_id = account_id.to_string();
        tokio::task::spawn_blocking(move || db.list_family_members_sync(&account_id))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn update_family_member(
        &self,
        account_id: &str,
        id: &str,
        update: &UpdateFamilyMember,
    ) -> Result<FamilyMember, DbError> {
        let db = self.clone();
        let account_id = account_id.to_string();
        let id = id.to_string();
        let update = update.clone();
        tokio::task::spawn_blocking(move || db.update_family_member_sync(&account_id, &id, &update))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn delete_family_member(&self, account_id: &str, id: &str) -> Result<(), DbError> {
        let db = self.clone();
        let account_id = account_id.to_string();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || db.delete_family_member_sync(&account_id, &id))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }

    // -- Appointments --
    async fn create_appointment(
        &self,
        account_id: &str,
        input: &CreateAppointment,
    ) -> Result<Appointment, DbError> {
        let db = self.clone();
        let account_id = account_id.to_string();
        let input = input.clone();
        tokio::task::spawn_blocking(move || db.create_appointment_sync(&account_id, &input))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn get_appointment(&self, account_id: &str, id: &str) -> Result<Appointment, DbError> {
        let db = self.clone();
        let account_id = account_id.to_string();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || db.get_appointment_sync(&account_id, &id))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn list_appointments(&self, account_id: &str) -> Result<Vec<Appointment>, DbError> {
        let db = self.clone();
        let account_id = account_id.to_string();
        tokio::task::spawn_blocking(move || db.list_appointments_sync(&account_id))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn update_appointment(
        &self,
        account_id: &str,
        id: &str,
        update: &UpdateAppointment,
    ) -> Result<Appointment, DbError> {
        let db = self.clone();
        let account_id = account_id.to_string();
        let id = id.to_string();
        let update = update.clone();
        tokio::task::spawn_blocking(move || db.update_appointment_sync(&account_id, &id, &update))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn delete_appointment(&self, account_id: &str, id: &str) -> Result<(), DbError> {
        let db = self.clone();
        let account_id = account_id.to_string();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || db.delete_appointment_sync(&account_id, &id))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }

    // -- Records --
    async fn create_record(
        &self,
        account_id: &str,
        input: &CreateRecord,
    ) -> Result<HealthRecord, DbError> {
        let db = self.clone();
        let account_id = account_id.to_string();
        let input = input.clone();
        tokio::task::spawn_blocking(move || db.create_record_sync(&account_id, &input))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn get_record(&self, account_id: &str, id: &str) -> Result<HealthRecord, DbError> {
        let db = self.clone();
        let account_id = account_id.to_string();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || db.get_record_sync(&account_id, &id))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn list_records(&self, account_id: &str) -> Result<Vec<HealthRecord>, DbError> {
        let db = self.clone();
        let account_id = account_id.to_string();
        tokio::task::spawn_blocking(move || db.list_records_sync(&account_id))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn update_record(
        &self,
        account_id: &str,
        id: &str,
        update: &UpdateRecord,
    ) -> Result<HealthRecord, DbError> {
        let db = self.clone();
        let account_id = account_id.to_string();
        let id = id.to_string();
        let update = update.clone();
        tokio::task::spawn_blocking(move || db.update_record_sync(&account_id, &id, &update))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn delete_record(&self, account_id: &str, id: &str) -> Result<HealthRecord, DbError> {
        let db = self.clone();
        let account_id = account_id.to_string();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || db.delete_record_sync(&account_id, &id))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }

    // -- Attachments --
    async fn replace_attachments(
        &self,
        account_id: &str,
        record_id: &str,
        files: &[NewAttachment],
        expected_version: Option<i64>,
    ) -> Result<(HealthRecord, Vec<Attachment>), DbError> {
        let db = self.clone();
        let account_id = account_id.to_string();
        let record_id = record_id.to_string();
        let files = files.to_vec();
        tokio::task::spawn_blocking(move || {
            db.replace_attachments_sync(&account_id, &record_id, &files, expected_version)
        })
        .await
        .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn remove_attachments(
        &self,
        account_id: &str,
        record_id: &str,
        remote_ids: &[String],
    ) -> Result<Vec<Attachment>, DbError> {
        let db = self.clone();
        let account_id = account_id.to_string();
        let record_id = record_id.to_string();
        let remote_ids = remote_ids.to_vec();
        tokio::task::spawn_blocking(move || {
            db.remove_attachments_sync(&account_id, &record_id, &remote_ids)
        })
        .await
        .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn list_referenced_remote_ids(&self) -> Result<HashSet<String>, DbError> {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.list_referenced_remote_ids_sync())
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }

    // -- API keys --
    async fn insert_api_key(
        &self,
        account_id: &str,
        name: &str,
        key_hash: &str,
    ) -> Result<ApiKey, DbError> {
        let db = self.clone();
        let account_id = account_id.to_string();
        let name = name.to_string();
        let key_hash = key_hash.to_string();
        tokio::task::spawn_blocking(move || db.insert_api_key_sync(&account_id, &name, &key_hash))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, DbError> {
        let db = self.clone();
        let key_hash = key_hash.to_string();
        tokio::task::spawn_blocking(move || db.find_api_key_by_hash_sync(&key_hash))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn touch_api_key(&self, id: &str) -> Result<(), DbError> {
        let db = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || db.touch_api_key_sync(&id))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn has_api_keys(&self) -> Result<bool, DbError> {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.has_api_keys_sync())
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn list_api_keys(&self) -> Result<Vec<ApiKey>, DbError> {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.list_api_keys_sync())
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn delete_api_key(&self, id: &str) -> Result<(), DbError> {
        let db = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || db.delete_api_key_sync(&id))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }

    // -- Sweep lease --
    async fn try_acquire_sweep_lease(
        &self,
        holder: &str,
        ttl: chrono::Duration,
    ) -> Result<bool, DbError> {
        let db = self.clone();
        let holder = holder.to_string();
        tokio::task::spawn_blocking(move || db.try_acquire_sweep_lease_sync(&holder, ttl))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
    async fn release_sweep_lease(&self, holder: &str) -> Result<(), DbError> {
        let db = self.clone();
        let holder = holder.to_string();
        tokio::task::spawn_blocking(move || db.release_sweep_lease_sync(&holder))
            .await
            .map_err(|e| DbError::Internal(e.to_string()))?
    }
}
