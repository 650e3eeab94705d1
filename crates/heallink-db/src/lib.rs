pub(crate) mod migrations;
pub mod sqlite;

pub use sqlite::SqliteDatabase;

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use heallink_core::api_key::ApiKey;
use heallink_core::appointment::{Appointment, CreateAppointment, UpdateAppointment};
use heallink_core::attachment::{Attachment, NewAttachment};
use heallink_core::family::{CreateFamilyMember, FamilyMember, UpdateFamilyMember};
use heallink_core::record::{CreateRecord, HealthRecord, UpdateRecord};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// The input refers to something the account does not have.
    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where the SQLite file lives.
#[derive(Debug, Clone, Default)]
pub struct DbConfig {
    pub sqlite_path: Option<String>,
}

impl DbConfig {
    pub fn from_env() -> Self {
        Self {
            sqlite_path: std::env::var("HEALLINK_DB_PATH")
                .ok()
                .filter(|p| !p.is_empty()),
        }
    }
}

/// Default data directory: `$XDG_DATA_HOME/heallink` or `~/.local/share/heallink`.
pub fn data_dir() -> PathBuf {
    let base = if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg)
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".local/share")
    } else {
        PathBuf::from(".")
    };
    base.join("heallink")
}

/// Record and attachment persistence. Every record operation is scoped to
/// the owning account; a record of another account reads as not found.
#[async_trait]
pub trait Database: Send + Sync {
    // -- Family members --
    async fn create_family_member(
        &self,
        account_id: &str,
        input: &CreateFamilyMember,
    ) -> Result<FamilyMember, DbError>;
    async fn get_family_member(&self, account_id: &str, id: &str)
        -> Result<FamilyMember, DbError>;
    /// Oldest first.
    async fn list_family_members(&self, account_id: &str) -> Result<Vec<FamilyMember>, DbError>;
    async fn update_family_member(
        &self,
        account_id: &str,
        id: &str,
        update: &UpdateFamilyMember,
    ) -> Result<FamilyMember, DbError>;
    /// Refused with `Conflict` while records or appointments point at the member.
    async fn delete_family_member(&self, account_id: &str, id: &str) -> Result<(), DbError>;

    // -- Appointments --
    async fn create_appointment(
        &self,
        account_id: &str,
        input: &CreateAppointment,
    ) -> Result<Appointment, DbError>;
    async fn get_appointment(&self, account_id: &str, id: &str) -> Result<Appointment, DbError>;
    /// Soonest first.
    async fn list_appointments(&self, account_id: &str) -> Result<Vec<Appointment>, DbError>;
    async fn update_appointment(
        &self,
        account_id: &str,
        id: &str,
        update: &UpdateAppointment,
    ) -> Result<Appointment, DbError>;
    async fn delete_appointment(&self, account_id: &str, id: &str) -> Result<(), DbError>;

    // -- Records --
    /// `input.member` must name a family member of the account, or the
    /// call fails with `Invalid`.
    async fn create_record(
        &self,
        account_id: &str,
        input: &CreateRecord,
    ) -> Result<HealthRecord, DbError>;
    async fn get_record(&self, account_id: &str, id: &str) -> Result<HealthRecord, DbError>;
    /// Newest record date first.
    async fn list_records(&self, account_id: &str) -> Result<Vec<HealthRecord>, DbError>;
    async fn update_record(
        &self,
        account_id: &str,
        id: &str,
        update: &UpdateRecord,
    ) -> Result<HealthRecord, DbError>;
    /// Delete the record and its attachment rows, returning what was deleted
    /// so the caller can release the remote objects.
    async fn delete_record(&self, account_id: &str, id: &str) -> Result<HealthRecord, DbError>;

    // -- Attachments --
    /// Overwrite the attachment list in one transaction. Returns the updated
    /// record and the attachments that are no longer referenced by it.
    async fn replace_attachments(
        &self,
        account_id: &str,
        record_id: &str,
        files: &[NewAttachment],
        expected_version: Option<i64>,
    ) -> Result<(HealthRecord, Vec<Attachment>), DbError>;
    /// Remove the attachments whose remote id is listed; returns the rows
    /// that were actually removed.
    async fn remove_attachments(
        &self,
        account_id: &str,
        record_id: &str,
        remote_ids: &[String],
    ) -> Result<Vec<Attachment>, DbError>;
    /// Every remote id referenced by any record of any account.
    async fn list_referenced_remote_ids(&self) -> Result<HashSet<String>, DbError>;

    // -- API keys --
    async fn insert_api_key(
        &self,
        account_id: &str,
        name: &str,
        key_hash: &str,
    ) -> Result<ApiKey, DbError>;
    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, DbError>;
    async fn touch_api_key(&self, id: &str) -> Result<(), DbError>;
    async fn has_api_keys(&self) -> Result<bool, DbError>;
    async fn list_api_keys(&self) -> Result<Vec<ApiKey>, DbError>;
    async fn delete_api_key(&self, id: &str) -> Result<(), DbError>;

    // -- Sweep lease --
    /// Take the sweep lease for `holder` unless another holder has an
    /// unexpired one. Returns whether the lease is now held.
    async fn try_acquire_sweep_lease(
        &self,
        holder: &str,
        ttl: chrono::Duration,
    ) -> Result<bool, DbError>;
    async fn release_sweep_lease(&self, holder: &str) -> Result<(), DbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_config_from_env() {
        use std::sync::Mutex;
        static ENV_LOCK: Mutex<()> = Mutex::new(());
        let _guard = ENV_LOCK.lock().unwrap();

        std::env::remove_var("HEALLINK_DB_PATH");
        assert!(DbConfig::from_env().sqlite_path.is_none());

        std::env::set_var("HEALLINK_DB_PATH", "/tmp/heallink-test.db");
        assert_eq!(
            DbConfig::from_env().sqlite_path.as_deref(),
            Some("/tmp/heallink-test.db")
        );

        std::env::set_var("HEALLINK_DB_PATH", "");
        assert!(DbConfig::from_env().sqlite_path.is_none());
        std::env::remove_var("HEALLINK_DB_PATH");
    }

    #[test]
    fn data_dir_ends_with_heallink() {
        assert!(data_dir().ends_with("heallink"));
    }
}
