use async_trait::async_trait;
use heallink_core::attachment::NewAttachment;
use heallink_core::record::{CreateRecord, HealthRecord, RemovalReport, UpdateRecord};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Abstraction over the health record API.
///
/// The submission flow programs against this trait; `HttpService` talks to
/// a running heallink-server.
#[async_trait]
pub trait RecordService: Send + Sync {
    async fn list_records(&self) -> Result<Vec<HealthRecord>, ServiceError>;
    async fn get_record(&self, id: &str) -> Result<HealthRecord, ServiceError>;
    async fn create_record(&self, input: &CreateRecord) -> Result<HealthRecord, ServiceError>;
    async fn update_record(
        &self,
        id: &str,
        update: &UpdateRecord,
    ) -> Result<HealthRecord, ServiceError>;
    async fn delete_record(&self, id: &str) -> Result<(), ServiceError>;

    // -- Attachments --
    /// Overwrite the record's attachment list.
    async fn update_record_files(
        &self,
        id: &str,
        files: &[NewAttachment],
        expected_version: Option<i64>,
    ) -> Result<HealthRecord, ServiceError>;
    /// Remove the listed attachments and delete their remote objects.
    async fn delete_files_from_record(
        &self,
        id: &str,
        remote_ids: &[String],
    ) -> Result<RemovalReport, ServiceError>;
}
