//! Keeps remote objects in step with attachment rows. Rows change first;
//! remote deletion follows and never rolls the rows back.

use std::sync::Arc;

use futures::future::join_all;
use heallink_core::attachment::{in_folder, NewAttachment};
use heallink_core::record::{HealthRecord, RemovalReport};
use heallink_db::{Database, DbError};
use heallink_store::AssetHost;
use tracing::{info, warn};

/// Delete every id concurrently and wait for all of them. Failures are
/// logged and counted, never returned.
pub async fn destroy_all(host: &dyn AssetHost, remote_ids: &[String]) -> RemovalReport {
    let results = join_all(
        remote_ids
            .iter()
            .map(|id| async move { (id, host.destroy(id).await) }),
    )
    .await;

    let mut report = RemovalReport::default();
    for (id, result) in results {
        match result {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                warn!(remote_id = %id, error = %e, "failed to delete remote object");
                report.failed += 1;
            }
        }
    }
    report
}

#[derive(Clone)]
pub struct AttachmentLifecycle {
    db: Arc<dyn Database>,
    host: Arc<dyn AssetHost>,
    folder: String,
}

impl AttachmentLifecycle {
    /// Only objects under `folder` are ever deleted at the host.
    pub fn new(db: Arc<dyn Database>, host: Arc<dyn AssetHost>, folder: &str) -> Self {
        Self {
            db,
            host,
            folder: folder.to_string(),
        }
    }

    /// Delete the objects inside the folder. Ids outside it are left alone
    /// and counted as failed.
    async fn release(&self, remote_ids: Vec<String>) -> RemovalReport {
        let (owned, foreign): (Vec<String>, Vec<String>) = remote_ids
            .into_iter()
            .partition(|id| in_folder(&self.folder, id));
        for id in &foreign {
            warn!(
                remote_id = %id,
                folder = %self.folder,
                "refusing to delete object outside the asset folder"
            );
        }
        let mut report = destroy_all(&*self.host, &owned).await;
        report.failed += foreign.len();
        report
    }

    /// Overwrite the attachment list, then release the remote objects the
    /// new list no longer references.
    pub async fn replace(
        &self,
        account_id: &str,
        record_id: &str,
        files: &[NewAttachment],
        expected_version: Option<i64>,
    ) -> Result<HealthRecord, DbError> {
        let (record, dropped) = self
            .db
            .replace_attachments(account_id, record_id, files, expected_version)
            .await?;
        if !dropped.is_empty() {
            let report = self
                .release(dropped.into_iter().map(|a| a.remote_id).collect())
                .await;
            info!(
                record_id,
                deleted = report.deleted,
                failed = report.failed,
                "released replaced attachments"
            );
        }
        Ok(record)
    }

    /// Remove the listed attachments from the record and delete their
    /// remote objects. Ids the record does not hold are ignored.
    pub async fn remove(
        &self,
        account_id: &str,
        record_id: &str,
        remote_ids: &[String],
    ) -> Result<RemovalReport, DbError> {
        let removed = self
            .db
            .remove_attachments(account_id, record_id, remote_ids)
            .await?;
        let report = self
            .release(removed.into_iter().map(|a| a.remote_id).collect())
            .await;
        info!(
            record_id,
            requested = remote_ids.len(),
            deleted = report.deleted,
            failed = report.failed,
            "removed attachments"
        );
        Ok(report)
    }

    /// Delete a record and, after its rows are gone, every remote object it
    /// referenced.
    pub async fn delete_record(
        &self,
        account_id: &str,
        record_id: &str,
    ) -> Result<RemovalReport, DbError> {
        let record = self.db.delete_record(account_id, record_id).await?;
        let report = self.release(record.remote_ids()).await;
        info!(
            record_id,
            deleted = report.deleted,
            failed = report.failed,
            "deleted record"
        );
        Ok(report)
    }
}
