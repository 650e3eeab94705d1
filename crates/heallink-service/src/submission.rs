//! Attach newly picked files to a record: validate, upload, persist.

use std::sync::Arc;

use heallink_core::attachment::NewAttachment;
use heallink_core::record::HealthRecord;
use heallink_core::validation::{validate_files, InvalidFile};
use heallink_store::LocalFile;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::upload::{BatchResult, SequentialUploader};
use crate::{RecordService, ServiceError};

/// An in-progress attachment submission for one record.
#[derive(Debug, Clone)]
pub struct Submission {
    pub record_id: String,
    /// Attachments the record already had when the submission started.
    pub existing: Vec<NewAttachment>,
    pub expected_version: i64,
    pub uploads: BatchResult,
    /// Files rejected by size validation; never uploaded.
    pub invalid_files: Vec<InvalidFile>,
}

impl Submission {
    /// The list that would be persisted now: existing attachments followed
    /// by everything uploaded so far.
    pub fn attachment_list(&self) -> Vec<NewAttachment> {
        self.existing
            .iter()
            .chain(self.uploads.successful.iter())
            .cloned()
            .collect()
    }
}

#[derive(Debug)]
pub enum SubmitOutcome {
    /// Every valid file uploaded and the record was updated.
    Saved {
        record: HealthRecord,
        invalid_files: Vec<InvalidFile>,
    },
    /// Some uploads failed. Nothing was persisted; the caller may retry the
    /// failures or save anyway.
    Incomplete(Submission),
}

pub struct RecordSubmission {
    service: Arc<dyn RecordService>,
    uploader: SequentialUploader,
    max_file_size_mb: f64,
}

impl RecordSubmission {
    pub fn new(
        service: Arc<dyn RecordService>,
        uploader: SequentialUploader,
        max_file_size_mb: f64,
    ) -> Self {
        Self {
            service,
            uploader,
            max_file_size_mb,
        }
    }

    /// Validate and upload `files` for `record` without persisting anything.
    pub async fn prepare(
        &self,
        record: &HealthRecord,
        files: Vec<LocalFile>,
        cancel: &CancellationToken,
    ) -> Submission {
        let validated = validate_files(files, self.max_file_size_mb);
        for invalid in &validated.invalid_files {
            warn!(record_id = %record.id, file = %invalid.filename, error = %invalid.error, "file rejected");
        }
        let uploads = self.uploader.upload_all(validated.valid_files, cancel).await;
        Submission {
            record_id: record.id.clone(),
            existing: record.attachments.iter().map(|a| a.to_new()).collect(),
            expected_version: record.version,
            uploads,
            invalid_files: validated.invalid_files,
        }
    }

    /// Validate, upload and, when no upload failed, persist.
    pub async fn submit(
        &self,
        record: &HealthRecord,
        files: Vec<LocalFile>,
        cancel: &CancellationToken,
    ) -> Result<SubmitOutcome, ServiceError> {
        let submission = self.prepare(record, files, cancel).await;
        self.finish(submission).await
    }

    /// Retry the failed uploads of `submission`, then persist if they all
    /// succeeded this time.
    pub async fn retry_failed(
        &self,
        mut submission: Submission,
        cancel: &CancellationToken,
    ) -> Result<SubmitOutcome, ServiceError> {
        submission.uploads = self.uploader.retry_failed(submission.uploads, cancel).await;
        self.finish(submission).await
    }

    /// Persist the existing attachments plus whatever uploaded successfully,
    /// leaving the failed files out.
    pub async fn save_anyway(&self, submission: &Submission) -> Result<HealthRecord, ServiceError> {
        if !submission.uploads.failed.is_empty() {
            info!(
                record_id = %submission.record_id,
                skipped = submission.uploads.failed.len(),
                "saving record without failed uploads"
            );
        }
        self.persist(submission).await
    }

    async fn finish(&self, submission: Submission) -> Result<SubmitOutcome, ServiceError> {
        if !submission.uploads.all_succeeded() {
            return Ok(SubmitOutcome::Incomplete(submission));
        }
        let record = self.persist(&submission).await?;
        Ok(SubmitOutcome::Saved {
            record,
            invalid_files: submission.invalid_files,
        })
    }

    async fn persist(&self, submission: &Submission) -> Result<HealthRecord, ServiceError> {
        self.service
            .update_record_files(
                &submission.record_id,
                &submission.attachment_list(),
                Some(submission.expected_version),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::tests::FakeTransport;
    use crate::upload::UploadClient;
    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use heallink_core::attachment::Attachment;
    use heallink_core::record::{CreateRecord, RecordType, RemovalReport, UpdateRecord};
    use heallink_core::LifecycleConfig;
    use heallink_store::UploadError;
    use std::sync::Mutex;

    const MB: usize = 1024 * 1024;

    /// Records `update_record_files` calls; everything else is unused.
    #[derive(Default)]
    struct RecordingService {
        saved: Mutex<Vec<(String, Vec<NewAttachment>, Option<i64>)>>,
    }

    #[async_trait]
    impl RecordService for RecordingService {
        async fn list_records(&self) -> Result<Vec<HealthRecord>, ServiceError> {
            Ok(vec![])
        }
        async fn get_record(&self, id: &str) -> Result<HealthRecord, ServiceError> {
            Err(ServiceError::NotFound(id.into()))
        }
        async fn create_record(&self, _input: &CreateRecord) -> Result<HealthRecord, ServiceError> {
            Err(ServiceError::Internal("unused".into()))
        }
        async fn update_record(
            &self,
            id: &str,
            _update: &UpdateRecord,
        ) -> Result<HealthRecord, ServiceError> {
            Err(ServiceError::NotFound(id.into()))
        }
        async fn delete_record(&self, _id: &str) -> Result<(), ServiceError> {
            Ok(())
        }
        async fn update_record_files(
            &self,
            id: &str,
            files: &[NewAttachment],
            expected_version: Option<i64>,
        ) -> Result<HealthRecord, ServiceError> {
            self.saved
                .lock()
                .unwrap()
                .push((id.to_string(), files.to_vec(), expected_version));
            let mut record = record_with(&["old"]);
            record.attachments = files
                .iter()
                .enumerate()
                .map(|(i, f)| attachment(&format!("n{i}"), f))
                .collect();
            Ok(record)
        }
        async fn delete_files_from_record(
            &self,
            _id: &str,
            _remote_ids: &[String],
        ) -> Result<RemovalReport, ServiceError> {
            Ok(RemovalReport::default())
        }
    }

    fn attachment(id: &str, file: &NewAttachment) -> Attachment {
        Attachment {
            id: id.into(),
            record_id: "rec-1".into(),
            filename: file.filename.clone(),
            remote_url: file.remote_url.clone(),
            remote_id: file.remote_id.clone(),
            mime_type: file.mime_type.clone(),
            size_bytes: file.size_bytes,
            uploaded_at: Utc::now(),
        }
    }

    fn record_with(remote_ids: &[&str]) -> HealthRecord {
        let now = Utc::now();
        HealthRecord {
            id: "rec-1".into(),
            account_id: "acct".into(),
            member: "Ada".into(),
            title: "Knee MRI".into(),
            record_type: RecordType::Imaging,
            doctor: String::new(),
            record_date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            notes: String::new(),
            attachments: remote_ids
                .iter()
                .map(|id| {
                    attachment(
                        id,
                        &NewAttachment {
                            filename: format!("{id}.pdf"),
                            remote_url: format!("https://cdn.example/{id}"),
                            remote_id: (*id).to_string(),
                            mime_type: "application/pdf".into(),
                            size_bytes: 1,
                        },
                    )
                })
                .collect(),
            version: 7,
            created_at: now,
            updated_at: now,
        }
    }

    fn submission_for(
        transport: Arc<FakeTransport>,
    ) -> (RecordSubmission, Arc<RecordingService>) {
        let service = Arc::new(RecordingService::default());
        let uploader =
            SequentialUploader::new(UploadClient::new(transport, LifecycleConfig::default()));
        (
            RecordSubmission::new(service.clone(), uploader, 10.0),
            service,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_file_is_rejected_before_upload() {
        let transport = Arc::new(FakeTransport::default());
        let (submission, service) = submission_for(transport.clone());
        let record = record_with(&["old"]);

        let files = vec![
            LocalFile::new("report.pdf", "application/pdf", vec![0u8; 2 * MB]),
            LocalFile::new("video.mov", "video/quicktime", vec![0u8; 15 * MB]),
        ];
        let outcome = submission
            .submit(&record, files, &CancellationToken::new())
            .await
            .unwrap();

        let SubmitOutcome::Saved {
            record: saved,
            invalid_files,
        } = outcome
        else {
            panic!("expected the record to be saved");
        };
        assert_eq!(invalid_files.len(), 1);
        assert_eq!(invalid_files[0].filename, "video.mov");
        assert_eq!(invalid_files[0].formatted_size, "15.00 MB");

        // Only the valid file reached the transport
        assert_eq!(transport.calls_for("report.pdf").len(), 1);
        assert!(transport.calls_for("video.mov").is_empty());

        // One new entry on top of the pre-existing one
        assert_eq!(saved.remote_ids(), vec!["old", "heallink/records/report.pdf"]);
        let calls = service.saved.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].2, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_upload_waits_for_a_decision() {
        let network = UploadError::Network("Network error during upload: reset".into());
        let transport = Arc::new(FakeTransport::default().fail_times("b.pdf", 3, network));
        let (submission, service) = submission_for(transport);
        let record = record_with(&[]);
        let cancel = CancellationToken::new();

        let files = vec![
            LocalFile::new("a.pdf", "application/pdf", vec![1u8; 10]),
            LocalFile::new("b.pdf", "application/pdf", vec![1u8; 10]),
        ];
        let outcome = submission.submit(&record, files, &cancel).await.unwrap();
        let SubmitOutcome::Incomplete(pending) = outcome else {
            panic!("expected an incomplete submission");
        };
        assert_eq!(pending.uploads.failed_filenames(), vec!["b.pdf"]);
        assert!(service.saved.lock().unwrap().is_empty());

        // Retry succeeds on the fourth transport call and persists both files
        let outcome = submission.retry_failed(pending, &cancel).await.unwrap();
        let SubmitOutcome::Saved { record: saved, .. } = outcome else {
            panic!("expected the retry to save");
        };
        assert_eq!(saved.attachments.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn save_anyway_keeps_existing_and_successful_only() {
        let network = UploadError::Network("down".into());
        let transport = Arc::new(FakeTransport::default().fail_times("b.pdf", 3, network));
        let (submission, service) = submission_for(transport);
        let record = record_with(&["old"]);

        let files = vec![
            LocalFile::new("a.pdf", "application/pdf", vec![1u8; 10]),
            LocalFile::new("b.pdf", "application/pdf", vec![1u8; 10]),
        ];
        let pending = submission
            .prepare(&record, files, &CancellationToken::new())
            .await;
        let saved = submission.save_anyway(&pending).await.unwrap();
        assert_eq!(saved.remote_ids(), vec!["old", "heallink/records/a.pdf"]);
        assert_eq!(service.saved.lock().unwrap().len(), 1);
    }
}
