//! Client-side upload pipeline: one file with retries, then a whole
//! selection strictly one file at a time.

use std::collections::VecDeque;
use std::sync::Arc;

use heallink_core::attachment::NewAttachment;
use heallink_core::upload::{UploadPhase, UploadTask};
use heallink_core::LifecycleConfig;
use heallink_store::{AssetTransport, LocalFile, ProgressFn, UploadError};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Uploads one file through an [`AssetTransport`], retrying failed attempts
/// with exponential backoff.
#[derive(Clone)]
pub struct UploadClient {
    transport: Arc<dyn AssetTransport>,
    config: LifecycleConfig,
}

impl UploadClient {
    pub fn new(transport: Arc<dyn AssetTransport>, config: LifecycleConfig) -> Self {
        Self { transport, config }
    }

    /// Make up to `max_retries` attempts. Each attempt is bounded by the
    /// attempt timeout; an expired attempt counts as a network error.
    /// Cancelling `cancel` ends the upload with [`UploadError::Aborted`],
    /// whether an attempt or a backoff wait is in progress.
    pub async fn upload(
        &self,
        file: &LocalFile,
        progress: Option<ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<NewAttachment, UploadError> {
        let attempts = self.config.max_retries.max(1);
        let timeout = self.config.attempt_timeout();
        let mut last_error = UploadError::Aborted;

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(UploadError::Aborted);
            }
            debug!(file = %file.name, attempt, "upload attempt");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Aborted),
                outcome = tokio::time::timeout(timeout, self.transport.upload(file, progress.clone())) => outcome,
            };

            last_error = match outcome {
                Ok(Ok(attachment)) => {
                    debug!(file = %file.name, attempt, remote_id = %attachment.remote_id, "upload complete");
                    return Ok(attachment);
                }
                Ok(Err(e)) if !e.is_retryable() => return Err(e),
                Ok(Err(e)) => e,
                Err(_) => UploadError::Network(format!(
                    "Upload timed out after {}s",
                    timeout.as_secs()
                )),
            };
            warn!(
                file = %file.name,
                attempt,
                max_attempts = attempts,
                error = %last_error,
                "upload attempt failed"
            );

            if attempt < attempts {
                let delay = self.config.retry_delay(attempt);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(UploadError::Aborted),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(last_error)
    }
}

/// Per-file notification emitted while a batch runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadEvent {
    pub filename: String,
    pub progress: f64,
    pub status: UploadPhase,
    pub error: Option<String>,
}

pub type EventFn = Arc<dyn Fn(UploadEvent) + Send + Sync>;

/// A file whose upload did not succeed. Keeps the file so it can be retried.
#[derive(Debug, Clone)]
pub struct FailedUpload {
    pub file: LocalFile,
    pub error: UploadError,
    task: UploadTask,
}

impl FailedUpload {
    pub fn filename(&self) -> &str {
        &self.file.name
    }

    pub fn task(&self) -> &UploadTask {
        &self.task
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    /// Confirmed attachments, in upload order.
    pub successful: Vec<NewAttachment>,
    pub failed: Vec<FailedUpload>,
}

impl BatchResult {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_filenames(&self) -> Vec<&str> {
        self.failed.iter().map(FailedUpload::filename).collect()
    }
}

/// Runs the [`UploadClient`] over a selection of files, one at a time, in
/// selection order. A failing file never stops the files after it.
pub struct SequentialUploader {
    client: UploadClient,
    on_event: Option<EventFn>,
}

impl SequentialUploader {
    pub fn new(client: UploadClient) -> Self {
        Self {
            client,
            on_event: None,
        }
    }

    pub fn with_events(mut self, on_event: EventFn) -> Self {
        self.on_event = Some(on_event);
        self
    }

    pub async fn upload_all(&self, files: Vec<LocalFile>, cancel: &CancellationToken) -> BatchResult {
        let total = files.len();
        let mut queue: VecDeque<(LocalFile, UploadTask)> = files
            .into_iter()
            .map(|file| {
                let task = UploadTask::new(file.name.clone());
                (file, task)
            })
            .collect();

        let mut result = BatchResult::default();
        while let Some((file, task)) = queue.pop_front() {
            let outcome = if cancel.is_cancelled() {
                Err(self.abandon(file, task))
            } else {
                self.run(file, task, cancel).await
            };
            match outcome {
                Ok(attachment) => result.successful.push(attachment),
                Err(failed) => result.failed.push(failed),
            }
        }

        info!(
            total,
            successful = result.successful.len(),
            failed = result.failed.len(),
            "upload batch finished"
        );
        result
    }

    /// Re-run one previously failed file.
    pub async fn retry_one(
        &self,
        failed: FailedUpload,
        cancel: &CancellationToken,
    ) -> Result<NewAttachment, FailedUpload> {
        if cancel.is_cancelled() {
            return Err(FailedUpload {
                error: UploadError::Aborted,
                ..failed
            });
        }
        self.run(failed.file, failed.task, cancel).await
    }

    /// Re-run every failed file of `result`, sequentially. Successes are
    /// appended to `successful`; `failed` becomes whatever still fails.
    pub async fn retry_failed(
        &self,
        mut result: BatchResult,
        cancel: &CancellationToken,
    ) -> BatchResult {
        let failed = std::mem::take(&mut result.failed);
        for entry in failed {
            match self.retry_one(entry, cancel).await {
                Ok(attachment) => result.successful.push(attachment),
                Err(still_failed) => result.failed.push(still_failed),
            }
        }
        result
    }

    async fn run(
        &self,
        file: LocalFile,
        mut task: UploadTask,
        cancel: &CancellationToken,
    ) -> Result<NewAttachment, FailedUpload> {
        if let Err(e) = task.start() {
            warn!(file = %file.name, error = %e, "unexpected upload task state");
        }
        self.emit(&task);

        let progress = self.on_event.as_ref().map(|on_event| {
            let on_event = on_event.clone();
            let filename = file.name.clone();
            let progress: ProgressFn = Arc::new(move |percent: f64| {
                on_event(UploadEvent {
                    filename: filename.clone(),
                    progress: percent.clamp(0.0, 100.0),
                    status: UploadPhase::Uploading,
                    error: None,
                })
            });
            progress
        });

        match self.client.upload(&file, progress, cancel).await {
            Ok(attachment) => {
                if let Err(e) = task.complete(attachment.clone()) {
                    warn!(file = %file.name, error = %e, "unexpected upload task state");
                }
                self.emit(&task);
                Ok(attachment)
            }
            Err(error) => {
                if let Err(e) = task.fail(error.to_string()) {
                    warn!(file = %file.name, error = %e, "unexpected upload task state");
                }
                self.emit(&task);
                Err(FailedUpload { file, error, task })
            }
        }
    }

    /// Fail a file that was never attempted because the batch was aborted.
    fn abandon(&self, file: LocalFile, mut task: UploadTask) -> FailedUpload {
        let error = UploadError::Aborted;
        if let Err(e) = task.fail(error.to_string()) {
            warn!(file = %file.name, error = %e, "unexpected upload task state");
        }
        self.emit(&task);
        FailedUpload { file, error, task }
    }

    fn emit(&self, task: &UploadTask) {
        if let Some(on_event) = &self.on_event {
            on_event(UploadEvent {
                filename: task.filename.clone(),
                progress: task.progress(),
                status: task.phase(),
                error: task.error().map(String::from),
            });
        }
    }
}
