use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attachment::NewAttachment;
use crate::HeallinkError;

/// The coarse phase of an upload, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPhase {
    Queued,
    Uploading,
    Complete,
    Failed,
}

impl UploadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadPhase::Queued => "queued",
            UploadPhase::Uploading => "uploading",
            UploadPhase::Complete => "complete",
            UploadPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadStatus {
    Queued,
    Uploading { progress: f64 },
    Complete { attachment: NewAttachment },
    Failed { error: String },
}

impl UploadStatus {
    pub fn phase(&self) -> UploadPhase {
        match self {
            UploadStatus::Queued => UploadPhase::Queued,
            UploadStatus::Uploading { .. } => UploadPhase::Uploading,
            UploadStatus::Complete { .. } => UploadPhase::Complete,
            UploadStatus::Failed { .. } => UploadPhase::Failed,
        }
    }
}

/// Client-side state of one file in a submission. Never persisted.
///
/// Transitions: `Queued -> Uploading -> Complete | Failed`, and
/// `Failed -> Uploading` when the file is retried. A queued file may also
/// fail directly when its batch is aborted before it starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTask {
    pub filename: String,
    status: UploadStatus,
    retries: u32,
}

impl UploadTask {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            status: UploadStatus::Queued,
            retries: 0,
        }
    }

    pub fn status(&self) -> &UploadStatus {
        &self.status
    }

    pub fn phase(&self) -> UploadPhase {
        self.status.phase()
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn progress(&self) -> f64 {
        match &self.status {
            UploadStatus::Queued | UploadStatus::Failed { .. } => 0.0,
            UploadStatus::Uploading { progress } => *progress,
            UploadStatus::Complete { .. } => 100.0,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            UploadStatus::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn start(&mut self) -> Result<(), HeallinkError> {
        match self.status {
            UploadStatus::Queued => {}
            UploadStatus::Failed { .. } => self.retries += 1,
            _ => return Err(self.invalid(UploadPhase::Uploading)),
        }
        self.status = UploadStatus::Uploading { progress: 0.0 };
        Ok(())
    }

    pub fn set_progress(&mut self, percent: f64) -> Result<(), HeallinkError> {
        match &mut self.status {
            UploadStatus::Uploading { progress } => {
                *progress = percent.clamp(0.0, 100.0);
                Ok(())
            }
            _ => Err(self.invalid(UploadPhase::Uploading)),
        }
    }

    pub fn complete(&mut self, attachment: NewAttachment) -> Result<(), HeallinkError> {
        match self.status {
            UploadStatus::Uploading { .. } => {
                self.status = UploadStatus::Complete { attachment };
                Ok(())
            }
            _ => Err(self.invalid(UploadPhase::Complete)),
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), HeallinkError> {
        match self.status {
            UploadStatus::Queued | UploadStatus::Uploading { .. } => {
                self.status = UploadStatus::Failed {
                    error: error.into(),
                };
                Ok(())
            }
            _ => Err(self.invalid(UploadPhase::Failed)),
        }
    }

    fn invalid(&self, to: UploadPhase) -> HeallinkError {
        HeallinkError::InvalidTransition {
            from: self.phase().as_str(),
            to: to.as_str(),
        }
    }
}
