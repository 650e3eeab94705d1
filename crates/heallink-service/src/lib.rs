mod http;
mod traits;
pub mod submission;
pub mod upload;

pub use http::HttpService;
pub use submission::{RecordSubmission, Submission, SubmitOutcome};
pub use traits::{RecordService, ServiceError};
pub use upload::{BatchResult, FailedUpload, SequentialUploader, UploadClient, UploadEvent};
