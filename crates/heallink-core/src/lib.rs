pub mod api_key;
pub mod appointment;
pub mod attachment;
pub mod config;
pub mod error;
pub mod family;
pub mod record;
pub mod sweep;
pub mod upload;
pub mod validation;

pub use attachment::{in_folder, Attachment, NewAttachment};
pub use config::LifecycleConfig;
pub use error::HeallinkError;
pub use family::{FamilyMember, Relationship};
pub use record::{HealthRecord, RecordType};
pub use sweep::SweepReport;
pub use upload::{UploadStatus, UploadTask};
