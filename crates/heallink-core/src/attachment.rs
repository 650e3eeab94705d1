use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for a file that the asset host has confirmed it stores.
///
/// Only produced from a successful upload; there is no placeholder form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAttachment {
    pub filename: String,
    pub remote_url: String,
    pub remote_id: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

/// An attachment persisted against a health record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub record_id: String,
    pub filename: String,
    pub remote_url: String,
    pub remote_id: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub uploaded_at: DateTime<Utc>,
}

impl Attachment {
    /// Drop the persistence fields, e.g. to resubmit an existing file list.
    pub fn to_new(&self) -> NewAttachment {
        NewAttachment {
            filename: self.filename.clone(),
            remote_url: self.remote_url.clone(),
            remote_id: self.remote_id.clone(),
            mime_type: self.mime_type.clone(),
            size_bytes: self.size_bytes,
        }
    }
}

/// Whether `remote_id` names an object inside `folder`. The match is on
/// whole path segments, so `heallink/records-old/x` is outside
/// `heallink/records`.
pub fn in_folder(folder: &str, remote_id: &str) -> bool {
    let folder = folder.trim_matches('/');
    remote_id
        .strip_prefix(folder)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|rest| {
            !rest.is_empty() && rest.split('/').all(|seg| !matches!(seg, "" | "." | ".."))
        })
}
