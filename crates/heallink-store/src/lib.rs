mod cloudinary;
mod local;

pub use cloudinary::CloudinaryHost;
pub use local::LocalHost;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use heallink_core::validation::SizedFile;
use heallink_core::NewAttachment;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CLOUDINARY_BASE_URL: &str = "https://api.cloudinary.com/v1_1";
pub const LIST_PAGE_SIZE: usize = 500;

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("store error: {0}")]
    Internal(String),
}

/// Why one upload attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("{0}")]
    Network(String),

    /// The host answered with a non-2xx status.
    #[error("{message}")]
    HostRejected { status: u16, message: String },

    /// 2xx, but the body was not what the host promises.
    #[error("{0}")]
    MalformedResponse(String),

    #[error("Upload aborted")]
    Aborted,
}

impl UploadError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, UploadError::Aborted)
    }
}

/// Progress callback, called with a percentage in `[0, 100]`.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// A file picked on the client, fully buffered.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl LocalFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Read a file from disk, sniffing its MIME type from the content.
    pub async fn read(path: &Path) -> std::io::Result<Self> {
        let data = tokio::fs::read(path).await?;
        let mime_type = infer::get(&data)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self {
            name,
            mime_type,
            data: Bytes::from(data),
        })
    }
}

impl SizedFile for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }
}

/// An object as reported by the host's listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAsset {
    pub remote_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct AssetPage {
    pub assets: Vec<RemoteAsset>,
    pub next_cursor: Option<String>,
}

/// Sends one file to the asset host. One call is one attempt; retries are
/// the caller's business.
#[async_trait]
pub trait AssetTransport: Send + Sync {
    async fn upload(
        &self,
        file: &LocalFile,
        progress: Option<ProgressFn>,
    ) -> Result<NewAttachment, UploadError>;
}

/// Administrative access to the asset host.
#[async_trait]
pub trait AssetHost: Send + Sync {
    /// Delete an object. Deleting an id that does not exist is not an error.
    async fn destroy(&self, remote_id: &str) -> Result<(), StoreError>;

    /// Fetch one page of objects under `prefix`.
    async fn list_page(&self, prefix: &str, cursor: Option<&str>)
        -> Result<AssetPage, StoreError>;

    /// Follow continuation cursors until the host reports none remaining.
    async fn list_all(&self, prefix: &str) -> Result<Vec<RemoteAsset>, StoreError> {
        let mut assets = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.list_page(prefix, cursor.as_deref()).await?;
            assets.extend(page.assets);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(assets)
    }
}

/// Split `data` into chunks and report cumulative progress as each chunk
/// is pulled by the HTTP body.
pub(crate) fn progress_stream(
    data: Bytes,
    progress: Option<ProgressFn>,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let total = data.len();
    let chunks: Vec<Bytes> = (0..total)
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| data.slice(start..(start + UPLOAD_CHUNK_SIZE).min(total)))
        .collect();
    let mut sent = 0usize;
    futures::stream::iter(chunks.into_iter().map(move |chunk| {
        sent += chunk.len();
        if let Some(cb) = &progress {
            cb(sent as f64 / total as f64 * 100.0);
        }
        Ok(chunk)
    }))
}

// -- Configuration --

/// Configuration for the asset host backend.
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    pub cloud_name: Option<String>,
    /// Unsigned upload preset, needed to upload.
    pub upload_preset: Option<String>,
    /// Admin credentials, needed to list and delete.
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    /// API root; defaults to the public Cloudinary endpoint.
    pub base_url: Option<String>,
    /// Limit listing and deletion to one resource type ("image", "raw" or
    /// "video"). Unset covers all three.
    pub resource_type: Option<String>,
    /// Local filesystem base directory (used when Cloudinary is not configured).
    pub local_data_dir: Option<String>,
}

impl HostConfig {
    /// Build from environment variables.
    /// If `HEALLINK_CLOUDINARY_CLOUD_NAME` is set, use Cloudinary.
    /// Otherwise, fall back to the local filesystem.
    pub fn from_env() -> Self {
        Self {
            cloud_name: non_empty_env("HEALLINK_CLOUDINARY_CLOUD_NAME"),
            upload_preset: non_empty_env("HEALLINK_CLOUDINARY_UPLOAD_PRESET"),
            api_key: non_empty_env("HEALLINK_CLOUDINARY_API_KEY"),
            api_secret: non_empty_env("HEALLINK_CLOUDINARY_API_SECRET"),
            base_url: non_empty_env("HEALLINK_CLOUDINARY_BASE_URL"),
            resource_type: non_empty_env("HEALLINK_CLOUDINARY_RESOURCE_TYPE"),
            local_data_dir: non_empty_env("HEALLINK_ASSET_DIR"),
        }
    }

    pub fn is_cloudinary(&self) -> bool {
        self.cloud_name.is_some()
    }

    pub fn can_upload(&self) -> bool {
        self.is_cloudinary() && self.upload_preset.is_some()
    }

    pub fn can_administer(&self) -> bool {
        self.is_cloudinary() && self.api_key.is_some() && self.api_secret.is_some()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

// -- Factory --

/// Create the upload side of the host for objects under `folder`.
pub fn create_transport(
    config: &HostConfig,
    folder: &str,
) -> Result<Arc<dyn AssetTransport>, StoreError> {
    if config.is_cloudinary() {
        if !config.can_upload() {
            return Err(StoreError::NotConfigured(
                "HEALLINK_CLOUDINARY_UPLOAD_PRESET is required to upload".into(),
            ));
        }
        Ok(Arc::new(CloudinaryHost::new(config, folder)?))
    } else {
        Ok(Arc::new(LocalHost::new(config, folder)))
    }
}

/// Create the administrative side of the host for objects under `folder`.
pub fn create_host(config: &HostConfig, folder: &str) -> Result<Arc<dyn AssetHost>, StoreError> {
    if config.is_cloudinary() {
        if !config.can_administer() {
            return Err(StoreError::NotConfigured(
                "HEALLINK_CLOUDINARY_API_KEY and HEALLINK_CLOUDINARY_API_SECRET are required"
                    .into(),
            ));
        }
        Ok(Arc::new(CloudinaryHost::new(config, folder)?))
    } else {
        Ok(Arc::new(LocalHost::new(config, folder)))
    }
}
