use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heallink_core::NewAttachment;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::{
    progress_stream, AssetHost, AssetPage, AssetTransport, HostConfig, LocalFile, ProgressFn,
    RemoteAsset, StoreError, UploadError, DEFAULT_CLOUDINARY_BASE_URL, LIST_PAGE_SIZE,
};

/// Resource types `auto` uploads can land in. The admin API lists and
/// deletes one type at a time.
const RESOURCE_TYPES: &[&str] = &["image", "raw", "video"];

/// Cloudinary-compatible asset host speaking the upload and admin HTTP APIs.
pub struct CloudinaryHost {
    client: Client,
    base_url: String,
    cloud_name: String,
    upload_preset: Option<String>,
    credentials: Option<(String, String)>,
    resource_types: Vec<String>,
    folder: String,
}

impl std::fmt::Debug for CloudinaryHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudinaryHost")
            .field("cloud_name", &self.cloud_name)
            .field("folder", &self.folder)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    public_id: Option<String>,
    original_filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResourcesResponse {
    #[serde(default)]
    resources: Vec<ResourceItem>,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    #[serde(default)]
    deleted: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ResourceItem {
    public_id: String,
    created_at: DateTime<Utc>,
}

impl CloudinaryHost {
    pub fn new(config: &HostConfig, folder: &str) -> Result<Self, StoreError> {
        let cloud_name = config
            .cloud_name
            .clone()
            .ok_or_else(|| StoreError::NotConfigured("cloud name required".into()))?;
        let credentials = match (&config.api_key, &config.api_secret) {
            (Some(key), Some(secret)) => Some((key.clone(), secret.clone())),
            _ => None,
        };
        Ok(Self {
            client: Client::new(),
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_CLOUDINARY_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            cloud_name,
            upload_preset: config.upload_preset.clone(),
            credentials,
            resource_types: match &config.resource_type {
                Some(t) => vec![t.clone()],
                None => RESOURCE_TYPES.iter().map(|t| t.to_string()).collect(),
            },
            folder: folder.to_string(),
        })
    }

    fn upload_url(&self) -> String {
        format!("{}/{}/auto/upload", self.base_url, self.cloud_name)
    }

    fn resources_url(&self, resource_type: &str) -> String {
        format!(
            "{}/{}/resources/{resource_type}/upload",
            self.base_url, self.cloud_name
        )
    }

    fn with_admin_auth(&self, builder: RequestBuilder) -> Result<RequestBuilder, StoreError> {
        let (key, secret) = self
            .credentials
            .as_ref()
            .ok_or_else(|| StoreError::NotConfigured("admin credentials required".into()))?;
        Ok(builder.basic_auth(key, Some(secret)))
    }

    /// `Ok(true)` when the host deleted the object as `resource_type`,
    /// `Ok(false)` when it holds no object of that type under the id.
    async fn destroy_as(&self, resource_type: &str, remote_id: &str) -> Result<bool, StoreError> {
        let builder = self
            .client
            .delete(self.resources_url(resource_type))
            .query(&[("public_ids[]", remote_id)]);
        let resp = self
            .with_admin_auth(builder)?
            .send()
            .await
            .map_err(|e| StoreError::Internal(format!("destroy {remote_id}: {e}")))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let body = resp
            .text()
            .await
            .map_err(|e| StoreError::Internal(format!("destroy {remote_id}: read body: {e}")))?;
        if !status.is_success() {
            return Err(StoreError::Internal(format!(
                "destroy {remote_id}: status {}: {}",
                status.as_u16(),
                error_message(&body).unwrap_or(body)
            )));
        }
        let parsed: DeleteResponse = serde_json::from_str(&body)
            .map_err(|e| StoreError::Internal(format!("destroy {remote_id}: parse: {e}")))?;
        match parsed.deleted.get(remote_id).map(String::as_str) {
            Some("deleted") => Ok(true),
            Some("not_found") | None => Ok(false),
            Some(other) => Err(StoreError::Internal(format!(
                "destroy {remote_id}: host answered {other}"
            ))),
        }
    }

    /// Split a listing cursor into the resource type index and the host's
    /// own cursor for that type.
    fn parse_cursor(&self, cursor: Option<&str>) -> Result<(usize, Option<String>), StoreError> {
        let Some(cursor) = cursor else {
            return Ok((0, None));
        };
        let invalid = || StoreError::Internal(format!("invalid cursor: {cursor}"));
        let (index, inner) = cursor.split_once(':').ok_or_else(invalid)?;
        let index: usize = index.parse().map_err(|_| invalid())?;
        if index >= self.resource_types.len() {
            return Err(invalid());
        }
        Ok((index, Some(inner.to_string()).filter(|c| !c.is_empty())))
    }
}

/// Pull `error.message` out of a host error body, if there is one.
fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|r| r.error)
        .and_then(|e| e.message)
}

fn parse_upload_response(body: &str, file: &LocalFile) -> Result<NewAttachment, UploadError> {
    let malformed = || UploadError::MalformedResponse("Failed to parse upload response".into());
    let response: UploadResponse = serde_json::from_str(body).map_err(|_| malformed())?;
    let (remote_url, remote_id) = match (response.secure_url, response.public_id) {
        (Some(url), Some(id)) if !url.is_empty() && !id.is_empty() => (url, id),
        _ => return Err(malformed()),
    };
    Ok(NewAttachment {
        filename: response
            .original_filename
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| file.name.clone()),
        remote_url,
        remote_id,
        mime_type: file.mime_type.clone(),
        size_bytes: file.data.len() as i64,
    })
}

#[async_trait]
impl AssetTransport for CloudinaryHost {
    async fn upload(
        &self,
        file: &LocalFile,
        progress: Option<ProgressFn>,
    ) -> Result<NewAttachment, UploadError> {
        let preset = self.upload_preset.clone().ok_or_else(|| UploadError::HostRejected {
            status: StatusCode::BAD_REQUEST.as_u16(),
            message: "upload preset not configured".into(),
        })?;

        let total = file.data.len() as u64;
        let body = Body::wrap_stream(progress_stream(file.data.clone(), progress));
        let part = Part::stream_with_length(body, total)
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)
            .map_err(|e| UploadError::Network(format!("invalid content type: {e}")))?;
        let form = Form::new()
            .part("file", part)
            .text("upload_preset", preset)
            .text("folder", self.folder.clone());

        let resp = self
            .client
            .post(self.upload_url())
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Network(format!("Network error during upload: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| UploadError::Network(format!("Network error during upload: {e}")))?;

        if status.is_success() {
            parse_upload_response(&body, file)
        } else {
            let message = match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(parsed) => parsed
                    .error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "Upload failed".into()),
                Err(_) => format!("Upload failed with status {}", status.as_u16()),
            };
            Err(UploadError::HostRejected {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl AssetHost for CloudinaryHost {
    /// Tries each resource type in turn. An id absent under every type is
    /// already gone.
    async fn destroy(&self, remote_id: &str) -> Result<(), StoreError> {
        for resource_type in &self.resource_types {
            if self.destroy_as(resource_type, remote_id).await? {
                debug!(remote_id, resource_type = %resource_type, "destroyed remote asset");
                return Ok(());
            }
        }
        debug!(remote_id, "remote asset already absent");
        Ok(())
    }

    /// Pages through every resource type in order; the cursor carries the
    /// type index alongside the host's cursor.
    async fn list_page(
        &self,
        prefix: &str,
        cursor: Option<&str>,
    ) -> Result<AssetPage, StoreError> {
        let (index, inner) = self.parse_cursor(cursor)?;
        let resource_type = &self.resource_types[index];
        let mut query = vec![
            ("prefix", prefix.to_string()),
            ("max_results", LIST_PAGE_SIZE.to_string()),
        ];
        if let Some(inner) = inner {
            query.push(("next_cursor", inner));
        }
        let builder = self
            .client
            .get(self.resources_url(resource_type))
            .query(&query);
        let resp = self
            .with_admin_auth(builder)?
            .send()
            .await
            .map_err(|e| StoreError::Internal(format!("list {prefix}: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| StoreError::Internal(format!("list {prefix}: read body: {e}")))?;
        if !status.is_success() {
            return Err(StoreError::Internal(format!(
                "list {prefix}: status {}: {}",
                status.as_u16(),
                error_message(&body).unwrap_or(body)
            )));
        }
        let parsed: ResourcesResponse = serde_json::from_str(&body)
            .map_err(|e| StoreError::Internal(format!("list {prefix}: parse: {e}")))?;
        let next_cursor = match parsed.next_cursor.filter(|c| !c.is_empty()) {
            Some(c) => Some(format!("{index}:{c}")),
            None if index + 1 < self.resource_types.len() => Some(format!("{}:", index + 1)),
            None => None,
        };
        Ok(AssetPage {
            assets: parsed
                .resources
                .into_iter()
                .map(|r| RemoteAsset {
                    remote_id: r.public_id,
                    created_at: r.created_at,
                })
                .collect(),
            next_cursor,
        })
    }
}
