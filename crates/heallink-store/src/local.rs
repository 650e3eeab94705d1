use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use heallink_core::NewAttachment;
use tokio::io::AsyncWriteExt;

use crate::{
    progress_stream, AssetHost, AssetPage, AssetTransport, HostConfig, LocalFile, ProgressFn,
    RemoteAsset, StoreError, UploadError, LIST_PAGE_SIZE,
};

/// Asset host backed by a local directory, for development and tests.
pub struct LocalHost {
    base_dir: PathBuf,
    folder: String,
    page_size: usize,
}

impl LocalHost {
    pub fn new(config: &HostConfig, folder: &str) -> Self {
        let base_dir = config
            .local_data_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        Self {
            base_dir,
            folder: folder.trim_matches('/').to_string(),
            page_size: LIST_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }

    async fn collect_assets(&self, prefix: &str) -> Result<Vec<RemoteAsset>, StoreError> {
        let dir = self.resolve(prefix);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut assets = Vec::new();
        let mut stack = vec![dir];
        while let Some(current) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(StoreError::Internal(format!(
                        "list {}: {e}",
                        current.display()
                    )))
                }
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::Internal(format!("read_dir entry: {e}")))?
            {
                let path = entry.path();
                let metadata = entry
                    .metadata()
                    .await
                    .map_err(|e| StoreError::Internal(format!("metadata: {e}")))?;
                if metadata.is_dir() {
                    stack.push(path);
                    continue;
                }
                let created_at: DateTime<Utc> = metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                if let Ok(rel) = path.strip_prefix(&self.base_dir) {
                    assets.push(RemoteAsset {
                        remote_id: rel.to_string_lossy().replace('\\', "/"),
                        created_at,
                    });
                }
            }
        }
        assets.sort_by(|a, b| a.remote_id.cmp(&b.remote_id));
        Ok(assets)
    }
}

/// Mirror the server's default data directory without depending on the db crate.
fn default_data_dir() -> PathBuf {
    let base = if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg)
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".local/share")
    } else {
        PathBuf::from(".")
    };
    base.join("heallink").join("assets")
}

/// Keep only the final path component so a name cannot escape the folder.
fn safe_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty() && n != "..")
        .unwrap_or_else(|| "file".to_string())
}

#[async_trait]
impl AssetTransport for LocalHost {
    async fn upload(
        &self,
        file: &LocalFile,
        progress: Option<ProgressFn>,
    ) -> Result<NewAttachment, UploadError> {
        let remote_id = format!(
            "{}/{}-{}",
            self.folder,
            uuid::Uuid::new_v4(),
            safe_file_name(&file.name)
        );
        let path = self.resolve(&remote_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| UploadError::Network(format!("mkdir: {e}")))?;
        }
        let mut out = tokio::fs::File::create(&path)
            .await
            .map_err(|e| UploadError::Network(format!("create {}: {e}", path.display())))?;
        let mut chunks = Box::pin(progress_stream(file.data.clone(), progress));
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| UploadError::Network(e.to_string()))?;
            out.write_all(&chunk)
                .await
                .map_err(|e| UploadError::Network(format!("write {}: {e}", path.display())))?;
        }
        out.flush()
            .await
            .map_err(|e| UploadError::Network(format!("flush {}: {e}", path.display())))?;

        Ok(NewAttachment {
            filename: file.name.clone(),
            remote_url: format!("file://{}", path.display()),
            remote_id,
            mime_type: file.mime_type.clone(),
            size_bytes: file.data.len() as i64,
        })
    }
}

#[async_trait]
impl AssetHost for LocalHost {
    async fn destroy(&self, remote_id: &str) -> Result<(), StoreError> {
        let escapes = Path::new(remote_id)
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)));
        if escapes {
            return Err(StoreError::Internal(format!("invalid remote id: {remote_id}")));
        }
        let path = self.resolve(remote_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Internal(format!(
                "delete {}: {e}",
                path.display()
            ))),
        }
    }

    async fn list_page(
        &self,
        prefix: &str,
        cursor: Option<&str>,
    ) -> Result<AssetPage, StoreError> {
        let start = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| StoreError::Internal(format!("invalid cursor: {c}")))?,
            None => 0,
        };
        let all = self.collect_assets(prefix).await?;
        let end = (start + self.page_size).min(all.len());
        let assets = all.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_cursor = (end < all.len()).then(|| end.to_string());
        Ok(AssetPage {
            assets,
            next_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn test_host(dir: &Path) -> LocalHost {
        let config = HostConfig {
            local_data_dir: Some(dir.to_string_lossy().to_string()),
            ..Default::default()
        };
        LocalHost::new(&config, "heallink/records")
    }

    #[tokio::test]
    async fn upload_writes_under_folder() {
        let tmp = tempfile::tempdir().unwrap();
        let host = test_host(tmp.path());

        let file = LocalFile::new("x-ray.png", "image/png", vec![9u8; 1000]);
        let attachment = host.upload(&file, None).await.unwrap();
        assert!(attachment.remote_id.starts_with("heallink/records/"));
        assert!(attachment.remote_id.ends_with("-x-ray.png"));
        assert_eq!(attachment.size_bytes, 1000);

        let stored = tokio::fs::read(tmp.path().join(&attachment.remote_id))
            .await
            .unwrap();
        assert_eq!(stored.len(), 1000);
    }

    #[tokio::test]
    async fn upload_reports_progress_to_completion() {
        let tmp = tempfile::tempdir().unwrap();
        let host = test_host(tmp.path());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: ProgressFn = Arc::new(move |p: f64| sink.lock().unwrap().push(p));

        let file = LocalFile::new("big.bin", "application/octet-stream", vec![0u8; 300_000]);
        host.upload(&file, Some(progress)).await.unwrap();
        assert_eq!(*seen.lock().unwrap().last().unwrap(), 100.0);
    }

    #[tokio::test]
    async fn upload_strips_path_components_from_name() {
        let tmp = tempfile::tempdir().unwrap();
        let host = test_host(tmp.path());
        let file = LocalFile::new("../../etc/passwd", "text/plain", "x");
        let attachment = host.upload(&file, None).await.unwrap();
        assert!(attachment.remote_id.starts_with("heallink/records/"));
        assert!(attachment.remote_id.ends_with("-passwd"));
    }

    #[tokio::test]
    async fn destroy_removes_and_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let host = test_host(tmp.path());
        let file = LocalFile::new("a.txt", "text/plain", "hello");
        let attachment = host.upload(&file, None).await.unwrap();

        host.destroy(&attachment.remote_id).await.unwrap();
        assert!(!tmp.path().join(&attachment.remote_id).exists());
        host.destroy(&attachment.remote_id).await.unwrap();
    }

    #[tokio::test]
    async fn destroy_refuses_ids_outside_base_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let host = test_host(tmp.path());
        assert!(host.destroy("../outside.txt").await.is_err());
        assert!(host.destroy("/etc/hosts").await.is_err());
    }

    #[tokio::test]
    async fn list_pages_through_cursor() {
        let tmp = tempfile::tempdir().unwrap();
        let host = test_host(tmp.path()).with_page_size(2);
        for i in 0..5 {
            let file = LocalFile::new(format!("f{i}.txt"), "text/plain", "x");
            host.upload(&file, None).await.unwrap();
        }

        let first = host.list_page("heallink/records", None).await.unwrap();
        assert_eq!(first.assets.len(), 2);
        assert_eq!(first.next_cursor.as_deref(), Some("2"));

        let all = host.list_all("heallink/records").await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn list_missing_prefix_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let host = test_host(tmp.path());
        let page = host.list_page("nothing/here", None).await.unwrap();
        assert!(page.assets.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn list_rejects_bad_cursor() {
        let tmp = tempfile::tempdir().unwrap();
        let host = test_host(tmp.path());
        assert!(host
            .list_page("heallink/records", Some("nope"))
            .await
            .is_err());
    }
}
