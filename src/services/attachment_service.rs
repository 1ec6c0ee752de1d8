//! Attachment ingest.
//!
//! Bytes are written to a hidden `.part` file, flushed to disk and renamed
//! into place, so a stored name is only ever visible once the whole payload
//! is durable. Any failure removes the partial file.

use super::bounded_task;
use crate::config::UploadConfig;
use crate::error::{AppError, AppResult};
use crate::models::Attachment;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Size and type limits for uploads
#[derive(Debug, Clone)]
pub struct AttachmentPolicy {
    pub max_bytes: usize,
    pub allowed_extensions: Vec<String>,
    pub allowed_mime_types: Vec<String>,
}

impl AttachmentPolicy {
    /// Validate size, extension and MIME type. Returns the normalized MIME essence.
    pub fn check(&self, file_name: &str, mime_type: &str, size: usize) -> AppResult<String> {
        if size == 0 {
            return Err(AppError::BadRequest("attachment is empty".into()));
        }
        if size > self.max_bytes {
            return Err(AppError::UnsupportedMedia(format!(
                "file is {size} bytes, limit is {}",
                self.max_bytes
            )));
        }

        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .ok_or_else(|| AppError::UnsupportedMedia("file has no extension".into()))?;
        if !self.allowed_extensions.iter().any(|e| *e == extension) {
            return Err(AppError::UnsupportedMedia(format!(
                "extension .{extension} is not allowed"
            )));
        }

        let essence = mime_type
            .parse::<mime::Mime>()
            .map(|m| m.essence_str().to_ascii_lowercase())
            .map_err(|_| AppError::UnsupportedMedia(format!("malformed MIME type {mime_type:?}")))?;
        if !self.allowed_mime_types.iter().any(|m| *m == essence) {
            return Err(AppError::UnsupportedMedia(format!(
                "MIME type {essence} is not allowed"
            )));
        }

        Ok(essence)
    }
}

/// A durably written attachment
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAttachment {
    pub url: String,
    pub stored_name: String,
    pub mime_type: String,
    pub path: PathBuf,
}

impl StoredAttachment {
    pub fn attachment(&self) -> Attachment {
        Attachment {
            url: self.url.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

/// Keep `[A-Za-z0-9._-]`, map everything else to `_`, drop leading dots
pub fn sanitize_file_name(original: &str) -> String {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.chars().take(100).collect()
    }
}

#[derive(Clone)]
pub struct AttachmentService {
    policy: AttachmentPolicy,
    dir: PathBuf,
    public_prefix: String,
    io_timeout: Duration,
}

impl AttachmentService {
    pub fn new(config: &UploadConfig, io_timeout: Duration) -> Self {
        Self {
            policy: AttachmentPolicy {
                max_bytes: config.max_bytes,
                allowed_extensions: config.allowed_extensions.clone(),
                allowed_mime_types: config.allowed_mime_types.clone(),
            },
            dir: config.dir.clone(),
            public_prefix: config.public_prefix.clone(),
            io_timeout,
        }
    }

    pub fn check(&self, file_name: &str, mime_type: &str, size: usize) -> AppResult<String> {
        self.policy.check(file_name, mime_type, size)
    }

    /// Validate and durably write an attachment
    pub async fn store(
        &self,
        bytes: &[u8],
        original_name: &str,
        mime_type: &str,
    ) -> AppResult<StoredAttachment> {
        let mime_type = self.check(original_name, mime_type, bytes.len())?;

        let short = Uuid::new_v4().simple().to_string();
        let stored_name = format!(
            "{}-{}-{}",
            Utc::now().timestamp_millis(),
            &short[..8],
            sanitize_file_name(original_name)
        );
        let path = self.dir.join(&stored_name);
        let temp = self.dir.join(format!(".{stored_name}.part"));

        let pending = bounded_task(
            self.io_timeout,
            "write attachment",
            write_then_rename(self.dir.clone(), temp.clone(), path.clone(), bytes.to_vec()),
        )
        .await;

        let written = match pending {
            Ok(result) => result,
            Err(task) => {
                // The rename may still land; clean up whatever it leaves
                let (temp, path) = (temp.clone(), path.clone());
                tokio::spawn(async move {
                    let _ = task.await;
                    let _ = tokio::fs::remove_file(&temp).await;
                    let _ = tokio::fs::remove_file(&path).await;
                });
                Err(AppError::Timeout("write attachment".into()))
            }
        };

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp).await;
            tracing::warn!(error = %e, file = %stored_name, "attachment write failed");
            return Err(e);
        }

        tracing::info!(file = %stored_name, size = bytes.len(), "attachment stored");

        Ok(StoredAttachment {
            url: format!("{}/{}", self.public_prefix, stored_name),
            stored_name,
            mime_type,
            path,
        })
    }

    /// Remove a stored file whose message never made it to storage
    pub async fn discard(&self, stored: &StoredAttachment) {
        if let Err(e) = tokio::fs::remove_file(&stored.path).await {
            tracing::warn!(error = %e, file = %stored.stored_name, "failed to discard attachment");
        }
    }
}

async fn write_then_rename(dir: PathBuf, temp: PathBuf, dest: PathBuf, bytes: Vec<u8>) -> AppResult<()> {
    tokio::fs::create_dir_all(&dir).await?;
    let mut file = tokio::fs::File::create(&temp).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&temp, &dest).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_bytes: usize) -> AttachmentPolicy {
        AttachmentPolicy {
            max_bytes,
            allowed_extensions: vec!["png".into(), "pdf".into()],
            allowed_mime_types: vec!["image/png".into(), "application/pdf".into()],
        }
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("my photo (1).png"), "my_photo__1_.png");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("..."), "file");
        assert_eq!(sanitize_file_name("C:\\docs\\cv.pdf"), "cv.pdf");
    }

    #[test]
    fn test_policy_limits() {
        let p = policy(10);
        assert_eq!(p.check("a.PNG", "image/png; charset=binary", 10).unwrap(), "image/png");
        assert!(matches!(p.check("a.png", "image/png", 11), Err(AppError::UnsupportedMedia(_))));
        assert!(matches!(p.check("a.exe", "image/png", 5), Err(AppError::UnsupportedMedia(_))));
        assert!(matches!(p.check("a.png", "text/html", 5), Err(AppError::UnsupportedMedia(_))));
        assert!(matches!(p.check("noext", "image/png", 5), Err(AppError::UnsupportedMedia(_))));
        assert!(matches!(p.check("a.png", "image/png", 0), Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_store_writes_whole_file_and_discard_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = crate::config::Config::test_defaults(dir.path()).upload;
        config.public_prefix = "/files".into();
        let service = AttachmentService::new(&config, Duration::from_secs(5));

        let stored = service
            .store(b"%PDF-1.4 hello", "report final.pdf", "application/pdf")
            .await
            .unwrap();
        assert!(stored.stored_name.ends_with("-report_final.pdf"));
        assert!(stored.url.starts_with("/files/"));
        assert_eq!(tokio::fs::read(&stored.path).await.unwrap(), b"%PDF-1.4 hello");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty());

        service.discard(&stored).await;
        assert!(!stored.path.exists());
    }
}
