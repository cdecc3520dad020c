//! Image storage for tree and care-log photos.
//!
//! Objects are keyed `trees/<treeId>/<ms>_<name>` and
//! `care-logs/<logId>/<ms>_<name>`; the returned URL is the public base URL
//! joined with the key.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::config::ImageConfig;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("'{0}' is not an image")]
    NotAnImage(String),

    #[error("URL '{0}' does not belong to this image store")]
    ForeignUrl(String),

    #[error("Image not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOwner<'a> {
    Tree(&'a str),
    CareLog(&'a str),
}

impl ImageOwner<'_> {
    fn prefix(&self) -> String {
        match self {
            ImageOwner::Tree(id) => format!("trees/{}", sanitize(id)),
            ImageOwner::CareLog(id) => format!("care-logs/{}", sanitize(id)),
        }
    }
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Stores `data` and returns its public URL.
    async fn upload(
        &self,
        owner: ImageOwner<'_>,
        file_name: &str,
        data: &[u8],
    ) -> Result<String, StorageError>;

    async fn delete(&self, url: &str) -> Result<(), StorageError>;
}

/// Filesystem-backed store; files live under `root` and are served from
/// `base_url`.
pub struct LocalImageStore {
    root: PathBuf,
    base_url: String,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &ImageConfig) -> Self {
        Self::new(config.root.clone(), config.base_url())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_for_url<'u>(&self, url: &'u str) -> Result<&'u str, StorageError> {
        url.strip_prefix(self.base_url.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|key| !key.is_empty() && !key.split('/').any(|part| part == ".."))
            .ok_or_else(|| StorageError::ForeignUrl(url.to_string()))
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn upload(
        &self,
        owner: ImageOwner<'_>,
        file_name: &str,
        data: &[u8],
    ) -> Result<String, StorageError> {
        if !infer::is_image(data) {
            return Err(StorageError::NotAnImage(file_name.to_string()));
        }

        let key = format!(
            "{}/{}_{}",
            owner.prefix(),
            Utc::now().timestamp_millis(),
            sanitize(file_name)
        );
        let path = self.root.join(&key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;

        tracing::info!(key = %key, bytes = data.len(), "Stored image");
        Ok(format!("{}/{}", self.base_url, key))
    }

    async fn delete(&self, url: &str) -> Result<(), StorageError> {
        let key = self.key_for_url(url)?;
        match tokio::fs::remove_file(self.root.join(key)).await {
            Ok(()) => {
                tracing::info!(key, "Deleted image");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(url.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps ASCII letters, digits, `.`, `-` and `_`; anything else becomes `_`.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        trimmed => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::classifier::ImageSource;

    const PNG_HEADER: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize("leaf photo (1).png"), "leaf_photo__1_.png");
        assert_eq!(sanitize("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize(".."), "_");
    }

    #[tokio::test]
    async fn upload_places_file_under_owner_prefix() {
        let dir = tempdir().unwrap();
        let store = LocalImageStore::new(dir.path(), "https://cdn.example/img/");

        let url = store
            .upload(ImageOwner::Tree("T-001"), "leaf.png", PNG_HEADER)
            .await
            .unwrap();

        assert!(url.starts_with("https://cdn.example/img/trees/T-001/"));
        assert!(url.ends_with("_leaf.png"));

        let key = url.trim_start_matches("https://cdn.example/img/");
        assert_eq!(std::fs::read(dir.path().join(key)).unwrap(), PNG_HEADER);
    }

    #[tokio::test]
    async fn care_log_images_use_their_own_prefix() {
        let dir = tempdir().unwrap();
        let store = LocalImageStore::new(dir.path(), "https://cdn.example");

        let url = store
            .upload(ImageOwner::CareLog("65a1"), "mulch.png", PNG_HEADER)
            .await
            .unwrap();
        assert!(url.starts_with("https://cdn.example/care-logs/65a1/"));
    }

    #[tokio::test]
    async fn default_file_urls_resolve_back_to_the_stored_file() {
        let dir = tempdir().unwrap();
        let config = ImageConfig {
            root: dir.path().join("images"),
            public_base_url: None,
        };
        let store = LocalImageStore::from_config(&config);

        let url = store
            .upload(ImageOwner::Tree("T-1"), "leaf.png", PNG_HEADER)
            .await
            .unwrap();
        assert!(url.starts_with("file:///"), "{url}");

        let ImageSource::Path(path) = ImageSource::from_reference(&url) else {
            panic!("expected a local path for {url}");
        };
        assert_eq!(std::fs::read(&path).unwrap(), PNG_HEADER);

        store.delete(&url).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn non_images_are_rejected() {
        let dir = tempdir().unwrap();
        let store = LocalImageStore::new(dir.path(), "https://cdn.example");

        let err = store
            .upload(ImageOwner::Tree("T-1"), "notes.txt", b"hello")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotAnImage(_)));
    }

    #[tokio::test]
    async fn delete_removes_uploaded_file_once() {
        let dir = tempdir().unwrap();
        let store = LocalImageStore::new(dir.path(), "https://cdn.example");
        let url = store
            .upload(ImageOwner::Tree("T-1"), "leaf.png", PNG_HEADER)
            .await
            .unwrap();

        store.delete(&url).await.unwrap();
        assert!(matches!(store.delete(&url).await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_refuses_urls_outside_the_store() {
        let dir = tempdir().unwrap();
        let store = LocalImageStore::new(dir.path(), "https://cdn.example");

        for url in ["https://elsewhere.example/trees/a.png", "https://cdn.example/../x.png"] {
            assert!(matches!(store.delete(url).await, Err(StorageError::ForeignUrl(_))));
        }
    }
}
