//! Content-addressed photo storage.
//!
//! Uploads are named by the SHA-256 of their bytes, so the same image always
//! maps to the same URL and re-uploads are no-ops.

use std::fs;
use std::path::{Path, PathBuf};

use planner_core::PlannerError;
use sha2::{Digest, Sha256};

/// Subdirectory (and URL segment) holding goal photos.
pub const PHOTO_PREFIX: &str = "photos";

/// An uploaded file as received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Turns uploaded bytes into a stable public URL. Only the URL is persisted
/// on the record.
pub trait BlobStore: Send + Sync {
    /// # Errors
    /// Returns [`PlannerError::Validation`] for unacceptable uploads and
    /// [`PlannerError::Collaborator`] when storage fails.
    fn put(&self, upload: &Upload) -> Result<String, PlannerError>;
}

#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root_dir: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    #[must_use]
    pub fn new(root_dir: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        let public_base_url = public_base_url.into().trim_end_matches('/').to_string();
        Self { root_dir: root_dir.into(), public_base_url }
    }

    #[must_use]
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    #[must_use]
    pub fn compute_hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Read a stored photo back by file name, as produced by [`BlobStore::put`].
    /// Names that could not have been produced by this store read as absent.
    ///
    /// # Errors
    /// Returns [`PlannerError::Collaborator`] when the file exists but cannot be read.
    pub fn read_photo(&self, name: &str) -> Result<Option<(Vec<u8>, &'static str)>, PlannerError> {
        let Some((hash, extension)) = name.split_once('.') else {
            return Ok(None);
        };
        let Some(content_type) = content_type_for(extension) else {
            return Ok(None);
        };
        if hash.len() != 64 || !hash.bytes().all(|byte| byte.is_ascii_hexdigit()) {
            return Ok(None);
        }

        let path = self.root_dir.join(PHOTO_PREFIX).join(name);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|err| {
            PlannerError::Collaborator(format!("failed to read blob {}: {err}", path.display()))
        })?;
        Ok(Some((bytes, content_type)))
    }
}

impl BlobStore for LocalBlobStore {
    fn put(&self, upload: &Upload) -> Result<String, PlannerError> {
        let extension = extension_for(&upload.content_type).ok_or_else(|| {
            PlannerError::validation(
                "image",
                format!("unsupported content type `{}`", upload.content_type),
            )
        })?;
        if upload.bytes.is_empty() {
            return Err(PlannerError::validation("image", "must not be empty"));
        }

        let name = format!("{}.{extension}", Self::compute_hash(&upload.bytes));
        let dir = self.root_dir.join(PHOTO_PREFIX);
        let path = dir.join(&name);

        if path.exists() {
            tracing::debug!(blob = %name, "photo already stored");
        } else {
            fs::create_dir_all(&dir).map_err(|err| {
                PlannerError::Collaborator(format!("failed to create {}: {err}", dir.display()))
            })?;
            fs::write(&path, &upload.bytes).map_err(|err| {
                PlannerError::Collaborator(format!("failed to write {}: {err}", path.display()))
            })?;
            tracing::info!(blob = %name, size = upload.bytes.len(), "stored photo");
        }

        Ok(format!("{}/{PHOTO_PREFIX}/{name}", self.public_base_url))
    }
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    match essence.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

fn content_type_for(extension: &str) -> Option<&'static str> {
    match extension {
        "jpg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}
