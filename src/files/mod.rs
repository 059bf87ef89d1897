//! Content-addressed upload of session dependency files.
//!
//! Each file is stored under a data-client id derived from its owner and
//! the SHA-256 of its content, so uploading identical bytes twice is a
//! lookup, not a second upload. Only ids created by the current call are
//! reported for rollback.

pub mod in_memory;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::models::start_info::ClusterTarget;
use crate::{Result, SessionError};

pub use in_memory::InMemoryFileStore;

/// Remote blob addressed by a data-client id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataClient {
    /// Data-client id.
    pub id: String,
    /// Hex SHA-256 of the stored content.
    pub content_hash: String,
    /// Content length in bytes.
    pub size: u64,
    /// When the blob was created.
    pub created_at: DateTime<Utc>,
}

/// Blob store collaborator.
pub trait FileStore: Send + Sync {
    /// Look up an existing blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    fn open<'a>(
        &'a self,
        target: &'a ClusterTarget,
        client_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<DataClient>>> + Send + 'a>>;

    /// Create a blob; creating an existing id returns the existing blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the upload fails.
    fn create<'a>(
        &'a self,
        target: &'a ClusterTarget,
        client_id: &'a str,
        content: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<DataClient>> + Send + 'a>>;

    /// Delete a blob; unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the delete.
    fn delete<'a>(
        &'a self,
        target: &'a ClusterTarget,
        client_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Result of [`upload_dependencies`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOutcome {
    /// One data-client id per input file, in input order.
    pub ids: Vec<String>,
    /// Ids created by this call; the only ones eligible for rollback.
    pub created: Vec<String>,
}

/// Compute SHA-256 hex digest of the given bytes.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Data-client id for `content` owned by `owner`.
#[must_use]
pub fn data_client_id(owner: &str, content: &[u8]) -> String {
    let owner: String = owner
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{owner}-{}", sha256_hex(content))
}

/// Upload every file in `files` unless identical content is already stored.
///
/// On failure, blobs created earlier in the same call are deleted before
/// the error is returned.
///
/// # Errors
///
/// Returns `SessionError::Io` if a file cannot be read, or the store's
/// error if a lookup or upload fails.
pub async fn upload_dependencies(
    store: &dyn FileStore,
    target: &ClusterTarget,
    files: &[PathBuf],
) -> Result<UploadOutcome> {
    let mut created = Vec::new();
    match upload_tracked(store, target, files, &mut created).await {
        Ok(ids) => Ok(UploadOutcome { ids, created }),
        Err(err) => {
            delete_uploaded(store, target, &created).await;
            Err(err)
        }
    }
}

/// Upload like [`upload_dependencies`], pushing each newly created id onto
/// `created` the moment it exists and returning one id per input file.
///
/// Nothing is rolled back here; the caller owns `created`, which stays
/// accurate even if this future is dropped part way through.
///
/// # Errors
///
/// Returns `SessionError::Io` if a file cannot be read, or the store's
/// error if a lookup or upload fails.
pub async fn upload_tracked(
    store: &dyn FileStore,
    target: &ClusterTarget,
    files: &[PathBuf],
    created: &mut Vec<String>,
) -> Result<Vec<String>> {
    let owner = target.owner();
    let mut ids = Vec::with_capacity(files.len());
    let before = created.len();

    for path in files {
        let (id, fresh) = upload_one(store, target, &owner, path).await?;
        if fresh {
            created.push(id.clone());
        }
        ids.push(id);
    }

    info!(
        files = files.len(),
        created = created.len() - before,
        "dependency files uploaded"
    );
    Ok(ids)
}

async fn upload_one(
    store: &dyn FileStore,
    target: &ClusterTarget,
    owner: &str,
    path: &Path,
) -> Result<(String, bool)> {
    let content = tokio::fs::read(path).await.map_err(|err| {
        SessionError::Io(format!(
            "failed to read dependency file {}: {err}",
            path.display()
        ))
    })?;
    let hash = sha256_hex(&content);
    let id = data_client_id(owner, &content);

    match store.open(target, &id).await? {
        Some(existing) if existing.content_hash == hash => {
            debug!(data_client = %id, path = %path.display(), "dependency already uploaded");
            return Ok((id, false));
        }
        Some(existing) => {
            warn!(
                data_client = %id,
                stored = %existing.content_hash,
                "stored blob does not match its content hash, replacing"
            );
            store.delete(target, &id).await?;
        }
        None => {}
    }

    store.create(target, &id, content).await?;
    debug!(data_client = %id, path = %path.display(), "dependency uploaded");
    Ok((id, true))
}

/// Best-effort delete of `ids`; failures are logged, never returned.
pub async fn delete_uploaded(store: &dyn FileStore, target: &ClusterTarget, ids: &[String]) {
    for id in ids {
        if let Err(err) = store.delete(target, id).await {
            warn!(data_client = %id, %err, "failed to delete uploaded dependency");
        }
    }
}
