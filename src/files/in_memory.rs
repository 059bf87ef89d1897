//! In-memory [`FileStore`] for debug sessions.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::Utc;

use super::{sha256_hex, DataClient, FileStore};
use crate::models::start_info::ClusterTarget;
use crate::{Result, SessionError};

/// Blob store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryFileStore {
    blobs: Mutex<HashMap<String, (DataClient, Vec<u8>)>>,
    creates: AtomicUsize,
}

impl InMemoryFileStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs that were actually written.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Ids currently stored, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .blobs
            .lock()
            .map(|blobs| blobs.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

fn poisoned() -> SessionError {
    SessionError::Unclassified("file store mutex poisoned".into())
}

impl FileStore for InMemoryFileStore {
    fn open<'a>(
        &'a self,
        _target: &'a ClusterTarget,
        client_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<DataClient>>> + Send + 'a>> {
        Box::pin(async move {
            let blobs = self.blobs.lock().map_err(|_| poisoned())?;
            Ok(blobs.get(client_id).map(|(client, _)| client.clone()))
        })
    }

    fn create<'a>(
        &'a self,
        _target: &'a ClusterTarget,
        client_id: &'a str,
        content: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<DataClient>> + Send + 'a>> {
        Box::pin(async move {
            let mut blobs = self.blobs.lock().map_err(|_| poisoned())?;
            if let Some((client, _)) = blobs.get(client_id) {
                return Ok(client.clone());
            }
            let client = DataClient {
                id: client_id.to_owned(),
                content_hash: sha256_hex(&content),
                size: content.len() as u64,
                created_at: Utc::now(),
            };
            blobs.insert(client_id.to_owned(), (client.clone(), content));
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(client)
        })
    }

    fn delete<'a>(
        &'a self,
        _target: &'a ClusterTarget,
        client_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.blobs.lock().map_err(|_| poisoned())?.remove(client_id);
            Ok(())
        })
    }
}
