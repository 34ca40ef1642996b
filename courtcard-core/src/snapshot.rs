//! Object-store collaborator for webcam snapshot blobs.
//!
//! `WebcamSnapshot.blob_ref` is an opaque string this crate never
//! interprets; the actual bytes live in whatever object store the
//! deployment configures. This trait is the seam a production store
//! (S3-compatible, local disk, whatever) is injected through.

use async_trait::async_trait;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist `bytes` and return a `blob_ref` the store can later
    /// dereference.
    async fn put(&self, session_id: uuid::Uuid, minute_into_meeting: u32, bytes: Vec<u8>) -> Result<String, String>;
}

/// Reference implementation: keeps blobs in memory, keyed by the
/// `blob_ref` it mints. Suitable for tests and for a single-process
/// deployment with no durability requirement.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    blobs: tokio::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, blob_ref: &str) -> Option<Vec<u8>> {
        self.blobs.lock().await.get(blob_ref).cloned()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn put(&self, session_id: uuid::Uuid, minute_into_meeting: u32, bytes: Vec<u8>) -> Result<String, String> {
        let blob_ref = format!("mem://{}/{}", session_id, minute_into_meeting);
        self.blobs.lock().await.insert(blob_ref.clone(), bytes);
        Ok(blob_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let store = InMemorySnapshotStore::new();
        let session_id = uuid::Uuid::new_v4();
        let blob_ref = store.put(session_id, 5, vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.get(&blob_ref).await, Some(vec![1, 2, 3]));
    }
}
