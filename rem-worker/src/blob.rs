//! Blob store client
//!
//! Object storage is an external collaborator; file entities record a `uri`
//! and this client moves bytes. The HTTP implementation covers presigned or
//! internal object endpoints; tests use the in-memory store.

use async_trait::async_trait;
use rem_core::{RemError, StoreError};
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, uri: &str, bytes: Vec<u8>) -> Result<(), RemError>;
    async fn get(&self, uri: &str) -> Result<Vec<u8>, RemError>;
    async fn delete(&self, uri: &str) -> Result<(), RemError>;
}

/// Plain HTTP object access: PUT/GET/DELETE against the uri itself.
pub struct HttpBlobStore {
    http: reqwest::Client,
}

impl HttpBlobStore {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

fn transport_error(uri: &str, err: reqwest::Error) -> RemError {
    RemError::Store(StoreError::Transient {
        reason: format!("blob transfer failed for {uri}: {err}"),
    })
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(&self, uri: &str, bytes: Vec<u8>) -> Result<(), RemError> {
        self.http
            .put(uri)
            .body(bytes)
            .send()
            .await
            .map_err(|e| transport_error(uri, e))?
            .error_for_status()
            .map_err(|e| transport_error(uri, e))?;
        Ok(())
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>, RemError> {
        let response = self
            .http
            .get(uri)
            .send()
            .await
            .map_err(|e| transport_error(uri, e))?
            .error_for_status()
            .map_err(|e| transport_error(uri, e))?;
        let bytes = response.bytes().await.map_err(|e| transport_error(uri, e))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, uri: &str) -> Result<(), RemError> {
        self.http
            .delete(uri)
            .send()
            .await
            .map_err(|e| transport_error(uri, e))?
            .error_for_status()
            .map_err(|e| transport_error(uri, e))?;
        Ok(())
    }
}

/// In-memory store for tests and single-node dev.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, uri: &str, bytes: Vec<u8>) -> Result<(), RemError> {
        self.blobs.lock().unwrap().insert(uri.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>, RemError> {
        self.blobs
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| {
                RemError::Store(StoreError::Database(format!("no blob at {uri}")))
            })
    }

    async fn delete(&self, uri: &str) -> Result<(), RemError> {
        self.blobs.lock().unwrap().remove(uri);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryBlobStore::new();
        store.put("mem://a", b"bytes".to_vec()).await.unwrap();
        assert_eq!(store.get("mem://a").await.unwrap(), b"bytes");
        store.delete("mem://a").await.unwrap();
        assert!(store.get("mem://a").await.is_err());
    }
}
