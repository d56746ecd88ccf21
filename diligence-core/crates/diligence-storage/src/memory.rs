//! In-process object storage for development and tests

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{ObjectStorage, Result, StorageError};

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
}

/// Object storage backed by a concurrent map
#[derive(Debug, Default)]
pub struct MemoryObjectStorage {
    objects: DashMap<String, StoredObject>,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.get(key).map(|o| o.value().clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.objects.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn signed_url(&self, key: &str, expires_in_secs: u64) -> Result<String> {
        if !self.objects.contains_key(key) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(format!("memory://{key}?expires_in={expires_in_secs}"))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_sign_delete() {
        let storage = MemoryObjectStorage::new();
        storage.put("a/b/c.pdf", vec![1, 2, 3], "application/pdf").await.unwrap();
        assert_eq!(storage.get("a/b/c.pdf").unwrap().body, vec![1, 2, 3]);

        let url = storage.signed_url("a/b/c.pdf", 60).await.unwrap();
        assert!(url.starts_with("memory://a/b/c.pdf"));

        storage.delete("a/b/c.pdf").await.unwrap();
        assert!(storage.is_empty());
        assert!(matches!(storage.signed_url("a/b/c.pdf", 60).await, Err(StorageError::NotFound(_))));
    }
}
