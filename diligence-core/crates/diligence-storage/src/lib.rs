//! Document Object Storage
//!
//! Uploaded files live in a bucket keyed `{org}/{company}/{document}-{name}`;
//! the database only keeps the key. Downloads go through short-lived signed
//! URLs.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use http::{HttpObjectStorage, HttpStorageConfig};
pub use memory::MemoryObjectStorage;

/// Storage error types
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Bucket operations used for documents
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;

    /// Time-limited download URL
    async fn signed_url(&self, key: &str, expires_in_secs: u64) -> Result<String>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Bucket key for a document
pub fn object_key(org_id: Uuid, company_id: Uuid, document_id: Uuid, file_name: &str) -> String {
    format!("{org_id}/{company_id}/{document_id}-{}", sanitize_file_name(file_name))
}

/// Keep a file name safe for use as one path segment
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("Pitch Deck (v2).pdf"), "Pitch_Deck__v2_.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\deals\\cap.xlsx"), "cap.xlsx");
        assert_eq!(sanitize_file_name(".."), "file");
        assert_eq!(sanitize_file_name(""), "file");
    }

    #[test]
    fn test_object_key_layout() {
        let (org, company, doc) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let key = object_key(org, company, doc, "deck.pdf");
        assert_eq!(key, format!("{org}/{company}/{doc}-deck.pdf"));
    }
}
