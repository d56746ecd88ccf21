//! Hosted storage REST client
//!
//! `POST   {base}/object/{bucket}/{key}` upload
//! `POST   {base}/object/sign/{bucket}/{key}` signed download URL
//! `DELETE {base}/object/{bucket}/{key}` remove

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{ObjectStorage, Result, StorageError};

/// Client configuration
#[derive(Debug, Clone)]
pub struct HttpStorageConfig {
    /// e.g. `https://project.supabase.co/storage/v1`
    pub base_url: String,
    pub service_key: String,
    pub bucket: String,
    pub timeout: Duration,
}

/// Storage API client
#[derive(Clone)]
pub struct HttpObjectStorage {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: HttpStorageConfig,
    http: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest {
    expires_in: u64,
}

#[derive(Deserialize)]
struct SignResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(alias = "error")]
    message: String,
}

impl HttpObjectStorage {
    pub fn new(config: HttpStorageConfig) -> Result<Self> {
        if config.bucket.is_empty() {
            return Err(StorageError::Config("bucket name is empty".into()));
        }
        // validated once so request URLs can be joined safely
        Url::parse(&config.base_url)?;

        let mut headers = header::HeaderMap::new();
        let auth = header::HeaderValue::from_str(&format!("Bearer {}", config.service_key))
            .map_err(|_| StorageError::Config("service key is not a valid header value".into()))?;
        headers.insert(header::AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(ClientInner { config, http }),
        })
    }

    fn url(&self, prefix: &str, key: &str) -> Result<Url> {
        let base = self.inner.config.base_url.trim_end_matches('/');
        let bucket = &self.inner.config.bucket;
        Ok(Url::parse(&format!("{base}/{prefix}/{bucket}/{key}"))?)
    }

    async fn check(response: reqwest::Response, key: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let body = response.bytes().await?;
        let message = serde_json::from_slice::<ErrorResponse>(&body)
            .map(|e| e.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
        tracing::warn!(key, status = status.as_u16(), %message, "storage request failed");

        Err(StorageError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let size = body.len();
        let response = self
            .inner
            .http
            .post(self.url("object", key)?)
            .header(header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(body)
            .send()
            .await?;
        Self::check(response, key).await?;
        tracing::debug!(key, size, "object stored");
        Ok(())
    }

    async fn signed_url(&self, key: &str, expires_in_secs: u64) -> Result<String> {
        let response = self
            .inner
            .http
            .post(self.url("object/sign", key)?)
            .json(&SignRequest {
                expires_in: expires_in_secs,
            })
            .send()
            .await?;
        let body = Self::check(response, key).await?.bytes().await?;
        let signed: SignResponse = serde_json::from_slice(&body)?;

        // the API answers with a path relative to the storage base
        if signed.signed_url.starts_with("http://") || signed.signed_url.starts_with("https://") {
            return Ok(signed.signed_url);
        }
        let base = self.inner.config.base_url.trim_end_matches('/');
        let path = signed.signed_url.trim_start_matches('/');
        Ok(format!("{base}/{path}"))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self.inner.http.delete(self.url("object", key)?).send().await?;
        match Self::check(response, key).await {
            Ok(_) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
