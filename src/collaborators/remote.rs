//! HTTP implementations of the remote collaborators
//!
//! ## Responsibilities
//!
//! - Clip upload/verify/sign against the remote object store
//! - Device placement (site/subsite) resolution
//! - Replay record registration
//!
//! A 409/duplicate response from the store is mapped to a successful
//! receipt with `duplicate = true`; the clip is already there.

use crate::collaborators::{
    HierarchyResolver, Placement, RegistrationSink, RemoteStorage, UploadReceipt,
};
use crate::destination::sanitize_component;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Duration;

/// Shared settings for the HTTP collaborators
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub bucket: String,
    pub api_key: Option<String>,
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(Error::from)
}

fn authorize(req: reqwest::RequestBuilder, api_key: &Option<String>) -> reqwest::RequestBuilder {
    match api_key {
        Some(key) => req.bearer_auth(key).header("apikey", key.clone()),
        None => req,
    }
}

/// The store already holds this key: an explicit 409, or a duplicate
/// message in the rejection body. Counts as delivered.
fn duplicate_delivery(status: reqwest::StatusCode, body: &str) -> bool {
    status == reqwest::StatusCode::CONFLICT
        || body.contains("Duplicate")
        || body.contains("already exists")
}

/// Object-store client for clip delivery
pub struct HttpRemoteStorage {
    client: reqwest::Client,
    config: RemoteConfig,
}

impl HttpRemoteStorage {
    pub fn new(config: RemoteConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            config,
        })
    }

    fn object_url(&self, remote_key: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.config.base_url, self.config.bucket, remote_key
        )
    }

    fn public_url(&self, remote_key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.config.base_url, self.config.bucket, remote_key
        )
    }
}

#[async_trait]
impl RemoteStorage for HttpRemoteStorage {
    async fn upload(&self, local_path: &Path, remote_key: &str) -> Result<UploadReceipt> {
        let body = tokio::fs::read(local_path).await?;
        let size = body.len();

        let req = self
            .client
            .post(self.object_url(remote_key))
            .header("Content-Type", "video/mp4")
            .body(body);
        let resp = authorize(req, &self.config.api_key)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("upload request failed: {}", e)))?;

        let status = resp.status();
        if status.is_success() {
            tracing::info!(
                remote_key = %remote_key,
                size = size,
                "Clip uploaded"
            );
            return Ok(UploadReceipt {
                remote_url: self.public_url(remote_key),
                duplicate: false,
            });
        }

        let text = resp.text().await.unwrap_or_default();
        if duplicate_delivery(status, &text) {
            tracing::info!(remote_key = %remote_key, "Remote store already holds this key");
            return Ok(UploadReceipt {
                remote_url: self.public_url(remote_key),
                duplicate: true,
            });
        }

        Err(Error::Delivery(format!(
            "upload rejected ({}): {}",
            status,
            text.trim()
        )))
    }

    async fn verify(&self, remote_key: &str, expected_size: Option<u64>) -> Result<bool> {
        let req = self.client.head(self.object_url(remote_key));
        let resp = authorize(req, &self.config.api_key)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("verify request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Ok(false);
        }

        if let Some(expected) = expected_size {
            let actual = resp
                .headers()
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            if let Some(actual) = actual {
                return Ok(actual == expected);
            }
        }
        Ok(true)
    }

    async fn sign_url(&self, remote_key: &str, ttl_secs: u64) -> Result<String> {
        let url = format!(
            "{}/storage/v1/object/sign/{}/{}",
            self.config.base_url, self.config.bucket, remote_key
        );
        let req = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "expiresIn": ttl_secs }));
        let resp = authorize(req, &self.config.api_key)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("sign request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Delivery(format!(
                "sign rejected ({})",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp.json().await?;
        body.get("signedURL")
            .and_then(|v| v.as_str())
            .map(|path| format!("{}{}", self.config.base_url, path))
            .ok_or_else(|| Error::Delivery("sign response missing signedURL".to_string()))
    }
}

/// REST-backed placement lookup
pub struct HttpHierarchyResolver {
    client: reqwest::Client,
    config: RemoteConfig,
}

impl HttpHierarchyResolver {
    pub fn new(config: RemoteConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            config,
        })
    }
}

#[async_trait]
impl HierarchyResolver for HttpHierarchyResolver {
    async fn resolve_destination(&self, device_id: &str) -> Result<Option<Placement>> {
        let url = format!(
            "{}/rest/v1/device_placement?device_id=eq.{}&select=site_name,subsite_name",
            self.config.base_url, device_id
        );
        let resp = authorize(self.client.get(&url), &self.config.api_key)
            .send()
            .await
            .map_err(|e| Error::Validation(format!("placement lookup failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Validation(format!(
                "placement lookup rejected ({})",
                resp.status()
            )));
        }

        let rows: Vec<serde_json::Value> = resp.json().await?;
        let row = match rows.first() {
            Some(row) => row,
            None => return Ok(None),
        };

        let site = row.get("site_name").and_then(|v| v.as_str());
        let subsite = row.get("subsite_name").and_then(|v| v.as_str());
        match (site, subsite) {
            (Some(site), Some(subsite)) if !site.is_empty() && !subsite.is_empty() => {
                Ok(Some(Placement {
                    site: sanitize_component(site),
                    subsite: sanitize_component(subsite),
                }))
            }
            _ => Ok(None),
        }
    }
}

/// REST-backed replay record registration
pub struct HttpRegistrationSink {
    client: reqwest::Client,
    config: RemoteConfig,
}

impl HttpRegistrationSink {
    pub fn new(config: RemoteConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            config,
        })
    }
}

#[async_trait]
impl RegistrationSink for HttpRegistrationSink {
    async fn record_clip(
        &self,
        camera_id: &str,
        remote_url: &str,
        recorded_at: DateTime<Utc>,
        remote_key: &str,
    ) -> Result<()> {
        let url = format!("{}/rest/v1/replays", self.config.base_url);
        let req = self.client.post(&url).json(&serde_json::json!({
            "camera_id": camera_id,
            "video_url": remote_url,
            "recorded_at": recorded_at.to_rfc3339(),
            "bucket_path": remote_key,
        }));
        let resp = authorize(req, &self.config.api_key)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("registration failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::Delivery(format!(
                "registration rejected ({})",
                resp.status()
            )));
        }

        tracing::debug!(camera_id = %camera_id, remote_key = %remote_key, "Replay record inserted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_duplicate_delivery_classification() {
        // explicit conflict, regardless of body
        assert!(duplicate_delivery(StatusCode::CONFLICT, ""));
        // stores that answer 400 with a duplicate message in the body
        assert!(duplicate_delivery(
            StatusCode::BAD_REQUEST,
            r#"{"error":"Duplicate","message":"The resource already exists"}"#
        ));
        assert!(duplicate_delivery(
            StatusCode::BAD_REQUEST,
            "key already exists in bucket"
        ));
        // ordinary rejections stay errors
        assert!(!duplicate_delivery(StatusCode::BAD_REQUEST, "invalid key"));
        assert!(!duplicate_delivery(StatusCode::INTERNAL_SERVER_ERROR, ""));
        assert!(!duplicate_delivery(StatusCode::UNAUTHORIZED, "bad token"));
    }
}
