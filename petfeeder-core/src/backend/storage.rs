//! Object storage client, used for profile avatars.

use std::sync::Arc;

use async_trait::async_trait;

use super::{AuthService, ObjectStorage};
use crate::error::ServiceError;

pub const AVATAR_BUCKET: &str = "user-avatars";

/// Seconds the storage CDN may cache an uploaded object.
const CACHE_CONTROL_SECS: u32 = 3600;

pub struct StorageClient {
    base_url: String,
    anon_key: String,
    http: reqwest::Client,
    auth: Arc<dyn AuthService>,
}

impl StorageClient {
    pub fn new(base_url: &str, anon_key: &str, auth: Arc<dyn AuthService>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            http: reqwest::Client::new(),
            auth,
        }
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path)
    }
}

#[async_trait]
impl ObjectStorage for StorageClient {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<(), ServiceError> {
        let session = self
            .auth
            .session()
            .await
            .ok_or_else(|| ServiceError::new("Not signed in"))?;

        tracing::debug!(bucket, path, size = bytes.len(), "Uploading object");
        let response = self
            .http
            .post(self.object_url(bucket, path))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .header("Content-Type", content_type)
            .header("Cache-Control", format!("max-age={}", CACHE_CONTROL_SECS))
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or_else(|| format!("Upload failed with status {}", status));
            return Err(ServiceError::with_status(message, status));
        }
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, bucket, path
        )
    }
}

/// `avatars/<user>-<suffix>.<ext>`
pub(crate) fn avatar_path(user_id: &str, suffix: &str, ext: &str) -> String {
    format!("avatars/{}-{}.{}", user_id, suffix, ext)
}

/// Lowercased extension of a file name, if it has one.
pub(crate) fn file_extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() || ext.contains('/') {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub(crate) fn image_content_type(ext: &str) -> Option<&'static str> {
    match ext {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}
