// S3 artifact store
// Object layout: {key_prefix}{identifier}/{asset_name}

use super::{ArtifactRef, ArtifactStore, ArtifactSummary, AssetInfo, UploadMetadata};
use crate::{BackupError, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// S3 store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Bucket holding the artifacts
    pub bucket_name: String,
    /// AWS region
    pub region: String,
    /// Prepended to every object key
    pub key_prefix: String,
    /// Custom endpoint (LocalStack, MinIO)
    pub endpoint_url: Option<String>,
    /// Path-style addressing, needed by most S3-compatible services
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket_name: "dbvault-backups".to_string(),
            region: "us-east-1".to_string(),
            key_prefix: "backups/".to_string(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

#[derive(Debug)]
struct StoredObject {
    key: String,
    last_modified: DateTime<Utc>,
    size_bytes: u64,
}

/// Backups stored as objects in an S3 bucket
pub struct S3ArtifactStore {
    client: Client,
    config: S3Config,
}

impl S3ArtifactStore {
    /// Create a new S3 store with the given configuration
    pub async fn new(config: S3Config) -> Result<Self> {
        let mut aws_config_builder = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        // Support for LocalStack/MinIO with custom endpoint
        if let Some(ref endpoint) = config.endpoint_url {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);
        }

        let aws_config = aws_config_builder.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        Ok(Self { client, config })
    }

    fn object_key(&self, identifier: &str, asset_name: &str) -> String {
        format!("{}{}/{}", self.config.key_prefix, identifier, asset_name)
    }

    /// Split a full key into (identifier, asset name). Flat keys without a
    /// separator are treated as a single-asset artifact named after the key.
    fn split_key<'a>(&self, key: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = key.strip_prefix(self.config.key_prefix.as_str())?;
        match rest.split_once('/') {
            Some((identifier, asset)) => Some((identifier, asset)),
            None if !rest.is_empty() => Some((rest, rest)),
            None => None,
        }
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.config.bucket_name)
                .prefix(prefix);
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| {
                BackupError::StoreIo(format!("Failed to list objects: {}", DisplayErrorContext(&e)))
            })?;

            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                let last_modified = object
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
                    .unwrap_or_default();
                objects.push(StoredObject {
                    key: key.to_string(),
                    last_modified,
                    size_bytes: object.size().unwrap_or(0).max(0) as u64,
                });
            }

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(objects)
    }

    /// Objects that make up one artifact
    async fn artifact_objects(&self, identifier: &str) -> Result<Vec<StoredObject>> {
        let prefix = format!("{}{}", self.config.key_prefix, identifier);
        let objects = self.list_objects(&prefix).await?;
        Ok(objects
            .into_iter()
            .filter(|object| {
                self.split_key(&object.key)
                    .map(|(id, _)| id == identifier)
                    .unwrap_or(false)
            })
            .collect())
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn upload(
        &self,
        identifier: &str,
        data: Vec<u8>,
        metadata: &UploadMetadata,
    ) -> Result<ArtifactRef> {
        if !self.artifact_objects(identifier).await?.is_empty() {
            return Err(BackupError::ArtifactExists(identifier.to_string()));
        }

        let key = self.object_key(identifier, &metadata.asset_name);
        let size_bytes = data.len() as u64;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.config.bucket_name)
            .key(&key)
            .content_type(&metadata.content_type)
            .content_length(metadata.content_length as i64)
            .metadata("identifier", identifier)
            .body(ByteStream::from(data));
        if let Some(ref title) = metadata.title {
            request = request.metadata("title", title);
        }

        request.send().await.map_err(|e| {
            BackupError::StoreIo(format!("Failed to upload {}: {}", key, DisplayErrorContext(&e)))
        })?;

        info!(identifier, key = %key, size_bytes, "Object uploaded");

        Ok(ArtifactRef {
            identifier: identifier.to_string(),
            location: format!("s3://{}/{}", self.config.bucket_name, key),
            size_bytes,
        })
    }

    async fn download(&self, identifier: &str) -> Result<Vec<u8>> {
        let objects = self.artifact_objects(identifier).await?;
        let object = objects
            .first()
            .ok_or_else(|| BackupError::ArtifactNotFound(identifier.to_string()))?;

        debug!(identifier, key = %object.key, size_bytes = object.size_bytes, "Downloading object");

        let response = self
            .client
            .get_object()
            .bucket(&self.config.bucket_name)
            .key(&object.key)
            .send()
            .await
            .map_err(|e| {
                BackupError::StoreIo(format!(
                    "Failed to download {}: {}",
                    object.key,
                    DisplayErrorContext(&e)
                ))
            })?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| BackupError::StoreIo(format!("Failed to read body: {}", e)))?
            .into_bytes();

        Ok(body.to_vec())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ArtifactSummary>> {
        let full_prefix = format!("{}{}", self.config.key_prefix, prefix);
        let objects = self.list_objects(&full_prefix).await?;

        let mut grouped: BTreeMap<String, ArtifactSummary> = BTreeMap::new();
        for object in &objects {
            let Some((identifier, asset)) = self.split_key(&object.key) else {
                continue;
            };
            let summary = grouped
                .entry(identifier.to_string())
                .or_insert_with(|| ArtifactSummary {
                    identifier: identifier.to_string(),
                    name: None,
                    created_at: object.last_modified,
                    assets: Vec::new(),
                });
            summary.created_at = summary.created_at.min(object.last_modified);
            summary.assets.push(AssetInfo {
                name: asset.to_string(),
                size_bytes: object.size_bytes,
            });
        }

        Ok(grouped.into_values().collect())
    }

    async fn delete(&self, identifier: &str) -> Result<()> {
        let objects = self.artifact_objects(identifier).await?;
        if objects.is_empty() {
            info!(identifier, "No objects to delete");
            return Ok(());
        }

        for object in objects {
            self.client
                .delete_object()
                .bucket(&self.config.bucket_name)
                .key(&object.key)
                .send()
                .await
                .map_err(|e| {
                    BackupError::StoreIo(format!(
                        "Failed to delete {}: {}",
                        object.key,
                        DisplayErrorContext(&e)
                    ))
                })?;
            info!(identifier, key = %object.key, "Deleted old backup object");
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "s3"
    }
}
