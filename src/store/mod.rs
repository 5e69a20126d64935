//! Remote artifact stores for encrypted backups.
//!
//! One capability interface, several backends: GitHub release assets, an S3
//! bucket and an in-memory map. The backend is chosen once at startup from
//! configuration.

mod github;
mod memory;
#[cfg(feature = "s3")]
mod s3;

pub use github::{GitHubConfig, GitHubReleaseStore};
pub use memory::MemoryArtifactStore;
#[cfg(feature = "s3")]
pub use s3::{S3ArtifactStore, S3Config};

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content type of every uploaded payload
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Describes the payload being uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    /// File name of the payload inside the artifact
    pub asset_name: String,
    /// MIME type
    pub content_type: String,
    /// Payload length in bytes
    pub content_length: u64,
    /// Human-readable title, used as the release name where supported
    pub title: Option<String>,
    /// Free-form description, used as the release body where supported
    pub description: Option<String>,
}

impl UploadMetadata {
    /// Binary payload with the given asset name
    pub fn octet_stream(asset_name: impl Into<String>, content_length: u64) -> Self {
        Self {
            asset_name: asset_name.into(),
            content_type: OCTET_STREAM.to_string(),
            content_length,
            title: None,
            description: None,
        }
    }

    /// Set the human-readable title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Handle returned by a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    /// Identifier the artifact was stored under
    pub identifier: String,
    /// Backend-specific location (asset URL or object key)
    pub location: String,
    /// Stored size in bytes
    pub size_bytes: u64,
}

/// One payload file inside an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    /// File name
    pub name: String,
    /// Size in bytes
    pub size_bytes: u64,
}

/// Listing entry for one stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    /// External handle (release tag or key segment)
    pub identifier: String,
    /// Display name, if the backend keeps one
    pub name: Option<String>,
    /// Creation or last-modified time reported by the backend
    pub created_at: DateTime<Utc>,
    /// Payload files
    pub assets: Vec<AssetInfo>,
}

impl ArtifactSummary {
    /// Total stored size across assets
    pub fn size_bytes(&self) -> u64 {
        self.assets.iter().map(|asset| asset.size_bytes).sum()
    }
}

/// Capability interface over a remote artifact store
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `data` as a new artifact; never overwrites an existing identifier
    async fn upload(
        &self,
        identifier: &str,
        data: Vec<u8>,
        metadata: &UploadMetadata,
    ) -> Result<ArtifactRef>;

    /// Fetch the first payload of an artifact
    async fn download(&self, identifier: &str) -> Result<Vec<u8>>;

    /// Fresh listing of every artifact whose identifier starts with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<ArtifactSummary>>;

    /// Remove an artifact; absent identifiers are not an error
    async fn delete(&self, identifier: &str) -> Result<()>;

    /// Backend name for logs
    fn backend(&self) -> &'static str;
}
