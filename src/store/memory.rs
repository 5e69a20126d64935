use super::{ArtifactRef, ArtifactStore, ArtifactSummary, AssetInfo, UploadMetadata};
use crate::{BackupError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct StoredArtifact {
    name: Option<String>,
    created_at: DateTime<Utc>,
    assets: Vec<(String, Vec<u8>)>,
}

/// In-memory artifact storage
#[derive(Clone, Default)]
pub struct MemoryArtifactStore {
    artifacts: Arc<DashMap<String, StoredArtifact>>,
}

impl MemoryArtifactStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an artifact with an explicit creation time
    pub fn insert(
        &self,
        identifier: impl Into<String>,
        asset_name: impl Into<String>,
        data: Vec<u8>,
        created_at: DateTime<Utc>,
    ) {
        self.artifacts.insert(
            identifier.into(),
            StoredArtifact {
                name: None,
                created_at,
                assets: vec![(asset_name.into(), data)],
            },
        );
    }

    /// Seed an artifact container that holds no assets
    pub fn insert_empty(&self, identifier: impl Into<String>, created_at: DateTime<Utc>) {
        self.artifacts.insert(
            identifier.into(),
            StoredArtifact {
                name: None,
                created_at,
                assets: Vec::new(),
            },
        );
    }

    /// Whether an identifier is present
    pub fn contains(&self, identifier: &str) -> bool {
        self.artifacts.contains_key(identifier)
    }

    /// Number of stored artifacts
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn upload(
        &self,
        identifier: &str,
        data: Vec<u8>,
        metadata: &UploadMetadata,
    ) -> Result<ArtifactRef> {
        let size_bytes = data.len() as u64;
        match self.artifacts.entry(identifier.to_string()) {
            Entry::Occupied(_) => Err(BackupError::ArtifactExists(identifier.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(StoredArtifact {
                    name: metadata.title.clone(),
                    created_at: Utc::now(),
                    assets: vec![(metadata.asset_name.clone(), data)],
                });
                Ok(ArtifactRef {
                    identifier: identifier.to_string(),
                    location: format!("memory://{}/{}", identifier, metadata.asset_name),
                    size_bytes,
                })
            }
        }
    }

    async fn download(&self, identifier: &str) -> Result<Vec<u8>> {
        let artifact = self
            .artifacts
            .get(identifier)
            .ok_or_else(|| BackupError::ArtifactNotFound(identifier.to_string()))?;

        artifact
            .assets
            .first()
            .map(|(_, data)| data.clone())
            .ok_or_else(|| BackupError::NoAssetsInArtifact(identifier.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ArtifactSummary>> {
        let mut summaries: Vec<ArtifactSummary> = self
            .artifacts
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| ArtifactSummary {
                identifier: entry.key().clone(),
                name: entry.value().name.clone(),
                created_at: entry.value().created_at,
                assets: entry
                    .value()
                    .assets
                    .iter()
                    .map(|(name, data)| AssetInfo {
                        name: name.clone(),
                        size_bytes: data.len() as u64,
                    })
                    .collect(),
            })
            .collect();

        // DashMap iteration order is arbitrary; newest first like a release listing
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    async fn delete(&self, identifier: &str) -> Result<()> {
        self.artifacts.remove(identifier);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_refuses_overwrite() {
        let store = MemoryArtifactStore::new();
        let metadata = UploadMetadata::octet_stream("test-1.sql.enc", 3);

        store.upload("backup-test-1", vec![1, 2, 3], &metadata).await.unwrap();
        let err = store
            .upload("backup-test-1", vec![4, 5, 6], &metadata)
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::ArtifactExists(_)));
        assert_eq!(store.download("backup-test-1").await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_download_errors() {
        let store = MemoryArtifactStore::new();
        store.insert_empty("backup-test-empty", Utc::now());

        assert!(matches!(
            store.download("backup-test-missing").await,
            Err(BackupError::ArtifactNotFound(_))
        ));
        assert!(matches!(
            store.download("backup-test-empty").await,
            Err(BackupError::NoAssetsInArtifact(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryArtifactStore::new();
        store.insert("backup-test-a", "a.sql.enc", vec![0; 40], Utc::now());

        store.delete("backup-test-a").await.unwrap();
        store.delete("backup-test-a").await.unwrap();
        assert!(store.is_empty());
    }
}
