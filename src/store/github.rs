// GitHub release store: one draft release per backup, payload as its asset
//
// Draft releases are invisible to GET /releases/tags/{tag}, so lookups page
// through the release listing instead.

use super::{ArtifactRef, ArtifactStore, ArtifactSummary, AssetInfo, UploadMetadata, OCTET_STREAM};
use crate::{BackupError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

const DEFAULT_API_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const PAGE_SIZE: usize = 100;

/// Repository and credentials for the release store
#[derive(Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// Bearer token with `contents: write` on the repository
    pub token: String,
    /// Repository owner
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// REST base URL; a trailing slash is ignored
    pub api_url: String,
}

impl GitHubConfig {
    /// Config against the public API
    pub fn new(token: impl Into<String>, owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            owner: owner.into(),
            repo: repo.into(),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    /// Point at a different API base (GitHub Enterprise, test servers)
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

impl fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &"<redacted>")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct Release {
    id: u64,
    tag_name: String,
    name: Option<String>,
    created_at: DateTime<Utc>,
    upload_url: String,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    id: u64,
    name: String,
    size: u64,
    #[serde(default)]
    browser_download_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateRelease<'a> {
    tag_name: &'a str,
    name: &'a str,
    body: &'a str,
    draft: bool,
}

impl Release {
    fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            identifier: self.tag_name.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
            assets: self
                .assets
                .iter()
                .map(|asset| AssetInfo {
                    name: asset.name.clone(),
                    size_bytes: asset.size,
                })
                .collect(),
        }
    }
}

/// Backups stored as draft-release assets in a GitHub repository
pub struct GitHubReleaseStore {
    client: Client,
    config: GitHubConfig,
}

impl GitHubReleaseStore {
    /// Build the HTTP client
    pub fn new(config: GitHubConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("dbvault/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackupError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.owner,
            self.config.repo,
            path
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.request_accepting(method, url, "application/vnd.github+json")
    }

    fn request_accepting(&self, method: Method, url: &str, accept: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {}", self.config.token))
            .header(ACCEPT, accept)
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| BackupError::StoreIo(format!("{}: {}", what, e)))?;
        ensure_success(response, what).await
    }

    async fn releases_page(&self, page: usize) -> Result<Vec<Release>> {
        let url = self.repo_url("/releases");
        let request = self
            .request(Method::GET, &url)
            .query(&[("per_page", PAGE_SIZE), ("page", page)]);
        let response = self.send(request, "Failed to list releases").await?;
        response
            .json::<Vec<Release>>()
            .await
            .map_err(|e| BackupError::StoreIo(format!("Failed to parse release listing: {}", e)))
    }

    async fn find_release(&self, tag: &str) -> Result<Option<Release>> {
        let mut page = 1;
        loop {
            let releases = self.releases_page(page).await?;
            let exhausted = releases.len() < PAGE_SIZE;
            if let Some(release) = releases.into_iter().find(|r| r.tag_name == tag) {
                return Ok(Some(release));
            }
            if exhausted {
                return Ok(None);
            }
            page += 1;
        }
    }

    fn delete_request(&self, release_id: u64) -> RequestBuilder {
        let url = self.repo_url(&format!("/releases/{}", release_id));
        self.request(Method::DELETE, &url)
    }

    async fn delete_release(&self, release_id: u64) -> Result<()> {
        send_delete(self.delete_request(release_id)).await
    }
}

/// Draft release whose asset is not uploaded yet.
///
/// Dropped while still armed (the upload future was cancelled or timed out),
/// it deletes the release from a background task.
struct PendingRelease {
    identifier: String,
    delete: Option<RequestBuilder>,
}

impl PendingRelease {
    fn new(identifier: &str, delete: RequestBuilder) -> Self {
        Self {
            identifier: identifier.to_string(),
            delete: Some(delete),
        }
    }

    /// The asset landed; leave the release in place
    fn keep(mut self) {
        self.delete = None;
    }

    /// Delete the release now. Stays armed until the delete completes.
    async fn rollback(mut self) -> Result<()> {
        let Some(request) = self.delete.as_ref().and_then(RequestBuilder::try_clone) else {
            return Ok(());
        };
        let result = send_delete(request).await;
        self.delete = None;
        result
    }
}

impl Drop for PendingRelease {
    fn drop(&mut self) {
        let Some(request) = self.delete.take() else {
            return;
        };
        let identifier = std::mem::take(&mut self.identifier);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(identifier = %identifier, "Upload abandoned, removing draft release in the background");
                handle.spawn(async move {
                    match send_delete(request).await {
                        Ok(()) => info!(identifier = %identifier, "Abandoned draft release removed"),
                        Err(e) => {
                            warn!(identifier = %identifier, error = %e, "Failed to remove abandoned draft release")
                        }
                    }
                });
            }
            Err(_) => warn!(identifier = %identifier, "No runtime left to remove abandoned draft release"),
        }
    }
}

async fn send_delete(request: RequestBuilder) -> Result<()> {
    let response = request
        .send()
        .await
        .map_err(|e| BackupError::StoreIo(format!("Failed to delete release: {}", e)))?;
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(());
    }
    ensure_success(response, "Failed to delete release").await?;
    Ok(())
}

async fn ensure_success(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackupError::StoreIo(format!("{}: HTTP {}: {}", what, status, body.trim())))
}

#[async_trait]
impl ArtifactStore for GitHubReleaseStore {
    async fn upload(
        &self,
        identifier: &str,
        data: Vec<u8>,
        metadata: &UploadMetadata,
    ) -> Result<ArtifactRef> {
        if self.find_release(identifier).await?.is_some() {
            return Err(BackupError::ArtifactExists(identifier.to_string()));
        }

        let body = CreateRelease {
            tag_name: identifier,
            name: metadata.title.as_deref().unwrap_or(identifier),
            body: metadata.description.as_deref().unwrap_or(""),
            // Drafts keep backups out of the public release feed
            draft: true,
        };
        let request = self.request(Method::POST, &self.repo_url("/releases")).json(&body);
        let release: Release = self
            .send(request, "Failed to create release")
            .await?
            .json()
            .await
            .map_err(|e| BackupError::StoreIo(format!("Failed to parse created release: {}", e)))?;

        debug!(identifier, release_id = release.id, "Draft release created");
        // An empty release would later read as NoAssetsInArtifact
        let pending = PendingRelease::new(identifier, self.delete_request(release.id));

        // upload_url is a URI template: ".../assets{?name,label}"
        let upload_url = release
            .upload_url
            .split('{')
            .next()
            .unwrap_or(release.upload_url.as_str())
            .to_string();

        let size_bytes = data.len() as u64;
        let request = self
            .request(Method::POST, &upload_url)
            .query(&[("name", metadata.asset_name.as_str())])
            .header(CONTENT_TYPE, metadata.content_type.as_str())
            .body(data);

        let response = match self.send(request, "Failed to upload release asset").await {
            Ok(response) => {
                pending.keep();
                response
            }
            Err(e) => {
                if let Err(rollback) = pending.rollback().await {
                    warn!(identifier, error = %rollback, "Failed to remove release after asset upload failure");
                }
                return Err(e);
            }
        };
        let asset = response
            .json::<ReleaseAsset>()
            .await
            .map_err(|e| BackupError::StoreIo(format!("Failed to parse uploaded asset: {}", e)))?;

        info!(identifier, asset = %asset.name, size_bytes = asset.size, "Release asset uploaded");

        Ok(ArtifactRef {
            identifier: identifier.to_string(),
            location: asset
                .browser_download_url
                .unwrap_or_else(|| self.repo_url(&format!("/releases/assets/{}", asset.id))),
            size_bytes,
        })
    }

    async fn download(&self, identifier: &str) -> Result<Vec<u8>> {
        let release = self
            .find_release(identifier)
            .await?
            .ok_or_else(|| BackupError::ArtifactNotFound(identifier.to_string()))?;

        let asset = release
            .assets
            .first()
            .ok_or_else(|| BackupError::NoAssetsInArtifact(identifier.to_string()))?;

        debug!(identifier, asset = %asset.name, size_bytes = asset.size, "Downloading release asset");

        let url = self.repo_url(&format!("/releases/assets/{}", asset.id));
        let request = self.request_accepting(Method::GET, &url, OCTET_STREAM);
        let bytes = self
            .send(request, "Failed to download release asset")
            .await?
            .bytes()
            .await
            .map_err(|e| BackupError::StoreIo(format!("Failed to read release asset: {}", e)))?;

        Ok(bytes.to_vec())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ArtifactSummary>> {
        let mut summaries = Vec::new();
        let mut page = 1;
        loop {
            let releases = self.releases_page(page).await?;
            let exhausted = releases.len() < PAGE_SIZE;
            summaries.extend(
                releases
                    .iter()
                    .filter(|release| release.tag_name.starts_with(prefix))
                    .map(Release::summary),
            );
            if exhausted {
                return Ok(summaries);
            }
            page += 1;
        }
    }

    async fn delete(&self, identifier: &str) -> Result<()> {
        match self.find_release(identifier).await? {
            Some(release) => {
                self.delete_release(release.id).await?;
                info!(identifier, release_id = release.id, "Release deleted");
            }
            None => {
                info!(identifier, "Release already absent, nothing to delete");
            }
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "github"
    }
}
