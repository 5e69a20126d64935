// Backup Manager - sequences dump, compression, encryption and upload,
// the reverse for restore, and the retention sweep over stored artifacts

use super::scratch::Scratch;
use super::types::{
    BackupIdentifier, BackupStage, Environment, RetentionPolicy, ScheduledRunReport, SweepReport,
};
use crate::cancel::Guard;
use crate::cipher::{CipherEngine, EncryptionKey};
use crate::compression::{compress_with_level, decompress, DEFAULT_LEVEL};
use crate::config::{Config, StoreConfig};
use crate::driver::DumpDriver;
use crate::envelope::Envelope;
use crate::store::{ArtifactRef, ArtifactStore, ArtifactSummary, GitHubReleaseStore, UploadMetadata};
use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs backups, restores and retention sweeps against one artifact store
pub struct BackupManager {
    store: Arc<dyn ArtifactStore>,
    driver: DumpDriver,
    cipher: CipherEngine,
    environment: Environment,
    database_url: String,
    database_name: Option<String>,
    work_dir: PathBuf,
    retention_policy: RetentionPolicy,
    compression_level: u32,
    store_guard: Guard,
}

impl BackupManager {
    /// Manager with default work directory, retention policy and compression
    /// level, and no timeout on store requests.
    ///
    /// The key is expanded into a cipher here and not kept.
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        driver: DumpDriver,
        key: &EncryptionKey,
        environment: Environment,
        database_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            driver,
            cipher: CipherEngine::new(key),
            environment,
            database_url: database_url.into(),
            database_name: None,
            work_dir: PathBuf::from("./backups"),
            retention_policy: RetentionPolicy::default(),
            compression_level: DEFAULT_LEVEL,
            store_guard: Guard::unbounded(),
        }
    }

    /// Build the manager and its store from process configuration
    pub async fn from_config(config: Config) -> Result<Self> {
        Self::from_config_with_cancellation(config, CancellationToken::new()).await
    }

    /// Same as [`from_config`](Self::from_config), cancelled through `token`
    pub async fn from_config_with_cancellation(
        config: Config,
        token: CancellationToken,
    ) -> Result<Self> {
        let store: Arc<dyn ArtifactStore> = match config.store.clone() {
            StoreConfig::GitHub(github) => Arc::new(GitHubReleaseStore::new(github)?),
            #[cfg(feature = "s3")]
            StoreConfig::S3(s3) => Arc::new(crate::store::S3ArtifactStore::new(s3).await?),
        };

        let driver = DumpDriver::new(
            config.driver.clone(),
            config.environment,
            Guard::new(token.clone(), config.tool_timeout),
        );

        info!(
            environment = %config.environment,
            store = store.backend(),
            work_dir = %config.work_dir.display(),
            "Backup manager configured"
        );

        let mut manager = Self::new(
            store,
            driver,
            &config.encryption_key,
            config.environment,
            config.database_url.clone(),
        )
        .with_work_dir(config.work_dir.clone())
        .with_retention_policy(config.retention.clone())
        .with_compression_level(config.compression_level)
        .with_store_guard(Guard::new(token, config.store_timeout));
        manager.database_name = config.database_name().map(str::to_string);
        Ok(manager)
    }

    /// Root under which each call creates its own scratch directory
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Windows used by [`sweep_retention`](Self::sweep_retention)
    pub fn with_retention_policy(mut self, policy: RetentionPolicy) -> Self {
        self.retention_policy = policy;
        self
    }

    /// gzip level for new backups, clamped to 9
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9); // Max level is 9
        self
    }

    /// Timeout and cancellation applied to every store request
    pub fn with_store_guard(mut self, guard: Guard) -> Self {
        self.store_guard = guard;
        self
    }

    /// Environment whose identifiers this manager creates and sweeps
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Dump, compress, encrypt and upload; returns the new identifier
    pub async fn backup(&self) -> Result<String> {
        self.backup_at(Utc::now()).await
    }

    /// Backup whose identifier is derived from `now`
    pub async fn backup_at(&self, now: DateTime<Utc>) -> Result<String> {
        let identifier = BackupIdentifier::new(self.environment, now);
        let id = identifier.to_string();

        info!(identifier = %id, store = self.store.backend(), "Starting backup");

        let mut scratch = Scratch::create(&self.work_dir).await?;
        let mut stage = BackupStage::Start;
        let outcome = self.run_backup(&identifier, &mut scratch, &mut stage).await;

        // Local files go on every path; a cleanup problem never masks the outcome
        if let Err(e) = scratch.cleanup().await {
            warn!(identifier = %id, error = %e, "Failed to clean up temporary files");
        }

        match outcome {
            Ok(artifact) => {
                stage = BackupStage::CleanedUp;
                info!(
                    identifier = %id,
                    location = %artifact.location,
                    size_bytes = artifact.size_bytes,
                    stage = ?stage,
                    "Backup completed successfully"
                );
                Ok(id)
            }
            Err(e) => {
                error!(identifier = %id, stage = ?BackupStage::Failed, failed_after = ?stage, error = %e, "Backup failed");
                Err(e)
            }
        }
    }

    async fn run_backup(
        &self,
        identifier: &BackupIdentifier,
        scratch: &mut Scratch,
        stage: &mut BackupStage,
    ) -> Result<ArtifactRef> {
        let id = identifier.to_string();

        let dump = self.driver.dump(&self.database_url).await?;
        scratch.write(&identifier.dump_file_name(), &dump).await?;
        *stage = BackupStage::Dumped;
        debug!(identifier = %id, stage = ?stage, bytes = dump.len(), "Stage complete");

        let compressed = compress_with_level(&dump, self.compression_level)?;
        drop(dump);
        scratch
            .write(&format!("{}.gz", identifier.dump_file_name()), &compressed)
            .await?;
        *stage = BackupStage::Compressed;
        debug!(identifier = %id, stage = ?stage, bytes = compressed.len(), "Stage complete");

        let payload = self.cipher.seal(&compressed)?;
        let encrypted_path = scratch.write(&identifier.asset_name(), &payload).await?;
        *stage = BackupStage::Encrypted;
        debug!(identifier = %id, stage = ?stage, bytes = payload.len(), "Stage complete");

        // Upload what landed on disk
        let data = tokio::fs::read(&encrypted_path).await.map_err(|e| {
            BackupError::Io(format!("Failed to read {}: {}", encrypted_path.display(), e))
        })?;

        let mut description = format!(
            "Database backup for {} environment\nTimestamp: {}",
            self.environment,
            identifier.timestamp()
        );
        if let Some(ref name) = self.database_name {
            description.push_str(&format!("\nDatabase: {}", name));
        }
        let metadata = UploadMetadata::octet_stream(identifier.asset_name(), data.len() as u64)
            .with_title(identifier.title())
            .with_description(description);

        let artifact = self
            .store_guard
            .run("upload", self.store.upload(&id, data, &metadata))
            .await?;
        *stage = BackupStage::Uploaded;
        debug!(identifier = %id, stage = ?stage, "Stage complete");

        Ok(artifact)
    }

    /// Download, decrypt, decompress and load into the database.
    /// The remote artifact is left untouched.
    pub async fn restore(&self, identifier: &str) -> Result<()> {
        info!(identifier, store = self.store.backend(), "Starting backup restoration");

        let mut scratch = Scratch::create(&self.work_dir).await?;
        let outcome = self.run_restore(identifier, &mut scratch).await;

        if let Err(e) = scratch.cleanup().await {
            warn!(identifier, error = %e, "Failed to clean up temporary files");
        }

        match &outcome {
            Ok(()) => info!(identifier, "Database restored successfully"),
            Err(e) => error!(identifier, error = %e, "Restore failed"),
        }
        outcome
    }

    async fn run_restore(&self, identifier: &str, scratch: &mut Scratch) -> Result<()> {
        let payload = self
            .store_guard
            .run("download", self.store.download(identifier))
            .await?;
        let encrypted_path = scratch.write("backup.enc", &payload).await?;
        drop(payload);

        let mut file = tokio::fs::File::open(&encrypted_path).await.map_err(|e| {
            BackupError::Io(format!("Failed to open {}: {}", encrypted_path.display(), e))
        })?;
        let envelope = Envelope::read_from(&mut file).await?;
        debug!(identifier, bytes = envelope.len(), "Envelope read");

        let compressed = self.cipher.open(&envelope)?;
        scratch.write("backup.gz", &compressed).await?;

        let sql = decompress(&compressed)?;
        scratch.write("backup.sql", &sql).await?;
        debug!(identifier, bytes = sql.len(), "Backup decrypted and decompressed");

        self.driver.restore(&self.database_url, &sql).await
    }

    /// Backups of this environment, in store order
    pub async fn list_backups(&self) -> Result<Vec<ArtifactSummary>> {
        let prefix = self.environment.identifier_prefix();
        self.store_guard.run("list", self.store.list(&prefix)).await
    }

    /// Delete every artifact of this environment older than the policy keeps
    pub async fn sweep_retention(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        self.sweep(now, None).await
    }

    async fn sweep(&self, now: DateTime<Utc>, protect: Option<&str>) -> Result<SweepReport> {
        let artifacts = self.list_backups().await?;
        let mut report = SweepReport::default();
        let mut failures = Vec::new();

        info!(
            artifacts = artifacts.len(),
            now = %now,
            "Starting retention sweep"
        );

        for artifact in artifacts {
            report.examined += 1;

            if protect == Some(artifact.identifier.as_str()) {
                report.protected += 1;
                continue;
            }

            let tier = self.retention_policy.classify_at(artifact.created_at, now);
            if tier.is_retained() {
                report.record(tier);
                debug!(identifier = %artifact.identifier, tier = ?tier, "Retained");
                continue;
            }

            match self
                .store_guard
                .run("delete", self.store.delete(&artifact.identifier))
                .await
            {
                Ok(()) => {
                    info!(identifier = %artifact.identifier, created_at = %artifact.created_at, "Deleted old backup");
                    report.deleted.push(artifact.identifier);
                }
                Err(e @ BackupError::Cancelled(_)) => return Err(e),
                Err(e) => {
                    warn!(identifier = %artifact.identifier, error = %e, "Failed to delete old backup");
                    failures.push((artifact.identifier, e.to_string()));
                }
            }
        }

        if !failures.is_empty() {
            return Err(BackupError::RetentionSweepFailed {
                deleted: report.deleted.len(),
                failures,
            });
        }

        info!(
            examined = report.examined,
            retained = report.retained(),
            deleted = report.deleted.len(),
            "Retention sweep finished"
        );
        Ok(report)
    }

    /// Backup followed by a sweep that never touches the new backup.
    /// A failed backup skips the sweep.
    pub async fn run_scheduled(&self, now: DateTime<Utc>) -> Result<ScheduledRunReport> {
        let identifier = self.backup_at(now).await?;

        match self.sweep(now, Some(&identifier)).await {
            Ok(sweep) => {
                info!(identifier = %identifier, "Automated backup completed successfully");
                Ok(ScheduledRunReport { identifier, sweep })
            }
            Err(e) => {
                error!(identifier = %identifier, error = %e, "Backup stored but retention sweep failed");
                Err(e)
            }
        }
    }
}
