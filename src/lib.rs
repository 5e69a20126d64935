//! # dbvault
//!
//! Encrypted backup, restore and retention for the analytics dashboard's
//! PostgreSQL database.
//!
//! ## Overview
//!
//! A backup is a linear pipeline: the database is dumped with `pg_dump`,
//! gzip-compressed, sealed with AES-256-GCM and uploaded to an artifact store
//! under a timestamped identifier. Restore runs the same pipeline backwards
//! and feeds the SQL to `psql`. A retention sweep prunes old artifacts by age.
//!
//! ```rust,no_run
//! use dbvault::backup::BackupManager;
//! use dbvault::config::Config;
//!
//! # async fn example() -> dbvault::Result<()> {
//! let config = Config::from_env()?;
//! let manager = BackupManager::from_config(config).await?;
//!
//! let identifier = manager.backup().await?;
//! manager.restore(&identifier).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`envelope`]: IV ‖ ciphertext ‖ tag framing
//! - [`compression`]: gzip wrapper
//! - [`cipher`]: AES-256-GCM with a 16-byte IV
//! - [`driver`]: `pg_dump` / `psql` subprocesses
//! - [`store`]: artifact stores (GitHub releases, S3, memory)
//! - [`backup`]: orchestration and retention
//! - [`config`]: typed process configuration

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for dbvault operations
pub type Result<T> = std::result::Result<T, BackupError>;

/// Main error type for backup, restore and retention
#[derive(Error, Debug)]
pub enum BackupError {
    /// The dump tool exited non-zero or could not be started
    #[error("{tool} failed ({status}): {stderr}")]
    DumpToolFailure {
        /// Tool that was invoked
        tool: String,
        /// Exit status description
        status: String,
        /// Captured diagnostic stream
        stderr: String,
    },

    /// The dump tool succeeded but wrote nothing useful
    #[error("Dump produced no output")]
    EmptyDumpResult,

    /// The load tool exited non-zero or could not be started
    #[error("{tool} failed ({status}): {stderr}")]
    RestoreToolFailure {
        /// Tool that was invoked
        tool: String,
        /// Exit status description
        status: String,
        /// Captured diagnostic stream
        stderr: String,
    },

    /// Payload too short or otherwise not an envelope
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// GCM tag did not verify (tampered data, wrong key or wrong IV)
    #[error("Authentication failure: backup payload did not verify")]
    AuthenticationFailure,

    /// No artifact with this identifier
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    /// The artifact container exists but holds no payload
    #[error("No backup assets found in artifact {0}")]
    NoAssetsInArtifact(String),

    /// Refusing to overwrite an existing artifact
    #[error("Artifact already exists: {0}")]
    ArtifactExists(String),

    /// Network, permission or protocol error from the artifact store
    #[error("Store error: {0}")]
    StoreIo(String),

    /// Local temporary file could not be removed
    #[error("Cleanup error: {0}")]
    Cleanup(String),

    /// gzip failure
    #[error("Compression error: {0}")]
    Compression(String),

    /// Local filesystem error
    #[error("IO error: {0}")]
    Io(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timed out or cancelled at a subprocess or network boundary
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// One or more deletions failed during a retention sweep
    #[error("Retention sweep deleted {deleted} artifact(s) but {} deletion(s) failed: {}", .failures.len(), join_failures(.failures))]
    RetentionSweepFailed {
        /// Artifacts deleted before and after the failures
        deleted: usize,
        /// Identifier and error message per failed deletion
        failures: Vec<(String, String)>,
    },
}

fn join_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(identifier, error)| format!("{identifier}: {error}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Artifact framing
pub mod envelope;

/// gzip compression
pub mod compression;

/// AES-256-GCM
pub mod cipher;

/// External dump and load tools
pub mod driver;

/// Artifact stores
pub mod store;

/// Backup orchestration and retention
pub mod backup;

/// Process configuration
pub mod config;

/// Timeouts and cancellation
pub mod cancel;

pub use backup::{BackupIdentifier, BackupManager, Environment};
pub use config::Config;
