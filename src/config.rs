//! Typed process configuration, read once at startup and validated eagerly.
//!
//! Every recognised variable is listed here; nothing else in the crate reads
//! the environment.

use crate::backup::{Environment, RetentionPolicy};
use crate::cipher::EncryptionKey;
use crate::compression::DEFAULT_LEVEL;
use crate::driver::DriverConfig;
use crate::store::GitHubConfig;
#[cfg(feature = "s3")]
use crate::store::S3Config;
use crate::{BackupError, Result};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Which artifact store backs this deployment
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// Draft releases in a GitHub repository
    GitHub(GitHubConfig),
    /// Objects in an S3 bucket
    #[cfg(feature = "s3")]
    S3(S3Config),
}

/// Everything the backup tool needs, resolved up front
#[derive(Clone)]
pub struct Config {
    /// Connection string handed to the dump and load tools
    pub database_url: String,
    /// AES-256-GCM key
    pub encryption_key: EncryptionKey,
    /// Naming and tool-flag discriminator
    pub environment: Environment,
    /// Artifact store selection
    pub store: StoreConfig,
    /// Dump and load tools
    pub driver: DriverConfig,
    /// Root for per-call scratch directories
    pub work_dir: PathBuf,
    /// gzip level 0-9
    pub compression_level: u32,
    /// Retention windows
    pub retention: RetentionPolicy,
    /// Limit for each dump/load tool run
    pub tool_timeout: Option<Duration>,
    /// Limit for each store request
    pub store_timeout: Option<Duration>,
}

impl Config {
    /// Read from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read through an arbitrary lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let required = |name: &str| {
            get(name).ok_or_else(|| BackupError::Config(format!("{} is required", name)))
        };

        let database_url = required("DATABASE_URL")?;
        let encryption_key = EncryptionKey::from_hex(&required("BACKUP_ENCRYPTION_KEY")?)?;

        let node_env: Environment = required("NODE_ENV")?
            .parse()
            .map_err(|_| BackupError::Config("NODE_ENV must be 'production' or 'test'".to_string()))?;
        let vercel_env = get("VERCEL_ENV");
        if let Some(ref value) = vercel_env {
            if !matches!(value.as_str(), "production" | "preview" | "development") {
                return Err(BackupError::Config(format!(
                    "VERCEL_ENV must be 'production', 'preview' or 'development', got '{}'",
                    value
                )));
            }
        }
        let environment = Environment::detect(node_env, vercel_env.as_deref());

        let store = match get("BACKUP_STORE").as_deref().unwrap_or("github") {
            "github" => {
                let mut github = GitHubConfig::new(
                    required("GITHUB_TOKEN")?,
                    required("GITHUB_OWNER")?,
                    required("GITHUB_REPO")?,
                );
                if let Some(api_url) = get("GITHUB_API_URL") {
                    github = github.with_api_url(api_url);
                }
                StoreConfig::GitHub(github)
            }
            #[cfg(feature = "s3")]
            "s3" => StoreConfig::S3(S3Config {
                bucket_name: required("BACKUP_BUCKET")?,
                region: required("AWS_REGION")?,
                key_prefix: get("S3_KEY_PREFIX")
                    .unwrap_or_else(|| format!("backups/{}/", environment)),
                endpoint_url: get("S3_ENDPOINT_URL"),
                force_path_style: parse_flag(get("S3_FORCE_PATH_STYLE").as_deref(), "S3_FORCE_PATH_STYLE")?,
            }),
            #[cfg(not(feature = "s3"))]
            "s3" => {
                return Err(BackupError::Config(
                    "BACKUP_STORE=s3 requires the 's3' feature".to_string(),
                ))
            }
            other => {
                return Err(BackupError::Config(format!(
                    "BACKUP_STORE must be 'github' or 's3', got '{}'",
                    other
                )))
            }
        };

        let mut driver = DriverConfig::default();
        if let Some(path) = get("PG_DUMP_PATH") {
            driver.dump_tool = PathBuf::from(path);
        }
        if let Some(path) = get("PSQL_PATH") {
            driver.restore_tool = PathBuf::from(path);
        }

        let compression_level = match get("BACKUP_COMPRESSION_LEVEL") {
            Some(raw) => {
                let level = parse_number::<u32>(&raw, "BACKUP_COMPRESSION_LEVEL")?;
                if level > 9 {
                    return Err(BackupError::Config(format!(
                        "BACKUP_COMPRESSION_LEVEL must be 0-9, got {}",
                        level
                    )));
                }
                level
            }
            None => DEFAULT_LEVEL,
        };

        let mut retention = RetentionPolicy::default();
        if let Some(raw) = get("RETENTION_DAILY_DAYS") {
            retention = retention.daily_days(parse_number(&raw, "RETENTION_DAILY_DAYS")?);
        }
        if let Some(raw) = get("RETENTION_WEEKLY_DAYS") {
            retention = retention.weekly_days(parse_number(&raw, "RETENTION_WEEKLY_DAYS")?);
        }
        if let Some(raw) = get("RETENTION_MONTHLY_DAYS") {
            retention = retention.monthly_days(parse_number(&raw, "RETENTION_MONTHLY_DAYS")?);
        }
        retention.validate()?;

        let tool_timeout = get("DBVAULT_TOOL_TIMEOUT_SECS")
            .map(|raw| parse_number::<u64>(&raw, "DBVAULT_TOOL_TIMEOUT_SECS").map(Duration::from_secs))
            .transpose()?;
        let store_timeout = get("DBVAULT_STORE_TIMEOUT_SECS")
            .map(|raw| parse_number::<u64>(&raw, "DBVAULT_STORE_TIMEOUT_SECS").map(Duration::from_secs))
            .transpose()?;

        Ok(Self {
            database_url,
            encryption_key,
            environment,
            store,
            driver,
            work_dir: get("BACKUP_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./backups")),
            compression_level,
            retention,
            tool_timeout,
            store_timeout,
        })
    }

    /// Database name from the connection string path, for release notes
    pub fn database_name(&self) -> Option<&str> {
        let without_query = self.database_url.split('?').next()?;
        let after_authority = without_query.split("://").nth(1)?;
        let (_, name) = after_authority.split_once('/')?;
        (!name.is_empty()).then_some(name)
    }
}

fn parse_number<T>(raw: &str, name: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| BackupError::Config(format!("{} is not a valid number: {}", name, e)))
}

#[cfg(feature = "s3")]
fn parse_flag(raw: Option<&str>, name: &str) -> Result<bool> {
    match raw.map(|value| value.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(value) => match value.as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            other => Err(BackupError::Config(format!("{} must be true or false, got '{}'", name, other))),
        },
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Connection strings usually carry a password
        f.debug_struct("Config")
            .field("database_url", &"<redacted>")
            .field("encryption_key", &self.encryption_key)
            .field("environment", &self.environment)
            .field("store", &self.store)
            .field("driver", &self.driver)
            .field("work_dir", &self.work_dir)
            .field("compression_level", &self.compression_level)
            .field("retention", &self.retention)
            .field("tool_timeout", &self.tool_timeout)
            .field("store_timeout", &self.store_timeout)
            .finish()
    }
}
