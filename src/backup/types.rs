// Backup System Types - identifiers, environments, stages and retention

use crate::{BackupError, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// chrono format of the `yyyy-MM-dd-HH-mm-ss` timestamp
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

lazy_static! {
    static ref IDENTIFIER_PATTERN: Regex =
        Regex::new(r"^backup-(production|test)-(\d{4}-\d{2}-\d{2}-\d{2}-\d{2}-\d{2})$")
            .expect("identifier pattern is valid");
}

/// Logical deployment a backup belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// The live deployment; dumps drop ownership and ACL statements
    Production,
    /// Everything else
    Test,
}

impl Environment {
    /// Production if either `VERCEL_ENV` or `NODE_ENV` says so
    pub fn detect(node_env: Environment, vercel_env: Option<&str>) -> Self {
        if vercel_env == Some("production") || node_env == Environment::Production {
            Environment::Production
        } else {
            Environment::Test
        }
    }

    /// Lowercase name used in identifiers and asset names
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }

    /// Whether this is [`Environment::Production`]
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    /// Identifier prefix shared by every backup of this environment
    pub fn identifier_prefix(&self) -> String {
        format!("backup-{}-", self.as_str())
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "production" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(BackupError::Config(format!(
                "environment must be 'production' or 'test', got '{}'",
                other
            ))),
        }
    }
}

/// `backup-{environment}-{yyyy-MM-dd-HH-mm-ss}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackupIdentifier {
    environment: Environment,
    timestamp: NaiveDateTime,
}

impl BackupIdentifier {
    /// Identifier for a backup taken at `at` (sub-second precision dropped)
    pub fn new(environment: Environment, at: DateTime<Utc>) -> Self {
        let timestamp = at.naive_utc().with_nanosecond(0).unwrap_or_else(|| at.naive_utc());
        Self {
            environment,
            timestamp,
        }
    }

    /// Parse an identifier, accepting only the exact naming convention
    pub fn parse(identifier: &str) -> Result<Self> {
        let captures = IDENTIFIER_PATTERN.captures(identifier).ok_or_else(|| {
            BackupError::Config(format!("'{}' is not a backup identifier", identifier))
        })?;
        let environment = captures[1].parse()?;
        let timestamp = NaiveDateTime::parse_from_str(&captures[2], TIMESTAMP_FORMAT)
            .map_err(|e| BackupError::Config(format!("invalid timestamp in '{}': {}", identifier, e)))?;
        Ok(Self {
            environment,
            timestamp,
        })
    }

    /// Environment encoded in the identifier
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Timestamp part formatted with [`TIMESTAMP_FORMAT`]
    pub fn timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Creation time as UTC, the basis for retention
    pub fn created_at(&self) -> DateTime<Utc> {
        self.timestamp.and_utc()
    }

    /// Name of the payload file: `{environment}-{timestamp}.sql.enc`
    pub fn asset_name(&self) -> String {
        format!("{}.enc", self.dump_file_name())
    }

    /// Name of the plaintext dump file: `{environment}-{timestamp}.sql`
    pub fn dump_file_name(&self) -> String {
        format!("{}-{}.sql", self.environment, self.timestamp())
    }

    /// Release title
    pub fn title(&self) -> String {
        format!("Database Backup {} {}", self.environment, self.timestamp())
    }
}

impl fmt::Display for BackupIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backup-{}-{}", self.environment, self.timestamp())
    }
}

/// Pipeline position of one backup call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStage {
    /// Nothing has run yet
    Start,
    /// The dump tool produced non-empty SQL
    Dumped,
    /// The SQL was gzip-compressed
    Compressed,
    /// The compressed bytes were sealed into an envelope
    Encrypted,
    /// The envelope reached the artifact store
    Uploaded,
    /// Local scratch files were removed
    CleanedUp,
    /// Some stage returned an error
    Failed,
}

/// Retention tier of a stored artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionTier {
    /// Younger than the daily window
    Daily,
    /// Inside the weekly window
    Weekly,
    /// Inside the monthly window
    Monthly,
    /// Older than every window; eligible for deletion
    Expired,
}

impl RetentionTier {
    /// Everything but `Expired` is kept
    pub fn is_retained(&self) -> bool {
        !matches!(self, RetentionTier::Expired)
    }
}

/// Age windows: daily < 7d, weekly [7d, 30d), monthly [30d, 365d)
///
/// ```
/// use chrono::Duration;
/// use dbvault::backup::{RetentionPolicy, RetentionTier};
///
/// let policy = RetentionPolicy::new().monthly_days(180);
/// policy.validate().unwrap();
/// assert_eq!(policy.classify(Duration::days(20)), RetentionTier::Weekly);
/// assert_eq!(policy.classify(Duration::days(200)), RetentionTier::Expired);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Upper bound (exclusive) of the daily tier
    pub daily: Duration,
    /// Upper bound (exclusive) of the weekly tier
    pub weekly: Duration,
    /// Upper bound (exclusive) of the monthly tier; anything older expires
    pub monthly: Duration,
}

impl RetentionPolicy {
    /// The default 7/30/365-day windows
    pub fn new() -> Self {
        Self {
            daily: Duration::days(7),
            weekly: Duration::days(30),
            monthly: Duration::days(365),
        }
    }

    /// Set the daily window in days
    pub fn daily_days(mut self, days: i64) -> Self {
        self.daily = Duration::days(days);
        self
    }

    /// Set the weekly window in days
    pub fn weekly_days(mut self, days: i64) -> Self {
        self.weekly = Duration::days(days);
        self
    }

    /// Set the monthly window in days
    pub fn monthly_days(mut self, days: i64) -> Self {
        self.monthly = Duration::days(days);
        self
    }

    /// Windows must be positive and strictly increasing
    pub fn validate(&self) -> Result<()> {
        if self.daily <= Duration::zero() || self.daily >= self.weekly || self.weekly >= self.monthly {
            return Err(BackupError::Config(format!(
                "retention windows must satisfy 0 < daily < weekly < monthly (got {}d, {}d, {}d)",
                self.daily.num_days(),
                self.weekly.num_days(),
                self.monthly.num_days()
            )));
        }
        Ok(())
    }

    /// Tier for an artifact of the given age. Future timestamps count as fresh.
    pub fn classify(&self, age: Duration) -> RetentionTier {
        if age < self.daily {
            RetentionTier::Daily
        } else if age < self.weekly {
            RetentionTier::Weekly
        } else if age < self.monthly {
            RetentionTier::Monthly
        } else {
            RetentionTier::Expired
        }
    }

    /// Tier for an artifact created at `created_at`, measured from `now`
    pub fn classify_at(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> RetentionTier {
        self.classify(now.signed_duration_since(created_at))
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a retention sweep with no failed deletions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Artifacts of this environment that were classified
    pub examined: usize,
    /// Kept as daily
    pub daily: usize,
    /// Kept as weekly
    pub weekly: usize,
    /// Kept as monthly
    pub monthly: usize,
    /// Kept because the run had just created them
    pub protected: usize,
    /// Identifiers removed from the store
    pub deleted: Vec<String>,
}

impl SweepReport {
    /// Number of artifacts left in place
    pub fn retained(&self) -> usize {
        self.daily + self.weekly + self.monthly + self.protected
    }

    pub(crate) fn record(&mut self, tier: RetentionTier) {
        match tier {
            RetentionTier::Daily => self.daily += 1,
            RetentionTier::Weekly => self.weekly += 1,
            RetentionTier::Monthly => self.monthly += 1,
            RetentionTier::Expired => {}
        }
    }
}

/// Outcome of a scheduled backup-then-sweep run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledRunReport {
    /// Identifier of the backup this run created
    pub identifier: String,
    /// What the following sweep kept and deleted
    pub sweep: SweepReport,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_identifier_format() {
        let at = Utc.with_ymd_and_hms(2024, 6, 30, 2, 5, 9).unwrap();
        let id = BackupIdentifier::new(Environment::Production, at);

        assert_eq!(id.to_string(), "backup-production-2024-06-30-02-05-09");
        assert_eq!(id.asset_name(), "production-2024-06-30-02-05-09.sql.enc");
        assert_eq!(id.title(), "Database Backup production 2024-06-30-02-05-09");
        assert_eq!(id.created_at(), at);
    }

    #[test]
    fn test_identifier_parse() {
        let id = BackupIdentifier::parse("backup-test-2023-12-01-23-59-59").unwrap();
        assert_eq!(id.environment(), Environment::Test);
        assert_eq!(id.timestamp(), "2023-12-01-23-59-59");

        for bad in [
            "backup-staging-2023-12-01-23-59-59",
            "backup-test-2023-12-01",
            "backup-test-2023-13-01-00-00-00",
            "xbackup-test-2023-12-01-23-59-59",
        ] {
            assert!(BackupIdentifier::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_environment_detection() {
        assert_eq!(Environment::detect(Environment::Test, None), Environment::Test);
        assert_eq!(
            Environment::detect(Environment::Test, Some("production")),
            Environment::Production
        );
        assert_eq!(
            Environment::detect(Environment::Test, Some("preview")),
            Environment::Test
        );
        assert_eq!(
            Environment::detect(Environment::Production, Some("development")),
            Environment::Production
        );
    }

    #[test]
    fn test_tier_boundaries() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.classify(Duration::days(-1)), RetentionTier::Daily);
        assert_eq!(policy.classify(Duration::days(7) - Duration::seconds(1)), RetentionTier::Daily);
        assert_eq!(policy.classify(Duration::days(7)), RetentionTier::Weekly);
        assert_eq!(policy.classify(Duration::days(30)), RetentionTier::Monthly);
        assert_eq!(policy.classify(Duration::days(364)), RetentionTier::Monthly);
        assert_eq!(policy.classify(Duration::days(365)), RetentionTier::Expired);
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetentionPolicy::default().validate().is_ok());
        assert!(RetentionPolicy::default().weekly_days(5).validate().is_err());
        assert!(RetentionPolicy::default().daily_days(0).validate().is_err());
    }
}
