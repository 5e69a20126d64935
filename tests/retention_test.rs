// Retention sweep tests against an in-memory store, including a store that
// refuses some deletions

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use dbvault::backup::{BackupManager, Environment, RetentionPolicy, RetentionTier};
use dbvault::cancel::Guard;
use dbvault::cipher::EncryptionKey;
use dbvault::driver::{DriverConfig, DumpDriver};
use dbvault::store::{ArtifactRef, ArtifactStore, ArtifactSummary, MemoryArtifactStore, UploadMetadata};
use dbvault::{BackupError, Result};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::Arc;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap()
}

fn manager(store: Arc<dyn ArtifactStore>) -> BackupManager {
    let driver = DumpDriver::new(DriverConfig::default(), Environment::Production, Guard::unbounded());
    BackupManager::new(
        store,
        driver,
        &EncryptionKey::new([1u8; 32]),
        Environment::Production,
        "postgres://localhost/analytics",
    )
}

fn seed(store: &MemoryArtifactStore, identifier: &str, created_at: DateTime<Utc>) {
    store.insert(identifier, format!("{identifier}.sql.enc"), vec![0u8; 64], created_at);
}

/// Delegates to a memory store but fails deletions of selected identifiers
struct FlakyStore {
    inner: MemoryArtifactStore,
    refuse: HashSet<String>,
}

#[async_trait]
impl ArtifactStore for FlakyStore {
    async fn upload(&self, identifier: &str, data: Vec<u8>, metadata: &UploadMetadata) -> Result<ArtifactRef> {
        self.inner.upload(identifier, data, metadata).await
    }

    async fn download(&self, identifier: &str) -> Result<Vec<u8>> {
        self.inner.download(identifier).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ArtifactSummary>> {
        self.inner.list(prefix).await
    }

    async fn delete(&self, identifier: &str) -> Result<()> {
        if self.refuse.contains(identifier) {
            return Err(BackupError::StoreIo(format!("403 Forbidden deleting {identifier}")));
        }
        self.inner.delete(identifier).await
    }

    fn backend(&self) -> &'static str {
        "flaky"
    }
}

#[test]
fn test_classification_by_date() {
    let policy = RetentionPolicy::default();
    let at = |y, m, d| Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap();

    assert_eq!(policy.classify_at(at(2024, 6, 29), now()), RetentionTier::Daily);
    assert_eq!(policy.classify_at(at(2024, 6, 24), now()), RetentionTier::Daily);
    assert_eq!(policy.classify_at(at(2024, 6, 23), now()), RetentionTier::Weekly);
    assert_eq!(policy.classify_at(at(2024, 6, 1), now()), RetentionTier::Weekly);
    assert_eq!(policy.classify_at(at(2024, 5, 31), now()), RetentionTier::Monthly);
    assert_eq!(policy.classify_at(at(2023, 7, 2), now()), RetentionTier::Monthly);
    assert_eq!(policy.classify_at(at(2023, 7, 1), now()), RetentionTier::Expired);
    assert_eq!(policy.classify_at(at(2020, 1, 1), now()), RetentionTier::Expired);
    assert_eq!(policy.classify_at(at(2024, 7, 15), now()), RetentionTier::Daily);
}

#[test]
fn test_classification_of_documented_examples() {
    let policy = RetentionPolicy::default();
    let at = |y, m, d| Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap();

    // 5, 20 and 121 days old, then well past a year
    assert_eq!(policy.classify_at(at(2024, 6, 25), now()), RetentionTier::Daily);
    assert_eq!(policy.classify_at(at(2024, 6, 10), now()), RetentionTier::Weekly);
    assert_eq!(policy.classify_at(at(2024, 3, 1), now()), RetentionTier::Monthly);
    assert_eq!(policy.classify_at(at(2022, 1, 1), now()), RetentionTier::Expired);
    assert!(!RetentionTier::Expired.is_retained());
    assert!(RetentionTier::Monthly.is_retained());
}

#[test]
fn test_custom_windows() {
    let policy = RetentionPolicy::new().daily_days(2).weekly_days(14).monthly_days(90);
    policy.validate().expect("Policy should be valid");

    assert_eq!(policy.classify(Duration::days(1)), RetentionTier::Daily);
    assert_eq!(policy.classify(Duration::days(2)), RetentionTier::Weekly);
    assert_eq!(policy.classify(Duration::days(14)), RetentionTier::Monthly);
    assert_eq!(policy.classify(Duration::days(90)), RetentionTier::Expired);
}

#[tokio::test]
async fn test_sweep_deletes_only_expired() {
    let store = MemoryArtifactStore::new();
    seed(&store, "backup-production-2024-06-29-00-00-00", now() - Duration::days(1));
    seed(&store, "backup-production-2024-06-15-00-00-00", now() - Duration::days(15));
    seed(&store, "backup-production-2024-01-01-00-00-00", now() - Duration::days(181));
    seed(&store, "backup-production-2023-01-01-00-00-00", now() - Duration::days(546));
    seed(&store, "backup-production-2022-01-01-00-00-00", now() - Duration::days(911));
    // Other environments are never touched
    seed(&store, "backup-test-2020-01-01-00-00-00", now() - Duration::days(1642));

    let manager = manager(Arc::new(store.clone()));
    let report = manager.sweep_retention(now()).await.expect("Sweep failed");

    assert_eq!(report.examined, 5);
    assert_eq!((report.daily, report.weekly, report.monthly), (1, 1, 1));
    let mut deleted = report.deleted.clone();
    deleted.sort();
    assert_eq!(
        deleted,
        vec![
            "backup-production-2022-01-01-00-00-00".to_string(),
            "backup-production-2023-01-01-00-00-00".to_string(),
        ]
    );
    assert_eq!(store.len(), 4);
    assert!(store.contains("backup-test-2020-01-01-00-00-00"));
}

#[tokio::test]
async fn test_sweep_of_empty_store() {
    let manager = manager(Arc::new(MemoryArtifactStore::new()));

    let report = manager.sweep_retention(now()).await.expect("Sweep failed");

    assert_eq!(report.examined, 0);
    assert!(report.deleted.is_empty());
}

#[tokio::test]
async fn test_sweep_continues_past_failed_deletions() {
    let inner = MemoryArtifactStore::new();
    seed(&inner, "backup-production-2022-01-01-00-00-00", now() - Duration::days(911));
    seed(&inner, "backup-production-2022-06-01-00-00-00", now() - Duration::days(760));
    seed(&inner, "backup-production-2023-01-01-00-00-00", now() - Duration::days(546));
    seed(&inner, "backup-production-2024-06-29-00-00-00", now() - Duration::days(1));

    let store = FlakyStore {
        inner: inner.clone(),
        refuse: HashSet::from(["backup-production-2022-06-01-00-00-00".to_string()]),
    };
    let manager = manager(Arc::new(store));

    match manager.sweep_retention(now()).await {
        Err(BackupError::RetentionSweepFailed { deleted, failures }) => {
            assert_eq!(deleted, 2);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].0, "backup-production-2022-06-01-00-00-00");
            assert!(failures[0].1.contains("403"));
        }
        other => panic!("expected RetentionSweepFailed, got {other:?}"),
    }

    assert!(!inner.contains("backup-production-2022-01-01-00-00-00"));
    assert!(inner.contains("backup-production-2022-06-01-00-00-00"));
    assert!(!inner.contains("backup-production-2023-01-01-00-00-00"));
    assert!(inner.contains("backup-production-2024-06-29-00-00-00"));
}

#[tokio::test]
async fn test_sweep_aborts_when_cancelled() {
    let store = MemoryArtifactStore::new();
    seed(&store, "backup-production-2022-01-01-00-00-00", now() - Duration::days(911));

    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();
    let manager = manager(Arc::new(store.clone())).with_store_guard(Guard::new(token, None));

    let err = manager.sweep_retention(now()).await.unwrap_err();

    assert!(matches!(err, BackupError::Cancelled(_)), "got {err:?}");
    assert_eq!(store.len(), 1);
}

#[test]
fn test_sweep_error_message_lists_failures() {
    let err = BackupError::RetentionSweepFailed {
        deleted: 3,
        failures: vec![
            ("backup-production-a".to_string(), "timeout".to_string()),
            ("backup-production-b".to_string(), "403".to_string()),
        ],
    };

    assert_eq!(
        err.to_string(),
        "Retention sweep deleted 3 artifact(s) but 2 deletion(s) failed: backup-production-a: timeout; backup-production-b: 403"
    );
}
