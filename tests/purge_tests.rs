use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use backup_warden::config::RetentionConfig;
use backup_warden::directory::{Directory, StaticDirectory};
use backup_warden::model::{Credentials, Filesource};
use backup_warden::purge::{PurgeEngine, PurgeError};
use backup_warden::storage::backends::MemoryConnector;
use backup_warden::storage::Dispatcher;

const JAN: &str = "01012024000000";
const FEB: &str = "02012024000000";
const MAR: &str = "03012024000000";

/// Amazon and Google memory stores behind one dispatcher
struct Fixture {
    amazon: Arc<MemoryConnector>,
    google: Arc<MemoryConnector>,
    dispatcher: Dispatcher,
}

impl Fixture {
    fn new() -> Self {
        let amazon = Arc::new(MemoryConnector::amazon().with_page_size(3));
        let google = Arc::new(MemoryConnector::google().with_page_size(3));
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(amazon.clone());
        dispatcher.register(google.clone());
        Self {
            amazon,
            google,
            dispatcher,
        }
    }

    fn engine(&self, directory: impl Directory + 'static, dry_run: bool, quantity: usize) -> PurgeEngine {
        PurgeEngine::new(
            self.dispatcher.clone(),
            Arc::new(directory),
            RetentionConfig { dry_run, quantity },
        )
    }
}

async fn add_backup(store: &MemoryConnector, bucket: &str, name: &str) {
    store.create_bucket(bucket).await;
    for file in ["db.sql", "files.tar"] {
        store.put(bucket, &format!("backups/{}/{}", name, file), 10).await.unwrap();
    }
}

fn amazon_directory(installations: &[&str]) -> StaticDirectory {
    StaticDirectory::new(installations.iter().map(|i| i.to_string()).collect(), Default::default())
        .with_filesource("primary", Filesource::amazon(Credentials::default()))
}

fn names(summaries: &[backup_warden::purge::BackupSummary]) -> Vec<&str> {
    summaries.iter().map(|s| s.name.as_str()).collect()
}

#[tokio::test]
async fn test_live_purge_deletes_only_oldest() {
    let fixture = Fixture::new();
    for name in [JAN, FEB, MAR] {
        add_backup(&fixture.amazon, "inst-1", name).await;
    }
    fixture.amazon.put("inst-1", "public/logo.png", 1).await.unwrap();

    let report = fixture.engine(amazon_directory(&["inst-1"]), false, 2).run().await.unwrap();

    let installation = &report.installations[0];
    assert_eq!(installation.backups_found, 3);
    assert_eq!(names(&installation.planned), vec![JAN]);
    assert_eq!(names(&installation.deleted), vec![JAN]);
    assert_eq!(names(&installation.retained), vec![FEB, MAR]);
    assert!(!report.has_failures());

    let live = fixture.amazon.live_keys("inst-1").await;
    assert!(live.iter().all(|key| !key.contains(JAN)));
    assert_eq!(live.len(), 5);
    // the bucket root was never targeted
    assert_eq!(fixture.amazon.bucket_delete_calls().await, 0);
}

#[tokio::test]
async fn test_dry_run_deletes_nothing() {
    let fixture = Fixture::new();
    for name in [JAN, FEB, MAR] {
        add_backup(&fixture.amazon, "inst-1", name).await;
    }

    let report = fixture.engine(amazon_directory(&["inst-1"]), true, 2).run().await.unwrap();

    let installation = &report.installations[0];
    assert!(installation.dry_run);
    assert_eq!(names(&installation.planned), vec![JAN]);
    assert!(installation.deleted.is_empty());
    assert_eq!(fixture.amazon.entry_count("inst-1").await, 6);
}

#[tokio::test]
async fn test_within_quantity_is_skipped() {
    let fixture = Fixture::new();
    for name in [JAN, FEB] {
        add_backup(&fixture.amazon, "inst-1", name).await;
    }

    let report = fixture.engine(amazon_directory(&["inst-1"]), false, 30).run().await.unwrap();

    assert!(report.installations[0].planned.is_empty());
    assert_eq!(report.installations[0].retained.len(), 2);
    assert_eq!(fixture.amazon.entry_count("inst-1").await, 4);
}

#[tokio::test]
async fn test_undated_backups_are_retained_in_live_mode() {
    let fixture = Fixture::new();
    for name in [JAN, FEB, MAR, "manual-snapshot"] {
        add_backup(&fixture.amazon, "inst-1", name).await;
    }

    let report = fixture.engine(amazon_directory(&["inst-1"]), false, 1).run().await.unwrap();

    let installation = &report.installations[0];
    assert_eq!(names(&installation.deleted), vec![JAN, FEB]);
    assert_eq!(names(&installation.undated), vec!["manual-snapshot"]);
    assert_eq!(names(&installation.retained), vec![MAR, "manual-snapshot"]);

    let live = fixture.amazon.live_keys("inst-1").await;
    assert!(live.iter().any(|key| key.contains("manual-snapshot")));
}

#[tokio::test]
async fn test_backups_are_ranked_across_filesources() {
    let fixture = Fixture::new();
    add_backup(&fixture.amazon, "inst-1", JAN).await;
    add_backup(&fixture.google, "inst-1", FEB).await;
    add_backup(&fixture.google, "inst-1", MAR).await;

    let directory = amazon_directory(&["inst-1"])
        .with_filesource("archive", Filesource::google(Credentials::default()));
    let report = fixture.engine(directory, false, 2).run().await.unwrap();

    let installation = &report.installations[0];
    assert_eq!(installation.deleted.len(), 1);
    assert_eq!(installation.deleted[0].name, JAN);
    assert_eq!(installation.deleted[0].filesource_id, "primary");
    assert!(fixture.amazon.live_keys("inst-1").await.is_empty());
    assert_eq!(fixture.google.live_keys("inst-1").await.len(), 4);
}

#[tokio::test]
async fn test_failed_deletion_is_reported() {
    let fixture = Fixture::new();
    for name in [JAN, FEB, MAR] {
        add_backup(&fixture.amazon, "inst-1", name).await;
    }
    fixture
        .amazon
        .fail_deletes_for(&format!("backups/{}/db.sql", JAN))
        .await;

    let report = fixture.engine(amazon_directory(&["inst-1"]), false, 2).run().await.unwrap();

    let installation = &report.installations[0];
    assert!(installation.deleted.is_empty());
    assert_eq!(installation.failures.len(), 1);
    assert_eq!(installation.failures[0].backup.name, JAN);
    assert!(report.has_failures());
}

/// Directory whose lookups fail for selected installations
struct FlakyDirectory {
    inner: StaticDirectory,
    broken: Vec<String>,
    installations_down: bool,
}

#[async_trait]
impl Directory for FlakyDirectory {
    async fn installations(&self) -> Result<Vec<String>> {
        if self.installations_down {
            anyhow::bail!("cluster directory unreachable");
        }
        self.inner.installations().await
    }

    async fn filesources(&self) -> Result<Vec<String>> {
        self.inner.filesources().await
    }

    async fn resolve(&self, filesource_id: &str, installation: &str) -> Result<Option<Filesource>> {
        if self.broken.iter().any(|b| b == installation) {
            anyhow::bail!("no credentials for {}", installation);
        }
        self.inner.resolve(filesource_id, installation).await
    }
}

#[tokio::test]
async fn test_installations_are_isolated() {
    let fixture = Fixture::new();
    for installation in ["inst-1", "inst-2", "inst-3"] {
        for name in [JAN, FEB, MAR] {
            add_backup(&fixture.amazon, installation, name).await;
        }
    }

    let directory = FlakyDirectory {
        inner: amazon_directory(&["inst-1", "inst-2", "inst-3"])
            .with_filesource("legacy", Filesource::new("azure", "blob", Credentials::default())),
        broken: vec!["inst-2".to_string()],
        installations_down: false,
    };
    let report = fixture.engine(directory, false, 2).run().await.unwrap();

    assert_eq!(report.installations.len(), 3);
    for installation in &report.installations {
        match installation.installation.as_str() {
            "inst-2" => {
                assert!(installation.deleted.is_empty());
                assert_eq!(installation.filesource_failures.len(), 2);
            }
            _ => {
                assert_eq!(names(&installation.deleted), vec![JAN]);
                // the unsupported filesource is skipped, not fatal
                assert_eq!(installation.filesource_failures.len(), 1);
                assert_eq!(installation.filesource_failures[0].filesource_id, "legacy");
            }
        }
    }
    assert_eq!(fixture.amazon.entry_count("inst-2").await, 6);
    assert_eq!(fixture.amazon.entry_count("inst-3").await, 4);
}

#[tokio::test]
async fn test_missing_installation_list_fails_run() {
    let fixture = Fixture::new();
    let directory = FlakyDirectory {
        inner: amazon_directory(&["inst-1"]),
        broken: Vec::new(),
        installations_down: true,
    };

    let result = fixture.engine(directory, false, 2).run().await;
    assert!(matches!(result, Err(PurgeError::InstallationsUnavailable(_))));
}

#[tokio::test]
async fn test_installation_without_bucket_has_no_backups() {
    let fixture = Fixture::new();
    let report = fixture.engine(amazon_directory(&["inst-new"]), false, 2).run().await.unwrap();

    assert_eq!(report.installations[0].backups_found, 0);
    assert!(!report.has_failures());
}
