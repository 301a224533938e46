use async_trait::async_trait;
use chrono::NaiveDate;
use futures::TryStreamExt;
use serde::{Serialize, Deserialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::model::{BackupManifest, Credentials, DeleteMarker, FileVersions, ObjectVersion, BACKUPS_PREFIX};
use crate::storage::locator::Locator;
use crate::storage::retry::{self, RetryDecision, RetryPolicy};
use crate::storage::{batch, naming, pager, transfer};

/// Storage providers the system knows how to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Amazon,
    Google,
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "amazon" => Ok(Provider::Amazon),
            "google" => Ok(Provider::Google),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Amazon => write!(f, "amazon"),
            Provider::Google => write!(f, "google"),
        }
    }
}

/// Storage products offered by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Product {
    S3,
    Storage,
}

impl std::str::FromStr for Product {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s3" => Ok(Product::S3),
            "storage" => Ok(Product::Storage),
            _ => Err(format!("Unknown product: {}", s)),
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Product::S3 => write!(f, "s3"),
            Product::Storage => write!(f, "storage"),
        }
    }
}

/// Registry key: exactly one connector per (provider, product)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectorKind {
    pub provider: Provider,
    pub product: Product,
}

impl ConnectorKind {
    pub const AMAZON_S3: ConnectorKind = ConnectorKind { provider: Provider::Amazon, product: Product::S3 };
    pub const GOOGLE_STORAGE: ConnectorKind = ConnectorKind { provider: Provider::Google, product: Product::Storage };
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.product)
    }
}

/// Continuation cursor between two listing pages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// S3 style: resume after the last seen key (and version of that key)
    KeyMarker { key: String, version_id: Option<String> },
    /// GCS style: opaque page token
    Token(String),
}

/// One page of a version listing. Paths are raw bucket keys.
#[derive(Debug, Clone, Default)]
pub struct VersionPage {
    pub versions: Vec<ObjectVersion>,
    pub delete_markers: Vec<DeleteMarker>,
    pub next: Option<PageCursor>,
}

/// Fully qualified object address used by copies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
    pub version_id: Option<String>,
}

/// One atomic copy unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyCommand {
    pub source: ObjectLocation,
    pub destination: ObjectLocation,
}

/// Bucket configuration applied to dedicated installation buckets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketSettings {
    pub versioning: bool,
    pub encryption: bool,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Default for BucketSettings {
    fn default() -> Self {
        Self {
            versioning: true,
            encryption: true,
            tags: BTreeMap::new(),
        }
    }
}

/// A single item that failed inside a batch operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub bucket: String,
    pub path: String,
    pub version_id: Option<String>,
    pub error: String,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version_id {
            Some(version) => write!(f, "{}/{}@{}: {}", self.bucket, self.path, version, self.error),
            None => write!(f, "{}/{}: {}", self.bucket, self.path, self.error),
        }
    }
}

/// Errors produced by connectors, the dispatcher and the batch engines
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Unsupported provider/product pair: {provider}/{product}")]
    UnsupportedProvider { provider: String, product: String },

    #[error("Unsupported transfer from {from} to {to}: cross-provider copies need a download/upload path")]
    UnsupportedTransfer { from: String, to: String },

    #[error("Cannot parse a date from backup name '{name}': {reason}")]
    DateParse { name: String, reason: String },

    #[error("Invalid bucket layout for installation {installation}: {message}")]
    InvalidLocator { installation: String, message: String },

    #[error("Invalid credentials: {message}")]
    InvalidCredentials { message: String },

    #[error("Batch finished with {} failed items ({succeeded} succeeded)", .failures.len())]
    AggregateBatch { succeeded: usize, failures: Vec<BatchFailure> },

    #[error("Deleted {deleted} items but bucket {bucket} could not be removed: {message}")]
    BucketDeletion { bucket: String, deleted: usize, message: String },
}

impl StorageError {
    pub fn provider(message: impl Into<String>) -> Self {
        StorageError::Provider { message: message.into() }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        StorageError::NotFound { resource: resource.into() }
    }

    /// Only opaque provider failures are worth retrying
    pub fn retry_decision(&self) -> RetryDecision {
        match self {
            StorageError::Provider { .. } => RetryDecision::Retry,
            StorageError::NotFound { .. }
            | StorageError::UnsupportedProvider { .. }
            | StorageError::UnsupportedTransfer { .. }
            | StorageError::DateParse { .. }
            | StorageError::InvalidLocator { .. }
            | StorageError::InvalidCredentials { .. }
            | StorageError::AggregateBatch { .. }
            | StorageError::BucketDeletion { .. } => RetryDecision::NoRetry,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Provider capability contract.
///
/// Implementors supply the provider primitives (one listing page, one version delete,
/// bucket delete, one pinned copy, bucket settings and the "current version" rule);
/// the contract operations are provided on top of them and shared by every provider.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The (provider, product) pair this connector serves
    fn kind(&self) -> ConnectorKind;

    /// Fetch one page of versions and delete markers under `prefix` (a raw bucket key prefix)
    async fn list_versions_page(
        &self,
        locator: &Locator,
        prefix: &str,
        cursor: Option<PageCursor>,
        credentials: &Credentials,
    ) -> Result<VersionPage, StorageError>;

    /// Delete exactly one version of a raw bucket key
    async fn remove_version(
        &self,
        locator: &Locator,
        key: &str,
        version_id: &str,
        credentials: &Credentials,
    ) -> Result<(), StorageError>;

    /// Delete the bucket container itself
    async fn remove_bucket(&self, locator: &Locator, credentials: &Credentials) -> Result<(), StorageError>;

    /// Copy one pinned source version to its destination
    async fn copy_version(
        &self,
        command: &CopyCommand,
        source_credentials: &Credentials,
        destination_credentials: &Credentials,
    ) -> Result<(), StorageError>;

    /// Apply versioning/encryption/tag settings to a dedicated bucket
    async fn apply_bucket_settings(
        &self,
        locator: &Locator,
        settings: &BucketSettings,
        credentials: &Credentials,
    ) -> Result<(), StorageError>;

    /// Reduce manifest entries to the version that was current at backup time
    fn current_versions(&self, entries: &[ObjectVersion]) -> Vec<ObjectVersion>;

    /// Backoff policy for bucket mutations
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// List every version and delete marker under `prefix`, draining all pages.
    /// Returned paths are relative to the installation.
    async fn list_file_versions(
        &self,
        installation: &str,
        prefix: &str,
        credentials: &Credentials,
    ) -> Result<FileVersions, StorageError> {
        let locator = Locator::resolve(installation, credentials)?;
        let mut pages = pager::version_pages(self, &locator, locator.key(prefix), credentials);
        let mut all = FileVersions::default();

        while let Some(page) = pages.try_next().await? {
            all.versions.extend(page.versions.into_iter().map(|mut version| {
                version.path = locator.relative(&version.path).to_string();
                version
            }));
            all.delete_markers.extend(page.delete_markers.into_iter().map(|mut marker| {
                marker.path = locator.relative(&marker.path).to_string();
                marker
            }));
        }

        Ok(all)
    }

    /// Distinct backup names under `backups/`, sorted
    async fn list_backups(&self, installation: &str, credentials: &Credentials) -> Result<Vec<String>, StorageError> {
        let locator = Locator::resolve(installation, credentials)?;
        let mut pages = pager::version_pages(self, &locator, locator.key(BACKUPS_PREFIX), credentials);
        let mut names = BTreeSet::new();

        while let Some(page) = pages.try_next().await? {
            for version in page.versions.iter().filter(|v| v.is_latest) {
                if let Some(name) = naming::backup_name(&version.path, &locator) {
                    names.insert(name.to_string());
                }
            }
        }

        Ok(names.into_iter().collect())
    }

    fn calculate_date(&self, backup_name: &str) -> Result<NaiveDate, StorageError> {
        naming::calculate_date(backup_name)
    }

    async fn delete_object_version(
        &self,
        installation: &str,
        path: &str,
        version_id: &str,
        credentials: &Credentials,
    ) -> Result<(), StorageError> {
        let locator = Locator::resolve(installation, credentials)?;
        self.remove_version(&locator, &locator.key(path), version_id, credentials).await
    }

    /// Delete the full history under `folder` ("" for the installation root)
    async fn delete_all(&self, installation: &str, folder: &str, credentials: &Credentials) -> Result<usize, StorageError> {
        batch::delete_all(self, installation, folder, credentials).await
    }

    /// Copy the current version of every manifest entry to the destination installation
    async fn transfer_backup_files(
        &self,
        source_installation: &str,
        source_credentials: &Credentials,
        destination_installation: &str,
        destination_credentials: &Credentials,
        manifest: &BackupManifest,
    ) -> Result<usize, StorageError> {
        transfer::transfer_backup_files(
            self,
            source_installation,
            source_credentials,
            destination_installation,
            destination_credentials,
            manifest,
        )
        .await
    }

    async fn configure_bucket(
        &self,
        installation: &str,
        settings: &BucketSettings,
        credentials: &Credentials,
    ) -> Result<(), StorageError> {
        let locator = Locator::resolve(installation, credentials)?;
        if locator.is_shared() {
            tracing::warn!(
                installation = installation,
                bucket = locator.bucket(),
                "Shared bucket settings are managed by the platform, skipping"
            );
            return Ok(());
        }

        let policy = self.retry_policy();
        let locator = &locator;
        retry::with_backoff("configure_bucket", &policy, move || {
            self.apply_bucket_settings(locator, settings, credentials)
        })
        .await
    }

    /// Snapshot the `public/` and `private/` trees as a backup manifest
    async fn record_manifest(&self, installation: &str, credentials: &Credentials) -> Result<BackupManifest, StorageError> {
        let public = self.list_file_versions(installation, "public/", credentials).await?;
        let private = self.list_file_versions(installation, "private/", credentials).await?;

        Ok(BackupManifest {
            public: public.versions,
            private: private.versions,
        })
    }
}
