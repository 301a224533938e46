use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::model::{Credentials, DeleteMarker, ObjectVersion};
use crate::storage::backend::{
    BucketSettings, Connector, ConnectorKind, CopyCommand, PageCursor, Provider, StorageError, VersionPage,
};
use crate::storage::locator::Locator;
use crate::storage::retry::RetryPolicy;
use crate::storage::transfer;

/// Default listing page size; small so that tests cross page boundaries
const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
struct StoredEntry {
    version_id: String,
    size: u64,
    marker: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// bucket -> key -> history, oldest first
    buckets: BTreeMap<String, BTreeMap<String, Vec<StoredEntry>>>,
    settings: HashMap<String, BucketSettings>,
    failing_deletes: HashSet<String>,
    failing_copies: HashSet<String>,
    bucket_failures_left: usize,
    bucket_delete_calls: usize,
    list_calls: usize,
    copies: Vec<CopyCommand>,
    next_version: u64,
}

impl MemoryState {
    fn version_id(&mut self, provider: Provider) -> String {
        self.next_version += 1;
        match provider {
            // GCS generations are microsecond timestamps
            Provider::Google => (1_600_000_000_000_000 + self.next_version).to_string(),
            Provider::Amazon => format!("mem-{:08}", self.next_version),
        }
    }

    fn push(&mut self, provider: Provider, bucket: &str, key: &str, size: u64, marker: bool) -> Result<String, StorageError> {
        let version_id = self.version_id(provider);
        let objects = self
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::not_found(bucket))?;
        objects.entry(key.to_string()).or_default().push(StoredEntry {
            version_id: version_id.clone(),
            size,
            marker,
        });
        Ok(version_id)
    }
}

/// In-memory versioned object store speaking either provider's dialect.
///
/// Used by the integration tests and benchmarks. Supports failure injection per key,
/// transient bucket-deletion failures and tracks the peak number of concurrent
/// mutations so that queue limits can be observed from outside.
pub struct MemoryConnector {
    provider: Provider,
    page_size: usize,
    latency: Duration,
    state: Mutex<MemoryState>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            page_size: DEFAULT_PAGE_SIZE,
            latency: Duration::ZERO,
            state: Mutex::new(MemoryState::default()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn amazon() -> Self {
        Self::new(Provider::Amazon)
    }

    pub fn google() -> Self {
        Self::new(Provider::Google)
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Simulated round trip for deletes and copies
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn create_bucket(&self, bucket: &str) {
        self.state.lock().await.buckets.entry(bucket.to_string()).or_default();
    }

    pub async fn bucket_exists(&self, bucket: &str) -> bool {
        self.state.lock().await.buckets.contains_key(bucket)
    }

    /// Store a new version of `key`, returning its version id
    pub async fn put(&self, bucket: &str, key: &str, size: u64) -> Result<String, StorageError> {
        self.state.lock().await.push(self.provider, bucket, key, size, false)
    }

    pub async fn put_delete_marker(&self, bucket: &str, key: &str) -> Result<String, StorageError> {
        self.state.lock().await.push(self.provider, bucket, key, 0, true)
    }

    /// Every delete of `key` fails with a provider error
    pub async fn fail_deletes_for(&self, key: &str) {
        self.state.lock().await.failing_deletes.insert(key.to_string());
    }

    /// Every copy from source `key` fails with a provider error
    pub async fn fail_copies_for(&self, key: &str) {
        self.state.lock().await.failing_copies.insert(key.to_string());
    }

    /// The next `attempts` bucket deletions fail with a provider error
    pub async fn fail_bucket_deletes(&self, attempts: usize) {
        self.state.lock().await.bucket_failures_left = attempts;
    }

    pub async fn bucket_delete_calls(&self) -> usize {
        self.state.lock().await.bucket_delete_calls
    }

    pub async fn list_calls(&self) -> usize {
        self.state.lock().await.list_calls
    }

    pub async fn copies(&self) -> Vec<CopyCommand> {
        self.state.lock().await.copies.clone()
    }

    pub async fn settings_for(&self, bucket: &str) -> Option<BucketSettings> {
        self.state.lock().await.settings.get(bucket).cloned()
    }

    /// Versions plus delete markers stored in `bucket`
    pub async fn entry_count(&self, bucket: &str) -> usize {
        self.state
            .lock()
            .await
            .buckets
            .get(bucket)
            .map(|objects| objects.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Keys whose newest entry is a live version
    pub async fn live_keys(&self, bucket: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .buckets
            .get(bucket)
            .map(|objects| {
                objects
                    .iter()
                    .filter(|(_, history)| history.last().map(|e| !e.marker).unwrap_or(false))
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Highest number of deletes and copies that were running at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    async fn delete_entry(&self, bucket: &str, key: &str, version_id: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        if state.failing_deletes.contains(key) {
            return Err(StorageError::provider(format!("injected delete failure for {}/{}", bucket, key)));
        }

        let resource = format!("{}/{}@{}", bucket, key, version_id);
        let objects = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::not_found(bucket))?;
        let history = objects.get_mut(key).ok_or_else(|| StorageError::not_found(&resource))?;
        let position = history
            .iter()
            .position(|entry| entry.version_id == version_id)
            .ok_or_else(|| StorageError::not_found(&resource))?;

        history.remove(position);
        if history.is_empty() {
            objects.remove(key);
        }
        Ok(())
    }

    async fn copy_entry(&self, command: &CopyCommand) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        let source = &command.source;
        if state.failing_copies.contains(&source.key) {
            return Err(StorageError::provider(format!(
                "injected copy failure for {}/{}",
                source.bucket, source.key
            )));
        }

        let resource = format!("{}/{}", source.bucket, source.key);
        let history = state
            .buckets
            .get(&source.bucket)
            .and_then(|objects| objects.get(&source.key))
            .ok_or_else(|| StorageError::not_found(&resource))?;
        let entry = match &source.version_id {
            Some(version) => history.iter().find(|e| &e.version_id == version),
            None => history.last(),
        }
        .filter(|e| !e.marker)
        .ok_or_else(|| StorageError::not_found(&resource))?;
        let size = entry.size;

        state.push(self.provider, &command.destination.bucket, &command.destination.key, size, false)?;
        state.copies.push(command.clone());
        Ok(())
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn kind(&self) -> ConnectorKind {
        match self.provider {
            Provider::Amazon => ConnectorKind::AMAZON_S3,
            Provider::Google => ConnectorKind::GOOGLE_STORAGE,
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(1))
    }

    async fn list_versions_page(
        &self,
        locator: &Locator,
        prefix: &str,
        cursor: Option<PageCursor>,
        _credentials: &Credentials,
    ) -> Result<VersionPage, StorageError> {
        let mut state = self.state.lock().await;
        state.list_calls += 1;

        let objects = state
            .buckets
            .get(locator.bucket())
            .ok_or_else(|| StorageError::not_found(locator.bucket()))?;

        // (key, entry, newest) in key order, oldest version first
        let items: Vec<(&String, &StoredEntry, bool)> = objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .flat_map(|(key, history)| {
                let newest = history.len().saturating_sub(1);
                history.iter().enumerate().map(move |(i, entry)| (key, entry, i == newest))
            })
            .collect();

        let start = match &cursor {
            None => 0,
            Some(PageCursor::KeyMarker { key, version_id }) => items
                .iter()
                .position(|(k, e, _)| *k == key && Some(&e.version_id) == version_id.as_ref())
                .map(|i| i + 1)
                .or_else(|| items.iter().position(|(k, _, _)| k.as_str() > key.as_str()))
                .unwrap_or(items.len()),
            Some(PageCursor::Token(token)) => {
                return Err(StorageError::provider(format!("unexpected page token '{}'", token)));
            }
        };

        let end = (start + self.page_size).min(items.len());
        let mut page = VersionPage::default();

        for (key, entry, newest) in &items[start..end] {
            if entry.marker {
                page.delete_markers.push(DeleteMarker {
                    path: key.to_string(),
                    version_id: entry.version_id.clone(),
                    is_latest: *newest,
                });
            } else {
                page.versions.push(ObjectVersion {
                    path: key.to_string(),
                    version_id: entry.version_id.clone(),
                    is_latest: *newest,
                    size: entry.size,
                });
            }
        }

        if end < items.len() {
            if let Some((key, entry, _)) = items.get(end - 1) {
                page.next = Some(PageCursor::KeyMarker {
                    key: key.to_string(),
                    version_id: Some(entry.version_id.clone()),
                });
            }
        }

        Ok(page)
    }

    async fn remove_version(
        &self,
        locator: &Locator,
        key: &str,
        version_id: &str,
        _credentials: &Credentials,
    ) -> Result<(), StorageError> {
        self.enter().await;
        let result = self.delete_entry(locator.bucket(), key, version_id).await;
        self.leave();
        result
    }

    async fn remove_bucket(&self, locator: &Locator, _credentials: &Credentials) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        state.bucket_delete_calls += 1;

        if state.bucket_failures_left > 0 {
            state.bucket_failures_left -= 1;
            return Err(StorageError::provider(format!("injected failure deleting {}", locator.bucket())));
        }

        match state.buckets.get(locator.bucket()).map(BTreeMap::len) {
            None => Err(StorageError::not_found(locator.bucket())),
            Some(keys) if keys > 0 => Err(StorageError::provider(format!(
                "bucket {} is not empty",
                locator.bucket()
            ))),
            Some(_) => {
                state.buckets.remove(locator.bucket());
                state.settings.remove(locator.bucket());
                Ok(())
            }
        }
    }

    async fn copy_version(
        &self,
        command: &CopyCommand,
        _source_credentials: &Credentials,
        _destination_credentials: &Credentials,
    ) -> Result<(), StorageError> {
        self.enter().await;
        let result = self.copy_entry(command).await;
        self.leave();
        result
    }

    async fn apply_bucket_settings(
        &self,
        locator: &Locator,
        settings: &BucketSettings,
        _credentials: &Credentials,
    ) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        if !state.buckets.contains_key(locator.bucket()) {
            return Err(StorageError::not_found(locator.bucket()));
        }
        state.settings.insert(locator.bucket().to_string(), settings.clone());
        Ok(())
    }

    fn current_versions(&self, entries: &[ObjectVersion]) -> Vec<ObjectVersion> {
        match self.provider {
            Provider::Amazon => transfer::latest_by_flag(entries),
            Provider::Google => transfer::latest_by_generation(entries),
        }
    }
}
