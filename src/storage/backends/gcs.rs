use async_trait::async_trait;
use google_cloud_storage::client::google_cloud_auth::credentials::CredentialsFile;
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::buckets::delete::DeleteBucketRequest;
use google_cloud_storage::http::buckets::patch::{BucketPatchConfig, PatchBucketRequest};
use google_cloud_storage::http::buckets::Versioning;
use google_cloud_storage::http::objects::{
    copy::CopyObjectRequest,
    delete::DeleteObjectRequest,
    list::ListObjectsRequest,
};
use std::fmt;
use std::sync::Arc;

use crate::model::{Credentials, ObjectVersion};
use crate::storage::backend::{
    BucketSettings, Connector, ConnectorKind, CopyCommand, PageCursor, StorageError, VersionPage,
};
use crate::storage::backends::ClientCache;
use crate::storage::locator::Locator;
use crate::storage::transfer;

/// Page size for version listings
const LIST_PAGE_SIZE: i32 = 1000;

/// Google Cloud Storage connector.
///
/// GCS has no delete markers; noncurrent generations are listed with `versions=true`
/// and a generation number doubles as the version id.
/// Clients are cached per service account key (`None` for application default credentials).
#[derive(Clone, Default)]
pub struct GcsConnector {
    clients: Arc<ClientCache<Option<String>, Client>>,
}

impl fmt::Debug for GcsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcsConnector").finish_non_exhaustive()
    }
}

impl GcsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self, credentials: &Credentials) -> Result<Client, StorageError> {
        let key = credentials.service_account_key.clone().filter(|key| !key.is_empty());
        self.clients
            .get_or_build(key.clone(), || Self::build_client(key))
            .await
    }

    async fn build_client(service_account_key: Option<String>) -> Result<Client, StorageError> {
        let config = match service_account_key {
            Some(key) => {
                let file = CredentialsFile::new_from_str(&key)
                    .await
                    .map_err(|e| StorageError::InvalidCredentials {
                        message: format!("Invalid service account key: {}", e),
                    })?;
                ClientConfig::default()
                    .with_credentials(file)
                    .await
                    .map_err(|e| StorageError::InvalidCredentials {
                        message: format!("Failed to setup GCS credentials: {}", e),
                    })?
            }
            // Application default credentials
            None => ClientConfig::default()
                .with_auth()
                .await
                .map_err(|e| StorageError::InvalidCredentials {
                    message: format!("Failed to authenticate with GCS using default credentials: {}", e),
                })?,
        };

        Ok(Client::new(config))
    }

    /// Convert GCS error to our storage error
    fn map_gcs_error(err: google_cloud_storage::http::Error, resource: &str) -> StorageError {
        match err {
            google_cloud_storage::http::Error::Response(ref response) if response.code == 404 => {
                StorageError::not_found(resource)
            }
            google_cloud_storage::http::Error::HttpClient(ref http_err) if http_err.to_string().contains("404") => {
                StorageError::not_found(resource)
            }
            google_cloud_storage::http::Error::TokenSource(ref token_err) => StorageError::InvalidCredentials {
                message: format!("GCS token error: {}", token_err),
            },
            _ => StorageError::provider(format!("GCS operation on {} failed: {}", resource, err)),
        }
    }

    fn generation(resource: &str, version_id: &str) -> Result<i64, StorageError> {
        version_id.parse().map_err(|_| {
            StorageError::provider(format!("{} has a non-numeric generation '{}'", resource, version_id))
        })
    }
}

#[async_trait]
impl Connector for GcsConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::GOOGLE_STORAGE
    }

    async fn list_versions_page(
        &self,
        locator: &Locator,
        prefix: &str,
        cursor: Option<PageCursor>,
        credentials: &Credentials,
    ) -> Result<VersionPage, StorageError> {
        let client = self.client(credentials).await?;

        let page_token = match cursor {
            Some(PageCursor::Token(token)) => Some(token),
            Some(PageCursor::KeyMarker { key, .. }) => Some(key),
            None => None,
        };

        let request = ListObjectsRequest {
            bucket: locator.bucket().to_string(),
            prefix: Some(prefix.to_string()),
            page_token,
            versions: Some(true),
            max_results: Some(LIST_PAGE_SIZE),
            ..Default::default()
        };

        let response = client
            .list_objects(&request)
            .await
            .map_err(|e| Self::map_gcs_error(e, locator.bucket()))?;

        let versions = response
            .items
            .unwrap_or_default()
            .into_iter()
            .map(|object| ObjectVersion {
                is_latest: object.time_deleted.is_none(),
                version_id: object.generation.to_string(),
                size: object.size.max(0) as u64,
                path: object.name,
            })
            .collect();

        Ok(VersionPage {
            versions,
            delete_markers: Vec::new(),
            next: response.next_page_token.filter(|t| !t.is_empty()).map(PageCursor::Token),
        })
    }

    async fn remove_version(
        &self,
        locator: &Locator,
        key: &str,
        version_id: &str,
        credentials: &Credentials,
    ) -> Result<(), StorageError> {
        let resource = format!("{}/{}", locator.bucket(), key);
        let generation = Self::generation(&resource, version_id)?;
        let client = self.client(credentials).await?;

        let request = DeleteObjectRequest {
            bucket: locator.bucket().to_string(),
            object: key.to_string(),
            generation: Some(generation),
            ..Default::default()
        };

        client
            .delete_object(&request)
            .await
            .map_err(|e| Self::map_gcs_error(e, &resource))
    }

    async fn remove_bucket(&self, locator: &Locator, credentials: &Credentials) -> Result<(), StorageError> {
        let client = self.client(credentials).await?;
        let request = DeleteBucketRequest {
            bucket: locator.bucket().to_string(),
            ..Default::default()
        };

        client
            .delete_bucket(&request)
            .await
            .map_err(|e| Self::map_gcs_error(e, locator.bucket()))
    }

    async fn copy_version(
        &self,
        command: &CopyCommand,
        _source_credentials: &Credentials,
        destination_credentials: &Credentials,
    ) -> Result<(), StorageError> {
        let resource = format!("{}/{}", command.source.bucket, command.source.key);
        let source_generation = match &command.source.version_id {
            Some(version) => Some(Self::generation(&resource, version)?),
            None => None,
        };

        let client = self.client(destination_credentials).await?;
        let request = CopyObjectRequest {
            source_bucket: command.source.bucket.clone(),
            source_object: command.source.key.clone(),
            source_generation,
            destination_bucket: command.destination.bucket.clone(),
            destination_object: command.destination.key.clone(),
            ..Default::default()
        };

        client
            .copy_object(&request)
            .await
            .map_err(|e| Self::map_gcs_error(e, &resource))?;
        Ok(())
    }

    /// GCS encrypts at rest without configuration; only versioning and labels are applied
    async fn apply_bucket_settings(
        &self,
        locator: &Locator,
        settings: &BucketSettings,
        credentials: &Credentials,
    ) -> Result<(), StorageError> {
        let client = self.client(credentials).await?;

        let labels = if settings.tags.is_empty() {
            None
        } else {
            Some(settings.tags.clone().into_iter().collect())
        };

        let request = PatchBucketRequest {
            bucket: locator.bucket().to_string(),
            metadata: Some(BucketPatchConfig {
                versioning: Some(Versioning {
                    enabled: settings.versioning,
                }),
                labels,
                ..Default::default()
            }),
            ..Default::default()
        };

        client
            .patch_bucket(&request)
            .await
            .map_err(|e| Self::map_gcs_error(e, locator.bucket()))?;
        Ok(())
    }

    fn current_versions(&self, entries: &[ObjectVersion]) -> Vec<ObjectVersion> {
        transfer::latest_by_generation(entries)
    }
}
