use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::types::{
    BucketVersioningStatus, ServerSideEncryption, ServerSideEncryptionByDefault,
    ServerSideEncryptionConfiguration, ServerSideEncryptionRule, Tag, Tagging, VersioningConfiguration,
};
use aws_sdk_s3::Client;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::sync::Arc;

use crate::model::{Credentials, DeleteMarker, ObjectVersion};
use crate::storage::backend::{
    BucketSettings, Connector, ConnectorKind, CopyCommand, PageCursor, StorageError, VersionPage,
};
use crate::storage::backends::ClientCache;
use crate::storage::locator::Locator;
use crate::storage::transfer;

/// Region used when the filesource does not name one
const DEFAULT_REGION: &str = "us-east-1";

/// Page size for version listings (AWS maximum)
const LIST_PAGE_SIZE: i32 = 1000;

/// Key bytes escaped in `x-amz-copy-source`; `/` stays literal between segments
const COPY_SOURCE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// Credential fields that select a distinct S3 client
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    session_token: Option<String>,
    region: Option<String>,
    endpoint: Option<String>,
}

impl From<&Credentials> for ClientKey {
    fn from(credentials: &Credentials) -> Self {
        Self {
            access_key_id: credentials.access_key_id.clone(),
            secret_access_key: credentials.secret_access_key.clone(),
            session_token: credentials.session_token.clone(),
            region: credentials.region.clone(),
            endpoint: credentials.endpoint.clone(),
        }
    }
}

/// Amazon S3 connector.
/// Clients are built from the filesource credentials on first use and reused afterwards.
#[derive(Debug, Clone, Default)]
pub struct S3Connector {
    clients: Arc<ClientCache<ClientKey, Client>>,
}

impl S3Connector {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self, credentials: &Credentials) -> Result<Client, StorageError> {
        self.clients
            .get_or_build(ClientKey::from(credentials), || Self::build_client(credentials))
            .await
    }

    async fn build_client(credentials: &Credentials) -> Result<Client, StorageError> {
        let access_key_id = credentials.access_key_id.as_deref().filter(|v| !v.is_empty()).ok_or_else(|| {
            StorageError::InvalidCredentials {
                message: "S3 access key ID cannot be empty".to_string(),
            }
        })?;
        let secret_access_key = credentials.secret_access_key.as_deref().filter(|v| !v.is_empty()).ok_or_else(|| {
            StorageError::InvalidCredentials {
                message: "S3 secret access key cannot be empty".to_string(),
            }
        })?;

        let region = credentials.region.clone().unwrap_or_else(|| DEFAULT_REGION.to_string());
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                access_key_id,
                secret_access_key,
                credentials.session_token.clone(),
                None,
                "backup-warden",
            ));

        // Custom endpoints (MinIO and friends) need path-style addressing
        if let Some(endpoint) = &credentials.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let shared_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared_config)
            .force_path_style(credentials.endpoint.is_some())
            .build();

        Ok(Client::from_conf(s3_config))
    }

    /// Convert an SDK error to a storage error
    fn map_s3_error<E>(err: aws_sdk_s3::error::SdkError<E>, resource: &str) -> StorageError
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
    {
        match err.code() {
            Some("NoSuchBucket") | Some("NoSuchKey") | Some("NoSuchVersion") | Some("NotFound") => {
                StorageError::not_found(resource)
            }
            _ => StorageError::provider(format!("S3 operation on {} failed: {}", resource, DisplayErrorContext(&err))),
        }
    }

    fn copy_source(command: &CopyCommand) -> String {
        let key = utf8_percent_encode(&command.source.key, COPY_SOURCE_ENCODE_SET);
        match &command.source.version_id {
            Some(version) => format!("{}/{}?versionId={}", command.source.bucket, key, version),
            None => format!("{}/{}", command.source.bucket, key),
        }
    }

    fn build_error(err: aws_sdk_s3::error::BuildError) -> StorageError {
        StorageError::provider(format!("Invalid S3 request: {}", err))
    }
}

#[async_trait]
impl Connector for S3Connector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::AMAZON_S3
    }

    async fn list_versions_page(
        &self,
        locator: &Locator,
        prefix: &str,
        cursor: Option<PageCursor>,
        credentials: &Credentials,
    ) -> Result<VersionPage, StorageError> {
        let client = self.client(credentials).await?;

        let (key_marker, version_id_marker) = match cursor {
            Some(PageCursor::KeyMarker { key, version_id }) => (Some(key), version_id),
            Some(PageCursor::Token(token)) => (Some(token), None),
            None => (None, None),
        };

        let output = client
            .list_object_versions()
            .bucket(locator.bucket())
            .prefix(prefix)
            .set_key_marker(key_marker)
            .set_version_id_marker(version_id_marker)
            .max_keys(LIST_PAGE_SIZE)
            .send()
            .await
            .map_err(|e| Self::map_s3_error(e, locator.bucket()))?;

        let versions = output
            .versions()
            .iter()
            .filter_map(|version| {
                Some(ObjectVersion {
                    path: version.key()?.to_string(),
                    version_id: version.version_id().unwrap_or("null").to_string(),
                    is_latest: version.is_latest().unwrap_or(false),
                    size: version.size().unwrap_or(0).max(0) as u64,
                })
            })
            .collect();

        let delete_markers = output
            .delete_markers()
            .iter()
            .filter_map(|marker| {
                Some(DeleteMarker {
                    path: marker.key()?.to_string(),
                    version_id: marker.version_id().unwrap_or("null").to_string(),
                    is_latest: marker.is_latest().unwrap_or(false),
                })
            })
            .collect();

        let next = if output.is_truncated() == Some(true) {
            output.next_key_marker().map(|key| PageCursor::KeyMarker {
                key: key.to_string(),
                version_id: output.next_version_id_marker().map(String::from),
            })
        } else {
            None
        };

        Ok(VersionPage {
            versions,
            delete_markers,
            next,
        })
    }

    async fn remove_version(
        &self,
        locator: &Locator,
        key: &str,
        version_id: &str,
        credentials: &Credentials,
    ) -> Result<(), StorageError> {
        let client = self.client(credentials).await?;
        client
            .delete_object()
            .bucket(locator.bucket())
            .key(key)
            .version_id(version_id)
            .send()
            .await
            .map_err(|e| Self::map_s3_error(e, &format!("{}/{}", locator.bucket(), key)))?;
        Ok(())
    }

    async fn remove_bucket(&self, locator: &Locator, credentials: &Credentials) -> Result<(), StorageError> {
        let client = self.client(credentials).await?;
        client
            .delete_bucket()
            .bucket(locator.bucket())
            .send()
            .await
            .map_err(|e| Self::map_s3_error(e, locator.bucket()))?;
        Ok(())
    }

    /// S3 copies run on the destination account; its credentials must be able to read the source
    async fn copy_version(
        &self,
        command: &CopyCommand,
        _source_credentials: &Credentials,
        destination_credentials: &Credentials,
    ) -> Result<(), StorageError> {
        let client = self.client(destination_credentials).await?;
        client
            .copy_object()
            .bucket(&command.destination.bucket)
            .key(&command.destination.key)
            .copy_source(Self::copy_source(command))
            .send()
            .await
            .map_err(|e| {
                Self::map_s3_error(e, &format!("{}/{}", command.source.bucket, command.source.key))
            })?;
        Ok(())
    }

    async fn apply_bucket_settings(
        &self,
        locator: &Locator,
        settings: &BucketSettings,
        credentials: &Credentials,
    ) -> Result<(), StorageError> {
        let client = self.client(credentials).await?;
        let bucket = locator.bucket();

        if settings.versioning {
            client
                .put_bucket_versioning()
                .bucket(bucket)
                .versioning_configuration(
                    VersioningConfiguration::builder()
                        .status(BucketVersioningStatus::Enabled)
                        .build(),
                )
                .send()
                .await
                .map_err(|e| Self::map_s3_error(e, bucket))?;
        }

        if settings.encryption {
            let by_default = ServerSideEncryptionByDefault::builder()
                .sse_algorithm(ServerSideEncryption::Aes256)
                .build()
                .map_err(Self::build_error)?;
            let configuration = ServerSideEncryptionConfiguration::builder()
                .rules(
                    ServerSideEncryptionRule::builder()
                        .apply_server_side_encryption_by_default(by_default)
                        .build(),
                )
                .build()
                .map_err(Self::build_error)?;

            client
                .put_bucket_encryption()
                .bucket(bucket)
                .server_side_encryption_configuration(configuration)
                .send()
                .await
                .map_err(|e| Self::map_s3_error(e, bucket))?;
        }

        if !settings.tags.is_empty() {
            let mut tagging = Tagging::builder();
            for (key, value) in &settings.tags {
                tagging = tagging.tag_set(Tag::builder().key(key).value(value).build().map_err(Self::build_error)?);
            }

            client
                .put_bucket_tagging()
                .bucket(bucket)
                .tagging(tagging.build().map_err(Self::build_error)?)
                .send()
                .await
                .map_err(|e| Self::map_s3_error(e, bucket))?;
        }

        Ok(())
    }

    fn current_versions(&self, entries: &[ObjectVersion]) -> Vec<ObjectVersion> {
        transfer::latest_by_flag(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::ObjectLocation;

    #[test]
    fn test_copy_source_pins_version() {
        let command = CopyCommand {
            source: ObjectLocation {
                bucket: "inst-a".to_string(),
                key: "public/a.png".to_string(),
                version_id: Some("3HL4kqtJ".to_string()),
            },
            destination: ObjectLocation {
                bucket: "inst-b".to_string(),
                key: "public/a.png".to_string(),
                version_id: None,
            },
        };
        assert_eq!(S3Connector::copy_source(&command), "inst-a/public/a.png?versionId=3HL4kqtJ");
    }

    #[test]
    fn test_copy_source_escapes_key() {
        let command = CopyCommand {
            source: ObjectLocation {
                bucket: "inst-a".to_string(),
                key: "private/q?a=1&b #2+100%/résumé.pdf".to_string(),
                version_id: Some("3HL4kqtJ".to_string()),
            },
            destination: ObjectLocation {
                bucket: "inst-b".to_string(),
                key: "private/q?a=1&b #2+100%/résumé.pdf".to_string(),
                version_id: None,
            },
        };
        assert_eq!(
            S3Connector::copy_source(&command),
            "inst-a/private/q%3Fa%3D1%26b%20%232%2B100%25/r%C3%A9sum%C3%A9.pdf?versionId=3HL4kqtJ"
        );
    }

    #[tokio::test]
    async fn test_invalid_credentials_are_not_cached() {
        let connector = S3Connector::new();
        let locator = Locator::Dedicated { bucket: "inst".to_string() };

        for _ in 0..2 {
            let result = connector.remove_bucket(&locator, &Credentials::default()).await;
            assert!(matches!(result, Err(StorageError::InvalidCredentials { .. })));
        }
        assert_eq!(connector.clients.len().await, 0);
    }

    #[tokio::test]
    async fn test_missing_keys_are_rejected_before_any_request() {
        let locator = Locator::Dedicated { bucket: "inst".to_string() };
        let result = S3Connector::new()
            .remove_bucket(&locator, &Credentials::default())
            .await;
        assert!(matches!(result, Err(StorageError::InvalidCredentials { .. })));
    }
}
