use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{BackupManifest, FileVersions, Filesource};
use crate::storage::backend::{BucketSettings, Connector, ConnectorKind, Product, Provider, StorageError};
use crate::storage::backends::{GcsConnector, S3Connector};

/// Routes every contract operation to the connector registered for a filesource's
/// (provider, product) pair.
#[derive(Clone, Default)]
pub struct Dispatcher {
    connectors: HashMap<ConnectorKind, Arc<dyn Connector>>,
}

impl Dispatcher {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the Amazon S3 and Google Cloud Storage connectors
    pub fn with_default_connectors() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(Arc::new(S3Connector::new()));
        dispatcher.register(Arc::new(GcsConnector::new()));
        dispatcher
    }

    /// Register a connector under its own kind, replacing any previous one
    pub fn register(&mut self, connector: Arc<dyn Connector>) -> &mut Self {
        self.connectors.insert(connector.kind(), connector);
        self
    }

    pub fn kinds(&self) -> Vec<ConnectorKind> {
        self.connectors.keys().copied().collect()
    }

    /// Select the connector for `filesource`; unknown or unregistered pairs are rejected
    pub fn resolve(&self, filesource: &Filesource) -> Result<Arc<dyn Connector>, StorageError> {
        let unsupported = || StorageError::UnsupportedProvider {
            provider: filesource.provider.clone(),
            product: filesource.product.clone(),
        };

        let provider: Provider = filesource.provider.parse().map_err(|_| unsupported())?;
        let product: Product = filesource.product.parse().map_err(|_| unsupported())?;

        self.connectors
            .get(&ConnectorKind { provider, product })
            .cloned()
            .ok_or_else(unsupported)
    }

    pub async fn list_file_versions(
        &self,
        installation: &str,
        prefix: &str,
        filesource: &Filesource,
    ) -> Result<FileVersions, StorageError> {
        self.resolve(filesource)?
            .list_file_versions(installation, prefix, &filesource.credentials)
            .await
    }

    pub async fn list_backups(&self, installation: &str, filesource: &Filesource) -> Result<Vec<String>, StorageError> {
        self.resolve(filesource)?
            .list_backups(installation, &filesource.credentials)
            .await
    }

    pub fn calculate_date(&self, filesource: &Filesource, backup_name: &str) -> Result<NaiveDate, StorageError> {
        self.resolve(filesource)?.calculate_date(backup_name)
    }

    pub async fn delete_object_version(
        &self,
        installation: &str,
        path: &str,
        version_id: &str,
        filesource: &Filesource,
    ) -> Result<(), StorageError> {
        self.resolve(filesource)?
            .delete_object_version(installation, path, version_id, &filesource.credentials)
            .await
    }

    pub async fn delete_all(&self, installation: &str, folder: &str, filesource: &Filesource) -> Result<usize, StorageError> {
        self.resolve(filesource)?
            .delete_all(installation, folder, &filesource.credentials)
            .await
    }

    /// Server-side copies only work inside one provider, so both filesources must be of the same kind
    pub async fn transfer_backup_files(
        &self,
        source_installation: &str,
        source: &Filesource,
        destination_installation: &str,
        destination: &Filesource,
        manifest: &BackupManifest,
    ) -> Result<usize, StorageError> {
        let connector = self.resolve(source)?;
        let destination_connector = self.resolve(destination)?;

        if connector.kind() != destination_connector.kind() {
            return Err(StorageError::UnsupportedTransfer {
                from: connector.kind().to_string(),
                to: destination_connector.kind().to_string(),
            });
        }

        connector
            .transfer_backup_files(
                source_installation,
                &source.credentials,
                destination_installation,
                &destination.credentials,
                manifest,
            )
            .await
    }

    pub async fn configure_bucket(
        &self,
        installation: &str,
        settings: &BucketSettings,
        filesource: &Filesource,
    ) -> Result<(), StorageError> {
        self.resolve(filesource)?
            .configure_bucket(installation, settings, &filesource.credentials)
            .await
    }

    pub async fn record_manifest(&self, installation: &str, filesource: &Filesource) -> Result<BackupManifest, StorageError> {
        self.resolve(filesource)?
            .record_manifest(installation, &filesource.credentials)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Credentials;
    use crate::storage::backends::MemoryConnector;

    #[test]
    fn test_default_registry_serves_both_providers() {
        let dispatcher = Dispatcher::with_default_connectors();
        let amazon = dispatcher.resolve(&Filesource::amazon(Credentials::default())).unwrap();
        let google = dispatcher.resolve(&Filesource::google(Credentials::default())).unwrap();
        assert_eq!(amazon.kind(), ConnectorKind::AMAZON_S3);
        assert_eq!(google.kind(), ConnectorKind::GOOGLE_STORAGE);
    }

    #[test]
    fn test_unknown_pair_names_provider_and_product() {
        let dispatcher = Dispatcher::with_default_connectors();
        let filesource = Filesource::new("azure", "blob", Credentials::default());

        match dispatcher.resolve(&filesource) {
            Err(StorageError::UnsupportedProvider { provider, product }) => {
                assert_eq!(provider, "azure");
                assert_eq!(product, "blob");
            }
            other => panic!("expected UnsupportedProvider, got {:?}", other.map(|c| c.kind())),
        }
    }

    #[test]
    fn test_known_names_in_wrong_pairing_are_rejected() {
        let dispatcher = Dispatcher::with_default_connectors();
        let filesource = Filesource::new("amazon", "storage", Credentials::default());
        assert!(matches!(
            dispatcher.resolve(&filesource),
            Err(StorageError::UnsupportedProvider { .. })
        ));
    }

    #[test]
    fn test_provider_aliases_and_case_variants_are_rejected() {
        let dispatcher = Dispatcher::with_default_connectors();

        match dispatcher.resolve(&Filesource::new("aws", "s3", Credentials::default())) {
            Err(StorageError::UnsupportedProvider { provider, product }) => {
                assert_eq!(provider, "aws");
                assert_eq!(product, "s3");
            }
            other => panic!("expected UnsupportedProvider, got {:?}", other.map(|c| c.kind())),
        }

        for (provider, product) in [("gcp", "storage"), ("AMAZON", "S3"), ("Google", "storage"), ("amazon", "S3")] {
            let filesource = Filesource::new(provider, product, Credentials::default());
            assert!(
                matches!(dispatcher.resolve(&filesource), Err(StorageError::UnsupportedProvider { .. })),
                "{}/{} must not be routed",
                provider,
                product
            );
        }
    }

    #[tokio::test]
    async fn test_cross_provider_transfer_is_rejected() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(Arc::new(MemoryConnector::amazon()));
        dispatcher.register(Arc::new(MemoryConnector::google()));

        let result = dispatcher
            .transfer_backup_files(
                "inst-a",
                &Filesource::amazon(Credentials::default()),
                "inst-b",
                &Filesource::google(Credentials::default()),
                &BackupManifest::default(),
            )
            .await;

        assert!(matches!(result, Err(StorageError::UnsupportedTransfer { .. })));
    }
}
