use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::config::{AppConfig, FilesourceConfig};
use crate::model::Filesource;

/// Source of installations and filesources for the purge engine.
///
/// Any of these lookups may fail; the purge engine decides how far a failure reaches.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Every installation the purge walks
    async fn installations(&self) -> Result<Vec<String>>;

    /// Ids of every configured filesource
    async fn filesources(&self) -> Result<Vec<String>>;

    /// Descriptor of `filesource_id` for `installation`, or `None` when that filesource
    /// holds nothing for the installation
    async fn resolve(&self, filesource_id: &str, installation: &str) -> Result<Option<Filesource>>;
}

/// Directory backed by the configuration file
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    installations: Vec<String>,
    filesources: BTreeMap<String, FilesourceConfig>,
}

impl StaticDirectory {
    pub fn new(installations: Vec<String>, filesources: BTreeMap<String, FilesourceConfig>) -> Self {
        Self {
            installations,
            filesources,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.installations.clone(), config.filesources.clone())
    }

    /// Add a filesource serving every installation
    pub fn with_filesource(mut self, id: &str, filesource: Filesource) -> Self {
        self.filesources.insert(
            id.to_string(),
            FilesourceConfig {
                filesource,
                installations: Vec::new(),
            },
        );
        self
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn installations(&self) -> Result<Vec<String>> {
        Ok(self.installations.clone())
    }

    async fn filesources(&self) -> Result<Vec<String>> {
        Ok(self.filesources.keys().cloned().collect())
    }

    async fn resolve(&self, filesource_id: &str, installation: &str) -> Result<Option<Filesource>> {
        let entry = self
            .filesources
            .get(filesource_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown filesource: {}", filesource_id))?;

        Ok(entry.serves(installation).then(|| entry.filesource.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Credentials;

    #[tokio::test]
    async fn test_static_directory_from_config() {
        let mut config = AppConfig {
            installations: vec!["inst-a".to_string(), "inst-b".to_string()],
            ..Default::default()
        };
        config.filesources.insert(
            "archive".to_string(),
            FilesourceConfig {
                filesource: Filesource::google(Credentials::default()),
                installations: vec!["inst-b".to_string()],
            },
        );

        let directory = StaticDirectory::from_config(&config);
        assert_eq!(directory.installations().await.unwrap().len(), 2);
        assert_eq!(directory.filesources().await.unwrap(), vec!["archive".to_string()]);
        assert!(directory.resolve("archive", "inst-a").await.unwrap().is_none());
        assert_eq!(directory.resolve("archive", "inst-b").await.unwrap().unwrap().provider, "google");
    }

    #[tokio::test]
    async fn test_unknown_filesource_is_an_error() {
        let directory = StaticDirectory::default();
        assert!(directory.resolve("missing", "inst-a").await.is_err());
    }
}
