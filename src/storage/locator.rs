use crate::model::Credentials;
use crate::storage::backend::StorageError;

/// Where an installation's objects live.
///
/// v1 gives every installation a dedicated bucket named after it; v2 puts all
/// installations in one shared bucket and prefixes keys with the installation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Dedicated { bucket: String },
    Shared { bucket: String, installation: String },
}

impl Locator {
    pub fn resolve(installation: &str, credentials: &Credentials) -> Result<Self, StorageError> {
        if installation.is_empty() {
            return Err(StorageError::InvalidLocator {
                installation: installation.to_string(),
                message: "installation id cannot be empty".to_string(),
            });
        }

        let descriptor = match &credentials.bucket {
            None => {
                return Ok(Locator::Dedicated {
                    bucket: installation.to_string(),
                })
            }
            Some(descriptor) => descriptor,
        };

        match descriptor.version.as_deref() {
            None | Some("v1") => Ok(Locator::Dedicated {
                bucket: installation.to_string(),
            }),
            Some("v2") => match descriptor.bucket.as_deref() {
                Some(bucket) if !bucket.trim().is_empty() => Ok(Locator::Shared {
                    bucket: bucket.to_string(),
                    installation: installation.to_string(),
                }),
                _ => Err(StorageError::InvalidLocator {
                    installation: installation.to_string(),
                    message: "v2 layout requires a shared bucket name".to_string(),
                }),
            },
            Some(other) => Err(StorageError::InvalidLocator {
                installation: installation.to_string(),
                message: format!("unknown layout version '{}'", other),
            }),
        }
    }

    pub fn bucket(&self) -> &str {
        match self {
            Locator::Dedicated { bucket } => bucket,
            Locator::Shared { bucket, .. } => bucket,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Locator::Shared { .. })
    }

    /// Raw bucket key for an installation-relative path
    pub fn key(&self, path: &str) -> String {
        match self {
            Locator::Dedicated { .. } => path.to_string(),
            Locator::Shared { installation, .. } => format!("{}/{}", installation, path),
        }
    }

    /// Installation-relative path for a raw bucket key
    pub fn relative<'a>(&self, key: &'a str) -> &'a str {
        match self {
            Locator::Dedicated { .. } => key,
            Locator::Shared { installation, .. } => key
                .strip_prefix(installation.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SharedBucket;

    #[test]
    fn test_missing_descriptor_is_dedicated() {
        let locator = Locator::resolve("inst-1", &Credentials::default()).unwrap();
        assert_eq!(locator, Locator::Dedicated { bucket: "inst-1".to_string() });
        assert_eq!(locator.key("backups/a"), "backups/a");
    }

    #[test]
    fn test_v2_descriptor_prefixes_keys() {
        let credentials = Credentials::default().with_shared_bucket("shared");
        let locator = Locator::resolve("inst-1", &credentials).unwrap();
        assert_eq!(locator.bucket(), "shared");
        assert!(locator.is_shared());
        assert_eq!(locator.key("public/logo.png"), "inst-1/public/logo.png");
        assert_eq!(locator.relative("inst-1/public/logo.png"), "public/logo.png");
    }

    #[test]
    fn test_v1_descriptor_ignores_bucket_name() {
        let credentials = Credentials {
            bucket: Some(SharedBucket {
                bucket: Some("shared".to_string()),
                version: Some("v1".to_string()),
            }),
            ..Default::default()
        };
        let locator = Locator::resolve("inst-1", &credentials).unwrap();
        assert_eq!(locator.bucket(), "inst-1");
    }

    #[test]
    fn test_malformed_descriptors_are_rejected() {
        let no_bucket = Credentials {
            bucket: Some(SharedBucket { bucket: None, version: Some("v2".to_string()) }),
            ..Default::default()
        };
        assert!(matches!(
            Locator::resolve("inst-1", &no_bucket),
            Err(StorageError::InvalidLocator { .. })
        ));

        let unknown = Credentials {
            bucket: Some(SharedBucket { bucket: Some("b".to_string()), version: Some("v9".to_string()) }),
            ..Default::default()
        };
        assert!(matches!(
            Locator::resolve("inst-1", &unknown),
            Err(StorageError::InvalidLocator { .. })
        ));
    }
}
