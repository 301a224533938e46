use serde::{Deserialize, Serialize};
use chrono::NaiveDate;

/// Prefix every backup lives under, relative to the installation root
pub const BACKUPS_PREFIX: &str = "backups/";

/// Shared-bucket descriptor carried inside filesource credentials.
/// Absent (or `version = "v1"`) means one dedicated bucket per installation.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedBucket {
	#[serde(default)]
	pub bucket: Option<String>,
	#[serde(default)]
	pub version: Option<String>,
}

/// Provider secrets for a filesource. Amazon reads the access key fields,
/// Google reads the service account fields.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Credentials {
	#[serde(default)]
	pub access_key_id: Option<String>,
	#[serde(default)]
	pub secret_access_key: Option<String>,
	#[serde(default)]
	pub session_token: Option<String>,
	#[serde(default)]
	pub region: Option<String>,
	#[serde(default)]
	pub endpoint: Option<String>,
	#[serde(default)]
	pub service_account_key: Option<String>,
	#[serde(default)]
	pub project_id: Option<String>,
	#[serde(default)]
	pub bucket: Option<SharedBucket>,
}

impl Credentials {
	pub fn with_shared_bucket(mut self, bucket: &str) -> Self {
		self.bucket = Some(SharedBucket {
			bucket: Some(bucket.to_string()),
			version: Some("v2".to_string()),
		});
		self
	}
}

/// A resolved filesource: which provider/product holds the data and how to reach it.
/// Provider and product stay raw strings so that the dispatcher can reject unknown pairs.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Filesource {
	pub provider: String,
	pub product: String,
	#[serde(default)]
	pub credentials: Credentials,
}

impl Filesource {
	pub fn new(provider: &str, product: &str, credentials: Credentials) -> Self {
		Self {
			provider: provider.to_string(),
			product: product.to_string(),
			credentials,
		}
	}

	pub fn amazon(credentials: Credentials) -> Self {
		Self::new("amazon", "s3", credentials)
	}

	pub fn google(credentials: Credentials) -> Self {
		Self::new("google", "storage", credentials)
	}

	pub fn same_kind(&self, other: &Filesource) -> bool {
		self.provider == other.provider && self.product == other.product
	}
}

/// One immutable stored revision of an object
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersion {
	pub path: String,
	pub version_id: String,
	pub is_latest: bool,
	pub size: u64,
}

/// Versioning tombstone (S3 only)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeleteMarker {
	pub path: String,
	pub version_id: String,
	pub is_latest: bool,
}

/// Full version history under a prefix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileVersions {
	pub versions: Vec<ObjectVersion>,
	pub delete_markers: Vec<DeleteMarker>,
}

impl FileVersions {
	pub fn len(&self) -> usize {
		self.versions.len() + self.delete_markers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.versions.is_empty() && self.delete_markers.is_empty()
	}
}

/// Object versions recorded when a backup was taken
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct BackupManifest {
	#[serde(default)]
	pub public: Vec<ObjectVersion>,
	#[serde(default)]
	pub private: Vec<ObjectVersion>,
}

impl BackupManifest {
	pub fn len(&self) -> usize {
		self.public.len() + self.private.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// A backup found under `backups/`, tagged with the filesource it was listed from
#[derive(Debug, Clone)]
pub struct Backup {
	pub name: String,
	pub filesource_id: String,
	pub filesource: Filesource,
	pub date: Option<NaiveDate>,
}

impl Backup {
	/// Folder handed to `delete_all` when this backup is purged
	pub fn folder(&self) -> String {
		format!("{}{}/", BACKUPS_PREFIX, self.name)
	}
}
