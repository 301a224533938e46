pub mod s3;
pub mod gcs;
pub mod memory;

pub use s3::S3Connector;
pub use gcs::GcsConnector;
pub use memory::MemoryConnector;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use tokio::sync::Mutex;

use crate::storage::backend::StorageError;

/// Provider SDK clients keyed by the credential fields that select them.
///
/// A batch of deletes or copies shares one client (and its connection pool)
/// instead of loading configuration for every item.
pub(crate) struct ClientCache<K, C> {
    clients: Mutex<HashMap<K, C>>,
}

impl<K, C> Default for ClientCache<K, C> {
    fn default() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, C> fmt::Debug for ClientCache<K, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCache").finish_non_exhaustive()
    }
}

impl<K, C> ClientCache<K, C>
where
    K: Eq + Hash,
    C: Clone,
{
    /// Return the cached client for `key`, building it on first use.
    /// Failed builds are not cached.
    pub(crate) async fn get_or_build<F, Fut>(&self, key: K, build: F) -> Result<C, StorageError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C, StorageError>>,
    {
        // held across the build so concurrent callers wait for one client
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = build().await?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }
}
