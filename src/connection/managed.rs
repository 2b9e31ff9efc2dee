use async_trait::async_trait;

use crate::store::{KvStore, StoreError};

use super::{ConnectionError, ConnectionManager};

/// A [`KvStore`] bound to one named connection of a [`ConnectionManager`].
///
/// Each call resolves the current client and runs under the manager's
/// operation timeout, so callers survive reconnects without holding a handle.
/// An unconfigured or degraded connection surfaces as
/// [`StoreError::Unavailable`].
#[derive(Clone)]
pub struct ManagedClient {
    manager: ConnectionManager,
    name: String,
}

impl ManagedClient {
    pub(super) fn new(manager: ConnectionManager, name: String) -> Self {
        Self { manager, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn unavailable(&self) -> StoreError {
        StoreError::Unavailable(self.name.clone())
    }

    fn lift<T>(
        &self,
        op: &'static str,
        outcome: Result<Option<T>, ConnectionError>,
    ) -> Result<T, StoreError> {
        match outcome {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(self.unavailable()),
            Err(ConnectionError::Operation { source, .. }) => Err(source),
            Err(err) => Err(StoreError::command(op, err.to_string())),
        }
    }
}

#[async_trait]
impl KvStore for ManagedClient {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let outcome = self
            .manager
            .with_timeout(&self.name, "get", None, |client| async move {
                client.get(key).await
            })
            .await;
        self.lift("get", outcome)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let outcome = self
            .manager
            .with_timeout(&self.name, "set", None, |client| async move {
                client.set(key, value).await
            })
            .await;
        self.lift("set", outcome)
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        ttl_seconds: u64,
        value: &str,
    ) -> Result<(), StoreError> {
        let outcome = self
            .manager
            .with_timeout(&self.name, "set_with_expiry", None, |client| async move {
                client.set_with_expiry(key, ttl_seconds, value).await
            })
            .await;
        self.lift("set_with_expiry", outcome)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let outcome = self
            .manager
            .with_timeout(&self.name, "delete", None, |client| async move {
                client.delete(keys).await
            })
            .await;
        self.lift("delete", outcome)
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let outcome = self
            .manager
            .with_timeout(&self.name, "keys_matching", None, |client| async move {
                client.keys_matching(pattern).await
            })
            .await;
        self.lift("keys_matching", outcome)
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        let outcome = self
            .manager
            .with_timeout(&self.name, "ttl", None, |client| async move {
                client.ttl(key).await
            })
            .await;
        self.lift("ttl", outcome)
    }

    /// Closes the underlying named connection.
    async fn close(&self) -> Result<(), StoreError> {
        self.manager.disconnect(&self.name).await;
        Ok(())
    }

    /// Always `true`: the manager reconnects on demand.
    fn is_open(&self) -> bool {
        true
    }
}
