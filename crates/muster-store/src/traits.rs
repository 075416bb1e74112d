//! The coordination store interface.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// Blocking, key-addressed primitives over a shared store.
///
/// Implementations own their transport; callers see only keys and byte
/// values. All operations are linearized by the store itself - this layer
/// adds no locking of its own.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Set a key to a value, overwriting any previous value. Idempotent.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Get the value of a key.
    ///
    /// Absence is an error (`NotFound`), not an empty success: callers are
    /// expected to have confirmed presence via [`wait`](Self::wait) first.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Block until every listed key exists or the timeout elapses.
    ///
    /// Does not read or consume the values.
    async fn wait(&self, keys: &[String], timeout: Duration) -> Result<(), StoreError>;
}

// Blanket implementation for Arc<T>
#[async_trait]
impl<T: CoordinationStore + ?Sized> CoordinationStore for std::sync::Arc<T> {
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        (**self).set(key, value).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }

    async fn wait(&self, keys: &[String], timeout: Duration) -> Result<(), StoreError> {
        (**self).wait(keys, timeout).await
    }
}
