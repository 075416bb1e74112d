//! Test doubles for exercising failure paths.

use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use muster_store::CoordinationStore;
use muster_store::MemoryStore;
use muster_store::StoreError;

/// Store that fails the first `failures` operations with a transient
/// `Unavailable` error, then delegates to an in-process store.
pub(crate) struct FlakyStore {
    inner: Arc<MemoryStore>,
    remaining: AtomicU32,
}

impl FlakyStore {
    pub(crate) fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            remaining: AtomicU32::new(failures),
        })
    }

    /// Direct handle to the backing store, bypassing fault injection.
    pub(crate) fn inner(&self) -> Arc<MemoryStore> {
        self.inner.clone()
    }

    fn trip(&self) -> Result<(), StoreError> {
        let outcome = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        match outcome {
            Ok(_) => Err(StoreError::Unavailable {
                reason: "injected outage".to_string(),
            }),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl CoordinationStore for FlakyStore {
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.trip()?;
        self.inner.set(key, value).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.trip()?;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.trip()?;
        self.inner.delete(key).await
    }

    async fn wait(&self, keys: &[String], timeout: Duration) -> Result<(), StoreError> {
        self.trip()?;
        self.inner.wait(keys, timeout).await
    }
}
