//! In-process coordination store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::sync::watch;

use crate::constants::MAX_KEY_SIZE;
use crate::constants::MAX_VALUE_SIZE;
use crate::constants::MAX_WAIT_KEYS;
use crate::error::StoreError;
use crate::traits::CoordinationStore;

/// In-memory implementation of [`CoordinationStore`].
///
/// Backs single-member groups, unit tests, and the state behind
/// [`TcpStoreServer`](crate::TcpStoreServer). `wait` is notification-driven:
/// a revision counter in a watch channel is bumped on every `set`, so
/// waiters block on the channel instead of polling the map.
pub struct MemoryStore {
    /// Key-value data.
    data: RwLock<BTreeMap<String, Vec<u8>>>,
    /// Revision counter, bumped on every mutation that can satisfy a wait.
    revision: watch::Sender<u64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new_inner()
    }
}

impl MemoryStore {
    /// Create a new store wrapped in `Arc`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::new_inner())
    }

    fn new_inner() -> Self {
        let (revision, _) = watch::channel(0u64);
        Self {
            data: RwLock::new(BTreeMap::new()),
            revision,
        }
    }

    /// Snapshot of all live keys, in sorted order.
    pub async fn keys(&self) -> Vec<String> {
        self.data.read().await.keys().cloned().collect()
    }
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() {
        return Err(StoreError::Protocol {
            reason: "empty key".to_string(),
        });
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(StoreError::KeyTooLarge {
            size: key.len(),
            max: MAX_KEY_SIZE,
        });
    }
    Ok(())
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(StoreError::ValueTooLarge {
                size: value.len(),
                max: MAX_VALUE_SIZE,
            });
        }

        let mut data = self.data.write().await;
        data.insert(key.to_string(), value.to_vec());
        drop(data);

        self.revision.send_modify(|rev| *rev += 1);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        validate_key(key)?;
        let data = self.data.read().await;
        match data.get(key) {
            Some(value) => Ok(value.clone()),
            None => Err(StoreError::NotFound { key: key.to_string() }),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        let mut data = self.data.write().await;
        data.remove(key);
        Ok(())
    }

    async fn wait(&self, keys: &[String], timeout: Duration) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        if keys.len() > MAX_WAIT_KEYS {
            return Err(StoreError::Protocol {
                reason: format!("wait on {} keys exceeds maximum of {MAX_WAIT_KEYS}", keys.len()),
            });
        }
        for key in keys {
            validate_key(key)?;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        // Subscribe before the first check so a concurrent set between the
        // check and the await is observed as a changed revision.
        let mut revision = self.revision.subscribe();

        loop {
            {
                let data = self.data.read().await;
                if keys.iter().all(|key| data.contains_key(key)) {
                    return Ok(());
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(StoreError::WaitTimeout {
                    duration_ms: timeout.as_millis() as u64,
                });
            }

            match tokio::time::timeout(remaining, revision.changed()).await {
                Ok(Ok(())) => {}
                // The sender lives inside self, so this arm is unreachable in
                // practice; surface it as unavailability rather than panic.
                Ok(Err(_)) => {
                    return Err(StoreError::Unavailable {
                        reason: "store revision channel closed".to_string(),
                    });
                }
                Err(_) => {
                    return Err(StoreError::WaitTimeout {
                        duration_ms: timeout.as_millis() as u64,
                    });
                }
            }
        }
    }
}
