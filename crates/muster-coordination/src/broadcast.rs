//! The per-round broadcast state machine.

use std::sync::Arc;

use muster_store::CoordinationStore;
use muster_store::keys;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::codec::CommandCodec;
use crate::config::BroadcastConfig;
use crate::config::GroupConfig;
use crate::error::CoordinationError;
use crate::waiter::Waiter;

/// Barrier-synchronized broadcast over the shared store.
///
/// One round, on every rank:
///
/// 1. the source publishes the packed command under `#BROADCAST-<epoch>`,
///    every other rank waits for that key and reads it;
/// 2. every rank writes its own `-done-<rank>` marker and waits for all
///    markers - the barrier;
/// 3. the source deletes the *previous* epoch's keys, never the current
///    epoch's, so a slow reader of epoch `e` can never race a delete of
///    epoch `e` (cleanup lags one round by design);
/// 4. the local epoch advances.
///
/// Rounds are not reentrant: a rank finishes one broadcast before starting
/// the next, which is why the epoch counter is plain owned state behind
/// `&mut self`.
pub struct BroadcastCoordinator<S: CoordinationStore + ?Sized, C: CommandCodec> {
    store: Arc<S>,
    codec: C,
    group: GroupConfig,
    config: BroadcastConfig,
    waiter: Waiter<S>,
    shutdown: CancellationToken,
    /// Current epoch. Advances exactly once per completed round.
    epoch: u64,
}

impl<S: CoordinationStore + ?Sized, C: CommandCodec> BroadcastCoordinator<S, C> {
    /// Create a coordinator for this rank.
    pub fn new(
        store: Arc<S>,
        codec: C,
        group: GroupConfig,
        config: BroadcastConfig,
        shutdown: CancellationToken,
    ) -> Self {
        config.validate();
        let waiter = Waiter::new(store.clone(), &config);
        Self {
            store,
            codec,
            group,
            config,
            waiter,
            shutdown,
            epoch: 0,
        }
    }

    /// The epoch of the next round.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Run one broadcast round and return the agreed command.
    ///
    /// The rank equal to `source_rank` must pass `Some(command)`; every
    /// other rank passes `None` and receives the source's command. Transient
    /// store failures restart the round from the top (all writes are
    /// idempotent); the epoch advances exactly once, only on success.
    pub async fn broadcast(
        &mut self,
        command: Option<C::Command>,
        source_rank: u32,
    ) -> Result<C::Command, CoordinationError> {
        if source_rank >= self.group.world_size {
            return Err(CoordinationError::InvalidSourceRank {
                source_rank,
                world_size: self.group.world_size,
            });
        }

        // A single-member group agrees with itself; no store traffic.
        if self.group.world_size == 1 {
            return command.ok_or(CoordinationError::MissingCommand);
        }

        let is_source = self.group.rank == source_rank;
        let packed = match &command {
            Some(command) if is_source => Some(self.codec.pack(command)?),
            _ if is_source => return Err(CoordinationError::MissingCommand),
            _ => None,
        };

        let mut attempt = 0u32;
        let resolved = loop {
            if self.shutdown.is_cancelled() {
                return Err(CoordinationError::Aborted {
                    operation: format!("broadcast epoch {}", self.epoch),
                });
            }

            match self.run_round(packed.as_deref(), is_source).await {
                Ok(raw) => break raw,
                Err(error) if error.is_retryable() => {
                    attempt += 1;
                    if attempt >= self.config.max_broadcast_attempts {
                        return Err(CoordinationError::MaxRetriesExceeded {
                            operation: format!("broadcast epoch {}", self.epoch),
                            attempts: attempt,
                        });
                    }
                    if is_source {
                        warn!(epoch = self.epoch, attempt, %error, "broadcast round failed, restarting");
                    } else {
                        debug!(epoch = self.epoch, attempt, %error, "broadcast round failed, restarting");
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(self.config.retry_backoff_ms)).await;
                }
                Err(error) => return Err(error),
            }
        };

        // The round is agreed on by all ranks; advance exactly once.
        self.epoch += 1;
        debug_assert!(self.epoch > 0);

        match resolved {
            Some(raw) => self.codec.unpack(&raw),
            // The source returns its own command unchanged.
            None => command.ok_or(CoordinationError::MissingCommand),
        }
    }

    /// One attempt at the current epoch's round.
    ///
    /// Returns the raw packed value for non-source ranks, `None` for the
    /// source. Safe to re-run from the top: `set` is an idempotent
    /// overwrite and the barrier wait tolerates markers that already exist.
    async fn run_round(
        &self,
        packed: Option<&[u8]>,
        is_source: bool,
    ) -> Result<Option<Vec<u8>>, CoordinationError> {
        let value_key = keys::broadcast_key(self.epoch);
        let all_done = keys::done_keys(&value_key, self.group.world_size);

        let raw = if let Some(payload) = packed {
            self.store.set(&value_key, payload).await?;
            debug!(epoch = self.epoch, key = %value_key, bytes = payload.len(), "published broadcast value");
            None
        } else {
            self.waiter
                .wait(std::slice::from_ref(&value_key), "broadcast value", &self.shutdown)
                .await?;
            Some(self.store.get(&value_key).await?)
        };

        // Acknowledge, then hold at the barrier until the whole group has.
        let own_done = keys::done_key(&value_key, self.group.rank);
        self.store.set(&own_done, b"1").await?;
        self.waiter.wait(&all_done, "broadcast acks", &self.shutdown).await?;
        debug!(epoch = self.epoch, rank = self.group.rank, "broadcast round acknowledged by all ranks");

        // Every rank is past epoch `e`, so nobody can still be waiting on
        // epoch `e - 1`. Only now may the previous round's keys go away.
        if is_source && let Some(previous) = self.epoch.checked_sub(1) {
            self.cleanup_epoch(previous).await;
        }

        Ok(raw)
    }

    /// Best-effort removal of a completed epoch's keys.
    async fn cleanup_epoch(&self, epoch: u64) {
        let value_key = keys::broadcast_key(epoch);
        let mut stale = keys::done_keys(&value_key, self.group.world_size);
        stale.push(value_key);

        for key in &stale {
            if let Err(error) = self.store.delete(key).await {
                debug!(key = %key, %error, "failed to delete stale broadcast key");
            }
        }
        debug!(epoch, "cleaned up previous broadcast epoch");
    }
}

#[cfg(test)]
mod tests {
    use muster_store::MemoryStore;

    use super::*;
    use crate::codec::BytesCodec;
    use crate::test_support::FlakyStore;

    fn fast_config() -> BroadcastConfig {
        BroadcastConfig {
            wait_attempt_timeout_ms: 50,
            wait_total_timeout_ms: 5_000,
            retry_backoff_ms: 5,
            ..BroadcastConfig::default()
        }
    }

    fn coordinator_for(
        store: Arc<MemoryStore>,
        world_size: u32,
        rank: u32,
        shutdown: CancellationToken,
    ) -> BroadcastCoordinator<MemoryStore, BytesCodec> {
        BroadcastCoordinator::new(
            store,
            BytesCodec,
            GroupConfig::new(world_size, rank, 0),
            fast_config(),
            shutdown,
        )
    }

    #[tokio::test]
    async fn single_rank_group_is_a_no_op() {
        let store = MemoryStore::new();
        let mut coordinator = coordinator_for(store.clone(), 1, 0, CancellationToken::new());

        let command = coordinator.broadcast(Some(b"solo".to_vec()), 0).await.unwrap();
        assert_eq!(command, b"solo");
        // Trivial broadcast performs zero store operations.
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn single_rank_group_requires_a_command() {
        let store = MemoryStore::new();
        let mut coordinator = coordinator_for(store, 1, 0, CancellationToken::new());

        let err = coordinator.broadcast(None, 0).await.unwrap_err();
        assert!(matches!(err, CoordinationError::MissingCommand));
    }

    #[tokio::test]
    async fn source_rank_outside_group_is_rejected() {
        let store = MemoryStore::new();
        let mut coordinator = coordinator_for(store, 2, 0, CancellationToken::new());

        let err = coordinator.broadcast(Some(b"x".to_vec()), 2).await.unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidSourceRank { source_rank: 2, world_size: 2 }));
    }

    #[tokio::test]
    async fn three_ranks_agree_on_the_published_command() {
        let store = MemoryStore::new();
        let shutdown = CancellationToken::new();

        let mut handles = Vec::new();
        for rank in 0..3 {
            let store = store.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut coordinator = coordinator_for(store, 3, rank, shutdown);
                let command = if rank == 0 { Some(b"CONFIG_V1".to_vec()) } else { None };
                coordinator.broadcast(command, 0).await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), b"CONFIG_V1");
        }

        // Round 0 keys survive until round 1 completes; nothing from a
        // "previous" epoch was ever created.
        let live = store.keys().await;
        assert_eq!(live, vec![
            "#BROADCAST-0",
            "#BROADCAST-0-done-0",
            "#BROADCAST-0-done-1",
            "#BROADCAST-0-done-2",
        ]);
    }

    #[tokio::test]
    async fn consecutive_rounds_use_distinct_epochs_and_lag_cleanup() {
        let store = MemoryStore::new();
        let shutdown = CancellationToken::new();

        let mut handles = Vec::new();
        for rank in 0..2 {
            let store = store.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut coordinator = coordinator_for(store, 2, rank, shutdown);
                for round in 0u64..2 {
                    let command = if rank == 0 {
                        Some(format!("round-{round}").into_bytes())
                    } else {
                        None
                    };
                    let agreed = coordinator.broadcast(command, 0).await.unwrap();
                    assert_eq!(agreed, format!("round-{round}").into_bytes());
                }
                coordinator.epoch()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 2);
        }

        // Epoch 0 was cleaned up while finishing epoch 1; epoch 1 remains.
        let live = store.keys().await;
        assert_eq!(live, vec![
            "#BROADCAST-1",
            "#BROADCAST-1-done-0",
            "#BROADCAST-1-done-1",
        ]);
    }

    #[tokio::test]
    async fn transient_store_outage_restarts_the_round_without_skipping_epochs() {
        let store = FlakyStore::new(2);
        let shutdown = CancellationToken::new();

        // The first store operations of the round fail transiently; every
        // rank restarts from the top and still agrees once.
        let mut handles = Vec::new();
        for rank in 0..2u32 {
            let store = store.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut coordinator = BroadcastCoordinator::new(
                    store,
                    BytesCodec,
                    GroupConfig::new(2, rank, 0),
                    fast_config(),
                    shutdown,
                );
                let command = if rank == 0 { Some(b"CONFIG_V1".to_vec()) } else { None };
                let agreed = coordinator.broadcast(command, 0).await.unwrap();
                (agreed, coordinator.epoch())
            }));
        }

        for handle in handles {
            let (agreed, epoch) = handle.await.unwrap();
            assert_eq!(agreed, b"CONFIG_V1");
            // The epoch advances exactly once, regardless of restarts.
            assert_eq!(epoch, 1);
        }
    }

    #[tokio::test]
    async fn missing_rank_blocks_until_shutdown_then_aborts() {
        let store = MemoryStore::new();
        let shutdown = CancellationToken::new();

        // Rank 2 never shows up.
        let mut handles = Vec::new();
        for rank in 0..2 {
            let store = store.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut coordinator = coordinator_for(store, 3, rank, shutdown);
                let command = if rank == 0 { Some(b"lost".to_vec()) } else { None };
                coordinator.broadcast(command, 0).await
            }));
        }

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        shutdown.cancel();

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, CoordinationError::Aborted { .. }));
        }
    }
}
