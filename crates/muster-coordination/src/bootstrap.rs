//! Rendezvous: establishing one shared store across the group.
//!
//! No rank knows any other rank's address up front. The coordinator binds a
//! store endpoint (retrying on a fresh ephemeral port within a bounded
//! budget), advertises it through a one-shot [`PeerExchange`], and every
//! follower connects with bounded backoff. Bootstrap failure is fatal for
//! the whole group - there is no partial progress without the store.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use muster_store::CoordinationStore;
use muster_store::MemoryStore;
use muster_store::TcpStoreClient;
use muster_store::TcpStoreServer;
use muster_store::keys::COORDINATOR_KEY;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use crate::config::BroadcastConfig;
use crate::config::GroupConfig;
use crate::error::CoordinationError;
use crate::retry::RetryFailure;
use crate::retry::retry_until;

/// Store endpoint record advertised by the coordinator.
///
/// Serialized as JSON, both through the peer exchange transport and under
/// the `#COORDINATOR` store key, for human readability when debugging a
/// stuck bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointAdvert {
    /// Reachable host of the store endpoint.
    pub host: String,
    /// Port the store endpoint is bound to.
    pub port: u16,
    /// Rank of the advertising coordinator.
    pub coordinator_rank: u32,
}

impl EndpointAdvert {
    /// Parse the advertised endpoint into a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, CoordinationError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| CoordinationError::BootstrapFailed {
                reason: format!("unparseable advertised endpoint '{}:{}'", self.host, self.port),
            })
    }
}

/// One-shot, group-wide exchange of the coordinator's endpoint.
///
/// This is the only out-of-band channel the design needs; everything after
/// bootstrap flows through the store. Implementations exist per deployment
/// (process-group launchers, environment plumbing); [`LocalPeerExchange`]
/// covers in-process groups and tests.
#[async_trait]
pub trait PeerExchange: Send + Sync {
    /// Publish the advert (coordinator, `Some`) or receive it (followers,
    /// `None`). Every caller returns the coordinator's advert.
    async fn exchange(&self, advert: Option<EndpointAdvert>) -> Result<EndpointAdvert, CoordinationError>;
}

/// In-process peer exchange backed by a watch channel.
///
/// Waits indefinitely for the advert; the bootstrap bounds the wait with
/// its configured advert timeout.
pub struct LocalPeerExchange {
    advert: watch::Sender<Option<EndpointAdvert>>,
}

impl LocalPeerExchange {
    /// Create an exchange shared by all ranks of an in-process group.
    pub fn new() -> Arc<Self> {
        let (advert, _) = watch::channel(None);
        Arc::new(Self { advert })
    }
}

#[async_trait]
impl PeerExchange for LocalPeerExchange {
    async fn exchange(&self, advert: Option<EndpointAdvert>) -> Result<EndpointAdvert, CoordinationError> {
        if let Some(advert) = advert {
            self.advert.send_replace(Some(advert.clone()));
            return Ok(advert);
        }

        let mut receiver = self.advert.subscribe();
        loop {
            if let Some(advert) = receiver.borrow_and_update().clone() {
                return Ok(advert);
            }
            if receiver.changed().await.is_err() {
                // Sender dropped without ever advertising; let the caller's
                // timeout fire.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// The established rendezvous: a ready store shared by the whole group.
pub struct Rendezvous {
    /// Store handle for this rank. Lives for the process lifetime.
    pub store: Arc<dyn CoordinationStore>,
    /// The hosted endpoint, present only on the coordinator. Dropping it
    /// tears the group's store down.
    pub server: Option<TcpStoreServer>,
}

impl std::fmt::Debug for Rendezvous {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rendezvous")
            .field("server", &self.server.is_some())
            .finish_non_exhaustive()
    }
}

/// Establishes the shared store for one rank.
pub struct RendezvousBootstrap<X: PeerExchange + ?Sized> {
    group: GroupConfig,
    config: BroadcastConfig,
    exchange: Arc<X>,
    /// Host the coordinator binds and advertises. Address discovery is the
    /// deployment's concern; this layer only consumes the result.
    advertise_host: String,
}

impl<X: PeerExchange + ?Sized> RendezvousBootstrap<X> {
    /// Create a bootstrap for this rank.
    pub fn new(
        group: GroupConfig,
        config: BroadcastConfig,
        exchange: Arc<X>,
        advertise_host: impl Into<String>,
    ) -> Self {
        config.validate();
        let advertise_host = advertise_host.into();
        assert!(!advertise_host.is_empty(), "BOOTSTRAP: advertise_host must not be empty");
        Self {
            group,
            config,
            exchange,
            advertise_host,
        }
    }

    /// Run the rendezvous for this rank.
    pub async fn run(&self, shutdown: &CancellationToken) -> Result<Rendezvous, CoordinationError> {
        // A single-member group needs no coordination at all.
        if self.group.world_size == 1 {
            debug!("single-member group, using in-process store");
            return Ok(Rendezvous {
                store: MemoryStore::new(),
                server: None,
            });
        }

        if self.group.is_coordinator() {
            self.run_coordinator(shutdown).await
        } else {
            self.run_follower(shutdown).await
        }
    }

    async fn run_coordinator(&self, shutdown: &CancellationToken) -> Result<Rendezvous, CoordinationError> {
        let server = self.bind_endpoint(shutdown).await?;
        let advert = EndpointAdvert {
            host: self.advertise_host.clone(),
            port: server.local_addr().port(),
            coordinator_rank: self.group.rank,
        };

        // Record the coordinator identity in the store itself so every
        // member can validate it against its own configuration.
        let record = serde_json::to_vec(&advert).map_err(|error| CoordinationError::Codec {
            operation: "encoding endpoint record",
            reason: error.to_string(),
        })?;
        server.store().set(COORDINATOR_KEY, &record).await?;

        self.exchange.exchange(Some(advert.clone())).await?;
        info!(host = %advert.host, port = advert.port, "store endpoint advertised");

        // The coordinator talks to its own endpoint in-process.
        Ok(Rendezvous {
            store: server.store(),
            server: Some(server),
        })
    }

    async fn run_follower(&self, shutdown: &CancellationToken) -> Result<Rendezvous, CoordinationError> {
        let advert_timeout = Duration::from_millis(self.config.advert_timeout_ms);
        let advert = tokio::select! {
            _ = shutdown.cancelled() => {
                return Err(CoordinationError::Aborted {
                    operation: "bootstrap advert wait".to_string(),
                });
            }
            advert = tokio::time::timeout(advert_timeout, self.exchange.exchange(None)) => {
                match advert {
                    Ok(advert) => advert?,
                    Err(_) => {
                        return Err(CoordinationError::BootstrapFailed {
                            reason: format!(
                                "no endpoint advert within {}ms - coordinator never advertised",
                                self.config.advert_timeout_ms
                            ),
                        });
                    }
                }
            }
        };
        if advert.coordinator_rank != self.group.coordinator_rank {
            return Err(CoordinationError::CoordinatorConflict {
                advertised: advert.coordinator_rank,
                configured: self.group.coordinator_rank,
            });
        }

        let addr = advert.socket_addr()?;
        let client = self.connect_endpoint(addr, shutdown).await?;

        // Cross-check against the record the coordinator wrote into the
        // store, so a stale advert pointing at the wrong store is caught.
        let record = client.get(COORDINATOR_KEY).await?;
        let stored: EndpointAdvert = serde_json::from_slice(&record).map_err(|error| CoordinationError::Codec {
            operation: "decoding endpoint record",
            reason: error.to_string(),
        })?;
        if stored.coordinator_rank != self.group.coordinator_rank {
            return Err(CoordinationError::CoordinatorConflict {
                advertised: stored.coordinator_rank,
                configured: self.group.coordinator_rank,
            });
        }

        info!(rank = self.group.rank, %addr, "joined store endpoint");
        Ok(Rendezvous {
            store: Arc::new(client),
            server: None,
        })
    }

    async fn bind_endpoint(&self, shutdown: &CancellationToken) -> Result<TcpStoreServer, CoordinationError> {
        // Ephemeral port: each attempt asks the OS for a fresh one.
        retry_until(
            "store endpoint bind",
            self.config.max_bind_attempts,
            Duration::from_millis(self.config.bind_retry_backoff_ms),
            shutdown,
            || TcpStoreServer::bind((self.advertise_host.as_str(), 0)),
        )
        .await
        .map_err(|failure| match failure {
            RetryFailure::Aborted => CoordinationError::Aborted {
                operation: "bootstrap bind".to_string(),
            },
            RetryFailure::Exhausted { attempts, last } => CoordinationError::BootstrapFailed {
                reason: format!("could not bind a store endpoint after {attempts} attempts: {last}"),
            },
        })
    }

    async fn connect_endpoint(
        &self,
        addr: SocketAddr,
        shutdown: &CancellationToken,
    ) -> Result<TcpStoreClient, CoordinationError> {
        retry_until(
            "store endpoint connect",
            self.config.max_connect_attempts,
            Duration::from_millis(self.config.connect_retry_backoff_ms),
            shutdown,
            || TcpStoreClient::connect(addr),
        )
        .await
        .map_err(|failure| match failure {
            RetryFailure::Aborted => CoordinationError::Aborted {
                operation: "bootstrap connect".to_string(),
            },
            RetryFailure::Exhausted { attempts, last } => CoordinationError::BootstrapFailed {
                reason: format!("could not reach store endpoint {addr} after {attempts} attempts: {last}"),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BroadcastConfig {
        BroadcastConfig {
            connect_retry_backoff_ms: 5,
            bind_retry_backoff_ms: 5,
            ..BroadcastConfig::default()
        }
    }

    #[tokio::test]
    async fn single_member_group_skips_networking() {
        let exchange = LocalPeerExchange::new();
        let bootstrap = RendezvousBootstrap::new(
            GroupConfig::new(1, 0, 0),
            fast_config(),
            exchange,
            "127.0.0.1",
        );

        let rendezvous = bootstrap.run(&CancellationToken::new()).await.unwrap();
        assert!(rendezvous.server.is_none());
        rendezvous.store.set("probe", b"1").await.unwrap();
    }

    #[tokio::test]
    async fn coordinator_and_followers_share_one_store() {
        let exchange = LocalPeerExchange::new();
        let shutdown = CancellationToken::new();

        let mut handles = Vec::new();
        for rank in 0..3u32 {
            let exchange = exchange.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let bootstrap = RendezvousBootstrap::new(
                    GroupConfig::new(3, rank, 0),
                    fast_config(),
                    exchange,
                    "127.0.0.1",
                );
                bootstrap.run(&shutdown).await
            }));
        }

        let mut rendezvous = Vec::new();
        for handle in handles {
            rendezvous.push(handle.await.unwrap().unwrap());
        }

        assert!(rendezvous[0].server.is_some());
        rendezvous[1].store.set("shared", b"value").await.unwrap();
        assert_eq!(rendezvous[2].store.get("shared").await.unwrap(), b"value");
        assert_eq!(rendezvous[0].store.get("shared").await.unwrap(), b"value");
    }

    #[tokio::test]
    async fn mismatched_coordinator_rank_is_fatal() {
        let exchange = LocalPeerExchange::new();
        let shutdown = CancellationToken::new();

        // Coordinator believes rank 0 coordinates.
        let coordinator_exchange = exchange.clone();
        let coordinator_shutdown = shutdown.clone();
        let coordinator = tokio::spawn(async move {
            let bootstrap = RendezvousBootstrap::new(
                GroupConfig::new(3, 0, 0),
                fast_config(),
                coordinator_exchange,
                "127.0.0.1",
            );
            bootstrap.run(&coordinator_shutdown).await
        });

        // Follower was configured with rank 1 as coordinator.
        let follower = RendezvousBootstrap::new(
            GroupConfig::new(3, 2, 1),
            fast_config(),
            exchange,
            "127.0.0.1",
        );
        let err = follower.run(&shutdown).await.unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::CoordinatorConflict { advertised: 0, configured: 1 }
        ));

        coordinator.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn follower_times_out_without_an_advert() {
        let exchange = LocalPeerExchange::new();
        let bootstrap = RendezvousBootstrap::new(
            GroupConfig::new(2, 1, 0),
            BroadcastConfig {
                advert_timeout_ms: 30,
                ..fast_config()
            },
            exchange,
            "127.0.0.1",
        );

        let err = bootstrap.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, CoordinationError::BootstrapFailed { .. }));
    }
}
