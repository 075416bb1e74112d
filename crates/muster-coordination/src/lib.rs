//! Barrier-synchronized broadcast for fixed-size process groups.
//!
//! A group of `world_size` ranks agrees on one command per round: a fixed,
//! configured coordinator publishes the command into a shared key-value
//! store under an epoch-scoped key, every other rank retrieves exactly that
//! value, and no rank proceeds until all ranks have acknowledged. Rounds are
//! scoped by a monotonically increasing epoch so a retried or slow rank can
//! never observe a stale value.
//!
//! All coordination happens through the store - there is no direct
//! rank-to-rank messaging. The building blocks:
//!
//! - [`RendezvousBootstrap`] - establishes the shared store: the coordinator
//!   binds an endpoint and advertises it, followers connect
//! - [`Waiter`] - cancellable bounded retry around the store's blocking wait
//! - [`BroadcastCoordinator`] - the per-round publish / acknowledge / cleanup
//!   state machine
//!
//! This is not a consensus system: the coordinator is configured, never
//! elected, and permanent loss of the coordinator is fatal to the group.
//!
//! ## Example
//!
//! ```ignore
//! let group = GroupConfig::new(world_size, rank, 0);
//! let shutdown = CancellationToken::new();
//! let bootstrap = RendezvousBootstrap::new(group.clone(), BroadcastConfig::default(), exchange, "10.0.0.1");
//! let rendezvous = bootstrap.run(&shutdown).await?;
//!
//! let mut coordinator = BroadcastCoordinator::new(
//!     rendezvous.store.clone(),
//!     PostcardCodec::<MyCommand>::new(),
//!     group,
//!     BroadcastConfig::default(),
//!     shutdown,
//! );
//! let command = coordinator.broadcast(local_command, 0).await?;
//! ```

mod bootstrap;
mod broadcast;
mod codec;
mod config;
mod error;
mod retry;
#[cfg(test)]
mod test_support;
mod waiter;

pub use bootstrap::EndpointAdvert;
pub use bootstrap::LocalPeerExchange;
pub use bootstrap::PeerExchange;
pub use bootstrap::Rendezvous;
pub use bootstrap::RendezvousBootstrap;
pub use broadcast::BroadcastCoordinator;
pub use codec::BytesCodec;
pub use codec::CommandCodec;
pub use codec::PostcardCodec;
pub use config::BroadcastConfig;
pub use config::GroupConfig;
pub use error::CoordinationError;
pub use waiter::Waiter;
