//! Shared key-value coordination store for muster process groups.
//!
//! This crate provides the store layer that the coordination primitives in
//! `muster-coordination` are built on:
//!
//! - [`CoordinationStore`] - the store interface: `set`, `get`, `delete`,
//!   and a blocking `wait` on key existence
//! - [`MemoryStore`] - in-process implementation, also the state behind the
//!   TCP server
//! - [`TcpStoreServer`] / [`TcpStoreClient`] - a minimal TCP-hosted store so
//!   a process group can rendezvous through one endpoint
//!
//! Keys are plain strings, values are opaque byte blobs. The store is the
//! single source of truth for cross-process signaling; it performs no
//! interpretation of values beyond size validation.

pub mod constants;
mod error;
pub mod keys;
mod memory;
mod net;
mod traits;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use net::TcpStoreClient;
pub use net::TcpStoreServer;
pub use traits::CoordinationStore;
