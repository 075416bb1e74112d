//! Fixed resource limits for the coordination store.
//!
//! Tiger Style: every resource the store allocates on behalf of a peer is
//! bounded by a compile-time constant.

/// Maximum key size in bytes.
pub const MAX_KEY_SIZE: usize = 1024;

/// Maximum value size in bytes.
pub const MAX_VALUE_SIZE: usize = 4 * 1024 * 1024;

/// Maximum number of keys in a single `wait` call.
pub const MAX_WAIT_KEYS: usize = 1024;

/// Maximum wire frame size (request or response).
///
/// Must fit the largest value plus envelope overhead.
pub const MAX_FRAME_SIZE: usize = MAX_VALUE_SIZE + 64 * 1024;

/// Client-side read timeout for non-wait requests, in milliseconds.
pub const RPC_READ_TIMEOUT_MS: u64 = 10_000;

/// Extra time the client grants the server to answer a `wait` request
/// beyond the wait timeout itself, in milliseconds.
pub const WAIT_RESPONSE_GRACE_MS: u64 = 2_000;

const _: () = assert!(MAX_KEY_SIZE > 0);
const _: () = assert!(MAX_VALUE_SIZE > MAX_KEY_SIZE);
const _: () = assert!(MAX_WAIT_KEYS > 0);
const _: () = assert!(MAX_FRAME_SIZE > MAX_VALUE_SIZE);
const _: () = assert!(RPC_READ_TIMEOUT_MS > 0);
const _: () = assert!(WAIT_RESPONSE_GRACE_MS > 0);
