//! Group identity and retry/timeout configuration.

/// Fixed identity of one rank within a coordination group.
///
/// Immutable after bootstrap. Exactly one rank is the coordinator, chosen by
/// configuration, never elected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupConfig {
    /// Number of ranks in the group.
    pub world_size: u32,
    /// This process's rank, in `[0, world_size)`.
    pub rank: u32,
    /// The rank that hosts the store and runs cleanup.
    pub coordinator_rank: u32,
}

impl GroupConfig {
    /// Create a validated group identity.
    pub fn new(world_size: u32, rank: u32, coordinator_rank: u32) -> Self {
        // Tiger Style: argument validation
        assert!(world_size >= 1, "GROUP: world_size must be at least 1");
        assert!(rank < world_size, "GROUP: rank must be within [0, world_size)");
        assert!(
            coordinator_rank < world_size,
            "GROUP: coordinator_rank must be within [0, world_size)"
        );
        Self {
            world_size,
            rank,
            coordinator_rank,
        }
    }

    /// Whether this process is the configured coordinator.
    pub fn is_coordinator(&self) -> bool {
        self.rank == self.coordinator_rank
    }
}

/// Timeouts and retry budgets for rendezvous and broadcast.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Per-attempt store wait timeout in milliseconds. Short, so the
    /// shutdown signal is observed between attempts.
    pub wait_attempt_timeout_ms: u64,
    /// Total wait budget in milliseconds; attempts are derived as
    /// `ceil(total / per_attempt)`.
    pub wait_total_timeout_ms: u64,
    /// Backoff between restarted broadcast attempts after a transient store
    /// failure, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Restarts of a broadcast round on transient store failure.
    pub max_broadcast_attempts: u32,
    /// Bind attempts for the coordinator's store endpoint.
    pub max_bind_attempts: u32,
    /// Backoff between bind attempts in milliseconds.
    pub bind_retry_backoff_ms: u64,
    /// Connect attempts for followers joining the store.
    pub max_connect_attempts: u32,
    /// Backoff between connect attempts in milliseconds.
    pub connect_retry_backoff_ms: u64,
    /// How long a rank waits for the coordinator's endpoint advert during
    /// bootstrap, in milliseconds.
    pub advert_timeout_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            wait_attempt_timeout_ms: 10_000,  // 10 seconds per attempt
            wait_total_timeout_ms: 600_000,   // 10 minutes overall
            retry_backoff_ms: 100,
            max_broadcast_attempts: 10,
            max_bind_attempts: 300,
            bind_retry_backoff_ms: 100,
            max_connect_attempts: 300,
            connect_retry_backoff_ms: 100,
            advert_timeout_ms: 60_000,
        }
    }
}

impl BroadcastConfig {
    /// Number of per-attempt waits covered by the total budget.
    pub fn wait_attempts(&self) -> u32 {
        debug_assert!(self.wait_attempt_timeout_ms > 0);
        let attempts = self.wait_total_timeout_ms.div_ceil(self.wait_attempt_timeout_ms);
        (attempts.max(1)).min(u32::MAX as u64) as u32
    }

    /// Panic on nonsensical budgets. Called by the components that consume
    /// the config, so a hand-built config fails fast.
    pub(crate) fn validate(&self) {
        assert!(self.wait_attempt_timeout_ms > 0, "CONFIG: wait attempt timeout must be positive");
        assert!(
            self.wait_total_timeout_ms >= self.wait_attempt_timeout_ms,
            "CONFIG: total wait budget must cover at least one attempt"
        );
        assert!(self.max_broadcast_attempts > 0, "CONFIG: broadcast attempts must be positive");
        assert!(self.max_bind_attempts > 0, "CONFIG: bind attempts must be positive");
        assert!(self.max_connect_attempts > 0, "CONFIG: connect attempts must be positive");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_identity() {
        let group = GroupConfig::new(3, 0, 0);
        assert!(group.is_coordinator());
        let group = GroupConfig::new(3, 2, 0);
        assert!(!group.is_coordinator());
    }

    #[test]
    #[should_panic(expected = "rank must be within")]
    fn rank_out_of_range_panics() {
        GroupConfig::new(2, 2, 0);
    }

    #[test]
    fn wait_attempts_round_up() {
        let config = BroadcastConfig {
            wait_attempt_timeout_ms: 10,
            wait_total_timeout_ms: 25,
            ..BroadcastConfig::default()
        };
        assert_eq!(config.wait_attempts(), 3);
    }
}
