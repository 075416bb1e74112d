//! Key derivation for the broadcast namespace.
//!
//! Every broadcast round lives under an epoch-scoped key: the published
//! value under `#BROADCAST-<epoch>`, and one acknowledgment marker per rank
//! under `<value-key>-done-<rank>`. Keys never collide across epochs because
//! epochs only move forward within a process lifetime.

/// Prefix of the per-epoch broadcast value key.
pub const BROADCAST_PREFIX: &str = "#BROADCAST-";

/// Key holding the coordinator's endpoint record, written once at bootstrap.
pub const COORDINATOR_KEY: &str = "#COORDINATOR";

/// Key under which the broadcast value for `epoch` is published.
pub fn broadcast_key(epoch: u64) -> String {
    format!("{BROADCAST_PREFIX}{epoch}")
}

/// Acknowledgment marker key for one rank within a round.
pub fn done_key(value_key: &str, rank: u32) -> String {
    format!("{value_key}-done-{rank}")
}

/// Acknowledgment marker keys for every rank in the group, in rank order.
pub fn done_keys(value_key: &str, world_size: u32) -> Vec<String> {
    (0..world_size).map(|rank| done_key(value_key, rank)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_key_is_epoch_scoped() {
        assert_eq!(broadcast_key(0), "#BROADCAST-0");
        assert_eq!(broadcast_key(17), "#BROADCAST-17");
    }

    #[test]
    fn done_key_includes_rank() {
        let key = broadcast_key(3);
        assert_eq!(done_key(&key, 2), "#BROADCAST-3-done-2");
    }

    #[test]
    fn done_keys_cover_all_ranks_in_order() {
        let key = broadcast_key(0);
        let keys = done_keys(&key, 3);
        assert_eq!(keys, vec![
            "#BROADCAST-0-done-0",
            "#BROADCAST-0-done-1",
            "#BROADCAST-0-done-2",
        ]);
    }

    #[test]
    fn epochs_never_collide() {
        let first = done_keys(&broadcast_key(0), 2);
        let second = done_keys(&broadcast_key(1), 2);
        for key in &first {
            assert!(!second.contains(key));
        }
        assert_ne!(broadcast_key(0), broadcast_key(1));
    }
}
