//! Eviction strategy selection over store-wide access statistics.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::AccessStats;

/// Policy for selecting keys to remove when capacity is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruningStrategy {
    /// Least recently accessed first.
    #[default]
    Lru,
    /// Least frequently accessed first.
    Lfu,
    /// Entries created before a cutoff, oldest first.
    Ttl,
    /// Frequency first, recency as tie-break.
    Hybrid,
}

/// Select up to `limit` keys to evict under the given strategy.
///
/// TTL only ever selects keys created before `ttl_cutoff`; the other
/// strategies ignore the cutoff.
pub fn select_keys(
    stats: &HashMap<String, AccessStats>,
    strategy: PruningStrategy,
    limit: usize,
    ttl_cutoff: Option<DateTime<Utc>>,
) -> Vec<String> {
    if limit == 0 || stats.is_empty() {
        return Vec::new();
    }

    let mut candidates: Vec<(&String, &AccessStats)> = stats.iter().collect();

    match strategy {
        PruningStrategy::Lru => {
            candidates.sort_by_key(|(_, s)| s.last_access);
        }
        PruningStrategy::Lfu => {
            candidates.sort_by_key(|(_, s)| s.access_count);
        }
        PruningStrategy::Ttl => {
            let cutoff = ttl_cutoff.unwrap_or_else(Utc::now);
            candidates.retain(|(_, s)| s.created_at < cutoff);
            candidates.sort_by_key(|(_, s)| s.created_at);
        }
        PruningStrategy::Hybrid => {
            candidates.sort_by_key(|(_, s)| (s.access_count, s.last_access));
        }
    }

    candidates
        .into_iter()
        .take(limit)
        .map(|(key, _)| key.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn stats_at(
        access_count: u64,
        last_access_secs_ago: i64,
        created_secs_ago: i64,
    ) -> AccessStats {
        let now = Utc::now();
        AccessStats {
            access_count,
            last_access: now - Duration::seconds(last_access_secs_ago),
            created_at: now - Duration::seconds(created_secs_ago),
        }
    }

    fn sample() -> HashMap<String, AccessStats> {
        let mut stats = HashMap::new();
        // "cold": barely used, not touched in a while, old
        stats.insert("cold".to_string(), stats_at(1, 300, 600));
        // "warm": used a few times, touched recently, old
        stats.insert("warm".to_string(), stats_at(5, 10, 500));
        // "hot": heavily used, touched just now, new
        stats.insert("hot".to_string(), stats_at(50, 1, 60));
        stats
    }

    #[test]
    fn test_lru_selects_least_recently_accessed() {
        let selected = select_keys(&sample(), PruningStrategy::Lru, 1, None);
        assert_eq!(selected, vec!["cold"]);
    }

    #[test]
    fn test_lfu_selects_least_frequently_accessed() {
        let selected = select_keys(&sample(), PruningStrategy::Lfu, 2, None);
        assert_eq!(selected, vec!["cold", "warm"]);
    }

    #[test]
    fn test_ttl_respects_cutoff() {
        let cutoff = Utc::now() - Duration::seconds(400);
        let selected = select_keys(&sample(), PruningStrategy::Ttl, 10, Some(cutoff));
        // Only keys created before the cutoff qualify, oldest first.
        assert_eq!(selected, vec!["cold", "warm"]);
    }

    #[test]
    fn test_ttl_excludes_recent_entries() {
        let cutoff = Utc::now() - Duration::seconds(1000);
        let selected = select_keys(&sample(), PruningStrategy::Ttl, 10, Some(cutoff));
        assert!(selected.is_empty());
    }

    #[test]
    fn test_hybrid_orders_by_frequency_then_recency() {
        let mut stats = sample();
        // Same frequency as "cold" but accessed more recently: hybrid should
        // still evict "cold" first.
        stats.insert("tied".to_string(), stats_at(1, 5, 100));

        let selected = select_keys(&stats, PruningStrategy::Hybrid, 2, None);
        assert_eq!(selected, vec!["cold", "tied"]);
    }

    #[test]
    fn test_limit_zero_selects_nothing() {
        assert!(select_keys(&sample(), PruningStrategy::Lru, 0, None).is_empty());
    }
}
