//! Pre-seeded hashing and LRU map types shared by the `pool` and `manager`
//! modules.

use ahash::RandomState;
use schnellru::ByLength;

/// Pre-seeded [`RandomState`] for consistent internal hashing.
///
/// Uses fixed seeds to ensure deterministic hashing behavior across
/// program runs. Primarily used for connection pool keys and the
/// manager's pool cache.
///
/// **Note**: Not cryptographically secure due to fixed seeds.
pub const HASHER: RandomState = RandomState::with_seeds(
    0x6b68_d618_a4b5_3c57,
    0xadc8_c4d5_82bb_1313,
    0x2f72_c2c1_9b04_2d4c,
    0x94e5_8d83_a26c_3f28,
);

/// A hash map using `ahash` with the crate's pre-seeded `RandomState`.
pub type HashMap<K, V> = std::collections::HashMap<K, V, RandomState>;

/// A hash set using `ahash` with the crate's pre-seeded `RandomState`.
pub type HashSet<T> = std::collections::HashSet<T, RandomState>;

/// A bounded LRU map using `schnellru`, keyed with the pre-seeded hasher.
/// Backs the [`crate::manager::Manager`]'s pool cache.
pub type LruMap<K, V> = schnellru::LruMap<K, V, ByLength, RandomState>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hasher_is_deterministic_across_instances() {
        let a = HASHER.hash_one("http|example.com|443");
        let b = HASHER.hash_one("http|example.com|443");
        assert_eq!(a, b);
    }

    #[test]
    fn lru_map_evicts_oldest_on_overflow() {
        let mut map: LruMap<u32, &'static str> = LruMap::new(ByLength::new(2));
        map.insert(1, "a");
        map.insert(2, "b");
        map.insert(3, "c");
        assert_eq!(map.len(), 2);
        assert!(map.get(&1).is_none());
        assert!(map.get(&2).is_some());
        assert!(map.get(&3).is_some());
    }
}
