//! Distance cache: TTL-bounded LRU keyed by canonical grid-cell pairs.
//!
//! Keys quantise both endpoints to the 0.001° grid and sort them, so
//! (A, B) and (B, A) share one entry per routing profile. Writes are
//! best-effort; a failed write is logged and never surfaces to the reader.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use log::warn;
use lru::LruCache;

use crate::geo::{canonical_cell_pair, GeoPoint, GridCell};

use super::provider::RoutingProfile;

/// Canonical cache key: ordered grid-cell pair plus profile tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DistanceKey {
    a: GridCell,
    b: GridCell,
    profile: RoutingProfile,
}

impl DistanceKey {
    pub fn canonical(from: GeoPoint, to: GeoPoint, profile: RoutingProfile) -> Self {
        let (a, b) = canonical_cell_pair(from, to);
        Self { a, b, profile }
    }
}

/// A cached distance/duration pair with its creation and expiry timestamps.
#[derive(Debug, Clone)]
pub struct DistanceEntry {
    pub distance_m: f64,
    pub duration_s: f64,
    pub geometry: Option<Vec<(f64, f64)>>,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}

impl DistanceEntry {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

pub struct DistanceCache {
    entries: Mutex<LruCache<DistanceKey, DistanceEntry>>,
    ttl_ms: u64,
}

impl DistanceCache {
    pub fn new(capacity: usize, ttl_ms: u64) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("cache capacity must be > 0"),
            )),
            ttl_ms,
        }
    }

    /// Look up a key; an expired entry is evicted and treated as a miss.
    pub fn get(&self, key: &DistanceKey, now_ms: u64) -> Option<DistanceEntry> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now_ms) => Some(entry.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    /// Insert or overwrite. Concurrent duplicate fills are allowed; the
    /// second write is a harmless overwrite.
    pub fn put(
        &self,
        key: DistanceKey,
        distance_m: f64,
        duration_s: f64,
        geometry: Option<Vec<(f64, f64)>>,
        now_ms: u64,
    ) {
        let entry = DistanceEntry {
            distance_m,
            duration_s,
            geometry,
            created_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(self.ttl_ms),
        };
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.put(key, entry);
            }
            Err(_) => warn!("distance cache write skipped: lock poisoned"),
        }
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self, now_ms: u64) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let expired: Vec<DistanceKey> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now_ms))
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ONE_DAY_MS;

    fn key() -> DistanceKey {
        let a = GeoPoint::new(52.52, 13.41).unwrap();
        let b = GeoPoint::new(52.49, 13.37).unwrap();
        DistanceKey::canonical(a, b, RoutingProfile::Driving)
    }

    #[test]
    fn get_after_put_returns_same_value() {
        let cache = DistanceCache::new(16, 7 * ONE_DAY_MS);
        cache.put(key(), 1234.5, 99.0, None, 1_000);

        let entry = cache.get(&key(), 2_000).expect("cached entry");
        assert_eq!(entry.distance_m, 1234.5);
        assert_eq!(entry.duration_s, 99.0);
        assert_eq!(entry.expires_at_ms, 1_000 + 7 * ONE_DAY_MS);
    }

    #[test]
    fn reversed_endpoints_share_an_entry() {
        let a = GeoPoint::new(52.52, 13.41).unwrap();
        let b = GeoPoint::new(52.49, 13.37).unwrap();
        let cache = DistanceCache::new(16, ONE_DAY_MS);
        cache.put(
            DistanceKey::canonical(a, b, RoutingProfile::Driving),
            10.0,
            1.0,
            None,
            0,
        );
        assert!(cache
            .get(&DistanceKey::canonical(b, a, RoutingProfile::Driving), 1)
            .is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache = DistanceCache::new(16, 100);
        cache.put(key(), 10.0, 1.0, None, 0);
        assert!(cache.get(&key(), 50).is_some());
        assert!(cache.get(&key(), 100).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_removes_only_expired() {
        let cache = DistanceCache::new(16, 100);
        cache.put(key(), 10.0, 1.0, None, 0);
        let other = DistanceKey::canonical(
            GeoPoint::new(48.13, 11.58).unwrap(),
            GeoPoint::new(48.20, 11.60).unwrap(),
            RoutingProfile::Driving,
        );
        cache.put(other, 20.0, 2.0, None, 80);

        assert_eq!(cache.purge_expired(120), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&other, 120).is_some());
    }

    #[test]
    fn profile_is_part_of_the_key() {
        let a = GeoPoint::new(52.52, 13.41).unwrap();
        let b = GeoPoint::new(52.49, 13.37).unwrap();
        let cache = DistanceCache::new(16, ONE_DAY_MS);
        cache.put(
            DistanceKey::canonical(a, b, RoutingProfile::Driving),
            10.0,
            1.0,
            None,
            0,
        );
        assert!(cache
            .get(&DistanceKey::canonical(a, b, RoutingProfile::Cycling), 1)
            .is_none());
    }
}
