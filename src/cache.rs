//! Response cache keyed by unit and register range.
//!
//! Only [`RegisterValues`] can be stored, which cannot be empty, so an
//! unvalidated payload never reaches the cache. Entries are replaced
//! wholesale and never mutated in place.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::{DataType, FunctionCode, ReadRequest, RegisterValues};

/// Identifies one cached response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Device address.
    pub unit: u8,
    /// Function code of the read.
    pub function: FunctionCode,
    /// Starting register.
    pub register: u16,
    /// Number of registers.
    pub count: u16,
    /// Expected decoding width.
    pub data_type: DataType,
}

impl CacheKey {
    /// Builds the key for a request to a unit.
    #[must_use]
    pub const fn new(unit: u8, request: &ReadRequest) -> Self {
        Self {
            unit,
            function: request.function,
            register: request.register,
            count: request.count,
            data_type: request.data_type,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: RegisterValues,
    stored_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.stored_at) < window
    }
}

/// Most recent valid response per key.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: HashMap<CacheKey, CacheEntry>,
}

impl ResponseCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value if it is younger than `window`.
    ///
    /// An expired entry is removed.
    pub fn get_fresh(
        &mut self,
        key: &CacheKey,
        now: Instant,
        window: Duration,
    ) -> Option<RegisterValues> {
        let entry = self.entries.get(key)?;
        if entry.is_fresh(now, window) {
            return Some(entry.value.clone());
        }
        self.entries.remove(key);
        None
    }

    /// Stores a validated value, replacing any previous entry.
    pub fn insert(&mut self, key: CacheKey, value: RegisterValues, now: Instant) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: now,
            },
        );
    }

    /// Removes one entry. Returns true if it existed.
    pub fn remove(&mut self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Removes every entry of a unit and returns how many were removed.
    pub fn clear_device(&mut self, unit: u8) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.unit != unit);
        before - self.entries.len()
    }

    /// Removes everything and returns how many entries were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Removes expired entries and returns how many were removed.
    pub fn purge_expired(&mut self, now: Instant, window: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now, window));
        before - self.entries.len()
    }

    /// Returns true if an entry exists for the key, fresh or not.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(1);

    fn key(unit: u8, register: u16) -> CacheKey {
        CacheKey::new(unit, &ReadRequest::holding(register, 2, DataType::Float32))
    }

    fn payload(words: &[u16]) -> RegisterValues {
        RegisterValues::new(words.to_vec()).unwrap()
    }

    #[test]
    fn test_fresh_hit_and_expiry() {
        let mut cache = ResponseCache::new();
        let start = Instant::now();
        cache.insert(key(20, 3000), payload(&[1, 2]), start);

        let hit = cache.get_fresh(&key(20, 3000), start + Duration::from_millis(999), WINDOW);
        assert_eq!(hit, Some(payload(&[1, 2])));

        // Exactly one window old counts as expired
        assert!(cache.get_fresh(&key(20, 3000), start + WINDOW, WINDOW).is_none());
        assert!(!cache.contains(&key(20, 3000)));
    }

    #[test]
    fn test_key_includes_function_and_type() {
        let holding = ReadRequest::holding(3000, 2, DataType::Float32);
        let input = ReadRequest::input(3000, 2, DataType::Float32);
        let as_int = ReadRequest::holding(3000, 2, DataType::UInt32);

        assert_ne!(CacheKey::new(20, &holding), CacheKey::new(20, &input));
        assert_ne!(CacheKey::new(20, &holding), CacheKey::new(20, &as_int));
    }

    #[test]
    fn test_insert_replaces_entry() {
        let mut cache = ResponseCache::new();
        let start = Instant::now();
        cache.insert(key(20, 3000), payload(&[1, 2]), start);
        cache.insert(key(20, 3000), payload(&[3, 4]), start + Duration::from_millis(500));

        assert_eq!(cache.len(), 1);
        let hit = cache.get_fresh(&key(20, 3000), start + Duration::from_millis(1200), WINDOW);
        assert_eq!(hit, Some(payload(&[3, 4])));
    }

    #[test]
    fn test_clear_device_leaves_other_units() {
        let mut cache = ResponseCache::new();
        let now = Instant::now();
        cache.insert(key(30, 3000), payload(&[1]), now);
        cache.insert(key(30, 3054), payload(&[2]), now);
        cache.insert(key(10, 3000), payload(&[3]), now);

        assert_eq!(cache.clear_device(30), 2);
        assert!(cache.contains(&key(10, 3000)));
        assert_eq!(cache.clear_device(30), 0);
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_absent_is_harmless() {
        let mut cache = ResponseCache::new();
        assert!(!cache.remove(&key(20, 3000)));
    }

    #[test]
    fn test_purge_expired() {
        let mut cache = ResponseCache::new();
        let start = Instant::now();
        cache.insert(key(20, 3000), payload(&[1]), start);
        cache.insert(key(20, 3002), payload(&[2]), start + Duration::from_millis(800));

        assert_eq!(cache.purge_expired(start + Duration::from_millis(1500), WINDOW), 1);
        assert!(cache.contains(&key(20, 3002)));
    }
}
