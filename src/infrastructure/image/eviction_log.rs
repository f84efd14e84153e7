//! Queue of backing-store evictions awaiting reconciliation.

use parking_lot::Mutex;

use crate::domain::entities::CacheKey;

/// A key the backing store dropped on its own, tagged with the insertion
/// generation of the dropped value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionRecord {
    /// Evicted key.
    pub key: CacheKey,
    /// Generation of the evicted value.
    pub generation: u64,
}

/// Append-only from eviction callbacks, drained by the owning cache.
///
/// The callback may run on any thread, so this is the only structure it
/// touches. Critical sections are a single push or a swap.
#[derive(Debug, Default)]
pub struct EvictionLog {
    records: Mutex<Vec<EvictionRecord>>,
}

impl EvictionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an eviction.
    pub fn record(&self, key: CacheKey, generation: u64) {
        self.records.lock().push(EvictionRecord { key, generation });
    }

    /// Takes every pending record, leaving the log empty.
    #[must_use]
    pub fn drain(&self) -> Vec<EvictionRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    /// Discards pending records.
    pub fn clear(&self) {
        self.records.lock().clear();
    }

    /// Number of pending records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_drain_empties_log() {
        let log = EvictionLog::new();
        log.record(CacheKey::new("a"), 1);
        log.record(CacheKey::new("b"), 2);

        let drained = log.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].key, CacheKey::new("a"));
        assert!(log.is_empty());
        assert!(log.drain().is_empty());
    }

    #[test]
    fn test_concurrent_records() {
        let log = Arc::new(EvictionLog::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        log.record(CacheKey::new(format!("{t}-{i}")), i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(log.drain().len(), 400);
    }
}
