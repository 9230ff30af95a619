// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Deduplicated, time-stamped store of discovered streams.
//!
//! Shared between the resolve attempts (writers) and the resolver facade
//! (reader via `results()`), which may live on different threads. A single
//! mutex serializes all access; caller queries are rare compared to wave
//! activity, so there is no read-side optimization.

use crate::discovery::stream_info::StreamInfo;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Stable identity of a discovered stream (the descriptor uid).
pub type StreamKey = String;

struct Record {
    info: StreamInfo,
    /// Monotonic seconds of the most recent sighting. Non-decreasing for a
    /// given key over the lifetime of the store.
    last_seen: f64,
}

/// Mapping from stream identity to (descriptor, last-seen timestamp).
#[derive(Default)]
pub struct ResultStore {
    table: Mutex<HashMap<StreamKey, Record>>,
}

impl ResultStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a newly seen descriptor, or refresh the timestamp of a known
    /// one. A refresh never replaces the stored descriptor and never moves
    /// `last_seen` backwards.
    pub fn upsert(&self, key: StreamKey, info: StreamInfo, now: f64) {
        let mut table = self.table.lock();
        match table.get_mut(&key) {
            Some(record) => record.last_seen = record.last_seen.max(now),
            None => {
                table.insert(
                    key,
                    Record {
                        info,
                        last_seen: now,
                    },
                );
            }
        }
    }

    /// Evict entries last seen before `expired_before`, then return up to
    /// `max_results` surviving descriptors.
    pub fn snapshot(&self, max_results: u32, expired_before: f64) -> Vec<StreamInfo> {
        let mut table = self.table.lock();
        table.retain(|_, record| record.last_seen >= expired_before);
        table
            .values()
            .take(max_results as usize)
            .map(|record| record.info.clone())
            .collect()
    }

    /// Number of streams currently known.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Whether no streams are currently known.
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    /// Drop all entries (a new resolve starts from a clean slate).
    pub fn clear(&self) {
        self.table.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::stream_info::test_stream;

    #[test]
    fn test_upsert_then_snapshot_contains_entry() {
        let store = ResultStore::new();
        store.upsert("k1".into(), test_stream("k1"), 10.0);
        let snap = store.snapshot(u32::MAX, 10.0);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].uid, "k1");
    }

    #[test]
    fn test_upsert_refreshes_without_duplicating() {
        let store = ResultStore::new();
        store.upsert("k1".into(), test_stream("k1"), 10.0);
        store.upsert("k1".into(), test_stream("k1"), 20.0);
        assert_eq!(store.len(), 1);
        // refreshed entry survives an eviction horizon between the two sightings
        assert_eq!(store.snapshot(u32::MAX, 15.0).len(), 1);
    }

    #[test]
    fn test_refresh_never_moves_last_seen_backwards() {
        let store = ResultStore::new();
        store.upsert("k1".into(), test_stream("k1"), 20.0);
        store.upsert("k1".into(), test_stream("k1"), 15.0);
        assert_eq!(store.snapshot(u32::MAX, 18.0).len(), 1);
    }

    #[test]
    fn test_snapshot_evicts_stale_entries() {
        let store = ResultStore::new();
        store.upsert("old".into(), test_stream("old"), 5.0);
        store.upsert("new".into(), test_stream("new"), 12.0);
        let snap = store.snapshot(u32::MAX, 10.0);
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].uid, "new");
        // eviction is a side effect, not just a filter
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_snapshot_caps_output() {
        let store = ResultStore::new();
        for i in 0..10 {
            store.upsert(format!("k{}", i), test_stream(&format!("k{}", i)), 1.0);
        }
        assert_eq!(store.snapshot(3, 0.0).len(), 3);
        assert_eq!(store.snapshot(0, 0.0).len(), 0);
        // capping does not evict the overflow
        assert_eq!(store.len(), 10);
    }

    #[test]
    fn test_clear() {
        let store = ResultStore::new();
        store.upsert("k1".into(), test_stream("k1"), 1.0);
        store.clear();
        assert!(store.is_empty());
    }
}
