//! Sliding-window counters, one per aggregation key.
//!
//! Each bucket holds `{count, last_tick}` updated with atomics so the hot
//! path never takes the map lock for counting. The map lock is exclusive
//! only for bucket insertion and the periodic sweep of stale buckets.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

/// Key of the shared bucket used when a rule has no aggregation selectors.
pub const DEFAULT_BUCKET: &str = "*";

/// A per-key counter with its window epoch.
#[derive(Debug)]
pub struct AggregationValue {
    last_tick: AtomicU64,
    count: AtomicU64,
}

impl AggregationValue {
    pub fn new(now: u64) -> AggregationValue {
        AggregationValue {
            last_tick: AtomicU64::new(now),
            count: AtomicU64::new(0),
        }
    }

    /// Counts one hit and reports whether the limit is now exceeded.
    ///
    /// With `limit == 0` every hit matches. Otherwise the window is reset
    /// first when `interval` seconds have passed since `last_tick`. The
    /// reset is not linearizable: two hits straddling a window boundary may
    /// both observe the old tick, leaking at most one extra count per
    /// boundary per bucket.
    pub fn hit(&self, limit: u64, interval: u64, now: u64) -> bool {
        if limit == 0 {
            self.count.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        if now.saturating_sub(self.last_tick.load(Ordering::Relaxed)) >= interval {
            self.count.store(0, Ordering::Relaxed);
            // fetch_max keeps last_tick monotone even against a racing reset
            self.last_tick.fetch_max(now, Ordering::Relaxed);
        }
        self.count.fetch_add(1, Ordering::Relaxed) + 1 > limit
    }

    pub fn is_stale(&self, now: u64, interval: u64) -> bool {
        now.saturating_sub(self.last_tick.load(Ordering::Relaxed)) >= interval
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn last_tick(&self) -> u64 {
        self.last_tick.load(Ordering::Relaxed)
    }
}

/// Serializable view of one bucket for state dumps.
#[derive(Debug, Clone, Serialize)]
pub struct BucketSnapshot {
    pub last_tick: u64,
    pub count: u64,
}

/// The per-rule map from aggregation key to bucket.
#[derive(Debug, Default)]
pub struct AggregationMap {
    values: RwLock<HashMap<String, Arc<AggregationValue>>>,
}

impl AggregationMap {
    /// Returns the bucket for `key`, installing a fresh one on first use.
    ///
    /// The fresh bucket is allocated before taking the exclusive lock;
    /// double-checked insertion keeps a racing writer's bucket if one got
    /// there first.
    pub fn bucket(&self, key: &str, now: u64) -> Arc<AggregationValue> {
        if let Some(value) = self.values.read().get(key) {
            return Arc::clone(value);
        }
        let fresh = Arc::new(AggregationValue::new(now));
        let mut values = self.values.write();
        Arc::clone(values.entry(key.to_string()).or_insert(fresh))
    }

    /// Drops every bucket whose window has fully elapsed.
    ///
    /// Runs only when the map holds more than one entry. The shared `"*"`
    /// bucket survives sweeps; its counter resets through the window check
    /// on its next hit instead.
    pub fn sweep(&self, now: u64, interval: u64) {
        let mut values = self.values.write();
        if values.len() <= 1 {
            return;
        }
        values.retain(|key, value| key == DEFAULT_BUCKET || !value.is_stale(now, interval));
    }

    pub fn snapshot(&self) -> BTreeMap<String, BucketSnapshot> {
        self.values
            .read()
            .iter()
            .map(|(key, value)| {
                (
                    key.clone(),
                    BucketSnapshot {
                        last_tick: value.last_tick(),
                        count: value.count(),
                    },
                )
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
