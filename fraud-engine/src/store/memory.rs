//! In-process store backed by DashMap
//!
//! Each key's operation runs under the map entry's lock, so insert, prune and
//! count for one identity are a single critical section. Keys in other shards
//! never wait on each other.
//!
//! Expired keys are ignored on read and reclaimed by a sweep that runs every
//! `purge_interval` writes.

use super::RiskStore;
use crate::types::VelocityWindowEntry;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Writes between sweeps of expired keys
pub const DEFAULT_PURGE_INTERVAL: u64 = 1_024;

/// Sliding window of one identity
#[derive(Debug, Default)]
struct Window {
    entries: Vec<VelocityWindowEntry>,
}

impl Window {
    /// Drop entries at or before the cutoff
    fn prune(&mut self, cutoff: DateTime<Utc>) {
        self.entries.retain(|e| e.timestamp > cutoff);
    }

    /// Insert or refresh a member
    fn record(&mut self, key: &str, member: &str, now: DateTime<Utc>) {
        match self.entries.iter_mut().find(|e| e.transaction_id == member) {
            Some(existing) => existing.timestamp = now,
            None => self.entries.push(VelocityWindowEntry {
                identity_key: key.to_string(),
                transaction_id: member.to_string(),
                timestamp: now,
            }),
        }
    }

    fn newest(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(|e| e.timestamp).max()
    }
}

#[derive(Debug)]
enum Slot {
    Window {
        window: Window,
        expires_at: DateTime<Utc>,
    },
    Counter {
        value: u64,
        expires_at: DateTime<Utc>,
    },
    Value {
        value: String,
        expires_at: Option<DateTime<Utc>>,
    },
}

impl Slot {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            Slot::Window { expires_at, .. } | Slot::Counter { expires_at, .. } => *expires_at <= now,
            Slot::Value { expires_at, .. } => expires_at.map_or(false, |at| at <= now),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Slot::Window { .. } => "window",
            Slot::Counter { .. } => "counter",
            Slot::Value { .. } => "value",
        }
    }
}

fn wrong_type(key: &str, slot: &Slot, wanted: &str) -> Error {
    Error::StoreUnavailable(format!(
        "key {} holds a {}, expected a {}",
        key,
        slot.kind(),
        wanted
    ))
}

/// In-process [`RiskStore`]
#[derive(Debug, Clone)]
pub struct MemoryStore {
    slots: Arc<DashMap<String, Slot>>,
    writes: Arc<AtomicU64>,
    purge_interval: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_purge_interval(DEFAULT_PURGE_INTERVAL)
    }
}

impl MemoryStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create empty store sweeping expired keys every `writes` writes
    pub fn with_purge_interval(writes: u64) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            writes: Arc::new(AtomicU64::new(0)),
            purge_interval: writes.max(1),
        }
    }

    /// Count a write and sweep when the interval is reached. Must not be
    /// called while holding a map entry.
    fn after_write(&self, now: DateTime<Utc>) {
        let written = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if written % self.purge_interval == 0 {
            let dropped = self.purge_expired(now);
            if dropped > 0 {
                debug!(dropped, remaining = self.slots.len(), "Purged expired keys");
            }
        }
    }

    /// Number of keys held (expired keys included until purged)
    pub fn tracked_keys(&self) -> usize {
        self.slots.len()
    }

    /// Remove expired keys; returns how many were dropped
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        before.saturating_sub(self.slots.len())
    }

    /// Entries currently in a window, oldest first
    pub fn window_entries(&self, key: &str, now: DateTime<Utc>) -> Vec<VelocityWindowEntry> {
        let Some(slot) = self.slots.get(key) else {
            return Vec::new();
        };
        if slot.is_expired(now) {
            return Vec::new();
        }
        match slot.value() {
            Slot::Window { window, .. } => {
                let mut entries = window.entries.clone();
                entries.sort_by_key(|e| e.timestamp);
                entries
            }
            _ => Vec::new(),
        }
    }

    fn record_window(
        &self,
        key: &str,
        member: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<u64> {
        let cutoff = now - window;

        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(Slot::Window {
                        window: Window::default(),
                        expires_at: now + window,
                    });
                }
                match occupied.get_mut() {
                    Slot::Window {
                        window: entries,
                        expires_at,
                    } => {
                        entries.record(key, member, now);
                        entries.prune(cutoff);
                        *expires_at = entries.newest().unwrap_or(now) + window;
                        Ok(entries.entries.len() as u64)
                    }
                    other => Err(wrong_type(key, other, "window")),
                }
            }
            Entry::Vacant(vacant) => {
                let mut entries = Window::default();
                entries.record(key, member, now);
                vacant.insert(Slot::Window {
                    window: entries,
                    expires_at: now + window,
                });
                Ok(1)
            }
        }
    }

    fn increment_counter(&self, key: &str, now: DateTime<Utc>, ttl: Duration) -> Result<u64> {
        let mut slot = self.slots.entry(key.to_string()).or_insert(Slot::Counter {
            value: 0,
            expires_at: now + ttl,
        });

        if slot.is_expired(now) {
            *slot = Slot::Counter {
                value: 0,
                expires_at: now + ttl,
            };
        }

        match slot.value_mut() {
            Slot::Counter { value, expires_at } => {
                *value = value.saturating_add(1);
                *expires_at = now + ttl;
                Ok(*value)
            }
            other => Err(wrong_type(key, other, "counter")),
        }
    }

    fn read_counter(&self, key: &str, now: DateTime<Utc>) -> Result<u64> {
        match self.slots.get(key).as_deref() {
            None => Ok(0),
            Some(slot) if slot.is_expired(now) => Ok(0),
            Some(Slot::Counter { value, .. }) => Ok(*value),
            Some(other) => Err(wrong_type(key, other, "counter")),
        }
    }

    fn claim(
        &self,
        key: &str,
        value: String,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool> {
        let fresh = Slot::Value {
            value,
            expires_at: Some(now + ttl),
        };

        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(fresh);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    fn insert_value(
        &self,
        key: &str,
        value: String,
        now: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.slots.insert(
            key.to_string(),
            Slot::Value {
                value,
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    fn read_value(&self, key: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        match self.slots.get(key).as_deref() {
            None => Ok(None),
            Some(slot) if slot.is_expired(now) => Ok(None),
            Some(Slot::Value { value, .. }) => Ok(Some(value.clone())),
            Some(other) => Err(wrong_type(key, other, "value")),
        }
    }
}

#[async_trait]
impl RiskStore for MemoryStore {
    async fn record_and_count(
        &self,
        key: &str,
        member: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<u64> {
        let count = self.record_window(key, member, now, window);
        self.after_write(now);
        count
    }

    async fn increment(&self, key: &str, now: DateTime<Utc>, ttl: Duration) -> Result<u64> {
        let value = self.increment_counter(key, now, ttl);
        self.after_write(now);
        value
    }

    async fn counter(&self, key: &str, now: DateTime<Utc>) -> Result<u64> {
        self.read_counter(key, now)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool> {
        let written = self.claim(key, value, now, ttl);
        self.after_write(now);
        written
    }

    async fn put(
        &self,
        key: &str,
        value: String,
        now: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let result = self.insert_value(key, value, now, ttl);
        self.after_write(now);
        result
    }

    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        self.read_value(key, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_window_prunes_old_entries() {
        let store = MemoryStore::new();
        let window = Duration::minutes(60);

        store.record_and_count("velocity:u1", "tx-1", t0(), window).await.unwrap();
        store
            .record_and_count("velocity:u1", "tx-2", t0() + Duration::minutes(30), window)
            .await
            .unwrap();

        // tx-1 is exactly one window old and drops out
        let count = store
            .record_and_count("velocity:u1", "tx-3", t0() + Duration::minutes(60), window)
            .await
            .unwrap();
        assert_eq!(count, 2);

        let ids: Vec<String> = store
            .window_entries("velocity:u1", t0() + Duration::minutes(60))
            .into_iter()
            .map(|e| e.transaction_id)
            .collect();
        assert_eq!(ids, vec!["tx-2".to_string(), "tx-3".to_string()]);
    }

    #[tokio::test]
    async fn test_window_member_is_idempotent() {
        let store = MemoryStore::new();
        let window = Duration::hours(1);

        assert_eq!(store.record_and_count("k", "tx-1", t0(), window).await.unwrap(), 1);
        assert_eq!(store.record_and_count("k", "tx-1", t0(), window).await.unwrap(), 1);
        assert_eq!(store.record_and_count("k", "tx-2", t0(), window).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_records_do_not_undercount() {
        let store = MemoryStore::new();
        let mut handles = Vec::new();

        for i in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .record_and_count("velocity:hot", &format!("tx-{}", i), t0(), Duration::hours(1))
                    .await
                    .unwrap()
            }));
        }

        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap());
        }
        counts.sort_unstable();

        // Every call observed a distinct post-insert count
        assert_eq!(counts, (1..=64).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_counter_expires() {
        let store = MemoryStore::new();
        let ttl = Duration::minutes(10);

        store.increment("failed:u1", t0(), ttl).await.unwrap();
        store.increment("failed:u1", t0(), ttl).await.unwrap();
        assert_eq!(store.counter("failed:u1", t0()).await.unwrap(), 2);
        assert_eq!(store.counter("failed:u1", t0() + ttl).await.unwrap(), 0);

        // Expired counter restarts at 1
        assert_eq!(store.increment("failed:u1", t0() + ttl, ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_set_if_absent_never_overwrites() {
        let store = MemoryStore::new();
        let ttl = Duration::hours(24);

        assert!(store.set_if_absent("blocked:tx", "a".into(), t0(), ttl).await.unwrap());
        assert!(!store.set_if_absent("blocked:tx", "b".into(), t0(), ttl).await.unwrap());
        assert_eq!(store.get("blocked:tx", t0()).await.unwrap().as_deref(), Some("a"));

        // After expiry the slot can be claimed again
        assert_eq!(store.get("blocked:tx", t0() + ttl).await.unwrap(), None);
        assert!(store.set_if_absent("blocked:tx", "c".into(), t0() + ttl, ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let store = MemoryStore::new();
        store.put("k", "v".into(), t0(), None).await.unwrap();
        assert!(store.increment("k", t0(), Duration::minutes(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryStore::new();
        store.put("a", "1".into(), t0(), Some(Duration::seconds(5))).await.unwrap();
        store.put("b", "2".into(), t0(), None).await.unwrap();

        assert_eq!(store.purge_expired(t0() + Duration::seconds(5)), 1);
        assert_eq!(store.tracked_keys(), 1);
    }

    #[tokio::test]
    async fn test_writes_reclaim_expired_keys() {
        let store = MemoryStore::with_purge_interval(3);
        let retention = Duration::days(7);

        store.put("verdict:tx-1", "{}".into(), t0(), Some(retention)).await.unwrap();
        store.put("verdict:tx-2", "{}".into(), t0(), Some(retention)).await.unwrap();
        assert_eq!(store.tracked_keys(), 2);

        // Third write lands after both verdicts expired and triggers the sweep
        let later = t0() + retention + Duration::seconds(1);
        store.put("verdict:tx-3", "{}".into(), later, Some(retention)).await.unwrap();

        assert_eq!(store.tracked_keys(), 1);
        assert!(store.get("verdict:tx-3", later).await.unwrap().is_some());
    }
}
