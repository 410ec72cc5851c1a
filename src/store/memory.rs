// In-process state store for tests and single-node development

use crate::clock::Clock;
use crate::domain::{BucketState, BucketTake};
use crate::errors::{AppError, Result};
use crate::store::{KeyTtl, StateStore, WindowAdmission, WindowEntry};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
enum Value {
    Sorted(HashMap<String, f64>),
    Hash(HashMap<String, String>),
}

#[derive(Debug)]
struct Slot {
    value: Value,
    expires_at: Option<f64>,
}

impl Slot {
    fn sorted() -> Self {
        Self {
            value: Value::Sorted(HashMap::new()),
            expires_at: None,
        }
    }

    fn hash() -> Self {
        Self {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        }
    }

    fn expired(&self, now: f64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn is_empty(&self) -> bool {
        match &self.value {
            Value::Sorted(set) => set.is_empty(),
            Value::Hash(fields) => fields.is_empty(),
        }
    }

    fn sorted_mut(&mut self) -> Result<&mut HashMap<String, f64>> {
        match &mut self.value {
            Value::Sorted(set) => Ok(set),
            Value::Hash(_) => Err(wrong_type()),
        }
    }

    fn hash_mut(&mut self) -> Result<&mut HashMap<String, String>> {
        match &mut self.value {
            Value::Hash(fields) => Ok(fields),
            Value::Sorted(_) => Err(wrong_type()),
        }
    }
}

fn wrong_type() -> AppError {
    AppError::StoreUnavailable(
        "WRONGTYPE operation against a key holding the wrong kind of value".to_string(),
    )
}

/// Keyspace guarded by one lock, so every call is trivially atomic.
/// Expiry is evaluated lazily against the injected clock.
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<String, Slot>>,
    available: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("available", &self.available.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            slots: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            latency: Mutex::new(None),
        }
    }

    /// Simulate an outage: while unavailable every call fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every call, to exercise caller timeouts
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Keys that have not expired, sorted
    pub fn live_keys(&self) -> Vec<String> {
        let now = self.clock.now();
        let mut slots = self.slots.lock();
        slots.retain(|_, slot| !slot.expired(now));
        let mut keys: Vec<String> = slots.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of entries held in a sorted-set key, ignoring expiry of entries
    pub fn window_len(&self, key: &str) -> usize {
        let now = self.clock.now();
        let slots = self.slots.lock();
        match slots.get(key) {
            Some(slot) if !slot.expired(now) => match &slot.value {
                Value::Sorted(set) => set.len(),
                Value::Hash(_) => 0,
            },
            _ => 0,
        }
    }

    async fn ready(&self) -> Result<()> {
        let latency = *self.latency.lock();
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

fn purge_expired(slots: &mut HashMap<String, Slot>, key: &str, now: f64) {
    if slots.get(key).is_some_and(|slot| slot.expired(now)) {
        slots.remove(key);
    }
}

fn ttl_deadline(now: f64, ttl_seconds: u64) -> Option<f64> {
    Some(now + ttl_seconds as f64)
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn window_record(
        &self,
        key: &str,
        entry: &WindowEntry,
        cutoff: f64,
        ttl_seconds: u64,
    ) -> Result<u64> {
        self.ready().await?;
        let now = self.clock.now();
        let mut slots = self.slots.lock();
        purge_expired(&mut slots, key, now);

        let slot = slots.entry(key.to_string()).or_insert_with(Slot::sorted);
        let set = slot.sorted_mut()?;
        set.retain(|_, score| *score > cutoff);
        set.insert(entry.member.clone(), entry.timestamp);
        let count = set.values().filter(|s| **s <= entry.timestamp).count() as u64;
        slot.expires_at = ttl_deadline(now, ttl_seconds);

        Ok(count)
    }

    async fn window_count(&self, key: &str, cutoff: f64, now: f64) -> Result<u64> {
        self.ready().await?;
        let clock_now = self.clock.now();
        let mut slots = self.slots.lock();
        purge_expired(&mut slots, key, clock_now);

        let Some(slot) = slots.get_mut(key) else {
            return Ok(0);
        };
        let set = slot.sorted_mut()?;
        set.retain(|_, score| *score > cutoff);
        let count = set.values().filter(|s| **s <= now).count() as u64;

        if slot.is_empty() {
            slots.remove(key);
        }
        Ok(count)
    }

    async fn window_admit(
        &self,
        key: &str,
        entry: &WindowEntry,
        cutoff: f64,
        limit: u64,
        ttl_seconds: u64,
    ) -> Result<WindowAdmission> {
        self.ready().await?;
        let now = self.clock.now();
        let mut slots = self.slots.lock();
        purge_expired(&mut slots, key, now);

        let slot = slots.entry(key.to_string()).or_insert_with(Slot::sorted);
        let set = slot.sorted_mut()?;
        set.retain(|_, score| *score > cutoff);

        let count = set.values().filter(|s| **s <= entry.timestamp).count() as u64;

        let admission = if count < limit {
            set.insert(entry.member.clone(), entry.timestamp);
            slot.expires_at = ttl_deadline(now, ttl_seconds);
            WindowAdmission {
                admitted: true,
                count,
                oldest: None,
            }
        } else {
            WindowAdmission {
                admitted: false,
                count,
                oldest: set
                    .values()
                    .copied()
                    .filter(|s| *s <= entry.timestamp)
                    .reduce(f64::min),
            }
        };

        if slot.is_empty() {
            slots.remove(key);
        }
        Ok(admission)
    }

    async fn bucket_take(
        &self,
        key: &str,
        now: f64,
        rate: f64,
        burst: f64,
        ttl_seconds: u64,
    ) -> Result<BucketTake> {
        self.ready().await?;
        let clock_now = self.clock.now();
        let mut slots = self.slots.lock();
        purge_expired(&mut slots, key, clock_now);

        let slot = slots.entry(key.to_string()).or_insert_with(Slot::hash);
        let fields = slot.hash_mut()?;

        let current = if fields.is_empty() {
            None
        } else {
            let read = |name: &str| fields.get(name).and_then(|v| v.parse::<f64>().ok());
            Some(BucketState {
                tokens: read("tokens").unwrap_or(burst),
                last_refill: read("last_refill").unwrap_or(now),
            })
        };

        let take = BucketState::take(current, now, rate, burst);
        fields.insert("tokens".to_string(), take.state.tokens.to_string());
        fields.insert("last_refill".to_string(), take.state.last_refill.to_string());
        slot.expires_at = ttl_deadline(clock_now, ttl_seconds);

        Ok(take)
    }

    async fn set_fields(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl_seconds: u64,
    ) -> Result<()> {
        self.ready().await?;
        let now = self.clock.now();
        let mut slots = self.slots.lock();
        purge_expired(&mut slots, key, now);

        let slot = slots.entry(key.to_string()).or_insert_with(Slot::hash);
        let hash = slot.hash_mut()?;
        for (name, value) in fields {
            hash.insert((*name).to_string(), value.clone());
        }
        slot.expires_at = ttl_deadline(now, ttl_seconds);

        Ok(())
    }

    async fn remaining_ttl(&self, key: &str) -> Result<KeyTtl> {
        self.ready().await?;
        let now = self.clock.now();
        let mut slots = self.slots.lock();
        purge_expired(&mut slots, key, now);

        Ok(match slots.get(key) {
            None => KeyTtl::Missing,
            Some(Slot {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(Slot {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(at - now),
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.ready().await?;
        self.slots.lock().remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.ready().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::new(1_000.0));
        let store = MemoryStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_window_record_purges_and_counts() {
        let (_clock, store) = store();

        assert_eq!(
            store
                .window_record("k", &WindowEntry::new(1_000.0), 940.0, 70)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .window_record("k", &WindowEntry::new(1_030.0), 970.0, 70)
                .await
                .unwrap(),
            2
        );
        // Cutoff 1_010 drops the entry at 1_000
        assert_eq!(
            store
                .window_record("k", &WindowEntry::new(1_070.0), 1_010.0, 70)
                .await
                .unwrap(),
            2
        );
        assert_eq!(store.window_len("k"), 2);
    }

    #[tokio::test]
    async fn test_window_admit_respects_limit() {
        let (_clock, store) = store();

        for _ in 0..2 {
            let admission = store
                .window_admit("k", &WindowEntry::new(1_000.0), 940.0, 2, 70)
                .await
                .unwrap();
            assert!(admission.admitted);
        }

        let rejected = store
            .window_admit("k", &WindowEntry::new(1_001.0), 941.0, 2, 70)
            .await
            .unwrap();
        assert!(!rejected.admitted);
        assert_eq!(rejected.count, 2);
        assert_eq!(rejected.oldest, Some(1_000.0));
        assert_eq!(store.window_len("k"), 2);
    }

    #[tokio::test]
    async fn test_entry_at_cutoff_has_left_the_window() {
        let (_clock, store) = store();

        store
            .window_record("k", &WindowEntry::new(1_000.0), 940.0, 70)
            .await
            .unwrap();
        assert_eq!(store.window_count("k", 1_000.0, 1_060.0).await.unwrap(), 0);

        store
            .window_record("k", &WindowEntry::new(1_000.0), 940.0, 70)
            .await
            .unwrap();
        let admission = store
            .window_admit("k", &WindowEntry::new(1_060.0), 1_000.0, 1, 70)
            .await
            .unwrap();
        assert!(admission.admitted);
        assert_eq!(admission.count, 0);
        assert_eq!(store.window_len("k"), 1);
    }

    #[tokio::test]
    async fn test_keys_expire_with_clock() {
        let (clock, store) = store();

        store
            .set_fields("blocked", &[("reason", "test".to_string())], 30)
            .await
            .unwrap();
        assert_eq!(
            store.remaining_ttl("blocked").await.unwrap(),
            KeyTtl::Expires(30.0)
        );

        clock.advance(30.0);
        assert_eq!(
            store.remaining_ttl("blocked").await.unwrap(),
            KeyTtl::Missing
        );
        assert!(store.live_keys().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type_is_rejected() {
        let (_clock, store) = store();
        store
            .set_fields("k", &[("a", "1".to_string())], 30)
            .await
            .unwrap();

        let err = store
            .window_record("k", &WindowEntry::new(1_000.0), 0.0, 30)
            .await
            .unwrap_err();
        assert!(err.is_store_failure());
    }

    #[tokio::test]
    async fn test_outage_fails_every_call() {
        let (_clock, store) = store();
        store.set_available(false);

        assert!(store.ping().await.is_err());
        assert!(store.remaining_ttl("k").await.is_err());

        store.set_available(true);
        tokio_test::assert_ok!(store.ping().await);
    }

    #[tokio::test]
    async fn test_bucket_state_round_trips_through_fields() {
        let (_clock, store) = store();

        let first = store.bucket_take("b", 1_000.0, 1.0, 3.0, 70).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.state.tokens, 2.0);

        let second = store.bucket_take("b", 1_000.5, 1.0, 3.0, 70).await.unwrap();
        assert!(second.allowed);
        assert!((second.state.tokens - 1.5).abs() < 1e-9);
    }
}
