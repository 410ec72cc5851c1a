//! Sliding-window log shared by the rate limiter and the violation tracker.
//!
//! Each event is one sorted-set entry scored by its timestamp. Every call
//! purges entries older than the window inside the same store transaction
//! as the count (and the insert, when there is one), so no caller observes
//! a half-cleaned or half-inserted window. The key's TTL is reset on every
//! insert, which is the only cleanup the window needs.

use crate::errors::Result;
use crate::store::{StateStore, WindowAdmission, WindowEntry};
use std::sync::Arc;

#[derive(Clone)]
pub struct WindowedCounter {
    store: Arc<dyn StateStore>,
    window_seconds: u64,
    ttl_buffer_seconds: u64,
}

impl WindowedCounter {
    pub fn new(store: Arc<dyn StateStore>, window_seconds: u64, ttl_buffer_seconds: u64) -> Self {
        Self {
            store,
            window_seconds,
            ttl_buffer_seconds,
        }
    }

    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    fn cutoff(&self, now: f64) -> f64 {
        now - self.window_seconds as f64
    }

    fn ttl(&self) -> u64 {
        self.window_seconds + self.ttl_buffer_seconds
    }

    /// Log an event at `now` unconditionally and return the count including it
    pub async fn record(&self, key: &str, now: f64) -> Result<u64> {
        let entry = WindowEntry::new(now);
        self.store
            .window_record(key, &entry, self.cutoff(now), self.ttl())
            .await
    }

    /// Count events in the window without logging one
    pub async fn peek(&self, key: &str, now: f64) -> Result<u64> {
        self.store.window_count(key, self.cutoff(now), now).await
    }

    /// Log an event at `now` only if fewer than `limit` are already in the window
    pub async fn admit(&self, key: &str, now: f64, limit: u64) -> Result<WindowAdmission> {
        let entry = WindowEntry::new(now);
        self.store
            .window_admit(key, &entry, self.cutoff(now), limit, self.ttl())
            .await
    }
}
