//! Shared state store contract.
//!
//! Every method is one atomic transaction against a single key: the store
//! serializes transactions touching the same key, and nothing here assumes
//! atomicity across keys. Any call may fail with
//! [`AppError::StoreUnavailable`](crate::errors::AppError::StoreUnavailable);
//! implementations never retry.

pub mod memory;

use crate::domain::BucketTake;
use crate::errors::Result;
use async_trait::async_trait;
use uuid::Uuid;

pub use memory::MemoryStore;

/// One logged event in a sorted-set window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowEntry {
    /// Unique per event, so identical timestamps never collapse
    pub member: String,
    pub timestamp: f64,
}

impl WindowEntry {
    pub fn new(timestamp: f64) -> Self {
        Self {
            member: Uuid::new_v4().simple().to_string(),
            timestamp,
        }
    }
}

/// Result of a conditional window insert
#[derive(Debug, Clone, PartialEq)]
pub struct WindowAdmission {
    pub admitted: bool,
    /// Entries in the window before this call
    pub count: u64,
    /// Score of the oldest surviving entry, reported on rejection
    pub oldest: Option<f64>,
}

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyTtl {
    Missing,
    /// Present without an expiry
    Persistent,
    /// Present, expiring after this many seconds
    Expires(f64),
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Drop entries scored at or below `cutoff`, add `entry`, reset the TTL
    /// and return the number of entries in `(cutoff, entry.timestamp]`.
    async fn window_record(
        &self,
        key: &str,
        entry: &WindowEntry,
        cutoff: f64,
        ttl_seconds: u64,
    ) -> Result<u64>;

    /// Drop entries scored at or below `cutoff` and count those in `(cutoff, now]`.
    async fn window_count(&self, key: &str, cutoff: f64, now: f64) -> Result<u64>;

    /// Drop entries scored at or below `cutoff`, count survivors, and insert
    /// `entry` (resetting the TTL) only if the count is below `limit`.
    async fn window_admit(
        &self,
        key: &str,
        entry: &WindowEntry,
        cutoff: f64,
        limit: u64,
        ttl_seconds: u64,
    ) -> Result<WindowAdmission>;

    /// Read the bucket hash, refill and take one token, write it back and
    /// reset the TTL.
    async fn bucket_take(
        &self,
        key: &str,
        now: f64,
        rate: f64,
        burst: f64,
        ttl_seconds: u64,
    ) -> Result<BucketTake>;

    /// Write hash fields and set the key's TTL.
    async fn set_fields(&self, key: &str, fields: &[(&str, String)], ttl_seconds: u64)
        -> Result<()>;

    /// Existence plus remaining TTL.
    async fn remaining_ttl(&self, key: &str) -> Result<KeyTtl>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Connectivity check
    async fn ping(&self) -> Result<()>;
}
