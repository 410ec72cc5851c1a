// Redis implementation of the shared state store

use crate::domain::{BucketState, BucketTake};
use crate::errors::{AppError, Result};
use crate::store::{KeyTtl, StateStore, WindowAdmission, WindowEntry};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use std::fmt;

// Conditional insert: purge, count, and insert only below the limit.
// Scores are passed through as strings to avoid float round trips.
const WINDOW_ADMIT_SCRIPT: &str = r#"
local key = KEYS[1]
local now = ARGV[1]
local cutoff = ARGV[2]
local limit = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])
local member = ARGV[5]

redis.call('ZREMRANGEBYSCORE', key, '-inf', cutoff)
local count = redis.call('ZCOUNT', key, '(' .. cutoff, now)

if count < limit then
    redis.call('ZADD', key, now, member)
    redis.call('EXPIRE', key, ttl)
    return {1, count, ''}
end

local oldest = redis.call('ZRANGEBYSCORE', key, '(' .. cutoff, now, 'WITHSCORES', 'LIMIT', 0, 1)
if #oldest > 0 then
    return {0, count, oldest[2]}
end
return {0, count, ''}
"#;

// Read-modify-write refill. Must stay in step with `BucketState::take`.
const BUCKET_TAKE_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local burst = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local state = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(state[1]) or burst
local last_refill = tonumber(state[2]) or now

local elapsed = math.max(0, now - last_refill)
tokens = math.min(burst, math.max(0, tokens + elapsed * rate))

local allowed = 0
if tokens >= 1 then
    tokens = tokens - 1
    allowed = 1
end

local encoded = string.format('%.17g', tokens)
redis.call('HSET', key, 'tokens', encoded, 'last_refill', ARGV[1])
redis.call('EXPIRE', key, ttl)
return {allowed, encoded}
"#;

/// State store backed by a shared Redis instance
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    window_admit: Script,
    bucket_take: Script,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            window_admit: Script::new(WINDOW_ADMIT_SCRIPT),
            bucket_take: Script::new(BUCKET_TAKE_SCRIPT),
        }
    }
}

fn parse_score(raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|e| AppError::StoreUnavailable(format!("unexpected score {:?}: {}", raw, e)))
}

#[async_trait]
impl StateStore for RedisStore {
    async fn window_record(
        &self,
        key: &str,
        entry: &WindowEntry,
        cutoff: f64,
        ttl_seconds: u64,
    ) -> Result<u64> {
        let mut conn = self.manager.clone();

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(cutoff)
            .ignore()
            .cmd("ZADD")
            .arg(key)
            .arg(entry.timestamp)
            .arg(&entry.member)
            .ignore()
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds)
            .ignore()
            .cmd("ZCOUNT")
            .arg(key)
            .arg(format!("({}", cutoff))
            .arg(entry.timestamp)
            .query_async(&mut conn)
            .await?;

        Ok(count)
    }

    async fn window_count(&self, key: &str, cutoff: f64, now: f64) -> Result<u64> {
        let mut conn = self.manager.clone();

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(cutoff)
            .ignore()
            .cmd("ZCOUNT")
            .arg(key)
            .arg(format!("({}", cutoff))
            .arg(now)
            .query_async(&mut conn)
            .await?;

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
        let mut conn = self.manager.clone();

        let (admitted, count, oldest): (i64, u64, String) = self
            .window_admit
            .key(key)
            .arg(entry.timestamp)
            .arg(cutoff)
            .arg(limit)
            .arg(ttl_seconds)
            .arg(&entry.member)
            .invoke_async(&mut conn)
            .await?;

        let oldest = if oldest.is_empty() {
            None
        } else {
            Some(parse_score(&oldest)?)
        };

        Ok(WindowAdmission {
            admitted: admitted == 1,
            count,
            oldest,
        })
    }

    async fn bucket_take(
        &self,
        key: &str,
        now: f64,
        rate: f64,
        burst: f64,
        ttl_seconds: u64,
    ) -> Result<BucketTake> {
        let mut conn = self.manager.clone();

        let (allowed, tokens): (i64, String) = self
            .bucket_take
            .key(key)
            .arg(now)
            .arg(rate)
            .arg(burst)
            .arg(ttl_seconds)
            .invoke_async(&mut conn)
            .await?;

        Ok(BucketTake {
            allowed: allowed == 1,
            state: BucketState {
                tokens: parse_score(&tokens)?,
                last_refill: now,
            },
        })
    }

    async fn set_fields(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl_seconds: u64,
    ) -> Result<()> {
        if fields.is_empty() {
            return Err(AppError::Internal(format!(
                "no fields to write for {}",
                key
            )));
        }

        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("HSET").arg(key);
        for (name, value) in fields {
            pipe.arg(*name).arg(value);
        }
        pipe.ignore().cmd("EXPIRE").arg(key).arg(ttl_seconds).ignore();

        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn remaining_ttl(&self, key: &str) -> Result<KeyTtl> {
        let mut conn = self.manager.clone();
        let millis: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;

        Ok(match millis {
            -2 => KeyTtl::Missing,
            -1 => KeyTtl::Persistent,
            ms => KeyTtl::Expires(ms.max(0) as f64 / 1000.0),
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisConfig;

    async fn store() -> RedisStore {
        let config = RedisConfig {
            url: "redis://localhost:6379".to_string(),
            connection_timeout_seconds: 5,
        };
        let manager = crate::redis::create_client(&config).await.unwrap();
        RedisStore::new(manager)
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("1700000000.25").unwrap(), 1_700_000_000.25);
        assert!(parse_score("abc").is_err());
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_window_admit_against_redis() {
        let store = store().await;
        let key = "test:api_bouncer:window_admit";
        store.delete(key).await.unwrap();

        for _ in 0..3 {
            let admission = store
                .window_admit(key, &WindowEntry::new(1_000.0), 940.0, 3, 70)
                .await
                .unwrap();
            assert!(admission.admitted);
        }

        let rejected = store
            .window_admit(key, &WindowEntry::new(1_000.0), 940.0, 3, 70)
            .await
            .unwrap();
        assert!(!rejected.admitted);
        assert_eq!(rejected.count, 3);
        assert_eq!(rejected.oldest, Some(1_000.0));

        store.delete(key).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_entry_at_cutoff_is_purged_against_redis() {
        let store = store().await;
        let key = "test:api_bouncer:window_cutoff";
        store.delete(key).await.unwrap();

        store
            .window_record(key, &WindowEntry::new(1_000.0), 940.0, 70)
            .await
            .unwrap();
        assert_eq!(store.window_count(key, 1_000.0, 1_060.0).await.unwrap(), 0);

        let admission = store
            .window_admit(key, &WindowEntry::new(1_060.0), 1_000.0, 1, 70)
            .await
            .unwrap();
        assert!(admission.admitted);
        assert_eq!(admission.count, 0);

        store.delete(key).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_bucket_take_against_redis() {
        let store = store().await;
        let key = "test:api_bouncer:bucket";
        store.delete(key).await.unwrap();

        let first = store.bucket_take(key, 1_000.0, 1.0, 2.0, 70).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.state.tokens, 1.0);

        let second = store.bucket_take(key, 1_000.0, 1.0, 2.0, 70).await.unwrap();
        assert!(second.allowed);
        let third = store.bucket_take(key, 1_000.0, 1.0, 2.0, 70).await.unwrap();
        assert!(!third.allowed);
        assert_eq!(third.state.tokens, 0.0);

        store.delete(key).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_block_key_ttl_against_redis() {
        let store = store().await;
        let key = "test:api_bouncer:blocked";
        store.delete(key).await.unwrap();

        assert_eq!(store.remaining_ttl(key).await.unwrap(), KeyTtl::Missing);
        store
            .set_fields(key, &[("reason", "violations".to_string())], 60)
            .await
            .unwrap();

        match store.remaining_ttl(key).await.unwrap() {
            KeyTtl::Expires(secs) => assert!(secs > 58.0 && secs <= 60.0),
            other => panic!("unexpected ttl {:?}", other),
        }

        store.delete(key).await.unwrap();
    }
}
