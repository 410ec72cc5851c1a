use crate::domain::{KeyBuilder, KeySegment};
use crate::errors::Result;
use crate::store::{KeyTtl, StateStore};
use std::sync::Arc;

/// Whether an identifier is currently held by the block gate
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockStatus {
    Unblocked,
    Blocked { retry_after: f64 },
}

impl BlockStatus {
    pub fn is_blocked(&self) -> bool {
        matches!(self, BlockStatus::Blocked { .. })
    }
}

/// Temporary per-identifier block.
///
/// The block key's existence is the block; its TTL is the remaining
/// duration. There is no unblock path: the store's expiry ends the block.
#[derive(Clone)]
pub struct BlockGate {
    store: Arc<dyn StateStore>,
    keys: KeyBuilder,
    block_duration_seconds: u64,
}

impl BlockGate {
    pub fn new(store: Arc<dyn StateStore>, keys: KeyBuilder, block_duration_seconds: u64) -> Self {
        Self {
            store,
            keys,
            block_duration_seconds,
        }
    }

    pub fn block_duration_seconds(&self) -> u64 {
        self.block_duration_seconds
    }

    pub async fn status(&self, identifier: &KeySegment) -> Result<BlockStatus> {
        let key = self.keys.blocked(identifier);

        Ok(match self.store.remaining_ttl(&key).await? {
            KeyTtl::Missing => BlockStatus::Unblocked,
            KeyTtl::Expires(seconds) => BlockStatus::Blocked {
                retry_after: seconds,
            },
            // Someone stripped the expiry; report a full block duration
            KeyTtl::Persistent => BlockStatus::Blocked {
                retry_after: self.block_duration_seconds as f64,
            },
        })
    }

    /// Block for the configured duration. Repeating the call refreshes the
    /// TTL to the same duration; it never stacks.
    pub async fn block(&self, identifier: &KeySegment, violations: u64, now: f64) -> Result<()> {
        let key = self.keys.blocked(identifier);
        let fields = [
            ("reason", "violations".to_string()),
            ("violations", violations.to_string()),
            ("blocked_at", now.to_string()),
        ];

        self.store
            .set_fields(&key, &fields, self.block_duration_seconds)
            .await?;

        tracing::warn!(
            identifier = %identifier,
            violations,
            block_duration_seconds = self.block_duration_seconds,
            "Identifier blocked after repeated violations"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::store::MemoryStore;

    fn setup() -> (Arc<ManualClock>, BlockGate) {
        let clock = Arc::new(ManualClock::new(5_000.0));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let gate = BlockGate::new(store, KeyBuilder::new("test").unwrap(), 900);
        (clock, gate)
    }

    #[tokio::test]
    async fn test_unblocked_by_default() {
        let (_clock, gate) = setup();
        let id = KeySegment::new("10.1.1.1").unwrap();
        assert_eq!(gate.status(&id).await.unwrap(), BlockStatus::Unblocked);
    }

    #[tokio::test]
    async fn test_block_expires_on_its_own() {
        let (clock, gate) = setup();
        let id = KeySegment::new("10.1.1.1").unwrap();

        gate.block(&id, 5, clock.now()).await.unwrap();
        assert_eq!(
            gate.status(&id).await.unwrap(),
            BlockStatus::Blocked { retry_after: 900.0 }
        );

        clock.advance(600.0);
        assert_eq!(
            gate.status(&id).await.unwrap(),
            BlockStatus::Blocked { retry_after: 300.0 }
        );

        clock.advance(300.0);
        assert_eq!(gate.status(&id).await.unwrap(), BlockStatus::Unblocked);
    }

    #[tokio::test]
    async fn test_reblock_does_not_stack() {
        let (clock, gate) = setup();
        let id = KeySegment::new("10.1.1.1").unwrap();

        gate.block(&id, 5, clock.now()).await.unwrap();
        gate.block(&id, 6, clock.now()).await.unwrap();

        assert_eq!(
            gate.status(&id).await.unwrap(),
            BlockStatus::Blocked { retry_after: 900.0 }
        );
    }

    #[tokio::test]
    async fn test_block_is_per_identifier() {
        let (clock, gate) = setup();
        let offender = KeySegment::new("10.1.1.1").unwrap();
        let bystander = KeySegment::new("10.1.1.2").unwrap();

        gate.block(&offender, 5, clock.now()).await.unwrap();
        assert!(gate.status(&offender).await.unwrap().is_blocked());
        assert!(!gate.status(&bystander).await.unwrap().is_blocked());
    }
}
